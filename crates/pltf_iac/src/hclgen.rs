//! Helpers for building generated Terraform with the `hcl` crate.
//!
//! Bodies and blocks are assembled with `hcl::Body::builder()` and
//! `hcl::Block::builder()`. Names that come from specs or descriptors go
//! through [`ident`] so a bad name fails the run instead of producing a file
//! terraform cannot parse.

use hcl::expr::{Expression, FuncCall, Object, ObjectKey, TemplateExpr, Traversal, TraversalOperator, Variable};
use hcl::{Attribute, Body, Identifier};

use crate::error::{IacError, IacResult};

/// Validate `name` as an HCL identifier.
pub fn ident(name: &str) -> IacResult<Identifier> {
    Identifier::new(name.to_string()).map_err(|_| IacError::InvalidIdentifier(name.to_string()))
}

/// True when `s` can be written as a bare HCL identifier.
pub fn is_identifier(s: &str) -> bool {
    Identifier::new(s.to_string()).is_ok()
}

/// `key = value` with a validated key.
pub fn attr(key: &str, value: impl Into<Expression>) -> IacResult<Attribute> {
    Ok(Attribute::new(ident(key)?, value))
}

/// A quoted string literal. Template markers are escaped on render.
pub fn string(s: impl Into<String>) -> Expression {
    Expression::String(s.into())
}

/// A dotted traversal such as `module.vpc.vpc_id` or `local.region`.
pub fn traversal(path: &str) -> IacResult<Expression> {
    let mut segments = path.split('.');
    let root = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IacError::InvalidIdentifier(path.to_string()))?;
    let operators = segments
        .map(|segment| ident(segment).map(TraversalOperator::GetAttr))
        .collect::<IacResult<Vec<_>>>()?;
    let root = Expression::Variable(Variable::from(ident(root)?));
    if operators.is_empty() {
        return Ok(root);
    }
    Ok(Expression::from(Traversal {
        expr: root,
        operators,
    }))
}

/// An object expression. Keys that are not identifiers are quoted.
pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Expression)>) -> Expression {
    let object: Object<ObjectKey, Expression> = entries
        .into_iter()
        .map(|(key, value)| (object_key(key.into()), value))
        .collect();
    Expression::Object(object)
}

fn object_key(key: String) -> ObjectKey {
    match Identifier::new(key.clone()) {
        Ok(id) => ObjectKey::Identifier(id),
        Err(_) => ObjectKey::Expression(Expression::String(key)),
    }
}

/// `name(args...)`.
pub fn call(name: &str, args: Vec<Expression>) -> IacResult<Expression> {
    let call = args
        .into_iter()
        .fold(FuncCall::builder(ident(name)?), |builder, arg| builder.arg(arg))
        .build();
    Ok(Expression::from(call))
}

/// Template text with `${...}` splices. The text must already have its
/// literal `${` and `%{` sequences escaped with [`escape_template_literal`].
pub fn template(text: String) -> Expression {
    Expression::from(TemplateExpr::QuotedString(text))
}

/// Escape literal `${` and `%{` for use inside template text.
pub fn escape_template_literal(s: &str) -> String {
    s.replace("${", "$${").replace("%{", "%%{")
}

/// Render a body as HCL text.
pub fn render(body: &Body) -> IacResult<String> {
    let mut text = hcl::format::to_string(body)?;
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

/// Collapse whitespace runs so assertions ignore alignment.
#[cfg(test)]
pub(crate) fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
