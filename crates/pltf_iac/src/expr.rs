//! Compilation of YAML input values into HCL expressions.
//!
//! Strings go through two stages before they are emitted:
//!
//! 1. [`normalize_placeholders`] rewrites the `{x}`, `{{x}}` and `${{x}}`
//!    dialects to the canonical `${x}` form.
//! 2. [`ExprCompiler`] substitutes platform placeholders and classifies the
//!    canonical string as a bare reference, an interpolated template or a
//!    plain literal.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use hcl::Expression;
use regex::Regex;

use pltf_spec::Value;

use crate::error::{IacError, IacResult};
use crate::hclgen::{escape_template_literal, object, string, template, traversal};

/// Data source name used for the parent environment's remote state.
pub const REMOTE_STATE_NAME: &str = "env";

fn module_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^module\.([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)$").expect("valid module ref regex")
    })
}

fn var_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^var\.([A-Za-z0-9_]+)$").expect("valid var ref regex"))
}

fn parent_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^parent\.([A-Za-z0-9_]+)$").expect("valid parent ref regex"))
}

fn interpolation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid interpolation regex"))
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\s*([A-Za-z0-9_.-]+)\s*\}").expect("valid placeholder regex")
    })
}

fn module_scan_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"module\.([A-Za-z0-9_-]+)\.[A-Za-z0-9_]+").expect("valid module scan regex")
    })
}

fn var_scan_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bvar\.([A-Za-z0-9_]+)").expect("valid var scan regex"))
}

fn is_placeholder_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Rewrite every placeholder dialect to canonical `${x}`.
///
/// `${{ x }}` always collapses to `${x}`; `{{x}}` and `{x}` are rewritten only
/// when `x` is a plain name, so JSON or HCL object text is left alone.
/// Already-canonical `${...}` sequences are copied verbatim.
pub fn normalize_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let rest = &input[i..];

        if let Some(body) = rest.strip_prefix("${{") {
            if let Some(end) = body.find("}}") {
                out.push_str("${");
                out.push_str(body[..end].trim());
                out.push('}');
                i += 3 + end + 2;
                continue;
            }
        }

        if let Some(body) = rest.strip_prefix("${") {
            match body.find('}') {
                Some(end) => {
                    out.push_str(&rest[..2 + end + 1]);
                    i += 2 + end + 1;
                }
                None => {
                    out.push_str(rest);
                    i = input.len();
                }
            }
            continue;
        }

        if let Some(body) = rest.strip_prefix("{{") {
            if let Some(end) = body.find("}}") {
                let name = body[..end].trim();
                if is_placeholder_name(name) {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                    i += 2 + end + 2;
                    continue;
                }
            }
        }

        if let Some(body) = rest.strip_prefix('{') {
            if let Some(end) = body.find('}') {
                let name = &body[..end];
                if is_placeholder_name(name) {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                    i += 1 + end + 1;
                    continue;
                }
            }
        }

        // Advance one whole character.
        let ch_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&rest[..ch_len]);
        i += ch_len;
    }

    out
}

/// Platform placeholder values for one generation run.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    /// `layer_name` is the service name in service runs and the
    /// environment name otherwise.
    pub fn new(env_name: &str, layer_name: &str, account: &str, region: &str) -> Self {
        let values = BTreeMap::from([
            ("env_name", env_name.to_string()),
            ("layer_name", layer_name.to_string()),
            ("parent_name", layer_name.to_string()),
            ("account_id", account.to_string()),
            ("project_id", account.to_string()),
            ("region", region.to_string()),
        ]);
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replace known `${name}` placeholders in a canonical string.
    pub fn substitute(&self, input: &str) -> String {
        placeholder_re()
            .replace_all(input, |caps: &regex::Captures<'_>| match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// A reference recognized in a string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    Module { id: &'a str, output: &'a str },
    Var(&'a str),
    Parent(&'a str),
}

impl<'a> Reference<'a> {
    /// Parse a whole string as `module.<id>.<out>`, `var.<name>` or
    /// `parent.<out>`.
    pub fn parse(s: &'a str) -> Option<Self> {
        if let Some(caps) = module_ref_re().captures(s) {
            let (Some(id), Some(output)) = (caps.get(1), caps.get(2)) else {
                return None;
            };
            return Some(Reference::Module {
                id: id.as_str(),
                output: output.as_str(),
            });
        }
        if let Some(name) = var_ref_re().captures(s).and_then(|c| c.get(1)) {
            return Some(Reference::Var(name.as_str()));
        }
        if let Some(name) = parent_ref_re().captures(s).and_then(|c| c.get(1)) {
            return Some(Reference::Parent(name.as_str()));
        }
        None
    }
}

/// Traversal through the parent environment's remote state.
pub fn remote_state_output(output: &str) -> String {
    format!("data.terraform_remote_state.{}.outputs.{}", REMOTE_STATE_NAME, output)
}

/// Compiles input values for one run.
#[derive(Debug, Clone)]
pub struct ExprCompiler<'a> {
    placeholders: &'a Placeholders,
    secrets: &'a BTreeSet<String>,
}

impl<'a> ExprCompiler<'a> {
    pub fn new(placeholders: &'a Placeholders, secrets: &'a BTreeSet<String>) -> Self {
        Self {
            placeholders,
            secrets,
        }
    }

    /// Normalize and substitute placeholders in every string of the tree.
    pub fn expand(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.placeholders.substitute(&normalize_placeholders(s))),
            Value::List(items) => Value::List(items.iter().map(|v| self.expand(v)).collect()),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Expand then convert. `None` means the attribute is omitted.
    pub fn compile(&self, value: &Value) -> IacResult<Option<Expression>> {
        self.to_expr(&self.expand(value))
    }

    /// Convert an already-expanded value.
    pub fn to_expr(&self, value: &Value) -> IacResult<Option<Expression>> {
        match value {
            Value::Null => Ok(None),
            other => self.expr_of(other).map(Some),
        }
    }

    fn expr_of(&self, value: &Value) -> IacResult<Expression> {
        match value {
            Value::String(s) => self.classify(s),
            Value::List(items) => Ok(Expression::Array(
                items.iter().map(|v| self.expr_of(v)).collect::<IacResult<_>>()?,
            )),
            Value::Map(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.expr_of(v)?)))
                    .collect::<IacResult<Vec<_>>>()?;
                Ok(object(entries))
            }
            other => Ok(literal_expr(other)),
        }
    }

    /// Classify a canonical string as reference, template or literal.
    pub fn classify(&self, s: &str) -> IacResult<Expression> {
        let trimmed = s.trim();
        if let Some(reference) = Reference::parse(trimmed) {
            return self.reference_expr(&reference);
        }

        if !s.contains("${") {
            return Ok(string(s));
        }

        // A single interpolation spanning the whole string.
        if let Some(caps) = interpolation_re().captures(trimmed) {
            if let Some(whole) = caps.get(0) {
                if whole.start() == 0 && whole.end() == trimmed.len() {
                    if let Some(reference) = Reference::parse(caps[1].trim()) {
                        return self.reference_expr(&reference);
                    }
                }
            }
        }

        let mut text = String::with_capacity(s.len());
        let mut last = 0;
        for caps in interpolation_re().captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            text.push_str(&escape_template_literal(&s[last..whole.start()]));
            let inner = caps[1].trim();
            let rendered = match Reference::parse(inner) {
                Some(reference) => self.render_reference(&reference),
                None => inner.to_string(),
            };
            text.push_str("${");
            text.push_str(&rendered);
            text.push('}');
            last = whole.end();
        }
        text.push_str(&escape_template_literal(&s[last..]));
        Ok(template(text))
    }

    /// Dotted path a reference compiles to.
    pub fn render_reference(&self, reference: &Reference<'_>) -> String {
        match reference {
            Reference::Module { id, output } => format!("module.{}.{}", id, output),
            Reference::Var(name) if self.secrets.contains(*name) => format!("var.{}", name),
            Reference::Var(name) => format!("local.{}", name),
            Reference::Parent(output) => remote_state_output(output),
        }
    }

    pub fn reference_expr(&self, reference: &Reference<'_>) -> IacResult<Expression> {
        traversal(&self.render_reference(reference))
    }
}

/// Render a value as plain literals, with no reference detection.
pub fn literal_expr(value: &Value) -> Expression {
    match value {
        Value::Null => Expression::Null,
        Value::Bool(b) => Expression::Bool(*b),
        Value::Int(i) => Expression::Number(hcl::Number::from(*i)),
        Value::Float(f) => hcl::Number::from_f64(*f)
            .map(Expression::Number)
            .unwrap_or_else(|| string(f.to_string())),
        Value::String(s) => string(s.as_str()),
        Value::List(items) => Expression::Array(items.iter().map(literal_expr).collect()),
        Value::Map(map) => object(map.iter().map(|(k, v)| (k.clone(), literal_expr(v)))),
    }
}

/// Module ids referenced anywhere in the value as `module.<id>.<attr>`.
pub fn referenced_module_ids(value: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    value.for_each_str(&mut |s| {
        for caps in module_scan_re().captures_iter(s) {
            ids.insert(caps[1].to_string());
        }
    });
    ids
}

/// Variable names referenced anywhere in the value as `var.<name>`, in any
/// placeholder dialect.
pub fn referenced_var_names(value: &Value) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    value.for_each_str(&mut |s| {
        for caps in var_scan_re().captures_iter(s) {
            names.insert(caps[1].to_string());
        }
    });
    names
}

/// Reinterpret a raw override string as bool, int, float, JSON list/object,
/// comma-separated list, or string, in that order.
pub fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();

    match trimmed {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => return Value::Bool(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return Value::from(json);
        }
    }

    if trimmed.contains(',') {
        return Value::List(
            trimmed
                .split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .collect(),
        );
    }

    Value::String(raw.to_string())
}

/// Parse repeated `key=value` flags. Later keys win.
pub fn parse_var_flags(flags: &[String]) -> IacResult<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for flag in flags {
        let Some((key, value)) = flag.split_once('=') else {
            return Err(IacError::InvalidVarOverride(flag.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(IacError::InvalidVarOverride(flag.clone()));
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
