//! Module dependency graphs.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::{astar, tarjan_scc, toposort};
use petgraph::dot::{Config, Dot};
use petgraph::graphmap::DiGraphMap;

use pltf_spec::Module;

use crate::expr::referenced_module_ids;

/// Edges between declared modules: links plus `module.<id>.` references in
/// inputs. Only known ids take part; self references are dropped.
pub fn spec_edges(modules: &[Module]) -> BTreeSet<(String, String)> {
    let known: BTreeSet<&str> = modules.iter().map(|m| m.id.as_str()).collect();
    let mut edges = BTreeSet::new();

    for module in modules {
        for (_, target) in module.links.pairs() {
            if known.contains(target) && target != module.id {
                edges.insert((module.id.clone(), target.to_string()));
            }
        }
        for value in module.inputs.values() {
            for target in referenced_module_ids(value) {
                if known.contains(target.as_str()) && target != module.id {
                    edges.insert((module.id.clone(), target));
                }
            }
        }
    }
    edges
}

/// Render the declared module graph in DOT format. Nodes are numbered in
/// sorted id order and labelled with the module id.
pub fn spec_graph(modules: &[Module]) -> String {
    let edges = spec_edges(modules);
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    let ids: BTreeSet<&str> = modules.iter().map(|m| m.id.as_str()).collect();
    for id in ids {
        graph.add_node(id);
    }
    for (from, to) in &edges {
        graph.add_edge(from.as_str(), to.as_str(), ());
    }

    let dot = Dot::with_attr_getters(
        &graph,
        &[Config::NodeNoLabel, Config::EdgeNoLabel, Config::GraphContentOnly],
        &|_, _| String::new(),
        &|_, (id, _)| format!("label = {:?}", id),
    );
    format!("digraph modules {{\n    rankdir=LR;\n{:?}}}\n", dot)
}

/// A dependency cycle as the path of ids ending where it began, or `None`
/// when the graph is acyclic.
///
/// The cycle is taken from the strongly connected component with the
/// smallest member and starts at that member, so the result is stable.
pub fn find_cycle(edges: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (from, targets) in edges {
        graph.add_node(from.as_str());
        for to in targets {
            graph.add_edge(from.as_str(), to.as_str(), ());
        }
    }
    if toposort(&graph, None).is_ok() {
        return None;
    }

    let mut cyclic: Vec<Vec<&str>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || scc.iter().any(|n| graph.contains_edge(*n, *n)))
        .map(|mut scc| {
            scc.sort_unstable();
            scc
        })
        .collect();
    cyclic.sort();
    let component = cyclic.into_iter().next()?;
    let start = *component.first()?;

    if graph.contains_edge(start, start) {
        return Some(vec![start.to_string(), start.to_string()]);
    }

    let mut successors: Vec<&str> = graph
        .neighbors(start)
        .filter(|n| component.binary_search(n).is_ok())
        .collect();
    successors.sort_unstable();

    let back = successors
        .into_iter()
        .filter_map(|next| astar(&graph, next, |n| n == start, |_| 1u32, |_| 0u32))
        .min_by_key(|(cost, _)| *cost)?
        .1;

    let mut cycle = vec![start.to_string()];
    cycle.extend(back.into_iter().map(str::to_string));
    Some(cycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pltf_spec::Value;

    fn edge_map(pairs: &[(&str, &str)]) -> BTreeMap<String, BTreeSet<String>> {
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (from, to) in pairs {
            edges.entry(from.to_string()).or_default().insert(to.to_string());
        }
        edges
    }

    #[test]
    fn test_spec_edges() {
        let modules = vec![
            Module::new("role", "aws_iam_role"),
            Module::new("bucket", "aws_s3").with_link("read", "role"),
            Module::new("app", "aws_k8s_service")
                .with_input("bucket", Value::from("${module.bucket.bucket_name}"))
                .with_input("self", Value::from("module.app.url"))
                .with_input("other", Value::from("module.ghost.id")),
        ];
        let edges: Vec<(String, String)> = spec_edges(&modules).into_iter().collect();
        assert_eq!(
            edges,
            vec![
                ("app".to_string(), "bucket".to_string()),
                ("bucket".to_string(), "role".to_string()),
            ]
        );
    }

    #[test]
    fn test_spec_graph() {
        let modules = vec![
            Module::new("role", "aws_iam_role"),
            Module::new("bucket", "aws_s3").with_link("read", "role"),
            Module::new("app", "aws_k8s_service").with_input("bucket", Value::from("module.bucket.name")),
        ];
        let dot = spec_graph(&modules);
        assert!(dot.starts_with("digraph modules {\n    rankdir=LR;\n"));
        assert!(dot.ends_with("}\n"));
        // Nodes are numbered app=0, bucket=1, role=2.
        assert!(dot.contains("0 [ label = \"app\"]"));
        assert!(dot.contains("2 [ label = \"role\"]"));
        assert!(dot.contains("0 -> 1"));
        assert!(dot.contains("1 -> 2"));
        assert!(!dot.contains("2 -> "));
    }

    #[test]
    fn test_find_cycle() {
        let mut edges = edge_map(&[("a", "b"), ("b", "c")]);
        edges.entry("c".into()).or_default();
        assert!(find_cycle(&edges).is_none());

        edges.entry("c".into()).or_default().insert("a".into());
        assert_eq!(find_cycle(&edges).unwrap(), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_find_cycle_picks_smallest_component() {
        let edges = edge_map(&[("x", "y"), ("y", "x"), ("m", "n"), ("n", "m"), ("a", "m")]);
        assert_eq!(find_cycle(&edges).unwrap(), vec!["m", "n", "m"]);

        let edges = edge_map(&[("solo", "solo")]);
        assert_eq!(find_cycle(&edges).unwrap(), vec!["solo", "solo"]);
    }

    #[test]
    fn test_find_cycle_shortest_way_back() {
        // a -> b -> a is shorter than a -> c -> d -> a.
        let edges = edge_map(&[("a", "c"), ("c", "d"), ("d", "a"), ("a", "b"), ("b", "a")]);
        assert_eq!(find_cycle(&edges).unwrap(), vec!["a", "b", "a"]);
    }
}
