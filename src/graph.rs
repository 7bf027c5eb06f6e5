use std::collections::{HashMap, HashSet};

use crate::dsl::{NodeKind, ShaderGraph};

/// Node ids reachable by walking links upstream from `start` (inclusive).
pub fn upstream_reachable(graph: &ShaderGraph, start: &str) -> HashSet<String> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for l in &graph.links {
        incoming
            .entry(l.to.node_id.as_str())
            .or_default()
            .push(l.from.node_id.as_str());
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];
    while let Some(n) = stack.pop() {
        if !visited.insert(n.to_string()) {
            continue;
        }
        if let Some(prevs) = incoming.get(n) {
            for p in prevs {
                stack.push(p);
            }
        }
    }
    visited
}

/// Whether `start` or anything upstream of it satisfies `pred`. Used to
/// decide which shader families feed a combiner.
pub fn upstream_any(graph: &ShaderGraph, start: &str, pred: impl Fn(NodeKind) -> bool) -> bool {
    upstream_reachable(graph, start)
        .iter()
        .any(|id| graph.node(id).is_some_and(|n| pred(n.kind)))
}
