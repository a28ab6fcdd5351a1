//! Render a pipeline's graph as Graphviz DOT (§4.2, "snapshot").
//!
//! Traversal starts at a root queue and follows the `Graph`'s directed
//! edges. `skip_anon` elides unnamed intermediate queues from the picture
//! (they are still traversed through, just not drawn), which keeps a
//! snapshot of a pipeline built mostly from `map`/`chain` sugar readable —
//! most of its queues were never given a name.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use crate::error::Result;
use crate::node::{Graph, NodeId, NodeInfo, NodeKind};

/// Write a DOT rendering of the graph reachable from `root` to `path`.
pub fn render(graph: &Graph, root: NodeId, path: impl AsRef<Path>, skip_anon: bool) -> Result<()> {
    let dot = to_dot(graph, root, skip_anon);
    std::fs::write(path, dot)?;
    Ok(())
}

/// Same as [`render`] but returns the DOT text instead of writing it.
pub fn to_dot(graph: &Graph, root: NodeId, skip_anon: bool) -> String {
    let reachable = bfs_reachable(graph, root);

    let visible: Vec<NodeId> = reachable
        .iter()
        .copied()
        .filter(|id| {
            graph
                .get(*id)
                .map(|info| is_visible(info, skip_anon))
                .unwrap_or(false)
        })
        .collect();

    let mut lines = vec!["digraph pipeline {".to_string(), "    rankdir=LR;".to_string()];

    for id in &visible {
        let info = graph.get(*id).expect("filtered from graph.get above");
        lines.push(format!("    \"{id}\" [{}];", node_attrs(info)));
    }

    let mut drawn = HashSet::new();
    for id in &visible {
        for target in visible_targets(graph, *id, skip_anon) {
            if drawn.insert((*id, target)) {
                lines.push(format!("    \"{id}\" -> \"{target}\";"));
            }
        }
    }

    lines.push("}".to_string());
    lines.join("\n")
}

fn bfs_reachable(graph: &Graph, root: NodeId) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root);
    seen.insert(root);

    while let Some(id) = queue.pop_front() {
        if let Some(info) = graph.get(id) {
            for &child in &info.children {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }
    seen
}

fn is_visible(info: &NodeInfo, skip_anon: bool) -> bool {
    match info.kind {
        NodeKind::Queue => !skip_anon || info.name.is_some(),
        NodeKind::Task | NodeKind::Op => true,
    }
}

/// The visible nodes reachable by following `start`'s children, skipping
/// through any invisible (anonymous, elided) queue in between.
fn visible_targets(graph: &Graph, start: NodeId, skip_anon: bool) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<NodeId> = graph
        .get(start)
        .map(|info| info.children.clone())
        .unwrap_or_default();

    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        match graph.get(id) {
            Some(info) if is_visible(info, skip_anon) => out.push(id),
            Some(info) => stack.extend(info.children.clone()),
            None => {}
        }
    }
    out
}

fn node_attrs(info: &NodeInfo) -> String {
    let label = info.display_name();
    match info.kind {
        NodeKind::Queue => format!("label=\"{label}\", shape=oval"),
        NodeKind::Task => format!("label=\"{label}\", shape=box"),
        NodeKind::Op => format!("label=\"{label}\", shape=box, style=filled, fillcolor=lightgrey"),
    }
}
