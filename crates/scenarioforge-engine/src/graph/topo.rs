//! Topological scheduling over the ordering subgraph (DATA_FLOW,
//! DEPENDENCY, CONDITIONAL). FEEDBACK and other non-ordering edges never
//! prevent a valid order, and the ready set is tie-broken by `created_at`
//! then id so the schedule is reproducible whatever the storage order of
//! `nodes` and `edges`.

use super::model::Graph;
use std::collections::BTreeSet;

/// Kahn's algorithm. `None` when the ordering subgraph has a cycle.
pub fn topological_sort(graph: &Graph) -> Option<Vec<String>> {
    sort_indices(graph).map(|order| {
        order
            .into_iter()
            .map(|i| graph.nodes[i].id.clone())
            .collect()
    })
}

/// Index-based variant used by the executor.
pub(crate) fn sort_indices(graph: &Graph) -> Option<Vec<usize>> {
    let n = graph.nodes.len();
    let index_of = |id: &str| graph.nodes.iter().position(|node| node.id == id);

    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for edge in &graph.edges {
        if !edge.kind.affects_order() {
            continue;
        }
        let (Some(src), Some(dst)) = (index_of(&edge.source.node_id), index_of(&edge.target.node_id))
        else {
            // dangling edges are a validation error, not a scheduling concern
            continue;
        };
        successors[src].push(dst);
        in_degree[dst] += 1;
    }

    // ready set ordered by (created_at, id)
    let mut ready: BTreeSet<(i64, &str, usize)> = graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, node)| (node.created_at, node.id.as_str(), i))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(&entry) = ready.iter().next() {
        ready.remove(&entry);
        let (_, _, idx) = entry;
        order.push(idx);
        for &next in &successors[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                let node = &graph.nodes[next];
                ready.insert((node.created_at, node.id.as_str(), next));
            }
        }
    }

    if order.len() == n { Some(order) } else { None }
}
