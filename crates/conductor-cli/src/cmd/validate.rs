use crate::output;
use conductor_core::graph::Graph;
use std::path::Path;

/// Validate a graph definition without dispatching anything. Validation
/// errors surface before any run state exists.
pub fn run(graph_path: &Path, json: bool) -> anyhow::Result<i32> {
    let graph = Graph::load(graph_path)?;

    let entries: Vec<String> = graph
        .entry_nodes()
        .iter()
        .map(|n| n.id.clone())
        .collect();

    if json {
        output::print_json(&serde_json::json!({
            "valid": true,
            "nodes": graph.nodes.len(),
            "edges": graph.edges.len(),
            "entry_nodes": entries,
        }))?;
    } else {
        println!(
            "ok: {} nodes, {} edges, entry: {}",
            graph.nodes.len(),
            graph.edges.len(),
            entries.join(", ")
        );
        let rows: Vec<Vec<String>> = graph
            .nodes
            .iter()
            .map(|n| {
                vec![
                    n.id.clone(),
                    format!("{:?}", n.kind).to_lowercase(),
                    format!("{:?}", n.domain).to_lowercase(),
                    format!("{:?}", n.fidelity).to_lowercase(),
                ]
            })
            .collect();
        output::print_table(&["node", "kind", "domain", "fidelity"], rows);
    }
    Ok(0)
}
