use std::collections::BTreeMap;
use std::collections::BTreeSet;

use conductor_core::{FlowDefinition, NodeId, TraceEntry};
use serde::Serialize;
use serde_json::Value;

/// Per-node aggregates over a trace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    pub runs: u64,
    pub statuses: BTreeMap<String, u64>,
    pub total_duration_ms: u64,
    pub avg_duration_ms: f64,
    pub last_status: Option<String>,
    #[serde(skip)]
    pub last_duration_ms: u64,
    #[serde(skip)]
    pub last_input_preview: Option<String>,
    #[serde(skip)]
    pub last_output_preview: Option<String>,
}

/// Aggregate a trace into per-node statistics.
pub fn summarize(trace: &[TraceEntry]) -> BTreeMap<NodeId, NodeStats> {
    let mut stats: BTreeMap<NodeId, NodeStats> = BTreeMap::new();
    for entry in trace {
        let node = stats.entry(entry.node_id.clone()).or_default();
        node.runs += 1;
        *node.statuses.entry(entry.status.clone()).or_insert(0) += 1;
        node.total_duration_ms += entry.duration_ms;
        node.last_status = Some(entry.status.clone());
        node.last_duration_ms = entry.duration_ms;
        node.last_input_preview = Some(entry.input_preview());
        node.last_output_preview = Some(entry.output_preview());
    }
    for node in stats.values_mut() {
        if node.runs > 0 {
            node.avg_duration_ms = node.total_duration_ms as f64 / node.runs as f64;
        }
    }
    stats
}

/// The summary as plain JSON, for `--print-summary` and log shipping.
pub fn summary_json(trace: &[TraceEntry]) -> Value {
    serde_json::to_value(summarize(trace)).unwrap_or(Value::Null)
}

/// Render the flow (and optionally a trace of one run) as a Mermaid
/// `flowchart TD` document.
///
/// Node and edge enumeration follows the sorted node table, so rendering the
/// same inputs twice yields byte-identical output. Executed nodes get the
/// `executed` class; executed edges are restyled via their `linkStyle`
/// index.
pub fn render_mermaid(
    flow: &FlowDefinition,
    trace: Option<&[TraceEntry]>,
    include_metadata: bool,
) -> String {
    let stats = trace.map(|entries| summarize(entries)).unwrap_or_default();
    let executed_edges: BTreeSet<(NodeId, NodeId)> = trace
        .map(|entries| {
            entries
                .iter()
                .flat_map(|entry| {
                    entry
                        .scheduled
                        .iter()
                        .map(|successor| (entry.node_id.clone(), successor.clone()))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("%% Flow: {}", flow.name));
    lines.push("flowchart TD".to_string());

    for (node_id, node) in &flow.nodes {
        let label = node_label(node_id, node, stats.get(node_id), include_metadata);
        lines.push(format!("    {node_id}[\"{label}\"]"));
    }

    let mut edge_index = 0usize;
    let mut executed_indexes: Vec<usize> = Vec::new();
    for (node_id, node) in &flow.nodes {
        for (status, successors) in &node.transitions {
            for successor in successors {
                lines.push(format!(
                    "    {node_id} -- {} --> {successor}",
                    escape(status)
                ));
                if executed_edges.contains(&(node_id.clone(), successor.clone())) {
                    executed_indexes.push(edge_index);
                }
                edge_index += 1;
            }
        }
    }

    let executed_nodes: Vec<&NodeId> = flow
        .nodes
        .keys()
        .filter(|node_id| stats.contains_key(*node_id))
        .collect();
    if !executed_nodes.is_empty() {
        lines.push("    classDef executed fill:#cfc,stroke:#2a2".to_string());
        let class_list = executed_nodes
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        lines.push(format!("    class {class_list} executed"));
    }
    for index in executed_indexes {
        lines.push(format!(
            "    linkStyle {index} stroke:#0a0,stroke-width:2px"
        ));
    }

    let mut document = lines.join("\n");
    document.push('\n');
    document
}

fn node_label(
    node_id: &str,
    node: &conductor_core::NodeDefinition,
    stats: Option<&NodeStats>,
    include_metadata: bool,
) -> String {
    let mut parts: Vec<String> = vec![escape(node_id)];
    if let Some(name) = &node.name {
        if name != node_id {
            parts.push(escape(name));
        }
    }
    if include_metadata {
        parts.push(format!("executor: {}", node.executor));
        if let Some(stats) = stats {
            parts.push(format!("runs: {}", stats.runs));
            if let Some(status) = &stats.last_status {
                parts.push(format!("last: {}", escape(status)));
            }
            parts.push(format!("dur: {} ms", stats.last_duration_ms));
            if let Some(input) = &stats.last_input_preview {
                parts.push(format!("in: {}", escape(input)));
            }
            if let Some(output) = &stats.last_output_preview {
                parts.push(format!("out: {}", escape(output)));
            }
        }
    }
    parts.join("<br/>")
}

/// Replace characters Mermaid treats as markup with HTML entities, and
/// newlines with explicit breaks.
fn escape(text: &str) -> String {
    text.replace('\\', "&#92;")
        .replace('"', "&quot;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
        .replace('{', "&#123;")
        .replace('}', "&#125;")
        .replace('|', "&#124;")
        .replace('\n', "<br/>")
}
