use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type NodeId = String;

/// Strategy used to perform a node's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Inline,
    Process,
    Docker,
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorKind::Inline => write!(f, "inline"),
            ExecutorKind::Process => write!(f, "process"),
            ExecutorKind::Docker => write!(f, "docker"),
        }
    }
}

/// Description of a single node within a flow.
///
/// `target` is a callable registry key for inline/process nodes and a
/// container image for docker nodes. `transitions` maps an output status to
/// the ordered successors scheduled for it; the reserved `default` key is the
/// fallback when no explicit status matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawNodeDefinition")]
pub struct NodeDefinition {
    pub id: NodeId,
    pub name: Option<String>,
    pub executor: ExecutorKind,
    pub target: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub transitions: BTreeMap<String, Vec<NodeId>>,
    pub timeout: Option<f64>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, executor: ExecutorKind, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            executor,
            target: target.into(),
            command: Vec::new(),
            args: Vec::new(),
            workdir: None,
            env: BTreeMap::new(),
            transitions: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn with_transition(
        mut self,
        status: impl Into<String>,
        successors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.transitions.insert(
            status.into(),
            successors.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Complete definition of a flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawFlowDefinition")]
pub struct FlowDefinition {
    pub name: String,
    pub start: Vec<NodeId>,
    pub nodes: BTreeMap<NodeId, NodeDefinition>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Vec::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn with_start(mut self, id: impl Into<String>) -> Self {
        self.start.push(id.into());
        self
    }

    pub fn add_node(mut self, node: NodeDefinition) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn get_node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(id)
    }

    /// Check the structural invariants: a non-empty start list, every start
    /// id and transition successor defined, and a target on every node.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start.is_empty() {
            return Err(ConfigError::InvalidFlow(
                "at least one start node must be defined".to_string(),
            ));
        }
        for id in &self.start {
            if !self.nodes.contains_key(id) {
                return Err(ConfigError::UnknownStartNode(id.clone()));
            }
        }
        for node in self.nodes.values() {
            if node.target.is_empty() {
                return Err(ConfigError::MissingTarget {
                    node: node.id.clone(),
                    executor: node.executor.to_string(),
                });
            }
            for successors in node.transitions.values() {
                for successor in successors {
                    if !self.nodes.contains_key(successor) {
                        return Err(ConfigError::UnknownSuccessor {
                            node: node.id.clone(),
                            successor: successor.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Successors scheduled for `status`: the exact entry when present, the
    /// `default` entry otherwise, or nothing (the node is terminal).
    pub fn next_nodes(&self, node_id: &str, status: &str) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(node_id) else {
            return Vec::new();
        };
        if let Some(successors) = node.transitions.get(status) {
            return successors.clone();
        }
        if let Some(successors) = node.transitions.get("default") {
            return successors.clone();
        }
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Raw deserialization forms
//
// Flow files written for the original tool use a few shorthands: transitions
// may be a bare list (meaning `default`), a successor may be a single string,
// `nodes` may be a list instead of a mapping, and several keys have aliases.
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTransitions {
    Shorthand(Vec<String>),
    Table(BTreeMap<String, OneOrMany>),
}

impl From<RawTransitions> for BTreeMap<String, Vec<NodeId>> {
    fn from(value: RawTransitions) -> Self {
        match value {
            RawTransitions::Shorthand(successors) => {
                let mut table = BTreeMap::new();
                if !successors.is_empty() {
                    table.insert("default".to_string(), successors);
                }
                table
            }
            RawTransitions::Table(table) => table
                .into_iter()
                .map(|(status, successors)| (status, successors.into()))
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawNodeDefinition {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    executor: ExecutorKind,
    #[serde(default, alias = "callable", alias = "function", alias = "image")]
    target: Option<String>,
    #[serde(default)]
    command: Option<OneOrMany>,
    #[serde(default)]
    args: Option<OneOrMany>,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    transitions: Option<RawTransitions>,
    #[serde(default)]
    timeout: Option<f64>,
}

impl TryFrom<RawNodeDefinition> for NodeDefinition {
    type Error = ConfigError;

    fn try_from(raw: RawNodeDefinition) -> Result<Self, Self::Error> {
        let target = raw.target.unwrap_or_default();
        Ok(Self {
            id: raw.id,
            name: raw.name,
            executor: raw.executor,
            target,
            command: raw.command.map(Into::into).unwrap_or_default(),
            args: raw.args.map(Into::into).unwrap_or_default(),
            workdir: raw.workdir,
            env: raw.env,
            transitions: raw.transitions.map(Into::into).unwrap_or_default(),
            timeout: raw.timeout,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNodes {
    Table(BTreeMap<String, NodeDefinition>),
    List(Vec<NodeDefinition>),
}

#[derive(Deserialize)]
struct RawFlowDefinition {
    #[serde(default = "default_flow_name")]
    name: String,
    #[serde(alias = "triggers")]
    start: OneOrMany,
    nodes: RawNodes,
}

fn default_flow_name() -> String {
    "flow".to_string()
}

impl TryFrom<RawFlowDefinition> for FlowDefinition {
    type Error = ConfigError;

    fn try_from(raw: RawFlowDefinition) -> Result<Self, Self::Error> {
        // Nodes are re-keyed by their declared id in both forms.
        let listed = match raw.nodes {
            RawNodes::Table(table) => table.into_values().collect::<Vec<_>>(),
            RawNodes::List(list) => list,
        };
        let mut nodes = BTreeMap::new();
        for node in listed {
            if nodes.contains_key(&node.id) {
                return Err(ConfigError::DuplicateNode(node.id));
            }
            nodes.insert(node.id.clone(), node);
        }
        Ok(Self {
            name: raw.name,
            start: raw.start.into(),
            nodes,
        })
    }
}
