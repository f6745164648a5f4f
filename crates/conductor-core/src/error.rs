use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fatal errors raised while loading configuration or preparing a run.
///
/// These abort before any node executes and map to exit code 2 at the CLI.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid flow: {0}")]
    InvalidFlow(String),

    #[error("Duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("Unknown start node '{0}'")]
    UnknownStartNode(String),

    #[error("Node '{node}' references unknown successor '{successor}'")]
    UnknownSuccessor { node: String, successor: String },

    #[error("Node '{node}' requires a target for the {executor} executor")]
    MissingTarget { node: String, executor: String },

    #[error("No callable registered for target '{target}' (node '{node}')")]
    UnknownCallable { node: String, target: String },

    #[error("Failed to read '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Failed to resolve resource '{reference}': {message}")]
    Resolution { reference: String, message: String },
}

/// Non-fatal failures produced while executing a single node.
///
/// The engine folds these into a `NodeOutput` with status `error` or
/// `timeout` and feeds the result into the transition machinery.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Callable failed: {0}")]
    Callable(String),

    #[error("Worker pool unavailable: {0}")]
    Worker(String),

    #[error("Failed to launch container: {0}")]
    ContainerSpawn(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, ConductorError>;
