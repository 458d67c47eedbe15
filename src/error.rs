use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors surfaced at the handler boundary.
///
/// "No path found" and "node to remove absent" are soft outcomes carried
/// inside the result payloads, not variants here.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("subgraph too large: {0}")]
    SubgraphTooLarge(String),
    #[error("safety limit exceeded: {0}")]
    SafetyLimitExceeded(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Backend(#[from] rusqlite::Error),
}
