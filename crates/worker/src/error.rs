use orderpush_infra::{ConfigError, CredentialError, StoreError};

/// Startup failure. Nothing past startup surfaces as an error: the loop turns
/// every runtime failure into a log entry and a recovery action.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot build HTTP client: {0}")]
    HttpClient(String),

    #[error("no project id: set it in the credentials file or ORDERPUSH_PROJECT_ID")]
    MissingProjectId,
}
