use thiserror::Error;

/// Upstream market-data failures. Always recovered by the scheduler:
/// the cycle is skipped and the previous snapshots stay in place.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {status}")]
    Status { status: u16 },
    #[error("could not decode upstream payload: {0}")]
    Decode(String),
    #[error("upstream returned no usable symbols")]
    Empty,
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Status { status: status.as_u16() }
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// A single scoring call failed. Scored as 0 by the enricher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScorerError {
    #[error("scorer {0} is not ready")]
    NotReady(String),
    #[error("scorer {scorer} produced a non-finite value")]
    NonFinite { scorer: String },
    #[error("scorer {scorer} failed: {reason}")]
    Failed { scorer: String, reason: String },
}

/// Errors reported to the query boundary. No state changes when returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidConfig(_) => "INVALID_CONFIG",
            QueryError::UnknownSymbol(_) => "UNKNOWN_SYMBOL",
        }
    }
}

/// Fatal pipeline errors. The process should restart rather than degrade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type SourceResult<T> = Result<T, SourceError>;
pub type QueryResult<T> = Result<T, QueryError>;
