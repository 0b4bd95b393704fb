use crate::label::LabelError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of a single extraction call. All variants are fatal: callers
/// receive either a complete graph or one of these.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied package or label string failed label grammar.
    #[error(transparent)]
    MalformedLabel(#[from] LabelError),

    /// The query-execution interface itself failed.
    #[error("query `{expression}` failed")]
    QueryExecution {
        expression: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Records were delivered but contradict what the query asked for.
    #[error("unexpected query result: {message}")]
    QueryParse {
        message: String,
        #[source]
        source: Option<LabelError>,
    },
}

impl Error {
    pub(crate) fn query_execution(expression: &str, source: anyhow::Error) -> Self {
        Self::QueryExecution {
            expression: expression.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn query_parse(message: impl Into<String>) -> Self {
        Self::QueryParse {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_malformed_label(&self) -> bool {
        matches!(self, Self::MalformedLabel(_))
    }

    pub fn is_query_execution(&self) -> bool {
        matches!(self, Self::QueryExecution { .. })
    }

    pub fn is_query_parse(&self) -> bool {
        matches!(self, Self::QueryParse { .. })
    }
}
