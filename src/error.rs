use crate::types::Money;

/// Coarse classification of a [`WorkflowError`], for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    InvalidTransition,
    OverInvoiced,
    ExceedsBalance,
    ExhaustedSequence,
    NotFound,
    Storage,
    Codec,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Cannot {action} while {entity} is {state}")]
    InvalidTransition {
        entity: &'static str,
        state: String,
        action: &'static str,
    },
    #[error(
        "Cannot invoice {requested} units of line {line_index}: only {remaining} remaining"
    )]
    OverInvoiced {
        line_index: usize,
        requested: u64,
        remaining: u64,
    },
    #[error("Payment cannot exceed balance: attempted {attempted}, balance {balance}")]
    ExceedsBalance { attempted: Money, balance: Money },
    #[error("{prefix} sequence for {year} is exhausted")]
    ExhaustedSequence { prefix: &'static str, year: i32 },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Record encoding failure: {0}")]
    Codec(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidInput(_) => ErrorKind::InvalidInput,
            WorkflowError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            WorkflowError::OverInvoiced { .. } => ErrorKind::OverInvoiced,
            WorkflowError::ExceedsBalance { .. } => ErrorKind::ExceedsBalance,
            WorkflowError::ExhaustedSequence { .. } => ErrorKind::ExhaustedSequence,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::Storage(_) => ErrorKind::Storage,
            WorkflowError::Codec(_) => ErrorKind::Codec,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        WorkflowError::InvalidInput(msg.into())
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(value: minicbor::decode::Error) -> Self {
        WorkflowError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for WorkflowError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        WorkflowError::Codec(value.to_string())
    }
}

/// Classify an error surfaced by the service layer.
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<WorkflowError>().map(WorkflowError::kind)
}
