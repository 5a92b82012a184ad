use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServicingError {
    /// Malformed or non-positive input, rejected before any state change.
    #[error("validation error: {0}")]
    Validation(String),
    /// Requested amount exceeds the loan's total outstanding balance.
    #[error("amount is greater than the total balance")]
    AmountExceedsBalance,
    /// A required chart-of-accounts entry is not configured. Fatal:
    /// signals misconfiguration, surfaced to the operator.
    #[error("ledger account not configured: {0}")]
    MissingAccount(String),
    /// Lost update detected by the backing store; retry from a fresh read.
    #[error("concurrent update detected: {0}")]
    Concurrency(String),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ServicingError>;
