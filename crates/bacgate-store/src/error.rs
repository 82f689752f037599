use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection lost: {0}")]
    Connection(String),
    #[error("record serialisation failed: {0}")]
    Serialisation(#[from] serde_json::Error),
    #[error("record not found")]
    NotFound,
}

impl StoreError {
    /// Whether this error means the record simply is not there.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
