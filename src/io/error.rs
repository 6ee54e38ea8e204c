use thiserror::Error;

use crate::render::pool::CapacityError;


#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported scene format: {0}")]
    Format(String),

    #[error("scene declares {count} points, expected 1..={max}")]
    Size {
        count: usize,
        max: u32,
    },

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error("async io failed: {0}")]
    AsyncIo(String),
}

impl IngestError {
    pub fn format(message: impl Into<String>) -> Self {
        IngestError::Format(message.into())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(error: std::io::Error) -> Self {
        IngestError::AsyncIo(error.to_string())
    }
}
