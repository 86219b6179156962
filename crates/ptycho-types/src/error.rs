use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtychoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    Shape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("Linear algebra error: {0}")]
    LinAlg(String),

    #[error("Communication error: {0}")]
    Comm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PtychoResult<T> = Result<T, PtychoError>;
