use thiserror::Error;

#[derive(Error, Debug)]
pub enum Seq2SeqError {
    #[error("failed to read")]
    Reader(#[from] std::io::Error),

    #[error("failed to parse idx_dict")]
    IdxDict(#[from] serde_json::Error),

    #[error("shape mismatch in {op}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("token {index} is outside the vocabulary (size {vocab_size})")]
    UnknownToken { index: usize, vocab_size: usize },

    #[error("character {0:?} is not in the vocabulary")]
    UnknownChar(char),

    #[error("non-finite values produced by {0}")]
    NumericInstability(&'static str),

    #[error("invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Seq2SeqError>;
