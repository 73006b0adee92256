use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("field element must be exactly 32 bytes, got {0}")]
    WrongLength(usize),

    #[error("bytes do not encode a canonical BN254 scalar")]
    NonCanonical,

    #[error("poseidon hash failed: {0}")]
    Poseidon(String),

    #[error("verifying key is malformed: {0}")]
    MalformedVerifyingKey(String),

    #[error("proof bytes have the wrong length: expected {expected}, got {got}")]
    InvalidProofLength { expected: usize, got: usize },

    #[error("public input bytes have the wrong length: expected a multiple of 32, got {0}")]
    InvalidPublicInputsLength(usize),

    #[error("serialization error: {0}")]
    Serialization(String),
}
