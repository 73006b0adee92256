use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shielded_relayer_core::api::ApiErrorBody;
use shielded_relayer_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayerError>;

#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no leaf holds this commitment")]
    CommitmentNotFound,

    #[error("proof did not verify")]
    InvalidProof,

    #[error("public signals do not match the relayer's resolved values: {0}")]
    PayloadBindingMismatch(String),

    #[error("deposit already processed in {signature}")]
    DepositAlreadyUsed { signature: String },

    #[error("nullifier already spent in {signature}")]
    NullifierAlreadyUsed { signature: String },

    #[error("proof bytes have the wrong length: expected {expected}, got {got}")]
    InvalidProofBytesLength { expected: usize, got: usize },

    #[error("public input bytes have the wrong length: {0}")]
    InvalidPublicInputsLength(String),

    #[error("submitted root is not in the recent-roots ring")]
    UnknownMerkleRoot,

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("chain unavailable: {0}")]
    ChainUnavailable(#[from] solana_client::client_error::ClientError),

    #[error("verifying key missing or malformed for circuit: {0}")]
    VerifierKeyMissing(String),

    #[error("recomputed root did not match the event's new root")]
    RecomputedRootMismatch,

    #[error("event index did not match the store's next_index")]
    NextIndexMismatch,

    #[error("event's old root did not match the store's current root")]
    OldRootMismatch,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    fn kind(&self) -> &'static str {
        match self {
            RelayerError::InvalidInput(_) => "invalid_input",
            RelayerError::CommitmentNotFound => "commitment_not_found",
            RelayerError::InvalidProof => "invalid_proof",
            RelayerError::PayloadBindingMismatch(_) => "payload_binding_mismatch",
            RelayerError::DepositAlreadyUsed { .. } => "deposit_already_used",
            RelayerError::NullifierAlreadyUsed { .. } => "nullifier_already_used",
            RelayerError::InvalidProofBytesLength { .. } => "invalid_proof_bytes_length",
            RelayerError::InvalidPublicInputsLength(_) => "invalid_public_inputs_length",
            RelayerError::UnknownMerkleRoot => "unknown_merkle_root",
            RelayerError::StoreUnavailable(_) => "store_unavailable",
            RelayerError::ChainUnavailable(_) => "chain_unavailable",
            RelayerError::VerifierKeyMissing(_) => "verifier_key_missing",
            RelayerError::RecomputedRootMismatch => "recomputed_root_mismatch",
            RelayerError::NextIndexMismatch => "next_index_mismatch",
            RelayerError::OldRootMismatch => "old_root_mismatch",
            RelayerError::Core(_) => "invalid_input",
            RelayerError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RelayerError::InvalidInput(_)
            | RelayerError::InvalidProof
            | RelayerError::PayloadBindingMismatch(_)
            | RelayerError::InvalidProofBytesLength { .. }
            | RelayerError::InvalidPublicInputsLength(_)
            | RelayerError::UnknownMerkleRoot
            | RelayerError::Core(_) => StatusCode::BAD_REQUEST,
            RelayerError::CommitmentNotFound => StatusCode::NOT_FOUND,
            RelayerError::DepositAlreadyUsed { .. } | RelayerError::NullifierAlreadyUsed { .. } => {
                StatusCode::CONFLICT
            }
            RelayerError::StoreUnavailable(_)
            | RelayerError::ChainUnavailable(_)
            | RelayerError::VerifierKeyMissing(_)
            | RelayerError::RecomputedRootMismatch
            | RelayerError::NextIndexMismatch
            | RelayerError::OldRootMismatch
            | RelayerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind().to_string();
        tracing::warn!(error = %self, kind = %kind, "request failed");

        let body = ApiErrorBody {
            error: kind,
            message: self.to_string(),
            field: None,
        };

        (status, Json(body)).into_response()
    }
}
