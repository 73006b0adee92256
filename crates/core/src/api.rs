/// Request/response bodies shared between the relayer's HTTP surface and its
/// callers. Field elements cross this boundary as big-endian hex except
/// where noted; decimal-string commitments mirror the on-chain program's own
/// wire convention for scalar inputs.
use serde::{Deserialize, Serialize};

use crate::wire::Groth16Proof;

#[derive(Debug, Serialize, Deserialize)]
pub struct PrepareDepositRequest {
    pub commitment: String,
}

#[derive(Debug, Serialize)]
pub struct PrepareDepositResponse {
    pub merkle_root: String,
    pub next_leaf_index: u64,
    pub in_path_elements: Vec<String>,
    pub in_path_indices: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrepareTransferRequest {
    pub in_commitment: String,
}

#[derive(Debug, Serialize)]
pub struct PrepareTransferResponse {
    pub merkle_root: String,
    pub in_path_elements: Vec<String>,
    pub in_path_indices: Vec<u8>,
    pub leaf_index: u64,
    pub next_leaf_index: u64,
    pub out1_path_elements: Vec<String>,
    pub out2_path_elements: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrepareWithdrawRequest {
    pub spend_commitment: String,
}

#[derive(Debug, Serialize)]
pub struct PrepareWithdrawResponse {
    pub merkle_root: String,
    pub path_elements: Vec<String>,
    pub path_indices: Vec<u8>,
    pub leaf_index: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitDepositRequest {
    pub amount: u64,
    pub token_mint: String,
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
    pub deposit_hash: String,
    pub commitment: String,
    pub memo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransferRequest {
    pub token_mint: String,
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
    pub out1_commitment: String,
    pub out2_commitment: String,
    pub nullifier: String,
    pub old_merkle_root: String,
    pub new_merkle_root_1: String,
    pub new_merkle_root_2: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitWithdrawRequest {
    pub token_mint: String,
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
    pub nullifier: String,
    pub old_merkle_root: String,
    pub recipient_owner: String,
    pub recipient_token_account: String,
    pub amount: u64,
    pub token_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_deposit_request_deserializes() {
        let body = r#"{"commitment":"12345"}"#;
        let req: PrepareDepositRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.commitment, "12345");
    }

    #[test]
    fn submit_withdraw_request_round_trips_through_json() {
        let req = SubmitWithdrawRequest {
            token_mint: "So11111111111111111111111111111111111111112".to_string(),
            proof: Groth16Proof {
                a: [0u8; 64],
                b: [0u8; 128],
                c: [0u8; 64],
            },
            public_signals: vec!["1".to_string(), "2".to_string()],
            nullifier: "abcd".to_string(),
            old_merkle_root: "ef01".to_string(),
            recipient_owner: "owner".to_string(),
            recipient_token_account: "ata".to_string(),
            amount: 1000,
            token_id: "0".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: SubmitWithdrawRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount, 1000);
        assert_eq!(back.nullifier, "abcd");
    }

    #[test]
    fn error_body_omits_absent_field() {
        let body = ApiErrorBody {
            error: "invalid_input".to_string(),
            message: "bad".to_string(),
            field: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("field"));
    }
}
