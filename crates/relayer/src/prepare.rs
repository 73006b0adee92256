//! Read-only prepare endpoints. Per §4.8, every response must be served
//! from a single consistent snapshot; we never interleave reads across two
//! different commits of the store.
use shielded_relayer_core::api::{
    PrepareDepositResponse, PrepareTransferResponse, PrepareWithdrawResponse,
};
use shielded_relayer_core::fe::{FeBe, FeLe, Fr};

use crate::error::{RelayerError, Result};
use crate::store::MerkleStore;

fn parse_decimal(s: &str) -> Result<Fr> {
    use std::str::FromStr;
    Fr::from_str(s).map_err(|_| RelayerError::InvalidInput(format!("`{s}` is not a decimal field element")))
}

fn root_le_hex(root: Fr) -> String {
    hex::encode(FeLe::from_fr(&root).0)
}

pub async fn prepare_deposit(store: &MerkleStore, commitment_decimal: &str) -> Result<PrepareDepositResponse> {
    let _ = parse_decimal(commitment_decimal)?;
    let mut tx = store.snapshot().await?;
    let (root, next_index) = store.root_and_next_index_in(&mut tx).await?;
    let (siblings, bits) = store.path_by_index_in(&mut tx, next_index).await?;
    Ok(PrepareDepositResponse {
        merkle_root: root_le_hex(root),
        next_leaf_index: next_index,
        in_path_elements: siblings.iter().map(|s| FeBe::from_fr(s).to_hex()).collect(),
        in_path_indices: bits,
    })
}

pub async fn prepare_transfer(store: &MerkleStore, in_commitment_decimal: &str) -> Result<PrepareTransferResponse> {
    let commitment = parse_decimal(in_commitment_decimal)?;
    let mut tx = store.snapshot().await?;
    let (in_siblings, in_bits, leaf_index) = store.path_by_commitment_in(&mut tx, commitment).await?;
    let (root, next_index) = store.root_and_next_index_in(&mut tx).await?;
    let (out1_siblings, _) = store.path_by_index_in(&mut tx, next_index).await?;
    let (out2_siblings, _) = store.path_by_index_in(&mut tx, next_index + 1).await?;

    Ok(PrepareTransferResponse {
        merkle_root: root_le_hex(root),
        in_path_elements: in_siblings.iter().map(|s| FeBe::from_fr(s).to_hex()).collect(),
        in_path_indices: in_bits,
        leaf_index,
        next_leaf_index: next_index,
        out1_path_elements: out1_siblings.iter().map(|s| FeBe::from_fr(s).to_hex()).collect(),
        out2_path_elements: out2_siblings.iter().map(|s| FeBe::from_fr(s).to_hex()).collect(),
    })
}

pub async fn prepare_withdraw(store: &MerkleStore, spend_commitment_decimal: &str) -> Result<PrepareWithdrawResponse> {
    let commitment = parse_decimal(spend_commitment_decimal)?;
    let mut tx = store.snapshot().await?;
    let (siblings, bits, leaf_index) = store.path_by_commitment_in(&mut tx, commitment).await?;
    let (root, _) = store.root_and_next_index_in(&mut tx).await?;
    Ok(PrepareWithdrawResponse {
        merkle_root: root_le_hex(root),
        path_elements: siblings.iter().map(|s| FeBe::from_fr(s).to_hex()).collect(),
        path_indices: bits,
        leaf_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shielded_relayer_core::fe::FeLe;
    use sqlx::PgPool;

    const DEPTH: u8 = 4;

    #[sqlx::test]
    async fn prepare_deposit_matches_store_for_next_index(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let resp = prepare_deposit(&store, "12345").await.unwrap();

        let (root, next_index) = store.root_and_next_index().await.unwrap();
        assert_eq!(resp.next_leaf_index, next_index);
        assert_eq!(resp.merkle_root, hex::encode(FeLe::from_fr(&root).0));
        assert_eq!(resp.in_path_elements.len(), DEPTH as usize);
    }

    #[sqlx::test]
    async fn prepare_withdraw_rejects_unknown_commitment(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let result = prepare_withdraw(&store, "999").await;
        assert!(matches!(result, Err(RelayerError::CommitmentNotFound)));
    }
}
