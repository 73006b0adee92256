//! One state machine per request, per §4.7/§4.9: validate, prepare, bind,
//! verify, check replay, submit, record. The orchestrator never advances
//! the tree itself — that is the event watcher's job once the chain
//! confirms the transaction; the orchestrator only records the outcome.
use shielded_relayer_core::circuit::CircuitKind;
use shielded_relayer_core::fe::FeBe;
use shielded_relayer_core::api::{
    SubmitDepositRequest, SubmitResponse, SubmitTransferRequest, SubmitWithdrawRequest,
};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::{RelayerError, Result};
use crate::registry::Registry;
use crate::store::{self, MerkleStore};
use crate::txmanager::{self, TransactionManager};
use crate::verifier::VerifierRegistry;

pub struct Orchestrator {
    pub store: MerkleStore,
    pub verifier: VerifierRegistry,
    pub registry: Registry,
    pub txmanager: TransactionManager,
}

impl Orchestrator {
    pub async fn submit_deposit(&self, req: SubmitDepositRequest) -> Result<SubmitResponse> {
        let deposit_hash_hex = normalize_hex(&req.deposit_hash)?;

        if let Some(sig) = self.registry.deposit_signature(&deposit_hash_hex).await? {
            return Err(RelayerError::DepositAlreadyUsed { signature: sig });
        }

        let public_signals = parse_public_signals(&req.public_signals)?;
        let commitment_fe = parse_fe(&req.commitment)?;

        // Independently obtain the current root/next-index and the sibling
        // path the append would use, per §4.7 step 2 — the proof's claimed
        // old root, next leaf index, and resulting new root are checked
        // against these reads, not against themselves.
        let (current_root, next_index) = self.store.root_and_next_index().await?;
        let (siblings, _) = self.store.path_by_index(next_index).await?;
        let expected_new_root = store::recompute_root(next_index, commitment_fe, &siblings)?;

        let resolved = vec![
            commitment_fe,
            // owner_cp_pk has no independent source on this request; the
            // relayer trusts the proof's own declaration for it.
            public_signals[1],
            expected_new_root,
            fe_from_u64(next_index),
            fe_from_u64(req.amount),
            parse_fe(&deposit_hash_hex)?,
            current_root,
        ];
        bind(CircuitKind::Deposit, &public_signals, &resolved)?;

        let outcome = self.verifier.verify(CircuitKind::Deposit, &req.proof, &public_signals)?;
        if !outcome.valid {
            return Err(RelayerError::InvalidProof);
        }

        let new_root = fe_to_hex(public_signals[2]);
        let old_root = fe_to_hex(public_signals[6]);
        self.check_root_is_recent(&old_root).await?;

        if !self.registry.reserve_deposit(&deposit_hash_hex, &req.token_mint).await? {
            let signature = self.registry.await_deposit_signature(&deposit_hash_hex).await?;
            return Err(RelayerError::DepositAlreadyUsed { signature });
        }

        let mint = parse_pubkey(&req.token_mint)?;
        let memo = format!("deposit:{deposit_hash_hex}");
        let ix = self.deposit_instruction(&req, &deposit_hash_hex)?;
        let signature = self.txmanager.submit(&memo, ix, &mint).await?;

        self.registry
            .record_deposit_signature(&deposit_hash_hex, &signature.to_string())
            .await?;
        tracing::info!(deposit_hash = %deposit_hash_hex, new_root, %signature, "deposit submitted");
        Ok(SubmitResponse {
            signature: signature.to_string(),
        })
    }

    pub async fn submit_transfer(&self, req: SubmitTransferRequest) -> Result<SubmitResponse> {
        let nullifier_hex = normalize_hex(&req.nullifier)?;

        if let Some(sig) = self.registry.nullifier_signature(&nullifier_hex).await? {
            return Err(RelayerError::NullifierAlreadyUsed { signature: sig });
        }

        let public_signals = parse_public_signals(&req.public_signals)?;
        let resolved = vec![
            parse_fe(&req.out1_commitment)?,
            parse_fe(&req.out2_commitment)?,
            parse_fe(&nullifier_hex)?,
            parse_fe(&req.old_merkle_root)?,
            parse_fe(&req.new_merkle_root_1)?,
            parse_fe(&req.new_merkle_root_2)?,
            public_signals[6],
            public_signals[7],
            public_signals[8],
        ];
        bind(CircuitKind::Transfer, &public_signals, &resolved)?;

        let outcome = self.verifier.verify(CircuitKind::Transfer, &req.proof, &public_signals)?;
        if !outcome.valid {
            return Err(RelayerError::InvalidProof);
        }

        self.check_root_is_recent(&req.old_merkle_root).await?;
        if !self.registry.reserve_nullifier(&nullifier_hex, &req.token_mint).await? {
            let signature = self.registry.await_nullifier_signature(&nullifier_hex).await?;
            return Err(RelayerError::NullifierAlreadyUsed { signature });
        }

        let mint = parse_pubkey(&req.token_mint)?;
        let memo = format!("transfer:{nullifier_hex}");
        let ix = self.transfer_instruction(&req, &nullifier_hex)?;
        let signature = self.txmanager.submit(&memo, ix, &mint).await?;

        self.registry
            .record_nullifier_signature(&nullifier_hex, &signature.to_string())
            .await?;
        Ok(SubmitResponse {
            signature: signature.to_string(),
        })
    }

    pub async fn submit_withdraw(&self, req: SubmitWithdrawRequest) -> Result<SubmitResponse> {
        let nullifier_hex = normalize_hex(&req.nullifier)?;

        if let Some(sig) = self.registry.nullifier_signature(&nullifier_hex).await? {
            return Err(RelayerError::NullifierAlreadyUsed { signature: sig });
        }

        let public_signals = parse_public_signals(&req.public_signals)?;
        let resolved = vec![
            parse_fe(&nullifier_hex)?,
            parse_fe(&req.old_merkle_root)?,
            parse_pubkey_as_fe(&req.recipient_owner)?,
            fe_from_u64(req.amount),
            parse_fe(&req.token_id)?,
        ];
        bind(CircuitKind::Withdraw, &public_signals, &resolved)?;

        let outcome = self.verifier.verify(CircuitKind::Withdraw, &req.proof, &public_signals)?;
        if !outcome.valid {
            return Err(RelayerError::InvalidProof);
        }

        self.check_root_is_recent(&req.old_merkle_root).await?;
        if !self.registry.reserve_nullifier(&nullifier_hex, &req.token_mint).await? {
            let signature = self.registry.await_nullifier_signature(&nullifier_hex).await?;
            return Err(RelayerError::NullifierAlreadyUsed { signature });
        }

        let mint = parse_pubkey(&req.token_mint)?;
        let memo = format!("withdraw:{nullifier_hex}");
        let ix = self.withdraw_instruction(&req, &nullifier_hex)?;
        let signature = self.txmanager.submit(&memo, ix, &mint).await?;

        self.registry
            .record_nullifier_signature(&nullifier_hex, &signature.to_string())
            .await?;
        Ok(SubmitResponse {
            signature: signature.to_string(),
        })
    }

    async fn check_root_is_recent(&self, root_hex: &str) -> Result<()> {
        let root_fe = parse_fe(root_hex)?;
        let recent = self.store.recent_roots().await?;
        if recent.contains(&root_fe) {
            Ok(())
        } else {
            Err(RelayerError::UnknownMerkleRoot)
        }
    }

    fn deposit_instruction(&self, req: &SubmitDepositRequest, deposit_hash_hex: &str) -> Result<Instruction> {
        let program_id = self.txmanager.program_id();
        let deposit_hash_bytes = FeBe::from_hex(deposit_hash_hex)?.0;
        let (tree, _) = txmanager::tree_pda(&program_id);
        let (vault, _) = txmanager::vault_pda(&program_id);
        let (marker, _) = txmanager::deposit_marker_pda(&program_id, &deposit_hash_bytes);
        let mint = parse_pubkey(&req.token_mint)?;

        let mut data = txmanager::anchor_discriminator("deposit").to_vec();
        data.extend_from_slice(&req.amount.to_le_bytes());
        data.extend_from_slice(&req.proof.to_bytes());

        Ok(Instruction::new_with_bytes(
            program_id,
            &data,
            vec![
                AccountMeta::new(tree, false),
                AccountMeta::new(vault, false),
                AccountMeta::new(marker, false),
                AccountMeta::new_readonly(mint, false),
            ],
        ))
    }

    fn transfer_instruction(&self, req: &SubmitTransferRequest, nullifier_hex: &str) -> Result<Instruction> {
        let program_id = self.txmanager.program_id();
        let nullifier_bytes = FeBe::from_hex(nullifier_hex)?.0;
        let (tree, _) = txmanager::tree_pda(&program_id);
        let (record, _) = txmanager::nullifier_record_pda(&program_id, &nullifier_bytes);

        let mut data = txmanager::anchor_discriminator("transfer").to_vec();
        data.extend_from_slice(&req.proof.to_bytes());

        Ok(Instruction::new_with_bytes(
            program_id,
            &data,
            vec![
                AccountMeta::new(tree, false),
                AccountMeta::new(record, false),
            ],
        ))
    }

    fn withdraw_instruction(&self, req: &SubmitWithdrawRequest, nullifier_hex: &str) -> Result<Instruction> {
        let program_id = self.txmanager.program_id();
        let nullifier_bytes = FeBe::from_hex(nullifier_hex)?.0;
        let (tree, _) = txmanager::tree_pda(&program_id);
        let (vault, _) = txmanager::vault_pda(&program_id);
        let (record, _) = txmanager::nullifier_record_pda(&program_id, &nullifier_bytes);
        let recipient = parse_pubkey(&req.recipient_token_account)?;

        let mut data = txmanager::anchor_discriminator("withdraw").to_vec();
        data.extend_from_slice(&req.amount.to_le_bytes());
        data.extend_from_slice(&req.proof.to_bytes());

        Ok(Instruction::new_with_bytes(
            program_id,
            &data,
            vec![
                AccountMeta::new(tree, false),
                AccountMeta::new(vault, false),
                AccountMeta::new(record, false),
                AccountMeta::new(recipient, false),
            ],
        ))
    }
}

fn normalize_hex(s: &str) -> Result<String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RelayerError::InvalidInput(format!(
            "expected 32-byte hex, got {s}"
        )));
    }
    Ok(s.to_lowercase())
}

fn parse_pubkey(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|_| RelayerError::InvalidInput(format!("malformed pubkey: {s}")))
}

fn parse_fe(hex_str: &str) -> Result<shielded_relayer_core::fe::Fr> {
    let normalized = normalize_hex(hex_str)?;
    Ok(FeBe::from_hex(&normalized)?.to_fr()?)
}

fn parse_pubkey_as_fe(pubkey_str: &str) -> Result<shielded_relayer_core::fe::Fr> {
    let pk = Pubkey::from_str(pubkey_str)
        .map_err(|_| RelayerError::InvalidInput("malformed pubkey".to_string()))?;
    Ok(FeBe::from_slice(pk.as_ref())?.to_fr()?)
}

fn fe_from_u64(v: u64) -> shielded_relayer_core::fe::Fr {
    shielded_relayer_core::fe::Fr::from(v)
}

fn fe_to_hex(fe: shielded_relayer_core::fe::Fr) -> String {
    FeBe::from_fr(&fe).to_hex()
}

fn parse_public_signals(signals: &[String]) -> Result<Vec<shielded_relayer_core::fe::Fr>> {
    signals.iter().map(|s| parse_fe(s)).collect()
}

fn bind(
    circuit: CircuitKind,
    declared: &[shielded_relayer_core::fe::Fr],
    resolved: &[shielded_relayer_core::fe::Fr],
) -> Result<()> {
    if declared.len() != circuit.public_signal_count() || declared.len() != resolved.len() {
        return Err(RelayerError::PayloadBindingMismatch(format!(
            "{circuit:?} expects {} public signals",
            circuit.public_signal_count()
        )));
    }
    for (i, (d, r)) in declared.iter().zip(resolved.iter()).enumerate() {
        if d != r {
            let name = circuit.signal_names()[i];
            return Err(RelayerError::PayloadBindingMismatch(format!(
                "signal `{name}` does not match the relayer-resolved value"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shielded_relayer_core::fe::Fr;

    #[test]
    fn normalize_hex_rejects_wrong_length() {
        assert!(normalize_hex("abcd").is_err());
    }

    #[test]
    fn normalize_hex_strips_0x_prefix() {
        let hex64 = "0".repeat(64);
        assert_eq!(normalize_hex(&format!("0x{hex64}")).unwrap(), hex64);
    }

    #[test]
    fn bind_detects_mismatched_signal() {
        let declared = vec![Fr::from(1u64); 7];
        let mut resolved = declared.clone();
        resolved[3] = Fr::from(999u64);
        let err = bind(CircuitKind::Deposit, &declared, &resolved).unwrap_err();
        assert!(matches!(err, RelayerError::PayloadBindingMismatch(_)));
    }

    #[test]
    fn bind_accepts_matching_signals() {
        let declared = vec![Fr::from(1u64); 7];
        let resolved = declared.clone();
        assert!(bind(CircuitKind::Deposit, &declared, &resolved).is_ok());
    }
}
