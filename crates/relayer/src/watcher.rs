//! Watches the program's on-chain logs for the three completion events and
//! advances the canonical Merkle store. The store's own invariants make
//! replay idempotent: an already-applied deposit surfaces as
//! `NextIndexMismatch`, which is benign here as long as the leaf and root it
//! names already match the store.
use std::str::FromStr;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use shielded_relayer_core::fe::FeBe;
use solana_client::{
    nonblocking::{pubsub_client::PubsubClient, rpc_client::RpcClient},
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter},
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::UiTransactionEncoding;

use crate::error::Result;
use crate::registry::Registry;
use crate::store::MerkleStore;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, PartialEq)]
pub enum WatcherEvent {
    DepositCompleted {
        deposit_hash: String,
        commitment: String,
        old_root: String,
        new_root: String,
        next_leaf_index: u64,
    },
    TransferCompleted {
        nullifier: String,
        out1: String,
        out2: String,
        root_before: String,
        new_root_1: String,
        new_root_2: String,
        next_leaf_index: u64,
    },
    WithdrawCompleted {
        nullifier: String,
        root_used: String,
        amount: u64,
    },
}

/// Parses a single program log line such as
/// `Program log: DepositCompleted: deposit_hash=<hex> commitment=<hex> old_root=<hex> new_root=<hex> next_leaf_index=<u64>`.
pub fn parse_log_line(line: &str) -> Option<WatcherEvent> {
    let rest = line.strip_prefix("Program log: ")?;
    let (tag, fields) = rest.split_once(':')?;
    let pairs = parse_kv_pairs(fields.trim());

    match tag {
        "DepositCompleted" => Some(WatcherEvent::DepositCompleted {
            deposit_hash: pairs.get("deposit_hash")?.clone(),
            commitment: pairs.get("commitment")?.clone(),
            old_root: pairs.get("old_root")?.clone(),
            new_root: pairs.get("new_root")?.clone(),
            next_leaf_index: pairs.get("next_leaf_index")?.parse().ok()?,
        }),
        "TransferCompleted" => Some(WatcherEvent::TransferCompleted {
            nullifier: pairs.get("nullifier")?.clone(),
            out1: pairs.get("out1")?.clone(),
            out2: pairs.get("out2")?.clone(),
            root_before: pairs.get("root_before")?.clone(),
            new_root_1: pairs.get("new_root_1")?.clone(),
            new_root_2: pairs.get("new_root_2")?.clone(),
            next_leaf_index: pairs.get("next_leaf_index")?.parse().ok()?,
        }),
        "WithdrawCompleted" => Some(WatcherEvent::WithdrawCompleted {
            nullifier: pairs.get("nullifier")?.clone(),
            root_used: pairs.get("root_used")?.clone(),
            amount: pairs.get("amount")?.parse().ok()?,
        }),
        _ => None,
    }
}

fn parse_kv_pairs(fields: &str) -> std::collections::HashMap<String, String> {
    fields
        .split(',')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub struct EventWatcher {
    ws_url: String,
    rpc_url: String,
    program_id: Pubkey,
    store: MerkleStore,
    registry: Registry,
}

impl EventWatcher {
    pub fn new(ws_url: String, rpc_url: String, program_id: Pubkey, store: MerkleStore, registry: Registry) -> Self {
        Self {
            ws_url,
            rpc_url,
            program_id,
            store,
            registry,
        }
    }

    /// Runs forever: backfill, subscribe, process, reconnect with
    /// exponential backoff and full jitter on disconnect.
    pub async fn run(&self) {
        if let Err(e) = self.backfill().await {
            tracing::error!(error = %e, "initial backfill failed");
        }

        let mut attempt: u32 = 0;
        loop {
            match self.subscribe_and_process().await {
                Ok(()) => {
                    tracing::warn!("log subscription ended, resubscribing");
                    attempt = 0;
                }
                Err(e) => {
                    attempt += 1;
                    let backoff = backoff_with_jitter(attempt);
                    tracing::error!(error = %e, attempt, backoff_ms = backoff.as_millis() as u64, "subscription failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn subscribe_and_process(&self) -> anyhow::Result<()> {
        let client = PubsubClient::new(&self.ws_url).await?;
        let (mut stream, _unsubscribe) = client
            .logs_subscribe(
                RpcTransactionLogsFilter::Mentions(vec![self.program_id.to_string()]),
                RpcTransactionLogsConfig {
                    commitment: Some(CommitmentConfig::confirmed()),
                },
            )
            .await?;

        while let Some(response) = stream.next().await {
            for line in &response.value.logs {
                if let Some(event) = parse_log_line(line) {
                    if let Err(e) = self.apply_event(event).await {
                        tracing::error!(error = %e, signature = %response.value.signature, "failed to apply event");
                    }
                }
            }
        }
        Ok(())
    }

    /// Enumerates the program's recent signatures and replays any events the
    /// store hasn't seen yet, oldest first.
    async fn backfill(&self) -> anyhow::Result<()> {
        let rpc = RpcClient::new(self.rpc_url.clone());
        let mut signatures = rpc
            .get_signatures_for_address_with_config(
                &self.program_id,
                GetConfirmedSignaturesForAddress2Config {
                    before: None,
                    until: None,
                    limit: None,
                    commitment: Some(CommitmentConfig::confirmed()),
                },
            )
            .await?;
        signatures.reverse();

        for sig_info in signatures {
            if sig_info.err.is_some() {
                continue;
            }
            let signature = Signature::from_str(&sig_info.signature)?;
            let tx = rpc
                .get_transaction(&signature, UiTransactionEncoding::Json)
                .await?;
            let Some(meta) = tx.transaction.meta else {
                continue;
            };
            let logs: Vec<String> = match meta.log_messages {
                solana_transaction_status::option_serializer::OptionSerializer::Some(l) => l,
                _ => continue,
            };
            for line in &logs {
                if let Some(event) = parse_log_line(line) {
                    if let Err(e) = self.apply_event(event).await {
                        tracing::debug!(error = %e, signature = %sig_info.signature, "backfill replay is a no-op or failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply_event(&self, event: WatcherEvent) -> Result<()> {
        match event {
            WatcherEvent::DepositCompleted {
                deposit_hash,
                commitment,
                old_root,
                new_root,
                next_leaf_index,
            } => {
                let commitment_fe = FeBe::from_hex(&commitment)?.to_fr()?;
                let old_root_fe = FeBe::from_hex(&old_root)?.to_fr()?;
                let new_root_fe = FeBe::from_hex(&new_root)?.to_fr()?;
                match self
                    .store
                    .apply_deposit_from_event(next_leaf_index, commitment_fe, old_root_fe, new_root_fe)
                    .await
                {
                    Ok(()) => {}
                    Err(crate::error::RelayerError::NextIndexMismatch) => {
                        tracing::debug!(deposit_hash, "deposit already applied, treating as replay");
                    }
                    Err(e) => return Err(e),
                }
                self.registry.mark_deposit_processed(&deposit_hash).await?;
            }
            WatcherEvent::TransferCompleted {
                nullifier,
                out1,
                out2,
                root_before,
                new_root_1,
                new_root_2,
                next_leaf_index,
            } => {
                let out1_fe = FeBe::from_hex(&out1)?.to_fr()?;
                let out2_fe = FeBe::from_hex(&out2)?.to_fr()?;
                let root_before_fe = FeBe::from_hex(&root_before)?.to_fr()?;
                let new_root_1_fe = FeBe::from_hex(&new_root_1)?.to_fr()?;
                let new_root_2_fe = FeBe::from_hex(&new_root_2)?.to_fr()?;
                match self
                    .store
                    .apply_transfer_from_event(
                        next_leaf_index,
                        out1_fe,
                        out2_fe,
                        root_before_fe,
                        new_root_1_fe,
                        new_root_2_fe,
                    )
                    .await
                {
                    Ok(()) => {}
                    Err(crate::error::RelayerError::NextIndexMismatch) => {
                        tracing::debug!(nullifier, "transfer already applied, treating as replay");
                    }
                    Err(e) => return Err(e),
                }
                self.registry.mark_nullifier_used(&nullifier, None).await?;
            }
            WatcherEvent::WithdrawCompleted { nullifier, .. } => {
                self.registry.mark_nullifier_used(&nullifier, None).await?;
            }
        }
        Ok(())
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(7));
    let capped = exp.min(BACKOFF_CAP);
    let jittered_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
    Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deposit_completed_log() {
        let line = "Program log: DepositCompleted: deposit_hash=ab, commitment=cd, old_root=ef, new_root=01, next_leaf_index=3";
        let event = parse_log_line(line).unwrap();
        assert_eq!(
            event,
            WatcherEvent::DepositCompleted {
                deposit_hash: "ab".to_string(),
                commitment: "cd".to_string(),
                old_root: "ef".to_string(),
                new_root: "01".to_string(),
                next_leaf_index: 3,
            }
        );
    }

    #[test]
    fn ignores_unrelated_log_lines() {
        assert!(parse_log_line("Program log: Instruction: Deposit").is_none());
        assert!(parse_log_line("Program invoke [1]").is_none());
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        for attempt in 0..20 {
            assert!(backoff_with_jitter(attempt) <= BACKOFF_CAP);
        }
    }
}
