//! Off-chain mirrors of the nullifier and deposit-marker tables: the
//! orchestrator's first line of defense against replay, backed by the same
//! store the event watcher writes to authoritatively.
use std::time::Duration;

use sqlx::PgPool;

use crate::error::{RelayerError, Result};

/// How long a loser of the reservation race waits for the winner to finish
/// and publish a signature, before giving up.
const RESERVATION_WAIT_TIMEOUT: Duration = Duration::from_secs(20);
const RESERVATION_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct Registry {
    pool: PgPool,
}

impl Registry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn deposit_signature(&self, deposit_hash_hex: &str) -> Result<Option<String>> {
        let row: Option<(bool, Option<String>)> = sqlx::query_as(
            "SELECT processed, signature FROM deposit_markers WHERE deposit_hash_be_hex = $1",
        )
        .bind(deposit_hash_hex)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(processed, sig)| if processed { sig } else { None }))
    }

    pub async fn nullifier_signature(&self, nullifier_hex: &str) -> Result<Option<String>> {
        let row: Option<(bool, Option<String>)> =
            sqlx::query_as("SELECT used, signature FROM nullifiers WHERE nullifier_be_hex = $1")
                .bind(nullifier_hex)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(used, sig)| if used { sig } else { None }))
    }

    /// Records that a deposit hash has a submission in flight, before the
    /// transaction is sent, so a concurrent duplicate request observes it.
    /// Returns `true` if this call won the reservation race, `false` if
    /// another request already holds it.
    pub async fn reserve_deposit(&self, deposit_hash_hex: &str, mint: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO deposit_markers (deposit_hash_be_hex, processed, mint) VALUES ($1, FALSE, $2)
             ON CONFLICT (deposit_hash_be_hex) DO NOTHING",
        )
        .bind(deposit_hash_hex)
        .bind(mint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Same contract as [`reserve_deposit`](Self::reserve_deposit), for
    /// nullifiers.
    pub async fn reserve_nullifier(&self, nullifier_hex: &str, mint: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO nullifiers (nullifier_be_hex, used, mint) VALUES ($1, FALSE, $2)
             ON CONFLICT (nullifier_be_hex) DO NOTHING",
        )
        .bind(nullifier_hex)
        .bind(mint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Called by the loser of a `reserve_deposit` race: blocks until the
    /// winner's transaction lands and its signature is recorded, per
    /// the "exactly one returns a signature; the other returns
    /// `DepositAlreadyUsed` with the same signature" contract.
    pub async fn await_deposit_signature(&self, deposit_hash_hex: &str) -> Result<String> {
        let deadline = tokio::time::Instant::now() + RESERVATION_WAIT_TIMEOUT;
        loop {
            let signature: Option<String> = sqlx::query_scalar(
                "SELECT signature FROM deposit_markers WHERE deposit_hash_be_hex = $1",
            )
            .bind(deposit_hash_hex)
            .fetch_optional(&self.pool)
            .await?
            .flatten();
            if let Some(sig) = signature {
                return Ok(sig);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RelayerError::Internal(format!(
                    "timed out waiting for concurrent deposit {deposit_hash_hex} to resolve"
                )));
            }
            tokio::time::sleep(RESERVATION_POLL_INTERVAL).await;
        }
    }

    /// Same contract as [`await_deposit_signature`](Self::await_deposit_signature),
    /// for nullifiers.
    pub async fn await_nullifier_signature(&self, nullifier_hex: &str) -> Result<String> {
        let deadline = tokio::time::Instant::now() + RESERVATION_WAIT_TIMEOUT;
        loop {
            let signature: Option<String> = sqlx::query_scalar(
                "SELECT signature FROM nullifiers WHERE nullifier_be_hex = $1",
            )
            .bind(nullifier_hex)
            .fetch_optional(&self.pool)
            .await?
            .flatten();
            if let Some(sig) = signature {
                return Ok(sig);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RelayerError::Internal(format!(
                    "timed out waiting for concurrent nullifier {nullifier_hex} to resolve"
                )));
            }
            tokio::time::sleep(RESERVATION_POLL_INTERVAL).await;
        }
    }

    pub async fn record_deposit_signature(&self, deposit_hash_hex: &str, signature: &str) -> Result<()> {
        sqlx::query(
            "UPDATE deposit_markers SET signature = $2 WHERE deposit_hash_be_hex = $1",
        )
        .bind(deposit_hash_hex)
        .bind(signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_nullifier_signature(&self, nullifier_hex: &str, signature: &str) -> Result<()> {
        sqlx::query("UPDATE nullifiers SET signature = $2 WHERE nullifier_be_hex = $1")
            .bind(nullifier_hex)
            .bind(signature)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Called by the event watcher once a deposit is confirmed on-chain:
    /// the authoritative state transition, as opposed to `reserve_deposit`'s
    /// advisory in-flight marker.
    pub async fn mark_deposit_processed(&self, deposit_hash_hex: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO deposit_markers (deposit_hash_be_hex, processed) VALUES ($1, TRUE)
             ON CONFLICT (deposit_hash_be_hex) DO UPDATE SET processed = TRUE",
        )
        .bind(deposit_hash_hex)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_nullifier_used(&self, nullifier_hex: &str, signature: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO nullifiers (nullifier_be_hex, used, signature) VALUES ($1, TRUE, $2)
             ON CONFLICT (nullifier_be_hex) DO UPDATE SET used = TRUE,
                 signature = COALESCE(EXCLUDED.signature, nullifiers.signature)",
        )
        .bind(nullifier_hex)
        .bind(signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test]
    async fn reserve_then_mark_then_lookup_returns_signature(pool: PgPool) {
        let registry = Registry::new(pool);
        assert!(registry.reserve_deposit("ab12", "mint1").await.unwrap());
        assert_eq!(registry.deposit_signature("ab12").await.unwrap(), None);

        registry.mark_deposit_processed("ab12").await.unwrap();
        registry
            .record_deposit_signature("ab12", "sig123")
            .await
            .unwrap();
        assert_eq!(
            registry.deposit_signature("ab12").await.unwrap(),
            Some("sig123".to_string())
        );
    }

    #[sqlx::test]
    async fn unused_nullifier_has_no_signature(pool: PgPool) {
        let registry = Registry::new(pool);
        assert_eq!(registry.nullifier_signature("cd34").await.unwrap(), None);
    }

    #[sqlx::test]
    async fn second_reservation_loses_the_race(pool: PgPool) {
        let registry = Registry::new(pool);
        assert!(registry.reserve_deposit("ab12", "mint1").await.unwrap());
        assert!(!registry.reserve_deposit("ab12", "mint1").await.unwrap());
    }

    #[sqlx::test]
    async fn loser_awaits_winners_signature(pool: PgPool) {
        let registry = Registry::new(pool);
        assert!(registry.reserve_nullifier("cd34", "mint1").await.unwrap());
        assert!(!registry.reserve_nullifier("cd34", "mint1").await.unwrap());

        registry
            .record_nullifier_signature("cd34", "sig999")
            .await
            .unwrap();

        let signature = registry.await_nullifier_signature("cd34").await.unwrap();
        assert_eq!(signature, "sig999");
    }
}
