//! Host-side Groth16/BN254 verification. Verifying keys are immutable blobs
//! loaded once at startup and shared by reference; a missing or malformed
//! key is fatal to process startup, never a per-request failure.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ark_bn254::{Bn254, Fr as ArkFr, G1Affine, G2Affine};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use ark_snark::SNARK;
use shielded_relayer_core::{CircuitKind, Groth16Proof};

use crate::error::{RelayerError, Result};

pub struct VerifyOutcome {
    pub valid: bool,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct VerifierRegistry {
    keys: Arc<HashMap<CircuitKind, PreparedVerifyingKey<Bn254>>>,
}

const ALL_CIRCUITS: [CircuitKind; 9] = [
    CircuitKind::Deposit,
    CircuitKind::Transfer,
    CircuitKind::Withdraw,
    CircuitKind::Merkle,
    CircuitKind::Nullifier,
    CircuitKind::ZkStream,
    CircuitKind::ZkSplit,
    CircuitKind::ZkCondition,
    CircuitKind::Audit,
];

impl VerifierRegistry {
    /// Loads every circuit's verifying key from `{dir}/{stem}.vkey.bin`.
    /// Any missing or malformed key aborts startup.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut keys = HashMap::with_capacity(ALL_CIRCUITS.len());
        for kind in ALL_CIRCUITS {
            let path = dir.join(format!("{}.vkey.bin", kind.vkey_stem()));
            let bytes = std::fs::read(&path).map_err(|e| {
                anyhow::anyhow!("verifying key for {:?} missing at {}: {e}", kind, path.display())
            })?;
            let vk = VerifyingKey::<Bn254>::deserialize_compressed(&bytes[..])
                .map_err(|e| anyhow::anyhow!("verifying key for {:?} is malformed: {e}", kind))?;
            keys.insert(kind, ark_groth16::prepare_verifying_key(&vk));
            tracing::info!(circuit = ?kind, "loaded verifying key");
        }
        Ok(Self { keys: Arc::new(keys) })
    }

    /// Verifies a proof against a circuit's fixed public-signal order.
    /// Rejects (returns `Ok(VerifyOutcome{valid: false, ..})`) on a
    /// signal-count mismatch rather than erroring; any cryptographic
    /// failure also produces `valid: false`, never a panic.
    pub fn verify(
        &self,
        circuit: CircuitKind,
        proof: &Groth16Proof,
        public_signals: &[ArkFr],
    ) -> Result<VerifyOutcome> {
        let pvk = self
            .keys
            .get(&circuit)
            .ok_or_else(|| RelayerError::VerifierKeyMissing(format!("{circuit:?}")))?;

        if public_signals.len() != circuit.public_signal_count() {
            return Ok(VerifyOutcome {
                valid: false,
                elapsed: Duration::ZERO,
            });
        }

        let ark_proof = match decode_proof(proof) {
            Ok(p) => p,
            Err(_) => {
                return Ok(VerifyOutcome {
                    valid: false,
                    elapsed: Duration::ZERO,
                })
            }
        };

        let start = Instant::now();
        let valid = Groth16::<Bn254>::verify_with_processed_vk(pvk, public_signals, &ark_proof)
            .unwrap_or(false);
        Ok(VerifyOutcome {
            valid,
            elapsed: start.elapsed(),
        })
    }
}

fn decode_proof(proof: &Groth16Proof) -> Result<Proof<Bn254>> {
    let a = G1Affine::deserialize_uncompressed(&proof.a[..])
        .map_err(|e| RelayerError::InvalidInput(format!("malformed proof.a: {e}")))?;
    let b = G2Affine::deserialize_uncompressed(&proof.b[..])
        .map_err(|e| RelayerError::InvalidInput(format!("malformed proof.b: {e}")))?;
    let c = G1Affine::deserialize_uncompressed(&proof.c[..])
        .map_err(|e| RelayerError::InvalidInput(format!("malformed proof.c: {e}")))?;
    Ok(Proof { a, b, c })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_count_mismatch_is_a_clean_rejection_not_an_error() {
        // Construct a registry with no keys loaded to exercise the
        // missing-key path distinctly from the count-mismatch path.
        let registry = VerifierRegistry {
            keys: Arc::new(HashMap::new()),
        };
        let result = registry.verify(
            CircuitKind::Deposit,
            &Groth16Proof {
                a: [0u8; 64],
                b: [0u8; 128],
                c: [0u8; 64],
            },
            &[],
        );
        assert!(matches!(result, Err(RelayerError::VerifierKeyMissing(_))));
    }
}
