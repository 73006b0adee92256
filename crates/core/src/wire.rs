/// Wire formats that cross the relayer/chain boundary: the 256-byte packed
/// Groth16 proof and little-endian public-input limbs.
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::error::{CoreError, Result};
use crate::fe::{FeLe, Fr};

pub const PROOF_BYTES_LEN: usize = 256;

/// Groth16 proof on BN254, packed as `G1 || G2 || G1` with the coordinate
/// serialization the on-chain verifier expects (little-endian limbs).
#[derive(Clone, Serialize, Deserialize)]
pub struct Groth16Proof {
    #[serde(with = "BigArray")]
    pub a: [u8; 64],
    #[serde(with = "BigArray")]
    pub b: [u8; 128],
    #[serde(with = "BigArray")]
    pub c: [u8; 64],
}

impl Groth16Proof {
    pub fn to_bytes(&self) -> [u8; PROOF_BYTES_LEN] {
        let mut out = [0u8; PROOF_BYTES_LEN];
        out[..64].copy_from_slice(&self.a);
        out[64..192].copy_from_slice(&self.b);
        out[192..].copy_from_slice(&self.c);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PROOF_BYTES_LEN {
            return Err(CoreError::InvalidProofLength {
                expected: PROOF_BYTES_LEN,
                got: bytes.len(),
            });
        }
        let mut a = [0u8; 64];
        let mut b = [0u8; 128];
        let mut c = [0u8; 64];
        a.copy_from_slice(&bytes[..64]);
        b.copy_from_slice(&bytes[64..192]);
        c.copy_from_slice(&bytes[192..]);
        Ok(Self { a, b, c })
    }
}

/// Packs public signals as `count x 32` little-endian limbs.
pub fn pack_public_signals(signals: &[Fr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(signals.len() * 32);
    for s in signals {
        out.extend_from_slice(&FeLe::from_fr(s).0);
    }
    out
}

/// Parses public signals packed as little-endian 32-byte limbs.
pub fn parse_public_signals(bytes: &[u8]) -> Result<Vec<Fr>> {
    if bytes.len() % 32 != 0 {
        return Err(CoreError::InvalidPublicInputsLength(bytes.len()));
    }
    bytes
        .chunks_exact(32)
        .map(|chunk| FeLe::from_slice(chunk)?.to_fr())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_round_trips() {
        let proof = Groth16Proof {
            a: [1u8; 64],
            b: [2u8; 128],
            c: [3u8; 64],
        };
        let bytes = proof.to_bytes();
        let parsed = Groth16Proof::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn rejects_wrong_proof_length() {
        assert!(Groth16Proof::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn public_signals_round_trip() {
        let signals = vec![Fr::from(1u64), Fr::from(42u64), Fr::from(999_999u64)];
        let packed = pack_public_signals(&signals);
        assert_eq!(packed.len(), 96);
        let parsed = parse_public_signals(&packed).unwrap();
        assert_eq!(parsed, signals);
    }

    #[test]
    fn rejects_truncated_public_signals() {
        assert!(parse_public_signals(&[0u8; 31]).is_err());
    }
}
