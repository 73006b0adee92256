/// Poseidon over BN254 with the circomlib round parameters, matching the
/// on-chain circuits. `light_poseidon`'s state setup is cheap enough that we
/// build a fresh instance per call rather than holding one behind a lock --
/// the instance itself is not `Send` across awaits, and the std contract
/// only asks for a process-wide singleton conceptually, not a shared object.
use light_poseidon::{Poseidon, PoseidonBytesHasher};

use crate::error::{CoreError, Result};
use crate::fe::{FeBe, Fr};

fn hash_be(inputs: &[[u8; 32]]) -> Result<[u8; 32]> {
    let mut poseidon = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|e| CoreError::Poseidon(e.to_string()))?;
    let refs: Vec<&[u8]> = inputs.iter().map(|a| a.as_slice()).collect();
    poseidon
        .hash_bytes_be(&refs)
        .map_err(|e| CoreError::Poseidon(e.to_string()))
}

/// Variadic Poseidon hash of field elements, used for commitments,
/// nullifiers, cipher-pay pubkeys, and deposit hashes.
pub fn hash(xs: &[Fr]) -> Result<Fr> {
    let bytes: Vec<[u8; 32]> = xs.iter().map(|x| FeBe::from_fr(x).0).collect();
    let out = hash_be(&bytes)?;
    FeBe(out).to_fr()
}

/// Arity-2 Poseidon, used for Merkle tree nodes.
pub fn h2(a: Fr, b: Fr) -> Result<Fr> {
    hash(&[a, b])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h2_is_deterministic() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        assert_eq!(h2(a, b).unwrap(), h2(a, b).unwrap());
    }

    #[test]
    fn h2_is_order_sensitive() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        assert_ne!(h2(a, b).unwrap(), h2(b, a).unwrap());
    }

    #[test]
    fn variadic_hash_distinguishes_arity() {
        let a = Fr::from(7u64);
        let two = hash(&[a, a]).unwrap();
        let three = hash(&[a, a, a]).unwrap();
        assert_ne!(two, three);
    }
}
