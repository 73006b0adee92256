/// BN254 scalar field elements with an explicit byte-order tag on the wire
/// representation, so a conversion bug shows up as a type error instead of a
/// silent endianness mismatch at a service boundary.
use ark_ff::{BigInteger, PrimeField};

use crate::error::{CoreError, Result};

pub type Fr = ark_bn254::Fr;

/// 32-byte big-endian encoding. Used for tree storage and API responses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FeBe(pub [u8; 32]);

/// 32-byte little-endian encoding. Used for on-chain public-input limbs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FeLe(pub [u8; 32]);

impl FeBe {
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CoreError::WrongLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn to_fr(&self) -> Result<Fr> {
        let fr = Fr::from_be_bytes_mod_order(&self.0);
        if fe_to_be(&fr) != self.0 {
            return Err(CoreError::NonCanonical);
        }
        Ok(fr)
    }

    pub fn from_fr(fr: &Fr) -> Self {
        Self(fe_to_be(fr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| CoreError::WrongLength(s.len() / 2))?;
        Self::from_slice(&bytes)
    }
}

impl FeLe {
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CoreError::WrongLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn to_fr(&self) -> Result<Fr> {
        let fr = Fr::from_le_bytes_mod_order(&self.0);
        if fe_to_le(&fr) != self.0 {
            return Err(CoreError::NonCanonical);
        }
        Ok(fr)
    }

    pub fn from_fr(fr: &Fr) -> Self {
        Self(fe_to_le(fr))
    }
}

impl From<FeBe> for FeLe {
    fn from(be: FeBe) -> Self {
        let mut le = be.0;
        le.reverse();
        Self(le)
    }
}

impl From<FeLe> for FeBe {
    fn from(le: FeLe) -> Self {
        let mut be = le.0;
        be.reverse();
        Self(be)
    }
}

fn fe_to_be(fr: &Fr) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&fr.into_bigint().to_bytes_be());
    out
}

fn fe_to_le(fr: &Fr) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&fr.into_bigint().to_bytes_le());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_round_trip() {
        let fr = Fr::from(123456789u64);
        let be = FeBe::from_fr(&fr);
        assert_eq!(be.to_fr().unwrap(), fr);
    }

    #[test]
    fn le_round_trip() {
        let fr = Fr::from(987654321u64);
        let le = FeLe::from_fr(&fr);
        assert_eq!(le.to_fr().unwrap(), fr);
    }

    #[test]
    fn be_le_are_byte_reversals() {
        let fr = Fr::from(42u64);
        let be = FeBe::from_fr(&fr);
        let le: FeLe = be.into();
        assert_eq!(le.to_fr().unwrap(), fr);
    }

    #[test]
    fn non_canonical_be_is_rejected() {
        // The modulus itself reduces to 0, but its byte representation is
        // not the canonical (all-zero) encoding of 0.
        let p_bytes = hex::decode(
            "30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001",
        )
        .unwrap();
        let fe = FeBe::from_slice(&p_bytes).unwrap();
        assert!(fe.to_fr().is_err());
    }
}
