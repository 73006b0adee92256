/// Poseidon formulas for the off-chain note lifecycle: commitments,
/// nullifiers, cipher-pay pubkeys, and deposit hashes. The relayer only ever
/// sees the public values on the right-hand side of these formulas; it never
/// handles `randomness` or `wallet_priv`, which stay with the client.
use crate::error::Result;
use crate::fe::Fr;
use crate::poseidon::hash;

/// `H(amount, owner_cp_pk, randomness, token_id, memo)`, arity 5.
pub fn commitment(amount: Fr, owner_cp_pk: Fr, randomness: Fr, token_id: Fr, memo: Fr) -> Result<Fr> {
    hash(&[amount, owner_cp_pk, randomness, token_id, memo])
}

/// `H(wallet_pub, wallet_priv)`, arity 2.
pub fn cipher_pay_pubkey(wallet_pub: Fr, wallet_priv: Fr) -> Result<Fr> {
    hash(&[wallet_pub, wallet_priv])
}

/// `H(cipher_pay_pubkey, randomness, token_id)`, arity 3. Shared by transfer
/// and withdraw spends.
pub fn nullifier(cipher_pay_pubkey: Fr, randomness: Fr, token_id: Fr) -> Result<Fr> {
    hash(&[cipher_pay_pubkey, randomness, token_id])
}

/// `H(owner_cp_pk, amount, nonce)`, arity 3.
pub fn deposit_hash(owner_cp_pk: Fr, amount: Fr, nonce: Fr) -> Result<Fr> {
    hash(&[owner_cp_pk, amount, nonce])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_is_deterministic_and_order_sensitive() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        let r = Fr::from(3u64);
        let t = Fr::from(4u64);
        let m = Fr::from(5u64);
        let c1 = commitment(a, b, r, t, m).unwrap();
        let c2 = commitment(a, b, r, t, m).unwrap();
        assert_eq!(c1, c2);
        let c3 = commitment(b, a, r, t, m).unwrap();
        assert_ne!(c1, c3);
    }

    #[test]
    fn nullifier_distinguishes_from_commitment_arity() {
        let cp_pk = Fr::from(10u64);
        let r = Fr::from(11u64);
        let t = Fr::from(12u64);
        let n = nullifier(cp_pk, r, t).unwrap();
        let c = cipher_pay_pubkey(cp_pk, r).unwrap();
        assert_ne!(n, c);
    }

    #[test]
    fn deposit_hash_is_stable_for_same_inputs() {
        let owner = Fr::from(20u64);
        let amount = Fr::from(500u64);
        let nonce = Fr::from(1u64);
        assert_eq!(
            deposit_hash(owner, amount, nonce).unwrap(),
            deposit_hash(owner, amount, nonce).unwrap()
        );
    }

    #[test]
    fn cipher_pay_pubkey_is_order_sensitive() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        assert_ne!(
            cipher_pay_pubkey(a, b).unwrap(),
            cipher_pay_pubkey(b, a).unwrap()
        );
    }
}
