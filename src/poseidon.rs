//! Native poseidon sponge.
//!
//! One sponge construction feeds every hash site in the system: Merkle node
//! combination, account leaves, aggregate commitments and the batch
//! commitment. The in-circuit hash gadget (`Api::poseidon`) is required to
//! agree with this module element-for-element; the evaluation engine
//! delegates here, which is what keeps the native and in-circuit
//! commitments bit-identical.
//!
//! Arbitrary-arity hashing absorbs the input in fixed-width permutation
//! calls: the first `MAX_WIDTH` elements directly, then `MAX_WIDTH - 1`
//! elements at a time chained through the running digest.

use light_poseidon::{Poseidon, PoseidonHasher};

use crate::bn254::Fr;

/// Widest poseidon instance available from the parameter set.
const MAX_WIDTH: usize = 12;

fn permute(inputs: &[Fr]) -> Fr {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .expect("poseidon parameters exist for widths 1..=12");
    hasher.hash(inputs).expect("input arity matches hasher width")
}

/// Hash an arbitrary non-empty sequence of field elements.
pub fn hash_fields(inputs: &[Fr]) -> Fr {
    assert!(!inputs.is_empty(), "sponge input must be non-empty");
    if inputs.len() <= MAX_WIDTH {
        return permute(inputs);
    }
    let (head, rest) = inputs.split_at(MAX_WIDTH);
    let mut acc = permute(head);
    let mut buf = Vec::with_capacity(MAX_WIDTH);
    for chunk in rest.chunks(MAX_WIDTH - 1) {
        buf.clear();
        buf.push(acc);
        buf.extend_from_slice(chunk);
        acc = permute(&buf);
    }
    acc
}

/// Merkle node combiner.
pub fn hash2(left: Fr, right: Fr) -> Fr {
    hash_fields(&[left, right])
}

/// Account leaf hash: id hash, priced totals, and the packed asset-list
/// commitment. The circuit recomputes this exact shape per user operation.
pub fn hash_account_leaf(
    account_id_hash: Fr,
    total_equity: Fr,
    total_debt: Fr,
    total_collateral: Fr,
    assets_commitment: Fr,
) -> Fr {
    hash_fields(&[
        account_id_hash,
        total_equity,
        total_debt,
        total_collateral,
        assets_commitment,
    ])
}

/// Public batch commitment binding the four chained state scalars.
pub fn batch_commitment_hash(
    before_account_tree_root: Fr,
    after_account_tree_root: Fr,
    before_cex_commitment: Fr,
    after_cex_commitment: Fr,
) -> Fr {
    hash_fields(&[
        before_account_tree_root,
        after_account_tree_root,
        before_cex_commitment,
        after_cex_commitment,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let xs: Vec<Fr> = (1u64..=30).map(Fr::from).collect();
        assert_eq!(hash_fields(&xs), hash_fields(&xs));
    }

    #[test]
    fn arity_is_domain_separating() {
        let a = hash_fields(&[Fr::from(1u64)]);
        let b = hash_fields(&[Fr::from(1u64), Fr::from(0u64)]);
        assert_ne!(a, b);
    }

    #[test]
    fn chaining_kicks_in_past_max_width() {
        let xs: Vec<Fr> = (0u64..13).map(Fr::from).collect();
        let manual = {
            let first = hash_fields(&xs[..12]);
            hash_fields(&[first, xs[12]])
        };
        assert_eq!(hash_fields(&xs), manual);
    }

    #[test]
    fn hash2_matches_generic_sponge() {
        let l = Fr::from(11u64);
        let r = Fr::from(22u64);
        assert_eq!(hash2(l, r), hash_fields(&[l, r]));
    }
}
