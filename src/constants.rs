//! Process-wide constants shared by the circuit, the witness assembler and
//! the native commitment helpers.
//!
//! The field-element radices are initialized once and never change; packing
//! must agree bit-for-bit between the in-circuit and native computations, so
//! every packing site pulls its radix from here.

use std::sync::LazyLock;

use crate::bn254::Fr;
use crate::poseidon::hash_fields;

/// Depth of the sparse account tree; account indices are below `2^28`.
pub const ACCOUNT_TREE_DEPTH: usize = 28;

/// Number of asset slots in the custodian state vector (reserved slots
/// included).
pub const ASSET_COUNTS: usize = 500;

/// Number of tiers per collateral kind. Must be even: the aggregate
/// commitment packs tier ratios two per field element.
pub const TIER_COUNT: usize = 12;

/// Divisor of the tier haircut arithmetic (ratios are percentages).
pub const PERCENTAGE_MULTIPLIER: u128 = 100;

/// Upper bound on any tier boundary value (`2^118`).
pub const MAX_TIER_BOUNDARY: u128 = 1 << 118;

/// `(assets per user, ops per batch)` tiers. A user is proved in the
/// smallest asset tier that fits its non-empty asset count; the batch size
/// is fixed per tier so every batch in a tier compiles to the same circuit.
pub const BATCH_OPS_COUNT_TIERS: &[(usize, usize)] = &[(50, 700), (500, 92)];

pub static TWO_POW_8: LazyLock<Fr> = LazyLock::new(|| Fr::from(1u64 << 8));
pub static TWO_POW_64: LazyLock<Fr> = LazyLock::new(|| Fr::from(1u128 << 64));
pub static TWO_POW_126: LazyLock<Fr> = LazyLock::new(|| Fr::from(1u128 << 126));
pub static TWO_POW_128: LazyLock<Fr> =
    LazyLock::new(|| Fr::from(1u128 << 64) * Fr::from(1u128 << 64));
pub static TWO_POW_134: LazyLock<Fr> =
    LazyLock::new(|| Fr::from(1u128 << 126) * Fr::from(1u64 << 8));

/// `2^(16·i)` for `i in 0..15`: one field element packs 15 16-bit asset
/// indices when hashing a user's asset-id list.
pub static POWERS_OF_SIXTEEN_BITS: LazyLock<[Fr; 15]> = LazyLock::new(|| {
    let mut powers = [Fr::from(1u64); 15];
    for i in 1..15 {
        powers[i] = powers[i - 1] * Fr::from(1u64 << 16);
    }
    powers
});

/// Leaf hash of a never-created account: the canonical zero account
/// (zero id hash, zero totals, zero asset commitment).
pub static EMPTY_ACCOUNT_LEAF: LazyLock<Fr> =
    LazyLock::new(|| hash_fields(&[Fr::from(0u64); 5]));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radix_consistency() {
        assert_eq!(*TWO_POW_128, *TWO_POW_64 * *TWO_POW_64);
        assert_eq!(*TWO_POW_134, *TWO_POW_126 * *TWO_POW_8);
        assert_eq!(
            POWERS_OF_SIXTEEN_BITS[14],
            POWERS_OF_SIXTEEN_BITS[13] * Fr::from(1u64 << 16)
        );
    }
}
