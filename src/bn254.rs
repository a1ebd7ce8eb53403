//! BN254 scalar-field helpers.
//!
//! Every hash, commitment and witness value in this crate lives in the BN254
//! scalar field. The canonical external encoding of an element is the 32-byte
//! big-endian form of its canonical integer representative; roots and
//! commitments are stored and compared in that form.

use std::cmp::Ordering;

use ark_ff::{BigInteger, PrimeField};

pub type Fr = ark_bn254::Fr;

/// Canonical 32-byte big-endian encoding of a field element.
pub fn fr_to_be_bytes(f: &Fr) -> [u8; 32] {
    let bytes = f.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}

/// Decode a 32-byte big-endian integer, reducing modulo the field order.
pub fn fr_from_be_bytes(bytes: &[u8; 32]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Compare two elements as canonical integers.
pub fn fr_cmp(a: &Fr, b: &Fr) -> Ordering {
    a.into_bigint().cmp(&b.into_bigint())
}

/// Number of bits of the canonical integer representative.
pub fn fr_bit_len(f: &Fr) -> usize {
    f.into_bigint().num_bits() as usize
}

/// Recover a u128 from an element known to fit in 128 bits.
///
/// Returns `None` when the canonical representative exceeds `u128::MAX`.
pub fn fr_to_u128(f: &Fr) -> Option<u128> {
    let limbs = f.into_bigint().0;
    if limbs[2] != 0 || limbs[3] != 0 {
        return None;
    }
    Some((limbs[1] as u128) << 64 | limbs[0] as u128)
}

/// Recover a u64 from an element known to fit in 64 bits.
pub fn fr_to_u64(f: &Fr) -> Option<u64> {
    let limbs = f.into_bigint().0;
    if limbs[1] != 0 || limbs[2] != 0 || limbs[3] != 0 {
        return None;
    }
    Some(limbs[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_bytes_round_trip() {
        let x = Fr::from(0x1234_5678_9abc_def0u64);
        assert_eq!(fr_from_be_bytes(&fr_to_be_bytes(&x)), x);
    }

    #[test]
    fn u128_round_trip_and_overflow() {
        let v = u128::MAX;
        assert_eq!(fr_to_u128(&Fr::from(v)), Some(v));
        let big = Fr::from(v) * Fr::from(2u64);
        assert_eq!(fr_to_u128(&big), None);
    }

    #[test]
    fn cmp_matches_integer_order() {
        assert_eq!(fr_cmp(&Fr::from(3u64), &Fr::from(7u64)), Ordering::Less);
        assert_eq!(fr_cmp(&Fr::from(7u64), &Fr::from(7u64)), Ordering::Equal);
    }
}
