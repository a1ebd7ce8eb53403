//! Bit-packing of per-asset data into field elements.
//!
//! The packing layout is part of the proof format: the circuit recomputes
//! every commitment from the same element sequence produced here, so any
//! change to these helpers is a consensus change. Layouts:
//!
//! - three 64-bit values per element: `a·2^128 + b·2^64 + c`;
//! - two tier ratios per element: `r0 + b0·2^8 + r1·2^126 + b1·2^134`
//!   (boundaries are at most `2^118`, ratios 8 bits — 252 bits total);
//! - a custodian asset record: `[equity|debt|price]`,
//!   `[loan|margin|portfolio]`, then the three tier tables pairwise;
//! - a user asset list: `(index, equity, debt, loan, margin, portfolio)`
//!   per asset, flattened and packed as 64-bit triples.

use ark_ff::PrimeField;

use crate::bn254::Fr;
use crate::constants::{TWO_POW_8, TWO_POW_64, TWO_POW_126, TWO_POW_128, TWO_POW_134};
use crate::error::{Error, Result};
use crate::poseidon::{hash_account_leaf, hash_fields};
use crate::tiers::TierRatio;
use crate::types::{AccountAsset, AccountInfo, CexAssetInfo};

/// Pack three 64-bit values into one field element.
pub fn pack_u64_triple(a: u64, b: u64, c: u64) -> Fr {
    Fr::from(a) * *TWO_POW_128 + Fr::from(b) * *TWO_POW_64 + Fr::from(c)
}

/// Inverse of [`pack_u64_triple`]. `None` when the element carries more
/// than 192 bits.
pub fn unpack_u64_triple(f: &Fr) -> Option<(u64, u64, u64)> {
    let limbs = f.into_bigint().0;
    if limbs[3] != 0 {
        return None;
    }
    Some((limbs[2], limbs[1], limbs[0]))
}

/// Pack two tier ratios into one field element.
pub fn pack_tier_pair(lo: &TierRatio, hi: &TierRatio) -> Fr {
    Fr::from(lo.ratio) + Fr::from(lo.boundary) * *TWO_POW_8
        + Fr::from(hi.ratio) * *TWO_POW_126
        + Fr::from(hi.boundary) * *TWO_POW_134
}

/// Extract `len` bits starting at `offset` from a little-endian limb array.
fn limb_bits(limbs: &[u64; 4], offset: usize, len: usize) -> u128 {
    debug_assert!(len <= 128);
    let mut out = 0u128;
    for bit in 0..len {
        let pos = offset + bit;
        if (limbs[pos / 64] >> (pos % 64)) & 1 == 1 {
            out |= 1u128 << bit;
        }
    }
    out
}

/// Inverse of [`pack_tier_pair`]: `((ratio, boundary), (ratio, boundary))`.
pub fn unpack_tier_pair(f: &Fr) -> ((u8, u128), (u8, u128)) {
    let limbs = f.into_bigint().0;
    let lo_ratio = limb_bits(&limbs, 0, 8) as u8;
    let lo_boundary = limb_bits(&limbs, 8, 118);
    let hi_ratio = limb_bits(&limbs, 126, 8) as u8;
    let hi_boundary = limb_bits(&limbs, 134, 118);
    ((lo_ratio, lo_boundary), (hi_ratio, hi_boundary))
}

fn tier_pair_elements(tiers: &[TierRatio], out: &mut Vec<Fr>) {
    for pair in tiers.chunks_exact(2) {
        out.push(pack_tier_pair(&pair[0], &pair[1]));
    }
}

/// Field-element sequence of one custodian asset record, in commitment
/// order. `2 + 3·(tier_count/2)` elements.
pub fn cex_asset_elements(asset: &CexAssetInfo) -> Vec<Fr> {
    let mut out = Vec::with_capacity(
        2 + (asset.loan_ratios.len()
            + asset.margin_ratios.len()
            + asset.portfolio_margin_ratios.len())
            / 2,
    );
    out.push(pack_u64_triple(
        asset.total_equity,
        asset.total_debt,
        asset.base_price,
    ));
    out.push(pack_u64_triple(
        asset.loan_collateral,
        asset.margin_collateral,
        asset.portfolio_margin_collateral,
    ));
    tier_pair_elements(&asset.loan_ratios, &mut out);
    tier_pair_elements(&asset.margin_ratios, &mut out);
    tier_pair_elements(&asset.portfolio_margin_ratios, &mut out);
    out
}

/// Aggregate commitment over the full custodian state vector.
pub fn cex_assets_commitment(assets: &[CexAssetInfo]) -> Fr {
    let mut elements = Vec::new();
    for asset in assets {
        elements.extend(cex_asset_elements(asset));
    }
    hash_fields(&elements)
}

/// Flatten a sparse asset list into `target · 6` values, inserting
/// zero-valued padding records with fabricated indices.
///
/// Padding indices fill the gaps below the real entries first, then continue
/// past the highest real index, walking both sequences so fabricated and
/// real indices never collide and the combined list stays strictly
/// increasing.
pub fn flatten_padded_assets(assets: &[AccountAsset], target: usize) -> Result<Vec<u64>> {
    if assets.len() > target {
        return Err(Error::InvalidInput(format!(
            "{} declared assets exceed the {target}-asset tier",
            assets.len()
        )));
    }
    const FIELDS: usize = 6;
    let mut flat = vec![0u64; target * FIELDS];
    let padding_counts = target - assets.len();
    let mut current_padding = 0usize;
    let mut next_index = 0u64;
    let mut pos = 0usize;
    for asset in assets {
        while current_padding < padding_counts && next_index < asset.index as u64 {
            flat[pos * FIELDS] = next_index;
            pos += 1;
            current_padding += 1;
            next_index += 1;
        }
        if pos >= target {
            return Err(Error::InvalidInput(
                "asset indices not sorted: padding overran the tier".to_owned(),
            ));
        }
        flat[pos * FIELDS] = asset.index as u64;
        flat[pos * FIELDS + 1] = asset.equity;
        flat[pos * FIELDS + 2] = asset.debt;
        flat[pos * FIELDS + 3] = asset.loan;
        flat[pos * FIELDS + 4] = asset.margin;
        flat[pos * FIELDS + 5] = asset.portfolio_margin;
        pos += 1;
        next_index = asset.index as u64 + 1;
    }
    for slot in pos..target {
        flat[slot * FIELDS] = next_index;
        next_index += 1;
    }
    Ok(flat)
}

/// Pack a flattened asset list (a multiple of three values) into elements.
pub fn pack_flattened_assets(flat: &[u64]) -> Vec<Fr> {
    debug_assert_eq!(flat.len() % 3, 0);
    flat.chunks_exact(3)
        .map(|t| pack_u64_triple(t[0], t[1], t[2]))
        .collect()
}

/// Commitment over a user's padded asset list.
pub fn user_assets_commitment(assets: &[AccountAsset], target: usize) -> Result<Fr> {
    let flat = flatten_padded_assets(assets, target)?;
    Ok(hash_fields(&pack_flattened_assets(&flat)))
}

/// Account leaf hash as enforced in-circuit, at a given asset-count tier.
pub fn account_leaf_hash(account: &AccountInfo, asset_tier: usize) -> Result<Fr> {
    let assets_commitment = user_assets_commitment(&account.assets, asset_tier)?;
    Ok(hash_account_leaf(
        account.account_id,
        account.total_equity,
        account.total_debt,
        account.total_collateral,
        assets_commitment,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triple_round_trip() {
        let f = pack_u64_triple(u64::MAX, 7, u64::MAX - 1);
        assert_eq!(unpack_u64_triple(&f), Some((u64::MAX, 7, u64::MAX - 1)));
    }

    #[test]
    fn tier_pair_round_trip() {
        let lo = TierRatio { boundary: (1 << 118) - 3, ratio: 99, precomputed: 0 };
        let hi = TierRatio { boundary: 1 << 117, ratio: 100, precomputed: 0 };
        let ((r0, b0), (r1, b1)) = unpack_tier_pair(&pack_tier_pair(&lo, &hi));
        assert_eq!((r0, b0), (lo.ratio, lo.boundary));
        assert_eq!((r1, b1), (hi.ratio, hi.boundary));
    }

    #[test]
    fn padding_fills_gaps_then_tail() {
        let assets = vec![AccountAsset { index: 5, equity: 9, ..AccountAsset::default() }];
        let flat = flatten_padded_assets(&assets, 4).unwrap();
        let indices: Vec<u64> = flat.chunks(6).map(|c| c[0]).collect();
        assert_eq!(indices, vec![0, 1, 2, 5]);
        assert_eq!(flat[3 * 6 + 1], 9);
    }

    #[test]
    fn padding_indices_stay_increasing_past_the_last_real_entry() {
        let assets = vec![
            AccountAsset { index: 0, equity: 1, ..AccountAsset::default() },
            AccountAsset { index: 1, equity: 2, ..AccountAsset::default() },
        ];
        let flat = flatten_padded_assets(&assets, 4).unwrap();
        let indices: Vec<u64> = flat.chunks(6).map(|c| c[0]).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn too_many_assets_is_rejected() {
        let assets = vec![AccountAsset::default(); 3];
        assert!(flatten_padded_assets(&assets, 2).is_err());
    }

    #[test]
    fn asset_element_count_matches_layout() {
        let asset = CexAssetInfo::reserved(0, 12);
        assert_eq!(cex_asset_elements(&asset).len(), 2 + 3 * 6);
    }
}
