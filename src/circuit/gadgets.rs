//! Reusable constraint gadgets for the batch circuit.

#![allow(clippy::indexing_slicing)]

use crate::api::{Api, TableId, Var};
use crate::bn254::Fr;
use crate::constants::{
    MAX_TIER_BOUNDARY, PERCENTAGE_MULTIPLIER, POWERS_OF_SIXTEEN_BITS, TWO_POW_8, TWO_POW_64,
    TWO_POW_126, TWO_POW_128, TWO_POW_134,
};

use super::types::{CexAssetVars, TierRatioVars};

/// Walk a Merkle authentication path from `node` and assert the computed
/// root equals `merkle_root`. `helper` carries the direction bits, leaf
/// level first; bit 1 puts the sibling on the left.
pub fn verify_merkle_proof<A: Api>(
    api: &mut A,
    merkle_root: Var,
    node: Var,
    proof_set: &[Var],
    helper: &[Var],
) {
    let root = update_merkle_proof(api, node, proof_set, helper);
    api.assert_is_equal(merkle_root, root);
}

/// Same walk as [`verify_merkle_proof`] but returns the recomputed root.
pub fn update_merkle_proof<A: Api>(
    api: &mut A,
    mut node: Var,
    proof_set: &[Var],
    helper: &[Var],
) -> Var {
    for (sibling, bit) in proof_set.iter().zip(helper) {
        api.assert_is_boolean(*bit);
        let left = api.select(*bit, *sibling, node);
        let right = api.select(*bit, node, *sibling);
        node = api.poseidon(&[left, right]);
    }
    node
}

/// Direction bits of an account index, one per tree level.
pub fn account_index_to_merkle_helper<A: Api>(api: &mut A, account_index: Var, depth: usize) -> Vec<Var> {
    api.to_binary(account_index, depth)
}

/// Pack a flattened `(index, equity, debt, loan, margin, portfolio)` list
/// into 64-bit triples and hash it.
pub fn compute_user_assets_commitment<A: Api>(api: &mut A, flatten_assets: &[Var]) -> Var {
    debug_assert_eq!(flatten_assets.len() % 3, 0);
    let two_pow_64 = api.constant(*TWO_POW_64);
    let two_pow_128 = api.constant(*TWO_POW_128);
    let mut packed = Vec::with_capacity(flatten_assets.len() / 3);
    for triple in flatten_assets.chunks_exact(3) {
        let hi = api.mul(triple[0], two_pow_128);
        let mid = api.mul(triple[1], two_pow_64);
        let sum = api.add(hi, mid);
        packed.push(api.add(sum, triple[2]));
    }
    api.poseidon(&packed)
}

/// Number of field elements one asset record occupies in the aggregate
/// commitment: two packed totals plus the three tier tables pairwise.
pub fn variable_count_of_cex_asset<V>(asset: &CexAssetVars<V>) -> usize {
    2 + asset.loan_ratios.len() / 2
        + asset.margin_ratios.len() / 2
        + asset.portfolio_margin_ratios.len() / 2
}

fn convert_tier_ratios_to_variables<A: Api>(
    api: &mut A,
    ratios: &[TierRatioVars<Var>],
    out: &mut Vec<Var>,
) {
    let two_pow_8 = api.constant(*TWO_POW_8);
    let two_pow_126 = api.constant(*TWO_POW_126);
    let two_pow_134 = api.constant(*TWO_POW_134);
    for pair in ratios.chunks_exact(2) {
        let lo_boundary = api.mul(pair[0].boundary, two_pow_8);
        let lo = api.add(pair[0].ratio, lo_boundary);
        let hi_ratio = api.mul(pair[1].ratio, two_pow_126);
        let hi_boundary = api.mul(pair[1].boundary, two_pow_134);
        let hi = api.add(hi_ratio, hi_boundary);
        out.push(api.add(lo, hi));
    }
}

/// Append one asset record's commitment elements; layout matches the native
/// packing in [`crate::packing::cex_asset_elements`] exactly.
pub fn fill_cex_asset_commitment<A: Api>(
    api: &mut A,
    asset: &CexAssetVars<Var>,
    out: &mut Vec<Var>,
) {
    let two_pow_64 = api.constant(*TWO_POW_64);
    let two_pow_128 = api.constant(*TWO_POW_128);

    let equity = api.mul(asset.total_equity, two_pow_128);
    let debt = api.mul(asset.total_debt, two_pow_64);
    let totals = api.add(equity, debt);
    out.push(api.add(totals, asset.base_price));

    let loan = api.mul(asset.loan_collateral, two_pow_128);
    let margin = api.mul(asset.margin_collateral, two_pow_64);
    let collaterals = api.add(loan, margin);
    out.push(api.add(collaterals, asset.portfolio_margin_collateral));

    convert_tier_ratios_to_variables(api, &asset.loan_ratios, out);
    convert_tier_ratios_to_variables(api, &asset.margin_ratios, out);
    convert_tier_ratios_to_variables(api, &asset.portfolio_margin_ratios, out);
}

/// Prover hint for Euclidean division: `[dividend, divisor] -> [q, r]`.
pub fn integer_division(inputs: &[Fr]) -> Vec<Fr> {
    use crate::bn254::fr_to_u128;
    let dividend = fr_to_u128(&inputs[0]).unwrap_or(0);
    let divisor = fr_to_u128(&inputs[1]).unwrap_or(1).max(1);
    vec![Fr::from(dividend / divisor), Fr::from(dividend % divisor)]
}

/// Constrain a hinted division by 100 and return the quotient:
/// `q·100 + r == dividend`, `q` 128 bits, `r` 8 bits and below 100.
pub fn check_and_get_integer_division_res<A: Api>(api: &mut A, dividend: Var) -> Var {
    let divisor = api.constant(Fr::from(PERCENTAGE_MULTIPLIER));
    let out = api.new_hint(integer_division, 2, &[dividend, divisor]);
    let (quotient, remainder) = (out[0], out[1]);
    api.range_check(quotient, 128);
    api.range_check(remainder, 8);
    let max_remainder = api.constant(Fr::from(PERCENTAGE_MULTIPLIER - 1));
    api.assert_is_less_or_equal(remainder, max_remainder, 8);
    let scaled = api.mul(quotient, divisor);
    let recomposed = api.add(scaled, remainder);
    api.assert_is_equal(recomposed, dividend);
    quotient
}

/// Re-derive the `precomputed` column of a tier table in-circuit and bound
/// every field. The allocated `precomputed` variables are replaced; only
/// the recomputed values flow into lookup tables and haircut results.
pub fn generate_rapid_arithmetic_for_collateral<A: Api>(
    api: &mut A,
    tier_ratios: &mut [TierRatioVars<Var>],
) {
    let max_ratio = api.constant(Fr::from(PERCENTAGE_MULTIPLIER));
    let max_boundary = api.constant(Fr::from(MAX_TIER_BOUNDARY));

    let first_area = api.mul(tier_ratios[0].boundary, tier_ratios[0].ratio);
    tier_ratios[0].precomputed = check_and_get_integer_division_res(api, first_area);
    api.assert_is_less_or_equal(tier_ratios[0].ratio, max_ratio, 8);
    api.assert_is_less_or_equal(tier_ratios[0].boundary, max_boundary, 128);
    for i in 1..tier_ratios.len() {
        api.assert_is_less_or_equal(tier_ratios[i - 1].boundary, tier_ratios[i].boundary, 128);
        api.assert_is_less_or_equal(tier_ratios[i].ratio, max_ratio, 8);
        api.assert_is_less_or_equal(tier_ratios[i].boundary, max_boundary, 128);
        let diff_boundary = api.sub(tier_ratios[i].boundary, tier_ratios[i - 1].boundary);
        let area = api.mul(diff_boundary, tier_ratios[i].ratio);
        let current = check_and_get_integer_division_res(api, area);
        tier_ratios[i].precomputed = api.add(tier_ratios[i - 1].precomputed, current);
    }

    for tier in tier_ratios.iter() {
        api.range_check(tier.precomputed, 128);
        api.range_check(tier.ratio, 8);
        api.range_check(tier.boundary, 128);
    }
}

/// Build the lookup table for one collateral kind. Each asset contributes a
/// leading dummy zero row (the lower boundary of the smallest tier) and then
/// `(boundary, ratio, precomputed)` per tier, three table rows each.
pub fn construct_tier_ratios_lookup_table<A, F>(
    api: &mut A,
    cex_assets: &[CexAssetVars<Var>],
    kind: F,
) -> TableId
where
    A: Api,
    F: Fn(&CexAssetVars<Var>) -> &[TierRatioVars<Var>],
{
    let table = api.table_new();
    let zero = api.constant(Fr::from(0u64));
    for asset in cex_assets {
        for _ in 0..3 {
            api.table_insert(table, zero);
        }
        for tier in kind(asset) {
            api.table_insert(table, tier.boundary);
            api.table_insert(table, tier.ratio);
            api.table_insert(table, tier.precomputed);
        }
    }
    table
}

/// Evaluate the tiered haircut at `user_collateral · asset_price` with the
/// prover-supplied `(collateral_index, collateral_flag)` hint.
///
/// Two consecutive table rows pin the tier: the lower boundary must sit
/// strictly below the value (degenerating to equality only at zero, where
/// the dummy row makes both sides zero) and the upper boundary at or above
/// it. The overflow branch swaps the upper bound for the global cap and
/// returns the final precomputed value.
#[allow(clippy::too_many_arguments)]
pub fn get_and_check_tier_ratios_query_results<A: Api>(
    api: &mut A,
    tier_ratios_table: TableId,
    asset_index: Var,
    user_collateral: Var,
    collateral_index: Var,
    collateral_flag: Var,
    asset_price: Var,
    collateral_tier_ratios_len: usize,
) -> Var {
    let section = api.constant(Fr::from(collateral_tier_ratios_len as u64));
    let gap = api.mul(asset_index, section);
    let three = api.constant(Fr::from(3u64));
    let mut queries = [gap; 6];
    let start_position = api.mul(collateral_index, three);
    let one = api.constant(Fr::from(1u64));
    let mut row = api.add(start_position, gap);
    for chunk in queries.chunks_mut(3) {
        chunk[0] = row;
        chunk[1] = api.add(row, one);
        let two = api.constant(Fr::from(2u64));
        chunk[2] = api.add(row, two);
        row = api.add(chunk[2], one);
    }
    let results = api.lookup(tier_ratios_table, &queries);

    let collateral_value = api.mul(user_collateral, asset_price);
    // results[0] is bounded to 128 bits by the tier-table verification.
    let cr = api.cmp(collateral_value, results[0], 128);
    let value_is_zero = api.is_zero(collateral_value);
    let zero = api.constant(Fr::from(0u64));
    let expected_cr = api.select(value_is_zero, zero, one);
    api.assert_is_equal(cr, expected_cr);

    let flag_is_zero = api.is_zero(collateral_flag);
    let max_boundary = api.constant(Fr::from(MAX_TIER_BOUNDARY));
    let upper_boundary_value = api.select(flag_is_zero, results[3], max_boundary);
    api.assert_is_less_or_equal(collateral_value, upper_boundary_value, 128);

    // (value - lower boundary) * upper ratio, divided down by 100.
    let inside = api.sub(collateral_value, results[0]);
    let diff_value = api.mul(inside, results[4]);
    let quotient = check_and_get_integer_division_res(api, diff_value);
    let in_tier = api.add(results[2], quotient);
    api.select(flag_is_zero, in_tier, results[5])
}

/// Pack 15 16-bit asset indices per field element and hash the result.
pub fn compute_user_asset_ids_hash<A: Api>(api: &mut A, asset_indexes: &[Var]) -> Var {
    let powers: Vec<Var> = POWERS_OF_SIXTEEN_BITS
        .iter()
        .map(|p| api.constant(*p))
        .collect();
    let mut packed = Vec::with_capacity(asset_indexes.len().div_ceil(15));
    for chunk in asset_indexes.chunks(15) {
        let mut acc = api.constant(Fr::from(0u64));
        for (p, index) in chunk.iter().enumerate() {
            let term = api.mul(*index, powers[p]);
            acc = api.add(acc, term);
        }
        packed.push(acc);
    }
    api.poseidon(&packed)
}
