//! Tiered collateral haircut tables.
//!
//! A tier vector describes a non-decreasing piecewise-linear discount curve:
//! collateral value inside tier `k` is credited at `ratio[k]` percent of the
//! amount above the previous boundary, on top of the precomputed total at
//! that boundary. The `precomputed` field is redundant — it is recomputed
//! both here and in-circuit — but carrying it lets the circuit evaluate the
//! curve with two lookups instead of a scan.

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_TIER_BOUNDARY, PERCENTAGE_MULTIPLIER};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRatio {
    /// Inclusive upper boundary of the tier, in priced units.
    pub boundary: u128,
    /// Credited percentage for value inside this tier.
    pub ratio: u8,
    /// Total haircut value at `boundary`, per the recursive definition.
    pub precomputed: u128,
}

/// Check the invariants the circuit will also enforce: boundaries
/// non-decreasing and capped, ratios at most 100 percent.
pub fn validate_tier_ratios(tiers: &[TierRatio]) -> Result<()> {
    if tiers.len() % 2 != 0 {
        return Err(Error::InvalidTierTable(format!(
            "tier count {} is odd",
            tiers.len()
        )));
    }
    let mut prev_boundary = 0u128;
    for (i, tier) in tiers.iter().enumerate() {
        if tier.ratio as u128 > PERCENTAGE_MULTIPLIER {
            return Err(Error::InvalidTierTable(format!(
                "tier {i} ratio {} above 100",
                tier.ratio
            )));
        }
        if tier.boundary > MAX_TIER_BOUNDARY {
            return Err(Error::InvalidTierTable(format!(
                "tier {i} boundary above cap"
            )));
        }
        if tier.boundary < prev_boundary {
            return Err(Error::InvalidTierTable(format!(
                "tier {i} boundary decreases"
            )));
        }
        prev_boundary = tier.boundary;
    }
    Ok(())
}

/// Fill the `precomputed` column from `(boundary, ratio)`.
///
/// `precomputed[k] = precomputed[k-1] + (boundary[k] - boundary[k-1]) * ratio[k] / 100`
/// with `boundary[-1] = 0` and `precomputed[-1] = 0`; integer division
/// throughout. The first tier therefore uses `boundary[0] * ratio[0] / 100`.
pub fn compute_precomputed(tiers: &mut [TierRatio]) {
    let mut prev_boundary = 0u128;
    let mut acc = 0u128;
    for tier in tiers.iter_mut() {
        let diff = tier.boundary - prev_boundary;
        acc += diff * tier.ratio as u128 / PERCENTAGE_MULTIPLIER;
        tier.precomputed = acc;
        prev_boundary = tier.boundary;
    }
}

/// Pad a tier vector to `target` entries.
///
/// Padding rows carry the boundary cap, a zero ratio and the last real
/// precomputed value, so they extend the curve as a constant and keep the
/// circuit's monotonicity assertions satisfiable.
pub fn pad_tier_ratios(mut tiers: Vec<TierRatio>, target: usize) -> Result<Vec<TierRatio>> {
    if tiers.len() > target {
        return Err(Error::InvalidTierTable(format!(
            "tier count {} above target {target}",
            tiers.len()
        )));
    }
    let precomputed = tiers.last().map(|t| t.precomputed).unwrap_or(0);
    while tiers.len() < target {
        tiers.push(TierRatio {
            boundary: MAX_TIER_BOUNDARY,
            ratio: 0,
            precomputed,
        });
    }
    Ok(tiers)
}

/// Native evaluation of the haircut curve at `collateral_value`.
pub fn haircut_value(collateral_value: u128, tiers: &[TierRatio]) -> u128 {
    let mut prev_boundary = 0u128;
    let mut prev_precomputed = 0u128;
    for tier in tiers {
        if collateral_value <= tier.boundary {
            let inside = collateral_value - prev_boundary;
            return prev_precomputed + inside * tier.ratio as u128 / PERCENTAGE_MULTIPLIER;
        }
        prev_boundary = tier.boundary;
        prev_precomputed = tier.precomputed;
    }
    tiers.last().map(|t| t.precomputed).unwrap_or(0)
}

/// Derive the `(tier_index, overflow_flag)` hint the circuit consumes:
/// the smallest index whose boundary admits the value, or the final index
/// with the overflow flag raised when the value exceeds every boundary.
pub fn tier_hint(collateral_value: u128, tiers: &[TierRatio]) -> (usize, bool) {
    for (i, tier) in tiers.iter().enumerate() {
        if collateral_value <= tier.boundary {
            return (i, false);
        }
    }
    (tiers.len().saturating_sub(1), true)
}
