//! Shared domain types used by the witness assembler, the circuit
//! assignment and the external-facing proof formats.
//!
//! These structs are deliberately small mirrors of the data the batch
//! circuit works with (custodian asset records, user accounts, per-batch
//! witnesses). Stored forms keep numbers as plain integers and hashes as
//! canonical 32-byte values so they serialize without any field-element
//! awareness.

use serde::{Deserialize, Serialize};

use crate::bn254::{Fr, fr_cmp};
use crate::constants::ACCOUNT_TREE_DEPTH;
use crate::error::{Error, Result};
use crate::tiers::{TierRatio, haircut_value, pad_tier_ratios, validate_tier_ratios};

/// One slot of the custodian per-asset state vector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CexAssetInfo {
    pub symbol: String,
    pub index: u32,
    pub total_equity: u64,
    pub total_debt: u64,
    pub base_price: u64,
    pub loan_collateral: u64,
    pub margin_collateral: u64,
    pub portfolio_margin_collateral: u64,
    pub loan_ratios: Vec<TierRatio>,
    pub margin_ratios: Vec<TierRatio>,
    pub portfolio_margin_ratios: Vec<TierRatio>,
}

impl CexAssetInfo {
    /// Reserved (unlisted) slot: zero price, empty padded tier tables.
    /// Contributes neutrally to every commitment and haircut.
    pub fn reserved(index: u32, tier_count: usize) -> Self {
        let empty = pad_tier_ratios(Vec::new(), tier_count).expect("empty table always pads");
        CexAssetInfo {
            symbol: "reserved".to_owned(),
            index,
            loan_ratios: empty.clone(),
            margin_ratios: empty.clone(),
            portfolio_margin_ratios: empty,
            ..CexAssetInfo::default()
        }
    }

    pub fn validate(&self, tier_count: usize) -> Result<()> {
        for (kind, tiers) in [
            ("loan", &self.loan_ratios),
            ("margin", &self.margin_ratios),
            ("portfolio margin", &self.portfolio_margin_ratios),
        ] {
            if tiers.len() != tier_count {
                return Err(Error::InvalidTierTable(format!(
                    "{}: {kind} table has {} tiers, want {tier_count}",
                    self.symbol,
                    tiers.len()
                )));
            }
            validate_tier_ratios(tiers)
                .map_err(|e| Error::InvalidTierTable(format!("{}: {kind}: {e}", self.symbol)))?;
        }
        Ok(())
    }
}

/// Haircut-weighted priced value of one user's collateral in one asset.
pub fn collateral_haircut(loan: u64, margin: u64, portfolio_margin: u64, asset: &CexAssetInfo) -> u128 {
    let price = asset.base_price as u128;
    haircut_value(loan as u128 * price, &asset.loan_ratios)
        + haircut_value(margin as u128 * price, &asset.margin_ratios)
        + haircut_value(portfolio_margin as u128 * price, &asset.portfolio_margin_ratios)
}

/// One declared asset position of a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAsset {
    pub index: u16,
    pub equity: u64,
    pub debt: u64,
    pub loan: u64,
    pub margin: u64,
    pub portfolio_margin: u64,
}

impl AccountAsset {
    pub fn is_empty(&self) -> bool {
        self.equity == 0
            && self.debt == 0
            && self.loan == 0
            && self.margin == 0
            && self.portfolio_margin == 0
    }
}

/// A validated user account with priced totals.
///
/// Totals are field elements: they are sums of 128-bit products and feed the
/// account leaf hash directly. Integer comparisons go through the canonical
/// bigint representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_index: u32,
    pub account_id: Fr,
    pub total_equity: Fr,
    pub total_debt: Fr,
    pub total_collateral: Fr,
    pub assets: Vec<AccountAsset>,
}

impl AccountInfo {
    /// Build and validate an account from its declared asset list.
    ///
    /// Rejects unsorted or out-of-range asset indices, per-asset collateral
    /// above equity, and debt above the haircut-weighted collateral. The
    /// totals are recomputed here; callers never supply them.
    pub fn from_assets(
        account_index: u32,
        account_id: Fr,
        assets: Vec<AccountAsset>,
        cex_assets: &[CexAssetInfo],
    ) -> Result<Self> {
        if (account_index as u64) >> ACCOUNT_TREE_DEPTH != 0 {
            return Err(Error::InvalidInput(format!(
                "account index {account_index} outside the tree key space"
            )));
        }
        let mut total_equity = Fr::from(0u64);
        let mut total_debt = Fr::from(0u64);
        let mut total_collateral = Fr::from(0u64);
        let mut prev_index: Option<u16> = None;
        for asset in &assets {
            if let Some(prev) = prev_index {
                if asset.index <= prev {
                    return Err(Error::InvalidInput(format!(
                        "account {account_index}: asset indices not strictly increasing at {}",
                        asset.index
                    )));
                }
            }
            prev_index = Some(asset.index);
            if asset.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "account {account_index}: empty entry for asset {} must be omitted",
                    asset.index
                )));
            }
            let slot = cex_assets.get(asset.index as usize).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "account {account_index}: unknown asset index {}",
                    asset.index
                ))
            })?;
            let backed = asset
                .loan
                .checked_add(asset.margin)
                .and_then(|v| v.checked_add(asset.portfolio_margin))
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "account {account_index}: collateral sum overflows for asset {}",
                        asset.index
                    ))
                })?;
            if backed > asset.equity {
                return Err(Error::InvalidInput(format!(
                    "account {account_index}: collateral {backed} above equity {} for asset {}",
                    asset.equity, asset.index
                )));
            }
            let price = slot.base_price as u128;
            total_equity += Fr::from(asset.equity as u128 * price);
            total_debt += Fr::from(asset.debt as u128 * price);
            total_collateral += Fr::from(collateral_haircut(
                asset.loan,
                asset.margin,
                asset.portfolio_margin,
                slot,
            ));
        }
        if fr_cmp(&total_debt, &total_collateral) == std::cmp::Ordering::Greater {
            return Err(Error::InvalidInput(format!(
                "account {account_index}: total debt above haircut collateral"
            )));
        }
        Ok(AccountInfo {
            account_index,
            account_id,
            total_equity,
            total_debt,
            total_collateral,
            assets,
        })
    }

    /// Zero-valued padding account used to fill the tail of a batch.
    pub fn padding(account_index: u32) -> Self {
        AccountInfo {
            account_index,
            account_id: Fr::from(0u64),
            total_equity: Fr::from(0u64),
            total_debt: Fr::from(0u64),
            total_collateral: Fr::from(0u64),
            assets: Vec::new(),
        }
    }

    pub fn non_empty_assets_count(&self) -> usize {
        self.assets.iter().filter(|a| !a.is_empty()).count()
    }
}

/// One user insertion recorded inside a batch witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserOp {
    pub before_account_tree_root: [u8; 32],
    pub after_account_tree_root: [u8; 32],
    /// Sparse list of the user's real asset positions, sorted by index.
    pub assets: Vec<AccountAsset>,
    pub account_index: u32,
    pub account_id_hash: [u8; 32],
    pub account_proof: [[u8; 32]; ACCOUNT_TREE_DEPTH],
}

/// Everything one circuit instance consumes, in storable form.
///
/// Assembled once per batch, serialized into the witness store, decoded by
/// a prover worker and expanded into the circuit assignment. The dense
/// per-op update vectors and tier hints are not stored; they are derived
/// deterministically from the sparse asset lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWitness {
    pub batch_commitment: [u8; 32],
    pub before_account_tree_root: [u8; 32],
    pub after_account_tree_root: [u8; 32],
    pub before_cex_commitment: [u8; 32],
    pub after_cex_commitment: [u8; 32],
    pub before_cex_assets: Vec<CexAssetInfo>,
    pub create_user_ops: Vec<CreateUserOp>,
}
