//! Circuit-side data shapes.
//!
//! Each struct is generic over its value type: instantiated with `Fr` it is
//! the circuit assignment (concrete witness values), instantiated with
//! [`Var`](crate::api::Var) it is the allocated circuit. `define` consumes
//! the latter; the shapes are identical by construction.

/// One tier of a collateral haircut table. `precomputed` is re-derived
/// in-circuit; the allocated value is replaced before any use.
#[derive(Clone, Debug)]
pub struct TierRatioVars<V> {
    pub boundary: V,
    pub ratio: V,
    pub precomputed: V,
}

/// One slot of the custodian asset vector, tiers included.
#[derive(Clone, Debug)]
pub struct CexAssetVars<V> {
    pub total_equity: V,
    pub total_debt: V,
    pub base_price: V,
    pub loan_collateral: V,
    pub margin_collateral: V,
    pub portfolio_margin_collateral: V,
    pub loan_ratios: Vec<TierRatioVars<V>>,
    pub margin_ratios: Vec<TierRatioVars<V>>,
    pub portfolio_margin_ratios: Vec<TierRatioVars<V>>,
}

/// One declared (or padding) user asset: its index plus the three
/// `(tier index, overflow flag)` hints, one per collateral kind.
#[derive(Clone, Debug)]
pub struct UserAssetVars<V> {
    pub asset_index: V,
    pub loan_index: V,
    pub loan_flag: V,
    pub margin_index: V,
    pub margin_flag: V,
    pub portfolio_margin_index: V,
    pub portfolio_margin_flag: V,
}

/// One slot of the dense per-user update vector.
#[derive(Clone, Debug)]
pub struct UserAssetMetaVars<V> {
    pub equity: V,
    pub debt: V,
    pub loan: V,
    pub margin: V,
    pub portfolio_margin: V,
}

/// One user insertion inside the batch.
#[derive(Clone, Debug)]
pub struct CreateUserOpVars<V> {
    pub before_account_tree_root: V,
    pub after_account_tree_root: V,
    /// Padded, strictly index-sorted user asset list (tier-sized).
    pub assets: Vec<UserAssetVars<V>>,
    /// Dense update vector, one entry per custodian asset slot.
    pub assets_for_update: Vec<UserAssetMetaVars<V>>,
    pub account_index: V,
    pub account_id_hash: V,
    /// Authentication path, leaf-adjacent sibling first.
    pub account_proof: Vec<V>,
}

/// The batch circuit: one public input (the batch commitment), everything
/// else witness.
#[derive(Clone, Debug)]
pub struct BatchCreateUserCircuit<V> {
    pub batch_commitment: V,
    pub before_account_tree_root: V,
    pub after_account_tree_root: V,
    pub before_cex_commitment: V,
    pub after_cex_commitment: V,
    pub before_cex_assets: Vec<CexAssetVars<V>>,
    pub create_user_ops: Vec<CreateUserOpVars<V>>,
}
