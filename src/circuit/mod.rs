//! The batch solvency circuit.
//!
//! One instance proves a batch of account creations: the public batch
//! commitment binds the before/after tree roots and aggregate commitments,
//! every user's declared assets are priced, haircut and checked solvent,
//! each account is inserted into the sparse account tree, and a random
//! linear combination ties the declared assets to the dense aggregate
//! update vectors. An unsatisfiable witness is the only failure mode.

pub mod gadgets;
pub mod types;

use crate::api::{Api, Var};
use crate::bn254::{Fr, fr_from_be_bytes};
use crate::constants::EMPTY_ACCOUNT_LEAF;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::tiers::tier_hint;
use crate::types::BatchWitness;

use gadgets::{
    account_index_to_merkle_helper, compute_user_asset_ids_hash, compute_user_assets_commitment,
    construct_tier_ratios_lookup_table, fill_cex_asset_commitment,
    generate_rapid_arithmetic_for_collateral, get_and_check_tier_ratios_query_results,
    update_merkle_proof, verify_merkle_proof,
};
pub use types::{
    BatchCreateUserCircuit, CexAssetVars, CreateUserOpVars, TierRatioVars, UserAssetMetaVars,
    UserAssetVars,
};

impl BatchCreateUserCircuit<Fr> {
    /// Expand a stored witness into the circuit assignment for a given
    /// asset-count tier: dense update vectors, tier-padded user asset lists
    /// and the per-kind `(tier index, overflow flag)` hints.
    pub fn from_witness(witness: &BatchWitness, asset_tier: usize) -> Result<Self> {
        let asset_counts = witness.before_cex_assets.len();
        if asset_counts == 0 || witness.create_user_ops.is_empty() {
            return Err(Error::WitnessCodec("empty witness".to_owned()));
        }
        if asset_tier == 0 || asset_tier > asset_counts {
            return Err(Error::InvalidInput(format!(
                "asset tier {asset_tier} outside 1..={asset_counts}"
            )));
        }

        let before_cex_assets: Vec<CexAssetVars<Fr>> = witness
            .before_cex_assets
            .iter()
            .map(|asset| CexAssetVars {
                total_equity: Fr::from(asset.total_equity),
                total_debt: Fr::from(asset.total_debt),
                base_price: Fr::from(asset.base_price),
                loan_collateral: Fr::from(asset.loan_collateral),
                margin_collateral: Fr::from(asset.margin_collateral),
                portfolio_margin_collateral: Fr::from(asset.portfolio_margin_collateral),
                loan_ratios: tier_ratio_values(&asset.loan_ratios),
                margin_ratios: tier_ratio_values(&asset.margin_ratios),
                portfolio_margin_ratios: tier_ratio_values(&asset.portfolio_margin_ratios),
            })
            .collect();

        let mut create_user_ops = Vec::with_capacity(witness.create_user_ops.len());
        for op in &witness.create_user_ops {
            let mut assets_for_update = vec![
                UserAssetMetaVars {
                    equity: Fr::from(0u64),
                    debt: Fr::from(0u64),
                    loan: Fr::from(0u64),
                    margin: Fr::from(0u64),
                    portfolio_margin: Fr::from(0u64),
                };
                asset_counts
            ];
            for asset in &op.assets {
                let slot = assets_for_update.get_mut(asset.index as usize).ok_or_else(|| {
                    Error::WitnessCodec(format!(
                        "account {}: asset index {} outside the asset vector",
                        op.account_index, asset.index
                    ))
                })?;
                *slot = UserAssetMetaVars {
                    equity: Fr::from(asset.equity),
                    debt: Fr::from(asset.debt),
                    loan: Fr::from(asset.loan),
                    margin: Fr::from(asset.margin),
                    portfolio_margin: Fr::from(asset.portfolio_margin),
                };
            }

            create_user_ops.push(CreateUserOpVars {
                before_account_tree_root: fr_from_be_bytes(&op.before_account_tree_root),
                after_account_tree_root: fr_from_be_bytes(&op.after_account_tree_root),
                assets: padded_user_assets(op, asset_tier, &witness.before_cex_assets)?,
                assets_for_update,
                account_index: Fr::from(op.account_index),
                account_id_hash: fr_from_be_bytes(&op.account_id_hash),
                account_proof: op.account_proof.iter().map(fr_from_be_bytes).collect(),
            });
        }

        Ok(BatchCreateUserCircuit {
            batch_commitment: fr_from_be_bytes(&witness.batch_commitment),
            before_account_tree_root: fr_from_be_bytes(&witness.before_account_tree_root),
            after_account_tree_root: fr_from_be_bytes(&witness.after_account_tree_root),
            before_cex_commitment: fr_from_be_bytes(&witness.before_cex_commitment),
            after_cex_commitment: fr_from_be_bytes(&witness.after_cex_commitment),
            before_cex_assets,
            create_user_ops,
        })
    }

    /// Allocate the assignment in a backend: the batch commitment as the
    /// single public input, everything else as witness.
    pub fn allocate<A: Api>(&self, api: &mut A) -> BatchCreateUserCircuit<Var> {
        BatchCreateUserCircuit {
            batch_commitment: api.public_input(self.batch_commitment),
            before_account_tree_root: api.witness(self.before_account_tree_root),
            after_account_tree_root: api.witness(self.after_account_tree_root),
            before_cex_commitment: api.witness(self.before_cex_commitment),
            after_cex_commitment: api.witness(self.after_cex_commitment),
            before_cex_assets: self
                .before_cex_assets
                .iter()
                .map(|asset| CexAssetVars {
                    total_equity: api.witness(asset.total_equity),
                    total_debt: api.witness(asset.total_debt),
                    base_price: api.witness(asset.base_price),
                    loan_collateral: api.witness(asset.loan_collateral),
                    margin_collateral: api.witness(asset.margin_collateral),
                    portfolio_margin_collateral: api.witness(asset.portfolio_margin_collateral),
                    loan_ratios: allocate_tiers(api, &asset.loan_ratios),
                    margin_ratios: allocate_tiers(api, &asset.margin_ratios),
                    portfolio_margin_ratios: allocate_tiers(api, &asset.portfolio_margin_ratios),
                })
                .collect(),
            create_user_ops: self
                .create_user_ops
                .iter()
                .map(|op| CreateUserOpVars {
                    before_account_tree_root: api.witness(op.before_account_tree_root),
                    after_account_tree_root: api.witness(op.after_account_tree_root),
                    assets: op
                        .assets
                        .iter()
                        .map(|asset| UserAssetVars {
                            asset_index: api.witness(asset.asset_index),
                            loan_index: api.witness(asset.loan_index),
                            loan_flag: api.witness(asset.loan_flag),
                            margin_index: api.witness(asset.margin_index),
                            margin_flag: api.witness(asset.margin_flag),
                            portfolio_margin_index: api.witness(asset.portfolio_margin_index),
                            portfolio_margin_flag: api.witness(asset.portfolio_margin_flag),
                        })
                        .collect(),
                    assets_for_update: op
                        .assets_for_update
                        .iter()
                        .map(|meta| UserAssetMetaVars {
                            equity: api.witness(meta.equity),
                            debt: api.witness(meta.debt),
                            loan: api.witness(meta.loan),
                            margin: api.witness(meta.margin),
                            portfolio_margin: api.witness(meta.portfolio_margin),
                        })
                        .collect(),
                    account_index: api.witness(op.account_index),
                    account_id_hash: api.witness(op.account_id_hash),
                    account_proof: op
                        .account_proof
                        .iter()
                        .map(|node| api.witness(*node))
                        .collect(),
                })
                .collect(),
        }
    }
}

fn tier_ratio_values(tiers: &[crate::tiers::TierRatio]) -> Vec<TierRatioVars<Fr>> {
    tiers
        .iter()
        .map(|t| TierRatioVars {
            boundary: Fr::from(t.boundary),
            ratio: Fr::from(t.ratio),
            precomputed: Fr::from(t.precomputed),
        })
        .collect()
}

fn allocate_tiers<A: Api>(api: &mut A, tiers: &[TierRatioVars<Fr>]) -> Vec<TierRatioVars<Var>> {
    tiers
        .iter()
        .map(|t| TierRatioVars {
            boundary: api.witness(t.boundary),
            ratio: api.witness(t.ratio),
            precomputed: api.witness(t.precomputed),
        })
        .collect()
}

/// Pad a sparse op asset list up to the tier size, deriving the tier hints
/// for real entries. Fabricated padding indices fill the gaps below the
/// real indices first and then continue past the highest one, so the padded
/// list stays strictly increasing without collisions.
fn padded_user_assets(
    op: &crate::types::CreateUserOp,
    asset_tier: usize,
    cex_assets: &[crate::types::CexAssetInfo],
) -> Result<Vec<UserAssetVars<Fr>>> {
    if op.assets.len() > asset_tier {
        return Err(Error::InvalidInput(format!(
            "account {}: {} declared assets exceed the {asset_tier}-asset tier",
            op.account_index,
            op.assets.len()
        )));
    }
    let zero_hints = |index: u64| UserAssetVars {
        asset_index: Fr::from(index),
        loan_index: Fr::from(0u64),
        loan_flag: Fr::from(0u64),
        margin_index: Fr::from(0u64),
        margin_flag: Fr::from(0u64),
        portfolio_margin_index: Fr::from(0u64),
        portfolio_margin_flag: Fr::from(0u64),
    };

    let padding_counts = asset_tier - op.assets.len();
    let mut out = Vec::with_capacity(asset_tier);
    let mut current_padding = 0usize;
    let mut next_index = 0u64;
    for asset in &op.assets {
        while current_padding < padding_counts && next_index < asset.index as u64 {
            out.push(zero_hints(next_index));
            current_padding += 1;
            next_index += 1;
        }
        let slot = cex_assets.get(asset.index as usize).ok_or_else(|| {
            Error::WitnessCodec(format!(
                "account {}: asset index {} outside the asset vector",
                op.account_index, asset.index
            ))
        })?;
        let price = slot.base_price as u128;
        let (loan_index, loan_flag) = tier_hint(asset.loan as u128 * price, &slot.loan_ratios);
        let (margin_index, margin_flag) =
            tier_hint(asset.margin as u128 * price, &slot.margin_ratios);
        let (portfolio_index, portfolio_flag) = tier_hint(
            asset.portfolio_margin as u128 * price,
            &slot.portfolio_margin_ratios,
        );
        out.push(UserAssetVars {
            asset_index: Fr::from(asset.index),
            loan_index: Fr::from(loan_index as u64),
            loan_flag: Fr::from(loan_flag as u64),
            margin_index: Fr::from(margin_index as u64),
            margin_flag: Fr::from(margin_flag as u64),
            portfolio_margin_index: Fr::from(portfolio_index as u64),
            portfolio_margin_flag: Fr::from(portfolio_flag as u64),
        });
        next_index = asset.index as u64 + 1;
    }
    while out.len() < asset_tier {
        out.push(zero_hints(next_index));
        next_index += 1;
    }
    Ok(out)
}

impl BatchCreateUserCircuit<Var> {
    /// Enforce the full batch statement. Assertion order mirrors the
    /// top-level description: commitment binding, pre-state aggregate,
    /// endpoint alignment, per-user blocks, the random-linear-combination
    /// consistency check, the post-state aggregate, then pairwise root
    /// chaining.
    pub fn define<A: Api>(&self, api: &mut A) {
        let actual_batch_commitment = api.poseidon(&[
            self.before_account_tree_root,
            self.after_account_tree_root,
            self.before_cex_commitment,
            self.after_cex_commitment,
        ]);
        api.assert_is_equal(self.batch_commitment, actual_batch_commitment);

        let mut cex_assets = self.before_cex_assets.clone();
        let mut cex_asset_elements = Vec::new();
        let asset_price_table = api.table_new();
        for asset in cex_assets.iter_mut() {
            api.range_check(asset.total_equity, 64);
            api.range_check(asset.total_debt, 64);
            api.range_check(asset.base_price, 64);
            api.range_check(asset.loan_collateral, 64);
            api.range_check(asset.margin_collateral, 64);
            api.range_check(asset.portfolio_margin_collateral, 64);

            fill_cex_asset_commitment(api, asset, &mut cex_asset_elements);
            generate_rapid_arithmetic_for_collateral(api, &mut asset.loan_ratios);
            generate_rapid_arithmetic_for_collateral(api, &mut asset.margin_ratios);
            generate_rapid_arithmetic_for_collateral(api, &mut asset.portfolio_margin_ratios);

            api.table_insert(asset_price_table, asset.base_price);
        }
        let actual_cex_commitment = api.poseidon(&cex_asset_elements);
        api.assert_is_equal(self.before_cex_commitment, actual_cex_commitment);

        let first_op = &self.create_user_ops[0];
        let last_op = &self.create_user_ops[self.create_user_ops.len() - 1];
        api.assert_is_equal(self.before_account_tree_root, first_op.before_account_tree_root);
        api.assert_is_equal(self.after_account_tree_root, last_op.after_account_tree_root);

        let tier_count = cex_assets[0].loan_ratios.len();
        let tier_section_len = 3 * (tier_count + 1);
        let loan_table = construct_tier_ratios_lookup_table(api, &cex_assets, |a| a.loan_ratios.as_slice());
        let margin_table =
            construct_tier_ratios_lookup_table(api, &cex_assets, |a| a.margin_ratios.as_slice());
        let portfolio_table =
            construct_tier_ratios_lookup_table(api, &cex_assets, |a| a.portfolio_margin_ratios.as_slice());

        let tree_depth = first_op.account_proof.len();
        let empty_leaf = api.constant(*EMPTY_ACCOUNT_LEAF);
        let one = api.constant(Fr::from(1u64));
        let five = api.constant(Fr::from(5u64));

        let mut user_asset_id_hashes = Vec::with_capacity(self.create_user_ops.len() + 1);
        let mut user_assets_queries = Vec::with_capacity(self.create_user_ops.len());
        let mut user_assets_results = Vec::with_capacity(self.create_user_ops.len());

        for op in &self.create_user_ops {
            let helper = account_index_to_merkle_helper(api, op.account_index, tree_depth);
            // The slot must be unoccupied: this circuit models creation only.
            verify_merkle_proof(
                api,
                op.before_account_tree_root,
                empty_leaf,
                &op.account_proof,
                &helper,
            );

            let user_assets_table = api.table_new();
            for meta in &op.assets_for_update {
                api.table_insert(user_assets_table, meta.equity);
                api.table_insert(user_assets_table, meta.debt);
                api.table_insert(user_assets_table, meta.loan);
                api.table_insert(user_assets_table, meta.margin);
                api.table_insert(user_assets_table, meta.portfolio_margin);
            }

            // Strictly increasing asset indices imply uniqueness.
            for j in 0..op.assets.len().saturating_sub(1) {
                api.range_check(op.assets[j].asset_index, 16);
                let cr = api.cmp(op.assets[j + 1].asset_index, op.assets[j].asset_index, 16);
                api.assert_is_equal(cr, one);
            }

            let asset_indexes: Vec<Var> = op.assets.iter().map(|a| a.asset_index).collect();
            user_asset_id_hashes.push(compute_user_asset_ids_hash(api, &asset_indexes));

            let mut queries = Vec::with_capacity(op.assets.len() * 5);
            let mut price_queries = Vec::with_capacity(op.assets.len());
            for asset in &op.assets {
                let base = api.mul(asset.asset_index, five);
                let mut query = base;
                queries.push(query);
                for _ in 1..5 {
                    query = api.add(query, one);
                    queries.push(query);
                }
                price_queries.push(asset.asset_index);
            }
            let results = api.lookup(user_assets_table, &queries);
            let asset_prices = api.lookup(asset_price_table, &price_queries);

            let mut total_user_equity = api.constant(Fr::from(0u64));
            let mut total_user_debt = api.constant(Fr::from(0u64));
            let mut total_user_collateral = api.constant(Fr::from(0u64));
            let mut flatten_assets = Vec::with_capacity(op.assets.len() * 6);
            for (j, asset) in op.assets.iter().enumerate() {
                let equity = results[j * 5];
                let debt = results[j * 5 + 1];
                let loan = results[j * 5 + 2];
                let margin = results[j * 5 + 3];
                let portfolio_margin = results[j * 5 + 4];
                api.range_check(equity, 64);
                api.range_check(debt, 64);
                api.range_check(loan, 64);
                api.range_check(margin, 64);
                api.range_check(portfolio_margin, 64);

                flatten_assets.extend([
                    asset.asset_index,
                    equity,
                    debt,
                    loan,
                    margin,
                    portfolio_margin,
                ]);

                let backed = api.add(loan, margin);
                let backed = api.add(backed, portfolio_margin);
                api.range_check(backed, 64);
                api.assert_is_less_or_equal(backed, equity, 64);

                let loan_value = get_and_check_tier_ratios_query_results(
                    api,
                    loan_table,
                    asset.asset_index,
                    loan,
                    asset.loan_index,
                    asset.loan_flag,
                    asset_prices[j],
                    tier_section_len,
                );
                let margin_value = get_and_check_tier_ratios_query_results(
                    api,
                    margin_table,
                    asset.asset_index,
                    margin,
                    asset.margin_index,
                    asset.margin_flag,
                    asset_prices[j],
                    tier_section_len,
                );
                let portfolio_value = get_and_check_tier_ratios_query_results(
                    api,
                    portfolio_table,
                    asset.asset_index,
                    portfolio_margin,
                    asset.portfolio_margin_index,
                    asset.portfolio_margin_flag,
                    asset_prices[j],
                    tier_section_len,
                );
                total_user_collateral = api.add(total_user_collateral, loan_value);
                total_user_collateral = api.add(total_user_collateral, margin_value);
                total_user_collateral = api.add(total_user_collateral, portfolio_value);

                let priced_equity = api.mul(equity, asset_prices[j]);
                total_user_equity = api.add(total_user_equity, priced_equity);
                let priced_debt = api.mul(debt, asset_prices[j]);
                total_user_debt = api.add(total_user_debt, priced_debt);
            }

            // Running after-state update; range checks happen once at the
            // end over the accumulated sums.
            for (slot, meta) in cex_assets.iter_mut().zip(&op.assets_for_update) {
                slot.total_equity = api.add(slot.total_equity, meta.equity);
                slot.total_debt = api.add(slot.total_debt, meta.debt);
                slot.loan_collateral = api.add(slot.loan_collateral, meta.loan);
                slot.margin_collateral = api.add(slot.margin_collateral, meta.margin);
                slot.portfolio_margin_collateral =
                    api.add(slot.portfolio_margin_collateral, meta.portfolio_margin);
            }

            api.range_check(total_user_debt, 128);
            api.range_check(total_user_collateral, 128);
            api.assert_is_less_or_equal(total_user_debt, total_user_collateral, 128);

            let user_assets_commitment = compute_user_assets_commitment(api, &flatten_assets);
            let account_hash = api.poseidon(&[
                op.account_id_hash,
                total_user_equity,
                total_user_debt,
                total_user_collateral,
                user_assets_commitment,
            ]);
            let actual_root = update_merkle_proof(api, account_hash, &op.account_proof, &helper);
            api.assert_is_equal(actual_root, op.after_account_tree_root);

            user_assets_queries.push(queries);
            user_assets_results.push(results);
        }

        // Every non-zero entry of the dense update vectors must correspond
        // to a declared user asset. The Fiat-Shamir challenge binds the
        // asset-id hashes and the public commitment, then one random linear
        // combination per op compares the queried results against the full
        // vector.
        user_asset_id_hashes.push(self.batch_commitment);
        let random_challenge = api.poseidon(&user_asset_id_hashes);
        let powers_count = 5 * self.before_cex_assets.len();
        let mut powers_of_challenge = Vec::with_capacity(powers_count);
        powers_of_challenge.push(random_challenge);
        let powers_table = api.table_new();
        api.table_insert(powers_table, random_challenge);
        for i in 1..powers_count {
            let next = api.mul(powers_of_challenge[i - 1], random_challenge);
            powers_of_challenge.push(next);
            api.table_insert(powers_table, next);
        }

        for (i, op) in self.create_user_ops.iter().enumerate() {
            let power_results = api.lookup(powers_table, &user_assets_queries[i]);
            let mut sum_a = api.constant(Fr::from(0u64));
            for (power, result) in power_results.iter().zip(&user_assets_results[i]) {
                let term = api.mul(*power, *result);
                sum_a = api.add(sum_a, term);
            }
            let mut sum_b = api.constant(Fr::from(0u64));
            for (j, meta) in op.assets_for_update.iter().enumerate() {
                let fields = [
                    meta.equity,
                    meta.debt,
                    meta.loan,
                    meta.margin,
                    meta.portfolio_margin,
                ];
                for (k, field) in fields.iter().enumerate() {
                    let term = api.mul(*field, powers_of_challenge[5 * j + k]);
                    sum_b = api.add(sum_b, term);
                }
            }
            api.assert_is_equal(sum_a, sum_b);
        }

        let mut after_cex_elements = Vec::with_capacity(cex_asset_elements.len());
        for asset in &cex_assets {
            api.range_check(asset.total_equity, 64);
            api.range_check(asset.total_debt, 64);
            api.range_check(asset.loan_collateral, 64);
            api.range_check(asset.margin_collateral, 64);
            api.range_check(asset.portfolio_margin_collateral, 64);
            fill_cex_asset_commitment(api, asset, &mut after_cex_elements);
        }
        let actual_after_cex_commitment = api.poseidon(&after_cex_elements);
        api.assert_is_equal(actual_after_cex_commitment, self.after_cex_commitment);

        for pair in self.create_user_ops.windows(2) {
            api.assert_is_equal(
                pair[0].after_account_tree_root,
                pair[1].before_account_tree_root,
            );
        }
    }
}

/// Run a stored witness through the native engine: `Ok` exactly when a
/// sound proving backend would accept it.
pub fn check_witness(witness: &BatchWitness, asset_tier: usize) -> Result<()> {
    let assignment = BatchCreateUserCircuit::from_witness(witness, asset_tier)?;
    let mut engine = Engine::new();
    let circuit = assignment.allocate(&mut engine);
    circuit.define(&mut engine);
    engine.finish()?;
    Ok(())
}
