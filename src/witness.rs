//! Batch witness assembly.
//!
//! The generator walks the validated account set in insertion order, one
//! batch at a time: snapshot the aggregate state, prove-and-insert each
//! account into the tree, snapshot again, and bind the four endpoints into
//! the batch commitment. Leaf hashes are precomputed on a worker pool; the
//! tree mutation loop itself is strictly sequential, because every op's
//! `after_root` must chain into the next op's `before_root`.
//!
//! A witness is assembled once, serialized into the witness store and
//! discarded. On restart the generator recovers its aggregate state from
//! the latest stored witness and rolls the tree back to the matching
//! version; a tree behind the recorded height is fatal.

use std::io::{Read, Write};
use std::thread;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::account_tree::AccountTree;
use crate::bn254::{Fr, fr_to_be_bytes};
use crate::constants::BATCH_OPS_COUNT_TIERS;
use crate::error::{Error, Result};
use crate::packing::{account_leaf_hash, cex_assets_commitment};
use crate::poseidon::batch_commitment_hash;
use crate::store::{WitnessRecord, WitnessStatus, WitnessStore};
use crate::tiers::compute_precomputed;
use crate::types::{AccountInfo, BatchWitness, CexAssetInfo, CreateUserOp};

/// Batch sizing: ordered `(assets per user, ops per batch)` tiers.
#[derive(Clone, Debug)]
pub struct BatchTiers(Vec<(usize, usize)>);

impl BatchTiers {
    pub fn new(mut tiers: Vec<(usize, usize)>) -> Result<Self> {
        tiers.sort_unstable();
        if tiers.is_empty() {
            return Err(Error::InvalidInput("no batch tiers".to_owned()));
        }
        for window in tiers.windows(2) {
            if window[0].0 == window[1].0 {
                return Err(Error::InvalidInput(format!(
                    "duplicate batch tier {}",
                    window[0].0
                )));
            }
        }
        if tiers.iter().any(|&(assets, ops)| assets == 0 || ops == 0) {
            return Err(Error::InvalidInput("degenerate batch tier".to_owned()));
        }
        Ok(BatchTiers(tiers))
    }

    /// Smallest tier admitting `count` declared assets.
    pub fn asset_tier(&self, count: usize) -> Option<usize> {
        self.0
            .iter()
            .map(|&(assets, _)| assets)
            .find(|&assets| count <= assets)
    }

    pub fn ops_count(&self, asset_tier: usize) -> Option<usize> {
        self.0
            .iter()
            .find(|&&(assets, _)| assets == asset_tier)
            .map(|&(_, ops)| ops)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0.iter().copied()
    }
}

impl Default for BatchTiers {
    fn default() -> Self {
        BatchTiers::new(BATCH_OPS_COUNT_TIERS.to_vec()).expect("builtin tiers are well-formed")
    }
}

/// Serialize a batch witness: bincode then gzip. Deterministic, so two
/// assemblers over the same input produce byte-identical blobs.
pub fn encode_witness(witness: &BatchWitness) -> Result<Vec<u8>> {
    let raw = bincode::serialize(witness).map_err(|e| Error::WitnessCodec(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::WitnessCodec(e.to_string()))
}

pub fn decode_witness(data: &[u8]) -> Result<BatchWitness> {
    let mut raw = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(|e| Error::WitnessCodec(e.to_string()))?;
    bincode::deserialize(&raw).map_err(|e| Error::WitnessCodec(e.to_string()))
}

/// Asset-count tier a stored witness was assembled at, inferred from the
/// widest op in the batch. Padding ops carry no assets, and every batch
/// holds at least one real op, so the inference is stable.
pub fn witness_asset_tier(witness: &BatchWitness, tiers: &BatchTiers) -> Result<usize> {
    let widest = witness
        .create_user_ops
        .iter()
        .map(|op| op.assets.len())
        .max()
        .unwrap_or(0);
    tiers.asset_tier(widest).ok_or_else(|| {
        Error::InvalidInput(format!("no batch tier admits {widest} assets per user"))
    })
}

/// Replay a witness's user assets onto its pre-state aggregates and check
/// the result against the recorded post-state commitment. This is how a
/// restarted generator recovers its running custodian state.
pub fn recover_after_cex_assets(witness: &BatchWitness) -> Result<Vec<CexAssetInfo>> {
    let mut cex_assets = witness.before_cex_assets.clone();
    for op in &witness.create_user_ops {
        apply_account_assets(&mut cex_assets, &op.assets)?;
    }
    let commitment = fr_to_be_bytes(&cex_assets_commitment(&cex_assets));
    if commitment != witness.after_cex_commitment {
        return Err(Error::WitnessCodec(
            "recovered aggregates disagree with the recorded commitment".to_owned(),
        ));
    }
    Ok(cex_assets)
}

fn apply_account_assets(
    cex_assets: &mut [CexAssetInfo],
    assets: &[crate::types::AccountAsset],
) -> Result<()> {
    for asset in assets {
        let slot = cex_assets.get_mut(asset.index as usize).ok_or_else(|| {
            Error::InvalidInput(format!("asset index {} outside the asset vector", asset.index))
        })?;
        let overflow = |what: &str| {
            Error::InvalidInput(format!("aggregate {what} overflows for asset {}", asset.index))
        };
        slot.total_equity = slot
            .total_equity
            .checked_add(asset.equity)
            .ok_or_else(|| overflow("equity"))?;
        slot.total_debt = slot
            .total_debt
            .checked_add(asset.debt)
            .ok_or_else(|| overflow("debt"))?;
        slot.loan_collateral = slot
            .loan_collateral
            .checked_add(asset.loan)
            .ok_or_else(|| overflow("loan collateral"))?;
        slot.margin_collateral = slot
            .margin_collateral
            .checked_add(asset.margin)
            .ok_or_else(|| overflow("margin collateral"))?;
        slot.portfolio_margin_collateral = slot
            .portfolio_margin_collateral
            .checked_add(asset.portfolio_margin)
            .ok_or_else(|| overflow("portfolio margin collateral"))?;
    }
    Ok(())
}

/// Extend a tier group with zero accounts until it fills whole batches.
/// Padding indices continue the global sequential range.
pub fn padding_accounts(
    accounts: &mut Vec<AccountInfo>,
    ops_per_batch: usize,
    padding_start_index: &mut u32,
) {
    let remainder = accounts.len() % ops_per_batch;
    if remainder == 0 && !accounts.is_empty() {
        return;
    }
    let missing = ops_per_batch - remainder;
    for _ in 0..missing {
        accounts.push(AccountInfo::padding(*padding_start_index));
        *padding_start_index += 1;
    }
}

pub struct WitnessGenerator<T, S> {
    tree: T,
    store: S,
    cex_assets: Vec<CexAssetInfo>,
    tiers: BatchTiers,
}

impl<T: AccountTree, S: WitnessStore> WitnessGenerator<T, S> {
    /// Validate the custodian state vector and wire up the collaborators.
    ///
    /// Tier tables must all have the shared (even) tier count, satisfy the
    /// monotonicity bounds, and carry correctly precomputed haircut values;
    /// anything else is rejected here, before a single witness exists.
    pub fn new(tree: T, store: S, cex_assets: Vec<CexAssetInfo>, tiers: BatchTiers) -> Result<Self> {
        let first = cex_assets
            .first()
            .ok_or_else(|| Error::InvalidInput("empty custodian asset vector".to_owned()))?;
        let tier_count = first.loan_ratios.len();
        for asset in &cex_assets {
            asset.validate(tier_count)?;
            for (kind, table) in [
                ("loan", &asset.loan_ratios),
                ("margin", &asset.margin_ratios),
                ("portfolio margin", &asset.portfolio_margin_ratios),
            ] {
                let mut recomputed = table.clone();
                compute_precomputed(&mut recomputed);
                if recomputed != *table {
                    return Err(Error::InvalidTierTable(format!(
                        "{}: {kind} precomputed values are inconsistent",
                        asset.symbol
                    )));
                }
            }
        }
        for (asset_tier, _) in tiers.iter() {
            if asset_tier > cex_assets.len() {
                return Err(Error::InvalidInput(format!(
                    "batch tier {asset_tier} wider than the asset vector"
                )));
            }
        }
        Ok(WitnessGenerator { tree, store, cex_assets, tiers })
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cex_assets(&self) -> &[CexAssetInfo] {
        &self.cex_assets
    }

    /// Assemble and publish witnesses for every batch of `accounts`.
    ///
    /// Restart-safe: batches at or below the recovered height are skipped,
    /// their effects being already part of the recovered state.
    pub fn run(&mut self, accounts: Vec<AccountInfo>) -> Result<()> {
        let recovered_height = self.recover()?;

        let mut padding_start_index = accounts
            .iter()
            .map(|a| a.account_index + 1)
            .max()
            .unwrap_or(0);
        let mut groups: Vec<(usize, Vec<AccountInfo>)> = Vec::new();
        for account in accounts {
            let tier = self
                .tiers
                .asset_tier(account.non_empty_assets_count())
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "account {}: no batch tier admits {} assets",
                        account.account_index,
                        account.non_empty_assets_count()
                    ))
                })?;
            if let Some(position) = groups.iter().position(|&(t, _)| t == tier) {
                groups[position].1.push(account);
            } else {
                groups.push((tier, vec![account]));
            }
        }
        groups.sort_by_key(|&(tier, _)| tier);

        let mut batch_height: i64 = 0;
        for (asset_tier, mut group) in groups {
            let ops_per_batch = self
                .tiers
                .ops_count(asset_tier)
                .ok_or_else(|| Error::InvalidInput(format!("unknown tier {asset_tier}")))?;
            padding_accounts(&mut group, ops_per_batch, &mut padding_start_index);
            log::info!(
                "tier {asset_tier}: {} ops in {} batches",
                group.len(),
                group.len() / ops_per_batch
            );
            for batch in group.chunks(ops_per_batch) {
                if batch_height <= recovered_height {
                    batch_height += 1;
                    continue;
                }
                self.execute_batch(batch, asset_tier, batch_height)?;
                batch_height += 1;
            }
        }
        log::info!("witness run finished at height {}", batch_height - 1);
        Ok(())
    }

    /// Restore the running aggregate state and tree version from the latest
    /// stored witness. Returns the recovered batch height (-1 when the
    /// store is empty).
    fn recover(&mut self) -> Result<i64> {
        let height = match self.store.latest_witness() {
            Ok(record) => {
                let witness = decode_witness(&record.witness_data)?;
                self.cex_assets = recover_after_cex_assets(&witness)?;
                log::info!("recovered aggregates from height {}", record.height);
                record.height
            }
            Err(Error::NotFound) => -1,
            Err(err) => return Err(err),
        };
        let expected_version = (height + 1) as u64;
        let tree_version = self.tree.latest_version();
        if tree_version > expected_version {
            log::warn!("rolling tree back from version {tree_version} to {expected_version}");
            self.tree.rollback(expected_version)?;
        } else if tree_version < expected_version {
            return Err(Error::VersionMismatch {
                tree_version,
                expected: expected_version,
            });
        }
        Ok(height)
    }

    fn execute_batch(
        &mut self,
        batch: &[AccountInfo],
        asset_tier: usize,
        batch_height: i64,
    ) -> Result<()> {
        let leaves = compute_account_leaves(batch, asset_tier)?;

        let before_account_tree_root = self.tree.root();
        let before_cex_assets = self.cex_assets.clone();
        let before_cex_commitment = cex_assets_commitment(&before_cex_assets);

        let mut create_user_ops = Vec::with_capacity(batch.len());
        for (account, leaf) in batch.iter().zip(leaves) {
            let op_before_root = self.tree.root();
            let account_proof = self.tree.get_proof(account.account_index)?;
            apply_account_assets(&mut self.cex_assets, &account.assets)?;
            self.tree.set(account.account_index, leaf)?;
            create_user_ops.push(CreateUserOp {
                before_account_tree_root: fr_to_be_bytes(&op_before_root),
                after_account_tree_root: fr_to_be_bytes(&self.tree.root()),
                assets: account.assets.clone(),
                account_index: account.account_index,
                account_id_hash: fr_to_be_bytes(&account.account_id),
                account_proof: array_init::array_init(|i| fr_to_be_bytes(&account_proof[i])),
            });
        }

        let after_cex_commitment = cex_assets_commitment(&self.cex_assets);
        let after_account_tree_root = self.tree.root();
        let batch_commitment = batch_commitment_hash(
            before_account_tree_root,
            after_account_tree_root,
            before_cex_commitment,
            after_cex_commitment,
        );

        let witness = BatchWitness {
            batch_commitment: fr_to_be_bytes(&batch_commitment),
            before_account_tree_root: fr_to_be_bytes(&before_account_tree_root),
            after_account_tree_root: fr_to_be_bytes(&after_account_tree_root),
            before_cex_commitment: fr_to_be_bytes(&before_cex_commitment),
            after_cex_commitment: fr_to_be_bytes(&after_cex_commitment),
            before_cex_assets,
            create_user_ops,
        };
        let witness_data = encode_witness(&witness)?;
        self.tree.commit()?;
        self.store.create_witness(WitnessRecord {
            height: batch_height,
            witness_data,
            status: WitnessStatus::Published,
        })?;
        if batch_height % 100 == 0 {
            log::info!("published witness for batch {batch_height}");
        }
        Ok(())
    }
}

/// Precompute the account leaf hashes of one batch on a worker pool.
/// Results land in per-op slots, so the sequential tree loop reads them in
/// op order regardless of scheduling.
fn compute_account_leaves(batch: &[AccountInfo], asset_tier: usize) -> Result<Vec<Fr>> {
    let workers = thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2).max(1))
        .unwrap_or(1);
    let chunk_size = batch.len().div_ceil(workers);
    let mut leaves = vec![Fr::from(0u64); batch.len()];
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for (accounts, slots) in batch.chunks(chunk_size).zip(leaves.chunks_mut(chunk_size)) {
            handles.push(scope.spawn(move || -> Result<()> {
                for (account, slot) in accounts.iter().zip(slots.iter_mut()) {
                    *slot = account_leaf_hash(account, asset_tier)?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("leaf hash worker panicked")?;
        }
        Ok(())
    })
    .map(|()| leaves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_tree::MemAccountTree;
    use crate::store::MemWitnessStore;
    use crate::tiers::TierRatio;
    use crate::types::AccountAsset;

    fn cex_assets() -> Vec<CexAssetInfo> {
        let mut tiers = vec![
            TierRatio { boundary: 100, ratio: 100, precomputed: 0 },
            TierRatio { boundary: 200, ratio: 50, precomputed: 0 },
        ];
        compute_precomputed(&mut tiers);
        (0..2)
            .map(|i| CexAssetInfo {
                symbol: format!("asset{i}"),
                index: i,
                base_price: 1,
                loan_ratios: tiers.clone(),
                margin_ratios: tiers.clone(),
                portfolio_margin_ratios: tiers.clone(),
                ..CexAssetInfo::default()
            })
            .collect()
    }

    fn account(index: u32, equity: u64) -> AccountInfo {
        AccountInfo::from_assets(
            index,
            Fr::from(1000 + index as u64),
            vec![AccountAsset { index: 0, equity, ..AccountAsset::default() }],
            &cex_assets(),
        )
        .unwrap()
    }

    fn generator() -> WitnessGenerator<MemAccountTree, MemWitnessStore> {
        WitnessGenerator::new(
            MemAccountTree::new(),
            MemWitnessStore::new(),
            cex_assets(),
            BatchTiers::new(vec![(2, 2)]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn default_tiers_select_the_smallest_fit() {
        let tiers = BatchTiers::default();
        assert_eq!(tiers.asset_tier(1), Some(50));
        assert_eq!(tiers.asset_tier(50), Some(50));
        assert_eq!(tiers.asset_tier(51), Some(500));
        assert_eq!(tiers.asset_tier(501), None);
        assert_eq!(tiers.ops_count(50), Some(700));
        assert_eq!(tiers.ops_count(500), Some(92));
        assert_eq!(tiers.ops_count(51), None);
    }

    #[test]
    fn encode_decode_round_trip_is_byte_identical() {
        let mut generator = generator();
        generator.run(vec![account(0, 10)]).unwrap();
        let record = generator.store().latest_witness().unwrap();
        let witness = decode_witness(&record.witness_data).unwrap();
        assert_eq!(encode_witness(&witness).unwrap(), record.witness_data);
    }

    #[test]
    fn batches_pad_and_chain() {
        let mut generator = generator();
        generator
            .run(vec![account(0, 10), account(1, 20), account(2, 30)])
            .unwrap();
        // Three accounts at two ops per batch: two batches, one padding op.
        assert_eq!(generator.store().row_count().unwrap(), 2);

        let first = decode_witness(&generator.store().witness_by_height(0).unwrap().witness_data)
            .unwrap();
        let second = decode_witness(&generator.store().witness_by_height(1).unwrap().witness_data)
            .unwrap();
        assert_eq!(first.after_account_tree_root, second.before_account_tree_root);
        assert_eq!(first.after_cex_commitment, second.before_cex_commitment);
        assert_eq!(second.create_user_ops[1].assets.len(), 0);
        assert_eq!(second.create_user_ops[1].account_index, 3);
        assert_eq!(generator.tree().latest_version(), 2);
    }

    #[test]
    fn recovery_skips_generated_batches() {
        let mut generator = generator();
        let accounts: Vec<AccountInfo> = (0..4).map(|i| account(i, 10 * (i as u64 + 1))).collect();
        generator.run(accounts.clone()).unwrap();
        let final_root = generator.tree().root();
        let rows = generator.store().row_count().unwrap();

        // Re-running over the same input is a no-op.
        generator.run(accounts).unwrap();
        assert_eq!(generator.store().row_count().unwrap(), rows);
        assert_eq!(generator.tree().root(), final_root);
    }

    #[test]
    fn recovered_aggregates_match() {
        let mut generator = generator();
        generator.run(vec![account(0, 10), account(1, 20)]).unwrap();
        let record = generator.store().latest_witness().unwrap();
        let witness = decode_witness(&record.witness_data).unwrap();
        let recovered = recover_after_cex_assets(&witness).unwrap();
        assert_eq!(recovered, generator.cex_assets());
        assert_eq!(recovered[0].total_equity, 30);
    }

    #[test]
    fn bad_precomputed_values_are_rejected() {
        let mut assets = cex_assets();
        assets[0].loan_ratios[1].precomputed += 1;
        let err = WitnessGenerator::new(
            MemAccountTree::new(),
            MemWitnessStore::new(),
            assets,
            BatchTiers::new(vec![(2, 2)]).unwrap(),
        );
        assert!(matches!(err, Err(Error::InvalidTierTable(_))));
    }
}
