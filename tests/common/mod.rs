#![allow(dead_code)]

use solvency_circuits::bn254::Fr;
use solvency_circuits::circuit::BatchCreateUserCircuit;
use solvency_circuits::engine::{CircuitError, Engine};
use solvency_circuits::tiers::{TierRatio, compute_precomputed};
use solvency_circuits::types::{AccountInfo, BatchWitness, CexAssetInfo};
use solvency_circuits::witness::{BatchTiers, WitnessGenerator, decode_witness};
use solvency_circuits::{MemAccountTree, MemWitnessStore, WitnessStore};

/// Build a tier table from `(boundary, ratio)` pairs with the precomputed
/// column filled in.
pub fn tier_table(pairs: &[(u128, u8)]) -> Vec<TierRatio> {
    let mut tiers: Vec<TierRatio> = pairs
        .iter()
        .map(|&(boundary, ratio)| TierRatio { boundary, ratio, precomputed: 0 })
        .collect();
    compute_precomputed(&mut tiers);
    tiers
}

/// A uniform custodian vector: every slot shares the price and tier table.
pub fn cex_assets(count: usize, price: u64, table: &[TierRatio]) -> Vec<CexAssetInfo> {
    (0..count)
        .map(|i| CexAssetInfo {
            symbol: format!("asset{i}"),
            index: i as u32,
            base_price: price,
            loan_ratios: table.to_vec(),
            margin_ratios: table.to_vec(),
            portfolio_margin_ratios: table.to_vec(),
            ..CexAssetInfo::default()
        })
        .collect()
}

/// Run the witness generator over `accounts` and return every stored batch
/// witness in height order, plus the final custodian state.
pub fn generate_witnesses(
    accounts: Vec<AccountInfo>,
    cex: Vec<CexAssetInfo>,
    tiers: BatchTiers,
) -> (Vec<BatchWitness>, Vec<CexAssetInfo>) {
    let mut generator =
        WitnessGenerator::new(MemAccountTree::new(), MemWitnessStore::new(), cex, tiers)
            .expect("generator construction");
    generator.run(accounts).expect("witness generation");
    let count = generator.store().row_count().unwrap() as i64;
    let witnesses = (0..count)
        .map(|h| {
            decode_witness(&generator.store().witness_by_height(h).unwrap().witness_data).unwrap()
        })
        .collect();
    (witnesses, generator.cex_assets().to_vec())
}

/// Evaluate an assignment under the native engine.
pub fn run_circuit(assignment: &BatchCreateUserCircuit<Fr>) -> Result<(), CircuitError> {
    let mut engine = Engine::new();
    let circuit = assignment.allocate(&mut engine);
    circuit.define(&mut engine);
    engine.finish()
}
