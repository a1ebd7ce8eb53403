//! Batch circuit behavior on small hand-checkable configurations: two asset
//! slots, two tiers, one or two users per batch.

mod common;

use common::{cex_assets, generate_witnesses, run_circuit, tier_table};

use solvency_circuits::bn254::Fr;
use solvency_circuits::circuit::{BatchCreateUserCircuit, check_witness};
use solvency_circuits::types::{AccountAsset, AccountInfo};
use solvency_circuits::witness::BatchTiers;

fn two_tier_table() -> Vec<solvency_circuits::TierRatio> {
    tier_table(&[(100, 100), (200, 50)])
}

#[test]
fn one_user_one_asset_batch_verifies() {
    let cex = cex_assets(2, 1, &two_tier_table());
    let account = AccountInfo::from_assets(
        0,
        Fr::from(11u64),
        vec![AccountAsset { index: 0, equity: 120, debt: 0, loan: 120, ..AccountAsset::default() }],
        &cex,
    )
    .unwrap();
    // 120 sits in the second tier: 100 + 20 * 50 / 100.
    assert_eq!(account.total_collateral, Fr::from(110u64));

    let (witnesses, _) =
        generate_witnesses(vec![account], cex, BatchTiers::new(vec![(1, 1)]).unwrap());
    assert_eq!(witnesses.len(), 1);
    check_witness(&witnesses[0], 1).unwrap();
}

#[test]
fn collateral_beyond_the_last_tier_uses_the_overflow_branch() {
    let cex = cex_assets(2, 1, &two_tier_table());
    let account = AccountInfo::from_assets(
        0,
        Fr::from(11u64),
        vec![AccountAsset { index: 0, equity: 1000, debt: 0, loan: 1000, ..AccountAsset::default() }],
        &cex,
    )
    .unwrap();
    // Past the final boundary the curve is the final precomputed value.
    assert_eq!(account.total_collateral, Fr::from(150u64));

    let (witnesses, _) =
        generate_witnesses(vec![account], cex, BatchTiers::new(vec![(1, 1)]).unwrap());
    let assignment = BatchCreateUserCircuit::from_witness(&witnesses[0], 1).unwrap();
    assert_eq!(assignment.create_user_ops[0].assets[0].loan_flag, Fr::from(1u64));
    assert_eq!(assignment.create_user_ops[0].assets[0].loan_index, Fr::from(1u64));
    run_circuit(&assignment).unwrap();
}

#[test]
fn insolvent_user_makes_the_witness_unsatisfiable() {
    let cex = cex_assets(2, 1, &two_tier_table());
    // Bypass input validation: totals are computed consistently with the
    // declared assets, but debt exceeds the haircut collateral.
    let account = AccountInfo {
        account_index: 0,
        account_id: Fr::from(11u64),
        total_equity: Fr::from(120u64),
        total_debt: Fr::from(200u64),
        total_collateral: Fr::from(110u64),
        assets: vec![AccountAsset {
            index: 0,
            equity: 120,
            debt: 200,
            loan: 120,
            ..AccountAsset::default()
        }],
    };
    let (witnesses, _) =
        generate_witnesses(vec![account], cex, BatchTiers::new(vec![(1, 1)]).unwrap());
    assert!(check_witness(&witnesses[0], 1).is_err());
}

#[test]
fn unsorted_user_assets_violate_the_uniqueness_constraint() {
    let cex = cex_assets(4, 1, &two_tier_table());
    let account = AccountInfo {
        account_index: 0,
        account_id: Fr::from(11u64),
        total_equity: Fr::from(2u64),
        total_debt: Fr::from(0u64),
        total_collateral: Fr::from(0u64),
        assets: vec![
            AccountAsset { index: 3, equity: 1, ..AccountAsset::default() },
            AccountAsset { index: 2, equity: 1, ..AccountAsset::default() },
        ],
    };
    let (witnesses, _) =
        generate_witnesses(vec![account], cex, BatchTiers::new(vec![(2, 1)]).unwrap());
    assert!(check_witness(&witnesses[0], 2).is_err());
}

#[test]
fn debt_at_exactly_the_collateral_value_still_verifies() {
    let cex = cex_assets(2, 1, &two_tier_table());
    let account = AccountInfo::from_assets(
        0,
        Fr::from(11u64),
        vec![AccountAsset { index: 0, equity: 120, debt: 110, loan: 120, ..AccountAsset::default() }],
        &cex,
    )
    .unwrap();
    let (witnesses, _) =
        generate_witnesses(vec![account], cex, BatchTiers::new(vec![(1, 1)]).unwrap());
    check_witness(&witnesses[0], 1).unwrap();
}

#[test]
fn update_vector_entry_without_a_declared_asset_is_caught() {
    let cex = cex_assets(2, 1, &two_tier_table());
    let account = AccountInfo::from_assets(
        0,
        Fr::from(11u64),
        vec![AccountAsset { index: 0, equity: 10, ..AccountAsset::default() }],
        &cex,
    )
    .unwrap();
    let (witnesses, _) =
        generate_witnesses(vec![account], cex, BatchTiers::new(vec![(1, 1)]).unwrap());

    let mut assignment = BatchCreateUserCircuit::from_witness(&witnesses[0], 1).unwrap();
    run_circuit(&assignment).unwrap();

    // Credit a slot the user never declared. The declared list and its
    // lookups are untouched, so only the random-linear-combination check
    // can notice, and it must.
    assignment.create_user_ops[0].assets_for_update[1].equity += Fr::from(1u64);
    assert!(run_circuit(&assignment).is_err());
}

#[test]
fn two_users_in_one_batch_chain_their_roots() {
    let cex = cex_assets(2, 1, &two_tier_table());
    let accounts = vec![
        AccountInfo::from_assets(
            0,
            Fr::from(11u64),
            vec![AccountAsset { index: 0, equity: 10, ..AccountAsset::default() }],
            &cex,
        )
        .unwrap(),
        AccountInfo::from_assets(
            1,
            Fr::from(12u64),
            vec![AccountAsset { index: 1, equity: 20, debt: 0, margin: 5, ..AccountAsset::default() }],
            &cex,
        )
        .unwrap(),
    ];
    let (witnesses, final_cex) =
        generate_witnesses(accounts, cex, BatchTiers::new(vec![(1, 2)]).unwrap());
    assert_eq!(witnesses.len(), 1);
    check_witness(&witnesses[0], 1).unwrap();
    assert_eq!(final_cex[0].total_equity, 10);
    assert_eq!(final_cex[1].total_equity, 20);
    assert_eq!(final_cex[1].margin_collateral, 5);
}

#[test]
fn tampered_batch_commitment_is_rejected() {
    let cex = cex_assets(2, 1, &two_tier_table());
    let account = AccountInfo::from_assets(
        0,
        Fr::from(11u64),
        vec![AccountAsset { index: 0, equity: 10, ..AccountAsset::default() }],
        &cex,
    )
    .unwrap();
    let (mut witnesses, _) =
        generate_witnesses(vec![account], cex, BatchTiers::new(vec![(1, 1)]).unwrap());
    witnesses[0].batch_commitment[31] ^= 1;
    assert!(check_witness(&witnesses[0], 1).is_err());
}
