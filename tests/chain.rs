//! End-to-end: witness generation, proving, proof-chain verification and
//! user inclusion proofs, across multiple chained batches.

mod common;

use std::sync::Arc;

use common::{cex_assets, tier_table};

use solvency_circuits::bn254::{Fr, fr_to_be_bytes};
use solvency_circuits::prover::{EngineBackend, Prover};
use solvency_circuits::store::{MemProofStore, MemWitnessStore, ProofStore, WitnessStatus, WitnessStore};
use solvency_circuits::types::{AccountAsset, AccountInfo};
use solvency_circuits::user_proof::{generate_user_proof, verify_user_proof};
use solvency_circuits::verifier::verify_proof_chain;
use solvency_circuits::witness::{BatchTiers, WitnessGenerator};
use solvency_circuits::{AccountTree, Error, MemAccountTree, ProofRecord};

struct Fixture {
    generator: WitnessGenerator<MemAccountTree, Arc<MemWitnessStore>>,
    witness_store: Arc<MemWitnessStore>,
    proof_store: Arc<MemProofStore>,
    accounts: Vec<AccountInfo>,
    tiers: BatchTiers,
}

fn setup() -> Fixture {
    let cex = cex_assets(2, 1, &tier_table(&[(100, 100), (200, 50)]));
    let accounts = vec![
        AccountInfo::from_assets(
            0,
            Fr::from(101u64),
            vec![AccountAsset { index: 0, equity: 120, debt: 0, loan: 120, ..AccountAsset::default() }],
            &cex,
        )
        .unwrap(),
        AccountInfo::from_assets(
            1,
            Fr::from(102u64),
            vec![AccountAsset { index: 1, equity: 40, debt: 10, margin: 30, ..AccountAsset::default() }],
            &cex,
        )
        .unwrap(),
    ];
    // One user per batch: two chained circuit instances.
    let tiers = BatchTiers::new(vec![(1, 1)]).unwrap();
    let witness_store = Arc::new(MemWitnessStore::new());
    let generator = WitnessGenerator::new(
        MemAccountTree::new(),
        witness_store.clone(),
        cex,
        tiers.clone(),
    )
    .unwrap();
    Fixture {
        generator,
        witness_store,
        proof_store: Arc::new(MemProofStore::new()),
        accounts,
        tiers,
    }
}

fn prove_all(fixture: &mut Fixture) -> Vec<ProofRecord> {
    fixture.generator.run(fixture.accounts.clone()).unwrap();
    let prover = Prover::new(
        fixture.witness_store.clone(),
        fixture.proof_store.clone(),
        EngineBackend,
        fixture.tiers.clone(),
    );
    prover.run(false).unwrap();
    fixture.proof_store.all_proofs().unwrap()
}

#[test]
fn cross_batch_chain_verifies() {
    let mut fixture = setup();
    let proofs = prove_all(&mut fixture);
    assert_eq!(proofs.len(), 2);

    // Adjacent endpoints agree.
    assert_eq!(proofs[0].account_tree_roots[1], proofs[1].account_tree_roots[0]);
    assert_eq!(proofs[0].cex_commitments[1], proofs[1].cex_commitments[0]);

    // Every witness row reached the finished state.
    for height in 0..2 {
        assert_eq!(
            fixture.witness_store.witness_by_height(height).unwrap().status,
            WitnessStatus::Finished
        );
    }

    let published = fixture.generator.cex_assets().to_vec();
    assert_eq!(published[0].total_equity, 120);
    assert_eq!(published[1].total_debt, 10);

    let summary = verify_proof_chain(&proofs, &published, &EngineBackend).unwrap();
    assert_eq!(
        summary.final_account_tree_root,
        fr_to_be_bytes(&fixture.generator.tree().root())
    );
}

#[test]
fn published_totals_disagreeing_with_the_chain_are_rejected() {
    let mut fixture = setup();
    let proofs = prove_all(&mut fixture);
    let mut published = fixture.generator.cex_assets().to_vec();
    published[0].total_equity += 1;
    let err = verify_proof_chain(&proofs, &published, &EngineBackend);
    assert!(matches!(err, Err(Error::ChainMismatch(_))));
}

#[test]
fn missing_or_tampered_rows_break_the_chain() {
    let mut fixture = setup();
    let proofs = prove_all(&mut fixture);
    let published = fixture.generator.cex_assets().to_vec();

    // Dropping the first batch leaves non-contiguous numbering.
    let err = verify_proof_chain(&proofs[1..], &published, &EngineBackend);
    assert!(matches!(err, Err(Error::ChainMismatch(_))));

    // Rewriting an endpoint breaks the public-input binding.
    let mut tampered = proofs.clone();
    tampered[0].account_tree_roots[1] = tampered[0].account_tree_roots[0];
    let err = verify_proof_chain(&tampered, &published, &EngineBackend);
    assert!(matches!(err, Err(Error::ChainMismatch(_))));
}

#[test]
fn rerun_pass_finishes_abandoned_witnesses() {
    let mut fixture = setup();
    fixture.generator.run(fixture.accounts.clone()).unwrap();
    // A worker claimed the first batch and died before proving it.
    fixture
        .witness_store
        .claim_witness(WitnessStatus::Published, WitnessStatus::Received)
        .unwrap();

    let prover = Prover::new(
        fixture.witness_store.clone(),
        fixture.proof_store.clone(),
        EngineBackend,
        fixture.tiers.clone(),
    );
    prover.run(false).unwrap();
    prover.run(true).unwrap();
    assert_eq!(fixture.proof_store.all_proofs().unwrap().len(), 2);
    for height in 0..2 {
        assert_eq!(
            fixture.witness_store.witness_by_height(height).unwrap().status,
            WitnessStatus::Finished
        );
    }
}

#[test]
fn users_can_verify_their_own_inclusion() {
    let mut fixture = setup();
    let proofs = prove_all(&mut fixture);
    let account = fixture.accounts[0].clone();
    let proof = generate_user_proof(&account, fixture.generator.tree()).unwrap();
    assert!(verify_user_proof(&proof, &fixture.tiers).unwrap());

    // The proof binds to the final published root.
    assert_eq!(proof.root, proofs[1].account_tree_roots[1]);

    let mut forged = proof.clone();
    forged.total_equity = fr_to_be_bytes(&Fr::from(1u64));
    assert!(!verify_user_proof(&forged, &fixture.tiers).unwrap());
}
