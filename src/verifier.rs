//! Proof-chain verification.
//!
//! An auditor holds the ordered proof rows, the published final per-asset
//! totals (tier tables included) and the verifying key of the proving
//! backend. The chain is sound when every row's public input binds its
//! recorded endpoints, every proof verifies, adjacent rows share their
//! endpoint state, the chain starts at the empty tree with zeroed
//! aggregates, and the final aggregate commitment equals the one computed
//! independently from the published totals.

use crate::account_tree::MemAccountTree;
use crate::bn254::fr_to_be_bytes;
use crate::error::{Error, Result};
use crate::packing::cex_assets_commitment;
use crate::prover::{SnarkBackend, recompute_batch_commitment};
use crate::store::ProofRecord;
use crate::types::CexAssetInfo;

/// Endpoints of a verified chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainSummary {
    pub final_account_tree_root: [u8; 32],
    pub final_cex_commitment: [u8; 32],
}

/// Verify the full proof chain against the published custodian state.
pub fn verify_proof_chain<B: SnarkBackend>(
    proofs: &[ProofRecord],
    published_cex_assets: &[CexAssetInfo],
    backend: &B,
) -> Result<ChainSummary> {
    if proofs.is_empty() {
        return Err(Error::ChainMismatch("no proofs to verify".to_owned()));
    }
    for (i, proof) in proofs.iter().enumerate() {
        if proof.batch_number != i as i64 {
            return Err(Error::ChainMismatch(format!(
                "batch numbers not contiguous at position {i}"
            )));
        }
    }
    for asset in published_cex_assets {
        if asset.total_equity < asset.total_debt {
            return Err(Error::ChainMismatch(format!(
                "published {} equity below debt",
                asset.symbol
            )));
        }
    }

    // Genesis endpoints: the empty account tree, and the published tier
    // tables with all running totals zeroed.
    let mut prev_root = fr_to_be_bytes(&MemAccountTree::empty_root());
    let mut zeroed = published_cex_assets.to_vec();
    for asset in zeroed.iter_mut() {
        asset.total_equity = 0;
        asset.total_debt = 0;
        asset.loan_collateral = 0;
        asset.margin_collateral = 0;
        asset.portfolio_margin_collateral = 0;
    }
    let mut prev_cex_commitment = fr_to_be_bytes(&cex_assets_commitment(&zeroed));

    for proof in proofs {
        let batch = proof.batch_number;
        let expected_commitment = recompute_batch_commitment(proof);
        if expected_commitment != proof.batch_commitment {
            return Err(Error::ChainMismatch(format!(
                "batch {batch}: public input does not bind the recorded endpoints"
            )));
        }
        let verified = backend
            .verify(&proof.proof, &proof.batch_commitment)
            .map_err(|e| Error::ChainMismatch(format!("batch {batch}: verifier error: {e}")))?;
        if !verified {
            return Err(Error::ChainMismatch(format!(
                "batch {batch}: proof does not verify"
            )));
        }
        if proof.account_tree_roots[0] != prev_root {
            return Err(Error::ChainMismatch(format!(
                "batch {batch}: account tree root does not chain"
            )));
        }
        if proof.cex_commitments[0] != prev_cex_commitment {
            return Err(Error::ChainMismatch(format!(
                "batch {batch}: aggregate commitment does not chain"
            )));
        }
        prev_root = proof.account_tree_roots[1];
        prev_cex_commitment = proof.cex_commitments[1];
        log::debug!("batch {batch} verified");
    }

    let expected_final = fr_to_be_bytes(&cex_assets_commitment(published_cex_assets));
    if prev_cex_commitment != expected_final {
        return Err(Error::ChainMismatch(
            "final aggregate commitment disagrees with the published totals".to_owned(),
        ));
    }
    log::info!("all {} proofs verified", proofs.len());
    Ok(ChainSummary {
        final_account_tree_root: prev_root,
        final_cex_commitment: prev_cex_commitment,
    })
}
