//! End-user Merkle inclusion proofs.
//!
//! A user receives their reported holdings, the authentication path of
//! their account slot and the published tree root, serialized as JSON.
//! Verification recomputes the account leaf exactly as the circuit does —
//! same asset padding, same packing, same sponge — and walks the path by
//! the index's low bits.

use serde::{Deserialize, Serialize};

use crate::account_tree::{AccountTree, verify_merkle_proof};
use crate::bn254::{fr_from_be_bytes, fr_to_be_bytes};
use crate::constants::ACCOUNT_TREE_DEPTH;
use crate::error::{Error, Result};
use crate::packing::user_assets_commitment;
use crate::poseidon::hash_account_leaf;
use crate::types::{AccountAsset, AccountInfo};
use crate::witness::BatchTiers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProof {
    pub account_index: u32,
    pub account_id_hash: [u8; 32],
    pub total_equity: [u8; 32],
    pub total_debt: [u8; 32],
    pub total_collateral: [u8; 32],
    pub assets: Vec<AccountAsset>,
    pub merkle_proof: [[u8; 32]; ACCOUNT_TREE_DEPTH],
    pub root: [u8; 32],
}

impl UserProof {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::WitnessCodec(e.to_string()))
    }

    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| Error::WitnessCodec(e.to_string()))
    }
}

/// Export the inclusion proof of one account against the current tree.
pub fn generate_user_proof<T: AccountTree>(account: &AccountInfo, tree: &T) -> Result<UserProof> {
    let proof = tree.get_proof(account.account_index)?;
    Ok(UserProof {
        account_index: account.account_index,
        account_id_hash: fr_to_be_bytes(&account.account_id),
        total_equity: fr_to_be_bytes(&account.total_equity),
        total_debt: fr_to_be_bytes(&account.total_debt),
        total_collateral: fr_to_be_bytes(&account.total_collateral),
        assets: account.assets.clone(),
        merkle_proof: array_init::array_init(|i| fr_to_be_bytes(&proof[i])),
        root: fr_to_be_bytes(&tree.root()),
    })
}

/// Recompute the account leaf from the reported holdings and walk the path.
/// The asset list is padded to the same tier the batch was proved at.
pub fn verify_user_proof(proof: &UserProof, tiers: &BatchTiers) -> Result<bool> {
    let asset_tier = tiers.asset_tier(proof.assets.len()).ok_or_else(|| {
        Error::InvalidInput(format!(
            "no batch tier admits {} assets per user",
            proof.assets.len()
        ))
    })?;
    let assets_commitment = user_assets_commitment(&proof.assets, asset_tier)?;
    let leaf = hash_account_leaf(
        fr_from_be_bytes(&proof.account_id_hash),
        fr_from_be_bytes(&proof.total_equity),
        fr_from_be_bytes(&proof.total_debt),
        fr_from_be_bytes(&proof.total_collateral),
        assets_commitment,
    );
    let path = array_init::array_init(|i| fr_from_be_bytes(&proof.merkle_proof[i]));
    Ok(verify_merkle_proof(
        fr_from_be_bytes(&proof.root),
        proof.account_index,
        &path,
        leaf,
    ))
}
