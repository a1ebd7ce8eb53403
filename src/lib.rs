#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod account_tree;
pub mod api;
pub mod bn254;
pub mod circuit;
pub mod constants;
pub mod engine;
pub mod error;
pub mod packing;
pub mod poseidon;
pub mod prover;
pub mod store;
pub mod tiers;
pub mod types;
pub mod user_proof;
pub mod verifier;
pub mod witness;

pub use account_tree::{AccountTree, MemAccountTree};
pub use api::{Api, HintFn, TableId, Var};
pub use bn254::Fr;
pub use circuit::{BatchCreateUserCircuit, check_witness};
pub use engine::{CircuitError, Engine};
pub use error::{Error, Result};
pub use prover::{EngineBackend, Prover, SnarkBackend};
pub use store::{
    MemProofStore, MemWitnessStore, ProofRecord, ProofStore, WitnessRecord, WitnessStatus,
    WitnessStore,
};
pub use tiers::TierRatio;
pub use types::{AccountAsset, AccountInfo, BatchWitness, CexAssetInfo, CreateUserOp};
pub use user_proof::{UserProof, generate_user_proof, verify_user_proof};
pub use verifier::{ChainSummary, verify_proof_chain};
pub use witness::{
    BatchTiers, WitnessGenerator, decode_witness, encode_witness, recover_after_cex_assets,
    witness_asset_tier,
};
