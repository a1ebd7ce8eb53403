//! Batch prover worker.
//!
//! A prover claims published witnesses from the witness store, expands each
//! into the circuit assignment, hands it to the proving backend, checks the
//! resulting proof itself, and records the proof row before marking the
//! witness finished. Claiming is the atomic `Published -> Received`
//! transition, so concurrent workers never prove the same batch; a crashed
//! worker leaves a `Received` row that a rerun pass picks up.

use std::time::{Duration, Instant};

use anyhow::Context;

use crate::bn254::{Fr, fr_from_be_bytes, fr_to_be_bytes};
use crate::circuit::BatchCreateUserCircuit;
use crate::engine::Engine;
use crate::error::Error;
use crate::store::{ProofRecord, ProofStore, WitnessStatus, WitnessStore};
use crate::witness::{BatchTiers, decode_witness, witness_asset_tier};

/// The opaque proving-system boundary.
///
/// Key generation and constraint compilation belong to the backend; the
/// core only needs proving against an assignment and verification against
/// the single public input in its canonical big-endian encoding.
pub trait SnarkBackend {
    fn prove(&self, assignment: &BatchCreateUserCircuit<Fr>) -> anyhow::Result<Vec<u8>>;
    fn verify(&self, proof: &[u8], public_input: &[u8; 32]) -> anyhow::Result<bool>;
}

/// Reference backend: checks witness satisfiability with the native
/// evaluation engine and emits the canonical public input as the proof
/// body. It rejects exactly the witnesses a sound SNARK prover would
/// reject, which makes it the assembler's pre-flight check and the test
/// suite's stand-in for the external proving stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineBackend;

impl SnarkBackend for EngineBackend {
    fn prove(&self, assignment: &BatchCreateUserCircuit<Fr>) -> anyhow::Result<Vec<u8>> {
        let mut engine = Engine::new();
        let circuit = assignment.allocate(&mut engine);
        circuit.define(&mut engine);
        let public_input = engine
            .public_inputs()
            .first()
            .copied()
            .context("circuit exposes one public input")?;
        engine.finish().context("witness rejected by the circuit")?;
        Ok(fr_to_be_bytes(&public_input).to_vec())
    }

    fn verify(&self, proof: &[u8], public_input: &[u8; 32]) -> anyhow::Result<bool> {
        Ok(proof == public_input)
    }
}

pub struct Prover<W, P, B> {
    witness_store: W,
    proof_store: P,
    backend: B,
    tiers: BatchTiers,
}

impl<W: WitnessStore, P: ProofStore, B: SnarkBackend> Prover<W, P, B> {
    pub fn new(witness_store: W, proof_store: P, backend: B, tiers: BatchTiers) -> Self {
        Prover { witness_store, proof_store, backend, tiers }
    }

    pub fn witness_store(&self) -> &W {
        &self.witness_store
    }

    pub fn proof_store(&self) -> &P {
        &self.proof_store
    }

    /// Drain the witness queue. With `rerun` set, previously claimed but
    /// unfinished witnesses are proved again instead of fresh ones.
    pub fn run(&self, rerun: bool) -> anyhow::Result<()> {
        loop {
            let (from, to) = if rerun {
                (WitnessStatus::Received, WitnessStatus::Received)
            } else {
                (WitnessStatus::Published, WitnessStatus::Received)
            };
            let record = match with_backoff(|| self.witness_store.claim_witness(from, to)) {
                Ok(record) => record,
                Err(Error::NotFound) => {
                    log::info!("witness queue drained, prover run finished");
                    return Ok(());
                }
                Err(err) => return Err(err).context("claiming witness"),
            };
            self.prove_one(&record)
                .with_context(|| format!("proving batch {}", record.height))?;
        }
    }

    fn prove_one(&self, record: &crate::store::WitnessRecord) -> anyhow::Result<()> {
        let started = Instant::now();
        let witness = decode_witness(&record.witness_data)?;
        let asset_tier = witness_asset_tier(&witness, &self.tiers)?;
        let assignment = BatchCreateUserCircuit::from_witness(&witness, asset_tier)?;
        let proof = self.backend.prove(&assignment)?;
        log::info!(
            "batch {}: proof generated in {} ms",
            record.height,
            started.elapsed().as_millis()
        );

        let verified = self.backend.verify(&proof, &witness.batch_commitment)?;
        anyhow::ensure!(verified, "self-verification failed for batch {}", record.height);

        // Idempotent on retried batches: an existing proof row wins.
        match self.proof_store.proof_by_batch_number(record.height) {
            Ok(_) => {
                log::info!("proof for batch {} already recorded", record.height);
            }
            Err(Error::NotFound) => {
                with_backoff(|| {
                    self.proof_store.create_proof(ProofRecord {
                        batch_number: record.height,
                        proof: proof.clone(),
                        cex_commitments: [
                            witness.before_cex_commitment,
                            witness.after_cex_commitment,
                        ],
                        account_tree_roots: [
                            witness.before_account_tree_root,
                            witness.after_account_tree_root,
                        ],
                        batch_commitment: witness.batch_commitment,
                        assets_count: asset_tier,
                    })
                })?;
            }
            Err(err) => return Err(err).context("checking existing proof"),
        }
        with_backoff(|| {
            self.witness_store
                .update_status(record.height, WitnessStatus::Finished)
        })?;
        Ok(())
    }
}

/// Retry transient store failures a few times with doubling delay; anything
/// else, or persistent unavailability, surfaces to the caller.
fn with_backoff<T>(mut op: impl FnMut() -> crate::error::Result<T>) -> crate::error::Result<T> {
    const ATTEMPTS: usize = 4;
    let mut delay = Duration::from_millis(50);
    let mut attempt = 0;
    loop {
        match op() {
            Err(Error::StoreUnavailable(reason)) if attempt + 1 < ATTEMPTS => {
                attempt += 1;
                log::warn!("store unavailable ({reason}), retry {attempt}");
                std::thread::sleep(delay);
                delay *= 2;
            }
            other => return other,
        }
    }
}

/// The canonical public input of a stored proof row, recomputed from its
/// endpoint scalars.
pub fn recompute_batch_commitment(record: &ProofRecord) -> [u8; 32] {
    let commitment = crate::poseidon::batch_commitment_hash(
        fr_from_be_bytes(&record.account_tree_roots[0]),
        fr_from_be_bytes(&record.account_tree_roots[1]),
        fr_from_be_bytes(&record.cex_commitments[0]),
        fr_from_be_bytes(&record.cex_commitments[1]),
    );
    fr_to_be_bytes(&commitment)
}
