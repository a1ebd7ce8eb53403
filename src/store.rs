//! Witness and proof store boundaries.
//!
//! Durable storage is an external concern; these traits are the queue
//! contract the generator, prover workers and the chain verifier agree on.
//! A witness row moves `Published -> Received -> Finished`: the generator
//! appends `Published`, a prover claims work by the atomic
//! `Published -> Received` transition, and marks `Finished` once the proof
//! row is durable. The in-memory implementations back tests and single
//! process runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WitnessStatus {
    Published,
    Received,
    Finished,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessRecord {
    pub height: i64,
    /// Encoded batch witness (bincode + gzip).
    pub witness_data: Vec<u8>,
    pub status: WitnessStatus,
}

pub trait WitnessStore {
    /// Append a new row; heights are unique.
    fn create_witness(&self, record: WitnessRecord) -> Result<()>;
    /// Row with the greatest height.
    fn latest_witness(&self) -> Result<WitnessRecord>;
    fn witness_by_height(&self, height: i64) -> Result<WitnessRecord>;
    /// Atomically transition the lowest row in `from` status to `to` and
    /// return it. `Err(NotFound)` when no such row exists.
    fn claim_witness(&self, from: WitnessStatus, to: WitnessStatus) -> Result<WitnessRecord>;
    fn update_status(&self, height: i64, status: WitnessStatus) -> Result<()>;
    fn row_count(&self) -> Result<usize>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub batch_number: i64,
    /// Backend proof bytes.
    pub proof: Vec<u8>,
    /// Aggregate commitments, `[before, after]`.
    pub cex_commitments: [[u8; 32]; 2],
    /// Account tree roots, `[before, after]`.
    pub account_tree_roots: [[u8; 32]; 2],
    pub batch_commitment: [u8; 32],
    /// Asset-count tier the batch was proved at.
    pub assets_count: usize,
}

pub trait ProofStore {
    fn create_proof(&self, record: ProofRecord) -> Result<()>;
    fn proof_by_batch_number(&self, batch_number: i64) -> Result<ProofRecord>;
    /// All rows ordered by batch number.
    fn all_proofs(&self) -> Result<Vec<ProofRecord>>;
}

impl<S: WitnessStore + ?Sized> WitnessStore for &S {
    fn create_witness(&self, record: WitnessRecord) -> Result<()> {
        (**self).create_witness(record)
    }
    fn latest_witness(&self) -> Result<WitnessRecord> {
        (**self).latest_witness()
    }
    fn witness_by_height(&self, height: i64) -> Result<WitnessRecord> {
        (**self).witness_by_height(height)
    }
    fn claim_witness(&self, from: WitnessStatus, to: WitnessStatus) -> Result<WitnessRecord> {
        (**self).claim_witness(from, to)
    }
    fn update_status(&self, height: i64, status: WitnessStatus) -> Result<()> {
        (**self).update_status(height, status)
    }
    fn row_count(&self) -> Result<usize> {
        (**self).row_count()
    }
}

impl<S: WitnessStore + ?Sized> WitnessStore for std::sync::Arc<S> {
    fn create_witness(&self, record: WitnessRecord) -> Result<()> {
        (**self).create_witness(record)
    }
    fn latest_witness(&self) -> Result<WitnessRecord> {
        (**self).latest_witness()
    }
    fn witness_by_height(&self, height: i64) -> Result<WitnessRecord> {
        (**self).witness_by_height(height)
    }
    fn claim_witness(&self, from: WitnessStatus, to: WitnessStatus) -> Result<WitnessRecord> {
        (**self).claim_witness(from, to)
    }
    fn update_status(&self, height: i64, status: WitnessStatus) -> Result<()> {
        (**self).update_status(height, status)
    }
    fn row_count(&self) -> Result<usize> {
        (**self).row_count()
    }
}

impl<S: ProofStore + ?Sized> ProofStore for &S {
    fn create_proof(&self, record: ProofRecord) -> Result<()> {
        (**self).create_proof(record)
    }
    fn proof_by_batch_number(&self, batch_number: i64) -> Result<ProofRecord> {
        (**self).proof_by_batch_number(batch_number)
    }
    fn all_proofs(&self) -> Result<Vec<ProofRecord>> {
        (**self).all_proofs()
    }
}

impl<S: ProofStore + ?Sized> ProofStore for std::sync::Arc<S> {
    fn create_proof(&self, record: ProofRecord) -> Result<()> {
        (**self).create_proof(record)
    }
    fn proof_by_batch_number(&self, batch_number: i64) -> Result<ProofRecord> {
        (**self).proof_by_batch_number(batch_number)
    }
    fn all_proofs(&self) -> Result<Vec<ProofRecord>> {
        (**self).all_proofs()
    }
}

#[derive(Debug, Default)]
pub struct MemWitnessStore {
    rows: Mutex<BTreeMap<i64, WitnessRecord>>,
}

impl MemWitnessStore {
    pub fn new() -> Self {
        MemWitnessStore::default()
    }
}

impl WitnessStore for MemWitnessStore {
    fn create_witness(&self, record: WitnessRecord) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.height) {
            return Err(Error::StoreUnavailable(format!(
                "witness height {} already exists",
                record.height
            )));
        }
        rows.insert(record.height, record);
        Ok(())
    }

    fn latest_witness(&self) -> Result<WitnessRecord> {
        let rows = self.rows.lock().unwrap();
        rows.values().next_back().cloned().ok_or(Error::NotFound)
    }

    fn witness_by_height(&self, height: i64) -> Result<WitnessRecord> {
        let rows = self.rows.lock().unwrap();
        rows.get(&height).cloned().ok_or(Error::NotFound)
    }

    fn claim_witness(&self, from: WitnessStatus, to: WitnessStatus) -> Result<WitnessRecord> {
        let mut rows = self.rows.lock().unwrap();
        let height = rows
            .values()
            .find(|r| r.status == from)
            .map(|r| r.height)
            .ok_or(Error::NotFound)?;
        let row = rows.get_mut(&height).expect("row exists under lock");
        row.status = to;
        Ok(row.clone())
    }

    fn update_status(&self, height: i64, status: WitnessStatus) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&height).ok_or(Error::NotFound)?;
        row.status = status;
        Ok(())
    }

    fn row_count(&self) -> Result<usize> {
        Ok(self.rows.lock().unwrap().len())
    }
}

#[derive(Debug, Default)]
pub struct MemProofStore {
    rows: Mutex<BTreeMap<i64, ProofRecord>>,
}

impl MemProofStore {
    pub fn new() -> Self {
        MemProofStore::default()
    }
}

impl ProofStore for MemProofStore {
    fn create_proof(&self, record: ProofRecord) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.batch_number) {
            return Err(Error::StoreUnavailable(format!(
                "proof for batch {} already exists",
                record.batch_number
            )));
        }
        rows.insert(record.batch_number, record);
        Ok(())
    }

    fn proof_by_batch_number(&self, batch_number: i64) -> Result<ProofRecord> {
        let rows = self.rows.lock().unwrap();
        rows.get(&batch_number).cloned().ok_or(Error::NotFound)
    }

    fn all_proofs(&self) -> Result<Vec<ProofRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(height: i64) -> WitnessRecord {
        WitnessRecord {
            height,
            witness_data: vec![height as u8],
            status: WitnessStatus::Published,
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let store = MemWitnessStore::new();
        store.create_witness(record(0)).unwrap();
        store.create_witness(record(1)).unwrap();
        assert_eq!(store.latest_witness().unwrap().height, 1);

        let claimed = store
            .claim_witness(WitnessStatus::Published, WitnessStatus::Received)
            .unwrap();
        assert_eq!(claimed.height, 0);
        assert_eq!(claimed.status, WitnessStatus::Received);

        store.update_status(0, WitnessStatus::Finished).unwrap();
        assert_eq!(
            store.witness_by_height(0).unwrap().status,
            WitnessStatus::Finished
        );

        // The remaining published row is claimed next; then the queue is dry.
        let next = store
            .claim_witness(WitnessStatus::Published, WitnessStatus::Received)
            .unwrap();
        assert_eq!(next.height, 1);
        assert!(matches!(
            store.claim_witness(WitnessStatus::Published, WitnessStatus::Received),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn duplicate_heights_are_rejected() {
        let store = MemWitnessStore::new();
        store.create_witness(record(3)).unwrap();
        assert!(store.create_witness(record(3)).is_err());
    }

    #[test]
    fn proofs_come_back_ordered() {
        let store = MemProofStore::new();
        for n in [2i64, 0, 1] {
            store
                .create_proof(ProofRecord {
                    batch_number: n,
                    proof: Vec::new(),
                    cex_commitments: [[0; 32]; 2],
                    account_tree_roots: [[0; 32]; 2],
                    batch_commitment: [0; 32],
                    assets_count: 50,
                })
                .unwrap();
        }
        let all = store.all_proofs().unwrap();
        let numbers: Vec<i64> = all.iter().map(|p| p.batch_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }
}
