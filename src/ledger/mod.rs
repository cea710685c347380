/*
 * Copyright 2019 Cargill Incorporated
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 * -----------------------------------------------------------------------------
 */

//! Capabilities the support engine needs from the ledger.
//!
//! A `TxSimulator` is a transaction-scoped read/write buffer over ledger state; its write-set is
//! only applied when the transaction is committed. Queries return a `ResultsIterator`, which
//! is lazy, finite, forward-only and must be closed explicitly.

pub mod memory;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::protocol::payload::{KeyModification, Kv};
use crate::protocol::{IntoBytes, PayloadError};

#[derive(Debug)]
pub enum LedgerError {
    /// The ledger does not serve the named channel.
    ChannelNotFound(String),
    /// The simulator was already released.
    SimulatorDone(String),
    /// The operation is not provided by this ledger.
    NotSupported(String),
    GeneralError(Box<dyn Error + Send>),
}

impl Error for LedgerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            LedgerError::GeneralError(ref err) => Some(&**err),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerError::ChannelNotFound(channel_id) => {
                write!(f, "failed to find ledger for channel: {}", channel_id)
            }
            LedgerError::SimulatorDone(tx_id) => {
                write!(f, "transaction simulator for {} has been released", tx_id)
            }
            LedgerError::NotSupported(s) => write!(f, "{} not supported", s),
            LedgerError::GeneralError(err) => write!(f, "General Ledger Error: {}", err),
        }
    }
}

/// A single result returned by a `ResultsIterator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Kv(Kv),
    KeyModification(KeyModification),
}

impl QueryResult {
    pub fn into_bytes(self) -> Result<Vec<u8>, PayloadError> {
        match self {
            QueryResult::Kv(kv) => kv.into_bytes(),
            QueryResult::KeyModification(modification) => modification.into_bytes(),
        }
    }
}

pub trait ResultsIterator: Send {
    /// Returns the next result, or `None` once the results are exhausted.
    fn next(&mut self) -> Result<Option<QueryResult>, LedgerError>;

    /// Releases the iterator. Calling `close` more than once, or after exhaustion, is allowed.
    fn close(&mut self);
}

/// A `ResultsIterator` over results that are already in memory.
pub struct VecResultsIterator {
    results: Vec<QueryResult>,
    current: usize,
}

impl VecResultsIterator {
    pub fn new(results: Vec<QueryResult>) -> Self {
        VecResultsIterator {
            results,
            current: 0,
        }
    }
}

impl ResultsIterator for VecResultsIterator {
    fn next(&mut self) -> Result<Option<QueryResult>, LedgerError> {
        if self.current >= self.results.len() {
            return Ok(None);
        }
        let result = self.results[self.current].clone();
        self.current += 1;
        Ok(Some(result))
    }

    fn close(&mut self) {
        self.current = self.results.len();
    }
}

/// One write recorded by a simulator. A `value` of `None` is a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvWrite {
    pub namespace: String,
    pub collection: String,
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl KvWrite {
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// The write-set of a simulated transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxSimulationResults {
    pub tx_id: String,
    pub writes: Vec<KvWrite>,
}

impl TxSimulationResults {
    pub fn public_writes(&self) -> impl Iterator<Item = &KvWrite> {
        self.writes.iter().filter(|write| write.collection.is_empty())
    }

    pub fn private_writes(&self) -> impl Iterator<Item = &KvWrite> {
        self.writes.iter().filter(|write| !write.collection.is_empty())
    }
}

/// A transaction-scoped view of one channel's state.
pub trait TxSimulator: Send + Sync {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    fn set_state(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), LedgerError>;

    fn delete_state(&self, namespace: &str, key: &str) -> Result<(), LedgerError>;

    fn set_state_multiple_keys(
        &self,
        namespace: &str,
        kvs: HashMap<String, Vec<u8>>,
    ) -> Result<(), LedgerError>;

    /// Applies an update expressed in the ledger's query language.
    fn execute_update(&self, query: &str) -> Result<(), LedgerError>;

    /// Iterates keys in `[start_key, end_key)`; an empty `end_key` is unbounded.
    fn get_state_range_scan_iterator(
        &self,
        namespace: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError>;

    fn execute_query(
        &self,
        namespace: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError>;

    fn get_history_for_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError>;

    fn get_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, LedgerError>;

    fn set_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), LedgerError>;

    fn delete_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), LedgerError>;

    fn get_private_data_range_scan_iterator(
        &self,
        namespace: &str,
        collection: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError>;

    fn execute_query_on_private_data(
        &self,
        namespace: &str,
        collection: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError>;

    fn get_tx_simulation_results(&self) -> Result<TxSimulationResults, LedgerError>;

    /// Releases the simulator; later calls fail with `LedgerError::SimulatorDone`.
    fn done(&self);
}

/// Supplies simulators for channels other than the one a transaction started on.
pub trait LedgerProvider: Send + Sync {
    fn new_tx_simulator(
        &self,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<Arc<dyn TxSimulator>, LedgerError>;
}
