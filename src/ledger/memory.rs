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

//! An in-memory ledger backed by `std::collections::BTreeMap`.
//!
//! Each channel keeps its committed public state, private state and key history, along with
//! the height of its chain. Simulators buffer writes until `end_tx_simulation` commits them as
//! the next block. Rich queries are not interpreted: a query string is treated as a key prefix.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    KvWrite, LedgerError, LedgerProvider, QueryResult, ResultsIterator, TxSimulationResults,
    TxSimulator, VecResultsIterator,
};
use crate::protocol::payload::{KeyModification, Kv};

// (namespace, collection, key); the public collection is the empty string.
type StateKey = (String, String, String);

#[derive(Debug, Default)]
struct ChannelState {
    height: u64,
    state: BTreeMap<StateKey, Vec<u8>>,
    history: HashMap<(String, String), Vec<KeyModification>>,
}

/// An in-memory ledger serving any number of channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    channels: Arc<Mutex<HashMap<String, ChannelState>>>,
}

impl MemoryLedger {
    /// Creates a ledger with the given channels, each at block height 1.
    pub fn new(channel_ids: &[&str]) -> Self {
        let ledger = MemoryLedger::default();
        for channel_id in channel_ids {
            ledger.create_channel(channel_id);
        }
        ledger
    }

    pub fn create_channel(&self, channel_id: &str) {
        self.channels
            .lock()
            .expect("Couldn't lock channels mutex!")
            .entry(channel_id.to_string())
            .or_insert_with(|| ChannelState {
                height: 1,
                ..ChannelState::default()
            });
    }

    pub fn new_simulator(
        &self,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<Arc<MemoryTxSimulator>, LedgerError> {
        if !self
            .channels
            .lock()
            .expect("Couldn't lock channels mutex!")
            .contains_key(channel_id)
        {
            return Err(LedgerError::ChannelNotFound(channel_id.to_string()));
        }

        Ok(Arc::new(MemoryTxSimulator {
            ledger: self.clone(),
            channel_id: channel_id.to_string(),
            tx_id: tx_id.to_string(),
            writes: Mutex::new(BTreeMap::new()),
            done: AtomicBool::new(false),
        }))
    }

    /// The committed public value of a key.
    pub fn get_state(&self, channel_id: &str, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.committed(channel_id, namespace, "", key)
    }

    pub fn height(&self, channel_id: &str) -> Option<u64> {
        self.channels
            .lock()
            .expect("Couldn't lock channels mutex!")
            .get(channel_id)
            .map(|channel| channel.height)
    }

    /// Ends a simulation, releasing the simulator.
    ///
    /// When `commit` is true the simulator's write-set is applied as the next block of its
    /// channel and the new block number is returned.
    pub fn end_tx_simulation(
        &self,
        simulator: &MemoryTxSimulator,
        commit: bool,
    ) -> Result<Option<u64>, LedgerError> {
        let results = simulator.get_tx_simulation_results();
        simulator.done();
        if !commit {
            return Ok(None);
        }
        let results = results?;

        let mut channels = self.channels.lock().expect("Couldn't lock channels mutex!");
        let channel = channels
            .get_mut(&simulator.channel_id)
            .ok_or_else(|| LedgerError::ChannelNotFound(simulator.channel_id.clone()))?;

        let block_num = channel.height;
        for write in results.writes {
            let state_key = (
                write.namespace.clone(),
                write.collection.clone(),
                write.key.clone(),
            );
            if write.collection.is_empty() {
                channel
                    .history
                    .entry((write.namespace.clone(), write.key.clone()))
                    .or_insert_with(Vec::new)
                    .push(KeyModification {
                        tx_id: results.tx_id.clone(),
                        value: write.value.clone().unwrap_or_default(),
                        block_num,
                        is_delete: write.is_delete(),
                    });
            }
            match write.value {
                Some(value) => channel.state.insert(state_key, value),
                None => channel.state.remove(&state_key),
            };
        }
        channel.height += 1;

        Ok(Some(block_num))
    }

    fn committed(
        &self,
        channel_id: &str,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Option<Vec<u8>> {
        self.channels
            .lock()
            .expect("Couldn't lock channels mutex!")
            .get(channel_id)
            .and_then(|channel| {
                channel
                    .state
                    .get(&(namespace.to_string(), collection.to_string(), key.to_string()))
                    .cloned()
            })
    }

    /// Walks `namespace`/`collection` in key order from `start_key`, stopping at the first key
    /// `within` rejects.
    fn scan<F>(
        &self,
        channel_id: &str,
        namespace: &str,
        collection: &str,
        start_key: &str,
        within: F,
    ) -> Vec<QueryResult>
    where
        F: Fn(&str) -> bool,
    {
        let channels = self.channels.lock().expect("Couldn't lock channels mutex!");
        let channel = match channels.get(channel_id) {
            Some(channel) => channel,
            None => return vec![],
        };
        let start = (
            namespace.to_string(),
            collection.to_string(),
            start_key.to_string(),
        );
        channel
            .state
            .range(start..)
            .take_while(|((ns, coll, key), _)| ns == namespace && coll == collection && within(key))
            .map(|((ns, _, key), value)| {
                QueryResult::Kv(Kv {
                    namespace: ns.clone(),
                    key: key.clone(),
                    value: value.clone(),
                })
            })
            .collect()
    }

    fn history(&self, channel_id: &str, namespace: &str, key: &str) -> Vec<QueryResult> {
        let channels = self.channels.lock().expect("Couldn't lock channels mutex!");
        channels
            .get(channel_id)
            .and_then(|channel| {
                channel
                    .history
                    .get(&(namespace.to_string(), key.to_string()))
            })
            .map(|entries| {
                entries
                    .iter()
                    .cloned()
                    .map(QueryResult::KeyModification)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl LedgerProvider for MemoryLedger {
    fn new_tx_simulator(
        &self,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<Arc<dyn TxSimulator>, LedgerError> {
        let simulator: Arc<dyn TxSimulator> = self.new_simulator(channel_id, tx_id)?;
        Ok(simulator)
    }
}

/// A simulator over one channel of a `MemoryLedger`.
///
/// Reads of single keys see the simulator's own writes; range scans, queries and history read
/// committed state only.
#[derive(Debug)]
pub struct MemoryTxSimulator {
    ledger: MemoryLedger,
    channel_id: String,
    tx_id: String,
    writes: Mutex<BTreeMap<StateKey, Option<Vec<u8>>>>,
    done: AtomicBool,
}

impl MemoryTxSimulator {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    fn check_done(&self) -> Result<(), LedgerError> {
        if self.done.load(Ordering::SeqCst) {
            Err(LedgerError::SimulatorDone(self.tx_id.clone()))
        } else {
            Ok(())
        }
    }

    fn read(&self, namespace: &str, collection: &str, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.check_done()?;
        let state_key = (namespace.to_string(), collection.to_string(), key.to_string());
        if let Some(write) = self
            .writes
            .lock()
            .expect("Couldn't lock writes mutex!")
            .get(&state_key)
        {
            return Ok(write.clone());
        }
        Ok(self
            .ledger
            .committed(&self.channel_id, namespace, collection, key))
    }

    fn write(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
        value: Option<Vec<u8>>,
    ) -> Result<(), LedgerError> {
        self.check_done()?;
        self.writes.lock().expect("Couldn't lock writes mutex!").insert(
            (namespace.to_string(), collection.to_string(), key.to_string()),
            value,
        );
        Ok(())
    }

    fn range(
        &self,
        namespace: &str,
        collection: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError> {
        self.check_done()?;
        let results = self
            .ledger
            .scan(&self.channel_id, namespace, collection, start_key, |key| {
                end_key.is_empty() || key < end_key
            });
        Ok(Box::new(VecResultsIterator::new(results)))
    }

    fn prefix(
        &self,
        namespace: &str,
        collection: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError> {
        self.check_done()?;
        let results = self
            .ledger
            .scan(&self.channel_id, namespace, collection, query, |key| key.starts_with(query));
        Ok(Box::new(VecResultsIterator::new(results)))
    }
}

impl TxSimulator for MemoryTxSimulator {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.read(namespace, "", key)
    }

    fn set_state(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), LedgerError> {
        self.write(namespace, "", key, Some(value))
    }

    fn delete_state(&self, namespace: &str, key: &str) -> Result<(), LedgerError> {
        self.write(namespace, "", key, None)
    }

    fn set_state_multiple_keys(
        &self,
        namespace: &str,
        kvs: HashMap<String, Vec<u8>>,
    ) -> Result<(), LedgerError> {
        for (key, value) in kvs {
            self.set_state(namespace, &key, value)?;
        }
        Ok(())
    }

    fn execute_update(&self, _query: &str) -> Result<(), LedgerError> {
        Err(LedgerError::NotSupported("ExecuteUpdate".into()))
    }

    fn get_state_range_scan_iterator(
        &self,
        namespace: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError> {
        self.range(namespace, "", start_key, end_key)
    }

    fn execute_query(
        &self,
        namespace: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError> {
        self.prefix(namespace, "", query)
    }

    fn get_history_for_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError> {
        self.check_done()?;
        Ok(Box::new(VecResultsIterator::new(self.ledger.history(
            &self.channel_id,
            namespace,
            key,
        ))))
    }

    fn get_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        self.read(namespace, collection, key)
    }

    fn set_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), LedgerError> {
        self.write(namespace, collection, key, Some(value))
    }

    fn delete_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), LedgerError> {
        self.write(namespace, collection, key, None)
    }

    fn get_private_data_range_scan_iterator(
        &self,
        namespace: &str,
        collection: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError> {
        self.range(namespace, collection, start_key, end_key)
    }

    fn execute_query_on_private_data(
        &self,
        namespace: &str,
        collection: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, LedgerError> {
        self.prefix(namespace, collection, query)
    }

    fn get_tx_simulation_results(&self) -> Result<TxSimulationResults, LedgerError> {
        self.check_done()?;
        let writes = self
            .writes
            .lock()
            .expect("Couldn't lock writes mutex!")
            .iter()
            .map(|((namespace, collection, key), value)| KvWrite {
                namespace: namespace.clone(),
                collection: collection.clone(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        Ok(TxSimulationResults {
            tx_id: self.tx_id.clone(),
            writes,
        })
    }

    fn done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(ledger: &MemoryLedger, tx_id: &str, writes: &[(&str, Option<&str>)]) -> u64 {
        let sim = ledger
            .new_simulator("testchannel", tx_id)
            .expect("Unable to create simulator");
        for (key, value) in writes {
            let result = match value {
                Some(value) => sim.set_state("mycc", key, value.as_bytes().to_vec()),
                None => sim.delete_state("mycc", key),
            };
            result.expect("Unable to write");
        }
        ledger
            .end_tx_simulation(&sim, true)
            .expect("Unable to commit")
            .expect("No block number")
    }

    /// 1. Write A and B in a simulator
    /// 2. Validate the simulator reads its own writes but the ledger does not see them
    /// 3. Commit and validate the ledger state and block height
    #[test]
    fn simulator_commit_advances_height() {
        let ledger = MemoryLedger::new(&["testchannel"]);
        assert_eq!(Some(1), ledger.height("testchannel"));

        let sim = ledger
            .new_simulator("testchannel", "tx1")
            .expect("Unable to create simulator");
        sim.set_state("mycc", "A", b"100".to_vec()).unwrap();
        sim.set_state("mycc", "B", b"200".to_vec()).unwrap();

        assert_eq!(Some(b"100".to_vec()), sim.get_state("mycc", "A").unwrap());
        assert_eq!(None, ledger.get_state("testchannel", "mycc", "A"));

        assert_eq!(Some(1), ledger.end_tx_simulation(&sim, true).unwrap());
        assert_eq!(Some(2), ledger.height("testchannel"));
        assert_eq!(Some(b"200".to_vec()), ledger.get_state("testchannel", "mycc", "B"));

        // the released simulator refuses further work
        match sim.get_state("mycc", "A") {
            Err(LedgerError::SimulatorDone(_)) => (),
            res => panic!("Expected SimulatorDone, got {:?}", res),
        }
    }

    #[test]
    fn discarded_simulation_leaves_state_unchanged() {
        let ledger = MemoryLedger::new(&["testchannel"]);
        let sim = ledger.new_simulator("testchannel", "tx1").unwrap();
        sim.set_state("mycc", "A", b"100".to_vec()).unwrap();

        assert_eq!(None, ledger.end_tx_simulation(&sim, false).unwrap());
        assert_eq!(None, ledger.get_state("testchannel", "mycc", "A"));
        assert_eq!(Some(1), ledger.height("testchannel"));
    }

    #[test]
    fn range_scan_is_half_open() {
        let ledger = MemoryLedger::new(&["testchannel"]);
        commit(
            &ledger,
            "tx1",
            &[("A", Some("1")), ("B", Some("2")), ("C", Some("3"))],
        );

        let sim = ledger.new_simulator("testchannel", "tx2").unwrap();
        let mut iter = sim.get_state_range_scan_iterator("mycc", "A", "C").unwrap();
        let mut keys = vec![];
        while let Some(QueryResult::Kv(kv)) = iter.next().unwrap() {
            keys.push(kv.key);
        }
        assert_eq!(vec!["A".to_string(), "B".to_string()], keys);

        let mut iter = sim.get_state_range_scan_iterator("mycc", "B", "").unwrap();
        let mut count = 0;
        while iter.next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(2, count);
    }

    fn keys(mut iter: Box<dyn ResultsIterator>) -> Vec<String> {
        let mut keys = vec![];
        while let Some(QueryResult::Kv(kv)) = iter.next().unwrap() {
            keys.push(kv.key);
        }
        keys
    }

    /// 1. Commit keys to mycc, to a mycc collection and to a neighbouring namespace
    /// 2. Validate open ended ranges and prefix queries stop at the namespace boundary
    /// 3. Validate a prefix query skips keys sorting before and after the prefix
    #[test]
    fn scans_stay_within_namespace_and_collection() {
        let ledger = MemoryLedger::new(&["testchannel"]);
        let sim = ledger.new_simulator("testchannel", "tx1").unwrap();
        for key in &["apple", "apricot", "banana", "aardvark"] {
            sim.set_state("mycc", key, b"1".to_vec()).unwrap();
        }
        sim.set_private_data("mycc", "secret", "apex", b"1".to_vec())
            .unwrap();
        sim.set_state("myccz", "apple", b"1".to_vec()).unwrap();
        sim.set_state("mcc", "zebra", b"1".to_vec()).unwrap();
        ledger.end_tx_simulation(&sim, true).unwrap();

        let sim = ledger.new_simulator("testchannel", "tx2").unwrap();
        assert_eq!(
            vec!["aardvark", "apple", "apricot", "banana"],
            keys(sim.get_state_range_scan_iterator("mycc", "", "").unwrap())
        );
        assert_eq!(
            vec!["apple", "apricot"],
            keys(sim.execute_query("mycc", "ap").unwrap())
        );
        assert_eq!(
            vec!["apex"],
            keys(
                sim.get_private_data_range_scan_iterator("mycc", "secret", "", "")
                    .unwrap()
            )
        );
        assert_eq!(
            Vec::<String>::new(),
            keys(sim.execute_query("mycc", "c").unwrap())
        );
    }

    #[test]
    fn history_records_deletes() {
        let ledger = MemoryLedger::new(&["testchannel"]);
        commit(&ledger, "tx1", &[("TODEL", Some("-"))]);
        commit(&ledger, "tx2", &[("TODEL", None)]);

        let sim = ledger.new_simulator("testchannel", "tx3").unwrap();
        let mut iter = sim.get_history_for_key("mycc", "TODEL").unwrap();

        match iter.next().unwrap() {
            Some(QueryResult::KeyModification(modification)) => {
                assert_eq!("tx1", modification.tx_id);
                assert_eq!(1, modification.block_num);
                assert!(!modification.is_delete);
            }
            res => panic!("Expected a key modification, got {:?}", res),
        }
        match iter.next().unwrap() {
            Some(QueryResult::KeyModification(modification)) => {
                assert_eq!(2, modification.block_num);
                assert!(modification.is_delete);
            }
            res => panic!("Expected a key modification, got {:?}", res),
        }
        assert_eq!(None, iter.next().unwrap());
    }

    #[test]
    fn private_data_is_separate_from_public_state() {
        let ledger = MemoryLedger::new(&["testchannel"]);
        let sim = ledger.new_simulator("testchannel", "tx1").unwrap();
        sim.set_private_data("mycc", "secret", "A", b"1".to_vec())
            .unwrap();

        assert_eq!(None, sim.get_state("mycc", "A").unwrap());
        assert_eq!(
            Some(b"1".to_vec()),
            sim.get_private_data("mycc", "secret", "A").unwrap()
        );
        assert_eq!(
            1,
            sim.get_tx_simulation_results()
                .unwrap()
                .private_writes()
                .count()
        );
    }

    #[test]
    fn unknown_channel() {
        let ledger = MemoryLedger::new(&["testchannel"]);
        match ledger.new_tx_simulator("nochannel", "tx1") {
            Err(LedgerError::ChannelNotFound(channel)) => assert_eq!("nochannel", channel),
            Err(err) => panic!("Unexpected error {}", err),
            Ok(_) => panic!("Expected ChannelNotFound"),
        }
    }
}
