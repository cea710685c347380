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

//! Transaction contexts track each transaction a chaincode is executing.
//!
//! A context is keyed by channel id and transaction id. It carries the proposal and simulator
//! of the transaction, the one-shot channel on which the invoker waits for the chaincode's
//! terminal reply, and the query iterators the chaincode has opened. `TransactionContexts`
//! guarantees that at most one context exists per key, which is what stops a transaction
//! from re-entering a chaincode it is already executing.

mod error;
pub mod query;

pub use crate::context::error::TransactionContextError;

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use uuid::Uuid;

use crate::ledger::{ResultsIterator, TxSimulator};
use crate::protocol::message::{short_txid, ChaincodeMessage, ChaincodeMessageType};
use crate::protocol::payload::QueryResultBytes;
use crate::protocol::proposal::{Proposal, SignedProposal};

/// Inputs of one transaction, handed to the support engine by the endorser.
#[derive(Clone, Default)]
pub struct TransactionParams {
    pub tx_id: String,
    pub channel_id: String,
    pub signed_proposal: Option<SignedProposal>,
    pub proposal: Option<Proposal>,
    pub tx_simulator: Option<Arc<dyn TxSimulator>>,
    pub proposal_decorations: BTreeMap<String, Vec<u8>>,
    pub is_init_transaction: bool,
}

impl TransactionParams {
    pub fn new(channel_id: &str, tx_id: &str) -> Self {
        TransactionParams {
            tx_id: tx_id.to_string(),
            channel_id: channel_id.to_string(),
            ..TransactionParams::default()
        }
    }

    pub fn with_signed_proposal(mut self, signed_proposal: SignedProposal) -> Self {
        self.signed_proposal = Some(signed_proposal);
        self
    }

    pub fn with_proposal(mut self, proposal: Proposal) -> Self {
        self.proposal = Some(proposal);
        self
    }

    pub fn with_tx_simulator(mut self, tx_simulator: Arc<dyn TxSimulator>) -> Self {
        self.tx_simulator = Some(tx_simulator);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    Executing,
    Completed,
    Errored,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        match self {
            TransactionState::Completed | TransactionState::Errored => true,
            TransactionState::Created | TransactionState::Executing => false,
        }
    }
}

enum Notification {
    Message(ChaincodeMessage),
    StreamTerminated,
}

/// An open query iterator and the results read ahead of the page returned last.
pub struct QueryContext {
    pub iterator: Box<dyn ResultsIterator>,
    pub pending: Vec<QueryResultBytes>,
}

pub struct TransactionContext {
    channel_id: String,
    tx_id: String,
    signed_proposal: Option<SignedProposal>,
    proposal: Option<Proposal>,
    is_init: bool,
    tx_simulator: Option<Arc<dyn TxSimulator>>,
    state: Mutex<TransactionState>,
    response_notifier: Mutex<SyncSender<Notification>>,
    response_receiver: Mutex<Receiver<Notification>>,
    query_contexts: Mutex<HashMap<String, QueryContext>>,
}

impl TransactionContext {
    fn new(params: &TransactionParams) -> Self {
        let (response_notifier, response_receiver) = sync_channel(1);
        TransactionContext {
            channel_id: params.channel_id.clone(),
            tx_id: params.tx_id.clone(),
            signed_proposal: params.signed_proposal.clone(),
            proposal: params.proposal.clone(),
            is_init: params.is_init_transaction,
            tx_simulator: params.tx_simulator.clone(),
            state: Mutex::new(TransactionState::Created),
            response_notifier: Mutex::new(response_notifier),
            response_receiver: Mutex::new(response_receiver),
            query_contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn signed_proposal(&self) -> Option<&SignedProposal> {
        self.signed_proposal.as_ref()
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    pub fn is_init(&self) -> bool {
        self.is_init
    }

    pub fn tx_simulator(&self) -> Option<&Arc<dyn TxSimulator>> {
        self.tx_simulator.as_ref()
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock().expect("Transaction state lock was poisoned")
    }

    /// Moves a newly created context to `Executing`.
    pub fn start_executing(&self) -> Result<(), TransactionContextError> {
        let mut state = self.state.lock().expect("Transaction state lock was poisoned");
        if state.is_terminal() {
            return Err(self.terminal_error());
        }
        *state = TransactionState::Executing;
        Ok(())
    }

    /// Fails if the transaction has already reached a terminal state.
    pub fn ensure_active(&self) -> Result<(), TransactionContextError> {
        if self.state().is_terminal() {
            Err(self.terminal_error())
        } else {
            Ok(())
        }
    }

    /// Delivers the chaincode's terminal reply to the waiting invoker.
    ///
    /// Only the first reply is delivered; any later one is logged and dropped. Returns whether
    /// the reply was delivered.
    pub fn notify(&self, msg: ChaincodeMessage) -> bool {
        let mut state = self.state.lock().expect("Transaction state lock was poisoned");
        if state.is_terminal() {
            warn!(
                "[{}] Discarding {} for transaction already in state {:?}",
                short_txid(&self.tx_id),
                msg.message_type(),
                *state
            );
            return false;
        }
        *state = match msg.message_type() {
            ChaincodeMessageType::Error => TransactionState::Errored,
            _ => TransactionState::Completed,
        };
        self.response_notifier
            .lock()
            .expect("Response notifier lock was poisoned")
            .try_send(Notification::Message(msg))
            .is_ok()
    }

    /// Wakes the invoker with a stream termination, unless a reply was already delivered.
    fn terminate(&self) {
        let mut state = self.state.lock().expect("Transaction state lock was poisoned");
        if !state.is_terminal() {
            *state = TransactionState::Errored;
            // a full channel already holds a reply for the invoker
            let _ = self
                .response_notifier
                .lock()
                .expect("Response notifier lock was poisoned")
                .try_send(Notification::StreamTerminated);
        }
    }

    /// Blocks until the terminal reply arrives or `timeout` elapses.
    ///
    /// A timed out transaction is marked `Errored`, so a late reply is discarded.
    pub fn wait_for_response(
        &self,
        timeout: Duration,
    ) -> Result<ChaincodeMessage, TransactionContextError> {
        let received = self
            .response_receiver
            .lock()
            .expect("Response receiver lock was poisoned")
            .recv_timeout(timeout);
        match received {
            Ok(Notification::Message(msg)) => Ok(msg),
            Ok(Notification::StreamTerminated) | Err(RecvTimeoutError::Disconnected) => {
                Err(TransactionContextError::StreamTerminated)
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut state = self.state.lock().expect("Transaction state lock was poisoned");
                if !state.is_terminal() {
                    *state = TransactionState::Errored;
                    return Err(TransactionContextError::Timeout {
                        channel_id: self.channel_id.clone(),
                        tx_id: self.tx_id.clone(),
                    });
                }
                drop(state);
                // the reply raced the deadline and is already queued
                self.wait_for_response(Duration::from_millis(0))
            }
        }
    }

    /// Stores an iterator and returns the id the chaincode uses to refer to it.
    pub fn initialize_query_context(&self, iterator: Box<dyn ResultsIterator>) -> String {
        let id = Uuid::new_v4().to_string();
        self.query_contexts
            .lock()
            .expect("Query context lock was poisoned")
            .insert(
                id.clone(),
                QueryContext {
                    iterator,
                    pending: vec![],
                },
            );
        id
    }

    pub fn has_query_context(&self, id: &str) -> bool {
        self.query_contexts
            .lock()
            .expect("Query context lock was poisoned")
            .contains_key(id)
    }

    /// Runs `f` against the query context with the given id, if it exists.
    pub fn with_query_context<F, R>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut QueryContext) -> R,
    {
        self.query_contexts
            .lock()
            .expect("Query context lock was poisoned")
            .get_mut(id)
            .map(f)
    }

    /// Closes and forgets the iterator with the given id; unknown ids are ignored.
    pub fn cleanup_query_context(&self, id: &str) {
        let removed = self
            .query_contexts
            .lock()
            .expect("Query context lock was poisoned")
            .remove(id);
        if let Some(mut query_context) = removed {
            query_context.iterator.close();
        }
    }

    fn close_query_iterators(&self) {
        let drained: Vec<QueryContext> = self
            .query_contexts
            .lock()
            .expect("Query context lock was poisoned")
            .drain()
            .map(|(_, query_context)| query_context)
            .collect();
        for mut query_context in drained {
            query_context.iterator.close();
        }
    }

    fn terminal_error(&self) -> TransactionContextError {
        TransactionContextError::TerminalState {
            channel_id: self.channel_id.clone(),
            tx_id: self.tx_id.clone(),
        }
    }
}

/// The live transaction contexts of one chaincode.
#[derive(Default)]
pub struct TransactionContexts {
    contexts: RwLock<HashMap<(String, String), Arc<TransactionContext>>>,
}

impl TransactionContexts {
    pub fn new() -> Self {
        TransactionContexts::default()
    }

    /// Creates the context for the transaction in `params`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionContextError::Duplicate` if a context for the same channel and
    /// transaction id is already live.
    pub fn create(
        &self,
        params: &TransactionParams,
    ) -> Result<Arc<TransactionContext>, TransactionContextError> {
        let mut contexts = self
            .contexts
            .write()
            .expect("Transaction contexts lock was poisoned");
        let key = (params.channel_id.clone(), params.tx_id.clone());
        if contexts.contains_key(&key) {
            return Err(TransactionContextError::Duplicate {
                channel_id: params.channel_id.clone(),
                tx_id: params.tx_id.clone(),
            });
        }

        let context = Arc::new(TransactionContext::new(params));
        contexts.insert(key, context.clone());
        Ok(context)
    }

    pub fn get(&self, channel_id: &str, tx_id: &str) -> Option<Arc<TransactionContext>> {
        self.contexts
            .read()
            .expect("Transaction contexts lock was poisoned")
            .get(&(channel_id.to_string(), tx_id.to_string()))
            .cloned()
    }

    /// Removes the context, closing any iterators it still holds.
    pub fn delete(&self, channel_id: &str, tx_id: &str) {
        let removed = self
            .contexts
            .write()
            .expect("Transaction contexts lock was poisoned")
            .remove(&(channel_id.to_string(), tx_id.to_string()));
        if let Some(context) = removed {
            context.close_query_iterators();
        }
    }

    /// Closes every iterator of every live context and wakes their invokers with a stream
    /// termination.
    pub fn close(&self) {
        let contexts: Vec<Arc<TransactionContext>> = self
            .contexts
            .read()
            .expect("Transaction contexts lock was poisoned")
            .values()
            .cloned()
            .collect();
        for context in contexts {
            context.close_query_iterators();
            context.terminate();
        }
    }

    pub fn len(&self) -> usize {
        self.contexts
            .read()
            .expect("Transaction contexts lock was poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use crate::ledger::{LedgerError, QueryResult};

    struct MockIterator {
        closed: Arc<AtomicBool>,
    }

    impl ResultsIterator for MockIterator {
        fn next(&mut self) -> Result<Option<QueryResult>, LedgerError> {
            Ok(None)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn completed(tx_id: &str, channel_id: &str) -> ChaincodeMessage {
        ChaincodeMessage::new(ChaincodeMessageType::Completed, tx_id, channel_id, vec![])
    }

    #[test]
    fn duplicate_create_fails() {
        let contexts = TransactionContexts::new();
        let params = TransactionParams::new("ch1", "tx1");

        assert!(contexts.create(&params).is_ok());
        assert_eq!(
            Some(TransactionContextError::Duplicate {
                channel_id: "ch1".into(),
                tx_id: "tx1".into()
            }),
            contexts.create(&params).err()
        );

        // the same transaction on another channel is a different key
        assert!(contexts
            .create(&TransactionParams::new("ch2", "tx1"))
            .is_ok());
        assert_eq!(2, contexts.len());
    }

    #[test]
    fn delete_is_idempotent_and_allows_recreate() {
        let contexts = TransactionContexts::new();
        let params = TransactionParams::new("ch1", "tx1");

        contexts.create(&params).expect("Unable to create context");
        contexts.delete("ch1", "tx1");
        contexts.delete("ch1", "tx1");
        assert!(contexts.get("ch1", "tx1").is_none());
        assert!(contexts.create(&params).is_ok());
    }

    #[test]
    fn create_keeps_proposals() {
        let contexts = TransactionContexts::new();
        let params = TransactionParams::new("ch1", "tx1")
            .with_signed_proposal(SignedProposal::new(b"prop".to_vec(), b"sig".to_vec()))
            .with_proposal(Proposal::new(vec![], b"payload".to_vec()));

        contexts.create(&params).expect("Unable to create context");
        let context = contexts.get("ch1", "tx1").expect("No context");
        assert_eq!(
            b"sig",
            context.signed_proposal().expect("No signed proposal").signature()
        );
        assert_eq!(b"payload", context.proposal().expect("No proposal").payload());
        assert!(context.tx_simulator().is_none());
    }

    #[test]
    fn delete_closes_iterators() {
        let contexts = TransactionContexts::new();
        let context = contexts
            .create(&TransactionParams::new("ch1", "tx1"))
            .expect("Unable to create context");

        let closed = Arc::new(AtomicBool::new(false));
        let id = context.initialize_query_context(Box::new(MockIterator {
            closed: closed.clone(),
        }));
        assert!(context.has_query_context(&id));

        contexts.delete("ch1", "tx1");
        assert!(closed.load(Ordering::SeqCst));
        assert!(!context.has_query_context(&id));
    }

    #[test]
    fn cleanup_unknown_query_context_is_harmless() {
        let contexts = TransactionContexts::new();
        let context = contexts
            .create(&TransactionParams::new("ch1", "tx1"))
            .expect("Unable to create context");
        context.cleanup_query_context("no-such-id");
    }

    /// 1. Wait for a response on one thread
    /// 2. Notify COMPLETED from another
    /// 3. Validate a second reply is discarded and the state is terminal
    #[test]
    fn notify_wakes_waiter_once() {
        let contexts = TransactionContexts::new();
        let context = contexts
            .create(&TransactionParams::new("ch1", "tx1"))
            .expect("Unable to create context");
        context.start_executing().expect("Unable to start");

        let notifier = context.clone();
        let handle = thread::spawn(move || notifier.notify(completed("tx1", "ch1")));

        let msg = context
            .wait_for_response(Duration::from_secs(5))
            .expect("No response");
        assert_eq!(ChaincodeMessageType::Completed, msg.message_type());
        assert!(handle.join().expect("Notifier panicked"));

        assert!(!context.notify(completed("tx1", "ch1")));
        assert_eq!(TransactionState::Completed, context.state());
        assert!(context.ensure_active().is_err());
    }

    #[test]
    fn error_reply_is_errored_state() {
        let contexts = TransactionContexts::new();
        let context = contexts
            .create(&TransactionParams::new("ch1", "tx1"))
            .expect("Unable to create context");

        let error = ChaincodeMessage::new(ChaincodeMessageType::Error, "tx1", "ch1", vec![]);
        assert!(context.notify(error));
        assert_eq!(TransactionState::Errored, context.state());
    }

    #[test]
    fn wait_times_out_and_discards_late_reply() {
        let contexts = TransactionContexts::new();
        let context = contexts
            .create(&TransactionParams::new("ch1", "tx1"))
            .expect("Unable to create context");

        match context.wait_for_response(Duration::from_millis(50)) {
            Err(TransactionContextError::Timeout { tx_id, .. }) => assert_eq!("tx1", tx_id),
            res => panic!("Expected Timeout, got {:?}", res.map(|m| m.message_type())),
        }
        assert!(!context.notify(completed("tx1", "ch1")));
    }

    #[test]
    fn close_terminates_waiters() {
        let contexts = TransactionContexts::new();
        let context = contexts
            .create(&TransactionParams::new("ch1", "tx1"))
            .expect("Unable to create context");

        contexts.close();
        assert_eq!(
            Some(TransactionContextError::StreamTerminated),
            context.wait_for_response(Duration::from_secs(5)).err()
        );
    }
}
