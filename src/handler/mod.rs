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

//! The peer side of one chaincode's message stream.
//!
//! A `Handler` is created for every stream a chaincode opens to the peer. It performs the
//! registration handshake, sends the transactions the peer executes on the chaincode, and
//! serves the state, query and invocation requests the chaincode makes while executing them.
//!
//! The stream is read by a single thread. Requests that belong to a transaction are each
//! handled on their own thread, so a slow request, or a chaincode-to-chaincode call that
//! comes back to the same stream, does not hold up other transactions.

mod error;

pub use crate::handler::error::HandlerError;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crate::acl::{AclProvider, PEER_CHAINCODE_TO_CHAINCODE};
use crate::context::query::QueryResponseBuilder;
use crate::context::{TransactionContext, TransactionContexts, TransactionParams};
use crate::execution::{ChaincodeSupportError, LaunchError, RegistryError};
use crate::ledger::{LedgerProvider, ResultsIterator, TxSimulator};
use crate::protocol::chaincode::{
    CCContext, ChaincodeId, ChaincodeInput, ChaincodeInstance, ChaincodeSpec,
};
use crate::protocol::message::{short_txid, ChaincodeMessage, ChaincodeMessageType};
use crate::protocol::payload::{
    DelState, GetHistoryForKey, GetQueryResult, GetState, GetStateByRange, PutState,
    QueryResponse, QueryStateClose, QueryStateNext,
};
use crate::protocol::{FromBytes, IntoBytes};
use crate::scc::SystemChaincodeProvider;
use crate::stream::{ChaincodeStream, StreamError};

/// Where handlers announce themselves once their chaincode has registered.
pub trait Registry: Send + Sync {
    fn register(&self, handler: Arc<Handler>) -> Result<(), RegistryError>;

    /// The chaincode finished its handshake and can receive transactions.
    fn ready(&self, name: &str);

    /// The chaincode could not complete its handshake.
    fn failed(&self, name: &str, err: LaunchError);

    fn deregister(&self, name: &str) -> Result<(), RegistryError>;
}

/// Executes a chaincode on behalf of another chaincode.
pub trait Invoker: Send + Sync {
    fn invoke(
        &self,
        params: &TransactionParams,
        cccid: &CCContext,
        input: ChaincodeInput,
    ) -> Result<ChaincodeMessage, ChaincodeSupportError>;
}

/// Channel capabilities that change how requests are served.
pub trait CapabilityProvider: Send + Sync {
    /// Whether the channel supports private data collections.
    fn private_channel_data(&self, channel_id: &str) -> bool;
}

/// The same capabilities on every channel.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    private_channel_data: bool,
}

impl StaticCapabilities {
    pub fn new(private_channel_data: bool) -> Self {
        StaticCapabilities {
            private_channel_data,
        }
    }
}

impl CapabilityProvider for StaticCapabilities {
    fn private_channel_data(&self, _channel_id: &str) -> bool {
        self.private_channel_data
    }
}

/// The collaborators a handler serves requests with.
#[derive(Clone)]
pub struct HandlerServices {
    pub registry: Arc<dyn Registry>,
    pub invoker: Arc<dyn Invoker>,
    pub acl_provider: Arc<dyn AclProvider>,
    pub system_chaincodes: Arc<dyn SystemChaincodeProvider>,
    pub ledger_provider: Arc<dyn LedgerProvider>,
    pub capabilities: Arc<dyn CapabilityProvider>,
    pub query_response_builder: QueryResponseBuilder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Created,
    Established,
    Ready,
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandlerState::Created => f.write_str("created"),
            HandlerState::Established => f.write_str("established"),
            HandlerState::Ready => f.write_str("ready"),
        }
    }
}

/// The transactions for which a request from the chaincode is being handled.
#[derive(Default)]
struct ActiveTransactions {
    ids: Mutex<HashSet<(String, String)>>,
}

impl ActiveTransactions {
    fn add(&self, channel_id: &str, tx_id: &str) -> bool {
        self.ids
            .lock()
            .expect("Active transactions lock was poisoned")
            .insert((channel_id.to_string(), tx_id.to_string()))
    }

    fn remove(&self, channel_id: &str, tx_id: &str) {
        self.ids
            .lock()
            .expect("Active transactions lock was poisoned")
            .remove(&(channel_id.to_string(), tx_id.to_string()));
    }
}

pub struct Handler {
    stream: Arc<dyn ChaincodeStream>,
    services: HandlerServices,
    state: Mutex<HandlerState>,
    chaincode_id: RwLock<Option<ChaincodeId>>,
    instance: RwLock<ChaincodeInstance>,
    registered: AtomicBool,
    tx_contexts: TransactionContexts,
    active_transactions: ActiveTransactions,
    send_lock: Mutex<()>,
}

impl Handler {
    pub fn new(stream: Arc<dyn ChaincodeStream>, services: HandlerServices) -> Arc<Self> {
        Arc::new(Handler {
            stream,
            services,
            state: Mutex::new(HandlerState::Created),
            chaincode_id: RwLock::new(None),
            instance: RwLock::new(ChaincodeInstance::default()),
            registered: AtomicBool::new(false),
            tx_contexts: TransactionContexts::new(),
            active_transactions: ActiveTransactions::default(),
            send_lock: Mutex::new(()),
        })
    }

    pub fn state(&self) -> HandlerState {
        *self.state.lock().expect("Handler state lock was poisoned")
    }

    /// The name the chaincode registered with, `name:version`.
    pub fn chaincode_name(&self) -> Option<String> {
        self.chaincode_id
            .read()
            .expect("Chaincode id lock was poisoned")
            .as_ref()
            .map(|id| id.name().to_string())
    }

    /// The contexts of the transactions this chaincode is executing.
    pub fn tx_contexts(&self) -> &TransactionContexts {
        &self.tx_contexts
    }

    /// Reads and handles messages until the stream ends.
    ///
    /// On return every waiting transaction has been failed and the chaincode is no longer
    /// registered.
    pub fn process_stream(self: &Arc<Self>) -> Result<(), HandlerError> {
        let result = self.receive_messages();

        self.tx_contexts.close();
        if self.registered.load(Ordering::SeqCst) {
            if let Some(name) = self.chaincode_name() {
                if let Err(err) = self.services.registry.deregister(&name) {
                    debug!("Unable to deregister {}: {}", name, err);
                }
            }
        }

        result
    }

    fn receive_messages(self: &Arc<Self>) -> Result<(), HandlerError> {
        loop {
            let msg = match self.stream.recv() {
                Ok(msg) => msg,
                Err(StreamError::Closed) => {
                    debug!("Received EOF, ending chaincode support stream");
                    return Ok(());
                }
                Err(err) => {
                    error!("Error receiving from chaincode stream: {}", err);
                    return Err(HandlerError::StreamError(err));
                }
            };

            debug!(
                "[{}] Handling {} in state {}",
                short_txid(msg.txid()),
                msg.message_type(),
                self.state()
            );
            if let Err(err) = self.handle_message(msg) {
                error!("Ending chaincode stream: {}", err);
                return Err(err);
            }
        }
    }

    fn handle_message(self: &Arc<Self>, msg: ChaincodeMessage) -> Result<(), HandlerError> {
        match self.state() {
            HandlerState::Created => match msg.message_type() {
                ChaincodeMessageType::Register => self.handle_register(&msg),
                _ => Err(self.unexpected(&msg)),
            },
            HandlerState::Ready => self.handle_ready_message(msg),
            HandlerState::Established => Err(self.unexpected(&msg)),
        }
    }

    fn handle_ready_message(self: &Arc<Self>, msg: ChaincodeMessage) -> Result<(), HandlerError> {
        match msg.message_type() {
            ChaincodeMessageType::Completed
            | ChaincodeMessageType::Error
            | ChaincodeMessageType::Response => {
                self.notify(msg);
                Ok(())
            }
            ChaincodeMessageType::PutState
            | ChaincodeMessageType::GetState
            | ChaincodeMessageType::DelState
            | ChaincodeMessageType::GetStateByRange
            | ChaincodeMessageType::GetQueryResult
            | ChaincodeMessageType::GetHistoryForKey
            | ChaincodeMessageType::QueryStateNext
            | ChaincodeMessageType::QueryStateClose
            | ChaincodeMessageType::InvokeChaincode => {
                self.spawn_transaction_request(msg);
                Ok(())
            }
            ChaincodeMessageType::Register
            | ChaincodeMessageType::Registered
            | ChaincodeMessageType::Ready
            | ChaincodeMessageType::Transaction => Err(self.unexpected(&msg)),
        }
    }

    fn unexpected(&self, msg: &ChaincodeMessage) -> HandlerError {
        HandlerError::Protocol(format!(
            "[{}] Chaincode handler cannot handle message ({}) while in {} state",
            short_txid(msg.txid()),
            msg.message_type(),
            self.state()
        ))
    }

    fn set_state(&self, state: HandlerState) {
        *self.state.lock().expect("Handler state lock was poisoned") = state;
    }

    fn handle_register(self: &Arc<Self>, msg: &ChaincodeMessage) -> Result<(), HandlerError> {
        let chaincode_id = match ChaincodeId::from_bytes(msg.payload()) {
            Ok(chaincode_id) => chaincode_id,
            Err(err) => {
                self.send_error_reply(msg, &err.to_string());
                return Err(HandlerError::Protocol(format!(
                    "error unmarshalling chaincode registration: {}",
                    err
                )));
            }
        };
        let name = chaincode_id.name().to_string();
        debug!("Received REGISTER from {}", name);

        *self
            .chaincode_id
            .write()
            .expect("Chaincode id lock was poisoned") = Some(chaincode_id);

        if let Err(err) = self.services.registry.register(self.clone()) {
            error!("Registration of {} failed: {}", name, err);
            self.send_error_reply(msg, &err.to_string());
            self.services
                .registry
                .failed(&name, LaunchError::RegistrationFailed(err.to_string()));
            return Err(HandlerError::RegistryError(err));
        }
        self.registered.store(true, Ordering::SeqCst);
        *self.instance.write().expect("Instance lock was poisoned") =
            ChaincodeInstance::parse(&name);

        if let Err(err) = self.serial_send(ChaincodeMessage::unscoped(
            ChaincodeMessageType::Registered,
            vec![],
        )) {
            self.services
                .registry
                .failed(&name, LaunchError::RegistrationFailed(err.to_string()));
            return Err(err);
        }
        self.set_state(HandlerState::Established);

        if let Err(err) = self.serial_send(ChaincodeMessage::unscoped(
            ChaincodeMessageType::Ready,
            vec![],
        )) {
            self.services
                .registry
                .failed(&name, LaunchError::RegistrationFailed(err.to_string()));
            return Err(err);
        }
        self.set_state(HandlerState::Ready);
        debug!("Chaincode {} is ready", name);

        self.services.registry.ready(&name);
        Ok(())
    }

    /// Hands a terminal reply from the chaincode to the transaction waiting for it.
    fn notify(&self, msg: ChaincodeMessage) {
        match self.tx_contexts.get(msg.channel_id(), msg.txid()) {
            Some(context) => {
                debug!(
                    "[{}] Notifying {} for channel {}",
                    short_txid(msg.txid()),
                    msg.message_type(),
                    msg.channel_id()
                );
                context.notify(msg);
            }
            None => warn!(
                "[{}] No transaction context for channel {}, discarding {}",
                short_txid(msg.txid()),
                msg.channel_id(),
                msg.message_type()
            ),
        }
    }

    fn spawn_transaction_request(self: &Arc<Self>, msg: ChaincodeMessage) {
        let handler = self.clone();
        let reply_to = ChaincodeMessage::new(msg.message_type(), msg.txid(), msg.channel_id(), vec![]);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", msg.message_type(), short_txid(msg.txid())))
            .spawn(move || handler.handle_transaction_request(msg));

        if let Err(err) = spawned {
            error!("Unable to spawn request thread: {}", err);
            self.send_error_reply(&reply_to, &format!("unable to handle request: {}", err));
        }
    }

    fn handle_transaction_request(&self, msg: ChaincodeMessage) {
        debug!(
            "[{}] Handling {} from chaincode",
            short_txid(msg.txid()),
            msg.message_type()
        );

        if !self.active_transactions.add(msg.channel_id(), msg.txid()) {
            let err = HandlerError::RequestPending {
                chaincode: self.chaincode_name().unwrap_or_default(),
                channel_id: msg.channel_id().to_string(),
                tx_id: msg.txid().to_string(),
            };
            error!("{}", err);
            self.send_error_reply(&msg, &err.to_string());
            return;
        }

        let result = self
            .tx_context_for_request(&msg)
            .and_then(|context| {
                context.ensure_active()?;
                self.dispatch_request(&msg, &context)
            });
        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                let reason = format!(
                    "{} failed: transaction ID: {}: {}",
                    msg.message_type(),
                    msg.txid(),
                    err
                );
                error!("[{}] {}", short_txid(msg.txid()), reason);
                ChaincodeMessage::error_reply(&msg, &reason)
            }
        };

        debug!(
            "[{}] Completed {}. Sending {}",
            short_txid(msg.txid()),
            msg.message_type(),
            reply.message_type()
        );
        self.active_transactions.remove(msg.channel_id(), msg.txid());
        if let Err(err) = self.serial_send(reply) {
            error!("[{}] Unable to send reply: {}", short_txid(msg.txid()), err);
        }
    }

    fn tx_context_for_request(
        &self,
        msg: &ChaincodeMessage,
    ) -> Result<Arc<TransactionContext>, HandlerError> {
        match msg.message_type() {
            ChaincodeMessageType::InvokeChaincode => {
                self.tx_context_for_invoke(msg.channel_id(), msg.txid(), msg.payload())
            }
            _ => self.valid_tx_simulator_context(msg.channel_id(), msg.txid()),
        }
    }

    /// Finds the context an `INVOKE_CHAINCODE` request runs in.
    ///
    /// A request without a channel may only come from, and target, a system chaincode; it is
    /// served without a ledger simulator.
    pub fn tx_context_for_invoke(
        &self,
        channel_id: &str,
        tx_id: &str,
        payload: &[u8],
    ) -> Result<Arc<TransactionContext>, HandlerError> {
        if !channel_id.is_empty() {
            return self.valid_tx_simulator_context(channel_id, tx_id);
        }

        let spec = ChaincodeSpec::from_bytes(payload)?;
        let target = ChaincodeInstance::parse(spec.chaincode_id().name());
        if !self
            .services
            .system_chaincodes
            .is_system_chaincode(&target.chaincode_name)
        {
            return self.valid_tx_simulator_context("", tx_id);
        }

        self.tx_contexts
            .get(channel_id, tx_id)
            .ok_or_else(|| HandlerError::ContextNotFound {
                channel_id: channel_id.to_string(),
                tx_id: tx_id.to_string(),
            })
    }

    fn valid_tx_simulator_context(
        &self,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<Arc<TransactionContext>, HandlerError> {
        match self.tx_contexts.get(channel_id, tx_id) {
            Some(context) if context.tx_simulator().is_some() => Ok(context),
            _ => Err(HandlerError::NoLedgerContext {
                channel_id: channel_id.to_string(),
                tx_id: tx_id.to_string(),
            }),
        }
    }

    fn dispatch_request(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        match msg.message_type() {
            ChaincodeMessageType::GetState => self.handle_get_state(msg, context),
            ChaincodeMessageType::PutState => self.handle_put_state(msg, context),
            ChaincodeMessageType::DelState => self.handle_del_state(msg, context),
            ChaincodeMessageType::GetStateByRange => self.handle_get_state_by_range(msg, context),
            ChaincodeMessageType::GetQueryResult => self.handle_get_query_result(msg, context),
            ChaincodeMessageType::GetHistoryForKey => {
                self.handle_get_history_for_key(msg, context)
            }
            ChaincodeMessageType::QueryStateNext => self.handle_query_state_next(msg, context),
            ChaincodeMessageType::QueryStateClose => self.handle_query_state_close(msg, context),
            ChaincodeMessageType::InvokeChaincode => self.handle_invoke_chaincode(msg, context),
            ChaincodeMessageType::Register
            | ChaincodeMessageType::Registered
            | ChaincodeMessageType::Ready
            | ChaincodeMessageType::Transaction
            | ChaincodeMessageType::Response
            | ChaincodeMessageType::Error
            | ChaincodeMessageType::Completed => Err(self.unexpected(msg)),
        }
    }

    fn namespace(&self) -> String {
        self.instance
            .read()
            .expect("Instance lock was poisoned")
            .chaincode_name
            .clone()
    }

    fn simulator<'a>(
        &self,
        context: &'a TransactionContext,
    ) -> Result<&'a Arc<dyn TxSimulator>, HandlerError> {
        context
            .tx_simulator()
            .ok_or_else(|| HandlerError::NoLedgerContext {
                channel_id: context.channel_id().to_string(),
                tx_id: context.tx_id().to_string(),
            })
    }

    /// Whether `collection` names a private data collection the request may use.
    fn private_collection(
        &self,
        context: &TransactionContext,
        collection: &str,
    ) -> Result<bool, HandlerError> {
        if collection.is_empty() {
            return Ok(false);
        }
        if !self
            .services
            .capabilities
            .private_channel_data(context.channel_id())
        {
            return Err(HandlerError::NotYetSupported(format!(
                "private data collection {} on channel {}",
                collection,
                context.channel_id()
            )));
        }
        if context.is_init() {
            return Err(HandlerError::PrivateDataInInit);
        }
        Ok(true)
    }

    fn handle_get_state(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let get_state = GetState::from_bytes(msg.payload())?;
        let simulator = self.simulator(context)?;
        let namespace = self.namespace();

        let value = if self.private_collection(context, &get_state.collection)? {
            simulator.get_private_data(&namespace, &get_state.collection, &get_state.key)?
        } else {
            simulator.get_state(&namespace, &get_state.key)?
        };
        if value.is_none() {
            debug!(
                "[{}] No state associated with key: {}",
                short_txid(msg.txid()),
                get_state.key
            );
        }

        Ok(response(msg, value.unwrap_or_default()))
    }

    fn handle_put_state(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let put_state = PutState::from_bytes(msg.payload())?;
        let simulator = self.simulator(context)?;
        let namespace = self.namespace();

        if self.private_collection(context, &put_state.collection)? {
            simulator.set_private_data(
                &namespace,
                &put_state.collection,
                &put_state.key,
                put_state.value,
            )?;
        } else {
            simulator.set_state(&namespace, &put_state.key, put_state.value)?;
        }

        Ok(response(msg, vec![]))
    }

    fn handle_del_state(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let del_state = DelState::from_bytes(msg.payload())?;
        let simulator = self.simulator(context)?;
        let namespace = self.namespace();

        if self.private_collection(context, &del_state.collection)? {
            simulator.delete_private_data(&namespace, &del_state.collection, &del_state.key)?;
        } else {
            simulator.delete_state(&namespace, &del_state.key)?;
        }

        Ok(response(msg, vec![]))
    }

    fn handle_get_state_by_range(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let range = GetStateByRange::from_bytes(msg.payload())?;
        let simulator = self.simulator(context)?;
        let namespace = self.namespace();

        let iterator = if self.private_collection(context, &range.collection)? {
            simulator.get_private_data_range_scan_iterator(
                &namespace,
                &range.collection,
                &range.start_key,
                &range.end_key,
            )?
        } else {
            simulator.get_state_range_scan_iterator(&namespace, &range.start_key, &range.end_key)?
        };

        self.first_page(msg, context, iterator)
    }

    fn handle_get_query_result(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let query = GetQueryResult::from_bytes(msg.payload())?;
        let simulator = self.simulator(context)?;
        let namespace = self.namespace();

        let iterator = if self.private_collection(context, &query.collection)? {
            simulator.execute_query_on_private_data(&namespace, &query.collection, &query.query)?
        } else {
            simulator.execute_query(&namespace, &query.query)?
        };

        self.first_page(msg, context, iterator)
    }

    fn handle_get_history_for_key(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let history = GetHistoryForKey::from_bytes(msg.payload())?;
        let iterator = self
            .simulator(context)?
            .get_history_for_key(&self.namespace(), &history.key)?;

        self.first_page(msg, context, iterator)
    }

    fn first_page(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
        iterator: Box<dyn ResultsIterator>,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let id = context.initialize_query_context(iterator);
        let page = self
            .services
            .query_response_builder
            .build_query_response(context, &id)?;

        Ok(response(msg, page.into_bytes()?))
    }

    fn handle_query_state_next(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let next = QueryStateNext::from_bytes(msg.payload())?;
        let page = self
            .services
            .query_response_builder
            .build_query_response(context, &next.id)?;

        Ok(response(msg, page.into_bytes()?))
    }

    fn handle_query_state_close(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let close = QueryStateClose::from_bytes(msg.payload())?;
        context.cleanup_query_context(&close.id);

        let page = QueryResponse {
            results: vec![],
            has_more: false,
            id: close.id,
        };
        Ok(response(msg, page.into_bytes()?))
    }

    fn handle_invoke_chaincode(
        &self,
        msg: &ChaincodeMessage,
        context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let spec = ChaincodeSpec::from_bytes(msg.payload())?;
        let mut target = ChaincodeInstance::parse(spec.chaincode_id().name());
        if target.channel_id.is_empty() {
            target.channel_id = context.channel_id().to_string();
        }
        debug!(
            "[{}] C-call-C {} on channel {}",
            short_txid(msg.txid()),
            target.chaincode_name,
            target.channel_id
        );

        self.check_acl(context, &target)?;

        let system_chaincodes = &self.services.system_chaincodes;
        let is_syscc = system_chaincodes.is_system_chaincode(&target.chaincode_name);
        let version = if is_syscc {
            system_chaincodes.version().to_string()
        } else {
            target.chaincode_version.clone()
        };

        let mut params = TransactionParams {
            tx_id: msg.txid().to_string(),
            channel_id: target.channel_id.clone(),
            signed_proposal: context.signed_proposal().cloned(),
            proposal: context.proposal().cloned(),
            tx_simulator: context.tx_simulator().cloned(),
            ..TransactionParams::default()
        };

        // a call into another channel simulates against that channel's ledger
        let mut channel_simulator = None;
        if target.channel_id != context.channel_id() {
            let simulator = self
                .services
                .ledger_provider
                .new_tx_simulator(&target.channel_id, msg.txid())?;
            params.tx_simulator = Some(simulator.clone());
            channel_simulator = Some(simulator);
        }

        let cccid = CCContext::new(
            &target.channel_id,
            &target.chaincode_name,
            &version,
            msg.txid(),
            is_syscc,
        );
        let result = self
            .services
            .invoker
            .invoke(&params, &cccid, spec.into_input());
        if let Some(simulator) = channel_simulator {
            simulator.done();
        }

        let reply = result?;
        match reply.message_type() {
            ChaincodeMessageType::Completed => Ok(response(msg, reply.into_payload())),
            _ => Err(HandlerError::ChaincodeError(
                String::from_utf8_lossy(reply.payload()).into_owned(),
            )),
        }
    }

    fn check_acl(
        &self,
        context: &TransactionContext,
        target: &ChaincodeInstance,
    ) -> Result<(), HandlerError> {
        let system_chaincodes = &self.services.system_chaincodes;
        if system_chaincodes.is_system_chaincode(&target.chaincode_name) {
            if !system_chaincodes.is_invokable_cc2cc(&target.chaincode_name) {
                return Err(HandlerError::NotInvokable(target.chaincode_name.clone()));
            }
            return Ok(());
        }

        let signed_proposal = context
            .signed_proposal()
            .ok_or_else(|| HandlerError::MissingSignedProposal(target.to_string()))?;

        self.services.acl_provider.check_acl(
            PEER_CHAINCODE_TO_CHAINCODE,
            context.channel_id(),
            signed_proposal,
        )?;
        if target.channel_id != context.channel_id() {
            self.services.acl_provider.check_acl(
                PEER_CHAINCODE_TO_CHAINCODE,
                &target.channel_id,
                signed_proposal,
            )?;
        }

        Ok(())
    }

    /// Sends a transaction to the chaincode and waits for its terminal reply.
    ///
    /// The transaction's context lives only for the duration of this call; replies that
    /// arrive after `timeout` are discarded.
    pub fn execute(
        &self,
        params: &TransactionParams,
        msg: ChaincodeMessage,
        timeout: Duration,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let context = self.tx_contexts.create(params)?;
        let result = self.send_and_wait(&context, params, msg, timeout);
        self.tx_contexts.delete(&params.channel_id, &params.tx_id);
        result
    }

    fn send_and_wait(
        &self,
        context: &TransactionContext,
        params: &TransactionParams,
        msg: ChaincodeMessage,
        timeout: Duration,
    ) -> Result<ChaincodeMessage, HandlerError> {
        context.start_executing()?;
        self.serial_send(msg.with_proposal(params.signed_proposal.clone()))?;
        Ok(context.wait_for_response(timeout)?)
    }

    fn serial_send(&self, msg: ChaincodeMessage) -> Result<(), HandlerError> {
        let _guard = self.send_lock.lock().expect("Send lock was poisoned");
        self.stream.send(msg).map_err(HandlerError::StreamError)
    }

    fn send_error_reply(&self, msg: &ChaincodeMessage, reason: &str) {
        if let Err(err) = self.serial_send(ChaincodeMessage::error_reply(msg, reason)) {
            error!(
                "[{}] Unable to send error reply: {}",
                short_txid(msg.txid()),
                err
            );
        }
    }
}

fn response(msg: &ChaincodeMessage, payload: Vec<u8>) -> ChaincodeMessage {
    ChaincodeMessage::new(
        ChaincodeMessageType::Response,
        msg.txid(),
        msg.channel_id(),
        payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread::JoinHandle;

    use crate::acl::AllowAllAclProvider;
    use crate::execution::registry::HandlerRegistry;
    use crate::ledger::memory::MemoryLedger;
    use crate::protocol::chaincode::ChaincodeType;
    use crate::protocol::IntoBytes;
    use crate::scc::SystemChaincodeRegistry;
    use crate::stream::ChannelStream;

    struct UnavailableInvoker;

    impl Invoker for UnavailableInvoker {
        fn invoke(
            &self,
            _params: &TransactionParams,
            _cccid: &CCContext,
            _input: ChaincodeInput,
        ) -> Result<ChaincodeMessage, ChaincodeSupportError> {
            Err(ChaincodeSupportError::Shutdown)
        }
    }

    fn services(registry: Arc<HandlerRegistry>) -> HandlerServices {
        HandlerServices {
            registry,
            invoker: Arc::new(UnavailableInvoker),
            acl_provider: Arc::new(AllowAllAclProvider),
            system_chaincodes: Arc::new(
                SystemChaincodeRegistry::new("1.4").with_chaincode("lscc", true),
            ),
            ledger_provider: Arc::new(MemoryLedger::new(&["testchannel"])),
            capabilities: Arc::new(StaticCapabilities::default()),
            query_response_builder: QueryResponseBuilder::new(100),
        }
    }

    fn serve(
        registry: Arc<HandlerRegistry>,
    ) -> (Arc<Handler>, ChannelStream, JoinHandle<Result<(), HandlerError>>) {
        let (peer_side, cc_side) = ChannelStream::pair();
        let handler = Handler::new(Arc::new(peer_side), services(registry));
        let reader = {
            let handler = handler.clone();
            thread::spawn(move || handler.process_stream())
        };
        (handler, cc_side, reader)
    }

    fn register(name: &str) -> ChaincodeMessage {
        ChaincodeMessage::unscoped(
            ChaincodeMessageType::Register,
            ChaincodeId::new(name, "")
                .into_bytes()
                .expect("Unable to serialize chaincode id"),
        )
    }

    /// Serves a stream and completes the handshake for `mycc:0`.
    fn serve_registered(
        registry: Arc<HandlerRegistry>,
    ) -> (Arc<Handler>, ChannelStream, JoinHandle<Result<(), HandlerError>>) {
        let (handler, cc_side, reader) = serve(registry);
        cc_side.send(register("mycc:0")).expect("Unable to send");
        for expected in &[ChaincodeMessageType::Registered, ChaincodeMessageType::Ready] {
            let msg = cc_side.recv().expect("Unable to recv");
            assert_eq!(*expected, msg.message_type());
        }
        (handler, cc_side, reader)
    }

    fn invoke_payload(target: &str) -> Vec<u8> {
        ChaincodeSpec::new(
            ChaincodeType::Golang,
            ChaincodeId::new(target, ""),
            ChaincodeInput::from_strs(&["query", "A"]),
        )
        .into_bytes()
        .expect("Unable to serialize chaincode spec")
    }

    fn put_state(tx_id: &str, key: &str) -> ChaincodeMessage {
        ChaincodeMessage::new(
            ChaincodeMessageType::PutState,
            tx_id,
            "testchannel",
            PutState {
                key: key.into(),
                value: b"1".to_vec(),
                collection: "".into(),
            }
            .into_bytes()
            .expect("Unable to serialize put state"),
        )
    }

    fn expect_error(cc_side: &ChannelStream, tx_id: &str) -> String {
        let reply = cc_side.recv().expect("Unable to recv");
        assert_eq!(ChaincodeMessageType::Error, reply.message_type());
        assert_eq!(tx_id, reply.txid());
        String::from_utf8_lossy(reply.payload()).into_owned()
    }

    /// Test the registration handshake:
    ///
    /// 1. The chaincode sends REGISTER
    /// 2. The peer replies REGISTERED, then READY, and the handler is in the registry
    /// 3. The chaincode goes away; the handler is removed from the registry
    /// 4. A new stream registers the same name and completes the handshake
    #[test]
    fn register_handshake() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let (handler, cc_side, reader) = serve(registry.clone());

        cc_side.send(register("mycc:0")).expect("Unable to send");

        let registered = cc_side.recv().expect("Unable to recv");
        assert_eq!(ChaincodeMessageType::Registered, registered.message_type());
        let ready = cc_side.recv().expect("Unable to recv");
        assert_eq!(ChaincodeMessageType::Ready, ready.message_type());

        assert_eq!(Some("mycc:0".to_string()), handler.chaincode_name());
        assert!(registry.handler("mycc:0").is_some());

        drop(cc_side);
        reader
            .join()
            .expect("Reader panicked")
            .expect("Stream should end cleanly");
        assert!(registry.handler("mycc:0").is_none());

        // the name is free again for a new stream
        let (handler, _cc_side, _reader) = serve_registered(registry.clone());
        assert_eq!(HandlerState::Ready, handler.state());
        assert!(registry.handler("mycc:0").is_some());
    }

    #[test]
    fn message_before_register_is_protocol_error() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let (handler, cc_side, reader) = serve(registry);

        cc_side
            .send(ChaincodeMessage::new(
                ChaincodeMessageType::GetState,
                "txid",
                "testchannel",
                vec![],
            ))
            .expect("Unable to send");

        match reader.join().expect("Reader panicked") {
            Err(HandlerError::Protocol(_)) => (),
            res => panic!("Expected a protocol error, got {:?}", res),
        }
        assert_eq!(HandlerState::Created, handler.state());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let (_first, first_side, _first_reader) = serve(registry.clone());
        first_side.send(register("mycc:0")).expect("Unable to send");
        first_side.recv().expect("Unable to recv");
        first_side.recv().expect("Unable to recv");

        let (_second, second_side, second_reader) = serve(registry.clone());
        second_side.send(register("mycc:0")).expect("Unable to send");

        let reply = second_side.recv().expect("Unable to recv");
        assert_eq!(ChaincodeMessageType::Error, reply.message_type());
        assert_eq!(
            "duplicate chaincodeID: mycc:0",
            String::from_utf8_lossy(reply.payload())
        );
        match second_reader.join().expect("Reader panicked") {
            Err(HandlerError::RegistryError(RegistryError::DuplicateRegistration(name))) => {
                assert_eq!("mycc:0", name)
            }
            res => panic!("Expected a duplicate registration, got {:?}", res),
        }
        assert!(registry.handler("mycc:0").is_some());
    }

    #[test]
    fn unsolicited_registration_is_rejected() {
        let registry = Arc::new(HandlerRegistry::new(false));
        let (_handler, cc_side, reader) = serve(registry.clone());

        cc_side.send(register("mycc:0")).expect("Unable to send");

        let reply = cc_side.recv().expect("Unable to recv");
        assert_eq!(ChaincodeMessageType::Error, reply.message_type());
        assert!(reader.join().expect("Reader panicked").is_err());
        assert!(registry.is_empty());
    }

    /// Resolve the context of INVOKE_CHAINCODE requests:
    ///
    /// 1. An empty payload on a request without a channel is an error
    /// 2. A user chaincode call on a channel resolves the channel's context
    /// 3. A system chaincode call without a channel resolves a context with no simulator
    /// 4. A user chaincode call without a channel resolves a context with a simulator
    /// 5. Without a context, a user chaincode call has no ledger context
    /// 6. Without a context, a system chaincode call has no transaction context
    #[test]
    fn tx_context_for_invoke() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let (handler, _cc_side, _reader) = serve(registry);
        let ledger = MemoryLedger::new(&["testchannel", ""]);
        let simulator = |channel_id: &str, tx_id: &str| -> Arc<dyn TxSimulator> {
            ledger
                .new_simulator(channel_id, tx_id)
                .expect("Unable to create simulator")
        };

        match handler.tx_context_for_invoke("", "1", &[]) {
            Err(HandlerError::PayloadError(_)) => (),
            res => panic!("Expected a payload error, got {:?}", res.map(|_| ())),
        }

        handler
            .tx_contexts()
            .create(
                &TransactionParams::new("testchannel", "2")
                    .with_tx_simulator(simulator("testchannel", "2")),
            )
            .expect("Unable to create context");
        let context = handler
            .tx_context_for_invoke("testchannel", "2", &invoke_payload("mycc"))
            .expect("Context on channel");
        assert_eq!("testchannel", context.channel_id());
        assert!(context.tx_simulator().is_some());

        handler
            .tx_contexts()
            .create(&TransactionParams::new("", "3"))
            .expect("Unable to create context");
        let context = handler
            .tx_context_for_invoke("", "3", &invoke_payload("lscc"))
            .expect("System chaincode context without channel");
        assert!(context.tx_simulator().is_none());

        handler
            .tx_contexts()
            .create(&TransactionParams::new("", "4").with_tx_simulator(simulator("", "4")))
            .expect("Unable to create context");
        let context = handler
            .tx_context_for_invoke("", "4", &invoke_payload("mycc:0"))
            .expect("User chaincode context without channel");
        assert_eq!("4", context.tx_id());

        match handler.tx_context_for_invoke("", "5", &invoke_payload("mycc")) {
            Err(err @ HandlerError::NoLedgerContext { .. }) => {
                assert_eq!("No ledger context for 5()", err.to_string())
            }
            res => panic!("Expected no ledger context, got {:?}", res.map(|_| ())),
        }

        match handler.tx_context_for_invoke("", "6", &invoke_payload("lscc")) {
            Err(err @ HandlerError::ContextNotFound { .. }) => assert_eq!(
                "failed to get transaction context for 6()",
                err.to_string()
            ),
            res => panic!("Expected no transaction context, got {:?}", res.map(|_| ())),
        }
    }

    /// A state request for a transaction the peer is not executing is answered with ERROR.
    #[test]
    fn get_state_without_context_is_error() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let (_handler, cc_side, _reader) = serve_registered(registry);

        cc_side
            .send(ChaincodeMessage::new(
                ChaincodeMessageType::GetState,
                "txX",
                "testchannel",
                GetState {
                    key: "A".into(),
                    collection: "".into(),
                }
                .into_bytes()
                .expect("Unable to serialize get state"),
            ))
            .expect("Unable to send");

        assert_eq!(
            "GET_STATE failed: transaction ID: txX: No ledger context for txX(testchannel)",
            expect_error(&cc_side, "txX")
        );
    }

    /// Refuse a request while another request for the same transaction is being handled:
    ///
    /// 1. Mark tx1 as having a request in flight
    /// 2. Send PUT_STATE for tx1; the reply is an ERROR naming the pending request
    /// 3. Clear the mark; the same request now reaches context resolution
    #[test]
    fn concurrent_request_for_transaction_is_refused() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let (handler, cc_side, _reader) = serve_registered(registry);

        assert!(handler.active_transactions.add("testchannel", "tx1"));
        cc_side.send(put_state("tx1", "A")).expect("Unable to send");
        assert_eq!(
            "Another request pending for this CC: mycc:0, Txid: tx1, ChannelID: testchannel. \
             Cannot process.",
            expect_error(&cc_side, "tx1")
        );

        handler.active_transactions.remove("testchannel", "tx1");
        cc_side.send(put_state("tx1", "A")).expect("Unable to send");
        assert_eq!(
            "PUT_STATE failed: transaction ID: tx1: No ledger context for tx1(testchannel)",
            expect_error(&cc_side, "tx1")
        );
    }

    /// Refuse a request on a transaction that has already completed:
    ///
    /// 1. Create a context for tx1 and deliver its COMPLETED reply
    /// 2. Send PUT_STATE for tx1; the reply is an ERROR
    /// 3. Validate nothing was written to the simulator
    #[test]
    fn request_after_completion_is_refused() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let (handler, cc_side, _reader) = serve_registered(registry);
        let ledger = MemoryLedger::new(&["testchannel"]);
        let simulator = ledger
            .new_simulator("testchannel", "tx1")
            .expect("Unable to create simulator");

        let context = handler
            .tx_contexts()
            .create(
                &TransactionParams::new("testchannel", "tx1").with_tx_simulator(simulator.clone()),
            )
            .expect("Unable to create context");
        assert!(context.notify(ChaincodeMessage::new(
            ChaincodeMessageType::Completed,
            "tx1",
            "testchannel",
            vec![],
        )));

        cc_side.send(put_state("tx1", "A")).expect("Unable to send");
        assert_eq!(
            "PUT_STATE failed: transaction ID: tx1: transaction tx1(testchannel) has already \
             completed",
            expect_error(&cc_side, "tx1")
        );
        assert_eq!(
            0,
            simulator
                .get_tx_simulation_results()
                .expect("Unable to get results")
                .public_writes()
                .count()
        );
    }
}
