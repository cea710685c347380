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

use std::cmp;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::acl::{AclProvider, AllowAllAclProvider};
use crate::config::ChaincodeSupportConfig;
use crate::context::query::QueryResponseBuilder;
use crate::context::{TransactionContextError, TransactionParams};
use crate::execution::launcher::RuntimeLauncher;
use crate::execution::registry::HandlerRegistry;
use crate::execution::runtime::Runtime;
use crate::execution::{ChaincodeSupportBuilderError, ChaincodeSupportError, LaunchError};
use crate::handler::{
    CapabilityProvider, Handler, HandlerError, HandlerServices, Invoker, Registry,
    StaticCapabilities,
};
use crate::ledger::{LedgerProvider, TxSimulationResults};
use crate::protocol::chaincode::{
    CCContext, ChaincodeDeploymentSpec, ChaincodeInput, ChaincodeInvocationSpec,
};
use crate::protocol::message::{short_txid, ChaincodeMessage, ChaincodeMessageType};
use crate::protocol::response::{ChaincodeEvent, Response};
use crate::protocol::{FromBytes, IntoBytes};
use crate::scc::{SystemChaincodeProvider, SystemChaincodeRegistry};
use crate::stream::ChaincodeStream;

/// The lifecycle system chaincode; its calls may take as long as an install.
const LSCC: &str = "lscc";

/// Looks up the chaincodes deployed on a channel.
pub trait ChaincodeDefinitionProvider: Send + Sync {
    fn deployment_spec(&self, channel_id: &str, name: &str) -> Option<ChaincodeDeploymentSpec>;
}

/// Chaincode definitions held in memory, keyed by channel and chaincode name.
#[derive(Default)]
pub struct ChaincodeDefinitions {
    definitions: Mutex<HashMap<(String, String), ChaincodeDeploymentSpec>>,
}

impl ChaincodeDefinitions {
    pub fn new() -> Self {
        ChaincodeDefinitions::default()
    }

    /// Records `spec` as the deployed definition of its chaincode on `channel_id`.
    pub fn deploy(&self, channel_id: &str, spec: ChaincodeDeploymentSpec) {
        let name = spec.chaincode_spec().chaincode_id().name().to_string();
        self.definitions
            .lock()
            .expect("Definitions lock was poisoned")
            .insert((channel_id.to_string(), name), spec);
    }
}

impl ChaincodeDefinitionProvider for ChaincodeDefinitions {
    fn deployment_spec(&self, channel_id: &str, name: &str) -> Option<ChaincodeDeploymentSpec> {
        self.definitions
            .lock()
            .expect("Definitions lock was poisoned")
            .get(&(channel_id.to_string(), name.to_string()))
            .cloned()
    }
}

/// The result of a successful execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub response: Response,
    pub chaincode_event: Option<ChaincodeEvent>,
    /// The simulator's results once the chaincode completed; `None` without a simulator.
    pub simulation_results: Option<TxSimulationResults>,
}

struct SupportInner {
    config: ChaincodeSupportConfig,
    registry: Arc<HandlerRegistry>,
    launcher: RuntimeLauncher,
    runtime: Arc<dyn Runtime>,
    definitions: Arc<dyn ChaincodeDefinitionProvider>,
    system_chaincodes: Arc<dyn SystemChaincodeProvider>,
    acl_provider: Arc<dyn AclProvider>,
    ledger_provider: Arc<dyn LedgerProvider>,
    capabilities: Arc<dyn CapabilityProvider>,
}

impl SupportInner {
    fn invoke(
        &self,
        params: &TransactionParams,
        cccid: &CCContext,
        mut input: ChaincodeInput,
    ) -> Result<ChaincodeMessage, ChaincodeSupportError> {
        let cccid = self.resolve_version(cccid)?;
        let spec = self.deployment_spec(&cccid)?;
        let handler = self.launch(&cccid, &spec)?;

        input.set_decorations(params.proposal_decorations.clone());
        self.execute_transaction(&handler, params, &cccid, input)
    }

    fn execute_transaction(
        &self,
        handler: &Handler,
        params: &TransactionParams,
        cccid: &CCContext,
        input: ChaincodeInput,
    ) -> Result<ChaincodeMessage, ChaincodeSupportError> {
        let msg = ChaincodeMessage::new(
            ChaincodeMessageType::Transaction,
            &params.tx_id,
            &params.channel_id,
            input.into_bytes()?,
        );

        debug!(
            "[{}] Executing {} on channel {}",
            short_txid(&params.tx_id),
            cccid.canonical_name(),
            params.channel_id
        );
        handler
            .execute(params, msg, self.execute_timeout(cccid))
            .map_err(|err| match err {
                HandlerError::ContextError(TransactionContextError::Timeout { .. }) => {
                    ChaincodeSupportError::ExecuteTimeout(cccid.canonical_name())
                }
                HandlerError::ContextError(TransactionContextError::StreamTerminated) => {
                    ChaincodeSupportError::StreamTerminated(cccid.canonical_name())
                }
                err => ChaincodeSupportError::Handler(err),
            })
    }

    fn execute_timeout(&self, cccid: &CCContext) -> Duration {
        if cccid.name() == LSCC {
            cmp::max(self.config.execute_timeout(), self.config.install_timeout())
        } else {
            self.config.execute_timeout()
        }
    }

    /// Fills in the deployed version when the caller named none.
    fn resolve_version(&self, cccid: &CCContext) -> Result<CCContext, ChaincodeSupportError> {
        if !cccid.version().is_empty() || cccid.is_syscc() {
            return Ok(cccid.clone());
        }

        let spec = self.user_deployment_spec(cccid)?;
        Ok(CCContext::new(
            cccid.channel_id(),
            cccid.name(),
            spec.chaincode_spec().chaincode_id().version(),
            cccid.tx_id(),
            false,
        ))
    }

    /// The deployment spec the chaincode is started from, once the requested version has
    /// been checked against the deployed one.
    fn deployment_spec(
        &self,
        cccid: &CCContext,
    ) -> Result<ChaincodeDeploymentSpec, ChaincodeSupportError> {
        if cccid.is_syscc() {
            check_version(cccid, self.system_chaincodes.version())?;
            return self
                .system_chaincodes
                .deployment_spec(cccid.name())
                .ok_or_else(|| {
                    ChaincodeSupportError::Definition(format!(
                        "{} is not a system chaincode",
                        cccid.name()
                    ))
                });
        }

        let spec = self.user_deployment_spec(cccid)?;
        check_version(cccid, spec.chaincode_spec().chaincode_id().version())?;
        Ok(spec)
    }

    fn user_deployment_spec(
        &self,
        cccid: &CCContext,
    ) -> Result<ChaincodeDeploymentSpec, ChaincodeSupportError> {
        self.definitions
            .deployment_spec(cccid.channel_id(), cccid.name())
            .ok_or_else(|| {
                ChaincodeSupportError::Definition(format!(
                    "could not find chaincode {} on channel {}",
                    cccid.name(),
                    cccid.channel_id()
                ))
            })
    }

    fn launch(
        &self,
        cccid: &CCContext,
        spec: &ChaincodeDeploymentSpec,
    ) -> Result<Arc<Handler>, ChaincodeSupportError> {
        let name = cccid.canonical_name();
        if let Some(handler) = self.registry.handler(&name) {
            return Ok(handler);
        }

        self.launcher
            .launch(cccid, spec)
            .map_err(|err| ChaincodeSupportError::Launch {
                channel_id: cccid.channel_id().to_string(),
                name: name.clone(),
                err,
            })?;

        self.registry
            .handler(&name)
            .ok_or_else(|| ChaincodeSupportError::Launch {
                channel_id: cccid.channel_id().to_string(),
                name: name.clone(),
                err: LaunchError::RegistrationFailed(format!(
                    "could not find handler: {}",
                    name
                )),
            })
    }

    fn process_reply(
        &self,
        params: &TransactionParams,
        cccid: &CCContext,
        mut reply: ChaincodeMessage,
    ) -> Result<ExecutionOutput, ChaincodeSupportError> {
        match reply.message_type() {
            ChaincodeMessageType::Completed => {
                let mut chaincode_event = reply.take_chaincode_event();
                if let Some(event) = chaincode_event.as_mut() {
                    event.set_origin(cccid.name(), &params.tx_id);
                }
                let response = Response::from_bytes(reply.payload())?;
                let simulation_results = match params.tx_simulator {
                    Some(ref simulator) => Some(simulator.get_tx_simulation_results()?),
                    None => None,
                };

                Ok(ExecutionOutput {
                    response,
                    chaincode_event,
                    simulation_results,
                })
            }
            ChaincodeMessageType::Error => Err(ChaincodeSupportError::ChaincodeError(
                String::from_utf8_lossy(reply.payload()).into_owned(),
            )),
            other => Err(ChaincodeSupportError::UnexpectedResponse(format!(
                "unexpected response type {} for transaction {}",
                other,
                reply.txid()
            ))),
        }
    }
}

fn check_version(cccid: &CCContext, deployed: &str) -> Result<(), ChaincodeSupportError> {
    if cccid.version() != deployed {
        return Err(ChaincodeSupportError::VersionMismatch {
            name: cccid.name().to_string(),
            requested: cccid.version().to_string(),
            deployed: deployed.to_string(),
        });
    }
    Ok(())
}

/// Lets a handler call back into the `ChaincodeSupport` that owns it.
struct SupportInvoker {
    inner: Weak<SupportInner>,
}

impl Invoker for SupportInvoker {
    fn invoke(
        &self,
        params: &TransactionParams,
        cccid: &CCContext,
        input: ChaincodeInput,
    ) -> Result<ChaincodeMessage, ChaincodeSupportError> {
        match self.inner.upgrade() {
            Some(inner) => inner.invoke(params, cccid, input),
            None => Err(ChaincodeSupportError::Shutdown),
        }
    }
}

/// Launches chaincodes and executes transactions on them.
#[derive(Clone)]
pub struct ChaincodeSupport {
    inner: Arc<SupportInner>,
}

impl ChaincodeSupport {
    /// Executes the invocation and returns the chaincode's response.
    pub fn execute(
        &self,
        params: &TransactionParams,
        cccid: &CCContext,
        spec: &ChaincodeInvocationSpec,
    ) -> Result<ExecutionOutput, ChaincodeSupportError> {
        let input = spec.chaincode_spec().input().clone();
        let reply = self.inner.invoke(params, cccid, input)?;
        self.inner.process_reply(params, cccid, reply)
    }

    /// Launches the chaincode from `spec` and runs its initialization.
    pub fn execute_init(
        &self,
        params: &TransactionParams,
        cccid: &CCContext,
        spec: &ChaincodeDeploymentSpec,
    ) -> Result<ExecutionOutput, ChaincodeSupportError> {
        check_version(cccid, spec.chaincode_spec().chaincode_id().version())?;
        let handler = self.inner.launch(cccid, spec)?;

        let mut params = params.clone();
        params.is_init_transaction = true;
        let mut input = spec.chaincode_spec().input().clone();
        input.set_decorations(params.proposal_decorations.clone());

        let reply = self
            .inner
            .execute_transaction(&handler, &params, cccid, input)?;
        self.inner.process_reply(&params, cccid, reply)
    }

    /// Sends a transaction with `input` and returns the chaincode's terminal reply as is.
    pub fn invoke(
        &self,
        params: &TransactionParams,
        cccid: &CCContext,
        input: ChaincodeInput,
    ) -> Result<ChaincodeMessage, ChaincodeSupportError> {
        self.inner.invoke(params, cccid, input)
    }

    /// Ensures the chaincode is running and registered.
    pub fn launch(
        &self,
        _params: &TransactionParams,
        cccid: &CCContext,
    ) -> Result<(), ChaincodeSupportError> {
        let cccid = self.inner.resolve_version(cccid)?;
        let spec = self.inner.deployment_spec(&cccid)?;
        self.inner.launch(&cccid, &spec).map(|_| ())
    }

    /// Serves one chaincode connection until the stream ends.
    pub fn handle_chaincode_stream(
        &self,
        stream: Arc<dyn ChaincodeStream>,
    ) -> Result<(), HandlerError> {
        let handler = Handler::new(stream, self.handler_services());
        handler.process_stream()
    }

    /// Stops the chaincode's runtime and forgets its handler.
    pub fn stop(
        &self,
        cccid: &CCContext,
        spec: &ChaincodeDeploymentSpec,
    ) -> Result<(), ChaincodeSupportError> {
        self.inner.runtime.stop(cccid, spec)?;

        let name = cccid.canonical_name();
        if let Err(err) = self.inner.registry.deregister(&name) {
            debug!("Stopped {} without a registered handler: {}", name, err);
        }
        Ok(())
    }

    pub fn config(&self) -> &ChaincodeSupportConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    fn handler_services(&self) -> HandlerServices {
        HandlerServices {
            registry: self.inner.registry.clone() as Arc<dyn Registry>,
            invoker: Arc::new(SupportInvoker {
                inner: Arc::downgrade(&self.inner),
            }),
            acl_provider: self.inner.acl_provider.clone(),
            system_chaincodes: self.inner.system_chaincodes.clone(),
            ledger_provider: self.inner.ledger_provider.clone(),
            capabilities: self.inner.capabilities.clone(),
            query_response_builder: QueryResponseBuilder::new(self.inner.config.max_result_limit()),
        }
    }
}

#[derive(Default)]
pub struct ChaincodeSupportBuilder {
    config: Option<ChaincodeSupportConfig>,
    runtime: Option<Arc<dyn Runtime>>,
    definitions: Option<Arc<dyn ChaincodeDefinitionProvider>>,
    system_chaincodes: Option<Arc<dyn SystemChaincodeProvider>>,
    acl_provider: Option<Arc<dyn AclProvider>>,
    ledger_provider: Option<Arc<dyn LedgerProvider>>,
    capabilities: Option<Arc<dyn CapabilityProvider>>,
}

impl ChaincodeSupportBuilder {
    pub fn new() -> Self {
        ChaincodeSupportBuilder::default()
    }

    pub fn with_config(mut self, config: ChaincodeSupportConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_definitions(mut self, definitions: Arc<dyn ChaincodeDefinitionProvider>) -> Self {
        self.definitions = Some(definitions);
        self
    }

    pub fn with_system_chaincodes(
        mut self,
        system_chaincodes: Arc<dyn SystemChaincodeProvider>,
    ) -> Self {
        self.system_chaincodes = Some(system_chaincodes);
        self
    }

    pub fn with_acl_provider(mut self, acl_provider: Arc<dyn AclProvider>) -> Self {
        self.acl_provider = Some(acl_provider);
        self
    }

    pub fn with_ledger_provider(mut self, ledger_provider: Arc<dyn LedgerProvider>) -> Self {
        self.ledger_provider = Some(ledger_provider);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Builds the `ChaincodeSupport`.
    ///
    /// The runtime, the definitions and the ledger provider are required. Without an ACL
    /// provider every call is allowed; without capabilities private data is disabled.
    pub fn build(self) -> Result<ChaincodeSupport, ChaincodeSupportBuilderError> {
        let runtime = self.runtime.ok_or_else(|| {
            ChaincodeSupportBuilderError::MissingField("'runtime' field is required".into())
        })?;
        let definitions = self.definitions.ok_or_else(|| {
            ChaincodeSupportBuilderError::MissingField("'definitions' field is required".into())
        })?;
        let ledger_provider = self.ledger_provider.ok_or_else(|| {
            ChaincodeSupportBuilderError::MissingField(
                "'ledger_provider' field is required".into(),
            )
        })?;

        let config = self.config.unwrap_or_default();
        let registry = Arc::new(HandlerRegistry::new(config.user_runs_cc()));
        let launcher = RuntimeLauncher::new(
            runtime.clone(),
            registry.clone(),
            config.startup_timeout(),
        )
        .with_user_runs_cc(config.user_runs_cc());

        Ok(ChaincodeSupport {
            inner: Arc::new(SupportInner {
                config,
                registry,
                launcher,
                runtime,
                definitions,
                system_chaincodes: self
                    .system_chaincodes
                    .unwrap_or_else(|| Arc::new(SystemChaincodeRegistry::default())),
                acl_provider: self
                    .acl_provider
                    .unwrap_or_else(|| Arc::new(AllowAllAclProvider)),
                ledger_provider,
                capabilities: self
                    .capabilities
                    .unwrap_or_else(|| Arc::new(StaticCapabilities::default())),
            }),
        })
    }
}
