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

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::execution::registry::HandlerRegistry;
use crate::execution::runtime::Runtime;
use crate::execution::LaunchError;
use crate::handler::Registry;
use crate::protocol::chaincode::{CCContext, ChaincodeDeploymentSpec};
use crate::protocol::message::short_txid;

/// Brings a chaincode to the ready state through a `Runtime`.
pub struct RuntimeLauncher {
    runtime: Arc<dyn Runtime>,
    registry: Arc<HandlerRegistry>,
    startup_timeout: Duration,
    user_runs_cc: bool,
}

impl RuntimeLauncher {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<HandlerRegistry>,
        startup_timeout: Duration,
    ) -> Self {
        RuntimeLauncher {
            runtime,
            registry,
            startup_timeout,
            user_runs_cc: false,
        }
    }

    /// In development mode user chaincodes are started by the developer; the launcher only
    /// waits for them to register.
    pub fn with_user_runs_cc(mut self, user_runs_cc: bool) -> Self {
        self.user_runs_cc = user_runs_cc;
        self
    }

    /// Starts the chaincode unless it is already running or starting, then waits until it
    /// has registered, its start failed, or the startup timeout expired.
    pub fn launch(
        &self,
        cccid: &CCContext,
        spec: &ChaincodeDeploymentSpec,
    ) -> Result<(), LaunchError> {
        let name = cccid.canonical_name();
        let (launch_state, already_started) = self.registry.launching(&name);
        let start_runtime = !already_started && !(self.user_runs_cc && !cccid.is_syscc());

        if start_runtime {
            debug!(
                "[{}] Starting chaincode {}",
                short_txid(cccid.tx_id()),
                name
            );
            let runtime = self.runtime.clone();
            let thread_state = launch_state.clone();
            let thread_cccid = cccid.clone();
            let thread_spec = spec.clone();

            let spawned = thread::Builder::new()
                .name(format!("launch-{}", name))
                .spawn(move || {
                    if let Err(err) = runtime.start(&thread_cccid, &thread_spec) {
                        let err = LaunchError::StartFailed(err.to_string());
                        if !thread_state.notify(Err(err.clone())) {
                            debug!("Ignoring start failure after launch completed: {}", err);
                        }
                    }
                });
            if let Err(err) = spawned {
                launch_state.notify(Err(LaunchError::ThreadError(err.to_string())));
            }
        }

        let result = match launch_state.wait(self.startup_timeout) {
            Some(result) => result,
            None => {
                let timeout = Err(LaunchError::Timeout {
                    name: name.clone(),
                    tx_id: cccid.tx_id().to_string(),
                });
                if launch_state.notify(timeout.clone()) {
                    timeout
                } else {
                    launch_state.result().unwrap_or(timeout)
                }
            }
        };

        if let Err(ref err) = result {
            if !already_started {
                warn!("Launch of {} failed: {}", name, err);
                if start_runtime {
                    if let Err(err) = self.runtime.stop(cccid, spec) {
                        debug!("Stopping {} after failed launch: {}", name, err);
                    }
                }
                if let Err(err) = self.registry.deregister(&name) {
                    debug!("Deregistering {} after failed launch: {}", name, err);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::execution::RuntimeError;
    use crate::protocol::chaincode::{ChaincodeId, ChaincodeInput, ChaincodeSpec, ChaincodeType};

    #[derive(Clone)]
    enum Behaviour {
        Fail(String),
        Ready(Arc<HandlerRegistry>),
        Sleep(Duration),
    }

    struct MockRuntime {
        behaviour: Behaviour,
        stopped: Arc<AtomicBool>,
    }

    impl MockRuntime {
        fn new(behaviour: Behaviour) -> Self {
            MockRuntime {
                behaviour,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Runtime for MockRuntime {
        fn start(
            &self,
            cccid: &CCContext,
            _spec: &ChaincodeDeploymentSpec,
        ) -> Result<(), RuntimeError> {
            match &self.behaviour {
                Behaviour::Fail(msg) => Err(RuntimeError::Failed(msg.clone())),
                Behaviour::Ready(registry) => {
                    registry.ready(&cccid.canonical_name());
                    Ok(())
                }
                Behaviour::Sleep(duration) => {
                    thread::sleep(*duration);
                    Ok(())
                }
            }
        }

        fn stop(
            &self,
            _cccid: &CCContext,
            _spec: &ChaincodeDeploymentSpec,
        ) -> Result<(), RuntimeError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn spec() -> ChaincodeDeploymentSpec {
        ChaincodeDeploymentSpec::new(
            ChaincodeSpec::new(
                ChaincodeType::Golang,
                ChaincodeId::new("mycc", "0"),
                ChaincodeInput::default(),
            ),
            vec![],
        )
    }

    fn cccid() -> CCContext {
        CCContext::new("testchannel", "mycc", "0", "txid-1234567890", false)
    }

    /// Test that a start error is reported with the container prefix and the launch is
    /// cleaned up.
    #[test]
    fn start_error_is_prefixed() {
        let registry = Arc::new(HandlerRegistry::new(false));
        let runtime = Arc::new(MockRuntime::new(Behaviour::Fail(
            "Bad lunch; upset stomach".into(),
        )));
        let launcher =
            RuntimeLauncher::new(runtime.clone(), registry.clone(), Duration::from_secs(10));

        let err = launcher
            .launch(&cccid(), &spec())
            .expect_err("launch should fail");

        assert_eq!(
            "error starting container: Bad lunch; upset stomach",
            err.to_string()
        );
        assert!(runtime.stopped.load(Ordering::SeqCst));
        let (_, started) = registry.launching("mycc:0");
        assert!(!started);
    }

    #[test]
    fn ready_before_timeout_succeeds() {
        let registry = Arc::new(HandlerRegistry::new(false));
        let runtime = Arc::new(MockRuntime::new(Behaviour::Ready(registry.clone())));
        let launcher =
            RuntimeLauncher::new(runtime.clone(), registry, Duration::from_secs(10));

        assert_eq!(Ok(()), launcher.launch(&cccid(), &spec()));
        assert!(!runtime.stopped.load(Ordering::SeqCst));
    }

    /// Test that in development mode a user chaincode is never started, only waited for.
    #[test]
    fn user_runs_cc_skips_runtime() {
        let registry = Arc::new(HandlerRegistry::new(true));
        let runtime = Arc::new(MockRuntime::new(Behaviour::Fail("should not start".into())));
        let launcher = RuntimeLauncher::new(runtime.clone(), registry, Duration::from_millis(50))
            .with_user_runs_cc(true);

        match launcher.launch(&cccid(), &spec()) {
            Err(LaunchError::Timeout { name, .. }) => assert_eq!("mycc:0", name),
            other => panic!("unexpected launch result: {:?}", other),
        }
        assert!(!runtime.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn startup_timeout_expires() {
        let registry = Arc::new(HandlerRegistry::new(false));
        let runtime = Arc::new(MockRuntime::new(Behaviour::Sleep(Duration::from_secs(1))));
        let launcher =
            RuntimeLauncher::new(runtime.clone(), registry, Duration::from_millis(500));

        let err = launcher
            .launch(&cccid(), &spec())
            .expect_err("launch should time out");

        assert_eq!(
            "timeout expired while starting chaincode mycc:0 for transaction txid-1234567890",
            err.to_string()
        );
        assert!(runtime.stopped.load(Ordering::SeqCst));
    }
}
