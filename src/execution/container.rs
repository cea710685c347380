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

//! A `Runtime` that runs each chaincode in its own container.
//!
//! The container itself is managed by a `VmController`; this module only derives what the
//! container is started with: its command line, its environment, and the TLS material it
//! needs to dial back to the peer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ChaincodeSupportConfig;
use crate::execution::runtime::Runtime;
use crate::execution::RuntimeError;
use crate::protocol::chaincode::{CCContext, ChaincodeDeploymentSpec, ChaincodeType};

pub const TLS_CLIENT_KEY_PATH: &str = "/etc/hyperledger/fabric/client.key";
pub const TLS_CLIENT_CERT_PATH: &str = "/etc/hyperledger/fabric/client.crt";
pub const TLS_ROOT_CERT_PATH: &str = "/etc/hyperledger/fabric/peer.crt";

/// A TLS client certificate and its private key.
#[derive(Debug, Clone, PartialEq)]
pub struct CertKeyPair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Issues TLS client certificates for chaincodes.
pub trait CertGenerator: Send + Sync {
    fn generate(&self, name: &str) -> Result<CertKeyPair, RuntimeError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartContainerRequest {
    pub ccid: String,
    pub args: Vec<String>,
    pub envs: Vec<String>,
    /// Files to place in the container, by path.
    pub files: BTreeMap<String, Vec<u8>>,
    pub code_package: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopContainerRequest {
    pub ccid: String,
    pub timeout: Duration,
    pub dont_remove: bool,
}

/// Manages the containers chaincodes run in.
pub trait VmController: Send + Sync {
    fn start(&self, request: StartContainerRequest) -> Result<(), RuntimeError>;

    fn stop(&self, request: StopContainerRequest) -> Result<(), RuntimeError>;
}

/// What a chaincode container is started with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchConfig {
    pub args: Vec<String>,
    pub envs: Vec<String>,
    pub files: BTreeMap<String, Vec<u8>>,
}

pub struct ContainerRuntime {
    controller: Arc<dyn VmController>,
    cert_generator: Option<Arc<dyn CertGenerator>>,
    peer_root_cert: Vec<u8>,
    peer_address: String,
    log_level: String,
    shim_log_level: String,
    log_format: String,
}

impl ContainerRuntime {
    pub fn new(controller: Arc<dyn VmController>, config: &ChaincodeSupportConfig) -> Self {
        ContainerRuntime {
            controller,
            cert_generator: None,
            peer_root_cert: vec![],
            peer_address: config.peer_address().to_string(),
            log_level: config.log_level().to_string(),
            shim_log_level: config.shim_log_level().to_string(),
            log_format: config.log_format().to_string(),
        }
    }

    /// Enables TLS: each chaincode gets a client certificate and the peer's root certificate.
    pub fn with_tls(
        mut self,
        cert_generator: Arc<dyn CertGenerator>,
        peer_root_cert: Vec<u8>,
    ) -> Self {
        self.cert_generator = Some(cert_generator);
        self.peer_root_cert = peer_root_cert;
        self
    }

    pub fn launch_config(
        &self,
        name: &str,
        chaincode_type: ChaincodeType,
    ) -> Result<LaunchConfig, RuntimeError> {
        let args = match chaincode_type {
            ChaincodeType::Golang | ChaincodeType::Car => vec![
                "chaincode".to_string(),
                format!("-peer.address={}", self.peer_address),
            ],
            ChaincodeType::Node => vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!(
                    "cd /usr/local/src; npm start -- --peer.address {}",
                    self.peer_address
                ),
            ],
            ChaincodeType::Java => vec![
                "/root/chaincode-java/start".to_string(),
                "--peerAddress".to_string(),
                self.peer_address.clone(),
            ],
            ChaincodeType::Undefined => {
                return Err(RuntimeError::UnknownChaincodeType(
                    chaincode_type.to_string(),
                ))
            }
        };

        let mut envs = vec![format!("CORE_CHAINCODE_ID_NAME={}", name)];
        let mut files = BTreeMap::new();

        match &self.cert_generator {
            Some(cert_generator) => {
                let cert_key_pair = cert_generator.generate(name)?;
                envs.push("CORE_PEER_TLS_ENABLED=true".to_string());
                envs.push(format!("CORE_TLS_CLIENT_KEY_PATH={}", TLS_CLIENT_KEY_PATH));
                envs.push(format!("CORE_TLS_CLIENT_CERT_PATH={}", TLS_CLIENT_CERT_PATH));
                envs.push(format!("CORE_PEER_TLS_ROOTCERT_FILE={}", TLS_ROOT_CERT_PATH));

                files.insert(TLS_CLIENT_KEY_PATH.to_string(), cert_key_pair.key);
                files.insert(TLS_CLIENT_CERT_PATH.to_string(), cert_key_pair.cert);
                files.insert(TLS_ROOT_CERT_PATH.to_string(), self.peer_root_cert.clone());
            }
            None => envs.push("CORE_PEER_TLS_ENABLED=false".to_string()),
        }

        envs.push(format!("CORE_CHAINCODE_LOGGING_LEVEL={}", self.log_level));
        envs.push(format!("CORE_CHAINCODE_LOGGING_SHIM={}", self.shim_log_level));
        envs.push(format!("CORE_CHAINCODE_LOGGING_FORMAT={}", self.log_format));

        debug!("Launch args for {}: {:?}", name, args);
        debug!("Launch envs for {}: {:?}", name, envs);

        Ok(LaunchConfig { args, envs, files })
    }
}

impl Runtime for ContainerRuntime {
    fn start(
        &self,
        cccid: &CCContext,
        spec: &ChaincodeDeploymentSpec,
    ) -> Result<(), RuntimeError> {
        let name = cccid.canonical_name();
        let launch_config = self.launch_config(&name, spec.chaincode_spec().chaincode_type())?;

        debug!("Starting container for {}", name);
        self.controller.start(StartContainerRequest {
            ccid: name,
            args: launch_config.args,
            envs: launch_config.envs,
            files: launch_config.files,
            code_package: spec.code_package().to_vec(),
        })
    }

    fn stop(
        &self,
        cccid: &CCContext,
        _spec: &ChaincodeDeploymentSpec,
    ) -> Result<(), RuntimeError> {
        let name = cccid.canonical_name();

        debug!("Stopping container for {}", name);
        self.controller.stop(StopContainerRequest {
            ccid: name,
            timeout: Duration::from_secs(0),
            dont_remove: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::protocol::chaincode::{ChaincodeId, ChaincodeInput, ChaincodeSpec};

    struct StaticCerts;

    impl CertGenerator for StaticCerts {
        fn generate(&self, _name: &str) -> Result<CertKeyPair, RuntimeError> {
            Ok(CertKeyPair {
                cert: b"cert".to_vec(),
                key: b"key".to_vec(),
            })
        }
    }

    struct FailingCerts;

    impl CertGenerator for FailingCerts {
        fn generate(&self, name: &str) -> Result<CertKeyPair, RuntimeError> {
            Err(RuntimeError::CertificateError(format!("no CA for {}", name)))
        }
    }

    #[derive(Default)]
    struct RecordingController {
        started: Mutex<Vec<StartContainerRequest>>,
        stopped: Mutex<Vec<StopContainerRequest>>,
    }

    impl VmController for RecordingController {
        fn start(&self, request: StartContainerRequest) -> Result<(), RuntimeError> {
            self.started.lock().expect("poisoned").push(request);
            Ok(())
        }

        fn stop(&self, request: StopContainerRequest) -> Result<(), RuntimeError> {
            self.stopped.lock().expect("poisoned").push(request);
            Ok(())
        }
    }

    fn runtime(controller: Arc<RecordingController>) -> ContainerRuntime {
        ContainerRuntime::new(controller, &ChaincodeSupportConfig::default())
    }

    #[test]
    fn launch_config_without_tls() {
        let runtime = runtime(Arc::new(RecordingController::default()));

        let golang = runtime
            .launch_config("mycc:0", ChaincodeType::Golang)
            .expect("golang config");
        assert_eq!(
            vec!["chaincode".to_string(), "-peer.address=0.0.0.0:7052".to_string()],
            golang.args
        );
        assert_eq!(5, golang.envs.len());
        assert!(golang.envs.contains(&"CORE_CHAINCODE_ID_NAME=mycc:0".to_string()));
        assert!(golang.envs.contains(&"CORE_PEER_TLS_ENABLED=false".to_string()));
        assert!(golang.files.is_empty());

        let car = runtime
            .launch_config("mycc:0", ChaincodeType::Car)
            .expect("car config");
        assert_eq!(golang.args, car.args);

        let node = runtime
            .launch_config("mycc:0", ChaincodeType::Node)
            .expect("node config");
        assert_eq!(3, node.args.len());
        assert_eq!(
            "cd /usr/local/src; npm start -- --peer.address 0.0.0.0:7052",
            node.args[2]
        );

        let java = runtime
            .launch_config("mycc:0", ChaincodeType::Java)
            .expect("java config");
        assert_eq!("--peerAddress", java.args[1]);
    }

    #[test]
    fn launch_config_with_tls() {
        let runtime = runtime(Arc::new(RecordingController::default()))
            .with_tls(Arc::new(StaticCerts), b"root".to_vec());

        let config = runtime
            .launch_config("mycc:0", ChaincodeType::Golang)
            .expect("tls config");

        assert_eq!(8, config.envs.len());
        assert!(config.envs.contains(&"CORE_PEER_TLS_ENABLED=true".to_string()));
        assert_eq!(3, config.files.len());
        assert_eq!(Some(&b"key".to_vec()), config.files.get(TLS_CLIENT_KEY_PATH));
        assert_eq!(Some(&b"cert".to_vec()), config.files.get(TLS_CLIENT_CERT_PATH));
        assert_eq!(Some(&b"root".to_vec()), config.files.get(TLS_ROOT_CERT_PATH));
    }

    #[test]
    fn launch_config_errors() {
        let runtime = runtime(Arc::new(RecordingController::default()));
        assert!(runtime
            .launch_config("mycc:0", ChaincodeType::Undefined)
            .is_err());

        let runtime = runtime_with_failing_certs();
        match runtime.launch_config("mycc:0", ChaincodeType::Golang) {
            Err(RuntimeError::CertificateError(msg)) => assert_eq!("no CA for mycc:0", msg),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    fn runtime_with_failing_certs() -> ContainerRuntime {
        runtime(Arc::new(RecordingController::default()))
            .with_tls(Arc::new(FailingCerts), vec![])
    }

    /// Test that start and stop hand the derived requests to the controller.
    #[test]
    fn start_and_stop_use_controller() {
        let controller = Arc::new(RecordingController::default());
        let runtime = runtime(controller.clone());
        let cccid = CCContext::new("testchannel", "mycc", "0", "txid", false);
        let spec = ChaincodeDeploymentSpec::new(
            ChaincodeSpec::new(
                ChaincodeType::Golang,
                ChaincodeId::new("mycc", "0"),
                ChaincodeInput::default(),
            ),
            b"package".to_vec(),
        );

        runtime.start(&cccid, &spec).expect("start");
        runtime.stop(&cccid, &spec).expect("stop");

        let started = controller.started.lock().expect("poisoned");
        assert_eq!(1, started.len());
        assert_eq!("mycc:0", started[0].ccid);
        assert_eq!(b"package".to_vec(), started[0].code_package);

        let stopped = controller.stopped.lock().expect("poisoned");
        assert_eq!(1, stopped.len());
        assert_eq!("mycc:0", stopped[0].ccid);
    }
}
