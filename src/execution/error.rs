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

use std::error::Error;
use std::fmt;

use crate::handler::HandlerError;
use crate::ledger::LedgerError;
use crate::protocol::PayloadError;

/// Errors raised by the handler registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A handler is already registered under this name.
    DuplicateRegistration(String),
    /// A chaincode the peer did not launch tried to register.
    UnsolicitedRegistration(String),
    NotFound(String),
}

impl Error for RegistryError {}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::DuplicateRegistration(name) => {
                write!(f, "duplicate chaincodeID: {}", name)
            }
            RegistryError::UnsolicitedRegistration(name) => write!(
                f,
                "peer will not accept external chaincode connection {} (except in dev mode)",
                name
            ),
            RegistryError::NotFound(name) => write!(f, "could not find handler: {}", name),
        }
    }
}

/// Why a chaincode could not be brought to the ready state.
///
/// Every caller waiting on the same launch observes the same error, so it is `Clone`.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchError {
    StartFailed(String),
    RegistrationFailed(String),
    Timeout { name: String, tx_id: String },
    ThreadError(String),
}

impl Error for LaunchError {}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LaunchError::StartFailed(msg) => write!(f, "error starting container: {}", msg),
            LaunchError::RegistrationFailed(msg) => {
                write!(f, "chaincode registration failed: {}", msg)
            }
            LaunchError::Timeout { name, tx_id } => write!(
                f,
                "timeout expired while starting chaincode {} for transaction {}",
                name, tx_id
            ),
            LaunchError::ThreadError(msg) => {
                write!(f, "unable to start launch thread: {}", msg)
            }
        }
    }
}

/// Errors raised by a chaincode runtime.
#[derive(Debug)]
pub enum RuntimeError {
    Failed(String),
    UnknownChaincodeType(String),
    CertificateError(String),
    GeneralError(Box<dyn Error + Send>),
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            RuntimeError::GeneralError(ref err) => Some(&**err),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::Failed(msg) => f.write_str(msg),
            RuntimeError::UnknownChaincodeType(chaincode_type) => {
                write!(f, "unknown chaincodeType: {}", chaincode_type)
            }
            RuntimeError::CertificateError(msg) => {
                write!(f, "failed to generate TLS certificates: {}", msg)
            }
            RuntimeError::GeneralError(err) => write!(f, "{}", err),
        }
    }
}

/// Errors returned to callers of `ChaincodeSupport`.
#[derive(Debug)]
pub enum ChaincodeSupportError {
    Launch {
        channel_id: String,
        name: String,
        err: LaunchError,
    },
    /// The caller asked for a version other than the one deployed.
    VersionMismatch {
        name: String,
        requested: String,
        deployed: String,
    },
    /// The deployed definition of the chaincode could not be found.
    Definition(String),
    /// The chaincode did not reply within the execute timeout.
    ExecuteTimeout(String),
    /// The chaincode replied with an `ERROR` message.
    ChaincodeError(String),
    UnexpectedResponse(String),
    StreamTerminated(String),
    Handler(HandlerError),
    Runtime(RuntimeError),
    LedgerError(LedgerError),
    PayloadError(PayloadError),
    /// The `ChaincodeSupport` that owned the handler has been dropped.
    Shutdown,
    GeneralError(Box<dyn Error + Send>),
}

impl Error for ChaincodeSupportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            ChaincodeSupportError::Launch { ref err, .. } => Some(err),
            ChaincodeSupportError::Handler(ref err) => Some(err),
            ChaincodeSupportError::Runtime(ref err) => Some(err),
            ChaincodeSupportError::LedgerError(ref err) => Some(err),
            ChaincodeSupportError::PayloadError(ref err) => Some(err),
            ChaincodeSupportError::GeneralError(ref err) => Some(&**err),
            _ => None,
        }
    }
}

impl fmt::Display for ChaincodeSupportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChaincodeSupportError::Launch {
                channel_id,
                name,
                err,
            } => write!(
                f,
                "[channel {}] could not launch chaincode {}: {}",
                channel_id, name, err
            ),
            ChaincodeSupportError::VersionMismatch {
                name,
                requested,
                deployed,
            } => write!(
                f,
                "chaincode {}: requested version {} does not match deployed version {}",
                name, requested, deployed
            ),
            ChaincodeSupportError::Definition(msg) => {
                write!(f, "failed to get chaincode definition: {}", msg)
            }
            ChaincodeSupportError::ExecuteTimeout(name) => {
                write!(f, "timeout expired while executing transaction on {}", name)
            }
            ChaincodeSupportError::ChaincodeError(msg) => {
                write!(f, "transaction returned with failure: {}", msg)
            }
            ChaincodeSupportError::UnexpectedResponse(msg) => {
                write!(f, "unexpected response from chaincode: {}", msg)
            }
            ChaincodeSupportError::StreamTerminated(name) => {
                write!(f, "chaincode stream terminated: {}", name)
            }
            ChaincodeSupportError::Handler(err) => write!(f, "{}", err),
            ChaincodeSupportError::Runtime(err) => write!(f, "{}", err),
            ChaincodeSupportError::LedgerError(err) => write!(f, "{}", err),
            ChaincodeSupportError::PayloadError(err) => write!(f, "{}", err),
            ChaincodeSupportError::Shutdown => f.write_str("chaincode support is shut down"),
            ChaincodeSupportError::GeneralError(err) => {
                write!(f, "General Chaincode Support Error: {}", err)
            }
        }
    }
}

impl From<LedgerError> for ChaincodeSupportError {
    fn from(err: LedgerError) -> Self {
        ChaincodeSupportError::LedgerError(err)
    }
}

impl From<RuntimeError> for ChaincodeSupportError {
    fn from(err: RuntimeError) -> Self {
        ChaincodeSupportError::Runtime(err)
    }
}

impl From<PayloadError> for ChaincodeSupportError {
    fn from(err: PayloadError) -> Self {
        ChaincodeSupportError::PayloadError(err)
    }
}

/// Errors raised while building a `ChaincodeSupport`.
#[derive(Debug, PartialEq)]
pub enum ChaincodeSupportBuilderError {
    MissingField(String),
}

impl Error for ChaincodeSupportBuilderError {}

impl fmt::Display for ChaincodeSupportBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChaincodeSupportBuilderError::MissingField(field) => {
                write!(f, "missing required field: {}", field)
            }
        }
    }
}
