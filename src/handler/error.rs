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

use crate::acl::AclError;
use crate::context::query::QueryResponseError;
use crate::context::TransactionContextError;
use crate::execution::{ChaincodeSupportError, RegistryError};
use crate::ledger::LedgerError;
use crate::protocol::PayloadError;
use crate::stream::StreamError;

#[derive(Debug)]
pub enum HandlerError {
    /// A malformed or out-of-sequence message; fatal to the stream.
    Protocol(String),
    /// The transaction has no context with a ledger simulator.
    NoLedgerContext { channel_id: String, tx_id: String },
    ContextNotFound { channel_id: String, tx_id: String },
    /// A private data operation on a channel without the private data capability.
    NotYetSupported(String),
    PrivateDataInInit,
    /// The target is a system chaincode that may not be called from another chaincode.
    NotInvokable(String),
    MissingSignedProposal(String),
    /// Another request from the chaincode for the same transaction is still being handled.
    RequestPending {
        chaincode: String,
        channel_id: String,
        tx_id: String,
    },
    /// The called chaincode replied with an error.
    ChaincodeError(String),
    AclDenied(AclError),
    ContextError(TransactionContextError),
    QueryError(QueryResponseError),
    LedgerError(LedgerError),
    PayloadError(PayloadError),
    StreamError(StreamError),
    RegistryError(RegistryError),
    InvokeError(Box<ChaincodeSupportError>),
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            HandlerError::AclDenied(ref err) => Some(err),
            HandlerError::ContextError(ref err) => Some(err),
            HandlerError::QueryError(ref err) => Some(err),
            HandlerError::LedgerError(ref err) => Some(err),
            HandlerError::PayloadError(ref err) => Some(err),
            HandlerError::StreamError(ref err) => Some(err),
            HandlerError::RegistryError(ref err) => Some(err),
            HandlerError::InvokeError(ref err) => Some(&**err),
            _ => None,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandlerError::Protocol(s) => write!(f, "Protocol Error: {}", s),
            HandlerError::NoLedgerContext { channel_id, tx_id } => {
                write!(f, "No ledger context for {}({})", tx_id, channel_id)
            }
            HandlerError::ContextNotFound { channel_id, tx_id } => write!(
                f,
                "failed to get transaction context for {}({})",
                tx_id, channel_id
            ),
            HandlerError::NotYetSupported(s) => write!(f, "Not Yet Supported: {}", s),
            HandlerError::PrivateDataInInit => {
                f.write_str("private data APIs are not allowed in chaincode Init()")
            }
            HandlerError::NotInvokable(name) => write!(
                f,
                "system chaincode {} cannot be invoked with a cc2cc invocation",
                name
            ),
            HandlerError::MissingSignedProposal(target) => write!(
                f,
                "signed proposal must not be nil from caller [{}]",
                target
            ),
            HandlerError::RequestPending {
                chaincode,
                channel_id,
                tx_id,
            } => write!(
                f,
                "Another request pending for this CC: {}, Txid: {}, ChannelID: {}. Cannot process.",
                chaincode, tx_id, channel_id
            ),
            HandlerError::ChaincodeError(s) => write!(f, "called chaincode failed: {}", s),
            HandlerError::AclDenied(err) => write!(f, "{}", err),
            HandlerError::ContextError(err) => write!(f, "{}", err),
            HandlerError::QueryError(err) => write!(f, "{}", err),
            HandlerError::LedgerError(err) => write!(f, "{}", err),
            HandlerError::PayloadError(err) => write!(f, "{}", err),
            HandlerError::StreamError(err) => write!(f, "{}", err),
            HandlerError::RegistryError(err) => write!(f, "{}", err),
            HandlerError::InvokeError(err) => write!(f, "execute failed: {}", err),
        }
    }
}

impl From<AclError> for HandlerError {
    fn from(err: AclError) -> Self {
        HandlerError::AclDenied(err)
    }
}

impl From<TransactionContextError> for HandlerError {
    fn from(err: TransactionContextError) -> Self {
        HandlerError::ContextError(err)
    }
}

impl From<QueryResponseError> for HandlerError {
    fn from(err: QueryResponseError) -> Self {
        HandlerError::QueryError(err)
    }
}

impl From<LedgerError> for HandlerError {
    fn from(err: LedgerError) -> Self {
        HandlerError::LedgerError(err)
    }
}

impl From<PayloadError> for HandlerError {
    fn from(err: PayloadError) -> Self {
        HandlerError::PayloadError(err)
    }
}

impl From<StreamError> for HandlerError {
    fn from(err: StreamError) -> Self {
        HandlerError::StreamError(err)
    }
}

impl From<RegistryError> for HandlerError {
    fn from(err: RegistryError) -> Self {
        HandlerError::RegistryError(err)
    }
}

impl From<ChaincodeSupportError> for HandlerError {
    fn from(err: ChaincodeSupportError) -> Self {
        HandlerError::InvokeError(Box::new(err))
    }
}
