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

//! Access control checks consulted by the support engine.
//!
//! Policy evaluation itself is delegated to an `AclProvider`. `AllowAllAclProvider` accepts
//! every request and is meant for development networks and tests.

use std::error::Error;
use std::fmt;

use crate::protocol::proposal::SignedProposal;

/// The resource checked before one chaincode invokes another.
pub const PEER_CHAINCODE_TO_CHAINCODE: &str = "peer/ChaincodeToChaincode";

#[derive(Debug)]
pub enum AclError {
    /// The policy for the resource rejected the proposal.
    Denied {
        resource: String,
        channel_id: String,
        reason: String,
    },
    GeneralError(Box<dyn Error + Send>),
}

impl Error for AclError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            AclError::GeneralError(ref err) => Some(&**err),
            _ => None,
        }
    }
}

impl fmt::Display for AclError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AclError::Denied {
                resource,
                channel_id,
                reason,
            } => write!(
                f,
                "access denied for [{}][{}]: {}",
                resource, channel_id, reason
            ),
            AclError::GeneralError(err) => write!(f, "General ACL Error: {}", err),
        }
    }
}

/// Decides whether a signed proposal may access a resource on a channel.
pub trait AclProvider: Send + Sync {
    fn check_acl(
        &self,
        resource: &str,
        channel_id: &str,
        signed_proposal: &SignedProposal,
    ) -> Result<(), AclError>;
}

/// An `AclProvider` that grants every request.
#[derive(Default)]
pub struct AllowAllAclProvider;

impl AclProvider for AllowAllAclProvider {
    fn check_acl(
        &self,
        resource: &str,
        channel_id: &str,
        _signed_proposal: &SignedProposal,
    ) -> Result<(), AclError> {
        debug!("Allowing access to [{}][{}]", resource, channel_id);
        Ok(())
    }
}
