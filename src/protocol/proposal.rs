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

//! Proposals are carried through the support engine untouched; only access-control checks
//! look at them, and those are delegated.

use serde::{Deserialize, Serialize};

use super::Payload;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    proposal_bytes: Vec<u8>,
    signature: Vec<u8>,
}

impl SignedProposal {
    pub fn new(proposal_bytes: Vec<u8>, signature: Vec<u8>) -> Self {
        SignedProposal {
            proposal_bytes,
            signature,
        }
    }

    pub fn proposal_bytes(&self) -> &[u8] {
        &self.proposal_bytes
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

impl Payload for SignedProposal {
    const NAME: &'static str = "SignedProposal";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    header: Vec<u8>,
    payload: Vec<u8>,
}

impl Proposal {
    pub fn new(header: Vec<u8>, payload: Vec<u8>) -> Self {
        Proposal { header, payload }
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl Payload for Proposal {
    const NAME: &'static str = "Proposal";
}
