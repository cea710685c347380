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

//! System chaincodes are built-in chaincodes hosted by the peer itself. The support engine
//! only needs to recognize them, know whether they may be called from another chaincode, and
//! obtain the deployment spec used to start them.

use std::collections::HashMap;

use crate::protocol::chaincode::{
    ChaincodeDeploymentSpec, ChaincodeId, ChaincodeInput, ChaincodeSpec, ChaincodeType,
};

pub trait SystemChaincodeProvider: Send + Sync {
    fn is_system_chaincode(&self, name: &str) -> bool;

    /// Whether the system chaincode may be the target of a chaincode-to-chaincode call.
    fn is_invokable_cc2cc(&self, name: &str) -> bool;

    /// The version all system chaincodes run at.
    fn version(&self) -> &str;

    /// The deployment spec used to start the named system chaincode.
    fn deployment_spec(&self, name: &str) -> Option<ChaincodeDeploymentSpec>;
}

/// A fixed set of system chaincodes.
#[derive(Debug, Clone, Default)]
pub struct SystemChaincodeRegistry {
    version: String,
    // name -> invokable through cc2cc
    chaincodes: HashMap<String, bool>,
}

impl SystemChaincodeRegistry {
    pub fn new(version: &str) -> Self {
        SystemChaincodeRegistry {
            version: version.to_string(),
            chaincodes: HashMap::new(),
        }
    }

    pub fn with_chaincode(mut self, name: &str, invokable_cc2cc: bool) -> Self {
        self.chaincodes.insert(name.to_string(), invokable_cc2cc);
        self
    }
}

impl SystemChaincodeProvider for SystemChaincodeRegistry {
    fn is_system_chaincode(&self, name: &str) -> bool {
        self.chaincodes.contains_key(name)
    }

    fn is_invokable_cc2cc(&self, name: &str) -> bool {
        self.chaincodes.get(name).copied().unwrap_or(false)
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn deployment_spec(&self, name: &str) -> Option<ChaincodeDeploymentSpec> {
        if !self.is_system_chaincode(name) {
            return None;
        }
        Some(ChaincodeDeploymentSpec::new(
            ChaincodeSpec::new(
                ChaincodeType::Golang,
                ChaincodeId::new(name, &self.version),
                ChaincodeInput::default(),
            ),
            vec![],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_its_chaincodes() {
        let sccs = SystemChaincodeRegistry::new("1.2.0")
            .with_chaincode("lscc", true)
            .with_chaincode("vscc", false);

        assert!(sccs.is_system_chaincode("lscc"));
        assert!(sccs.is_system_chaincode("vscc"));
        assert!(!sccs.is_system_chaincode("mycc"));

        assert!(sccs.is_invokable_cc2cc("lscc"));
        assert!(!sccs.is_invokable_cc2cc("vscc"));
        assert!(!sccs.is_invokable_cc2cc("mycc"));

        let spec = sccs.deployment_spec("lscc").expect("No spec for lscc");
        assert_eq!("lscc:1.2.0", spec.chaincode_spec().chaincode_id().canonical_name());
        assert!(sccs.deployment_spec("mycc").is_none());
    }
}
