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

//! Chaincode identities, specifications and call contexts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChaincodeType {
    Undefined,
    Golang,
    Node,
    Car,
    Java,
}

impl Default for ChaincodeType {
    fn default() -> Self {
        ChaincodeType::Undefined
    }
}

impl fmt::Display for ChaincodeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ChaincodeType::Undefined => "UNDEFINED",
            ChaincodeType::Golang => "GOLANG",
            ChaincodeType::Node => "NODE",
            ChaincodeType::Car => "CAR",
            ChaincodeType::Java => "JAVA",
        };
        f.write_str(name)
    }
}

/// Identifies a chaincode by name and version.
///
/// The `name` field may hold a composite `name:version/channel` string when the id is used to
/// address another chaincode; see `ChaincodeInstance::parse`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChaincodeId {
    name: String,
    version: String,
    path: String,
}

impl ChaincodeId {
    pub fn new(name: &str, version: &str) -> Self {
        ChaincodeId {
            name: name.to_string(),
            version: version.to_string(),
            path: String::new(),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `name:version`, or the bare name if no version is set.
    pub fn canonical_name(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            canonical_name(&self.name, &self.version)
        }
    }
}

impl Payload for ChaincodeId {
    const NAME: &'static str = "ChaincodeId";
}

pub fn canonical_name(name: &str, version: &str) -> String {
    format!("{}:{}", name, version)
}

/// The parts of a composite chaincode name `name:version/channel`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaincodeInstance {
    pub chaincode_name: String,
    pub chaincode_version: String,
    pub channel_id: String,
}

impl ChaincodeInstance {
    /// Splits a composite name; absent parts are left empty.
    pub fn parse(composite: &str) -> Self {
        let mut instance = ChaincodeInstance::default();

        let mut channel_split = composite.splitn(2, '/');
        let name_and_version = channel_split.next().unwrap_or_default();
        if let Some(channel_id) = channel_split.next() {
            instance.channel_id = channel_id.to_string();
        }

        let mut version_split = name_and_version.splitn(2, ':');
        instance.chaincode_name = version_split.next().unwrap_or_default().to_string();
        if let Some(version) = version_split.next() {
            instance.chaincode_version = version.to_string();
        }

        instance
    }
}

impl fmt::Display for ChaincodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.chaincode_name, self.chaincode_version, self.channel_id
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeInput {
    args: Vec<Vec<u8>>,
    decorations: BTreeMap<String, Vec<u8>>,
}

impl ChaincodeInput {
    pub fn new(args: Vec<Vec<u8>>) -> Self {
        ChaincodeInput {
            args,
            decorations: BTreeMap::new(),
        }
    }

    /// Builds an input from string arguments.
    pub fn from_strs(args: &[&str]) -> Self {
        Self::new(args.iter().map(|arg| arg.as_bytes().to_vec()).collect())
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn decorations(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.decorations
    }

    pub fn set_decorations(&mut self, decorations: BTreeMap<String, Vec<u8>>) {
        self.decorations = decorations;
    }
}

impl Payload for ChaincodeInput {
    const NAME: &'static str = "ChaincodeInput";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeSpec {
    chaincode_type: ChaincodeType,
    chaincode_id: ChaincodeId,
    input: ChaincodeInput,
}

impl ChaincodeSpec {
    pub fn new(chaincode_type: ChaincodeType, chaincode_id: ChaincodeId, input: ChaincodeInput) -> Self {
        ChaincodeSpec {
            chaincode_type,
            chaincode_id,
            input,
        }
    }

    pub fn chaincode_type(&self) -> ChaincodeType {
        self.chaincode_type
    }

    pub fn chaincode_id(&self) -> &ChaincodeId {
        &self.chaincode_id
    }

    pub fn input(&self) -> &ChaincodeInput {
        &self.input
    }

    pub fn into_input(self) -> ChaincodeInput {
        self.input
    }
}

impl Payload for ChaincodeSpec {
    const NAME: &'static str = "ChaincodeSpec";
}

/// A single call to a deployed chaincode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeInvocationSpec {
    chaincode_spec: ChaincodeSpec,
}

impl ChaincodeInvocationSpec {
    pub fn new(chaincode_spec: ChaincodeSpec) -> Self {
        ChaincodeInvocationSpec { chaincode_spec }
    }

    pub fn chaincode_spec(&self) -> &ChaincodeSpec {
        &self.chaincode_spec
    }
}

impl Payload for ChaincodeInvocationSpec {
    const NAME: &'static str = "ChaincodeInvocationSpec";
}

/// The specification and code package needed to start a chaincode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeDeploymentSpec {
    chaincode_spec: ChaincodeSpec,
    code_package: Vec<u8>,
}

impl ChaincodeDeploymentSpec {
    pub fn new(chaincode_spec: ChaincodeSpec, code_package: Vec<u8>) -> Self {
        ChaincodeDeploymentSpec {
            chaincode_spec,
            code_package,
        }
    }

    pub fn chaincode_spec(&self) -> &ChaincodeSpec {
        &self.chaincode_spec
    }

    pub fn code_package(&self) -> &[u8] {
        &self.code_package
    }
}

impl Payload for ChaincodeDeploymentSpec {
    const NAME: &'static str = "ChaincodeDeploymentSpec";
}

/// The chaincode and transaction a call is made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CCContext {
    channel_id: String,
    name: String,
    version: String,
    tx_id: String,
    syscc: bool,
}

impl CCContext {
    pub fn new(channel_id: &str, name: &str, version: &str, tx_id: &str, syscc: bool) -> Self {
        CCContext {
            channel_id: channel_id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            tx_id: tx_id.to_string(),
            syscc,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn is_syscc(&self) -> bool {
        self.syscc
    }

    pub fn canonical_name(&self) -> String {
        canonical_name(&self.name, &self.version)
    }
}
