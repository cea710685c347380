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

use crate::execution::RuntimeError;
use crate::protocol::chaincode::{CCContext, ChaincodeDeploymentSpec};

/// Starts and stops chaincode processes.
///
/// `start` returns once the process has been started; the chaincode then dials the peer
/// and registers over its own stream.
pub trait Runtime: Send + Sync {
    fn start(
        &self,
        cccid: &CCContext,
        spec: &ChaincodeDeploymentSpec,
    ) -> Result<(), RuntimeError>;

    fn stop(&self, cccid: &CCContext, spec: &ChaincodeDeploymentSpec)
        -> Result<(), RuntimeError>;
}
