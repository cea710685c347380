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

//! Launching chaincodes and executing transactions on them.

pub mod container;
mod error;
pub mod launcher;
pub mod registry;
pub mod runtime;
mod support;

pub use crate::execution::error::{
    ChaincodeSupportBuilderError, ChaincodeSupportError, LaunchError, RegistryError,
    RuntimeError,
};
pub use crate::execution::support::{
    ChaincodeDefinitionProvider, ChaincodeDefinitions, ChaincodeSupport,
    ChaincodeSupportBuilder, ExecutionOutput,
};
