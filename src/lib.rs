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

//! Peer-side support for chaincode execution.
//!
//! The crate launches chaincode runtimes, speaks the peer side of the chaincode message
//! stream, and tracks one transaction context per in-flight transaction. `ChaincodeSupport`
//! in the `execution` module is the entry point; the remaining modules provide the types and
//! capability traits it is built from.

pub mod acl;
pub mod config;
pub mod context;
pub mod execution;
pub mod handler;
pub mod ledger;
pub mod protocol;
pub mod scc;
pub mod stream;

#[macro_use]
extern crate log;
