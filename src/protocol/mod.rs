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

//! Native types for the chaincode protocol.
//!
//! Payloads carried on a `ChaincodeMessage` are opaque bytes; the types in this module convert
//! to and from those bytes through the `FromBytes` and `IntoBytes` traits.

pub mod chaincode;
pub mod message;
pub mod payload;
pub mod proposal;
pub mod response;

use std::error::Error as StdError;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug)]
pub enum PayloadError {
    SerializationError(String),
    DeserializationError(String),
}

impl StdError for PayloadError {}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            PayloadError::SerializationError(ref s) => write!(f, "SerializationError: {}", s),
            PayloadError::DeserializationError(ref s) => {
                write!(f, "DeserializationError: {}", s)
            }
        }
    }
}

/// A type that travels as the payload of a chaincode message.
pub trait Payload: Serialize + DeserializeOwned {
    /// Name used when reporting conversion failures.
    const NAME: &'static str;
}

pub trait FromBytes: Sized {
    fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError>;
}

pub trait IntoBytes: Sized {
    fn into_bytes(self) -> Result<Vec<u8>, PayloadError>;
}

impl<T: Payload> FromBytes for T {
    fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(bytes).map_err(|err| {
            PayloadError::DeserializationError(format!(
                "Unable to get {} from bytes: {}",
                T::NAME,
                err
            ))
        })
    }
}

impl<T: Payload> IntoBytes for T {
    fn into_bytes(self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(&self).map_err(|err| {
            PayloadError::SerializationError(format!(
                "Unable to get bytes from {}: {}",
                T::NAME,
                err
            ))
        })
    }
}
