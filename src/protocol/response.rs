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

use serde::{Deserialize, Serialize};

use super::Payload;

/// Status of a successful chaincode response.
pub const OK: i32 = 200;
/// Statuses at or above this value are errors.
pub const ERROR_THRESHOLD: i32 = 400;
/// Status of a failed chaincode response.
pub const ERROR: i32 = 500;

/// The result a chaincode returns for a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    status: i32,
    message: String,
    payload: Vec<u8>,
}

impl Response {
    pub fn new(status: i32, message: &str, payload: Vec<u8>) -> Self {
        Response {
            status,
            message: message.to_string(),
            payload,
        }
    }

    pub fn success(payload: Vec<u8>) -> Self {
        Self::new(OK, "", payload)
    }

    pub fn error(message: &str) -> Self {
        Self::new(ERROR, message, vec![])
    }

    pub fn status(&self) -> i32 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_error(&self) -> bool {
        self.status >= ERROR_THRESHOLD
    }
}

impl Payload for Response {
    const NAME: &'static str = "Response";
}

/// An event emitted by a chaincode alongside its response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    chaincode_id: String,
    tx_id: String,
    event_name: String,
    payload: Vec<u8>,
}

impl ChaincodeEvent {
    pub fn new(event_name: &str, payload: Vec<u8>) -> Self {
        ChaincodeEvent {
            chaincode_id: String::new(),
            tx_id: String::new(),
            event_name: event_name.to_string(),
            payload,
        }
    }

    pub fn chaincode_id(&self) -> &str {
        &self.chaincode_id
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Stamps the event with the chaincode and transaction that produced it.
    pub fn set_origin(&mut self, chaincode_id: &str, tx_id: &str) {
        self.chaincode_id = chaincode_id.to_string();
        self.tx_id = tx_id.to_string();
    }
}

impl Payload for ChaincodeEvent {
    const NAME: &'static str = "ChaincodeEvent";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FromBytes, IntoBytes};

    #[test]
    fn response_status_threshold() {
        assert!(!Response::success(b"OK".to_vec()).is_error());
        assert!(Response::error("failed").is_error());
        assert!(Response::new(ERROR_THRESHOLD, "", vec![]).is_error());
    }

    #[test]
    fn response_from_bad_bytes() {
        match Response::from_bytes(b"not a response") {
            Err(crate::protocol::PayloadError::DeserializationError(msg)) => {
                assert!(msg.starts_with("Unable to get Response from bytes"))
            }
            res => panic!("Expected DeserializationError, got {:?}", res),
        }
    }

    #[test]
    fn response_bytes_are_readable_back() {
        let bytes = Response::new(OK, "done", b"payload".to_vec())
            .into_bytes()
            .expect("Unable to serialize response");
        let response = Response::from_bytes(&bytes).expect("Unable to deserialize response");
        assert_eq!(OK, response.status());
        assert_eq!("done", response.message());
        assert_eq!(b"payload", response.payload());
    }
}
