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

#[derive(Debug, PartialEq)]
pub enum TransactionContextError {
    /// A context for the same channel and transaction id is already live.
    Duplicate { channel_id: String, tx_id: String },
    /// The transaction has already completed or errored.
    TerminalState { channel_id: String, tx_id: String },
    /// No terminal reply arrived before the deadline.
    Timeout { channel_id: String, tx_id: String },
    /// The chaincode stream ended while the transaction was waiting.
    StreamTerminated,
}

impl Error for TransactionContextError {}

impl fmt::Display for TransactionContextError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransactionContextError::Duplicate { channel_id, tx_id } => {
                write!(f, "txid: {}({}) exists", tx_id, channel_id)
            }
            TransactionContextError::TerminalState { channel_id, tx_id } => write!(
                f,
                "transaction {}({}) has already completed",
                tx_id, channel_id
            ),
            TransactionContextError::Timeout { .. } => {
                f.write_str("timeout expired while executing transaction")
            }
            TransactionContextError::StreamTerminated => f.write_str("chaincode stream terminated"),
        }
    }
}
