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

use std::fmt;

use super::proposal::SignedProposal;
use super::response::ChaincodeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChaincodeMessageType {
    Register,
    Registered,
    Ready,
    Transaction,
    Response,
    Error,
    Completed,
    PutState,
    GetState,
    DelState,
    GetStateByRange,
    GetQueryResult,
    GetHistoryForKey,
    QueryStateNext,
    QueryStateClose,
    InvokeChaincode,
}

impl fmt::Display for ChaincodeMessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ChaincodeMessageType::Register => "REGISTER",
            ChaincodeMessageType::Registered => "REGISTERED",
            ChaincodeMessageType::Ready => "READY",
            ChaincodeMessageType::Transaction => "TRANSACTION",
            ChaincodeMessageType::Response => "RESPONSE",
            ChaincodeMessageType::Error => "ERROR",
            ChaincodeMessageType::Completed => "COMPLETED",
            ChaincodeMessageType::PutState => "PUT_STATE",
            ChaincodeMessageType::GetState => "GET_STATE",
            ChaincodeMessageType::DelState => "DEL_STATE",
            ChaincodeMessageType::GetStateByRange => "GET_STATE_BY_RANGE",
            ChaincodeMessageType::GetQueryResult => "GET_QUERY_RESULT",
            ChaincodeMessageType::GetHistoryForKey => "GET_HISTORY_FOR_KEY",
            ChaincodeMessageType::QueryStateNext => "QUERY_STATE_NEXT",
            ChaincodeMessageType::QueryStateClose => "QUERY_STATE_CLOSE",
            ChaincodeMessageType::InvokeChaincode => "INVOKE_CHAINCODE",
        };
        f.write_str(name)
    }
}

/// A single message exchanged between the peer and a chaincode.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodeMessage {
    message_type: ChaincodeMessageType,
    txid: String,
    channel_id: String,
    payload: Vec<u8>,
    proposal: Option<SignedProposal>,
    chaincode_event: Option<ChaincodeEvent>,
}

impl ChaincodeMessage {
    pub fn new(
        message_type: ChaincodeMessageType,
        txid: &str,
        channel_id: &str,
        payload: Vec<u8>,
    ) -> Self {
        ChaincodeMessage {
            message_type,
            txid: txid.to_string(),
            channel_id: channel_id.to_string(),
            payload,
            proposal: None,
            chaincode_event: None,
        }
    }

    /// A message that is not scoped to any transaction, such as those of the handshake.
    pub fn unscoped(message_type: ChaincodeMessageType, payload: Vec<u8>) -> Self {
        Self::new(message_type, "", "", payload)
    }

    /// An `ERROR` reply for the transaction of `msg` carrying `reason` as its payload.
    pub fn error_reply(msg: &ChaincodeMessage, reason: &str) -> Self {
        Self::new(
            ChaincodeMessageType::Error,
            &msg.txid,
            &msg.channel_id,
            reason.as_bytes().to_vec(),
        )
    }

    pub fn with_proposal(mut self, proposal: Option<SignedProposal>) -> Self {
        self.proposal = proposal;
        self
    }

    pub fn with_chaincode_event(mut self, chaincode_event: Option<ChaincodeEvent>) -> Self {
        self.chaincode_event = chaincode_event;
        self
    }

    pub fn message_type(&self) -> ChaincodeMessageType {
        self.message_type
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn proposal(&self) -> Option<&SignedProposal> {
        self.proposal.as_ref()
    }

    pub fn chaincode_event(&self) -> Option<&ChaincodeEvent> {
        self.chaincode_event.as_ref()
    }

    pub fn take_chaincode_event(&mut self) -> Option<ChaincodeEvent> {
        self.chaincode_event.take()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// The first eight characters of a transaction id, for log lines.
pub fn short_txid(txid: &str) -> &str {
    match txid.char_indices().nth(8) {
        Some((idx, _)) => &txid[..idx],
        None => txid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_txid_truncates() {
        assert_eq!("12345678", short_txid("1234567890abcdef"));
        assert_eq!("abc", short_txid("abc"));
        assert_eq!("", short_txid(""));
    }

    #[test]
    fn error_reply_keeps_transaction_scope() {
        let msg = ChaincodeMessage::new(ChaincodeMessageType::GetState, "tx1", "ch1", vec![]);
        let reply = ChaincodeMessage::error_reply(&msg, "No ledger context");

        assert_eq!(ChaincodeMessageType::Error, reply.message_type());
        assert_eq!("tx1", reply.txid());
        assert_eq!("ch1", reply.channel_id());
        assert_eq!(b"No ledger context", reply.payload());
    }
}
