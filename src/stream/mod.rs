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

//! The bidirectional message stream between the peer and one chaincode.

use std::error::Error;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::protocol::message::ChaincodeMessage;

#[derive(Debug)]
pub enum StreamError {
    /// The other side of the stream has gone away.
    Closed,
    GeneralError(Box<dyn Error + Send>),
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            StreamError::GeneralError(ref err) => Some(&**err),
            StreamError::Closed => None,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StreamError::Closed => f.write_str("stream closed"),
            StreamError::GeneralError(err) => write!(f, "General Stream Error: {}", err),
        }
    }
}

/// One end of a chaincode message stream.
///
/// `send` may be called from several threads; `recv` is called by a single reader.
pub trait ChaincodeStream: Send + Sync {
    fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError>;

    /// Blocks until the next message arrives. Returns `StreamError::Closed` once the other
    /// side is gone.
    fn recv(&self) -> Result<ChaincodeMessage, StreamError>;
}

/// An in-process stream built from a pair of `mpsc` channels.
pub struct ChannelStream {
    sender: Mutex<Sender<ChaincodeMessage>>,
    receiver: Mutex<Receiver<ChaincodeMessage>>,
}

impl ChannelStream {
    /// Creates two connected ends; what one sends the other receives.
    pub fn pair() -> (ChannelStream, ChannelStream) {
        let (left_sender, right_receiver) = channel();
        let (right_sender, left_receiver) = channel();

        (
            ChannelStream {
                sender: Mutex::new(left_sender),
                receiver: Mutex::new(left_receiver),
            },
            ChannelStream {
                sender: Mutex::new(right_sender),
                receiver: Mutex::new(right_receiver),
            },
        )
    }
}

impl ChaincodeStream for ChannelStream {
    fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError> {
        self.sender
            .lock()
            .expect("Stream sender lock was poisoned")
            .send(msg)
            .map_err(|_| StreamError::Closed)
    }

    fn recv(&self) -> Result<ChaincodeMessage, StreamError> {
        self.receiver
            .lock()
            .expect("Stream receiver lock was poisoned")
            .recv()
            .map_err(|_| StreamError::Closed)
    }
}
