// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Greeter wire protocol.
//!
//! Every message is `id:u32, length:u32, payload[length]`, all integers
//! big-endian. Strings are a `u32` length followed by that many bytes of
//! UTF-8, no terminator and no alignment. The payload of a single message is
//! capped at [`MAX_MESSAGE_LENGTH`] octets; a frame announcing more than that
//! is a protocol violation and the channel is abandoned.
//!
//! Both directions are implemented here: the daemon decodes
//! [`GreeterRequest`] and encodes [`ServerMessage`]; the inverse pair exists
//! for greeter-side consumers and the protocol test harness.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DaemonError, Result};

/// Maximum payload length of a single message, in octets.
pub const MAX_MESSAGE_LENGTH: usize = 1024;

/// Frame header: message id plus payload length.
pub const HEADER_SIZE: usize = 8;

/// Environment variable naming the fd the greeter reads server messages from.
pub const FROM_SERVER_FD_ENV: &str = "LIGHTDM_FROM_SERVER_FD";

/// Environment variable naming the fd the greeter writes requests to.
pub const TO_SERVER_FD_ENV: &str = "LIGHTDM_TO_SERVER_FD";

// Greeter → server message ids.
const GREETER_CONNECT: u32 = 0;
const GREETER_AUTHENTICATE: u32 = 1;
const GREETER_AUTHENTICATE_AS_GUEST: u32 = 2;
const GREETER_CONTINUE_AUTHENTICATION: u32 = 3;
const GREETER_START_SESSION: u32 = 4;
const GREETER_CANCEL_AUTHENTICATION: u32 = 5;
const GREETER_SET_LANGUAGE: u32 = 6;

// Server → greeter message ids.
const SERVER_CONNECTED: u32 = 0;
const SERVER_PROMPT: u32 = 1;
const SERVER_END_AUTHENTICATION: u32 = 2;
const SERVER_SESSION_RESULT: u32 = 3;

/// A request read from the greeter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreeterRequest {
    Connect { version: String },
    Authenticate { sequence: u32, username: String },
    AuthenticateAsGuest { sequence: u32 },
    ContinueAuthentication { secrets: Vec<String> },
    StartSession { session: String },
    CancelAuthentication,
    SetLanguage { language: String },
}

/// A message written to the greeter.
///
/// Prompt messages carry `(style, text)` pairs with the host library's raw
/// style values on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Connected { version: String, hints: Vec<(String, String)> },
    Prompt { sequence: u32, username: String, messages: Vec<(u32, String)> },
    EndAuthentication { sequence: u32, username: String, result: u32 },
    SessionResult { result: u32 },
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn frame(id: u32, payload: BytesMut) -> Result<Bytes> {
    if payload.len() > MAX_MESSAGE_LENGTH {
        return Err(DaemonError::protocol(format!(
            "message {id} payload is {} octets, maximum is {MAX_MESSAGE_LENGTH}",
            payload.len()
        )));
    }
    let mut out = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    out.put_u32(id);
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(&payload);
    Ok(out.freeze())
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        let id = match self {
            Self::Connected { version, hints } => {
                put_string(&mut payload, version);
                for (key, value) in hints {
                    put_string(&mut payload, key);
                    put_string(&mut payload, value);
                }
                SERVER_CONNECTED
            }
            Self::Prompt { sequence, username, messages } => {
                payload.put_u32(*sequence);
                put_string(&mut payload, username);
                payload.put_u32(messages.len() as u32);
                for (style, text) in messages {
                    payload.put_u32(*style);
                    put_string(&mut payload, text);
                }
                SERVER_PROMPT
            }
            Self::EndAuthentication { sequence, username, result } => {
                payload.put_u32(*sequence);
                put_string(&mut payload, username);
                payload.put_u32(*result);
                SERVER_END_AUTHENTICATION
            }
            Self::SessionResult { result } => {
                payload.put_u32(*result);
                SERVER_SESSION_RESULT
            }
        };
        frame(id, payload)
    }

    /// Decode a server message from a frame, for greeter-side consumers.
    pub fn decode(id: u32, payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        match id {
            SERVER_CONNECTED => {
                let version = reader.string()?;
                let mut hints = Vec::new();
                while reader.remaining() > 0 {
                    let key = reader.string()?;
                    let value = reader.string()?;
                    hints.push((key, value));
                }
                Ok(Self::Connected { version, hints })
            }
            SERVER_PROMPT => {
                let sequence = reader.u32()?;
                let username = reader.string()?;
                let count = reader.u32()?;
                let mut messages = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let style = reader.u32()?;
                    let text = reader.string()?;
                    messages.push((style, text));
                }
                Ok(Self::Prompt { sequence, username, messages })
            }
            SERVER_END_AUTHENTICATION => Ok(Self::EndAuthentication {
                sequence: reader.u32()?,
                username: reader.string()?,
                result: reader.u32()?,
            }),
            SERVER_SESSION_RESULT => Ok(Self::SessionResult { result: reader.u32()? }),
            other => Err(DaemonError::protocol(format!("unknown server message id {other}"))),
        }
    }
}

impl GreeterRequest {
    /// Encode a request into a frame, for greeter-side consumers.
    pub fn encode(&self) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        let id = match self {
            Self::Connect { version } => {
                put_string(&mut payload, version);
                GREETER_CONNECT
            }
            Self::Authenticate { sequence, username } => {
                payload.put_u32(*sequence);
                put_string(&mut payload, username);
                GREETER_AUTHENTICATE
            }
            Self::AuthenticateAsGuest { sequence } => {
                payload.put_u32(*sequence);
                GREETER_AUTHENTICATE_AS_GUEST
            }
            Self::ContinueAuthentication { secrets } => {
                payload.put_u32(secrets.len() as u32);
                for secret in secrets {
                    put_string(&mut payload, secret);
                }
                GREETER_CONTINUE_AUTHENTICATION
            }
            Self::StartSession { session } => {
                put_string(&mut payload, session);
                GREETER_START_SESSION
            }
            Self::CancelAuthentication => GREETER_CANCEL_AUTHENTICATION,
            Self::SetLanguage { language } => {
                put_string(&mut payload, language);
                GREETER_SET_LANGUAGE
            }
        };
        frame(id, payload)
    }

    pub fn decode(id: u32, payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        match id {
            GREETER_CONNECT => Ok(Self::Connect { version: reader.string()? }),
            GREETER_AUTHENTICATE => Ok(Self::Authenticate {
                sequence: reader.u32()?,
                username: reader.string()?,
            }),
            GREETER_AUTHENTICATE_AS_GUEST => {
                Ok(Self::AuthenticateAsGuest { sequence: reader.u32()? })
            }
            GREETER_CONTINUE_AUTHENTICATION => {
                let count = reader.u32()?;
                let mut secrets = Vec::with_capacity(count.min(64) as usize);
                for _ in 0..count {
                    secrets.push(reader.string()?);
                }
                Ok(Self::ContinueAuthentication { secrets })
            }
            GREETER_START_SESSION => Ok(Self::StartSession { session: reader.string()? }),
            GREETER_CANCEL_AUTHENTICATION => Ok(Self::CancelAuthentication),
            GREETER_SET_LANGUAGE => Ok(Self::SetLanguage { language: reader.string()? }),
            other => Err(DaemonError::protocol(format!("unknown greeter message id {other}"))),
        }
    }
}

/// Incremental frame splitter over a byte stream.
///
/// Feed raw reads with [`push`](Self::push), pull complete `(id, payload)`
/// frames with [`next_frame`](Self::next_frame). An announced payload length
/// beyond the cap is unrecoverable: the error must abandon the channel.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn next_frame(&mut self) -> Result<Option<(u32, Bytes)>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let id = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let length =
            u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if length > MAX_MESSAGE_LENGTH {
            return Err(DaemonError::protocol(format!(
                "frame announces {length} octet payload, maximum is {MAX_MESSAGE_LENGTH}"
            )));
        }
        if self.buf.len() < HEADER_SIZE + length {
            return Ok(None);
        }
        self.buf.advance(HEADER_SIZE);
        let payload = self.buf.split_to(length).freeze();
        Ok(Some((id, payload)))
    }
}

/// Cursor over a frame payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(DaemonError::protocol("truncated integer".to_owned()));
        }
        let value = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    fn string(&mut self) -> Result<String> {
        let length = self.u32()? as usize;
        if self.remaining() < length {
            return Err(DaemonError::protocol(format!(
                "truncated string: need {length} octets, have {}",
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + length];
        self.pos += length;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DaemonError::protocol("string is not valid UTF-8".to_owned()))
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
