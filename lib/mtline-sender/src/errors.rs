// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::net;
use mtline_mtproto::{service, DeserializeError};
use mtline_tl as tl;
use std::fmt;

/// This error occurs when reading a message from the server fails.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadError {
    /// Error propagated from the underlying transport.
    Transport(net::Error),

    /// Error propagated from attempting to decrypt or deserialize an
    /// invalid frame.
    Deserialize(DeserializeError),

    /// The server notified us that one of our messages was ignored with
    /// an error code the sender cannot recover from on its own.
    BadMessage {
        /// The code of the bad message error.
        code: i32,
    },
}

impl ReadError {
    /// A short human-readable description of a bad message code.
    pub fn bad_message_description(code: i32) -> &'static str {
        match code {
            16 => "msg_id too low",
            17 => "msg_id too high",
            18 => "incorrect two lower order msg_id bits",
            19 => "container msg_id is the same as msg_id of a previously received message",
            20 => "message too old",
            32 => "msg_seqno too low",
            33 => "msg_seqno too high",
            34 => "an even msg_seqno expected, but odd received",
            35 => "odd msg_seqno expected, but even received",
            48 => "incorrect server salt",
            64 => "invalid container",
            _ => "unknown error code",
        }
    }
}

impl std::error::Error for ReadError {}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "read error, transport-level: {}", err),
            Self::Deserialize(err) => write!(f, "read error, bad response: {}", err),
            Self::BadMessage { code } => write!(
                f,
                "read error, bad message {}: {}",
                code,
                Self::bad_message_description(*code)
            ),
        }
    }
}

impl From<net::Error> for ReadError {
    fn from(error: net::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<DeserializeError> for ReadError {
    fn from(error: DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<tl::deserialize::Error> for ReadError {
    fn from(error: tl::deserialize::Error) -> Self {
        Self::Deserialize(error.into())
    }
}

/// The error type reported by the server when a request is misused.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// A numerical value similar to HTTP status codes.
    pub code: i32,

    /// The ASCII error name, normally in screaming snake case.
    ///
    /// Digit words are removed from the name and put in
    /// [`RpcError::value`] instead, so `FLOOD_WAIT_3` becomes
    /// `FLOOD_WAIT` with a value of 3.
    pub name: String,

    /// If the error contained an additional integer value, it will be
    /// present here and removed from the [`RpcError::name`].
    pub value: Option<u32>,

    /// The constructor identifier of the request that triggered this
    /// error. Won't be present if the error was artificially constructed.
    pub caused_by: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(caused_by) = self.caused_by {
            write!(f, " caused by request {:08x}", caused_by)?;
        }
        if let Some(value) = self.value {
            write!(f, " (value: {})", value)?;
        }
        Ok(())
    }
}

impl From<service::RpcError> for RpcError {
    fn from(error: service::RpcError) -> Self {
        // Extract the numeric value in the error, if any
        if let Some((value, parsed_value)) = error
            .error_message
            .split(|c: char| !c.is_ascii_digit())
            .flat_map(|value| {
                value
                    .parse::<u32>()
                    .map(|parsed_value| (value, parsed_value))
            })
            .next()
        {
            let mut to_remove = String::with_capacity(1 + value.len());
            to_remove.push('_');
            to_remove.push_str(value);
            Self {
                code: error.error_code,
                name: error.error_message.replace(&to_remove, ""),
                value: Some(parsed_value),
                caused_by: None,
            }
        } else {
            Self {
                code: error.error_code,
                name: error.error_message.clone(),
                value: None,
                caused_by: None,
            }
        }
    }
}

impl RpcError {
    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// A single trailing or leading asterisk (`'*'`) is allowed, and
    /// will instead check if the error name starts (or ends with) the
    /// input parameter.
    pub fn is(&self, rpc_error: &str) -> bool {
        if let Some(rpc_error) = rpc_error.strip_suffix('*') {
            self.name.starts_with(rpc_error)
        } else if let Some(rpc_error) = rpc_error.strip_prefix('*') {
            self.name.ends_with(rpc_error)
        } else {
            self.name == rpc_error
        }
    }

    /// Whether this error tells the client to talk to a different
    /// datacenter (its number lives in [`RpcError::value`]).
    pub fn is_dc_migration(&self) -> bool {
        self.is("*_MIGRATE")
    }

    /// Attaches the constructor identifier of the request that caused
    /// this error to the error information.
    pub fn with_caused_by(mut self, constructor_id: u32) -> Self {
        self.caused_by = Some(constructor_id);
        self
    }
}

/// This error occurs when a Remote Procedure Call was unsuccessful.
#[derive(Clone, Debug, PartialEq)]
pub enum InvocationError {
    /// The request invocation failed because it was invalid or the
    /// server could not process it successfully.
    Rpc(RpcError),

    /// The request was performed against a datacenter that cannot serve
    /// it. The outer client uses this to trigger migration.
    InvalidDc(RpcError),

    /// The request was dropped before a response arrived, either because
    /// the connection was closed or the sender was shut down.
    Dropped,

    /// Error propagated from the underlying transport.
    Transport(net::Error),

    /// Error propagated from attempting to decrypt or deserialize an
    /// invalid frame.
    Deserialize(DeserializeError),
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "request error: {}", err),
            Self::InvalidDc(err) => write!(f, "request error: invalid dc: {}", err),
            Self::Dropped => write!(f, "request error: dropped (cancelled)"),
            Self::Transport(err) => write!(f, "request error: {}", err),
            Self::Deserialize(err) => write!(f, "request error: {}", err),
        }
    }
}

impl From<net::Error> for InvocationError {
    fn from(error: net::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<DeserializeError> for InvocationError {
    fn from(error: DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<ReadError> for InvocationError {
    fn from(error: ReadError) -> Self {
        match error {
            ReadError::Transport(error) => Self::Transport(error),
            ReadError::Deserialize(error) => Self::Deserialize(error),
            ReadError::BadMessage { .. } => Self::Dropped,
        }
    }
}

impl InvocationError {
    /// Matches on the name of the RPC error (case-sensitive); see
    /// [`RpcError::is`]. Returns `false` for any other error kind.
    #[inline]
    pub fn is(&self, rpc_error: &str) -> bool {
        match self {
            Self::Rpc(rpc) | Self::InvalidDc(rpc) => rpc.is(rpc_error),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rpc_error_parsing() {
        assert_eq!(
            RpcError::from(service::RpcError {
                error_code: 400,
                error_message: "CHAT_INVALID".into(),
            }),
            RpcError {
                code: 400,
                name: "CHAT_INVALID".into(),
                value: None,
                caused_by: None,
            }
        );

        assert_eq!(
            RpcError::from(service::RpcError {
                error_code: 420,
                error_message: "FLOOD_WAIT_31".into(),
            }),
            RpcError {
                code: 420,
                name: "FLOOD_WAIT".into(),
                value: Some(31),
                caused_by: None,
            }
        );

        assert_eq!(
            RpcError::from(service::RpcError {
                error_code: 500,
                error_message: "INTERDC_2_CALL_ERROR".into(),
            }),
            RpcError {
                code: 500,
                name: "INTERDC_CALL_ERROR".into(),
                value: Some(2),
                caused_by: None,
            }
        );
    }

    #[test]
    fn check_migration_detection() {
        let error = RpcError::from(service::RpcError {
            error_code: 303,
            error_message: "PHONE_MIGRATE_2".into(),
        });
        assert!(error.is_dc_migration());
        assert_eq!(error.value, Some(2));

        let error = RpcError::from(service::RpcError {
            error_code: 420,
            error_message: "FLOOD_WAIT_31".into(),
        });
        assert!(!error.is_dc_migration());
    }

    #[test]
    fn check_error_name_matching() {
        let error = RpcError {
            code: 400,
            name: "PHONE_CODE_INVALID".to_string(),
            value: None,
            caused_by: None,
        };
        assert!(error.is("PHONE_CODE_INVALID"));
        assert!(error.is("PHONE_CODE_*"));
        assert!(error.is("*_INVALID"));
        assert!(!error.is("SESSION_PASSWORD_NEEDED"));
    }
}
