// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors that can occur while unwrapping server data.
use mtline_crypto as crypto;
use mtline_tl as tl;
use std::error::Error;
use std::fmt;

/// The error type for the deserialization of server messages.
#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
    /// Attempting to decrypt the frame failed in some way.
    Decryption(crypto::Error),

    /// The received buffer is too small to contain a valid response
    /// message, or the response seemed valid at first but trying to
    /// deserialize it proved the buffer to be too small.
    MessageBufferTooSmall,

    /// The server responded with compressed data which we failed to
    /// decompress.
    DecompressionFailed,

    /// While deserializing the response types one of them had a
    /// constructor that did not match our expectations.
    UnexpectedConstructor {
        /// The unexpected constructor identifier.
        id: u32,
    },
}

impl Error for DeserializeError {}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Decryption(ref error) => write!(f, "failed to decrypt message: {}", error),
            Self::MessageBufferTooSmall => write!(
                f,
                "server responded with a payload that's too small to fit a valid message"
            ),
            Self::DecompressionFailed => write!(f, "failed to decompress server's data"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor: {:08x}", id),
        }
    }
}

impl From<crypto::Error> for DeserializeError {
    fn from(error: crypto::Error) -> Self {
        Self::Decryption(error)
    }
}

impl From<tl::deserialize::Error> for DeserializeError {
    fn from(error: tl::deserialize::Error) -> Self {
        use tl::deserialize::Error::*;

        match error {
            UnexpectedEof => Self::MessageBufferTooSmall,
            UnexpectedConstructor { id } => Self::UnexpectedConstructor { id },
        }
    }
}
