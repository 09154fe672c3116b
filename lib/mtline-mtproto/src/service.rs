// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-written structures for the service messages of the protocol.
//!
//! These are the messages the dispatcher parses itself. Everything else
//! belongs to the application schema and is resolved through the type
//! registry instead.
use crate::errors::DeserializeError;
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use mtline_tl::deserialize::{Error as TlError, Result as TlResult};
use mtline_tl::{Cursor, Deserializable, Identifiable, Serializable};
use std::io::Write;

fn expect_constructor<T: Identifiable>(buf: &mut Cursor) -> TlResult<()> {
    let id = u32::deserialize(buf)?;
    if id != T::CONSTRUCTOR_ID {
        Err(TlError::UnexpectedConstructor { id })
    } else {
        Ok(())
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// message msg_id:long seqno:int bytes:int body:Object = Message;
/// ```
///
/// The inner unit of a container: a message body along with the
/// identifier and sequence number the server gave it.
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    /// Peek the constructor ID from the body.
    pub fn constructor_id(&self) -> TlResult<u32> {
        u32::from_bytes(&self.body)
    }
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for Message {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;

        let len = i32::deserialize(buf)?;
        if len < 0 || len as usize > buf.remaining() {
            return Err(TlError::UnexpectedEof);
        }
        let mut body = vec![0; len as usize];
        buf.read_exact(&mut body)?;

        Ok(Message {
            msg_id,
            seq_no,
            body,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// msg_container#73f1f8dc messages:vector<message> = MessageContainer;
/// ```
pub struct MsgContainer {
    pub messages: Vec<Message>,
}

impl Identifiable for MsgContainer {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MsgContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        for message in &self.messages {
            message.serialize(buf);
        }
    }
}

impl Deserializable for MsgContainer {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        let len = i32::deserialize(buf)?;
        if len < 0 {
            return Err(TlError::UnexpectedEof);
        }
        let mut messages = Vec::with_capacity((len as usize).min(100));
        for _ in 0..len {
            messages.push(Message::deserialize(buf)?);
        }

        Ok(Self { messages })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult;
/// ```
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl RpcResult {
    /// Peek the constructor ID from the result.
    pub fn inner_constructor(&self) -> TlResult<u32> {
        u32::from_bytes(&self.result)
    }
}

impl Identifiable for RpcResult {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        buf.extend(self.result.iter().copied());
    }
}

impl Deserializable for RpcResult {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        let req_msg_id = i64::deserialize(buf)?;
        let mut result = Vec::new();
        buf.read_to_end(&mut result);

        Ok(Self { req_msg_id, result })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// rpc_error#2144ca19 error_code:int error_message:string = RpcError;
/// ```
pub struct RpcError {
    pub error_code: i32,
    pub error_message: String,
}

impl Identifiable for RpcError {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x2144ca19;
}

impl Serializable for RpcError {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.error_code.serialize(buf);
        self.error_message.serialize(buf);
    }
}

impl Deserializable for RpcError {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        Ok(Self {
            error_code: i32::deserialize(buf)?,
            error_message: String::deserialize(buf)?,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// msgs_ack#62d6b459 msg_ids:Vector long = MsgsAck;
/// ```
///
/// An acknowledgment does not require one itself, and is the only
/// service message the client synthesizes on its own.
pub struct MsgsAck {
    pub msg_ids: Vec<i64>,
}

impl Identifiable for MsgsAck {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x62d6b459;
}

impl Serializable for MsgsAck {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_ids.serialize(buf);
    }
}

impl Deserializable for MsgsAck {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        Ok(Self {
            msg_ids: Vec::<i64>::deserialize(buf)?,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// ping#7abe77ec ping_id:long = Pong;
/// ```
pub struct Ping {
    pub ping_id: i64,
}

impl Identifiable for Ping {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x7abe77ec;
}

impl Serializable for Ping {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

impl Deserializable for Ping {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        Ok(Self {
            ping_id: i64::deserialize(buf)?,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// pong#347773c5 msg_id:long ping_id:long = Pong;
/// ```
///
/// `msg_id` echoes the identifier of the `ping` that caused it, which is
/// how the two are correlated.
pub struct Pong {
    pub msg_id: i64,
    pub ping_id: i64,
}

impl Identifiable for Pong {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x347773c5;
}

impl Serializable for Pong {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

impl Deserializable for Pong {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        Ok(Self {
            msg_id: i64::deserialize(buf)?,
            ping_id: i64::deserialize(buf)?,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int
///     error_code:int new_server_salt:long = BadMsgNotification;
/// ```
pub struct BadServerSalt {
    pub bad_msg_id: i64,
    pub bad_msg_seq_no: i32,
    pub error_code: i32,
    pub new_server_salt: i64,
}

impl Identifiable for BadServerSalt {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0xedab447b;
}

impl Serializable for BadServerSalt {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.bad_msg_id.serialize(buf);
        self.bad_msg_seq_no.serialize(buf);
        self.error_code.serialize(buf);
        self.new_server_salt.serialize(buf);
    }
}

impl Deserializable for BadServerSalt {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seq_no: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
            new_server_salt: i64::deserialize(buf)?,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int
///     error_code:int = BadMsgNotification;
/// ```
///
/// Codes 16 and 17 mean the client clock is off (msg_id too low or too
/// high respectively) and are recoverable by correcting the time offset.
pub struct BadMsgNotification {
    pub bad_msg_id: i64,
    pub bad_msg_seq_no: i32,
    pub error_code: i32,
}

impl Identifiable for BadMsgNotification {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0xa7eff811;
}

impl Serializable for BadMsgNotification {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.bad_msg_id.serialize(buf);
        self.bad_msg_seq_no.serialize(buf);
        self.error_code.serialize(buf);
    }
}

impl Deserializable for BadMsgNotification {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seq_no: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// new_session_created#9ec20908 first_msg_id:long unique_id:long
///     server_salt:long = NewSession;
/// ```
pub struct NewSessionCreated {
    pub first_msg_id: i64,
    pub unique_id: i64,
    pub server_salt: i64,
}

impl Identifiable for NewSessionCreated {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x9ec20908;
}

impl Serializable for NewSessionCreated {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.first_msg_id.serialize(buf);
        self.unique_id.serialize(buf);
        self.server_salt.serialize(buf);
    }
}

impl Deserializable for NewSessionCreated {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        Ok(Self {
            first_msg_id: i64::deserialize(buf)?,
            unique_id: i64::deserialize(buf)?,
            server_salt: i64::deserialize(buf)?,
        })
    }
}

/// This struct represents the following TL definition:
///
/// ```tl
/// gzip_packed#3072cfa1 packed_data:string = Object;
/// ```
///
/// Replaces any other object with its gzipped serialization; the server
/// uses it for large responses and update batches.
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl GzipPacked {
    pub fn new(unpacked_data: &[u8]) -> Self {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        // Safe to unwrap, in-memory data should not fail
        encoder.write_all(unpacked_data).unwrap();
        let packed_data = encoder.finish().unwrap();
        Self { packed_data }
    }

    pub fn decompress(&self) -> Result<Vec<u8>, DeserializeError> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder
            .write_all(&self.packed_data[..])
            .map_err(|_| DeserializeError::DecompressionFailed)?;
        decoder
            .finish()
            .map_err(|_| DeserializeError::DecompressionFailed)
    }
}

impl Identifiable for GzipPacked {
    #[allow(clippy::unreadable_literal)]
    const CONSTRUCTOR_ID: u32 = 0x3072cfa1;
}

impl Serializable for GzipPacked {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.packed_data.serialize(buf);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(buf: &mut Cursor) -> TlResult<Self> {
        expect_constructor::<Self>(buf)?;

        let packed_data = Vec::<u8>::deserialize(buf)?;
        Ok(Self { packed_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msgs_ack_layout() {
        let ack = MsgsAck {
            msg_ids: vec![0x0403020100000000],
        };
        assert_eq!(
            ack.to_bytes(),
            [
                0x59, 0xb4, 0xd6, 0x62, // msgs_ack
                0x15, 0xc4, 0xb5, 0x1c, // vector
                0x01, 0x00, 0x00, 0x00, // length
                0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, // msg_id
            ]
        );
    }

    #[test]
    fn pong_round_trips() {
        let pong = Pong {
            msg_id: 0x0102030405060708,
            ping_id: -1,
        };
        let parsed = Pong::from_bytes(&pong.to_bytes()).unwrap();
        assert_eq!(parsed.msg_id, pong.msg_id);
        assert_eq!(parsed.ping_id, pong.ping_id);
    }

    #[test]
    fn wrong_constructor_is_rejected() {
        let ping = Ping { ping_id: 7 }.to_bytes();
        assert!(matches!(
            Pong::from_bytes(&ping),
            Err(TlError::UnexpectedConstructor {
                id: Ping::CONSTRUCTOR_ID
            })
        ));
    }

    #[test]
    fn container_round_trips() {
        let container = MsgContainer {
            messages: vec![
                Message {
                    msg_id: 4,
                    seq_no: 1,
                    body: b"Hey!".to_vec(),
                },
                Message {
                    msg_id: 8,
                    seq_no: 3,
                    body: b"Bye!".to_vec(),
                },
            ],
        };

        let parsed = MsgContainer::from_bytes(&container.to_bytes()).unwrap();
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].msg_id, 4);
        assert_eq!(parsed.messages[0].body, b"Hey!");
        assert_eq!(parsed.messages[1].seq_no, 3);
        assert_eq!(parsed.messages[1].body, b"Bye!");
    }

    #[test]
    fn truncated_container_fails() {
        let container = MsgContainer {
            messages: vec![Message {
                msg_id: 4,
                seq_no: 1,
                body: vec![0x7f; 64],
            }],
        };

        let bytes = container.to_bytes();
        assert!(matches!(
            MsgContainer::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TlError::UnexpectedEof)
        ));
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"some very compressible data, very compressible indeed".repeat(20);
        let packed = GzipPacked::new(&data);
        assert!(packed.packed_data.len() < data.len());

        let parsed = GzipPacked::from_bytes(&packed.to_bytes()).unwrap();
        assert_eq!(parsed.decompress().unwrap(), data);
    }

    #[test]
    fn garbage_gzip_fails() {
        let packed = GzipPacked {
            packed_data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        assert_eq!(
            packed.decompress(),
            Err(DeserializeError::DecompressionFailed)
        );
    }
}
