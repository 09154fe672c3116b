// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wrapping of message bodies into the encrypted wire envelope and back.
use crate::errors::DeserializeError;
use mtline_crypto::{decrypt_data_v1, encrypt_data_v1, AuthKey};
use mtline_tl::{Cursor, Deserializable, Serializable};

/// Build the plaintext for a single message and encrypt it into the wire
/// envelope `auth_key_id || msg_key || ciphertext`.
///
/// The plaintext is laid out as
/// `salt || session_id || msg_id || seq_no || len || body`, with `len`
/// being the body length before the random padding applied underneath.
pub fn encrypt_message(
    auth_key: &AuthKey,
    salt: i64,
    session_id: i64,
    msg_id: i64,
    seq_no: i32,
    body: &[u8],
) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(8 + 8 + 8 + 4 + 4 + body.len());
    salt.serialize(&mut plaintext);
    session_id.serialize(&mut plaintext);
    msg_id.serialize(&mut plaintext);
    seq_no.serialize(&mut plaintext);
    (body.len() as i32).serialize(&mut plaintext);
    plaintext.extend(body);

    encrypt_data_v1(&plaintext, auth_key)
}

/// Decrypt a wire frame back into `(payload, msg_id, seq_no)`.
///
/// The remote salt and session identifier are read and discarded; the
/// identifier of the authorization key and the message key are verified
/// during decryption.
pub fn decrypt_message(
    auth_key: &AuthKey,
    ciphertext: &[u8],
) -> Result<(Vec<u8>, i64, i32), DeserializeError> {
    let plaintext = decrypt_data_v1(ciphertext, auth_key)?;

    let mut reader = Cursor::from_slice(&plaintext);
    let _remote_salt = i64::deserialize(&mut reader)?;
    let _remote_session_id = i64::deserialize(&mut reader)?;
    let remote_msg_id = i64::deserialize(&mut reader)?;
    let remote_seq = i32::deserialize(&mut reader)?;
    let len = i32::deserialize(&mut reader)?;

    let mut payload = vec![0; len as usize];
    reader.read_exact(&mut payload)?;

    Ok((payload, remote_msg_id, remote_seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtline_crypto::{self as crypto, calc_key, calc_msg_key, Side};

    fn get_test_auth_key() -> AuthKey {
        let mut buffer = [0u8; 256];
        buffer
            .iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = i as u8);

        AuthKey::from_bytes(buffer)
    }

    // Encrypt a message the way the server would, so `decrypt_message`
    // can undo it.
    fn encrypt_from_server(
        auth_key: &AuthKey,
        salt: i64,
        session_id: i64,
        msg_id: i64,
        seq_no: i32,
        body: &[u8],
    ) -> Vec<u8> {
        let mut plaintext = Vec::new();
        salt.serialize(&mut plaintext);
        session_id.serialize(&mut plaintext);
        msg_id.serialize(&mut plaintext);
        seq_no.serialize(&mut plaintext);
        (body.len() as i32).serialize(&mut plaintext);
        plaintext.extend(body);

        let msg_key = calc_msg_key(&plaintext);
        let (key, iv) = calc_key(auth_key, &msg_key, Side::Server);
        let padding = (16 - plaintext.len() % 16) % 16;
        plaintext.extend(std::iter::repeat(0x55).take(padding));
        crypto::aes::ige_encrypt(&mut plaintext, &key, &iv);

        let mut frame = Vec::new();
        frame.extend(auth_key.key_id());
        frame.extend(msg_key);
        frame.extend(plaintext);
        frame
    }

    #[test]
    fn envelope_layout() {
        let auth_key = get_test_auth_key();
        let frame = encrypt_message(&auth_key, 1, 2, 3, 4, b"Hey!");

        assert_eq!(&frame[..8], &auth_key.key_id());
        // Everything after the message key is block-aligned ciphertext.
        assert_eq!((frame.len() - 24) % 16, 0);
        // 32 bytes of header plus 4 of body round up to 48.
        assert_eq!(frame.len(), 24 + 48);
    }

    #[test]
    fn server_frames_round_trip() {
        let auth_key = get_test_auth_key();

        for body_len in [1usize, 4, 16, 255, 1024, 4096] {
            let body: Vec<u8> = (0..body_len).map(|i| (i * 11) as u8).collect();
            let frame = encrypt_from_server(&auth_key, -42, 777, 0x5060708090a0b0c, 3, &body);

            let (payload, msg_id, seq_no) = decrypt_message(&auth_key, &frame).unwrap();
            assert_eq!(payload, body);
            assert_eq!(msg_id, 0x5060708090a0b0c);
            assert_eq!(seq_no, 3);
        }
    }

    #[test]
    fn truncated_frame_fails() {
        let auth_key = get_test_auth_key();
        assert_eq!(
            decrypt_message(&auth_key, &[0; 16]),
            Err(DeserializeError::Decryption(
                crypto::Error::InvalidBuffer
            ))
        );
    }
}
