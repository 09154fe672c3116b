// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Cryptographic utilities for the first revision of the MTProto
//! encrypted envelope: the SHA-1 based key derivation, AES-256 in IGE
//! mode, and the outer `auth_key_id || msg_key || ciphertext` framing.
pub mod aes;
mod auth_key;
pub mod sha;

pub use auth_key::AuthKey;
use getrandom::getrandom;
use std::fmt;

// Plaintexts carry `salt`, `session_id` (8 bytes each), `msg_id`
// (8 bytes), `seq_no` and the body length (4 bytes each) ahead of the
// body itself. Needed here to recover the unpadded length on decryption.
const PLAINTEXT_HEADER_LEN: usize = 8 + 8 + 8 + 4 + 4;

// `auth_key_id` (8 bytes) plus `msg_key` (16 bytes).
const ENVELOPE_HEADER_LEN: usize = 8 + 16;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The ciphertext is either too small or not padded correctly.
    InvalidBuffer,

    /// The server replied with the ID of a different authorization key.
    AuthKeyMismatch,

    /// The key of the message did not match our expectations.
    MessageKeyMismatch,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Error::AuthKeyMismatch => write!(f, "server authkey mismatches with ours"),
            Error::MessageKeyMismatch => write!(f, "server msgkey mismatches with ours"),
        }
    }
}

/// The direction a frame travels in, which selects the offset used when
/// deriving the AES key and initialization vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    // "where x = 0 for messages from client to server and x = 8 for
    // those from server to client."
    fn x(&self) -> usize {
        match *self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// Calculate the 128-bit message key: the middle 16 bytes of the SHA-1
/// over the unpadded plaintext.
pub fn calc_msg_key(plaintext: &[u8]) -> [u8; 16] {
    let mut buffer = [0; 16];
    buffer.copy_from_slice(&sha1!(plaintext)[4..4 + 16]);
    buffer
}

/// Calculate the AES key and initialization vector from the
/// authorization key and message key, following the original
/// [key derivation] of the protocol.
///
/// [key derivation]: https://core.telegram.org/mtproto_v1/description#defining-aes-key-and-initialization-vector
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();

    // sha1_a = SHA1 (msg_key + substr (auth_key, x, 32));
    let sha1_a = sha1!(msg_key, &auth_key.data[x..x + 32]);

    // sha1_b = SHA1 (substr (auth_key, 32+x, 16) + msg_key + substr (auth_key, 48+x, 16));
    let sha1_b = sha1!(
        &auth_key.data[32 + x..32 + x + 16],
        msg_key,
        &auth_key.data[48 + x..48 + x + 16]
    );

    // sha1_c = SHA1 (substr (auth_key, 64+x, 32) + msg_key);
    let sha1_c = sha1!(&auth_key.data[64 + x..64 + x + 32], msg_key);

    // sha1_d = SHA1 (msg_key + substr (auth_key, 96+x, 32));
    let sha1_d = sha1!(msg_key, &auth_key.data[96 + x..96 + x + 32]);

    // aes_key = substr (sha1_a, 0, 8) + substr (sha1_b, 8, 12) + substr (sha1_c, 4, 12);
    let aes_key = {
        let mut buffer = [0; 32];
        buffer[0..8].copy_from_slice(&sha1_a[0..8]);
        buffer[8..8 + 12].copy_from_slice(&sha1_b[8..8 + 12]);
        buffer[20..20 + 12].copy_from_slice(&sha1_c[4..4 + 12]);
        buffer
    };

    // aes_iv = substr (sha1_a, 8, 12) + substr (sha1_b, 0, 8) + substr (sha1_c, 16, 4) + substr (sha1_d, 0, 8);
    let aes_iv = {
        let mut buffer = [0; 32];
        buffer[0..12].copy_from_slice(&sha1_a[8..8 + 12]);
        buffer[12..12 + 8].copy_from_slice(&sha1_b[0..8]);
        buffer[20..20 + 4].copy_from_slice(&sha1_c[16..16 + 4]);
        buffer[24..24 + 8].copy_from_slice(&sha1_d[0..8]);
        buffer
    };

    (aes_key, aes_iv)
}

/// How much random padding a plaintext of a certain length needs so the
/// result is divisible by 16 bytes. The first protocol revision pads
/// with 0 to 15 bytes, never a full extra block.
fn determine_padding_v1_length(len: usize) -> usize {
    (16 - len % 16) % 16
}

// Inner body of `encrypt_data_v1`, separated for testing purposes.
fn do_encrypt_data_v1(plaintext: &[u8], auth_key: &AuthKey, random_padding: &[u8; 16]) -> Vec<u8> {
    // The message key covers the plaintext before padding.
    let msg_key = calc_msg_key(plaintext);
    let (key, iv) = calc_key(auth_key, &msg_key, Side::Client);

    let padding_len = determine_padding_v1_length(plaintext.len());
    let mut padded = Vec::with_capacity(plaintext.len() + padding_len);
    padded.extend(plaintext);
    padded.extend(&random_padding[..padding_len]);

    aes::ige_encrypt(&mut padded, &key, &iv);

    let mut result = Vec::with_capacity(ENVELOPE_HEADER_LEN + padded.len());
    result.extend(auth_key.key_id);
    result.extend(msg_key);
    result.extend(padded);
    result
}

/// Encrypt the given plaintext as a client using the original envelope:
/// `auth_key_id || msg_key || AES-IGE(plaintext + padding)`.
pub fn encrypt_data_v1(plaintext: &[u8], auth_key: &AuthKey) -> Vec<u8> {
    let random_padding = {
        let mut rnd = [0; 16];
        getrandom(&mut rnd).expect("failed to generate a secure padding");
        rnd
    };

    do_encrypt_data_v1(plaintext, auth_key, &random_padding)
}

/// This method is the inverse of `encrypt_data_v1` for data received
/// from the server.
///
/// The plaintext is expected to start with the standard message header,
/// since its embedded length is what allows discarding the padding when
/// re-computing the message key.
pub fn decrypt_data_v1(ciphertext: &[u8], auth_key: &AuthKey) -> Result<Vec<u8>, Error> {
    if ciphertext.len() < ENVELOPE_HEADER_LEN + 16
        || (ciphertext.len() - ENVELOPE_HEADER_LEN) % 16 != 0
    {
        return Err(Error::InvalidBuffer);
    }

    if auth_key.key_id != ciphertext[..8] {
        return Err(Error::AuthKeyMismatch);
    }

    let msg_key = {
        let mut buffer = [0; 16];
        buffer.copy_from_slice(&ciphertext[8..8 + 16]);
        buffer
    };

    let (key, iv) = calc_key(auth_key, &msg_key, Side::Server);
    let plaintext = aes::ige_decrypt(&ciphertext[ENVELOPE_HEADER_LEN..], &key, &iv);
    if plaintext.len() < PLAINTEXT_HEADER_LEN {
        return Err(Error::InvalidBuffer);
    }

    // Recover the unpadded length from the header to check the key.
    let len = i32::from_le_bytes(
        plaintext[PLAINTEXT_HEADER_LEN - 4..PLAINTEXT_HEADER_LEN]
            .try_into()
            .unwrap(),
    );
    if len < 0 || PLAINTEXT_HEADER_LEN + len as usize > plaintext.len() {
        return Err(Error::InvalidBuffer);
    }

    if msg_key != calc_msg_key(&plaintext[..PLAINTEXT_HEADER_LEN + len as usize]) {
        return Err(Error::MessageKeyMismatch);
    }

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_auth_key() -> AuthKey {
        let mut buffer = [0u8; 256];
        buffer
            .iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = i as u8);

        AuthKey::from_bytes(buffer)
    }

    fn get_test_msg_key() -> [u8; 16] {
        let mut buffer = [0u8; 16];
        buffer
            .iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = i as u8);

        buffer
    }

    // A plaintext laid out the way the protocol frames messages:
    // salt, session_id, msg_id, seq_no, length, body.
    fn get_test_plaintext(body: &[u8]) -> Vec<u8> {
        let mut plaintext = Vec::new();
        plaintext.extend(0x11223344aabbccdd_u64.to_le_bytes());
        plaintext.extend(0x778899aabbccddee_u64.to_le_bytes());
        plaintext.extend(0x5e0b800400000000_i64.to_le_bytes());
        plaintext.extend(1i32.to_le_bytes());
        plaintext.extend((body.len() as i32).to_le_bytes());
        plaintext.extend(body);
        plaintext
    }

    #[test]
    fn calc_client_key() {
        let auth_key = get_test_auth_key();
        let msg_key = get_test_msg_key();
        let expected = (
            [
                23, 215, 41, 92, 169, 33, 61, 26, 182, 86, 172, 219, 26, 212, 139, 46, 167, 243,
                168, 247, 9, 80, 152, 213, 80, 139, 144, 11, 189, 95, 204, 252,
            ],
            [
                45, 125, 22, 166, 90, 132, 16, 142, 152, 5, 101, 108, 170, 71, 69, 1, 204, 88, 10,
                162, 237, 195, 58, 191, 208, 191, 173, 120, 84, 100, 209, 198,
            ],
        );
        assert_eq!(calc_key(&auth_key, &msg_key, Side::Client), expected);
    }

    #[test]
    fn calc_server_key() {
        let auth_key = get_test_auth_key();
        let msg_key = get_test_msg_key();
        let expected = (
            [
                187, 23, 176, 126, 185, 17, 16, 100, 112, 152, 176, 105, 189, 26, 155, 111, 229,
                196, 188, 195, 195, 31, 142, 103, 232, 49, 208, 122, 97, 8, 95, 104,
            ],
            [
                81, 151, 252, 30, 37, 180, 31, 227, 111, 24, 181, 163, 168, 178, 179, 108, 178,
                203, 6, 31, 31, 21, 123, 53, 20, 254, 66, 231, 79, 181, 131, 89,
            ],
        );
        assert_eq!(calc_key(&auth_key, &msg_key, Side::Server), expected);
    }

    #[test]
    fn calc_msg_key_vector() {
        assert_eq!(
            calc_msg_key(b"Hello, world! This data should remain secure!"),
            [200, 130, 39, 170, 72, 144, 14, 82, 149, 202, 203, 166, 167, 177, 152, 142]
        );
    }

    #[test]
    fn encrypt_client_data_v1() {
        let plaintext = b"Hello, world! This data should remain secure!";
        let auth_key = get_test_auth_key();
        let random_padding = [0; 16];
        let expected = vec![
            50, 209, 88, 110, 164, 87, 223, 200, 200, 130, 39, 170, 72, 144, 14, 82, 149, 202,
            203, 166, 167, 177, 152, 142, 94, 205, 2, 62, 218, 159, 151, 93, 42, 140, 133, 195,
            37, 141, 127, 222, 221, 235, 127, 237, 97, 83, 16, 66, 108, 78, 65, 76, 40, 0, 172,
            28, 206, 194, 236, 25, 117, 229, 123, 165, 74, 184, 223, 132, 148, 113, 164, 144,
        ];

        assert_eq!(
            do_encrypt_data_v1(plaintext, &auth_key, &random_padding),
            expected
        );
    }

    #[test]
    fn envelope_round_trips() {
        // Encrypting as the server lets `decrypt_data_v1` undo it.
        let auth_key = get_test_auth_key();
        for body_len in [0usize, 1, 15, 16, 17, 255, 4096] {
            let body: Vec<u8> = (0..body_len).map(|i| (i * 7) as u8).collect();
            let plaintext = get_test_plaintext(&body);

            let msg_key = calc_msg_key(&plaintext);
            let (key, iv) = calc_key(&auth_key, &msg_key, Side::Server);
            let padding = determine_padding_v1_length(plaintext.len());
            let mut padded = plaintext.clone();
            padded.extend(std::iter::repeat(0).take(padding));
            aes::ige_encrypt(&mut padded, &key, &iv);

            let mut frame = Vec::new();
            frame.extend(auth_key.key_id);
            frame.extend(msg_key);
            frame.extend(padded);

            let decrypted = decrypt_data_v1(&frame, &auth_key).unwrap();
            assert_eq!(&decrypted[..plaintext.len()], &plaintext[..]);
        }
    }

    #[test]
    fn short_ciphertext_fails() {
        let auth_key = get_test_auth_key();
        assert_eq!(
            decrypt_data_v1(&[0; 23], &auth_key),
            Err(Error::InvalidBuffer)
        );
        assert_eq!(
            decrypt_data_v1(&[0; 30], &auth_key),
            Err(Error::InvalidBuffer)
        );
    }

    #[test]
    fn foreign_auth_key_fails() {
        let auth_key = get_test_auth_key();
        let frame = vec![0xab; 24 + 32];
        assert_eq!(
            decrypt_data_v1(&frame, &auth_key),
            Err(Error::AuthKeyMismatch)
        );
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let auth_key = get_test_auth_key();
        let plaintext = get_test_plaintext(&[0x7f; 32]);

        let msg_key = calc_msg_key(&plaintext);
        let (key, iv) = calc_key(&auth_key, &msg_key, Side::Server);
        let mut padded = plaintext.clone();
        aes::ige_encrypt(&mut padded, &key, &iv);

        let mut frame = Vec::new();
        frame.extend(auth_key.key_id);
        frame.extend(msg_key);
        frame.extend(padded);

        // Flipping a bit past the header blocks corrupts only the body,
        // so the length still parses and the message key check trips.
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert_eq!(
            decrypt_data_v1(&frame, &auth_key),
            Err(Error::MessageKeyMismatch)
        );
    }
}
