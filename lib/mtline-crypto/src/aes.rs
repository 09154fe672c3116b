// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

const BLOCK: usize = 16;

fn xor_assign(dst: &mut [u8; BLOCK], other: &[u8]) {
    dst.iter_mut().zip(other).for_each(|(d, o)| *d ^= o);
}

/// Encrypt the input plaintext in-place using the AES-IGE mode.
///
/// The buffer length must be a multiple of the block size; the caller is
/// responsible for padding beforehand.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert!(buffer.len() % BLOCK == 0);

    let cipher = Aes256::new(GenericArray::from_slice(key));

    // In IGE, each block is chained with both the previous ciphertext
    // block and the previous plaintext block; the IV provides the first
    // pair.
    let mut prev_cipher: [u8; BLOCK] = iv[..BLOCK].try_into().unwrap();
    let mut prev_plain: [u8; BLOCK] = iv[BLOCK..].try_into().unwrap();

    for block in buffer.chunks_exact_mut(BLOCK) {
        let plain: [u8; BLOCK] = (&*block).try_into().unwrap();

        let mut mixed = plain;
        xor_assign(&mut mixed, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut mixed));
        xor_assign(&mut mixed, &prev_plain);

        block.copy_from_slice(&mixed);
        prev_cipher = mixed;
        prev_plain = plain;
    }
}

/// Decrypt the input ciphertext using the AES-IGE mode.
///
/// Panics if the ciphertext is not padded to the block size.
pub fn ige_decrypt(ciphertext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Vec<u8> {
    assert!(ciphertext.len() % BLOCK == 0);

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut plaintext = vec![0; ciphertext.len()];

    let mut prev_cipher: [u8; BLOCK] = iv[..BLOCK].try_into().unwrap();
    let mut prev_plain: [u8; BLOCK] = iv[BLOCK..].try_into().unwrap();

    for (cipher_block, plain_block) in ciphertext
        .chunks_exact(BLOCK)
        .zip(plaintext.chunks_exact_mut(BLOCK))
    {
        let mut mixed: [u8; BLOCK] = cipher_block.try_into().unwrap();
        xor_assign(&mut mixed, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(&mut mixed));
        xor_assign(&mut mixed, &prev_cipher);

        plain_block.copy_from_slice(&mixed);
        prev_cipher = cipher_block.try_into().unwrap();
        prev_plain = mixed;
    }

    plaintext
}
