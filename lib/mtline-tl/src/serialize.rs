// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Implementations of this trait will serialize their data into a buffer
/// according to the [Binary Data Serialization].
///
/// Serialization happens into in-memory buffers and cannot fail, which is
/// why the destination is simply anything that can extend itself with
/// bytes.
///
/// [Binary Data Serialization]: https://core.telegram.org/mtproto/serialize
pub trait Serializable {
    /// Serializes the body into the given buffer.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    /// Convenience function to serialize the object and return its bytes.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.serialize(&mut buffer);
        buffer
    }
}

/// Serializes the boolean according to the following definitions:
///
/// * `false` is serialized as `boolFalse#bc799737 = Bool;`.
/// * `true` is serialized as `boolTrue#997275b5 = Bool;`.
impl Serializable for bool {
    #[allow(clippy::unreadable_literal)]
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        if *self { 0x997275b5u32 } else { 0xbc799737u32 }.serialize(buf)
    }
}

/// Serializes the 32-bit signed integer: `int ? = Int;`.
impl Serializable for i32 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes the 32-bit unsigned integer: `int ? = Int;`.
impl Serializable for u32 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes the 64-bit signed integer: `long ? = Long;`.
impl Serializable for i64 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes the 64-bit unsigned integer: `long ? = Long;`.
impl Serializable for u64 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes the 128-bit integer: `int128 4*[ int ] = Int128;`.
impl Serializable for [u8; 16] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied())
    }
}

/// Serializes the 256-bit integer: `int256 8*[ int ] = Int256;`.
impl Serializable for [u8; 32] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied())
    }
}

/// Serializes the 64-bit floating point: `double ? = Double;`.
impl Serializable for f64 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

/// Serializes a vector of serializable items according to the following
/// definition:
///
/// * `vector#1cb5c415 {t:Type} # [ t ] = Vector t;`.
impl<T: Serializable> Serializable for Vec<T> {
    #[allow(clippy::unreadable_literal)]
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        0x1cb5c415u32.serialize(buf);
        (self.len() as i32).serialize(buf);
        for x in self {
            x.serialize(buf);
        }
    }
}

/// Serializes a UTF-8 string: `string ? = String;`.
impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf)
    }
}

/// Serializes a vector of bytes as a byte-string: `string ? = String;`.
impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (&self[..]).serialize(buf)
    }
}

/// Serializes a byte-string: `string ? = String;`.
///
/// Short strings (up to 253 bytes) carry a single length byte, longer
/// ones `0xfe` plus a 3-byte little-endian length. The result is padded
/// with zeroes to a multiple of 4 bytes.
impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let len = if self.len() <= 253 {
            buf.extend([self.len() as u8]);
            self.len() + 1
        } else {
            buf.extend([
                254,
                (self.len() & 0xff) as u8,
                ((self.len() >> 8) & 0xff) as u8,
                ((self.len() >> 16) & 0xff) as u8,
            ]);
            self.len()
        };

        buf.extend(self.iter().copied());
        buf.extend(std::iter::repeat(0).take((4 - len % 4) % 4));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_ints() {
        assert_eq!((-1i32).to_bytes(), [0xff, 0xff, 0xff, 0xff]);
        assert_eq!(1i64.to_bytes(), [0x1, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0]);
        assert_eq!(u64::MAX.to_bytes(), [0xff; 8]);
    }

    #[test]
    fn serialize_vec() {
        assert_eq!(
            Vec::<i32>::new().to_bytes(),
            [0x15, 0xc4, 0xb5, 0x1c, 0x0, 0x0, 0x0, 0x0]
        );
        assert_eq!(
            vec![0x7f_i32].to_bytes(),
            [0x15, 0xc4, 0xb5, 0x1c, 0x1, 0x0, 0x0, 0x0, 0x7f, 0x0, 0x0, 0x0]
        );
    }

    #[test]
    fn serialize_byte_strings() {
        assert_eq!(Vec::<u8>::new().to_bytes(), &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(vec![0x7f_u8].to_bytes(), &[0x01, 0x7f, 0x00, 0x00]);
        assert_eq!(
            (&b"Hi!"[..]).to_bytes(),
            &[0x03, b'H', b'i', b'!']
        );

        // The long form starts at 254 bytes and is padded to 4.
        let long = vec![0x7f_u8; 254];
        let bytes = long.to_bytes();
        assert_eq!(&bytes[..4], &[0xfe, 0xfe, 0x00, 0x00]);
        assert_eq!(bytes.len(), 4 + 254 + 2);
        assert_eq!(&bytes[bytes.len() - 2..], &[0x00, 0x00]);
    }

    #[test]
    fn byte_strings_round_trip() {
        use crate::Deserializable;

        for len in [0usize, 1, 3, 4, 253, 254, 255, 1024] {
            let data = vec![0xab_u8; len];
            assert_eq!(Vec::<u8>::from_bytes(&data.to_bytes()).unwrap(), data);
        }
    }
}
