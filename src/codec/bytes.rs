//! Masked-bit access, byte splicing and the small set of primitives (AES-ECB,
//! CMAC, CRC-16/XMODEM, 3-byte frequency encoding) everything above this
//! module is built from.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac as CmacMac};
use crc::{Crc, CRC_16_XMODEM};

use crate::error::{Error, Result};

/// Right-shifts `byte` by the trailing-zero count of `mask` and returns the
/// masked field value.
pub fn get_masked(byte: u8, mask: u8) -> u8 {
    let shift = mask.trailing_zeros();
    (byte & mask) >> shift
}

/// Replaces the bits of `base` selected by `mask` with `value`, truncated to
/// the mask's width.
pub fn set_masked(base: u8, value: u8, mask: u8) -> u8 {
    let shift = mask.trailing_zeros();
    let cleared = base & !mask;
    cleared | ((value << shift) & mask)
}

/// Promotes a bool to the 0/1 masked field value.
pub fn set_masked_bool(base: u8, value: bool, mask: u8) -> u8 {
    set_masked(base, value as u8, mask)
}

/// Returns a new vector with `new` substituted at `[offset, offset+length)`.
pub fn splice(
    seq: &[u8],
    offset: usize,
    length: usize,
    new: &[i64],
    check_length: bool,
    switch_endian: bool,
) -> Result<Vec<u8>> {
    if offset > seq.len() || offset + length > seq.len() {
        return Err(Error::OutOfRange {
            field: "offset",
            value: offset as i64,
            min: 0,
            max: seq.len() as i64,
        });
    }
    if check_length && new.len() != length {
        return Err(Error::LengthMismatch {
            expected: length,
            actual: new.len(),
        });
    }
    let mut bytes = Vec::with_capacity(new.len());
    for &v in new {
        if !(0..=255).contains(&v) {
            return Err(Error::NotAByte(v));
        }
        bytes.push(v as u8);
    }
    if switch_endian {
        bytes.reverse();
    }
    let mut out = Vec::with_capacity(seq.len() - length + bytes.len());
    out.extend_from_slice(&seq[..offset]);
    out.extend_from_slice(&bytes);
    out.extend_from_slice(&seq[offset + length..]);
    Ok(out)
}

/// Writes `n` into `length` bytes at `offset`, truncating silently if `n`
/// needs more bits than `length` bytes hold.
pub fn put_number(seq: &mut [u8], offset: usize, length: usize, n: u64, little_endian: bool) {
    let full = n.to_le_bytes();
    let mut field: Vec<u8> = full[..length.min(8)].to_vec();
    field.resize(length, 0);
    if !little_endian {
        field.reverse();
    }
    seq[offset..offset + length].copy_from_slice(&field);
}

/// Reads an unsigned multi-byte integer at `offset`.
pub fn get_number(seq: &[u8], offset: usize, length: usize, little_endian: bool) -> u64 {
    let mut field = seq[offset..offset + length].to_vec();
    if !little_endian {
        field.reverse();
    }
    let mut buf = [0u8; 8];
    buf[..field.len()].copy_from_slice(&field);
    u64::from_le_bytes(buf)
}

/// `floor(hz/100)` as 3 little-endian bytes.
pub fn freq_to_bytes(hz: u64) -> Result<[u8; 3]> {
    let q = hz / 100;
    if q > 0x00FF_FFFF {
        return Err(Error::OutOfRange {
            field: "freq",
            value: q as i64,
            min: 0,
            max: 0x00FF_FFFF,
        });
    }
    let b = q.to_le_bytes();
    Ok([b[0], b[1], b[2]])
}

/// Inverse of [`freq_to_bytes`].
pub fn bytes_to_freq(b: [u8; 3]) -> u64 {
    let q = u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64;
    q * 100
}

pub fn aes128_ecb_encrypt(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    use aes::cipher::generic_array::GenericArray;
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = *block;
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut out));
    out
}

pub fn aes128_ecb_decrypt(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::BlockDecrypt;
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = *block;
    cipher.decrypt_block(GenericArray::from_mut_slice(&mut out));
    out
}

pub fn aes128_cmac(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac = Cmac::<Aes128>::new_from_slice(key).expect("16-byte key");
    mac.update(data);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&result);
    out
}

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub fn crc16_xmodem(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_roundtrip() {
        let mask = 0b0011_0000;
        let b = set_masked(0xFF, 0b10, mask);
        assert_eq!(get_masked(b, mask), 0b10);
    }

    #[test]
    fn splice_replaces_range() {
        let seq = [1, 2, 3, 4, 5];
        let out = splice(&seq, 1, 2, &[9, 9], true, false).unwrap();
        assert_eq!(out, vec![1, 9, 9, 4, 5]);
    }

    #[test]
    fn splice_rejects_bad_length() {
        let seq = [1, 2, 3];
        assert!(splice(&seq, 0, 2, &[9], true, false).is_err());
    }

    #[test]
    fn freq_roundtrip() {
        let hz = 868_100_000u64;
        let b = freq_to_bytes(hz).unwrap();
        assert_eq!(bytes_to_freq(b), hz);
    }

    #[test]
    fn number_roundtrip_le() {
        let mut seq = [0u8; 4];
        put_number(&mut seq, 0, 2, 1000, true);
        assert_eq!(get_number(&seq, 0, 2, true), 1000);
    }

    #[test]
    fn crc_matches_known_vector() {
        // CRC-16/XMODEM of "123456789" is 0x31C3.
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
    }
}
