//! MIC computation and FRMPayload keystream construction.
//!
//! The B0/A_i block layouts are fixed by the LoRaWAN specification; this
//! module only assembles them and hands the result to the AES-ECB/CMAC
//! primitives in [`super::bytes`].

use super::bytes::{aes128_cmac, aes128_ecb_encrypt};

pub const DIR_UP: u8 = 0;
pub const DIR_DOWN: u8 = 1;

fn b0(dir: u8, dev_addr_le: &[u8; 4], fcnt32: u32, msg_len: u8) -> [u8; 16] {
    let mut b = [0u8; 16];
    b[0] = 0x49;
    // bytes 1..5 are 0x00
    b[5] = dir;
    b[6..10].copy_from_slice(dev_addr_le);
    b[10..14].copy_from_slice(&fcnt32.to_le_bytes());
    b[14] = 0x00;
    b[15] = msg_len;
    b
}

/// B1, used for the uplink CMAC-F half of a LoRaWAN 1.1 frame.
fn b1(conf_fcnt: u16, tx_dr: u8, tx_ch: u8, dev_addr_le: &[u8; 4], fcnt32: u32, msg_len: u8) -> [u8; 16] {
    let mut b = [0u8; 16];
    b[0] = 0x49;
    b[1..3].copy_from_slice(&conf_fcnt.to_le_bytes());
    b[3] = tx_dr;
    b[4] = tx_ch;
    b[5] = DIR_UP;
    b[6..10].copy_from_slice(dev_addr_le);
    b[10..14].copy_from_slice(&fcnt32.to_le_bytes());
    b[14] = 0x00;
    b[15] = msg_len;
    b
}

fn truncate4(full: [u8; 16]) -> [u8; 4] {
    [full[0], full[1], full[2], full[3]]
}

/// 1.0.2 data-frame MIC, and the downlink half of 1.1 (same construction,
/// keyed by SNwkSIntKey).
pub fn compute_mic_simple(
    key: &[u8; 16],
    dir: u8,
    dev_addr_le: &[u8; 4],
    fcnt32: u32,
    msg: &[u8],
) -> [u8; 4] {
    let block = b0(dir, dev_addr_le, fcnt32, msg.len() as u8);
    let mut data = Vec::with_capacity(16 + msg.len());
    data.extend_from_slice(&block);
    data.extend_from_slice(msg);
    truncate4(aes128_cmac(key, &data))
}

/// 1.1 uplink data-frame MIC: dual CMAC over B0 (FNwkSIntKey) and B1
/// (SNwkSIntKey), interleaved per LoRaWAN 1.1 §4.4.
#[allow(clippy::too_many_arguments)]
pub fn compute_mic_uplink_v11(
    f_nwk_s_int_key: &[u8; 16],
    s_nwk_s_int_key: &[u8; 16],
    conf_fcnt: u16,
    tx_dr: u8,
    tx_ch: u8,
    dev_addr_le: &[u8; 4],
    fcnt32: u32,
    msg: &[u8],
) -> [u8; 4] {
    let block0 = b0(DIR_UP, dev_addr_le, fcnt32, msg.len() as u8);
    let mut data0 = Vec::with_capacity(16 + msg.len());
    data0.extend_from_slice(&block0);
    data0.extend_from_slice(msg);
    let cmac_f = aes128_cmac(f_nwk_s_int_key, &data0);

    let block1 = b1(conf_fcnt, tx_dr, tx_ch, dev_addr_le, fcnt32, msg.len() as u8);
    let mut data1 = Vec::with_capacity(16 + msg.len());
    data1.extend_from_slice(&block1);
    data1.extend_from_slice(msg);
    let cmac_s = aes128_cmac(s_nwk_s_int_key, &data1);

    [cmac_s[0], cmac_s[1], cmac_f[0], cmac_f[1]]
}

/// A_i keystream block for FRMPayload encryption/decryption.
fn a_i(dir: u8, dev_addr_le: &[u8; 4], fcnt32: u32, i: u8) -> [u8; 16] {
    let mut a = [0u8; 16];
    a[0] = 0x01;
    a[5] = dir;
    a[6..10].copy_from_slice(dev_addr_le);
    a[10..14].copy_from_slice(&fcnt32.to_le_bytes());
    a[14] = 0x00;
    a[15] = i;
    a
}

/// XORs `data` with the AES-ECB keystream derived from `key`; involutive
/// (the same call encrypts and decrypts).
pub fn crypt_frm_payload(key: &[u8; 16], dir: u8, dev_addr_le: &[u8; 4], fcnt32: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i: u8 = 1;
    for chunk in data.chunks(16) {
        let block = a_i(dir, dev_addr_le, fcnt32, i);
        let keystream = aes128_ecb_encrypt(key, &block);
        for (b, k) in chunk.iter().zip(keystream.iter()) {
            out.push(b ^ k);
        }
        i = i.wrapping_add(1);
    }
    out
}

/// Join-request / rejoin-request MIC: `truncate4(CMAC(key, mhdr ∥ body))`.
pub fn compute_join_mic(key: &[u8; 16], mhdr: u8, body: &[u8]) -> [u8; 4] {
    let mut data = Vec::with_capacity(1 + body.len());
    data.push(mhdr);
    data.extend_from_slice(body);
    truncate4(aes128_cmac(key, &data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystream_is_involutive() {
        let key = [0u8; 16];
        let dev_addr_le = [0x78, 0x56, 0x34, 0x12];
        for len in 0..250 {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let enc = crypt_frm_payload(&key, DIR_UP, &dev_addr_le, 1, &plain);
            let dec = crypt_frm_payload(&key, DIR_UP, &dev_addr_le, 1, &enc);
            assert_eq!(dec, plain);
        }
    }

    #[test]
    fn s2_frm_payload_crypto() {
        let key = [0u8; 16];
        let dev_addr_le = [0x78, 0x56, 0x34, 0x12];
        let plain = b"Hello";
        let enc = crypt_frm_payload(&key, DIR_UP, &dev_addr_le, 1, plain);
        let dec = crypt_frm_payload(&key, DIR_UP, &dev_addr_le, 1, &enc);
        assert_eq!(dec, plain);
    }

    #[test]
    fn mic_is_deterministic() {
        let key = [0x2Bu8, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C];
        let dev_addr_le = [0x78, 0x56, 0x34, 0x12];
        let msg = [0x40u8, 0x78, 0x56, 0x34, 0x12, 0x00, 0xE8, 0x03, 0x42];
        let a = compute_mic_simple(&key, DIR_UP, &dev_addr_le, 1000, &msg);
        let b = compute_mic_simple(&key, DIR_UP, &dev_addr_le, 1000, &msg);
        assert_eq!(a, b);
    }
}
