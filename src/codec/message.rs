//! The message dissector: a tagged variant over a single mutable byte
//! buffer, matching spec for PHY frames, data frames, join-request,
//! join-accept, rejoin-request and proprietary payloads.

use crate::error::{Error, Result};

use super::bytes::{aes128_ecb_decrypt, aes128_ecb_encrypt};
use super::crypto::{compute_join_mic, compute_mic_simple, compute_mic_uplink_v11, crypt_frm_payload, DIR_DOWN, DIR_UP};
use super::keys::{RootKeys, Session};
use super::mac_commands::{self, Direction, MacCommand};
use super::mhdr::{MType, Mhdr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V102,
    V110,
}

/// Default byte pattern for each MType: zero-filled fields of the right
/// width, including a zero MIC, with the MHDR byte left at 0 (callers set it
/// via `set_mtype` right after).
fn default_body(mtype: MType, version: ProtocolVersion) -> Vec<u8> {
    match mtype {
        MType::UnconfirmedDataUp
        | MType::UnconfirmedDataDown
        | MType::ConfirmedDataUp
        | MType::ConfirmedDataDown => {
            // DevAddr(4) + FCtrl(1) + FCnt(2) + MIC(4), no FOpts/FPort/FRMPayload.
            vec![0u8; 4 + 1 + 2 + 4]
        }
        MType::JoinRequest => vec![0u8; 8 + 8 + 2 + 4],
        MType::JoinAccept => vec![0u8; 16], // minimal block, no CFList
        MType::RejoinRequest => vec![0u8; 1 + 3 + 8 + 2 + 4],
        MType::Proprietary => vec![],
    }
}

pub struct LoRaWANMessage {
    bytes: Vec<u8>,
    version: ProtocolVersion,
}

impl LoRaWANMessage {
    /// Accepts an empty buffer (initialised to a single zero byte, payload
    /// reset to JoinRequest's default shape) or any non-empty byte sequence.
    pub fn new(bytes: Vec<u8>, version: ProtocolVersion) -> Result<Self> {
        if bytes.is_empty() {
            let mut msg = LoRaWANMessage { bytes: vec![0u8], version };
            let body = default_body(MType::JoinRequest, version);
            msg.bytes.extend(body);
            Ok(msg)
        } else {
            Ok(LoRaWANMessage { bytes, version })
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn mhdr(&self) -> Mhdr {
        Mhdr(self.bytes[0])
    }

    pub fn mtype(&self) -> Result<MType> {
        self.mhdr().mtype()
    }

    /// Writes byte 0, possibly flipping MType. A flip across a
    /// {conf,unconf}x{up,down} pair resets the payload to that variant's
    /// default shape; a flip within the pair preserves payload bytes.
    pub fn set_byte0(&mut self, value: u8) -> Result<()> {
        let old_mtype = self.mtype()?;
        let new_mhdr = Mhdr(value);
        let new_mtype = new_mhdr.mtype()?;
        self.bytes[0] = value;
        if !old_mtype.same_direction_pair(new_mtype) {
            let body = default_body(new_mtype, self.version);
            self.bytes.truncate(1);
            self.bytes.extend(body);
        }
        Ok(())
    }

    pub fn set_mtype(&mut self, mtype: MType) -> Result<()> {
        let new_byte = self.mhdr().with_mtype(mtype).0;
        self.set_byte0(new_byte)
    }

    /// FCtrl setters: mutate the masked bits directly. Only meaningful for
    /// data frames; `payload()` stays read-only, so mutation lives here.
    pub fn set_fctrl_adr(&mut self, value: bool) {
        self.bytes[5] = super::bytes::set_masked_bool(self.bytes[5], value, 0x80);
    }

    pub fn set_fctrl_adr_ack_req(&mut self, value: bool) {
        self.bytes[5] = super::bytes::set_masked_bool(self.bytes[5], value, 0x40);
    }

    pub fn set_fctrl_ack(&mut self, value: bool) {
        self.bytes[5] = super::bytes::set_masked_bool(self.bytes[5], value, 0x20);
    }

    pub fn set_fctrl_class_b_or_f_pending(&mut self, value: bool) {
        self.bytes[5] = super::bytes::set_masked_bool(self.bytes[5], value, 0x10);
    }

    fn direction(&self) -> Result<u8> {
        let mt = self.mtype()?;
        if mt.is_data_up() {
            Ok(DIR_UP)
        } else {
            Ok(DIR_DOWN)
        }
    }

    /// Dispatches to the typed payload view for the current MType.
    pub fn payload(&self) -> Result<Payload<'_>> {
        let mt = self.mtype()?;
        if mt.is_data_up() || mt.is_data_down() {
            Ok(Payload::Mac(MacPayload { msg: self, direction_up: mt.is_data_up() }))
        } else if mt.is_join_request() {
            Ok(Payload::JoinRequest(JoinRequestPayload { msg: self }))
        } else if mt.is_join_accept() {
            Ok(Payload::JoinAccept(JoinAcceptPayload { msg: self }))
        } else if mt.is_rejoin_request() {
            Ok(Payload::Rejoin(RejoinRequestPayload { msg: self }))
        } else {
            Ok(Payload::Proprietary(&self.bytes[1..]))
        }
    }
}

pub enum Payload<'a> {
    Mac(MacPayload<'a>),
    JoinRequest(JoinRequestPayload<'a>),
    JoinAccept(JoinAcceptPayload<'a>),
    Rejoin(RejoinRequestPayload<'a>),
    Proprietary(&'a [u8]),
}

pub struct MacPayload<'a> {
    msg: &'a LoRaWANMessage,
    direction_up: bool,
}

impl<'a> MacPayload<'a> {
    fn fopts_len(&self) -> usize {
        (self.msg.bytes[5] & 0x0F) as usize
    }

    pub fn dev_addr_le(&self) -> [u8; 4] {
        self.msg.bytes[1..5].try_into().unwrap()
    }

    pub fn dev_addr(&self) -> u32 {
        u32::from_le_bytes(self.dev_addr_le())
    }

    pub fn fcnt(&self) -> u16 {
        u16::from_le_bytes([self.msg.bytes[6], self.msg.bytes[7]])
    }

    pub fn adr(&self) -> bool {
        self.msg.bytes[5] & 0x80 != 0
    }

    pub fn ack(&self) -> bool {
        self.msg.bytes[5] & 0x20 != 0
    }

    pub fn class_b_or_f_pending(&self) -> bool {
        self.msg.bytes[5] & 0x10 != 0
    }

    pub fn adr_ack_req_or_rfu(&self) -> bool {
        self.msg.bytes[5] & 0x40 != 0
    }

    pub fn fopts(&self) -> Vec<MacCommand> {
        let len = self.fopts_len();
        let start = 8;
        let direction = if self.direction_up { Direction::Uplink } else { Direction::Downlink };
        mac_commands::parse(&self.msg.bytes[start..start + len], direction)
    }

    fn body_range(&self) -> (usize, usize) {
        let start = 8 + self.fopts_len();
        let end = self.msg.bytes.len().saturating_sub(4);
        (start.min(end), end)
    }

    /// Absent iff the payload body (after FOpts, before MIC) is empty.
    pub fn port(&self) -> Option<u8> {
        let (start, end) = self.body_range();
        if end <= start {
            None
        } else {
            Some(self.msg.bytes[start])
        }
    }

    pub fn frm_payload_encrypted(&self) -> &[u8] {
        let (start, end) = self.body_range();
        if self.port().is_some() {
            &self.msg.bytes[start + 1..end]
        } else {
            &self.msg.bytes[end..end]
        }
    }

    pub fn mic(&self) -> [u8; 4] {
        let n = self.msg.bytes.len();
        self.msg.bytes[n - 4..].try_into().unwrap()
    }

    fn mic_msg(&self) -> &[u8] {
        &self.msg.bytes[..self.msg.bytes.len() - 4]
    }

    /// Full 32-bit FCnt, derived from the session's high bits and the
    /// frame's low 16 bits.
    fn fcnt32(&self, session: &Session) -> u32 {
        let hi = if self.direction_up { session.fcnt_up() } else { session.fcnt_down() };
        (hi & 0xFFFF_0000) | self.fcnt() as u32
    }

    /// Computes the MIC per §4.D. For 1.1 uplink frames this is the dual
    /// CMAC over B0/B1; `conf_fcnt`/`tx_dr`/`tx_ch` are only meaningful there
    /// (0 is a safe default when the radio context is unknown).
    pub fn compute_mic(&self, session: &Session, conf_fcnt: u16, tx_dr: u8, tx_ch: u8) -> Result<[u8; 4]> {
        let fcnt32 = self.fcnt32(session);
        let dev_addr_le = self.dev_addr_le();
        match session {
            Session::V102 { nwk_skey, .. } => {
                let dir = if self.direction_up { DIR_UP } else { DIR_DOWN };
                Ok(compute_mic_simple(&nwk_skey.0, dir, &dev_addr_le, fcnt32, self.mic_msg()))
            }
            Session::V110 { f_nwk_s_int_key, s_nwk_s_int_key, .. } => {
                if self.direction_up {
                    Ok(compute_mic_uplink_v11(
                        &f_nwk_s_int_key.0,
                        &s_nwk_s_int_key.0,
                        conf_fcnt,
                        tx_dr,
                        tx_ch,
                        &dev_addr_le,
                        fcnt32,
                        self.mic_msg(),
                    ))
                } else {
                    Ok(compute_mic_simple(&s_nwk_s_int_key.0, DIR_DOWN, &dev_addr_le, fcnt32, self.mic_msg()))
                }
            }
        }
    }

    pub fn verify_mic(&self, session: &Session, conf_fcnt: u16, tx_dr: u8, tx_ch: u8) -> Result<bool> {
        Ok(self.compute_mic(session, conf_fcnt, tx_dr, tx_ch)? == self.mic())
    }

    /// Decrypts (or encrypts; the keystream XOR is involutive) FRMPayload.
    pub fn frm_payload(&self, session: &Session) -> Result<Vec<u8>> {
        let fcnt32 = self.fcnt32(session);
        let dev_addr_le = self.dev_addr_le();
        let dir = if self.direction_up { DIR_UP } else { DIR_DOWN };
        let key = match self.port() {
            Some(0) => session.fport0_enc_key(),
            Some(_) => &session.app_skey().0,
            None => return Ok(vec![]),
        };
        Ok(crypt_frm_payload(key, dir, &dev_addr_le, fcnt32, self.frm_payload_encrypted()))
    }
}

pub struct JoinRequestPayload<'a> {
    msg: &'a LoRaWANMessage,
}

impl<'a> JoinRequestPayload<'a> {
    /// AppEUI under 1.0.2, JoinEUI under 1.1 -- same wire position either way.
    pub fn app_eui_or_join_eui_le(&self) -> [u8; 8] {
        self.msg.bytes[1..9].try_into().unwrap()
    }

    pub fn dev_eui_le(&self) -> [u8; 8] {
        self.msg.bytes[9..17].try_into().unwrap()
    }

    pub fn dev_nonce(&self) -> u16 {
        u16::from_le_bytes([self.msg.bytes[17], self.msg.bytes[18]])
    }

    pub fn mic(&self) -> [u8; 4] {
        self.msg.bytes[19..23].try_into().unwrap()
    }

    pub fn compute_mic(&self, root_keys: &RootKeys) -> [u8; 4] {
        let body = &self.msg.bytes[1..19];
        compute_join_mic(root_keys.join_mic_key(), self.msg.bytes[0], body)
    }

    pub fn verify_mic(&self, root_keys: &RootKeys) -> bool {
        self.compute_mic(root_keys) == self.mic()
    }
}

pub struct JoinAcceptPayload<'a> {
    msg: &'a LoRaWANMessage,
}

impl<'a> JoinAcceptPayload<'a> {
    fn ciphertext(&self) -> &[u8] {
        &self.msg.bytes[1..]
    }

    fn has_cf_list(&self) -> bool {
        self.ciphertext().len() > 16
    }

    /// Join-accept is "encrypted" on the wire with the AES *decrypt* block
    /// operation, so dissecting it applies the AES *encrypt* operation.
    pub fn decrypt(&self, root_keys: &RootKeys) -> Result<Vec<u8>> {
        let key = root_keys.join_accept_key();
        let ct = self.ciphertext();
        if ct.len() % 16 != 0 {
            return Err(Error::LengthMismatch { expected: 16, actual: ct.len() % 16 });
        }
        let mut out = Vec::with_capacity(ct.len());
        for block in ct.chunks(16) {
            let b: [u8; 16] = block.try_into().unwrap();
            out.extend_from_slice(&aes128_ecb_encrypt(key, &b));
        }
        Ok(out)
    }

    /// Inverse of `decrypt`, used when constructing a join-accept (e.g. for
    /// a rogue-network-server impersonation).
    pub fn encrypt_plaintext(root_keys: &RootKeys, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = root_keys.join_accept_key();
        if plaintext.len() % 16 != 0 {
            return Err(Error::LengthMismatch { expected: 16, actual: plaintext.len() % 16 });
        }
        let mut out = Vec::with_capacity(plaintext.len());
        for block in plaintext.chunks(16) {
            let b: [u8; 16] = block.try_into().unwrap();
            out.extend_from_slice(&aes128_ecb_decrypt(key, &b));
        }
        Ok(out)
    }

    pub fn app_nonce(&self, plain: &[u8]) -> [u8; 3] {
        plain[0..3].try_into().unwrap()
    }

    pub fn net_id(&self, plain: &[u8]) -> [u8; 3] {
        plain[3..6].try_into().unwrap()
    }

    pub fn dev_addr_le(&self, plain: &[u8]) -> [u8; 4] {
        plain[6..10].try_into().unwrap()
    }

    pub fn rx1_dr_offset(&self, plain: &[u8]) -> u8 {
        (plain[10] >> 4) & 0x07
    }

    pub fn rx2_dr(&self, plain: &[u8]) -> u8 {
        plain[10] & 0x0F
    }

    pub fn rx_delay(&self, plain: &[u8]) -> u8 {
        plain[11]
    }

    pub fn cf_list<'p>(&self, plain: &'p [u8]) -> Option<&'p [u8]> {
        if self.has_cf_list() {
            Some(&plain[12..28])
        } else {
            None
        }
    }

    pub fn mic(&self, plain: &[u8]) -> [u8; 4] {
        let n = plain.len();
        plain[n - 4..].try_into().unwrap()
    }

    pub fn verify_mic(&self, root_keys: &RootKeys, plain: &[u8]) -> bool {
        let body = &plain[..plain.len() - 4];
        let expected = compute_join_mic(root_keys.join_accept_key(), self.msg.bytes[0], body);
        expected == self.mic(plain)
    }
}

pub struct RejoinRequestPayload<'a> {
    msg: &'a LoRaWANMessage,
}

impl<'a> RejoinRequestPayload<'a> {
    pub fn rejoin_type(&self) -> u8 {
        self.msg.bytes[1]
    }

    pub fn net_id(&self) -> [u8; 3] {
        self.msg.bytes[2..5].try_into().unwrap()
    }

    pub fn dev_eui_le(&self) -> [u8; 8] {
        self.msg.bytes[5..13].try_into().unwrap()
    }

    pub fn rj_count(&self) -> u16 {
        u16::from_le_bytes([self.msg.bytes[13], self.msg.bytes[14]])
    }

    pub fn mic(&self) -> [u8; 4] {
        self.msg.bytes[15..19].try_into().unwrap()
    }
}

/// Corrected little-endian 2-byte write of rjCount, bounded to 0..=0xFFFF.
/// The original implementation's setter used the wrong shift and was
/// missing its length constant; this is the behaviour that actually matches
/// the wire layout in §3.
pub fn set_rj_count(bytes: &mut [u8], offset: usize, rj_count: u16) -> Result<()> {
    if offset + 2 > bytes.len() {
        return Err(Error::OutOfRange { field: "rj_count_offset", value: offset as i64, min: 0, max: bytes.len() as i64 });
    }
    bytes[offset..offset + 2].copy_from_slice(&rj_count.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::keys::{AppSKey, NwkSKey};

    fn build_s1_frame() -> (LoRaWANMessage, Session) {
        let nwk_skey = NwkSKey::from(hex::decode("2B7E151628AED2A6ABF7158809CF4F3C").unwrap().try_into().unwrap());
        let session = Session::V102 {
            dev_addr: 0x1234_5678,
            nwk_skey,
            app_skey: AppSKey::from([0u8; 16]),
            fcnt_up: 1000,
            fcnt_down: 0,
        };
        // MHDR(0x40) DevAddr(LE of 0x12345678) FCtrl(0x00) FCnt(1000 LE) FPort(0x42) MIC(zeros)
        let mut bytes = vec![0x40u8, 0x78, 0x56, 0x34, 0x12, 0x00, 0xE8, 0x03, 0x42, 0, 0, 0, 0];
        let msg = LoRaWANMessage::new(bytes.clone(), ProtocolVersion::V102).unwrap();
        let mac = match msg.payload().unwrap() {
            Payload::Mac(m) => m,
            _ => unreachable!(),
        };
        let mic = mac.compute_mic(&session, 0, 0, 0).unwrap();
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&mic);
        (LoRaWANMessage::new(bytes, ProtocolVersion::V102).unwrap(), session)
    }

    #[test]
    fn s1_uplink_mic_verifies() {
        let (msg, session) = build_s1_frame();
        let mac = match msg.payload().unwrap() {
            Payload::Mac(m) => m,
            _ => unreachable!(),
        };
        assert!(mac.verify_mic(&session, 0, 0, 0).unwrap());
    }

    #[test]
    fn s1_bit_flip_invalidates_mic() {
        let (mut msg, session) = build_s1_frame();
        // flip a bit in the fixed-reserved FCtrl byte, which is covered by the MIC
        msg.bytes[5] ^= 0x01;
        let mac = match msg.payload().unwrap() {
            Payload::Mac(m) => m,
            _ => unreachable!(),
        };
        assert!(!mac.verify_mic(&session, 0, 0, 0).unwrap());
    }

    #[test]
    fn round_trip_codec_invariant() {
        let bytes = vec![0x40u8, 1, 2, 3, 4, 0x00, 0, 0, 0, 0, 0, 0];
        let msg = LoRaWANMessage::new(bytes.clone(), ProtocolVersion::V102).unwrap();
        assert_eq!(msg.raw(), &bytes[..]);
    }

    #[test]
    fn mtype_preserved_within_direction_pair() {
        let bytes = vec![0x40u8, 1, 2, 3, 4, 0x00, 9, 9, 0, 0, 0, 0];
        let mut msg = LoRaWANMessage::new(bytes.clone(), ProtocolVersion::V102).unwrap();
        msg.set_mtype(MType::ConfirmedDataUp).unwrap();
        assert_eq!(&msg.raw()[1..], &bytes[1..]);
    }

    #[test]
    fn mtype_reset_across_direction_pair() {
        let bytes = vec![0x40u8, 1, 2, 3, 4, 0x00, 9, 9, 0, 0, 0, 0];
        let mut msg = LoRaWANMessage::new(bytes, ProtocolVersion::V102).unwrap();
        msg.set_mtype(MType::UnconfirmedDataDown).unwrap();
        assert_eq!(msg.mtype().unwrap(), MType::UnconfirmedDataDown);
        assert_eq!(&msg.raw()[1..], &default_body(MType::UnconfirmedDataDown, ProtocolVersion::V102)[..]);
    }

    #[test]
    fn join_accept_decrypt_is_involutive() {
        let root_keys = RootKeys::V102 {
            app_eui: super::super::keys::AppEui::from([0u8; 8]),
            app_key: super::super::keys::AppKey::from([0x11u8; 16]),
            dev_eui: super::super::keys::DevEui::from([0u8; 8]),
        };
        let plain: Vec<u8> = (0..16).collect();
        let ct = JoinAcceptPayload::encrypt_plaintext(&root_keys, &plain).unwrap();
        let mut bytes = vec![0x20u8];
        bytes.extend(ct);
        let msg = LoRaWANMessage::new(bytes, ProtocolVersion::V102).unwrap();
        let ja = match msg.payload().unwrap() {
            Payload::JoinAccept(j) => j,
            _ => unreachable!(),
        };
        let recovered = ja.decrypt(&root_keys).unwrap();
        assert_eq!(recovered, plain);
    }
}
