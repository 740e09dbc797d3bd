//! The MHDR byte: message type, major version, and the same-direction-pair
//! test used to decide whether changing the MType resets the payload.

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl TryFrom<u8> for MType {
    type Error = Error;

    fn try_from(mtype_bits: u8) -> Result<Self, Error> {
        match mtype_bits {
            0b000 => Ok(MType::JoinRequest),
            0b001 => Ok(MType::JoinAccept),
            0b010 => Ok(MType::UnconfirmedDataUp),
            0b011 => Ok(MType::UnconfirmedDataDown),
            0b100 => Ok(MType::ConfirmedDataUp),
            0b101 => Ok(MType::ConfirmedDataDown),
            0b110 => Ok(MType::RejoinRequest),
            0b111 => Ok(MType::Proprietary),
            _ => Err(Error::InvalidMType(mtype_bits)),
        }
    }
}

impl MType {
    pub fn bits(self) -> u8 {
        match self {
            MType::JoinRequest => 0b000,
            MType::JoinAccept => 0b001,
            MType::UnconfirmedDataUp => 0b010,
            MType::UnconfirmedDataDown => 0b011,
            MType::ConfirmedDataUp => 0b100,
            MType::ConfirmedDataDown => 0b101,
            MType::RejoinRequest => 0b110,
            MType::Proprietary => 0b111,
        }
    }

    pub fn is_data_up(self) -> bool {
        matches!(self, MType::UnconfirmedDataUp | MType::ConfirmedDataUp)
    }

    pub fn is_data_down(self) -> bool {
        matches!(self, MType::UnconfirmedDataDown | MType::ConfirmedDataDown)
    }

    pub fn is_join_request(self) -> bool {
        matches!(self, MType::JoinRequest)
    }

    pub fn is_join_accept(self) -> bool {
        matches!(self, MType::JoinAccept)
    }

    pub fn is_proprietary(self) -> bool {
        matches!(self, MType::Proprietary)
    }

    pub fn is_rejoin_request(self) -> bool {
        matches!(self, MType::RejoinRequest)
    }

    /// Same {conf,unconf}x{up,down} pair as `other`: a byte-0 write between
    /// these two never resets the payload.
    pub fn same_direction_pair(self, other: MType) -> bool {
        match (self, other) {
            (MType::UnconfirmedDataUp, MType::ConfirmedDataUp)
            | (MType::ConfirmedDataUp, MType::UnconfirmedDataUp) => true,
            (MType::UnconfirmedDataDown, MType::ConfirmedDataDown)
            | (MType::ConfirmedDataDown, MType::UnconfirmedDataDown) => true,
            (a, b) => a == b,
        }
    }
}

pub const MTYPE_MASK: u8 = 0b1110_0000;
pub const RFU_MASK: u8 = 0b0001_1100;
pub const MAJOR_MASK: u8 = 0b0000_0011;

#[derive(Debug, Clone, Copy)]
pub struct Mhdr(pub u8);

impl Mhdr {
    pub fn mtype(self) -> Result<MType, Error> {
        MType::try_from(super::bytes::get_masked(self.0, MTYPE_MASK))
    }

    pub fn major(self) -> u8 {
        super::bytes::get_masked(self.0, MAJOR_MASK)
    }

    pub fn rfu(self) -> u8 {
        super::bytes::get_masked(self.0, RFU_MASK)
    }

    pub fn with_mtype(self, mtype: MType) -> Self {
        Mhdr(super::bytes::set_masked(self.0, mtype.bits(), MTYPE_MASK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtype_bits_roundtrip() {
        for &mt in &[
            MType::JoinRequest,
            MType::JoinAccept,
            MType::UnconfirmedDataUp,
            MType::UnconfirmedDataDown,
            MType::ConfirmedDataUp,
            MType::ConfirmedDataDown,
            MType::RejoinRequest,
            MType::Proprietary,
        ] {
            assert_eq!(MType::try_from(mt.bits()).unwrap(), mt);
        }
    }

    #[test]
    fn direction_pair_preserved_across_confirm_toggle() {
        assert!(MType::UnconfirmedDataUp.same_direction_pair(MType::ConfirmedDataUp));
        assert!(!MType::UnconfirmedDataUp.same_direction_pair(MType::UnconfirmedDataDown));
    }

    #[test]
    fn mhdr_reads_fields() {
        let m = Mhdr(0x40);
        assert_eq!(m.mtype().unwrap(), MType::UnconfirmedDataUp);
        assert_eq!(m.major(), 0);
    }
}
