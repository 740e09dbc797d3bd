//! MAC-command registry: a static `(cid, direction) -> length` table plus a
//! tagged variant per command with typed accessors over its raw bytes.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

/// One row of the static registry: CID, direction, and payload length
/// (excluding the CID byte itself).
struct Entry {
    cid: u8,
    direction: Direction,
    length: usize,
}

const REGISTRY: &[Entry] = &[
    Entry { cid: 0x02, direction: Direction::Uplink, length: 0 }, // LinkCheckReq
    Entry { cid: 0x02, direction: Direction::Downlink, length: 2 }, // LinkCheckAns
    Entry { cid: 0x03, direction: Direction::Downlink, length: 4 }, // LinkADRReq
    Entry { cid: 0x03, direction: Direction::Uplink, length: 1 }, // LinkADRAns
    Entry { cid: 0x04, direction: Direction::Downlink, length: 1 }, // DutyCycleReq
    Entry { cid: 0x04, direction: Direction::Uplink, length: 0 }, // DutyCycleAns
    Entry { cid: 0x05, direction: Direction::Downlink, length: 4 }, // RXParamSetupReq
    Entry { cid: 0x05, direction: Direction::Uplink, length: 1 }, // RXParamSetupAns
    Entry { cid: 0x06, direction: Direction::Downlink, length: 0 }, // DevStatusReq
    Entry { cid: 0x06, direction: Direction::Uplink, length: 2 }, // DevStatusAns
    Entry { cid: 0x07, direction: Direction::Downlink, length: 5 }, // NewChannelReq
    Entry { cid: 0x07, direction: Direction::Uplink, length: 1 }, // NewChannelAns
    Entry { cid: 0x08, direction: Direction::Downlink, length: 1 }, // RXTimingSetupReq
    Entry { cid: 0x08, direction: Direction::Uplink, length: 0 }, // RXTimingSetupAns
    Entry { cid: 0x09, direction: Direction::Downlink, length: 1 }, // TxParamSetupReq
    Entry { cid: 0x09, direction: Direction::Uplink, length: 0 }, // TxParamSetupAns
    Entry { cid: 0x0A, direction: Direction::Downlink, length: 4 }, // DlChannelReq
    Entry { cid: 0x0A, direction: Direction::Uplink, length: 1 }, // DlChannelAns
];

fn lookup(cid: u8, direction: Direction) -> Option<usize> {
    REGISTRY
        .iter()
        .find(|e| e.cid == cid && e.direction == direction)
        .map(|e| e.length)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacCommand {
    LinkCheckReq,
    LinkCheckAns { margin: u8, gw_cnt: u8 },
    LinkAdrReq { dr: u8, tx_power: u8, ch_mask: u16, ch_mask_cntl: u8, nb_trans: u8 },
    LinkAdrAns { power_ack: bool, dr_ack: bool, ch_mask_ack: bool },
    DutyCycleReq { max_d_cycle: u8 },
    DutyCycleAns,
    RxParamSetupReq { rx1_dr_offset: u8, rx2_dr: u8, freq: u64 },
    RxParamSetupAns { rx1_dr_offset_ack: bool, rx2_dr_ack: bool, channel_ack: bool },
    DevStatusReq,
    DevStatusAns { battery: u8, margin: i8 },
    NewChannelReq { ch_index: u8, freq: u64, min_dr: u8, max_dr: u8 },
    NewChannelAns { dr_range_ok: bool, channel_freq_ok: bool },
    RxTimingSetupReq { delay: u8 },
    RxTimingSetupAns,
    TxParamSetupReq { downlink_dwell_time: bool, uplink_dwell_time: bool, max_eirp: u8 },
    TxParamSetupAns,
    DlChannelReq { ch_index: u8, freq: u64 },
    DlChannelAns { channel_freq_ok: bool, uplink_freq_exists: bool },
    Unknown { cid: u8, raw: Vec<u8> },
}

fn freq_le(b: &[u8]) -> u64 {
    (u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64) * 100
}

impl MacCommand {
    fn decode(cid: u8, direction: Direction, body: &[u8]) -> Self {
        use MacCommand::*;
        match (cid, direction) {
            (0x02, Direction::Uplink) => LinkCheckReq,
            (0x02, Direction::Downlink) => LinkCheckAns { margin: body[0], gw_cnt: body[1] },
            (0x03, Direction::Downlink) => LinkAdrReq {
                dr: body[0] >> 4,
                tx_power: body[0] & 0x0F,
                ch_mask: u16::from_le_bytes([body[1], body[2]]),
                ch_mask_cntl: (body[3] >> 4) & 0x07,
                nb_trans: body[3] & 0x0F,
            },
            (0x03, Direction::Uplink) => LinkAdrAns {
                power_ack: body[0] & 0x04 != 0,
                dr_ack: body[0] & 0x02 != 0,
                ch_mask_ack: body[0] & 0x01 != 0,
            },
            (0x04, Direction::Downlink) => DutyCycleReq { max_d_cycle: body[0] & 0x0F },
            (0x04, Direction::Uplink) => DutyCycleAns,
            (0x05, Direction::Downlink) => RxParamSetupReq {
                rx1_dr_offset: (body[0] >> 4) & 0x07,
                rx2_dr: body[0] & 0x0F,
                freq: freq_le(&body[1..4]),
            },
            (0x05, Direction::Uplink) => RxParamSetupAns {
                rx1_dr_offset_ack: body[0] & 0x04 != 0,
                rx2_dr_ack: body[0] & 0x02 != 0,
                channel_ack: body[0] & 0x01 != 0,
            },
            (0x06, Direction::Downlink) => DevStatusReq,
            (0x06, Direction::Uplink) => DevStatusAns {
                battery: body[0],
                margin: ((body[1] & 0x3F) as i8) - if body[1] & 0x20 != 0 { 64 } else { 0 },
            },
            (0x07, Direction::Downlink) => NewChannelReq {
                ch_index: body[0],
                freq: freq_le(&body[1..4]),
                min_dr: body[4] & 0x0F,
                max_dr: (body[4] >> 4) & 0x0F,
            },
            (0x07, Direction::Uplink) => NewChannelAns {
                dr_range_ok: body[0] & 0x02 != 0,
                channel_freq_ok: body[0] & 0x01 != 0,
            },
            (0x08, Direction::Downlink) => RxTimingSetupReq { delay: body[0] & 0x0F },
            (0x08, Direction::Uplink) => RxTimingSetupAns,
            (0x09, Direction::Downlink) => TxParamSetupReq {
                downlink_dwell_time: body[0] & 0x20 != 0,
                uplink_dwell_time: body[0] & 0x10 != 0,
                max_eirp: body[0] & 0x0F,
            },
            (0x09, Direction::Uplink) => TxParamSetupAns,
            (0x0A, Direction::Downlink) => DlChannelReq {
                ch_index: body[0],
                freq: freq_le(&body[1..4]),
            },
            (0x0A, Direction::Uplink) => DlChannelAns {
                channel_freq_ok: body[0] & 0x02 != 0,
                uplink_freq_exists: body[0] & 0x01 != 0,
            },
            _ => Unknown { cid, raw: body.to_vec() },
        }
    }
}

/// Validated setter for LinkADRReq.nbTrans: must fit 0..15 (it's a 4-bit field).
pub fn validate_nb_trans(value: u8) -> Result<u8> {
    if value > 15 {
        return Err(Error::OutOfRange { field: "nb_trans", value: value as i64, min: 0, max: 15 });
    }
    Ok(value)
}

/// Validated setter for DutyCycleReq.maxDCycle: 0..15.
pub fn validate_max_d_cycle(value: u8) -> Result<u8> {
    if value > 15 {
        return Err(Error::OutOfRange { field: "max_d_cycle", value: value as i64, min: 0, max: 15 });
    }
    Ok(value)
}

/// Validated setter for DevStatusAns.margin: -32..31.
pub fn validate_margin(value: i8) -> Result<i8> {
    if !(-32..=31).contains(&value) {
        return Err(Error::OutOfRange { field: "margin", value: value as i64, min: -32, max: 31 });
    }
    Ok(value)
}

/// Parses a concatenated command stream (FOpts, or an FPort==0 FRMPayload)
/// one command at a time. Unknown CIDs or insufficient trailing bytes stop
/// parsing silently; already-parsed commands are kept.
pub fn parse(data: &[u8], direction: Direction) -> Vec<MacCommand> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let cid = data[pos];
        let length = match lookup(cid, direction) {
            Some(l) => l,
            None => break,
        };
        if pos + 1 + length > data.len() {
            break;
        }
        let body = &data[pos + 1..pos + 1 + length];
        out.push(MacCommand::decode(cid, direction, body));
        pos += 1 + length;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_command_is_dropped() {
        let data = [0x03, 0x70];
        assert_eq!(parse(&data, Direction::Downlink), vec![]);
    }

    #[test]
    fn link_adr_req_decodes_fields() {
        let data = [0x03, 0x70, 0x00, 0xFF, 0x00];
        let cmds = parse(&data, Direction::Downlink);
        assert_eq!(
            cmds,
            vec![MacCommand::LinkAdrReq { dr: 7, tx_power: 0, ch_mask: 0xFF00, ch_mask_cntl: 0, nb_trans: 0 }]
        );
    }

    #[test]
    fn unknown_cid_stops_parsing() {
        let data = [0x02, 0xFF, 0xFF]; // LinkCheckAns(down) needs 2 bytes, trailing 1 byte of garbage ignored next loop anyway
        let cmds = parse(&data, Direction::Downlink);
        assert_eq!(cmds, vec![MacCommand::LinkCheckAns { margin: 0xFF, gw_cnt: 0xFF }]);
    }
}
