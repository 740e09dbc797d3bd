//! EU868 region plan.

use super::{BeaconGeometry, DataRate, DataRateParam, Region};

pub struct Eu868;

const DATA_RATES: [DataRate; 8] = [
    DataRate { param: DataRateParam::Lora { spreading_factor: 12, bandwidth_khz: 125 }, max_payload: 51, max_payload_with_repeater: 59 },
    DataRate { param: DataRateParam::Lora { spreading_factor: 11, bandwidth_khz: 125 }, max_payload: 51, max_payload_with_repeater: 59 },
    DataRate { param: DataRateParam::Lora { spreading_factor: 10, bandwidth_khz: 125 }, max_payload: 51, max_payload_with_repeater: 59 },
    DataRate { param: DataRateParam::Lora { spreading_factor: 9, bandwidth_khz: 125 }, max_payload: 115, max_payload_with_repeater: 123 },
    DataRate { param: DataRateParam::Lora { spreading_factor: 8, bandwidth_khz: 125 }, max_payload: 242, max_payload_with_repeater: 230 },
    DataRate { param: DataRateParam::Lora { spreading_factor: 7, bandwidth_khz: 125 }, max_payload: 242, max_payload_with_repeater: 250 },
    DataRate { param: DataRateParam::Lora { spreading_factor: 7, bandwidth_khz: 250 }, max_payload: 242, max_payload_with_repeater: 250 },
    DataRate { param: DataRateParam::Fsk { bitrate_kbps: 50 }, max_payload: 242, max_payload_with_repeater: 250 },
];

const DEFAULT_CHANNELS: [(u64, u8); 3] = [
    (868_100_000, 5),
    (868_300_000, 5),
    (868_500_000, 5),
];

/// TX-power bin k -> 16 - 2k dBm, k in 0..=7; 0xF reserved under 1.1.
pub fn tx_power_dbm(bin: u8) -> Option<i16> {
    if bin == 0xF {
        return None;
    }
    if bin > 7 {
        return None;
    }
    Some(16 - 2 * bin as i16)
}

impl Region for Eu868 {
    fn data_rate(&self, dr: u8) -> Option<DataRate> {
        DATA_RATES.get(dr as usize).copied()
    }

    fn rx1_dr(&self, uplink_dr: u8, offset: u8) -> Option<u8> {
        if uplink_dr > 5 || offset > 5 {
            return None;
        }
        Some(uplink_dr.saturating_sub(offset))
    }

    fn tx_power_dbm(&self, bin: u8) -> Option<i16> {
        tx_power_dbm(bin)
    }

    fn beacon_geometry(&self) -> BeaconGeometry {
        BeaconGeometry {
            net_common_len: 8,
            gw_specific_len: 9,
            time_offset: 2,
        }
    }

    fn rx2_channel(&self) -> (u64, u8) {
        (869_525_000, 0)
    }

    fn default_channels(&self) -> &'static [(u64, u8)] {
        &DEFAULT_CHANNELS
    }

    fn parse_cf_list(&self, raw: &[u8; 16]) -> Vec<u64> {
        // 5 channels of 3 LE bytes each, starting at index 3, usable on DR0..DR5.
        (0..5)
            .map(|i| {
                let off = i * 3;
                let freq = u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], 0]) as u64;
                freq * 100
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_power_table() {
        assert_eq!(tx_power_dbm(0), Some(16));
        assert_eq!(tx_power_dbm(7), Some(2));
        assert_eq!(tx_power_dbm(0xF), None);
    }

    #[test]
    fn rx1_offset_clamped_at_zero() {
        let region = Eu868;
        assert_eq!(region.rx1_dr(2, 5), Some(0));
        assert_eq!(region.rx1_dr(5, 1), Some(4));
    }

    #[test]
    fn beacon_geometry_matches_eu868() {
        let geo = Eu868.beacon_geometry();
        assert_eq!(geo.net_common_len, 8);
        assert_eq!(geo.gw_specific_len, 9);
        assert_eq!(geo.total_len(), 17);
    }
}
