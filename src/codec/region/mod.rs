//! Per-region data-rate, RX1-offset, TX-power and beacon-geometry tables.
//!
//! Only EU868 is implemented; the trait is the seam other regions would
//! plug into.

pub mod eu868;

/// A LoRa modulation/parameter pair a data-rate id maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRateParam {
    Lora { spreading_factor: u8, bandwidth_khz: u16 },
    Fsk { bitrate_kbps: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRate {
    pub param: DataRateParam,
    pub max_payload: u16,
    pub max_payload_with_repeater: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconGeometry {
    pub net_common_len: usize,
    pub gw_specific_len: usize,
    pub time_offset: usize,
}

impl BeaconGeometry {
    pub fn gw_specific_offset(&self) -> usize {
        self.net_common_len
    }

    pub fn total_len(&self) -> usize {
        self.net_common_len + self.gw_specific_len
    }
}

pub trait Region {
    /// Data-rate table, indexed by DR id.
    fn data_rate(&self, dr: u8) -> Option<DataRate>;

    /// RX1 downlink DR for a given uplink DR and RX1DROffset.
    fn rx1_dr(&self, uplink_dr: u8, offset: u8) -> Option<u8>;

    /// TX-power bin (0..=0xF, 0xF reserved under 1.1) to EIRP dBm.
    fn tx_power_dbm(&self, bin: u8) -> Option<i16>;

    fn beacon_geometry(&self) -> BeaconGeometry;

    /// RX2 channel: (frequency Hz, data rate id).
    fn rx2_channel(&self) -> (u64, u8);

    /// Default/join channels: (frequency Hz, data rate id) pairs.
    fn default_channels(&self) -> &'static [(u64, u8)];

    /// Decodes a 16-byte CFList into additional channel frequencies.
    fn parse_cf_list(&self, raw: &[u8; 16]) -> Vec<u64>;
}
