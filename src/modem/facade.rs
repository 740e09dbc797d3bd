//! Typed operations over the modem wire protocol. Each method validates its
//! arguments locally before ever talking to the worker task.

use std::collections::BTreeMap;

use super::protocol::Value;
use super::worker::WorkerHandle;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraChannel {
    pub frequency: u64,
    pub bandwidth: u16,
    pub spreadingfactor: u8,
    pub syncword: u8,
    pub codingrate: u8,
    pub invertiqtx: bool,
    pub invertiqrx: bool,
    pub explicitheader: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelChange {
    pub frequency: Option<u64>,
    pub bandwidth: Option<u16>,
    pub spreadingfactor: Option<u8>,
    pub syncword: Option<u8>,
    pub codingrate: Option<u8>,
    pub invertiqtx: Option<bool>,
    pub invertiqrx: Option<bool>,
    pub explicitheader: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub payload: Vec<u8>,
    pub time_valid_header: u64,
    pub time_rxdone: u64,
    pub rssi: i32,
    pub snr: f64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnifferAction {
    None,
    Internal,
    Gpio,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JammerTrigger {
    Gpio,
    Udp,
}

pub struct ModemFacade {
    worker: WorkerHandle,
}

fn int_field(obj: &BTreeMap<String, Value>, key: &str) -> Result<i64> {
    obj.get(key)
        .and_then(|v| v.as_i64())
        .ok_or(Error::InvalidEncoding(format!("missing or non-integer field {key}")))
}

fn bool_field(obj: &BTreeMap<String, Value>, key: &str) -> Result<bool> {
    obj.get(key)
        .and_then(|v| v.as_bool())
        .ok_or(Error::InvalidEncoding(format!("missing or non-bool field {key}")))
}

fn response_fields(value: &Value, op: &str) -> Result<BTreeMap<String, Value>> {
    value
        .as_object()
        .and_then(|o| o.get(op))
        .and_then(|v| v.as_object())
        .cloned()
        .ok_or_else(|| Error::InvalidEncoding(format!("response missing {op} field")))
}

fn channel_from_fields(obj: &BTreeMap<String, Value>) -> Result<LoraChannel> {
    Ok(LoraChannel {
        frequency: int_field(obj, "frequency")? as u64,
        bandwidth: int_field(obj, "bandwidth")? as u16,
        spreadingfactor: int_field(obj, "spreadingfactor")? as u8,
        syncword: int_field(obj, "syncword")? as u8,
        codingrate: int_field(obj, "codingrate")? as u8,
        invertiqtx: bool_field(obj, "invertiqtx")?,
        invertiqrx: bool_field(obj, "invertiqrx")?,
        explicitheader: bool_field(obj, "explicitheader")?,
    })
}

impl ModemFacade {
    pub fn new(worker: WorkerHandle) -> Self {
        ModemFacade { worker }
    }

    pub async fn get_lora_channel(&self) -> Result<LoraChannel> {
        let resp = self.worker.call("get_lora_channel", BTreeMap::new()).await?;
        channel_from_fields(&response_fields(&resp, "get_lora_channel")?)
    }

    pub async fn set_lora_channel(&self, change: &ChannelChange) -> Result<LoraChannel> {
        if let Some(freq) = change.frequency {
            if !(860_000_000..920_000_000).contains(&freq) {
                return Err(Error::OutOfRange {
                    field: "frequency",
                    value: freq as i64,
                    min: 860_000_000,
                    max: 919_999_999,
                });
            }
        }
        if let Some(bw) = change.bandwidth {
            if ![125, 250, 500].contains(&bw) {
                return Err(Error::OutOfRange { field: "bandwidth", value: bw as i64, min: 125, max: 500 });
            }
        }
        if let Some(sf) = change.spreadingfactor {
            if !(6..=12).contains(&sf) {
                return Err(Error::OutOfRange { field: "spreadingfactor", value: sf as i64, min: 6, max: 12 });
            }
        }
        if let Some(cr) = change.codingrate {
            if !(5..=8).contains(&cr) {
                return Err(Error::OutOfRange { field: "codingrate", value: cr as i64, min: 5, max: 8 });
            }
        }

        let mut fields = BTreeMap::new();
        if let Some(v) = change.frequency {
            fields.insert("frequency".into(), Value::Int(v as i64));
        }
        if let Some(v) = change.bandwidth {
            fields.insert("bandwidth".into(), Value::Int(v as i64));
        }
        if let Some(v) = change.spreadingfactor {
            fields.insert("spreadingfactor".into(), Value::Int(v as i64));
        }
        if let Some(v) = change.syncword {
            fields.insert("syncword".into(), Value::Int(v as i64));
        }
        if let Some(v) = change.codingrate {
            fields.insert("codingrate".into(), Value::Int(v as i64));
        }
        if let Some(v) = change.invertiqtx {
            fields.insert("invertiqtx".into(), Value::Bool(v));
        }
        if let Some(v) = change.invertiqrx {
            fields.insert("invertiqrx".into(), Value::Bool(v));
        }
        if let Some(v) = change.explicitheader {
            fields.insert("explicitheader".into(), Value::Bool(v));
        }
        let resp = self.worker.call("set_lora_channel", fields).await?;
        channel_from_fields(&response_fields(&resp, "set_lora_channel")?)
    }

    pub async fn set_preamble_length(&self, len: u16) -> Result<u16> {
        let mut fields = BTreeMap::new();
        fields.insert("len".into(), Value::Int(len as i64));
        let resp = self.worker.call("set_preamble_length", fields).await?;
        Ok(int_field(&response_fields(&resp, "set_preamble_length")?, "len")? as u16)
    }

    pub async fn get_preamble_length(&self) -> Result<u16> {
        let resp = self.worker.call("get_preamble_length", BTreeMap::new()).await?;
        Ok(int_field(&response_fields(&resp, "get_preamble_length")?, "len")? as u16)
    }

    pub async fn set_txcrc(&self, enabled: bool) -> Result<bool> {
        let mut fields = BTreeMap::new();
        fields.insert("txcrc".into(), Value::Bool(enabled));
        let resp = self.worker.call("set_txcrc", fields).await?;
        bool_field(&response_fields(&resp, "set_txcrc")?, "txcrc")
    }

    pub async fn get_txcrc(&self) -> Result<bool> {
        let resp = self.worker.call("get_txcrc", BTreeMap::new()).await?;
        bool_field(&response_fields(&resp, "get_txcrc")?, "txcrc")
    }

    pub async fn get_time(&self) -> Result<u64> {
        let resp = self.worker.call("get_time", BTreeMap::new()).await?;
        Ok(int_field(&response_fields(&resp, "get_time")?, "time")? as u64)
    }

    pub async fn receive(&self) -> Result<()> {
        self.worker.call("receive", BTreeMap::new()).await?;
        Ok(())
    }

    pub async fn standby(&self) -> Result<()> {
        self.worker.call("standby", BTreeMap::new()).await?;
        Ok(())
    }

    pub async fn transmit_frame(
        &self,
        payload: &[u8],
        sched_time: Option<u64>,
        blocking: bool,
    ) -> Result<()> {
        if payload.len() > 255 {
            return Err(Error::OutOfRange { field: "payload", value: payload.len() as i64, min: 0, max: 255 });
        }
        if sched_time.is_some() && blocking {
            return Err(Error::InvalidEncoding(
                "sched_time and blocking=true are mutually exclusive".into(),
            ));
        }
        let mut fields = BTreeMap::new();
        fields.insert("payload".into(), Value::Bytes(payload.to_vec()));
        if let Some(t) = sched_time {
            fields.insert("time".into(), Value::Int(t as i64));
        }
        fields.insert("blocking".into(), Value::Bool(blocking));
        self.worker.call("transmit_frame", fields).await?;
        Ok(())
    }

    pub async fn fetch_frame(&self) -> Result<Option<ReceivedFrame>> {
        let resp = self.worker.call("fetch_frame", BTreeMap::new()).await?;
        let fields = response_fields(&resp, "fetch_frame")?;
        if fields.get("payload").map(|v| matches!(v, Value::Null)).unwrap_or(true) {
            return Ok(None);
        }
        let payload = fields
            .get("payload")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| Error::InvalidEncoding("fetch_frame payload not bytes".into()))?
            .to_vec();
        Ok(Some(ReceivedFrame {
            payload,
            time_valid_header: int_field(&fields, "time_valid_header")? as u64,
            time_rxdone: int_field(&fields, "time_rxdone")? as u64,
            rssi: int_field(&fields, "rssi")? as i32,
            snr: fields.get("snr").and_then(|v| match v {
                Value::Float(f) => Some(*f),
                Value::Int(i) => Some(*i as f64),
                _ => None,
            }).ok_or_else(|| Error::InvalidEncoding("fetch_frame missing snr".into()))?,
            has_more: bool_field(&fields, "has_more")?,
        }))
    }

    pub async fn enable_sniffer(
        &self,
        rxbuf: bool,
        mask: &[u8],
        pattern: &[u8],
        action: SnifferAction,
        udp_addr: Option<&str>,
    ) -> Result<()> {
        if mask.len() != pattern.len() {
            return Err(Error::LengthMismatch { expected: mask.len(), actual: pattern.len() });
        }
        let rxbuf = if action == SnifferAction::Internal { false } else { rxbuf };
        let mut fields = BTreeMap::new();
        fields.insert("rxbuf".into(), Value::Bool(rxbuf));
        fields.insert("mask".into(), Value::Bytes(mask.to_vec()));
        fields.insert("pattern".into(), Value::Bytes(pattern.to_vec()));
        let action_code = match action {
            SnifferAction::None => 0,
            SnifferAction::Internal => 1,
            SnifferAction::Gpio => 2,
            SnifferAction::Udp => 3,
        };
        fields.insert("action".into(), Value::Int(action_code));
        if let Some(addr) = udp_addr {
            fields.insert("addr".into(), Value::Str(addr.to_string()));
        }
        self.worker.call("enable_sniffer", fields).await?;
        Ok(())
    }

    pub async fn enable_rc_jammer(&self, trigger: JammerTrigger) -> Result<()> {
        let mut fields = BTreeMap::new();
        let code = match trigger {
            JammerTrigger::Gpio => 2,
            JammerTrigger::Udp => 3,
        };
        fields.insert("trigger".into(), Value::Int(code));
        self.worker.call("enable_rc_jammer", fields).await?;
        Ok(())
    }

    pub async fn set_jammer_payload_length(&self, len: u8) -> Result<()> {
        if len == 0 {
            return Err(Error::OutOfRange { field: "len", value: 0, min: 1, max: 255 });
        }
        let mut fields = BTreeMap::new();
        fields.insert("len".into(), Value::Int(len as i64));
        self.worker.call("set_jammer_plen", fields).await?;
        Ok(())
    }

    pub async fn configure_gain(&self, lna_gain: u8, lna_boost: bool, pwr_out: i32) -> Result<()> {
        if !(1..=6).contains(&lna_gain) {
            return Err(Error::OutOfRange { field: "lna_gain", value: lna_gain as i64, min: 1, max: 6 });
        }
        let mut fields = BTreeMap::new();
        fields.insert("lna_gain".into(), Value::Int(lna_gain as i64));
        fields.insert("lna_boost".into(), Value::Bool(lna_boost));
        fields.insert("pwr_out".into(), Value::Int(pwr_out as i64));
        self.worker.call("configure_gain", fields).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_frequency_out_of_range() {
        let facade = ModemFacade::new(super::super::worker::unconnected());
        let change = ChannelChange { frequency: Some(1_000_000_000), ..Default::default() };
        let result = tokio_test::block_on(facade.set_lora_channel(&change));
        assert!(matches!(result, Err(Error::OutOfRange { field: "frequency", .. })));
    }

    #[test]
    fn rejects_mismatched_sniffer_lengths() {
        let facade = ModemFacade::new(super::super::worker::unconnected());
        let result = tokio_test::block_on(facade.enable_sniffer(true, &[0, 1], &[0], SnifferAction::Gpio, None));
        assert!(matches!(result, Err(Error::LengthMismatch { .. })));
    }
}
