//! Per-node task plumbing shared by every wormhole strategy: the node's
//! event queue, its lifecycle state, and the generic base loops spec'd for
//! a plain forwarding wormhole.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ChannelConfig;
use crate::modem::facade::{ChannelChange, ModemFacade};
use crate::error::Result;

/// Base events every node understands. Strategies extend this with their
/// own variants via `Strategy(E)`.
pub enum NodeEvent<E> {
    Transmit(Vec<u8>),
    Stop,
    Strategy(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl From<u8> for NodeState {
    fn from(v: u8) -> Self {
        match v {
            1 => NodeState::Starting,
            2 => NodeState::Running,
            3 => NodeState::Stopping,
            4 => NodeState::Stopped,
            _ => NodeState::Idle,
        }
    }
}

/// A running node's control handle: its event queue and the task driving
/// it. Dropping this without sending `Stop` first leaves the task running
/// until the modem-side loop errors out on its own.
pub struct NodeHandle<E> {
    pub name: String,
    tx: mpsc::Sender<NodeEvent<E>>,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl<E> NodeHandle<E> {
    pub fn spawn<F, Fut>(name: String, run: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<NodeEvent<E>>, Arc<AtomicU8>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(32);
        let state = Arc::new(AtomicU8::new(NodeState::Starting as u8));
        let task = tokio::spawn(run(rx, state.clone()));
        NodeHandle { name, tx, state, task }
    }

    /// Builds a handle around a task spawned separately, for strategies
    /// that need the event sender wired into sibling nodes' tasks before
    /// the receiving task itself starts.
    pub(crate) fn from_parts(
        name: String,
        tx: mpsc::Sender<NodeEvent<E>>,
        state: Arc<AtomicU8>,
        task: JoinHandle<()>,
    ) -> Self {
        NodeHandle { name, tx, state, task }
    }

    pub fn state(&self) -> NodeState {
        NodeState::from(self.state.load(Ordering::Acquire))
    }

    pub async fn send(&self, event: NodeEvent<E>) {
        if self.tx.send(event).await.is_err() {
            tracing::warn!(node = %self.name, "event dropped, node task already gone");
        }
    }

    /// Sends `Stop` and waits for the task to actually exit, bounded so a
    /// hung modem RPC can't wedge `down()` forever.
    pub async fn stop_and_join(self, timeout: Duration) {
        let _ = self.tx.send(NodeEvent::Stop).await;
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            tracing::warn!(node = %self.name, "node task did not exit within the shutdown timeout");
        }
    }
}

pub fn set_state(state: &Arc<AtomicU8>, new: NodeState) {
    state.store(new as u8, Ordering::Release);
}

/// Pushes the full channel configuration used by every strategy's initial
/// `set_lora_channel` call. `invertiqtx` is always forced to `!invertiqrx`
/// on the entry side, matching LoRaWAN's up/downlink polarity convention.
pub async fn apply_channel(modem: &ModemFacade, channel: &ChannelConfig, invertiqtx: bool) -> Result<()> {
    let change = ChannelChange {
        frequency: Some(channel.frequency),
        bandwidth: Some(channel.bandwidth),
        spreadingfactor: Some(channel.spreadingfactor),
        codingrate: Some(channel.codingrate),
        syncword: Some(channel.syncword),
        invertiqrx: Some(channel.invertiqrx),
        invertiqtx: Some(invertiqtx),
        explicitheader: Some(true),
    };
    modem.set_lora_channel(&change).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_reaches_running_and_stops() {
        let handle = NodeHandle::<()>::spawn("n1".to_string(), |mut rx, state| async move {
            set_state(&state, NodeState::Running);
            while let Some(event) = rx.recv().await {
                if matches!(event, NodeEvent::Stop) {
                    break;
                }
            }
            set_state(&state, NodeState::Stopped);
        });
        // give the task a chance to reach Running before we stop it
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), NodeState::Running);
        handle.stop_and_join(Duration::from_secs(1)).await;
    }
}
