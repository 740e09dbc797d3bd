//! Connection worker: a single background task per modem that owns the
//! transport, serves an MPSC queue of requests, and keeps the link alive
//! with a PING/PONG heartbeat, reconnecting on failure.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use super::protocol::{self, Frame, FrameReader, Value};
use super::transport::Transport;
use crate::config::ModemConfig;
use crate::error::{Error, Result};

pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const HEARTBEAT_TIMEOUT: Duration = CALL_TIMEOUT;
pub const TCP_TIMEOUT: Duration = Duration::from_secs(9);
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(15);

struct WorkerRequest {
    payload: Vec<u8>,
    respond_to: oneshot::Sender<Result<Value>>,
}

#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
}

impl WorkerHandle {
    pub async fn call(&self, op: &str, fields: BTreeMap<String, Value>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let payload = protocol::encode(&protocol::request(op, fields));
        self.tx
            .send(WorkerRequest { payload, respond_to: tx })
            .await
            .map_err(|_| Error::TransportFailed("worker task is gone".into()))?;
        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::TransportFailed("worker dropped the response".into())),
            Err(_) => Err(Error::Timeout),
        }
    }
}

pub fn spawn(config: ModemConfig) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(run(config, rx));
    WorkerHandle { tx }
}

/// A handle whose queue is never drained, for tests that only exercise
/// argument validation and never expect the request to actually be sent.
#[cfg(test)]
pub(crate) fn unconnected() -> WorkerHandle {
    let (tx, rx) = mpsc::channel(1);
    std::mem::forget(rx);
    WorkerHandle { tx }
}

async fn run(config: ModemConfig, mut rx: mpsc::Receiver<WorkerRequest>) {
    loop {
        let transport = match Transport::connect(&config).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "modem connect failed, retrying");
                sleep(CONNECT_RETRY_DELAY).await;
                continue;
            }
        };
        tracing::info!("modem connected");
        match run_connection(transport, &mut rx).await {
            Ok(()) => {
                tracing::info!("modem worker shutting down: request channel closed");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "modem connection lost, reconnecting");
                sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

async fn run_connection(mut transport: Transport, rx: &mut mpsc::Receiver<WorkerRequest>) -> Result<()> {
    let mut reader = FrameReader::new();
    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { return Ok(()) };
                let framed = protocol::frame(&request.payload);
                transport.write_all(&framed).await?;
                let outcome = read_one_frame(&mut transport, &mut reader, CALL_TIMEOUT).await;
                let result = match outcome {
                    Ok(Frame::Payload(bytes)) => protocol::decode(&bytes).and_then(interpret_response),
                    Ok(Frame::Ping) | Ok(Frame::Pong) => {
                        Err(Error::InvalidEncoding("heartbeat received in place of a response".into()))
                    }
                    Err(e) => Err(e),
                };
                let is_transport_error = matches!(result, Err(Error::TransportFailed(_)) | Err(Error::Timeout));
                let _ = request.respond_to.send(result);
                if is_transport_error {
                    return Err(Error::TransportFailed("request failed, forcing reconnect".into()));
                }
            }
            _ = sleep(HEARTBEAT_INTERVAL) => {
                transport.write_all(&protocol::PING).await?;
                match read_one_frame(&mut transport, &mut reader, HEARTBEAT_TIMEOUT).await {
                    Ok(Frame::Pong) => {}
                    Ok(_) => return Err(Error::TransportFailed("expected PONG".into())),
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

async fn read_one_frame(transport: &mut Transport, reader: &mut FrameReader, timeout: Duration) -> Result<Frame> {
    let fut = async {
        let mut buf = [0u8; 512];
        loop {
            let n = transport.read(&mut buf).await?;
            let frames = reader.feed(&buf[..n])?;
            if let Some(frame) = frames.into_iter().next() {
                return Ok(frame);
            }
        }
    };
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

/// Interprets `{ "<op>": {...}, "status": {"code", "message"} }` or a hard
/// `{"error": {"message": ...}}` failure.
fn interpret_response(value: Value) -> Result<Value> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidEncoding("response is not an object".into()))?;

    if let Some(err) = obj.get("error") {
        let message = err
            .as_object()
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(Error::RemoteError { code: -1, message });
    }

    if let Some(status) = obj.get("status").and_then(|s| s.as_object()) {
        let code = status.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        if code != 0 {
            let message = status.get("message").and_then(|m| m.as_str()).unwrap_or("").to_string();
            return Err(Error::RemoteError { code, message });
        }
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpret_response_surfaces_remote_error() {
        let mut status = BTreeMap::new();
        status.insert("code".to_string(), Value::Int(7));
        status.insert("message".to_string(), Value::Str("bad arg".to_string()));
        let mut top = BTreeMap::new();
        top.insert("status".to_string(), Value::Object(status));
        let result = interpret_response(Value::Object(top));
        assert!(matches!(result, Err(Error::RemoteError { code: 7, .. })));
    }

    #[test]
    fn interpret_response_passes_success() {
        let mut status = BTreeMap::new();
        status.insert("code".to_string(), Value::Int(0));
        let mut top = BTreeMap::new();
        top.insert("status".to_string(), Value::Object(status));
        let result = interpret_response(Value::Object(top.clone()));
        assert_eq!(result.unwrap(), Value::Object(top));
    }
}
