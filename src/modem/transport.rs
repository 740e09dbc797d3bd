//! The three transports a modem connection can run over: TCP, UART, and a
//! local pseudo-terminal bridging to a spawned `lora_controller` child
//! process.

use std::os::unix::io::FromRawFd;
use std::time::Duration;

use nix::pty::openpty;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_serial::SerialPortBuilderExt;

use crate::config::ModemConfig;
use crate::error::{Error, Result};

pub const UART_BAUD: u32 = 115_200;
pub const UART_TIMEOUT: Duration = Duration::from_millis(100);

pub enum Transport {
    Tcp(TcpStream),
    Uart(tokio_serial::SerialStream),
    Pty { file: tokio::fs::File, child: Child },
}

impl Transport {
    pub async fn connect(config: &ModemConfig) -> Result<Self> {
        match config.conntype {
            crate::config::ConnType::Tcp => {
                let host = config.host.as_deref().ok_or(Error::MissingKey("host"))?;
                let port = config.port.ok_or(Error::MissingKey("port"))?;
                let stream = TcpStream::connect((host, port))
                    .await
                    .map_err(|e| Error::TransportFailed(e.to_string()))?;
                Ok(Transport::Tcp(stream))
            }
            crate::config::ConnType::Uart => {
                let dev = config.dev.as_deref().ok_or(Error::MissingKey("dev"))?;
                let stream = tokio_serial::new(dev, UART_BAUD)
                    .timeout(UART_TIMEOUT)
                    .open_native_async()
                    .map_err(|e| Error::TransportFailed(e.to_string()))?;
                Ok(Transport::Uart(stream))
            }
            crate::config::ConnType::Pty => {
                let pty = openpty(None, None).map_err(|e| Error::TransportFailed(e.to_string()))?;
                let startscript = config
                    .startscript
                    .as_deref()
                    .unwrap_or("lora_controller");
                let slave_path = format!("/proc/self/fd/{}", pty.slave);
                let child = Command::new(startscript)
                    .arg("--tty")
                    .arg(&slave_path)
                    .arg("--module")
                    .arg(config.module_name.as_deref().unwrap_or("default"))
                    .spawn()
                    .map_err(|e| Error::TransportFailed(e.to_string()))?;
                // Safety: `master` is a freshly allocated PTY master fd we own
                // exclusively; wrapping it in a `File` transfers ownership.
                let std_file = unsafe { std::fs::File::from_raw_fd(pty.master) };
                let file = tokio::fs::File::from_std(std_file);
                Ok(Transport::Pty { file, child })
            }
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Transport::Tcp(s) => s.read(buf).await,
            Transport::Uart(s) => s.read(buf).await,
            Transport::Pty { file, .. } => file.read(buf).await,
        }
        .map_err(|e| Error::TransportFailed(e.to_string()))?;
        if n == 0 {
            return Err(Error::TransportFailed("connection closed".into()));
        }
        Ok(n)
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let res = match self {
            Transport::Tcp(s) => s.write_all(data).await,
            Transport::Uart(s) => s.write_all(data).await,
            Transport::Pty { file, .. } => file.write_all(data).await,
        };
        res.map_err(|e| Error::TransportFailed(e.to_string()))
    }
}

/// Usable as a generic `AsyncRead + AsyncWrite` where the caller doesn't
/// need to branch on the concrete transport.
impl AsyncRead for Transport {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match this {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            Transport::Uart(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            Transport::Pty { file, .. } => std::pin::Pin::new(file).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match this {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            Transport::Uart(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            Transport::Pty { file, .. } => std::pin::Pin::new(file).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match this {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_flush(cx),
            Transport::Uart(s) => std::pin::Pin::new(s).poll_flush(cx),
            Transport::Pty { file, .. } => std::pin::Pin::new(file).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match this {
            Transport::Tcp(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            Transport::Uart(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            Transport::Pty { file, .. } => std::pin::Pin::new(file).poll_shutdown(cx),
        }
    }
}
