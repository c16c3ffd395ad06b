//! Serial implementation of the link transport.

use super::{Command, LinkTransport};
use crate::error::{AppResult, ImcError};
use crate::logging::ControlLog;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Async serial port I/O.
///
/// `tokio_serial::SerialStream` on hardware, `tokio_test::io::Mock` or
/// `tokio::io::DuplexStream` in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {
    /// Discard whatever the OS driver still queues in both directions.
    ///
    /// Ports without a driver queue have nothing to discard.
    fn clear_buffers(&self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "tokio_serial")]
impl SerialPortIO for tokio_serial::SerialStream {
    fn clear_buffers(&self) -> std::io::Result<()> {
        use tokio_serial::SerialPort;
        self.clear(tokio_serial::ClearBuffer::All)
            .map_err(std::io::Error::from)
    }
}

impl SerialPortIO for tokio::io::DuplexStream {}

#[cfg(test)]
impl SerialPortIO for tokio_test::io::Mock {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Opens a fresh port session on demand.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open the port. The session ends when the returned port is dropped.
    async fn open(&self) -> AppResult<DynSerial>;

    /// Human-readable port description for logs.
    fn describe(&self) -> String;
}

/// Opens a physical serial port at a fixed baud rate, 8N1, no flow control.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    path: String,
    baud_rate: u32,
}

impl SerialPortOpener {
    /// Create an opener for `path` at `baud_rate`.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl PortOpener for SerialPortOpener {
    async fn open(&self) -> AppResult<DynSerial> {
        open_native(&self.path, self.baud_rate).await
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}

#[cfg(feature = "tokio_serial")]
async fn open_native(path: &str, baud_rate: u32) -> AppResult<DynSerial> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path = path.to_string();

    // Opening blocks on some platforms; keep it off the async workers
    let port = spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ImcError::SerialOpen {
                port: path.clone(),
                message: e.to_string(),
            })
    })
    .await
    .map_err(|e| ImcError::Transport(format!("serial open task failed: {}", e)))??;

    Ok(Box::new(port))
}

#[cfg(not(feature = "tokio_serial"))]
async fn open_native(_path: &str, _baud_rate: u32) -> AppResult<DynSerial> {
    Err(ImcError::SerialFeatureDisabled)
}

/// Link transport that opens a new port session for every exchange and every read.
pub struct SerialLink<O = SerialPortOpener> {
    opener: O,
    read_timeout: Duration,
    drain_window: Duration,
    log: ControlLog,
}

impl<O: PortOpener> SerialLink<O> {
    /// Create a link.
    ///
    /// * `read_timeout` bounds each telemetry read
    /// * `drain_window` is how long an exchange waits for each pending response line
    pub fn new(opener: O, read_timeout: Duration, drain_window: Duration, log: ControlLog) -> Self {
        Self {
            opener,
            read_timeout,
            drain_window,
            log,
        }
    }

    /// The port opener.
    pub fn opener(&self) -> &O {
        &self.opener
    }
}

/// Read up to and including `\n`, keeping whatever arrived if `limit` expires first.
async fn read_line_within<R>(port: &mut BufReader<R>, limit: Duration) -> AppResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    match tokio::time::timeout(limit, port.read_until(b'\n', &mut buf)).await {
        Ok(Ok(_)) => Ok(Some(buf)),
        Ok(Err(e)) => Err(e.into()),
        // read_until keeps partial bytes in `buf` on cancellation
        Err(_) if buf.is_empty() => Ok(None),
        Err(_) => Ok(Some(buf)),
    }
}

fn decode(bytes: Vec<u8>) -> AppResult<String> {
    String::from_utf8(bytes)
        .map_err(|e| ImcError::Transport(format!("response is not valid UTF-8: {}", e)))
}

#[async_trait]
impl<O: PortOpener> LinkTransport for SerialLink<O> {
    async fn exchange(&self, command: &Command) -> AppResult<()> {
        self.log.pending(format!("TX: {}", command));

        let mut port = BufReader::new(self.opener.open().await?);
        port.get_mut().write_all(command.wire().as_bytes()).await?;
        port.get_mut().flush().await?;

        // Drain whatever the device answers right away. The content is logged only.
        loop {
            match read_line_within(&mut port, self.drain_window).await? {
                Some(bytes) if !bytes.is_empty() => {
                    let ack = decode(bytes)?;
                    self.log.pending(format!("RX: {}", ack.trim_end()));
                }
                _ => break,
            }
        }

        let stale = port.buffer().len();
        port.consume(stale);
        port.get_mut().flush().await?;
        port.get_ref().clear_buffers()?;
        Ok(())
    }

    async fn read_line(&self) -> AppResult<String> {
        let mut port = BufReader::new(self.opener.open().await?);
        match read_line_within(&mut port, self.read_timeout).await? {
            Some(bytes) => decode(bytes),
            None => {
                tracing::trace!(port = %self.opener.describe(), "read timed out");
                Ok(String::new())
            }
        }
    }
}
