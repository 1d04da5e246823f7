//! Output sink.
//!
//! The byte-stream destination relayed payloads are written to.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::info;

use crate::error::{Error, Result};

/// Destination for relayed bytes.
#[async_trait]
pub trait OutputSink: Send {
    /// Write all of `bytes`, in order, before returning.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Serial port sink, framed 8N1 without flow control.
pub struct SerialSink {
    path: String,
    stream: SerialStream,
}

impl SerialSink {
    /// Open `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if the port cannot be opened or configured.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        info!("Opened {} at {} baud (8N1)", path, baud_rate);

        Ok(Self {
            path: path.to_string(),
            stream,
        })
    }
}

impl std::fmt::Debug for SerialSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSink").field("path", &self.path).finish()
    }
}

#[async_trait]
impl OutputSink for SerialSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await.map_err(Error::Sink)?;
        self.stream.flush().await.map_err(Error::Sink)
    }
}

/// In-memory sink recording every write separately.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    writes: Vec<Vec<u8>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write, in order.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// All written bytes concatenated.
    pub fn bytes(&self) -> Vec<u8> {
        self.writes.concat()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writes.push(bytes.to_vec());
        Ok(())
    }
}
