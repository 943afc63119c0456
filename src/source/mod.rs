//! Line sources
//!
//! A source yields decoded text lines from a device. Serial ports are read as
//! character devices (configure baud rate etc. with `stty` or udev); files,
//! FIFOs and stdin work the same way.

mod detect;

pub use detect::*;

use crate::config::IngestConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, trace};

/// Path that selects stdin instead of a file
pub const STDIN_PATH: &str = "-";

/// A producer of decoded telemetry lines
#[async_trait]
pub trait LineSource: Send {
    /// Name used in logs and reports (e.g. the port name)
    fn name(&self) -> &str;

    /// Next line, or `None` when nothing arrived within one polling interval
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// True once a finite source is exhausted
    fn is_closed(&self) -> bool;
}

/// Boxed reader used for sources opened from a path
pub type DynReader = Pin<Box<dyn AsyncRead + Send>>;

/// Line source over any async byte reader
pub struct ReaderLineSource<R> {
    name: String,
    reader: BufReader<R>,
    // partial line kept across timed-out polls
    buf: Vec<u8>,
    read_timeout: Duration,
    skip_markers: Vec<String>,
    closed: bool,
}

impl<R: AsyncRead + Unpin + Send> ReaderLineSource<R> {
    pub fn new(name: impl Into<String>, reader: R, config: &IngestConfig) -> Self {
        Self {
            name: name.into(),
            reader: BufReader::new(reader),
            buf: Vec::new(),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            skip_markers: config.skip_markers.clone(),
            closed: false,
        }
    }

    fn is_service_line(&self, line: &str) -> bool {
        self.skip_markers.iter().any(|m| !m.is_empty() && line.contains(m.as_str()))
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        line
    }
}

impl ReaderLineSource<DynReader> {
    /// Open a device node, FIFO or file; `-` reads stdin
    pub async fn open(name: impl Into<String>, path: &Path, config: &IngestConfig) -> Result<Self> {
        let reader: DynReader = if path == Path::new(STDIN_PATH) {
            Box::pin(tokio::io::stdin())
        } else {
            Box::pin(tokio::fs::File::open(path).await?)
        };
        debug!("Opened line source {:?}", path);
        Ok(Self::new(name, reader, config))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LineSource for ReaderLineSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.closed {
                return Ok(None);
            }

            // read_until appends to `buf`, so a timeout never loses bytes
            let read = tokio::time::timeout(
                self.read_timeout,
                self.reader.read_until(b'\n', &mut self.buf),
            )
            .await;

            match read {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(0)) => {
                    self.closed = true;
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                }
                Ok(Ok(_)) => {}
            }

            let line = self.take_line();
            if line.is_empty() {
                continue;
            }
            if self.is_service_line(&line) {
                trace!(source = %self.name, "Dropping service line: {}", line);
                continue;
            }
            return Ok(Some(line));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn config() -> IngestConfig {
        IngestConfig {
            read_timeout_ms: 50,
            ..IngestConfig::default()
        }
    }

    #[tokio::test]
    async fn test_reads_lines_and_drops_service_lines() {
        let data: &[u8] = b"HANDSHAKE\r\nSensor:a;T:1\r\n\r\nARDUINO_READY\nSensor:b;T:2";
        let mut source = ReaderLineSource::new("mem", data, &config());

        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("Sensor:a;T:1"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("Sensor:b;T:2"));
        assert_eq!(source.next_line().await.unwrap(), None);
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_utf8_replaced() {
        let data: &[u8] = b"Sensor:a;S:\xff\xfeok\n";
        let mut source = ReaderLineSource::new("mem", data, &config());
        let line = source.next_line().await.unwrap().unwrap();
        assert!(line.starts_with("Sensor:a;S:"));
        assert!(line.ends_with("ok"));
        assert!(line.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_line() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut source = ReaderLineSource::new("pipe", reader, &config());

        writer.write_all(b"Sensor:a;").await.unwrap();
        assert_eq!(source.next_line().await.unwrap(), None);
        assert!(!source.is_closed());

        writer.write_all(b"T:1\n").await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("Sensor:a;T:1"));

        drop(writer);
        assert_eq!(source.next_line().await.unwrap(), None);
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_open_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("capture.log");
        std::fs::write(&path, "Sensor:x;V:1\n").unwrap();

        let mut source = ReaderLineSource::open("capture", &path, &config()).await.unwrap();
        assert_eq!(source.name(), "capture");
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("Sensor:x;V:1"));
    }
}
