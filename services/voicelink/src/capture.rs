//! Capture device backed by a file or stdin.
//!
//! Reads raw encoded audio in fixed-size chunks and hands each chunk to a
//! callback, pacing reads so a recording streams at roughly real time.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    Stdin,
    File(PathBuf),
}

impl FromStr for CaptureSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "-" => CaptureSource::Stdin,
            path => CaptureSource::File(PathBuf::from(path)),
        })
    }
}

pub struct FileCapture {
    source: CaptureSource,
    chunk_bytes: usize,
    pace: Duration,
}

impl FileCapture {
    pub fn new(source: CaptureSource, chunk_bytes: usize, pace: Duration) -> Self {
        Self {
            source,
            chunk_bytes: chunk_bytes.max(1),
            pace,
        }
    }

    /// Streams the source to `on_chunk` until end of input. Returns the
    /// number of chunks delivered.
    pub async fn run(self, mut on_chunk: impl FnMut(Vec<u8>) + Send) -> Result<usize> {
        let mut reader: Box<dyn AsyncRead + Unpin + Send> = match &self.source {
            CaptureSource::Stdin => Box::new(tokio::io::stdin()),
            CaptureSource::File(path) => Box::new(
                tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open capture file: {}", path.display()))?,
            ),
        };

        let mut ticker = interval(self.pace);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered = 0;

        loop {
            ticker.tick().await;
            let chunk = read_chunk(&mut reader, self.chunk_bytes)
                .await
                .context("Failed to read capture source")?;
            if chunk.is_empty() {
                break;
            }
            on_chunk(chunk);
            delivered += 1;
        }

        tracing::info!(chunks = delivered, "capture source exhausted");
        Ok(delivered)
    }
}

/// Fills up to `size` bytes. A short chunk only happens at end of input.
async fn read_chunk(reader: &mut (dyn AsyncRead + Unpin + Send), size: usize) -> std::io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}
