//! Newline-delimited JSON framing.
//!
//! Each frame is one JSON document on one line. There is no length prefix
//! and no checksum; blank lines are skipped on read.

use std::io;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[u8] = b"\n\r";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The line arrived intact but did not decode. The stream is still
    /// positioned at the next frame.
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Reads the next non-empty line and decodes it. `Ok(None)` means the peer
/// closed the stream. Lines are taken as raw bytes, so invalid UTF-8 is a
/// decode error rather than a stream error.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let bytes = reader.read_until(b'\n', &mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let end = line
            .iter()
            .rposition(|byte| !LINE_ENDINGS.contains(byte))
            .map_or(0, |last| last + 1);
        if end == 0 {
            continue;
        }

        return Ok(Some(serde_json::from_slice(&line[..end])?));
    }
}

/// Encodes `value` as a single newline-terminated line.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut encoded = serde_json::to_string(value)?;
    encoded.push('\n');
    Ok(encoded)
}

/// Writes an already encoded frame and flushes so peers see it promptly.
pub async fn write_encoded<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(value)?;
    write_encoded(writer, &frame).await?;
    Ok(())
}
