//! Header-delimited framing for the request/response transport.
//!
//! Every frame is `Content-Length: N\r\nSequence: S\r\n\r\n<N bytes>`. The
//! body is an encoded request or response; the sequence number is chosen by
//! the client and echoed by the server so that replies can be matched to the
//! request that caused them.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence,
            body: body.into(),
        }
    }
}

struct Headers {
    content_length: usize,
    sequence: u64,
}

/// Reads frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    /// Returns `Err` on malformed headers or oversized frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(headers) = self.read_headers().await? else {
            return Ok(None);
        };

        if headers.content_length > MAX_FRAME_BYTES {
            bail!(
                "Content-Length {} exceeds maximum {MAX_FRAME_BYTES}",
                headers.content_length
            );
        }

        let mut body = vec![0u8; headers.content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        Ok(Some(Frame {
            sequence: headers.sequence,
            body,
        }))
    }

    /// Parse headers until the empty line separator. A missing `Sequence`
    /// header reads as zero.
    async fn read_headers(&mut self) -> Result<Option<Headers>> {
        let mut content_length: Option<usize> = None;
        let mut sequence = 0;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if bytes_read == 0 {
                // EOF is only clean before the first header byte.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                bail!("unexpected EOF while reading headers");
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                continue;
            };
            if key.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .trim()
                        .parse()
                        .context("invalid Content-Length value")?,
                );
            } else if key.eq_ignore_ascii_case("Sequence") {
                sequence = value.trim().parse().context("invalid Sequence value")?;
            }
        }

        match content_length {
            Some(content_length) => Ok(Some(Headers {
                content_length,
                sequence,
            })),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Writes frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.body.len() > MAX_FRAME_BYTES {
            bail!(
                "frame of {} bytes exceeds maximum {MAX_FRAME_BYTES}",
                frame.body.len()
            );
        }
        let header = format!(
            "Content-Length: {}\r\nSequence: {}\r\n\r\n",
            frame.body.len(),
            frame.sequence
        );

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&frame.body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.context("closing writer")
    }
}
