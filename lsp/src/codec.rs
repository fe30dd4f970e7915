//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! [`decode`] is the pure framing step: it consumes every complete frame in a
//! buffer and hands back the unconsumed tail. [`FrameDecoder`] keeps that tail
//! between reads, so a frame split across any number of pipe reads is still
//! decoded exactly once. [`FrameReader`] and [`FrameWriter`] wrap the codec for
//! async streams.

use std::collections::VecDeque;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// A header block larger than this without a blank-line terminator is garbage.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Frames decoded from a buffer plus the bytes that did not yet form a frame.
#[derive(Debug)]
pub struct Decoded<'a> {
    pub messages: Vec<serde_json::Value>,
    /// Unconsumed input. The caller must prepend it to the next chunk.
    pub remainder: &'a [u8],
}

/// Encode a JSON-RPC message as a single frame.
pub fn encode(msg: &serde_json::Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg).context("serializing JSON-RPC frame")?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode every complete frame at the front of `buffer`.
///
/// Stops at the first incomplete frame (missing header terminator or fewer
/// body bytes than announced) and returns it untouched as the remainder.
/// A complete frame whose body is not valid JSON is logged and dropped; the
/// frames after it are still decoded.
///
/// Returns `Err` only when the stream cannot be re-synchronized: a header
/// block without a usable `Content-Length`, or an oversized frame.
pub fn decode(buffer: &[u8]) -> Result<Decoded<'_>> {
    let scan = scan_frames(buffer);
    if let Some(e) = scan.error {
        return Err(e);
    }
    Ok(Decoded {
        messages: scan.messages,
        remainder: &buffer[scan.consumed..],
    })
}

/// Result of one pass over a buffer: the frames before any fatal header
/// and how many bytes they used.
struct Scan {
    messages: Vec<serde_json::Value>,
    consumed: usize,
    error: Option<anyhow::Error>,
}

fn scan_frames(buffer: &[u8]) -> Scan {
    let mut messages = Vec::new();
    let mut consumed = 0;

    let error = loop {
        let rest = &buffer[consumed..];
        let Some(header_end) = find_subslice(rest, HEADER_SEPARATOR) else {
            if rest.len() > MAX_HEADER_BYTES {
                break Some(anyhow!("no header terminator within {MAX_HEADER_BYTES} bytes"));
            }
            break None;
        };

        let content_length = match parse_content_length(&rest[..header_end]) {
            Ok(len) => len,
            Err(e) => break Some(e),
        };
        if content_length > MAX_FRAME_BYTES {
            break Some(anyhow!(
                "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
            ));
        }

        let body_start = header_end + HEADER_SEPARATOR.len();
        let available = rest.len() - body_start;
        if available < content_length {
            // Body still in flight.
            break None;
        }

        let body = &rest[body_start..body_start + content_length];
        match serde_json::from_slice(body) {
            Ok(value) => messages.push(value),
            Err(e) => {
                tracing::warn!(
                    len = content_length,
                    "Discarding frame with malformed JSON body: {e}"
                );
            }
        }
        consumed += body_start + content_length;
    };

    Scan {
        messages,
        consumed,
        error,
    }
}

/// Parse the header block (everything before the blank line).
///
/// Header names are matched case-insensitively; unknown headers such as
/// `Content-Type` are ignored, as are stray blank lines before the block.
fn parse_content_length(block: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(block).context("header block is not UTF-8")?;
    let mut content_length = None;

    for line in text.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once(':')
            && key.trim().eq_ignore_ascii_case("Content-Length")
        {
            let len: usize = value
                .trim()
                .parse()
                .context("invalid Content-Length value")?;
            content_length = Some(len);
        }
    }

    match content_length {
        Some(len) => Ok(len),
        None => bail!("missing Content-Length header"),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Incremental decoder that retains partial frames between feeds.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Fatal header error found behind frames that were already handed out.
    failed: Option<anyhow::Error>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Drain all complete frames, keeping any partial tail buffered.
    ///
    /// Frames that precede a fatal header are still returned; the error is
    /// raised by the next call.
    pub fn next_frames(&mut self) -> Result<Vec<serde_json::Value>> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }

        let Scan {
            messages,
            consumed,
            error,
        } = scan_frames(&self.buffer);
        self.buffer.drain(..consumed);

        match error {
            Some(e) if messages.is_empty() => Err(e),
            Some(e) => {
                self.failed = Some(e);
                Ok(messages)
            }
            None => Ok(messages),
        }
    }

    /// Whether a fatal error is waiting to be raised.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.is_some()
    }

    /// Number of bytes waiting for the rest of their frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Reads JSON-RPC frames from an async reader.
///
/// Reads arbitrary chunks into a [`FrameDecoder`]; frame boundaries never
/// need to line up with read boundaries.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    ready: VecDeque<serde_json::Value>,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES],
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    /// Returns `Err` on EOF inside a frame, malformed headers or oversized frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if self.decoder.has_failed() {
                self.decoder.next_frames()?;
            }

            let n = self
                .reader
                .read(&mut self.chunk)
                .await
                .context("reading from stream")?;

            if n == 0 {
                if self.decoder.buffered() == 0 {
                    return Ok(None);
                }
                bail!(
                    "unexpected EOF with {} bytes of an incomplete frame buffered",
                    self.decoder.buffered()
                );
            }

            self.decoder.feed(&self.chunk[..n]);
            self.ready.extend(self.decoder.next_frames()?);
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
///
/// Serializes JSON and prepends the `Content-Length` header.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame with `Content-Length` header.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let frame = encode(msg)?;
        self.writer
            .write_all(&frame)
            .await
            .context("writing frame")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "result": { "data": [0, 5, 3, 1, 0] }
        })
    }

    #[test]
    fn test_roundtrip() {
        let msg = sample();
        let frame = encode(&msg).unwrap();

        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.messages, vec![msg]);
        assert!(decoded.remainder.is_empty());
    }

    #[test]
    fn test_split_at_every_boundary() {
        let msg = sample();
        let frame = encode(&msg).unwrap();

        for split in 0..=frame.len() {
            let mut decoder = FrameDecoder::new();
            decoder.feed(&frame[..split]);
            let first = decoder.next_frames().unwrap();
            decoder.feed(&frame[split..]);
            let second = decoder.next_frames().unwrap();

            let all: Vec<_> = first.into_iter().chain(second).collect();
            assert_eq!(all, vec![msg.clone()], "split at byte {split}");
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn test_partial_body_returns_input_unchanged() {
        let frame = encode(&sample()).unwrap();
        let partial = &frame[..frame.len() - 1];

        let decoded = decode(partial).unwrap();
        assert!(decoded.messages.is_empty());
        assert_eq!(decoded.remainder, partial);
    }

    #[test]
    fn test_partial_header_returns_input_unchanged() {
        let partial: &[u8] = b"Content-Len";
        let decoded = decode(partial).unwrap();
        assert!(decoded.messages.is_empty());
        assert_eq!(decoded.remainder, partial);
    }

    #[test]
    fn test_multiple_frames_in_one_buffer() {
        let msg1 = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": null});
        let msg2 = serde_json::json!({"jsonrpc": "2.0", "method": "window/logMessage"});
        let mut buf = encode(&msg1).unwrap();
        buf.extend(encode(&msg2).unwrap());
        buf.extend_from_slice(b"Content-Length: 40\r\n\r\n{\"js");

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.messages, vec![msg1, msg2]);
        assert_eq!(decoded.remainder, b"Content-Length: 40\r\n\r\n{\"js");
    }

    #[test]
    fn test_malformed_json_frame_is_skipped() {
        let body = b"not valid json!!!";
        let mut buf = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        buf.extend_from_slice(body);
        let good = serde_json::json!({"jsonrpc": "2.0", "id": 2, "result": {}});
        buf.extend(encode(&good).unwrap());

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.messages, vec![good]);
        assert!(decoded.remainder.is_empty());
    }

    #[test]
    fn test_missing_content_length() {
        let buf: &[u8] = b"Content-Type: application/json\r\n\r\n{}";
        assert!(decode(buf).is_err());
    }

    #[test]
    fn test_invalid_content_length_value() {
        let buf: &[u8] = b"Content-Length: not_a_number\r\n\r\n";
        assert!(decode(buf).is_err());
    }

    #[test]
    fn test_frames_before_bad_header_are_delivered() {
        let good = serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": null});
        let mut decoder = FrameDecoder::new();
        decoder.feed(&encode(&good).unwrap());
        decoder.feed(b"Content-Length: nope\r\n\r\n");

        assert_eq!(decoder.next_frames().unwrap(), vec![good]);
        assert!(decoder.has_failed());
        assert!(decoder.next_frames().is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        assert!(decode(header.as_bytes()).is_err());
    }

    #[test]
    fn test_case_insensitive_content_length_and_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len(),
        );

        let decoded = decode(frame.as_bytes()).unwrap();
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.messages[0]["id"], 1);
    }

    #[test]
    fn test_content_length_is_byte_count() {
        // "é" is 2 bytes in UTF-8, so {"k":"é"} is 10 bytes.
        let msg = serde_json::json!({"k": "é"});
        let frame = encode(&msg).unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.starts_with("Content-Length: 10\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_reader_reassembles_chunked_stream() {
        let msg1 = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"a": 1}});
        let msg2 = serde_json::json!({"jsonrpc": "2.0", "method": "$/progress"});
        let mut bytes = encode(&msg1).unwrap();
        bytes.extend(encode(&msg2).unwrap());

        let (client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for piece in bytes.chunks(3) {
                server.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut reader = FrameReader::new(client);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg1);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg2);
        writer.await.unwrap();
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_delivers_good_frame_then_fails() {
        let good = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "ok"});
        let mut bytes = encode(&good).unwrap();
        bytes.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");

        // The write half stays open: the error must not wait for more input.
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(&bytes).await.unwrap();

        let mut reader = FrameReader::new(client);
        assert_eq!(reader.read_frame().await.unwrap(), Some(good));
        assert!(reader.read_frame().await.is_err());
        drop(server);
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let buf: &[u8] = b"";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_headers_is_error() {
        let buf: &[u8] = b"Content-Length: 10\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_eof_mid_body_is_error() {
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_writer_then_reader() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": { "textDocument": { "uri": "file:///a.h" } }
        });

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg);
    }
}
