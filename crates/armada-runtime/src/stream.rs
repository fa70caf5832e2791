//! Readers for the runtime's streaming responses.

use crate::RuntimeError;
use serde::Deserialize;
use std::io::{self, BufRead, BufReader, Read};

const HEADER_LEN: usize = 8;

/// Demultiplexes the attach/logs framing: an 8-byte header (stream type,
/// three zero bytes, big-endian payload length) before each payload.
///
/// Streams of TTY containers carry no framing; when the first byte is not a
/// known stream type the input is passed through untouched.
pub struct FrameReader<R> {
    inner: R,
    remaining: usize,
    raw: Option<bool>,
    pending: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            raw: None,
            pending: Vec::new(),
        }
    }

    /// Fill `buf` completely, or return the number of bytes read before EOF.
    fn read_header(&mut self, buf: &mut [u8; HEADER_LEN]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.pending.is_empty() {
            let n = self.pending.len().min(out.len());
            out[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        if self.raw == Some(true) {
            return self.inner.read(out);
        }

        while self.remaining == 0 {
            let mut header = [0u8; HEADER_LEN];
            let filled = self.read_header(&mut header)?;
            if filled == 0 {
                return Ok(0);
            }
            let framed = filled == HEADER_LEN && header[0] <= 2 && header[1..4] == [0, 0, 0];
            if self.raw.is_none() && !framed {
                self.raw = Some(true);
                self.pending.extend_from_slice(&header[..filled]);
                return self.read(out);
            }
            if !framed {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "truncated stream frame header",
                ));
            }
            self.raw = Some(false);
            self.remaining =
                u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        }

        let want = self.remaining.min(out.len());
        let n = self.inner.read(&mut out[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a frame",
            ));
        }
        self.remaining -= n;
        Ok(n)
    }
}

/// Lines of a byte stream, decoded lossily, without line terminators.
pub struct StreamLines<R> {
    reader: BufReader<R>,
}

impl<R: Read> StreamLines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }
}

impl<R: Read> Iterator for StreamLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// One line of a pull, push or build progress stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProgressMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    /// Build output.
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub aux: Option<serde_json::Value>,
}

impl ProgressMessage {
    /// Human-readable text of this message, if any.
    pub fn text(&self) -> Option<String> {
        if let Some(stream) = &self.stream {
            let trimmed = stream.trim_end();
            return (!trimmed.is_empty()).then(|| trimmed.to_owned());
        }
        let status = self.status.as_deref()?;
        Some(match (&self.id, &self.progress) {
            (Some(id), Some(progress)) => format!("{id}: {status} {progress}"),
            (Some(id), None) => format!("{id}: {status}"),
            _ => status.to_owned(),
        })
    }

    /// Image id announced in an `aux` record (build results).
    pub fn aux_id(&self) -> Option<&str> {
        self.aux.as_ref()?.get("ID")?.as_str()
    }
}

/// Read a progress stream to the end, passing every message to `on_message`.
///
/// A message with an `error` key fails the operation. Returns the last image
/// id announced by an `aux` record.
pub fn drain_progress(
    stream: impl Read,
    operation: &str,
    mut on_message: impl FnMut(&ProgressMessage),
) -> Result<Option<String>, RuntimeError> {
    let mut announced = None;
    for line in StreamLines::new(stream) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let message: ProgressMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                tracing::trace!("{operation}: skipping non-JSON progress line: {e}");
                continue;
            }
        };
        if let Some(error) = message.error {
            return Err(RuntimeError::Stream {
                operation: operation.to_owned(),
                message: error,
            });
        }
        if let Some(id) = message.aux_id() {
            announced = Some(id.to_owned());
        }
        on_message(&message);
    }
    Ok(announced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn frames_are_demultiplexed() {
        let mut input = frame(1, b"hello ");
        input.extend(frame(2, b"world\n"));
        input.extend(frame(1, b""));
        let mut out = String::new();
        FrameReader::new(&input[..]).read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world\n");
    }

    #[test]
    fn unframed_input_passes_through() {
        let mut out = String::new();
        FrameReader::new(&b"plain tty output\n"[..])
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "plain tty output\n");
    }

    #[test]
    fn short_unframed_input_passes_through() {
        let mut out = String::new();
        FrameReader::new(&b"hi"[..]).read_to_string(&mut out).unwrap();
        assert_eq!(out, "hi");
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut input = frame(1, b"abcdef");
        input.truncate(10);
        let mut out = Vec::new();
        assert!(FrameReader::new(&input[..]).read_to_end(&mut out).is_err());
    }

    #[test]
    fn lines_strip_terminators() {
        let lines: Vec<String> = StreamLines::new(&b"a\r\nb\n\nc"[..])
            .map(Result::unwrap)
            .collect();
        assert_eq!(lines, vec!["a", "b", "", "c"]);
    }

    #[test]
    fn progress_error_fails() {
        let input = b"{\"status\":\"Pulling\"}\n{\"error\":\"manifest unknown\"}\n";
        let mut seen = 0;
        let err = drain_progress(&input[..], "pull", |_| seen += 1).unwrap_err();
        assert_eq!(seen, 1);
        assert!(err.to_string().contains("manifest unknown"));
    }

    #[test]
    fn progress_reports_build_id() {
        let input = b"{\"stream\":\"Step 1/2\\n\"}\nnot json\n{\"aux\":{\"ID\":\"sha256:feed\"}}\n";
        let mut texts = Vec::new();
        let id = drain_progress(&input[..], "build", |m| texts.extend(m.text())).unwrap();
        assert_eq!(id.as_deref(), Some("sha256:feed"));
        assert_eq!(texts, vec!["Step 1/2"]);
    }
}
