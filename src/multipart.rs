//! Single-file `multipart/form-data` extraction.
//!
//! The body is consumed line by line straight off the connection and never
//! held in memory as a whole. Each payload line is kept back for one step:
//! the CRLF before a delimiter belongs to the delimiter, not to the file, so a
//! line can only be written once we know the following line is not the
//! closing delimiter.
//!
//! ```text
//!  AwaitBoundary ──"--b"──▶ ReadDisposition ──filename──▶ SkipHeaders
//!                                                            │ blank line
//!                                                            ▼
//!                                      Done ◀──"--b"── StreamPayload ⟲ held line
//! ```
//!
//! Reads are bounded by `Content-Length`; the reader is never asked for a
//! byte past it.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io::{self, BufRead, Read, Write};
use std::mem;
use thiserror::Error;

/// Longest slice handed out as one "line". Longer lines arrive as several
/// slices, only the first of which starts at a line boundary.
const MAX_CHUNK: u64 = 64 * 1024;

static BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)boundary="?([^";\s]+)"?"#).unwrap());

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^Content-Disposition:.*\bname="file";\s*filename="([^"]*)""#).unwrap()
});

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing content type")]
    MissingContentType,
    #[error("missing content length")]
    MissingContentLength,
    #[error("body does not begin with boundary")]
    BoundaryMismatch,
    #[error("missing filename")]
    FilenameMissing,
    #[error("unexpected end of data")]
    Truncated,
    /// The connection failed, typically a read timeout.
    #[error("reading request body: {0}")]
    Read(#[source] io::Error),
    #[error("writing upload: {0}")]
    Write(#[source] io::Error),
}

/// A fully received file part.
#[derive(Debug)]
pub struct Extracted<W> {
    pub filename: String,
    pub bytes: u64,
    pub sink: W,
}

#[derive(Debug)]
enum State {
    AwaitBoundary,
    ReadDisposition,
    SkipHeaders { filename: String },
    StreamPayload { filename: String, held: Option<Vec<u8>> },
}

/// Returns the boundary parameter of a `Content-Type` value.
pub fn boundary(content_type: &str) -> Option<Vec<u8>> {
    BOUNDARY_RE
        .captures(content_type.as_bytes())
        .and_then(|c| c.get(1))
        .map(|m| m.as_bytes().to_vec())
}

fn filename(line: &[u8]) -> Option<String> {
    FILENAME_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        .filter(|name| !name.is_empty())
}

/// Drops one trailing `\n` and then one trailing `\r`.
fn strip_line_end(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

struct BodyLines<R> {
    reader: R,
    remaining: u64,
    at_line_start: bool,
}

impl<R: BufRead> BodyLines<R> {
    /// Reads the next line (or slice of an over-long line) into `buf`.
    /// Returns whether it starts at a line boundary, or `None` once the
    /// byte budget is spent or the peer stops sending.
    fn next(&mut self, buf: &mut Vec<u8>) -> Result<Option<bool>, UploadError> {
        buf.clear();
        if self.remaining == 0 {
            return Ok(None);
        }

        let limit = self.remaining.min(MAX_CHUNK);
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', buf)
            .map_err(UploadError::Read)?;
        if n == 0 {
            return Ok(None);
        }
        self.remaining -= n as u64;

        // A chunk never ends between `\r` and `\n`, so a line end is
        // always stripped as one unit.
        if buf.last() == Some(&b'\r') && self.remaining > 0 {
            let next = self.reader.fill_buf().map_err(UploadError::Read)?;
            if next.first() == Some(&b'\n') {
                self.reader.consume(1);
                self.remaining -= 1;
                buf.push(b'\n');
            }
        }

        let starts_line = self.at_line_start;
        self.at_line_start = buf.last() == Some(&b'\n');
        Ok(Some(starts_line))
    }
}

/// Extracts the single file part from a multipart body.
///
/// `open` is called with the client's filename once the part headers have
/// been read, and receives the payload. It is not called at all when the
/// body is rejected before the payload starts.
pub fn extract<R, W, F>(
    content_type: Option<&str>,
    content_length: Option<u64>,
    reader: R,
    open: F,
) -> Result<Extracted<W>, UploadError>
where
    R: BufRead,
    W: Write,
    F: FnOnce(&str) -> io::Result<W>,
{
    let marker = content_type
        .and_then(boundary)
        .ok_or(UploadError::MissingContentType)?;
    let content_length = content_length.ok_or(UploadError::MissingContentLength)?;

    let mut delimiter = b"--".to_vec();
    delimiter.extend_from_slice(&marker);

    let mut lines = BodyLines {
        reader,
        remaining: content_length,
        at_line_start: true,
    };

    let mut open = Some(open);
    let mut sink: Option<W> = None;
    let mut written: u64 = 0;
    let mut state = State::AwaitBoundary;
    let mut line = Vec::new();

    loop {
        let Some(starts_line) = lines.next(&mut line)? else {
            return Err(match state {
                State::AwaitBoundary => UploadError::BoundaryMismatch,
                State::ReadDisposition => UploadError::FilenameMissing,
                _ => UploadError::Truncated,
            });
        };
        let is_delimiter = starts_line && line.starts_with(&delimiter);

        state = match state {
            State::AwaitBoundary => {
                if !is_delimiter {
                    return Err(UploadError::BoundaryMismatch);
                }
                State::ReadDisposition
            }
            State::ReadDisposition => {
                let filename = filename(&line).ok_or(UploadError::FilenameMissing)?;
                State::SkipHeaders { filename }
            }
            State::SkipHeaders { filename } => {
                if starts_line && line.trim_ascii().is_empty() {
                    let opener = open.take().ok_or(UploadError::Truncated)?;
                    sink = Some(opener(&filename).map_err(UploadError::Write)?);
                    State::StreamPayload {
                        filename,
                        held: None,
                    }
                } else {
                    State::SkipHeaders { filename }
                }
            }
            State::StreamPayload { filename, held } => {
                let Some(out) = sink.as_mut() else {
                    return Err(UploadError::Truncated);
                };

                if is_delimiter {
                    if let Some(mut last) = held {
                        strip_line_end(&mut last);
                        out.write_all(&last).map_err(UploadError::Write)?;
                        written += last.len() as u64;
                    }
                    out.flush().map_err(UploadError::Write)?;

                    return match sink {
                        Some(sink) => Ok(Extracted {
                            filename,
                            bytes: written,
                            sink,
                        }),
                        None => Err(UploadError::Truncated),
                    };
                }

                if let Some(prev) = &held {
                    out.write_all(prev).map_err(UploadError::Write)?;
                    written += prev.len() as u64;
                }
                // The written line's buffer is reused for the next read.
                let mut next_held = held.unwrap_or_default();
                mem::swap(&mut next_held, &mut line);
                State::StreamPayload {
                    filename,
                    held: Some(next_held),
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Cursor;

    const CT: &str = "multipart/form-data; boundary=------------------------abc123";
    const DELIM: &str = "--------------------------abc123";

    fn body(filename: &str, payload: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(format!("{DELIM}\r\n").as_bytes());
        b.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        b.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        b.extend_from_slice(payload);
        b.extend_from_slice(format!("\r\n{DELIM}--\r\n").as_bytes());
        b
    }

    fn run(content_type: Option<&str>, raw: &[u8]) -> Result<Extracted<Vec<u8>>, UploadError> {
        extract(
            content_type,
            Some(raw.len() as u64),
            Cursor::new(raw),
            |_| Ok(Vec::new()),
        )
    }

    #[test]
    fn extracts_payload_and_filename() {
        let got = run(Some(CT), &body("notes.txt", b"line one\nline two")).unwrap();
        assert_eq!(got.filename, "notes.txt");
        assert_eq!(got.sink, b"line one\nline two");
        assert_eq!(got.bytes, 17);
    }

    #[test]
    fn strips_exactly_one_crlf_before_delimiter() {
        let got = run(Some(CT), &body("a.txt", b"hello\r\n")).unwrap();
        assert_eq!(got.sink, b"hello\r\n");

        let got = run(Some(CT), &body("a.txt", b"hello\r\n\r\n")).unwrap();
        assert_eq!(got.sink, b"hello\r\n\r\n");
    }

    #[test]
    fn empty_file() {
        let got = run(Some(CT), &body("empty", b"")).unwrap();
        assert!(got.sink.is_empty());
        assert_eq!(got.bytes, 0);
    }

    #[test]
    fn binary_payload_spanning_many_chunks() {
        let payload: Vec<u8> = (0..300_000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        let got = run(Some(CT), &body("blob.bin", &payload)).unwrap();
        assert_eq!(got.bytes, payload.len() as u64);
        assert_eq!(got.sink, payload);
    }

    #[test]
    fn long_line_without_newlines() {
        let payload = vec![b'x'; (MAX_CHUNK as usize) * 3 + 17];
        let got = run(Some(CT), &body("long", &payload)).unwrap();
        assert_eq!(got.sink, payload);
    }

    #[test]
    fn line_end_split_across_chunks_is_stripped_once() {
        for len in [MAX_CHUNK - 1, 2 * MAX_CHUNK - 1] {
            let payload = vec![b'x'; len as usize];
            let got = run(Some(CT), &body("edge.bin", &payload)).unwrap();
            assert_eq!(got.bytes, len);
            assert_eq!(got.sink.last(), Some(&b'x'));
            assert_eq!(got.sink, payload);
        }

        let mut payload = vec![b'y'; (MAX_CHUNK - 1) as usize];
        payload.extend_from_slice(b"\r\ntail");
        let got = run(Some(CT), &body("mid.bin", &payload)).unwrap();
        assert_eq!(got.sink, payload);
    }

    #[test]
    fn payload_mentioning_boundary_mid_line_is_data() {
        let payload = format!("prefix {DELIM} suffix\nmore");
        let got = run(Some(CT), &body("x", payload.as_bytes())).unwrap();
        assert_eq!(got.sink, payload.as_bytes());
    }

    #[test]
    fn lf_only_line_endings() {
        let raw = format!(
            "{DELIM}\nContent-Disposition: form-data; name=\"file\"; filename=\"u.txt\"\n\nabc\n{DELIM}--\n"
        );
        let got = run(Some(CT), raw.as_bytes()).unwrap();
        assert_eq!(got.sink, b"abc");
    }

    #[test]
    fn quoted_boundary_parameter() {
        assert_eq!(
            boundary("multipart/form-data; boundary=\"xyz\"; charset=utf-8"),
            Some(b"xyz".to_vec())
        );
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn missing_content_type() {
        assert!(matches!(
            run(None, &body("a", b"x")),
            Err(UploadError::MissingContentType)
        ));
        assert!(matches!(
            run(Some("text/plain"), &body("a", b"x")),
            Err(UploadError::MissingContentType)
        ));
    }

    #[test]
    fn missing_content_type_reads_nothing() {
        let raw = body("a", b"x");
        let mut cursor = Cursor::new(&raw[..]);
        let res = extract(None, Some(raw.len() as u64), &mut cursor, |_| Ok(Vec::new()));
        assert!(matches!(res, Err(UploadError::MissingContentType)));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn body_must_start_with_boundary() {
        let mut raw = b"garbage\r\n".to_vec();
        raw.extend(body("a", b"x"));
        assert!(matches!(run(Some(CT), &raw), Err(UploadError::BoundaryMismatch)));
        assert!(matches!(run(Some(CT), b""), Err(UploadError::BoundaryMismatch)));
    }

    #[test]
    fn missing_filename_never_opens_sink() {
        let raw = format!(
            "{DELIM}\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc\r\n{DELIM}--\r\n"
        );
        let opened = Cell::new(false);
        let res = extract(
            Some(CT),
            Some(raw.len() as u64),
            Cursor::new(raw.as_bytes()),
            |_| {
                opened.set(true);
                Ok(Vec::new())
            },
        );
        assert!(matches!(res, Err(UploadError::FilenameMissing)));
        assert!(!opened.get());
    }

    #[test]
    fn other_field_name_is_not_a_file() {
        let raw = body("a", b"x");
        let raw = String::from_utf8(raw).unwrap().replace("name=\"file\"", "name=\"doc\"");
        assert!(matches!(
            run(Some(CT), raw.as_bytes()),
            Err(UploadError::FilenameMissing)
        ));
    }

    #[test]
    fn truncated_body() {
        let raw = body("a.txt", b"some content that never ends");
        let cut = raw.len() - DELIM.len() - 6;
        let res = extract(Some(CT), Some(cut as u64), Cursor::new(&raw[..]), |_| {
            Ok(Vec::new())
        });
        assert!(matches!(res, Err(UploadError::Truncated)));
    }

    #[test]
    fn never_reads_past_content_length() {
        let mut raw = body("a.txt", b"payload");
        let len = raw.len() as u64;
        raw.extend_from_slice(b"GET /next HTTP/1.1\r\n\r\n");

        let mut cursor = Cursor::new(&raw[..]);
        let got = extract(Some(CT), Some(len), &mut cursor, |_| Ok(Vec::new())).unwrap();
        assert_eq!(got.sink, b"payload");
        assert!(cursor.position() <= len);
    }

    #[test]
    fn peer_closing_early_is_truncated() {
        let raw = body("a.txt", b"payload");
        let half = &raw[..raw.len() / 2 + 10];
        let res = extract(Some(CT), Some(raw.len() as u64), Cursor::new(half), |_| {
            Ok(Vec::new())
        });
        assert!(matches!(res, Err(UploadError::Truncated)));
    }

    #[test]
    fn missing_content_length() {
        let raw = body("a", b"x");
        let res = extract(Some(CT), None, Cursor::new(&raw[..]), |_| Ok(Vec::new()));
        assert!(matches!(res, Err(UploadError::MissingContentLength)));
    }
}
