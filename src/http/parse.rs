use crate::http::method::Method;
use crate::http::request::Request;
use std::collections::HashMap;
use std::io::{self, BufRead, Read};
use std::str::FromStr;
use thiserror::Error;

pub const MAX_LINE: u64 = 65536;
pub const MAX_HEADERS: usize = 100;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("can't read request: {0}")]
    Io(#[from] io::Error),
    #[error("request line too long")]
    LineTooLong,
    #[error("bad request line: {0:?}")]
    BadStartLine(String),
    #[error("unsupported HTTP version {0:?}")]
    UnsupportedVersion(String),
    #[error("Unsupported method ({0:?})")]
    UnsupportedMethod(String),
    #[error("invalid header line")]
    InvalidHeader,
    #[error("too many headers")]
    TooManyHeaders,
}

impl ParseError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ParseError::Io(e) if is_timeout(e))
    }
}

pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Reads one line of at most `MAX_LINE` bytes. An over-long line is an error
/// rather than a silent truncation.
fn read_line<R: BufRead + ?Sized>(rdr: &mut R, buf: &mut Vec<u8>) -> Result<usize, ParseError> {
    buf.clear();
    let n = (&mut *rdr).take(MAX_LINE + 1).read_until(b'\n', buf)?;
    if n as u64 > MAX_LINE {
        return Err(ParseError::LineTooLong);
    }
    Ok(n)
}

/// Parses the request line and headers, leaving the reader positioned at the
/// first body byte. `Ok(None)` means the peer closed before sending anything.
pub fn read_request_head<R: BufRead + ?Sized>(rdr: &mut R) -> Result<Option<Request>, ParseError> {
    let mut line = Vec::new();

    if read_line(rdr, &mut line)? == 0 {
        return Ok(None);
    }

    let first_line = String::from_utf8_lossy(&line).trim_ascii().to_string();
    let first_line_parts: Vec<&str> = first_line.split_ascii_whitespace().collect();

    let (method, url, version) = match first_line_parts[..] {
        [method_raw, target, version] => {
            if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
                return Err(ParseError::UnsupportedVersion(version.to_string()));
            }
            let method = Method::from_str(method_raw)
                .map_err(|_| ParseError::UnsupportedMethod(method_raw.to_string()))?;
            (method, target.to_string(), version.to_string())
        }
        _ => return Err(ParseError::BadStartLine(first_line.to_string())),
    };

    let mut headers: HashMap<String, String> = HashMap::new();

    loop {
        let n = read_line(rdr, &mut line)?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_ascii();

        if n == 0 || text.is_empty() {
            break;
        }

        if headers.len() >= MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }

        let (k, v) = text.split_once(':').ok_or(ParseError::InvalidHeader)?;
        headers.insert(k.trim_ascii().to_lowercase(), v.trim_ascii().to_string());
    }

    Ok(Some(Request {
        method,
        url,
        version,
        headers,
    }))
}
