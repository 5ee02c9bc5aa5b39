pub mod handler;
pub mod method;
pub mod parse;
pub mod request;
pub mod server;
pub mod status;

use bytes::Bytes;
use status::Status;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};

pub(crate) const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Bytes),
    /// Streamed from disk; `len` is announced as Content-Length.
    File { file: File, len: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: Status,
    pub headers: HashMap<String, String>,
    pub content: Body,
    /// Send headers only, as for HEAD.
    pub head_only: bool,
}

impl Response {
    pub fn from_parts(status: Status, headers: HashMap<String, String>, content: Body) -> Response {
        Response {
            status,
            headers,
            content,
            head_only: false,
        }
    }

    pub fn text(status: Status, content_type: &str, text: impl Into<String>) -> Response {
        let headers = HashMap::from([("Content-Type".to_string(), content_type.to_string())]);
        Response::from_parts(status, headers, Body::Bytes(Bytes::from(text.into())))
    }

    pub fn without_body(mut self) -> Response {
        self.head_only = true;
        self
    }

    pub fn write_to(self, out: &mut impl Write) -> io::Result<()> {
        let mut head = Vec::with_capacity(128 + self.headers.len() * 32);

        head.extend(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.code_num, self.status.message
            )
            .as_bytes(),
        );

        for (key, value) in &self.headers {
            head.extend(format!("{}: {}\r\n", key, value).as_bytes());
        }

        head.extend(format!("Content-Length: {}\r\n", self.content.len()).as_bytes());
        head.extend(b"Connection: close\r\n\r\n");
        out.write_all(&head)?;

        if !self.head_only {
            match self.content {
                Body::Empty => {}
                Body::Bytes(b) => out.write_all(&b)?,
                Body::File { file, len } => {
                    let mut file = io::Read::take(file, len);
                    io::copy(&mut file, out)?;
                }
            }
        }

        out.flush()
    }
}

pub fn error(status: Status, explain: &str) -> Response {
    Response::text(
        status,
        "text/plain; charset=utf-8",
        format!("{} - {}.\n", status.code_num, explain),
    )
}

pub fn not_found() -> Response {
    error(Status::NOT_FOUND, "Nothing matches the given URI")
}

pub fn bad_request() -> Response {
    error(Status::BAD_REQUEST, "Bad request syntax")
}

pub fn write_continue(out: &mut impl Write) -> io::Result<()> {
    out.write_all(
        format!(
            "HTTP/1.1 {} {}\r\n\r\n",
            Status::CONTINUE.code_num,
            Status::CONTINUE.message
        )
        .as_bytes(),
    )?;
    out.flush()
}
