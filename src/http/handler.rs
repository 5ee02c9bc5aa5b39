use crate::http::Response;
use crate::http::request::Request;
use std::io::BufRead;

/// Produces the response for one request.
///
/// `body` is the connection positioned at the first body byte. Returning
/// `Err` drops the connection without a response, which is how read
/// timeouts and broken sockets are surfaced.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &Request, body: &mut dyn BufRead) -> anyhow::Result<Response>;
}
