use crate::concurrency::ThreadPool;
use crate::http;
use crate::http::Response;
use crate::http::handler::Handler;
use crate::http::parse::{self, ParseError};
use crate::http::status::Status;
use anyhow::Context;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Server {
    listener: TcpListener,
    pool: ThreadPool,
    timeout: Duration,
    stop: Arc<AtomicBool>,
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // accept() blocks, so poke it with a throwaway connection.
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, Duration::from_secs(1)) {
            debug!("wake-up connection failed: {}", e);
        }
    }
}

impl Server {
    pub fn bind(addr: impl ToSocketAddrs, num_workers: usize, timeout: Duration) -> anyhow::Result<Server> {
        let listener = TcpListener::bind(addr).context("Can't bind address")?;
        let pool = ThreadPool::new(num_workers).context("Can't start worker threads")?;

        Ok(Server {
            listener,
            pool,
            timeout,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr().context("Can't read listener address")
    }

    pub fn shutdown_handle(&self) -> anyhow::Result<ShutdownHandle> {
        let mut wake_addr = self.local_addr()?;
        if wake_addr.ip().is_unspecified() {
            let loopback = match wake_addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            };
            wake_addr.set_ip(loopback);
        }

        Ok(ShutdownHandle {
            stop: Arc::clone(&self.stop),
            wake_addr,
        })
    }

    /// Accepts connections until the shutdown handle fires, then drains the
    /// worker pool within its grace period.
    pub fn run(mut self, handler: Arc<dyn Handler>) -> anyhow::Result<()> {
        info!("listening on {}", self.local_addr()?);

        for stream in self.listener.incoming() {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            let timeout = self.timeout;
            if self
                .pool
                .execute(move || process_incoming(stream, handler.as_ref(), timeout))
                .is_err()
            {
                break;
            }
        }

        info!("no longer accepting connections");
        drop(self.listener);
        self.pool.shutdown(ThreadPool::DEFAULT_GRACE);
        Ok(())
    }
}

fn process_incoming(stream: TcpStream, handler: &dyn Handler, timeout: Duration) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    debug!("accepted new connection: {}", peer);

    if let Err(e) = serve_connection(&stream, handler, timeout, &peer) {
        warn!("{}: {:#}", peer, e);
    }
}

fn serve_connection(
    stream: &TcpStream,
    handler: &dyn Handler,
    timeout: Duration,
    peer: &str,
) -> anyhow::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut rdr = BufReader::with_capacity(http::BUFFER_SIZE, stream);
    let mut out = stream;

    let request = match parse::read_request_head(&mut rdr) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(e) if e.is_timeout() => {
            anyhow::bail!("Request timed out: {}", e);
        }
        Err(e) => {
            let response = error_response(&e);
            info!("{} \"-\" {} ({})", peer, response.status.code_num, e);
            response.write_to(&mut out)?;
            return Ok(());
        }
    };

    if request.expects_continue() {
        http::write_continue(&mut out)?;
    }

    let response = handler
        .handle(&request, &mut rdr)
        .with_context(|| format!("\"{} {}\" aborted", request.method, request.url))?;

    info!(
        "{} \"{} {} {}\" {} {}",
        peer,
        request.method,
        request.url,
        request.version,
        response.status.code_num,
        response.content.len()
    );

    response.write_to(&mut out).context("Can't write response")
}

fn error_response(e: &ParseError) -> Response {
    match e {
        ParseError::LineTooLong => http::error(Status::URI_TOO_LONG, "Request-URI Too Long"),
        ParseError::UnsupportedMethod(_) => http::error(Status::NOT_IMPLEMENTED, &e.to_string()),
        _ => http::bad_request(),
    }
}
