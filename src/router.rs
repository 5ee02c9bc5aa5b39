use crate::http::handler::Handler;
use crate::http::method::Method;
use crate::http::request::Request;
use crate::http::status::Status;
use crate::http::{self, Body, Response};
use crate::listing::{self, encode_segment};
use crate::multipart::{self, UploadError};
use crate::routes::RouteTable;
use crate::storage::{EntryKind, LocalFs, Storage};
use anyhow::Context;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::io::{BufRead, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no route {0:?}")]
    RouteNotFound(String),
    #[error("path escapes its root")]
    Escapes,
    #[error("no such file or directory")]
    Missing,
}

/// A request path split into its route id and decoded sub-path segments.
#[derive(Debug, PartialEq, Eq)]
pub struct RoutedPath {
    pub id: String,
    pub segments: Vec<String>,
    pub trailing_slash: bool,
}

impl RoutedPath {
    /// Splits `/<id>/<rest...>`. Segments are percent-decoded; empty and `.`
    /// segments vanish, while `..` or a decoded separator rejects the path.
    pub fn parse(path: &str) -> Result<RoutedPath, ResolveError> {
        let mut parts = path.split('/').filter(|s| !s.is_empty());

        let id = parts
            .next()
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .ok_or_else(|| ResolveError::RouteNotFound(String::new()))?;

        let mut segments = Vec::new();
        for raw in parts {
            let seg = percent_decode_str(raw).decode_utf8_lossy();
            match seg.as_ref() {
                "." => continue,
                ".." => return Err(ResolveError::Escapes),
                s if s.contains(['/', '\\', '\0']) => return Err(ResolveError::Escapes),
                s => segments.push(s.to_string()),
            }
        }

        Ok(RoutedPath {
            id,
            segments,
            trailing_slash: path.ends_with('/'),
        })
    }

    /// Canonical URL form: `/<id>/<seg>/...`, percent-encoded, with a
    /// trailing `/` when `dir` is set.
    pub fn url(&self, dir: bool) -> String {
        let mut url = format!("/{}", encode_segment(self.id.as_bytes()));
        for seg in &self.segments {
            url.push('/');
            url.push_str(&encode_segment(seg.as_bytes()));
        }
        if dir {
            url.push('/');
        }
        url
    }
}

/// A resolved GET target, confined to its route's root.
#[derive(Debug, PartialEq, Eq)]
pub struct Target {
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Request path as served; directories always end in `/`.
    pub url: String,
}

/// Where an accepted upload ended up.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadResult {
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct Router<S = LocalFs> {
    routes: Arc<RouteTable>,
    upload_dir: PathBuf,
    storage: S,
}

impl Router<LocalFs> {
    pub fn new(routes: Arc<RouteTable>, upload_dir: impl Into<PathBuf>) -> Self {
        Router::with_storage(routes, upload_dir, LocalFs)
    }
}

impl<S: Storage> Router<S> {
    pub fn with_storage(routes: Arc<RouteTable>, upload_dir: impl Into<PathBuf>, storage: S) -> Self {
        Router {
            routes,
            upload_dir: upload_dir.into(),
            storage,
        }
    }

    /// Maps a request path onto the filesystem. The route table is consulted
    /// fresh for every call; an unknown id fails before the disk is touched.
    pub fn resolve(&self, path: &str) -> Result<Target, ResolveError> {
        let routed = RoutedPath::parse(path)?;
        let root = self
            .routes
            .resolve(&routed.id)
            .ok_or_else(|| ResolveError::RouteNotFound(routed.id.clone()))?;

        let joined = routed.segments.iter().fold(root.clone(), |p, s| p.join(s));

        let kind = self.storage.kind(&joined).map_err(|_| ResolveError::Missing)?;

        let canonical_root = self
            .storage
            .canonicalize(&root)
            .map_err(|_| ResolveError::Missing)?;
        let canonical = self
            .storage
            .canonicalize(&joined)
            .map_err(|_| ResolveError::Missing)?;
        if !canonical.starts_with(&canonical_root) {
            return Err(ResolveError::Escapes);
        }

        // Directories are served as if the request carried the trailing
        // slash, instead of redirecting the client.
        if kind == EntryKind::Dir && !routed.trailing_slash {
            debug!("{} served as a directory", path);
        }
        let url = routed.url(kind == EntryKind::Dir);

        Ok(Target {
            path: canonical,
            kind,
            url,
        })
    }

    fn get(&self, request: &Request) -> Response {
        let target = match self.resolve(request.path()) {
            Ok(target) => target,
            Err(e) => {
                info!("GET {}: {}", request.path(), e);
                return http::not_found();
            }
        };

        match target.kind {
            EntryKind::Dir => match listing::list_directory(&self.storage, &target.path, &target.url) {
                Ok(html) => Response::text(Status::OK, listing::CONTENT_TYPE, html),
                Err(e) => {
                    warn!("listing {}: {}", target.path.display(), e.0);
                    http::error(Status::NOT_FOUND, &e.to_string())
                }
            },
            EntryKind::File => self.send_file(&target.path),
            EntryKind::Other => http::not_found(),
        }
    }

    fn send_file(&self, path: &Path) -> Response {
        match self.storage.open(path) {
            Ok((file, len)) => {
                let mime = mime_guess::from_path(path).first_or_octet_stream();
                let headers = HashMap::from([("Content-Type".to_string(), mime.to_string())]);
                Response::from_parts(Status::OK, headers, Body::File { file, len })
            }
            Err(e) => {
                warn!("open {}: {}", path.display(), e);
                http::error(Status::NOT_FOUND, "File not found")
            }
        }
    }

    fn post(&self, request: &Request, body: &mut dyn BufRead) -> anyhow::Result<Response> {
        let routed = match RoutedPath::parse(request.path()) {
            Ok(routed) => routed,
            Err(e) => {
                info!("POST {}: {}", request.path(), e);
                return Ok(http::not_found());
            }
        };
        if self.routes.resolve(&routed.id).is_none() {
            info!("POST {}: no route {:?}", request.path(), routed.id);
            return Ok(http::not_found());
        }

        match self.receive_upload(request, body) {
            Ok(upload) => {
                info!(
                    "{} ({} bytes) is successfully uploaded",
                    upload.path.display(),
                    upload.bytes
                );
                Ok(upload_reply("File is uploaded successfully\n".to_string()))
            }
            Err(UploadError::Read(e)) => Err(e).context("reading upload body"),
            Err(e) => {
                warn!("upload rejected: {}", e);
                Ok(upload_reply(format!("Upload error: {}\n", e)))
            }
        }
    }

    /// Streams the file part into a staging file in the upload directory and
    /// moves it into place only once the closing delimiter has been seen.
    pub fn receive_upload(
        &self,
        request: &Request,
        body: &mut dyn BufRead,
    ) -> Result<UploadResult, UploadError> {
        let extracted = multipart::extract(
            request.get_header("content-type"),
            request.content_length(),
            body,
            |_| self.storage.stage(&self.upload_dir).map(BufWriter::new),
        )?;

        // The client's filename is joined as-is.
        let dest = self.upload_dir.join(&extracted.filename);
        if !dest.starts_with(&self.upload_dir) || extracted.filename.contains("..") {
            warn!("upload filename {:?} points outside the upload directory", extracted.filename);
        }

        let staged = extracted
            .sink
            .into_inner()
            .map_err(|e| UploadError::Write(e.into_error()))?;
        staged
            .persist(&dest)
            .map_err(|e| UploadError::Write(e.error))?;

        Ok(UploadResult {
            path: dest,
            bytes: extracted.bytes,
        })
    }
}

fn upload_reply(message: String) -> Response {
    Response::text(Status::OK, "text/plain; charset=utf-8", message)
}

impl<S: Storage> Handler for Router<S> {
    fn handle(&self, request: &Request, body: &mut dyn BufRead) -> anyhow::Result<Response> {
        match request.method {
            Method::GET => Ok(self.get(request)),
            Method::HEAD => Ok(self.get(request).without_body()),
            Method::POST => self.post(request, body),
        }
    }
}
