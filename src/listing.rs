//! HTML index for a served directory.

use crate::storage::{DirEntry, Storage};
use html_escape::{encode_double_quoted_attribute, encode_text};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, percent_encode};
use std::io;
use std::path::Path;
use thiserror::Error;

pub const CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Everything except unreserved characters and `/`.
pub const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

#[derive(Debug, Error)]
#[error("No permission to list directory")]
pub struct ListingError(#[from] pub io::Error);

pub fn encode_segment(raw: &[u8]) -> String {
    percent_encode(raw, PATH_SEGMENT).to_string()
}

/// Reads `dir` and renders its index. `url_path` is the request path of the
/// directory itself, ending in `/`; entry links are built under it.
pub fn list_directory(
    storage: &dyn Storage,
    dir: &Path,
    url_path: &str,
) -> Result<String, ListingError> {
    let entries = storage.read_dir(dir)?;
    Ok(render(url_path, entries))
}

pub fn render(url_path: &str, mut entries: Vec<DirEntry>) -> String {
    entries.sort_by_cached_key(|e| e.name.to_string_lossy().to_lowercase());

    let title = format!(
        "Directory listing for {}",
        percent_decode_str(url_path).decode_utf8_lossy()
    );
    let title = encode_text(&title);

    let mut html = format!(
        "<!DOCTYPE html>\n\
         <html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body><pre>\n\
         {title}\n"
    );

    for entry in &entries {
        let mut name = entry.name.to_string_lossy().into_owned();
        let mut href = format!("{}{}", url_path, encode_segment(entry.name.as_encoded_bytes()));
        if entry.is_dir {
            name.push('/');
            href.push('/');
        }
        html.push_str(&format!(
            "• <a href=\"{}\">{}</a>\n",
            encode_double_quoted_attribute(&href),
            encode_text(&name)
        ));
    }

    html.push_str("</pre></body></html>\n");
    html
}
