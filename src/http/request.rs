use crate::http::method::Method;
use std::collections::HashMap;

/// Request head. The body is left on the connection and read by the handler.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn get_header(&self, k: &str) -> Option<&str> {
        self.headers.get(&k.to_lowercase()).map(|v| v.as_str())
    }

    /// `None` when the header is absent or not a number.
    pub fn content_length(&self) -> Option<u64> {
        self.get_header("content-length")
            .and_then(|v| v.parse().ok())
    }

    pub fn expects_continue(&self) -> bool {
        self.get_header("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }

    /// Request target without query string or fragment.
    pub fn path(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str, headers: &[(&str, &str)]) -> Request {
        Request {
            method: Method::GET,
            url: url.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn path_drops_query_and_fragment() {
        assert_eq!(request("/1/a.txt?x=1", &[]).path(), "/1/a.txt");
        assert_eq!(request("/1/a.txt#top", &[]).path(), "/1/a.txt");
        assert_eq!(request("/1/", &[]).path(), "/1/");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = request("/", &[("Content-Length", "12"), ("Expect", "100-Continue")]);
        assert_eq!(req.get_header("CONTENT-LENGTH"), Some("12"));
        assert_eq!(req.content_length(), Some(12));
        assert!(req.expects_continue());
    }

    #[test]
    fn bad_content_length_is_none() {
        let req = request("/", &[("Content-Length", "twelve")]);
        assert_eq!(req.content_length(), None);
    }
}
