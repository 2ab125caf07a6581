//! The `HttpMessage` value (§3) and its serializer (§4.1, "Serialization
//! is the inverse"). Grounded in the teacher's `Version` enum
//! (`src/enums/version.rs`) and the header-writing half of
//! `src/base_serializer.rs`, simplified to the one shape this proxy
//! actually needs: no chunked encoding, no trailers, no `Expect: 100-continue`.

use std::fmt;

use rand::RngCore;

use crate::headers::HeaderMap;

/// Version token carried on the start line. The proxy never negotiates or
/// upgrades a version; it simply echoes back whatever the peer wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

impl Version {
    fn parse(token: &str) -> Option<Version> {
        match token {
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/1.0" => Some(Version::Http10),
            _ => None,
        }
    }
}

/// The `X-Request-ID` correlation token (§3). A random 128-bit value,
/// hex-encoded, when the proxy has to mint one itself; otherwise whatever
/// printable token the client or backend supplied verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Mints a fresh, process-unique-enough id: 128 bits of randomness
    /// from `rand`, the same crate the teacher pulls in for WebSocket key
    /// material (`src/websocket/keys.rs`), hex-encoded.
    pub fn generate() -> RequestId {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut hex = String::with_capacity(32);
        for b in &bytes {
            hex.push_str(&format!("{:02x}", b));
        }
        RequestId(hex)
    }

    pub fn from_header_value(value: &str) -> RequestId {
        RequestId(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub content_length: usize,
    pub keep_alive: bool,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub content_length: usize,
    pub keep_alive: bool,
    pub request_id: Option<RequestId>,
}

/// A tagged union over request/response, dispatched on in the router and
/// the event loop rather than via a class hierarchy (§9, "Dynamic
/// dispatch on role").
#[derive(Debug, Clone)]
pub enum HttpMessage {
    Request(Request),
    Response(Response),
}

impl HttpMessage {
    pub fn content_length(&self) -> usize {
        match self {
            HttpMessage::Request(r) => r.content_length,
            HttpMessage::Response(r) => r.content_length,
        }
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        match self {
            HttpMessage::Request(r) => r.body.extend_from_slice(chunk),
            HttpMessage::Response(r) => r.body.extend_from_slice(chunk),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            HttpMessage::Request(r) => &r.headers,
            HttpMessage::Response(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        match self {
            HttpMessage::Request(r) => &mut r.headers,
            HttpMessage::Response(r) => &mut r.headers,
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            HttpMessage::Request(r) => r.request_id.as_ref(),
            HttpMessage::Response(r) => r.request_id.as_ref(),
        }
    }

    pub fn set_request_id(&mut self, id: RequestId) {
        match self {
            HttpMessage::Request(r) => {
                r.headers.set("X-Request-ID", id.as_str().to_string());
                r.request_id = Some(id);
            }
            HttpMessage::Response(r) => {
                r.headers.set("X-Request-ID", id.as_str().to_string());
                r.request_id = Some(id);
            }
        }
    }

    /// Serializes the message back to wire bytes: start line, headers in
    /// insertion order, the blank line, then the body (§4.1). This is the
    /// exact inverse of the parser and is what gets appended to a
    /// connection's `outBuf`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            HttpMessage::Request(r) => {
                out.extend_from_slice(r.method.as_bytes());
                out.push(b' ');
                out.extend_from_slice(r.target.as_bytes());
                out.push(b' ');
                out.extend_from_slice(r.version.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                write_headers(&r.headers, out);
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(&r.body);
            }
            HttpMessage::Response(r) => {
                out.extend_from_slice(r.version.to_string().as_bytes());
                out.push(b' ');
                out.extend_from_slice(r.status_code.to_string().as_bytes());
                out.push(b' ');
                out.extend_from_slice(r.status_text.as_bytes());
                out.extend_from_slice(b"\r\n");
                write_headers(&r.headers, out);
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(&r.body);
            }
        }
    }
}

fn write_headers(headers: &HeaderMap, out: &mut Vec<u8>) {
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

pub(crate) fn parse_version(token: &str) -> Option<Version> {
    Version::parse(token)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_id_is_32_hex_chars() {
        let id = RequestId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn request_ids_are_not_trivially_repeated() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn request_serializes_with_headers_in_order() {
        let mut headers = HeaderMap::new();
        headers.push("Host".to_string(), "example.com".to_string());
        headers.push("X-Request-ID".to_string(), "abc".to_string());
        let req = Request {
            method: "GET".to_string(),
            target: "/a".to_string(),
            version: Version::Http11,
            headers,
            body: Vec::new(),
            content_length: 0,
            keep_alive: true,
            request_id: Some(RequestId::from_header_value("abc")),
        };
        let mut out = Vec::new();
        HttpMessage::Request(req).write_to(&mut out);
        assert_eq!(
            out,
            b"GET /a HTTP/1.1\r\nHost: example.com\r\nX-Request-ID: abc\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn response_serializes_body() {
        let mut headers = HeaderMap::new();
        headers.push("Content-Length".to_string(), "1".to_string());
        let resp = Response {
            version: Version::Http11,
            status_code: 200,
            status_text: "OK".to_string(),
            headers,
            body: b"A".to_vec(),
            content_length: 1,
            keep_alive: true,
            request_id: None,
        };
        let mut out = Vec::new();
        HttpMessage::Response(resp).write_to(&mut out);
        assert_eq!(
            out,
            b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA".to_vec()
        );
    }
}
