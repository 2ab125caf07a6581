//! Header storage and the small set of case-insensitive value checks the
//! proxy needs. The map keeps insertion order so serialization is
//! deterministic (see `Message::write_to`), and comparisons for the few
//! header values the proxy actually inspects (`Connection`, the presence
//! of `Transfer-Encoding`) are done byte-by-byte and case-insensitively,
//! in the same style as the teacher's own `is_close`/`is_chunked` helpers.

/// An ordered, case-insensitively-keyed header list.
///
/// Lookups scan the (small) backing `Vec`; for the handful of headers a
/// request or response typically carries this is faster and simpler than
/// hashing, and it preserves the exact original casing of each name for
/// re-serialization.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap { entries: Vec::new() }
    }

    /// Appends a header, preserving its original-cased name. Does not
    /// overwrite an existing entry of the same name: HTTP allows repeated
    /// header fields and the wire representation must round-trip them.
    pub fn push(&mut self, name: String, value: String) {
        self.entries.push((name, value));
    }

    /// Sets a header to exactly one value, replacing any prior value(s)
    /// of the same name. Used for `X-Request-ID` injection, where the
    /// proxy must guarantee exactly one occurrence (S2/S3).
    pub fn set(&mut self, name: &str, value: String) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.push((name.to_string(), value));
    }

    /// Returns the first value stored under `name`, compared
    /// case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// `true` if a `Connection` header value contains the `close` token.
///
/// Mirrors the whitespace-tolerant, case-insensitive comparison the
/// teacher's `headers::is_close` performs over raw header bytes, adapted
/// to operate on the already-UTF8-decoded value this proxy stores.
pub fn is_close(val: &str) -> bool {
    val.trim().eq_ignore_ascii_case("close")
}

/// `true` if a `Connection` header value contains the `keep-alive` token.
pub fn is_keep_alive(val: &str) -> bool {
    val.trim().eq_ignore_ascii_case("keep-alive")
}
