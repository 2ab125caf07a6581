use std::io;

use quick_error::quick_error;

quick_error! {
    /// Failure to parse a single HTTP/1.1 message out of a connection's
    /// input buffer.
    ///
    /// These never escape a connection: the event loop converts every
    /// variant here into a teardown of the offending socket (see
    /// `Error::Malformed` / `Error::HeadersTooLarge`).
    #[derive(Debug)]
    pub enum ParseError {
        /// The start line is neither a request line (three tokens) nor
        /// a response status line (`HTTP/` prefixed).
        BadStartLine {
            description("malformed HTTP start line")
        }
        /// `Content-Length` value is not a non-negative integer.
        BadContentLength {
            description("Content-Length is not a valid non-negative integer")
        }
        /// `Transfer-Encoding` is present; chunked bodies are a non-goal.
        TransferEncodingPresent {
            description("Transfer-Encoding is not supported by this proxy")
        }
        /// The header block exceeded 8192 bytes before `CRLF CRLF`.
        HeadersTooLarge {
            description("request or response headers exceed the 8KiB limit")
        }
    }
}

quick_error! {
    /// Everything that can go wrong while the proxy is running or
    /// starting up. Grouped by the policy applied to it (see §7 of the
    /// design): transient I/O is absorbed by the event loop and never
    /// constructs this type at all.
    #[derive(Debug)]
    pub enum Error {
        /// A `recv`/`send` failed for a reason other than would-block.
        Io(err: io::Error) {
            from()
            description("i/o error")
            display("i/o error: {}", err)
        }
        /// The parser rejected the byte stream on this connection.
        Malformed(err: ParseError) {
            from()
            description("malformed HTTP message")
            display("malformed HTTP message: {}", err)
        }
        /// The backend list file does not exist, isn't valid JSON, or is
        /// missing the `backend_servers` key.
        ConfigLoad(message: String) {
            description("failed to load backend list")
            display("failed to load backend list: {}", message)
        }
        /// The listener could not be bound or put into listening mode.
        Bind(err: io::Error) {
            description("failed to bind listener")
            display("failed to bind listener: {}", err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::ConfigLoad(err.to_string())
    }
}
