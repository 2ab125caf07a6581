//! Per-socket state (§3 `ConnectionState`, §4.2). One value of this type
//! exists per open client or backend socket; the event loop looks it up
//! by `mio::Token` in `Connections` (see `server.rs`).
//!
//! The client/backend split is a tagged variant (`Role`), not a trait
//! object or a subclass, per §9's explicit guidance ("Dynamic dispatch on
//! role... avoid class hierarchy").

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::Interest;

use crate::error::ParseError;
use crate::message::{HttpMessage, RequestId};
use crate::parser::Parser;
use crate::pool::BackendAddr;

/// Role-specific bookkeeping. Client sockets track the order requests
/// arrived in and the responses that have arrived but can't be emitted
/// yet (head-of-line, §4.4). Backend sockets track requests that have
/// been routed to them but not yet written to the wire.
#[derive(Debug)]
pub enum Role {
    Client {
        request_order: VecDeque<RequestId>,
        pending_responses: HashMap<RequestId, HttpMessage>,
    },
    Backend {
        addr: BackendAddr,
        pending_requests: VecDeque<Vec<u8>>,
    },
}

impl Role {
    pub fn new_client() -> Role {
        Role::Client {
            request_order: VecDeque::new(),
            pending_responses: HashMap::new(),
        }
    }

    pub fn new_backend(addr: BackendAddr) -> Role {
        Role::Backend {
            addr,
            pending_requests: VecDeque::new(),
        }
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, Role::Backend { .. })
    }
}

pub struct ConnectionState {
    pub socket: TcpStream,
    pub remote_addr: SocketAddr,
    pub role: Role,
    in_buf: Vec<u8>,
    out_buf: Vec<u8>,
    parser: Parser,
    pub interest: Interest,
}

impl ConnectionState {
    pub fn new(socket: TcpStream, remote_addr: SocketAddr, role: Role) -> ConnectionState {
        ConnectionState {
            socket,
            remote_addr,
            role,
            in_buf: Vec::new(),
            out_buf: Vec::new(),
            parser: Parser::new(),
            interest: Interest::READABLE,
        }
    }

    /// Appends freshly `recv`'d bytes and drains every complete message
    /// the parser can now produce, including every message pipelined
    /// back-to-back in this single chunk (§4.2).
    pub fn feed_bytes(&mut self, data: &[u8]) -> Result<Vec<HttpMessage>, ParseError> {
        self.in_buf.extend_from_slice(data);
        let mut out = Vec::new();
        while let Some(msg) = self.parser.try_parse(&mut self.in_buf)? {
            out.push(msg);
        }
        Ok(out)
    }

    /// Serializes `msg` straight into `outBuf` (§4.4 step 3: "we append
    /// directly to `outBuf` and let the loop flush it").
    pub fn enqueue_outbound(&mut self, msg: &HttpMessage) {
        msg.write_to(&mut self.out_buf);
    }

    pub fn out_buf(&self) -> &[u8] {
        &self.out_buf
    }

    pub fn out_buf_is_empty(&self) -> bool {
        self.out_buf.is_empty()
    }

    /// Advances `outBuf` past `sent` bytes that the kernel has accepted.
    pub fn drain_out_buf(&mut self, sent: usize) {
        self.out_buf.drain(..sent);
    }

    /// If `outBuf` just emptied and this is a backend connection with a
    /// queued request, promotes the next request into `outBuf` (§4.5
    /// "Connection, writable").
    pub fn promote_next_pending_request(&mut self) -> bool {
        if !self.out_buf.is_empty() {
            return false;
        }
        if let Role::Backend {
            pending_requests, ..
        } = &mut self.role
        {
            if let Some(bytes) = pending_requests.pop_front() {
                self.out_buf.extend_from_slice(&bytes);
                return true;
            }
        }
        false
    }

    pub fn queue_backend_request(&mut self, bytes: Vec<u8>) {
        match &mut self.role {
            Role::Backend {
                pending_requests, ..
            } => pending_requests.push_back(bytes),
            Role::Client { .. } => unreachable!("requests are only queued on backend connections"),
        }
    }

    /// The interest mask invariant (3) demands: `ReadWrite` iff `outBuf`
    /// is non-empty, or (for a backend) `pendingRequests` is non-empty.
    pub fn desired_interest(&self) -> Interest {
        let backend_has_pending = match &self.role {
            Role::Backend {
                pending_requests, ..
            } => !pending_requests.is_empty(),
            Role::Client { .. } => false,
        };
        if !self.out_buf.is_empty() || backend_has_pending {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    pub fn client_request_order_mut(&mut self) -> &mut VecDeque<RequestId> {
        match &mut self.role {
            Role::Client { request_order, .. } => request_order,
            Role::Backend { .. } => unreachable!("only client connections track request order"),
        }
    }

    pub fn client_pending_responses_mut(&mut self) -> &mut HashMap<RequestId, HttpMessage> {
        match &mut self.role {
            Role::Client {
                pending_responses, ..
            } => pending_responses,
            Role::Backend { .. } => unreachable!("only client connections buffer responses"),
        }
    }

    /// All request ids this client has in flight, for orphaning on
    /// teardown (§3 "Lifecycle", §7 `PeerClosed`).
    pub fn in_flight_request_ids(&self) -> Vec<RequestId> {
        match &self.role {
            Role::Client { request_order, .. } => request_order.iter().cloned().collect(),
            Role::Backend { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn dummy_addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    fn backend_addr() -> BackendAddr {
        BackendAddr::new("127.0.0.1".to_string(), 9001)
    }

    // `ConnectionState` needs a real `mio::net::TcpStream`; these tests
    // exercise the buffer/interest bookkeeping through a connected pair
    // rather than constructing a socket out of thin air.
    fn paired_streams() -> (TcpStream, TcpStream) {
        use std::net::TcpListener as StdListener;
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(client), TcpStream::from_std(server))
    }

    #[test]
    fn read_only_interest_with_empty_buffers() {
        let (a, _b) = paired_streams();
        let conn = ConnectionState::new(a, dummy_addr(), Role::new_client());
        assert_eq!(conn.desired_interest(), Interest::READABLE);
    }

    #[test]
    fn read_write_interest_once_outbuf_has_bytes() {
        let (a, _b) = paired_streams();
        let mut conn = ConnectionState::new(a, dummy_addr(), Role::new_client());
        conn.out_buf.push(b'x');
        assert_eq!(conn.desired_interest(), Interest::READABLE | Interest::WRITABLE);
    }

    #[test]
    fn backend_with_only_pending_requests_wants_write() {
        let (a, _b) = paired_streams();
        let mut conn = ConnectionState::new(a, dummy_addr(), Role::new_backend(backend_addr()));
        conn.queue_backend_request(b"GET / HTTP/1.1\r\n\r\n".to_vec());
        assert_eq!(conn.desired_interest(), Interest::READABLE | Interest::WRITABLE);
    }

    #[test]
    fn promote_next_pending_request_moves_bytes_into_out_buf() {
        let (a, _b) = paired_streams();
        let mut conn = ConnectionState::new(a, dummy_addr(), Role::new_backend(backend_addr()));
        conn.queue_backend_request(b"A".to_vec());
        conn.queue_backend_request(b"B".to_vec());
        assert!(conn.promote_next_pending_request());
        assert_eq!(conn.out_buf(), b"A");
        // outBuf isn't empty, so nothing more should be promoted yet.
        assert!(!conn.promote_next_pending_request());
        conn.drain_out_buf(1);
        assert!(conn.promote_next_pending_request());
        assert_eq!(conn.out_buf(), b"B");
    }

    #[test]
    fn feed_bytes_yields_pipelined_requests_in_order() {
        let (a, _b) = paired_streams();
        let mut conn = ConnectionState::new(a, dummy_addr(), Role::new_client());
        let msgs = conn
            .feed_bytes(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n")
            .unwrap();
        assert_eq!(msgs.len(), 2);
        match (&msgs[0], &msgs[1]) {
            (HttpMessage::Request(a), HttpMessage::Request(b)) => {
                assert_eq!(a.target, "/a");
                assert_eq!(b.target, "/b");
            }
            _ => panic!("expected two requests"),
        }
    }
}
