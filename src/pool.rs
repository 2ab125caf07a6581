//! Backend Pool & Dispatcher (§4.3): round-robin backend selection plus
//! the "one live connection per backend address" pool.

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use mio::Token;

/// `{host, port}`, immutable after the backend list is loaded (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddr {
    host: String,
    port: u16,
}

impl BackendAddr {
    pub fn new(host: String, port: u16) -> BackendAddr {
        BackendAddr { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves to a concrete socket address for `TcpStream::connect`.
    pub fn to_socket_addr(&self) -> std::io::Result<SocketAddr> {
        (self.host(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("could not resolve {}", self),
                )
            })
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.port)
    }
}

/// Tracks the configured backend list, the round-robin cursor, and which
/// backend addresses currently have a live pooled connection.
///
/// The pool never holds more than one socket per address (§4.3): if a
/// backend is already in `pool`, `dispatch` returns the existing token
/// and the caller (the event loop) is responsible for actually opening a
/// fresh connection when it is not.
pub struct BackendPool {
    backends: Vec<BackendAddr>,
    round_robin_index: usize,
    pool: HashMap<BackendAddr, Token>,
}

/// The result of asking the dispatcher for a backend: which address was
/// chosen by round robin, and whether a connection to it already exists.
pub enum Dispatch {
    Existing(Token),
    NeedsConnect(BackendAddr),
}

impl BackendPool {
    pub fn new(backends: Vec<BackendAddr>) -> BackendPool {
        assert!(!backends.is_empty(), "backend list must not be empty");
        BackendPool {
            backends,
            round_robin_index: 0,
            pool: HashMap::new(),
        }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Picks the next backend by round robin (§4.3 step 1) and reports
    /// whether the pool already has a live connection for it.
    pub fn dispatch(&mut self) -> Dispatch {
        let addr = self.backends[self.round_robin_index].clone();
        self.round_robin_index = (self.round_robin_index + 1) % self.backends.len();
        match self.pool.get(&addr) {
            Some(&token) => Dispatch::Existing(token),
            None => Dispatch::NeedsConnect(addr),
        }
    }

    /// Registers a freshly-opened backend connection as the pool's entry
    /// for `addr` (§4.3 step 3).
    pub fn insert(&mut self, addr: BackendAddr, token: Token) {
        self.pool.insert(addr, token);
    }

    /// Removes the pool's entry for `addr`, e.g. on teardown (§7
    /// `BackendUnreachable`, `PeerClosed`). A future request for this
    /// address will trigger a fresh connect.
    pub fn remove(&mut self, addr: &BackendAddr) {
        self.pool.remove(addr);
    }
}
