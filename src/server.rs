//! The readiness-driven Event Loop (§4.5): a single `mio::Poll`
//! multiplexing the listener, every client socket, and every backend
//! socket, dispatching each ready event to the connection it belongs to.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::connection::{ConnectionState, Role};
use crate::error::Error;
use crate::message::HttpMessage;
use crate::pool::{BackendAddr, BackendPool, Dispatch};
use crate::router::Router;

const LISTENER: Token = Token(0);
const READ_CHUNK: usize = 4096;

/// The connection registry: every open socket, client or backend, keyed
/// by the `mio::Token` it was registered under (§3).
pub struct Connections {
    map: HashMap<Token, ConnectionState>,
}

impl Connections {
    pub fn new() -> Connections {
        Connections { map: HashMap::new() }
    }

    pub fn insert(&mut self, token: Token, state: ConnectionState) {
        self.map.insert(token, state);
    }

    pub fn remove(&mut self, token: Token) -> Option<ConnectionState> {
        self.map.remove(&token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut ConnectionState> {
        self.map.get_mut(&token)
    }

    pub fn get(&self, token: Token) -> Option<&ConnectionState> {
        self.map.get(&token)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub backends: Vec<BackendAddr>,
    pub poll_timeout: Option<Duration>,
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    connections: Connections,
    pool: BackendPool,
    router: Router,
    next_token: usize,
    poll_timeout: Option<Duration>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Server, Error> {
        let mut listener = TcpListener::bind(config.listen_addr).map_err(Error::Bind)?;
        let poll = Poll::new().map_err(Error::Bind)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(Error::Bind)?;
        Ok(Server {
            poll,
            listener,
            connections: Connections::new(),
            pool: BackendPool::new(config.backends),
            router: Router::new(),
            next_token: 1,
            poll_timeout: config.poll_timeout,
        })
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Runs until `should_stop` reports a shutdown request (§6, signal
    /// handling), processing one round of readiness events per iteration.
    pub fn run(&mut self, should_stop: &dyn Fn() -> bool) -> Result<(), Error> {
        let mut events = Events::with_capacity(1024);
        info!("event loop starting; {} backend(s) configured", self.pool.backend_count());
        while !should_stop() {
            match self.poll.poll(&mut events, self.poll_timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
            for event in events.iter() {
                let token = event.token();
                if token == LISTENER {
                    self.accept_connections();
                    continue;
                }
                if event.is_readable() {
                    self.handle_readable(token);
                }
                // A connection torn down by `handle_readable` above (e.g. on
                // peer hangup) is simply absent from `connections` here.
                if event.is_writable() && self.connections.get(token).is_some() {
                    self.handle_writable(token);
                }
            }
        }
        info!("event loop stopping on shutdown signal");
        Ok(())
    }

    /// Drains every pending connection on the listener (§4.5, "Listener
    /// readable"): `accept` is level-triggered-equivalent here only in
    /// that a single readiness notification may represent more than one
    /// queued connection, so we loop until it would block.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = self.allocate_token();
                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!("failed to register accepted connection {}: {}", addr, e);
                        continue;
                    }
                    self.connections
                        .insert(token, ConnectionState::new(stream, addr, Role::new_client()));
                    debug!(
                        "accepted client {} as {:?}; {} connection(s) open",
                        addr,
                        token,
                        self.connections.len()
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let mut buf = [0u8; READ_CHUNK];
        let mut messages = Vec::new();
        let mut close = false;
        let mut parse_failed = false;

        loop {
            let conn = match self.connections.get_mut(token) {
                Some(c) => c,
                None => return,
            };
            match conn.socket.read(&mut buf) {
                Ok(0) => {
                    close = true;
                    break;
                }
                Ok(n) => match conn.feed_bytes(&buf[..n]) {
                    Ok(mut msgs) => messages.append(&mut msgs),
                    Err(e) => {
                        warn!("{:?}: malformed message: {}", token, e);
                        parse_failed = true;
                        break;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("{:?}: read error: {}", token, e);
                    close = true;
                    break;
                }
            }
        }

        for message in messages {
            self.route_message(token, message);
        }

        if close || parse_failed {
            self.teardown(token);
            return;
        }

        self.resync_interest(token);
    }

    fn route_message(&mut self, token: Token, message: HttpMessage) {
        let is_backend = match self.connections.get(token) {
            Some(c) => c.role.is_backend(),
            None => return,
        };
        if is_backend {
            if let HttpMessage::Response(response) = message {
                if let Some(client_token) = self.router.route_response(response, &mut self.connections) {
                    self.resync_interest(client_token);
                }
            }
            return;
        }
        let request = match message {
            HttpMessage::Request(r) => r,
            HttpMessage::Response(_) => {
                warn!("{:?}: client sent a response; ignoring", token);
                return;
            }
        };
        let tagged = {
            let client = match self.connections.get_mut(token) {
                Some(c) => c,
                None => return,
            };
            self.router.accept_request(token, client, request)
        };
        self.dispatch_to_backend(tagged);
    }

    /// Asks the pool for a backend (§4.3 step 1), opening a fresh
    /// connection when none is pooled yet, then queues the serialized
    /// request onto that backend's socket (§4.4 step 3).
    fn dispatch_to_backend(&mut self, message: HttpMessage) {
        let mut bytes = Vec::new();
        message.write_to(&mut bytes);

        let backend_token = match self.pool.dispatch() {
            Dispatch::Existing(token) => token,
            Dispatch::NeedsConnect(addr) => match self.open_backend(addr.clone()) {
                Ok(token) => {
                    self.pool.insert(addr, token);
                    token
                }
                Err(e) => {
                    warn!("could not connect to backend {}: {}", addr, e);
                    return;
                }
            },
        };

        if let Some(backend) = self.connections.get_mut(backend_token) {
            backend.queue_backend_request(bytes);
            backend.promote_next_pending_request();
        }
        self.resync_interest(backend_token);
    }

    fn open_backend(&mut self, addr: BackendAddr) -> io::Result<Token> {
        let socket_addr = addr.to_socket_addr()?;
        let mut stream = TcpStream::connect(socket_addr)?;
        let token = self.allocate_token();
        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
        self.connections
            .insert(token, ConnectionState::new(stream, socket_addr, Role::new_backend(addr)));
        Ok(token)
    }

    fn handle_writable(&mut self, token: Token) {
        let conn = match self.connections.get_mut(token) {
            Some(c) => c,
            None => return,
        };
        // A non-blocking `connect` reports completion (or failure) as the
        // first writable event; `take_error` distinguishes the two.
        match conn.socket.take_error() {
            Ok(Some(e)) | Err(e) => {
                warn!("{:?}: backend connect failed: {}", token, e);
                self.teardown(token);
                return;
            }
            Ok(None) => {}
        }

        conn.promote_next_pending_request();
        loop {
            if conn.out_buf_is_empty() {
                break;
            }
            match conn.socket.write(conn.out_buf()) {
                Ok(0) => break,
                Ok(n) => {
                    conn.drain_out_buf(n);
                    if conn.out_buf_is_empty() {
                        conn.promote_next_pending_request();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("{:?}: write error: {}", token, e);
                    self.teardown(token);
                    return;
                }
            }
        }
        self.resync_interest(token);
    }

    /// Reregisters `token`'s interest with `Poll` only when it actually
    /// changed (§4.2 invariant 3's enforcement point; avoids the
    /// busy-spin a stale `WRITABLE` interest would cause).
    fn resync_interest(&mut self, token: Token) {
        let conn = match self.connections.get_mut(token) {
            Some(c) => c,
            None => return,
        };
        let desired = conn.desired_interest();
        if desired != conn.interest {
            if self
                .poll
                .registry()
                .reregister(&mut conn.socket, token, desired)
                .is_ok()
            {
                conn.interest = desired;
            }
        }
    }

    fn teardown(&mut self, token: Token) {
        let conn = match self.connections.remove(token) {
            Some(c) => c,
            None => return,
        };
        match &conn.role {
            Role::Client { .. } => {
                self.router.orphan_client(&conn.in_flight_request_ids());
            }
            Role::Backend { addr, .. } => {
                self.pool.remove(addr);
            }
        }
        let mut socket = conn.socket;
        let _ = self.poll.registry().deregister(&mut socket);
        debug!(
            "{:?}: connection closed; {} connection(s) remain",
            token,
            self.connections.len()
        );
    }
}
