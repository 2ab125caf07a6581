//! Configuration: the backend list file (§6, JSON) and the CLI that
//! points at it (§10.3), built the way the teacher's `curl` binary builds
//! its own argument parser (`src/bin/curl.rs`): `argparse`, with
//! `env_logger` wired up alongside it.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use argparse::{ArgumentParser, Store};
use serde::Deserialize;

use crate::error::Error;
use crate::pool::BackendAddr;

#[derive(Debug, Deserialize)]
struct BackendEntry {
    ip: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct BackendFile {
    backend_servers: Vec<BackendEntry>,
}

/// Loads the backend list (§2, §6): a JSON file of `{"ip": ..., "port":
/// ...}` entries. An empty or missing list is a startup error, not a
/// degraded run with zero backends.
pub fn load_backends(path: &str) -> Result<Vec<BackendAddr>, Error> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::ConfigLoad(format!("{}: {}", path, e)))?;
    let parsed: BackendFile = serde_json::from_str(&raw)?;
    if parsed.backend_servers.is_empty() {
        return Err(Error::ConfigLoad(format!("{}: backend_servers is empty", path)));
    }
    Ok(parsed
        .backend_servers
        .into_iter()
        .map(|e| BackendAddr::new(e.ip, e.port))
        .collect())
}

/// The readiness-wait timeout (§4.5: "bounded to allow shutdown signal
/// observation").
const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

pub struct Cli {
    pub backend_file: String,
    pub host: String,
    pub port: u16,
    pub poll_timeout_ms: u64,
}

impl Cli {
    pub fn parse() -> Cli {
        let mut backend_file = String::new();
        let mut host = "127.0.0.1".to_string();
        let mut port: u16 = 9000;
        let mut poll_timeout_ms: u64 = DEFAULT_POLL_TIMEOUT_MS;
        {
            let mut ap = ArgumentParser::new();
            ap.set_description("Single-threaded HTTP/1.1 reverse proxy with pipelining-safe ordering.");
            ap.refer(&mut backend_file).add_argument(
                "backends",
                Store,
                "Path to the backend list JSON file",
            ).required();
            ap.refer(&mut host).add_option(
                &["--host"],
                Store,
                "Address the proxy listens on (default 127.0.0.1)",
            );
            ap.refer(&mut port).add_option(
                &["--port"],
                Store,
                "Port the proxy listens on (default 9000)",
            );
            ap.refer(&mut poll_timeout_ms).add_option(
                &["--poll-timeout-ms"],
                Store,
                "Poll timeout in milliseconds (default 1000)",
            );
            ap.parse_args_or_exit();
        }
        Cli {
            backend_file,
            host,
            port,
            poll_timeout_ms,
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, Error> {
        let ip: IpAddr = self
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn loads_well_formed_backend_list() {
        let mut file = tempfile_with(
            br#"{"backend_servers": [{"ip": "127.0.0.1", "port": 9001}, {"ip": "127.0.0.1", "port": 9002}]}"#,
        );
        let backends = load_backends(file.path_str()).unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].port(), 9001);
        file.close();
    }

    #[test]
    fn empty_backend_list_is_a_config_error() {
        let mut file = tempfile_with(br#"{"backend_servers": []}"#);
        let err = load_backends(file.path_str()).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
        file.close();
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_backends("/nonexistent/pipeline-proxy-backends.json").unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let mut file = tempfile_with(b"not json");
        let err = load_backends(file.path_str()).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
        file.close();
    }

    struct TempFile {
        path: std::path::PathBuf,
    }

    impl TempFile {
        fn path_str(&self) -> &str {
            self.path.to_str().unwrap()
        }
        fn close(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn tempfile_with(contents: &[u8]) -> TempFile {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!(
            "pipeline-proxy-test-{}-{}.json",
            std::process::id(),
            n
        ));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        TempFile { path }
    }
}
