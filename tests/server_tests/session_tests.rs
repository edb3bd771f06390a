//! Session Tests
//!
//! These tests drive a full session against a scripted backend and verify:
//! - The banner comes first and lists the configured commands
//! - Hits, misses and backend failures map onto the right responses
//! - Request errors never end the session; framing errors do
//! - Every request is answered exactly once, in any order

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cacheprog::metrics::MetricsScope;
use cacheprog::protocol::{read_response, write_request, Request, Response};
use cacheprog::service::CancelToken;
use cacheprog::{
    CacheEntry, CacheError, CacheService, Capabilities, Config, Object, RequestContext, Result,
    Server,
};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;

// =============================================================================
// Scripted Backend
// =============================================================================

const TEST_OBJECT: &str = "0b1ec7";

struct FakeService {
    capabilities: Capabilities,
    object_path: PathBuf,
    scratch: PathBuf,
    closes: AtomicUsize,
    metrics_set: AtomicBool,
    bodies: Mutex<Vec<(String, Vec<u8>)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl FakeService {
    fn new(temp: &TempDir) -> Self {
        let object_path = temp.path().join(TEST_OBJECT);
        fs::write(&object_path, b"xyzzy").unwrap();
        fs::File::options()
            .write(true)
            .open(&object_path)
            .unwrap()
            .set_modified(object_time())
            .unwrap();

        let scratch = temp.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();

        Self {
            capabilities: Capabilities::ALL,
            object_path,
            scratch,
            closes: AtomicUsize::new(0),
            metrics_set: AtomicBool::new(false),
            bodies: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn entry(&self, object_id: &str, disk_path: PathBuf) -> Option<CacheEntry> {
        Some(CacheEntry {
            object_id: object_id.to_string(),
            disk_path,
        })
    }
}

impl CacheService for FakeService {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn get(&self, ctx: &RequestContext, action_id: &str) -> Result<Option<CacheEntry>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            // Later requests finish first
            let factor = 10 - (ctx.request_id() % 10) as u32;
            std::thread::sleep(self.delay * factor);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match action_id {
            "02" => Ok(self.entry(TEST_OBJECT, self.object_path.clone())),
            "99" => Err(CacheError::Backend("erroneous condition".to_string())),
            "05" => Ok(self.entry("", self.object_path.clone())),
            "06" => Ok(self.entry("not-hex", self.object_path.clone())),
            "07" => Ok(self.entry(TEST_OBJECT, self.scratch.clone())),
            "08" => Ok(self.entry(TEST_OBJECT, self.scratch.join("gone"))),
            _ => Ok(None),
        }
    }

    fn put(&self, _ctx: &RequestContext, object: &mut Object) -> Result<PathBuf> {
        // Read only part of the body; the server drains the rest.
        let mut first = [0u8; 1];
        let n = object.body.read(&mut first)?;
        self.bodies
            .lock()
            .push((object.action_id.clone(), first[..n].to_vec()));

        match object.action_id.as_str() {
            "0e" => Err(CacheError::Backend("disk full".to_string())),
            "0f" => Ok(self.scratch.join("never-written")),
            _ => Ok(self.object_path.clone()),
        }
    }

    fn close(&self, _ctx: &RequestContext) -> Result<()> {
        let n = self.closes.fetch_add(1, Ordering::SeqCst);
        if n > 0 {
            return Err(CacheError::Backend("closed twice".to_string()));
        }
        Ok(())
    }

    fn set_metrics(&self, scope: &MetricsScope) {
        self.metrics_set.store(true, Ordering::SeqCst);
        scope.counter("fake_counter").incr();
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn object_time() -> SystemTime {
    Utc.with_ymd_and_hms(2024, 8, 17, 14, 42, 45).unwrap().into()
}

fn encode(requests: &[(Request, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (request, body) in requests {
        write_request(&mut buf, request, body).unwrap();
    }
    buf
}

/// Run a session over `input`; returns the session result, the banner and
/// the remaining responses keyed by id
fn run_session(
    server: &Server,
    input: Vec<u8>,
) -> (Result<()>, Response, HashMap<i64, Response>) {
    let mut output = Vec::new();
    let result = server.run(Cursor::new(input), &mut output);

    let mut reader = Cursor::new(output);
    let banner = read_response(&mut reader).unwrap().expect("banner");
    let mut responses = HashMap::new();
    while let Some(response) = read_response(&mut reader).unwrap() {
        let id = response.id;
        assert!(
            responses.insert(id, response).is_none(),
            "duplicate response for id {}",
            id
        );
    }
    (result, banner, responses)
}

fn server_for(service: Arc<FakeService>, max_requests: usize) -> Server {
    let config = Config::builder().max_requests(max_requests).build();
    Server::new(config, service)
}

// =============================================================================
// Banner Tests
// =============================================================================

#[test]
fn test_banner_lists_configured_commands() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 2);

    let (result, banner, responses) = run_session(&server, Vec::new());

    result.unwrap();
    assert_eq!(banner, Response::banner(vec!["get".into(), "put".into(), "close".into()]));
    assert!(responses.is_empty());
}

#[test]
fn test_banner_omits_unconfigured_commands() {
    let temp = TempDir::new().unwrap();
    let service = FakeService::new(&temp).with_capabilities(Capabilities {
        get: true,
        put: false,
        close: false,
    });
    let server = server_for(Arc::new(service), 2);

    let (_, banner, _) = run_session(&server, Vec::new());
    assert_eq!(banner.known_commands, vec!["get".to_string()]);
    assert_eq!(banner.id, 0);
}

// =============================================================================
// Full Program
// =============================================================================

#[test]
fn test_server_program() {
    let temp = TempDir::new().unwrap();
    let service = Arc::new(FakeService::new(&temp));
    let server = server_for(Arc::clone(&service), 4);
    let object_path = temp.path().join(TEST_OBJECT);

    let input = encode(&[
        (Request::get(1, vec![0x01]), b""),
        (Request::get(2, vec![0x02]), b""),
        (Request::get(3, vec![0x99]), b""),
        (Request::put(4, vec![0x03], vec![0x0b, 0x1e, 0xc7], 5), b"xyzzy"),
        (Request::close(999), b""),
    ]);
    let (result, _, responses) = run_session(&server, input);
    result.unwrap();

    let mut expected = HashMap::new();
    expected.insert(1, Response::miss(1));
    expected.insert(
        2,
        Response {
            id: 2,
            object_id: vec![0x0b, 0x1e, 0xc7],
            size: 5,
            time: Some(Utc.with_ymd_and_hms(2024, 8, 17, 14, 42, 45).unwrap()),
            disk_path: Some(object_path.clone()),
            ..Response::default()
        },
    );
    expected.insert(3, Response::error(3, "get 99: erroneous condition"));
    expected.insert(
        4,
        Response {
            disk_path: Some(object_path),
            ..Response::ok(4)
        },
    );
    expected.insert(999, Response::ok(999));
    assert_eq!(responses, expected);

    assert_eq!(service.closes.load(Ordering::SeqCst), 1);
    assert!(service.metrics_set.load(Ordering::SeqCst));
    assert_eq!(
        service.bodies.lock().as_slice(),
        &[("03".to_string(), b"x".to_vec())]
    );

    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.server["get_requests"], 3);
    assert_eq!(snapshot.server["get_hits"], 1);
    assert_eq!(snapshot.server["get_hit_bytes"], 5);
    assert_eq!(snapshot.server["get_misses"], 1);
    assert_eq!(snapshot.server["get_errors"], 1);
    assert_eq!(snapshot.server["put_requests"], 1);
    assert_eq!(snapshot.server["put_bytes"], 5);
    assert_eq!(snapshot.server["put_errors"], 0);
    assert_eq!(snapshot.host["fake_counter"], 1);
}

// =============================================================================
// get Tests
// =============================================================================

#[test]
fn test_get_validates_backend_results() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 4);

    let input = encode(&[
        (Request::get(5, vec![0x05]), b""),
        (Request::get(6, vec![0x06]), b""),
        (Request::get(7, vec![0x07]), b""),
        (Request::get(8, vec![0x08]), b""),
    ]);
    let (result, _, responses) = run_session(&server, input);
    result.unwrap();

    assert_eq!(responses[&5].err.as_deref(), Some("get: empty object ID"));
    assert!(responses[&6]
        .err
        .as_deref()
        .unwrap()
        .starts_with("get: invalid object ID"));
    assert!(responses[&7]
        .err
        .as_deref()
        .unwrap()
        .contains("not a regular file"));
    // A vanished object file is a miss, not an error
    assert_eq!(responses[&8], Response::miss(8));
}

#[test]
fn test_get_without_hook_is_miss() {
    let temp = TempDir::new().unwrap();
    let service = FakeService::new(&temp).with_capabilities(Capabilities {
        get: false,
        put: true,
        close: true,
    });
    let server = server_for(Arc::new(service), 2);

    let input = encode(&[(Request::get(1, vec![0x02]), b"")]);
    let (result, _, responses) = run_session(&server, input);
    result.unwrap();
    assert_eq!(responses[&1], Response::miss(1));
}

// =============================================================================
// put Tests
// =============================================================================

#[test]
fn test_put_errors_are_per_request() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 1);

    let input = encode(&[
        (Request::put(1, vec![0x0e], vec![0xaa], 5), b"xyzzy"),
        (Request::put(2, vec![0x0f], vec![0xaa], 5), b"xyzzy"),
        // Backend reports the 5-byte test object for a 3-byte body
        (Request::put(3, vec![0x03], vec![0xaa], 3), b"abc"),
        (Request::put(4, vec![0x03], vec![0x0b, 0x1e, 0xc7], 5), b"xyzzy"),
    ]);
    let (result, _, responses) = run_session(&server, input);
    result.unwrap();

    assert_eq!(responses[&1].err.as_deref(), Some("put 0e: disk full"));
    assert!(responses[&2]
        .err
        .as_deref()
        .unwrap()
        .starts_with("put action 0f verify"));
    let mismatch = responses[&3].err.as_deref().unwrap();
    assert!(mismatch.starts_with("put action 03 verify"), "{}", mismatch);
    assert!(mismatch.ends_with("got 5 bytes, want 3"), "{}", mismatch);
    assert!(!responses[&4].is_error());

    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.server["put_requests"], 4);
    assert_eq!(snapshot.server["put_errors"], 3);
}

#[test]
fn test_put_without_hook_is_read_only() {
    let temp = TempDir::new().unwrap();
    let service = FakeService::new(&temp).with_capabilities(Capabilities {
        get: true,
        put: false,
        close: false,
    });
    let server = server_for(Arc::new(service), 2);

    let input = encode(&[
        (Request::put(1, vec![0x03], vec![0xaa], 5), b"xyzzy"),
        (Request::get(2, vec![0x01]), b""),
    ]);
    let (result, _, responses) = run_session(&server, input);
    result.unwrap();

    assert_eq!(responses[&1].err.as_deref(), Some("put: cache is read-only"));
    assert_eq!(responses[&2], Response::miss(2));
}

// =============================================================================
// close / unknown Tests
// =============================================================================

#[test]
fn test_close_hook_runs_once() {
    let temp = TempDir::new().unwrap();
    let service = Arc::new(FakeService::new(&temp));
    let server = server_for(Arc::clone(&service), 1);

    let input = encode(&[(Request::close(1), b""), (Request::close(2), b"")]);
    let (result, _, responses) = run_session(&server, input);
    result.unwrap();

    assert_eq!(responses[&1], Response::ok(1));
    assert_eq!(responses[&2], Response::ok(2));
    assert_eq!(service.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unknown_command_is_request_error() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 2);

    let mut input = br#"{"ID":1,"Command":"frob"}"#.to_vec();
    input.push(b'\n');
    input.extend(encode(&[(Request::get(2, vec![0x01]), b"")]));

    let (result, _, responses) = run_session(&server, input);
    result.unwrap();
    assert_eq!(responses[&1].err.as_deref(), Some(r#"unknown command "frob""#));
    assert_eq!(responses[&2], Response::miss(2));
}

// =============================================================================
// Framing Tests
// =============================================================================

#[test]
fn test_body_size_mismatch_is_fatal() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 2);

    let mut input = encode(&[(Request::get(1, vec![0x01]), b"")]);
    // Declares 5 bytes, sends 3
    let put = Request::put(2, vec![0x03], vec![0xaa], 5);
    input.extend(cacheprog::protocol::encode_request(&put).unwrap());
    input.extend(cacheprog::protocol::encode_body(b"abc").unwrap());
    input.extend(encode(&[(Request::get(3, vec![0x01]), b"")]));

    let (result, _, responses) = run_session(&server, input);

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "request 2 body: got 3 bytes, want 5");
    // Accepted before the failure: answered. After: never decoded.
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[&1], Response::miss(1));
}

#[test]
fn test_malformed_record_is_fatal() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 2);

    let (result, _, responses) = run_session(&server, b"{\"ID\":1,\"Command\":\n".to_vec());
    assert!(matches!(result, Err(CacheError::Decode(_))));
    assert!(responses.is_empty());
}

#[test]
fn test_missing_body_is_fatal() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 2);

    let put = Request::put(1, vec![0x03], vec![0xaa], 5);
    let input = cacheprog::protocol::encode_request(&put).unwrap();
    let (result, _, _) = run_session(&server, input);
    assert!(matches!(result, Err(CacheError::Protocol(_))));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_out_of_order_responses_are_correlated() {
    let temp = TempDir::new().unwrap();
    let service = Arc::new(FakeService::new(&temp).with_delay(Duration::from_millis(2)));
    let server = server_for(Arc::clone(&service), 4);

    let requests: Vec<(Request, &[u8])> = (1..=40)
        .map(|id| (Request::get(id, vec![0x02]), &b""[..]))
        .collect();
    let mut output = Vec::new();
    server
        .run(Cursor::new(encode(&requests)), &mut output)
        .unwrap();

    let mut reader = Cursor::new(output);
    let banner = read_response(&mut reader).unwrap().unwrap();
    assert_eq!(banner.id, 0);

    let mut order = Vec::new();
    while let Some(response) = read_response(&mut reader).unwrap() {
        assert!(!response.is_error());
        order.push(response.id);
    }
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=40).collect::<Vec<_>>());

    let peak = service.peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency {} exceeds limit", peak);
}

#[test]
fn test_shutdown_stops_accepting() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 2);
    server.shutdown();

    let (result, banner, responses) =
        run_session(&server, encode(&[(Request::get(1, vec![0x01]), b"")]));
    result.unwrap();
    assert_eq!(banner.id, 0);
    assert!(responses.is_empty());
    assert!(server.cancel_token().is_cancelled());
}

/// Input that cancels `token` once its first part has been consumed,
/// as if shutdown arrived while the next read was blocked
struct CancelMidRead {
    first: Cursor<Vec<u8>>,
    rest: Cursor<Vec<u8>>,
    token: CancelToken,
}

impl CancelMidRead {
    fn in_first(&self) -> bool {
        (self.first.position() as usize) < self.first.get_ref().len()
    }
}

impl Read for CancelMidRead {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for CancelMidRead {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if self.in_first() {
            self.first.fill_buf()
        } else {
            self.token.cancel();
            self.rest.fill_buf()
        }
    }

    fn consume(&mut self, amt: usize) {
        if self.in_first() {
            self.first.consume(amt)
        } else {
            self.rest.consume(amt)
        }
    }
}

#[test]
fn test_shutdown_during_read_drops_next_request() {
    let temp = TempDir::new().unwrap();
    let server = server_for(Arc::new(FakeService::new(&temp)), 1);

    let input = CancelMidRead {
        first: Cursor::new(encode(&[(Request::get(1, vec![0x01]), b"")])),
        rest: Cursor::new(encode(&[(Request::get(2, vec![0x01]), b"")])),
        token: server.cancel_token(),
    };
    let mut output = Vec::new();
    server.run(input, &mut output).unwrap();

    let mut reader = Cursor::new(output);
    assert_eq!(read_response(&mut reader).unwrap().unwrap().id, 0);
    assert_eq!(read_response(&mut reader).unwrap(), Some(Response::miss(1)));
    assert!(read_response(&mut reader).unwrap().is_none());
}
