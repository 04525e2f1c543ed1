//! Control-plane client tests against a scripted mock panel.
//!
//! The mock answers each connection with the next canned response and
//! records what the client sent, so conditional-fetch and retry behavior
//! are observable request by request.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use anytls_panel::{Client, PanelError, TrafficCounter};

// ============================================================================
// Mock panel
// ============================================================================

#[derive(Clone)]
struct Canned {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl Canned {
    fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![],
            body: body.to_string(),
        }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            headers: vec![],
            body: String::new(),
        }
    }

    fn with_etag(mut self, etag: &str) -> Self {
        self.headers.push(("ETag", etag.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
struct Recorded {
    target: String,
    if_none_match: Option<String>,
    body: String,
}

struct MockPanel {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockPanel {
    async fn start(responses: Vec<Canned>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        tokio::spawn(async move {
            while let Ok((mut conn, _)) = listener.accept().await {
                let request = read_request(&mut conn).await;
                recorded.lock().unwrap().push(request);

                let canned = queue
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Canned::ok("{}"));

                let reason = match canned.status {
                    200 => "OK",
                    304 => "Not Modified",
                    403 => "Forbidden",
                    500 => "Internal Server Error",
                    _ => "Status",
                };
                let mut response = format!(
                    "HTTP/1.1 {} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    canned.status,
                    canned.body.len()
                );
                for (name, value) in &canned.headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(&canned.body);

                let _ = conn.write_all(response.as_bytes()).await;
                let _ = conn.shutdown().await;
            }
        });

        Self { addr, requests }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn client(&self) -> Client {
        Client::new(self.base_url(), "sekrit", 7, "anytls")
            .with_retry_delays(vec![Duration::ZERO; 3])
    }
}

async fn read_request(conn: &mut tokio::net::TcpStream) -> Recorded {
    let mut raw = Vec::new();
    let mut buf = [0u8; 2048];
    let header_end = loop {
        let n = conn.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break raw.len();
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let target = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();

    let mut if_none_match = None;
    let mut content_length = 0usize;
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "if-none-match" => if_none_match = Some(value.trim().to_string()),
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    let mut body = raw[header_end..].to_vec();
    while body.len() < content_length {
        let n = conn.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }

    Recorded {
        target,
        if_none_match,
        body: String::from_utf8_lossy(&body).to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn requests_carry_path_and_auth_query() {
    let panel = MockPanel::start(vec![Canned::ok(r#"{"users":[]}"#)]).await;
    let users = panel.client().fetch_users().await.unwrap();
    assert!(users.expect("fresh body, not 304").is_empty());
    let requests = panel.requests();
    assert_eq!(requests.len(), 1);
    let target = &requests[0].target;
    assert!(target.starts_with("/api/v1/server/UniProxy/user?"));
    assert!(target.contains("token=sekrit"));
    assert!(target.contains("node_id=7"));
    assert!(target.contains("node_type=anytls"));
}

#[tokio::test]
async fn etag_cycle_returns_no_change_and_keeps_validator() {
    let panel = MockPanel::start(vec![
        Canned::ok(r#"{"users":[{"id":1,"uuid":"u-1"}]}"#).with_etag("\"v1\""),
        Canned::status(304),
        Canned::status(304),
    ])
    .await;
    let client = panel.client();

    let first = client.fetch_users().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, 1);

    // 304: distinguishable "no change", not an empty list
    assert!(client.fetch_users().await.unwrap().is_none());
    assert!(client.fetch_users().await.unwrap().is_none());

    let requests = panel.requests();
    assert_eq!(requests[0].if_none_match, None);
    // validator sent verbatim, quotes included, and unchanged by the 304
    assert_eq!(requests[1].if_none_match.as_deref(), Some("\"v1\""));
    assert_eq!(requests[2].if_none_match.as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn fresh_body_restores_validator() {
    let panel = MockPanel::start(vec![
        Canned::ok(r#"{"users":[]}"#).with_etag("\"v1\""),
        Canned::ok(r#"{"users":[]}"#).with_etag("\"v2\""),
        Canned::status(304),
    ])
    .await;
    let client = panel.client();

    client.fetch_users().await.unwrap();
    client.fetch_users().await.unwrap();
    client.fetch_users().await.unwrap();

    let requests = panel.requests();
    assert_eq!(requests[1].if_none_match.as_deref(), Some("\"v1\""));
    assert_eq!(requests[2].if_none_match.as_deref(), Some("\"v2\""));
}

#[tokio::test]
async fn server_errors_retry_three_times() {
    let panel = MockPanel::start(vec![
        Canned::status(500),
        Canned::status(500),
        Canned::status(500),
        Canned::status(500),
    ])
    .await;
    let client = panel.client();

    let err = client.fetch_aliveness().await.unwrap_err();
    assert!(matches!(err, PanelError::Status(500)));
    assert_eq!(panel.requests().len(), 4, "initial attempt plus 3 retries");
}

#[tokio::test]
async fn client_errors_never_retry() {
    let panel = MockPanel::start(vec![Canned::status(403)]).await;
    let client = panel.client();

    let err = client.fetch_users().await.unwrap_err();
    assert!(matches!(err, PanelError::Status(403)));
    assert!(err.is_client_error());
    assert_eq!(panel.requests().len(), 1);
}

#[tokio::test]
async fn success_stops_the_retry_loop() {
    let panel = MockPanel::start(vec![Canned::status(500), Canned::ok(r#"{"alive":{}}"#)]).await;
    let client = panel.client();

    assert!(client.fetch_aliveness().await.unwrap().is_empty());
    assert_eq!(panel.requests().len(), 2);
}

#[tokio::test]
async fn push_traffic_keys_are_decimal_strings() {
    let panel = MockPanel::start(vec![Canned::ok("")]).await;
    let client = panel.client();

    let data = HashMap::from([(1i64, [1024u64, 2048u64])]);
    client.push_traffic(&data).await.unwrap();

    let requests = panel.requests();
    assert!(requests[0].target.starts_with("/api/v1/server/UniProxy/push?"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body, serde_json::json!({"1": [1024, 2048]}));
}

#[tokio::test]
async fn empty_pushes_are_noops() {
    // nothing listens here; an empty push must not even try
    let client = Client::new("http://127.0.0.1:1", "t", 1, "anytls")
        .with_retry_delays(vec![Duration::ZERO; 3]);
    client.push_traffic(&HashMap::new()).await.unwrap();
    client.push_alive(&HashMap::new()).await.unwrap();
}

#[tokio::test]
async fn push_alive_sends_suffixed_addresses() {
    let panel = MockPanel::start(vec![Canned::ok("")]).await;
    let client = panel.client();

    let data = HashMap::from([(3i64, vec!["10.0.0.5_7".to_string()])]);
    client.push_alive(&data).await.unwrap();

    let body: serde_json::Value = serde_json::from_str(&panel.requests()[0].body).unwrap();
    assert_eq!(body, serde_json::json!({"3": ["10.0.0.5_7"]}));
}

#[tokio::test]
async fn aliveness_skips_non_integer_keys() {
    let panel =
        MockPanel::start(vec![Canned::ok(r#"{"alive":{"1":3,"bogus":9,"2":0}}"#)]).await;
    let counts = panel.client().fetch_aliveness().await.unwrap();
    assert_eq!(counts, HashMap::from([(1, 3), (2, 0)]));
}

#[tokio::test]
async fn fetch_config_installs_padding_scheme() {
    let panel = MockPanel::start(vec![Canned::ok(
        r#"{"server_port":9443,"padding_scheme":["stop=4","0=50-100"],
            "base_config":{"push_interval":30,"pull_interval":45}}"#,
    )])
    .await;

    let config = panel.client().fetch_config().await.unwrap();
    assert_eq!(config.server_port, 9443);
    assert_eq!(config.base_config.push_interval, 30);
    assert_eq!(config.base_config.pull_interval, 45);
    assert_eq!(anytls_session::current_scheme().stop(), 4);

    // leave a harmless scheme behind for any other test in this process
    assert!(anytls_session::update_padding_scheme(b"stop=0"));
}

#[tokio::test]
async fn failed_push_rolls_traffic_back() {
    let panel = MockPanel::start(vec![
        Canned::status(500),
        Canned::status(500),
        Canned::status(500),
        Canned::status(500),
    ])
    .await;
    let client = panel.client();

    let counter = TrafficCounter::new();
    counter.add(1, 1024, 2048);
    counter.add(2, 0, 512);

    let snapshot = counter.snapshot();
    assert!(client.push_traffic(&snapshot).await.is_err());
    counter.merge(&snapshot);

    let next = counter.snapshot();
    assert_eq!(next.len(), 2);
    assert_eq!(next[&1], [1024, 2048]);
    assert_eq!(next[&2], [0, 512]);
}
