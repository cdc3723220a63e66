use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use careerpath_sync::connectivity::{ChannelSignalSource, ConnectivitySignal, SignalSource};
use careerpath_sync::error::{DeliveryError, LoaderError};
use careerpath_sync::model::{ActionKind, ActionStatus, QueuedAction};
use careerpath_sync::probe::HttpProbe;
use careerpath_sync::remote::{DatasetLoader, Delivery, RemoteClient};
use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};

/// Minimal HTTP/1.1 server answering with scripted responses in order. Once
/// the script runs out the last response repeats.
struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    hits: Arc<AtomicUsize>,
}

impl StubServer {
    async fn start(script: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(script);

        let (requests_c, hits_c) = (Arc::clone(&requests), Arc::clone(&hits));
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let n = hits_c.fetch_add(1, Ordering::SeqCst);
                let (status, body) = script[n.min(script.len() - 1)];
                let requests = Arc::clone(&requests_c);
                tokio::spawn(async move {
                    let mut stream = stream;
                    let request = read_request(&mut stream).await;
                    requests.lock().await.push(request);
                    respond(stream, status, body).await;
                });
            }
        });

        Self {
            addr,
            requests,
            hits,
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    fn client(&self) -> RemoteClient {
        RemoteClient::new(&self.base_url(), Some("secret".into())).unwrap()
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn respond(mut stream: TcpStream, status: u16, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn action(kind: ActionKind) -> QueuedAction {
    QueuedAction {
        id: "3b9e".into(),
        kind,
        payload: json!({"answers": [1, 3, 2]}),
        status: ActionStatus::InFlight,
        attempts: 0,
        last_error: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

#[tokio::test]
async fn accepted_delivery_posts_to_kind_endpoint() {
    let server = StubServer::start(vec![(201, "{}")]).await;

    server
        .client()
        .deliver(&action(ActionKind::QuizSubmission))
        .await
        .unwrap();

    let requests = server.requests.lock().await;
    let request = requests[0].to_ascii_lowercase();
    assert!(request.starts_with("post /v1/actions/quiz-submission "), "{request}");
    assert!(request.contains("idempotency-key: 3b9e"));
    assert!(request.contains("authorization: bearer secret"));
    assert!(request.contains(r#"{"answers":[1,3,2]}"#));
}

#[tokio::test]
async fn conflict_counts_as_delivered() {
    let server = StubServer::start(vec![(409, r#"{"error":"duplicate"}"#)]).await;
    let res = server
        .client()
        .deliver(&action(ActionKind::ScholarshipSave))
        .await;
    assert!(res.is_ok(), "{res:?}");
}

#[tokio::test]
async fn server_error_is_a_delivery_failure() {
    let server = StubServer::start(vec![(503, "maintenance")]).await;
    let err = server
        .client()
        .deliver(&action(ActionKind::ProfileUpdate))
        .await
        .unwrap_err();
    match err {
        DeliveryError::Failed(msg) => {
            assert!(msg.contains("503"), "{msg}");
            assert!(msg.contains("maintenance"), "{msg}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_remote_is_a_delivery_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RemoteClient::new(&format!("http://{addr}"), None).unwrap();
    let err = client
        .deliver(&action(ActionKind::QuizSubmission))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Failed(_)), "{err}");
}

#[tokio::test]
async fn dataset_array_is_loaded() {
    let server = StubServer::start(vec![(200, r#"[{"id":1},{"id":2}]"#)]).await;
    let records = server.client().load("colleges").await.unwrap();
    assert_eq!(records, vec![json!({"id": 1}), json!({"id": 2})]);

    let requests = server.requests.lock().await;
    assert!(requests[0].starts_with("GET /v1/datasets/colleges "), "{}", requests[0]);
}

#[tokio::test]
async fn dataset_that_is_not_an_array_is_rejected() {
    let server = StubServer::start(vec![(200, r#"{"id":1}"#)]).await;
    let err = server.client().load("colleges").await.unwrap_err();
    match err {
        LoaderError::Failed(msg) => assert!(msg.contains("not a JSON array"), "{msg}"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn dataset_http_error_is_a_loader_failure() {
    let server = StubServer::start(vec![(404, "no such dataset")]).await;
    let err = server.client().load("quiz_questions").await.unwrap_err();
    assert!(matches!(err, LoaderError::Failed(ref msg) if msg.contains("404")), "{err}");
}

async fn next_signal(rx: &mut broadcast::Receiver<ConnectivitySignal>) -> ConnectivitySignal {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("no connectivity signal")
        .unwrap()
}

#[tokio::test]
async fn health_check_publishes_first_result_then_only_transitions() {
    let server = StubServer::start(vec![
        (200, "ok"),
        (200, "ok"),
        (503, "down"),
        (503, "down"),
        (200, "ok"),
    ])
    .await;
    let source = ChannelSignalSource::default();
    let mut rx = source.subscribe();

    let handle = HttpProbe::new(server.client(), source.clone(), Duration::from_millis(50)).spawn();

    assert_eq!(next_signal(&mut rx).await, ConnectivitySignal::Online);
    assert_eq!(next_signal(&mut rx).await, ConnectivitySignal::Offline);
    assert_eq!(next_signal(&mut rx).await, ConnectivitySignal::Online);

    // later health checks keep answering 200, which is not a transition
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;
    assert!(server.hits.load(Ordering::SeqCst) >= 6);
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}
