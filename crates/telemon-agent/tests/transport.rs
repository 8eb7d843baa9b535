use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemon_agent::sender::BatchSender;
use telemon_agent::store::MetricStore;
use telemon_agent::transport::{GrpcTransport, HttpTransport, Transport, TransportError};
use telemon_common::compress::gunzip;
use telemon_common::crypto::{Decryptor, Encryptor};
use telemon_common::hash::{HashKey, HASH_HEADER};
use telemon_common::types::{Metric, MetricKind, MetricValue};
use telemon_server::grpc::{self, MetricsGrpc};
use telemon_server::service::MetricsService;
use telemon_server::state::AppState;
use telemon_storage::memory::MemStorage;
use telemon_storage::Storage;
use tokio_util::sync::CancellationToken;

type Captured = Arc<Mutex<Vec<(HeaderMap, Bytes)>>>;

#[derive(Clone)]
struct Capture {
    seen: Captured,
    status: StatusCode,
}

async fn capture(State(cap): State<Capture>, headers: HeaderMap, body: Bytes) -> StatusCode {
    cap.seen.lock().unwrap().push((headers, body));
    cap.status
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn capture_server(status: StatusCode) -> (SocketAddr, Captured) {
    let seen = Captured::default();
    let router = Router::new()
        .route("/updates/", post(capture))
        .with_state(Capture {
            seen: seen.clone(),
            status,
        });
    (serve(router).await, seen)
}

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn rsa_keypair() -> (Encryptor, Decryptor) {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public_pem = private
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let private_pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
    (
        Encryptor::from_pem(&public_pem).unwrap(),
        Decryptor::from_pem(&private_pem).unwrap(),
    )
}

fn timeout() -> Duration {
    Duration::from_secs(5)
}

#[tokio::test]
async fn http_request_carries_encoding_headers() {
    let (addr, seen) = capture_server(StatusCode::OK).await;
    let key = HashKey::new("secret");
    let transport = HttpTransport::new(&addr.to_string(), timeout())
        .unwrap()
        .with_real_ip(Some("10.0.0.7".into()))
        .with_hash_key(Some(key.clone()));

    let batch = vec![Metric::counter("PollCount", 4), Metric::gauge("Alloc", 1.5)];
    transport.send_updates(&batch).await.unwrap();

    let seen = seen.lock().unwrap();
    let (headers, body) = &seen[0];
    assert_eq!(headers["content-encoding"], "gzip");
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(headers["x-real-ip"], "10.0.0.7");
    let tag = headers[HASH_HEADER].to_str().unwrap();
    assert!(key.verify(body, tag).is_ok());

    let sent: Vec<Metric> = serde_json::from_slice(&gunzip(body).unwrap()).unwrap();
    assert_eq!(sent, batch);
}

#[tokio::test]
async fn http_status_classification() {
    let (addr, _) = capture_server(StatusCode::SERVICE_UNAVAILABLE).await;
    let transport = HttpTransport::new(&addr.to_string(), timeout()).unwrap();
    let err = transport
        .send_updates(&[Metric::counter("c", 1)])
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");

    let (addr, _) = capture_server(StatusCode::BAD_REQUEST).await;
    let transport = HttpTransport::new(&addr.to_string(), timeout()).unwrap();
    let err = transport
        .send_updates(&[Metric::counter("c", 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Permanent(_)), "{err}");
}

#[tokio::test]
async fn http_connection_refused_is_transient() {
    let transport = HttpTransport::new(&free_addr().to_string(), timeout()).unwrap();
    let err = transport
        .send_updates(&[Metric::counter("c", 1)])
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
}

fn memory_service() -> MetricsService {
    MetricsService::new(Storage::memory(MemStorage::ephemeral()))
}

#[tokio::test]
async fn agent_batches_reach_the_server_through_every_stage() {
    let (encryptor, decryptor) = rsa_keypair();
    let key = HashKey::new("shared");
    let service = memory_service();
    let mut state = AppState::new(service.clone());
    state.hash_key = Some(key.clone());
    state.decryptor = Some(Arc::new(decryptor));
    state.trusted_subnet = Some("127.0.0.0/8".parse().unwrap());
    let addr = serve(telemon_server::app::build_http_app(state)).await;

    let transport = HttpTransport::new(&addr.to_string(), timeout())
        .unwrap()
        .with_real_ip(Some("127.0.0.1".into()))
        .with_hash_key(Some(key))
        .with_encryptor(Some(encryptor));

    let store = Arc::new(MetricStore::new());
    let sender = BatchSender::new(store.clone(), Arc::new(transport), vec![]);
    let cancel = CancellationToken::new();

    store.add_counter("PollCount", 2);
    store.set_gauge("RandomValue", 0.25);
    assert_eq!(sender.send_once(&cancel).await.unwrap(), 2);

    store.add_counter("PollCount", 3);
    assert_eq!(sender.send_once(&cancel).await.unwrap(), 1);

    assert_eq!(
        service.value(MetricKind::Counter, "PollCount").await.unwrap(),
        MetricValue::Counter(5)
    );
    assert_eq!(
        service.value(MetricKind::Gauge, "RandomValue").await.unwrap(),
        MetricValue::Gauge(0.25)
    );
}

#[tokio::test]
async fn server_rejection_is_permanent_and_uncommitted() {
    let service = memory_service();
    let mut state = AppState::new(service.clone());
    state.trusted_subnet = Some("10.0.0.0/8".parse().unwrap());
    let addr = serve(telemon_server::app::build_http_app(state)).await;

    let transport = HttpTransport::new(&addr.to_string(), timeout())
        .unwrap()
        .with_real_ip(Some("127.0.0.1".into()));
    let store = Arc::new(MetricStore::new());
    store.add_counter("PollCount", 1);
    let sender = BatchSender::new(store.clone(), Arc::new(transport), vec![]);

    assert!(sender.send_once(&CancellationToken::new()).await.is_err());
    assert_eq!(store.uncommitted_diff().counters["PollCount"].delta, 1);
}

#[tokio::test]
async fn grpc_driver_updates_the_server() {
    let service = memory_service();
    let addr = free_addr();
    let grpc_service = grpc::server(MetricsGrpc::new(
        service.clone(),
        Some("127.0.0.0/8".parse().unwrap()),
    ));
    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(grpc_service)
            .serve_with_shutdown(addr, server_shutdown.cancelled_owned())
            .await
            .unwrap();
    });

    let transport = GrpcTransport::new(&addr.to_string(), timeout())
        .unwrap()
        .with_real_ip(Some("127.0.0.1".into()))
        .unwrap();
    let batch = vec![Metric::counter("PollCount", 7), Metric::gauge("FreeMemory", 1024.0)];

    // the listener may need a moment to come up
    let mut result = transport.send_updates(&batch).await;
    for _ in 0..20 {
        match &result {
            Err(e) if e.is_transient() => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                result = transport.send_updates(&batch).await;
            }
            _ => break,
        }
    }
    result.unwrap();

    assert_eq!(
        service.value(MetricKind::Counter, "PollCount").await.unwrap(),
        MetricValue::Counter(7)
    );

    let err = transport
        .send_updates(&[Metric::gauge("PollCount", 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Permanent(_)), "{err}");
    shutdown.cancel();
}
