//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use validatems::{
    AsyncHttpClient, HttpClientConfig, IntakePipeline, ScratchArea, SchemaValidator,
};

pub const NAMESPACE: &str = "http://www.ilsp.gr/META-XMLSchema";

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn valid_resource(&self) -> PathBuf {
        self.fixtures_dir.join("xml/valid/resource.xml")
    }

    pub fn invalid_resource(&self) -> PathBuf {
        self.fixtures_dir
            .join("xml/invalid/missing_identification.xml")
    }

    pub fn malformed_resource(&self) -> PathBuf {
        self.fixtures_dir.join("xml/malformed/not_well_formed.xml")
    }

    pub fn read(&self, path: PathBuf) -> Vec<u8> {
        std::fs::read(&path).unwrap_or_else(|e| panic!("missing fixture {}: {e}", path.display()))
    }
}

/// Pipeline over a fresh scratch directory with the real HTTP client
pub async fn pipeline(timeout_seconds: u64) -> (TempDir, IntakePipeline) {
    let dir = TempDir::new().unwrap();
    let scratch = ScratchArea::open(dir.path()).await.unwrap();
    let client = AsyncHttpClient::new(HttpClientConfig {
        timeout_seconds,
        ..Default::default()
    })
    .unwrap();

    let pipeline = IntakePipeline::new(
        scratch,
        Arc::new(client),
        Arc::new(SchemaValidator::bundled()),
    );
    (dir, pipeline)
}

/// Names of the entries left in a directory
pub fn entries(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Local HTTP server standing in for remote hosts
///
/// Routes, all under `/files/{name}`:
/// - `resource.xml`: conformant document, `text/xml; charset=utf-8`
/// - `broken.xml`: schema-invalid document, `application/xml`
/// - `page`: HTML page
/// - `untyped`: no `Content-Type` header
/// - `flaky.xml`: HEAD says XML, GET fails with 500
/// - anything else: 404
pub struct RemoteFixtureServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<(Method, String)>>>,
    handle: JoinHandle<()>,
}

struct ServerState {
    fixtures: TestFixtures,
    requests: Arc<Mutex<Vec<(Method, String)>>>,
}

impl RemoteFixtureServer {
    pub async fn start() -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(ServerState {
            fixtures: TestFixtures::new(),
            requests: Arc::clone(&requests),
        });

        let app = Router::new()
            .route("/files/{name}", get(serve_fixture))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/files/{}", self.addr, name)
    }

    /// Number of body requests made for `name`
    pub fn gets(&self, name: &str) -> usize {
        self.count(Method::GET, name)
    }

    /// Number of header-only requests made for `name`
    pub fn heads(&self, name: &str) -> usize {
        self.count(Method::HEAD, name)
    }

    fn count(&self, method: Method, name: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, n)| *m == method && n == name)
            .count()
    }
}

impl Drop for RemoteFixtureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_fixture(
    State(state): State<Arc<ServerState>>,
    method: Method,
    Path(name): Path<String>,
) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push((method.clone(), name.clone()));

    let typed = |content_type: &str, body: Vec<u8>| {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    };

    match name.as_str() {
        "resource.xml" => typed(
            "text/xml; charset=utf-8",
            state.fixtures.read(state.fixtures.valid_resource()),
        ),
        "broken.xml" => typed(
            "application/xml",
            state.fixtures.read(state.fixtures.invalid_resource()),
        ),
        "page" => typed("text/html", b"<html><body>Not XML</body></html>".to_vec()),
        "untyped" => Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("<a/>"))
            .unwrap(),
        "flaky.xml" if method == Method::HEAD => typed("text/xml", Vec::new()),
        "flaky.xml" => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .unwrap(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap(),
    }
}

/// A loopback URL nothing listens on
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/record.xml", addr)
}
