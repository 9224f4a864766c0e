//! Talks raw HTTP/1.1 to a running server over TCP and TLS.

use std::collections::HashMap;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use lightweight_web::config::{AuthConfig, TlsConfig, TlsProtocol};
use lightweight_web::{
    Content, FilesHandler, ResourceBundle, ResourcesHandler, Route, Router, Server, ServerConfig, StaticContent,
    handler_fn,
};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

const LOREM: &[u8] = include_bytes!("fixtures/loremIpsum.txt");
const LOREM_ETAG: &str = "\"db89bb5ceab87f9c0fcc2ab36c189c2c\"";
const LOREM_MD5: &str = "24m7XOq4f5wPzCqzbBicLA==";
const CREDENTIALS: &str = "Basic dGVzdDpURVNUdGVzdDEyMzQ1";

struct TestServer {
    server: Server,
    _dir: TempDir,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loremIpsum.txt"), LOREM).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/page.html"), "<p>sub</p>").unwrap();

        let router = Router::builder()
            .route(Route::builder("/files/", FilesHandler::new(dir.path())).attachment(true).build().unwrap())
            .route(
                Route::builder("/resources/", ResourcesHandler::new(ResourceBundle::new().with("loremIpsum.txt", LOREM)))
                    .cache_control("max-age=86400")
                    .content_md5(true)
                    .build()
                    .unwrap(),
            )
            .route(Route::builder("/loremIpsum.txt", StaticContent::new(LOREM, "text/plain")).build().unwrap())
            .route(
                Route::builder("/disabled.txt", StaticContent::new("now enabled", "text/plain"))
                    .enabled(false)
                    .build()
                    .unwrap(),
            )
            .route(
                Route::builder(
                    "/params.txt",
                    handler_fn(|req| {
                        let mut pairs: Vec<String> = req
                            .parameters()
                            .iter()
                            .flat_map(|(key, values)| values.iter().map(move |value| format!("{key}={value}")))
                            .collect();
                        pairs.sort();
                        Ok(Content::bytes(pairs.join("&")).with_content_type("text/plain"))
                    })
                    .with_methods([Method::GET, Method::POST]),
                )
                .build()
                .unwrap(),
            )
            .build()
            .unwrap();

        let server = Server::builder(config).router(router).build().unwrap();
        server.start().await.unwrap();
        Self { server, _dir: dir }
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr().unwrap()
    }

    async fn send(&self, request: &[u8]) -> Vec<u8> {
        let stream = TcpStream::connect(self.addr()).await.unwrap();
        exchange(stream, request).await
    }

    async fn get(&self, path: &str, headers: &str) -> Reply {
        let raw = self.send(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n{headers}\r\n").as_bytes()).await;
        Reply::parse(&raw)
    }

    async fn stop(self) {
        self.server.stop(Some(Duration::from_secs(1))).await;
    }
}

fn local_config() -> ServerConfig {
    ServerConfig { address: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 0, ..ServerConfig::default() }
}

async fn exchange<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw)).await.unwrap().unwrap();
    raw
}

#[derive(Debug)]
struct Reply {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Reply {
    /// Parses the first response in `raw`, skipping an interim 100.
    fn parse(raw: &[u8]) -> Self {
        Self::parse_one(raw).0
    }

    fn parse_one(raw: &[u8]) -> (Self, &[u8]) {
        let mut header_buf = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut header_buf);
        let head_len = match response.parse(raw).unwrap() {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => panic!("incomplete response: {}", String::from_utf8_lossy(raw)),
        };
        let status = response.code.unwrap();
        let headers: HashMap<String, String> = response
            .headers
            .iter()
            .map(|h| (h.name.to_ascii_lowercase(), String::from_utf8_lossy(h.value).into_owned()))
            .collect();
        let rest = &raw[head_len..];
        if status == 100 {
            return Self::parse_one(rest);
        }

        if headers.get("transfer-encoding").is_some_and(|te| te.eq_ignore_ascii_case("chunked")) {
            let (body, rest) = dechunk(rest);
            return (Self { status, headers, body }, rest);
        }
        let len = headers.get("content-length").map_or(0, |len| len.parse().unwrap());
        let len = len.min(rest.len());
        (Self { status, headers, body: rest[..len].to_vec() }, &rest[len..])
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn dechunk(mut raw: &[u8]) -> (Vec<u8>, &[u8]) {
    let mut body = Vec::new();
    loop {
        let line_end = raw.windows(2).position(|w| w == b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&raw[..line_end]).unwrap().trim(), 16).unwrap();
        raw = &raw[line_end + 2..];
        if size == 0 {
            return (body, &raw[2.min(raw.len())..]);
        }
        body.extend_from_slice(&raw[..size]);
        raw = &raw[size + 2..];
    }
}

fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(bytes).read_to_end(&mut decoded).unwrap();
    decoded
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn lorem_ipsum_and_conditional_get() {
    let server = TestServer::start(local_config()).await;

    let reply = server.get("/loremIpsum.txt", "").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("status"), Some("200 OK"));
    assert!(reply.header("date").is_some());
    assert_eq!(reply.header("content-type"), Some("text/plain"));
    assert_eq!(reply.header("content-length"), Some("445"));
    assert_eq!(reply.header("etag"), Some(LOREM_ETAG));
    assert_eq!(reply.body, LOREM);

    let reply = server.get("/loremIpsum.txt", &format!("If-None-Match: {LOREM_ETAG}\r\n")).await;
    assert_eq!(reply.status, 304);
    assert_eq!(reply.header("etag"), Some(LOREM_ETAG));
    assert!(reply.header("content-length").is_none());
    assert!(reply.body.is_empty());

    let reply = server.get("/resources/loremIpsum.txt", "").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("cache-control"), Some("max-age=86400"));
    assert_eq!(reply.header("content-md5"), Some(LOREM_MD5));
    assert_eq!(reply.header("etag"), Some(LOREM_ETAG));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn files_gzip_and_head() {
    let server = TestServer::start(local_config()).await;

    let reply = server.get("/files/loremIpsum.txt", "Accept-Encoding: gzip, deflate\r\n").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-encoding"), Some("gzip"));
    assert_eq!(reply.header("content-disposition"), Some("attachment; filename=\"loremIpsum.txt\""));
    assert_eq!(reply.header("etag"), Some(LOREM_ETAG));
    assert!(reply.header("content-md5").is_none());
    assert_eq!(gunzip(&reply.body), LOREM);
    let gzip_length = reply.header("content-length").map(str::to_string);

    let raw = server
        .send(b"HEAD /files/loremIpsum.txt HTTP/1.1\r\nAccept-Encoding: gzip\r\nConnection: close\r\n\r\n")
        .await;
    let head = Reply::parse(&raw);
    assert_eq!(head.status, 200);
    assert_eq!(head.header("content-encoding"), Some("gzip"));
    assert_eq!(head.header("content-length").map(str::to_string), gzip_length);
    assert_eq!(head.header("etag"), Some(LOREM_ETAG));
    assert!(head.body.is_empty());

    let reply = server.get("/files/sub/page.html", "").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-type"), Some("text/html"));
    assert_eq!(reply.text(), "<p>sub</p>");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn not_found_and_traversal() {
    let server = TestServer::start(local_config()).await;

    for path in ["/unmapped.txt", "/files/missing.txt", "/files/sub", "/files/../Cargo.toml", "/files/%2e%2e/Cargo.toml"] {
        let reply = server.get(path, "").await;
        assert_eq!(reply.status, 404, "{path}");
        assert_eq!(reply.header("status"), Some("404 Not Found"));
        assert!(reply.header("content-disposition").is_none());
        assert!(reply.header("etag").is_none());
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn disabled_route_can_be_enabled() {
    let server = TestServer::start(local_config()).await;

    assert_eq!(server.get("/disabled.txt", "").await.status, 403);
    server.server.route("/disabled.txt").unwrap().set_enabled(true);
    let reply = server.get("/disabled.txt", "").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "now enabled");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn basic_authentication() {
    let config = ServerConfig {
        auth: Some(AuthConfig {
            realm: "Test Realm".to_string(),
            username: "test".to_string(),
            password_hash: "92f1a57051141e9d24396bc42ae43b6500d13f8b".to_string(),
            algorithm: "SHA-1".to_string(),
        }),
        ..local_config()
    };
    let server = TestServer::start(config).await;

    let reply = server.get("/loremIpsum.txt", "").await;
    assert_eq!(reply.status, 401);
    assert_eq!(reply.header("www-authenticate"), Some("Basic realm=\"Test Realm\""));

    let reply = server.get("/loremIpsum.txt", "Authorization: Basic dGVzdDp3cm9uZw==\r\n").await;
    assert_eq!(reply.status, 401);

    let reply = server.get("/loremIpsum.txt", &format!("Authorization: {CREDENTIALS}\r\n")).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, LOREM);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn query_and_form_parameters() {
    let server = TestServer::start(local_config()).await;

    let reply = server.get("/params.txt?b=2&a=1&a=0", "").await;
    assert_eq!(reply.text(), "a=0&a=1&b=2");

    let raw = server
        .send(
            b"POST /params.txt?q=x HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\
              Content-Length: 13\r\nConnection: close\r\n\r\nname=lorem+ip",
        )
        .await;
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "name=lorem ip&q=x");

    let form = lightweight_web::encoding::gzip_bytes(b"zip=12345&name=m%C3%BCller").unwrap();
    let mut request = format!(
        "POST /params.txt HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\
         Content-Encoding: gzip\r\nContent-Length: {}\r\nExpect: 100-continue\r\nConnection: close\r\n\r\n",
        form.len()
    )
    .into_bytes();
    request.extend_from_slice(&form);
    let raw = server.send(&request).await;
    assert!(raw.starts_with(b"HTTP/1.1 100 Continue\r\n\r\n"));
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "name=müller&zip=12345");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn method_handling() {
    let server = TestServer::start(ServerConfig { trace_method_enabled: true, ..local_config() }).await;

    let raw = server.send(b"OPTIONS /loremIpsum.txt HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("allow"), Some("GET, HEAD, OPTIONS, TRACE"));

    let raw = server.send(b"DELETE /loremIpsum.txt HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 405);
    assert_eq!(reply.header("allow"), Some("GET, HEAD, OPTIONS, TRACE"));

    let raw = server.send(b"TRACE /loremIpsum.txt HTTP/1.1\r\nX-Echo: e2e\r\nConnection: close\r\n\r\n").await;
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-type"), Some("message/http"));
    assert!(reply.text().starts_with("TRACE /loremIpsum.txt HTTP/1.1\r\n"));
    assert!(reply.text().contains("x-echo: e2e\r\n"));

    server.stop().await;

    let server = TestServer::start(local_config()).await;
    let raw = server.send(b"TRACE /loremIpsum.txt HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(Reply::parse(&raw).status, 405);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn keep_alive_serves_pipelined_requests() {
    let server = TestServer::start(local_config()).await;

    let raw = server
        .send(b"GET /loremIpsum.txt HTTP/1.1\r\n\r\nGET /disabled.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await;
    let (first, rest) = Reply::parse_one(&raw);
    assert_eq!(first.status, 200);
    assert_eq!(first.body, LOREM);
    let (second, rest) = Reply::parse_one(rest);
    assert_eq!(second.status, 403);
    assert!(rest.is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn oversized_body_is_rejected() {
    let server = TestServer::start(ServerConfig { request_body_limit: 16, ..local_config() }).await;

    let raw = server
        .send(b"POST /params.txt HTTP/1.1\r\nContent-Length: 32\r\nConnection: close\r\n\r\naaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        .await;
    assert_eq!(Reply::parse(&raw).status, 413);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn garbage_request_line_gets_400() {
    let server = TestServer::start(local_config()).await;

    // `exchange` returning at all means the server closed the connection
    let raw = server.send(b"NOT A REQUEST\r\n\r\n").await;
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("connection"), Some("close"));
    assert_eq!(reply.header("status"), Some("400 Bad Request"));
    assert!(reply.header("date").is_some());

    assert_eq!(server.get("/loremIpsum.txt", "").await.status, 200);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn oversized_head_gets_431() {
    let server = TestServer::start(local_config()).await;

    // one byte over the 8KB head limit, all of it read before the server answers
    let mut head = b"GET /loremIpsum.txt HTTP/1.1\r\nX-Filler: ".to_vec();
    head.resize(8 * 1024 + 1, b'a');
    let raw = server.send(&head).await;
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 431);
    assert_eq!(reply.header("connection"), Some("close"));
    assert_eq!(reply.header("status"), Some("431 Request Header Fields Too Large"));
    assert!(reply.header("date").is_some());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn stalled_head_gets_408() {
    let config = ServerConfig { max_request_time: Duration::from_millis(500), ..local_config() };
    let server = TestServer::start(config).await;

    let raw = server.send(b"GET /loremIpsum.txt HTTP/1.1\r\nHost: loc").await;
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 408);
    assert_eq!(reply.header("connection"), Some("close"));
    assert_eq!(reply.header("status"), Some("408 Request Timeout"));
    assert!(reply.header("date").is_some());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn rejected_before_continue() {
    let config = ServerConfig {
        request_body_limit: 16,
        auth: Some(AuthConfig {
            realm: "Test Realm".to_string(),
            username: "test".to_string(),
            password_hash: "92f1a57051141e9d24396bc42ae43b6500d13f8b".to_string(),
            algorithm: "SHA-1".to_string(),
        }),
        ..local_config()
    };
    let server = TestServer::start(config).await;

    let raw = server.send(b"POST /params.txt HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n").await;
    assert!(!raw.starts_with(b"HTTP/1.1 100 Continue"));
    let reply = Reply::parse(&raw);
    assert_eq!(reply.status, 401);
    assert_eq!(reply.header("www-authenticate"), Some("Basic realm=\"Test Realm\""));

    let request = format!(
        "POST /params.txt HTTP/1.1\r\nAuthorization: {CREDENTIALS}\r\nExpect: 100-continue\r\nContent-Length: 64\r\n\r\n"
    );
    let raw = server.send(request.as_bytes()).await;
    assert!(!raw.starts_with(b"HTTP/1.1 100 Continue"));
    assert_eq!(Reply::parse(&raw).status, 413);

    server.stop().await;
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn serves_over_tls() {
    for protocol in [TlsProtocol::Tls, TlsProtocol::Tls12, TlsProtocol::Tls13] {
        let config = ServerConfig {
            tls: TlsConfig {
                enabled: true,
                cert_path: Some(fixture("localhost.cert.pem")),
                key_path: Some(fixture("localhost.key.pem")),
                protocol,
            },
            ..local_config()
        };
        let server = TestServer::start(config).await;

        let mut roots = RootCertStore::empty();
        let cert_pem = std::fs::read(fixture("localhost.cert.pem")).unwrap();
        for cert in rustls_pemfile::certs(&mut cert_pem.as_slice()) {
            roots.add(cert.unwrap()).unwrap();
        }
        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client_config));

        let tcp = TcpStream::connect(server.addr()).await.unwrap();
        let tls = connector.connect(ServerName::try_from("localhost").unwrap(), tcp).await.unwrap();
        let raw = exchange(tls, b"GET /loremIpsum.txt HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        let reply = Reply::parse(&raw);
        assert_eq!(reply.status, 200, "{protocol:?}");
        assert_eq!(reply.body, LOREM);

        server.stop().await;
    }
}
