//! DockerClient against a scripted fake engine on a random local port.

use armada_runtime::{
    drain_progress, Bindings, CreateSpec, DockerClient, Runtime, RuntimeError, StreamLines,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server, StatusCode};

/// A request as seen by the fake engine.
#[derive(Debug)]
struct Seen {
    method: String,
    url: String,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

/// Serve one canned `(status, body)` per request, in order, then stop.
fn fake_engine(replies: Vec<(u16, Vec<u8>)>) -> (String, mpsc::Receiver<Seen>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for (status, body) in replies {
            let Ok(mut req) = server.recv() else {
                return;
            };
            let mut seen = Vec::new();
            req.as_reader().read_to_end(&mut seen).unwrap();
            let _ = tx.send(Seen {
                method: req.method().to_string(),
                url: req.url().to_owned(),
                body: seen,
                headers: req
                    .headers()
                    .iter()
                    .map(|h| (h.field.to_string(), h.value.to_string()))
                    .collect(),
            });
            let header = Header::from_bytes("Content-Type", "application/json").unwrap();
            let _ = req.respond(
                Response::from_data(body)
                    .with_status_code(StatusCode(status))
                    .with_header(header),
            );
        }
    });
    (format!("http://127.0.0.1:{port}"), rx)
}

/// Path and decoded query parameters of a request URL.
fn split_url(url: &str) -> (&str, BTreeMap<String, String>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::decode(k).unwrap().into_owned(),
                urlencoding::decode(v).unwrap().into_owned(),
            )
        })
        .collect();
    (path, params)
}

fn client(url: &str) -> DockerClient {
    DockerClient::new(url, Some(Duration::from_secs(5)))
}

#[test]
fn list_containers_parses_summaries() {
    let body = br#"[{"Id":"abc","Names":["/web"],"Image":"nginx:latest","Status":"Up 2 hours",
        "Ports":[{"PrivatePort":80,"PublicPort":8080,"Type":"tcp"},{"PrivatePort":53,"Type":"udp"}]}]"#;
    let (url, seen) = fake_engine(vec![(200, body.to_vec())]);

    let containers = client(&url).list_containers(true).unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name(), Some("web"));
    assert_eq!(containers[0].status, "Up 2 hours");
    assert_eq!(containers[0].ports[0].public_port, Some(8080));
    assert_eq!(containers[0].ports[1].public_port, None);
    assert_eq!(containers[0].ports[1].protocol, "udp");

    let req = seen.recv().unwrap();
    assert_eq!(req.method, "GET");
    assert_eq!(req.url, "/v1.41/containers/json?all=1");
}

#[test]
fn create_sends_spec_and_returns_id() {
    let (url, seen) = fake_engine(vec![(201, br#"{"Id":"f00d","Warnings":[]}"#.to_vec())]);
    let spec = CreateSpec {
        name: "web".to_owned(),
        image: "nginx:1.25".to_owned(),
        hostname: "web-local".to_owned(),
        env: vec!["A=1".to_owned()],
        network_mode: "bridge".to_owned(),
        ..CreateSpec::default()
    };

    let id = client(&url).create(&spec).unwrap();
    assert_eq!(id, "f00d");

    let req = seen.recv().unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.url, "/v1.41/containers/create?name=web");
    let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
    assert_eq!(body["Image"], "nginx:1.25");
    assert_eq!(body["Env"][0], "A=1");
    assert_eq!(body["HostConfig"]["NetworkMode"], "bridge");
}

#[test]
fn create_conflict_and_missing_image_are_classified() {
    let (url, _seen) = fake_engine(vec![
        (409, br#"{"message":"Conflict. The container name \"/web\" is already in use"}"#.to_vec()),
        (404, br#"{"message":"No such image: nginx:9"}"#.to_vec()),
    ]);
    let c = client(&url);
    let spec = CreateSpec {
        name: "web".to_owned(),
        image: "nginx:9".to_owned(),
        ..CreateSpec::default()
    };

    let err = c.create(&spec).unwrap_err();
    assert!(err.is_conflict(), "{err}");
    let err = c.create(&spec).unwrap_err();
    assert!(err.is_missing_image(), "{err}");
    assert!(err.to_string().contains("No such image"));
}

#[test]
fn inspect_missing_container_is_not_found() {
    let (url, _seen) = fake_engine(vec![(404, br#"{"message":"No such container: x"}"#.to_vec())]);
    assert!(matches!(
        client(&url).inspect("x"),
        Err(RuntimeError::NotFound(_))
    ));
}

#[test]
fn server_errors_keep_status_and_message() {
    let (url, _seen) = fake_engine(vec![(500, br#"{"message":"driver failed"}"#.to_vec())]);
    match client(&url).start("web", &Bindings::default()) {
        Err(RuntimeError::Http {
            status, message, ..
        }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "driver failed");
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[test]
fn stop_and_remove_use_query_parameters() {
    let (url, seen) = fake_engine(vec![(204, Vec::new()), (204, Vec::new())]);
    let c = client(&url);
    c.stop("web", Duration::from_secs(7)).unwrap();
    c.remove("web", true).unwrap();

    let stop = seen.recv().unwrap();
    assert_eq!(stop.url, "/v1.41/containers/web/stop?t=7");
    let remove = seen.recv().unwrap();
    assert_eq!(remove.method, "DELETE");
    assert_eq!(remove.url, "/v1.41/containers/web?force=1");
}

#[test]
fn list_images_keeps_only_the_repository() {
    let body = br#"[
        {"Id":"sha256:1","RepoTags":["nginx:1.25","nginx:latest"]},
        {"Id":"sha256:2","RepoTags":["nginx-extra:1"]},
        {"Id":"sha256:3","RepoTags":null}
    ]"#;
    let (url, seen) = fake_engine(vec![(200, body.to_vec())]);
    let images = client(&url).list_images("nginx").unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, "sha256:1");

    let req = seen.recv().unwrap();
    let (path, query) = split_url(&req.url);
    assert_eq!(path, "/v1.41/images/json");
    let filters: serde_json::Value = serde_json::from_str(&query["filters"]).unwrap();
    assert_eq!(filters["reference"][0], "nginx");
}

#[test]
fn image_references_are_escaped_in_paths() {
    let body = br#"{"Id":"sha256:app","Config":{"Cmd":["serve"],"User":"app"}}"#;
    let (url, seen) = fake_engine(vec![(200, body.to_vec())]);
    let record = client(&url).inspect_image("localhost:5000/app:v1").unwrap();
    assert_eq!(record.id, "sha256:app");
    assert_eq!(record.command(), "serve");

    let req = seen.recv().unwrap();
    assert_eq!(req.url, "/v1.41/images/localhost%3A5000%2Fapp%3Av1/json");
}

#[test]
fn pull_stream_error_fails_the_operation() {
    let body = b"{\"status\":\"Pulling from library/nginx\"}\n{\"error\":\"manifest unknown\"}\n";
    let (url, seen) = fake_engine(vec![(200, body.to_vec())]);
    let stream = client(&url).pull("nginx", "9").unwrap();
    let err = drain_progress(stream, "pull", |_| {}).unwrap_err();
    assert!(err.to_string().contains("manifest unknown"));

    let req = seen.recv().unwrap();
    assert_eq!(req.url, "/v1.41/images/create?fromImage=nginx&tag=9");
}

#[test]
fn push_sends_registry_auth_header() {
    let (url, seen) = fake_engine(vec![(200, b"{\"status\":\"Pushed\"}\n".to_vec())]);
    let stream = client(&url).push("registry.example.com/team/app", "abc").unwrap();
    drain_progress(stream, "push", |_| {}).unwrap();

    let req = seen.recv().unwrap();
    assert_eq!(
        req.url,
        "/v1.41/images/registry.example.com%2Fteam%2Fapp/push?tag=abc"
    );
    assert!(req
        .headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("X-Registry-Auth") && v == "e30="));
}

#[test]
fn build_uploads_tar_context() {
    let body = b"{\"stream\":\"Step 1/1 : FROM busybox\\n\"}\n{\"aux\":{\"ID\":\"sha256:built\"}}\n";
    let (url, seen) = fake_engine(vec![(200, body.to_vec())]);
    let stream = client(&url)
        .build(b"context-bytes".to_vec(), "team/app:abc", true)
        .unwrap();
    let id = drain_progress(stream, "build", |_| {}).unwrap();
    assert_eq!(id.as_deref(), Some("sha256:built"));

    let req = seen.recv().unwrap();
    let (path, query) = split_url(&req.url);
    assert_eq!(path, "/v1.41/build");
    assert_eq!(query["t"], "team/app:abc");
    assert_eq!(query["rm"], "1");
    assert_eq!(query["nocache"], "1");
    assert_eq!(req.body, b"context-bytes");
    assert!(req
        .headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("Content-Type") && v == "application/x-tar"));
}

#[test]
fn logs_are_demultiplexed() {
    let mut body = vec![1, 0, 0, 0, 0, 0, 0, 6];
    body.extend_from_slice(b"hello\n");
    body.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 5]);
    body.extend_from_slice(b"oops\n");
    let (url, _seen) = fake_engine(vec![(200, body)]);

    let stream = client(&url).logs("web", false).unwrap();
    let lines: Vec<String> = StreamLines::new(stream).map(Result::unwrap).collect();
    assert_eq!(lines, vec!["hello", "oops"]);
}

#[test]
fn unreachable_engine_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = client(&format!("http://127.0.0.1:{port}"))
        .list_containers(true)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Transport { .. }), "{err}");
}
