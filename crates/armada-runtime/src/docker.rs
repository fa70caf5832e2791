use crate::records::{
    strip_tag, Bindings, ContainerRecord, ContainerSummary, CreateSpec, ImageRecord, ImageSummary,
};
use crate::stream::FrameReader;
use crate::{ByteStream, Runtime, RuntimeError};
use std::time::Duration;
use ureq::http::Response;
use ureq::{Body, RequestBuilder};
use urlencoding::encode;

pub const API_VERSION: &str = "v1.41";

/// Docker Engine API client over plain HTTP.
///
/// Error statuses are mapped onto `RuntimeError`: 409 is a conflict, 404
/// while creating a container is a missing image, any other 404 is a
/// missing object. Connection failures are transport errors.
pub struct DockerClient {
    base: String,
    agent: ureq::Agent,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Create,
    Other,
}

impl DockerClient {
    /// `timeout` bounds each whole request, streams included.
    pub fn new(url: &str, timeout: Option<Duration>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build();
        Self {
            base: url.trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{API_VERSION}{path}", self.base)
    }

    fn check(
        &self,
        url: &str,
        op: Op,
        result: Result<Response<Body>, ureq::Error>,
    ) -> Result<Response<Body>, RuntimeError> {
        let mut resp = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(status_error(op, code, url, String::new()));
            }
            Err(e) => {
                return Err(RuntimeError::Transport {
                    url: url.to_owned(),
                    reason: e.to_string(),
                });
            }
        };
        let code = resp.status().as_u16();
        if code >= 400 {
            let body = resp.body_mut().read_to_string().unwrap_or_default();
            return Err(status_error(op, code, url, error_message(&body)));
        }
        Ok(resp)
    }

    fn get(&self, path: &str, query: Query<'_>) -> Result<Response<Body>, RuntimeError> {
        let url = self.url(path);
        tracing::debug!("GET {url} {query:?}");
        let result = with_query(self.agent.get(&url), query).call();
        self.check(&url, Op::Other, result)
    }

    fn post_empty(&self, path: &str, query: Query<'_>) -> Result<Response<Body>, RuntimeError> {
        let url = self.url(path);
        tracing::debug!("POST {url} {query:?}");
        let result = with_query(self.agent.post(&url), query).send_empty();
        self.check(&url, Op::Other, result)
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: Query<'_>,
    ) -> Result<T, RuntimeError> {
        let mut resp = self.get(path, query)?;
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| RuntimeError::Backend(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| RuntimeError::Serialization(e.to_string()))
    }

    fn stream(resp: Response<Body>) -> ByteStream {
        Box::new(resp.into_body().into_reader())
    }
}

fn status_error(op: Op, code: u16, url: &str, message: String) -> RuntimeError {
    let detail = if message.is_empty() {
        url.to_owned()
    } else {
        message.clone()
    };
    match code {
        409 => RuntimeError::Conflict(detail),
        404 if op == Op::Create => RuntimeError::ImageNotFound(detail),
        404 => RuntimeError::NotFound(detail),
        status => RuntimeError::Http {
            status,
            url: url.to_owned(),
            message,
        },
    }
}

/// The engine reports errors as `{"message": "..."}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Query parameters; ureq encodes them.
type Query<'a> = &'a [(&'a str, &'a str)];

fn with_query<B>(mut request: RequestBuilder<B>, query: Query<'_>) -> RequestBuilder<B> {
    for (key, value) in query {
        request = request.query(*key, *value);
    }
    request
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

impl Runtime for DockerClient {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.get_json("/containers/json", &[("all", flag(all))])
    }

    fn inspect(&self, container: &str) -> Result<ContainerRecord, RuntimeError> {
        self.get_json(&format!("/containers/{}/json", encode(container)), &[])
    }

    fn create(&self, spec: &CreateSpec) -> Result<String, RuntimeError> {
        let url = self.url("/containers/create");
        let body = serde_json::to_vec(&spec.body())
            .map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        tracing::debug!("POST {url} name={} ({} bytes)", spec.name, body.len());
        let result = self
            .agent
            .post(&url)
            .query("name", &spec.name)
            .header("Content-Type", "application/json")
            .send(&body[..]);
        let mut resp = self.check(&url, Op::Create, result)?;
        let text = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| RuntimeError::Backend(e.to_string()))?;
        let created: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| RuntimeError::Serialization(e.to_string()))?;
        created
            .get("Id")
            .and_then(|id| id.as_str())
            .map(str::to_owned)
            .ok_or_else(|| RuntimeError::Serialization(format!("create response without Id: {text}")))
    }

    fn start(&self, container: &str, bindings: &Bindings) -> Result<(), RuntimeError> {
        // Bindings travel in the create request; the engine rejects them here.
        tracing::trace!(
            "starting {container} with {} port and {} directory bindings",
            bindings.ports.len(),
            bindings.binds.len()
        );
        self.post_empty(&format!("/containers/{}/start", encode(container)), &[])?;
        Ok(())
    }

    fn stop(&self, container: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let seconds = timeout.as_secs().to_string();
        self.post_empty(
            &format!("/containers/{}/stop", encode(container)),
            &[("t", seconds.as_str())],
        )?;
        Ok(())
    }

    fn remove(&self, container: &str, force: bool) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/containers/{}", encode(container)));
        tracing::debug!("DELETE {url} force={force}");
        let result = self.agent.delete(&url).query("force", flag(force)).call();
        self.check(&url, Op::Other, result)?;
        Ok(())
    }

    fn list_images(&self, repository: &str) -> Result<Vec<ImageSummary>, RuntimeError> {
        let filter = serde_json::json!({ "reference": [repository] }).to_string();
        let images: Vec<ImageSummary> =
            self.get_json("/images/json", &[("filters", filter.as_str())])?;
        Ok(images
            .into_iter()
            .filter(|image| image.tags().iter().any(|t| strip_tag(t) == repository))
            .collect())
    }

    fn inspect_image(&self, reference: &str) -> Result<ImageRecord, RuntimeError> {
        self.get_json(&format!("/images/{}/json", encode(reference)), &[])
    }

    fn pull(&self, repository: &str, tag: &str) -> Result<ByteStream, RuntimeError> {
        let resp = self.post_empty("/images/create", &[("fromImage", repository), ("tag", tag)])?;
        Ok(Self::stream(resp))
    }

    fn push(&self, repository: &str, tag: &str) -> Result<ByteStream, RuntimeError> {
        let url = self.url(&format!("/images/{}/push", encode(repository)));
        tracing::debug!("POST {url} tag={tag}");
        // An empty auth object; registries needing credentials are out of reach.
        let result = self
            .agent
            .post(&url)
            .query("tag", tag)
            .header("X-Registry-Auth", "e30=")
            .send_empty();
        let resp = self.check(&url, Op::Other, result)?;
        Ok(Self::stream(resp))
    }

    fn build(
        &self,
        context: Vec<u8>,
        tag: &str,
        nocache: bool,
    ) -> Result<ByteStream, RuntimeError> {
        let url = self.url("/build");
        tracing::debug!(
            "POST {url} t={tag} nocache={nocache} ({} bytes of context)",
            context.len()
        );
        let result = self
            .agent
            .post(&url)
            .query("t", tag)
            .query("rm", "1")
            .query("nocache", flag(nocache))
            .header("Content-Type", "application/x-tar")
            .send(&context[..]);
        let resp = self.check(&url, Op::Other, result)?;
        Ok(Self::stream(resp))
    }

    fn attach(&self, container: &str) -> Result<ByteStream, RuntimeError> {
        let resp = self.post_empty(
            &format!("/containers/{}/attach", encode(container)),
            &[("stream", "1"), ("stdout", "1"), ("stderr", "1")],
        )?;
        Ok(Box::new(FrameReader::new(resp.into_body().into_reader())))
    }

    fn logs(&self, container: &str, follow: bool) -> Result<ByteStream, RuntimeError> {
        let resp = self.get(
            &format!("/containers/{}/logs", encode(container)),
            &[("stdout", "1"), ("stderr", "1"), ("follow", flag(follow))],
        )?;
        Ok(Box::new(FrameReader::new(resp.into_body().into_reader())))
    }
}
