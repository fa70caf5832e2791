//! In-memory runtime for tests and dry runs.
//!
//! Containers move through the same status texts the engine reports
//! (`Created`, `Up ...`, `Exited (0) ...`). Every call is recorded so tests
//! can assert exactly which operations a reconciliation issued.

use crate::records::{
    parse_env, strip_tag, Bindings, ContainerConfig, ContainerRecord, ContainerState,
    ContainerSummary, CreateSpec, HostConfig, ImageConfig, ImageRecord, ImageSummary, Mount,
    PortSummary,
};
use crate::{ByteStream, Runtime, RuntimeError};
use std::collections::{BTreeMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const STATUS_CREATED: &str = "Created";
pub const STATUS_UP: &str = "Up Less than a second";
pub const STATUS_EXITED: &str = "Exited (0) Less than a second ago";

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListContainers,
    Inspect(String),
    Create(String),
    Start(String),
    Stop(String),
    Remove { container: String, force: bool },
    ListImages(String),
    InspectImage(String),
    Pull(String),
    Push(String),
    Build(String),
    Attach(String),
    Logs(String),
}

impl Call {
    /// Whether the call changes runtime state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Create(_)
                | Call::Start(_)
                | Call::Stop(_)
                | Call::Remove { .. }
                | Call::Pull(_)
                | Call::Push(_)
                | Call::Build(_)
        )
    }
}

/// Applied to the record of a container created by a racing client.
type RaceEdit = Box<dyn FnOnce(&mut ContainerRecord) + Send>;

struct MockContainer {
    record: ContainerRecord,
    status: String,
}

#[derive(Default)]
struct State {
    containers: Vec<MockContainer>,
    images: Vec<ImageRecord>,
    pullable: BTreeMap<String, ImageRecord>,
    create_failures: VecDeque<RuntimeError>,
    race: Option<RaceEdit>,
    uncached_builds: Vec<String>,
    outputs: BTreeMap<String, Vec<u8>>,
    calls: Vec<Call>,
    counter: u64,
}

impl State {
    fn find(&self, container: &str) -> Option<usize> {
        self.containers.iter().position(|c| {
            c.record.id == container || c.record.name.trim_start_matches('/') == container
        })
    }

    fn find_image(&self, reference: &str) -> Option<&ImageRecord> {
        let tagged = qualify(reference);
        self.images.iter().find(|image| {
            image.id == reference
                || image
                    .repo_tags
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|t| *t == tagged)
        })
    }

    /// Register `image`, moving `reference` away from any image that held it.
    fn store_image(&mut self, reference: &str, mut image: ImageRecord) {
        let tagged = qualify(reference);
        for other in &mut self.images {
            if let Some(tags) = other.repo_tags.as_mut() {
                tags.retain(|t| *t != tagged);
            }
        }
        if let Some(existing) = self.images.iter_mut().find(|i| i.id == image.id) {
            existing.repo_tags.get_or_insert_with(Vec::new).push(tagged);
            return;
        }
        image.repo_tags = Some(vec![tagged]);
        self.images.push(image);
    }

    /// Create a container from `spec` in state `Created`.
    fn materialize(&mut self, spec: &CreateSpec) -> Result<String, RuntimeError> {
        let image = self
            .find_image(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::ImageNotFound(format!("no such image: {}", spec.image)))?;

        let mut env = image.config.env.clone().unwrap_or_default();
        let declared = parse_env(&spec.env);
        env.retain(|entry| {
            let key = entry.split_once('=').map_or(entry.as_str(), |(k, _)| k);
            !declared.contains_key(key)
        });
        env.extend(spec.env.iter().cloned());

        let id = self.next_id(&spec.name);
        let record = ContainerRecord {
            id: id.clone(),
            name: format!("/{}", spec.name),
            image: image.id.clone(),
            config: ContainerConfig {
                image: spec.image.clone(),
                cmd: spec.cmd.clone().or_else(|| image.config.cmd.clone()),
                env: Some(env),
                user: spec.user.clone().unwrap_or(image.config.user.clone()),
                hostname: spec.hostname.clone(),
                exposed_ports: Some(
                    spec.exposed_ports
                        .iter()
                        .map(|p| (p.clone(), serde_json::json!({})))
                        .collect(),
                ),
            },
            host_config: HostConfig {
                memory: spec.memory,
                network_mode: spec.network_mode.clone(),
                privileged: spec.privileged,
                port_bindings: Some(spec.bindings.port_bindings()),
                binds: Some(spec.bindings.bind_specs()),
            },
            mounts: spec
                .bindings
                .binds
                .iter()
                .map(|b| Mount {
                    kind: "bind".to_owned(),
                    name: None,
                    source: b.host.clone(),
                    destination: b.dest.clone(),
                    rw: !b.ro,
                })
                .collect(),
            state: ContainerState {
                status: "created".to_owned(),
                running: false,
            },
        };
        self.containers.push(MockContainer {
            record,
            status: STATUS_CREATED.to_owned(),
        });
        Ok(id)
    }

    fn next_id(&mut self, seed: &str) -> String {
        self.counter += 1;
        blake3::hash(format!("{seed}:{}", self.counter).as_bytes())
            .to_hex()
            .to_string()
    }
}

/// `repo` means `repo:latest`.
fn qualify(reference: &str) -> String {
    if strip_tag(reference) == reference && !reference.starts_with("sha256:") {
        format!("{reference}:latest")
    } else {
        reference.to_owned()
    }
}

/// Clones share their state, so a test can keep a handle on a runtime it
/// handed over to a fleet.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<State>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::Backend(format!("mutex poisoned: {e}")))
    }

    fn record(&self, call: Call) -> Result<MutexGuard<'_, State>, RuntimeError> {
        let mut state = self.state()?;
        state.calls.push(call);
        Ok(state)
    }

    /// Make `reference` (`repo:tag`) available locally.
    pub fn add_image(&self, reference: &str, record: ImageRecord) {
        if let Ok(mut state) = self.state() {
            state.store_image(reference, record);
        }
    }

    #[must_use]
    pub fn with_image(self, reference: &str, id: &str) -> Self {
        self.add_image(reference, image_record(id));
        self
    }

    /// Let a pull of `reference` succeed with the given image.
    pub fn allow_pull(&self, reference: &str, record: ImageRecord) {
        if let Ok(mut state) = self.state() {
            state.pullable.insert(qualify(reference), record);
        }
    }

    /// Fail the next create with `error`; queued failures apply in order.
    pub fn fail_next_create(&self, error: RuntimeError) {
        if let Ok(mut state) = self.state() {
            state.create_failures.push_back(error);
        }
    }

    /// Let the next create lose a race: another client creates and starts
    /// the container first, its record passed through `edit`, and the
    /// create fails with a name conflict.
    pub fn race_next_create(&self, edit: impl FnOnce(&mut ContainerRecord) + Send + 'static) {
        if let Ok(mut state) = self.state() {
            state.race = Some(Box::new(edit));
        }
    }

    /// Place a container directly, as if created outside Armada.
    pub fn insert_record(&self, record: ContainerRecord, status: &str) {
        if let Ok(mut state) = self.state() {
            let name = record.name.trim_start_matches('/').to_owned();
            state
                .containers
                .retain(|c| c.record.name.trim_start_matches('/') != name);
            state.containers.push(MockContainer {
                record,
                status: status.to_owned(),
            });
        }
    }

    /// Output returned by attach and logs for `container` (by name).
    pub fn set_output(&self, container: &str, output: &[u8]) {
        if let Ok(mut state) = self.state() {
            state.outputs.insert(container.to_owned(), output.to_vec());
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Tags of builds that were asked to skip the layer cache.
    pub fn uncached_builds(&self) -> Vec<String> {
        self.state()
            .map(|s| s.uncached_builds.clone())
            .unwrap_or_default()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state() {
            state.calls.clear();
        }
    }

    /// Status text of the container named `name`, if it exists.
    pub fn status_of(&self, name: &str) -> Option<String> {
        let state = self.state().ok()?;
        let index = state.find(name)?;
        Some(state.containers[index].status.clone())
    }

    /// Mutable access to a stored record, for drift scenarios.
    pub fn edit_record(&self, name: &str, edit: impl FnOnce(&mut ContainerRecord)) {
        if let Ok(mut state) = self.state() {
            if let Some(index) = state.find(name) {
                edit(&mut state.containers[index].record);
            }
        }
    }
}

/// An image record with an empty config.
pub fn image_record(id: &str) -> ImageRecord {
    ImageRecord {
        id: id.to_owned(),
        ..ImageRecord::default()
    }
}

fn progress(lines: &[String]) -> ByteStream {
    let mut body = String::new();
    for line in lines {
        body.push_str(&serde_json::json!({ "status": line }).to_string());
        body.push('\n');
    }
    Box::new(Cursor::new(body.into_bytes()))
}

fn port_summaries(record: &ContainerRecord) -> Vec<PortSummary> {
    record
        .host_config
        .port_bindings
        .iter()
        .flatten()
        .map(|(spec, bindings)| {
            let (port, protocol) = spec.split_once('/').unwrap_or((spec, "tcp"));
            PortSummary {
                private_port: port.parse().unwrap_or_default(),
                public_port: bindings
                    .as_deref()
                    .and_then(<[_]>::first)
                    .and_then(|b| b.host_port.parse().ok()),
                protocol: protocol.to_owned(),
            }
        })
        .collect()
}

fn not_found(container: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("no such container: {container}"))
}

impl Runtime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let state = self.record(Call::ListContainers)?;
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.status.starts_with("Up"))
            .map(|c| ContainerSummary {
                id: c.record.id.clone(),
                names: vec![format!("/{}", c.record.name.trim_start_matches('/'))],
                image: c.record.config.image.clone(),
                status: c.status.clone(),
                ports: port_summaries(&c.record),
            })
            .collect())
    }

    fn inspect(&self, container: &str) -> Result<ContainerRecord, RuntimeError> {
        let state = self.record(Call::Inspect(container.to_owned()))?;
        let index = state.find(container).ok_or_else(|| not_found(container))?;
        Ok(state.containers[index].record.clone())
    }

    fn create(&self, spec: &CreateSpec) -> Result<String, RuntimeError> {
        let mut state = self.record(Call::Create(spec.name.clone()))?;
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        if state.find(&spec.name).is_some() {
            return Err(RuntimeError::Conflict(format!(
                "container name /{} is already in use",
                spec.name
            )));
        }
        let id = state.materialize(spec)?;
        if let Some(edit) = state.race.take() {
            if let Some(raced) = state.containers.last_mut() {
                edit(&mut raced.record);
                raced.status = STATUS_UP.to_owned();
                raced.record.state = ContainerState {
                    status: "running".to_owned(),
                    running: true,
                };
            }
            return Err(RuntimeError::Conflict(format!(
                "container name /{} is already in use",
                spec.name
            )));
        }
        Ok(id)
    }

    fn start(&self, container: &str, _bindings: &Bindings) -> Result<(), RuntimeError> {
        let mut state = self.record(Call::Start(container.to_owned()))?;
        let index = state.find(container).ok_or_else(|| not_found(container))?;
        let c = &mut state.containers[index];
        c.status = STATUS_UP.to_owned();
        c.record.state = ContainerState {
            status: "running".to_owned(),
            running: true,
        };
        Ok(())
    }

    fn stop(&self, container: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.record(Call::Stop(container.to_owned()))?;
        let index = state.find(container).ok_or_else(|| not_found(container))?;
        let c = &mut state.containers[index];
        if c.record.state.running || c.status.starts_with("Up") {
            c.status = STATUS_EXITED.to_owned();
            c.record.state = ContainerState {
                status: "exited".to_owned(),
                running: false,
            };
        }
        Ok(())
    }

    fn remove(&self, container: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.record(Call::Remove {
            container: container.to_owned(),
            force,
        })?;
        let index = state.find(container).ok_or_else(|| not_found(container))?;
        if !force && state.containers[index].status.starts_with("Up") {
            return Err(RuntimeError::Conflict(format!(
                "cannot remove running container {container}"
            )));
        }
        state.containers.remove(index);
        Ok(())
    }

    fn list_images(&self, repository: &str) -> Result<Vec<ImageSummary>, RuntimeError> {
        let state = self.record(Call::ListImages(repository.to_owned()))?;
        Ok(state
            .images
            .iter()
            .filter(|image| {
                image
                    .repo_tags
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|t| strip_tag(t) == repository)
            })
            .map(|image| ImageSummary {
                id: image.id.clone(),
                repo_tags: image.repo_tags.clone(),
            })
            .collect())
    }

    fn inspect_image(&self, reference: &str) -> Result<ImageRecord, RuntimeError> {
        let state = self.record(Call::InspectImage(reference.to_owned()))?;
        state
            .find_image(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("no such image: {reference}")))
    }

    fn pull(&self, repository: &str, tag: &str) -> Result<ByteStream, RuntimeError> {
        let reference = format!("{repository}:{tag}");
        let mut state = self.record(Call::Pull(reference.clone()))?;
        let Some(image) = state.pullable.get(&reference).cloned() else {
            return Err(RuntimeError::NotFound(format!(
                "pull access denied for {repository}, repository does not exist"
            )));
        };
        let id = image.id.clone();
        state.store_image(&reference, image);
        Ok(progress(&[
            format!("Pulling from {repository}"),
            format!("Digest: {id}"),
            format!("Status: Downloaded newer image for {reference}"),
        ]))
    }

    fn push(&self, repository: &str, tag: &str) -> Result<ByteStream, RuntimeError> {
        let reference = format!("{repository}:{tag}");
        let state = self.record(Call::Push(reference.clone()))?;
        if state.find_image(&reference).is_none() {
            return Err(RuntimeError::NotFound(format!("no such image: {reference}")));
        }
        Ok(progress(&[
            format!("The push refers to repository [{repository}]"),
            format!("{tag}: digest pushed"),
        ]))
    }

    fn build(
        &self,
        context: Vec<u8>,
        tag: &str,
        nocache: bool,
    ) -> Result<ByteStream, RuntimeError> {
        let mut state = self.record(Call::Build(tag.to_owned()))?;
        if nocache {
            state.uncached_builds.push(tag.to_owned());
        }
        let id = format!("sha256:{}", blake3::hash(&context).to_hex());
        let dockerfile = read_dockerfile(&context)?;

        let mut config = ImageConfig::default();
        let mut env: BTreeMap<String, String> = BTreeMap::new();
        for line in dockerfile.lines() {
            let (instruction, rest) = line.split_once(' ').unwrap_or((line, ""));
            match instruction {
                "FROM" => {
                    let parent = state.find_image(rest).cloned().ok_or_else(|| {
                        RuntimeError::Stream {
                            operation: "build".to_owned(),
                            message: format!("pull access denied for {rest}"),
                        }
                    })?;
                    config = parent.config.clone();
                    env = parent.env_map();
                }
                "ENV" => {
                    if let Some((k, v)) = rest.split_once('=') {
                        let value = serde_json::from_str::<String>(v).unwrap_or(v.to_owned());
                        env.insert(k.to_owned(), value);
                    }
                }
                "USER" => config.user = rest.to_owned(),
                "CMD" => {
                    config.cmd = Some(vec!["/bin/sh".to_owned(), "-c".to_owned(), rest.to_owned()]);
                }
                _ => {}
            }
        }
        config.env = Some(env.iter().map(|(k, v)| format!("{k}={v}")).collect());

        state.store_image(
            tag,
            ImageRecord {
                id: id.clone(),
                repo_tags: None,
                config,
            },
        );
        let body = format!(
            "{}\n{}\n",
            serde_json::json!({ "stream": format!("Successfully built {id}\n") }),
            serde_json::json!({ "aux": { "ID": id } })
        );
        Ok(Box::new(Cursor::new(body.into_bytes())))
    }

    fn attach(&self, container: &str) -> Result<ByteStream, RuntimeError> {
        let state = self.record(Call::Attach(container.to_owned()))?;
        let index = state.find(container).ok_or_else(|| not_found(container))?;
        let name = state.containers[index].record.name.trim_start_matches('/');
        let output = state.outputs.get(name).cloned().unwrap_or_default();
        Ok(Box::new(Cursor::new(output)))
    }

    fn logs(&self, container: &str, _follow: bool) -> Result<ByteStream, RuntimeError> {
        let state = self.record(Call::Logs(container.to_owned()))?;
        let index = state.find(container).ok_or_else(|| not_found(container))?;
        let name = state.containers[index].record.name.trim_start_matches('/');
        let output = state.outputs.get(name).cloned().unwrap_or_default();
        Ok(Box::new(Cursor::new(output)))
    }
}

fn read_dockerfile(context: &[u8]) -> Result<String, RuntimeError> {
    let mut archive = tar::Archive::new(context);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some("Dockerfile") {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            return Ok(text);
        }
    }
    Err(RuntimeError::Stream {
        operation: "build".to_owned(),
        message: "build context has no Dockerfile".to_owned(),
    })
}
