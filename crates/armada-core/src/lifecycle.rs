//! Container lifecycle against one runtime.
//!
//! Every operation ends with a fresh `check` and fails with
//! `CoreError::UnexpectedState` when the runtime does not report the state
//! the operation should have produced. Two failures are recovered once: a
//! name conflict on create during `run`, and a missing image on create.

use crate::diff::{diff_container, Diff};
use crate::images::ImageResolver;
use crate::render::render_volume;
use crate::{shutdown_requested, CoreError, RuntimeResultExt};
use armada_runtime::{
    Bind, Bindings, ByteStream, CreateSpec, HostBinding, ProgressMessage, Runtime, StreamLines,
};
use armada_schema::{Container, ContainerId, Settings, NOT_FOUND};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Unknown,
    NotFound,
    Stopped,
    Running,
}

impl ContainerState {
    /// Classify a runtime status text such as `Up 3 hours` or `Exited (0)`.
    pub fn from_status(status: &str) -> Self {
        if status == NOT_FOUND {
            ContainerState::NotFound
        } else if status.contains("Up") {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Unknown => write!(f, "unknown"),
            ContainerState::NotFound => write!(f, "not found"),
            ContainerState::Stopped => write!(f, "stopped"),
            ContainerState::Running => write!(f, "running"),
        }
    }
}

/// What `run` did to reach a running container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No container existed.
    Created,
    /// Already running and identical to the declaration.
    Kept,
    /// Was running with drift; stopped, removed and created again.
    Replaced,
    /// Existed but was not running; removed and created again.
    Recreated,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Created => write!(f, "created"),
            RunOutcome::Kept => write!(f, "kept"),
            RunOutcome::Replaced => write!(f, "replaced"),
            RunOutcome::Recreated => write!(f, "recreated"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: ContainerState,
    pub id: String,
    /// Present only for running containers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
}

fn log_progress(message: &ProgressMessage) {
    if let Some(text) = message.text() {
        debug!("{text}");
    }
}

/// Drives containers of one ship toward their declaration.
pub struct Reconciler<'a> {
    runtime: &'a dyn Runtime,
    images: &'a ImageResolver,
    settings: &'a Settings,
}

impl<'a> Reconciler<'a> {
    pub fn new(runtime: &'a dyn Runtime, images: &'a ImageResolver, settings: &'a Settings) -> Self {
        Self {
            runtime,
            images,
            settings,
        }
    }

    pub fn runtime(&self) -> &'a dyn Runtime {
        self.runtime
    }

    /// Refresh the container's observed `id` and `status` from the runtime.
    pub fn check(&self, container: &mut Container) -> Result<ContainerState, CoreError> {
        let summaries = self
            .runtime
            .list_containers(true)
            .op(&container.name, "check")?;
        match summaries
            .into_iter()
            .find(|s| s.name() == Some(container.name.as_str()))
        {
            Some(summary) => {
                container.id = ContainerId::new(summary.id);
                container.status = summary.status;
            }
            None => container.reset_observed(),
        }
        let state = ContainerState::from_status(&container.status);
        debug!("{}: {state} ({})", container.full_name(), container.status);
        Ok(state)
    }

    fn expect(
        &self,
        container: &mut Container,
        operation: &'static str,
        expected: ContainerState,
    ) -> Result<(), CoreError> {
        let actual = self.check(container)?;
        if actual == expected {
            Ok(())
        } else {
            Err(CoreError::UnexpectedState {
                container: container.full_name(),
                operation,
                expected,
                actual,
            })
        }
    }

    /// Port publications and directory binds for `container`.
    pub fn bindings(&self, container: &Container) -> Bindings {
        Bindings {
            ports: container
                .doors()
                .into_iter()
                .map(|door| {
                    (
                        door.spec(),
                        HostBinding {
                            host_ip: self.settings.bind_address.clone(),
                            host_port: door.external,
                        },
                    )
                })
                .collect(),
            binds: container
                .volumes
                .iter()
                .map(|volume| Bind {
                    host: volume
                        .host_path(&container.name, self.settings)
                        .display()
                        .to_string(),
                    dest: volume.dest().to_owned(),
                    ro: volume.ro(),
                })
                .collect(),
        }
    }

    pub fn create_spec(&self, container: &Container) -> CreateSpec {
        CreateSpec {
            name: container.name.clone(),
            image: container.image.reference(),
            hostname: container.hostname(),
            cmd: container.command_args(),
            env: container
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            memory: container.memory,
            exposed_ports: container.doors().iter().map(|d| d.spec()).collect(),
            network_mode: container.network_mode.clone(),
            user: container.user.clone(),
            privileged: container.privileged,
            bindings: self.bindings(container),
        }
    }

    /// Render config volumes and create the container; expects it created.
    ///
    /// A missing image is pulled once and the create retried once.
    pub fn create(&self, container: &mut Container) -> Result<(), CoreError> {
        let _span = info_span!("create", container = %container.full_name()).entered();
        for volume in &container.volumes {
            render_volume(container, volume, self.settings)?;
        }
        let spec = self.create_spec(container);
        info!("creating {} from {}", container.full_name(), spec.image);
        match self.runtime.create(&spec) {
            Ok(id) => debug!("created {id}"),
            Err(e) if e.is_missing_image() => {
                warn!("{}: {e}; pulling {}", container.full_name(), spec.image);
                self.images
                    .pull(self.runtime, &container.image, &mut log_progress)?;
                self.runtime.create(&spec).op(&container.name, "create")?;
            }
            Err(e) => return Err(e).op(&container.name, "create"),
        }
        self.expect(container, "create", ContainerState::Stopped)
    }

    /// Start with port and volume bindings; expects it running.
    pub fn start(&self, container: &mut Container) -> Result<(), CoreError> {
        info!("starting {}", container.full_name());
        let bindings = self.bindings(container);
        self.runtime
            .start(&container.name, &bindings)
            .op(&container.name, "start")?;
        self.expect(container, "start", ContainerState::Running)
    }

    pub fn stop(&self, container: &mut Container) -> Result<(), CoreError> {
        info!("stopping {}", container.full_name());
        let timeout = Duration::from_secs(self.settings.stop_timeout);
        self.runtime
            .stop(&container.name, timeout)
            .op(&container.name, "stop")?;
        self.expect(container, "stop", ContainerState::Stopped)
    }

    pub fn remove(&self, container: &mut Container, force: bool) -> Result<(), CoreError> {
        info!("removing {}", container.full_name());
        self.runtime
            .remove(&container.name, force)
            .op(&container.name, "remove")?;
        self.expect(container, "remove", ContainerState::NotFound)
    }

    /// Converge to a running container matching the declaration.
    pub fn run(&self, container: &mut Container) -> Result<RunOutcome, CoreError> {
        let _span = info_span!("run", container = %container.full_name()).entered();
        let outcome = match self.check(container)? {
            ContainerState::NotFound => match self.create(container) {
                Ok(()) => RunOutcome::Created,
                Err(e) if e.is_conflict() => {
                    warn!("{e}; reconciling the existing container");
                    self.check(container)?;
                    self.replace_existing(container)?
                }
                Err(e) => return Err(e),
            },
            _ => self.replace_existing(container)?,
        };
        if outcome != RunOutcome::Kept {
            self.start(container)?;
        }
        info!("{}: {outcome}", container.full_name());
        Ok(outcome)
    }

    /// Decide for a container the last check found.
    fn replace_existing(&self, container: &mut Container) -> Result<RunOutcome, CoreError> {
        match ContainerState::from_status(&container.status) {
            ContainerState::Running => {
                let diff = self.diff(container)?;
                if diff.is_empty() {
                    return Ok(RunOutcome::Kept);
                }
                info!("{} differs:\n{diff}", container.full_name());
                self.stop(container)?;
                self.remove(container, false)?;
                self.create(container)?;
                Ok(RunOutcome::Replaced)
            }
            ContainerState::Stopped | ContainerState::Unknown => {
                self.remove(container, false)?;
                self.create(container)?;
                Ok(RunOutcome::Recreated)
            }
            ContainerState::NotFound => {
                self.create(container)?;
                Ok(RunOutcome::Created)
            }
        }
    }

    /// Stop if running, then `run`.
    pub fn restart(&self, container: &mut Container) -> Result<RunOutcome, CoreError> {
        if self.check(container)? == ContainerState::Running {
            self.stop(container)?;
        }
        self.run(container)
    }

    /// Compare the declaration with the runtime's record of the container.
    /// Uses the observed id from the last check.
    pub fn diff(&self, container: &Container) -> Result<Diff, CoreError> {
        if container.id.is_empty() {
            return Err(CoreError::NotMaterialized(container.full_name()));
        }
        let record = self
            .runtime
            .inspect(container.id.as_str())
            .op(&container.name, "inspect")?;
        let facts = self.images.facts(self.runtime, &container.image)?;
        diff_container(container, &facts, &record, self.settings)
    }

    pub fn status(&self, container: &mut Container) -> Result<StatusReport, CoreError> {
        let state = self.check(container)?;
        let diff = match state {
            ContainerState::Running => Some(self.diff(container)?),
            _ => None,
        };
        Ok(StatusReport {
            state,
            id: container.id.to_string(),
            diff,
        })
    }

    pub fn logs(
        &self,
        container: &mut Container,
        follow: bool,
    ) -> Result<StreamLines<ByteStream>, CoreError> {
        if self.check(container)? == ContainerState::NotFound {
            return Err(CoreError::NotMaterialized(container.full_name()));
        }
        let stream = self
            .runtime
            .logs(&container.name, follow)
            .op(&container.name, "logs")?;
        Ok(StreamLines::new(stream))
    }

    /// Create, attach and start the container as a one-off command.
    ///
    /// An existing container of the same name is force-removed first. The
    /// returned session yields output lines and stops the container when
    /// dropped.
    pub fn execute(&self, container: &mut Container) -> Result<AttachSession<'a>, CoreError> {
        let _span = info_span!("execute", container = %container.full_name()).entered();
        match self.create(container) {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                warn!("{e}; removing the existing container");
                self.runtime
                    .remove(&container.name, true)
                    .op(&container.name, "remove")?;
                self.create(container)?;
            }
            Err(e) => return Err(e),
        }

        let stream = self
            .runtime
            .attach(&container.name)
            .op(&container.name, "attach")?;
        let session = AttachSession {
            runtime: self.runtime,
            container: container.name.clone(),
            timeout: Duration::from_secs(self.settings.stop_timeout),
            lines: StreamLines::new(stream),
        };
        self.runtime
            .start(&container.name, &self.bindings(container))
            .op(&container.name, "start")?;
        self.check(container)?;
        Ok(session)
    }
}

/// Output of an attached container. Stops the container on drop, on every
/// exit path; the stop is best effort.
pub struct AttachSession<'a> {
    runtime: &'a dyn Runtime,
    container: String,
    timeout: Duration,
    lines: StreamLines<ByteStream>,
}

impl AttachSession<'_> {
    pub fn container(&self) -> &str {
        &self.container
    }
}

impl Iterator for AttachSession<'_> {
    type Item = Result<String, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if shutdown_requested() {
            debug!("{}: output interrupted", self.container);
            return None;
        }
        self.lines.next().map(|line| line.map_err(CoreError::Io))
    }
}

impl Drop for AttachSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.stop(&self.container, self.timeout) {
            debug!("stopping {} after attach: {e}", self.container);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_from_status_text() {
        assert_eq!(ContainerState::from_status(NOT_FOUND), ContainerState::NotFound);
        assert_eq!(ContainerState::from_status("Up 2 hours"), ContainerState::Running);
        assert_eq!(
            ContainerState::from_status("Up 5 seconds (Paused)"),
            ContainerState::Running
        );
        assert_eq!(ContainerState::from_status("Created"), ContainerState::Stopped);
        assert_eq!(
            ContainerState::from_status("Exited (137) 3 minutes ago"),
            ContainerState::Stopped
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(ContainerState::NotFound.to_string(), "not found");
        assert_eq!(RunOutcome::Replaced.to_string(), "replaced");
    }
}
