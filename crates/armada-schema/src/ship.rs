use crate::settings::Settings;
use std::cmp::Ordering;
use std::fmt;

/// Name of the implicit ship backed by `settings.docker_url`.
pub const LOCAL_SHIP: &str = "localship";

pub const DEFAULT_RUNTIME_PORT: u16 = 4243;

/// A deployment target exposing a container runtime endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ship {
    pub name: String,
    pub fqdn: String,
    pub islocal: bool,
    pub url: String,
}

impl Ship {
    /// A remote ship at the default runtime endpoint `http://<fqdn>:4243`.
    pub fn new(name: &str, fqdn: &str) -> Self {
        Self {
            name: name.to_owned(),
            fqdn: fqdn.to_owned(),
            islocal: false,
            url: format!("http://{fqdn}:{DEFAULT_RUNTIME_PORT}"),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.trim_end_matches('/').to_owned();
        self
    }

    pub fn local(settings: &Settings) -> Self {
        Self {
            name: LOCAL_SHIP.to_owned(),
            fqdn: settings.localship_fqdn.clone(),
            islocal: true,
            url: settings.docker_url.trim_end_matches('/').to_owned(),
        }
    }
}

impl Ord for Ship {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fqdn
            .cmp(&other.fqdn)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Ship {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.fqdn)
    }
}
