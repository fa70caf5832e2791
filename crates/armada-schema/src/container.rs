use crate::image::Image;
use crate::ship::Ship;
use crate::types::ContainerId;
use crate::volume::Volume;
use crate::SchemaError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Observed status of a container the runtime does not know.
pub const NOT_FOUND: &str = "not found";

pub const DEFAULT_NETWORK_MODE: &str = "bridge";
pub const DEFAULT_PROTOCOL: &str = "tcp";

/// Declared container plus its last observed runtime identity.
///
/// `id` and `status` are written only by a runtime check and never
/// serialized; every constructor and every document load resets them.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub name: String,
    pub ship: Arc<Ship>,
    pub image: Arc<Image>,
    pub command: Option<String>,
    pub hostname: Option<String>,
    /// Memory limit in bytes; zero means unlimited.
    pub memory: u64,
    /// Logical port name to internal port.
    pub ports: BTreeMap<String, u16>,
    pub extports: BTreeMap<String, u16>,
    pub portproto: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub network_mode: String,
    pub user: Option<String>,
    pub privileged: bool,
    pub id: ContainerId,
    pub status: String,
}

/// A named network endpoint of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Door {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub external: u16,
}

impl Door {
    /// `<port>/<protocol>`, the runtime's key for an exposed port.
    pub fn spec(&self) -> String {
        format!("{}/{}", self.port, self.protocol)
    }

    /// Where the door is reachable on `host`. Doors named `http` or `https`
    /// use that scheme; others use their protocol.
    pub fn url(&self, host: &str) -> String {
        let scheme = match self.name.as_str() {
            "http" | "https" => &self.name,
            _ => &self.protocol,
        };
        format!("{scheme}://{host}:{}", self.external)
    }
}

impl Container {
    pub fn new(name: &str, ship: Arc<Ship>, image: Arc<Image>) -> Self {
        Self {
            name: name.to_owned(),
            ship,
            image,
            command: None,
            hostname: None,
            memory: 0,
            ports: BTreeMap::new(),
            extports: BTreeMap::new(),
            portproto: BTreeMap::new(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            network_mode: DEFAULT_NETWORK_MODE.to_owned(),
            user: None,
            privileged: false,
            id: ContainerId::default(),
            status: NOT_FOUND.to_owned(),
        }
    }

    /// Declared hostname, defaulting to `<name>-<ship name>`.
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.name, self.ship.name))
    }

    /// `<ship>:<container>`, the name patterns match against.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.ship.name, self.name)
    }

    pub fn external_port(&self, name: &str) -> Option<u16> {
        self.extports
            .get(name)
            .or_else(|| self.ports.get(name))
            .copied()
    }

    /// Declared ports, sorted by logical name.
    pub fn doors(&self) -> Vec<Door> {
        self.ports
            .iter()
            .map(|(name, &port)| Door {
                name: name.clone(),
                port,
                protocol: self
                    .portproto
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_PROTOCOL.to_owned()),
                external: self.extports.get(name).copied().unwrap_or(port),
            })
            .collect()
    }

    pub fn volume(&self, name: &str) -> Result<&Volume, SchemaError> {
        self.volumes
            .iter()
            .find(|v| v.name() == name)
            .ok_or_else(|| SchemaError::UnknownVolume {
                container: self.name.clone(),
                volume: name.to_owned(),
            })
    }

    pub fn reset_observed(&mut self) {
        self.id = ContainerId::default();
        self.status = NOT_FOUND.to_owned();
    }

    pub fn running(&self) -> bool {
        self.status.contains("Up")
    }

    /// The declared command override as runtime arguments.
    pub fn command_args(&self) -> Option<Vec<String>> {
        self.command.as_deref().map(split_command)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.full_name(), self.image.reference())
    }
}

/// Split a command line into words. Single quotes are literal, double quotes
/// group words, and a backslash escapes the next character outside single
/// quotes.
pub fn split_command(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('"') | None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
