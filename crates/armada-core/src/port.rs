//! Named port mappings.
//!
//! Ports are named because peers resolve them by name, not by number: the
//! environment projection publishes `<SERVICE>_<CONTAINER>_<PORT>_PORT`
//! variables and lifecycle checks reference ports symbolically. Each named
//! port maps an external specification (optionally bound to an address) to
//! an internal, in-container specification. Either side may be a single
//! port or a range; ranges must have equal spans and both sides must agree
//! on the protocol.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Returns the lowercase protocol name used in Docker port keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inclusive port range; a single port is a range of span one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port of the range.
    pub start: u16,
    /// Last port of the range (inclusive).
    pub end: u16,
}

impl PortRange {
    /// Creates a single-port range.
    pub fn single(port: u16) -> Self {
        Self { start: port, end: port }
    }

    /// Number of ports covered by the range.
    pub fn span(&self) -> u16 {
        self.end - self.start + 1
    }

    /// Iterates over the ports in the range.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// One side of a port mapping: a range plus a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// The port or port range.
    pub range: PortRange,
    /// The protocol.
    pub protocol: Protocol,
}

impl EndpointSpec {
    fn parse(name: &str, spec: &str) -> Result<Self> {
        let (ports, protocol) = match spec.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some((_, other)) => {
                return Err(ConfigError::invalid_port(
                    name,
                    format!("unknown protocol {:?}", other),
                ))
            }
            None => (spec, Protocol::Tcp),
        };

        let parse_port = |s: &str| {
            s.trim().parse::<u16>().map_err(|_| {
                ConfigError::invalid_port(name, format!("invalid port number {:?}", s))
            })
        };

        let range = match ports.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start)?;
                let end = parse_port(end)?;
                if end < start {
                    return Err(ConfigError::invalid_port(
                        name,
                        format!("descending range {}-{}", start, end),
                    ));
                }
                PortRange { start, end }
            }
            None => PortRange::single(parse_port(ports)?),
        };

        Ok(Self { range, protocol })
    }
}

impl std::fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.range, self.protocol)
    }
}

/// Raw document form of one side of a port mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortField {
    /// Bare integer port.
    Number(u32),
    /// Port, range and/or protocol as a string.
    Spec(String),
}

impl PortField {
    fn as_spec(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Spec(s) => s.clone(),
        }
    }
}

/// Raw document form of the external side in the mapping syntax.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExternalField {
    /// `[address, spec]` pair.
    Bound((String, PortField)),
    /// Just the port spec, bound on all interfaces.
    Port(PortField),
}

/// Raw document form of a named port.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortDef {
    /// Single number: same port exposed and published, TCP.
    Number(u32),
    /// `external:internal` string, with optional protocol suffixes.
    Spec(String),
    /// Fully spelled out mapping.
    Full {
        /// In-container port spec.
        exposed: PortField,
        /// Externally published spec, optionally with a bind address.
        external: ExternalField,
    },
}

/// A fully parsed named port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// The port name.
    pub name: String,

    /// Address the external side binds to.
    pub bind_address: String,

    /// Externally published side.
    pub external: EndpointSpec,

    /// In-container side.
    pub internal: EndpointSpec,
}

impl PortSpec {
    /// Parses a named port from its document form.
    pub fn parse(name: &str, def: &PortDef) -> Result<Self> {
        let (bind_address, external_spec, internal_spec) = match def {
            PortDef::Number(n) => (None, n.to_string(), n.to_string()),
            PortDef::Spec(spec) => {
                let mut parts = spec.split(':');
                let external = parts.next().unwrap_or_default().to_string();
                let internal = parts.next().map(str::to_string);
                if parts.next().is_some() {
                    return Err(ConfigError::invalid_port(
                        name,
                        format!("expected \"external:internal\", got {:?}", spec),
                    ));
                }
                let internal = internal.unwrap_or_else(|| external.clone());
                (None, external, internal)
            }
            PortDef::Full { exposed, external } => {
                let (addr, spec) = match external {
                    ExternalField::Bound((addr, spec)) => (Some(addr.clone()), spec.as_spec()),
                    ExternalField::Port(spec) => (None, spec.as_spec()),
                };
                (addr, spec, exposed.as_spec())
            }
        };

        let external = EndpointSpec::parse(name, &external_spec)?;
        let internal = EndpointSpec::parse(name, &internal_spec)?;

        if external.protocol != internal.protocol {
            return Err(ConfigError::invalid_port(
                name,
                format!(
                    "mismatched protocols between {} and {}",
                    external, internal
                ),
            ));
        }
        if external.range.span() != internal.range.span() {
            return Err(ConfigError::invalid_port(
                name,
                format!(
                    "range spans differ between {} and {}",
                    external, internal
                ),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            bind_address: bind_address.unwrap_or_else(|| "0.0.0.0".to_string()),
            external,
            internal,
        })
    }

    /// Returns the first external port number.
    ///
    /// For single ports this is the published port; for ranges it is the
    /// start of the range. This is the value used in link variables and by
    /// TCP probes.
    pub fn external_port(&self) -> u16 {
        self.external.range.start
    }

    /// Returns the first internal port number.
    pub fn internal_port(&self) -> u16 {
        self.internal.range.start
    }

    /// Returns true for TCP mappings.
    pub fn is_tcp(&self) -> bool {
        self.external.protocol == Protocol::Tcp
    }

    /// Pairs up external and internal ports across the ranges.
    pub fn pairs(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.external.range.iter().zip(self.internal.range.iter())
    }
}
