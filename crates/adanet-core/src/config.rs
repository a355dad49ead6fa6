//! The two-stage problem-file loader.
//!
//! A [`ProblemInput`] is deserialized directly from YAML with every field
//! optional so the file can omit anything that has a sensible default; it is
//! then [`ProblemInput::resolve`]d into a concrete [`Problem`] with defaults
//! applied, units parsed, and link profiles looked up.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use compact_str::CompactString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::types::{Channel, ChannelKind, LatencyPolicy, Link, Problem, Qos};
use crate::units;

/// Default per-link-type bandwidth (bytes/sec), latency (seconds) and
/// reliability, used when a link's `type` is given but `bandwidth`/`latency`
/// are omitted.
pub const NETWORK_TECHNOLOGIES: &[(&str, f64, f64, f64)] = &[
    ("wifi-b", 137_500.0, 0.010, 0.9),
    ("wifi-g", 687_500.0, 0.005, 0.92),
    ("wifi-n", 18_750_000.0, 0.003, 0.95),
    ("wifi-ac", 81_250_000.0, 0.002, 0.97),
    ("wifi-ax", 150_000_000.0, 0.0015, 0.98),
    ("ethernet", 125_000_000.0, 0.0005, 0.999),
    ("acoustic", 100.0, 2.0, 0.6),
    ("iridium", 350.0, 1.0, 0.9),
    ("freewave", 28_800.0, 0.05, 0.85),
    ("freewave-fgr3", 115_200.0, 0.03, 0.9),
];

/// Bytes/sec floor below which a reading is treated as a transient zero
/// rather than a genuinely dead link.
pub const IFACE_MIN_BANDWIDTH_BYTES_SEC: f64 = 8.0;

/// Optimism multiplier applied when estimating outbound bandwidth from a
/// windowed maximum observation.
pub const IFACE_BANDWIDTH_OPTIMISM: f64 = 0.5;

fn technology_profile(link_type: &str) -> Option<(f64, f64, f64)> {
    NETWORK_TECHNOLOGIES
        .iter()
        .find(|(name, ..)| *name == link_type)
        .map(|(_, bw, lat, rel)| (*bw, *lat, *rel))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrNum {
    Num(f64),
    Str(String),
}

impl StringOrNum {
    fn as_bandwidth(&self) -> Result<f64> {
        match self {
            StringOrNum::Num(n) => Ok(*n),
            StringOrNum::Str(s) => units::parse_bandwidth_bytes_per_sec(s),
        }
    }

    fn as_latency(&self) -> Result<f64> {
        match self {
            StringOrNum::Num(n) => Ok(*n),
            StringOrNum::Str(s) => units::parse_latency_secs(s),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkInput {
    pub interface: String,
    #[serde(rename = "type")]
    pub link_type: Option<String>,
    pub server: Option<String>,
    pub bandwidth: Option<StringOrNum>,
    pub latency: Option<StringOrNum>,
    pub budget: Option<String>,
}

impl LinkInput {
    fn resolve(self) -> Result<Link> {
        let profile = match self.link_type.as_deref() {
            Some(name) => Some(
                technology_profile(name)
                    .ok_or_else(|| Error::UnknownLinkType(name.to_string()))?,
            ),
            None => None,
        };

        let bandwidth = match &self.bandwidth {
            Some(v) => v.as_bandwidth()?,
            None => profile.map(|(bw, _, _)| bw).unwrap_or(0.0),
        };
        let latency = match &self.latency {
            Some(v) => v.as_latency()?,
            None => profile.map(|(_, lat, _)| lat).unwrap_or(0.0),
        };
        let reliability = profile.map(|(_, _, rel)| rel).unwrap_or(1.0);

        let server = match self.server {
            Some(s) => Some(
                Ipv4Addr::from_str(&s)
                    .map_err(|e| Error::InvalidProblem(format!("bad server ip {s:?}: {e}")))?,
            ),
            None => None,
        };
        let budget = match self.budget {
            Some(s) => Some(units::parse_size_bytes(&s)?),
            None => None,
        };

        Ok(Link {
            interface: CompactString::from(self.interface),
            link_type: self.link_type.map(CompactString::from),
            server,
            bandwidth,
            latency,
            reliability,
            budget,
            capacity: 0.0,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QosInput {
    pub queue_size: Option<u64>,
    pub latency: Option<StringOrNum>,
    pub frequency: Option<f64>,
    pub latency_policy: Option<String>,
}

impl QosInput {
    fn resolve(self) -> Result<Qos> {
        let latency_max = match self.latency {
            Some(v) => Some(v.as_latency()?),
            None => None,
        };
        let latency_policy = match self.latency_policy.as_deref() {
            Some("strict") => LatencyPolicy::Strict,
            Some("best-effort") | None => LatencyPolicy::BestEffort,
            Some(other) => {
                return Err(Error::InvalidProblem(format!(
                    "unknown latency_policy {other:?}"
                )))
            }
        };
        Ok(Qos {
            queue_size: self.queue_size.unwrap_or(1).max(1),
            latency_max,
            frequency_cap: self.frequency,
            latency_policy,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInput {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub priority: i32,
    pub frequency: Option<f64>,
    pub size: Option<u64>,
    #[serde(default)]
    pub qos: QosInput,
}

impl ChannelInput {
    fn resolve(self) -> Result<Channel> {
        let kind = ChannelKind::from_str(&self.kind)?;
        Ok(Channel {
            name: CompactString::from(self.name),
            kind,
            priority: self.priority,
            frequency: self.frequency.unwrap_or(0.0),
            size: self.size,
            qos: self.qos.resolve()?,
            queue_length: 0,
        })
    }
}

/// A link's scripted bandwidth/latency, each an [`Expr`] evaluated every
/// sim-tick over `t` (relative time), `c` (unused here, 0), and `l` (the
/// link's live/declared baseline for the field being computed).
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationLinkInput {
    pub interface: String,
    pub bandwidth: Option<Expr>,
    pub latency: Option<Expr>,
}

/// A channel's scripted frequency, an [`Expr`] evaluated every sim-tick
/// over `t`, `c` (the channel's declared baseline frequency), and `l`
/// (unused here, 0).
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationChannelInput {
    pub name: String,
    pub frequency: Option<Expr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulationInput {
    #[serde(default)]
    pub links: Vec<SimulationLinkInput>,
    #[serde(default)]
    pub channels: Vec<SimulationChannelInput>,
}

/// A resolved simulation script: the per-tick link/channel overrides that
/// `--simulation` mode drives instead of live measurement.
#[derive(Debug, Clone, Default)]
pub struct SimulationConfig {
    pub links: HashMap<CompactString, SimulationLinkInput>,
    pub channels: HashMap<CompactString, Expr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemInput {
    pub name: Option<String>,
    pub links: Option<Vec<LinkInput>>,
    #[serde(default)]
    pub channels: Vec<ChannelInput>,
    pub simulation: Option<SimulationInput>,
}

impl ProblemInput {
    /// Parse a problem file's YAML text. `name_hint` is used when the file
    /// omits `name` (the CLI passes the file stem).
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Resolve into the initial `Problem` (channel declarations + link
    /// whitelist) plus, if present, the simulation script.
    pub fn resolve(self, name_hint: &str) -> Result<(Problem, Option<SimulationConfig>)> {
        let name = self.name.unwrap_or_else(|| name_hint.to_string());
        let mut problem = Problem::new(name);

        if self.channels.is_empty() {
            tracing::warn!("problem file declares no channels");
        }
        for ch in self.channels {
            problem.channels.push(ch.resolve()?);
        }

        if let Some(links) = self.links {
            for link in links {
                problem.links.push(link.resolve()?);
            }
        }

        let simulation = self.simulation.map(|sim| {
            let links = sim
                .links
                .into_iter()
                .map(|l| (CompactString::from(l.interface.clone()), l))
                .collect();
            let channels = sim
                .channels
                .into_iter()
                .map(|c| (CompactString::from(c.name.clone()), c.frequency.unwrap_or(Expr::Const(0.0))))
                .collect();
            SimulationConfig { links, channels }
        });

        Ok((problem, simulation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_problem_resolves() {
        let yaml = r#"
channels:
  - name: telemetry
    kind: simulated
    priority: 1
    frequency: 10
    size: 256
"#;
        let input = ProblemInput::from_yaml_str(yaml).unwrap();
        let (problem, sim) = input.resolve("stem").unwrap();
        assert_eq!(problem.name, "stem");
        assert_eq!(problem.channels.len(), 1);
        assert_eq!(problem.channels[0].priority, 1);
        assert!(problem.links.is_empty());
        assert!(sim.is_none());
    }

    #[test]
    fn link_type_fills_defaults() {
        let yaml = r#"
links:
  - interface: wlan0
    type: wifi-ac
channels: []
"#;
        let input = ProblemInput::from_yaml_str(yaml).unwrap();
        let (problem, _) = input.resolve("stem").unwrap();
        let link = &problem.links[0];
        assert!(link.bandwidth > 0.0);
        assert!(link.latency > 0.0);
    }

    #[test]
    fn explicit_units_override_profile() {
        let yaml = r#"
links:
  - interface: wlan0
    type: wifi-ac
    bandwidth: "5.5Mbps"
    latency: "2ms"
channels: []
"#;
        let input = ProblemInput::from_yaml_str(yaml).unwrap();
        let (problem, _) = input.resolve("stem").unwrap();
        let link = &problem.links[0];
        assert!((link.latency - 0.002).abs() < 1e-9);
    }

    #[test]
    fn unknown_link_type_errors() {
        let yaml = r#"
links:
  - interface: wlan0
    type: bogus-radio
channels: []
"#;
        let input = ProblemInput::from_yaml_str(yaml).unwrap();
        assert!(input.resolve("stem").is_err());
    }

    #[test]
    fn unknown_channel_kind_errors() {
        let yaml = r#"
channels:
  - name: c
    kind: bogus
"#;
        let input = ProblemInput::from_yaml_str(yaml).unwrap();
        assert!(input.resolve("stem").is_err());
    }

    #[test]
    fn simulation_block_resolves_scripts() {
        let yaml = r#"
channels:
  - name: telemetry
    kind: simulated
    frequency: 10
simulation:
  links:
    - interface: wlan0
      bandwidth: "1e6 + 1e5*sin(t)"
      latency: 0.01
  channels:
    - name: telemetry
      frequency: "c * 2"
"#;
        let input = ProblemInput::from_yaml_str(yaml).unwrap();
        let (_, sim) = input.resolve("stem").unwrap();
        let sim = sim.expect("simulation block should resolve");
        let link = sim.links.get("wlan0").unwrap();
        assert!((link.bandwidth.as_ref().unwrap().eval(0.0, 0.0, 0.0) - 1e6).abs() < 1e-6);
        assert_eq!(link.latency.as_ref().unwrap().eval(0.0, 0.0, 0.0), 0.01);
        let channel_expr = sim.channels.get("telemetry").unwrap();
        assert_eq!(channel_expr.eval(0.0, 10.0, 0.0), 20.0);
    }
}
