//! Endpoint configuration
//!
//! Loaded from TOML. A complete file looks like:
//!
//! ```toml
//! [general]
//! port = 5036
//! bandwidth = "medium"
//! disallow = ["all"]
//! allow = ["gsm", "ulaw"]
//!
//! [[user]]
//! name = "guest"
//! context = ["default"]
//!
//! [[user]]
//! name = "alice"
//! secret = "wonderland"
//! auth = "md5"
//! access = [{ deny = "0.0.0.0/0.0.0.0" }, { permit = "10.0.0.0/255.0.0.0" }]
//!
//! [[peer]]
//! name = "upstream"
//! host = "192.0.2.10"
//! username = "bob"
//! secret = "builder"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Users describe who may call in; peers describe whom we call out to and
//! which credentials we answer their challenges with.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::AuthMethods;
use crate::error::{Error, Result};
use crate::frame::format;
use crate::jitter::JitterSettings;
use crate::logging::LoggingConfig;

/// Default IAX port
pub const DEFAULT_PORT: u16 = 5036;

/// Highest protocol version understood
pub const PROTOCOL_VERSION: u32 = 1;

/// Call numbers are 15 bits on the wire
pub const MAX_CALLS: usize = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Bandwidth {
    Low,
    Medium,
    #[default]
    High,
}

impl Bandwidth {
    pub fn capability(self) -> u32 {
        match self {
            Bandwidth::Low => format::LOW_BANDWIDTH,
            Bandwidth::Medium => format::MEDIUM_BANDWIDTH,
            Bandwidth::High => format::FULL_BANDWIDTH,
        }
    }
}

/// Endpoint-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Address the socket binds to
    pub bindaddr: IpAddr,

    /// UDP port
    pub port: u16,

    /// Seconds between PINGs on each call
    pub pingtime: u64,

    /// Seconds between LAGRQs on each call
    pub lagrqtime: u64,

    /// Ceiling on the jitter the buffer absorbs, in ms
    pub maxjitterbuffer: i32,

    /// Slack above the observed maximum before the buffer shrinks, in ms
    pub maxexcessbuffer: i32,

    /// Worst lateness samples ignored by the jitter buffer
    pub dropcount: usize,

    /// Disable to deliver every frame as soon as it arrives
    pub jitterbuffer: bool,

    /// Starting codec set
    pub bandwidth: Bandwidth,

    /// Codec names added to the bandwidth preset
    pub allow: Vec<String>,

    /// Codec names removed from the bandwidth preset
    pub disallow: Vec<String>,

    /// Transmissions of a reliable frame before the call is given up
    pub maxretries: i32,

    /// Size of the call table
    pub maxcalls: usize,

    /// Context for callers whose user entry names none
    pub context: String,

    /// Log every frame sent and received
    pub debug: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bindaddr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            pingtime: 20,
            lagrqtime: 10,
            maxjitterbuffer: 3000,
            maxexcessbuffer: 50,
            dropcount: crate::jitter::DEFAULT_DROP,
            jitterbuffer: true,
            bandwidth: Bandwidth::High,
            allow: Vec::new(),
            disallow: Vec::new(),
            maxretries: 4,
            maxcalls: MAX_CALLS,
            context: "default".to_string(),
            debug: false,
        }
    }
}

/// One ordered permit/deny rule, `address/netmask`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRule {
    Permit(String),
    Deny(String),
}

/// Compiled host access list. Rules apply in order and the last match
/// wins; with no matching rule access is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAccess {
    rules: Vec<(bool, u32, u32)>,
}

fn parse_netmask(mask: &str) -> Option<u32> {
    if let Ok(bits) = mask.parse::<u32>() {
        if bits > 32 {
            return None;
        }
        return Some(if bits == 0 { 0 } else { u32::MAX << (32 - bits) });
    }
    mask.parse::<Ipv4Addr>().ok().map(u32::from)
}

impl HostAccess {
    pub fn compile(rules: &[AccessRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let (permit, rule_text) = match rule {
                AccessRule::Permit(s) => (true, s),
                AccessRule::Deny(s) => (false, s),
            };
            let (addr, mask) = match rule_text.split_once('/') {
                Some((addr, mask)) => (addr, mask),
                None => (rule_text.as_str(), "255.255.255.255"),
            };
            let addr: Ipv4Addr = addr
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("invalid address in access rule '{}'", rule_text)))?;
            let mask = parse_netmask(mask.trim())
                .ok_or_else(|| Error::config(format!("invalid netmask in access rule '{}'", rule_text)))?;
            compiled.push((permit, u32::from(addr) & mask, mask));
        }
        Ok(Self { rules: compiled })
    }

    pub fn allows(&self, addr: IpAddr) -> bool {
        let ip = match addr {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => u32::from(v4),
                None => return self.rules.is_empty(),
            },
        };
        let mut allowed = true;
        for (permit, net, mask) in &self.rules {
            if ip & mask == *net {
                allowed = *permit;
            }
        }
        allowed
    }
}

/// Someone allowed to place calls to us
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub secret: String,
    /// Permitted methods, `md5,plaintext` when empty
    pub auth: String,
    /// Contexts the user may reach; the first is the default
    pub context: Vec<String>,
    pub access: Vec<AccessRule>,
    /// Overrides the caller id a caller presents
    pub callerid: Option<String>,
}

impl UserConfig {
    pub fn methods(&self) -> AuthMethods {
        if self.auth.trim().is_empty() {
            AuthMethods::ALL
        } else {
            AuthMethods::parse(&self.auth)
        }
    }
}

/// Someone we place calls to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PeerConfig {
    pub name: String,
    pub secret: String,
    pub auth: String,
    /// IP address, or `dynamic` / absent when the peer has no fixed address
    pub host: Option<String>,
    /// Netmask applied when matching a challenger against `host`
    pub mask: Option<Ipv4Addr>,
    pub port: Option<u16>,
    /// Username we present when challenged by this peer
    pub username: String,
    pub context: String,
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
}

impl PeerConfig {
    pub fn is_dynamic(&self) -> bool {
        match &self.host {
            None => true,
            Some(host) => host.eq_ignore_ascii_case("dynamic"),
        }
    }

    /// Static address, when `host` is an IP literal
    pub fn address(&self) -> Option<SocketAddr> {
        if self.is_dynamic() {
            return None;
        }
        let ip: IpAddr = self.host.as_deref()?.parse().ok()?;
        Some(SocketAddr::new(ip, self.port.unwrap_or(DEFAULT_PORT)))
    }

    /// Does a challenge from `from` plausibly come from this peer?
    pub fn matches_host(&self, from: IpAddr) -> bool {
        let Some(addr) = self.address() else {
            return true;
        };
        match (addr.ip(), from) {
            (IpAddr::V4(ours), IpAddr::V4(theirs)) => {
                let mask = u32::from(self.mask.unwrap_or(Ipv4Addr::BROADCAST));
                u32::from(ours) & mask == u32::from(theirs) & mask
            }
            (ours, theirs) => ours == theirs,
        }
    }

    /// Codecs offered when calling this peer
    pub fn capability(&self, global: u32) -> u32 {
        apply_codec_lists(global, &self.allow, &self.disallow)
    }
}

/// Apply `disallow` then `allow` to a capability mask
pub fn apply_codec_lists(mut capability: u32, allow: &[String], disallow: &[String]) -> u32 {
    for name in disallow {
        match format::by_name(name) {
            Some(bits) => capability &= !bits,
            None => warn!("Cannot disallow unknown format '{}'", name),
        }
    }
    for name in allow {
        match format::by_name(name) {
            Some(bits) => capability |= bits,
            None => warn!("Cannot allow unknown format '{}'", name),
        }
    }
    capability
}

/// Complete endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IaxConfig {
    pub general: GeneralConfig,
    #[serde(rename = "user")]
    pub users: Vec<UserConfig>,
    #[serde(rename = "peer")]
    pub peers: Vec<PeerConfig>,
    pub logging: LoggingConfig,
}

impl IaxConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: IaxConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.general;
        if g.maxcalls < 2 || g.maxcalls > MAX_CALLS {
            return Err(Error::config(format!(
                "maxcalls must be between 2 and {}",
                MAX_CALLS
            )));
        }
        if g.maxretries < 1 {
            return Err(Error::config("maxretries must be at least 1"));
        }
        if g.pingtime == 0 || g.lagrqtime == 0 {
            return Err(Error::config("pingtime and lagrqtime must be positive"));
        }
        if g.maxjitterbuffer < 0 || g.maxexcessbuffer < 0 {
            return Err(Error::config("jitter buffer limits must not be negative"));
        }
        self.logging.validate()?;
        for user in &self.users {
            if user.name.is_empty() {
                return Err(Error::config("user entry without a name"));
            }
            HostAccess::compile(&user.access)?;
        }
        for peer in &self.peers {
            if peer.name.is_empty() {
                return Err(Error::config("peer entry without a name"));
            }
            if !peer.is_dynamic() && peer.address().is_none() {
                warn!("Peer '{}' host '{:?}' is not an IP address; it will be resolved when dialed",
                    peer.name, peer.host);
            }
        }
        Ok(())
    }

    /// Codecs this endpoint accepts
    pub fn capability(&self) -> u32 {
        apply_codec_lists(
            self.general.bandwidth.capability(),
            &self.general.allow,
            &self.general.disallow,
        )
    }

    pub fn jitter_settings(&self) -> JitterSettings {
        JitterSettings {
            enabled: self.general.jitterbuffer,
            max_jitter_buffer: self.general.maxjitterbuffer,
            max_excess_buffer: self.general.maxexcessbuffer,
            drop_count: self.general.dropcount,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.general.pingtime)
    }

    pub fn lagrq_interval(&self) -> Duration {
        Duration::from_secs(self.general.lagrqtime)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.general.bindaddr, self.general.port)
    }

    pub fn find_peer(&self, name: &str) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Name of the peer configured at exactly `addr`
    pub fn peer_name_for(&self, addr: SocketAddr) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| p.address() == Some(addr))
            .map(|p| p.name.as_str())
    }
}
