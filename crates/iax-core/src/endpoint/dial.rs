//! Outbound calls
//!
//! A dial string has the form `[user[:secret]@]host[:port][/exten[@context]]`.
//! `host` is either the name of a configured peer or a hostname/address.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;

use super::{Engine, SendMode};
use crate::channel::{ChannelState, IaxChannel};
use crate::config::{IaxConfig, DEFAULT_PORT, PROTOCOL_VERSION};
use crate::error::{Error, Result};
use crate::frame::{format, IaxCommand, IaxParams};
use crate::session::FindMode;

/// Extension dialled when the dial string names none
pub const DEFAULT_EXTEN: &str = "s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialString {
    pub username: Option<String>,
    pub secret: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub exten: String,
    pub context: Option<String>,
}

impl DialString {
    pub fn parse(dial: &str) -> Result<Self> {
        let dial = dial.trim();
        let (dest, target) = match dial.split_once('/') {
            Some((dest, target)) => (dest, Some(target)),
            None => (dial, None),
        };

        let (credentials, hostport) = match dest.rsplit_once('@') {
            Some((credentials, hostport)) => (Some(credentials), hostport),
            None => (None, dest),
        };
        let (username, secret) = match credentials {
            Some(credentials) => match credentials.split_once(':') {
                Some((user, secret)) => (non_empty(user), non_empty(secret)),
                None => (non_empty(credentials), None),
            },
            None => (None, None),
        };

        let (host, port) = match hostport.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::invalid_dial(dial, format!("bad port '{}'", port)))?;
                (host, Some(port))
            }
            None => (hostport, None),
        };
        if host.is_empty() {
            return Err(Error::invalid_dial(dial, "no host given"));
        }

        let (exten, context) = match target {
            Some(target) => match target.split_once('@') {
                Some((exten, context)) => (exten, non_empty(context)),
                None => (target, None),
            },
            None => (DEFAULT_EXTEN, None),
        };
        let exten = if exten.is_empty() { DEFAULT_EXTEN } else { exten };

        Ok(Self {
            username,
            secret,
            host: host.to_string(),
            port,
            exten: exten.to_string(),
            context,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl FromStr for DialString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DialString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.username {
            write!(f, "{}", user)?;
            if self.secret.is_some() {
                write!(f, ":****")?;
            }
            write!(f, "@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "/{}", self.exten)?;
        if let Some(context) = &self.context {
            write!(f, "@{}", context)?;
        }
        Ok(())
    }
}

/// Per-call choices made by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub callerid: Option<String>,
    /// Preferred voice format; ignored unless the call's capability has it
    pub format: Option<u32>,
}

/// Everything needed to place a call, after peer lookup and resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub addr: SocketAddr,
    pub peer: Option<String>,
    pub username: String,
    pub secret: String,
    pub exten: String,
    pub context: String,
    pub callerid: String,
    pub capability: u32,
    pub format: u32,
}

impl CallTarget {
    /// Resolve a dial string against the configured peers, falling back to
    /// a DNS lookup of the host part
    pub async fn resolve(
        config: &IaxConfig,
        dial: &DialString,
        options: &CallOptions,
    ) -> Result<Self> {
        let global = config.capability();
        let mut target = match config.find_peer(&dial.host) {
            Some(peer) => {
                let addr = match (peer.address(), peer.host.as_deref()) {
                    (Some(addr), _) => addr,
                    (None, Some(host)) if !peer.is_dynamic() => {
                        lookup(host, peer.port.unwrap_or(DEFAULT_PORT)).await?
                    }
                    _ => {
                        return Err(Error::UnknownHost {
                            host: format!("{} (dynamic peer not registered)", peer.name),
                        });
                    }
                };
                Self {
                    addr,
                    peer: Some(peer.name.clone()),
                    username: peer.username.clone(),
                    secret: String::new(),
                    exten: dial.exten.clone(),
                    context: peer.context.clone(),
                    callerid: String::new(),
                    capability: peer.capability(global),
                    format: 0,
                }
            }
            None => Self {
                addr: lookup(&dial.host, dial.port.unwrap_or(DEFAULT_PORT)).await?,
                peer: None,
                username: String::new(),
                secret: String::new(),
                exten: dial.exten.clone(),
                context: String::new(),
                callerid: String::new(),
                capability: global,
                format: 0,
            },
        };

        if let Some(port) = dial.port {
            target.addr.set_port(port);
        }
        if let Some(username) = &dial.username {
            target.username = username.clone();
        }
        if let Some(secret) = &dial.secret {
            target.secret = secret.clone();
        }
        if let Some(context) = &dial.context {
            target.context = context.clone();
        }
        if let Some(callerid) = &options.callerid {
            target.callerid = callerid.clone();
        }
        target.format = options
            .format
            .filter(|f| f & target.capability != 0)
            .or_else(|| format::best_codec(target.capability))
            .ok_or_else(|| Error::config(format!("no codecs allowed for calls to {}", dial.host)))?;
        Ok(target)
    }
}

async fn lookup(host: &str, port: u16) -> Result<SocketAddr> {
    let unknown = || Error::UnknownHost {
        host: host.to_string(),
    };
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| unknown())?;
    addrs.next().ok_or_else(unknown)
}

impl Engine {
    /// Allocate a call to `target` and send NEW. The returned channel is
    /// ringing until the far end accepts.
    pub fn start_call(self: &Arc<Self>, target: CallTarget, now: Instant) -> Result<IaxChannel> {
        let mut sessions = self.sessions.lock();
        let (callno, _) = sessions
            .find_or_create(0, 0, target.addr, FindMode::ForceNew)?
            .ok_or(Error::NoFreeCallSlots)?;
        let session = sessions
            .get_mut(callno)
            .ok_or(Error::SessionNotFound { callno })?;
        self.init_session(session, now);

        session.capability = target.capability;
        session.peer = target.peer;
        session.username = target.username;
        session.secret = target.secret;
        session.exten = target.exten;
        session.context = target.context;
        session.callerid = target.callerid;
        session.dnid = session.exten.clone();

        let mut params = IaxParams::new().with("exten", &session.exten);
        if !session.callerid.is_empty() {
            params.push("callerid", &session.callerid);
        }
        params.push("dnid", &session.dnid);
        if !session.context.is_empty() {
            params.push("context", &session.context);
        }
        if !session.username.is_empty() {
            params.push("username", &session.username);
        }
        params.push("formats", target.format);
        params.push("capability", session.capability);
        params.push("version", PROTOCOL_VERSION);

        self.send_command(
            session,
            IaxCommand::New,
            0,
            params.encode(),
            None,
            now,
            SendMode::Queued,
        );
        info!(
            "Calling {}/{} at {} on call {}",
            session.peer.as_deref().unwrap_or("-"),
            session.exten,
            session.addr,
            callno
        );

        Ok(self.attach_channel(session, ChannelState::Ringing, target.format))
    }
}
