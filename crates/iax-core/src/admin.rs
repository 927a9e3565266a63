//! Operator reports and runtime knobs

use std::net::SocketAddr;
use std::sync::Arc;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::endpoint::{Engine, EngineStats};
use crate::frame::format;
use crate::session::CallState;

/// One row of the channel report
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct ChannelReport {
    #[tabled(rename = "Address")]
    pub addr: SocketAddr,
    /// Configured peer name, when the call is to or from one
    #[tabled(rename = "Peer", display_with = "display_or_dash")]
    pub peer: Option<String>,
    #[tabled(rename = "Username", display_with = "display_username")]
    pub username: String,
    #[tabled(rename = "ID")]
    pub callno: u16,
    #[tabled(rename = "Remote ID", display_with = "display_or_dash")]
    pub peer_callno: Option<u16>,
    #[tabled(rename = "Tx Seq")]
    pub oseqno: u16,
    #[tabled(rename = "Rx Seq")]
    pub iseqno: u16,
    #[tabled(rename = "Lag")]
    pub lag: u32,
    #[tabled(rename = "Jitter")]
    pub jitter: i32,
    #[tabled(rename = "JB")]
    pub jitterbuffer: i32,
    #[tabled(rename = "Format", display_with = "display_format")]
    pub format: u32,
    #[tabled(rename = "State", display_with = "display_state")]
    pub state: CallState,
}

/// One row of the user or peer report
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct AccountReport {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Secret", display_with = "display_yes_no")]
    pub has_secret: bool,
    #[tabled(rename = "Methods")]
    pub methods: String,
    /// Context for users, host for peers
    #[tabled(rename = "Context/Host")]
    pub detail: String,
}

fn display_or_dash<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "-".to_string(), T::to_string)
}

fn display_username(username: &String) -> String {
    if username.is_empty() {
        "(None)".to_string()
    } else {
        username.clone()
    }
}

fn display_format(format: &u32) -> String {
    format::name(*format).to_string()
}

fn display_state(state: &CallState) -> String {
    state.name().to_string()
}

fn display_yes_no(flag: &bool) -> String {
    if *flag { "yes" } else { "no" }.to_string()
}

#[derive(Clone)]
pub struct Admin {
    engine: Arc<Engine>,
}

impl Admin {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn channels(&self) -> Vec<ChannelReport> {
        let config = self.engine.config();
        self.engine.with_sessions(|table| {
            table
                .iter()
                .map(|s| ChannelReport {
                    addr: s.addr,
                    peer: s
                        .peer
                        .clone()
                        .or_else(|| config.peer_name_for(s.addr).map(str::to_string)),
                    username: s.username.clone(),
                    callno: s.callno,
                    peer_callno: s.peer_callno,
                    oseqno: s.oseqno,
                    iseqno: s.iseqno,
                    lag: s.lag,
                    jitter: s.jitter.jitter(),
                    jitterbuffer: s.jitter.size(),
                    format: s.voiceformat,
                    state: s.state,
                })
                .collect()
        })
    }

    pub fn users(&self) -> Vec<AccountReport> {
        self.engine
            .config()
            .users
            .iter()
            .map(|u| AccountReport {
                name: u.name.clone(),
                has_secret: !u.secret.is_empty(),
                methods: u.methods().to_string(),
                detail: u.context.join(","),
            })
            .collect()
    }

    pub fn peers(&self) -> Vec<AccountReport> {
        self.engine
            .config()
            .peers
            .iter()
            .map(|p| AccountReport {
                name: p.name.clone(),
                has_secret: !p.secret.is_empty(),
                methods: p.auth.clone(),
                detail: match p.address() {
                    Some(addr) => addr.to_string(),
                    None if p.is_dynamic() => "(Unspecified)".to_string(),
                    None => p.host.clone().unwrap_or_default(),
                },
            })
            .collect()
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub fn set_max_jitter_buffer(&self, ms: i32) {
        self.engine.set_max_jitter_buffer(ms);
    }

    /// Log every frame sent and received at info level
    pub fn set_debug(&self, enabled: bool) {
        self.engine.set_debug(enabled);
    }
}

pub fn render_channels(rows: &[ChannelReport]) -> String {
    let mut table = Table::new(rows);
    table.with(Style::blank());
    format!("{}\n{} active IAX channel(s)", table, rows.len())
}

pub fn render_accounts(rows: &[AccountReport]) -> String {
    let mut table = Table::new(rows);
    table.with(Style::blank());
    table.to_string()
}

pub fn render_stats(stats: &EngineStats) -> String {
    format!(
        "calls: {}\nqueued frames: {} ({} unsent)\npending timers: {}\nframes in/out: {}/{}\nretransmits: {}\ntimeouts: {}\nlate drops: {}\ninvalid datagrams: {}",
        stats.calls,
        stats.queued_frames,
        stats.unsent_frames,
        stats.pending_timers,
        stats.frames_in,
        stats.frames_out,
        stats.retransmits,
        stats.timeouts,
        stats.late_drops,
        stats.invalid_datagrams
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IaxConfig, PeerConfig, UserConfig};
    use crate::endpoint::CallTarget;
    use tokio::time::Instant;

    fn engine() -> Arc<Engine> {
        let mut config = IaxConfig::default();
        config.users.push(UserConfig {
            name: "guest".to_string(),
            context: vec!["default".to_string()],
            ..UserConfig::default()
        });
        config.peers.push(PeerConfig {
            name: "office".to_string(),
            secret: "pw".to_string(),
            host: Some("192.0.2.1".to_string()),
            ..PeerConfig::default()
        });
        Engine::new(config)
    }

    #[test]
    fn test_channel_report() {
        let engine = engine();
        let admin = Admin::new(engine.clone());
        assert!(admin.channels().is_empty());

        let target = CallTarget {
            addr: "192.0.2.1:5036".parse().unwrap(),
            peer: None,
            username: "me".to_string(),
            secret: String::new(),
            exten: "100".to_string(),
            context: String::new(),
            callerid: String::new(),
            capability: format::ULAW,
            format: format::ULAW,
        };
        let _channel = engine.start_call(target, Instant::now()).unwrap();

        let rows = admin.channels();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].peer.as_deref(), Some("office"));
        assert_eq!(rows[0].username, "me");
        assert_eq!(rows[0].oseqno, 1);
        assert_eq!(rows[0].state, CallState::Unauthenticated);

        let text = render_channels(&rows);
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        for column in ["Address", "Peer", "Username", "Remote ID", "Tx Seq", "State"] {
            assert!(header.contains(column), "missing column {}", column);
        }
        let row = lines.next().unwrap();
        assert!(row.contains("office"));
        assert!(row.contains("192.0.2.1:5036"));
        assert!(row.contains("unauthenticated"));
        assert!(text.ends_with("1 active IAX channel(s)"));

        let empty = render_channels(&[]);
        assert!(empty.ends_with("0 active IAX channel(s)"));
    }

    #[test]
    fn test_account_reports() {
        let admin = Admin::new(engine());
        let users = admin.users();
        assert_eq!(users[0].name, "guest");
        assert!(!users[0].has_secret);
        assert_eq!(users[0].methods, "md5,plaintext");
        assert_eq!(users[0].detail, "default");

        let peers = admin.peers();
        assert_eq!(peers[0].detail, "192.0.2.1:5036");
        let text = render_accounts(&peers);
        assert!(text.lines().next().unwrap().contains("Context/Host"));
        let row = text.lines().nth(1).unwrap();
        assert!(row.contains("office"));
        assert!(row.contains("yes"));
        assert!(render_accounts(&users).contains("no"));
    }

    #[test]
    fn test_knobs() {
        let engine = engine();
        let admin = Admin::new(engine.clone());
        admin.set_max_jitter_buffer(-5);
        assert_eq!(engine.jitter_settings().max_jitter_buffer, 0);
        admin.set_debug(true);
        assert!(engine.is_debug());
        assert!(render_stats(&admin.stats()).starts_with("calls: 0"));
    }
}
