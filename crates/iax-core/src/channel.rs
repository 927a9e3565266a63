//! Channel API
//!
//! An [`IaxChannel`] is the PBX-facing end of one call. The protocol engine
//! pushes [`ChannelEvent`]s into a per-call pipe; the channel reads them
//! without touching any engine lock. Writes go the other way through the
//! engine, which frames and queues them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::endpoint::Engine;
use crate::error::{CallError, Result};
use crate::frame::{format, FrameType, MediaFrame, CONTROL_ANSWER};
use crate::session::CallRef;

/// What the engine tells a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A frame for the PBX, already past the jitter buffer
    Frame(MediaFrame),
    /// The far end accepted our call with this format
    Accepted { format: u32 },
    /// The call is over. `cause` is the sticky call error, if any.
    Hangup { cause: Option<CallError> },
}

/// Engine side of a channel's event pipe
#[derive(Debug)]
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelLink {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the channel has gone away
    pub fn send(&self, event: ChannelEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Ringing,
    Up,
    Down,
}

/// Call details as presented by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub exten: String,
    pub context: String,
    pub callerid: String,
    pub ani: String,
    pub dnid: String,
    pub username: String,
    pub language: String,
    pub peer_addr: Option<SocketAddr>,
}

/// Receives every inbound call once it has been accepted
#[async_trait]
pub trait Pbx: Send + Sync {
    async fn start(&self, channel: IaxChannel);
}

/// A PBX that hangs up every call it is given
pub struct NullPbx;

#[async_trait]
impl Pbx for NullPbx {
    async fn start(&self, mut channel: IaxChannel) {
        debug!("No PBX configured, hanging up {}", channel.name());
        channel.hangup();
    }
}

pub struct IaxChannel {
    engine: Arc<Engine>,
    call: CallRef,
    name: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    state: ChannelState,
    format: u32,
    info: ChannelInfo,
    cause: Option<CallError>,
    hung_up: bool,
}

impl IaxChannel {
    pub(crate) fn new(
        engine: Arc<Engine>,
        call: CallRef,
        name: String,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        state: ChannelState,
        format: u32,
        info: ChannelInfo,
    ) -> Self {
        Self {
            engine,
            call,
            name,
            events,
            state,
            format,
            info,
            cause: None,
            hung_up: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self) -> CallRef {
        self.call
    }

    pub fn callno(&self) -> u16 {
        self.call.callno
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Negotiated voice format
    pub fn format(&self) -> u32 {
        self.format
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    /// Next event from the engine, or `None` once the pipe is closed
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        let event = self.events.recv().await?;
        self.observe(&event);
        Some(event)
    }

    /// Non-blocking [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        let event = self.events.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Frame(frame)
                if frame.frame_type == FrameType::Control && frame.subclass == CONTROL_ANSWER =>
            {
                self.state = ChannelState::Up;
            }
            ChannelEvent::Accepted { format } => {
                debug!("{} format is {}", self.name, format::name(*format));
                self.format = *format;
            }
            ChannelEvent::Hangup { cause } => {
                self.cause = *cause;
                self.state = ChannelState::Down;
            }
            _ => {}
        }
    }

    /// Send any frame on the call. Frames written after the far end went
    /// away are discarded; writing to a failed call is an error.
    pub fn write(&self, frame: MediaFrame) -> Result<()> {
        self.engine.channel_write(self.call, frame)
    }

    pub fn write_voice(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.write(MediaFrame::voice(self.format, payload))
    }

    pub fn send_dtmf(&self, digit: char) -> Result<()> {
        self.write(MediaFrame::new(FrameType::Dtmf, digit as u32, Bytes::new()))
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);
        self.write(MediaFrame::new(FrameType::Text, 0, payload))
    }

    pub fn answer(&mut self) -> Result<()> {
        self.write(MediaFrame::new(FrameType::Control, CONTROL_ANSWER, Bytes::new()))?;
        self.state = ChannelState::Up;
        Ok(())
    }

    /// End the call. Safe to call more than once.
    pub fn hangup(&mut self) {
        if self.hung_up {
            return;
        }
        self.hung_up = true;
        self.state = ChannelState::Down;
        self.engine.channel_hangup(self.call);
    }

    /// Sticky error of the call, if it failed
    pub fn error(&self) -> Option<CallError> {
        self.engine.call_error(self.call).or(self.cause)
    }
}

impl Drop for IaxChannel {
    fn drop(&mut self) {
        self.hangup();
    }
}

impl fmt::Debug for IaxChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IaxChannel")
            .field("name", &self.name)
            .field("call", &self.call)
            .field("state", &self.state)
            .field("format", &self.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_reports_closed_pipe() {
        let (link, rx) = ChannelLink::pair();
        assert!(link.send(ChannelEvent::Accepted { format: format::GSM }));
        drop(rx);
        assert!(!link.send(ChannelEvent::Hangup { cause: None }));
    }
}
