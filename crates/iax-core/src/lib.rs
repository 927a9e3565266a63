//! IAX protocol engine for the rvoip stack
//!
//! This crate switches voice calls between IAX peers over a single UDP
//! socket: frame encoding, call sessions, reliable delivery of full frames,
//! jitter buffering of received media and challenge/response
//! authentication. Accepted calls are handed to a [`Pbx`] as
//! [`IaxChannel`]s; outbound calls are placed with [`IaxEndpoint::call`].

pub mod admin;
pub mod auth;
pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod jitter;
pub mod logging;
pub mod network;
pub mod sched;
pub mod session;
pub mod transmit;

pub use admin::{Admin, ChannelReport};
pub use channel::{ChannelEvent, ChannelInfo, ChannelState, IaxChannel, NullPbx, Pbx};
pub use config::IaxConfig;
pub use endpoint::{CallOptions, DialString, Engine, EngineStats};
pub use error::{CallError, Error, Result};
pub use frame::{format, FrameType, IaxCommand, MediaFrame};
pub use network::{ControlMessage, IaxEndpoint};

/// Bind an endpoint with the given configuration
pub async fn bind(config: IaxConfig, pbx: std::sync::Arc<dyn Pbx>) -> Result<IaxEndpoint> {
    IaxEndpoint::bind(config, pbx).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        bind, format, Admin, CallError, CallOptions, ChannelEvent, ChannelInfo, ChannelState,
        Error, FrameType, IaxChannel, IaxConfig, IaxEndpoint, MediaFrame, NullPbx, Pbx, Result,
    };
    pub use async_trait::async_trait;
}
