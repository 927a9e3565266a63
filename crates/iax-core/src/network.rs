//! UDP endpoint
//!
//! [`IaxEndpoint`] binds the socket and spawns the network task that drives
//! an [`Engine`]: it drains the retransmit queue, flushes the outbox,
//! waits for a datagram, a timer deadline, new outgoing work or a control
//! message, and runs whatever timers have come due.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::admin::Admin;
use crate::channel::{IaxChannel, Pbx};
use crate::config::IaxConfig;
use crate::endpoint::{CallOptions, CallTarget, DialString, Engine};
use crate::error::{Error, Result};

// Default control channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Longest the loop sleeps without a timer due
const MAX_IDLE: Duration = Duration::from_millis(1000);

/// Largest datagram we read
const MAX_DATAGRAM: usize = 4096;

/// Requests to the network task
#[derive(Debug)]
pub enum ControlMessage {
    /// Swap in a new, already validated configuration
    Reload(Box<IaxConfig>),
    Shutdown,
}

/// A bound IAX endpoint
#[derive(Clone)]
pub struct IaxEndpoint {
    inner: Arc<IaxEndpointInner>,
}

struct IaxEndpointInner {
    engine: Arc<Engine>,
    local_addr: SocketAddr,
    control_tx: mpsc::Sender<ControlMessage>,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IaxEndpoint {
    /// Bind to the configured address and start the network task. Every
    /// accepted inbound call is handed to `pbx` on its own task.
    pub async fn bind(config: IaxConfig, pbx: Arc<dyn Pbx>) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(config.bind_addr()).await?;
        let local_addr = socket.local_addr()?;
        info!("IAX endpoint bound to {}", local_addr);

        let engine = Engine::new(config);
        let (control_tx, control_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let task = tokio::spawn(run_network(engine.clone(), socket, pbx, control_rx));

        Ok(Self {
            inner: Arc::new(IaxEndpointInner {
                engine,
                local_addr,
                control_tx,
                closed: AtomicBool::new(false),
                task: Mutex::new(Some(task)),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.inner.engine
    }

    /// Operator view of this endpoint
    pub fn admin(&self) -> Admin {
        Admin::new(self.inner.engine.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// Place a call. See [`DialString`] for the dial string format.
    pub async fn call(&self, dial: &str, options: CallOptions) -> Result<IaxChannel> {
        if self.is_closed() {
            return Err(Error::Shutdown);
        }
        let dial = DialString::parse(dial)?;
        let config = self.inner.engine.config();
        let target = CallTarget::resolve(&config, &dial, &options).await?;
        debug!("Dialing {} at {}", dial, target.addr);
        self.inner.engine.start_call(target, Instant::now())
    }

    /// Replace the configuration. Calls in progress are not affected.
    pub async fn reload(&self, config: IaxConfig) -> Result<()> {
        config.validate()?;
        self.inner
            .control_tx
            .send(ControlMessage::Reload(Box::new(config)))
            .await
            .map_err(|_| Error::Shutdown)
    }

    /// Stop the network task and tear down every call
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let _ = self.inner.control_tx.send(ControlMessage::Shutdown).await;
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("IAX network task failed: {}", e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for IaxEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IaxEndpoint({})", self.inner.local_addr)
    }
}

async fn run_network(
    engine: Arc<Engine>,
    socket: UdpSocket,
    pbx: Arc<dyn Pbx>,
    mut control_rx: mpsc::Receiver<ControlMessage>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        engine.drain(Instant::now());
        flush(&engine, &socket).await;
        for channel in engine.take_incoming() {
            let pbx = pbx.clone();
            tokio::spawn(async move { pbx.start(channel).await });
        }

        let now = Instant::now();
        let deadline = engine
            .next_deadline()
            .map_or(now + MAX_IDLE, |at| at.min(now + MAX_IDLE));

        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => engine.handle_datagram(&buf[..len], from, Instant::now()),
                // Typically an ICMP error for an earlier send
                Err(e) => warn!("Error receiving IAX datagram: {}", e),
            },
            _ = tokio::time::sleep_until(deadline) => {}
            _ = engine.notifier().notified() => {}
            message = control_rx.recv() => match message {
                Some(ControlMessage::Reload(config)) => engine.reload(*config),
                Some(ControlMessage::Shutdown) | None => break,
            },
        }

        engine.run_timers(Instant::now());
    }

    engine.shutdown();
    engine.drain(Instant::now());
    flush(&engine, &socket).await;
    // Channels nobody picked up hang up here, outside any engine lock
    drop(engine.take_incoming());
    info!("IAX network loop terminated");
}

async fn flush(engine: &Engine, socket: &UdpSocket) {
    for datagram in engine.take_outbox() {
        if let Err(e) = socket.send_to(&datagram.data, datagram.addr).await {
            error!("Error sending {} bytes to {}: {}", datagram.data.len(), datagram.addr, e);
        }
    }
}
