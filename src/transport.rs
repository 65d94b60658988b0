//! Telemetry link abstraction.
//!
//! The harness only needs two things from a link: fire-and-forget publication of
//! outbound frames, and a callback per inbound frame. [`UdpTransport`] talks to a real
//! autopilot or MAVLink router; [`LoopbackTransport`] is an in-process link whose far
//! end is a closure, used to simulate an FCU.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
pub use crate::frame::Frame;
use crate::frame::{encode_v1, FrameDecoder, FrameError};

const MAX_DATAGRAM_SIZE: usize = 2048;

/// Callback invoked once per inbound frame.
pub type FrameHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no FCU peer address known yet (nothing received on the link)")]
    NoPeer,
    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot encode frame: {0}")]
    Encode(#[from] FrameError),
    #[error("link closed")]
    Closed,
}

pub trait TransportAdapter: Send + Sync {
    /// Queue `frame` for transmission. Does not wait for delivery.
    fn publish(&self, frame: Frame) -> Result<(), TransportError>;

    /// Register `handler` to be called for every inbound frame, in arrival order.
    fn on_receive(&self, handler: FrameHandler);
}

/// Registered inbound handlers.
///
/// Dispatch snapshots the list and calls handlers outside the lock, so a handler may
/// register further handlers or publish without deadlocking.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<FrameHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: FrameHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn dispatch(&self, frame: &Frame) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(frame);
        }
    }
}

/// MAVLink over UDP.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    handlers: Arc<HandlerRegistry>,
    sequence: AtomicU8,
    system_id: u8,
    component_id: u8,
    reader: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind the local endpoint and start the inbound reader task.
    pub async fn bind(config: &LinkConfig) -> Result<Arc<Self>, TransportError> {
        let socket = Arc::new(UdpSocket::bind(config.bind).await?);
        info!("📡 Telemetry link bound on {}", socket.local_addr()?);
        if let Some(remote) = config.remote {
            info!("📡 Sending to fixed FCU endpoint {}", remote);
        }

        let peer = Arc::new(Mutex::new(config.remote));
        let handlers = Arc::new(HandlerRegistry::new());
        let reader = tokio::spawn(read_loop(
            Arc::clone(&socket),
            Arc::clone(&peer),
            Arc::clone(&handlers),
            config.remote.is_none(),
        ));

        Ok(Arc::new(Self {
            socket,
            peer,
            handlers,
            sequence: AtomicU8::new(0),
            system_id: config.system_id,
            component_id: config.component_id,
            reader,
        }))
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    socket: Arc<UdpSocket>,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    handlers: Arc<HandlerRegistry>,
    learn_peer: bool,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP port-unreachable surfaces here on some platforms; keep reading.
                debug!("Link receive error: {}", e);
                continue;
            }
        };

        if learn_peer {
            let mut current = peer.lock().unwrap_or_else(PoisonError::into_inner);
            if *current != Some(from) {
                info!("🔗 FCU link peer is {}", from);
                *current = Some(from);
            }
        }

        for frame in decoder.push(&buf[..len]) {
            trace!("Inbound frame id={} from {}:{}", frame.msg_id, frame.system_id, frame.component_id);
            handlers.dispatch(&frame);
        }
    }
}

impl TransportAdapter for UdpTransport {
    fn publish(&self, frame: Frame) -> Result<(), TransportError> {
        let peer = self.peer().ok_or(TransportError::NoPeer)?;
        let frame = frame.with_source(self.system_id, self.component_id);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_v1(&frame, sequence)?;

        match self.socket.try_send_to(&bytes, peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!("Link send buffer full, dropping frame id={}", frame.msg_id);
                Ok(())
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn on_receive(&self, handler: FrameHandler) {
        self.handlers.register(handler);
    }
}

type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

/// In-process link. Published frames are recorded and optionally answered by a
/// responder closure standing in for the FCU; replies are dispatched synchronously.
#[derive(Default)]
pub struct LoopbackTransport {
    handlers: HandlerRegistry,
    published: Mutex<Vec<Frame>>,
    responder: Mutex<Option<Responder>>,
    closed: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: FnMut(&Frame) -> Vec<Frame> + Send + 'static,
    {
        let transport = Self::default();
        *transport.responder.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(responder));
        Arc::new(transport)
    }

    /// Feed an inbound frame to every registered handler.
    pub fn deliver(&self, frame: &Frame) {
        self.handlers.dispatch(frame);
    }

    pub fn published(&self) -> Vec<Frame> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Make every further `publish` fail, as a dead link would.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl TransportAdapter for LoopbackTransport {
    fn publish(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let replies = {
            let mut responder = self.responder.lock().unwrap_or_else(PoisonError::into_inner);
            responder.as_mut().map(|respond| respond(&frame)).unwrap_or_default()
        };
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);

        for reply in &replies {
            self.deliver(reply);
        }
        Ok(())
    }

    fn on_receive(&self, handler: FrameHandler) {
        self.handlers.register(handler);
    }
}
