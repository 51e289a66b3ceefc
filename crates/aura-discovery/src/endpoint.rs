//! Discovery endpoint
//!
//! Owns identity, configuration and the active delivery mechanism. Outbound:
//! `send` builds an envelope, encodes it, and fans the bytes out to every
//! destination. Inbound: each datagram is decoded, filtered, and dispatched
//! to listeners registered on the endpoint's [`EventRegistry`].
//!
//! Datagrams are never fragmented. A payload that does not fit in one UDP
//! datagram (about 64 KiB, less on most links) is lost.

use crate::channel::{ChannelSubscription, SharedChannel};
use crate::codec::{Codec, CodecStats};
use crate::config::EndpointConfig;
use crate::crypto::SharedKey;
use crate::envelope::{Envelope, SenderInfo};
use crate::error::{TransportError, TransportResult};
use crate::events::{EndpointEvent, EventKey, EventRegistry, Subscription};
use crate::filter::{FilterVerdict, SelfFilter};
use crate::identity::{InstanceId, ProcessId, ProcessIdentity};
use crate::socket::{self, MAX_DATAGRAM};
use crate::transport::TransportMode;
use parking_lot::Mutex;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Inbound path
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one inbound datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Dispatched as a named event to this many listeners
    Named(usize),
    /// Dispatched on the generic `message` channel to this many listeners
    Message(usize),
    /// Suppressed by the self filter
    Filtered(FilterVerdict),
    /// Could not be decoded (wrong key, garbage, truncation)
    Undecodable,
}

#[derive(Debug)]
struct Inbound {
    codec: Arc<Codec>,
    filter: SelfFilter,
    events: Arc<EventRegistry>,
}

impl Inbound {
    fn handle(&self, raw: &[u8], sender: SenderInfo) -> Delivery {
        let envelope = match self.codec.decode(raw, &sender) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(%sender, error = %err, "dropping undecodable datagram");
                return Delivery::Undecodable;
            }
        };

        let verdict = self.filter.verdict(&envelope);
        if !verdict.is_deliver() {
            debug!(%sender, event = %envelope.event, ?verdict, "suppressing own message");
            return Delivery::Filtered(verdict);
        }

        match envelope.named_payload() {
            Some((event, payload)) => {
                let notice = EndpointEvent::Named {
                    event: event.to_string(),
                    payload: payload.clone(),
                    envelope: envelope.clone(),
                    sender,
                };
                Delivery::Named(self.events.dispatch(&notice))
            }
            None => Delivery::Message(self.events.dispatch(&EndpointEvent::Message(envelope))),
        }
    }
}

async fn socket_loop(
    socket: Arc<UdpSocket>,
    inbound: Arc<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buffer) => match received {
                Ok((len, from)) => {
                    inbound.handle(&buffer[..len], SenderInfo::from_socket(from, len));
                }
                Err(err) => debug!(error = %err, "datagram receive failed"),
            },
        }
    }
}

async fn channel_loop(
    mut subscription: ChannelSubscription,
    inbound: Arc<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = subscription.recv() => match message {
                Some(message) => {
                    inbound.handle(&message.bytes, message.origin);
                }
                None => {
                    debug!("shared channel subscription closed");
                    break;
                }
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound path
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Link {
    Datagram {
        socket: Arc<UdpSocket>,
        destinations: Arc<[String]>,
        port: u16,
    },
    Channel {
        name: String,
        backend: Arc<dyn SharedChannel>,
    },
}

impl Link {
    async fn transmit(&self, bytes: Vec<u8>) {
        match self {
            Self::Datagram {
                socket,
                destinations,
                port,
            } => {
                for destination in destinations.iter() {
                    if let Err(err) = socket.send_to(&bytes, (destination.as_str(), *port)).await {
                        warn!(%destination, port, error = %err, "datagram send failed");
                    }
                }
            }
            Self::Channel { name, backend } => {
                if let Err(err) = backend.publish(name, bytes).await {
                    warn!(channel = %name, error = %err, "shared channel publish failed");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint
// ─────────────────────────────────────────────────────────────────────────────

struct Running {
    mode: TransportMode,
    link: Link,
    socket: Option<Arc<UdpSocket>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum EndpointState {
    Idle,
    Running(Running),
    Stopped,
}

/// Peer-discovery endpoint
pub struct Endpoint {
    config: EndpointConfig,
    process_id: ProcessId,
    instance_id: InstanceId,
    host_name: String,
    channel: Option<Arc<dyn SharedChannel>>,
    inbound: Arc<Inbound>,
    state: Mutex<EndpointState>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("process_id", &self.process_id)
            .field("instance_id", &self.instance_id)
            .field("host_name", &self.host_name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Endpoint {
    /// Create an endpoint for this process.
    ///
    /// A fresh instance identifier is generated; the process identifier and
    /// the fixed IV come from `identity`.
    pub fn new(config: EndpointConfig, identity: &ProcessIdentity) -> Self {
        let instance_id = InstanceId::generate();
        let key = config.key.as_deref().map(SharedKey::from_text);
        let codec = Codec::new(key, config.iv_policy, *identity.cipher_iv());
        let filter = SelfFilter::new(
            identity.process_id(),
            instance_id,
            config.ignore_process,
            config.ignore_instance,
        );
        let host_name = config.resolved_host_name();

        Self {
            process_id: identity.process_id(),
            instance_id,
            host_name,
            channel: None,
            inbound: Arc::new(Inbound {
                codec: Arc::new(codec),
                filter,
                events: Arc::new(EventRegistry::new()),
            }),
            state: Mutex::new(EndpointState::Idle),
            config,
        }
    }

    /// Supply the pub/sub backend for shared-channel mode
    pub fn with_shared_channel(mut self, backend: Arc<dyn SharedChannel>) -> Self {
        self.channel = Some(backend);
        self
    }

    /// Bind and resolve the delivery mode.
    ///
    /// Any failure is also published on the `Error` event before being
    /// returned. On failure the endpoint stays stopped and may be started
    /// again.
    pub async fn start(&self) -> TransportResult<()> {
        match self.try_start().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(instance = %self.instance_id, error = %err, "endpoint failed to start");
                let reported = replicate(&err);
                self.inbound
                    .events
                    .dispatch(&EndpointEvent::Error(Arc::new(reported)));
                Err(err)
            }
        }
    }

    async fn try_start(&self) -> TransportResult<()> {
        if self.is_running() {
            return Err(TransportError::InvalidState(
                "endpoint already started".to_string(),
            ));
        }
        self.config.validate()?;
        let mode = TransportMode::resolve(&self.config, self.channel.as_ref())?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let running = match &mode {
            TransportMode::SharedChannel { name, backend } => {
                let subscription = backend.subscribe(name).await?;
                let task = tokio::spawn(channel_loop(
                    subscription,
                    self.inbound.clone(),
                    shutdown_rx,
                ));
                Running {
                    link: Link::Channel {
                        name: name.clone(),
                        backend: backend.clone(),
                    },
                    socket: None,
                    shutdown,
                    task,
                    mode: mode.clone(),
                }
            }
            _ => {
                let udp = Arc::new(socket::bind_udp(
                    &self.config.address,
                    self.config.port,
                    self.config.reuse_addr,
                )?);
                match &mode {
                    TransportMode::Broadcast(_) => socket::enable_broadcast(&udp)?,
                    TransportMode::Multicast { group, ttl } => {
                        socket::join_multicast(&udp, *group, *ttl)?;
                    }
                    _ => {}
                }
                let task = tokio::spawn(socket_loop(
                    udp.clone(),
                    self.inbound.clone(),
                    shutdown_rx,
                ));
                Running {
                    link: Link::Datagram {
                        socket: udp.clone(),
                        destinations: mode.destinations().into(),
                        port: self.config.destination_port(),
                    },
                    socket: Some(udp),
                    shutdown,
                    task,
                    mode: mode.clone(),
                }
            }
        };

        info!(
            instance = %self.instance_id,
            mode = mode.kind(),
            destinations = ?mode.destinations(),
            local = ?running.socket.as_ref().and_then(|s| s.local_addr().ok()),
            "discovery endpoint started"
        );

        let mut state = self.state.lock();
        if matches!(*state, EndpointState::Running(_)) {
            // Lost a race with a concurrent start
            let _ = running.shutdown.send(true);
            running.task.abort();
            return Err(TransportError::InvalidState(
                "endpoint already started".to_string(),
            ));
        }
        *state = EndpointState::Running(running);
        Ok(())
    }

    /// Close the socket or subscription.
    ///
    /// No listener is invoked after this returns. Stopping an endpoint that
    /// is not running is a no-op.
    pub async fn stop(&self) -> TransportResult<()> {
        let running = {
            let mut state = self.state.lock();
            if !matches!(*state, EndpointState::Running(_)) {
                return Ok(());
            }
            match std::mem::replace(&mut *state, EndpointState::Stopped) {
                EndpointState::Running(running) => running,
                EndpointState::Idle | EndpointState::Stopped => return Ok(()),
            }
        };

        let _ = running.shutdown.send(true);
        if let Err(err) = running.task.await {
            if err.is_panic() {
                warn!(instance = %self.instance_id, "receive loop panicked");
            }
        }
        info!(instance = %self.instance_id, mode = running.mode.kind(), "discovery endpoint stopped");
        Ok(())
    }

    /// Send `event` to every destination, fire-and-forget.
    ///
    /// `payload` is attached only when given. Encoding failures and sends
    /// before `start` are logged and dropped.
    pub async fn send(&self, event: &str, payload: Option<Value>) {
        let envelope = self.envelope(event, payload);
        let bytes = match self.inbound.codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(event, error = %err, "dropping send, encode failed");
                return;
            }
        };
        if bytes.len() > MAX_DATAGRAM {
            warn!(event, size = bytes.len(), "datagram exceeds UDP payload limit");
        }

        let link = match &*self.state.lock() {
            EndpointState::Running(running) => running.link.clone(),
            _ => {
                debug!(event, "dropping send, endpoint not started");
                return;
            }
        };
        link.transmit(bytes).await;
    }

    /// Build the envelope `send` would transmit
    pub fn envelope(&self, event: &str, payload: Option<Value>) -> Envelope {
        let envelope = Envelope::new(event, self.process_id, self.instance_id, &self.host_name);
        match payload {
            Some(data) => envelope.with_data(data),
            None => envelope,
        }
    }

    /// Run one inbound datagram through decode, filter and dispatch.
    ///
    /// The receive loop calls this for every datagram; it is public so other
    /// delivery paths can feed the endpoint directly.
    pub fn receive(&self, raw: &[u8], sender: SenderInfo) -> Delivery {
        self.inbound.handle(raw, sender)
    }

    /// Register a listener
    pub fn on<F>(&self, key: EventKey, listener: F) -> Subscription
    where
        F: Fn(&EndpointEvent) + Send + Sync + 'static,
    {
        self.inbound.events.subscribe(key, listener)
    }

    /// Remove a listener
    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inbound.events.unsubscribe(subscription)
    }

    /// Event registry backing `on`/`off`
    pub fn events(&self) -> &EventRegistry {
        &self.inbound.events
    }

    /// Whether `start` has succeeded and `stop` has not been called since
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), EndpointState::Running(_))
    }

    /// Resolved delivery mode, while running
    pub fn mode(&self) -> Option<TransportMode> {
        match &*self.state.lock() {
            EndpointState::Running(running) => Some(running.mode.clone()),
            _ => None,
        }
    }

    /// Current destination set, while running
    pub fn destinations(&self) -> Option<Vec<String>> {
        self.mode().map(|mode| mode.destinations())
    }

    /// Bound socket address, while running in a datagram mode
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.with_socket(|socket| socket.local_addr()).and_then(Result::ok)
    }

    /// Whether SO_BROADCAST is set, while running in a datagram mode
    pub fn broadcast_enabled(&self) -> Option<bool> {
        self.with_socket(|socket| socket.broadcast()).and_then(Result::ok)
    }

    fn with_socket<T>(&self, f: impl FnOnce(&UdpSocket) -> T) -> Option<T> {
        match &*self.state.lock() {
            EndpointState::Running(Running {
                socket: Some(socket),
                ..
            }) => Some(f(socket)),
            _ => None,
        }
    }

    /// Configuration the endpoint was built with
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Identifier shared by all endpoints in this process
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Identifier of this endpoint
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Hostname advertised in outbound envelopes
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Codec work counters
    pub fn codec_stats(&self) -> CodecStats {
        self.inbound.codec.stats()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let EndpointState::Running(running) = &*self.state.lock() {
            let _ = running.shutdown.send(true);
            running.task.abort();
        }
    }
}

/// Rebuild an error for the event channel; `io::Error` is not `Clone`
fn replicate(err: &TransportError) -> TransportError {
    let io_copy = |e: &io::Error| io::Error::new(e.kind(), e.to_string());
    match err {
        TransportError::Bind { address, source } => TransportError::Bind {
            address: address.clone(),
            source: io_copy(source),
        },
        TransportError::MulticastJoin { group, source } => TransportError::MulticastJoin {
            group: group.clone(),
            source: io_copy(source),
        },
        TransportError::Socket(source) => TransportError::Socket(io_copy(source)),
        TransportError::Channel(reason) => TransportError::Channel(reason.clone()),
        TransportError::InvalidConfig(reason) => TransportError::InvalidConfig(reason.clone()),
        TransportError::InvalidState(reason) => TransportError::InvalidState(reason.clone()),
    }
}
