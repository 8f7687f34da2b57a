//! Replica coordinator
//!
//! Owns one CRDT instance and drives it from three producers: the receive
//! loop (peer datagrams), the broadcast loop (periodic state shipping) and
//! the intent loop (user requests). All three go through the same lock.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use lattice_core::{Crdt, CrdtKind, ReplicaId, Snapshot};
use lattice_protocol::{Message, Parser, MAX_DATAGRAM_SIZE};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::error::{TransportError, TransportResult};
use crate::handler::{self, Intent, IntentOutcome};

/// Default address of the rendezvous service
pub const DEFAULT_RENDEZVOUS: &str = "127.0.0.1:1234";

/// Longest the receive loop waits on a peer host name lookup
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Replica settings
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub kind: CrdtKind,
    /// Where to send SIGNUP
    pub rendezvous: SocketAddr,
    /// Period of the broadcast loop
    pub sync_interval: Duration,
    /// Op-based only: re-send the local operation log on every tick
    pub retransmit: bool,
    /// Largest datagram sent or accepted
    pub max_datagram: usize,
}

impl ReplicaConfig {
    pub fn new(kind: CrdtKind, rendezvous: SocketAddr) -> Self {
        Self {
            kind,
            rendezvous,
            sync_interval: Self::default_interval(kind),
            retransmit: false,
            max_datagram: MAX_DATAGRAM_SIZE,
        }
    }

    /// Counters sync every 10s, sets every 5s
    pub fn default_interval(kind: CrdtKind) -> Duration {
        match kind {
            CrdtKind::Counter => Duration::from_secs(10),
            CrdtKind::StateSet | CrdtKind::OpSet => Duration::from_secs(5),
        }
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_retransmit(mut self, retransmit: bool) -> Self {
        self.retransmit = retransmit;
        self
    }

    pub fn with_max_datagram(mut self, max_datagram: usize) -> Self {
        self.max_datagram = max_datagram;
        self
    }
}

/// Registration progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Endpoint open, no identity yet
    Unregistered,
    /// Identity and a peer assigned by the rendezvous service
    Registered(ReplicaId),
    /// Broadcast loop running
    Active(ReplicaId),
}

impl Phase {
    pub fn replica(&self) -> Option<ReplicaId> {
        match self {
            Phase::Unregistered => None,
            Phase::Registered(id) | Phase::Active(id) => Some(*id),
        }
    }
}

/// Notifications for whatever renders the replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaEvent {
    Registered { replica: ReplicaId, peer: SocketAddr },
    PeerJoined(SocketAddr),
    PeerLeft(SocketAddr),
    /// Raw text of an inbound datagram
    Received { from: SocketAddr, text: String },
    Updated(Snapshot),
    Lookup { element: String, present: bool },
    Error(String),
}

/// One replica: a CRDT instance, its peers and its channel
pub struct Replica {
    config: ReplicaConfig,
    channel: Arc<dyn Channel>,
    parser: Parser,
    crdt: Mutex<Crdt>,
    peers: RwLock<Vec<SocketAddr>>,
    phase: watch::Sender<Phase>,
    events: broadcast::Sender<ReplicaEvent>,
    shutdown: watch::Sender<bool>,
}

impl Replica {
    pub fn new(config: ReplicaConfig, channel: Arc<dyn Channel>) -> Self {
        let (phase, _) = watch::channel(Phase::Unregistered);
        let (events, _) = broadcast::channel(1024);
        let (shutdown, _) = watch::channel(false);

        Self {
            parser: Parser::with_max_size(config.max_datagram),
            crdt: Mutex::new(Crdt::new(config.kind)),
            config,
            channel,
            peers: RwLock::new(Vec::new()),
            phase,
            events,
            shutdown,
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn kind(&self) -> CrdtKind {
        self.config.kind
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn replica_id(&self) -> Option<ReplicaId> {
        self.phase().replica()
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers.read().clone()
    }

    /// Consistent read of the current value
    pub fn snapshot(&self) -> Snapshot {
        self.crdt.lock().snapshot()
    }

    /// Subscribe to replica events
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ReplicaEvent) {
        let _ = self.events.send(event);
    }

    /// Ask every loop to stop
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Register this endpoint with the rendezvous service
    pub async fn signup(&self) -> TransportResult<()> {
        let port = self.channel.local_addr()?.port();
        info!(rendezvous = %self.config.rendezvous, port, "Signing up");
        self.send(&Message::signup(port), self.config.rendezvous).await
    }

    /// Wait until an identity has been assigned
    pub async fn wait_registered(&self) -> TransportResult<ReplicaId> {
        let mut phase = self.phase.subscribe();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let assigned = phase.borrow_and_update().replica();
            if let Some(id) = assigned {
                return Ok(id);
            }
            if *shutdown.borrow_and_update() {
                return Err(TransportError::Shutdown);
            }
            tokio::select! {
                changed = phase.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::Shutdown);
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Record the identity and peer announced by the rendezvous service.
    ///
    /// The first announcement fixes the identity; later ones for the same
    /// identity only add peers.
    pub fn register(&self, node_id: ReplicaId, peer: SocketAddr) -> TransportResult<()> {
        let newly_assigned = self.crdt.lock().assign_replica(node_id)?;
        let new_peer = {
            let mut peers = self.peers.write();
            if peers.contains(&peer) {
                false
            } else {
                peers.push(peer);
                true
            }
        };

        if newly_assigned {
            self.phase.send_if_modified(|phase| {
                if *phase == Phase::Unregistered {
                    *phase = Phase::Registered(node_id);
                    true
                } else {
                    false
                }
            });
            info!(replica = %node_id, peer = %peer, "Registered");
            self.publish(ReplicaEvent::Registered {
                replica: node_id,
                peer,
            });
        } else if new_peer {
            info!(replica = %node_id, peer = %peer, "Peer introduced");
            self.publish(ReplicaEvent::PeerJoined(peer));
        }
        Ok(())
    }

    fn forget_peer(&self, peer: SocketAddr) -> bool {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| *p != peer);
        peers.len() != before
    }

    /// Turn an announced peer into an address.
    ///
    /// IP literals never touch the resolver. Host names are looked up
    /// inline on the receive loop, bounded by `RESOLVE_TIMEOUT`.
    async fn resolve_peer(&self, host: &str, port: u16) -> TransportResult<SocketAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let local = self.channel.local_addr()?;
        let unresolved = || TransportError::Resolve {
            host: host.to_string(),
            port,
        };
        let candidates: Vec<SocketAddr> =
            tokio::time::timeout(RESOLVE_TIMEOUT, tokio::net::lookup_host((host, port)))
                .await
                .map_err(|_| unresolved())??
                .collect();
        candidates
            .iter()
            .find(|addr| addr.is_ipv4() == local.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(unresolved)
    }

    /// Decode and apply one inbound datagram
    pub async fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> TransportResult<()> {
        let message = self.parser.parse(data)?;
        debug!(from = %from, message = message.name(), "Received");
        self.publish(ReplicaEvent::Received {
            from,
            text: String::from_utf8_lossy(data).into_owned(),
        });

        match message {
            Message::Info {
                node_id,
                peer_host,
                peer_port,
            } => {
                let peer = self.resolve_peer(&peer_host, peer_port).await?;
                self.register(node_id, peer)
            }
            Message::Disconnect => {
                if self.forget_peer(from) {
                    info!(peer = %from, "Peer disconnected");
                    self.publish(ReplicaEvent::PeerLeft(from));
                }
                Ok(())
            }
            Message::Signup { .. } => Err(TransportError::Unexpected {
                message: message.name(),
                kind: self.config.kind,
            }),
            message => {
                let (changed, snapshot) = {
                    let mut crdt = self.crdt.lock();
                    let changed = handler::apply_message(&mut crdt, message)?;
                    (changed, crdt.snapshot())
                };
                if changed {
                    self.publish(ReplicaEvent::Updated(snapshot));
                }
                Ok(())
            }
        }
    }

    /// Apply a user intent and push any resulting operations to peers
    pub async fn handle_intent(&self, intent: Intent) -> TransportResult<IntentOutcome> {
        let (outcome, outbound) = {
            let mut crdt = self.crdt.lock();
            handler::apply_intent(&mut crdt, &intent)?
        };

        if matches!(intent, Intent::Resync) {
            if self.replica_id().is_none() {
                return Err(TransportError::NotRegistered);
            }
            if self.peers.read().is_empty() {
                return Err(TransportError::NoPeers);
            }
        }
        if !outbound.is_empty() {
            self.send_to_peers(&outbound).await;
        }

        match &outcome {
            IntentOutcome::Updated(snapshot) => {
                self.publish(ReplicaEvent::Updated(snapshot.clone()))
            }
            IntentOutcome::Lookup { element, present } => self.publish(ReplicaEvent::Lookup {
                element: element.clone(),
                present: *present,
            }),
            _ => {}
        }
        Ok(outcome)
    }

    async fn send(&self, message: &Message, target: SocketAddr) -> TransportResult<()> {
        let data = message.encode();
        if data.len() > self.config.max_datagram {
            return Err(TransportError::DatagramTooLarge {
                size: data.len(),
                max: self.config.max_datagram,
            });
        }
        self.channel.send_to(&data, target).await?;
        Ok(())
    }

    /// Send every message to every peer.
    ///
    /// Failures are logged and skipped; returns how many sends succeeded.
    pub async fn send_to_peers(&self, messages: &[Message]) -> usize {
        let peers = self.peers();
        let mut sent = 0;
        for peer in &peers {
            for message in messages {
                match self.send(message, *peer).await {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        warn!(peer = %peer, message = message.name(), error = %e, "Send failed");
                        self.publish(ReplicaEvent::Error(e.to_string()));
                    }
                }
            }
        }
        sent
    }

    /// Ship local state to every peer once
    pub async fn broadcast_once(&self) -> usize {
        let messages = {
            let crdt = self.crdt.lock();
            handler::sync_messages(&crdt, self.config.retransmit)
        };
        if messages.is_empty() {
            return 0;
        }
        self.send_to_peers(&messages).await
    }

    /// Read datagrams until shutdown.
    ///
    /// Malformed input and channel errors are reported and skipped.
    pub async fn receive_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        // one spare byte so an oversized datagram shows up as too long
        // instead of being silently cut to the limit
        let mut buf = vec![0u8; self.config.max_datagram + 1];

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                result = self.channel.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => {
                            if let Err(e) = self.handle_datagram(&buf[..len], from).await {
                                warn!(from = %from, error = %e, "Dropped inbound message");
                                self.publish(ReplicaEvent::Error(e.to_string()));
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Receive failed");
                            self.publish(ReplicaEvent::Error(e.to_string()));
                        }
                    }
                }
            }
        }
        debug!("Receive loop stopped");
    }

    /// Ship state on a fixed period until shutdown.
    ///
    /// Op-based replicas without retransmission have nothing to ship and
    /// only wait for shutdown.
    pub async fn broadcast_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let periodic = handler::is_state_based(self.config.kind) || self.config.retransmit;
        if !periodic {
            stopped(&mut shutdown).await;
            return;
        }

        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = interval.tick() => {
                    let sent = self.broadcast_once().await;
                    debug!(sent, "Broadcast tick");
                }
            }
        }
        debug!("Broadcast loop stopped");
    }

    /// Apply queued user intents until the queue closes or shutdown
    pub async fn intent_loop(self: Arc<Self>, mut intents: mpsc::Receiver<Intent>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                intent = intents.recv() => {
                    let Some(intent) = intent else { break };
                    let name = intent.name();
                    if let Err(e) = self.handle_intent(intent).await {
                        warn!(intent = name, error = %e, "Intent failed");
                        self.publish(ReplicaEvent::Error(e.to_string()));
                    }
                }
            }
        }
        debug!("Intent loop stopped");
    }

    /// Run the replica until shutdown.
    ///
    /// Starts receiving and accepting intents immediately, signs up, waits
    /// for an identity and then starts broadcasting. Peers are told about
    /// the departure on the way out.
    pub async fn run(self: Arc<Self>, intents: mpsc::Receiver<Intent>) -> TransportResult<()> {
        let receiver = tokio::spawn(self.clone().receive_loop());
        let intent_task = tokio::spawn(self.clone().intent_loop(intents));

        if let Err(e) = self.signup().await {
            error!(error = %e, "Signup failed");
            self.shutdown();
        }

        match self.wait_registered().await {
            Ok(id) => {
                self.phase.send_replace(Phase::Active(id));
                info!(replica = %id, kind = %self.config.kind, "Replica active");
                self.clone().broadcast_loop().await;
            }
            Err(TransportError::Shutdown) => {}
            Err(e) => return Err(e),
        }

        let _ = receiver.await;
        let _ = intent_task.await;

        self.send_to_peers(&[Message::Disconnect]).await;
        info!("Replica stopped");
        Ok(())
    }
}

/// Resolves once shutdown has been requested, or the sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
