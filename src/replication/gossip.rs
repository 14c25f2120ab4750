//! Gossip Protocol (SWIM-like)
//!
//! Implements cluster membership and failure detection using a simplified
//! SWIM-inspired protocol for peer discovery and heartbeat.
//!
//! Uses Sans-IO pattern: message processing is separated from I/O for testability.

use crate::replication::types::NodeId;
use crate::replication::config::ReplicationConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// State of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberState {
    /// Member is alive and reachable
    Alive,
    /// Member is suspected of failure
    Suspect,
    /// Member has been declared dead
    Dead,
}

/// Information about a cluster member.
#[derive(Debug, Clone)]
pub struct Member {
    /// Node identifier
    pub node_id: NodeId,
    /// Address for gossip communication
    pub gossip_addr: SocketAddr,
    /// Address for QUIC transport
    pub transport_addr: SocketAddr,
    /// Current state
    pub state: MemberState,
    /// When the member was last seen
    pub last_seen: Instant,
    /// Incarnation number for state reconciliation
    pub incarnation: u64,
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        // Compare all fields except last_seen (which is time-based)
        self.node_id == other.node_id
            && self.gossip_addr == other.gossip_addr
            && self.transport_addr == other.transport_addr
            && self.state == other.state
            && self.incarnation == other.incarnation
    }
}

/// Message types for gossip protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum GossipMessage {
    /// Ping - check if node is alive
    Ping {
        sender_id: String,
        sender_gossip_addr: SocketAddr,
        sender_transport_addr: SocketAddr,
        incarnation: u64,
    },
    /// Ack - response to ping
    Ack {
        sender_id: String,
        sender_gossip_addr: SocketAddr,
        sender_transport_addr: SocketAddr,
        incarnation: u64,
    },
    /// Join - announce joining the cluster
    Join {
        node_id: String,
        gossip_addr: SocketAddr,
        transport_addr: SocketAddr,
    },
    /// Announce member list
    MemberList {
        members: Vec<(String, SocketAddr, SocketAddr, u64)>, // (id, gossip_addr, transport_addr, incarnation)
    },
}

/// Events emitted by the gossip service.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipEvent {
    /// A new member joined the cluster
    MemberJoined(Member),
    /// A member left or was declared dead
    MemberLeft(NodeId),
    /// A member's state changed
    MemberStateChanged {
        node_id: NodeId,
        old_state: MemberState,
        new_state: MemberState,
    },
}

/// Output action from message processing (Sans-IO pattern).
/// Instead of doing I/O directly, we return actions to be performed.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipAction {
    /// Send a message to a specific address
    Send { to: SocketAddr, message: GossipMessage },
    /// Emit an event
    Emit(GossipEvent),
    /// No action needed
    None,
}

/// Result of processing a gossip message (Sans-IO pattern).
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Actions to perform (send messages, emit events)
    pub actions: Vec<GossipAction>,
    /// Whether a new member was discovered
    pub member_discovered: bool,
}

impl ProcessResult {
    /// Create empty result
    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            member_discovered: false,
        }
    }

    /// Create result with single send action
    pub fn send(to: SocketAddr, message: GossipMessage) -> Self {
        Self {
            actions: vec![GossipAction::Send { to, message }],
            member_discovered: false,
        }
    }

    /// Add an action
    pub fn with_action(mut self, action: GossipAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Mark as member discovered
    pub fn with_member_discovered(mut self) -> Self {
        self.member_discovered = true;
        self
    }
}

/// Pure function to process a gossip message (Sans-IO pattern).
/// Returns actions to be performed instead of doing I/O directly.
/// This enables unit testing of message processing logic.
pub fn process_message(
    msg: &GossipMessage,
    src: SocketAddr,
    members: &RwLock<HashMap<String, Member>>,
    local_node_id: &str,
    local_gossip_addr: SocketAddr,
    local_transport_addr: SocketAddr,
    local_incarnation: u64,
) -> ProcessResult {
    match msg {
        GossipMessage::Ping { sender_id, sender_gossip_addr, sender_transport_addr, incarnation } => {
            let member = Member {
                node_id: NodeId::new(sender_id),
                gossip_addr: *sender_gossip_addr,
                transport_addr: *sender_transport_addr,
                state: MemberState::Alive,
                last_seen: Instant::now(),
                incarnation: *incarnation,
            };

            let is_new = {
                let mut guard = members.write();
                let is_new = !guard.contains_key(sender_id);
                guard.insert(sender_id.clone(), member.clone());
                is_new
            };

            let ack = GossipMessage::Ack {
                sender_id: local_node_id.to_string(),
                sender_gossip_addr: local_gossip_addr,
                sender_transport_addr: local_transport_addr,
                incarnation: local_incarnation,
            };

            let mut result = ProcessResult::send(src, ack);
            if is_new {
                result.member_discovered = true;
                result.actions.push(GossipAction::Emit(GossipEvent::MemberJoined(member)));
            }
            result
        }

        GossipMessage::Ack { sender_id, sender_gossip_addr, sender_transport_addr, incarnation } => {
            let member = Member {
                node_id: NodeId::new(sender_id),
                gossip_addr: *sender_gossip_addr,
                transport_addr: *sender_transport_addr,
                state: MemberState::Alive,
                last_seen: Instant::now(),
                incarnation: *incarnation,
            };

            let is_new = {
                let mut guard = members.write();
                let is_new = !guard.contains_key(sender_id);
                guard.insert(sender_id.clone(), member.clone());
                is_new
            };

            if is_new {
                ProcessResult::empty()
                    .with_member_discovered()
                    .with_action(GossipAction::Emit(GossipEvent::MemberJoined(member)))
            } else {
                ProcessResult::empty()
            }
        }

        GossipMessage::Join { node_id, gossip_addr, transport_addr } => {
            let member = Member {
                node_id: NodeId::new(node_id),
                gossip_addr: *gossip_addr,
                transport_addr: *transport_addr,
                state: MemberState::Alive,
                last_seen: Instant::now(),
                incarnation: 0,
            };

            let is_new = {
                let mut guard = members.write();
                let is_new = !guard.contains_key(node_id);
                guard.insert(node_id.clone(), member.clone());
                is_new
            };

            // Build member list response
            let member_list: Vec<(String, SocketAddr, SocketAddr, u64)> = members
                .read()
                .values()
                .map(|m| (m.node_id.0.clone(), m.gossip_addr, m.transport_addr, m.incarnation))
                .collect();

            let response = GossipMessage::MemberList { members: member_list };
            let mut result = ProcessResult::send(src, response);

            if is_new {
                result.member_discovered = true;
                result.actions.push(GossipAction::Emit(GossipEvent::MemberJoined(member)));
            }
            result
        }

        GossipMessage::MemberList { members: member_list } => {
            let mut result = ProcessResult::empty();

            for (id, gossip_addr, transport_addr, incarnation) in member_list {
                if id == local_node_id {
                    continue;
                }

                let member = Member {
                    node_id: NodeId::new(id),
                    gossip_addr: *gossip_addr,
                    transport_addr: *transport_addr,
                    state: MemberState::Alive,
                    last_seen: Instant::now(),
                    incarnation: *incarnation,
                };

                let is_new = {
                    let mut guard = members.write();
                    let is_new = !guard.contains_key(id);
                    guard.insert(id.clone(), member.clone());
                    is_new
                };

                if is_new {
                    result.member_discovered = true;
                    result.actions.push(GossipAction::Emit(GossipEvent::MemberJoined(member)));
                }
            }
            result
        }
    }
}

/// Check members for failures and return dead member events (Sans-IO pattern).
pub fn check_member_failures(
    members: &RwLock<HashMap<String, Member>>,
    timeout: Duration,
) -> Vec<GossipAction> {
    let now = Instant::now();
    let mut actions = Vec::new();
    let mut dead_members = Vec::new();

    {
        let mut guard = members.write();
        for (id, member) in guard.iter_mut() {
            if member.state == MemberState::Alive
                && now.duration_since(member.last_seen) > timeout
            {
                let old_state = member.state.clone();
                member.state = MemberState::Dead;
                dead_members.push((id.clone(), old_state));
            }
        }
    }

    for (id, old_state) in dead_members {
        let node_id = NodeId::new(&id);
        actions.push(GossipAction::Emit(GossipEvent::MemberStateChanged {
            node_id: node_id.clone(),
            old_state,
            new_state: MemberState::Dead,
        }));
        actions.push(GossipAction::Emit(GossipEvent::MemberLeft(node_id)));
    }

    actions
}

/// Select random member for ping (Sans-IO pattern).
pub fn select_ping_target(members: &RwLock<HashMap<String, Member>>) -> Option<SocketAddr> {
    let member_addrs: Vec<SocketAddr> = members
        .read()
        .values()
        .filter(|m| m.state == MemberState::Alive)
        .map(|m| m.gossip_addr)
        .collect();

    if member_addrs.is_empty() {
        return None;
    }

    let idx = rand::random::<usize>() % member_addrs.len();
    Some(member_addrs[idx])
}

/// Create a ping message (Sans-IO pattern).
pub fn create_ping(
    node_id: &str,
    gossip_addr: SocketAddr,
    transport_addr: SocketAddr,
    incarnation: u64,
) -> GossipMessage {
    GossipMessage::Ping {
        sender_id: node_id.to_string(),
        sender_gossip_addr: gossip_addr,
        sender_transport_addr: transport_addr,
        incarnation,
    }
}

/// Create a join message (Sans-IO pattern).
pub fn create_join(
    node_id: &str,
    gossip_addr: SocketAddr,
    transport_addr: SocketAddr,
) -> GossipMessage {
    GossipMessage::Join {
        node_id: node_id.to_string(),
        gossip_addr,
        transport_addr,
    }
}

/// Gossip service for cluster membership.
pub struct GossipService {
    config: ReplicationConfig,
    members: Arc<RwLock<HashMap<String, Member>>>,
    event_tx: mpsc::Sender<GossipEvent>,
    event_rx: Option<mpsc::Receiver<GossipEvent>>,
    shutdown: Arc<RwLock<bool>>,
}

impl GossipService {
    /// Create a new gossip service.
    pub fn new(config: ReplicationConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);

        Self {
            config,
            members: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Get the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<GossipEvent>> {
        self.event_rx.take()
    }

    /// Get all current members.
    pub fn members(&self) -> Vec<Member> {
        self.members.read().values().cloned().collect()
    }

    /// Get alive members only.
    pub fn alive_members(&self) -> Vec<Member> {
        self.members
            .read()
            .values()
            .filter(|m| m.state == MemberState::Alive)
            .cloned()
            .collect()
    }

    /// Get a specific member by ID.
    pub fn get_member(&self, node_id: &str) -> Option<Member> {
        self.members.read().get(node_id).cloned()
    }

    /// Check if we should shutdown.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.read()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        *self.shutdown.write() = true;
    }

    /// Start the gossip service.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        // Bind UDP socket for gossip
        let socket = Arc::new(UdpSocket::bind(self.config.gossip_addr).await?);
        tracing::info!("gossip listening on {}", self.config.gossip_addr);

        let members = self.members.clone();
        let event_tx = self.event_tx.clone();
        let shutdown = self.shutdown.clone();
        let gossip_interval = self.config.gossip_interval;
        let node_id = self.config.node_id.clone();
        let gossip_addr = self.config.gossip_addr;
        let transport_addr = self.config.transport_addr;
        let bootstrap_peers = self.config.bootstrap_peers.clone();

        // Send join messages to bootstrap peers
        let socket_clone = socket.clone();
        tokio::spawn(async move {
            for peer in &bootstrap_peers {
                if let Ok(addr) = peer.parse::<SocketAddr>() {
                    let join_msg = GossipMessage::Join {
                        node_id: node_id.clone(),
                        gossip_addr,
                        transport_addr,
                    };
                    if let Ok(data) = bincode::serialize(&join_msg) {
                        let _ = socket_clone.send_to(&data, addr).await;
                        tracing::info!("sent join message to bootstrap peer {}", addr);
                    }
                }
            }
        });

        // Spawn gossip loop
        let socket_recv = socket.clone();
        let node_id_recv = self.config.node_id.clone();
        let gossip_addr_recv = self.config.gossip_addr;
        let transport_addr_recv = self.config.transport_addr;

        tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            let mut gossip_timer = tokio::time::interval(gossip_interval);
            let mut failure_timer = tokio::time::interval(Duration::from_secs(10));
            let incarnation: u64 = 0;

            loop {
                if *shutdown.read() {
                    tracing::info!("gossip service shutting down");
                    break;
                }

                tokio::select! {
                    // Handle incoming messages
                    result = socket_recv.recv_from(&mut buf) => {
                        match result {
                            Ok((len, src)) => {
                                let data = &buf[..len];
                                if let Ok(msg) = bincode::deserialize::<GossipMessage>(data) {
                                    Self::handle_message(
                                        &msg,
                                        src,
                                        &members,
                                        &event_tx,
                                        &socket_recv,
                                        &node_id_recv,
                                        gossip_addr_recv,
                                        transport_addr_recv,
                                        incarnation,
                                    ).await;
                                }
                            }
                            Err(e) => {
                                tracing::error!("gossip recv error: {:?}", e);
                            }
                        }
                    }

                    // Periodic ping to random member
                    _ = gossip_timer.tick() => {
                        let member_addrs: Vec<SocketAddr> = members.read()
                            .values()
                            .filter(|m| m.state == MemberState::Alive)
                            .map(|m| m.gossip_addr)
                            .collect();

                        if !member_addrs.is_empty() {
                            let idx = rand::random::<usize>() % member_addrs.len();
                            let target = member_addrs[idx];

                            let ping = GossipMessage::Ping {
                                sender_id: node_id_recv.clone(),
                                sender_gossip_addr: gossip_addr_recv,
                                sender_transport_addr: transport_addr_recv,
                                incarnation,
                            };

                            if let Ok(data) = bincode::serialize(&ping) {
                                let _ = socket_recv.send_to(&data, target).await;
                            }
                        }
                    }

                    // Check for dead members
                    _ = failure_timer.tick() => {
                        let now = Instant::now();
                        let mut dead_members = Vec::new();

                        {
                            let mut guard = members.write();
                            for (id, member) in guard.iter_mut() {
                                if member.state == MemberState::Alive
                                    && now.duration_since(member.last_seen) > Duration::from_secs(30)
                                {
                                    let old_state = member.state.clone();
                                    member.state = MemberState::Dead;
                                    dead_members.push((id.clone(), old_state));
                                }
                            }
                        }

                        for (id, old_state) in dead_members {
                            let node_id = NodeId::new(&id);
                            let _ = event_tx.send(GossipEvent::MemberStateChanged {
                                node_id: node_id.clone(),
                                old_state,
                                new_state: MemberState::Dead,
                            }).await;
                            let _ = event_tx.send(GossipEvent::MemberLeft(node_id)).await;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Execute gossip actions (Sans-IO pattern).
    /// Sends messages and emits events based on the action list.
    #[cfg_attr(coverage_nightly, coverage(off))]
    async fn execute_actions(
        actions: Vec<GossipAction>,
        socket: &UdpSocket,
        event_tx: &mpsc::Sender<GossipEvent>,
    ) {
        for action in actions {
            match action {
                GossipAction::Send { to, message } => {
                    if let Ok(data) = bincode::serialize(&message) {
                        let _ = socket.send_to(&data, to).await;
                    }
                }
                GossipAction::Emit(event) => {
                    let _ = event_tx.send(event).await;
                }
                GossipAction::None => {}
            }
        }
    }

    /// Handle incoming gossip message using Sans-IO pattern.
    /// Delegates to process_message() and executes returned actions.
    #[cfg_attr(coverage_nightly, coverage(off))]
    async fn handle_message(
        msg: &GossipMessage,
        src: SocketAddr,
        members: &RwLock<HashMap<String, Member>>,
        event_tx: &mpsc::Sender<GossipEvent>,
        socket: &UdpSocket,
        local_node_id: &str,
        local_gossip_addr: SocketAddr,
        local_transport_addr: SocketAddr,
        local_incarnation: u64,
    ) {
        // Use Sans-IO process_message to get actions
        let result = process_message(
            msg,
            src,
            members,
            local_node_id,
            local_gossip_addr,
            local_transport_addr,
            local_incarnation,
        );

        // Log member discoveries
        if result.member_discovered {
            tracing::info!("member discovered via {:?}", msg);
        }

        // Execute all actions
        Self::execute_actions(result.actions, socket, event_tx).await;
    }
}
