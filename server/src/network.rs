//! Relay network layer: UDP plumbing plus channel and presence routing

use crate::client_manager::ClientManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PresenceTable, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    SendToClients { packet: Packet, client_ids: Vec<u32> },
}

/// Development relay: pub/sub channels with presence over UDP
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    presence: PresenceTable,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_clients: usize,
        client_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, client_timeout))),
            presence: PresenceTable::new(),
            server_tx,
            server_rx,
            relay_tx,
            relay_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for messages into the main loop, e.g. to request shutdown
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut relay_rx = std::mem::replace(&mut self.relay_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = relay_rx.recv().await {
                match message {
                    RelayMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    RelayMessage::SendToClients { packet, client_ids } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs(&client_ids)
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        if data.len() > MAX_PACKET_SIZE {
            warn!("Packet of {} bytes to {} exceeds the receive buffer", data.len(), addr);
        }
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn queue(&self, message: RelayMessage) {
        if let Err(e) = self.relay_tx.send(message) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        self.queue(RelayMessage::SendPacket { packet, addr });
    }

    fn send_to_clients(&self, packet: Packet, client_ids: Vec<u32>) {
        if client_ids.is_empty() {
            return;
        }
        self.queue(RelayMessage::SendToClients { packet, client_ids });
    }

    /// Pushes the full presence snapshot of `channel` to all its subscribers
    fn sync_channel(&self, channel: &str) {
        let packet = Packet::PresenceSync {
            channel: channel.to_string(),
            members: self.presence.snapshot(channel),
        };
        self.send_to_clients(packet, self.presence.subscribers(channel));
    }

    /// Drops a client from every channel and tells the remaining members
    fn drop_member(&mut self, client_id: u32) {
        for channel in self.presence.remove_member(client_id) {
            debug!("Client {} left {}", client_id, channel);
            self.sync_channel(&channel);
        }
    }

    /// Processes one incoming packet
    pub async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            let client_id = clients.find_client_by_addr(addr);
            if let Some(id) = client_id {
                clients.touch(id);
            }
            client_id
        };
        let Some(client_id) = client_id else {
            warn!("Packet from unknown client at {}", addr);
            self.send_packet(
                Packet::Disconnected {
                    reason: "Not connected".to_string(),
                },
                addr,
            );
            return;
        };

        match packet {
            Packet::Subscribe { channel } => {
                self.presence.subscribe(&channel, client_id);
                debug!("Client {} subscribed to {}", client_id, channel);
                self.send_packet(
                    Packet::Subscribed {
                        channel: channel.clone(),
                    },
                    addr,
                );
                // New subscribers get the current snapshot straight away
                self.send_packet(
                    Packet::PresenceSync {
                        members: self.presence.snapshot(&channel),
                        channel,
                    },
                    addr,
                );
            }

            Packet::Track { channel, record } => {
                if self.presence.track(&channel, client_id, record) {
                    self.sync_channel(&channel);
                } else {
                    warn!("Client {} tracked on {} without subscribing", client_id, channel);
                }
            }

            Packet::Publish {
                channel,
                event_type,
                payload,
            } => {
                if !self.presence.is_subscribed(&channel, client_id) {
                    warn!("Client {} published to {} without subscribing", client_id, channel);
                    return;
                }
                let others: Vec<u32> = self
                    .presence
                    .subscribers(&channel)
                    .into_iter()
                    .filter(|id| *id != client_id)
                    .collect();
                debug!(
                    "Relaying {} on {} from {} to {} clients",
                    event_type,
                    channel,
                    client_id,
                    others.len()
                );
                self.send_to_clients(
                    Packet::Broadcast {
                        channel,
                        event_type,
                        payload,
                    },
                    others,
                );
            }

            Packet::Unsubscribe { channel } => {
                if self.presence.unsubscribe(&channel, client_id) {
                    self.sync_channel(&channel);
                }
            }

            Packet::Heartbeat => {}

            Packet::Disconnect => {
                self.clients.write().await.remove_client(&client_id);
                self.drop_member(client_id);
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        // Remove existing connection if present
        let existing_client_id = self.clients.read().await.find_client_by_addr(addr);
        if let Some(existing_id) = existing_client_id {
            info!("Removing existing client {} from {}", existing_id, addr);
            self.clients.write().await.remove_client(&existing_id);
            self.drop_member(existing_id);
        }

        let client_id = self.clients.write().await.add_client(addr);
        let response = match client_id {
            Some(client_id) => Packet::Connected { client_id },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        self.send_packet(response, addr);
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Relay started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::ClientTimeout { client_id } => {
                    info!("Client {} timed out", client_id);
                    self.drop_member(client_id);
                }
                ServerMessage::Shutdown => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
