//! UDP adapter for the development relay
//!
//! Packets are bincode-encoded [`Packet`] values. A receiver task turns relay
//! packets into [`TransportEvent`]s, a sender task drains the outbound queue,
//! and a heartbeat task keeps the relay's timeout checker from evicting us.

use super::{ConnectionStatus, Transport, TransportEvent};
use crate::error::TransportError;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PresenceRecord, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub struct UdpTransport {
    outbound: mpsc::UnboundedSender<Packet>,
    subscribed: HashSet<String>,
    /// Receiver and heartbeat; the sender task exits on its own once the queue closes
    tasks: Vec<JoinHandle<()>>,
}

impl UdpTransport {
    pub async fn connect(
        server_addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| TransportError::InvalidAddress(server_addr.to_string()))?;
        let bind_addr = if server_addr.ip().is_loopback() {
            "127.0.0.1:0"
        } else {
            "0.0.0.0:0"
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        info!("Connecting to relay at {}", server_addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(TransportEvent::Status(ConnectionStatus::Connecting));

        let tasks = vec![
            Self::spawn_receiver(Arc::clone(&socket), event_tx.clone()),
            Self::spawn_heartbeat(outbound.clone()),
        ];
        let _ = Self::spawn_sender(socket, server_addr, outbound_rx, event_tx);

        outbound
            .send(Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .map_err(|_| TransportError::Closed)?;

        let transport = UdpTransport {
            outbound,
            subscribed: HashSet::new(),
            tasks,
        };
        Ok((transport, event_rx))
    }

    /// Spawns task that turns relay packets into transport events
    fn spawn_receiver(
        socket: Arc<UdpSocket>,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                let len = match socket.recv_from(&mut buffer).await {
                    Ok((len, _)) => len,
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };

                let event = match deserialize::<Packet>(&buffer[0..len]) {
                    Ok(packet) => Self::packet_to_event(packet),
                    Err(e) => {
                        warn!("Failed to deserialize relay packet: {}", e);
                        None
                    }
                };

                if let Some(event) = event {
                    if event_tx.send(event).is_err() {
                        debug!("Event receiver dropped, stopping relay listener");
                        break;
                    }
                }
            }
        })
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_sender(
        socket: Arc<UdpSocket>,
        server_addr: SocketAddr,
        mut outbound_rx: mpsc::UnboundedReceiver<Packet>,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                let result = match serialize(&packet) {
                    Ok(data) => socket.send_to(&data, server_addr).await.map(|_| ()),
                    Err(e) => {
                        error!("Failed to encode packet: {}", e);
                        continue;
                    }
                };

                if let Err(e) = result {
                    error!("Failed to send packet to relay: {}", e);
                    let _ = event_tx.send(TransportEvent::Status(ConnectionStatus::Failed(
                        e.to_string(),
                    )));
                }
            }
        })
    }

    fn spawn_heartbeat(outbound: mpsc::UnboundedSender<Packet>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if outbound.send(Packet::Heartbeat).is_err() {
                    break;
                }
            }
        })
    }

    fn packet_to_event(packet: Packet) -> Option<TransportEvent> {
        match packet {
            Packet::Connected { client_id } => {
                info!("Relay accepted connection as client {}", client_id);
                Some(TransportEvent::Status(ConnectionStatus::Connected))
            }
            Packet::Disconnected { reason } => {
                warn!("Relay disconnected us: {}", reason);
                Some(TransportEvent::Status(ConnectionStatus::Disconnected(reason)))
            }
            Packet::Subscribed { channel } => {
                debug!("Subscribed to {}", channel);
                None
            }
            Packet::PresenceSync { channel, members } => {
                Some(TransportEvent::PresenceSync { channel, members })
            }
            Packet::Broadcast {
                channel,
                event_type,
                payload,
            } => Some(TransportEvent::Broadcast {
                channel,
                event_type,
                payload,
            }),
            other => {
                warn!("Unexpected packet from relay: {:?}", other);
                None
            }
        }
    }

    fn queue(&self, packet: Packet) -> Result<(), TransportError> {
        self.outbound.send(packet).map_err(|_| TransportError::Closed)
    }
}

impl Transport for UdpTransport {
    fn subscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        self.queue(Packet::Subscribe {
            channel: channel.to_string(),
        })?;
        self.subscribed.insert(channel.to_string());
        Ok(())
    }

    fn track(&mut self, channel: &str, record: PresenceRecord) -> Result<(), TransportError> {
        if !self.subscribed.contains(channel) {
            return Err(TransportError::NotSubscribed(channel.to_string()));
        }
        self.queue(Packet::Track {
            channel: channel.to_string(),
            record,
        })
    }

    fn send(
        &mut self,
        channel: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.subscribed.contains(channel) {
            return Err(TransportError::NotSubscribed(channel.to_string()));
        }
        self.queue(Packet::Publish {
            channel: channel.to_string(),
            event_type: event_type.to_string(),
            payload,
        })
    }

    fn unsubscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        if self.subscribed.remove(channel) {
            self.queue(Packet::Unsubscribe {
                channel: channel.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.outbound.send(Packet::Disconnect);
        for task in self.tasks.iter().filter(|t| !t.is_finished()) {
            task.abort();
        }
    }
}
