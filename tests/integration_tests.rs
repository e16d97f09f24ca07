//! Integration tests for the matchmaking and session layers
//!
//! These tests validate cross-component interactions: whole matches over the
//! in-process hub, and real network behavior through the UDP relay.

use client::adapters::{BattleMode, BoardMode, GameMode, RelayMode};
use client::config::{BattleConfig, BoardConfig, RelayConfig};
use client::controller::BattleBot;
use client::coordinator::{Coordinator, FinishResult, Stage};
use client::transport::{MemoryHub, MemoryTransport, Transport, TransportEvent, UdpTransport};
use server::network::Server;
use shared::{PresenceRecord, LOBBY_CHANNEL};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_test::assert_ok;

/// One player wired to the in-process hub
struct Player<M: GameMode> {
    coordinator: Coordinator<MemoryTransport, M>,
    events: UnboundedReceiver<TransportEvent>,
    results: Arc<Mutex<Vec<FinishResult>>>,
}

impl<M: GameMode> Player<M> {
    fn join(hub: &MemoryHub, mode: M, id: &str, joined_at: u64) -> Self {
        let (transport, events) = hub.connect();
        let record = PresenceRecord::new(id, &id.to_uppercase(), joined_at);
        let mut coordinator = Coordinator::new(transport, mode, record, joined_at);

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        coordinator.on_finish(move |result| sink.lock().unwrap().push(result));
        coordinator.join_lobby().unwrap();

        Self {
            coordinator,
            events,
            results,
        }
    }

    fn drain(&mut self) -> bool {
        let mut moved = false;
        while let Ok(event) = self.events.try_recv() {
            self.coordinator.handle(event).unwrap();
            moved = true;
        }
        moved
    }

    fn single_result(&self) -> FinishResult {
        let results = self.results.lock().unwrap();
        assert_eq!(results.len(), 1, "finish hook must fire exactly once");
        results[0].clone()
    }
}

/// Delivers queued events until both sides go quiet
fn settle<M: GameMode>(a: &mut Player<M>, b: &mut Player<M>) {
    while a.drain() | b.drain() {}
}

fn pair<M: GameMode>(hub: &MemoryHub, host_mode: M, guest_mode: M) -> (Player<M>, Player<M>) {
    let mut host = Player::join(hub, host_mode, "amy", 100);
    let mut guest = Player::join(hub, guest_mode, "bob", 200);
    settle(&mut host, &mut guest);
    (host, guest)
}

/// MATCH FLOW TESTS
mod match_flow_tests {
    use super::*;

    /// The earlier joiner hosts and its generated content reaches the guest
    #[test]
    fn host_content_reaches_guest() {
        let hub = MemoryHub::new();
        let config = BattleConfig::default();
        let (host, guest) = pair(
            &hub,
            BattleMode::new(config.clone()),
            BattleMode::new(config),
        );

        assert!(host.coordinator.is_host());
        assert!(!guest.coordinator.is_host());
        assert_eq!(host.coordinator.stage(), Stage::Playing);
        assert_eq!(guest.coordinator.stage(), Stage::Playing);

        let content = host.coordinator.content().unwrap();
        assert_eq!(content.questions.len(), 5);

        let host_question = host.coordinator.machine().unwrap().adapter().question(0);
        let guest_question = guest.coordinator.machine().unwrap().adapter().question(0);
        assert!(host_question.is_some());
        assert_eq!(host_question, guest_question);
    }

    /// Quick correct answers win the battle before the last round
    #[test]
    fn battle_runs_to_knockout() {
        let hub = MemoryHub::new();
        let config = BattleConfig::default();
        let (mut host, mut guest) = pair(
            &hub,
            BattleMode::new(config.clone()),
            BattleMode::new(config),
        );

        let mut rounds = 0;
        while host.coordinator.stage() == Stage::Playing {
            let machine = host.coordinator.machine().unwrap();
            let round = machine.current_round().unwrap();
            let question = machine.adapter().question(round).unwrap().clone();

            host.coordinator.act(question.answer).unwrap();
            settle(&mut host, &mut guest);
            let wrong = (question.answer + 1) % question.choices.len();
            guest.coordinator.act(wrong).unwrap();
            settle(&mut host, &mut guest);

            rounds += 1;
            assert!(rounds <= 5, "battle should end by knockout");
        }

        assert_eq!(rounds, 4);
        let host_result = host.single_result();
        assert!(host_result.won);
        assert!(!host_result.forfeit);
        assert_eq!(host_result.score, 1200);
        assert_eq!(host_result.opponent_name, "BOB");

        let guest_result = guest.single_result();
        assert!(!guest_result.won);
        assert_eq!(guest_result.score, 0);
        assert_eq!(guest.coordinator.stage(), Stage::Finished);
    }

    /// Both peers hold the same board after a run of moves
    #[test]
    fn board_moves_stay_in_sync() {
        let hub = MemoryHub::new();
        let config = BoardConfig::default();
        let (mut host, mut guest) = pair(
            &hub,
            BoardMode::new(config.clone()),
            BoardMode::new(config),
        );

        for _ in 0..8 {
            let host_board = host.coordinator.machine().unwrap().adapter();
            let mover = host_board.mover().clone();
            let player = if mover == "amy" { &mut host } else { &mut guest };

            let adapter = player.coordinator.machine().unwrap().adapter();
            let seat = adapter.seat_of(&mover).unwrap();
            let mv = adapter.board().legal_moves(seat)[0];
            player.coordinator.act(mv).unwrap();
            settle(&mut host, &mut guest);
        }

        let host_board = host.coordinator.machine().unwrap().adapter().board();
        let guest_board = guest.coordinator.machine().unwrap().adapter().board();
        assert_eq!(host_board, guest_board);
    }

    /// Every chain reads the same on both sides once the relay reaches review
    #[test]
    fn relay_chains_match_at_review() {
        let hub = MemoryHub::new();
        let config = RelayConfig::default();
        let (mut host, mut guest) = pair(
            &hub,
            RelayMode::new(config.clone()),
            RelayMode::new(config),
        );

        for round in 0..3 {
            host.coordinator
                .act(format!("amy round {}", round))
                .unwrap();
            guest
                .coordinator
                .act(format!("bob round {}", round))
                .unwrap();
            settle(&mut host, &mut guest);
        }

        assert_eq!(host.coordinator.stage(), Stage::Finished);
        assert_eq!(guest.coordinator.stage(), Stage::Finished);

        let host_review = host.coordinator.machine().unwrap().adapter().review();
        let guest_review = guest.coordinator.machine().unwrap().adapter().review();
        assert_eq!(host_review.len(), 2);
        assert_eq!(host_review, guest_review);
        assert!(host_review.iter().all(|chain| chain.steps.len() == 3));

        assert_eq!(host.single_result().score, 30);
        assert_eq!(guest.single_result().score, 30);
    }

    /// A peer that vanishes mid-match hands the other a forfeit win
    #[test]
    fn vanished_peer_forfeits() {
        let hub = MemoryHub::new();
        let config = BattleConfig::default();
        let (mut host, mut guest) = pair(
            &hub,
            BattleMode::new(config.clone()),
            BattleMode::new(config),
        );

        hub.drop_endpoint(guest.coordinator.transport().endpoint());
        settle(&mut host, &mut guest);

        let result = host.single_result();
        assert!(result.won);
        assert!(result.forfeit);
        assert_eq!(host.coordinator.stage(), Stage::Finished);
    }
}

/// NETWORK RELAY TESTS
mod relay_tests {
    use super::*;

    async fn start_relay() -> String {
        let mut server = assert_ok!(Server::new("127.0.0.1:0", 16, Duration::from_secs(5)).await);
        let addr = assert_ok!(server.local_addr());
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr.to_string()
    }

    async fn next_lobby_sync(
        events: &mut UnboundedReceiver<TransportEvent>,
        expected: usize,
    ) -> Vec<PresenceRecord> {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if let TransportEvent::PresenceSync { channel, members } = event {
                if channel == LOBBY_CHANNEL && members.len() == expected {
                    return members;
                }
            }
        }
    }

    /// Presence tracked through the relay is visible to every subscriber
    #[tokio::test]
    async fn presence_sync_over_udp() {
        let addr = start_relay().await;

        let (mut amy, mut amy_events) = assert_ok!(UdpTransport::connect(&addr).await);
        let (mut bob, mut bob_events) = assert_ok!(UdpTransport::connect(&addr).await);

        assert_ok!(amy.subscribe(LOBBY_CHANNEL));
        assert_ok!(amy.track(LOBBY_CHANNEL, PresenceRecord::new("amy", "Amy", 100)));
        assert_ok!(bob.subscribe(LOBBY_CHANNEL));
        assert_ok!(bob.track(LOBBY_CHANNEL, PresenceRecord::new("bob", "Bob", 200)));

        let seen_by_amy = timeout(Duration::from_secs(2), next_lobby_sync(&mut amy_events, 2))
            .await
            .expect("amy never saw bob");
        let seen_by_bob = timeout(Duration::from_secs(2), next_lobby_sync(&mut bob_events, 2))
            .await
            .expect("bob never saw amy");

        let mut ids: Vec<&str> = seen_by_amy.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["amy", "bob"]);
        assert_eq!(seen_by_bob.len(), 2);
    }

    /// Two bots play a whole battle through the relay
    #[tokio::test]
    async fn bot_battle_over_udp() {
        let addr = start_relay().await;
        let tick = Duration::from_millis(20);

        let mut handles = Vec::new();
        for (id, joined_at) in [("amy", 100), ("bob", 200)] {
            let (transport, mut events) = assert_ok!(UdpTransport::connect(&addr).await);
            let record = PresenceRecord::new(id, id, joined_at);
            let mode = BattleMode::new(BattleConfig::default());
            let mut coordinator = Coordinator::new(transport, mode, record, joined_at);
            let mut bot = BattleBot::new(joined_at, 0.7, 2);

            handles.push(tokio::spawn(async move {
                coordinator.join_lobby()?;
                coordinator.run(&mut events, &mut bot, tick).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            let joined = timeout(Duration::from_secs(10), handle)
                .await
                .expect("match did not finish in time");
            let result = assert_ok!(assert_ok!(joined));
            results.push(result);
        }

        assert!(results.iter().all(|r| !r.forfeit));
        assert!(!(results[0].won && results[1].won));
        assert_eq!(results[0].opponent_name, "bob");
        assert_eq!(results[1].opponent_name, "amy");
    }
}
