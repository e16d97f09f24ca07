//! Per-player match coordinator
//!
//! Owns the transport and drives one player from the lobby through pairing,
//! session setup and the phase machine to a final result. Every inbound
//! notification goes through [`Coordinator::handle`]; the local countdown is
//! driven by [`Coordinator::tick`] and local input by [`Coordinator::act`].

use crate::adapters::GameMode;
use crate::controller::Controller;
use crate::error::{ActionError, MatchError, TransportError};
use crate::host::Role;
use crate::lobby::Lobby;
use crate::matchmaker::{MatchOffer, Matchmaker, OfferOutcome, PairingDecision};
use crate::phase::{Advance, MatchOutcome, PhaseMachine, RoundAdapter};
use crate::session::{PresenceChange, Session, SessionChannel, SessionEvent};
use crate::transport::{ConnectionStatus, Transport, TransportEvent};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{PresenceRecord, LOBBY_CHANNEL};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, MissedTickBehavior};

/// Presence metadata key naming the game mode a player is queueing for
pub const MODE_META: &str = "mode";

type Effect<M> = <<M as GameMode>::Adapter as RoundAdapter>::Effect;
type Action<M> = <<M as GameMode>::Adapter as RoundAdapter>::Action;
type Event<M> = SessionEvent<<M as GameMode>::Content, Effect<M>>;

/// Handed to the finish hook, exactly once per match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishResult {
    pub won: bool,
    pub score: u32,
    pub opponent_name: String,
    /// The opponent left or vanished before the match ended
    pub forfeit: bool,
}

pub type FinishHook = Box<dyn FnOnce(FinishResult) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Lobby,
    /// Paired, waiting for the session to fill and `START` to arrive
    Matched,
    Playing,
    Finished,
}

struct ActiveMatch<M: GameMode> {
    channel: SessionChannel,
    role: Role<M::Generator>,
    machine: Option<PhaseMachine<M::Adapter>>,
    opponent_name: String,
    start_sent: bool,
    /// The opponent already reported its result; its departure is not a forfeit
    peer_finished: bool,
}

pub struct Coordinator<T: Transport, M: GameMode> {
    transport: T,
    mode: M,
    lobby: Lobby,
    matchmaker: Matchmaker,
    active: Option<ActiveMatch<M>>,
    on_finish: Option<FinishHook>,
    rng: StdRng,
    status: ConnectionStatus,
    stage: Stage,
    result: Option<FinishResult>,
}

impl<T: Transport, M: GameMode> Coordinator<T, M> {
    pub fn new(transport: T, mode: M, record: PresenceRecord, seed: u64) -> Self {
        let record = record.with_meta(MODE_META, mode.name());
        let matchmaker = Matchmaker::new(&record.id);
        Self {
            transport,
            mode,
            lobby: Lobby::new(record),
            matchmaker,
            active: None,
            on_finish: None,
            rng: StdRng::seed_from_u64(seed),
            status: ConnectionStatus::Connecting,
            stage: Stage::Idle,
            result: None,
        }
    }

    pub fn on_finish<F>(&mut self, hook: F)
    where
        F: FnOnce(FinishResult) + Send + 'static,
    {
        self.on_finish = Some(Box::new(hook));
    }

    pub fn local_id(&self) -> &str {
        &self.lobby.local().id
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn result(&self) -> Option<&FinishResult> {
        self.result.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref().map(|a| a.channel.session())
    }

    pub fn is_host(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.role.is_host())
    }

    pub fn opponent_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.opponent_name.as_str())
    }

    /// Shared content of the current match, once generated or received
    pub fn content(&self) -> Option<&M::Content> {
        self.active.as_ref().and_then(|a| a.role.content())
    }

    pub fn machine(&self) -> Option<&PhaseMachine<M::Adapter>> {
        self.active.as_ref().and_then(|a| a.machine.as_ref())
    }

    pub fn join_lobby(&mut self) -> Result<(), MatchError> {
        if self.stage != Stage::Idle {
            return Ok(());
        }
        self.lobby.join(&mut self.transport)?;
        self.stage = Stage::Lobby;
        Ok(())
    }

    pub fn handle(&mut self, event: TransportEvent) -> Result<(), MatchError> {
        match event {
            TransportEvent::Status(status) => {
                self.on_status(status);
                Ok(())
            }
            TransportEvent::PresenceSync { channel, members } => {
                if channel == LOBBY_CHANNEL {
                    self.on_lobby_sync(&members)
                } else if self.carries(&channel) {
                    self.on_session_presence(&members)
                } else {
                    debug!("Ignoring presence on {}", channel);
                    Ok(())
                }
            }
            TransportEvent::Broadcast {
                channel,
                event_type,
                payload,
            } => {
                if channel == LOBBY_CHANNEL {
                    self.on_lobby_event(&event_type, &payload)
                } else if self.carries(&channel) {
                    self.on_session_event(&event_type, &payload)
                } else {
                    debug!("Ignoring {} on {}", event_type, channel);
                    Ok(())
                }
            }
        }
    }

    /// One second of local countdown
    pub fn tick(&mut self) -> Advance {
        if self.stage != Stage::Playing {
            return Advance::Stay;
        }
        let Some(machine) = self.active.as_mut().and_then(|a| a.machine.as_mut()) else {
            return Advance::Stay;
        };
        let advance = machine.tick();
        self.after_advance(advance);
        advance
    }

    /// Applies a local action and broadcasts its effect
    pub fn act(&mut self, action: Action<M>) -> Result<Advance, MatchError> {
        if self.stage != Stage::Playing {
            return Err(ActionError::NotActive.into());
        }
        let local_id = self.local_id().to_string();
        let Some(active) = self.active.as_mut() else {
            return Err(ActionError::NotActive.into());
        };
        let Some(machine) = active.machine.as_mut() else {
            return Err(ActionError::NotActive.into());
        };

        let local = machine.local_action(action)?;
        let event: Event<M> = SessionEvent::Action {
            sender_id: local_id,
            round: local.round,
            effect: local.effect,
        };
        if let Err(e) = active.channel.send(&mut self.transport, &event) {
            return Err(self.abandon(e));
        }
        self.after_advance(local.advance);
        Ok(local.advance)
    }

    /// Leaves the lobby or, mid-match, tells the opponent and gives up
    pub fn leave(&mut self) -> Result<(), MatchError> {
        match self.stage {
            Stage::Matched | Stage::Playing => {
                let event: Event<M> = SessionEvent::Leave {
                    sender_id: self.local_id().to_string(),
                };
                if let Some(active) = self.active.as_ref() {
                    if let Err(e) = active.channel.send(&mut self.transport, &event) {
                        warn!("Could not announce leave: {}", e);
                    }
                }
                info!("{} left the match", self.local_id());
                let score = self.local_score();
                self.finish(false, score, false);
            }
            Stage::Lobby => {
                self.lobby.leave(&mut self.transport)?;
                self.matchmaker.reset();
                self.stage = Stage::Idle;
            }
            Stage::Idle | Stage::Finished => {}
        }
        Ok(())
    }

    /// Drives the coordinator until the match finishes.
    ///
    /// Transport events are handled as they arrive; every tick runs the
    /// countdown and asks the controller for the local player's move.
    pub async fn run<C>(
        &mut self,
        events: &mut UnboundedReceiver<TransportEvent>,
        controller: &mut C,
        tick: Duration,
    ) -> Result<FinishResult, MatchError>
    where
        C: Controller<M::Adapter>,
    {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        error!("Transport event stream closed");
                        self.on_status(ConnectionStatus::Disconnected("event stream closed".to_string()));
                        return self.result.clone().ok_or(TransportError::Closed.into());
                    };
                    self.handle(event)?;
                }
                _ = ticker.tick() => {
                    self.tick();
                    let action = self
                        .machine()
                        .filter(|m| m.awaiting_local())
                        .and_then(|m| controller.next_action(m));
                    if let Some(action) = action {
                        match self.act(action) {
                            Ok(_) => {}
                            Err(MatchError::Action(e)) => warn!("Action refused: {}", e),
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            if let Some(result) = &self.result {
                return Ok(result.clone());
            }
        }
    }

    fn carries(&self, channel: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.channel.carries(channel))
    }

    fn in_match(&self) -> bool {
        matches!(self.stage, Stage::Matched | Stage::Playing)
    }

    fn local_score(&self) -> u32 {
        self.machine().map(|m| m.outcome().score).unwrap_or(0)
    }

    fn on_status(&mut self, status: ConnectionStatus) {
        info!("Connection status: {}", status);
        let lost = matches!(
            status,
            ConnectionStatus::Failed(_) | ConnectionStatus::Disconnected(_)
        );
        self.status = status;
        if lost && self.in_match() {
            warn!("Connection lost mid-match");
            let score = self.local_score();
            self.finish(false, score, false);
        }
    }

    fn on_lobby_sync(&mut self, members: &[PresenceRecord]) -> Result<(), MatchError> {
        let mut idle = self.lobby.on_presence_sync(members);
        if self.stage != Stage::Lobby {
            return Ok(());
        }

        let mode = self.mode.name();
        idle.retain(|p| p.meta.get(MODE_META).map(String::as_str) == Some(mode));

        match self.matchmaker.evaluate(&idle) {
            PairingDecision::Host {
                partner,
                session_id,
            } => {
                let local_id = self.local_id().to_string();
                let offer = MatchOffer {
                    initiator_id: local_id.clone(),
                    target_id: partner.id.clone(),
                    session_id: session_id.clone(),
                };
                self.lobby.send_offer(&mut self.transport, &offer)?;
                self.open_session(&session_id, &local_id, &partner.id, &partner.display_name)
            }
            PairingDecision::Guest {
                partner,
                session_id,
            } => self.open_session(&session_id, &partner.id, &partner.id, &partner.display_name),
            PairingDecision::Unmatched => Ok(()),
        }
    }

    fn on_lobby_event(&mut self, event_type: &str, payload: &[u8]) -> Result<(), MatchError> {
        let offer = match Lobby::decode_offer(event_type, payload) {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Dropping lobby event: {}", e);
                return Ok(());
            }
        };

        match self.matchmaker.observe_offer(&offer) {
            OfferOutcome::AcceptAsGuest {
                host_id,
                session_id,
            } => {
                if self.stage != Stage::Lobby {
                    return Ok(());
                }
                let name = self
                    .lobby
                    .member(&host_id)
                    .map(|m| m.display_name.clone())
                    .unwrap_or_else(|| host_id.clone());
                self.open_session(&session_id, &host_id, &host_id, &name)
            }
            OfferOutcome::HostConflict { host_id } => {
                self.reassign_host(&host_id);
                Ok(())
            }
            OfferOutcome::Rejected => {
                warn!(
                    "Rejected offer from {} for {}: already committed",
                    offer.initiator_id, offer.session_id
                );
                Ok(())
            }
            OfferOutcome::Observed | OfferOutcome::Confirmed => Ok(()),
        }
    }

    fn open_session(
        &mut self,
        session_id: &str,
        host_id: &str,
        opponent_id: &str,
        opponent_name: &str,
    ) -> Result<(), MatchError> {
        self.lobby.mark_matched(&mut self.transport)?;

        let local_id = self.local_id().to_string();
        let participants = if host_id == local_id {
            vec![local_id.clone(), opponent_id.to_string()]
        } else {
            vec![opponent_id.to_string(), local_id.clone()]
        };
        let session = Session::new(session_id, participants, host_id);
        let channel = SessionChannel::open(&mut self.transport, session, self.lobby.local())?;

        self.active = Some(ActiveMatch {
            channel,
            role: Role::assign(&local_id, host_id, self.mode.generator()),
            machine: None,
            opponent_name: opponent_name.to_string(),
            start_sent: false,
            peer_finished: false,
        });
        self.stage = Stage::Matched;
        Ok(())
    }

    fn reassign_host(&mut self, host_id: &str) {
        let local_id = self.local_id().to_string();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.start_sent || active.machine.is_some() {
            warn!("Host conflict after the match started; keeping current roles");
            return;
        }
        info!(
            "Host conflict on {} settled in favour of {}",
            active.channel.session().session_id,
            host_id
        );
        active.channel.session_mut().host_id = host_id.to_string();
        active.role = Role::assign(&local_id, host_id, self.mode.generator());
    }

    fn on_session_presence(&mut self, members: &[PresenceRecord]) -> Result<(), MatchError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        match active.channel.on_presence_sync(members) {
            PresenceChange::AllPresent => {
                if active.role.is_host() && !active.start_sent {
                    self.send_start()?;
                }
            }
            PresenceChange::PeerLeft(peer) => {
                if active.peer_finished {
                    debug!("{} left after finishing", peer);
                } else {
                    info!("{} vanished from the session", peer);
                    self.end_by_forfeit();
                }
            }
            PresenceChange::Unchanged => {}
        }
        Ok(())
    }

    fn send_start(&mut self) -> Result<(), MatchError> {
        let local_id = self.local_id().to_string();
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let Role::Host(host) = &mut active.role else {
            return Ok(());
        };

        let participants = active.channel.session().participant_ids.clone();
        let content = host.publish(&participants, &mut self.rng).clone();
        let event: Event<M> = SessionEvent::Start {
            sender_id: local_id,
            content: content.clone(),
        };
        if let Err(e) = active.channel.send(&mut self.transport, &event) {
            return Err(self.abandon(e));
        }
        active.start_sent = true;
        self.begin_match(content);
        Ok(())
    }

    fn begin_match(&mut self, content: M::Content) {
        let local_id = self.local_id().to_string();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.machine.is_some() {
            return;
        }

        let participants = active.channel.session().participant_ids.clone();
        let adapter = self.mode.build_adapter(&content, &participants, &local_id);
        let mut machine = PhaseMachine::new(adapter, participants, &local_id);
        let advance = machine.start();
        active.machine = Some(machine);
        info!(
            "{} match against {} under way",
            self.mode.name(),
            active.opponent_name
        );

        self.stage = Stage::Playing;
        self.after_advance(advance);
    }

    fn on_session_event(&mut self, event_type: &str, payload: &[u8]) -> Result<(), MatchError> {
        let event = match Event::<M>::decode(event_type, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping session event: {}", e);
                return Ok(());
            }
        };
        if event.sender_id() == self.local_id() {
            return Ok(());
        }

        match event {
            SessionEvent::Start { sender_id, content } => self.on_start(&sender_id, content),
            SessionEvent::Action {
                sender_id,
                round,
                effect,
            } => {
                let Some(machine) = self.active.as_mut().and_then(|a| a.machine.as_mut()) else {
                    warn!("ACTION from {} before the match started", sender_id);
                    return Ok(());
                };
                let advance = machine.remote_effect(&sender_id, round, effect);
                self.after_advance(advance);
                Ok(())
            }
            SessionEvent::Result {
                sender_id,
                won,
                score,
            } => {
                info!("{} finished: won={} score={}", sender_id, won, score);
                if let Some(active) = self.active.as_mut() {
                    active.peer_finished = true;
                }
                Ok(())
            }
            SessionEvent::Leave { sender_id } => {
                info!("{} left the match", sender_id);
                self.end_by_forfeit();
                Ok(())
            }
        }
    }

    fn on_start(&mut self, sender_id: &str, content: M::Content) -> Result<(), MatchError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !active.channel.session().is_host(sender_id) {
            warn!("Ignoring START from non-host {}", sender_id);
            return Ok(());
        }
        let Role::Guest(guest) = &mut active.role else {
            warn!("Host received START from {}", sender_id);
            return Ok(());
        };
        if guest.accept(content.clone()) {
            self.begin_match(content);
        }
        Ok(())
    }

    fn after_advance(&mut self, advance: Advance) {
        if advance != Advance::Terminal {
            return;
        }
        let outcome = self.machine().map(|m| m.outcome()).unwrap_or(MatchOutcome {
            won: false,
            score: 0,
        });
        self.finish(outcome.won, outcome.score, false);
    }

    fn end_by_forfeit(&mut self) {
        if !self.in_match() {
            return;
        }
        let score = self.local_score();
        self.finish(true, score, true);
    }

    /// A send failed: the session is over, counted as a loss
    fn abandon(&mut self, e: TransportError) -> MatchError {
        error!("Session send failed: {}", e);
        let score = self.local_score();
        self.finish(false, score, false);
        e.into()
    }

    /// Publishes the result, closes the session and fires the hook. Runs once.
    fn finish(&mut self, won: bool, score: u32, forfeit: bool) {
        if self.result.is_some() {
            return;
        }
        let local_id = self.local_id().to_string();
        let mut opponent_name = String::new();

        if let Some(active) = self.active.as_mut() {
            opponent_name = active.opponent_name.clone();
            if active.channel.is_open() {
                let event: Event<M> = SessionEvent::Result {
                    sender_id: local_id.clone(),
                    won,
                    score,
                };
                if let Err(e) = active.channel.send(&mut self.transport, &event) {
                    warn!("Could not publish result: {}", e);
                }
            }
            if let Err(e) = active.channel.close(&mut self.transport) {
                warn!("Could not close session: {}", e);
            }
        }
        if let Err(e) = self.lobby.leave(&mut self.transport) {
            warn!("Could not leave lobby: {}", e);
        }

        let result = FinishResult {
            won,
            score,
            opponent_name,
            forfeit,
        };
        info!(
            "{} finished against {}: won={} score={}{}",
            local_id,
            result.opponent_name,
            won,
            score,
            if forfeit { " (forfeit)" } else { "" }
        );
        self.stage = Stage::Finished;
        self.result = Some(result.clone());
        if let Some(hook) = self.on_finish.take() {
            hook(result);
        }
    }
}
