//! Match state and authoritative tick loop

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::util::scheduler::FixedTimestep;
use crate::util::time::{MonotonicClock, TICKS_1S, TIMESTEP_MS};
use crate::ws::protocol::{
    CardId, ClientMsg, EntityKind, MatchPhase, PlayerInfo, PlayerSecret, PlayerView, ServerMsg, StateTree,
};

use super::deck::{CardStats, PlayerDeck};
use super::economy::{validate_placement, ManaPool, PlayCardRejection};
use super::field::{tile_center, tower_layout};
use super::simulation::EntitySimulation;
use super::snapshot::SnapshotBuilder;
use super::{MatchCommand, PlayerInput};

/// Seats per match
pub const MAX_PLAYERS: usize = 2;

/// Queue depth of the match command channel
const COMMAND_BUFFER: usize = 256;

/// Match membership errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("Match is full")]
    MatchFull,

    #[error("Player already joined")]
    AlreadyJoined,

    #[error("Match already started")]
    AlreadyStarted,

    #[error("Player is not in this match")]
    UnknownPlayer,

    #[error("Match is closed")]
    Closed,
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub user_id: Uuid,
    pub display_name: String,
    /// Second joiner plays from the top of the field
    pub is_flipped: bool,
    pub mana: ManaPool,
    pub deck: PlayerDeck,
}

impl PlayerState {
    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
        }
    }

    /// Full view including the secret part
    fn view(&self) -> PlayerView {
        PlayerView {
            name: self.display_name.clone(),
            secret: Some(PlayerSecret {
                mana: self.mana.mana(),
                mana_regen_last_tick: self.mana.regen_last_tick(),
                hand: self.deck.hand().to_vec(),
                next_card: self.deck.next_card(),
                is_flipped: self.is_flipped,
            }),
        }
    }
}

/// Who a queued message goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Player(Uuid),
}

/// Message produced by the engine, delivered by the match task
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: Recipient,
    pub msg: ServerMsg,
}

/// Rules and state of one match, free of any I/O
pub struct MatchEngine {
    id: Uuid,
    seed: u64,
    config: MatchConfig,
    phase: MatchPhase,
    tick: u64,
    next_state_at: u64,
    round_deadline_tick: u64,
    /// In join order
    players: Vec<PlayerState>,
    simulation: EntitySimulation,
    rng: ChaCha8Rng,
    outbox: Vec<Outgoing>,
    /// Set once the result has been shown for the display delay
    closed: bool,
    /// `Some(winner)` once decided, `Some(None)` for a draw
    result: Option<Option<Uuid>>,
}

impl MatchEngine {
    pub fn new(id: Uuid, seed: u64, config: MatchConfig) -> Self {
        Self {
            id,
            seed,
            config,
            phase: MatchPhase::Waiting,
            tick: 0,
            next_state_at: 0,
            round_deadline_tick: 0,
            players: Vec::with_capacity(MAX_PLAYERS),
            simulation: EntitySimulation::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            outbox: Vec::new(),
            closed: false,
            result: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn next_state_at(&self) -> u64 {
        self.next_state_at
    }

    pub fn round_deadline_tick(&self) -> u64 {
        self.round_deadline_tick
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn result(&self) -> Option<Option<Uuid>> {
        self.result
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, user_id: Uuid) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn player_mut(&mut self, user_id: Uuid) -> Option<&mut PlayerState> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn simulation(&self) -> &EntitySimulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut EntitySimulation {
        &mut self.simulation
    }

    /// Take every message queued since the last drain
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, to: Recipient, msg: ServerMsg) {
        self.outbox.push(Outgoing { to, msg });
    }

    /// Seat a player. The second one starts the countdown.
    pub fn join(&mut self, user_id: Uuid, display_name: String) -> Result<(), MatchError> {
        if self.closed {
            return Err(MatchError::Closed);
        }
        if self.player(user_id).is_some() {
            return Err(MatchError::AlreadyJoined);
        }
        if self.phase != MatchPhase::Waiting {
            return Err(MatchError::AlreadyStarted);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(MatchError::MatchFull);
        }

        let player = PlayerState {
            user_id,
            display_name,
            is_flipped: !self.players.is_empty(),
            mana: ManaPool::default(),
            deck: PlayerDeck::new(&mut self.rng),
        };
        self.players.push(player);

        info!(
            match_id = %self.id,
            user_id = %user_id,
            player_count = self.players.len(),
            "Player joined match"
        );

        let players = self.players.iter().map(PlayerState::info).collect();
        self.send(
            Recipient::All,
            ServerMsg::MatchJoined {
                match_id: self.id,
                room: String::new(),
                players,
            },
        );

        if self.players.len() == MAX_PLAYERS {
            self.start_countdown();
        }
        Ok(())
    }

    fn start_countdown(&mut self) {
        self.phase = MatchPhase::Starting;
        self.next_state_at = self.tick + self.config.start_delay_ticks;

        let mut hands = Vec::with_capacity(self.players.len());
        let mut towers = Vec::new();
        for player in &mut self.players {
            player.mana.reset_regen(self.next_state_at);
            hands.push((player.user_id, player.deck.hand().to_vec(), player.deck.next_card()));
            for (kind, position) in tower_layout(player.is_flipped) {
                towers.push((player.user_id, player.is_flipped, kind, position));
            }
        }
        for (user_id, cards, next_card) in hands {
            self.send(Recipient::Player(user_id), ServerMsg::CardHand { cards, next_card });
        }
        for (owner, flipped, kind, position) in towers {
            self.simulation.spawn(owner, flipped, kind, position, self.tick);
        }

        info!(
            match_id = %self.id,
            starts_at = self.next_state_at,
            "Match countdown started"
        );
    }

    /// Remove a player. Leaving a running match hands the win to the other.
    pub fn leave(&mut self, user_id: Uuid) -> Result<(), MatchError> {
        let index = self
            .players
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or(MatchError::UnknownPlayer)?;
        self.players.remove(index);

        info!(
            match_id = %self.id,
            user_id = %user_id,
            phase = ?self.phase,
            "Player left match"
        );
        self.send(
            Recipient::All,
            ServerMsg::PlayerLeft {
                user_id,
                reason: "left".to_string(),
            },
        );

        if matches!(self.phase, MatchPhase::Starting | MatchPhase::Playing) {
            let winner = self.players.first().map(|p| p.user_id);
            self.finish(winner);
        }
        Ok(())
    }

    /// Handle a play request. The player always gets a correlated result,
    /// carrying the new next card on success and nothing on rejection.
    pub fn play_card(
        &mut self,
        user_id: Uuid,
        request_id: u32,
        card: CardId,
        tile_x: i32,
        tile_y: i32,
    ) -> Result<CardId, PlayCardRejection> {
        let result = self.try_play_card(user_id, card, tile_x, tile_y);

        match &result {
            Ok(next) => debug!(
                match_id = %self.id,
                user_id = %user_id,
                ?card,
                tile_x,
                tile_y,
                next_card = ?next,
                "Card played"
            ),
            Err(reason) => debug!(
                match_id = %self.id,
                user_id = %user_id,
                request_id,
                %reason,
                "Play card rejected"
            ),
        }

        if self.player(user_id).is_some() {
            self.send(
                Recipient::Player(user_id),
                ServerMsg::PlayCardResult {
                    request_id,
                    next_card: result.as_ref().ok().copied(),
                },
            );
        }
        result
    }

    fn try_play_card(&mut self, user_id: Uuid, card: CardId, tile_x: i32, tile_y: i32) -> Result<CardId, PlayCardRejection> {
        if self.phase != MatchPhase::Playing {
            return Err(PlayCardRejection::NotPlaying);
        }
        let index = self
            .players
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or(PlayCardRejection::UnknownPlayer)?;

        if !self.players[index].deck.has_card(card) {
            return Err(PlayCardRejection::CardNotInHand(card));
        }
        let zones = self.simulation.enemy_influence_zones(user_id);
        validate_placement(tile_x, tile_y, &zones)?;

        let stats = CardStats::for_card(card);
        let tick = self.tick;
        let player = &mut self.players[index];
        player.mana.spend(stats.mana_cost, tick)?;
        player.deck.use_card(card).ok_or(PlayCardRejection::CardNotInHand(card))?;
        let next = player.deck.next_card();
        let flipped = player.is_flipped;

        self.simulation
            .spawn(user_id, flipped, stats.spawns, tile_center(tile_x, tile_y), tick);
        Ok(next)
    }

    /// Advance one tick
    pub fn step(&mut self) {
        self.tick += 1;

        match self.phase {
            MatchPhase::Waiting => {}
            MatchPhase::Starting => {
                if self.tick >= self.next_state_at {
                    self.phase = MatchPhase::Playing;
                    self.round_deadline_tick = self.tick + self.config.round_ticks;
                    info!(
                        match_id = %self.id,
                        tick = self.tick,
                        deadline = self.round_deadline_tick,
                        "Match started"
                    );
                }
            }
            MatchPhase::Playing => self.play_tick(),
            MatchPhase::Done => {
                if !self.closed && self.tick >= self.next_state_at {
                    self.closed = true;
                    info!(match_id = %self.id, "Match closed");
                }
            }
        }
    }

    fn play_tick(&mut self) {
        let tick = self.tick;
        for player in &mut self.players {
            player.mana.regen(tick);
        }

        for hit in self.simulation.step(tick) {
            self.send(
                Recipient::All,
                ServerMsg::Projectile {
                    attacker_id: hit.attacker_id,
                    victim_id: hit.victim_id,
                },
            );
        }

        let removed = self.simulation.remove_dead();
        let fallen: Vec<Uuid> = removed
            .iter()
            .filter(|e| e.kind == EntityKind::BigTower)
            .map(|e| e.owner)
            .collect();
        if !fallen.is_empty() {
            let survivors: Vec<Uuid> = self
                .players
                .iter()
                .map(|p| p.user_id)
                .filter(|id| !fallen.contains(id))
                .collect();
            let winner = match survivors.as_slice() {
                [only] => Some(*only),
                _ => None,
            };
            self.finish(winner);
            return;
        }

        if tick >= self.round_deadline_tick {
            let winner = self.decide_by_towers();
            self.finish(winner);
            return;
        }

        let left = self.round_deadline_tick - tick;
        if left % TICKS_1S == 0 {
            self.send(
                Recipient::All,
                ServerMsg::TimeLeft {
                    seconds: (left / TICKS_1S) as u32,
                },
            );
        }
    }

    /// Round timed out: more towers wins, then the sturdier weakest tower
    fn decide_by_towers(&self) -> Option<Uuid> {
        let score = |owner: Uuid| {
            let hps: Vec<i32> = self.simulation.towers_of(owner).map(|e| e.hp).collect();
            (hps.len(), hps.iter().min().copied().unwrap_or(0))
        };

        match self.players.as_slice() {
            [a, b] => {
                let (sa, sb) = (score(a.user_id), score(b.user_id));
                if sa > sb {
                    Some(a.user_id)
                } else if sb > sa {
                    Some(b.user_id)
                } else {
                    None
                }
            }
            [only] => Some(only.user_id),
            _ => None,
        }
    }

    fn finish(&mut self, winner: Option<Uuid>) {
        self.phase = MatchPhase::Done;
        self.next_state_at = self.tick + self.config.done_delay_ticks;
        self.simulation.set_all_idle();
        self.result = Some(winner);

        info!(
            match_id = %self.id,
            tick = self.tick,
            winner = ?winner,
            "Match over"
        );
        self.send(Recipient::All, ServerMsg::GameOver { winner });
    }

    /// Canonical state tree, secrets included
    pub fn capture(&self) -> StateTree {
        StateTree {
            phase: self.phase,
            tick: self.tick,
            next_state_at: self.next_state_at,
            round_deadline_tick: self.round_deadline_tick,
            players: self.players.iter().map(|p| (p.user_id, p.view())).collect(),
            entities: self.simulation.entities().map(|e| (e.id, e.view())).collect(),
        }
    }
}

/// Handle to a running match
#[derive(Clone, Debug)]
pub struct MatchHandle {
    pub id: Uuid,
    pub room: String,
    pub command_tx: mpsc::Sender<MatchCommand>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Seat a player; `outbound` receives every message for them
    pub async fn join(
        &self,
        user_id: Uuid,
        display_name: String,
        outbound: mpsc::Sender<ServerMsg>,
    ) -> Result<(), MatchError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(MatchCommand::Join {
                user_id,
                display_name,
                outbound,
                reply,
            })
            .await
            .map_err(|_| MatchError::Closed)?;
        response.await.map_err(|_| MatchError::Closed)?
    }

    pub async fn send_input(&self, input: PlayerInput) -> bool {
        self.command_tx.send(MatchCommand::Input(input)).await.is_ok()
    }

    pub async fn disconnect(&self, user_id: Uuid) {
        let _ = self.command_tx.send(MatchCommand::Disconnect { user_id }).await;
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match task
pub struct GameMatch {
    engine: MatchEngine,
    room: String,
    command_rx: mpsc::Receiver<MatchCommand>,
    connections: HashMap<Uuid, mpsc::Sender<ServerMsg>>,
    snapshots: SnapshotBuilder,
    scheduler: FixedTimestep,
    clock: MonotonicClock,
    player_count: Arc<AtomicUsize>,
    had_players: bool,
}

impl GameMatch {
    /// Create a new match
    pub fn new(id: Uuid, room: String, seed: u64, config: MatchConfig) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            room: room.clone(),
            command_tx,
            player_count: player_count.clone(),
        };

        let game_match = Self {
            engine: MatchEngine::new(id, seed, config),
            room,
            command_rx,
            connections: HashMap::new(),
            snapshots: SnapshotBuilder::new(),
            scheduler: FixedTimestep::new(TIMESTEP_MS),
            clock: MonotonicClock::new(),
            player_count,
            had_players: false,
        };

        (game_match, handle)
    }

    /// Run the tick loop until the match closes or everyone is gone.
    ///
    /// Commands are applied between ticks as they arrive. Dropping the
    /// per-connection senders at the end tells every socket to close normally.
    pub async fn run(mut self) {
        let match_id = self.engine.id();
        info!(match_id = %match_id, room = %self.room, seed = self.engine.seed(), "Match task started");

        let now = self.clock.now_ms();
        self.scheduler.start(now, now + TIMESTEP_MS, 0);

        loop {
            let deadline = self.scheduler.next_deadline().map(|ms| self.clock.instant_at(ms));

            tokio::select! {
                _ = async {
                    match deadline {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if self.scheduler.tick(self.clock.now_ms()).is_some() {
                        self.engine.step();
                        self.broadcast_state();
                        self.flush_outbox();
                    }
                }
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        self.handle_command(command);
                        self.flush_outbox();
                    }
                    None => {
                        info!(match_id = %match_id, "All match handles dropped");
                        break;
                    }
                }
            }

            if self.engine.is_closed() {
                break;
            }
            if self.had_players && self.engine.player_count() == 0 {
                info!(match_id = %match_id, "All players left, ending match");
                break;
            }
        }

        self.scheduler.stop();
        self.connections.clear();
        self.player_count.store(0, Ordering::Relaxed);
        info!(match_id = %match_id, ticks = self.engine.tick(), "Match task finished");
    }

    fn handle_command(&mut self, command: MatchCommand) {
        match command {
            MatchCommand::Join {
                user_id,
                display_name,
                outbound,
                reply,
            } => {
                let result = self.engine.join(user_id, display_name);
                if result.is_ok() {
                    self.connections.insert(user_id, outbound);
                    self.had_players = true;
                    self.player_count.store(self.engine.player_count(), Ordering::Relaxed);
                    // The room name is only known here
                    for out in self.engine.outbox.iter_mut() {
                        if let ServerMsg::MatchJoined { room, .. } = &mut out.msg {
                            room.clone_from(&self.room);
                        }
                    }
                } else {
                    warn!(match_id = %self.engine.id(), user_id = %user_id, ?result, "Join refused");
                }
                let _ = reply.send(result);
            }
            MatchCommand::Input(PlayerInput { user_id, msg, .. }) => match msg {
                ClientMsg::PlayCard {
                    request_id,
                    card,
                    tile_x,
                    tile_y,
                } => {
                    let _ = self.engine.play_card(user_id, request_id, card, tile_x, tile_y);
                }
                ClientMsg::Ping { t } => {
                    if let Some(tx) = self.connections.get(&user_id) {
                        deliver(tx, user_id, ServerMsg::Pong { t });
                    }
                }
                ClientMsg::LeaveMatch => self.remove_player(user_id),
            },
            MatchCommand::Disconnect { user_id } => self.remove_player(user_id),
        }
    }

    fn remove_player(&mut self, user_id: Uuid) {
        if let Err(e) = self.engine.leave(user_id) {
            debug!(match_id = %self.engine.id(), user_id = %user_id, error = %e, "Leave ignored");
        }
        // Dropping the sender closes that socket
        self.connections.remove(&user_id);
        self.snapshots.forget(user_id);
        self.player_count.store(self.engine.player_count(), Ordering::Relaxed);
    }

    /// Push every connection the diff against what it last received
    fn broadcast_state(&mut self) {
        let tree = self.engine.capture();
        for (user_id, tx) in &self.connections {
            let (view, diff) = self.snapshots.prepare(*user_id, &tree);
            match tx.try_send(ServerMsg::StateDiff(diff)) {
                Ok(()) => self.snapshots.commit(*user_id, view),
                Err(TrySendError::Full(_)) => {
                    warn!(user_id = %user_id, tick = tree.tick, "Outbound queue full, diff deferred");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(user_id = %user_id, "Outbound queue closed");
                }
            }
        }
    }

    fn flush_outbox(&mut self) {
        for Outgoing { to, msg } in self.engine.drain_outbox() {
            match to {
                Recipient::All => {
                    for (user_id, tx) in &self.connections {
                        deliver(tx, *user_id, msg.clone());
                    }
                }
                Recipient::Player(user_id) => {
                    if let Some(tx) = self.connections.get(&user_id) {
                        deliver(tx, user_id, msg);
                    }
                }
            }
        }
    }
}

fn deliver(tx: &mpsc::Sender<ServerMsg>, user_id: Uuid, msg: ServerMsg) {
    if let Err(TrySendError::Full(_)) = tx.try_send(msg) {
        warn!(user_id = %user_id, "Outbound queue full, message dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::economy::MANA_MAX;
    use crate::game::simulation::EntityId;
    use crate::util::time::TICKS_3S;
    use crate::ws::protocol::EntityState;

    const ALL_MELEE: [CardId; 14] = [CardId::MeleeFighter; 14];

    fn config(round_ticks: u64) -> MatchConfig {
        MatchConfig {
            round_ticks,
            ..MatchConfig::default()
        }
    }

    /// Engine with two players, stepped into the playing phase
    fn playing_engine(round_ticks: u64) -> (MatchEngine, Uuid, Uuid) {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut engine = MatchEngine::new(Uuid::new_v4(), 9, config(round_ticks));
        engine.join(a, "alice".into()).unwrap();
        engine.join(b, "bob".into()).unwrap();
        while engine.phase() != MatchPhase::Playing {
            engine.step();
        }
        engine.drain_outbox();
        (engine, a, b)
    }

    fn give_melee_hand(engine: &mut MatchEngine, user: Uuid, mana: u8) {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let player = engine.player_mut(user).unwrap();
        player.deck = PlayerDeck::from_cards(&ALL_MELEE, &mut rng);
        player.mana = ManaPool::with_mana(mana);
    }

    fn results(outbox: &[Outgoing]) -> Vec<&ServerMsg> {
        outbox
            .iter()
            .map(|o| &o.msg)
            .filter(|m| matches!(m, ServerMsg::PlayCardResult { .. }))
            .collect()
    }

    fn tower(engine: &MatchEngine, owner: Uuid, kind: EntityKind) -> EntityId {
        engine
            .simulation()
            .entities()
            .find(|e| e.owner == owner && e.kind == kind)
            .map(|e| e.id)
            .unwrap()
    }

    #[test]
    fn test_second_join_starts_countdown() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut engine = MatchEngine::new(Uuid::new_v4(), 1, MatchConfig::default());
        engine.join(a, "alice".into()).unwrap();
        assert_eq!(engine.phase(), MatchPhase::Waiting);
        assert_eq!(engine.join(a, "again".into()), Err(MatchError::AlreadyJoined));

        engine.join(b, "bob".into()).unwrap();
        assert_eq!(engine.phase(), MatchPhase::Starting);
        assert_eq!(engine.next_state_at(), TICKS_3S);
        assert!(engine.player(b).unwrap().is_flipped);
        assert!(!engine.player(a).unwrap().is_flipped);
        assert_eq!(engine.player(a).unwrap().mana.regen_last_tick(), TICKS_3S);
        assert_eq!(engine.simulation().len(), 6);
        assert_eq!(engine.join(Uuid::new_v4(), "carol".into()), Err(MatchError::AlreadyStarted));

        let hands = engine
            .drain_outbox()
            .into_iter()
            .filter(|o| matches!(o.msg, ServerMsg::CardHand { .. }))
            .count();
        assert_eq!(hands, 2);

        for _ in 0..TICKS_3S {
            engine.step();
        }
        assert_eq!(engine.phase(), MatchPhase::Playing);
        assert_eq!(engine.round_deadline_tick(), TICKS_3S + 180 * TICKS_1S);
    }

    #[test]
    fn test_play_card_without_mana_is_rejected() {
        let (mut engine, a, _) = playing_engine(1000);
        give_melee_hand(&mut engine, a, 2);
        let before = engine.simulation().len();
        let hand_before = engine.player(a).unwrap().deck.hand().to_vec();

        let result = engine.play_card(a, 11, CardId::MeleeFighter, 4, 20);
        assert_eq!(result, Err(PlayCardRejection::NotEnoughMana { have: 2, need: 3 }));

        let outbox = engine.drain_outbox();
        assert_eq!(
            results(&outbox),
            vec![&ServerMsg::PlayCardResult {
                request_id: 11,
                next_card: None
            }]
        );
        assert_eq!(outbox[0].to, Recipient::Player(a));
        assert_eq!(engine.simulation().len(), before);
        assert_eq!(engine.player(a).unwrap().mana.mana(), 2);
        assert_eq!(engine.player(a).unwrap().deck.hand(), hand_before.as_slice());
    }

    #[test]
    fn test_valid_play_spawns_unit() {
        let (mut engine, a, _) = playing_engine(1000);
        give_melee_hand(&mut engine, a, 5);
        let before = engine.simulation().len();
        let expected_next = engine.player(a).unwrap().deck.next_card();

        let next = engine.play_card(a, 1, CardId::MeleeFighter, 4, 20).unwrap();
        let player = engine.player(a).unwrap();
        assert_eq!(player.mana.mana(), 2);
        assert_eq!(player.deck.hand()[0], expected_next);
        assert_eq!(next, player.deck.next_card());
        assert_eq!(engine.simulation().len(), before + 1);

        let spawned = engine.simulation().entities().last().unwrap();
        assert_eq!(spawned.kind, EntityKind::MeleeFighter);
        assert_eq!(spawned.owner, a);
        assert_eq!((spawned.position.x, spawned.position.y), (4.5, 20.5));
        assert_eq!(spawned.state, EntityState::Spawning);

        assert_eq!(
            results(&engine.drain_outbox()),
            vec![&ServerMsg::PlayCardResult {
                request_id: 1,
                next_card: Some(next)
            }]
        );
    }

    #[test]
    fn test_play_card_placement_rules() {
        let (mut engine, a, b) = playing_engine(1000);
        give_melee_hand(&mut engine, a, MANA_MAX);
        give_melee_hand(&mut engine, b, MANA_MAX);

        // River
        assert_eq!(
            engine.play_card(a, 1, CardId::MeleeFighter, 9, 15),
            Err(PlayCardRejection::Water { x: 9, y: 15 })
        );
        // Behind the opponent's towers
        assert_eq!(
            engine.play_card(a, 2, CardId::MeleeFighter, 4, 5),
            Err(PlayCardRejection::InfluenceZone { x: 4, y: 5 })
        );
        assert_eq!(
            engine.play_card(b, 3, CardId::MeleeFighter, 4, 20),
            Err(PlayCardRejection::InfluenceZone { x: 4, y: 20 })
        );
        assert_eq!(
            engine.play_card(a, 4, CardId::Flying, 4, 20),
            Err(PlayCardRejection::CardNotInHand(CardId::Flying))
        );
        assert_eq!(engine.player(a).unwrap().mana.mana(), MANA_MAX);
        assert_eq!(results(&engine.drain_outbox()).len(), 4);
    }

    #[test]
    fn test_play_card_before_start_is_rejected() {
        let a = Uuid::new_v4();
        let mut engine = MatchEngine::new(Uuid::new_v4(), 1, MatchConfig::default());
        engine.join(a, "alice".into()).unwrap();
        engine.drain_outbox();

        assert_eq!(
            engine.play_card(a, 5, CardId::MeleeFighter, 4, 20),
            Err(PlayCardRejection::NotPlaying)
        );
        assert_eq!(results(&engine.drain_outbox()).len(), 1);
    }

    #[test]
    fn test_mana_regenerates_and_caps() {
        let (mut engine, a, _) = playing_engine(100_000);
        for _ in 0..(20 * 56) {
            engine.step();
            let mana = engine.player(a).unwrap().mana.mana();
            assert!(mana <= MANA_MAX);
        }
        assert_eq!(engine.player(a).unwrap().mana.mana(), MANA_MAX);

        // A capped player's view stays put between ticks
        let view = engine.capture().players[&a].clone();
        for _ in 0..10 {
            engine.step();
        }
        assert_eq!(engine.capture().players[&a], view);
    }

    #[test]
    fn test_equal_towers_at_deadline_is_draw() {
        let (mut engine, _, _) = playing_engine(5);
        for _ in 0..5 {
            engine.step();
        }
        assert_eq!(engine.phase(), MatchPhase::Done);
        assert_eq!(engine.result(), Some(None));
        let outbox = engine.drain_outbox();
        assert!(outbox
            .iter()
            .any(|o| o.msg == ServerMsg::GameOver { winner: None } && o.to == Recipient::All));
        assert!(engine
            .simulation()
            .entities()
            .all(|e| e.state == EntityState::Idle));
    }

    #[test]
    fn test_more_towers_wins_at_deadline() {
        let (mut engine, a, b) = playing_engine(5);
        let small = tower(&engine, b, EntityKind::SmallTower);
        engine.simulation_mut().get_mut(small).unwrap().hp = 0;

        engine.step();
        // Removed from the simulation and the captured tree in the same tick
        assert!(engine.simulation().get(small).is_none());
        assert!(!engine.capture().entities.contains_key(&small));

        for _ in 0..4 {
            engine.step();
        }
        assert_eq!(engine.result(), Some(Some(a)));
    }

    #[test]
    fn test_lowest_tower_hp_breaks_tie() {
        let (mut engine, a, b) = playing_engine(2);
        let weak = tower(&engine, a, EntityKind::SmallTower);
        engine.simulation_mut().get_mut(weak).unwrap().hp = 10;
        engine.step();
        engine.step();
        assert_eq!(engine.result(), Some(Some(b)));
    }

    #[test]
    fn test_big_tower_loss_ends_match() {
        let (mut engine, a, b) = playing_engine(1000);
        let big = tower(&engine, a, EntityKind::BigTower);
        engine.simulation_mut().get_mut(big).unwrap().hp = -5;
        engine.step();

        assert_eq!(engine.phase(), MatchPhase::Done);
        assert_eq!(engine.result(), Some(Some(b)));
        assert_eq!(engine.simulation().field().buildings().count(), 5);
    }

    #[test]
    fn test_leave_hands_win_to_opponent() {
        let (mut engine, a, b) = playing_engine(1000);
        engine.leave(b).unwrap();
        assert_eq!(engine.result(), Some(Some(a)));
        assert_eq!(engine.leave(b), Err(MatchError::UnknownPlayer));
    }

    #[test]
    fn test_done_closes_after_display_delay() {
        let (mut engine, _, b) = playing_engine(1000);
        engine.leave(b).unwrap();
        for _ in 0..(TICKS_3S - 1) {
            engine.step();
            assert!(!engine.is_closed());
        }
        engine.step();
        assert!(engine.is_closed());
    }

    #[test]
    fn test_time_left_once_per_second() {
        let (mut engine, _, _) = playing_engine(3 * TICKS_1S);
        let mut seconds = Vec::new();
        for _ in 0..(3 * TICKS_1S) {
            engine.step();
            for out in engine.drain_outbox() {
                if let ServerMsg::TimeLeft { seconds: s } = out.msg {
                    seconds.push(s);
                }
            }
        }
        assert_eq!(seconds, vec![2, 1]);
    }

    async fn next_msg(rx: &mut mpsc::Receiver<ServerMsg>) -> Option<ServerMsg> {
        tokio::time::timeout(std::time::Duration::from_secs(30), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_task_runs_to_close() {
        let (game, handle) = GameMatch::new(Uuid::new_v4(), "cr".into(), 3, config(10 * TICKS_1S));
        let task = tokio::spawn(game.run());

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (a_tx, mut a_rx) = mpsc::channel(4096);
        let (b_tx, mut b_rx) = mpsc::channel(4096);
        handle.join(a, "alice".into(), a_tx).await.unwrap();
        handle.join(b, "bob".into(), b_tx).await.unwrap();
        assert_eq!(handle.player_count(), 2);

        let mut saw_hand = false;
        let mut saw_playing = false;
        let mut winner = None;
        while let Some(msg) = next_msg(&mut a_rx).await {
            match msg {
                ServerMsg::MatchJoined { room, .. } => assert_eq!(room, "cr"),
                ServerMsg::CardHand { cards, .. } => {
                    assert_eq!(cards.len(), 4);
                    saw_hand = true;
                }
                ServerMsg::StateDiff(diff) => {
                    // Only alice's secret ever reaches alice
                    if let Some(bob) = diff.players.get(&b) {
                        assert!(bob.secret.is_none());
                    }
                    if diff.phase == Some(MatchPhase::Playing) {
                        saw_playing = true;
                        handle
                            .send_input(PlayerInput {
                                user_id: b,
                                msg: ClientMsg::LeaveMatch,
                                received_at: 0,
                            })
                            .await;
                    }
                }
                ServerMsg::GameOver { winner: w } => winner = Some(w),
                _ => {}
            }
        }

        assert!(saw_hand);
        assert!(saw_playing);
        assert_eq!(winner, Some(Some(a)));
        // Bob's stream ended when he left
        while b_rx.recv().await.is_some() {}
        // Everyone gone: the task ends
        task.await.unwrap();
    }
}
