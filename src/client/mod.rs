//! Client-side reconciliation: local state mirror, time alignment,
//! interpolation and speculative placement.
//!
//! Nothing here touches the network or a renderer. The embedding client
//! feeds [`ClientSession::handle`] with decoded server messages and calls
//! [`ClientSession::frame`] from its render callback.

pub mod card_hand;
pub mod connection;
pub mod interpolation;
pub mod placement;
pub mod time_sync;

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::game::economy::{MANA_MAX, MANA_REGEN_TICKS};
use crate::game::field::influence_zone;
use crate::game::geometry::{Rect, Vec2};
use crate::game::snapshot;
use crate::util::scheduler::FixedTimestep;
use crate::util::time::{TICKS_HALF_S, TIMESTEP_MS};
use crate::ws::protocol::{EntityKind, MatchPhase, PlayerSecret, ServerMsg, StateDiff, StateTree};

use self::card_hand::{CardHand, PendingPlay};
use self::connection::DisconnectKind;
use self::interpolation::Interpolator;
use self::placement::{PlacementPreview, ReleaseOutcome};
use self::time_sync::StartTimeSync;

/// How far behind the newest tick rendering runs
pub const INTERPOLATION_WINDOW_MS: f64 = 2.0 * TIMESTEP_MS;
/// Ring headroom for samples bunched up by jitter
const INTERPOLATION_SIZE_COEF: f64 = 2.0;

/// What the UI layer should react to after a message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    PlayResolved { request: PendingPlay, accepted: bool },
    Projectile { attacker_id: u32, victim_id: u32 },
    TimeLeft { seconds: u32 },
    PhaseChanged(MatchPhase),
    GameOver { winner: Option<Uuid> },
    PlayerLeft { user_id: Uuid },
}

/// One player's view of a match
pub struct ClientSession {
    user_id: Option<Uuid>,
    state: StateTree,
    hand: CardHand,
    scheduler: FixedTimestep,
    start_sync: StartTimeSync,
    positions: HashMap<u32, Interpolator>,
    hitpoints: HashMap<u32, Interpolator>,
    mana: Interpolator,
    disconnect: Option<DisconnectKind>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            user_id: None,
            state: StateTree::default(),
            hand: CardHand::new(),
            scheduler: FixedTimestep::new(TIMESTEP_MS),
            start_sync: StartTimeSync::new(TIMESTEP_MS),
            positions: HashMap::new(),
            hitpoints: HashMap::new(),
            mana: new_interpolator(),
            disconnect: None,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn state(&self) -> &StateTree {
        &self.state
    }

    pub fn hand(&self) -> &CardHand {
        &self.hand
    }

    pub fn scheduler(&self) -> &FixedTimestep {
        &self.scheduler
    }

    pub fn disconnect(&self) -> Option<DisconnectKind> {
        self.disconnect
    }

    /// Our own secret state, once the first diff arrived
    pub fn our_secret(&self) -> Option<&PlayerSecret> {
        let id = self.user_id?;
        self.state.players.get(&id)?.secret.as_ref()
    }

    pub fn is_flipped(&self) -> bool {
        self.our_secret().is_some_and(|s| s.is_flipped)
    }

    /// Process one server message received at local time `now_ms`
    pub fn handle(&mut self, msg: ServerMsg, now_ms: f64) -> Vec<ClientEvent> {
        match msg {
            ServerMsg::Welcome { user_id, .. } => {
                self.user_id = Some(user_id);
                Vec::new()
            }
            ServerMsg::StateDiff(diff) => self.on_diff(&diff, now_ms),
            ServerMsg::CardHand { cards, next_card } => {
                self.hand.on_card_hand(cards, next_card);
                Vec::new()
            }
            ServerMsg::PlayCardResult { request_id, next_card } => {
                self.hand.on_play_card_result(request_id, next_card);
                Vec::new()
            }
            ServerMsg::Projectile { attacker_id, victim_id } => {
                vec![ClientEvent::Projectile { attacker_id, victim_id }]
            }
            ServerMsg::TimeLeft { seconds } => vec![ClientEvent::TimeLeft { seconds }],
            ServerMsg::GameOver { winner } => vec![ClientEvent::GameOver { winner }],
            ServerMsg::PlayerLeft { user_id, .. } => vec![ClientEvent::PlayerLeft { user_id }],
            ServerMsg::MatchJoined { .. } | ServerMsg::Pong { .. } | ServerMsg::Error { .. } => Vec::new(),
        }
    }

    fn on_diff(&mut self, diff: &StateDiff, now_ms: f64) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        snapshot::apply(&mut self.state, diff);

        // Every known entity gets a sample, changed or not
        let server_time = diff.tick as f64 * TIMESTEP_MS;
        for entity in self.state.entities.values() {
            self.positions
                .entry(entity.id)
                .or_insert_with(new_interpolator)
                .add(server_time, entity.x as f64, entity.y as f64);
            self.hitpoints
                .entry(entity.id)
                .or_insert_with(new_interpolator)
                .add(server_time, entity.hp as f64, 0.0);
        }
        for id in &diff.entities_removed {
            self.positions.remove(id);
            self.hitpoints.remove(id);
        }

        if let Some(phase) = diff.phase {
            events.push(ClientEvent::PhaseChanged(phase));
        }
        self.align_clock(now_ms);

        // Results are consistent with the state only from here on
        events.extend(
            self.hand
                .on_after_diff()
                .into_iter()
                .map(|(request, accepted)| ClientEvent::PlayResolved { request, accepted }),
        );
        events
    }

    fn align_clock(&mut self, now_ms: f64) {
        match self.state.phase {
            MatchPhase::Starting if !self.scheduler.is_enabled() => {
                let ticks_left = self.state.next_state_at.saturating_sub(self.state.tick);
                if ticks_left > TICKS_HALF_S {
                    self.start_sync.add_time_point(now_ms, ticks_left);
                } else if let Some(start_time) = self.start_sync.estimate() {
                    let start_tick = self.state.next_state_at;
                    let zero_time = start_time - start_tick as f64 * TIMESTEP_MS;
                    self.scheduler.start(zero_time, start_time, start_tick as i64 - 1);
                    info!(start_time, samples = self.start_sync.len(), "Clock aligned to match start");
                }
            }
            MatchPhase::Playing if !self.scheduler.is_enabled() => {
                // Missed the countdown, start from where the server is
                self.scheduler.start_now_at_tick(now_ms, self.state.tick as i64);
                debug!(tick = self.state.tick, "Clock started late");
            }
            _ => {}
        }
    }

    /// Per-frame driver. Returns the render time in ms since tick 0 once the
    /// clock runs.
    pub fn frame(&mut self, now_ms: f64) -> Option<f64> {
        if self.scheduler.tick(now_ms).is_some() {
            let mana = self.predicted_mana();
            self.mana.add(self.scheduler.stepped_time(), mana as f64, 0.0);
        }
        self.scheduler
            .is_enabled()
            .then(|| self.scheduler.current_time(now_ms).time)
    }

    /// Authoritative mana minus unanswered plays, plus the regen fraction
    /// accrued since the last regen tick
    pub fn predicted_mana(&self) -> f32 {
        let Some(secret) = self.our_secret() else {
            return 0.0;
        };
        let mut mana = secret.mana as f32 - self.hand.pending_mana() as f32;
        let since_regen = self.scheduler.ticks() - secret.mana_regen_last_tick as i64;
        if since_regen > 0 {
            mana += since_regen as f32 / MANA_REGEN_TICKS as f32;
        }
        mana.clamp(0.0, MANA_MAX as f32)
    }

    /// Interpolated mana for the mana bar
    pub fn mana_at(&mut self, render_time: f64) -> Option<f32> {
        self.mana.at(render_time).map(|s| s.x as f32)
    }

    pub fn entity_position(&mut self, id: u32, render_time: f64) -> Option<Vec2> {
        let s = self.positions.get_mut(&id)?.at(render_time)?;
        Some(Vec2::new(s.x as f32, s.y as f32))
    }

    pub fn entity_hp(&mut self, id: u32, render_time: f64) -> Option<i32> {
        let s = self.hitpoints.get_mut(&id)?.at(render_time)?;
        Some(s.x.round() as i32)
    }

    /// Zones of the opponent's standing buildings
    pub fn enemy_influence_zones(&self) -> Vec<Rect> {
        let Some(me) = self.user_id else {
            return Vec::new();
        };
        let enemy_flipped = !self.is_flipped();
        self.state
            .entities
            .values()
            .filter(|e| e.owner != me && matches!(e.kind, EntityKind::BigTower | EntityKind::SmallTower))
            .filter_map(|e| influence_zone(e.kind, Vec2::new(e.x, e.y), enemy_flipped))
            .collect()
    }

    /// Begin dragging the card in `hand_index`
    pub fn start_drag(&self, hand_index: usize) -> Option<PlacementPreview> {
        if self.state.phase != MatchPhase::Playing {
            return None;
        }
        let card = *self.hand.cards().get(hand_index)?;
        Some(PlacementPreview::new(hand_index, card))
    }

    pub fn drag(&self, preview: &mut PlacementPreview, pointer: Vec2) {
        preview.drag(pointer, self.is_flipped(), &self.enemy_influence_zones());
    }

    pub fn release(&mut self, preview: &mut PlacementPreview) -> ReleaseOutcome {
        let mana = self.predicted_mana();
        preview.release(mana, &mut self.hand)
    }

    /// Connection closed with `code`
    pub fn on_close(&mut self, code: u16) -> DisconnectKind {
        let kind = DisconnectKind::from_close_code(code);
        self.scheduler.stop();
        self.disconnect = Some(kind);
        info!(code, ?kind, "Connection closed");
        kind
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

fn new_interpolator() -> Interpolator {
    Interpolator::new(INTERPOLATION_WINDOW_MS, TIMESTEP_MS, INTERPOLATION_SIZE_COEF)
}
