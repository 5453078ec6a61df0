//! State tree filtering and per-connection diffs

use std::collections::HashMap;

use uuid::Uuid;

use crate::ws::protocol::{StateDiff, StateTree};

/// Copy of `tree` as one player may see it: every other player's secret is
/// stripped.
pub fn view_for(tree: &StateTree, viewer: Uuid) -> StateTree {
    let mut view = tree.clone();
    for (id, player) in view.players.iter_mut() {
        if *id != viewer {
            player.secret = None;
        }
    }
    view
}

/// Changes turning `prev` into `next`
pub fn diff(prev: &StateTree, next: &StateTree) -> StateDiff {
    let mut out = StateDiff {
        tick: next.tick,
        phase: (prev.phase != next.phase).then_some(next.phase),
        next_state_at: (prev.next_state_at != next.next_state_at).then_some(next.next_state_at),
        round_deadline_tick: (prev.round_deadline_tick != next.round_deadline_tick)
            .then_some(next.round_deadline_tick),
        ..StateDiff::default()
    };

    for (id, player) in &next.players {
        if prev.players.get(id) != Some(player) {
            out.players.insert(*id, player.clone());
        }
    }
    out.players_removed = prev
        .players
        .keys()
        .filter(|id| !next.players.contains_key(id))
        .copied()
        .collect();

    for (id, entity) in &next.entities {
        if prev.entities.get(id) != Some(entity) {
            out.entities.push(entity.clone());
        }
    }
    out.entities_removed = prev
        .entities
        .keys()
        .filter(|id| !next.entities.contains_key(id))
        .copied()
        .collect();

    out
}

/// Apply a diff in place
pub fn apply(tree: &mut StateTree, diff: &StateDiff) {
    tree.tick = diff.tick;
    if let Some(phase) = diff.phase {
        tree.phase = phase;
    }
    if let Some(at) = diff.next_state_at {
        tree.next_state_at = at;
    }
    if let Some(at) = diff.round_deadline_tick {
        tree.round_deadline_tick = at;
    }
    for id in &diff.players_removed {
        tree.players.remove(id);
    }
    for (id, player) in &diff.players {
        tree.players.insert(*id, player.clone());
    }
    for id in &diff.entities_removed {
        tree.entities.remove(id);
    }
    for entity in &diff.entities {
        tree.entities.insert(entity.id, entity.clone());
    }
}

/// Tracks the last view delivered to every connection
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    baselines: HashMap<Uuid, StateTree>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filtered view for `player` and its diff against what they last got.
    ///
    /// Nothing is recorded until [`SnapshotBuilder::commit`], so a diff that
    /// could not be delivered is folded into the next one.
    pub fn prepare(&self, player: Uuid, canonical: &StateTree) -> (StateTree, StateDiff) {
        let view = view_for(canonical, player);
        let empty = StateTree::default();
        let baseline = self.baselines.get(&player).unwrap_or(&empty);
        let diff = diff(baseline, &view);
        (view, diff)
    }

    pub fn commit(&mut self, player: Uuid, view: StateTree) {
        self.baselines.insert(player, view);
    }

    pub fn forget(&mut self, player: Uuid) {
        self.baselines.remove(&player);
    }
}
