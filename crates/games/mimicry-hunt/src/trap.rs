//! Immobilization with escape-by-repetition and a timeout fallback.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use mimicry_core::game_trait::EntityId;

use crate::HuntGame;
use crate::authority::Rejection;
use crate::replication::EffectKind;

/// Identifier of a placed snare.
pub type SnareId = u64;

/// Tolerance for comparing accumulated tick time against the timeout.
const TRAP_EPSILON: f32 = 1e-4;

/// Attached to an evader while it is trapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapState {
    pub escape_progress: u32,
    pub required_escape_count: u32,
    pub elapsed_trapped_time: f32,
    pub max_trapped_time: f32,
    /// Snare that caught the evader, if any.
    pub snare: Option<SnareId>,
}

impl TrapState {
    pub fn new(required_escape_count: u32, max_trapped_time: f32, snare: Option<SnareId>) -> Self {
        Self {
            escape_progress: 0,
            required_escape_count: required_escape_count.max(1),
            elapsed_trapped_time: 0.0,
            max_trapped_time: if max_trapped_time.is_finite() {
                max_trapped_time.max(0.0)
            } else {
                0.0
            },
            snare,
        }
    }

    /// Register one struggle. Returns true once the count is reached.
    pub fn struggle(&mut self) -> bool {
        self.escape_progress = self.escape_progress.saturating_add(1);
        self.escape_progress >= self.required_escape_count
    }

    /// Accumulate trapped time. Returns true once the timeout is reached.
    pub fn advance(&mut self, dt: f32) -> bool {
        if dt.is_finite() && dt > 0.0 {
            self.elapsed_trapped_time += dt;
        }
        self.is_timed_out()
    }

    pub fn is_timed_out(&self) -> bool {
        self.elapsed_trapped_time + TRAP_EPSILON >= self.max_trapped_time
    }
}

/// How a trap ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrapRelease {
    Escaped,
    TimedOut,
    /// Forced release by a pursuer's execution. No grace window follows.
    Executed,
    /// The trapped evader died or left the round.
    Incapacitated,
}

impl TrapRelease {
    pub fn grants_grace(self) -> bool {
        matches!(self, Self::Escaped | Self::TimedOut)
    }
}

/// Pursuer-placed trap waiting for an evader to step in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snare {
    pub id: SnareId,
    pub owner: EntityId,
    pub position: Vec3,
    pub radius: f32,
}

impl Snare {
    fn triggers_at(&self, p: Vec3) -> bool {
        let dx = p.x - self.position.x;
        let dz = p.z - self.position.z;
        dx * dx + dz * dz <= self.radius * self.radius
    }
}

/// Every armed snare in the world, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SnareField {
    snares: Vec<Snare>,
    next_id: SnareId,
}

impl SnareField {
    pub fn new() -> Self {
        Self {
            snares: Vec::new(),
            next_id: 1,
        }
    }

    /// Arm a snare, dropping the owner's oldest once `max_per_owner` is hit.
    pub fn place(
        &mut self,
        owner: EntityId,
        position: Vec3,
        radius: f32,
        max_per_owner: usize,
    ) -> SnareId {
        let owned = self.snares.iter().filter(|s| s.owner == owner).count();
        if max_per_owner > 0
            && owned >= max_per_owner
            && let Some(idx) = self.snares.iter().position(|s| s.owner == owner)
        {
            self.snares.remove(idx);
        }
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.snares.push(Snare {
            id,
            owner,
            position,
            radius: radius.max(0.0),
        });
        id
    }

    /// First snare covering `position`, left armed.
    pub fn triggered_at(&self, position: Vec3) -> Option<SnareId> {
        self.snares
            .iter()
            .find(|s| s.triggers_at(position))
            .map(|s| s.id)
    }

    pub fn remove(&mut self, id: SnareId) -> Option<Snare> {
        let idx = self.snares.iter().position(|s| s.id == id)?;
        Some(self.snares.remove(idx))
    }

    pub fn remove_owned_by(&mut self, owner: EntityId) {
        self.snares.retain(|s| s.owner != owner);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snare> {
        self.snares.iter()
    }

    pub fn len(&self) -> usize {
        self.snares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snares.is_empty()
    }
}

impl HuntGame {
    /// Whether `id` could be caught by a trap right now.
    pub fn can_be_trapped(&self, id: EntityId) -> bool {
        let now = self.clock.now();
        self.roster.get(id).is_some_and(|e| {
            !e.is_permanently_out
                && e.evader().is_some_and(|ev| {
                    ev.host.is_none() && ev.trap.is_none() && now >= ev.trap_grace_until
                })
        })
    }

    /// Put an evader into the trapped state.
    pub fn trap_evader(&mut self, id: EntityId, snare: Option<SnareId>) -> Result<(), Rejection> {
        let entity = self.roster.get(id).ok_or(Rejection::StaleReference)?;
        if entity.evader().is_none() || !self.can_be_trapped(id) {
            return Err(Rejection::InvalidTransition);
        }
        let trap = TrapState::new(
            self.config.required_escape_count,
            self.config.max_trapped_secs,
            snare,
        );
        if let Some(entity) = self.roster.get_mut(id) {
            entity.is_stunned = true;
            entity.intent = Default::default();
            if let Some(ev) = entity.evader_mut() {
                ev.trap = Some(trap);
            }
        }
        self.notify(EffectKind::Trapped { entity: id });
        tracing::debug!(entity = id, ?snare, "Evader trapped");
        Ok(())
    }

    /// One struggle against the trap. A no-op while free.
    pub fn struggle(&mut self, id: EntityId) -> Result<(), Rejection> {
        let entity = self.roster.get_mut(id).ok_or(Rejection::StaleReference)?;
        let Some(trap) = entity.evader_mut().and_then(|ev| ev.trap.as_mut()) else {
            return Ok(());
        };
        if trap.struggle() {
            self.release_trap(id, TrapRelease::Escaped);
        }
        Ok(())
    }

    /// End a trap. Returns false if `id` was not trapped.
    pub(crate) fn release_trap(&mut self, id: EntityId, reason: TrapRelease) -> bool {
        let grace_until = self.clock.now() + f64::from(self.config.trap_grace_secs.max(0.0));
        let Some(entity) = self.roster.get_mut(id) else {
            return false;
        };
        let Some(ev) = entity.evader_mut() else {
            return false;
        };
        if ev.trap.take().is_none() {
            return false;
        }
        if reason.grants_grace() {
            ev.trap_grace_until = grace_until;
        }
        entity.is_stunned = false;
        if reason == TrapRelease::Escaped {
            entity.stats.escapes += 1;
        }
        self.notify(EffectKind::TrapReleased { entity: id, reason });
        tracing::debug!(entity = id, ?reason, "Trap released");
        true
    }

    /// Accumulate trapped time and free everyone whose timeout is reached.
    pub(crate) fn advance_traps(&mut self, dt: f32) {
        let mut timed_out = Vec::new();
        for entity in self.roster.iter_mut() {
            if let Some(trap) = entity.evader_mut().and_then(|ev| ev.trap.as_mut())
                && trap.advance(dt)
            {
                timed_out.push(entity.id);
            }
        }
        for id in timed_out {
            self.release_trap(id, TrapRelease::TimedOut);
        }
    }

    /// Trap evaders standing on an armed snare. Each snare fires once.
    pub(crate) fn trigger_snares(&mut self) {
        if self.snares.is_empty() {
            return;
        }
        for id in self.roster.ids() {
            if !self.can_be_trapped(id) {
                continue;
            }
            let Some(position) = self.roster.get(id).map(|e| e.position) else {
                continue;
            };
            let Some(snare) = self.snares.triggered_at(position) else {
                continue;
            };
            match self.trap_evader(id, Some(snare)) {
                Ok(()) => {
                    self.snares.remove(snare);
                },
                Err(rejection) => {
                    tracing::debug!(entity = id, snare, %rejection, "Snare did not fire");
                },
            }
        }
    }
}
