use std::collections::{BTreeMap, BTreeSet};

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use mimicry_core::capability::CapabilitySlot;
use mimicry_core::game_trait::{ConnectionId, EntityId};
use mimicry_core::player::Role;
use mimicry_core::time::SimTime;
use mimicry_core::timers::TimerId;

use crate::config::HuntConfig;
use crate::disguise::{FormId, PropId};
use crate::morph::{AnimationDrive, MovementProfile};
use crate::physics::Collider;
use crate::trap::TrapState;

/// Every equippable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// Melee hit on the nearest visible evader.
    Strike,
    /// Arm a trap at the pursuer's feet.
    Snare,
    /// Forced release of a trapped evader plus damage.
    Execute,
    /// Blind nearby pursuers.
    Flash,
    /// Arm a charm that absorbs one lethal hit.
    Charm,
}

impl CapabilityKind {
    pub fn cooldown(self, config: &HuntConfig) -> SimTime {
        match self {
            Self::Strike => config.strike_cooldown,
            Self::Snare => config.snare_cooldown,
            Self::Execute => config.execute_cooldown,
            Self::Flash => config.flash_cooldown,
            Self::Charm => config.charm_cooldown,
        }
    }

    pub fn mana_cost(self, config: &HuntConfig) -> f32 {
        match self {
            Self::Strike | Self::Execute => 0.0,
            Self::Snare => config.snare_mana_cost,
            Self::Flash => config.flash_mana_cost,
            Self::Charm => config.charm_mana_cost,
        }
    }
}

/// A capability and its cooldown gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub slot: CapabilitySlot,
}

fn loadout(kinds: &[CapabilityKind], config: &HuntConfig) -> Vec<Capability> {
    kinds
        .iter()
        .map(|&kind| Capability {
            kind,
            slot: CapabilitySlot::new(kind.cooldown(config)),
        })
        .collect()
}

/// Continuous movement input, last write wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementIntent {
    pub vector: Vec2,
    pub run: bool,
}

impl MovementIntent {
    /// Non-finite components become zero and the length is capped at 1.
    pub fn sanitized(vector: Vec2, run: bool) -> Self {
        let vector = if vector.is_finite() {
            vector.clamp_length_max(1.0)
        } else {
            Vec2::ZERO
        };
        Self { vector, run }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionState {
    #[default]
    Idle,
    Recovering,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaderState {
    pub is_morphed: bool,
    /// `None` while human.
    pub morphed_form: Option<FormId>,
    pub is_in_second_chance: bool,
    /// Entity this evader rides, if a passenger.
    pub host: Option<EntityId>,
    /// Cached input per passenger. Only populated on a host.
    pub passengers: BTreeMap<EntityId, Vec2>,
    /// Sum of `passengers`. Never replicated.
    pub combined_passenger_input: Vec2,
    pub possessed_landmark: Option<PropId>,
    pub has_completed_delivery: bool,
    pub delivered_landmarks: BTreeSet<PropId>,
    pub trap: Option<TrapState>,
    /// New traps are ignored until this time.
    pub trap_grace_until: SimTime,
    pub protection_charges: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PursuerState {
    pub equipped_slot: usize,
    pub execution: ExecutionState,
    /// Knocked down at zero health, waiting to recover.
    pub downed: bool,
}

/// Role-specific payload. The role never changes after spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoleState {
    Evader(EvaderState),
    Pursuer(PursuerState),
}

/// Where an entity sits in its lifecycle, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityPhase {
    Active,
    Trapped,
    Disguised,
    Passenger,
    SecondChance,
    Downed,
    PermanentlyOut,
}

/// Per-round tallies used for scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStats {
    pub hits: u32,
    pub knockdowns: u32,
    pub eliminations: u32,
    pub executions: u32,
    pub escapes: u32,
    pub deliveries: u32,
    pub deaths: u32,
}

/// Result of applying damage to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Invulnerable, out, or already at zero. Nothing changed.
    Blocked,
    /// A protective charge absorbed a lethal hit.
    Intercepted,
    Applied,
    /// Health reached zero on this hit.
    Died,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntity {
    pub id: EntityId,
    pub connection: ConnectionId,
    pub name: String,
    pub role: RoleState,

    pub health: f32,
    pub max_health: f32,
    pub mana: f32,
    pub max_mana: f32,
    /// Current walking speed before buffs.
    pub move_speed: f32,
    pub is_stunned: bool,
    pub is_invulnerable: bool,
    pub is_permanently_out: bool,
    pub is_hidden: bool,
    pub collision_enabled: bool,

    pub position: Vec3,
    pub yaw: f32,
    pub intent: MovementIntent,
    pub collider: Collider,
    pub profile: MovementProfile,
    pub speed_multiplier: f32,
    pub blinded_until: SimTime,

    pub loadout: Vec<Capability>,

    /// Guard tokens for pending timers. A timer whose id no longer matches
    /// does nothing when it fires.
    pub invulnerability_token: Option<TimerId>,
    pub speed_buff_token: Option<TimerId>,
    pub recovery_token: Option<TimerId>,

    pub stats: EntityStats,
}

impl PlayerEntity {
    /// Spawn an entity for a participant with an assigned role.
    pub fn spawn(
        id: EntityId,
        connection: ConnectionId,
        name: String,
        role: Role,
        position: Vec3,
        config: &HuntConfig,
    ) -> Option<Self> {
        let (role, max_health, kinds): (RoleState, f32, &[CapabilityKind]) = match role {
            Role::Unassigned => return None,
            Role::Evader => (
                RoleState::Evader(EvaderState::default()),
                config.evader_max_health,
                &[CapabilityKind::Flash, CapabilityKind::Charm],
            ),
            Role::Pursuer => (
                RoleState::Pursuer(PursuerState::default()),
                config.pursuer_max_health,
                &[
                    CapabilityKind::Strike,
                    CapabilityKind::Snare,
                    CapabilityKind::Execute,
                ],
            ),
        };
        let max_health = max_health.max(1.0);
        Some(Self {
            id,
            connection,
            name,
            role,
            health: max_health,
            max_health,
            mana: config.max_mana,
            max_mana: config.max_mana,
            move_speed: config.human_walk_speed,
            is_stunned: false,
            is_invulnerable: false,
            is_permanently_out: false,
            is_hidden: false,
            collision_enabled: true,
            position,
            yaw: 0.0,
            intent: MovementIntent::default(),
            collider: config.human_collider,
            profile: MovementProfile {
                walk_speed: config.human_walk_speed,
                run_speed: config.human_run_speed,
                drive: AnimationDrive::Humanoid,
            },
            speed_multiplier: 1.0,
            blinded_until: 0.0,
            loadout: loadout(kinds, config),
            invulnerability_token: None,
            speed_buff_token: None,
            recovery_token: None,
            stats: EntityStats::default(),
        })
    }

    pub fn role(&self) -> Role {
        match self.role {
            RoleState::Evader(_) => Role::Evader,
            RoleState::Pursuer(_) => Role::Pursuer,
        }
    }

    pub fn evader(&self) -> Option<&EvaderState> {
        match &self.role {
            RoleState::Evader(ev) => Some(ev),
            RoleState::Pursuer(_) => None,
        }
    }

    pub fn evader_mut(&mut self) -> Option<&mut EvaderState> {
        match &mut self.role {
            RoleState::Evader(ev) => Some(ev),
            RoleState::Pursuer(_) => None,
        }
    }

    pub fn pursuer(&self) -> Option<&PursuerState> {
        match &self.role {
            RoleState::Pursuer(p) => Some(p),
            RoleState::Evader(_) => None,
        }
    }

    pub fn pursuer_mut(&mut self) -> Option<&mut PursuerState> {
        match &mut self.role {
            RoleState::Pursuer(p) => Some(p),
            RoleState::Evader(_) => None,
        }
    }

    /// Morphed into a regular disguise, the only state that can carry
    /// passengers.
    pub fn is_disguised(&self) -> bool {
        !self.is_permanently_out
            && self
                .evader()
                .is_some_and(|ev| ev.is_morphed && !ev.is_in_second_chance && ev.host.is_none())
    }

    pub fn is_trapped(&self) -> bool {
        self.evader().is_some_and(|ev| ev.trap.is_some())
    }

    pub fn host(&self) -> Option<EntityId> {
        self.evader().and_then(|ev| ev.host)
    }

    pub fn is_blinded(&self, now: SimTime) -> bool {
        now < self.blinded_until
    }

    /// Voluntary movement is ignored while this is false. Same conditions
    /// as [`PlayerEntity::can_act`].
    pub fn can_move(&self) -> bool {
        self.can_act()
    }

    /// Capabilities can only be activated while this is true.
    pub fn can_act(&self) -> bool {
        if self.is_permanently_out || self.is_stunned || self.host().is_some() {
            return false;
        }
        match &self.role {
            RoleState::Evader(ev) => ev.trap.is_none(),
            RoleState::Pursuer(p) => !p.downed && p.execution == ExecutionState::Idle,
        }
    }

    pub fn phase(&self) -> EntityPhase {
        if self.is_permanently_out {
            return EntityPhase::PermanentlyOut;
        }
        match &self.role {
            RoleState::Evader(ev) => {
                if ev.trap.is_some() {
                    EntityPhase::Trapped
                } else if ev.host.is_some() {
                    EntityPhase::Passenger
                } else if ev.is_in_second_chance {
                    EntityPhase::SecondChance
                } else if ev.is_morphed {
                    EntityPhase::Disguised
                } else {
                    EntityPhase::Active
                }
            },
            RoleState::Pursuer(p) => {
                if p.downed {
                    EntityPhase::Downed
                } else {
                    EntityPhase::Active
                }
            },
        }
    }

    /// Apply `amount` damage to health.
    ///
    /// A protective charge is checked first and absorbs a hit that would be
    /// lethal, leaving 1 health. Only the health and charge fields change
    /// here; timers and death handling belong to the caller.
    pub fn apply_damage(&mut self, amount: f32) -> DamageOutcome {
        let amount = if amount.is_finite() { amount.max(0.0) } else { 0.0 };
        if self.is_invulnerable || self.is_permanently_out || self.health <= 0.0 {
            return DamageOutcome::Blocked;
        }

        let lethal = self.health - amount <= 0.0;
        if lethal
            && let Some(ev) = self.evader_mut()
            && ev.protection_charges > 0
        {
            ev.protection_charges -= 1;
            self.health = 1.0;
            return DamageOutcome::Intercepted;
        }

        self.health = (self.health - amount).max(0.0);
        if self.health <= 0.0 {
            DamageOutcome::Died
        } else {
            DamageOutcome::Applied
        }
    }
}
