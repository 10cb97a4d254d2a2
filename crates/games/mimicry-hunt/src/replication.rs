//! What observers see: full snapshots, per-field deltas, one-shot effects,
//! and the observer-side mirror that turns them into visuals.

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use mimicry_core::game_trait::{ConnectionId, EntityId};
use mimicry_core::player::Role;
use mimicry_core::time::SimTime;

use crate::RoundOutcome;
use crate::config::HuntConfig;
use crate::disguise::{DisguiseCatalog, FormId, PropId, PropRecord};
use crate::entity::{ExecutionState, PlayerEntity, RoleState};
use crate::morph::{MovementProfile, derive_form};
use crate::physics::Collider;
use crate::trap::TrapRelease;

/// Effect ids remembered by a mirror for deduplication.
const SEEN_EFFECT_WINDOW: usize = 1024;

/// Replicated view of one entity. Role payloads are flattened; fields that
/// do not apply to the role keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub connection: ConnectionId,
    pub name: String,
    pub role: Role,
    pub health: f32,
    pub max_health: f32,
    pub mana: f32,
    pub max_mana: f32,
    pub move_speed: f32,
    pub is_stunned: bool,
    pub is_invulnerable: bool,
    pub is_permanently_out: bool,
    pub is_hidden: bool,
    pub collision_enabled: bool,
    pub position: Vec3,
    pub yaw: f32,
    pub is_morphed: bool,
    pub morphed_form: Option<FormId>,
    pub is_in_second_chance: bool,
    pub host: Option<EntityId>,
    pub passengers: Vec<EntityId>,
    pub possessed_landmark: Option<PropId>,
    pub has_completed_delivery: bool,
    pub is_trapped: bool,
    pub escape_progress: u32,
    pub execution: ExecutionState,
    pub downed: bool,
    pub equipped_slot: usize,
    /// Authoritative time at which each loadout slot is ready again.
    pub cooldown_ready_at: Vec<SimTime>,
    pub protection_charges: u32,
}

impl EntitySnapshot {
    pub fn capture(entity: &PlayerEntity) -> Self {
        let mut snap = Self {
            id: entity.id,
            connection: entity.connection,
            name: entity.name.clone(),
            role: entity.role(),
            health: entity.health,
            max_health: entity.max_health,
            mana: entity.mana,
            max_mana: entity.max_mana,
            move_speed: entity.move_speed,
            is_stunned: entity.is_stunned,
            is_invulnerable: entity.is_invulnerable,
            is_permanently_out: entity.is_permanently_out,
            is_hidden: entity.is_hidden,
            collision_enabled: entity.collision_enabled,
            position: entity.position,
            yaw: entity.yaw,
            is_morphed: false,
            morphed_form: None,
            is_in_second_chance: false,
            host: None,
            passengers: Vec::new(),
            possessed_landmark: None,
            has_completed_delivery: false,
            is_trapped: false,
            escape_progress: 0,
            execution: ExecutionState::Idle,
            downed: false,
            equipped_slot: 0,
            cooldown_ready_at: entity
                .loadout
                .iter()
                .map(|c| c.slot.next_ready_time)
                .collect(),
            protection_charges: 0,
        };
        match &entity.role {
            RoleState::Evader(ev) => {
                snap.is_morphed = ev.is_morphed;
                snap.morphed_form = ev.morphed_form;
                snap.is_in_second_chance = ev.is_in_second_chance;
                snap.host = ev.host;
                snap.passengers = ev.passengers.keys().copied().collect();
                snap.possessed_landmark = ev.possessed_landmark;
                snap.has_completed_delivery = ev.has_completed_delivery;
                snap.is_trapped = ev.trap.is_some();
                snap.escape_progress = ev.trap.as_ref().map_or(0, |t| t.escape_progress);
                snap.protection_charges = ev.protection_charges;
            },
            RoleState::Pursuer(p) => {
                snap.execution = p.execution;
                snap.downed = p.downed;
                snap.equipped_slot = p.equipped_slot;
            },
        }
        snap
    }
}

/// Declares the replicated fields once and generates the field id enum,
/// the change enum and the diff function from the same list.
macro_rules! replicated_fields {
    ($($variant:ident => $field:ident: $ty:ty),* $(,)?) => {
        /// Identifies one replicated field.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum FieldId {
            $($variant),*
        }

        /// New value of one replicated field.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum FieldChange {
            $($variant($ty)),*
        }

        impl FieldChange {
            pub fn field(&self) -> FieldId {
                match self {
                    $(Self::$variant(_) => FieldId::$variant),*
                }
            }

            /// Write the new value into a mirrored snapshot.
            pub fn apply(&self, snapshot: &mut EntitySnapshot) {
                match self {
                    $(Self::$variant(value) => snapshot.$field = value.clone()),*
                }
            }
        }

        /// Changes that turn `old` into `new`, in declaration order.
        pub fn diff_entity(old: &EntitySnapshot, new: &EntitySnapshot) -> Vec<FieldChange> {
            let mut changes = Vec::new();
            $(
                if old.$field != new.$field {
                    changes.push(FieldChange::$variant(new.$field.clone()));
                }
            )*
            changes
        }
    };
}

replicated_fields! {
    Name => name: String,
    Health => health: f32,
    MaxHealth => max_health: f32,
    Mana => mana: f32,
    MaxMana => max_mana: f32,
    MoveSpeed => move_speed: f32,
    IsStunned => is_stunned: bool,
    IsInvulnerable => is_invulnerable: bool,
    IsPermanentlyOut => is_permanently_out: bool,
    IsHidden => is_hidden: bool,
    CollisionEnabled => collision_enabled: bool,
    Position => position: Vec3,
    Yaw => yaw: f32,
    IsMorphed => is_morphed: bool,
    MorphedForm => morphed_form: Option<FormId>,
    IsInSecondChance => is_in_second_chance: bool,
    Host => host: Option<EntityId>,
    Passengers => passengers: Vec<EntityId>,
    PossessedLandmark => possessed_landmark: Option<PropId>,
    HasCompletedDelivery => has_completed_delivery: bool,
    IsTrapped => is_trapped: bool,
    EscapeProgress => escape_progress: u32,
    Execution => execution: ExecutionState,
    Downed => downed: bool,
    EquippedSlot => equipped_slot: usize,
    CooldownReadyAt => cooldown_ready_at: Vec<SimTime>,
    ProtectionCharges => protection_charges: u32,
}

/// Changed fields of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub id: EntityId,
    pub changes: Vec<FieldChange>,
}

/// Everything that changed since the previous published tick. Changed props
/// are sent whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub tick: u32,
    /// Tick of the delta this one builds on. `None` marks a full delta that
    /// replaces whatever the observer held.
    pub base_tick: Option<u32>,
    pub added: Vec<EntitySnapshot>,
    pub entities: Vec<EntityDelta>,
    pub props: Vec<PropRecord>,
    pub removed: Vec<EntityId>,
}

impl StateDelta {
    pub fn is_full(&self) -> bool {
        self.base_tick.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.entities.is_empty()
            && self.props.is_empty()
            && self.removed.is_empty()
    }
}

/// Full world state for round starts and late joiners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u32,
    pub time: SimTime,
    pub entities: Vec<EntitySnapshot>,
    pub props: Vec<PropRecord>,
    /// Seconds left in the round.
    pub round_timer: f32,
    pub outcome: Option<RoundOutcome>,
}

/// Remembers the last published state and emits only what changed.
#[derive(Debug, Default)]
pub struct DeltaPublisher {
    last: Option<Published>,
}

#[derive(Debug)]
struct Published {
    tick: u32,
    entities: BTreeMap<EntityId, EntitySnapshot>,
    props: BTreeMap<PropId, PropRecord>,
}

impl DeltaPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous state; the next publish sends everything.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Delta against the previously published state. The first call after a
    /// reset always returns a delta; later calls return `None` when nothing
    /// changed.
    pub fn publish(&mut self, snapshot: &WorldSnapshot) -> Option<StateDelta> {
        let entities: BTreeMap<EntityId, EntitySnapshot> = snapshot
            .entities
            .iter()
            .map(|e| (e.id, e.clone()))
            .collect();
        let props: BTreeMap<PropId, PropRecord> =
            snapshot.props.iter().map(|p| (p.id, p.clone())).collect();

        let mut delta = StateDelta {
            tick: snapshot.tick,
            base_tick: self.last.as_ref().map(|last| last.tick),
            ..StateDelta::default()
        };
        let first = self.last.is_none();
        match &self.last {
            None => {
                delta.added = entities.values().cloned().collect();
                delta.props = props.values().cloned().collect();
            },
            Some(last) => {
                for (id, now) in &entities {
                    match last.entities.get(id) {
                        None => delta.added.push(now.clone()),
                        Some(before) => {
                            let changes = diff_entity(before, now);
                            if !changes.is_empty() {
                                delta.entities.push(EntityDelta { id: *id, changes });
                            }
                        },
                    }
                }
                delta.removed = last
                    .entities
                    .keys()
                    .filter(|id| !entities.contains_key(id))
                    .copied()
                    .collect();
                delta.props = props
                    .values()
                    .filter(|p| last.props.get(&p.id) != Some(*p))
                    .cloned()
                    .collect();
            },
        }

        if !first && delta.is_empty() {
            return None;
        }
        self.last = Some(Published {
            tick: snapshot.tick,
            entities,
            props,
        });
        Some(delta)
    }
}

/// One-shot event. Observers drop ids they have already seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectNotice {
    pub id: u64,
    pub kind: EffectKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EffectKind {
    Blind {
        target: EntityId,
        duration: f32,
    },
    /// A passenger was pushed out of its host at `offset` from the host.
    Ejected {
        entity: EntityId,
        host: EntityId,
        offset: Vec3,
    },
    HitConfirmed {
        attacker: EntityId,
        target: EntityId,
        damage: f32,
    },
    Trapped {
        entity: EntityId,
    },
    TrapReleased {
        entity: EntityId,
        reason: TrapRelease,
    },
    Delivered {
        entity: EntityId,
        landmark: PropId,
    },
}

/// Coarse status marker shown above an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMarker {
    None,
    Trapped { progress: u32 },
    Stunned,
    Out,
}

/// Presentation state an observer derives from a mirrored snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityVisual {
    pub label: String,
    pub visible: bool,
    pub position: Vec3,
    pub yaw: f32,
    pub collider: Collider,
    pub profile: MovementProfile,
    pub degraded: bool,
    pub health_fraction: f32,
    pub status: StatusMarker,
}

impl EntityVisual {
    fn blank(config: &HuntConfig) -> Self {
        let view = derive_form(false, None, &DisguiseCatalog::default(), config);
        Self {
            label: String::new(),
            visible: false,
            position: Vec3::ZERO,
            yaw: 0.0,
            collider: view.collider,
            profile: view.profile,
            degraded: false,
            health_fraction: 0.0,
            status: StatusMarker::None,
        }
    }

    /// Run every visual update against `snap`.
    fn build(snap: &EntitySnapshot, catalog: &DisguiseCatalog, config: &HuntConfig) -> Self {
        let mut visual = Self::blank(config);
        for update in ALL_UPDATES {
            update(snap, catalog, config, &mut visual);
        }
        visual
    }
}

/// Pure function refreshing part of a visual from its snapshot.
type VisualUpdate = fn(&EntitySnapshot, &DisguiseCatalog, &HuntConfig, &mut EntityVisual);

fn update_label(snap: &EntitySnapshot, _: &DisguiseCatalog, _: &HuntConfig, v: &mut EntityVisual) {
    v.label.clone_from(&snap.name);
}

fn update_visibility(
    snap: &EntitySnapshot,
    _: &DisguiseCatalog,
    _: &HuntConfig,
    v: &mut EntityVisual,
) {
    v.visible = !snap.is_hidden && !snap.is_permanently_out && snap.host.is_none();
}

fn update_transform(
    snap: &EntitySnapshot,
    _: &DisguiseCatalog,
    _: &HuntConfig,
    v: &mut EntityVisual,
) {
    v.position = snap.position;
    v.yaw = snap.yaw;
}

fn update_form(
    snap: &EntitySnapshot,
    catalog: &DisguiseCatalog,
    config: &HuntConfig,
    v: &mut EntityVisual,
) {
    let view = derive_form(snap.is_morphed, snap.morphed_form, catalog, config);
    v.collider = view.collider;
    v.profile = view.profile;
    v.degraded = view.degraded;
}

fn update_health(snap: &EntitySnapshot, _: &DisguiseCatalog, _: &HuntConfig, v: &mut EntityVisual) {
    v.health_fraction = if snap.max_health > 0.0 {
        (snap.health / snap.max_health).clamp(0.0, 1.0)
    } else {
        0.0
    };
}

fn update_status(snap: &EntitySnapshot, _: &DisguiseCatalog, _: &HuntConfig, v: &mut EntityVisual) {
    v.status = if snap.is_permanently_out {
        StatusMarker::Out
    } else if snap.is_trapped {
        StatusMarker::Trapped {
            progress: snap.escape_progress,
        }
    } else if snap.is_stunned {
        StatusMarker::Stunned
    } else {
        StatusMarker::None
    };
}

const ALL_UPDATES: &[VisualUpdate] = &[
    update_label,
    update_visibility,
    update_transform,
    update_form,
    update_health,
    update_status,
];
const LABEL: &[VisualUpdate] = &[update_label];
const VISIBILITY: &[VisualUpdate] = &[update_visibility];
const VISIBILITY_AND_STATUS: &[VisualUpdate] = &[update_visibility, update_status];
const TRANSFORM: &[VisualUpdate] = &[update_transform];
const FORM: &[VisualUpdate] = &[update_form];
const HEALTH: &[VisualUpdate] = &[update_health];
const STATUS: &[VisualUpdate] = &[update_status];

/// Dispatch table from a changed field to the visual updates it drives.
fn handlers(field: FieldId) -> &'static [VisualUpdate] {
    match field {
        FieldId::Name => LABEL,
        FieldId::IsHidden | FieldId::Host => VISIBILITY,
        FieldId::IsPermanentlyOut => VISIBILITY_AND_STATUS,
        FieldId::Position | FieldId::Yaw => TRANSFORM,
        FieldId::IsMorphed | FieldId::MorphedForm => FORM,
        FieldId::Health | FieldId::MaxHealth => HEALTH,
        FieldId::IsStunned | FieldId::IsTrapped | FieldId::EscapeProgress => STATUS,
        FieldId::Mana
        | FieldId::MaxMana
        | FieldId::MoveSpeed
        | FieldId::IsInvulnerable
        | FieldId::CollisionEnabled
        | FieldId::IsInSecondChance
        | FieldId::Passengers
        | FieldId::PossessedLandmark
        | FieldId::HasCompletedDelivery
        | FieldId::Execution
        | FieldId::Downed
        | FieldId::EquippedSlot
        | FieldId::CooldownReadyAt
        | FieldId::ProtectionCharges => &[],
    }
}

/// What a mirror did with an incoming delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied,
    /// Older than or equal to what the mirror already holds.
    Stale,
    /// Built on a delta this mirror never saw. Nothing was applied and the
    /// mirror waits for a full snapshot.
    Gap,
}

/// Observer-side copy of the replicated world.
#[derive(Debug, Clone)]
pub struct ObserverMirror {
    config: HuntConfig,
    catalog: DisguiseCatalog,
    tick: u32,
    needs_resync: bool,
    entities: BTreeMap<EntityId, EntitySnapshot>,
    visuals: BTreeMap<EntityId, EntityVisual>,
    props: BTreeMap<PropId, PropRecord>,
    seen_effects: BTreeSet<u64>,
}

impl ObserverMirror {
    /// Empty mirror for a round described by `config`.
    pub fn new(config: HuntConfig) -> Self {
        let catalog = DisguiseCatalog::new(config.layout.forms.clone());
        Self {
            config,
            catalog,
            tick: 0,
            needs_resync: false,
            entities: BTreeMap::new(),
            visuals: BTreeMap::new(),
            props: BTreeMap::new(),
            seen_effects: BTreeSet::new(),
        }
    }

    /// Mirror for a late joiner, built from a full snapshot without any
    /// history.
    pub fn from_snapshot(config: HuntConfig, snapshot: &WorldSnapshot) -> Self {
        let mut mirror = Self::new(config);
        mirror.apply_snapshot(snapshot);
        mirror
    }

    /// Replace the mirrored world with `snapshot`. Clears a pending resync;
    /// effect history is kept.
    pub fn apply_snapshot(&mut self, snapshot: &WorldSnapshot) {
        self.clear();
        self.tick = snapshot.tick;
        self.needs_resync = false;
        for snap in &snapshot.entities {
            self.insert(snap.clone());
        }
        self.props = snapshot.props.iter().map(|p| (p.id, p.clone())).collect();
    }

    fn clear(&mut self) {
        self.entities.clear();
        self.visuals.clear();
        self.props.clear();
    }

    /// True after a gap until a snapshot or full delta arrives.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    fn insert(&mut self, snap: EntitySnapshot) {
        let visual = EntityVisual::build(&snap, &self.catalog, &self.config);
        self.visuals.insert(snap.id, visual);
        self.entities.insert(snap.id, snap);
    }

    /// Apply `delta` if it continues the state this mirror holds.
    ///
    /// Quiet ticks publish nothing, so a delta may build on a tick older than
    /// the mirror's. A base newer than the mirror means a delta went missing.
    pub fn apply_delta(&mut self, delta: &StateDelta) -> DeltaOutcome {
        match delta.base_tick {
            None => {
                self.clear();
                self.needs_resync = false;
            },
            Some(_) if self.needs_resync => return DeltaOutcome::Gap,
            Some(_) if delta.tick <= self.tick => return DeltaOutcome::Stale,
            Some(base) if base > self.tick => {
                tracing::debug!(
                    tick = delta.tick,
                    base,
                    have = self.tick,
                    "Missed a delta, waiting for a snapshot"
                );
                self.needs_resync = true;
                return DeltaOutcome::Gap;
            },
            Some(_) => {},
        }
        self.tick = delta.tick;
        for snap in &delta.added {
            self.insert(snap.clone());
        }
        for entity_delta in &delta.entities {
            let Some(snap) = self.entities.get_mut(&entity_delta.id) else {
                tracing::debug!(entity = entity_delta.id, "Delta for unknown entity");
                continue;
            };
            let mut fields = BTreeSet::new();
            for change in &entity_delta.changes {
                change.apply(snap);
                fields.insert(change.field());
            }
            let Some(visual) = self.visuals.get_mut(&entity_delta.id) else {
                continue;
            };
            // Updates rewrite their part of the visual from scratch, so a
            // handler reached through two fields may run twice.
            for field in fields {
                for update in handlers(field) {
                    update(snap, &self.catalog, &self.config, visual);
                }
            }
        }
        for prop in &delta.props {
            self.props.insert(prop.id, prop.clone());
        }
        for id in &delta.removed {
            self.entities.remove(id);
            self.visuals.remove(id);
        }
        DeltaOutcome::Applied
    }

    /// Record an effect. Returns false for a duplicate.
    pub fn apply_effect(&mut self, notice: &EffectNotice) -> bool {
        if !self.seen_effects.insert(notice.id) {
            return false;
        }
        while self.seen_effects.len() > SEEN_EFFECT_WINDOW {
            self.seen_effects.pop_first();
        }
        true
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.get(&id)
    }

    pub fn visual(&self, id: EntityId) -> Option<&EntityVisual> {
        self.visuals.get(&id)
    }

    pub fn visuals(&self) -> &BTreeMap<EntityId, EntityVisual> {
        &self.visuals
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, EntitySnapshot> {
        &self.entities
    }

    pub fn prop(&self, id: PropId) -> Option<&PropRecord> {
        self.props.get(&id)
    }
}
