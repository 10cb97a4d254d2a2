pub mod authority;
pub mod bot;
pub mod combat;
pub mod config;
pub mod disguise;
pub mod entity;
pub mod morph;
pub mod physics;
pub mod possession;
pub mod replication;
pub mod roster;
pub mod scoring;
pub mod trap;
pub mod world;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use glam::{Vec2, Vec3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use mimicry_core::game_trait::{
    AuthoritativeGame, ConnectionId, EntityId, GameConfig, GameEvent, GameMetadata,
    ParticipantScore,
};
use mimicry_core::player::{Participant, Role, sanitize_display_name};
use mimicry_core::time::{SimClock, SimTime};
use mimicry_core::timers::TimerQueue;

use authority::Request;
use combat::Timed;
use config::HuntConfig;
use disguise::{DisguiseCatalog, PropTable};
use physics::{FlatArena, PhysicsWorld};
use possession::host_drive;
use replication::{DeltaPublisher, EffectKind, EffectNotice, EntitySnapshot, WorldSnapshot};
use roster::Roster;
use trap::{SnareField, TrapRelease};

/// Key in `GameConfig::custom` overriding the round length in seconds.
pub const ROUND_DURATION_KEY: &str = "round_duration_secs";

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// Time ran out with at least one evader still in play.
    EvadersSurvived,
    /// Every landmark reached its delivery zone.
    EvadersDelivered,
    /// Every evader is permanently out.
    PursuersCaughtAll,
}

impl RoundOutcome {
    pub fn winner(self) -> Role {
        match self {
            Self::EvadersSurvived | Self::EvadersDelivered => Role::Evader,
            Self::PursuersCaughtAll => Role::Pursuer,
        }
    }
}

/// Static data observers need to mirror a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSetup {
    pub config: HuntConfig,
    pub round_duration_secs: f32,
}

/// The authoritative disguise-and-pursuit game.
pub struct HuntGame {
    pub(crate) config: HuntConfig,
    pub(crate) catalog: DisguiseCatalog,
    pub(crate) props: PropTable,
    pub(crate) physics: Box<dyn PhysicsWorld>,
    pub(crate) roster: Roster,
    pub(crate) snares: SnareField,
    pub(crate) timers: TimerQueue<Timed>,
    pub(crate) clock: SimClock,
    /// Effects raised since the last publish.
    pub(crate) notices: Vec<EffectNotice>,
    next_effect_id: u64,
    pub(crate) pending_requests: VecDeque<(ConnectionId, Request)>,
    pub(crate) pending_intents: BTreeMap<ConnectionId, Request>,
    publisher: DeltaPublisher,
    pub(crate) rng: StdRng,
    round_duration: f32,
    outcome: Option<RoundOutcome>,
    evaders_spawned: usize,
}

impl HuntGame {
    pub fn new() -> Self {
        Self::with_config(HuntConfig::load())
    }

    pub fn with_config(config: HuntConfig) -> Self {
        let arena = FlatArena::new(
            config.layout.width,
            config.layout.depth,
            config.layout.occluders.clone(),
        );
        Self::with_physics(config, Box::new(arena))
    }

    /// Game on a caller-supplied physics backend. The backend survives
    /// round restarts.
    pub fn with_physics(config: HuntConfig, physics: Box<dyn PhysicsWorld>) -> Self {
        Self {
            catalog: DisguiseCatalog::new(config.layout.forms.clone()),
            props: PropTable::from_placements(&config.layout.props),
            physics,
            roster: Roster::new(),
            snares: SnareField::new(),
            timers: TimerQueue::new(),
            clock: SimClock::new(),
            notices: Vec::new(),
            next_effect_id: 1,
            pending_requests: VecDeque::new(),
            pending_intents: BTreeMap::new(),
            publisher: DeltaPublisher::new(),
            rng: StdRng::seed_from_u64(0),
            round_duration: config.round_duration_secs,
            outcome: None,
            evaders_spawned: 0,
            config,
        }
    }

    pub fn config(&self) -> &HuntConfig {
        &self.config
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn props(&self) -> &PropTable {
        &self.props
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn outcome(&self) -> Option<RoundOutcome> {
        self.outcome
    }

    /// Entity controlled by `connection`, if it has one this round.
    pub fn entity_for(&self, connection: ConnectionId) -> Option<EntityId> {
        self.roster.by_connection(connection)
    }

    /// Static data for `RoundStart`.
    pub fn round_setup(&self) -> RoundSetup {
        RoundSetup {
            config: self.config.clone(),
            round_duration_secs: self.round_duration,
        }
    }

    /// Raise a one-shot effect for the next publish.
    pub(crate) fn notify(&mut self, kind: EffectKind) {
        let id = self.next_effect_id;
        self.next_effect_id += 1;
        self.notices.push(EffectNotice { id, kind });
    }

    pub fn world_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.clock.tick(),
            time: self.clock.now(),
            entities: self.roster.iter().map(EntitySnapshot::capture).collect(),
            props: self.props.iter().cloned().collect(),
            round_timer: (f64::from(self.round_duration) - self.clock.now()).max(0.0) as f32,
            outcome: self.outcome,
        }
    }

    /// Forced removal of an entity: every relationship it holds is undone
    /// first so the roster stays consistent.
    pub fn disconnect_entity(&mut self, id: EntityId) {
        if self.roster.get(id).is_none() {
            return;
        }
        self.release_trap(id, TrapRelease::Incapacitated);
        self.kick_all(id);
        self.leave_host_forced(id);
        self.release_landmark_of(id);
        self.snares.remove_owned_by(id);
        self.timers.retain(|timed| timed.entity != id);
        if let Some(entity) = self.roster.remove(id) {
            self.pending_intents.remove(&entity.connection);
            self.pending_requests
                .retain(|(connection, _)| *connection != entity.connection);
            tracing::info!(entity = id, connection = entity.connection, "Entity removed");
        }
    }

    fn spawn_participant(&mut self, participant: &Participant) -> Option<EntityId> {
        let evader = match participant.role {
            Role::Evader => true,
            Role::Pursuer => false,
            Role::Unassigned => return None,
        };
        let index = self
            .roster
            .iter()
            .filter(|e| e.role() == participant.role)
            .count();
        let position = self.config.layout.spawn_point(evader, index);
        let name = sanitize_display_name(&participant.display_name, self.config.max_name_len)
            .unwrap_or_else(|_| format!("Player{}", participant.connection));
        let id = self.roster.spawn(
            participant.connection,
            name,
            participant.role,
            position,
            &self.config,
        )?;
        if evader {
            self.evaders_spawned += 1;
        }
        tracing::debug!(entity = id, connection = participant.connection, role = ?participant.role, "Spawned");
        Some(id)
    }

    /// Second-chance evaders standing in a safe zone return to human.
    fn check_safe_zones(&mut self) {
        let arrived: Vec<EntityId> = self
            .roster
            .iter()
            .filter(|e| {
                !e.is_permanently_out
                    && e.evader()
                        .is_some_and(|ev| ev.is_in_second_chance && ev.host.is_none())
            })
            .filter(|e| self.config.layout.safe_zones.iter().any(|z| z.contains(e.position)))
            .map(|e| e.id)
            .collect();
        for id in arrived {
            self.leave_second_chance(id);
        }
    }

    /// Landmarks driven into their delivery zone are delivered and dropped.
    fn check_deliveries(&mut self) {
        let mut delivered = Vec::new();
        for entity in self.roster.iter() {
            let Some(landmark) = entity.evader().and_then(|ev| ev.possessed_landmark) else {
                continue;
            };
            let in_zone = self.props.get(landmark).is_some_and(|lm| {
                !lm.delivered && lm.delivery_zone.is_some_and(|z| z.contains(entity.position))
            });
            if in_zone {
                delivered.push((entity.id, landmark));
            }
        }
        for (id, landmark) in delivered {
            if let Some(lm) = self.props.get_mut(landmark) {
                lm.delivered = true;
            }
            if let Some(entity) = self.roster.get_mut(id) {
                entity.stats.deliveries += 1;
                if let Some(ev) = entity.evader_mut() {
                    ev.has_completed_delivery = true;
                    ev.delivered_landmarks.insert(landmark);
                }
            }
            if let Err(rejection) = self.revert_to_human(id) {
                tracing::warn!(entity = id, %rejection, "Delivery revert failed");
            }
            self.notify(EffectKind::Delivered {
                entity: id,
                landmark,
            });
            tracing::info!(entity = id, landmark, "Landmark delivered");
        }
    }

    /// Hosts and free bodies move first; passengers are then carried.
    fn integrate_movement(&mut self, dt: f32) {
        let mut passengers = Vec::new();
        for id in self.roster.ids() {
            let Some(entity) = self.roster.get(id) else {
                continue;
            };
            if entity.is_permanently_out {
                continue;
            }
            if let Some(host) = entity.host() {
                passengers.push((id, host));
                continue;
            }
            let drive = if entity.can_move() {
                let combined = entity
                    .evader()
                    .map_or(Vec2::ZERO, |ev| ev.combined_passenger_input);
                host_drive(entity.intent.vector, combined, self.config.max_combined_input)
            } else {
                Vec2::ZERO
            };
            let base = if entity.intent.run {
                entity.profile.run_speed
            } else {
                entity.move_speed
            };
            let speed = base * entity.speed_multiplier;
            let velocity = Vec3::new(drive.x * speed, 0.0, drive.y * speed);
            let position = self
                .physics
                .integrate(entity.position, velocity, &entity.collider, dt);
            let yaw = if drive.length_squared() > 1e-6 {
                drive.x.atan2(drive.y)
            } else {
                entity.yaw
            };
            if let Some(entity) = self.roster.get_mut(id) {
                entity.position = position;
                entity.yaw = yaw;
            }
        }
        for (id, host) in passengers {
            let Some(host_position) = self.roster.get(host).map(|h| h.position) else {
                continue;
            };
            if let Some(rider) = self.roster.get_mut(id) {
                rider.position = host_position;
            }
        }
    }

    fn regen_mana(&mut self, dt: f32) {
        let gain = self.config.mana_regen_per_sec * dt;
        if gain <= 0.0 {
            return;
        }
        for entity in self.roster.iter_mut() {
            if !entity.is_permanently_out && entity.mana < entity.max_mana {
                entity.mana = (entity.mana + gain).min(entity.max_mana);
            }
        }
    }

    fn check_round_end(&self) -> Option<RoundOutcome> {
        if self.clock.now() >= f64::from(self.round_duration) {
            return Some(RoundOutcome::EvadersSurvived);
        }
        if self.props.all_landmarks_delivered() {
            return Some(RoundOutcome::EvadersDelivered);
        }
        let evaders_left = self
            .roster
            .iter()
            .any(|e| e.role() == Role::Evader && !e.is_permanently_out);
        if self.evaders_spawned > 0 && !evaders_left {
            return Some(RoundOutcome::PursuersCaughtAll);
        }
        None
    }

    /// Diff against the last publish and drain pending effects.
    fn publish(&mut self, events: &mut Vec<GameEvent>) {
        let snapshot = self.world_snapshot();
        if let Some(delta) = self.publisher.publish(&snapshot) {
            match rmp_serde::to_vec(&delta) {
                Ok(bytes) => events.push(GameEvent::StateDelta(bytes)),
                Err(e) => tracing::error!(error = %e, "Failed to encode state delta"),
            }
        }
        for notice in std::mem::take(&mut self.notices) {
            match rmp_serde::to_vec(&notice) {
                Ok(data) => events.push(GameEvent::Effect {
                    effect_id: notice.id,
                    data,
                }),
                Err(e) => tracing::error!(error = %e, "Failed to encode effect"),
            }
        }
    }

    fn round_duration_for(&self, config: &GameConfig) -> f32 {
        if let Some(secs) = config
            .custom
            .get(ROUND_DURATION_KEY)
            .and_then(|v| v.as_f64())
            .filter(|s| s.is_finite() && *s > 0.0)
        {
            return secs as f32;
        }
        if !config.round_duration.is_zero() {
            return config.round_duration.as_secs_f32();
        }
        self.config.round_duration_secs
    }
}

impl Default for HuntGame {
    fn default() -> Self {
        Self::with_config(HuntConfig::default())
    }
}

impl AuthoritativeGame for HuntGame {
    fn metadata(&self) -> GameMetadata {
        GameMetadata {
            name: "Mimicry Hunt".to_string(),
            description: "Hide in plain sight as scenery, share a disguise, and outlast the hunters."
                .to_string(),
            min_participants: 2,
            max_participants: 10,
            estimated_round_duration: Duration::from_secs_f32(
                self.config.round_duration_secs.max(0.0),
            ),
        }
    }

    fn init(&mut self, participants: &[Participant], config: &GameConfig) {
        self.round_duration = self.round_duration_for(config);
        self.rng = StdRng::seed_from_u64(config.seed);
        // Effect ids keep counting across rounds so observers never see a
        // reused id. The physics backend is kept as well.
        self.props = PropTable::from_placements(&self.config.layout.props);
        self.roster = Roster::new();
        self.snares = SnareField::new();
        self.timers.clear();
        self.clock = SimClock::new();
        self.notices.clear();
        self.pending_requests.clear();
        self.pending_intents.clear();
        self.publisher.reset();
        self.outcome = None;
        self.evaders_spawned = 0;
        let round_duration = self.round_duration;

        for participant in participants {
            self.spawn_participant(participant);
        }
        tracing::info!(
            entities = self.roster.len(),
            evaders = self.evaders_spawned,
            round_duration,
            "Round initialised"
        );
    }

    fn update(&mut self, dt: f32) -> Vec<GameEvent> {
        if self.outcome.is_some() {
            return Vec::new();
        }
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        self.drain_requests();
        self.clock.advance(dt);
        self.fire_due_timers();
        self.advance_traps(dt);
        self.trigger_snares();
        self.check_safe_zones();
        self.check_deliveries();
        self.integrate_movement(dt);
        self.regen_mana(dt);

        let mut events = Vec::new();
        if let Some(outcome) = self.check_round_end() {
            self.outcome = Some(outcome);
            tracing::info!(?outcome, time = self.clock.now(), "Round complete");
        }
        self.publish(&mut events);
        if self.outcome.is_some() {
            for score in self.round_results() {
                events.push(GameEvent::ScoreUpdate {
                    connection: score.connection,
                    score: score.score,
                });
            }
            events.push(GameEvent::RoundComplete);
        }
        events
    }

    fn snapshot(&self) -> Vec<u8> {
        rmp_serde::to_vec(&self.world_snapshot()).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode snapshot");
            Vec::new()
        })
    }

    fn setup_data(&self) -> Vec<u8> {
        rmp_serde::to_vec(&self.round_setup()).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode round setup");
            Vec::new()
        })
    }

    fn apply_input(&mut self, connection: ConnectionId, input: &[u8]) {
        match rmp_serde::from_slice::<Request>(input) {
            Ok(request) => self.enqueue(connection, request),
            Err(e) => tracing::debug!(connection, error = %e, "Dropped malformed request"),
        }
    }

    fn participant_joined(&mut self, participant: &Participant) {
        if self.outcome.is_some() || self.roster.by_connection(participant.connection).is_some() {
            return;
        }
        if let Some(id) = self.spawn_participant(participant) {
            tracing::info!(entity = id, connection = participant.connection, "Late joiner spawned");
        }
    }

    fn participant_left(&mut self, connection: ConnectionId) {
        if let Some(id) = self.roster.by_connection(connection) {
            self.disconnect_entity(id);
        }
    }

    fn is_round_complete(&self) -> bool {
        self.outcome.is_some()
    }

    fn round_results(&self) -> Vec<ParticipantScore> {
        let winner = self.outcome.map(RoundOutcome::winner);
        self.roster
            .iter()
            .map(|e| {
                let team_won = winner == Some(e.role());
                let score = match e.role() {
                    Role::Pursuer => scoring::pursuer_score(&e.stats, team_won),
                    _ => scoring::evader_score(&e.stats, e.is_permanently_out, team_won),
                };
                ParticipantScore {
                    connection: e.connection,
                    score,
                }
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use mimicry_core::test_helpers::{
        contract_first_update_publishes_delta, contract_init_creates_snapshot,
        contract_malformed_input_ignored, contract_participant_left_cleanup,
        contract_round_eventually_completes, contract_round_results_complete, default_config,
        make_participants,
    };

    fn test_game() -> HuntGame {
        HuntGame::with_config(HuntConfig {
            layout: test_layout(),
            ..HuntConfig::default()
        })
    }

    // ================================================================
    // Contract tests
    // ================================================================

    #[test]
    fn contract_init() {
        let mut game = test_game();
        contract_init_creates_snapshot(&mut game, 3);
        contract_round_results_complete(&game, 4);
    }

    #[test]
    fn contract_first_delta() {
        let mut game = test_game();
        contract_init_creates_snapshot(&mut game, 2);
        contract_first_update_publishes_delta(&mut game);
    }

    #[test]
    fn contract_malformed_input() {
        let mut game = test_game();
        contract_init_creates_snapshot(&mut game, 2);
        contract_malformed_input_ignored(&mut game, 1);
    }

    #[test]
    fn contract_round_completes() {
        let mut game = test_game();
        contract_init_creates_snapshot(&mut game, 2);
        contract_round_eventually_completes(&mut game, 200);
        assert_eq!(game.outcome(), Some(RoundOutcome::EvadersSurvived));
    }

    #[test]
    fn contract_participant_left() {
        let mut game = test_game();
        contract_init_creates_snapshot(&mut game, 2);
        contract_participant_left_cleanup(&mut game, 1, 3);
    }

    // ================================================================
    // Round lifecycle
    // ================================================================

    #[test]
    fn custom_round_duration_overrides_config() {
        let mut game = test_game();
        let mut config = default_config(300);
        config
            .custom
            .insert(ROUND_DURATION_KEY.to_string(), serde_json::json!(2.0));
        game.init(&make_participants(1, 1), &config);
        advance(&mut game, 2.1);
        assert_eq!(game.outcome(), Some(RoundOutcome::EvadersSurvived));
    }

    #[test]
    fn restart_drops_timers_and_republishes_everything() {
        let (mut game, ids) = arena_game(2, 0);
        game.take_damage(ids[0], 150.0, None);
        assert!(!game.timers.is_empty());
        game.update(0.05);

        game.init(&make_participants(2, 0), &default_config(300));
        assert!(game.timers.is_empty());
        let delta = game
            .update(0.05)
            .into_iter()
            .find_map(|e| match e {
                GameEvent::StateDelta(bytes) => {
                    rmp_serde::from_slice::<replication::StateDelta>(&bytes).ok()
                },
                _ => None,
            })
            .unwrap();
        assert!(delta.is_full());
        assert_eq!(delta.added.len(), 2);
    }

    #[test]
    fn unassigned_participants_are_not_spawned() {
        let mut game = test_game();
        let mut participants = make_participants(1, 1);
        participants[0].role = Role::Unassigned;
        game.init(&participants, &default_config(60));
        assert_eq!(game.roster.len(), 1);
        assert_eq!(game.round_results().len(), 1);
    }

    #[test]
    fn last_evader_out_ends_round_for_pursuers() {
        let (mut game, ids) = arena_game(1, 1);
        let (d, p) = (ids[0], ids[1]);
        game.take_damage(d, 150.0, Some(p));
        game.roster.get_mut(d).unwrap().is_invulnerable = false;
        game.take_damage(d, 150.0, Some(p));
        let events = game.update(0.05);
        assert!(events.contains(&GameEvent::RoundComplete));
        assert_eq!(game.outcome(), Some(RoundOutcome::PursuersCaughtAll));

        let results = game.round_results();
        let pursuer = results.iter().find(|s| s.connection == 2).unwrap();
        assert_eq!(
            pursuer.score,
            scoring::KNOCKDOWN_POINTS + scoring::ELIMINATION_POINTS + scoring::TEAM_WIN_POINTS
        );
        // A finished round ignores further ticks.
        assert!(game.update(0.05).is_empty());
    }

    #[test]
    fn late_joiner_spawns_mid_round() {
        let (mut game, _) = arena_game(1, 1);
        game.update(0.05);
        let newcomer = Participant {
            connection: 50,
            display_name: "Late".into(),
            role: Role::Evader,
            is_bot: false,
        };
        game.participant_joined(&newcomer);
        game.participant_joined(&newcomer);
        assert_eq!(game.roster.len(), 3);
        let events = game.update(0.05);
        let delta: replication::StateDelta = events
            .iter()
            .find_map(|e| match e {
                GameEvent::StateDelta(b) => Some(rmp_serde::from_slice(b).unwrap()),
                _ => None,
            })
            .unwrap();
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].connection, 50);
    }

    #[test]
    fn effects_are_published_once_with_ids() {
        let (mut game, ids) = arena_game(1, 0);
        game.trap_evader(ids[0], None).unwrap();
        let events = game.update(0.05);
        let effects: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                GameEvent::Effect { effect_id, data } => {
                    let notice: EffectNotice = rmp_serde::from_slice(data).unwrap();
                    assert_eq!(notice.id, *effect_id);
                    Some(notice)
                },
                _ => None,
            })
            .collect();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0].kind, EffectKind::Trapped { .. }));
        assert!(
            !game
                .update(0.05)
                .iter()
                .any(|e| matches!(e, GameEvent::Effect { .. }))
        );
    }

    #[test]
    fn mana_regenerates_to_cap() {
        let (mut game, ids) = arena_game(0, 1);
        game.roster.get_mut(ids[0]).unwrap().mana = 10.0;
        advance(&mut game, 1.0);
        let mana = game.roster.get(ids[0]).unwrap().mana;
        assert!(mana > 10.0 && mana < 20.0);
        advance(&mut game, 60.0);
        assert_eq!(game.roster.get(ids[0]).unwrap().mana, game.config.max_mana);
    }

    #[test]
    fn safe_zone_clears_second_chance() {
        let (mut game, ids) = arena_game(2, 0);
        let d = ids[0];
        game.take_damage(d, 150.0, None);
        assert!(game.roster.get(d).unwrap().evader().unwrap().is_in_second_chance);
        let zone = game.config.layout.safe_zones[0].center;
        game.roster.get_mut(d).unwrap().position = zone;
        game.update(0.05);
        let e = game.roster.get(d).unwrap();
        assert!(!e.evader().unwrap().is_in_second_chance);
        assert!(!e.evader().unwrap().is_morphed);
        assert!(!e.is_invulnerable);
        assert_eq!(e.collider, game.config.human_collider);
    }

    #[test]
    fn driving_landmark_into_zone_delivers_it() {
        let (mut game, ids) = arena_game(2, 0);
        let (driver, rider) = (ids[0], ids[1]);
        place_near_prop(&mut game, driver, LANDMARK);
        game.possess_landmark(driver, LANDMARK).unwrap();
        place_near(&mut game, rider, driver);
        game.join_host(rider, driver).unwrap();

        let zone = game.props.get(LANDMARK).unwrap().delivery_zone.unwrap();
        game.roster.get_mut(driver).unwrap().position = zone.center;
        let events = game.update(0.05);

        let lm = game.props.get(LANDMARK).unwrap();
        assert!(lm.delivered);
        assert!(lm.occupant.is_none());
        assert!(zone.contains(lm.position));
        let e = game.roster.get(driver).unwrap();
        assert!(e.evader().unwrap().has_completed_delivery);
        assert!(!e.evader().unwrap().is_morphed);
        assert_eq!(game.roster.get(rider).unwrap().host(), None);
        assert_eq!(game.outcome(), Some(RoundOutcome::EvadersDelivered));
        assert!(events.contains(&GameEvent::RoundComplete));
    }

    #[test]
    fn delivered_landmark_cannot_be_taken_again() {
        let (mut game, ids) = arena_game(2, 0);
        place_near_prop(&mut game, ids[0], LANDMARK);
        game.possess_landmark(ids[0], LANDMARK).unwrap();
        game.props.get_mut(LANDMARK).unwrap().delivered = true;
        game.revert_to_human(ids[0]).unwrap();
        place_near_prop(&mut game, ids[1], LANDMARK);
        assert_eq!(
            game.possess_landmark(ids[1], LANDMARK),
            Err(authority::Rejection::InvalidTransition)
        );
    }

    #[test]
    fn host_carries_passenger_and_clamps_input() {
        let (mut game, ids) = arena_game(3, 0);
        let host = ids[0];
        disguise(&mut game, host);
        for &r in &ids[1..] {
            place_near(&mut game, r, host);
            game.join_host(r, host).unwrap();
            game.update_passenger_input(r, Vec2::new(1.0, 0.0));
        }
        let start = game.roster.get(host).unwrap().position;
        game.update(1.0);
        let end = game.roster.get(host).unwrap().position;
        let speed = game.roster.get(host).unwrap().move_speed;
        let moved = end.x - start.x;
        assert!((moved - speed * game.config.max_combined_input).abs() < 1e-3);
        for &r in &ids[1..] {
            assert_eq!(game.roster.get(r).unwrap().position, end);
        }
    }

    // ================================================================
    // Scenarios
    // ================================================================

    #[test]
    fn scenario_trap_struggle_to_freedom() {
        let (mut game, ids) = arena_game(1, 0);
        let d = ids[0];
        game.config.required_escape_count = 5;
        game.config.max_trapped_secs = 6.0;
        game.trap_evader(d, None).unwrap();
        for _ in 0..4 {
            advance(&mut game, 0.5);
            game.struggle(d).unwrap();
            assert!(game.roster.get(d).unwrap().is_trapped());
        }
        game.struggle(d).unwrap();
        let e = game.roster.get(d).unwrap();
        assert!(!e.is_trapped());
        assert!(!e.is_stunned);
        assert_eq!(e.stats.escapes, 1);
    }

    #[test]
    fn scenario_landmark_host_death_ejects_passengers() {
        let (mut game, ids) = arena_game(3, 0);
        let host = ids[0];
        place_near_prop(&mut game, host, LANDMARK);
        game.possess_landmark(host, LANDMARK).unwrap();
        for &r in &ids[1..] {
            place_near(&mut game, r, host);
            game.join_host(r, host).unwrap();
        }
        let death_spot = Vec3::new(33.0, 0.0, 22.0);
        game.roster.get_mut(host).unwrap().position = death_spot;

        game.take_damage(host, 500.0, None);

        for &r in &ids[1..] {
            let rider = game.roster.get(r).unwrap();
            assert_eq!(rider.host(), None);
            assert!(!rider.is_hidden);
            assert!(rider.collision_enabled);
        }
        let lm = game.props.get(LANDMARK).unwrap();
        assert_eq!(lm.occupant, None);
        assert_eq!(lm.position, death_spot);
        let e = game.roster.get(host).unwrap();
        assert!(e.evader().unwrap().is_in_second_chance);
        assert!(e.evader().unwrap().passengers.is_empty());
        assert!(game.roster.validate(&game.props).is_ok());
        let ejections = game
            .notices
            .iter()
            .filter(|n| matches!(n.kind, EffectKind::Ejected { .. }))
            .count();
        assert_eq!(ejections, 2);
    }

    #[test]
    fn scenario_overkill_on_full_health_evader() {
        let (mut game, ids) = arena_game(1, 0);
        let d = ids[0];
        assert_eq!(game.roster.get(d).unwrap().health, 100.0);
        game.take_damage(d, 150.0, None);
        let e = game.roster.get(d).unwrap();
        assert_eq!(e.stats.deaths, 1);
        assert!(e.evader().unwrap().is_in_second_chance);
        assert_eq!(e.evader().unwrap().morphed_form, Some(game.config.second_chance_form));
        assert_eq!(e.health, game.config.second_chance_health);
        assert!(!e.is_permanently_out);
    }

    #[test]
    fn disconnecting_driver_leaves_valid_roster() {
        let (mut game, ids) = arena_game(3, 0);
        let host = ids[0];
        place_near_prop(&mut game, host, LANDMARK);
        game.possess_landmark(host, LANDMARK).unwrap();
        place_near(&mut game, ids[1], host);
        game.join_host(ids[1], host).unwrap();

        let conn = game.roster.get(host).unwrap().connection;
        game.participant_left(conn);

        assert!(game.roster.get(host).is_none());
        assert_eq!(game.roster.get(ids[1]).unwrap().host(), None);
        assert!(game.props.get(LANDMARK).unwrap().is_available_landmark());
        assert!(game.roster.validate(&game.props).is_ok());
    }

    #[test]
    fn disconnecting_passenger_updates_host() {
        let (mut game, ids) = arena_game(2, 0);
        disguise(&mut game, ids[0]);
        place_near(&mut game, ids[1], ids[0]);
        game.join_host(ids[1], ids[0]).unwrap();
        game.update_passenger_input(ids[1], Vec2::X);
        game.disconnect_entity(ids[1]);
        let host = game.roster.get(ids[0]).unwrap().evader().unwrap();
        assert!(host.passengers.is_empty());
        assert_eq!(host.combined_passenger_input, Vec2::ZERO);
        assert!(game.roster.validate(&game.props).is_ok());
    }
}
