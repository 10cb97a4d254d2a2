use glam::{Vec2, Vec3};

use mimicry_core::game_trait::ConnectionId;
use mimicry_core::player::Role;

use crate::authority::Request;
use crate::config::HuntConfig;
use crate::disguise::PropRecord;
use crate::entity::ExecutionState;
use crate::replication::{EntitySnapshot, WorldSnapshot};
use crate::roster::ground_distance;

/// Loadout slots, in spawn order.
const STRIKE_SLOT: usize = 0;
const SNARE_SLOT: usize = 1;
const EXECUTE_SLOT: usize = 2;
const FLASH_SLOT: usize = 0;
const CHARM_SLOT: usize = 1;

/// Evader bots stop hiding and run once a pursuer is this close.
const FLEE_DISTANCE: f32 = 5.0;
/// Pursuer bots drop a snare when an evader is this close.
const SNARE_DISTANCE: f32 = 6.0;
/// Evader bots go for a landmark only while pursuers are farther than this.
const LANDMARK_SAFE_DISTANCE: f32 = 12.0;

/// Requests a bot connection would send this tick.
pub fn generate_bot_requests(
    snapshot: &WorldSnapshot,
    bot: ConnectionId,
    config: &HuntConfig,
) -> Vec<Request> {
    let Some(me) = snapshot.entities.iter().find(|e| e.connection == bot) else {
        return Vec::new();
    };
    if me.is_permanently_out || me.host.is_some() {
        return Vec::new();
    }
    match me.role {
        Role::Evader => evader_requests(snapshot, me, config),
        Role::Pursuer => pursuer_requests(snapshot, me, config),
        Role::Unassigned => Vec::new(),
    }
}

fn ready(me: &EntitySnapshot, slot: usize, now: f64) -> bool {
    me.cooldown_ready_at.get(slot).is_some_and(|&t| now >= t)
}

fn walk_toward(me: &EntitySnapshot, target: Vec3, run: bool) -> Request {
    let dir = Vec2::new(target.x - me.position.x, target.z - me.position.z);
    Request::MovementIntent {
        vector: dir.normalize_or_zero(),
        run,
    }
}

fn stop() -> Request {
    Request::MovementIntent {
        vector: Vec2::ZERO,
        run: false,
    }
}

fn nearest<'a>(
    from: Vec3,
    candidates: impl Iterator<Item = &'a EntitySnapshot>,
) -> Option<(&'a EntitySnapshot, f32)> {
    candidates
        .map(|e| (e, ground_distance(from, e.position)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn nearest_pursuer<'a>(
    snapshot: &'a WorldSnapshot,
    me: &EntitySnapshot,
) -> Option<(&'a EntitySnapshot, f32)> {
    nearest(
        me.position,
        snapshot
            .entities
            .iter()
            .filter(|e| e.role == Role::Pursuer && !e.is_permanently_out && !e.downed),
    )
}

fn nearest_prop<'a>(
    snapshot: &'a WorldSnapshot,
    from: Vec3,
    filter: impl Fn(&PropRecord) -> bool,
) -> Option<&'a PropRecord> {
    snapshot
        .props
        .iter()
        .filter(|p| filter(p))
        .min_by(|a, b| {
            ground_distance(from, a.position).total_cmp(&ground_distance(from, b.position))
        })
}

fn evader_requests(
    snapshot: &WorldSnapshot,
    me: &EntitySnapshot,
    config: &HuntConfig,
) -> Vec<Request> {
    if me.is_trapped {
        return vec![Request::Struggle];
    }
    let now = snapshot.time;
    let threat = nearest_pursuer(snapshot, me);

    if me.is_in_second_chance {
        let zone = config.layout.safe_zones.iter().min_by(|a, b| {
            ground_distance(me.position, a.center)
                .total_cmp(&ground_distance(me.position, b.center))
        });
        return match zone {
            Some(zone) => vec![walk_toward(me, zone.center, true)],
            None => vec![stop()],
        };
    }

    let mut requests = Vec::new();
    if let Some((pursuer, dist)) = threat
        && dist <= config.flash_radius
        && ready(me, FLASH_SLOT, now)
        && me.mana >= config.flash_mana_cost
    {
        requests.push(Request::ActivateCapability { slot: FLASH_SLOT });
        if dist <= FLEE_DISTANCE {
            let away = me.position * 2.0 - pursuer.position;
            requests.push(walk_toward(me, away, true));
            return requests;
        }
    }
    if me.protection_charges == 0 && ready(me, CHARM_SLOT, now) && me.mana >= config.charm_mana_cost
    {
        requests.push(Request::ActivateCapability { slot: CHARM_SLOT });
    }

    // Driving a landmark: head for its delivery zone.
    if let Some(landmark) = me
        .possessed_landmark
        .and_then(|id| snapshot.props.iter().find(|p| p.id == id))
    {
        if let Some(zone) = landmark.delivery_zone {
            requests.push(walk_toward(me, zone.center, false));
        }
        return requests;
    }

    let safe = threat.is_none_or(|(_, d)| d > LANDMARK_SAFE_DISTANCE);
    if !me.has_completed_delivery
        && safe
        && let Some(landmark) = nearest_prop(snapshot, me.position, |p| p.is_available_landmark())
    {
        if ground_distance(me.position, landmark.position) <= config.interaction_range * 0.8 {
            requests.push(Request::PossessLandmark {
                landmark: landmark.id,
            });
            requests.push(stop());
        } else {
            if me.is_morphed {
                requests.push(Request::Revert);
            }
            requests.push(walk_toward(me, landmark.position, false));
        }
        return requests;
    }

    if me.is_morphed {
        match threat {
            Some((pursuer, dist)) if dist <= FLEE_DISTANCE => {
                let away = me.position * 2.0 - pursuer.position;
                requests.push(walk_toward(me, away, true));
            },
            _ => requests.push(stop()),
        }
        return requests;
    }

    match nearest_prop(snapshot, me.position, |p| {
        !p.is_large_landmark && !p.is_hidden
    }) {
        Some(prop) if ground_distance(me.position, prop.position) <= config.interaction_range * 0.8 => {
            requests.push(Request::Morph { prop: prop.id });
            requests.push(stop());
        },
        Some(prop) => requests.push(walk_toward(me, prop.position, true)),
        None => requests.push(stop()),
    }
    requests
}

fn pursuer_requests(
    snapshot: &WorldSnapshot,
    me: &EntitySnapshot,
    config: &HuntConfig,
) -> Vec<Request> {
    if me.downed || me.is_stunned || me.execution != ExecutionState::Idle {
        return Vec::new();
    }
    let now = snapshot.time;
    let evaders = snapshot
        .entities
        .iter()
        .filter(|e| e.role == Role::Evader && !e.is_permanently_out && !e.is_hidden);

    let mut requests = Vec::new();
    let trapped = nearest(me.position, evaders.clone().filter(|e| e.is_trapped));
    if let Some((target, dist)) = trapped {
        if dist <= config.execute_range && ready(me, EXECUTE_SLOT, now) {
            requests.push(Request::ActivateCapability { slot: EXECUTE_SLOT });
            return requests;
        }
        requests.push(walk_toward(me, target.position, true));
        return requests;
    }

    // Undisguised evaders are the obvious targets; disguised ones are found
    // by bumping into them.
    let target = nearest(me.position, evaders.clone().filter(|e| !e.is_morphed))
        .or_else(|| nearest(me.position, evaders));
    let Some((target, dist)) = target else {
        return vec![wander(me, snapshot, config)];
    };

    if dist <= config.strike_range && ready(me, STRIKE_SLOT, now) {
        requests.push(Request::ActivateCapability { slot: STRIKE_SLOT });
    } else if dist <= SNARE_DISTANCE
        && ready(me, SNARE_SLOT, now)
        && me.mana >= config.snare_mana_cost
    {
        requests.push(Request::ActivateCapability { slot: SNARE_SLOT });
    }
    requests.push(walk_toward(me, target.position, dist > config.strike_range));
    requests
}

/// Drift between props when nobody is in sight.
fn wander(me: &EntitySnapshot, snapshot: &WorldSnapshot, config: &HuntConfig) -> Request {
    if snapshot.props.is_empty() {
        return stop();
    }
    let pick = (pseudo_random(me.id, snapshot.round_timer) * snapshot.props.len() as f32) as usize;
    let prop = &snapshot.props[pick.min(snapshot.props.len() - 1)];
    if ground_distance(me.position, prop.position) <= config.interaction_range {
        return stop();
    }
    walk_toward(me, prop.position, false)
}

/// Deterministic value in [0, 1) that changes every few seconds.
fn pseudo_random(id: u64, timer: f32) -> f32 {
    let bits = (id as u32).wrapping_mul(2654435761) ^ (timer / 4.0) as u32;
    (bits % 1000) as f32 / 1000.0
}
