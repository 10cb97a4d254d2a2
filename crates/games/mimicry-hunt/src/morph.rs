//! Shape-shifting between the human body and disguises.
//!
//! The visible and physical result of a morph is a pure function of
//! `(is_morphed, morphed_form)` plus the static catalog, see [`derive_form`].
//! Observers call the same function, so a late joiner reconstructs the
//! same collider and movement profile without replaying history.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use mimicry_core::game_trait::EntityId;

use crate::authority::Rejection;
use crate::config::HuntConfig;
use crate::disguise::{DisguiseCatalog, FormId, Gait, PropId};
use crate::physics::Collider;
use crate::roster::ground_distance;
use crate::HuntGame;

/// Smallest dimension a fitted collider may have.
const MIN_EXTENT: f32 = 0.05;

/// Which animation family drives the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationDrive {
    Humanoid,
    Animal(Gait),
    /// Rigid prop, no skeletal animation.
    Prop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementProfile {
    pub walk_speed: f32,
    pub run_speed: f32,
    pub drive: AnimationDrive,
}

/// Everything derived from the current form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormView {
    pub collider: Collider,
    pub profile: MovementProfile,
    /// The disguise could not be read and fallbacks were used.
    pub degraded: bool,
}

/// Bounding volume for a disguise's local-frame vertices. `None` when the
/// geometry is missing, empty, or contains non-finite values.
pub fn fit_collider(geometry: Option<&[Vec3]>) -> Option<Collider> {
    let verts = geometry?;
    if verts.is_empty() || verts.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let (mut min_y, mut max_y) = (f32::MAX, f32::MIN);
    let (mut half_x, mut half_z) = (0.0f32, 0.0f32);
    for v in verts {
        min_y = min_y.min(v.y);
        max_y = max_y.max(v.y);
        half_x = half_x.max(v.x.abs());
        half_z = half_z.max(v.z.abs());
    }

    let height = (max_y - min_y).max(MIN_EXTENT);
    let radius = half_x.max(half_z).max(MIN_EXTENT);
    if height > radius * 2.0 {
        Some(Collider::Capsule { radius, height })
    } else {
        Some(Collider::Box {
            half_extents: Vec3::new(
                half_x.max(MIN_EXTENT),
                height / 2.0,
                half_z.max(MIN_EXTENT),
            ),
        })
    }
}

fn human_profile(config: &HuntConfig) -> MovementProfile {
    MovementProfile {
        walk_speed: config.human_walk_speed,
        run_speed: config.human_run_speed,
        drive: AnimationDrive::Humanoid,
    }
}

/// Collider and movement profile for an evader's morph fields.
pub fn derive_form(
    is_morphed: bool,
    morphed_form: Option<FormId>,
    catalog: &DisguiseCatalog,
    config: &HuntConfig,
) -> FormView {
    let form_id = match (is_morphed, morphed_form) {
        (true, Some(id)) => id,
        _ => {
            return FormView {
                collider: config.human_collider,
                profile: human_profile(config),
                degraded: false,
            };
        },
    };

    let Some(form) = catalog.get(form_id) else {
        return FormView {
            collider: config.default_collider,
            profile: MovementProfile {
                drive: AnimationDrive::Prop,
                ..human_profile(config)
            },
            degraded: true,
        };
    };

    let fitted = fit_collider(form.geometry.as_deref());
    let profile = match form.animal {
        Some(animal) => MovementProfile {
            walk_speed: animal.walk_speed,
            run_speed: animal.run_speed,
            drive: AnimationDrive::Animal(animal.gait),
        },
        None => MovementProfile {
            drive: AnimationDrive::Prop,
            ..human_profile(config)
        },
    };

    FormView {
        collider: fitted.unwrap_or(config.default_collider),
        profile,
        degraded: fitted.is_none(),
    }
}

impl HuntGame {
    /// Checks shared by every morph request, before anything is touched.
    fn check_can_morph(&self, id: EntityId) -> Result<(), Rejection> {
        let entity = self.roster.get(id).ok_or(Rejection::StaleReference)?;
        let evader = entity.evader().ok_or(Rejection::InvalidTransition)?;
        if entity.is_permanently_out
            || evader.host.is_some()
            || evader.trap.is_some()
            || evader.is_in_second_chance
        {
            return Err(Rejection::InvalidTransition);
        }
        Ok(())
    }

    fn check_in_reach(&self, id: EntityId, target: Vec3) -> Result<(), Rejection> {
        let entity = self.roster.get(id).ok_or(Rejection::StaleReference)?;
        if ground_distance(entity.position, target) > self.config.interaction_range {
            return Err(Rejection::InvalidTransition);
        }
        Ok(())
    }

    /// Copy the form of a world prop.
    pub fn morph_into_prop(&mut self, id: EntityId, prop: PropId) -> Result<(), Rejection> {
        self.check_can_morph(id)?;
        let record = self.props.get(prop).ok_or(Rejection::StaleReference)?;
        if record.is_large_landmark || record.is_hidden {
            return Err(Rejection::InvalidTransition);
        }
        if self.catalog.get(record.form).is_none() {
            return Err(Rejection::InvalidTransition);
        }
        let (form, position) = (record.form, record.position);
        self.check_in_reach(id, position)?;

        if let Some(evader) = self.roster.get(id).and_then(|e| e.evader())
            && evader.is_morphed
        {
            if evader.morphed_form == Some(form) && evader.possessed_landmark.is_none() {
                return Ok(());
            }
            self.revert_to_human(id)?;
        }

        if let Some(evader) = self.roster.get_mut(id).and_then(|e| e.evader_mut()) {
            evader.is_morphed = true;
            evader.morphed_form = Some(form);
        }
        self.refresh_form(id);
        tracing::debug!(entity = id, form, prop, "Morphed into prop");
        Ok(())
    }

    /// Take control of a drivable landmark.
    pub fn possess_landmark(&mut self, id: EntityId, landmark: PropId) -> Result<(), Rejection> {
        self.check_can_morph(id)?;
        let Some(record) = self.props.get(landmark) else {
            tracing::warn!(entity = id, landmark, "Landmark unavailable");
            return Err(Rejection::StaleReference);
        };
        if !record.is_large_landmark {
            return Err(Rejection::InvalidTransition);
        }
        if record.occupant == Some(id) {
            return Ok(());
        }
        if !record.is_available_landmark() || self.catalog.get(record.form).is_none() {
            return Err(Rejection::InvalidTransition);
        }
        let already_delivered = self
            .roster
            .get(id)
            .and_then(|e| e.evader())
            .is_some_and(|ev| ev.delivered_landmarks.contains(&landmark));
        if already_delivered {
            return Err(Rejection::InvalidTransition);
        }
        let (form, position, yaw) = (record.form, record.position, record.yaw);
        self.check_in_reach(id, position)?;

        if self
            .roster
            .get(id)
            .and_then(|e| e.evader())
            .is_some_and(|ev| ev.is_morphed)
        {
            self.revert_to_human(id)?;
        }

        self.props.claim_landmark(landmark, id);
        if let Some(entity) = self.roster.get_mut(id) {
            entity.position = position;
            entity.yaw = yaw;
            if let Some(evader) = entity.evader_mut() {
                evader.is_morphed = true;
                evader.morphed_form = Some(form);
                evader.possessed_landmark = Some(landmark);
            }
        }
        self.refresh_form(id);
        tracing::info!(entity = id, landmark, "Landmark possessed");
        Ok(())
    }

    /// Return a disguised evader to the human body.
    ///
    /// Passengers are ejected and a driven landmark is dropped where it
    /// stands before the body changes. Reverting a human is a no-op and
    /// returns `Ok(false)`.
    pub fn revert_to_human(&mut self, id: EntityId) -> Result<bool, Rejection> {
        let entity = self.roster.get(id).ok_or(Rejection::StaleReference)?;
        let evader = entity.evader().ok_or(Rejection::InvalidTransition)?;
        if !evader.is_morphed {
            return Ok(false);
        }
        if evader.is_in_second_chance || entity.is_permanently_out {
            return Err(Rejection::InvalidTransition);
        }

        self.kick_all(id);
        self.release_landmark_of(id);
        if let Some(evader) = self.roster.get_mut(id).and_then(|e| e.evader_mut()) {
            evader.is_morphed = false;
            evader.morphed_form = None;
        }
        self.refresh_form(id);
        tracing::debug!(entity = id, "Reverted to human");
        Ok(true)
    }

    /// Drop the landmark `id` is driving at its current position and yaw.
    pub(crate) fn release_landmark_of(&mut self, id: EntityId) {
        let Some(entity) = self.roster.get_mut(id) else {
            return;
        };
        let (position, yaw) = (entity.position, entity.yaw);
        let Some(landmark) = entity.evader_mut().and_then(|ev| ev.possessed_landmark.take()) else {
            return;
        };
        self.props.release_landmark(landmark, position, yaw);
    }

    /// Force the second-chance animal form after a first death.
    pub(crate) fn enter_second_chance(&mut self, id: EntityId) {
        self.kick_all(id);
        self.release_landmark_of(id);
        let form = self.config.second_chance_form;
        let health = self.config.second_chance_health;
        if let Some(entity) = self.roster.get_mut(id) {
            entity.health = health.min(entity.max_health).max(1.0);
            if let Some(evader) = entity.evader_mut() {
                evader.is_morphed = true;
                evader.morphed_form = Some(form);
                evader.is_in_second_chance = true;
            }
        }
        self.refresh_form(id);
        self.grant_invulnerability(id, self.config.second_chance_invulnerable_secs);
        tracing::info!(entity = id, "Entered second chance");
    }

    /// Safe zone reached: back to human, second chance cleared along with
    /// its pending invulnerability.
    pub(crate) fn leave_second_chance(&mut self, id: EntityId) {
        let Some(entity) = self.roster.get_mut(id) else {
            return;
        };
        entity.is_invulnerable = false;
        entity.invulnerability_token = None;
        if let Some(evader) = entity.evader_mut() {
            evader.is_in_second_chance = false;
            evader.is_morphed = false;
            evader.morphed_form = None;
        }
        self.refresh_form(id);
        tracing::info!(entity = id, "Second chance cleared in safe zone");
    }

    /// Terminal state: hidden, no collision, out of every interaction.
    pub(crate) fn mark_permanently_out(&mut self, id: EntityId) {
        self.kick_all(id);
        self.release_landmark_of(id);
        self.leave_host_forced(id);
        if let Some(entity) = self.roster.get_mut(id) {
            entity.is_permanently_out = true;
            entity.is_hidden = true;
            entity.collision_enabled = false;
            entity.is_invulnerable = false;
            entity.is_stunned = false;
            entity.invulnerability_token = None;
            entity.speed_buff_token = None;
            entity.intent = Default::default();
            if let Some(evader) = entity.evader_mut() {
                evader.trap = None;
                evader.is_in_second_chance = false;
                evader.is_morphed = false;
                evader.morphed_form = None;
            }
        }
        self.refresh_form(id);
        tracing::info!(entity = id, "Permanently out");
    }

    /// Re-derive collider and speed from the morph fields.
    pub(crate) fn refresh_form(&mut self, id: EntityId) {
        let Some(entity) = self.roster.get_mut(id) else {
            return;
        };
        let (is_morphed, form) = match entity.evader() {
            Some(ev) => (ev.is_morphed, ev.morphed_form),
            None => (false, None),
        };
        let view = derive_form(is_morphed, form, &self.catalog, &self.config);
        if view.degraded {
            tracing::warn!(
                entity = id,
                form = ?form,
                reason = "unreadable geometry",
                "Disguise resource unavailable, using default collider"
            );
        }
        entity.collider = view.collider;
        entity.profile = view.profile;
        entity.move_speed = view.profile.walk_speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disguise::{AnimalProfile, DisguiseForm};
    use crate::test_support::*;

    fn catalog() -> DisguiseCatalog {
        DisguiseCatalog::new(vec![
            DisguiseForm {
                id: 1,
                name: "pole".into(),
                geometry: Some(vec![Vec3::new(0.2, 0.0, 0.0), Vec3::new(-0.2, 3.0, 0.1)]),
                animal: None,
            },
            DisguiseForm {
                id: 2,
                name: "table".into(),
                geometry: Some(vec![Vec3::new(1.0, 0.0, 0.5), Vec3::new(-1.0, 0.8, -0.5)]),
                animal: None,
            },
            DisguiseForm {
                id: 3,
                name: "ghost".into(),
                geometry: None,
                animal: None,
            },
            DisguiseForm {
                id: 4,
                name: "fox".into(),
                geometry: Some(vec![Vec3::new(0.2, 0.0, 0.4), Vec3::new(-0.2, 0.5, -0.4)]),
                animal: Some(AnimalProfile {
                    walk_speed: 5.0,
                    run_speed: 10.0,
                    gait: Gait::Quadruped,
                }),
            },
        ])
    }

    #[test]
    fn tall_geometry_fits_capsule() {
        let c = fit_collider(Some(&[Vec3::new(0.2, 0.0, 0.0), Vec3::new(-0.2, 3.0, 0.1)]));
        assert_eq!(
            c,
            Some(Collider::Capsule {
                radius: 0.2,
                height: 3.0
            })
        );
    }

    #[test]
    fn wide_geometry_fits_box() {
        let c = fit_collider(Some(&[Vec3::new(1.0, 0.0, 0.5), Vec3::new(-1.0, 0.8, -0.5)]));
        assert_eq!(
            c,
            Some(Collider::Box {
                half_extents: Vec3::new(1.0, 0.4, 0.5)
            })
        );
    }

    #[test]
    fn unreadable_geometry_has_no_fit() {
        assert_eq!(fit_collider(None), None);
        assert_eq!(fit_collider(Some(&[])), None);
        assert_eq!(fit_collider(Some(&[Vec3::new(f32::NAN, 0.0, 0.0)])), None);
    }

    #[test]
    fn derive_form_is_human_when_not_morphed() {
        let config = HuntConfig::default();
        let view = derive_form(false, Some(1), &catalog(), &config);
        assert_eq!(view.collider, config.human_collider);
        assert_eq!(view.profile.drive, AnimationDrive::Humanoid);
        assert!(!view.degraded);
    }

    #[test]
    fn derive_form_degrades_on_unreadable_geometry() {
        let config = HuntConfig::default();
        let view = derive_form(true, Some(3), &catalog(), &config);
        assert_eq!(view.collider, config.default_collider);
        assert!(view.degraded);

        let missing = derive_form(true, Some(99), &catalog(), &config);
        assert!(missing.degraded);
    }

    #[test]
    fn animal_form_uses_its_own_speeds() {
        let config = HuntConfig::default();
        let view = derive_form(true, Some(4), &catalog(), &config);
        assert_eq!(view.profile.walk_speed, 5.0);
        assert_eq!(view.profile.run_speed, 10.0);
        assert_eq!(view.profile.drive, AnimationDrive::Animal(Gait::Quadruped));

        let prop = derive_form(true, Some(2), &catalog(), &config);
        assert_eq!(prop.profile.walk_speed, config.human_walk_speed);
        assert_eq!(prop.profile.drive, AnimationDrive::Prop);
    }

    #[test]
    fn morph_into_prop_changes_collider() {
        let (mut game, ids) = arena_game(1, 0);
        let e = ids[0];
        place_near_prop(&mut game, e, CRATE_PROP);
        game.morph_into_prop(e, CRATE_PROP).unwrap();

        let entity = game.roster.get(e).unwrap();
        let ev = entity.evader().unwrap();
        assert!(ev.is_morphed);
        assert_eq!(ev.morphed_form, Some(CRATE_FORM));
        assert_ne!(entity.collider, game.config.human_collider);
    }

    #[test]
    fn morph_out_of_reach_rejected() {
        let (mut game, ids) = arena_game(1, 0);
        let e = ids[0];
        game.roster.get_mut(e).unwrap().position = Vec3::new(1.0, 0.0, 1.0);
        assert_eq!(
            game.morph_into_prop(e, CRATE_PROP),
            Err(Rejection::InvalidTransition)
        );
        assert!(!game.roster.get(e).unwrap().evader().unwrap().is_morphed);
    }

    #[test]
    fn reach_ignores_prop_elevation() {
        let (mut game, ids) = arena_game(1, 0);
        let e = ids[0];
        game.props.get_mut(CRATE_PROP).unwrap().position.y += 4.0;
        place_near_prop(&mut game, e, CRATE_PROP);
        game.roster.get_mut(e).unwrap().position.y -= 4.0;
        game.morph_into_prop(e, CRATE_PROP).unwrap();
        assert!(game.roster.get(e).unwrap().evader().unwrap().is_morphed);
    }

    #[test]
    fn morph_unknown_prop_is_stale() {
        let (mut game, ids) = arena_game(1, 0);
        assert_eq!(
            game.morph_into_prop(ids[0], 4242),
            Err(Rejection::StaleReference)
        );
    }

    #[test]
    fn pursuer_cannot_morph() {
        let (mut game, ids) = arena_game(0, 1);
        let p = ids[0];
        place_near_prop(&mut game, p, CRATE_PROP);
        assert_eq!(
            game.morph_into_prop(p, CRATE_PROP),
            Err(Rejection::InvalidTransition)
        );
    }

    #[test]
    fn trapped_evader_cannot_morph() {
        let (mut game, ids) = arena_game(1, 0);
        let e = ids[0];
        place_near_prop(&mut game, e, CRATE_PROP);
        game.trap_evader(e, None).unwrap();
        assert_eq!(
            game.morph_into_prop(e, CRATE_PROP),
            Err(Rejection::InvalidTransition)
        );
    }

    #[test]
    fn revert_on_human_is_noop() {
        let (mut game, ids) = arena_game(1, 0);
        let e = ids[0];
        let before = game.roster.get(e).unwrap().clone();
        assert_eq!(game.revert_to_human(e), Ok(false));
        assert_eq!(game.roster.get(e).unwrap(), &before);
        assert!(game.notices.is_empty());
    }

    #[test]
    fn landmark_reappears_where_driver_reverted() {
        let (mut game, ids) = arena_game(1, 0);
        let e = ids[0];
        place_near_prop(&mut game, e, LANDMARK);
        game.possess_landmark(e, LANDMARK).unwrap();
        assert!(game.props.get(LANDMARK).unwrap().is_hidden);

        let moved = Vec3::new(25.0, 0.0, 25.0);
        game.roster.get_mut(e).unwrap().position = moved;
        game.roster.get_mut(e).unwrap().yaw = 1.25;
        assert_eq!(game.revert_to_human(e), Ok(true));

        let lm = game.props.get(LANDMARK).unwrap();
        assert!(!lm.is_hidden);
        assert_eq!(lm.occupant, None);
        assert_eq!(lm.position, moved);
        assert_eq!(lm.yaw, 1.25);
        assert!(game.roster.validate(&game.props).is_ok());
    }

    #[test]
    fn occupied_landmark_rejected() {
        let (mut game, ids) = arena_game(2, 0);
        place_near_prop(&mut game, ids[0], LANDMARK);
        place_near_prop(&mut game, ids[1], LANDMARK);
        game.possess_landmark(ids[0], LANDMARK).unwrap();
        assert_eq!(
            game.possess_landmark(ids[1], LANDMARK),
            Err(Rejection::InvalidTransition)
        );
    }

    #[test]
    fn morphing_into_new_target_reverts_first() {
        let (mut game, ids) = arena_game(2, 0);
        let (host, rider) = (ids[0], ids[1]);
        place_near_prop(&mut game, host, LANDMARK);
        game.possess_landmark(host, LANDMARK).unwrap();
        place_near(&mut game, rider, host);
        game.join_host(rider, host).unwrap();

        // Walk the landmark next to a crate and morph into the crate.
        let crate_pos = game.props.get(CRATE_PROP).unwrap().position;
        game.roster.get_mut(host).unwrap().position = crate_pos + Vec3::new(1.0, 0.0, 0.0);
        game.morph_into_prop(host, CRATE_PROP).unwrap();

        assert!(game.props.get(LANDMARK).unwrap().occupant.is_none());
        assert_eq!(game.roster.get(rider).unwrap().evader().unwrap().host, None);
        let host_ev = game.roster.get(host).unwrap().evader().unwrap();
        assert_eq!(host_ev.morphed_form, Some(CRATE_FORM));
        assert_eq!(host_ev.possessed_landmark, None);
        assert!(game.roster.validate(&game.props).is_ok());
    }

    #[test]
    fn late_joiner_derives_same_form() {
        let (mut game, ids) = arena_game(1, 0);
        let e = ids[0];
        place_near_prop(&mut game, e, CRATE_PROP);
        game.morph_into_prop(e, CRATE_PROP).unwrap();
        let entity = game.roster.get(e).unwrap();
        let ev = entity.evader().unwrap();
        let view = derive_form(ev.is_morphed, ev.morphed_form, &game.catalog, &game.config);
        assert_eq!(view.collider, entity.collider);
        assert_eq!(view.profile, entity.profile);
    }
}
