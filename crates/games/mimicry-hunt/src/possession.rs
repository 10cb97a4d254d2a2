//! Riding a disguised evader as a passenger.
//!
//! All operations are authoritative-only. The host keeps a cached input per
//! passenger; the passenger body is hidden and carried at the host position
//! until it leaves or is ejected.

use glam::{Vec2, Vec3};
use rand::Rng;

use mimicry_core::game_trait::EntityId;

use crate::HuntGame;
use crate::authority::Rejection;
use crate::replication::EffectKind;
use crate::roster::ground_distance;

/// Sum of every cached passenger input. Not averaged.
pub fn combine_inputs<'a>(inputs: impl IntoIterator<Item = &'a Vec2>) -> Vec2 {
    inputs.into_iter().fold(Vec2::ZERO, |acc, v| acc + *v)
}

/// Final drive vector for a host: own input plus passengers, clamped.
pub fn host_drive(own: Vec2, combined: Vec2, max_magnitude: f32) -> Vec2 {
    let drive = own + combined;
    if drive.is_finite() {
        drive.clamp_length_max(max_magnitude.max(0.0))
    } else {
        Vec2::ZERO
    }
}

impl HuntGame {
    /// Board `host` as a passenger.
    pub fn join_host(&mut self, passenger: EntityId, host: EntityId) -> Result<(), Rejection> {
        let rider = self.roster.get(passenger).ok_or(Rejection::StaleReference)?;
        let rider_ev = rider.evader().ok_or(Rejection::InvalidTransition)?;
        if !rider_ev.passengers.is_empty() {
            return Err(Rejection::InvalidPossessionTarget);
        }
        if rider.is_permanently_out
            || rider_ev.host.is_some()
            || rider_ev.is_morphed
            || rider_ev.trap.is_some()
            || rider_ev.is_in_second_chance
        {
            return Err(Rejection::InvalidTransition);
        }
        if passenger == host {
            return Err(Rejection::InvalidPossessionTarget);
        }

        let target = self.roster.get(host).ok_or(Rejection::StaleReference)?;
        if !target.is_disguised() {
            return Err(Rejection::InvalidPossessionTarget);
        }
        let seats = target.evader().map_or(0, |ev| ev.passengers.len());
        if seats >= self.config.max_passengers {
            return Err(Rejection::InvalidPossessionTarget);
        }
        if ground_distance(rider.position, target.position) > self.config.join_range {
            return Err(Rejection::InvalidTransition);
        }
        let host_position = target.position;

        if let Some(ev) = self.roster.get_mut(host).and_then(|e| e.evader_mut()) {
            ev.passengers.insert(passenger, Vec2::ZERO);
        }
        if let Some(rider) = self.roster.get_mut(passenger) {
            rider.is_hidden = true;
            rider.collision_enabled = false;
            rider.intent = Default::default();
            rider.position = host_position;
            if let Some(ev) = rider.evader_mut() {
                ev.host = Some(host);
            }
        }
        self.recompute_combined(host);
        tracing::debug!(passenger, host, "Passenger joined host");
        Ok(())
    }

    /// Voluntarily step off the current host.
    pub fn leave_host(&mut self, passenger: EntityId) -> Result<(), Rejection> {
        let rider = self.roster.get(passenger).ok_or(Rejection::StaleReference)?;
        if rider.host().is_none() {
            return Err(Rejection::InvalidTransition);
        }
        self.leave_host_forced(passenger);
        Ok(())
    }

    /// Remove `passenger` from its host, if it has one, and eject it.
    pub(crate) fn leave_host_forced(&mut self, passenger: EntityId) {
        let Some(host) = self.roster.get(passenger).and_then(|e| e.host()) else {
            return;
        };
        if let Some(ev) = self.roster.get_mut(host).and_then(|e| e.evader_mut()) {
            ev.passengers.remove(&passenger);
        }
        self.recompute_combined(host);
        self.eject(passenger, host);
    }

    /// Eject every passenger of `host`. Returns how many were ejected.
    pub fn kick_all(&mut self, host: EntityId) -> usize {
        let riders: Vec<EntityId> = match self.roster.get_mut(host).and_then(|e| e.evader_mut()) {
            Some(ev) => {
                let riders = ev.passengers.keys().copied().collect();
                ev.passengers.clear();
                ev.combined_passenger_input = Vec2::ZERO;
                riders
            },
            None => return 0,
        };
        for &rider in &riders {
            self.eject(rider, host);
        }
        if !riders.is_empty() {
            tracing::debug!(host, count = riders.len(), "Ejected all passengers");
        }
        riders.len()
    }

    /// Overwrite a passenger's cached input on its host.
    pub fn update_passenger_input(&mut self, passenger: EntityId, vector: Vec2) {
        let Some(host) = self.roster.get(passenger).and_then(|e| e.host()) else {
            return;
        };
        let vector = if vector.is_finite() {
            vector.clamp_length_max(1.0)
        } else {
            Vec2::ZERO
        };
        if let Some(ev) = self.roster.get_mut(host).and_then(|e| e.evader_mut())
            && let Some(slot) = ev.passengers.get_mut(&passenger)
        {
            *slot = vector;
        }
        self.recompute_combined(host);
    }

    /// Aggregated passenger input currently applied to `host`.
    pub fn combined_input(&self, host: EntityId) -> Vec2 {
        self.roster
            .get(host)
            .and_then(|e| e.evader())
            .map_or(Vec2::ZERO, |ev| ev.combined_passenger_input)
    }

    fn recompute_combined(&mut self, host: EntityId) {
        if let Some(ev) = self.roster.get_mut(host).and_then(|e| e.evader_mut()) {
            ev.combined_passenger_input = combine_inputs(ev.passengers.values());
        }
    }

    /// Restore a passenger body beside its former host and notify observers.
    fn eject(&mut self, passenger: EntityId, host: EntityId) {
        let (host_position, host_radius) = match self.roster.get(host) {
            Some(h) => (h.position, h.collider.horizontal_radius()),
            None => match self.roster.get(passenger) {
                Some(p) => (p.position, 0.0),
                None => return,
            },
        };
        let Some(rider) = self.roster.get(passenger) else {
            return;
        };
        let rider_radius = rider.collider.horizontal_radius();
        let collider = rider.collider;

        let angle = self.rng.random_range(0.0..std::f32::consts::TAU);
        let distance = host_radius + rider_radius + self.config.eject_margin;
        let offset = Vec3::new(
            angle.cos() * distance,
            self.config.eject_upward,
            angle.sin() * distance,
        );
        let landed = self
            .physics
            .integrate(host_position + offset, Vec3::ZERO, &collider, 0.0);

        if let Some(rider) = self.roster.get_mut(passenger) {
            rider.position = Vec3::new(landed.x, host_position.y + offset.y, landed.z);
            rider.is_hidden = false;
            rider.collision_enabled = true;
            rider.intent = Default::default();
            if let Some(ev) = rider.evader_mut() {
                ev.host = None;
            }
        }
        self.notify(EffectKind::Ejected {
            entity: passenger,
            host,
            offset,
        });
        tracing::debug!(passenger, host, "Passenger ejected");
    }
}
