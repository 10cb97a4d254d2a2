//! Damage, death handling, timed effects and capability activation.

use mimicry_core::game_trait::EntityId;
use mimicry_core::player::Role;
use mimicry_core::timers::TimerId;

use crate::HuntGame;
use crate::authority::Rejection;
use crate::entity::{CapabilityKind, DamageOutcome, ExecutionState, RoleState};
use crate::replication::EffectKind;
use crate::trap::TrapRelease;

/// What a pending timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    EndInvulnerability,
    EndSpeedBuff,
    EndExecutionRecovery,
    PursuerRecovered,
}

/// Timer payload. Fires only if the entity still holds the matching token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timed {
    pub entity: EntityId,
    pub kind: TimerKind,
}

impl HuntGame {
    fn schedule(&mut self, entity: EntityId, kind: TimerKind, secs: f32) -> TimerId {
        let fire_at = self.clock.now() + f64::from(secs.max(0.0));
        self.timers.schedule(fire_at, Timed { entity, kind })
    }

    pub(crate) fn grant_invulnerability(&mut self, id: EntityId, secs: f32) {
        let token = self.schedule(id, TimerKind::EndInvulnerability, secs);
        if let Some(entity) = self.roster.get_mut(id) {
            entity.is_invulnerable = true;
            entity.invulnerability_token = Some(token);
        }
    }

    fn grant_speed_buff(&mut self, id: EntityId, multiplier: f32, secs: f32) {
        let token = self.schedule(id, TimerKind::EndSpeedBuff, secs);
        if let Some(entity) = self.roster.get_mut(id) {
            entity.speed_multiplier = multiplier.max(0.0);
            entity.speed_buff_token = Some(token);
        }
    }

    /// Apply damage, running interception or the death handler it triggers.
    pub fn take_damage(
        &mut self,
        target: EntityId,
        amount: f32,
        source: Option<EntityId>,
    ) -> DamageOutcome {
        let Some(entity) = self.roster.get_mut(target) else {
            return DamageOutcome::Blocked;
        };
        let outcome = entity.apply_damage(amount);
        match outcome {
            DamageOutcome::Intercepted => {
                tracing::info!(entity = target, "Protective charm absorbed a lethal hit");
                self.grant_invulnerability(target, self.config.protection_invulnerable_secs);
                self.grant_speed_buff(
                    target,
                    self.config.protection_speed_multiplier,
                    self.config.protection_speed_secs,
                );
            },
            DamageOutcome::Died => self.handle_death(target, source),
            DamageOutcome::Blocked | DamageOutcome::Applied => {},
        }
        outcome
    }

    /// Role-specific death handling. Runs once per transition to zero health.
    fn handle_death(&mut self, id: EntityId, source: Option<EntityId>) {
        let Some(entity) = self.roster.get_mut(id) else {
            return;
        };
        entity.stats.deaths += 1;
        let in_second_chance = match &entity.role {
            RoleState::Evader(ev) => Some(ev.is_in_second_chance),
            RoleState::Pursuer(_) => None,
        };
        match in_second_chance {
            Some(eliminated) => {
                self.release_trap(id, TrapRelease::Incapacitated);
                if eliminated {
                    self.mark_permanently_out(id);
                } else {
                    self.leave_host_forced(id);
                    self.enter_second_chance(id);
                }
                if let Some(killer) = source.and_then(|s| self.roster.get_mut(s)) {
                    if eliminated {
                        killer.stats.eliminations += 1;
                    } else {
                        killer.stats.knockdowns += 1;
                    }
                }
            },
            None => {
                let token =
                    self.schedule(id, TimerKind::PursuerRecovered, self.config.pursuer_recover_secs);
                if let Some(entity) = self.roster.get_mut(id) {
                    entity.is_stunned = true;
                    entity.intent = Default::default();
                    entity.recovery_token = Some(token);
                    if let Some(p) = entity.pursuer_mut() {
                        p.downed = true;
                        p.execution = ExecutionState::Idle;
                    }
                }
                tracing::info!(entity = id, "Pursuer downed");
            },
        }
    }

    /// Fire every timer due at the current time.
    pub(crate) fn fire_due_timers(&mut self) {
        let now = self.clock.now();
        while let Some((timer, timed)) = self.timers.pop_due(now) {
            self.apply_timer(timer, timed);
        }
    }

    fn apply_timer(&mut self, timer: TimerId, timed: Timed) {
        let Some(entity) = self.roster.get_mut(timed.entity) else {
            tracing::debug!(entity = timed.entity, kind = ?timed.kind, "Timer for departed entity");
            return;
        };
        match timed.kind {
            TimerKind::EndInvulnerability => {
                if entity.invulnerability_token == Some(timer) {
                    entity.is_invulnerable = false;
                    entity.invulnerability_token = None;
                }
            },
            TimerKind::EndSpeedBuff => {
                if entity.speed_buff_token == Some(timer) {
                    entity.speed_multiplier = 1.0;
                    entity.speed_buff_token = None;
                }
            },
            TimerKind::EndExecutionRecovery => {
                if entity.recovery_token == Some(timer) {
                    entity.recovery_token = None;
                    if let Some(p) = entity.pursuer_mut() {
                        p.execution = ExecutionState::Idle;
                    }
                }
            },
            TimerKind::PursuerRecovered => {
                if entity.recovery_token == Some(timer) && !entity.is_permanently_out {
                    entity.recovery_token = None;
                    entity.health = entity.max_health;
                    entity.is_stunned = false;
                    if let Some(p) = entity.pursuer_mut() {
                        p.downed = false;
                    }
                    tracing::info!(entity = timed.entity, "Pursuer recovered");
                }
            },
        }
    }

    /// Nearest trapped evader within execution range of `pursuer`.
    fn execution_target(&self, pursuer: EntityId) -> Option<EntityId> {
        let origin = self.roster.get(pursuer)?.position;
        self.roster
            .within_radius(origin, self.config.execute_range, Some(Role::Evader))
            .into_iter()
            .find(|&id| self.roster.get(id).is_some_and(|e| e.is_trapped()))
    }

    /// Nearest visible evader `attacker` can hit right now.
    fn strike_target(&self, attacker: EntityId) -> Option<EntityId> {
        let me = self.roster.get(attacker)?;
        if me.is_blinded(self.clock.now()) {
            return None;
        }
        let origin = me.position;
        self.roster
            .within_radius(origin, self.config.strike_range, Some(Role::Evader))
            .into_iter()
            .find(|&id| {
                self.roster
                    .get(id)
                    .is_some_and(|e| self.physics.line_of_sight(origin, e.position))
            })
    }

    /// Activate the capability in `slot`.
    ///
    /// Every activation passes the slot's cooldown gate and the mana check;
    /// a stale or replayed request fails with [`Rejection::AbilityNotReady`]
    /// and changes nothing.
    pub fn activate_capability(&mut self, id: EntityId, slot: usize) -> Result<(), Rejection> {
        let now = self.clock.now();
        let entity = self.roster.get(id).ok_or(Rejection::StaleReference)?;
        if !entity.can_act() {
            return Err(Rejection::InvalidTransition);
        }
        let cap = entity.loadout.get(slot).ok_or(Rejection::InvalidTransition)?;
        if !cap.slot.can_use(now) {
            return Err(Rejection::AbilityNotReady);
        }
        let kind = cap.kind;
        let cost = kind.mana_cost(&self.config);
        if entity.mana < cost {
            return Err(Rejection::AbilityNotReady);
        }

        let execute_target = match kind {
            CapabilityKind::Execute => {
                Some(self.execution_target(id).ok_or(Rejection::InvalidTransition)?)
            },
            CapabilityKind::Charm => {
                let armed = entity.evader().map_or(0, |ev| ev.protection_charges);
                if armed > 0 {
                    return Err(Rejection::InvalidTransition);
                }
                None
            },
            _ => None,
        };

        if let Some(entity) = self.roster.get_mut(id) {
            entity.mana -= cost;
            if let Some(cap) = entity.loadout.get_mut(slot) {
                cap.slot.mark_used(now);
            }
            if let Some(p) = entity.pursuer_mut() {
                p.equipped_slot = slot;
            }
        }
        tracing::debug!(entity = id, capability = ?kind, "Capability activated");

        match kind {
            CapabilityKind::Strike => self.perform_strike(id),
            CapabilityKind::Snare => self.perform_snare(id),
            CapabilityKind::Execute => {
                if let Some(target) = execute_target {
                    self.perform_execute(id, target);
                }
            },
            CapabilityKind::Flash => self.perform_flash(id),
            CapabilityKind::Charm => {
                if let Some(ev) = self.roster.get_mut(id).and_then(|e| e.evader_mut()) {
                    ev.protection_charges += 1;
                }
            },
        }
        Ok(())
    }

    fn perform_strike(&mut self, id: EntityId) {
        let Some(target) = self.strike_target(id) else {
            return;
        };
        let damage = self.config.strike_damage;
        if self.take_damage(target, damage, Some(id)) != DamageOutcome::Blocked {
            if let Some(me) = self.roster.get_mut(id) {
                me.stats.hits += 1;
            }
            self.notify(EffectKind::HitConfirmed {
                attacker: id,
                target,
                damage,
            });
        }
    }

    fn perform_snare(&mut self, id: EntityId) {
        let Some(position) = self.roster.get(id).map(|e| e.position) else {
            return;
        };
        let snare = self.snares.place(
            id,
            position,
            self.config.snare_radius,
            self.config.max_snares_per_pursuer,
        );
        tracing::debug!(entity = id, snare, "Snare placed");
    }

    /// Forced trap release plus damage, then the recovery window.
    fn perform_execute(&mut self, id: EntityId, target: EntityId) {
        self.release_trap(target, TrapRelease::Executed);
        let damage = self.config.execute_damage;
        if self.take_damage(target, damage, Some(id)) != DamageOutcome::Blocked {
            self.notify(EffectKind::HitConfirmed {
                attacker: id,
                target,
                damage,
            });
        }

        let token = self.schedule(
            id,
            TimerKind::EndExecutionRecovery,
            self.config.execution_recovery_secs,
        );
        if let Some(me) = self.roster.get_mut(id) {
            me.stats.executions += 1;
            me.recovery_token = Some(token);
            me.intent = Default::default();
            if let Some(p) = me.pursuer_mut() {
                p.execution = ExecutionState::Recovering;
            }
        }
        tracing::info!(entity = id, target, "Execution");
    }

    fn perform_flash(&mut self, id: EntityId) {
        let Some(origin) = self.roster.get(id).map(|e| e.position) else {
            return;
        };
        let now = self.clock.now();
        let duration = self.config.flash_blind_secs;
        let targets = self
            .roster
            .within_radius(origin, self.config.flash_radius, Some(Role::Pursuer));
        for target in targets {
            let Some(p) = self.roster.get(target) else {
                continue;
            };
            if !self.physics.line_of_sight(origin, p.position) {
                continue;
            }
            if let Some(p) = self.roster.get_mut(target) {
                p.blinded_until = now + f64::from(duration);
            }
            self.notify(EffectKind::Blind { target, duration });
        }
    }
}
