//! Inbound requests and their validation against authoritative state.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use mimicry_core::game_trait::{ConnectionId, EntityId};
use mimicry_core::player::sanitize_display_name;

use crate::HuntGame;
use crate::disguise::PropId;
use crate::entity::{EntityPhase, MovementIntent, PlayerEntity};

/// Requests beyond this many per tick are dropped.
pub const MAX_PENDING_REQUESTS: usize = 256;

/// Everything an observer may ask of the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Continuous input; only the latest per connection is kept each tick.
    MovementIntent { vector: Vec2, run: bool },
    Morph { prop: PropId },
    Revert,
    JoinHost { target: EntityId },
    LeaveHost,
    PossessLandmark { landmark: PropId },
    Struggle,
    ActivateCapability { slot: usize },
    UpdateName { name: String },
}

impl Request {
    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MovementIntent { .. } => "movement_intent",
            Self::Morph { .. } => "morph",
            Self::Revert => "revert",
            Self::JoinHost { .. } => "join_host",
            Self::LeaveHost => "leave_host",
            Self::PossessLandmark { .. } => "possess_landmark",
            Self::Struggle => "struggle",
            Self::ActivateCapability { .. } => "activate_capability",
            Self::UpdateName { .. } => "update_name",
        }
    }
}

/// Why a request was refused. Never sent to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The entity's current state does not allow the request.
    InvalidTransition,
    InvalidPossessionTarget,
    /// Cooldown not elapsed or not enough mana.
    AbilityNotReady,
    /// The request names an entity or prop that no longer exists. Handled
    /// exactly like `InvalidTransition`.
    StaleReference,
    InvalidName,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition => write!(f, "invalid transition"),
            Self::InvalidPossessionTarget => write!(f, "invalid possession target"),
            Self::AbilityNotReady => write!(f, "ability not ready"),
            Self::StaleReference => write!(f, "stale reference"),
            Self::InvalidName => write!(f, "invalid display name"),
        }
    }
}

impl std::error::Error for Rejection {}

impl HuntGame {
    /// Validate and apply one request from `connection`.
    pub fn handle_request(
        &mut self,
        connection: ConnectionId,
        request: Request,
    ) -> Result<(), Rejection> {
        let id = self
            .roster
            .by_connection(connection)
            .ok_or(Rejection::StaleReference)?;
        match request {
            Request::MovementIntent { vector, run } => self.set_intent(id, vector, run),
            Request::Morph { prop } => self.morph_into_prop(id, prop),
            Request::Revert => self.revert_to_human(id).map(|_| ()),
            Request::JoinHost { target } => self.join_host(id, target),
            Request::LeaveHost => self.leave_host(id),
            Request::PossessLandmark { landmark } => self.possess_landmark(id, landmark),
            Request::Struggle => self.struggle(id),
            Request::ActivateCapability { slot } => self.activate_capability(id, slot),
            Request::UpdateName { name } => self.rename(id, &name),
        }
    }

    /// A passenger's intent is routed to its host's input cache.
    fn set_intent(&mut self, id: EntityId, vector: Vec2, run: bool) -> Result<(), Rejection> {
        let entity = self.roster.get(id).ok_or(Rejection::StaleReference)?;
        if entity.host().is_some() {
            self.update_passenger_input(id, vector);
            return Ok(());
        }
        if !entity.can_move() {
            return Err(Rejection::InvalidTransition);
        }
        if let Some(entity) = self.roster.get_mut(id) {
            entity.intent = MovementIntent::sanitized(vector, run);
        }
        Ok(())
    }

    fn rename(&mut self, id: EntityId, raw: &str) -> Result<(), Rejection> {
        let name = sanitize_display_name(raw, self.config.max_name_len)
            .map_err(|_| Rejection::InvalidName)?;
        let entity = self.roster.get_mut(id).ok_or(Rejection::StaleReference)?;
        tracing::debug!(entity = id, name = %name, "Display name updated");
        entity.name = name;
        Ok(())
    }

    /// Lifecycle phase of the entity `connection` controls, for diagnostics.
    pub fn phase_of(&self, connection: ConnectionId) -> Option<EntityPhase> {
        self.roster
            .by_connection(connection)
            .and_then(|id| self.roster.get(id))
            .map(PlayerEntity::phase)
    }

    /// Queue a decoded request for the next tick. Movement intents replace
    /// any earlier intent from the same connection.
    pub(crate) fn enqueue(&mut self, connection: ConnectionId, request: Request) {
        if let Request::MovementIntent { .. } = request {
            self.pending_intents.insert(connection, request);
            return;
        }
        if self.pending_requests.len() >= MAX_PENDING_REQUESTS {
            tracing::debug!(connection, request = request.kind(), "Request queue full, dropped");
            return;
        }
        self.pending_requests.push_back((connection, request));
    }

    /// Apply every queued request in arrival order, then the latest
    /// movement intents.
    pub(crate) fn drain_requests(&mut self) {
        let queued: Vec<_> = self.pending_requests.drain(..).collect();
        let intents = std::mem::take(&mut self.pending_intents);
        for (connection, request) in queued.into_iter().chain(intents) {
            let kind = request.kind();
            if let Err(rejection) = self.handle_request(connection, request) {
                let phase = self.phase_of(connection);
                tracing::debug!(connection, request = kind, ?phase, %rejection, "Request rejected");
            }
        }
    }
}
