use std::collections::BTreeMap;

use glam::Vec3;
use smallvec::SmallVec;

use mimicry_core::game_trait::{ConnectionId, EntityId};
use mimicry_core::player::Role;

use crate::config::HuntConfig;
use crate::disguise::PropTable;
use crate::entity::PlayerEntity;

/// Result buffer for area and teammate scans.
pub type EntityList = SmallVec<[EntityId; 8]>;

/// Broken cross-reference found by [`Roster::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterViolation {
    DanglingHost { passenger: EntityId, host: EntityId },
    HostNotDisguised { passenger: EntityId, host: EntityId },
    PassengerNotListed { passenger: EntityId, host: EntityId },
    PassengerMismatch { host: EntityId, passenger: EntityId },
    NestedPassenger { passenger: EntityId },
    LandmarkOccupantMismatch { landmark: u32 },
    DoubleDriver { landmark: u32 },
}

impl std::fmt::Display for RosterViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingHost { passenger, host } => {
                write!(f, "passenger {passenger} rides missing host {host}")
            },
            Self::HostNotDisguised { passenger, host } => {
                write!(f, "passenger {passenger} rides undisguised host {host}")
            },
            Self::PassengerNotListed { passenger, host } => {
                write!(f, "host {host} does not list passenger {passenger}")
            },
            Self::PassengerMismatch { host, passenger } => {
                write!(f, "host {host} lists {passenger}, which rides elsewhere")
            },
            Self::NestedPassenger { passenger } => {
                write!(f, "passenger {passenger} carries passengers")
            },
            Self::LandmarkOccupantMismatch { landmark } => {
                write!(f, "landmark {landmark} occupant disagrees with its driver")
            },
            Self::DoubleDriver { landmark } => write!(f, "landmark {landmark} has two drivers"),
        }
    }
}

impl std::error::Error for RosterViolation {}

/// The round's active entities. Mutated only at spawn, disconnect and
/// permanent-out; everything else reads it.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entities: BTreeMap<EntityId, PlayerEntity>,
    by_connection: BTreeMap<ConnectionId, EntityId>,
    next_id: EntityId,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            by_connection: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Spawn an entity for `connection`. `None` if the role is unassigned or
    /// the connection already has one.
    pub fn spawn(
        &mut self,
        connection: ConnectionId,
        name: String,
        role: Role,
        position: Vec3,
        config: &HuntConfig,
    ) -> Option<EntityId> {
        if self.by_connection.contains_key(&connection) {
            return None;
        }
        let id = self.next_id.max(1);
        let entity = PlayerEntity::spawn(id, connection, name, role, position, config)?;
        self.next_id = id + 1;
        self.entities.insert(id, entity);
        self.by_connection.insert(connection, id);
        Some(id)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<PlayerEntity> {
        let entity = self.entities.remove(&id)?;
        self.by_connection.remove(&entity.connection);
        Some(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&PlayerEntity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut PlayerEntity> {
        self.entities.get_mut(&id)
    }

    pub fn by_connection(&self, connection: ConnectionId) -> Option<EntityId> {
        self.by_connection.get(&connection).copied()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerEntity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities of `role` (any role if `None`) whose ground distance to
    /// `center` is at most `radius`, nearest first. Out and hidden entities
    /// are skipped.
    pub fn within_radius(&self, center: Vec3, radius: f32, role: Option<Role>) -> EntityList {
        let mut hits: SmallVec<[(f32, EntityId); 8]> = self
            .entities
            .values()
            .filter(|e| !e.is_permanently_out && !e.is_hidden)
            .filter(|e| role.is_none_or(|r| e.role() == r))
            .filter_map(|e| {
                let d = ground_distance(center, e.position);
                (d <= radius).then_some((d, e.id))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// Check every host/passenger and landmark cross-reference.
    pub fn validate(&self, props: &PropTable) -> Result<(), RosterViolation> {
        for entity in self.entities.values() {
            let Some(ev) = entity.evader() else {
                continue;
            };
            if let Some(host_id) = ev.host {
                if !ev.passengers.is_empty() {
                    return Err(RosterViolation::NestedPassenger {
                        passenger: entity.id,
                    });
                }
                let Some(host) = self.entities.get(&host_id) else {
                    return Err(RosterViolation::DanglingHost {
                        passenger: entity.id,
                        host: host_id,
                    });
                };
                if !host.is_disguised() {
                    return Err(RosterViolation::HostNotDisguised {
                        passenger: entity.id,
                        host: host_id,
                    });
                }
                if !host
                    .evader()
                    .is_some_and(|h| h.passengers.contains_key(&entity.id))
                {
                    return Err(RosterViolation::PassengerNotListed {
                        passenger: entity.id,
                        host: host_id,
                    });
                }
            }
            for &passenger in ev.passengers.keys() {
                let rides_here = self
                    .entities
                    .get(&passenger)
                    .is_some_and(|p| p.host() == Some(entity.id));
                if !rides_here {
                    return Err(RosterViolation::PassengerMismatch {
                        host: entity.id,
                        passenger,
                    });
                }
            }
            if let Some(landmark) = ev.possessed_landmark
                && props.get(landmark).map(|l| l.occupant) != Some(Some(entity.id))
            {
                return Err(RosterViolation::LandmarkOccupantMismatch { landmark });
            }
        }

        for landmark in props.landmarks() {
            let drivers = self
                .entities
                .values()
                .filter(|e| {
                    e.evader()
                        .is_some_and(|ev| ev.possessed_landmark == Some(landmark.id))
                })
                .count();
            if drivers > 1 {
                return Err(RosterViolation::DoubleDriver {
                    landmark: landmark.id,
                });
            }
            if let Some(occupant) = landmark.occupant {
                let drives = self.entities.get(&occupant).is_some_and(|e| {
                    e.evader()
                        .is_some_and(|ev| ev.possessed_landmark == Some(landmark.id))
                });
                if !drives {
                    return Err(RosterViolation::LandmarkOccupantMismatch {
                        landmark: landmark.id,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Distance on the ground plane.
pub fn ground_distance(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    (dx * dx + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> (Roster, HuntConfig) {
        let config = HuntConfig::default();
        let mut roster = Roster::new();
        roster.spawn(1, "a".into(), Role::Evader, Vec3::new(0.0, 0.0, 0.0), &config);
        roster.spawn(2, "b".into(), Role::Evader, Vec3::new(3.0, 0.0, 0.0), &config);
        roster.spawn(3, "c".into(), Role::Pursuer, Vec3::new(1.0, 0.0, 0.0), &config);
        (roster, config)
    }

    #[test]
    fn spawn_assigns_sequential_ids() {
        let (roster, _) = roster();
        assert_eq!(roster.by_connection(1), Some(1));
        assert_eq!(roster.by_connection(3), Some(3));
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn duplicate_connection_not_spawned() {
        let (mut roster, config) = roster();
        assert!(roster.spawn(1, "dup".into(), Role::Evader, Vec3::ZERO, &config).is_none());
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn ids_are_not_reused_after_remove() {
        let (mut roster, config) = roster();
        roster.remove(3);
        assert_eq!(roster.by_connection(3), None);
        let id = roster.spawn(9, "d".into(), Role::Pursuer, Vec3::ZERO, &config);
        assert_eq!(id, Some(4));
    }

    #[test]
    fn within_radius_sorted_and_filtered() {
        let (mut roster, _) = roster();
        let all = roster.within_radius(Vec3::ZERO, 5.0, None);
        assert_eq!(all.as_slice(), &[1, 3, 2]);
        let evaders = roster.within_radius(Vec3::ZERO, 5.0, Some(Role::Evader));
        assert_eq!(evaders.as_slice(), &[1, 2]);

        roster.get_mut(1).unwrap().is_hidden = true;
        let visible = roster.within_radius(Vec3::ZERO, 2.0, None);
        assert_eq!(visible.as_slice(), &[3]);
    }

    #[test]
    fn validate_catches_dangling_host() {
        let (mut roster, _) = roster();
        let props = PropTable::default();
        assert!(roster.validate(&props).is_ok());
        roster.get_mut(2).unwrap().evader_mut().unwrap().host = Some(42);
        assert_eq!(
            roster.validate(&props),
            Err(RosterViolation::DanglingHost {
                passenger: 2,
                host: 42
            })
        );
    }

    #[test]
    fn validate_catches_undisguised_host() {
        let (mut roster, _) = roster();
        let props = PropTable::default();
        roster.get_mut(2).unwrap().evader_mut().unwrap().host = Some(1);
        roster
            .get_mut(1)
            .unwrap()
            .evader_mut()
            .unwrap()
            .passengers
            .insert(2, glam::Vec2::ZERO);
        assert!(matches!(
            roster.validate(&props),
            Err(RosterViolation::HostNotDisguised { .. })
        ));
    }
}
