use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use mimicry_core::game_trait::EntityId;

/// Identifier of a disguise form in the static catalog.
pub type FormId = u32;

/// Identifier of a world prop or landmark.
pub type PropId = u32;

/// Locomotion style of an animal-like disguise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gait {
    Quadruped,
    Hopper,
    Flyer,
}

/// Movement profile declared by animal-like disguises.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimalProfile {
    pub walk_speed: f32,
    pub run_speed: f32,
    pub gait: Gait,
}

/// Static description of something an evader can become.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisguiseForm {
    pub id: FormId,
    pub name: String,
    /// Local-frame vertices. `None` means the geometry could not be read.
    #[serde(default)]
    pub geometry: Option<Vec<Vec3>>,
    #[serde(default)]
    pub animal: Option<AnimalProfile>,
}

/// Lookup table of every disguise form available this round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisguiseCatalog {
    forms: BTreeMap<FormId, DisguiseForm>,
}

impl DisguiseCatalog {
    pub fn new(forms: impl IntoIterator<Item = DisguiseForm>) -> Self {
        Self {
            forms: forms.into_iter().map(|f| (f.id, f)).collect(),
        }
    }

    pub fn get(&self, id: FormId) -> Option<&DisguiseForm> {
        self.forms.get(&id)
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

/// Circular area on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub center: Vec3,
    pub radius: f32,
}

impl Zone {
    pub fn contains(&self, point: Vec3) -> bool {
        let dx = point.x - self.center.x;
        let dz = point.z - self.center.z;
        dx * dx + dz * dz <= self.radius * self.radius
    }
}

/// Where a prop sits when the round starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropPlacement {
    pub id: PropId,
    pub form: FormId,
    pub position: Vec3,
    #[serde(default)]
    pub yaw: f32,
    /// Large drivable landmark rather than a copyable prop.
    #[serde(default)]
    pub landmark: bool,
    #[serde(default)]
    pub delivery_zone: Option<Zone>,
}

/// Live state of a world prop or landmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropRecord {
    pub id: PropId,
    pub form: FormId,
    pub is_large_landmark: bool,
    pub is_hidden: bool,
    pub occupant: Option<EntityId>,
    pub position: Vec3,
    pub yaw: f32,
    pub delivery_zone: Option<Zone>,
    pub delivered: bool,
}

impl PropRecord {
    fn from_placement(p: &PropPlacement) -> Self {
        Self {
            id: p.id,
            form: p.form,
            is_large_landmark: p.landmark,
            is_hidden: false,
            occupant: None,
            position: p.position,
            yaw: p.yaw,
            delivery_zone: if p.landmark { p.delivery_zone } else { None },
            delivered: false,
        }
    }

    /// Whether a landmark can take a new driver right now.
    pub fn is_available_landmark(&self) -> bool {
        self.is_large_landmark && self.occupant.is_none() && !self.is_hidden && !self.delivered
    }
}

/// Every prop in the world, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropTable {
    props: BTreeMap<PropId, PropRecord>,
}

impl PropTable {
    pub fn from_placements(placements: &[PropPlacement]) -> Self {
        Self {
            props: placements
                .iter()
                .map(|p| (p.id, PropRecord::from_placement(p)))
                .collect(),
        }
    }

    pub fn get(&self, id: PropId) -> Option<&PropRecord> {
        self.props.get(&id)
    }

    pub fn get_mut(&mut self, id: PropId) -> Option<&mut PropRecord> {
        self.props.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropRecord> {
        self.props.values()
    }

    pub fn landmarks(&self) -> impl Iterator<Item = &PropRecord> {
        self.props.values().filter(|p| p.is_large_landmark)
    }

    /// Hide a landmark and record its driver. The caller has already
    /// checked availability.
    pub fn claim_landmark(&mut self, id: PropId, driver: EntityId) {
        if let Some(prop) = self.props.get_mut(&id) {
            prop.occupant = Some(driver);
            prop.is_hidden = true;
        }
    }

    /// Drop a landmark back into the world where its driver left it.
    pub fn release_landmark(&mut self, id: PropId, position: Vec3, yaw: f32) {
        match self.props.get_mut(&id) {
            Some(prop) => {
                prop.occupant = None;
                prop.is_hidden = false;
                prop.position = position;
                prop.yaw = yaw;
            },
            None => {
                tracing::warn!(landmark = id, "Released landmark is missing from the world");
            },
        }
    }

    /// True when at least one landmark exists and every landmark is delivered.
    pub fn all_landmarks_delivered(&self) -> bool {
        let mut any = false;
        for lm in self.landmarks() {
            any = true;
            if !lm.delivered {
                return false;
            }
        }
        any
    }

    /// Landmarks recording `driver` as occupant. At most one when the world
    /// is consistent.
    pub fn driven_by(&self, driver: EntityId) -> impl Iterator<Item = &PropRecord> {
        self.props
            .values()
            .filter(move |p| p.occupant == Some(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placements() -> Vec<PropPlacement> {
        vec![
            PropPlacement {
                id: 1,
                form: 10,
                position: Vec3::new(5.0, 0.0, 5.0),
                yaw: 0.0,
                landmark: false,
                delivery_zone: Some(Zone {
                    center: Vec3::ZERO,
                    radius: 1.0,
                }),
            },
            PropPlacement {
                id: 2,
                form: 20,
                position: Vec3::new(10.0, 0.0, 10.0),
                yaw: 1.0,
                landmark: true,
                delivery_zone: Some(Zone {
                    center: Vec3::new(50.0, 0.0, 50.0),
                    radius: 3.0,
                }),
            },
        ]
    }

    #[test]
    fn zone_ignores_height() {
        let zone = Zone {
            center: Vec3::new(0.0, 0.0, 0.0),
            radius: 2.0,
        };
        assert!(zone.contains(Vec3::new(1.0, 10.0, 1.0)));
        assert!(!zone.contains(Vec3::new(2.0, 0.0, 2.0)));
    }

    #[test]
    fn delivery_zone_only_kept_for_landmarks() {
        let table = PropTable::from_placements(&placements());
        assert!(table.get(1).unwrap().delivery_zone.is_none());
        assert!(table.get(2).unwrap().delivery_zone.is_some());
    }

    #[test]
    fn claim_and_release_landmark() {
        let mut table = PropTable::from_placements(&placements());
        assert!(table.get(2).unwrap().is_available_landmark());

        table.claim_landmark(2, 7);
        let lm = table.get(2).unwrap();
        assert_eq!(lm.occupant, Some(7));
        assert!(lm.is_hidden);
        assert!(!lm.is_available_landmark());
        assert_eq!(table.driven_by(7).count(), 1);

        table.release_landmark(2, Vec3::new(1.0, 0.0, 2.0), 0.5);
        let lm = table.get(2).unwrap();
        assert_eq!(lm.occupant, None);
        assert!(!lm.is_hidden);
        assert_eq!(lm.position, Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(lm.yaw, 0.5);
    }

    #[test]
    fn all_delivered_requires_a_landmark() {
        let mut table = PropTable::from_placements(&placements()[..1]);
        assert!(!table.all_landmarks_delivered());

        table = PropTable::from_placements(&placements());
        assert!(!table.all_landmarks_delivered());
        table.get_mut(2).unwrap().delivered = true;
        assert!(table.all_landmarks_delivered());
    }

    #[test]
    fn catalog_lookup() {
        let catalog = DisguiseCatalog::new(vec![DisguiseForm {
            id: 3,
            name: "crate".to_string(),
            geometry: None,
            animal: None,
        }]);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get(3).is_some());
        assert!(catalog.get(4).is_none());
    }
}
