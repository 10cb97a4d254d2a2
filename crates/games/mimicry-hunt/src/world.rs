use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::disguise::{AnimalProfile, DisguiseForm, FormId, Gait, PropPlacement, Zone};
use crate::physics::Occluder;

/// Form id of the small animal evaders become on their first death.
pub const SECOND_CHANCE_FORM: FormId = 900;

/// Static world content for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldLayout {
    pub width: f32,
    pub depth: f32,
    pub forms: Vec<DisguiseForm>,
    pub props: Vec<PropPlacement>,
    pub safe_zones: Vec<Zone>,
    pub evader_spawns: Vec<Vec3>,
    pub pursuer_spawns: Vec<Vec3>,
    pub occluders: Vec<Occluder>,
}

impl Default for WorldLayout {
    fn default() -> Self {
        default_layout()
    }
}

impl WorldLayout {
    /// Spawn point for the `index`-th entity of a side, cycling through the
    /// configured points. Falls back to the arena center.
    pub fn spawn_point(&self, evader: bool, index: usize) -> Vec3 {
        let points = if evader {
            &self.evader_spawns
        } else {
            &self.pursuer_spawns
        };
        if points.is_empty() {
            return Vec3::new(self.width / 2.0, 0.0, self.depth / 2.0);
        }
        points[index % points.len()]
    }
}

fn box_geometry(hx: f32, h: f32, hz: f32) -> Vec<Vec3> {
    let mut verts = Vec::with_capacity(8);
    for &y in &[0.0, h] {
        for &x in &[-hx, hx] {
            for &z in &[-hz, hz] {
                verts.push(Vec3::new(x, y, z));
            }
        }
    }
    verts
}

fn form(id: FormId, name: &str, geometry: Option<Vec<Vec3>>, animal: Option<AnimalProfile>) -> DisguiseForm {
    DisguiseForm {
        id,
        name: name.to_string(),
        geometry,
        animal,
    }
}

/// The built-in village square used when no layout is configured.
pub fn default_layout() -> WorldLayout {
    let forms = vec![
        form(1, "crate", Some(box_geometry(0.5, 1.0, 0.5)), None),
        form(2, "barrel", Some(box_geometry(0.4, 1.2, 0.4)), None),
        form(3, "lamp_post", Some(box_geometry(0.2, 3.0, 0.2)), None),
        form(4, "hay_bale", Some(box_geometry(1.0, 0.8, 0.6)), None),
        form(
            10,
            "deer",
            Some(box_geometry(0.4, 1.4, 0.9)),
            Some(AnimalProfile {
                walk_speed: 4.5,
                run_speed: 9.0,
                gait: Gait::Quadruped,
            }),
        ),
        form(
            11,
            "rabbit",
            Some(box_geometry(0.15, 0.4, 0.25)),
            Some(AnimalProfile {
                walk_speed: 3.0,
                run_speed: 8.0,
                gait: Gait::Hopper,
            }),
        ),
        form(20, "hay_cart", Some(box_geometry(1.5, 2.0, 2.5)), None),
        form(21, "market_stall", Some(box_geometry(2.0, 2.5, 1.5)), None),
        form(
            SECOND_CHANCE_FORM,
            "squirrel",
            Some(box_geometry(0.12, 0.3, 0.2)),
            Some(AnimalProfile {
                walk_speed: 3.5,
                run_speed: 6.0,
                gait: Gait::Quadruped,
            }),
        ),
    ];

    let prop = |id, form, x, z| PropPlacement {
        id,
        form,
        position: Vec3::new(x, 0.0, z),
        yaw: 0.0,
        landmark: false,
        delivery_zone: None,
    };

    let props = vec![
        prop(1, 1, 12.0, 12.0),
        prop(2, 1, 14.0, 12.0),
        prop(3, 2, 20.0, 30.0),
        prop(4, 3, 30.0, 20.0),
        prop(5, 4, 40.0, 40.0),
        prop(6, 10, 45.0, 15.0),
        prop(7, 11, 15.0, 45.0),
        PropPlacement {
            id: 100,
            form: 20,
            position: Vec3::new(10.0, 0.0, 50.0),
            yaw: 0.0,
            landmark: true,
            delivery_zone: Some(Zone {
                center: Vec3::new(52.0, 0.0, 8.0),
                radius: 4.0,
            }),
        },
        PropPlacement {
            id: 101,
            form: 21,
            position: Vec3::new(50.0, 0.0, 50.0),
            yaw: 0.0,
            landmark: true,
            delivery_zone: Some(Zone {
                center: Vec3::new(8.0, 0.0, 8.0),
                radius: 4.0,
            }),
        },
    ];

    WorldLayout {
        width: 60.0,
        depth: 60.0,
        forms,
        props,
        safe_zones: vec![Zone {
            center: Vec3::new(30.0, 0.0, 55.0),
            radius: 3.0,
        }],
        evader_spawns: vec![
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(12.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 12.0),
            Vec3::new(14.0, 0.0, 14.0),
        ],
        pursuer_spawns: vec![Vec3::new(50.0, 0.0, 30.0), Vec3::new(48.0, 0.0, 30.0)],
        occluders: vec![
            Occluder {
                min: Vec2::new(28.0, 28.0),
                max: Vec2::new(32.0, 32.0),
            },
            Occluder {
                min: Vec2::new(20.0, 40.0),
                max: Vec2::new(24.0, 48.0),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disguise::DisguiseCatalog;

    #[test]
    fn default_layout_is_self_consistent() {
        let layout = default_layout();
        let catalog = DisguiseCatalog::new(layout.forms.clone());
        for p in &layout.props {
            assert!(catalog.get(p.form).is_some(), "prop {} has unknown form", p.id);
            assert!(p.position.x >= 0.0 && p.position.x <= layout.width);
            assert!(p.position.z >= 0.0 && p.position.z <= layout.depth);
        }
        assert!(catalog.get(SECOND_CHANCE_FORM).is_some());
        assert!(layout.props.iter().any(|p| p.landmark));
    }

    #[test]
    fn spawn_points_cycle() {
        let layout = default_layout();
        let n = layout.evader_spawns.len();
        assert_eq!(layout.spawn_point(true, 0), layout.spawn_point(true, n));
    }

    #[test]
    fn empty_spawns_fall_back_to_center() {
        let layout = WorldLayout {
            pursuer_spawns: vec![],
            ..default_layout()
        };
        assert_eq!(layout.spawn_point(false, 3), Vec3::new(30.0, 0.0, 30.0));
    }
}
