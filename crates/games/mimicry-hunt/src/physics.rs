use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Downward speed of airborne bodies (units/s).
const FALL_SPEED: f32 = 6.0;

/// Collision volume driven by the movement controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Collider {
    Capsule { radius: f32, height: f32 },
    Box { half_extents: Vec3 },
}

impl Collider {
    /// Radius of the smallest vertical cylinder containing the volume.
    pub fn horizontal_radius(&self) -> f32 {
        match *self {
            Self::Capsule { radius, .. } => radius,
            Self::Box { half_extents } => half_extents.x.hypot(half_extents.z),
        }
    }

    pub fn height(&self) -> f32 {
        match *self {
            Self::Capsule { height, .. } => height,
            Self::Box { half_extents } => half_extents.y * 2.0,
        }
    }
}

/// Axis-aligned blocker on the ground plane (x/z), infinitely tall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Occluder {
    pub min: Vec2,
    pub max: Vec2,
}

impl Occluder {
    fn contains_expanded(&self, p: Vec2, margin: f32) -> bool {
        p.x > self.min.x - margin
            && p.x < self.max.x + margin
            && p.y > self.min.y - margin
            && p.y < self.max.y + margin
    }

    /// Slab test of the segment `a -> b` against this box.
    fn blocks_segment(&self, a: Vec2, b: Vec2) -> bool {
        let d = b - a;
        let mut t_min = 0.0f32;
        let mut t_max = 1.0f32;
        for axis in 0..2 {
            let (origin, dir, lo, hi) = if axis == 0 {
                (a.x, d.x, self.min.x, self.max.x)
            } else {
                (a.y, d.y, self.min.y, self.max.y)
            };
            if dir.abs() < f32::EPSILON {
                if origin < lo || origin > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let (mut t0, mut t1) = ((lo - origin) * inv, (hi - origin) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }
}

/// Movement and visibility queries the gameplay core needs from physics.
pub trait PhysicsWorld: Send + Sync {
    /// Move a body by `velocity * dt`, resolving against static geometry.
    /// Returns the new position.
    fn integrate(&self, position: Vec3, velocity: Vec3, collider: &Collider, dt: f32) -> Vec3;

    /// Whether nothing static blocks the straight line between two points.
    fn line_of_sight(&self, from: Vec3, to: Vec3) -> bool;
}

/// Bounded flat ground with axis-aligned occluders.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatArena {
    pub width: f32,
    pub depth: f32,
    pub occluders: Vec<Occluder>,
}

impl FlatArena {
    pub fn new(width: f32, depth: f32, occluders: Vec<Occluder>) -> Self {
        Self {
            width: width.max(1.0),
            depth: depth.max(1.0),
            occluders,
        }
    }

    fn clamp_to_bounds(&self, p: Vec2, radius: f32) -> Vec2 {
        let rx = radius.min(self.width / 2.0);
        let rz = radius.min(self.depth / 2.0);
        Vec2::new(
            p.x.clamp(rx, self.width - rx),
            p.y.clamp(rz, self.depth - rz),
        )
    }

    fn blocked(&self, p: Vec2, radius: f32) -> bool {
        self.occluders
            .iter()
            .any(|o| o.contains_expanded(p, radius))
    }
}

impl PhysicsWorld for FlatArena {
    fn integrate(&self, position: Vec3, velocity: Vec3, collider: &Collider, dt: f32) -> Vec3 {
        let radius = collider.horizontal_radius();
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let from = Vec2::new(position.x, position.z);
        let step = Vec2::new(velocity.x, velocity.z) * dt;

        let mut to = self.clamp_to_bounds(from + step, radius);
        if self.blocked(to, radius) {
            // Slide along whichever axis stays clear.
            let x_only = self.clamp_to_bounds(Vec2::new(from.x + step.x, from.y), radius);
            let z_only = self.clamp_to_bounds(Vec2::new(from.x, from.y + step.y), radius);
            to = if !self.blocked(x_only, radius) {
                x_only
            } else if !self.blocked(z_only, radius) {
                z_only
            } else {
                from
            };
        }

        let y = (position.y + (velocity.y - FALL_SPEED) * dt).max(0.0);
        Vec3::new(to.x, y, to.y)
    }

    fn line_of_sight(&self, from: Vec3, to: Vec3) -> bool {
        let a = Vec2::new(from.x, from.z);
        let b = Vec2::new(to.x, to.z);
        !self.occluders.iter().any(|o| o.blocks_segment(a, b))
    }
}
