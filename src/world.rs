//! An in-memory collision world of static primitives.
//!
//! [`StaticWorld`] answers the capsule queries of [`ShapeQuery`] without any physics engine, which
//! makes it usable on a headless server and in tests. Shapes are described by signed distance
//! functions. Planes are swept exactly; boxes and balls use conservative advancement. The
//! separation along a sweep is convex, so a Newton step on it never passes the first contact.
use bevy::math::{Dir3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::char_controller::capsule::CapsuleSegment;
use crate::char_controller::query::{ALL_LAYERS, Penetration, QueryFilter, ShapeQuery, SweepHit};

/// Separation at which a conservative-advancement sweep reports contact.
const CONTACT_TOLERANCE: f32 = 1e-5;
/// Upper bound on conservative-advancement steps for a single obstacle.
const MAX_ADVANCEMENT_STEPS: usize = 256;
/// Ternary-search iterations when looking for the point of a segment closest to a shape.
const SEGMENT_SEARCH_STEPS: usize = 48;
/// A plane has to be approached at least this fast (per unit moved) to be hit.
const APPROACH_EPSILON: f32 = 1e-6;

/// Identifies an obstacle of a [`StaticWorld`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObstacleId(pub u32);

/// A static collision primitive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Obstacle {
    /// Half-space below the plane `normal . x = offset`. `normal` is unit length.
    Plane { normal: Vec3, offset: f32 },
    /// Box with the given half extents, rotated by `rotation` around `center`.
    Cuboid {
        center: Vec3,
        half_extents: Vec3,
        rotation: Quat,
    },
    Ball { center: Vec3, radius: f32 },
}

/// The closest point of a shape to a point, with signed separation and outward normal.
#[derive(Clone, Copy, Debug)]
struct Closest {
    distance: f32,
    normal: Vec3,
    surface_point: Vec3,
}

impl Obstacle {
    /// Signed distance from `point` to the surface, negative inside, and the outward normal there.
    fn closest(&self, point: Vec3) -> Closest {
        let (distance, normal) = match *self {
            Obstacle::Plane { normal, offset } => (normal.dot(point) - offset, normal),
            Obstacle::Ball { center, radius } => {
                let offset = point - center;
                let normal = offset.try_normalize().unwrap_or(Vec3::Y);
                (offset.length() - radius, normal)
            }
            Obstacle::Cuboid {
                center,
                half_extents,
                rotation,
            } => {
                let local = rotation.inverse() * (point - center);
                let q = local.abs() - half_extents;
                let outside = q.max(Vec3::ZERO);
                let local_normal = if outside.length_squared() > 0.0 {
                    (outside * local.signum()).normalize()
                } else {
                    // Inside: the nearest face is the one with the largest (least negative) q.
                    face_axis(q) * local.signum()
                };
                let distance = outside.length() + q.max_element().min(0.0);
                (distance, rotation * local_normal)
            }
        };
        Closest {
            distance,
            normal,
            surface_point: point - normal * distance,
        }
    }

    /// The point of `capsule`'s inner segment closest to this shape.
    ///
    /// Signed distance functions of convex shapes are convex, so their restriction to a segment has
    /// a single minimum and a ternary search finds it.
    fn closest_on_segment(&self, capsule: &CapsuleSegment) -> Closest {
        if let Obstacle::Plane { normal, .. } = *self {
            // Linear along the segment: one of the endpoints is always the closest.
            let point = if normal.dot(capsule.point1) < normal.dot(capsule.point2) {
                capsule.point1
            } else {
                capsule.point2
            };
            return self.closest(point);
        }
        if let Obstacle::Ball { center, .. } = *self {
            let axis = capsule.point1 - capsule.point2;
            let length_squared = axis.length_squared();
            let t = if length_squared > 0.0 {
                ((center - capsule.point2).dot(axis) / length_squared).clamp(0.0, 1.0)
            } else {
                0.5
            };
            return self.closest(capsule.lerp(t));
        }
        let (mut low, mut high) = (0.0_f32, 1.0_f32);
        for _ in 0..SEGMENT_SEARCH_STEPS {
            let a = low + (high - low) / 3.0;
            let b = high - (high - low) / 3.0;
            let (at_a, at_b) = (
                self.closest(capsule.lerp(a)).distance,
                self.closest(capsule.lerp(b)).distance,
            );
            if at_a < at_b {
                high = b;
            } else if at_a > at_b {
                low = a;
            } else {
                // Flat stretch, e.g. a box face parallel to the segment: close in from both sides.
                low = a;
                high = b;
            }
        }
        self.closest(capsule.lerp((low + high) * 0.5))
    }

    /// Separation between `capsule`'s surface and this shape; negative when overlapping.
    fn separation(&self, capsule: &CapsuleSegment) -> (f32, Closest) {
        let closest = self.closest_on_segment(capsule);
        (closest.distance - capsule.radius, closest)
    }

    fn sweep(&self, capsule: &CapsuleSegment, direction: Dir3, max_distance: f32) -> Option<(f32, Closest)> {
        let direction = direction.as_vec3();
        if let Obstacle::Plane { normal, .. } = *self {
            let (gap, closest) = self.separation(capsule);
            let approach = -normal.dot(direction);
            if approach <= APPROACH_EPSILON {
                return None;
            }
            let distance = gap.max(0.0) / approach;
            if distance > max_distance {
                return None;
            }
            let segment_point = closest.surface_point + normal * closest.distance;
            return Some((distance, self.closest(segment_point + direction * distance)));
        }

        let mut travelled = 0.0_f32;
        // Last distance at which the capsule was known to be clear of the shape.
        let mut clear: Option<(f32, Closest)> = None;
        for _ in 0..MAX_ADVANCEMENT_STEPS {
            let moved = capsule.translated(direction * travelled);
            let (gap, closest) = self.separation(&moved);
            // Rate at which the gap shrinks per unit moved.
            let closing = -closest.normal.dot(direction);
            if gap <= CONTACT_TOLERANCE {
                match clear {
                    // Already touching but moving away is not a hit.
                    None if closing <= 0.0 => return None,
                    Some((clear_distance, _)) if gap < -CONTACT_TOLERANCE => {
                        // Rounding carried the step past the surface, back up.
                        travelled = (clear_distance + travelled) * 0.5;
                        continue;
                    }
                    _ => return Some((travelled, closest)),
                }
            }
            if closing <= APPROACH_EPSILON {
                // Convex separation that stopped shrinking only grows from here on.
                return None;
            }
            clear = Some((travelled, closest));
            travelled += gap / closing;
            if travelled > max_distance {
                return None;
            }
        }
        // Out of steps: the last clear distance is still a safe place to stop.
        clear
    }
}

/// Unit vector of the axis along which `q` is largest.
fn face_axis(q: Vec3) -> Vec3 {
    if q.x >= q.y && q.x >= q.z {
        Vec3::X
    } else if q.y >= q.z {
        Vec3::Y
    } else {
        Vec3::Z
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct Entry {
    id: ObstacleId,
    obstacle: Obstacle,
    layers: u32,
}

/// A collision world made of static [`Obstacle`]s.
///
/// Immutable while it is being queried, so a shared reference can be used from several threads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticWorld {
    entries: Vec<Entry>,
    next_id: u32,
}

impl StaticWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `obstacle` on the given layers and returns its id.
    pub fn add(&mut self, obstacle: Obstacle, layers: u32) -> ObstacleId {
        let id = ObstacleId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            obstacle,
            layers,
        });
        id
    }

    /// Adds the plane through `point` with the given `normal`. Everything behind the plane is solid.
    ///
    /// A zero `normal` falls back to +Y.
    pub fn add_plane(&mut self, normal: Vec3, point: Vec3) -> ObstacleId {
        let normal = normal.try_normalize().unwrap_or(Vec3::Y);
        self.add(
            Obstacle::Plane {
                normal,
                offset: normal.dot(point),
            },
            ALL_LAYERS,
        )
    }

    pub fn add_cuboid(&mut self, center: Vec3, half_extents: Vec3, rotation: Quat) -> ObstacleId {
        self.add(
            Obstacle::Cuboid {
                center,
                half_extents: half_extents.abs(),
                rotation: rotation.normalize(),
            },
            ALL_LAYERS,
        )
    }

    pub fn add_ball(&mut self, center: Vec3, radius: f32) -> ObstacleId {
        self.add(
            Obstacle::Ball {
                center,
                radius: radius.abs(),
            },
            ALL_LAYERS,
        )
    }

    /// Removes an obstacle. Returns `false` if there was none with that id.
    pub fn remove(&mut self, id: ObstacleId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub fn get(&self, id: ObstacleId) -> Option<&Obstacle> {
        self.entry(id).map(|entry| &entry.obstacle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: ObstacleId) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    fn candidates<'a>(
        &'a self,
        filter: &'a QueryFilter<ObstacleId>,
    ) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| filter.test(&entry.id, entry.layers))
    }
}

impl ShapeQuery for StaticWorld {
    type Collider = ObstacleId;

    fn sweep_capsule(
        &self,
        capsule: &CapsuleSegment,
        direction: Dir3,
        max_distance: f32,
        filter: &QueryFilter<ObstacleId>,
    ) -> Option<SweepHit<ObstacleId>> {
        let mut best: Option<SweepHit<ObstacleId>> = None;
        for entry in self.candidates(filter) {
            let Some((distance, closest)) = entry.obstacle.sweep(capsule, direction, max_distance)
            else {
                continue;
            };
            // Strictly closer only, so ties go to the obstacle added first.
            if best.is_some_and(|hit| hit.distance <= distance) {
                continue;
            }
            best = Some(SweepHit {
                distance,
                point: closest.surface_point,
                normal: closest.normal,
                collider: entry.id,
            });
        }
        best
    }

    fn overlap_capsule(
        &self,
        capsule: &CapsuleSegment,
        filter: &QueryFilter<ObstacleId>,
        out: &mut Vec<ObstacleId>,
    ) {
        out.extend(
            self.candidates(filter)
                .filter(|entry| entry.obstacle.separation(capsule).0 < 0.0)
                .map(|entry| entry.id),
        );
    }

    fn compute_penetration(
        &self,
        capsule: &CapsuleSegment,
        collider: ObstacleId,
    ) -> Option<Penetration> {
        let entry = self.entry(collider)?;
        let (gap, closest) = entry.obstacle.separation(capsule);
        if gap >= 0.0 {
            return None;
        }
        Some(Penetration {
            direction: Dir3::new(closest.normal).ok()?,
            depth: -gap,
        })
    }
}
