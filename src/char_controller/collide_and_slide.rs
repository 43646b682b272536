//! Contains the *collide and slide* algorithm and depenetration for kinematic capsule bodies.
//!
//! See the documentation of [`CollideAndSlide`] for more information.
use bevy::math::{Dir3, Vec3};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::capsule::{CapsuleSegment, CapsuleShape, Pose};
use super::query::{Penetration, QueryFilter, ShapeQuery};

/// Remaining displacements shorter than this are treated as no movement.
pub const MIN_DISTANCE: f32 = 1e-5;

/// Needed to not accidentally explode when the contact normal is almost parallel to the direction.
const PARALLEL_EPSILON: f32 = 1e-4;

/// The *collide and slide* solver, also known as *move and slide* or *step slide*.
///
/// Collide and slide is the core movement and collision algorithm used by most kinematic character controllers.
/// It moves a capsule along a desired displacement and slides it along any collider it hits on the way.
///
/// # Algorithm
///
/// 1. Sweep the capsule along the remaining displacement, extended by the skin width.
/// 2. If nothing is hit, move the full remaining displacement.
/// 3. If something is hit:
///    - Move up to the contact, minus the skin width.
///    - Project the rest of the displacement onto the contact plane.
///    - Record a [`SlideCollision`].
/// 4. Repeat with the projected displacement until nothing is hit or the bounce budget is spent.
///
/// [`CollideAndSlide::depenetrate`] is a separate pass that pushes a capsule out of anything it
/// already overlaps.
///
/// The solver holds no state besides its [`ShapeQuery`], so one instance can serve any number of
/// characters. Every call returns its own output.
#[doc(alias = "MoveAndSlide")]
#[doc(alias = "StepSlide")]
pub struct CollideAndSlide<Q> {
    query: Q,
}

impl<Q: ShapeQuery> CollideAndSlide<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    /// Moves `shape` from `start` by up to `desired_delta`, stopping at obstacles and sliding along them.
    ///
    /// The rotation of `start` is kept for the whole move. The returned [`SlideResult`] holds the
    /// displacement that was actually possible and every contact in the order it was met.
    ///
    /// With `max_bounces == 0` the capsule is considered fully blocked and does not move.
    #[must_use]
    #[doc(alias = "collide_and_slide")]
    #[doc(alias = "move_and_slide")]
    pub fn slide(
        &self,
        shape: &CapsuleShape,
        start: Pose,
        desired_delta: Vec3,
        config: &SlideConfig,
        filter: &QueryFilter<Q::Collider>,
    ) -> SlideResult<Q::Collider> {
        let mut result = SlideResult::at_rest(start, desired_delta, config.max_bounces);

        if config.max_bounces == 0 {
            debug!("slide with a zero bounce budget, treating the body as blocked");
            return result;
        }
        if !desired_delta.is_finite() {
            warn!(?desired_delta, "ignoring non-finite displacement");
            return result;
        }

        let mut position = start.position;
        let mut remaining = desired_delta;
        let mut out_delta = Vec3::ZERO;

        loop {
            if result.collisions.len() >= config.max_bounces {
                debug!(
                    bounces = config.max_bounces,
                    ?remaining,
                    "bounce budget exhausted"
                );
                if config.on_budget_exhausted == BudgetExhaustion::KeepRemainder {
                    out_delta += remaining;
                }
                break;
            }

            let Ok((direction, distance)) = Dir3::new_and_length(remaining) else {
                // No movement left
                break;
            };
            if distance < MIN_DISTANCE {
                break;
            }

            let capsule = shape.segment(Pose::new(position, start.rotation));
            let Some(hit) = self.sweep(&capsule, direction, distance, config.skin_width, filter)
            else {
                // No collision, move the full distance.
                out_delta += remaining;
                break;
            };

            let before_contact = hit.safe_distance;
            let after_contact = distance - before_contact;
            let projected = project_on_plane(direction, hit.normal, after_contact);
            let advance = direction * before_contact;

            trace!(
                bounce = result.collisions.len(),
                ?hit.collider,
                distance = hit.distance,
                ?hit.normal,
                ?projected,
                "slide contact"
            );

            result.collisions.push(SlideCollision {
                point: hit.point,
                normal: hit.normal,
                collider: hit.collider,
                collision_position: position + advance,
                in_delta: advance,
                collision_delta: direction * after_contact,
                projected_delta: projected,
            });

            position += advance;
            out_delta += advance;

            // Sliding back against the wished direction only makes the body jitter in sloped corners.
            if config.stop_on_reversal && projected.dot(desired_delta) < 0.0 {
                break;
            }
            remaining = projected;
        }

        result.out_delta = out_delta;
        result.to = start.translated(out_delta);
        result
    }

    /// Sweeps `capsule` along `direction` for `distance` plus `skin_width`.
    ///
    /// The returned [`SlideHit::safe_distance`] is the hit distance pulled back by `skin_width`,
    /// clamped to `[0, distance]`, so the capsule never moves backwards and never past the request.
    /// Hits the query reports with unusable data are dropped and the way is considered free.
    #[must_use]
    #[doc(alias = "cast")]
    pub fn sweep(
        &self,
        capsule: &CapsuleSegment,
        direction: Dir3,
        distance: f32,
        skin_width: f32,
        filter: &QueryFilter<Q::Collider>,
    ) -> Option<SlideHit<Q::Collider>> {
        let cast_distance = distance + skin_width;
        let raw = self
            .query
            .sweep_capsule(capsule, direction, cast_distance, filter)?;
        let Some(hit) = raw.sanitized(cast_distance) else {
            warn!(?raw.collider, distance = raw.distance, normal = ?raw.normal, "discarding malformed sweep hit");
            return None;
        };
        Some(SlideHit {
            safe_distance: (hit.distance - skin_width).clamp(0.0, distance),
            distance: hit.distance,
            point: hit.point,
            normal: hit.normal,
            collider: hit.collider,
        })
    }

    /// Pushes `shape` at `pose` out of every collider it overlaps.
    ///
    /// Runs at most [`DepenetrationConfig::max_steps`] passes. Each pass collects the colliders
    /// overlapping the capsule inflated by the skin width, orders them by penetration depth (deepest
    /// first) and moves the capsule out of each one in turn by its depth plus the skin width.
    /// Stops early once a pass finds nothing to correct.
    ///
    /// This is a best-effort resolver: with several obstacles pushing against each other the capsule
    /// may still overlap something after the last pass, see [`DepenetrationResult::resolved`].
    #[must_use]
    pub fn depenetrate(
        &self,
        shape: &CapsuleShape,
        pose: Pose,
        config: &DepenetrationConfig,
        filter: &QueryFilter<Q::Collider>,
    ) -> DepenetrationResult {
        self.depenetrate_with(shape, pose, config, filter, |_| {})
    }

    /// Same as [`CollideAndSlide::depenetrate`], calling `on_step` for each correction applied.
    pub fn depenetrate_with(
        &self,
        shape: &CapsuleShape,
        pose: Pose,
        config: &DepenetrationConfig,
        filter: &QueryFilter<Q::Collider>,
        mut on_step: impl FnMut(&DepenetrationStep<Q::Collider>),
    ) -> DepenetrationResult {
        let mut position = pose.position;
        let mut overlaps = Vec::new();
        let mut penetrations: Vec<(Q::Collider, f32)> = Vec::new();
        let mut result = DepenetrationResult {
            position,
            offset: Vec3::ZERO,
            passes: 0,
            corrections: 0,
            resolved: false,
        };

        for _ in 0..config.max_steps {
            result.passes += 1;
            let capsule = shape.segment(Pose::new(position, pose.rotation));

            overlaps.clear();
            self.query
                .overlap_capsule(&capsule.inflated(config.skin_width), filter, &mut overlaps);

            penetrations.clear();
            for &collider in &overlaps {
                if filter.excluded.contains(&collider) {
                    continue;
                }
                if let Some(penetration) = self.penetration(&capsule, collider) {
                    penetrations.push((collider, penetration.depth));
                }
            }
            if penetrations.is_empty() {
                result.resolved = true;
                break;
            }
            penetrations.sort_by(|a, b| b.1.total_cmp(&a.1));

            for &(collider, _) in &penetrations {
                // Earlier corrections in this pass may already have moved the capsule out.
                let capsule = shape.segment(Pose::new(position, pose.rotation));
                let Some(penetration) = self.penetration(&capsule, collider) else {
                    continue;
                };
                let offset = penetration.direction * (penetration.depth + config.skin_width);
                position += offset;
                result.corrections += 1;
                on_step(&DepenetrationStep {
                    collider,
                    direction: penetration.direction,
                    depth: penetration.depth,
                    offset,
                });
            }
        }

        if !result.resolved {
            debug!(
                passes = result.passes,
                ?position,
                "depenetration stopped before the last pass came out clean"
            );
        }
        result.position = position;
        result.offset = position - pose.position;
        result
    }

    fn penetration(&self, capsule: &CapsuleSegment, collider: Q::Collider) -> Option<Penetration> {
        let penetration = self.query.compute_penetration(capsule, collider)?;
        if !penetration.depth.is_finite() {
            warn!(?collider, depth = penetration.depth, "discarding malformed penetration");
            return None;
        }
        (penetration.depth > 0.0).then_some(penetration)
    }
}

/// Projects the unit `direction` onto the plane with the given unit `normal`, scaled by `length`.
///
/// The part of the movement going into the surface is removed and the tangential part kept.
/// The result is never longer than `length`; it is zero when `direction` is nearly parallel to
/// `normal` or when the computation is not finite.
#[must_use]
pub fn project_on_plane(direction: Dir3, normal: Vec3, length: f32) -> Vec3 {
    let direction = direction.as_vec3();
    if direction.dot(normal).abs() >= 1.0 - PARALLEL_EPSILON {
        return Vec3::ZERO;
    }
    let projected = direction.reject_from_normalized(normal) * length;
    if !projected.is_finite() {
        return Vec3::ZERO;
    }
    projected.clamp_length_max(length.max(0.0))
}

/// A sweep hit prepared for sliding, returned by [`CollideAndSlide::sweep`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlideHit<C> {
    /// The maximum distance that is safe to move so that the capsule keeps the skin width to the collider.
    /// Is 0.0 when the capsule already was closer than the skin width.
    pub safe_distance: f32,
    /// The raw distance to the contact, not respecting skin width.
    #[doc(alias = "time_of_impact")]
    pub distance: f32,
    pub point: Vec3,
    /// Unit outward normal of the hit collider.
    pub normal: Vec3,
    pub collider: C,
}

/// One contact met during [`CollideAndSlide::slide`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlideCollision<C> {
    /// The contact point on the hit collider, in world space.
    pub point: Vec3,
    /// The outward surface normal of the hit collider at `point`.
    pub normal: Vec3,
    pub collider: C,
    /// Where the body was when it stopped at this contact.
    pub collision_position: Vec3,
    /// The displacement travelled from the previous contact (or the start) to this one.
    pub in_delta: Vec3,
    /// The part of the sub-displacement that would have gone past the contact.
    pub collision_delta: Vec3,
    /// `collision_delta` clipped to the contact plane; the displacement tried next.
    pub projected_delta: Vec3,
}

/// Output of one [`CollideAndSlide::slide`] call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlideResult<C> {
    pub from: Pose,
    pub to: Pose,
    /// The displacement that was asked for.
    pub in_delta: Vec3,
    /// The displacement that was possible. `to.position - from.position`.
    pub out_delta: Vec3,
    /// Contacts in the order they were met. Never longer than the bounce budget.
    pub collisions: Vec<SlideCollision<C>>,
}

impl<C> SlideResult<C> {
    fn at_rest(from: Pose, in_delta: Vec3, max_bounces: usize) -> Self {
        Self {
            from,
            to: from,
            in_delta,
            out_delta: Vec3::ZERO,
            collisions: Vec::with_capacity(max_bounces),
        }
    }

    pub fn collision_count(&self) -> usize {
        self.collisions.len()
    }

    /// Whether anything was hit on the way.
    pub fn collided(&self) -> bool {
        !self.collisions.is_empty()
    }
}

/// A correction applied by [`CollideAndSlide::depenetrate_with`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepenetrationStep<C> {
    pub collider: C,
    pub direction: Dir3,
    pub depth: f32,
    /// `direction * (depth + skin_width)`.
    pub offset: Vec3,
}

/// Output of [`CollideAndSlide::depenetrate`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepenetrationResult {
    /// The corrected body position.
    pub position: Vec3,
    /// `position` minus the position depenetration started from.
    pub offset: Vec3,
    pub passes: usize,
    pub corrections: usize,
    /// Whether a pass found nothing left to correct. `false` means the step budget ran out first
    /// and the capsule may still overlap something.
    pub resolved: bool,
}

/// What [`CollideAndSlide::slide`] does with displacement left over when the bounce budget runs out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect, Serialize, Deserialize)]
#[reflect(Debug, PartialEq, Serialize, Deserialize)]
pub enum BudgetExhaustion {
    /// Add the remainder unchecked. Depenetration is expected to clean up afterwards.
    #[default]
    KeepRemainder,
    /// Drop the remainder; the body stops at the last contact.
    Discard,
}

/// Configuration for a [`CollideAndSlide::slide`].
#[derive(Clone, Debug, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideConfig {
    /// How many contacts a single slide may resolve. Zero means the body never moves.
    pub max_bounces: usize,

    /// A minimal distance to always keep between the capsule and any other colliders.
    /// It is added to every sweep distance and subtracted from every hit distance.
    ///
    /// Increase the value if you notice your character getting stuck in geometry.
    /// Decrease it when you notice jittering, especially around V-shaped walls.
    pub skin_width: f32,

    pub on_budget_exhausted: BudgetExhaustion,

    /// Stop instead of sliding when the clipped displacement points against the wished one.
    pub stop_on_reversal: bool,
}

impl Default for SlideConfig {
    fn default() -> Self {
        Self {
            max_bounces: 5,
            skin_width: DepenetrationConfig::default().skin_width,
            on_budget_exhausted: BudgetExhaustion::default(),
            stop_on_reversal: false,
        }
    }
}

/// Configuration for a [`CollideAndSlide::depenetrate`].
#[derive(Clone, Debug, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepenetrationConfig {
    /// How many passes to run at most.
    pub max_steps: usize,
    /// Margin added to every correction, and to the capsule radius when looking for overlaps.
    pub skin_width: f32,
}

impl Default for DepenetrationConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            skin_width: 0.01,
        }
    }
}

impl From<&SlideConfig> for DepenetrationConfig {
    fn from(config: &SlideConfig) -> Self {
        Self {
            skin_width: config.skin_width,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::char_controller::query::SweepHit;
    use crate::world::{ObstacleId, StaticWorld};
    use core::f32::consts::FRAC_PI_6;

    fn capsule() -> CapsuleShape {
        CapsuleShape::upright(0.5, 2.0).unwrap()
    }

    fn config(max_bounces: usize) -> SlideConfig {
        SlideConfig {
            max_bounces,
            skin_width: 0.01,
            ..Default::default()
        }
    }

    fn slide(world: &StaticWorld, delta: Vec3, config: &SlideConfig) -> SlideResult<ObstacleId> {
        CollideAndSlide::new(world).slide(
            &capsule(),
            Pose::IDENTITY,
            delta,
            config,
            &QueryFilter::default(),
        )
    }

    #[test]
    fn zero_delta_does_nothing() {
        let mut world = StaticWorld::new();
        world.add_plane(Vec3::NEG_X, Vec3::new(1.0, 0.0, 0.0));
        let result = slide(&world, Vec3::ZERO, &config(5));
        assert_eq!(result.out_delta, Vec3::ZERO);
        assert_eq!(result.collision_count(), 0);
        assert_eq!(result.to, result.from);
    }

    #[test]
    fn free_movement_is_exact() {
        let world = StaticWorld::new();
        let delta = Vec3::new(3.25, -1.5, 2.0);
        let result = slide(&world, delta, &config(5));
        assert_eq!(result.out_delta, delta);
        assert_eq!(result.to.position, delta);
        assert!(!result.collided());
    }

    #[test]
    fn zero_bounce_budget_blocks_fully() {
        let world = StaticWorld::new();
        let result = slide(&world, Vec3::X, &config(0));
        assert_eq!(result.out_delta, Vec3::ZERO);
        assert_eq!(result.collision_count(), 0);
    }

    #[test]
    fn stops_at_a_wall_minus_skin() {
        // The wall face is 5 units away from the capsule surface.
        let mut world = StaticWorld::new();
        let wall = world.add_plane(Vec3::NEG_X, Vec3::new(5.5, 0.0, 0.0));

        let result = slide(&world, Vec3::new(10.0, 0.0, 0.0), &config(5));

        assert!((result.out_delta.x - 4.99).abs() < 1e-3, "{:?}", result.out_delta);
        assert!(result.out_delta.y.abs() < 1e-5 && result.out_delta.z.abs() < 1e-5);
        assert_eq!(result.collision_count(), 1);
        let contact = result.collisions[0];
        assert_eq!(contact.collider, wall);
        assert!(contact.normal.abs_diff_eq(Vec3::NEG_X, 1e-5));
        assert_eq!(contact.projected_delta, Vec3::ZERO);
        // Never pushed into the surface it hit.
        assert!(result.out_delta.dot(contact.normal) <= 0.0);
        assert!(result.to.position.x + 0.5 <= 5.5);
    }

    #[test]
    fn slides_along_an_angled_wall() {
        let mut world = StaticWorld::new();
        let normal = Vec3::new(-1.0, 0.0, -1.0).normalize();
        world.add_plane(normal, Vec3::new(3.0, 0.0, 0.0));

        let result = slide(&world, Vec3::new(6.0, 0.0, 0.0), &config(5));

        assert_eq!(result.collision_count(), 1);
        let contact = result.collisions[0];
        // The remainder keeps its tangential part: along +X and -Z.
        assert!(contact.projected_delta.x > 0.0);
        assert!(contact.projected_delta.z < 0.0);
        assert!(contact.projected_delta.dot(normal).abs() < 1e-4);
        assert!(contact.projected_delta.length() <= contact.collision_delta.length() + 1e-5);
        // The body ends on the free side of the wall.
        let sd = (result.to.position - Vec3::new(3.0, 0.0, 0.0)).dot(normal);
        assert!(sd >= 0.5 - 1e-4, "{sd}");
    }

    #[test]
    fn corner_blends_both_walls() {
        let mut world = StaticWorld::new();
        world.add_plane(Vec3::NEG_X, Vec3::new(3.0, 0.0, 0.0));
        world.add_plane(Vec3::NEG_Z, Vec3::new(0.0, 0.0, 2.0));

        let result = slide(&world, Vec3::new(5.0, 0.0, 5.0), &config(2));

        assert_eq!(result.collision_count(), 2);
        let out = result.out_delta;
        assert!(out.is_finite());
        assert!(out.x > 0.5 && out.z > 0.5, "{out:?}");
        assert!(out.x <= 2.5 + 1e-4 && out.z <= 1.5 + 1e-4, "{out:?}");
    }

    #[test]
    fn contacts_lie_along_each_sub_displacement() {
        let mut world = StaticWorld::new();
        world.add_plane(Vec3::NEG_X, Vec3::new(3.0, 0.0, 0.0));
        world.add_plane(Vec3::NEG_Z, Vec3::new(0.0, 0.0, 2.0));
        let result = slide(&world, Vec3::new(5.0, 0.0, 5.0), &config(5));

        let mut from = result.from.position;
        let mut leg = result.in_delta;
        let mut travelled = Vec3::ZERO;
        for contact in &result.collisions {
            let along = contact.collision_position - from;
            assert!(along.length() <= leg.length() + 1e-4);
            if along.length() > 1e-4 {
                assert!(along.normalize().dot(leg.normalize()) > 0.999);
            }
            assert!(contact.in_delta.abs_diff_eq(along, 1e-5));
            travelled += contact.in_delta;
            from = contact.collision_position;
            leg = contact.projected_delta;
        }
        // Whatever is left after the last contact is the free part of the last projected leg.
        let final_leg = result.out_delta - travelled;
        assert!(final_leg.length() <= leg.length() + 1e-4);
    }

    #[test]
    fn shallow_approach_does_not_tunnel_into_a_box() {
        let mut world = StaticWorld::new();
        // The -Z face of a long box, 1.0 beyond the capsule surface.
        let wall = world.add_cuboid(
            Vec3::new(500.0, 0.0, 2.5),
            Vec3::new(600.0, 3.0, 1.0),
            Quat::IDENTITY,
        );
        let config = SlideConfig {
            skin_width: 0.001,
            ..config(5)
        };
        let delta = Vec3::new(1.0, 0.0, 0.002).normalize() * 1000.0;

        let result = slide(&world, delta, &config);

        assert!(result.collided());
        assert_eq!(result.collisions[0].collider, wall);
        let surface = result.to.position.z + 0.5;
        assert!(surface <= 1.5 + 1e-4, "capsule surface at z = {surface}");
        assert!(result.out_delta.x > 990.0, "{:?}", result.out_delta);
    }

    fn wedge() -> StaticWorld {
        // Two walls meeting at (10, 0, 0) with a 60 degree opening towards -X.
        let apex = Vec3::new(10.0, 0.0, 0.0);
        let (sin, cos) = FRAC_PI_6.sin_cos();
        let mut world = StaticWorld::new();
        world.add_plane(Vec3::new(-sin, 0.0, -cos), apex);
        world.add_plane(Vec3::new(-sin, 0.0, cos), apex);
        world
    }

    #[test]
    fn wedge_corner_terminates_at_the_budget() {
        let world = wedge();
        let start = Pose::from_position(Vec3::new(0.0, 0.0, 0.3));
        let result = CollideAndSlide::new(&world).slide(
            &capsule(),
            start,
            Vec3::new(20.0, 0.0, 0.0),
            &config(5),
            &QueryFilter::default(),
        );
        assert_eq!(result.collision_count(), 5);
        assert!(result.out_delta.is_finite());
    }

    #[test]
    fn discarded_remainder_stays_inside_the_wedge() {
        let world = wedge();
        let start = Pose::from_position(Vec3::new(0.0, 0.0, 0.3));
        let config = SlideConfig {
            on_budget_exhausted: BudgetExhaustion::Discard,
            ..config(5)
        };
        let result = CollideAndSlide::new(&world).slide(
            &capsule(),
            start,
            Vec3::new(20.0, 0.0, 0.0),
            &config,
            &QueryFilter::default(),
        );
        assert_eq!(result.collision_count(), 5);
        let end = result.to.position;
        let mut overlaps = Vec::new();
        world.overlap_capsule(
            &capsule().segment(result.to),
            &QueryFilter::default(),
            &mut overlaps,
        );
        assert!(overlaps.is_empty(), "{end:?} overlaps {overlaps:?}");
    }

    #[test]
    fn stop_on_reversal_halts_backwards_slides() {
        let mut world = StaticWorld::new();
        // The first wall deflects the body towards -Z, the second one folds back towards -X.
        world.add_plane(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(2.0, 0.0, 0.0));
        world.add_plane(Vec3::new(-0.8, 0.0, 0.6), Vec3::new(3.0, 0.0, -1.0));
        let desired = Vec3::new(6.0, 0.0, 0.0);

        let stopping = SlideConfig {
            stop_on_reversal: true,
            ..config(5)
        };
        let result = slide(&world, desired, &stopping);

        assert_eq!(result.collision_count(), 2);
        assert!(result.collisions[0].projected_delta.dot(desired) > 0.0);
        assert!(result.collisions[1].projected_delta.dot(desired) < 0.0);
        let travelled: Vec3 = result.collisions.iter().map(|c| c.in_delta).sum();
        assert!(result.out_delta.abs_diff_eq(travelled, 1e-6));

        let sliding = slide(&world, desired, &config(5));
        assert!(sliding.collision_count() >= 2);
        assert!(sliding.out_delta.x < travelled.x);
    }

    struct BrokenQuery;

    impl ShapeQuery for BrokenQuery {
        type Collider = u32;

        fn sweep_capsule(
            &self,
            _capsule: &CapsuleSegment,
            _direction: Dir3,
            _max_distance: f32,
            _filter: &QueryFilter<u32>,
        ) -> Option<SweepHit<u32>> {
            Some(SweepHit {
                distance: 0.5,
                point: Vec3::ZERO,
                normal: Vec3::splat(f32::NAN),
                collider: 1,
            })
        }

        fn overlap_capsule(
            &self,
            _capsule: &CapsuleSegment,
            _filter: &QueryFilter<u32>,
            out: &mut Vec<u32>,
        ) {
            out.push(1);
        }

        fn compute_penetration(
            &self,
            _capsule: &CapsuleSegment,
            _collider: u32,
        ) -> Option<Penetration> {
            Some(Penetration {
                direction: Dir3::X,
                depth: f32::INFINITY,
            })
        }
    }

    #[test]
    fn malformed_query_data_fails_open() {
        let solver = CollideAndSlide::new(BrokenQuery);
        let delta = Vec3::new(0.0, 0.0, 2.0);
        let result = solver.slide(&capsule(), Pose::IDENTITY, delta, &config(5), &QueryFilter::default());
        assert_eq!(result.out_delta, delta);
        assert!(!result.collided());

        let depenetration = solver.depenetrate(
            &capsule(),
            Pose::IDENTITY,
            &DepenetrationConfig::default(),
            &QueryFilter::default(),
        );
        assert_eq!(depenetration.offset, Vec3::ZERO);
        assert!(depenetration.resolved);
    }

    #[test]
    fn projection_never_grows() {
        let direction = Dir3::new(Vec3::new(1.0, 0.2, -0.3)).unwrap();
        let normal = Vec3::new(-0.3, 1.0, 0.1).normalize();
        let projected = project_on_plane(direction, normal, 2.0);
        assert!(projected.length() <= 2.0);
        assert!(projected.dot(normal).abs() < 1e-5);

        assert_eq!(project_on_plane(Dir3::X, Vec3::NEG_X, 3.0), Vec3::ZERO);
    }

    fn box_overlapping_by(depth: f32) -> (StaticWorld, ObstacleId) {
        let mut world = StaticWorld::new();
        // The box face sits at x = 0.5 - depth, inside the capsule's side.
        let half = Vec3::new(0.5, 2.0, 2.0);
        let id = world.add_cuboid(Vec3::new(1.0 - depth, 0.0, 0.0), half, Quat::IDENTITY);
        (world, id)
    }

    #[test]
    fn depenetrates_out_of_a_box() {
        let (world, _) = box_overlapping_by(0.1);
        let solver = CollideAndSlide::new(&world);
        let config = DepenetrationConfig {
            max_steps: 5,
            skin_width: 0.01,
        };
        let result = solver.depenetrate(&capsule(), Pose::IDENTITY, &config, &QueryFilter::default());

        assert!(result.resolved);
        assert!(result.offset.x < 0.0);
        assert!(result.offset.y.abs() < 1e-4 && result.offset.z.abs() < 1e-4);
        assert!((result.offset.x + 0.11).abs() < 1e-3, "{:?}", result.offset);

        let capsule_after = capsule().segment(Pose::from_position(result.position));
        let mut overlaps = Vec::new();
        world.overlap_capsule(&capsule_after, &QueryFilter::default(), &mut overlaps);
        for collider in overlaps {
            let residual = world
                .compute_penetration(&capsule_after, collider)
                .map_or(0.0, |p| p.depth);
            assert!(residual <= 1e-4);
        }
    }

    #[test]
    fn depenetration_is_idempotent_once_resolved() {
        let (world, _) = box_overlapping_by(0.1);
        let solver = CollideAndSlide::new(&world);
        let config = DepenetrationConfig::default();
        let first = solver.depenetrate(&capsule(), Pose::IDENTITY, &config, &QueryFilter::default());
        let second = solver.depenetrate(
            &capsule(),
            Pose::from_position(first.position),
            &config,
            &QueryFilter::default(),
        );
        assert_eq!(second.offset, Vec3::ZERO);
        assert_eq!(second.corrections, 0);
        assert!(second.resolved);
    }

    #[test]
    fn depenetration_skips_excluded_colliders() {
        let (world, id) = box_overlapping_by(0.2);
        let solver = CollideAndSlide::new(&world);
        let filter = QueryFilter::default().with_excluded([id]);
        let result = solver.depenetrate(
            &capsule(),
            Pose::IDENTITY,
            &DepenetrationConfig::default(),
            &filter,
        );
        assert_eq!(result.offset, Vec3::ZERO);
    }

    #[test]
    fn depenetration_reports_each_step_deepest_first() {
        let mut world = StaticWorld::new();
        let floor = world.add_plane(Vec3::Y, Vec3::new(0.0, -0.9, 0.0));
        let wall = world.add_plane(Vec3::NEG_X, Vec3::new(0.3, 0.0, 0.0));
        let solver = CollideAndSlide::new(&world);

        let mut steps = Vec::new();
        let result = solver.depenetrate_with(
            &capsule(),
            Pose::IDENTITY,
            &DepenetrationConfig::default(),
            &QueryFilter::default(),
            |step| steps.push(*step),
        );

        assert!(result.resolved);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].collider, wall);
        assert_eq!(steps[1].collider, floor);
        assert!((steps[0].depth - 0.2).abs() < 1e-4);
        assert!((steps[1].depth - 0.1).abs() < 1e-4);
        assert!(result.position.x < -0.2 && result.position.y > 0.1);
    }
}
