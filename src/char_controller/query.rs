//! The shape queries the solver needs from a collision backend.
//!
//! [`ShapeQuery`] is the only seam between the movement code and the world: anything that can sweep,
//! overlap and measure penetration of a capsule can drive [`CollideAndSlide`](super::collide_and_slide::CollideAndSlide).
use core::fmt::Debug;

use bevy::math::{Dir3, Vec3};

use super::capsule::CapsuleSegment;

/// Every layer bit set.
pub const ALL_LAYERS: u32 = u32::MAX;

/// Tolerance below zero accepted for a sweep distance before the hit is considered malformed.
const DISTANCE_TOLERANCE: f32 = 1e-4;

/// Which colliders a query is allowed to report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFilter<C> {
    /// Colliders are only considered when their layer bits intersect this mask.
    pub mask: u32,
    /// Colliders that are never reported, typically the body's own collider.
    pub excluded: Vec<C>,
}

impl<C: PartialEq> QueryFilter<C> {
    pub fn from_mask(mask: u32) -> Self {
        Self {
            mask,
            excluded: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_excluded(mut self, colliders: impl IntoIterator<Item = C>) -> Self {
        self.excluded.extend(colliders);
        self
    }

    /// Whether a collider with the given layer bits passes this filter.
    pub fn test(&self, collider: &C, layers: u32) -> bool {
        layers & self.mask != 0 && !self.excluded.contains(collider)
    }
}

impl<C> Default for QueryFilter<C> {
    fn default() -> Self {
        Self {
            mask: ALL_LAYERS,
            excluded: Vec::new(),
        }
    }
}

/// The first contact found by [`ShapeQuery::sweep_capsule`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepHit<C> {
    /// Distance travelled along the sweep direction until the capsule touches the collider.
    pub distance: f32,
    /// The contact point on the hit collider, in world space.
    pub point: Vec3,
    /// The outward surface normal of the hit collider at `point`.
    pub normal: Vec3,
    pub collider: C,
}

impl<C> SweepHit<C> {
    /// Checks the hit for data the solver cannot work with.
    ///
    /// Returns `None` for non-finite values, a degenerate normal or a distance that is negative
    /// or past `max_distance`. The returned hit has a unit normal and a non-negative distance.
    pub fn sanitized(self, max_distance: f32) -> Option<Self> {
        if !self.distance.is_finite() || !self.point.is_finite() {
            return None;
        }
        if self.distance < -DISTANCE_TOLERANCE || self.distance > max_distance + DISTANCE_TOLERANCE {
            return None;
        }
        let normal = self.normal.try_normalize()?;
        Some(Self {
            distance: self.distance.clamp(0.0, max_distance),
            normal,
            ..self
        })
    }
}

/// How far and in which direction a capsule has to move to stop overlapping a collider.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Penetration {
    /// Direction the capsule has to move along.
    pub direction: Dir3,
    /// Positive overlap depth along `direction`.
    pub depth: f32,
}

/// Capsule queries against a collision world.
///
/// Implementations only need shared access, so a read-only world can serve several characters
/// at once.
pub trait ShapeQuery {
    /// Identifies a collider in the world.
    type Collider: Copy + Eq + Debug;

    /// Sweeps `capsule` along `direction` up to `max_distance` and returns the closest hit.
    ///
    /// A capsule that already touches or overlaps a collider in the sweep direction reports a hit
    /// at distance zero.
    fn sweep_capsule(
        &self,
        capsule: &CapsuleSegment,
        direction: Dir3,
        max_distance: f32,
        filter: &QueryFilter<Self::Collider>,
    ) -> Option<SweepHit<Self::Collider>>;

    /// Pushes every collider overlapping `capsule` into `out`.
    fn overlap_capsule(
        &self,
        capsule: &CapsuleSegment,
        filter: &QueryFilter<Self::Collider>,
        out: &mut Vec<Self::Collider>,
    );

    /// Computes how `capsule` penetrates `collider`, or `None` if they are separated.
    fn compute_penetration(
        &self,
        capsule: &CapsuleSegment,
        collider: Self::Collider,
    ) -> Option<Penetration>;
}

impl<Q: ShapeQuery + ?Sized> ShapeQuery for &Q {
    type Collider = Q::Collider;

    fn sweep_capsule(
        &self,
        capsule: &CapsuleSegment,
        direction: Dir3,
        max_distance: f32,
        filter: &QueryFilter<Self::Collider>,
    ) -> Option<SweepHit<Self::Collider>> {
        (**self).sweep_capsule(capsule, direction, max_distance, filter)
    }

    fn overlap_capsule(
        &self,
        capsule: &CapsuleSegment,
        filter: &QueryFilter<Self::Collider>,
        out: &mut Vec<Self::Collider>,
    ) {
        (**self).overlap_capsule(capsule, filter, out);
    }

    fn compute_penetration(
        &self,
        capsule: &CapsuleSegment,
        collider: Self::Collider,
    ) -> Option<Penetration> {
        (**self).compute_penetration(capsule, collider)
    }
}
