//! A character body: one capsule, its pose, and the per-tick movement calls made on it.
use core::fmt::Debug;

use bevy::math::{Quat, Vec3};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::capsule::{CapsuleShape, Pose};
use super::collide_and_slide::{
    CollideAndSlide, DepenetrationConfig, DepenetrationResult, SlideConfig, SlideResult,
};
use super::query::{ALL_LAYERS, QueryFilter, ShapeQuery};

/// Movement settings of a [`CharacterBody`].
#[derive(Clone, Debug, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodySettings {
    pub slide: SlideConfig,
    pub depenetration: DepenetrationConfig,
    /// Layers the body collides with.
    pub collision_mask: u32,
}

impl Default for BodySettings {
    fn default() -> Self {
        let slide = SlideConfig::default();
        Self {
            depenetration: DepenetrationConfig::from(&slide),
            slide,
            collision_mask: ALL_LAYERS,
        }
    }
}

/// Output of [`CharacterBody::teleport`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeleportResult {
    pub from: Pose,
    pub to: Pose,
}

/// The body of one character.
///
/// Owns the capsule and the pose; every movement goes through [`CollideAndSlide`] against the
/// [`ShapeQuery`] passed to the call. `C` is the collider id type of that query. When the body
/// has a collider of its own in the world, set it with [`CharacterBody::with_own_collider`] so
/// it never collides with itself.
///
/// Calls on one body must not overlap; different bodies are independent.
#[derive(Clone, Debug, PartialEq)]
pub struct CharacterBody<C> {
    shape: CapsuleShape,
    pose: Pose,
    settings: BodySettings,
    own_collider: Option<C>,
}

impl<C: Copy + Eq + Debug> CharacterBody<C> {
    pub fn new(shape: CapsuleShape, pose: Pose, settings: BodySettings) -> Self {
        Self {
            shape,
            pose,
            settings,
            own_collider: None,
        }
    }

    #[must_use]
    pub fn with_own_collider(mut self, collider: C) -> Self {
        self.own_collider = Some(collider);
        self
    }

    pub fn set_own_collider(&mut self, collider: Option<C>) {
        self.own_collider = collider;
    }

    pub fn own_collider(&self) -> Option<C> {
        self.own_collider
    }

    pub fn shape(&self) -> &CapsuleShape {
        &self.shape
    }

    /// Swaps the capsule between ticks, e.g. to crouch. No overlap check is made; call
    /// [`CharacterBody::apply_changes`] afterwards if the new shape may intersect something.
    pub fn set_shape(&mut self, shape: CapsuleShape) {
        self.shape = shape;
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn position(&self) -> Vec3 {
        self.pose.position
    }

    pub fn rotation(&self) -> Quat {
        self.pose.rotation
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.pose.rotation = rotation;
    }

    /// Overwrites the pose with one read back from the outside, e.g. the physics engine.
    pub fn sync_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    pub fn settings(&self) -> &BodySettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut BodySettings {
        &mut self.settings
    }

    /// The filter every query made for this body uses.
    pub fn filter(&self) -> QueryFilter<C> {
        QueryFilter::from_mask(self.settings.collision_mask).with_excluded(self.own_collider)
    }

    /// Computes where `delta` would take the body without moving it.
    #[must_use]
    pub fn compute_movement<Q>(&self, query: &Q, delta: Vec3) -> SlideResult<C>
    where
        Q: ShapeQuery<Collider = C> + ?Sized,
    {
        CollideAndSlide::new(query).slide(
            &self.shape,
            self.pose,
            delta,
            &self.settings.slide,
            &self.filter(),
        )
    }

    /// Moves the body by up to `delta`, sliding along whatever it hits.
    ///
    /// With `apply == false` this is the same as [`CharacterBody::compute_movement`].
    pub fn add_movement<Q>(&mut self, query: &Q, delta: Vec3, apply: bool) -> SlideResult<C>
    where
        Q: ShapeQuery<Collider = C> + ?Sized,
    {
        let result = self.compute_movement(query, delta);
        if apply {
            self.pose = result.to;
        }
        result
    }

    /// Moves the body with `velocity` for `delta_time` seconds.
    pub fn slide_and_collide<Q>(
        &mut self,
        query: &Q,
        velocity: Vec3,
        delta_time: f32,
        apply: bool,
    ) -> SlideResult<C>
    where
        Q: ShapeQuery<Collider = C> + ?Sized,
    {
        self.add_movement(query, velocity * delta_time, apply)
    }

    /// Places the body at `point` without any collision check, keeping its rotation.
    pub fn teleport(&mut self, point: Vec3, apply: bool) -> TeleportResult {
        let from = self.pose;
        let to = Pose::new(point, from.rotation);
        if apply {
            self.pose = to;
        }
        TeleportResult { from, to }
    }

    /// Pushes the body out of anything it overlaps and commits the corrected position.
    pub fn apply_changes<Q>(&mut self, query: &Q) -> DepenetrationResult
    where
        Q: ShapeQuery<Collider = C> + ?Sized,
    {
        let result = CollideAndSlide::new(query).depenetrate(
            &self.shape,
            self.pose,
            &self.settings.depenetration,
            &self.filter(),
        );
        self.pose.position = result.position;
        result
    }
}
