//! Capsule geometry for character bodies.
//!
//! A [`CapsuleShape`] is described the way character rigs usually describe it: a total height
//! (caps included), a radius, a local center offset and the principal axis the capsule is aligned
//! to. The solver never works with that description directly. Every query is made with a
//! [`CapsuleSegment`], the world-space inner segment plus radius, obtained from a shape and a [`Pose`].
use bevy::math::{Quat, Vec3};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a capsule is built or resized with unusable dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ShapeError {
    #[error("capsule radius must be positive, got {0}")]
    NonPositiveRadius(f32),
    #[error("capsule height must be positive, got {0}")]
    NonPositiveHeight(f32),
    #[error("capsule dimensions and center must be finite")]
    NonFinite,
}

/// The local axis a capsule is aligned to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect, Serialize, Deserialize)]
#[reflect(Debug, PartialEq, Serialize, Deserialize)]
pub enum CapsuleAxis {
    X,
    #[default]
    Y,
    Z,
}

impl CapsuleAxis {
    /// The unit vector of this axis in the capsule's local space.
    pub const fn local(self) -> Vec3 {
        match self {
            CapsuleAxis::X => Vec3::X,
            CapsuleAxis::Y => Vec3::Y,
            CapsuleAxis::Z => Vec3::Z,
        }
    }
}

/// Position and orientation of a character body.
#[derive(Clone, Copy, Debug, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub const fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Returns the same orientation at `position + offset`.
    #[must_use]
    pub fn translated(self, offset: Vec3) -> Self {
        Self {
            position: self.position + offset,
            ..self
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Transform> for Pose {
    fn from(transform: Transform) -> Self {
        Self::new(transform.translation, transform.rotation)
    }
}

/// Raw capsule description, validated into a [`CapsuleShape`] on deserialization.
#[derive(Clone, Copy, Debug, Deserialize)]
struct CapsuleDef {
    radius: f32,
    height: f32,
    #[serde(default)]
    center: Vec3,
    #[serde(default)]
    axis: CapsuleAxis,
}

impl TryFrom<CapsuleDef> for CapsuleShape {
    type Error = ShapeError;

    fn try_from(def: CapsuleDef) -> Result<Self, Self::Error> {
        CapsuleShape::new(def.radius, def.height, def.center, def.axis)
    }
}

/// A character capsule: a cylinder of `height - 2 * radius` capped by two hemispheres.
///
/// Dimensions are always strictly positive and finite; the constructor and [`CapsuleShape::resize`]
/// reject anything else.
#[derive(Clone, Copy, Debug, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CapsuleDef")]
pub struct CapsuleShape {
    radius: f32,
    height: f32,
    center: Vec3,
    axis: CapsuleAxis,
}

impl Default for CapsuleShape {
    /// An upright capsule one unit wide and two units tall.
    fn default() -> Self {
        Self {
            radius: 0.5,
            height: 2.0,
            center: Vec3::ZERO,
            axis: CapsuleAxis::Y,
        }
    }
}

impl CapsuleShape {
    pub fn new(radius: f32, height: f32, center: Vec3, axis: CapsuleAxis) -> Result<Self, ShapeError> {
        validate(radius, height, center)?;
        Ok(Self {
            radius,
            height,
            center,
            axis,
        })
    }

    /// An upright capsule centered on the body origin.
    pub fn upright(radius: f32, height: f32) -> Result<Self, ShapeError> {
        Self::new(radius, height, Vec3::ZERO, CapsuleAxis::Y)
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn axis(&self) -> CapsuleAxis {
        self.axis
    }

    /// Changes the capsule dimensions, e.g. when crouching. The shape is left untouched on error.
    pub fn resize(&mut self, radius: f32, height: f32) -> Result<(), ShapeError> {
        validate(radius, height, self.center)?;
        self.radius = radius;
        self.height = height;
        Ok(())
    }

    pub fn set_center(&mut self, center: Vec3) -> Result<(), ShapeError> {
        validate(self.radius, self.height, center)?;
        self.center = center;
        Ok(())
    }

    /// Half the length of the inner segment. Zero when the capsule degenerates into a ball.
    pub fn half_segment(&self) -> f32 {
        (self.height * 0.5 - self.radius).max(0.0)
    }

    /// The world-space segment of this capsule when its body is at `pose`.
    pub fn segment(&self, pose: Pose) -> CapsuleSegment {
        let center = pose.position + pose.rotation * self.center;
        let axis = pose.rotation * self.axis.local();
        let half = axis * self.half_segment();
        CapsuleSegment {
            point1: center + half,
            point2: center - half,
            radius: self.radius,
        }
    }
}

fn validate(radius: f32, height: f32, center: Vec3) -> Result<(), ShapeError> {
    if !radius.is_finite() || !height.is_finite() || !center.is_finite() {
        return Err(ShapeError::NonFinite);
    }
    if radius <= 0.0 {
        return Err(ShapeError::NonPositiveRadius(radius));
    }
    if height <= 0.0 {
        return Err(ShapeError::NonPositiveHeight(height));
    }
    Ok(())
}

/// A capsule in world space: the inner segment `point1..point2` swept by a ball of `radius`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapsuleSegment {
    /// The top endpoint of the inner segment.
    pub point1: Vec3,
    /// The bottom endpoint of the inner segment.
    pub point2: Vec3,
    pub radius: f32,
}

impl CapsuleSegment {
    pub fn center(&self) -> Vec3 {
        (self.point1 + self.point2) * 0.5
    }

    /// The same capsule moved by `offset`.
    #[must_use]
    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            point1: self.point1 + offset,
            point2: self.point2 + offset,
            radius: self.radius,
        }
    }

    /// The same capsule with its radius grown by `margin`.
    #[must_use]
    pub fn inflated(&self, margin: f32) -> Self {
        Self {
            radius: self.radius + margin,
            ..*self
        }
    }

    /// The point of the inner segment at parameter `t` in `[0, 1]`, from `point2` to `point1`.
    pub fn lerp(&self, t: f32) -> Vec3 {
        self.point2.lerp(self.point1, t)
    }
}
