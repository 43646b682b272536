//! Utilities for implementing kinematic capsule character controllers.

pub mod body;
pub mod capsule;
pub mod collide_and_slide;
pub mod query;

/// Re-exports common types related to character controller functionality.
pub mod prelude {
    pub use super::body::{BodySettings, CharacterBody, TeleportResult};
    pub use super::capsule::{CapsuleAxis, CapsuleSegment, CapsuleShape, Pose, ShapeError};
    pub use super::collide_and_slide::{
        BudgetExhaustion, CollideAndSlide, DepenetrationConfig, DepenetrationResult,
        DepenetrationStep, SlideCollision, SlideConfig, SlideHit, SlideResult,
    };
    pub use super::query::{ALL_LAYERS, Penetration, QueryFilter, ShapeQuery, SweepHit};
}
