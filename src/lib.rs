//! Kinematic capsule character bodies: collide and slide, depenetration, and the glue to run
//! them inside a Bevy app on top of avian3d.
//!
//! The solver in [`char_controller`] only talks to the world through
//! [`ShapeQuery`](char_controller::query::ShapeQuery). [`world::StaticWorld`] implements it for
//! a small in-memory scene, [`physics::AvianShapeQuery`] for avian's spatial query pipeline.

pub mod char_controller;
pub mod config;
pub mod physics;
pub mod world;

use bevy::prelude::*;

pub mod prelude {
    pub use crate::CharacterPhysicsPlugin;
    pub use crate::char_controller::prelude::*;
    pub use crate::config::{CharacterBodyConfig, ConfigError};
    pub use crate::physics::{AvianShapeQuery, KinematicCharacter, LastMove, MovementIntent};
    pub use crate::world::{Obstacle, ObstacleId, StaticWorld};
}

/// Moves every [`KinematicCharacter`](physics::KinematicCharacter) in `FixedUpdate`.
///
/// Expects avian's `PhysicsPlugins` to be added as well.
pub struct CharacterPhysicsPlugin;

impl Plugin for CharacterPhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(physics::plugin);
    }
}
