// Support configuring Bevy lints within code.
#![cfg_attr(bevy_lint, feature(register_tool), register_tool(bevy))]

//! Headless demo: walks a capsule around a small seeded level for a fixed number of ticks
//! and logs what the slides ran into.

use std::time::Duration;

use avian3d::prelude::*;
use bevy::{log::LogPlugin, prelude::*, time::TimeUpdateStrategy};
use capsule_kcc::physics::capsule_collider;
use capsule_kcc::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

const TICKS: usize = 640;
const TICK_RATE: f64 = 64.0;
const LEVEL_SEED: u64 = 0x5EED;
const CONFIG_PATH: &str = "assets/characters/player.ron";
const WALK_SPEED: f32 = 4.0;
const MAX_SLOPE: f32 = 0.8;

#[derive(Component)]
struct Player;

fn main() -> AppExit {
    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins,
        LogPlugin::default(),
        TransformPlugin,
        PhysicsPlugins::default(),
        CharacterPhysicsPlugin,
    ))
    // One fixed tick per update, independent of the wall clock.
    .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f64(
        1.0 / TICK_RATE,
    )))
    .insert_resource(Time::<Fixed>::from_hz(TICK_RATE))
    .add_systems(Startup, (spawn_level, spawn_player))
    .add_systems(FixedPreUpdate, steer_player)
    .add_systems(FixedPostUpdate, report_moves);

    app.finish();
    app.cleanup();
    for _ in 0..TICKS {
        app.update();
    }

    let mut players = app
        .world_mut()
        .query_filtered::<&Transform, With<Player>>();
    for transform in players.iter(app.world()) {
        info!("Player finished at {}", transform.translation);
    }
    AppExit::Success
}

fn spawn_level(mut commands: Commands) {
    commands.spawn((
        Name::new("Floor"),
        RigidBody::Static,
        Collider::cuboid(40.0, 1.0, 40.0),
        Transform::from_xyz(0.0, -0.5, 0.0),
    ));

    for (name, position, size) in [
        ("North wall", Vec3::new(0.0, 2.0, -20.0), Vec3::new(40.0, 4.0, 1.0)),
        ("South wall", Vec3::new(0.0, 2.0, 20.0), Vec3::new(40.0, 4.0, 1.0)),
        ("East wall", Vec3::new(20.0, 2.0, 0.0), Vec3::new(1.0, 4.0, 40.0)),
        ("West wall", Vec3::new(-20.0, 2.0, 0.0), Vec3::new(1.0, 4.0, 40.0)),
    ] {
        commands.spawn((
            Name::new(name),
            RigidBody::Static,
            Collider::cuboid(size.x, size.y, size.z),
            Transform::from_translation(position),
        ));
    }

    commands.spawn((
        Name::new("Ramp"),
        RigidBody::Static,
        Collider::cuboid(6.0, 0.5, 4.0),
        Transform::from_xyz(8.0, 0.8, 0.0).with_rotation(Quat::from_rotation_z(0.3)),
    ));

    let mut rng = StdRng::seed_from_u64(LEVEL_SEED);
    for i in 0..12 {
        let position = Vec3::new(
            rng.random_range(-16.0..16.0),
            1.5,
            rng.random_range(-16.0..16.0),
        );
        // Keep the spawn point clear.
        if position.xz().length() < 3.0 {
            continue;
        }
        commands.spawn((
            Name::new(format!("Pillar {i}")),
            RigidBody::Static,
            Collider::cylinder(rng.random_range(0.3..1.2), 3.0),
            Transform::from_translation(position),
        ));
    }
}

fn spawn_player(mut commands: Commands) {
    let config = CharacterBodyConfig::load_or_default(CONFIG_PATH);
    commands.spawn((
        Name::new("Player"),
        Player,
        capsule_collider(&config.capsule),
        RigidBody::Kinematic,
        KinematicCharacter::new(config.capsule, config.settings),
        Transform::from_xyz(0.0, config.capsule.height() * 0.5 + 0.05, 0.0),
    ));
}

//walk in a slow circle and keep pressing into the floor
fn steer_player(time: Res<Time>, mut intents: Query<&mut MovementIntent, With<Player>>) {
    let angle = time.elapsed_secs() * 0.5;
    for mut intent in &mut intents {
        intent.velocity =
            Vec3::new(angle.cos(), 0.0, angle.sin()) * WALK_SPEED + Vec3::NEG_Y * 2.0;
    }
}

fn report_moves(
    mut tick: Local<usize>,
    moves: Query<(&Name, &Transform, &LastMove), Changed<LastMove>>,
    names: Query<&Name>,
) {
    *tick += 1;
    for (name, transform, last) in &moves {
        for collision in &last.slide.collisions {
            let other = names
                .get(collision.collider)
                .map_or("<unnamed>", |name| name.as_str());
            debug!("{name} touched {other} at {}", collision.point);
        }
        if *tick % 32 == 0 {
            info!(
                "tick {}: {name} at {:.2}, {} contacts, grounded: {}, depenetrated by {:.3}",
                *tick,
                transform.translation,
                last.slide.collision_count(),
                last.grounded(MAX_SLOPE),
                last.depenetration.offset.length(),
            );
        }
    }
}
