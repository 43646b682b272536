//! Runs character bodies against the avian3d collision world.
//!
//! [`AvianShapeQuery`] answers the [`ShapeQuery`] calls of the solver from avian's
//! [`SpatialQueryPipeline`], and the systems in this module move every [`KinematicCharacter`]
//! once per fixed tick.
use avian3d::{collision::collider::contact_query::contact_manifolds, prelude::*};
use bevy::{ecs::system::SystemParam, math::Dir3, prelude::*};

use crate::char_controller::prelude::*;

/// A [`SystemParam`] exposing avian's spatial queries as a [`ShapeQuery`].
///
/// Colliders are identified by their [`Entity`]. Layer masks are tested against the
/// memberships of the collider's [`CollisionLayers`], like avian's own [`SpatialQueryFilter`].
#[derive(SystemParam)]
pub struct AvianShapeQuery<'w, 's> {
    /// The [`SpatialQueryPipeline`] used to perform spatial queries.
    pub query_pipeline: Res<'w, SpatialQueryPipeline>,
    /// The [`Query`] used to query colliders.
    pub colliders: Query<
        'w,
        's,
        (
            &'static Collider,
            &'static Position,
            &'static Rotation,
            Option<&'static CollisionLayers>,
        ),
    >,
}

impl AvianShapeQuery<'_, '_> {
    /// Calls `callback` with every contact manifold between `capsule` and the colliders whose
    /// bounds come within `prediction_distance` of it.
    fn manifolds(
        &self,
        capsule: &CapsuleSegment,
        prediction_distance: f32,
        filter: &QueryFilter<Entity>,
        mut callback: impl FnMut(Entity, &ContactManifold),
    ) {
        let (shape, origin) = segment_collider(capsule);
        let expanded_aabb = shape
            .aabb(origin, Quat::IDENTITY)
            .grow(Vec3::splat(prediction_distance));
        let mut manifolds = Vec::new();
        for entity in self
            .query_pipeline
            .aabb_intersections_with_aabb(expanded_aabb)
        {
            let Ok((_, _, _, layers)) = self.colliders.get(entity) else {
                continue;
            };
            let layers = layers.copied().unwrap_or_default();
            if !filter.test(&entity, layers.memberships.0) {
                continue;
            }
            manifolds.clear();
            self.manifolds_with(&shape, origin, entity, prediction_distance, &mut manifolds);
            for manifold in &manifolds {
                callback(entity, manifold);
            }
        }
    }

    /// Contact manifolds between the capsule `shape` placed at `origin` and one collider.
    fn manifolds_with(
        &self,
        shape: &Collider,
        origin: Vec3,
        entity: Entity,
        prediction_distance: f32,
        out: &mut Vec<ContactManifold>,
    ) {
        let Ok((collider, position, rotation, _)) = self.colliders.get(entity) else {
            return;
        };
        contact_manifolds(
            shape,
            origin,
            Quat::IDENTITY,
            collider,
            *position,
            *rotation,
            prediction_distance,
            out,
        );
    }
}

impl ShapeQuery for AvianShapeQuery<'_, '_> {
    type Collider = Entity;

    fn sweep_capsule(
        &self,
        capsule: &CapsuleSegment,
        direction: Dir3,
        max_distance: f32,
        filter: &QueryFilter<Entity>,
    ) -> Option<SweepHit<Entity>> {
        let (shape, origin) = segment_collider(capsule);
        let shape_hit = self.query_pipeline.cast_shape(
            &shape,
            origin,
            Quat::IDENTITY,
            direction,
            &ShapeCastConfig::from_max_distance(max_distance),
            &spatial_filter(filter),
        )?;
        Some(SweepHit {
            distance: shape_hit.distance,
            point: shape_hit.point1,
            normal: shape_hit.normal1,
            collider: shape_hit.entity,
        })
    }

    fn overlap_capsule(
        &self,
        capsule: &CapsuleSegment,
        filter: &QueryFilter<Entity>,
        out: &mut Vec<Entity>,
    ) {
        self.manifolds(capsule, 0.0, filter, |entity, manifold| {
            let touching = manifold
                .find_deepest_contact()
                .is_some_and(|contact| contact.penetration >= 0.0);
            if touching && !out.contains(&entity) {
                out.push(entity);
            }
        });
    }

    fn compute_penetration(&self, capsule: &CapsuleSegment, collider: Entity) -> Option<Penetration> {
        let (shape, origin) = segment_collider(capsule);
        let mut manifolds = Vec::new();
        self.manifolds_with(&shape, origin, collider, 0.0, &mut manifolds);

        let mut deepest: Option<Penetration> = None;
        for manifold in &manifolds {
            let Some(contact) = manifold.find_deepest_contact() else {
                continue;
            };
            // The manifold normal points from the capsule into the other collider.
            let Ok(direction) = Dir3::new(-manifold.normal) else {
                continue;
            };
            if contact.penetration > deepest.map_or(0.0, |p| p.depth) {
                deepest = Some(Penetration {
                    direction,
                    depth: contact.penetration,
                });
            }
        }
        deepest
    }
}

/// Builds an avian [`Collider`] for `capsule`, along with the position it has to be placed at.
fn segment_collider(capsule: &CapsuleSegment) -> (Collider, Vec3) {
    let origin = capsule.center();
    let shape = Collider::capsule_endpoints(
        capsule.radius,
        capsule.point1 - origin,
        capsule.point2 - origin,
    );
    (shape, origin)
}

/// The avian [`Collider`] matching `shape` in the body's local space.
pub fn capsule_collider(shape: &CapsuleShape) -> Collider {
    let segment = shape.segment(Pose::IDENTITY);
    Collider::capsule_endpoints(segment.radius, segment.point1, segment.point2)
}

/// Converts a [`QueryFilter`] to avian's [`SpatialQueryFilter`].
pub fn spatial_filter(filter: &QueryFilter<Entity>) -> SpatialQueryFilter {
    SpatialQueryFilter::from_mask(LayerMask(filter.mask))
        .with_excluded_entities(filter.excluded.iter().copied())
}

/// A character moved by collide and slide every fixed tick.
///
/// The entity's [`Transform`] is the source of truth for the body's pose: it is read before
/// the move and written back after it. If the entity also carries a [`Collider`], it is
/// excluded from the body's queries automatically.
#[derive(Component, Clone, Debug)]
#[require(Transform, MovementIntent)]
pub struct KinematicCharacter {
    pub body: CharacterBody<Entity>,
}

impl KinematicCharacter {
    pub fn new(shape: CapsuleShape, settings: BodySettings) -> Self {
        Self {
            body: CharacterBody::new(shape, Pose::IDENTITY, settings),
        }
    }
}

/// The velocity a [`KinematicCharacter`] wants to move with this tick.
#[derive(Component, Clone, Copy, Debug, Default, PartialEq, Reflect)]
#[reflect(Component, Debug, Default, PartialEq)]
pub struct MovementIntent {
    pub velocity: Vec3,
}

/// What happened to a [`KinematicCharacter`] during its last move.
#[derive(Component, Clone, Debug, PartialEq)]
pub struct LastMove {
    pub slide: SlideResult<Entity>,
    pub depenetration: DepenetrationResult,
}

impl LastMove {
    /// Whether the body ended the tick standing on something facing up within `max_slope` radians.
    pub fn grounded(&self, max_slope: f32) -> bool {
        let min_dot = max_slope.cos();
        self.slide
            .collisions
            .iter()
            .any(|collision| collision.normal.dot(Vec3::Y) >= min_dot)
    }
}

pub(crate) fn plugin(app: &mut App) {
    app.register_type::<MovementIntent>()
        .add_systems(
            FixedUpdate,
            (register_own_colliders, move_characters).chain(),
        );
}

fn register_own_colliders(
    mut characters: Query<(Entity, &mut KinematicCharacter, Has<Collider>), Added<KinematicCharacter>>,
) {
    for (entity, mut character, has_collider) in &mut characters {
        if has_collider {
            trace!(?entity, "excluding the character's own collider from its queries");
            character.body.set_own_collider(Some(entity));
        }
    }
}

//kinematic collide and slide, then push out of whatever the move left us in
fn move_characters(
    mut commands: Commands,
    mut characters: Query<(
        Entity,
        &mut KinematicCharacter,
        &MovementIntent,
        &mut Transform,
    )>,
    shapes: AvianShapeQuery,
    time: Res<Time>,
) {
    let delta_time = time.delta_secs();
    for (entity, mut character, intent, mut transform) in &mut characters {
        let body = &mut character.body;
        body.sync_pose(Pose::from(*transform));

        let slide = body.slide_and_collide(&shapes, intent.velocity, delta_time, true);
        let depenetration = body.apply_changes(&shapes);
        if slide.collided() || depenetration.corrections > 0 {
            debug!(
                ?entity,
                contacts = slide.collision_count(),
                corrections = depenetration.corrections,
                "character moved with contacts"
            );
        }

        transform.translation = body.position();
        commands.entity(entity).insert(LastMove {
            slide,
            depenetration,
        });
    }
}
