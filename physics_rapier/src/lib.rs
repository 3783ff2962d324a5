//! Rapier integration entrypoints, shared world setup, masked ray queries and
//! the debug geometry sink used by the locomotion crates.
#![forbid(unsafe_code)]

use rapier3d::prelude::*;

pub const DEBUG_WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
pub const DEBUG_CYAN: [f32; 4] = [0.0, 1.0, 1.0, 1.0];
pub const DEBUG_RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
pub const DEBUG_GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
pub const DEBUG_YELLOW: [f32; 4] = [1.0, 0.92, 0.016, 1.0];

pub fn lerp_color(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let t = t.clamp(0.0, 1.0);
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Sink for dev-only debug geometry. Nothing in the simulation reads it back.
pub trait DebugDraw {
    fn line(&mut self, start: Point<Real>, end: Point<Real>, color: [f32; 4]);

    /// Axis cross centered on `at`.
    fn marker(&mut self, at: Point<Real>, size: Real, color: [f32; 4]) {
        let half = size * 0.5;
        for axis in [Vector::x(), Vector::y(), Vector::z()] {
            self.line(at - axis * half, at + axis * half, color);
        }
    }
}

/// Discards all debug geometry.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDebug;

impl DebugDraw for NoDebug {
    fn line(&mut self, _start: Point<Real>, _end: Point<Real>, _color: [f32; 4]) {}

    fn marker(&mut self, _at: Point<Real>, _size: Real, _color: [f32; 4]) {}
}

#[derive(Clone, Copy, Debug)]
pub struct DebugLine {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub color: [f32; 4],
}

#[derive(Default)]
pub struct PhysicsDebugLines {
    pub lines: Vec<DebugLine>,
}

impl PhysicsDebugLines {
    fn push_line(&mut self, start: Point<Real>, end: Point<Real>, color: [f32; 4]) {
        self.lines.push(DebugLine {
            start: [start.x, start.y, start.z],
            end: [end.x, end.y, end.z],
            color,
        });
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl DebugDraw for PhysicsDebugLines {
    fn line(&mut self, start: Point<Real>, end: Point<Real>, color: [f32; 4]) {
        self.push_line(start, end, color);
    }
}

/// Closest hit of a ray cast against the world.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    pub collider: ColliderHandle,
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    pub distance: Real,
}

/// Query filter that only sees colliders whose membership intersects `mask`,
/// optionally ignoring every collider attached to `exclude`.
pub fn masked_filter(mask: u32, exclude: Option<RigidBodyHandle>) -> QueryFilter<'static> {
    let groups = InteractionGroups::new(Group::ALL, Group::from_bits_truncate(mask));
    let filter = QueryFilter::default().groups(groups);
    match exclude {
        Some(handle) => filter.exclude_rigid_body(handle),
        None => filter,
    }
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
}

impl PhysicsWorld {
    pub fn new(gravity: Vector<Real>) -> Self {
        Self {
            gravity,
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    pub fn step(&mut self, dt: Real) {
        self.integration_parameters.dt = dt;
        let physics_hooks = ();
        let event_handler = ();
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &physics_hooks,
            &event_handler,
        );
        self.query_pipeline.update(&self.colliders);
    }

    /// Refreshes the query pipeline without advancing the simulation.
    pub fn update_queries(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }

    pub fn insert_static_collider(&mut self, collider: Collider) -> ColliderHandle {
        self.colliders.insert(collider)
    }

    pub fn insert_body(&mut self, body: RigidBody) -> RigidBodyHandle {
        self.bodies.insert(body)
    }

    pub fn insert_attached_collider(
        &mut self,
        collider: Collider,
        parent: RigidBodyHandle,
    ) -> ColliderHandle {
        self.colliders
            .insert_with_parent(collider, parent, &mut self.bodies)
    }

    pub fn cast_ray(
        &self,
        origin: Point<Real>,
        direction: Vector<Real>,
        max_distance: Real,
        filter: QueryFilter,
    ) -> Option<RayHit> {
        if max_distance <= 0.0 || direction.norm_squared() <= 1.0e-12 {
            return None;
        }
        let ray = Ray::new(origin, direction.normalize());
        let (collider, hit) = self.query_pipeline.cast_ray_and_get_normal(
            &self.bodies,
            &self.colliders,
            &ray,
            max_distance,
            true,
            filter,
        )?;
        Some(RayHit {
            collider,
            point: ray.point_at(hit.time_of_impact),
            normal: hit.normal,
            distance: hit.time_of_impact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_floor(world: &mut PhysicsWorld) -> ColliderHandle {
        let floor = ColliderBuilder::cuboid(5.0, 0.1, 5.0)
            .translation(vector![0.0, -0.1, 0.0])
            .build();
        world.insert_static_collider(floor)
    }

    #[test]
    fn ray_cast_reports_floor_hit() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        let floor = build_floor(&mut world);
        world.step(1.0 / 60.0);

        let hit = world
            .cast_ray(
                point![0.5, 1.0, 0.5],
                -Vector::y(),
                2.0,
                masked_filter(u32::MAX, None),
            )
            .expect("floor hit");
        assert_eq!(hit.collider, floor);
        assert!((hit.distance - 1.0).abs() < 1.0e-4);
        assert!(hit.point.y.abs() < 1.0e-4);
        assert!(hit.normal.y > 0.99);
    }

    #[test]
    fn ray_cast_respects_mask_and_exclusion() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        let floor = ColliderBuilder::cuboid(5.0, 0.1, 5.0)
            .translation(vector![0.0, -0.1, 0.0])
            .collision_groups(InteractionGroups::new(Group::GROUP_2, Group::ALL))
            .build();
        world.insert_static_collider(floor);
        let body = world.insert_body(
            RigidBodyBuilder::dynamic()
                .translation(vector![0.0, 0.5, 0.0])
                .gravity_scale(0.0)
                .build(),
        );
        world.insert_attached_collider(ColliderBuilder::ball(0.25).build(), body);
        world.step(1.0 / 60.0);

        let origin = point![0.0, 2.0, 0.0];
        let blocked = world.cast_ray(origin, -Vector::y(), 3.0, masked_filter(u32::MAX, None));
        assert!(blocked.expect("ball hit").point.y > 0.5);

        let excluded = world
            .cast_ray(origin, -Vector::y(), 3.0, masked_filter(u32::MAX, Some(body)))
            .expect("floor hit");
        assert!(excluded.point.y.abs() < 1.0e-3);

        let group_1_only = Group::GROUP_1.bits();
        assert!(world
            .cast_ray(origin, -Vector::y(), 3.0, masked_filter(group_1_only, Some(body)))
            .is_none());
    }

    #[test]
    fn ray_cast_ignores_degenerate_queries() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        build_floor(&mut world);
        world.step(1.0 / 60.0);
        let filter = masked_filter(u32::MAX, None);
        assert!(world
            .cast_ray(point![0.0, 1.0, 0.0], Vector::zeros(), 2.0, filter)
            .is_none());
        assert!(world
            .cast_ray(point![0.0, 1.0, 0.0], -Vector::y(), 0.0, filter)
            .is_none());
    }

    #[test]
    fn dynamic_body_follows_velocity() {
        let mut world = PhysicsWorld::new(vector![0.0, -9.81, 0.0]);
        let body = world.insert_body(
            RigidBodyBuilder::dynamic()
                .translation(vector![0.0, 5.0, 0.0])
                .gravity_scale(0.0)
                .lock_rotations()
                .build(),
        );
        world.insert_attached_collider(ColliderBuilder::capsule_y(0.5, 0.3).build(), body);
        world
            .body_mut(body)
            .expect("body")
            .set_linvel(vector![1.0, 0.0, 0.0], true);
        for _ in 0..60 {
            world.step(1.0 / 60.0);
        }
        let translation = *world.body(body).expect("body").translation();
        assert!((translation.x - 1.0).abs() < 0.05);
        assert!((translation.y - 5.0).abs() < 1.0e-3);
    }

    #[test]
    fn debug_sink_records_markers() {
        let mut lines = PhysicsDebugLines::default();
        lines.marker(point![0.0, 0.0, 0.0], 0.1, DEBUG_WHITE);
        assert_eq!(lines.lines.len(), 3);
        lines.clear();
        NoDebug.marker(point![0.0, 0.0, 0.0], 0.1, DEBUG_WHITE);
        assert!(lines.lines.is_empty());
        assert_eq!(lerp_color(DEBUG_CYAN, DEBUG_RED, 1.0), DEBUG_RED);
    }
}
