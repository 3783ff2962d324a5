//! Rigid-body character integrator: ground sensing, virtual forces, gravity,
//! jumping and stick-to-ground, applied as a velocity each tick.
#![forbid(unsafe_code)]

use character_forces::{normalize_or_zero, VirtualForce};
use character_grounding::{ContactFrame, GroundAggregate, GroundContact, GroundSensor, WorldRaycast};
use character_settings::CharacterSettings;
use physics_rapier::{DebugDraw, PhysicsWorld, DEBUG_GREEN, DEBUG_YELLOW};
use rapier3d::math::{Point, Rotation, Vector};
use rapier3d::prelude::{
    ColliderBuilder, ColliderHandle, Real, RigidBodyBuilder, RigidBodyHandle,
};

const FORCE_DEBUG_SCALE: Real = 0.25;

fn up() -> Vector<Real> {
    Vector::y()
}

/// Force components the integrator carries between ticks.
#[derive(Clone, Copy, Debug)]
pub struct IntegratorState {
    pub gravity_force: Vector<Real>,
    pub movement_force: Vector<Real>,
    pub jump_force: Vector<Real>,
    pub look_direction: Vector<Real>,
    pub grounded: bool,
    /// Simulation time of the last jump.
    pub jump_timestamp: Option<Real>,
    pub ground: GroundAggregate,
}

impl Default for IntegratorState {
    fn default() -> Self {
        Self {
            gravity_force: Vector::zeros(),
            movement_force: Vector::zeros(),
            jump_force: Vector::zeros(),
            look_direction: Vector::z(),
            grounded: false,
            jump_timestamp: None,
            ground: GroundAggregate::airborne(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CharacterFrame {
    pub position: Point<Real>,
    pub velocity: Vector<Real>,
    pub grounded: bool,
    pub ground: GroundAggregate,
    pub look_direction: Vector<Real>,
    pub jumped: bool,
    /// Vertical correction applied by stick-to-ground this tick.
    pub snap: Real,
}

pub struct Character {
    settings: CharacterSettings,
    body: RigidBodyHandle,
    collider: ColliderHandle,
    sensor: GroundSensor,
    movement: VirtualForce,
    turn: VirtualForce,
    state: IntegratorState,
    velocity: Vector<Real>,
    elapsed: Real,
    jump_requested: bool,
}

impl Character {
    /// Validates `settings` and inserts a capsule body centered at `position`.
    pub fn spawn(
        world: &mut PhysicsWorld,
        settings: CharacterSettings,
        position: Point<Real>,
    ) -> Result<Self, String> {
        let settings = settings.checked()?;
        let body = RigidBodyBuilder::dynamic()
            .translation(position.coords)
            .gravity_scale(0.0)
            .lock_rotations()
            .can_sleep(false)
            .build();
        let body = world.insert_body(body);
        let collider = ColliderBuilder::capsule_y(settings.body.half_segment(), settings.body.radius)
            .friction(0.0)
            .build();
        let collider = world.insert_attached_collider(collider, body);
        world.update_queries();
        log::debug!(
            "spawned character at ({:.2}, {:.2}, {:.2})",
            position.x,
            position.y,
            position.z
        );
        Ok(Self {
            sensor: GroundSensor::new(&settings.probe, &settings.ground),
            movement: VirtualForce::new(settings.movement),
            turn: VirtualForce::new(settings.turn),
            settings,
            body,
            collider,
            state: IntegratorState::default(),
            velocity: Vector::zeros(),
            elapsed: 0.0,
            jump_requested: false,
        })
    }

    pub fn settings(&self) -> &CharacterSettings {
        &self.settings
    }

    pub fn body(&self) -> RigidBodyHandle {
        self.body
    }

    pub fn collider(&self) -> ColliderHandle {
        self.collider
    }

    /// Requests horizontal movement for the next tick; the vertical component is ignored.
    pub fn apply_move(&mut self, direction: Vector<Real>, speed_scale: Real) {
        let flat = normalize_or_zero(Vector::new(direction.x, 0.0, direction.z));
        self.movement
            .apply(flat, speed_scale.clamp(0.0, 1.0), self.elapsed);
    }

    pub fn apply_turn(&mut self, direction: Vector<Real>) {
        let flat = normalize_or_zero(Vector::new(direction.x, 0.0, direction.z));
        self.turn.apply(flat, 1.0, self.elapsed);
    }

    /// Requests a jump; honored on the next tick only if grounded and the
    /// previous jump has settled.
    pub fn jump(&mut self) {
        self.jump_requested = true;
    }

    pub fn grounded(&self) -> bool {
        self.state.grounded
    }

    /// Movement force after the last tick, before ground projection.
    pub fn current_force(&self) -> Vector<Real> {
        self.movement.current_force()
    }

    /// Velocity written to the body on the last tick: gravity, movement and jump combined.
    pub fn velocity(&self) -> Vector<Real> {
        self.velocity
    }

    pub fn active_contacts(&self) -> impl Iterator<Item = &GroundContact> + '_ {
        self.sensor.active_contacts()
    }

    pub fn ground(&self) -> GroundAggregate {
        self.state.ground
    }

    pub fn sensor(&self) -> &GroundSensor {
        &self.sensor
    }

    pub fn state(&self) -> &IntegratorState {
        &self.state
    }

    pub fn movement(&self) -> &VirtualForce {
        &self.movement
    }

    pub fn turn(&self) -> &VirtualForce {
        &self.turn
    }

    pub fn elapsed(&self) -> Real {
        self.elapsed
    }

    pub fn position(&self, world: &PhysicsWorld) -> Option<Point<Real>> {
        world
            .body(self.body)
            .map(|body| Point::from(*body.translation()))
    }

    /// Center of the lower cap sphere for a body centered at `center`.
    pub fn ideal_contact(&self, center: Point<Real>) -> Point<Real> {
        center - up() * self.settings.body.half_segment()
    }

    pub fn tick(
        &mut self,
        world: &mut PhysicsWorld,
        dt: Real,
        debug: &mut dyn DebugDraw,
    ) -> CharacterFrame {
        let now = self.elapsed;
        let jump_requested = std::mem::take(&mut self.jump_requested);
        let Some(center) = self.position(world) else {
            log::warn!("character body {:?} is missing from the world", self.body);
            return self.frame(Point::origin(), false, 0.0);
        };

        let frame = ContactFrame {
            ideal_contact: self.ideal_contact(center),
            radius: self.settings.body.radius,
        };
        let ground = {
            let caster = WorldRaycast::new(world, Some(self.body));
            self.sensor.sense(&caster, frame, debug)
        };
        self.state.ground = ground;
        self.state.grounded = self.sensor.grounded();

        let increment = -up() * self.settings.body.weight * dt;
        let cancel = self.settings.ground.influence_curve.evaluate(ground.influence);
        self.state.gravity_force += increment - increment * cancel;

        self.movement.step(now, dt);
        self.turn.step(now, dt);
        self.state.movement_force = self.movement.current_force();

        let damping = increment.norm() * self.settings.jump.gravity_influence;
        self.state.jump_force.y = (self.state.jump_force.y - damping).max(0.0);

        let settled = self
            .state
            .jump_timestamp
            .map_or(true, |at| now - at > self.settings.jump.settle_time);
        let mut center = center;
        let mut snap = 0.0;
        if self.state.grounded && settled {
            if let Some(best) = self.sensor.best_contact() {
                snap = best.world_position.y - frame.ideal_contact.y + self.settings.ground.offset;
                center += up() * snap;
            }
            self.state.gravity_force = Vector::zeros();
            self.state.jump_force = Vector::zeros();
            self.state.movement_force =
                project_on_plane(self.state.movement_force, ground.normal);
        }

        // Held requests cannot re-fire until the previous jump has settled.
        let jumped = jump_requested && self.state.grounded && settled;
        if jumped {
            self.state.jump_force = up() * self.settings.jump.force;
            self.state.jump_timestamp = Some(now);
            log::debug!("jump at t={:.3}", now);
        }

        let turn_force = self.turn.current_force();
        let facing = normalize_or_zero(Vector::new(turn_force.x, 0.0, turn_force.z));
        if facing != Vector::zeros() {
            self.state.look_direction = facing;
        }

        self.velocity =
            self.state.gravity_force + self.state.movement_force + self.state.jump_force;
        if let Some(body) = world.body_mut(self.body) {
            if snap != 0.0 {
                body.set_translation(center.coords, true);
            }
            body.set_rotation(yaw_rotation(self.state.look_direction), true);
            body.set_linvel(self.velocity, true);
        }

        debug.line(center, center + self.velocity * FORCE_DEBUG_SCALE, DEBUG_YELLOW);
        debug.line(center, center + self.state.look_direction, DEBUG_GREEN);

        self.elapsed += dt;
        self.frame(center, jumped, snap)
    }

    fn frame(&self, position: Point<Real>, jumped: bool, snap: Real) -> CharacterFrame {
        CharacterFrame {
            position,
            velocity: self.velocity,
            grounded: self.state.grounded,
            ground: self.state.ground,
            look_direction: self.state.look_direction,
            jumped,
            snap,
        }
    }
}

/// Projects `force` onto the plane with `normal`, keeping its length.
pub fn project_on_plane(force: Vector<Real>, normal: Vector<Real>) -> Vector<Real> {
    let magnitude = force.norm();
    let normal = normalize_or_zero(normal);
    if magnitude <= 1.0e-6 || normal == Vector::zeros() {
        return force;
    }
    let projected = force - normal * force.dot(&normal);
    normalize_or_zero(projected) * magnitude
}

/// Rotation about world up that points local +Z along `direction`.
pub fn yaw_rotation(direction: Vector<Real>) -> Rotation<Real> {
    let flat = normalize_or_zero(Vector::new(direction.x, 0.0, direction.z));
    if flat == Vector::zeros() {
        return Rotation::identity();
    }
    Rotation::face_towards(&flat, &up())
}
