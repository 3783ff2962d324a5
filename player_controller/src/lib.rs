//! Player controller composition (input + character + camera + foot IK).
#![forbid(unsafe_code)]

use character_controller::{Character, CharacterFrame};
use character_grounding::WorldRaycast;
use foot_ik::{solve_feet, FeetTargets, FootIkConfig};
use physics_rapier::{DebugDraw, NoDebug, PhysicsWorld};
use player_camera::{CameraPose, PlayerCamera};
use rapier3d::math::Point;
use rapier3d::prelude::Real;

#[derive(Clone, Copy, Debug, Default)]
pub struct RawInput {
    pub move_x: Real,
    pub move_y: Real,
    pub jump: bool,
    pub look_delta: [Real; 2],
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InputIntent {
    pub move_axis: [Real; 2],
    pub jump: bool,
    pub look_delta: [Real; 2],
}

impl InputIntent {
    pub fn move_magnitude(&self) -> Real {
        (self.move_axis[0] * self.move_axis[0] + self.move_axis[1] * self.move_axis[1]).sqrt()
    }
}

pub trait InputAdapter {
    fn intent(&mut self, raw: RawInput) -> InputIntent;
}

#[derive(Default)]
pub struct DirectInputAdapter;

impl DirectInputAdapter {
    fn normalize_axis(axis: [Real; 2]) -> [Real; 2] {
        let len = (axis[0] * axis[0] + axis[1] * axis[1]).sqrt();
        if len > 1.0 {
            [axis[0] / len, axis[1] / len]
        } else {
            axis
        }
    }
}

impl InputAdapter for DirectInputAdapter {
    fn intent(&mut self, raw: RawInput) -> InputIntent {
        let move_axis = Self::normalize_axis([raw.move_x, raw.move_y]);
        InputIntent {
            move_axis,
            jump: raw.jump,
            look_delta: raw.look_delta,
        }
    }
}

/// Boolean parameters for the animation layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnimationParams {
    pub running: bool,
    pub grounded: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct PlayerFrame {
    pub character: CharacterFrame,
    pub camera: CameraPose,
    pub animation: AnimationParams,
}

pub struct PlayerController<A: InputAdapter> {
    input: A,
    character: Character,
    camera: PlayerCamera,
    feet: FootIkConfig,
}

impl<A: InputAdapter> PlayerController<A> {
    pub fn new(input: A, character: Character, camera: PlayerCamera, feet: FootIkConfig) -> Self {
        Self {
            input,
            character,
            camera,
            feet,
        }
    }

    pub fn character(&self) -> &Character {
        &self.character
    }

    pub fn character_mut(&mut self) -> &mut Character {
        &mut self.character
    }

    pub fn camera(&self) -> &PlayerCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut PlayerCamera {
        &mut self.camera
    }

    pub fn feet(&self) -> &FootIkConfig {
        &self.feet
    }

    pub fn tick(&mut self, world: &mut PhysicsWorld, raw: RawInput, dt: Real) -> PlayerFrame {
        self.tick_with_debug(world, raw, dt, &mut NoDebug)
    }

    pub fn tick_with_debug(
        &mut self,
        world: &mut PhysicsWorld,
        raw: RawInput,
        dt: Real,
        debug: &mut dyn DebugDraw,
    ) -> PlayerFrame {
        let intent = self.input.intent(raw);
        self.camera.apply_look_delta(intent.look_delta);
        let magnitude = intent.move_magnitude();
        if magnitude > 0.0 {
            let direction = self.camera.move_direction(intent.move_axis);
            self.character.apply_move(direction, magnitude);
            self.character.apply_turn(direction);
        }
        if intent.jump {
            self.character.jump();
        }
        let character = self.character.tick(world, dt, debug);
        let camera = self
            .camera
            .update(world, character.position, dt, Some(self.character.body()));
        PlayerFrame {
            character,
            camera,
            animation: AnimationParams {
                running: magnitude > 0.0,
                grounded: character.grounded,
            },
        }
    }

    /// Ground targets for the animated foot positions, ignoring the character's own collider.
    pub fn foot_targets(
        &self,
        world: &PhysicsWorld,
        left: Point<Real>,
        right: Point<Real>,
    ) -> FeetTargets {
        let caster = WorldRaycast::new(world, Some(self.character.body()));
        solve_feet(&caster, &self.feet, left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use character_settings::CharacterSettings;
    use player_camera::CameraSettings;
    use rapier3d::math::Vector;
    use rapier3d::prelude::ColliderBuilder;

    const DT: Real = 1.0 / 60.0;

    fn build_scene(world: &mut PhysicsWorld) {
        let floor = ColliderBuilder::cuboid(40.0, 0.1, 40.0)
            .translation(Vector::new(0.0, -0.1, 0.0))
            .build();
        world.insert_static_collider(floor);
        world.update_queries();
    }

    fn controller(world: &mut PhysicsWorld) -> PlayerController<DirectInputAdapter> {
        let settings = CharacterSettings::default();
        let height = settings.body.radius + settings.body.half_segment() + settings.ground.offset;
        let character =
            Character::spawn(world, settings, Point::new(0.0, height, 0.0)).expect("spawn");
        PlayerController::new(
            DirectInputAdapter,
            character,
            PlayerCamera::new(CameraSettings::default()),
            FootIkConfig::default(),
        )
    }

    fn run(
        controller: &mut PlayerController<DirectInputAdapter>,
        world: &mut PhysicsWorld,
        raw: RawInput,
        ticks: usize,
    ) -> PlayerFrame {
        let mut frame = controller.tick(world, raw, DT);
        world.step(DT);
        for _ in 1..ticks {
            frame = controller.tick(world, raw, DT);
            world.step(DT);
        }
        frame
    }

    #[test]
    fn direct_adapter_clamps_axis() {
        let mut adapter = DirectInputAdapter;
        let intent = adapter.intent(RawInput {
            move_x: 3.0,
            move_y: 4.0,
            ..Default::default()
        });
        assert!((intent.move_axis[0] - 0.6).abs() < 1.0e-6);
        assert!((intent.move_axis[1] - 0.8).abs() < 1.0e-6);
        let intent = adapter.intent(RawInput {
            move_x: 0.3,
            ..Default::default()
        });
        assert_eq!(intent.move_axis, [0.3, 0.0]);
    }

    #[test]
    fn forward_input_runs_along_camera() {
        let mut world = PhysicsWorld::new(Vector::new(0.0, -9.81, 0.0));
        build_scene(&mut world);
        let mut controller = controller(&mut world);
        let frame = run(
            &mut controller,
            &mut world,
            RawInput {
                move_y: 1.0,
                ..Default::default()
            },
            90,
        );
        assert_eq!(
            frame.animation,
            AnimationParams {
                running: true,
                grounded: true
            }
        );
        let position = controller.character().position(&world).expect("body");
        assert!(position.z < -3.0, "z = {}", position.z);
        assert!(position.x.abs() < 0.05);
        assert!(frame.camera.pivot.z < 0.0);

        let idle = run(&mut controller, &mut world, RawInput::default(), 1);
        assert!(!idle.animation.running);
    }

    #[test]
    fn camera_yaw_steers_movement() {
        let mut world = PhysicsWorld::new(Vector::new(0.0, -9.81, 0.0));
        build_scene(&mut world);
        let mut controller = controller(&mut world);
        controller
            .camera_mut()
            .set_look(std::f32::consts::FRAC_PI_2, 0.0);
        run(
            &mut controller,
            &mut world,
            RawInput {
                move_y: 1.0,
                ..Default::default()
            },
            60,
        );
        let position = controller.character().position(&world).expect("body");
        assert!(position.x > 2.0, "x = {}", position.x);
        assert!(controller.character().state().look_direction.x > 0.9);
    }

    #[test]
    fn jump_input_leaves_ground() {
        let mut world = PhysicsWorld::new(Vector::new(0.0, -9.81, 0.0));
        build_scene(&mut world);
        let mut controller = controller(&mut world);
        run(&mut controller, &mut world, RawInput::default(), 5);
        let frame = run(
            &mut controller,
            &mut world,
            RawInput {
                jump: true,
                ..Default::default()
            },
            1,
        );
        assert!(frame.character.jumped);
        let frame = run(&mut controller, &mut world, RawInput::default(), 20);
        assert!(!frame.animation.grounded);
    }

    #[test]
    fn foot_targets_rest_on_floor() {
        let mut world = PhysicsWorld::new(Vector::new(0.0, -9.81, 0.0));
        build_scene(&mut world);
        let controller = controller(&mut world);
        let feet = controller.foot_targets(
            &world,
            Point::new(-0.15, 0.05, 0.0),
            Point::new(0.15, 0.05, 0.0),
        );
        let height = controller.feet().foot_height;
        let left = feet.left.expect("left");
        let right = feet.right.expect("right");
        assert!((left.position.y - height).abs() < 1.0e-4);
        assert!((right.position.y - height).abs() < 1.0e-4);
        assert!((left.normal - Vector::y()).norm() < 1.0e-4);
    }
}
