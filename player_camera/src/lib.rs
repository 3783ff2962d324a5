//! Third-person orbit camera: eased yaw/pitch look, pivot tracking and
//! occlusion-aware boom length.
#![forbid(unsafe_code)]

use character_forces::{normalize_or_zero, slerp};
use physics_rapier::{masked_filter, PhysicsWorld};
use rapier3d::math::{Point, Vector};
use rapier3d::prelude::{Real, RigidBodyHandle};

#[derive(Clone, Copy, Debug)]
pub struct CameraSettings {
    /// Look delta scale for yaw and pitch.
    pub sensitivity: [Real; 2],
    pub min_pitch_degrees: Real,
    pub max_pitch_degrees: Real,
    pub rotation_easing: Real,
    pub position_track_speed: Real,
    /// Height of the pivot above the tracked target.
    pub pivot_height: Real,
    pub boom_length: Real,
    /// Distance kept between the eye and an occluder.
    pub occlusion_padding: Real,
    pub occlusion_mask: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            sensitivity: [1.0, 1.0],
            min_pitch_degrees: -60.0,
            max_pitch_degrees: 70.0,
            rotation_easing: 12.0,
            position_track_speed: 10.0,
            pivot_height: 1.5,
            boom_length: 4.0,
            occlusion_padding: 0.2,
            occlusion_mask: u32::MAX,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CameraPose {
    pub eye: Point<Real>,
    pub pivot: Point<Real>,
    pub forward: Vector<Real>,
    pub yaw: Real,
    pub pitch: Real,
    /// Boom length after occlusion.
    pub distance: Real,
    pub occluded: bool,
}

#[derive(Clone, Debug)]
pub struct PlayerCamera {
    settings: CameraSettings,
    goal_yaw: Real,
    goal_pitch: Real,
    view: Vector<Real>,
    pivot: Option<Point<Real>>,
    pose: CameraPose,
}

/// Unit view direction; yaw 0 looks down -Z, positive pitch looks up.
pub fn look_direction(yaw: Real, pitch: Real) -> Vector<Real> {
    Vector::new(
        yaw.sin() * pitch.cos(),
        pitch.sin(),
        -yaw.cos() * pitch.cos(),
    )
}

impl PlayerCamera {
    pub fn new(settings: CameraSettings) -> Self {
        let view = look_direction(0.0, 0.0);
        Self {
            settings,
            goal_yaw: 0.0,
            goal_pitch: 0.0,
            view,
            pivot: None,
            pose: CameraPose {
                eye: Point::origin(),
                pivot: Point::origin(),
                forward: view,
                yaw: 0.0,
                pitch: 0.0,
                distance: settings.boom_length,
                occluded: false,
            },
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    fn pitch_limits(&self) -> (Real, Real) {
        let min = self.settings.min_pitch_degrees.to_radians();
        let max = self.settings.max_pitch_degrees.to_radians();
        (min.min(max), max.max(min))
    }

    /// Current (eased) yaw.
    pub fn yaw(&self) -> Real {
        self.view.x.atan2(-self.view.z)
    }

    pub fn pitch(&self) -> Real {
        self.view.y.clamp(-1.0, 1.0).asin()
    }

    pub fn goal(&self) -> (Real, Real) {
        (self.goal_yaw, self.goal_pitch)
    }

    pub fn forward(&self) -> Vector<Real> {
        self.view
    }

    /// Snaps both goal and view.
    pub fn set_look(&mut self, yaw: Real, pitch: Real) {
        let (min, max) = self.pitch_limits();
        self.goal_yaw = yaw;
        self.goal_pitch = pitch.clamp(min, max);
        self.view = look_direction(self.goal_yaw, self.goal_pitch);
    }

    pub fn apply_look_delta(&mut self, delta: [Real; 2]) {
        let (min, max) = self.pitch_limits();
        self.goal_yaw += delta[0] * self.settings.sensitivity[0];
        self.goal_pitch =
            (self.goal_pitch + delta[1] * self.settings.sensitivity[1]).clamp(min, max);
    }

    /// Horizontal, normalized camera-relative direction for a 2D move axis
    /// (x = right, y = forward). Zero input maps to zero.
    pub fn move_direction(&self, axis: [Real; 2]) -> Vector<Real> {
        let forward = normalize_or_zero(Vector::new(self.view.x, 0.0, self.view.z));
        let forward = if forward == Vector::zeros() {
            look_direction(self.goal_yaw, 0.0)
        } else {
            forward
        };
        let right = forward.cross(&Vector::y());
        normalize_or_zero(right * axis[0] + forward * axis[1])
    }

    /// Eases toward the look goal, tracks `target` and shortens the boom
    /// against colliders matching the occlusion mask.
    pub fn update(
        &mut self,
        world: &PhysicsWorld,
        target: Point<Real>,
        dt: Real,
        exclude: Option<RigidBodyHandle>,
    ) -> CameraPose {
        let goal = look_direction(self.goal_yaw, self.goal_pitch);
        let easing = (self.settings.rotation_easing * dt).clamp(0.0, 1.0);
        self.view = normalize_or_zero(slerp(self.view, goal, easing));
        if self.view == Vector::zeros() {
            self.view = goal;
        }

        let goal_pivot = target + Vector::y() * self.settings.pivot_height;
        let pivot = match self.pivot {
            Some(previous) => {
                let track = (self.settings.position_track_speed * dt).clamp(0.0, 1.0);
                previous + (goal_pivot - previous) * track
            }
            None => goal_pivot,
        };
        self.pivot = Some(pivot);

        let boom = self.settings.boom_length.max(0.0);
        let filter = masked_filter(self.settings.occlusion_mask, exclude);
        let (distance, occluded) = match world.cast_ray(pivot, -self.view, boom, filter) {
            Some(hit) => {
                let depth = boom - hit.distance + self.settings.occlusion_padding;
                ((boom - depth).max(0.0), true)
            }
            None => (boom, false),
        };

        self.pose = CameraPose {
            eye: pivot - self.view * distance,
            pivot,
            forward: self.view,
            yaw: self.yaw(),
            pitch: self.pitch(),
            distance,
            occluded,
        };
        self.pose
    }

    pub fn pose(&self) -> CameraPose {
        self.pose
    }
}
