//! Virtual force model (smoothed direction + velocity driven by discrete input).
#![forbid(unsafe_code)]

use character_settings::{ForceSettings, ForceVariant, HeavyTurnSettings};
use rapier3d::math::Vector;
use rapier3d::na::{Unit, UnitQuaternion};
use rapier3d::prelude::Real;

/// An apply call keeps the force in the applying state for this many ticks.
const APPLY_WINDOW_TICKS: Real = 1.5;
const DIRECTION_EPS: Real = 1.0e-6;

#[derive(Clone, Copy, Debug)]
struct HeavyTurnState {
    direction_over_time: Vector<Real>,
    velocity_over_time: Real,
    secondary_direction: Vector<Real>,
    remaining: Real,
}

impl Default for HeavyTurnState {
    fn default() -> Self {
        Self {
            direction_over_time: Vector::zeros(),
            velocity_over_time: 0.0,
            secondary_direction: Vector::zeros(),
            remaining: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct VirtualForce {
    config: ForceSettings,
    goal_direction: Vector<Real>,
    goal_velocity: Real,
    current_direction: Vector<Real>,
    current_velocity: Real,
    turn_factor: Real,
    time_applying: Real,
    last_applied: Option<Real>,
    last_dt: Option<Real>,
    applying: bool,
    heavy: HeavyTurnState,
    current_force: Vector<Real>,
}

impl VirtualForce {
    pub fn new(config: ForceSettings) -> Self {
        Self {
            config,
            goal_direction: Vector::zeros(),
            goal_velocity: 0.0,
            current_direction: Vector::zeros(),
            current_velocity: 0.0,
            turn_factor: 0.0,
            time_applying: 0.0,
            last_applied: None,
            last_dt: None,
            applying: false,
            heavy: HeavyTurnState::default(),
            current_force: Vector::zeros(),
        }
    }

    pub fn config(&self) -> ForceSettings {
        self.config
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Sets the goal; `now` is the simulation time of the tick about to run.
    pub fn apply(&mut self, direction: Vector<Real>, velocity_multiplier: Real, now: Real) {
        // `applying` is stale after skipped steps; check the window instead.
        let still_applying = self
            .last_dt
            .map_or(false, |dt| self.is_applying(now, dt));
        if !still_applying {
            self.heavy.direction_over_time = direction;
        }
        self.last_applied = Some(now);
        self.goal_direction = direction;
        self.goal_velocity = self.config.max_velocity * velocity_multiplier;
    }

    pub fn is_applying(&self, now: Real, dt: Real) -> bool {
        self.last_applied
            .map_or(false, |applied| now - applied <= dt * APPLY_WINDOW_TICKS)
    }

    pub fn step(&mut self, now: Real, dt: Real) -> Vector<Real> {
        let dt = dt.max(0.0);
        self.last_dt = Some(dt);
        let applying = self.is_applying(now, dt);
        self.applying = applying;
        let turn_step = self.config.turn_acceleration * dt;
        let max_velocity = self.config.max_velocity.max(0.0);

        if applying {
            self.time_applying += dt;
            self.turn_factor = (self.turn_factor + turn_step).clamp(0.0, 1.0);
            let rate = if self.goal_velocity >= self.current_velocity {
                self.config.acceleration
            } else {
                self.config.deceleration
            };
            self.current_velocity =
                move_towards(self.current_velocity, self.goal_velocity, rate * dt)
                    .clamp(0.0, max_velocity);
            self.current_direction = self.interpolate(turn_step.clamp(0.0, 1.0));
        } else {
            self.time_applying = 0.0;
            self.turn_factor =
                (self.turn_factor - self.config.turn_deceleration * dt).clamp(0.0, 1.0);
            self.current_velocity =
                move_towards(self.current_velocity, 0.0, self.config.deceleration * dt)
                    .clamp(0.0, max_velocity);
            self.current_direction =
                self.interpolate((turn_step * self.turn_factor).clamp(0.0, 1.0));
        }

        self.current_force = match self.config.variant {
            ForceVariant::Simple => normalize_or_zero(self.current_direction) * self.current_velocity,
            ForceVariant::HeavyTurn(heavy) => self.step_heavy_turn(heavy, dt),
        };
        self.current_force
    }

    fn interpolate(&self, t: Real) -> Vector<Real> {
        if self.config.spherical_interpolation {
            slerp(self.current_direction, self.goal_direction, t)
        } else {
            lerp_vector(self.current_direction, self.goal_direction, t)
        }
    }

    fn step_heavy_turn(&mut self, settings: HeavyTurnSettings, dt: Real) -> Vector<Real> {
        let rate = (settings.smoothing_rate * dt).clamp(0.0, 1.0);
        let heavy = &mut self.heavy;
        heavy.direction_over_time = slerp(heavy.direction_over_time, self.current_direction, rate);
        heavy.velocity_over_time = lerp(heavy.velocity_over_time, self.current_force.norm(), rate);
        heavy.remaining = (heavy.remaining - dt).max(0.0);

        let angle = angle_degrees(heavy.direction_over_time, self.goal_direction);
        if angle > settings.angle_threshold
            && heavy.velocity_over_time > self.goal_velocity * settings.velocity_threshold
        {
            if heavy.remaining <= 0.0 {
                log::debug!(
                    "heavy turn: {:.1} deg at {:.2} m/s",
                    angle,
                    heavy.velocity_over_time
                );
            }
            heavy.remaining = settings.duration;
        }

        let responsiveness = responsiveness(heavy.remaining, settings.duration);
        heavy.secondary_direction =
            lerp_vector(heavy.secondary_direction, self.current_direction, responsiveness);
        heavy.secondary_direction * self.current_velocity
    }

    pub fn goal_direction(&self) -> Vector<Real> {
        self.goal_direction
    }

    pub fn goal_velocity(&self) -> Real {
        self.goal_velocity
    }

    pub fn goal_force(&self) -> Vector<Real> {
        self.goal_direction * self.goal_velocity
    }

    pub fn current_force(&self) -> Vector<Real> {
        self.current_force
    }

    pub fn current_direction(&self) -> Vector<Real> {
        self.current_direction
    }

    pub fn current_velocity(&self) -> Real {
        self.current_velocity
    }

    pub fn velocity_normalized(&self) -> Real {
        if self.config.max_velocity > 0.0 {
            self.current_velocity / self.config.max_velocity
        } else {
            0.0
        }
    }

    pub fn turn_factor(&self) -> Real {
        self.turn_factor
    }

    pub fn time_applying(&self) -> Real {
        self.time_applying
    }

    /// Whether the last step ran in the applying state.
    pub fn applying(&self) -> bool {
        self.applying
    }

    pub fn heavy_turn_remaining(&self) -> Real {
        self.heavy.remaining
    }

    pub fn direction_over_time(&self) -> Vector<Real> {
        self.heavy.direction_over_time
    }

    pub fn velocity_over_time(&self) -> Real {
        self.heavy.velocity_over_time
    }

    pub fn secondary_direction(&self) -> Vector<Real> {
        self.heavy.secondary_direction
    }
}

fn responsiveness(remaining: Real, duration: Real) -> Real {
    if duration <= 0.0 {
        return 1.0;
    }
    (1.0 - remaining / duration).clamp(0.0, 1.0)
}

pub fn move_towards(current: Real, target: Real, max_delta: Real) -> Real {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

pub fn normalize_or_zero(v: Vector<Real>) -> Vector<Real> {
    let len = v.norm();
    if len > DIRECTION_EPS {
        v / len
    } else {
        Vector::zeros()
    }
}

/// Unsigned angle in degrees; zero when either vector is degenerate.
pub fn angle_degrees(a: Vector<Real>, b: Vector<Real>) -> Real {
    let denom = a.norm() * b.norm();
    if denom <= DIRECTION_EPS {
        return 0.0;
    }
    (a.dot(&b) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Rotates direction by the interpolated angle and lerps magnitude. Opposed
/// vectors turn about the axis closest to world up.
pub fn slerp(a: Vector<Real>, b: Vector<Real>, t: Real) -> Vector<Real> {
    if t <= 0.0 {
        return a;
    }
    let (len_a, len_b) = (a.norm(), b.norm());
    if len_a <= DIRECTION_EPS || len_b <= DIRECTION_EPS {
        return lerp_vector(a, b, t);
    }
    let (dir_a, dir_b) = (a / len_a, b / len_b);
    let length = lerp(len_a, len_b, t);
    let angle = dir_a.dot(&dir_b).clamp(-1.0, 1.0).acos();
    if angle <= 1.0e-5 {
        return normalize_or_zero(lerp_vector(dir_a, dir_b, t)) * length;
    }
    let cross = dir_a.cross(&dir_b);
    let axis = if cross.norm_squared() > 1.0e-10 {
        cross
    } else {
        let up = Vector::y();
        let toward_up = up - dir_a * dir_a.dot(&up);
        if toward_up.norm_squared() > 1.0e-10 {
            toward_up
        } else {
            dir_a.cross(&Vector::x())
        }
    };
    let rotation = UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), angle * t);
    (rotation * dir_a) * length
}

pub fn lerp_vector(a: Vector<Real>, b: Vector<Real>, t: Real) -> Vector<Real> {
    a + (b - a) * t
}

fn lerp(a: Real, b: Real, t: Real) -> Real {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Real = 0.02;

    fn simple() -> ForceSettings {
        ForceSettings {
            max_velocity: 6.0,
            acceleration: 30.0,
            deceleration: 40.0,
            turn_acceleration: 10.0,
            turn_deceleration: 5.0,
            spherical_interpolation: true,
            variant: ForceVariant::Simple,
        }
    }

    fn heavy(duration: Real) -> ForceSettings {
        ForceSettings {
            variant: ForceVariant::HeavyTurn(HeavyTurnSettings {
                angle_threshold: 120.0,
                velocity_threshold: 0.6,
                duration,
                smoothing_rate: 10.0,
            }),
            ..simple()
        }
    }

    /// Runs `ticks` steps applying `direction` before each one.
    fn drive(force: &mut VirtualForce, clock: &mut Real, direction: Vector<Real>, ticks: usize) {
        for _ in 0..ticks {
            force.apply(direction, 1.0, *clock);
            force.step(*clock, DT);
            *clock += DT;
        }
    }

    #[test]
    fn goal_round_trips_without_smoothing() {
        let mut force = VirtualForce::new(simple());
        let direction = Vector::new(0.3, 0.0, -0.7);
        force.apply(direction, 0.5, 0.0);
        assert_eq!(force.goal_direction(), direction);
        assert_eq!(force.goal_velocity(), 3.0);
        assert_eq!(force.goal_force(), direction * 3.0);
        assert_eq!(force.current_velocity(), 0.0);
    }

    #[test]
    fn accelerates_monotonically_to_max() {
        let mut force = VirtualForce::new(simple());
        let mut clock = 0.0;
        let mut previous = 0.0;
        for _ in 0..10 {
            drive(&mut force, &mut clock, Vector::x(), 1);
            assert!(force.current_velocity() >= previous);
            previous = force.current_velocity();
        }
        assert!((force.current_velocity() - 6.0).abs() < 1.0e-4);
        assert!((force.velocity_normalized() - 1.0).abs() < 1.0e-4);
        drive(&mut force, &mut clock, Vector::x(), 50);
        assert_eq!(force.current_velocity(), 6.0);
        assert!((force.current_force() - Vector::x() * 6.0).norm() < 1.0e-3);
    }

    #[test]
    fn decays_to_rest_after_input_stops() {
        let mut force = VirtualForce::new(simple());
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 30);
        let bound = (6.0 / (40.0 * DT)).ceil() as usize + 1;
        let mut previous = force.current_velocity();
        let mut ticks = 0;
        while force.current_velocity() > 0.0 {
            force.step(clock, DT);
            clock += DT;
            ticks += 1;
            assert!(force.current_velocity() <= previous);
            previous = force.current_velocity();
            assert!(ticks <= bound + 1, "still moving after {} ticks", ticks);
        }
        // One debounce tick keeps applying before decay starts.
        assert!(ticks <= bound + 1);
        assert_eq!(force.current_force(), Vector::zeros());
    }

    #[test]
    fn debounce_spans_one_missed_tick() {
        let mut force = VirtualForce::new(simple());
        force.apply(Vector::x(), 1.0, 1.0);
        assert!(force.is_applying(1.0, DT));
        assert!(force.is_applying(1.0 + DT, DT));
        assert!(!force.is_applying(1.0 + 2.0 * DT, DT));
        force.step(1.0 + 2.0 * DT, DT);
        assert!(!force.applying());
        assert_eq!(force.time_applying(), 0.0);
    }

    #[test]
    fn lower_goal_uses_deceleration() {
        let mut force = VirtualForce::new(simple());
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 20);
        force.apply(Vector::x(), 0.5, clock);
        force.step(clock, DT);
        assert!((force.current_velocity() - (6.0 - 40.0 * DT)).abs() < 1.0e-5);
    }

    #[test]
    fn direction_freezes_once_turn_factor_drains() {
        let mut force = VirtualForce::new(simple());
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 40);
        assert_eq!(force.turn_factor(), 1.0);
        drive(&mut force, &mut clock, Vector::z(), 1);
        for _ in 0..30 {
            force.step(clock, DT);
            clock += DT;
        }
        assert_eq!(force.turn_factor(), 0.0);
        let frozen = force.current_direction();
        force.step(clock, DT);
        assert_eq!(force.current_direction(), frozen);
        // Kept turning after release but never reached the goal.
        assert!(frozen.z > 0.0);
        assert!(frozen.x > 0.0);
    }

    #[test]
    fn spherical_keeps_length_through_reversal() {
        let mut spherical = VirtualForce::new(simple());
        let mut linear = VirtualForce::new(ForceSettings {
            spherical_interpolation: false,
            ..simple()
        });
        let mut clock_a = 0.0;
        let mut clock_b = 0.0;
        drive(&mut spherical, &mut clock_a, Vector::x(), 80);
        drive(&mut linear, &mut clock_b, Vector::x(), 80);
        drive(&mut spherical, &mut clock_a, -Vector::x(), 1);
        drive(&mut linear, &mut clock_b, -Vector::x(), 1);
        assert!((spherical.current_direction().norm() - 1.0).abs() < 1.0e-3);
        assert!(spherical.current_direction().y.abs() < 1.0e-5);
        assert!((linear.current_direction().norm() - 0.6).abs() < 1.0e-3);
    }

    #[test]
    fn heavy_turn_latches_and_decays_linearly() {
        let duration = 0.5;
        let mut force = VirtualForce::new(heavy(duration));
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 60);
        assert_eq!(force.heavy_turn_remaining(), 0.0);
        assert!(force.velocity_over_time() > 0.6 * 6.0);

        drive(&mut force, &mut clock, -Vector::x(), 1);
        assert_eq!(force.heavy_turn_remaining(), duration);
        // Momentum carries the output along the old heading.
        assert!(force.current_force().x > 0.0);

        let ticks = (duration / DT).round() as usize;
        for k in 1..=ticks + 1 {
            let settled = force.direction_over_time();
            drive(&mut force, &mut clock, settled, 1);
            let expected = (duration - k as Real * DT).max(0.0);
            assert!(
                (force.heavy_turn_remaining() - expected).abs() < 1.0e-4,
                "tick {}: {} vs {}",
                k,
                force.heavy_turn_remaining(),
                expected
            );
        }
        assert_eq!(force.heavy_turn_remaining(), 0.0);
    }

    #[test]
    fn heavy_turn_needs_speed() {
        let mut force = VirtualForce::new(heavy(0.5));
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 1);
        drive(&mut force, &mut clock, -Vector::x(), 1);
        assert_eq!(force.heavy_turn_remaining(), 0.0);
    }

    #[test]
    fn heavy_turn_tracks_direction_without_reversal() {
        let mut force = VirtualForce::new(heavy(0.5));
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 60);
        assert!((force.secondary_direction() - Vector::x()).norm() < 1.0e-2);
        assert!((force.current_force() - Vector::x() * 6.0).norm() < 0.1);
    }

    #[test]
    fn heavy_turn_history_restarts_after_skipped_steps() {
        let mut force = VirtualForce::new(heavy(0.5));
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 30);
        assert!(force.applying());
        // Several ticks pass with no step and no apply.
        clock += 5.0 * DT;
        force.apply(Vector::z(), 1.0, clock);
        assert_eq!(force.direction_over_time(), Vector::z());

        // Inside the window the history is kept.
        let mut force = VirtualForce::new(heavy(0.5));
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 30);
        let history = force.direction_over_time();
        force.apply(Vector::z(), 1.0, clock);
        assert_eq!(force.direction_over_time(), history);
    }

    #[test]
    fn first_apply_after_reset_restarts_history() {
        let mut force = VirtualForce::new(heavy(0.5));
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 30);
        force.reset();
        force.apply(-Vector::z(), 1.0, clock);
        assert_eq!(force.direction_over_time(), -Vector::z());
    }

    #[test]
    fn reset_returns_to_rest() {
        let mut force = VirtualForce::new(heavy(0.5));
        let mut clock = 0.0;
        drive(&mut force, &mut clock, Vector::x(), 10);
        force.reset();
        assert_eq!(force.current_velocity(), 0.0);
        assert_eq!(force.current_force(), Vector::zeros());
        assert!(!force.is_applying(clock, DT));
    }

    #[test]
    fn slerp_handles_degenerate_inputs() {
        let halfway = slerp(Vector::x(), -Vector::x(), 0.5);
        assert!((halfway.norm() - 1.0).abs() < 1.0e-5);
        assert!(halfway.y.abs() < 1.0e-5);
        let vertical = slerp(Vector::y(), -Vector::y(), 0.5);
        assert!((vertical.norm() - 1.0).abs() < 1.0e-5);
        assert_eq!(slerp(Vector::zeros(), Vector::x(), 0.5), Vector::x() * 0.5);
        assert_eq!(angle_degrees(Vector::zeros(), Vector::x()), 0.0);
        assert!((angle_degrees(Vector::x(), Vector::z()) - 90.0).abs() < 1.0e-4);
    }
}
