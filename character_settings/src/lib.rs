//! Character settings asset format and load-time validation.
//!
//! Every divisor used at runtime (slope limits, collider radius, force
//! velocities, heavy-turn duration) is checked here so the per-tick code can
//! assume a well-formed configuration.
#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

const MAX_PROBE_RAYS: u32 = 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterSettings {
    pub probe: ProbeSettings,
    pub ground: GroundSettings,
    pub body: BodySettings,
    pub movement: ForceSettings,
    pub turn: ForceSettings,
    pub jump: JumpSettings,
}

impl Default for CharacterSettings {
    fn default() -> Self {
        Self {
            probe: ProbeSettings::default(),
            ground: GroundSettings::default(),
            body: BodySettings::default(),
            movement: ForceSettings {
                variant: ForceVariant::HeavyTurn(HeavyTurnSettings::default()),
                ..ForceSettings::default()
            },
            turn: ForceSettings {
                max_velocity: 1.0,
                acceleration: 10.0,
                deceleration: 10.0,
                turn_acceleration: 12.0,
                turn_deceleration: 6.0,
                spherical_interpolation: true,
                variant: ForceVariant::Simple,
            },
            jump: JumpSettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Extra cast distance below the collider's lower sphere, in meters.
    pub distance: f32,
    pub rings: u32,
    pub samples_per_ring: u32,
    pub max_active_points: u32,
    /// Collision groups considered ground.
    pub ground_mask: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            distance: 0.2,
            rings: 3,
            samples_per_ring: 8,
            max_active_points: 3,
            ground_mask: u32::MAX,
        }
    }
}

impl ProbeSettings {
    /// Center ray plus every ring sample.
    pub fn ray_count(&self) -> usize {
        self.rings as usize * self.samples_per_ring as usize + 1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundSettings {
    /// Influence scalar above which the character counts as grounded.
    pub amount_threshold: f32,
    /// Slopes steeper than this (degrees) are not ground contacts at all.
    pub max_detect_slope: f32,
    /// Slope (degrees) at which a contact's influence is halved.
    pub max_ground_slope: f32,
    /// Gap kept between the collider and the ground when snapping.
    pub offset: f32,
    /// Fraction of the gravity increment cancelled, keyed by ground influence.
    pub influence_curve: ResponseCurve,
}

impl Default for GroundSettings {
    fn default() -> Self {
        Self {
            amount_threshold: 0.5,
            max_detect_slope: 60.0,
            max_ground_slope: 45.0,
            offset: 0.05,
            influence_curve: ResponseCurve::linear(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodySettings {
    /// Capsule radius in meters.
    pub radius: f32,
    /// Total capsule height in meters, including both caps.
    pub height: f32,
    /// Downward acceleration accumulated into the gravity force.
    pub weight: f32,
}

impl Default for BodySettings {
    fn default() -> Self {
        Self {
            radius: 0.3,
            height: 1.8,
            weight: 20.0,
        }
    }
}

impl BodySettings {
    /// Distance from the capsule center to the center of either cap sphere.
    pub fn half_segment(&self) -> f32 {
        (self.height * 0.5 - self.radius).max(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceSettings {
    pub max_velocity: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    pub turn_acceleration: f32,
    pub turn_deceleration: f32,
    pub spherical_interpolation: bool,
    pub variant: ForceVariant,
}

impl Default for ForceSettings {
    fn default() -> Self {
        Self {
            max_velocity: 6.0,
            acceleration: 30.0,
            deceleration: 40.0,
            turn_acceleration: 10.0,
            turn_deceleration: 5.0,
            spherical_interpolation: true,
            variant: ForceVariant::Simple,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForceVariant {
    #[default]
    Simple,
    HeavyTurn(HeavyTurnSettings),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeavyTurnSettings {
    /// Degrees between the smoothed direction and the goal that count as a reversal.
    pub angle_threshold: f32,
    /// Fraction of the goal velocity the smoothed velocity must exceed.
    pub velocity_threshold: f32,
    /// Seconds of reduced responsiveness after a heavy turn.
    pub duration: f32,
    /// Rate (1/s) of the long-window direction and velocity filters.
    pub smoothing_rate: f32,
}

impl Default for HeavyTurnSettings {
    fn default() -> Self {
        Self {
            angle_threshold: 120.0,
            velocity_threshold: 0.6,
            duration: 0.35,
            smoothing_rate: 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JumpSettings {
    pub force: f32,
    /// Fraction of each gravity increment removed from the jump force.
    pub gravity_influence: f32,
    /// Seconds after a jump during which ground snapping is suppressed.
    pub settle_time: f32,
}

impl Default for JumpSettings {
    fn default() -> Self {
        Self {
            force: 7.0,
            gravity_influence: 0.5,
            settle_time: 0.2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub time: f32,
    pub value: f32,
}

/// Piecewise-linear curve over `[0, 1]`, clamped to its end keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseCurve {
    pub keys: Vec<CurveKey>,
}

impl ResponseCurve {
    pub fn linear() -> Self {
        Self {
            keys: vec![
                CurveKey {
                    time: 0.0,
                    value: 0.0,
                },
                CurveKey {
                    time: 1.0,
                    value: 1.0,
                },
            ],
        }
    }

    pub fn constant(value: f32) -> Self {
        Self {
            keys: vec![CurveKey { time: 0.0, value }],
        }
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };
        if t <= first.time {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b.time {
                let span = b.time - a.time;
                if span <= 0.0 {
                    return b.value;
                }
                let s = (t - a.time) / span;
                return a.value + (b.value - a.value) * s;
            }
        }
        last.value
    }

    fn validate_into(&self, label: &str, validation: &mut SettingsValidation) {
        if self.keys.is_empty() {
            validation
                .errors
                .push(format!("{} must have at least one key", label));
            return;
        }
        for (index, key) in self.keys.iter().enumerate() {
            if !key.time.is_finite() || !key.value.is_finite() {
                validation
                    .errors
                    .push(format!("{} key {} must be finite", label, index));
                continue;
            }
            if !(0.0..=1.0).contains(&key.time) {
                validation.errors.push(format!(
                    "{} key {} time {} outside [0, 1]",
                    label, index, key.time
                ));
            }
            if !(0.0..=1.0).contains(&key.value) {
                validation.errors.push(format!(
                    "{} key {} value {} outside [0, 1]",
                    label, index, key.value
                ));
            }
        }
        if self
            .keys
            .windows(2)
            .any(|pair| pair[1].time <= pair[0].time)
        {
            validation
                .errors
                .push(format!("{} key times must be strictly increasing", label));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SettingsValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SettingsValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl CharacterSettings {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string(self).map_err(|err| err.to_string())
    }

    /// Parses and validates; warnings are logged, errors are joined into the failure.
    pub fn load_toml(text: &str) -> Result<Self, String> {
        let settings = Self::parse_toml(text)?;
        settings.checked()
    }

    /// Returns the settings unchanged when they validate.
    pub fn checked(self) -> Result<Self, String> {
        let validation = self.validate();
        for warning in &validation.warnings {
            log::warn!("character settings: {}", warning);
        }
        if validation.is_ok() {
            Ok(self)
        } else {
            Err(validation.errors.join("; "))
        }
    }

    pub fn validate(&self) -> SettingsValidation {
        let mut validation = SettingsValidation::default();
        self.validate_probe(&mut validation);
        self.validate_ground(&mut validation);
        self.validate_body(&mut validation);
        validate_force("movement", &self.movement, &mut validation);
        validate_force("turn", &self.turn, &mut validation);
        self.validate_jump(&mut validation);
        validation
    }

    fn validate_probe(&self, validation: &mut SettingsValidation) {
        let probe = &self.probe;
        if !probe.distance.is_finite() || probe.distance < 0.0 {
            validation
                .errors
                .push("probe.distance must be finite and >= 0".to_string());
        }
        if probe.rings == 0 {
            validation.errors.push("probe.rings must be > 0".to_string());
        }
        if probe.samples_per_ring == 0 {
            validation
                .errors
                .push("probe.samples_per_ring must be > 0".to_string());
        }
        if probe.max_active_points == 0 {
            validation
                .errors
                .push("probe.max_active_points must be > 0".to_string());
        }
        let rays = u64::from(probe.rings) * u64::from(probe.samples_per_ring) + 1;
        if rays > u64::from(MAX_PROBE_RAYS) {
            validation.errors.push(format!(
                "probe ray count {} exceeds budget {}",
                rays, MAX_PROBE_RAYS
            ));
        } else if u64::from(probe.max_active_points) > rays {
            validation.warnings.push(format!(
                "probe.max_active_points {} exceeds ray count {}; influence can never reach 1",
                probe.max_active_points, rays
            ));
        }
        if probe.ground_mask == 0 {
            validation
                .warnings
                .push("probe.ground_mask is empty; the character can never be grounded".to_string());
        }
    }

    fn validate_ground(&self, validation: &mut SettingsValidation) {
        let ground = &self.ground;
        if !(0.0..=1.0).contains(&ground.amount_threshold) {
            validation
                .errors
                .push("ground.amount_threshold must be within [0, 1]".to_string());
        }
        if !ground.max_detect_slope.is_finite()
            || ground.max_detect_slope <= 0.0
            || ground.max_detect_slope > 180.0
        {
            validation
                .errors
                .push("ground.max_detect_slope must be within (0, 180]".to_string());
        }
        if !ground.max_ground_slope.is_finite() || ground.max_ground_slope <= 0.0 {
            validation
                .errors
                .push("ground.max_ground_slope must be finite and > 0".to_string());
        } else if ground.max_ground_slope > ground.max_detect_slope {
            validation.warnings.push(
                "ground.max_ground_slope exceeds max_detect_slope; steep contacts are cut off before their influence drops"
                    .to_string(),
            );
        }
        if !ground.offset.is_finite() {
            validation
                .errors
                .push("ground.offset must be finite".to_string());
        }
        ground
            .influence_curve
            .validate_into("ground.influence_curve", validation);
    }

    fn validate_body(&self, validation: &mut SettingsValidation) {
        let body = &self.body;
        if !body.radius.is_finite() || body.radius <= 0.0 {
            validation
                .errors
                .push("body.radius must be finite and > 0".to_string());
        }
        if !body.height.is_finite() || body.height < body.radius * 2.0 {
            validation
                .errors
                .push("body.height must be finite and >= 2 * radius".to_string());
        }
        if !body.weight.is_finite() || body.weight < 0.0 {
            validation
                .errors
                .push("body.weight must be finite and >= 0".to_string());
        }
    }

    fn validate_jump(&self, validation: &mut SettingsValidation) {
        let jump = &self.jump;
        if !jump.force.is_finite() || jump.force < 0.0 {
            validation
                .errors
                .push("jump.force must be finite and >= 0".to_string());
        }
        if !(0.0..=1.0).contains(&jump.gravity_influence) {
            validation
                .errors
                .push("jump.gravity_influence must be within [0, 1]".to_string());
        }
        if !jump.settle_time.is_finite() || jump.settle_time < 0.0 {
            validation
                .errors
                .push("jump.settle_time must be finite and >= 0".to_string());
        }
    }
}

fn validate_force(label: &str, force: &ForceSettings, validation: &mut SettingsValidation) {
    let positive = [
        ("max_velocity", force.max_velocity),
        ("acceleration", force.acceleration),
        ("deceleration", force.deceleration),
    ];
    for (name, value) in positive {
        if !value.is_finite() || value <= 0.0 {
            validation
                .errors
                .push(format!("{}.{} must be finite and > 0", label, name));
        }
    }
    let non_negative = [
        ("turn_acceleration", force.turn_acceleration),
        ("turn_deceleration", force.turn_deceleration),
    ];
    for (name, value) in non_negative {
        if !value.is_finite() || value < 0.0 {
            validation
                .errors
                .push(format!("{}.{} must be finite and >= 0", label, name));
        }
    }
    if force.turn_acceleration == 0.0 {
        validation
            .warnings
            .push(format!("{}.turn_acceleration is 0; direction never changes", label));
    }
    if let ForceVariant::HeavyTurn(heavy) = force.variant {
        if !heavy.duration.is_finite() || heavy.duration <= 0.0 {
            validation
                .errors
                .push(format!("{}.variant.duration must be finite and > 0", label));
        }
        if !(0.0..=180.0).contains(&heavy.angle_threshold) {
            validation.errors.push(format!(
                "{}.variant.angle_threshold must be within [0, 180]",
                label
            ));
        }
        if !(0.0..=1.0).contains(&heavy.velocity_threshold) {
            validation.errors.push(format!(
                "{}.variant.velocity_threshold must be within [0, 1]",
                label
            ));
        }
        if !heavy.smoothing_rate.is_finite() || heavy.smoothing_rate <= 0.0 {
            validation.errors.push(format!(
                "{}.variant.smoothing_rate must be finite and > 0",
                label
            ));
        }
    }
}
