//! Foot placement targets from downward ray casts.
#![forbid(unsafe_code)]

use character_grounding::GroundRaycast;
use rapier3d::math::{Point, Rotation, Vector};
use rapier3d::prelude::Real;

#[derive(Clone, Copy, Debug)]
pub struct FootIkConfig {
    pub enabled: bool,
    /// Height above the animated foot where each ray starts.
    pub ray_lift: Real,
    pub ray_distance: Real,
    /// Gap kept between the sole target and the surface.
    pub foot_height: Real,
    pub mask: u32,
}

impl Default for FootIkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ray_lift: 1.0,
            ray_distance: 1.5,
            foot_height: 0.1,
            mask: u32::MAX,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FootTarget {
    pub position: Point<Real>,
    pub normal: Vector<Real>,
}

impl FootTarget {
    /// Rotation tilting the foot's up axis onto the surface normal.
    pub fn rotation(&self) -> Rotation<Real> {
        Rotation::rotation_between(&Vector::y(), &self.normal).unwrap_or_else(Rotation::identity)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FeetTargets {
    pub left: Option<FootTarget>,
    pub right: Option<FootTarget>,
}

pub fn solve_foot<C: GroundRaycast + ?Sized>(
    caster: &C,
    config: &FootIkConfig,
    foot: Point<Real>,
) -> Option<FootTarget> {
    if !config.enabled {
        return None;
    }
    let origin = foot + Vector::y() * config.ray_lift;
    let hit = caster.cast_down(origin, config.ray_distance, config.mask)?;
    Some(FootTarget {
        position: hit.point + Vector::y() * config.foot_height,
        normal: hit.normal,
    })
}

pub fn solve_feet<C: GroundRaycast + ?Sized>(
    caster: &C,
    config: &FootIkConfig,
    left: Point<Real>,
    right: Point<Real>,
) -> FeetTargets {
    FeetTargets {
        left: solve_foot(caster, config, left),
        right: solve_foot(caster, config, right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use character_grounding::GroundHit;

    /// Ground at y = 0 for x < 0 and a 0.3 m ledge for x >= 0.
    struct Ledge;

    impl GroundRaycast for Ledge {
        fn cast_down(&self, origin: Point<Real>, max_distance: Real, mask: u32) -> Option<GroundHit> {
            if mask & 1 == 0 {
                return None;
            }
            let height = if origin.x >= 0.0 { 0.3 } else { 0.0 };
            let distance = origin.y - height;
            (distance >= 0.0 && distance <= max_distance).then(|| GroundHit {
                point: Point::new(origin.x, height, origin.z),
                normal: Vector::y(),
            })
        }
    }

    #[test]
    fn feet_follow_uneven_ground() {
        let config = FootIkConfig::default();
        let feet = solve_feet(
            &Ledge,
            &config,
            Point::new(-0.15, 0.0, 0.0),
            Point::new(0.15, 0.0, 0.0),
        );
        let left = feet.left.expect("left");
        let right = feet.right.expect("right");
        assert!((left.position.y - 0.1).abs() < 1.0e-6);
        assert!((right.position.y - 0.4).abs() < 1.0e-6);
        assert_eq!(right.position.x, 0.15);
        assert_eq!(left.rotation(), Rotation::identity());
    }

    #[test]
    fn disabled_or_out_of_range_yields_nothing() {
        let disabled = FootIkConfig {
            enabled: false,
            ..FootIkConfig::default()
        };
        assert_eq!(solve_foot(&Ledge, &disabled, Point::origin()), None);

        let short = FootIkConfig {
            ray_distance: 0.5,
            ..FootIkConfig::default()
        };
        assert_eq!(solve_foot(&Ledge, &short, Point::new(-1.0, 0.0, 0.0)), None);

        let masked = FootIkConfig {
            mask: 2,
            ..FootIkConfig::default()
        };
        assert_eq!(solve_feet(&Ledge, &masked, Point::origin(), Point::origin()), FeetTargets::default());
    }

    #[test]
    fn rotation_matches_surface_normal() {
        let normal = Vector::new(0.0, 0.8, 0.6);
        let target = FootTarget {
            position: Point::origin(),
            normal,
        };
        assert!((target.rotation() * Vector::y() - normal).norm() < 1.0e-5);
    }
}
