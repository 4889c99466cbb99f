// Swerve chassis kinematics
//
// Forward map: chassis velocity (vx, vy, omega) -> four wheel velocity
// vectors, one per module. The inverse map is the least-squares solution
// of the overdetermined forward system, precomputed as a pseudoinverse.

use nalgebra::{SMatrix, SVector};

use super::angle::normalize;
use super::config::ModuleGeometry;
use super::error::{DriveError, Result};
use super::state::{ChassisSpeeds, ModuleState};

/// Below this wheel speed the direction is numerically meaningless.
const SPEED_EPSILON: f64 = 1e-9;

/// Kinematic model of a four-module swerve chassis.
///
/// Holds the last commanded heading per module so that a zero-velocity
/// command keeps the wheels pointing where they already are instead of
/// snapping them to an arbitrary angle.
pub struct SwerveKinematics {
    geometry: [ModuleGeometry; 4],
    inverse: SMatrix<f64, 3, 8>,
    headings: [f64; 4],
}

impl SwerveKinematics {
    /// Build the model for four modules in FL, FR, BL, BR order.
    pub fn new(geometry: [ModuleGeometry; 4]) -> Result<Self> {
        for g in &geometry {
            if !g.offset_x.is_finite() || !g.offset_y.is_finite() {
                return Err(DriveError::ConfigurationInvalid(format!(
                    "module geometry must be finite, got ({}, {})",
                    g.offset_x, g.offset_y
                )));
            }
        }

        // Two rows per module: wheel vx and wheel vy as functions of
        // [vx, vy, omega].
        let mut forward = SMatrix::<f64, 8, 3>::zeros();
        for (i, g) in geometry.iter().enumerate() {
            forward[(2 * i, 0)] = 1.0;
            forward[(2 * i, 2)] = -g.offset_y;
            forward[(2 * i + 1, 1)] = 1.0;
            forward[(2 * i + 1, 2)] = g.offset_x;
        }

        let inverse = forward
            .pseudo_inverse(1e-10)
            .map_err(|e| DriveError::ConfigurationInvalid(format!("degenerate geometry: {e}")))?;

        Ok(Self {
            geometry,
            inverse,
            headings: [0.0; 4],
        })
    }

    /// Chassis velocity to per-module target states.
    ///
    /// Speeds are unbounded here; run the result through
    /// [`desaturate_wheel_speeds`] before commanding modules.
    pub fn to_module_states(&mut self, speeds: ChassisSpeeds) -> [ModuleState; 4] {
        if speeds.is_still(SPEED_EPSILON) {
            return self
                .headings
                .map(|angle| ModuleState { speed: 0.0, angle });
        }

        let mut states = [ModuleState::default(); 4];
        for (i, g) in self.geometry.iter().enumerate() {
            let wx = speeds.vx - speeds.omega * g.offset_y;
            let wy = speeds.vy + speeds.omega * g.offset_x;
            let speed = wx.hypot(wy);

            let angle = if speed > SPEED_EPSILON {
                normalize(wy.atan2(wx).to_degrees())
            } else {
                // Rotation center sits on this module; keep it where it was
                self.headings[i]
            };

            states[i] = ModuleState { speed, angle };
            self.headings[i] = angle;
        }
        states
    }

    /// Seed the held headings, in degrees. Called after calibration so the
    /// first zero-velocity command holds the real wheel directions.
    pub fn reset_headings(&mut self, headings: [f64; 4]) {
        self.headings = headings.map(normalize);
    }

    /// Measured module states to a chassis velocity estimate
    /// (least-squares over the eight wheel velocity components).
    pub fn to_chassis_speeds(&self, states: &[ModuleState; 4]) -> ChassisSpeeds {
        let mut wheel = SVector::<f64, 8>::zeros();
        for (i, state) in states.iter().enumerate() {
            let angle = state.angle.to_radians();
            wheel[2 * i] = state.speed * angle.cos();
            wheel[2 * i + 1] = state.speed * angle.sin();
        }

        let chassis = self.inverse * wheel;
        ChassisSpeeds::new(chassis[0], chassis[1], chassis[2])
    }
}

/// Rescale all four speeds by a common factor when any exceeds `max_speed`.
///
/// Preserves the ratio between wheels, so the chassis motion keeps its
/// direction and merely slows down. Angles are untouched.
pub fn desaturate_wheel_speeds(states: &mut [ModuleState; 4], max_speed: f64) {
    let highest = states.iter().map(|s| s.speed.abs()).fold(0.0, f64::max);
    if highest > max_speed {
        let scale = max_speed / highest;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Square chassis, one meter on a side
    fn square() -> [ModuleGeometry; 4] {
        [
            ModuleGeometry { offset_x: 0.5, offset_y: 0.5 },
            ModuleGeometry { offset_x: 0.5, offset_y: -0.5 },
            ModuleGeometry { offset_x: -0.5, offset_y: 0.5 },
            ModuleGeometry { offset_x: -0.5, offset_y: -0.5 },
        ]
    }

    #[test]
    fn test_pure_translation_modules_agree() {
        let mut kin = SwerveKinematics::new(square()).unwrap();
        let states = kin.to_module_states(ChassisSpeeds::new(1.0, 1.0, 0.0));

        for state in &states {
            assert_relative_eq!(state.speed, std::f64::consts::SQRT_2, epsilon = 1e-12);
            assert_relative_eq!(state.angle, 45.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_forward_and_strafe_angles() {
        let mut kin = SwerveKinematics::new(square()).unwrap();

        let forward = kin.to_module_states(ChassisSpeeds::new(2.0, 0.0, 0.0));
        for state in &forward {
            assert_relative_eq!(state.speed, 2.0, epsilon = 1e-12);
            assert_relative_eq!(state.angle, 0.0, epsilon = 1e-9);
        }

        let left = kin.to_module_states(ChassisSpeeds::new(0.0, 1.5, 0.0));
        for state in &left {
            assert_relative_eq!(state.speed, 1.5, epsilon = 1e-12);
            assert_relative_eq!(state.angle, 90.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_pure_rotation_tangential() {
        let mut kin = SwerveKinematics::new(square()).unwrap();
        let states = kin.to_module_states(ChassisSpeeds::new(0.0, 0.0, 1.0));

        // Every module is hypot(0.5, 0.5) from center, moving tangentially
        let radius = 0.5f64.hypot(0.5);
        for state in &states {
            assert_relative_eq!(state.speed, radius, epsilon = 1e-12);
        }
        assert_relative_eq!(states[0].angle, 135.0, epsilon = 1e-9); // FL
        assert_relative_eq!(states[1].angle, 45.0, epsilon = 1e-9); // FR
        assert_relative_eq!(states[2].angle, 225.0, epsilon = 1e-9); // BL
        assert_relative_eq!(states[3].angle, 315.0, epsilon = 1e-9); // BR
    }

    #[test]
    fn test_translation_round_trip() {
        let mut kin = SwerveKinematics::new(square()).unwrap();
        let commanded = ChassisSpeeds::new(1.2, -0.4, 0.0);

        let states = kin.to_module_states(commanded);
        let recovered = kin.to_chassis_speeds(&states);

        assert_relative_eq!(recovered.vx, commanded.vx, epsilon = 1e-9);
        assert_relative_eq!(recovered.vy, commanded.vy, epsilon = 1e-9);
        assert_relative_eq!(recovered.omega, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mixed_motion_round_trip() {
        let mut kin = SwerveKinematics::new(square()).unwrap();
        let commanded = ChassisSpeeds::new(0.3, 0.1, 1.5);

        let states = kin.to_module_states(commanded);
        let recovered = kin.to_chassis_speeds(&states);

        assert_relative_eq!(recovered.vx, commanded.vx, epsilon = 1e-9);
        assert_relative_eq!(recovered.vy, commanded.vy, epsilon = 1e-9);
        assert_relative_eq!(recovered.omega, commanded.omega, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_command_holds_headings() {
        let mut kin = SwerveKinematics::new(square()).unwrap();

        let moving = kin.to_module_states(ChassisSpeeds::new(1.0, 1.0, 0.0));
        let stopped = kin.to_module_states(ChassisSpeeds::zero());

        for (before, after) in moving.iter().zip(&stopped) {
            assert_relative_eq!(after.angle, before.angle, epsilon = 1e-12);
            assert_relative_eq!(after.speed, 0.0);
        }
    }

    #[test]
    fn test_reset_headings() {
        let mut kin = SwerveKinematics::new(square()).unwrap();
        kin.reset_headings([10.0, 370.0, -20.0, 90.0]);

        let states = kin.to_module_states(ChassisSpeeds::zero());
        assert_relative_eq!(states[0].angle, 10.0);
        assert_relative_eq!(states[1].angle, 10.0); // normalized from 370
        assert_relative_eq!(states[2].angle, 340.0); // normalized from -20
        assert_relative_eq!(states[3].angle, 90.0);
    }

    #[test]
    fn test_rotation_center_on_module_keeps_heading() {
        // Rotating about FL leaves FL stationary; its heading must not jump
        let geometry = [
            ModuleGeometry { offset_x: 0.0, offset_y: 0.0 },
            ModuleGeometry { offset_x: 0.0, offset_y: -1.0 },
            ModuleGeometry { offset_x: -1.0, offset_y: 0.0 },
            ModuleGeometry { offset_x: -1.0, offset_y: -1.0 },
        ];
        let mut kin = SwerveKinematics::new(geometry).unwrap();
        kin.reset_headings([77.0; 4]);

        let states = kin.to_module_states(ChassisSpeeds::new(0.0, 0.0, 2.0));
        assert_relative_eq!(states[0].speed, 0.0, epsilon = 1e-12);
        assert_relative_eq!(states[0].angle, 77.0);
        assert!(states[1].speed > 0.0);
    }

    #[test]
    fn test_desaturation_scales_uniformly() {
        let mut states = [
            ModuleState::new(4.0, 10.0),
            ModuleState::new(-2.0, 20.0),
            ModuleState::new(1.0, 30.0),
            ModuleState::new(3.0, 40.0),
        ];
        desaturate_wheel_speeds(&mut states, 2.0);

        // Largest magnitude was 4.0, so everything halves
        assert_relative_eq!(states[0].speed, 2.0);
        assert_relative_eq!(states[1].speed, -1.0);
        assert_relative_eq!(states[2].speed, 0.5);
        assert_relative_eq!(states[3].speed, 1.5);
        for (state, angle) in states.iter().zip([10.0, 20.0, 30.0, 40.0]) {
            assert_relative_eq!(state.angle, angle);
        }
    }

    #[test]
    fn test_desaturation_noop_within_limit() {
        let mut states = [
            ModuleState::new(1.0, 0.0),
            ModuleState::new(-1.5, 0.0),
            ModuleState::new(0.5, 0.0),
            ModuleState::new(2.0, 0.0),
        ];
        let before = states;
        desaturate_wheel_speeds(&mut states, 2.0);
        assert_eq!(states, before);
    }

    #[test]
    fn test_degenerate_geometry_rejected() {
        let result = SwerveKinematics::new([
            ModuleGeometry { offset_x: f64::NAN, offset_y: 0.0 },
            ModuleGeometry { offset_x: 0.5, offset_y: -0.5 },
            ModuleGeometry { offset_x: -0.5, offset_y: 0.5 },
            ModuleGeometry { offset_x: -0.5, offset_y: -0.5 },
        ]);
        assert!(result.is_err());
    }
}
