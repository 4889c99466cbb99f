// Angle arithmetic for steering control
//
// All angles are in degrees. Positive rotation is counter-clockwise.

use super::state::ModuleState;

/// Wrap an angle into [0, 360).
///
/// Total over all finite inputs, including negatives and values beyond
/// one turn. Idempotent: normalize(normalize(a)) == normalize(a).
pub fn normalize(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Signed shortest rotation from `from` to `to`, in (-180, 180].
///
/// normalize(from + shortest_delta(from, to)) == normalize(to) always holds.
pub fn shortest_delta(from: f64, to: f64) -> f64 {
    let delta = normalize(to - from);
    if delta > 180.0 { delta - 360.0 } else { delta }
}

/// Re-scope a target state so the steering rotation never exceeds 90 degrees.
///
/// The target angle is first moved to the representation closest to
/// `current_angle`. If the remaining rotation is still more than 90 degrees,
/// the wheel is pointed the opposite way instead and the drive speed is
/// negated, which produces the same chassis motion with a quarter turn or
/// less of steering.
///
/// The returned angle is continuous (not re-wrapped), so it can feed a
/// continuous-position steering loop directly.
pub fn optimize(target: ModuleState, current_angle: f64) -> ModuleState {
    let delta = shortest_delta(current_angle, target.angle);
    let mut angle = current_angle + delta;
    let mut speed = target.speed;

    if delta.abs() > 90.0 {
        speed = -speed;
        angle += if delta > 0.0 { -180.0 } else { 180.0 };
    }

    ModuleState { speed, angle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_range() {
        assert_relative_eq!(normalize(0.0), 0.0);
        assert_relative_eq!(normalize(359.9), 359.9);
        assert_relative_eq!(normalize(360.0), 0.0);
        assert_relative_eq!(normalize(720.0), 0.0);
        assert_relative_eq!(normalize(370.0), 10.0);
        assert_relative_eq!(normalize(-10.0), 350.0);
        assert_relative_eq!(normalize(-360.0), 0.0);
        assert_relative_eq!(normalize(-725.0), 355.0);
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in [-1000.0, -360.0, -90.0, 0.0, 45.0, 360.0, 719.5, 1e6] {
            let once = normalize(raw);
            assert!((0.0..360.0).contains(&once), "normalize({raw}) = {once}");
            assert_relative_eq!(normalize(once), once);
        }
    }

    #[test]
    fn test_normalize_tiny_negative() {
        // -1e-16 rem_euclid 360 rounds to 360.0 exactly; must still land in range
        let result = normalize(-1e-16);
        assert!((0.0..360.0).contains(&result), "got {result}");
        assert_relative_eq!(result, 0.0);
    }

    #[test]
    fn test_shortest_delta_wrap() {
        assert_relative_eq!(shortest_delta(350.0, 10.0), 20.0);
        assert_relative_eq!(shortest_delta(10.0, 350.0), -20.0);
        assert_relative_eq!(shortest_delta(0.0, 180.0), 180.0);
        assert_relative_eq!(shortest_delta(90.0, 90.0), 0.0);
        assert_relative_eq!(shortest_delta(0.0, 270.0), -90.0);
    }

    #[test]
    fn test_shortest_delta_properties() {
        let samples = [-270.0, -45.0, 0.0, 10.0, 90.0, 179.0, 181.0, 350.0, 720.0];
        for &a in &samples {
            for &b in &samples {
                let delta = shortest_delta(a, b);
                assert!(
                    delta > -180.0 && delta <= 180.0,
                    "shortest_delta({a}, {b}) = {delta} out of range"
                );
                assert_relative_eq!(
                    normalize(a + delta),
                    normalize(b),
                    max_relative = 1e-9,
                    epsilon = 1e-9
                );
            }
        }
    }

    #[test]
    fn test_optimize_no_flip_below_quarter_turn() {
        let target = ModuleState { speed: 1.0, angle: 45.0 };
        let result = optimize(target, 0.0);
        assert_relative_eq!(result.speed, 1.0);
        assert_relative_eq!(result.angle, 45.0);
    }

    #[test]
    fn test_optimize_flips_opposed_target() {
        // Pointing the opposite way: keep the wheel still, reverse the drive
        let target = ModuleState { speed: 1.0, angle: 180.0 };
        let result = optimize(target, 0.0);
        assert_relative_eq!(result.speed, -1.0);
        assert_relative_eq!(result.angle, 0.0);
    }

    #[test]
    fn test_optimize_rotation_never_exceeds_quarter_turn() {
        let currents = [-180.0, 0.0, 37.0, 90.0, 270.0, 725.0];
        let targets = [0.0, 45.0, 91.0, 135.0, 180.0, 269.0, 359.0];
        for &current in &currents {
            for &angle in &targets {
                let result = optimize(ModuleState { speed: 2.0, angle }, current);
                let rotation = result.angle - current;
                assert!(
                    rotation.abs() <= 90.0 + 1e-9,
                    "optimize to {angle} from {current}: rotation {rotation}"
                );
            }
        }
    }

    #[test]
    fn test_optimize_flip_is_half_turn_congruent() {
        for &angle in &[0.0, 30.0, 120.0, 200.0, 340.0] {
            for &current in &[0.0, 95.0, 180.0, 301.0] {
                let result = optimize(ModuleState { speed: 1.5, angle }, current);
                let expected = if result.speed < 0.0 {
                    normalize(angle + 180.0)
                } else {
                    normalize(angle)
                };
                assert_relative_eq!(
                    normalize(result.angle),
                    expected,
                    max_relative = 1e-9,
                    epsilon = 1e-9
                );
            }
        }
    }

    #[test]
    fn test_optimize_stays_near_current_winding() {
        // A steering loop two turns in keeps its winding, never unwinds to [0, 360)
        let result = optimize(ModuleState { speed: 1.0, angle: 10.0 }, 720.0);
        assert_relative_eq!(result.angle, 730.0);
        assert_relative_eq!(result.speed, 1.0);
    }

    #[test]
    fn test_optimize_zero_speed_keeps_sign() {
        let result = optimize(ModuleState { speed: 0.0, angle: 170.0 }, 0.0);
        assert_relative_eq!(result.speed, 0.0);
        assert_relative_eq!(result.angle, -10.0);
    }
}
