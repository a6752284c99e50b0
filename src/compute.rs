//! The numeric function behind the service.

/// Real cube root of `value`. Negative inputs give negative roots.
pub fn cube_root(value: i32) -> f64 {
    f64::from(value).cbrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_cubes() {
        for (n, expected) in [(27, 3.0), (-8, -2.0), (0, 0.0), (1_000_000, 100.0), (-1, -1.0)] {
            assert!((cube_root(n) - expected).abs() < 1e-12, "cube_root({n})");
        }
    }

    #[test]
    fn test_sign_symmetry() {
        for n in [1, 2, 7, 26, 1000, 123_456_789, i32::MAX] {
            assert_eq!(cube_root(-n), -cube_root(n));
        }
    }

    #[test]
    fn test_cube_approximates_input() {
        for n in [2, -3, 10, 999, -65_536, i32::MIN, i32::MAX] {
            let root = cube_root(n);
            let cubed = root * root * root;
            let tolerance = f64::from(n).abs() * 1e-12;
            assert!(
                (cubed - f64::from(n)).abs() <= tolerance,
                "cube_root({n})^3 = {cubed}"
            );
        }
    }
}
