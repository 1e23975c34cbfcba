//! Prediction confidence

/// Predictions smaller than this carry no usable signal
const MIN_SCORABLE_PREDICTION: f64 = 0.01;
/// Confidence returned for unscorable predictions
const DEFAULT_CONFIDENCE: f64 = 0.5;
const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 1.0;

/// Confidence in `[0.1, 1.0]` from the relative error between the
/// predicted and observed difference
pub fn confidence(predicted: f64, actual: f64) -> f64 {
    if !predicted.is_finite() || !actual.is_finite() {
        return MIN_CONFIDENCE;
    }
    if predicted.abs() < MIN_SCORABLE_PREDICTION {
        return DEFAULT_CONFIDENCE;
    }

    let relative_error = (predicted - actual).abs() / actual.abs().max(MIN_SCORABLE_PREDICTION);
    (1.0 - relative_error).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_prediction_is_full_confidence() {
        for v in [0.01, 0.5, -3.25, 20.0, -1500.0] {
            assert_eq!(confidence(v, v), 1.0);
        }
    }

    #[test]
    fn test_tiny_prediction_defaults() {
        assert_eq!(confidence(0.0, 50.0), 0.5);
        assert_eq!(confidence(0.009, 0.009), 0.5);
        assert_eq!(confidence(-0.005, -100.0), 0.5);
    }

    #[test]
    fn test_relative_error() {
        assert!((confidence(9.0, 10.0) - 0.9).abs() < 1e-12);
        assert!((confidence(-8.0, -10.0) - 0.8).abs() < 1e-12);
        // actual below the floor is measured against 0.01
        assert_eq!(confidence(5.0, 0.0), 0.1);
    }

    #[test]
    fn test_bounds_hold() {
        let values = [-1e6, -250.0, -1.0, -0.02, 0.0, 0.003, 0.02, 1.0, 33.3, 1e6];
        for &p in &values {
            for &a in &values {
                let c = confidence(p, a);
                assert!((0.1..=1.0).contains(&c), "confidence({}, {}) = {}", p, a, c);
            }
        }
        assert_eq!(confidence(f64::NAN, 1.0), 0.1);
    }

    #[test]
    fn test_monotonic_in_error() {
        let actual = 40.0;
        let mut last = f64::INFINITY;
        for predicted in [40.0, 38.0, 35.0, 30.0, 20.0, 5.0] {
            let c = confidence(predicted, actual);
            assert!(c <= last);
            last = c;
        }
    }
}
