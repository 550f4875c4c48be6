//! Threshold evaluation

use crate::models::{duration_str, PingSample, Verdict};
use std::time::Duration;

/// Compare the sampled maximum against the allowed maximum.
///
/// Equal values pass.
pub fn evaluate(sample: &PingSample, max_desired_latency: Duration) -> Verdict {
    if sample.max > max_desired_latency {
        Verdict::ThresholdExceeded {
            message: format!(
                "max latency is greater than expected: expected: ({}) result: ({})",
                duration_str::format(max_desired_latency),
                duration_str::format(sample.max)
            ),
        }
    } else {
        Verdict::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_max(max: Duration) -> PingSample {
        PingSample::new(Duration::from_micros(100), Duration::from_micros(500), max, Duration::from_micros(20))
    }

    #[test]
    fn test_exceeded_message_names_both_values() {
        let verdict = evaluate(&with_max(Duration::from_millis(10)), Duration::from_millis(5));
        match verdict {
            Verdict::ThresholdExceeded { message } => {
                assert!(message.contains("10ms"));
                assert!(message.contains("5ms"));
            }
            Verdict::Passed => panic!("10ms must exceed 5ms"),
        }
    }

    #[test]
    fn test_equal_passes() {
        assert!(evaluate(&with_max(Duration::from_millis(5)), Duration::from_millis(5)).is_passed());
    }

    proptest! {
        #[test]
        fn verdict_follows_threshold(max_us in 0u64..10_000_000, threshold_us in 1u64..10_000_000) {
            let verdict = evaluate(&with_max(Duration::from_micros(max_us)), Duration::from_micros(threshold_us));
            prop_assert_eq!(verdict.is_passed(), max_us <= threshold_us);
        }
    }
}
