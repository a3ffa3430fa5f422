//! Sticky cohort assignment.
//!
//! A user lands in bucket `hash(user_id, rollout_id) mod 100` and is in the
//! new-version cohort while that bucket is below the rollout percentage. The
//! same user therefore stays in the same cohort for as long as the
//! percentage is unchanged, and only ever moves into the new cohort as the
//! percentage grows.
//!
//! Anonymous callers have no identity to hash and get a uniform draw per
//! request instead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;

/// Deterministic bucket in `0..100`.
///
/// `DefaultHasher::new()` uses fixed keys, so the result is stable for a
/// given build. Including the rollout id decorrelates cohorts across
/// rollouts.
pub fn bucket(user_id: &str, rollout_id: &str) -> u8 {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    rollout_id.hash(&mut hasher);
    (hasher.finish() % 100) as u8
}

/// Whether a caller falls inside `percentage`.
pub fn in_cohort(user_id: Option<&str>, rollout_id: &str, percentage: u8) -> bool {
    match user_id {
        Some(user) => bucket(user, rollout_id) < percentage,
        None => rand::thread_rng().gen_range(0..100u8) < percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable() {
        let a = bucket("user-42", "openrouter:m:2.0.0");
        for _ in 0..100 {
            assert_eq!(bucket("user-42", "openrouter:m:2.0.0"), a);
        }
        assert!(a < 100);
    }

    #[test]
    fn zero_and_full_percentages_are_absolute() {
        for i in 0..500 {
            let user = format!("u{i}");
            assert!(!in_cohort(Some(&user), "r", 0));
            assert!(in_cohort(Some(&user), "r", 100));
        }
        assert!(!in_cohort(None, "r", 0));
        assert!(in_cohort(None, "r", 100));
    }

    #[test]
    fn cohort_only_grows_with_percentage() {
        for i in 0..1000 {
            let user = format!("user-{i}");
            if in_cohort(Some(&user), "r", 30) {
                assert!(in_cohort(Some(&user), "r", 40));
            }
        }
    }
}
