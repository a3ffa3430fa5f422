//! Integration tests for version history, rollback and upgrades.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use conductor::clock::ManualClock;
use conductor::versions::INITIAL_VERSION;
use conductor::{
    ConductorError, IncrementOutcome, LearningStore, ProviderKind, RollbackCriteria, RollbackManager,
    RolloutManager, RolloutOptions, RolloutStatus, UpgradeOptions, UpgradeOutcome, Upgrader,
    VersionEntryKind, VersionStore,
};

const P: ProviderKind = ProviderKind::Cerebras;
const MODEL: &str = "llama-3.1-8b-instruct";

struct Fixture {
    versions: Arc<VersionStore>,
    learning: Arc<LearningStore>,
    rollback: RollbackManager,
    clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap(),
    ));
    let versions = Arc::new(VersionStore::new(clock.clone()));
    let learning = Arc::new(LearningStore::new(clock.clone()));
    let rollback = RollbackManager::new(versions.clone(), learning.clone(), clock.clone());
    Fixture {
        versions,
        learning,
        rollback,
        clock,
    }
}

fn record(f: &Fixture, quality: f64, n: usize) {
    for _ in 0..n {
        f.learning
            .record_sample(P, MODEL, "content-generation", quality, Duration::from_millis(300), 40);
    }
}

/// 1.0.0 with a 0.75 history, then promoted to 2.0.0 a day later.
fn upgraded(f: &Fixture) {
    f.versions.ensure_initial(P, MODEL, "1.0.0");
    record(f, 0.75, 20);
    f.clock.advance(chrono::Duration::days(1));
    let baseline = f.learning.model_summary(P, MODEL);
    f.versions
        .promote(P, MODEL, "2.0.0", baseline, vec!["faster decoding".into()])
        .unwrap();
    f.clock.advance(chrono::Duration::hours(1));
}

// ============================================================================
// Version store
// ============================================================================

#[test]
fn promote_keeps_exactly_one_current() {
    let f = fixture();
    upgraded(&f);
    f.versions.promote(P, MODEL, "3.0.0", None, Vec::new()).unwrap();

    let history = f.versions.history(P, MODEL);
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|v| v.current).count(), 1);
    assert_eq!(history[0].version, "3.0.0");
    assert!(history[1..].iter().all(|v| v.deprecated.is_some()));
}

#[test]
fn ensure_initial_is_idempotent() {
    let f = fixture();
    let first = f.versions.ensure_initial(P, MODEL, INITIAL_VERSION);
    let again = f.versions.ensure_initial(P, MODEL, "9.9.9");
    assert_eq!(first, again);
    assert_eq!(first.kind, VersionEntryKind::Initial);
    assert_eq!(f.versions.history(P, MODEL).len(), 1);
}

#[test]
fn compare_reports_baseline_deltas() {
    let f = fixture();
    upgraded(&f);
    record(&f, 0.55, 20);
    f.versions
        .promote(
            P,
            MODEL,
            "3.0.0",
            f.learning.model_summary(P, MODEL),
            vec!["faster decoding".into(), "longer context".into()],
        )
        .unwrap();

    let cmp = f.versions.compare(P, MODEL, "2.0.0", "3.0.0").unwrap();
    assert!((cmp.quality_delta.unwrap() - (0.65 - 0.75)).abs() < 1e-9);
    assert_eq!(cmp.new_improvements, vec!["longer context".to_string()]);

    assert!(matches!(
        f.versions.compare(P, MODEL, "2.0.0", "4.0.0"),
        Err(ConductorError::NotFound(_))
    ));
}

// ============================================================================
// Rollback checks
// ============================================================================

#[test]
fn regression_below_threshold_and_baseline_needs_rollback() {
    let f = fixture();
    upgraded(&f);
    record(&f, 0.3, 15);

    let check = f.rollback.check_needed(P, MODEL, &RollbackCriteria::default());
    assert!(check.needed, "{}", check.reason);
    assert_eq!(check.current_version.as_deref(), Some("2.0.0"));
    assert_eq!(check.rollback_to.as_deref(), Some("1.0.0"));
    assert_eq!(check.usage, 15);
    assert!((check.recent_quality.unwrap() - 0.3).abs() < 1e-9);
    assert!((check.baseline_quality.unwrap() - 0.75).abs() < 1e-9);
}

#[test]
fn too_little_usage_is_not_a_regression() {
    let f = fixture();
    upgraded(&f);
    record(&f, 0.3, 9);

    let check = f.rollback.check_needed(P, MODEL, &RollbackCriteria::default());
    assert!(!check.needed);
    assert!(check.reason.contains("insufficient usage"));
}

#[test]
fn quality_above_threshold_is_not_a_regression() {
    let f = fixture();
    upgraded(&f);
    record(&f, 0.65, 30);

    let check = f.rollback.check_needed(P, MODEL, &RollbackCriteria::default());
    assert!(!check.needed);
}

#[test]
fn window_ignores_samples_older_than_criteria() {
    let f = fixture();
    upgraded(&f);
    record(&f, 0.3, 15);
    f.clock.advance(chrono::Duration::days(8));
    record(&f, 0.3, 3);

    let check = f.rollback.check_needed(P, MODEL, &RollbackCriteria::default());
    assert_eq!(check.usage, 3);
    assert!(!check.needed);

    let wide = RollbackCriteria::default().days_since_upgrade(30);
    assert!(f.rollback.check_needed(P, MODEL, &wide).needed);
}

#[test]
fn initial_version_never_needs_rollback() {
    let f = fixture();
    f.versions.ensure_initial(P, MODEL, "1.0.0");
    record(&f, 0.1, 50);
    assert!(!f.rollback.check_needed(P, MODEL, &RollbackCriteria::default()).needed);
    assert!(!f.rollback.check_needed(P, "unknown", &RollbackCriteria::default()).needed);
}

// ============================================================================
// Rollback execution
// ============================================================================

#[test]
fn auto_rollback_restores_previous_version_with_reason() {
    let f = fixture();
    upgraded(&f);
    record(&f, 0.3, 15);

    let restored = f
        .rollback
        .auto_rollback(P, MODEL, &RollbackCriteria::default())
        .unwrap()
        .unwrap();
    assert_eq!(restored.version, "1.0.0");
    assert_eq!(restored.kind, VersionEntryKind::Rollback);
    assert!(restored.rollback_reason.unwrap().contains("quality dropped"));

    let history = f.versions.history(P, MODEL);
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|v| v.current).count(), 1);
    let abandoned = history.iter().find(|v| v.version == "2.0.0").unwrap();
    assert!(abandoned.deprecated.is_some());

    // After a rollback there is nothing further to undo automatically.
    assert!(
        f.rollback
            .auto_rollback(P, MODEL, &RollbackCriteria::default())
            .unwrap()
            .is_none()
    );
}

#[test]
fn manual_rollback_to_explicit_target() {
    let f = fixture();
    upgraded(&f);
    f.versions.promote(P, MODEL, "3.0.0", None, Vec::new()).unwrap();

    let record = f
        .rollback
        .rollback(P, MODEL, Some("1.0.0"), "operator request")
        .unwrap();
    assert_eq!(record.version, "1.0.0");
    assert_eq!(record.previous_version.as_deref(), Some("3.0.0"));

    assert!(matches!(
        f.rollback.rollback(P, MODEL, Some("1.0.0"), "again"),
        Err(ConductorError::Validation(_))
    ));
    assert!(matches!(
        f.rollback.rollback(P, MODEL, Some("7.0.0"), "missing"),
        Err(ConductorError::NotFound(_))
    ));
}

#[test]
fn candidates_are_distinct_non_current_versions() {
    let f = fixture();
    upgraded(&f);
    f.versions.promote(P, MODEL, "3.0.0", None, Vec::new()).unwrap();
    f.rollback.rollback(P, MODEL, Some("2.0.0"), "regression").unwrap();

    let candidates: Vec<_> = f
        .rollback
        .rollback_candidates(P, MODEL)
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(candidates, vec!["3.0.0".to_string(), "1.0.0".to_string()]);
}

// ============================================================================
// Upgrades
// ============================================================================

fn upgrader(f: &Fixture) -> (Upgrader, Arc<RolloutManager>) {
    let rollouts = Arc::new(RolloutManager::new(
        f.versions.clone(),
        f.learning.clone(),
        f.clock.clone(),
    ));
    (
        Upgrader::new(f.versions.clone(), f.learning.clone(), rollouts.clone()),
        rollouts,
    )
}

#[tokio::test]
async fn gradual_upgrade_starts_rollout_from_initial_version() {
    let f = fixture();
    let (upgrader, rollouts) = upgrader(&f);

    let outcome = upgrader
        .auto_upgrade(
            P,
            MODEL,
            "2.0.0",
            UpgradeOptions::default().rollout(RolloutOptions::default().initial_percentage(5)),
        )
        .await
        .unwrap();

    let UpgradeOutcome::RolloutStarted(rollout) = outcome else {
        panic!("expected a rollout, got {outcome:?}");
    };
    assert_eq!(rollout.from_version, INITIAL_VERSION);
    assert_eq!(rollout.current_percentage, 5);
    assert_eq!(
        rollouts.get(&rollout.id).unwrap().status,
        RolloutStatus::Active
    );
    // Nothing promoted yet.
    assert_eq!(f.versions.current(P, MODEL).unwrap().version, INITIAL_VERSION);
}

#[tokio::test]
async fn gradual_upgrade_records_improvements_on_completion() {
    let f = fixture();
    let (upgrader, rollouts) = upgrader(&f);

    let outcome = upgrader
        .auto_upgrade(
            P,
            MODEL,
            "2.0.0",
            UpgradeOptions::default()
                .improvement("better hashtags")
                .rollout(RolloutOptions::default().initial_percentage(90)),
        )
        .await
        .unwrap();
    let UpgradeOutcome::RolloutStarted(rollout) = outcome else {
        panic!("expected a rollout, got {outcome:?}");
    };
    assert_eq!(rollout.improvements, vec!["better hashtags".to_string()]);

    f.clock.advance(chrono::Duration::days(1));
    assert_eq!(
        rollouts.increment_if_due(&rollout.id).unwrap(),
        IncrementOutcome::Completed
    );

    let current = f.versions.current(P, MODEL).unwrap();
    assert_eq!(current.version, "2.0.0");
    assert_eq!(current.improvements[0], "better hashtags");
    assert!(current.improvements[1].starts_with("gradual rollout"));
}

#[tokio::test]
async fn immediate_upgrade_promotes_with_baseline() {
    let f = fixture();
    f.versions.ensure_initial(P, MODEL, "1.0.0");
    record(&f, 0.6, 12);
    let (upgrader, _rollouts) = upgrader(&f);

    let outcome = upgrader
        .auto_upgrade(
            P,
            MODEL,
            "2.0.0",
            UpgradeOptions::default()
                .gradual(false)
                .improvement("better hashtags"),
        )
        .await
        .unwrap();

    let UpgradeOutcome::Promoted(record) = outcome else {
        panic!("expected promotion, got {outcome:?}");
    };
    assert_eq!(record.version, "2.0.0");
    assert_eq!(record.improvements, vec!["better hashtags".to_string()]);
    assert_eq!(record.baseline.unwrap().usage_count, 12);
}

#[tokio::test]
async fn upgrade_to_current_version_is_rejected() {
    let f = fixture();
    f.versions.ensure_initial(P, MODEL, "1.0.0");
    let (upgrader, _rollouts) = upgrader(&f);

    let err = upgrader
        .auto_upgrade(P, MODEL, "1.0.0", UpgradeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Validation(_)));
}

#[test]
fn recommendations_flag_poor_heavily_used_models() {
    let f = fixture();
    record(&f, 0.4, 11);
    f.learning
        .record_sample(P, "other", "translation", 0.2, Duration::ZERO, 0);
    let (upgrader, _rollouts) = upgrader(&f);

    let recs = upgrader.upgrade_recommendations();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].model, MODEL);
    assert_eq!(recs[0].usage_count, 11);
}
