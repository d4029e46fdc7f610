//! DST tests for Tier 1 -> Tier 2 promotion through the coordinator.

mod common;

use std::collections::BTreeSet;

use common::{ScriptedLLMProvider, DST_SEEDS};
use strata_memory::dst::{FaultConfig, FaultType, SimConfig, Simulation};
use strata_memory::events::{Decision, EventType};
use strata_memory::lifecycle::{LifecycleConfig, RunStatus, Tier};
use strata_memory::storage::{FactStore, TurnRole, TurnStore};

// =============================================================================
// Threshold Decisions
// =============================================================================

#[tokio::test]
async fn test_candidates_split_at_threshold() {
    let env = Simulation::new(SimConfig::with_seed(42)).build();
    let llm = ScriptedLLMProvider::new(42, &[(1.0, 0.9), (1.0, 0.1)]);
    let mut sim = env
        .create_lifecycle_with_llm(LifecycleConfig::default().with_min_score(0.5), llm.clone())
        .unwrap();
    sim.coordinator.run_recovery_sweep().await;

    sim.say("s1", TurnRole::User, "We are shipping the beta on Friday.")
        .await
        .unwrap();
    let report = sim.coordinator.on_session_concluded("s1").await;

    let promotion = report.promotion.unwrap();
    assert_eq!(promotion.candidates, 2);
    assert_eq!(promotion.promoted, 1);
    assert_eq!(promotion.rejected, 1);
    assert_eq!(llm.extraction_calls(), 1);

    let facts = sim.facts.list_by_session("s1").await.unwrap();
    assert_eq!(facts.len(), 1);
    assert!((facts[0].score - 0.9).abs() < 1e-9);
    assert!(!facts[0].justification.is_empty());

    let events = sim.events.drain();
    let promotes: Vec<_> = events
        .iter()
        .filter(|e| e.event_type() == EventType::Promote)
        .collect();
    let rejects: Vec<_> = events
        .iter()
        .filter(|e| e.event_type() == EventType::Reject)
        .collect();
    assert_eq!(promotes.len(), 1);
    assert_eq!(rejects.len(), 1);
    assert_eq!(promotes[0].subject_id, facts[0].id);
    assert!(rejects[0].justification.contains("below"));
    match &rejects[0].decision {
        Decision::Reject {
            score, threshold, ..
        } => {
            assert!((score - 0.1).abs() < 1e-9);
            assert!((threshold - 0.5).abs() < 1e-9);
        }
        other => panic!("unexpected decision {other:?}"),
    }
}

#[tokio::test]
async fn test_score_equal_to_threshold_promotes() {
    let env = Simulation::new(SimConfig::with_seed(7)).build();
    let llm = ScriptedLLMProvider::new(7, &[(1.0, 0.5)]);
    let sim = env
        .create_lifecycle_with_llm(LifecycleConfig::default().with_min_score(0.5), llm)
        .unwrap();
    sim.coordinator.run_recovery_sweep().await;

    sim.say("s1", TurnRole::User, "The office wifi password changed.")
        .await
        .unwrap();
    let report = sim.coordinator.on_session_concluded("s1").await;

    assert_eq!(report.promotion.unwrap().promoted, 1);
}

#[tokio::test]
async fn test_nothing_significant_still_processes_turns() {
    let env = Simulation::new(SimConfig::with_seed(3)).build();
    let llm = ScriptedLLMProvider::new(3, &[]);
    let sim = env
        .create_lifecycle_with_llm(LifecycleConfig::default(), llm)
        .unwrap();
    sim.coordinator.run_recovery_sweep().await;

    sim.say("s1", TurnRole::User, "Hello there, how are you today?")
        .await
        .unwrap();
    let report = sim.coordinator.on_session_concluded("s1").await;

    let promotion = report.promotion.unwrap();
    assert_eq!(promotion.candidates, 0);
    assert_eq!(promotion.turns_processed, 1);
    assert_eq!(sim.turns.backlog_count(Some("s1")).await.unwrap(), 0);
    assert_eq!(sim.facts.fact_count(), 0);
}

// =============================================================================
// Deferred Windows
// =============================================================================

#[tokio::test]
async fn test_unavailable_service_defers_until_next_sweep() {
    // Three injections exhaust the default retry budget of one extraction.
    let env = Simulation::new(SimConfig::with_seed(11))
        .with_fault(FaultConfig::new(FaultType::LlmServiceUnavailable, 1.0).with_max_injections(3))
        .build();
    let sim = env
        .create_lifecycle(LifecycleConfig::default().with_min_score(0.0))
        .unwrap();
    sim.say("s1", TurnRole::User, "My landlord is raising the rent in May.")
        .await
        .unwrap();

    let first = sim.coordinator.run_recovery_sweep().await;

    assert_eq!(first.promotion.unwrap().deferred, vec!["s1".to_string()]);
    assert_eq!(sim.turns.backlog_count(Some("s1")).await.unwrap(), 1);
    let health = sim.coordinator.health().await;
    assert_eq!(health.deferred_sessions, vec!["s1".to_string()]);
    assert_eq!(health.tier(Tier::Turns).last_status, Some(RunStatus::Retryable));
    assert_eq!(health.tier(Tier::Turns).consecutive_failures, 1);

    let second = sim.coordinator.run_recovery_sweep().await;

    assert!(second.promotion.unwrap().promoted > 0);
    assert_eq!(sim.turns.backlog_count(Some("s1")).await.unwrap(), 0);
    let health = sim.coordinator.health().await;
    assert!(health.deferred_sessions.is_empty());
    assert_eq!(health.tier(Tier::Turns).last_status, Some(RunStatus::Succeeded));
    assert_eq!(health.tier(Tier::Turns).consecutive_failures, 0);
}

// =============================================================================
// Randomized Faults
// =============================================================================

/// Under random reasoning-service and storage faults, repeated sweeps
/// converge to the fault-free result: every turn processed exactly once and
/// the same facts promoted.
#[tokio::test]
async fn test_promotion_converges_under_faults() {
    const SWEEPS_MAX: usize = 50;

    for seed in DST_SEEDS {
        let expected = promoted_fact_ids(Simulation::new(SimConfig::with_seed(seed)), 1).await;

        let faulty = Simulation::new(SimConfig::with_seed(seed))
            .with_llm_faults(0.2)
            .with_fault(FaultConfig::new(FaultType::StorageWriteFail, 0.1).with_filter("fact_insert"));
        let actual = promoted_fact_ids(faulty, SWEEPS_MAX).await;

        assert_eq!(actual, expected, "seed {seed}");
    }
}

async fn promoted_fact_ids(sim: Simulation, sweeps_max: usize) -> BTreeSet<String> {
    let lines = [
        "Alice moved to Oslo to work for Acme.",
        "Acme is building a warehouse robot.",
        "Bob from Acme leads the robot project.",
        "The robot pilot starts in March.",
        "Alice prefers tea over coffee.",
    ];

    let env = sim.build();
    let lifecycle = env
        .create_lifecycle(
            LifecycleConfig::default()
                .with_min_score(0.0)
                .with_promotion_window(2),
        )
        .unwrap();
    for (i, line) in lines.iter().enumerate() {
        let session = if i % 2 == 0 { "s1" } else { "s2" };
        lifecycle.say(session, TurnRole::User, line).await.unwrap();
    }

    for _ in 0..sweeps_max {
        lifecycle.coordinator.run_recovery_sweep().await;
        if lifecycle.turns.backlog_count(None).await.unwrap() == 0 {
            break;
        }
    }
    assert_eq!(lifecycle.turns.backlog_count(None).await.unwrap(), 0);

    let mut ids = BTreeSet::new();
    for session in ["s1", "s2"] {
        for fact in lifecycle.facts.list_by_session(session).await.unwrap() {
            ids.insert(fact.id);
        }
    }
    ids
}
