//! DST tests for Tier 2 -> Tier 3 consolidation and the dual-write
//! discipline between the vector and graph indexes.

mod common;

use common::{ScriptedLLMProvider, DST_SEEDS};
use strata_memory::dst::{FaultConfig, FaultType, SimConfig, SimLifecycle, Simulation};
use strata_memory::events::EventType;
use strata_memory::lifecycle::{LifecycleConfig, RunStatus, Tier};
use strata_memory::storage::{
    episode_id, EpisodeFilter, EpisodeGraphIndex, EpisodeVectorIndex, FactStore, KnowledgeStore,
    TurnRole, TurnStore,
};

// =============================================================================
// Dual Write
// =============================================================================

#[tokio::test]
async fn test_graph_failure_compensates_and_retry_reuses_id() {
    let env = Simulation::new(SimConfig::with_seed(42))
        .with_fault(
            FaultConfig::new(FaultType::StorageWriteFail, 1.0)
                .with_filter("episode_graph_upsert")
                .with_max_injections(1),
        )
        .build();
    let llm = ScriptedLLMProvider::new(42, &[(1.0, 0.9)]);
    let mut sim = env
        .create_lifecycle_with_llm(LifecycleConfig::default(), llm)
        .unwrap();
    sim.coordinator.run_recovery_sweep().await;
    sim.say("s1", TurnRole::User, "The quarterly review moved to Thursday.")
        .await
        .unwrap();

    let first = sim.coordinator.on_session_concluded("s1").await;

    let consolidation = first.consolidation.unwrap();
    assert_eq!(consolidation.episodes_written, 0);
    assert_eq!(consolidation.failures, 1);
    assert!(consolidation.retryable);
    assert_eq!(sim.episode_vectors.count().await.unwrap(), 0);
    assert!(sim
        .episode_graph
        .filter(&EpisodeFilter::all())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(sim.facts.unconsolidated_count(Some("s1")).await.unwrap(), 1);
    let health = sim.coordinator.health().await;
    assert_eq!(health.tier(Tier::Facts).last_status, Some(RunStatus::Retryable));
    assert!(sim
        .events
        .drain()
        .iter()
        .all(|e| e.event_type() != EventType::Consolidate));

    let second = sim.coordinator.on_session_concluded("s1").await;

    assert_eq!(second.consolidation.unwrap().episodes_written, 1);
    let facts = sim.facts.list_by_session("s1").await.unwrap();
    let expected = episode_id(&[facts[0].id.clone()]);
    assert_eq!(facts[0].episode_id.as_deref(), Some(expected.as_str()));
    assert!(sim.episode_vectors.exists(&expected).await.unwrap());
    assert!(sim.episode_graph.get(&expected).await.unwrap().is_some());
    let consolidates: Vec<_> = sim
        .events
        .drain()
        .into_iter()
        .filter(|e| e.event_type() == EventType::Consolidate)
        .collect();
    assert_eq!(consolidates.len(), 1);
    assert_eq!(consolidates[0].subject_id, expected);
}

#[tokio::test]
async fn test_mark_failure_leaves_no_episode() {
    let env = Simulation::new(SimConfig::with_seed(5))
        .with_fault(
            FaultConfig::new(FaultType::StorageWriteFail, 1.0)
                .with_filter("fact_mark_consolidated")
                .with_max_injections(1),
        )
        .build();
    let llm = ScriptedLLMProvider::new(5, &[(1.0, 0.8)]);
    let sim = env
        .create_lifecycle_with_llm(LifecycleConfig::default(), llm)
        .unwrap();
    sim.coordinator.run_recovery_sweep().await;
    sim.say("s1", TurnRole::User, "Grace will cover the on-call shift.")
        .await
        .unwrap();

    let first = sim.coordinator.on_session_concluded("s1").await;

    assert_eq!(first.consolidation.unwrap().failures, 1);
    assert_eq!(sim.episode_vectors.count().await.unwrap(), 0);
    assert!(sim
        .episode_graph
        .filter(&EpisodeFilter::all())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(sim.knowledge.count().await.unwrap(), 0);

    let second = sim.coordinator.on_session_concluded("s1").await;
    assert_eq!(second.consolidation.unwrap().episodes_written, 1);
    assert_eq!(second.distillation.unwrap().units_written, 1);
}

// =============================================================================
// Retrieval
// =============================================================================

#[tokio::test]
async fn test_episodes_are_retrievable_by_filter_and_similarity() {
    let env = Simulation::new(SimConfig::with_seed(9)).build();
    let sim = env
        .create_lifecycle(LifecycleConfig::default().with_min_score(0.0))
        .unwrap();
    sim.coordinator.run_recovery_sweep().await;

    sim.say("s1", TurnRole::User, "Alice moved to Oslo to join Acme.")
        .await
        .unwrap();
    sim.say("s2", TurnRole::User, "Bob runs the Acme lab in Bergen.")
        .await
        .unwrap();
    sim.coordinator.on_session_concluded("s1").await;
    sim.coordinator.on_session_concluded("s2").await;

    let s1 = sim
        .episode_graph
        .filter(&EpisodeFilter::all().session("s1"))
        .await
        .unwrap();
    assert!(!s1.is_empty());
    assert!(s1.iter().all(|e| e.session_id == "s1"));

    let bergen = sim
        .episode_graph
        .filter(&EpisodeFilter::all().entity("bergen"))
        .await
        .unwrap();
    assert!(!bergen.is_empty());
    assert!(bergen.iter().all(|e| e.session_id == "s2"));

    let acme = sim
        .episode_graph
        .filter(&EpisodeFilter::all().entity("ACME"))
        .await
        .unwrap();
    assert_eq!(acme.len(), 2);

    let hits = sim
        .episode_vectors
        .search_similar(&s1[0].embedding, 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].episode_id, s1[0].id);
    assert!(hits[0].score > 0.99);
}

// =============================================================================
// Randomized Faults
// =============================================================================

const INDEX_WRITES: [&str; 8] = [
    "episode_vector_upsert",
    "episode_vector_delete",
    "episode_graph_upsert",
    "episode_graph_delete",
    "episode_graph_commit",
    "episode_mark_distilled",
    "fact_mark_consolidated",
    "knowledge_publish",
];

/// Episodes referenced by a fact are present on both sides, and every
/// knowledge unit is built only from such episodes, whatever faults hit the
/// indexes along the way. An episode or unit whose final commit step failed
/// stays pending until a later sweep settles it.
#[tokio::test]
async fn test_dual_write_holds_under_random_index_faults() {
    const SWEEPS_MAX: usize = 100;

    for seed in DST_SEEDS {
        // Writes only, so the invariant checks below can read freely.
        let mut simulation = Simulation::new(SimConfig::with_seed(seed))
            .with_fault(FaultConfig::new(FaultType::EmbeddingTimeout, 0.1));
        for operation in INDEX_WRITES {
            simulation = simulation
                .with_fault(FaultConfig::new(FaultType::StorageWriteFail, 0.15).with_filter(operation));
        }
        let env = simulation.build();
        let sim = env
            .create_lifecycle(LifecycleConfig::default().with_min_score(0.0))
            .unwrap();
        for (session, line) in [
            ("s1", "Alice moved to Oslo to join Acme."),
            ("s1", "Alice manages the Acme robotics team."),
            ("s2", "Bob runs the Acme lab in Bergen."),
            ("s2", "Bob hired two robotics engineers."),
            ("s3", "Carol audits the Acme finances yearly."),
        ] {
            sim.say(session, TurnRole::User, line).await.unwrap();
        }

        let mut converged = false;
        for _ in 0..SWEEPS_MAX {
            sim.coordinator.run_recovery_sweep().await;
            assert_committed_episodes_complete(&sim, seed).await;
            if is_drained(&sim).await {
                converged = true;
                break;
            }
        }
        assert!(converged, "seed {seed} did not converge");
    }
}

async fn is_drained(sim: &SimLifecycle) -> bool {
    if sim.turns.backlog_count(None).await.unwrap_or(1) > 0
        || sim.facts.unconsolidated_count(None).await.unwrap_or(1) > 0
    {
        return false;
    }
    for session in ["s1", "s2", "s3"] {
        for fact in sim.facts.list_by_session(session).await.unwrap() {
            let id = fact.episode_id.expect("consolidated fact has an episode");
            let episode = sim.episode_graph.get(&id).await.unwrap();
            let Some(unit_id) = episode.and_then(|e| e.knowledge_unit_id) else {
                return false;
            };
            if sim.knowledge.get(&unit_id).await.unwrap().is_none() {
                return false;
            }
        }
    }
    true
}

async fn assert_committed_episodes_complete(sim: &SimLifecycle, seed: u64) {
    let staged = sim.knowledge.staged().await.unwrap();
    for session in ["s1", "s2", "s3"] {
        let pending = sim.episode_graph.pending(Some(session)).await.unwrap();
        for fact in sim.facts.list_by_session(session).await.unwrap() {
            let Some(id) = fact.episode_id else { continue };
            assert!(
                sim.episode_vectors.exists(&id).await.unwrap(),
                "seed {seed}: committed episode {id} missing vector entry"
            );
            let Some(episode) = sim.episode_graph.get(&id).await.unwrap() else {
                assert!(
                    pending.iter().any(|e| e.id == id),
                    "seed {seed}: committed episode {id} missing graph entry"
                );
                continue;
            };
            assert!(episode.source_fact_ids.contains(&fact.id));

            let Some(unit_id) = episode.knowledge_unit_id else { continue };
            let unit = match sim.knowledge.get(&unit_id).await.unwrap() {
                Some(unit) => unit,
                None => staged
                    .iter()
                    .find(|u| u.id == unit_id)
                    .cloned()
                    .unwrap_or_else(|| panic!("seed {seed}: unit {unit_id} missing")),
            };
            for source in &unit.source_episode_ids {
                assert!(sim.episode_vectors.exists(source).await.unwrap());
            }
            assert!(unit.provenance.fact_ids.contains(&fact.id));
        }
    }

    for unit in sim.knowledge.search("acme alice bob carol", 64).await.unwrap() {
        for source in &unit.unit.source_episode_ids {
            let episode = sim.episode_graph.get(source).await.unwrap();
            assert_eq!(
                episode.and_then(|e| e.knowledge_unit_id).as_deref(),
                Some(unit.unit.id.as_str()),
                "seed {seed}: visible unit {} not referenced by {source}",
                unit.unit.id
            );
        }
    }
}
