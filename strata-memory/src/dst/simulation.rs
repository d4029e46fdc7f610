//! Simulation - DST Test Harness
//!
//! `TigerStyle`: Simulation harness that provides deterministic environment.

use std::future::Future;
use std::sync::Arc;

use super::clock::SimClock;
use super::config::SimConfig;
use super::fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
use super::llm::SimLLM;
use super::rng::DeterministicRng;
use crate::clock::Clock;
use crate::embedding::SimEmbeddingProvider;
use crate::events::{CognitiveEventBus, EventReceiver};
use crate::lifecycle::{LifecycleConfig, LifecycleError, LifecycleStores, TriggerCoordinator};
use crate::llm::{LLMProvider, SimLLMProvider};
use crate::storage::{
    NewTurn, SimEpisodeGraphIndex, SimEpisodeVectorIndex, SimFactStore, SimKnowledgeStore,
    SimTurnStore, StorageResult, Turn, TurnRole, TurnStore,
};

/// Environment provided to simulation tests.
///
/// `TigerStyle`: All simulation resources in one place.
pub struct SimEnvironment {
    /// Simulation configuration
    pub config: SimConfig,
    /// Simulated clock
    pub clock: SimClock,
    /// Deterministic RNG
    pub rng: DeterministicRng,
    /// Fault injector shared by every simulated component
    pub faults: Arc<FaultInjector>,
    /// Simulated reasoning service
    pub llm: SimLLM,
}

impl SimEnvironment {
    /// Advance simulated time in milliseconds.
    pub fn advance_time_ms(&self, ms: u64) -> u64 {
        self.clock.advance_ms(ms)
    }

    /// Get current simulated time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Wire a complete lifecycle engine over sim stores and providers.
    ///
    /// Every store, the reasoning service and the embedding provider share
    /// this environment's fault injector and clock, so faults registered on
    /// the `Simulation` reach the engines.
    ///
    /// # Errors
    /// Returns `LifecycleError::Config` if `config` does not validate.
    ///
    /// # Example
    ///
    /// ```rust
    /// use strata_memory::dst::{SimConfig, Simulation};
    /// use strata_memory::lifecycle::LifecycleConfig;
    /// use strata_memory::storage::TurnRole;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let env = Simulation::new(SimConfig::with_seed(42)).build();
    /// let sim = env.create_lifecycle(LifecycleConfig::default()).unwrap();
    ///
    /// sim.say("s1", TurnRole::User, "I moved to Oslo last spring.").await.unwrap();
    /// sim.coordinator.run_recovery_sweep().await;
    /// assert!(sim.coordinator.is_recovered());
    /// # }
    /// ```
    pub fn create_lifecycle(&self, config: LifecycleConfig) -> Result<SimLifecycle, LifecycleError> {
        let llm = Arc::new(SimLLMProvider::from_sim_llm(self.llm.clone().without_latency()));
        self.create_lifecycle_with_llm(config, llm)
    }

    /// Like [`Self::create_lifecycle`], with a caller-supplied reasoning
    /// service in place of `SimLLM`.
    ///
    /// # Errors
    /// Returns `LifecycleError::Config` if `config` does not validate.
    pub fn create_lifecycle_with_llm(
        &self,
        config: LifecycleConfig,
        llm: Arc<dyn LLMProvider>,
    ) -> Result<SimLifecycle, LifecycleError> {
        let seed = self.config.seed();

        let turns = Arc::new(SimTurnStore::new(Arc::clone(&self.faults)));
        let facts = Arc::new(SimFactStore::new(Arc::clone(&self.faults)));
        let episode_vectors = Arc::new(SimEpisodeVectorIndex::new(Arc::clone(&self.faults)));
        let episode_graph = Arc::new(SimEpisodeGraphIndex::new(Arc::clone(&self.faults)));
        let knowledge = Arc::new(SimKnowledgeStore::new(Arc::clone(&self.faults)));

        let stores = LifecycleStores {
            turns: turns.clone(),
            facts: facts.clone(),
            episode_vectors: episode_vectors.clone(),
            episode_graph: episode_graph.clone(),
            knowledge: knowledge.clone(),
        };
        let (bus, events) = CognitiveEventBus::new(config.event_bus_capacity);
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());

        let coordinator = TriggerCoordinator::new(
            stores,
            llm,
            Arc::new(SimEmbeddingProvider::with_faults(seed, Arc::clone(&self.faults))),
            bus.clone(),
            clock,
            config,
        )?;

        Ok(SimLifecycle {
            coordinator: Arc::new(coordinator),
            bus,
            events,
            clock: self.clock.clone(),
            turns,
            facts,
            episode_vectors,
            episode_graph,
            knowledge,
        })
    }
}

/// A lifecycle engine over sim stores, with the stores kept reachable for
/// assertions.
pub struct SimLifecycle {
    /// Coordinator owning the engines
    pub coordinator: Arc<TriggerCoordinator>,
    /// The bus the engines publish to
    pub bus: CognitiveEventBus,
    /// Consumer end of the bus
    pub events: EventReceiver,
    /// Shared simulated clock
    pub clock: SimClock,
    /// Tier 1
    pub turns: Arc<SimTurnStore>,
    /// Tier 2
    pub facts: Arc<SimFactStore>,
    /// Tier 3 similarity side
    pub episode_vectors: Arc<SimEpisodeVectorIndex>,
    /// Tier 3 graph side
    pub episode_graph: Arc<SimEpisodeGraphIndex>,
    /// Tier 4
    pub knowledge: Arc<SimKnowledgeStore>,
}

impl SimLifecycle {
    /// Append a turn spoken now.
    ///
    /// # Errors
    /// Returns `StorageError` if the turn store fails.
    pub async fn say(&self, session_id: &str, role: TurnRole, text: &str) -> StorageResult<Turn> {
        self.turns
            .append(NewTurn::new(session_id, role, text, self.clock.now()))
            .await
    }
}

/// DST simulation harness.
///
/// `TigerStyle`:
/// - Single seed controls all randomness
/// - Faults are registered explicitly
/// - Environment is provided to test closure
///
/// # Example
///
/// ```rust
/// use strata_memory::dst::{FaultConfig, FaultType, SimConfig, Simulation};
/// use strata_memory::lifecycle::LifecycleConfig;
///
/// # #[tokio::main]
/// # async fn main() {
/// let sim = Simulation::new(SimConfig::with_seed(42))
///     .with_fault(FaultConfig::new(FaultType::LlmTimeout, 0.1));
///
/// sim.run(|env| async move {
///     let lifecycle = env.create_lifecycle(LifecycleConfig::default())?;
///     lifecycle.coordinator.run_recovery_sweep().await;
///     env.advance_time_ms(1000);
///     Ok::<(), strata_memory::lifecycle::LifecycleError>(())
/// })
/// .await
/// .unwrap();
/// # }
/// ```
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
}

impl Simulation {
    /// Create a new simulation with the given configuration.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
        }
    }

    /// Register a fault to inject during simulation.
    ///
    /// `TigerStyle`: Fluent API for fault registration.
    #[must_use]
    pub fn with_fault(mut self, fault_config: FaultConfig) -> Self {
        self.fault_configs.push(fault_config);
        self
    }

    /// Add common storage faults.
    #[must_use]
    pub fn with_storage_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::StorageWriteFail, probability))
            .with_fault(FaultConfig::new(FaultType::StorageReadFail, probability))
    }

    /// Add common reasoning-service faults.
    #[must_use]
    pub fn with_llm_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::LlmTimeout, probability))
            .with_fault(FaultConfig::new(FaultType::LlmRateLimit, probability))
    }

    /// Run the simulation with the given test function.
    ///
    /// # Errors
    /// Returns any error from the test function.
    pub async fn run<F, Fut, E>(self, test_fn: F) -> Result<(), E>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let seed = self.config.seed();
        let env = self.build();
        let faults = Arc::clone(&env.faults);

        let result = test_fn(env).await;

        if faults.total_injections() > 0 {
            tracing::debug!(
                seed,
                injections = faults.total_injections(),
                stats = ?faults.injection_stats(),
                "simulation faults injected"
            );
        }
        result
    }

    /// Build the simulation environment without running a test.
    #[must_use]
    pub fn build(self) -> SimEnvironment {
        let mut rng = DeterministicRng::new(self.config.seed());
        let clock = SimClock::new();

        let mut fault_builder = FaultInjectorBuilder::new(rng.fork());
        for fault_config in self.fault_configs {
            fault_builder = fault_builder.with_fault(fault_config);
        }
        let faults = Arc::new(fault_builder.build());

        let llm = SimLLM::new(clock.clone(), rng.fork(), Arc::clone(&faults));

        SimEnvironment {
            config: self.config,
            clock,
            rng,
            faults,
            llm,
        }
    }
}

/// Create a simulation with optional seed.
///
/// `TigerStyle`: Factory function for common case.
#[must_use]
pub fn create_simulation(seed: Option<u64>) -> Simulation {
    let config = match seed {
        Some(s) => SimConfig::with_seed(s),
        None => SimConfig::from_env_or_random(),
    };
    Simulation::new(config)
}
