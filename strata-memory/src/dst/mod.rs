//! DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style deterministic simulation testing framework.
//!
//! One seed drives the clock, the fault injector and every simulated
//! provider, so any failing run replays exactly.
//!
//! # Usage
//!
//! ```rust
//! use strata_memory::dst::{FaultConfig, FaultType, SimConfig, Simulation};
//! use strata_memory::lifecycle::{LifecycleConfig, LifecycleError};
//! use strata_memory::storage::TurnRole;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sim = Simulation::new(SimConfig::with_seed(42))
//!     .with_fault(FaultConfig::new(FaultType::StorageWriteFail, 0.1).with_filter("episode_graph"));
//!
//! sim.run(|env| async move {
//!     let lifecycle = env.create_lifecycle(LifecycleConfig::default())?;
//!     lifecycle.say("s1", TurnRole::User, "Our deploy window is Tuesday.").await?;
//!     lifecycle.coordinator.run_recovery_sweep().await;
//!     Ok::<(), LifecycleError>(())
//! })
//! .await
//! .unwrap();
//! # }
//! ```
//!
//! Run with explicit seed for reproducibility:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

mod clock;
mod config;
mod fault;
mod llm;
mod rng;
mod simulation;

pub use clock::SimClock;
pub use config::SimConfig;
pub use fault::{
    FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType, OPERATION_PREFIX_EMBEDDING,
    OPERATION_PREFIX_LLM,
};
pub use llm::{LLMError, SimLLM};
pub use rng::DeterministicRng;
pub use simulation::{create_simulation, SimEnvironment, SimLifecycle, Simulation};
