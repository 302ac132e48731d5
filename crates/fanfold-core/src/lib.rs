//! fanfold-core: dynamic fan-out/fan-in orchestration over a planner model
//! and many worker models.
//!
//! A run flows through five stages:
//!
//! 1. [`InstructionSynthesizer`]: the planner writes each worker's instruction
//! 2. [`TaskDispatcher`]: one isolated worker call per profile, gathered in full
//! 3. [`ResultAggregator`]: successes become identity-keyed evidence, failures
//!    become diagnostics
//! 4. [`ReportSynthesizer`]: the planner answers the objective from the evidence
//! 5. [`extract_block`]: the first marked artifact is split out of the answer
//!
//! [`Orchestrator`] wires the stages together and returns a [`RunReport`].

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod instruction;
pub mod metrics;
pub mod objective;
pub mod obs;
pub mod personas;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod telemetry;

pub use aggregate::{
    parse_analysis_record, AggregatedEvidence, AnalysisRecord, EvidenceEntry, EvidenceMode,
    EvidencePayload, MissingProfile, ResultAggregator,
};
pub use config::{ConfigError, FailurePolicy, InstructionScope, OrchestratorConfig};
pub use dispatch::{DispatchOptions, TaskDispatcher, WorkerOutcome, WorkerResult};
pub use error::{OrchestrationError, OrchestrationResult, PlannerStage, WorkerFailure};
pub use extract::{extract_block, BlockMarkers, FinalAnswer};
pub use instruction::InstructionSynthesizer;
pub use objective::{ArtifactRequest, Objective};
pub use personas::{standard_panel, standard_panel_profiles, Persona};
pub use pipeline::{Orchestrator, RunReport};
pub use profile::{ContextPayload, Instruction, WorkerProfile};
pub use report::ReportSynthesizer;

/// Crate version, for run metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
