//! Mentor Core
//!
//! The content-generation pipeline: planning a topic into typed component
//! specifications, generating each component through a completion provider,
//! validating the results, and aggregating them into a finished learning
//! objective under retry, budget, and concurrency constraints.

pub mod budget;
pub mod completion;
pub mod coordinator;
pub mod error;
pub mod planner;
pub mod store;
pub mod types;
pub mod validator;
pub mod worker;

pub use budget::{BudgetConfig, BudgetGuard, Pricing, Stage, UsageRecord, UsageSummary};
pub use completion::{Completion, CompletionClient, CompletionRequest, OpenAiCompletionClient};
pub use coordinator::{CoordinatorError, GenerationConfig, GenerationCoordinator, StatusReport};
pub use error::{BudgetDenial, CompletionError, GenerationError, PlanningError, StoreError};
pub use store::{MemoryGateway, ObjectiveRecord, PersistenceGateway};
pub use types::{
    Component, ComponentKind, ComponentSpec, ComprehensionCheck, Failure, FailureKind,
    LearningObjective, ObjectiveResult, ObjectiveStatus, Plan, ReadinessPolicy, ValidationStatus,
};
pub use validator::{QualityValidator, Verdict};
pub use worker::{ComponentGenerator, Draft};
