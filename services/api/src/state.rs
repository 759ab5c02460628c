//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the generation coordinator, the budget guard, and the
//! loaded configuration.

use crate::config::Config;
use mentor_core::{BudgetGuard, GenerationCoordinator};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<GenerationCoordinator>,
    pub budget: Arc<BudgetGuard>,
    pub config: Arc<Config>,
}
