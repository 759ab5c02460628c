//! Mentor API Library Crate
//!
//! This library contains the web-service layer over the generation pipeline:
//! configuration, application state, the Postgres persistence gateway, API
//! handlers, and routing. The `api` binary is a thin wrapper around it.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
