//! Self-hosted availability monitoring engine.
//!
//! Endpoints are probed on their own cadence, every attempt is stored as an
//! observation, and status changes go out through a [`notify::Notifier`].

pub mod config;
pub mod database;
pub mod models;
pub mod monitoring;
pub mod notify;
pub mod orchestrator;
pub mod pool;
pub mod stats;
