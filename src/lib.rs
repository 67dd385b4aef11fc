//! Menu Extraction Pipeline
//!
//! This library provides the core functionality for the menu-extract system,
//! which turns uploaded menu photos into validated, structured menu data
//! using a vision-capable language model, with idempotent job semantics,
//! retry/degradation, partial-failure salvage, quality gating, and spend
//! caps.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
