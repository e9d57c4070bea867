//! Lifecycle engine for renewable-energy installation orders.
//!
//! An order owns several administrative dossiers (shipping, Enedis grid
//! consent, Consuel certification, on-site installation) that progress in
//! parallel through their own status machines. This crate implements the
//! domain model, the per-type transition tables with their validation
//! gates, the append-only note/event ledgers, and the external Enedis
//! consent synchronisation lifecycle.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod tracking;
