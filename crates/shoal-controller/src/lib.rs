//! Shoal placement controller
//!
//! The central reconciliation loop of the fleet. Watches Torrents (desired
//! state) and NodeTrackers (inventory), maintains the in-memory [`index::ChunkIndex`],
//! schedules every pending chunk through the [`framework`] plugins, and emits
//! per-node [`shoal_common::crd::Replication`] work orders.

pub mod controller;
pub mod dispatcher;
pub mod framework;
pub mod hub;
pub mod index;
pub mod webhook;
