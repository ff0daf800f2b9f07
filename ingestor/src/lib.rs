//! Position telemetry ingestion and movement-state inference for tracked
//! devices.

pub mod classifier;
pub mod codec;
pub mod config;
pub mod db;
pub mod distance;
pub mod errors;
pub mod gate;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod notify;
pub mod pipeline;
pub mod query;
pub mod rest;
pub mod store;
pub mod validate;
