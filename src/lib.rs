//! Medical Scan Analysis Service
//!
//! This library provides the core functionality for the medscan system:
//! clients upload scan images directly to object storage via signed URLs,
//! submit them for analysis by a hosted vision model, and poll for results.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
