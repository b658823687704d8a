//! # roomwatch
//!
//! Library half of the roomwatch binary. Everything async lives here: the
//! HTTP API, the clients for the estimator and inquiry services, the
//! upload pipeline and the background tasks.
//!
//! Presence decisions and session mutations are delegated to
//! `roomwatch-core`.

pub mod api;
pub mod archive;
pub mod clients;
pub mod config;
pub mod pipeline;
pub mod reaper;
pub mod registration;
