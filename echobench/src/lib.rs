//! echobench: a distributed load-testing harness for a scalable echo service.
//!
//! Three binaries share this library:
//!
//! - `echo-server` is the server under test: a multiplexed TCP echo service.
//! - `echo-client` is a load generator: it opens many sockets to the server,
//!   sends timed payloads, and reports latency statistics to a controller.
//! - `echo-controller` discovers clients over broadcast, drives them through
//!   volleys of increasing connection counts, and writes a CSV report.
//!
//! See `SPEC_FULL.md` at the repository root for the full design.

pub mod config;
pub mod control;
pub mod controller;
pub mod discovery;
pub mod server;
pub mod signal;
pub mod telemetry;

pub mod client;
