//! Run and story-evaluation orchestration.
//!
//! A repository event becomes a [`model::Run`]: the trigger guard decides
//! whether to start, the controller numbers and persists the run, and the
//! engine provisions one sandbox, fans stories out with bounded concurrency,
//! aggregates their verdicts, and reports a status check.
//!
//! - **[`core`]**: Pure, deterministic logic (step combination, aggregation,
//!   check-run payloads). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, run store, sandbox, agent
//!   processes, check-run API). Each sits behind a trait for tests.
//!
//! Orchestration modules ([`evaluate`], [`dispatch`], [`controller`],
//! [`reporter`], [`trigger`], [`orchestrate`]) tie the two together.

pub mod agents;
pub mod bootstrap;
pub mod controller;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod evaluate;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod model;
pub mod observer;
pub mod orchestrate;
pub mod reporter;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod trigger;
