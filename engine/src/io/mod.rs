//! Side-effecting adapters: config, persistence, processes, git and HTTP.

pub mod catalog;
pub mod check_api;
pub mod config;
pub mod executor;
pub mod git;
pub mod process;
pub mod run_store;
pub mod sandbox;
