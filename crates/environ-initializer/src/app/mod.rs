//! Application module
//!
//! Lifecycle of the controller: build the shared components, spawn one
//! watcher per workload kind and wait for a shutdown signal.

pub mod builder;
pub mod core;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use core::Application;
