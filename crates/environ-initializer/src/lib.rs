//! Mutating controller that injects environment variables from ConfigMap
//! groups into workloads carrying a trigger annotation.

pub mod app;
pub mod catalog;
pub mod config;
pub mod k8s;
pub mod patch;
pub mod pipeline;
pub mod planner;
