//! # berth-task
//!
//! Task and container lifecycle management for Berth.
//! Launches, supervises and tears down the ephemeral worker containers that
//! execute agent tasks against provisioned workspaces.
//!
//! ## Features
//!
//! - Worker image build and container launch (detached or attached)
//! - Per-task workspace provisioning fan-out with per-project failure isolation
//! - Idempotent teardown that releases worktrees and sidecars
//! - Escalating bulk cleanup for process-wide shutdown
//! - **Log monitoring as a fallback transport**

pub mod container;
pub mod manager;
pub mod monitor;
pub mod naming;
pub mod sidecar;
pub mod task;

// Task system
pub use task::{Task, TaskStatus};

// Container system
pub use container::{
    ContainerError, ContainerRuntime, ContainerSpec, RuntimeCli, RuntimeOutput, VolumeMount,
};

// Lifecycle management
pub use manager::{CleanupOutcome, ContainerManager, RunningWorker, StartError, StartedContainer};
pub use monitor::LogMonitor;
pub use sidecar::SidecarRunner;
