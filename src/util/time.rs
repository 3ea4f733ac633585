//! Time utilities for the simulation loop

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 60; // physics steps per second
pub const SNAPSHOT_TPS: u32 = 30; // snapshot broadcasts per second
pub const STEP_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Duration of one physics step
pub fn step_duration() -> Duration {
    Duration::from_micros(STEP_DURATION_MICROS)
}

/// Number of physics steps between snapshot broadcasts
pub const fn snapshot_interval_steps() -> u32 {
    SIMULATION_TPS / SNAPSHOT_TPS
}
