use std::time::Duration;

/// Timing knobs for the live tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often the elapsed-time value is refreshed while running.
    pub tick_interval: Duration,

    /// A heartbeat event (elapsed time plus live distance) goes out every this many ticks.
    pub heartbeat_every_ticks: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            heartbeat_every_ticks: 10,
        }
    }
}

impl TrackerConfig {
    /// Defaults, with a heartbeat on every tick when `RUNTRACK_DEBUG` is `1` or `true`.
    pub fn from_env() -> Self {
        let debug_mode = std::env::var("RUNTRACK_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            heartbeat_every_ticks: if debug_mode { 1 } else { 10 },
            ..Self::default()
        }
    }
}
