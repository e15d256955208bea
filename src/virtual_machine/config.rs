//! Scheduling knobs for a running script.

use std::time::Duration;

/// Default wall-clock budget of one call to `run_quanta`.
pub const DEFAULT_QUANTUM: Duration = Duration::from_micros(200);

/// Energy taken from the energy register by every executed instruction.
pub const DEFAULT_ENERGY_DECAY: f32 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct VmConfig {
    /// Time slice handed to a script before it must yield.
    pub quantum: Duration,
    /// Instructions executed between clock reads.
    pub timer_check_skip: u32,
    /// Capacity of the pending-event queue.
    pub max_queued_events: usize,
    pub energy_decay: f32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            timer_check_skip: 4,
            max_queued_events: 64,
            energy_decay: DEFAULT_ENERGY_DECAY,
        }
    }
}

impl VmConfig {
    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_max_queued_events(mut self, max: usize) -> Self {
        self.max_queued_events = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VmConfig::default();
        assert_eq!(config.timer_check_skip, 4);
        assert_eq!(config.max_queued_events, 64);
        assert_eq!(config.energy_decay, 0.1);
    }

    #[test]
    fn builders_override() {
        let config = VmConfig::default()
            .with_quantum(Duration::from_millis(5))
            .with_max_queued_events(2);
        assert_eq!(config.quantum, Duration::from_millis(5));
        assert_eq!(config.max_queued_events, 2);
    }
}
