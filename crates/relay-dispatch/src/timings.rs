use std::time::Duration;

/// Delays governing a distribution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimings {
    /// Pause between two rounds.
    pub inter_round_delay: Duration,
    /// Pause after the last round so late replies are still captured.
    pub drain_delay: Duration,
    /// Debounce window, measured from the first reply of a batch.
    pub debounce_window: Duration,
    /// Pause before each forward of a flush.
    pub forward_pacing: Duration,
}

impl Default for DispatchTimings {
    fn default() -> Self {
        Self {
            inter_round_delay: Duration::from_secs(62),
            drain_delay: Duration::from_secs(30),
            debounce_window: Duration::from_secs(40),
            forward_pacing: Duration::from_secs(1),
        }
    }
}
