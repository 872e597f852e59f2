//! Hard guard against a model that keeps replaying the same exchange.

/// Counts consecutive identical `(command, output)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckDetector {
    /// Streak length that counts as stuck. `0` disables the guard.
    threshold: u32,
    last: Option<(String, String)>,
    streak: u32,
}

impl StuckDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            last: None,
            streak: 0,
        }
    }

    /// Feed one executed pair. Returns the streak length once it reaches the threshold.
    pub fn observe(&mut self, command: &str, output: &str) -> Option<u32> {
        let same = self
            .last
            .as_ref()
            .is_some_and(|(c, o)| c == command && o == output);
        if same {
            self.streak += 1;
        } else {
            self.last = Some((command.to_string(), output.to_string()));
            self.streak = 1;
        }
        (self.threshold > 0 && self.streak >= self.threshold).then_some(self.streak)
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
