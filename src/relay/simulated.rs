use super::{Level, OutputLine};

/// Output line that only remembers its level.
#[derive(Debug, Clone)]
pub struct SimulatedLine {
    level: Level,
}

impl SimulatedLine {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl OutputLine for SimulatedLine {
    fn drive(&mut self, level: Level) {
        self.level = level;
    }

    fn level(&self) -> Level {
        self.level
    }
}
