use std::fmt;

/// Steps of a calibration run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CalibrationPhase {
    Leveling,
    VerticalForceSampling,
    LevelMomentSampling,
    RollSettle,
    RollMomentSampling,
    Done,
}

impl CalibrationPhase {
    pub const ALL: [CalibrationPhase; 6] = [
        CalibrationPhase::Leveling,
        CalibrationPhase::VerticalForceSampling,
        CalibrationPhase::LevelMomentSampling,
        CalibrationPhase::RollSettle,
        CalibrationPhase::RollMomentSampling,
        CalibrationPhase::Done,
    ];

    /// The phase that follows this one. `Done` is terminal.
    pub fn next(self) -> Option<Self> {
        match self {
            CalibrationPhase::Leveling => Some(CalibrationPhase::VerticalForceSampling),
            CalibrationPhase::VerticalForceSampling => Some(CalibrationPhase::LevelMomentSampling),
            CalibrationPhase::LevelMomentSampling => Some(CalibrationPhase::RollSettle),
            CalibrationPhase::RollSettle => Some(CalibrationPhase::RollMomentSampling),
            CalibrationPhase::RollMomentSampling => Some(CalibrationPhase::Done),
            CalibrationPhase::Done => None,
        }
    }

    /// Whether this phase consumes residual samples.
    pub fn is_sampling(self) -> bool {
        matches!(
            self,
            CalibrationPhase::VerticalForceSampling
                | CalibrationPhase::LevelMomentSampling
                | CalibrationPhase::RollMomentSampling
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            CalibrationPhase::Leveling => "leveling",
            CalibrationPhase::VerticalForceSampling => "vertical force sampling",
            CalibrationPhase::LevelMomentSampling => "level moment sampling",
            CalibrationPhase::RollSettle => "roll settle",
            CalibrationPhase::RollMomentSampling => "roll moment sampling",
            CalibrationPhase::Done => "done",
        }
    }
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
