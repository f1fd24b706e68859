use strum::Display;

/// A discrete backlight level, ordered from darkest to brightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BrightnessLevel {
    VeryLow,
    Low,
    Mid,
    High,
    VeryHigh,
}

impl BrightnessLevel {
    /// Number of levels in the ladder.
    pub const COUNT: usize = 5;

    /// All levels in ascending order; a level's position is its rank.
    pub const ALL: [BrightnessLevel; Self::COUNT] = [
        BrightnessLevel::VeryLow,
        BrightnessLevel::Low,
        BrightnessLevel::Mid,
        BrightnessLevel::High,
        BrightnessLevel::VeryHigh,
    ];

    /// Rank of this level, 0 for `VeryLow` up to 4 for `VeryHigh`.
    pub const fn rank(self) -> usize {
        self as usize
    }

    pub fn from_rank(rank: usize) -> Option<Self> {
        Self::ALL.get(rank).copied()
    }

    /// The next brighter level, or `None` at the top of the ladder.
    pub fn higher(self) -> Option<Self> {
        Self::from_rank(self.rank() + 1)
    }

    /// The next darker level, or `None` at the bottom of the ladder.
    pub fn lower(self) -> Option<Self> {
        self.rank().checked_sub(1).and_then(Self::from_rank)
    }
}
