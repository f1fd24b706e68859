//! The discrete hysteresis state machine.
//!
//! Each level owns a pair of lux thresholds. A sample strictly above the
//! current level's `threshold_up` moves one level brighter, a sample strictly
//! below its `threshold_down` moves one level darker, and anything in between
//! (boundaries included) keeps the current level. Because the next level's
//! down threshold sits below this level's up threshold, a jittering sensor
//! cannot bounce between two neighbours.

use std::fmt;

use super::level::BrightnessLevel;

/// Configuration of a single level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelConfig {
    /// Raw value written to the backlight while this level is active.
    pub brightness: i64,

    /// Lux above which the machine moves to the next brighter level.
    pub threshold_up: Option<i64>,

    /// Lux below which the machine moves to the next darker level.
    pub threshold_down: Option<i64>,
}

impl LevelConfig {
    /// Effective up threshold; zero means "not set".
    fn up(&self) -> Option<i64> {
        self.threshold_up.filter(|t| *t != 0)
    }

    /// Effective down threshold; zero means "not set".
    fn down(&self) -> Option<i64> {
        self.threshold_down.filter(|t| *t != 0)
    }
}

/// Outcome of feeding one sample to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Level after the sample has been applied.
    pub level: BrightnessLevel,

    /// Brightness to write to the hardware, set only when the level changed.
    pub brightness: Option<i64>,
}

/// Which threshold of a level a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Up,
    Down,
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Up => f.write_str("threshold_up"),
            Threshold::Down => f.write_str("threshold_down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("level {level}: brightness {brightness} must not be negative")]
    NegativeBrightness { level: BrightnessLevel, brightness: i64 },

    #[error("level {level}: brightness {brightness} is below the previous level's {previous}")]
    BrightnessDecreasing {
        level: BrightnessLevel,
        brightness: i64,
        previous: i64,
    },

    #[error("level {level}: {threshold} is required")]
    MissingThreshold {
        level: BrightnessLevel,
        threshold: Threshold,
    },

    #[error("level {level}: {threshold} has no neighbouring level to move to")]
    UnexpectedThreshold {
        level: BrightnessLevel,
        threshold: Threshold,
    },

    #[error("level {level}: threshold_down {down} must be below threshold_up {up}")]
    EmptyDeadZone {
        level: BrightnessLevel,
        down: i64,
        up: i64,
    },

    #[error("level {level}: {threshold} {value} must be above the previous level's {previous}")]
    NotIncreasing {
        level: BrightnessLevel,
        threshold: Threshold,
        value: i64,
        previous: i64,
    },

    #[error(
        "level {level}: threshold_down {down} must be below the previous level's threshold_up {lower_up}"
    )]
    OverlappingDeadZone {
        level: BrightnessLevel,
        down: i64,
        lower_up: i64,
    },
}

/// Static per-level configuration, indexed by level rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    levels: [LevelConfig; BrightnessLevel::COUNT],
}

impl LevelTable {
    /// Build a table, checking that the thresholds form a non-overlapping
    /// ladder of dead zones.
    pub fn new(levels: [LevelConfig; BrightnessLevel::COUNT]) -> Result<Self, TableError> {
        let table = Self { levels };
        table.validate()?;
        Ok(table)
    }

    pub fn get(&self, level: BrightnessLevel) -> &LevelConfig {
        &self.levels[level.rank()]
    }

    pub fn brightness(&self, level: BrightnessLevel) -> i64 {
        self.get(level).brightness
    }

    /// Apply one illuminance sample to `current`.
    ///
    /// Moves at most one level per call and only when the sample is strictly
    /// beyond a threshold.
    pub fn transition(&self, current: BrightnessLevel, illuminance: i64) -> Transition {
        let config = self.get(current);

        let next = if config.up().is_some_and(|up| illuminance > up) {
            current.higher()
        } else if config.down().is_some_and(|down| illuminance < down) {
            current.lower()
        } else {
            None
        };

        match next {
            Some(level) if level != current => Transition {
                level,
                brightness: Some(self.brightness(level)),
            },
            _ => Transition {
                level: current,
                brightness: None,
            },
        }
    }

    /// Level whose configured brightness is nearest to `brightness`.
    ///
    /// Ties go to the darker level.
    pub fn closest_level(&self, brightness: i64) -> BrightnessLevel {
        let mut best = BrightnessLevel::VeryLow;
        let mut best_distance = u64::MAX;
        for level in BrightnessLevel::ALL {
            let distance = self.brightness(level).abs_diff(brightness);
            if distance < best_distance {
                best = level;
                best_distance = distance;
            }
        }
        best
    }

    fn validate(&self) -> Result<(), TableError> {
        let mut previous: Option<&LevelConfig> = None;

        for level in BrightnessLevel::ALL {
            let config = self.get(level);

            if config.brightness < 0 {
                return Err(TableError::NegativeBrightness {
                    level,
                    brightness: config.brightness,
                });
            }

            let up = match (level.higher(), config.up()) {
                (Some(_), Some(up)) => Some(up),
                (Some(_), None) => {
                    return Err(TableError::MissingThreshold {
                        level,
                        threshold: Threshold::Up,
                    })
                }
                (None, Some(_)) => {
                    return Err(TableError::UnexpectedThreshold {
                        level,
                        threshold: Threshold::Up,
                    })
                }
                (None, None) => None,
            };

            let down = match (level.lower(), config.down()) {
                (Some(_), Some(down)) => Some(down),
                (Some(_), None) => {
                    return Err(TableError::MissingThreshold {
                        level,
                        threshold: Threshold::Down,
                    })
                }
                (None, Some(_)) => {
                    return Err(TableError::UnexpectedThreshold {
                        level,
                        threshold: Threshold::Down,
                    })
                }
                (None, None) => None,
            };

            if let (Some(down), Some(up)) = (down, up) {
                if down >= up {
                    return Err(TableError::EmptyDeadZone { level, down, up });
                }
            }

            if let Some(prev) = previous {
                if config.brightness < prev.brightness {
                    return Err(TableError::BrightnessDecreasing {
                        level,
                        brightness: config.brightness,
                        previous: prev.brightness,
                    });
                }

                if let (Some(up), Some(prev_up)) = (up, prev.up()) {
                    if up <= prev_up {
                        return Err(TableError::NotIncreasing {
                            level,
                            threshold: Threshold::Up,
                            value: up,
                            previous: prev_up,
                        });
                    }
                }

                if let (Some(down), Some(prev_down)) = (down, prev.down()) {
                    if down <= prev_down {
                        return Err(TableError::NotIncreasing {
                            level,
                            threshold: Threshold::Down,
                            value: down,
                            previous: prev_down,
                        });
                    }
                }

                if let (Some(down), Some(lower_up)) = (down, prev.up()) {
                    if down >= lower_up {
                        return Err(TableError::OverlappingDeadZone {
                            level,
                            down,
                            lower_up,
                        });
                    }
                }
            }

            previous = Some(config);
        }

        Ok(())
    }
}

impl fmt::Display for LevelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for level in BrightnessLevel::ALL {
            let config = self.get(level);
            write!(f, "{}={}", level, config.brightness)?;
            match (config.down(), config.up()) {
                (Some(down), Some(up)) => write!(f, " [<{} | >{}]", down, up)?,
                (None, Some(up)) => write!(f, " [>{}]", up)?,
                (Some(down), None) => write!(f, " [<{}]", down)?,
                (None, None) => {}
            }
            if level.higher().is_some() {
                f.write_str(", ")?;
            }
        }
        Ok(())
    }
}
