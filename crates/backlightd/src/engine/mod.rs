mod control;
mod level;
mod table;

pub use control::ControlLoop;
pub use control::ControlSettings;
pub use control::CycleError;
pub use control::StartupError;
pub use level::BrightnessLevel;
pub use table::LevelConfig;
pub use table::LevelTable;
pub use table::TableError;
pub use table::Threshold;
pub use table::Transition;
