//! Feature Tiler - Command line front end
//!
//! Loads master features from a JSON file and zoom level settings from a
//! TOML file, then compiles them into a directory backed tile store.

pub mod cli;
pub mod config;
pub mod input;
pub mod logging;
pub mod run;
pub mod settings;

pub use config::{ConfigError, FilterConfig, LevelConfig, LevelFilterConfig, TilerConfig};
pub use input::{InputError, InputFeatures, load_features};
pub use run::{CompileSummary, run};
pub use settings::Settings;
