pub mod commands;
pub mod config;
pub mod deps;
pub mod error;
pub mod git;
pub mod plugin;
pub mod process;
pub mod python;
pub mod script;
pub mod utils;

pub use config::{Project, Settings};
pub use error::BmtError;
pub use plugin::{PluginManager, PluginRoot};
pub use process::{ProcessLauncher, SystemLauncher};
pub use script::{ScriptIdentifier, ScriptResolver};
