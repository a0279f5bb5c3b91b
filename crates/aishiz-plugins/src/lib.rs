//! aishiz-plugins
//!
//! Host side of the engine plugin ABI:
//! - Finds the engine library (`AISHIZ_PLUGIN_PATH`, then the plugins dir).
//! - Loads it once per process and checks the ABI version.
//! - Wraps its vtable as an [`aishiz_abi::engine::InferenceEngine`].

pub mod engine;
pub mod errors;
pub mod loader;
pub mod locate;

pub use engine::PluginEngine;
pub use errors::PluginError;
pub use loader::{load_plugin, load_plugin_once, LoadedPlugin};
pub use locate::{locate_plugin_binary, plugin_filename, ENV_PLUGIN_PATH};
