use std::env;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub const ENV_PLUGIN_PATH: &str = "AISHIZ_PLUGIN_PATH";

const PLUGIN_STEM: &str = "aishiz_engine";

/// `libaishiz_engine.so`, `aishiz_engine.dll` or `libaishiz_engine.dylib`.
pub fn plugin_filename() -> String {
    format!("{DLL_PREFIX}{PLUGIN_STEM}{DLL_SUFFIX}")
}

/// `AISHIZ_PLUGIN_PATH` wins when it names an existing file; otherwise look
/// for the platform library name inside `search_dir`.
pub fn locate_plugin_binary(search_dir: &Path) -> Option<PathBuf> {
    resolve(env::var(ENV_PLUGIN_PATH).ok(), search_dir)
}

fn resolve(override_path: Option<String>, search_dir: &Path) -> Option<PathBuf> {
    if let Some(p) = override_path.map(PathBuf::from) {
        if p.is_file() {
            debug!(path = %p.display(), "{ENV_PLUGIN_PATH} set");
            return Some(p);
        }
        warn!(path = %p.display(), "{ENV_PLUGIN_PATH} points to missing file");
    }

    let p = search_dir.join(plugin_filename());
    if p.is_file() {
        debug!(path = %p.display(), "plugin found in plugins dir");
        return Some(p);
    }
    None
}
