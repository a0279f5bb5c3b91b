use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use aishiz_abi::ffi::{PluginApi, PluginEntryFn, AISHIZ_ABI_VERSION, PLUGIN_ENTRY_SYMBOL};
use libloading::Library;
use tracing::{error, info};

use crate::errors::{PluginError, Result};
use crate::locate::locate_plugin_binary;

pub struct LoadedPlugin {
    // Keeps the code behind `api` mapped.
    _lib: Library,
    pub(crate) api: &'static PluginApi,
    path: PathBuf,
}

// SAFETY: the vtable is immutable static data; plugins must make each entry
// point callable from any thread for distinct handles.
unsafe impl Send for LoadedPlugin {}
unsafe impl Sync for LoadedPlugin {}

impl LoadedPlugin {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn abi_version(&self) -> u32 {
        self.api.info.abi_version
    }
}

static PLUGIN: OnceLock<std::result::Result<LoadedPlugin, String>> = OnceLock::new();

/// Locate and load the engine plugin the first time; later calls return the
/// same library (or the same failure).
pub fn load_plugin_once(search_dir: &Path) -> Result<&'static LoadedPlugin> {
    PLUGIN
        .get_or_init(|| {
            let path = locate_plugin_binary(search_dir)
                .ok_or_else(|| PluginError::NotFound(search_dir.to_path_buf()))
                .map_err(|e| e.to_string())?;
            load_plugin(&path).map_err(|e| {
                error!(path = %path.display(), error = %e, "plugin load failed");
                e.to_string()
            })
        })
        .as_ref()
        .map_err(|e| PluginError::Cached(e.clone()))
}

/// Load the library at `path` and validate its entry point.
pub fn load_plugin(path: &Path) -> Result<LoadedPlugin> {
    let lib = unsafe { Library::new(path) }.map_err(|source| PluginError::Load {
        path: path.to_path_buf(),
        source,
    })?;

    let api_ptr = {
        let entry: libloading::Symbol<PluginEntryFn> = unsafe {
            lib.get(PLUGIN_ENTRY_SYMBOL.as_bytes())
                .map_err(|source| PluginError::MissingSymbol {
                    symbol: PLUGIN_ENTRY_SYMBOL,
                    source,
                })?
        };
        unsafe { entry() }
    };
    if api_ptr.is_null() {
        return Err(PluginError::NullEntry);
    }

    let api: &'static PluginApi = unsafe { &*api_ptr };
    if api.info.abi_version != AISHIZ_ABI_VERSION {
        return Err(PluginError::AbiMismatch {
            host: AISHIZ_ABI_VERSION,
            plugin: api.info.abi_version,
        });
    }

    info!(path = %path.display(), abi = api.info.abi_version, "engine plugin loaded");
    Ok(LoadedPlugin {
        _lib: lib,
        api,
        path: path.to_path_buf(),
    })
}
