use dirs::data_dir;
use std::path::PathBuf;

pub fn aishiz_home() -> PathBuf {
    // Linux resolves to ~/.local/share/Aishiz
    data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("Aishiz")
}

pub fn plugins_dir() -> PathBuf {
    aishiz_home().join("plugins")
}

pub fn params_path() -> PathBuf {
    aishiz_home().join("params.json")
}
