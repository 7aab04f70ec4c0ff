//! Codec plugin discovery (spec §6 "Plugin discovery" / Design Note):
//! resolves the directories a native codec plugin would be loaded
//! from. Mirrors HDF5's `HDF5_PLUGIN_PATH` convention since NCZarr's
//! filter plugin model is inherited from HDF5's.
//!
//! This crate does not dynamically load shared libraries (no plugin
//! ABI is specified, and dlopen-ing arbitrary code is out of scope for
//! a storage engine); instead it exposes the resolved search path so a
//! caller embedding this crate can register [`crate::codec::registry`]
//! plugins it finds there. A plugin absent from every searched
//! directory simply means the corresponding filter stays `incomplete`
//! (spec §4.E) — it never blocks metadata open.

use std::env;
use std::path::PathBuf;

const ENV_VAR: &str = "HDF5_PLUGIN_PATH";

#[cfg(unix)]
const PLATFORM_DEFAULTS: &[&str] = &["/usr/local/hdf5/lib/plugin", "/usr/lib/hdf5/plugins"];

#[cfg(windows)]
const PLATFORM_DEFAULTS: &[&str] = &["C:\\Program Files\\HDF_Group\\HDF5\\lib\\plugin"];

#[cfg(not(any(unix, windows)))]
const PLATFORM_DEFAULTS: &[&str] = &[];

/// Resolve the ordered list of directories to search for codec
/// plugins: `HDF5_PLUGIN_PATH` (platform path-separator delimited) if
/// set, else the compiled-in platform defaults.
pub fn search_paths() -> Vec<PathBuf> {
    if let Ok(value) = env::var(ENV_VAR) {
        let paths: Vec<PathBuf> = env::split_paths(&value).collect();
        if !paths.is_empty() {
            return paths;
        }
    }
    PLATFORM_DEFAULTS.iter().map(PathBuf::from).collect()
}

/// List plugin library files found on the search path (extension
/// `.so`/`.dylib`/`.dll`). Best-effort: unreadable directories are
/// silently skipped, matching spec §6 "missing plugins never prevent
/// metadata open".
#[cfg(feature = "filesystem")]
pub fn discover() -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in search_paths() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_lib = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| matches!(ext, "so" | "dylib" | "dll"))
                .unwrap_or(false);
            if is_lib {
                found.push(path);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // HDF5_PLUGIN_PATH is process-global; serialize the two tests that
    // touch it so they don't race under the default parallel test runner.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn env_var_overrides_platform_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var(ENV_VAR, "/tmp/plugins_a:/tmp/plugins_b");
        let paths = search_paths();
        env::remove_var(ENV_VAR);
        assert_eq!(paths, vec![PathBuf::from("/tmp/plugins_a"), PathBuf::from("/tmp/plugins_b")]);
    }

    #[test]
    fn falls_back_to_platform_defaults_when_unset() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::remove_var(ENV_VAR);
        let paths = search_paths();
        assert_eq!(paths, PLATFORM_DEFAULTS.iter().map(PathBuf::from).collect::<Vec<_>>());
    }
}
