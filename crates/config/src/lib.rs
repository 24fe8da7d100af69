mod custom_deserializer;

use pipe_trait::Pipe;
use serde::Deserialize;
use std::{fs, path::PathBuf};

use crate::custom_deserializer::{
    default_build_version, default_package_manager, default_port, default_prefetch_workers,
    default_registry, default_root_dir, deserialize_opt_pathbuf, deserialize_pathbuf,
    deserialize_registry, deserialize_u16, deserialize_usize,
};

/// Service configuration, read from a `.modcdnrc` INI file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// TCP port the HTTP server binds to.
    #[serde(default = "default_port", deserialize_with = "deserialize_u16")]
    pub port: u16,

    /// Parent directory of all persisted state: the per-version install
    /// trees under `packages/` and the artifact cache database.
    #[serde(default = "default_root_dir", deserialize_with = "deserialize_pathbuf")]
    pub root_dir: PathBuf,

    /// The base URL of the npm package registry (trailing slash included).
    #[serde(default = "default_registry", deserialize_with = "deserialize_registry")]
    pub registry: String,

    /// Opaque engine revision embedded in every canonical URL as `cdnv`.
    /// Bumping it invalidates every cached artifact at once.
    #[serde(default = "default_build_version")]
    pub build_version: String,

    /// Name of the package manager CLI invoked to materialize installs.
    #[serde(default = "default_package_manager")]
    pub package_manager: String,

    /// Directory holding the component-compiler artifacts and their
    /// `manifest.json`. Defaults to `{root-dir}/compilers`.
    #[serde(default, deserialize_with = "deserialize_opt_pathbuf")]
    pub compilers_dir: Option<PathBuf>,

    /// Number of background workers draining the prefetch queue.
    #[serde(default = "default_prefetch_workers", deserialize_with = "deserialize_usize")]
    pub prefetch_workers: usize,
}

impl Settings {
    pub fn new() -> Self {
        serde_ini::from_str("").expect("default settings always deserialize")
    }

    /// Try loading `.modcdnrc` in the current directory.
    /// If fails, try in the home directory.
    /// If fails again, return the default.
    pub fn current<Error, CurrentDir, HomeDir, Default>(
        current_dir: CurrentDir,
        home_dir: HomeDir,
        default: Default,
    ) -> Self
    where
        CurrentDir: FnOnce() -> Result<PathBuf, Error>,
        HomeDir: FnOnce() -> Option<PathBuf>,
        Default: FnOnce() -> Settings,
    {
        let load = |dir: PathBuf| -> Option<Settings> {
            dir.join(".modcdnrc")
                .pipe(fs::read_to_string)
                .ok()?
                .pipe_as_ref(serde_ini::from_str)
                .ok()
        };

        current_dir()
            .ok()
            .and_then(load)
            .or_else(|| home_dir().and_then(load))
            .unwrap_or_else(default)
    }

    /// Parent of all per-version install trees.
    pub fn packages_dir(&self) -> PathBuf {
        self.root_dir.join("packages")
    }

    /// Location of the embedded artifact cache.
    pub fn cache_db_path(&self) -> PathBuf {
        self.root_dir.join("cache.db")
    }

    /// Directory of component-compiler artifacts.
    pub fn compilers_dir(&self) -> PathBuf {
        self.compilers_dir.clone().unwrap_or_else(|| self.root_dir.join("compilers"))
    }

    /// Persist the config data until the program terminates.
    pub fn leak(self) -> &'static Self {
        self.pipe(Box::new).pipe(Box::leak)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
