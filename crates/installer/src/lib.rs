use dashmap::{mapref::entry::Entry, DashMap};
use derive_more::{Display, Error};
use miette::Diagnostic;
use modcdn_config::Settings;
use modcdn_url::PkgName;
use node_semver::Version;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// The package manager's completion marker. Its presence is the installed
/// predicate; its absence after a failed run is what makes retries work.
const LOCKFILE: &str = "package-lock.json";

/// Error of [`Installer::ensure_installed`].
#[derive(Debug, Display, Error, Diagnostic)]
#[non_exhaustive]
pub enum InstallError {
    #[display("io error while preparing `{store_name}`: {source}")]
    #[diagnostic(code(modcdn_installer::io_error))]
    Io {
        store_name: String,
        #[error(source)]
        source: std::io::Error,
    },

    #[display("package manager failed for `{store_name}`: {detail}")]
    #[diagnostic(code(modcdn_installer::install_failed))]
    Failed {
        store_name: String,
        #[error(not(source))]
        detail: String,
    },
}

/// Progress of one `{name}@{version}` directory, broadcast to every request
/// that attached to the same install.
#[derive(Debug, Clone)]
enum InstallState {
    InProgress,
    Done(Result<(), String>),
}

/// Materializes exact package versions under `packages/`.
///
/// At most one installation runs per `(name, version)` across the process;
/// concurrent callers attach to the running job and share its outcome.
#[derive(Debug)]
pub struct Installer {
    settings: &'static Settings,
    in_flight: DashMap<String, watch::Receiver<InstallState>>,
}

impl Installer {
    pub fn new(settings: &'static Settings) -> Self {
        Installer { settings, in_flight: DashMap::new() }
    }

    /// Root of the installed copy: `packages/{store}/node_modules/{name}`.
    pub fn package_root(&self, name: &PkgName, version: &Version) -> PathBuf {
        self.settings
            .packages_dir()
            .join(name.store_name(version))
            .join("node_modules")
            .join(name.to_string())
    }

    /// Guarantee that `packages/{store}/node_modules/{name}` exists, running
    /// the package manager at most once per `(name, version)`.
    pub async fn ensure_installed(
        &self,
        name: &PkgName,
        version: &Version,
    ) -> Result<PathBuf, InstallError> {
        let store_name = name.store_name(version);
        let dir = self.settings.packages_dir().join(&store_name);
        let pkg_root = self.package_root(name, version);

        if dir.join(LOCKFILE).exists() {
            return Ok(pkg_root);
        }

        enum Role {
            Leader(watch::Sender<InstallState>),
            Waiter(watch::Receiver<InstallState>),
        }

        let role = match self.in_flight.entry(store_name.clone()) {
            Entry::Occupied(entry) => Role::Waiter(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(InstallState::InProgress);
                entry.insert(receiver);
                Role::Leader(sender)
            }
        };

        match role {
            Role::Waiter(mut receiver) => {
                tracing::debug!(target: "modcdn::install", %store_name, "Attach to in-flight install");
                loop {
                    let state = receiver.borrow().clone();
                    match state {
                        InstallState::InProgress => {
                            receiver.changed().await.map_err(|_| InstallError::Failed {
                                store_name: store_name.clone(),
                                detail: "install worker vanished".to_string(),
                            })?;
                        }
                        InstallState::Done(Ok(())) => return Ok(pkg_root),
                        InstallState::Done(Err(detail)) => {
                            return Err(InstallError::Failed { store_name, detail });
                        }
                    }
                }
            }
            Role::Leader(sender) => {
                let result = self.install(&dir, name, version, &store_name).await;
                // entry removal first: anyone arriving after this either sees
                // the lockfile or is allowed to start the retry
                self.in_flight.remove(&store_name);
                let shared = result.as_ref().map(drop).map_err(|error| error.to_string());
                sender.send(InstallState::Done(shared)).ok();
                result.map(|()| pkg_root)
            }
        }
    }

    async fn install(
        &self,
        dir: &Path,
        name: &PkgName,
        version: &Version,
        store_name: &str,
    ) -> Result<(), InstallError> {
        let io = |source| InstallError::Io { store_name: store_name.to_string(), source };

        tokio::fs::create_dir_all(dir).await.map_err(io)?;

        let manifest = synthesize_manifest(name, version);
        let manifest = serde_json::to_vec_pretty(&manifest).expect("manifest is valid JSON");
        tokio::fs::write(dir.join("package.json"), manifest).await.map_err(io)?;

        tracing::info!(target: "modcdn::install", store_name, "Install");
        let output = tokio::process::Command::new(&self.settings.package_manager)
            .args(["install", "--ignore-scripts", "--production"])
            .current_dir(dir)
            .output()
            .await
            .map_err(io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InstallError::Failed {
                store_name: store_name.to_string(),
                detail: stderr.trim().lines().last().unwrap_or("nonzero exit").to_string(),
            });
        }

        tracing::debug!(target: "modcdn::install", store_name, "Install complete");
        Ok(())
    }
}

/// The install-root manifest: exactly one dependency pinned at the exact
/// version, plus any historical patch needed to keep that version
/// installable.
fn synthesize_manifest(name: &PkgName, version: &Version) -> Value {
    let mut manifest = json!({
        "dependencies": { name.to_string(): version.to_string() },
    });
    if let Some((field, value)) = historical_patch(name, version) {
        manifest[field] = value;
    }
    manifest
}

/// Allow-list of per-version fixups. svelte 3.29.x resolves a css-tree that
/// no longer installs cleanly without the pin.
fn historical_patch(name: &PkgName, version: &Version) -> Option<(&'static str, Value)> {
    if name.scope.is_none() && name.bare == "svelte" && version.major == 3 && version.minor == 29 {
        return Some(("overrides", json!({ "css-tree": "1.0.0-alpha.37" })));
    }
    None
}
