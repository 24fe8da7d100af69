use derive_more::{Display, Error};
use miette::Diagnostic;
use node_semver::Version;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::{Path, PathBuf}, process::Stdio};
use tokio::{io::AsyncWriteExt, sync::OnceCell};

/// Error of compiler lookup, loading, and invocation.
#[derive(Debug, Display, Error, Diagnostic)]
#[non_exhaustive]
pub enum CompilerError {
    #[display("no compiler registered for version `{version}`")]
    #[diagnostic(code(modcdn_compiler::unknown_version))]
    UnknownVersion {
        #[error(not(source))]
        version: Version,
    },

    #[display("compiler artifact is missing at {path:?}")]
    #[diagnostic(code(modcdn_compiler::missing_artifact))]
    MissingArtifact {
        #[error(not(source))]
        path: PathBuf,
    },

    #[display("io error while running the compiler: {_0}")]
    #[diagnostic(code(modcdn_compiler::io_error))]
    Io(#[error(source)] std::io::Error),

    #[display("compiler exited nonzero: {detail}")]
    #[diagnostic(code(modcdn_compiler::compile_failed))]
    Failed {
        #[error(not(source))]
        detail: String,
    },

    #[display("compiler produced malformed output: {_0}")]
    #[diagnostic(code(modcdn_compiler::malformed_output))]
    MalformedOutput(#[error(source)] serde_json::Error),
}

/// The closed options record of the compile contract. Serializing a fixed
/// struct is what guarantees no unrecognized key ever reaches an artifact.
#[derive(Debug, Clone, Serialize)]
pub struct CompileOptions {
    pub name: String,
    pub filename: String,
    pub dev: bool,
}

/// Output of one compile call.
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct CompileOutput {
    pub code: String,
}

/// A loaded compiler artifact: an executable script honoring the contract
/// `argv[1] = options JSON, stdin = source, stdout = {code} JSON`.
#[derive(Debug)]
pub struct Compiler {
    script: PathBuf,
}

impl Compiler {
    pub async fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompilerError> {
        let options = serde_json::to_string(options).expect("options record always serializes");
        let mut child = tokio::process::Command::new(&self.script)
            .arg(options)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CompilerError::Io)?;
        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(source.as_bytes())
            .await
            .map_err(CompilerError::Io)?;
        let output = child.wait_with_output().await.map_err(CompilerError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompilerError::Failed { detail: stderr.trim().to_string() });
        }
        serde_json::from_slice(&output.stdout).map_err(CompilerError::MalformedOutput)
    }
}

/// One registered compiler version: the artifact location from the generated
/// manifest plus the lazily-loaded handle.
#[derive(Debug)]
struct RegistryEntry {
    artifact: PathBuf,
    loaded: OnceCell<Compiler>,
}

/// Registry of component compilers, populated at process start from
/// `{compilers-dir}/manifest.json` mapping exact versions to artifacts.
///
/// Entries load on first use, loading is idempotent, and the loaded handle
/// lives for the rest of the process.
#[derive(Debug)]
pub struct CompilerRegistry {
    entries: HashMap<Version, RegistryEntry>,
}

impl CompilerRegistry {
    /// Read the generated manifest. A missing manifest yields an empty
    /// registry: serving plain modules must not depend on compiler assets.
    pub async fn from_dir(dir: &Path) -> Self {
        let manifest = match tokio::fs::read(dir.join("manifest.json")).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(target: "modcdn::compile", ?dir, %error, "No compiler manifest");
                return CompilerRegistry { entries: HashMap::new() };
            }
        };
        let listed: HashMap<String, String> = match serde_json::from_slice(&manifest) {
            Ok(listed) => listed,
            Err(error) => {
                tracing::warn!(target: "modcdn::compile", %error, "Malformed compiler manifest");
                return CompilerRegistry { entries: HashMap::new() };
            }
        };
        let entries = listed
            .into_iter()
            .filter_map(|(version, artifact)| {
                let version = version.parse::<Version>().ok()?;
                let artifact = dir.join(artifact);
                Some((version, RegistryEntry { artifact, loaded: OnceCell::new() }))
            })
            .collect();
        CompilerRegistry { entries }
    }

    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.entries.keys()
    }

    /// The compiler pinned at `version`, loading it on first use.
    pub async fn get(&self, version: &Version) -> Result<&Compiler, CompilerError> {
        let entry = self
            .entries
            .get(version)
            .ok_or_else(|| CompilerError::UnknownVersion { version: version.clone() })?;
        entry.loaded.get_or_try_init(|| load(&entry.artifact)).await
    }
}

/// Resolve an artifact to its executable entry. Two layouts circulate:
/// a directory holding `compile.mjs` (with an `index.mjs` fallback), or the
/// entry script itself.
async fn load(artifact: &Path) -> Result<Compiler, CompilerError> {
    let script = if artifact.is_dir() {
        let preferred = artifact.join("compile.mjs");
        if preferred.is_file() {
            preferred
        } else {
            artifact.join("index.mjs")
        }
    } else {
        artifact.to_path_buf()
    };
    if !script.is_file() {
        return Err(CompilerError::MissingArtifact { path: script });
    }
    tracing::debug!(target: "modcdn::compile", ?script, "Load compiler");
    Ok(Compiler { script })
}
