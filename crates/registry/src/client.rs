use crate::{PackageManifest, Packument, RegistryError};
use node_semver::Version;
use pipe_trait::Pipe;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

/// HTTP client for one registry, with a permit gate bounding concurrent
/// requests.
///
/// Results are not memoized here: the installer and the artifact cache front
/// all duplication.
#[derive(Debug)]
pub struct RegistryClient {
    client: reqwest::Client,
    semaphore: Semaphore,
    /// Base URL, trailing slash included.
    registry: String,
}

impl RegistryClient {
    pub fn new(registry: impl Into<String>) -> Self {
        const MIN_PERMITS: usize = 16;
        let semaphore = num_cpus::get().max(MIN_PERMITS).pipe(Semaphore::new);
        RegistryClient { client: reqwest::Client::new(), semaphore, registry: registry.into() }
    }

    /// Fetch `{registry}/{name}/{spec}` where `spec` is an exact version or a
    /// dist-tag the registry serves directly.
    pub async fn manifest(&self, name: &str, spec: &str) -> Result<PackageManifest, RegistryError> {
        let url = format!("{0}{name}/{spec}", self.registry);
        self.fetch(name, spec, url).await
    }

    /// Fetch the whole packument of `name`.
    pub async fn packument(&self, name: &str) -> Result<Packument, RegistryError> {
        let url = format!("{0}{name}", self.registry);
        self.fetch(name, "*", url).await
    }

    /// Turn a semver range or dist-tag into an exact published version.
    ///
    /// Specs the registry serves at a direct endpoint skip the packument;
    /// everything else pins against it.
    pub async fn resolve_version(&self, name: &str, spec: &str) -> Result<Version, RegistryError> {
        if has_direct_endpoint(spec) {
            let manifest = self.manifest(name, spec).await?;
            return manifest.version().ok_or_else(|| RegistryError::VersionUnresolvable {
                name: name.to_string(),
                spec: spec.to_string(),
            });
        }
        self.packument(name).await?.pin(spec)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        name: &str,
        spec: &str,
        url: String,
    ) -> Result<T, RegistryError> {
        let _permit =
            self.semaphore.acquire().await.expect("semaphore shouldn't have been closed this soon");
        let network = |source| RegistryError::Network { name: name.to_string(), source };
        tracing::debug!(target: "modcdn::registry", %url, "Fetch");
        let response = self
            .client
            .get(&url)
            .header("user-agent", "modcdn")
            .header("accept", "application/json")
            .send()
            .await
            .map_err(network)?;
        if !response.status().is_success() {
            return Err(RegistryError::VersionUnresolvable {
                name: name.to_string(),
                spec: spec.to_string(),
            });
        }
        response.json::<T>().await.map_err(network)?.pipe(Ok)
    }
}

/// Whether `{registry}/{name}/{spec}` answers directly, sparing the much
/// larger packument fetch. That endpoint only understands exact versions and
/// the `latest` tag; ranges and other dist-tags 404 there.
fn has_direct_endpoint(spec: &str) -> bool {
    spec == "latest" || spec.parse::<Version>().is_ok()
}
