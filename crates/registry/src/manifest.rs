use node_semver::Version;
use serde::Deserialize;
use serde_json::Value;
use strum::IntoStaticStr;

/// Dependency tables consulted when a bare specifier needs a version.
#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
pub enum DependencyGroup {
    #[strum(serialize = "dependencies")]
    Prod,
    #[strum(serialize = "devDependencies")]
    Dev,
    #[strum(serialize = "peerDependencies")]
    Peer,
}

/// Snapshot of one published version's metadata.
///
/// Kept as raw JSON: the subpath resolver reads loosely-typed fields
/// (`exports`, `browser` in both string and object form) that a rigid struct
/// would flatten badly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct PackageManifest {
    value: Value,
}

impl PackageManifest {
    pub fn from_value(value: Value) -> Self {
        PackageManifest { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn name(&self) -> Option<&str> {
        self.value.get("name")?.as_str()
    }

    pub fn version(&self) -> Option<Version> {
        self.value.get("version")?.as_str()?.parse().ok()
    }

    /// Iterate dependency entries over the given groups, in group order.
    pub fn dependencies<'a>(
        &'a self,
        groups: impl IntoIterator<Item = DependencyGroup> + 'a,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        groups
            .into_iter()
            .flat_map(|group| self.value.get::<&str>(group.into()))
            .flat_map(|dependencies| dependencies.as_object())
            .flatten()
            .flat_map(|(name, version)| version.as_str().map(|value| (name.as_str(), value)))
    }

    /// The version range a bare specifier's package is declared at, reading
    /// `dependencies`, then `devDependencies`, then `peerDependencies`.
    pub fn dependency_range(&self, name: &str) -> Option<&str> {
        use DependencyGroup::{Dev, Peer, Prod};
        self.dependencies([Prod, Dev, Peer])
            .find(|(dependency, _)| *dependency == name)
            .map(|(_, range)| range)
    }

    /// The modern conditional `exports` map, whatever shape it takes.
    pub fn exports(&self) -> Option<&Value> {
        self.value.get("exports")
    }

    /// The legacy `browser` field, string or object form.
    pub fn browser(&self) -> Option<&Value> {
        self.value.get("browser")
    }

    /// A legacy entry field (`browser`, `module`, `main`) by name.
    pub fn entry_field(&self, field: &str) -> Option<&Value> {
        self.value.get(field)
    }

    /// The legacy single-file-component entry field, string form only.
    pub fn svelte_entry(&self) -> Option<&str> {
        self.value.get("svelte")?.as_str()
    }
}
