use crate::{PackageManifest, RegistryError};
use node_semver::{Range, Version};
use serde::Deserialize;
use std::collections::HashMap;

/// The registry document of a whole package: dist-tags plus every published
/// version's manifest.
#[derive(Debug, Deserialize)]
pub struct Packument {
    pub name: String,
    #[serde(default, alias = "dist-tags")]
    pub dist_tags: HashMap<String, String>,
    #[serde(default)]
    pub versions: HashMap<String, PackageManifest>,
}

impl Packument {
    /// Pin a semver range or dist-tag to the highest matching published
    /// version.
    pub fn pin(&self, spec: &str) -> Result<Version, RegistryError> {
        let unresolvable = || RegistryError::VersionUnresolvable {
            name: self.name.clone(),
            spec: spec.to_string(),
        };
        if let Some(tagged) = self.dist_tags.get(spec) {
            return tagged.parse().map_err(|_| unresolvable());
        }
        if let Ok(exact) = spec.parse::<Version>() {
            return self.versions.contains_key(spec).then_some(exact).ok_or_else(unresolvable);
        }
        let range = spec.parse::<Range>().map_err(|_| unresolvable())?;
        self.versions
            .keys()
            .filter_map(|version| version.parse::<Version>().ok())
            .filter(|version| range.satisfies(version))
            .max()
            .ok_or_else(unresolvable)
    }

    pub fn manifest(&self, version: &Version) -> Option<&PackageManifest> {
        self.versions.get(&version.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn packument() -> Packument {
        serde_json::from_value(json!({
            "name": "svelte",
            "dist-tags": { "latest": "4.2.19", "next": "5.0.0-next.1" },
            "versions": {
                "3.29.0": { "name": "svelte", "version": "3.29.0" },
                "4.0.5": { "name": "svelte", "version": "4.0.5" },
                "4.2.19": { "name": "svelte", "version": "4.2.19" },
                "5.0.0-next.1": { "name": "svelte", "version": "5.0.0-next.1" },
            },
        }))
        .unwrap()
    }

    #[test]
    fn pin_ok() {
        macro_rules! case {
            ($spec:expr => $version:expr) => {{
                let spec = $spec;
                eprintln!("CASE: {spec:?}");
                let received = packument().pin(spec).unwrap();
                assert_eq!(received, Version::parse($version).unwrap());
            }};
        }

        case!("latest" => "4.2.19");
        case!("next" => "5.0.0-next.1");
        case!("4.0.5" => "4.0.5");
        case!("4" => "4.2.19");
        case!("^4.0.0" => "4.2.19");
        case!("~4.0.0" => "4.0.5");
        case!(">=3 <4" => "3.29.0");
    }

    #[test]
    fn pin_err() {
        macro_rules! case {
            ($spec:expr) => {{
                let spec = $spec;
                eprintln!("CASE: {spec:?}");
                let error = packument().pin(spec).unwrap_err();
                assert!(matches!(
                    &error,
                    RegistryError::VersionUnresolvable { name, spec: unresolved }
                        if name == "svelte" && unresolved == spec
                ));
            }};
        }

        // published version that doesn't exist
        case!("4.9.9");
        // range with no match
        case!("^9.0.0");
        // tag that was never published
        case!("canary");
    }

    #[test]
    fn manifest_by_version() {
        let packument = packument();
        let version = Version::parse("4.0.5").unwrap();
        let manifest = packument.manifest(&version).unwrap();
        assert_eq!(manifest.version(), Some(version));
        assert_eq!(packument.manifest(&Version::parse("9.9.9").unwrap()), None);
    }
}
