use modcdn_registry::PackageManifest;
use serde_json::{Map, Value};
use std::path::Path;

/// Source of an inlined empty module, used where a manifest disables a file
/// for the browser profile.
pub const EMPTY_MODULE: &str = "data:text/javascript,export {}";

/// Export conditions this service resolves for. `import` and `default` are
/// the baseline of conditional-exports semantics; the rest describe the
/// browser-facing, component-aware profile the CDN serves.
const CONDITIONS: &[&str] = &["browser", "svelte", "production", "import", "default"];

/// Outcome of subpath resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A `.`-relative path under the installed package root.
    File(String),
    /// A `data:` URL standing in for a file the manifest disabled.
    Inline(String),
}

impl Resolution {
    pub fn as_str(&self) -> &str {
        match self {
            Resolution::File(path) | Resolution::Inline(path) => path,
        }
    }
}

/// Map `(manifest, subpath)` to a concrete file.
///
/// Precedence, each step returning on success:
/// 1. the string `svelte` field, for the root subpath;
/// 2. the conditional `exports` map, falling through silently on no-match;
/// 3. the legacy `browser`/`module`/`main` entry fields, for the root
///    subpath, honoring object-form maps where `false` means "inlined empty
///    module";
/// 4. filesystem probing of the subpath and its `.mjs`/`.js`/`index` forms;
/// 5. the legacy `browser` object map;
/// 6. the subpath unchanged.
///
/// The step order is observable: many older manifests carry several of these
/// fields at once and real consumers depend on which one wins.
pub fn resolve_subpath(manifest: &PackageManifest, subpath: &str, pkg_root: &Path) -> Resolution {
    if subpath == "." {
        if let Some(entry) = manifest.svelte_entry() {
            return Resolution::File(dot_relative(entry));
        }
    }

    if let Some(exports) = manifest.exports() {
        if let Some(resolution) = resolve_exports(exports, subpath) {
            return resolution;
        }
    }

    if subpath == "." {
        for field in ["browser", "module", "main"] {
            match manifest.entry_field(field) {
                Some(Value::String(entry)) => return Resolution::File(dot_relative(entry)),
                Some(Value::Object(map)) => match map.get(".") {
                    Some(Value::Bool(false)) => {
                        return Resolution::Inline(EMPTY_MODULE.to_string());
                    }
                    Some(Value::String(entry)) => return Resolution::File(dot_relative(entry)),
                    _ => continue,
                },
                _ => continue,
            }
        }
    } else if let Some(found) = probe(pkg_root, subpath) {
        return Resolution::File(found);
    }

    if let Some(Value::Object(map)) = manifest.browser() {
        let bare = subpath.strip_prefix("./").unwrap_or(subpath);
        return match map.get(subpath).or_else(|| map.get(bare)) {
            Some(Value::String(target)) => Resolution::File(dot_relative(target)),
            Some(Value::Bool(false)) => Resolution::Inline(EMPTY_MODULE.to_string()),
            _ => Resolution::File(subpath.to_string()),
        };
    }

    Resolution::File(subpath.to_string())
}

fn dot_relative(target: &str) -> String {
    if target == "." || target.starts_with("./") {
        target.to_string()
    } else {
        format!("./{target}")
    }
}

fn resolve_exports(exports: &Value, subpath: &str) -> Option<Resolution> {
    match exports {
        Value::String(target) => (subpath == ".").then(|| Resolution::File(dot_relative(target))),
        Value::Object(map) => {
            if map.keys().all(|key| key.starts_with('.')) {
                if let Some(value) = map.get(subpath) {
                    return resolve_target(value, None);
                }
                resolve_pattern(map, subpath)
            } else {
                // conditions at the top level describe the root entry
                (subpath == ".").then(|| resolve_target(exports, None)).flatten()
            }
        }
        _ => None,
    }
}

/// Resolve one exports target. `pattern` carries the `*` capture of a
/// pattern key for substitution into string targets.
fn resolve_target(value: &Value, pattern: Option<&str>) -> Option<Resolution> {
    match value {
        Value::String(target) => {
            let target = match pattern {
                Some(matched) => target.replacen('*', matched, 1),
                None => target.clone(),
            };
            Some(Resolution::File(dot_relative(&target)))
        }
        Value::Array(candidates) => {
            candidates.iter().find_map(|candidate| resolve_target(candidate, pattern))
        }
        Value::Object(conditions) => conditions
            .iter()
            .filter(|(condition, _)| CONDITIONS.contains(&condition.as_str()))
            .find_map(|(_, value)| resolve_target(value, pattern)),
        _ => None,
    }
}

fn resolve_pattern(map: &Map<String, Value>, subpath: &str) -> Option<Resolution> {
    for (key, value) in map {
        let Some((prefix, suffix)) = key.split_once('*') else {
            continue;
        };
        let Some(matched) =
            subpath.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(suffix))
        else {
            continue;
        };
        if let Some(resolution) = resolve_target(value, Some(matched)) {
            return Some(resolution);
        }
    }
    None
}

/// Try the subpath itself, then the extension and index forms, under the
/// installed package root. Directories don't count.
fn probe(pkg_root: &Path, subpath: &str) -> Option<String> {
    let candidates = [
        subpath.to_string(),
        format!("{subpath}.mjs"),
        format!("{subpath}.js"),
        format!("{subpath}/index.mjs"),
        format!("{subpath}/index.js"),
    ];
    candidates.into_iter().find(|candidate| pkg_root.join(candidate).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn manifest(value: Value) -> PackageManifest {
        PackageManifest::from_value(value)
    }

    fn file(path: &str) -> Resolution {
        Resolution::File(path.to_string())
    }

    fn empty_pkg_root() -> TempDir {
        tempdir().unwrap()
    }

    #[test]
    fn svelte_field_wins_for_root() {
        let manifest = manifest(json!({
            "svelte": "src/index.js",
            "exports": { ".": "./dist/index.mjs" },
            "main": "dist/index.cjs",
        }));
        let root = empty_pkg_root();
        assert_eq!(resolve_subpath(&manifest, ".", root.path()), file("./src/index.js"));
    }

    #[test]
    fn exports_string_form() {
        let manifest = manifest(json!({ "exports": "./dist/index.mjs", "main": "ignored.js" }));
        let root = empty_pkg_root();
        assert_eq!(resolve_subpath(&manifest, ".", root.path()), file("./dist/index.mjs"));
    }

    #[test]
    fn exports_conditions() {
        let manifest = manifest(json!({
            "exports": {
                ".": {
                    "node": "./dist/node.js",
                    "browser": "./dist/browser.mjs",
                    "default": "./dist/fallback.mjs",
                },
                "./internal": { "default": "./src/internal/index.js" },
            },
        }));
        let root = empty_pkg_root();
        // `node` isn't in the served condition set, `browser` is
        assert_eq!(resolve_subpath(&manifest, ".", root.path()), file("./dist/browser.mjs"));
        assert_eq!(
            resolve_subpath(&manifest, "./internal", root.path()),
            file("./src/internal/index.js")
        );
    }

    #[test]
    fn exports_top_level_conditions() {
        let manifest = manifest(json!({
            "exports": { "svelte": "./index.svelte.js", "default": "./index.js" },
        }));
        let root = empty_pkg_root();
        assert_eq!(resolve_subpath(&manifest, ".", root.path()), file("./index.svelte.js"));
    }

    #[test]
    fn exports_array_fallback() {
        let manifest = manifest(json!({
            "exports": { ".": [{ "unknown-condition": "./a.js" }, "./b.js"] },
        }));
        let root = empty_pkg_root();
        assert_eq!(resolve_subpath(&manifest, ".", root.path()), file("./b.js"));
    }

    #[test]
    fn exports_pattern_substitution() {
        let manifest = manifest(json!({
            "exports": { "./*": "./src/*.js" },
        }));
        let root = empty_pkg_root();
        assert_eq!(
            resolve_subpath(&manifest, "./motion/spring", root.path()),
            file("./src/motion/spring.js")
        );
    }

    #[test]
    fn exports_miss_falls_through_to_legacy() {
        let manifest = manifest(json!({
            "exports": { "./other": "./other.js" },
            "module": "dist/index.mjs",
        }));
        let root = empty_pkg_root();
        assert_eq!(resolve_subpath(&manifest, ".", root.path()), file("./dist/index.mjs"));
    }

    #[test]
    fn legacy_field_order() {
        let root = empty_pkg_root();
        macro_rules! case {
            ($manifest:expr => $output:expr) => {{
                let manifest = manifest($manifest);
                eprintln!("CASE: {:?}", manifest.value());
                assert_eq!(resolve_subpath(&manifest, ".", root.path()), $output);
            }};
        }

        case!(json!({ "browser": "b.js", "module": "m.mjs", "main": "i.js" }) => file("./b.js"));
        case!(json!({ "module": "m.mjs", "main": "i.js" }) => file("./m.mjs"));
        case!(json!({ "main": "i.js" }) => file("./i.js"));
    }

    #[test]
    fn false_browser_root_inlines_empty_module() {
        let manifest = manifest(json!({ "browser": { ".": false }, "main": "index.js" }));
        let root = empty_pkg_root();
        assert_eq!(
            resolve_subpath(&manifest, ".", root.path()),
            Resolution::Inline(EMPTY_MODULE.to_string())
        );
    }

    #[test]
    fn object_browser_without_root_falls_back() {
        let manifest = manifest(json!({
            "browser": { "./fs-shim.js": false },
            "module": "dist/index.mjs",
        }));
        let root = empty_pkg_root();
        assert_eq!(resolve_subpath(&manifest, ".", root.path()), file("./dist/index.mjs"));
    }

    #[test]
    fn probing_order() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("lib")).unwrap();
        fs::write(root.path().join("lib/util.js"), "export {}").unwrap();
        fs::write(root.path().join("lib/util.mjs"), "export {}").unwrap();
        let manifest = manifest(json!({ "main": "index.js" }));
        // `.mjs` probes before `.js`
        assert_eq!(resolve_subpath(&manifest, "./lib/util", root.path()), file("./lib/util.mjs"));
    }

    #[test]
    fn probing_rejects_directories() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("lib")).unwrap();
        fs::write(root.path().join("lib/index.js"), "export {}").unwrap();
        let manifest = manifest(json!({}));
        assert_eq!(resolve_subpath(&manifest, "./lib", root.path()), file("./lib/index.js"));
    }

    #[test]
    fn probing_exact_file_first() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("entry.js"), "export {}").unwrap();
        let manifest = manifest(json!({}));
        assert_eq!(resolve_subpath(&manifest, "./entry.js", root.path()), file("./entry.js"));
    }

    #[test]
    fn browser_map_rewrites_missing_subpath() {
        let root = empty_pkg_root();
        let manifest = manifest(json!({
            "browser": { "./server.js": "./client.js", "./tls.js": false },
        }));
        assert_eq!(resolve_subpath(&manifest, "./server.js", root.path()), file("./client.js"));
        assert_eq!(
            resolve_subpath(&manifest, "./tls.js", root.path()),
            Resolution::Inline(EMPTY_MODULE.to_string())
        );
        assert_eq!(resolve_subpath(&manifest, "./lib.js", root.path()), file("./lib.js"));
    }

    #[test]
    fn fallback_is_identity() {
        let root = empty_pkg_root();
        let manifest = manifest(json!({}));
        assert_eq!(resolve_subpath(&manifest, "./missing.js", root.path()), file("./missing.js"));
    }
}
