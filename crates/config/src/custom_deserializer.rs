use serde::{de, Deserialize, Deserializer};
use std::{env, path::PathBuf};
use url::Url;

/// The default upstream, slash-terminated like every stored registry value.
pub const NPM_REGISTRY: &str = "https://registry.npmjs.org/";

pub fn default_port() -> u16 {
    8080
}

pub fn default_prefetch_workers() -> usize {
    4
}

pub fn default_build_version() -> String {
    "pre.1".to_string()
}

pub fn default_package_manager() -> String {
    "npm".to_string()
}

/// If the $MODCDN_HOME env variable is set, use it directly.
/// If the $XDG_DATA_HOME env variable is set, then $XDG_DATA_HOME/modcdn.
/// On Windows: ~/AppData/Local/modcdn
/// On macOS: ~/Library/modcdn
/// On Linux: ~/.local/share/modcdn
pub fn default_root_dir() -> PathBuf {
    if let Ok(modcdn_home) = env::var("MODCDN_HOME") {
        return PathBuf::from(modcdn_home);
    }

    if let Ok(xdg_data_home) = env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data_home).join("modcdn");
    }

    let home_dir = home::home_dir().expect("Home directory is not available");

    match env::consts::OS {
        "linux" => home_dir.join(".local/share/modcdn"),
        "macos" => home_dir.join("Library/modcdn"),
        "windows" => home_dir.join("AppData/Local/modcdn"),
        _ => panic!("unsupported operating system: {}", env::consts::OS),
    }
}

pub fn default_registry() -> String {
    NPM_REGISTRY.to_string()
}

/// Registry values are joined with `{name}/{spec}` suffixes all over the
/// service, so they must be real http(s) URLs and end in exactly one `/`.
pub fn normalize_registry(input: &str) -> Result<String, String> {
    let url: Url = input.parse().map_err(|error| format!("invalid registry URL: {error}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("registry must be an http(s) URL, got `{input}`"));
    }
    Ok(format!("{}/", input.trim_end_matches('/')))
}

/// Settings paths accept `~/` shorthand and are stored absolute, so a later
/// working-directory change can't silently relocate the persisted state.
pub fn expand_path(input: &str) -> Result<PathBuf, String> {
    if let Some(rest) = input.strip_prefix("~/") {
        let home = home::home_dir().ok_or("home directory is not available")?;
        return Ok(home.join(rest));
    }
    let path = PathBuf::from(input);
    if path.is_absolute() {
        return Ok(path);
    }
    env::current_dir().map(|cwd| cwd.join(path)).map_err(|error| error.to_string())
}

pub fn deserialize_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(de::Error::custom)
}

pub fn deserialize_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(de::Error::custom)
}

pub fn deserialize_pathbuf<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    expand_path(&s).map_err(de::Error::custom)
}

pub fn deserialize_opt_pathbuf<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_pathbuf(deserializer).map(Some)
}

pub fn deserialize_registry<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    normalize_registry(&s).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::env;

    fn display_path(path: &PathBuf) -> String {
        path.display().to_string().replace('\\', "/")
    }

    #[test]
    fn test_default_root_dir_with_modcdn_home_env() {
        env::set_var("MODCDN_HOME", "/tmp/modcdn-home");
        let root_dir = default_root_dir();
        assert_eq!(display_path(&root_dir), "/tmp/modcdn-home");
        env::remove_var("MODCDN_HOME");
    }

    #[test]
    fn test_default_root_dir_with_xdg_env() {
        env::remove_var("MODCDN_HOME");
        env::set_var("XDG_DATA_HOME", "/tmp/xdg_data_home");
        let root_dir = default_root_dir();
        assert_eq!(display_path(&root_dir), "/tmp/xdg_data_home/modcdn");
        env::remove_var("XDG_DATA_HOME");
    }

    #[test]
    fn normalize_registry_terminates_with_one_slash() {
        macro_rules! case {
            ($input:expr => $output:expr) => {{
                let input = $input;
                eprintln!("CASE: {input:?}");
                assert_eq!(normalize_registry(input).as_deref(), Ok($output));
            }};
        }

        case!("https://registry.npmjs.org" => "https://registry.npmjs.org/");
        case!("https://registry.npmjs.org/" => "https://registry.npmjs.org/");
        case!("http://localhost:4873//" => "http://localhost:4873/");
        case!("https://mirror.example.co/npm" => "https://mirror.example.co/npm/");
    }

    #[test]
    fn normalize_registry_rejects_non_http() {
        assert!(normalize_registry("ftp://registry.npmjs.org").is_err());
        assert!(normalize_registry("not a url").is_err());
    }

    #[test]
    fn expand_path_forms() {
        let absolute = expand_path("/var/lib/modcdn").unwrap();
        assert_eq!(display_path(&absolute), "/var/lib/modcdn");

        let relative = expand_path("state/modcdn").unwrap();
        assert_eq!(relative, env::current_dir().unwrap().join("state/modcdn"));

        if let Some(home) = home::home_dir() {
            assert_eq!(expand_path("~/modcdn").unwrap(), home.join("modcdn"));
        }
    }

    #[test]
    fn default_registry_is_normalized() {
        assert_eq!(normalize_registry(NPM_REGISTRY).as_deref(), Ok(default_registry().as_str()));
    }
}
