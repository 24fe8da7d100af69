use derive_more::{Display, Error};
use node_semver::Version;
use split_first_char::SplitFirstChar;
use std::{fmt, str::FromStr};

/// Name of an npm package.
///
/// Syntax:
/// * Without scope: `{bare}`
/// * With scope: `@{scope}/{bare}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgName {
    /// The scope (if any) without the `@` prefix.
    pub scope: Option<String>,
    /// The whole name (without scope) or the part after the separator (with scope).
    pub bare: String,
}

/// Error when parsing [`PkgName`] from a string input.
#[derive(Debug, Display, Error)]
pub enum ParsePkgNameError {
    #[display("Missing bare name")]
    MissingBareName,
    #[display("Name is empty")]
    EmptyName,
}

impl PkgName {
    /// Parse [`PkgName`] from a string input.
    pub fn parse(input: &str) -> Result<Self, ParsePkgNameError> {
        match input.split_first_char() {
            Some(('@', rest)) => {
                let (scope, bare) =
                    rest.split_once('/').ok_or(ParsePkgNameError::MissingBareName)?;
                if scope.is_empty() || bare.is_empty() {
                    return Err(ParsePkgNameError::EmptyName);
                }
                Ok(PkgName { scope: Some(scope.to_string()), bare: bare.to_string() })
            }
            Some(_) => Ok(PkgName { scope: None, bare: input.to_string() }),
            None => Err(ParsePkgNameError::EmptyName),
        }
    }

    /// Directory name of the install root for this name at `version`.
    ///
    /// The `/` of scoped names is folded to `+` to keep the result a single
    /// path segment.
    pub fn store_name(&self, version: &Version) -> String {
        format!("{self}@{version}").replace('/', "+")
    }

    /// Split a bare import specifier into the package name and the subpath
    /// after it.
    ///
    /// * `fast-querystring` → (`fast-querystring`, `.`)
    /// * `svelte/internal` → (`svelte`, `./internal`)
    /// * `@foo/bar/baz.js` → (`@foo/bar`, `./baz.js`)
    pub fn split_specifier(specifier: &str) -> Result<(PkgName, String), ParsePkgNameError> {
        let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
        let mut boundary = 0;
        for _ in 0..name_segments {
            match specifier[boundary..].find('/') {
                Some(offset) => boundary += offset + 1,
                None => {
                    return PkgName::parse(specifier).map(|name| (name, ".".to_string()));
                }
            }
        }
        let name = PkgName::parse(&specifier[..boundary - 1])?;
        let subpath = match &specifier[boundary..] {
            "" => ".".to_string(),
            rest => format!("./{rest}"),
        };
        Ok((name, subpath))
    }
}

impl FromStr for PkgName {
    type Err = ParsePkgNameError;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        PkgName::parse(input)
    }
}

impl fmt::Display for PkgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let PkgName { scope, bare } = self;
        if let Some(scope) = scope {
            write!(f, "@{scope}/")?;
        }
        write!(f, "{bare}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name(scope: Option<&str>, bare: &str) -> PkgName {
        PkgName { scope: scope.map(str::to_string), bare: bare.to_string() }
    }

    #[test]
    fn parse_ok() {
        macro_rules! case {
            ($input:expr => $output:expr) => {{
                let input = $input;
                eprintln!("CASE: {input:?}");
                let received: PkgName = input.parse().unwrap();
                assert_eq!(&received, &$output);
            }};
        }

        case!("left-pad" => name(None, "left-pad"));
        case!("@sveltejs/kit" => name(Some("sveltejs"), "kit"));
    }

    #[test]
    fn parse_err() {
        macro_rules! case {
            ($input:expr => $message:expr, $pattern:pat) => {{
                let input = $input;
                eprintln!("CASE: {input:?}");
                let error = input.parse::<PkgName>().unwrap_err();
                assert_eq!(error.to_string(), $message);
                assert!(matches!(&error, $pattern));
            }};
        }

        case!("@foo" => "Missing bare name", ParsePkgNameError::MissingBareName);
        case!("@/foo" => "Name is empty", ParsePkgNameError::EmptyName);
        case!("" => "Name is empty", ParsePkgNameError::EmptyName);
    }

    #[test]
    fn store_name() {
        let version = Version::parse("3.3.0").unwrap();
        assert_eq!(name(Some("fastify"), "error").store_name(&version), "@fastify+error@3.3.0");
        assert_eq!(name(None, "left-pad").store_name(&version), "left-pad@3.3.0");
    }

    #[test]
    fn split_specifier() {
        macro_rules! case {
            ($input:expr => $name:expr, $subpath:expr) => {{
                let input = $input;
                eprintln!("CASE: {input:?}");
                let (received_name, received_subpath) = PkgName::split_specifier(input).unwrap();
                assert_eq!(received_name, $name);
                assert_eq!(received_subpath, $subpath);
            }};
        }

        case!("fast-querystring" => name(None, "fast-querystring"), ".");
        case!("svelte/internal" => name(None, "svelte"), "./internal");
        case!("@foo/bar" => name(Some("foo"), "bar"), ".");
        case!("@foo/bar/baz.js" => name(Some("foo"), "bar"), "./baz.js");
        case!("svelte/" => name(None, "svelte"), ".");
    }
}
