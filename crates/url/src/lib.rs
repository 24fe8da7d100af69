mod flags;
mod pkg_name;

pub use flags::FlagSet;
pub use pkg_name::{ParsePkgNameError, PkgName};

use derive_more::{Display, Error};
use miette::Diagnostic;
use node_semver::Version;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use pipe_trait::Pipe;
use std::str::FromStr;

/// Upstream package source encoded in the first path segment.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
    #[display("npm")]
    Npm,
    #[display("github")]
    Github,
}

impl FromStr for Registry {
    type Err = ();
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "npm" => Ok(Registry::Npm),
            "github" => Ok(Registry::Github),
            _ => Err(()),
        }
    }
}

/// The unique, self-describing form of one request:
/// `/{registry}/{name}@{version}/{subpath}!!cdnv:{build};{alias}:{value};…`
///
/// Re-encoding a decoded canonical URL reproduces it byte-for-byte, which is
/// how the service recognizes its own output and skips re-resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    pub registry: Registry,
    pub name: PkgName,
    pub version: Version,
    /// `.`-relative path inside the installed package (`./runtime/index.js`),
    /// or a `data:` URL for inlined empty modules.
    pub subpath: String,
    pub flags: FlagSet,
}

/// A request that has not been canonicalized yet. Version and subpath carry
/// their defaults when the URL omitted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub registry: Registry,
    pub name: PkgName,
    /// Semver range or dist-tag, `latest` when absent.
    pub version_spec: String,
    pub subpath: String,
    pub flags: FlagSet,
    /// Query pairs that are not recognized flags, preserved across redirects.
    pub residual_query: Vec<(String, String)>,
}

/// Outcome of [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Canonical(CanonicalUrl),
    Raw(RawRequest),
}

/// Error when a path matches neither the raw nor the canonical grammar.
#[derive(Debug, Display, Error, Diagnostic)]
#[non_exhaustive]
pub enum ParseUrlError {
    #[display("not a valid CDN path: {_0}")]
    #[diagnostic(code(modcdn_url::invalid_url))]
    InvalidUrl(#[error(not(source))] String),
}

/// Characters that must not appear verbatim in an emitted path segment.
/// The `data:` subpath of an inlined empty module carries spaces and braces.
const SUBPATH_ENCODE: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`').add(b'{').add(b'}');

impl CanonicalUrl {
    /// Emit the canonical path, `!!cdnv:` tail included.
    pub fn encode(&self, build: &str) -> String {
        let CanonicalUrl { registry, name, version, subpath, flags } = self;
        let subpath = subpath.strip_prefix("./").unwrap_or(subpath);
        let subpath = utf8_percent_encode(subpath, SUBPATH_ENCODE);
        let tail = flags.encode_tail(build);
        format!("/{registry}/{name}@{version}/{subpath}!!{tail}")
    }
}

/// Parse a request path (and query string) into either of the two grammars.
///
/// The canonical grammar is recognized first; any path carrying a `!!` tail
/// with a `cdnv` entry claims to be canonical and fails hard when malformed.
pub fn decode(path: &str, query: Option<&str>) -> Result<Decoded, ParseUrlError> {
    let invalid = || ParseUrlError::InvalidUrl(path.to_string());
    let path =
        percent_decode_str(path).decode_utf8().map_err(|_| invalid())?.into_owned();
    if let Some((front, tail)) = path.split_once("!!") {
        return parse_canonical(front, tail).map(Decoded::Canonical).ok_or_else(invalid);
    }
    parse_raw(&path, query).map(Decoded::Raw).ok_or_else(invalid)
}

/// Split `name@suffix` or `@scope/name@suffix` at the version separator.
fn split_versioned(input: &str) -> Option<(&str, &str)> {
    let at = match input.strip_prefix('@') {
        Some(rest) => rest.find('@')? + 1,
        None => input.find('@')?,
    };
    Some((&input[..at], &input[at + 1..]))
}

fn parse_canonical(front: &str, tail: &str) -> Option<CanonicalUrl> {
    tail.split(';').any(|entry| entry.starts_with("cdnv:")).then_some(())?;
    let flags = FlagSet::from_tail(tail);
    let (registry, rest) = front.strip_prefix('/')?.split_once('/')?;
    let registry = registry.parse().ok()?;
    let (name, rest) = split_versioned(rest)?;
    let name = name.parse().ok()?;
    let (version, subpath) = rest.split_once('/')?;
    let version = Version::parse(version).ok()?;
    let subpath = match subpath {
        "" => return None,
        inline if inline.starts_with("data:") => inline.to_string(),
        relative => format!("./{relative}"),
    };
    Some(CanonicalUrl { registry, name, version, subpath, flags })
}

/// Take the name segment of a raw path (two segments when scoped) and return
/// it together with whatever follows.
fn split_head(rest: &str) -> Option<(&str, &str)> {
    let boundary = if rest.starts_with('@') {
        let scope_sep = rest.find('/')?;
        rest[scope_sep + 1..].find('/').map(|offset| scope_sep + 1 + offset)
    } else {
        rest.find('/')
    };
    Some(match boundary {
        Some(boundary) => (&rest[..boundary], &rest[boundary + 1..]),
        None => (rest, ""),
    })
}

fn parse_raw(path: &str, query: Option<&str>) -> Option<RawRequest> {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let (registry, rest) = match rest.split_once('/') {
        Some(("npm", rest)) => (Registry::Npm, rest),
        Some(("github", rest)) => (Registry::Github, rest),
        _ => (Registry::Npm, rest),
    };
    if rest.is_empty() {
        return None;
    }
    let (head, subpath) = split_head(rest)?;
    let (name, version_spec) = match split_versioned(head) {
        Some((name, spec)) if !spec.is_empty() => (name, spec),
        _ => (head, "latest"),
    };
    let name = name.parse().ok()?;
    let subpath = match subpath.trim_end_matches('/') {
        "" => ".".to_string(),
        relative => format!("./{relative}"),
    };
    let (flags, residual_query) =
        query.unwrap_or_default().pipe(FlagSet::from_query);
    Some(RawRequest {
        registry,
        name,
        version_spec: version_spec.to_string(),
        subpath,
        flags,
        residual_query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn canonical(path: &str) -> CanonicalUrl {
        match decode(path, None).unwrap() {
            Decoded::Canonical(url) => url,
            Decoded::Raw(raw) => panic!("expected canonical, got {raw:?}"),
        }
    }

    fn raw(path: &str, query: Option<&str>) -> RawRequest {
        match decode(path, query).unwrap() {
            Decoded::Raw(request) => request,
            Decoded::Canonical(url) => panic!("expected raw, got {url:?}"),
        }
    }

    #[test]
    fn decode_canonical() {
        let url = canonical("/npm/left-pad@1.3.0/index.js!!cdnv:pre.1");
        assert_eq!(url.registry, Registry::Npm);
        assert_eq!(url.name.to_string(), "left-pad");
        assert_eq!(url.version, Version::parse("1.3.0").unwrap());
        assert_eq!(url.subpath, "./index.js");
        assert!(url.flags.is_empty());
    }

    #[test]
    fn decode_canonical_scoped_with_flags() {
        let url = canonical("/npm/@foo/bar@2.0.0-rc.1/dist/index.mjs!!cdnv:pre.1;s:4.0.5");
        assert_eq!(url.name.to_string(), "@foo/bar");
        assert_eq!(url.version, Version::parse("2.0.0-rc.1").unwrap());
        assert_eq!(url.subpath, "./dist/index.mjs");
        assert_eq!(url.flags.svelte.as_deref(), Some("4.0.5"));
    }

    #[test]
    fn decode_canonical_drops_unknown_flags() {
        let url = canonical("/npm/left-pad@1.3.0/index.js!!cdnv:pre.1;zz:1");
        assert!(url.flags.is_empty());
        assert_eq!(url.encode("pre.1"), "/npm/left-pad@1.3.0/index.js!!cdnv:pre.1");
    }

    #[test]
    fn canonical_round_trip() {
        macro_rules! case {
            ($path:expr) => {{
                let path = $path;
                eprintln!("CASE: {path:?}");
                assert_eq!(canonical(path).encode("pre.1"), path);
            }};
        }

        case!("/npm/left-pad@1.3.0/index.js!!cdnv:pre.1");
        case!("/npm/@foo/bar@2.0.0-rc.1/dist/index.mjs!!cdnv:pre.1;s:4.0.5");
        case!("/github/fastify@4.1.0/lib/route.js!!cdnv:pre.1;md:1;s:4.0.5");
        case!("/npm/empty@1.0.0/data:text/javascript,export%20%7B%7D!!cdnv:pre.1");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonical("/npm/left-pad@1.3.0/index.js!!cdnv:pre.1;zz:1").encode("pre.1");
        let twice = canonical(&once).encode("pre.1");
        assert_eq!(once, twice);
    }

    #[test]
    fn decode_raw_defaults() {
        let request = raw("/left-pad", None);
        assert_eq!(request.registry, Registry::Npm);
        assert_eq!(request.name.to_string(), "left-pad");
        assert_eq!(request.version_spec, "latest");
        assert_eq!(request.subpath, ".");
    }

    #[test]
    fn decode_raw_forms() {
        macro_rules! case {
            ($path:expr => $registry:expr, $name:expr, $spec:expr, $subpath:expr) => {{
                let path = $path;
                eprintln!("CASE: {path:?}");
                let request = raw(path, None);
                assert_eq!(request.registry, $registry);
                assert_eq!(request.name.to_string(), $name);
                assert_eq!(request.version_spec, $spec);
                assert_eq!(request.subpath, $subpath);
            }};
        }

        case!("/npm/left-pad@1.3.0/" => Registry::Npm, "left-pad", "1.3.0", ".");
        case!("/npm/svelte@4.0.0/src/runtime/index.js"
            => Registry::Npm, "svelte", "4.0.0", "./src/runtime/index.js");
        case!("/github/fastify" => Registry::Github, "fastify", "latest", ".");
        case!("/@foo/bar@next/lib" => Registry::Npm, "@foo/bar", "next", "./lib");
        case!("/npm/foo@%5E1.2.0" => Registry::Npm, "foo", "^1.2.0", ".");
        case!("npm" => Registry::Npm, "npm", "latest", ".");
    }

    #[test]
    fn decode_raw_query_flags() {
        let request = raw("/npm/app@1.0.0/App.svelte", Some("svelte=4&metadata=0&keep=1"));
        assert_eq!(request.flags.svelte.as_deref(), Some("4"));
        assert_eq!(request.flags.metadata, None);
        assert_eq!(request.residual_query, vec![("keep".to_string(), "1".to_string())]);
    }

    #[test]
    fn decode_rejects() {
        macro_rules! case {
            ($path:expr) => {{
                let path = $path;
                eprintln!("CASE: {path:?}");
                let error = decode(path, None).unwrap_err();
                assert!(matches!(&error, ParseUrlError::InvalidUrl(_)));
            }};
        }

        // empty and name-less paths
        case!("/");
        case!("");
        case!("/npm/");
        // scope without a bare name
        case!("/@foo");
        // claimed canonical form with a bogus version
        case!("/npm/left-pad@next/index.js!!cdnv:pre.1");
        // claimed canonical form without the engine revision
        case!("/npm/left-pad@1.3.0/index.js!!s:4.0.5");
        // canonical form without a subpath
        case!("/npm/left-pad@1.3.0!!cdnv:pre.1");
    }

    #[test]
    fn encode_snapshot() {
        let url = CanonicalUrl {
            registry: Registry::Npm,
            name: "@sveltejs/kit".parse().unwrap(),
            version: Version::parse("2.5.0").unwrap(),
            subpath: "./src/runtime/app/stores.js".to_string(),
            flags: FlagSet { svelte: Some("4.2.19".to_string()), metadata: None },
        };
        insta::assert_snapshot!(
            url.encode("pre.1"),
            @"/npm/@sveltejs/kit@2.5.0/src/runtime/app/stores.js!!cdnv:pre.1;s:4.2.19"
        );
    }
}
