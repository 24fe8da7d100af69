use itertools::Itertools;
use url::form_urlencoded;

/// The recognized flags embedded in a CDN URL.
///
/// The set is closed: `svelte` (alias `s`) names the component-compiler
/// version used for `.svelte` files, `metadata` (alias `md`) is reserved.
/// Unknown keys never survive canonicalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    /// Exact component-compiler version, or the raw range before pinning.
    pub svelte: Option<String>,
    /// Reserved. Carried through canonicalization, never acted upon.
    pub metadata: Option<String>,
}

impl FlagSet {
    pub fn is_empty(&self) -> bool {
        self.svelte.is_none() && self.metadata.is_none()
    }

    /// Read flags from a query string. Returns the flags and the residual
    /// query pairs with every recognized key removed.
    pub fn from_query(query: &str) -> (FlagSet, Vec<(String, String)>) {
        let mut flags = FlagSet::default();
        let mut residual = Vec::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "svelte" => {
                    let value = if value.is_empty() { "latest" } else { &*value };
                    flags.svelte = Some(value.to_string());
                }
                "metadata" => {
                    if !matches!(&*value, "false" | "0" | "null") {
                        let value = if value.is_empty() { "1" } else { &*value };
                        flags.metadata = Some(value.to_string());
                    }
                }
                _ => residual.push((key.into_owned(), value.into_owned())),
            }
        }
        (flags, residual)
    }

    /// Read flags from the `!!` tail of a canonical path. `cdnv` and
    /// unrecognized aliases are dropped.
    pub fn from_tail(tail: &str) -> FlagSet {
        let mut flags = FlagSet::default();
        for entry in tail.split(';') {
            let Some((alias, value)) = entry.split_once(':') else {
                continue;
            };
            match alias {
                "s" => flags.svelte = Some(value.to_string()),
                "md" => flags.metadata = Some(value.to_string()),
                _ => {}
            }
        }
        flags
    }

    /// Encode the `!!` tail: `cdnv:{build}` plus one `alias:value` entry per
    /// present flag, lexicographically sorted.
    pub fn encode_tail(&self, build: &str) -> String {
        let FlagSet { svelte, metadata } = self;
        let svelte = svelte.as_ref().map(|value| format!("s:{value}"));
        let metadata = metadata.as_ref().map(|value| format!("md:{value}"));
        [Some(format!("cdnv:{build}")), svelte, metadata].into_iter().flatten().sorted().join(";")
    }
}
