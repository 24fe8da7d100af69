use derive_more::{Display, Error};
use miette::Diagnostic;

/// Error of every registry lookup.
///
/// Any failure to turn `(name, spec)` into an exact version counts as
/// unresolvable; the HTTP layer maps the whole enum to a 404-class response.
#[derive(Debug, Display, Error, Diagnostic)]
#[non_exhaustive]
pub enum RegistryError {
    #[display("network error while fetching `{name}`: {source}")]
    #[diagnostic(code(modcdn_registry::network))]
    Network {
        name: String,
        #[error(source)]
        source: reqwest::Error,
    },

    #[display("no version of `{name}` matches `{spec}`")]
    #[diagnostic(code(modcdn_registry::version_unresolvable))]
    VersionUnresolvable { name: String, spec: String },
}
