use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use derive_more::{Display, Error, From};
use miette::Diagnostic;
use modcdn_installer::InstallError;
use modcdn_registry::RegistryError;
use modcdn_url::{ParseUrlError, Registry};
use std::path::PathBuf;

/// Error of one orchestrated request.
///
/// Only identity failures (no such package, version, or file) surface as
/// non-success responses; transform failures degrade to pass-through long
/// before they reach this enum.
#[derive(Debug, Display, Error, Diagnostic, From)]
#[non_exhaustive]
pub enum ServeError {
    #[diagnostic(transparent)]
    InvalidUrl(#[error(source)] ParseUrlError),

    #[from(ignore)]
    #[display("the `{registry}` registry is not wired to an upstream yet")]
    #[diagnostic(code(modcdn_server::unsupported_registry))]
    UnsupportedRegistry {
        #[error(not(source))]
        registry: Registry,
    },

    #[diagnostic(transparent)]
    Registry(#[error(source)] RegistryError),

    #[diagnostic(transparent)]
    Install(#[error(source)] InstallError),

    #[from(ignore)]
    #[display("no such file in package: {path:?}")]
    #[diagnostic(code(modcdn_server::file_not_found))]
    FileNotFound {
        #[error(not(source))]
        path: PathBuf,
    },

    #[from(ignore)]
    #[display("build failed: {detail}")]
    #[diagnostic(code(modcdn_server::build_failed))]
    BuildFailed {
        #[error(not(source))]
        detail: String,
    },
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ServeError::UnsupportedRegistry { .. }
            | ServeError::Registry(_)
            | ServeError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            ServeError::Install(_) | ServeError::BuildFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
