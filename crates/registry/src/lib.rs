mod client;
mod error;
mod manifest;
mod packument;

pub use client::RegistryClient;
pub use error::RegistryError;
pub use manifest::{DependencyGroup, PackageManifest};
pub use packument::Packument;
