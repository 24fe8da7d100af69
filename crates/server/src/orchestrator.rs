use crate::error::ServeError;
use crate::state::{App, BuildState};
use dashmap::mapref::entry::Entry;
use modcdn_compiler::CompileOptions;
use modcdn_registry::PackageManifest;
use modcdn_resolver::resolve_subpath;
use modcdn_rewriter::{rewrite_module, RewriteOutcome};
use modcdn_url::{CanonicalUrl, Decoded, FlagSet, PkgName, RawRequest, Registry};
use node_semver::Version;
use std::sync::Arc;
use tokio::sync::watch;
use url::form_urlencoded;

/// Outcome of one orchestrated request.
#[derive(Debug, PartialEq, Eq)]
pub enum Served {
    /// The request wasn't canonical; send the client to the form that is.
    Redirect(String),
    Module(Vec<u8>),
    /// A speculative prefetch collided with an in-flight build.
    NoContent,
}

impl App {
    /// Handle one request path end to end.
    ///
    /// Raw requests are canonicalized (pinning the version, installing,
    /// resolving the subpath) and redirected; canonical requests that don't
    /// re-encode to themselves byte-for-byte are redirected once more; true
    /// canonical requests are served from cache or built.
    pub async fn handle(&self, path: &str, query: Option<&str>) -> Result<Served, ServeError> {
        match modcdn_url::decode(path, query)? {
            Decoded::Raw(raw) => {
                let residual = serialize_query(&raw.residual_query);
                let canonical = self.canonicalize(raw).await?;
                let mut location = canonical.encode(&self.settings.build_version);
                if let Some(residual) = residual {
                    location.push('?');
                    location.push_str(&residual);
                }
                Ok(Served::Redirect(location))
            }
            Decoded::Canonical(url) => {
                let canonical_path = url.encode(&self.settings.build_version);
                if canonical_path != path {
                    let mut location = canonical_path;
                    if let Some(query) = query.filter(|query| !query.is_empty()) {
                        location.push('?');
                        location.push_str(query);
                    }
                    return Ok(Served::Redirect(location));
                }
                match self.serve_bytes(&url, &canonical_path, false).await? {
                    Some(bytes) => Ok(Served::Module(bytes.to_vec())),
                    None => Ok(Served::NoContent),
                }
            }
        }
    }

    /// Resolve a raw request to its canonical URL: pin the compiler flag and
    /// the package version, materialize the install, resolve the subpath.
    async fn canonicalize(&self, raw: RawRequest) -> Result<CanonicalUrl, ServeError> {
        let RawRequest { registry, name, version_spec, subpath, mut flags, .. } = raw;
        if registry == Registry::Github {
            return Err(ServeError::UnsupportedRegistry { registry });
        }

        if let Some(range) = &flags.svelte {
            let pinned = self.registry.resolve_version("svelte", range).await?;
            flags.svelte = Some(pinned.to_string());
        }

        let version = self.registry.resolve_version(&name.to_string(), &version_spec).await?;
        let pkg_root = self.installer.ensure_installed(&name, &version).await?;
        let manifest = self.registry.manifest(&name.to_string(), &version.to_string()).await?;
        let resolution = resolve_subpath(&manifest, &subpath, &pkg_root);

        Ok(CanonicalUrl {
            registry,
            name,
            version,
            subpath: resolution.as_str().to_string(),
            flags,
        })
    }

    /// Serve the bytes of one canonical URL, building at most once per URL
    /// across the process.
    ///
    /// A colliding speculative prefetch returns `None` immediately; a
    /// colliding user request waits for the in-flight build and serves its
    /// bytes.
    pub(crate) async fn serve_bytes(
        &self,
        url: &CanonicalUrl,
        canonical_path: &str,
        speculative: bool,
    ) -> Result<Option<Arc<Vec<u8>>>, ServeError> {
        match self.cache.get(canonical_path).await {
            Ok(Some(bytes)) => return Ok(Some(Arc::new(bytes))),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(target: "modcdn::serve", canonical_path, %error, "Cache lookup failed");
            }
        }

        enum Role {
            Leader(watch::Sender<BuildState>),
            Waiter(watch::Receiver<BuildState>),
        }

        let role = match self.in_flight.entry(canonical_path.to_string()) {
            Entry::Occupied(entry) => Role::Waiter(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(BuildState::InProgress);
                entry.insert(receiver);
                Role::Leader(sender)
            }
        };

        match role {
            Role::Waiter(_) if speculative => Ok(None),
            Role::Waiter(mut receiver) => {
                tracing::debug!(target: "modcdn::serve", canonical_path, "Wait on in-flight build");
                loop {
                    let state = receiver.borrow().clone();
                    match state {
                        BuildState::InProgress => {
                            receiver.changed().await.map_err(|_| ServeError::BuildFailed {
                                detail: "build worker vanished".to_string(),
                            })?;
                        }
                        BuildState::Done(Ok(bytes)) => return Ok(Some(bytes)),
                        BuildState::Done(Err(detail)) => {
                            return Err(ServeError::BuildFailed { detail });
                        }
                    }
                }
            }
            Role::Leader(sender) => {
                let result = self.build(url, canonical_path).await;
                self.in_flight.remove(canonical_path);
                let shared = result.as_ref().map(Arc::clone).map_err(|error| error.to_string());
                sender.send(BuildState::Done(shared)).ok();
                result.map(Some)
            }
        }
    }

    /// The miss path: install, read, compile when flagged, rewrite, store.
    async fn build(
        &self,
        url: &CanonicalUrl,
        canonical_path: &str,
    ) -> Result<Arc<Vec<u8>>, ServeError> {
        // inlined empty modules serve their own data URL as the body
        if url.subpath.starts_with("data:") {
            return Ok(Arc::new(url.subpath.clone().into_bytes()));
        }

        let pkg_root = self.installer.ensure_installed(&url.name, &url.version).await?;
        let file_path = pkg_root.join(url.subpath.trim_start_matches("./"));
        let source = tokio::fs::read_to_string(&file_path)
            .await
            .map_err(|_| ServeError::FileNotFound { path: file_path })?;

        let filename =
            url.subpath.rsplit('/').next().unwrap_or(url.subpath.as_str()).to_string();
        let source = if filename.ends_with(".svelte") && url.flags.svelte.is_some() {
            self.compile_component(url, &filename, source).await
        } else {
            source
        };

        let outcome = match self
            .registry
            .manifest(&url.name.to_string(), &url.version.to_string())
            .await
        {
            Ok(manifest) => {
                rewrite_module(&source, &filename, |specifier| {
                    self.resolve_specifier(url, &manifest, specifier)
                })
                .await
            }
            Err(error) => {
                tracing::warn!(
                    target: "modcdn::rewrite",
                    canonical_path,
                    %error,
                    "Manifest unavailable, serving untransformed",
                );
                RewriteOutcome { code: source, discovered: Vec::new() }
            }
        };

        for edge in &outcome.discovered {
            self.enqueue_prefetch(edge.clone());
        }

        let bytes = Arc::new(outcome.code.into_bytes());
        if let Err(error) = self.cache.set(canonical_path, bytes.to_vec()).await {
            tracing::warn!(target: "modcdn::serve", canonical_path, %error, "Cache write failed");
        }
        Ok(bytes)
    }

    /// Compile a single-file component with the flagged compiler version.
    /// Every failure degrades to the untransformed source.
    async fn compile_component(&self, url: &CanonicalUrl, filename: &str, source: String) -> String {
        let Some(flag) = &url.flags.svelte else {
            return source;
        };
        let version = match flag.parse::<Version>() {
            Ok(version) => version,
            Err(_) => {
                tracing::warn!(target: "modcdn::compile", %flag, "Compiler flag is not exact");
                return source;
            }
        };
        let compiler = match self.compilers.get(&version).await {
            Ok(compiler) => compiler,
            Err(error) => {
                tracing::warn!(target: "modcdn::compile", %error, "Compiler unavailable");
                return source;
            }
        };
        let options = CompileOptions {
            name: filename.strip_suffix(".svelte").unwrap_or("Component").to_string(),
            filename: filename.to_string(),
            dev: false,
        };
        match compiler.compile(&source, &options).await {
            Ok(output) => output.code,
            Err(error) => {
                tracing::warn!(target: "modcdn::compile", filename, %error, "Compile failed, serving source");
                source
            }
        }
    }

    /// Canonicalize one specifier found while rewriting `current`.
    ///
    /// `None` leaves the specifier untouched in the output; resolution
    /// failures must never take the whole module down.
    async fn resolve_specifier(
        &self,
        current: &CanonicalUrl,
        manifest: &PackageManifest,
        specifier: String,
    ) -> Option<String> {
        let edge_flags = FlagSet { svelte: current.flags.svelte.clone(), metadata: None };

        let target = if specifier.starts_with('.') {
            // same package, new subpath
            let joined = join_relative(&current.subpath, &specifier)?;
            let pkg_root = self.installer.package_root(&current.name, &current.version);
            let resolution = resolve_subpath(manifest, &joined, &pkg_root);
            CanonicalUrl {
                registry: current.registry,
                name: current.name.clone(),
                version: current.version.clone(),
                subpath: resolution.as_str().to_string(),
                flags: edge_flags,
            }
        } else {
            let (name, subpath) = PkgName::split_specifier(&specifier).ok()?;
            let range = match &current.flags.svelte {
                // the flag forces the pinned compiler version for `svelte`
                Some(flag) if name.scope.is_none() && name.bare == "svelte" => flag.clone(),
                _ => manifest.dependency_range(&name.to_string()).unwrap_or("latest").to_string(),
            };
            let version = match self.registry.resolve_version(&name.to_string(), &range).await {
                Ok(version) => version,
                Err(error) => {
                    tracing::debug!(target: "modcdn::rewrite", %specifier, %error, "Cannot pin specifier");
                    return None;
                }
            };
            let dep_manifest =
                self.registry.manifest(&name.to_string(), &version.to_string()).await.ok()?;
            let pkg_root = self.installer.ensure_installed(&name, &version).await.ok()?;
            let resolution = resolve_subpath(&dep_manifest, &subpath, &pkg_root);
            CanonicalUrl {
                registry: current.registry,
                name,
                version,
                subpath: resolution.as_str().to_string(),
                flags: edge_flags,
            }
        };

        Some(target.encode(&self.settings.build_version))
    }

    /// Build one discovered edge in the background. Collisions with
    /// in-flight builds and all failures are silently dropped.
    pub(crate) async fn prefetch(&self, canonical_path: &str) {
        let url = match modcdn_url::decode(canonical_path, None) {
            Ok(Decoded::Canonical(url)) => url,
            _ => return,
        };
        tracing::debug!(target: "modcdn::prefetch", canonical_path, "Prefetch");
        if let Err(error) = self.serve_bytes(&url, canonical_path, true).await {
            tracing::debug!(target: "modcdn::prefetch", canonical_path, %error, "Prefetch failed");
        }
    }
}

/// Join a relative specifier against the directory of the current subpath.
/// `None` when the specifier escapes the package root.
fn join_relative(base: &str, specifier: &str) -> Option<String> {
    let mut stack: Vec<&str> = base.strip_prefix("./").unwrap_or(base).split('/').collect();
    stack.pop();
    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            segment => stack.push(segment),
        }
    }
    if stack.is_empty() {
        return None;
    }
    Some(format!("./{}", stack.join("/")))
}

fn serialize_query(pairs: &[(String, String)]) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer.extend_pairs(pairs);
    Some(serializer.finish())
}
