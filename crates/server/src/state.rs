use dashmap::DashMap;
use derive_more::{Display, Error, From};
use miette::Diagnostic;
use modcdn_cache::{Cache, CacheError};
use modcdn_compiler::CompilerRegistry;
use modcdn_config::Settings;
use modcdn_installer::Installer;
use modcdn_registry::RegistryClient;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};

/// Depth of the prefetch queue. A full queue drops edges: prefetch is
/// best-effort and the artifact is rebuilt on first real demand anyway.
const PREFETCH_QUEUE_DEPTH: usize = 256;

/// Progress of one in-flight canonical URL, broadcast to every request that
/// collided with it.
#[derive(Debug, Clone)]
pub enum BuildState {
    InProgress,
    Done(Result<Arc<Vec<u8>>, String>),
}

/// Error of [`App::init`].
#[derive(Debug, Display, Error, Diagnostic, From)]
#[non_exhaustive]
pub enum InitAppError {
    #[display("cannot prepare the state directory: {_0}")]
    #[diagnostic(code(modcdn_server::init_io_error))]
    Io(#[error(source)] std::io::Error),

    #[diagnostic(transparent)]
    OpenCache(#[error(source)] CacheError),
}

/// Process-wide service state. Every handler owns an [`Arc`] of this; there
/// are no ambient globals.
pub struct App {
    pub settings: &'static Settings,
    pub registry: RegistryClient,
    pub installer: Installer,
    pub cache: Cache,
    pub compilers: CompilerRegistry,
    /// In-flight builds keyed by canonical URL path.
    pub in_flight: DashMap<String, watch::Receiver<BuildState>>,
    prefetch_tx: mpsc::Sender<String>,
}

impl App {
    /// Initialize the service state and start the prefetch worker pool.
    pub async fn init(settings: &'static Settings) -> Result<Arc<Self>, InitAppError> {
        std::fs::create_dir_all(&settings.root_dir)?;
        let cache = Cache::open(&settings.cache_db_path())?;
        let compilers = CompilerRegistry::from_dir(&settings.compilers_dir()).await;

        if which::which(&settings.package_manager).is_err() {
            tracing::warn!(
                target: "modcdn::serve",
                package_manager = %settings.package_manager,
                "Package manager not found on PATH, installs will fail",
            );
        }

        let (prefetch_tx, prefetch_rx) = mpsc::channel(PREFETCH_QUEUE_DEPTH);
        let app = Arc::new(App {
            settings,
            registry: RegistryClient::new(settings.registry.clone()),
            installer: Installer::new(settings),
            cache,
            compilers,
            in_flight: DashMap::new(),
            prefetch_tx,
        });
        Arc::clone(&app).spawn_prefetch_workers(prefetch_rx);
        Ok(app)
    }

    /// Queue a discovered edge for speculative building. Dropping on
    /// backpressure is deliberate.
    pub fn enqueue_prefetch(&self, canonical_path: String) {
        if let Err(error) = self.prefetch_tx.try_send(canonical_path) {
            tracing::debug!(target: "modcdn::prefetch", %error, "Prefetch queue full, dropping edge");
        }
    }

    fn spawn_prefetch_workers(self: Arc<Self>, mut prefetch_rx: mpsc::Receiver<String>) {
        let workers = self.settings.prefetch_workers.max(1);
        tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(workers));
            while let Some(canonical_path) = prefetch_rx.recv().await {
                let permit = Arc::clone(&permits)
                    .acquire_owned()
                    .await
                    .expect("prefetch semaphore shouldn't have been closed");
                let app = Arc::clone(&self);
                tokio::spawn(async move {
                    let _permit = permit;
                    app.prefetch(&canonical_path).await;
                });
            }
        });
    }
}
