use crate::bridge::CallBridge;
use crate::guest::WasmGuest;
use ferry_config::GuestConfig;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// The bridge type every loaded guest is served through.
pub type WasmApplication = CallBridge<WasmGuest>;

/// Reasons a guest could not be made ready. Failures are shared by every
/// waiter of the same [`Loader`], so the payloads are plain strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read guest module {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error("failed to fetch guest module from {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("failed to compile guest module: {0}")]
    Compile(String),
    #[error("failed to instantiate guest module: {0}")]
    Instantiate(String),
    #[error("missing required guest export: {0}")]
    MissingExport(&'static str),
    #[error("guest `initialize` failed: {0}")]
    Initialize(String),
    #[error("guest loading was interrupted: {0}")]
    Interrupted(String),
}

/// Where guest module bytes come from.
#[derive(Debug, Clone)]
pub enum GuestSource {
    Bytes(Arc<[u8]>),
    Path(PathBuf),
    /// `http(s)://` URLs are downloaded; `file://` URLs are read from disk.
    Url(Url),
}

impl GuestSource {
    async fn read(&self) -> Result<Arc<[u8]>, LoadError> {
        match self {
            GuestSource::Bytes(bytes) => Ok(bytes.clone()),
            GuestSource::Path(path) => read_path(path).await,
            GuestSource::Url(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|()| LoadError::Read {
                    path: PathBuf::from(url.path()),
                    message: "not a local file URL".into(),
                })?;
                read_path(&path).await
            }
            GuestSource::Url(url) => download(url).await,
        }
    }
}

impl std::fmt::Display for GuestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuestSource::Bytes(bytes) => write!(f, "<{} in-memory bytes>", bytes.len()),
            GuestSource::Path(path) => write!(f, "{}", path.display()),
            GuestSource::Url(url) => write!(f, "{url}"),
        }
    }
}

async fn read_path(path: &Path) -> Result<Arc<[u8]>, LoadError> {
    tokio::fs::read(path)
        .await
        .map(Arc::from)
        .map_err(|err| LoadError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

async fn download(url: &Url) -> Result<Arc<[u8]>, LoadError> {
    let fetch_failed = |err: reqwest::Error| LoadError::Fetch {
        url: url.to_string(),
        message: err.to_string(),
    };
    let response = reqwest::get(url.clone())
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(fetch_failed)?;
    let bytes = response.bytes().await.map_err(fetch_failed)?;
    Ok(Arc::from(bytes.as_ref()))
}

type Ready = Shared<BoxFuture<'static, Result<Arc<WasmApplication>, LoadError>>>;

/// Loads one guest exactly once and hands the ready application to every
/// caller.
///
/// Loading starts on the first [`Loader::load`] (or [`Loader::start`]) and the
/// outcome, success or failure, is final for this loader. Build a new loader to
/// retry.
pub struct Loader {
    source: GuestSource,
    ready: Ready,
}

impl Loader {
    pub fn new(source: GuestSource, config: GuestConfig) -> Self {
        let ready = load(source.clone(), config).boxed().shared();
        Self { source, ready }
    }

    pub fn source(&self) -> &GuestSource {
        &self.source
    }

    /// Waits for the guest to be ready.
    pub async fn load(&self) -> Result<Arc<WasmApplication>, LoadError> {
        self.ready.clone().await
    }

    /// Starts loading in the background without waiting for it.
    pub fn start(&self) {
        let ready = self.ready.clone();
        tokio::spawn(async move {
            let _ = ready.await;
        });
    }

    /// The outcome, once loading has finished.
    pub fn try_get(&self) -> Option<Result<Arc<WasmApplication>, LoadError>> {
        self.ready.peek().cloned()
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("source", &self.source)
            .field("ready", &self.ready.peek().map(|outcome| outcome.is_ok()))
            .finish()
    }
}

async fn load(source: GuestSource, config: GuestConfig) -> Result<Arc<WasmApplication>, LoadError> {
    match instantiate(&source, config).await {
        Ok(guest) => {
            tracing::info!(source = %source, memory_bytes = guest.memory_size(), "guest ready");
            Ok(Arc::new(CallBridge::new(guest)))
        }
        Err(err) => {
            tracing::error!(source = %source, error = %err, "failed to load guest");
            Err(err)
        }
    }
}

async fn instantiate(source: &GuestSource, config: GuestConfig) -> Result<WasmGuest, LoadError> {
    let bytes = source.read().await?;
    tracing::debug!(source = %source, bytes = bytes.len(), "guest module read");
    tokio::task::spawn_blocking(move || WasmGuest::from_bytes(&bytes, &config))
        .await
        .map_err(|err| LoadError::Interrupted(err.to_string()))?
}
