/*!
 * Provisioning of the ASR engine and model assets.
 *
 * A resource is installed once into `<cache_dir>/<id>/` and reused by every
 * later run. Installs happen in a staging directory that is renamed into
 * place only after all files are fetched, verified and unpacked, and an
 * injected `InstallLock` serializes concurrent installers of the same
 * resource. Archives are unpacked with the system `unzip`, `7z` or `tar`.
 */

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;

use crate::cancel::CancellationToken;
use crate::errors::ResourceFetchError;
use crate::process_runner::{self, ProcessSpec};
use crate::retry::RetryPolicy;

/// Marker written last; its presence means the install completed
const COMPLETE_MARKER: &str = ".complete";

const UNPACK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Archive layout of a downloaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    #[serde(rename = "7z")]
    SevenZip,
    Tar,
}

impl ArchiveFormat {
    fn tool(self) -> &'static str {
        match self {
            Self::Zip => "unzip",
            Self::SevenZip => "7z",
            Self::Tar => "tar",
        }
    }

    fn args(self, archive: &Path, into: &Path) -> Vec<OsString> {
        let (archive, into) = (archive.as_os_str().to_owned(), into.as_os_str().to_owned());
        match self {
            Self::Zip => vec!["-o".into(), "-q".into(), archive, "-d".into(), into],
            Self::SevenZip => {
                let mut out = OsString::from("-o");
                out.push(&into);
                vec!["x".into(), archive, out, "-y".into()]
            }
            Self::Tar => vec!["-xf".into(), archive, "-C".into(), into],
        }
    }
}

/// One file belonging to a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub url: String,
    pub file_name: String,
    /// Expected lowercase hex SHA-256, verified when present
    #[serde(default)]
    pub sha256: Option<String>,
    /// Unpacked into the install directory after verification, then removed
    #[serde(default)]
    pub unpack: Option<ArchiveFormat>,
}

/// Version-tagged asset that must exist locally before a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Empty for tools expected on PATH
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    /// Path returned by `ensure`, relative to the install directory
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub executable: bool,
}

impl ResourceSpec {
    /// Resource provided by the system, looked up on PATH
    pub fn system(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            name: program.clone(),
            version: String::new(),
            files: Vec::new(),
            entry: program,
            executable: true,
        }
    }

    pub fn is_system(&self) -> bool {
        self.files.is_empty()
    }

    /// Cache directory name
    pub fn id(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

/// Failure of a single fetch attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Downloads one URL to a local file and returns its SHA-256
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<String, FetchError>;
}

/// Streaming HTTP fetcher hashing bytes as they are written
pub struct HttpFetcher {
    client: reqwest::Client,
}

/// Upper bound for one download of a large model file
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60 * 60);

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ResourceFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResourceFetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!("HTTP {}", status)));
        }

        let write_error = |e: std::io::Error| FetchError::Permanent(format!("{}: {}", dest.display(), e));
        let mut file = tokio::fs::File::create(dest).await.map_err(write_error)?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Transient(e.to_string()))?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(write_error)?;
        }
        file.flush().await.map_err(write_error)?;

        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Held while a resource is being installed; released on drop
pub struct InstallGuard {
    _inner: Box<dyn Send>,
}

impl InstallGuard {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self { _inner: Box::new(inner) }
    }
}

/// Mutual exclusion for installs of the same resource id
#[async_trait]
pub trait InstallLock: Send + Sync {
    async fn acquire(&self, key: &str) -> Result<InstallGuard, ResourceFetchError>;
}

/// Lock combining an in-process async mutex per key with a lock file, so
/// both tasks in this process and other processes sharing the cache wait.
pub struct FileInstallLock {
    dir: PathBuf,
    poll_interval: Duration,
    stale_after: Duration,
    local: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileInstallLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(10 * 60),
            local: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn local_mutex(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.local.lock();
        Arc::clone(map.entry(key.to_string()).or_default())
    }

    fn is_stale(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > self.stale_after)
    }

    /// Move a stale lock aside. The rename succeeds for one breaker only,
    /// and a lock that turns out fresh after the move is put back.
    fn break_stale(&self, path: &Path) -> bool {
        let tombstone = path.with_extension(format!("lock.stale-{:08x}", rand::rng().random::<u32>()));
        if std::fs::rename(path, &tombstone).is_err() {
            return false;
        }
        let stale = self.is_stale(&tombstone);
        if !stale && std::fs::hard_link(&tombstone, path).is_err() {
            warn!("Could not restore install lock {:?}", path);
        }
        let _ = std::fs::remove_file(&tombstone);
        stale
    }
}

/// Touch the lock file so a long install never looks abandoned
async fn keep_fresh(path: PathBuf, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let touched = OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_modified(SystemTime::now()));
        if let Err(e) = touched {
            debug!("Failed to refresh lock file {:?}: {}", path, e);
        }
    }
}

struct FileLockGuard {
    path: PathBuf,
    heartbeat: tokio::task::JoinHandle<()>,
    _local: OwnedMutexGuard<()>,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {:?}: {}", self.path, e);
        }
    }
}

#[async_trait]
impl InstallLock for FileInstallLock {
    async fn acquire(&self, key: &str) -> Result<InstallGuard, ResourceFetchError> {
        let local = self.local_mutex(key).lock_owned().await;
        let path = self.dir.join(format!("{}.lock", key));

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!("Acquired install lock {:?}", path);
                    let every = (self.stale_after / 3).max(Duration::from_millis(10));
                    let heartbeat = tokio::spawn(keep_fresh(path.clone(), every));
                    return Ok(InstallGuard::new(FileLockGuard {
                        path,
                        heartbeat,
                        _local: local,
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.is_stale(&path) && self.break_stale(&path) {
                        warn!("Broke stale install lock {:?}", path);
                        continue;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    return Err(ResourceFetchError::Lock(format!("{}: {}", path.display(), e)));
                }
            }
        }
    }
}

/// Installs resources into a shared cache directory, at most once each
pub struct ResourceProvisioner {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    lock: Arc<dyn InstallLock>,
    retry: RetryPolicy,
}

impl ResourceProvisioner {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        lock: Arc<dyn InstallLock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetcher,
            lock,
            retry,
        }
    }

    /// HTTP fetcher and file lock rooted in `cache_dir`
    pub fn with_defaults(cache_dir: impl Into<PathBuf>) -> Result<Self, ResourceFetchError> {
        let cache_dir = cache_dir.into();
        let lock = Arc::new(FileInstallLock::new(&cache_dir));
        let fetcher = Arc::new(HttpFetcher::new(DEFAULT_FETCH_TIMEOUT)?);
        Ok(Self::new(cache_dir, fetcher, lock, RetryPolicy::default()))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn install_dir(&self, spec: &ResourceSpec) -> PathBuf {
        self.cache_dir.join(spec.id())
    }

    /// Whether `spec` is fully installed in the cache
    pub fn is_installed(&self, spec: &ResourceSpec) -> bool {
        let dir = self.install_dir(spec);
        dir.join(COMPLETE_MARKER).is_file()
            && (spec.entry.is_empty() || dir.join(&spec.entry).exists())
            && spec
                .files
                .iter()
                .filter(|f| f.unpack.is_none())
                .all(|f| dir.join(&f.file_name).is_file())
    }

    /// Make sure `spec` is available locally and return its entry path
    pub async fn ensure(&self, spec: &ResourceSpec) -> Result<PathBuf, ResourceFetchError> {
        if spec.is_system() {
            return resolve_system(spec);
        }

        let dir = self.install_dir(spec);
        let entry = dir.join(&spec.entry);
        if self.is_installed(spec) {
            debug!("Resource {} already installed at {:?}", spec.id(), dir);
            return Ok(entry);
        }

        let io_error = |path: &Path, e: std::io::Error| ResourceFetchError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| io_error(&self.cache_dir, e))?;

        let _guard = self.lock.acquire(&spec.id()).await?;
        if self.is_installed(spec) {
            debug!("Resource {} installed by another caller", spec.id());
            return Ok(entry);
        }

        info!("Installing {} into {:?}", spec.id(), dir);
        let staging = self
            .cache_dir
            .join(format!("{}.partial-{:08x}", spec.id(), rand::rng().random::<u32>()));
        std::fs::create_dir_all(&staging).map_err(|e| io_error(&staging, e))?;

        if let Err(e) = self.install_into(&staging, spec).await {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        let finalize = || -> std::io::Result<()> {
            if spec.executable {
                make_executable(&staging.join(&spec.entry))?;
            }
            let marker = serde_json::to_string_pretty(spec).unwrap_or_default();
            std::fs::write(staging.join(COMPLETE_MARKER), marker)?;
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::rename(&staging, &dir)
        };
        if let Err(e) = finalize() {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(io_error(&dir, e));
        }

        info!("Installed {}", spec.id());
        Ok(entry)
    }

    async fn install_into(&self, staging: &Path, spec: &ResourceSpec) -> Result<(), ResourceFetchError> {
        for file in &spec.files {
            let dest = staging.join(&file.file_name);
            let label = format!("Fetching {}", file.url);
            let result = self
                .retry
                .run(
                    &label,
                    |_| {
                        let fetcher = Arc::clone(&self.fetcher);
                        let dest = dest.clone();
                        async move {
                            let actual = fetcher.fetch(&file.url, &dest).await?;
                            match &file.sha256 {
                                Some(expected) if !expected.eq_ignore_ascii_case(&actual) => {
                                    Err(FetchError::Checksum {
                                        expected: expected.to_lowercase(),
                                        actual,
                                    })
                                }
                                _ => Ok(()),
                            }
                        }
                    },
                    FetchError::is_retryable,
                )
                .await;

            match result {
                Ok(()) => {
                    debug!("Fetched {}", file.file_name);
                    if let Some(format) = file.unpack {
                        unpack(&dest, format, staging).await?;
                    }
                }
                Err((FetchError::Checksum { expected, actual }, _)) => {
                    return Err(ResourceFetchError::ChecksumMismatch {
                        file: file.file_name.clone(),
                        expected,
                        actual,
                    });
                }
                Err((e, attempts)) => {
                    return Err(ResourceFetchError::Network {
                        url: file.url.clone(),
                        attempts,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

async fn unpack(archive: &Path, format: ArchiveFormat, into: &Path) -> Result<(), ResourceFetchError> {
    let tool = resolve_system(&ResourceSpec::system(format.tool()))?;
    let spec = ProcessSpec::new(tool.as_os_str())
        .args(format.args(archive, into))
        .timeout(UNPACK_TIMEOUT);
    info!("Unpacking {:?}", archive);

    process_runner::run(&spec, |_, line| debug!("{}", line), &CancellationToken::new())
        .await
        .map_err(|e| ResourceFetchError::Unpack {
            file: archive.display().to_string(),
            message: e.to_string(),
        })?;
    std::fs::remove_file(archive).map_err(|e| ResourceFetchError::Io {
        path: archive.to_path_buf(),
        message: e.to_string(),
    })
}

fn resolve_system(spec: &ResourceSpec) -> Result<PathBuf, ResourceFetchError> {
    let entry = Path::new(&spec.entry);
    if entry.is_absolute() {
        return if entry.is_file() {
            Ok(entry.to_path_buf())
        } else {
            Err(ResourceFetchError::NotFound(spec.entry.clone()))
        };
    }
    which::which(&spec.entry).map_err(|_| ResourceFetchError::NotFound(spec.entry.clone()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
