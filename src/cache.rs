//! Decoded buffer cache
//!
//! [`BufferCache`] fetches, decodes and memoizes audio per URL. Concurrent
//! requests for the same URL share one in-flight load, so a file is decoded at
//! most once no matter how many tracks ask for it at the same time. Failed loads
//! are forgotten, so asking again retries.
//!
//! Loading must happen inside a tokio runtime: decoding runs on the blocking
//! pool to keep the async workers free.

use std::collections::HashMap as StdHashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use hashbrown::HashMap;
use tracing::{debug, info, trace, warn};

use crate::buffer::AudioBuffer;
use crate::error::{LoadError, LoadResult};

/// Where raw asset bytes come from.
pub trait AssetSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = LoadResult<Vec<u8>>> + Send;
}

/// Serves assets from a directory.
///
/// Relative URLs resolve against the root; `file://` URLs are taken as absolute
/// paths.
#[derive(Clone, Debug)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, url: &str) -> PathBuf {
        match url.strip_prefix("file://") {
            Some(path) => PathBuf::from(path),
            None => self.root.join(url.trim_start_matches('/')),
        }
    }
}

impl AssetSource for FsAssetSource {
    async fn fetch(&self, url: &str) -> LoadResult<Vec<u8>> {
        let path = self.resolve(url);
        trace!(url, path = %path.display(), "reading asset");
        tokio::fs::read(&path).await.map_err(|e| LoadError::Fetch {
            url: url.to_owned(),
            reason: e.to_string(),
        })
    }
}

/// Assets held in memory, keyed by URL. Handy for presets and tests.
#[derive(Debug, Default)]
pub struct MemoryAssetSource {
    assets: Mutex<StdHashMap<String, Arc<[u8]>>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(self, url: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(url, bytes);
        self
    }

    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), bytes.into());
    }

    pub fn remove(&self, url: &str) -> bool {
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url)
            .is_some()
    }
}

impl AssetSource for MemoryAssetSource {
    async fn fetch(&self, url: &str) -> LoadResult<Vec<u8>> {
        let bytes = self
            .assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();
        bytes.map(|b| b.to_vec()).ok_or_else(|| LoadError::Fetch {
            url: url.to_owned(),
            reason: "no such asset".into(),
        })
    }
}

/// Fetches assets over HTTP. Relative URLs are joined onto `base`.
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpAssetSource {
    client: reqwest::Client,
    base: String,
}

#[cfg(feature = "http")]
impl HttpAssetSource {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into(),
        }
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_owned()
        } else {
            format!("{}/{}", self.base.trim_end_matches('/'), url.trim_start_matches('/'))
        }
    }
}

#[cfg(feature = "http")]
impl AssetSource for HttpAssetSource {
    async fn fetch(&self, url: &str) -> LoadResult<Vec<u8>> {
        let fail = |e: reqwest::Error| LoadError::Fetch {
            url: url.to_owned(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(self.absolute(url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fail)?;
        let bytes = response.bytes().await.map_err(fail)?;
        Ok(bytes.to_vec())
    }
}

/// Counters for observing cache behaviour
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches started
    pub fetches: u64,
    /// Decodes started
    pub decodes: u64,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    decodes: AtomicU64,
}

type SharedLoad = Shared<BoxFuture<'static, LoadResult<Arc<AudioBuffer>>>>;

/// Fetch-and-decode cache keyed by URL.
pub struct BufferCache<S> {
    source: Arc<S>,
    entries: Mutex<HashMap<String, SharedLoad>>,
    counters: Arc<Counters>,
}

impl<S: AssetSource> BufferCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            entries: Mutex::new(HashMap::new()),
            counters: Arc::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, SharedLoad>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load `url`, reusing a finished or in-flight load when there is one.
    pub async fn load_buffer(&self, url: &str) -> LoadResult<Arc<AudioBuffer>> {
        let load = {
            let mut entries = self.entries();
            match entries.get(url) {
                Some(load) => {
                    trace!(url, "cache hit");
                    load.clone()
                }
                None => {
                    let load = self.start(url);
                    entries.insert(url.to_owned(), load.clone());
                    load
                }
            }
        };

        let result = load.clone().await;
        if let Err(e) = &result {
            // Only drop our own load; a retry may already have replaced it
            let mut entries = self.entries();
            if entries.get(url).is_some_and(|current| current.ptr_eq(&load)) {
                entries.remove(url);
                warn!(url, error = %e, "load failed");
            }
        }
        result
    }

    fn start(&self, url: &str) -> SharedLoad {
        let source = self.source.clone();
        let counters = self.counters.clone();
        let url = url.to_owned();

        async move {
            counters.fetches.fetch_add(1, Ordering::Relaxed);
            let bytes = source.fetch(&url).await?;
            debug!(url, bytes = bytes.len(), "fetched");

            counters.decodes.fetch_add(1, Ordering::Relaxed);
            let decode_url = url.clone();
            let buffer = tokio::task::spawn_blocking(move || AudioBuffer::decode(&decode_url, bytes))
                .await
                .map_err(|e| LoadError::Decode {
                    url: url.clone(),
                    reason: e.to_string(),
                })??;

            info!(url, secs = buffer.duration_secs(), "buffer loaded");
            Ok(Arc::new(buffer))
        }
        .boxed()
        .shared()
    }

    /// Whether `url` has finished loading successfully
    pub fn is_cached(&self, url: &str) -> bool {
        self.entries()
            .get(url)
            .is_some_and(|load| matches!(load.peek(), Some(Ok(_))))
    }

    /// Whether a load for `url` is cached or in flight
    pub fn contains(&self, url: &str) -> bool {
        self.entries().contains_key(url)
    }

    /// Evict one URL. Buffers already handed out stay alive.
    pub fn clear_buffer(&self, url: &str) -> bool {
        let removed = self.entries().remove(url).is_some();
        if removed {
            debug!(url, "evicted");
        }
        removed
    }

    pub fn clear_all_buffers(&self) {
        let mut entries = self.entries();
        debug!(count = entries.len(), "evicting all buffers");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            decodes: self.counters.decodes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_resolve_under_root() {
        let fs = FsAssetSource::new("/srv/audio");
        assert_eq!(fs.resolve("stems/bass.wav"), PathBuf::from("/srv/audio/stems/bass.wav"));
        assert_eq!(fs.resolve("/stems/bass.wav"), PathBuf::from("/srv/audio/stems/bass.wav"));
        assert_eq!(fs.resolve("file:///tmp/x.wav"), PathBuf::from("/tmp/x.wav"));
    }
}
