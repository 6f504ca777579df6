//! Lazily loaded, process-wide configuration map.
//!
//! Sources are tried in order and the first one that yields wins:
//! the in-process map (inline entries overridden by allow-listed process
//! bindings), then `env.json`, then `env`, then `.env`. Whatever wins is cached
//! until [`EnvResolver::invalidate`] is called.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const WEBHOOK_URL_KEY: &str = "WEBHOOK_URL";
/// Keys picked up from the process scope when set and non-empty.
pub const GLOBAL_BINDING_KEYS: &[&str] = &[WEBHOOK_URL_KEY, "OPENAI_API_KEY", "OPEN_AI_KEY"];
/// Keys `env.get` is allowed to reveal.
pub const EXPOSED_KEYS: &[&str] = &[WEBHOOK_URL_KEY];

const ENV_JSON_DOCUMENT: &str = "env.json";
const ENV_LINES_DOCUMENT: &str = "env";
const DOT_ENV_DOCUMENT: &str = ".env";
/// Per-document limit for [`HttpFetcher`].
pub const ENV_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub type ConfigurationMap = BTreeMap<String, String>;

type GlobalLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("env_document_not_found:{0}")]
    NotFound(String),
    #[error("env_document_read_failed:{name}:{message}")]
    Read { name: String, message: String },
    #[error("env_document_status:{name}:{status}")]
    Status { name: String, status: u16 },
}

/// Where env documents come from.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String, FetchError>;
}

/// Reads env documents from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentFetcher for DirectoryFetcher {
    async fn fetch(&self, name: &str) -> Result<String, FetchError> {
        let path = self.root.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(name.to_string()))
            }
            Err(error) => Err(FetchError::Read {
                name: name.to_string(),
                message: error.to_string(),
            }),
        }
    }
}

/// Fetches env documents with `GET <base>/<name>`; any non-2xx is a miss.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout: ENV_FETCH_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, name: &str) -> Result<String, FetchError> {
        let url = format!("{}/{name}", self.base_url);
        let response = self
            .http
            .get(url)
            .header("cache-control", "no-store")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| FetchError::Read {
                name: name.to_string(),
                message: error.to_string(),
            })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                name: name.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|error| FetchError::Read {
            name: name.to_string(),
            message: error.to_string(),
        })
    }
}

/// Which source produced the cached map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    InProcess,
    EnvJson,
    EnvLines,
    DotEnv,
    Empty,
}

impl EnvSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProcess => "in_process",
            Self::EnvJson => ENV_JSON_DOCUMENT,
            Self::EnvLines => ENV_LINES_DOCUMENT,
            Self::DotEnv => DOT_ENV_DOCUMENT,
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone)]
struct LoadedEnv {
    map: Arc<ConfigurationMap>,
    source: EnvSource,
}

#[derive(Debug, Default)]
struct CacheSlot {
    loaded: Option<LoadedEnv>,
    /// Bumped by every invalidation; a load started under an older
    /// generation is returned to its caller but not cached.
    generation: u64,
}

pub struct EnvResolver {
    inline: ConfigurationMap,
    globals: GlobalLookup,
    fetcher: Arc<dyn DocumentFetcher>,
    cache: RwLock<CacheSlot>,
    // Serialises loads only; readers of a cached map never wait on it.
    load_gate: Mutex<()>,
}

impl EnvResolver {
    /// Resolver reading global bindings from the process environment.
    pub fn new(inline: ConfigurationMap, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self::with_global_lookup(inline, fetcher, |key| env::var(key).ok())
    }

    pub fn with_global_lookup<F>(
        inline: ConfigurationMap,
        fetcher: Arc<dyn DocumentFetcher>,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            inline,
            globals: Arc::new(lookup),
            fetcher,
            cache: RwLock::new(CacheSlot::default()),
            load_gate: Mutex::new(()),
        }
    }

    /// Looks a key up, loading the map on first use. Never fails.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.snapshot().await.get(key).cloned()
    }

    pub async fn snapshot(&self) -> Arc<ConfigurationMap> {
        if let Some(map) = self.cached_map() {
            return map;
        }
        let _gate = self.load_gate.lock().await;
        if let Some(map) = self.cached_map() {
            return map;
        }
        let generation = self.read_cache().generation;
        let loaded = self.load().await;
        info!(
            source = loaded.source.as_str(),
            keys = loaded.map.len(),
            "configuration map loaded"
        );
        let map = Arc::clone(&loaded.map);
        let mut cache = self.write_cache();
        if cache.generation == generation {
            cache.loaded = Some(loaded);
        } else {
            debug!("configuration invalidated while loading; result not cached");
        }
        map
    }

    /// Drops the cached map; the next lookup reloads every source.
    pub fn invalidate(&self) {
        let mut cache = self.write_cache();
        cache.generation = cache.generation.wrapping_add(1);
        if cache.loaded.take().is_some() {
            debug!("configuration cache invalidated");
        }
    }

    /// Source of the cached map, if one has been loaded. Never waits on a load.
    pub fn loaded_source(&self) -> Option<EnvSource> {
        self.read_cache().loaded.as_ref().map(|loaded| loaded.source)
    }

    fn cached_map(&self) -> Option<Arc<ConfigurationMap>> {
        self.read_cache()
            .loaded
            .as_ref()
            .map(|loaded| Arc::clone(&loaded.map))
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, CacheSlot> {
        self.cache.read().unwrap_or_else(|poisoned| {
            warn!("configuration cache lock poisoned");
            poisoned.into_inner()
        })
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, CacheSlot> {
        self.cache.write().unwrap_or_else(|poisoned| {
            warn!("configuration cache lock poisoned");
            poisoned.into_inner()
        })
    }

    /// Allow-listed subset of the map, as returned by `env.get`.
    pub async fn exposed(&self) -> Map<String, Value> {
        let map = self.snapshot().await;
        EXPOSED_KEYS
            .iter()
            .filter_map(|key| {
                map.get(*key)
                    .map(|value| ((*key).to_string(), Value::String(value.clone())))
            })
            .collect()
    }

    async fn load(&self) -> LoadedEnv {
        let mut in_process = self.inline.clone();
        for key in GLOBAL_BINDING_KEYS {
            if let Some(value) = (self.globals)(key).filter(|value| !value.is_empty()) {
                debug!(key, "global binding present");
                in_process.insert((*key).to_string(), value);
            }
        }
        if !in_process.is_empty() {
            return loaded(in_process, EnvSource::InProcess);
        }

        match self.fetcher.fetch(ENV_JSON_DOCUMENT).await {
            Ok(text) => match parse_json_document(&text) {
                Some(map) => return loaded(map, EnvSource::EnvJson),
                None => debug!("env.json is not a JSON object"),
            },
            Err(error) => debug!(error = %error, "env.json unavailable"),
        }

        match self.fetcher.fetch(ENV_LINES_DOCUMENT).await {
            Ok(text) => return loaded(parse_lines(&text), EnvSource::EnvLines),
            Err(error) => debug!(error = %error, "env unavailable"),
        }

        match self.fetcher.fetch(DOT_ENV_DOCUMENT).await {
            Ok(text) => loaded(parse_lines(&text), EnvSource::DotEnv),
            Err(error) => {
                debug!(error = %error, ".env unavailable");
                loaded(ConfigurationMap::new(), EnvSource::Empty)
            }
        }
    }
}

fn loaded(map: ConfigurationMap, source: EnvSource) -> LoadedEnv {
    LoadedEnv {
        map: Arc::new(map),
        source,
    }
}

/// `None` when the document is not a JSON object.
fn parse_json_document(text: &str) -> Option<ConfigurationMap> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) else {
        return None;
    };
    let map = object
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            Value::Number(number) => Some((key, number.to_string())),
            Value::Bool(flag) => Some((key, flag.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        })
        .collect();
    Some(map)
}

/// Parses `KEY=VALUE` lines. Later duplicates win.
pub fn parse_lines(text: &str) -> ConfigurationMap {
    let mut map = ConfigurationMap::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), value.trim().to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct FakeFetcher {
        documents: std::sync::Mutex<HashMap<String, String>>,
        fetches: AtomicUsize,
    }

    impl FakeFetcher {
        fn with(documents: &[(&str, &str)]) -> Arc<Self> {
            let fetcher = Self::default();
            for (name, text) in documents {
                fetcher.put(name, text);
            }
            Arc::new(fetcher)
        }

        fn put(&self, name: &str, text: &str) {
            if let Ok(mut documents) = self.documents.lock() {
                documents.insert(name.to_string(), text.to_string());
            }
        }
    }

    #[async_trait]
    impl DocumentFetcher for FakeFetcher {
        async fn fetch(&self, name: &str) -> Result<String, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.documents
                .lock()
                .ok()
                .and_then(|documents| documents.get(name).cloned())
                .ok_or_else(|| FetchError::NotFound(name.to_string()))
        }
    }

    fn resolver(inline: &[(&str, &str)], fetcher: Arc<FakeFetcher>) -> EnvResolver {
        let inline = inline
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        EnvResolver::with_global_lookup(inline, fetcher, |_| None)
    }

    #[test]
    fn line_format_skips_noise_and_splits_at_first_equals() {
        let map = parse_lines(
            "# comment\n\n  WEBHOOK_URL = https://hooks.test/x?a=b  \nnot a pair\n=orphan\nA=1\nA=2\r\n",
        );
        assert_eq!(
            map.get("WEBHOOK_URL").map(String::as_str),
            Some("https://hooks.test/x?a=b")
        );
        assert_eq!(map.get("A").map(String::as_str), Some("2"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn json_document_keeps_scalars_only() {
        let map = parse_json_document(
            r#"{"WEBHOOK_URL":"https://hooks.test","RETRIES":3,"DEBUG":true,"NOTHING":null,"LIST":[1]}"#,
        )
        .expect("object");
        assert_eq!(map.get("RETRIES").map(String::as_str), Some("3"));
        assert_eq!(map.get("DEBUG").map(String::as_str), Some("true"));
        assert!(!map.contains_key("NOTHING"));
        assert!(!map.contains_key("LIST"));
        assert!(parse_json_document("[1,2]").is_none());
        assert!(parse_json_document("not json").is_none());
    }

    #[tokio::test]
    async fn in_process_map_wins_and_globals_override_inline_entries() {
        let fetcher = FakeFetcher::with(&[(".env", "WEBHOOK_URL=https://dotenv.test")]);
        let resolver = EnvResolver::with_global_lookup(
            ConfigurationMap::from([
                ("WEBHOOK_URL".to_string(), "https://inline.test".to_string()),
                ("EXTRA".to_string(), "kept".to_string()),
            ]),
            fetcher.clone(),
            |key| (key == "WEBHOOK_URL").then(|| "https://global.test".to_string()),
        );

        assert_eq!(
            resolver.get(WEBHOOK_URL_KEY).await.as_deref(),
            Some("https://global.test")
        );
        assert_eq!(resolver.get("EXTRA").await.as_deref(), Some("kept"));
        assert_eq!(resolver.loaded_source(), Some(EnvSource::InProcess));
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn documents_are_tried_in_order() {
        let fetcher = FakeFetcher::with(&[
            ("env.json", "[\"not an object\"]"),
            ("env", "WEBHOOK_URL=https://env.test"),
            (".env", "WEBHOOK_URL=https://dotenv.test"),
        ]);
        let resolver = resolver(&[], fetcher);
        assert_eq!(
            resolver.get(WEBHOOK_URL_KEY).await.as_deref(),
            Some("https://env.test")
        );
        assert_eq!(resolver.loaded_source(), Some(EnvSource::EnvLines));
    }

    #[tokio::test]
    async fn env_document_wins_even_when_empty() {
        let fetcher = FakeFetcher::with(&[
            ("env", "# nothing here\n"),
            (".env", "WEBHOOK_URL=https://dotenv.test"),
        ]);
        let resolver = resolver(&[], fetcher);
        assert_eq!(resolver.get(WEBHOOK_URL_KEY).await, None);
        assert_eq!(resolver.loaded_source(), Some(EnvSource::EnvLines));
    }

    #[tokio::test]
    async fn empty_map_is_cached_until_invalidated() {
        let fetcher = FakeFetcher::with(&[]);
        let resolver = resolver(&[], fetcher.clone());

        assert_eq!(resolver.get(WEBHOOK_URL_KEY).await, None);
        assert_eq!(resolver.loaded_source(), Some(EnvSource::Empty));
        let fetches_after_first_load = fetcher.fetches.load(Ordering::SeqCst);

        fetcher.put(".env", "WEBHOOK_URL=https://late.test");
        assert_eq!(resolver.get(WEBHOOK_URL_KEY).await, None);
        assert_eq!(
            fetcher.fetches.load(Ordering::SeqCst),
            fetches_after_first_load
        );

        resolver.invalidate();
        assert_eq!(
            resolver.get(WEBHOOK_URL_KEY).await.as_deref(),
            Some("https://late.test")
        );
    }

    /// Holds every `env` fetch until the gate is opened.
    struct GatedFetcher {
        gate: tokio::sync::Semaphore,
        fetches: AtomicUsize,
    }

    impl GatedFetcher {
        fn closed() -> Arc<Self> {
            Arc::new(Self {
                gate: tokio::sync::Semaphore::new(0),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DocumentFetcher for GatedFetcher {
        async fn fetch(&self, name: &str) -> Result<String, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if name == ENV_LINES_DOCUMENT {
                let _open = self.gate.acquire().await.expect("gate");
                return Ok("WEBHOOK_URL=https://slow.test".to_string());
            }
            Err(FetchError::NotFound(name.to_string()))
        }
    }

    #[tokio::test]
    async fn pending_load_does_not_block_source_queries_or_invalidation() {
        let fetcher = GatedFetcher::closed();
        let resolver = Arc::new(EnvResolver::with_global_lookup(
            ConfigurationMap::new(),
            fetcher.clone(),
            |_| None,
        ));

        let first = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move { resolver.get(WEBHOOK_URL_KEY).await }
        });
        let second = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move { resolver.get(WEBHOOK_URL_KEY).await }
        });
        while fetcher.fetches.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(resolver.loaded_source(), None);
        resolver.invalidate();
        fetcher.gate.add_permits(1);

        let first = first.await.expect("first lookup");
        let second = second.await.expect("second lookup");
        assert_eq!(first.as_deref(), Some("https://slow.test"));
        assert_eq!(second.as_deref(), Some("https://slow.test"));
        // The first load finished after the invalidation, so its result was
        // not cached and the second lookup loaded again.
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 4);
        assert_eq!(resolver.loaded_source(), Some(EnvSource::EnvLines));
    }

    #[tokio::test]
    async fn http_fetcher_gives_up_on_a_silent_host() {
        use axum::{Router, routing::get};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let router = Router::new().route(
            "/env",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "WEBHOOK_URL=https://never.test"
            }),
        );
        let server = tokio::spawn(async move { axum::serve(listener, router).await });

        let fetcher =
            HttpFetcher::new(&format!("http://{addr}/")).with_timeout(Duration::from_millis(150));
        let result = tokio::time::timeout(Duration::from_secs(3), fetcher.fetch("env"))
            .await
            .expect("fetch must time out on its own");
        assert!(matches!(result, Err(FetchError::Read { .. })), "{result:?}");
        server.abort();
    }

    #[tokio::test]
    async fn exposed_view_only_reveals_allow_listed_keys() {
        let fetcher = FakeFetcher::with(&[]);
        let resolver = resolver(
            &[
                ("WEBHOOK_URL", "https://hooks.test"),
                ("OPENAI_API_KEY", "sk-secret"),
            ],
            fetcher,
        );
        let exposed = resolver.exposed().await;
        assert_eq!(exposed.len(), 1);
        assert_eq!(
            exposed.get("WEBHOOK_URL"),
            Some(&Value::String("https://hooks.test".to_string()))
        );
    }

    #[tokio::test]
    async fn directory_fetcher_reads_files_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("env.json"), r#"{"WEBHOOK_URL":"https://json.test"}"#)
            .expect("write env.json");

        let resolver = EnvResolver::with_global_lookup(
            ConfigurationMap::new(),
            Arc::new(DirectoryFetcher::new(dir.path())),
            |_| None,
        );
        assert_eq!(
            resolver.get(WEBHOOK_URL_KEY).await.as_deref(),
            Some("https://json.test")
        );
        assert_eq!(resolver.loaded_source(), Some(EnvSource::EnvJson));

        let missing = DirectoryFetcher::new(dir.path()).fetch(".env").await;
        assert!(matches!(missing, Err(FetchError::NotFound(_))));
    }
}
