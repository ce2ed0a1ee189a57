// Hive Daemon
//
// The long-running process (§4.K): opens the store, wires the orchestrator,
// starts the task worker, binds the loopback IPC listener, and keeps a
// heartbeat file fresh for the supervisor. Everything the daemon needs at
// runtime lives on `Runtime` — grounded on the teacher's `EngineState`/
// `lib.rs` boot sequence, but collected into one context struct per the
// "no ambient globals" design note rather than the teacher's handful of
// `OnceCell` statics.

pub mod ipc;

use crate::atoms::constants::{HEARTBEAT_INTERVAL_SECS, HEARTBEAT_STALE_SECS};
use crate::atoms::error::{HiveError, HiveResult};
use crate::integrations::IntegrationAuth;
use crate::memory::LongTermMemory;
use crate::orchestrator::Orchestrator;
use crate::platform::{ChannelStatus, PlatformAdapter, PlatformContext, RateLimiter};
use crate::provider::{AnyProvider, ProviderConfig, ProviderKind};
use crate::store::Store;
use crate::task_worker::TaskWorker;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

const FIRST_PORT: u16 = 2718;
const ADAPTER_RESTART_DELAY_SECS: u64 = 30;

/// Everything a running daemon needs, constructed once at boot and shared
/// by the heartbeat timer, the IPC server, the task worker, and every
/// platform adapter. No module in this crate reaches for a global instead.
pub struct Runtime {
    pub home: PathBuf,
    pub store: Arc<Store>,
    pub provider: RwLock<Arc<AnyProvider>>,
    pub orchestrator: RwLock<Option<Arc<Orchestrator>>>,
    pub integrations: Arc<IntegrationAuth>,
    pub rate_limiter: Arc<RateLimiter>,
    pub task_worker: Arc<TaskWorker>,
    pub adapter_status: RwLock<HashMap<String, ChannelStatus>>,
    pub long_term_memory: Option<Arc<dyn LongTermMemory>>,
    pub started_at: String,
    pub started_instant: std::time::Instant,
    shutting_down: AtomicBool,
    pub port: RwLock<u16>,
}

impl Runtime {
    /// Resolve the home directory: `HIVE_HOME` if set, else `~/.hive`.
    pub fn resolve_home() -> HiveResult<PathBuf> {
        if let Ok(override_home) = std::env::var("HIVE_HOME") {
            return Ok(PathBuf::from(override_home));
        }
        dirs::home_dir()
            .map(|home| home.join(".hive"))
            .ok_or_else(|| HiveError::Other("could not determine home directory".to_string()))
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join("hive.db")
    }
    pub fn pid_path(&self) -> PathBuf {
        self.home.join("daemon.pid")
    }
    pub fn port_path(&self) -> PathBuf {
        self.home.join("daemon.port")
    }
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("daemon.lock")
    }
    pub fn log_path(&self) -> PathBuf {
        self.home.join("daemon.log")
    }
    pub fn stop_sentinel_path(&self) -> PathBuf {
        self.home.join("daemon.stop")
    }
    pub fn heartbeat_path(&self) -> PathBuf {
        self.home.join("heartbeat")
    }
    pub fn prompts_dir(&self) -> PathBuf {
        self.home.join("prompts")
    }
    pub fn ctx_dir(&self) -> PathBuf {
        self.home.join("ctx")
    }
    pub fn exports_dir(&self) -> PathBuf {
        self.home.join("exports")
    }

    /// Read the heartbeat interval override — an env var takes precedence
    /// over the persisted `engine_config` row, which takes precedence over
    /// the compiled-in default — rejecting a combination that would make
    /// `HEARTBEAT_STALE_SECS` less than double the configured interval
    /// (§9 Open Question 3: config must never invert the relationship).
    fn heartbeat_interval_secs(
        stored: &crate::atoms::types::EngineConfig,
    ) -> HiveResult<u64> {
        let from_env = std::env::var("HIVE_HEARTBEAT_INTERVAL_SECS")
            .ok()
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| {
                    HiveError::InvalidInput(format!(
                        "HIVE_HEARTBEAT_INTERVAL_SECS is not a number: {raw}"
                    ))
                })
            })
            .transpose()?;
        let parsed = match from_env.or(stored.heartbeat_interval_secs) {
            Some(parsed) => parsed,
            None => return Ok(HEARTBEAT_INTERVAL_SECS),
        };
        validate_heartbeat_interval(parsed)
    }

    /// Merge the persisted `engine_config` Meta row with environment
    /// overrides (env wins field-by-field) and build a provider from the
    /// result. Called once at boot.
    fn provider_from_config(
        stored: &crate::atoms::types::EngineConfig,
    ) -> HiveResult<Arc<AnyProvider>> {
        let kind_raw = std::env::var("HIVE_PROVIDER")
            .ok()
            .or_else(|| stored.provider.clone())
            .unwrap_or_else(|| "openai".to_string());
        let kind = ProviderKind::from_str(&kind_raw)?;
        let api_key = std::env::var("HIVE_API_KEY")
            .ok()
            .or_else(|| stored.api_key.clone())
            .unwrap_or_default();
        let base_url = std::env::var("HIVE_BASE_URL")
            .ok()
            .or_else(|| stored.base_url.clone());
        let config = ProviderConfig {
            kind,
            api_key,
            base_url,
        };
        Ok(Arc::new(AnyProvider::from_config(&config)))
    }

    /// Boot sequence (§4.K steps 1-6): directories, store, primary agent,
    /// provider, pid file, heartbeat touch. Does not yet bind the IPC
    /// listener or start adapters/worker loops — `run` does that once the
    /// `Runtime` is wrapped in an `Arc`.
    pub async fn boot(home: PathBuf) -> HiveResult<Arc<Runtime>> {
        std::fs::create_dir_all(&home)
            .map_err(|e| HiveError::StoreIo(format!("create home dir {home:?}: {e}")))?;
        std::fs::create_dir_all(home.join("ctx"))?;
        std::fs::create_dir_all(home.join("prompts"))?;
        std::fs::create_dir_all(home.join("exports"))?;
        std::fs::create_dir_all(home.join("integrations"))?;

        let store = Arc::new(Store::open(home.join("hive.db"))?);
        store.check_integrity()?;

        let agent = match store.primary_agent() {
            Ok(agent) => agent,
            Err(err) => {
                warn!(target: "daemon", "could not load primary agent: {err}");
                None
            }
        };

        let engine_config = store.get_engine_config().unwrap_or_else(|err| {
            warn!(target: "daemon", "could not read engine_config, using defaults: {err}");
            crate::atoms::types::EngineConfig::default()
        });

        let provider = Self::provider_from_config(&engine_config).unwrap_or_else(|err| {
            warn!(target: "daemon", "provider config error, defaulting to openai: {err}");
            Arc::new(AnyProvider::from_config(&ProviderConfig {
                kind: ProviderKind::OpenAi,
                api_key: String::new(),
                base_url: None,
            }))
        });

        let orchestrator = agent.as_ref().map(|_| {
            Arc::new(Orchestrator::new(
                Arc::clone(&store),
                Arc::clone(&provider),
                None,
                None,
                home.join("prompts"),
            ))
        });

        let integrations = Arc::new(IntegrationAuth::open(&home));
        let rate_limiter = Arc::new(RateLimiter::new());

        let task_worker = TaskWorker::new(
            Arc::clone(&store),
            // Any orchestrator is fine for the worker; it is only used once
            // a task is actually claimed, by which point an agent must
            // exist or the run fails fast with a clear error.
            orchestrator.clone().unwrap_or_else(|| {
                Arc::new(Orchestrator::new(
                    Arc::clone(&store),
                    Arc::clone(&provider),
                    None,
                    None,
                    home.join("prompts"),
                ))
            }),
            Arc::clone(&provider),
            None,
        );
        match task_worker.recover_abandoned_tasks() {
            Ok(0) => {}
            Ok(n) => info!(target: "daemon", "requeued {n} abandoned task(s)"),
            Err(err) => warn!(target: "daemon", "failed to requeue abandoned tasks: {err}"),
        }

        write_pid_file(&home.join("daemon.pid"))?;
        touch_heartbeat(&home.join("heartbeat"))?;

        let runtime = Arc::new(Runtime {
            home,
            store,
            provider: RwLock::new(provider),
            orchestrator: RwLock::new(orchestrator),
            integrations,
            rate_limiter,
            task_worker,
            adapter_status: RwLock::new(HashMap::new()),
            long_term_memory: None,
            started_at: chrono::Utc::now().to_rfc3339(),
            started_instant: std::time::Instant::now(),
            shutting_down: AtomicBool::new(false),
            port: RwLock::new(0),
        });

        Ok(runtime)
    }

    /// Start every background loop (heartbeat timer, adapters, task
    /// worker) and the IPC listener, then block until a shutdown is
    /// requested. Returns the exit code the process should use.
    pub async fn run(self: Arc<Self>) -> i32 {
        let engine_config = self.store.get_engine_config().unwrap_or_default();
        let heartbeat_interval = match Self::heartbeat_interval_secs(&engine_config) {
            Ok(secs) => secs,
            Err(err) => {
                warn!(target: "daemon", "rejecting heartbeat interval override: {err}");
                HEARTBEAT_INTERVAL_SECS
            }
        };

        let heartbeat_handle = tokio::spawn(Arc::clone(&self).heartbeat_loop(heartbeat_interval));
        let worker_handle = tokio::spawn(Arc::clone(&self.task_worker).run());
        let prompts_handle = tokio::spawn(Arc::clone(&self).prompt_autoupdate_loop());
        self.spawn_adapters();

        let listener = match self.bind_ipc_listener().await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(target: "daemon", "failed to bind ipc listener: {err}");
                return 1;
            }
        };

        let exit_code = ipc::serve(Arc::clone(&self), listener).await;

        heartbeat_handle.abort();
        worker_handle.abort();
        prompts_handle.abort();
        self.shutdown();
        exit_code
    }

    /// Check once at boot, then every 24h thereafter (§4.L) — `maybe_run`
    /// itself no-ops unless a full interval has elapsed since the last
    /// stamped check, so a short poll period here just keeps the daemon
    /// responsive to a config reload without re-fetching early.
    async fn prompt_autoupdate_loop(self: Arc<Self>) {
        let client = crate::provider::http_client();
        let manifest_url = std::env::var("HIVE_PROMPTS_MANIFEST_URL").ok();
        let mut ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS.max(1) * 60));
        loop {
            crate::prompt_autoupdate::maybe_run(
                &self.store,
                &client,
                &self.prompts_dir(),
                manifest_url.as_deref(),
            )
            .await;
            ticker.tick().await;
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, interval_secs: u64) {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            if self.stop_sentinel_path().exists() {
                self.request_shutdown();
                return;
            }
            if let Err(err) = touch_heartbeat(&self.heartbeat_path()) {
                warn!(target: "daemon", "failed to touch heartbeat: {err}");
            }
        }
    }

    fn spawn_adapters(self: &Arc<Self>) {
        let adapter: Arc<dyn PlatformAdapter> = Arc::new(crate::platform::webchat::WebchatAdapter::new(
            self.platform_context(),
            self.home.join("webchat.port"),
        ));
        self.spawn_adapter(adapter);
    }

    fn spawn_adapter(self: &Arc<Self>, adapter: Arc<dyn PlatformAdapter>) {
        let platform = adapter.platform().to_string();
        self.adapter_status
            .write()
            .insert(platform.clone(), ChannelStatus::Starting);
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let result = Arc::clone(&adapter).start().await;
                match result {
                    Ok(()) => {
                        runtime
                            .adapter_status
                            .write()
                            .insert(platform.clone(), adapter.status());
                        return;
                    }
                    Err(err) => {
                        warn!(target: "daemon", "adapter {platform} crashed: {err}");
                        runtime
                            .adapter_status
                            .write()
                            .insert(platform.clone(), ChannelStatus::Error);
                        tokio::time::sleep(Duration::from_secs(ADAPTER_RESTART_DELAY_SECS)).await;
                    }
                }
            }
        });
    }

    async fn bind_ipc_listener(&self) -> HiveResult<TcpListener> {
        let mut port = FIRST_PORT;
        loop {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    *self.port.write() = port;
                    std::fs::write(self.port_path(), port.to_string())
                        .map_err(|e| HiveError::StoreIo(e.to_string()))?;
                    return Ok(listener);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                    port = port.checked_add(1).ok_or_else(|| {
                        HiveError::Other("exhausted loopback port range".to_string())
                    })?;
                }
                Err(err) => return Err(HiveError::Other(err.to_string())),
            }
        }
    }

    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        let _ = std::fs::remove_file(self.pid_path());
        info!(target: "daemon", "shutdown complete");
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_instant.elapsed().as_secs()
    }

    pub fn platform_context(&self) -> PlatformContext {
        PlatformContext {
            store: Arc::clone(&self.store),
            provider: self.provider.read().clone(),
            integrations: Arc::clone(&self.integrations),
            rate_limiter: Arc::clone(&self.rate_limiter),
            orchestrator: self.orchestrator.read().clone(),
            long_term_memory: self.long_term_memory.clone(),
        }
    }

    /// Drop and rebuild every adapter's status, forcing a restart on the
    /// next poll. Triggered by the `integrations_reload` IPC command.
    pub fn reload_integrations(self: &Arc<Self>) {
        self.adapter_status.write().clear();
        self.spawn_adapters();
    }
}

fn write_pid_file(path: &std::path::Path) -> HiveResult<()> {
    std::fs::write(path, std::process::id().to_string())
        .map_err(|e| HiveError::StoreIo(format!("write pid file: {e}")))
}

/// Reject a heartbeat interval that would leave less than a 2x margin
/// against `HEARTBEAT_STALE_SECS` (§9 Open Question 3).
fn validate_heartbeat_interval(parsed: u64) -> HiveResult<u64> {
    const MIN_SECS: u64 = 1; // the spec's 250ms floor rounds up at whole-second granularity
    if parsed < MIN_SECS {
        return Err(HiveError::InvalidInput(
            "HIVE_HEARTBEAT_INTERVAL_SECS must be at least 250ms".to_string(),
        ));
    }
    if parsed * 2 > HEARTBEAT_STALE_SECS {
        return Err(HiveError::InvalidInput(format!(
            "HIVE_HEARTBEAT_INTERVAL_SECS={parsed} would leave less than a 2x margin \
             against the {HEARTBEAT_STALE_SECS}s staleness threshold"
        )));
    }
    Ok(parsed)
}

fn touch_heartbeat(path: &std::path::Path) -> HiveResult<()> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    std::fs::write(path, millis.to_string())
        .map_err(|e| HiveError::StoreIo(format!("touch heartbeat: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_interval_override_within_margin_is_accepted() {
        assert_eq!(validate_heartbeat_interval(20).unwrap(), 20);
    }

    #[test]
    fn heartbeat_interval_override_that_would_invert_margin_is_rejected() {
        assert!(validate_heartbeat_interval(50).is_err());
    }

    #[test]
    fn touch_heartbeat_writes_epoch_millis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat");
        touch_heartbeat(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.parse::<u128>().is_ok());
    }

    #[tokio::test]
    async fn boot_creates_home_layout_and_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("hive-home");
        let runtime = Runtime::boot(home.clone()).await.unwrap();
        assert!(home.join("hive.db").exists());
        assert!(home.join("ctx").exists());
        assert!(home.join("prompts").exists());
        assert!(runtime.pid_path().exists());
        assert!(runtime.heartbeat_path().exists());
    }
}
