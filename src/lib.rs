//! Reverse proxy core: a single process-wide `ProxyCore` composing the
//! channel catalog, scheduler, session store, history ring and their
//! background sweepers behind an explicit `Start`/`Stop` lifecycle rather
//! than an ambient global singleton.

pub mod admin;
pub mod channels;
pub mod config;
pub mod convert;
pub mod error;
pub mod history;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod scheduler;
pub mod session;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use channels::ChannelManager;
use config::Settings;
use history::HistoryManager;
use metrics::MetricsManager;
use scheduler::Scheduler;
use session::SessionManager;

pub struct ProxyCore {
    pub channels: Arc<ChannelManager>,
    pub metrics: Arc<MetricsManager>,
    pub history: Arc<HistoryManager>,
    pub sessions: Arc<SessionManager>,
    pub scheduler: Arc<Scheduler>,
    pub settings: RwLock<Settings>,
    pub config_path: PathBuf,
    started_at: SystemTime,
    shutdown: Notify,
    restart: Notify,
    stopping: AtomicBool,
}

impl ProxyCore {
    pub fn new(settings: Settings, config_path: PathBuf) -> Arc<Self> {
        let channels = ChannelManager::new(settings.channels.clone());
        let metrics = MetricsManager::new(settings.metrics_window_size, settings.failure_threshold);
        let history = HistoryManager::new(settings.history_capacity, settings.history_retention_hours);
        let sessions = SessionManager::new(settings.session_max_messages, settings.session_max_age_hours);
        let scheduler = Arc::new(Scheduler::new(channels.clone(), metrics.clone()));

        Arc::new(Self {
            channels,
            metrics,
            history: Arc::new(history),
            sessions: Arc::new(sessions),
            scheduler,
            settings: RwLock::new(settings),
            config_path,
            started_at: SystemTime::now(),
            shutdown: Notify::new(),
            restart: Notify::new(),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn access_key(&self) -> Option<String> {
        self.settings.read().unwrap().access_key.clone()
    }

    pub fn port(&self) -> u16 {
        self.settings.read().unwrap().port
    }

    pub fn channel_count(&self) -> usize {
        self.channels.count()
    }

    pub fn uptime_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.started_at)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Reloads the channel catalog from whatever is currently on disk at
    /// `config_path`, also updating the in-memory `settings` snapshot so
    /// `access_key`/`port` observe the edit. Used after an admin CRUD
    /// mutation persists a change.
    pub fn reload_from_disk(&self) -> Result<(), String> {
        let mut loaded = config::load(&self.config_path)?;
        config::validate(&mut loaded);
        self.channels.load_channels(loaded.channels.clone());
        *self.settings.write().unwrap() = loaded;
        Ok(())
    }

    pub fn persist(&self) -> Result<(), String> {
        let settings = self.settings.read().unwrap().clone();
        config::save(&self.config_path, &settings)
    }

    /// Starts the per-manager sweepers named in the concurrency model:
    /// failed-key cleanup every minute, metrics window aging and session
    /// expiry every 5 minutes, history index rebuild every 10 minutes.
    /// Each task exits as soon as shutdown is signalled.
    pub fn spawn_sweepers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(self.spawn_sweep(Duration::from_secs(60), |core| core.channels.sweep_failed_keys()));
        handles.push(self.spawn_sweep(Duration::from_secs(5 * 60), |core| core.metrics.sweep_aged_samples()));
        handles.push(self.spawn_sweep(Duration::from_secs(5 * 60), |core| core.sessions.sweep_expired()));
        handles.push(self.spawn_sweep(Duration::from_secs(10 * 60), |core| core.history.rebuild_index()));

        handles
    }

    fn spawn_sweep(
        self: &Arc<Self>,
        interval: Duration,
        sweep: impl Fn(&Arc<Self>) + Send + 'static,
    ) -> JoinHandle<()> {
        let core = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&core),
                    _ = core.shutdown.notified() => break,
                }
            }
        })
    }

    /// Signals every sweeper task and the HTTP listener loop to exit.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.restart.notify_waiters();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub async fn wait_shutdown(&self) {
        self.shutdown.notified().await;
    }

    /// Wakes the HTTP listener loop so it rebinds on the now-current
    /// port. Called only after the new port has already been proven
    /// bindable, so the old listener keeps serving until the new one
    /// is ready to take over.
    pub fn signal_restart(&self) {
        self.restart.notify_waiters();
    }

    pub async fn wait_restart(&self) {
        self.restart.notified().await;
    }
}
