//! Connectivity monitoring.
//!
//! [`NetworkMonitor`] is the single source of truth for "are we online". It
//! combines a periodic [`ConnectivityProbe`] with reports pushed by the
//! platform layer and emits edge-triggered transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::util::{is_http_url, normalize_text_option};

/// Lower bound for the polling period; `tokio::time::interval` rejects zero.
const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Something that can tell whether the backend is reachable
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// `HEAD` request against a health URL; any HTTP response counts as online.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = normalize_text_option(Some(url.into()))
            .filter(|url| is_http_url(url))
            .ok_or_else(|| {
                crate::Error::Config("health URL must include http:// or https://".into())
            })?;
        Ok(Self {
            url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Connectivity probe failed: {error}");
                false
            }
        }
    }
}

/// Probe with a manually controlled answer (tests, `--offline`)
#[derive(Debug, Default)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn check(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

type TransitionCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Poller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
    online: watch::Sender<bool>,
    callbacks: Mutex<Vec<TransitionCallback>>,
    /// Serializes transitions so callbacks never overlap
    transition: tokio::sync::Mutex<()>,
    poller: Mutex<Option<Poller>>,
}

/// Cloneable connectivity monitor
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .field("interval", &self.inner.interval)
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    /// Create a monitor that starts in the `initial` state.
    pub fn new(probe: Arc<dyn ConnectivityProbe>, interval: Duration, initial: bool) -> Self {
        let (online, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                probe,
                interval: interval.max(MIN_PROBE_INTERVAL),
                online,
                callbacks: Mutex::new(Vec::new()),
                transition: tokio::sync::Mutex::new(()),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Monitor backed by a [`StaticProbe`]
    pub fn fixed(online: bool) -> (Self, Arc<StaticProbe>) {
        let probe = Arc::new(StaticProbe::new(online));
        let monitor = Self::new(probe.clone(), Duration::from_secs(1), online);
        (monitor, probe)
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Receiver that observes every transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    /// Register a callback invoked once per transition with the new state.
    ///
    /// Callbacks run sequentially on the reporting task and must not block.
    pub fn on_transition(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Apply an observation; returns `true` when it changed the state.
    pub async fn report(&self, online: bool) -> bool {
        let _transition = self.inner.transition.lock().await;
        let changed = self.inner.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return false;
        }

        tracing::info!(
            "Network went {}",
            if online { "online" } else { "offline" }
        );
        let callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(online);
        }
        true
    }

    /// Probe once and report the result
    pub async fn check_now(&self) -> bool {
        let online = self.inner.probe.check().await;
        self.report(online).await;
        online
    }

    /// Start polling the probe. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut poller = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let monitor = self.clone();
        let interval = self.inner.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        monitor.check_now().await;
                    }
                }
            }
            tracing::debug!("Network monitor stopped");
        });

        *poller = Some(Poller { shutdown, handle });
    }

    /// Stop polling and wait for the poller to exit.
    pub async fn stop(&self) {
        let poller = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.shutdown.send_replace(true);
            if let Err(error) = poller.handle.await {
                tracing::warn!("Network monitor task failed: {error}");
            }
        }
    }
}
