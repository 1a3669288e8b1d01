//! The shared market data cache.
//!
//! One [`MarketDataCache`] owns one feed connection. Clone the handle and
//! give a copy to every strategy; they all read the same books.

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::ingest::Ingest;
use crate::reporter::PeriodicReporter;
use mdcache_book::{
    BookView, CacheStatistics, CandleSeries, InstrumentInfo, OrderBookStore, RecentEvent,
    StoreReader, TopOfBook,
};
use mdcache_core::{ConnectionState, Instrument, Price};
use mdcache_transport::{
    ConnectionError, Connector, FeedTransport, SharedConnectionState, TcpConnector,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of [`MarketDataCache::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartState {
    /// A new feed connection was started.
    Started,
    /// The feed was already running; nothing changed.
    AlreadyRunning,
}

struct Running {
    shutdown: CancellationToken,
    finished: CancellationToken,
    ingest: JoinHandle<Result<(), ConnectionError>>,
    reporter: Option<JoinHandle<()>>,
    state: Arc<SharedConnectionState>,
}

impl Running {
    /// The guard in the ingest task fires before its handle reports finished,
    /// so both are checked.
    fn is_alive(&self) -> bool {
        !self.finished.is_cancelled() && !self.ingest.is_finished()
    }

    /// Reaps a feed that ended on its own, logging why it ended.
    fn reap(self, runtime: &Handle) {
        self.shutdown.cancel();
        runtime.spawn(async move {
            if let Some(reporter) = self.reporter {
                if let Err(e) = reporter.await {
                    tracing::warn!("reporter task failed: {}", e);
                }
            }
            match self.ingest.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("restarting market data feed after: {}", e),
                Err(e) => tracing::warn!("restarting market data feed after task failure: {}", e),
            }
        });
    }
}

struct Inner {
    config: CacheConfig,
    connector: Arc<dyn Connector>,
    writer: Arc<Mutex<OrderBookStore>>,
    reader: StoreReader,
    running: Mutex<Option<Running>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().as_ref() {
            running.shutdown.cancel();
        }
    }
}

/// Shared, process-wide view of the exchange feed.
#[derive(Clone)]
pub struct MarketDataCache {
    inner: Arc<Inner>,
}

impl MarketDataCache {
    /// Creates a cache that connects over TCP to the configured endpoint.
    ///
    /// # Errors
    /// Returns [`CacheError::Configuration`] if the configuration is invalid.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let connector =
            TcpConnector::new(config.endpoint()).tcp_nodelay(config.tcp_nodelay_enabled());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Creates a cache that opens feed streams through `connector`.
    ///
    /// # Errors
    /// Returns [`CacheError::Configuration`] if the configuration is invalid.
    pub fn with_connector(
        config: CacheConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        let store = OrderBookStore::new(config.store_config());
        let reader = store.reader();
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                connector,
                writer: Arc::new(Mutex::new(store)),
                reader,
                running: Mutex::new(None),
            }),
        })
    }

    /// Starts the feed on the current tokio runtime.
    ///
    /// Idempotent: while the feed is alive, further calls return
    /// [`StartState::AlreadyRunning`] and open nothing. Every clone of the
    /// handle shares the one connection. A feed that ended on its own, for
    /// example after exhausting its reconnect attempts, is replaced by a new
    /// one; its error is logged rather than returned.
    ///
    /// # Errors
    /// Returns [`CacheError::NoRuntime`] when called outside a tokio runtime.
    pub fn start(&self) -> Result<StartState, CacheError> {
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;

        let mut running = self.inner.running.lock();
        match running.take() {
            Some(current) if current.is_alive() => {
                *running = Some(current);
                return Ok(StartState::AlreadyRunning);
            }
            Some(dead) => dead.reap(&runtime),
            None => {}
        }

        let config = &self.inner.config;
        let transport = FeedTransport::new(
            Arc::clone(&self.inner.connector),
            config.secret(),
            config.transport_config(),
        );
        let state = transport.shared_state();

        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();
        let ingest = Ingest::new(
            transport,
            Arc::clone(&self.inner.writer),
            shutdown.child_token(),
        );
        let done = finished.clone().drop_guard();
        let ingest = runtime.spawn(async move {
            let _done = done;
            let result = ingest.run().await;
            if let Err(e) = &result {
                tracing::error!("market data feed stopped: {}", e);
            }
            result
        });

        let reporter = config.report_interval_value().map(|interval| {
            let _guard = runtime.enter();
            PeriodicReporter::new(self.inner.reader.clone(), interval)
                .spawn(shutdown.child_token())
        });

        tracing::info!("market data cache started for {}", self.inner.connector.endpoint());
        *running = Some(Running {
            shutdown,
            finished,
            ingest,
            reporter,
            state,
        });
        Ok(StartState::Started)
    }

    /// Stops the feed and waits for the writer to exit.
    ///
    /// A no-op when not running. Book views already handed out stay valid,
    /// and the cache can be started again.
    ///
    /// # Errors
    /// Returns the error that ended the feed, if it stopped on its own.
    pub async fn stop(&self) -> Result<(), CacheError> {
        let running = self.inner.running.lock().take();
        let Some(running) = running else {
            return Ok(());
        };
        running.shutdown.cancel();

        if let Some(reporter) = running.reporter {
            if let Err(e) = reporter.await {
                tracing::warn!("reporter task failed: {}", e);
            }
        }

        let mut ingest = running.ingest;
        let deadline = self.inner.config.connect_timeout_value();
        let result = match tokio::time::timeout(deadline, &mut ingest).await {
            Ok(Ok(result)) => result.map_err(CacheError::from),
            Ok(Err(e)) => Err(CacheError::Task {
                message: e.to_string(),
            }),
            Err(_) => {
                tracing::warn!("ingest did not stop within {:?}; aborting", deadline);
                ingest.abort();
                self.inner.writer.lock().on_disconnected();
                Ok(())
            }
        };

        tracing::info!("market data cache stopped");
        result
    }

    /// Completes when the feed stops, whether through [`stop`](Self::stop) or
    /// a fatal feed error. Returns immediately when not running.
    pub async fn finished(&self) {
        let finished = self
            .inner
            .running
            .lock()
            .as_ref()
            .map(|running| running.finished.clone());
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }

    /// Returns true while a feed task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .as_ref()
            .is_some_and(Running::is_alive)
    }

    /// Returns the feed connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .running
            .lock()
            .as_ref()
            .map_or(ConnectionState::Disconnected, |running| running.state.get())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns a read-only handle to the books.
    #[must_use]
    pub fn reader(&self) -> StoreReader {
        self.inner.reader.clone()
    }

    /// Returns a reporter bound to this cache.
    #[must_use]
    pub fn reporter(&self, interval: std::time::Duration) -> PeriodicReporter {
        PeriodicReporter::new(self.reader(), interval)
    }

    /// Returns all instruments in discovery order.
    #[must_use]
    pub fn list_instruments(&self) -> Vec<Instrument> {
        self.inner.reader.list_instruments()
    }

    /// Returns one instrument definition.
    #[must_use]
    pub fn instrument(&self, id: &str) -> Option<Instrument> {
        self.inner.reader.instrument(id)
    }

    /// Returns the best bid and ask of an instrument.
    #[must_use]
    pub fn best_bid_ask(&self, id: &str) -> Option<TopOfBook> {
        self.inner.reader.best_bid_ask(id)
    }

    /// Returns the latest immutable book view of an instrument.
    #[must_use]
    pub fn full_book(&self, id: &str) -> Option<Arc<BookView>> {
        self.inner.reader.full_book(id)
    }

    /// Returns the bid-ask spread.
    #[must_use]
    pub fn spread(&self, id: &str) -> Option<Price> {
        self.inner.reader.spread(id)
    }

    /// Returns the mid price.
    #[must_use]
    pub fn mid_price(&self, id: &str) -> Option<Price> {
        self.inner.reader.mid_price(id)
    }

    /// Returns a summary of one instrument.
    #[must_use]
    pub fn instrument_info(&self, id: &str) -> Option<InstrumentInfo> {
        self.inner.reader.instrument_info(id)
    }

    /// Returns up to `limit` past views of an instrument's book, most recent
    /// first.
    #[must_use]
    pub fn book_history(&self, id: &str, limit: usize) -> Option<Vec<Arc<BookView>>> {
        self.inner.reader.book_history(id, limit)
    }

    /// Returns the latest candle series of an instrument.
    #[must_use]
    pub fn candles(&self, id: &str) -> Option<Arc<CandleSeries>> {
        self.inner.reader.candles(id)
    }

    /// Returns up to `limit` recent events, most recent first.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<Arc<RecentEvent>> {
        self.inner.reader.recent_events(limit)
    }

    /// Returns aggregate counters.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        self.inner.reader.statistics()
    }
}

impl fmt::Debug for MarketDataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketDataCache")
            .field("endpoint", &self.inner.connector.endpoint())
            .field("running", &self.is_running())
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use async_trait::async_trait;
    use mdcache_transport::{BoxedStream, ReconnectConfig};
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self) -> std::io::Result<BoxedStream> {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            ))
        }

        fn endpoint(&self) -> &str {
            "unreachable"
        }
    }

    fn config() -> CacheConfig {
        CacheConfig::new("127.0.0.1:9001", "secret")
            .connect_timeout(Duration::from_millis(200))
            .reconnect(ReconnectConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(10),
                jitter: 0.0,
                ..Default::default()
            })
            .report_interval(None)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = MarketDataCache::new(CacheConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Configuration(ConfigurationError::MissingSecret)
        ));
    }

    #[test]
    fn test_start_without_runtime() {
        let cache = MarketDataCache::with_connector(config(), Arc::new(Unreachable)).unwrap();
        assert!(matches!(cache.start(), Err(CacheError::NoRuntime)));
        assert!(!cache.is_running());
    }

    #[test]
    fn test_reads_before_start() {
        let cache = MarketDataCache::with_connector(config(), Arc::new(Unreachable)).unwrap();
        assert!(cache.list_instruments().is_empty());
        assert!(cache.best_bid_ask("F-2025").is_none());
        assert!(cache.full_book("F-2025").is_none());
        assert!(cache.recent_events(5).is_empty());
        assert!(cache.book_history("F-2025", 5).is_none());
        assert!(cache.candles("F-2025").is_none());
        assert_eq!(cache.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let cache = MarketDataCache::with_connector(config(), Arc::new(Unreachable)).unwrap();
        let shared = cache.clone();

        assert_eq!(cache.start().unwrap(), StartState::Started);
        assert_eq!(shared.start().unwrap(), StartState::AlreadyRunning);
        assert!(cache.is_running());

        cache.stop().await.unwrap();
        assert!(!shared.is_running());
        assert_eq!(cache.connection_state(), ConnectionState::Disconnected);

        // Stopping twice is harmless, and a stopped cache can start again.
        cache.stop().await.unwrap();
        assert_eq!(cache.start().unwrap(), StartState::Started);
        cache.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_on_stop() {
        let cfg = config().reconnect(ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            max_attempts: 2,
            ..Default::default()
        });
        let cache = MarketDataCache::with_connector(cfg, Arc::new(Unreachable)).unwrap();

        cache.start().unwrap();
        tokio::time::timeout(Duration::from_secs(2), cache.finished())
            .await
            .unwrap();
        assert!(!cache.is_running());

        let err = cache.stop().await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Feed(ConnectionError::MaxReconnectAttempts)
        ));
    }

    #[tokio::test]
    async fn test_start_replaces_feed_that_gave_up() {
        let cfg = config().reconnect(ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            max_attempts: 2,
            ..Default::default()
        });
        let cache = MarketDataCache::with_connector(cfg, Arc::new(Unreachable)).unwrap();

        assert_eq!(cache.start().unwrap(), StartState::Started);
        tokio::time::timeout(Duration::from_secs(2), cache.finished())
            .await
            .unwrap();
        assert!(!cache.is_running());

        assert_eq!(cache.start().unwrap(), StartState::Started);
        tokio::time::timeout(Duration::from_secs(2), cache.finished())
            .await
            .unwrap();

        // The second feed's failure is the one reported.
        let err = cache.stop().await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Feed(ConnectionError::MaxReconnectAttempts)
        ));
        assert!(cache.stop().await.is_ok());
    }
}
