//! The writer path: transport, decoder, store.
//!
//! One task runs this loop. Its only suspension point is the transport;
//! decoding and applying are synchronous.

use mdcache_book::OrderBookStore;
use mdcache_core::EventDecoder;
use mdcache_transport::{ConnectionError, FeedTransport, TransportEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives one feed into the store until shutdown or a fatal feed error.
pub(crate) struct Ingest {
    transport: FeedTransport,
    decoder: EventDecoder,
    store: Arc<Mutex<OrderBookStore>>,
    shutdown: CancellationToken,
}

impl Ingest {
    pub(crate) fn new(
        transport: FeedTransport,
        store: Arc<Mutex<OrderBookStore>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            decoder: EventDecoder::new(),
            store,
            shutdown,
        }
    }

    /// Runs until cancelled.
    ///
    /// # Errors
    /// Returns the transport's error when it gives up for good.
    pub(crate) async fn run(mut self) -> Result<(), ConnectionError> {
        let result = loop {
            let event = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break Ok(()),

                event = self.transport.next_event() => event,
            };

            match event {
                Ok(event) => self.handle(event),
                Err(e) => break Err(e),
            }
        };

        self.transport.close().await;
        self.store.lock().on_disconnected();
        tracing::info!(
            "ingest stopped after {} sessions ({} decode errors)",
            self.transport.sessions(),
            self.decoder.errors()
        );
        result
    }

    fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => {
                // Aggregate frames can skip bad events without failing whole.
                let errors_before = self.decoder.errors();
                let decoded = self.decoder.decode_frame(&frame);
                let failed = self.decoder.errors().saturating_sub(errors_before);

                let mut store = self.store.lock();
                match decoded {
                    Ok(events) => {
                        store.apply_all(events);
                    }
                    Err(e) => tracing::warn!("skipping undecodable frame: {}", e),
                }
                if failed > 0 {
                    store.record_decode_errors(failed);
                }
            }
            TransportEvent::Connected { resumed, .. } => {
                self.store.lock().on_connected(resumed);
            }
            TransportEvent::Disconnected(_) => {
                self.store.lock().on_disconnected();
            }
        }
    }
}
