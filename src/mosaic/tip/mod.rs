pub mod bus;
pub mod error;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use bus::{Bus, InMemoryBus, NatsBus};
pub use error::TipError;

use crate::mosaic::vtr::TileRepository;

/// Producer tasks split `n` downloads into chunks of this size, each
/// running its sequential `reqwest::get` calls independently of the others.
pub const CHUNK_SIZE: usize = 20;

/// Where TIP fetches candidate tile images from. A thin wrapper around a
/// URL today; kept as a struct rather than a bare `String` so a future
/// source (headers, auth) doesn't change `download_n`'s signature.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub url: String,
}

impl SourceRequest {
    pub fn new(url: impl Into<String>) -> Self {
        SourceRequest { url: url.into() }
    }
}

/// Summary of a `download_n` run. The pipeline never guarantees exactly
/// `n` successful inserts, so callers that care (logging, metrics) need a
/// way to find out how short it fell.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TipOutcome {
    pub attempted: usize,
    pub published: usize,
    pub inserted: usize,
    pub errors: usize,
}

struct Counters {
    attempted: AtomicUsize,
    published: AtomicUsize,
    inserted: AtomicUsize,
    errors: AtomicUsize,
    completed: AtomicUsize,
    producers_done: AtomicBool,
    notify: Notify,
}

impl Counters {
    fn new() -> Self {
        Counters {
            attempted: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            inserted: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            producers_done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn barrier_satisfied(&self) -> bool {
        self.producers_done.load(Ordering::SeqCst)
            && self.completed.load(Ordering::SeqCst) >= self.published.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> TipOutcome {
        TipOutcome {
            attempted: self.attempted.load(Ordering::SeqCst),
            published: self.published.load(Ordering::SeqCst),
            inserted: self.inserted.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

/// Runs `count` sequential downloads against `source.url`, publishing each
/// non-empty body to `downloads` and counting attempts/publishes as it
/// goes.
async fn run_producer(
    http: reqwest::Client,
    source: SourceRequest,
    bus: Arc<dyn Bus>,
    count: usize,
    counters: Arc<Counters>,
) {
    for _ in 0..count {
        counters.attempted.fetch_add(1, Ordering::SeqCst);

        let body = match http.get(&source.url).send().await {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "failed reading download body");
                    continue;
                }
            },
            Err(err) => {
                warn!(error = %err, url = %source.url, "download request failed");
                continue;
            }
        };

        if body.is_empty() {
            warn!(url = %source.url, "downloaded an empty body, skipping");
            continue;
        }

        if let Err(err) = bus.publish("downloads", Bytes::from(body)).await {
            warn!(error = %err, "failed to publish downloaded tile");
            continue;
        }
        counters.published.fetch_add(1, Ordering::SeqCst);
        counters.notify.notify_one();
    }
}

/// Decodes one downloaded payload and inserts it into `repo`. Decode or
/// insert failures are counted as errors, never fatal to the batch.
async fn process_one(
    payload: Bytes,
    repo: Arc<dyn TileRepository>,
    owner_id: String,
    prefix: String,
    counters: Arc<Counters>,
) {
    let orientation = crate::mosaic::exif_orient::read_orientation(&payload);
    let decoded = match image::load_from_memory(&payload) {
        Ok(img) => crate::mosaic::exif_orient::apply_orientation(img, orientation).to_rgb8(),
        Err(err) => {
            warn!(error = %err, "failed to decode downloaded tile");
            counters.errors.fetch_add(1, Ordering::SeqCst);
            counters.completed.fetch_add(1, Ordering::SeqCst);
            counters.notify.notify_one();
            return;
        }
    };

    match repo.insert(&owner_id, &prefix, &decoded).await {
        Ok(_) => {
            counters.inserted.fetch_add(1, Ordering::SeqCst);
        }
        Err(err) => {
            warn!(error = %err, "failed to insert downloaded tile");
            counters.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
    counters.completed.fetch_add(1, Ordering::SeqCst);
    counters.notify.notify_one();
}

/// Downloads up to `n` candidate tiles for `owner_id`/`prefix`, inserting
/// each into `repo` via the `downloads` bus subject. Subscribes before any
/// producer is spawned so no publish can race ahead of the consumer loop.
///
/// Returns `Err(TipError::SourceUnavailable)` when `n` tiles were requested
/// but not a single one could be published (every producer's downloads
/// failed or came back empty) — the one case where the caller's 5xx mapping
/// needs to know the whole run was a wash, distinct from the best-effort
/// "fell a bit short" case `TipOutcome` otherwise reports.
pub async fn download_n(
    owner_id: &str,
    prefix: &str,
    n: usize,
    source: SourceRequest,
    repo: Arc<dyn TileRepository>,
    bus: Arc<dyn Bus>,
    cancel: CancellationToken,
) -> Result<TipOutcome, TipError> {
    let counters = Arc::new(Counters::new());

    let mut stream = match bus.subscribe("downloads").await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "tip: bus subscribe failed, aborting download_n");
            return Err(TipError::BusUnavailable);
        }
    };

    let chunks = n / CHUNK_SIZE;
    let remainder = n % CHUNK_SIZE;

    let http = reqwest::Client::new();
    let mut producers = JoinSet::new();
    for _ in 0..chunks {
        producers.spawn(run_producer(
            http.clone(),
            source.clone(),
            bus.clone(),
            CHUNK_SIZE,
            counters.clone(),
        ));
    }
    if remainder > 0 {
        producers.spawn(run_producer(
            http.clone(),
            source.clone(),
            bus.clone(),
            remainder,
            counters.clone(),
        ));
    }

    let producers_driver = {
        let counters = counters.clone();
        tokio::spawn(async move {
            while producers.join_next().await.is_some() {}
            counters.producers_done.store(true, Ordering::SeqCst);
            counters.notify.notify_one();
        })
    };

    let mut inflight = JoinSet::new();
    loop {
        if counters.barrier_satisfied() && inflight.is_empty() {
            break;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                break;
            }

            maybe = stream.next() => {
                if let Some(payload) = maybe {
                    inflight.spawn(process_one(
                        payload,
                        repo.clone(),
                        owner_id.to_string(),
                        prefix.to_string(),
                        counters.clone(),
                    ));
                }
            }

            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}

            _ = counters.notify.notified() => {}
        }
    }

    producers_driver.abort();
    let outcome = counters.snapshot();
    if n > 0 && outcome.published == 0 {
        return Err(TipError::SourceUnavailable);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mosaic::color::ColorVector;
    use crate::mosaic::vtr::InMemoryTileRepository;

    #[tokio::test]
    async fn zero_requested_tiles_is_a_no_op() {
        let repo: Arc<dyn TileRepository> = Arc::new(InMemoryTileRepository::new());
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let outcome = download_n(
            "owner",
            "img:owner",
            0,
            SourceRequest::new("http://example.invalid/random"),
            repo,
            bus,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TipOutcome::default());
    }

    /// Binds an in-process HTTP server that always answers with an empty
    /// body, so the empty-body skip in `run_producer` can be exercised
    /// without a real external image source.
    async fn spawn_empty_body_server() -> String {
        use axum::routing::get;
        use axum::Router;

        let app = Router::new().route("/empty", get(|| async { "" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/empty")
    }

    #[tokio::test]
    async fn empty_body_is_skipped_without_inserting_or_publishing() {
        let repo = Arc::new(InMemoryTileRepository::new());
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let url = spawn_empty_body_server().await;

        // The only producer's one download comes back empty, so nothing is
        // ever published: the whole run is a wash, surfaced as
        // `SourceUnavailable` rather than a `TipOutcome` with zero fields.
        let err = download_n(
            "owner",
            "img:owner",
            1,
            SourceRequest::new(url),
            repo.clone() as Arc<dyn TileRepository>,
            bus,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TipError::SourceUnavailable));
        assert!(repo
            .nearest("img:owner", ColorVector::new(0.0, 0.0, 0.0), 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait_promptly() {
        let repo: Arc<dyn TileRepository> = Arc::new(InMemoryTileRepository::new());
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = download_n(
            "owner",
            "img:owner",
            5,
            SourceRequest::new("http://example.invalid/random"),
            repo,
            bus,
            cancel,
        )
        .await;
        // Cancelled before any producer could plausibly finish a real
        // network round trip, so nothing was ever published or inserted —
        // the call must return promptly rather than hang, either with
        // `SourceUnavailable` or a zero-inserted outcome.
        match result {
            Ok(outcome) => assert_eq!(outcome.inserted, 0),
            Err(err) => assert!(matches!(err, TipError::SourceUnavailable)),
        }
    }
}
