//! Progressive loading of paginated search results
//!
//! A [`ProgressiveLoader`] walks a filtered repository query one batch at a
//! time. Items accumulate in order and the offset advances by exactly the
//! number of items appended, so pausing and resuming never skips or repeats
//! an item.
//!
//! State machine:
//!
//! ```text
//! Idle --start--> Loading --short batch--> Exhausted
//!                  |   ^
//!         pressure |   | relief
//!                  v   |
//!                  Paused
//! ```
//!
//! Starting a new session from any state discards the previous session's
//! items and trips its cancellation token. A fetch that was already in
//! flight for the old session completes into the void.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use stockroom_cache::{CacheConfig, PressureLevel, PressureSubscriber};
use stockroom_core::{FilterState, ItemRepository, RepositoryError};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;

/// Lifecycle of a loading session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderState {
    /// No session has been started, or the last one was cancelled
    Idle,
    /// Batches are being requested
    Loading,
    /// Suspended by memory pressure; resumes from the same offset
    Paused,
    /// The repository returned a short batch; nothing more to load
    Exhausted,
}

/// Why a batch request did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// No session is active
    Idle,
    /// Loading is paused by memory pressure
    Paused,
    /// The session already reached the end of the results
    Exhausted,
    /// Another batch for this session is still being fetched
    InFlight,
    /// The session changed while the fetch ran; its result was dropped
    Stale,
}

/// Result of a single batch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchOutcome {
    /// A full batch was appended; more data may follow
    Appended(usize),
    /// A short (possibly empty) batch was appended and the session is done
    Exhausted(usize),
    /// Nothing was requested or appended
    Skipped(SkipReason),
}

impl BatchOutcome {
    /// Number of items appended by this request
    pub fn appended(&self) -> usize {
        match self {
            BatchOutcome::Appended(count) | BatchOutcome::Exhausted(count) => *count,
            BatchOutcome::Skipped(_) => 0,
        }
    }
}

/// Errors that can occur while loading
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The repository failed to produce a batch
    #[error("batch fetch failed: {0}")]
    Fetch(#[from] RepositoryError),

    /// The background loading thread could not be started
    #[error("failed to spawn loader thread: {0}")]
    Spawn(#[source] io::Error),
}

struct LoaderInner<T> {
    state: LoaderState,
    filter: Option<FilterState>,
    items: Vec<T>,
    offset: usize,
    has_more_data: bool,
    in_flight: bool,
    generation: u64,
    token: CancellationToken,
}

impl<T> LoaderInner<T> {
    fn idle() -> Self {
        Self {
            state: LoaderState::Idle,
            filter: None,
            items: Vec::new(),
            offset: 0,
            has_more_data: false,
            in_flight: false,
            generation: 0,
            token: CancellationToken::new(),
        }
    }

    /// Invalidate the current session and hand out a fresh token
    fn next_session(&mut self) -> u64 {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.generation = self.generation.wrapping_add(1);
        self.items.clear();
        self.offset = 0;
        self.in_flight = false;
        self.generation
    }
}

struct Ticket {
    filter: FilterState,
    offset: usize,
    generation: u64,
    token: CancellationToken,
}

/// Paginated, pausable loader over an [`ItemRepository`]
///
/// All methods take `&self`; the loader is meant to be shared behind an
/// `Arc` between the code driving it and the pressure monitor. The
/// repository is called without any internal lock held.
pub struct ProgressiveLoader<T> {
    repository: Arc<dyn ItemRepository<T>>,
    batch_size: usize,
    inner: Mutex<LoaderInner<T>>,
}

impl<T> ProgressiveLoader<T> {
    /// Create an idle loader requesting `batch_size` items per batch
    ///
    /// A batch size of zero is raised to one.
    pub fn new(repository: Arc<dyn ItemRepository<T>>, batch_size: usize) -> Self {
        Self {
            repository,
            batch_size: batch_size.max(1),
            inner: Mutex::new(LoaderInner::idle()),
        }
    }

    /// Create a loader using the configured batch size
    pub fn from_config(repository: Arc<dyn ItemRepository<T>>, config: &CacheConfig) -> Self {
        Self::new(repository, config.batch_size)
    }

    fn lock(&self) -> MutexGuard<'_, LoaderInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new session for `filter` and fetch its first batch
    ///
    /// Any previous session is discarded, including its items, and a fetch
    /// still running for it will have its result dropped. If the first
    /// fetch fails the session stays in [`LoaderState::Loading`] at offset
    /// zero and [`load_next_batch`](Self::load_next_batch) retries it.
    pub fn start_progressive_loading(
        &self,
        filter: &FilterState,
    ) -> Result<BatchOutcome, LoaderError> {
        {
            let mut inner = self.lock();
            let generation = inner.next_session();
            inner.filter = Some(filter.clone());
            inner.has_more_data = true;
            inner.state = LoaderState::Loading;
            info!(
                filter = %filter,
                generation,
                batch_size = self.batch_size,
                "started progressive loading"
            );
        }

        self.load_next_batch()
    }

    /// Fetch and append the next batch of the current session
    ///
    /// Does nothing unless the session is [`LoaderState::Loading`] and no
    /// other batch is in flight. The returned [`BatchOutcome`] says which.
    /// On a repository error the offset and items are unchanged and the
    /// session stays where it was.
    pub fn load_next_batch(&self) -> Result<BatchOutcome, LoaderError> {
        let ticket = match self.claim() {
            Ok(ticket) => ticket,
            Err(reason) => return Ok(BatchOutcome::Skipped(reason)),
        };

        let result =
            self.repository
                .search_with_pagination(&ticket.filter, ticket.offset, self.batch_size);

        let mut inner = self.lock();
        if inner.generation != ticket.generation || ticket.token.is_cancelled() {
            debug!(
                generation = ticket.generation,
                offset = ticket.offset,
                "dropped batch from a superseded session"
            );
            return Ok(BatchOutcome::Skipped(SkipReason::Stale));
        }
        inner.in_flight = false;

        let mut batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                warn!(offset = ticket.offset, error = %e, "batch fetch failed");
                return Err(LoaderError::Fetch(e));
            }
        };

        batch.truncate(self.batch_size);
        let count = batch.len();
        inner.items.append(&mut batch);
        inner.offset += count;

        if count < self.batch_size {
            inner.has_more_data = false;
            inner.state = LoaderState::Exhausted;
            info!(
                total = inner.items.len(),
                "progressive loading reached the end of the results"
            );
            Ok(BatchOutcome::Exhausted(count))
        } else {
            debug!(count, offset = inner.offset, "appended batch");
            Ok(BatchOutcome::Appended(count))
        }
    }

    /// Reserve the next fetch for the current session
    fn claim(&self) -> Result<Ticket, SkipReason> {
        let mut inner = self.lock();
        match inner.state {
            LoaderState::Idle => return Err(SkipReason::Idle),
            LoaderState::Paused => return Err(SkipReason::Paused),
            LoaderState::Exhausted => return Err(SkipReason::Exhausted),
            LoaderState::Loading => {}
        }
        if inner.in_flight {
            return Err(SkipReason::InFlight);
        }
        let filter = inner.filter.clone().ok_or(SkipReason::Idle)?;

        inner.in_flight = true;
        Ok(Ticket {
            filter,
            offset: inner.offset,
            generation: inner.generation,
            token: inner.token.clone(),
        })
    }

    /// Keep loading batches until the session is exhausted or paused
    ///
    /// Returns the number of items appended by this call. Stops at the
    /// first repository error.
    pub fn load_all(&self) -> Result<usize, LoaderError> {
        let mut total = 0;
        loop {
            match self.load_next_batch()? {
                BatchOutcome::Appended(count) => total += count,
                BatchOutcome::Exhausted(count) => return Ok(total + count),
                BatchOutcome::Skipped(reason) => {
                    debug!(?reason, total, "load_all stopped");
                    return Ok(total);
                }
            }
        }
    }

    /// Pause loading because memory is scarce
    ///
    /// Only a loading session is paused. A batch already in flight still
    /// lands when it completes.
    pub fn on_memory_pressure(&self) {
        let mut inner = self.lock();
        if inner.state == LoaderState::Loading {
            inner.state = LoaderState::Paused;
            debug!(offset = inner.offset, "paused progressive loading");
        }
    }

    /// Resume a paused session from its current offset
    pub fn on_memory_pressure_relieved(&self) {
        let mut inner = self.lock();
        if inner.state == LoaderState::Paused {
            inner.state = LoaderState::Loading;
            debug!(offset = inner.offset, "resumed progressive loading");
        }
    }

    /// Abandon the current session and return to [`LoaderState::Idle`]
    pub fn cancel(&self) {
        let mut inner = self.lock();
        let generation = inner.next_session();
        inner.filter = None;
        inner.has_more_data = false;
        inner.state = LoaderState::Idle;
        debug!(generation, "cancelled progressive loading");
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoaderState {
        self.lock().state
    }

    /// Number of items loaded so far in this session
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if no items have been loaded in this session
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Offset the next batch will be requested from
    pub fn offset(&self) -> usize {
        self.lock().offset
    }

    /// False once a short batch has been seen or when idle
    pub fn has_more_data(&self) -> bool {
        self.lock().has_more_data
    }

    /// Returns true while memory pressure holds the session paused
    pub fn is_progressive_loading_paused(&self) -> bool {
        self.lock().state == LoaderState::Paused
    }

    /// Returns true while a batch fetch is in flight
    pub fn is_loading(&self) -> bool {
        self.lock().in_flight
    }

    /// Items requested per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Filter of the current session, if any
    pub fn current_filter(&self) -> Option<FilterState> {
        self.lock().filter.clone()
    }
}

impl<T: Clone> ProgressiveLoader<T> {
    /// Snapshot of the items loaded so far, in repository order
    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }
}

impl<T: Send + 'static> ProgressiveLoader<T> {
    /// Run [`load_all`](Self::load_all) on a background thread
    pub fn spawn_load_all(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<usize, LoaderError>>, LoaderError> {
        let loader = Arc::clone(self);
        thread::Builder::new()
            .name("stockroom-loader".to_string())
            .spawn(move || loader.load_all())
            .map_err(LoaderError::Spawn)
    }
}

impl<T: Send> PressureSubscriber for ProgressiveLoader<T> {
    fn on_pressure_level_changed(&self, level: PressureLevel) {
        if level.needs_eviction() {
            self.on_memory_pressure();
        } else {
            self.on_memory_pressure_relieved();
        }
    }

    fn on_low_memory_warning(&self) {
        self.on_memory_pressure();
    }
}
