//! Page loading and merging.
//!
//! A [`Loader`] runs at most one fetch at a time on a worker thread and merges each
//! delivered page onto the [`Session`] owned by the display controller. Starting a new
//! load supersedes the one in flight; a superseded result is dropped when it arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::article::Article;
use crate::data::FeedService;
use crate::query::FeedQuery;

/// Page request state that outlives individual loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub page: u32,
    pub accumulated: Option<Vec<Article>>,
    pub force_refresh: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            page: 1,
            accumulated: None,
            force_refresh: true,
        }
    }
}

impl Session {
    /// A session brought back from storage; its list is served without a network call
    /// on the first load.
    pub fn restored(page: u32, articles: Vec<Article>) -> Self {
        if articles.is_empty() {
            return Self::default();
        }
        Self {
            page: page.max(1),
            accumulated: Some(articles),
            force_refresh: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Session::default();
    }

    pub fn articles(&self) -> &[Article] {
        self.accumulated.as_deref().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.articles().is_empty()
    }

    /// Appends a freshly fetched page. An empty page leaves the list untouched.
    pub fn merge(&mut self, page: Vec<Article>) {
        if page.is_empty() {
            return;
        }
        match self.accumulated.as_mut() {
            Some(existing) => existing.extend(page),
            None => self.accumulated = Some(page),
        }
        self.force_refresh = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTrigger {
    Initial,
    Refresh,
    NextPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub trigger: LoadTrigger,
    pub page: u32,
    pub fetched: usize,
    pub total: usize,
    pub from_cache: bool,
}

impl Delivery {
    /// Nothing to show at all: the only case the display reports as empty.
    pub fn is_empty_state(&self) -> bool {
        self.total == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("no internet connection")]
    Offline,
}

/// Session fields a load changed before its result arrived.
struct Rollback {
    page: u32,
    force_refresh: bool,
    articles: Option<Vec<Article>>,
}

impl Rollback {
    fn restore(self, session: &mut Session) {
        session.page = self.page;
        session.force_refresh = self.force_refresh;
        if self.articles.is_some() {
            session.accumulated = self.articles;
        }
    }
}

struct PendingLoad {
    request_id: u64,
    trigger: LoadTrigger,
    page: u32,
    cancel_flag: Arc<AtomicBool>,
    rollback: Rollback,
}

struct LoadResult {
    request_id: u64,
    outcome: Result<Vec<Article>, LoadError>,
}

pub struct Loader {
    service: Arc<dyn FeedService>,
    response_tx: Sender<LoadResult>,
    response_rx: Receiver<LoadResult>,
    next_request_id: u64,
    pending: Option<PendingLoad>,
    ready: Option<Delivery>,
    state: LoadState,
}

impl Loader {
    pub fn new(service: Arc<dyn FeedService>) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            service,
            response_tx,
            response_rx,
            next_request_id: 1,
            pending: None,
            ready: None,
            state: LoadState::Idle,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    /// Starts a load for `trigger` without blocking the caller.
    ///
    /// A load still in flight is superseded and its session changes are undone first,
    /// so `NextPage` always asks for the page after the last delivered one. The
    /// connectivity check runs on the worker; when the feed host is unreachable the
    /// session is restored and [`LoadError::Offline`] comes back through
    /// [`Loader::poll`] / [`Loader::wait`].
    pub fn request(&mut self, session: &mut Session, query: &FeedQuery, trigger: LoadTrigger) {
        self.cancel(session);
        self.ready = None;

        if trigger == LoadTrigger::Initial && !session.force_refresh {
            if let Some(existing) = session.accumulated.as_ref() {
                self.ready = Some(Delivery {
                    trigger,
                    page: session.page,
                    fetched: 0,
                    total: existing.len(),
                    from_cache: true,
                });
                self.state = LoadState::Delivered;
                debug!(page = session.page, "serving retained articles");
                return;
            }
        }

        let mut rollback = Rollback {
            page: session.page,
            force_refresh: session.force_refresh,
            articles: None,
        };
        match trigger {
            LoadTrigger::Initial => session.force_refresh = true,
            LoadTrigger::Refresh => {
                rollback.articles = session.accumulated.take();
                session.reset();
            }
            LoadTrigger::NextPage => {
                session.page = session.page.saturating_add(1);
                session.force_refresh = true;
            }
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let page = session.page;
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending = Some(PendingLoad {
            request_id,
            trigger,
            page,
            cancel_flag: cancel_flag.clone(),
            rollback,
        });
        self.state = LoadState::Loading;
        info!(request_id, page, ?trigger, "loading articles");

        let tx = self.response_tx.clone();
        let service = self.service.clone();
        let query = query.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let outcome = if service.is_reachable(&query) {
                Ok(service.load_page(&query, page))
            } else {
                Err(LoadError::Offline)
            };
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(LoadResult {
                request_id,
                outcome,
            });
        });
    }

    /// Drops the load in flight, if any, and undoes its session changes. Its result
    /// will never be delivered.
    pub fn cancel(&mut self, session: &mut Session) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
            debug!(request_id = pending.request_id, "superseded pending load");
            pending.rollback.restore(session);
            if self.state == LoadState::Loading {
                self.state = LoadState::Idle;
            }
        }
    }

    /// Non-blocking; called from the event loop every tick.
    pub fn poll(&mut self, session: &mut Session) -> Option<Result<Delivery, LoadError>> {
        if let Some(delivery) = self.ready.take() {
            return Some(Ok(delivery));
        }
        while let Ok(result) = self.response_rx.try_recv() {
            if let Some(outcome) = self.accept(session, result) {
                return Some(outcome);
            }
        }
        None
    }

    /// Blocks until the current load finishes or `timeout` elapses.
    pub fn wait(
        &mut self,
        session: &mut Session,
        timeout: Duration,
    ) -> Option<Result<Delivery, LoadError>> {
        if let Some(delivery) = self.ready.take() {
            return Some(Ok(delivery));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.response_rx.recv_timeout(remaining) {
                Ok(result) => {
                    if let Some(outcome) = self.accept(session, result) {
                        return Some(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn accept(
        &mut self,
        session: &mut Session,
        result: LoadResult,
    ) -> Option<Result<Delivery, LoadError>> {
        let current = matches!(
            &self.pending,
            Some(pending) if pending.request_id == result.request_id
                && !pending.cancel_flag.load(Ordering::SeqCst)
        );
        if !current {
            debug!(request_id = result.request_id, "dropping stale result");
            return None;
        }
        let pending = self.pending.take()?;

        let articles = match result.outcome {
            Ok(articles) => articles,
            Err(err) => {
                warn!(page = pending.page, "{err}; keeping previous articles");
                pending.rollback.restore(session);
                self.state = LoadState::Idle;
                return Some(Err(err));
            }
        };

        let fetched = articles.len();
        session.merge(articles);
        self.state = LoadState::Delivered;

        let delivery = Delivery {
            trigger: pending.trigger,
            page: pending.page,
            fetched,
            total: session.articles().len(),
            from_cache: false,
        };
        info!(
            page = delivery.page,
            fetched,
            total = delivery.total,
            "articles delivered"
        );
        Some(Ok(delivery))
    }
}
