use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::error;

use crate::article::Article;
use crate::guardian;
use crate::query::FeedQuery;

/// Source of article pages for the loader. Implementations never fail: a page that
/// could not be fetched is an empty page.
pub trait FeedService: Send + Sync {
    fn load_page(&self, query: &FeedQuery, page: u32) -> Vec<Article>;

    fn is_reachable(&self, _query: &FeedQuery) -> bool {
        true
    }
}

pub struct GuardianFeedService {
    client: Arc<guardian::Client>,
}

impl GuardianFeedService {
    pub fn new(client: Arc<guardian::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for GuardianFeedService {
    fn load_page(&self, query: &FeedQuery, page: u32) -> Vec<Article> {
        match query.page_url(page) {
            Ok(url) => self.client.fetch_latest_news(&url),
            Err(err) => {
                error!("issue building the URL: {err}");
                Vec::new()
            }
        }
    }

    fn is_reachable(&self, query: &FeedQuery) -> bool {
        guardian::host_reachable(&query.base_url)
    }
}

/// Canned pages keyed by page number; anything not listed is an empty page.
#[derive(Default)]
pub struct MockFeedService {
    pages: HashMap<u32, Vec<Article>>,
    delay: Option<Duration>,
    offline: bool,
    calls: AtomicUsize,
}

impl MockFeedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: u32, articles: Vec<Article>) -> Self {
        self.pages.insert(page, articles);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeedService for MockFeedService {
    fn load_page(&self, _query: &FeedQuery, page: u32) -> Vec<Article> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.pages.get(&page).cloned().unwrap_or_default()
    }

    fn is_reachable(&self, _query: &FeedQuery) -> bool {
        !self.offline
    }
}

pub fn sample_article(id: usize) -> Article {
    Article::new(
        format!("Sample article {id}"),
        "Science",
        Some("STEM News".to_string()),
        "2018-05-17T13:21:54Z",
        format!("https://www.theguardian.com/science/sample-{id}"),
    )
}
