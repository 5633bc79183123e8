use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::article::Article;
use crate::config::{self, Config};
use crate::data::{FeedService, GuardianFeedService};
use crate::guardian;
use crate::loader::{LoadTrigger, Loader, Session};
use crate::query::{CategorySet, OrderBy};
use crate::storage;
use crate::ui;

const LIST_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub list: bool,
    pub pages: u32,
    pub order_by: Option<OrderBy>,
    pub categories: Vec<String>,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    apply_overrides(&mut cfg, &opts);

    let client = guardian::Client::new(guardian::ClientConfig {
        user_agent: cfg.guardian.user_agent.clone(),
        connect_timeout: cfg.http.connect_timeout,
        read_timeout: cfg.http.read_timeout,
        http_client: None,
    })
    .context("build guardian client")?;
    let feed_service: Arc<dyn FeedService> = Arc::new(GuardianFeedService::new(Arc::new(client)));

    if opts.list {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        return print_articles(&cfg, feed_service, opts.pages.max(1), &mut out);
    }

    let config_path = opts.config_file.clone().or_else(config::default_path);
    let display_path = friendly_path(config_path.as_ref());

    let store = storage::Store::open(storage::Options::default()).context("open storage")?;
    let session = initial_session(&store, cfg.feed.restore_session);

    let options = ui::Options {
        status_message: format!("Config: {display_path}"),
        session,
        query: cfg.feed_query(),
        feed_service,
        config_path,
    };

    let mut model = ui::Model::new(options);
    let result = model.run();

    let session = model.into_session();
    if cfg.feed.restore_session {
        if let Err(err) = store.save_session(&session) {
            warn!("failed to save session: {err:#}");
        }
    }
    if let Err(err) = store.close() {
        warn!("{err:#}");
    }

    result
}

/// The saved session when restoring is enabled; otherwise any stale one is cleared.
fn initial_session(store: &storage::Store, restore: bool) -> Session {
    if !restore {
        if let Err(err) = store.clear_session() {
            warn!("failed to clear saved session: {err:#}");
        }
        return Session::default();
    }
    match store.load_session() {
        Ok(Some(saved)) => {
            info!(
                page = saved.session.page,
                articles = saved.session.articles().len(),
                saved_at = %saved.saved_at,
                "restored session"
            );
            saved.session
        }
        Ok(None) => Session::default(),
        Err(err) => {
            warn!("failed to restore session: {err:#}");
            Session::default()
        }
    }
}

fn apply_overrides(cfg: &mut Config, opts: &RunOptions) {
    if let Some(order_by) = opts.order_by {
        cfg.feed.order_by = order_by;
    }
    let categories: CategorySet = opts.categories.iter().map(String::as_str).collect();
    if !categories.is_empty() {
        cfg.feed.categories = categories;
    }
}

/// Loads up to `pages` pages and writes one block per article to `out`.
pub fn print_articles(
    cfg: &Config,
    feed_service: Arc<dyn FeedService>,
    pages: u32,
    out: &mut dyn Write,
) -> Result<()> {
    let query = cfg.feed_query();
    let mut loader = Loader::new(feed_service);
    let mut session = Session::default();

    for page in 1..=pages {
        let trigger = if page == 1 {
            LoadTrigger::Initial
        } else {
            LoadTrigger::NextPage
        };
        loader.request(&mut session, &query, trigger);
        let Some(outcome) = loader.wait(&mut session, LIST_PAGE_TIMEOUT) else {
            warn!(page, "timed out waiting for articles");
            break;
        };
        let delivery = outcome?;
        if delivery.fetched == 0 {
            break;
        }
    }

    if session.is_empty() {
        writeln!(out, "No articles found.")?;
        return Ok(());
    }
    for article in session.articles() {
        write_article(out, article)?;
    }
    Ok(())
}

fn write_article(out: &mut dyn Write, article: &Article) -> io::Result<()> {
    writeln!(out, "{}", article.display_title())?;
    writeln!(out, "  {} · {}", article.byline(), article.display_date())?;
    writeln!(out, "  {}", article.url)?;
    writeln!(out)
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/stem-news/config.yaml".to_string()
    }
}
