use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use stem_news::query::OrderBy;
use stem_news::RunOptions;

#[derive(Parser, Debug)]
#[command(
    name = "stem-news",
    version,
    about = "Browse science, technology, engineering and maths news from The Guardian in your terminal"
)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print articles to stdout and exit instead of starting the TUI
    #[arg(long)]
    list: bool,

    /// Number of pages to print with --list
    #[arg(long, value_name = "N", default_value_t = 1, requires = "list")]
    pages: u32,

    /// Sort order for this run: newest or relevance
    #[arg(long, value_name = "ORDER", value_parser = parse_order)]
    order_by: Option<OrderBy>,

    /// Category keyword for this run; repeat to search several
    #[arg(long = "category", value_name = "CATEGORY")]
    categories: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_order(value: &str) -> Result<OrderBy, String> {
    OrderBy::from_key(value).ok_or_else(|| format!("expected newest or relevance, got {value:?}"))
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    info!("stem-news v{} starting", stem_news::VERSION);

    let opts = RunOptions {
        config_file: cli.config,
        list: cli.list,
        pages: cli.pages.max(1),
        order_by: cli.order_by,
        categories: cli.categories,
    };

    if let Err(err) = stem_news::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// The TUI owns the terminal, so interactive runs log to a file in the cache dir.
fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env().add_directive(
        format!("stem_news={level}")
            .parse()
            .unwrap_or_else(|_| tracing::Level::INFO.into()),
    );

    if cli.list {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let Some(dir) = dirs::cache_dir().map(|dir| dir.join("stem-news")) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("stem-news.log"))
    else {
        return;
    };
    fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
}
