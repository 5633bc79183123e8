use std::cell::Cell;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseEvent,
    MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{info, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config;
use crate::data::FeedService;
use crate::loader::{Delivery, LoadError, LoadTrigger, Loader, Session};
use crate::query::FeedQuery;
use crate::settings::FeedSettings;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const ARTICLE_ROW_HEIGHT: usize = 3;
const PAGE_JUMP: isize = 5;

const MSG_NO_ARTICLES: &str = "No articles found.";
const MSG_NO_CONNECTION: &str = "No internet connection.";
const MSG_UP_TO_DATE: &str = "You're up to date.";
const MSG_NO_BROWSER: &str = "No browser available to open this article.";

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16) {
    let width = width as usize;
    if width == 0 {
        return;
    }

    for line in lines {
        let current_width: usize = line
            .spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum();
        if current_width >= width {
            continue;
        }
        let pad_style = line.spans.last().map(|span| span.style).unwrap_or_default();
        let padding = " ".repeat(width - current_width);
        line.spans.push(Span::styled(padding, pad_style));
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

struct SettingsMenu {
    form: FeedSettings,
    cursor: usize,
}

impl SettingsMenu {
    /// (preference index, choice index) for every selectable row.
    fn rows(&self) -> Vec<(usize, usize)> {
        self.form
            .preferences()
            .iter()
            .enumerate()
            .flat_map(|(pref_idx, pref)| {
                (0..pref.choices().len()).map(move |choice_idx| (pref_idx, choice_idx))
            })
            .collect()
    }

    fn toggle_current(&mut self) {
        let rows = self.rows();
        if let Some((pref_idx, choice_idx)) = rows.get(self.cursor).copied() {
            if let Some(pref) = self.form.preference_mut(pref_idx) {
                pref.toggle(choice_idx);
            }
        }
    }
}

pub struct Options {
    pub status_message: String,
    pub session: Session,
    pub query: FeedQuery,
    pub feed_service: Arc<dyn FeedService>,
    pub config_path: Option<PathBuf>,
}

pub struct Model {
    status_message: String,
    empty_message: String,
    session: Session,
    loader: Loader,
    query: FeedQuery,
    config_path: Option<PathBuf>,
    selected: usize,
    offset: Cell<usize>,
    view_height: Cell<u16>,
    settings_menu: Option<SettingsMenu>,
    needs_redraw: bool,
    spinner: Spinner,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let mut model = Self {
            status_message: opts.status_message,
            empty_message: String::new(),
            session: opts.session,
            loader: Loader::new(opts.feed_service),
            query: opts.query,
            config_path: opts.config_path,
            selected: 0,
            offset: Cell::new(0),
            view_height: Cell::new(0),
            settings_menu: None,
            needs_redraw: true,
            spinner: Spinner::new(),
        };
        model.start_load(LoadTrigger::Initial);
        model
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(mut self) -> Session {
        self.loader.cancel(&mut self.session);
        self.session
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key.code) {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Applies any finished load. Returns true when something changed on screen.
    pub fn poll_async(&mut self) -> bool {
        match self.loader.poll(&mut self.session) {
            Some(Ok(delivery)) => {
                self.apply_delivery(delivery);
                true
            }
            Some(Err(LoadError::Offline)) => {
                self.status_message = MSG_NO_CONNECTION.to_string();
                if self.session.is_empty() {
                    self.empty_message = MSG_NO_CONNECTION.to_string();
                }
                let len = self.session.articles().len();
                self.selected = self.selected.min(len.saturating_sub(1));
                self.mark_dirty();
                true
            }
            None => false,
        }
    }

    fn apply_delivery(&mut self, delivery: Delivery) {
        match delivery.trigger {
            LoadTrigger::Refresh => {
                self.selected = 0;
                self.offset.set(0);
            }
            LoadTrigger::Initial if !delivery.from_cache => {
                self.selected = 0;
                self.offset.set(0);
            }
            _ => {}
        }
        let len = self.session.articles().len();
        self.selected = self.selected.min(len.saturating_sub(1));

        if delivery.is_empty_state() {
            self.empty_message = MSG_NO_ARTICLES.to_string();
            self.status_message = MSG_NO_ARTICLES.to_string();
        } else if delivery.fetched == 0 && !delivery.from_cache {
            self.status_message = MSG_UP_TO_DATE.to_string();
        } else {
            self.status_message = format!(
                "{} articles · page {} · {} · {}",
                delivery.total,
                delivery.page,
                self.query.order_by.display_name(),
                self.query.categories.disjunction()
            );
        }
        self.mark_dirty();
    }

    fn start_load(&mut self, trigger: LoadTrigger) {
        self.loader.request(&mut self.session, &self.query, trigger);
        self.spinner.reset();
        self.status_message = match trigger {
            LoadTrigger::Initial => "Loading articles…".to_string(),
            LoadTrigger::Refresh => "Refreshing articles…".to_string(),
            LoadTrigger::NextPage => format!("Loading page {}…", self.session.page),
        };
        self.mark_dirty();
    }

    fn refresh(&mut self) {
        self.selected = 0;
        self.offset.set(0);
        self.start_load(LoadTrigger::Refresh);
    }

    /// Moves the selection; a user-driven move at the end of the list asks for the
    /// next page unless one is already loading.
    fn move_selection(&mut self, delta: isize) {
        let len = self.session.articles().len();
        if len == 0 {
            return;
        }
        let current = self.selected as isize;
        let target = (current + delta).clamp(0, len as isize - 1) as usize;
        if target != self.selected {
            self.selected = target;
            self.mark_dirty();
        }
        if delta > 0 && target + 1 == len && !self.is_loading() {
            self.start_load(LoadTrigger::NextPage);
        }
    }

    fn open_selected(&mut self) {
        let Some(article) = self.session.articles().get(self.selected) else {
            return;
        };
        let url = article.url.clone();
        let title = article.display_title().to_string();
        match webbrowser::open(&url) {
            Ok(_) => {
                info!(%url, "opened article");
                self.status_message = format!("Opened \"{title}\" in your browser.");
            }
            Err(err) => {
                warn!(%url, "failed to open browser: {err}");
                self.status_message = format!("{MSG_NO_BROWSER} ({url})");
            }
        }
        self.mark_dirty();
    }

    /// Returns true when the app should exit.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        if self.settings_menu.is_some() {
            return self.handle_settings_key(code);
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(PAGE_JUMP),
            KeyCode::PageUp => self.move_selection(-PAGE_JUMP),
            KeyCode::Home | KeyCode::Char('g') => {
                self.selected = 0;
                self.mark_dirty();
            }
            KeyCode::End | KeyCode::Char('G') => {
                let len = self.session.articles().len() as isize;
                self.move_selection(len);
            }
            KeyCode::Enter | KeyCode::Char('o') => self.open_selected(),
            KeyCode::Char('r') | KeyCode::Char('R') => self.refresh(),
            KeyCode::Char('s') | KeyCode::Char('S') => self.open_settings(),
            _ => {}
        }
        false
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        if self.settings_menu.is_some() {
            return;
        }
        match event.kind {
            MouseEventKind::ScrollDown => self.move_selection(1),
            MouseEventKind::ScrollUp => self.move_selection(-1),
            _ => {}
        }
    }

    fn open_settings(&mut self) {
        self.settings_menu = Some(SettingsMenu {
            form: FeedSettings::new(self.query.order_by, &self.query.categories),
            cursor: 0,
        });
        self.status_message = "Settings: Space toggles · w saves · Esc cancels".to_string();
        self.mark_dirty();
    }

    fn handle_settings_key(&mut self, code: KeyCode) -> bool {
        let Some(menu) = self.settings_menu.as_mut() else {
            return false;
        };
        let row_count = menu.rows().len();
        match code {
            KeyCode::Esc => {
                self.settings_menu = None;
                self.status_message = "Settings unchanged.".to_string();
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if menu.cursor + 1 < row_count {
                    menu.cursor += 1;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                menu.cursor = menu.cursor.saturating_sub(1);
            }
            KeyCode::Char(' ') | KeyCode::Enter => menu.toggle_current(),
            KeyCode::Char('w') | KeyCode::Char('W') => self.save_settings(),
            _ => {}
        }
        self.mark_dirty();
        false
    }

    fn save_settings(&mut self) {
        let Some(menu) = self.settings_menu.as_ref() else {
            return;
        };
        if !menu.form.is_valid() {
            self.status_message = "Select at least one category.".to_string();
            return;
        }
        let order_by = menu.form.selected_order();
        let categories = menu.form.selected_categories();
        self.settings_menu = None;

        let changed = order_by != self.query.order_by || categories != self.query.categories;
        self.query.order_by = order_by;
        self.query.categories = categories;

        match config::save_feed_settings(self.config_path.clone(), order_by, &self.query.categories)
        {
            Ok(path) => info!(path = %path.display(), "saved feed settings"),
            Err(err) => warn!("{err:#}"),
        }

        if changed {
            self.refresh();
        } else {
            self.status_message = "Settings unchanged.".to_string();
        }
    }

    fn ensure_selected_visible(&self) {
        let rows = (self.view_height.get() as usize / ARTICLE_ROW_HEIGHT).max(1);
        let offset = self.offset.get();
        if self.selected < offset {
            self.offset.set(self.selected);
        } else if self.selected >= offset + rows {
            self.offset.set(self.selected + 1 - rows);
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_articles(frame, layout[1]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if self.settings_menu.is_some() {
            self.draw_settings(frame, layout[1]);
        }
    }

    fn draw_articles(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(Span::styled(
                "STEM News",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1));
        let inner = block.inner(area);
        self.view_height.set(inner.height);
        self.ensure_selected_visible();

        let articles = self.session.articles();
        if articles.is_empty() {
            let message = if self.is_loading() {
                format!("{} Loading articles…", self.spinner.frame())
            } else {
                self.empty_message.clone()
            };
            let empty = Paragraph::new(message)
                .block(block)
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            frame.render_widget(empty, area);
            return;
        }

        let width = inner.width.max(1) as usize;
        let rows = (inner.height as usize / ARTICLE_ROW_HEIGHT).max(1);
        let mut items: Vec<ListItem> = Vec::new();
        for (idx, article) in articles
            .iter()
            .enumerate()
            .skip(self.offset.get())
            .take(rows)
        {
            let selected = idx == self.selected;
            let background = if selected {
                COLOR_PANEL_SELECTED_BG
            } else {
                COLOR_PANEL_BG
            };
            let mut title_style = Style::default().fg(COLOR_TEXT_PRIMARY).bg(background);
            if selected {
                title_style = title_style.add_modifier(Modifier::BOLD);
            }
            let meta_style = Style::default().fg(COLOR_TEXT_SECONDARY).bg(background);
            let date = article.display_date();
            let date_style = if date == crate::article::DATE_UNAVAILABLE {
                meta_style.fg(COLOR_ERROR).add_modifier(Modifier::ITALIC)
            } else {
                meta_style.fg(COLOR_ACCENT)
            };

            let mut lines = vec![
                Line::from(Span::styled(
                    truncate_to_width(article.display_title(), width),
                    title_style,
                )),
                Line::from(vec![
                    Span::styled(
                        truncate_to_width(&article.byline(), width.saturating_sub(20)),
                        meta_style,
                    ),
                    Span::styled(" · ", meta_style),
                    Span::styled(date, date_style),
                ]),
                Line::from(Span::styled(String::new(), Style::default().bg(background))),
            ];
            pad_lines_to_width(&mut lines, inner.width);
            items.push(ListItem::new(lines));
        }

        frame.render_widget(List::new(items).block(block), area);
    }

    fn draw_settings(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(menu) = self.settings_menu.as_ref() else {
            return;
        };
        let popup_area = centered_rect(60, 70, area);
        frame.render_widget(Clear, popup_area);

        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut row = 0usize;
        for pref in menu.form.preferences() {
            lines.push(Line::from(vec![
                Span::styled(
                    pref.title(),
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    format!("  {}", pref.summary()),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                ),
            ]));
            let multi = matches!(pref, crate::settings::Preference::Multi { .. });
            for (idx, choice) in pref.choices().iter().enumerate() {
                let marker = match (multi, pref.is_selected(idx)) {
                    (true, true) => "[x]",
                    (true, false) => "[ ]",
                    (false, true) => "(•)",
                    (false, false) => "( )",
                };
                let style = if row == menu.cursor {
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .bg(COLOR_PANEL_SELECTED_BG)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(COLOR_TEXT_PRIMARY)
                };
                lines.push(Line::from(Span::styled(
                    format!("  {marker} {}", choice.label),
                    style,
                )));
                row += 1;
            }
            lines.push(Line::default());
        }
        if !menu.form.is_valid() {
            lines.push(Line::from(Span::styled(
                "Select at least one category.",
                Style::default().fg(COLOR_ERROR),
            )));
        }

        let body = Paragraph::new(lines)
            .block(
                Block::default()
                    .title(Span::styled(
                        "Settings",
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(body, popup_area);
    }

    fn footer_text(&self) -> String {
        if self.settings_menu.is_some() {
            return "Settings: j/k move · Space toggle · w save · Esc cancel".to_string();
        }
        "j/k move · Enter open · r refresh · s settings · q quit".to_string()
    }
}
