use crate::cache::{CacheResult, CacheSource, QueryCache, QueryStatus};
use crate::config::Config;
use crate::content::{ContentSource, Page, PREFETCH_PAGES};
use crate::event::{Event, EventHandler, PageEvent};
use crate::prefetch::{PrefetchController, PrefetchPhase, PrefetchReport};
use crate::trigger::ClearTrigger;
use crate::ui;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use serde_json::Value;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the body of the screen shows
#[derive(Debug)]
pub enum PageState {
  Loading,
  Loaded {
    data: Value,
    source: CacheSource,
    cached_at: Option<DateTime<Utc>>,
  },
  Failed(String),
}

/// Main application state
pub struct App {
  config: Config,

  cache: QueryCache,

  source: Arc<dyn ContentSource>,

  trigger: ClearTrigger,

  /// Page on screen
  page: Page,
  state: PageState,
  scroll: u16,

  /// Prefetch run for the current page load
  prefetch: Arc<PrefetchController>,
  prefetch_task: Option<JoinHandle<PrefetchReport>>,

  /// Fired after the first frame of a page load is drawn
  page_loaded: Option<oneshot::Sender<()>>,

  /// One-line notice shown in the footer
  notice: Option<String>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config, cache: QueryCache, source: Arc<dyn ContentSource>) -> Result<Self> {
    let trigger = config.clear_trigger()?;
    let page = config.start_page();
    let prefetch = Arc::new(Self::new_prefetch(&config, &cache, &source));
    let (tx, _rx) = mpsc::unbounded_channel();

    Ok(Self {
      config,
      cache,
      source,
      trigger,
      page,
      state: PageState::Loading,
      scroll: 0,
      prefetch,
      prefetch_task: None,
      page_loaded: None,
      notice: None,
      event_tx: tx,
      should_quit: false,
    })
  }

  fn new_prefetch(
    config: &Config,
    cache: &QueryCache,
    source: &Arc<dyn ContentSource>,
  ) -> PrefetchController {
    PrefetchController::new(
      cache.clone(),
      Arc::clone(source),
      &PREFETCH_PAGES,
      config.prefetch_settings(),
    )
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create event handler
    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    self.start_page_load();

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| ui::draw(frame, self))?;

      // The first drawn frame is the end of the page load
      if let Some(loaded) = self.page_loaded.take() {
        let _ = loaded.send(());
      }

      // Handle events
      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    self.cache.flush();
    Ok(())
  }

  /// Begin a fresh page load: fetch the current page and arm the prefetcher.
  fn start_page_load(&mut self) {
    self.load_page();

    if !self.config.prefetch.enabled {
      return;
    }

    let (loaded_tx, loaded_rx) = oneshot::channel();
    self.page_loaded = Some(loaded_tx);
    let page_loaded = async move {
      let _ = loaded_rx.await;
    };
    self.prefetch_task = self.prefetch.start(page_loaded, Some(self.page.query_key()));
  }

  fn load_page(&mut self) {
    self.state = PageState::Loading;
    self.scroll = 0;

    tokio::spawn(load_page_task(
      self.cache.clone(),
      Arc::clone(&self.source),
      self.page,
      self.event_tx.clone(),
    ));
  }

  /// Clear the cache and start over as if the program had just launched.
  fn reload(&mut self) {
    if let Some(task) = self.prefetch_task.take() {
      task.abort();
    }
    self.trigger.fire(&self.cache);
    self.prefetch = Arc::new(Self::new_prefetch(&self.config, &self.cache, &self.source));
    self.notice = Some("Cache cleared".to_string());
    info!(page = ?self.page, "Reloading after cache clear");
    self.start_page_load();
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {} // UI refresh happens automatically
      Event::Page(page_event) => self.handle_page_event(page_event),
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if self.trigger.matches(&key) {
      self.reload();
      return;
    }
    if key.kind != KeyEventKind::Press {
      return;
    }

    match key.code {
      // Quit
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Pages
      KeyCode::Right | KeyCode::Tab | KeyCode::Char('l') => self.navigate(self.page.next()),
      KeyCode::Left | KeyCode::BackTab | KeyCode::Char('h') => self.navigate(self.page.prev()),
      KeyCode::Char(c @ '1'..='5') => {
        let index = c as usize - '1' as usize;
        self.navigate(Page::ALL[index]);
      }

      // Scrolling
      KeyCode::Up | KeyCode::Char('k') => self.scroll = self.scroll.saturating_sub(1),
      KeyCode::Down | KeyCode::Char('j') => self.scroll = self.scroll.saturating_add(1),
      KeyCode::PageUp => self.scroll = self.scroll.saturating_sub(20),
      KeyCode::PageDown => self.scroll = self.scroll.saturating_add(20),

      _ => {}
    }
  }

  fn navigate(&mut self, page: Page) {
    if page == self.page {
      return;
    }
    self.page = page;
    self.notice = None;
    self.load_page();
  }

  fn handle_page_event(&mut self, event: PageEvent) {
    match event {
      PageEvent::Loaded { page, result } if page == self.page => {
        self.state = PageState::Loaded {
          data: result.data,
          source: result.source,
          cached_at: result.cached_at,
        };
      }
      PageEvent::Failed { page, error } if page == self.page => {
        warn!(?page, error = %error, "Page failed to load");
        self.state = PageState::Failed(error);
      }
      // Result for a page we've navigated away from; it is cached regardless
      _ => {}
    }
  }

  // Accessors for UI rendering
  pub fn page(&self) -> Page {
    self.page
  }

  pub fn state(&self) -> &PageState {
    &self.state
  }

  pub fn scroll(&self) -> u16 {
    self.scroll
  }

  pub fn content_url(&self) -> &str {
    &self.config.content.url
  }

  pub fn prefetch_phase(&self) -> PrefetchPhase {
    self.prefetch.phase()
  }

  pub fn notice(&self) -> Option<&str> {
    self.notice.as_deref()
  }

  /// Last error recorded for the page on screen, when stale data is shown over it.
  pub fn page_error(&self) -> Option<String> {
    if !matches!(self.state, PageState::Loaded { .. }) {
      return None;
    }
    self
      .cache
      .get(&self.page.query_key())
      .filter(|record| record.status == QueryStatus::Error)
      .and_then(|record| record.error)
  }

  pub fn clear_hint(&self) -> String {
    self.trigger.combo().to_string()
  }
}

/// Load `page` through the cache and report back. A page served stale is
/// reported a second time once its background refresh has settled.
async fn load_page_task(
  cache: QueryCache,
  source: Arc<dyn ContentSource>,
  page: Page,
  tx: mpsc::UnboundedSender<Event>,
) {
  let key = page.query_key();
  let stale_time = page.stale_time();
  let mut updates = cache.subscribe();

  let result = cache
    .fetch(&key, stale_time, move || source.fetch(page.endpoint()))
    .await;

  let result = match result {
    Ok(result) => result,
    Err(e) => {
      let _ = tx.send(Event::Page(PageEvent::Failed {
        page,
        error: e.to_string(),
      }));
      return;
    }
  };

  let served_at = result.cached_at;
  let stale = result.source == CacheSource::CacheStale;
  if tx.send(Event::Page(PageEvent::Loaded { page, result })).is_err() || !stale {
    return;
  }

  while cache.is_refreshing(&key) {
    if updates.changed().await.is_err() {
      return;
    }
  }

  let Some(record) = cache.get(&key) else {
    return;
  };
  if let (Some(data), Some(updated_at)) = (record.data.clone(), record.data_updated_at) {
    let refreshed = Some(updated_at) != served_at;
    let still_stale = record.is_stale_for(Utc::now(), stale_time);
    debug!(?page, refreshed, "Background refresh settled");
    let _ = tx.send(Event::Page(PageEvent::Loaded {
      page,
      result: CacheResult::from_cache(data, updated_at, still_stale),
    }));
  }
}
