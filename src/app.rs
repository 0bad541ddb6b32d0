use crate::api::ApiClient;
use crate::cache::{
  CacheStore, DurableStorage, FetchError, MemoryStorage, Persister, SqliteStorage, StoreConfig,
  UnloadSignal,
};
use crate::config::{CacheConfig, Config};
use crate::event::{Event, EventHandler};
use crate::ui;
use crate::ui::renderfns::StatusLine;
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::IssueListView;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::{stdout, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

const TICK_RATE: Duration = Duration::from_millis(250);
const GC_INTERVAL: Duration = Duration::from_secs(60);
const STATUS_TTL: Duration = Duration::from_secs(5);

/// Everything a view needs to load data and report back
#[derive(Clone)]
pub struct AppContext {
  pub store: CacheStore,
  pub api: ApiClient,
  pub storage: Arc<dyn DurableStorage>,
  pub config: Arc<Config>,
  pub events: mpsc::UnboundedSender<Event>,
}

impl AppContext {
  pub fn status(&self, message: impl Into<String>) {
    let _ = self.events.send(Event::Status(message.into()));
  }

  pub fn error(&self, message: impl Into<String>) {
    let _ = self.events.send(Event::Error(message.into()));
  }
}

/// Main application state
pub struct App {
  ctx: AppContext,
  events: EventHandler,

  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  status: Option<(StatusLine, Instant)>,
  unload: Arc<UnloadSignal>,
  should_quit: bool,
}

impl App {
  pub fn new(config: Config, persist: bool) -> Result<Self> {
    let events = EventHandler::new(TICK_RATE);
    let api = ApiClient::new(
      &config.api.url,
      Config::get_api_token().as_deref(),
      config.request_timeout(),
    )?;

    let auth_tx = events.sender();
    let store = CacheStore::new(StoreConfig {
      on_auth_error: Some(Arc::new(move |e: &FetchError| {
        let _ = auth_tx.send(Event::Error(format!("{} (check ISSUEDECK_API_TOKEN)", e)));
      })),
      ..config.cache.store_config()
    });

    let storage = open_storage(&config.cache);
    let unload = Arc::new(UnloadSignal::new());
    if persist && config.cache.persist {
      let persister = Arc::new(Persister::new(storage.clone(), config.cache.persist_options()));
      let restored = persister.hydrate(&store);
      info!(restored, "Hydrated cache");
      persister.attach(&unload, store.clone());
    }

    let ctx = AppContext {
      store,
      api,
      storage,
      config: Arc::new(config),
      events: events.sender(),
    };
    let root = IssueListView::new(ctx.clone());

    Ok(Self {
      ctx,
      events,
      view_stack: vec![Box::new(root)],
      status: None,
      unload,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let gc = self.ctx.store.spawn_gc(GC_INTERVAL);
    let result = self.event_loop(&mut terminal).await;
    gc.abort();
    self.shutdown();

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match self.events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  /// Flush pending view state, stop in-flight requests and fire unload hooks.
  fn shutdown(&mut self) {
    for view in self.view_stack.iter_mut().rev() {
      view.on_exit();
    }
    let cancelled = self.ctx.store.requests().cancel_all();
    let hooks = self.unload.fire();
    info!(cancelled, hooks, "Shut down");
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
      Event::Key(_) | Event::Resize => {}
      Event::Tick => {
        for view in &mut self.view_stack {
          view.tick();
        }
        if self.status.as_ref().is_some_and(|(_, at)| at.elapsed() > STATUS_TTL) {
          self.status = None;
        }
      }
      Event::Status(text) => self.set_status(text, false),
      Event::Error(text) => {
        warn!(error = %text, "Background error");
        self.set_status(text, true);
      }
    }
  }

  fn set_status(&mut self, text: String, is_error: bool) {
    self.status = Some((StatusLine { text, is_error }, Instant::now()));
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let Some(view) = self.view_stack.last_mut() else {
      self.should_quit = true;
      return;
    };
    match view.handle_key(key) {
      ViewAction::None => {}
      ViewAction::Push(view) => self.view_stack.push(view),
      ViewAction::Pop => {
        if self.view_stack.len() > 1 {
          if let Some(mut view) = self.view_stack.pop() {
            view.on_exit();
          }
        } else {
          self.should_quit = true;
        }
      }
    }
  }

  pub fn api_url(&self) -> &str {
    &self.ctx.config.api.url
  }

  pub fn breadcrumb(&self) -> Vec<String> {
    self.view_stack.iter().map(|v| v.breadcrumb_label()).collect()
  }

  pub fn shortcuts(&self) -> Vec<Shortcut> {
    self.view_stack.last().map(|v| v.shortcuts()).unwrap_or_default()
  }

  pub fn status(&self) -> Option<&StatusLine> {
    self.status.as_ref().map(|(line, _)| line)
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.view_stack.last_mut()
  }
}

/// SQLite storage at the configured path, or memory if it can't be opened.
fn open_storage(config: &CacheConfig) -> Arc<dyn DurableStorage> {
  match SqliteStorage::open(config.path.as_deref()) {
    Ok(storage) => Arc::new(storage),
    Err(e) => {
      warn!(error = %e, "Falling back to in-memory storage");
      Arc::new(MemoryStorage::new())
    }
  }
}
