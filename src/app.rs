use crate::api::{NewPost, Post, PostPatch, PostsClient};
use crate::cache::{
  reconcile, CacheStore, Entry, FetchError, MutateError, MutationController, MutationHandle,
  MutationStatus, QueryController, QueryKey, Subscription,
};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::ui;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Cache key for the posts collection
fn posts_key() -> QueryKey {
  QueryKey::from("posts")
}

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Posts API client
  client: PostsClient,

  /// Shared cache of server state
  store: CacheStore,

  /// Runs keyed fetches against the store
  queries: QueryController,

  /// Runs writes and reconciles their results into the store
  mutations: MutationController,

  /// Selected row in the posts list
  selected: usize,

  /// Handle to the latest invocation of each mutation. Each has its own
  /// status; a failing delete does not make the add button look busy.
  /// While an invocation is pending, repeat presses of that action are
  /// ignored.
  add_mutation: Option<MutationHandle>,
  update_mutation: Option<MutationHandle>,
  patch_mutation: Option<MutationHandle>,
  delete_mutation: Option<MutationHandle>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Keeps the posts observer registered for the lifetime of the app
  _posts_subscription: Option<Subscription>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let client = PostsClient::new(&config)?;
    let store = CacheStore::new();
    let queries = QueryController::new(store.clone()).with_stale_time(config.stale_time());
    let mutations = MutationController::new(store.clone());
    let (tx, _rx) = mpsc::unbounded_channel();

    Ok(Self {
      config,
      client,
      store,
      queries,
      mutations,
      selected: 0,
      add_mutation: None,
      update_mutation: None,
      patch_mutation: None,
      delete_mutation: None,
      event_tx: tx,
      _posts_subscription: None,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create event handler
    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    // Forward cache notifications into the event loop so writes from
    // background tasks trigger a redraw
    let tx = self.event_tx.clone();
    self._posts_subscription = Some(self.store.subscribe(&posts_key(), move |entry| {
      let key = entry.map(|e| e.key.clone()).unwrap_or_else(posts_key);
      let _ = tx.send(Event::Cache(key));
    }));

    // Initial data load
    self.fetch_posts(false);

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| ui::draw(frame, self))?;

      // Handle events
      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {} // UI refresh happens automatically
      Event::Cache(key) => {
        debug!(key = %key, "cache changed");
        self.clamp_selection();
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match key.code {
      // Quit
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Navigation
      KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
      KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),

      // Refetch and mutations
      KeyCode::Char('r') => self.fetch_posts(true),
      KeyCode::Char('a') => self.add_post(),
      KeyCode::Char('u') => self.update_post(),
      KeyCode::Char('p') => self.patch_post(),
      KeyCode::Char('d') => self.delete_post(),

      _ => {}
    }
  }

  /// Fetch the posts list. Without `force` a fresh cached list is reused
  /// and a fetch that is already running is joined instead of duplicated.
  fn fetch_posts(&self, force: bool) {
    let client = self.client.clone();
    let fetch = move || async move {
      client
        .list_posts()
        .await
        .map_err(|e| FetchError::new(e.to_string()))
    };
    let run = if force {
      self.queries.refetch(&posts_key(), fetch)
    } else {
      self.queries.run(&posts_key(), fetch)
    };
    debug!(key = %run.key(), status = ?run.entry().status, "posts fetch requested");
  }

  fn add_post(&mut self) {
    // one in-flight invocation per action
    if self.add_mutation.as_ref().is_some_and(MutationHandle::is_pending) {
      return;
    }
    let client = self.client.clone();
    let new_post = NewPost {
      user_id: 1,
      title: "New Post".to_string(),
      body: "This is a new post".to_string(),
    };
    let handle = self.mutations.run(
      new_post,
      move |new_post| async move {
        client
          .create_post(&new_post)
          .await
          .map_err(|e| MutateError::new(e.to_string()))
      },
      |store: &CacheStore, result: &Result<Post, MutateError>| {
        if let Ok(created) = result {
          reconcile::append(store, &posts_key(), created);
        }
      },
    );
    self.add_mutation = Some(handle);
  }

  fn update_post(&mut self) {
    if self.update_mutation.as_ref().is_some_and(MutationHandle::is_pending) {
      return;
    }
    let current = match self.selected_post() {
      Some(post) => post,
      None => return,
    };
    let client = self.client.clone();
    let updated = Post {
      title: "Updated Post".to_string(),
      body: "This post has been updated".to_string(),
      ..current
    };
    let handle = self.mutations.run(
      updated,
      move |post| async move {
        client
          .update_post(&post)
          .await
          .map_err(|e| MutateError::new(e.to_string()))
      },
      |store: &CacheStore, result: &Result<Post, MutateError>| {
        if let Ok(updated) = result {
          reconcile::replace_matching(store, &posts_key(), "id", updated);
        }
      },
    );
    self.update_mutation = Some(handle);
  }

  fn patch_post(&mut self) {
    if self.patch_mutation.as_ref().is_some_and(MutationHandle::is_pending) {
      return;
    }
    let current = match self.selected_post() {
      Some(post) => post,
      None => return,
    };
    let client = self.client.clone();
    let patch = PostPatch {
      title: Some("Patched Post".to_string()),
      body: None,
    };
    let handle = self.mutations.run(
      (current.id, patch),
      move |(id, patch)| async move {
        client
          .patch_post(id, &patch)
          .await
          .map_err(|e| MutateError::new(e.to_string()))
      },
      |store: &CacheStore, result: &Result<Post, MutateError>| {
        if let Ok(patched) = result {
          reconcile::replace_matching(store, &posts_key(), "id", patched);
        }
      },
    );
    self.patch_mutation = Some(handle);
  }

  fn delete_post(&mut self) {
    if self.delete_mutation.as_ref().is_some_and(MutationHandle::is_pending) {
      return;
    }
    let id = match self.selected_post() {
      Some(post) => post.id,
      None => return,
    };
    let client = self.client.clone();
    let handle = self.mutations.run(
      id,
      move |id| async move {
        client
          .delete_post(id)
          .await
          .map_err(|e| MutateError::new(e.to_string()))
      },
      |store: &CacheStore, result: &Result<u64, MutateError>| {
        if let Ok(deleted) = result {
          reconcile::remove_matching(store, &posts_key(), "id", deleted);
        }
      },
    );
    self.delete_mutation = Some(handle);
  }

  fn move_selection(&mut self, delta: i32) {
    let len = self.posts().len();
    if len > 0 {
      self.selected = (self.selected as i32 + delta).rem_euclid(len as i32) as usize;
    }
  }

  /// Keep the selection on a real row after the list shrank
  fn clamp_selection(&mut self) {
    let len = self.posts().len();
    if len == 0 {
      self.selected = 0;
    } else if self.selected >= len {
      self.selected = len - 1;
    }
  }

  fn selected_post(&self) -> Option<Post> {
    self.posts().into_iter().nth(self.selected)
  }

  // Accessors for UI rendering
  pub fn posts_entry(&self) -> Option<Entry> {
    self.store.get(&posts_key())
  }

  pub fn posts(&self) -> Vec<Post> {
    self
      .posts_entry()
      .and_then(|entry| entry.data::<Vec<Post>>())
      .unwrap_or_default()
  }

  pub fn selected(&self) -> usize {
    self.selected
  }

  pub fn mutation_statuses(&self) -> [(&'static str, MutationStatus); 4] {
    [
      ("add", status_of(&self.add_mutation)),
      ("update", status_of(&self.update_mutation)),
      ("patch", status_of(&self.patch_mutation)),
      ("delete", status_of(&self.delete_mutation)),
    ]
  }

  pub fn api_url(&self) -> &str {
    &self.config.api_url
  }
}

fn status_of(handle: &Option<MutationHandle>) -> MutationStatus {
  handle
    .as_ref()
    .map(MutationHandle::status)
    .unwrap_or(MutationStatus::Idle)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn seeded_app(posts: serde_json::Value) -> App {
    let app = App::new(Config::default()).unwrap();
    app.store.set(&posts_key(), |entry| entry.into_success(posts));
    app
  }

  #[test]
  fn test_selection_wraps_around_the_list() {
    let mut app = seeded_app(json!([
      { "userId": 1, "id": 1, "title": "first", "body": "" },
      { "userId": 1, "id": 2, "title": "second", "body": "" },
    ]));
    assert_eq!(app.posts().len(), 2);
    app.move_selection(-1);
    assert_eq!(app.selected(), 1);
    app.move_selection(1);
    assert_eq!(app.selected(), 0);
  }

  #[test]
  fn test_selection_clamps_after_the_list_shrinks() {
    let mut app = seeded_app(json!([
      { "userId": 1, "id": 1, "title": "first", "body": "" },
      { "userId": 1, "id": 2, "title": "second", "body": "" },
      { "userId": 1, "id": 3, "title": "third", "body": "" },
    ]));
    app.selected = 2;
    app.store.set(&posts_key(), |entry| {
      entry.with_value(json!([{ "userId": 1, "id": 1, "title": "first", "body": "" }]))
    });
    app.clamp_selection();
    assert_eq!(app.selected(), 0);
  }

  #[test]
  fn test_mutations_start_idle() {
    let app = App::new(Config::default()).unwrap();
    for (_, status) in app.mutation_statuses() {
      assert_eq!(status, MutationStatus::Idle);
    }
  }
}
