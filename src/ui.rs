use crate::app::App;
use crate::cache::{Entry, MutationStatus};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Min(1),    // Posts list
      Constraint::Length(1), // Mutation statuses
      Constraint::Length(1), // Key hints
    ])
    .split(frame.area());

  draw_posts(frame, chunks[0], app);
  draw_mutation_bar(frame, chunks[1], app);
  draw_hints(frame, chunks[2]);
}

fn draw_posts(frame: &mut Frame, area: Rect, app: &App) {
  let posts = app.posts();
  let entry = app.posts_entry();
  let loading = entry.as_ref().is_some_and(Entry::is_loading);
  let failed = entry.as_ref().is_some_and(Entry::is_error);

  let title = if loading {
    " Posts (loading...) ".to_string()
  } else if failed {
    let message = entry
      .as_ref()
      .and_then(|e| e.error.as_ref())
      .map(|e| e.message())
      .unwrap_or("unknown");
    format!(" Posts (error: {}) ", truncate(message, 60))
  } else {
    format!(" Posts ({}) ", posts.len())
  };

  let block = Block::default()
    .title(title)
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if posts.is_empty() && !loading {
    let content = if failed {
      "Failed to load posts. Press 'r' to retry."
    } else {
      "No posts. Press 'a' to add one or 'r' to fetch."
    };
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = posts
    .iter()
    .map(|post| {
      let line = Line::from(vec![
        Span::styled(format!("{:>4}", post.id), Style::default().fg(Color::Cyan)),
        Span::raw("  "),
        Span::raw(format!("{:<44}", truncate(&post.title, 42))),
        Span::styled(truncate(&post.body, 60), Style::default().fg(Color::DarkGray)),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut list_state = ListState::default().with_selected(Some(app.selected()));
  frame.render_stateful_widget(list, area, &mut list_state);
}

/// One status chip per mutation; each reflects only its own invocation
fn draw_mutation_bar(frame: &mut Frame, area: Rect, app: &App) {
  let mut spans = vec![Span::styled(
    format!(" {} ", app.api_url()),
    Style::default().fg(Color::DarkGray),
  )];
  for (name, status) in app.mutation_statuses() {
    spans.push(Span::raw("  "));
    spans.push(Span::styled(
      format!("{}: {}", name, status_label(&status)),
      status_style(&status),
    ));
  }

  let paragraph = Paragraph::new(Line::from(spans));
  frame.render_widget(paragraph, area);
}

fn draw_hints(frame: &mut Frame, area: Rect) {
  let hint = " a:add  u:update  p:patch  d:delete  r:refetch  j/k:nav  q:quit";
  let paragraph = Paragraph::new(hint).style(Style::default().fg(Color::DarkGray));
  frame.render_widget(paragraph, area);
}

fn status_label(status: &MutationStatus) -> String {
  match status {
    MutationStatus::Idle => "idle".to_string(),
    MutationStatus::Pending => "pending...".to_string(),
    MutationStatus::Success => "ok".to_string(),
    MutationStatus::Error(e) => format!("error ({})", truncate(e.message(), 24)),
  }
}

fn status_style(status: &MutationStatus) -> Style {
  match status {
    MutationStatus::Idle => Style::default().fg(Color::DarkGray),
    MutationStatus::Pending => Style::default().fg(Color::Yellow),
    MutationStatus::Success => Style::default().fg(Color::Green),
    MutationStatus::Error(_) => Style::default().fg(Color::Red),
  }
}

/// Truncate a string to a maximum length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", cut)
  }
}
