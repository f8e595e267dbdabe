use chrono::Utc;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::utils::{format_age, truncate};
use crate::app::{App, PageState};
use crate::cache::CacheSource;

/// Draw the status bar: data source, refresh errors, prefetch progress and key hints
pub fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
  let (source, color) = match app.state() {
    PageState::Loading => ("loading".to_string(), Color::DarkGray),
    PageState::Failed(_) => ("error".to_string(), Color::Red),
    PageState::Loaded {
      source, cached_at, ..
    } => {
      let label = match cached_at {
        Some(at) => format!("{} · {} old", source.label(), format_age(Utc::now() - *at)),
        None => source.label().to_string(),
      };
      let color = match source {
        CacheSource::Network => Color::Green,
        CacheSource::CacheFresh => Color::Cyan,
        CacheSource::CacheStale => Color::Yellow,
      };
      (label, color)
    }
  };

  let mut spans = vec![
    Span::styled(format!(" {} ", source), Style::default().fg(color)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" prefetch: {} ", app.prefetch_phase().label()),
      Style::default().fg(Color::DarkGray),
    ),
  ];

  if let Some(error) = app.page_error() {
    spans.push(Span::styled("│", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(
      format!(" refresh failed: {} ", truncate(&error, 40)),
      Style::default().fg(Color::Red),
    ));
  }

  if let Some(notice) = app.notice() {
    spans.push(Span::styled("│", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(
      format!(" {} ", truncate(notice, 40)),
      Style::default().fg(Color::Magenta),
    ));
  }

  spans.push(Span::styled(
    format!(
      "  ←/→ page  j/k scroll  {} clear cache  q quit",
      app.clear_hint()
    ),
    Style::default().fg(Color::DarkGray),
  ));

  frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
