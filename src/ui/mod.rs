mod renderfns;

use crate::app::{App, PageState};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use renderfns::{draw_footer, draw_header};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Page content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  draw_header(frame, chunks[0], app.content_url(), app.page());
  draw_page(frame, chunks[1], app);
  draw_footer(frame, chunks[2], app);
}

fn draw_page(frame: &mut Frame, area: Rect, app: &App) {
  let block = Block::default()
    .borders(Borders::ALL)
    .title(format!(" {} ", app.page().title()));

  let paragraph = match app.state() {
    PageState::Loading => {
      Paragraph::new("Loading...").style(Style::default().fg(Color::DarkGray))
    }
    PageState::Failed(error) => Paragraph::new(format!("Could not load page: {}", error))
      .style(Style::default().fg(Color::Red))
      .wrap(Wrap { trim: false }),
    PageState::Loaded { data, .. } => {
      let body = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
      Paragraph::new(body).scroll((app.scroll(), 0))
    }
  };

  frame.render_widget(paragraph.block(block), area);
}
