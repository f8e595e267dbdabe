use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::content::Page;

/// Draw the header bar with logo, content host, and page tabs
pub fn draw_header(frame: &mut Frame, area: Rect, content_url: &str, current: Page) {
  // Extract domain from URL
  let domain = extract_domain(content_url);

  let mut spans = vec![
    Span::styled(" folio ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", domain), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::raw(" "),
  ];

  for (index, page) in Page::ALL.iter().enumerate() {
    let style = if *page == current {
      Style::default().fg(Color::Yellow).bold()
    } else {
      Style::default().fg(Color::DarkGray)
    };
    spans.push(Span::styled(format!("<{}>", index + 1), Style::default().fg(Color::Cyan)));
    spans.push(Span::styled(format!(" {}   ", page.title()), style));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}

/// Extract domain from the content API URL
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_domain() {
    assert_eq!(
      extract_domain("https://cms.studio.example"),
      "cms.studio.example"
    );
    assert_eq!(
      extract_domain("https://studio.example/cms"),
      "studio.example"
    );
    assert_eq!(extract_domain("http://localhost:1337"), "localhost:1337");
  }
}
