/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Human-readable age such as "12s", "4m" or "3h"
pub fn format_age(age: chrono::Duration) -> String {
  let seconds = age.num_seconds().max(0);
  match seconds {
    0..=59 => format!("{}s", seconds),
    60..=3599 => format!("{}m", seconds / 60),
    3600..=86399 => format!("{}h", seconds / 3600),
    _ => format!("{}d", seconds / 86400),
  }
}
