//! The site's pages and the static list of datasets warmed in the background.

use clap::ValueEnum;
use serde::Deserialize;
use std::time::Duration;

use crate::cache::QueryKey;

const MINUTE: u64 = 60;

/// Static description of one background-warmable dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchDescriptor {
  /// Segments of the query key the payload is cached under
  pub key: &'static [&'static str],
  /// Content API endpoint the payload is fetched from
  pub endpoint: &'static str,
  pub stale_time: Duration,
}

impl PrefetchDescriptor {
  pub fn query_key(&self) -> QueryKey {
    QueryKey::from(self.key)
  }
}

/// A top-level page of the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Page {
  Home,
  Projects,
  About,
  Connect,
  Press,
}

impl Page {
  /// Pages in navigation order.
  pub const ALL: [Page; 5] = [
    Page::Home,
    Page::Projects,
    Page::About,
    Page::Connect,
    Page::Press,
  ];

  pub const fn descriptor(self) -> PrefetchDescriptor {
    match self {
      Page::Home => PrefetchDescriptor {
        key: &["home"],
        endpoint: "home?populate=*",
        stale_time: Duration::from_secs(5 * MINUTE),
      },
      Page::Projects => PrefetchDescriptor {
        key: &["projects"],
        endpoint: "projects?populate=*&sort=year:desc",
        stale_time: Duration::from_secs(10 * MINUTE),
      },
      Page::About => PrefetchDescriptor {
        key: &["about"],
        endpoint: "about?populate=*",
        stale_time: Duration::from_secs(30 * MINUTE),
      },
      Page::Connect => PrefetchDescriptor {
        key: &["connect"],
        endpoint: "connect?populate=*",
        stale_time: Duration::from_secs(30 * MINUTE),
      },
      Page::Press => PrefetchDescriptor {
        key: &["press-articles"],
        endpoint: "press-articles?populate=*&sort=date:desc",
        stale_time: Duration::from_secs(10 * MINUTE),
      },
    }
  }

  pub fn query_key(self) -> QueryKey {
    self.descriptor().query_key()
  }

  pub fn endpoint(self) -> &'static str {
    self.descriptor().endpoint
  }

  pub fn stale_time(self) -> Duration {
    self.descriptor().stale_time
  }

  pub fn title(self) -> &'static str {
    match self {
      Page::Home => "Home",
      Page::Projects => "Projects",
      Page::About => "About",
      Page::Connect => "Connect",
      Page::Press => "Press",
    }
  }

  fn index(self) -> usize {
    Self::ALL.iter().position(|page| *page == self).unwrap_or(0)
  }

  /// Next page in navigation order, wrapping around.
  pub fn next(self) -> Page {
    Self::ALL[(self.index() + 1) % Self::ALL.len()]
  }

  /// Previous page in navigation order, wrapping around.
  pub fn prev(self) -> Page {
    Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
  }
}

/// Datasets warmed after the current page is on screen, in fetch order.
pub static PREFETCH_PAGES: [PrefetchDescriptor; 5] = [
  Page::Home.descriptor(),
  Page::Projects.descriptor(),
  Page::Press.descriptor(),
  Page::About.descriptor(),
  Page::Connect.descriptor(),
];
