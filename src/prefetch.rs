//! Sequential background prefetch of secondary pages.
//!
//! After the current page is on screen and its own query has data, the
//! controller walks a static list of [`PrefetchDescriptor`]s one at a time,
//! pausing between requests so a cold content backend is never hit with a
//! burst. One controller is created per page load; its latch guarantees the
//! walk starts at most once.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{QueryCache, QueryKey};
use crate::content::{ContentSource, PrefetchDescriptor};

/// Where a prefetch run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchPhase {
  NotStarted,
  WaitingForPageLoad,
  WaitingForPrimaryQuery,
  /// Working on the descriptor at this index
  Draining(usize),
  Done,
}

impl PrefetchPhase {
  pub fn label(&self) -> String {
    match self {
      Self::NotStarted => "idle".to_string(),
      Self::WaitingForPageLoad => "waiting for page".to_string(),
      Self::WaitingForPrimaryQuery => "waiting for page data".to_string(),
      Self::Draining(index) => format!("warming {}", index + 1),
      Self::Done => "done".to_string(),
    }
  }
}

/// Timing of a prefetch run.
#[derive(Debug, Clone)]
pub struct PrefetchSettings {
  /// Pause after the page has loaded before anything else happens
  pub settle_delay: Duration,
  /// How long to wait for the current page's data before giving up on the run
  pub primary_wait_budget: Duration,
  /// Pause between two prefetch requests
  pub inter_request_delay: Duration,
  /// Pause after a request that timed out
  pub timeout_backoff: Duration,
}

impl Default for PrefetchSettings {
  fn default() -> Self {
    Self {
      settle_delay: Duration::from_millis(2000),
      primary_wait_budget: Duration::from_millis(15000),
      inter_request_delay: Duration::from_millis(1000),
      timeout_backoff: Duration::from_millis(5000),
    }
  }
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
  /// Descriptors fetched from the network
  pub fetched: usize,
  /// Descriptors that already had fresh data
  pub skipped: usize,
  /// Descriptors whose fetch failed
  pub failed: usize,
  /// The primary query never produced data; nothing was prefetched
  pub aborted: bool,
}

/// Owns the prefetch state for one page load.
pub struct PrefetchController {
  cache: QueryCache,
  source: Arc<dyn ContentSource>,
  descriptors: Vec<PrefetchDescriptor>,
  settings: PrefetchSettings,
  started: AtomicBool,
  phase: watch::Sender<PrefetchPhase>,
}

impl PrefetchController {
  pub fn new(
    cache: QueryCache,
    source: Arc<dyn ContentSource>,
    descriptors: &[PrefetchDescriptor],
    settings: PrefetchSettings,
  ) -> Self {
    let (phase, _) = watch::channel(PrefetchPhase::NotStarted);
    Self {
      cache,
      source,
      descriptors: descriptors.to_vec(),
      settings,
      started: AtomicBool::new(false),
      phase,
    }
  }

  pub fn phase(&self) -> PrefetchPhase {
    *self.phase.borrow()
  }

  #[cfg(test)]
  pub fn subscribe(&self) -> watch::Receiver<PrefetchPhase> {
    self.phase.subscribe()
  }

  fn set_phase(&self, phase: PrefetchPhase) {
    debug!(?phase, "Prefetch phase");
    self.phase.send_replace(phase);
  }

  /// Start the run. Only the first call does anything; later calls return `None`.
  ///
  /// `page_loaded` resolves once the current page has been rendered.
  /// `primary` is the current page's own query, if it declares one.
  pub fn start<L>(
    self: &Arc<Self>,
    page_loaded: L,
    primary: Option<QueryKey>,
  ) -> Option<JoinHandle<PrefetchReport>>
  where
    L: Future<Output = ()> + Send + 'static,
  {
    if self.started.swap(true, Ordering::AcqRel) {
      debug!("Prefetch already started for this page load");
      return None;
    }

    self.set_phase(PrefetchPhase::WaitingForPageLoad);
    let controller = Arc::clone(self);
    Some(tokio::spawn(async move {
      controller.run(page_loaded, primary).await
    }))
  }

  async fn run<L>(&self, page_loaded: L, primary: Option<QueryKey>) -> PrefetchReport
  where
    L: Future<Output = ()>,
  {
    page_loaded.await;
    tokio::time::sleep(self.settings.settle_delay).await;

    let primary_ready = match &primary {
      Some(key) => self.wait_for_primary(key).await,
      None => true,
    };
    let report = if primary_ready {
      self.drain().await
    } else {
      PrefetchReport {
        aborted: true,
        ..PrefetchReport::default()
      }
    };

    info!(
      fetched = report.fetched,
      skipped = report.skipped,
      failed = report.failed,
      aborted = report.aborted,
      "Background prefetch finished"
    );
    self.set_phase(PrefetchPhase::Done);
    report
  }

  /// Wait for the current page's own data. False once the budget runs out.
  async fn wait_for_primary(&self, key: &QueryKey) -> bool {
    self.set_phase(PrefetchPhase::WaitingForPrimaryQuery);
    let waited = tokio::time::timeout(
      self.settings.primary_wait_budget,
      self.cache.wait_for_data(key),
    )
    .await;

    if waited.is_err() {
      warn!(
        key = %key,
        budget_ms = self.settings.primary_wait_budget.as_millis() as u64,
        "Current page data did not arrive in time, skipping background prefetch"
      );
      return false;
    }
    true
  }

  async fn drain(&self) -> PrefetchReport {
    let mut report = PrefetchReport::default();
    let mut pause: Option<Duration> = None;

    for (index, descriptor) in self.descriptors.iter().enumerate() {
      self.set_phase(PrefetchPhase::Draining(index));

      // Let pending foreground work run first
      tokio::task::yield_now().await;

      let key = descriptor.query_key();
      if self.cache.is_fresh(&key, descriptor.stale_time) {
        debug!(key = %key, "Already cached, not prefetching");
        report.skipped += 1;
        continue;
      }

      if let Some(pause) = pause.take() {
        tokio::time::sleep(pause).await;
      }

      let source = Arc::clone(&self.source);
      let endpoint = descriptor.endpoint;
      let attempt = self
        .cache
        .prefetch(&key, descriptor.stale_time, move || source.fetch(endpoint));

      match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(Ok(true)) => {
          debug!(key = %key, "Prefetched");
          report.fetched += 1;
          pause = Some(self.settings.inter_request_delay);
        }
        Ok(Ok(false)) => {
          report.skipped += 1;
        }
        Ok(Err(e)) => {
          warn!(key = %key, error = %e, "Prefetch failed, continuing");
          report.failed += 1;
          pause = Some(if e.is_timeout() {
            self.settings.timeout_backoff
          } else {
            self.settings.inter_request_delay
          });
        }
        Err(_) => {
          warn!(key = %key, "Prefetch panicked, continuing");
          report.failed += 1;
          pause = Some(self.settings.inter_request_delay);
        }
      }
    }

    report
  }
}
