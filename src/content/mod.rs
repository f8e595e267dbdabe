//! Access to the portfolio content API.

mod client;
mod pages;

pub use client::{ContentClient, ContentSource};
#[cfg(test)]
pub use client::FetchError;
pub use pages::{Page, PrefetchDescriptor, PREFETCH_PAGES};
