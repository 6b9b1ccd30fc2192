//! Turns a bounded page fetch into a complete-collection fetch.
//!
//! The provider caps every list call at a few hundred items, so anything that
//! wants "all of it" goes through [`Aggregator::collect`]: a size-1 probe to
//! learn the declared total, then strictly sequential pages until the target
//! is reached, a short page arrives, or a page fails.

use std::future::Future;
use crate::api::Collection;
use crate::errors::Result;

/// Progress callback, invoked with `(offset, target)` before each page.
pub type ProgressFn<'a> = dyn FnMut(usize, usize) + Send + 'a;

/// Default page size for list methods.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Page size for the recommendation method.
pub const RECOMMENDATIONS_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregator {
    page_size: usize,
    max_results: Option<usize>,
}

impl Aggregator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            max_results: None,
        }
    }

    /// Upper bound on the number of items collected.
    pub fn with_max_results(mut self, max_results: Option<usize>) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Collects every page that `fetch(offset, count)` yields.
    ///
    /// Any failing call, the probe included, aborts the whole run and its error
    /// is returned; items gathered so far are dropped. The result never holds
    /// more than `min(declared total, max_results)` items: if the provider's
    /// count grows mid-run the surplus is clipped, if it shrinks the run ends
    /// on the first short page.
    pub async fn collect<T, F, Fut>(
        &self,
        mut fetch: F,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Collection<T>>
    where
        F: FnMut(usize, usize) -> Fut,
        Fut: Future<Output = Result<Collection<T>>>,
    {
        let probe = fetch(0, 1).await?;
        let declared = probe.total_count;
        let target = match self.max_results {
            Some(cap) => declared.min(cap),
            None => declared,
        };

        log::debug!(
            "[PAGE] Declared total {}, collecting {} in pages of {}",
            declared,
            target,
            self.page_size
        );

        if target == 0 {
            return Ok(Collection::empty());
        }

        let mut items = Vec::with_capacity(target);
        let mut offset = 0;

        while offset < target {
            if let Some(report) = progress.as_mut() {
                report(offset, target);
            }

            let page = match fetch(offset, self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    log::warn!("[PAGE] Page at offset {} failed: {}", offset, e);
                    return Err(e);
                }
            };

            let received = page.items.len();
            items.extend(page.items);
            offset += self.page_size;

            if received < self.page_size {
                log::debug!("[PAGE] Short page ({} < {}), stopping", received, self.page_size);
                break;
            }
        }

        items.truncate(target);
        log::info!("[PAGE] Collected {} of {} items", items.len(), target);

        Ok(Collection {
            items,
            total_count: target,
            offset: 0,
        })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}
