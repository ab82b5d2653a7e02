//! Scoped key erasure.
//!
//! Keys of one logical database are enumerated page by page with a server
//! cursor. Every key outside the reserved namespace is deleted; each page is
//! sent as one batch of concurrent deletions and the batch is awaited before
//! the next page is fetched. Batches are not atomic. Re-running an erase is
//! safe because deleting an absent key is a no-op.

use std::pin::pin;

use futures::{Stream, StreamExt, stream};
use tracing::{debug, warn};

use crate::client::{CacheConnection, CacheNode, ClientError, ScanCursor, ScanPage, ScanRequest};

/// Default number of keys requested per scan page.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Default reserved namespace.
pub const DEFAULT_EXCLUDED_PREFIX: &str = "area";

/// Default logical database targeted by scoped erasure.
pub const DEFAULT_ERASE_DATABASE: u32 = 2;

/// Decides which keys belong to the reserved namespace.
///
/// A key is reserved when it starts with `prefix`. Matching is anchored at the
/// start of the key and optionally ignores ASCII case. An empty prefix
/// reserves nothing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyExclusion {
    prefix: String,
    case_sensitive: bool,
}

impl KeyExclusion {
    /// Reserves keys starting with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            prefix: prefix.into(),
            case_sensitive,
        }
    }

    /// Reserves nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            prefix: String::new(),
            case_sensitive: true,
        }
    }

    /// Returns the reserved prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns `true` when `key` must be preserved.
    #[must_use]
    pub fn excludes(&self, key: &str) -> bool {
        if self.prefix.is_empty() {
            return false;
        }
        if self.case_sensitive {
            return key.starts_with(&self.prefix);
        }
        key.as_bytes()
            .get(..self.prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(self.prefix.as_bytes()))
    }
}

impl Default for KeyExclusion {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_PREFIX, true)
    }
}

/// What a scoped erase targets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EraseScope {
    /// Logical database index.
    pub database: u32,
    /// Reserved namespace that is never deleted.
    pub exclusion: KeyExclusion,
    /// Glob forwarded to the server-side scan.
    pub match_pattern: String,
    /// Keys requested per page.
    pub page_size: usize,
}

impl Default for EraseScope {
    fn default() -> Self {
        Self {
            database: DEFAULT_ERASE_DATABASE,
            exclusion: KeyExclusion::default(),
            match_pattern: String::from("*"),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Result of a scoped erase on one node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EraseReport {
    /// Keys queued for deletion.
    pub keys_queued: u64,
    /// Keys the server acknowledged as removed.
    pub keys_removed: u64,
    /// Deletions rejected individually.
    pub failed_deletions: u64,
    /// Keys left alone because they are reserved.
    pub keys_preserved: u64,
    /// Pages fetched.
    pub pages: u64,
    /// Connection-level error that stopped the erase.
    pub error: Option<ClientError>,
    /// Cursor to resume from after an error.
    pub resume_from: Option<ScanCursor>,
}

impl EraseReport {
    /// Returns `true` when the erase ran to completion without a
    /// connection-level error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn stop(&mut self, error: ClientError, resume_from: ScanCursor) {
        self.error = Some(error);
        self.resume_from = Some(resume_from);
    }
}

/// Lazily fetches pages of keys starting at `start`.
///
/// Each item carries the cursor the page was fetched from so a consumer can
/// restart at that page. The stream ends after the page whose next cursor is
/// `None`.
pub fn key_pages<'a, C>(
    connection: &'a C,
    node: &'a CacheNode,
    scope: &'a EraseScope,
    start: ScanCursor,
) -> impl Stream<Item = Result<(ScanCursor, ScanPage), ClientError>> + Send + 'a
where
    C: CacheConnection + ?Sized,
{
    stream::try_unfold(Some(start), move |position| async move {
        let Some(cursor) = position else {
            return Ok(None);
        };
        let request = ScanRequest {
            database: scope.database,
            pattern: &scope.match_pattern,
            cursor,
            count: scope.page_size,
        };
        let page = connection.scan_keys(node, request).await?;
        let next = page.next;
        Ok(Some(((cursor, page), next)))
    })
}

/// Erases every non-reserved key in the scope's database.
pub async fn erase_scoped<C>(connection: &C, node: &CacheNode, scope: &EraseScope) -> EraseReport
where
    C: CacheConnection + ?Sized,
{
    erase_scoped_from(connection, node, scope, ScanCursor::START).await
}

/// Erases non-reserved keys, resuming the scan at `start`.
pub async fn erase_scoped_from<C>(
    connection: &C,
    node: &CacheNode,
    scope: &EraseScope,
    start: ScanCursor,
) -> EraseReport
where
    C: CacheConnection + ?Sized,
{
    let mut report = EraseReport::default();
    let mut position = start;
    let mut pages = pin!(key_pages(connection, node, scope, start));

    while let Some(item) = pages.next().await {
        let (cursor, page) = match item {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(endpoint = %node.address, error = %err, "key scan failed");
                report.stop(err, position);
                return report;
            }
        };
        report.pages += 1;

        let (reserved, doomed): (Vec<String>, Vec<String>) = page
            .keys
            .into_iter()
            .partition(|key| scope.exclusion.excludes(key));
        report.keys_preserved += reserved.len() as u64;

        if !doomed.is_empty() {
            report.keys_queued += doomed.len() as u64;
            match connection.delete_keys(node, scope.database, &doomed).await {
                Ok(batch) => {
                    report.keys_removed += batch.removed;
                    report.failed_deletions += batch.failed;
                }
                Err(err) => {
                    warn!(endpoint = %node.address, error = %err, "delete batch failed");
                    report.stop(err, cursor);
                    return report;
                }
            }
        }

        if let Some(next) = page.next {
            position = next;
        }
    }

    debug!(
        endpoint = %node.address,
        database = scope.database,
        queued = report.keys_queued,
        preserved = report.keys_preserved,
        pages = report.pages,
        "scoped erase finished"
    );
    report
}
