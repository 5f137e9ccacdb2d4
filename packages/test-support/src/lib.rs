//! Shared helpers for the refresh-database test suites: logging bootstrap,
//! unique names, and recording fakes of every collaborator contract.

pub mod fakes;
pub mod logging;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use refresh_database::RefreshSession;
use ulid::Ulid;

static SESSION: OnceCell<Arc<RefreshSession>> = OnceCell::new();

/// Process-wide session, so every test of one binary shares the migrated flag.
pub fn shared_session() -> Arc<RefreshSession> {
    SESSION
        .get_or_init(|| Arc::new(RefreshSession::new()))
        .clone()
}

/// Generate a unique string with the given prefix, `{prefix}-{ulid}`.
///
/// # Examples
/// ```
/// use test_support::unique_str;
///
/// let a = unique_str("refresh");
/// let b = unique_str("refresh");
/// assert_ne!(a, b);
/// assert!(a.starts_with("refresh-"));
/// ```
pub fn unique_str(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}

/// A unique SQLite file URL inside `dir`, created on first connect.
pub fn sqlite_file_url(dir: &std::path::Path) -> String {
    let path = dir.join(format!("{}.db", unique_str("refresh")));
    format!("sqlite://{}?mode=rwc", path.display())
}
