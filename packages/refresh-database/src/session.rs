use std::sync::atomic::{AtomicBool, Ordering};

/// Test-session state shared by every refresher of one test process.
///
/// Holds the "migrated" flag: once a rebuild has been torn down successfully
/// the schema is assumed current for the rest of the session. Suites
/// usually keep one session in a `OnceCell` and hand it to each refresher.
#[derive(Debug, Default)]
pub struct RefreshSession {
    migrated: AtomicBool,
}

impl RefreshSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated.load(Ordering::Acquire)
    }

    /// One-way: there is no reset for the lifetime of the session.
    pub(crate) fn mark_migrated(&self) {
        self.migrated.store(true, Ordering::Release);
    }
}
