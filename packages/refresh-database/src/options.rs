use crate::contracts::RebuildOptions;

/// Per-fixture overrides for a [`crate::DatabaseRefresher`].
///
/// Every field defaults to "not overridden": the default connection only,
/// and neither views nor types dropped on rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Connections to wrap in a transaction; `None` entries mean the default connection.
    pub connections_to_transact: Option<Vec<Option<String>>>,
    pub drop_views: bool,
    pub drop_types: bool,
}

impl RefreshOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transact on these named connections instead of the default one.
    pub fn with_connections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.connections_to_transact = Some(names.into_iter().map(|n| n.map(Into::into)).collect());
        self
    }

    pub fn with_drop_views(mut self, drop_views: bool) -> Self {
        self.drop_views = drop_views;
        self
    }

    pub fn with_drop_types(mut self, drop_types: bool) -> Self {
        self.drop_types = drop_types;
        self
    }

    /// The ordered connection set: the override without duplicates, else the default.
    pub fn connections_to_transact(&self) -> Vec<Option<String>> {
        match &self.connections_to_transact {
            Some(names) => {
                let mut set: Vec<Option<String>> = Vec::with_capacity(names.len());
                for name in names {
                    if !set.contains(name) {
                        set.push(name.clone());
                    }
                }
                set
            }
            None => vec![None],
        }
    }

    pub fn rebuild_options(&self) -> RebuildOptions {
        RebuildOptions {
            drop_views: self.drop_views,
            drop_types: self.drop_types,
        }
    }
}
