//! Named cache generations holding stored responses

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::http::{Response, ResponseSource};

/// Storage for cached responses, partitioned by generation name.
///
/// Only one generation is live at a time; older ones are deleted when a
/// new router activates.
pub trait ResponseCache: Send + Sync {
    /// Names of every generation that holds at least one entry
    fn generations(&self) -> Result<Vec<String>>;
    /// Drop a generation, returning how many entries it held
    fn delete_generation(&self, generation: &str) -> Result<usize>;
    fn get(&self, generation: &str, path: &str) -> Result<Option<Response>>;
    fn put(&self, generation: &str, path: &str, response: &Response) -> Result<()>;
}

/// In-memory [`ResponseCache`], for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<(String, String), Response>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), Response>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory cache lock poisoned".to_string()))
    }
}

impl ResponseCache for MemoryCache {
    fn generations(&self) -> Result<Vec<String>> {
        let entries = self.lock()?;
        let mut names: Vec<String> = entries.keys().map(|(g, _)| g.clone()).collect();
        names.dedup();
        Ok(names)
    }

    fn delete_generation(&self, generation: &str) -> Result<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|(g, _), _| g != generation);
        Ok(before - entries.len())
    }

    fn get(&self, generation: &str, path: &str) -> Result<Option<Response>> {
        let entries = self.lock()?;
        Ok(entries
            .get(&(generation.to_string(), path.to_string()))
            .cloned()
            .map(|r| r.with_source(ResponseSource::Cache)))
    }

    fn put(&self, generation: &str, path: &str, response: &Response) -> Result<()> {
        self.lock()?.insert(
            (generation.to_string(), path.to_string()),
            response.clone(),
        );
        Ok(())
    }
}
