use std::collections::{HashMap, HashSet};

use crate::cache::CacheBackend;
use crate::domain::{AppName, BackendKind, CountRecord, MatchRecord};
use crate::error::IprError;
use crate::go::GoStatus;

#[derive(Debug)]
struct Group<T> {
    rows: Vec<T>,
    keys: HashSet<(String, Option<String>)>,
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            keys: HashSet::new(),
        }
    }
}

impl<T> Group<T> {
    fn push(&mut self, key: (String, Option<String>), row: T) {
        if self.keys.insert(key) {
            self.rows.push(row);
        }
    }
}

/// Ordered per-app lists in process memory. Duplicate keys are dropped the
/// same way the durable store drops them.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    counts: HashMap<AppName, Group<CountRecord>>,
    matches: HashMap<AppName, Group<MatchRecord>>,
    read_only: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn writable(&self) -> Result<(), IprError> {
        if self.read_only {
            return Err(IprError::CacheClosed);
        }
        Ok(())
    }
}

impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn create_count_group(&mut self, app: &AppName) -> Result<(), IprError> {
        self.writable()?;
        self.counts.insert(app.clone(), Group::default());
        Ok(())
    }

    fn insert_count(&mut self, app: &AppName, record: &CountRecord) -> Result<(), IprError> {
        self.writable()?;
        self.counts
            .entry(app.clone())
            .or_default()
            .push((record.name.clone(), None), record.clone());
        Ok(())
    }

    fn create_match_group(&mut self, app: &AppName) -> Result<(), IprError> {
        self.writable()?;
        self.matches.insert(app.clone(), Group::default());
        Ok(())
    }

    fn insert_match(&mut self, app: &AppName, record: &MatchRecord) -> Result<(), IprError> {
        self.writable()?;
        let key = (record.db_id.clone(), record.go_id.clone());
        self.matches
            .entry(app.clone())
            .or_default()
            .push(key, record.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), IprError> {
        Ok(())
    }

    fn close_writing(&mut self, go: &GoStatus) -> Result<(), IprError> {
        self.writable()?;
        if !go.is_enabled() {
            self.matches
                .values_mut()
                .flat_map(|group| group.rows.iter_mut())
                .for_each(|row| row.go_name = None);
        }
        self.read_only = true;
        Ok(())
    }

    fn count_len(&self, app: &AppName) -> Result<usize, IprError> {
        Ok(self.counts.get(app).map_or(0, |group| group.rows.len()))
    }

    fn match_len(&self, app: &AppName) -> Result<usize, IprError> {
        Ok(self.matches.get(app).map_or(0, |group| group.rows.len()))
    }

    fn match_row(&self, app: &AppName, index: usize) -> Result<Option<MatchRecord>, IprError> {
        Ok(self
            .matches
            .get(app)
            .and_then(|group| group.rows.get(index))
            .cloned())
    }

    fn counts(&self, app: &AppName, limit: usize) -> Result<Vec<CountRecord>, IprError> {
        Ok(self
            .counts
            .get(app)
            .map(|group| group.rows.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
