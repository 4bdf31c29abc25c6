//! Ordered Property Source Stack

use super::types::SharedSource;
use crate::error::ContextError;
use crate::Result;
use anyhow::bail;

/// Property sources ordered from highest to lowest priority
///
/// Names are unique: adding a source whose name is already present removes
/// the previous one first.
#[derive(Debug, Clone, Default)]
pub struct PropertySources {
    sources: Vec<SharedSource>,
}

impl PropertySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SharedSource> {
        self.sources.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<SharedSource> {
        self.position(name).map(|idx| self.sources[idx].clone())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name() == name)
    }

    pub fn add_first(&mut self, source: SharedSource) {
        self.remove(source.name());
        self.sources.insert(0, source);
    }

    pub fn add_last(&mut self, source: SharedSource) {
        self.remove(source.name());
        self.sources.push(source);
    }

    /// Insert `source` immediately ahead of `relative`
    pub fn add_before(&mut self, relative: &str, source: SharedSource) -> Result<()> {
        let idx = self.relative_index(relative, &source)?;
        self.sources.insert(idx, source);
        Ok(())
    }

    /// Insert `source` immediately behind `relative`
    pub fn add_after(&mut self, relative: &str, source: SharedSource) -> Result<()> {
        let idx = self.relative_index(relative, &source)?;
        self.sources.insert(idx + 1, source);
        Ok(())
    }

    /// Swap the source called `name` for `source`, keeping its position
    pub fn replace(&mut self, name: &str, source: SharedSource) -> Result<()> {
        match self.position(name) {
            Some(idx) => {
                self.sources[idx] = source;
                Ok(())
            }
            None => bail!(ContextError::UnknownPropertySource(name.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<SharedSource> {
        self.position(name).map(|idx| self.sources.remove(idx))
    }

    fn relative_index(&mut self, relative: &str, source: &SharedSource) -> Result<usize> {
        if relative == source.name() {
            bail!(ContextError::SelfRelativeSource(relative.to_string()));
        }
        if !self.contains(relative) {
            bail!(ContextError::UnknownPropertySource(relative.to_string()));
        }
        self.remove(source.name());
        // Removal above may have shifted the relative source.
        self.position(relative)
            .ok_or_else(|| ContextError::UnknownPropertySource(relative.to_string()).into())
    }
}

impl FromIterator<SharedSource> for PropertySources {
    fn from_iter<I: IntoIterator<Item = SharedSource>>(iter: I) -> Self {
        let mut sources = Self::new();
        for source in iter {
            sources.add_last(source);
        }
        sources
    }
}
