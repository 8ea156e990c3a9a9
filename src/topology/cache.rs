//! Read-through topology cache.
//!
//! Loading is single-writer: the cache is filled through `&mut self`
//! before any replay starts, then frozen into a [`Topology`] that every
//! worker reads without locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{IdKeying, MapTopology, TemplateRules, TopologyProvider};
use crate::engine::error::ReplayError;
use crate::feed::GameFeed;

/// Backing store consulted on a cache miss.
pub trait TopologySource: Send {
    fn load_map(&self, map_id: u64, keying: IdKeying) -> Result<MapTopology, ReplayError>;
    fn load_template(&self, template_id: u64) -> Result<TemplateRules, ReplayError>;
}

/// Loads `maps/<id>.json` and `templates/<id>.json` from a directory.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<T, ReplayError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ReplayError::Feed(format!("{}: {e}", path.display())))
    }
}

impl TopologySource for JsonDirSource {
    fn load_map(&self, map_id: u64, keying: IdKeying) -> Result<MapTopology, ReplayError> {
        let path = self.root.join("maps").join(format!("{map_id}.json"));
        if !path.exists() {
            return Err(ReplayError::UnknownMap(map_id));
        }
        let map: MapTopology = self.read(&path)?;
        if map.keying != keying {
            return Err(ReplayError::KeyingMismatch {
                map_id,
                cached: map.keying,
                requested: keying,
            });
        }
        Ok(map)
    }

    fn load_template(&self, template_id: u64) -> Result<TemplateRules, ReplayError> {
        let path = self.root.join("templates").join(format!("{template_id}.json"));
        if !path.exists() {
            return Err(ReplayError::UnknownTemplate(template_id));
        }
        self.read(&path)
    }
}

#[derive(Default)]
pub struct TopologyCache {
    source: Option<Box<dyn TopologySource>>,
    maps: HashMap<u64, Arc<MapTopology>>,
    templates: HashMap<u64, Arc<TemplateRules>>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(source: Box<dyn TopologySource>) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    /// Cached map, reloaded when it was cached under a different keying.
    pub fn map(&mut self, map_id: u64, keying: IdKeying) -> Result<Arc<MapTopology>, ReplayError> {
        if let Some(map) = self.maps.get(&map_id) {
            if map.keying == keying {
                return Ok(Arc::clone(map));
            }
            tracing::debug!(map_id, cached = ?map.keying, requested = ?keying, "invalidating cached map");
            self.maps.remove(&map_id);
        }
        let source = self.source.as_ref().ok_or(ReplayError::UnknownMap(map_id))?;
        let map = Arc::new(source.load_map(map_id, keying)?);
        self.maps.insert(map_id, Arc::clone(&map));
        Ok(map)
    }

    pub fn template(&mut self, template_id: u64) -> Result<Arc<TemplateRules>, ReplayError> {
        if let Some(rules) = self.templates.get(&template_id) {
            return Ok(Arc::clone(rules));
        }
        let source = self
            .source
            .as_ref()
            .ok_or(ReplayError::UnknownTemplate(template_id))?;
        let rules = Arc::new(source.load_template(template_id)?);
        self.templates.insert(template_id, Arc::clone(&rules));
        Ok(rules)
    }

    pub fn insert_map(&mut self, map: MapTopology) -> Arc<MapTopology> {
        let map = Arc::new(map);
        self.maps.insert(map.map_id, Arc::clone(&map));
        map
    }

    pub fn insert_template(&mut self, rules: TemplateRules) -> Arc<TemplateRules> {
        let rules = Arc::new(rules);
        self.templates.insert(rules.template_id, Arc::clone(&rules));
        rules
    }

    /// Make sure the feed's template and map are cached. Topology embedded
    /// in the feed is used when present; otherwise the source is consulted.
    /// Feeds without a map node are left alone (they are skipped at import).
    pub fn warm_from_feed(&mut self, feed: &GameFeed) -> Result<(), ReplayError> {
        let Some(feed_map) = feed.map.as_ref() else {
            return Ok(());
        };

        let cached_map = self
            .maps
            .get(&feed_map.id)
            .is_some_and(|m| m.keying == IdKeying::Feed);
        if !cached_map {
            self.insert_map(MapTopology::from_feed(feed_map)?);
        }

        if !self.templates.contains_key(&feed.template_id) {
            match feed.settings.as_ref() {
                Some(settings) => {
                    self.insert_template(TemplateRules::from_settings(
                        feed.template_id,
                        feed_map.id,
                        settings,
                    )?);
                }
                None => {
                    self.template(feed.template_id)?;
                }
            }
        }
        Ok(())
    }

    /// Immutable view for concurrent readers.
    pub fn freeze(&self) -> Topology {
        Topology {
            maps: self.maps.clone(),
            templates: self.templates.clone(),
        }
    }

    /// Number of cached (maps, templates).
    pub fn counts(&self) -> (usize, usize) {
        (self.maps.len(), self.templates.len())
    }
}

/// Frozen topology shared by replay workers.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    maps: HashMap<u64, Arc<MapTopology>>,
    templates: HashMap<u64, Arc<TemplateRules>>,
}

impl TopologyProvider for Topology {
    fn map(&self, map_id: u64) -> Result<Arc<MapTopology>, ReplayError> {
        self.maps
            .get(&map_id)
            .cloned()
            .ok_or(ReplayError::UnknownMap(map_id))
    }

    fn template(&self, template_id: u64) -> Result<Arc<TemplateRules>, ReplayError> {
        self.templates
            .get(&template_id)
            .cloned()
            .ok_or(ReplayError::UnknownTemplate(template_id))
    }
}
