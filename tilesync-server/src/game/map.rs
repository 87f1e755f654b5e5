//! Map & Shape Registry
//!
//! A map is a tile grid (only its dimensions matter here) plus a registry of
//! named free-standing shapes. Collision shapes block motion; non-collision
//! shapes are trigger regions.
//!
//! Every registry change is recorded until the tick engine takes it for the
//! next diff: `name -> Some(shape)` for create/update, `name -> None` for
//! removal.

use std::collections::BTreeMap;
use std::path::Path;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::geometry::{BoundingBox, GeometryError, Shape, ShapePositioning, WorldBounds};

/// Default tile edge in world units.
pub const DEFAULT_TILE_SIZE: i32 = 32;

/// Errors loading or validating map content.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Map file could not be read
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),

    /// Map file is not valid JSON for a map
    #[error("failed to parse map: {0}")]
    Parse(#[from] serde_json::Error),

    /// A shape in the map is malformed
    #[error("invalid shape: {0}")]
    Geometry(#[from] GeometryError),

    /// Registry shapes must be named
    #[error("registry shape at ({x}, {y}) has no name")]
    UnnamedShape {
        /// Anchor x
        x: i32,
        /// Anchor y
        y: i32,
    },

    /// Tile dimensions must be positive
    #[error("invalid tile size {0}x{1}")]
    InvalidTileSize(i32, i32),
}

// =============================================================================
// MAP CONFIG
// =============================================================================

/// Map content as loaded from disk and sent to joining clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Map identifier
    #[serde(default)]
    pub id: String,

    /// Tile width in world units
    #[serde(default = "default_tile")]
    pub tile_width: i32,

    /// Tile height in world units
    #[serde(default = "default_tile")]
    pub tile_height: i32,

    /// Width in tiles (0 = unbounded)
    #[serde(default)]
    pub width: u32,

    /// Height in tiles (0 = unbounded)
    #[serde(default)]
    pub height: u32,

    /// Initial registry shapes
    #[serde(default)]
    pub shapes: Vec<Shape>,

    /// Seed for the map RNG
    #[serde(default)]
    pub seed: u64,
}

fn default_tile() -> i32 {
    DEFAULT_TILE_SIZE
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            width: 20,
            height: 15,
            shapes: Vec::new(),
            seed: 0,
        }
    }
}

impl MapConfig {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

// =============================================================================
// SHAPE REGISTRY
// =============================================================================

/// Partial update of a registry shape. `None` fields are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeUpdate {
    /// New anchor x
    #[serde(default)]
    pub x: Option<i32>,
    /// New anchor y
    #[serde(default)]
    pub y: Option<i32>,
    /// New width
    #[serde(default)]
    pub width: Option<i32>,
    /// New height
    #[serde(default)]
    pub height: Option<i32>,
    /// New positioning
    #[serde(default)]
    pub positioning: Option<ShapePositioning>,
    /// New collision flag
    #[serde(default)]
    pub collision: Option<bool>,
    /// Replacement properties
    #[serde(default)]
    pub properties: Option<BTreeMap<String, serde_json::Value>>,
}

impl ShapeUpdate {
    /// Move the anchor.
    pub fn moved_to(x: i32, y: i32) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    /// Resize.
    pub fn resized(width: i32, height: i32) -> Self {
        Self { width: Some(width), height: Some(height), ..Self::default() }
    }

    fn apply_to(&self, shape: &Shape) -> Result<Shape, GeometryError> {
        let mut next = shape.clone();
        if let Some(x) = self.x { next.x = x; }
        if let Some(y) = self.y { next.y = y; }
        if let Some(width) = self.width { next.width = width; }
        if let Some(height) = self.height { next.height = height; }
        if let Some(positioning) = self.positioning { next.positioning = positioning; }
        if let Some(collision) = self.collision { next.collision = collision; }
        if let Some(properties) = &self.properties { next.properties = properties.clone(); }
        next.validate()?;
        Ok(next)
    }
}

/// Registry changes since the last diff.
pub type ShapeChanges = BTreeMap<String, Option<Shape>>;

/// Named shapes of a map.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShapeRegistry {
    shapes: BTreeMap<String, Shape>,
    #[serde(skip)]
    changes: ShapeChanges,
}

impl ShapeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shape, replacing any shape with the same name entirely.
    pub fn create(&mut self, shape: Shape) -> Result<(), ConfigError> {
        shape.validate()?;
        let name = shape.name.clone().ok_or(ConfigError::UnnamedShape { x: shape.x, y: shape.y })?;
        self.changes.insert(name.clone(), Some(shape.clone()));
        self.shapes.insert(name, shape);
        Ok(())
    }

    /// Change only the given fields of an existing shape.
    ///
    /// Returns `Ok(false)` when no shape has that name.
    pub fn update(&mut self, name: &str, update: &ShapeUpdate) -> Result<bool, GeometryError> {
        let Some(current) = self.shapes.get_mut(name) else {
            return Ok(false);
        };
        let next = update.apply_to(current)?;
        *current = next.clone();
        self.changes.insert(name.to_string(), Some(next));
        Ok(true)
    }

    /// Remove a shape. Unknown names are a no-op.
    pub fn remove(&mut self, name: &str) -> Option<Shape> {
        let removed = self.shapes.remove(name)?;
        self.changes.insert(name.to_string(), None);
        Some(removed)
    }

    /// Look up a shape.
    pub fn get(&self, name: &str) -> Option<&Shape> {
        self.shapes.get(name)
    }

    /// Shapes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Shape)> {
        self.shapes.iter()
    }

    /// Number of shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// World boxes of every collision shape.
    pub fn obstacles(&self) -> Vec<BoundingBox> {
        self.shapes
            .values()
            .filter(|s| s.collision)
            .map(Shape::bounds)
            .collect()
    }

    /// Non-collision shapes with their world boxes.
    pub fn triggers(&self) -> impl Iterator<Item = (&str, BoundingBox)> {
        self.shapes
            .iter()
            .filter(|(_, s)| !s.collision)
            .map(|(name, s)| (name.as_str(), s.bounds()))
    }

    /// Whether changes are waiting for the next diff.
    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Take the changes recorded since the last call.
    pub fn take_changes(&mut self) -> ShapeChanges {
        std::mem::take(&mut self.changes)
    }

    /// Mirror side: apply a received diff without recording it.
    ///
    /// `None` removes, `Some` creates or replaces.
    pub fn apply_changes(&mut self, changes: &ShapeChanges) {
        for (name, change) in changes {
            match change {
                Some(shape) => {
                    self.shapes.insert(name.clone(), shape.clone());
                }
                None => {
                    self.shapes.remove(name);
                }
            }
        }
    }
}

// =============================================================================
// MAP
// =============================================================================

/// A map: dimensions and its shape registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Map {
    /// Map identifier
    pub id: String,
    /// Tile width
    pub tile_width: i32,
    /// Tile height
    pub tile_height: i32,
    /// Width in tiles
    pub width: u32,
    /// Height in tiles
    pub height: u32,
    /// RNG seed
    pub seed: u64,
    /// Named shapes
    pub registry: ShapeRegistry,
}

impl Map {
    /// Build a map from its content. Initial shapes are not reported as changes.
    pub fn from_config(config: &MapConfig) -> Result<Self, ConfigError> {
        if config.tile_width <= 0 || config.tile_height <= 0 {
            return Err(ConfigError::InvalidTileSize(config.tile_width, config.tile_height));
        }

        let mut registry = ShapeRegistry::new();
        for shape in &config.shapes {
            registry.create(shape.clone())?;
        }
        registry.take_changes();

        Ok(Self {
            id: config.id.clone(),
            tile_width: config.tile_width,
            tile_height: config.tile_height,
            width: config.width,
            height: config.height,
            seed: config.seed,
            registry,
        })
    }

    /// World rectangle in units. A zero dimension means unbounded.
    pub fn world_bounds(&self) -> WorldBounds {
        if self.width == 0 || self.height == 0 {
            return WorldBounds::UNBOUNDED;
        }
        let width = i64::from(self.width) * i64::from(self.tile_width);
        let height = i64::from(self.height) * i64::from(self.tile_height);
        WorldBounds::new(
            width.min(i64::from(WorldBounds::UNBOUNDED.width)) as i32,
            height.min(i64::from(WorldBounds::UNBOUNDED.height)) as i32,
        )
    }

    /// Current content, for joining clients.
    pub fn snapshot(&self) -> MapConfig {
        MapConfig {
            id: self.id.clone(),
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            width: self.width,
            height: self.height,
            shapes: self.registry.iter().map(|(_, s)| s.clone()).collect(),
            seed: self.seed,
        }
    }
}

impl Default for Map {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            width: 0,
            height: 0,
            seed: 0,
            registry: ShapeRegistry::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall(name: &str) -> Shape {
        Shape::new(100, 100, 20, 40).unwrap().named(name)
    }

    #[test]
    fn test_create_replaces_entirely() {
        let mut registry = ShapeRegistry::new();
        registry
            .create(wall("door").with_property("locked", serde_json::json!(true)))
            .unwrap();
        registry.create(Shape::new(0, 0, 5, 5).unwrap().named("door")).unwrap();

        let door = registry.get("door").unwrap();
        assert_eq!((door.x, door.width), (0, 5));
        assert!(door.properties.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_only_given_fields() {
        let mut registry = ShapeRegistry::new();
        registry.create(wall("gate")).unwrap();
        registry.take_changes();

        assert!(registry.update("gate", &ShapeUpdate::moved_to(7, 8)).unwrap());
        let gate = registry.get("gate").unwrap().clone();
        assert_eq!((gate.x, gate.y, gate.width, gate.height), (7, 8, 20, 40));

        let changes = registry.take_changes();
        assert_eq!(changes.get("gate"), Some(&Some(gate.clone())));
    }

    #[test]
    fn test_update_unknown_is_noop() {
        let mut registry = ShapeRegistry::new();
        assert!(!registry.update("nope", &ShapeUpdate::moved_to(1, 1)).unwrap());
        assert!(!registry.is_dirty());
    }

    #[test]
    fn test_update_rejects_negative_size() {
        let mut registry = ShapeRegistry::new();
        registry.create(wall("gate")).unwrap();
        let err = registry.update("gate", &ShapeUpdate::resized(-4, 10)).unwrap_err();
        assert_eq!(err, GeometryError::InvalidGeometry { width: -4, height: 10 });
        assert_eq!(registry.get("gate").unwrap().width, 20);
    }

    #[test]
    fn test_remove_records_null() {
        let mut registry = ShapeRegistry::new();
        registry.create(wall("a")).unwrap();
        registry.take_changes();

        assert!(registry.remove("missing").is_none());
        assert!(!registry.is_dirty());

        assert!(registry.remove("a").is_some());
        let changes = registry.take_changes();
        assert_eq!(changes.get("a"), Some(&None));
    }

    #[test]
    fn test_unnamed_shape_rejected() {
        let mut registry = ShapeRegistry::new();
        assert!(matches!(
            registry.create(Shape::new(1, 2, 3, 4).unwrap()),
            Err(ConfigError::UnnamedShape { x: 1, y: 2 })
        ));
    }

    #[test]
    fn test_apply_changes_mirror() {
        let mut mirror = ShapeRegistry::new();
        mirror.apply_changes(&ShapeChanges::from([("a".to_string(), Some(wall("a")))]));
        assert!(mirror.get("a").is_some());
        mirror.apply_changes(&ShapeChanges::from([("a".to_string(), None)]));
        assert!(mirror.get("a").is_none());
        assert!(!mirror.is_dirty());
    }

    #[test]
    fn test_obstacles_and_triggers_split() {
        let mut registry = ShapeRegistry::new();
        registry.create(wall("wall")).unwrap();
        registry.create(Shape::new(0, 0, 10, 10).unwrap().named("zone").as_trigger()).unwrap();
        assert_eq!(registry.obstacles(), vec![BoundingBox::new(100, 100, 120, 140)]);
        let triggers: Vec<_> = registry.triggers().collect();
        assert_eq!(triggers, vec![("zone", BoundingBox::new(0, 0, 10, 10))]);
    }

    #[test]
    fn test_map_from_json() {
        let json = r#"{
            "id": "town",
            "tile_width": 30,
            "tile_height": 30,
            "width": 10,
            "height": 5,
            "shapes": [{"name": "chest", "x": 60, "y": 60, "width": 30, "height": 30}]
        }"#;
        let map = Map::from_config(&MapConfig::from_json(json).unwrap()).unwrap();
        assert_eq!(map.world_bounds(), WorldBounds::new(300, 150));
        assert!(map.registry.get("chest").unwrap().collision);
        assert!(!map.registry.is_dirty());
        assert_eq!(map.snapshot().shapes.len(), 1);
    }

    #[test]
    fn test_invalid_tile_size() {
        let config = MapConfig { tile_width: 0, ..MapConfig::default() };
        assert!(matches!(Map::from_config(&config), Err(ConfigError::InvalidTileSize(0, 32))));
    }
}
