//! Zone grid geometry
//!
//! A zone is a square cell of `cell_size` world units identified by integer
//! grid coordinates. Zone `(0, 0)` covers `[0, cell_size)` on both axes.

use crate::error::ConfigError;
use crate::{Vec2, DEFAULT_CELL_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Zone {
    pub x: i32,
    pub y: i32,
}

impl Zone {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// World-space rectangle covered by a zone. Min edges are inclusive, max
/// edges exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneBounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl ZoneBounds {
    pub fn contains(&self, position: Vec2) -> bool {
        position.x >= self.min_x
            && position.x < self.max_x
            && position.y >= self.min_y
            && position.y < self.max_y
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }
}

/// Maps world positions to zones.
///
/// Every process must be configured with the same cell size, otherwise the
/// coordinator, the servers and the clients disagree about ownership.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneGrid {
    cell_size: f32,
}

impl ZoneGrid {
    pub fn new(cell_size: f32) -> Result<Self, ConfigError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(ConfigError::invalid(
                "cell_size",
                format!("must be a positive finite number, got {}", cell_size),
            ));
        }
        Ok(Self { cell_size })
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Returns the zone containing `position`.
    ///
    /// Pure: the same position always yields the same zone. Non-finite
    /// coordinates saturate (NaN maps to 0) rather than panicking.
    pub fn zone_of(&self, position: Vec2) -> Zone {
        Zone {
            x: (position.x / self.cell_size).floor() as i32,
            y: (position.y / self.cell_size).floor() as i32,
        }
    }

    pub fn bounds(&self, zone: Zone) -> ZoneBounds {
        let min_x = zone.x as f32 * self.cell_size;
        let min_y = zone.y as f32 * self.cell_size;
        ZoneBounds {
            min_x,
            min_y,
            max_x: min_x + self.cell_size,
            max_y: min_y + self.cell_size,
        }
    }

    pub fn contains(&self, zone: Zone, position: Vec2) -> bool {
        self.zone_of(position) == zone
    }

    /// Distance `position` has travelled into `to` past the boundary that
    /// separates it from `from`.
    ///
    /// Only the axes on which the two zones differ count; for a diagonal
    /// crossing the smaller penetration wins. Returns `f32::INFINITY` when
    /// `from == to` since no boundary was crossed.
    pub fn penetration(&self, from: Zone, to: Zone, position: Vec2) -> f32 {
        let bounds = self.bounds(to);
        let mut depth = f32::INFINITY;

        if to.x > from.x {
            depth = depth.min(position.x - bounds.min_x);
        } else if to.x < from.x {
            depth = depth.min(bounds.max_x - position.x);
        }

        if to.y > from.y {
            depth = depth.min(position.y - bounds.min_y);
        } else if to.y < from.y {
            depth = depth.min(bounds.max_y - position.y);
        }

        depth
    }
}

impl Default for ZoneGrid {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}
