//! Boundary classification for the periodic scan
//!
//! Pure functions deciding, for one entity, whether it stays, must be
//! handed off and to which zone. Projectiles use a dual window: they are
//! handed off as soon as their predicted path leaves the zone, and a
//! neighbour accepts them while they are inside, about to enter, or only
//! just left their origin.

use crate::entity::Entity;
use shared::error::{require_nonzero, ConfigError};
use shared::{EntitySnapshot, Vec2, Zone, ZoneGrid};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileWindow {
    pub lookahead: Duration,
    pub sample_step: Duration,
    pub grace: Duration,
}

impl Default for ProjectileWindow {
    fn default() -> Self {
        Self {
            lookahead: Duration::from_millis(500),
            sample_step: Duration::from_millis(50),
            grace: Duration::from_millis(200),
        }
    }
}

impl ProjectileWindow {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("projectile_sample_step", self.sample_step)?;
        if self.sample_step > self.lookahead && !self.lookahead.is_zero() {
            return Err(ConfigError::invalid(
                "projectile_sample_step",
                "must not exceed the lookahead window",
            ));
        }
        Ok(())
    }

    /// Predicted positions at each sample step up to the lookahead horizon.
    pub fn samples(&self, position: Vec2, velocity: Vec2) -> impl Iterator<Item = Vec2> {
        let step = self.sample_step.as_secs_f32();
        let count = if step > 0.0 {
            (self.lookahead.as_secs_f32() / step).round() as u32
        } else {
            0
        };
        (1..=count).map(move |i| position + velocity * (step * i as f32))
    }
}

/// Decision for one entity in a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// The entity belongs here.
    Inside,
    /// The entity is outside and must move to `zone`.
    Outside { zone: Zone },
    /// A projectile still inside whose path leaves for `zone` within the
    /// lookahead window.
    Leaving { zone: Zone },
}

/// Classifies `entity` against the server's `assigned` zone.
pub fn classify(grid: &ZoneGrid, assigned: Zone, entity: &Entity, window: &ProjectileWindow) -> Crossing {
    let current = grid.zone_of(entity.position);

    if !entity.kind.is_projectile() {
        return if current == assigned {
            Crossing::Inside
        } else {
            Crossing::Outside { zone: current }
        };
    }

    if current != assigned {
        // Accepted early from a neighbour and still on its way in.
        if window
            .samples(entity.position, entity.velocity)
            .any(|p| grid.zone_of(p) == assigned)
        {
            return Crossing::Inside;
        }
        return Crossing::Outside { zone: current };
    }

    match window
        .samples(entity.position, entity.velocity)
        .map(|p| grid.zone_of(p))
        .find(|zone| *zone != assigned)
    {
        Some(zone) => Crossing::Leaving { zone },
        None => Crossing::Inside,
    }
}

/// Whether a server owning `zone` should accept an inbound projectile.
pub fn accepts_projectile(
    grid: &ZoneGrid,
    zone: Zone,
    projectile: &EntitySnapshot,
    left_origin_ms: Option<u64>,
    window: &ProjectileWindow,
) -> bool {
    if grid.zone_of(projectile.position) == zone {
        return true;
    }

    if window
        .samples(projectile.position, projectile.velocity)
        .any(|p| grid.zone_of(p) == zone)
    {
        return true;
    }

    matches!(left_origin_ms, Some(ms) if Duration::from_millis(ms) <= window.grace)
}
