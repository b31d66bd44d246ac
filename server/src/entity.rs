use log::debug;
use shared::{EntityId, EntityKind, EntitySnapshot, Vec2};
use std::collections::HashMap;
use std::time::Instant;

/// An entity simulated by this zone server.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: f32,
    /// When the entity was first seen outside the server's zone.
    pub left_origin_at: Option<Instant>,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, position: Vec2) -> Self {
        Entity {
            id,
            kind,
            position,
            velocity: Vec2::ZERO,
            health: 100.0,
            left_origin_at: None,
        }
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn from_snapshot(snapshot: EntitySnapshot) -> Self {
        Entity {
            id: snapshot.id,
            kind: snapshot.kind,
            position: snapshot.position,
            velocity: snapshot.velocity,
            health: snapshot.health,
            left_origin_at: None,
        }
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            kind: self.kind,
            position: self.position,
            velocity: self.velocity,
            health: self.health,
        }
    }

    // Integrate position from velocity over dt seconds
    pub fn update_position(&mut self, dt: f32) {
        self.position = self.position + self.velocity * dt;
    }
}

/// Entities this server is authoritative for, keyed by id.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: HashMap<EntityId, Entity>,
    max_entities: usize,
}

impl EntityStore {
    pub fn new(max_entities: usize) -> Self {
        Self {
            entities: HashMap::new(),
            max_entities,
        }
    }

    pub fn is_full(&self) -> bool {
        self.entities.len() >= self.max_entities
    }

    /// Inserts `entity`, returning false if the store is full.
    pub fn insert(&mut self, entity: Entity) -> bool {
        if !self.entities.contains_key(&entity.id) && self.is_full() {
            return false;
        }
        debug!("Holding entity {} ({:?}) at {}", entity.id, entity.kind, entity.position);
        self.entities.insert(entity.id, entity);
        true
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.kind == EntityKind::Player)
            .count()
    }

    pub fn advance(&mut self, dt: f32) {
        for entity in self.entities.values_mut() {
            entity.update_position(dt);
        }
    }

    pub fn snapshots(&self) -> Vec<EntitySnapshot> {
        let mut snapshots: Vec<EntitySnapshot> =
            self.entities.values().map(Entity::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }
}
