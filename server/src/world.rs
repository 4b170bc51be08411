//! Authoritative world state and per-tick simulation.
//!
//! The world owns every element. Movables and unmovables are kept in
//! insertion order and every pass iterates in that order, so ties between
//! elements racing for the same square resolve the same way on every run.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{
    GameConfig, Key, KeyState, MovableKind, MovableView, Position, ServerMessage, UnmovableView,
    UserState, DIRECTION_KEYS,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::collision::{movable_is_solid, unmovable_is_solid, Collision};
use crate::entity::{ElementId, Lifecycle, Movable, Unmovable, UnmovableKind};
use crate::session::{UserId, UserManager};

/// Frames a freshly placed bomb waits before its animation advances.
const BOMB_ANIMATION_DELAY: u32 = 15;

pub struct WorldServer {
    config: Arc<GameConfig>,
    collision: Collision,
    pub movables: Vec<Movable>,
    pub unmovables: Vec<Unmovable>,
    tick: u64,
    next_element_id: u64,
    rng: StdRng,
}

impl WorldServer {
    /// Creates an empty world at tick 0.
    pub fn new(config: Arc<GameConfig>, rng: StdRng) -> Self {
        Self {
            collision: Collision::new(config.square_size),
            config,
            movables: Vec::new(),
            unmovables: Vec::new(),
            tick: 0,
            next_element_id: 1,
            rng,
        }
    }

    /// Creates a world with border walls, pillars on even squares, and
    /// randomly scattered boxes and enemies.
    pub fn generate(config: Arc<GameConfig>, rng: StdRng) -> Self {
        let mut world = Self::new(Arc::clone(&config), rng);
        let (height, width) = (config.world_height, config.world_width);

        for row in 0..height {
            for col in 0..width {
                let position = Position::from_square(row, col, config.square_size);
                let border = row == 0 || col == 0 || row == height - 1 || col == width - 1;
                let pillar = row % 2 == 0 && col % 2 == 0;

                if border || pillar {
                    world.add_unmovable(UnmovableKind::Wall, position);
                } else if world.rng.gen::<f64>() < config.box_ratio {
                    world.add_unmovable(UnmovableKind::Box, position);
                } else if world.rng.gen::<f64>() < config.enemy_ratio {
                    world.add_enemy(position);
                }
            }
        }

        info!(
            "World generated: {}x{} squares, {} unmovables, {} enemies",
            height,
            width,
            world.unmovables.len(),
            world.movables.len()
        );
        world
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn collision(&self) -> &Collision {
        &self.collision
    }

    fn next_id(&mut self) -> ElementId {
        let id = ElementId(self.next_element_id);
        self.next_element_id += 1;
        id
    }

    /// Adds a permanent wall or box.
    pub fn add_unmovable(&mut self, kind: UnmovableKind, position: Position) -> ElementId {
        let id = self.next_id();
        let lifecycle = Lifecycle::permanent(self.tick);
        self.unmovables
            .push(Unmovable::new(id, kind, position, lifecycle));
        id
    }

    pub fn add_enemy(&mut self, position: Position) -> ElementId {
        let id = self.next_id();
        let mut enemy = Movable::new(id, MovableKind::Enemy, position, self.tick);
        enemy.velocity = self.config.velocity_enemy;
        self.movables.push(enemy);
        id
    }

    /// Adds the player character owned by `owner`.
    pub fn add_player(&mut self, owner: UserId, position: Position) -> ElementId {
        let id = self.next_id();
        let mut player = Movable::new(id, MovableKind::Player, position, self.tick);
        player.velocity = self.config.velocity_player;
        player.bomb_count = self.config.bomb_count_start;
        player.owner = Some(owner);
        self.movables.push(player);
        info!("Player {} spawned at ({}, {})", id.0, position.y, position.x);
        id
    }

    pub fn movable(&self, id: ElementId) -> Option<&Movable> {
        self.movables.iter().find(|m| m.id == id)
    }

    pub fn movable_mut(&mut self, id: ElementId) -> Option<&mut Movable> {
        self.movables.iter_mut().find(|m| m.id == id)
    }

    pub fn unmovable(&self, id: ElementId) -> Option<&Unmovable> {
        self.unmovables.iter().find(|u| u.id == id)
    }

    /// The live character owned by `user`, if any.
    pub fn character_of(&self, user: UserId) -> Option<&Movable> {
        self.movables.iter().find(|m| m.owner == Some(user))
    }

    pub fn character_of_mut(&mut self, user: UserId) -> Option<&mut Movable> {
        self.movables.iter_mut().find(|m| m.owner == Some(user))
    }

    /// Removes every character owned by `user` without running destroy
    /// hooks. Returns how many were removed.
    pub fn remove_characters_of(&mut self, user: UserId) -> usize {
        let before = self.movables.len();
        self.movables.retain(|m| m.owner != Some(user));
        before - self.movables.len()
    }

    /// Schedules destruction of any element at `tick`.
    ///
    /// Returns false if the element does not exist or `tick` is before the
    /// element was created.
    pub fn schedule_destroy(&mut self, id: ElementId, tick: u64) -> bool {
        let lifecycle = if let Some(m) = self.movables.iter_mut().find(|m| m.id == id) {
            &mut m.lifecycle
        } else if let Some(u) = self.unmovables.iter_mut().find(|u| u.id == id) {
            &mut u.lifecycle
        } else {
            return false;
        };

        if tick < lifecycle.created_tick {
            return false;
        }
        lifecycle.destroy_tick = Some(tick);
        true
    }

    /// Advances the world by one tick.
    ///
    /// 1. Every movable moves, in collection order.
    /// 2. Every movable tries to place a bomb.
    /// 3. Elements whose destroy tick is now run their destroy hook and are
    ///    removed.
    /// 4. The tick counter advances by one.
    pub fn step(&mut self, users: &mut UserManager) {
        let tick = self.tick;

        for index in 0..self.movables.len() {
            self.apply_movement(index);
        }
        for index in 0..self.movables.len() {
            self.apply_bomb_place(index, tick);
        }
        self.destroy_expired(tick, users);

        self.tick += 1;
    }

    fn apply_movement(&mut self, index: usize) {
        let mover = &self.movables[index];
        let from = mover.position;
        let (dy, dx) = movement_delta(&mover.keys, mover.velocity);

        // Vertical first, then horizontal from wherever the vertical pass
        // stopped. Swapping the order changes how corners are cut.
        let vertical = self.collision.sweep_move(
            &self.movables,
            &self.unmovables,
            from,
            from.shift(dy, 0),
            mover,
            unmovable_is_solid,
            movable_is_solid,
        );
        let resolved = self.collision.sweep_move(
            &self.movables,
            &self.unmovables,
            vertical,
            vertical.shift(0, dx),
            mover,
            unmovable_is_solid,
            movable_is_solid,
        );

        let (id, kind) = (mover.id, mover.kind);
        self.movables[index].position = resolved;

        // A mover cannot leave and re-enter a bomb square within one tick, so
        // checking once per move is enough.
        let mover = &self.movables[index];
        for bomb in self.unmovables.iter_mut() {
            let pending = matches!(
                bomb.kind,
                UnmovableKind::Bomb { owner, moved_out_of_bomb: false } if owner == id
            );
            if pending && self.collision.has_vacated(mover, bomb) {
                bomb.kind = UnmovableKind::Bomb {
                    owner: id,
                    moved_out_of_bomb: true,
                };
            }
        }

        if kind == MovableKind::Enemy {
            if resolved == from {
                reroll_direction(&mut self.movables[index].keys, &mut self.rng);
            }
            if self.rng.gen::<f64>() <= self.config.enemy_key_change_possibility {
                reroll_direction(&mut self.movables[index].keys, &mut self.rng);
            }
        }
    }

    fn apply_bomb_place(&mut self, index: usize, tick: u64) {
        let mover = &self.movables[index];
        if mover.bomb_count == 0 || !Key::Bomb.is_pressed(&mover.keys) {
            return;
        }

        let target = mover.position.snap_to_square(self.collision.square_size());
        let occupied = !self
            .collision
            .collisions_at(&self.unmovables, target, None, None)
            .is_empty()
            || !self
                .collision
                .collisions_at(&self.movables, target, Some(mover.id), None)
                .is_empty();
        if occupied {
            return;
        }

        let owner = mover.id;
        let id = self.next_id();
        let mut bomb = Unmovable::new(
            id,
            UnmovableKind::Bomb {
                owner,
                moved_out_of_bomb: false,
            },
            target,
            Lifecycle::expiring(tick, self.config.bomb_lifetime_ticks()),
        );
        bomb.animation.state_delay_tick_end = BOMB_ANIMATION_DELAY;
        self.unmovables.push(bomb);
        self.movables[index].bomb_count -= 1;

        debug!(
            "Movable {} placed bomb {} at ({}, {}) on tick {}",
            owner.0, id.0, target.y, target.x, tick
        );
    }

    fn destroy_expired(&mut self, tick: u64, users: &mut UserManager) {
        let expired: Vec<ElementId> = self
            .unmovables
            .iter()
            .filter(|u| u.lifecycle.should_destroy(tick))
            .map(|u| u.id)
            .collect();
        for id in &expired {
            self.destroy_unmovable(*id);
        }
        self.unmovables.retain(|u| !expired.contains(&u.id));

        let expired: Vec<ElementId> = self
            .movables
            .iter()
            .filter(|m| m.lifecycle.should_destroy(tick))
            .map(|m| m.id)
            .collect();
        for id in &expired {
            self.destroy_movable(*id, users);
        }
        self.movables.retain(|m| !expired.contains(&m.id));
    }

    fn destroy_unmovable(&mut self, id: ElementId) {
        let Some(kind) = self.unmovable(id).map(|u| u.kind) else {
            return;
        };

        match kind {
            UnmovableKind::Bomb { owner, .. } => {
                if let Some(placer) = self.movable_mut(owner) {
                    placer.bomb_count += 1;
                }
                debug!("Bomb {} expired", id.0);
            }
            UnmovableKind::Wall | UnmovableKind::Box => {
                debug!("Unmovable {} destroyed", id.0);
            }
        }
    }

    fn destroy_movable(&mut self, id: ElementId, users: &mut UserManager) {
        let Some(movable) = self.movable(id) else {
            return;
        };

        match movable.kind {
            MovableKind::Player => {
                if let Some(user) = movable.owner.and_then(|owner| users.get_mut(owner)) {
                    user.state = UserState::Dead;
                    info!("User {} '{}' lost their character", user.id.0, user.name);
                }
            }
            MovableKind::Enemy => {
                debug!("Enemy {} destroyed", id.0);
            }
        }
    }

    /// Picks a spawn square for a new player.
    ///
    /// Prefers squares at least `spawn_square_distance_from_others` away from
    /// every movable with `spawn_player_square_free_space` free squares
    /// reachable around them. The distance and then the free-space
    /// requirement are dropped when no square satisfies them.
    pub fn spawn_position(&mut self) -> Option<Position> {
        let size = self.collision.square_size();
        let distance = self.config.spawn_square_distance_from_others;
        let free_space = self.config.spawn_player_square_free_space;

        let free: Vec<(i32, i32)> = self
            .squares()
            .filter(|&(row, col)| !self.square_occupied(row, col))
            .collect();
        let roomy: Vec<(i32, i32)> = free
            .iter()
            .copied()
            .filter(|&square| self.reachable_free_squares(square, free_space) >= free_space)
            .collect();
        let preferred: Vec<(i32, i32)> = roomy
            .iter()
            .copied()
            .filter(|&square| self.far_from_movables(square, distance))
            .collect();

        let candidates = [preferred, roomy, free]
            .into_iter()
            .find(|candidates| !candidates.is_empty())?;
        let &(row, col) = candidates.choose(&mut self.rng)?;
        Some(Position::from_square(row, col, size))
    }

    fn squares(&self) -> impl Iterator<Item = (i32, i32)> {
        let (height, width) = (self.config.world_height, self.config.world_width);
        (0..height).flat_map(move |row| (0..width).map(move |col| (row, col)))
    }

    fn square_blocked(&self, row: i32, col: i32) -> bool {
        let position = Position::from_square(row, col, self.collision.square_size());
        !self
            .collision
            .collisions_at(&self.unmovables, position, None, None)
            .is_empty()
    }

    fn square_occupied(&self, row: i32, col: i32) -> bool {
        let position = Position::from_square(row, col, self.collision.square_size());
        self.square_blocked(row, col)
            || !self
                .collision
                .collisions_at(&self.movables, position, None, None)
                .is_empty()
    }

    fn far_from_movables(&self, (row, col): (i32, i32), distance: i32) -> bool {
        let size = self.collision.square_size();
        self.movables.iter().all(|m| {
            let (other_row, other_col) = m.position.square(size);
            (row - other_row).abs() + (col - other_col).abs() >= distance
        })
    }

    /// Counts unblocked squares reachable from `start`, not counting `start`
    /// itself, stopping once `limit` is reached.
    fn reachable_free_squares(&self, start: (i32, i32), limit: usize) -> usize {
        let (height, width) = (self.config.world_height, self.config.world_width);
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut count = 0;

        while let Some((row, col)) = queue.pop_front() {
            for (next_row, next_col) in [(row - 1, col), (row + 1, col), (row, col - 1), (row, col + 1)] {
                if next_row < 0 || next_col < 0 || next_row >= height || next_col >= width {
                    continue;
                }
                if self.square_blocked(next_row, next_col) || !seen.insert((next_row, next_col)) {
                    continue;
                }
                count += 1;
                if count >= limit {
                    return count;
                }
                queue.push_back((next_row, next_col));
            }
        }
        count
    }

    /// Messages broadcast to every client after a tick.
    pub fn snapshot(&self, users: &UserManager) -> Vec<ServerMessage> {
        let movables = self
            .movables
            .iter()
            .map(|m| MovableView {
                id: m.id.0,
                kind: m.kind,
                position: m.position,
                animation: m.animation,
                bomb_count: m.bomb_count,
                owner: m
                    .owner
                    .and_then(|owner| users.get(owner))
                    .map(|user| (user.name.clone(), user.state)),
            })
            .collect();
        let unmovables = self
            .unmovables
            .iter()
            .map(|u| UnmovableView {
                id: u.id.0,
                kind: u.kind.tag(),
                position: u.position,
                animation: u.animation,
                destroy_tick: u.lifecycle.destroy_tick,
            })
            .collect();

        vec![
            ServerMessage::Tick { tick: self.tick },
            ServerMessage::Movables(movables),
            ServerMessage::Unmovables(unmovables),
        ]
    }
}

/// Pixel offset requested by the pressed direction keys.
fn movement_delta(keys: &KeyState, velocity: i32) -> (i32, i32) {
    let mut dy = 0;
    let mut dx = 0;
    if Key::Up.is_pressed(keys) {
        dy -= velocity;
    }
    if Key::Down.is_pressed(keys) {
        dy += velocity;
    }
    if Key::Left.is_pressed(keys) {
        dx -= velocity;
    }
    if Key::Right.is_pressed(keys) {
        dx += velocity;
    }
    (dy, dx)
}

/// Releases every key and presses exactly one random direction.
fn reroll_direction(keys: &mut KeyState, rng: &mut StdRng) {
    keys.fill(false);
    if let Some(key) = DIRECTION_KEYS.choose(rng) {
        keys[key.index()] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use shared::KEY_COUNT;

    const SIZE: i32 = 50;

    fn config() -> GameConfig {
        GameConfig {
            tick_rate_ms: 100,
            bomb_fuse_seconds: 2,
            velocity_player: 10,
            enemy_key_change_possibility: 0.0,
            ..Default::default()
        }
    }

    fn empty_world(config: GameConfig) -> WorldServer {
        WorldServer::new(Arc::new(config), StdRng::seed_from_u64(3))
    }

    fn users() -> UserManager {
        UserManager::new(26, StdRng::seed_from_u64(4))
    }

    fn press(world: &mut WorldServer, id: ElementId, pressed: &[Key]) {
        let movable = world.movable_mut(id).unwrap();
        movable.keys = [false; KEY_COUNT];
        for key in pressed {
            movable.keys[key.index()] = true;
        }
    }

    fn position_of(world: &WorldServer, id: ElementId) -> Position {
        world.movable(id).unwrap().position
    }

    fn bombs(world: &WorldServer) -> Vec<&Unmovable> {
        world
            .unmovables
            .iter()
            .filter(|u| u.bomb_owner().is_some())
            .collect()
    }

    #[test]
    fn test_step_advances_tick_once() {
        let mut world = empty_world(config());
        let mut users = users();

        assert_eq!(world.tick(), 0);
        world.step(&mut users);
        world.step(&mut users);
        assert_eq!(world.tick(), 2);
    }

    #[test]
    fn test_idle_player_does_not_drift() {
        let config = Arc::new(GameConfig {
            enemy_ratio: 0.0,
            ..Default::default()
        });
        let mut world = WorldServer::generate(config, StdRng::seed_from_u64(21));
        let mut users = users();
        let owner = users.register("idle").id;
        let spawn = world.spawn_position().unwrap();
        let id = world.add_player(owner, spawn);

        for _ in 0..200 {
            world.step(&mut users);
        }
        assert_eq!(position_of(&world, id), spawn);
    }

    #[test]
    fn test_player_moves_by_velocity() {
        let mut world = empty_world(config());
        let mut users = users();
        let id = world.add_player(UserId(1), Position::new(0, 0));
        press(&mut world, id, &[Key::Right]);

        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(0, 10));

        press(&mut world, id, &[Key::Down]);
        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(10, 10));
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let mut world = empty_world(config());
        let mut users = users();
        let id = world.add_player(UserId(1), Position::new(20, 20));
        press(&mut world, id, &[Key::Left, Key::Right, Key::Up, Key::Down]);

        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(20, 20));
    }

    #[test]
    fn test_diagonal_resolves_vertical_first() {
        let mut world = empty_world(config());
        let mut users = users();
        world.add_unmovable(UnmovableKind::Wall, Position::from_square(0, 2, SIZE));
        let id = world.add_player(UserId(1), Position::new(55, 95));
        press(&mut world, id, &[Key::Up, Key::Right]);

        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(45, 99));
    }

    #[test]
    fn test_wall_blocks_movement() {
        let mut world = empty_world(config());
        let mut users = users();
        world.add_unmovable(UnmovableKind::Wall, Position::from_square(0, 1, SIZE));
        let id = world.add_player(UserId(1), Position::new(0, 45));
        press(&mut world, id, &[Key::Right]);

        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(0, 49));
        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(0, 49));
    }

    #[test]
    fn test_bomb_placed_once_with_single_bomb() {
        let mut world = empty_world(config());
        let mut users = users();
        let id = world.add_player(UserId(1), Position::new(0, 0));
        press(&mut world, id, &[Key::Bomb]);

        world.step(&mut users);
        let placed = bombs(&world);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].position, Position::new(0, 0));
        assert_eq!(placed[0].bomb_owner(), Some(id));
        assert_eq!(placed[0].lifecycle.created_tick, 0);
        assert_eq!(world.movable(id).unwrap().bomb_count, 0);

        world.step(&mut users);
        assert_eq!(bombs(&world).len(), 1);
    }

    #[test]
    fn test_bomb_snaps_to_nearest_square() {
        let mut world = empty_world(config());
        let mut users = users();
        let id = world.add_player(UserId(1), Position::new(10, 30));
        press(&mut world, id, &[Key::Bomb]);

        world.step(&mut users);
        assert_eq!(bombs(&world)[0].position, Position::new(0, 50));
    }

    #[test]
    fn test_bomb_rejected_on_occupied_square() {
        let mut world = empty_world(config());
        let mut users = users();
        world.add_unmovable(UnmovableKind::Box, Position::from_square(0, 1, SIZE));
        let id = world.add_player(UserId(1), Position::new(0, 30));
        press(&mut world, id, &[Key::Bomb]);

        world.step(&mut users);
        assert!(bombs(&world).is_empty());
        assert_eq!(world.movable(id).unwrap().bomb_count, 1);
    }

    #[test]
    fn test_bomb_rejected_when_other_movable_in_square() {
        let mut world = empty_world(config());
        let mut users = users();
        let id = world.add_player(UserId(1), Position::new(0, 0));
        world.add_player(UserId(2), Position::new(0, 60));
        world.add_enemy(Position::new(5, 5));
        press(&mut world, id, &[Key::Bomb]);

        world.step(&mut users);
        assert!(bombs(&world).is_empty());
    }

    #[test]
    fn test_bomb_present_for_its_lifetime_then_removed() {
        let mut world = empty_world(config());
        let mut users = users();
        let lifetime = world.config.bomb_lifetime_ticks();
        assert_eq!(lifetime, 20);

        let id = world.add_player(UserId(1), Position::new(0, 0));
        press(&mut world, id, &[Key::Bomb]);
        world.step(&mut users);
        press(&mut world, id, &[]);

        for _ in 1..lifetime {
            assert_eq!(bombs(&world).len(), 1);
            world.step(&mut users);
        }
        assert_eq!(bombs(&world).len(), 1);
        assert_eq!(world.tick(), lifetime);

        world.step(&mut users);
        assert!(bombs(&world).is_empty());
        assert_eq!(world.movable(id).unwrap().bomb_count, 1);
    }

    #[test]
    fn test_destroy_removes_only_matching_tick() {
        let mut world = empty_world(config());
        let mut users = users();
        let first = world.add_unmovable(UnmovableKind::Box, Position::from_square(1, 1, SIZE));
        let second = world.add_unmovable(UnmovableKind::Box, Position::from_square(1, 2, SIZE));
        let wall = world.add_unmovable(UnmovableKind::Wall, Position::from_square(1, 3, SIZE));
        assert!(world.schedule_destroy(first, 2));
        assert!(world.schedule_destroy(second, 4));

        world.step(&mut users);
        world.step(&mut users);
        assert!(world.unmovable(first).is_some());
        world.step(&mut users);
        assert!(world.unmovable(first).is_none());
        assert!(world.unmovable(second).is_some());
        assert!(world.unmovable(wall).is_some());
    }

    #[test]
    fn test_schedule_destroy_rejects_tick_before_creation() {
        let mut world = empty_world(config());
        let mut users = users();
        world.step(&mut users);
        world.step(&mut users);
        let id = world.add_unmovable(UnmovableKind::Box, Position::new(0, 0));

        assert!(!world.schedule_destroy(id, 1));
        assert!(world.schedule_destroy(id, 2));
        assert!(!world.schedule_destroy(ElementId(999), 5));
    }

    #[test]
    fn test_destroyed_player_marks_user_dead() {
        let mut world = empty_world(config());
        let mut users = users();
        let owner = users.register("doomed").id;
        let id = world.add_player(owner, Position::new(0, 0));
        world.schedule_destroy(id, 0);

        world.step(&mut users);
        assert!(world.movable(id).is_none());
        assert!(world.character_of(owner).is_none());
        assert_eq!(users.get(owner).unwrap().state, UserState::Dead);
    }

    #[test]
    fn test_owner_leaves_bomb_then_is_blocked_by_it() {
        let mut world = empty_world(config());
        let mut users = users();
        let id = world.add_player(UserId(1), Position::new(0, 0));
        press(&mut world, id, &[Key::Bomb]);
        world.step(&mut users);

        let bomb_id = bombs(&world)[0].id;
        let moved_out = |world: &WorldServer| {
            matches!(
                world.unmovable(bomb_id).unwrap().kind,
                UnmovableKind::Bomb {
                    moved_out_of_bomb: true,
                    ..
                }
            )
        };

        press(&mut world, id, &[Key::Right]);
        for _ in 0..4 {
            world.step(&mut users);
            assert!(!moved_out(&world));
        }
        assert_eq!(position_of(&world, id), Position::new(0, 40));

        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(0, 50));
        assert!(moved_out(&world));

        press(&mut world, id, &[Key::Left]);
        world.step(&mut users);
        assert_eq!(position_of(&world, id), Position::new(0, 50));
        assert!(moved_out(&world));
    }

    #[test]
    fn test_bomb_solid_to_other_players_immediately() {
        let mut world = empty_world(config());
        let mut users = users();
        let placer = world.add_player(UserId(1), Position::new(0, 0));
        press(&mut world, placer, &[Key::Bomb]);
        world.step(&mut users);

        let other = world.add_player(UserId(2), Position::new(0, 120));
        press(&mut world, other, &[Key::Left]);
        press(&mut world, placer, &[Key::Down]);
        for _ in 0..10 {
            world.step(&mut users);
        }
        assert_eq!(position_of(&world, other), Position::new(0, 50));
    }

    #[test]
    fn test_same_faction_never_share_a_square() {
        let mut world = empty_world(config());
        let mut users = users();
        let left = world.add_player(UserId(1), Position::new(0, 0));
        let right = world.add_player(UserId(2), Position::new(0, 140));
        press(&mut world, left, &[Key::Right]);
        press(&mut world, right, &[Key::Left]);

        for _ in 0..30 {
            world.step(&mut users);
            let a = position_of(&world, left).square(SIZE);
            let b = position_of(&world, right).square(SIZE);
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_cross_faction_may_overlap() {
        let mut world = empty_world(config());
        let mut users = users();
        let player = world.add_player(UserId(1), Position::new(0, 0));
        world.add_enemy(Position::new(0, 60));
        press(&mut world, player, &[Key::Right]);

        for _ in 0..6 {
            world.step(&mut users);
        }
        assert_eq!(position_of(&world, player), Position::new(0, 60));
    }

    #[test]
    fn test_blocked_enemy_rerolls_single_direction() {
        let mut world = empty_world(config());
        let mut users = users();
        let enemy = world.add_enemy(Position::new(0, 0));

        world.step(&mut users);
        let keys = world.movable(enemy).unwrap().keys;
        assert_eq!(keys.iter().filter(|k| **k).count(), 1);
        assert!(!Key::Bomb.is_pressed(&keys));
    }

    #[test]
    fn test_moving_enemy_keeps_direction_without_roll() {
        let mut world = empty_world(config());
        let mut users = users();
        let enemy = world.add_enemy(Position::new(0, 0));
        press(&mut world, enemy, &[Key::Right]);

        world.step(&mut users);
        let movable = world.movable(enemy).unwrap();
        assert_eq!(movable.position, Position::new(0, 1));
        assert!(Key::Right.is_pressed(&movable.keys));
    }

    #[test]
    fn test_enemy_rolls_every_tick_with_certain_probability() {
        let mut world = empty_world(GameConfig {
            enemy_key_change_possibility: 1.0,
            ..config()
        });
        let mut users = users();
        let enemy = world.add_enemy(Position::new(100, 100));

        for _ in 0..50 {
            world.step(&mut users);
            let keys = world.movable(enemy).unwrap().keys;
            assert_eq!(keys.iter().filter(|k| **k).count(), 1);
        }
    }

    #[test]
    fn test_spawn_respects_distance_from_others() {
        let mut world = empty_world(config());
        world.add_player(UserId(1), Position::new(0, 0));

        for _ in 0..20 {
            let (row, col) = world.spawn_position().unwrap().square(SIZE);
            assert!(row + col >= 3);
        }
    }

    #[test]
    fn test_spawn_never_on_unmovable() {
        let config = Arc::new(GameConfig {
            enemy_ratio: 0.0,
            ..Default::default()
        });
        let mut world = WorldServer::generate(config, StdRng::seed_from_u64(8));

        for _ in 0..20 {
            let spawn = world.spawn_position().unwrap();
            let hits = world
                .collision()
                .collisions_at(&world.unmovables, spawn, None, None);
            assert!(hits.is_empty());
        }
    }

    #[test]
    fn test_spawn_none_when_world_full() {
        let mut world = empty_world(GameConfig {
            world_height: 1,
            world_width: 1,
            ..config()
        });
        world.add_unmovable(UnmovableKind::Wall, Position::new(0, 0));

        assert!(world.spawn_position().is_none());
    }

    #[test]
    fn test_generated_world_has_border_and_pillars() {
        let config = Arc::new(GameConfig::default());
        let world = WorldServer::generate(Arc::clone(&config), StdRng::seed_from_u64(1));
        let wall_at = |row, col| {
            world.unmovables.iter().any(|u| {
                u.kind == UnmovableKind::Wall && u.position == Position::from_square(row, col, SIZE)
            })
        };

        for col in 0..config.world_width {
            assert!(wall_at(0, col));
            assert!(wall_at(config.world_height - 1, col));
        }
        for row in 0..config.world_height {
            assert!(wall_at(row, 0));
            assert!(wall_at(row, config.world_width - 1));
        }
        assert!(wall_at(2, 2));
        assert!(wall_at(4, 6));
        assert!(!wall_at(1, 1));
    }

    #[test]
    fn test_snapshot_lists_every_element() {
        let mut world = empty_world(config());
        let mut users = users();
        let owner = users.register("alice").id;
        world.add_player(owner, Position::new(0, 0));
        world.add_enemy(Position::new(100, 100));
        world.add_unmovable(UnmovableKind::Wall, Position::new(200, 200));

        let snapshot = world.snapshot(&users);
        assert_eq!(snapshot[0], ServerMessage::Tick { tick: 0 });
        match &snapshot[1] {
            ServerMessage::Movables(movables) => {
                assert_eq!(movables.len(), 2);
                assert_eq!(
                    movables[0].owner,
                    Some(("alice".to_string(), UserState::Playing))
                );
                assert_eq!(movables[1].owner, None);
            }
            other => panic!("unexpected message {:?}", other),
        }
        match &snapshot[2] {
            ServerMessage::Unmovables(unmovables) => assert_eq!(unmovables.len(), 1),
            other => panic!("unexpected message {:?}", other),
        }
    }
}
