//! Types shared between the arena server and its clients.
//!
//! Anything both ends must agree on lives here: the grid geometry, the key
//! layout, the wire messages and the stream codec that carries them.

pub mod codec;
pub mod config;
pub mod protocol;

use serde::{Deserialize, Serialize};

pub use config::GameConfig;
pub use protocol::{
    Animation, ClientMessage, ClientUpdate, MovableKind, MovableView, ServerMessage,
    UnmovableTag, UnmovableView,
};

/// Indexes into a [`KeyState`] array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Up = 0,
    Left = 1,
    Down = 2,
    Right = 3,
    Bomb = 4,
}

pub const KEY_COUNT: usize = 5;

/// The keys an enemy may pick when it rolls a new direction.
pub const DIRECTION_KEYS: [Key; 4] = [Key::Up, Key::Left, Key::Down, Key::Right];

/// Pressed state of every key, indexed by `Key as usize`.
pub type KeyState = [bool; KEY_COUNT];

impl Key {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_pressed(self, keys: &KeyState) -> bool {
        keys[self.index()]
    }
}

/// Coarse lifecycle state of a connected user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserState {
    Playing,
    Dead,
    Won,
}

/// A point in pixel space, stored as (row, column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub y: i32,
    pub x: i32,
}

impl Position {
    pub const fn new(y: i32, x: i32) -> Self {
        Self { y, x }
    }

    /// Top-left pixel of the square at (`row`, `col`).
    pub const fn from_square(row: i32, col: i32, square_size: i32) -> Self {
        Self {
            y: row * square_size,
            x: col * square_size,
        }
    }

    /// Grid square containing this position, as (row, column).
    pub fn square(&self, square_size: i32) -> (i32, i32) {
        (self.y.div_euclid(square_size), self.x.div_euclid(square_size))
    }

    /// Offset of this position inside its square.
    pub fn square_offset(&self, square_size: i32) -> Position {
        Position {
            y: self.y.rem_euclid(square_size),
            x: self.x.rem_euclid(square_size),
        }
    }

    pub fn shift(&self, dy: i32, dx: i32) -> Position {
        Position {
            y: self.y + dy,
            x: self.x + dx,
        }
    }

    pub fn sub(&self, other: &Position) -> Position {
        Position {
            y: self.y - other.y,
            x: self.x - other.x,
        }
    }

    /// Snaps to the origin of the square this position overlaps the most.
    ///
    /// On each axis the position moves to the next square when it is more
    /// than half way into it.
    pub fn snap_to_square(&self, square_size: i32) -> Position {
        let offset = self.square_offset(square_size);
        let mut snapped = self.sub(&offset);
        if offset.y > square_size / 2 {
            snapped.y += square_size;
        }
        if offset.x > square_size / 2 {
            snapped.x += square_size;
        }
        snapped
    }
}
