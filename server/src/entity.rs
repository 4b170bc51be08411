use shared::{Animation, KeyState, MovableKind, Position, UnmovableTag, KEY_COUNT};

use crate::session::UserId;

/// Identity of a world element. Collision queries exclude by id, never by
/// value equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Creation and scheduled destruction of an element.
///
/// `destroy_tick` is `None` when no destruction is scheduled; otherwise it is
/// never earlier than `created_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub created_tick: u64,
    pub destroy_tick: Option<u64>,
}

impl Lifecycle {
    pub fn permanent(created_tick: u64) -> Self {
        Self {
            created_tick,
            destroy_tick: None,
        }
    }

    pub fn expiring(created_tick: u64, lifetime: u64) -> Self {
        Self {
            created_tick,
            destroy_tick: Some(created_tick + lifetime),
        }
    }

    pub fn should_destroy(&self, tick: u64) -> bool {
        self.destroy_tick == Some(tick)
    }
}

/// Anything with an identity and a position on the grid.
pub trait Element {
    fn id(&self) -> ElementId;
    fn position(&self) -> Position;
}

/// Player or enemy character.
#[derive(Debug, Clone)]
pub struct Movable {
    pub id: ElementId,
    pub kind: MovableKind,
    pub position: Position,
    pub animation: Animation,
    pub lifecycle: Lifecycle,
    /// Pixels per tick.
    pub velocity: i32,
    pub bomb_count: u32,
    /// Owning user, `None` for enemies.
    pub owner: Option<UserId>,
    pub keys: KeyState,
}

impl Movable {
    pub fn new(id: ElementId, kind: MovableKind, position: Position, tick: u64) -> Self {
        Self {
            id,
            kind,
            position,
            animation: Animation::default(),
            lifecycle: Lifecycle::permanent(tick),
            velocity: 0,
            bomb_count: 0,
            owner: None,
            keys: [false; KEY_COUNT],
        }
    }

    pub fn same_faction(&self, other: &Movable) -> bool {
        self.kind == other.kind
    }
}

impl Element for Movable {
    fn id(&self) -> ElementId {
        self.id
    }

    fn position(&self) -> Position {
        self.position
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmovableKind {
    Wall,
    Box,
    Bomb {
        /// The movable that placed the bomb.
        owner: ElementId,
        /// Set once the owner has left the bomb's square. Never reset.
        moved_out_of_bomb: bool,
    },
}

impl UnmovableKind {
    pub fn tag(&self) -> UnmovableTag {
        match self {
            UnmovableKind::Wall => UnmovableTag::Wall,
            UnmovableKind::Box => UnmovableTag::Box,
            UnmovableKind::Bomb { .. } => UnmovableTag::Bomb,
        }
    }
}

/// Wall, box or bomb.
#[derive(Debug, Clone)]
pub struct Unmovable {
    pub id: ElementId,
    pub kind: UnmovableKind,
    pub position: Position,
    pub animation: Animation,
    pub lifecycle: Lifecycle,
}

impl Unmovable {
    pub fn new(id: ElementId, kind: UnmovableKind, position: Position, lifecycle: Lifecycle) -> Self {
        Self {
            id,
            kind,
            position,
            animation: Animation::default(),
            lifecycle,
        }
    }

    /// Owner of a bomb, `None` for walls and boxes.
    pub fn bomb_owner(&self) -> Option<ElementId> {
        match self.kind {
            UnmovableKind::Bomb { owner, .. } => Some(owner),
            _ => None,
        }
    }
}

impl Element for Unmovable {
    fn id(&self) -> ElementId {
        self.id
    }

    fn position(&self) -> Position {
        self.position
    }
}
