//! Grid collision queries and swept movement.
//!
//! Two positions collide when they fall into the same grid square. The
//! engine keeps no state besides the square size; every query works on the
//! entity lists passed in.

use shared::Position;

use crate::entity::{Element, ElementId, Movable, Unmovable, UnmovableKind};

#[derive(Debug, Clone, Copy)]
pub struct Collision {
    square_size: i32,
}

impl Collision {
    pub fn new(square_size: i32) -> Self {
        Self {
            square_size: square_size.max(1),
        }
    }

    pub fn square_size(&self) -> i32 {
        self.square_size
    }

    /// True iff `a` and `b` map to the same grid square.
    pub fn squares_overlap(&self, a: Position, b: Position) -> bool {
        a.square(self.square_size) == b.square(self.square_size)
    }

    /// Every element of `list` sharing a square with `position`.
    ///
    /// `exclude` skips one element by identity; `predicate` keeps only the
    /// elements it accepts.
    pub fn collisions_at<'a, E: Element>(
        &self,
        list: &'a [E],
        position: Position,
        exclude: Option<ElementId>,
        predicate: Option<&dyn Fn(&E) -> bool>,
    ) -> Vec<&'a E> {
        list.iter()
            .filter(|element| Some(element.id()) != exclude)
            .filter(|element| self.squares_overlap(element.position(), position))
            .filter(|element| predicate.map_or(true, |keep| keep(element)))
            .collect()
    }

    /// Furthest position on the segment `from` → `to` that `mover` can reach.
    ///
    /// The segment is walked one pixel at a time. The walk stops right
    /// before the first position where an unmovable or another movable is
    /// solid for `mover` under the given predicates, so the result is `from`
    /// when the first step is already blocked and `to` when nothing blocks.
    pub fn sweep_move<U, M>(
        &self,
        movables: &[Movable],
        unmovables: &[Unmovable],
        from: Position,
        to: Position,
        mover: &Movable,
        unmovable_solid: U,
        movable_solid: M,
    ) -> Position
    where
        U: Fn(&Movable, &Unmovable) -> bool,
        M: Fn(&Movable, &Movable) -> bool,
    {
        let mut current = from;
        while current != to {
            let next = current.shift((to.y - current.y).signum(), (to.x - current.x).signum());

            let blocked_by_unmovable = unmovables.iter().any(|obstacle| {
                self.squares_overlap(obstacle.position, next) && unmovable_solid(mover, obstacle)
            });
            let blocked_by_movable = movables.iter().any(|other| {
                other.id != mover.id
                    && self.squares_overlap(other.position, next)
                    && movable_solid(mover, other)
            });

            if blocked_by_unmovable || blocked_by_movable {
                return current;
            }
            current = next;
        }
        current
    }

    /// True once `mover` no longer shares a square with `bomb`.
    pub fn has_vacated(&self, mover: &Movable, bomb: &Unmovable) -> bool {
        !self.squares_overlap(mover.position, bomb.position)
    }
}

/// Walls and boxes block everyone. A bomb blocks everyone except its owner,
/// and blocks the owner too once it has walked out of it.
pub fn unmovable_is_solid(mover: &Movable, obstacle: &Unmovable) -> bool {
    match obstacle.kind {
        UnmovableKind::Wall | UnmovableKind::Box => true,
        UnmovableKind::Bomb {
            owner,
            moved_out_of_bomb,
        } => owner != mover.id || moved_out_of_bomb,
    }
}

/// Movables only block movables of their own faction.
pub fn movable_is_solid(mover: &Movable, other: &Movable) -> bool {
    mover.same_faction(other)
}
