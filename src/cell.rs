//! The `Cell` type (§3): position-free value + optional expression, the
//! bitfield of flags, and the cell-level error code.

use crate::expr::{ExprNode, NodePool};
use crate::string_pool::PoolString;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u16 {
        const CHANGED     = 1 << 0;
        const VALID       = 1 << 1;
        const CLEARED     = 1 << 2;
        const LOCKED      = 1 << 3;
        const HAS_NOTE    = 1 << 4;
        const STRING_EXPR = 1 << 5;
        const MAY_SYNC    = 1 << 6;
        const DELETED     = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Default,
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellTag {
    Empty,
    Number,
    String,
    Boolean,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    Error,
    Invalid,
}

pub struct Cell {
    pub tag: CellTag,
    pub v: f64,
    pub label: Option<PoolString>,
    pub format: Option<PoolString>,
    pub expr: Option<Box<ExprNode>>,
    pub flags: CellFlags,
    pub align: Alignment,
    pub clip: bool,
    pub error: ErrorCode,
}

impl Cell {
    pub fn empty() -> Self {
        Cell {
            tag: CellTag::Empty,
            v: 0.0,
            label: None,
            format: None,
            expr: None,
            flags: CellFlags::VALID,
            align: Alignment::Default,
            clip: false,
            error: ErrorCode::Ok,
        }
    }

    pub fn number(x: f64) -> Self {
        Cell { tag: CellTag::Number, v: x, ..Cell::empty() }
    }

    pub fn string(s: PoolString, align: Alignment) -> Self {
        Cell { tag: CellTag::String, label: Some(s), align, ..Cell::empty() }
    }

    pub fn boolean(b: bool) -> Self {
        Cell { tag: CellTag::Boolean, v: if b { 1.0 } else { 0.0 }, ..Cell::empty() }
    }

    /// A cell is *live* when it has a non-empty tag or an expression (§3).
    pub fn is_live(&self) -> bool {
        self.tag != CellTag::Empty || self.expr.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(CellFlags::LOCKED)
    }

    pub fn set_changed(&mut self, changed: bool) {
        self.flags.set(CellFlags::CHANGED, changed);
    }

    /// Deep-clones a cell for `EditOps::copy` (value-duplication): a new
    /// cell with its own cloned expression tree, label and format, and
    /// copied flags. Callers translate the expression afterward via
    /// `NodePool::clone_translated` if the cell carries one.
    pub fn duplicate(&self, pool: &mut NodePool) -> Cell {
        Cell {
            tag: self.tag,
            v: self.v,
            label: self.label.clone(),
            format: self.format.clone(),
            expr: self
                .expr
                .as_ref()
                .map(|e| pool.clone_translated(e, 0, 0, None, false)),
            flags: self.flags,
            align: self.align,
            clip: self.clip,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cell_is_not_live() {
        let c = Cell::empty();
        assert!(!c.is_live());
    }

    #[test]
    fn number_cell_is_live() {
        let c = Cell::number(4.0);
        assert!(c.is_live());
    }

    #[test]
    fn duplicate_clones_expression_independently() {
        let mut pool = NodePool::new();
        let mut c = Cell::number(1.0);
        c.expr = Some(pool.alloc_const(9.0));
        let dup = c.duplicate(&mut pool);
        match (&c.expr, &dup.expr) {
            (Some(a), Some(b)) => assert!(!std::ptr::eq(a.as_ref(), b.as_ref())),
            _ => panic!("expected both to carry expressions"),
        }
    }
}
