//! The 40-slot register file and the subsheet (detached rectangle) type it
//! holds (§3, §4.8).
//!
//! A register's contents are shared via `Rc<RefCell<Subsheet>>` rather than
//! a hand-rolled refcount: cloning an `Rc` is exactly "copy increments the
//! refcount", and dropping the last handle frees every owned cell the same
//! way the reference implementation's explicit `release` does. No
//! copy-on-write wrapper is needed because registers are either overwritten
//! outright or read-only after the edit that produced them (§9).

use crate::adjuster::{self, AdjustCtx};
use crate::cell::Cell;
use crate::error::{SheetError, SheetResult};
use crate::sheet::{ColFormat, RowFormat};
use std::cell::RefCell;
use std::rc::Rc;

pub const NUM_SLOTS: usize = 40;
pub const DEFAULT_SLOT: usize = 0;
pub const TMP1: usize = 1;
pub const TMP2: usize = 2;
const NUMERIC_BASE: usize = 3; // slots 3..=12 are numeric 0..=9
const NAMED_BASE: usize = 13; // slots 13..=38 are named a..=z
pub const ANON_SLOT: usize = 39;

/// Maps a register character to its slot index (§6): `"` -> anonymous,
/// `0`-`9` -> numeric, `a`-`z` -> named; anything else is an error.
pub fn slot_for_char(c: char) -> SheetResult<usize> {
    match c {
        '"' => Ok(ANON_SLOT),
        '0'..='9' => Ok(NUMERIC_BASE + (c as usize - '0' as usize)),
        'a'..='z' => Ok(NAMED_BASE + (c as usize - 'a' as usize)),
        _ => {
            log::warn!("unknown register character '{c}'");
            Err(SheetError::UnknownRegister(c))
        }
    }
}

pub fn numeric_slot(n: u8) -> usize {
    NUMERIC_BASE + n as usize
}

/// A detached rectangle of cells (§3). `cells[r][c]` is relative to
/// `(minrow, mincol)`; a `None` entry is an explicit hole (never written).
pub struct Subsheet {
    pub minrow: i32,
    pub mincol: i32,
    pub maxrow: i32,
    pub maxcol: i32,
    pub cells: Vec<Vec<Option<Cell>>>,
    pub row_fmt: Option<Vec<RowFormat>>,
    pub col_fmt: Option<Vec<ColFormat>>,
}

impl Subsheet {
    pub fn new(minrow: i32, mincol: i32, maxrow: i32, maxcol: i32) -> Self {
        let rows = (maxrow - minrow + 1).max(0) as usize;
        let cols = (maxcol - mincol + 1).max(0) as usize;
        Subsheet {
            minrow,
            mincol,
            maxrow,
            maxcol,
            cells: (0..rows).map(|_| (0..cols).map(|_| None).collect()).collect(),
            row_fmt: None,
            col_fmt: None,
        }
    }

    pub fn rows(&self) -> i32 {
        self.maxrow - self.minrow + 1
    }

    pub fn cols(&self) -> i32 {
        self.maxcol - self.mincol + 1
    }

    pub fn get(&self, r: i32, c: i32) -> Option<&Cell> {
        let (rr, cc) = (r - self.minrow, c - self.mincol);
        if rr < 0 || cc < 0 {
            return None;
        }
        self.cells.get(rr as usize)?.get(cc as usize)?.as_ref()
    }

    pub fn take(&mut self, r: i32, c: i32) -> Option<Cell> {
        let (rr, cc) = (r - self.minrow, c - self.mincol);
        if rr < 0 || cc < 0 {
            return None;
        }
        self.cells.get_mut(rr as usize)?.get_mut(cc as usize)?.take()
    }

    pub fn put(&mut self, r: i32, c: i32, cell: Cell) {
        let (rr, cc) = (r - self.minrow, c - self.mincol);
        if rr >= 0 && cc >= 0 {
            if let Some(row) = self.cells.get_mut(rr as usize) {
                if let Some(slot) = row.get_mut(cc as usize) {
                    *slot = Some(cell);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct RegisterFile {
    slots: Vec<Option<Rc<RefCell<Subsheet>>>>,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile { slots: (0..NUM_SLOTS).map(|_| None).collect() }
    }

    /// Releases whatever previously occupied `idx` and installs a fresh,
    /// uniquely owned subsheet there.
    pub fn alloc(&mut self, idx: usize, sub: Subsheet) -> Rc<RefCell<Subsheet>> {
        let rc = Rc::new(RefCell::new(sub));
        self.slots[idx] = Some(rc.clone());
        log::debug!("register {idx} allocated");
        rc
    }

    pub fn find(&self, idx: usize) -> Option<Rc<RefCell<Subsheet>>> {
        self.slots[idx].clone()
    }

    /// Shares storage: `dst` now points at the same subsheet as `src`
    /// (refcount increment).
    pub fn copy(&mut self, src: usize, dst: usize) {
        self.slots[dst] = self.slots[src].clone();
    }

    /// Decrements the refcount; the subsheet (and every cell it owns) is
    /// freed once the last handle is dropped.
    pub fn release(&mut self, idx: usize) {
        self.slots[idx] = None;
        log::debug!("register {idx} released");
    }

    pub fn refcount(&self, idx: usize) -> usize {
        self.slots[idx].as_ref().map(Rc::strong_count).unwrap_or(0)
    }

    /// Rotates the undo ring: numeric slot 9 is dropped, numeric 1..=8
    /// shift to 2..=9, leaving numeric 1 empty for the caller to fill (with
    /// `copy(DEFAULT_SLOT, numeric_slot(1))`).
    pub fn rotate_undo_ring(&mut self) {
        self.release(numeric_slot(9));
        for i in (1..9).rev() {
            self.slots[numeric_slot(i + 1)] = self.slots[numeric_slot(i)].take();
        }
        self.slots[numeric_slot(1)] = None;
    }

    /// Enumerates non-empty slots (used by persistence / `:reg` listings).
    pub fn list(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    pub fn adjust_all(&mut self, ctx: &AdjustCtx) {
        for slot in self.slots.iter() {
            if let Some(rc) = slot {
                // A register only has a unique owner to mutate through if
                // its refcount is 1; shared (undo-ring) copies are adjusted
                // once, through whichever slot visits them first, by taking
                // a mutable borrow — `RefCell` makes this safe even though
                // several slots may alias the same subsheet.
                if let Ok(mut sub) = rc.try_borrow_mut() {
                    for row in sub.cells.iter_mut() {
                        for cell in row.iter_mut().flatten() {
                            if let Some(expr) = cell.expr.as_mut() {
                                adjuster::adjust_expr_pub(ctx, expr);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_for_char_maps_the_three_families() {
        assert_eq!(slot_for_char('"').unwrap(), ANON_SLOT);
        assert_eq!(slot_for_char('0').unwrap(), NUMERIC_BASE);
        assert_eq!(slot_for_char('9').unwrap(), NUMERIC_BASE + 9);
        assert_eq!(slot_for_char('a').unwrap(), NAMED_BASE);
        assert_eq!(slot_for_char('z').unwrap(), NAMED_BASE + 25);
        assert!(slot_for_char('!').is_err());
    }

    #[test]
    fn copy_shares_storage_and_release_drops_refcount() {
        let mut regs = RegisterFile::new();
        regs.alloc(DEFAULT_SLOT, Subsheet::new(0, 0, 0, 0));
        assert_eq!(regs.refcount(DEFAULT_SLOT), 1);
        regs.copy(DEFAULT_SLOT, TMP1);
        assert_eq!(regs.refcount(DEFAULT_SLOT), 2);
        regs.release(TMP1);
        assert_eq!(regs.refcount(DEFAULT_SLOT), 1);
    }

    #[test]
    fn rotate_undo_ring_shifts_and_drops_nine() {
        let mut regs = RegisterFile::new();
        for n in 1..=9u8 {
            regs.alloc(numeric_slot(n), Subsheet::new(n as i32, 0, n as i32, 0));
        }
        regs.rotate_undo_ring();
        assert!(regs.find(numeric_slot(1)).is_none());
        let two = regs.find(numeric_slot(2)).unwrap();
        assert_eq!(two.borrow().minrow, 1); // what was numeric 1
        let nine = regs.find(numeric_slot(9)).unwrap();
        assert_eq!(nine.borrow().minrow, 8); // what was numeric 8
    }
}
