//! Structural edits: insert/delete row/col, move, copy, fill, lock/unlock,
//! align, format, sort, erase/yank/pull through the register file (§4.7).
//!
//! Every operation that removes live cells stages them into a register
//! (subsheet) before touching the matrix, builds the matching `AdjustCtx`,
//! and calls `adjuster::run` once after the structural move — matching the
//! reference implementation's "the adjuster runs once per edit, after the
//! cells have already moved" discipline (§4.6).

use crate::adjuster::{self, AdjustCtx};
use crate::cell::{Alignment, Cell, CellFlags};
use crate::error::{SheetError, SheetResult};
use crate::expr::NodePool;
use crate::geom::Rect;
use crate::refmaps::RefMaps;
use crate::registers::{self, RegisterFile, Subsheet};
use crate::sheet::{Sheet, HARD_MAX_COLS, HARD_MAX_ROWS};
use crate::string_pool::PoolString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Before,
    After,
}

/// Aborts *before* any mutation if a locked cell in `rect` would be
/// touched under protect mode (§4.7, §7's pre-check rule).
pub(crate) fn check_unlocked(sheet: &Sheet, rect: Rect, protect: bool) -> SheetResult<()> {
    if !protect {
        return Ok(());
    }
    for r in rect.r0..=rect.r1 {
        for c in rect.c0..=rect.c1 {
            if let Some(cell) = sheet.get(r, c) {
                if cell.is_locked() {
                    log::warn!("edit aborted: cell ({r},{c}) is locked under protect mode");
                    return Err(SheetError::Locked { row: r, col: c });
                }
            }
        }
    }
    Ok(())
}

/// Drains a rectangle out of the sheet into a freshly allocated subsheet in
/// register `idx` (§4.8's storage invariant: cells leave the sheet cleanly
/// via `take`, so no expression is double-owned).
fn stage_into_register(sheet: &mut Sheet, regs: &mut RegisterFile, idx: usize, rect: Rect) {
    let mut sub = Subsheet::new(rect.r0, rect.c0, rect.r1, rect.c1);
    for r in rect.r0..=rect.r1 {
        for c in rect.c0..=rect.c1 {
            if let Some(mut cell) = sheet.take(r, c) {
                cell.flags.insert(CellFlags::DELETED);
                sub.put(r, c, cell);
            }
        }
    }
    regs.alloc(idx, sub);
}

/// Reinserts every cell from register `idx`'s subsheet back into the sheet
/// at an optional coordinate translation, clearing the `DELETED` flag per
/// the §4.8 storage invariant.
fn unstage_from_register(
    sheet: &mut Sheet,
    pool: &mut NodePool,
    regs: &RegisterFile,
    idx: usize,
    dr: i32,
    dc: i32,
) -> SheetResult<()> {
    let rc = match regs.find(idx) {
        Some(rc) => rc,
        None => return Ok(()),
    };
    let sub = rc.borrow();
    for r in sub.minrow..=sub.maxrow {
        for c in sub.mincol..=sub.maxcol {
            if let Some(mut cell) = sub.get(r, c).map(|c| c.duplicate(pool)) {
                cell.flags.remove(CellFlags::DELETED);
                sheet.set(r + dr, c + dc, cell, pool)?;
            }
        }
    }
    Ok(())
}

/// Rotates the undo ring and copies the default slot's current contents
/// into slot 1 (§4.7's post-delete bookkeeping).
fn rotate_undo_ring_from_default(regs: &mut RegisterFile) {
    regs.rotate_undo_ring();
    regs.copy(registers::DEFAULT_SLOT, registers::numeric_slot(1));
}

pub fn insert_rows(
    sheet: &mut Sheet,
    side: Side,
    at: i32,
    n: i32,
) -> SheetResult<AdjustCtx> {
    let first = match side {
        Side::Before => at,
        Side::After => at + 1,
    };
    sheet.insert_rows(first, n)?;
    log::debug!("inserted {n} row(s) at {first}");
    // References at or below the insertion point keep pointing at the same
    // logical cell, which the physical splice has already moved down by n.
    let move_rect = Rect::new(first, 0, HARD_MAX_ROWS - 1, HARD_MAX_COLS - 1);
    let ctx = AdjustCtx::for_insert(move_rect, n, 0);
    Ok(ctx)
}

pub fn insert_cols(sheet: &mut Sheet, side: Side, at: i32, n: i32) -> SheetResult<AdjustCtx> {
    let first = match side {
        Side::Before => at,
        Side::After => at + 1,
    };
    sheet.insert_cols(first, n)?;
    log::debug!("inserted {n} col(s) at {first}");
    let move_rect = Rect::new(0, first, HARD_MAX_ROWS - 1, HARD_MAX_COLS - 1);
    let ctx = AdjustCtx::for_insert(move_rect, 0, n);
    Ok(ctx)
}

/// Deletes rows `r0..=r1`, staging their contents into register slot 0 and
/// rotating the undo ring, per §4.7.
pub fn delete_rows(
    sheet: &mut Sheet,
    regs: &mut RegisterFile,
    protect: bool,
    r0: i32,
    r1: i32,
) -> SheetResult<AdjustCtx> {
    let rect = Rect::new(r0, 0, r1, sheet.maxcol.max(0));
    check_unlocked(sheet, rect, protect)?;
    stage_into_register(sheet, regs, registers::DEFAULT_SLOT, rect);
    let n = r1 - r0 + 1;
    sheet.delete_rows(r0, n);
    rotate_undo_ring_from_default(regs);
    log::debug!("deleted rows {r0}..={r1}, staged into register 0");

    let clamp_rect = Rect::new(r0, 0, r1, HARD_MAX_COLS - 1);
    let move_rect = Rect::new(r1 + 1, 0, HARD_MAX_ROWS - 1, HARD_MAX_COLS - 1);
    Ok(AdjustCtx::for_delete(clamp_rect, Some(r0), None, move_rect, -n, 0))
}

pub fn delete_cols(
    sheet: &mut Sheet,
    regs: &mut RegisterFile,
    protect: bool,
    c0: i32,
    c1: i32,
) -> SheetResult<AdjustCtx> {
    let rect = Rect::new(0, c0, sheet.maxrow.max(0), c1);
    check_unlocked(sheet, rect, protect)?;
    stage_into_register(sheet, regs, registers::DEFAULT_SLOT, rect);
    let n = c1 - c0 + 1;
    sheet.delete_cols(c0, n);
    rotate_undo_ring_from_default(regs);
    log::debug!("deleted cols {c0}..={c1}, staged into register 0");

    let clamp_rect = Rect::new(0, c0, HARD_MAX_ROWS - 1, c1);
    let move_rect = Rect::new(0, c1 + 1, HARD_MAX_ROWS - 1, HARD_MAX_COLS - 1);
    Ok(AdjustCtx::for_delete(clamp_rect, None, Some(c0), move_rect, 0, -n))
}

/// Moves `src` to a destination whose top-left lands at `dst_origin`:
/// drains the source into scratch slot TMP1, frees the destination area,
/// then reinstalls with translated coordinates. Only cell *positions*
/// change — expressions inside the moved cells are not retargeted to a new
/// relative frame, matching a plain move (§4.7).
pub fn move_area(
    sheet: &mut Sheet,
    pool: &mut NodePool,
    regs: &mut RegisterFile,
    src: Rect,
    dst_origin: (i32, i32),
) -> SheetResult<AdjustCtx> {
    let (dr, dc) = (dst_origin.0 - src.r0, dst_origin.1 - src.c0);
    stage_into_register(sheet, regs, registers::TMP1, src);
    let dst = Rect::new(
        dst_origin.0,
        dst_origin.1,
        dst_origin.0 + src.rows() - 1,
        dst_origin.1 + src.cols() - 1,
    );
    for r in dst.r0..=dst.r1 {
        for c in dst.c0..=dst.c1 {
            sheet.set(r, c, Cell::empty(), pool)?;
        }
    }
    unstage_from_register(sheet, pool, regs, registers::TMP1, dr, dc)?;
    regs.release(registers::TMP1);
    log::debug!("moved {src:?} by ({dr},{dc})");
    Ok(AdjustCtx::for_move(src, dr, dc))
}

/// Copies `src` to a destination whose top-left lands at `dst_origin`.
/// `transpose` swaps row/col deltas and reference axes, per `copy_expr`
/// (§4.7, and scenario S7). Marks and named ranges are not adjusted: copy
/// does not move anything, it only creates new cells.
pub fn copy_range(
    sheet: &mut Sheet,
    pool: &mut NodePool,
    src: Rect,
    dst_origin: (i32, i32),
    transpose: bool,
) -> SheetResult<()> {
    let src_bounds = (src.r0, src.c0, src.r1, src.c1);
    let (dr, dc) = (dst_origin.0 - src.r0, dst_origin.1 - src.c0);

    // Read every source cell and build its translated replacement before
    // touching the destination, so an overlapping copy (src and dst share
    // cells) never clobbers data it still needs to read.
    let mut staged = Vec::new();
    for r in src.r0..=src.r1 {
        for c in src.c0..=src.c1 {
            if let Some(cell) = sheet.get(r, c) {
                let translated_expr = cell
                    .expr
                    .as_ref()
                    .map(|e| pool.clone_translated(e, dr, dc, Some(src_bounds), transpose));
                let new_cell = Cell {
                    tag: cell.tag,
                    v: cell.v,
                    label: cell.label.clone(),
                    format: cell.format.clone(),
                    expr: translated_expr,
                    flags: cell.flags,
                    align: cell.align,
                    clip: cell.clip,
                    error: cell.error,
                };
                let (tr, tc) = (r - src.r0, c - src.c0);
                let (dst_r, dst_c) = if transpose {
                    (dst_origin.0 + tc, dst_origin.1 + tr)
                } else {
                    (dst_origin.0 + tr, dst_origin.1 + tc)
                };
                staged.push((dst_r, dst_c, new_cell));
            }
        }
    }

    let (dst_rows, dst_cols) = if transpose {
        (src.cols(), src.rows())
    } else {
        (src.rows(), src.cols())
    };
    let dst = Rect::new(dst_origin.0, dst_origin.1, dst_origin.0 + dst_rows - 1, dst_origin.1 + dst_cols - 1);
    for r in dst.r0..=dst.r1 {
        for c in dst.c0..=dst.c1 {
            sheet.set(r, c, Cell::empty(), pool)?;
        }
    }
    for (dst_r, dst_c, new_cell) in staged {
        sheet.set(dst_r, dst_c, new_cell, pool)?;
    }
    Ok(())
}

/// `fill(rr, start, inc, by_cols)`: every cell becomes a number
/// `start + k * inc`, with `k` the cell's index along the fill axis;
/// clears any prior expression and label (§4.7).
pub fn fill(sheet: &mut Sheet, pool: &mut NodePool, rect: Rect, start: f64, inc: f64, by_cols: bool) -> SheetResult<()> {
    let mut k = 0.0;
    if by_cols {
        for c in rect.c0..=rect.c1 {
            for r in rect.r0..=rect.r1 {
                sheet.set(r, c, Cell::number(start + k * inc), pool)?;
            }
            k += 1.0;
        }
    } else {
        for r in rect.r0..=rect.r1 {
            for c in rect.c0..=rect.c1 {
                sheet.set(r, c, Cell::number(start + k * inc), pool)?;
            }
            k += 1.0;
        }
    }
    Ok(())
}

pub fn lock(sheet: &mut Sheet, rect: Rect, locked: bool) -> SheetResult<()> {
    for r in rect.r0..=rect.r1 {
        for c in rect.c0..=rect.c1 {
            if let Some(cell) = sheet.get_mut(r, c) {
                cell.flags.set(CellFlags::LOCKED, locked);
            }
        }
    }
    log::debug!("{} {rect:?}", if locked { "locked" } else { "unlocked" });
    Ok(())
}

pub fn align(sheet: &mut Sheet, rect: Rect, alignment: Alignment) -> SheetResult<()> {
    for r in rect.r0..=rect.r1 {
        for c in rect.c0..=rect.c1 {
            if let Some(cell) = sheet.get_mut(r, c) {
                cell.align = alignment;
            }
        }
    }
    Ok(())
}

pub fn format_cells(sheet: &mut Sheet, rect: Rect, fmt: &str) -> SheetResult<()> {
    for r in rect.r0..=rect.r1 {
        for c in rect.c0..=rect.c1 {
            if let Some(cell) = sheet.get_mut(r, c) {
                cell.format = Some(PoolString::new(fmt));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct SortCriterion {
    pub column: i32,
    pub descending: bool,
}

/// Rank used to order cells by tag when sorting a mixed column:
/// empty > error > boolean > string > number (§4.7).
fn sort_rank(cell: Option<&Cell>) -> u8 {
    use crate::cell::CellTag;
    match cell {
        None => 4,
        Some(c) => match c.tag {
            CellTag::Empty => 4,
            CellTag::Error => 3,
            CellTag::Boolean => 2,
            CellTag::String => 1,
            CellTag::Number => 0,
        },
    }
}

fn compare_cells(a: Option<&Cell>, b: Option<&Cell>) -> std::cmp::Ordering {
    use crate::cell::CellTag;
    let (ra, rb) = (sort_rank(a), sort_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(x), Some(y)) if x.tag == CellTag::Number => {
            x.v.partial_cmp(&y.v).unwrap_or(std::cmp::Ordering::Equal)
        }
        (Some(x), Some(y)) if x.tag == CellTag::String => {
            let xs = x.label.as_ref().map(|s| s.as_str()).unwrap_or("");
            let ys = y.label.as_ref().map(|s| s.as_str()).unwrap_or("");
            xs.cmp(ys)
        }
        _ => std::cmp::Ordering::Equal,
    }
}

/// Stable sort of `rect` by `criteria` (§4.7, §8 property 3 and scenario
/// S5). Expressions whose references cross the sorted rectangle are *not*
/// rewritten — this reproduces the reference implementation's documented
/// behaviour (§9 Open Questions: preserved as-is).
pub fn sort(sheet: &mut Sheet, pool: &mut NodePool, regs: &mut RegisterFile, rect: Rect, criteria: &[SortCriterion]) -> SheetResult<()> {
    stage_into_register(sheet, regs, registers::TMP2, rect);
    let rc = regs.find(registers::TMP2).unwrap();
    let sub = rc.borrow();

    let nrows = rect.rows() as usize;
    let mut order: Vec<usize> = (0..nrows).collect();
    order.sort_by(|&i, &j| {
        let ri = rect.r0 + i as i32;
        let rj = rect.r0 + j as i32;
        for crit in criteria {
            let a = sub.get(ri, crit.column);
            let b = sub.get(rj, crit.column);
            let mut ord = compare_cells(a, b);
            if crit.descending {
                ord = ord.reverse();
            }
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        i.cmp(&j) // stability: ties keep original relative order
    });

    for (dest_offset, &src_offset) in order.iter().enumerate() {
        let dest_row = rect.r0 + dest_offset as i32;
        let src_row = rect.r0 + src_offset as i32;
        for c in rect.c0..=rect.c1 {
            if let Some(cell) = sub.get(src_row, c) {
                let mut moved = cell.duplicate(pool);
                moved.flags.remove(CellFlags::DELETED);
                sheet.set(dest_row, c, moved, pool)?;
            }
        }
    }
    drop(sub);
    regs.release(registers::TMP2);
    log::debug!("sorted {rect:?} by {} criteria", criteria.len());
    Ok(())
}

/// `erase(rr)`: clears `rr`, pushing its previous contents onto the undo
/// ring (§4.7, §8 property 5).
pub fn erase(sheet: &mut Sheet, pool: &mut NodePool, regs: &mut RegisterFile, rect: Rect) -> SheetResult<()> {
    stage_into_register(sheet, regs, registers::DEFAULT_SLOT, rect);
    for r in rect.r0..=rect.r1 {
        for c in rect.c0..=rect.c1 {
            sheet.set(r, c, Cell::empty(), pool)?;
        }
    }
    rotate_undo_ring_from_default(regs);
    log::debug!("erased {rect:?}, staged into register 0");
    Ok(())
}

/// `yank(rr, slot)`: copies (does not clear) `rr` into `slot`.
pub fn yank(sheet: &mut Sheet, pool: &mut NodePool, regs: &mut RegisterFile, rect: Rect, slot: usize) {
    let mut sub = Subsheet::new(rect.r0, rect.c0, rect.r1, rect.c1);
    for r in rect.r0..=rect.r1 {
        for c in rect.c0..=rect.c1 {
            if let Some(cell) = sheet.get(r, c) {
                sub.put(r, c, cell.duplicate(pool));
            }
        }
    }
    regs.alloc(slot, sub);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullVariant {
    /// Overwrite destination with register contents.
    Plain,
    /// Insert enough rows at `dst` to hold the register, then pull.
    InsertRows,
    /// Insert enough columns at `dst` to hold the register, then pull.
    InsertCols,
    /// Swap destination contents with the register's.
    Exchange,
    /// Only fill cells at `dst` that are currently empty.
    Merge,
    /// Copy only the format/alignment, not values or expressions.
    FormatOnly,
    /// Transpose rows/columns while pulling.
    Transpose,
    /// Equivalent to `copy_range` from the register's footprint to `dst`.
    Copy,
}

/// Pulls (pastes) register `slot`'s contents to `dst`, per the variant
/// (§4.7). Each variant routes through the same `copy_range`/`move_area`-
/// style primitives used by the interactive commands.
pub fn pull(
    sheet: &mut Sheet,
    pool: &mut NodePool,
    regs: &mut RegisterFile,
    refmaps: &mut RefMaps,
    slot: usize,
    dst: (i32, i32),
    variant: PullVariant,
) -> SheetResult<()> {
    let rc = match regs.find(slot) {
        Some(rc) => rc,
        None => return Ok(()),
    };
    let (minrow, mincol, maxrow, maxcol) = {
        let sub = rc.borrow();
        (sub.minrow, sub.mincol, sub.maxrow, sub.maxcol)
    };
    let rows = maxrow - minrow + 1;
    let cols = maxcol - mincol + 1;

    match variant {
        PullVariant::InsertRows => {
            let ctx = insert_rows(sheet, Side::Before, dst.0, rows)?;
            adjuster::run(&ctx, sheet, regs, refmaps);
        }
        PullVariant::InsertCols => {
            let ctx = insert_cols(sheet, Side::Before, dst.1, cols)?;
            adjuster::run(&ctx, sheet, regs, refmaps);
        }
        _ => {}
    }

    let result = match variant {
        PullVariant::FormatOnly => {
            let sub = rc.borrow();
            for r in minrow..=maxrow {
                for c in mincol..=maxcol {
                    if let Some(src) = sub.get(r, c) {
                        let dst_r = dst.0 + (r - minrow);
                        let dst_c = dst.1 + (c - mincol);
                        if let Some(dest) = sheet.get_mut(dst_r, dst_c) {
                            dest.format = src.format.clone();
                            dest.align = src.align;
                        }
                    }
                }
            }
            Ok(())
        }
        PullVariant::Merge => {
            let sub = rc.borrow();
            for r in minrow..=maxrow {
                for c in mincol..=maxcol {
                    let dst_r = dst.0 + (r - minrow);
                    let dst_c = dst.1 + (c - mincol);
                    let occupied = sheet.get(dst_r, dst_c).map(|c| c.is_live()).unwrap_or(false);
                    if occupied {
                        continue;
                    }
                    if let Some(src) = sub.get(r, c) {
                        let mut merged = src.duplicate(pool);
                        merged.flags.remove(CellFlags::DELETED);
                        sheet.set(dst_r, dst_c, merged, pool)?;
                    }
                }
            }
            Ok(())
        }
        PullVariant::Exchange => {
            let sub_cells: Vec<_> = {
                let sub = rc.borrow();
                (minrow..=maxrow)
                    .flat_map(|r| (mincol..=maxcol).map(move |c| (r, c)))
                    .filter_map(|(r, c)| sub.get(r, c).map(|cell| (r, c, cell.duplicate(pool))))
                    .collect()
            };
            let mut new_sub = Subsheet::new(minrow, mincol, maxrow, maxcol);
            for (r, c, _) in &sub_cells {
                let dst_r = dst.0 + (r - minrow);
                let dst_c = dst.1 + (c - mincol);
                if let Some(mut existing) = sheet.take(dst_r, dst_c) {
                    existing.flags.insert(CellFlags::DELETED);
                    new_sub.put(*r, *c, existing);
                }
            }
            for (r, c, mut cell) in sub_cells {
                let dst_r = dst.0 + (r - minrow);
                let dst_c = dst.1 + (c - mincol);
                cell.flags.remove(CellFlags::DELETED);
                sheet.set(dst_r, dst_c, cell, pool)?;
            }
            regs.alloc(slot, new_sub);
            Ok(())
        }
        PullVariant::Transpose | PullVariant::Copy => {
            let src_rect = Rect::new(minrow, mincol, maxrow, maxcol);
            copy_range(sheet, pool, src_rect, dst, variant == PullVariant::Transpose)
        }
        PullVariant::Plain | PullVariant::InsertRows | PullVariant::InsertCols => {
            unstage_from_register(sheet, pool, regs, slot, dst.0 - minrow, dst.1 - mincol)
        }
    };
    log::debug!("pulled register {slot} to ({},{}) as {variant:?}", dst.0, dst.1);
    result
}
