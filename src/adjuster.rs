//! The single reference-fixup pass run after every structural edit (§4.6).
//!
//! `AdjustCtx` carries the same two sub-cases the reference implementation's
//! `adjust_ctx_t` does: a `clamp_rect` (for deletions, mapping references
//! that fell inside the deleted rectangle to its edge) and a `move_rect`
//! (for insertions/shifts, translating references that fell below/right of
//! the edit by a delta). A single pass, invoked once per structural edit
//! *after* the structural move of cells in the matrix, walks every stored
//! (row, col): marks, goto state, every reference map, and every cell's
//! expression tree in both the live sheet and every register.
//!
//! One deliberate divergence from the literal reference trace, recorded in
//! DESIGN.md: a *position* (a mark, the cursor, a frame trigger, a note's
//! source cell, a named/framed/color rectangle, a range-reference endpoint)
//! clamps to the real edge coordinate exactly as the reference
//! implementation's `cell_adjust`/`range_adjust` do. A standalone
//! `ExprNode::Var` — an actual formula reference to a single cell — instead
//! becomes a dangling reference (row/col driven negative) when it falls
//! inside a deleted rectangle, so `EvalEngine::eval` reports it as a
//! reference to a deleted cell (§4.5/§7's "ref" error kind) rather than
//! silently re-aliasing onto whatever shifted into that address. This
//! matches the worked example in §8 (S4): a formula that referenced a
//! since-deleted column must read as an error, not quietly become a
//! self- or cross-reference to unrelated data that happened to collapse
//! into the same slot.

use crate::expr::{CellRef, ExprNode, RangeRef};
use crate::geom::Rect;
use crate::registers::RegisterFile;
use crate::refmaps::RefMaps;
use crate::sheet::Sheet;

/// Sentinel row/col used to mark a dangling `ExprNode::Var` reference.
/// Always out of bounds, so `Sheet::get` naturally reports it as missing.
pub const DELETED: i32 = -1;

#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustCtx {
    pub clamp_rect: Option<Rect>,
    pub clamp_new_row: Option<i32>,
    pub clamp_new_col: Option<i32>,
    pub move_rect: Option<Rect>,
    pub move_dr: i32,
    pub move_dc: i32,
}

impl AdjustCtx {
    pub fn for_insert(move_rect: Rect, delta_rows: i32, delta_cols: i32) -> Self {
        AdjustCtx {
            clamp_rect: None,
            clamp_new_row: None,
            clamp_new_col: None,
            move_rect: Some(move_rect),
            move_dr: delta_rows,
            move_dc: delta_cols,
        }
    }

    pub fn for_delete(
        clamp_rect: Rect,
        clamp_new_row: Option<i32>,
        clamp_new_col: Option<i32>,
        move_rect: Rect,
        delta_rows: i32,
        delta_cols: i32,
    ) -> Self {
        AdjustCtx {
            clamp_rect: Some(clamp_rect),
            clamp_new_row,
            clamp_new_col,
            move_rect: Some(move_rect),
            move_dr: delta_rows,
            move_dc: delta_cols,
        }
    }

    pub fn for_move(move_rect: Rect, delta_rows: i32, delta_cols: i32) -> Self {
        Self::for_insert(move_rect, delta_rows, delta_cols)
    }
}

/// Position/edge clamp: used for marks, cursor, frame triggers, note
/// sources, and range-reference endpoints (first endpoint / non-range
/// positions). Matches the reference implementation's `cell_adjust`.
pub fn adjust_position(ctx: &AdjustCtx, row: i32, col: i32) -> (i32, i32) {
    if let Some(rect) = ctx.clamp_rect {
        if rect.contains(row, col) {
            let r = ctx.clamp_new_row.unwrap_or(row);
            let c = ctx.clamp_new_col.unwrap_or(col);
            return (r, c);
        }
    }
    if let Some(rect) = ctx.move_rect {
        if rect.contains(row, col) {
            return (row + ctx.move_dr, col + ctx.move_dc);
        }
    }
    (row, col)
}

/// Range-endpoint clamp for the *second* (bottom-right) endpoint: the
/// reference implementation subtracts one from the clamp target so a
/// deleted rectangle collapses the range rather than re-expanding it.
fn adjust_range_endpoint(ctx: &AdjustCtx, row: i32, col: i32, is_second: bool) -> (i32, i32) {
    if let Some(rect) = ctx.clamp_rect {
        if rect.contains(row, col) {
            let r = match ctx.clamp_new_row {
                Some(v) => if is_second { v - 1 } else { v },
                None => row,
            };
            let c = match ctx.clamp_new_col {
                Some(v) => if is_second { v - 1 } else { v },
                None => col,
            };
            return (r, c);
        }
    }
    if let Some(rect) = ctx.move_rect {
        if rect.contains(row, col) {
            return (row + ctx.move_dr, col + ctx.move_dc);
        }
    }
    (row, col)
}

pub fn adjust_rect(ctx: &AdjustCtx, rect: Rect) -> Rect {
    let (r0, c0) = adjust_range_endpoint(ctx, rect.r0, rect.c0, false);
    let (r1, c1) = adjust_range_endpoint(ctx, rect.r1, rect.c1, true);
    Rect::new(r0, c0, r1, c1)
}

fn adjust_range_ref(ctx: &AdjustCtx, rr: RangeRef) -> RangeRef {
    let (r0, c0) = adjust_range_endpoint(ctx, rr.start.row, rr.start.col, false);
    let (r1, c1) = adjust_range_endpoint(ctx, rr.end.row, rr.end.col, true);
    RangeRef::new(
        CellRef::new(r0, c0, rr.start.fix_row, rr.start.fix_col),
        CellRef::new(r1, c1, rr.end.fix_row, rr.end.fix_col),
    )
}

/// Clamp for a standalone `ExprNode::Var`: a hit against `clamp_rect`
/// becomes a dangling reference (see module docs) rather than a real edge.
fn adjust_var(ctx: &AdjustCtx, cref: CellRef) -> CellRef {
    if let Some(rect) = ctx.clamp_rect {
        if rect.contains(cref.row, cref.col) {
            return CellRef::new(DELETED, DELETED, cref.fix_row, cref.fix_col);
        }
    }
    if let Some(rect) = ctx.move_rect {
        if rect.contains(cref.row, cref.col) {
            return CellRef::new(cref.row + ctx.move_dr, cref.col + ctx.move_dc, cref.fix_row, cref.fix_col);
        }
    }
    cref
}

/// Entry point for walking a single expression tree, exposed to
/// `registers` (subsheets hold their own cells, outside `Sheet`).
pub fn adjust_expr_pub(ctx: &AdjustCtx, node: &mut ExprNode) {
    adjust_expr(ctx, node)
}

fn adjust_expr(ctx: &AdjustCtx, node: &mut ExprNode) {
    match node {
        ExprNode::Var(r) => *r = adjust_var(ctx, *r),
        ExprNode::Range(rr) => *rr = adjust_range_ref(ctx, *rr),
        ExprNode::Unary(_, c) => adjust_expr(ctx, c),
        ExprNode::Binary(_, l, r) => {
            adjust_expr(ctx, l);
            adjust_expr(ctx, r);
        }
        ExprNode::Cond(c, t, f) => {
            adjust_expr(ctx, c);
            adjust_expr(ctx, t);
            adjust_expr(ctx, f);
        }
        ExprNode::Call(_, args) => adjust_expr(ctx, args),
        ExprNode::ArgsCons(rest, value) => {
            adjust_expr(ctx, rest);
            adjust_expr(ctx, value);
        }
        ExprNode::External(cmd, arg, _) => {
            adjust_expr(ctx, cmd);
            adjust_expr(ctx, arg);
        }
        ExprNode::Const(_) | ExprNode::SConst(_) | ExprNode::ArgsNil => {}
    }
}

/// Runs the single adjust pass over every stored reference: marks, goto
/// state, every reference map, every live cell's expression in the sheet,
/// and every register's cells' expressions.
pub fn run(ctx: &AdjustCtx, sheet: &mut Sheet, registers: &mut RegisterFile, refmaps: &mut RefMaps) {
    for slot in sheet.marks_mut().iter_mut() {
        if let Some((r, c)) = slot {
            let (nr, nc) = adjust_position(ctx, *r, *c);
            *slot = Some((nr, nc));
        }
    }

    refmaps.adjust(ctx);

    let coords = sheet.iter_live_coords_all();
    for (r, c) in coords {
        if let Some(cell) = sheet.get_mut(r, c) {
            if let Some(expr) = cell.expr.as_mut() {
                adjust_expr(ctx, expr);
            }
        }
    }

    registers.adjust_all(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_reference_into_deleted_rect_becomes_dangling() {
        let ctx = AdjustCtx::for_delete(
            Rect::new(0, 1, 999, 1),
            None,
            Some(1),
            Rect::new(0, 2, 999, 999),
            0,
            -1,
        );
        let r = adjust_var(&ctx, CellRef::new(1, 1, false, false));
        assert_eq!(r.row, DELETED);
        assert_eq!(r.col, DELETED);
    }

    #[test]
    fn position_clamps_to_real_edge() {
        let ctx = AdjustCtx::for_delete(
            Rect::new(0, 1, 999, 1),
            None,
            Some(1),
            Rect::new(0, 2, 999, 999),
            0,
            -1,
        );
        let (r, c) = adjust_position(&ctx, 5, 1);
        assert_eq!((r, c), (5, 1));
    }

    #[test]
    fn range_right_endpoint_collapses_with_minus_one() {
        let ctx = AdjustCtx::for_delete(
            Rect::new(0, 1, 999, 1),
            None,
            Some(1),
            Rect::new(0, 2, 999, 999),
            0,
            -1,
        );
        let rr = RangeRef::new(CellRef::new(0, 0, false, false), CellRef::new(0, 1, false, false));
        let adjusted = adjust_range_ref(&ctx, rr);
        assert_eq!(adjusted.end.col, 0); // clamp_new_col(1) - 1
    }

    #[test]
    fn move_translates_inside_move_rect() {
        let ctx = AdjustCtx::for_insert(Rect::new(2, 0, 999, 999), 1, 0);
        let r = adjust_var(&ctx, CellRef::new(5, 3, false, false));
        assert_eq!((r.row, r.col), (6, 3));
        let r2 = adjust_var(&ctx, CellRef::new(1, 3, false, false));
        assert_eq!((r2.row, r2.col), (1, 3));
    }
}
