//! The cell-store command facade (§6): one `Document` bundling the sheet,
//! node pool, register file, reference maps and configuration, exposing the
//! flat operation surface a UI or loader drives instead of each module's raw
//! API. This mirrors the reference implementation's `process_command.rs`
//! dispatch layer, minus the text-command parsing (that lives in
//! `persistence.rs`): every method here already takes typed arguments.
//!
//! Every operation that produces an `AdjustCtx` (insert/delete/move) runs
//! `adjuster::run` itself, right after the structural change — callers never
//! see a half-adjusted sheet. `copy` does not move anything, so it never
//! produces one (§4.7).

use crate::adjuster;
use crate::cell::{Alignment, Cell};
use crate::config::Config;
use crate::editops::{self, PullVariant, Side, SortCriterion};
use crate::error::SheetResult;
use crate::expr::{ExprNode, NodePool};
use crate::geom::Rect;
use crate::recalc::{RecalcDriver, RecalcReport};
use crate::refmaps::{NoteContent, RefMaps};
use crate::registers::{self, RegisterFile};
use crate::sheet::{RecalcOrder, Sheet};
use crate::string_pool::PoolString;

pub struct Document {
    pub sheet: Sheet,
    pub pool: NodePool,
    pub regs: RegisterFile,
    pub refmaps: RefMaps,
    pub config: Config,
    current_register: usize,
    /// `color n = expr`: numbered conditional-color rules (§6). No consumer
    /// in this core evaluates them against a cell's displayed color — that
    /// belongs to the curses UI left out of scope — so they are carried
    /// here purely so persistence round-trips them.
    pub color_rules: Vec<(i32, Box<ExprNode>)>,
    /// `abbrev "name text"` macro table, in definition order (§6).
    pub abbreviations: Vec<(String, String)>,
}

impl Document {
    pub fn new() -> Self {
        Document {
            sheet: Sheet::new(),
            pool: NodePool::new(),
            regs: RegisterFile::new(),
            refmaps: RefMaps::new(),
            config: Config::default(),
            current_register: registers::DEFAULT_SLOT,
            color_rules: Vec::new(),
            abbreviations: Vec::new(),
        }
    }

    pub fn add_color_rule(&mut self, n: i32, tree: Box<ExprNode>) {
        self.color_rules.push((n, tree));
    }

    pub fn define_abbrev(&mut self, name: &str, text: &str) {
        self.abbreviations.retain(|(n, _)| n != name);
        self.abbreviations.push((name.to_string(), text.to_string()));
    }

    fn check_unlocked(&self, rect: Rect) -> SheetResult<()> {
        editops::check_unlocked(&self.sheet, rect, self.config.protect)
    }

    fn run_adjust(&mut self, ctx: &adjuster::AdjustCtx) {
        adjuster::run(ctx, &mut self.sheet, &mut self.regs, &mut self.refmaps);
    }

    // --- single-cell writes ---

    pub fn set_number(&mut self, row: i32, col: i32, x: f64) -> SheetResult<()> {
        self.check_unlocked(Rect::single(row, col))?;
        self.sheet.set(row, col, Cell::number(x), &mut self.pool)
    }

    pub fn set_string(&mut self, row: i32, col: i32, s: &str, align: Alignment) -> SheetResult<()> {
        self.check_unlocked(Rect::single(row, col))?;
        self.sheet.set(row, col, Cell::string(PoolString::new(s), align), &mut self.pool)
    }

    /// `label R C = text-or-expr`: a string constant with `label`'s default
    /// alignment, distinct from `set_string`'s `leftstring`/`rightstring`
    /// entry point only in which persistence keyword produced the call.
    pub fn set_label(&mut self, row: i32, col: i32, s: &str, align: Alignment) -> SheetResult<()> {
        self.set_string(row, col, s, align)
    }

    /// Installs an already-parsed expression tree at `(row, col)`.
    /// `string_valued` marks the `STRING_EXPR` flag so recalc routes through
    /// `seval` instead of `eval` (§4.5).
    pub fn set_expression(
        &mut self,
        row: i32,
        col: i32,
        tree: Box<ExprNode>,
        string_valued: bool,
    ) -> SheetResult<()> {
        self.check_unlocked(Rect::single(row, col))?;
        let mut cell = if string_valued { Cell::string(PoolString::new(""), Alignment::Default) } else { Cell::number(0.0) };
        cell.flags.set(crate::cell::CellFlags::STRING_EXPR, string_valued);
        cell.expr = Some(tree);
        self.sheet.set(row, col, cell, &mut self.pool)
    }

    pub fn set_format(&mut self, row: i32, col: i32, fmt: &str) -> SheetResult<()> {
        self.format_cells(Rect::single(row, col), fmt)
    }

    // --- clearing / register traffic ---

    /// Empties `rect` without touching any register (distinct from `erase`,
    /// which pushes the prior contents onto the undo ring).
    pub fn clear(&mut self, rect: Rect) -> SheetResult<()> {
        self.check_unlocked(rect)?;
        for r in rect.r0..=rect.r1 {
            for c in rect.c0..=rect.c1 {
                self.sheet.set(r, c, Cell::empty(), &mut self.pool)?;
            }
        }
        Ok(())
    }

    pub fn erase(&mut self, rect: Rect) -> SheetResult<()> {
        self.check_unlocked(rect)?;
        editops::erase(&mut self.sheet, &mut self.pool, &mut self.regs, rect)
    }

    pub fn yank(&mut self, rect: Rect) {
        editops::yank(&mut self.sheet, &mut self.pool, &mut self.regs, rect, self.current_register);
    }

    pub fn pull(&mut self, dst: (i32, i32), variant: PullVariant) -> SheetResult<()> {
        editops::pull(
            &mut self.sheet,
            &mut self.pool,
            &mut self.regs,
            &mut self.refmaps,
            self.current_register,
            dst,
            variant,
        )
    }

    pub fn select_register(&mut self, name: char) -> SheetResult<()> {
        self.current_register = registers::slot_for_char(name)?;
        Ok(())
    }

    // --- structural edits ---

    pub fn insert_rows(&mut self, at: i32, n: i32, side: Side) -> SheetResult<()> {
        let ctx = editops::insert_rows(&mut self.sheet, side, at, n)?;
        self.run_adjust(&ctx);
        Ok(())
    }

    pub fn insert_cols(&mut self, at: i32, n: i32, side: Side) -> SheetResult<()> {
        let ctx = editops::insert_cols(&mut self.sheet, side, at, n)?;
        self.run_adjust(&ctx);
        Ok(())
    }

    pub fn delete_rows(&mut self, r0: i32, r1: i32) -> SheetResult<()> {
        let ctx = editops::delete_rows(&mut self.sheet, &mut self.regs, self.config.protect, r0, r1)?;
        self.run_adjust(&ctx);
        Ok(())
    }

    pub fn delete_cols(&mut self, c0: i32, c1: i32) -> SheetResult<()> {
        let ctx = editops::delete_cols(&mut self.sheet, &mut self.regs, self.config.protect, c0, c1)?;
        self.run_adjust(&ctx);
        Ok(())
    }

    pub fn move_cells(&mut self, src: Rect, dst_origin: (i32, i32)) -> SheetResult<()> {
        self.check_unlocked(src)?;
        let ctx = editops::move_area(&mut self.sheet, &mut self.pool, &mut self.regs, src, dst_origin)?;
        self.run_adjust(&ctx);
        Ok(())
    }

    /// Plain (non-transposing) copy; transposing copies go through
    /// `pull(PullVariant::Transpose)` after a `yank` (§8 scenario S7).
    pub fn copy_cells(&mut self, src: Rect, dst_origin: (i32, i32)) -> SheetResult<()> {
        self.check_unlocked(Rect::new(
            dst_origin.0,
            dst_origin.1,
            dst_origin.0 + src.rows() - 1,
            dst_origin.1 + src.cols() - 1,
        ))?;
        editops::copy_range(&mut self.sheet, &mut self.pool, src, dst_origin, false)
    }

    pub fn fill(&mut self, rect: Rect, start: f64, inc: f64, by_cols: bool) -> SheetResult<()> {
        self.check_unlocked(rect)?;
        editops::fill(&mut self.sheet, &mut self.pool, rect, start, inc, by_cols)
    }

    pub fn lock(&mut self, rect: Rect) -> SheetResult<()> {
        editops::lock(&mut self.sheet, rect, true)
    }

    pub fn unlock(&mut self, rect: Rect) -> SheetResult<()> {
        editops::lock(&mut self.sheet, rect, false)
    }

    pub fn align(&mut self, rect: Rect, alignment: Alignment) -> SheetResult<()> {
        editops::align(&mut self.sheet, rect, alignment)
    }

    pub fn format_cells(&mut self, rect: Rect, fmt: &str) -> SheetResult<()> {
        self.check_unlocked(rect)?;
        editops::format_cells(&mut self.sheet, rect, fmt)
    }

    pub fn sort(&mut self, rect: Rect, criteria: &[SortCriterion]) -> SheetResult<()> {
        self.check_unlocked(rect)?;
        editops::sort(&mut self.sheet, &mut self.pool, &mut self.regs, rect, criteria)
    }

    // --- reference maps ---

    pub fn define_name(&mut self, name: &str, rect: Rect) -> SheetResult<()> {
        self.refmaps.define_name(name, rect)
    }

    pub fn delete_name(&mut self, name: &str) -> SheetResult<()> {
        self.refmaps.delete_name(name)
    }

    pub fn add_note(&mut self, source: (i32, i32), content: NoteContent) {
        self.refmaps.add_note(source, content);
    }

    pub fn delete_note(&mut self, source: (i32, i32)) -> SheetResult<()> {
        self.refmaps.delete_note(source)
    }

    pub fn add_frame(&mut self, outer: Rect, inner: Rect, trigger: (i32, i32)) {
        self.refmaps.add_frame(outer, inner, trigger);
    }

    pub fn add_color_range(&mut self, rect: Rect, palette: i32) {
        self.refmaps.add_color_range(rect, palette);
    }

    // --- configuration / recalc ---

    pub fn set_iterations(&mut self, n: u32) {
        self.config.iterations = n.max(1);
    }

    pub fn set_order(&mut self, order: RecalcOrder) {
        self.config.order = order;
    }

    pub fn set_protect(&mut self, protect: bool) {
        self.config.protect = protect;
    }

    pub fn recalculate(&mut self) -> RecalcReport {
        RecalcDriver::new(&self.config).eval_all(&mut self.sheet)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, CellRef};
    use crate::parser::Parser;

    #[test]
    fn set_expression_then_recalculate_evaluates_a_formula() {
        let mut doc = Document::new();
        doc.set_number(0, 0, 2.0).unwrap();
        doc.set_number(1, 0, 3.0).unwrap();
        let tree = Parser::parse("A1+B1*2", &mut doc.pool, &doc.refmaps).unwrap();
        // A1+B1*2 parses against this sheet's own cell refs (A1, B1) regardless
        // of where the formula is installed; install it at (2, 0) = A3.
        doc.set_expression(2, 0, tree, false).unwrap();
        doc.recalculate();
        assert_eq!(doc.sheet.get(2, 0).unwrap().v, 8.0);
    }

    #[test]
    fn locked_cell_rejects_a_write_under_protect() {
        let mut doc = Document::new();
        doc.set_number(0, 0, 1.0).unwrap();
        doc.lock(Rect::single(0, 0)).unwrap();
        doc.set_protect(true);
        assert!(doc.set_number(0, 0, 2.0).is_err());
    }

    #[test]
    fn insert_rows_through_the_facade_runs_the_adjuster() {
        let mut doc = Document::new();
        doc.set_number(0, 0, 1.0).unwrap();
        let mut c = Cell::number(0.0);
        c.expr = Some(Box::new(ExprNode::Var(CellRef::new(0, 0, false, false))));
        doc.sheet.set(1, 0, c, &mut doc.pool).unwrap();

        doc.insert_rows(0, 1, Side::Before).unwrap();
        let moved = doc.sheet.get(2, 0).unwrap();
        match moved.expr.as_deref().unwrap() {
            ExprNode::Var(r) => assert_eq!(r.row, 1),
            _ => panic!("expected Var"),
        }
        let _ = BinOp::Add; // keep import used across edits without a separate test
    }
}
