//! The iterated recalculation driver (§4.10).
//!
//! `eval_all()` repeats a full pass over every live expression cell until a
//! pass changes nothing or the iteration cap is hit. The reference
//! implementation installs a per-process FPE signal handler around the
//! whole pass; here the value-level checks in `eval`/`seval` already cover
//! arithmetic traps (§4.5), so the driver's own job is narrower: per-cell
//! change detection, pass counting, and a `catch_unwind` backstop against a
//! logic bug inside a function handler (§4.5, §9).

use crate::cell::ErrorCode;
use crate::config::Config;
use crate::eval::{eval, seval, CellErrorKind, EvalContext};
use crate::sheet::{RecalcOrder, Sheet};
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecalcReport {
    pub converged: bool,
    pub passes: u32,
}

pub struct RecalcDriver {
    iterations: u32,
    order: RecalcOrder,
    external_enabled: bool,
    rng_seed: Option<u64>,
}

impl RecalcDriver {
    pub fn new(cfg: &Config) -> Self {
        RecalcDriver {
            iterations: cfg.iterations.max(1),
            order: cfg.order,
            external_enabled: cfg.external_enabled,
            rng_seed: cfg.rng_seed,
        }
    }

    pub fn set_iterations(&mut self, n: u32) {
        self.iterations = n.max(1);
    }

    pub fn set_order(&mut self, order: RecalcOrder) {
        self.order = order;
    }

    /// Runs passes until convergence or the iteration cap, whichever comes
    /// first (§8 property 6: terminates in at most `iterations` passes; if
    /// it terminates sooner, the last pass changed nothing).
    pub fn eval_all(&self, sheet: &mut Sheet) -> RecalcReport {
        sheet.order = self.order;
        let mut ctx = match self.rng_seed {
            Some(seed) => EvalContext::with_seed((0, 0), seed),
            None => EvalContext::new((0, 0)),
        };
        ctx.external_enabled = self.external_enabled;
        ctx.iteration_cap = self.iterations;

        let mut passes = 0;
        let mut converged = false;
        for _ in 0..self.iterations {
            passes += 1;
            let coords = sheet.iter_live_coords();
            let mut changed = 0u32;
            for (r, c) in coords {
                changed += eval_one_cell(sheet, &mut ctx, r, c);
            }
            if changed == 0 {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!("recalculation still changing after {passes} iterations");
        }
        RecalcReport { converged, passes }
    }
}

/// Evaluates the single cell at `(r, c)` in place. The cell stays in the
/// sheet for the duration of the call, so a formula that references its own
/// slot sees the value left by the previous pass rather than a missing
/// reference. Returns 1 if the value or error state changed, 0 otherwise.
fn eval_one_cell(sheet: &mut Sheet, ctx: &mut EvalContext, r: i32, c: i32) -> u32 {
    let (old_v, old_label, old_error, string_expr) = match sheet.get(r, c) {
        Some(cell) if cell.expr.is_some() => (
            cell.v,
            cell.label.clone(),
            cell.error,
            cell.flags.contains(crate::cell::CellFlags::STRING_EXPR),
        ),
        _ => return 0,
    };

    ctx.current_cell = (r, c);
    ctx.row_offset = 0;
    ctx.col_offset = 0;
    ctx.cell_error = CellErrorKind::Ok;

    // The cell is left in place in the sheet while its own formula runs, so
    // a self-referential formula (an iterative `A1+1`) reads the previous
    // pass's value instead of a missing reference (§4.5, §8 scenario S6).
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let expr = sheet.get(r, c).unwrap().expr.as_ref().unwrap();
        if string_expr {
            let s = seval(sheet, ctx, expr);
            (0.0, Some(s))
        } else {
            let v = eval(sheet, ctx, expr);
            (v, None)
        }
    }));

    let cell = match sheet.get_mut(r, c) {
        Some(cell) => cell,
        None => return 0,
    };

    match result {
        Ok((v, s)) => {
            cell.error = ctx.cell_error.to_error_code();
            if string_expr {
                cell.label = s;
            } else {
                cell.v = v;
            }
        }
        Err(_) => {
            log::warn!("panic while evaluating cell ({r}, {c}); treating as error");
            cell.error = ErrorCode::Error;
            cell.v = 0.0;
        }
    }

    let changed = if string_expr {
        cell.label.as_ref().map(|s| s.as_str()) != old_label.as_ref().map(|s| s.as_str())
            || cell.error != old_error
    } else {
        cell.v != old_v || cell.error != old_error
    };
    cell.set_changed(changed);
    changed as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::expr::{BinOp, CellRef, ExprNode, NodePool};

    #[test]
    fn converges_in_one_pass_for_acyclic_formulas() {
        let mut pool = NodePool::new();
        let mut sheet = Sheet::new();
        sheet.set(0, 0, Cell::number(2.0), &mut pool).unwrap();
        let mut c = Cell::number(0.0);
        c.expr = Some(Box::new(ExprNode::Binary(
            BinOp::Add,
            Box::new(ExprNode::Var(CellRef::new(0, 0, false, false))),
            Box::new(ExprNode::Const(3.0)),
        )));
        sheet.set(1, 0, c, &mut pool).unwrap();

        let driver = RecalcDriver::new(&Config::default());
        let report = driver.eval_all(&mut sheet);
        assert!(report.converged);
        assert_eq!(sheet.get(1, 0).unwrap().v, 5.0);
    }

    #[test]
    fn iteration_cap_stops_a_self_incrementing_cell() {
        let mut pool = NodePool::new();
        let mut sheet = Sheet::new();
        let mut c = Cell::number(0.0);
        c.expr = Some(Box::new(ExprNode::Binary(
            BinOp::Add,
            Box::new(ExprNode::Var(CellRef::new(0, 0, false, false))),
            Box::new(ExprNode::Const(1.0)),
        )));
        sheet.set(0, 0, c, &mut pool).unwrap();

        let mut cfg = Config::default();
        cfg.iterations = 10;
        let driver = RecalcDriver::new(&cfg);
        let report = driver.eval_all(&mut sheet);
        assert!(!report.converged);
        assert_eq!(report.passes, 10);
        assert_eq!(sheet.get(0, 0).unwrap().v, 10.0);
    }
}
