//! Numeric and string evaluation of an `ExprNode` tree (§4.5).
//!
//! The reference implementation's process-wide `row_offset`/`col_offset`/
//! `cell_error`/current-cell globals are bundled here into `EvalContext`,
//! threaded through every `eval`/`seval` call by `&mut` reference instead of
//! living in a `thread_local!` (§5, §9's design notes). "FPE trapping" is a
//! value-level check at every arithmetic node, not a signal handler: a
//! division/modulo by zero or a non-finite result sets `ctx.cell_error` and
//! returns 0.0 rather than panicking or trapping SIGFPE.

use crate::cell::{Cell, CellTag, ErrorCode};
use crate::expr::{BinOp, CellRef, ExprNode, Func, RangeRef, UnOp};
use crate::sheet::{col_name, Sheet};
use crate::string_pool::{self, PoolString};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::process::Command;

/// The specific trigger behind a cell-level error, kept for diagnostics
/// alongside the coarse `ErrorCode` stored on `Cell` (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellErrorKind {
    Ok,
    DivZero,
    NonFinite,
    Domain,
    Ref,
    Propagated,
    External,
    Iteration,
}

impl CellErrorKind {
    /// Ok(0) < an ordinary error(1) < propagated/invalid(2). Used to fold
    /// the worst error seen across a range scan without aborting it.
    fn rank(self) -> u8 {
        match self {
            CellErrorKind::Ok => 0,
            CellErrorKind::Propagated => 2,
            _ => 1,
        }
    }

    pub fn to_error_code(self) -> ErrorCode {
        match self {
            CellErrorKind::Ok => ErrorCode::Ok,
            CellErrorKind::Propagated => ErrorCode::Invalid,
            _ => ErrorCode::Error,
        }
    }
}

/// Replaces the reference implementation's process-wide evaluator globals
/// (§5, §9): row/col relative-reference bias, the worst error seen in the
/// current expression, the current cell (for `@myrow`/`@mycol`), an
/// iteration cap carried through for diagnostics, and whether external
/// commands may actually spawn.
pub struct EvalContext {
    pub row_offset: i32,
    pub col_offset: i32,
    pub cell_error: CellErrorKind,
    pub current_cell: (i32, i32),
    pub iteration_cap: u32,
    pub external_enabled: bool,
    rng: SmallRng,
}

impl EvalContext {
    pub fn new(current_cell: (i32, i32)) -> Self {
        EvalContext {
            row_offset: 0,
            col_offset: 0,
            cell_error: CellErrorKind::Ok,
            current_cell,
            iteration_cap: 10,
            external_enabled: false,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(current_cell: (i32, i32), seed: u64) -> Self {
        let mut ctx = Self::new(current_cell);
        ctx.rng = SmallRng::seed_from_u64(seed);
        ctx
    }

    fn raise(&mut self, kind: CellErrorKind) {
        if kind.rank() > self.cell_error.rank() {
            self.cell_error = kind;
        }
    }

    fn resolve(&self, r: CellRef) -> (i32, i32) {
        let row = if r.fix_row { r.row } else { r.row + self.row_offset };
        let col = if r.fix_col { r.col } else { r.col + self.col_offset };
        (row, col)
    }
}

fn normalized_rect(rr: RangeRef, ctx: &EvalContext) -> (i32, i32, i32, i32) {
    let (r0, c0) = ctx.resolve(rr.start);
    let (r1, c1) = ctx.resolve(rr.end);
    (r0.min(r1), c0.min(c1), r0.max(r1), c0.max(c1))
}

/// Extracts a rectangle from a `Range` or single-cell `Var` node.
fn rect_of(node: &ExprNode, ctx: &EvalContext) -> Option<(i32, i32, i32, i32)> {
    match node {
        ExprNode::Range(rr) => Some(normalized_rect(*rr, ctx)),
        ExprNode::Var(r) => {
            let (row, col) = ctx.resolve(*r);
            Some((row, col, row, col))
        }
        _ => None,
    }
}

fn cell_numeric(cell: &Cell) -> f64 {
    match cell.tag {
        CellTag::Number | CellTag::Boolean => cell.v,
        _ => 0.0,
    }
}

/// Looks up `(row, col)`; a missing/deleted cell raises `Ref`, a cell
/// already in error raises `Propagated` (downgrading the caller's result to
/// `invalid` without aborting evaluation, per the contract in §4.5).
fn lookup_numeric(sheet: &Sheet, ctx: &mut EvalContext, row: i32, col: i32) -> f64 {
    if row < 0 || col < 0 {
        ctx.raise(CellErrorKind::Ref);
        return 0.0;
    }
    match sheet.get(row, col) {
        None => {
            ctx.raise(CellErrorKind::Ref);
            0.0
        }
        Some(cell) => {
            if cell.error != ErrorCode::Ok {
                ctx.raise(CellErrorKind::Propagated);
            }
            cell_numeric(cell)
        }
    }
}

fn lookup_string(sheet: &Sheet, ctx: &mut EvalContext, row: i32, col: i32) -> PoolString {
    if row < 0 || col < 0 {
        ctx.raise(CellErrorKind::Ref);
        return PoolString::new("");
    }
    match sheet.get(row, col) {
        None => {
            ctx.raise(CellErrorKind::Ref);
            PoolString::new("")
        }
        Some(cell) => {
            if cell.error != ErrorCode::Ok {
                ctx.raise(CellErrorKind::Propagated);
            }
            match cell.tag {
                CellTag::String => cell.label.clone().unwrap_or_else(|| PoolString::new("")),
                CellTag::Number => PoolString::from(format_number(cell.v)),
                CellTag::Boolean => PoolString::new(if cell.v != 0.0 { "1" } else { "0" }),
                _ => PoolString::new(""),
            }
        }
    }
}

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

/// Scans `rect` collecting the numeric value of every cell for which
/// `predicate` evaluates non-zero (or every cell, when there is none). The
/// predicate is evaluated with `row_offset`/`col_offset` rebiased to the
/// scanned cell's position within the rect, so a relative reference inside
/// it (`@sum(A1:A9, B1>0)`, checking the same row's column B) resolves
/// against that cell rather than the formula's own. A cell already in
/// error still downgrades the scan to `Propagated` without aborting it.
fn scan_numeric(
    sheet: &Sheet,
    ctx: &mut EvalContext,
    rect: (i32, i32, i32, i32),
    predicate: Option<&ExprNode>,
) -> Vec<f64> {
    let (r0, c0, r1, c1) = rect;
    let (saved_r, saved_c) = (ctx.row_offset, ctx.col_offset);
    let mut out = Vec::new();
    for r in r0..=r1 {
        for c in c0..=c1 {
            if let Some(cell) = sheet.get(r, c) {
                if cell.error != ErrorCode::Ok {
                    ctx.raise(CellErrorKind::Propagated);
                }
                let included = match predicate {
                    Some(pred) => {
                        ctx.row_offset = r - r0;
                        ctx.col_offset = c - c0;
                        let v = eval(sheet, ctx, pred) != 0.0;
                        ctx.row_offset = saved_r;
                        ctx.col_offset = saved_c;
                        v
                    }
                    None => true,
                };
                if included && (cell.tag == CellTag::Number || cell.tag == CellTag::Boolean) {
                    out.push(cell.v);
                }
            }
        }
    }
    out
}

/// Numeric evaluation (§4.5's `eval(e)`).
pub fn eval(sheet: &Sheet, ctx: &mut EvalContext, node: &ExprNode) -> f64 {
    match node {
        ExprNode::Const(x) => *x,
        ExprNode::SConst(_) => 0.0,
        ExprNode::Var(r) => {
            let (row, col) = ctx.resolve(*r);
            lookup_numeric(sheet, ctx, row, col)
        }
        ExprNode::Range(rr) => {
            // A bare range in numeric context evaluates to its top-left cell.
            let (r0, c0, _, _) = normalized_rect(*rr, ctx);
            lookup_numeric(sheet, ctx, r0, c0)
        }
        ExprNode::Unary(op, child) => eval_unary(sheet, ctx, *op, child),
        ExprNode::Binary(op, l, r) => eval_binary(sheet, ctx, *op, l, r),
        ExprNode::Cond(c, t, f) => {
            if eval(sheet, ctx, c) != 0.0 {
                eval(sheet, ctx, t)
            } else {
                eval(sheet, ctx, f)
            }
        }
        ExprNode::Call(func, args) => eval_call(sheet, ctx, *func, args),
        ExprNode::ArgsNil | ExprNode::ArgsCons(_, _) => 0.0,
        ExprNode::External(cmd, arg, cached) => eval_external(sheet, ctx, cmd, arg, cached),
    }
}

fn eval_unary(sheet: &Sheet, ctx: &mut EvalContext, op: UnOp, child: &ExprNode) -> f64 {
    match op {
        UnOp::Neg => -eval(sheet, ctx, child),
        UnOp::Not => {
            if eval(sheet, ctx, child) == 0.0 {
                1.0
            } else {
                0.0
            }
        }
        UnOp::Fixed => {
            let (saved_r, saved_c) = (ctx.row_offset, ctx.col_offset);
            ctx.row_offset = 0;
            ctx.col_offset = 0;
            let v = eval(sheet, ctx, child);
            ctx.row_offset = saved_r;
            ctx.col_offset = saved_c;
            v
        }
    }
}

fn eval_binary(sheet: &Sheet, ctx: &mut EvalContext, op: BinOp, l: &ExprNode, r: &ExprNode) -> f64 {
    match op {
        BinOp::Seq => {
            eval(sheet, ctx, l);
            eval(sheet, ctx, r)
        }
        BinOp::Add => eval(sheet, ctx, l) + eval(sheet, ctx, r),
        BinOp::Sub => eval(sheet, ctx, l) - eval(sheet, ctx, r),
        BinOp::Mul => eval(sheet, ctx, l) * eval(sheet, ctx, r),
        BinOp::Div => {
            let a = eval(sheet, ctx, l);
            let b = eval(sheet, ctx, r);
            if b == 0.0 {
                ctx.raise(CellErrorKind::DivZero);
                0.0
            } else {
                checked(ctx, a / b)
            }
        }
        BinOp::Mod => {
            let a = eval(sheet, ctx, l);
            let b = eval(sheet, ctx, r);
            if b == 0.0 {
                ctx.raise(CellErrorKind::DivZero);
                0.0
            } else {
                checked(ctx, a % b)
            }
        }
        BinOp::Pow => checked(ctx, eval(sheet, ctx, l).powf(eval(sheet, ctx, r))),
        BinOp::Concat => 0.0, // string-only operator; numeric context yields 0
        BinOp::And => bool01(eval(sheet, ctx, l) != 0.0 && eval(sheet, ctx, r) != 0.0),
        BinOp::Or => bool01(eval(sheet, ctx, l) != 0.0 || eval(sheet, ctx, r) != 0.0),
        BinOp::Lt => bool01(eval(sheet, ctx, l) < eval(sheet, ctx, r)),
        BinOp::Le => bool01(eval(sheet, ctx, l) <= eval(sheet, ctx, r)),
        BinOp::Eq => bool01(eval(sheet, ctx, l) == eval(sheet, ctx, r)),
        BinOp::Ne => bool01(eval(sheet, ctx, l) != eval(sheet, ctx, r)),
        BinOp::Ge => bool01(eval(sheet, ctx, l) >= eval(sheet, ctx, r)),
        BinOp::Gt => bool01(eval(sheet, ctx, l) > eval(sheet, ctx, r)),
    }
}

fn bool01(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn checked(ctx: &mut EvalContext, v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        ctx.raise(CellErrorKind::NonFinite);
        0.0
    }
}

const UNIX_EPOCH_DATE: (i32, u32, u32) = (1970, 1, 1);

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(UNIX_EPOCH_DATE.0, UNIX_EPOCH_DATE.1, UNIX_EPOCH_DATE.2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn datetime_from_serial(secs: f64) -> Option<NaiveDateTime> {
    epoch().checked_add_signed(chrono::Duration::seconds(secs as i64))
}

fn eval_call(sheet: &Sheet, ctx: &mut EvalContext, func: Func, args_chain: &ExprNode) -> f64 {
    let args = ExprNode::collect_args(args_chain);
    let arg = |i: usize| args.get(i).copied();
    let num = |ctx: &mut EvalContext, n: &ExprNode| eval(sheet, ctx, n);

    match func {
        Func::Sum => arg(0)
            .and_then(|a| rect_of(a, ctx))
            .map(|rect| scan_numeric(sheet, ctx, rect, arg(1)).iter().sum())
            .unwrap_or(0.0),
        Func::Product => arg(0)
            .and_then(|a| rect_of(a, ctx))
            .map(|rect| scan_numeric(sheet, ctx, rect, arg(1)).iter().product())
            .unwrap_or(1.0),
        Func::Avg => arg(0)
            .and_then(|a| rect_of(a, ctx))
            .map(|rect| {
                let v = scan_numeric(sheet, ctx, rect, arg(1));
                if v.is_empty() {
                    0.0
                } else {
                    v.iter().sum::<f64>() / v.len() as f64
                }
            })
            .unwrap_or(0.0),
        Func::Count => arg(0)
            .and_then(|a| rect_of(a, ctx))
            .map(|rect| scan_numeric(sheet, ctx, rect, arg(1)).len() as f64)
            .unwrap_or(0.0),
        Func::Stddev => arg(0)
            .and_then(|a| rect_of(a, ctx))
            .map(|rect| {
                let v = scan_numeric(sheet, ctx, rect, arg(1));
                if v.len() < 2 {
                    return 0.0;
                }
                let mean = v.iter().sum::<f64>() / v.len() as f64;
                let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (v.len() - 1) as f64;
                var.sqrt()
            })
            .unwrap_or(0.0),
        Func::Min => arg(0)
            .and_then(|a| rect_of(a, ctx))
            .map(|rect| scan_numeric(sheet, ctx, rect, arg(1)).into_iter().fold(f64::INFINITY, f64::min))
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .unwrap_or(0.0),
        Func::Max => arg(0)
            .and_then(|a| rect_of(a, ctx))
            .map(|rect| scan_numeric(sheet, ctx, rect, arg(1)).into_iter().fold(f64::NEG_INFINITY, f64::max))
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .unwrap_or(0.0),
        Func::Lookup => eval_lookup(sheet, ctx, &args, false, false),
        Func::Hlookup => eval_lookup(sheet, ctx, &args, true, false),
        Func::Vlookup => eval_lookup(sheet, ctx, &args, false, true),
        Func::Index | Func::Stindex => {
            let rect = arg(0).and_then(|a| rect_of(a, ctx));
            match rect {
                Some((r0, c0, _r1, _c1)) => {
                    let dr = arg(1).map(|n| num(ctx, n) as i32).unwrap_or(0);
                    let dc = arg(2).map(|n| num(ctx, n) as i32).unwrap_or(0);
                    lookup_numeric(sheet, ctx, r0 + dr, c0 + dc)
                }
                None => 0.0,
            }
        }
        Func::Pv => {
            let rate = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            let n = arg(1).map(|n| num(ctx, n)).unwrap_or(0.0);
            let pmt = arg(2).map(|n| num(ctx, n)).unwrap_or(0.0);
            if rate == 0.0 {
                -pmt * n
            } else {
                -pmt * (1.0 - (1.0 + rate).powf(-n)) / rate
            }
        }
        Func::Fv => {
            let rate = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            let n = arg(1).map(|n| num(ctx, n)).unwrap_or(0.0);
            let pmt = arg(2).map(|n| num(ctx, n)).unwrap_or(0.0);
            if rate == 0.0 {
                -pmt * n
            } else {
                -pmt * ((1.0 + rate).powf(n) - 1.0) / rate
            }
        }
        Func::Pmt => {
            let rate = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            let n = arg(1).map(|n| num(ctx, n)).unwrap_or(0.0);
            let pv = arg(2).map(|n| num(ctx, n)).unwrap_or(0.0);
            if rate == 0.0 {
                if n == 0.0 {
                    ctx.raise(CellErrorKind::DivZero);
                    0.0
                } else {
                    -pv / n
                }
            } else {
                -pv * rate / (1.0 - (1.0 + rate).powf(-n))
            }
        }
        Func::Sin => arg(0).map(|n| num(ctx, n).sin()).unwrap_or(0.0),
        Func::Cos => arg(0).map(|n| num(ctx, n).cos()).unwrap_or(0.0),
        Func::Tan => arg(0).map(|n| num(ctx, n).tan()).unwrap_or(0.0),
        Func::Asin => arg(0).map(|n| num(ctx, n).asin()).unwrap_or(0.0),
        Func::Acos => arg(0).map(|n| num(ctx, n).acos()).unwrap_or(0.0),
        Func::Atan => arg(0).map(|n| num(ctx, n).atan()).unwrap_or(0.0),
        Func::Atan2 => {
            let y = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            let x = arg(1).map(|n| num(ctx, n)).unwrap_or(0.0);
            y.atan2(x)
        }
        Func::Exp => arg(0).map(|n| num(ctx, n).exp()).unwrap_or(0.0),
        Func::Ln => {
            let x = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            if x <= 0.0 {
                ctx.raise(CellErrorKind::Domain);
                0.0
            } else {
                x.ln()
            }
        }
        Func::Log10 => {
            let x = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            if x <= 0.0 {
                ctx.raise(CellErrorKind::Domain);
                0.0
            } else {
                x.log10()
            }
        }
        Func::Sqrt => {
            let x = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            if x < 0.0 {
                ctx.raise(CellErrorKind::Domain);
                0.0
            } else {
                x.sqrt()
            }
        }
        Func::Abs => arg(0).map(|n| num(ctx, n).abs()).unwrap_or(0.0),
        Func::Rnd => arg(0).map(|n| num(ctx, n).round()).unwrap_or(0.0),
        Func::Round => {
            let x = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0);
            let d = arg(1).map(|n| num(ctx, n) as i32).unwrap_or(0);
            let f = 10f64.powi(d);
            (x * f).round() / f
        }
        Func::Rand => ctx.rng.gen::<f64>(),
        Func::Randbetween => {
            let lo = arg(0).map(|n| num(ctx, n)).unwrap_or(0.0) as i64;
            let hi = arg(1).map(|n| num(ctx, n)).unwrap_or(0.0) as i64;
            if lo > hi {
                ctx.raise(CellErrorKind::Domain);
                0.0
            } else {
                ctx.rng.gen_range(lo..=hi) as f64
            }
        }
        Func::Date => {
            let y = arg(0).map(|n| num(ctx, n) as i32).unwrap_or(1970);
            let m = arg(1).map(|n| num(ctx, n) as u32).unwrap_or(1);
            let d = arg(2).map(|n| num(ctx, n) as u32).unwrap_or(1);
            match NaiveDate::from_ymd_opt(y, m, d) {
                Some(date) => (date.and_hms_opt(0, 0, 0).unwrap() - epoch()).num_seconds() as f64,
                None => {
                    ctx.raise(CellErrorKind::Domain);
                    0.0
                }
            }
        }
        Func::Now => (chrono::Local::now().naive_utc() - epoch()).num_seconds() as f64,
        Func::Hour => datetime_part(ctx, arg(0).map(|n| num(ctx, n))).map(|d| d.hour() as f64).unwrap_or(0.0),
        Func::Minute => datetime_part(ctx, arg(0).map(|n| num(ctx, n))).map(|d| d.minute() as f64).unwrap_or(0.0),
        Func::Second => datetime_part(ctx, arg(0).map(|n| num(ctx, n))).map(|d| d.second() as f64).unwrap_or(0.0),
        Func::Day => datetime_part(ctx, arg(0).map(|n| num(ctx, n))).map(|d| d.day() as f64).unwrap_or(0.0),
        Func::Month => datetime_part(ctx, arg(0).map(|n| num(ctx, n))).map(|d| d.month() as f64).unwrap_or(0.0),
        Func::Year => datetime_part(ctx, arg(0).map(|n| num(ctx, n))).map(|d| d.year() as f64).unwrap_or(0.0),
        Func::Myrow => ctx.current_cell.0 as f64,
        Func::Mycol => ctx.current_cell.1 as f64,
        // String-valued functions evaluated in numeric context yield 0.
        Func::Upper | Func::Lower | Func::Proper | Func::Substr | Func::Dateformat | Func::Coltoa
        | Func::Filename => 0.0,
    }
}

fn datetime_part(ctx: &mut EvalContext, secs: Option<f64>) -> Option<NaiveDateTime> {
    match secs.and_then(datetime_from_serial) {
        Some(dt) => Some(dt),
        None => {
            ctx.raise(CellErrorKind::Domain);
            None
        }
    }
}

/// `lookup`/`hlookup`/`vlookup` (§4.5): numeric key takes "last value ≤ key"
/// assuming a monotonic key column/row (scan stops once a larger value is
/// seen); string key requires an exact match.
fn eval_lookup(sheet: &Sheet, ctx: &mut EvalContext, args: &[&ExprNode], horizontal: bool, vertical: bool) -> f64 {
    let key = match args.first() {
        Some(k) => eval(sheet, ctx, k),
        None => return 0.0,
    };
    let rect = match args.get(1).and_then(|a| rect_of(a, ctx)) {
        Some(r) => r,
        None => return 0.0,
    };
    let (r0, c0, r1, c1) = rect;
    let offset = args.get(2).map(|n| eval(sheet, ctx, n) as i32).unwrap_or(0);

    if vertical {
        let mut best: Option<(i32, f64)> = None;
        for r in r0..=r1 {
            let k = lookup_numeric(sheet, ctx, r, c0);
            if k > key {
                break;
            }
            best = Some((r, k));
        }
        return match best {
            Some((r, _)) => lookup_numeric(sheet, ctx, r, c0 + offset.max(1)),
            None => {
                ctx.raise(CellErrorKind::Ref);
                0.0
            }
        };
    }
    if horizontal {
        let mut best: Option<(i32, f64)> = None;
        for c in c0..=c1 {
            let k = lookup_numeric(sheet, ctx, r0, c);
            if k > key {
                break;
            }
            best = Some((c, k));
        }
        return match best {
            Some((c, _)) => lookup_numeric(sheet, ctx, r0 + offset.max(1), c),
            None => {
                ctx.raise(CellErrorKind::Ref);
                0.0
            }
        };
    }
    // Plain `lookup`: scan the first column of the rect for the key, then
    // return the value one column to the right.
    let mut best: Option<i32> = None;
    for r in r0..=r1 {
        let k = lookup_numeric(sheet, ctx, r, c0);
        if k > key {
            break;
        }
        best = Some(r);
    }
    match best {
        Some(r) => lookup_numeric(sheet, ctx, r, c0 + 1),
        None => {
            ctx.raise(CellErrorKind::Ref);
            0.0
        }
    }
}

fn eval_external(
    sheet: &Sheet,
    ctx: &mut EvalContext,
    cmd: &ExprNode,
    arg: &ExprNode,
    cached: &std::cell::RefCell<Option<PoolString>>,
) -> f64 {
    eval(sheet, ctx, arg); // evaluated for side effects / error propagation only
    let cmd_str = seval(sheet, ctx, cmd);
    if !ctx.external_enabled {
        return cached.borrow().as_ref().and_then(|s| s.as_str().parse().ok()).unwrap_or(0.0);
    }
    match run_external(cmd_str.as_str()) {
        Some(line) => {
            let parsed = line.parse().unwrap_or(0.0);
            *cached.borrow_mut() = Some(PoolString::from(line));
            parsed
        }
        None => {
            ctx.raise(CellErrorKind::External);
            cached.borrow().as_ref().and_then(|s| s.as_str().parse().ok()).unwrap_or(0.0)
        }
    }
}

fn run_external(cmd: &str) -> Option<String> {
    let output = Command::new("sh").arg("-c").arg(cmd).output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().next().map(|l| l.to_string())
}

/// String evaluation (§4.5's `seval(e)`).
pub fn seval(sheet: &Sheet, ctx: &mut EvalContext, node: &ExprNode) -> PoolString {
    match node {
        ExprNode::SConst(s) => s.dup(),
        ExprNode::Const(x) => PoolString::from(format_number(*x)),
        ExprNode::Var(r) => {
            let (row, col) = ctx.resolve(*r);
            lookup_string(sheet, ctx, row, col)
        }
        ExprNode::Range(rr) => {
            let (r0, c0, _, _) = normalized_rect(*rr, ctx);
            lookup_string(sheet, ctx, r0, c0)
        }
        ExprNode::Binary(BinOp::Concat, l, r) => {
            string_pool::concat(&seval(sheet, ctx, l), &seval(sheet, ctx, r))
        }
        ExprNode::Cond(c, t, f) => {
            if eval(sheet, ctx, c) != 0.0 {
                seval(sheet, ctx, t)
            } else {
                seval(sheet, ctx, f)
            }
        }
        ExprNode::Call(func, args) => seval_call(sheet, ctx, *func, args),
        ExprNode::External(cmd, arg, cached) => {
            eval(sheet, ctx, arg);
            let cmd_str = seval(sheet, ctx, cmd);
            if !ctx.external_enabled {
                return cached.borrow().clone().unwrap_or_else(|| PoolString::new(""));
            }
            match run_external(cmd_str.as_str()) {
                Some(line) => {
                    let s = PoolString::from(line);
                    *cached.borrow_mut() = Some(s.dup());
                    s
                }
                None => {
                    ctx.raise(CellErrorKind::External);
                    cached.borrow().clone().unwrap_or_else(|| PoolString::new(""))
                }
            }
        }
        _ => PoolString::from(format_number(eval(sheet, ctx, node))),
    }
}

fn seval_call(sheet: &Sheet, ctx: &mut EvalContext, func: Func, args_chain: &ExprNode) -> PoolString {
    let args = ExprNode::collect_args(args_chain);
    let arg = |i: usize| args.get(i).copied();

    match func {
        Func::Upper => arg(0).map(|n| PoolString::new(&seval(sheet, ctx, n).as_str().to_uppercase())).unwrap_or_else(|| PoolString::new("")),
        Func::Lower => arg(0).map(|n| PoolString::new(&seval(sheet, ctx, n).as_str().to_lowercase())).unwrap_or_else(|| PoolString::new("")),
        Func::Proper => arg(0).map(|n| PoolString::new(&proper_case(seval(sheet, ctx, n).as_str()))).unwrap_or_else(|| PoolString::new("")),
        Func::Substr => {
            let s = arg(0).map(|n| seval(sheet, ctx, n)).unwrap_or_else(|| PoolString::new(""));
            let pos = arg(1).map(|n| eval(sheet, ctx, n) as i64).unwrap_or(0);
            let len = arg(2).map(|n| eval(sheet, ctx, n) as i64).unwrap_or(0);
            string_pool::mid(&s, pos, len)
        }
        Func::Dateformat => {
            let secs = arg(0).map(|n| eval(sheet, ctx, n)).unwrap_or(0.0);
            let fmt = arg(1).map(|n| seval(sheet, ctx, n)).unwrap_or_else(|| PoolString::new("%Y-%m-%d"));
            match datetime_from_serial(secs) {
                Some(dt) => PoolString::from(dt.format(fmt.as_str()).to_string()),
                None => {
                    ctx.raise(CellErrorKind::Domain);
                    PoolString::new("")
                }
            }
        }
        Func::Coltoa => {
            let c = arg(0).map(|n| eval(sheet, ctx, n) as i32).unwrap_or(0);
            PoolString::from(col_name(c))
        }
        Func::Filename => PoolString::new(""),
        Func::Stindex => {
            let rect = arg(0).and_then(|a| rect_of(a, ctx));
            match rect {
                Some((r0, c0, _r1, _c1)) => {
                    let dr = arg(1).map(|n| eval(sheet, ctx, n) as i32).unwrap_or(0);
                    let dc = arg(2).map(|n| eval(sheet, ctx, n) as i32).unwrap_or(0);
                    lookup_string(sheet, ctx, r0 + dr, c0 + dc)
                }
                None => PoolString::new(""),
            }
        }
        _ => PoolString::from(format_number(eval_call(sheet, ctx, func, args_chain))),
    }
}

fn proper_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start_of_word = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if start_of_word {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start_of_word = false;
        } else {
            out.push(c);
            start_of_word = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NodePool;

    fn set(sheet: &mut Sheet, pool: &mut NodePool, r: i32, c: i32, x: f64) {
        sheet.set(r, c, Cell::number(x), pool).unwrap();
    }

    #[test]
    fn division_by_zero_raises_divzero_and_yields_zero() {
        let sheet = Sheet::new();
        let mut ctx = EvalContext::new((0, 0));
        let one = ExprNode::Const(1.0);
        let zero = ExprNode::Const(0.0);
        let node = ExprNode::Binary(BinOp::Div, Box::new(one), Box::new(zero));
        let v = eval(&sheet, &mut ctx, &node);
        assert_eq!(v, 0.0);
        assert_eq!(ctx.cell_error, CellErrorKind::DivZero);
    }

    #[test]
    fn reference_to_missing_cell_is_a_ref_error() {
        let sheet = Sheet::new();
        let mut ctx = EvalContext::new((0, 0));
        let node = ExprNode::Var(CellRef::new(5, 5, false, false));
        let v = eval(&sheet, &mut ctx, &node);
        assert_eq!(v, 0.0);
        assert_eq!(ctx.cell_error, CellErrorKind::Ref);
    }

    #[test]
    fn sum_over_range_adds_live_numeric_cells() {
        let mut pool = NodePool::new();
        let mut sheet = Sheet::new();
        set(&mut sheet, &mut pool, 0, 0, 1.0);
        set(&mut sheet, &mut pool, 1, 0, 2.0);
        set(&mut sheet, &mut pool, 2, 0, 3.0);
        let mut ctx = EvalContext::new((0, 0));
        let range = ExprNode::Range(RangeRef::new(
            CellRef::new(0, 0, false, false),
            CellRef::new(2, 0, false, false),
        ));
        let nil = ExprNode::ArgsNil;
        let args = ExprNode::ArgsCons(Box::new(nil), Box::new(range));
        let call = ExprNode::Call(Func::Sum, Box::new(args));
        let v = eval(&sheet, &mut ctx, &call);
        assert_eq!(v, 6.0);
    }

    #[test]
    fn sum_with_predicate_skips_rows_where_it_is_falsy() {
        let mut pool = NodePool::new();
        let mut sheet = Sheet::new();
        set(&mut sheet, &mut pool, 0, 0, 10.0); // A1
        set(&mut sheet, &mut pool, 1, 0, 20.0); // A2
        set(&mut sheet, &mut pool, 2, 0, 30.0); // A3
        set(&mut sheet, &mut pool, 0, 1, 1.0); // B1
        set(&mut sheet, &mut pool, 1, 1, 0.0); // B2
        set(&mut sheet, &mut pool, 2, 1, 1.0); // B3
        let mut ctx = EvalContext::new((0, 0));

        let range = ExprNode::Range(RangeRef::new(
            CellRef::new(0, 0, false, false),
            CellRef::new(2, 0, false, false),
        ));
        // "B1", rebiased per scanned row (row_offset = r - r0) so row 1
        // checks B2 and row 2 checks B3.
        let predicate = ExprNode::Var(CellRef::new(0, 1, false, false));
        let args = ExprNode::ArgsCons(
            Box::new(ExprNode::ArgsCons(Box::new(ExprNode::ArgsNil), Box::new(range))),
            Box::new(predicate),
        );
        let call = ExprNode::Call(Func::Sum, Box::new(args));
        let v = eval(&sheet, &mut ctx, &call);
        assert_eq!(v, 40.0); // A1 + A3, A2 skipped because B2 is 0

        // The predicate's offset bias is scoped to the scan; the caller's
        // own offsets are untouched once @sum returns.
        assert_eq!(ctx.row_offset, 0);
        assert_eq!(ctx.col_offset, 0);
    }

    #[test]
    fn fixed_operator_zeroes_offsets_for_its_child_only() {
        let sheet = Sheet::new();
        let mut ctx = EvalContext::new((0, 0));
        ctx.row_offset = 3;
        ctx.col_offset = 4;
        let inner = ExprNode::Var(CellRef::new(0, 0, false, false));
        let fixed = ExprNode::Unary(UnOp::Fixed, Box::new(inner));
        eval(&sheet, &mut ctx, &fixed);
        assert_eq!(ctx.row_offset, 3);
        assert_eq!(ctx.col_offset, 4);
    }

    #[test]
    fn propagated_error_on_referenced_cell_is_invalid_not_error() {
        let mut pool = NodePool::new();
        let mut sheet = Sheet::new();
        let mut errored = Cell::number(0.0);
        errored.error = ErrorCode::Error;
        sheet.set(0, 0, errored, &mut pool).unwrap();
        let mut ctx = EvalContext::new((0, 0));
        let node = ExprNode::Var(CellRef::new(0, 0, false, false));
        eval(&sheet, &mut ctx, &node);
        assert_eq!(ctx.cell_error, CellErrorKind::Propagated);
    }

    #[test]
    fn seval_concat_joins_strings() {
        let sheet = Sheet::new();
        let mut ctx = EvalContext::new((0, 0));
        let a = ExprNode::SConst(PoolString::new("foo"));
        let b = ExprNode::SConst(PoolString::new("bar"));
        let node = ExprNode::Binary(BinOp::Concat, Box::new(a), Box::new(b));
        let s = seval(&sheet, &mut ctx, &node);
        assert_eq!(s.as_str(), "foobar");
    }

    #[test]
    fn proper_case_title_cases_words() {
        assert_eq!(proper_case("hello world"), "Hello World");
    }
}
