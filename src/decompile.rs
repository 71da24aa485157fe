//! Expression tree to canonical formula text (§4.11's inverse): the
//! companion to `parser.rs`, reconstructing a string a user could retype to
//! get back the same tree (modulo whitespace and which of several
//! equal-precedence parenthesizations was chosen).
//!
//! Parenthesization is driven by the same precedence ladder the parser
//! uses; a child is wrapped only when its own precedence would otherwise
//! bind looser than the position it sits in (§4.9).

use crate::expr::{BinOp, CellRef, ExprNode, Func, RangeRef, UnOp};
use crate::geom::Rect;
use crate::refmaps::RefMaps;
use crate::sheet::col_name;

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn render_cell_ref(r: CellRef) -> String {
    format!(
        "{}{}{}{}",
        if r.fix_col { "$" } else { "" },
        col_name(r.col),
        if r.fix_row { "$" } else { "" },
        r.row + 1,
    )
}

fn render_range_ref(rr: RangeRef) -> String {
    format!("{}:{}", render_cell_ref(rr.start), render_cell_ref(rr.end))
}

fn bin_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "^",
        BinOp::Concat => "#",
        BinOp::And => "&",
        BinOp::Or => "|",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Eq => "=",
        BinOp::Ne => "<>",
        BinOp::Ge => ">=",
        BinOp::Gt => ">",
        BinOp::Seq => ";",
    }
}

/// Precedence matching the parser's ladder (§4.9), lowest to highest.
fn bin_prec(op: BinOp) -> u8 {
    match op {
        BinOp::Seq => 1,
        BinOp::Or => 3,
        BinOp::And => 4,
        BinOp::Lt | BinOp::Le | BinOp::Eq | BinOp::Ne | BinOp::Ge | BinOp::Gt => 5,
        BinOp::Add | BinOp::Sub => 6,
        BinOp::Concat => 7,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 8,
        BinOp::Pow => 9,
    }
}

const COND_PREC: u8 = 2;
const UNARY_PREC: u8 = 10;

pub fn func_name(f: Func) -> &'static str {
    match f {
        Func::Sum => "sum",
        Func::Product => "product",
        Func::Avg => "avg",
        Func::Count => "count",
        Func::Stddev => "stddev",
        Func::Min => "min",
        Func::Max => "max",
        Func::Lookup => "lookup",
        Func::Hlookup => "hlookup",
        Func::Vlookup => "vlookup",
        Func::Index => "index",
        Func::Stindex => "stindex",
        Func::Pv => "pv",
        Func::Fv => "fv",
        Func::Pmt => "pmt",
        Func::Sin => "sin",
        Func::Cos => "cos",
        Func::Tan => "tan",
        Func::Asin => "asin",
        Func::Acos => "acos",
        Func::Atan => "atan",
        Func::Atan2 => "atan2",
        Func::Exp => "exp",
        Func::Ln => "ln",
        Func::Log10 => "log10",
        Func::Sqrt => "sqrt",
        Func::Abs => "abs",
        Func::Rnd => "rnd",
        Func::Round => "round",
        Func::Rand => "rand",
        Func::Randbetween => "randbetween",
        Func::Date => "date",
        Func::Now => "now",
        Func::Hour => "hour",
        Func::Minute => "minute",
        Func::Second => "second",
        Func::Day => "day",
        Func::Month => "month",
        Func::Year => "year",
        Func::Upper => "upper",
        Func::Lower => "lower",
        Func::Proper => "proper",
        Func::Substr => "substr",
        Func::Dateformat => "dateformat",
        Func::Coltoa => "coltoa",
        Func::Filename => "filename",
        Func::Myrow => "myrow",
        Func::Mycol => "mycol",
    }
}

/// Decompiles `node` to text, preferring a name from `refmaps` over raw
/// `A1:B2` syntax whenever a named range covers exactly the same rectangle.
pub fn decompile(node: &ExprNode, refmaps: &RefMaps) -> String {
    render(node, refmaps, 0)
}

fn wrap_if(s: String, needed: bool) -> String {
    if needed {
        format!("({s})")
    } else {
        s
    }
}

fn render(node: &ExprNode, refmaps: &RefMaps, min_prec: u8) -> String {
    match node {
        ExprNode::Const(x) => format_number(*x),
        ExprNode::SConst(s) => quote_string(s.as_str()),
        ExprNode::Var(r) => named_or_ref(refmaps, Rect::single(r.row, r.col), || render_cell_ref(*r)),
        ExprNode::Range(rr) => {
            let (r0, c0, r1, c1) = rr.normalized();
            named_or_ref(refmaps, Rect::new(r0, c0, r1, c1), || render_range_ref(*rr))
        }
        ExprNode::Unary(UnOp::Fixed, c) => format!("f({})", render(c, refmaps, 1)),
        ExprNode::Unary(UnOp::Neg, c) => {
            let s = format!("-{}", render(c, refmaps, UNARY_PREC));
            wrap_if(s, UNARY_PREC < min_prec)
        }
        ExprNode::Unary(UnOp::Not, c) => {
            let s = format!("!{}", render(c, refmaps, UNARY_PREC));
            wrap_if(s, UNARY_PREC < min_prec)
        }
        ExprNode::Binary(op, l, r) => {
            let prec = bin_prec(*op);
            let (left_min, right_min) = if *op == BinOp::Pow {
                (prec + 1, prec) // right-associative
            } else {
                (prec, prec + 1) // left-associative
            };
            let s = format!(
                "{}{}{}",
                render(l, refmaps, left_min),
                bin_symbol(*op),
                render(r, refmaps, right_min)
            );
            wrap_if(s, prec < min_prec)
        }
        ExprNode::Cond(c, t, f) => {
            let s = format!(
                "{}?{}:{}",
                render(c, refmaps, COND_PREC + 1),
                render(t, refmaps, COND_PREC),
                render(f, refmaps, COND_PREC)
            );
            wrap_if(s, COND_PREC < min_prec)
        }
        ExprNode::Call(func, args) => {
            let parts: Vec<String> = ExprNode::collect_args(args)
                .into_iter()
                .map(|a| render(a, refmaps, COND_PREC))
                .collect();
            format!("{}({})", func_name(*func), parts.join(","))
        }
        ExprNode::ArgsNil | ExprNode::ArgsCons(_, _) => {
            // Only reached if a Call's args chain is rendered directly.
            let parts: Vec<String> = ExprNode::collect_args(node)
                .into_iter()
                .map(|a| render(a, refmaps, COND_PREC))
                .collect();
            parts.join(",")
        }
        ExprNode::External(cmd, arg, _) => {
            format!("@({},{})", render(cmd, refmaps, 1), render(arg, refmaps, 1))
        }
    }
}

fn named_or_ref(refmaps: &RefMaps, rect: Rect, fallback: impl FnOnce() -> String) -> String {
    refmaps.find_exact(rect).map(str::to_string).unwrap_or_else(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NodePool;
    use crate::parser::Parser;

    fn roundtrip_reparses(src: &str) {
        let mut pool = NodePool::new();
        let maps = RefMaps::new();
        let tree = Parser::parse(src, &mut pool, &maps).unwrap();
        let text = decompile(&tree, &maps);
        let mut pool2 = NodePool::new();
        let reparsed = Parser::parse(&text, &mut pool2, &maps);
        assert!(reparsed.is_ok(), "decompiled text {text:?} failed to reparse");
    }

    #[test]
    fn left_associative_chain_has_no_redundant_parens() {
        let mut pool = NodePool::new();
        let maps = RefMaps::new();
        let tree = Parser::parse("1+2+3", &mut pool, &maps).unwrap();
        assert_eq!(decompile(&tree, &maps), "1+2+3");
    }

    #[test]
    fn subtraction_on_the_right_needs_parens() {
        let mut pool = NodePool::new();
        let maps = RefMaps::new();
        // a-(b-c): without parens this would reparse as (a-b)-c.
        let tree = Parser::parse("1-(2-3)", &mut pool, &maps).unwrap();
        assert_eq!(decompile(&tree, &maps), "1-(2-3)");
    }

    #[test]
    fn power_is_rendered_right_associative_without_parens() {
        let mut pool = NodePool::new();
        let maps = RefMaps::new();
        let tree = Parser::parse("2^3^2", &mut pool, &maps).unwrap();
        assert_eq!(decompile(&tree, &maps), "2^3^2");
    }

    #[test]
    fn named_range_is_preferred_over_raw_coordinates() {
        let mut pool = NodePool::new();
        let mut maps = RefMaps::new();
        maps.define_name("rev", Rect::new(0, 0, 1, 1)).unwrap();
        let tree = Parser::parse("sum(A1:B2)", &mut pool, &maps).unwrap();
        assert_eq!(decompile(&tree, &maps), "sum(rev)");
    }

    #[test]
    fn fixed_operator_renders_with_explicit_parens() {
        roundtrip_reparses("f(A1+B1)");
    }

    #[test]
    fn ternary_round_trips() {
        roundtrip_reparses("A1>0?1:-1");
    }
}
