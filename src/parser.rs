//! Tokenizer and precedence-climbing parser from formula text to `ExprNode`
//! trees (§4.11), grounded in the teacher's split between a token scanner
//! and an expression evaluator, scaled up with a proper operator table the
//! way `formualizer-parse` separates `Tokenizer` from `Parser`.
//!
//! Operator precedence, lowest to highest (§4.9): `;` `? :` `|` `&`
//! `< <= = <> >= >` `+ -` `#` `* / %` `^`; unary `- ! f` bind tighter than
//! any binary operator.

use crate::error::{SheetError, SheetResult};
use crate::expr::{BinOp, CellRef, ExprNode, Func, NodePool, RangeRef, UnOp};
use crate::refmaps::RefMaps;
use crate::sheet::col_from_name;
use crate::string_pool::PoolString;
use once_cell::sync::Lazy;
use regex::Regex;

static CELL_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\$?)([A-Z]+)(\$?)([0-9]+)").unwrap());

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    CellRef(CellRef),
    RangeSep,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Hash,
    And,
    Or,
    Not,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    At,
    Eof,
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Tokenizer { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn tokenize(mut self) -> SheetResult<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            if self.pos >= self.src.len() {
                out.push(Token::Eof);
                break;
            }
            if let Some(m) = CELL_REF_RE.find(self.rest()) {
                let caps = CELL_REF_RE.captures(self.rest()).unwrap();
                let fix_col = !caps[1].is_empty();
                let col_name = &caps[2];
                let fix_row = !caps[3].is_empty();
                let row_str = &caps[4];
                if let Some(col) = col_from_name(col_name) {
                    let row: i32 = row_str.parse().unwrap_or(0) - 1;
                    out.push(Token::CellRef(CellRef::new(row, col, fix_row, fix_col)));
                    self.pos += m.end();
                    continue;
                }
            }
            let c = self.rest().chars().next().unwrap();
            match c {
                '0'..='9' | '.' => out.push(self.read_number()),
                '"' => out.push(self.read_string()?),
                'A'..='Z' | 'a'..='z' | '_' => out.push(self.read_ident()),
                _ => {
                    self.pos += c.len_utf8();
                    match c {
                        '(' => out.push(Token::LParen),
                        ')' => out.push(Token::RParen),
                        ',' => out.push(Token::Comma),
                        '?' => out.push(Token::Question),
                        ':' => out.push(Token::Colon),
                        ';' => out.push(Token::Semicolon),
                        '+' => out.push(Token::Plus),
                        '-' => out.push(Token::Minus),
                        '*' => out.push(Token::Star),
                        '/' => out.push(Token::Slash),
                        '%' => out.push(Token::Percent),
                        '^' => out.push(Token::Caret),
                        '#' => out.push(Token::Hash),
                        '&' => out.push(Token::And),
                        '|' => out.push(Token::Or),
                        '!' => {
                            if self.rest().starts_with('=') {
                                self.pos += 1;
                                out.push(Token::Ne);
                            } else {
                                out.push(Token::Not);
                            }
                        }
                        '<' => {
                            if self.rest().starts_with('=') {
                                self.pos += 1;
                                out.push(Token::Le);
                            } else if self.rest().starts_with('>') {
                                self.pos += 1;
                                out.push(Token::Ne);
                            } else {
                                out.push(Token::Lt);
                            }
                        }
                        '>' => {
                            if self.rest().starts_with('=') {
                                self.pos += 1;
                                out.push(Token::Ge);
                            } else {
                                out.push(Token::Gt);
                            }
                        }
                        '=' => out.push(Token::Eq),
                        '@' => out.push(Token::At),
                        other => {
                            return Err(SheetError::Parse(format!("unexpected character '{other}'")))
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.rest().chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && (bytes[self.pos].is_ascii_digit() || bytes[self.pos] == b'.') {
            self.pos += 1;
        }
        if self.pos < bytes.len() && (bytes[self.pos] == b'e' || bytes[self.pos] == b'E') {
            let mark = self.pos;
            self.pos += 1;
            if self.pos < bytes.len() && (bytes[self.pos] == b'+' || bytes[self.pos] == b'-') {
                self.pos += 1;
            }
            if self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
            } else {
                self.pos = mark;
            }
        }
        let text = &self.src[start..self.pos];
        Token::Number(text.parse().unwrap_or(0.0))
    }

    fn read_string(&mut self) -> SheetResult<Token> {
        self.pos += 1; // opening quote
        let mut s = String::new();
        loop {
            let c = self
                .rest()
                .chars()
                .next()
                .ok_or_else(|| SheetError::Parse("unterminated string".into()))?;
            self.pos += c.len_utf8();
            match c {
                '"' => break,
                '\\' => {
                    let esc = self
                        .rest()
                        .chars()
                        .next()
                        .ok_or_else(|| SheetError::Parse("unterminated escape".into()))?;
                    self.pos += esc.len_utf8();
                    match esc {
                        '"' => s.push('"'),
                        '\\' => s.push('\\'),
                        other => s.push(other),
                    }
                }
                other => s.push(other),
            }
        }
        Ok(Token::Str(s))
    }

    fn read_ident(&mut self) -> Token {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len()
            && (bytes[self.pos].is_ascii_alphanumeric() || bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        Token::Ident(self.src[start..self.pos].to_string())
    }
}

fn func_for_name(name: &str) -> Option<Func> {
    Some(match name.to_ascii_lowercase().as_str() {
        "sum" => Func::Sum,
        "product" => Func::Product,
        "avg" | "average" => Func::Avg,
        "count" => Func::Count,
        "stddev" => Func::Stddev,
        "min" => Func::Min,
        "max" => Func::Max,
        "lookup" => Func::Lookup,
        "hlookup" => Func::Hlookup,
        "vlookup" => Func::Vlookup,
        "index" => Func::Index,
        "stindex" => Func::Stindex,
        "pv" => Func::Pv,
        "fv" => Func::Fv,
        "pmt" => Func::Pmt,
        "sin" => Func::Sin,
        "cos" => Func::Cos,
        "tan" => Func::Tan,
        "asin" => Func::Asin,
        "acos" => Func::Acos,
        "atan" => Func::Atan,
        "atan2" => Func::Atan2,
        "exp" => Func::Exp,
        "ln" => Func::Ln,
        "log10" => Func::Log10,
        "sqrt" => Func::Sqrt,
        "abs" => Func::Abs,
        "rnd" => Func::Rnd,
        "round" => Func::Round,
        "rand" => Func::Rand,
        "randbetween" => Func::Randbetween,
        "date" => Func::Date,
        "now" => Func::Now,
        "hour" => Func::Hour,
        "minute" => Func::Minute,
        "second" => Func::Second,
        "day" => Func::Day,
        "month" => Func::Month,
        "year" => Func::Year,
        "upper" => Func::Upper,
        "lower" => Func::Lower,
        "proper" => Func::Proper,
        "substr" => Func::Substr,
        "dateformat" => Func::Dateformat,
        "coltoa" => Func::Coltoa,
        "filename" => Func::Filename,
        "myrow" => Func::Myrow,
        "mycol" => Func::Mycol,
        _ => return None,
    })
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    pool: &'a mut NodePool,
    refmaps: &'a RefMaps,
}

impl<'a> Parser<'a> {
    pub fn new(pool: &'a mut NodePool, refmaps: &'a RefMaps) -> Self {
        Parser { tokens: Vec::new(), pos: 0, pool, refmaps }
    }

    /// Parses a full formula (without a leading `=`) into an `ExprNode`
    /// tree, already pool-backed.
    pub fn parse(src: &str, pool: &'a mut NodePool, refmaps: &'a RefMaps) -> SheetResult<Box<ExprNode>> {
        let tokens = Tokenizer::new(src).tokenize()?;
        let mut parser = Parser { tokens, pos: 0, pool, refmaps };
        let expr = parser.parse_seq()?;
        match parser.peek() {
            Token::Eof => Ok(expr),
            other => Err(SheetError::Parse(format!("trailing tokens near {other:?}"))),
        }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: &Token) -> SheetResult<()> {
        if self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(SheetError::Parse(format!("expected {want:?}, found {:?}", self.peek())))
        }
    }

    fn parse_seq(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut left = self.parse_cond()?;
        while matches!(self.peek(), Token::Semicolon) {
            self.advance();
            let right = self.parse_cond()?;
            left = self.pool.alloc(BinOp::Seq, left, right);
        }
        Ok(left)
    }

    fn parse_cond(&mut self) -> SheetResult<Box<ExprNode>> {
        let cond = self.parse_or()?;
        if matches!(self.peek(), Token::Question) {
            self.advance();
            let t = self.parse_cond()?;
            self.expect(&Token::Colon)?;
            let f = self.parse_cond()?;
            return Ok(self.pool.alloc_cond(cond, t, f));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = self.pool.alloc(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut left = self.parse_cmp()?;
        while matches!(self.peek(), Token::And) {
            self.advance();
            let right = self.parse_cmp()?;
            left = self.pool.alloc(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut left = self.parse_add()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::Ge => BinOp::Ge,
                Token::Gt => BinOp::Gt,
                _ => break,
            };
            self.advance();
            let right = self.parse_add()?;
            left = self.pool.alloc(op, left, right);
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_concat()?;
            left = self.pool.alloc(op, left, right);
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut left = self.parse_mul()?;
        while matches!(self.peek(), Token::Hash) {
            self.advance();
            let right = self.parse_mul()?;
            left = self.pool.alloc(BinOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut left = self.parse_pow()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_pow()?;
            left = self.pool.alloc(op, left, right);
        }
        Ok(left)
    }

    fn parse_pow(&mut self) -> SheetResult<Box<ExprNode>> {
        let base = self.parse_unary()?;
        if matches!(self.peek(), Token::Caret) {
            self.advance();
            let exp = self.parse_pow()?; // right-associative
            return Ok(self.pool.alloc(BinOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> SheetResult<Box<ExprNode>> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                let child = self.parse_unary()?;
                Ok(self.pool.alloc_unary(UnOp::Neg, child))
            }
            Token::Not => {
                self.advance();
                let child = self.parse_unary()?;
                Ok(self.pool.alloc_unary(UnOp::Not, child))
            }
            Token::Ident(name) if name.eq_ignore_ascii_case("f") && self.is_fixed_prefix() => {
                self.advance();
                self.expect(&Token::LParen)?;
                let child = self.parse_seq()?;
                self.expect(&Token::RParen)?;
                Ok(self.pool.alloc_unary(UnOp::Fixed, child))
            }
            _ => self.parse_primary(),
        }
    }

    /// `f(...)` is only the fixed-operator form when immediately followed by
    /// `(`; otherwise `f` could be an ordinary (if unlikely) identifier.
    fn is_fixed_prefix(&self) -> bool {
        matches!(self.tokens.get(self.pos + 1), Some(Token::LParen))
    }

    fn parse_primary(&mut self) -> SheetResult<Box<ExprNode>> {
        match self.advance() {
            Token::Number(n) => Ok(self.pool.alloc_const(n)),
            Token::Str(s) => Ok(self.pool.alloc_sconst(PoolString::new(s))),
            Token::CellRef(r) => {
                if matches!(self.peek(), Token::Colon) {
                    self.advance();
                    match self.advance() {
                        Token::CellRef(r2) => Ok(self.pool.alloc_range(RangeRef::new(r, r2))),
                        other => Err(SheetError::Parse(format!("expected cell reference after ':', found {other:?}"))),
                    }
                } else {
                    Ok(self.pool.alloc_var(r))
                }
            }
            Token::LParen => {
                let e = self.parse_seq()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Token::At => {
                self.expect(&Token::LParen)?;
                let cmd = self.parse_seq()?;
                self.expect(&Token::Comma)?;
                let arg = self.parse_seq()?;
                self.expect(&Token::RParen)?;
                Ok(self.pool.alloc_external(cmd, arg))
            }
            Token::Ident(name) => {
                if matches!(self.peek(), Token::LParen) {
                    self.advance();
                    let func = func_for_name(&name)
                        .ok_or_else(|| SheetError::Parse(format!("unknown function '{name}'")))?;
                    let args = self.parse_args()?;
                    self.expect(&Token::RParen)?;
                    Ok(self.pool.alloc_call(func, args))
                } else if let Some(named) = self.refmaps.find_name(&name) {
                    let (r0, c0, r1, c1) = (
                        named.rect.r0,
                        named.rect.c0,
                        named.rect.r1,
                        named.rect.c1,
                    );
                    if named.rect.rows() == 1 && named.rect.cols() == 1 {
                        Ok(self.pool.alloc_var(CellRef::new(r0, c0, false, false)))
                    } else {
                        Ok(self.pool.alloc_range(RangeRef::new(
                            CellRef::new(r0, c0, false, false),
                            CellRef::new(r1, c1, false, false),
                        )))
                    }
                } else {
                    Err(SheetError::UnknownName(name))
                }
            }
            other => Err(SheetError::Parse(format!("unexpected token {other:?}"))),
        }
    }

    /// Parses a comma-separated argument list into the left-leaning
    /// `ArgsNil`/`ArgsCons` chain (entry order recovered by `collect_args`).
    fn parse_args(&mut self) -> SheetResult<Box<ExprNode>> {
        let mut chain = self.pool.alloc_args_nil();
        if matches!(self.peek(), Token::RParen) {
            return Ok(chain);
        }
        loop {
            let value = self.parse_cond()?;
            chain = self.pool.alloc_args_cons(chain, value);
            if matches!(self.peek(), Token::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Box<ExprNode>, NodePool) {
        let mut pool = NodePool::new();
        let maps = RefMaps::new();
        let tree = Parser::parse(src, &mut pool, &maps).unwrap();
        (tree, pool)
    }

    #[test]
    fn arithmetic_precedence_multiplies_before_adding() {
        let (tree, _pool) = parse("1+2*3");
        match *tree {
            ExprNode::Binary(BinOp::Add, ref l, ref r) => {
                assert!(matches!(**l, ExprNode::Const(x) if x == 1.0));
                assert!(matches!(**r, ExprNode::Binary(BinOp::Mul, _, _)));
            }
            _ => panic!("expected Add at top"),
        }
    }

    #[test]
    fn power_is_right_associative() {
        let (tree, _pool) = parse("2^3^2");
        match *tree {
            ExprNode::Binary(BinOp::Pow, ref l, ref r) => {
                assert!(matches!(**l, ExprNode::Const(x) if x == 2.0));
                assert!(matches!(**r, ExprNode::Binary(BinOp::Pow, _, _)));
            }
            _ => panic!("expected Pow at top"),
        }
    }

    #[test]
    fn cell_ref_with_fix_bits_parses() {
        let (tree, _pool) = parse("$A$1");
        match *tree {
            ExprNode::Var(r) => {
                assert_eq!((r.row, r.col), (0, 0));
                assert!(r.fix_row && r.fix_col);
            }
            _ => panic!("expected Var"),
        }
    }

    #[test]
    fn range_and_function_call_parse() {
        let (tree, _pool) = parse("sum(A1:B2)");
        match *tree {
            ExprNode::Call(Func::Sum, ref args) => {
                let a = ExprNode::collect_args(args);
                assert_eq!(a.len(), 1);
                assert!(matches!(a[0], ExprNode::Range(_)));
            }
            _ => panic!("expected Call(Sum, ...)"),
        }
    }

    #[test]
    fn ternary_and_fixed_operator() {
        let (tree, _pool) = parse("A1>0 ? f(B1) : 0");
        assert!(matches!(*tree, ExprNode::Cond(_, _, _)));
    }
}
