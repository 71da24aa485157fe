//! Text save/load (§6), grounded in the teacher's `save_load.rs` split
//! between a line-oriented writer and a line-oriented reader, generalized
//! from that file's fixed `DIMS,`/`CELL,` record shape to the free-form
//! keyword grammar this sheet's commands use — `let`, `fmt`, `define`, and
//! so on, one command per line, re-parseable by the same vocabulary that
//! built them.
//!
//! Loading never runs external commands regardless of `config.external_enabled`
//! (§6): a saved `@(cmd,arg)` node reloads with its cached output intact and
//! simply isn't re-executed until the caller opts back in.

use crate::cell::Alignment;
use crate::command::Document;
use crate::decompile::decompile;
use crate::error::{SheetError, SheetResult};
use crate::geom::Rect;
use crate::parser::Parser;
use crate::refmaps::NoteContent;
use crate::sheet::{col_from_name, col_name, RecalcOrder};
use crate::string_pool::PoolString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Expands any `abbrev` macros in `text` (whole-word substitution only, the
/// way the reference implementation's abbreviation table works): repeated
/// until a pass makes no change, so an abbreviation's replacement can itself
/// reference another abbreviation.
fn expand_abbrevs(doc: &Document, text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let mut changed = false;
        for (name, expansion) in &doc.abbreviations {
            let replaced = replace_word(&out, name, expansion);
            if replaced != out {
                out = replaced;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    out
}

fn replace_word(haystack: &str, word: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let bytes = haystack.as_bytes();
    let wlen = word.len();
    let mut i = 0;
    while i < bytes.len() {
        let at_boundary = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if at_boundary && haystack[i..].starts_with(word) {
            let after = i + wlen;
            let boundary_after = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
            if boundary_after {
                out.push_str(replacement);
                i = after;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Parses a bare `A1`-style reference (no `$` fixing, as used in range
/// endpoints within `define`/`addnote`/`color` lines).
fn parse_ref(s: &str) -> SheetResult<(i32, i32)> {
    let split = s.find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| SheetError::Parse(format!("bad cell reference '{s}'")))?;
    let (col_part, row_part) = s.split_at(split);
    let col = col_from_name(col_part)
        .ok_or_else(|| SheetError::Parse(format!("bad cell reference '{s}'")))?;
    let row: i32 = row_part
        .parse()
        .map_err(|_| SheetError::Parse(format!("bad cell reference '{s}'")))?;
    Ok((row - 1, col))
}

fn parse_range(s: &str) -> SheetResult<Rect> {
    let (lhs, rhs) = s
        .split_once(':')
        .ok_or_else(|| SheetError::Parse(format!("expected a range like A1:B2, got '{s}'")))?;
    let (r0, c0) = parse_ref(lhs)?;
    let (r1, c1) = parse_ref(rhs)?;
    Ok(Rect::new(r0, c0, r1, c1))
}

fn strip_quotes(s: &str) -> SheetResult<String> {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        Ok(s[1..s.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\"))
    } else {
        Err(SheetError::Parse(format!("expected a quoted string, got '{s}'")))
    }
}

/// Loads `path` into `doc`, replacing its entire contents (§6). External
/// command execution is forced off for the duration of the load regardless
/// of the caller's prior setting, then restored.
pub fn load(doc: &mut Document, path: &Path) -> SheetResult<()> {
    log::debug!("loading {}", path.display());
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    *doc = Document::new();
    let saved_external = doc.config.external_enabled;
    doc.config.external_enabled = false;

    let mut lines_applied = 0u32;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        apply_line(doc, trimmed).map_err(|e| {
            log::warn!("load aborted at line {}: {e}", lineno + 1);
            SheetError::Parse(format!("line {}: {e}", lineno + 1))
        })?;
        lines_applied += 1;
    }

    doc.config.external_enabled = saved_external;
    log::debug!("loaded {} ({lines_applied} commands applied)", path.display());
    Ok(())
}

/// Applies one line of the grammar (`let`, `fmt`, `define`, `set`, ...) to
/// `doc`. `load` drives this per line from a file; the REPL binary drives it
/// per line from stdin, so the interactive command language and the saved
/// file format are the same grammar.
pub fn apply_line(doc: &mut Document, line: &str) -> SheetResult<()> {
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "let" => {
            let (r, c, expr) = split_rc_eq(rest)?;
            let expanded = expand_abbrevs(doc, expr);
            let tree = Parser::parse(&expanded, &mut doc.pool, &doc.refmaps)?;
            doc.set_expression(r, c, tree, false)
        }
        "leftstring" | "rightstring" | "label" => {
            let align = match head {
                "leftstring" => Alignment::Left,
                "rightstring" => Alignment::Right,
                _ => Alignment::Default,
            };
            let (r, c, text) = split_rc_eq(rest)?;
            if let Ok(s) = strip_quotes(&text) {
                doc.set_label(r, c, &s, align)
            } else {
                let expanded = expand_abbrevs(doc, &text);
                let tree = Parser::parse(&expanded, &mut doc.pool, &doc.refmaps)?;
                doc.set_expression(r, c, tree, true)
            }
        }
        "fmt" => {
            let mut it = rest.splitn(3, char::is_whitespace);
            let r: i32 = parse_int(it.next())?;
            let c: i32 = parse_int(it.next())?;
            let fmt = strip_quotes(it.next().unwrap_or(""))?;
            doc.set_format(r, c, &fmt)
        }
        "format" => {
            let mut it = rest.split_whitespace();
            let col_tok = it.next().ok_or_else(|| SheetError::Parse("format: missing column".into()))?;
            let col = parse_col(col_tok)?;
            let width: u16 = parse_int(it.next())? as u16;
            let precision: u8 = parse_int(it.next())? as u8;
            let recalc_flag: i32 = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            doc.sheet.checkbounds(0, col)?;
            let cf = doc.sheet.col_fmt.get_mut(col as usize);
            if let Some(cf) = cf {
                cf.width = width;
                cf.precision = precision;
                cf.format_index = recalc_flag;
            }
            Ok(())
        }
        "hide" => {
            let mut it = rest.split_whitespace();
            match it.next() {
                Some("row") => {
                    let r = parse_int(it.next())?;
                    doc.sheet.checkbounds(r, 0)?;
                    if let Some(rf) = doc.sheet.row_fmt.get_mut(r as usize) {
                        rf.hidden = true;
                    }
                    Ok(())
                }
                Some("col") => {
                    let tok = it.next().ok_or_else(|| SheetError::Parse("hide col: missing column".into()))?;
                    let c = parse_col(tok)?;
                    doc.sheet.checkbounds(0, c)?;
                    if let Some(cf) = doc.sheet.col_fmt.get_mut(c as usize) {
                        cf.hidden = true;
                    }
                    Ok(())
                }
                _ => Err(SheetError::Parse("hide: expected 'row' or 'col'".into())),
            }
        }
        "define" => {
            let (name_tok, range_tok) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| SheetError::Parse("define: missing range".into()))?;
            let name = strip_quotes(name_tok)?;
            doc.define_name(&name, parse_range(range_tok.trim())?)
        }
        "frame" => {
            let mut it = rest.split_whitespace();
            let mut next_int = || -> SheetResult<i32> { parse_int(it.next()) };
            let outer = Rect::new(next_int()?, next_int()?, next_int()?, next_int()?);
            let inner = Rect::new(next_int()?, next_int()?, next_int()?, next_int()?);
            let trigger = (next_int()?, next_int()?);
            doc.add_frame(outer, inner, trigger);
            Ok(())
        }
        "color" => {
            if let Some((lhs, rhs)) = rest.split_once('=') {
                let n: i32 = parse_int(Some(lhs.trim()))?;
                let expanded = expand_abbrevs(doc, rhs.trim());
                let tree = Parser::parse(&expanded, &mut doc.pool, &doc.refmaps)?;
                doc.add_color_rule(n, tree);
                Ok(())
            } else {
                let mut it = rest.split_whitespace();
                let rr = parse_range(it.next().ok_or_else(|| SheetError::Parse("color: missing range".into()))?)?;
                let n: i32 = parse_int(it.next())?;
                doc.add_color_range(rr, n);
                Ok(())
            }
        }
        "addnote" => {
            let mut it = rest.splitn(3, char::is_whitespace);
            let r = parse_int(it.next())?;
            let c = parse_int(it.next())?;
            let tail = it.next().unwrap_or("").trim();
            let content = if let Ok(s) = strip_quotes(tail) {
                NoteContent::Text(PoolString::new(s))
            } else {
                NoteContent::Range(parse_range(tail)?)
            };
            doc.add_note((r, c), content);
            Ok(())
        }
        "abbrev" => {
            let body = strip_quotes(rest)?;
            let (name, text) = body
                .split_once(' ')
                .ok_or_else(|| SheetError::Parse("abbrev: expected \"name text\"".into()))?;
            doc.define_abbrev(name, text);
            Ok(())
        }
        "set" => {
            let (opt, value) = rest
                .split_once('=')
                .ok_or_else(|| SheetError::Parse("set: expected optname=value".into()))?;
            apply_set_option(doc, opt.trim(), value.trim())
        }
        other => {
            log::warn!("unknown command '{other}'");
            Err(SheetError::Parse(format!("unknown command '{other}'")))
        }
    }
}

fn split_rc_eq(rest: &str) -> SheetResult<(i32, i32, String)> {
    let mut it = rest.splitn(3, char::is_whitespace);
    let r = parse_int(it.next())?;
    let c = parse_int(it.next())?;
    let tail = it.next().ok_or_else(|| SheetError::Parse("expected '='".into()))?;
    let expr = tail
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| SheetError::Parse("expected '='".into()))?
        .trim()
        .to_string();
    Ok((r, c, expr))
}

fn parse_col(tok: &str) -> SheetResult<i32> {
    if let Some(c) = col_from_name(tok) {
        return Ok(c);
    }
    tok.parse().map_err(|_| SheetError::Parse(format!("bad column '{tok}'")))
}

fn parse_int(tok: Option<&str>) -> SheetResult<i32> {
    tok.ok_or_else(|| SheetError::Parse("missing integer".into()))?
        .parse()
        .map_err(|_| SheetError::Parse(format!("not an integer: '{}'", tok.unwrap_or(""))))
}

fn apply_set_option(doc: &mut Document, opt: &str, value: &str) -> SheetResult<()> {
    match opt {
        "iterations" => {
            let n: u32 = value.parse().map_err(|_| SheetError::Parse("bad iterations value".into()))?;
            doc.set_iterations(n);
        }
        "order" => {
            let order = match value {
                "by_rows" => RecalcOrder::ByRows,
                "by_cols" => RecalcOrder::ByCols,
                other => return Err(SheetError::Parse(format!("unknown order '{other}'"))),
            };
            doc.set_order(order);
        }
        "protect" => {
            doc.set_protect(value == "true" || value == "1");
        }
        "external" => {
            doc.config.external_enabled = value == "true" || value == "1";
        }
        other => return Err(SheetError::Parse(format!("unknown option '{other}'"))),
    }
    Ok(())
}

/// Saves `doc` to `path` via a temp-file-then-rename (atomic replace) when
/// the `extensions` feature is enabled; a direct truncating write otherwise
/// (§6, matching the teacher's plain `OpenOptions` write when the fancier
/// path isn't available).
pub fn save(doc: &Document, path: &Path) -> SheetResult<()> {
    let mut buf = Vec::new();
    write_body(doc, &mut buf)?;

    #[cfg(feature = "extensions")]
    {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&buf)?;
        tmp.persist(path).map_err(|e| SheetError::Io(e.to_string()))?;
        log::debug!("saved {} ({} bytes, atomic replace)", path.display(), buf.len());
        Ok(())
    }
    #[cfg(not(feature = "extensions"))]
    {
        fs::write(path, &buf)?;
        log::debug!("saved {} ({} bytes)", path.display(), buf.len());
        Ok(())
    }
}

fn write_body(doc: &Document, out: &mut impl Write) -> SheetResult<()> {
    let mut w = BufWriter::new(out);

    for (name, text) in &doc.abbreviations {
        writeln!(w, "abbrev \"{name} {text}\"")?;
    }

    for r in 0..=doc.sheet.maxrow.max(-1) {
        for c in 0..=doc.sheet.maxcol.max(-1) {
            let Some(cell) = doc.sheet.get(r, c) else { continue };
            if !cell.is_live() {
                continue;
            }
            write_cell(doc, &mut w, r, c)?;
        }
    }

    for n in &doc.refmaps.named {
        writeln!(
            w,
            "define \"{}\" {}{}:{}{}",
            n.name,
            col_name(n.rect.c0),
            n.rect.r0 + 1,
            col_name(n.rect.c1),
            n.rect.r1 + 1
        )?;
    }
    for f in &doc.refmaps.framed {
        writeln!(
            w,
            "frame {} {} {} {} {} {} {} {} {} {}",
            f.outer.r0, f.outer.c0, f.outer.r1, f.outer.c1,
            f.inner.r0, f.inner.c0, f.inner.r1, f.inner.c1,
            f.trigger.0, f.trigger.1
        )?;
    }
    for cr in &doc.refmaps.colored {
        writeln!(
            w,
            "color {}{}:{}{} {}",
            col_name(cr.rect.c0), cr.rect.r0 + 1, col_name(cr.rect.c1), cr.rect.r1 + 1, cr.palette
        )?;
    }
    for (n, tree) in &doc.color_rules {
        writeln!(w, "color {n} = {}", decompile(tree, &doc.refmaps))?;
    }
    for note in &doc.refmaps.notes {
        match &note.content {
            NoteContent::Text(s) => writeln!(w, "addnote {} {} \"{}\"", note.source.0, note.source.1, s.as_str())?,
            NoteContent::Range(rr) => writeln!(
                w,
                "addnote {} {} {}{}:{}{}",
                note.source.0, note.source.1, col_name(rr.c0), rr.r0 + 1, col_name(rr.c1), rr.r1 + 1
            )?,
        }
    }

    writeln!(w, "set iterations={}", doc.config.iterations)?;
    writeln!(
        w,
        "set order={}",
        match doc.config.order {
            RecalcOrder::ByRows => "by_rows",
            RecalcOrder::ByCols => "by_cols",
        }
    )?;
    writeln!(w, "set protect={}", doc.config.protect)?;
    w.flush()?;
    Ok(())
}

fn write_cell(doc: &Document, w: &mut impl Write, r: i32, c: i32) -> SheetResult<()> {
    use crate::cell::CellTag;
    let cell = doc.sheet.get(r, c).unwrap();
    if let Some(expr) = &cell.expr {
        let text = decompile(expr, &doc.refmaps);
        let keyword = if cell.flags.contains(crate::cell::CellFlags::STRING_EXPR) {
            "label"
        } else {
            "let"
        };
        writeln!(w, "{keyword} {r} {c} = {text}")?;
    } else {
        match cell.tag {
            CellTag::Number => writeln!(w, "let {r} {c} = {}", cell.v)?,
            CellTag::String => {
                let align_kw = match cell.align {
                    Alignment::Left => "leftstring",
                    Alignment::Right => "rightstring",
                    _ => "label",
                };
                let text = cell.label.as_ref().map(|s| s.as_str()).unwrap_or("");
                writeln!(w, "{align_kw} {r} {c} = \"{}\"", escape_quotes(text))?;
            }
            CellTag::Boolean => writeln!(w, "let {r} {c} = {}", cell.v)?,
            CellTag::Error | CellTag::Empty => {}
        }
    }
    if let Some(fmt) = &cell.format {
        writeln!(w, "fmt {r} {c} \"{}\"", fmt.as_str())?;
    }
    Ok(())
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("gridcalc_persistence_test_{name}_{}.sheet", std::process::id()))
    }

    #[test]
    fn save_then_load_round_trips_values_and_formulas() {
        let mut doc = Document::new();
        doc.set_number(0, 0, 2.0).unwrap();
        doc.set_number(1, 0, 3.0).unwrap();
        let tree = Parser::parse("A1+B1", &mut doc.pool, &doc.refmaps).unwrap();
        doc.set_expression(2, 0, tree, false).unwrap();
        doc.recalculate();

        let path = temp_path("roundtrip");
        save(&doc, &path).unwrap();

        let mut loaded = Document::new();
        load(&mut loaded, &path).unwrap();
        loaded.recalculate();
        assert_eq!(loaded.sheet.get(2, 0).unwrap().v, 5.0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn abbreviation_expands_before_parsing() {
        let mut doc = Document::new();
        doc.set_number(0, 0, 4.0).unwrap();
        apply_line(&mut doc, "abbrev \"DBL A1*2\"").unwrap();
        apply_line(&mut doc, "let 1 0 = DBL").unwrap();
        doc.recalculate();
        assert_eq!(doc.sheet.get(1, 0).unwrap().v, 8.0);
    }

    #[test]
    fn named_range_and_note_round_trip() {
        let mut doc = Document::new();
        doc.set_number(0, 0, 1.0).unwrap();
        doc.set_number(0, 1, 2.0).unwrap();
        apply_line(&mut doc, "define \"pair\" A1:B1").unwrap();
        apply_line(&mut doc, "addnote 0 0 \"hello\"").unwrap();

        let path = temp_path("namednote");
        save(&doc, &path).unwrap();
        let mut loaded = Document::new();
        load(&mut loaded, &path).unwrap();
        assert!(loaded.refmaps.find_name("pair").is_some());
        assert!(loaded.refmaps.find_note((0, 0)).is_some());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn external_execution_is_forced_off_during_load() {
        let mut doc = Document::new();
        doc.config.external_enabled = true;
        let path = temp_path("extoff");
        save(&doc, &path).unwrap();
        let mut loaded = Document::new();
        loaded.config.external_enabled = true;
        load(&mut loaded, &path).unwrap();
        // external_enabled is restored to the caller's setting after load,
        // but was forced false for the duration of parsing the file itself.
        assert!(loaded.config.external_enabled);
        let _ = fs::remove_file(&path);
    }
}
