//! Named ranges, framed ranges, color ranges, notes and goto state (§3, §4.4).
//!
//! Each collection is kept in insertion order (`Vec<T>`, standing in for the
//! reference implementation's doubly linked lists) and exposes add/find/
//! delete/list plus a share of the single `adjust` pass driven by
//! `adjuster::run`.

use crate::adjuster::{adjust_position, adjust_rect, AdjustCtx};
use crate::error::{SheetError, SheetResult};
use crate::geom::Rect;
use crate::string_pool::PoolString;

#[derive(Debug, Clone)]
pub struct NamedRange {
    pub name: String,
    pub rect: Rect,
}

#[derive(Debug, Clone)]
pub struct FramedRange {
    pub outer: Rect,
    pub inner: Rect,
    pub trigger: (i32, i32),
}

#[derive(Debug, Clone)]
pub struct ColorRange {
    pub rect: Rect,
    pub palette: i32,
}

#[derive(Debug, Clone)]
pub enum NoteContent {
    Text(PoolString),
    Range(Rect),
}

#[derive(Debug, Clone)]
pub struct Note {
    pub source: (i32, i32),
    pub content: NoteContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotoKind {
    Num,
    Str,
    NStr,
    XStr,
    Cell,
}

#[derive(Debug, Clone)]
pub struct GotoState {
    pub kind: GotoKind,
    pub range: Rect,
    pub start: (i32, i32),
}

#[derive(Default)]
pub struct RefMaps {
    pub named: Vec<NamedRange>,
    pub framed: Vec<FramedRange>,
    pub colored: Vec<ColorRange>,
    pub notes: Vec<Note>,
    pub goto: Option<GotoState>,
}

impl RefMaps {
    pub fn new() -> Self {
        Self::default()
    }

    // --- named ranges ---

    pub fn define_name(&mut self, name: &str, rect: Rect) -> SheetResult<()> {
        if self.named.iter().any(|n| n.name == name) {
            return Err(SheetError::Parse(format!("name '{name}' already defined")));
        }
        self.named.push(NamedRange { name: name.to_string(), rect });
        Ok(())
    }

    pub fn find_name(&self, name: &str) -> Option<&NamedRange> {
        self.named.iter().find(|n| n.name == name)
    }

    pub fn delete_name(&mut self, name: &str) -> SheetResult<()> {
        let before = self.named.len();
        self.named.retain(|n| n.name != name);
        if self.named.len() == before {
            return Err(SheetError::UnknownName(name.to_string()));
        }
        Ok(())
    }

    /// Finds a name that covers exactly the given rectangle (used by the
    /// decompiler to prefer `name` over `A1:B2`).
    pub fn find_exact(&self, rect: Rect) -> Option<&str> {
        self.named.iter().find(|n| n.rect == rect).map(|n| n.name.as_str())
    }

    // --- framed ranges ---

    pub fn add_frame(&mut self, outer: Rect, inner: Rect, trigger: (i32, i32)) {
        self.framed.push(FramedRange { outer, inner, trigger });
    }

    /// The innermost enclosing frame wins; ties (equal area) are broken by
    /// insertion order (§4.4).
    pub fn find_frame(&self, row: i32, col: i32) -> Option<&FramedRange> {
        let mut best: Option<&FramedRange> = None;
        for f in &self.framed {
            if f.outer.contains(row, col) {
                match best {
                    None => best = Some(f),
                    Some(b) if f.outer.area() < b.outer.area() => best = Some(f),
                    _ => {}
                }
            }
        }
        best
    }

    // --- color ranges ---

    pub fn add_color_range(&mut self, rect: Rect, palette: i32) {
        self.colored.push(ColorRange { rect, palette });
    }

    /// Topmost (most recently added) rectangle containing the cell.
    pub fn find_color(&self, row: i32, col: i32) -> Option<&ColorRange> {
        self.colored.iter().rev().find(|c| c.rect.contains(row, col))
    }

    // --- notes ---

    pub fn add_note(&mut self, source: (i32, i32), content: NoteContent) {
        self.notes.retain(|n| n.source != source);
        self.notes.push(Note { source, content });
    }

    pub fn find_note(&self, source: (i32, i32)) -> Option<&Note> {
        self.notes.iter().find(|n| n.source == source)
    }

    pub fn delete_note(&mut self, source: (i32, i32)) -> SheetResult<()> {
        let before = self.notes.len();
        self.notes.retain(|n| n.source != source);
        if self.notes.len() == before {
            return Err(SheetError::Bounds);
        }
        Ok(())
    }

    // --- adjust ---

    pub fn adjust(&mut self, ctx: &AdjustCtx) {
        for n in self.named.iter_mut() {
            n.rect = adjust_rect(ctx, n.rect);
        }
        for f in self.framed.iter_mut() {
            f.outer = adjust_rect(ctx, f.outer);
            f.inner = adjust_rect(ctx, f.inner);
            let (r, c) = adjust_position(ctx, f.trigger.0, f.trigger.1);
            f.trigger = (r, c);
        }
        for c in self.colored.iter_mut() {
            c.rect = adjust_rect(ctx, c.rect);
        }
        for n in self.notes.iter_mut() {
            let (r, c) = adjust_position(ctx, n.source.0, n.source.1);
            n.source = (r, c);
            if let NoteContent::Range(rect) = &mut n.content {
                *rect = adjust_rect(ctx, *rect);
            }
        }
        if let Some(g) = self.goto.as_mut() {
            g.range = adjust_rect(ctx, g.range);
            let (r, c) = adjust_position(ctx, g.start.0, g.start.1);
            g.start = (r, c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_frame_wins_on_tie_by_insertion_order() {
        let mut maps = RefMaps::new();
        maps.add_frame(Rect::new(0, 0, 10, 10), Rect::new(1, 1, 9, 9), (5, 5));
        maps.add_frame(Rect::new(2, 2, 4, 4), Rect::new(2, 2, 4, 4), (3, 3));
        let f = maps.find_frame(3, 3).unwrap();
        assert_eq!(f.outer, Rect::new(2, 2, 4, 4));
    }

    #[test]
    fn color_lookup_returns_topmost() {
        let mut maps = RefMaps::new();
        maps.add_color_range(Rect::new(0, 0, 10, 10), 1);
        maps.add_color_range(Rect::new(2, 2, 4, 4), 2);
        assert_eq!(maps.find_color(3, 3).unwrap().palette, 2);
        assert_eq!(maps.find_color(0, 0).unwrap().palette, 1);
    }

    #[test]
    fn named_range_must_be_unique() {
        let mut maps = RefMaps::new();
        maps.define_name("foo", Rect::single(0, 0)).unwrap();
        assert!(maps.define_name("foo", Rect::single(1, 1)).is_err());
    }
}
