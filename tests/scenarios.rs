//! End-to-end scenarios (literal inputs -> literal outputs), driven entirely
//! through the public `Document` facade.

use gridcalc::cell::{Alignment, ErrorCode};
use gridcalc::editops::{PullVariant, Side};
use gridcalc::geom::Rect;
use gridcalc::parser::Parser;
use gridcalc::Document;

/// S1: plain arithmetic with operator precedence.
#[test]
fn s1_arithmetic() {
    let mut doc = Document::new();
    doc.set_number(0, 0, 2.0).unwrap(); // A1
    doc.set_number(1, 0, 3.0).unwrap(); // A2
    let tree = Parser::parse("A1+A2*2", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(2, 0, tree, false).unwrap(); // A3
    doc.recalculate();

    let a3 = doc.sheet.get(2, 0).unwrap();
    assert_eq!(a3.v, 8.0);
    assert_eq!(a3.error, ErrorCode::Ok);
}

/// S2: division by zero becomes an in-cell error; a formula that reads the
/// errored cell becomes invalid rather than propagating a numeric value.
#[test]
fn s2_divzero_propagates_as_invalid() {
    let mut doc = Document::new();
    let tree = Parser::parse("1/0", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(0, 0, tree, false).unwrap(); // A1
    let tree = Parser::parse("A1+1", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(0, 1, tree, false).unwrap(); // B1
    doc.recalculate();

    let a1 = doc.sheet.get(0, 0).unwrap();
    assert_eq!(a1.v, 0.0);
    assert_eq!(a1.error, ErrorCode::Error);

    let b1 = doc.sheet.get(0, 1).unwrap();
    assert_eq!(b1.error, ErrorCode::Invalid);
}

/// S3: inserting a row shifts everything at or below it down by one, and
/// the adjuster rewrites references that pointed at the shifted cells.
#[test]
fn s3_insert_shifts_rows_and_rewrites_references() {
    let mut doc = Document::new();
    doc.set_number(0, 0, 1.0).unwrap(); // A1
    doc.set_number(1, 0, 2.0).unwrap(); // A2
    let tree = Parser::parse("A1+A2", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(2, 0, tree, false).unwrap(); // A3
    doc.recalculate();
    assert_eq!(doc.sheet.get(2, 0).unwrap().v, 3.0);

    // insert_rows(row=2, n=1, before) in one-based terms is row index 1
    // (A2) in this zero-based API.
    doc.insert_rows(1, 1, Side::Before).unwrap();
    doc.recalculate();

    assert_eq!(doc.sheet.get(0, 0).unwrap().v, 1.0); // A1 unchanged
    assert!(doc.sheet.get(1, 0).is_none()); // A2 now the blank inserted row
    assert_eq!(doc.sheet.get(2, 0).unwrap().v, 2.0); // A3: former A2 content
    assert_eq!(doc.sheet.get(3, 0).unwrap().v, 3.0); // A4: former A3 formula, re-targeted at A1+A3
}

/// S4: deleting the column a reference points at leaves that reference
/// dangling; the cell re-evaluates to an error with value 0.
#[test]
fn s4_delete_collapses_a_reference_into_an_error() {
    let mut doc = Document::new();
    doc.set_number(1, 1, 5.0).unwrap(); // B2
    let tree = Parser::parse("B2+1", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(1, 2, tree, false).unwrap(); // C2
    doc.recalculate();
    assert_eq!(doc.sheet.get(1, 2).unwrap().v, 6.0);

    doc.delete_cols(1, 1).unwrap(); // delete column B
    doc.recalculate();

    // Former C2 now sits at column B (index 1); its reference to the
    // deleted column is dangling.
    let shifted = doc.sheet.get(1, 1).unwrap();
    assert_eq!(shifted.v, 0.0);
    assert_eq!(shifted.error, ErrorCode::Error);
}

/// S5: sort by a key column is stable on ties.
#[test]
fn s5_sort_is_stable_on_ties() {
    let mut doc = Document::new();
    let rows = [(2.0, "x"), (1.0, "a"), (2.0, "y")];
    for (i, (key, label)) in rows.iter().enumerate() {
        doc.set_number(i as i32, 0, *key).unwrap();
        doc.set_string(i as i32, 1, label, Alignment::Default).unwrap();
    }
    doc.sort(
        Rect::new(0, 0, 2, 1),
        &[gridcalc::editops::SortCriterion { column: 0, descending: false }],
    )
    .unwrap();

    let label = |doc: &Document, r: i32| doc.sheet.get(r, 1).unwrap().label.as_ref().unwrap().as_str().to_string();
    assert_eq!(doc.sheet.get(0, 0).unwrap().v, 1.0);
    assert_eq!(label(&doc, 0), "a");
    assert_eq!(doc.sheet.get(1, 0).unwrap().v, 2.0);
    assert_eq!(label(&doc, 1), "x");
    assert_eq!(doc.sheet.get(2, 0).unwrap().v, 2.0);
    assert_eq!(label(&doc, 2), "y");
}

/// S6: a self-referential formula advances by one per pass and is cut off
/// at the iteration cap; recalculating again resumes from where it left off.
#[test]
fn s6_iteration_cap_stops_a_self_incrementing_formula() {
    let mut doc = Document::new();
    let tree = Parser::parse("A1+1", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(0, 0, tree, false).unwrap(); // A1 = A1 + 1, starts at 0
    doc.set_iterations(10);

    let first = doc.recalculate();
    assert!(!first.converged);
    assert_eq!(first.passes, 10);
    assert_eq!(doc.sheet.get(0, 0).unwrap().v, 10.0);

    let second = doc.recalculate();
    assert!(!second.converged);
    assert_eq!(doc.sheet.get(0, 0).unwrap().v, 20.0);
}

/// S7: transpose-copying a rectangle exchanges row and column deltas, both
/// for where each cell lands and for the references inside its formula.
#[test]
fn s7_transpose_copy_exchanges_row_and_col_axes() {
    let mut doc = Document::new();
    doc.set_number(0, 0, 10.0).unwrap(); // A1
    doc.set_number(0, 1, 20.0).unwrap(); // B1
    doc.set_number(0, 2, 30.0).unwrap(); // C1
    let tree = Parser::parse("A1+B1", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(1, 0, tree, false).unwrap(); // A2 = A1+B1
    doc.set_number(1, 1, 40.0).unwrap(); // B2
    doc.set_number(1, 2, 50.0).unwrap(); // C2
    doc.recalculate();
    assert_eq!(doc.sheet.get(1, 0).unwrap().v, 30.0);

    // Yank A1:C2 (2 rows x 3 cols) and pull it transposed at E1; the
    // destination rectangle is 3 rows x 2 cols, E1:F3.
    doc.yank(Rect::new(0, 0, 1, 2));
    doc.pull((0, 4), PullVariant::Transpose).unwrap();

    // A2's relative position within the source rect is (row 1, col 0); under
    // transpose that becomes destination (row 0, col 5) = F1, and its
    // formula's references shift by (row+=4, col+=0): A1 -> A5, B1 -> B5.
    doc.set_number(4, 0, 7.0).unwrap(); // A5
    doc.set_number(4, 1, 8.0).unwrap(); // B5
    doc.recalculate();

    let f1 = doc.sheet.get(0, 5).unwrap();
    assert_eq!(f1.v, 15.0);
    assert_eq!(f1.error, ErrorCode::Ok);
}
