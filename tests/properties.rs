//! Quantified properties from the testable-properties list, driven entirely
//! through the public `Document` facade.

use gridcalc::cell::ErrorCode;
use gridcalc::editops::{PullVariant, Side, SortCriterion};
use gridcalc::geom::Rect;
use gridcalc::parser::Parser;
use gridcalc::Document;

/// Property 1: a structural edit that does not delete a referenced cell
/// leaves every expression's value unchanged.
#[test]
fn reference_stability_under_a_non_deleting_edit() {
    let mut doc = Document::new();
    doc.set_number(0, 0, 2.0).unwrap(); // A1
    doc.set_number(0, 1, 3.0).unwrap(); // B1
    let tree = Parser::parse("A1+B1", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(5, 5, tree, false).unwrap(); // F6, nowhere near the edit
    doc.recalculate();
    let before = doc.sheet.get(5, 5).unwrap().v;

    doc.insert_rows(20, 3, Side::Before).unwrap();
    doc.recalculate();
    let after = doc.sheet.get(5, 5).unwrap().v;

    assert_eq!(before, after);
    assert_eq!(after, 5.0);
}

/// Property 2: copying a range translates every relative reference by the
/// same (dr, dc) and leaves absolute (`$`) references untouched.
#[test]
fn copy_translates_relative_refs_and_preserves_absolute_refs() {
    let mut doc = Document::new();
    doc.set_number(1, 0, 5.0).unwrap(); // A2, the absolute anchor
    doc.set_number(0, 2, 100.0).unwrap(); // C1, target of the translated ref
    let tree = Parser::parse("C1+$A$2", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(0, 1, tree, false).unwrap(); // B1 = C1 + $A$2
    doc.recalculate();
    assert_eq!(doc.sheet.get(0, 1).unwrap().v, 105.0);

    // Copy B1 two columns right, to D1: relative C1 -> E1, $A$2 stays put.
    doc.copy_cells(Rect::single(0, 1), (0, 3)).unwrap();
    doc.set_number(0, 4, 7.0).unwrap(); // E1, what the translated ref now reads
    doc.recalculate();
    assert_eq!(doc.sheet.get(0, 3).unwrap().v, 12.0); // E1 + $A$2 = 7 + 5
}

/// Property 3: sort is stable under ties on the sort key.
#[test]
fn sort_preserves_relative_order_of_tied_rows() {
    use gridcalc::cell::Alignment;
    let mut doc = Document::new();
    let rows = [(2.0, "x"), (1.0, "a"), (2.0, "y")];
    for (i, (key, label)) in rows.iter().enumerate() {
        doc.set_number(i as i32, 0, *key).unwrap();
        doc.set_string(i as i32, 1, label, Alignment::Default).unwrap();
    }
    doc.sort(Rect::new(0, 0, 2, 1), &[SortCriterion { column: 0, descending: false }]).unwrap();

    assert_eq!(doc.sheet.get(0, 0).unwrap().v, 1.0);
    assert_eq!(doc.sheet.get(0, 1).unwrap().label.as_ref().unwrap().as_str(), "a");
    assert_eq!(doc.sheet.get(1, 0).unwrap().v, 2.0);
    assert_eq!(doc.sheet.get(1, 1).unwrap().label.as_ref().unwrap().as_str(), "x");
    assert_eq!(doc.sheet.get(2, 1).unwrap().label.as_ref().unwrap().as_str(), "y");
}

/// Property 4: insert(r, n) followed by delete(r, r+n-1) round-trips to a
/// no-op on cell contents and every reference's endpoint.
#[test]
fn insert_then_delete_rows_is_a_round_trip() {
    let mut doc = Document::new();
    doc.set_number(0, 0, 1.0).unwrap(); // A1
    doc.set_number(1, 0, 2.0).unwrap(); // A2
    let tree = Parser::parse("A1+A2", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(2, 0, tree, false).unwrap(); // A3
    doc.recalculate();
    let before = doc.sheet.get(2, 0).unwrap().v;

    doc.insert_rows(1, 2, Side::Before).unwrap();
    doc.delete_rows(1, 2).unwrap();
    doc.recalculate();

    assert_eq!(doc.sheet.get(0, 0).unwrap().v, 1.0);
    assert_eq!(doc.sheet.get(1, 0).unwrap().v, 2.0);
    assert_eq!(doc.sheet.get(2, 0).unwrap().v, before);
}

/// Property 5: erase pushes onto the undo ring; nine destructive edits
/// followed by nine pulls from slots 1..=9 restore the prior states in
/// reverse order (slot 1 is the most recent, slot 9 the oldest surviving).
#[test]
fn nine_erases_then_nine_pulls_restore_states_in_reverse() {
    let mut doc = Document::new();
    for v in 1..=9 {
        doc.set_number(0, 0, v as f64).unwrap();
        doc.erase(Rect::single(0, 0)).unwrap();
    }
    for (slot, expected) in (1..=9).zip((1..=9).rev()) {
        doc.select_register(char::from_digit(slot as u32, 10).unwrap()).unwrap();
        doc.pull((5, slot as i32), PullVariant::Plain).unwrap();
        assert_eq!(doc.sheet.get(5, slot as i32).unwrap().v, expected as f64);
    }
}

/// Property 6: `eval_all` converges within `iterations` passes; when it
/// converges sooner, the last pass changed nothing.
#[test]
fn eval_all_terminates_within_the_iteration_cap() {
    let mut doc = Document::new();
    doc.set_number(0, 0, 1.0).unwrap();
    doc.set_number(1, 0, 2.0).unwrap();
    let tree = Parser::parse("A1+A2", &mut doc.pool, &doc.refmaps).unwrap();
    doc.set_expression(2, 0, tree, false).unwrap(); // a plain, non-self-referential formula
    doc.set_iterations(10);

    let report = doc.recalculate();
    assert!(report.converged);
    assert!(report.passes <= 10);
    assert_eq!(doc.sheet.get(2, 0).unwrap().v, 3.0);
    assert_eq!(doc.sheet.get(2, 0).unwrap().error, ErrorCode::Ok);
}
