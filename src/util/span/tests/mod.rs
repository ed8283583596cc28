//! Span 单元测试

use crate::util::span::{Position, Span};

#[test]
fn test_position_display() {
    let pos = Position::new(10, 20);
    assert_eq!(format!("{}", pos), "10:20");
}

#[test]
fn test_span_dummy() {
    let span = Span::dummy();
    assert!(span.is_dummy());
    assert_eq!(format!("{}", span), "<unknown>");
}

#[test]
fn test_span_display() {
    let span = Span::on_line(3, 1, 9);
    assert_eq!(format!("{}", span), "[3:1 - 3:9]");
}

#[test]
fn test_span_merge() {
    let a = Span::on_line(2, 5, 10);
    let b = Span::new(Position::new(1, 3), Position::new(2, 7));
    let merged = a.merge(&b);
    assert_eq!(merged.start, Position::new(1, 3));
    assert_eq!(merged.end, Position::new(2, 10));
}

#[test]
fn test_span_merge_with_dummy() {
    let a = Span::on_line(4, 1, 2);
    assert_eq!(a.merge(&Span::dummy()), a);
    assert_eq!(Span::dummy().merge(&a), a);
}
