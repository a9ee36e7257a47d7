//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Filter expression tests: parsing, rendering, column detection and
//! column-source rewriting.

use funnel_sql::expr::{BinaryOp, FilterExpr, RewriteError, UnaryOp};
use funnel_sql::{parse_filter, SqlError};

fn parse(sql: &str) -> FilterExpr {
    parse_filter(sql).unwrap_or_else(|e| panic!("failed to parse {sql:?}: {e}"))
}

// ---------------------------------------------------------------------------
// Parsing and rendering
// ---------------------------------------------------------------------------

#[test]
fn render_simple_conjunction() {
    let f = parse("country = 'US' AND age > 21");
    assert_eq!(f.to_string(), "country = 'US' AND age > 21");
}

#[test]
fn render_keeps_required_parentheses() {
    let f = parse("(a = 1 OR b = 2) AND c = 3");
    assert_eq!(f.to_string(), "(a = 1 OR b = 2) AND c = 3");

    let f = parse("NOT (a = 1 OR b = 2)");
    assert_eq!(f.to_string(), "NOT (a = 1 OR b = 2)");

    let f = parse("a - (b - c) > 0");
    assert_eq!(f.to_string(), "a - (b - c) > 0");
}

#[test]
fn render_drops_redundant_parentheses() {
    let f = parse("((country = 'US')) OR (a = 1 AND b = 2)");
    assert_eq!(f.to_string(), "country = 'US' OR a = 1 AND b = 2");
}

#[test]
fn render_built_tree() {
    let f = FilterExpr::and(
        FilterExpr::or(
            FilterExpr::eq(FilterExpr::column("a"), FilterExpr::number(1)),
            FilterExpr::eq(FilterExpr::column("b"), FilterExpr::number(2)),
        ),
        FilterExpr::binary(FilterExpr::column("c"), BinaryOp::GtEq, FilterExpr::number(3)),
    );
    assert_eq!(f.to_string(), "(a = 1 OR b = 2) AND c >= 3");
}

#[test]
fn render_escapes_string_literals() {
    let f = parse("name = 'O''Brien'");
    assert_eq!(f.to_string(), "name = 'O''Brien'");
}

#[test]
fn render_predicate_forms() {
    let f = parse("age BETWEEN 18 AND 30 AND email IS NOT NULL AND name LIKE 'a%'");
    assert_eq!(
        f.to_string(),
        "age BETWEEN 18 AND 30 AND email IS NOT NULL AND name LIKE 'a%'"
    );

    let f = parse("device NOT IN ('ios', 'android') OR referrer IS NULL");
    assert_eq!(
        f.to_string(),
        "device NOT IN ('ios', 'android') OR referrer IS NULL"
    );
}

#[test]
fn render_functions_and_casts() {
    let f = parse("lower(city) = 'paris' AND cast(age AS INT) > 3");
    assert_eq!(f.to_string(), "lower(city) = 'paris' AND cast(age AS INT) > 3");
}

#[test]
fn render_keeps_identifier_quotes() {
    let f = parse("\"event type\" = 'x' AND \"Country\" = 'US' AND e.\"City\" = 'y'");
    assert_eq!(
        f.to_string(),
        "\"event type\" = 'x' AND \"Country\" = 'US' AND e.\"City\" = 'y'"
    );
    assert!(f.references_column("event type"));
    assert!(f.references_column("e.City"));
    assert_eq!(f.columns(), vec!["event type", "Country", "e.City"]);
}

#[test]
fn render_separates_stacked_signs() {
    let f = parse("a = - -1 AND b = 2");
    assert_eq!(f.to_string(), "a = -(-1) AND b = 2");

    let f = parse("a = -(+b) OR c = -2");
    assert_eq!(f.to_string(), "a = -(+b) OR c = -2");

    let negated = FilterExpr::Unary {
        op: UnaryOp::Minus,
        expr: Box::new(FilterExpr::number(-5)),
    };
    assert_eq!(negated.to_string(), "-(-5)");
}

#[test]
fn parse_errors() {
    assert!(matches!(parse_filter("country = "), Err(SqlError::Parse(_))));
    assert!(matches!(parse_filter(""), Err(SqlError::Parse(_))));
    assert!(matches!(parse_filter("a = 1 b"), Err(SqlError::Parse(_))));
}

// ---------------------------------------------------------------------------
// Column detection
// ---------------------------------------------------------------------------

#[test]
fn references_column_walks_whole_tree() {
    let f = parse("country = 'US' AND (device IN ('ios', 'android') OR lower(city) = 'x')");
    assert!(f.references_column("country"));
    assert!(f.references_column("device"));
    assert!(f.references_column("city"));
    assert!(!f.references_column("browser"));
    assert_eq!(f.columns(), vec!["country", "device", "city"]);
}

#[test]
fn references_column_matches_full_name() {
    let f = parse("e.country = 'US'");
    assert!(f.references_column("e.country"));
    assert!(!f.references_column("country"));
}

#[test]
fn columns_are_distinct() {
    let f = parse("a = 1 OR a = 2 OR b = a");
    assert_eq!(f.columns(), vec!["a", "b"]);
}

#[test]
fn references_column_inside_unsupported_node() {
    let f = parse("country IN (SELECT c FROM allowed)");
    assert!(matches!(f, FilterExpr::Unsupported(_)));
    assert!(f.references_column("country"));
    assert!(!f.references_column("device"));
}

// ---------------------------------------------------------------------------
// Rewriting
// ---------------------------------------------------------------------------

#[test]
fn rewrite_qualifies_resolved_columns_only() {
    let f = parse("country = 'US' AND device = 'ios'");
    let sql = f
        .rewrite_column_sources(|col| (col == "country").then(|| "continuous.t".to_string()))
        .unwrap();
    assert_eq!(sql, "continuous.t.country = 'US' AND device = 'ios'");
}

#[test]
fn rewrite_passes_unquoted_names_and_keeps_quotes() {
    let f = parse("\"Country\" = 'US' AND \"event type\" = 'x'");
    let mut asked = Vec::new();
    let sql = f
        .rewrite_column_sources(|col| {
            asked.push(col.to_string());
            (col == "Country").then(|| "continuous.t".to_string())
        })
        .unwrap();
    assert_eq!(asked, vec!["Country", "event type"]);
    assert_eq!(sql, "continuous.t.\"Country\" = 'US' AND \"event type\" = 'x'");
}

#[test]
fn rewrite_without_any_match_is_ok() {
    let f = parse("country = 'US' OR device = 'ios'");
    let sql = f.rewrite_column_sources(|_| None).unwrap();
    assert_eq!(sql, f.to_string());
}

#[test]
fn rewrite_calls_resolver_for_every_reference() {
    let f = parse("a = 1 OR a = 2");
    let mut asked = Vec::new();
    f.rewrite_column_sources(|col| {
        asked.push(col.to_string());
        None
    })
    .unwrap();
    assert_eq!(asked, vec!["a", "a"]);
}

#[test]
fn rewrite_fails_on_unsupported_node() {
    let f = parse("device = 'ios' AND country IN (SELECT c FROM allowed)");
    let err: RewriteError = f
        .rewrite_column_sources(|_| Some("continuous.t".to_string()))
        .unwrap_err();
    assert!(err.node.contains("SELECT c FROM allowed"));
    // Verbatim rendering still works.
    assert_eq!(
        f.to_string(),
        "device = 'ios' AND (country IN (SELECT c FROM allowed))"
    );
}
