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

// Filter expression model: sqlparser AST → FilterExpr tree → SQL text, with
// column references optionally re-pointed at precomputed tables.

use std::fmt;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions, BinaryOperator, CastKind, Expr, Function, FunctionArg, FunctionArgExpr,
    FunctionArguments, Ident, UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::SqlError;

/// A step filter expression.
///
/// Column leaves keep both their dotted name and the quoting they were
/// written with. Anything sqlparser
/// accepts but this model has no node for is kept as `Unsupported`; such a
/// filter can still be rendered verbatim but its column sources cannot be
/// rewritten.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Column(ColumnRef),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        expr: Box<FilterExpr>,
    },
    Binary {
        left: Box<FilterExpr>,
        op: BinaryOp,
        right: Box<FilterExpr>,
    },
    Logical {
        left: Box<FilterExpr>,
        op: LogicalOp,
        right: Box<FilterExpr>,
    },
    IsNull {
        expr: Box<FilterExpr>,
        negated: bool,
    },
    InList {
        expr: Box<FilterExpr>,
        list: Vec<FilterExpr>,
        negated: bool,
    },
    Between {
        expr: Box<FilterExpr>,
        low: Box<FilterExpr>,
        high: Box<FilterExpr>,
        negated: bool,
    },
    Like {
        expr: Box<FilterExpr>,
        pattern: Box<FilterExpr>,
        negated: bool,
        case_insensitive: bool,
    },
    Cast {
        expr: Box<FilterExpr>,
        data_type: String,
    },
    Function {
        name: String,
        args: Vec<FilterExpr>,
    },
    Unsupported(Box<Expr>),
}

/// A possibly dotted, possibly quoted column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    name: String,
    sql: String,
}

impl ColumnRef {
    /// An unquoted reference; `name` may be dotted.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        ColumnRef {
            sql: name.clone(),
            name,
        }
    }

    fn from_idents(parts: &[Ident]) -> Self {
        ColumnRef {
            name: parts
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join("."),
            sql: parts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("."),
        }
    }

    /// Dotted name with quotes stripped, as seen by column lookups.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The reference as written, quotes included.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(String),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// The filter contains a node whose column references cannot be rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteError {
    pub node: String,
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot rewrite column sources of `{}`", self.node)
    }
}

impl std::error::Error for RewriteError {}

/// Parse a filter string into a `FilterExpr`.
pub fn parse_filter(sql: &str) -> Result<FilterExpr, SqlError> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(sql)
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(SqlError::Parse(format!(
            "unexpected trailing input at {}",
            next.token
        )));
    }
    Ok(FilterExpr::from_sql(&expr))
}

impl FilterExpr {
    pub fn column(name: impl Into<String>) -> Self {
        FilterExpr::Column(ColumnRef::new(name))
    }

    pub fn string(value: impl Into<String>) -> Self {
        FilterExpr::Literal(Literal::String(value.into()))
    }

    pub fn number(value: impl ToString) -> Self {
        FilterExpr::Literal(Literal::Number(value.to_string()))
    }

    pub fn binary(left: FilterExpr, op: BinaryOp, right: FilterExpr) -> Self {
        FilterExpr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::binary(left, BinaryOp::Eq, right)
    }

    pub fn and(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::Logical {
            left: Box::new(left),
            op: LogicalOp::And,
            right: Box::new(right),
        }
    }

    pub fn or(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::Logical {
            left: Box::new(left),
            op: LogicalOp::Or,
            right: Box::new(right),
        }
    }

    /// Convert a sqlparser expression. Never fails: unknown shapes become
    /// `Unsupported`.
    pub fn from_sql(expr: &Expr) -> Self {
        let unsupported = || FilterExpr::Unsupported(Box::new(expr.clone()));
        match expr {
            Expr::Identifier(ident) => {
                FilterExpr::Column(ColumnRef::from_idents(std::slice::from_ref(ident)))
            }
            Expr::CompoundIdentifier(parts) => FilterExpr::Column(ColumnRef::from_idents(parts)),
            Expr::Value(val) => match val {
                Value::Number(n, _) => FilterExpr::Literal(Literal::Number(n.clone())),
                Value::SingleQuotedString(s) => FilterExpr::Literal(Literal::String(s.clone())),
                Value::Boolean(b) => FilterExpr::Literal(Literal::Boolean(*b)),
                Value::Null => FilterExpr::Literal(Literal::Null),
                _ => unsupported(),
            },
            Expr::Nested(inner) => FilterExpr::from_sql(inner),
            Expr::BinaryOp { left, op, right } => {
                let (l, r) = (
                    Box::new(FilterExpr::from_sql(left)),
                    Box::new(FilterExpr::from_sql(right)),
                );
                let op = match op {
                    BinaryOperator::And => {
                        return FilterExpr::Logical {
                            left: l,
                            op: LogicalOp::And,
                            right: r,
                        }
                    }
                    BinaryOperator::Or => {
                        return FilterExpr::Logical {
                            left: l,
                            op: LogicalOp::Or,
                            right: r,
                        }
                    }
                    BinaryOperator::Eq => BinaryOp::Eq,
                    BinaryOperator::NotEq => BinaryOp::NotEq,
                    BinaryOperator::Lt => BinaryOp::Lt,
                    BinaryOperator::LtEq => BinaryOp::LtEq,
                    BinaryOperator::Gt => BinaryOp::Gt,
                    BinaryOperator::GtEq => BinaryOp::GtEq,
                    BinaryOperator::Plus => BinaryOp::Plus,
                    BinaryOperator::Minus => BinaryOp::Minus,
                    BinaryOperator::Multiply => BinaryOp::Multiply,
                    BinaryOperator::Divide => BinaryOp::Divide,
                    BinaryOperator::Modulo => BinaryOp::Modulo,
                    BinaryOperator::StringConcat => BinaryOp::Concat,
                    _ => return unsupported(),
                };
                FilterExpr::Binary {
                    left: l,
                    op,
                    right: r,
                }
            }
            Expr::UnaryOp { op, expr: inner } => {
                let op = match op {
                    UnaryOperator::Not => UnaryOp::Not,
                    UnaryOperator::Minus => UnaryOp::Minus,
                    UnaryOperator::Plus => UnaryOp::Plus,
                    _ => return unsupported(),
                };
                FilterExpr::Unary {
                    op,
                    expr: Box::new(FilterExpr::from_sql(inner)),
                }
            }
            Expr::IsNull(inner) => FilterExpr::IsNull {
                expr: Box::new(FilterExpr::from_sql(inner)),
                negated: false,
            },
            Expr::IsNotNull(inner) => FilterExpr::IsNull {
                expr: Box::new(FilterExpr::from_sql(inner)),
                negated: true,
            },
            Expr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => FilterExpr::Between {
                expr: Box::new(FilterExpr::from_sql(inner)),
                low: Box::new(FilterExpr::from_sql(low)),
                high: Box::new(FilterExpr::from_sql(high)),
                negated: *negated,
            },
            Expr::InList {
                expr: inner,
                list,
                negated,
            } => FilterExpr::InList {
                expr: Box::new(FilterExpr::from_sql(inner)),
                list: list.iter().map(FilterExpr::from_sql).collect(),
                negated: *negated,
            },
            Expr::Like {
                negated,
                expr: inner,
                pattern,
                escape_char,
                ..
            } if escape_char.is_none() => FilterExpr::Like {
                expr: Box::new(FilterExpr::from_sql(inner)),
                pattern: Box::new(FilterExpr::from_sql(pattern)),
                negated: *negated,
                case_insensitive: false,
            },
            Expr::ILike {
                negated,
                expr: inner,
                pattern,
                escape_char,
                ..
            } if escape_char.is_none() => FilterExpr::Like {
                expr: Box::new(FilterExpr::from_sql(inner)),
                pattern: Box::new(FilterExpr::from_sql(pattern)),
                negated: *negated,
                case_insensitive: true,
            },
            Expr::Cast {
                expr: inner,
                data_type,
                kind,
                ..
            } if matches!(kind, CastKind::Cast | CastKind::DoubleColon) => FilterExpr::Cast {
                expr: Box::new(FilterExpr::from_sql(inner)),
                data_type: data_type.to_string(),
            },
            Expr::Function(func) => match plain_function_args(func) {
                Some(args) => FilterExpr::Function {
                    name: func.name.to_string(),
                    args: args.into_iter().map(FilterExpr::from_sql).collect(),
                },
                None => unsupported(),
            },
            _ => unsupported(),
        }
    }

    /// True if any column reference in the tree is exactly `name`.
    pub fn references_column(&self, name: &str) -> bool {
        let mut found = false;
        self.walk_columns(&mut |column| found |= column == name);
        found
    }

    /// Distinct column names, in order of first reference.
    pub fn columns(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.walk_columns(&mut |column| {
            if !names.iter().any(|n| n == column) {
                names.push(column.to_string());
            }
        });
        names
    }

    /// Render the filter, qualifying each column for which `resolve` returns
    /// a table qualifier. Unqualified columns are emitted unchanged.
    pub fn rewrite_column_sources<F>(&self, mut resolve: F) -> Result<String, RewriteError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        self.write_sql(&mut out, &mut resolve, false)?;
        Ok(out)
    }

    fn walk_columns(&self, f: &mut dyn FnMut(&str)) {
        match self {
            FilterExpr::Column(column) => f(column.name()),
            FilterExpr::Literal(_) => {}
            FilterExpr::Unary { expr, .. }
            | FilterExpr::IsNull { expr, .. }
            | FilterExpr::Cast { expr, .. } => expr.walk_columns(f),
            FilterExpr::Binary { left, right, .. } | FilterExpr::Logical { left, right, .. } => {
                left.walk_columns(f);
                right.walk_columns(f);
            }
            FilterExpr::InList { expr, list, .. } => {
                expr.walk_columns(f);
                list.iter().for_each(|item| item.walk_columns(f));
            }
            FilterExpr::Between {
                expr, low, high, ..
            } => {
                expr.walk_columns(f);
                low.walk_columns(f);
                high.walk_columns(f);
            }
            FilterExpr::Like { expr, pattern, .. } => {
                expr.walk_columns(f);
                pattern.walk_columns(f);
            }
            FilterExpr::Function { args, .. } => args.iter().for_each(|arg| arg.walk_columns(f)),
            FilterExpr::Unsupported(expr) => {
                let _ = visit_expressions(expr.as_ref(), |e| {
                    match e {
                        Expr::Identifier(ident) => f(ident.value.as_str()),
                        Expr::CompoundIdentifier(parts) => {
                            let name = parts
                                .iter()
                                .map(|p| p.value.as_str())
                                .collect::<Vec<_>>()
                                .join(".");
                            f(name.as_str())
                        }
                        _ => {}
                    }
                    ControlFlow::<()>::Continue(())
                });
            }
        }
    }

    // Binding strength used to decide where parentheses are required.
    fn precedence(&self) -> u8 {
        match self {
            FilterExpr::Logical {
                op: LogicalOp::Or, ..
            } => 1,
            FilterExpr::Logical {
                op: LogicalOp::And,
                ..
            } => 2,
            FilterExpr::Unary {
                op: UnaryOp::Not, ..
            } => 3,
            FilterExpr::IsNull { .. }
            | FilterExpr::InList { .. }
            | FilterExpr::Between { .. }
            | FilterExpr::Like { .. } => 4,
            FilterExpr::Binary { op, .. } => op.precedence(),
            FilterExpr::Unary { .. } => 8,
            FilterExpr::Unsupported(_) => 0,
            FilterExpr::Column(_)
            | FilterExpr::Literal(_)
            | FilterExpr::Cast { .. }
            | FilterExpr::Function { .. } => 9,
        }
    }

    fn write_child(
        &self,
        out: &mut String,
        min_precedence: u8,
        resolve: &mut dyn FnMut(&str) -> Option<String>,
        verbatim: bool,
    ) -> Result<(), RewriteError> {
        if self.precedence() < min_precedence {
            out.push('(');
            self.write_sql(out, resolve, verbatim)?;
            out.push(')');
            Ok(())
        } else {
            self.write_sql(out, resolve, verbatim)
        }
    }

    fn write_sql(
        &self,
        out: &mut String,
        resolve: &mut dyn FnMut(&str) -> Option<String>,
        verbatim: bool,
    ) -> Result<(), RewriteError> {
        const OPERAND: u8 = 5;
        match self {
            FilterExpr::Column(column) => {
                if let Some(qualifier) = resolve(column.name()) {
                    out.push_str(&qualifier);
                    out.push('.');
                }
                out.push_str(column.sql());
            }
            FilterExpr::Literal(lit) => out.push_str(&lit.to_string()),
            FilterExpr::Unary { op, expr } => {
                let mut operand = String::new();
                expr.write_child(&mut operand, self.precedence(), resolve, verbatim)?;
                out.push_str(match op {
                    UnaryOp::Not => "NOT ",
                    UnaryOp::Minus => "-",
                    UnaryOp::Plus => "+",
                });
                // `--` opens a line comment.
                if *op != UnaryOp::Not && operand.starts_with(|c: char| c == '-' || c == '+') {
                    out.push('(');
                    out.push_str(&operand);
                    out.push(')');
                } else {
                    out.push_str(&operand);
                }
            }
            FilterExpr::Binary { left, op, right } => {
                let prec = op.precedence();
                left.write_child(out, prec, resolve, verbatim)?;
                out.push(' ');
                out.push_str(op.as_sql());
                out.push(' ');
                right.write_child(out, prec + 1, resolve, verbatim)?;
            }
            FilterExpr::Logical { left, op, right } => {
                let prec = self.precedence();
                left.write_child(out, prec, resolve, verbatim)?;
                out.push_str(match op {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                });
                right.write_child(out, prec, resolve, verbatim)?;
            }
            FilterExpr::IsNull { expr, negated } => {
                expr.write_child(out, OPERAND, resolve, verbatim)?;
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            FilterExpr::InList {
                expr,
                list,
                negated,
            } => {
                expr.write_child(out, OPERAND, resolve, verbatim)?;
                out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_sql(out, resolve, verbatim)?;
                }
                out.push(')');
            }
            FilterExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                expr.write_child(out, OPERAND, resolve, verbatim)?;
                out.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                low.write_child(out, OPERAND, resolve, verbatim)?;
                out.push_str(" AND ");
                high.write_child(out, OPERAND, resolve, verbatim)?;
            }
            FilterExpr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                expr.write_child(out, OPERAND, resolve, verbatim)?;
                out.push_str(match (*negated, *case_insensitive) {
                    (false, false) => " LIKE ",
                    (true, false) => " NOT LIKE ",
                    (false, true) => " ILIKE ",
                    (true, true) => " NOT ILIKE ",
                });
                pattern.write_child(out, OPERAND, resolve, verbatim)?;
            }
            FilterExpr::Cast { expr, data_type } => {
                out.push_str("cast(");
                expr.write_sql(out, resolve, verbatim)?;
                out.push_str(" AS ");
                out.push_str(data_type);
                out.push(')');
            }
            FilterExpr::Function { name, args } => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.write_sql(out, resolve, verbatim)?;
                }
                out.push(')');
            }
            FilterExpr::Unsupported(expr) => {
                if !verbatim {
                    return Err(RewriteError {
                        node: expr.to_string(),
                    });
                }
                out.push_str(&expr.to_string());
            }
        }
        Ok(())
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_sql(&mut out, &mut |_| None, true)
            .map_err(|_| fmt::Error)?;
        f.write_str(&out)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => f.write_str(n),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Boolean(true) => f.write_str("true"),
            Literal::Boolean(false) => f.write_str("false"),
            Literal::Null => f.write_str("NULL"),
        }
    }
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => 4,
            BinaryOp::Concat => 5,
            BinaryOp::Plus | BinaryOp::Minus => 6,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 7,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Concat => "||",
        }
    }
}

/// Positional expression arguments of a plain scalar call, or `None` for
/// anything carrying DISTINCT, FILTER, OVER, named arguments or similar.
fn plain_function_args(func: &Function) -> Option<Vec<&Expr>> {
    if func.over.is_some() || func.filter.is_some() || !func.within_group.is_empty() {
        return None;
    }
    match &func.args {
        FunctionArguments::List(list) => {
            if list.duplicate_treatment.is_some() || !list.clauses.is_empty() {
                return None;
            }
            list.args
                .iter()
                .map(|arg| match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(e),
                    _ => None,
                })
                .collect()
        }
        _ => None,
    }
}
