//! Expression AST - the core of SQL expression building.
//!
//! This module provides a strongly-typed AST for SQL expressions with
//! exhaustive pattern matching enforced by the compiler. Unlike a pure
//! analytics emitter, ORM statements are parameterized: user-supplied values
//! appear as `Expr::Param` placeholders and are carried in an ordered
//! parameter list next to the SQL text, never interpolated.

use super::dialect::{Dialect, SqlDialect};
use super::token::{Token, TokenStream};

// =============================================================================
// Expression AST
// =============================================================================

/// A SQL expression.
///
/// Every variant must be handled in `to_tokens_for_dialect()` - the compiler
/// enforces this.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference: optional_table.column
    Column {
        table: Option<String>,
        column: String,
    },

    /// Literal values
    Literal(Literal),

    /// Bound parameter placeholder, 1-based position.
    Param(usize),

    /// Binary operation: left op right
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    /// Unary operation: op expr
    UnaryOp { op: UnaryOperator, expr: Box<Expr> },

    /// Function call: name(args...)
    Function { name: String, args: Vec<Expr> },

    /// Subquery: (SELECT ...)
    Subquery(Box<crate::sql::query::Query>),

    /// IN: expr IN (values...)
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// IN subquery: expr IN (SELECT ...)
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<crate::sql::query::Query>,
        negated: bool,
    },

    /// EXISTS (SELECT ...)
    Exists {
        subquery: Box<crate::sql::query::Query>,
        negated: bool,
    },

    /// BETWEEN: expr BETWEEN low AND high
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// Wildcard: * or table.*
    Star { table: Option<String> },

    /// Parenthesized expression
    Paren(Box<Expr>),

    /// Raw SQL expression passed directly to output without escaping.
    ///
    /// # Security Warning
    ///
    /// **Never pass user input to this variant.** Raw SQL is not sanitized
    /// and can lead to SQL injection vulnerabilities. It exists for mapped
    /// generation expressions (`current_timestamp`, `nextval('seq')`) whose
    /// text is part of the trusted mapping, and for dialect-specific syntax
    /// not covered by structured expressions.
    Raw(String),
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    // Logical
    And,
    Or,
    // Arithmetic
    Plus,
    Minus,
    Mul,
    Div,
    // String
    Concat,
    Like,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

// =============================================================================
// Expression to Tokens
// =============================================================================

impl Expr {
    /// Convert this expression to a token stream (default dialect).
    pub fn to_tokens(&self) -> TokenStream {
        self.to_tokens_for_dialect(Dialect::default())
    }

    /// Convert this expression to a token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        match self {
            Expr::Column { table, column } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone()));
                    ts.push(Token::Dot);
                }
                ts.push(Token::Ident(column.clone()));
            }

            Expr::Literal(lit) => {
                ts.push(match lit {
                    Literal::Int(n) => Token::LitInt(*n),
                    Literal::Float(f) => Token::LitFloat(*f),
                    Literal::String(s) => Token::LitString(s.clone()),
                    Literal::Bool(b) => Token::LitBool(*b),
                    Literal::Null => Token::LitNull,
                });
            }

            Expr::Param(position) => {
                ts.push(Token::Placeholder(*position));
            }

            Expr::BinaryOp { left, op, right } => {
                // CONCAT as a function for dialects without the || operator
                if *op == BinaryOperator::Concat && !dialect.supports_concat_operator() {
                    ts.push(Token::FunctionName("CONCAT".into()));
                    ts.lparen();
                    ts.append(&left.to_tokens_for_dialect(dialect));
                    ts.comma().space();
                    ts.append(&right.to_tokens_for_dialect(dialect));
                    ts.rparen();
                } else {
                    ts.append(&left.to_tokens_for_dialect(dialect));
                    ts.space();
                    ts.push(binary_op_to_token(*op));
                    ts.space();
                    ts.append(&right.to_tokens_for_dialect(dialect));
                }
            }

            Expr::UnaryOp { op, expr } => {
                ts.push(match op {
                    UnaryOperator::Not => Token::Not,
                    UnaryOperator::Minus => Token::Minus,
                });
                ts.space();
                ts.append(&expr.to_tokens_for_dialect(dialect));
            }

            Expr::Function { name, args } => {
                ts.push(Token::FunctionName(name.clone()));
                ts.lparen();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.append(&arg.to_tokens_for_dialect(dialect));
                }
                ts.rparen();
            }

            Expr::Subquery(query) => {
                ts.lparen();
                ts.append(&query.to_tokens_for_dialect(dialect));
                ts.rparen();
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                // Empty IN list: "x IN ()" is invalid SQL.
                // "x IN ()" is always false, "x NOT IN ()" always true.
                if values.is_empty() {
                    ts.push(if *negated { Token::True } else { Token::False });
                } else {
                    ts.append(&expr.to_tokens_for_dialect(dialect));
                    if *negated {
                        ts.space().push(Token::Not);
                    }
                    ts.space().push(Token::In).space().lparen();
                    for (i, val) in values.iter().enumerate() {
                        if i > 0 {
                            ts.comma().space();
                        }
                        ts.append(&val.to_tokens_for_dialect(dialect));
                    }
                    ts.rparen();
                }
            }

            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                ts.append(&expr.to_tokens_for_dialect(dialect));
                if *negated {
                    ts.space().push(Token::Not);
                }
                ts.space().push(Token::In).space().lparen();
                ts.append(&subquery.to_tokens_for_dialect(dialect));
                ts.rparen();
            }

            Expr::Exists { subquery, negated } => {
                if *negated {
                    ts.push(Token::Not).space();
                }
                ts.push(Token::Exists).space().lparen();
                ts.append(&subquery.to_tokens_for_dialect(dialect));
                ts.rparen();
            }

            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                ts.append(&expr.to_tokens_for_dialect(dialect));
                if *negated {
                    ts.space().push(Token::Not);
                }
                ts.space().push(Token::Raw("BETWEEN".into())).space();
                ts.append(&low.to_tokens_for_dialect(dialect));
                ts.space().push(Token::And).space();
                ts.append(&high.to_tokens_for_dialect(dialect));
            }

            Expr::IsNull { expr, negated } => {
                ts.append(&expr.to_tokens_for_dialect(dialect));
                ts.space();
                ts.push(if *negated {
                    Token::IsNotNull
                } else {
                    Token::IsNull
                });
            }

            Expr::Star { table } => {
                if let Some(t) = table {
                    ts.push(Token::Ident(t.clone()));
                    ts.push(Token::Dot);
                }
                ts.push(Token::Star);
            }

            Expr::Paren(inner) => {
                ts.lparen();
                ts.append(&inner.to_tokens_for_dialect(dialect));
                ts.rparen();
            }

            Expr::Raw(sql) => {
                ts.push(Token::Raw(sql.clone()));
            }
        }

        ts
    }

    /// Render to SQL text for a dialect. Mostly useful in tests.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens_for_dialect(dialect).serialize(dialect)
    }
}

fn binary_op_to_token(op: BinaryOperator) -> Token {
    match op {
        BinaryOperator::Eq => Token::Eq,
        BinaryOperator::Ne => Token::Ne,
        BinaryOperator::Lt => Token::Lt,
        BinaryOperator::Gt => Token::Gt,
        BinaryOperator::Lte => Token::Lte,
        BinaryOperator::Gte => Token::Gte,
        BinaryOperator::And => Token::And,
        BinaryOperator::Or => Token::Or,
        BinaryOperator::Plus => Token::Plus,
        BinaryOperator::Minus => Token::Minus,
        BinaryOperator::Mul => Token::Mul,
        BinaryOperator::Div => Token::Div,
        BinaryOperator::Concat => Token::Concat,
        BinaryOperator::Like => Token::Like,
    }
}

// =============================================================================
// Expression Constructors
// =============================================================================

/// Create a column reference.
pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.into(),
    }
}

/// Create a qualified column reference (table.column).
pub fn table_col(table: &str, column: &str) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        column: column.into(),
    }
}

/// Create a bound parameter placeholder (1-based position).
pub fn param(position: usize) -> Expr {
    Expr::Param(position)
}

/// Create an integer literal.
pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

/// Create a float literal.
pub fn lit_float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

/// Create a string literal.
pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.into()))
}

/// Create a boolean literal.
pub fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

/// Create a NULL literal.
pub fn lit_null() -> Expr {
    Expr::Literal(Literal::Null)
}

/// Create a function call.
pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
    }
}

/// Create an unqualified wildcard: *
pub fn star() -> Expr {
    Expr::Star { table: None }
}

/// Create a qualified wildcard: table.*
pub fn table_star(table: &str) -> Expr {
    Expr::Star {
        table: Some(table.into()),
    }
}

// =============================================================================
// From conversions for ergonomic call sites
// =============================================================================

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        lit_int(n)
    }
}

impl From<f64> for Expr {
    fn from(f: f64) -> Self {
        lit_float(f)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        lit_bool(b)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        lit_str(s)
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Literal::String(s))
    }
}

// =============================================================================
// Combinator extension trait
// =============================================================================

/// Fluent combinators for building predicates.
pub trait ExprExt: Sized {
    fn into_expr(self) -> Expr;

    // Comparison operators
    fn eq(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Eq, other.into())
    }

    fn ne(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Ne, other.into())
    }

    fn gt(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Gt, other.into())
    }

    fn gte(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Gte, other.into())
    }

    fn lt(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Lt, other.into())
    }

    fn lte(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Lte, other.into())
    }

    // Logical operators
    fn and(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::And, other.into())
    }

    fn or(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Or, other.into())
    }

    fn not(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(self.into_expr()),
        }
    }

    // Arithmetic
    fn add(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Plus, other.into())
    }

    fn sub(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Minus, other.into())
    }

    // String
    fn like(self, pattern: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Like, pattern.into())
    }

    fn concat(self, other: impl Into<Expr>) -> Expr {
        binary(self.into_expr(), BinaryOperator::Concat, other.into())
    }

    // NULL tests
    fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: false,
        }
    }

    fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self.into_expr()),
            negated: true,
        }
    }

    // Membership
    fn in_list(self, values: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self.into_expr()),
            values,
            negated: false,
        }
    }

    fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Expr {
        Expr::Between {
            expr: Box::new(self.into_expr()),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    /// Wrap in parentheses (precedence control).
    fn paren(self) -> Expr {
        Expr::Paren(Box::new(self.into_expr()))
    }
}

fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

impl ExprExt for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
