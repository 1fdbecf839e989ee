//! SELECT query AST.
//!
//! The translator lowers a resolved criteria tree into this AST; `to_sql`
//! then renders dialect-specific text. Joins are generalized over a
//! `JoinSource`: a plain table, a derived table (optionally LATERAL), or a
//! reference to a registered common table expression.

use super::dialect::{Dialect, SqlDialect};
use super::expr::Expr;
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens_for_dialect(dialect);
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// Table Reference
// =============================================================================

/// A table reference with optional schema and alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            schema: None,
            table: table.into(),
            alias: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::QualifiedIdent {
            schema: self.schema.clone(),
            name: self.table.clone(),
        });
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Cross,
}

/// What the join brings into scope.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinSource {
    /// A plain table.
    Table(TableRef),
    /// A derived table: (SELECT ...) AS alias, optionally LATERAL.
    Derived {
        query: Box<Query>,
        alias: String,
        lateral: bool,
    },
    /// A previously registered common table expression, by name.
    Cte { name: String, alias: String },
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub source: JoinSource,
    pub on: Option<Expr>,
}

impl Join {
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        // Lateral derived tables on dialects without LATERAL use APPLY syntax,
        // which replaces the whole JOIN keyword sequence and takes no ON.
        if let JoinSource::Derived {
            query,
            alias,
            lateral: true,
        } = &self.source
        {
            if !dialect.supports_lateral() {
                ts.push(match self.join_type {
                    JoinType::Left => Token::OuterApply,
                    JoinType::Inner | JoinType::Cross => Token::CrossApply,
                });
                ts.space().lparen();
                ts.append(&query.to_tokens_for_dialect(dialect));
                ts.rparen()
                    .space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
                return ts;
            }
        }

        match self.join_type {
            JoinType::Inner => {
                ts.push(Token::Inner).space().push(Token::Join);
            }
            JoinType::Left => {
                ts.push(Token::Left).space().push(Token::Join);
            }
            JoinType::Cross => {
                ts.push(Token::Cross).space().push(Token::Join);
            }
        }
        ts.space();

        match &self.source {
            JoinSource::Table(table) => {
                ts.append(&table.to_tokens());
            }
            JoinSource::Derived {
                query,
                alias,
                lateral,
            } => {
                if *lateral {
                    ts.push(Token::Lateral).space();
                }
                ts.lparen();
                ts.append(&query.to_tokens_for_dialect(dialect));
                ts.rparen()
                    .space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
            }
            JoinSource::Cte { name, alias } => {
                ts.push(Token::Ident(name.clone()))
                    .space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
            }
        }

        // INNER/LEFT joins need an ON clause; derived joins without an
        // explicit condition get the tautology so the SQL stays valid.
        if self.join_type != JoinType::Cross {
            ts.space().push(Token::On).space();
            match &self.on {
                Some(on) => {
                    ts.append(&on.to_tokens_for_dialect(dialect));
                }
                None => {
                    ts.push(Token::LitInt(1))
                        .space()
                        .push(Token::Eq)
                        .space()
                        .push(Token::LitInt(1));
                }
            }
        }

        ts
    }
}

// =============================================================================
// ORDER BY
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// NULLS ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// An ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    pub expr: Expr,
    pub dir: Option<SortDir>,
    pub nulls: Option<NullsOrder>,
}

impl OrderByExpr {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            dir: None,
            nulls: None,
        }
    }

    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            dir: Some(SortDir::Asc),
            nulls: None,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            dir: Some(SortDir::Desc),
            nulls: None,
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = Some(NullsOrder::First);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = Some(NullsOrder::Last);
        self
    }

    /// Convert to tokens for a specific dialect.
    ///
    /// Skips NULLS FIRST/LAST for dialects that don't support it.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens_for_dialect(dialect);

        if let Some(dir) = &self.dir {
            ts.space().push(match dir {
                SortDir::Asc => Token::Asc,
                SortDir::Desc => Token::Desc,
            });
        }

        if let Some(nulls) = &self.nulls {
            if dialect.supports_nulls_ordering() {
                ts.space().push(match nulls {
                    NullsOrder::First => Token::NullsFirst,
                    NullsOrder::Last => Token::NullsLast,
                });
            }
            // Dialects without NULLS ordering silently skip it.
        }

        ts
    }
}

// =============================================================================
// LIMIT / OFFSET
// =============================================================================

/// LIMIT and OFFSET clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOffset {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl LimitOffset {
    /// Convert to token stream using dialect-specific pagination.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        dialect.emit_limit_offset(self.limit, self.offset)
    }
}

// =============================================================================
// CTE (Common Table Expression)
// =============================================================================

/// A Common Table Expression (WITH clause).
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct Cte {
    pub name: String,
    pub columns: Option<Vec<String>>,
    pub query: Box<Query>,
    /// Whether this is a recursive CTE.
    pub recursive: bool,
}

impl Cte {
    pub fn new(name: &str, query: Query) -> Self {
        Self {
            name: name.into(),
            columns: None,
            query: Box::new(query),
            recursive: false,
        }
    }

    /// Create a recursive CTE.
    pub fn recursive(name: &str, query: Query) -> Self {
        Self {
            name: name.into(),
            columns: None,
            query: Box::new(query),
            recursive: true,
        }
    }

    pub fn with_columns(mut self, columns: Vec<&str>) -> Self {
        self.columns = Some(columns.into_iter().map(String::from).collect());
        self
    }

    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.name.clone()));

        if let Some(cols) = &self.columns {
            ts.space().lparen();
            for (i, col) in cols.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.push(Token::Ident(col.clone()));
            }
            ts.rparen();
        }

        ts.space()
            .push(Token::As)
            .space()
            .lparen()
            .newline()
            .append(&self.query.to_tokens_for_dialect(dialect))
            .newline()
            .rparen();

        ts
    }
}

// =============================================================================
// Query
// =============================================================================

/// A SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql() or to_tokens()"]
pub struct Query {
    pub with: Vec<Cte>,
    pub select: Vec<SelectExpr>,
    pub distinct: bool,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit_offset: Option<LimitOffset>,
}

impl Query {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a CTE (WITH clause).
    pub fn with_cte(mut self, cte: Cte) -> Self {
        self.with.push(cte);
        self
    }

    /// Set the SELECT list.
    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    /// SELECT *
    pub fn select_star(mut self) -> Self {
        self.select = vec![SelectExpr::new(super::expr::star())];
        self
    }

    /// Add DISTINCT.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Set the FROM table.
    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    /// Add a JOIN with an arbitrary source.
    pub fn join_source(mut self, join_type: JoinType, source: JoinSource, on: Option<Expr>) -> Self {
        self.joins.push(Join {
            join_type,
            source,
            on,
        });
        self
    }

    /// Add an INNER JOIN to a table.
    pub fn inner_join(self, table: TableRef, on: Expr) -> Self {
        self.join_source(JoinType::Inner, JoinSource::Table(table), Some(on))
    }

    /// Add a LEFT JOIN to a table.
    pub fn left_join(self, table: TableRef, on: Expr) -> Self {
        self.join_source(JoinType::Left, JoinSource::Table(table), Some(on))
    }

    /// Add a CROSS JOIN to a table.
    pub fn cross_join(self, table: TableRef) -> Self {
        self.join_source(JoinType::Cross, JoinSource::Table(table), None)
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, condition: Expr) -> Self {
        use super::expr::ExprExt;
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// Set the ORDER BY clause.
    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, limit: u64) -> Self {
        match &mut self.limit_offset {
            Some(lo) => lo.limit = Some(limit),
            None => {
                self.limit_offset = Some(LimitOffset {
                    limit: Some(limit),
                    offset: None,
                })
            }
        }
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, offset: u64) -> Self {
        match &mut self.limit_offset {
            Some(lo) => lo.offset = Some(offset),
            None => {
                self.limit_offset = Some(LimitOffset {
                    limit: None,
                    offset: Some(offset),
                })
            }
        }
        self
    }

    /// Convert to token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        // WITH clause
        if !self.with.is_empty() {
            ts.push(Token::With);

            let has_recursive = self.with.iter().any(|cte| cte.recursive);
            if has_recursive && dialect.emit_recursive_keyword() {
                ts.space().push(Token::Recursive);
            }

            ts.space();
            for (i, cte) in self.with.iter().enumerate() {
                if i > 0 {
                    ts.comma().newline();
                }
                ts.append(&cte.to_tokens_for_dialect(dialect));
            }
            ts.newline();
        }

        // SELECT
        ts.push(Token::Select);
        if self.distinct {
            ts.space().push(Token::Distinct);
        }

        // Columns
        for (i, select_expr) in self.select.iter().enumerate() {
            if i == 0 {
                ts.newline().indent(1);
            } else {
                ts.comma().newline().indent(1);
            }
            ts.append(&select_expr.to_tokens_for_dialect(dialect));
        }

        // FROM
        if let Some(from) = &self.from {
            ts.newline().push(Token::From).space();
            ts.append(&from.to_tokens());
        }

        // JOINs
        for join in &self.joins {
            ts.newline();
            ts.append(&join.to_tokens_for_dialect(dialect));
        }

        // WHERE
        if let Some(where_clause) = &self.where_clause {
            ts.newline().push(Token::Where).space();
            ts.append(&where_clause.to_tokens_for_dialect(dialect));
        }

        // ORDER BY
        // T-SQL requires ORDER BY for OFFSET FETCH; emit ORDER BY (SELECT NULL)
        // as a syntactically valid placeholder when pagination is requested
        // without an explicit ordering.
        let needs_order_by_placeholder = dialect.requires_order_by_for_offset()
            && self.order_by.is_empty()
            && self.limit_offset.is_some();

        if !self.order_by.is_empty() {
            ts.newline().push(Token::OrderBy).space();
            for (i, order_expr) in self.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&order_expr.to_tokens_for_dialect(dialect));
            }
        } else if needs_order_by_placeholder {
            ts.newline()
                .push(Token::OrderBy)
                .space()
                .lparen()
                .push(Token::Select)
                .space()
                .push(Token::Null)
                .rparen();
        }

        // LIMIT / OFFSET
        if let Some(lo) = &self.limit_offset {
            ts.newline();
            ts.append(&lo.to_tokens(dialect));
        }

        ts
    }

    /// Generate SQL string for a specific dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens_for_dialect(dialect).serialize(dialect)
    }
}

// =============================================================================
// Tests
// =============================================================================
