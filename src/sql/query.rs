//! Query builder - construct SELECT statements with a fluent API.
//!
//! Sources are either physical tables or nested subqueries, which is how the
//! dataflow renderer layers model reads, joins and aggregations.

use super::dialect::{Dialect, SqlDialect};
use super::expr::{and_all, SqlExpr};
use super::token::{Keyword, Token, TokenStream};

// =============================================================================
// Select Column
// =============================================================================

/// A SELECT list item: expression with an alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectColumn {
    pub expr: SqlExpr,
    pub alias: String,
}

impl SelectColumn {
    pub fn new(expr: SqlExpr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: alias.into(),
        }
    }

    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens_for_dialect(dialect);
        let bare_column = matches!(
            &self.expr,
            SqlExpr::ColumnReference(c) if c.column_name == self.alias
        );
        if !bare_column {
            ts.space()
                .push(Keyword::As)
                .space()
                .push(Token::Ident(self.alias.clone()));
        }
        ts
    }
}

// =============================================================================
// Table Sources
// =============================================================================

/// A physical table reference, `db.schema.table` or any suffix of it.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub parts: Vec<String>,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            parts: vec![table.into()],
        }
    }

    /// Parse a dotted relation name such as `main.fct_bookings`.
    pub fn from_dotted(name: &str) -> Self {
        Self {
            parts: name.split('.').map(str::to_string).collect(),
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        match self.parts.as_slice() {
            [single] => TokenStream::from(Token::Ident(single.clone())),
            parts => TokenStream::from(Token::QualifiedIdent(parts.to_vec())),
        }
    }
}

/// Something a query can select from.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Table(TableRef),
    /// A CTE defined in an enclosing WITH clause.
    Cte(String),
    Subquery(Box<Query>),
}

impl TableSource {
    pub fn to_tokens_for_dialect(&self, dialect: Dialect, indent: usize) -> TokenStream {
        match self {
            TableSource::Table(t) => t.to_tokens(),
            TableSource::Cte(name) => TokenStream::from(Token::Ident(name.clone())),
            TableSource::Subquery(q) => {
                let mut ts = TokenStream::new();
                ts.lparen()
                    .append(&q.to_tokens_indented(dialect, indent + 1))
                    .newline()
                    .indent(indent)
                    .rparen();
                ts
            }
        }
    }
}

/// A source bound to an alias.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasedSource {
    pub source: TableSource,
    pub alias: String,
}

impl AliasedSource {
    pub fn new(source: TableSource, alias: impl Into<String>) -> Self {
        Self {
            source,
            alias: alias.into(),
        }
    }

    fn to_tokens_for_dialect(&self, dialect: Dialect, indent: usize) -> TokenStream {
        let mut ts = self.source.to_tokens_for_dialect(dialect, indent);
        ts.space()
            .push(Keyword::As)
            .space()
            .push(Token::Ident(self.alias.clone()));
        ts
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    FullOuter,
    Cross,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub right: AliasedSource,
    pub on: Option<SqlExpr>,
}

impl Join {
    fn to_tokens_for_dialect(&self, dialect: Dialect, indent: usize) -> TokenStream {
        let mut ts = TokenStream::new();

        match self.join_type {
            JoinType::Inner => ts.push(Keyword::Inner),
            JoinType::Left => ts.push(Keyword::Left),
            JoinType::FullOuter => ts.push(Keyword::Full).space().push(Keyword::Outer),
            JoinType::Cross => ts.push(Keyword::Cross),
        };

        ts.space().push(Keyword::Join).space();
        ts.append(&self.right.to_tokens_for_dialect(dialect, indent));

        if let Some(on) = &self.on {
            ts.newline()
                .indent(indent + 1)
                .push(Keyword::On)
                .space()
                .append(&on.to_tokens_for_dialect(dialect));
        }

        ts
    }
}

// =============================================================================
// ORDER BY
// =============================================================================

/// An ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    pub expr: SqlExpr,
    pub descending: bool,
}

impl OrderByExpr {
    pub fn asc(expr: SqlExpr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }

    pub fn desc(expr: SqlExpr) -> Self {
        Self {
            expr,
            descending: true,
        }
    }

    fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens_for_dialect(dialect);
        if self.descending {
            ts.space().push(Keyword::Desc);
        }
        ts
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
    pub query: Box<Query>,
}

impl Cte {
    pub fn new(name: impl Into<String>, query: Query) -> Self {
        Self {
            name: name.into(),
            query: Box::new(query),
        }
    }

    fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.name.clone()))
            .space()
            .push(Keyword::As)
            .space()
            .lparen()
            .append(&self.query.to_tokens_indented(dialect, 1))
            .newline()
            .rparen();
        ts
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// A SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql()"]
pub struct Query {
    pub with: Vec<Cte>,
    pub select: Vec<SelectColumn>,
    pub distinct: bool,
    pub from: Option<AliasedSource>,
    pub joins: Vec<Join>,
    pub where_clause: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a CTE (WITH clause).
    pub fn with_cte(mut self, cte: Cte) -> Self {
        self.with.push(cte);
        self
    }

    pub fn select(mut self, columns: Vec<SelectColumn>) -> Self {
        self.select = columns;
        self
    }

    pub fn select_column(mut self, column: SelectColumn) -> Self {
        self.select.push(column);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn from(mut self, source: TableSource, alias: impl Into<String>) -> Self {
        self.from = Some(AliasedSource::new(source, alias));
        self
    }

    pub fn join(
        mut self,
        join_type: JoinType,
        source: TableSource,
        alias: impl Into<String>,
        on: Option<SqlExpr>,
    ) -> Self {
        self.joins.push(Join {
            join_type,
            right: AliasedSource::new(source, alias),
            on,
        });
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, condition: SqlExpr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => and_all(vec![existing, condition]),
            None => condition,
        });
        self
    }

    pub fn group_by(mut self, exprs: Vec<SqlExpr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Alias of the FROM source, if any.
    pub fn from_alias(&self) -> Option<&str> {
        self.from.as_ref().map(|f| f.alias.as_str())
    }

    /// Output column names, in SELECT order.
    pub fn column_names(&self) -> Vec<&str> {
        self.select.iter().map(|c| c.alias.as_str()).collect()
    }

    /// Convert to token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        self.to_tokens_indented(dialect, 0)
    }

    fn to_tokens_indented(&self, dialect: Dialect, indent: usize) -> TokenStream {
        let mut ts = TokenStream::new();
        if indent > 0 {
            ts.newline().indent(indent);
        }

        // WITH clause
        if !self.with.is_empty() {
            ts.push(Keyword::With).space();
            for (i, cte) in self.with.iter().enumerate() {
                if i > 0 {
                    ts.comma().newline().indent(indent);
                }
                ts.append(&cte.to_tokens_for_dialect(dialect));
            }
            ts.newline().indent(indent);
        }

        // SELECT
        ts.push(Keyword::Select);
        if self.distinct {
            ts.space().push(Keyword::Distinct);
        }

        for (i, column) in self.select.iter().enumerate() {
            if i > 0 {
                ts.comma();
            }
            ts.newline()
                .indent(indent + 1)
                .append(&column.to_tokens_for_dialect(dialect));
        }

        // FROM
        if let Some(from) = &self.from {
            ts.newline()
                .indent(indent)
                .push(Keyword::From)
                .space()
                .append(&from.to_tokens_for_dialect(dialect, indent));
        }

        // JOINs
        for join in &self.joins {
            ts.newline()
                .indent(indent)
                .append(&join.to_tokens_for_dialect(dialect, indent));
        }

        // WHERE
        if let Some(where_clause) = &self.where_clause {
            ts.newline()
                .indent(indent)
                .push(Keyword::Where)
                .space()
                .append(&where_clause.to_tokens_for_dialect(dialect));
        }

        // GROUP BY
        if !self.group_by.is_empty() {
            ts.newline().indent(indent).push(Keyword::GroupBy);
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma();
                }
                ts.newline()
                    .indent(indent + 1)
                    .append(&expr.to_tokens_for_dialect(dialect));
            }
        }

        // ORDER BY
        if !self.order_by.is_empty() {
            ts.newline().indent(indent).push(Keyword::OrderBy).space();
            for (i, order_expr) in self.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&order_expr.to_tokens_for_dialect(dialect));
            }
        }

        // LIMIT
        if let Some(limit) = self.limit {
            ts.newline()
                .indent(indent)
                .append(&dialect.emit_limit(limit));
        }

        ts
    }

    /// Generate SQL string for a specific dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens_for_dialect(dialect).serialize(dialect)
    }
}

impl std::fmt::Display for Query {
    /// Formats the query using the default dialect (DuckDB).
    ///
    /// For dialect-specific SQL, use [`Query::to_sql`] instead.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql(Dialect::default()))
    }
}

// =============================================================================
// Tests
// =============================================================================
