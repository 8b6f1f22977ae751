//! SQL generation module.
//!
//! This module renders the expression tree and SELECT statements produced by
//! the dataflow renderer into multi-dialect SQL:
//!
//! - [`expr`] - SQL expression tree (rendering, rewriting, lineage)
//! - [`query`] - SELECT query builder
//! - [`bind`] - Bind parameters carried alongside SQL
//! - [`syntax`] - Parser-backed syntax checks
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod bind;
pub mod dialect;
pub mod expr;
pub mod query;
pub mod syntax;
pub mod token;

pub use bind::{SqlBindParameterValue, SqlBindParameters};
pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    SqlColumnReference, SqlColumnReplacements, SqlComparison, SqlExpr, SqlExpressionTreeLineage,
    SqlFunction, SqlPercentileFunctionType, SqlWindowFunction,
};
pub use syntax::{check_expression, check_statements, SqlSyntaxError};
pub use query::{Cte, Join, JoinType, OrderByExpr, Query, SelectColumn, TableRef, TableSource};
pub use token::{Keyword, Operator, Token, TokenStream};
