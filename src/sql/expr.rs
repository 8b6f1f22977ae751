//! SQL expression tree - the intermediate representation for rendering.
//!
//! `SqlExpr` is a closed set of immutable expression kinds. Every operation
//! (rendering, rewriting, lineage, structural matching) is an exhaustive
//! `match`, so adding a kind forces each of them to be revisited.

use std::collections::HashMap;

use super::bind::SqlBindParameters;
use super::dialect::{Dialect, SqlDialect};
use super::token::{Keyword, Operator, Token, TokenStream};
use crate::model::time::{DatePart, TimeGranularity};
use crate::model::AggregationType;

// =============================================================================
// Expression AST
// =============================================================================

/// A SQL scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// Opaque SQL written by a model author.
    String(SqlStringExpression),
    /// Quoted string literal.
    StringLiteral(String),
    IntegerLiteral(i64),
    ColumnReference(SqlColumnReference),
    /// Bare name from a SELECT list. Ambiguous: dialects resolve it differently.
    ColumnAliasReference(String),
    Comparison {
        left: Box<SqlExpr>,
        comparison: SqlComparison,
        right: Box<SqlExpr>,
    },
    AggregateFunction {
        function: SqlFunction,
        args: Vec<SqlExpr>,
    },
    Percentile {
        arg: Box<SqlExpr>,
        params: SqlPercentileFunctionParams,
    },
    WindowFunction {
        function: SqlWindowFunction,
        args: Vec<SqlExpr>,
        partition_by: Vec<SqlExpr>,
        order_by: Vec<SqlWindowOrderBy>,
        frame: Option<WindowFrame>,
    },
    Null,
    Logical {
        operator: SqlLogicalOperator,
        args: Vec<SqlExpr>,
    },
    IsNull(Box<SqlExpr>),
    CastToTimestamp(Box<SqlExpr>),
    DateTrunc {
        granularity: TimeGranularity,
        arg: Box<SqlExpr>,
    },
    Extract {
        date_part: DatePart,
        arg: Box<SqlExpr>,
    },
    SubtractTimeInterval {
        arg: Box<SqlExpr>,
        count: u32,
        granularity: TimeGranularity,
    },
    /// Like `SubtractTimeInterval` but adds, and the amount is an expression.
    AddTime {
        arg: Box<SqlExpr>,
        count: Box<SqlExpr>,
        granularity: TimeGranularity,
    },
    /// `numerator / denominator` with float casts and a zero guard.
    Ratio {
        numerator: Box<SqlExpr>,
        denominator: Box<SqlExpr>,
    },
    Between {
        column: Box<SqlExpr>,
        start: Box<SqlExpr>,
        end: Box<SqlExpr>,
    },
    /// Random UUID. Not deterministic.
    GenerateUuid,
    Case {
        conditions: Vec<(SqlExpr, SqlExpr)>,
        else_value: Option<Box<SqlExpr>>,
    },
    Arithmetic {
        left: Box<SqlExpr>,
        operator: SqlArithmeticOperator,
        right: Box<SqlExpr>,
    },
}

/// Opaque SQL text.
///
/// `used_columns`, when declared, must list every column the SQL reads;
/// column pruning trusts it.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStringExpression {
    pub sql: String,
    pub used_columns: Option<Vec<String>>,
    pub bind_parameters: SqlBindParameters,
    pub requires_parenthesis: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlColumnReference {
    pub table_alias: Option<String>,
    pub column_name: String,
    pub render_table_alias: bool,
}

impl SqlColumnReference {
    fn key(&self) -> (Option<&str>, &str) {
        (self.table_alias.as_deref(), self.column_name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlComparison {
    LessThan,
    GreaterThan,
    LessThanOrEquals,
    GreaterThanOrEquals,
    Equals,
}

impl SqlComparison {
    fn operator(&self) -> Operator {
        match self {
            SqlComparison::LessThan => Operator::Lt,
            SqlComparison::GreaterThan => Operator::Gt,
            SqlComparison::LessThanOrEquals => Operator::Lte,
            SqlComparison::GreaterThanOrEquals => Operator::Gte,
            SqlComparison::Equals => Operator::Eq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl SqlArithmeticOperator {
    fn operator(&self) -> Operator {
        match self {
            SqlArithmeticOperator::Add => Operator::Plus,
            SqlArithmeticOperator::Subtract => Operator::Minus,
            SqlArithmeticOperator::Multiply => Operator::Mul,
            SqlArithmeticOperator::Divide => Operator::Div,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlLogicalOperator {
    And,
    Or,
}

/// Aggregate (and a few scalar) functions the planner emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    Average,
    Count,
    CountDistinct,
    Max,
    Min,
    Sum,
    Coalesce,
    Concat,
}

impl SqlFunction {
    pub fn name(&self) -> &'static str {
        match self {
            SqlFunction::Average => "AVG",
            SqlFunction::Count | SqlFunction::CountDistinct => "COUNT",
            SqlFunction::Max => "MAX",
            SqlFunction::Min => "MIN",
            SqlFunction::Sum => "SUM",
            SqlFunction::Coalesce => "COALESCE",
            SqlFunction::Concat => "CONCAT",
        }
    }

    pub fn is_aggregate(&self) -> bool {
        match self {
            SqlFunction::Average
            | SqlFunction::Count
            | SqlFunction::CountDistinct
            | SqlFunction::Max
            | SqlFunction::Min
            | SqlFunction::Sum => true,
            SqlFunction::Coalesce | SqlFunction::Concat => false,
        }
    }

    /// Function for a measure aggregation. Percentile and median measures
    /// are rendered with `SqlExpr::Percentile` instead.
    pub fn from_aggregation_type(agg: AggregationType) -> Option<SqlFunction> {
        match agg {
            AggregationType::Sum | AggregationType::SumBoolean => Some(SqlFunction::Sum),
            AggregationType::Count => Some(SqlFunction::Count),
            AggregationType::CountDistinct => Some(SqlFunction::CountDistinct),
            AggregationType::Min => Some(SqlFunction::Min),
            AggregationType::Max => Some(SqlFunction::Max),
            AggregationType::Average => Some(SqlFunction::Average),
            AggregationType::Percentile | AggregationType::Median => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlPercentileFunctionType {
    Continuous,
    Discrete,
    ApproximateContinuous,
    ApproximateDiscrete,
}

impl SqlPercentileFunctionType {
    pub fn from_flags(use_discrete: bool, use_approximate: bool) -> Self {
        match (use_discrete, use_approximate) {
            (false, false) => SqlPercentileFunctionType::Continuous,
            (true, false) => SqlPercentileFunctionType::Discrete,
            (false, true) => SqlPercentileFunctionType::ApproximateContinuous,
            (true, true) => SqlPercentileFunctionType::ApproximateDiscrete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SqlPercentileFunctionParams {
    pub percentile: f64,
    pub function_type: SqlPercentileFunctionType,
}

// =============================================================================
// Window Function Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlWindowFunction {
    FirstValue,
    LastValue,
    Average,
    Sum,
    RowNumber,
    Lead,
}

impl SqlWindowFunction {
    pub fn name(&self) -> &'static str {
        match self {
            SqlWindowFunction::FirstValue => "FIRST_VALUE",
            SqlWindowFunction::LastValue => "LAST_VALUE",
            SqlWindowFunction::Average => "AVG",
            SqlWindowFunction::Sum => "SUM",
            SqlWindowFunction::RowNumber => "ROW_NUMBER",
            SqlWindowFunction::Lead => "LEAD",
        }
    }

    /// Whether the result is only meaningful with an ORDER BY.
    pub fn requires_ordering(&self) -> bool {
        match self {
            SqlWindowFunction::FirstValue
            | SqlWindowFunction::LastValue
            | SqlWindowFunction::RowNumber
            | SqlWindowFunction::Lead => true,
            SqlWindowFunction::Average | SqlWindowFunction::Sum => false,
        }
    }

    pub fn allows_frame_clause(&self) -> bool {
        match self {
            SqlWindowFunction::FirstValue
            | SqlWindowFunction::LastValue
            | SqlWindowFunction::Average
            | SqlWindowFunction::Sum => true,
            SqlWindowFunction::RowNumber | SqlWindowFunction::Lead => false,
        }
    }
}

/// ORDER BY expression within a window specification.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlWindowOrderBy {
    pub expr: SqlExpr,
    pub descending: bool,
}

impl SqlWindowOrderBy {
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
}

/// Window frame specification.
///
/// Examples:
/// - `ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW`
/// - `ROWS BETWEEN 6 PRECEDING AND CURRENT ROW`
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFrame {
    pub kind: WindowFrameKind,
    pub start: WindowFrameBound,
    pub end: WindowFrameBound,
}

impl WindowFrame {
    pub fn between(kind: WindowFrameKind, start: WindowFrameBound, end: WindowFrameBound) -> Self {
        Self { kind, start, end }
    }

    /// ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
    pub fn rows_to_current() -> Self {
        Self::between(
            WindowFrameKind::Rows,
            WindowFrameBound::UnboundedPreceding,
            WindowFrameBound::CurrentRow,
        )
    }

    /// ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING (entire partition)
    pub fn rows_entire_partition() -> Self {
        Self::between(
            WindowFrameKind::Rows,
            WindowFrameBound::UnboundedPreceding,
            WindowFrameBound::UnboundedFollowing,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFrameKind {
    Rows,
    Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowFrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

// =============================================================================
// Rewriting
// =============================================================================

/// Replacement expressions keyed by the column reference they stand in for.
#[derive(Debug, Clone, Default)]
pub struct SqlColumnReplacements {
    replacements: HashMap<(Option<String>, String), SqlExpr>,
}

impl SqlColumnReplacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table_alias: Option<&str>, column_name: &str, replacement: SqlExpr) {
        self.replacements.insert(
            (table_alias.map(str::to_string), column_name.to_string()),
            replacement,
        );
    }

    pub fn get(&self, column: &SqlColumnReference) -> Option<&SqlExpr> {
        let (alias, name) = column.key();
        self.replacements
            .get(&(alias.map(str::to_string), name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}

// =============================================================================
// Lineage
// =============================================================================

/// Notable sub-expressions reachable from a node (the node included).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlExpressionTreeLineage {
    pub string_exprs: Vec<SqlExpr>,
    pub function_exprs: Vec<SqlExpr>,
    pub column_reference_exprs: Vec<SqlExpr>,
    pub column_alias_reference_exprs: Vec<SqlExpr>,
}

impl SqlExpressionTreeLineage {
    pub fn combine(lineages: impl IntoIterator<Item = SqlExpressionTreeLineage>) -> Self {
        let mut combined = Self::default();
        for lineage in lineages {
            combined.string_exprs.extend(lineage.string_exprs);
            combined.function_exprs.extend(lineage.function_exprs);
            combined
                .column_reference_exprs
                .extend(lineage.column_reference_exprs);
            combined
                .column_alias_reference_exprs
                .extend(lineage.column_alias_reference_exprs);
        }
        combined
    }

    pub fn contains_string_exprs(&self) -> bool {
        !self.string_exprs.is_empty()
    }

    pub fn contains_ambiguous_exprs(&self) -> bool {
        !self.column_alias_reference_exprs.is_empty()
    }

    /// An expression can be inlined into an enclosing query when it holds
    /// no opaque SQL and no bare alias references.
    pub fn is_collapsible(&self) -> bool {
        !self.contains_string_exprs() && !self.contains_ambiguous_exprs()
    }
}

// =============================================================================
// Tree operations
// =============================================================================

impl SqlExpr {
    /// Whether this expression must be wrapped in parentheses when it appears
    /// as an operand of another expression.
    pub fn requires_parenthesis(&self) -> bool {
        match self {
            SqlExpr::String(s) => s.requires_parenthesis,
            SqlExpr::StringLiteral(_) => false,
            SqlExpr::IntegerLiteral(_) => false,
            SqlExpr::ColumnReference(_) => false,
            SqlExpr::ColumnAliasReference(_) => false,
            SqlExpr::Comparison { .. } => true,
            SqlExpr::AggregateFunction { .. } => false,
            SqlExpr::Percentile { .. } => false,
            SqlExpr::WindowFunction { .. } => false,
            SqlExpr::Null => false,
            SqlExpr::Logical { .. } => true,
            SqlExpr::IsNull(_) => true,
            SqlExpr::CastToTimestamp(_) => false,
            SqlExpr::DateTrunc { .. } => false,
            SqlExpr::Extract { .. } => false,
            SqlExpr::SubtractTimeInterval { .. } => true,
            SqlExpr::AddTime { .. } => true,
            SqlExpr::Ratio { .. } => true,
            SqlExpr::Between { .. } => true,
            SqlExpr::GenerateUuid => false,
            SqlExpr::Case { .. } => false,
            SqlExpr::Arithmetic { .. } => true,
        }
    }

    /// Direct child expressions, in rendering order.
    pub fn children(&self) -> Vec<&SqlExpr> {
        match self {
            SqlExpr::String(_)
            | SqlExpr::StringLiteral(_)
            | SqlExpr::IntegerLiteral(_)
            | SqlExpr::ColumnReference(_)
            | SqlExpr::ColumnAliasReference(_)
            | SqlExpr::Null
            | SqlExpr::GenerateUuid => vec![],
            SqlExpr::Comparison { left, right, .. } | SqlExpr::Arithmetic { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            SqlExpr::AggregateFunction { args, .. } | SqlExpr::Logical { args, .. } => {
                args.iter().collect()
            }
            SqlExpr::Percentile { arg, .. }
            | SqlExpr::DateTrunc { arg, .. }
            | SqlExpr::Extract { arg, .. }
            | SqlExpr::SubtractTimeInterval { arg, .. } => vec![arg.as_ref()],
            SqlExpr::IsNull(arg) | SqlExpr::CastToTimestamp(arg) => vec![arg.as_ref()],
            SqlExpr::WindowFunction {
                args,
                partition_by,
                order_by,
                ..
            } => args
                .iter()
                .chain(partition_by.iter())
                .chain(order_by.iter().map(|o| &o.expr))
                .collect(),
            SqlExpr::AddTime { arg, count, .. } => vec![arg.as_ref(), count.as_ref()],
            SqlExpr::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_ref(), denominator.as_ref()],
            SqlExpr::Between { column, start, end } => {
                vec![column.as_ref(), start.as_ref(), end.as_ref()]
            }
            SqlExpr::Case {
                conditions,
                else_value,
            } => {
                let mut children: Vec<&SqlExpr> = conditions
                    .iter()
                    .flat_map(|(when, then)| [when, then])
                    .collect();
                if let Some(e) = else_value {
                    children.push(e.as_ref());
                }
                children
            }
        }
    }

    pub fn as_column_reference(&self) -> Option<&SqlColumnReference> {
        match self {
            SqlExpr::ColumnReference(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        match self {
            SqlExpr::GenerateUuid => false,
            _ => self.children().into_iter().all(SqlExpr::is_deterministic),
        }
    }

    /// Structurally substitute column references and/or toggle whether
    /// column references render their table alias.
    ///
    /// Opaque string expressions are returned unchanged.
    pub fn rewrite(
        &self,
        column_replacements: Option<&SqlColumnReplacements>,
        should_render_table_alias: Option<bool>,
    ) -> SqlExpr {
        let rw = |e: &SqlExpr| e.rewrite(column_replacements, should_render_table_alias);
        let rw_box = |e: &SqlExpr| Box::new(rw(e));

        match self {
            SqlExpr::String(_)
            | SqlExpr::StringLiteral(_)
            | SqlExpr::IntegerLiteral(_)
            | SqlExpr::ColumnAliasReference(_)
            | SqlExpr::Null
            | SqlExpr::GenerateUuid => self.clone(),
            SqlExpr::ColumnReference(column) => {
                if let Some(replacement) = column_replacements.and_then(|r| r.get(column)) {
                    return match should_render_table_alias {
                        Some(_) => replacement.rewrite(None, should_render_table_alias),
                        None => replacement.clone(),
                    };
                }
                let mut column = column.clone();
                if let Some(render) = should_render_table_alias {
                    column.render_table_alias = render;
                }
                SqlExpr::ColumnReference(column)
            }
            SqlExpr::Comparison {
                left,
                comparison,
                right,
            } => SqlExpr::Comparison {
                left: rw_box(left),
                comparison: *comparison,
                right: rw_box(right),
            },
            SqlExpr::AggregateFunction { function, args } => SqlExpr::AggregateFunction {
                function: *function,
                args: args.iter().map(rw).collect(),
            },
            SqlExpr::Percentile { arg, params } => SqlExpr::Percentile {
                arg: rw_box(arg),
                params: *params,
            },
            SqlExpr::WindowFunction {
                function,
                args,
                partition_by,
                order_by,
                frame,
            } => SqlExpr::WindowFunction {
                function: *function,
                args: args.iter().map(rw).collect(),
                partition_by: partition_by.iter().map(rw).collect(),
                order_by: order_by
                    .iter()
                    .map(|o| SqlWindowOrderBy {
                        expr: rw(&o.expr),
                        descending: o.descending,
                    })
                    .collect(),
                frame: frame.clone(),
            },
            SqlExpr::Logical { operator, args } => SqlExpr::Logical {
                operator: *operator,
                args: args.iter().map(rw).collect(),
            },
            SqlExpr::IsNull(arg) => SqlExpr::IsNull(rw_box(arg)),
            SqlExpr::CastToTimestamp(arg) => SqlExpr::CastToTimestamp(rw_box(arg)),
            SqlExpr::DateTrunc { granularity, arg } => SqlExpr::DateTrunc {
                granularity: *granularity,
                arg: rw_box(arg),
            },
            SqlExpr::Extract { date_part, arg } => SqlExpr::Extract {
                date_part: *date_part,
                arg: rw_box(arg),
            },
            SqlExpr::SubtractTimeInterval {
                arg,
                count,
                granularity,
            } => SqlExpr::SubtractTimeInterval {
                arg: rw_box(arg),
                count: *count,
                granularity: *granularity,
            },
            SqlExpr::AddTime {
                arg,
                count,
                granularity,
            } => SqlExpr::AddTime {
                arg: rw_box(arg),
                count: rw_box(count),
                granularity: *granularity,
            },
            SqlExpr::Ratio {
                numerator,
                denominator,
            } => SqlExpr::Ratio {
                numerator: rw_box(numerator),
                denominator: rw_box(denominator),
            },
            SqlExpr::Between { column, start, end } => SqlExpr::Between {
                column: rw_box(column),
                start: rw_box(start),
                end: rw_box(end),
            },
            SqlExpr::Case {
                conditions,
                else_value,
            } => SqlExpr::Case {
                conditions: conditions
                    .iter()
                    .map(|(when, then)| (rw(when), rw(then)))
                    .collect(),
                else_value: else_value.as_ref().map(|e| rw_box(e)),
            },
            SqlExpr::Arithmetic {
                left,
                operator,
                right,
            } => SqlExpr::Arithmetic {
                left: rw_box(left),
                operator: *operator,
                right: rw_box(right),
            },
        }
    }

    /// Collect the lineage of this expression tree.
    pub fn lineage(&self) -> SqlExpressionTreeLineage {
        let mut own = SqlExpressionTreeLineage::default();
        match self {
            SqlExpr::String(_) => own.string_exprs.push(self.clone()),
            SqlExpr::ColumnReference(_) => own.column_reference_exprs.push(self.clone()),
            SqlExpr::ColumnAliasReference(_) => {
                own.column_alias_reference_exprs.push(self.clone())
            }
            SqlExpr::AggregateFunction { .. }
            | SqlExpr::Percentile { .. }
            | SqlExpr::WindowFunction { .. }
            | SqlExpr::CastToTimestamp(_)
            | SqlExpr::DateTrunc { .. }
            | SqlExpr::Extract { .. }
            | SqlExpr::SubtractTimeInterval { .. }
            | SqlExpr::AddTime { .. }
            | SqlExpr::Ratio { .. }
            | SqlExpr::GenerateUuid => own.function_exprs.push(self.clone()),
            SqlExpr::StringLiteral(_)
            | SqlExpr::IntegerLiteral(_)
            | SqlExpr::Comparison { .. }
            | SqlExpr::Null
            | SqlExpr::Logical { .. }
            | SqlExpr::IsNull(_)
            | SqlExpr::Between { .. }
            | SqlExpr::Case { .. }
            | SqlExpr::Arithmetic { .. } => {}
        }
        SqlExpressionTreeLineage::combine(
            std::iter::once(own).chain(self.children().into_iter().map(SqlExpr::lineage)),
        )
    }

    /// Structural equivalence: same kind and operator, children matching
    /// pairwise. Presentation-only settings such as whether a column renders
    /// its table alias are ignored.
    pub fn matches(&self, other: &SqlExpr) -> bool {
        let same_node = match (self, other) {
            (SqlExpr::String(a), SqlExpr::String(b)) => {
                a.sql == b.sql && a.used_columns == b.used_columns
            }
            (SqlExpr::StringLiteral(a), SqlExpr::StringLiteral(b)) => a == b,
            (SqlExpr::IntegerLiteral(a), SqlExpr::IntegerLiteral(b)) => a == b,
            (SqlExpr::ColumnReference(a), SqlExpr::ColumnReference(b)) => a.key() == b.key(),
            (SqlExpr::ColumnAliasReference(a), SqlExpr::ColumnAliasReference(b)) => a == b,
            (
                SqlExpr::Comparison { comparison: a, .. },
                SqlExpr::Comparison { comparison: b, .. },
            ) => a == b,
            (
                SqlExpr::AggregateFunction { function: a, .. },
                SqlExpr::AggregateFunction { function: b, .. },
            ) => a == b,
            (SqlExpr::Percentile { params: a, .. }, SqlExpr::Percentile { params: b, .. }) => {
                a == b
            }
            (
                SqlExpr::WindowFunction {
                    function: fa,
                    order_by: oa,
                    frame: wa,
                    ..
                },
                SqlExpr::WindowFunction {
                    function: fb,
                    order_by: ob,
                    frame: wb,
                    ..
                },
            ) => {
                fa == fb
                    && wa == wb
                    && oa.len() == ob.len()
                    && oa.iter().zip(ob).all(|(x, y)| x.descending == y.descending)
            }
            (SqlExpr::Null, SqlExpr::Null) => true,
            (SqlExpr::Logical { operator: a, .. }, SqlExpr::Logical { operator: b, .. }) => {
                a == b
            }
            (SqlExpr::IsNull(_), SqlExpr::IsNull(_)) => true,
            (SqlExpr::CastToTimestamp(_), SqlExpr::CastToTimestamp(_)) => true,
            (
                SqlExpr::DateTrunc { granularity: a, .. },
                SqlExpr::DateTrunc { granularity: b, .. },
            ) => a == b,
            (SqlExpr::Extract { date_part: a, .. }, SqlExpr::Extract { date_part: b, .. }) => {
                a == b
            }
            (
                SqlExpr::SubtractTimeInterval {
                    count: ca,
                    granularity: ga,
                    ..
                },
                SqlExpr::SubtractTimeInterval {
                    count: cb,
                    granularity: gb,
                    ..
                },
            ) => ca == cb && ga == gb,
            (
                SqlExpr::AddTime { granularity: a, .. },
                SqlExpr::AddTime { granularity: b, .. },
            ) => a == b,
            (SqlExpr::Ratio { .. }, SqlExpr::Ratio { .. }) => true,
            (SqlExpr::Between { .. }, SqlExpr::Between { .. }) => true,
            (SqlExpr::GenerateUuid, SqlExpr::GenerateUuid) => true,
            (
                SqlExpr::Case {
                    conditions: ca,
                    else_value: ea,
                },
                SqlExpr::Case {
                    conditions: cb,
                    else_value: eb,
                },
            ) => ca.len() == cb.len() && ea.is_some() == eb.is_some(),
            (
                SqlExpr::Arithmetic { operator: a, .. },
                SqlExpr::Arithmetic { operator: b, .. },
            ) => a == b,
            _ => false,
        };
        if !same_node {
            return false;
        }
        let (mine, theirs) = (self.children(), other.children());
        mine.len() == theirs.len() && mine.iter().zip(theirs).all(|(a, b)| a.matches(b))
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Render to a SQL string for the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens_for_dialect(dialect).serialize(dialect)
    }

    /// Convert this expression to a token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        match self {
            SqlExpr::String(s) => {
                ts.push(Token::Raw(s.sql.clone()));
            }
            SqlExpr::StringLiteral(s) => {
                ts.push(Token::LitString(s.clone()));
            }
            SqlExpr::IntegerLiteral(n) => {
                ts.push(Token::LitInt(*n));
            }
            SqlExpr::ColumnReference(c) => match (&c.table_alias, c.render_table_alias) {
                (Some(alias), true) => {
                    ts.push(Token::QualifiedIdent(vec![
                        alias.clone(),
                        c.column_name.clone(),
                    ]));
                }
                _ => {
                    ts.push(Token::Ident(c.column_name.clone()));
                }
            },
            SqlExpr::ColumnAliasReference(name) => {
                ts.push(Token::Ident(name.clone()));
            }
            SqlExpr::Comparison {
                left,
                comparison,
                right,
            } => {
                ts.append(&left.operand_tokens(dialect))
                    .space()
                    .push(comparison.operator())
                    .space()
                    .append(&right.operand_tokens(dialect));
            }
            SqlExpr::AggregateFunction { function, args } => {
                ts.function(function.name());
                if *function == SqlFunction::CountDistinct {
                    ts.push(Keyword::Distinct).space();
                }
                append_comma_separated(&mut ts, args, dialect);
                ts.rparen();
            }
            SqlExpr::Percentile { arg, params } => {
                ts.append(&dialect.render_percentile(
                    &arg.to_tokens_for_dialect(dialect),
                    params.percentile,
                    params.function_type,
                ));
            }
            SqlExpr::WindowFunction {
                function,
                args,
                partition_by,
                order_by,
                frame,
            } => {
                ts.function(function.name());
                append_comma_separated(&mut ts, args, dialect);
                ts.rparen().space().push(Keyword::Over).space().lparen();

                let mut need_space = false;
                if !partition_by.is_empty() {
                    ts.push(Keyword::PartitionBy).space();
                    append_comma_separated(&mut ts, partition_by, dialect);
                    need_space = true;
                }
                if !order_by.is_empty() {
                    if need_space {
                        ts.space();
                    }
                    ts.push(Keyword::OrderBy).space();
                    for (i, ob) in order_by.iter().enumerate() {
                        if i > 0 {
                            ts.comma().space();
                        }
                        ts.append(&ob.expr.to_tokens_for_dialect(dialect));
                        if ob.descending {
                            ts.space().push(Keyword::Desc);
                        }
                    }
                    need_space = true;
                }
                if let Some(f) = frame.as_ref().filter(|_| function.allows_frame_clause()) {
                    if need_space {
                        ts.space();
                    }
                    ts.push(match f.kind {
                        WindowFrameKind::Rows => Keyword::Rows,
                        WindowFrameKind::Range => Keyword::Range,
                    })
                    .space()
                    .push(Keyword::Between)
                    .space();
                    emit_frame_bound(&mut ts, &f.start);
                    ts.space().push(Keyword::And).space();
                    emit_frame_bound(&mut ts, &f.end);
                }
                ts.rparen();
            }
            SqlExpr::Null => {
                ts.push(Token::LitNull);
            }
            SqlExpr::Logical { operator, args } => {
                let op = match operator {
                    SqlLogicalOperator::And => Keyword::And,
                    SqlLogicalOperator::Or => Keyword::Or,
                };
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        ts.space().push(op).space();
                    }
                    ts.append(&arg.operand_tokens(dialect));
                }
            }
            SqlExpr::IsNull(arg) => {
                ts.append(&arg.operand_tokens(dialect))
                    .space()
                    .push(Keyword::IsNull);
            }
            SqlExpr::CastToTimestamp(arg) => {
                ts.push(Keyword::Cast)
                    .lparen()
                    .append(&arg.to_tokens_for_dialect(dialect))
                    .space()
                    .push(Keyword::As)
                    .space()
                    .push(Token::Raw(dialect.timestamp_type_name().into()))
                    .rparen();
            }
            SqlExpr::DateTrunc { granularity, arg } => {
                ts.append(
                    &dialect.render_date_trunc(*granularity, &arg.to_tokens_for_dialect(dialect)),
                );
            }
            SqlExpr::Extract { date_part, arg } => {
                ts.push(Keyword::Extract)
                    .lparen()
                    .push(Token::Word(dialect.date_part_keyword(*date_part).into()))
                    .space()
                    .push(Keyword::From)
                    .space()
                    .append(&arg.to_tokens_for_dialect(dialect))
                    .rparen();
            }
            SqlExpr::SubtractTimeInterval {
                arg,
                count,
                granularity,
            } => {
                ts.append(&dialect.render_time_shift(
                    &arg.operand_tokens(dialect),
                    &TokenStream::from(Token::LitInt(*count as i64)),
                    *granularity,
                    true,
                ));
            }
            SqlExpr::AddTime {
                arg,
                count,
                granularity,
            } => {
                ts.append(&dialect.render_time_shift(
                    &arg.operand_tokens(dialect),
                    &count.operand_tokens(dialect),
                    *granularity,
                    false,
                ));
            }
            SqlExpr::Ratio {
                numerator,
                denominator,
            } => {
                let float_type = dialect.float_type_name();
                ts.push(Keyword::Cast)
                    .lparen()
                    .append(&numerator.to_tokens_for_dialect(dialect))
                    .space()
                    .push(Keyword::As)
                    .space()
                    .push(Token::Raw(float_type.into()))
                    .rparen()
                    .space()
                    .push(Operator::Div)
                    .space()
                    .push(Keyword::Cast)
                    .lparen()
                    .function("NULLIF")
                    .append(&denominator.to_tokens_for_dialect(dialect))
                    .comma()
                    .space()
                    .push(Token::LitInt(0))
                    .rparen()
                    .space()
                    .push(Keyword::As)
                    .space()
                    .push(Token::Raw(float_type.into()))
                    .rparen();
            }
            SqlExpr::Between { column, start, end } => {
                ts.append(&column.operand_tokens(dialect))
                    .space()
                    .push(Keyword::Between)
                    .space()
                    .append(&start.operand_tokens(dialect))
                    .space()
                    .push(Keyword::And)
                    .space()
                    .append(&end.operand_tokens(dialect));
            }
            SqlExpr::GenerateUuid => {
                ts.append(&dialect.render_generate_uuid());
            }
            SqlExpr::Case {
                conditions,
                else_value,
            } => {
                ts.push(Keyword::Case);
                for (when, then) in conditions {
                    ts.space()
                        .push(Keyword::When)
                        .space()
                        .append(&when.to_tokens_for_dialect(dialect))
                        .space()
                        .push(Keyword::Then)
                        .space()
                        .append(&then.to_tokens_for_dialect(dialect));
                }
                if let Some(e) = else_value {
                    ts.space()
                        .push(Keyword::Else)
                        .space()
                        .append(&e.to_tokens_for_dialect(dialect));
                }
                ts.space().push(Keyword::End);
            }
            SqlExpr::Arithmetic {
                left,
                operator,
                right,
            } => {
                ts.append(&left.operand_tokens(dialect))
                    .space()
                    .push(operator.operator())
                    .space()
                    .append(&right.operand_tokens(dialect));
            }
        }

        ts
    }

    /// Tokens for this expression used as an operand of another expression.
    fn operand_tokens(&self, dialect: Dialect) -> TokenStream {
        let inner = self.to_tokens_for_dialect(dialect);
        if self.requires_parenthesis() {
            let mut ts = TokenStream::new();
            ts.append_parenthesized(&inner);
            ts
        } else {
            inner
        }
    }
}

fn append_comma_separated(ts: &mut TokenStream, exprs: &[SqlExpr], dialect: Dialect) {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.append(&e.to_tokens_for_dialect(dialect));
    }
}

/// Emit a window frame bound to a token stream.
fn emit_frame_bound(ts: &mut TokenStream, bound: &WindowFrameBound) {
    match bound {
        WindowFrameBound::UnboundedPreceding => {
            ts.push(Keyword::Unbounded).space().push(Keyword::Preceding);
        }
        WindowFrameBound::Preceding(n) => {
            ts.push(Token::LitInt(*n as i64))
                .space()
                .push(Keyword::Preceding);
        }
        WindowFrameBound::CurrentRow => {
            ts.push(Keyword::CurrentRow);
        }
        WindowFrameBound::Following(n) => {
            ts.push(Token::LitInt(*n as i64))
                .space()
                .push(Keyword::Following);
        }
        WindowFrameBound::UnboundedFollowing => {
            ts.push(Keyword::Unbounded).space().push(Keyword::Following);
        }
    }
}

// =============================================================================
// Expression Constructors
// =============================================================================

/// Column qualified by a table alias.
pub fn col_ref(table_alias: &str, column_name: &str) -> SqlExpr {
    SqlExpr::ColumnReference(SqlColumnReference {
        table_alias: Some(table_alias.to_string()),
        column_name: column_name.to_string(),
        render_table_alias: true,
    })
}

/// Unqualified column.
pub fn column(column_name: &str) -> SqlExpr {
    SqlExpr::ColumnReference(SqlColumnReference {
        table_alias: None,
        column_name: column_name.to_string(),
        render_table_alias: false,
    })
}

pub fn alias_ref(name: &str) -> SqlExpr {
    SqlExpr::ColumnAliasReference(name.to_string())
}

/// Opaque SQL; wrapped in parentheses when nested.
pub fn string_expr(sql: &str) -> SqlExpr {
    SqlExpr::String(SqlStringExpression {
        sql: sql.to_string(),
        used_columns: None,
        bind_parameters: SqlBindParameters::new(),
        requires_parenthesis: true,
    })
}

/// Opaque SQL known to be a single token or function call.
pub fn atomic_string_expr(sql: &str, used_columns: Option<Vec<String>>) -> SqlExpr {
    SqlExpr::String(SqlStringExpression {
        sql: sql.to_string(),
        used_columns,
        bind_parameters: SqlBindParameters::new(),
        requires_parenthesis: false,
    })
}

pub fn lit_str(s: &str) -> SqlExpr {
    SqlExpr::StringLiteral(s.to_string())
}

pub fn lit_int(n: i64) -> SqlExpr {
    SqlExpr::IntegerLiteral(n)
}

pub fn compare(left: SqlExpr, comparison: SqlComparison, right: SqlExpr) -> SqlExpr {
    SqlExpr::Comparison {
        left: Box::new(left),
        comparison,
        right: Box::new(right),
    }
}

pub fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    compare(left, SqlComparison::Equals, right)
}

pub fn arithmetic(left: SqlExpr, operator: SqlArithmeticOperator, right: SqlExpr) -> SqlExpr {
    SqlExpr::Arithmetic {
        left: Box::new(left),
        operator,
        right: Box::new(right),
    }
}

/// AND of the given conditions. A single condition is returned as-is.
pub fn and_all(mut args: Vec<SqlExpr>) -> SqlExpr {
    if args.len() == 1 {
        return args.remove(0);
    }
    SqlExpr::Logical {
        operator: SqlLogicalOperator::And,
        args,
    }
}

pub fn aggregate(function: SqlFunction, arg: SqlExpr) -> SqlExpr {
    SqlExpr::AggregateFunction {
        function,
        args: vec![arg],
    }
}

pub fn coalesce(args: Vec<SqlExpr>) -> SqlExpr {
    SqlExpr::AggregateFunction {
        function: SqlFunction::Coalesce,
        args,
    }
}

pub fn date_trunc(granularity: TimeGranularity, arg: SqlExpr) -> SqlExpr {
    SqlExpr::DateTrunc {
        granularity,
        arg: Box::new(arg),
    }
}

pub fn extract(date_part: DatePart, arg: SqlExpr) -> SqlExpr {
    SqlExpr::Extract {
        date_part,
        arg: Box::new(arg),
    }
}

pub fn subtract_interval(arg: SqlExpr, count: u32, granularity: TimeGranularity) -> SqlExpr {
    SqlExpr::SubtractTimeInterval {
        arg: Box::new(arg),
        count,
        granularity,
    }
}

pub fn add_time(arg: SqlExpr, count: SqlExpr, granularity: TimeGranularity) -> SqlExpr {
    SqlExpr::AddTime {
        arg: Box::new(arg),
        count: Box::new(count),
        granularity,
    }
}

pub fn ratio(numerator: SqlExpr, denominator: SqlExpr) -> SqlExpr {
    SqlExpr::Ratio {
        numerator: Box::new(numerator),
        denominator: Box::new(denominator),
    }
}

pub fn between(column: SqlExpr, start: SqlExpr, end: SqlExpr) -> SqlExpr {
    SqlExpr::Between {
        column: Box::new(column),
        start: Box::new(start),
        end: Box::new(end),
    }
}

/// `CASE WHEN condition THEN value ELSE NULL END`
pub fn case_when(condition: SqlExpr, value: SqlExpr) -> SqlExpr {
    SqlExpr::Case {
        conditions: vec![(condition, value)],
        else_value: Some(Box::new(SqlExpr::Null)),
    }
}

// =============================================================================
// Tests
// =============================================================================
