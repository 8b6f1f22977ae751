//! Rendered SQL as a flat stream of tokens.
//!
//! Expressions and queries append tokens; only identifiers and string
//! literals depend on the dialect when the stream is serialized.

use std::fmt;

use super::dialect::{Dialect, SqlDialect};

/// Reserved words emitted by the renderer. Multi-word keywords such as
/// `GROUP BY` are a single keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Select,
    Distinct,
    From,
    Where,
    With,
    As,
    On,
    Join,
    Inner,
    Left,
    Full,
    Outer,
    Cross,
    GroupBy,
    OrderBy,
    Asc,
    Desc,
    Limit,
    And,
    Or,
    Case,
    When,
    Then,
    Else,
    End,
    Between,
    IsNull,
    Cast,
    Extract,
    Interval,
    WithinGroup,
    Over,
    PartitionBy,
    Rows,
    Range,
    Unbounded,
    Preceding,
    Following,
    CurrentRow,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Select => "SELECT",
            Keyword::Distinct => "DISTINCT",
            Keyword::From => "FROM",
            Keyword::Where => "WHERE",
            Keyword::With => "WITH",
            Keyword::As => "AS",
            Keyword::On => "ON",
            Keyword::Join => "JOIN",
            Keyword::Inner => "INNER",
            Keyword::Left => "LEFT",
            Keyword::Full => "FULL",
            Keyword::Outer => "OUTER",
            Keyword::Cross => "CROSS",
            Keyword::GroupBy => "GROUP BY",
            Keyword::OrderBy => "ORDER BY",
            Keyword::Asc => "ASC",
            Keyword::Desc => "DESC",
            Keyword::Limit => "LIMIT",
            Keyword::And => "AND",
            Keyword::Or => "OR",
            Keyword::Case => "CASE",
            Keyword::When => "WHEN",
            Keyword::Then => "THEN",
            Keyword::Else => "ELSE",
            Keyword::End => "END",
            Keyword::Between => "BETWEEN",
            Keyword::IsNull => "IS NULL",
            Keyword::Cast => "CAST",
            Keyword::Extract => "EXTRACT",
            Keyword::Interval => "INTERVAL",
            Keyword::WithinGroup => "WITHIN GROUP",
            Keyword::Over => "OVER",
            Keyword::PartitionBy => "PARTITION BY",
            Keyword::Rows => "ROWS",
            Keyword::Range => "RANGE",
            Keyword::Unbounded => "UNBOUNDED",
            Keyword::Preceding => "PRECEDING",
            Keyword::Following => "FOLLOWING",
            Keyword::CurrentRow => "CURRENT ROW",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,
    Mul,
    Div,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Lte => "<=",
            Operator::Gte => ">=",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Keyword(Keyword),
    Op(Operator),

    Comma,
    Dot,
    Star,
    LParen,
    RParen,

    Space,
    Newline,
    Indent(usize),

    /// Column, alias or CTE name.
    Ident(String),
    /// `database.schema.table`, `schema.table` or `alias.column`.
    QualifiedIdent(Vec<String>),
    LitInt(i64),
    /// Finite float literal. Non-finite values serialize as NULL.
    LitFloat(f64),
    LitString(String),
    LitNull,
    /// Unquoted argument such as a date part (`EXTRACT(year FROM ...)`,
    /// `DATEADD(day, ...)`).
    Word(String),
    /// Function name, upper-cased on output.
    FunctionName(String),
    /// SQL written by model authors (measure and dimension expressions,
    /// where filters) and fixed dialect fragments. Emitted verbatim.
    Raw(String),
}

impl Token {
    pub fn serialize(&self, dialect: Dialect) -> String {
        match self {
            Token::Keyword(keyword) => keyword.as_str().into(),
            Token::Op(op) => op.as_str().into(),

            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Star => "*".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),

            Token::Space => " ".into(),
            Token::Newline => "\n".into(),
            Token::Indent(depth) => "  ".repeat(*depth),

            Token::Ident(name) => dialect.quote_identifier(name),
            Token::QualifiedIdent(parts) => parts
                .iter()
                .map(|p| dialect.quote_identifier(p))
                .collect::<Vec<_>>()
                .join("."),
            Token::LitInt(n) => n.to_string(),
            Token::LitFloat(f) if !f.is_finite() => "NULL".into(),
            Token::LitFloat(f) => ryu::Buffer::new().format_finite(*f).to_string(),
            Token::LitString(s) => dialect.quote_string(s),
            Token::LitNull => "NULL".into(),
            Token::Word(word) => word.clone(),
            Token::FunctionName(name) => name.to_uppercase(),
            Token::Raw(sql) => sql.clone(),
        }
    }
}

impl From<Keyword> for Token {
    fn from(keyword: Keyword) -> Self {
        Token::Keyword(keyword)
    }
}

impl From<Operator> for Token {
    fn from(op: Operator) -> Self {
        Token::Op(op)
    }
}

/// Tokens of one rendered statement or fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: impl Into<Token>) -> &mut Self {
        self.tokens.push(token.into());
        self
    }

    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) -> &mut Self {
        self.tokens.extend(tokens);
        self
    }

    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn append_parenthesized(&mut self, other: &TokenStream) -> &mut Self {
        self.lparen().append(other).rparen()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn serialize(&self, dialect: Dialect) -> String {
        self.tokens.iter().map(|t| t.serialize(dialect)).collect()
    }

    /// Keyword surrounded by single spaces.
    pub fn keyword(&mut self, keyword: Keyword) -> &mut Self {
        self.space().push(keyword).space()
    }

    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }
    pub fn indent(&mut self, depth: usize) -> &mut Self {
        self.push(Token::Indent(depth))
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }

    /// Emit `NAME(`; the caller closes the parenthesis.
    pub fn function(&mut self, name: &str) -> &mut Self {
        self.push(Token::FunctionName(name.into())).lparen()
    }
}

impl From<Token> for TokenStream {
    fn from(token: Token) -> Self {
        Self {
            tokens: vec![token],
        }
    }
}
