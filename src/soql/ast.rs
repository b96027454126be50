//! Abstract syntax tree for object queries.
//!
//! Nodes carry the position of their first token. `Expr::ty` stays `None`
//! after parsing and is filled in by the validator.

use chrono::{DateTime, FixedOffset, NaiveDate};

use super::dates::DateMacro;
use crate::types::{FieldType, Position};

/// Aggregate functions understood by the validator and compiler.
pub const AGGREGATE_FUNCTIONS: &[&str] = &["COUNT", "COUNT_DISTINCT", "SUM", "AVG", "MIN", "MAX"];

pub fn is_aggregate(name: &str) -> bool {
    AGGREGATE_FUNCTIONS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(name))
}

/// A complete SELECT statement. Relationship and WHERE subqueries reuse the
/// same structure; the validator rejects clauses they may not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub select: Vec<SelectItem>,
    pub from: Ident,
    pub where_clause: Option<Expr>,
    pub security_enforced: bool,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub for_update: bool,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Expr { expr: Expr, alias: Option<Ident> },
    Subquery(Subquery),
    Typeof(TypeOf),
}

impl SelectItem {
    pub fn pos(&self) -> Position {
        match self {
            SelectItem::Expr { expr, .. } => expr.pos,
            SelectItem::Subquery(sub) => sub.pos,
            SelectItem::Typeof(t) => t.pos,
        }
    }
}

/// A parenthesized SELECT nested in the select list or on the right of IN.
/// `id` is unique within one parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub id: usize,
    pub query: Box<Query>,
    pub pos: Position,
}

/// `TYPEOF field WHEN Type THEN f, ... [ELSE f, ...] END`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeOf {
    pub id: usize,
    pub field: Ident,
    pub whens: Vec<TypeOfWhen>,
    pub else_fields: Vec<Ident>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeOfWhen {
    pub object: Ident,
    pub fields: Vec<Ident>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
}

impl BinaryOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::Or | BinaryOp::And)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Position,
    pub ty: Option<FieldType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Subquery,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Paren(Box<Expr>),
    /// Dot path such as `Account.Owner.Name`, one identifier per segment
    Field(Vec<Ident>),
    Literal(Literal),
    DateMacro(DateMacro),
    Function {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Position) -> Self {
        Self { kind, pos, ty: None }
    }

    /// Direct children, left to right. Subquery bodies are not children.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Binary { left, right, .. } => vec![&**left, &**right],
            ExprKind::Not(e) | ExprKind::Negate(e) | ExprKind::Paren(e) => vec![&**e],
            ExprKind::In { expr, list, .. } => {
                let mut out = vec![&**expr];
                out.extend(list.iter());
                out
            }
            ExprKind::InSubquery { expr, .. } => vec![&**expr],
            ExprKind::Like { expr, pattern, .. } => vec![&**expr, &**pattern],
            ExprKind::IsNull { expr, .. } => vec![&**expr],
            ExprKind::Function { args, .. } => args.iter().collect(),
            ExprKind::Field(_) | ExprKind::Literal(_) | ExprKind::DateMacro(_) => Vec::new(),
        }
    }

    /// Pre-order traversal. Returning `false` from `visit` skips the node's children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr) -> bool) {
        if visit(self) {
            for child in self.children() {
                child.walk(visit);
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let ExprKind::Function { name, .. } = &e.kind {
                if is_aggregate(name) {
                    found = true;
                    return false;
                }
            }
            !found
        });
        found
    }

    /// Field paths referenced outside of aggregate calls.
    pub fn bare_field_paths(&self) -> Vec<&[Ident]> {
        let mut paths = Vec::new();
        self.walk(&mut |e| match &e.kind {
            ExprKind::Function { name, .. } if is_aggregate(name) => false,
            ExprKind::Field(path) => {
                paths.push(path.as_slice());
                false
            }
            _ => true,
        });
        paths
    }

    /// Strip any number of enclosing parentheses.
    pub fn unwrap_parens(&self) -> &Expr {
        let mut current = self;
        while let ExprKind::Paren(inner) = &current.kind {
            current = inner;
        }
        current
    }

    pub fn as_field(&self) -> Option<&[Ident]> {
        match &self.kind {
            ExprKind::Field(path) => Some(path),
            _ => None,
        }
    }
}

/// Canonical lowercase key for a dot path.
pub fn path_key(path: &[Ident]) -> String {
    path.iter()
        .map(|s| s.name.to_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}
