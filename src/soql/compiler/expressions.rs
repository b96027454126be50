//! Expression lowering.

use super::{quote_ident, ParamValue, Params, Statement};
use crate::error::{QueryError, QueryResult};
use crate::soql::ast::*;

impl Statement<'_> {
    /// Qualified column for a resolved dot path, joining as needed.
    pub(crate) fn column(&mut self, path: &[Ident]) -> QueryResult<String> {
        let resolved = self.validated.reference(path).ok_or_else(|| {
            QueryError::Internal(format!("field {} was not resolved", path_key(path)))
        })?;
        let alias = self.joins.ensure(&resolved.joins)?;
        Ok(format!("{}.{}", alias, quote_ident(&resolved.field.column)))
    }

    pub(crate) fn expr(&mut self, params: &mut Params, expr: &Expr) -> QueryResult<String> {
        let sql = match &expr.kind {
            ExprKind::Field(path) => self.column(path)?,
            ExprKind::Literal(lit) => literal(params, lit),
            ExprKind::DateMacro(m) => params.push_date(*m),
            ExprKind::Paren(inner) => format!("({})", self.expr(params, inner)?),
            ExprKind::Not(inner) => format!("NOT {}", self.operand(params, inner)?),
            ExprKind::Negate(inner) => {
                let inner = self.operand(params, inner)?;
                if inner.starts_with('-') {
                    format!("-({})", inner)
                } else {
                    format!("-{}", inner)
                }
            }
            ExprKind::Binary { op, left, right } => self.binary(params, *op, left, right)?,
            ExprKind::In {
                expr: lhs,
                list,
                negated,
            } => {
                let lhs = self.operand(params, lhs)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    items.push(self.operand(params, item)?);
                }
                format!("{} {}IN ({})", lhs, not(*negated), items.join(", "))
            }
            ExprKind::InSubquery {
                expr: lhs,
                subquery,
                negated,
            } => {
                let lhs = self.operand(params, lhs)?;
                let sub = self.where_subquery(params, subquery)?;
                format!("{} {}IN ({})", lhs, not(*negated), sub)
            }
            ExprKind::Like {
                expr: lhs,
                pattern,
                negated,
            } => {
                let lhs = self.operand(params, lhs)?;
                let pattern = self.operand(params, pattern)?;
                format!("{} {}LIKE {}", lhs, not(*negated), pattern)
            }
            ExprKind::IsNull { expr: lhs, negated } => {
                let lhs = self.operand(params, lhs)?;
                format!("{} IS {}NULL", lhs, not(*negated))
            }
            ExprKind::Function { name, args } => self.function(params, name, args)?,
        };
        Ok(sql)
    }

    fn binary(&mut self, params: &mut Params, op: BinaryOp, left: &Expr, right: &Expr) -> QueryResult<String> {
        if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
            let negated = op == BinaryOp::NotEq;
            if is_null(right) {
                let lhs = self.operand(params, left)?;
                return Ok(format!("{} IS {}NULL", lhs, not(negated)));
            }
            if is_null(left) {
                let rhs = self.operand(params, right)?;
                return Ok(format!("{} IS {}NULL", rhs, not(negated)));
            }
        }

        let (lhs, rhs) = if op.is_logical() {
            (self.logical_operand(params, op, left)?, self.logical_operand(params, op, right)?)
        } else {
            (self.operand(params, left)?, self.operand(params, right)?)
        };
        Ok(format!("{} {} {}", lhs, op.as_sql(), rhs))
    }

    /// Operand of a non-logical operator. Compound children are
    /// parenthesized so SQL precedence cannot regroup them.
    fn operand(&mut self, params: &mut Params, expr: &Expr) -> QueryResult<String> {
        let sql = self.expr(params, expr)?;
        let compound = matches!(
            expr.kind,
            ExprKind::Binary { .. }
                | ExprKind::Not(_)
                | ExprKind::In { .. }
                | ExprKind::InSubquery { .. }
                | ExprKind::Like { .. }
                | ExprKind::IsNull { .. }
        );
        Ok(if compound { format!("({})", sql) } else { sql })
    }

    fn logical_operand(&mut self, params: &mut Params, parent: BinaryOp, expr: &Expr) -> QueryResult<String> {
        let sql = self.expr(params, expr)?;
        let mixed = matches!(&expr.kind, ExprKind::Binary { op, .. } if op.is_logical() && *op != parent);
        Ok(if mixed { format!("({})", sql) } else { sql })
    }

    fn function(&mut self, params: &mut Params, name: &str, args: &[Expr]) -> QueryResult<String> {
        let upper = name.to_uppercase();
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            rendered.push(self.expr(params, arg)?);
        }
        Ok(match (upper.as_str(), rendered.as_slice()) {
            ("COUNT", []) => "COUNT(*)".to_string(),
            ("COUNT_DISTINCT", [arg]) => format!("COUNT(DISTINCT {})", arg),
            (func, args) => format!("{}({})", func, args.join(", ")),
        })
    }
}

fn literal(params: &mut Params, lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(true) => "TRUE".to_string(),
        Literal::Bool(false) => "FALSE".to_string(),
        Literal::Integer(i) => params.push(ParamValue::Int(*i)),
        Literal::Float(f) => params.push(ParamValue::Float(*f)),
        Literal::String(s) => params.push(ParamValue::Text(s.clone())),
        Literal::Date(d) => params.push(ParamValue::Date(*d)),
        Literal::DateTime(dt) => params.push(ParamValue::Timestamp(dt.with_timezone(&chrono::Utc))),
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(expr.unwrap_parens().kind, ExprKind::Literal(Literal::Null))
}

fn not(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}
