//! Expression checking and type inference.
//!
//! `None` as an inferred type means "untyped": the NULL literal, which is
//! compatible with every operand type.

use super::{Clause, Scope, Validator};
use crate::error::{QueryResult, ValidationCode, ValidationError};
use crate::soql::ast::*;
use crate::types::{FieldType, Position};

impl Validator<'_> {
    pub(crate) fn validate_expr(
        &self,
        scope: &mut Scope,
        expr: &mut Expr,
        clause: Clause,
        in_aggregate: bool,
    ) -> QueryResult<Option<FieldType>> {
        let pos = expr.pos;
        let ty = match &mut expr.kind {
            ExprKind::Field(path) => {
                let resolved = self.resolve_path(scope, path)?;
                if !in_aggregate {
                    let at = path.last().map(|i| i.pos).unwrap_or(pos);
                    self.check_capability(&resolved, clause, at)?;
                }
                Some(resolved.field.field_type)
            }
            ExprKind::Literal(lit) => literal_type(lit),
            ExprKind::DateMacro(_) => Some(FieldType::DateTime),
            ExprKind::Paren(inner) => self.validate_expr(scope, inner, clause, in_aggregate)?,
            ExprKind::Not(inner) => {
                let t = self.validate_expr(scope, inner, clause, in_aggregate)?;
                require(t, inner.pos, "NOT", |t| t == FieldType::Boolean)?;
                Some(FieldType::Boolean)
            }
            ExprKind::Negate(inner) => {
                let t = self.validate_expr(scope, inner, clause, in_aggregate)?;
                require(t, inner.pos, "unary minus", |t| t.is_numeric())?;
                t
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let lt = self.validate_expr(scope, left, clause, in_aggregate)?;
                let rt = self.validate_expr(scope, right, clause, in_aggregate)?;
                binary_type(op, lt, rt, left.pos, &**right)?
            }
            ExprKind::In { expr: lhs, list, .. } => {
                let lt = self.validate_expr(scope, lhs, clause, in_aggregate)?;
                for item in list.iter_mut() {
                    let it = self.validate_expr(scope, item, clause, in_aggregate)?;
                    require_comparable(lt, it, item.pos)?;
                }
                Some(FieldType::Boolean)
            }
            ExprKind::InSubquery { expr: lhs, subquery, .. } => {
                if clause != Clause::Where {
                    return Err(unsupported(
                        subquery.pos,
                        format!("IN subqueries are not supported in {}", clause.name()),
                    ));
                }
                let lt = self.validate_expr(scope, lhs, clause, in_aggregate)?;
                let st = self.validate_where_subquery(scope, subquery)?;
                require_comparable(lt, Some(st), subquery.pos)?;
                Some(FieldType::Boolean)
            }
            ExprKind::Like { expr: lhs, pattern, .. } => {
                let lt = self.validate_expr(scope, lhs, clause, in_aggregate)?;
                let pt = self.validate_expr(scope, pattern, clause, in_aggregate)?;
                require(lt, lhs.pos, "LIKE", |t| t.is_textual())?;
                require(pt, pattern.pos, "LIKE pattern", |t| t.is_textual())?;
                Some(FieldType::Boolean)
            }
            ExprKind::IsNull { expr: lhs, .. } => {
                self.validate_expr(scope, lhs, clause, in_aggregate)?;
                Some(FieldType::Boolean)
            }
            ExprKind::Function { name, args } => {
                self.validate_function(scope, name, args, pos, clause, in_aggregate)?
            }
        };
        expr.ty = ty;
        Ok(ty)
    }

    fn validate_function(
        &self,
        scope: &mut Scope,
        name: &str,
        args: &mut [Expr],
        pos: Position,
        clause: Clause,
        in_aggregate: bool,
    ) -> QueryResult<Option<FieldType>> {
        let upper = name.to_uppercase();
        if !is_aggregate(&upper) {
            return Err(ValidationError::new(
                ValidationCode::UnknownFunction,
                format!("Unknown function '{}'", name),
            )
            .at(Some(pos))
            .into());
        }
        if !clause.allows_aggregates() {
            return Err(unsupported(
                pos,
                format!("Aggregate functions are not allowed in {}", clause.name()),
            ));
        }
        if in_aggregate {
            return Err(unsupported(pos, "Aggregate functions cannot be nested".to_string()));
        }

        let arity_ok = match upper.as_str() {
            "COUNT" => args.len() <= 1,
            _ => args.len() == 1,
        };
        if !arity_ok {
            return Err(ValidationError::new(
                ValidationCode::TypeMismatch,
                format!("{} does not take {} arguments", upper, args.len()),
            )
            .at(Some(pos))
            .into());
        }

        let arg_type = match args.first_mut() {
            Some(arg) => self.validate_expr(scope, arg, clause, true)?,
            None => None,
        };

        match upper.as_str() {
            "COUNT" | "COUNT_DISTINCT" => Ok(Some(FieldType::Integer)),
            "SUM" | "AVG" => {
                let arg = &args[0];
                if let Some(path) = arg.as_field() {
                    if let Some(resolved) = scope.refs.get(&path_key(path)) {
                        if !resolved.field.aggregatable {
                            return Err(ValidationError::new(
                                ValidationCode::FieldNotAggregatable,
                                format!(
                                    "{}.{} cannot be aggregated with {}",
                                    resolved.object, resolved.field.name, upper
                                ),
                            )
                            .with_object(resolved.object.clone())
                            .with_field(resolved.field.name.clone())
                            .at(Some(arg.pos))
                            .into());
                        }
                    }
                }
                require(arg_type, arg.pos, &upper, |t| t.is_numeric())?;
                if upper == "AVG" {
                    Ok(Some(FieldType::Float))
                } else {
                    Ok(arg_type)
                }
            }
            // MIN / MAX
            _ => {
                require(arg_type, args[0].pos, &upper, |t| t != FieldType::Boolean)?;
                Ok(arg_type)
            }
        }
    }
}

fn literal_type(lit: &Literal) -> Option<FieldType> {
    match lit {
        Literal::Null => None,
        Literal::Bool(_) => Some(FieldType::Boolean),
        Literal::Integer(_) => Some(FieldType::Integer),
        Literal::Float(_) => Some(FieldType::Float),
        Literal::String(_) => Some(FieldType::String),
        Literal::Date(_) => Some(FieldType::Date),
        Literal::DateTime(_) => Some(FieldType::DateTime),
    }
}

fn binary_type(
    op: BinaryOp,
    lt: Option<FieldType>,
    rt: Option<FieldType>,
    left_pos: Position,
    right: &Expr,
) -> QueryResult<Option<FieldType>> {
    if op.is_logical() {
        require(lt, left_pos, op.as_sql(), |t| t == FieldType::Boolean)?;
        require(rt, right.pos, op.as_sql(), |t| t == FieldType::Boolean)?;
        return Ok(Some(FieldType::Boolean));
    }

    if op.is_comparison() {
        let ordering = !matches!(op, BinaryOp::Eq | BinaryOp::NotEq);
        if ordering && is_null_literal(right) {
            return Err(mismatch(right.pos, format!("NULL cannot be used with {}", op.as_sql())));
        }
        require_comparable(lt, rt, right.pos)?;
        return Ok(Some(FieldType::Boolean));
    }

    if op == BinaryOp::Concat {
        require(lt, left_pos, "||", |t| t.is_textual())?;
        require(rt, right.pos, "||", |t| t.is_textual())?;
        return Ok(Some(FieldType::String));
    }

    // Arithmetic
    require(lt, left_pos, op.as_sql(), |t| t.is_numeric())?;
    require(rt, right.pos, op.as_sql(), |t| t.is_numeric())?;
    let ty = match (lt, rt) {
        (Some(FieldType::Integer), Some(FieldType::Integer)) if op != BinaryOp::Div => {
            FieldType::Integer
        }
        _ => FieldType::Float,
    };
    Ok(Some(ty))
}

fn is_null_literal(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Literal(Literal::Null))
}

fn require(
    ty: Option<FieldType>,
    pos: Position,
    context: &str,
    accept: impl Fn(FieldType) -> bool,
) -> QueryResult<()> {
    match ty {
        Some(t) if !accept(t) => Err(mismatch(pos, format!("{} does not accept {} operands", context, t))),
        _ => Ok(()),
    }
}

fn require_comparable(lt: Option<FieldType>, rt: Option<FieldType>, pos: Position) -> QueryResult<()> {
    match (lt, rt) {
        (Some(a), Some(b)) if !a.comparable_with(&b) => {
            Err(mismatch(pos, format!("Cannot compare {} with {}", a, b)))
        }
        _ => Ok(()),
    }
}

fn mismatch(pos: Position, message: String) -> crate::error::QueryError {
    ValidationError::new(ValidationCode::TypeMismatch, message)
        .at(Some(pos))
        .into()
}

fn unsupported(pos: Position, message: String) -> crate::error::QueryError {
    ValidationError::new(ValidationCode::UnsupportedClause, message)
        .at(Some(pos))
        .into()
}
