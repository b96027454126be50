//! Operator precedence chain for expression parsing.
//!
//! Precedence (lowest to highest):
//! 1. `OR`
//! 2. `AND`
//! 3. `NOT`
//! 4. Comparison: `=`, `!=`, `<>`, `<`, `<=`, `>`, `>=`
//! 5. `[NOT] IN (list)` / `[NOT] IN (SELECT ...)`
//! 6. `[NOT] LIKE`
//! 7. `IS [NOT] NULL`
//! 8. Additive: `+`, `-`, `||`
//! 9. Multiplicative: `*`, `/`, `%`
//! 10. Unary: `-`
//! 11. Primary: literals, date macros, function calls, field paths, `( ... )`

use super::Parser;
use crate::error::QueryResult;
use crate::soql::ast::*;
use crate::soql::lexer::Token;

impl Parser {
    pub(crate) fn parse_expression(&mut self) -> QueryResult<Expr> {
        self.parse_or_expression()
    }

    fn parse_or_expression(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_and_expression()?;
        let mut links = 0;
        while matches!(self.current_token(), Token::Or) {
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_and_expression()?;
            left = binary(BinaryOp::Or, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_not_expression()?;
        let mut links = 0;
        while matches!(self.current_token(), Token::And) {
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_not_expression()?;
            left = binary(BinaryOp::And, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> QueryResult<Expr> {
        if matches!(self.current_token(), Token::Not) {
            let pos = self.current_pos();
            self.advance();
            self.descend()?;
            let operand = self.parse_not_expression()?;
            self.ascend(1);
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), pos));
        }
        self.parse_comparison_expression()
    }

    /// Comparisons do not chain: `a = b = c` is a syntax error.
    fn parse_comparison_expression(&mut self) -> QueryResult<Expr> {
        let left = self.parse_in_expression()?;
        let op = match self.current_token() {
            Token::Equal => BinaryOp::Eq,
            Token::NotEqual => BinaryOp::NotEq,
            Token::LessThan => BinaryOp::Lt,
            Token::LessThanEq => BinaryOp::LtEq,
            Token::GreaterThan => BinaryOp::Gt,
            Token::GreaterThanEq => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_in_expression()?;
        Ok(binary(op, left, right))
    }

    fn parse_in_expression(&mut self) -> QueryResult<Expr> {
        let left = self.parse_like_expression()?;

        let negated = match (self.current_token(), self.peek_token(1)) {
            (Token::In, _) => false,
            (Token::Not, Token::In) => {
                self.advance();
                true
            }
            _ => return Ok(left),
        };
        self.advance(); // IN
        let pos = left.pos;

        if matches!(self.current_token(), Token::LeftParen)
            && matches!(self.peek_token(1), Token::Select)
        {
            let subquery = self.parse_subquery()?;
            return Ok(Expr::new(
                ExprKind::InSubquery {
                    expr: Box::new(left),
                    subquery,
                    negated,
                },
                pos,
            ));
        }

        self.expect(Token::LeftParen, "'('")?;
        self.descend()?;
        let mut list = vec![self.parse_additive_expression()?];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            list.push(self.parse_additive_expression()?);
        }
        self.ascend(1);
        self.expect(Token::RightParen, "')'")?;

        Ok(Expr::new(
            ExprKind::In {
                expr: Box::new(left),
                list,
                negated,
            },
            pos,
        ))
    }

    fn parse_like_expression(&mut self) -> QueryResult<Expr> {
        let left = self.parse_is_expression()?;

        let negated = match (self.current_token(), self.peek_token(1)) {
            (Token::Like, _) => false,
            (Token::Not, Token::Like) => {
                self.advance();
                true
            }
            _ => return Ok(left),
        };
        self.advance(); // LIKE

        let pattern = self.parse_is_expression()?;
        let pos = left.pos;
        Ok(Expr::new(
            ExprKind::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            },
            pos,
        ))
    }

    fn parse_is_expression(&mut self) -> QueryResult<Expr> {
        let left = self.parse_additive_expression()?;
        if !matches!(self.current_token(), Token::Is) {
            return Ok(left);
        }
        self.advance();

        let negated = if matches!(self.current_token(), Token::Not) {
            self.advance();
            true
        } else {
            false
        };
        self.expect(Token::Null, "NULL")?;

        let pos = left.pos;
        Ok(Expr::new(
            ExprKind::IsNull {
                expr: Box::new(left),
                negated,
            },
            pos,
        ))
    }

    fn parse_additive_expression(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_multiplicative_expression()?;
        let mut links = 0;
        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                Token::Concat => BinaryOp::Concat,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_multiplicative_expression()?;
            left = binary(op, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_unary_expression()?;
        let mut links = 0;
        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_unary_expression()?;
            left = binary(op, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> QueryResult<Expr> {
        if matches!(self.current_token(), Token::Minus) {
            let pos = self.current_pos();
            self.advance();
            self.descend()?;
            let operand = self.parse_unary_expression()?;
            self.ascend(1);
            return Ok(Expr::new(ExprKind::Negate(Box::new(operand)), pos));
        }
        self.parse_primary_expression()
    }

    fn parse_primary_expression(&mut self) -> QueryResult<Expr> {
        let pos = self.current_pos();
        let kind = match self.current_token().clone() {
            Token::Integer(n) => ExprKind::Literal(Literal::Integer(n)),
            Token::Float(n) => ExprKind::Literal(Literal::Float(n)),
            Token::String(s) => ExprKind::Literal(Literal::String(s)),
            Token::True => ExprKind::Literal(Literal::Bool(true)),
            Token::False => ExprKind::Literal(Literal::Bool(false)),
            Token::Null => ExprKind::Literal(Literal::Null),
            Token::Date(d) => ExprKind::Literal(Literal::Date(d)),
            Token::DateTime(dt) => ExprKind::Literal(Literal::DateTime(dt)),
            Token::DateMacro(m) => ExprKind::DateMacro(m),
            Token::LeftParen => {
                self.advance();
                self.descend()?;
                let inner = self.parse_expression()?;
                self.ascend(1);
                self.expect(Token::RightParen, "')'")?;
                return Ok(Expr::new(ExprKind::Paren(Box::new(inner)), pos));
            }
            Token::Identifier(name) => {
                if matches!(self.peek_token(1), Token::LeftParen) {
                    return self.parse_function_call(name);
                }
                return self.parse_field_path();
            }
            _ => return Err(self.error_expected("expression")),
        };
        self.advance();
        Ok(Expr::new(kind, pos))
    }

    fn parse_function_call(&mut self, name: String) -> QueryResult<Expr> {
        let pos = self.current_pos();
        self.advance(); // name
        self.expect(Token::LeftParen, "'('")?;

        let mut args = Vec::new();
        if !matches!(self.current_token(), Token::RightParen) {
            self.descend()?;
            args.push(self.parse_expression()?);
            while matches!(self.current_token(), Token::Comma) {
                self.advance();
                args.push(self.parse_expression()?);
            }
            self.ascend(1);
        }
        self.expect(Token::RightParen, "')'")?;

        Ok(Expr::new(ExprKind::Function { name, args }, pos))
    }

    fn parse_field_path(&mut self) -> QueryResult<Expr> {
        let first = self.expect_identifier("field name")?;
        let pos = first.pos;
        let mut segments = vec![first];
        while matches!(self.current_token(), Token::Dot) {
            self.advance();
            segments.push(self.expect_identifier("field name after '.'")?);
        }
        Ok(Expr::new(ExprKind::Field(segments), pos))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let pos = left.pos;
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        pos,
    )
}
