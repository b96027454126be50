//! Clause parsing: the SELECT list, FROM, WHERE, WITH, GROUP BY, HAVING,
//! ORDER BY, LIMIT, OFFSET and FOR UPDATE, plus the bracketed constructs
//! that only appear in the select list (relationship subqueries, TYPEOF).

use super::Parser;
use crate::error::QueryResult;
use crate::soql::ast::*;
use crate::soql::lexer::Token;

impl Parser {
    /// Parse `SELECT ... FROM ...` and every optional trailing clause.
    pub(crate) fn parse_query(&mut self) -> QueryResult<Query> {
        let pos = self.expect(Token::Select, "SELECT")?;
        let select = self.parse_select_list()?;

        self.expect(Token::From, "FROM")?;
        let from = self.expect_identifier("object name")?;

        let where_clause = if matches!(self.current_token(), Token::Where) {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };

        let security_enforced = if matches!(self.current_token(), Token::With) {
            self.advance();
            if !self.at_word("SECURITY_ENFORCED") {
                return Err(self.error_expected("SECURITY_ENFORCED"));
            }
            self.advance();
            true
        } else {
            false
        };

        let group_by = if matches!(self.current_token(), Token::Group) {
            self.advance();
            self.expect(Token::By, "BY")?;
            self.parse_expression_list()?
        } else {
            Vec::new()
        };

        let having = if matches!(self.current_token(), Token::Having) {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };

        let order_by = if matches!(self.current_token(), Token::Order) {
            self.advance();
            self.expect(Token::By, "BY")?;
            self.parse_order_items()?
        } else {
            Vec::new()
        };

        let limit = if matches!(self.current_token(), Token::Limit) {
            self.advance();
            Some(self.parse_count("LIMIT value")?)
        } else {
            None
        };

        let offset = if matches!(self.current_token(), Token::Offset) {
            self.advance();
            Some(self.parse_count("OFFSET value")?)
        } else {
            None
        };

        let for_update = if matches!(self.current_token(), Token::For) {
            self.advance();
            self.expect(Token::Update, "UPDATE")?;
            true
        } else {
            false
        };

        Ok(Query {
            select,
            from,
            where_clause,
            security_enforced,
            group_by,
            having,
            order_by,
            limit,
            offset,
            for_update,
            pos,
        })
    }

    fn parse_select_list(&mut self) -> QueryResult<Vec<SelectItem>> {
        let mut items = vec![self.parse_select_item()?];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> QueryResult<SelectItem> {
        if matches!(self.current_token(), Token::Typeof) {
            return Ok(SelectItem::Typeof(self.parse_typeof()?));
        }

        if matches!(self.current_token(), Token::LeftParen)
            && matches!(self.peek_token(1), Token::Select)
        {
            return Ok(SelectItem::Subquery(self.parse_subquery()?));
        }

        let expr = self.parse_expression()?;
        let alias = match self.current_token() {
            Token::As => {
                self.advance();
                Some(self.expect_identifier("alias")?)
            }
            Token::Identifier(_) => Some(self.expect_identifier("alias")?),
            _ => None,
        };
        Ok(SelectItem::Expr { expr, alias })
    }

    /// Parse `( SELECT ... )` starting at the opening parenthesis.
    pub(crate) fn parse_subquery(&mut self) -> QueryResult<Subquery> {
        let pos = self.expect(Token::LeftParen, "'('")?;
        let id = self.next_node_id();
        self.descend()?;
        let query = self.parse_query()?;
        self.ascend(1);
        self.expect(Token::RightParen, "')'")?;
        Ok(Subquery {
            id,
            query: Box::new(query),
            pos,
        })
    }

    fn parse_typeof(&mut self) -> QueryResult<TypeOf> {
        let pos = self.expect(Token::Typeof, "TYPEOF")?;
        let id = self.next_node_id();
        let field = self.expect_identifier("polymorphic field name")?;

        let mut whens = Vec::new();
        while matches!(self.current_token(), Token::When) {
            self.advance();
            let object = self.expect_identifier("object type")?;
            self.expect(Token::Then, "THEN")?;
            let fields = self.parse_ident_list()?;
            whens.push(TypeOfWhen { object, fields });
        }
        if whens.is_empty() {
            return Err(self.error_expected("WHEN"));
        }

        let else_fields = if matches!(self.current_token(), Token::Else) {
            self.advance();
            self.parse_ident_list()?
        } else {
            Vec::new()
        };

        self.expect(Token::End, "END")?;

        Ok(TypeOf {
            id,
            field,
            whens,
            else_fields,
            pos,
        })
    }

    fn parse_ident_list(&mut self) -> QueryResult<Vec<Ident>> {
        let mut idents = vec![self.expect_identifier("field name")?];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            idents.push(self.expect_identifier("field name")?);
        }
        Ok(idents)
    }

    fn parse_expression_list(&mut self) -> QueryResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expression()?];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            exprs.push(self.parse_expression()?);
        }
        Ok(exprs)
    }

    fn parse_order_items(&mut self) -> QueryResult<Vec<OrderItem>> {
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expression()?;

            let descending = match self.current_token() {
                Token::Asc => {
                    self.advance();
                    false
                }
                Token::Desc => {
                    self.advance();
                    true
                }
                _ => false,
            };

            let nulls = if self.at_word("NULLS") {
                self.advance();
                let order = if self.at_word("FIRST") {
                    NullsOrder::First
                } else if self.at_word("LAST") {
                    NullsOrder::Last
                } else {
                    return Err(self.error_expected("FIRST or LAST"));
                };
                self.advance();
                Some(order)
            } else {
                None
            };

            items.push(OrderItem {
                expr,
                descending,
                nulls,
            });

            if matches!(self.current_token(), Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(items)
    }

    /// Non-negative integer for LIMIT and OFFSET
    fn parse_count(&mut self, description: &str) -> QueryResult<u64> {
        match self.current_token() {
            Token::Integer(n) if *n >= 0 => {
                let value = *n as u64;
                self.advance();
                Ok(value)
            }
            _ => Err(self.error_expected(description)),
        }
    }
}
