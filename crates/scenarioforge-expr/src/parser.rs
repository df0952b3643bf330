use crate::tokenizer::{Token, TokenKind, Tokenizer, TokenizerError};
use scenarioforge_common::Value;

use std::error::Error;
use std::fmt::{self, Display};

/// Represents operator associativity.
#[derive(Debug, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

/// A custom error type for the parser. `position` is a byte offset into the
/// source expression when one is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at position {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

impl From<TokenizerError> for ParserError {
    fn from(err: TokenizerError) -> Self {
        ParserError {
            message: err.message,
            position: Some(err.pos),
        }
    }
}

/// The different kinds of expression AST nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    /// `$`-prefixed context variable; the name excludes the sigil.
    Variable(String),
    /// Bare identifier. Only safelisted constants resolve at evaluation time.
    Identifier(String),
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    ArrayLit(Vec<Expr>),
}

/// An expression AST node with its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub start: usize,
    pub end: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, start: usize, end: usize) -> Self {
        Expr { kind, start, end }
    }

    /// Collect the distinct `$`-variable names referenced by this expression,
    /// in first-appearance order.
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let ExprKind::Variable(name) = &e.kind {
                if !out.iter().any(|v| v == name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    /// Collect the distinct function names called by this expression.
    pub fn called_functions(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let ExprKind::Call { name, .. } = &e.kind {
                if !out.iter().any(|v| v == name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    fn visit(&self, visitor: &mut dyn FnMut(&Expr)) {
        visitor(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Variable(_) | ExprKind::Identifier(_) => {}
            ExprKind::Unary { operand, .. } => operand.visit(visitor),
            ExprKind::Binary { left, right, .. } => {
                left.visit(visitor);
                right.visit(visitor);
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.visit(visitor);
                }
            }
            ExprKind::Member { object, .. } => object.visit(visitor),
            ExprKind::Index { object, index } => {
                object.visit(visitor);
                index.visit(visitor);
            }
            ExprKind::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                condition.visit(visitor);
                consequent.visit(visitor);
                alternate.visit(visitor);
            }
            ExprKind::ArrayLit(items) => {
                for item in items {
                    item.visit(visitor);
                }
            }
        }
    }
}

/// Infix binding power, lowest to highest. `^` is exponentiation and
/// right-associative; everything else associates left.
fn precedence(op: &str) -> Option<(u8, Associativity)> {
    match op {
        "||" => Some((1, Associativity::Left)),
        "&&" => Some((2, Associativity::Left)),
        "==" | "!=" => Some((3, Associativity::Left)),
        "<" | ">" | "<=" | ">=" => Some((4, Associativity::Left)),
        "+" | "-" => Some((5, Associativity::Left)),
        "*" | "/" | "%" => Some((6, Associativity::Left)),
        "^" => Some((7, Associativity::Right)),
        _ => None,
    }
}

/// A parser for converting tokens into an expression AST.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    /// Parse the tokens into an AST, requiring every token to be consumed.
    pub fn parse(&mut self) -> Result<Expr, ParserError> {
        if self.tokens.is_empty() {
            return Err(ParserError {
                message: "Empty expression".to_string(),
                position: None,
            });
        }

        let expr = self.parse_expression()?;
        if let Some(token) = self.tokens.get(self.position) {
            return Err(ParserError {
                message: format!("Unexpected token '{}'", token.value),
                position: Some(token.start),
            });
        }
        Ok(expr)
    }

    fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.parse_ternary()
    }

    /// `ternary := binary ( '?' expr ':' expr )?`, right-associative via the
    /// recursive `parse_expression` in both branches.
    fn parse_ternary(&mut self) -> Result<Expr, ParserError> {
        let condition = self.parse_binary(0)?;

        if self.eat_punct("?") {
            let consequent = self.parse_expression()?;
            self.expect_punct(":")?;
            let alternate = self.parse_expression()?;
            let (start, end) = (condition.start, alternate.end);
            return Ok(Expr::new(
                ExprKind::Conditional {
                    condition: Box::new(condition),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                },
                start,
                end,
            ));
        }

        Ok(condition)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParserError> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.tokens.get(self.position) {
            if token.kind != TokenKind::Operator {
                break;
            }
            let Some((prec, assoc)) = precedence(&token.value) else {
                break;
            };
            if prec < min_precedence {
                break;
            }

            let op_token = self.tokens[self.position].clone();
            self.position += 1;

            let next_min = if assoc == Associativity::Left {
                prec + 1
            } else {
                prec
            };
            let right = self.parse_binary(next_min)?;
            let (start, end) = (left.start, right.end);
            left = Expr::new(
                ExprKind::Binary {
                    op: op_token.value,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start,
                end,
            );
        }

        Ok(left)
    }

    /// `unary := ('!'|'-') unary | postfix`
    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        if let Some(token) = self.tokens.get(self.position) {
            if token.is_operator("!") || token.is_operator("-") {
                let op_token = self.tokens[self.position].clone();
                self.position += 1;
                let operand = self.parse_unary()?;
                let (start, end) = (op_token.start, operand.end);
                return Ok(Expr::new(
                    ExprKind::Unary {
                        op: op_token.value,
                        operand: Box::new(operand),
                    },
                    start,
                    end,
                ));
            }
        }
        self.parse_postfix()
    }

    /// `postfix := primary ( '.' IDENT | '[' expr ']' )*`
    fn parse_postfix(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.eat_punct(".") {
                let token = self.next_token("member name after '.'")?;
                if token.kind != TokenKind::Identifier {
                    return Err(ParserError {
                        message: format!("Expected member name after '.', got '{}'", token.value),
                        position: Some(token.start),
                    });
                }
                let (start, end) = (expr.start, token.end);
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        field: token.value,
                    },
                    start,
                    end,
                );
            } else if self.eat_punct("[") {
                let index = self.parse_expression()?;
                let close = self.expect_punct("]")?;
                let (start, end) = (expr.start, close);
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    start,
                    end,
                );
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let token = self.next_token("expression")?;

        match token.kind {
            TokenKind::Number => {
                let value = token.value.parse::<f64>().map_err(|_| ParserError {
                    message: format!("Invalid number: {}", token.value),
                    position: Some(token.start),
                })?;
                Ok(Expr::new(
                    ExprKind::Literal(Value::Number(value)),
                    token.start,
                    token.end,
                ))
            }
            TokenKind::Text => Ok(Expr::new(
                ExprKind::Literal(Value::Text(token.value)),
                token.start,
                token.end,
            )),
            TokenKind::Boolean => Ok(Expr::new(
                ExprKind::Literal(Value::Boolean(token.value == "true")),
                token.start,
                token.end,
            )),
            TokenKind::Null => Ok(Expr::new(
                ExprKind::Literal(Value::Null),
                token.start,
                token.end,
            )),
            TokenKind::Variable => Ok(Expr::new(
                ExprKind::Variable(token.value),
                token.start,
                token.end,
            )),
            TokenKind::Identifier => {
                // An identifier followed by '(' is a function call; anything
                // else stays a bare identifier for the evaluator to judge.
                if self.peek_punct("(") {
                    self.position += 1;
                    let (args, end) = self.parse_call_arguments()?;
                    Ok(Expr::new(
                        ExprKind::Call {
                            name: token.value,
                            args,
                        },
                        token.start,
                        end,
                    ))
                } else {
                    Ok(Expr::new(
                        ExprKind::Identifier(token.value),
                        token.start,
                        token.end,
                    ))
                }
            }
            TokenKind::Punct if token.value == "(" => {
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct if token.value == "[" => {
                let (items, end) = self.parse_array_elements()?;
                Ok(Expr::new(ExprKind::ArrayLit(items), token.start, end))
            }
            _ => Err(ParserError {
                message: format!("Unexpected token '{}'", token.value),
                position: Some(token.start),
            }),
        }
    }

    /// Parse a comma-separated argument list after the opening paren.
    /// Returns the arguments and the byte offset past the closing paren.
    fn parse_call_arguments(&mut self) -> Result<(Vec<Expr>, usize), ParserError> {
        let mut args = Vec::new();

        if self.peek_punct(")") {
            let end = self.tokens[self.position].end;
            self.position += 1;
            return Ok((args, end));
        }

        loop {
            args.push(self.parse_expression()?);
            if self.eat_punct(",") {
                continue;
            }
            let end = self.expect_punct(")")?;
            return Ok((args, end));
        }
    }

    fn parse_array_elements(&mut self) -> Result<(Vec<Expr>, usize), ParserError> {
        let mut items = Vec::new();

        if self.peek_punct("]") {
            let end = self.tokens[self.position].end;
            self.position += 1;
            return Ok((items, end));
        }

        loop {
            items.push(self.parse_expression()?);
            if self.eat_punct(",") {
                continue;
            }
            let end = self.expect_punct("]")?;
            return Ok((items, end));
        }
    }

    /* ---------- token cursor helpers ---------- */

    fn next_token(&mut self, expected: &str) -> Result<Token, ParserError> {
        match self.tokens.get(self.position) {
            Some(token) => {
                let token = token.clone();
                self.position += 1;
                Ok(token)
            }
            None => Err(ParserError {
                message: format!("Unexpected end of expression, expected {expected}"),
                position: self.tokens.last().map(|t| t.end),
            }),
        }
    }

    fn peek_punct(&self, p: &str) -> bool {
        self.tokens
            .get(self.position)
            .is_some_and(|t| t.is_punct(p))
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Consume the given punctuation, returning its end offset.
    fn expect_punct(&mut self, p: &str) -> Result<usize, ParserError> {
        match self.tokens.get(self.position) {
            Some(token) if token.is_punct(p) => {
                let end = token.end;
                self.position += 1;
                Ok(end)
            }
            Some(token) => Err(ParserError {
                message: format!("Expected '{p}', got '{}'", token.value),
                position: Some(token.start),
            }),
            None => Err(ParserError {
                message: format!("Expected '{p}', got end of expression"),
                position: self.tokens.last().map(|t| t.end),
            }),
        }
    }
}

impl TryFrom<&str> for Parser {
    type Error = ParserError;

    fn try_from(source: &str) -> Result<Self, Self::Error> {
        let tokens = Tokenizer::new(source)?.items;
        Ok(Parser::new(tokens))
    }
}
