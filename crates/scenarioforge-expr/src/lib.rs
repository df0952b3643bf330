pub mod parser;
pub mod tokenizer;


pub use parser::{Associativity, Expr, ExprKind, Parser, ParserError};
pub use tokenizer::{Token, TokenKind, Tokenizer, TokenizerError};

// Re-export the shared value domain
pub use scenarioforge_common::Value;

use std::error::Error;
use std::fmt::{self, Display};

/// Unified parse failure: tokenizer or parser, with a byte position.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.position, self.message)
    }
}

impl Error for ParseError {}

impl From<TokenizerError> for ParseError {
    fn from(err: TokenizerError) -> Self {
        ParseError {
            message: err.message,
            position: err.pos,
        }
    }
}

impl From<ParserError> for ParseError {
    fn from(err: ParserError) -> Self {
        ParseError {
            message: err.message,
            position: err.position.unwrap_or(0),
        }
    }
}

/// Parse an expression source string into an AST.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = Tokenizer::new(source)?.items;
    let mut parser = Parser::new(tokens);
    Ok(parser.parse()?)
}

/// Check an expression for syntax validity without evaluating it.
pub fn validate(source: &str) -> Result<(), ParseError> {
    parse(source).map(|_| ())
}
