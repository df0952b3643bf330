//! Engine-wide error representation.
//!
//! - **`EngineErrorKind`** : the flat taxonomy every failure maps to
//! - **`EngineError`**     : kind + optional message + optional node binding
//!
//! The engine never panics past its public API; every failure travels as one
//! of these. Kernel failures carry the id of the node that raised them so
//! callers can point at the offending part of the graph.

use std::{error::Error, fmt};

/// All recognised engine error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// Structural graph problem: dangling endpoint, bad port, cycle.
    Validation,
    /// Expression failed to tokenize or parse, or used a forbidden identifier.
    Parse,
    /// `$`-variable not bound in the evaluation context.
    UnknownVariable,
    /// Function name not present in the builtin table.
    UnknownFunction,
    /// Bare identifier that is not a safelisted constant.
    UnknownIdentifier,
    /// Operation applied to a value kind it does not accept.
    TypeMismatch,
    /// Index or rank outside the valid domain.
    IndexOutOfRange,
    /// Division by zero, for the few call sites that opt into treating it
    /// as an error instead of IEEE infinity.
    DivideByZero,
    /// Kernel failure during execution.
    Runtime,
    /// Subgraph unresolved, mis-mapped, or nested too deep.
    Subgraph,
    /// Run aborted by the cancel token or the execution time budget.
    Cancelled,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::Parse => "parse",
            Self::UnknownVariable => "unknown variable",
            Self::UnknownFunction => "unknown function",
            Self::UnknownIdentifier => "unknown identifier",
            Self::TypeMismatch => "type mismatch",
            Self::IndexOutOfRange => "index out of range",
            Self::DivideByZero => "divide by zero",
            Self::Runtime => "runtime",
            Self::Subgraph => "subgraph",
            Self::Cancelled => "cancelled",
        })
    }
}

/// The single error struct the engine's APIs pass around.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: Option<String>,
    /// Id of the node the failure is bound to, when one is known.
    pub node: Option<String>,
}

impl From<EngineErrorKind> for EngineError {
    fn from(kind: EngineErrorKind) -> Self {
        Self {
            kind,
            message: None,
            node: None,
        }
    }
}

impl EngineError {
    pub fn new(kind: EngineErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Bind the error to the node it originated from. Keeps the first
    /// binding: re-wrapping at an outer level must not lose the origin.
    pub fn with_node<S: Into<String>>(mut self, node: S) -> Self {
        if self.node.is_none() {
            self.node = Some(node.into());
        }
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == EngineErrorKind::Cancelled
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(ref node) = self.node {
            write!(f, " (node {node})")?;
        }
        Ok(())
    }
}

impl Error for EngineError {}

impl From<EngineError> for String {
    fn from(error: EngineError) -> Self {
        format!("{error}")
    }
}
