//! The core `Function` trait for expression builtins and its capability
//! flags.

use crate::rng::SharedRng;
use scenarioforge_common::{EngineError, Value};

bitflags::bitflags! {
    /// Describes the properties of a builtin function.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FnCaps: u8 {
        /// Same output for the same input, no side effects. The default.
        const PURE     = 0b0000_0001;
        /// Output depends on the run's RNG stream (`random()`).
        const VOLATILE = 0b0000_0010;
    }
}

/// Per-call state handed to builtins. Carries the run's RNG stream so
/// volatile functions draw from the same sequence as distribution sampling.
pub struct FunctionContext<'a> {
    pub rng: &'a SharedRng,
}

/// An expression builtin: object-safe, registered by name.
///
/// Arguments arrive already evaluated, in call order. Array-taking builtins
/// splat array arguments one level themselves (see `builtins::utils`).
pub trait Function: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn min_args(&self) -> usize {
        0
    }

    fn variadic(&self) -> bool {
        false
    }

    fn caps(&self) -> FnCaps {
        FnCaps::PURE
    }

    fn volatile(&self) -> bool {
        self.caps().contains(FnCaps::VOLATILE)
    }

    fn eval(&self, args: &[Value], ctx: &FunctionContext) -> Result<Value, EngineError>;
}
