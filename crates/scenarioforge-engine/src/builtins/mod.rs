pub mod array;
pub mod logical;
pub mod math;
pub mod random;
pub mod stats;
pub mod text;

pub(crate) mod utils;

use std::sync::Once;

/// Register the whole builtin table. Idempotent and cheap to call from every
/// public entry point.
pub fn load_builtins() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        array::register_builtins();
        logical::register_builtins();
        math::register_builtins();
        random::register_builtins();
        stats::register_builtins();
        text::register_builtins();
    });
}
