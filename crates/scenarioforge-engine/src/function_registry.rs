use crate::function::Function;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

// Case-sensitive registry: the DSL's names are normative as spelled
// (`abs` and `PI` are functions, `ABS` and `pi` are not).
static REG: Lazy<DashMap<String, Arc<dyn Function>>> = Lazy::new(DashMap::new);

pub fn register_function(f: Arc<dyn Function>) {
    REG.insert(f.name().to_string(), f);
}

pub fn get(name: &str) -> Option<Arc<dyn Function>> {
    REG.get(name).map(|v| Arc::clone(v.value()))
}

pub fn is_registered(name: &str) -> bool {
    REG.contains_key(name)
}
