//! Runtime selection.

use crate::domain::{Runtime, TaskSpecification};

/// Languages the WASM sandbox can run
pub const WASM_LANGUAGES: [&str; 4] = ["javascript", "typescript", "rust", "go"];

/// Choose the execution backend for a task.
///
/// First match wins:
/// 1. `preferWasm` false or absent -> container
/// 2. `requiresNative` -> container
/// 3. a language outside [`WASM_LANGUAGES`] -> container
/// 4. otherwise wasm
pub fn select(spec: &TaskSpecification) -> Runtime {
    if !spec.prefer_wasm.unwrap_or(false) {
        return Runtime::Container;
    }
    if spec.requires_native.unwrap_or(false) {
        return Runtime::Container;
    }
    if let Some(language) = spec.language.as_deref() {
        if !WASM_LANGUAGES.contains(&language) {
            return Runtime::Container;
        }
    }
    Runtime::Wasm
}
