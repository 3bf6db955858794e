//! JavaScript bindings for Codestage
//!
//! This module provides the native Rust functions that are exposed to programs
//! running in Boa.
//!
//! # JavaScript API
//!
//! The following function is registered on the `codestage` global:
//!
//! - `codestage.export(name, function)` - Make a function callable under `name`
//!
//! Programs may also declare plain global functions (`function f() {}` or
//! `var f = function () {}`), which become callable under their own name.
//! Lexical bindings (`let`, `const`, `class`) are not properties of the
//! global object and must be exported explicitly.

use boa_engine::{
    js_string,
    native_function::NativeFunction,
    object::{FunctionObjectBuilder, JsObject},
    property::Attribute,
    value::JsValue,
    Context, JsNativeError, JsString,
};
use codestage_common::protocol::error::{CodestageError, Result};

/// Name of the global object carrying the bindings.
pub(crate) const GLOBAL_NAME: &str = "codestage";

/// Whether `name` can be invoked through `CALL <name> <capacity>`.
///
/// Names travel as a single whitespace-delimited token, so they must be
/// non-empty and free of whitespace and control characters.
pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Install the `codestage` global into the Boa context.
///
/// Returns the export registry: a plain object mapping exported names to
/// function objects. The registry is only reachable through the `export`
/// closure, so programs cannot tamper with it directly.
pub(crate) fn install_codestage_bindings(ctx: &mut Context) -> Result<JsObject> {
    let codestage_object = JsObject::with_object_proto(ctx.intrinsics());
    let registry = JsObject::with_null_proto();

    let export_fn = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args: &[JsValue], registry: &JsObject, context| {
                let name = args
                    .first()
                    .and_then(|v| v.as_string())
                    .map(|s| s.to_std_string_escaped())
                    .ok_or_else(|| {
                        JsNativeError::typ().with_message("First argument must be a string")
                    })?;

                if !is_valid_function_name(&name) {
                    return Err(JsNativeError::typ()
                        .with_message(format!("Invalid export name '{}'", name))
                        .into());
                }

                let func = args
                    .get(1)
                    .and_then(|v| v.as_object())
                    .filter(|o| o.is_callable())
                    .ok_or_else(|| {
                        JsNativeError::typ().with_message("Second argument must be a function")
                    })?;

                registry.set(JsString::from(name.as_str()), func.clone(), true, context)?;

                Ok(JsValue::undefined())
            },
            registry.clone(),
        ),
    )
    .name(js_string!("export"))
    .length(2)
    .build();

    codestage_object
        .set(js_string!("export"), export_fn, false, ctx)
        .map_err(|e| CodestageError::Execution(e.to_string()))?;

    // Non-writable and non-configurable, so a program cannot swap the global out.
    ctx.register_global_property(js_string!(GLOBAL_NAME), codestage_object, Attribute::empty())
        .map_err(|e| CodestageError::Execution(format!("Failed to register codestage global: {}", e)))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    #[test]
    fn test_function_name_rules() {
        assert!(is_valid_function_name("hello"));
        assert!(is_valid_function_name("math.add"));
        assert!(is_valid_function_name("π"));

        assert!(!is_valid_function_name(""));
        assert!(!is_valid_function_name("two words"));
        assert!(!is_valid_function_name("tab\there"));
        assert!(!is_valid_function_name("nul\0"));
    }

    #[test]
    fn test_export_stores_function_in_registry() {
        let mut ctx = Context::default();
        let registry = install_codestage_bindings(&mut ctx).unwrap();

        ctx.eval(Source::from_bytes("codestage.export('hi', function () { return 1; });"))
            .unwrap();

        let stored = registry.get(js_string!("hi"), &mut ctx).unwrap();
        assert!(stored.as_object().is_some_and(|o| o.is_callable()));
    }

    #[test]
    fn test_export_rejects_non_functions() {
        let mut ctx = Context::default();
        install_codestage_bindings(&mut ctx).unwrap();

        let result = ctx.eval(Source::from_bytes("codestage.export('x', 42);"));
        assert!(result.is_err());
    }

    #[test]
    fn test_export_rejects_names_with_whitespace() {
        let mut ctx = Context::default();
        install_codestage_bindings(&mut ctx).unwrap();

        let result = ctx.eval(Source::from_bytes("codestage.export('a b', function () {});"));
        assert!(result.is_err());
    }

    #[test]
    fn test_global_cannot_be_replaced() {
        let mut ctx = Context::default();
        install_codestage_bindings(&mut ctx).unwrap();

        let result = ctx
            .eval(Source::from_bytes("'use strict'; codestage = {};"))
            .map(|_| ());
        assert!(result.is_err());
    }
}
