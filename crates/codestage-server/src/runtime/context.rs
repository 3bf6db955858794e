use std::collections::{BTreeMap, HashSet};

use boa_engine::{
    error::JsNativeErrorKind, js_string, object::JsObject, property::PropertyKey, value::JsValue,
    Context, JsError, JsString, Script, Source,
};
use codestage_common::protocol::error::{CodestageError, Result};
use serde_json::Value as JsonValue;

use crate::resource_limits::ResourceLimits;
use crate::runtime::{
    bindings::{self, is_valid_function_name},
    conversions::{json_to_js_value, write_output},
    image::{Binding, FunctionEntry},
    output::OutputBuffer,
};

/// A Boa context with a program evaluated into it.
///
/// Contexts are neither `Send` nor reusable across programs, so one is built
/// per compile and per call and dropped when the job finishes. Nothing a call
/// does to its globals can leak into the next call.
pub struct EngineContext {
    ctx: Context,
    registry: JsObject,
    /// Global property names present before the program ran.
    baseline: HashSet<String>,
    /// Values the output encoder may inspect; shares the loop budget.
    encode_budget: u64,
}

impl EngineContext {
    /// Builds a sandboxed context and runs the program's top level in it.
    ///
    /// # Errors
    ///
    /// `Compile` if the source fails to parse, its top level throws, or its
    /// top level runs out of an interpreter budget.
    pub fn load(source: &str, limits: &ResourceLimits) -> Result<Self> {
        let mut ctx = Context::default();
        apply_limits(&mut ctx, limits);

        let registry = bindings::install_codestage_bindings(&mut ctx)?;
        let global = ctx.global_object();
        let baseline = own_string_keys(&global, &mut ctx)?.into_iter().collect();

        let script = Script::parse(Source::from_bytes(source), None, &mut ctx)
            .map_err(|e| CodestageError::Compile(format!("Parse error: {}", e)))?;

        script.evaluate(&mut ctx).map_err(|e| {
            if is_runtime_limit(&e) {
                CodestageError::Compile(format!("Initialization exceeded a resource limit: {}", e))
            } else {
                CodestageError::Compile(format!("Initialization error: {}", e))
            }
        })?;

        Ok(Self {
            ctx,
            registry,
            baseline,
            encode_budget: limits.loop_iteration_limit,
        })
    }

    /// Collects every callable entry point.
    ///
    /// Exported functions shadow a global function of the same name.
    pub fn functions(&mut self) -> Result<Vec<FunctionEntry>> {
        let mut table = BTreeMap::new();

        let registry = self.registry.clone();
        for name in own_string_keys(&registry, &mut self.ctx)? {
            if let Some(func) = self.callable_property(&registry, &name)? {
                let arity = self.arity(&func)?;
                table.insert(
                    name.clone(),
                    FunctionEntry {
                        name,
                        arity,
                        binding: Binding::Exported,
                    },
                );
            }
        }

        let global = self.ctx.global_object();
        for name in own_string_keys(&global, &mut self.ctx)? {
            if self.baseline.contains(&name)
                || table.contains_key(&name)
                || !is_valid_function_name(&name)
            {
                continue;
            }
            if let Some(func) = self.callable_property(&global, &name)? {
                let arity = self.arity(&func)?;
                table.insert(
                    name.clone(),
                    FunctionEntry {
                        name,
                        arity,
                        binding: Binding::Global,
                    },
                );
            }
        }

        Ok(table.into_values().collect())
    }

    /// Calls `name` as `name(args, capacity)` and encodes its return value
    /// into `out`, where `capacity` is the room `out` was created with.
    ///
    /// `args` is `undefined` when the caller sent no arguments.
    pub fn invoke(&mut self, name: &str, args: Option<JsonValue>, out: &mut OutputBuffer) -> Result<()> {
        let func = self
            .resolve(name)?
            .ok_or_else(|| CodestageError::UnknownFunction(name.to_string()))?;

        let args_js = match args {
            Some(json) => json_to_js_value(json, &mut self.ctx)?,
            None => JsValue::undefined(),
        };
        // Capacities beyond 2^53 lose precision in a JS number, which no caller can observe.
        let capacity_js = JsValue::new(out.capacity() as f64);

        tracing::debug!("invoke: calling '{}'", name);
        let result = func
            .call(&JsValue::undefined(), &[args_js, capacity_js], &mut self.ctx)
            .map_err(|e| execution_error(name, e))?;

        write_output(&result, &mut self.ctx, out, self.encode_budget)
    }

    fn resolve(&mut self, name: &str) -> Result<Option<JsObject>> {
        let registry = self.registry.clone();
        if let Some(func) = self.callable_property(&registry, name)? {
            return Ok(Some(func));
        }
        if self.baseline.contains(name) {
            return Ok(None);
        }
        let global = self.ctx.global_object();
        self.callable_property(&global, name)
    }

    fn callable_property(&mut self, object: &JsObject, name: &str) -> Result<Option<JsObject>> {
        let value = object
            .get(JsString::from(name), &mut self.ctx)
            .map_err(|e| CodestageError::Execution(format!("Failed to read '{}': {}", name, e)))?;

        Ok(value.as_object().filter(|o| o.is_callable()).map(|o| o.clone()))
    }

    fn arity(&mut self, func: &JsObject) -> Result<u32> {
        let length = func
            .get(js_string!("length"), &mut self.ctx)
            .map_err(|e| CodestageError::Execution(e.to_string()))?;

        Ok(length
            .as_number()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.min(u32::MAX as f64) as u32)
            .unwrap_or(0))
    }
}

fn apply_limits(ctx: &mut Context, limits: &ResourceLimits) {
    let runtime_limits = ctx.runtime_limits_mut();
    runtime_limits.set_loop_iteration_limit(limits.loop_iteration_limit);
    runtime_limits.set_recursion_limit(limits.recursion_limit);
    runtime_limits.set_stack_size_limit(limits.stack_size_limit);
}

fn own_string_keys(object: &JsObject, ctx: &mut Context) -> Result<Vec<String>> {
    let keys = object
        .own_property_keys(ctx)
        .map_err(|e| CodestageError::Execution(format!("Failed to list properties: {}", e)))?;

    Ok(keys
        .into_iter()
        .filter_map(|key| match key {
            PropertyKey::String(s) => Some(s.to_std_string_escaped()),
            _ => None,
        })
        .collect())
}

fn is_runtime_limit(err: &JsError) -> bool {
    err.as_native()
        .is_some_and(|native| matches!(native.kind, JsNativeErrorKind::RuntimeLimit))
}

fn execution_error(name: &str, err: JsError) -> CodestageError {
    if is_runtime_limit(&err) {
        CodestageError::BudgetExceeded(format!("'{}': {}", name, err))
    } else {
        CodestageError::Execution(format!("'{}' threw: {}", name, err))
    }
}
