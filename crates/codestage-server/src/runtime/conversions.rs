//! JSON <-> JavaScript Value Conversions
//!
//! CALL arguments arrive as JSON and become the function's first argument.
//! Return values leave as bytes:
//!
//! | Return value         | Output bytes            |
//! |----------------------|-------------------------|
//! | `undefined` / `null` | empty                   |
//! | string               | its UTF-8 encoding      |
//! | anything else        | compact JSON encoding   |
//!
//! The JSON encoding is written straight into the call's [`OutputBuffer`]
//! and stops once the buffer is full, so the work done for a call is bounded
//! by its capacity rather than by the size of the value it returned.
//!
//! # Limitations
//!
//! - Symbol keys in JavaScript objects are skipped during conversion
//! - Function-valued properties are skipped; other functions and symbols
//!   are encoded as JSON null
//! - Non-finite numbers (`NaN`, `Infinity`) are encoded as JSON null

use boa_engine::{
    js_string,
    object::{builtins::JsArray, JsObject},
    property::PropertyKey,
    value::JsValue,
    Context,
};
use codestage_common::protocol::error::{CodestageError, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::runtime::output::OutputBuffer;

/// Nesting depth past which conversion gives up, so cyclic objects terminate.
const MAX_DEPTH: usize = 128;

/// Convert serde_json::Value to Boa JsValue.
pub fn json_to_js_value(json: JsonValue, ctx: &mut Context) -> Result<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| CodestageError::Execution("argument number out of range".into())),
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s))),
        JsonValue::Array(arr) => {
            let js_array = JsArray::new(ctx);
            for (i, v) in arr.into_iter().enumerate() {
                let js_value = json_to_js_value(v, ctx)?;
                js_array.push(js_value, ctx).map_err(|e| {
                    CodestageError::Execution(format!("failed to push array element {}: {}", i, e))
                })?;
            }
            Ok(js_array.into())
        }
        JsonValue::Object(obj) => {
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());

            for (key, value) in obj {
                let js_value = json_to_js_value(value, ctx)?;
                js_obj
                    .create_data_property_or_throw(js_string!(key.clone()), js_value, ctx)
                    .map_err(|e| {
                        CodestageError::Execution(format!("failed to set property '{}': {}", key, e))
                    })?;
            }

            Ok(js_obj.into())
        }
    }
}

/// Writes a function's return value to `out`.
///
/// At most `max_visits` values and object keys are inspected; past that the
/// encoding fails with `BudgetExceeded`.
pub fn write_output(
    value: &JsValue,
    ctx: &mut Context,
    out: &mut OutputBuffer,
    max_visits: u64,
) -> Result<()> {
    if value.is_undefined() || value.is_null() {
        return Ok(());
    }

    if let Some(s) = value.as_string() {
        return out.write(s.to_std_string_escaped().as_bytes());
    }

    OutputEncoder {
        ctx,
        out,
        visits_left: max_visits,
    }
    .encode(value, 0)
}

struct OutputEncoder<'a> {
    ctx: &'a mut Context,
    out: &'a mut OutputBuffer,
    visits_left: u64,
}

impl OutputEncoder<'_> {
    fn encode(&mut self, value: &JsValue, depth: usize) -> Result<()> {
        if self.out.is_full() {
            return Ok(());
        }
        self.visit()?;

        if depth > MAX_DEPTH {
            return Err(CodestageError::Execution(format!(
                "return value nests deeper than {} levels",
                MAX_DEPTH
            )));
        }

        if value.is_undefined() || value.is_null() {
            return self.out.write(b"null");
        }

        if let Some(b) = value.as_boolean() {
            let text: &[u8] = if b { b"true" } else { b"false" };
            return self.out.write(text);
        }

        if let Some(n) = value.as_number() {
            return self.write_json(&number_to_json(n));
        }

        if let Some(s) = value.as_string() {
            return self.write_json(&s.to_std_string_escaped());
        }

        if let Some(obj) = value.as_object() {
            let obj = obj.clone();
            if obj.is_callable() {
                return self.out.write(b"null");
            }
            if obj.is_array() {
                return self.encode_array(obj, depth);
            }
            return self.encode_object(&obj, depth);
        }

        // Symbols and bigints have no JSON form.
        self.out.write(b"null")
    }

    fn encode_array(&mut self, obj: JsObject, depth: usize) -> Result<()> {
        let array = JsArray::from_object(obj)
            .map_err(|e| CodestageError::Execution(format!("object is not a valid array: {}", e)))?;

        let length: usize = array
            .length(self.ctx)
            .map_err(|e| CodestageError::Execution(format!("failed to get array length: {}", e)))?
            .try_into()
            .map_err(|_| CodestageError::Execution("array length overflow".into()))?;

        self.out.write(b"[")?;
        for i in 0..length {
            // Sparse arrays can be huge without costing the program anything.
            if self.out.is_full() {
                return Ok(());
            }
            if i > 0 {
                self.out.write(b",")?;
            }
            let elem = array.get(i, self.ctx).map_err(|e| {
                CodestageError::Execution(format!("failed to get array element {}: {}", i, e))
            })?;
            self.encode(&elem, depth + 1)?;
        }
        self.out.write(b"]")
    }

    fn encode_object(&mut self, obj: &JsObject, depth: usize) -> Result<()> {
        let keys = obj
            .own_property_keys(self.ctx)
            .map_err(|e| CodestageError::Execution(format!("failed to get object keys: {}", e)))?;

        self.out.write(b"{")?;
        let mut first = true;
        for key in keys {
            if self.out.is_full() {
                return Ok(());
            }
            self.visit()?;

            let key_str = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };

            let prop_value = obj.get(key.clone(), self.ctx).map_err(|e| {
                CodestageError::Execution(format!("failed to get property '{}': {}", key_str, e))
            })?;
            if prop_value.as_object().is_some_and(|o| o.is_callable()) {
                continue;
            }

            if !first {
                self.out.write(b",")?;
            }
            first = false;
            self.write_json(&key_str)?;
            self.out.write(b":")?;
            self.encode(&prop_value, depth + 1)?;
        }
        self.out.write(b"}")
    }

    fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.out.write(&bytes)
    }

    fn visit(&mut self) -> Result<()> {
        if self.visits_left == 0 {
            return Err(CodestageError::BudgetExceeded(
                "return value is too large to encode".into(),
            ));
        }
        self.visits_left -= 1;
        Ok(())
    }
}

fn number_to_json(n: f64) -> JsonValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < (1u64 << 53) as f64 {
        return JsonValue::Number((n as i64).into());
    }
    serde_json::Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}
