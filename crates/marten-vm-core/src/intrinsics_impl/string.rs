//! String constructor and prototype
//!
//! The regexp entry points (`match`, `matchAll`, `search`) delegate to the
//! receiver's symbol protocols through the context's regexp provider.

use std::sync::Arc;

use crate::context::Context;
use crate::error::{EngineError, JsResult};
use crate::intrinsics::{define_method, native_function, register_constructor};
use crate::object::ScriptObject;
use crate::value::Value;

/// Coerce a `match`/`search` argument into a regexp instance
fn coerce_to_regexp(cx: &Context, argument: Option<&Value>) -> JsResult<Value> {
    let proxy = cx.regexp_proxy();
    match argument {
        Some(value) if proxy.is_regexp(value) => Ok(value.clone()),
        Some(Value::Undefined) | None => proxy.compile_regexp(cx, "", ""),
        Some(other) => proxy.compile_regexp(cx, &other.to_js_string(), ""),
    }
}

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    let string_proto = ScriptObject::plain(Some(object_proto.clone()));

    let constructor = native_function(
        "String",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            Ok(Value::string(match args.first() {
                Some(value) => value.to_js_string(),
                None => String::new(),
            }))
        },
    );

    define_method(
        &string_proto,
        "charAt",
        1,
        Some(function_proto.clone()),
        |_cx, this, args| {
            let s = this.to_js_string();
            let index = args.first().map(|v| v.to_number()).unwrap_or(0.0);
            if index < 0.0 {
                return Ok(Value::string(""));
            }
            let unit = s.encode_utf16().nth(index as usize);
            Ok(Value::string(match unit {
                Some(unit) => String::from_utf16_lossy(&[unit]),
                None => String::new(),
            }))
        },
    );

    define_method(
        &string_proto,
        "charCodeAt",
        1,
        Some(function_proto.clone()),
        |_cx, this, args| {
            let s = this.to_js_string();
            let index = args.first().map(|v| v.to_number()).unwrap_or(0.0);
            if index < 0.0 {
                return Ok(Value::number(f64::NAN));
            }
            Ok(match s.encode_utf16().nth(index as usize) {
                Some(unit) => Value::number(unit as f64),
                None => Value::number(f64::NAN),
            })
        },
    );

    define_method(
        &string_proto,
        "indexOf",
        1,
        Some(function_proto.clone()),
        |_cx, this, args| {
            let haystack = this.to_js_string();
            let needle = args.first().map(|v| v.to_js_string()).unwrap_or_default();
            let haystack16: Vec<u16> = haystack.encode_utf16().collect();
            let needle16: Vec<u16> = needle.encode_utf16().collect();
            if needle16.is_empty() {
                return Ok(Value::number(0.0));
            }
            let found = haystack16
                .windows(needle16.len())
                .position(|window| window == needle16);
            Ok(Value::number(match found {
                Some(at) => at as f64,
                None => -1.0,
            }))
        },
    );

    define_method(
        &string_proto,
        "substring",
        2,
        Some(function_proto.clone()),
        |_cx, this, args| {
            let units: Vec<u16> = this.to_js_string().encode_utf16().collect();
            let clamp = |v: f64| -> usize {
                if v.is_nan() || v < 0.0 {
                    0
                } else {
                    (v as usize).min(units.len())
                }
            };
            let mut start = clamp(args.first().map(|v| v.to_number()).unwrap_or(0.0));
            let mut end = clamp(match args.get(1) {
                None | Some(Value::Undefined) => units.len() as f64,
                Some(v) => v.to_number(),
            });
            if start > end {
                std::mem::swap(&mut start, &mut end);
            }
            Ok(Value::string(String::from_utf16_lossy(&units[start..end])))
        },
    );

    // ==================== regexp entry points ====================

    let match_global = global.clone();
    define_method(
        &string_proto,
        "match",
        1,
        Some(function_proto.clone()),
        move |cx, this, args| {
            let subject = require_string_receiver(this, "String.prototype.match")?;
            let regexp = coerce_to_regexp(cx, args.first())?;
            crate::intrinsics_impl::regexp::symbol_match_impl(
                cx,
                &match_global,
                &regexp,
                &subject,
            )
        },
    );

    let search_global = global.clone();
    define_method(
        &string_proto,
        "search",
        1,
        Some(function_proto.clone()),
        move |cx, this, args| {
            let subject = require_string_receiver(this, "String.prototype.search")?;
            let regexp = coerce_to_regexp(cx, args.first())?;
            crate::intrinsics_impl::regexp::symbol_search_impl(
                cx,
                &search_global,
                &regexp,
                &subject,
            )
        },
    );

    let match_all_global = global.clone();
    define_method(
        &string_proto,
        "matchAll",
        1,
        Some(function_proto.clone()),
        move |cx, this, args| {
            let subject = require_string_receiver(this, "String.prototype.matchAll")?;
            // A regexp argument without the global flag is refused up front.
            if let Some(value) = args.first()
                && let Some(object) = value.as_object()
                && let Some(data) = object.as_regexp()
                && !data.compiled().flags().global()
            {
                return Err(EngineError::type_error(
                    "String.prototype.matchAll called with a non-global RegExp argument",
                ));
            }
            let regexp = match args.first() {
                Some(value) if cx.regexp_proxy().is_regexp(value) => value.clone(),
                Some(Value::Undefined) | None => cx.regexp_proxy().compile_regexp(cx, "", "g")?,
                Some(other) => {
                    cx.regexp_proxy()
                        .compile_regexp(cx, &other.to_js_string(), "g")?
                }
            };
            crate::intrinsics_impl::regexp::symbol_match_all_impl(
                cx,
                &match_all_global,
                &regexp,
                &subject,
            )
        },
    );

    define_method(
        &string_proto,
        "toString",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| Ok(Value::string(this.to_js_string())),
    );

    register_constructor(global, "String", &constructor, &string_proto);
}

fn require_string_receiver(this: &Value, who: &str) -> JsResult<String> {
    if this.is_nullish() {
        return Err(EngineError::type_error(format!(
            "{} called on null or undefined",
            who
        )));
    }
    Ok(this.to_js_string())
}
