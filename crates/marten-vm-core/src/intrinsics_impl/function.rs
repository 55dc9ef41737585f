//! Function constructor and prototype

use std::sync::Arc;

use crate::context::Context;
use crate::error::{EngineError, JsResult};
use crate::interpreter::call_value;
use crate::intrinsics::{define_method, native_function, register_constructor};
use crate::object::{PropertyKey, ScriptObject};
use crate::value::Value;

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    _object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    // Function(args..., body) compiles through the regular pipeline.
    let compile_scope = global.clone();
    let constructor = native_function(
        "Function",
        1,
        Some(function_proto.clone()),
        move |cx, _this, args| {
            let (params, body) = match args.split_last() {
                Some((body, params)) => {
                    let params: Vec<String> =
                        params.iter().map(|p| p.to_js_string()).collect();
                    (params.join(","), body.to_js_string())
                }
                None => (String::new(), String::new()),
            };
            let source = format!("function anonymous({}) {{\n{}\n}}", params, body);
            cx.compile_function(&compile_scope, &source, "anonymous", 1, None)
        },
    );

    define_method(
        function_proto,
        "call",
        1,
        Some(function_proto.clone()),
        |cx, this, args| {
            let (receiver, rest) = match args.split_first() {
                Some((receiver, rest)) => (receiver.clone(), rest),
                None => (Value::undefined(), &[][..]),
            };
            call_value(cx, this, &receiver, rest)
        },
    );

    define_method(
        function_proto,
        "apply",
        2,
        Some(function_proto.clone()),
        |cx, this, args| {
            let receiver = args.first().cloned().unwrap_or_else(Value::undefined);
            let call_args = match args.get(1) {
                None | Some(Value::Undefined) | Some(Value::Null) => Vec::new(),
                Some(Value::Object(array)) => {
                    let length = array
                        .get(cx, &PropertyKey::string("length"))?
                        .map(|l| l.to_uint32())
                        .unwrap_or(0);
                    let mut out = Vec::with_capacity(length as usize);
                    for i in 0..length {
                        out.push(
                            array
                                .get(cx, &PropertyKey::index(i))?
                                .unwrap_or_else(Value::undefined),
                        );
                    }
                    out
                }
                Some(_) => {
                    return Err(EngineError::type_error(
                        "second argument to apply must be an array",
                    ));
                }
            };
            call_value(cx, this, &receiver, &call_args)
        },
    );

    define_method(
        function_proto,
        "toString",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| match this.as_object() {
            Some(object) if object.is_callable() => Ok(Value::string(object.default_string())),
            _ => Err(EngineError::type_error(
                "Function.prototype.toString called on incompatible receiver",
            )),
        },
    );

    register_constructor(global, "Function", &constructor, function_proto);
}
