//! Error constructors (Error and its subclasses)

use std::sync::Arc;

use crate::context::Context;
use crate::intrinsics::{define_method, native_function, register_constructor};
use crate::object::{ObjectData, PropertyAttributes, PropertyKey, ScriptObject};
use crate::value::Value;

const SUBCLASSES: &[&str] = &[
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "EvalError",
    "URIError",
];

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    let error_proto = make_proto(object_proto, "Error", function_proto);
    let error_ctor = make_constructor("Error", &error_proto, function_proto);
    register_constructor(global, "Error", &error_ctor, &error_proto);

    for name in SUBCLASSES {
        let proto = make_proto(&error_proto, name, function_proto);
        let ctor = make_constructor(name, &proto, function_proto);
        register_constructor(global, name, &ctor, &proto);
    }
}

fn make_proto(
    parent: &Arc<ScriptObject>,
    name: &'static str,
    function_proto: &Arc<ScriptObject>,
) -> Arc<ScriptObject> {
    let proto = ScriptObject::with_data(ObjectData::Plain, "Error", Some(parent.clone()));
    proto.define_property(
        PropertyKey::string("name"),
        Value::string(name),
        PropertyAttributes::dontenum(),
    );
    proto.define_property(
        PropertyKey::string("message"),
        Value::string(""),
        PropertyAttributes::dontenum(),
    );
    define_method(
        &proto,
        "toString",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| {
            Ok(Value::string(match this.as_object() {
                Some(object) => object.default_string(),
                None => "Error".to_string(),
            }))
        },
    );
    proto
}

fn make_constructor(
    name: &'static str,
    proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) -> Arc<ScriptObject> {
    let proto = proto.clone();
    native_function(name, 1, Some(function_proto.clone()), move |_cx, _this, args| {
        let error = ScriptObject::with_data(ObjectData::Plain, "Error", Some(proto.clone()));
        if let Some(message) = args.first().filter(|m| !m.is_undefined()) {
            error.define_property(
                PropertyKey::string("message"),
                Value::string(message.to_js_string()),
                PropertyAttributes::dontenum(),
            );
        }
        Ok(Value::object(error))
    })
}

/// Build the error value scripts observe for an engine-raised error. The
/// prototype comes from the active top-call scope when one exists; a bare
/// error object is produced otherwise.
pub(crate) fn new_error_value(cx: &Context, constructor_name: &str, message: &str) -> Value {
    let proto = cx
        .top_call_scope()
        .and_then(|global| crate::interpreter::builtin_prototype(&global, constructor_name));
    let error = ScriptObject::with_data(ObjectData::Plain, "Error", proto);
    error.define_property(
        PropertyKey::string("name"),
        Value::string(constructor_name),
        PropertyAttributes::dontenum(),
    );
    error.define_property(
        PropertyKey::string("message"),
        Value::string(message),
        PropertyAttributes::dontenum(),
    );
    Value::object(error)
}
