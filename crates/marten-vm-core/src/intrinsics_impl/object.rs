//! Object constructor and prototype

use std::sync::Arc;

use crate::context::Context;
use crate::error::{EngineError, JsResult};
use crate::intrinsics::{define_method, native_function, register_constructor};
use crate::object::{PropertyAttributes, PropertyKey, ScriptObject};
use crate::value::Value;

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    let proto_for_new = object_proto.clone();
    let constructor = native_function(
        "Object",
        1,
        Some(function_proto.clone()),
        move |_cx, _this, args| match args.first() {
            Some(value) if !value.is_nullish() => Ok(value.clone()),
            _ => Ok(Value::object(ScriptObject::plain(Some(
                proto_for_new.clone(),
            )))),
        },
    );

    // ==================== statics ====================

    let array_proto_source = global.clone();
    define_method(
        &constructor,
        "getOwnPropertyNames",
        1,
        Some(function_proto.clone()),
        move |cx, _this, args| {
            let object = require_object(args.first(), "Object.getOwnPropertyNames")?;
            let keys = object.own_keys(false, true);
            let array = ScriptObject::array(crate::interpreter::builtin_prototype(
                &array_proto_source,
                "Array",
            ));
            let mut next = 0u32;
            for key in keys {
                if let PropertyKey::Symbol(_) = key {
                    continue;
                }
                array.define_property(
                    PropertyKey::index(next),
                    Value::string(key.display()),
                    PropertyAttributes::EMPTY,
                );
                next += 1;
            }
            let _ = cx;
            Ok(Value::object(array))
        },
    );

    let array_source = global.clone();
    define_method(
        &constructor,
        "keys",
        1,
        Some(function_proto.clone()),
        move |_cx, _this, args| {
            let object = require_object(args.first(), "Object.keys")?;
            let keys = object.own_keys(true, true);
            let array = ScriptObject::array(crate::interpreter::builtin_prototype(
                &array_source,
                "Array",
            ));
            let mut next = 0u32;
            for key in keys {
                if let PropertyKey::Symbol(_) = key {
                    continue;
                }
                array.define_property(
                    PropertyKey::index(next),
                    Value::string(key.display()),
                    PropertyAttributes::EMPTY,
                );
                next += 1;
            }
            Ok(Value::object(array))
        },
    );

    define_method(
        &constructor,
        "getPrototypeOf",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            let object = require_object(args.first(), "Object.getPrototypeOf")?;
            Ok(match object.prototype() {
                Some(proto) => Value::object(proto),
                None => Value::null(),
            })
        },
    );

    define_method(
        &constructor,
        "defineProperty",
        3,
        Some(function_proto.clone()),
        |cx, _this, args| {
            let object = require_object(args.first(), "Object.defineProperty")?;
            let key = PropertyKey::from_value(args.get(1).unwrap_or(&Value::Undefined));
            let Some(descriptor) = args.get(2).and_then(|d| d.as_object()) else {
                return Err(EngineError::type_error("property descriptor must be an object"));
            };
            let read = |name: &str| -> JsResult<Option<Value>> {
                descriptor.get(cx, &PropertyKey::string(name))
            };
            let mut bits = 0u8;
            if !read("writable")?.is_some_and(|v| v.to_boolean()) {
                bits |= PropertyAttributes::READONLY;
            }
            if !read("enumerable")?.is_some_and(|v| v.to_boolean()) {
                bits |= PropertyAttributes::DONTENUM;
            }
            if !read("configurable")?.is_some_and(|v| v.to_boolean()) {
                bits |= PropertyAttributes::PERMANENT;
            }
            let attributes = PropertyAttributes::new(bits);
            let getter = read("get")?.filter(|v| !v.is_undefined());
            let setter = read("set")?.filter(|v| !v.is_undefined());
            if getter.is_some() || setter.is_some() {
                object.define_accessor(key, getter, setter, attributes);
            } else if let Some(data) = object.as_regexp()
                && key == PropertyKey::string("lastIndex")
            {
                // lastIndex is an id slot; redefinition updates its bitmap.
                object.set_attributes(&key, attributes);
                if let Some(value) = read("value")? {
                    data.set_last_index(value.to_number());
                }
            } else {
                let value = read("value")?.unwrap_or_else(Value::undefined);
                object.define_property(key, value, attributes);
            }
            Ok(args.first().cloned().unwrap_or_else(Value::undefined))
        },
    );

    // ==================== prototype ====================

    define_method(
        object_proto,
        "toString",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| {
            Ok(Value::string(match this {
                Value::Object(o) => format!("[object {}]", o.class_name()),
                Value::Undefined => "[object Undefined]".to_string(),
                Value::Null => "[object Null]".to_string(),
                other => format!("[object {}]", other.type_of()),
            }))
        },
    );

    define_method(
        object_proto,
        "hasOwnProperty",
        1,
        Some(function_proto.clone()),
        |_cx, this, args| {
            let Some(object) = this.as_object() else {
                return Ok(Value::boolean(false));
            };
            let key = PropertyKey::from_value(args.first().unwrap_or(&Value::Undefined));
            Ok(Value::boolean(object.has_own(&key)))
        },
    );

    define_method(
        object_proto,
        "valueOf",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| Ok(this.clone()),
    );

    register_constructor(global, "Object", &constructor, object_proto);
}

fn require_object(value: Option<&Value>, who: &str) -> JsResult<Arc<ScriptObject>> {
    value
        .and_then(|v| v.as_object().cloned())
        .ok_or_else(|| EngineError::type_error(format!("{} called on non-object", who)))
}
