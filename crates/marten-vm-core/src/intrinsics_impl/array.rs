//! Array constructor and prototype

use std::sync::Arc;

use crate::context::Context;
use crate::error::JsResult;
use crate::intrinsics::{
    define_method, define_species, native_function, register_constructor,
};
use crate::object::{PropertyAttributes, PropertyKey, ScriptObject};
use crate::value::{Value, to_array_index};

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    let array_proto = ScriptObject::plain(Some(object_proto.clone()));

    let proto_for_new = array_proto.clone();
    let constructor = native_function(
        "Array",
        1,
        Some(function_proto.clone()),
        move |_cx, _this, args| {
            let array = ScriptObject::array(Some(proto_for_new.clone()));
            match args {
                [Value::Number(n)] => {
                    let length = to_array_index(&Value::Number(*n)).unwrap_or(0);
                    // Sparse: only the length moves.
                    let _ = array.instance_put_length(length);
                }
                items => {
                    for (i, item) in items.iter().enumerate() {
                        array.define_property(
                            PropertyKey::index(i as u32),
                            item.clone(),
                            PropertyAttributes::EMPTY,
                        );
                    }
                }
            }
            Ok(Value::object(array))
        },
    );

    define_method(
        &constructor,
        "isArray",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            Ok(Value::boolean(
                args.first()
                    .and_then(|v| v.as_object())
                    .is_some_and(|o| o.is_array()),
            ))
        },
    );
    define_species(&constructor, function_proto);

    define_method(
        &array_proto,
        "push",
        1,
        Some(function_proto.clone()),
        |_cx, this, args| {
            let Some(array) = this.as_object() else {
                return Ok(Value::number(0.0));
            };
            let mut length = array.array_length();
            for arg in args {
                array.define_property(
                    PropertyKey::index(length),
                    arg.clone(),
                    PropertyAttributes::EMPTY,
                );
                length += 1;
            }
            Ok(Value::number(array.array_length() as f64))
        },
    );

    define_method(
        &array_proto,
        "pop",
        0,
        Some(function_proto.clone()),
        |cx, this, _args| {
            let Some(array) = this.as_object() else {
                return Ok(Value::undefined());
            };
            let length = array.array_length();
            if length == 0 {
                return Ok(Value::undefined());
            }
            let key = PropertyKey::index(length - 1);
            let value = array.get(cx, &key)?.unwrap_or_else(Value::undefined);
            array.delete(&key);
            let _ = array.instance_put_length(length - 1);
            Ok(value)
        },
    );

    define_method(
        &array_proto,
        "join",
        1,
        Some(function_proto.clone()),
        |cx, this, args| {
            let Some(array) = this.as_object() else {
                return Ok(Value::string(""));
            };
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(other) => other.to_js_string(),
            };
            let mut parts = Vec::with_capacity(array.array_length() as usize);
            for i in 0..array.array_length() {
                let piece = array
                    .get(cx, &PropertyKey::index(i))?
                    .filter(|v| !v.is_nullish())
                    .map(|v| v.to_js_string())
                    .unwrap_or_default();
                parts.push(piece);
            }
            Ok(Value::string(parts.join(&separator)))
        },
    );

    define_method(
        &array_proto,
        "indexOf",
        1,
        Some(function_proto.clone()),
        |cx, this, args| {
            let Some(array) = this.as_object() else {
                return Ok(Value::number(-1.0));
            };
            let needle = args.first().cloned().unwrap_or_else(Value::undefined);
            for i in 0..array.array_length() {
                if let Some(value) = array.get(cx, &PropertyKey::index(i))?
                    && value.strict_equals(&needle)
                {
                    return Ok(Value::number(i as f64));
                }
            }
            Ok(Value::number(-1.0))
        },
    );

    define_method(
        &array_proto,
        "toString",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| {
            Ok(Value::string(match this.as_object() {
                Some(array) => array.default_string(),
                None => String::new(),
            }))
        },
    );

    register_constructor(global, "Array", &constructor, &array_proto);
}

impl ScriptObject {
    /// Resize an array's length slot (builtin helper)
    pub(crate) fn instance_put_length(&self, length: u32) -> JsResult<()> {
        if let crate::object::ObjectData::Array { length: slot } = self.data() {
            *slot.write() = length;
        }
        Ok(())
    }
}
