//! Symbol constructor (ES6 and later)

use std::sync::Arc;

use crate::context::Context;
use crate::error::EngineError;
use crate::intrinsics::{define_method, native_function, register_constructor};
use crate::object::{PropertyAttributes, PropertyKey, ScriptObject};
use crate::value::{JsSymbol, Value, well_known};

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    let proto = ScriptObject::plain(Some(object_proto.clone()));
    let constructor = native_function(
        "Symbol",
        0,
        Some(function_proto.clone()),
        |_cx, this, args| {
            if this.as_object().is_some_and(|o| !o.is_callable()) {
                return Err(EngineError::type_error("Symbol is not a constructor"));
            }
            let description = args
                .first()
                .filter(|d| !d.is_undefined())
                .map(|d| d.to_js_string());
            Ok(Value::Symbol(JsSymbol::new(description)))
        },
    );

    let frozen = PropertyAttributes::frozen();
    constructor.define_property(
        PropertyKey::string("match"),
        Value::Symbol(well_known::match_symbol()),
        frozen,
    );
    constructor.define_property(
        PropertyKey::string("matchAll"),
        Value::Symbol(well_known::match_all_symbol()),
        frozen,
    );
    constructor.define_property(
        PropertyKey::string("search"),
        Value::Symbol(well_known::search_symbol()),
        frozen,
    );
    constructor.define_property(
        PropertyKey::string("species"),
        Value::Symbol(well_known::species_symbol()),
        frozen,
    );
    constructor.define_property(
        PropertyKey::string("iterator"),
        Value::Symbol(well_known::iterator_symbol()),
        frozen,
    );

    define_method(
        &proto,
        "toString",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| match this {
            Value::Symbol(symbol) => Ok(Value::string(format!(
                "Symbol({})",
                symbol.description.as_deref().unwrap_or_default()
            ))),
            _ => Err(EngineError::type_error(
                "Symbol.prototype.toString called on incompatible receiver",
            )),
        },
    );

    register_constructor(global, "Symbol", &constructor, &proto);
}
