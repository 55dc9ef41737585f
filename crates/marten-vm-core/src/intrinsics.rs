//! Standard scope initialization
//!
//! `init_standard_objects` populates a host-provided (or fresh) scope with
//! the standard builtins. Every constructor lands on the scope under its
//! canonical name with the DONTENUM attribute; each prototype carries a
//! DONTENUM `constructor` back-reference. With `sealed`, every produced
//! builtin rejects later modification.

use std::sync::Arc;

use crate::context::Context;
use crate::error::JsResult;
use crate::object::{
    FunctionKind, NativeFn, ObjectData, PropertyAttributes, PropertyKey, ScriptObject,
};
use crate::value::Value;

/// Create a native function object
pub(crate) fn native_function(
    name: &str,
    length: u16,
    function_proto: Option<Arc<ScriptObject>>,
    body: impl Fn(&Context, &Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
) -> Arc<ScriptObject> {
    let function = ScriptObject::function(FunctionKind::Native(Arc::new(body)), function_proto);
    function.define_property(
        PropertyKey::string("name"),
        Value::string(name),
        PropertyAttributes::new(PropertyAttributes::READONLY | PropertyAttributes::DONTENUM),
    );
    function.define_property(
        PropertyKey::string("length"),
        Value::number(length as f64),
        PropertyAttributes::new(PropertyAttributes::READONLY | PropertyAttributes::DONTENUM),
    );
    function
}

/// Install a builtin method under a string name (DONTENUM)
pub(crate) fn define_method(
    target: &Arc<ScriptObject>,
    name: &str,
    length: u16,
    function_proto: Option<Arc<ScriptObject>>,
    body: impl Fn(&Context, &Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
) {
    let function = native_function(name, length, function_proto, body);
    target.define_property(
        PropertyKey::string(name),
        Value::object(function),
        PropertyAttributes::dontenum(),
    );
}

/// Install a builtin method under a symbol key (DONTENUM)
pub(crate) fn define_symbol_method(
    target: &Arc<ScriptObject>,
    symbol: Arc<crate::value::JsSymbol>,
    name: &str,
    length: u16,
    function_proto: Option<Arc<ScriptObject>>,
    body: impl Fn(&Context, &Value, &[Value]) -> JsResult<Value> + Send + Sync + 'static,
) {
    let function = native_function(name, length, function_proto, body);
    target.define_property(
        PropertyKey::symbol(symbol),
        Value::object(function),
        PropertyAttributes::dontenum(),
    );
}

/// Wire up a constructor/prototype pair and install the constructor on the
/// scope under `name` (DONTENUM).
pub(crate) fn register_constructor(
    scope: &Arc<ScriptObject>,
    name: &str,
    constructor: &Arc<ScriptObject>,
    prototype: &Arc<ScriptObject>,
) {
    constructor.define_property(
        PropertyKey::string("prototype"),
        Value::object(prototype.clone()),
        PropertyAttributes::frozen(),
    );
    prototype.define_property(
        PropertyKey::string("constructor"),
        Value::object(constructor.clone()),
        PropertyAttributes::dontenum(),
    );
    scope.define_property(
        PropertyKey::string(name),
        Value::object(constructor.clone()),
        PropertyAttributes::dontenum(),
    );
}

/// Define the ES6 `@@species` accessor returning the receiver
pub(crate) fn define_species(constructor: &Arc<ScriptObject>, function_proto: &Arc<ScriptObject>) {
    let getter = native_function(
        "get [Symbol.species]",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| Ok(this.clone()),
    );
    constructor.define_accessor(
        PropertyKey::symbol(crate::value::well_known::species_symbol()),
        Some(Value::object(getter)),
        None,
        PropertyAttributes::dontenum(),
    );
}

/// Populate `scope` (or a fresh global) with the standard builtins.
pub fn init_standard_objects(
    cx: &Context,
    scope: Option<Arc<ScriptObject>>,
    sealed: bool,
) -> Arc<ScriptObject> {
    let global =
        scope.unwrap_or_else(|| ScriptObject::with_data(ObjectData::Plain, "global", None));

    // The two root prototypes come first; everything else hangs off them.
    let object_proto = ScriptObject::plain(None);
    let noop: NativeFn = Arc::new(|_cx, _this, _args| Ok(Value::undefined()));
    let function_proto =
        ScriptObject::function(FunctionKind::Native(noop), Some(object_proto.clone()));
    global.set_prototype(Some(object_proto.clone()));

    crate::intrinsics_impl::object::init(cx, &global, &object_proto, &function_proto);
    crate::intrinsics_impl::function::init(cx, &global, &object_proto, &function_proto);
    crate::intrinsics_impl::array::init(cx, &global, &object_proto, &function_proto);
    crate::intrinsics_impl::string::init(cx, &global, &object_proto, &function_proto);
    crate::intrinsics_impl::misc::init(cx, &global, &object_proto, &function_proto);
    crate::intrinsics_impl::errors::init(cx, &global, &object_proto, &function_proto);
    crate::intrinsics_impl::regexp::init(cx, &global, &object_proto, &function_proto);
    if cx.language_version().is_es6() {
        crate::intrinsics_impl::symbol::init(cx, &global, &object_proto, &function_proto);
    }

    if sealed {
        seal_builtins(&global, &object_proto, &function_proto);
    }
    tracing::debug!(sealed, "standard objects initialized");
    global
}

/// The safe variant omits any host-interop surface; the core carries none,
/// so the sets coincide.
pub fn init_safe_standard_objects(
    cx: &Context,
    scope: Option<Arc<ScriptObject>>,
    sealed: bool,
) -> Arc<ScriptObject> {
    init_standard_objects(cx, scope, sealed)
}

const BUILTIN_NAMES: &[&str] = &[
    "Object", "Function", "Array", "String", "Boolean", "Number", "Math", "Error", "TypeError",
    "RangeError", "SyntaxError", "ReferenceError", "EvalError", "URIError", "RegExp", "Symbol",
];

fn seal_builtins(
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    object_proto.seal_object();
    function_proto.seal_object();
    for name in BUILTIN_NAMES {
        let Some(value) = global.raw_get(&PropertyKey::string(name)) else {
            continue;
        };
        let Some(object) = value.as_object() else {
            continue;
        };
        if let Some(proto) = object
            .raw_get(&PropertyKey::string("prototype"))
            .and_then(|p| p.as_object().cloned())
        {
            proto.seal_object();
        }
        object.seal_object();
    }
}
