//! RegExp constructor and prototype
//!
//! Prototype methods dispatch through a compact id enum (one native closure
//! per id, a single switch body), the constructor carries the legacy static
//! accessors (`$1..$9`, `lastMatch`, contexts) and the `@@species` getter.

use std::sync::Arc;

use parking_lot::Mutex;

use marten_regexp::{CompiledRegExp, RegExpFlags};

use crate::context::Context;
use crate::error::{EngineError, JsResult};
use crate::interpreter::{builtin_prototype, construct_value};
use crate::intrinsics::{
    define_species, define_symbol_method, native_function, register_constructor,
};
use crate::object::{ObjectData, PropertyAttributes, PropertyKey, ScriptObject};
use crate::regexp::{MatchType, RegExpData, advance_string_index, exec_sub};
use crate::value::{Value, well_known};

/// Prototype method ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtoId {
    Compile,
    ToString,
    ToSource,
    Exec,
    Test,
    Prefix,
    Match,
    MatchAll,
    Search,
}

impl ProtoId {
    fn name(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::ToString => "toString",
            Self::ToSource => "toSource",
            Self::Exec => "exec",
            Self::Test => "test",
            Self::Prefix => "prefix",
            Self::Match => "[Symbol.match]",
            Self::MatchAll => "[Symbol.matchAll]",
            Self::Search => "[Symbol.search]",
        }
    }

    fn arity(self) -> u16 {
        match self {
            Self::Compile => 2,
            Self::ToString | Self::ToSource => 0,
            _ => 1,
        }
    }
}

// ==================== construction ====================

/// Escape naked `/` characters so the stored source round-trips through the
/// literal syntax.
fn escape_naked_slashes(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut escaped = false;
    for c in source.chars() {
        if c == '/' && !escaped {
            out.push('\\');
        }
        out.push(c);
        escaped = c == '\\' && !escaped;
    }
    out
}

fn compile_pattern(cx: &Context, source: &str, flags: &str) -> JsResult<Arc<CompiledRegExp>> {
    let parsed = RegExpFlags::parse(flags)?;
    let allow_lookbehind = cx.language_version().is_es6();
    Ok(Arc::new(CompiledRegExp::compile_flags(
        source,
        parsed,
        allow_lookbehind,
    )?))
}

/// Resolve `(pattern, flags)` constructor arguments to a compiled program.
///
/// An existing RegExp with no flags argument shares its program verbatim;
/// RegExp-plus-flags requires ES6 or later. String sources get naked `/`
/// escaped before compilation.
fn compiled_from_args(cx: &Context, args: &[Value]) -> JsResult<Arc<CompiledRegExp>> {
    let pattern = args.first().cloned().unwrap_or_else(Value::undefined);
    let flags_arg = args.get(1).filter(|f| !f.is_undefined());
    if let Some(data) = pattern.as_object().and_then(|o| o.as_regexp()) {
        return match flags_arg {
            None => Ok(data.compiled()),
            Some(flags) => {
                if !cx.language_version().is_es6() {
                    return Err(EngineError::type_error(
                        "only one argument may be specified if the first argument \
                         to RegExp.prototype.compile is a RegExp object.",
                    ));
                }
                compile_pattern(cx, data.compiled().source(), &flags.to_js_string())
            }
        };
    }
    let source = if pattern.is_undefined() {
        String::new()
    } else {
        escape_naked_slashes(&pattern.to_js_string())
    };
    let flags = flags_arg.map(|f| f.to_js_string()).unwrap_or_default();
    compile_pattern(cx, &source, &flags)
}

/// Create a RegExp instance from a pattern and flag string (used for
/// literals, the constructor and the pluggable provider).
pub fn new_regexp(
    cx: &Context,
    global: &Arc<ScriptObject>,
    source: &str,
    flags: &str,
) -> JsResult<Value> {
    let compiled = compile_pattern(cx, &escape_naked_slashes(source), flags)?;
    Ok(instance_with_program(global, compiled))
}

fn instance_with_program(global: &Arc<ScriptObject>, compiled: Arc<CompiledRegExp>) -> Value {
    let proto = builtin_prototype(global, "RegExp");
    Value::object(ScriptObject::with_data(
        ObjectData::RegExp(RegExpData::new(compiled)),
        "RegExp",
        proto,
    ))
}

fn this_regexp(this: &Value) -> JsResult<Arc<ScriptObject>> {
    this.as_object()
        .filter(|o| o.as_regexp().is_some())
        .cloned()
        .ok_or_else(|| {
            EngineError::type_error("RegExp method called on incompatible receiver")
        })
}

fn subject_string(args: &[Value]) -> String {
    args.first()
        .cloned()
        .unwrap_or_else(Value::undefined)
        .to_js_string()
}

// ==================== prototype dispatch ====================

fn proto_method(
    cx: &Context,
    global: &Arc<ScriptObject>,
    id: ProtoId,
    this: &Value,
    args: &[Value],
) -> JsResult<Value> {
    match id {
        ProtoId::Compile => {
            let object = this_regexp(this)?;
            let compiled = compiled_from_args(cx, args)?;
            let data = object
                .as_regexp()
                .ok_or_else(|| EngineError::type_error("not a RegExp"))?;
            data.replace_compiled(compiled);
            Ok(this.clone())
        }
        ProtoId::ToString | ProtoId::ToSource => {
            // Observed contract: a non-RegExp receiver prints whatever its
            // source/flags properties hold, missing ones as "undefined".
            if let Ok(object) = this_regexp(this) {
                let data = object
                    .as_regexp()
                    .ok_or_else(|| EngineError::type_error("not a RegExp"))?;
                return Ok(Value::string(data.to_source_string()));
            }
            let read = |name: &str| -> JsResult<String> {
                match this.as_object() {
                    Some(object) => Ok(object
                        .get(cx, &PropertyKey::string(name))?
                        .unwrap_or_else(Value::undefined)
                        .to_js_string()),
                    None => Ok("undefined".to_string()),
                }
            };
            Ok(Value::string(format!("/{}/{}", read("source")?, read("flags")?)))
        }
        ProtoId::Exec => {
            let object = this_regexp(this)?;
            exec_sub(cx, global, &object, &subject_string(args), MatchType::Match)
        }
        ProtoId::Test => {
            let object = this_regexp(this)?;
            let result = exec_sub(cx, global, &object, &subject_string(args), MatchType::Test)?;
            Ok(Value::boolean(result.to_boolean()))
        }
        ProtoId::Prefix => {
            let object = this_regexp(this)?;
            exec_sub(cx, global, &object, &subject_string(args), MatchType::Prefix)
        }
        ProtoId::Match => symbol_match_impl(cx, global, this, &subject_string(args)),
        ProtoId::MatchAll => symbol_match_all_impl(cx, global, this, &subject_string(args)),
        ProtoId::Search => symbol_search_impl(cx, global, this, &subject_string(args)),
    }
}

// ==================== symbol protocols ====================

/// `RegExp.prototype[Symbol.match]`: a single exec without the global flag;
/// with it, every match's text collected with the empty-match advance rule
/// (surrogate-aware under `u`).
pub(crate) fn symbol_match_impl(
    cx: &Context,
    global: &Arc<ScriptObject>,
    regexp: &Value,
    subject: &str,
) -> JsResult<Value> {
    let object = this_regexp(regexp)?;
    let data = object
        .as_regexp()
        .ok_or_else(|| EngineError::type_error("not a RegExp"))?;
    let flags = data.compiled().flags();
    if !flags.global() {
        return exec_sub(cx, global, &object, subject, MatchType::Match);
    }
    data.store_last_index_checked(0.0)?;
    let units: Vec<u16> = subject.encode_utf16().collect();
    let results = ScriptObject::array(builtin_prototype(global, "Array"));
    let mut count = 0u32;
    loop {
        let result = exec_sub(cx, global, &object, subject, MatchType::Match)?;
        if result.is_null() {
            break;
        }
        let matched = result
            .as_object()
            .and_then(|a| a.raw_get(&PropertyKey::index(0)))
            .map(|v| v.to_js_string())
            .unwrap_or_default();
        if matched.is_empty() {
            let here = data.last_index().max(0.0) as usize;
            let next = advance_string_index(&units, here, flags.unicode());
            data.store_last_index_checked(next as f64)?;
        }
        results.define_property(
            PropertyKey::index(count),
            Value::string(matched),
            PropertyAttributes::EMPTY,
        );
        count += 1;
    }
    if count == 0 {
        Ok(Value::null())
    } else {
        Ok(Value::object(results))
    }
}

/// `RegExp.prototype[Symbol.search]`: the index of a single match, -1 when
/// none; `lastIndex` is saved across the probe.
pub(crate) fn symbol_search_impl(
    cx: &Context,
    global: &Arc<ScriptObject>,
    regexp: &Value,
    subject: &str,
) -> JsResult<Value> {
    let object = this_regexp(regexp)?;
    let data = object
        .as_regexp()
        .ok_or_else(|| EngineError::type_error("not a RegExp"))?;
    let previous = data.last_index();
    data.set_last_index(0.0);
    let result = exec_sub(cx, global, &object, subject, MatchType::Match);
    data.set_last_index(previous);
    let result = result?;
    Ok(match result
        .as_object()
        .and_then(|a| a.raw_get(&PropertyKey::string("index")))
    {
        Some(index) => index,
        None => Value::number(-1.0),
    })
}

struct MatchAllState {
    matcher: Arc<ScriptObject>,
    subject: String,
    global_flag: bool,
    unicode: bool,
    done: bool,
}

/// `RegExp.prototype[Symbol.matchAll]`: builds a fresh matcher through the
/// species constructor, copies `lastIndex` across, and returns a lazy
/// iterator of successive exec results.
pub(crate) fn symbol_match_all_impl(
    cx: &Context,
    global: &Arc<ScriptObject>,
    regexp: &Value,
    subject: &str,
) -> JsResult<Value> {
    let Some(receiver) = regexp.as_object() else {
        return Err(EngineError::type_error(
            "RegExp.prototype[Symbol.matchAll] called on non-object",
        ));
    };
    let data = receiver
        .as_regexp()
        .ok_or_else(|| EngineError::type_error("not a RegExp"))?;
    let flags = data.compiled().flags();
    let flags_string = flags.to_flag_string();

    // Derive the species constructor from the receiver.
    let species = receiver
        .get(cx, &PropertyKey::string("constructor"))?
        .and_then(|ctor| {
            ctor.as_object().and_then(|c| {
                c.raw_get(&PropertyKey::symbol(well_known::species_symbol()))
                    .or(Some(ctor.clone()))
            })
        })
        .filter(|s| s.as_object().is_some_and(|o| o.is_callable()));
    let matcher_value = match species {
        Some(species) => construct_value(
            cx,
            &species,
            &[regexp.clone(), Value::string(flags_string.clone())],
        )?,
        None => instance_with_program(global, data.compiled()),
    };
    let matcher = this_regexp(&matcher_value)?;
    if let Some(matcher_data) = matcher.as_regexp() {
        matcher_data.set_last_index(data.last_index());
    }

    let state = Arc::new(Mutex::new(MatchAllState {
        matcher,
        subject: subject.to_string(),
        global_flag: flags.global(),
        unicode: flags.unicode(),
        done: false,
    }));

    let iterator = ScriptObject::with_data(
        ObjectData::Plain,
        "RegExp String Iterator",
        builtin_prototype(global, "Object"),
    );
    let next_global = global.clone();
    let function_proto = builtin_prototype(global, "Function");
    let next = native_function("next", 0, function_proto.clone(), move |cx, _this, _args| {
        let mut state = state.lock();
        if state.done {
            return Ok(iter_result(&next_global, Value::undefined(), true));
        }
        let result = exec_sub(
            cx,
            &next_global,
            &state.matcher,
            &state.subject,
            MatchType::Match,
        )?;
        if result.is_null() {
            state.done = true;
            return Ok(iter_result(&next_global, Value::undefined(), true));
        }
        if !state.global_flag {
            state.done = true;
            return Ok(iter_result(&next_global, result, false));
        }
        let matched = result
            .as_object()
            .and_then(|a| a.raw_get(&PropertyKey::index(0)))
            .map(|v| v.to_js_string())
            .unwrap_or_default();
        if matched.is_empty()
            && let Some(matcher_data) = state.matcher.as_regexp()
        {
            let units: Vec<u16> = state.subject.encode_utf16().collect();
            let here = matcher_data.last_index().max(0.0) as usize;
            let next = advance_string_index(&units, here, state.unicode);
            matcher_data.store_last_index_checked(next as f64)?;
        }
        Ok(iter_result(&next_global, result, false))
    });
    iterator.define_property(
        PropertyKey::string("next"),
        Value::object(next),
        PropertyAttributes::dontenum(),
    );
    define_symbol_method(
        &iterator,
        well_known::iterator_symbol(),
        "[Symbol.iterator]",
        0,
        function_proto,
        |_cx, this, _args| Ok(this.clone()),
    );
    Ok(Value::object(iterator))
}

fn iter_result(global: &Arc<ScriptObject>, value: Value, done: bool) -> Value {
    let result = ScriptObject::plain(builtin_prototype(global, "Object"));
    result.define_property(PropertyKey::string("value"), value, PropertyAttributes::EMPTY);
    result.define_property(
        PropertyKey::string("done"),
        Value::boolean(done),
        PropertyAttributes::EMPTY,
    );
    Value::object(result)
}

// ==================== initialization ====================

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    let regexp_proto = ScriptObject::plain(Some(object_proto.clone()));

    let ctor_global = global.clone();
    let constructor = native_function(
        "RegExp",
        2,
        Some(function_proto.clone()),
        move |cx, _this, args| {
            let compiled = compiled_from_args(cx, args)?;
            Ok(instance_with_program(&ctor_global, compiled))
        },
    );
    define_species(&constructor, function_proto);
    install_statics_accessors(&constructor, function_proto);

    let string_ids = [
        ProtoId::Compile,
        ProtoId::ToString,
        ProtoId::ToSource,
        ProtoId::Exec,
        ProtoId::Test,
        ProtoId::Prefix,
    ];
    for id in string_ids {
        let method_global = global.clone();
        let function = native_function(
            id.name(),
            id.arity(),
            Some(function_proto.clone()),
            move |cx, this, args| proto_method(cx, &method_global, id, this, args),
        );
        regexp_proto.define_property(
            PropertyKey::string(id.name()),
            Value::object(function),
            PropertyAttributes::dontenum(),
        );
    }
    let symbol_ids = [
        (ProtoId::Match, well_known::match_symbol()),
        (ProtoId::MatchAll, well_known::match_all_symbol()),
        (ProtoId::Search, well_known::search_symbol()),
    ];
    for (id, symbol) in symbol_ids {
        let method_global = global.clone();
        let function = native_function(
            id.name(),
            id.arity(),
            Some(function_proto.clone()),
            move |cx, this, args| proto_method(cx, &method_global, id, this, args),
        );
        regexp_proto.define_property(
            PropertyKey::symbol(symbol),
            Value::object(function),
            PropertyAttributes::dontenum(),
        );
    }

    register_constructor(global, "RegExp", &constructor, &regexp_proto);
}

/// The legacy static accessors on the constructor, backed by the context's
/// RegExp statics.
fn install_statics_accessors(
    constructor: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    fn accessor(
        constructor: &Arc<ScriptObject>,
        function_proto: &Arc<ScriptObject>,
        names: &[&str],
        read: impl Fn(&crate::regexp::RegExpStatics) -> String + Send + Sync + Clone + 'static,
    ) {
        for name in names {
            let read = read.clone();
            let getter = native_function(
                name,
                0,
                Some(function_proto.clone()),
                move |cx, _this, _args| Ok(Value::string(read(&cx.regexp_statics()))),
            );
            constructor.define_accessor(
                PropertyKey::string(name),
                Some(Value::object(getter)),
                None,
                PropertyAttributes::dontenum(),
            );
        }
    }

    for n in 1..=9usize {
        let name = format!("${}", n);
        accessor(constructor, function_proto, &[name.as_str()], move |s| {
            s.paren(n).to_string()
        });
    }
    accessor(constructor, function_proto, &["lastMatch", "$&"], |s| {
        s.last_match.clone()
    });
    accessor(constructor, function_proto, &["leftContext", "$`"], |s| {
        s.left_context.clone()
    });
    accessor(constructor, function_proto, &["rightContext", "$'"], |s| {
        s.right_context.clone()
    });
    accessor(constructor, function_proto, &["input", "$_"], |s| {
        s.input.clone()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_naked_slashes() {
        assert_eq!(escape_naked_slashes("a/b"), "a\\/b");
        assert_eq!(escape_naked_slashes("a\\/b"), "a\\/b");
        assert_eq!(escape_naked_slashes("a\\\\/b"), "a\\\\\\/b");
        assert_eq!(escape_naked_slashes("ab"), "ab");
    }
}
