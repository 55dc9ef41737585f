//! RegExp runtime state and execution semantics
//!
//! A RegExp instance holds a shared compiled program (replaceable through
//! `compile`) plus its own `lastIndex`. The seven reflective properties are
//! computed from the program and surface as PERMANENT|READONLY|DONTENUM
//! instance-id slots. `exec_sub` implements the engine-level execution
//! shared by `exec`, `test` and the symbol protocols, including the legacy
//! static state (`RegExp.$1..$9`, lastMatch, contexts).

use std::sync::Arc;

use parking_lot::RwLock;

use marten_regexp::{CompiledRegExp, RegExpMatch};
use marten_vm_compiler::LanguageVersion;

use crate::context::Context;
use crate::error::{EngineError, JsResult};
use crate::hooks::{RegExpLoader, RegExpProxy};
use crate::object::{PropertyAttributes, PropertyKey, ScriptObject};
use crate::value::Value;

pub use crate::intrinsics_impl::regexp::new_regexp;

/// How the result of an execution is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// `test`: a boolean
    Test,
    /// `exec`/`match`: a result array or null
    Match,
    /// Prefix probe: undefined instead of null on failure
    Prefix,
}

/// Per-instance RegExp state
pub struct RegExpData {
    compiled: RwLock<Arc<CompiledRegExp>>,
    last_index: RwLock<f64>,
    last_index_attributes: RwLock<PropertyAttributes>,
}

impl RegExpData {
    /// Wrap a compiled program
    pub fn new(compiled: Arc<CompiledRegExp>) -> Self {
        Self {
            compiled: RwLock::new(compiled),
            last_index: RwLock::new(0.0),
            last_index_attributes: RwLock::new(PropertyAttributes::new(
                PropertyAttributes::PERMANENT | PropertyAttributes::DONTENUM,
            )),
        }
    }

    /// The shared compiled program
    pub fn compiled(&self) -> Arc<CompiledRegExp> {
        self.compiled.read().clone()
    }

    /// Re-point at a new compiled program (`compile()`), resetting
    /// `lastIndex`.
    pub fn replace_compiled(&self, compiled: Arc<CompiledRegExp>) {
        *self.compiled.write() = compiled;
        *self.last_index.write() = 0.0;
    }

    /// Current `lastIndex`
    pub fn last_index(&self) -> f64 {
        *self.last_index.read()
    }

    /// Set `lastIndex` without consulting the attribute bitmap (script
    /// assignment goes through the object layer, which does consult it)
    pub fn set_last_index(&self, value: f64) {
        *self.last_index.write() = value;
    }

    /// Engine-internal `lastIndex` store; raises a type error when the slot
    /// was made readonly.
    pub fn store_last_index_checked(&self, value: f64) -> JsResult<()> {
        if self.last_index_attributes().is_readonly() {
            return Err(EngineError::type_error(
                "Cannot modify readonly property: lastIndex.",
            ));
        }
        *self.last_index.write() = value;
        Ok(())
    }

    /// Attribute bitmap of `lastIndex`
    pub fn last_index_attributes(&self) -> PropertyAttributes {
        *self.last_index_attributes.read()
    }

    /// Redefine the `lastIndex` attributes
    pub fn set_last_index_attributes(&self, attributes: PropertyAttributes) {
        *self.last_index_attributes.write() = attributes;
    }

    /// The `source` accessor value (`(?:)` for the empty pattern)
    pub fn source_string(&self) -> String {
        let compiled = self.compiled();
        let source = compiled.source();
        if source.is_empty() {
            "(?:)".to_string()
        } else {
            source.to_string()
        }
    }

    /// Canonical `/source/flags` form
    pub fn to_source_string(&self) -> String {
        format!(
            "/{}/{}",
            self.source_string(),
            self.compiled().flags().to_flag_string()
        )
    }

    // ==================== instance-id dispatch ====================

    /// Value of an id-based instance slot, if `name` names one
    pub fn instance_id_value(&self, name: &str) -> Option<Value> {
        let flags = self.compiled().flags();
        Some(match name {
            "lastIndex" => Value::number(self.last_index()),
            "source" => Value::string(self.source_string()),
            "flags" => Value::string(flags.to_flag_string()),
            "global" => Value::boolean(flags.global()),
            "ignoreCase" => Value::boolean(flags.ignore_case()),
            "multiline" => Value::boolean(flags.multiline()),
            "dotAll" => Value::boolean(flags.dot_all()),
            "sticky" => Value::boolean(flags.sticky()),
            _ => return None,
        })
    }

    /// Attributes of an id-based instance slot
    pub fn instance_id_attributes(&self, name: &str) -> Option<PropertyAttributes> {
        match name {
            "lastIndex" => Some(self.last_index_attributes()),
            "source" | "flags" | "global" | "ignoreCase" | "multiline" | "dotAll" | "sticky" => {
                Some(PropertyAttributes::frozen())
            }
            _ => None,
        }
    }
}

/// Legacy static match state exposed through the RegExp constructor
/// (`RegExp.$1..$9`, `$&`, `` $` ``, `$'`, `input`).
#[derive(Debug, Clone, Default)]
pub struct RegExpStatics {
    /// Subject of the last successful match
    pub input: String,
    /// Text of the last match (`$&`)
    pub last_match: String,
    /// Text preceding the last match (`` $` ``)
    pub left_context: String,
    /// Text following the last match (`$'`)
    pub right_context: String,
    /// Capture texts of the last match (`$1..`)
    pub parens: Vec<String>,
}

impl RegExpStatics {
    /// `$n` (1-based); empty when the group did not participate
    pub fn paren(&self, n: usize) -> &str {
        self.parens
            .get(n.wrapping_sub(1))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Engine-level execution: the shared machinery behind `exec`, `test` and
/// the symbol protocols.
///
/// With the GLOB or STICKY flag the search starts at `lastIndex` (out of
/// range resets it to 0 and yields no match), and a successful match stores
/// the new `lastIndex`. The legacy statics update on every successful
/// match; under language version 1.2 `leftContext` covers only the span
/// from the search start, later versions take the whole prefix.
pub fn exec_sub(
    cx: &Context,
    global: &Arc<ScriptObject>,
    regexp: &Arc<ScriptObject>,
    input: &str,
    match_type: MatchType,
) -> JsResult<Value> {
    let data = regexp
        .as_regexp()
        .ok_or_else(|| EngineError::type_error("RegExp method called on incompatible receiver"))?;
    let compiled = data.compiled();
    let flags = compiled.flags();
    let track_index = flags.global() || flags.sticky();

    let units: Vec<u16> = input.encode_utf16().collect();
    let start = if track_index { data.last_index() } else { 0.0 };
    if start < 0.0 || start > units.len() as f64 {
        data.store_last_index_checked(0.0)?;
        return Ok(no_match_value(match_type));
    }

    let found = compiled.find_from(&units, start as usize)?;
    let Some(found) = found else {
        if track_index {
            data.store_last_index_checked(0.0)?;
        }
        return Ok(no_match_value(match_type));
    };

    update_statics(cx, input, &units, start as usize, &found);
    if track_index {
        data.store_last_index_checked(found.end as f64)?;
    }

    match match_type {
        MatchType::Test => Ok(Value::boolean(true)),
        MatchType::Match | MatchType::Prefix => {
            Ok(build_match_result(input, &units, &found, global))
        }
    }
}

fn no_match_value(match_type: MatchType) -> Value {
    match match_type {
        MatchType::Prefix => Value::undefined(),
        _ => Value::null(),
    }
}

fn slice_units(units: &[u16], start: usize, end: usize) -> String {
    String::from_utf16_lossy(&units[start.min(units.len())..end.min(units.len())])
}

fn update_statics(cx: &Context, input: &str, units: &[u16], search_start: usize, m: &RegExpMatch) {
    let left_context = if cx.language_version() == LanguageVersion::V1_2 {
        slice_units(units, search_start, m.start)
    } else {
        slice_units(units, 0, m.start)
    };
    let statics = RegExpStatics {
        input: input.to_string(),
        last_match: slice_units(units, m.start, m.end),
        left_context,
        right_context: slice_units(units, m.end, units.len()),
        parens: m
            .captures
            .iter()
            .map(|c| match c {
                Some((s, e)) => slice_units(units, *s, *e),
                None => String::new(),
            })
            .collect(),
    };
    cx.update_regexp_statics(statics);
}

/// Result array: slot 0 is the matched text, slots 1..n the captures
/// (undefined for non-participating groups); `index` and `input` are set
/// last so for-in enumeration sees the numbered slots first.
fn build_match_result(
    input: &str,
    units: &[u16],
    m: &RegExpMatch,
    global: &Arc<ScriptObject>,
) -> Value {
    let array = ScriptObject::array(crate::interpreter::builtin_prototype(global, "Array"));
    array.define_property(
        PropertyKey::index(0),
        Value::string(slice_units(units, m.start, m.end)),
        PropertyAttributes::EMPTY,
    );
    for (i, capture) in m.captures.iter().enumerate() {
        let value = match capture {
            Some((s, e)) => Value::string(slice_units(units, *s, *e)),
            None => Value::undefined(),
        };
        array.define_property(PropertyKey::index(i as u32 + 1), value, PropertyAttributes::EMPTY);
    }
    array.define_property(
        PropertyKey::string("index"),
        Value::number(m.start as f64),
        PropertyAttributes::EMPTY,
    );
    array.define_property(
        PropertyKey::string("input"),
        Value::string(input),
        PropertyAttributes::EMPTY,
    );
    Value::object(array)
}

/// Advance an index one character: by a full surrogate pair in unicode
/// mode, one UTF-16 unit otherwise. The empty-match stepping rule of the
/// `Symbol.match` and `Symbol.matchAll` loops.
pub fn advance_string_index(units: &[u16], index: usize, unicode: bool) -> usize {
    if unicode
        && index + 1 < units.len()
        && (0xD800..=0xDBFF).contains(&units[index])
        && (0xDC00..=0xDFFF).contains(&units[index + 1])
    {
        index + 2
    } else {
        index + 1
    }
}

// ==================== pluggable provider ====================

/// The in-tree regexp provider
pub struct BuiltinRegExpLoader;

impl RegExpLoader for BuiltinRegExpLoader {
    fn new_proxy(&self) -> Arc<dyn RegExpProxy> {
        Arc::new(BuiltinRegExpProxy)
    }
}

/// Proxy backed by the engine's own RegExp implementation
pub struct BuiltinRegExpProxy;

impl RegExpProxy for BuiltinRegExpProxy {
    fn is_regexp(&self, value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|o| o.as_regexp().is_some())
    }

    fn compile_regexp(&self, cx: &Context, source: &str, flags: &str) -> JsResult<Value> {
        let global = cx
            .top_call_scope()
            .ok_or_else(|| EngineError::illegal_state("no scope is active"))?;
        crate::intrinsics_impl::regexp::new_regexp(cx, &global, source, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_string_index() {
        let plain: Vec<u16> = "ab".encode_utf16().collect();
        assert_eq!(advance_string_index(&plain, 0, true), 1);
        let astral: Vec<u16> = "\u{1F600}b".encode_utf16().collect();
        assert_eq!(advance_string_index(&astral, 0, false), 1);
        assert_eq!(advance_string_index(&astral, 0, true), 2);
        assert_eq!(advance_string_index(&astral, 2, true), 3);
    }

    #[test]
    fn test_instance_id_slots() {
        let compiled = Arc::new(CompiledRegExp::compile("a(b)", "gi").unwrap());
        let data = RegExpData::new(compiled);
        assert_eq!(
            data.instance_id_value("source").unwrap().to_js_string(),
            "a(b)"
        );
        assert_eq!(
            data.instance_id_value("flags").unwrap().to_js_string(),
            "gi"
        );
        assert_eq!(
            data.instance_id_value("global").unwrap().to_boolean(),
            true
        );
        assert_eq!(
            data.instance_id_value("sticky").unwrap().to_boolean(),
            false
        );
        assert!(data.instance_id_value("exec").is_none());
        assert!(data.instance_id_attributes("source").unwrap().is_readonly());
    }

    #[test]
    fn test_empty_source_prints_non_empty() {
        let compiled = Arc::new(CompiledRegExp::compile("", "").unwrap());
        let data = RegExpData::new(compiled);
        assert_eq!(data.to_source_string(), "/(?:)/");
    }

    #[test]
    fn test_readonly_last_index_store_fails() {
        let compiled = Arc::new(CompiledRegExp::compile("a", "g").unwrap());
        let data = RegExpData::new(compiled);
        data.set_last_index_attributes(PropertyAttributes::frozen());
        assert!(data.store_last_index_checked(3.0).is_err());
    }
}
