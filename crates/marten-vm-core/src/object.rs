//! Script objects and the prototype model
//!
//! Property tables are insertion-ordered; enumeration applies the ES6 rule
//! (integer-indexed keys numerically first) when the context enables it.
//! Attributes are a compact bitmap: READONLY, DONTENUM, PERMANENT.
//! Builtins with id-based instance slots (RegExp, Array length) resolve
//! those ids before the property table.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use marten_vm_bytecode::ScriptFunction;

use crate::context::Context;
use crate::error::{EngineError, JsResult};
use crate::regexp::RegExpData;
use crate::value::{JsSymbol, Value, number_to_string};

/// Native function implementation
pub type NativeFn = Arc<dyn Fn(&Context, &Value, &[Value]) -> JsResult<Value> + Send + Sync>;

/// A property key: string, integer index or symbol
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String key (never a canonical array index)
    String(Arc<str>),
    /// Integer-indexed key
    Index(u32),
    /// Symbol key
    Symbol(SymbolKey),
}

/// Symbol key wrapper hashing by symbol identity
#[derive(Clone, Debug)]
pub struct SymbolKey(pub Arc<JsSymbol>);

impl PartialEq for SymbolKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for SymbolKey {}

impl std::hash::Hash for SymbolKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl PropertyKey {
    /// Create a key from a name, normalizing canonical array indices
    pub fn string(name: &str) -> Self {
        if let Some(index) = canonical_index(name) {
            return Self::Index(index);
        }
        Self::String(Arc::from(name))
    }

    /// Create an index key
    pub fn index(index: u32) -> Self {
        Self::Index(index)
    }

    /// Create a symbol key
    pub fn symbol(symbol: Arc<JsSymbol>) -> Self {
        Self::Symbol(SymbolKey(symbol))
    }

    /// Create a key from a value (property access through `[]`)
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Symbol(s) => Self::symbol(s.clone()),
            Value::Number(n) => {
                if *n >= 0.0 && *n < u32::MAX as f64 && *n == n.trunc() {
                    Self::Index(*n as u32)
                } else {
                    Self::string(&number_to_string(*n))
                }
            }
            other => Self::string(&other.to_js_string()),
        }
    }

    /// Display name of the key
    pub fn display(&self) -> String {
        match self {
            Self::String(s) => s.to_string(),
            Self::Index(i) => i.to_string(),
            Self::Symbol(s) => format!(
                "Symbol({})",
                s.0.description.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// A string that is a canonical array index
fn canonical_index(name: &str) -> Option<u32> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    name.parse::<u32>().ok().filter(|&i| i != u32::MAX)
}

/// Property attribute bitmap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropertyAttributes(u8);

impl PropertyAttributes {
    /// Writable, enumerable, deletable
    pub const EMPTY: Self = Self(0);
    /// Assignment is ignored
    pub const READONLY: u8 = 0x01;
    /// Skipped by for-in enumeration
    pub const DONTENUM: u8 = 0x02;
    /// Cannot be deleted
    pub const PERMANENT: u8 = 0x04;

    /// Build from raw bits
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// DONTENUM only (the builtin-method default)
    pub const fn dontenum() -> Self {
        Self(Self::DONTENUM)
    }

    /// PERMANENT | READONLY | DONTENUM (computed builtin slots)
    pub const fn frozen() -> Self {
        Self(Self::PERMANENT | Self::READONLY | Self::DONTENUM)
    }

    /// Raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// READONLY set
    pub fn is_readonly(self) -> bool {
        self.0 & Self::READONLY != 0
    }

    /// DONTENUM set
    pub fn is_dontenum(self) -> bool {
        self.0 & Self::DONTENUM != 0
    }

    /// PERMANENT set
    pub fn is_permanent(self) -> bool {
        self.0 & Self::PERMANENT != 0
    }
}

/// Property payload: plain data or accessor pair
#[derive(Clone)]
pub enum PropValue {
    /// Data property
    Data(Value),
    /// Accessor property
    Accessor {
        /// Getter function value
        getter: Option<Value>,
        /// Setter function value
        setter: Option<Value>,
    },
}

/// A stored property
#[derive(Clone)]
pub struct Property {
    /// Payload
    pub value: PropValue,
    /// Attribute bitmap
    pub attributes: PropertyAttributes,
}

/// Internal data of builtin object kinds
pub enum ObjectData {
    /// Ordinary object
    Plain,
    /// Array exotic object
    Array {
        /// Current array length
        length: RwLock<u32>,
    },
    /// Callable object
    Function(FunctionData),
    /// Compiled regular expression instance
    RegExp(RegExpData),
}

/// Function payload: a native implementation or a compiled unit plus its
/// lexical scope.
pub struct FunctionData {
    /// Implementation
    pub kind: FunctionKind,
}

/// The two function implementations
pub enum FunctionKind {
    /// Host-provided function
    Native(NativeFn),
    /// Compiled script function closing over `scope`
    Script {
        /// Compiled unit
        script: Arc<ScriptFunction>,
        /// Lexical scope captured at instantiation
        scope: Arc<ScriptObject>,
    },
}

/// A JavaScript object: property table, prototype link, parent scope link
/// (scope chains are separate from prototype chains), and builtin data.
pub struct ScriptObject {
    class_name: &'static str,
    properties: RwLock<IndexMap<PropertyKey, Property>>,
    prototype: RwLock<Option<Arc<ScriptObject>>>,
    parent_scope: RwLock<Option<Arc<ScriptObject>>>,
    sealed: AtomicBool,
    data: ObjectData,
}

impl ScriptObject {
    /// Create an ordinary object
    pub fn plain(prototype: Option<Arc<ScriptObject>>) -> Arc<Self> {
        Self::with_data(ObjectData::Plain, "Object", prototype)
    }

    /// Create an array
    pub fn array(prototype: Option<Arc<ScriptObject>>) -> Arc<Self> {
        Self::with_data(
            ObjectData::Array {
                length: RwLock::new(0),
            },
            "Array",
            prototype,
        )
    }

    /// Create a function object
    pub fn function(kind: FunctionKind, prototype: Option<Arc<ScriptObject>>) -> Arc<Self> {
        Self::with_data(
            ObjectData::Function(FunctionData { kind }),
            "Function",
            prototype,
        )
    }

    /// Create an object with explicit builtin data
    pub fn with_data(
        data: ObjectData,
        class_name: &'static str,
        prototype: Option<Arc<ScriptObject>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            class_name,
            properties: RwLock::new(IndexMap::new()),
            prototype: RwLock::new(prototype),
            parent_scope: RwLock::new(None),
            sealed: AtomicBool::new(false),
            data,
        })
    }

    /// The `[[Class]]` name
    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// Builtin data
    pub fn data(&self) -> &ObjectData {
        &self.data
    }

    /// The RegExp payload, when this is a RegExp instance
    pub fn as_regexp(&self) -> Option<&RegExpData> {
        match &self.data {
            ObjectData::RegExp(data) => Some(data),
            _ => None,
        }
    }

    /// The function payload, when this object is callable
    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.data {
            ObjectData::Function(data) => Some(data),
            _ => None,
        }
    }

    /// Is this object callable?
    pub fn is_callable(&self) -> bool {
        matches!(self.data, ObjectData::Function(_))
    }

    /// Is this an array?
    pub fn is_array(&self) -> bool {
        matches!(self.data, ObjectData::Array { .. })
    }

    /// Current prototype
    pub fn prototype(&self) -> Option<Arc<ScriptObject>> {
        self.prototype.read().clone()
    }

    /// Replace the prototype
    pub fn set_prototype(&self, prototype: Option<Arc<ScriptObject>>) {
        *self.prototype.write() = prototype;
    }

    /// Parent scope link (scope chains)
    pub fn parent_scope(&self) -> Option<Arc<ScriptObject>> {
        self.parent_scope.read().clone()
    }

    /// Set the parent scope link
    pub fn set_parent_scope(&self, parent: Option<Arc<ScriptObject>>) {
        *self.parent_scope.write() = parent;
    }

    /// Reject further modification of this object
    pub fn seal_object(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Is this object sealed?
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    // ==================== property access ====================

    /// Own property lookup, id-based builtin slots first.
    pub fn get_own(self: &Arc<Self>, cx: &Context, key: &PropertyKey) -> JsResult<Option<Value>> {
        if let Some(value) = self.instance_id_value(key) {
            return Ok(Some(value));
        }
        let property = self.properties.read().get(key).cloned();
        match property {
            Some(property) => match property.value {
                PropValue::Data(value) => Ok(Some(value)),
                PropValue::Accessor { getter, .. } => match getter {
                    Some(getter) => Ok(Some(crate::interpreter::call_value(
                        cx,
                        &getter,
                        &Value::object(self.clone()),
                        &[],
                    )?)),
                    None => Ok(Some(Value::undefined())),
                },
            },
            None => Ok(None),
        }
    }

    /// Property lookup through the prototype chain.
    pub fn get(self: &Arc<Self>, cx: &Context, key: &PropertyKey) -> JsResult<Option<Value>> {
        let mut object = self.clone();
        loop {
            // Accessors along the chain see the original receiver.
            if let Some(value) = object.instance_id_value(key) {
                return Ok(Some(value));
            }
            let property = object.properties.read().get(key).cloned();
            if let Some(property) = property {
                return match property.value {
                    PropValue::Data(value) => Ok(Some(value)),
                    PropValue::Accessor { getter, .. } => match getter {
                        Some(getter) => Ok(Some(crate::interpreter::call_value(
                            cx,
                            &getter,
                            &Value::object(self.clone()),
                            &[],
                        )?)),
                        None => Ok(Some(Value::undefined())),
                    },
                };
            }
            let Some(next) = object.prototype() else {
                return Ok(None);
            };
            object = next;
        }
    }

    /// Assign a property per language semantics. Returns false when the
    /// assignment was refused (readonly shadowing, readonly target).
    pub fn put(
        self: &Arc<Self>,
        cx: &Context,
        key: PropertyKey,
        value: Value,
    ) -> JsResult<bool> {
        if self.is_sealed() {
            return Err(EngineError::type_error(format!(
                "Cannot modify a property of a sealed object: {}.",
                key.display()
            )));
        }
        if let Some(handled) = self.instance_id_put(cx, &key, &value)? {
            return Ok(handled);
        }

        // Walk the chain for an existing property controlling assignment.
        let mut object = self.clone();
        loop {
            let existing = object.properties.read().get(&key).cloned();
            if let Some(existing) = existing {
                match existing.value {
                    PropValue::Accessor { setter, .. } => {
                        return match setter {
                            Some(setter) => {
                                crate::interpreter::call_value(
                                    cx,
                                    &setter,
                                    &Value::object(self.clone()),
                                    &[value],
                                )?;
                                Ok(true)
                            }
                            None => Ok(false),
                        };
                    }
                    PropValue::Data(_) => {
                        if existing.attributes.is_readonly() {
                            return Ok(false);
                        }
                        break;
                    }
                }
            }
            let Some(next) = object.prototype() else {
                break;
            };
            object = next;
        }

        self.store_data(key.clone(), value.clone(), None);
        cx.notify_property_change(self, &key, &value);
        Ok(true)
    }

    /// Define (or redefine) a data property, bypassing assignment checks.
    pub fn define_property(&self, key: PropertyKey, value: Value, attributes: PropertyAttributes) {
        self.store_data(key, value, Some(attributes));
    }

    /// Define an accessor property.
    pub fn define_accessor(
        &self,
        key: PropertyKey,
        getter: Option<Value>,
        setter: Option<Value>,
        attributes: PropertyAttributes,
    ) {
        self.properties.write().insert(
            key,
            Property {
                value: PropValue::Accessor { getter, setter },
                attributes,
            },
        );
    }

    fn store_data(&self, key: PropertyKey, value: Value, attributes: Option<PropertyAttributes>) {
        if let (ObjectData::Array { length }, PropertyKey::Index(index)) = (&self.data, &key) {
            let mut length = length.write();
            if *index >= *length {
                *length = *index + 1;
            }
        }
        let mut properties = self.properties.write();
        match properties.get_mut(&key) {
            Some(existing) => {
                existing.value = PropValue::Data(value);
                if let Some(attributes) = attributes {
                    existing.attributes = attributes;
                }
            }
            None => {
                properties.insert(
                    key,
                    Property {
                        value: PropValue::Data(value),
                        attributes: attributes.unwrap_or_default(),
                    },
                );
            }
        }
    }

    /// Delete an own property. PERMANENT properties and sealed objects
    /// refuse; deleting an absent property succeeds vacuously.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        if self.is_sealed() {
            return false;
        }
        let mut properties = self.properties.write();
        match properties.get(key) {
            Some(property) => {
                if property.attributes.is_permanent() {
                    return false;
                }
                properties.shift_remove(key);
                true
            }
            None => true,
        }
    }

    /// Own-property existence (id slots included)
    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.instance_id_attributes(key).is_some() || self.properties.read().contains_key(key)
    }

    /// Existence through the prototype chain
    pub fn has(&self, key: &PropertyKey) -> bool {
        if self.has_own(key) {
            return true;
        }
        let mut proto = self.prototype();
        while let Some(object) = proto {
            if object.has_own(key) {
                return true;
            }
            proto = object.prototype();
        }
        false
    }

    /// Attributes of an own property
    pub fn attributes_of(&self, key: &PropertyKey) -> Option<PropertyAttributes> {
        if let Some(attributes) = self.instance_id_attributes(key) {
            return Some(attributes);
        }
        self.properties.read().get(key).map(|p| p.attributes)
    }

    /// Change the attributes of an own property.
    pub fn set_attributes(&self, key: &PropertyKey, attributes: PropertyAttributes) -> bool {
        if let ObjectData::RegExp(data) = &self.data
            && matches!(key, PropertyKey::String(s) if &**s == "lastIndex")
        {
            data.set_last_index_attributes(attributes);
            return true;
        }
        match self.properties.write().get_mut(key) {
            Some(property) => {
                property.attributes = attributes;
                true
            }
            None => false,
        }
    }

    /// Own keys. `enumerable_only` filters DONTENUM; `ids_first` applies the
    /// ES6 ordering rule (integer indices numerically first, then string keys
    /// in insertion order, then symbols).
    pub fn own_keys(&self, enumerable_only: bool, ids_first: bool) -> Vec<PropertyKey> {
        let properties = self.properties.read();
        let visible = properties
            .iter()
            .filter(|(_, p)| !enumerable_only || !p.attributes.is_dontenum())
            .map(|(k, _)| k.clone());
        if !ids_first {
            return visible.collect();
        }
        let mut indices: Vec<u32> = Vec::new();
        let mut strings: Vec<PropertyKey> = Vec::new();
        let mut symbols: Vec<PropertyKey> = Vec::new();
        for key in visible {
            match key {
                PropertyKey::Index(i) => indices.push(i),
                PropertyKey::String(_) => strings.push(key),
                PropertyKey::Symbol(_) => symbols.push(key),
            }
        }
        indices.sort_unstable();
        let mut keys: Vec<PropertyKey> =
            indices.into_iter().map(PropertyKey::Index).collect();
        keys.extend(strings);
        keys.extend(symbols);
        keys
    }

    /// Raw own data-property read: no id slots, no accessors, no prototype
    /// chain. Used internally where no context is available.
    pub fn raw_get(&self, key: &PropertyKey) -> Option<Value> {
        match &self.properties.read().get(key)?.value {
            PropValue::Data(value) => Some(value.clone()),
            PropValue::Accessor { .. } => None,
        }
    }

    /// Array length (0 for non-arrays)
    pub fn array_length(&self) -> u32 {
        match &self.data {
            ObjectData::Array { length } => *length.read(),
            _ => 0,
        }
    }

    // ==================== id-based builtin slots ====================

    /// Computed instance-id slots checked before the property table.
    fn instance_id_value(&self, key: &PropertyKey) -> Option<Value> {
        let PropertyKey::String(name) = key else {
            // Array length is the only non-symbol id and `length` is not an
            // index, so indices and symbols never hit id slots.
            return None;
        };
        match &self.data {
            ObjectData::Array { length } => {
                if &**name == "length" {
                    return Some(Value::number(*length.read() as f64));
                }
                None
            }
            ObjectData::RegExp(data) => data.instance_id_value(name),
            _ => None,
        }
    }

    fn instance_id_attributes(&self, key: &PropertyKey) -> Option<PropertyAttributes> {
        let PropertyKey::String(name) = key else {
            return None;
        };
        match &self.data {
            ObjectData::Array { .. } => {
                if &**name == "length" {
                    return Some(PropertyAttributes::new(
                        PropertyAttributes::DONTENUM | PropertyAttributes::PERMANENT,
                    ));
                }
                None
            }
            ObjectData::RegExp(data) => data.instance_id_attributes(name),
            _ => None,
        }
    }

    /// Id-slot assignment. `Ok(Some(done))` when the key was an id slot.
    fn instance_id_put(
        &self,
        _cx: &Context,
        key: &PropertyKey,
        value: &Value,
    ) -> JsResult<Option<bool>> {
        let PropertyKey::String(name) = key else {
            return Ok(None);
        };
        match &self.data {
            ObjectData::Array { length } => {
                if &**name == "length" {
                    let new_length = value.to_uint32();
                    let old_length = *length.read();
                    if new_length < old_length {
                        let mut properties = self.properties.write();
                        properties.retain(|k, _| {
                            !matches!(k, PropertyKey::Index(i) if *i >= new_length)
                        });
                    }
                    *length.write() = new_length;
                    return Ok(Some(true));
                }
                Ok(None)
            }
            ObjectData::RegExp(data) => {
                if &**name == "lastIndex" {
                    // Writability is controlled by the instance's attribute
                    // bitmap; silent refusal mirrors data properties.
                    if data.last_index_attributes().is_readonly() {
                        return Ok(Some(false));
                    }
                    data.set_last_index(value.to_number());
                    return Ok(Some(true));
                }
                if data.instance_id_value(name).is_some() {
                    // The computed accessors are readonly.
                    return Ok(Some(false));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    // ==================== default string forms ====================

    /// Class-based default conversion, used by ToString and ToNumber on
    /// objects. Reads only data properties, never accessors.
    pub fn default_string(&self) -> String {
        match &self.data {
            ObjectData::Array { length } => {
                let length = *length.read();
                let properties = self.properties.read();
                let mut parts = Vec::with_capacity(length as usize);
                for i in 0..length {
                    let piece = properties
                        .get(&PropertyKey::Index(i))
                        .and_then(|p| match &p.value {
                            PropValue::Data(v) if !v.is_nullish() => Some(v.to_js_string()),
                            _ => None,
                        })
                        .unwrap_or_default();
                    parts.push(piece);
                }
                parts.join(",")
            }
            ObjectData::Function(data) => match &data.kind {
                FunctionKind::Script { script, .. } => crate::script::decompile(
                    script.source.as_deref(),
                    script.display_name(),
                    0,
                ),
                FunctionKind::Native(_) => {
                    let name = self
                        .properties
                        .read()
                        .get(&PropertyKey::string("name"))
                        .and_then(|p| match &p.value {
                            PropValue::Data(v) => v.as_str().map(str::to_string),
                            _ => None,
                        })
                        .unwrap_or_default();
                    format!("function {}() {{ [native code] }}", name)
                }
            },
            ObjectData::RegExp(data) => data.to_source_string(),
            ObjectData::Plain => {
                if self.class_name == "Error" {
                    let properties = self.properties.read();
                    let read = |key: &str| {
                        properties.get(&PropertyKey::string(key)).and_then(|p| {
                            match &p.value {
                                PropValue::Data(v) => Some(v.to_js_string()),
                                _ => None,
                            }
                        })
                    };
                    let name = read("name").unwrap_or_else(|| "Error".to_string());
                    return match read("message").filter(|m| !m.is_empty()) {
                        Some(message) => format!("{}: {}", name, message),
                        None => name,
                    };
                }
                format!("[object {}]", self.class_name)
            }
        }
    }
}

impl std::fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptObject")
            .field("class", &self.class_name)
            .field("properties", &self.properties.read().len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_index_normalization() {
        assert_eq!(PropertyKey::string("0"), PropertyKey::Index(0));
        assert_eq!(PropertyKey::string("42"), PropertyKey::Index(42));
        assert!(matches!(PropertyKey::string("01"), PropertyKey::String(_)));
        assert!(matches!(PropertyKey::string("-1"), PropertyKey::String(_)));
        assert!(matches!(
            PropertyKey::string("length"),
            PropertyKey::String(_)
        ));
    }

    #[test]
    fn test_attribute_bits() {
        let attrs = PropertyAttributes::frozen();
        assert!(attrs.is_readonly());
        assert!(attrs.is_dontenum());
        assert!(attrs.is_permanent());
        assert!(!PropertyAttributes::EMPTY.is_readonly());
    }

    #[test]
    fn test_delete_semantics() {
        let object = ScriptObject::plain(None);
        object.define_property(
            PropertyKey::string("a"),
            Value::number(1.0),
            PropertyAttributes::EMPTY,
        );
        object.define_property(
            PropertyKey::string("b"),
            Value::number(2.0),
            PropertyAttributes::new(PropertyAttributes::PERMANENT),
        );
        assert!(object.delete(&PropertyKey::string("a")));
        assert!(!object.delete(&PropertyKey::string("b")));
        // Deleting an absent property is a no-op success
        assert!(object.delete(&PropertyKey::string("missing")));
    }

    #[test]
    fn test_enumeration_order_ids_first() {
        let object = ScriptObject::plain(None);
        object.define_property(
            PropertyKey::string("b"),
            Value::number(0.0),
            PropertyAttributes::EMPTY,
        );
        object.define_property(
            PropertyKey::index(2),
            Value::number(0.0),
            PropertyAttributes::EMPTY,
        );
        object.define_property(
            PropertyKey::string("a"),
            Value::number(0.0),
            PropertyAttributes::EMPTY,
        );
        object.define_property(
            PropertyKey::index(0),
            Value::number(0.0),
            PropertyAttributes::EMPTY,
        );
        let keys = object.own_keys(true, true);
        assert_eq!(
            keys,
            vec![
                PropertyKey::Index(0),
                PropertyKey::Index(2),
                PropertyKey::string("b"),
                PropertyKey::string("a"),
            ]
        );
        let insertion = object.own_keys(true, false);
        assert_eq!(insertion[0], PropertyKey::string("b"));
    }

    #[test]
    fn test_array_length_tracks_indices() {
        let array = ScriptObject::array(None);
        array.define_property(
            PropertyKey::index(4),
            Value::number(1.0),
            PropertyAttributes::EMPTY,
        );
        assert_eq!(array.array_length(), 5);
    }
}
