//! Boolean, Number, Math and the global functions

use std::sync::Arc;

use crate::context::Context;
use crate::error::JsResult;
use crate::intrinsics::{define_method, native_function, register_constructor};
use crate::object::{ObjectData, PropertyAttributes, PropertyKey, ScriptObject};
use crate::value::{Value, string_to_number};

pub(crate) fn init(
    cx: &Context,
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let _ = cx;
    init_global_values(global);
    init_global_functions(global, function_proto);
    init_boolean(global, object_proto, function_proto);
    init_number(global, object_proto, function_proto);
    init_math(global, object_proto, function_proto);
}

fn frozen_value(target: &Arc<ScriptObject>, name: &str, value: Value) {
    target.define_property(
        PropertyKey::string(name),
        value,
        PropertyAttributes::frozen(),
    );
}

fn init_global_values(global: &Arc<ScriptObject>) {
    frozen_value(global, "undefined", Value::undefined());
    frozen_value(global, "NaN", Value::number(f64::NAN));
    frozen_value(global, "Infinity", Value::number(f64::INFINITY));
    global.define_property(
        PropertyKey::string("globalThis"),
        Value::object(global.clone()),
        PropertyAttributes::dontenum(),
    );
}

fn init_global_functions(global: &Arc<ScriptObject>, function_proto: &Arc<ScriptObject>) {
    define_method(
        global,
        "isNaN",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            Ok(Value::boolean(
                args.first().map(|v| v.to_number()).unwrap_or(f64::NAN).is_nan(),
            ))
        },
    );
    define_method(
        global,
        "isFinite",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            Ok(Value::boolean(
                args.first()
                    .map(|v| v.to_number())
                    .unwrap_or(f64::NAN)
                    .is_finite(),
            ))
        },
    );
    define_method(
        global,
        "parseInt",
        2,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            let text = args.first().map(|v| v.to_js_string()).unwrap_or_default();
            let radix = args.get(1).map(|v| v.to_int32()).unwrap_or(0);
            Ok(Value::number(parse_int(&text, radix)))
        },
    );
    define_method(
        global,
        "parseFloat",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            let text = args.first().map(|v| v.to_js_string()).unwrap_or_default();
            Ok(Value::number(parse_float(&text)))
        },
    );
}

fn init_boolean(
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let proto = ScriptObject::plain(Some(object_proto.clone()));
    let constructor = native_function(
        "Boolean",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            Ok(Value::boolean(
                args.first().map(|v| v.to_boolean()).unwrap_or(false),
            ))
        },
    );
    define_method(
        &proto,
        "toString",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| Ok(Value::string(this.to_js_string())),
    );
    register_constructor(global, "Boolean", &constructor, &proto);
}

fn init_number(
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let proto = ScriptObject::plain(Some(object_proto.clone()));
    let constructor = native_function(
        "Number",
        1,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            Ok(Value::number(
                args.first().map(|v| v.to_number()).unwrap_or(0.0),
            ))
        },
    );
    frozen_value(&constructor, "MAX_VALUE", Value::number(f64::MAX));
    frozen_value(&constructor, "MIN_VALUE", Value::number(5e-324));
    frozen_value(&constructor, "NaN", Value::number(f64::NAN));
    frozen_value(
        &constructor,
        "POSITIVE_INFINITY",
        Value::number(f64::INFINITY),
    );
    frozen_value(
        &constructor,
        "NEGATIVE_INFINITY",
        Value::number(f64::NEG_INFINITY),
    );
    define_method(
        &proto,
        "toString",
        1,
        Some(function_proto.clone()),
        |_cx, this, _args| Ok(Value::string(this.to_js_string())),
    );
    define_method(
        &proto,
        "valueOf",
        0,
        Some(function_proto.clone()),
        |_cx, this, _args| Ok(Value::number(this.to_number())),
    );
    register_constructor(global, "Number", &constructor, &proto);
}

fn init_math(
    global: &Arc<ScriptObject>,
    object_proto: &Arc<ScriptObject>,
    function_proto: &Arc<ScriptObject>,
) {
    let math = ScriptObject::with_data(ObjectData::Plain, "Math", Some(object_proto.clone()));
    frozen_value(&math, "PI", Value::number(std::f64::consts::PI));
    frozen_value(&math, "E", Value::number(std::f64::consts::E));

    fn unary(
        math: &Arc<ScriptObject>,
        function_proto: &Arc<ScriptObject>,
        name: &str,
        op: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) {
        define_method(
            math,
            name,
            1,
            Some(function_proto.clone()),
            move |_cx, _this, args| -> JsResult<Value> {
                Ok(Value::number(op(args
                    .first()
                    .map(|v| v.to_number())
                    .unwrap_or(f64::NAN))))
            },
        );
    }

    unary(&math, function_proto, "abs", f64::abs);
    unary(&math, function_proto, "floor", f64::floor);
    unary(&math, function_proto, "ceil", f64::ceil);
    unary(&math, function_proto, "round", |n| (n + 0.5).floor());
    unary(&math, function_proto, "sqrt", f64::sqrt);

    define_method(
        &math,
        "pow",
        2,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            let base = args.first().map(|v| v.to_number()).unwrap_or(f64::NAN);
            let exponent = args.get(1).map(|v| v.to_number()).unwrap_or(f64::NAN);
            Ok(Value::number(base.powf(exponent)))
        },
    );
    define_method(
        &math,
        "max",
        2,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            let mut best = f64::NEG_INFINITY;
            for arg in args {
                let n = arg.to_number();
                if n.is_nan() {
                    return Ok(Value::number(f64::NAN));
                }
                best = best.max(n);
            }
            Ok(Value::number(best))
        },
    );
    define_method(
        &math,
        "min",
        2,
        Some(function_proto.clone()),
        |_cx, _this, args| {
            let mut best = f64::INFINITY;
            for arg in args {
                let n = arg.to_number();
                if n.is_nan() {
                    return Ok(Value::number(f64::NAN));
                }
                best = best.min(n);
            }
            Ok(Value::number(best))
        },
    );

    global.define_property(
        PropertyKey::string("Math"),
        Value::object(math),
        PropertyAttributes::dontenum(),
    );
}

fn parse_int(text: &str, radix: i32) -> f64 {
    let t = text.trim();
    let (negative, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (radix, t) = if radix == 16 || radix == 0 {
        match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            Some(rest) => (16, rest),
            None => (if radix == 0 { 10 } else { radix }, t),
        }
    } else {
        (radix, t)
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = f64::NAN;
    for c in t.chars() {
        let Some(digit) = c.to_digit(radix as u32) else {
            break;
        };
        value = if value.is_nan() { 0.0 } else { value };
        value = value * radix as f64 + digit as f64;
    }
    if negative { -value } else { value }
}

fn parse_float(text: &str) -> f64 {
    let t = text.trim();
    // Longest prefix that parses as a decimal literal
    let mut end = 0;
    let bytes: Vec<char> = t.chars().collect();
    let mut seen_dot = false;
    let mut seen_e = false;
    for (i, &c) in bytes.iter().enumerate() {
        let ok = match c {
            '0'..='9' => true,
            '+' | '-' => i == 0 || matches!(bytes.get(i - 1), Some('e') | Some('E')),
            '.' if !seen_dot && !seen_e => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_e && i > 0 => {
                seen_e = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end = i + 1;
    }
    if end == 0 {
        if t.starts_with("Infinity") || t.starts_with("+Infinity") {
            return f64::INFINITY;
        }
        if t.starts_with("-Infinity") {
            return f64::NEG_INFINITY;
        }
        return f64::NAN;
    }
    let prefix: String = bytes[..end].iter().collect();
    string_to_number(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42", 0), 42.0);
        assert_eq!(parse_int("0x10", 0), 16.0);
        assert_eq!(parse_int("  -8px", 0), -8.0);
        assert_eq!(parse_int("ff", 16), 255.0);
        assert!(parse_int("zz", 10).is_nan());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("1.5e2abc"), 150.0);
        assert_eq!(parse_float("-2.5"), -2.5);
        assert!(parse_float("abc").is_nan());
        assert_eq!(parse_float("Infinity"), f64::INFINITY);
    }
}
