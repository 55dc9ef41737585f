//! Object model and evaluation semantics

use marten_vm_core::{Context, ContextFactory, EcmaErrorKind, EngineError, Value};

fn eval(cx: &Context, source: &str) -> Result<Value, EngineError> {
    let global = cx.init_standard_objects(None, false);
    cx.evaluate_string(&global, source, "test.js", 1, None)
}

fn eval_string(cx: &Context, source: &str) -> String {
    eval(cx, source).unwrap().to_js_string()
}

#[test]
fn test_arithmetic_and_strings() {
    ContextFactory::new()
        .call(|cx| {
            assert_eq!(eval_string(cx, "1 + 2 * 3"), "7");
            assert_eq!(eval_string(cx, "'a' + 1"), "a1");
            assert_eq!(eval_string(cx, "'10' - 1"), "9");
            assert_eq!(eval_string(cx, "7 % 4"), "3");
            assert_eq!(eval_string(cx, "1 / 0"), "Infinity");
            assert_eq!(eval_string(cx, "(8 | 1) << 1"), "18");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_closures_capture_variables() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "function counter() {\
                     var n = 0;\
                     return function () { n = n + 1; return n; };\
                 }\
                 var c = counter();\
                 c(); c(); c()",
            );
            assert_eq!(out, "3");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_try_catch_finally_ordering() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var log = [];\
                 try {\
                     log.push('t');\
                     throw new Error('x');\
                 } catch (e) {\
                     log.push('c:' + e.message);\
                 } finally {\
                     log.push('f');\
                 }\
                 log.join(',')",
            );
            assert_eq!(out, "t,c:x,f");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_finally_runs_on_return_paths() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var log = [];\
                 function f() {\
                     try {\
                         return 'r';\
                     } finally {\
                         log.push('f');\
                     }\
                 }\
                 log.push(f());\
                 log.join(',')",
            );
            assert_eq!(out, "f,r");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_uncaught_throw_surfaces_with_position() {
    ContextFactory::new()
        .call(|cx| {
            match eval(cx, "\n\nthrow 42;") {
                Err(EngineError::Throw { value, position }) => {
                    assert_eq!(value.as_number(), Some(42.0));
                    let position = position.expect("position");
                    assert_eq!(position.source_name, "test.js");
                    assert_eq!(position.line, 3);
                }
                other => panic!("expected thrown value, got {:?}", other),
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_reference_error_for_undefined_names() {
    ContextFactory::new()
        .call(|cx| {
            match eval(cx, "missing + 1") {
                Err(EngineError::Ecma { kind, .. }) => {
                    assert_eq!(kind, EcmaErrorKind::Reference)
                }
                other => panic!("expected reference error, got {:?}", other),
            }
            assert_eq!(eval_string(cx, "typeof missing"), "undefined");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_switch_with_fallthrough_and_default() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "function pick(x) {\
                     var out = [];\
                     switch (x) {\
                         case 1: out.push('one');\
                         case 2: out.push('two'); break;\
                         default: out.push('other');\
                     }\
                     return out.join('+');\
                 }\
                 pick(1) + '|' + pick(2) + '|' + pick(9)",
            );
            assert_eq!(out, "one+two|two|other");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_for_in_with_delete_leaves_prototype_untouched() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "Array.prototype.foo = function () { return 7; };\
                 var t = [];\
                 for (var i in t) delete t[i];\
                 [].foo()",
            );
            assert_eq!(out, "7");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_for_in_enumerates_indices_then_names() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var o = {b: 1};\
                 o[2] = 2;\
                 o.a = 3;\
                 o[0] = 4;\
                 var keys = [];\
                 for (var k in o) keys.push(k);\
                 keys.join(',')",
            );
            assert_eq!(out, "0,2,b,a");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_get_own_property_names_order_and_receiver_checks() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var o = {b: 1};\
                 o[2] = 2;\
                 o.a = 3;\
                 Object.getOwnPropertyNames(o).join(',')",
            );
            assert_eq!(out, "2,b,a");

            // Prototype-chain keys are excluded.
            let out = eval_string(
                cx,
                "function C() { this.own = 1; }\
                 C.prototype.inherited = 2;\
                 Object.getOwnPropertyNames(new C()).join(',')",
            );
            assert_eq!(out, "own");

            for bad in ["Object.getOwnPropertyNames(null)",
                        "Object.getOwnPropertyNames(undefined)",
                        "Object.getOwnPropertyNames(5)"] {
                match eval(cx, bad) {
                    Err(EngineError::Ecma { kind, .. }) => {
                        assert_eq!(kind, EcmaErrorKind::Type)
                    }
                    other => panic!("expected type error, got {:?}", other),
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_prototype_chain_dispatch() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "function Animal(name) { this.name = name; }\
                 Animal.prototype.speak = function () { return this.name + ' speaks'; };\
                 var dog = new Animal('rex');\
                 dog.speak()",
            );
            assert_eq!(out, "rex speaks");
            assert_eq!(
                eval_string(
                    cx,
                    "function A() {} var a = new A(); a instanceof A"
                ),
                "true"
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_function_constructor_compiles_source() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(cx, "var add = Function('a', 'b', 'return a + b;'); add(2, 3)");
            assert_eq!(out, "5");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_compile_function_entry_point() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            let function = cx
                .compile_function(
                    &global,
                    "function double(x) { return x * 2; }",
                    "fn.js",
                    1,
                    None,
                )
                .unwrap();
            let result =
                marten_vm_core::call_value(cx, &function, &Value::undefined(), &[Value::number(21.0)])
                    .unwrap();
            assert_eq!(result.as_number(), Some(42.0));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_decompile_keeps_source() {
    ContextFactory::new()
        .call(|cx| {
            let script = cx
                .compile_string("var a = 1;", "d.js", 1, None)
                .unwrap();
            assert_eq!(script.decompile(2), "  var a = 1;");
            cx.set_generate_source(false).unwrap();
            let script = cx.compile_string("var a = 1;", "d.js", 1, None).unwrap();
            assert_eq!(script.decompile(0), "function <anonymous>() { [native code] }");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_sealed_standard_objects_reject_modification() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, true);
            let result = cx.evaluate_string(
                &global,
                "Array.prototype.foo = 1;",
                "sealed.js",
                1,
                None,
            );
            match result {
                Err(EngineError::Ecma { kind, .. }) => assert_eq!(kind, EcmaErrorKind::Type),
                other => panic!("expected type error, got {:?}", other),
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_negative_line_numbers_are_coerced() {
    ContextFactory::new()
        .call(|cx| {
            let script = cx.compile_string("1;", "neg.js", -5, None).unwrap();
            assert_eq!(script.unit().base_line, 0);
            Ok(())
        })
        .unwrap();
}
