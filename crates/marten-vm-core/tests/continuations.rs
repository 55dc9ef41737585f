//! Continuation capture and resumption

use std::sync::Arc;

use marten_vm_core::{
    Context, ContextFactory, EngineError, FunctionKind, PropertyAttributes, PropertyKey,
    ScriptObject, Value,
};

/// Install a native `pause()` on the scope that requests continuation
/// capture when called.
fn install_pause(scope: &Arc<ScriptObject>) {
    let pause = ScriptObject::function(
        FunctionKind::Native(Arc::new(|cx: &Context, _this: &Value, _args: &[Value]| {
            Err(cx.capture_continuation())
        })),
        None,
    );
    scope.define_property(
        PropertyKey::string("pause"),
        Value::object(pause),
        PropertyAttributes::dontenum(),
    );
}

#[test]
fn test_capture_and_resume_delivers_value() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            install_pause(&global);
            let script = cx
                .compile_string("var x = 40 + pause(); x + 2", "susp.js", 1, None)
                .unwrap();
            let pending = cx.execute_script_with_continuations(&script, &global);
            let continuation = match pending {
                Err(EngineError::ContinuationPending(continuation)) => continuation,
                other => panic!("expected a pending continuation, got {:?}", other),
            };
            let result = cx.resume_continuation(continuation, Value::number(0.0)).unwrap();
            assert_eq!(result.as_number(), Some(42.0));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_capture_through_script_frames() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            install_pause(&global);
            // pause() sits under two pure script frames; capture succeeds
            // and resume finishes the whole chain.
            let script = cx
                .compile_string(
                    "function inner() { return pause() + 1; }\
                     function outer() { return inner() * 2; }\
                     outer()",
                    "susp.js",
                    1,
                    None,
                )
                .unwrap();
            let continuation = match cx.execute_script_with_continuations(&script, &global) {
                Err(EngineError::ContinuationPending(continuation)) => continuation,
                other => panic!("expected a pending continuation, got {:?}", other),
            };
            let result = cx
                .resume_continuation(continuation, Value::number(20.0))
                .unwrap();
            assert_eq!(result.as_number(), Some(42.0));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_capture_across_host_frame_is_refused() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            install_pause(&global);
            // relay() re-enters the interpreter from a host frame, so a
            // capture underneath it must be refused.
            let relay = ScriptObject::function(
                FunctionKind::Native(Arc::new(
                    |cx: &Context, _this: &Value, args: &[Value]| {
                        marten_vm_core::call_value(
                            cx,
                            args.first().unwrap_or(&Value::Undefined),
                            &Value::undefined(),
                            &[],
                        )
                    },
                )),
                None,
            );
            global.define_property(
                PropertyKey::string("relay"),
                Value::object(relay),
                PropertyAttributes::dontenum(),
            );
            let script = cx
                .compile_string(
                    "relay(function () { return pause(); })",
                    "susp.js",
                    1,
                    None,
                )
                .unwrap();
            let result = cx.execute_script_with_continuations(&script, &global);
            assert!(matches!(result, Err(EngineError::Evaluator { .. })));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_capture_outside_continuation_entry_point_is_refused() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            install_pause(&global);
            // Plain evaluation does not raise the top-call flag.
            let result = cx.evaluate_string(&global, "pause()", "susp.js", 1, None);
            assert!(matches!(result, Err(EngineError::Evaluator { .. })));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_call_function_with_continuations() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            install_pause(&global);
            let function = cx
                .compile_function(
                    &global,
                    "function f(base) { return base + pause(); }",
                    "fn.js",
                    1,
                    None,
                )
                .unwrap();
            let pending = cx.call_function_with_continuations(
                &function,
                &global,
                &[Value::number(30.0)],
            );
            let continuation = match pending {
                Err(EngineError::ContinuationPending(continuation)) => continuation,
                other => panic!("expected a pending continuation, got {:?}", other),
            };
            let result = cx
                .resume_continuation(continuation, Value::number(12.0))
                .unwrap();
            assert_eq!(result.as_number(), Some(42.0));
            Ok(())
        })
        .unwrap();
}
