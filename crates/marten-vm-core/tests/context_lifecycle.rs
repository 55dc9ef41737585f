//! Context binding, sealing, microtask and compilation-probe behavior

use std::sync::Arc;

use parking_lot::Mutex;

use marten_vm_core::{Context, ContextFactory, Value};

#[test]
fn test_current_context_tracks_enter_exit() {
    let factory = ContextFactory::new();
    assert!(Context::current().is_none());

    let cx = factory.enter().unwrap();
    assert!(Arc::ptr_eq(&Context::current().unwrap(), &cx));

    factory.exit().unwrap();
    assert!(Context::current().is_none());
}

#[test]
fn test_entering_context_bound_elsewhere_fails() {
    let factory = ContextFactory::new();
    let cx = factory.enter().unwrap();

    let other_factory = factory.clone();
    let other_cx = cx.clone();
    let failed = std::thread::spawn(move || other_factory.enter_context(other_cx).is_err())
        .join()
        .unwrap();
    assert!(failed);

    factory.exit().unwrap();
}

#[test]
fn test_exit_without_enter_fails() {
    let factory = ContextFactory::new();
    assert!(factory.exit().is_err());
}

#[test]
fn test_call_exits_on_error_paths() {
    let factory = ContextFactory::new();
    let result: Result<(), _> = factory.call(|_cx| {
        Err(marten_vm_core::EngineError::evaluator("boom"))
    });
    assert!(result.is_err());
    assert!(Context::current().is_none());
}

#[test]
fn test_seal_blocks_every_setter_until_unsealed() {
    let factory = ContextFactory::new();
    factory
        .call(|cx| {
            let key = Value::string("key");
            cx.seal(Some(key.clone())).unwrap();
            assert!(cx.set_generate_source(false).is_err());
            assert!(cx.set_time_zone("CET").is_err());
            assert!(cx.set_maximum_interpreter_stack_depth(10).is_err());

            // A different key (even with equal contents created separately)
            // does not unseal; the identical value does.
            assert!(cx.unseal(Value::number(1.0)).is_err());
            cx.unseal(key).unwrap();
            assert!(cx.set_generate_source(false).is_ok());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_null_seal_key_is_permanent() {
    let factory = ContextFactory::new();
    factory
        .call(|cx| {
            cx.seal(None).unwrap();
            assert!(cx.unseal(Value::string("whatever")).is_err());
            assert!(cx.set_locale("de-DE").is_err());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_microtasks_run_fifo_including_nested_enqueues() {
    let factory = ContextFactory::new();
    factory
        .call(|cx| {
            let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
            let a = order.clone();
            let c = order.clone();
            cx.enqueue_microtask(Box::new(move |cx| {
                a.lock().push("A");
                let c = c.clone();
                cx.enqueue_microtask(Box::new(move |_| c.lock().push("C")));
            }));
            let b = order.clone();
            cx.enqueue_microtask(Box::new(move |_| b.lock().push("B")));

            cx.process_microtasks().unwrap();
            assert_eq!(*order.lock(), vec!["A", "B", "C"]);
            assert_eq!(cx.pending_microtasks(), 0);
            cx.process_microtasks().unwrap();
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_evaluate_drains_microtasks_before_returning() {
    let factory = ContextFactory::new();
    factory
        .call(|cx| {
            let ran = Arc::new(Mutex::new(false));
            let flag = ran.clone();
            cx.enqueue_microtask(Box::new(move |_| *flag.lock() = true));

            let global = cx.init_standard_objects(None, false);
            cx.evaluate_string(&global, "1 + 1", "test.js", 1, None)
                .unwrap();
            assert!(*ran.lock());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_string_is_compilable_unit() {
    let factory = ContextFactory::new();
    factory
        .call(|cx| {
            assert!(!cx.string_is_compilable_unit("function f(){"));
            assert!(cx.string_is_compilable_unit("function f(){}"));
            assert!(!cx.string_is_compilable_unit("1 +"));
            assert!(cx.string_is_compilable_unit("var x = 1;"));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_instruction_observer_terminates_scripts() {
    let factory = ContextFactory::new();
    factory
        .call(|cx| {
            cx.set_instruction_observer_threshold(1_000).unwrap();
            cx.set_instruction_observer(Some(Arc::new(|_cx, _count| {
                Err(marten_vm_core::EngineError::evaluator(
                    "script ran too long",
                ))
            })))
            .unwrap();
            let global = cx.init_standard_objects(None, false);
            let result = cx.evaluate_string(&global, "while (true) {}", "loop.js", 1, None);
            assert!(matches!(
                result,
                Err(marten_vm_core::EngineError::Evaluator { .. })
            ));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_interpreter_stack_depth_limit() {
    let factory = ContextFactory::new();
    factory
        .call(|cx| {
            cx.set_maximum_interpreter_stack_depth(16).unwrap();
            let global = cx.init_standard_objects(None, false);
            let result = cx.evaluate_string(
                &global,
                "function f(n) { return f(n + 1); } f(0);",
                "deep.js",
                1,
                None,
            );
            match result {
                Err(marten_vm_core::EngineError::Ecma { kind, .. }) => {
                    assert_eq!(kind, marten_vm_core::EcmaErrorKind::Range);
                }
                other => panic!("expected a range error, got {:?}", other),
            }
            Ok(())
        })
        .unwrap();
}
