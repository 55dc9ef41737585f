//! Compilation pipeline: debugger notification, backend fallback and
//! parser-policy features

use std::sync::Arc;

use parking_lot::Mutex;

use marten_vm_bytecode::{DebuggableScript, ScriptFunction};
use marten_vm_core::{
    Context, ContextFactory, Debugger, EngineError, Feature, NativeBackend, NativeBackendError,
};

#[test]
fn test_debugger_sees_script_then_nested_functions() {
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(bool, Option<String>)>>,
    }
    impl Debugger for Recorder {
        fn handle_compilation_done(
            &self,
            _cx: &Context,
            debuggable: &DebuggableScript,
            source: Option<&str>,
        ) {
            assert!(source.is_some());
            self.seen
                .lock()
                .push((debuggable.is_function, debuggable.function_name.clone()));
        }
    }

    let recorder = Arc::new(Recorder::default());
    ContextFactory::new()
        .call(|cx| {
            cx.set_debugger(Some(recorder.clone()), None).unwrap();
            cx.compile_string(
                "function a() { function b() {} } function c() {}",
                "dbg.js",
                1,
                None,
            )
            .unwrap();
            Ok(())
        })
        .unwrap();

    let seen = recorder.seen.lock();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], (false, None));
    assert_eq!(seen[1], (true, Some("a".to_string())));
    assert_eq!(seen[2], (true, Some("b".to_string())));
    assert_eq!(seen[3], (true, Some("c".to_string())));
}

#[test]
fn test_backend_code_size_limit_falls_back_to_interpreter() {
    struct Limited;
    impl NativeBackend for Limited {
        fn compile(
            &self,
            _script: &Arc<ScriptFunction>,
        ) -> Result<Arc<ScriptFunction>, NativeBackendError> {
            Err(NativeBackendError::CodeSizeLimit(
                "generated method too large".to_string(),
            ))
        }
    }

    let factory = ContextFactory::new();
    factory.set_native_backend(Some(Arc::new(Limited)));
    factory
        .call(|cx| {
            cx.set_interpreted_mode(false).unwrap();
            let script = cx.compile_string("1 + 1", "opt.js", 1, None).unwrap();
            assert!(script.unit().flags.is_interpreted);
            let global = cx.init_standard_objects(None, false);
            assert_eq!(script.exec(cx, &global).unwrap().as_number(), Some(2.0));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_compiled_artifacts_cannot_capture_continuations() {
    // A backend that marks its output as natively compiled.
    struct Marking;
    impl NativeBackend for Marking {
        fn compile(
            &self,
            script: &Arc<ScriptFunction>,
        ) -> Result<Arc<ScriptFunction>, NativeBackendError> {
            let mut unit = (**script).clone();
            unit.flags.is_interpreted = false;
            Ok(Arc::new(unit))
        }
    }

    let factory = ContextFactory::new();
    factory.set_native_backend(Some(Arc::new(Marking)));
    factory
        .call(|cx| {
            cx.set_interpreted_mode(false).unwrap();
            let script = cx.compile_string("1;", "opt.js", 1, None).unwrap();
            assert!(!script.unit().flags.is_interpreted);
            let global = cx.init_standard_objects(None, false);
            let result = cx.execute_script_with_continuations(&script, &global);
            assert!(matches!(result, Err(EngineError::IllegalArgument(_))));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_member_expression_function_name_extension() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            let source = "var a = {b: {}}; function a.b.c() { return 5; } a.b.c()";
            assert!(
                cx.evaluate_string(&global, source, "ext.js", 1, None)
                    .is_err()
            );
            cx.set_feature(Feature::MemberExprAsFunctionName, true)
                .unwrap();
            let result = cx
                .evaluate_string(&global, source, "ext.js", 1, None)
                .unwrap();
            assert_eq!(result.as_number(), Some(5.0));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_reserved_keyword_policy_is_version_facing() {
    ContextFactory::new()
        .call(|cx| {
            let global = cx.init_standard_objects(None, false);
            assert!(
                cx.evaluate_string(&global, "var package = 1; package", "kw.js", 1, None)
                    .is_ok()
            );
            cx.set_feature(Feature::ReservedKeywordAsIdentifier, false)
                .unwrap();
            assert!(
                cx.evaluate_string(&global, "var package = 1;", "kw.js", 1, None)
                    .is_err()
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_compile_errors_carry_source_position() {
    ContextFactory::new()
        .call(|cx| {
            let error = cx
                .compile_string("var = ;", "broken.js", 1, None)
                .unwrap_err();
            let position = error.position().expect("position");
            assert_eq!(position.source_name, "broken.js");
            assert!(position.line >= 1);
            Ok(())
        })
        .unwrap();
}
