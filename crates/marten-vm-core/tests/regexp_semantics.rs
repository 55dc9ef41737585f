//! RegExp runtime semantics: lastIndex iteration, sticky anchoring,
//! empty-match stepping, legacy statics and construction rules

use marten_vm_core::{Context, ContextFactory, EcmaErrorKind, EngineError, LanguageVersion, Value};

fn eval(cx: &Context, source: &str) -> Result<Value, EngineError> {
    let global = cx.init_standard_objects(None, false);
    cx.evaluate_string(&global, source, "test.js", 1, None)
}

fn eval_string(cx: &Context, source: &str) -> String {
    eval(cx, source).unwrap().to_js_string()
}

#[test]
fn test_source_and_flags_round_trip() {
    ContextFactory::new()
        .call(|cx| {
            assert_eq!(
                eval_string(cx, r#"var r = new RegExp("a/b", "gi"); r.source"#),
                "a\\/b"
            );
            // Flags come back in canonical gimsuy order.
            assert_eq!(
                eval_string(cx, r#"new RegExp("a", "yig").flags"#),
                "giy"
            );
            assert_eq!(eval_string(cx, "/x/smi.flags"), "ims");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_invalid_flags_are_syntax_errors() {
    ContextFactory::new()
        .call(|cx| {
            for source in [r#"new RegExp("a", "gg")"#, r#"new RegExp("a", "q")"#] {
                match eval(cx, source) {
                    Err(EngineError::Ecma { kind, .. }) => {
                        assert_eq!(kind, EcmaErrorKind::Syntax)
                    }
                    other => panic!("expected syntax error, got {:?}", other),
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_regexp_from_regexp_shares_program() {
    ContextFactory::new()
        .call(|cx| {
            assert_eq!(
                eval_string(cx, "var a = /ab/gi; var b = new RegExp(a); b.source + b.flags"),
                "abgi"
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_regexp_with_flags_argument_requires_es6() {
    ContextFactory::new()
        .call(|cx| {
            cx.set_language_version(LanguageVersion::V1_5).unwrap();
            match eval(cx, r#"new RegExp(/a/, "g")"#) {
                Err(EngineError::Ecma { kind, .. }) => assert_eq!(kind, EcmaErrorKind::Type),
                other => panic!("expected type error, got {:?}", other),
            }
            cx.set_language_version(LanguageVersion::Es6).unwrap();
            assert_eq!(eval_string(cx, r#"new RegExp(/a/, "g").flags"#), "g");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_global_iteration_and_last_index_reset() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var r = /a/g;\
                 var out = [];\
                 for (var i = 0; i < 4; i++) {\
                     var m = r.exec('aaa');\
                     out.push(m === null ? -1 : m.index);\
                 }\
                 out.push(r.lastIndex);\
                 out.join(',')",
            );
            assert_eq!(out, "0,1,2,-1,0");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_sticky_anchoring() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var r = /a/y;\
                 var a = r.exec('ba');\
                 r.lastIndex = 1;\
                 var b = r.exec('ba');\
                 var c = r.exec('ba');\
                 [a === null, b.index, c === null, r.lastIndex].join(',')",
            );
            assert_eq!(out, "true,1,true,0");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_match_result_shape() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var m = /(b)(x)?/.exec('abc');\
                 [m[0], m[1], m[2] === undefined ? 'u' : m[2], m.index, m.input].join('|')",
            );
            assert_eq!(out, "b|b|u|1|abc");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_empty_match_advance() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(cx, "var m = ''.match(/a*/g); m.length + ':' + m[0]");
            assert_eq!(out, "1:");
            assert_eq!(eval_string(cx, "'ab'.match(/a*/g).join('|')"), "a||");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_unicode_empty_match_advances_by_code_point() {
    ContextFactory::new()
        .call(|cx| {
            // The subject starts with a surrogate pair; empty matches land
            // on code point boundaries only.
            let out = eval_string(cx, "'\u{1F600}b'.match(/(?:)/gu).length");
            assert_eq!(out, "3");
            // Without unicode mode every UTF-16 unit is a boundary.
            let out = eval_string(cx, "'\u{1F600}b'.match(/(?:)/g).length");
            assert_eq!(out, "4");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_match_without_global_is_single_exec() {
    ContextFactory::new()
        .call(|cx| {
            assert_eq!(
                eval_string(cx, "var m = 'abcabc'.match(/b(c)/); m[0] + m[1] + m.index"),
                "bcc1"
            );
            assert_eq!(eval_string(cx, "'abc'.match(/z/) === null"), "true");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_symbol_search_returns_index_or_minus_one() {
    ContextFactory::new()
        .call(|cx| {
            assert_eq!(eval_string(cx, "'hi there'.search(/there/)"), "3");
            assert_eq!(eval_string(cx, "'hi there'.search(/zz/)"), "-1");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_match_all_iterates_lazily() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var it = 'a1b2'.matchAll(/[a-z](\\d)/g);\
                 var parts = [];\
                 var step = it.next();\
                 while (!step.done) {\
                     parts.push(step.value[0] + ':' + step.value[1]);\
                     step = it.next();\
                 }\
                 parts.join(',')",
            );
            assert_eq!(out, "a1:1,b2:2");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_match_all_requires_global_argument() {
    ContextFactory::new()
        .call(|cx| {
            match eval(cx, "'abc'.matchAll(/b/)") {
                Err(EngineError::Ecma { kind, .. }) => assert_eq!(kind, EcmaErrorKind::Type),
                other => panic!("expected type error, got {:?}", other),
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_left_context_depends_on_language_version() {
    let script = "var r = / /g;\
                  r.exec('hi there bye');\
                  var first = RegExp['$`'];\
                  r.exec('hi there bye');\
                  first + '|' + RegExp['$`']";
    ContextFactory::new()
        .call(|cx| {
            cx.set_language_version(LanguageVersion::V1_2).unwrap();
            assert_eq!(eval_string(cx, script), "hi|there");
            cx.set_language_version(LanguageVersion::Es6).unwrap();
            assert_eq!(eval_string(cx, script), "hi|hi there");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_legacy_statics_after_match() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "/(d)(e)/.exec('abcdef');\
                 [RegExp.$1, RegExp.$2, RegExp.lastMatch, RegExp.rightContext, RegExp.input]\
                     .join('|')",
            );
            assert_eq!(out, "d|e|de|f|abcdef");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_readonly_last_index_makes_global_exec_throw() {
    ContextFactory::new()
        .call(|cx| {
            let result = eval(
                cx,
                "var r = /a/g;\
                 Object.defineProperty(r, 'lastIndex', {writable: false});\
                 r.exec('aaa')",
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
fn test_to_string_canonical_form() {
    ContextFactory::new()
        .call(|cx| {
            assert_eq!(eval_string(cx, "/ab/gi.toString()"), "/ab/gi");
            assert_eq!(eval_string(cx, "new RegExp('').toString()"), "/(?:)/");
            // The observed contract for non-RegExp receivers.
            assert_eq!(
                eval_string(cx, "/a/.toString.call({})"),
                "/undefined/undefined"
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_compile_replaces_program_in_place() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var r = /a/g;\
                 r.exec('aa');\
                 r.compile('b', 'i');\
                 [r.source, r.flags, r.lastIndex, r.test('B')].join(',')",
            );
            assert_eq!(out, "b,i,0,true");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_accessor_properties_are_readonly() {
    ContextFactory::new()
        .call(|cx| {
            let out = eval_string(
                cx,
                "var r = /a/g; r.source = 'zz'; r.global = false; r.source + ',' + r.global",
            );
            assert_eq!(out, "a,true");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_test_method() {
    ContextFactory::new()
        .call(|cx| {
            assert_eq!(eval_string(cx, "/ab/.test('xabx')"), "true");
            assert_eq!(eval_string(cx, "/ab/.test('xx')"), "false");
            Ok(())
        })
        .unwrap();
}
