//! Bytecode interpreter
//!
//! The call stack is an explicit vector of heap-allocated frames; a
//! script-to-script call pushes a frame instead of recursing on the host
//! stack, which is what makes a continuation a plain clone of the frame
//! vector. The dispatch loop works on a result/error sum: script-catchable
//! errors unwind through the frames' try handlers, everything else aborts
//! the run and leaves the entry point as an engine exception.

use std::sync::Arc;

use marten_vm_bytecode::{Constant, Instruction, ScriptFunction};

use crate::context::Context;
use crate::error::{EngineError, JsResult, SourcePosition};
use crate::features::Feature;
use crate::object::{
    FunctionKind, ObjectData, PropertyAttributes, PropertyKey, ScriptObject,
};
use crate::value::Value;

/// Pending completion carried through a finally clause
#[derive(Clone, Debug)]
enum Completion {
    Throw(EngineError),
    Return(Value),
}

/// An installed try handler
#[derive(Clone, Debug)]
struct TryHandler {
    catch_pc: Option<usize>,
    finally_pc: Option<usize>,
    stack_depth: usize,
}

/// State of an open for-in enumeration
#[derive(Clone)]
struct EnumState {
    object: Option<Arc<ScriptObject>>,
    keys: Vec<Arc<str>>,
    index: usize,
}

/// One interpreter frame
#[derive(Clone)]
pub struct CallFrame {
    script: Arc<ScriptFunction>,
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
    scope: Arc<ScriptObject>,
    global: Arc<ScriptObject>,
    this_value: Value,
    handlers: Vec<TryHandler>,
    enums: Vec<EnumState>,
    pending: Option<Completion>,
    is_construct: bool,
    construct_this: Option<Value>,
    activation: Option<Arc<ScriptObject>>,
}

/// A snapshot of the interpreter frame stack, resumable later
#[derive(Clone)]
pub struct Continuation {
    frames: Vec<CallFrame>,
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("frames", &self.frames.len())
            .finish()
    }
}

/// The tail of a scope chain (the global object)
fn global_of(scope: &Arc<ScriptObject>) -> Arc<ScriptObject> {
    let mut current = scope.clone();
    while let Some(parent) = current.parent_scope() {
        current = parent;
    }
    current
}

/// Prototype registered for a builtin constructor on the global
pub(crate) fn builtin_prototype(
    global: &Arc<ScriptObject>,
    constructor: &str,
) -> Option<Arc<ScriptObject>> {
    let ctor = global.raw_get(&PropertyKey::string(constructor))?;
    let proto = ctor
        .as_object()?
        .raw_get(&PropertyKey::string("prototype"))?;
    proto.as_object().cloned()
}

/// Position of the innermost live interpreted frame, if script is running
pub(crate) fn current_position(cx: &Context) -> Option<SourcePosition> {
    cx.interpreter_position.read().clone()
}

// ==================== function instantiation ====================

/// Instantiate a compiled function as a function value closing over `scope`.
pub fn instantiate_function(
    cx: &Context,
    unit: &Arc<ScriptFunction>,
    scope: Arc<ScriptObject>,
) -> Value {
    let global = global_of(&scope);
    let function_proto = builtin_prototype(&global, "Function");
    let object_proto = builtin_prototype(&global, "Object");
    let function = ScriptObject::function(
        FunctionKind::Script {
            script: unit.clone(),
            scope,
        },
        function_proto,
    );
    function.define_property(
        PropertyKey::string("name"),
        Value::string(unit.name.clone().unwrap_or_default()),
        PropertyAttributes::new(PropertyAttributes::READONLY | PropertyAttributes::DONTENUM),
    );
    function.define_property(
        PropertyKey::string("length"),
        Value::number(unit.param_count as f64),
        PropertyAttributes::new(PropertyAttributes::READONLY | PropertyAttributes::DONTENUM),
    );
    let prototype = ScriptObject::plain(object_proto);
    prototype.define_property(
        PropertyKey::string("constructor"),
        Value::object(function.clone()),
        PropertyAttributes::dontenum(),
    );
    function.define_property(
        PropertyKey::string("prototype"),
        Value::object(prototype),
        PropertyAttributes::dontenum(),
    );
    let _ = cx;
    Value::object(function)
}

// ==================== public call surface ====================

/// Call any callable value. Script functions run on a fresh frame stack
/// (re-entrant interpreter runs count as host frames for the continuation
/// rules).
pub fn call_value(cx: &Context, callee: &Value, this: &Value, args: &[Value]) -> JsResult<Value> {
    let Some(object) = callee.as_object().filter(|o| o.is_callable()) else {
        return Err(EngineError::type_error(format!(
            "{} is not a function",
            callee.to_js_string()
        )));
    };
    let Some(function) = object.as_function() else {
        return Err(EngineError::type_error("not a function"));
    };
    match &function.kind {
        FunctionKind::Native(native) => native(cx, this, args),
        FunctionKind::Script { script, scope } => {
            let frame = function_frame(cx, script, scope, this.clone(), args, false, None)?;
            run(cx, vec![frame])
        }
    }
}

/// Construct an instance with `new` semantics.
pub fn construct_value(cx: &Context, callee: &Value, args: &[Value]) -> JsResult<Value> {
    let Some(object) = callee.as_object().filter(|o| o.is_callable()) else {
        return Err(EngineError::type_error(format!(
            "{} is not a constructor",
            callee.to_js_string()
        )));
    };
    let Some(function) = object.as_function() else {
        return Err(EngineError::type_error("not a constructor"));
    };
    match &function.kind {
        FunctionKind::Native(native) => {
            let result = native(cx, &Value::undefined(), args)?;
            if result.as_object().is_some() {
                Ok(result)
            } else {
                Ok(Value::object(ScriptObject::plain(None)))
            }
        }
        FunctionKind::Script { script, scope } => {
            let proto = object
                .raw_get(&PropertyKey::string("prototype"))
                .and_then(|p| p.as_object().cloned());
            let this = Value::object(ScriptObject::plain(proto));
            let frame = function_frame(
                cx,
                script,
                scope,
                this.clone(),
                args,
                true,
                Some(this.clone()),
            )?;
            run(cx, vec![frame])
        }
    }
}

/// Run a toplevel script against a scope.
pub(crate) fn execute_top(
    cx: &Context,
    script: Arc<ScriptFunction>,
    scope: Arc<ScriptObject>,
    this: Value,
    _args: &[Value],
    continuations_top_call: bool,
) -> JsResult<Value> {
    cx.note_entry(&script.source_name, script.base_line);
    let outermost = cx
        .interpreter_nesting
        .load(std::sync::atomic::Ordering::Relaxed)
        == 0;
    if outermost {
        cx.set_top_call(Some(scope.clone()), continuations_top_call);
    }
    let frame = script_frame(script, scope, this);
    let result = run(cx, vec![frame]);
    if outermost {
        cx.set_top_call(None, false);
    }
    result
}

/// Call a function value with the continuation top-call flag raised.
pub(crate) fn call_with_continuations(
    cx: &Context,
    function: &Value,
    this: &Value,
    args: &[Value],
    scope: Arc<ScriptObject>,
) -> JsResult<Value> {
    let outermost = cx
        .interpreter_nesting
        .load(std::sync::atomic::Ordering::Relaxed)
        == 0;
    if outermost {
        cx.set_top_call(Some(scope), true);
    }
    let result = call_value(cx, function, this, args);
    if outermost {
        cx.set_top_call(None, false);
    }
    result
}

/// Restart a captured continuation with `value` as the result of the call
/// that suspended.
pub(crate) fn resume(cx: &Context, continuation: Continuation, value: Value) -> JsResult<Value> {
    let mut frames = continuation.frames;
    let Some(top) = frames.last_mut() else {
        return Err(EngineError::illegal_argument("empty continuation"));
    };
    top.stack.push(value);
    let outermost = cx
        .interpreter_nesting
        .load(std::sync::atomic::Ordering::Relaxed)
        == 0;
    if outermost {
        cx.set_top_call(Some(frames[0].scope.clone()), true);
    }
    let result = run(cx, frames);
    if outermost {
        cx.set_top_call(None, false);
    }
    result
}

// ==================== frame construction ====================

fn script_frame(script: Arc<ScriptFunction>, scope: Arc<ScriptObject>, this: Value) -> CallFrame {
    let global = global_of(&scope);
    CallFrame {
        locals: vec![Value::undefined(); script.local_count as usize],
        stack: Vec::with_capacity(script.max_stack as usize),
        pc: 0,
        scope,
        global,
        this_value: this,
        handlers: Vec::new(),
        enums: Vec::new(),
        pending: None,
        is_construct: false,
        construct_this: None,
        activation: None,
        script,
    }
}

fn function_frame(
    cx: &Context,
    script: &Arc<ScriptFunction>,
    closure_scope: &Arc<ScriptObject>,
    this: Value,
    args: &[Value],
    is_construct: bool,
    construct_this: Option<Value>,
) -> JsResult<CallFrame> {
    let global = global_of(closure_scope);
    let mut locals = vec![Value::undefined(); script.local_count as usize];
    let mut activation = None;
    let scope = if script.flags.needs_activation {
        let call_scope = ScriptObject::with_data(ObjectData::Plain, "Call", None);
        call_scope.set_parent_scope(Some(closure_scope.clone()));
        for (i, name) in script.param_names.iter().enumerate() {
            call_scope.define_property(
                PropertyKey::string(name),
                args.get(i).cloned().unwrap_or_else(Value::undefined),
                PropertyAttributes::new(PropertyAttributes::PERMANENT),
            );
        }
        if script.flags.uses_arguments {
            let arguments = ScriptObject::array(builtin_prototype(&global, "Array"));
            for (i, arg) in args.iter().enumerate() {
                arguments.define_property(
                    PropertyKey::index(i as u32),
                    arg.clone(),
                    PropertyAttributes::EMPTY,
                );
            }
            call_scope.define_property(
                PropertyKey::string("arguments"),
                Value::object(arguments),
                PropertyAttributes::new(PropertyAttributes::PERMANENT | PropertyAttributes::DONTENUM),
            );
        }
        activation = Some(call_scope.clone());
        cx.set_current_activation(Some(call_scope.clone()));
        call_scope
    } else {
        for i in 0..script.param_count as usize {
            if let Some(arg) = args.get(i) {
                locals[i] = arg.clone();
            }
        }
        closure_scope.clone()
    };
    // Non-strict calls substitute the global object for a nullish receiver.
    let this_value = if this.is_nullish() && !script.flags.is_strict {
        Value::object(global.clone())
    } else {
        this
    };
    Ok(CallFrame {
        locals,
        stack: Vec::with_capacity(script.max_stack as usize),
        pc: 0,
        scope,
        global,
        this_value,
        handlers: Vec::new(),
        enums: Vec::new(),
        pending: None,
        is_construct,
        construct_this,
        activation,
        script: script.clone(),
    })
}

// ==================== the dispatch loop ====================

/// Outcome of one dispatched instruction
enum Flow {
    Next,
    Finished(Value),
}

fn run(cx: &Context, frames: Vec<CallFrame>) -> JsResult<Value> {
    cx.interpreter_nesting
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let result = run_frames(cx, frames);
    let remaining = cx
        .interpreter_nesting
        .fetch_sub(1, std::sync::atomic::Ordering::Relaxed)
        - 1;
    if remaining == 0 {
        *cx.interpreter_position.write() = None;
        cx.set_current_activation(None);
    }
    result
}

fn run_frames(cx: &Context, mut frames: Vec<CallFrame>) -> JsResult<Value> {
    loop {
        let insn = {
            let frame = frames.last().expect("no active frame");
            frame.script.instructions[frame.pc]
        };
        cx.observe_instruction()?;
        frames.last_mut().expect("no active frame").pc += 1;

        match step(cx, &mut frames, insn) {
            Ok(Flow::Next) => {}
            Ok(Flow::Finished(value)) => return Ok(value),
            Err(error) => {
                if matches!(error, EngineError::ContinuationRequest) {
                    return Err(capture(cx, &frames));
                }
                if !error.is_script_catchable() {
                    return Err(error);
                }
                let error = attach_position(&frames, error);
                match unwind(cx, &mut frames, error) {
                    Ok(()) => {}
                    Err(error) => return Err(error),
                }
            }
        }
    }
}

/// Validate a capture request and snapshot the frame stack.
fn capture(cx: &Context, frames: &[CallFrame]) -> EngineError {
    let nesting = cx
        .interpreter_nesting
        .load(std::sync::atomic::Ordering::Relaxed);
    if !cx.is_continuations_top_call() || nesting != 1 {
        return EngineError::evaluator(
            "continuations can only be captured from calls performed \
             directly by a continuation-aware entry point",
        );
    }
    EngineError::ContinuationPending(Continuation {
        frames: frames.to_vec(),
    })
}

fn attach_position(frames: &[CallFrame], error: EngineError) -> EngineError {
    if error.position().is_some() {
        return error;
    }
    match frames.last() {
        Some(frame) => {
            let line = frame.script.line_for(frame.pc.saturating_sub(1));
            error.with_position(SourcePosition::new(frame.script.source_name.clone(), line))
        }
        None => error,
    }
}

fn step(cx: &Context, frames: &mut Vec<CallFrame>, insn: Instruction) -> JsResult<Flow> {
    use Instruction::*;
    let fi = frames.len() - 1;
    match insn {
        // ==================== constants and stack ====================
        LoadUndefined => frames[fi].stack.push(Value::undefined()),
        LoadNull => frames[fi].stack.push(Value::null()),
        LoadTrue => frames[fi].stack.push(Value::boolean(true)),
        LoadFalse => frames[fi].stack.push(Value::boolean(false)),
        LoadInt { value } => frames[fi].stack.push(Value::number(value as f64)),
        LoadConst { index } => {
            let constant = frames[fi]
                .script
                .constant(index)
                .cloned()
                .ok_or_else(|| EngineError::evaluator("constant index out of range"))?;
            let value = match constant {
                Constant::Number(n) => Value::number(n),
                Constant::String(s) => Value::string(s),
                Constant::RegExp { source, flags } => {
                    let global = frames[fi].global.clone();
                    crate::intrinsics_impl::regexp::new_regexp(cx, &global, &source, &flags)?
                }
            };
            frames[fi].stack.push(value);
        }
        Pop => {
            pop(&mut frames[fi]);
        }
        Dup => {
            let top = peek(&frames[fi]).clone();
            frames[fi].stack.push(top);
        }

        // ==================== variables ====================
        GetLocal { index } => {
            let value = frames[fi].locals[index as usize].clone();
            frames[fi].stack.push(value);
        }
        SetLocal { index } => {
            let value = peek(&frames[fi]).clone();
            frames[fi].locals[index as usize] = value;
        }
        GetName { name } => {
            let name = name_constant(&frames[fi], name)?;
            let value = get_name(cx, &frames[fi], &name)?;
            frames[fi].stack.push(value);
        }
        SetName { name } => {
            let name = name_constant(&frames[fi], name)?;
            let value = peek(&frames[fi]).clone();
            set_name(cx, &frames[fi], &name, value)?;
        }
        DeclareVar { name } => {
            let name = name_constant(&frames[fi], name)?;
            let key = PropertyKey::string(&name);
            let scope = frames[fi].scope.clone();
            if !scope.has_own(&key) {
                scope.define_property(
                    key,
                    Value::undefined(),
                    PropertyAttributes::new(PropertyAttributes::PERMANENT),
                );
            }
        }
        LoadThis => {
            let this = frames[fi].this_value.clone();
            frames[fi].stack.push(this);
        }
        TypeOfName { name } => {
            let name = name_constant(&frames[fi], name)?;
            let value = match get_name(cx, &frames[fi], &name) {
                Ok(value) => Value::string(value.type_of()),
                Err(_) => Value::string("undefined"),
            };
            frames[fi].stack.push(value);
        }

        // ==================== properties ====================
        GetProp { name } => {
            let name = name_constant(&frames[fi], name)?;
            let object = pop(&mut frames[fi]);
            let value = get_property(cx, &frames[fi].global, &object, &PropertyKey::string(&name))?;
            frames[fi].stack.push(value);
        }
        SetProp { name } => {
            let name = name_constant(&frames[fi], name)?;
            let value = pop(&mut frames[fi]);
            let object = pop(&mut frames[fi]);
            set_property(
                cx,
                &object,
                PropertyKey::string(&name),
                value.clone(),
                frames[fi].script.flags.is_strict,
            )?;
            frames[fi].stack.push(value);
        }
        GetElem => {
            let key = pop(&mut frames[fi]);
            let object = pop(&mut frames[fi]);
            let value = get_property(
                cx,
                &frames[fi].global,
                &object,
                &PropertyKey::from_value(&key),
            )?;
            frames[fi].stack.push(value);
        }
        SetElem => {
            let value = pop(&mut frames[fi]);
            let key = pop(&mut frames[fi]);
            let object = pop(&mut frames[fi]);
            set_property(
                cx,
                &object,
                PropertyKey::from_value(&key),
                value.clone(),
                frames[fi].script.flags.is_strict,
            )?;
            frames[fi].stack.push(value);
        }
        DeleteProp { name } => {
            let name = name_constant(&frames[fi], name)?;
            let object = pop(&mut frames[fi]);
            let deleted = match object.as_object() {
                Some(o) => o.delete(&PropertyKey::string(&name)),
                None => true,
            };
            frames[fi].stack.push(Value::boolean(deleted));
        }
        DeleteElem => {
            let key = pop(&mut frames[fi]);
            let object = pop(&mut frames[fi]);
            let deleted = match object.as_object() {
                Some(o) => o.delete(&PropertyKey::from_value(&key)),
                None => true,
            };
            frames[fi].stack.push(Value::boolean(deleted));
        }
        NewObject => {
            let proto = builtin_prototype(&frames[fi].global, "Object");
            frames[fi]
                .stack
                .push(Value::object(ScriptObject::plain(proto)));
        }
        NewArray { count } => {
            let array = ScriptObject::array(builtin_prototype(&frames[fi].global, "Array"));
            let start = frames[fi].stack.len() - count as usize;
            let items: Vec<Value> = frames[fi].stack.drain(start..).collect();
            for (i, item) in items.into_iter().enumerate() {
                array.define_property(
                    PropertyKey::index(i as u32),
                    item,
                    PropertyAttributes::EMPTY,
                );
            }
            frames[fi].stack.push(Value::object(array));
        }
        DefineProp { name } => {
            let name = name_constant(&frames[fi], name)?;
            let value = pop(&mut frames[fi]);
            if let Some(object) = peek(&frames[fi]).as_object() {
                object.define_property(PropertyKey::string(&name), value, PropertyAttributes::EMPTY);
            }
        }

        // ==================== arithmetic ====================
        Add => {
            let rhs = pop(&mut frames[fi]);
            let lhs = pop(&mut frames[fi]);
            frames[fi].stack.push(js_add(&lhs, &rhs));
        }
        Sub => binary_number(&mut frames[fi], |a, b| a - b),
        Mul => binary_number(&mut frames[fi], |a, b| a * b),
        Div => binary_number(&mut frames[fi], |a, b| a / b),
        Mod => binary_number(&mut frames[fi], |a, b| a % b),
        Neg => {
            let value = pop(&mut frames[fi]).to_number();
            frames[fi].stack.push(Value::number(-value));
        }
        Pos => {
            let value = pop(&mut frames[fi]).to_number();
            frames[fi].stack.push(Value::number(value));
        }

        // ==================== bitwise ====================
        BitAnd => binary_int(&mut frames[fi], |a, b| a & b),
        BitOr => binary_int(&mut frames[fi], |a, b| a | b),
        BitXor => binary_int(&mut frames[fi], |a, b| a ^ b),
        BitNot => {
            let value = pop(&mut frames[fi]).to_int32();
            frames[fi].stack.push(Value::number(!value as f64));
        }
        Shl => binary_int(&mut frames[fi], |a, b| a << (b & 31)),
        Shr => binary_int(&mut frames[fi], |a, b| a >> (b & 31)),
        Ushr => {
            let rhs = pop(&mut frames[fi]).to_uint32();
            let lhs = pop(&mut frames[fi]).to_uint32();
            frames[fi]
                .stack
                .push(Value::number((lhs >> (rhs & 31)) as f64));
        }

        // ==================== comparisons ====================
        Eq => {
            let rhs = pop(&mut frames[fi]);
            let lhs = pop(&mut frames[fi]);
            frames[fi].stack.push(Value::boolean(lhs.loose_equals(&rhs)));
        }
        Ne => {
            let rhs = pop(&mut frames[fi]);
            let lhs = pop(&mut frames[fi]);
            frames[fi]
                .stack
                .push(Value::boolean(!lhs.loose_equals(&rhs)));
        }
        StrictEq => {
            let rhs = pop(&mut frames[fi]);
            let lhs = pop(&mut frames[fi]);
            frames[fi]
                .stack
                .push(Value::boolean(lhs.strict_equals(&rhs)));
        }
        StrictNe => {
            let rhs = pop(&mut frames[fi]);
            let lhs = pop(&mut frames[fi]);
            frames[fi]
                .stack
                .push(Value::boolean(!lhs.strict_equals(&rhs)));
        }
        Lt => relational(&mut frames[fi], |o| o == std::cmp::Ordering::Less),
        Le => relational(&mut frames[fi], |o| o != std::cmp::Ordering::Greater),
        Gt => relational(&mut frames[fi], |o| o == std::cmp::Ordering::Greater),
        Ge => relational(&mut frames[fi], |o| o != std::cmp::Ordering::Less),
        Not => {
            let value = pop(&mut frames[fi]).to_boolean();
            frames[fi].stack.push(Value::boolean(!value));
        }

        // ==================== type operations ====================
        TypeOf => {
            let value = pop(&mut frames[fi]);
            frames[fi].stack.push(Value::string(value.type_of()));
        }
        In => {
            let object = pop(&mut frames[fi]);
            let key = pop(&mut frames[fi]);
            let Some(object) = object.as_object() else {
                return Err(EngineError::type_error(
                    "cannot use 'in' operator on a non-object",
                ));
            };
            let has = object.has(&PropertyKey::from_value(&key));
            frames[fi].stack.push(Value::boolean(has));
        }
        InstanceOf => {
            let ctor = pop(&mut frames[fi]);
            let value = pop(&mut frames[fi]);
            frames[fi]
                .stack
                .push(Value::boolean(instance_of(&value, &ctor)?));
        }

        // ==================== control flow ====================
        Jump { offset } => jump(&mut frames[fi], offset),
        JumpIfFalse { offset } => {
            if !pop(&mut frames[fi]).to_boolean() {
                jump(&mut frames[fi], offset);
            }
        }
        JumpIfTrue { offset } => {
            if pop(&mut frames[fi]).to_boolean() {
                jump(&mut frames[fi], offset);
            }
        }

        // ==================== functions ====================
        MakeClosure { function } => {
            let unit = frames[fi]
                .script
                .functions
                .get(function as usize)
                .cloned()
                .ok_or_else(|| EngineError::evaluator("function index out of range"))?;
            let scope = frames[fi].scope.clone();
            let value = instantiate_function(cx, &unit, scope);
            frames[fi].stack.push(value);
        }
        Call { argc } => {
            note_position(cx, &frames[fi]);
            let args = pop_args(&mut frames[fi], argc);
            let callee = pop(&mut frames[fi]);
            let this = Value::object(frames[fi].global.clone());
            invoke(cx, frames, callee, this, args, false, None)?;
        }
        CallMethod { name, argc } => {
            note_position(cx, &frames[fi]);
            let name = name_constant(&frames[fi], name)?;
            let args = pop_args(&mut frames[fi], argc);
            let receiver = pop(&mut frames[fi]);
            let callee = get_property(
                cx,
                &frames[fi].global,
                &receiver,
                &PropertyKey::string(&name),
            )?;
            if callee.is_nullish() {
                return Err(EngineError::type_error(format!(
                    "{}.{} is not a function",
                    receiver.to_js_string(),
                    name
                )));
            }
            invoke(cx, frames, callee, receiver, args, false, None)?;
        }
        New { argc } => {
            note_position(cx, &frames[fi]);
            let args = pop_args(&mut frames[fi], argc);
            let callee = pop(&mut frames[fi]);
            construct(cx, frames, callee, args)?;
        }
        Return => {
            let value = pop(&mut frames[fi]);
            if let Some(flow) = do_return(cx, frames, value) {
                return Ok(flow);
            }
        }
        ReturnUndefined => {
            if let Some(flow) = do_return(cx, frames, Value::undefined()) {
                return Ok(flow);
            }
        }

        // ==================== exceptions ====================
        Throw => {
            let value = pop(&mut frames[fi]);
            return Err(EngineError::Throw {
                value,
                position: None,
            });
        }
        PushTry {
            catch_offset,
            finally_offset,
        } => {
            let pc = frames[fi].pc;
            let to_pc = |offset: i32| {
                if offset < 0 {
                    None
                } else {
                    Some((pc as i64 + offset as i64) as usize)
                }
            };
            let depth = frames[fi].stack.len();
            frames[fi].handlers.push(TryHandler {
                catch_pc: to_pc(catch_offset),
                finally_pc: to_pc(finally_offset),
                stack_depth: depth,
            });
        }
        PopTry => {
            frames[fi].handlers.pop();
        }
        EndFinally => {
            let pending = frames[fi].pending.take();
            match pending {
                Some(Completion::Throw(error)) => return Err(error),
                Some(Completion::Return(value)) => {
                    if let Some(flow) = do_return(cx, frames, value) {
                        return Ok(flow);
                    }
                }
                None => {}
            }
        }

        // ==================== enumeration ====================
        EnumInit => {
            let value = pop(&mut frames[fi]);
            let state = match value.as_object() {
                Some(object) => EnumState {
                    object: Some(object.clone()),
                    keys: enumerate_keys(cx, object),
                    index: 0,
                },
                None => EnumState {
                    object: None,
                    keys: Vec::new(),
                    index: 0,
                },
            };
            frames[fi].enums.push(state);
        }
        EnumNext { offset } => {
            let next = {
                let state = frames[fi].enums.last_mut().expect("no open enumeration");
                let mut found = None;
                while state.index < state.keys.len() {
                    let key = state.keys[state.index].clone();
                    state.index += 1;
                    // Keys deleted mid-loop are skipped.
                    let still_there = state
                        .object
                        .as_ref()
                        .is_some_and(|o| o.has(&PropertyKey::string(&key)));
                    if still_there {
                        found = Some(key);
                        break;
                    }
                }
                found
            };
            match next {
                Some(key) => frames[fi].stack.push(Value::String(key)),
                None => jump(&mut frames[fi], offset),
            }
        }
        EnumDone => {
            frames[fi].enums.pop();
        }
    }
    Ok(Flow::Next)
}

// ==================== calls ====================

fn invoke(
    cx: &Context,
    frames: &mut Vec<CallFrame>,
    callee: Value,
    this: Value,
    args: Vec<Value>,
    is_construct: bool,
    construct_this: Option<Value>,
) -> JsResult<()> {
    let Some(object) = callee.as_object().filter(|o| o.is_callable()) else {
        return Err(EngineError::type_error(format!(
            "{} is not a function",
            callee.to_js_string()
        )));
    };
    let Some(function) = object.as_function() else {
        return Err(EngineError::type_error("not a function"));
    };
    match &function.kind {
        FunctionKind::Native(native) => {
            let result = native(cx, &this, &args)?;
            let result = if is_construct && result.as_object().is_none() {
                construct_this.unwrap_or(result)
            } else {
                result
            };
            frames.last_mut().expect("no active frame").stack.push(result);
            Ok(())
        }
        FunctionKind::Script { script, scope } => {
            if frames.len() >= cx.maximum_interpreter_stack_depth() {
                return Err(EngineError::range_error(
                    "maximum interpreter stack depth exceeded",
                ));
            }
            let frame = function_frame(
                cx,
                script,
                scope,
                this,
                &args,
                is_construct,
                construct_this,
            )?;
            frames.push(frame);
            Ok(())
        }
    }
}

fn construct(
    cx: &Context,
    frames: &mut Vec<CallFrame>,
    callee: Value,
    args: Vec<Value>,
) -> JsResult<()> {
    let Some(object) = callee.as_object().filter(|o| o.is_callable()) else {
        return Err(EngineError::type_error(format!(
            "{} is not a constructor",
            callee.to_js_string()
        )));
    };
    let is_native = matches!(
        object.as_function().map(|f| &f.kind),
        Some(FunctionKind::Native(_))
    );
    if is_native {
        return invoke(cx, frames, callee, Value::undefined(), args, true, None);
    }
    let proto = object
        .raw_get(&PropertyKey::string("prototype"))
        .and_then(|p| p.as_object().cloned());
    let this = Value::object(ScriptObject::plain(proto));
    invoke(cx, frames, callee, this.clone(), args, true, Some(this))
}

/// Unwind a returning frame, honoring finally clauses. Returns the overall
/// result when the bottom frame finished.
fn do_return(cx: &Context, frames: &mut Vec<CallFrame>, value: Value) -> Option<Flow> {
    {
        let frame = frames.last_mut().expect("no active frame");
        while let Some(handler) = frame.handlers.pop() {
            if let Some(finally_pc) = handler.finally_pc {
                frame.stack.truncate(handler.stack_depth);
                frame.pending = Some(Completion::Return(value));
                frame.pc = finally_pc;
                return None;
            }
        }
    }
    let finished = frames.pop().expect("no active frame");
    let mut result = value;
    if finished.is_construct && result.as_object().is_none() {
        result = finished
            .construct_this
            .unwrap_or_else(Value::undefined);
    }
    cx.set_current_activation(frames.iter().rev().find_map(|f| f.activation.clone()));
    match frames.last_mut() {
        Some(parent) => {
            parent.stack.push(result);
            None
        }
        None => Some(Flow::Finished(result)),
    }
}

/// Unwind a script-catchable error to the nearest handler; errors with no
/// handler in any frame propagate out.
fn unwind(cx: &Context, frames: &mut Vec<CallFrame>, error: EngineError) -> Result<(), EngineError> {
    loop {
        let Some(frame) = frames.last_mut() else {
            return Err(error);
        };
        while let Some(handler) = frame.handlers.pop() {
            frame.stack.truncate(handler.stack_depth);
            if let Some(catch_pc) = handler.catch_pc {
                if handler.finally_pc.is_some() {
                    // Exceptions from the catch body still run the finally.
                    frame.handlers.push(TryHandler {
                        catch_pc: None,
                        finally_pc: handler.finally_pc,
                        stack_depth: handler.stack_depth,
                    });
                }
                frame.stack.push(error_to_value(cx, &error));
                frame.pc = catch_pc;
                return Ok(());
            }
            if let Some(finally_pc) = handler.finally_pc {
                frame.pending = Some(Completion::Throw(error));
                frame.pc = finally_pc;
                return Ok(());
            }
        }
        frames.pop();
    }
}

/// The value scripts observe in `catch` for an engine error.
fn error_to_value(cx: &Context, error: &EngineError) -> Value {
    match error {
        EngineError::Throw { value, .. } => value.clone(),
        EngineError::Ecma { kind, message, .. } => {
            crate::intrinsics_impl::errors::new_error_value(
                cx,
                kind.constructor_name(),
                message,
            )
        }
        EngineError::Wrapped { message, .. } => {
            // Wrapped host details stay opaque unless enhanced access is on.
            let text = if cx.has_feature(Feature::EnhancedJavaAccess) {
                message.clone()
            } else {
                "wrapped host exception".to_string()
            };
            crate::intrinsics_impl::errors::new_error_value(cx, "Error", &text)
        }
        other => crate::intrinsics_impl::errors::new_error_value(cx, "Error", &other.to_string()),
    }
}

// ==================== names and properties ====================

fn name_constant(frame: &CallFrame, index: u16) -> JsResult<Arc<str>> {
    frame
        .script
        .name_constant(index)
        .map(Arc::from)
        .ok_or_else(|| EngineError::evaluator("name constant out of range"))
}

fn get_name(cx: &Context, frame: &CallFrame, name: &str) -> JsResult<Value> {
    let key = PropertyKey::string(name);
    let mut scope = Some(frame.scope.clone());
    while let Some(object) = scope {
        if object.has(&key)
            && let Some(value) = object.get(cx, &key)?
        {
            return Ok(value);
        }
        scope = object.parent_scope();
    }
    Err(EngineError::reference_error(format!(
        "\"{}\" is not defined",
        name
    )))
}

fn set_name(cx: &Context, frame: &CallFrame, name: &str, value: Value) -> JsResult<()> {
    let key = PropertyKey::string(name);
    let mut scope = Some(frame.scope.clone());
    while let Some(object) = scope {
        if object.has(&key) {
            object.put(cx, key, value)?;
            return Ok(());
        }
        let parent = object.parent_scope();
        if parent.is_none() {
            // Undeclared assignment lands on the outermost scope; strict
            // code rejects it.
            if frame.script.flags.is_strict {
                return Err(EngineError::reference_error(format!(
                    "assignment to undeclared variable \"{}\"",
                    name
                )));
            }
            object.put(cx, key, value)?;
            return Ok(());
        }
        scope = parent;
    }
    Ok(())
}

/// Property lookup on any value: objects walk their chain; primitive
/// receivers answer their own slots and then their builtin prototype.
pub(crate) fn get_property(
    cx: &Context,
    global: &Arc<ScriptObject>,
    receiver: &Value,
    key: &PropertyKey,
) -> JsResult<Value> {
    match receiver {
        Value::Object(object) => Ok(object.get(cx, key)?.unwrap_or_else(Value::undefined)),
        Value::String(s) => {
            if let PropertyKey::String(name) = key
                && &**name == "length"
            {
                return Ok(Value::number(s.encode_utf16().count() as f64));
            }
            if let PropertyKey::Index(i) = key {
                let unit = s.encode_utf16().nth(*i as usize);
                return Ok(match unit {
                    Some(unit) => Value::string(String::from_utf16_lossy(&[unit])),
                    None => Value::undefined(),
                });
            }
            proto_lookup(cx, global, "String", key)
        }
        Value::Number(_) => proto_lookup(cx, global, "Number", key),
        Value::Boolean(_) => proto_lookup(cx, global, "Boolean", key),
        Value::Undefined | Value::Null => Err(EngineError::type_error(format!(
            "cannot read property \"{}\" of {}",
            key.display(),
            receiver.to_js_string()
        ))),
        Value::Symbol(_) => proto_lookup(cx, global, "Symbol", key),
    }
}

fn proto_lookup(
    cx: &Context,
    global: &Arc<ScriptObject>,
    constructor: &str,
    key: &PropertyKey,
) -> JsResult<Value> {
    match builtin_prototype(global, constructor) {
        Some(proto) => Ok(proto.get(cx, key)?.unwrap_or_else(Value::undefined)),
        None => Ok(Value::undefined()),
    }
}

fn set_property(
    cx: &Context,
    receiver: &Value,
    key: PropertyKey,
    value: Value,
    strict: bool,
) -> JsResult<()> {
    let Some(object) = receiver.as_object() else {
        if receiver.is_nullish() {
            return Err(EngineError::type_error(format!(
                "cannot set property \"{}\" of {}",
                key.display(),
                receiver.to_js_string()
            )));
        }
        // Assignments to primitive receivers evaporate.
        return Ok(());
    };
    let stored = object.put(cx, key.clone(), value)?;
    if !stored && strict {
        return Err(EngineError::type_error(format!(
            "cannot assign to read only property \"{}\"",
            key.display()
        )));
    }
    Ok(())
}

fn instance_of(value: &Value, ctor: &Value) -> JsResult<bool> {
    let Some(ctor) = ctor.as_object().filter(|o| o.is_callable()) else {
        return Err(EngineError::type_error(
            "right-hand side of instanceof is not callable",
        ));
    };
    let Some(prototype) = ctor
        .raw_get(&PropertyKey::string("prototype"))
        .and_then(|p| p.as_object().cloned())
    else {
        return Ok(false);
    };
    let Some(object) = value.as_object() else {
        return Ok(false);
    };
    let mut proto = object.prototype();
    while let Some(p) = proto {
        if Arc::ptr_eq(&p, &prototype) {
            return Ok(true);
        }
        proto = p.prototype();
    }
    Ok(false)
}

/// for-in key snapshot: enumerable keys of the object and its prototype
/// chain, shadowed names reported once.
fn enumerate_keys(cx: &Context, object: &Arc<ScriptObject>) -> Vec<Arc<str>> {
    let ids_first = cx.has_feature(Feature::EnumerateIdsFirst);
    let mut seen: Vec<Arc<str>> = Vec::new();
    let mut current = Some(object.clone());
    while let Some(o) = current {
        for key in o.own_keys(true, ids_first) {
            if let PropertyKey::Symbol(_) = key {
                continue;
            }
            let name: Arc<str> = Arc::from(key.display());
            if !seen.iter().any(|s| **s == *name) {
                seen.push(name);
            }
        }
        current = o.prototype();
    }
    seen
}

// ==================== small helpers ====================

fn pop(frame: &mut CallFrame) -> Value {
    frame.stack.pop().expect("value stack underflow")
}

fn peek(frame: &CallFrame) -> &Value {
    frame.stack.last().expect("value stack underflow")
}

fn pop_args(frame: &mut CallFrame, argc: u16) -> Vec<Value> {
    let start = frame.stack.len() - argc as usize;
    frame.stack.drain(start..).collect()
}

fn jump(frame: &mut CallFrame, offset: i32) {
    frame.pc = (frame.pc as i64 + offset as i64) as usize;
}

fn note_position(cx: &Context, frame: &CallFrame) {
    let line = frame.script.line_for(frame.pc.saturating_sub(1));
    *cx.interpreter_position.write() = Some(SourcePosition::new(
        frame.script.source_name.clone(),
        line,
    ));
}

fn binary_number(frame: &mut CallFrame, op: impl Fn(f64, f64) -> f64) {
    let rhs = pop(frame).to_number();
    let lhs = pop(frame).to_number();
    frame.stack.push(Value::number(op(lhs, rhs)));
}

fn binary_int(frame: &mut CallFrame, op: impl Fn(i32, i32) -> i32) {
    let rhs = pop(frame).to_int32();
    let lhs = pop(frame).to_int32();
    frame.stack.push(Value::number(op(lhs, rhs) as f64));
}

fn relational(frame: &mut CallFrame, decide: impl Fn(std::cmp::Ordering) -> bool) {
    let rhs = pop(frame);
    let lhs = pop(frame);
    let result = match js_compare(&lhs, &rhs) {
        Some(ordering) => decide(ordering),
        None => false, // NaN involved
    };
    frame.stack.push(Value::boolean(result));
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::string(object.default_string()),
        other => other.clone(),
    }
}

/// `+` semantics: string concatenation when either primitive side is a
/// string, numeric addition otherwise.
pub(crate) fn js_add(lhs: &Value, rhs: &Value) -> Value {
    let lhs = to_primitive(lhs);
    let rhs = to_primitive(rhs);
    if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
        let mut out = lhs.to_js_string();
        out.push_str(&rhs.to_js_string());
        Value::string(out)
    } else {
        Value::number(lhs.to_number() + rhs.to_number())
    }
}

/// Abstract relational comparison; `None` when NaN poisons it.
fn js_compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    let lhs = to_primitive(lhs);
    let rhs = to_primitive(rhs);
    if let (Value::String(a), Value::String(b)) = (&lhs, &rhs) {
        return Some(a.cmp(b));
    }
    let a = lhs.to_number();
    let b = rhs.to_number();
    a.partial_cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_add_semantics() {
        assert_eq!(
            js_add(&Value::string("a"), &Value::number(1.0)).to_js_string(),
            "a1"
        );
        assert_eq!(
            js_add(&Value::number(1.0), &Value::number(2.0)).as_number(),
            Some(3.0)
        );
        assert_eq!(
            js_add(&Value::number(1.0), &Value::string("2")).to_js_string(),
            "12"
        );
    }

    #[test]
    fn test_compare_nan_is_false() {
        assert!(js_compare(&Value::number(f64::NAN), &Value::number(1.0)).is_none());
        assert_eq!(
            js_compare(&Value::string("a"), &Value::string("b")),
            Some(std::cmp::Ordering::Less)
        );
    }
}
