//! Execution context lifecycle
//!
//! A [`Context`] is the per-thread ambient state of the engine: language
//! version, feature flags, reporters and hooks, the microtask queue, and
//! the interpreter bookkeeping needed for continuations. A context is bound
//! to at most one thread at a time; [`ContextFactory::enter`] binds,
//! [`ContextFactory::exit`] unbinds when the nesting counter reaches zero.
//!
//! All setters fail with an invalid-state signal once the context is sealed.

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use marten_vm_bytecode::DebuggableScript;
use marten_vm_compiler::{CompilerEnv, LanguageVersion};

use crate::error::{EngineError, JsResult, SourcePosition};
use crate::features::{Feature, default_for};
use crate::hooks::{
    ClassShutter, ContextListener, Debugger, NativeBackend, NativeBackendError, PropertyListener,
    RegExpProxy, SecurityController, WrapFactory,
};
use crate::microtask::{Microtask, MicrotaskQueue};
use crate::object::{PropertyKey, ScriptObject};
use crate::regexp::RegExpStatics;
use crate::reporter::{DefaultErrorReporter, ErrorReporter};
use crate::script::Script;
use crate::value::Value;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Context>>> = const { RefCell::new(None) };
}

/// Tracker for unhandled promise rejections
pub trait UnhandledRejectionTracker: Send + Sync {
    /// A rejection became unhandled (or was later handled)
    fn track(&self, promise: &Value, reason: &Value, handled: bool);
}

/// Observer invoked when the executed-instruction counter crosses the
/// configured threshold. Returning an error terminates the running script.
pub type InstructionObserver = Arc<dyn Fn(&Context, u64) -> JsResult<()> + Send + Sync>;

/// Per-thread ambient engine state
pub struct Context {
    factory: Weak<ContextFactory>,

    // Language configuration
    language_version: RwLock<LanguageVersion>,
    feature_overrides: RwLock<FxHashMap<Feature, bool>>,
    locale: RwLock<String>,
    time_zone: RwLock<String>,

    // Host hooks
    error_reporter: RwLock<Arc<dyn ErrorReporter>>,
    wrap_factory: RwLock<Option<Arc<dyn WrapFactory>>>,
    debugger: RwLock<Option<(Arc<dyn Debugger>, Option<Arc<dyn Any + Send + Sync>>)>>,
    security_controller: RwLock<Option<Arc<dyn SecurityController>>>,
    class_shutter: RwLock<Option<Arc<dyn ClassShutter>>>,
    application_loader: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    property_listeners: RwLock<Vec<Arc<dyn PropertyListener>>>,
    rejection_tracker: RwLock<Option<Arc<dyn UnhandledRejectionTracker>>>,
    regexp_proxy: OnceLock<Arc<dyn RegExpProxy>>,

    // Thread binding
    bound_thread: Mutex<Option<ThreadId>>,
    nesting: AtomicUsize,

    // Sealing
    sealed: AtomicBool,
    seal_key: RwLock<Option<Value>>,

    // Thread-local key/value storage tied to the context lifetime
    thread_locals: RwLock<FxHashMap<String, Arc<dyn Any + Send + Sync>>>,

    // Microtasks
    microtasks: MicrotaskQueue,

    // Compilation flags
    generate_source: AtomicBool,
    generate_debug_info: AtomicBool,
    interpreted_mode: AtomicBool,

    // Interpreter limits and observation
    max_stack_depth: AtomicUsize,
    instruction_threshold: AtomicU64,
    instruction_count: AtomicU64,
    instruction_observer: RwLock<Option<InstructionObserver>>,

    // Interpreter bookkeeping (continuations, scope back-references)
    pub(crate) interpreter_nesting: AtomicUsize,
    continuations_top_call: AtomicBool,
    top_call_scope: RwLock<Option<Arc<ScriptObject>>>,
    current_activation: RwLock<Option<Arc<ScriptObject>>>,

    // Legacy RegExp statics ($1..$9, lastMatch, contexts)
    regexp_statics: RwLock<RegExpStatics>,

    // Most recent evaluation entry, the fallback for positions raised
    // outside any script frame
    last_entry: RwLock<Option<(String, u32)>>,

    // Position of the innermost interpreted frame, live while script runs
    pub(crate) interpreter_position: RwLock<Option<SourcePosition>>,

    // Cached language-library handle
    library_cache: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Context {
    fn new(factory: Weak<ContextFactory>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            language_version: RwLock::new(LanguageVersion::DEFAULT),
            feature_overrides: RwLock::new(FxHashMap::default()),
            locale: RwLock::new("en-US".to_string()),
            time_zone: RwLock::new("UTC".to_string()),
            error_reporter: RwLock::new(Arc::new(DefaultErrorReporter)),
            wrap_factory: RwLock::new(None),
            debugger: RwLock::new(None),
            security_controller: RwLock::new(None),
            class_shutter: RwLock::new(None),
            application_loader: RwLock::new(None),
            property_listeners: RwLock::new(Vec::new()),
            rejection_tracker: RwLock::new(None),
            regexp_proxy: OnceLock::new(),
            bound_thread: Mutex::new(None),
            nesting: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            seal_key: RwLock::new(None),
            thread_locals: RwLock::new(FxHashMap::default()),
            microtasks: MicrotaskQueue::new(),
            generate_source: AtomicBool::new(true),
            generate_debug_info: AtomicBool::new(true),
            interpreted_mode: AtomicBool::new(true),
            max_stack_depth: AtomicUsize::new(usize::MAX),
            instruction_threshold: AtomicU64::new(0),
            instruction_count: AtomicU64::new(0),
            instruction_observer: RwLock::new(None),
            interpreter_nesting: AtomicUsize::new(0),
            continuations_top_call: AtomicBool::new(false),
            top_call_scope: RwLock::new(None),
            current_activation: RwLock::new(None),
            regexp_statics: RwLock::new(RegExpStatics::default()),
            last_entry: RwLock::new(None),
            interpreter_position: RwLock::new(None),
            library_cache: RwLock::new(None),
        })
    }

    /// The context bound to the calling thread, when inside enter/exit
    pub fn current() -> Option<Arc<Context>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    fn check_not_sealed(&self) -> JsResult<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(EngineError::illegal_state("context is sealed"));
        }
        Ok(())
    }

    fn check_bound_thread(&self) -> JsResult<()> {
        let bound = *self.bound_thread.lock();
        if bound != Some(std::thread::current().id()) {
            return Err(EngineError::illegal_state(
                "context is not bound to the calling thread",
            ));
        }
        Ok(())
    }

    // ==================== sealing ====================

    /// Freeze every setter. With a non-null key the context can later be
    /// unsealed by presenting the identical key; sealing with `None` is
    /// permanent.
    pub fn seal(&self, key: Option<Value>) -> JsResult<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(EngineError::illegal_state("context is already sealed"));
        }
        *self.seal_key.write() = key;
        self.sealed.store(true, Ordering::Release);
        Ok(())
    }

    /// Restore mutability. Succeeds only with the identical non-null key
    /// supplied at sealing time.
    pub fn unseal(&self, key: Value) -> JsResult<()> {
        if !self.sealed.load(Ordering::Acquire) {
            return Err(EngineError::illegal_state("context is not sealed"));
        }
        let stored = self.seal_key.read().clone();
        match stored {
            Some(stored) if stored.same_reference(&key) => {
                self.sealed.store(false, Ordering::Release);
                *self.seal_key.write() = None;
                Ok(())
            }
            _ => Err(EngineError::illegal_state("invalid unseal key")),
        }
    }

    /// Is the context sealed?
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    // ==================== language configuration ====================

    /// The active language version
    pub fn language_version(&self) -> LanguageVersion {
        *self.language_version.read()
    }

    /// Select a language version
    pub fn set_language_version(&self, version: LanguageVersion) -> JsResult<()> {
        self.check_not_sealed()?;
        if version == LanguageVersion::Unknown {
            return Err(EngineError::illegal_argument("unknown language version"));
        }
        *self.language_version.write() = version;
        Ok(())
    }

    /// Select a language version by its numeric tag (100..180, 200, 0)
    pub fn set_language_version_tag(&self, tag: i32) -> JsResult<()> {
        let version = LanguageVersion::from_tag(tag)
            .ok_or_else(|| EngineError::illegal_argument(format!("bad version tag {}", tag)))?;
        self.set_language_version(version)
    }

    /// Query a feature flag (per-context override, else the
    /// version-dependent default). STRICT_MODE implies STRICT_VARS and
    /// STRICT_EVAL.
    pub fn has_feature(&self, feature: Feature) -> bool {
        if matches!(feature, Feature::StrictVars | Feature::StrictEval)
            && self.has_feature(Feature::StrictMode)
        {
            return true;
        }
        if let Some(&value) = self.feature_overrides.read().get(&feature) {
            return value;
        }
        default_for(feature, self.language_version())
    }

    /// Override a feature flag for this context
    pub fn set_feature(&self, feature: Feature, enabled: bool) -> JsResult<()> {
        self.check_not_sealed()?;
        self.feature_overrides.write().insert(feature, enabled);
        Ok(())
    }

    /// The locale used by locale-sensitive builtins
    pub fn locale(&self) -> String {
        self.locale.read().clone()
    }

    /// Set the locale
    pub fn set_locale(&self, locale: impl Into<String>) -> JsResult<()> {
        self.check_not_sealed()?;
        *self.locale.write() = locale.into();
        Ok(())
    }

    /// The time zone name
    pub fn time_zone(&self) -> String {
        self.time_zone.read().clone()
    }

    /// Set the time zone
    pub fn set_time_zone(&self, zone: impl Into<String>) -> JsResult<()> {
        self.check_not_sealed()?;
        *self.time_zone.write() = zone.into();
        Ok(())
    }

    // ==================== host hooks ====================

    /// The active error reporter
    pub fn error_reporter(&self) -> Arc<dyn ErrorReporter> {
        self.error_reporter.read().clone()
    }

    /// Replace the error reporter, returning the previous one
    pub fn set_error_reporter(
        &self,
        reporter: Arc<dyn ErrorReporter>,
    ) -> JsResult<Arc<dyn ErrorReporter>> {
        self.check_not_sealed()?;
        let mut slot = self.error_reporter.write();
        let old = slot.clone();
        *slot = reporter;
        Ok(old)
    }

    /// The wrap factory, if any
    pub fn wrap_factory(&self) -> Option<Arc<dyn WrapFactory>> {
        self.wrap_factory.read().clone()
    }

    /// Install a wrap factory
    pub fn set_wrap_factory(&self, factory: Arc<dyn WrapFactory>) -> JsResult<()> {
        self.check_not_sealed()?;
        *self.wrap_factory.write() = Some(factory);
        Ok(())
    }

    /// Attach a debugger with opaque host data
    pub fn set_debugger(
        &self,
        debugger: Option<Arc<dyn Debugger>>,
        data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> JsResult<()> {
        self.check_not_sealed()?;
        *self.debugger.write() = debugger.map(|d| (d, data));
        Ok(())
    }

    /// The attached debugger, if any
    pub fn debugger(&self) -> Option<Arc<dyn Debugger>> {
        self.debugger.read().as_ref().map(|(d, _)| d.clone())
    }

    /// The opaque data attached with the debugger
    pub fn debugger_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.debugger.read().as_ref().and_then(|(_, d)| d.clone())
    }

    /// Install the per-context security controller. Write-once.
    pub fn set_security_controller(
        &self,
        controller: Arc<dyn SecurityController>,
    ) -> JsResult<()> {
        self.check_not_sealed()?;
        let mut slot = self.security_controller.write();
        if slot.is_some() {
            return Err(EngineError::illegal_state(
                "security controller is already set",
            ));
        }
        *slot = Some(controller);
        Ok(())
    }

    /// The effective security controller (per-context, else global)
    pub fn security_controller(&self) -> Option<Arc<dyn SecurityController>> {
        self.security_controller
            .read()
            .clone()
            .or_else(crate::hooks::global_security_controller)
    }

    /// Install the class-access filter. Singleton per context: a second
    /// install fails.
    pub fn set_class_shutter(&self, shutter: Arc<dyn ClassShutter>) -> JsResult<()> {
        self.check_not_sealed()?;
        let mut slot = self.class_shutter.write();
        if slot.is_some() {
            return Err(EngineError::illegal_state("class shutter is already set"));
        }
        *slot = Some(shutter);
        Ok(())
    }

    /// The class-access filter, if any
    pub fn class_shutter(&self) -> Option<Arc<dyn ClassShutter>> {
        self.class_shutter.read().clone()
    }

    /// Set the application class/module loader handle
    pub fn set_application_loader(&self, loader: Arc<dyn Any + Send + Sync>) -> JsResult<()> {
        self.check_not_sealed()?;
        *self.application_loader.write() = Some(loader);
        Ok(())
    }

    /// The application loader handle, if any
    pub fn application_loader(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.application_loader.read().clone()
    }

    /// Register a property-change listener
    pub fn add_property_listener(&self, listener: Arc<dyn PropertyListener>) -> JsResult<()> {
        self.check_not_sealed()?;
        self.property_listeners.write().push(listener);
        Ok(())
    }

    /// Remove a previously registered listener (by identity)
    pub fn remove_property_listener(&self, listener: &Arc<dyn PropertyListener>) {
        self.property_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn notify_property_change(
        &self,
        object: &Arc<ScriptObject>,
        key: &PropertyKey,
        value: &Value,
    ) {
        for listener in self.property_listeners.read().iter() {
            listener.property_changed(object, key, value);
        }
    }

    /// Install the unhandled-rejection tracker
    pub fn set_unhandled_rejection_tracker(
        &self,
        tracker: Arc<dyn UnhandledRejectionTracker>,
    ) -> JsResult<()> {
        self.check_not_sealed()?;
        *self.rejection_tracker.write() = Some(tracker);
        Ok(())
    }

    /// Report a rejection state change to the tracker, if one is installed
    pub fn track_unhandled_rejection(&self, promise: &Value, reason: &Value, handled: bool) {
        if let Some(tracker) = self.rejection_tracker.read().clone() {
            tracker.track(promise, reason, handled);
        }
    }

    /// The pluggable regexp provider, discovered on first use
    pub fn regexp_proxy(&self) -> Arc<dyn RegExpProxy> {
        self.regexp_proxy
            .get_or_init(|| crate::hooks::global_regexp_loader().new_proxy())
            .clone()
    }

    // ==================== thread-local storage ====================

    /// Store a value tied to the context lifetime
    pub fn put_thread_local(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.thread_locals.write().insert(key.into(), value);
    }

    /// Fetch a stored value
    pub fn get_thread_local(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.thread_locals.read().get(key).cloned()
    }

    /// Remove a stored value
    pub fn remove_thread_local(&self, key: &str) {
        self.thread_locals.write().remove(key);
    }

    // ==================== microtasks ====================

    /// Append a callable to the FIFO microtask queue
    pub fn enqueue_microtask(&self, task: Microtask) {
        self.microtasks.enqueue(task);
    }

    /// Drain the microtask queue by running tasks in insertion order until
    /// it is empty; tasks enqueued while draining run in the same call.
    /// Idempotent when the queue is empty. Must be called on the bound
    /// thread.
    pub fn process_microtasks(&self) -> JsResult<()> {
        self.check_bound_thread()?;
        while let Some(task) = self.microtasks.dequeue() {
            task(self);
        }
        Ok(())
    }

    /// Number of queued microtasks
    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }

    // ==================== compilation flags and limits ====================

    /// Retain raw source on compiled artifacts?
    pub fn generate_source(&self) -> bool {
        self.generate_source.load(Ordering::Relaxed)
    }

    /// Toggle raw-source retention
    pub fn set_generate_source(&self, enabled: bool) -> JsResult<()> {
        self.check_not_sealed()?;
        self.generate_source.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Emit debug line tables?
    pub fn generate_debug_info(&self) -> bool {
        self.generate_debug_info.load(Ordering::Relaxed)
    }

    /// Toggle debug info emission
    pub fn set_generate_debug_info(&self, enabled: bool) -> JsResult<()> {
        self.check_not_sealed()?;
        self.generate_debug_info.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Force the interpreter even when a native backend is registered
    pub fn is_interpreted_mode(&self) -> bool {
        self.interpreted_mode.load(Ordering::Relaxed)
    }

    /// Toggle interpreted mode
    pub fn set_interpreted_mode(&self, interpreted: bool) -> JsResult<()> {
        self.check_not_sealed()?;
        self.interpreted_mode.store(interpreted, Ordering::Relaxed);
        Ok(())
    }

    /// Maximum interpreter frame depth (usize::MAX means unbounded)
    pub fn maximum_interpreter_stack_depth(&self) -> usize {
        self.max_stack_depth.load(Ordering::Relaxed)
    }

    /// Bound the interpreter frame depth
    pub fn set_maximum_interpreter_stack_depth(&self, depth: usize) -> JsResult<()> {
        self.check_not_sealed()?;
        self.max_stack_depth.store(depth, Ordering::Relaxed);
        Ok(())
    }

    /// Instruction-observer threshold (0 disables observation)
    pub fn instruction_observer_threshold(&self) -> u64 {
        self.instruction_threshold.load(Ordering::Relaxed)
    }

    /// Set the instruction-observer threshold
    pub fn set_instruction_observer_threshold(&self, threshold: u64) -> JsResult<()> {
        self.check_not_sealed()?;
        self.instruction_threshold.store(threshold, Ordering::Relaxed);
        Ok(())
    }

    /// Install the observer called at each threshold crossing
    pub fn set_instruction_observer(&self, observer: Option<InstructionObserver>) -> JsResult<()> {
        self.check_not_sealed()?;
        *self.instruction_observer.write() = observer;
        Ok(())
    }

    /// Count one executed instruction; invokes the observer at each
    /// threshold crossing. An observer error terminates the script.
    pub(crate) fn observe_instruction(&self) -> JsResult<()> {
        let threshold = self.instruction_threshold.load(Ordering::Relaxed);
        if threshold == 0 {
            return Ok(());
        }
        let count = self.instruction_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= threshold {
            self.instruction_count.store(0, Ordering::Relaxed);
            if let Some(observer) = self.instruction_observer.read().clone() {
                observer(self, count)?;
            }
        }
        Ok(())
    }

    // ==================== regexp statics ====================

    /// Legacy RegExp statics (`$1..$9`, lastMatch, contexts)
    pub fn regexp_statics(&self) -> RegExpStatics {
        self.regexp_statics.read().clone()
    }

    pub(crate) fn update_regexp_statics(&self, statics: RegExpStatics) {
        *self.regexp_statics.write() = statics;
    }

    // ==================== interpreter bookkeeping ====================

    pub(crate) fn set_top_call(&self, scope: Option<Arc<ScriptObject>>, continuations: bool) {
        *self.top_call_scope.write() = scope;
        self.continuations_top_call
            .store(continuations, Ordering::Relaxed);
    }

    /// The scope of the outermost running call, if any
    pub fn top_call_scope(&self) -> Option<Arc<ScriptObject>> {
        self.top_call_scope.read().clone()
    }

    pub(crate) fn is_continuations_top_call(&self) -> bool {
        self.continuations_top_call.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_activation(&self, activation: Option<Arc<ScriptObject>>) {
        *self.current_activation.write() = activation;
    }

    /// The activation scope of the innermost running function, if any
    pub fn current_activation(&self) -> Option<Arc<ScriptObject>> {
        self.current_activation.read().clone()
    }

    /// The cached language-library handle
    pub fn library_cache(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.library_cache.read().clone()
    }

    /// Cache the language-library handle
    pub fn set_library_cache(&self, library: Arc<dyn Any + Send + Sync>) {
        *self.library_cache.write() = Some(library);
    }

    // ==================== error reporting ====================

    /// Report a warning through the reporter; upgraded to an error under
    /// WARNING_AS_ERROR.
    pub fn report_warning(&self, message: &str, position: &SourcePosition) {
        let reporter = self.error_reporter();
        if self.has_feature(Feature::WarningAsError) {
            reporter.error(
                message,
                &position.source_name,
                position.line,
                position.line_source.as_deref(),
                position.line_offset,
            );
        } else {
            reporter.warning(
                message,
                &position.source_name,
                position.line,
                position.line_source.as_deref(),
                position.line_offset,
            );
        }
    }

    /// Report a fatal runtime error; returns the exception to raise.
    pub fn report_runtime_error(&self, message: &str) -> EngineError {
        let position = self.current_source_position();
        self.error_reporter().runtime_error(
            message,
            &position.source_name,
            position.line,
            position.line_source.as_deref(),
            position.line_offset,
        )
    }

    /// The best available source position: the innermost interpreted frame
    /// supplies one while script runs; outside script frames the most
    /// recent evaluation entry point is used, else the unknown sentinel.
    pub fn current_source_position(&self) -> SourcePosition {
        if let Some(position) = crate::interpreter::current_position(self) {
            return position;
        }
        match self.last_entry.read().clone() {
            Some((source_name, line)) => SourcePosition::new(source_name, line),
            None => SourcePosition::unknown(),
        }
    }

    pub(crate) fn note_entry(&self, source_name: &str, line: u32) {
        *self.last_entry.write() = Some((source_name.to_string(), line));
    }

    // ==================== compilation pipeline ====================

    /// The compiler's view of this context
    pub fn compiler_env(&self) -> CompilerEnv {
        CompilerEnv {
            language_version: self.language_version(),
            strict_mode: self.has_feature(Feature::StrictMode),
            generate_source: self.generate_source(),
            generate_debug_info: self.generate_debug_info(),
            reserved_keyword_as_identifier: self.has_feature(Feature::ReservedKeywordAsIdentifier),
            member_expr_as_function_name: self.has_feature(Feature::MemberExprAsFunctionName),
        }
    }

    /// Compile a script. Negative starting line numbers are coerced to 0.
    pub fn compile_string(
        &self,
        source: &str,
        source_name: &str,
        line_number: i32,
        security_tag: Option<String>,
    ) -> JsResult<Script> {
        let base_line = line_number.max(0) as u32;
        let env = self.compiler_env();
        let mut unit =
            marten_vm_compiler::compile_script(source, source_name, base_line, &env, security_tag.clone())
                .map_err(|e| self.position_compile_error(e, source_name))?;

        // Prefer the native backend unless interpreted mode is forced; on a
        // code-size limit re-parse and re-lower for the interpreter, since
        // lowering may have mutated the tree.
        if !self.is_interpreted_mode()
            && let Some(backend) = self.factory().and_then(|f| f.native_backend())
        {
            match backend.compile(&unit) {
                Ok(native) => unit = native,
                Err(NativeBackendError::CodeSizeLimit(reason)) => {
                    tracing::debug!(source_name, %reason, "falling back to the interpreter");
                    unit = marten_vm_compiler::compile_script(
                        source,
                        source_name,
                        base_line,
                        &env,
                        security_tag,
                    )
                    .map_err(|e| self.position_compile_error(e, source_name))?;
                }
                Err(NativeBackendError::Other(reason)) => {
                    return Err(EngineError::evaluator(reason));
                }
            }
        }

        self.notify_debugger(&unit, source);
        Ok(Script::new(unit))
    }

    /// Compile a single function definition against a scope, returning the
    /// function value.
    pub fn compile_function(
        &self,
        scope: &Arc<ScriptObject>,
        source: &str,
        source_name: &str,
        line_number: i32,
        security_tag: Option<String>,
    ) -> JsResult<Value> {
        let base_line = line_number.max(0) as u32;
        let env = self.compiler_env();
        let unit = marten_vm_compiler::compile_function(
            source,
            source_name,
            base_line,
            &env,
            security_tag,
        )
        .map_err(|e| self.position_compile_error(e, source_name))?;
        self.notify_debugger(&unit, source);
        Ok(crate::interpreter::instantiate_function(
            self,
            &unit,
            scope.clone(),
        ))
    }

    /// Compile and run a script fragment against a scope. The microtask
    /// queue drains before control returns to the host, on success and on
    /// script failure alike.
    pub fn evaluate_string(
        &self,
        scope: &Arc<ScriptObject>,
        source: &str,
        source_name: &str,
        line_number: i32,
        security_tag: Option<String>,
    ) -> JsResult<Value> {
        self.note_entry(source_name, line_number.max(0) as u32);
        let script = self.compile_string(source, source_name, line_number, security_tag)?;
        let result = script.exec(self, scope);
        let drained = self.process_microtasks();
        let value = result?;
        drained?;
        Ok(value)
    }

    /// Is `source` a complete compilable unit? False only when more input
    /// could complete it; diagnostics are discarded.
    pub fn string_is_compilable_unit(&self, source: &str) -> bool {
        marten_vm_compiler::string_is_compilable_unit(source, &self.compiler_env())
    }

    fn position_compile_error(&self, error: marten_vm_compiler::CompileError, source_name: &str) -> EngineError {
        let line = error.line().unwrap_or(0);
        EngineError::from(error).with_position(SourcePosition::new(source_name, line))
    }

    fn notify_debugger(&self, unit: &Arc<marten_vm_bytecode::ScriptFunction>, source: &str) {
        if let Some(debugger) = self.debugger() {
            let view = DebuggableScript::from_script(unit);
            // Post the script first, then each nested function.
            view.visit(&mut |node| {
                debugger.handle_compilation_done(self, node, Some(source));
            });
        }
    }

    // ==================== standard objects ====================

    /// Populate a scope with the standard builtins. Passing `None` creates
    /// a fresh global object. With `sealed`, every produced builtin rejects
    /// modification.
    pub fn init_standard_objects(
        &self,
        scope: Option<Arc<ScriptObject>>,
        sealed: bool,
    ) -> Arc<ScriptObject> {
        crate::intrinsics::init_standard_objects(self, scope, sealed)
    }

    /// Like [`Context::init_standard_objects`] but omits any host-interop
    /// surface.
    pub fn init_safe_standard_objects(
        &self,
        scope: Option<Arc<ScriptObject>>,
        sealed: bool,
    ) -> Arc<ScriptObject> {
        crate::intrinsics::init_safe_standard_objects(self, scope, sealed)
    }

    // ==================== continuations ====================

    /// Request capture of the current interpreter state. The returned error
    /// must be raised by the calling host function; the interpreter
    /// validates the capture and converts it into a pending continuation.
    pub fn capture_continuation(&self) -> EngineError {
        EngineError::ContinuationRequest
    }

    /// Execute a script so that continuations may be captured during the
    /// run. Fails with an invalid-argument signal when the artifact was not
    /// compiled for the interpreter.
    pub fn execute_script_with_continuations(
        &self,
        script: &Script,
        scope: &Arc<ScriptObject>,
    ) -> JsResult<Value> {
        if !script.unit().flags.is_interpreted {
            return Err(EngineError::illegal_argument(
                "only interpreted scripts can capture continuations",
            ));
        }
        let result = crate::interpreter::execute_top(
            self,
            script.unit().clone(),
            scope.clone(),
            Value::object(scope.clone()),
            &[],
            true,
        );
        let drained = self.process_microtasks();
        let value = result?;
        drained?;
        Ok(value)
    }

    /// Call a function value so that continuations may be captured during
    /// the run.
    pub fn call_function_with_continuations(
        &self,
        function: &Value,
        scope: &Arc<ScriptObject>,
        args: &[Value],
    ) -> JsResult<Value> {
        let Some(object) = function.as_object().filter(|o| o.is_callable()) else {
            return Err(EngineError::illegal_argument("function value required"));
        };
        if let Some(crate::object::FunctionKind::Script { script, .. }) =
            object.as_function().map(|f| &f.kind)
            && !script.flags.is_interpreted
        {
            return Err(EngineError::illegal_argument(
                "only interpreted functions can capture continuations",
            ));
        }
        let result = crate::interpreter::call_with_continuations(
            self,
            function,
            &Value::object(scope.clone()),
            args,
            scope.clone(),
        );
        let drained = self.process_microtasks();
        let value = result?;
        drained?;
        Ok(value)
    }

    /// Restart a captured continuation, delivering `value` as the result of
    /// the call that suspended.
    pub fn resume_continuation(
        &self,
        continuation: crate::interpreter::Continuation,
        value: Value,
    ) -> JsResult<Value> {
        let result = crate::interpreter::resume(self, continuation, value);
        let drained = self.process_microtasks();
        let value = result?;
        drained?;
        Ok(value)
    }

    // ==================== factory / binding internals ====================

    /// The factory that created this context, while it is alive
    pub fn factory(&self) -> Option<Arc<ContextFactory>> {
        self.factory.upgrade()
    }

    fn bind_to_current_thread(self: &Arc<Self>) -> JsResult<()> {
        let mut bound = self.bound_thread.lock();
        let current = std::thread::current().id();
        match *bound {
            Some(thread) if thread != current => Err(EngineError::illegal_state(
                "context is already bound to another thread",
            )),
            _ => {
                *bound = Some(current);
                Ok(())
            }
        }
    }

    fn unbind(&self) {
        *self.bound_thread.lock() = None;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("version", &self.language_version())
            .field("nesting", &self.nesting.load(Ordering::Relaxed))
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// Creates contexts and manages their thread association.
pub struct ContextFactory {
    listeners: RwLock<Vec<Arc<dyn ContextListener>>>,
    native_backend: RwLock<Option<Arc<dyn NativeBackend>>>,
}

static GLOBAL_FACTORY: OnceLock<Arc<ContextFactory>> = OnceLock::new();

impl ContextFactory {
    /// Create a fresh factory
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
            native_backend: RwLock::new(None),
        })
    }

    /// The process-wide default factory
    pub fn global() -> Arc<Self> {
        GLOBAL_FACTORY.get_or_init(Self::new).clone()
    }

    /// Register a lifecycle listener
    pub fn add_listener(&self, listener: Arc<dyn ContextListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a lifecycle listener (by identity)
    pub fn remove_listener(&self, listener: &Arc<dyn ContextListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Register a native-code backend used when interpreted mode is off
    pub fn set_native_backend(&self, backend: Option<Arc<dyn NativeBackend>>) {
        *self.native_backend.write() = backend;
    }

    /// The registered native backend, if any
    pub fn native_backend(&self) -> Option<Arc<dyn NativeBackend>> {
        self.native_backend.read().clone()
    }

    /// Bind a context to the calling thread, creating one if the thread has
    /// none. Increments the nesting counter.
    pub fn enter(self: &Arc<Self>) -> JsResult<Arc<Context>> {
        if let Some(existing) = Context::current() {
            existing.nesting.fetch_add(1, Ordering::AcqRel);
            return Ok(existing);
        }
        let cx = Context::new(Arc::downgrade(self));
        for listener in self.listeners.read().iter() {
            listener.context_created(&cx);
        }
        self.enter_context(cx)
    }

    /// Bind a specific context to the calling thread. Fails when it is
    /// bound to another thread, or when a different context is already
    /// active on this one.
    pub fn enter_context(self: &Arc<Self>, cx: Arc<Context>) -> JsResult<Arc<Context>> {
        if let Some(existing) = Context::current() {
            if Arc::ptr_eq(&existing, &cx) {
                existing.nesting.fetch_add(1, Ordering::AcqRel);
                return Ok(existing);
            }
            return Err(EngineError::illegal_state(
                "another context is active on this thread",
            ));
        }
        cx.bind_to_current_thread()?;
        cx.nesting.fetch_add(1, Ordering::AcqRel);
        CURRENT.with(|current| *current.borrow_mut() = Some(cx.clone()));
        tracing::debug!("context entered");
        Ok(cx)
    }

    /// Decrement the nesting counter; on zero, detach the context from the
    /// thread and notify listeners. Fails without a matching enter.
    pub fn exit(&self) -> JsResult<()> {
        let Some(cx) = Context::current() else {
            return Err(EngineError::illegal_state(
                "exit without a matching enter",
            ));
        };
        let remaining = cx.nesting.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            CURRENT.with(|current| *current.borrow_mut() = None);
            cx.unbind();
            for listener in self.listeners.read().iter() {
                listener.context_released(&cx);
            }
            tracing::debug!("context released");
        }
        Ok(())
    }

    /// Scoped enter: run `action` with a context, exiting on all paths.
    pub fn call<R>(
        self: &Arc<Self>,
        action: impl FnOnce(&Arc<Context>) -> JsResult<R>,
    ) -> JsResult<R> {
        let cx = self.enter()?;
        let result = action(&cx);
        let exited = self.exit();
        let value = result?;
        exited?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> Arc<ContextFactory> {
        ContextFactory::new()
    }

    #[test]
    fn test_enter_exit_binding() {
        let f = factory();
        assert!(Context::current().is_none());
        let cx = f.enter().unwrap();
        assert!(Arc::ptr_eq(&Context::current().unwrap(), &cx));
        // Nested enter returns the same context
        let again = f.enter().unwrap();
        assert!(Arc::ptr_eq(&again, &cx));
        f.exit().unwrap();
        assert!(Context::current().is_some());
        f.exit().unwrap();
        assert!(Context::current().is_none());
        assert!(f.exit().is_err());
    }

    #[test]
    fn test_cross_thread_enter_fails() {
        let f = factory();
        let cx = f.enter().unwrap();
        let cx_clone = cx.clone();
        let f_clone = f.clone();
        let joined = std::thread::spawn(move || f_clone.enter_context(cx_clone).is_err())
            .join()
            .unwrap();
        assert!(joined);
        f.exit().unwrap();
    }

    #[test]
    fn test_sealing() {
        let f = factory();
        f.call(|cx| {
            let key = Value::string("the-key");
            cx.seal(Some(key.clone())).unwrap();
            assert!(cx.set_locale("fr-FR").is_err());
            assert!(cx.set_language_version(LanguageVersion::Es6).is_err());
            assert!(cx.unseal(Value::string("other")).is_err());
            cx.unseal(key).unwrap();
            assert!(cx.set_locale("fr-FR").is_ok());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_null_seal_key_is_permanent() {
        let f = factory();
        f.call(|cx| {
            cx.seal(None).unwrap();
            assert!(cx.unseal(Value::string("anything")).is_err());
            assert!(cx.is_sealed());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_microtask_ordering() {
        let f = factory();
        f.call(|cx| {
            let order = Arc::new(Mutex::new(Vec::new()));
            let (a, b) = (order.clone(), order.clone());
            let c = order.clone();
            cx.enqueue_microtask(Box::new(move |cx2| {
                a.lock().push("A");
                let c = c.clone();
                cx2.enqueue_microtask(Box::new(move |_| c.lock().push("C")));
            }));
            cx.enqueue_microtask(Box::new(move |_| b.lock().push("B")));
            cx.process_microtasks().unwrap();
            assert_eq!(*order.lock(), vec!["A", "B", "C"]);
            assert_eq!(cx.pending_microtasks(), 0);
            // Draining an empty queue is idempotent
            cx.process_microtasks().unwrap();
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_invalid_version_tag() {
        let f = factory();
        f.call(|cx| {
            assert!(cx.set_language_version_tag(175).is_err());
            assert!(cx.set_language_version_tag(170).is_ok());
            assert_eq!(cx.language_version(), LanguageVersion::V1_7);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_class_shutter_is_singleton() {
        struct Open;
        impl ClassShutter for Open {
            fn visible_to_scripts(&self, _: &str) -> bool {
                true
            }
        }
        let f = factory();
        f.call(|cx| {
            cx.set_class_shutter(Arc::new(Open)).unwrap();
            assert!(cx.set_class_shutter(Arc::new(Open)).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_thread_local_storage() {
        let f = factory();
        f.call(|cx| {
            cx.put_thread_local("k", Arc::new(7usize));
            let v = cx.get_thread_local("k").unwrap();
            assert_eq!(*v.downcast::<usize>().unwrap(), 7);
            cx.remove_thread_local("k");
            assert!(cx.get_thread_local("k").is_none());
            Ok(())
        })
        .unwrap();
    }
}
