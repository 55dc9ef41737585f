//! Marten VM core
//!
//! The embeddable heart of the engine: the per-thread [`Context`] with its
//! factory and lifecycle, the object and prototype model, the frame-chain
//! interpreter with continuation capture, RegExp runtime semantics, and
//! standard-scope initialization. Hosts link against this crate, expose
//! their own objects on a scope, and evaluate script fragments on demand.

pub mod context;
pub mod error;
pub mod features;
pub mod hooks;
pub mod interpreter;
pub mod intrinsics;
pub(crate) mod intrinsics_impl;
pub mod microtask;
pub mod object;
pub mod regexp;
pub mod reporter;
pub mod script;
pub mod value;

pub use context::{Context, ContextFactory, InstructionObserver, UnhandledRejectionTracker};
pub use error::{EcmaErrorKind, EngineError, JsResult, SourcePosition};
pub use features::Feature;
pub use hooks::{
    ClassShutter, ContextListener, Debugger, NativeBackend, NativeBackendError, PropertyListener,
    RegExpLoader, RegExpProxy, SecurityController, WrapFactory,
};
pub use interpreter::{Continuation, call_value, construct_value, instantiate_function};
pub use marten_vm_compiler::LanguageVersion;
pub use object::{
    FunctionKind, NativeFn, ObjectData, PropertyAttributes, PropertyKey, ScriptObject,
};
pub use regexp::{MatchType, RegExpStatics};
pub use reporter::{DefaultErrorReporter, DiscardingErrorReporter, ErrorReporter};
pub use script::Script;
pub use value::{JsSymbol, Value, well_known};
