//! Host service-provider interfaces
//!
//! Contracts a host plugs into a context: debugging, host-object wrapping,
//! security policy, and the pluggable regular expression provider. The
//! security controller and the regexp loader also exist as process-wide
//! write-once slots.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use marten_vm_bytecode::{DebuggableScript, ScriptFunction};

use crate::context::Context;
use crate::error::JsResult;
use crate::object::{PropertyKey, ScriptObject};
use crate::value::Value;

/// Debugger attachment
pub trait Debugger: Send + Sync {
    /// Called once per compiled unit (script first, then each nested
    /// function) with the debuggable view and the raw source.
    fn handle_compilation_done(
        &self,
        cx: &Context,
        debuggable: &DebuggableScript,
        source: Option<&str>,
    );
}

/// Wraps host objects as script values
pub trait WrapFactory: Send + Sync {
    /// Wrap an opaque host object for exposure to scripts
    fn wrap(&self, cx: &Context, host_object: Arc<dyn Any + Send + Sync>) -> Value;
}

/// Default wrap factory: an opaque, inert object
#[derive(Debug, Default)]
pub struct DefaultWrapFactory;

impl WrapFactory for DefaultWrapFactory {
    fn wrap(&self, _cx: &Context, _host_object: Arc<dyn Any + Send + Sync>) -> Value {
        Value::object(ScriptObject::plain(None))
    }
}

/// Security policy for code loading and privileged operations
pub trait SecurityController: Send + Sync {
    /// An opaque security domain derived from a compile-time tag
    fn dynamic_domain(&self, security_tag: Option<&str>) -> Option<String>;
}

/// Class-access filter: decides which host classes scripts may see
pub trait ClassShutter: Send + Sync {
    /// Is the named host class visible to scripts?
    fn visible_to_scripts(&self, full_class_name: &str) -> bool;
}

/// Listener for property stores on script objects
pub trait PropertyListener: Send + Sync {
    /// A property was created or updated
    fn property_changed(&self, object: &Arc<ScriptObject>, key: &PropertyKey, value: &Value);
}

/// Listener for context lifecycle events on a factory
pub trait ContextListener: Send + Sync {
    /// A context was created by the factory
    fn context_created(&self, cx: &Arc<Context>);

    /// A context detached from its thread (nesting reached zero)
    fn context_released(&self, cx: &Arc<Context>);
}

/// Optional native-code backend. When registered and the context is not in
/// interpreted mode, compilation prefers it; a `CodeSizeLimit` failure falls
/// back to the interpreter after re-parsing.
pub trait NativeBackend: Send + Sync {
    /// Compile a unit to a native-executable artifact
    fn compile(
        &self,
        script: &Arc<ScriptFunction>,
    ) -> Result<Arc<ScriptFunction>, NativeBackendError>;
}

/// Native backend failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum NativeBackendError {
    /// A class-file-format style size limit was exceeded; the caller falls
    /// back to the interpreter
    #[error("generated code exceeds backend limits: {0}")]
    CodeSizeLimit(String),
    /// Any other backend failure
    #[error("native backend error: {0}")]
    Other(String),
}

/// Pluggable regular expression provider
pub trait RegExpProxy: Send + Sync {
    /// Is the value a regular expression instance?
    fn is_regexp(&self, value: &Value) -> bool;

    /// Compile a pattern and flag string into a RegExp instance
    fn compile_regexp(&self, cx: &Context, source: &str, flags: &str) -> JsResult<Value>;
}

/// Discovered provider of `RegExpProxy` instances
pub trait RegExpLoader: Send + Sync {
    /// Create the proxy for a context
    fn new_proxy(&self) -> Arc<dyn RegExpProxy>;
}

static GLOBAL_SECURITY_CONTROLLER: OnceLock<Arc<dyn SecurityController>> = OnceLock::new();
static GLOBAL_REGEXP_LOADER: OnceLock<Arc<dyn RegExpLoader>> = OnceLock::new();

/// Install the process-wide security controller. Write-once; later calls
/// report failure.
pub fn init_global_security_controller(controller: Arc<dyn SecurityController>) -> bool {
    GLOBAL_SECURITY_CONTROLLER.set(controller).is_ok()
}

/// The process-wide security controller, if any
pub fn global_security_controller() -> Option<Arc<dyn SecurityController>> {
    GLOBAL_SECURITY_CONTROLLER.get().cloned()
}

/// Install the process-wide regexp loader. Write-once; the first engine use
/// of regular expressions fixes the provider.
pub fn init_global_regexp_loader(loader: Arc<dyn RegExpLoader>) -> bool {
    GLOBAL_REGEXP_LOADER.set(loader).is_ok()
}

/// The discovered regexp loader, defaulting to the in-tree engine.
pub fn global_regexp_loader() -> Arc<dyn RegExpLoader> {
    GLOBAL_REGEXP_LOADER
        .get_or_init(|| Arc::new(crate::regexp::BuiltinRegExpLoader))
        .clone()
}
