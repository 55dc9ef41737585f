//! Builtin object initializers
//!
//! One module per builtin family. Each exposes `init(cx, global,
//! object_proto, function_proto)` wiring its constructor and prototype into
//! the scope.

pub mod array;
pub mod errors;
pub mod function;
pub mod misc;
pub mod object;
pub mod regexp;
pub mod string;
pub mod symbol;
