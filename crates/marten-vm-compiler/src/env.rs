//! Compiler environment
//!
//! A snapshot of the language-relevant Context state, taken once per
//! compilation so the pipeline never reaches back into the live context.

/// Language versions selectable on a context.
///
/// The numbered versions are the legacy dialects; `Es6` and `Ecmascript`
/// select modern behavior. `Default` resolves to `Ecmascript`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LanguageVersion {
    /// Unknown version sentinel
    Unknown,
    /// JavaScript 1.0
    V1_0,
    /// JavaScript 1.1
    V1_1,
    /// JavaScript 1.2
    V1_2,
    /// JavaScript 1.3
    V1_3,
    /// JavaScript 1.4
    V1_4,
    /// JavaScript 1.5
    V1_5,
    /// JavaScript 1.6
    V1_6,
    /// JavaScript 1.7
    V1_7,
    /// JavaScript 1.8
    V1_8,
    /// ECMAScript 6
    Es6,
    /// Latest ECMAScript
    #[default]
    Ecmascript,
}

impl LanguageVersion {
    /// The default-version sentinel resolves to the latest ECMAScript.
    pub const DEFAULT: LanguageVersion = LanguageVersion::Ecmascript;

    /// True for ES6 and later
    pub fn is_es6(self) -> bool {
        self >= LanguageVersion::Es6
    }

    /// Decode a numeric version tag (`100`, `120`, ... `180`, `200` for ES6,
    /// `0` for default). Unrecognized values yield `None`.
    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            0 => Self::DEFAULT,
            100 => Self::V1_0,
            110 => Self::V1_1,
            120 => Self::V1_2,
            130 => Self::V1_3,
            140 => Self::V1_4,
            150 => Self::V1_5,
            160 => Self::V1_6,
            170 => Self::V1_7,
            180 => Self::V1_8,
            200 => Self::Es6,
            _ => return None,
        })
    }
}

/// Per-compilation view of the context
#[derive(Debug, Clone)]
pub struct CompilerEnv {
    /// Active language version
    pub language_version: LanguageVersion,
    /// Force strict mode regardless of directives
    pub strict_mode: bool,
    /// Retain raw source on compiled units (decompilation, debugger)
    pub generate_source: bool,
    /// Emit line tables
    pub generate_debug_info: bool,
    /// Allow reserved keywords as identifiers
    pub reserved_keyword_as_identifier: bool,
    /// Accept `function a.b.c() {}` definitions
    pub member_expr_as_function_name: bool,
}

impl Default for CompilerEnv {
    fn default() -> Self {
        Self {
            language_version: LanguageVersion::DEFAULT,
            strict_mode: false,
            generate_source: true,
            generate_debug_info: true,
            reserved_keyword_as_identifier: true,
            member_expr_as_function_name: false,
        }
    }
}
