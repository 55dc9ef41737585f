//! Compiled regular expression programs
//!
//! A [`CompiledRegExp`] is immutable after compilation: the original source
//! characters, the flag bitmap, the capture count and the node program are
//! fixed. Instances share programs behind an `Arc` and re-point on
//! `compile()`.

use crate::error::RegExpResult;
use crate::flags::RegExpFlags;
use crate::matcher::{Matcher, RegExpMatch};
use crate::parser::PatternParser;

/// Character class membership bits for the predefined escapes
pub mod class_bits {
    /// `\d`
    pub const DIGIT: u8 = 0x01;
    /// `\D`
    pub const NOT_DIGIT: u8 = 0x02;
    /// `\w`
    pub const WORD: u8 = 0x04;
    /// `\W`
    pub const NOT_WORD: u8 = 0x08;
    /// `\s`
    pub const SPACE: u8 = 0x10;
    /// `\S`
    pub const NOT_SPACE: u8 = 0x20;
}

/// A character class: explicit code points, ranges and predefined sets.
///
/// These are the class-set tables of a compiled program; membership is
/// resolved at match time against a single code point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharClass {
    /// Negated class (`[^...]`)
    pub negated: bool,
    /// Individual code points
    pub singles: Vec<u32>,
    /// Inclusive code point ranges
    pub ranges: Vec<(u32, u32)>,
    /// Predefined set membership (see [`class_bits`])
    pub predefs: u8,
}

impl CharClass {
    /// Class containing a single predefined set (`\d`, `\w`, ...)
    pub fn predefined(bits: u8) -> Self {
        Self {
            predefs: bits,
            ..Default::default()
        }
    }
}

/// A node of the compiled program tree
#[derive(Debug, Clone, PartialEq)]
pub enum ReNode {
    /// Matches the empty string
    Empty,
    /// A literal run of code points
    Literal(Vec<u32>),
    /// A character class
    Class(CharClass),
    /// `.`
    Dot,
    /// `^`
    Begin,
    /// `$`
    End,
    /// `\b`
    WordBoundary,
    /// `\B`
    NonWordBoundary,
    /// Group; `index` is the 1-based capture number, `None` for `(?:...)`
    Group {
        /// 1-based capture index
        index: Option<u32>,
        /// Group body
        body: Box<ReNode>,
    },
    /// Back-reference to a capture group
    Backref(u32),
    /// Quantifier over a body node
    Quant {
        /// Minimum repetitions
        min: u32,
        /// Maximum repetitions, `None` for unbounded
        max: Option<u32>,
        /// Greedy unless the quantifier carried a `?` suffix
        greedy: bool,
        /// Quantified body
        body: Box<ReNode>,
    },
    /// Ordered alternation; each alternative is a sequence
    Alt(Vec<Vec<ReNode>>),
    /// A sequence of nodes
    Seq(Vec<ReNode>),
    /// Lookahead / lookbehind assertion
    Look {
        /// Lookbehind if true, lookahead otherwise
        behind: bool,
        /// Negative assertion
        negate: bool,
        /// Assertion body
        body: Box<ReNode>,
    },
}

/// An immutable compiled regular expression
#[derive(Debug, Clone)]
pub struct CompiledRegExp {
    source: String,
    flags: RegExpFlags,
    paren_count: u32,
    program: ReNode,
}

impl CompiledRegExp {
    /// Compile a pattern and flag string. Lookbehind assertions are accepted.
    pub fn compile(pattern: &str, flags: &str) -> RegExpResult<Self> {
        let flags = RegExpFlags::parse(flags)?;
        Self::compile_flags(pattern, flags, true)
    }

    /// Compile with pre-parsed flags, optionally rejecting lookbehind
    /// (older language versions do not support it).
    pub fn compile_flags(
        pattern: &str,
        flags: RegExpFlags,
        allow_lookbehind: bool,
    ) -> RegExpResult<Self> {
        let mut parser = PatternParser::new(pattern, flags, allow_lookbehind);
        let program = parser.parse()?;
        let paren_count = parser.paren_count();
        tracing::trace!(pattern, paren_count, "compiled regexp");
        Ok(Self {
            source: pattern.to_string(),
            flags,
            paren_count,
            program,
        })
    }

    /// The original source characters of the pattern
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The flag bitmap
    pub fn flags(&self) -> RegExpFlags {
        self.flags
    }

    /// Number of capturing parentheses, numbered left-to-right from 1
    pub fn paren_count(&self) -> u32 {
        self.paren_count
    }

    /// The compiled node program
    pub fn program(&self) -> &ReNode {
        &self.program
    }

    /// Execute against UTF-16 input, searching forward from `start`.
    ///
    /// With the STICKY flag the match must begin exactly at `start`; without
    /// it, successive start positions are tried up to the end of input.
    /// Positions in the result are UTF-16 code unit indices.
    pub fn find_from(&self, input: &[u16], start: usize) -> RegExpResult<Option<RegExpMatch>> {
        if start > input.len() {
            return Ok(None);
        }
        let mut matcher = Matcher::new(self, input);
        if self.flags.sticky() {
            return matcher.match_at(start);
        }
        let mut at = start;
        loop {
            if let Some(m) = matcher.match_at(at)? {
                return Ok(Some(m));
            }
            if at >= input.len() {
                return Ok(None);
            }
            // Step one code unit; surrogate pairs are handled by the next
            // match attempt, which never starts inside a pair in unicode mode.
            at += if self.flags.unicode()
                && crate::matcher::is_lead_surrogate(input[at])
                && at + 1 < input.len()
                && crate::matcher::is_trail_surrogate(input[at + 1])
            {
                2
            } else {
                1
            };
        }
    }
}
