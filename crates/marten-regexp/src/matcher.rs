//! Backtracking matcher
//!
//! Executes a compiled program against UTF-16 input. Backtracking is a
//! continuation-passing walk over the node program; both the total step count
//! and the continuation depth are budgeted, so pathological patterns surface
//! [`RegExpError::TooComplex`] instead of exhausting the native stack.

use smallvec::SmallVec;

use crate::error::{RegExpError, RegExpResult};
use crate::program::{CharClass, CompiledRegExp, ReNode, class_bits};

/// Total matcher steps allowed for one `find_from` call
const STEP_BUDGET: usize = 1_000_000;

/// Maximum continuation depth (bounds native recursion)
const DEPTH_BUDGET: usize = 8 * 1024;

type Captures = SmallVec<[Option<(usize, usize)>; 8]>;

/// A successful match: UTF-16 positions plus capture spans.
///
/// Capture slot `n - 1` holds group `n`; `None` marks a group that did not
/// participate in the match.
#[derive(Debug, Clone, PartialEq)]
pub struct RegExpMatch {
    /// Start of the overall match (UTF-16 units)
    pub start: usize,
    /// End of the overall match (UTF-16 units)
    pub end: usize,
    /// Capture spans, one per capturing group
    pub captures: Vec<Option<(usize, usize)>>,
}

type MatchResult = RegExpResult<Option<usize>>;

pub(crate) struct Matcher<'a> {
    input: &'a [u16],
    program: &'a ReNode,
    captures: Captures,
    fold: bool,
    multiline: bool,
    dot_all: bool,
    unicode: bool,
    steps: usize,
    depth: usize,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(re: &'a CompiledRegExp, input: &'a [u16]) -> Self {
        let flags = re.flags();
        Self {
            input,
            program: re.program(),
            captures: smallvec::smallvec![None; re.paren_count() as usize],
            fold: flags.ignore_case(),
            multiline: flags.multiline(),
            dot_all: flags.dot_all(),
            unicode: flags.unicode(),
            steps: 0,
            depth: 0,
        }
    }

    /// Attempt a match anchored at `pos`.
    pub(crate) fn match_at(&mut self, pos: usize) -> RegExpResult<Option<RegExpMatch>> {
        self.captures.iter_mut().for_each(|c| *c = None);
        let program = self.program;
        match self.match_node(program, pos, &|_m, end| Ok(Some(end)))? {
            Some(end) => Ok(Some(RegExpMatch {
                start: pos,
                end,
                captures: self.captures.to_vec(),
            })),
            None => Ok(None),
        }
    }

    fn match_node(
        &mut self,
        node: &'a ReNode,
        pos: usize,
        cont: &dyn Fn(&mut Self, usize) -> MatchResult,
    ) -> MatchResult {
        self.steps += 1;
        if self.steps > STEP_BUDGET || self.depth >= DEPTH_BUDGET {
            return Err(RegExpError::TooComplex);
        }
        self.depth += 1;
        let result = self.match_node_inner(node, pos, cont);
        self.depth -= 1;
        result
    }

    fn match_node_inner(
        &mut self,
        node: &'a ReNode,
        pos: usize,
        cont: &dyn Fn(&mut Self, usize) -> MatchResult,
    ) -> MatchResult {
        match node {
            ReNode::Empty => cont(self, pos),

            ReNode::Literal(cps) => {
                let mut at = pos;
                for &expected in cps {
                    match self.read(at) {
                        Some((cp, width)) if self.chars_equal(cp, expected) => at += width,
                        _ => return Ok(None),
                    }
                }
                cont(self, at)
            }

            ReNode::Class(class) => match self.read(pos) {
                Some((cp, width)) if self.class_matches(class, cp) => cont(self, pos + width),
                _ => Ok(None),
            },

            ReNode::Dot => match self.read(pos) {
                Some((cp, width)) if self.dot_all || !is_line_terminator(cp) => {
                    cont(self, pos + width)
                }
                _ => Ok(None),
            },

            ReNode::Begin => {
                if pos == 0
                    || (self.multiline && is_line_terminator(self.input[pos - 1] as u32))
                {
                    cont(self, pos)
                } else {
                    Ok(None)
                }
            }

            ReNode::End => {
                if pos == self.input.len()
                    || (self.multiline && is_line_terminator(self.input[pos] as u32))
                {
                    cont(self, pos)
                } else {
                    Ok(None)
                }
            }

            ReNode::WordBoundary => {
                if self.at_word_boundary(pos) {
                    cont(self, pos)
                } else {
                    Ok(None)
                }
            }

            ReNode::NonWordBoundary => {
                if self.at_word_boundary(pos) {
                    Ok(None)
                } else {
                    cont(self, pos)
                }
            }

            ReNode::Group { index, body } => {
                let slot = index.map(|i| (i - 1) as usize);
                let saved = slot.map(|i| self.captures[i]);
                let start = pos;
                let result = self.match_node(body, pos, &|m, end| {
                    let previous = slot.map(|i| m.captures[i]);
                    if let Some(i) = slot {
                        m.captures[i] = Some((start, end));
                    }
                    let r = cont(m, end)?;
                    if r.is_none()
                        && let (Some(i), Some(previous)) = (slot, previous)
                    {
                        m.captures[i] = previous;
                    }
                    Ok(r)
                })?;
                if result.is_none()
                    && let (Some(i), Some(saved)) = (slot, saved)
                {
                    self.captures[i] = saved;
                }
                Ok(result)
            }

            ReNode::Backref(n) => {
                // A group that did not participate matches the empty string.
                let Some((start, end)) = self.captures[(*n - 1) as usize] else {
                    return cont(self, pos);
                };
                let mut src = start;
                let mut at = pos;
                while src < end {
                    let Some((want, sw)) = self.read(src) else {
                        return Ok(None);
                    };
                    match self.read(at) {
                        Some((cp, width)) if self.chars_equal(cp, want) => {
                            src += sw;
                            at += width;
                        }
                        _ => return Ok(None),
                    }
                }
                cont(self, at)
            }

            ReNode::Quant {
                min,
                max,
                greedy,
                body,
            } => self.match_quant(body, *min, *max, *greedy, 0, pos, cont),

            ReNode::Alt(alternatives) => {
                for alternative in alternatives {
                    if let Some(end) = self.match_seq(alternative, pos, cont)? {
                        return Ok(Some(end));
                    }
                }
                Ok(None)
            }

            ReNode::Seq(nodes) => self.match_seq(nodes, pos, cont),

            ReNode::Look {
                behind,
                negate,
                body,
            } => {
                let saved = self.captures.clone();
                let found = if *behind {
                    // The body must end exactly at pos; try every start.
                    let mut found = false;
                    let mut start = pos;
                    loop {
                        let hit = self
                            .match_node(body, start, &|_m, end| {
                                Ok(if end == pos { Some(end) } else { None })
                            })?
                            .is_some();
                        if hit {
                            found = true;
                            break;
                        }
                        if start == 0 {
                            break;
                        }
                        start -= 1;
                    }
                    found
                } else {
                    self.match_node(body, pos, &|_m, end| Ok(Some(end)))?.is_some()
                };
                if found == *negate {
                    self.captures = saved;
                    return Ok(None);
                }
                if *negate {
                    // Negative assertions leave no capture state behind.
                    self.captures = saved.clone();
                }
                let result = cont(self, pos)?;
                if result.is_none() {
                    self.captures = saved;
                }
                Ok(result)
            }
        }
    }

    fn match_seq(
        &mut self,
        nodes: &'a [ReNode],
        pos: usize,
        cont: &dyn Fn(&mut Self, usize) -> MatchResult,
    ) -> MatchResult {
        match nodes.split_first() {
            None => cont(self, pos),
            Some((first, rest)) => {
                self.match_node(first, pos, &|m, p| m.match_seq(rest, p, cont))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn match_quant(
        &mut self,
        body: &'a ReNode,
        min: u32,
        max: Option<u32>,
        greedy: bool,
        count: u32,
        pos: usize,
        cont: &dyn Fn(&mut Self, usize) -> MatchResult,
    ) -> MatchResult {
        if count < min {
            return self.match_node(body, pos, &|m, p| {
                m.match_quant(body, min, max, greedy, count + 1, p, cont)
            });
        }
        let can_repeat = max.is_none_or(|m| count < m);
        if greedy {
            if can_repeat {
                let taken = self.match_node(body, pos, &|m, p| {
                    if p == pos {
                        // An empty iteration makes no progress; stop here.
                        return Ok(None);
                    }
                    m.match_quant(body, min, max, greedy, count + 1, p, cont)
                })?;
                if taken.is_some() {
                    return Ok(taken);
                }
            }
            cont(self, pos)
        } else {
            if let Some(end) = cont(self, pos)? {
                return Ok(Some(end));
            }
            if can_repeat {
                self.match_node(body, pos, &|m, p| {
                    if p == pos {
                        return Ok(None);
                    }
                    m.match_quant(body, min, max, greedy, count + 1, p, cont)
                })
            } else {
                Ok(None)
            }
        }
    }

    // ==================== element access ====================

    /// Read one element at `pos`: a code point plus its width in UTF-16
    /// units. In unicode mode a surrogate pair is one element of width 2.
    fn read(&self, pos: usize) -> Option<(u32, usize)> {
        let unit = *self.input.get(pos)?;
        if self.unicode
            && is_lead_surrogate(unit)
            && let Some(&next) = self.input.get(pos + 1)
            && is_trail_surrogate(next)
        {
            let cp = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((next as u32) - 0xDC00);
            return Some((cp, 2));
        }
        Some((unit as u32, 1))
    }

    fn chars_equal(&self, a: u32, b: u32) -> bool {
        a == b || (self.fold && canonical(a) == canonical(b))
    }

    fn class_matches(&self, class: &CharClass, cp: u32) -> bool {
        let mut member = self.class_member(class, cp);
        if !member && self.fold {
            let folded = canonical(cp);
            if folded != cp {
                member = self.class_member(class, folded);
            }
            if !member
                && let Some(lower) = simple_lowercase(cp)
                && lower != cp
            {
                member = self.class_member(class, lower);
            }
        }
        member != class.negated
    }

    fn class_member(&self, class: &CharClass, cp: u32) -> bool {
        if class.singles.contains(&cp) {
            return true;
        }
        if class.ranges.iter().any(|&(lo, hi)| lo <= cp && cp <= hi) {
            return true;
        }
        let predefs = class.predefs;
        (predefs & class_bits::DIGIT != 0 && is_digit(cp))
            || (predefs & class_bits::NOT_DIGIT != 0 && !is_digit(cp))
            || (predefs & class_bits::WORD != 0 && is_word(cp))
            || (predefs & class_bits::NOT_WORD != 0 && !is_word(cp))
            || (predefs & class_bits::SPACE != 0 && is_space(cp))
            || (predefs & class_bits::NOT_SPACE != 0 && !is_space(cp))
    }

    fn at_word_boundary(&self, pos: usize) -> bool {
        let before = pos > 0 && is_word(self.input[pos - 1] as u32);
        let after = pos < self.input.len() && is_word(self.input[pos] as u32);
        before != after
    }
}

// ==================== character predicates ====================

#[inline]
pub(crate) fn is_lead_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

#[inline]
pub(crate) fn is_trail_surrogate(unit: u16) -> bool {
    (0xDC00..=0xDFFF).contains(&unit)
}

#[inline]
fn is_digit(cp: u32) -> bool {
    ('0' as u32..='9' as u32).contains(&cp)
}

#[inline]
fn is_word(cp: u32) -> bool {
    is_digit(cp)
        || ('a' as u32..='z' as u32).contains(&cp)
        || ('A' as u32..='Z' as u32).contains(&cp)
        || cp == '_' as u32
}

#[inline]
fn is_line_terminator(cp: u32) -> bool {
    matches!(cp, 0x0A | 0x0D | 0x2028 | 0x2029)
}

fn is_space(cp: u32) -> bool {
    matches!(cp, 0x09 | 0x0B | 0x0C | 0x20 | 0xA0 | 0xFEFF) || is_line_terminator(cp) || {
        char::from_u32(cp).is_some_and(|c| c.is_whitespace())
    }
}

/// Canonicalize for case folding: the simple uppercase mapping, with the
/// ECMAScript restriction that non-ASCII never folds into ASCII.
fn canonical(cp: u32) -> u32 {
    let Some(c) = char::from_u32(cp) else {
        return cp;
    };
    let mut upper = c.to_uppercase();
    let mapped = match (upper.next(), upper.next()) {
        (Some(u), None) => u as u32,
        _ => return cp,
    };
    if cp >= 0x80 && mapped < 0x80 {
        return cp;
    }
    mapped
}

fn simple_lowercase(cp: u32) -> Option<u32> {
    let c = char::from_u32(cp)?;
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => Some(l as u32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::CompiledRegExp;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn first(pattern: &str, flags: &str, input: &str) -> Option<RegExpMatch> {
        CompiledRegExp::compile(pattern, flags)
            .unwrap()
            .find_from(&utf16(input), 0)
            .unwrap()
    }

    #[test]
    fn test_greedy_vs_lazy() {
        let m = first("a.*c", "", "xabcbc").unwrap();
        assert_eq!((m.start, m.end), (1, 6));
        let m = first("a.*?c", "", "xabcbc").unwrap();
        assert_eq!((m.start, m.end), (1, 4));
    }

    #[test]
    fn test_alternation_order() {
        let m = first("ab|a", "", "ab").unwrap();
        assert_eq!((m.start, m.end), (0, 2));
        let m = first("a|ab", "", "ab").unwrap();
        assert_eq!((m.start, m.end), (0, 1));
    }

    #[test]
    fn test_case_folding() {
        assert!(first("abc", "i", "xAbCx").is_some());
        assert!(first("[a-z]+", "i", "HELLO").is_some());
        assert!(first("abc", "", "ABC").is_none());
    }

    #[test]
    fn test_multiline_anchors() {
        assert!(first("^b", "", "a\nb").is_none());
        let m = first("^b", "m", "a\nb").unwrap();
        assert_eq!(m.start, 2);
        let m = first("a$", "m", "a\nb").unwrap();
        assert_eq!(m.end, 1);
    }

    #[test]
    fn test_dotall() {
        assert!(first("a.b", "", "a\nb").is_none());
        assert!(first("a.b", "s", "a\nb").is_some());
    }

    #[test]
    fn test_backreference() {
        let m = first(r"(ab)\1", "", "ababx").unwrap();
        assert_eq!((m.start, m.end), (0, 4));
        assert!(first(r"(ab)\1", "", "abx").is_none());
    }

    #[test]
    fn test_unparticipating_backref_matches_empty() {
        let m = first(r"(?:(a)|b)\1c", "", "bc").unwrap();
        assert_eq!((m.start, m.end), (0, 2));
    }

    #[test]
    fn test_lookahead() {
        let m = first(r"a(?=b)", "", "ab").unwrap();
        assert_eq!((m.start, m.end), (0, 1));
        assert!(first(r"a(?=b)", "", "ac").is_none());
        assert!(first(r"a(?!b)", "", "ac").is_some());
        assert!(first(r"a(?!b)", "", "ab").is_none());
    }

    #[test]
    fn test_lookbehind() {
        let m = first(r"(?<=a)b", "", "ab").unwrap();
        assert_eq!((m.start, m.end), (1, 2));
        assert!(first(r"(?<=a)b", "", "cb").is_none());
        assert!(first(r"(?<!a)b", "", "cb").is_some());
    }

    #[test]
    fn test_word_boundary() {
        let m = first(r"\bcat\b", "", "a cat sat").unwrap();
        assert_eq!((m.start, m.end), (2, 5));
        assert!(first(r"\bcat\b", "", "scatter").is_none());
    }

    #[test]
    fn test_char_classes() {
        assert!(first(r"[\d]+", "", "abc123").is_some());
        let m = first(r"[^a-c]+", "", "abcde").unwrap();
        assert_eq!((m.start, m.end), (3, 5));
        assert!(first(r"[\w-]+", "", "a-b").is_some());
    }

    #[test]
    fn test_empty_pattern_matches_empty() {
        let m = first("", "", "abc").unwrap();
        assert_eq!((m.start, m.end), (0, 0));
        let m = first("(?:)", "", "abc").unwrap();
        assert_eq!((m.start, m.end), (0, 0));
    }

    #[test]
    fn test_star_empty_match() {
        let m = first("a*", "", "").unwrap();
        assert_eq!((m.start, m.end), (0, 0));
        let m = first("a*", "", "aaa").unwrap();
        assert_eq!((m.start, m.end), (0, 3));
    }

    #[test]
    fn test_unicode_surrogate_pair_is_one_element() {
        // U+1F600 as a surrogate pair; dot in unicode mode consumes both units
        let input = utf16("\u{1F600}b");
        let re = CompiledRegExp::compile(".b", "u").unwrap();
        let m = re.find_from(&input, 0).unwrap().unwrap();
        assert_eq!((m.start, m.end), (0, 3));
        // Without unicode mode the dot consumes a single unit
        let re = CompiledRegExp::compile("^.b", "").unwrap();
        assert!(re.find_from(&input, 0).unwrap().is_none());
    }

    #[test]
    fn test_nested_quantified_groups() {
        let m = first("(a+)+b", "", "aaab").unwrap();
        assert_eq!((m.start, m.end), (0, 4));
    }

    #[test]
    fn test_backtracking_budget_is_bounded() {
        // Catastrophic backtracking must produce an error, not hang or
        // blow the native stack.
        let re = CompiledRegExp::compile("(a+)+$", "").unwrap();
        let input: Vec<u16> = utf16(&("a".repeat(60) + "b"));
        assert!(matches!(
            re.find_from(&input, 0),
            Err(RegExpError::TooComplex)
        ));
    }

    #[test]
    fn test_capture_reset_on_alternation_backtrack() {
        let m = first("(?:(a)b|ac)", "", "ac").unwrap();
        assert_eq!(m.captures[0], None);
    }
}
