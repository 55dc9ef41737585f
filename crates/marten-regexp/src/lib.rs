//! JavaScript-flavor regular expression engine.
//!
//! A standalone parse+match subsystem: a pattern plus flag string compiles
//! into an immutable [`CompiledRegExp`] program, which executes against
//! UTF-16 input with capture tracking. Execution is a bounded backtracking
//! walk; exhausting the backtracking budget surfaces as
//! [`RegExpError::TooComplex`] rather than a native stack overflow.
//!
//! Match positions are always UTF-16 code unit indices, matching JavaScript
//! string semantics. Under the `u`/`v` flags the matcher steps over surrogate
//! pairs as single code points.

mod error;
mod flags;
mod matcher;
mod parser;
mod program;

pub use error::{RegExpError, RegExpResult};
pub use flags::RegExpFlags;
pub use matcher::RegExpMatch;
pub use program::{CharClass, CompiledRegExp, ReNode};

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_compile_and_match_literal() {
        let re = CompiledRegExp::compile("abc", "").unwrap();
        let input = utf16("xxabcxx");
        let m = re.find_from(&input, 0).unwrap().unwrap();
        assert_eq!(m.start, 2);
        assert_eq!(m.end, 5);
    }

    #[test]
    fn test_capture_groups_numbered_left_to_right() {
        let re = CompiledRegExp::compile("(a(b)c)(d)", "").unwrap();
        assert_eq!(re.paren_count(), 3);
        let input = utf16("abcd");
        let m = re.find_from(&input, 0).unwrap().unwrap();
        assert_eq!(m.captures[0], Some((0, 3)));
        assert_eq!(m.captures[1], Some((1, 2)));
        assert_eq!(m.captures[2], Some((3, 4)));
    }

    #[test]
    fn test_sticky_requires_exact_start() {
        let re = CompiledRegExp::compile("a", "y").unwrap();
        let input = utf16("ba");
        assert!(re.find_from(&input, 0).unwrap().is_none());
        let m = re.find_from(&input, 1).unwrap().unwrap();
        assert_eq!(m.start, 1);
    }

    #[test]
    fn test_unparticipating_group_is_none() {
        let re = CompiledRegExp::compile("(a)|(b)", "").unwrap();
        let input = utf16("b");
        let m = re.find_from(&input, 0).unwrap().unwrap();
        assert_eq!(m.captures[0], None);
        assert_eq!(m.captures[1], Some((0, 1)));
    }
}
