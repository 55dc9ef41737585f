//! Lexer
//!
//! Pull-based tokenizer over the source characters. Tracks line/column for
//! every token and whether a line terminator preceded it (automatic
//! semicolon insertion needs this). Regular expression literals are scanned
//! on demand by the parser via [`Lexer::rescan_regex`], since only the
//! grammar knows whether a `/` starts a regex or a division.

use crate::ast::Position;
use crate::error::{CompileError, CompileResult};

/// Keywords of the supported grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    In,
    Break,
    Continue,
    New,
    Delete,
    Typeof,
    Void,
    Instanceof,
    This,
    True,
    False,
    Null,
    Throw,
    Try,
    Catch,
    Finally,
    Switch,
    Case,
    Default,
    With,
}

/// Punctuators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Colon,
    Question,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    UshrAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Ushr,
}

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// End of input
    Eof,
    /// Identifier
    Ident(String),
    /// Keyword
    Keyword(Keyword),
    /// Numeric literal
    Number(f64),
    /// String literal (decoded)
    Str(String),
    /// Regular expression literal
    Regex {
        /// Pattern between the slashes
        source: String,
        /// Flag characters
        flags: String,
    },
    /// Punctuator
    Punct(Punct),
}

/// A token with position metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Kind and payload
    pub kind: TokenKind,
    /// Position of the first character
    pub pos: Position,
    /// Character offset of the first character
    pub offset: usize,
    /// A line terminator appeared between the previous token and this one
    pub newline_before: bool,
}

/// Lexer state
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    /// Treat reserved future keywords as plain identifiers
    reserved_as_identifier: bool,
}

impl Lexer {
    /// Create a lexer over `source`, numbering lines from `base_line`.
    pub fn new(source: &str, base_line: u32, reserved_as_identifier: bool) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: base_line.max(1),
            column: 0,
            reserved_as_identifier,
        }
    }

    /// Current position (for error reporting between tokens)
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> CompileResult<Token> {
        let newline_before = self.skip_trivia()?;
        let pos = Position::new(self.line, self.column);
        let offset = self.pos;
        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos,
                offset,
                newline_before,
            });
        };

        let kind = if is_id_start(ch) {
            self.read_word()?
        } else if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
            self.read_number()?
        } else if ch == '"' || ch == '\'' {
            self.read_string(ch)?
        } else {
            self.read_punct()?
        };

        Ok(Token {
            kind,
            pos,
            offset,
            newline_before,
        })
    }

    /// Re-scan a regular expression literal starting at a `/` the grammar has
    /// decided begins a regex. `offset` is the character offset of that `/`.
    pub fn rescan_regex(&mut self, offset: usize, pos: Position) -> CompileResult<Token> {
        self.pos = offset + 1; // past '/'
        self.line = pos.line;
        self.column = pos.column + 1;
        let mut source = String::new();
        let mut in_class = false;
        loop {
            let Some(ch) = self.peek() else {
                return Err(CompileError::UnexpectedEndOfInput { line: self.line });
            };
            match ch {
                '/' if !in_class => {
                    self.bump();
                    break;
                }
                '[' => {
                    in_class = true;
                    source.push(ch);
                    self.bump();
                }
                ']' => {
                    in_class = false;
                    source.push(ch);
                    self.bump();
                }
                '\\' => {
                    source.push(ch);
                    self.bump();
                    let Some(next) = self.peek() else {
                        return Err(CompileError::UnexpectedEndOfInput { line: self.line });
                    };
                    if is_line_terminator(next) {
                        return Err(CompileError::syntax(
                            "unterminated regular expression literal",
                            self.line,
                            self.column,
                        ));
                    }
                    source.push(next);
                    self.bump();
                }
                c if is_line_terminator(c) => {
                    return Err(CompileError::syntax(
                        "unterminated regular expression literal",
                        self.line,
                        self.column,
                    ));
                }
                c => {
                    source.push(c);
                    self.bump();
                }
            }
        }
        let mut flags = String::new();
        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                flags.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        Ok(Token {
            kind: TokenKind::Regex { source, flags },
            pos,
            offset,
            newline_before: false,
        })
    }

    // ==================== trivia ====================

    /// Skip whitespace and comments. Returns whether a line terminator was
    /// crossed.
    fn skip_trivia(&mut self) -> CompileResult<bool> {
        let mut newline = false;
        loop {
            match self.peek() {
                Some(c) if is_line_terminator(c) => {
                    newline = true;
                    self.bump();
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if is_line_terminator(c) {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start_line = self.line;
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => {
                                return Err(CompileError::UnexpectedEndOfInput {
                                    line: start_line,
                                });
                            }
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(c) => {
                                if is_line_terminator(c) {
                                    newline = true;
                                }
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    // ==================== words ====================

    fn read_word(&mut self) -> CompileResult<TokenKind> {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if is_id_continue(c) {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if let Some(keyword) = keyword_of(&word) {
            return Ok(TokenKind::Keyword(keyword));
        }
        if is_future_reserved(&word) && !self.reserved_as_identifier {
            return Err(CompileError::syntax(
                format!("'{}' is a reserved word", word),
                self.line,
                self.column,
            ));
        }
        Ok(TokenKind::Ident(word))
    }

    // ==================== numbers ====================

    fn read_number(&mut self) -> CompileResult<TokenKind> {
        let start = self.pos;
        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x') | Some('X'))
        {
            self.bump();
            self.bump();
            let mut value: f64 = 0.0;
            let mut digits = 0;
            while let Some(d) = self.peek().and_then(|c| c.to_digit(16)) {
                value = value * 16.0 + d as f64;
                digits += 1;
                self.bump();
            }
            if digits == 0 {
                return Err(CompileError::syntax(
                    "missing hexadecimal digits",
                    self.line,
                    self.column,
                ));
            }
            return Ok(TokenKind::Number(value));
        }
        // Legacy octal: 0 followed by octal digits only
        if self.peek() == Some('0')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            let mut i = self.pos + 1;
            let mut octal = true;
            while let Some(&c) = self.chars.get(i) {
                if !c.is_ascii_digit() {
                    break;
                }
                if !('0'..='7').contains(&c) {
                    octal = false;
                }
                i += 1;
            }
            let decimal_continues = matches!(self.chars.get(i), Some('.') | Some('e') | Some('E'));
            if octal && !decimal_continues {
                self.bump();
                let mut value: f64 = 0.0;
                while let Some(d) = self.peek().and_then(|c| c.to_digit(8)) {
                    value = value * 8.0 + d as f64;
                    self.bump();
                }
                return Ok(TokenKind::Number(value));
            }
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut i = self.pos + 1;
            if matches!(self.chars.get(i), Some('+') | Some('-')) {
                i += 1;
            }
            if self.chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let value = text.parse::<f64>().map_err(|_| {
            CompileError::syntax(format!("invalid number '{}'", text), self.line, self.column)
        })?;
        Ok(TokenKind::Number(value))
    }

    // ==================== strings ====================

    fn read_string(&mut self, quote: char) -> CompileResult<TokenKind> {
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(CompileError::UnexpectedEndOfInput { line: self.line });
            };
            if ch == quote {
                self.bump();
                return Ok(TokenKind::Str(value));
            }
            if is_line_terminator(ch) {
                return Err(CompileError::syntax(
                    "unterminated string literal",
                    self.line,
                    self.column,
                ));
            }
            if ch != '\\' {
                value.push(ch);
                self.bump();
                continue;
            }
            self.bump(); // backslash
            let Some(esc) = self.peek() else {
                return Err(CompileError::UnexpectedEndOfInput { line: self.line });
            };
            match esc {
                'b' => {
                    value.push('\u{8}');
                    self.bump();
                }
                'f' => {
                    value.push('\u{c}');
                    self.bump();
                }
                'n' => {
                    value.push('\n');
                    self.bump();
                }
                'r' => {
                    value.push('\r');
                    self.bump();
                }
                't' => {
                    value.push('\t');
                    self.bump();
                }
                'v' => {
                    value.push('\u{b}');
                    self.bump();
                }
                '0' if !self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                    value.push('\0');
                    self.bump();
                }
                'x' => {
                    self.bump();
                    let cp = self.read_hex_digits(2)?;
                    value.push(char::from_u32(cp).unwrap_or('\u{FFFD}'));
                }
                'u' => {
                    self.bump();
                    let mut cp = if self.peek() == Some('{') {
                        self.bump();
                        let mut cp: u32 = 0;
                        let mut any = false;
                        while let Some(d) = self.peek().and_then(|c| c.to_digit(16)) {
                            cp = cp * 16 + d;
                            any = true;
                            self.bump();
                        }
                        if !any || self.peek() != Some('}') || cp > 0x10FFFF {
                            return Err(CompileError::syntax(
                                "invalid unicode escape",
                                self.line,
                                self.column,
                            ));
                        }
                        self.bump();
                        cp
                    } else {
                        self.read_hex_digits(4)?
                    };
                    // An adjacent trailing-surrogate escape pairs up into a
                    // single code point (strings are UTF-16 underneath).
                    if (0xD800..=0xDBFF).contains(&cp)
                        && self.peek() == Some('\\')
                        && self.peek_at(1) == Some('u')
                    {
                        let mut trail = 0u32;
                        let mut valid = true;
                        for k in 0..4 {
                            match self.peek_at(2 + k).and_then(|c| c.to_digit(16)) {
                                Some(d) => trail = trail * 16 + d,
                                None => {
                                    valid = false;
                                    break;
                                }
                            }
                        }
                        if valid && (0xDC00..=0xDFFF).contains(&trail) {
                            for _ in 0..6 {
                                self.bump();
                            }
                            cp = 0x10000 + ((cp - 0xD800) << 10) + (trail - 0xDC00);
                        }
                    }
                    value.push(char::from_u32(cp).unwrap_or('\u{FFFD}'));
                }
                c if is_line_terminator(c) => {
                    // Line continuation
                    self.bump();
                }
                c => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    fn read_hex_digits(&mut self, count: usize) -> CompileResult<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let Some(d) = self.peek().and_then(|c| c.to_digit(16)) else {
                return Err(CompileError::syntax(
                    "invalid hexadecimal escape",
                    self.line,
                    self.column,
                ));
            };
            value = value * 16 + d;
            self.bump();
        }
        Ok(value)
    }

    // ==================== punctuators ====================

    fn read_punct(&mut self) -> CompileResult<TokenKind> {
        use Punct::*;
        let ch = self.peek().unwrap_or('\0');
        let punct = match ch {
            '(' => self.one(LParen),
            ')' => self.one(RParen),
            '{' => self.one(LBrace),
            '}' => self.one(RBrace),
            '[' => self.one(LBracket),
            ']' => self.one(RBracket),
            ';' => self.one(Semi),
            ',' => self.one(Comma),
            '.' => self.one(Dot),
            ':' => self.one(Colon),
            '?' => self.one(Question),
            '~' => self.one(Tilde),
            '+' => match self.peek_at(1) {
                Some('+') => self.two(PlusPlus),
                Some('=') => self.two(PlusAssign),
                _ => self.one(Plus),
            },
            '-' => match self.peek_at(1) {
                Some('-') => self.two(MinusMinus),
                Some('=') => self.two(MinusAssign),
                _ => self.one(Minus),
            },
            '*' => match self.peek_at(1) {
                Some('=') => self.two(StarAssign),
                _ => self.one(Star),
            },
            '/' => match self.peek_at(1) {
                Some('=') => self.two(SlashAssign),
                _ => self.one(Slash),
            },
            '%' => match self.peek_at(1) {
                Some('=') => self.two(PercentAssign),
                _ => self.one(Percent),
            },
            '=' => match (self.peek_at(1), self.peek_at(2)) {
                (Some('='), Some('=')) => self.three(EqEqEq),
                (Some('='), _) => self.two(EqEq),
                _ => self.one(Assign),
            },
            '!' => match (self.peek_at(1), self.peek_at(2)) {
                (Some('='), Some('=')) => self.three(NotEqEq),
                (Some('='), _) => self.two(NotEq),
                _ => self.one(Not),
            },
            '<' => match (self.peek_at(1), self.peek_at(2)) {
                (Some('<'), Some('=')) => self.three(ShlAssign),
                (Some('<'), _) => self.two(Shl),
                (Some('='), _) => self.two(Le),
                _ => self.one(Lt),
            },
            '>' => match (self.peek_at(1), self.peek_at(2), self.peek_at(3)) {
                (Some('>'), Some('>'), Some('=')) => {
                    self.bump();
                    self.bump();
                    self.bump();
                    self.bump();
                    UshrAssign
                }
                (Some('>'), Some('>'), _) => self.three(Ushr),
                (Some('>'), Some('='), _) => self.three(ShrAssign),
                (Some('>'), _, _) => self.two(Shr),
                (Some('='), _, _) => self.two(Ge),
                _ => self.one(Gt),
            },
            '&' => match self.peek_at(1) {
                Some('&') => self.two(AndAnd),
                Some('=') => self.two(AmpAssign),
                _ => self.one(Amp),
            },
            '|' => match self.peek_at(1) {
                Some('|') => self.two(OrOr),
                Some('=') => self.two(PipeAssign),
                _ => self.one(Pipe),
            },
            '^' => match self.peek_at(1) {
                Some('=') => self.two(CaretAssign),
                _ => self.one(Caret),
            },
            other => {
                return Err(CompileError::syntax(
                    format!("unexpected character '{}'", other),
                    self.line,
                    self.column,
                ));
            }
        };
        Ok(TokenKind::Punct(punct))
    }

    fn one(&mut self, p: Punct) -> Punct {
        self.bump();
        p
    }

    fn two(&mut self, p: Punct) -> Punct {
        self.bump();
        self.bump();
        p
    }

    fn three(&mut self, p: Punct) -> Punct {
        self.bump();
        self.bump();
        self.bump();
        p
    }

    // ==================== cursor ====================

    #[inline]
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    #[inline]
    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) {
        if let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            if is_line_terminator(c) {
                // \r\n counts as one terminator
                if c == '\r' && self.peek() == Some('\n') {
                    return;
                }
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
    }
}

fn keyword_of(word: &str) -> Option<Keyword> {
    use Keyword::*;
    Some(match word {
        "var" => Var,
        "let" => Let,
        "const" => Const,
        "function" => Function,
        "return" => Return,
        "if" => If,
        "else" => Else,
        "while" => While,
        "do" => Do,
        "for" => For,
        "in" => In,
        "break" => Break,
        "continue" => Continue,
        "new" => New,
        "delete" => Delete,
        "typeof" => Typeof,
        "void" => Void,
        "instanceof" => Instanceof,
        "this" => This,
        "true" => True,
        "false" => False,
        "null" => Null,
        "throw" => Throw,
        "try" => Try,
        "catch" => Catch,
        "finally" => Finally,
        "switch" => Switch,
        "case" => Case,
        "default" => Default,
        "with" => With,
        _ => return None,
    })
}

fn is_future_reserved(word: &str) -> bool {
    matches!(
        word,
        "class"
            | "enum"
            | "export"
            | "extends"
            | "import"
            | "super"
            | "implements"
            | "interface"
            | "package"
            | "private"
            | "protected"
            | "public"
            | "static"
            | "yield"
    )
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_id_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_id_continue(c: char) -> bool {
    is_id_start(c) || c.is_numeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source, 1, true);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap();
            if t.kind == TokenKind::Eof {
                break;
            }
            out.push(t.kind);
        }
        out
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            tokens("var x = 1;"),
            vec![
                TokenKind::Keyword(Keyword::Var),
                TokenKind::Ident("x".into()),
                TokenKind::Punct(Punct::Assign),
                TokenKind::Number(1.0),
                TokenKind::Punct(Punct::Semi),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokens("0x10"), vec![TokenKind::Number(16.0)]);
        assert_eq!(tokens("010"), vec![TokenKind::Number(8.0)]);
        assert_eq!(tokens("1.5e2"), vec![TokenKind::Number(150.0)]);
        assert_eq!(tokens(".5"), vec![TokenKind::Number(0.5)]);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\n\tA""#),
            vec![TokenKind::Str("a\n\tA".into())]
        );
    }

    #[test]
    fn test_newline_tracking() {
        let mut lexer = Lexer::new("a\nb", 1, true);
        let a = lexer.next_token().unwrap();
        let b = lexer.next_token().unwrap();
        assert!(!a.newline_before);
        assert!(b.newline_before);
        assert_eq!(b.pos.line, 2);
    }

    #[test]
    fn test_unterminated_comment_is_premature_eof() {
        let mut lexer = Lexer::new("/* comment", 1, true);
        let err = lexer.next_token().unwrap_err();
        assert!(err.is_premature_eof());
    }

    #[test]
    fn test_unterminated_string_is_premature_eof() {
        let mut lexer = Lexer::new("\"abc", 1, true);
        assert!(lexer.next_token().unwrap_err().is_premature_eof());
    }

    #[test]
    fn test_reserved_word_policy() {
        let mut lexer = Lexer::new("class", 1, false);
        assert!(lexer.next_token().is_err());
        let mut lexer = Lexer::new("class", 1, true);
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::Ident("class".into())
        );
    }

    #[test]
    fn test_regex_rescan() {
        let mut lexer = Lexer::new("/a[/]b/gi", 1, true);
        let slash = lexer.next_token().unwrap();
        assert_eq!(slash.kind, TokenKind::Punct(Punct::Slash));
        let regex = lexer.rescan_regex(slash.offset, slash.pos).unwrap();
        assert_eq!(
            regex.kind,
            TokenKind::Regex {
                source: "a[/]b".into(),
                flags: "gi".into()
            }
        );
    }

    proptest::proptest! {
        #[test]
        fn test_any_plain_identifier_lexes_whole(name in "[a-zA-Z_$][a-zA-Z0-9_$]{0,12}") {
            let mut lexer = Lexer::new(&name, 1, true);
            let token = lexer.next_token().unwrap();
            match token.kind {
                TokenKind::Ident(ident) => proptest::prop_assert_eq!(ident, name),
                TokenKind::Keyword(_) => proptest::prop_assert!(keyword_of(&name).is_some()),
                other => proptest::prop_assert!(false, "unexpected token {:?}", other),
            }
            proptest::prop_assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
        }
    }

    #[test]
    fn test_shift_operators() {
        assert_eq!(
            tokens("a >>> b >>= c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(Punct::Ushr),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(Punct::ShrAssign),
                TokenKind::Ident("c".into()),
            ]
        );
    }
}
