//! Hand-written tokenizer for the Pascal dialect.
//!
//! Keywords are recognized case-insensitively. Comments (`//`, `{ }`,
//! `(* *)`) are skipped. String literals use single quotes with `''` as the
//! escaped quote; `#NN` character codes concatenate with adjacent string
//! literals, matching the source language.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exception_public::CodeLoc;

/// A lexical error with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LexError {
    pub message: String,
    pub pos: CodeLoc,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.pos)
    }
}

/// Token kinds.
///
/// Keyword variants carry no payload; identifiers and literals carry their
/// text/value. The parser interns identifier names itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum TokenKind {
    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),

    // Keywords
    KwAbstract,
    KwAnd,
    KwArray,
    KwAs,
    KwBegin,
    KwBreak,
    KwCase,
    KwClass,
    KwConst,
    KwConstructor,
    KwContinue,
    KwDefault,
    KwDestructor,
    KwDiv,
    KwDo,
    KwDownto,
    KwElse,
    KwEnd,
    KwEnsure,
    KwExcept,
    KwExit,
    KwExternal,
    KwFalse,
    KwFinally,
    KwFor,
    KwFunction,
    KwIf,
    KwImplements,
    KwIn,
    KwInherited,
    KwInterface,
    KwIs,
    KwLambda,
    KwLazy,
    KwMod,
    KwNew,
    KwNil,
    KwNot,
    KwOf,
    KwOld,
    KwOn,
    KwOperator,
    KwOr,
    KwOut,
    KwOverload,
    KwOverride,
    KwPartial,
    KwProcedure,
    KwProperty,
    KwRaise,
    KwRead,
    KwRecord,
    KwReintroduce,
    KwRepeat,
    KwRequire,
    KwSar,
    KwSet,
    KwShl,
    KwShr,
    KwThen,
    KwTo,
    KwTrue,
    KwTry,
    KwType,
    KwUntil,
    KwUses,
    KwVar,
    KwVirtual,
    KwWhile,
    KwWith,
    KwWrite,
    KwXor,

    // Symbols
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    DotDot,
    At,
    Arrow,
    Coalesce,

    Eof,
}

impl TokenKind {
    /// Short description used in "expected X, found Y" parse errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::IntLit(v) => format!("integer {v}"),
            Self::FloatLit(v) => format!("float {v}"),
            Self::StrLit(_) => "string literal".to_owned(),
            Self::Eof => "end of input".to_owned(),
            other => format!("'{}'", other.spelling()),
        }
    }

    fn spelling(&self) -> &'static str {
        match self {
            Self::KwAbstract => "abstract",
            Self::KwAnd => "and",
            Self::KwArray => "array",
            Self::KwAs => "as",
            Self::KwBegin => "begin",
            Self::KwBreak => "break",
            Self::KwCase => "case",
            Self::KwClass => "class",
            Self::KwConst => "const",
            Self::KwConstructor => "constructor",
            Self::KwContinue => "continue",
            Self::KwDefault => "default",
            Self::KwDestructor => "destructor",
            Self::KwDiv => "div",
            Self::KwDo => "do",
            Self::KwDownto => "downto",
            Self::KwElse => "else",
            Self::KwEnd => "end",
            Self::KwEnsure => "ensure",
            Self::KwExcept => "except",
            Self::KwExit => "exit",
            Self::KwExternal => "external",
            Self::KwFalse => "False",
            Self::KwFinally => "finally",
            Self::KwFor => "for",
            Self::KwFunction => "function",
            Self::KwIf => "if",
            Self::KwImplements => "implements",
            Self::KwIn => "in",
            Self::KwInherited => "inherited",
            Self::KwInterface => "interface",
            Self::KwIs => "is",
            Self::KwLambda => "lambda",
            Self::KwLazy => "lazy",
            Self::KwMod => "mod",
            Self::KwNew => "new",
            Self::KwNil => "nil",
            Self::KwNot => "not",
            Self::KwOf => "of",
            Self::KwOld => "old",
            Self::KwOn => "on",
            Self::KwOperator => "operator",
            Self::KwOr => "or",
            Self::KwOut => "out",
            Self::KwOverload => "overload",
            Self::KwOverride => "override",
            Self::KwPartial => "partial",
            Self::KwProcedure => "procedure",
            Self::KwProperty => "property",
            Self::KwRaise => "raise",
            Self::KwRead => "read",
            Self::KwRecord => "record",
            Self::KwReintroduce => "reintroduce",
            Self::KwRepeat => "repeat",
            Self::KwRequire => "require",
            Self::KwSar => "sar",
            Self::KwSet => "set",
            Self::KwShl => "shl",
            Self::KwShr => "shr",
            Self::KwThen => "then",
            Self::KwTo => "to",
            Self::KwTrue => "True",
            Self::KwTry => "try",
            Self::KwType => "type",
            Self::KwUntil => "until",
            Self::KwUses => "uses",
            Self::KwVar => "var",
            Self::KwVirtual => "virtual",
            Self::KwWhile => "while",
            Self::KwWith => "with",
            Self::KwWrite => "write",
            Self::KwXor => "xor",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Assign => ":=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::StarAssign => "*=",
            Self::SlashAssign => "/=",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::DotDot => "..",
            Self::At => "@",
            Self::Arrow => "=>",
            Self::Coalesce => "??",
            Self::Ident(_) | Self::IntLit(_) | Self::FloatLit(_) | Self::StrLit(_) | Self::Eof => "",
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub pos: CodeLoc,
}

fn keyword(ident: &str) -> Option<TokenKind> {
    // Keywords are ASCII; a cheap lowercase copy suffices here.
    Some(match ident.to_ascii_lowercase().as_str() {
        "abstract" => TokenKind::KwAbstract,
        "and" => TokenKind::KwAnd,
        "array" => TokenKind::KwArray,
        "as" => TokenKind::KwAs,
        "begin" => TokenKind::KwBegin,
        "break" => TokenKind::KwBreak,
        "case" => TokenKind::KwCase,
        "class" => TokenKind::KwClass,
        "const" => TokenKind::KwConst,
        "constructor" => TokenKind::KwConstructor,
        "continue" => TokenKind::KwContinue,
        "default" => TokenKind::KwDefault,
        "destructor" => TokenKind::KwDestructor,
        "div" => TokenKind::KwDiv,
        "do" => TokenKind::KwDo,
        "downto" => TokenKind::KwDownto,
        "else" => TokenKind::KwElse,
        "end" => TokenKind::KwEnd,
        "ensure" => TokenKind::KwEnsure,
        "except" => TokenKind::KwExcept,
        "exit" => TokenKind::KwExit,
        "external" => TokenKind::KwExternal,
        "false" => TokenKind::KwFalse,
        "finally" => TokenKind::KwFinally,
        "for" => TokenKind::KwFor,
        "function" => TokenKind::KwFunction,
        "if" => TokenKind::KwIf,
        "implements" => TokenKind::KwImplements,
        "in" => TokenKind::KwIn,
        "inherited" => TokenKind::KwInherited,
        "interface" => TokenKind::KwInterface,
        "is" => TokenKind::KwIs,
        "lambda" => TokenKind::KwLambda,
        "lazy" => TokenKind::KwLazy,
        "mod" => TokenKind::KwMod,
        "new" => TokenKind::KwNew,
        "nil" => TokenKind::KwNil,
        "not" => TokenKind::KwNot,
        "of" => TokenKind::KwOf,
        "old" => TokenKind::KwOld,
        "on" => TokenKind::KwOn,
        "operator" => TokenKind::KwOperator,
        "or" => TokenKind::KwOr,
        "out" => TokenKind::KwOut,
        "overload" => TokenKind::KwOverload,
        "override" => TokenKind::KwOverride,
        "partial" => TokenKind::KwPartial,
        "procedure" => TokenKind::KwProcedure,
        "property" => TokenKind::KwProperty,
        "raise" => TokenKind::KwRaise,
        "read" => TokenKind::KwRead,
        "record" => TokenKind::KwRecord,
        "reintroduce" => TokenKind::KwReintroduce,
        "repeat" => TokenKind::KwRepeat,
        "require" => TokenKind::KwRequire,
        "sar" => TokenKind::KwSar,
        "set" => TokenKind::KwSet,
        "shl" => TokenKind::KwShl,
        "shr" => TokenKind::KwShr,
        "then" => TokenKind::KwThen,
        "to" => TokenKind::KwTo,
        "true" => TokenKind::KwTrue,
        "try" => TokenKind::KwTry,
        "type" => TokenKind::KwType,
        "until" => TokenKind::KwUntil,
        "uses" => TokenKind::KwUses,
        "var" => TokenKind::KwVar,
        "virtual" => TokenKind::KwVirtual,
        "while" => TokenKind::KwWhile,
        "with" => TokenKind::KwWith,
        "write" => TokenKind::KwWrite,
        "xor" => TokenKind::KwXor,
        _ => return None,
    })
}

/// Tokenizes `source`, returning the token list terminated by `Eof`.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> CodeLoc {
        CodeLoc::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>, pos: CodeLoc) -> LexError {
        LexError {
            message: message.into(),
            pos,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let pos = self.pos();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                });
                return Ok(tokens);
            };
            let kind = match c {
                'a'..='z' | 'A'..='Z' | '_' => self.lex_ident(),
                '0'..='9' => self.lex_number(pos)?,
                '$' => self.lex_hex(pos)?,
                '\'' | '#' => self.lex_string(pos)?,
                _ => self.lex_symbol(pos)?,
            };
            tokens.push(Token { kind, pos });
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    // Only a comment when followed by a second slash.
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'/') {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    } else {
                        return Ok(());
                    }
                }
                Some('{') => {
                    let start = self.pos();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('}') => break,
                            Some(_) => {}
                            None => return Err(self.error("unterminated comment", start)),
                        }
                    }
                }
                Some('(') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'*') {
                        let start = self.pos();
                        self.bump();
                        self.bump();
                        loop {
                            match self.bump() {
                                Some('*') if self.peek() == Some(')') => {
                                    self.bump();
                                    break;
                                }
                                Some(_) => {}
                                None => return Err(self.error("unterminated comment", start)),
                            }
                        }
                    } else {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        keyword(&ident).unwrap_or(TokenKind::Ident(ident))
    }

    fn lex_number(&mut self, pos: CodeLoc) -> Result<TokenKind, LexError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.peek() == Some('.') {
            // Take care not to consume `..` of a range.
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if lookahead.peek().is_some_and(char::is_ascii_digit) {
                is_float = true;
                text.push('.');
                self.bump();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                text.push(self.bump().expect("peeked"));
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.error("malformed float exponent", pos));
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::FloatLit)
                .map_err(|_| self.error(format!("invalid float literal '{text}'"), pos))
        } else {
            text.parse::<i64>()
                .map(TokenKind::IntLit)
                .map_err(|_| self.error(format!("integer literal out of range '{text}'"), pos))
        }
    }

    fn lex_hex(&mut self, pos: CodeLoc) -> Result<TokenKind, LexError> {
        self.bump(); // '$'
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if text.is_empty() {
            return Err(self.error("malformed hexadecimal literal", pos));
        }
        i64::from_str_radix(&text, 16)
            .map(TokenKind::IntLit)
            .map_err(|_| self.error(format!("hexadecimal literal out of range '${text}'"), pos))
    }

    fn lex_string(&mut self, pos: CodeLoc) -> Result<TokenKind, LexError> {
        let mut text = String::new();
        loop {
            match self.peek() {
                Some('\'') => {
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('\'') => {
                                // '' escapes a quote inside the literal
                                if self.eat('\'') {
                                    text.push('\'');
                                } else {
                                    break;
                                }
                            }
                            Some('\n') | None => {
                                return Err(self.error("unterminated string literal", pos));
                            }
                            Some(c) => text.push(c),
                        }
                    }
                }
                Some('#') => {
                    self.bump();
                    let mut digits = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_ascii_digit() {
                            digits.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    let code: u32 = digits
                        .parse()
                        .map_err(|_| self.error("malformed character code", pos))?;
                    let c = char::from_u32(code)
                        .ok_or_else(|| self.error(format!("invalid character code #{code}"), pos))?;
                    text.push(c);
                }
                _ => break,
            }
        }
        Ok(TokenKind::StrLit(text))
    }

    fn lex_symbol(&mut self, pos: CodeLoc) -> Result<TokenKind, LexError> {
        let c = self.bump().expect("caller peeked");
        let kind = match c {
            '+' => {
                if self.eat('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.eat('=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '=' => {
                if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Eq
                }
            }
            '<' => {
                if self.eat('>') {
                    TokenKind::Ne
                } else if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            ':' => {
                if self.eat('=') {
                    TokenKind::Assign
                } else {
                    TokenKind::Colon
                }
            }
            '.' => {
                if self.eat('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '?' => {
                if self.eat('?') {
                    TokenKind::Coalesce
                } else {
                    return Err(self.error("unexpected character '?'", pos));
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '@' => TokenKind::At,
            other => return Err(self.error(format!("unexpected character '{other}'"), pos)),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            kinds("BEGIN End beGin"),
            vec![TokenKind::KwBegin, TokenKind::KwEnd, TokenKind::KwBegin, TokenKind::Eof]
        );
    }

    #[test]
    fn integer_range_is_not_a_float() {
        assert_eq!(
            kinds("1..5"),
            vec![
                TokenKind::IntLit(1),
                TokenKind::DotDot,
                TokenKind::IntLit(5),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn floats_and_hex() {
        assert_eq!(
            kinds("1.5 2e3 $FF"),
            vec![
                TokenKind::FloatLit(1.5),
                TokenKind::FloatLit(2000.0),
                TokenKind::IntLit(255),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_escapes_and_char_codes() {
        assert_eq!(
            kinds("'it''s'#33"),
            vec![TokenKind::StrLit("it's!".to_owned()), TokenKind::Eof]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // line\n{ block } (* star *) 2"),
            vec![TokenKind::IntLit(1), TokenKind::IntLit(2), TokenKind::Eof]
        );
    }

    #[test]
    fn compound_assignment_operators() {
        assert_eq!(
            kinds("x += 1; y := 2"),
            vec![
                TokenKind::Ident("x".to_owned()),
                TokenKind::PlusAssign,
                TokenKind::IntLit(1),
                TokenKind::Semicolon,
                TokenKind::Ident("y".to_owned()),
                TokenKind::Assign,
                TokenKind::IntLit(2),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn positions_are_tracked() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[0].pos, CodeLoc::new(1, 1));
        assert_eq!(tokens[1].pos, CodeLoc::new(2, 3));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("'abc").is_err());
    }
}
