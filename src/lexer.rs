use std::collections::VecDeque;

use crate::error::Error;
use crate::interner::{self, KwId, VarId};

//===----------------------------------------------------------------------===//
// Token
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplicing,
    Str(String),
    OpenParen,
    CloseParen,
    HashOpenParen,
    HashPlus,
    HashMinus,
    Void,
    Boolean(bool),
    Character(char),
    XmlStart(String),
    XmlEnd(String),
    XmlEmpty(String),
    XmlComment,
    Dot,
    Number(f64),
    Keyword(KwId),
    Variable(VarId),
    EndOfInput,
}

/// A categorized lexeme. `whitespace` is the verbatim run preceding the
/// token (including pure-XML text, see below); the converter re-emits it,
/// so it is never normalized. `start..end` is the byte span of the lexeme
/// itself in the source.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub whitespace: String,
    pub start: usize,
    pub end: usize,
}

/// Where the scan point currently sits, as tracked by the contexts stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    TopLevel,
    Xml,
    Evl,
}

#[derive(Debug, Clone, PartialEq)]
enum Context {
    Evl,
    Xml(String),
}

// XML elements whose content mixes markup with EVL code. Everything else
// is a pure-XML context where non-markup content is text.
const MIXED_ELEMENTS: [&str; 2] = ["chapter", "section"];

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\u{B}' | '\u{C}' | '\r' | '\u{85}')
}

fn is_bidi_mark(c: char) -> bool {
    matches!(c, '\u{61C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

fn is_noncharacter(c: char) -> bool {
    let cp = c as u32;
    (0xFDD0..=0xFDEF).contains(&cp) || (cp & 0xFFFE) == 0xFFFE
}

/// Rejects the code points the lexical surface excludes: Cx controls other
/// than the whitespace ones, bidirectional marks, and non-characters. Lone
/// surrogates cannot occur in a Rust `&str`.
fn check_char(c: char, pos: usize) -> Result<(), Error> {
    let is_control = (c as u32) < 0x20 || ('\u{7F}'..='\u{9F}').contains(&c);
    if (is_control && !is_whitespace(c)) || is_bidi_mark(c) || is_noncharacter(c) {
        return Err(Error::Tokenizer(format!(
            "invalid character U+{:04X} at offset {}",
            c as u32, pos
        )));
    }
    Ok(())
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

// Characters that end a proto-token (besides whitespace). `<` only matters
// at token start, where it opens an XML tag attempt; inside a proto-token
// it is an ordinary constituent, which is what lets `_<` name a variable.
fn ends_proto_token(c: char) -> bool {
    matches!(c, '(' | ')' | '\'' | '`' | ',' | '"')
}

//===----------------------------------------------------------------------===//
// Lexer
//===----------------------------------------------------------------------===//

/// Position-based scanner over a Unicode source text.
///
/// The scanner is context-sensitive: a stack of contexts records whether
/// the scan point is inside parenthesized EVL code, inside an XML element,
/// or at top level. Inside a pure-XML element, everything up to the next
/// `<` is text and is carried on the following token's `whitespace` run.
pub struct Lexer<'src> {
    src: &'src str,
    pos: usize,
    /// Queued characters from a multi-unit `#"…"` construct, emitted as
    /// consecutive character tokens.
    pending: VecDeque<char>,
    pending_span: (usize, usize),
    contexts: Vec<Context>,
    /// Converter mode: a hash-string construct reduces to a single
    /// character token regardless of length.
    single_char_strings: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            pos: 0,
            pending: VecDeque::new(),
            pending_span: (0, 0),
            contexts: Vec::new(),
            single_char_strings: false,
        }
    }

    pub fn for_conversion(src: &'src str) -> Self {
        let mut lexer = Self::new(src);
        lexer.single_char_strings = true;
        lexer
    }

    pub fn source(&self) -> &'src str {
        self.src
    }

    pub fn context(&self) -> ContextKind {
        match self.contexts.last() {
            None => ContextKind::TopLevel,
            Some(Context::Evl) => ContextKind::Evl,
            Some(Context::Xml(_)) => ContextKind::Xml,
        }
    }

    fn in_pure_xml(&self) -> bool {
        match self.contexts.last() {
            Some(Context::Xml(name)) => !MIXED_ELEMENTS.contains(&name.as_str()),
            _ => false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.src[self.pos..].starts_with(prefix)
    }

    /// Collects the whitespace run before the next lexeme. In a pure-XML
    /// context the run extends over arbitrary text up to the next `<`.
    fn take_whitespace(&mut self) -> Result<String, Error> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if self.in_pure_xml() {
                if c == '<' {
                    break;
                }
                check_char(c, self.pos)?;
                self.advance();
            } else if is_whitespace(c) {
                self.advance();
            } else {
                check_char(c, self.pos)?;
                break;
            }
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// Produces the next token, with its preceding whitespace run.
    pub fn next_token(&mut self) -> Result<Token, Error> {
        if let Some(c) = self.pending.pop_front() {
            return Ok(Token {
                kind: TokenKind::Character(c),
                whitespace: String::new(),
                start: self.pending_span.0,
                end: self.pending_span.1,
            });
        }

        let whitespace = self.take_whitespace()?;
        let start = self.pos;

        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::EndOfInput,
                whitespace,
                start,
                end: start,
            });
        };

        let kind = match c {
            '(' => {
                self.advance();
                self.contexts.push(Context::Evl);
                TokenKind::OpenParen
            }
            ')' => {
                self.advance();
                if matches!(self.contexts.last(), Some(Context::Evl)) {
                    self.contexts.pop();
                }
                TokenKind::CloseParen
            }
            '\'' => {
                self.advance();
                TokenKind::Quote
            }
            '`' => {
                self.advance();
                TokenKind::Quasiquote
            }
            ',' => {
                self.advance();
                if self.peek() == Some('@') {
                    self.advance();
                    TokenKind::UnquoteSplicing
                } else {
                    TokenKind::Unquote
                }
            }
            '"' => {
                self.advance();
                TokenKind::Str(self.scan_string_body()?)
            }
            '#' => self.scan_hash()?,
            '<' => self.scan_xml()?,
            _ => self.scan_proto_token()?,
        };

        Ok(Token { kind, whitespace, start, end: self.pos })
    }

    //===------------------------------------------------------------------===//
    // Strings and escapes
    //===------------------------------------------------------------------===//

    /// Scans string content after the opening quote, through the closing
    /// quote. Honors `\\ \" \t \n \v \f \r \U{HEX}`.
    fn scan_string_body(&mut self) -> Result<String, Error> {
        let mut out = String::new();
        loop {
            let Some(c) = self.advance() else {
                return Err(Error::TruncatedToken(
                    "the input ends inside a string".to_string(),
                ));
            };
            match c {
                '"' => return Ok(out),
                '\\' => out.push(self.scan_string_escape()?),
                _ => {
                    check_char(c, self.pos)?;
                    out.push(c);
                }
            }
        }
    }

    fn scan_string_escape(&mut self) -> Result<char, Error> {
        let Some(c) = self.advance() else {
            return Err(Error::TruncatedToken(
                "the input ends inside an escape sequence".to_string(),
            ));
        };
        match c {
            '\\' => Ok('\\'),
            '"' => Ok('"'),
            't' => Ok('\t'),
            'n' => Ok('\n'),
            'v' => Ok('\u{B}'),
            'f' => Ok('\u{C}'),
            'r' => Ok('\r'),
            'U' => self.scan_unicode_escape(),
            other => Err(Error::Tokenizer(format!(
                "unknown string escape \\{}",
                other
            ))),
        }
    }

    /// `\U{HEX}` with one to six hex digits naming a Unicode scalar.
    fn scan_unicode_escape(&mut self) -> Result<char, Error> {
        match self.advance() {
            Some('{') => {}
            Some(other) => {
                return Err(Error::Tokenizer(format!(
                    "expected {{ after \\U, found {:?}",
                    other
                )));
            }
            None => {
                return Err(Error::TruncatedToken(
                    "the input ends inside a \\U escape".to_string(),
                ));
            }
        }
        let mut hex = String::new();
        loop {
            match self.advance() {
                Some('}') => break,
                Some(c) if c.is_ascii_hexdigit() && hex.len() < 6 => hex.push(c),
                Some(c) => {
                    return Err(Error::Tokenizer(format!(
                        "bad character {:?} in \\U escape",
                        c
                    )));
                }
                None => {
                    return Err(Error::TruncatedToken(
                        "the input ends inside a \\U escape".to_string(),
                    ));
                }
            }
        }
        if hex.is_empty() {
            return Err(Error::Tokenizer("empty \\U escape".to_string()));
        }
        let cp = u32::from_str_radix(&hex, 16)
            .map_err(|_| Error::Tokenizer(format!("bad \\U escape {}", hex)))?;
        char::from_u32(cp).ok_or_else(|| {
            Error::Tokenizer(format!("\\U{{{}}} is not a Unicode scalar", hex))
        })
    }

    //===------------------------------------------------------------------===//
    // Hash constructs
    //===------------------------------------------------------------------===//

    fn scan_hash(&mut self) -> Result<TokenKind, Error> {
        self.advance(); // the '#'
        let Some(c) = self.peek() else {
            return Err(Error::TruncatedToken(
                "the input ends after #".to_string(),
            ));
        };
        match c {
            '(' => {
                self.advance();
                self.contexts.push(Context::Evl);
                Ok(TokenKind::HashOpenParen)
            }
            '+' => {
                self.advance();
                Ok(TokenKind::HashPlus)
            }
            '-' => {
                self.advance();
                Ok(TokenKind::HashMinus)
            }
            'v' => {
                self.advance();
                self.expect_hash_boundary()?;
                Ok(TokenKind::Void)
            }
            't' => {
                self.advance();
                self.expect_hash_boundary()?;
                Ok(TokenKind::Boolean(true))
            }
            'f' => {
                self.advance();
                self.expect_hash_boundary()?;
                Ok(TokenKind::Boolean(false))
            }
            '"' => self.scan_hash_string(0),
            c if c.is_ascii_digit() => {
                let mut index = 0usize;
                while let Some(d) = self.peek() {
                    if let Some(digit) = d.to_digit(10) {
                        index = index * 10 + digit as usize;
                        self.advance();
                    } else {
                        break;
                    }
                }
                match self.peek() {
                    Some('"') => self.scan_hash_string(index),
                    Some(other) => Err(Error::Tokenizer(format!(
                        "expected \" in hash character construct, found {:?}",
                        other
                    ))),
                    None => Err(Error::TruncatedToken(
                        "the input ends inside a hash character construct"
                            .to_string(),
                    )),
                }
            }
            other => Err(Error::Tokenizer(format!(
                "unknown hash construct #{}",
                other
            ))),
        }
    }

    fn expect_hash_boundary(&mut self) -> Result<(), Error> {
        match self.peek() {
            None => Ok(()),
            Some(c)
                if is_whitespace(c) || ends_proto_token(c) || c == '<' || c == '#' =>
            {
                Ok(())
            }
            Some(c) => Err(Error::Tokenizer(format!(
                "malformed hash construct before {:?}",
                c
            ))),
        }
    }

    /// `#"…"` / `#N"…"`: the code unit at index N (0-based, default 0)
    /// becomes this character token; the remaining units after N are
    /// queued to emerge as consecutive character tokens. In conversion
    /// mode the construct is always a single token.
    fn scan_hash_string(&mut self, index: usize) -> Result<TokenKind, Error> {
        let start = self.pos;
        self.advance(); // the '"'
        let body = self.scan_string_body()?;
        let units: Vec<char> = body.chars().collect();
        if units.is_empty() {
            return Err(Error::Tokenizer(
                "empty hash character construct".to_string(),
            ));
        }
        if index >= units.len() {
            return Err(Error::Tokenizer(format!(
                "character index {} out of range for {} code units",
                index,
                units.len()
            )));
        }
        if !self.single_char_strings {
            self.pending.extend(units[index + 1..].iter().copied());
            self.pending_span = (start, self.pos);
        }
        Ok(TokenKind::Character(units[index]))
    }

    //===------------------------------------------------------------------===//
    // XML markup
    //===------------------------------------------------------------------===//

    fn scan_xml(&mut self) -> Result<TokenKind, Error> {
        if self.starts_with("<!--") {
            return self.scan_xml_comment();
        }
        self.advance(); // the '<'
        if self.peek() == Some('/') {
            self.advance();
            let name = self.scan_xml_name()?;
            self.skip_xml_space();
            match self.advance() {
                Some('>') => {
                    if matches!(self.contexts.last(), Some(Context::Xml(_))) {
                        self.contexts.pop();
                    }
                    Ok(TokenKind::XmlEnd(name))
                }
                Some(c) => Err(Error::Tokenizer(format!(
                    "malformed XML end tag: unexpected {:?}",
                    c
                ))),
                None => Err(Error::TruncatedToken(
                    "the input ends inside an XML end tag".to_string(),
                )),
            }
        } else {
            let name = self.scan_xml_name()?;
            loop {
                self.skip_xml_space();
                match self.peek() {
                    Some('>') => {
                        self.advance();
                        self.contexts.push(Context::Xml(name.clone()));
                        return Ok(TokenKind::XmlStart(name));
                    }
                    Some('/') => {
                        self.advance();
                        match self.advance() {
                            Some('>') => return Ok(TokenKind::XmlEmpty(name)),
                            Some(c) => {
                                return Err(Error::Tokenizer(format!(
                                    "malformed XML empty tag: unexpected {:?}",
                                    c
                                )));
                            }
                            None => {
                                return Err(Error::TruncatedToken(
                                    "the input ends inside an XML tag".to_string(),
                                ));
                            }
                        }
                    }
                    Some(c) if is_name_start(c) => {
                        self.scan_xml_attribute()?;
                    }
                    Some(c) => {
                        return Err(Error::Tokenizer(format!(
                            "malformed XML tag: unexpected {:?}",
                            c
                        )));
                    }
                    None => {
                        return Err(Error::TruncatedToken(
                            "the input ends inside an XML tag".to_string(),
                        ));
                    }
                }
            }
        }
    }

    fn scan_xml_comment(&mut self) -> Result<TokenKind, Error> {
        // past "<!--"
        self.pos += 4;
        match self.src[self.pos..].find("-->") {
            Some(offset) => {
                self.pos += offset + 3;
                Ok(TokenKind::XmlComment)
            }
            None => {
                self.pos = self.src.len();
                Err(Error::TruncatedToken(
                    "the input ends inside an XML comment".to_string(),
                ))
            }
        }
    }

    fn scan_xml_name(&mut self) -> Result<String, Error> {
        let mut name = String::new();
        match self.peek() {
            Some(c) if is_name_start(c) => {
                name.push(c);
                self.advance();
            }
            Some(c) => {
                return Err(Error::Tokenizer(format!(
                    "malformed XML markup: unexpected {:?}",
                    c
                )));
            }
            None => {
                return Err(Error::TruncatedToken(
                    "the input ends inside an XML tag".to_string(),
                ));
            }
        }
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn scan_xml_attribute(&mut self) -> Result<(), Error> {
        self.scan_xml_name()?;
        self.skip_xml_space();
        match self.advance() {
            Some('=') => {}
            Some(c) => {
                return Err(Error::Tokenizer(format!(
                    "malformed XML attribute: expected =, found {:?}",
                    c
                )));
            }
            None => {
                return Err(Error::TruncatedToken(
                    "the input ends inside an XML tag".to_string(),
                ));
            }
        }
        self.skip_xml_space();
        match self.advance() {
            Some('"') => {}
            Some(c) => {
                return Err(Error::Tokenizer(format!(
                    "malformed XML attribute: expected \", found {:?}",
                    c
                )));
            }
            None => {
                return Err(Error::TruncatedToken(
                    "the input ends inside an XML tag".to_string(),
                ));
            }
        }
        loop {
            match self.advance() {
                Some('"') => return Ok(()),
                Some(c) => check_char(c, self.pos)?,
                None => {
                    return Err(Error::TruncatedToken(
                        "the input ends inside an XML attribute".to_string(),
                    ));
                }
            }
        }
    }

    fn skip_xml_space(&mut self) {
        while let Some(c) = self.peek() {
            if is_whitespace(c) {
                self.advance();
            } else {
                break;
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Proto-tokens
    //===------------------------------------------------------------------===//

    /// Reads up to whitespace or a syntax character and classifies the
    /// run: dot, number, keyword, or variable. `\\`, `\<` and `\U{HEX}`
    /// escapes are honored.
    fn scan_proto_token(&mut self) -> Result<TokenKind, Error> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if is_whitespace(c) || ends_proto_token(c) {
                break;
            }
            if c == '\\' {
                self.advance();
                match self.peek() {
                    Some('\\') => {
                        self.advance();
                        text.push('\\');
                    }
                    Some('<') => {
                        self.advance();
                        text.push('<');
                    }
                    Some('U') => {
                        self.advance();
                        text.push(self.scan_unicode_escape()?);
                    }
                    Some(other) => {
                        return Err(Error::Tokenizer(format!(
                            "unknown token escape \\{}",
                            other
                        )));
                    }
                    None => {
                        return Err(Error::TruncatedToken(
                            "the input ends inside an escape sequence".to_string(),
                        ));
                    }
                }
                continue;
            }
            check_char(c, self.pos)?;
            text.push(c);
            self.advance();
        }

        if text == "." {
            return Ok(TokenKind::Dot);
        }
        if looks_numeric(&text) {
            return match text.parse::<f64>() {
                Ok(n) => Ok(TokenKind::Number(n)),
                Err(_) => {
                    Err(Error::Tokenizer(format!("malformed number {}", text)))
                }
            };
        }
        if let Some(name) = text.strip_prefix(':') {
            if name.is_empty() {
                return Err(Error::Tokenizer("empty keyword name".to_string()));
            }
            return Ok(TokenKind::Keyword(interner::intern_kw(name)));
        }
        Ok(TokenKind::Variable(interner::intern_var(&text)))
    }
}

/// A proto-token is numeric when it starts with a digit, or with a sign or
/// dot immediately followed by a digit.
fn looks_numeric(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') | Some('.') => {
            matches!(chars.next(), Some(d) if d.is_ascii_digit())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            let done = token.kind == TokenKind::EndOfInput;
            out.push(token.kind);
            if done {
                return out;
            }
        }
    }

    fn lex_err(src: &str) -> Error {
        let mut lexer = Lexer::new(src);
        loop {
            match lexer.next_token() {
                Ok(t) if t.kind == TokenKind::EndOfInput => {
                    panic!("expected failure lexing {:?}", src)
                }
                Ok(_) => continue,
                Err(e) => return e,
            }
        }
    }

    #[test]
    fn scans_punctuation_and_atoms() {
        let toks = kinds("(foo . 42) '#(1) `x ,y ,@z");
        assert_eq!(toks[0], TokenKind::OpenParen);
        assert_eq!(toks[1], TokenKind::Variable(interner::intern_var("foo")));
        assert_eq!(toks[2], TokenKind::Dot);
        assert_eq!(toks[3], TokenKind::Number(42.0));
        assert_eq!(toks[4], TokenKind::CloseParen);
        assert_eq!(toks[5], TokenKind::Quote);
        assert_eq!(toks[6], TokenKind::HashOpenParen);
        assert!(toks.contains(&TokenKind::Quasiquote));
        assert!(toks.contains(&TokenKind::Unquote));
        assert!(toks.contains(&TokenKind::UnquoteSplicing));
    }

    #[test]
    fn scans_hash_literals() {
        assert_eq!(
            kinds("#v #t #f")[..3],
            [TokenKind::Void, TokenKind::Boolean(true), TokenKind::Boolean(false)]
        );
    }

    #[test]
    fn negative_and_fractional_numbers() {
        assert_eq!(kinds("-4.5")[0], TokenKind::Number(-4.5));
        assert_eq!(kinds(".5")[0], TokenKind::Number(0.5));
        assert_eq!(kinds("+3")[0], TokenKind::Number(3.0));
        // A lone sign is a variable, not a number.
        assert_eq!(kinds("-")[0], TokenKind::Variable(interner::intern_var("-")));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\nc\"d\\e""#)[0],
            TokenKind::Str("a\tb\nc\"d\\e".to_string())
        );
        assert_eq!(
            kinds(r#""snow\U{2603}man""#)[0],
            TokenKind::Str("snow\u{2603}man".to_string())
        );
    }

    #[test]
    fn unterminated_string_is_truncated() {
        assert!(matches!(lex_err(r#""oops"#), Error::TruncatedToken(_)));
        assert!(matches!(lex_err(r#""oops\"#), Error::TruncatedToken(_)));
        assert!(matches!(lex_err("#"), Error::TruncatedToken(_)));
    }

    #[test]
    fn hash_string_queues_remaining_units() {
        let toks = kinds(r#"#"abc""#);
        assert_eq!(
            toks[..3],
            [
                TokenKind::Character('a'),
                TokenKind::Character('b'),
                TokenKind::Character('c')
            ]
        );
    }

    #[test]
    fn hash_string_with_index_selects_unit() {
        let toks = kinds(r#"#1"abc""#);
        assert_eq!(
            toks[..2],
            [TokenKind::Character('b'), TokenKind::Character('c')]
        );
        assert!(matches!(lex_err(r#"#9"ab""#), Error::Tokenizer(_)));
    }

    #[test]
    fn conversion_mode_keeps_one_character() {
        let mut lexer = Lexer::for_conversion(r#"#"abc" x"#);
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Character('a'));
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::Variable(interner::intern_var("x"))
        );
    }

    #[test]
    fn keywords_and_variables() {
        assert_eq!(kinds(":k")[0], TokenKind::Keyword(interner::intern_kw("k")));
        assert_eq!(
            kinds("_<")[0],
            TokenKind::Variable(interner::intern_var("_<"))
        );
        assert_eq!(
            kinds(r"\<=")[0],
            TokenKind::Variable(interner::intern_var("<="))
        );
    }

    #[test]
    fn scans_xml_tags() {
        let toks = kinds("<chapter><para attr=\"v\"/>(x)</chapter>");
        assert_eq!(toks[0], TokenKind::XmlStart("chapter".to_string()));
        assert_eq!(toks[1], TokenKind::XmlEmpty("para".to_string()));
        assert_eq!(toks[2], TokenKind::OpenParen);
        assert_eq!(toks[3], TokenKind::Variable(interner::intern_var("x")));
        assert_eq!(toks[4], TokenKind::CloseParen);
        assert_eq!(toks[5], TokenKind::XmlEnd("chapter".to_string()));
    }

    #[test]
    fn xml_comment_scans_as_one_token() {
        let toks = kinds("<!-- anything (here) --> 1");
        assert_eq!(toks[0], TokenKind::XmlComment);
        assert_eq!(toks[1], TokenKind::Number(1.0));
    }

    #[test]
    fn pure_xml_content_is_swallowed_as_text() {
        // Inside <para> (a pure-XML element) words are text, not variables.
        let mut lexer = Lexer::new("<chapter><para>some prose (not code)</para></chapter>");
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::XmlStart("chapter".to_string())
        );
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::XmlStart("para".to_string())
        );
        let end = lexer.next_token().unwrap();
        assert_eq!(end.kind, TokenKind::XmlEnd("para".to_string()));
        assert_eq!(end.whitespace, "some prose (not code)");
    }

    #[test]
    fn malformed_xml_is_a_tokenizer_error() {
        assert!(matches!(lex_err("<1tag>"), Error::Tokenizer(_)));
        assert!(matches!(lex_err("<tag attr>"), Error::Tokenizer(_)));
        assert!(matches!(lex_err("<tag"), Error::TruncatedToken(_)));
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(matches!(lex_err("a\u{1}b"), Error::Tokenizer(_)));
        assert!(matches!(lex_err("\u{200E}x"), Error::Tokenizer(_)));
        assert!(matches!(lex_err("\u{FDD0}"), Error::Tokenizer(_)));
    }

    #[test]
    fn whitespace_runs_are_preserved() {
        let mut lexer = Lexer::new("  \n\t(x)");
        let tok = lexer.next_token().unwrap();
        assert_eq!(tok.kind, TokenKind::OpenParen);
        assert_eq!(tok.whitespace, "  \n\t");
    }

    #[test]
    fn end_of_input_carries_trailing_whitespace() {
        let mut lexer = Lexer::new("x   ");
        lexer.next_token().unwrap();
        let tok = lexer.next_token().unwrap();
        assert_eq!(tok.kind, TokenKind::EndOfInput);
        assert_eq!(tok.whitespace, "   ");
    }
}
