use itertools::Itertools;

use crate::error::Error;
use crate::lexer::{Lexer, Token, TokenKind};

//===----------------------------------------------------------------------===//
// EVL → XML conversion
//===----------------------------------------------------------------------===//
//
// Re-scans the source with the tokenizer in its conversion mode (hash
// string constructs reduce to a single character token) and re-emits it
// as mixed EVL/XML markup:
//
//  - at top level, whitespace between tokens passes through as-is;
//  - inside an XML element, a run of EVL tokens is wrapped in
//    <toplevelcode><blockcode>…</blockcode></toplevelcode>, and two or
//    more newlines between EVL tokens split the run into separate blocks;
//  - inside a parenthesized EVL form, an embedded XML element is wrapped
//    in <indentation style="margin-left: N ch"><blockcomment>…, where N
//    counts the spaces after the first newline of the preceding
//    whitespace;
//  - a <comment>…</comment> element folds into a single end-of-line
//    comment token whose body passes through.
//
// EVL lexemes are XML-escaped; XML lexemes pass through verbatim.

pub fn convert(src: &str) -> Result<String, Error> {
    Converter::new(src).run()
}

struct Converter<'src> {
    src: &'src str,
    lexer: Lexer<'src>,
    out: String,
    /// Open XML elements at the current scan point.
    xml_depth: usize,
    /// Open parentheses at the current scan point.
    paren_depth: usize,
    /// An open <toplevelcode><blockcode> run.
    in_code_block: bool,
}

fn is_xml_token(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::XmlStart(_)
            | TokenKind::XmlEnd(_)
            | TokenKind::XmlEmpty(_)
            | TokenKind::XmlComment
    )
}

fn escape_xml(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            other => other.to_string(),
        })
        .join("")
}

impl<'src> Converter<'src> {
    fn new(src: &'src str) -> Self {
        Self {
            src,
            lexer: Lexer::for_conversion(src),
            out: String::new(),
            xml_depth: 0,
            paren_depth: 0,
            in_code_block: false,
        }
    }

    fn raw(&self, token: &Token) -> &'src str {
        &self.src[token.start..token.end]
    }

    fn run(mut self) -> Result<String, Error> {
        loop {
            let token = self.lexer.next_token()?;
            match &token.kind {
                TokenKind::EndOfInput => {
                    self.close_code_block();
                    self.out.push_str(&token.whitespace);
                    return Ok(self.out);
                }
                kind if is_xml_token(kind) => self.emit_xml(token)?,
                _ => self.emit_evl(&token),
            }
        }
    }

    //===------------------------------------------------------------------===//
    // EVL lexemes
    //===------------------------------------------------------------------===//

    fn emit_evl(&mut self, token: &Token) {
        let in_xml = self.xml_depth > 0 && self.paren_depth == 0;
        if in_xml {
            if self.in_code_block
                && token.whitespace.matches('\n').count() >= 2
            {
                // A blank line splits the run into separate blocks.
                self.close_code_block();
            }
            if !self.in_code_block {
                self.out.push_str(&token.whitespace);
                self.out.push_str("<toplevelcode><blockcode>");
                self.in_code_block = true;
            } else {
                self.out.push_str(&token.whitespace);
            }
        } else {
            self.out.push_str(&token.whitespace);
        }

        self.out.push_str(&escape_xml(self.raw(token)));
        match token.kind {
            TokenKind::OpenParen | TokenKind::HashOpenParen => {
                self.paren_depth += 1;
            }
            TokenKind::CloseParen => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn close_code_block(&mut self) {
        if self.in_code_block {
            self.out.push_str("</blockcode></toplevelcode>");
            self.in_code_block = false;
        }
    }

    //===------------------------------------------------------------------===//
    // XML markup
    //===------------------------------------------------------------------===//

    fn emit_xml(&mut self, token: Token) -> Result<(), Error> {
        if self.paren_depth > 0 {
            return self.emit_xml_in_code(token);
        }

        self.close_code_block();
        self.out.push_str(&token.whitespace);
        self.out.push_str(self.raw(&token));
        match token.kind {
            TokenKind::XmlStart(_) => self.xml_depth += 1,
            TokenKind::XmlEnd(_) => {
                if self.xml_depth == 0 {
                    return Err(Error::Converter(
                        "unmatched XML end tag".to_string(),
                    ));
                }
                self.xml_depth -= 1;
            }
            _ => {}
        }
        Ok(())
    }

    /// An XML element embedded in code becomes an indented block comment;
    /// a <comment> element passes through as an end-of-line comment.
    fn emit_xml_in_code(&mut self, token: Token) -> Result<(), Error> {
        let folding_comment = matches!(&token.kind, TokenKind::XmlStart(name) if name == "comment");
        let indent = indentation_of(&token.whitespace);
        self.out.push_str(&token.whitespace);

        if !folding_comment {
            self.out.push_str(&format!(
                "<indentation style=\"margin-left: {} ch\"><blockcomment>",
                indent
            ));
        }
        self.out.push_str(self.raw(&token));

        if let TokenKind::XmlStart(_) = token.kind {
            let mut open = 1usize;
            while open > 0 {
                let inner = self.lexer.next_token()?;
                match &inner.kind {
                    TokenKind::XmlStart(_) => open += 1,
                    TokenKind::XmlEnd(_) => open -= 1,
                    TokenKind::EndOfInput => {
                        return Err(Error::Converter(
                            "the input ends inside an XML element".to_string(),
                        ));
                    }
                    _ => {}
                }
                self.out.push_str(&inner.whitespace);
                self.out.push_str(self.raw(&inner));
            }
        }

        if !folding_comment {
            self.out.push_str("</blockcomment></indentation>");
        }
        Ok(())
    }
}

/// The count of spaces after the first newline of the whitespace run.
fn indentation_of(whitespace: &str) -> usize {
    match whitespace.find('\n') {
        Some(pos) => whitespace[pos + 1..].chars().take_while(|&c| c == ' ').count(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_code_passes_through_escaped() {
        let out = convert("(foo 1 2)").unwrap();
        assert_eq!(out, "(foo 1 2)");

        let out = convert("(_< 1 2)").unwrap();
        assert_eq!(out, "(_&lt; 1 2)");
    }

    #[test]
    fn top_level_whitespace_is_preserved() {
        let out = convert("  (a)\n\n(b)  ").unwrap();
        assert_eq!(out, "  (a)\n\n(b)  ");
    }

    #[test]
    fn code_inside_xml_is_wrapped() {
        let out =
            convert("<chapter><title>T</title><para>p</para>(foo)</chapter>")
                .unwrap();
        assert_eq!(
            out,
            "<chapter><title>T</title><para>p</para>\
             <toplevelcode><blockcode>(foo)</blockcode></toplevelcode>\
             </chapter>"
        );
    }

    #[test]
    fn blank_lines_split_code_blocks() {
        let out = convert("<chapter>(a)\n\n(b)</chapter>").unwrap();
        assert_eq!(
            out,
            "<chapter><toplevelcode><blockcode>(a)</blockcode></toplevelcode>\
             \n\n<toplevelcode><blockcode>(b)</blockcode></toplevelcode>\
             </chapter>"
        );
    }

    #[test]
    fn single_newline_stays_in_one_block() {
        let out = convert("<chapter>(a)\n(b)</chapter>").unwrap();
        assert_eq!(
            out,
            "<chapter><toplevelcode><blockcode>(a)\n(b)</blockcode>\
             </toplevelcode></chapter>"
        );
    }

    #[test]
    fn xml_inside_code_becomes_a_block_comment() {
        let out = convert("(foo\n  <note>hi</note> bar)").unwrap();
        assert_eq!(
            out,
            "(foo\n  <indentation style=\"margin-left: 2 ch\">\
             <blockcomment><note>hi</note></blockcomment></indentation> bar)"
        );
    }

    #[test]
    fn comment_elements_fold_into_eol_comments() {
        let out = convert("(foo <comment>to do</comment> bar)").unwrap();
        assert_eq!(out, "(foo <comment>to do</comment> bar)");
    }

    #[test]
    fn hash_strings_convert_as_single_tokens() {
        let out = convert(r#"#"abc""#).unwrap();
        assert_eq!(out, r#"#"abc""#);
    }

    #[test]
    fn unmatched_end_tag_is_a_converter_error() {
        assert!(matches!(convert("</chapter>"), Err(Error::Converter(_))));
    }
}
