use std::rc::Rc;

use crate::error::{Error, ReaderError};
use crate::interner::{self, VarId};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::{improper_list_from_vec, list_from_vec, Value};

/// Receives each fully-read top-level EVL object encountered inside an XML
/// element, so scripted content inside documentation can still be executed.
pub type ReadCallback<'cb> = &'cb mut dyn FnMut(&Value) -> Result<(), Error>;

//===----------------------------------------------------------------------===//
// Reader
//===----------------------------------------------------------------------===//

/// Assembles EVL objects from the token stream.
///
/// XML elements are skipped as block comments, abbreviations expand to
/// their canonical two-element lists, and `#+`/`#-` read-time conditionals
/// are resolved against the feature list the caller supplies.
pub struct Reader<'src, 'cb> {
    lexer: Lexer<'src>,
    features: Vec<VarId>,
    callback: Option<ReadCallback<'cb>>,
}

impl<'src, 'cb> Reader<'src, 'cb> {
    pub fn new(src: &'src str) -> Self {
        Self { lexer: Lexer::new(src), features: Vec::new(), callback: None }
    }

    /// The `*features*` snapshot used to resolve read-time conditionals.
    pub fn with_features(mut self, features: Vec<VarId>) -> Self {
        self.features = features;
        self
    }

    /// Refreshes the feature snapshot between top-level reads, so that
    /// evaluation of earlier forms can influence later conditionals.
    pub fn set_features(&mut self, features: Vec<VarId>) {
        self.features = features;
    }

    pub fn with_callback(mut self, callback: ReadCallback<'cb>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Reads the next object. `None` when the input is exhausted.
    pub fn read(&mut self) -> Result<Option<Value>, Error> {
        loop {
            let token = self.lexer.next_token()?;
            match token.kind {
                TokenKind::EndOfInput => return Ok(None),
                _ => {
                    if let Some(value) = self.read_form_from(token)? {
                        return Ok(Some(value));
                    }
                }
            }
        }
    }

    /// Reads the next object, failing on end of input. Used inside
    /// delimited constructs.
    fn read_required(&mut self) -> Result<Value, Error> {
        loop {
            let token = self.lexer.next_token()?;
            if token.kind == TokenKind::EndOfInput {
                return Err(Error::Reader(ReaderError::UnexpectedEndOfInput));
            }
            if let Some(value) = self.read_form_from(token)? {
                return Ok(value);
            }
        }
    }

    /// Turns one leading token into an object. `None` means the token
    /// opened something that reads as a comment (an XML element or a
    /// dropped conditional) and the caller should continue.
    fn read_form_from(&mut self, token: Token) -> Result<Option<Value>, Error> {
        match token.kind {
            TokenKind::Quote => self.read_abbreviation("quote").map(Some),
            TokenKind::Quasiquote => {
                self.read_abbreviation("quasiquote").map(Some)
            }
            TokenKind::Unquote => self.read_abbreviation("unquote").map(Some),
            TokenKind::UnquoteSplicing => {
                self.read_abbreviation("unquote-splicing").map(Some)
            }
            TokenKind::OpenParen => self.read_list().map(Some),
            TokenKind::HashOpenParen => self.read_vector().map(Some),
            TokenKind::CloseParen => {
                Err(Error::Reader(ReaderError::UnexpectedClosingParenthesis))
            }
            TokenKind::Dot => Err(Error::Reader(ReaderError::UnexpectedDot)),
            TokenKind::XmlStart(name) => {
                self.skip_xml_element(name)?;
                Ok(None)
            }
            TokenKind::XmlEnd(_) => {
                Err(Error::Reader(ReaderError::UnexpectedXMLEndTag))
            }
            TokenKind::XmlEmpty(_) | TokenKind::XmlComment => Ok(None),
            TokenKind::HashPlus => self.read_conditional(true),
            TokenKind::HashMinus => self.read_conditional(false),
            TokenKind::Str(s) => Ok(Some(Value::Str(Rc::from(s.as_str())))),
            TokenKind::Void => Ok(Some(Value::Void)),
            TokenKind::Boolean(b) => Ok(Some(Value::Boolean(b))),
            TokenKind::Character(c) => Ok(Some(Value::Character(c))),
            TokenKind::Number(n) => Ok(Some(Value::Number(n))),
            TokenKind::Keyword(id) => Ok(Some(Value::Keyword(id))),
            TokenKind::Variable(id) => Ok(Some(Value::Variable(id))),
            TokenKind::EndOfInput => {
                Err(Error::Reader(ReaderError::UnexpectedEndOfInput))
            }
        }
    }

    /// `'x` and friends become the canonical two-element list.
    fn read_abbreviation(&mut self, head: &str) -> Result<Value, Error> {
        let object = self.read_required()?;
        Ok(list_from_vec(vec![
            Value::Variable(interner::intern_var(head)),
            object,
        ]))
    }

    fn read_list(&mut self) -> Result<Value, Error> {
        let mut items: Vec<Value> = Vec::new();
        let mut tail: Option<Value> = None;
        loop {
            let token = self.lexer.next_token()?;
            match token.kind {
                TokenKind::CloseParen => {
                    return Ok(match tail {
                        Some(t) => improper_list_from_vec(items, t),
                        None => list_from_vec(items),
                    });
                }
                TokenKind::EndOfInput => {
                    return Err(Error::Reader(ReaderError::UnexpectedEndOfInput));
                }
                TokenKind::Dot => {
                    // A dot is only legal between the last element and the
                    // closing parenthesis.
                    if items.is_empty() || tail.is_some() {
                        return Err(Error::Reader(ReaderError::UnexpectedDot));
                    }
                    tail = Some(self.read_required()?);
                }
                _ => {
                    if tail.is_some() {
                        return Err(Error::Reader(ReaderError::UnexpectedDot));
                    }
                    if let Some(value) = self.read_form_from(token)? {
                        items.push(value);
                    }
                }
            }
        }
    }

    fn read_vector(&mut self) -> Result<Value, Error> {
        let mut items: Vec<Value> = Vec::new();
        loop {
            let token = self.lexer.next_token()?;
            match token.kind {
                TokenKind::CloseParen => return Ok(Value::vector(items)),
                TokenKind::EndOfInput => {
                    return Err(Error::Reader(ReaderError::UnexpectedEndOfInput));
                }
                TokenKind::Dot => {
                    return Err(Error::Reader(ReaderError::UnexpectedDot));
                }
                _ => {
                    if let Some(value) = self.read_form_from(token)? {
                        items.push(value);
                    }
                }
            }
        }
    }

    /// Skips an XML element as a block comment, delivering every complete
    /// EVL object read inside it to the callback.
    fn skip_xml_element(&mut self, name: String) -> Result<(), Error> {
        let mut open = vec![name];
        loop {
            let token = self.lexer.next_token()?;
            match token.kind {
                TokenKind::XmlStart(n) => open.push(n),
                TokenKind::XmlEnd(n) => {
                    if open.last().map(String::as_str) != Some(n.as_str()) {
                        return Err(Error::Reader(ReaderError::UnexpectedXMLEndTag));
                    }
                    open.pop();
                    if open.is_empty() {
                        return Ok(());
                    }
                }
                TokenKind::XmlEmpty(_) | TokenKind::XmlComment => {}
                TokenKind::EndOfInput => {
                    return Err(Error::Reader(ReaderError::UnexpectedEndOfInput));
                }
                _ => {
                    if let Some(value) = self.read_form_from(token)? {
                        if let Some(callback) = self.callback.as_mut() {
                            callback(&value)?;
                        }
                    }
                }
            }
        }
    }

    /// `#+expr obj` / `#-expr obj`. Both the feature expression and the
    /// guarded object are always consumed; the object is kept only when
    /// the test matches the polarity.
    fn read_conditional(&mut self, polarity: bool) -> Result<Option<Value>, Error> {
        let feature_expr = self.read_required()?;
        let object = self.read_required()?;
        if self.eval_feature(&feature_expr)? == polarity {
            Ok(Some(object))
        } else {
            Ok(None)
        }
    }

    fn eval_feature(&self, expr: &Value) -> Result<bool, Error> {
        match expr {
            Value::Variable(id) => Ok(self.features.contains(id)),
            Value::Cons(_) => {
                let items = crate::value::list_to_vec(expr).ok_or_else(|| {
                    Error::FormAnalyzer(
                        "a feature expression must be a proper list".to_string(),
                    )
                })?;
                let (head, rest) = match items.split_first() {
                    Some(split) => split,
                    None => {
                        return Err(Error::FormAnalyzer(
                            "empty feature expression".to_string(),
                        ));
                    }
                };
                let op = match head {
                    Value::Variable(id) => interner::var_name(*id),
                    other => {
                        return Err(Error::FormAnalyzer(format!(
                            "a feature operator must be a variable, not a {}",
                            other.type_name()
                        )));
                    }
                };
                match op.as_str() {
                    "not" => {
                        if rest.len() != 1 {
                            return Err(Error::FormAnalyzer(
                                "not takes exactly one feature expression"
                                    .to_string(),
                            ));
                        }
                        Ok(!self.eval_feature(&rest[0])?)
                    }
                    "and" => {
                        for sub in rest {
                            if !self.eval_feature(sub)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    "or" => {
                        for sub in rest {
                            if self.eval_feature(sub)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    other => Err(Error::FormAnalyzer(format!(
                        "unknown feature operator {}",
                        other
                    ))),
                }
            }
            other => Err(Error::FormAnalyzer(format!(
                "a feature expression must be a variable or a list, not a {}",
                other.type_name()
            ))),
        }
    }
}
