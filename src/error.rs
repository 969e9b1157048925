use std::fmt;

use crate::value::Namespace;

//===----------------------------------------------------------------------===//
// Error
//===----------------------------------------------------------------------===//

/// Every failure the core can produce, carried by kind name through the
/// response envelope. `_catch-errors` reports `kind_name()`; hosts must
/// never rely on type identity.
#[derive(Debug, Clone)]
pub enum Error {
    /// Hard lexical failure: invalid character, malformed XML markup,
    /// malformed proto-token.
    Tokenizer(String),
    /// The input ended inside a token. Distinguished from `Tokenizer` so
    /// that EVALUATE_FIRST_FORM can answer FOUND_NO_FORM for partial input
    /// instead of an error.
    TruncatedToken(String),
    Reader(ReaderError),
    Converter(String),
    FormAnalyzer(String),
    Evaluator(EvaluatorError),
    /// Raised by the `error` primitive from object-language code.
    Raised(String),
    /// Internal invariant violation.
    CannotHappen(String),
    /// The host set the abort byte. Bypasses `_catch-errors` handlers.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderError {
    UnexpectedDot,
    UnexpectedClosingParenthesis,
    UnexpectedXMLEndTag,
    UnexpectedEndOfInput,
}

#[derive(Debug, Clone)]
pub enum EvaluatorError {
    UnboundVariable { namespace: Namespace, name: String },
    TooFewArguments { expected: usize, got: usize },
    TooManyArguments { expected: usize, got: usize },
    MalformedSpreadableSequenceOfObjects,
    General(String),
}

impl Error {
    /// The name `_catch-errors` yields and the protocol reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Tokenizer(_) => "TokenizerError",
            Error::TruncatedToken(_) => "TruncatedToken",
            Error::Reader(_) => "ReaderError",
            Error::Converter(_) => "EVLToXMLConverterError",
            Error::FormAnalyzer(_) => "FormAnalyzerError",
            Error::Evaluator(_) => "EvaluatorError",
            Error::Raised(_) => "Error",
            Error::CannotHappen(_) => "CannotHappen",
            Error::Aborted => "Aborted",
        }
    }

    /// True when EVALUATE_FIRST_FORM should treat the failure as "no
    /// complete form yet" rather than a hard error.
    pub fn means_no_form_yet(&self) -> bool {
        matches!(
            self,
            Error::TruncatedToken(_)
                | Error::Reader(ReaderError::UnexpectedEndOfInput)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Tokenizer(msg) => write!(f, "TokenizerError: {}", msg),
            Error::TruncatedToken(msg) => write!(f, "TruncatedToken: {}", msg),
            Error::Reader(e) => write!(f, "ReaderError: {}", e),
            Error::Converter(msg) => {
                write!(f, "EVLToXMLConverterError: {}", msg)
            }
            Error::FormAnalyzer(msg) => write!(f, "FormAnalyzerError: {}", msg),
            Error::Evaluator(e) => write!(f, "EvaluatorError: {}", e),
            Error::Raised(msg) => write!(f, "Error: {}", msg),
            Error::CannotHappen(msg) => write!(f, "CannotHappen: {}", msg),
            Error::Aborted => write!(f, "Aborted"),
        }
    }
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReaderError::UnexpectedDot => write!(f, "unexpected dot"),
            ReaderError::UnexpectedClosingParenthesis => {
                write!(f, "unexpected closing parenthesis")
            }
            ReaderError::UnexpectedXMLEndTag => {
                write!(f, "unexpected XML end tag")
            }
            ReaderError::UnexpectedEndOfInput => {
                write!(f, "unexpected end of input")
            }
        }
    }
}

impl fmt::Display for EvaluatorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EvaluatorError::UnboundVariable { namespace, name } => {
                write!(f, "unbound variable {} in the {} namespace", name, namespace)
            }
            EvaluatorError::TooFewArguments { expected, got } => {
                write!(f, "too few arguments: expected {}, got {}", expected, got)
            }
            EvaluatorError::TooManyArguments { expected, got } => {
                write!(f, "too many arguments: expected {}, got {}", expected, got)
            }
            EvaluatorError::MalformedSpreadableSequenceOfObjects => {
                write!(f, "the spreadable sequence of objects is not a proper list")
            }
            EvaluatorError::General(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_protocol_vocabulary() {
        assert_eq!(Error::Tokenizer(String::new()).kind_name(), "TokenizerError");
        assert_eq!(
            Error::TruncatedToken(String::new()).kind_name(),
            "TruncatedToken"
        );
        assert_eq!(
            Error::Reader(ReaderError::UnexpectedDot).kind_name(),
            "ReaderError"
        );
        assert_eq!(Error::Raised("boom".into()).kind_name(), "Error");
        assert_eq!(Error::Aborted.kind_name(), "Aborted");
    }

    #[test]
    fn truncated_and_eof_count_as_no_form_yet() {
        assert!(Error::TruncatedToken(String::new()).means_no_form_yet());
        assert!(Error::Reader(ReaderError::UnexpectedEndOfInput).means_no_form_yet());
        assert!(!Error::Reader(ReaderError::UnexpectedDot).means_no_form_yet());
        assert!(!Error::Aborted.means_no_form_yet());
    }
}
