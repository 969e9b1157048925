use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::error::Error;
use crate::eval::{AbortFlag, Evaluator, Strategy};
use crate::reader::Reader;
use crate::value::{Value, Values};
use crate::xmlconv;

//===----------------------------------------------------------------------===//
// Protocol
//===----------------------------------------------------------------------===//

/// One host request. The channel carries a single outstanding request at
/// a time; transport is the host's concern.
#[derive(Debug)]
pub struct Request {
    pub id: u64,
    pub action: Action,
}

#[derive(Debug)]
pub enum Action {
    Initialize {
        abort: AbortFlag,
        strategy: Strategy,
        files: Vec<String>,
    },
    EvaluateFirstForm { source: String },
    EvaluateAllForms { source: String },
    ConvertEvlToXml { source: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    FoundNoForm,
    Error,
    Aborted,
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Stringified values of the last evaluation.
    Values(Vec<String>),
    /// An XML rendering or an error message.
    Text(String),
}

#[derive(Debug)]
pub struct Response {
    pub id: u64,
    pub status: Status,
    pub output: Option<Output>,
}

//===----------------------------------------------------------------------===//
// Session
//===----------------------------------------------------------------------===//

/// The core's host-facing surface. Owns the evaluator between requests;
/// INITIALIZE tears the previous one down (arena, global cells and
/// interned names included) and builds a fresh one.
#[derive(Debug, Default)]
pub struct Session {
    evaluator: Option<Evaluator>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.evaluator.is_some()
    }

    /// Tears down the session, answering the given request id with
    /// TERMINATED. Hosts use this when a queued job must be cut loose
    /// before re-initialization.
    pub fn terminate(&mut self, id: u64) -> Response {
        self.evaluator = None;
        Response { id, status: Status::Terminated, output: None }
    }

    pub fn handle(&mut self, request: Request) -> Response {
        let id = request.id;
        debug!("request {}: {:?}", id, action_name(&request.action));
        let result = match request.action {
            Action::Initialize { abort, strategy, files } => {
                self.initialize(abort, strategy, &files)
            }
            Action::EvaluateFirstForm { source } => {
                self.evaluate_first_form(&source)
            }
            Action::EvaluateAllForms { source } => {
                self.evaluate_all_forms(&source)
            }
            Action::ConvertEvlToXml { source } => {
                xmlconv::convert(&source).map(|xml| Outcome::Xml(xml))
            }
        };
        let response = match result {
            Ok(Outcome::Last(values)) => Response {
                id,
                status: Status::Success,
                output: Some(Output::Values(values)),
            },
            Ok(Outcome::Xml(xml)) => Response {
                id,
                status: Status::Success,
                output: Some(Output::Text(xml)),
            },
            Ok(Outcome::NoForm) => {
                Response { id, status: Status::FoundNoForm, output: None }
            }
            Err(Error::Aborted) => {
                Response { id, status: Status::Aborted, output: None }
            }
            Err(error) => Response {
                id,
                status: Status::Error,
                output: Some(Output::Text(error.to_string())),
            },
        };
        debug!("request {}: {:?}", id, response.status);
        response
    }

    fn initialize(
        &mut self,
        abort: AbortFlag,
        strategy: Strategy,
        files: &[String],
    ) -> Result<Outcome, Error> {
        if self.evaluator.take().is_some() {
            trace!("discarding the previous evaluator");
        }
        let mut evaluator = Evaluator::new(strategy, abort);
        let mut last = Vec::new();
        for file in files {
            last = eval_source(&mut evaluator, file)?;
        }
        self.evaluator = Some(evaluator);
        Ok(Outcome::Last(last))
    }

    fn evaluate_all_forms(&mut self, source: &str) -> Result<Outcome, Error> {
        let evaluator = self.evaluator.as_mut().ok_or_else(uninitialized)?;
        eval_source(evaluator, source).map(Outcome::Last)
    }

    fn evaluate_first_form(&mut self, source: &str) -> Result<Outcome, Error> {
        let evaluator = self.evaluator.as_mut().ok_or_else(uninitialized)?;

        let embedded: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = embedded.clone();
        let mut callback = move |object: &Value| -> Result<(), Error> {
            sink.borrow_mut().push(object.clone());
            Ok(())
        };
        let mut reader = Reader::new(source)
            .with_features(evaluator.globals.feature_list())
            .with_callback(&mut callback);

        let form = match reader.read() {
            Ok(form) => form,
            Err(error) if error.means_no_form_yet() => {
                return Ok(Outcome::NoForm);
            }
            Err(error) => return Err(error),
        };
        let mut last = eval_embedded(evaluator, &embedded)?;
        match form {
            Some(form) => Ok(Outcome::Last(stringify(evaluator.eval(&form)?))),
            None if last.is_some() => Ok(Outcome::Last(last.take().unwrap_or_default())),
            None => Ok(Outcome::NoForm),
        }
    }
}

enum Outcome {
    Last(Vec<String>),
    Xml(String),
    NoForm,
}

fn uninitialized() -> Error {
    Error::Evaluator(crate::error::EvaluatorError::General(
        "the session is not initialized".to_string(),
    ))
}

fn action_name(action: &Action) -> &'static str {
    match action {
        Action::Initialize { .. } => "INITIALIZE",
        Action::EvaluateFirstForm { .. } => "EVALUATE_FIRST_FORM",
        Action::EvaluateAllForms { .. } => "EVALUATE_ALL_FORMS",
        Action::ConvertEvlToXml { .. } => "CONVERT_EVL_TO_XML",
    }
}

fn stringify(values: Values) -> Vec<String> {
    values.all().iter().map(ToString::to_string).collect()
}

/// Evaluates objects the reader delivered from inside XML elements, in
/// source order, before the form that follows them.
fn eval_embedded(
    evaluator: &mut Evaluator,
    embedded: &Rc<RefCell<Vec<Value>>>,
) -> Result<Option<Vec<String>>, Error> {
    let queued: Vec<Value> = embedded.borrow_mut().drain(..).collect();
    let mut last = None;
    for object in queued {
        last = Some(stringify(evaluator.eval(&object)?));
    }
    Ok(last)
}

/// Reads and evaluates every form of a source text, returning the
/// stringified values of the last evaluation.
fn eval_source(
    evaluator: &mut Evaluator,
    source: &str,
) -> Result<Vec<String>, Error> {
    let embedded: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = embedded.clone();
    let mut callback = move |object: &Value| {
        sink.borrow_mut().push(object.clone());
        Ok(())
    };
    let mut reader = Reader::new(source).with_callback(&mut callback);

    let mut last = Vec::new();
    loop {
        reader.set_features(evaluator.globals.feature_list());
        let form = reader.read()?;
        if let Some(values) = eval_embedded(evaluator, &embedded)? {
            last = values;
        }
        match form {
            Some(form) => last = stringify(evaluator.eval(&form)?),
            None => return Ok(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(session: &mut Session, strategy: Strategy) -> Response {
        session.handle(Request {
            id: 0,
            action: Action::Initialize {
                abort: AbortFlag::new(),
                strategy,
                files: Vec::new(),
            },
        })
    }

    fn eval_all(session: &mut Session, id: u64, source: &str) -> Response {
        session.handle(Request {
            id,
            action: Action::EvaluateAllForms { source: source.to_string() },
        })
    }

    #[test]
    fn initialize_then_evaluate() {
        let mut session = Session::new();
        let response = init(&mut session, Strategy::TrampolinePp);
        assert_eq!(response.status, Status::Success);

        let response = eval_all(&mut session, 1, "(_+ 1 2)");
        assert_eq!(response.status, Status::Success);
        assert_eq!(
            response.output,
            Some(Output::Values(vec!["3".to_string()]))
        );
    }

    #[test]
    fn uninitialized_session_reports_an_error() {
        let mut session = Session::new();
        let response = eval_all(&mut session, 1, "1");
        assert_eq!(response.status, Status::Error);
    }

    #[test]
    fn first_form_reports_found_no_form_for_partial_input() {
        let mut session = Session::new();
        init(&mut session, Strategy::PlainRec);
        for source in ["", "   ", "( 1 2", "\"unterminated", "'"] {
            let response = session.handle(Request {
                id: 2,
                action: Action::EvaluateFirstForm { source: source.to_string() },
            });
            assert_eq!(
                response.status,
                Status::FoundNoForm,
                "source {:?}",
                source
            );
        }
    }

    #[test]
    fn initialize_loads_files_in_order() {
        let mut session = Session::new();
        let response = session.handle(Request {
            id: 0,
            action: Action::Initialize {
                abort: AbortFlag::new(),
                strategy: Strategy::Trampoline,
                files: vec![
                    "(vset! counter 1)".to_string(),
                    "(vset! counter (_+ (vref counter) 10)) (vref counter)"
                        .to_string(),
                ],
            },
        });
        assert_eq!(response.status, Status::Success);
        assert_eq!(
            response.output,
            Some(Output::Values(vec!["11".to_string()]))
        );
    }

    #[test]
    fn features_reflect_the_selected_strategy() {
        let mut session = Session::new();
        init(&mut session, Strategy::Cps);
        let response = eval_all(&mut session, 3, "#+cps 1");
        assert_eq!(
            response.output,
            Some(Output::Values(vec!["1".to_string()]))
        );
        let response = eval_all(&mut session, 4, "#+plainrec 1");
        assert_eq!(response.output, Some(Output::Values(vec![])));
    }

    #[test]
    fn embedded_objects_are_evaluated_in_order() {
        let mut session = Session::new();
        init(&mut session, Strategy::SbOoCps);
        let response = eval_all(
            &mut session,
            4,
            "(vset! x 1) <chapter>(vset! x (_+ (vref x) 1))</chapter> (vref x)",
        );
        assert_eq!(
            response.output,
            Some(Output::Values(vec!["2".to_string()]))
        );
    }

    #[test]
    fn conversion_round_trips_through_the_protocol() {
        let mut session = Session::new();
        let response = session.handle(Request {
            id: 5,
            action: Action::ConvertEvlToXml { source: "(x)".to_string() },
        });
        assert_eq!(response.status, Status::Success);
        assert_eq!(response.output, Some(Output::Text("(x)".to_string())));
    }

    #[test]
    fn terminate_reports_terminated() {
        let mut session = Session::new();
        init(&mut session, Strategy::OoCps);
        assert!(session.is_initialized());
        let response = session.terminate(9);
        assert_eq!(response.status, Status::Terminated);
        assert!(!session.is_initialized());
    }
}
