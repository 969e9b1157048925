//! End-to-end scenarios over the host ↔ core request surface.

use std::thread;
use std::time::Duration;

use evl::eval::{AbortFlag, Strategy};
use evl::session::{Action, Output, Request, Response, Session, Status};

fn init_with(
    session: &mut Session,
    strategy: Strategy,
    abort: AbortFlag,
    files: Vec<String>,
) -> Response {
    session.handle(Request {
        id: 0,
        action: Action::Initialize { abort, strategy, files },
    })
}

fn init(session: &mut Session, strategy: Strategy) -> Response {
    init_with(session, strategy, AbortFlag::new(), Vec::new())
}

fn eval_all(session: &mut Session, source: &str) -> Response {
    session.handle(Request {
        id: 1,
        action: Action::EvaluateAllForms { source: source.to_string() },
    })
}

fn values_of(response: &Response) -> Vec<String> {
    match &response.output {
        Some(Output::Values(values)) => values.clone(),
        other => panic!("expected values, got {:?}", other),
    }
}

const ALIAS_PRELUDE: &str = "(fset! + (fref _+))";

#[test]
fn addition_through_an_alias() {
    for strategy in Strategy::ALL {
        let mut session = Session::new();
        init_with(
            &mut session,
            strategy,
            AbortFlag::new(),
            vec![ALIAS_PRELUDE.to_string()],
        );
        let response = eval_all(&mut session, "(+ 1 2)");
        assert_eq!(response.status, Status::Success, "{}", strategy.name());
        assert_eq!(values_of(&response), vec!["3"], "{}", strategy.name());
    }
}

#[test]
fn if_picks_branches_and_rejects_non_booleans() {
    let mut session = Session::new();
    init(&mut session, Strategy::TrampolinePp);

    let response = eval_all(&mut session, "(if #t (quote a) (quote b))");
    assert_eq!(response.status, Status::Success);
    assert_eq!(values_of(&response), vec!["a"]);

    let response = eval_all(&mut session, "(if 0 (quote a) (quote b))");
    assert_eq!(response.status, Status::Error);
    match response.output {
        Some(Output::Text(message)) => {
            assert!(message.contains("EvaluatorError"), "{}", message);
            assert!(message.contains("boolean"), "{}", message);
        }
        other => panic!("expected an error message, got {:?}", other),
    }
}

#[test]
fn catch_errors_reports_the_kind_name() {
    let mut session = Session::new();
    init(&mut session, Strategy::Trampoline);
    let response = eval_all(&mut session, "(_catch-errors (error \"oops\"))");
    assert_eq!(response.status, Status::Success);
    assert_eq!(values_of(&response), vec!["\"Error\""]);
}

#[test]
fn preprocessing_trampoline_counts_down_from_one_hundred_thousand() {
    let mut session = Session::new();
    init(&mut session, Strategy::TrampolinePp);
    let response = eval_all(
        &mut session,
        "(fset! countdown (_vlambda (n) (if (_= n 0) (quote done) (countdown (_- n 1)))))
         (countdown 100000)",
    );
    assert_eq!(response.status, Status::Success);
    assert_eq!(values_of(&response), vec!["done"]);
}

#[test]
fn first_form_on_unclosed_input_finds_no_form() {
    let mut session = Session::new();
    init(&mut session, Strategy::PlainRec);
    let response = session.handle(Request {
        id: 2,
        action: Action::EvaluateFirstForm { source: "( 1 2".to_string() },
    });
    assert_eq!(response.status, Status::FoundNoForm);
    assert!(response.output.is_none());
}

#[test]
fn first_form_evaluates_only_the_first() {
    let mut session = Session::new();
    init(&mut session, Strategy::OoCps);
    let response = session.handle(Request {
        id: 3,
        action: Action::EvaluateFirstForm {
            source: "(_+ 1 2) (error \"never reached\")".to_string(),
        },
    });
    assert_eq!(response.status, Status::Success);
    assert_eq!(values_of(&response), vec!["3"]);
}

#[test]
fn multiple_values_stringify_one_per_value() {
    let mut session = Session::new();
    init(&mut session, Strategy::SbOoCps);
    let response = eval_all(&mut session, "(values 1 (quote two) \"three\")");
    assert_eq!(response.status, Status::Success);
    assert_eq!(values_of(&response), vec!["1", "two", "\"three\""]);
}

#[test]
fn conversion_wraps_code_inside_xml() {
    let mut session = Session::new();
    let response = session.handle(Request {
        id: 4,
        action: Action::ConvertEvlToXml {
            source: "<chapter><title>T</title><para>p</para>(foo)</chapter>"
                .to_string(),
        },
    });
    assert_eq!(response.status, Status::Success);
    assert_eq!(
        response.output,
        Some(Output::Text(
            "<chapter><title>T</title><para>p</para><toplevelcode><blockcode>\
             (foo)</blockcode></toplevelcode></chapter>"
                .to_string()
        ))
    );
}

#[test]
fn errors_surface_their_kind_through_the_envelope() {
    let mut session = Session::new();
    init(&mut session, Strategy::Cps);
    for (source, kind) in [
        ("(", "ReaderError"),         // EVALUATE_ALL_FORMS has no FOUND_NO_FORM
        (")", "ReaderError"),
        ("(vref 1)", "FormAnalyzerError"),
        ("<1bad>", "TokenizerError"),
        ("unbound-protocol-var", "EvaluatorError"),
        ("(error \"user\")", "Error"),
    ] {
        let response = eval_all(&mut session, source);
        assert_eq!(response.status, Status::Error, "source {:?}", source);
        match &response.output {
            Some(Output::Text(message)) => {
                assert!(
                    message.starts_with(kind),
                    "source {:?}: {}",
                    source,
                    message
                );
            }
            other => panic!("source {:?}: unexpected {:?}", source, other),
        }
    }
}

//===----------------------------------------------------------------------===//
// Abort
//===----------------------------------------------------------------------===//

/// A diverging tail loop under the trampoline, cancelled from another
/// thread through the shared abort byte. The handler in between must not
/// catch the abort.
#[test]
fn setting_the_abort_byte_ends_a_diverging_evaluation() {
    let abort = AbortFlag::new();
    let flag = abort.clone();

    let worker = thread::spawn(move || {
        let mut session = Session::new();
        init_with(&mut session, Strategy::Trampoline, abort, Vec::new());
        eval_all(
            &mut session,
            "(fset! spin (_vlambda () (spin)))
             (_catch-errors (spin))",
        )
    });

    thread::sleep(Duration::from_millis(100));
    flag.request();

    let response = worker.join().expect("the evaluating thread panicked");
    assert_eq!(response.status, Status::Aborted);
    assert!(response.output.is_none());
}

#[test]
fn an_aborted_initialize_reports_aborted() {
    let abort = AbortFlag::new();
    abort.request();
    let mut session = Session::new();
    let response = init_with(
        &mut session,
        Strategy::TrampolinePp,
        abort,
        vec!["(_+ 1 2)".to_string()],
    );
    assert_eq!(response.status, Status::Aborted);
    assert!(!session.is_initialized());
}
