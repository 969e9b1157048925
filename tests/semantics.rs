//! The shared semantic corpus: every snippet here must reduce to the
//! same primary value under any of the six evaluator strategies.

use evl::error::{Error, EvaluatorError};
use evl::eval::{AbortFlag, Evaluator, Strategy};
use evl::reader::Reader;
use evl::value::Values;

fn eval_all(evaluator: &mut Evaluator, source: &str) -> Result<Values, Error> {
    let mut reader =
        Reader::new(source).with_features(evaluator.globals.feature_list());
    let mut last = Values::void();
    loop {
        reader.set_features(evaluator.globals.feature_list());
        match reader.read()? {
            Some(form) => last = evaluator.eval(&form)?,
            None => return Ok(last),
        }
    }
}

fn run(strategy: Strategy, source: &str) -> Result<Values, Error> {
    let mut evaluator = Evaluator::new(strategy, AbortFlag::new());
    eval_all(&mut evaluator, source)
}

fn result(strategy: Strategy, source: &str) -> String {
    match run(strategy, source) {
        Ok(values) => values.primary().to_string(),
        Err(error) => panic!(
            "{} failed to evaluate {:?}: {}",
            strategy.name(),
            source,
            error
        ),
    }
}

/// Asserts that all six strategies agree on the snippet's primary value.
fn assert_everywhere(source: &str, expected: &str) {
    for strategy in Strategy::ALL {
        assert_eq!(
            result(strategy, source),
            expected,
            "strategy {} on {:?}",
            strategy.name(),
            source
        );
    }
}

fn assert_error_everywhere(source: &str, kind: &str) {
    for strategy in Strategy::ALL {
        match run(strategy, source) {
            Err(error) => assert_eq!(
                error.kind_name(),
                kind,
                "strategy {} on {:?}",
                strategy.name(),
                source
            ),
            Ok(values) => panic!(
                "{} evaluated {:?} to {} instead of failing",
                strategy.name(),
                source,
                values.primary()
            ),
        }
    }
}

//===----------------------------------------------------------------------===//
// Self-evaluation, variables, quote, progn, if
//===----------------------------------------------------------------------===//

#[test]
fn literals_evaluate_to_themselves() {
    assert_everywhere("42", "42");
    assert_everywhere("#t", "#t");
    assert_everywhere("#v", "#v");
    assert_everywhere("\"hi\"", "\"hi\"");
    assert_everywhere(":k", ":k");
    assert_everywhere("#(1 2)", "#(1 2)");
    assert_everywhere("(quote (a . b))", "(a . b)");
}

#[test]
fn empty_list_is_not_a_form() {
    assert_error_everywhere("()", "EvaluatorError");
}

#[test]
fn unbound_variable_signals() {
    assert_error_everywhere("completely-unheard-of", "EvaluatorError");
}

#[test]
fn progn_returns_last_and_orders_effects() {
    assert_everywhere("(progn 1 2 3)", "3");
    assert_everywhere("(progn)", "#v");
    assert_everywhere("(progn (vset! ord-x 1) (vset! ord-x 2) ord-x)", "2");
}

#[test]
fn if_is_strict_about_booleans() {
    assert_everywhere("(if #t (quote a) (quote b))", "a");
    assert_everywhere("(if #f (quote a) (quote b))", "b");
    assert_error_everywhere("(if 0 (quote a) (quote b))", "EvaluatorError");
}

//===----------------------------------------------------------------------===//
// Functions and closures
//===----------------------------------------------------------------------===//

#[test]
fn function_calls_go_through_the_function_namespace() {
    assert_everywhere("(fset! sem-add3 (_vlambda (x) (_+ x 3))) (sem-add3 4)", "7");
}

#[test]
fn value_and_function_cells_are_independent() {
    assert_everywhere(
        "(vset! sem-dual 1) (fset! sem-dual (_vlambda () 2)) (_+ sem-dual (sem-dual))",
        "3",
    );
}

#[test]
fn head_expressions_are_evaluated() {
    assert_everywhere("((_vlambda (x) (_* x x)) 5)", "25");
    assert_everywhere("(vset! sem-sq (_vlambda (x) (_* x x))) ((vref sem-sq) 6)", "36");
}

#[test]
fn rest_parameters_collect_the_remainder() {
    assert_everywhere(
        "(fset! sem-rest (_vlambda (a . r) r)) (sem-rest 1 2 3)",
        "(2 3)",
    );
    assert_everywhere("(fset! sem-all (_vlambda xs xs)) (sem-all 1 2)", "(1 2)");
    assert_everywhere("(fset! sem-all2 (_vlambda xs xs)) (sem-all2)", "()");
}

#[test]
fn arity_mismatches_signal() {
    assert_error_everywhere(
        "(fset! sem-two (_vlambda (a b) a)) (sem-two 1)",
        "EvaluatorError",
    );
    assert_error_everywhere(
        "(fset! sem-two2 (_vlambda (a b) a)) (sem-two2 1 2 3)",
        "EvaluatorError",
    );
}

#[test]
fn closures_capture_their_creation_site() {
    let source = "
        (fset! make-counter (_vlambda ()
          ((_vlambda (n)
             (_vlambda () (vset! n (_+ n 1)) n))
           0)))
        (vset! sem-c (make-counter))
        (_+ ((vref sem-c)) ((vref sem-c)))
    ";
    assert_everywhere(source, "3");
}

#[test]
fn inner_bindings_shadow_outer_ones() {
    assert_everywhere(
        "(fset! sem-sh (_vlambda (x) ((_vlambda (x) (_+ x 1)) (_+ x 10)))) (sem-sh 1)",
        "12",
    );
}

#[test]
fn flambda_binds_in_the_function_namespace() {
    assert_everywhere("((_flambda (g) (g 3)) (_vlambda (y) (_* y y)))", "9");
}

#[test]
fn operand_evaluation_is_left_to_right() {
    let source = "
        (vset! sem-log ())
        (fset! sem-note (_vlambda (tag) (vset! sem-log (cons tag sem-log)) tag))
        (_+ (sem-note 1) (sem-note 2) (sem-note 3))
        sem-log
    ";
    assert_everywhere(source, "(3 2 1)");
}

//===----------------------------------------------------------------------===//
// Dynamic scope
//===----------------------------------------------------------------------===//

#[test]
fn dynamic_bindings_extend_for_the_call_only() {
    let source = "
        (fset! sem-get-d (_vlambda () (dref sem-d)))
        (fset! sem-with-d (_dlambda (sem-d) (sem-get-d)))
        (sem-with-d 42)
    ";
    assert_everywhere(source, "42");
}

#[test]
fn dynamic_bindings_nest_and_shadow() {
    let source = "
        (fset! sem-read (_vlambda () (dref sem-dyn)))
        (fset! sem-inner (_dlambda (sem-dyn) (sem-read)))
        (fset! sem-outer (_dlambda (sem-dyn) (cons (sem-inner 2) (sem-read))))
        (sem-outer 1)
    ";
    assert_everywhere(source, "(2 . 1)");
}

#[test]
fn dset_updates_the_innermost_dynamic_binding() {
    let source = "
        (fset! sem-bump (_vlambda () (dset! sem-dv (_+ (dref sem-dv) 1)) (dref sem-dv)))
        (fset! sem-in-d (_dlambda (sem-dv) (sem-bump)))
        (sem-in-d 10)
    ";
    assert_everywhere(source, "11");
}

#[test]
fn dref_falls_through_to_the_global_cell() {
    assert_everywhere("(vset! sem-gd 7) (dref sem-gd)", "7");
    assert_error_everywhere("(dref sem-never-bound)", "EvaluatorError");
}

//===----------------------------------------------------------------------===//
// apply and multiple values
//===----------------------------------------------------------------------===//

#[test]
fn apply_spreads_its_final_operand() {
    assert_everywhere("(apply _+ (list 1 2 3))", "6");
    assert_everywhere("(apply _+ 1 2 (list 3 4))", "10");
    assert_everywhere(
        "(fset! sem-ap (_vlambda (a . r) (cons a r))) (apply sem-ap 1 (list 2 3))",
        "(1 2 3)",
    );
}

#[test]
fn apply_rejects_non_list_tails() {
    assert_error_everywhere("(apply _+ 5)", "EvaluatorError");
    assert_error_everywhere("(apply _+ (cons 1 2))", "EvaluatorError");
}

#[test]
fn multiple_values_project_in_single_value_contexts() {
    assert_everywhere("(_+ (values 1 2) 10)", "11");
    assert_everywhere("(values)", "#v");
    assert_everywhere("(values 7 8)", "7");
}

#[test]
fn multiple_value_call_appends_all_values() {
    assert_everywhere("(multiple-value-call list (values 1 2) 3 (values))", "(1 2 3)");
    assert_everywhere("(multiple-value-call _+ (values 1 2) (values 3))", "6");
}

#[test]
fn multiple_value_apply_combines_both() {
    assert_everywhere("(multiple-value-apply _+ (values 1 2) (list 3 4))", "10");
}

//===----------------------------------------------------------------------===//
// Error handling
//===----------------------------------------------------------------------===//

#[test]
fn catch_errors_returns_void_on_success() {
    assert_everywhere("(_catch-errors 42)", "#v");
}

#[test]
fn catch_errors_names_the_error_kind() {
    assert_everywhere("(_catch-errors (error \"oops\"))", "\"Error\"");
    assert_everywhere("(_catch-errors sem-unbound-here)", "\"EvaluatorError\"");
    assert_everywhere("(_catch-errors (if 1 2 3))", "\"EvaluatorError\"");
}

#[test]
fn catch_errors_nests() {
    assert_everywhere(
        "(_catch-errors (_catch-errors (error \"inner\")))",
        "#v",
    );
    assert_everywhere(
        "(cons (_catch-errors (error \"a\")) (_catch-errors 1))",
        "(\"Error\" . #v)",
    );
}

#[test]
fn evaluation_continues_after_a_caught_error() {
    assert_everywhere(
        "(vset! sem-ce 0) (_catch-errors (progn (vset! sem-ce 1) (error \"x\") (vset! sem-ce 2))) sem-ce",
        "1",
    );
}

//===----------------------------------------------------------------------===//
// Macros
//===----------------------------------------------------------------------===//

#[test]
fn macro_operands_arrive_unevaluated() {
    let source = "
        (vset! sem-mn 0)
        (fset! sem-twice (_mlambda (x) (list (quote progn) x x)))
        (sem-twice (vset! sem-mn (_+ sem-mn 1)))
        sem-mn
    ";
    assert_everywhere(source, "2");
}

#[test]
fn macro_expansion_sees_the_caller_environment() {
    let source = "
        (fset! sem-getx (_mlambda () (string->variable \"sem-mx\")))
        (fset! sem-user (_vlambda (sem-mx) (_+ (sem-getx) 1)))
        (sem-user 41)
    ";
    assert_everywhere(source, "42");
}

#[test]
fn scope_local_macros_expand() {
    assert_everywhere(
        "((_flambda (m) (m 5)) (_mlambda (x) (list (quote _+) x 1)))",
        "6",
    );
}

//===----------------------------------------------------------------------===//
// _for-each: three strategies implement it, three signal
//===----------------------------------------------------------------------===//

#[test]
fn for_each_iterates_in_order_where_implemented() {
    let source = "
        (vset! sem-acc ())
        (_for-each (_vlambda (x) (vset! sem-acc (cons x sem-acc))) (list 1 2 3))
        sem-acc
    ";
    for strategy in [Strategy::Cps, Strategy::OoCps, Strategy::SbOoCps] {
        assert_eq!(result(strategy, source), "(3 2 1)", "{}", strategy.name());
    }
}

#[test]
fn for_each_returns_void_where_implemented() {
    let source = "(_for-each (_vlambda (x) x) (list 1))";
    for strategy in [Strategy::Cps, Strategy::OoCps, Strategy::SbOoCps] {
        assert_eq!(result(strategy, source), "#v", "{}", strategy.name());
    }
}

#[test]
fn for_each_signals_where_not_implemented() {
    let source = "(_for-each (_vlambda (x) x) (list 1))";
    for strategy in
        [Strategy::PlainRec, Strategy::Trampoline, Strategy::TrampolinePp]
    {
        match run(strategy, source) {
            Err(Error::Evaluator(EvaluatorError::General(message))) => {
                assert!(
                    message.contains("not implemented"),
                    "{}: {}",
                    strategy.name(),
                    message
                );
            }
            other => panic!("{}: unexpected {:?}", strategy.name(), other),
        }
    }
}

//===----------------------------------------------------------------------===//
// Identity and interning
//===----------------------------------------------------------------------===//

#[test]
fn reading_the_same_spelling_yields_the_same_variable() {
    assert_everywhere("(eq? (quote sem-foo) (quote sem-foo))", "#t");
    assert_everywhere("(eq? (string->variable \"sem-zig\") (quote sem-zig))", "#t");
    assert_everywhere("(eq? (quote sem-a) (quote sem-b))", "#f");
}

#[test]
fn eql_compares_scalars_by_content() {
    assert_everywhere("(eql? 1.5 1.5)", "#t");
    assert_everywhere("(eql? \"ab\" \"ab\")", "#t");
    assert_everywhere("(eq? (cons 1 2) (cons 1 2))", "#f");
    assert_everywhere(
        "(vset! sem-pair (cons 1 2)) (eq? sem-pair sem-pair)",
        "#t",
    );
}

//===----------------------------------------------------------------------===//
// Mutation
//===----------------------------------------------------------------------===//

#[test]
fn cons_and_vector_mutation_is_shared() {
    assert_everywhere(
        "(vset! sem-p (cons 1 2)) (set-car! sem-p 9) sem-p",
        "(9 . 2)",
    );
    assert_everywhere(
        "(vset! sem-v (vector 1 2 3)) (vector-set! sem-v 1 9) sem-v",
        "#(1 9 3)",
    );
}

#[test]
fn captured_frame_slots_stay_shared_with_closures() {
    let source = "
        ((_vlambda (n)
           (fset! sem-show (_vlambda () n))
           (vset! n 99)
           (sem-show))
         1)
    ";
    assert_everywhere(source, "99");
}

//===----------------------------------------------------------------------===//
// Improper forms
//===----------------------------------------------------------------------===//

#[test]
fn improper_call_forms_signal() {
    assert_error_everywhere("(_+ 1 . 2)", "EvaluatorError");
}

//===----------------------------------------------------------------------===//
// Tail safety
//===----------------------------------------------------------------------===//

const TEST_LOOP: &str =
    "(fset! test-loop (_vlambda (n) (if (_= n 0) #v (test-loop (_- n 1)))))";

#[test]
fn trampolines_survive_a_million_tail_calls() {
    for strategy in [Strategy::Trampoline, Strategy::TrampolinePp] {
        let source = format!("{} (test-loop 1000000)", TEST_LOOP);
        assert_eq!(result(strategy, &source), "#v", "{}", strategy.name());
    }
}

#[test]
fn recursive_strategies_handle_moderate_depth() {
    // The recursive family is allowed to consume host stack; it only has
    // to manage depths an exercise would use.
    for strategy in [Strategy::PlainRec, Strategy::Cps, Strategy::OoCps, Strategy::SbOoCps]
    {
        let source = format!("{} (test-loop 100)", TEST_LOOP);
        assert_eq!(result(strategy, &source), "#v", "{}", strategy.name());
    }
}

//===----------------------------------------------------------------------===//
// Read-time conditionals see the strategy feature
//===----------------------------------------------------------------------===//

#[test]
fn the_selected_strategy_is_a_feature() {
    for strategy in Strategy::ALL {
        let source = format!("#+{} 1", strategy.name());
        assert_eq!(result(strategy, &source), "1", "{}", strategy.name());

        // The guarded object is consumed but dropped: nothing evaluates.
        let source = format!("#-{} 1", strategy.name());
        assert_eq!(result(strategy, &source), "#v", "{}", strategy.name());
    }
}
