use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::analyzer::{LambdaSpec, SpecialForms};
use crate::env::{Frame, FrameId, Frames, Globals};
use crate::error::{Error, EvaluatorError};
use crate::interner::{self, VarId};
use crate::pairing;
use crate::value::{
    list_from_vec, list_to_vec, Closure, ClosureBody, Namespace, Primitive, Value,
    Values,
};

pub mod cps;
pub mod oocps;
pub mod plainrec;
pub mod prep;
pub mod sboocps;
pub mod trampoline;
pub mod trampolinepp;

//===----------------------------------------------------------------------===//
// Abort flag
//===----------------------------------------------------------------------===//

/// The single byte of shared storage the host may set at any time to
/// request cancellation. Every strategy polls it at each iteration of its
/// top-level driver loop; a set flag raises `Aborted`, which bypasses
/// `_catch-errors` handlers.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicU8>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(1, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

//===----------------------------------------------------------------------===//
// Strategy
//===----------------------------------------------------------------------===//

/// The six interchangeable control-representation strategies. All realize
/// the same reduction relation; one is selected per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PlainRec,
    Cps,
    OoCps,
    SbOoCps,
    Trampoline,
    TrampolinePp,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::PlainRec,
        Strategy::Cps,
        Strategy::OoCps,
        Strategy::SbOoCps,
        Strategy::Trampoline,
        Strategy::TrampolinePp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::PlainRec => "plainrec",
            Strategy::Cps => "cps",
            Strategy::OoCps => "oocps",
            Strategy::SbOoCps => "sboocps",
            Strategy::Trampoline => "trampoline",
            Strategy::TrampolinePp => "trampolinepp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Strategy::ALL.into_iter().find(|s| s.name() == name)
    }
}

//===----------------------------------------------------------------------===//
// Evaluator
//===----------------------------------------------------------------------===//

/// The evaluation machine: the frame arena, the global binding cells, the
/// interned special operators and the abort channel. The selected strategy
/// only decides how control is represented while this state is reduced.
#[derive(Debug)]
pub struct Evaluator {
    pub strategy: Strategy,
    pub frames: Frames,
    pub globals: Globals,
    pub ops: SpecialForms,
    pub abort: AbortFlag,
}

impl Evaluator {
    /// A fresh machine with the primitives installed in the function
    /// namespace and `*features*` holding the strategy's name.
    pub fn new(strategy: Strategy, abort: AbortFlag) -> Self {
        let mut evaluator = Self {
            strategy,
            frames: Frames::new(),
            globals: Globals::new(),
            ops: SpecialForms::new(),
            abort,
        };
        crate::primitives::install(&mut evaluator.globals);
        evaluator.globals.set(
            Namespace::Value,
            interner::intern_var("*features*"),
            list_from_vec(vec![Value::Variable(interner::intern_var(
                strategy.name(),
            ))]),
        );
        evaluator
    }

    /// Evaluates one form under the selected strategy.
    pub fn eval(&mut self, form: &Value) -> Result<Values, Error> {
        match self.strategy {
            Strategy::PlainRec => plainrec::eval_top(self, form),
            Strategy::Cps => cps::eval_top(self, form),
            Strategy::OoCps => oocps::eval_top(self, form),
            Strategy::SbOoCps => sboocps::eval_top(self, form),
            Strategy::Trampoline => trampoline::eval_top(self, form),
            Strategy::TrampolinePp => trampolinepp::eval_top(self, form),
        }
    }

    pub fn check_abort(&self) -> Result<(), Error> {
        if self.abort.is_requested() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    /// Allocates the frame that realizes one closure call, already paired.
    pub(crate) fn push_frame(
        &mut self,
        namespace: Namespace,
        vars: Vec<VarId>,
        slots: Vec<Value>,
        parent: Option<FrameId>,
    ) -> FrameId {
        self.frames.alloc(Frame { namespace, vars, slots, parent })
    }
}

//===----------------------------------------------------------------------===//
// Shared reduction helpers
//===----------------------------------------------------------------------===//

/// The four call-like operator shapes. They differ in how operand results
/// are collected and whether the final operand spreads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Call,
    Apply,
    MultipleValueCall,
    MultipleValueApply,
}

impl CallShape {
    pub fn spreads_last(self) -> bool {
        matches!(self, CallShape::Apply | CallShape::MultipleValueApply)
    }
}

/// Folds one evaluated operand into the collected argument vector
/// according to the call shape.
pub(crate) fn collect_operand(
    shape: CallShape,
    is_last: bool,
    collected: &mut Vec<Value>,
    result: &Values,
) {
    match shape {
        CallShape::Call | CallShape::Apply => collected.push(result.primary()),
        CallShape::MultipleValueCall => collected.extend(result.all()),
        CallShape::MultipleValueApply => {
            if is_last {
                collected.push(result.primary());
            } else {
                collected.extend(result.all());
            }
        }
    }
}

/// Splits off the spreadable final operand for the apply shapes.
pub(crate) fn split_spread(
    shape: CallShape,
    mut args: Vec<Value>,
) -> (Vec<Value>, Option<Value>) {
    if shape.spreads_last() {
        let spread = args.pop();
        (args, spread)
    } else {
        (args, None)
    }
}

/// Pairs evaluated arguments against a closure's parameters.
pub(crate) fn closure_slots(
    closure: &Closure,
    args: Vec<Value>,
    spread: Option<Value>,
) -> Result<Vec<Value>, Error> {
    match spread {
        None => pairing::pair_call(&closure.params, closure.rest, args),
        Some(spread) => {
            pairing::pair_apply(&closure.params, closure.rest, args, spread)
        }
    }
}

/// Flattens direct arguments plus an optional spreadable tail into the
/// argument slice a primitive receives.
pub(crate) fn primitive_args(
    args: Vec<Value>,
    spread: Option<Value>,
) -> Result<Vec<Value>, Error> {
    match spread {
        None => Ok(args),
        Some(spread) => {
            let tail = list_to_vec(&spread).ok_or(Error::Evaluator(
                EvaluatorError::MalformedSpreadableSequenceOfObjects,
            ))?;
            let mut all = args;
            all.extend(tail);
            Ok(all)
        }
    }
}

/// Checks arity and invokes a primitive function.
pub(crate) fn call_primitive(
    primitive: &Primitive,
    args: &[Value],
) -> Result<Values, Error> {
    if args.len() < primitive.min_args {
        return Err(Error::Evaluator(EvaluatorError::TooFewArguments {
            expected: primitive.min_args,
            got: args.len(),
        }));
    }
    if let Some(max) = primitive.max_args {
        if args.len() > max {
            return Err(Error::Evaluator(EvaluatorError::TooManyArguments {
                expected: max,
                got: args.len(),
            }));
        }
    }
    (primitive.func)(args)
}

/// The `if` test must be a boolean; anything else fails.
pub(crate) fn expect_boolean(value: &Value) -> Result<bool, Error> {
    match value {
        Value::Boolean(b) => Ok(*b),
        _ => Err(Error::Evaluator(EvaluatorError::General(
            "the test-form does not evaluate to a boolean".to_string(),
        ))),
    }
}

pub(crate) fn not_callable(value: &Value) -> Error {
    Error::Evaluator(EvaluatorError::General(format!(
        "a {} is not callable",
        value.type_name()
    )))
}

pub(crate) fn not_implemented(operator: &str, strategy: Strategy) -> Error {
    Error::Evaluator(EvaluatorError::General(format!(
        "{} is not implemented by the {} evaluator",
        operator,
        strategy.name()
    )))
}

pub(crate) fn macro_misuse() -> Error {
    Error::Evaluator(EvaluatorError::General(
        "a macro closure cannot be used as a function".to_string(),
    ))
}

pub(crate) fn improper_form() -> Error {
    Error::Evaluator(EvaluatorError::General(
        "a compound form must be a proper list".to_string(),
    ))
}

pub(crate) fn empty_list_form() -> Error {
    Error::Evaluator(EvaluatorError::General(
        "the empty list is not a form".to_string(),
    ))
}

/// Builds the closure a lambda special form denotes, capturing the current
/// lexical chain.
pub(crate) fn make_closure(spec: &LambdaSpec, env: Option<FrameId>) -> Value {
    Value::Closure(std::rc::Rc::new(Closure {
        scope: spec.scope,
        namespace: spec.namespace,
        is_macro: spec.is_macro,
        params: spec.params.clone(),
        rest: spec.rest,
        body: ClosureBody::Source(spec.body.clone()),
        env,
    }))
}

/// Destructures a compound form into head and argument forms, rejecting
/// improper lists.
pub(crate) fn split_form(form: &Value) -> Result<(Value, Vec<Value>), Error> {
    let mut items = list_to_vec(form).ok_or_else(improper_form)?;
    if items.is_empty() {
        return Err(Error::CannotHappen(
            "an empty list reached call analysis".to_string(),
        ));
    }
    let rest = items.split_off(1);
    let head = items.pop().ok_or_else(|| {
        Error::CannotHappen("split_form lost its head".to_string())
    })?;
    Ok((head, rest))
}

/// Source bodies of closures built by the five non-preprocessing
/// strategies.
pub(crate) fn source_body(closure: &Closure) -> Result<&[Value], Error> {
    match &closure.body {
        ClosureBody::Source(forms) => Ok(forms),
        ClosureBody::Compiled(_) => Err(Error::CannotHappen(
            "a preprocessed closure reached a source-level evaluator".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(Strategy::from_name(strategy.name()), Some(strategy));
        }
        assert_eq!(Strategy::from_name("bogus"), None);
    }

    #[test]
    fn abort_flag_is_shared() {
        let flag = AbortFlag::new();
        let other = flag.clone();
        assert!(!flag.is_requested());
        other.request();
        assert!(flag.is_requested());
        flag.clear();
        assert!(!other.is_requested());
    }

    #[test]
    fn new_evaluator_announces_its_strategy_as_a_feature() {
        let ev = Evaluator::new(Strategy::Trampoline, AbortFlag::new());
        let features = ev.globals.feature_list();
        assert_eq!(features, vec![interner::intern_var("trampoline")]);
    }

    #[test]
    fn boolean_test_is_strict() {
        assert!(expect_boolean(&Value::Boolean(true)).unwrap());
        assert!(!expect_boolean(&Value::Boolean(false)).unwrap());
        assert!(expect_boolean(&Value::Number(0.0)).is_err());
        assert!(expect_boolean(&Value::Void).is_err());
    }
}
