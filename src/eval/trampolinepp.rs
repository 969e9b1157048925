//! Strategy 6: trampoline over preprocessed nodes.
//!
//! The same driver-loop shape as `trampoline`, but bounces carry nodes
//! produced by the preprocessing layer instead of source forms: operator
//! dispatch happened once, lexical references are (depth, index)
//! addresses, and macros are already expanded.

use std::rc::Rc;

use crate::env::{unbound, FrameId};
use crate::error::Error;
use crate::interner::VarId;
use crate::value::{Namespace, Scope, Value, Values};

use super::prep::{self, Prep, PrepBody};
use super::{
    call_primitive, closure_slots, collect_operand, expect_boolean,
    not_callable, not_implemented, primitive_args, split_spread, CallShape,
    Evaluator,
};

enum Step {
    Value(Values),
    Bounce { prep: Rc<Prep>, env: Option<FrameId> },
}

enum Flow {
    Step(Step),
    Done(Values),
}

#[derive(Debug)]
enum StackElem {
    Cont(Cont),
    DynFrame(FrameId),
    Handler,
}

#[derive(Debug)]
enum Cont {
    Sequence { body: Rc<PrepBody>, next: usize, env: Option<FrameId> },
    Branch { then: Rc<Prep>, els: Rc<Prep>, env: Option<FrameId> },
    StoreLocal { depth: usize, index: usize, env: Option<FrameId> },
    StoreGlobal { namespace: Namespace, var: VarId },
    StoreDyn { var: VarId },
    Callee { shape: CallShape, args: Vec<Rc<Prep>>, env: Option<FrameId> },
    Operand {
        shape: CallShape,
        callee: Value,
        args: Vec<Rc<Prep>>,
        next: usize,
        collected: Vec<Value>,
        env: Option<FrameId>,
    },
}

pub fn eval_top(ev: &mut Evaluator, form: &Value) -> Result<Values, Error> {
    let prep = prep::preprocess_top(ev, form)?;
    run(ev, Rc::new(prep), None)
}

/// Runs a compiled closure body to completion; used for preprocess-time
/// macro expansion as well.
pub(crate) fn run_body(
    ev: &mut Evaluator,
    body: &Rc<PrepBody>,
    env: Option<FrameId>,
) -> Result<Values, Error> {
    run(ev, Rc::new(Prep::Progn(body.clone())), env)
}

fn run(
    ev: &mut Evaluator,
    prep: Rc<Prep>,
    env: Option<FrameId>,
) -> Result<Values, Error> {
    let mut stack: Vec<StackElem> = Vec::new();
    let mut step = Step::Bounce { prep, env };
    loop {
        if ev.abort.is_requested() {
            return Err(Error::Aborted);
        }
        let outcome = match step {
            Step::Bounce { prep, env } => {
                eval_step(ev, &mut stack, &prep, env).map(Flow::Step)
            }
            Step::Value(value) => resume(ev, &mut stack, value),
        };
        match outcome {
            Ok(Flow::Step(next)) => step = next,
            Ok(Flow::Done(value)) => return Ok(value),
            Err(Error::Aborted) => return Err(Error::Aborted),
            Err(caught) => {
                if rewind_to_handler(&mut stack) {
                    step = Step::Value(Values::single(Value::string(
                        caught.kind_name(),
                    )));
                } else {
                    return Err(caught);
                }
            }
        }
    }
}

fn rewind_to_handler(stack: &mut Vec<StackElem>) -> bool {
    while let Some(elem) = stack.pop() {
        if matches!(elem, StackElem::Handler) {
            return true;
        }
    }
    false
}

/// Node dispatch: each variant carries exactly the data its own
/// evaluation needs.
fn eval_step(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    prep: &Rc<Prep>,
    env: Option<FrameId>,
) -> Result<Step, Error> {
    match &**prep {
        Prep::Const(value) => Ok(Step::Value(Values::single(value.clone()))),
        Prep::LocalRef { depth, index } => Ok(Step::Value(Values::single(
            ev.frames.local_ref(env, *depth, *index),
        ))),
        Prep::GlobalRef { namespace, var } => {
            let value = ev
                .globals
                .get(*namespace, *var)
                .ok_or_else(|| unbound(*namespace, *var))?;
            Ok(Step::Value(Values::single(value)))
        }
        Prep::DynRef { var } => {
            Ok(Step::Value(Values::single(dyn_lookup(ev, stack, *var)?)))
        }
        Prep::LocalSet { depth, index, expr } => {
            stack.push(StackElem::Cont(Cont::StoreLocal {
                depth: *depth,
                index: *index,
                env,
            }));
            Ok(Step::Bounce { prep: expr.clone(), env })
        }
        Prep::GlobalSet { namespace, var, expr } => {
            stack.push(StackElem::Cont(Cont::StoreGlobal {
                namespace: *namespace,
                var: *var,
            }));
            Ok(Step::Bounce { prep: expr.clone(), env })
        }
        Prep::DynSet { var, expr } => {
            stack.push(StackElem::Cont(Cont::StoreDyn { var: *var }));
            Ok(Step::Bounce { prep: expr.clone(), env })
        }
        Prep::Progn(body) => Ok(step_sequence(stack, body.clone(), 0, env)),
        Prep::If { test, then, els } => {
            stack.push(StackElem::Cont(Cont::Branch {
                then: then.clone(),
                els: els.clone(),
                env,
            }));
            Ok(Step::Bounce { prep: test.clone(), env })
        }
        Prep::Lambda(lambda) => {
            Ok(Step::Value(Values::single(lambda.close_over(env))))
        }
        Prep::CatchErrors(inner) => {
            stack.push(StackElem::Handler);
            Ok(Step::Bounce { prep: inner.clone(), env })
        }
        Prep::ForEach => Err(not_implemented("_for-each", ev.strategy)),
        Prep::Call { shape, head, args } => {
            stack.push(StackElem::Cont(Cont::Callee {
                shape: *shape,
                args: args.clone(),
                env,
            }));
            Ok(Step::Bounce { prep: head.clone(), env })
        }
    }
}

fn handle_callee(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    shape: CallShape,
    callee: Value,
    args: Vec<Rc<Prep>>,
    env: Option<FrameId>,
) -> Result<Step, Error> {
    if let Value::Closure(closure) = &callee {
        if closure.is_macro {
            return Err(prep::runtime_macro_error());
        }
    }
    match args.first() {
        None => apply_callable(ev, stack, shape, callee, Vec::new()),
        Some(first) => {
            let bounce = first.clone();
            stack.push(StackElem::Cont(Cont::Operand {
                shape,
                callee,
                args,
                next: 1,
                collected: Vec::new(),
                env,
            }));
            Ok(Step::Bounce { prep: bounce, env })
        }
    }
}

fn apply_callable(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    shape: CallShape,
    callee: Value,
    collected: Vec<Value>,
) -> Result<Step, Error> {
    let (args, spread) = split_spread(shape, collected);
    match callee {
        Value::Primitive(primitive) => {
            let all = primitive_args(args, spread)?;
            Ok(Step::Value(call_primitive(primitive, &all)?))
        }
        Value::Closure(closure) if closure.is_macro => {
            Err(prep::runtime_macro_error())
        }
        Value::Closure(closure) => {
            let slots = closure_slots(&closure, args, spread)?;
            let body = prep::compiled_body(&closure)?;
            match closure.scope {
                Scope::Lexical => {
                    let frame = ev.push_frame(
                        closure.namespace,
                        closure.params.clone(),
                        slots,
                        closure.env,
                    );
                    Ok(step_sequence(stack, body, 0, Some(frame)))
                }
                Scope::Dynamic => {
                    let dframe = ev.push_frame(
                        Namespace::Value,
                        closure.params.clone(),
                        slots,
                        None,
                    );
                    stack.push(StackElem::DynFrame(dframe));
                    Ok(step_sequence(stack, body, 0, closure.env))
                }
            }
        }
        other => Err(not_callable(&other)),
    }
}

fn step_sequence(
    stack: &mut Vec<StackElem>,
    body: Rc<PrepBody>,
    next: usize,
    env: Option<FrameId>,
) -> Step {
    if next >= body.len() {
        return Step::Value(Values::void());
    }
    let prep = body[next].clone();
    if next + 1 < body.len() {
        stack.push(StackElem::Cont(Cont::Sequence { body, next: next + 1, env }));
    }
    Step::Bounce { prep, env }
}

fn resume(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    value: Values,
) -> Result<Flow, Error> {
    let mut value = value;
    loop {
        match stack.pop() {
            None => return Ok(Flow::Done(value)),
            Some(StackElem::DynFrame(_)) => continue,
            Some(StackElem::Handler) => {
                value = Values::void();
                continue;
            }
            Some(StackElem::Cont(cont)) => {
                return invoke(ev, stack, cont, value).map(Flow::Step);
            }
        }
    }
}

fn invoke(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    cont: Cont,
    value: Values,
) -> Result<Step, Error> {
    match cont {
        Cont::Sequence { body, next, env } => {
            Ok(step_sequence(stack, body, next, env))
        }
        Cont::Branch { then, els, env } => {
            let prep = if expect_boolean(&value.primary())? { then } else { els };
            Ok(Step::Bounce { prep, env })
        }
        Cont::StoreLocal { depth, index, env } => {
            let stored = value.primary();
            ev.frames.local_set(env, depth, index, stored.clone());
            Ok(Step::Value(Values::single(stored)))
        }
        Cont::StoreGlobal { namespace, var } => {
            let stored = value.primary();
            ev.globals.set(namespace, var, stored.clone());
            Ok(Step::Value(Values::single(stored)))
        }
        Cont::StoreDyn { var } => {
            let stored = value.primary();
            dyn_assign(ev, stack, var, stored.clone());
            Ok(Step::Value(Values::single(stored)))
        }
        Cont::Callee { shape, args, env } => {
            handle_callee(ev, stack, shape, value.primary(), args, env)
        }
        Cont::Operand { shape, callee, args, next, mut collected, env } => {
            collect_operand(shape, next >= args.len(), &mut collected, &value);
            if next >= args.len() {
                apply_callable(ev, stack, shape, callee, collected)
            } else {
                let bounce = args[next].clone();
                stack.push(StackElem::Cont(Cont::Operand {
                    shape,
                    callee,
                    args,
                    next: next + 1,
                    collected,
                    env,
                }));
                Ok(Step::Bounce { prep: bounce, env })
            }
        }
    }
}

//===----------------------------------------------------------------------===//
// Dynamic environment, interleaved on the stack
//===----------------------------------------------------------------------===//

fn dyn_lookup(
    ev: &Evaluator,
    stack: &[StackElem],
    var: VarId,
) -> Result<Value, Error> {
    for elem in stack.iter().rev() {
        if let StackElem::DynFrame(id) = elem {
            let frame = ev.frames.get(*id);
            if let Some(index) = frame.binding_index(Namespace::Value, var) {
                return Ok(frame.slots[index].clone());
            }
        }
    }
    ev.globals
        .get(Namespace::Value, var)
        .ok_or_else(|| unbound(Namespace::Value, var))
}

fn dyn_assign(ev: &mut Evaluator, stack: &[StackElem], var: VarId, value: Value) {
    let mut target = None;
    for elem in stack.iter().rev() {
        if let StackElem::DynFrame(id) = elem {
            let frame = ev.frames.get(*id);
            if let Some(index) = frame.binding_index(Namespace::Value, var) {
                target = Some((*id, index));
                break;
            }
        }
    }
    match target {
        Some((id, index)) => ev.frames.set_slot(id, index, value),
        None => ev.globals.set(Namespace::Value, var, value),
    }
}
