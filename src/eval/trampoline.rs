//! Strategy 5: the trampoline.
//!
//! `eval_step` never recurses into itself for tail positions: it either
//! produces a value or hands back a bounce ("evaluate this form next"),
//! and a driver loop alternately dispatches bounces and resumes
//! continuations from the explicit stack. Tail calls therefore do not
//! grow the host stack. Error handling is explicit too: `_catch-errors`
//! pushes a handler marker, and the loop rewinds past it when an error
//! is caught.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::analyzer::{analyze, SpecialForm};
use crate::env::{unbound, FrameId};
use crate::error::Error;
use crate::interner::VarId;
use crate::value::{Closure, Namespace, Scope, Value, Values};

use super::{
    call_primitive, closure_slots, collect_operand, empty_list_form,
    expect_boolean, macro_misuse, make_closure, not_callable, not_implemented,
    primitive_args, source_body, split_form, split_spread, CallShape, Evaluator,
};

/// What one evaluation step hands back to the driver loop.
enum Step {
    Value(Values),
    Bounce { form: Value, env: Option<FrameId> },
}

enum Flow {
    Step(Step),
    Done(Values),
}

#[derive(Debug)]
enum StackElem {
    Cont(Cont),
    DynFrame(FrameId),
    /// Marker pushed by `_catch-errors`; the loop rewinds to it on a
    /// caught error and converts the error into its kind name.
    Handler,
}

#[derive(Debug)]
enum Cont {
    Sequence { remaining: VecDeque<Value>, env: Option<FrameId> },
    Branch { then: Value, els: Value, env: Option<FrameId> },
    Store { namespace: Namespace, dynamic: bool, var: VarId, env: Option<FrameId> },
    Callee { shape: CallShape, forms: Vec<Value>, env: Option<FrameId> },
    Operand {
        shape: CallShape,
        callee: Value,
        pending: VecDeque<Value>,
        collected: Vec<Value>,
        env: Option<FrameId>,
    },
}

pub fn eval_top(ev: &mut Evaluator, form: &Value) -> Result<Values, Error> {
    run(ev, form.clone(), None)
}

/// The driver loop: dispatch bounces, resume continuations, poll the
/// abort byte once per iteration, and route errors to handler markers.
fn run(ev: &mut Evaluator, form: Value, env: Option<FrameId>) -> Result<Values, Error> {
    let mut stack: Vec<StackElem> = Vec::new();
    let mut step = Step::Bounce { form, env };
    loop {
        if ev.abort.is_requested() {
            return Err(Error::Aborted);
        }
        let outcome = match step {
            Step::Bounce { form, env } => {
                eval_step(ev, &mut stack, form, env).map(Flow::Step)
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

/// Pops conts and dynamic frames until a handler marker is consumed.
fn rewind_to_handler(stack: &mut Vec<StackElem>) -> bool {
    while let Some(elem) = stack.pop() {
        if matches!(elem, StackElem::Handler) {
            return true;
        }
    }
    false
}

fn eval_step(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    form: Value,
    env: Option<FrameId>,
) -> Result<Step, Error> {
    match form {
        Value::Variable(id) => {
            let value = ev.frames.lookup(env, &ev.globals, Namespace::Value, id)?;
            Ok(Step::Value(Values::single(value)))
        }
        Value::EmptyList => Err(empty_list_form()),
        Value::Cons(_) => eval_compound(ev, stack, form, env),
        other => Ok(Step::Value(Values::single(other))),
    }
}

fn eval_compound(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    form: Value,
    env: Option<FrameId>,
) -> Result<Step, Error> {
    let (head, args) = split_form(&form)?;

    if let Value::Variable(id) = &head {
        if let Some(special) = analyze(&ev.ops, *id, &args)? {
            return eval_special(ev, stack, special, env);
        }
    }

    eval_call(ev, stack, CallShape::Call, head, args, env)
}

fn eval_special(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    special: SpecialForm,
    env: Option<FrameId>,
) -> Result<Step, Error> {
    match special {
        SpecialForm::Quote(object) => Ok(Step::Value(Values::single(object))),
        SpecialForm::Progn(forms) => {
            Ok(step_sequence(stack, VecDeque::from(forms), env))
        }
        SpecialForm::If { test, then, els } => {
            stack.push(StackElem::Cont(Cont::Branch { then, els, env }));
            Ok(Step::Bounce { form: test, env })
        }
        SpecialForm::Lambda(spec) => {
            Ok(Step::Value(Values::single(make_closure(&spec, env))))
        }
        SpecialForm::Ref { namespace, dynamic, var } => {
            let value = if dynamic {
                dyn_lookup(ev, stack, var)?
            } else {
                ev.frames.lookup(env, &ev.globals, namespace, var)?
            };
            Ok(Step::Value(Values::single(value)))
        }
        SpecialForm::Set { namespace, dynamic, var, expr } => {
            stack.push(StackElem::Cont(Cont::Store { namespace, dynamic, var, env }));
            Ok(Step::Bounce { form: expr, env })
        }
        SpecialForm::ForEach { .. } => {
            Err(not_implemented("_for-each", ev.strategy))
        }
        SpecialForm::CatchErrors(form) => {
            stack.push(StackElem::Handler);
            Ok(Step::Bounce { form, env })
        }
        SpecialForm::Apply { function, forms } => {
            eval_call(ev, stack, CallShape::Apply, function, forms, env)
        }
        SpecialForm::MultipleValueCall { function, forms } => {
            eval_call(ev, stack, CallShape::MultipleValueCall, function, forms, env)
        }
        SpecialForm::MultipleValueApply { function, forms } => {
            eval_call(ev, stack, CallShape::MultipleValueApply, function, forms, env)
        }
    }
}

fn eval_call(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    shape: CallShape,
    function: Value,
    forms: Vec<Value>,
    env: Option<FrameId>,
) -> Result<Step, Error> {
    match function {
        Value::Variable(id) => {
            let callee =
                ev.frames.lookup(env, &ev.globals, Namespace::Function, id)?;
            handle_callee(ev, stack, shape, callee, forms, env)
        }
        other => {
            stack.push(StackElem::Cont(Cont::Callee { shape, forms, env }));
            Ok(Step::Bounce { form: other, env })
        }
    }
}

fn handle_callee(
    ev: &mut Evaluator,
    stack: &mut Vec<StackElem>,
    shape: CallShape,
    callee: Value,
    forms: Vec<Value>,
    env: Option<FrameId>,
) -> Result<Step, Error> {
    if let Value::Closure(closure) = &callee {
        if closure.is_macro {
            if shape != CallShape::Call {
                return Err(macro_misuse());
            }
            let expansion = expand_macro(ev, closure.clone(), forms)?;
            return Ok(Step::Bounce { form: expansion, env });
        }
    }
    let mut pending = VecDeque::from(forms);
    match pending.pop_front() {
        None => apply_callable(ev, stack, shape, callee, Vec::new()),
        Some(first) => {
            stack.push(StackElem::Cont(Cont::Operand {
                shape,
                callee,
                pending,
                collected: Vec::new(),
                env,
            }));
            Ok(Step::Bounce { form: first, env })
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
        Value::Closure(closure) if closure.is_macro => Err(macro_misuse()),
        Value::Closure(closure) => {
            let slots = closure_slots(&closure, args, spread)?;
            let body = VecDeque::from(source_body(&closure)?.to_vec());
            match closure.scope {
                Scope::Lexical => {
                    let frame = ev.push_frame(
                        closure.namespace,
                        closure.params.clone(),
                        slots,
                        closure.env,
                    );
                    Ok(step_sequence(stack, body, Some(frame)))
                }
                Scope::Dynamic => {
                    let dframe = ev.push_frame(
                        Namespace::Value,
                        closure.params.clone(),
                        slots,
                        None,
                    );
                    stack.push(StackElem::DynFrame(dframe));
                    Ok(step_sequence(stack, body, closure.env))
                }
            }
        }
        other => Err(not_callable(&other)),
    }
}

/// A macro body runs to completion in its own nested driver loop; the
/// expansion then bounces in the caller's environment.
fn expand_macro(
    ev: &mut Evaluator,
    closure: Rc<Closure>,
    forms: Vec<Value>,
) -> Result<Value, Error> {
    let slots = closure_slots(&closure, forms, None)?;
    let frame = ev.push_frame(
        closure.namespace,
        closure.params.clone(),
        slots,
        closure.env,
    );
    let body = source_body(&closure)?.to_vec();
    let mut expansion = Values::void();
    for form in body {
        expansion = run(ev, form, Some(frame))?;
    }
    Ok(expansion.primary())
}

/// Sequencing without stack growth for the final form: the tail position
/// is a plain bounce.
fn step_sequence(
    stack: &mut Vec<StackElem>,
    mut forms: VecDeque<Value>,
    env: Option<FrameId>,
) -> Step {
    match forms.pop_front() {
        None => Step::Value(Values::void()),
        Some(form) if forms.is_empty() => Step::Bounce { form, env },
        Some(form) => {
            stack.push(StackElem::Cont(Cont::Sequence { remaining: forms, env }));
            Step::Bounce { form, env }
        }
    }
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
            // A value reaching the handler marker means the protected
            // form succeeded: `_catch-errors` yields void.
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
        Cont::Sequence { remaining, env } => Ok(step_sequence(stack, remaining, env)),
        Cont::Branch { then, els, env } => {
            let form = if expect_boolean(&value.primary())? { then } else { els };
            Ok(Step::Bounce { form, env })
        }
        Cont::Store { namespace, dynamic, var, env } => {
            let stored = value.primary();
            if dynamic {
                dyn_assign(ev, stack, var, stored.clone());
            } else {
                ev.frames.assign(env, &mut ev.globals, namespace, var, stored.clone());
            }
            Ok(Step::Value(Values::single(stored)))
        }
        Cont::Callee { shape, forms, env } => {
            handle_callee(ev, stack, shape, value.primary(), forms, env)
        }
        Cont::Operand { shape, callee, mut pending, mut collected, env } => {
            collect_operand(shape, pending.is_empty(), &mut collected, &value);
            match pending.pop_front() {
                None => apply_callable(ev, stack, shape, callee, collected),
                Some(next) => {
                    stack.push(StackElem::Cont(Cont::Operand {
                        shape,
                        callee,
                        pending,
                        collected,
                        env,
                    }));
                    Ok(Step::Bounce { form: next, env })
                }
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
