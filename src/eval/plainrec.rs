//! Strategy 1: the plain recursive interpreter.
//!
//! Control flow is the host's call stack; there is no tail-call
//! optimization. The dynamic environment travels as an extra argument.

use std::rc::Rc;

use crate::analyzer::{analyze, SpecialForm};
use crate::env::FrameId;
use crate::error::Error;
use crate::value::{Closure, Namespace, Scope, Value, Values};

use super::{
    call_primitive, closure_slots, collect_operand, empty_list_form,
    expect_boolean, macro_misuse, make_closure, not_callable, not_implemented,
    primitive_args, source_body, split_form, split_spread, CallShape, Evaluator,
};

pub fn eval_top(ev: &mut Evaluator, form: &Value) -> Result<Values, Error> {
    eval(ev, form, None, None)
}

fn eval(
    ev: &mut Evaluator,
    form: &Value,
    env: Option<FrameId>,
    denv: Option<FrameId>,
) -> Result<Values, Error> {
    ev.check_abort()?;
    match form {
        Value::Variable(id) => ev
            .frames
            .lookup(env, &ev.globals, Namespace::Value, *id)
            .map(Values::single),
        Value::EmptyList => Err(empty_list_form()),
        Value::Cons(_) => eval_compound(ev, form, env, denv),
        other => Ok(Values::single(other.clone())),
    }
}

fn eval_compound(
    ev: &mut Evaluator,
    form: &Value,
    env: Option<FrameId>,
    denv: Option<FrameId>,
) -> Result<Values, Error> {
    let (head, args) = split_form(form)?;

    if let Value::Variable(id) = &head {
        if let Some(special) = analyze(&ev.ops, *id, &args)? {
            return eval_special(ev, special, env, denv);
        }
    }

    let callee = eval_function_operand(ev, &head, env, denv)?;
    if let Value::Closure(closure) = &callee {
        if closure.is_macro {
            let expansion = expand_macro(ev, closure.clone(), args, denv)?;
            return eval(ev, &expansion, env, denv);
        }
    }

    let mut collected = Vec::with_capacity(args.len());
    for arg in &args {
        let result = eval(ev, arg, env, denv)?;
        collect_operand(CallShape::Call, false, &mut collected, &result);
    }
    apply_callable(ev, &callee, collected, None, denv)
}

fn eval_special(
    ev: &mut Evaluator,
    special: SpecialForm,
    env: Option<FrameId>,
    denv: Option<FrameId>,
) -> Result<Values, Error> {
    match special {
        SpecialForm::Quote(object) => Ok(Values::single(object)),
        SpecialForm::Progn(forms) => eval_body(ev, &forms, env, denv),
        SpecialForm::If { test, then, els } => {
            let test_value = eval(ev, &test, env, denv)?.primary();
            if expect_boolean(&test_value)? {
                eval(ev, &then, env, denv)
            } else {
                eval(ev, &els, env, denv)
            }
        }
        SpecialForm::Lambda(spec) => Ok(Values::single(make_closure(&spec, env))),
        SpecialForm::Ref { namespace, dynamic, var } => {
            let chain = if dynamic { denv } else { env };
            ev.frames
                .lookup(chain, &ev.globals, namespace, var)
                .map(Values::single)
        }
        SpecialForm::Set { namespace, dynamic, var, expr } => {
            let value = eval(ev, &expr, env, denv)?.primary();
            let chain = if dynamic { denv } else { env };
            ev.frames
                .assign(chain, &mut ev.globals, namespace, var, value.clone());
            Ok(Values::single(value))
        }
        SpecialForm::ForEach { .. } => {
            Err(not_implemented("_for-each", ev.strategy))
        }
        SpecialForm::CatchErrors(form) => match eval(ev, &form, env, denv) {
            Ok(_) => Ok(Values::void()),
            Err(Error::Aborted) => Err(Error::Aborted),
            Err(caught) => {
                Ok(Values::single(Value::string(caught.kind_name())))
            }
        },
        SpecialForm::Apply { function, forms } => {
            eval_call_shape(ev, CallShape::Apply, &function, &forms, env, denv)
        }
        SpecialForm::MultipleValueCall { function, forms } => eval_call_shape(
            ev,
            CallShape::MultipleValueCall,
            &function,
            &forms,
            env,
            denv,
        ),
        SpecialForm::MultipleValueApply { function, forms } => eval_call_shape(
            ev,
            CallShape::MultipleValueApply,
            &function,
            &forms,
            env,
            denv,
        ),
    }
}

fn eval_call_shape(
    ev: &mut Evaluator,
    shape: CallShape,
    function: &Value,
    forms: &[Value],
    env: Option<FrameId>,
    denv: Option<FrameId>,
) -> Result<Values, Error> {
    let callee = eval_function_operand(ev, function, env, denv)?;
    let mut collected = Vec::with_capacity(forms.len());
    for (i, form) in forms.iter().enumerate() {
        let result = eval(ev, form, env, denv)?;
        collect_operand(shape, i + 1 == forms.len(), &mut collected, &result);
    }
    let (args, spread) = split_spread(shape, collected);
    apply_callable(ev, &callee, args, spread, denv)
}

/// A function operand that is a bare variable resolves in the function
/// namespace; any other expression is evaluated.
fn eval_function_operand(
    ev: &mut Evaluator,
    form: &Value,
    env: Option<FrameId>,
    denv: Option<FrameId>,
) -> Result<Value, Error> {
    match form {
        Value::Variable(id) => {
            ev.frames.lookup(env, &ev.globals, Namespace::Function, *id)
        }
        other => Ok(eval(ev, other, env, denv)?.primary()),
    }
}

fn apply_callable(
    ev: &mut Evaluator,
    callee: &Value,
    args: Vec<Value>,
    spread: Option<Value>,
    denv: Option<FrameId>,
) -> Result<Values, Error> {
    match callee {
        Value::Primitive(primitive) => {
            let all = primitive_args(args, spread)?;
            call_primitive(primitive, &all)
        }
        Value::Closure(closure) if closure.is_macro => Err(macro_misuse()),
        Value::Closure(closure) => {
            let slots = closure_slots(closure, args, spread)?;
            invoke_closure(ev, closure.clone(), slots, denv)
        }
        other => Err(not_callable(other)),
    }
}

fn invoke_closure(
    ev: &mut Evaluator,
    closure: Rc<Closure>,
    slots: Vec<Value>,
    denv: Option<FrameId>,
) -> Result<Values, Error> {
    let body = source_body(&closure)?.to_vec();
    match closure.scope {
        Scope::Lexical => {
            let frame = ev.push_frame(
                closure.namespace,
                closure.params.clone(),
                slots,
                closure.env,
            );
            eval_body(ev, &body, Some(frame), denv)
        }
        Scope::Dynamic => {
            // The dynamic frame extends only for the duration of the body.
            let dframe = ev.push_frame(
                Namespace::Value,
                closure.params.clone(),
                slots,
                denv,
            );
            eval_body(ev, &body, closure.env, Some(dframe))
        }
    }
}

/// A macro receives its operand forms unevaluated; the expansion is then
/// evaluated in the caller's environment.
fn expand_macro(
    ev: &mut Evaluator,
    closure: Rc<Closure>,
    forms: Vec<Value>,
    denv: Option<FrameId>,
) -> Result<Value, Error> {
    let slots = closure_slots(&closure, forms, None)?;
    let body = source_body(&closure)?.to_vec();
    let frame =
        ev.push_frame(closure.namespace, closure.params.clone(), slots, closure.env);
    Ok(eval_body(ev, &body, Some(frame), denv)?.primary())
}

fn eval_body(
    ev: &mut Evaluator,
    forms: &[Value],
    env: Option<FrameId>,
    denv: Option<FrameId>,
) -> Result<Values, Error> {
    let Some((last, leading)) = forms.split_last() else {
        return Ok(Values::void());
    };
    for form in leading {
        eval(ev, form, env, denv)?;
    }
    eval(ev, last, env, denv)
}
