//! Strategy 2: closure-passing continuation style.
//!
//! Every evaluation step receives the continuation as a boxed host
//! closure; results flow by invoking it. The host stack still grows (the
//! point here is only to expose the shape of continuations), and errors
//! still propagate as host results.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::analyzer::{analyze, SpecialForm};
use crate::env::FrameId;
use crate::error::{Error, EvaluatorError};
use crate::value::{list_to_vec, Closure, Namespace, Scope, Value, Values};

use super::{
    call_primitive, closure_slots, collect_operand, empty_list_form,
    expect_boolean, macro_misuse, make_closure, not_callable, primitive_args,
    source_body, split_form, split_spread, CallShape, Evaluator,
};

/// What to do with a value once it is available.
pub type Cont = Box<dyn FnOnce(&mut Evaluator, Values) -> Result<Values, Error>>;

pub fn eval_top(ev: &mut Evaluator, form: &Value) -> Result<Values, Error> {
    eval(ev, form.clone(), None, None, Box::new(|_, value| Ok(value)))
}

fn eval(
    ev: &mut Evaluator,
    form: Value,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    ev.check_abort()?;
    match form {
        Value::Variable(id) => {
            let value = ev.frames.lookup(env, &ev.globals, Namespace::Value, id)?;
            k(ev, Values::single(value))
        }
        Value::EmptyList => Err(empty_list_form()),
        Value::Cons(_) => eval_compound(ev, form, env, denv, k),
        other => k(ev, Values::single(other)),
    }
}

fn eval_compound(
    ev: &mut Evaluator,
    form: Value,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    let (head, args) = split_form(&form)?;

    if let Value::Variable(id) = &head {
        if let Some(special) = analyze(&ev.ops, *id, &args)? {
            return eval_special(ev, special, env, denv, k);
        }
    }

    eval_call(ev, CallShape::Call, head, args, env, denv, k)
}

fn eval_special(
    ev: &mut Evaluator,
    special: SpecialForm,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    match special {
        SpecialForm::Quote(object) => k(ev, Values::single(object)),
        SpecialForm::Progn(forms) => {
            eval_sequence(ev, VecDeque::from(forms), env, denv, k)
        }
        SpecialForm::If { test, then, els } => eval(
            ev,
            test,
            env,
            denv,
            Box::new(move |ev, tested| {
                if expect_boolean(&tested.primary())? {
                    eval(ev, then, env, denv, k)
                } else {
                    eval(ev, els, env, denv, k)
                }
            }),
        ),
        SpecialForm::Lambda(spec) => k(ev, Values::single(make_closure(&spec, env))),
        SpecialForm::Ref { namespace, dynamic, var } => {
            let chain = if dynamic { denv } else { env };
            let value = ev.frames.lookup(chain, &ev.globals, namespace, var)?;
            k(ev, Values::single(value))
        }
        SpecialForm::Set { namespace, dynamic, var, expr } => eval(
            ev,
            expr,
            env,
            denv,
            Box::new(move |ev, result| {
                let value = result.primary();
                let chain = if dynamic { denv } else { env };
                ev.frames.assign(
                    chain,
                    &mut ev.globals,
                    namespace,
                    var,
                    value.clone(),
                );
                k(ev, Values::single(value))
            }),
        ),
        SpecialForm::ForEach { function, list } => eval_function_operand(
            ev,
            function,
            env,
            denv,
            Box::new(move |ev, resolved| {
                let callee = resolved.primary();
                eval(
                    ev,
                    list,
                    env,
                    denv,
                    Box::new(move |ev, listed| {
                        let items =
                            list_to_vec(&listed.primary()).ok_or_else(|| {
                                Error::Evaluator(EvaluatorError::General(
                                    "_for-each iterates a proper list"
                                        .to_string(),
                                ))
                            })?;
                        for_each_step(ev, callee, VecDeque::from(items), denv, k)
                    }),
                )
            }),
        ),
        SpecialForm::CatchErrors(form) => {
            match eval(ev, form, env, denv, Box::new(|_, value| Ok(value))) {
                Ok(_) => k(ev, Values::void()),
                Err(Error::Aborted) => Err(Error::Aborted),
                Err(caught) => {
                    k(ev, Values::single(Value::string(caught.kind_name())))
                }
            }
        }
        SpecialForm::Apply { function, forms } => {
            eval_call(ev, CallShape::Apply, function, forms, env, denv, k)
        }
        SpecialForm::MultipleValueCall { function, forms } => eval_call(
            ev,
            CallShape::MultipleValueCall,
            function,
            forms,
            env,
            denv,
            k,
        ),
        SpecialForm::MultipleValueApply { function, forms } => eval_call(
            ev,
            CallShape::MultipleValueApply,
            function,
            forms,
            env,
            denv,
            k,
        ),
    }
}

fn for_each_step(
    ev: &mut Evaluator,
    callee: Value,
    mut items: VecDeque<Value>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    match items.pop_front() {
        None => k(ev, Values::void()),
        Some(item) => {
            let again = callee.clone();
            apply_callable(
                ev,
                callee,
                vec![item],
                None,
                denv,
                Box::new(move |ev, _discarded| {
                    for_each_step(ev, again, items, denv, k)
                }),
            )
        }
    }
}

fn eval_call(
    ev: &mut Evaluator,
    shape: CallShape,
    function: Value,
    forms: Vec<Value>,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    eval_function_operand(
        ev,
        function,
        env,
        denv,
        Box::new(move |ev, resolved| {
            let callee = resolved.primary();
            if let Value::Closure(closure) = &callee {
                if closure.is_macro {
                    if shape != CallShape::Call {
                        return Err(macro_misuse());
                    }
                    let expansion =
                        expand_macro(ev, closure.clone(), forms, denv)?;
                    return eval(ev, expansion, env, denv, k);
                }
            }
            eval_operands(
                ev,
                shape,
                callee,
                VecDeque::from(forms),
                Vec::new(),
                env,
                denv,
                k,
            )
        }),
    )
}

#[allow(clippy::too_many_arguments)]
fn eval_operands(
    ev: &mut Evaluator,
    shape: CallShape,
    callee: Value,
    mut pending: VecDeque<Value>,
    collected: Vec<Value>,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    match pending.pop_front() {
        None => {
            let (args, spread) = split_spread(shape, collected);
            apply_callable(ev, callee, args, spread, denv, k)
        }
        Some(form) => {
            let is_last = pending.is_empty();
            eval(
                ev,
                form,
                env,
                denv,
                Box::new(move |ev, result| {
                    let mut collected = collected;
                    collect_operand(shape, is_last, &mut collected, &result);
                    eval_operands(
                        ev, shape, callee, pending, collected, env, denv, k,
                    )
                }),
            )
        }
    }
}

fn eval_function_operand(
    ev: &mut Evaluator,
    form: Value,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    match form {
        Value::Variable(id) => {
            let value =
                ev.frames.lookup(env, &ev.globals, Namespace::Function, id)?;
            k(ev, Values::single(value))
        }
        other => eval(ev, other, env, denv, k),
    }
}

fn apply_callable(
    ev: &mut Evaluator,
    callee: Value,
    args: Vec<Value>,
    spread: Option<Value>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    match callee {
        Value::Primitive(primitive) => {
            let all = primitive_args(args, spread)?;
            let result = call_primitive(primitive, &all)?;
            k(ev, result)
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
                    eval_sequence(ev, body, Some(frame), denv, k)
                }
                Scope::Dynamic => {
                    let dframe = ev.push_frame(
                        Namespace::Value,
                        closure.params.clone(),
                        slots,
                        denv,
                    );
                    eval_sequence(ev, body, closure.env, Some(dframe), k)
                }
            }
        }
        other => Err(not_callable(&other)),
    }
}

fn expand_macro(
    ev: &mut Evaluator,
    closure: Rc<Closure>,
    forms: Vec<Value>,
    denv: Option<FrameId>,
) -> Result<Value, Error> {
    let slots = closure_slots(&closure, forms, None)?;
    let body = VecDeque::from(source_body(&closure)?.to_vec());
    let frame = ev.push_frame(
        closure.namespace,
        closure.params.clone(),
        slots,
        closure.env,
    );
    let expansion = eval_sequence(
        ev,
        body,
        Some(frame),
        denv,
        Box::new(|_, value| Ok(value)),
    )?;
    Ok(expansion.primary())
}

fn eval_sequence(
    ev: &mut Evaluator,
    mut forms: VecDeque<Value>,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    match forms.pop_front() {
        None => k(ev, Values::void()),
        Some(form) if forms.is_empty() => eval(ev, form, env, denv, k),
        Some(form) => eval(
            ev,
            form,
            env,
            denv,
            Box::new(move |ev, _discarded| eval_sequence(ev, forms, env, denv, k)),
        ),
    }
}
