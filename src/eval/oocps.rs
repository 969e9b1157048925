//! Strategy 3: object-oriented continuation style.
//!
//! Same control shape as `cps`, but each continuation is a tagged record
//! with an `invoke` operation, which makes the full set of continuations
//! the evaluator can be suspended on enumerable. Host recursion and host
//! error propagation are unchanged.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::analyzer::{analyze, SpecialForm};
use crate::env::FrameId;
use crate::error::{Error, EvaluatorError};
use crate::interner::VarId;
use crate::value::{list_to_vec, Closure, Namespace, Scope, Value, Values};

use super::{
    call_primitive, closure_slots, collect_operand, empty_list_form,
    expect_boolean, macro_misuse, make_closure, not_callable, primitive_args,
    source_body, split_form, split_spread, CallShape, Evaluator,
};

/// Every suspension point of the evaluator, as a record.
#[derive(Debug)]
enum Cont {
    /// Yield the value to the caller.
    Done,
    /// Discard the value and evaluate the remaining body forms.
    Sequence {
        remaining: VecDeque<Value>,
        env: Option<FrameId>,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
    /// Test the value and pick the consequent or the alternative.
    Branch {
        then: Value,
        els: Value,
        env: Option<FrameId>,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
    /// Write the value through a binding and pass it along.
    Store {
        namespace: Namespace,
        dynamic: bool,
        var: VarId,
        env: Option<FrameId>,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
    /// The callee is now known; decide between macro expansion and
    /// operand evaluation.
    Callee {
        shape: CallShape,
        forms: Vec<Value>,
        env: Option<FrameId>,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
    /// Fold one operand result and continue collecting.
    Operand {
        shape: CallShape,
        callee: Value,
        pending: VecDeque<Value>,
        collected: Vec<Value>,
        env: Option<FrameId>,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
    /// The `_for-each` function operand is now known; evaluate the list.
    IterFun {
        list: Value,
        env: Option<FrameId>,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
    /// The `_for-each` list operand is now known; start iterating.
    IterList {
        callee: Value,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
    /// Discard one `_for-each` result and call the function on the next
    /// element.
    IterStep {
        callee: Value,
        items: VecDeque<Value>,
        denv: Option<FrameId>,
        next: Box<Cont>,
    },
}

impl Cont {
    fn invoke(self, ev: &mut Evaluator, value: Values) -> Result<Values, Error> {
        match self {
            Cont::Done => Ok(value),
            Cont::Sequence { remaining, env, denv, next } => {
                eval_sequence(ev, remaining, env, denv, *next)
            }
            Cont::Branch { then, els, env, denv, next } => {
                if expect_boolean(&value.primary())? {
                    eval(ev, then, env, denv, *next)
                } else {
                    eval(ev, els, env, denv, *next)
                }
            }
            Cont::Store { namespace, dynamic, var, env, denv, next } => {
                let stored = value.primary();
                let chain = if dynamic { denv } else { env };
                ev.frames.assign(
                    chain,
                    &mut ev.globals,
                    namespace,
                    var,
                    stored.clone(),
                );
                next.invoke(ev, Values::single(stored))
            }
            Cont::Callee { shape, forms, env, denv, next } => {
                let callee = value.primary();
                if let Value::Closure(closure) = &callee {
                    if closure.is_macro {
                        if shape != CallShape::Call {
                            return Err(macro_misuse());
                        }
                        let expansion =
                            expand_macro(ev, closure.clone(), forms, denv)?;
                        return eval(ev, expansion, env, denv, *next);
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
                    *next,
                )
            }
            Cont::Operand {
                shape,
                callee,
                pending,
                mut collected,
                env,
                denv,
                next,
            } => {
                collect_operand(shape, pending.is_empty(), &mut collected, &value);
                eval_operands(ev, shape, callee, pending, collected, env, denv, *next)
            }
            Cont::IterFun { list, env, denv, next } => {
                let iter = Cont::IterList { callee: value.primary(), denv, next };
                eval(ev, list, env, denv, iter)
            }
            Cont::IterList { callee, denv, next } => {
                let items = list_to_vec(&value.primary()).ok_or_else(|| {
                    Error::Evaluator(EvaluatorError::General(
                        "_for-each iterates a proper list".to_string(),
                    ))
                })?;
                Cont::IterStep { callee, items: VecDeque::from(items), denv, next }
                    .invoke(ev, Values::void())
            }
            Cont::IterStep { callee, mut items, denv, next } => {
                match items.pop_front() {
                    None => next.invoke(ev, Values::void()),
                    Some(item) => {
                        let again = callee.clone();
                        apply_callable(
                            ev,
                            callee,
                            vec![item],
                            None,
                            denv,
                            Cont::IterStep { callee: again, items, denv, next },
                        )
                    }
                }
            }
        }
    }
}

pub fn eval_top(ev: &mut Evaluator, form: &Value) -> Result<Values, Error> {
    eval(ev, form.clone(), None, None, Cont::Done)
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
            k.invoke(ev, Values::single(value))
        }
        Value::EmptyList => Err(empty_list_form()),
        Value::Cons(_) => eval_compound(ev, form, env, denv, k),
        other => k.invoke(ev, Values::single(other)),
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
        SpecialForm::Quote(object) => k.invoke(ev, Values::single(object)),
        SpecialForm::Progn(forms) => {
            eval_sequence(ev, VecDeque::from(forms), env, denv, k)
        }
        SpecialForm::If { test, then, els } => {
            let branch = Cont::Branch { then, els, env, denv, next: Box::new(k) };
            eval(ev, test, env, denv, branch)
        }
        SpecialForm::Lambda(spec) => {
            k.invoke(ev, Values::single(make_closure(&spec, env)))
        }
        SpecialForm::Ref { namespace, dynamic, var } => {
            let chain = if dynamic { denv } else { env };
            let value = ev.frames.lookup(chain, &ev.globals, namespace, var)?;
            k.invoke(ev, Values::single(value))
        }
        SpecialForm::Set { namespace, dynamic, var, expr } => {
            let store =
                Cont::Store { namespace, dynamic, var, env, denv, next: Box::new(k) };
            eval(ev, expr, env, denv, store)
        }
        SpecialForm::ForEach { function, list } => {
            let iter_fun = Cont::IterFun { list, env, denv, next: Box::new(k) };
            match function {
                Value::Variable(id) => {
                    let callee = ev
                        .frames
                        .lookup(env, &ev.globals, Namespace::Function, id)?;
                    iter_fun.invoke(ev, Values::single(callee))
                }
                other => eval(ev, other, env, denv, iter_fun),
            }
        }
        SpecialForm::CatchErrors(form) => {
            match eval(ev, form, env, denv, Cont::Done) {
                Ok(_) => k.invoke(ev, Values::void()),
                Err(Error::Aborted) => Err(Error::Aborted),
                Err(caught) => {
                    k.invoke(ev, Values::single(Value::string(caught.kind_name())))
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

fn eval_call(
    ev: &mut Evaluator,
    shape: CallShape,
    function: Value,
    forms: Vec<Value>,
    env: Option<FrameId>,
    denv: Option<FrameId>,
    k: Cont,
) -> Result<Values, Error> {
    let callee_cont =
        Cont::Callee { shape, forms, env, denv, next: Box::new(k) };
    match function {
        Value::Variable(id) => {
            let value =
                ev.frames.lookup(env, &ev.globals, Namespace::Function, id)?;
            callee_cont.invoke(ev, Values::single(value))
        }
        other => eval(ev, other, env, denv, callee_cont),
    }
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
            let operand = Cont::Operand {
                shape,
                callee,
                pending,
                collected,
                env,
                denv,
                next: Box::new(k),
            };
            eval(ev, form, env, denv, operand)
        }
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
            k.invoke(ev, result)
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
    let expansion = eval_sequence(ev, body, Some(frame), denv, Cont::Done)?;
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
        None => k.invoke(ev, Values::void()),
        Some(form) if forms.is_empty() => eval(ev, form, env, denv, k),
        Some(form) => {
            let sequence =
                Cont::Sequence { remaining: forms, env, denv, next: Box::new(k) };
            eval(ev, form, env, denv, sequence)
        }
    }
}
