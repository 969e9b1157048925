//! Strategy 4: stack-based object-oriented continuation style.
//!
//! Continuations and dynamic-environment frames share one explicit stack.
//! Advancing control pops elements until a continuation is found, skipping
//! dynamic frames, which are only visible to `dref`/`dset!` lookups that
//! walk the same stack. Errors still propagate as host results; on a
//! catch, the stack is truncated to the size recorded when the handler
//! was entered.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::analyzer::{analyze, SpecialForm};
use crate::env::{unbound, FrameId};
use crate::error::{Error, EvaluatorError};
use crate::interner::VarId;
use crate::value::{list_to_vec, Closure, Namespace, Scope, Value, Values};

use super::{
    call_primitive, closure_slots, collect_operand, empty_list_form,
    expect_boolean, macro_misuse, make_closure, not_callable, primitive_args,
    source_body, split_form, split_spread, CallShape, Evaluator,
};

/// One element of the shared control stack.
#[derive(Debug)]
enum StackElem {
    Cont(Cont),
    DynFrame(FrameId),
    /// Bottom of a (possibly nested) computation: yield the value to the
    /// host caller instead of popping further.
    EndMarker,
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
    IterFun { list: Value, env: Option<FrameId> },
    IterList { callee: Value },
    IterStep { callee: Value, items: VecDeque<Value> },
}

pub fn eval_top(ev: &mut Evaluator, form: &Value) -> Result<Values, Error> {
    let mut machine = Machine { ev, stack: Vec::new() };
    machine.stack.push(StackElem::EndMarker);
    machine.eval(form.clone(), None)
}

struct Machine<'ev> {
    ev: &'ev mut Evaluator,
    stack: Vec<StackElem>,
}

impl Machine<'_> {
    fn eval(&mut self, form: Value, env: Option<FrameId>) -> Result<Values, Error> {
        self.ev.check_abort()?;
        match form {
            Value::Variable(id) => {
                let value =
                    self.ev.frames.lookup(env, &self.ev.globals, Namespace::Value, id)?;
                self.resume(Values::single(value))
            }
            Value::EmptyList => Err(empty_list_form()),
            Value::Cons(_) => self.eval_compound(form, env),
            other => self.resume(Values::single(other)),
        }
    }

    fn eval_compound(
        &mut self,
        form: Value,
        env: Option<FrameId>,
    ) -> Result<Values, Error> {
        let (head, args) = split_form(&form)?;

        if let Value::Variable(id) = &head {
            if let Some(special) = analyze(&self.ev.ops, *id, &args)? {
                return self.eval_special(special, env);
            }
        }

        self.eval_call(CallShape::Call, head, args, env)
    }

    fn eval_special(
        &mut self,
        special: SpecialForm,
        env: Option<FrameId>,
    ) -> Result<Values, Error> {
        match special {
            SpecialForm::Quote(object) => self.resume(Values::single(object)),
            SpecialForm::Progn(forms) => {
                self.eval_sequence(VecDeque::from(forms), env)
            }
            SpecialForm::If { test, then, els } => {
                self.stack.push(StackElem::Cont(Cont::Branch { then, els, env }));
                self.eval(test, env)
            }
            SpecialForm::Lambda(spec) => {
                self.resume(Values::single(make_closure(&spec, env)))
            }
            SpecialForm::Ref { namespace, dynamic, var } => {
                let value = if dynamic {
                    self.dyn_lookup(var)?
                } else {
                    self.ev.frames.lookup(env, &self.ev.globals, namespace, var)?
                };
                self.resume(Values::single(value))
            }
            SpecialForm::Set { namespace, dynamic, var, expr } => {
                self.stack.push(StackElem::Cont(Cont::Store {
                    namespace,
                    dynamic,
                    var,
                    env,
                }));
                self.eval(expr, env)
            }
            SpecialForm::ForEach { function, list } => match function {
                Value::Variable(id) => {
                    let callee = self.ev.frames.lookup(
                        env,
                        &self.ev.globals,
                        Namespace::Function,
                        id,
                    )?;
                    self.stack.push(StackElem::Cont(Cont::IterList { callee }));
                    self.eval(list, env)
                }
                other => {
                    self.stack
                        .push(StackElem::Cont(Cont::IterFun { list, env }));
                    self.eval(other, env)
                }
            },
            SpecialForm::CatchErrors(form) => {
                let depth = self.stack.len();
                self.stack.push(StackElem::EndMarker);
                match self.eval(form, env) {
                    Ok(_) => {
                        self.stack.truncate(depth);
                        self.resume(Values::void())
                    }
                    Err(Error::Aborted) => Err(Error::Aborted),
                    Err(caught) => {
                        self.stack.truncate(depth);
                        self.resume(Values::single(Value::string(
                            caught.kind_name(),
                        )))
                    }
                }
            }
            SpecialForm::Apply { function, forms } => {
                self.eval_call(CallShape::Apply, function, forms, env)
            }
            SpecialForm::MultipleValueCall { function, forms } => {
                self.eval_call(CallShape::MultipleValueCall, function, forms, env)
            }
            SpecialForm::MultipleValueApply { function, forms } => {
                self.eval_call(CallShape::MultipleValueApply, function, forms, env)
            }
        }
    }

    fn eval_call(
        &mut self,
        shape: CallShape,
        function: Value,
        forms: Vec<Value>,
        env: Option<FrameId>,
    ) -> Result<Values, Error> {
        match function {
            Value::Variable(id) => {
                let callee = self.ev.frames.lookup(
                    env,
                    &self.ev.globals,
                    Namespace::Function,
                    id,
                )?;
                self.handle_callee(shape, callee, forms, env)
            }
            other => {
                self.stack
                    .push(StackElem::Cont(Cont::Callee { shape, forms, env }));
                self.eval(other, env)
            }
        }
    }

    fn handle_callee(
        &mut self,
        shape: CallShape,
        callee: Value,
        forms: Vec<Value>,
        env: Option<FrameId>,
    ) -> Result<Values, Error> {
        if let Value::Closure(closure) = &callee {
            if closure.is_macro {
                if shape != CallShape::Call {
                    return Err(macro_misuse());
                }
                let expansion = self.expand_macro(closure.clone(), forms)?;
                return self.eval(expansion, env);
            }
        }
        let mut pending = VecDeque::from(forms);
        match pending.pop_front() {
            None => self.apply_callable(shape, callee, Vec::new()),
            Some(first) => {
                self.stack.push(StackElem::Cont(Cont::Operand {
                    shape,
                    callee,
                    pending,
                    collected: Vec::new(),
                    env,
                }));
                self.eval(first, env)
            }
        }
    }

    fn apply_callable(
        &mut self,
        shape: CallShape,
        callee: Value,
        collected: Vec<Value>,
    ) -> Result<Values, Error> {
        let (args, spread) = split_spread(shape, collected);
        match callee {
            Value::Primitive(primitive) => {
                let all = primitive_args(args, spread)?;
                let result = call_primitive(primitive, &all)?;
                self.resume(result)
            }
            Value::Closure(closure) if closure.is_macro => Err(macro_misuse()),
            Value::Closure(closure) => {
                let slots = closure_slots(&closure, args, spread)?;
                let body = VecDeque::from(source_body(&closure)?.to_vec());
                match closure.scope {
                    Scope::Lexical => {
                        let frame = self.ev.push_frame(
                            closure.namespace,
                            closure.params.clone(),
                            slots,
                            closure.env,
                        );
                        self.eval_sequence(body, Some(frame))
                    }
                    Scope::Dynamic => {
                        let dframe = self.ev.push_frame(
                            Namespace::Value,
                            closure.params.clone(),
                            slots,
                            None,
                        );
                        self.stack.push(StackElem::DynFrame(dframe));
                        self.eval_sequence(body, closure.env)
                    }
                }
            }
            other => Err(not_callable(&other)),
        }
    }

    /// Runs a macro body as a nested computation on the same stack,
    /// bounded by its own end marker.
    fn expand_macro(
        &mut self,
        closure: Rc<Closure>,
        forms: Vec<Value>,
    ) -> Result<Value, Error> {
        let slots = closure_slots(&closure, forms, None)?;
        let body = VecDeque::from(source_body(&closure)?.to_vec());
        let frame = self.ev.push_frame(
            closure.namespace,
            closure.params.clone(),
            slots,
            closure.env,
        );
        self.stack.push(StackElem::EndMarker);
        let expansion = self.eval_sequence(body, Some(frame))?;
        Ok(expansion.primary())
    }

    fn eval_sequence(
        &mut self,
        mut forms: VecDeque<Value>,
        env: Option<FrameId>,
    ) -> Result<Values, Error> {
        match forms.pop_front() {
            None => self.resume(Values::void()),
            Some(form) if forms.is_empty() => self.eval(form, env),
            Some(form) => {
                self.stack.push(StackElem::Cont(Cont::Sequence {
                    remaining: forms,
                    env,
                }));
                self.eval(form, env)
            }
        }
    }

    /// Pops until a continuation is found, skipping dynamic frames; an
    /// end marker yields the value to the host caller.
    fn resume(&mut self, value: Values) -> Result<Values, Error> {
        loop {
            match self.stack.pop() {
                None | Some(StackElem::EndMarker) => return Ok(value),
                Some(StackElem::DynFrame(_)) => continue,
                Some(StackElem::Cont(cont)) => return self.invoke(cont, value),
            }
        }
    }

    fn invoke(&mut self, cont: Cont, value: Values) -> Result<Values, Error> {
        match cont {
            Cont::Sequence { remaining, env } => self.eval_sequence(remaining, env),
            Cont::Branch { then, els, env } => {
                if expect_boolean(&value.primary())? {
                    self.eval(then, env)
                } else {
                    self.eval(els, env)
                }
            }
            Cont::Store { namespace, dynamic, var, env } => {
                let stored = value.primary();
                if dynamic {
                    self.dyn_assign(var, stored.clone());
                } else {
                    self.ev.frames.assign(
                        env,
                        &mut self.ev.globals,
                        namespace,
                        var,
                        stored.clone(),
                    );
                }
                self.resume(Values::single(stored))
            }
            Cont::Callee { shape, forms, env } => {
                self.handle_callee(shape, value.primary(), forms, env)
            }
            Cont::Operand { shape, callee, mut pending, mut collected, env } => {
                collect_operand(shape, pending.is_empty(), &mut collected, &value);
                match pending.pop_front() {
                    None => self.apply_callable(shape, callee, collected),
                    Some(next) => {
                        self.stack.push(StackElem::Cont(Cont::Operand {
                            shape,
                            callee,
                            pending,
                            collected,
                            env,
                        }));
                        self.eval(next, env)
                    }
                }
            }
            Cont::IterFun { list, env } => {
                self.stack.push(StackElem::Cont(Cont::IterList {
                    callee: value.primary(),
                }));
                self.eval(list, env)
            }
            Cont::IterList { callee } => {
                let items = list_to_vec(&value.primary()).ok_or_else(|| {
                    Error::Evaluator(EvaluatorError::General(
                        "_for-each iterates a proper list".to_string(),
                    ))
                })?;
                self.invoke(
                    Cont::IterStep { callee, items: VecDeque::from(items) },
                    Values::void(),
                )
            }
            Cont::IterStep { callee, mut items } => match items.pop_front() {
                None => self.resume(Values::void()),
                Some(item) => {
                    self.stack.push(StackElem::Cont(Cont::IterStep {
                        callee: callee.clone(),
                        items,
                    }));
                    self.apply_callable(CallShape::Call, callee, vec![item])
                }
            },
        }
    }

    //===------------------------------------------------------------------===//
    // Dynamic environment, interleaved on the stack
    //===------------------------------------------------------------------===//

    fn dyn_lookup(&self, var: VarId) -> Result<Value, Error> {
        for elem in self.stack.iter().rev() {
            if let StackElem::DynFrame(id) = elem {
                let frame = self.ev.frames.get(*id);
                if let Some(index) = frame.binding_index(Namespace::Value, var) {
                    return Ok(frame.slots[index].clone());
                }
            }
        }
        self.ev
            .globals
            .get(Namespace::Value, var)
            .ok_or_else(|| unbound(Namespace::Value, var))
    }

    fn dyn_assign(&mut self, var: VarId, value: Value) {
        let mut target = None;
        for elem in self.stack.iter().rev() {
            if let StackElem::DynFrame(id) = elem {
                let frame = self.ev.frames.get(*id);
                if let Some(index) = frame.binding_index(Namespace::Value, var) {
                    target = Some((*id, index));
                    break;
                }
            }
        }
        match target {
            Some((id, index)) => self.ev.frames.set_slot(id, index, value),
            None => self.ev.globals.set(Namespace::Value, var, value),
        }
    }
}
