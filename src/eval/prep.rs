//! The preprocessing layer behind trampoline++.
//!
//! Before execution every form is walked once into an immediately
//! executable node tree. Each form variant becomes its own node carrying
//! only the data it needs; lexical references and assignments are
//! rewritten to (frame-depth, slot-index) pairs when the binding is
//! visible on the compile-time chain, and to global nodes otherwise.
//! Dynamic accesses stay symbolic. Macro calls are expanded here, at
//! preprocess time, including the scope-local macro-binding idiom (a call
//! whose head is an `_flambda` whose operands are all `_mlambda`s).

use std::rc::Rc;

use crate::analyzer::{analyze, LambdaSpec, SpecialForm};
use crate::error::Error;
use crate::interner::VarId;
use crate::value::{Closure, ClosureBody, Namespace, Scope, Value, Values};

use super::{
    closure_slots, empty_list_form, macro_misuse, split_form, trampolinepp,
    CallShape, Evaluator,
};

/// A preprocessed, immediately executable form.
#[derive(Debug)]
pub enum Prep {
    Const(Value),
    /// Lexical reference by address: skip `depth` frames, read `index`.
    LocalRef { depth: usize, index: usize },
    GlobalRef { namespace: Namespace, var: VarId },
    DynRef { var: VarId },
    LocalSet { depth: usize, index: usize, expr: Rc<Prep> },
    GlobalSet { namespace: Namespace, var: VarId, expr: Rc<Prep> },
    DynSet { var: VarId, expr: Rc<Prep> },
    Progn(Rc<PrepBody>),
    If { test: Rc<Prep>, then: Rc<Prep>, els: Rc<Prep> },
    Lambda(Rc<PrepLambda>),
    CatchErrors(Rc<Prep>),
    /// Kept as a node so the strategy can signal "not implemented" when
    /// (and only when) the form is actually evaluated.
    ForEach,
    Call { shape: CallShape, head: Rc<Prep>, args: Vec<Rc<Prep>> },
}

pub type PrepBody = Vec<Rc<Prep>>;

#[derive(Debug)]
pub struct PrepLambda {
    pub scope: Scope,
    pub namespace: Namespace,
    pub is_macro: bool,
    pub params: Vec<VarId>,
    pub rest: bool,
    pub body: Rc<PrepBody>,
}

impl PrepLambda {
    /// The closure this node denotes once the capture environment is
    /// known.
    pub fn close_over(&self, env: Option<crate::env::FrameId>) -> Value {
        Value::Closure(Rc::new(Closure {
            scope: self.scope,
            namespace: self.namespace,
            is_macro: self.is_macro,
            params: self.params.clone(),
            rest: self.rest,
            body: ClosureBody::Compiled(self.body.clone()),
            env,
        }))
    }
}

//===----------------------------------------------------------------------===//
// Compile-time environment
//===----------------------------------------------------------------------===//

/// Mirror of the runtime frame chain: one compile frame per runtime frame,
/// in the same order, so (depth, index) addresses line up.
#[derive(Debug, Default)]
pub struct CompEnv {
    frames: Vec<CompFrame>, // innermost last
}

#[derive(Debug)]
struct CompFrame {
    namespace: Namespace,
    vars: Vec<VarId>,
    /// For scope-local macro frames: the macro closure bound to each
    /// parameter, available for preprocess-time expansion.
    macros: Option<Vec<Value>>,
}

enum MacroBinding {
    Found(Value),
    Shadowed,
    Unbound,
}

impl CompEnv {
    pub fn new() -> Self {
        Self::default()
    }

    fn address(&self, namespace: Namespace, var: VarId) -> Option<(usize, usize)> {
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            if frame.namespace == namespace {
                if let Some(index) = frame.vars.iter().position(|&v| v == var) {
                    return Some((depth, index));
                }
            }
        }
        None
    }

    fn macro_binding(&self, var: VarId) -> MacroBinding {
        for frame in self.frames.iter().rev() {
            if frame.namespace != Namespace::Function {
                continue;
            }
            if let Some(index) = frame.vars.iter().position(|&v| v == var) {
                return match &frame.macros {
                    Some(macros) => MacroBinding::Found(macros[index].clone()),
                    None => MacroBinding::Shadowed,
                };
            }
        }
        MacroBinding::Unbound
    }
}

/// A head variable resolving (locally or globally) to a macro closure is
/// expanded at preprocess time.
fn macro_for_head(
    ev: &Evaluator,
    cenv: &CompEnv,
    var: VarId,
) -> Option<Rc<Closure>> {
    let bound = match cenv.macro_binding(var) {
        MacroBinding::Found(value) => Some(value),
        MacroBinding::Shadowed => return None,
        MacroBinding::Unbound => ev.globals.get(Namespace::Function, var),
    };
    match bound {
        Some(Value::Closure(closure)) if closure.is_macro => Some(closure),
        _ => None,
    }
}

//===----------------------------------------------------------------------===//
// Preprocessing
//===----------------------------------------------------------------------===//

pub fn preprocess_top(ev: &mut Evaluator, form: &Value) -> Result<Prep, Error> {
    let mut cenv = CompEnv::new();
    preprocess(ev, form, &mut cenv)
}

fn preprocess(
    ev: &mut Evaluator,
    form: &Value,
    cenv: &mut CompEnv,
) -> Result<Prep, Error> {
    match form {
        Value::Variable(id) => Ok(match cenv.address(Namespace::Value, *id) {
            Some((depth, index)) => Prep::LocalRef { depth, index },
            None => Prep::GlobalRef { namespace: Namespace::Value, var: *id },
        }),
        Value::EmptyList => Err(empty_list_form()),
        Value::Cons(_) => preprocess_compound(ev, form, cenv),
        other => Ok(Prep::Const(other.clone())),
    }
}

fn preprocess_compound(
    ev: &mut Evaluator,
    form: &Value,
    cenv: &mut CompEnv,
) -> Result<Prep, Error> {
    let (head, args) = split_form(form)?;

    if let Value::Variable(id) = &head {
        if let Some(special) = analyze(&ev.ops, *id, &args)? {
            return preprocess_special(ev, special, cenv);
        }
        if let Some(closure) = macro_for_head(ev, cenv, *id) {
            let expansion = expand_at_preprocess(ev, closure, args)?;
            return preprocess(ev, &expansion, cenv);
        }
        let head_prep = match cenv.address(Namespace::Function, *id) {
            Some((depth, index)) => Prep::LocalRef { depth, index },
            None => Prep::GlobalRef { namespace: Namespace::Function, var: *id },
        };
        let arg_preps = preprocess_all(ev, &args, cenv)?;
        return Ok(Prep::Call {
            shape: CallShape::Call,
            head: Rc::new(head_prep),
            args: arg_preps,
        });
    }

    if let Some(call) = recognize_macro_binding(ev, &head, &args, cenv)? {
        return Ok(call);
    }

    let head_prep = preprocess(ev, &head, cenv)?;
    let arg_preps = preprocess_all(ev, &args, cenv)?;
    Ok(Prep::Call {
        shape: CallShape::Call,
        head: Rc::new(head_prep),
        args: arg_preps,
    })
}

fn preprocess_all(
    ev: &mut Evaluator,
    forms: &[Value],
    cenv: &mut CompEnv,
) -> Result<Vec<Rc<Prep>>, Error> {
    forms
        .iter()
        .map(|form| preprocess(ev, form, cenv).map(Rc::new))
        .collect()
}

fn preprocess_special(
    ev: &mut Evaluator,
    special: SpecialForm,
    cenv: &mut CompEnv,
) -> Result<Prep, Error> {
    match special {
        SpecialForm::Quote(object) => Ok(Prep::Const(object)),
        SpecialForm::Progn(forms) => {
            Ok(Prep::Progn(Rc::new(preprocess_all(ev, &forms, cenv)?)))
        }
        SpecialForm::If { test, then, els } => Ok(Prep::If {
            test: Rc::new(preprocess(ev, &test, cenv)?),
            then: Rc::new(preprocess(ev, &then, cenv)?),
            els: Rc::new(preprocess(ev, &els, cenv)?),
        }),
        SpecialForm::Lambda(spec) => {
            Ok(Prep::Lambda(Rc::new(compile_lambda(ev, &spec, cenv)?)))
        }
        SpecialForm::Ref { namespace, dynamic, var } => {
            if dynamic {
                return Ok(Prep::DynRef { var });
            }
            Ok(match cenv.address(namespace, var) {
                Some((depth, index)) => Prep::LocalRef { depth, index },
                None => Prep::GlobalRef { namespace, var },
            })
        }
        SpecialForm::Set { namespace, dynamic, var, expr } => {
            let expr = Rc::new(preprocess(ev, &expr, cenv)?);
            if dynamic {
                return Ok(Prep::DynSet { var, expr });
            }
            Ok(match cenv.address(namespace, var) {
                Some((depth, index)) => Prep::LocalSet { depth, index, expr },
                None => Prep::GlobalSet { namespace, var, expr },
            })
        }
        SpecialForm::ForEach { .. } => Ok(Prep::ForEach),
        SpecialForm::CatchErrors(form) => {
            Ok(Prep::CatchErrors(Rc::new(preprocess(ev, &form, cenv)?)))
        }
        SpecialForm::Apply { function, forms } => {
            preprocess_call_shape(ev, CallShape::Apply, &function, &forms, cenv)
        }
        SpecialForm::MultipleValueCall { function, forms } => preprocess_call_shape(
            ev,
            CallShape::MultipleValueCall,
            &function,
            &forms,
            cenv,
        ),
        SpecialForm::MultipleValueApply { function, forms } => {
            preprocess_call_shape(
                ev,
                CallShape::MultipleValueApply,
                &function,
                &forms,
                cenv,
            )
        }
    }
}

fn preprocess_call_shape(
    ev: &mut Evaluator,
    shape: CallShape,
    function: &Value,
    forms: &[Value],
    cenv: &mut CompEnv,
) -> Result<Prep, Error> {
    let head = match function {
        Value::Variable(id) => match cenv.address(Namespace::Function, *id) {
            Some((depth, index)) => Prep::LocalRef { depth, index },
            None => Prep::GlobalRef { namespace: Namespace::Function, var: *id },
        },
        other => preprocess(ev, other, cenv)?,
    };
    Ok(Prep::Call {
        shape,
        head: Rc::new(head),
        args: preprocess_all(ev, forms, cenv)?,
    })
}

/// Compiles a lambda's body in the compile chain the closure body will
/// run in. Lexical lambdas push the mirror of their call frame; dynamic
/// lambdas bind their parameters dynamically, so their body sees the
/// unextended chain.
fn compile_lambda(
    ev: &mut Evaluator,
    spec: &LambdaSpec,
    cenv: &mut CompEnv,
) -> Result<PrepLambda, Error> {
    let body = match spec.scope {
        Scope::Lexical => {
            cenv.frames.push(CompFrame {
                namespace: spec.namespace,
                vars: spec.params.clone(),
                macros: None,
            });
            let body = preprocess_all(ev, &spec.body, cenv);
            cenv.frames.pop();
            body?
        }
        Scope::Dynamic => preprocess_all(ev, &spec.body, cenv)?,
    };
    Ok(PrepLambda {
        scope: spec.scope,
        namespace: spec.namespace,
        is_macro: spec.is_macro,
        params: spec.params.clone(),
        rest: spec.rest,
        body: Rc::new(body),
    })
}

//===----------------------------------------------------------------------===//
// Preprocess-time macro expansion
//===----------------------------------------------------------------------===//

/// A call whose head is an `_flambda` and whose operands are all
/// `_mlambda`s is a scope-local macro binding. The macro closures are
/// produced in a null environment, bound in a function-namespace compile
/// frame, the body is preprocessed within that extension, and the whole
/// thing is wrapped back up as a call with the synthesized operator.
fn recognize_macro_binding(
    ev: &mut Evaluator,
    head: &Value,
    args: &[Value],
    cenv: &mut CompEnv,
) -> Result<Option<Prep>, Error> {
    let Some(fspec) = lambda_spec_of(ev, head, |id, ops| id == ops.flambda)? else {
        return Ok(None);
    };
    let mut macro_values = Vec::with_capacity(args.len());
    for arg in args {
        let Some(mspec) = lambda_spec_of(ev, arg, |id, ops| id == ops.mlambda)?
        else {
            return Ok(None);
        };
        let mut null_env = CompEnv::new();
        let lambda = compile_lambda(ev, &mspec, &mut null_env)?;
        macro_values.push(lambda.close_over(None));
    }

    cenv.frames.push(CompFrame {
        namespace: Namespace::Function,
        vars: fspec.params.clone(),
        macros: Some(macro_values.clone()),
    });
    let body = preprocess_all(ev, &fspec.body, cenv);
    cenv.frames.pop();

    let operator = PrepLambda {
        scope: fspec.scope,
        namespace: fspec.namespace,
        is_macro: fspec.is_macro,
        params: fspec.params.clone(),
        rest: fspec.rest,
        body: Rc::new(body?),
    };
    Ok(Some(Prep::Call {
        shape: CallShape::Call,
        head: Rc::new(Prep::Lambda(Rc::new(operator))),
        args: macro_values
            .into_iter()
            .map(|closure| Rc::new(Prep::Const(closure)))
            .collect(),
    }))
}

/// Analyzes `form` as a lambda special form when its head matches the
/// given operator.
fn lambda_spec_of(
    ev: &Evaluator,
    form: &Value,
    wanted: impl Fn(VarId, &crate::analyzer::SpecialForms) -> bool,
) -> Result<Option<LambdaSpec>, Error> {
    if !matches!(form, Value::Cons(_)) {
        return Ok(None);
    }
    let (head, args) = split_form(form)?;
    let Value::Variable(id) = head else {
        return Ok(None);
    };
    if !wanted(id, &ev.ops) {
        return Ok(None);
    }
    match analyze(&ev.ops, id, &args)? {
        Some(SpecialForm::Lambda(spec)) => Ok(Some(spec)),
        _ => Ok(None),
    }
}

/// Runs a macro closure on the unevaluated operand forms and returns the
/// expansion.
fn expand_at_preprocess(
    ev: &mut Evaluator,
    closure: Rc<Closure>,
    forms: Vec<Value>,
) -> Result<Value, Error> {
    let slots = closure_slots(&closure, forms, None)?;
    let body = compiled_body(&closure)?;
    let frame = ev.push_frame(
        closure.namespace,
        closure.params.clone(),
        slots,
        closure.env,
    );
    let expansion: Values = trampolinepp::run_body(ev, &body, Some(frame))?;
    Ok(expansion.primary())
}

/// Bodies of closures created under this strategy are always compiled.
pub(crate) fn compiled_body(closure: &Closure) -> Result<Rc<PrepBody>, Error> {
    match &closure.body {
        ClosureBody::Compiled(body) => Ok(body.clone()),
        ClosureBody::Source(_) => Err(Error::CannotHappen(
            "a source closure reached the preprocessing evaluator".to_string(),
        )),
    }
}

/// Macro closures cannot survive to runtime call position under this
/// strategy; calling one is a misuse.
pub(crate) fn runtime_macro_error() -> Error {
    macro_misuse()
}
