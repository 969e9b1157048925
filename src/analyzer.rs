use crate::error::Error;
use crate::interner::{self, VarId};
use crate::value::{Namespace, Scope, Value};

//===----------------------------------------------------------------------===//
// Special operators
//===----------------------------------------------------------------------===//

/// The interned ids of every recognized special operator, resolved once
/// per evaluator so head dispatch is an id comparison.
#[derive(Debug)]
pub struct SpecialForms {
    pub quote: VarId,
    pub progn: VarId,
    pub if_: VarId,
    pub vlambda: VarId,
    pub mlambda: VarId,
    pub flambda: VarId,
    pub dlambda: VarId,
    pub vref: VarId,
    pub vset: VarId,
    pub fref: VarId,
    pub fset: VarId,
    pub dref: VarId,
    pub dset: VarId,
    pub for_each: VarId,
    pub catch_errors: VarId,
    pub apply: VarId,
    pub mv_call: VarId,
    pub mv_apply: VarId,
}

impl SpecialForms {
    pub fn new() -> Self {
        Self {
            quote: interner::intern_var("quote"),
            progn: interner::intern_var("progn"),
            if_: interner::intern_var("if"),
            vlambda: interner::intern_var("_vlambda"),
            mlambda: interner::intern_var("_mlambda"),
            flambda: interner::intern_var("_flambda"),
            dlambda: interner::intern_var("_dlambda"),
            vref: interner::intern_var("vref"),
            vset: interner::intern_var("vset!"),
            fref: interner::intern_var("fref"),
            fset: interner::intern_var("fset!"),
            dref: interner::intern_var("dref"),
            dset: interner::intern_var("dset!"),
            for_each: interner::intern_var("_for-each"),
            catch_errors: interner::intern_var("_catch-errors"),
            apply: interner::intern_var("apply"),
            mv_call: interner::intern_var("multiple-value-call"),
            mv_apply: interner::intern_var("multiple-value-apply"),
        }
    }

    pub fn is_special(&self, id: VarId) -> bool {
        [
            self.quote,
            self.progn,
            self.if_,
            self.vlambda,
            self.mlambda,
            self.flambda,
            self.dlambda,
            self.vref,
            self.vset,
            self.fref,
            self.fset,
            self.dref,
            self.dset,
            self.for_each,
            self.catch_errors,
            self.apply,
            self.mv_call,
            self.mv_apply,
        ]
        .contains(&id)
    }
}

/// The validated, destructured parts of a special-operator form.
#[derive(Debug, Clone)]
pub enum SpecialForm {
    Quote(Value),
    Progn(Vec<Value>),
    If { test: Value, then: Value, els: Value },
    Lambda(LambdaSpec),
    Ref { namespace: Namespace, dynamic: bool, var: VarId },
    Set { namespace: Namespace, dynamic: bool, var: VarId, expr: Value },
    ForEach { function: Value, list: Value },
    CatchErrors(Value),
    Apply { function: Value, forms: Vec<Value> },
    MultipleValueCall { function: Value, forms: Vec<Value> },
    MultipleValueApply { function: Value, forms: Vec<Value> },
}

#[derive(Debug, Clone)]
pub struct LambdaSpec {
    pub scope: Scope,
    pub namespace: Namespace,
    pub is_macro: bool,
    pub params: Vec<VarId>,
    pub rest: bool,
    pub body: Vec<Value>,
}

//===----------------------------------------------------------------------===//
// Analysis
//===----------------------------------------------------------------------===//

/// Validates the shape of a form whose head is a recognized special
/// operator and returns its parts; `Ok(None)` when the head is not
/// special (the form is an ordinary call).
pub fn analyze(
    ops: &SpecialForms,
    head: VarId,
    args: &[Value],
) -> Result<Option<SpecialForm>, Error> {
    let form = if head == ops.quote {
        SpecialForm::Quote(exactly_one(args, "quote")?.clone())
    } else if head == ops.progn {
        SpecialForm::Progn(args.to_vec())
    } else if head == ops.if_ {
        // Ternary: there is no implicit else branch.
        if args.len() != 3 {
            return Err(shape_error("if", "a test, a consequent and an alternative", args.len()));
        }
        SpecialForm::If {
            test: args[0].clone(),
            then: args[1].clone(),
            els: args[2].clone(),
        }
    } else if head == ops.vlambda {
        SpecialForm::Lambda(analyze_lambda(args, "_vlambda", Scope::Lexical, Namespace::Value, false)?)
    } else if head == ops.mlambda {
        SpecialForm::Lambda(analyze_lambda(args, "_mlambda", Scope::Lexical, Namespace::Value, true)?)
    } else if head == ops.flambda {
        SpecialForm::Lambda(analyze_lambda(args, "_flambda", Scope::Lexical, Namespace::Function, false)?)
    } else if head == ops.dlambda {
        SpecialForm::Lambda(analyze_lambda(args, "_dlambda", Scope::Dynamic, Namespace::Value, false)?)
    } else if head == ops.vref {
        analyze_ref(args, "vref", Namespace::Value, false)?
    } else if head == ops.fref {
        analyze_ref(args, "fref", Namespace::Function, false)?
    } else if head == ops.dref {
        analyze_ref(args, "dref", Namespace::Value, true)?
    } else if head == ops.vset {
        analyze_set(args, "vset!", Namespace::Value, false)?
    } else if head == ops.fset {
        analyze_set(args, "fset!", Namespace::Function, false)?
    } else if head == ops.dset {
        analyze_set(args, "dset!", Namespace::Value, true)?
    } else if head == ops.for_each {
        if args.len() != 2 {
            return Err(shape_error("_for-each", "a function form and a list form", args.len()));
        }
        SpecialForm::ForEach { function: args[0].clone(), list: args[1].clone() }
    } else if head == ops.catch_errors {
        SpecialForm::CatchErrors(exactly_one(args, "_catch-errors")?.clone())
    } else if head == ops.apply {
        if args.len() < 2 {
            return Err(shape_error("apply", "a function form and at least a spreadable form", args.len()));
        }
        SpecialForm::Apply { function: args[0].clone(), forms: args[1..].to_vec() }
    } else if head == ops.mv_call {
        if args.is_empty() {
            return Err(shape_error("multiple-value-call", "a function form", 0));
        }
        SpecialForm::MultipleValueCall {
            function: args[0].clone(),
            forms: args[1..].to_vec(),
        }
    } else if head == ops.mv_apply {
        if args.len() < 2 {
            return Err(shape_error("multiple-value-apply", "a function form and at least a spreadable form", args.len()));
        }
        SpecialForm::MultipleValueApply {
            function: args[0].clone(),
            forms: args[1..].to_vec(),
        }
    } else {
        return Ok(None);
    };
    Ok(Some(form))
}

fn exactly_one<'a>(args: &'a [Value], operator: &str) -> Result<&'a Value, Error> {
    match args {
        [one] => Ok(one),
        _ => Err(shape_error(operator, "exactly one form", args.len())),
    }
}

fn shape_error(operator: &str, expected: &str, got: usize) -> Error {
    Error::FormAnalyzer(format!("{} takes {}, got {} form(s)", operator, expected, got))
}

fn analyze_ref(
    args: &[Value],
    operator: &str,
    namespace: Namespace,
    dynamic: bool,
) -> Result<SpecialForm, Error> {
    match exactly_one(args, operator)? {
        Value::Variable(var) => Ok(SpecialForm::Ref { namespace, dynamic, var: *var }),
        other => Err(Error::FormAnalyzer(format!(
            "{} takes a variable, got a {}",
            operator,
            other.type_name()
        ))),
    }
}

fn analyze_set(
    args: &[Value],
    operator: &str,
    namespace: Namespace,
    dynamic: bool,
) -> Result<SpecialForm, Error> {
    if args.len() != 2 {
        return Err(shape_error(operator, "a variable and a form", args.len()));
    }
    match &args[0] {
        Value::Variable(var) => Ok(SpecialForm::Set {
            namespace,
            dynamic,
            var: *var,
            expr: args[1].clone(),
        }),
        other => Err(Error::FormAnalyzer(format!(
            "{} takes a variable, got a {}",
            operator,
            other.type_name()
        ))),
    }
}

fn analyze_lambda(
    args: &[Value],
    operator: &str,
    scope: Scope,
    namespace: Namespace,
    is_macro: bool,
) -> Result<LambdaSpec, Error> {
    let Some((param_form, body)) = args.split_first() else {
        return Err(shape_error(operator, "a parameter list and a body", 0));
    };
    let (params, rest) = analyze_params(param_form, operator)?;
    Ok(LambdaSpec {
        scope,
        namespace,
        is_macro,
        params,
        rest,
        body: body.to_vec(),
    })
}

/// A parameter list is a proper list of distinct variables, optionally
/// ending in a dotted trailing variable that becomes the rest-parameter,
/// or a bare variable meaning "all arguments into this one".
pub fn analyze_params(
    param_form: &Value,
    operator: &str,
) -> Result<(Vec<VarId>, bool), Error> {
    let (params, rest) = match param_form {
        Value::Variable(id) => (vec![*id], true),
        Value::EmptyList => (Vec::new(), false),
        Value::Cons(_) => {
            let mut params = Vec::new();
            let mut cursor = param_form.clone();
            loop {
                match cursor {
                    Value::EmptyList => break (params, false),
                    Value::Variable(id) => {
                        params.push(id);
                        break (params, true);
                    }
                    Value::Cons(cell) => {
                        match &*cell.car.borrow() {
                            Value::Variable(id) => params.push(*id),
                            other => {
                                return Err(Error::FormAnalyzer(format!(
                                    "{} parameter must be a variable, got a {}",
                                    operator,
                                    other.type_name()
                                )));
                            }
                        }
                        let next = cell.cdr.borrow().clone();
                        cursor = next;
                    }
                    other => {
                        return Err(Error::FormAnalyzer(format!(
                            "{} parameter list must end in a variable or the empty list, got a {}",
                            operator,
                            other.type_name()
                        )));
                    }
                }
            }
        }
        other => {
            return Err(Error::FormAnalyzer(format!(
                "{} takes a parameter list or a bare variable, got a {}",
                operator,
                other.type_name()
            )));
        }
    };

    for (i, a) in params.iter().enumerate() {
        if params[i + 1..].contains(a) {
            return Err(Error::FormAnalyzer(format!(
                "{} parameter {} appears more than once",
                operator,
                interner::var_name(*a)
            )));
        }
    }
    Ok((params, rest))
}
