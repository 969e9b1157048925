use std::rc::Rc;

use crate::env::Globals;
use crate::error::{Error, EvaluatorError};
use crate::interner;
use crate::value::{
    cons, eq, eql, list_from_vec, Namespace, Primitive, Value, Values,
};

//===----------------------------------------------------------------------===//
// Registry
//===----------------------------------------------------------------------===//

/// The host-implemented functions of the object language. INITIALIZE
/// installs each under its name in the function namespace; the object
/// language aliases them (`(fset! + (fref _+))`) as it sees fit.
static PRIMITIVES: &[Primitive] = &[
    Primitive { name: "_+", min_args: 0, max_args: None, func: prim_add },
    Primitive { name: "_-", min_args: 1, max_args: None, func: prim_sub },
    Primitive { name: "_*", min_args: 0, max_args: None, func: prim_mul },
    Primitive { name: "_/", min_args: 1, max_args: None, func: prim_div },
    Primitive { name: "_=", min_args: 2, max_args: None, func: prim_num_eq },
    Primitive { name: "_<", min_args: 2, max_args: None, func: prim_lt },
    Primitive { name: "_>", min_args: 2, max_args: None, func: prim_gt },
    Primitive { name: "_<=", min_args: 2, max_args: None, func: prim_le },
    Primitive { name: "_>=", min_args: 2, max_args: None, func: prim_ge },
    Primitive { name: "eq?", min_args: 2, max_args: Some(2), func: prim_eq },
    Primitive { name: "eql?", min_args: 2, max_args: Some(2), func: prim_eql },
    Primitive { name: "cons", min_args: 2, max_args: Some(2), func: prim_cons },
    Primitive { name: "car", min_args: 1, max_args: Some(1), func: prim_car },
    Primitive { name: "cdr", min_args: 1, max_args: Some(1), func: prim_cdr },
    Primitive { name: "set-car!", min_args: 2, max_args: Some(2), func: prim_set_car },
    Primitive { name: "set-cdr!", min_args: 2, max_args: Some(2), func: prim_set_cdr },
    Primitive { name: "list", min_args: 0, max_args: None, func: prim_list },
    Primitive { name: "vector", min_args: 0, max_args: None, func: prim_vector },
    Primitive { name: "make-vector", min_args: 1, max_args: Some(2), func: prim_make_vector },
    Primitive { name: "vector-length", min_args: 1, max_args: Some(1), func: prim_vector_length },
    Primitive { name: "vector-ref", min_args: 2, max_args: Some(2), func: prim_vector_ref },
    Primitive { name: "vector-set!", min_args: 3, max_args: Some(3), func: prim_vector_set },
    Primitive { name: "string->variable", min_args: 1, max_args: Some(1), func: prim_string_to_variable },
    Primitive { name: "variable-name", min_args: 1, max_args: Some(1), func: prim_variable_name },
    Primitive { name: "error", min_args: 1, max_args: None, func: prim_error },
    Primitive { name: "values", min_args: 0, max_args: None, func: prim_values },
];

/// Binds every primitive in the function namespace of its variable.
pub fn install(globals: &mut Globals) {
    for primitive in PRIMITIVES {
        globals.set(
            Namespace::Function,
            interner::intern_var(primitive.name),
            Value::Primitive(primitive),
        );
    }
}

//===----------------------------------------------------------------------===//
// Helpers
//===----------------------------------------------------------------------===//

fn type_error(expected: &str, got: &Value) -> Error {
    Error::Evaluator(EvaluatorError::General(format!(
        "expected a {}, got a {}",
        expected,
        got.type_name()
    )))
}

fn number(value: &Value) -> Result<f64, Error> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(type_error("number", other)),
    }
}

fn numbers(args: &[Value]) -> Result<Vec<f64>, Error> {
    args.iter().map(number).collect()
}

fn index(value: &Value, len: usize) -> Result<usize, Error> {
    let n = number(value)?;
    if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
        return Err(Error::Evaluator(EvaluatorError::General(format!(
            "index {} is out of range for length {}",
            value, len
        ))));
    }
    Ok(n as usize)
}

fn chain_compare(
    args: &[Value],
    holds: impl Fn(f64, f64) -> bool,
) -> Result<Values, Error> {
    let ns = numbers(args)?;
    let ok = ns.windows(2).all(|w| holds(w[0], w[1]));
    Ok(Values::single(Value::Boolean(ok)))
}

fn single(value: Value) -> Result<Values, Error> {
    Ok(Values::single(value))
}

//===----------------------------------------------------------------------===//
// Arithmetic and comparison
//===----------------------------------------------------------------------===//

fn prim_add(args: &[Value]) -> Result<Values, Error> {
    single(Value::Number(numbers(args)?.iter().sum()))
}

fn prim_sub(args: &[Value]) -> Result<Values, Error> {
    let ns = numbers(args)?;
    let result = if ns.len() == 1 {
        -ns[0]
    } else {
        ns[1..].iter().fold(ns[0], |acc, n| acc - n)
    };
    single(Value::Number(result))
}

fn prim_mul(args: &[Value]) -> Result<Values, Error> {
    single(Value::Number(numbers(args)?.iter().product()))
}

fn prim_div(args: &[Value]) -> Result<Values, Error> {
    let ns = numbers(args)?;
    let result = if ns.len() == 1 {
        1.0 / ns[0]
    } else {
        ns[1..].iter().fold(ns[0], |acc, n| acc / n)
    };
    single(Value::Number(result))
}

fn prim_num_eq(args: &[Value]) -> Result<Values, Error> {
    chain_compare(args, |a, b| a == b)
}

fn prim_lt(args: &[Value]) -> Result<Values, Error> {
    chain_compare(args, |a, b| a < b)
}

fn prim_gt(args: &[Value]) -> Result<Values, Error> {
    chain_compare(args, |a, b| a > b)
}

fn prim_le(args: &[Value]) -> Result<Values, Error> {
    chain_compare(args, |a, b| a <= b)
}

fn prim_ge(args: &[Value]) -> Result<Values, Error> {
    chain_compare(args, |a, b| a >= b)
}

//===----------------------------------------------------------------------===//
// Identity
//===----------------------------------------------------------------------===//

fn prim_eq(args: &[Value]) -> Result<Values, Error> {
    single(Value::Boolean(eq(&args[0], &args[1])))
}

fn prim_eql(args: &[Value]) -> Result<Values, Error> {
    single(Value::Boolean(eql(&args[0], &args[1])))
}

//===----------------------------------------------------------------------===//
// Lists
//===----------------------------------------------------------------------===//

fn prim_cons(args: &[Value]) -> Result<Values, Error> {
    single(cons(args[0].clone(), args[1].clone()))
}

fn prim_car(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Cons(cell) => single(cell.car.borrow().clone()),
        other => Err(type_error("cons", other)),
    }
}

fn prim_cdr(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Cons(cell) => single(cell.cdr.borrow().clone()),
        other => Err(type_error("cons", other)),
    }
}

fn prim_set_car(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Cons(cell) => {
            *cell.car.borrow_mut() = args[1].clone();
            single(Value::Void)
        }
        other => Err(type_error("cons", other)),
    }
}

fn prim_set_cdr(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Cons(cell) => {
            *cell.cdr.borrow_mut() = args[1].clone();
            single(Value::Void)
        }
        other => Err(type_error("cons", other)),
    }
}

fn prim_list(args: &[Value]) -> Result<Values, Error> {
    single(list_from_vec(args.to_vec()))
}

//===----------------------------------------------------------------------===//
// Vectors
//===----------------------------------------------------------------------===//

fn prim_vector(args: &[Value]) -> Result<Values, Error> {
    single(Value::vector(args.to_vec()))
}

fn prim_make_vector(args: &[Value]) -> Result<Values, Error> {
    let n = number(&args[0])?;
    if n.fract() != 0.0 || n < 0.0 {
        return Err(Error::Evaluator(EvaluatorError::General(format!(
            "{} is not a valid vector length",
            args[0]
        ))));
    }
    let fill = args.get(1).cloned().unwrap_or(Value::Void);
    single(Value::vector(vec![fill; n as usize]))
}

fn prim_vector_length(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Vector(items) => {
            single(Value::Number(items.borrow().len() as f64))
        }
        other => Err(type_error("vector", other)),
    }
}

fn prim_vector_ref(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Vector(items) => {
            let items = items.borrow();
            let i = index(&args[1], items.len())?;
            single(items[i].clone())
        }
        other => Err(type_error("vector", other)),
    }
}

fn prim_vector_set(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Vector(items) => {
            let mut items = items.borrow_mut();
            let i = index(&args[1], items.len())?;
            items[i] = args[2].clone();
            single(Value::Void)
        }
        other => Err(type_error("vector", other)),
    }
}

//===----------------------------------------------------------------------===//
// Variables, errors, values
//===----------------------------------------------------------------------===//

fn prim_string_to_variable(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Str(s) => {
            single(Value::Variable(interner::intern_var(s)))
        }
        other => Err(type_error("string", other)),
    }
}

fn prim_variable_name(args: &[Value]) -> Result<Values, Error> {
    match &args[0] {
        Value::Variable(id) => {
            single(Value::Str(Rc::from(interner::var_name(*id).as_str())))
        }
        other => Err(type_error("variable", other)),
    }
}

/// Raises a user error; `_catch-errors` reports it as "Error".
fn prim_error(args: &[Value]) -> Result<Values, Error> {
    let message = match &args[0] {
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    };
    Err(Error::Raised(message))
}

fn prim_values(args: &[Value]) -> Result<Values, Error> {
    Ok(Values::multiple(args.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Values, Error> {
        let primitive = PRIMITIVES
            .iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("no primitive {}", name));
        (primitive.func)(args)
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(call("_+", &[num(1.0), num(2.0)]).unwrap().primary().to_string(), "3");
        assert_eq!(call("_+", &[]).unwrap().primary().to_string(), "0");
        assert_eq!(call("_-", &[num(5.0)]).unwrap().primary().to_string(), "-5");
        assert_eq!(
            call("_-", &[num(5.0), num(2.0), num(1.0)]).unwrap().primary().to_string(),
            "2"
        );
        assert_eq!(call("_*", &[num(3.0), num(4.0)]).unwrap().primary().to_string(), "12");
        assert_eq!(call("_/", &[num(8.0), num(2.0)]).unwrap().primary().to_string(), "4");
        assert!(call("_+", &[Value::Boolean(true)]).is_err());
    }

    #[test]
    fn comparison_chains() {
        let t = |r: Result<Values, Error>| match r.unwrap().primary() {
            Value::Boolean(b) => b,
            other => panic!("expected boolean, got {:?}", other),
        };
        assert!(t(call("_<", &[num(1.0), num(2.0), num(3.0)])));
        assert!(!t(call("_<", &[num(1.0), num(3.0), num(2.0)])));
        assert!(t(call("_=", &[num(2.0), num(2.0)])));
        assert!(t(call("_>=", &[num(3.0), num(3.0), num(1.0)])));
    }

    #[test]
    fn cons_cell_mutation() {
        let pair = call("cons", &[num(1.0), num(2.0)]).unwrap().primary();
        assert_eq!(call("car", &[pair.clone()]).unwrap().primary().to_string(), "1");
        assert_eq!(call("cdr", &[pair.clone()]).unwrap().primary().to_string(), "2");
        call("set-car!", &[pair.clone(), num(9.0)]).unwrap();
        assert_eq!(pair.to_string(), "(9 . 2)");
        assert!(call("car", &[num(1.0)]).is_err());
    }

    #[test]
    fn vectors() {
        let v = call("vector", &[num(1.0), num(2.0)]).unwrap().primary();
        assert_eq!(
            call("vector-length", &[v.clone()]).unwrap().primary().to_string(),
            "2"
        );
        call("vector-set!", &[v.clone(), num(0.0), num(7.0)]).unwrap();
        assert_eq!(
            call("vector-ref", &[v.clone(), num(0.0)]).unwrap().primary().to_string(),
            "7"
        );
        assert!(call("vector-ref", &[v.clone(), num(5.0)]).is_err());
        assert!(call("vector-ref", &[v, num(0.5)]).is_err());

        let filled = call("make-vector", &[num(3.0), num(0.0)]).unwrap().primary();
        assert_eq!(filled.to_string(), "#(0 0 0)");
    }

    #[test]
    fn variable_bridging() {
        let var = call("string->variable", &[Value::string("spindle")])
            .unwrap()
            .primary();
        assert!(matches!(var, Value::Variable(_)));
        let name = call("variable-name", &[var]).unwrap().primary();
        assert_eq!(name.to_string(), "\"spindle\"");
    }

    #[test]
    fn error_raises_the_user_kind() {
        match call("error", &[Value::string("boom")]) {
            Err(e) => assert_eq!(e.kind_name(), "Error"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn values_carries_zero_or_more() {
        let none = call("values", &[]).unwrap();
        assert!(matches!(none.primary(), Value::Void));
        let two = call("values", &[num(1.0), num(2.0)]).unwrap();
        assert_eq!(two.all().len(), 2);
    }
}
