use crate::error::{Error, EvaluatorError};
use crate::interner::VarId;
use crate::value::{improper_list_from_vec, list_from_vec, Value};

//===----------------------------------------------------------------------===//
// Argument → parameter pairing
//===----------------------------------------------------------------------===//
//
// Four disjoint cases (call vs apply × rest vs no-rest) with the uniform
// error taxonomy. When `rest` is set the trailing parameter receives a
// fresh proper list of the remaining arguments; under apply-with-rest the
// spreadable tail may be adopted by reference past the rest boundary.

/// Pairs directly passed arguments against the parameter vector. Returns
/// the slot values, one per parameter.
pub fn pair_call(
    params: &[VarId],
    rest: bool,
    args: Vec<Value>,
) -> Result<Vec<Value>, Error> {
    if !rest {
        if args.len() < params.len() {
            return Err(too_few(params.len(), args.len()));
        }
        if args.len() > params.len() {
            return Err(too_many(params.len(), args.len()));
        }
        return Ok(args);
    }

    let fixed = params.len() - 1;
    if args.len() < fixed {
        return Err(too_few(fixed, args.len()));
    }
    let mut slots = args;
    let remainder = slots.split_off(fixed);
    slots.push(list_from_vec(remainder));
    Ok(slots)
}

/// Pairs arguments for `apply`: the leading arguments followed by a
/// spreadable sequence that must be a proper list.
pub fn pair_apply(
    params: &[VarId],
    rest: bool,
    args: Vec<Value>,
    spread: Value,
) -> Result<Vec<Value>, Error> {
    let spread_len = proper_length(&spread).ok_or(Error::Evaluator(
        EvaluatorError::MalformedSpreadableSequenceOfObjects,
    ))?;
    let total = args.len() + spread_len;

    if !rest {
        if total < params.len() {
            return Err(too_few(params.len(), total));
        }
        if total > params.len() {
            return Err(too_many(params.len(), total));
        }
        let mut slots = args;
        let mut cursor = spread;
        while slots.len() < params.len() {
            let Value::Cons(cell) = cursor else {
                return Err(Error::CannotHappen(
                    "spreadable sequence shrank during pairing".to_string(),
                ));
            };
            slots.push(cell.car.borrow().clone());
            let next = cell.cdr.borrow().clone();
            cursor = next;
        }
        return Ok(slots);
    }

    let fixed = params.len() - 1;
    if total < fixed {
        return Err(too_few(fixed, total));
    }
    let mut slots = Vec::with_capacity(params.len());
    let mut direct = args.into_iter();
    let mut cursor = spread;
    while slots.len() < fixed {
        match direct.next() {
            Some(arg) => slots.push(arg),
            None => {
                let Value::Cons(cell) = cursor else {
                    return Err(Error::CannotHappen(
                        "spreadable sequence shrank during pairing".to_string(),
                    ));
                };
                slots.push(cell.car.borrow().clone());
                let next = cell.cdr.borrow().clone();
                cursor = next;
            }
        }
    }
    // Any direct arguments left become fresh conses; the rest of the
    // spreadable tail is adopted by reference (structure sharing).
    let leftover: Vec<Value> = direct.collect();
    slots.push(improper_list_from_vec(leftover, cursor));
    Ok(slots)
}

fn too_few(expected: usize, got: usize) -> Error {
    Error::Evaluator(EvaluatorError::TooFewArguments { expected, got })
}

fn too_many(expected: usize, got: usize) -> Error {
    Error::Evaluator(EvaluatorError::TooManyArguments { expected, got })
}

/// Length of a proper list; `None` for dotted lists and non-lists.
fn proper_length(value: &Value) -> Option<usize> {
    let mut len = 0;
    let mut cursor = value.clone();
    loop {
        match cursor {
            Value::EmptyList => return Some(len),
            Value::Cons(cell) => {
                len += 1;
                let next = cell.cdr.borrow().clone();
                cursor = next;
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::intern_var;
    use crate::list;
    use crate::value::{cons, eq, list_to_vec};

    fn params(names: &[&str]) -> Vec<VarId> {
        names.iter().map(|n| intern_var(n)).collect()
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn call_without_rest_demands_exact_arity() {
        let ps = params(&["a", "b"]);
        let slots = pair_call(&ps, false, vec![num(1.0), num(2.0)]).unwrap();
        assert_eq!(slots.len(), 2);

        assert!(matches!(
            pair_call(&ps, false, vec![num(1.0)]),
            Err(Error::Evaluator(EvaluatorError::TooFewArguments { expected: 2, got: 1 }))
        ));
        assert!(matches!(
            pair_call(&ps, false, vec![num(1.0), num(2.0), num(3.0)]),
            Err(Error::Evaluator(EvaluatorError::TooManyArguments { expected: 2, got: 3 }))
        ));
    }

    #[test]
    fn call_with_rest_collects_remainder() {
        let ps = params(&["a", "r"]);
        let slots =
            pair_call(&ps, true, vec![num(1.0), num(2.0), num(3.0)]).unwrap();
        assert_eq!(slots[0].to_string(), "1");
        assert_eq!(slots[1].to_string(), "(2 3)");

        // The rest slot may be empty.
        let slots = pair_call(&ps, true, vec![num(1.0)]).unwrap();
        assert_eq!(slots[1].to_string(), "()");

        assert!(matches!(
            pair_call(&ps, true, vec![]),
            Err(Error::Evaluator(EvaluatorError::TooFewArguments { .. }))
        ));
    }

    #[test]
    fn apply_without_rest_spreads_the_tail() {
        let ps = params(&["a", "b", "c"]);
        let spread = list![num(2.0), num(3.0)];
        let slots = pair_apply(&ps, false, vec![num(1.0)], spread).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].to_string(), "3");

        assert!(matches!(
            pair_apply(&ps, false, vec![num(1.0)], list![num(2.0)]),
            Err(Error::Evaluator(EvaluatorError::TooFewArguments { .. }))
        ));
        assert!(matches!(
            pair_apply(&ps, false, vec![], list![num(1.0), num(2.0), num(3.0), num(4.0)]),
            Err(Error::Evaluator(EvaluatorError::TooManyArguments { .. }))
        ));
    }

    #[test]
    fn apply_rejects_improper_spread() {
        let ps = params(&["a"]);
        let dotted = cons(num(1.0), num(2.0));
        assert!(matches!(
            pair_apply(&ps, false, vec![], dotted.clone()),
            Err(Error::Evaluator(
                EvaluatorError::MalformedSpreadableSequenceOfObjects
            ))
        ));
        assert!(matches!(
            pair_apply(&ps, false, vec![], num(5.0)),
            Err(Error::Evaluator(
                EvaluatorError::MalformedSpreadableSequenceOfObjects
            ))
        ));
    }

    #[test]
    fn apply_with_rest_shares_the_tail() {
        let ps = params(&["a", "r"]);
        let shared_tail = list![num(2.0), num(3.0)];
        let slots =
            pair_apply(&ps, true, vec![num(1.0)], shared_tail.clone()).unwrap();
        assert_eq!(slots[0].to_string(), "1");
        // The whole spread list is adopted by reference.
        assert!(eq(&slots[1], &shared_tail));
    }

    #[test]
    fn apply_with_rest_mixes_direct_and_spread() {
        let ps = params(&["a", "r"]);
        let spread = list![num(3.0)];
        let slots = pair_apply(&ps, true, vec![num(1.0), num(2.0)], spread.clone())
            .unwrap();
        assert_eq!(slots[0].to_string(), "1");
        let rest = list_to_vec(&slots[1]).unwrap();
        assert_eq!(rest.len(), 2);
        // The trailing cons of the rest list is the spread list itself.
        match &slots[1] {
            Value::Cons(cell) => {
                let tail = cell.cdr.borrow().clone();
                assert!(eq(&tail, &spread));
            }
            other => panic!("expected cons, got {:?}", other),
        }
    }

    #[test]
    fn apply_spread_fills_fixed_parameters_first() {
        let ps = params(&["a", "b", "r"]);
        let spread = list![num(2.0), num(3.0), num(4.0)];
        let slots = pair_apply(&ps, true, vec![num(1.0)], spread).unwrap();
        assert_eq!(slots[0].to_string(), "1");
        assert_eq!(slots[1].to_string(), "2");
        assert_eq!(slots[2].to_string(), "(3 4)");
    }
}
