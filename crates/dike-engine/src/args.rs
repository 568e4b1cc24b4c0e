//! Argument tuples.
//!
//! [`Args`] holds the candidate set of every argument position of a function
//! call and iterates their cartesian product. After evaluation, argument
//! values that contributed to no successful tuple are invalidated, which
//! cascades the failure back into the variables they came from.

use std::collections::HashSet;
use std::rc::Rc;

use crate::value::{Value, Values};

/// Per-argument candidate sets, iterated as tuples.
#[derive(Debug, Default)]
pub struct Args {
    args: Vec<Values>,
}

impl Args {
    /// Creates an empty argument list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the candidate set of the next argument position.
    pub fn push(&mut self, values: Values) {
        self.args.push(values);
    }

    /// Number of argument positions.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Number of tuples in the cartesian product.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.args.is_empty() {
            return 0;
        }
        self.args.iter().map(Values::len).product()
    }

    /// True when there are no tuples to evaluate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`-th tuple, in mixed-radix order.
    #[must_use]
    pub fn tuple(&self, index: usize) -> Values {
        let mut remainder = index;
        let mut tuple = Vec::with_capacity(self.args.len());
        for values in self.args.iter().rev() {
            let digit = remainder % values.len();
            remainder /= values.len();
            tuple.push(Rc::clone(&values[digit]));
        }
        tuple.reverse();
        tuple
    }

    /// Invalidates every argument value that is not in `valid` (the values
    /// that appeared in at least one successful tuple).
    pub fn mark_invalid(&self, valid: &HashSet<usize>) {
        for values in &self.args {
            for value in values {
                if !valid.contains(&value_key(value)) {
                    value.mark_as_invalid();
                }
            }
        }
    }
}

/// Identity key for a value (pointer identity, not structural).
#[must_use]
pub fn value_key(value: &Value) -> usize {
    Rc::as_ptr(value) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueDef;
    use dike_ast::{build, Ast};

    fn int_value(ast: &mut Ast, text: &str) -> Value {
        let term = build!(ast, (Term (Scalar (JSONInt ^ text))));
        ValueDef::new(term)
    }

    #[test]
    fn test_cartesian_product() {
        let mut ast = Ast::new();
        let mut args = Args::new();
        args.push(vec![int_value(&mut ast, "1"), int_value(&mut ast, "2")]);
        args.push(vec![int_value(&mut ast, "10"), int_value(&mut ast, "20")]);
        assert_eq!(args.len(), 4);
        let reprs: Vec<(String, String)> = (0..args.len())
            .map(|i| {
                let tuple = args.tuple(i);
                (tuple[0].json(&ast), tuple[1].json(&ast))
            })
            .collect();
        assert!(reprs.contains(&("1".to_string(), "10".to_string())));
        assert!(reprs.contains(&("2".to_string(), "20".to_string())));
    }

    #[test]
    fn test_empty_args_have_no_tuples() {
        let args = Args::new();
        assert!(args.is_empty());
    }

    #[test]
    fn test_mark_invalid_spares_used_values() {
        let mut ast = Ast::new();
        let good = int_value(&mut ast, "1");
        let bad = int_value(&mut ast, "2");
        let mut args = Args::new();
        args.push(vec![Rc::clone(&good), Rc::clone(&bad)]);
        let mut valid = HashSet::new();
        valid.insert(value_key(&good));
        args.mark_invalid(&valid);
        assert!(good.is_valid());
        assert!(!bad.is_valid());
    }
}
