//! Native evaluation engine for the constraint API.
//!
//! The engine executes a circuit definition directly over concrete field
//! values: every assertion is checked eagerly, and the first violation is
//! recorded while evaluation continues (later values stay well-defined, so
//! a full `define` pass always completes). [`Engine::finish`] then reports
//! satisfiability. A witness accepted here is exactly a witness a sound
//! proving backend would accept, which is what the test suite and the
//! reference prover backend rely on.

use crate::api::{Api, HintFn, TableId, Var};
use crate::bn254::{Fr, fr_bit_len, fr_cmp, fr_to_u64};
use crate::poseidon::hash_fields;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    #[error("unsatisfied constraint: {0}")]
    Constraint(String),
    #[error("value of {actual} bits where {bits} allowed ({context})")]
    Range {
        bits: usize,
        actual: usize,
        context: &'static str,
    },
}

#[derive(Default)]
pub struct Engine {
    values: Vec<Fr>,
    tables: Vec<Vec<Fr>>,
    public_inputs: Vec<Fr>,
    violation: Option<CircuitError>,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    /// Concrete value of a variable.
    pub fn value(&self, var: Var) -> Fr {
        self.values[var.0]
    }

    pub fn public_inputs(&self) -> &[Fr] {
        &self.public_inputs
    }

    /// Satisfiability verdict: `Ok` iff no assertion was violated.
    pub fn finish(self) -> Result<(), CircuitError> {
        match self.violation {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn alloc(&mut self, value: Fr) -> Var {
        self.values.push(value);
        Var(self.values.len() - 1)
    }

    fn fail(&mut self, err: CircuitError) {
        if self.violation.is_none() {
            self.violation = Some(err);
        }
    }

    fn check_bits(&mut self, value: &Fr, bits: usize, context: &'static str) {
        let actual = fr_bit_len(value);
        if actual > bits {
            self.fail(CircuitError::Range { bits, actual, context });
        }
    }
}

impl Api for Engine {
    fn constant(&mut self, value: Fr) -> Var {
        self.alloc(value)
    }

    fn witness(&mut self, value: Fr) -> Var {
        self.alloc(value)
    }

    fn public_input(&mut self, value: Fr) -> Var {
        self.public_inputs.push(value);
        self.alloc(value)
    }

    fn add(&mut self, a: Var, b: Var) -> Var {
        let v = self.value(a) + self.value(b);
        self.alloc(v)
    }

    fn sub(&mut self, a: Var, b: Var) -> Var {
        let v = self.value(a) - self.value(b);
        self.alloc(v)
    }

    fn mul(&mut self, a: Var, b: Var) -> Var {
        let v = self.value(a) * self.value(b);
        self.alloc(v)
    }

    fn select(&mut self, cond: Var, if_true: Var, if_false: Var) -> Var {
        self.assert_is_boolean(cond);
        let v = if self.value(cond) == Fr::from(1u64) {
            self.value(if_true)
        } else {
            self.value(if_false)
        };
        self.alloc(v)
    }

    fn is_zero(&mut self, a: Var) -> Var {
        let v = if self.value(a) == Fr::from(0u64) {
            Fr::from(1u64)
        } else {
            Fr::from(0u64)
        };
        self.alloc(v)
    }

    fn assert_is_equal(&mut self, a: Var, b: Var) {
        if self.value(a) != self.value(b) {
            self.fail(CircuitError::Constraint(format!(
                "{:?} != {:?}",
                self.value(a),
                self.value(b)
            )));
        }
    }

    fn assert_is_boolean(&mut self, a: Var) {
        let v = self.value(a);
        if v != Fr::from(0u64) && v != Fr::from(1u64) {
            self.fail(CircuitError::Constraint("value is not boolean".to_owned()));
        }
    }

    fn to_binary(&mut self, a: Var, bits: usize) -> Vec<Var> {
        let value = self.value(a);
        self.check_bits(&value, bits, "binary decomposition");
        // Out-of-range values were already reported; zero bits keep the
        // evaluation going.
        let low = fr_to_u64(&value).unwrap_or(0);
        (0..bits)
            .map(|i| {
                let bit = if i < 64 { (low >> i) & 1 } else { 0 };
                self.alloc(Fr::from(bit))
            })
            .collect()
    }

    fn range_check(&mut self, a: Var, bits: usize) {
        let value = self.value(a);
        self.check_bits(&value, bits, "range check");
    }

    fn cmp(&mut self, a: Var, b: Var, bits: usize) -> Var {
        let left = self.value(a);
        let right = self.value(b);
        self.check_bits(&left, bits, "bounded comparison");
        self.check_bits(&right, bits, "bounded comparison");
        let v = match fr_cmp(&left, &right) {
            std::cmp::Ordering::Less => -Fr::from(1u64),
            std::cmp::Ordering::Equal => Fr::from(0u64),
            std::cmp::Ordering::Greater => Fr::from(1u64),
        };
        self.alloc(v)
    }

    fn assert_is_less_or_equal(&mut self, a: Var, b: Var, bits: usize) {
        let left = self.value(a);
        let right = self.value(b);
        self.check_bits(&left, bits, "bounded le");
        self.check_bits(&right, bits, "bounded le");
        if fr_cmp(&left, &right) == std::cmp::Ordering::Greater {
            self.fail(CircuitError::Constraint(format!(
                "{left:?} > {right:?} in bounded le"
            )));
        }
    }

    fn poseidon(&mut self, inputs: &[Var]) -> Var {
        let values: Vec<Fr> = inputs.iter().map(|&v| self.value(v)).collect();
        let digest = hash_fields(&values);
        self.alloc(digest)
    }

    fn table_new(&mut self) -> TableId {
        self.tables.push(Vec::new());
        TableId(self.tables.len() - 1)
    }

    fn table_insert(&mut self, table: TableId, value: Var) {
        let v = self.value(value);
        self.tables[table.0].push(v);
    }

    fn lookup(&mut self, table: TableId, queries: &[Var]) -> Vec<Var> {
        let mut results = Vec::with_capacity(queries.len());
        for &query in queries {
            let index = fr_to_u64(&self.value(query)).map(|i| i as usize);
            let entry = index.and_then(|i| self.tables[table.0].get(i).copied());
            match entry {
                Some(value) => results.push(self.alloc(value)),
                None => {
                    let size = self.tables[table.0].len();
                    self.fail(CircuitError::Constraint(format!(
                        "lookup index outside table of {size} rows"
                    )));
                    results.push(self.alloc(Fr::from(0u64)));
                }
            }
        }
        results
    }

    fn new_hint(&mut self, hint: HintFn, outputs: usize, inputs: &[Var]) -> Vec<Var> {
        let values: Vec<Fr> = inputs.iter().map(|&v| self.value(v)).collect();
        let out = hint(&values);
        assert_eq!(out.len(), outputs, "hint output arity mismatch");
        out.into_iter().map(|v| self.alloc(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_equality() {
        let mut e = Engine::new();
        let a = e.witness(Fr::from(3u64));
        let b = e.witness(Fr::from(4u64));
        let sum = e.add(a, b);
        let want = e.constant(Fr::from(7u64));
        e.assert_is_equal(sum, want);
        e.finish().unwrap();
    }

    #[test]
    fn first_violation_is_kept() {
        let mut e = Engine::new();
        let a = e.witness(Fr::from(1u64));
        let b = e.witness(Fr::from(2u64));
        e.assert_is_equal(a, b);
        e.range_check(a, 1);
        let err = e.finish().unwrap_err();
        assert!(matches!(err, CircuitError::Constraint(_)));
    }

    #[test]
    fn select_requires_boolean_condition() {
        let mut e = Engine::new();
        let c = e.witness(Fr::from(2u64));
        let x = e.witness(Fr::from(5u64));
        let y = e.witness(Fr::from(6u64));
        let _ = e.select(c, x, y);
        assert!(e.finish().is_err());
    }

    #[test]
    fn cmp_is_signed_ternary() {
        let mut e = Engine::new();
        let a = e.witness(Fr::from(5u64));
        let b = e.witness(Fr::from(9u64));
        let less = e.cmp(a, b, 16);
        let greater = e.cmp(b, a, 16);
        let equal = e.cmp(a, a, 16);
        assert_eq!(e.value(less), -Fr::from(1u64));
        assert_eq!(e.value(greater), Fr::from(1u64));
        assert_eq!(e.value(equal), Fr::from(0u64));
        e.finish().unwrap();
    }

    #[test]
    fn lookup_checks_bounds() {
        let mut e = Engine::new();
        let t = e.table_new();
        let v = e.constant(Fr::from(42u64));
        e.table_insert(t, v);
        let q0 = e.constant(Fr::from(0u64));
        let got = e.lookup(t, &[q0]);
        assert_eq!(e.value(got[0]), Fr::from(42u64));
        let q1 = e.constant(Fr::from(1u64));
        let _ = e.lookup(t, &[q1]);
        assert!(e.finish().is_err());
    }

    #[test]
    fn to_binary_is_little_endian() {
        let mut e = Engine::new();
        let a = e.witness(Fr::from(0b110u64));
        let bits = e.to_binary(a, 4);
        let got: Vec<Fr> = bits.iter().map(|&b| e.value(b)).collect();
        assert_eq!(
            got,
            vec![Fr::from(0u64), Fr::from(1u64), Fr::from(1u64), Fr::from(0u64)]
        );
        e.finish().unwrap();
    }
}
