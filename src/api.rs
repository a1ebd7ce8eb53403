//! The constraint-API seam between the circuit definition and a proving
//! system.
//!
//! The batch circuit is written once against this trait. A proving stack
//! that compiles constraints implements it outside this crate; the
//! requirements on such a backend are exactly the operations below —
//! notably field-element lookup tables (a log-derivative argument) and
//! prover-supplied hint values. The in-crate [`crate::engine::Engine`]
//! implements the same trait by direct evaluation over concrete values,
//! which is how witnesses are checked for satisfiability without a prover.

use crate::bn254::Fr;

/// Handle to one circuit variable. Values live in the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Var(pub usize);

/// Handle to one lookup table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableId(pub usize);

/// A prover hint: computes out-of-band witness values natively. The circuit
/// must constrain every hint output explicitly; the backend only promises
/// to run the function at witness-solving time.
pub type HintFn = fn(&[Fr]) -> Vec<Fr>;

pub trait Api {
    /// Allocate a constant.
    fn constant(&mut self, value: Fr) -> Var;
    /// Allocate a private witness variable.
    fn witness(&mut self, value: Fr) -> Var;
    /// Allocate a public-input variable.
    fn public_input(&mut self, value: Fr) -> Var;

    fn add(&mut self, a: Var, b: Var) -> Var;
    fn sub(&mut self, a: Var, b: Var) -> Var;
    fn mul(&mut self, a: Var, b: Var) -> Var;

    /// `cond` must be boolean; returns `if_true` when `cond == 1`.
    fn select(&mut self, cond: Var, if_true: Var, if_false: Var) -> Var;
    /// 1 when `a == 0`, else 0.
    fn is_zero(&mut self, a: Var) -> Var;

    fn assert_is_equal(&mut self, a: Var, b: Var);
    fn assert_is_boolean(&mut self, a: Var);

    /// Little-endian boolean decomposition; constrains `a` to `bits` bits.
    fn to_binary(&mut self, a: Var, bits: usize) -> Vec<Var>;
    /// Constrain `a` to `bits` bits.
    fn range_check(&mut self, a: Var, bits: usize);
    /// Bounded comparison of two `bits`-bit values: -1, 0 or 1 as a field
    /// element.
    fn cmp(&mut self, a: Var, b: Var, bits: usize) -> Var;
    /// Bounded `a <= b` over `bits`-bit values.
    fn assert_is_less_or_equal(&mut self, a: Var, b: Var, bits: usize);

    /// The poseidon sponge gadget; must agree with
    /// [`crate::poseidon::hash_fields`] element-for-element.
    fn poseidon(&mut self, inputs: &[Var]) -> Var;

    fn table_new(&mut self) -> TableId;
    fn table_insert(&mut self, table: TableId, value: Var);
    /// Prove that each queried row index yields the table value at that
    /// index; returns the values in query order.
    fn lookup(&mut self, table: TableId, queries: &[Var]) -> Vec<Var>;

    /// Run a hint over the inputs, allocating `outputs` new witness
    /// variables for its results.
    fn new_hint(&mut self, hint: HintFn, outputs: usize, inputs: &[Var]) -> Vec<Var>;
}
