#![deny(missing_debug_implementations)]

pub mod builder;
pub mod encoding;
mod opcode;
pub mod spec;

pub use opcode::Opcode;
pub use spec::Specification;

use log::{debug, info};
use std::fmt::{self, Display};
use thiserror::Error;
use z3::ast::{Ast, BV as BitVec};
use z3::SatResult;

/// All values are machine words of this width; arithmetic wraps mod `2^32`.
pub const WORD_WIDTH: u32 = 32;

pub type Word = u32;

#[derive(Debug, Error)]
pub enum Error {
    /// A `check` returned neither sat nor unsat, e.g. on timeout. Fatal for
    /// the current search; never treated as unsat.
    #[error("solver returned unknown during {phase} at {insns} instructions")]
    SolverUnknown { phase: Phase, insns: usize },
    /// The model could not be evaluated at a required variable. Same
    /// severity as `SolverUnknown`.
    #[error("model has no usable assignment for the {0}")]
    ModelDecode(&'static str),
    /// `max_insns` was reached without finding a correct program.
    #[error("no program of at most {0} instructions computes the specification")]
    BoundExceeded(usize),
    /// The specification adapter is not a pure function of its input.
    #[error("specification error: {0}")]
    Specification(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Synthesis,
    Verification,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Synthesis => write!(f, "synthesis"),
            Phase::Verification => write!(f, "verification"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    /// Give up with `BoundExceeded` once programs of this many instructions
    /// have been ruled out.
    pub max_insns: Option<usize>,
    /// Per-`check` solver timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Random seed handed to the solver, for reproducible runs.
    pub seed: Option<u32>,
    /// Upper bound on immediate constants. A search heuristic, not a
    /// semantic requirement.
    pub imm_bound: Word,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            max_insns: None,
            timeout_ms: None,
            seed: None,
            imm_bound: 0x100,
        }
    }
}

/// The second operand of an instruction: a register, or a small immediate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Src2 {
    Reg(usize),
    Imm(Word),
}

/// One concrete instruction. Register 0 is the program input; register
/// `k > 0` is the output of instruction `k - 1`. The destination register is
/// implicit: instruction `i` writes register `i + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Insn {
    pub opcode: Opcode,
    pub r1: usize,
    pub src2: Src2,
}

/// A straight-line program in SSA form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub insns: Vec<Insn>,
}

impl Program {
    /// Run the program on a concrete input. Operand indices must name the
    /// input or an earlier instruction's output, which `builder::decode`
    /// guarantees.
    pub fn eval(&self, x: Word) -> Word {
        let mut regs = Vec::with_capacity(self.insns.len() + 1);
        regs.push(x);
        for insn in &self.insns {
            let a = regs[insn.r1];
            let b = match insn.src2 {
                Src2::Reg(r) => regs[r],
                Src2::Imm(imm) => imm,
            };
            regs.push(insn.opcode.eval(a, b));
        }
        regs[self.insns.len()]
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, insn) in self.insns.iter().enumerate() {
            write!(f, "{} r{}, ", insn.opcode, insn.r1)?;
            match insn.src2 {
                Src2::Reg(r) => write!(f, "r{}", r)?,
                Src2::Imm(imm) => write!(f, "{:#x}", imm)?,
            }
            writeln!(f, ", r{}", i + 1)?;
        }
        Ok(())
    }
}

/// A program is its own symbolic encoding, so a synthesized result can be
/// checked against another specification with a single equivalence query.
impl Specification for Program {
    fn name(&self) -> &str {
        "program"
    }

    fn make_expression<'a>(
        &self,
        context: &'a z3::Context,
        input: &BitVec<'a>,
    ) -> BitVec<'a> {
        let mut regs = vec![input.clone()];
        for insn in &self.insns {
            let a = regs[insn.r1].clone();
            let b = match insn.src2 {
                Src2::Reg(r) => regs[r].clone(),
                Src2::Imm(imm) => encoding::word(context, imm),
            };
            regs.push(match insn.opcode {
                Opcode::Sub => a.bvsub(&b),
                Opcode::And => a.bvand(&b),
                Opcode::Cmpeq => encoding::widen(context, &a._eq(&b)),
            });
        }
        regs[self.insns.len()].clone()
    }
}

/// An input on which a candidate program disagreed with the specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counterexample {
    pub input: Word,
    pub got: Word,
    pub want: Word,
}

enum Step {
    /// No program of the current length is correct on all test cases.
    TooShort,
    Correct(Program),
    Counterexample(Counterexample),
}

/// The CEGIS loop: alternate between synthesizing a candidate correct on the
/// accumulated test cases and verifying it on all inputs, growing the
/// program length when a length is exhausted.
#[derive(Debug)]
pub struct Synthesizer<'a> {
    spec: &'a dyn Specification,
    options: Options,
    test_cases: Vec<Word>,
    counterexamples: Vec<Counterexample>,
}

impl<'a> Synthesizer<'a> {
    pub fn new(spec: &'a dyn Specification, options: Options) -> Self {
        Synthesizer {
            spec,
            options,
            test_cases: Vec::new(),
            counterexamples: Vec::new(),
        }
    }

    /// The inputs accumulated over the run, in discovery order.
    pub fn test_cases(&self) -> &[Word] {
        &self.test_cases
    }

    pub fn counterexamples(&self) -> &[Counterexample] {
        &self.counterexamples
    }

    pub fn run(&mut self) -> Result<Program, Error> {
        let mut n = 1;
        loop {
            if let Some(max) = self.options.max_insns {
                if n > max {
                    return Err(Error::BoundExceeded(max));
                }
            }
            info!("trying programs of {} instructions", n);
            match self.search_at_length(n)? {
                Some(program) => {
                    info!("found a correct {}-instruction program", n);
                    return Ok(program);
                }
                None => n += 1,
            }
        }
    }

    fn search_at_length(&mut self, n: usize) -> Result<Option<Program>, Error> {
        loop {
            // Everything symbolic lives in this iteration's context and is
            // dropped with it; expressions never cross iterations.
            let mut config = z3::Config::new();
            config.set_model_generation(true);
            let context = z3::Context::new(&config);

            match self.iterate(&context, n)? {
                Step::TooShort => return Ok(None),
                Step::Correct(program) => return Ok(Some(program)),
                Step::Counterexample(cx) => {
                    if self.test_cases.contains(&cx.input) {
                        // The candidate was constrained to agree with the
                        // specification on every accumulated input, so a
                        // repeat witness means the concrete and symbolic
                        // readings of the specification disagree.
                        return Err(Error::Specification(format!(
                            "input {:#x} is a counterexample twice; the specification is not pure",
                            cx.input
                        )));
                    }
                    info!(
                        "counterexample: {:#x} evaluates to {:#x} but should be {:#x}",
                        cx.input, cx.got, cx.want
                    );
                    self.test_cases.push(cx.input);
                    self.counterexamples.push(cx);
                }
            }
        }
    }

    /// One synthesis/verification round at length `n`.
    fn iterate(&self, context: &z3::Context, n: usize) -> Result<Step, Error> {
        let solver = z3::Solver::new(context);
        self.configure(context, &solver);

        let (insns, well_formed) = builder::make_insns(context, n, self.options.imm_bound);
        for constraint in &well_formed {
            solver.assert(constraint);
        }

        debug!(
            "synthesizing {} instructions against {} test cases",
            n,
            self.test_cases.len()
        );
        for &t in &self.test_cases {
            let want = self.spec.eval_concrete(context, t)?;
            let got = encoding::eval(context, &encoding::word(context, t), &insns);
            solver.assert(&got._eq(&encoding::word(context, want)));
        }

        match solver.check() {
            SatResult::Unknown => {
                return Err(Error::SolverUnknown {
                    phase: Phase::Synthesis,
                    insns: n,
                })
            }
            SatResult::Unsat => {
                debug!(
                    "no {}-instruction program is correct on all {} test cases",
                    n,
                    self.test_cases.len()
                );
                return Ok(Step::TooShort);
            }
            SatResult::Sat => {}
        }

        let model = solver
            .get_model()
            .ok_or(Error::ModelDecode("synthesis model"))?;
        let program = builder::decode(&insns, &model)?;
        debug!("candidate:\n{}", program);

        // Verify in the same context with a fresh solver: substitute the
        // model into the symbolic encoding to get the candidate as a
        // function of x alone, then look for an input where it disagrees
        // with the specification.
        let x = BitVec::fresh_const(context, "x", WORD_WIDTH);
        let candidate = model
            .eval(&encoding::eval(context, &x, &insns), false)
            .ok_or(Error::ModelDecode("program expression"))?;
        let spec_expr = self.spec.make_expression(context, &x);

        let verifier = z3::Solver::new(context);
        self.configure(context, &verifier);
        verifier.assert(&candidate._eq(&spec_expr).not());

        match verifier.check() {
            SatResult::Unknown => Err(Error::SolverUnknown {
                phase: Phase::Verification,
                insns: n,
            }),
            SatResult::Unsat => Ok(Step::Correct(program)),
            SatResult::Sat => {
                let witness = verifier
                    .get_model()
                    .ok_or(Error::ModelDecode("counterexample model"))?;
                let input = witness
                    .eval(&x, true)
                    .and_then(|v| v.as_u64())
                    .ok_or(Error::ModelDecode("counterexample input"))?
                    as Word;
                let got = witness
                    .eval(&candidate, true)
                    .and_then(|v| v.as_u64())
                    .ok_or(Error::ModelDecode("counterexample output"))?
                    as Word;
                let want = self.spec.eval_concrete(context, input)?;
                Ok(Step::Counterexample(Counterexample { input, got, want }))
            }
        }
    }

    fn configure(&self, context: &z3::Context, solver: &z3::Solver) {
        let mut params = z3::Params::new(context);
        if let Some(timeout) = self.options.timeout_ms {
            params.set_u32("timeout", timeout);
        }
        if let Some(seed) = self.options.seed {
            params.set_u32("random_seed", seed);
        }
        solver.set_params(&params);
    }
}

/// Search for the shortest straight-line program computing `spec` on every
/// input. Returns the first correct program found at the smallest length.
pub fn synthesize(spec: &dyn Specification, options: &Options) -> Result<Program, Error> {
    Synthesizer::new(spec, options.clone()).run()
}
