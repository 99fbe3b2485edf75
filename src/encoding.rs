use crate::builder::SymbolicInsn;
use crate::{Opcode, Word, WORD_WIDTH};
use z3::ast::{Ast, Bool, Int, BV as BitVec};

pub fn word<'a>(context: &'a z3::Context, value: Word) -> BitVec<'a> {
    BitVec::from_u64(context, value as u64, WORD_WIDTH)
}

/// Map a boolean to `BitVec[W]` 1/0.
pub fn widen<'a>(context: &'a z3::Context, condition: &Bool<'a>) -> BitVec<'a> {
    condition.ite(&word(context, 1), &word(context, 0))
}

fn opcode_is<'a>(context: &'a z3::Context, insn: &SymbolicInsn<'a>, opcode: Opcode) -> Bool<'a> {
    insn.op._eq(&Int::from_u64(context, opcode.code()))
}

/// The expression for the output register of the symbolic program `insns`
/// run on `input`.
///
/// The selector cascades are total for any assignment the solver chooses:
/// an out-of-range `r1` falls back to the most recent register, an
/// out-of-range `r2` selects the immediate, and an out-of-range opcode
/// behaves as `sub`. The decoder in `crate::builder` applies the same
/// tie-breaks.
pub fn eval<'a>(
    context: &'a z3::Context,
    input: &BitVec<'a>,
    insns: &[SymbolicInsn<'a>],
) -> BitVec<'a> {
    let mut regs = vec![input.clone()];

    for (i, insn) in insns.iter().enumerate() {
        let mut in1 = regs[i].clone();
        for j in (0..i).rev() {
            let selected = insn.r1._eq(&Int::from_u64(context, j as u64));
            in1 = selected.ite(&regs[j], &in1);
        }

        let mut in2 = insn.imm.clone();
        for j in (0..=i).rev() {
            let selected = insn.r2._eq(&Int::from_u64(context, j as u64));
            in2 = selected.ite(&regs[j], &in2);
        }

        let mut result = in1.bvsub(&in2);
        result = opcode_is(context, insn, Opcode::And).ite(&in1.bvand(&in2), &result);
        result = opcode_is(context, insn, Opcode::Cmpeq)
            .ite(&widen(context, &in1._eq(&in2)), &result);

        regs.push(result);
    }

    regs[insns.len()].clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::{Insn, Program, Src2};
    use z3::SatResult;

    fn context() -> z3::Context {
        let mut config = z3::Config::new();
        config.set_model_generation(true);
        z3::Context::new(&config)
    }

    /// Pin the slots of a symbolic program to a concrete one.
    fn pin<'a>(
        context: &'a z3::Context,
        solver: &z3::Solver<'a>,
        insns: &[SymbolicInsn<'a>],
        program: &Program,
    ) {
        assert_eq!(insns.len(), program.insns.len());
        for (slot, insn) in insns.iter().zip(&program.insns) {
            solver.assert(&slot.op._eq(&Int::from_u64(context, insn.opcode.code())));
            solver.assert(&slot.r1._eq(&Int::from_u64(context, insn.r1 as u64)));
            match insn.src2 {
                Src2::Reg(r) => {
                    solver.assert(&slot.r2._eq(&Int::from_u64(context, r as u64)));
                }
                Src2::Imm(value) => {
                    // Any out-of-range selector means "use the immediate".
                    solver.assert(&slot.r2._eq(&Int::from_i64(context, -1)));
                    solver.assert(&slot.imm._eq(&word(context, value)));
                }
            }
        }
    }

    /// The symbolic encoding pinned to a concrete program can never
    /// disagree with the concrete interpreter.
    fn assert_agreement(program: &Program) {
        let context = context();
        let solver = z3::Solver::new(&context);
        let (insns, well_formed) = builder::make_insns(&context, program.insns.len(), 0x100);
        for constraint in &well_formed {
            solver.assert(constraint);
        }
        pin(&context, &solver, &insns, program);

        for &x in &[0u32, 1, 2, 3, 7, 8, 0xff, 0x100, 0x8000_0000, u32::MAX] {
            let symbolic = eval(&context, &word(&context, x), &insns);
            solver.push();
            solver.assert(&symbolic._eq(&word(&context, program.eval(x))).not());
            assert_eq!(solver.check(), SatResult::Unsat, "disagreement on input {:#x}", x);
            solver.pop(1);
        }
    }

    #[test]
    fn agrees_with_concrete_interpreter() {
        // t = x - 1; u = t & x; r = cmpeq(u, 0)
        assert_agreement(&Program {
            insns: vec![
                Insn {
                    opcode: Opcode::Sub,
                    r1: 0,
                    src2: Src2::Imm(1),
                },
                Insn {
                    opcode: Opcode::And,
                    r1: 1,
                    src2: Src2::Reg(0),
                },
                Insn {
                    opcode: Opcode::Cmpeq,
                    r1: 2,
                    src2: Src2::Imm(0),
                },
            ],
        });

        assert_agreement(&Program {
            insns: vec![Insn {
                opcode: Opcode::Sub,
                r1: 0,
                src2: Src2::Reg(0),
            }],
        });
    }

    #[test]
    fn out_of_range_selectors_take_the_defaults() {
        let context = context();
        let solver = z3::Solver::new(&context);
        let (insns, _) = builder::make_insns(&context, 1, 0x100);

        // Out-of-range opcode and r1, out-of-range r2 with imm 3: the slot
        // must behave as `sub r0, 0x3`.
        solver.assert(&insns[0].op._eq(&Int::from_u64(&context, 17)));
        solver.assert(&insns[0].r1._eq(&Int::from_i64(&context, -2)));
        solver.assert(&insns[0].r2._eq(&Int::from_u64(&context, 9)));
        solver.assert(&insns[0].imm._eq(&word(&context, 3)));

        let out = eval(&context, &word(&context, 10), &insns);
        solver.assert(&out._eq(&word(&context, 7)).not());
        assert_eq!(solver.check(), SatResult::Unsat);
    }

    #[test]
    fn widen_is_zero_or_one() {
        let context = context();
        let solver = z3::Solver::new(&context);
        let x = BitVec::fresh_const(&context, "x", WORD_WIDTH);
        let widened = widen(&context, &x._eq(&word(&context, 4)));
        let is_bit = Bool::or(
            &context,
            &[
                &widened._eq(&word(&context, 0)),
                &widened._eq(&word(&context, 1)),
            ],
        );
        solver.assert(&is_bit.not());
        assert_eq!(solver.check(), SatResult::Unsat);
    }
}
