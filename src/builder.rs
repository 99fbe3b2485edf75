use crate::encoding;
use crate::{Error, Insn, Opcode, Program, Src2, Word, WORD_WIDTH};
use z3::ast::{Bool, Int, BV as BitVec};
use z3::Model;

/// The solver variables that define one instruction slot.
///
/// `r1` names the register supplying the first operand; `r2` names the
/// register supplying the second operand, or selects the immediate when it
/// is outside the valid range. The output register is implicit (SSA form):
/// slot `i` writes register `i + 1`.
#[derive(Debug)]
pub struct SymbolicInsn<'a> {
    pub op: Int<'a>,
    pub r1: Int<'a>,
    pub r2: Int<'a>,
    pub imm: BitVec<'a>,
}

impl<'a> SymbolicInsn<'a> {
    fn new(context: &'a z3::Context, index: usize) -> Self {
        SymbolicInsn {
            op: Int::fresh_const(context, &format!("insn{}_op", index)),
            r1: Int::fresh_const(context, &format!("insn{}_r1", index)),
            r2: Int::fresh_const(context, &format!("insn{}_r2", index)),
            imm: BitVec::fresh_const(context, &format!("insn{}_imm", index), WORD_WIDTH),
        }
    }
}

/// Materialize `count` instruction slots together with their well-formedness
/// constraints.
///
/// The only constraint emitted is `imm < imm_bound` per slot. The selector
/// variables are left unconstrained; the evaluator and the decoder give
/// out-of-range values a deterministic meaning, which is what lets the
/// solver search freely.
pub fn make_insns<'a>(
    context: &'a z3::Context,
    count: usize,
    imm_bound: Word,
) -> (Vec<SymbolicInsn<'a>>, Vec<Bool<'a>>) {
    let mut insns = Vec::with_capacity(count);
    let mut well_formed = Vec::with_capacity(count);
    for index in 0..count {
        let insn = SymbolicInsn::new(context, index);
        well_formed.push(insn.imm.bvult(&encoding::word(context, imm_bound)));
        insns.push(insn);
    }
    (insns, well_formed)
}

/// Read a concrete program back out of a satisfying model.
///
/// Total over anything the model can produce: an out-of-range opcode decodes
/// as `sub`, an out-of-range `r1` as the latest register, an out-of-range
/// `r2` as the immediate, and a variable the model leaves underdetermined as
/// 0. These are the same defaults the symbolic evaluator applies.
pub fn decode(insns: &[SymbolicInsn], model: &Model) -> Result<Program, Error> {
    let mut decoded = Vec::with_capacity(insns.len());

    for (i, insn) in insns.iter().enumerate() {
        let opcode = Opcode::from_code(int_value(model, &insn.op, "opcode")?)
            .unwrap_or(Opcode::Sub);

        let r1 = int_value(model, &insn.r1, "r1")?;
        let r1 = if r1 < 0 || r1 as usize > i { i } else { r1 as usize };

        let r2 = int_value(model, &insn.r2, "r2")?;
        let src2 = if r2 < 0 || r2 as usize > i {
            let imm = model
                .eval(&insn.imm, false)
                .ok_or(Error::ModelDecode("immediate"))?;
            Src2::Imm(imm.as_u64().unwrap_or(0) as Word)
        } else {
            Src2::Reg(r2 as usize)
        };

        decoded.push(Insn { opcode, r1, src2 });
    }

    Ok(Program { insns: decoded })
}

fn int_value(model: &Model, var: &Int, what: &'static str) -> Result<i64, Error> {
    let value = model.eval(var, false).ok_or(Error::ModelDecode(what))?;
    Ok(value.as_i64().unwrap_or(0))
}
