//! Execute stage: ALU operation, condition evaluation, NZCV commit.

use crate::isa::Opcode;

use super::hardware::{alu, Machine};
use super::{MLatch, Stat, XLatch};

/// Run the ALU over the execute latch.
///
/// `w_entering` is the status the memory stage computed this cycle and
/// `w_stat` the one sitting in the writeback latch; while either is
/// abnormal the flags of a younger instruction must not commit.
pub fn execute(x: &XLatch, w_entering: Stat, w_stat: Stat, mach: &mut Machine) -> MLatch {
    let operand_b = if x.x_sigs.valb_sel {
        x.val_b
    } else {
        x.val_imm as u64
    };
    let set_flags = x.x_sigs.set_flags && !w_entering.is_abnormal() && !w_stat.is_abnormal();

    let out = alu(
        x.val_a,
        operand_b,
        x.val_hw,
        x.alu_op,
        set_flags,
        x.cond,
        mach.nzcv,
    );
    mach.nzcv = out.nzcv;

    // BL writes the link value, not the ALU result
    let val_ex = if x.op == Opcode::Bl {
        x.seq_succ
    } else {
        out.val_e
    };

    MLatch {
        insn: x.insn,
        op: x.op,
        status: x.status,
        cond_holds: out.cond_val,
        val_ex,
        val_b: x.val_b,
        dst: x.dst,
        seq_succ: x.seq_succ,
        m_sigs: x.m_sigs,
        w_sigs: x.w_sigs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{AluOp, Cond, RegRef};
    use crate::pipeline::hardware::{pack_nzcv, Memory};
    use crate::pipeline::{XSigs, XLatch};

    fn machine() -> Machine {
        Machine::new(Memory::new(0, 16, 0, 16), 0)
    }

    fn add_latch(a: u64, imm: i64) -> XLatch {
        XLatch {
            op: Opcode::AddRi,
            alu_op: AluOp::Plus,
            val_a: a,
            val_imm: imm,
            dst: RegRef::Gpr(0),
            ..XLatch::default()
        }
    }

    #[test]
    fn immediate_selected_without_valb_sel() {
        let mut m = machine();
        let out = execute(&add_latch(40, 2), Stat::Aok, Stat::Aok, &mut m);
        assert_eq!(out.val_ex, 42);
    }

    #[test]
    fn bl_overrides_result_with_link() {
        let mut m = machine();
        let x = XLatch {
            op: Opcode::Bl,
            seq_succ: 0x40_0004,
            ..XLatch::default()
        };
        let out = execute(&x, Stat::Aok, Stat::Aok, &mut m);
        assert_eq!(out.val_ex, 0x40_0004);
    }

    #[test]
    fn flags_commit_unless_fault_is_draining() {
        let mut m = machine();
        let mut x = add_latch(1, -1);
        x.x_sigs = XSigs {
            valb_sel: false,
            set_flags: true,
        };
        execute(&x, Stat::Aok, Stat::Aok, &mut m);
        assert_eq!(m.nzcv, pack_nzcv(false, true, true, false));

        // an older fault entering writeback suppresses the update
        m.nzcv = 0;
        execute(&x, Stat::Adr, Stat::Aok, &mut m);
        assert_eq!(m.nzcv, 0);
        execute(&x, Stat::Aok, Stat::Hlt, &mut m);
        assert_eq!(m.nzcv, 0);
    }

    #[test]
    fn bcond_evaluates_against_current_flags() {
        let mut m = machine();
        m.nzcv = pack_nzcv(false, true, false, false);
        let x = XLatch {
            op: Opcode::BCond,
            cond: Cond::Eq,
            ..XLatch::default()
        };
        let out = execute(&x, Stat::Aok, Stat::Aok, &mut m);
        assert!(out.cond_holds);
        m.nzcv = 0;
        let out = execute(&x, Stat::Aok, Stat::Aok, &mut m);
        assert!(!out.cond_holds);
    }
}
