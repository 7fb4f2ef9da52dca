//! Fetch stage: select the PC, read instruction memory, classify the
//! opcode, predict the next PC.

use crate::isa::{bitfield_s64, bitfield_u32, Opcode, OpTable, HLT_INSN, RET_FROM_MAIN_ADDR};

use super::hardware::Machine;
use super::{DLatch, FLatch, Latches, MultiVal, Stat};

pub struct FetchOut {
    pub f: FLatch,
    pub d: DLatch,
}

/// Choose the PC to fetch this cycle.
///
/// Priority: a RET whose target is the return-from-main sentinel steers to
/// zero (reserved for clean shutdown); a conditional branch seen
/// mispredicted at the memory latch corrects to its sequential successor;
/// a decoded RET at the execute latch corrects to its operand; otherwise
/// the previous cycle's prediction stands.
fn select_pc(lat: &Latches) -> u64 {
    if lat.x.op == Opcode::Ret && lat.x.val_a == RET_FROM_MAIN_ADDR {
        return 0;
    }
    if lat.m.op == Opcode::BCond && !lat.m.cond_holds {
        return lat.m.seq_succ;
    }
    if lat.x.op == Opcode::Ret {
        return lat.x.val_a;
    }
    lat.f.pred_pc
}

/// Conditional branches are predicted taken.
fn predict_pc(current_pc: u64, insn: u32, op: Opcode) -> (u64, u64) {
    let seq_succ = current_pc.wrapping_add(4);
    let predicted = match op {
        Opcode::B | Opcode::Bl => {
            current_pc.wrapping_add((bitfield_s64(insn, 0, 26) << 2) as u64)
        }
        Opcode::BCond => current_pc.wrapping_add((bitfield_s64(insn, 5, 19) << 2) as u64),
        _ => seq_succ,
    };
    (predicted, seq_succ)
}

/// Recognize the aliased instructions so later stages never see UBFM or a
/// flag-setting op with an XZR first operand.
fn fix_insn_aliases(insn: u32, op: Opcode) -> Opcode {
    let rn = bitfield_u32(insn, 5, 5);
    match op {
        Opcode::Ubfm => {
            if bitfield_u32(insn, 10, 6) != 63 {
                Opcode::Lsl
            } else {
                Opcode::Lsr
            }
        }
        Opcode::AddsRr if rn == 31 => Opcode::CmnRr,
        Opcode::SubsRr if rn == 31 => Opcode::CmpRr,
        Opcode::AndsRr if rn == 31 => Opcode::TstRr,
        _ => op,
    }
}

pub fn fetch(lat: &Latches, table: &OpTable, mach: &mut Machine) -> FetchOut {
    let current_pc = select_pc(lat);

    // PC zero and a latched halt both keep synthesizing HLT slots until
    // one retires from writeback.
    if current_pc == 0 || lat.f.status == Stat::Hlt {
        return FetchOut {
            f: FLatch {
                pred_pc: lat.f.pred_pc,
                status: Stat::Hlt,
            },
            d: DLatch {
                insn: HLT_INSN,
                op: Opcode::Hlt,
                multi: MultiVal::SeqSucc(0),
                status: Stat::Hlt,
            },
        };
    }

    let (insn, imem_err) = mach.mem.imem(current_pc);
    let op = fix_insn_aliases(insn, table.lookup(insn));
    let (predicted, seq_succ) = predict_pc(current_pc, insn, op);
    let multi = if op == Opcode::Adrp {
        MultiVal::PageBase(current_pc & !0xFFF)
    } else {
        MultiVal::SeqSucc(seq_succ)
    };

    let status = match op {
        _ if imem_err || op == Opcode::Err => Stat::Ins,
        Opcode::Hlt => Stat::Hlt,
        _ => Stat::Aok,
    };

    mach.pc = current_pc;
    FetchOut {
        f: FLatch {
            pred_pc: predicted,
            status,
        },
        d: DLatch {
            insn,
            op,
            multi,
            status,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::bitfield_u32;

    #[test]
    fn ubfm_alias_resolves_to_shifts() {
        // lsl x1, x0, #4 encodes as ubfm with imms = 59
        let lsl = 0xD37C_EC01u32;
        assert_eq!(bitfield_u32(lsl, 10, 6), 59);
        assert_eq!(fix_insn_aliases(lsl, Opcode::Ubfm), Opcode::Lsl);
        // lsr x1, x0, #4 has imms = 63
        let lsr = 0xD344_FC01u32;
        assert_eq!(fix_insn_aliases(lsr, Opcode::Ubfm), Opcode::Lsr);
    }

    #[test]
    fn flag_setters_with_xzr_operand_become_compares() {
        let cmp = 0xEB02_03FFu32; // subs with Rn = 31
        assert_eq!(fix_insn_aliases(cmp, Opcode::SubsRr), Opcode::CmpRr);
        let adds = 0xAB02_0020u32; // Rn = 1
        assert_eq!(fix_insn_aliases(adds, Opcode::AddsRr), Opcode::AddsRr);
    }

    #[test]
    fn branch_prediction_is_taken() {
        // b .-8 : imm26 = -2
        let insn = 0x1400_0000u32 | (0x03FF_FFFE & 0x03FF_FFFF);
        let (pred, seq) = predict_pc(0x40_0010, insn, Opcode::B);
        assert_eq!(pred, 0x40_0008);
        assert_eq!(seq, 0x40_0014);
        // b.cond forward by 2 insns: imm19 = 2 at [23:5]
        let bcond = 0x5400_0000u32 | 2 << 5;
        let (pred, _) = predict_pc(0x40_0000, bcond, Opcode::BCond);
        assert_eq!(pred, 0x40_0008);
    }
}
