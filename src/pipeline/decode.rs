//! Decode stage: operand and immediate extraction, register read with
//! forwarding, control-signal generation for the later stages.

use crate::isa::{bitfield_s64, bitfield_u32, AluOp, Cond, Opcode, RegRef};

use super::forward::{self, Producer};
use super::hardware::Machine;
use super::writeback::WbOut;
use super::{DLatch, MSigs, MultiVal, WSigs, XLatch, XSigs};

pub struct DecodeOut {
    pub x: XLatch,
    /// extracted sources, observed by the hazard unit
    pub src1: RegRef,
    pub src2: RegRef,
}

/// Extract and resolve the operand registers.
///
/// Encoding slot 31 is kept as SP only where the opcode legitimately
/// addresses through it; everywhere else it resolves to XZR.
fn extract_regs(insn: u32, op: Opcode, src2_sel: bool) -> (RegRef, RegRef, RegRef) {
    use Opcode::*;

    let raw_src1 = bitfield_u32(insn, 5, 5) as u8;
    let raw_src2 = if src2_sel {
        // store data register
        bitfield_u32(insn, 0, 5) as u8
    } else {
        bitfield_u32(insn, 16, 5) as u8
    };
    let raw_dst = bitfield_u32(insn, 0, 5) as u8;

    let reads_src1 = matches!(
        op,
        Ldur | Stur | Ret | AddRi | AddsRr | CmnRr | SubRi | SubsRr | CmpRr | OrrRr | EorRr
            | AndsRr | TstRr | Lsl | Lsr | Asr
    );
    let reads_src2 = src2_sel
        || matches!(
            op,
            AddsRr | CmnRr | SubsRr | CmpRr | OrrRr | EorRr | AndsRr | TstRr | Mvn
        );
    let writes_dst = matches!(
        op,
        Ldur | AddRi | AddsRr | SubRi | SubsRr | OrrRr | EorRr | AndsRr | Adrp | Movz | Movk
            | Lsl | Lsr | Asr | Mvn
    );

    let sp_ok_src1 = matches!(op, Ldur | Stur | AddRi | SubRi | Mvn | Ret | Lsl | Lsr);
    let sp_ok_dst = matches!(op, AddRi | SubRi);

    let resolve = |raw: u8, sp_ok: bool| {
        if raw == 31 {
            if sp_ok {
                RegRef::Sp
            } else {
                RegRef::Xzr
            }
        } else {
            RegRef::Gpr(raw)
        }
    };

    let src1 = if reads_src1 {
        resolve(raw_src1, sp_ok_src1)
    } else {
        RegRef::Xzr
    };
    let src2 = if reads_src2 {
        resolve(raw_src2, false)
    } else {
        RegRef::Xzr
    };
    let dst = if op == Bl {
        RegRef::Gpr(30)
    } else if writes_dst {
        resolve(raw_dst, sp_ok_dst)
    } else {
        RegRef::Xzr
    };

    // MOVK reads its destination to preserve the other three lanes
    let src1 = if op == Opcode::Movk { dst } else { src1 };

    (src1, src2, dst)
}

fn extract_imm(insn: u32, op: Opcode) -> i64 {
    use Opcode::*;
    match op {
        Ldur | Stur => bitfield_s64(insn, 12, 9),
        Movk | Movz => bitfield_u32(insn, 5, 16) as i64,
        Adrp => (bitfield_s64(insn, 5, 19) << 2 | bitfield_u32(insn, 29, 2) as i64) << 12,
        AddRi | SubRi | Ubfm => bitfield_u32(insn, 10, 12) as i64,
        Lsr | Asr => bitfield_u32(insn, 16, 6) as i64,
        Lsl => 63 - bitfield_u32(insn, 10, 6) as i64,
        B | Bl => bitfield_s64(insn, 0, 26),
        BCond => bitfield_s64(insn, 5, 19),
        _ => 0,
    }
}

fn decide_alu_op(op: Opcode) -> AluOp {
    use Opcode::*;
    match op {
        AddRi | AddsRr | CmnRr | Ldur | Stur | Adrp => AluOp::Plus,
        SubRi | SubsRr | CmpRr => AluOp::Minus,
        AndsRr | TstRr => AluOp::And,
        OrrRr => AluOp::Or,
        EorRr => AluOp::Eor,
        Lsl => AluOp::Lsl,
        Lsr => AluOp::Lsr,
        Asr => AluOp::Asr,
        Movk | Movz => AluOp::Mov,
        Mvn => AluOp::Inv,
        _ => AluOp::PassA,
    }
}

/// Control signals for this and the three later stages, as pure functions
/// of the opcode. The decode-local signal selects the store-data register.
fn generate_dxmw_control(op: Opcode) -> (bool, XSigs, MSigs, WSigs) {
    use Opcode::*;
    let src2_sel = op == Stur;
    let x_sigs = XSigs {
        valb_sel: matches!(
            op,
            AddsRr | CmnRr | SubsRr | CmpRr | OrrRr | EorRr | AndsRr | TstRr | Mvn
        ),
        set_flags: matches!(op, AddsRr | SubsRr | AndsRr | TstRr | CmnRr | CmpRr),
    };
    let m_sigs = MSigs {
        dmem_read: op == Ldur,
        dmem_write: op == Stur,
    };
    let w_sigs = WSigs {
        dst_sel: op == Bl,
        wval_sel: op == Ldur,
        w_enable: !matches!(
            op,
            Nop | Ret | Hlt | B | BCond | CmnRr | CmpRr | TstRr | Stur | Err
        ),
    };
    (src2_sel, x_sigs, m_sigs, w_sigs)
}

pub fn decode(
    d: &DLatch,
    producers: &[Producer; 3],
    wb: &WbOut,
    mach: &mut Machine,
) -> DecodeOut {
    let op = d.op;
    let (src2_sel, x_sigs, m_sigs, mut w_sigs) = generate_dxmw_control(op);
    let (src1, src2, dst) = extract_regs(d.insn, op, src2_sel);
    let val_imm = extract_imm(d.insn, op);
    let val_hw = if matches!(op, Opcode::Movz | Opcode::Movk) {
        bitfield_u32(d.insn, 21, 2) as u8 * 16
    } else {
        0
    };

    if dst == RegRef::Xzr {
        w_sigs.w_enable = false;
    }

    // one regfile access per cycle: the writeback commit lands first, so
    // this read observes a same-cycle write to the same register
    let (rf_a, rf_b) = mach
        .regs
        .access(src1, src2, wb.dst, wb.val, wb.w_enable);

    let mut val_a = forward::select(src1, rf_a, producers);
    let val_b = forward::select(src2, rf_b, producers);

    match op {
        Opcode::Adrp => {
            if let MultiVal::PageBase(base) = d.multi {
                val_a = base;
            }
        }
        Opcode::Movz => val_a = 0,
        // mask the target lane before the ALU ORs the immediate in
        Opcode::Movk => val_a &= !(0xFFFFu64 << val_hw),
        _ => {}
    }

    let cond = if op == Opcode::BCond {
        Cond::from_bits(bitfield_u32(d.insn, 0, 4) as u8)
    } else {
        Cond::Al
    };

    let seq_succ = match d.multi {
        MultiVal::SeqSucc(pc) => pc,
        MultiVal::PageBase(_) => 0,
    };

    DecodeOut {
        x: XLatch {
            insn: d.insn,
            op,
            status: d.status,
            val_a,
            val_b,
            val_imm,
            val_hw,
            alu_op: decide_alu_op(op),
            cond,
            dst,
            seq_succ,
            x_sigs,
            m_sigs,
            w_sigs,
        },
        src1,
        src2,
    }
}
