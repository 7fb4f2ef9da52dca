//! Memory stage: at most one data-memory access per cycle.

use super::hardware::Machine;
use super::{MLatch, Stat, WLatch};

pub fn memory(m: &MLatch, mach: &mut Machine) -> WLatch {
    let (rval, dmem_err) = mach.mem.dmem(
        m.val_ex,
        m.val_b,
        m.m_sigs.dmem_read,
        m.m_sigs.dmem_write,
    );

    let status = if dmem_err { Stat::Adr } else { m.status };

    WLatch {
        insn: m.insn,
        op: m.op,
        status,
        val_ex: m.val_ex,
        val_mem: if m.m_sigs.dmem_read { rval } else { 0 },
        dst: m.dst,
        w_sigs: m.w_sigs,
    }
}
