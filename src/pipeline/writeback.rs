//! Writeback stage: select the value committing to the register file.

use crate::isa::RegRef;

use super::{Stat, WLatch};

/// The register write the decode-stage regfile access will commit this
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WbOut {
    pub dst: RegRef,
    pub val: u64,
    pub w_enable: bool,
}

pub fn wback(w: &WLatch) -> WbOut {
    let val = if w.w_sigs.wval_sel {
        w.val_mem
    } else {
        w.val_ex
    };
    let dst = if w.w_sigs.dst_sel {
        RegRef::Gpr(30)
    } else {
        w.dst
    };
    WbOut {
        dst,
        val,
        // erroring slots retire without architectural effect
        w_enable: w.w_sigs.w_enable && w.status == Stat::Aok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode;
    use crate::pipeline::WSigs;

    #[test]
    fn selects_memory_value_for_loads() {
        let w = WLatch {
            op: Opcode::Ldur,
            val_ex: 0x4000,
            val_mem: 1234,
            dst: RegRef::Gpr(2),
            w_sigs: WSigs {
                dst_sel: false,
                wval_sel: true,
                w_enable: true,
            },
            ..WLatch::default()
        };
        let mut w = w;
        w.status = Stat::Aok;
        assert_eq!(wback(&w).val, 1234);
        assert!(wback(&w).w_enable);
    }

    #[test]
    fn faulted_slot_commits_nothing() {
        let w = WLatch {
            op: Opcode::Ldur,
            status: Stat::Adr,
            dst: RegRef::Gpr(2),
            w_sigs: WSigs {
                dst_sel: false,
                wval_sel: true,
                w_enable: true,
            },
            ..WLatch::default()
        };
        assert!(!wback(&w).w_enable);
    }

    #[test]
    fn bl_redirects_to_link_register() {
        let w = WLatch {
            op: Opcode::Bl,
            status: Stat::Aok,
            val_ex: 0x40_0008,
            dst: RegRef::Gpr(30),
            w_sigs: WSigs {
                dst_sel: true,
                wval_sel: false,
                w_enable: true,
            },
            ..WLatch::default()
        };
        let out = wback(&w);
        assert_eq!(out.dst, RegRef::Gpr(30));
        assert_eq!(out.val, 0x40_0008);
    }
}
