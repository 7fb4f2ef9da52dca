//! Hazard-control unit: per-cycle LOAD/STALL/BUBBLE decision for every
//! latch.

use crate::isa::{Opcode, RegRef};

use super::{CtlMode, LatchCtl, Stat};

/// What the hazard unit observes each cycle: the decode latch's opcode and
/// extracted sources, the execute latch's opcode and destination, this
/// cycle's condition evaluation, and the statuses entering and sitting in
/// the writeback latch.
pub struct Observed {
    pub d_op: Opcode,
    pub d_src1: RegRef,
    pub d_src2: RegRef,
    pub x_op: Opcode,
    pub x_dst: RegRef,
    pub x_cond_val: bool,
    pub w_entering: Stat,
    pub w_stat: Stat,
}

fn check_load_use_hazard(o: &Observed) -> bool {
    o.x_op == Opcode::Ldur
        && o.x_dst != RegRef::Xzr
        && (o.d_src1 == o.x_dst || o.d_src2 == o.x_dst)
}

fn check_mispred_branch_hazard(o: &Observed) -> bool {
    o.x_op == Opcode::BCond && !o.x_cond_val
}

fn check_ret_hazard(o: &Observed) -> bool {
    o.d_op == Opcode::Ret
}

pub fn control(o: Observed) -> LatchCtl {
    let mut ctl = LatchCtl::default();

    // An abnormal status drains to writeback and must retire alone: once
    // it is entering or sitting in W, squash whatever would follow it into
    // the memory latch and hold the writeback latch.
    if o.w_stat.is_abnormal() {
        ctl.w = CtlMode::Stall;
    }
    if o.w_entering.is_abnormal() || o.w_stat.is_abnormal() {
        ctl.m = CtlMode::Bubble;
    }

    if check_load_use_hazard(&o) {
        // hold fetch and decode for one cycle, insert the bubble at execute
        ctl.f = CtlMode::Stall;
        ctl.d = CtlMode::Stall;
        ctl.x = CtlMode::Bubble;
    } else if check_mispred_branch_hazard(&o) {
        // squash the two wrongly fetched instructions in flight
        ctl.d = CtlMode::Bubble;
        ctl.x = CtlMode::Bubble;
    } else if check_ret_hazard(&o) {
        // the instruction fetched behind RET is wrong-path
        ctl.f = CtlMode::Stall;
        ctl.d = CtlMode::Bubble;
    }

    ctl
}
