//! Five-stage in-order pipeline: latches, cycle driver, state display.

pub mod hardware;

mod decode;
mod execute;
mod fetch;
mod forward;
mod hazard;
mod memory;
mod writeback;

use crate::isa::{AluOp, Cond, Opcode, OpTable, RegRef};
use crate::utils::{format_ctrl, format_reg_val};
use hardware::Machine;

/// Per-slot pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stat {
    #[default]
    Aok,
    /// bubble
    Bub,
    /// halt
    Hlt,
    /// invalid address
    Adr,
    /// invalid instruction
    Ins,
}

impl Stat {
    /// A status that must walk to writeback and stop the machine.
    pub fn is_abnormal(self) -> bool {
        !matches!(self, Stat::Aok | Stat::Bub)
    }
}

/// Latch control decided by the hazard unit for the next clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CtlMode {
    #[default]
    Load,
    Stall,
    Bubble,
    Error,
}

/// Control signals consumed by the execute stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XSigs {
    /// choose register val_b (true) or the immediate as the ALU B input
    pub valb_sel: bool,
    pub set_flags: bool,
}

/// Control signals consumed by the memory stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MSigs {
    pub dmem_read: bool,
    pub dmem_write: bool,
}

/// Control signals consumed by the writeback stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WSigs {
    /// BL writes the link register
    pub dst_sel: bool,
    /// select the memory-load value over the ALU result
    pub wval_sel: bool,
    pub w_enable: bool,
}

/// Secondary payload of the fetched instruction: the sequential successor
/// for everything except ADRP, which instead records its page base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiVal {
    SeqSucc(u64),
    PageBase(u64),
}

impl Default for MultiVal {
    fn default() -> Self {
        MultiVal::SeqSucc(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FLatch {
    pub pred_pc: u64,
    pub status: Stat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DLatch {
    pub insn: u32,
    pub op: Opcode,
    pub multi: MultiVal,
    pub status: Stat,
}

impl DLatch {
    fn bubble() -> DLatch {
        DLatch {
            status: Stat::Bub,
            ..DLatch::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XLatch {
    pub insn: u32,
    pub op: Opcode,
    pub status: Stat,
    pub val_a: u64,
    pub val_b: u64,
    pub val_imm: i64,
    pub val_hw: u8,
    pub alu_op: AluOp,
    pub cond: Cond,
    pub dst: RegRef,
    pub seq_succ: u64,
    pub x_sigs: XSigs,
    pub m_sigs: MSigs,
    pub w_sigs: WSigs,
}

impl XLatch {
    fn bubble() -> XLatch {
        XLatch {
            status: Stat::Bub,
            ..XLatch::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MLatch {
    pub insn: u32,
    pub op: Opcode,
    pub status: Stat,
    pub cond_holds: bool,
    pub val_ex: u64,
    pub val_b: u64,
    pub dst: RegRef,
    pub seq_succ: u64,
    pub m_sigs: MSigs,
    pub w_sigs: WSigs,
}

impl MLatch {
    fn bubble() -> MLatch {
        MLatch {
            status: Stat::Bub,
            ..MLatch::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WLatch {
    pub insn: u32,
    pub op: Opcode,
    pub status: Stat,
    pub val_ex: u64,
    pub val_mem: u64,
    pub dst: RegRef,
    pub w_sigs: WSigs,
}

impl WLatch {
    fn bubble() -> WLatch {
        WLatch {
            status: Stat::Bub,
            ..WLatch::default()
        }
    }
}

/// The five stage-input latches.
pub struct Latches {
    pub f: FLatch,
    pub d: DLatch,
    pub x: XLatch,
    pub m: MLatch,
    pub w: WLatch,
}

/// Per-latch control decisions for one clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatchCtl {
    pub f: CtlMode,
    pub d: CtlMode,
    pub x: CtlMode,
    pub m: CtlMode,
    pub w: CtlMode,
}

/// An instruction leaving the writeback stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retire {
    pub cycle: u64,
    pub insn: u32,
    pub op: Opcode,
    pub status: Stat,
    /// register effect, if the slot committed one
    pub wrote: Option<(RegRef, u64)>,
}

/// Pipeline simulator: architectural state plus the five latches, advanced
/// one clock cycle at a time.
pub struct Simulator {
    machine: Machine,
    lat: Latches,
    table: OpTable,
    terminate: bool,
    status: Stat,
    cycle_count: u64,
    bubble_count: u64,
    stall_count: u64,
    /// whether to print the per-cycle state table
    tty_out: bool,
}

impl Simulator {
    pub fn new(machine: Machine, tty_out: bool) -> Simulator {
        let entry = machine.pc;
        Simulator {
            machine,
            lat: Latches {
                f: FLatch {
                    pred_pc: entry,
                    status: Stat::Aok,
                },
                d: DLatch::bubble(),
                x: XLatch::bubble(),
                m: MLatch::bubble(),
                w: WLatch::bubble(),
            },
            table: OpTable::build(),
            terminate: false,
            status: Stat::Aok,
            cycle_count: 0,
            bubble_count: 0,
            stall_count: 0,
            tty_out,
        }
    }

    /// Advance one clock cycle. Stage logic runs in reverse order so that
    /// writeback's register write lands before decode's read and every
    /// latch is consumed before it is overwritten.
    pub fn step(&mut self) -> Option<Retire> {
        self.cycle_count += 1;

        let wb = writeback::wback(&self.lat.w);
        let w_next = memory::memory(&self.lat.m, &mut self.machine);
        let m_next = execute::execute(
            &self.lat.x,
            w_next.status,
            self.lat.w.status,
            &mut self.machine,
        );
        let producers = forward::producers(&self.lat, m_next.val_ex, w_next.val_mem);
        let dec = decode::decode(&self.lat.d, &producers, &wb, &mut self.machine);
        let f_out = fetch::fetch(&self.lat, &self.table, &mut self.machine);

        let ctl = hazard::control(hazard::Observed {
            d_op: self.lat.d.op,
            d_src1: dec.src1,
            d_src2: dec.src2,
            x_op: self.lat.x.op,
            x_dst: self.lat.x.dst,
            x_cond_val: m_next.cond_holds,
            w_entering: w_next.status,
            w_stat: self.lat.w.status,
        });

        let retiring = self.lat.w;

        // edge trigger
        if ctl.f == CtlMode::Load {
            self.lat.f = f_out.f;
        }
        self.lat.d = tick(self.lat.d, f_out.d, ctl.d, DLatch::bubble());
        self.lat.x = tick(self.lat.x, dec.x, ctl.x, XLatch::bubble());
        self.lat.m = tick(self.lat.m, m_next, ctl.m, MLatch::bubble());
        self.lat.w = tick(self.lat.w, w_next, ctl.w, WLatch::bubble());

        // hazards only ever touch F, D and X; the M/W drain at shutdown
        // is not counted
        for mode in [ctl.f, ctl.d, ctl.x] {
            match mode {
                CtlMode::Bubble => self.bubble_count += 1,
                CtlMode::Stall => self.stall_count += 1,
                _ => {}
            }
        }

        if self.tty_out {
            self.print_state(&ctl, &retiring);
        }

        if retiring.status == Stat::Bub {
            return None;
        }
        if retiring.status.is_abnormal() {
            self.terminate = true;
            self.status = retiring.status;
        }
        let retire = Retire {
            cycle: self.cycle_count,
            insn: retiring.insn,
            op: retiring.op,
            status: retiring.status,
            wrote: if wb.w_enable {
                Some((wb.dst, wb.val))
            } else {
                None
            },
        };
        tracing::debug!(
            cycle = retire.cycle,
            insn = retire.insn,
            op = %retire.op,
            status = ?retire.status,
            "retire"
        );
        Some(retire)
    }

    pub fn is_terminate(&self) -> bool {
        self.terminate
    }

    /// Final program status; meaningful once terminated.
    pub fn status(&self) -> Stat {
        self.status
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn bubble_count(&self) -> u64 {
        self.bubble_count
    }

    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// (code, value) pairs for X0..X30 then SP, testbench-style codes.
    pub fn registers(&self) -> Vec<(u8, u64)> {
        let mut regs: Vec<(u8, u64)> = self
            .machine
            .regs
            .gpr
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u8, *v))
            .collect();
        regs.push((31, self.machine.regs.sp));
        regs
    }

    // print state at the end of a cycle
    fn print_state(&self, ctl: &LatchCtl, retiring: &WLatch) {
        println!("{:=^72}", format!(" Cycle {} ", self.cycle_count));
        println!(
            "Stat    D {:?}\tX {:?}\tM {:?}\tW {:?}",
            self.lat.d.status, self.lat.x.status, self.lat.m.status, self.lat.w.status
        );
        println!(
            "icode   D {:6}\tX {:6}\tM {:6}\tW {:6}",
            self.lat.d.op.name(),
            self.lat.x.op.name(),
            self.lat.m.op.name(),
            self.lat.w.op.name()
        );
        println!(
            "Control F {}\tD {}\tX {}\tM {}\tW {}",
            format_ctrl(ctl.f),
            format_ctrl(ctl.d),
            format_ctrl(ctl.x),
            format_ctrl(ctl.m),
            format_ctrl(ctl.w)
        );
        println!(
            "pc {:#x}  pred_pc {:#x}  nzcv {:04b}  retired {}",
            self.machine.pc,
            self.lat.f.pred_pc,
            self.machine.nzcv,
            retiring.op.name()
        );
        for row in self.machine.regs.gpr.chunks(4).enumerate() {
            let (i, chunk) = row;
            let cells: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(j, v)| format!("x{:<2} {}", i * 4 + j, format_reg_val(*v)))
                .collect();
            println!("{}", cells.join("  "));
        }
        println!("sp  {}", format_reg_val(self.machine.regs.sp));
        println!();
    }
}

fn tick<T>(cur: T, next: T, mode: CtlMode, bubble: T) -> T {
    match mode {
        CtlMode::Load => next,
        CtlMode::Stall => cur,
        CtlMode::Bubble => bubble,
        CtlMode::Error => cur,
    }
}
