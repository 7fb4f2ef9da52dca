//! Segment layout and machine construction.
//!
//! Stands in for the ELF loader: it provides the memory buffers, segment
//! bases, initial PC and SP, and the special-address set the pipeline
//! consumes through the [`Memory`] predicates.

use crate::isa::RET_FROM_MAIN_ADDR;
use crate::object::Object;
use crate::pipeline::hardware::{Machine, Memory};

pub const TEXT_BASE: u64 = 0x40_0000;
pub const TEXT_SIZE: usize = 1 << 20;

/// Data segment covers static data and the downward-growing stack.
pub const DATA_BASE: u64 = 0x50_0000;
pub const DATA_SIZE: usize = 2 << 20;

/// Initial stack pointer: just under the top of the data segment, 16-byte
/// aligned.
pub const STACK_INIT: u64 = 0x6F_FFF0;

/// Build a machine ready to run an assembled object: text image in
/// instruction memory, SP at the stack top, X30 seeded with the
/// return-from-main sentinel so the outermost `ret` shuts the machine
/// down.
pub fn load(obj: &Object) -> Machine {
    let mut mem = Memory::new(TEXT_BASE, TEXT_SIZE, DATA_BASE, DATA_SIZE);
    mem.load_text(&obj.binary);
    let mut mach = Machine::new(mem, obj.entry);
    mach.regs.sp = STACK_INIT;
    mach.regs.gpr[30] = RET_FROM_MAIN_ADDR;
    mach
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{assemble, AssembleOption};

    #[test]
    fn loaded_machine_is_ready_to_fetch() {
        let obj = assemble("nop\nhlt", AssembleOption::default()).unwrap();
        let mut mach = load(&obj);
        assert_eq!(mach.pc, TEXT_BASE);
        assert_eq!(mach.regs.sp, STACK_INIT);
        assert_eq!(mach.regs.gpr[30], RET_FROM_MAIN_ADDR);
        assert_eq!(mach.mem.imem(TEXT_BASE), (0xD503_201F, false));
        assert!(mach.mem.addr_in_dmem(STACK_INIT));
        assert!(!mach.mem.addr_in_dmem(RET_FROM_MAIN_ADDR));
    }
}
