// End-to-end programs driven through the assembler and the pipeline.

use charm_pipe_rs::{assemble, loader, AssembleOption, Simulator, Stat};

fn simulate(src: &str) -> anyhow::Result<Simulator> {
    let obj = assemble(src, AssembleOption::default())?;
    let mut pipe = Simulator::new(loader::load(&obj), false);
    while !pipe.is_terminate() {
        pipe.step();
        anyhow::ensure!(pipe.cycle_count() < 10_000, "exceeded cycle limit");
    }
    Ok(pipe)
}

fn gpr(pipe: &Simulator, i: usize) -> u64 {
    pipe.machine().regs.gpr[i]
}

#[test]
fn straight_line_add() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #5
        movz x1, #7
        adds x2, x0, x1
        hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 0), 5);
    assert_eq!(gpr(&pipe, 1), 7);
    assert_eq!(gpr(&pipe, 2), 12);
    assert_eq!(pipe.machine().nzcv, 0);
    assert_eq!(pipe.status(), Stat::Hlt);
    // four instructions, five stages, no hazards
    assert_eq!(pipe.cycle_count(), 8);
    Ok(())
}

#[test]
fn taken_branch_skips_fall_through() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #0
        subs x1, x0, x0
        b.eq skip
        movz x2, #9
        skip: hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 1), 0);
    // Z set by the subs
    assert_eq!(pipe.machine().nzcv & 0x4, 0x4);
    // the fall-through movz never commits
    assert_eq!(gpr(&pipe, 2), 0);
    Ok(())
}

#[test]
fn mispredicted_branch_squashes_two_slots() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #1
        subs x1, x0, xzr
        b.eq taken
        movz x2, #9
        hlt
        taken: movz x3, #7
        hlt
    "#,
    )?;
    // branch predicted taken, condition false: fall-through path wins
    assert_eq!(gpr(&pipe, 1), 1);
    assert_eq!(gpr(&pipe, 2), 9);
    assert_eq!(gpr(&pipe, 3), 0);
    // exactly the two wrongly fetched slots were bubbled
    assert_eq!(pipe.bubble_count(), 2);
    Ok(())
}

#[test]
fn load_use_inserts_exactly_one_bubble() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #100
        stur x0, [sp, #0]
        ldur x1, [sp, #0]
        adds x2, x1, x1
        hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 1), 100);
    assert_eq!(gpr(&pipe, 2), 200);
    assert_eq!(pipe.bubble_count(), 1);
    // fetch and decode each held for the one bubble cycle
    assert_eq!(pipe.stall_count(), 2);
    // five instructions, five stages, one bubble
    assert_eq!(pipe.cycle_count(), 10);
    Ok(())
}

#[test]
fn ret_from_main_halts_cleanly() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x30, #0xF0F0, lsl #48
        ret
    "#,
    )?;
    assert_eq!(pipe.status(), Stat::Hlt);
    Ok(())
}

#[test]
fn shift_through_forwarding() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #0xFFFF
        lsl x1, x0, #4
        hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 1), 0xF_FFF0);
    Ok(())
}

#[test]
fn movk_patches_one_lane() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #1
        movk x0, #2, lsl #16
        hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 0), 0x0002_0001);
    Ok(())
}

#[test]
fn forwarding_covers_every_producer_distance() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #1
        adds x1, x0, x0
        adds x2, x1, x1
        nop
        adds x3, x2, x2
        nop
        nop
        adds x4, x3, x3
        nop
        nop
        nop
        adds x5, x4, x4
        hlt
    "#,
    )?;
    for (i, expect) in [1u64, 2, 4, 8, 16, 32].into_iter().enumerate() {
        assert_eq!(gpr(&pipe, i), expect, "x{i}");
    }
    Ok(())
}

#[test]
fn store_data_forwards_after_load_use_stall() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #42
        stur x0, [sp, #0]
        ldur x1, [sp, #0]
        stur x1, [sp, #8]
        ldur x2, [sp, #8]
        hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 2), 42);
    // the store consuming the fresh load is held one cycle
    assert_eq!(pipe.bubble_count(), 1);
    Ok(())
}

#[test]
fn bl_links_and_ret_returns() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        bl func
        hlt
        func: movz x1, #3
        ret
    "#,
    )?;
    assert_eq!(gpr(&pipe, 1), 3);
    assert_eq!(gpr(&pipe, 30), loader::TEXT_BASE + 4);
    assert_eq!(pipe.status(), Stat::Hlt);
    Ok(())
}

#[test]
fn unconditional_branch_never_fetches_fall_through() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        b skip
        movz x0, #1
        skip: hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 0), 0);
    Ok(())
}

#[test]
fn invalid_instruction_word_raises_ins() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #1
        b past
        hlt
        past:
    "#,
    )?;
    // the branch lands on a zero word
    assert_eq!(pipe.status(), Stat::Ins);
    assert_eq!(gpr(&pipe, 0), 1);
    Ok(())
}

#[test]
fn data_fault_raises_adr_and_blocks_younger_commits() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        movz x0, #8
        ldur x1, [x0, #0]
        subs x2, x0, x0
        hlt
    "#,
    )?;
    assert_eq!(pipe.status(), Stat::Adr);
    assert_eq!(gpr(&pipe, 1), 0);
    // the younger subs is squashed before writeback and its flags never land
    assert_eq!(gpr(&pipe, 2), 0);
    assert_eq!(pipe.machine().nzcv, 0);
    Ok(())
}

#[test]
fn bubbles_have_no_architectural_effect() -> anyhow::Result<()> {
    let pipe = simulate("nop\nnop\nhlt")?;
    for (code, val) in pipe.registers() {
        match code {
            30 => assert_eq!(val, charm_pipe_rs::isa::RET_FROM_MAIN_ADDR),
            31 => assert_eq!(val, loader::STACK_INIT),
            _ => assert_eq!(val, 0, "x{code}"),
        }
    }
    assert_eq!(pipe.machine().nzcv, 0);
    Ok(())
}

#[test]
fn lone_hlt_terminates_deterministically() -> anyhow::Result<()> {
    let pipe = simulate("hlt")?;
    assert_eq!(pipe.status(), Stat::Hlt);
    // one slot, five stages
    assert_eq!(pipe.cycle_count(), 5);
    Ok(())
}

#[test]
fn special_addresses_bypass_the_range_check() -> anyhow::Result<()> {
    let obj = assemble(
        r#"
        movz x0, #0xF000
        stur x0, [x0, #0]
        ldur x1, [x0, #0]
        hlt
    "#,
        AssembleOption::default(),
    )?;
    let mut mach = loader::load(&obj);
    mach.mem.add_special_addr(0xF000);
    let mut pipe = Simulator::new(mach, false);
    while !pipe.is_terminate() {
        pipe.step();
        anyhow::ensure!(pipe.cycle_count() < 10_000, "exceeded cycle limit");
    }
    assert_eq!(pipe.status(), Stat::Hlt);
    assert_eq!(gpr(&pipe, 1), 0xF000);
    Ok(())
}

#[test]
fn adrp_composes_page_addresses() -> anyhow::Result<()> {
    let pipe = simulate(
        r#"
        adrp x0, #0x500000
        ldur x1, [x0, #0]
        hlt
    "#,
    )?;
    assert_eq!(gpr(&pipe, 0), 0x50_0000);
    assert_eq!(pipe.status(), Stat::Hlt);
    Ok(())
}
