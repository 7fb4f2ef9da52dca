//! This module provides parsing utilities for chArm assembly.

use anyhow::{bail, Context, Result};
use pest::Parser;
use pest_derive::Parser;

use crate::isa::Cond;
use crate::loader::TEXT_BASE;
use crate::object::{Imm, Inst, Object, SourceInfo};
use crate::utils::put_u32;

#[derive(Parser)]
#[grammar = "asm/grammar.pest"] // relative to src
pub struct CharmAsmParser;

pub fn parse(src: &str) -> Result<pest::iterators::Pairs<'_, Rule>> {
    Ok(CharmAsmParser::parse(Rule::main, src)
        .context("fail to parse assembly source")?
        .next()
        .unwrap()
        .into_inner())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOption {
    verbose: bool,
}

impl AssembleOption {
    pub fn set_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Reg(u8),
    Imm(i64),
    Mem(u8, i64),
    Shift(i64),
    Sym(String),
}

fn reg_code(text: &str) -> Result<u8> {
    let lower = text.to_ascii_lowercase();
    match lower.as_str() {
        "sp" | "xzr" => Ok(31),
        "lr" => Ok(30),
        _ => {
            let n: u8 = lower
                .strip_prefix('x')
                .and_then(|d| d.parse().ok())
                .with_context(|| format!("bad register `{text}`"))?;
            if n > 30 {
                bail!("bad register `{text}`");
            }
            Ok(n)
        }
    }
}

fn imm_value(text: &str) -> Result<i64> {
    let body = text
        .strip_prefix('#')
        .with_context(|| format!("bad immediate `{text}`"))?;
    let (neg, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let val = if let Some(hex) = body.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        body.parse()
    }
    .with_context(|| format!("bad immediate `{text}`"))?;
    Ok(if neg { -val } else { val })
}

fn parse_operand(pair: pest::iterators::Pair<'_, Rule>) -> Result<Operand> {
    let inner = pair.into_inner().next().unwrap();
    Ok(match inner.as_rule() {
        Rule::reg => Operand::Reg(reg_code(inner.as_str())?),
        Rule::imm => Operand::Imm(imm_value(inner.as_str())?),
        Rule::shift => {
            let imm = inner.into_inner().next().unwrap();
            Operand::Shift(imm_value(imm.as_str())?)
        }
        Rule::mem => {
            let mut parts = inner.into_inner();
            let base = reg_code(parts.next().unwrap().as_str())?;
            let off = match parts.next() {
                Some(imm) => imm_value(imm.as_str())?,
                None => 0,
            };
            Operand::Mem(base, off)
        }
        Rule::ident => Operand::Sym(inner.as_str().to_string()),
        rule => bail!("unexpected operand rule {rule:?}"),
    })
}

fn target(operand: &Operand) -> Result<Imm> {
    match operand {
        Operand::Sym(label) => Ok(Imm::Label(label.clone())),
        Operand::Imm(addr) => Ok(Imm::Num(*addr)),
        other => bail!("bad branch target {other:?}"),
    }
}

fn build_inst(mnemonic: &str, operands: &[Operand]) -> Result<Inst> {
    use Operand::*;
    let mn = mnemonic.to_ascii_lowercase();

    let inst = match (mn.as_str(), operands) {
        ("nop", []) => Inst::Nop,
        ("hlt", []) => Inst::Hlt,
        ("ret", []) => Inst::Ret,
        ("b", [t]) => Inst::B(target(t)?),
        ("bl", [t]) => Inst::Bl(target(t)?),
        ("adrp", [Reg(rd), t]) => Inst::Adrp(*rd, target(t)?),
        ("ldur", [Reg(rt), Mem(rn, off)]) => Inst::Ldur(*rt, *rn, *off),
        ("stur", [Reg(rt), Mem(rn, off)]) => Inst::Stur(*rt, *rn, *off),
        ("movz", [Reg(rd), Imm(imm)]) => Inst::Movz(*rd, imm16(*imm)?, 0),
        ("movz", [Reg(rd), Imm(imm), Shift(sh)]) => Inst::Movz(*rd, imm16(*imm)?, hw(*sh)?),
        ("movk", [Reg(rd), Imm(imm)]) => Inst::Movk(*rd, imm16(*imm)?, 0),
        ("movk", [Reg(rd), Imm(imm), Shift(sh)]) => Inst::Movk(*rd, imm16(*imm)?, hw(*sh)?),
        ("add", [Reg(rd), Reg(rn), Imm(imm)]) => Inst::AddRi(*rd, *rn, imm12(*imm)?),
        ("sub", [Reg(rd), Reg(rn), Imm(imm)]) => Inst::SubRi(*rd, *rn, imm12(*imm)?),
        ("adds", [Reg(rd), Reg(rn), Reg(rm)]) => Inst::AddsRr(*rd, *rn, *rm),
        ("subs", [Reg(rd), Reg(rn), Reg(rm)]) => Inst::SubsRr(*rd, *rn, *rm),
        ("ands", [Reg(rd), Reg(rn), Reg(rm)]) => Inst::AndsRr(*rd, *rn, *rm),
        ("orr", [Reg(rd), Reg(rn), Reg(rm)]) => Inst::OrrRr(*rd, *rn, *rm),
        ("eor", [Reg(rd), Reg(rn), Reg(rm)]) => Inst::EorRr(*rd, *rn, *rm),
        ("cmp", [Reg(rn), Reg(rm)]) => Inst::Cmp(*rn, *rm),
        ("cmn", [Reg(rn), Reg(rm)]) => Inst::Cmn(*rn, *rm),
        ("tst", [Reg(rn), Reg(rm)]) => Inst::Tst(*rn, *rm),
        ("mvn", [Reg(rd), Reg(rm)]) => Inst::Mvn(*rd, *rm),
        ("lsl", [Reg(rd), Reg(rn), Imm(sh)]) => Inst::LslI(*rd, *rn, shamt(*sh)?),
        ("lsr", [Reg(rd), Reg(rn), Imm(sh)]) => Inst::LsrI(*rd, *rn, shamt(*sh)?),
        ("asr", [Reg(rd), Reg(rn), Imm(sh)]) => Inst::AsrI(*rd, *rn, shamt(*sh)?),
        (cond_branch, [t]) if cond_branch.starts_with("b.") => {
            let cond = Cond::from_name(&cond_branch[2..])
                .with_context(|| format!("unknown condition `{cond_branch}`"))?;
            Inst::BCond(cond, target(t)?)
        }
        _ => bail!("cannot assemble `{mnemonic}` with operands {operands:?}"),
    };
    Ok(inst)
}

fn imm16(imm: i64) -> Result<u16> {
    u16::try_from(imm).with_context(|| format!("immediate {imm} does not fit in 16 bits"))
}

fn imm12(imm: i64) -> Result<u16> {
    if !(0..1 << 12).contains(&imm) {
        bail!("immediate {imm} does not fit in 12 bits");
    }
    Ok(imm as u16)
}

fn hw(shift: i64) -> Result<u8> {
    match shift {
        0 | 16 | 32 | 48 => Ok((shift / 16) as u8),
        _ => bail!("move shift must be 0, 16, 32 or 48, got {shift}"),
    }
}

fn shamt(sh: i64) -> Result<u8> {
    if !(0..64).contains(&sh) {
        bail!("shift amount {sh} out of range");
    }
    Ok(sh as u8)
}

/// Assemble chArm source into an [`Object`] based at the text segment.
pub fn assemble(src: &str, option: AssembleOption) -> Result<Object> {
    let mut obj = Object {
        entry: TEXT_BASE,
        ..Object::default()
    };

    let mut addr = TEXT_BASE;
    for line in parse(src)? {
        if line.as_rule() != Rule::line {
            continue; // EOI
        }
        let src_text = line.as_str().trim().to_string();
        let mut info = SourceInfo {
            addr: None,
            inst: None,
            label: None,
            src: src_text,
        };
        for part in line.into_inner() {
            match part.as_rule() {
                Rule::label_def => {
                    let name = part.into_inner().next().unwrap().as_str();
                    obj.symbols.insert(name.to_string(), addr);
                    info.label = Some(name.to_string());
                }
                Rule::instr => {
                    let mut inner = part.into_inner();
                    let mnemonic = inner.next().unwrap().as_str();
                    let operands = match inner.next() {
                        Some(ops) => ops
                            .into_inner()
                            .map(parse_operand)
                            .collect::<Result<Vec<_>>>()?,
                        None => vec![],
                    };
                    info.inst = Some(build_inst(mnemonic, &operands)?);
                    info.addr = Some(addr);
                    addr += 4;
                }
                _ => {}
            }
        }
        if option.verbose {
            tracing::debug!(addr = ?info.addr, inst = ?info.inst, "parsed line");
        }
        if info.inst.is_some() || info.label.is_some() {
            obj.source.push(info);
        }
    }

    obj.binary = vec![0; (addr - TEXT_BASE) as usize];
    for info in &obj.source {
        if let (Some(addr), Some(inst)) = (info.addr, &info.inst) {
            let word = inst
                .encode(addr, &obj.symbols)
                .with_context(|| format!("while encoding `{}`", info.src))?;
            let off = (addr - TEXT_BASE) as usize;
            put_u32(&mut obj.binary[off..off + 4], word);
        }
    }
    Ok(obj)
}
