//! Binary representation of chArm instructions and the assembled object.

use std::{collections::BTreeMap, fmt::Display};

use anyhow::{bail, Context, Result};

use crate::isa::Cond;
use crate::loader::TEXT_BASE;

pub type SymbolMap = BTreeMap<String, u64>;

/// An immediate that may still be a label reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Imm {
    Num(i64),
    Label(String),
}

impl Imm {
    fn desymbol(&self, sym: &SymbolMap) -> Result<i64> {
        match self {
            Imm::Num(n) => Ok(*n),
            Imm::Label(label) => sym
                .get(label)
                .map(|a| *a as i64)
                .with_context(|| format!("undefined label `{label}`")),
        }
    }
}

/// chArm instructions as written in assembly. Registers are raw encoding
/// slots (31 = sp or xzr depending on position).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    Nop,
    Hlt,
    Ret,
    B(Imm),
    Bl(Imm),
    BCond(Cond, Imm),
    Adrp(u8, Imm),
    /// `ldur rt, [rn, #imm9]`
    Ldur(u8, u8, i64),
    Stur(u8, u8, i64),
    /// `movz rd, #imm16, lsl #(hw*16)`
    Movz(u8, u16, u8),
    Movk(u8, u16, u8),
    AddRi(u8, u8, u16),
    SubRi(u8, u8, u16),
    AddsRr(u8, u8, u8),
    SubsRr(u8, u8, u8),
    AndsRr(u8, u8, u8),
    OrrRr(u8, u8, u8),
    EorRr(u8, u8, u8),
    Cmp(u8, u8),
    Cmn(u8, u8),
    Tst(u8, u8),
    Mvn(u8, u8),
    LslI(u8, u8, u8),
    LsrI(u8, u8, u8),
    AsrI(u8, u8, u8),
}

fn branch_offset(addr: u64, target: i64, bits: u32) -> Result<u32> {
    let delta = target.wrapping_sub(addr as i64);
    if delta & 0x3 != 0 {
        bail!("branch target {target:#x} is not word aligned");
    }
    let words = delta >> 2;
    let bound = 1i64 << (bits - 1);
    if words < -bound || words >= bound {
        bail!("branch target {target:#x} out of range");
    }
    Ok((words as u32) & ((1 << bits) - 1))
}

impl Inst {
    /// Encode at `addr`, resolving label references through `sym`.
    pub fn encode(&self, addr: u64, sym: &SymbolMap) -> Result<u32> {
        use Inst::*;
        let word = match self {
            Nop => 0xD503_201F,
            Hlt => 0xD440_0000,
            Ret => 0xD65F_03C0,
            B(imm) => 0x1400_0000 | branch_offset(addr, imm.desymbol(sym)?, 26)?,
            Bl(imm) => 0x9400_0000 | branch_offset(addr, imm.desymbol(sym)?, 26)?,
            BCond(cond, imm) => {
                0x5400_0000 | branch_offset(addr, imm.desymbol(sym)?, 19)? << 5 | *cond as u32
            }
            Adrp(rd, imm) => {
                let target = imm.desymbol(sym)? as u64;
                let pages = ((target & !0xFFF).wrapping_sub(addr & !0xFFF) >> 12) as u32;
                let immlo = pages & 0x3;
                let immhi = pages >> 2 & 0x7_FFFF;
                0x9000_0000 | immlo << 29 | immhi << 5 | *rd as u32
            }
            Ldur(rt, rn, imm) => {
                0xF840_0000 | imm9(*imm)? << 12 | (*rn as u32) << 5 | *rt as u32
            }
            Stur(rt, rn, imm) => {
                0xF800_0000 | imm9(*imm)? << 12 | (*rn as u32) << 5 | *rt as u32
            }
            Movz(rd, imm, hw) => {
                0xD280_0000 | (*hw as u32) << 21 | (*imm as u32) << 5 | *rd as u32
            }
            Movk(rd, imm, hw) => {
                0xF280_0000 | (*hw as u32) << 21 | (*imm as u32) << 5 | *rd as u32
            }
            AddRi(rd, rn, imm) => {
                0x9100_0000 | imm12(*imm)? << 10 | (*rn as u32) << 5 | *rd as u32
            }
            SubRi(rd, rn, imm) => {
                0xD100_0000 | imm12(*imm)? << 10 | (*rn as u32) << 5 | *rd as u32
            }
            AddsRr(rd, rn, rm) => rrr(0xAB00_0000, *rd, *rn, *rm),
            SubsRr(rd, rn, rm) => rrr(0xEB00_0000, *rd, *rn, *rm),
            AndsRr(rd, rn, rm) => rrr(0xEA00_0000, *rd, *rn, *rm),
            OrrRr(rd, rn, rm) => rrr(0xAA00_0000, *rd, *rn, *rm),
            EorRr(rd, rn, rm) => rrr(0xCA00_0000, *rd, *rn, *rm),
            Cmn(rn, rm) => rrr(0xAB00_0000, 31, *rn, *rm),
            Cmp(rn, rm) => rrr(0xEB00_0000, 31, *rn, *rm),
            Tst(rn, rm) => rrr(0xEA00_0000, 31, *rn, *rm),
            Mvn(rd, rm) => rrr(0xAA20_0000, *rd, 31, *rm),
            LslI(rd, rn, sh) => {
                let sh = *sh as u32 & 0x3F;
                0xD340_0000 | ((64 - sh) & 0x3F) << 16 | (63 - sh) << 10
                    | (*rn as u32) << 5
                    | *rd as u32
            }
            LsrI(rd, rn, sh) => {
                0xD340_0000 | (*sh as u32 & 0x3F) << 16 | 63 << 10 | (*rn as u32) << 5
                    | *rd as u32
            }
            AsrI(rd, rn, sh) => {
                0x9340_0000 | (*sh as u32 & 0x3F) << 16 | 63 << 10 | (*rn as u32) << 5
                    | *rd as u32
            }
        };
        Ok(word)
    }
}

fn rrr(base: u32, rd: u8, rn: u8, rm: u8) -> u32 {
    base | (rm as u32) << 16 | (rn as u32) << 5 | rd as u32
}

fn imm9(imm: i64) -> Result<u32> {
    if !(-256..256).contains(&imm) {
        bail!("offset {imm} does not fit in 9 bits");
    }
    Ok((imm as u32) & 0x1FF)
}

fn imm12(imm: u16) -> Result<u32> {
    if imm >= 1 << 12 {
        bail!("immediate {imm} does not fit in 12 bits");
    }
    Ok(imm as u32)
}

/// One source line with its assigned address and parsed instruction.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub addr: Option<u64>,
    pub inst: Option<Inst>,
    pub label: Option<String>,
    pub src: String,
}

/// An assembled program: little-endian text image, symbols, listing.
#[derive(Debug, Clone, Default)]
pub struct Object {
    pub binary: Vec<u8>,
    pub symbols: SymbolMap,
    pub source: Vec<SourceInfo>,
    pub entry: u64,
}

impl Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for info in &self.source {
            match info.addr {
                Some(addr) => {
                    let off = (addr - TEXT_BASE) as usize;
                    let word = crate::utils::get_u32(&self.binary[off..]);
                    writeln!(f, "{:#010x}: {:08x} | {}", addr, word, info.src)?;
                }
                None => writeln!(f, "{:>21}| {}", "", info.src)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_encodings() {
        let sym = SymbolMap::new();
        assert_eq!(Inst::Nop.encode(0, &sym).unwrap(), 0xD503_201F);
        assert_eq!(Inst::Hlt.encode(0, &sym).unwrap(), 0xD440_0000);
        assert_eq!(Inst::Ret.encode(0, &sym).unwrap(), 0xD65F_03C0);
    }

    #[test]
    fn branch_offsets_are_relative_words() {
        let mut sym = SymbolMap::new();
        sym.insert("back".into(), 0x40_0000);
        let b = Inst::B(Imm::Label("back".into()));
        // from 0x400008, offset is -2 words
        let word = b.encode(0x40_0008, &sym).unwrap();
        assert_eq!(word, 0x1400_0000 | 0x03FF_FFFE);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let sym = SymbolMap::new();
        assert!(Inst::B(Imm::Label("nowhere".into()))
            .encode(0, &sym)
            .is_err());
    }

    #[test]
    fn shift_aliases_encode_as_bitfield_moves() {
        let sym = SymbolMap::new();
        assert_eq!(
            Inst::LslI(1, 0, 4).encode(0, &sym).unwrap(),
            0xD37C_EC01
        );
        assert_eq!(
            Inst::LsrI(1, 0, 4).encode(0, &sym).unwrap(),
            0xD344_FC01
        );
    }

    #[test]
    fn compares_use_slot31_destination() {
        let sym = SymbolMap::new();
        let cmp = Inst::Cmp(1, 2).encode(0, &sym).unwrap();
        assert_eq!(cmp & 0x1F, 31);
        assert_eq!(cmp >> 5 & 0x1F, 1);
        assert_eq!(cmp >> 16 & 0x1F, 2);
    }
}
