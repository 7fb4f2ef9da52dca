//! On-disk hardware-element testbench.
//!
//! Three binary files exercise the ALU and the register file in
//! isolation: `alu_hw.tb`, `regfile_hw.tb`, and the extra-credit
//! `ec_hw.tb` for the conditional-select family. Each file carries a
//! 4-byte magic, a little-endian u32 version, a little-endian u64 case
//! count, and packed little-endian records. The same crate both generates
//! the files (from its own hardware as reference) and checks them, so the
//! records are bit-exact inputs to the checker.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::isa::{AluOp, Cond, RegRef, NUM_GPRS};
use crate::pipeline::hardware::{alu, RegFile};

pub const ALU_FILENAME: &str = "alu_hw.tb";
pub const REGFILE_FILENAME: &str = "regfile_hw.tb";
pub const EC_FILENAME: &str = "ec_hw.tb";

const ALU_MAGIC: &[u8; 4] = b"ALU!";
const REG_MAGIC: &[u8; 4] = b"REG!";
const EC_MAGIC: &[u8; 4] = b"CH3!";
const TESTFILE_VERSION: u32 = 1;

const ALU_RECORD_LEN: usize = 32;
const REG_RECORD_LEN: usize = 28 + 2 * SNAPSHOT_LEN;
const SNAPSHOT_LEN: usize = (NUM_GPRS + 1) * 8;

/// Deterministic xorshift64 generator; the testbench must produce the
/// same files on every run.
struct XorShift(u64);

impl XorShift {
    fn new() -> XorShift {
        XorShift(0x9E37_79B9_7F4A_7C15)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AluTest {
    vala: u64,
    valb: u64,
    vale_correct: u64,
    cond: Cond,
    op: AluOp,
    valhw: u8,
    nzcv_input: u8,
    nzcv_correct: u8,
    set_flags: bool,
    condval_correct: bool,
    /// true: the case checks cond_holds; false: it checks NZCV (when
    /// set_flags) and val_e
    check_condval: bool,
}

impl Default for AluTest {
    fn default() -> Self {
        AluTest {
            vala: 0,
            valb: 0,
            vale_correct: 0,
            cond: Cond::Al,
            op: AluOp::PassA,
            valhw: 0,
            nzcv_input: 0,
            nzcv_correct: 0,
            set_flags: false,
            condval_correct: false,
            check_condval: false,
        }
    }
}

impl AluTest {
    /// Fill the expected fields by running the reference ALU.
    fn settle(&mut self) {
        let out = alu(
            self.vala,
            self.valb,
            self.valhw,
            self.op,
            self.set_flags,
            self.cond,
            self.nzcv_input,
        );
        self.vale_correct = out.val_e;
        self.condval_correct = out.cond_val;
        self.nzcv_correct = out.nzcv;
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend(self.vala.to_le_bytes());
        out.extend(self.valb.to_le_bytes());
        out.extend(self.vale_correct.to_le_bytes());
        out.push(self.cond as u8);
        out.push(self.op.code());
        out.push(self.valhw);
        out.push(self.nzcv_input);
        out.push(self.nzcv_correct);
        out.push(self.set_flags as u8);
        out.push(self.condval_correct as u8);
        out.push(self.check_condval as u8);
    }

    fn read_from(buf: &[u8]) -> Result<AluTest> {
        if buf.len() < ALU_RECORD_LEN {
            bail!("truncated ALU record");
        }
        Ok(AluTest {
            vala: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            valb: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            vale_correct: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            cond: Cond::from_bits(buf[24]),
            op: AluOp::from_code(buf[25])
                .with_context(|| format!("bad ALU op code {}", buf[25]))?,
            valhw: buf[26],
            nzcv_input: buf[27],
            nzcv_correct: buf[28],
            set_flags: buf[29] != 0,
            condval_correct: buf[30] != 0,
            check_condval: buf[31] != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegSnapshot {
    gpr: [u64; NUM_GPRS],
    sp: u64,
}

impl RegSnapshot {
    fn capture(rf: &RegFile) -> RegSnapshot {
        RegSnapshot {
            gpr: rf.gpr,
            sp: rf.sp,
        }
    }

    fn restore(&self) -> RegFile {
        RegFile {
            gpr: self.gpr,
            sp: self.sp,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        for g in self.gpr {
            out.extend(g.to_le_bytes());
        }
        out.extend(self.sp.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> RegSnapshot {
        let mut gpr = [0u64; NUM_GPRS];
        for (i, g) in gpr.iter_mut().enumerate() {
            *g = u64::from_le_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap());
        }
        RegSnapshot {
            gpr,
            sp: u64::from_le_bytes(buf[NUM_GPRS * 8..SNAPSHOT_LEN].try_into().unwrap()),
        }
    }
}

/// One register-file access with pre- and post-state snapshots, so every
/// record checks independently.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RegfileTest {
    valw: u64,
    vala_correct: u64,
    valb_correct: u64,
    src1: u8,
    src2: u8,
    dst: u8,
    w_enable: bool,
    pre: RegSnapshot,
    post: RegSnapshot,
}

impl RegfileTest {
    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend(self.valw.to_le_bytes());
        out.extend(self.vala_correct.to_le_bytes());
        out.extend(self.valb_correct.to_le_bytes());
        out.push(self.src1);
        out.push(self.src2);
        out.push(self.dst);
        out.push(self.w_enable as u8);
        self.pre.write_to(out);
        self.post.write_to(out);
    }

    fn read_from(buf: &[u8]) -> Result<RegfileTest> {
        if buf.len() < REG_RECORD_LEN {
            bail!("truncated regfile record");
        }
        Ok(RegfileTest {
            valw: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            vala_correct: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            valb_correct: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            src1: buf[24],
            src2: buf[25],
            dst: buf[26],
            w_enable: buf[27] != 0,
            pre: RegSnapshot::read_from(&buf[28..]),
            post: RegSnapshot::read_from(&buf[28 + SNAPSHOT_LEN..]),
        })
    }
}

fn write_file(path: &Path, magic: &[u8; 4], records: &[u8], count: u64) -> Result<()> {
    let mut out = Vec::with_capacity(16 + records.len());
    out.extend(magic);
    out.extend(TESTFILE_VERSION.to_le_bytes());
    out.extend(count.to_le_bytes());
    out.extend(records);
    fs::write(path, out).with_context(|| format!("could not write `{}`", path.display()))
}

/// Validate the header and return (record bytes, case count).
fn read_file(path: &Path, magic: &[u8; 4]) -> Result<(Vec<u8>, u64)> {
    let buf =
        fs::read(path).with_context(|| format!("could not read `{}`", path.display()))?;
    if buf.len() < 16 || &buf[0..4] != magic {
        bail!(
            "`{}` is not a {} testcase file",
            path.display(),
            String::from_utf8_lossy(magic)
        );
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version != TESTFILE_VERSION {
        bail!("`{}` has version {version}, expected {TESTFILE_VERSION}", path.display());
    }
    let count = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    Ok((buf[16..].to_vec(), count))
}

/// Per-run accounting; `failed_ops` is a bitset over [`AluOp::code`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TestResults {
    pub failed: u64,
    pub total: u64,
    pub failed_ops: u64,
}

const PLAIN_OPS: [AluOp; 10] = [
    AluOp::Plus,
    AluOp::Minus,
    AluOp::Or,
    AluOp::Eor,
    AluOp::And,
    AluOp::Inv,
    AluOp::Lsl,
    AluOp::Lsr,
    AluOp::Asr,
    AluOp::PassA,
];

/// Generate `alu_hw.tb`: per-op random sweeps, MOV lane composition,
/// flag-setting sweeps, the full condition grid, and the zero/carry
/// corner cases.
pub fn generate_alu_file(path: &Path) -> Result<u64> {
    let mut rng = XorShift::new();
    let mut cases: Vec<AluTest> = Vec::new();

    for op in PLAIN_OPS {
        for _ in 0..100 {
            cases.push(AluTest {
                vala: rng.next_u64(),
                valb: rng.next_u64(),
                op,
                ..AluTest::default()
            });
        }
    }

    // MOV composes a 16-bit immediate into a masked lane
    for _ in 0..100 {
        let valhw = (rng.next_u64() % 4) as u8 * 16;
        cases.push(AluTest {
            vala: rng.next_u64() & !(0xFFFFu64 << valhw),
            valb: rng.next_u64() % 65536,
            valhw,
            op: AluOp::Mov,
            ..AluTest::default()
        });
    }

    for op in [AluOp::Plus, AluOp::Minus, AluOp::And] {
        for _ in 0..100 {
            cases.push(AluTest {
                vala: rng.next_u64(),
                valb: rng.next_u64(),
                op,
                set_flags: true,
                ..AluTest::default()
            });
        }
    }

    // every condition against every flag combination
    for cond in Cond::ALL {
        for nzcv in 0..16u8 {
            cases.push(AluTest {
                cond,
                nzcv_input: nzcv,
                check_condval: true,
                ..AluTest::default()
            });
        }
    }

    // corner cases: zero flag both ways, carry out of the top bit
    let a = rng.next_u64();
    cases.push(AluTest {
        vala: a,
        valb: a,
        op: AluOp::Minus,
        set_flags: true,
        ..AluTest::default()
    });
    cases.push(AluTest {
        vala: rng.next_u64(),
        valb: 0,
        op: AluOp::And,
        set_flags: true,
        ..AluTest::default()
    });
    cases.push(AluTest {
        vala: u64::MAX,
        valb: u64::MAX,
        op: AluOp::Plus,
        set_flags: true,
        ..AluTest::default()
    });

    let mut records = Vec::with_capacity(cases.len() * ALU_RECORD_LEN);
    for case in &mut cases {
        case.settle();
        case.write_to(&mut records);
    }
    write_file(path, ALU_MAGIC, &records, cases.len() as u64)?;
    Ok(cases.len() as u64)
}

/// Generate `ec_hw.tb` for the conditional-select family.
pub fn generate_ec_file(path: &Path) -> Result<u64> {
    let mut rng = XorShift::new();
    let mut cases: Vec<AluTest> = Vec::new();
    for op in [AluOp::Csel, AluOp::Csinv, AluOp::Csinc, AluOp::Csneg] {
        for _ in 0..100 {
            cases.push(AluTest {
                vala: rng.next_u64(),
                valb: rng.next_u64(),
                op,
                cond: Cond::Eq,
                nzcv_input: (rng.next_u64() as u8) & 0b0100,
                ..AluTest::default()
            });
        }
    }
    let mut records = Vec::with_capacity(cases.len() * ALU_RECORD_LEN);
    for case in &mut cases {
        case.settle();
        case.write_to(&mut records);
    }
    write_file(path, EC_MAGIC, &records, cases.len() as u64)?;
    Ok(cases.len() as u64)
}

/// Generate `regfile_hw.tb`: random access sequences over a threaded
/// register state, XZR and SP slots included.
pub fn generate_regfile_file(path: &Path) -> Result<u64> {
    let mut rng = XorShift::new();
    let mut rf = RegFile::default();
    let mut cases: Vec<RegfileTest> = Vec::new();

    for _ in 0..300 {
        let src1 = (rng.next_u64() % 33) as u8;
        let src2 = (rng.next_u64() % 33) as u8;
        let dst = (rng.next_u64() % 33) as u8;
        let valw = rng.next_u64();
        let w_enable = rng.next_u64() % 4 != 0;

        let pre = RegSnapshot::capture(&rf);
        let (vala, valb) = rf.access(
            RegRef::from_code(src1),
            RegRef::from_code(src2),
            RegRef::from_code(dst),
            valw,
            w_enable,
        );
        cases.push(RegfileTest {
            valw,
            vala_correct: vala,
            valb_correct: valb,
            src1,
            src2,
            dst,
            w_enable,
            pre,
            post: RegSnapshot::capture(&rf),
        });
    }

    let mut records = Vec::with_capacity(cases.len() * REG_RECORD_LEN);
    for case in &cases {
        case.write_to(&mut records);
    }
    write_file(path, REG_MAGIC, &records, cases.len() as u64)?;
    Ok(cases.len() as u64)
}

fn dump_alu_case(case: &AluTest, got_e: u64, got_cond: bool, got_nzcv: u8) {
    eprintln!(
        "ALU: {} [a, b, hw, cond, NZCV_in] = [{:#x}, {:#x}, {:#x}, {}, {:04b}]",
        case.op, case.vala, case.valb, case.valhw, case.cond.name(), case.nzcv_input
    );
    eprintln!(
        "Expected: [vale, condval, NZCV] = [{:#x}, {}, {:04b}]",
        case.vale_correct, case.condval_correct, case.nzcv_correct
    );
    eprintln!(
        "Got:      [vale, condval, NZCV] = [{:#x}, {}, {:04b}]",
        got_e, got_cond, got_nzcv
    );
}

fn run_alu_records(
    path: &Path,
    magic: &[u8; 4],
    filter: Option<AluOp>,
    verbosity: u8,
) -> Result<TestResults> {
    let (records, count) = read_file(path, magic)?;
    let mut res = TestResults {
        total: count,
        ..TestResults::default()
    };

    for i in 0..count as usize {
        let buf = records
            .get(i * ALU_RECORD_LEN..)
            .context("truncated testcase file")?;
        let case = AluTest::read_from(buf)?;
        if filter.is_some_and(|op| op != case.op) {
            continue;
        }
        let out = alu(
            case.vala,
            case.valb,
            case.valhw,
            case.op,
            case.set_flags,
            case.cond,
            case.nzcv_input,
        );
        let fail = out.val_e != case.vale_correct
            || (case.check_condval && out.cond_val != case.condval_correct)
            || (case.set_flags && out.nzcv != case.nzcv_correct);
        if fail {
            if verbosity > 1 {
                dump_alu_case(&case, out.val_e, out.cond_val, out.nzcv);
                bail!("failed ALU testcase {i}");
            }
            if verbosity > 0 {
                tracing::warn!(case = i, op = %case.op, "ALU testcase failed");
            }
            res.failed += 1;
            res.failed_ops |= 1 << case.op.code();
        }
    }
    Ok(res)
}

pub fn run_alu_tests(path: &Path, filter: Option<AluOp>, verbosity: u8) -> Result<TestResults> {
    run_alu_records(path, ALU_MAGIC, filter, verbosity)
}

pub fn run_ec_tests(path: &Path, filter: Option<AluOp>, verbosity: u8) -> Result<TestResults> {
    run_alu_records(path, EC_MAGIC, filter, verbosity)
}

pub fn run_regfile_tests(path: &Path, verbosity: u8) -> Result<TestResults> {
    let (records, count) = read_file(path, REG_MAGIC)?;
    let mut res = TestResults {
        total: count,
        ..TestResults::default()
    };

    for i in 0..count as usize {
        let buf = records
            .get(i * REG_RECORD_LEN..)
            .context("truncated testcase file")?;
        let case = RegfileTest::read_from(buf)?;
        let mut rf = case.pre.restore();
        let (vala, valb) = rf.access(
            RegRef::from_code(case.src1),
            RegRef::from_code(case.src2),
            RegRef::from_code(case.dst),
            case.valw,
            case.w_enable,
        );
        let fail = vala != case.vala_correct
            || valb != case.valb_correct
            || RegSnapshot::capture(&rf) != case.post;
        if fail {
            if verbosity > 1 {
                eprintln!(
                    "Regfile: [src1, src2, dst, valw, w_enable] = [{}, {}, {}, {:#x}, {}]",
                    case.src1, case.src2, case.dst, case.valw, case.w_enable
                );
                eprintln!(
                    "Expected: [vala, valb] = [{:#x}, {:#x}]",
                    case.vala_correct, case.valb_correct
                );
                eprintln!("Got:      [vala, valb] = [{vala:#x}, {valb:#x}]");
                bail!("failed regfile testcase {i}");
            }
            if verbosity > 0 {
                tracing::warn!(case = i, "regfile testcase failed");
            }
            res.failed += 1;
        }
    }
    Ok(res)
}
