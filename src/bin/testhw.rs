use std::path::PathBuf;

use anyhow::{bail, Result};
use charm_pipe_rs::isa::AluOp;
use charm_pipe_rs::tb::{
    self, TestResults, ALU_FILENAME, EC_FILENAME, REGFILE_FILENAME,
};
use clap::Parser;

/// Hardware-element testbench: checks the ALU and register file against
/// recorded testcase files.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbosity level: 0 shows the final score, 1 reports failing cases,
    /// 2 stops and dumps the first failure
    #[arg(short = 'v', default_value_t = 0)]
    verbosity: u8,

    /// Restrict ALU checking to one operation tag (e.g. PLUS_OP)
    #[arg(short = 'o', long)]
    op: Option<String>,

    /// Also run the extra-credit conditional-select testcases
    #[arg(short = 'e', long)]
    extra_credit: bool,

    /// Directory holding the testcase files
    #[arg(long, default_value = "testcases/hw_elts")]
    dir: PathBuf,

    /// Regenerate the testcase files instead of checking them
    #[arg(long)]
    generate: bool,
}

fn report(name: &str, res: &TestResults) {
    println!(
        "{name}: {}/{} passed",
        res.total - res.failed,
        res.total
    );
    if res.failed_ops != 0 {
        for op in AluOp::ALL {
            if res.failed_ops & 1 << op.code() != 0 {
                println!("\tfailing op: {op}");
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    charm_pipe_rs::logging_setup(match args.verbosity {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        _ => tracing::Level::DEBUG,
    });

    let filter = match &args.op {
        Some(name) => match AluOp::from_name(name) {
            Some(op) => {
                tracing::info!("testing operation: {op}");
                Some(op)
            }
            None => bail!("invalid ALU operation: {name}"),
        },
        None => None,
    };

    if args.generate {
        std::fs::create_dir_all(&args.dir)?;
        let n = tb::generate_alu_file(&args.dir.join(ALU_FILENAME))?;
        println!("generated {n} ALU testcases");
        let n = tb::generate_regfile_file(&args.dir.join(REGFILE_FILENAME))?;
        println!("generated {n} regfile testcases");
        if args.extra_credit {
            let n = tb::generate_ec_file(&args.dir.join(EC_FILENAME))?;
            println!("generated {n} extra-credit testcases");
        }
        return Ok(());
    }

    let alu = tb::run_alu_tests(&args.dir.join(ALU_FILENAME), filter, args.verbosity)?;
    report("ALU", &alu);
    let regfile = tb::run_regfile_tests(&args.dir.join(REGFILE_FILENAME), args.verbosity)?;
    report("regfile", &regfile);
    let mut failed = alu.failed + regfile.failed;

    if args.extra_credit {
        let ec = tb::run_ec_tests(&args.dir.join(EC_FILENAME), filter, args.verbosity)?;
        report("extra credit", &ec);
        failed += ec.failed;
    }

    if failed > 0 {
        bail!("{failed} testcases failed");
    }
    Ok(())
}
