use anyhow::{bail, Context, Result};
use charm_pipe_rs::{assemble, loader, mem_diff, AssembleOption, Simulator, Stat};
use clap::Parser;

/// chArm assembler and pipeline simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, arg_required_else_help = true)]
struct Args {
    /// Path to the input assembly file
    input: String,

    /// Output filename for the assembled listing (default is input%.co)
    ///
    /// Conflicts with `run`.
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Run the assembled program in the pipeline simulator
    #[arg(long)]
    run: bool,

    /// Print per-cycle pipeline state and retirement logs
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Give up after this many clock cycles
    #[arg(long, default_value_t = 500_000)]
    max_cycles: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    charm_pipe_rs::logging_setup(if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    });

    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("could not read file `{}`", &args.input))?;
    let obj = assemble(&content, AssembleOption::default().set_verbose(args.verbose))?;

    if !args.run {
        if let Some(path) = args.output {
            std::fs::write(&path, format!("{}", obj))
                .with_context(|| format!("could not write file `{}`", &path))?;
        } else {
            print!("{}", obj);
        }
        return Ok(());
    }
    if args.output.is_some() {
        bail!("can't both specify output and run");
    }

    let mut pipe = Simulator::new(loader::load(&obj), args.verbose);
    while !pipe.is_terminate() {
        pipe.step();
        if pipe.cycle_count() >= args.max_cycles {
            bail!("exceeded {} cycles without halting", args.max_cycles);
        }
    }

    println!("terminated after {} cycles", pipe.cycle_count());
    for (code, val) in pipe.registers() {
        if val != 0 {
            let name = if code == 31 {
                "sp ".to_string()
            } else {
                format!("x{code:<2}")
            };
            println!("{name} {val:#018x}");
        }
    }
    let mach = pipe.machine();
    let initial = vec![0u8; mach.mem.data_image().len()];
    mem_diff(&initial, mach.mem.data_image(), mach.mem.data_base());

    match pipe.status() {
        Stat::Hlt => Ok(()),
        status => bail!("fatal emulation status {status:?} at pc {:#x}", mach.pc),
    }
}
