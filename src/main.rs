//! `usvm` — CLI front-end: load an image and run it to completion.

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use usvm::clock;
use usvm::debug_port::DebugPort;
use usvm::error::N_IRQS;
use usvm::loader;
use usvm::machine::UNLIMITED_CLOCKS;

/// Run a usvm kernel image.
#[derive(Parser, Debug)]
#[command(name = "usvm", version, about)]
struct Cli {
    /// Path to the kernel image to load.
    image: String,

    /// Clock budget; omit for unlimited.
    #[arg(short = 'c', long = "clocks")]
    clocks: Option<u64>,

    /// Enable verbose tracing (also settable via RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    let mut machine = match loader::load_from_file(&cli.image) {
        Ok(m) => m,
        Err(e) => {
            error!("failed to load {}: {e}", cli.image);
            return ExitCode::FAILURE;
        }
    };

    machine.verbose = cli.verbose;
    machine.max_clocks = cli.clocks.unwrap_or(UNLIMITED_CLOCKS);
    machine.start();

    info!("loaded {}, ip=0x{:x}", cli.image, machine.regs.ip());

    while machine.running() {
        let irq = clock::tick(&mut machine);
        if irq == N_IRQS {
            continue;
        }
        if irq == usvm::Irq::OutOfClocks.vector() {
            // CLOCK is pinned at max_clocks and every further tick would
            // just re-raise this IRQ forever; the budget is exhausted.
            machine.halt();
            break;
        }
        if irq == usvm::Irq::Breakpoint.vector() {
            continue;
        }
        if !machine.verbose {
            let port = DebugPort::new(&mut machine);
            info!("irq {} raised, last_irq={}", irq, port.last_irq());
        }
    }

    info!("halted at clock {}", machine.regs.get(usvm::registers::Reg::Clock));
    ExitCode::SUCCESS
}
