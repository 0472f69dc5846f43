// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Binary entrypoint: install the soft-MMU, take mappings, play the game.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::process;

use clap::Parser;
use log::{error, info};
use mmuctl::{sandbox, Collatz, GameMemory, Menu, MenuError, BLANK_QUICKSOLVER, REFERENCE_QUICKSOLVER};
use softmmu::{fatal, MmuConfig, Runtime};

#[derive(Debug, Parser)]
#[command(name = "mmuctl", about = "Maps pages through a software MMU, then scores Collatz runs through it")]
struct Args {
    /// Radix levels of the translation tree (must divide 20).
    #[arg(long, default_value_t = 2)]
    levels: u32,
    /// Descriptor the game reads rounds and start values from.
    #[arg(long, default_value_t = 41)]
    input_fd: RawFd,
    /// Descriptor the game writes solutions and the access count to.
    #[arg(long, default_value_t = 42)]
    output_fd: RawFd,
    /// Wall-clock bound in seconds.
    #[arg(long, default_value_t = 120)]
    alarm_secs: u32,
    /// Restrict the main thread to a syscall allow-list before reading input.
    #[arg(long)]
    seccomp: bool,
    /// Seed the quick-solver with correct answers instead of zeros.
    #[arg(long)]
    reference_table: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    // SAFETY: alarm has no memory-safety preconditions.
    unsafe { libc::alarm(args.alarm_secs) };

    let Some(config) = MmuConfig::default().with_levels(args.levels) else {
        error!("--levels {} does not divide the 20 index bits", args.levels);
        process::exit(2);
    };
    let runtime = Runtime::install(config).unwrap_or_else(|err| fatal(&err));

    // SAFETY: the descriptors are provided by whoever launched us and are not
    // used anywhere else in the process.
    let mut game_input = unsafe { File::from_raw_fd(args.input_fd) };
    let mut game_output = unsafe { File::from_raw_fd(args.output_fd) };

    if args.seccomp {
        sandbox::enforce().unwrap_or_else(|err| fatal(&err));
    }

    let ctx = runtime.context();
    let memory = GameMemory::allocate(ctx).unwrap_or_else(|err| fatal(&err));

    let mut space = runtime.address_space();
    let mut menu = Menu::new(io::stdin().lock(), io::stdout().lock());
    match menu.run(&mut space) {
        Ok(()) => {}
        Err(MenuError::Fatal(err)) => fatal(&err),
        Err(err) => {
            info!("menu ended: {err}");
            process::exit(1);
        }
    }
    drop(menu);
    space.log_mappings();
    ctx.dump_tlb();

    ctx.reset_accesses();
    let region = runtime.region();
    let table = if args.reference_table { &REFERENCE_QUICKSOLVER } else { &BLANK_QUICKSOLVER };
    let game = Collatz::new(&region, memory, table);
    let mut console = io::stdout();
    if let Err(err) = game.play(&mut game_input, &mut game_output, &mut console, || ctx.accesses()) {
        println!("{err}");
        process::exit(1);
    }

    let count = ctx.accesses();
    println!("final access count: {count}");
    if game_output.write_all(&(count as u32).to_ne_bytes()).is_err() {
        println!("failed to reply with access count");
        process::exit(1);
    }
}
