use std::{env, error::Error, path::PathBuf};

use gigatron::emulator::Emulator;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let mut rom_path: Option<PathBuf> = None;
    let mut gt1_path: Option<PathBuf> = None;
    let mut load_state: Option<PathBuf> = None;
    let mut save_state: Option<PathBuf> = None;
    let mut frame_limit: usize = 300;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--gt1" => {
                if let Some(path) = args.next() {
                    gt1_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("--gt1 requires a file path");
                    return Ok(());
                }
            }
            "--load-state" => {
                if let Some(path) = args.next() {
                    load_state = Some(PathBuf::from(path));
                } else {
                    eprintln!("--load-state requires a file path");
                    return Ok(());
                }
            }
            "--save-state" => {
                if let Some(path) = args.next() {
                    save_state = Some(PathBuf::from(path));
                } else {
                    eprintln!("--save-state requires a file path");
                    return Ok(());
                }
            }
            "--frames" => {
                if let Some(value) = args.next() {
                    match value.parse::<usize>() {
                        Ok(limit) => frame_limit = limit,
                        Err(_) => {
                            eprintln!("invalid --frames value: {value}");
                            return Ok(());
                        }
                    }
                } else {
                    eprintln!("--frames requires a value");
                    return Ok(());
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            _ if rom_path.is_none() => rom_path = Some(PathBuf::from(arg)),
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                return Ok(());
            }
        }
    }

    let rom_path = match rom_path {
        Some(path) => path,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let mut emulator = Emulator::new();
    let words = emulator.load_rom_file(&rom_path)?;
    println!("Loaded {} ROM words from {}", words, rom_path.display());

    if let Some(path) = load_state {
        emulator.load_state_from_file(&path)?;
        println!("Restored machine state from {}", path.display());
    }

    if let Some(path) = &gt1_path {
        emulator.load_gt1_file(path)?;
        println!("Streaming {} through the loader", path.display());
    }

    // Budget with slack for the boot sequence, in case the ROM never
    // settles into producing VSYNC.
    let cycles_per_frame = u64::from(emulator.cpu.hz() / 60);
    let mut remaining = (frame_limit as u64 + 120) * cycles_per_frame;
    let mut frames = 0usize;
    while frames < frame_limit && remaining > 0 {
        emulator.tick();
        remaining -= 1;
        if emulator.frame_ready() {
            frames += 1;
        }
    }
    if frames < frame_limit {
        eprintln!("warning: only {frames} / {frame_limit} frames completed within the cycle budget");
    }

    if gt1_path.is_some() {
        if emulator.loader.is_complete() {
            println!("GT1 upload complete");
        } else if emulator.loader.has_error() {
            eprintln!(
                "GT1 upload failed: {}",
                emulator.loader.error().unwrap_or("unknown error")
            );
        } else {
            eprintln!(
                "warning: GT1 upload still in progress ({:.0}%)",
                emulator.loader.progress() * 100.0
            );
        }
    }

    println!(
        "Finished after {} cycles, {} frames. PC={:#06X} AC={:#04X} X={:#04X} Y={:#04X} OUT={:#04X}",
        emulator.cycles(),
        emulator.frame_count(),
        emulator.cpu.pc,
        emulator.cpu.ac,
        emulator.cpu.x,
        emulator.cpu.y,
        emulator.cpu.out,
    );

    if let Some(path) = save_state {
        emulator.save_state_to_file(&path)?;
        println!("Saved machine state to {}", path.display());
    }

    Ok(())
}

fn print_usage() {
    eprintln!("Usage: gigatron <rom-file> [--gt1 <file>] [--frames <n>] [--load-state <file>] [--save-state <file>]");
    eprintln!("  <rom-file>            Gigatron ROM (big-endian 16-bit words)");
    eprintln!("Options:");
    eprintln!("  --gt1 <file>          Stream a GT1 program through the serial loader");
    eprintln!("  --frames <n>          Number of video frames to run (default 300)");
    eprintln!("  --load-state <file>   Restore a machine state before running");
    eprintln!("  --save-state <file>   Save the machine state after running");
    eprintln!("  --help                Show this message");
}
