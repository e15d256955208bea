//! Command-line runner for compiled LSL2 script images.
//!
//! # Usage
//! ```text
//! lsl-vm <image> [OPTIONS]
//! lsl-vm --demo [OPTIONS]
//! ```
//!
//! # Arguments
//! - `image`: Path to a compiled script image
//!
//! # Options
//! - `--demo`: Run a small built-in script instead of an image file
//! - `--quantum-ms <n>`: Time slice per quantum in milliseconds
//! - `--ticks <n>`: Maximum number of quanta to run (default 1000)
//! - `--event <name>`: Queue an event by handler name, e.g. `touch_start`.
//!   Arguments are zeroed. May be repeated.
//! - `--restore <file>`: Restore a saved state before running
//! - `--save <file>`: Save the state after running
//! - `--dump-heap`: Print the heap blocks after running
//! - `--verbose`: Log every executed instruction

use lsl_vm::utils::log::{Level, set_min_level};
use lsl_vm::virtual_machine::config::VmConfig;
use lsl_vm::virtual_machine::errors::VMError;
use lsl_vm::virtual_machine::events::EventType;
use lsl_vm::virtual_machine::library::Library;
use lsl_vm::virtual_machine::registers::Register;
use lsl_vm::virtual_machine::program::{CodeBuilder, ImageBuilder, type_pair};
use lsl_vm::virtual_machine::value::LslType;
use lsl_vm::virtual_machine::vm::{ExecContext, Runtime, ScriptVm};
use lsl_vm::{error, info, warn};
use std::env;
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Options {
    image: Option<String>,
    demo: bool,
    quantum: Option<Duration>,
    ticks: u32,
    events: Vec<EventType>,
    restore: Option<String>,
    save: Option<String>,
    dump_heap: bool,
    verbose: bool,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let options = parse_args(&args);
    if options.verbose {
        set_min_level(Level::Debug);
    }

    let image = if options.demo {
        demo_image()
    } else {
        let path = options.image.as_deref().unwrap_or_default();
        match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Failed to read image {}: {}", path, e);
                process::exit(1);
            }
        }
    };

    let mut config = VmConfig::default();
    if let Some(quantum) = options.quantum {
        config = config.with_quantum(quantum);
    }
    let runtime = Arc::new(Runtime::new(Library::builtin()));
    let mut vm = match ScriptVm::new(&image, runtime, config) {
        Ok(vm) => vm.with_context(ExecContext::new(Uuid::new_v4())),
        Err(e) => {
            eprintln!("Failed to load image: {}", e);
            process::exit(1);
        }
    };
    info!(
        "loaded script {} ({} bytes, {} free)",
        vm.script_id(),
        vm.used_memory(),
        vm.free_memory()
    );

    if let Some(path) = &options.restore {
        let restored = fs::read(path)
            .map_err(VMError::from)
            .and_then(|bytes| vm.read_state(&bytes));
        if let Err(e) = restored {
            eprintln!("Failed to restore state from {}: {}", path, e);
            process::exit(1);
        }
    }

    for &event in &options.events {
        if !vm.add_event(event, Vec::new()) {
            warn!("event queue full, dropped {}", event.handler_name());
        }
    }

    run(&mut vm, options.ticks);
    report(&vm);

    if options.dump_heap {
        for block in vm.memory().heap_blocks() {
            println!(
                "{:#06x} {:>6} bytes {:<10} refs {}",
                block.offset,
                block.size,
                block.lsl_type.name(),
                block.ref_count
            );
        }
    }

    if let Some(path) = &options.save {
        if let Err(e) = fs::write(path, vm.write_state()) {
            eprintln!("Failed to save state to {}: {}", path, e);
            process::exit(1);
        }
    }

    if vm.fault().is_some() {
        process::exit(2);
    }
}

/// Runs quanta until the script is idle, faults or `ticks` quanta have passed.
fn run(vm: &mut ScriptVm, ticks: u32) {
    let mut busy = Duration::ZERO;
    for _ in 0..ticks {
        let before = vm.instruction_count();
        match vm.run_quanta() {
            Ok(elapsed) => busy += elapsed,
            Err(fault) => {
                error!("script stopped: {}", fault);
                break;
            }
        }
        for line in vm.take_output() {
            println!("{}", line);
        }

        let sleep = vm.sleep();
        if sleep > 0.0 {
            std::thread::sleep(Duration::try_from_secs_f32(sleep.min(60.0)).unwrap_or_default());
            vm.set_sleep(0.0);
            continue;
        }
        if vm.is_reset_pending() {
            vm.reset();
            continue;
        }
        let idle = vm.is_finished()
            && vm.pending_events() == 0
            && !vm.is_state_change_pending()
            && vm.instruction_count() == before;
        if idle {
            break;
        }
    }
    info!(
        "{} instructions in {:?}, energy {:.1}",
        vm.instruction_count(),
        busy,
        vm.energy()
    );
}

fn report(vm: &ScriptVm) {
    let mem = vm.memory();
    match vm.fault() {
        Some(fault) => println!("fault: {}", fault),
        None => println!("ok"),
    }
    for reg in [Register::Ip, Register::Sp, Register::Bp, Register::Hp, Register::Cs] {
        println!("  {:<4} {:#06x}", reg.mnemonic(), mem.register(reg));
    }
    println!("  free {} bytes, energy {:.1}", vm.free_memory(), vm.energy());
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options {
        image: None,
        demo: false,
        quantum: None,
        ticks: 1000,
        events: Vec::new(),
        restore: None,
        save: None,
        dump_heap: false,
        verbose: false,
    };

    let value = |i: usize, flag: &str| -> String {
        match args.get(i) {
            Some(v) => v.clone(),
            None => {
                eprintln!("{} requires an argument", flag);
                process::exit(1);
            }
        }
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--demo" => options.demo = true,
            "--dump-heap" => options.dump_heap = true,
            "--verbose" => options.verbose = true,
            "--quantum-ms" => {
                i += 1;
                match value(i, "--quantum-ms").parse() {
                    Ok(ms) => options.quantum = Some(Duration::from_millis(ms)),
                    Err(_) => {
                        eprintln!("Invalid quantum: {}", args[i]);
                        process::exit(1);
                    }
                }
            }
            "--ticks" => {
                i += 1;
                match value(i, "--ticks").parse() {
                    Ok(ticks) => options.ticks = ticks,
                    Err(_) => {
                        eprintln!("Invalid tick count: {}", args[i]);
                        process::exit(1);
                    }
                }
            }
            "--event" => {
                i += 1;
                let name = value(i, "--event");
                match EventType::from_handler_name(&name) {
                    Some(event) => options.events.push(event),
                    None => {
                        eprintln!("Unknown event: {}", name);
                        process::exit(1);
                    }
                }
            }
            "--restore" => {
                i += 1;
                options.restore = Some(value(i, "--restore"));
            }
            "--save" => {
                i += 1;
                options.save = Some(value(i, "--save"));
            }
            other if !other.starts_with("--") && options.image.is_none() => {
                options.image = Some(other.to_string());
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
        i += 1;
    }

    if options.image.is_none() && !options.demo {
        eprintln!("No image given\n");
        print_usage(&args[0]);
        process::exit(1);
    }
    options
}

/// Greets on entry and counts touches.
fn demo_image() -> Vec<u8> {
    let say = Library::builtin().index_of("llOwnerSay").unwrap_or(0) as u8;
    let mut builder = ImageBuilder::default();
    let touches = builder.global(4);
    let state = builder.state("default");
    builder.handler(
        state,
        EventType::StateEntry,
        0,
        CodeBuilder::new()
            .frame(None, 4, |b| b.push_arg_s("Hello, Avatar!"))
            .call_lib(say)
            .push_arg_s("Touch me")
            .print(LslType::String as u8)
            .ret(),
    );
    builder.handler(
        state,
        EventType::TouchStart,
        4,
        CodeBuilder::new()
            .push_g(touches)
            .push_arg_i(1)
            .add(type_pair(LslType::Integer, LslType::Integer))
            .store_g(touches)
            .print(LslType::Integer as u8)
            .ret(),
    );
    builder.build()
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <image> [OPTIONS]", program);
    eprintln!("       {} --demo [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --demo                Run a small built-in script");
    eprintln!("  --quantum-ms <n>      Time slice per quantum in milliseconds");
    eprintln!("  --ticks <n>           Maximum number of quanta (default 1000)");
    eprintln!("  --event <name>        Queue an event by handler name (repeatable)");
    eprintln!("  --restore <file>      Restore a saved state before running");
    eprintln!("  --save <file>         Save the state after running");
    eprintln!("  --dump-heap           Print heap blocks after running");
    eprintln!("  --verbose             Log every executed instruction");
}
