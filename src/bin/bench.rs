//! Interpreter benchmark binary.
//!
//! Measures handler execution time for representative scripts.
//! Run with: `cargo run --release --bin bench`

use std::sync::Arc;
use std::time::{Duration, Instant};

use lsl_vm::virtual_machine::config::VmConfig;
use lsl_vm::virtual_machine::events::EventType;
use lsl_vm::virtual_machine::library::Library;
use lsl_vm::virtual_machine::program::{CodeBuilder, ImageBuilder, type_pair};
use lsl_vm::virtual_machine::value::{LslType, LslValue};
use lsl_vm::virtual_machine::vm::{Runtime, ScriptVm};

const INT_INT: u8 = type_pair(LslType::Integer, LslType::Integer);

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: &'static str,
    iterations: u64,
    total: Duration,
    /// Instructions executed by the last run.
    instructions: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total / self.iterations as u32
    }

    fn print(&self) {
        let avg = self.avg();
        let ns_per_op = avg.as_nanos();
        let ns_per_instr = if self.instructions > 0 {
            format!("{:>8.1}", ns_per_op as f64 / self.instructions as f64)
        } else {
            "       -".to_string()
        };
        println!(
            "  {:<30} {:>7} iters {:>10.3} us/iter {:>12} instrs  {} ns/instr",
            self.name,
            self.iterations,
            ns_per_op as f64 / 1000.0,
            self.instructions,
            ns_per_instr,
        );
    }
}

/// Runs `f` for at least `min_duration`, returning aggregated results.
fn bench<F>(name: &'static str, min_duration: Duration, mut f: F) -> BenchResult
where
    F: FnMut() -> u64,
{
    // Warmup
    for _ in 0..5 {
        f();
    }

    let mut iterations = 0u64;
    let mut last = 0u64;
    let start = Instant::now();
    while start.elapsed() < min_duration {
        last = f();
        iterations += 1;
    }
    let total = start.elapsed();

    BenchResult {
        name,
        iterations,
        total,
        instructions: last,
    }
}

/// Loads `image`, runs it until idle and returns the instruction count.
fn run_image(image: &[u8], runtime: &Arc<Runtime>, events: &[EventType]) -> u64 {
    let config = VmConfig::default().with_quantum(Duration::from_secs(60));
    let mut vm = ScriptVm::new(image, Arc::clone(runtime), config).expect("load");
    vm.run_quanta().expect("state_entry");
    for &event in events {
        vm.add_event(event, vec![LslValue::Integer(1)]);
        vm.run_quanta().expect("event");
    }
    vm.instruction_count()
}

fn entry_image(stack_size: i32, code: CodeBuilder) -> Vec<u8> {
    let mut builder = ImageBuilder::default();
    builder.global(4);
    let state = builder.state("default");
    builder.handler(state, EventType::StateEntry, stack_size, code);
    builder.build()
}

// ---------------------------------------------------------------------------
// Benchmark definitions
// ---------------------------------------------------------------------------

/// `for (i = n; i; --i) total += i;`
fn countdown_image(n: i32) -> Vec<u8> {
    entry_image(
        4,
        CodeBuilder::new()
            .push_arg_i(n)
            .load_p(0)
            .label("top")
            .push_g(0)
            .push(0)
            .add(INT_INT)
            .load_gp(0)
            .push_arg_i(1)
            .push(0)
            .sub(INT_INT)
            .store(0)
            .jump_nif_to(LslType::Integer, "done")
            .jump_to("top")
            .label("done")
            .ret(),
    )
}

/// Builds and drops a string `n` times.
fn string_churn_image(n: i32) -> Vec<u8> {
    entry_image(
        8,
        CodeBuilder::new()
            .push_arg_i(n)
            .load_p(0)
            .label("top")
            .push_arg_s("world")
            .push_arg_s("hello ")
            .add(type_pair(LslType::String, LslType::String))
            .load_sp(4)
            .push_arg_i(1)
            .push(0)
            .sub(INT_INT)
            .store(0)
            .jump_nif_to(LslType::Integer, "done")
            .jump_to("top")
            .label("done")
            .ret(),
    )
}

/// Calls an empty global function `n` times.
fn call_overhead_image(n: i32) -> Vec<u8> {
    let mut builder = ImageBuilder::default();
    let noop = builder.function("noop", CodeBuilder::new().ret());
    let state = builder.state("default");
    let code = CodeBuilder::new()
        .push_arg_i(n)
        .load_p(0)
        .label("top")
        .frame(None, 0, |b| b)
        .call(noop)
        .push_arg_i(1)
        .push(0)
        .sub(INT_INT)
        .store(0)
        .jump_nif_to(LslType::Integer, "done")
        .jump_to("top")
        .label("done")
        .ret();
    builder.handler(state, EventType::StateEntry, 4, code);
    builder.build()
}

/// Calls `llSqrt` `n` times.
fn library_call_image(n: i32, sqrt: u8) -> Vec<u8> {
    entry_image(
        4,
        CodeBuilder::new()
            .push_arg_i(n)
            .load_p(0)
            .label("top")
            .frame(Some(LslType::Float), 4, |b| b.push_arg_f(2.0))
            .call_lib(sqrt)
            .pop()
            .push_arg_i(1)
            .push(0)
            .sub(INT_INT)
            .store(0)
            .jump_nif_to(LslType::Integer, "done")
            .jump_to("top")
            .label("done")
            .ret(),
    )
}

fn touch_image() -> Vec<u8> {
    let mut builder = ImageBuilder::default();
    let total = builder.global(4);
    let state = builder.state("default");
    builder.handler(state, EventType::StateEntry, 0, CodeBuilder::new().ret());
    builder.handler(
        state,
        EventType::TouchStart,
        4,
        CodeBuilder::new()
            .push_g(total)
            .push(0)
            .add(INT_INT)
            .store_g(total)
            .pop()
            .ret(),
    );
    builder.build()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let min = Duration::from_secs(2);
    let runtime = Arc::new(Runtime::new(Library::builtin()));
    let sqrt = runtime.library.index_of("llSqrt").expect("llSqrt") as u8;

    println!("Interpreter Benchmarks (each runs for >= 2s)\n");
    println!(
        "  {:<30} {:>7}       {:>14} {:>12}         {:>10}",
        "benchmark", "iters", "avg time", "instrs/run", "ns/instr"
    );
    println!("  {}", "-".repeat(90));

    // 1. Countdown loops
    for &n in &[10i32, 1000, 100_000] {
        let name: &'static str = match n {
            10 => "countdown(10)",
            1000 => "countdown(1000)",
            100_000 => "countdown(100K)",
            _ => unreachable!(),
        };
        let image = countdown_image(n);
        bench(name, min, || run_image(&image, &runtime, &[])).print();
    }

    // 2. String allocation and release (1K iterations)
    let image = string_churn_image(1000);
    bench("string_churn(1K)", min, || run_image(&image, &runtime, &[])).print();

    // 3. CALL overhead (10K calls)
    let image = call_overhead_image(10_000);
    bench("call_overhead(10K)", min, || run_image(&image, &runtime, &[])).print();

    // 4. Library calls (10K calls)
    let image = library_call_image(10_000, sqrt);
    bench("library_call(10K)", min, || run_image(&image, &runtime, &[])).print();

    // 5. Event delivery (100 events)
    let image = touch_image();
    let events = [EventType::TouchStart; 100];
    bench("event_delivery(100)", min, || run_image(&image, &runtime, &events)).print();

    println!();
}
