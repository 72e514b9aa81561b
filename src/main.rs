use ome_rt::alloc::allocate_string;
use ome_rt::config::Config;
use ome_rt::context::Context;
use ome_rt::contract::sort_values;
use ome_rt::strings::{concat, print};
use ome_rt::value::Value;

/// Small standalone demonstration of the runtime core: no compiler exists
/// in this crate to produce real `ome` programs, so this just exercises
/// allocation, string concatenation, the callback-anchor sort, and a
/// collection cycle end-to-end.
fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let mut ctx = Context::new_with_args(&config, &std::env::args().skip(1).collect::<Vec<_>>())
        .unwrap_or_else(|e| {
            eprintln!("failed to initialize heap: {e}");
            std::process::exit(1);
        });

    let frame = ctx.enter(2).unwrap_or_else(|e| {
        eprintln!("stack overflow initializing demo: {e:?}");
        std::process::exit(1);
    });

    let greeting = allocate_string(&mut ctx, b"hello, ").expect("allocation");
    frame.save(&mut ctx, 0, greeting);
    let name = allocate_string(&mut ctx, b"ome").expect("allocation");
    frame.save(&mut ctx, 1, name);

    let joined = concat(&mut ctx, &[frame.load(&ctx, 0), frame.load(&ctx, 1)]);
    let mut out = String::new();
    print(&mut out, &ctx, joined).unwrap();
    println!("{out}");

    let unsorted: Vec<Value> = [5, 3, 1, 4, 2].into_iter().map(Value::small_integer).collect();
    match sort_values(&mut ctx, &unsorted) {
        Ok(sorted) => {
            let nums: Vec<isize> = sorted.iter().map(|v| v.untag_signed()).collect();
            println!("sorted: {nums:?}");
        }
        Err(e) => println!("sort failed: {e:?}"),
    }

    frame.leave(&mut ctx, Value::boolean(true));
    ome_rt::collect::collect(&mut ctx);
    println!("collections so far: {}", ctx.heap.num_collections);
}
