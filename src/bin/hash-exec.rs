use clap::{Arg, ArgMatches, Command};
use hash_exec::logging::init_logging;
use hash_exec::{
    AggregateRegistry, AtomicAggregateTable, EquiJoinProbe, HashIndex, HashTable, JoinSide,
    KeyExtractor, KeyKind, MapStrategy, RadixBits, RayonScheduler, SharedHashTable, Table,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;
use tracing::Level;

/// Hash build / aggregate / join driver over synthetic tables
fn main() {
    let matches = create_cli().get_matches();

    let level = if matches.get_flag("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_logging(level, matches.get_flag("json"));

    if let Err(e) = run_command(matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn rows_arg() -> Arg {
    Arg::new("rows")
        .help("Number of generated rows")
        .long("rows")
        .value_parser(clap::value_parser!(usize))
        .default_value("1000000")
}

fn keys_arg() -> Arg {
    Arg::new("keys")
        .help("Number of distinct key values")
        .long("keys")
        .value_parser(clap::value_parser!(i64))
        .default_value("10000")
}

fn workers_arg() -> Arg {
    Arg::new("workers")
        .help("Parallel build tasks")
        .long("workers")
        .value_parser(clap::value_parser!(usize))
        .default_value("4")
}

fn create_cli() -> Command {
    Command::new("hash-exec")
        .about("Hash index build, aggregation and partitioned join driver")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(Arg::new("seed")
            .help("Random seed for generated data")
            .long("seed")
            .global(true)
            .value_parser(clap::value_parser!(u64))
            .default_value("42"))
        .arg(Arg::new("verbose")
            .help("Debug-level logging")
            .long("verbose")
            .short('v')
            .global(true)
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("json")
            .help("Log as JSON")
            .long("json")
            .global(true)
            .action(clap::ArgAction::SetTrue))
        .subcommand(
            Command::new("build")
                .about("Compare single-threaded and shared hash builds")
                .arg(rows_arg())
                .arg(keys_arg())
                .arg(workers_arg())
                .arg(Arg::new("strategy")
                    .help("Shared map synchronisation")
                    .long("strategy")
                    .value_parser(["lockfree", "locked"])
                    .default_value("lockfree"))
        )
        .subcommand(
            Command::new("aggregate")
                .about("Concurrent group-by aggregation")
                .arg(rows_arg())
                .arg(keys_arg())
                .arg(workers_arg())
                .arg(Arg::new("function")
                    .help("Aggregation function")
                    .long("function")
                    .default_value("SUM"))
        )
        .subcommand(
            Command::new("join")
                .about("Radix-partition two tables and probe")
                .arg(rows_arg())
                .arg(keys_arg())
                .arg(Arg::new("bits1")
                    .help("First-pass radix bits")
                    .long("bits1")
                    .value_parser(clap::value_parser!(u32))
                    .default_value("4"))
                .arg(Arg::new("bits2")
                    .help("Second-pass radix bits")
                    .long("bits2")
                    .value_parser(clap::value_parser!(u32))
                    .default_value("4"))
                .arg(workers_arg())
        )
}

fn run_command(matches: ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let seed = *matches.get_one::<u64>("seed").unwrap_or(&42);
    match matches.subcommand() {
        Some(("build", sub)) => cmd_build(sub, seed),
        Some(("aggregate", sub)) => cmd_aggregate(sub, seed),
        Some(("join", sub)) => cmd_join(sub, seed),
        _ => Err("Unknown command".into()),
    }
}

fn usize_arg(matches: &ArgMatches, name: &str) -> usize {
    matches.get_one::<usize>(name).copied().unwrap_or(1)
}

fn generate(rows: usize, keys: i64, seed: u64) -> Result<Arc<dyn Table>, Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let keys = keys.max(1);
    let key_column: Vec<i64> = (0..rows).map(|_| rng.random_range(0..keys)).collect();
    let value_column: Vec<i64> = (0..rows).map(|_| rng.random_range(-1000..1000)).collect();
    let table =
        hash_exec::ColumnarTable::from_i64_columns(&[("key", key_column), ("value", value_column)])?;
    Ok(Arc::new(table))
}

fn cmd_build(matches: &ArgMatches, seed: u64) -> Result<(), Box<dyn std::error::Error>> {
    let rows = usize_arg(matches, "rows");
    let keys = *matches.get_one::<i64>("keys").unwrap_or(&1);
    let workers = usize_arg(matches, "workers");
    let strategy = match matches.get_one::<String>("strategy").map(String::as_str) {
        Some("locked") => MapStrategy::Locked,
        _ => MapStrategy::LockFree,
    };
    let table = generate(rows, keys, seed)?;

    let start = Instant::now();
    let single = HashTable::build(table.clone(), vec![0], KeyKind::GroupBy)?;
    let single_time = start.elapsed();

    let scheduler = RayonScheduler::new(workers)?;
    let start = Instant::now();
    let extractor = KeyExtractor::new(KeyKind::GroupBy, vec![0])?;
    let shared = SharedHashTable::build_parallel(table, extractor, strategy, workers, &scheduler)?;
    let shared_time = start.elapsed();

    println!("Single-threaded: {} entries, {} keys in {:?}", single.size(), single.num_distinct_keys(), single_time);
    println!(
        "Shared ({}, {} workers): {} entries, {} keys in {:?}",
        strategy,
        workers,
        shared.size(),
        shared.num_distinct_keys(),
        shared_time
    );
    Ok(())
}

fn cmd_aggregate(matches: &ArgMatches, seed: u64) -> Result<(), Box<dyn std::error::Error>> {
    let rows = usize_arg(matches, "rows");
    let keys = *matches.get_one::<i64>("keys").unwrap_or(&1);
    let workers = usize_arg(matches, "workers");
    let name = matches.get_one::<String>("function").map(String::as_str).unwrap_or("SUM");

    // Unknown names fail here, before any data is generated.
    let function = AggregateRegistry::with_builtins().lookup(name)?;
    let table = generate(rows, keys, seed)?;
    let scheduler = RayonScheduler::new(workers)?;

    let start = Instant::now();
    let extractor = KeyExtractor::new(KeyKind::GroupBy, vec![0])?;
    let index = AtomicAggregateTable::build_parallel(table, extractor, 1, function, workers, &scheduler)?;
    println!(
        "{} over {} rows: {} groups in {:?}",
        name.to_uppercase(),
        rows,
        index.num_distinct_keys(),
        start.elapsed()
    );
    Ok(())
}

fn cmd_join(matches: &ArgMatches, seed: u64) -> Result<(), Box<dyn std::error::Error>> {
    let rows = usize_arg(matches, "rows");
    let keys = *matches.get_one::<i64>("keys").unwrap_or(&1);
    let workers = usize_arg(matches, "workers");
    let bits = RadixBits::new(
        *matches.get_one::<u32>("bits1").unwrap_or(&0),
        *matches.get_one::<u32>("bits2").unwrap_or(&0),
    )?;

    let left_table = generate(rows, keys, seed)?;
    let right_table = generate(rows / 2, keys, seed.wrapping_add(1))?;

    let start = Instant::now();
    let left = JoinSide::partition(left_table.as_ref(), &[0], bits)?;
    let right = JoinSide::partition(right_table.as_ref(), &[0], bits)?;
    let partition_time = start.elapsed();

    let scheduler = RayonScheduler::new(workers)?;
    let probe = EquiJoinProbe::all_partitions(bits, &left)?;
    let start = Instant::now();
    let positions = scheduler.pool().install(|| probe.probe_parallel(&left, &right))?;

    println!(
        "Partitioned {} x {} rows into {} partitions in {:?}",
        left.len(),
        right.len(),
        bits.partition_count(),
        partition_time
    );
    println!("Probe produced {} pairs in {:?}", positions.len(), start.elapsed());
    Ok(())
}
