use anyhow::{bail, Context, Result};
use byte_lib::bytestring::ByteString;
use byte_lib::config::PROGRESS_INTERVAL;
use byte_lib::extract::{Extract, Fields, Whole};
use byte_lib::file_map::FileMultiMap;
use byte_lib::filter::{BloomFilter, MemTable};
use byte_lib::io::create_write;
use byte_lib::line_reader::LineReader;
use byte_lib::stats::LoadStats;
use byte_lib::tuple::TupleReader;
use byte_lib::{merge, sort};
use clap::{Args, Parser, Subcommand};
use indicatif::ProgressBar;
use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "byte-lib")]
#[command(about = "Sort, join, index and parse Wikipedia pageview and DBpedia dumps")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort the lines of a file by raw bytes
    Sort(SortArgs),
    /// Merge-join sorted files on their leading key fields
    Join(JoinArgs),
    /// Build and persist the multimap index of a file
    Index(IndexArgs),
    /// Look up keys through a file's multimap index
    Lookup(LookupArgs),
    /// Parse an RDF dump into JSON lines
    Tuples(TuplesArgs),
    /// Drop repeated lines
    Dedup(DedupArgs),
}

#[derive(Args)]
struct KeyArgs {
    /// Field separator
    #[arg(long, default_value = " ")]
    sep: String,

    /// Number of leading fields forming the key
    #[arg(long, default_value_t = 1)]
    key_fields: usize,
}

impl KeyArgs {
    fn fields(&self) -> Result<Fields> {
        if self.sep.is_empty() {
            bail!("--sep must not be empty");
        }
        Ok(Fields::range(self.sep.as_bytes(), 0, self.key_fields))
    }
}

#[derive(Args)]
struct SortArgs {
    /// Input file (.gz, .bz2 and .snappy are decompressed)
    #[arg(short, long)]
    input: String,

    /// Output file, compressed by suffix
    #[arg(short, long)]
    output: String,
}

#[derive(Args)]
struct JoinArgs {
    /// Sorted input files
    #[arg(short, long, num_args = 1.., required = true)]
    input: Vec<String>,

    /// Output file, compressed by suffix
    #[arg(short, long)]
    output: String,

    #[command(flatten)]
    key: KeyArgs,
}

#[derive(Args)]
struct IndexArgs {
    /// Input file
    #[arg(short, long)]
    input: String,

    /// Ignore an existing index and rebuild it
    #[arg(long)]
    rebuild: bool,

    #[command(flatten)]
    key: KeyArgs,
}

#[derive(Args)]
struct LookupArgs {
    /// Indexed input file
    #[arg(short, long)]
    input: String,

    /// Keys to look up
    #[arg(required = true)]
    keys: Vec<String>,

    #[command(flatten)]
    key: KeyArgs,
}

#[derive(Args)]
struct TuplesArgs {
    /// RDF dump (.nt, .nq, optionally compressed)
    #[arg(short, long)]
    input: String,

    /// Output JSON lines file, compressed by suffix
    #[arg(short, long)]
    output: String,

    /// Stop after this many tuples
    #[arg(long)]
    limit: Option<u64>,
}

#[derive(Args)]
struct DedupArgs {
    /// Input file
    #[arg(short, long)]
    input: String,

    /// Output file, compressed by suffix
    #[arg(short, long)]
    output: String,

    /// Remember full key hashes instead of using a bloom filter
    #[arg(long)]
    exact: bool,

    /// Bloom filter size as a power of two, in bits
    #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u32).range(6..=40))]
    bloom_degree: u32,

    /// Bloom filter hash functions
    #[arg(long, default_value_t = 8)]
    hashes: usize,

    /// Deduplicate on the leading key fields instead of whole lines
    #[arg(long)]
    key_fields: Option<usize>,

    /// Field separator for --key-fields
    #[arg(long, default_value = " ")]
    sep: String,
}

fn run_sort(args: SortArgs) -> Result<()> {
    let start = Instant::now();
    let lines = sort::sort_file(&args.input, &args.output)?;
    println!("Sorted {} lines in {:.2}s", lines, start.elapsed().as_secs_f64());
    Ok(())
}

fn run_join(args: JoinArgs) -> Result<()> {
    let key = args.key.fields()?;
    let groups = merge::join_files(&args.input, &key, &args.output)?;
    println!("Joined {} files into {} groups", args.input.len(), groups);
    Ok(())
}

fn run_index(args: IndexArgs) -> Result<()> {
    let key = args.key.fields()?;
    let map = if args.rebuild {
        FileMultiMap::rebuild(&args.input, b"\n", key, Whole)?
    } else {
        FileMultiMap::open(&args.input, b"\n", key, Whole)?
    };
    println!(
        "Indexed {} records under {} keys -> {}",
        map.len(),
        map.key_count(),
        map.index_path().display()
    );
    Ok(())
}

fn run_lookup(args: LookupArgs) -> Result<()> {
    let key = args.key.fields()?;
    let map = FileMultiMap::open(&args.input, b"\n", key, Whole)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for k in &args.keys {
        let records = map.get(k.as_bytes())?;
        info!(key = %k, records = records.len(), "Lookup");
        for record in records {
            record.write_to(&mut out)?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;
    Ok(())
}

fn run_tuples(args: TuplesArgs) -> Result<()> {
    let stats = LoadStats::new();
    let mut reader = TupleReader::open(&args.input)?;
    let mut out = create_write(&args.output)?;
    let pb = ProgressBar::new_spinner();

    for tuple in reader.by_ref() {
        let tuple = tuple?;
        serde_json::to_writer(&mut out, &tuple).context("Failed to serialize tuple")?;
        out.write_all(b"\n")?;
        stats.inc_tuples();
        if stats.tuples() % PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{} tuples", stats.tuples()));
            pb.tick();
        }
        if args.limit.is_some_and(|limit| stats.tuples() >= limit) {
            break;
        }
    }
    pb.finish_and_clear();
    out.finish()
        .with_context(|| format!("Failed to finish: {}", args.output))?;
    stats.add_parse_errors(reader.skipped());

    println!();
    println!("=== Summary ===");
    println!("Lines read:         {}", reader.lines_read());
    println!("Tuples parsed:      {}", stats.tuples());
    println!("Malformed lines:    {}", stats.errors());
    Ok(())
}

enum Seen {
    Bloom(BloomFilter),
    Exact(MemTable),
}

impl Seen {
    fn add(&mut self, key: &[u8]) -> bool {
        match self {
            Seen::Bloom(bloom) => bloom.add(key),
            Seen::Exact(table) => table.add(key),
        }
    }
}

fn run_dedup(args: DedupArgs) -> Result<()> {
    let key = match args.key_fields {
        Some(n) if args.sep.is_empty() => bail!("--sep must not be empty (key fields: {})", n),
        Some(n) => Some(Fields::range(args.sep.as_bytes(), 0, n)),
        None => None,
    };
    if args.hashes == 0 {
        bail!("--hashes must be at least 1");
    }
    let mut seen = if args.exact {
        Seen::Exact(MemTable::with_expected(1 << 16))
    } else {
        Seen::Bloom(BloomFilter::new(args.bloom_degree, args.hashes))
    };

    let stats = LoadStats::new();
    let mut out = create_write(&args.output)?;
    let pb = ProgressBar::new_spinner();

    for line in LineReader::open(&args.input)? {
        let line = line?;
        stats.add_line(line.len());
        let k: ByteString = match &key {
            Some(fields) => fields.extract(&line),
            None => line.clone(),
        };
        if seen.add(k.as_bytes()) {
            stats.inc_duplicates();
        } else {
            line.write_to(&mut out)?;
            out.write_all(b"\n")?;
        }
        if stats.lines() % PROGRESS_INTERVAL == 0 {
            pb.tick();
        }
    }
    pb.finish_and_clear();
    out.finish()
        .with_context(|| format!("Failed to finish: {}", args.output))?;

    let summary = stats.summary();
    info!(?summary, "Dedup complete");
    println!(
        "Kept {} of {} lines ({} duplicates dropped)",
        summary.lines_read - summary.duplicates_skipped,
        summary.lines_read,
        summary.duplicates_skipped
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // RUST_LOG, when set, overrides -v.
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Sort(args) => run_sort(args),
        Commands::Join(args) => run_join(args),
        Commands::Index(args) => run_index(args),
        Commands::Lookup(args) => run_lookup(args),
        Commands::Tuples(args) => run_tuples(args),
        Commands::Dedup(args) => run_dedup(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
