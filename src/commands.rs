/*!
 * Command implementations over the core index
 */

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tracing::info;

use blockdb_core_index::{
    create_database, export_lines, import_lines, ops, Error as CoreError, HistoryManager,
    ImportManager, ScanManager, Settings,
};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Database directory to create
    pub dir: PathBuf,
    /// Size in bytes of the hashed blocks
    #[arg(long, default_value_t = 512)]
    pub block_size: u32,
    /// Alignment in bytes required of file offsets
    #[arg(long, default_value_t = 512)]
    pub sector_size: u32,
    /// Bit length of the hash store key prefix
    #[arg(long, default_value_t = 28)]
    pub prefix_bits: u32,
    /// Byte length of the hash store value suffixes
    #[arg(long, default_value_t = 3)]
    pub suffix_bytes: u32,
    /// Truncate block hashes to this many bytes (0 disables)
    #[arg(long, default_value_t = 0)]
    pub hash_truncation: u32,
    /// Reject entries once a hash holds this many (0 disables)
    #[arg(long, default_value_t = 0)]
    pub max_duplicates: u32,
    /// Disable the bloom filter
    #[arg(long)]
    pub no_bloom: bool,
    /// log2 of the bloom filter bit count
    #[arg(long, default_value_t = 28)]
    pub bloom_m: u32,
    /// Number of bloom hash functions
    #[arg(long, default_value_t = 3)]
    pub bloom_k: u32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new database directory
    Create(CreateArgs),
    /// Import a JSON line stream (file or stdin)
    Import {
        dir: PathBuf,
        /// Input file; stdin when omitted
        file: Option<PathBuf>,
    },
    /// Export the database as a JSON line stream (file or stdout)
    Export {
        dir: PathBuf,
        /// Output file, which must not exist yet; stdout when omitted
        file: Option<PathBuf>,
    },
    /// Copy every element of database A into database B
    Add { a: PathBuf, b: PathBuf },
    /// Ordered merge of databases A and B into C
    AddMultiple {
        a: PathBuf,
        b: PathBuf,
        c: PathBuf,
    },
    /// Copy elements with keys in both A and B into C
    Intersect {
        a: PathBuf,
        b: PathBuf,
        c: PathBuf,
    },
    /// Copy elements of A whose keys are absent from B into C
    Subtract {
        a: PathBuf,
        b: PathBuf,
        c: PathBuf,
    },
    /// Copy elements of A whose keys occur exactly once into B
    Deduplicate { a: PathBuf, b: PathBuf },
    /// Scan a file of hex block hashes, one per line
    Scan { dir: PathBuf, hashes: PathBuf },
    /// Scan one hex block hash and print its full provenance
    ScanHash { dir: PathBuf, hash: String },
    /// Print per-store entry counts
    Size { dir: PathBuf },
    /// Print every source with its metadata and names
    Sources { dir: PathBuf },
    /// Print the hash duplication histogram
    Histogram { dir: PathBuf },
    /// Print hashes observed exactly COUNT times
    Duplicates { dir: PathBuf, count: u64 },
    /// Print every (hash, source, offset) row
    HashTable { dir: PathBuf },
    /// Rewrite bloom settings and rebuild the filter
    RebuildBloom {
        dir: PathBuf,
        /// Disable the bloom filter
        #[arg(long)]
        no_bloom: bool,
        /// log2 of the bloom filter bit count
        #[arg(long, default_value_t = 28)]
        bloom_m: u32,
        /// Number of bloom hash functions
        #[arg(long, default_value_t = 3)]
        bloom_k: u32,
    },
}

pub fn run(command: Command) -> Result<()> {
    match command {
        Command::Create(args) => create(args),
        Command::Import { dir, file } => import(&dir, file.as_deref()),
        Command::Export { dir, file } => export(&dir, file.as_deref()),
        Command::Add { a, b } => print_changes(ops::add(&a, &b, &no_stop())?),
        Command::AddMultiple { a, b, c } => {
            print_changes(ops::add_multiple(&a, &b, &c, &no_stop())?)
        }
        Command::Intersect { a, b, c } => print_changes(ops::intersect(&a, &b, &c, &no_stop())?),
        Command::Subtract { a, b, c } => print_changes(ops::subtract(&a, &b, &c, &no_stop())?),
        Command::Deduplicate { a, b } => print_changes(ops::deduplicate(&a, &b, &no_stop())?),
        Command::Scan { dir, hashes } => scan(&dir, &hashes),
        Command::ScanHash { dir, hash } => scan_hash(&dir, &hash),
        Command::Size { dir } => size(&dir),
        Command::Sources { dir } => sources(&dir),
        Command::Histogram { dir } => histogram(&dir),
        Command::Duplicates { dir, count } => duplicates(&dir, count),
        Command::HashTable { dir } => hash_table(&dir),
        Command::RebuildBloom {
            dir,
            no_bloom,
            bloom_m,
            bloom_k,
        } => {
            ops::rebuild_bloom(&dir, !no_bloom, bloom_m, bloom_k)?;
            Ok(())
        }
    }
}

fn no_stop() -> AtomicBool {
    AtomicBool::new(false)
}

fn print_changes(changes: blockdb_core_index::Changes) -> Result<()> {
    print!("{changes}");
    Ok(())
}

fn create(args: CreateArgs) -> Result<()> {
    let settings = Settings {
        block_size: args.block_size,
        sector_size: args.sector_size,
        hash_prefix_bits: args.prefix_bits,
        hash_suffix_bytes: args.suffix_bytes,
        hash_truncation: args.hash_truncation,
        max_duplicates: args.max_duplicates,
        bloom_is_used: !args.no_bloom,
        bloom_m: args.bloom_m,
        bloom_k: args.bloom_k,
        ..Settings::default()
    };
    create_database(&args.dir, &settings)?;
    HistoryManager::open(&args.dir).append(
        "create",
        &[args.dir.display().to_string()],
        None,
    )?;
    println!("Created database {}", args.dir.display());
    Ok(())
}

fn import(dir: &Path, file: Option<&Path>) -> Result<()> {
    let arguments: Vec<String> = file
        .map(|f| vec![f.display().to_string()])
        .unwrap_or_else(|| vec!["stdin".to_string()]);
    info!(dir = %dir.display(), input = %arguments[0], "importing JSON stream");
    let manager = ImportManager::open(dir, "import_json", &arguments)?;

    let report = match file {
        Some(path) => {
            let reader = BufReader::new(
                File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
            );
            import_lines(reader, &manager)?
        }
        None => import_lines(io::stdin().lock(), &manager)?,
    };

    let changes = manager.close()?;
    if report.invalid > 0 {
        eprintln!("{} invalid lines skipped", report.invalid);
    }
    print!("{changes}");
    Ok(())
}

fn export(dir: &Path, file: Option<&Path>) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    match file {
        Some(path) => {
            if path.exists() {
                bail!("file {} already exists", path.display());
            }
            let mut writer = BufWriter::new(File::create(path)?);
            export_lines(&scan, &mut writer)?;
            writer.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            export_lines(&scan, &mut writer)?;
            writer.flush()?;
        }
    }
    Ok(())
}

fn parse_hash(text: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(text.trim())
        .map_err(|_| CoreError::InvalidHash(text.trim().to_string()))?;
    if bytes.is_empty() {
        return Err(CoreError::InvalidHash(text.trim().to_string()).into());
    }
    Ok(bytes)
}

fn scan(dir: &Path, hashes_file: &Path) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    let reader = BufReader::new(
        File::open(hashes_file)
            .with_context(|| format!("cannot open {}", hashes_file.display()))?,
    );

    let mut hashes = Vec::new();
    let mut texts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        hashes.push(parse_hash(trimmed)?);
        texts.push(trimmed.to_string());
    }

    // matched indices only: '<index> \t <hexdigest> \t <count>'
    for (index, count) in scan.scan(&hashes)? {
        println!("{index}\t{}\t{count}", texts[index]);
    }
    Ok(())
}

fn scan_hash(dir: &Path, hash: &str) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    let hash = parse_hash(hash)?;
    match scan.find_expanded_hash(&hash)? {
        Some(expanded) => println!("{}", serde_json::to_string(&expanded)?),
        None => println!("Hash not found."),
    }
    Ok(())
}

fn size(dir: &Path) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    let size = scan.size()?;
    if size.hash_data_store == 0 && size.source_id_store == 0 {
        println!("The hash database is empty.");
        return Ok(());
    }
    println!("  hash store: {}", size.hash_store);
    println!("  hash data store: {}", size.hash_data_store);
    println!("  source id store: {}", size.source_id_store);
    println!("  source data store: {}", size.source_data_store);
    println!("  source name store: {}", size.source_name_store);
    Ok(())
}

fn sources(dir: &Path) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    let mut any = false;
    for item in scan.iter_sources() {
        let (file_hash, source_id) = item?;
        any = true;
        let mut line = format!(
            "source_id={source_id}, file_hash='{}'",
            hex::encode(&file_hash)
        );
        if let Some(data) = scan.source_data(source_id)? {
            line.push_str(&format!(
                ", filesize={}, file_type='{}', nonprobative_count={}",
                data.filesize, data.file_type, data.nonprobative_count
            ));
        }
        for name in scan.source_names(source_id)? {
            line.push_str(&format!(
                ", repository_name='{}', filename='{}'",
                name.repository_name, name.filename
            ));
        }
        println!("{line}");
    }
    if !any {
        println!("The source store is empty.");
    }
    Ok(())
}

fn histogram(dir: &Path) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    let mut total_hashes: u64 = 0;
    let mut distinct_hashes: u64 = 0;
    let mut buckets: BTreeMap<u64, u64> = BTreeMap::new();

    let mut any = false;
    for item in scan.iter_hash_data() {
        let (_, entries) = item?;
        any = true;
        let count = entries.len() as u64;
        total_hashes += count;
        if count == 1 {
            distinct_hashes += 1;
        }
        *buckets.entry(count).or_insert(0) += 1;
    }
    if !any {
        println!("The hash database is empty.");
        return Ok(());
    }

    println!("total hashes: {total_hashes}");
    println!("distinct hashes: {distinct_hashes}");
    for (count, hashes) in buckets {
        println!(
            "duplicates={count}, distinct hashes={hashes}, total={}",
            count * hashes
        );
    }
    Ok(())
}

fn duplicates(dir: &Path, requested: u64) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    let mut line_number = 0u64;
    for item in scan.iter_hash_data() {
        let (hash, entries) = item?;
        if entries.len() as u64 == requested {
            line_number += 1;
            println!("{line_number}\t{}\t{requested}", hex::encode(&hash));
        }
    }
    if line_number == 0 {
        println!("No hashes with {requested} duplicates.");
    }
    Ok(())
}

fn hash_table(dir: &Path) -> Result<()> {
    let scan = ScanManager::open(dir)?;
    let sector_size = scan.settings().sector_size as u64;
    let mut any = false;
    for item in scan.iter_hash_data() {
        let (hash, entries) = item?;
        any = true;
        for (source_id, offset_index) in entries {
            println!(
                "{}\t{source_id}\t{}",
                hex::encode(&hash),
                offset_index * sector_size
            );
        }
    }
    if !any {
        println!("The hash database is empty.");
    }
    Ok(())
}
