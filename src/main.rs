use clap::{Parser, Subcommand};
use hfile::bytes::display_key;
use hfile::reader::Reader;
use hfile::scanner::SeekOutcome;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hfile", version = "1.0.0", about = "Inspect sorted key/value files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show trailer, fileinfo, and index statistics
    Info { input: PathBuf },
    /// Print entries in key order
    Dump {
        input: PathBuf,
        /// First key to print (defaults to the start of the file)
        #[arg(short, long)]
        start: Option<String>,
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Look up a single key
    Get {
        input: PathBuf,
        #[arg(short, long)]
        key: String,
    },
    /// Hex-dump a named meta block
    Meta {
        input: PathBuf,
        #[arg(short, long)]
        name: String,
    },
}

fn open_reader(path: &Path) -> Result<Reader<File>, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let length = file.metadata()?.len();
    let mut reader = Reader::new(file, length, &path.display().to_string());
    reader.load_metadata()?;
    Ok(reader)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let reader = open_reader(&input)?;
            let trailer = reader.trailer()?;

            println!("── hfile ────────────────────────────────────────────────");
            println!("  Path             {}", input.display());
            println!("  File size        {} B", reader.length());
            println!("  Format version   {}", trailer.version);
            println!("  Compression      {}", reader.compression()?.name());
            println!("  Entries          {}", reader.entry_count()?);
            println!("  Data blocks      {}", reader.data_block_count()?);
            println!("  Meta blocks      {}", reader.meta_block_count()?);
            println!("  Uncompressed     {} B", trailer.total_uncompressed_bytes);
            println!("  Avg key length   {} B", reader.avg_key_len()?);
            println!("  Avg value length {} B", reader.avg_value_len()?);
            println!("  Index heap       {} B", reader.index_heap_size()?);
            if let Some(first) = reader.first_key()? {
                println!("  First key        {}", display_key(first));
            }
            if let Some(last) = reader.last_key()? {
                println!("  Last key         {}", display_key(last));
            }
            if reader.data_block_count()? > 0 {
                println!("  Mid key          {}", display_key(reader.midkey()?));
            }
            println!("  Fileinfo ({} entries):", reader.fileinfo()?.len());
            for (key, value) in reader.fileinfo()?.iter() {
                println!("    {} = {}", display_key(key), display_key(value));
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, start, limit } => {
            let reader = open_reader(&input)?;
            let mut scanner = reader.scanner()?;
            let positioned = match &start {
                Some(key) => scanner.seek_to(key.as_bytes())? != SeekOutcome::BeforeFirst,
                None => scanner.seek_to_first()?,
            };
            if !positioned {
                println!("(no entries)");
                return Ok(());
            }
            let limit = limit.unwrap_or(usize::MAX);
            let mut printed = 0usize;
            loop {
                if printed >= limit {
                    break;
                }
                println!("{} = {}", display_key(scanner.key()?), display_key(scanner.value()?));
                printed += 1;
                if !scanner.next()? {
                    break;
                }
            }
            println!("({printed} entries)");
        }

        // ── Get ──────────────────────────────────────────────────────────────
        Commands::Get { input, key } => {
            let reader = open_reader(&input)?;
            let mut scanner = reader.scanner()?;
            match scanner.seek_to(key.as_bytes())? {
                SeekOutcome::Exact => {
                    println!("{}", display_key(scanner.value()?));
                }
                SeekOutcome::BeforeFirst | SeekOutcome::Predecessor => {
                    eprintln!("key {} not found", display_key(key.as_bytes()));
                    std::process::exit(1);
                }
            }
        }

        // ── Meta ─────────────────────────────────────────────────────────────
        Commands::Meta { input, name } => {
            let reader = open_reader(&input)?;
            match reader.get_meta_block(&name)? {
                None => {
                    eprintln!("meta block {name:?} not found");
                    std::process::exit(1);
                }
                Some(block) => {
                    let data = block.data();
                    println!("meta block {name:?}: {} B", data.len());
                    for row in data.chunks(16) {
                        println!("  {}", hex::encode(row));
                    }
                }
            }
        }
    }
    Ok(())
}
