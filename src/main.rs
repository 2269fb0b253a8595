use clap::{ArgAction, Parser, Subcommand};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use z3ds::codec::DEFAULT_COMPRESSION_LEVEL;
use z3ds::container::{encode, EncodeOptions, ProgressObserver};
use z3ds::header::HEADER_SIZE;
use z3ds::{Magic, Metadata, SeekTable, Z3dsHeader};

#[derive(Parser)]
#[command(name = "z3ds", about = "Seekable Z3DS container encoder for 3DS game images")]
struct Cli {
    /// Increase log verbosity (-v warn, -vv info, -vvv debug, -vvvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a .cci/.cia/.cxi/.3dsx image into a Z3DS container
    Compress {
        input: PathBuf,
        /// Output path (default: input with a z-prefixed extension)
        output: Option<PathBuf>,
        /// Frame size in bytes (default: 32 MiB for NCSD, 1 MiB otherwise)
        #[arg(long)]
        frame_size: Option<usize>,
        /// Zstd compression level
        #[arg(short, long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
        level: i32,
        /// Override the sniffed four-character source tag
        #[arg(long)]
        magic: Option<String>,
        /// Omit per-frame checksums from the seek table
        #[arg(long)]
        no_checksums: bool,
        /// Frames compressed per batch (parallel builds only)
        #[arg(long, default_value = "1")]
        batch: usize,
        /// Extra metadata item, NAME=VALUE (repeatable)
        #[arg(short, long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Show container header, metadata and seek table
    Info {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Compress ─────────────────────────────────────────────────────────
        Commands::Compress { input, output, frame_size, level, magic, no_checksums, batch, meta } => {
            let output = output.unwrap_or_else(|| derive_output_path(&input));
            let underlying_magic = match magic {
                Some(tag) => Some(Magic::from_tag(&tag)
                    .ok_or_else(|| format!("--magic must be exactly four bytes, got '{tag}'"))?),
                None => None,
            };
            let opts = EncodeOptions {
                underlying_magic,
                frame_size,
                level,
                checksums:    !no_checksums,
                batch_frames: batch,
                metadata:     meta.into_iter().map(|(k, v)| (k, v.into_bytes())).collect(),
                ..Default::default()
            };
            if opts.batch_frames > 1 && !cfg!(feature = "parallel") {
                warn!("built without the parallel feature; batches compress sequentially");
            }

            println!("Compressing: {}", input.display());
            println!("Output:      {}", output.display());
            let started = Instant::now();
            let mut bar = ProgressBar::default();
            let summary = encode(&input, &output, &opts, Some(&mut bar))?;
            eprintln!();

            let out_size = std::fs::metadata(&output)?.len();
            let in_size  = summary.header.uncompressed_size;
            println!("Source tag:  {}", summary.header.underlying_magic);
            println!("Frame size:  {} bytes ({} MiB)", summary.frame_size, summary.frame_size / 1024 / 1024);
            println!("Frames:      {}", summary.frame_count);
            println!("Original:    {in_size} bytes");
            println!("Compressed:  {out_size} bytes");
            if in_size > 0 {
                println!("Ratio:       {:.1}%", out_size as f64 / in_size as f64 * 100.0);
            }
            println!("Time:        {} ms", started.elapsed().as_millis());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let mut f = File::open(&input)?;
            let header = Z3dsHeader::read(&mut f)?;
            f.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
            let mut meta_bytes = vec![0u8; header.metadata_size as usize];
            f.read_exact(&mut meta_bytes)?;
            let meta  = Metadata::parse(&meta_bytes)?;
            let table = if header.compressed_size > 0 {
                Some(SeekTable::read_from_end(&mut f)?)
            } else {
                None
            };

            println!("── Z3DS Container ───────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Version         {}", header.version);
            println!("  Source tag      {}", header.underlying_magic);
            println!("  Metadata size   {} B", header.metadata_size);
            println!("  Compressed      {} B", header.compressed_size);
            println!("  Uncompressed    {} B", header.uncompressed_size);
            println!("  Frames start    {}", header.body_offset());
            println!("  Metadata ({}):", meta.len());
            for (name, value) in meta.iter() {
                let name = String::from_utf8_lossy(name);
                match std::str::from_utf8(value) {
                    Ok(s)  => println!("    {name:<16} {s}"),
                    Err(_) => println!("    {name:<16} 0x{}", hex::encode(value)),
                }
            }
            match table {
                Some(t) => {
                    println!("  Frames          {}", t.entries.len());
                    println!("  Checksums       {}", t.checksums);
                    println!("  Frame payload   {} B", t.total_compressed());
                    println!("  Frames total    {} B", t.total_decompressed());
                    if t.total_decompressed() != header.uncompressed_size {
                        warn!("seek table covers {} bytes, header says {}",
                              t.total_decompressed(), header.uncompressed_size);
                    }
                }
                None => println!("  Frames          0"),
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbosity: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        tracing_subscriber::EnvFilter::new(match verbosity {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        })
    };
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to initialise logging, continuing with none\n{e}");
    } else {
        info!("logging initialised");
    }
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))
}

/// `game.cia` → `game.zcia`; unknown extensions become `.z3ds`.
fn derive_output_path(input: &Path) -> PathBuf {
    let ext = input.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let z_ext = match ext.as_deref() {
        Some("cia")  => "zcia",
        Some("cci")  => "zcci",
        Some("cxi")  => "zcxi",
        Some("3dsx") => "z3dsx",
        _            => "z3ds",
    };
    input.with_extension(z_ext)
}

const BAR_WIDTH: usize = 50;

/// Single-line progress bar on stderr.
#[derive(Default)]
struct ProgressBar {
    last_permille: Option<u32>,
}

impl ProgressObserver for ProgressBar {
    fn on_progress(&mut self, processed: u64, total: u64) {
        let ratio = if total == 0 { 1.0 } else { processed as f64 / total as f64 };
        let permille = (ratio * 1000.0) as u32;
        if self.last_permille == Some(permille) {
            return;
        }
        self.last_permille = Some(permille);

        let filled = (ratio * BAR_WIDTH as f64) as usize;
        let bar: String = (0..BAR_WIDTH)
            .map(|i| if i < filled { '=' } else if i == filled { '>' } else { ' ' })
            .collect();
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\rProgress: [{bar}] {:.1}% ({processed}/{total} bytes)", ratio * 100.0);
        let _ = err.flush();
    }
}
