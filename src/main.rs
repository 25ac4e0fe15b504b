use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use chrono::Local;
use clap::Parser;
use env_logger::{Builder, Target};
use epub_t2s::{
    convert::TraditionalToSimplified,
    encoding::DEFAULT_CONFIDENCE_THRESHOLD,
    pipeline::{ConvertOptions, EpubConverter},
};
use log::{LevelFilter, error, info};

#[derive(Parser)]
#[command(name = "epub-t2s")]
#[command(version)]
#[command(about = "Convert the text of an EPUB file from Traditional to Simplified Chinese", long_about = None)]
struct Cli {
    /// Path to the EPUB file; prompted for when omitted
    input: Option<PathBuf>,

    /// Output path (default: <name>_simplified.epub next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Confidence a detected encoding needs to be used instead of UTF-8
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    threshold: f32,

    /// Number of packaging attempts
    #[arg(long, default_value_t = 1)]
    retries: usize,

    /// Directory for the log file
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Log to stderr instead of a file
    #[arg(long)]
    no_log_file: bool,

    /// Do not create a <name>_backup.epub copy of the input
    #[arg(long)]
    no_backup: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    println!("EPUB Traditional to Simplified Chinese converter");
    println!("------------------------------------------------");

    let log_file = init_logger(&cli);

    let input = match cli.input.clone() {
        Some(input) => input,
        None => match prompt_input() {
            Ok(input) => input,
            Err(err) => {
                eprintln!("Failed to read the input path: {}", err);
                return ExitCode::FAILURE;
            }
        },
    };

    if !input.is_file() {
        eprintln!("File not found: {}", input.display());
        error!("File not found: \"{}\"", input.display());
        return ExitCode::FAILURE;
    }

    let mut options = ConvertOptions::default();
    options
        .confidence_threshold(cli.threshold)
        .packaging_attempts(cli.retries)
        .create_backup(!cli.no_backup);
    if let Some(output) = &cli.output {
        options.output(output);
    }

    println!("Processing {}", input.display());
    info!("Processing \"{}\"", input.display());

    let converter = EpubConverter::with_options(TraditionalToSimplified, options);
    let status = match converter.convert_epub(&input) {
        Ok(report) => {
            println!(
                "Done: {} text files processed, {} changed, {} failed",
                report.processed(),
                report.changed(),
                report.failed()
            );
            if report.backup_created {
                if let Some(backup) = &report.backup {
                    println!("Backup: {}", backup.display());
                }
            }
            println!("Output: {}", report.output.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            eprintln!("Conversion failed: {}", err);
            ExitCode::FAILURE
        }
    };

    if let Some(log_file) = log_file {
        println!("Detailed log saved to {}", log_file.display());
    }

    status
}

/// Installs the logger, returning the log file path if one is written
///
/// `RUST_LOG` overrides the default `info` level.
fn init_logger(cli: &Cli) -> Option<PathBuf> {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.level(),
                record.args()
            )
        });

    let log_file = if cli.no_log_file {
        None
    } else {
        match create_log_file(&cli.log_dir) {
            Ok((path, file)) => {
                builder.target(Target::Pipe(Box::new(file)));
                Some(path)
            }
            Err(err) => {
                eprintln!("Cannot create a log file, logging to stderr: {}", err);
                None
            }
        }
    };

    builder.init();
    log_file
}

fn create_log_file(log_dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(log_dir)?;

    let name = format!("epub_convert_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let path = log_dir.join(name);
    let file = File::create(&path)?;

    Ok((path, file))
}

/// Asks for the input path on stdin, stripping surrounding quotes
fn prompt_input() -> io::Result<PathBuf> {
    print!("EPUB file path: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    let path = line.trim().trim_matches(['"', '\'']);
    Ok(PathBuf::from(path))
}
