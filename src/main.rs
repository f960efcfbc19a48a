//! zipvfs CLI - Browse and edit ZIP archives as filesystems.
//!
//! This is the main entry point for the zipvfs command-line application.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glob::{MatchOptions, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use zipvfs::{Config, CopyOptions, EntryAttributes, OpenOptions, ZipFileSystem};

/// zipvfs - ZIP archives as filesystems
#[derive(Parser)]
#[command(name = "zipvfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the ZIP archive
    #[arg(short, long, env = "ZIPVFS_ARCHIVE")]
    archive: PathBuf,

    /// Create the archive if it does not exist
    #[arg(long)]
    create: bool,

    /// Filesystem option as key=value (e.g. noCompression=true)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Log progress to stderr (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        /// Directory inside the archive
        #[arg(default_value = "/")]
        path: String,

        /// Filter pattern (glob-style) on entry names
        #[arg(short, long)]
        filter: Option<String>,

        /// Show size, compressed size and modification time
        #[arg(short, long)]
        long: bool,
    },

    /// Print an entry to stdout
    Cat {
        /// Entry inside the archive
        path: String,
    },

    /// Store a local file as an entry
    Put {
        /// Local file, or - for stdin
        input: PathBuf,

        /// Entry inside the archive
        path: String,
    },

    /// Add a local directory tree to the archive
    Add {
        /// Local directory
        input: PathBuf,

        /// Directory inside the archive to add under
        #[arg(short, long, default_value = "/")]
        prefix: String,
    },

    /// Extract entries to a local directory
    Extract {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Filter pattern (glob-style) on entry names
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Create a directory
    Mkdir {
        path: String,
    },

    /// Delete an entry or empty directory
    Rm {
        path: String,

        /// Do not fail if the entry does not exist
        #[arg(short, long)]
        force: bool,
    },

    /// Copy an entry
    Cp {
        source: String,
        target: String,

        /// Replace an existing target
        #[arg(long)]
        replace: bool,

        /// Keep the source's timestamps
        #[arg(short, long)]
        preserve: bool,
    },

    /// Move an entry
    Mv {
        source: String,
        target: String,

        /// Replace an existing target
        #[arg(long)]
        replace: bool,
    },

    /// Set the modification time of an entry to now
    Touch {
        path: String,
    },

    /// Print the attributes of every entry
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_options(cli.options.iter().map(|option| {
        option
            .split_once('=')
            .unwrap_or((option.as_str(), "true"))
    }))
    .context("Invalid filesystem option")?;
    config.create_if_missing |= cli.create;

    let fs = ZipFileSystem::open(&cli.archive, config)
        .with_context(|| format!("Failed to open {}", cli.archive.display()))?;

    match cli.command {
        Commands::Ls { path, filter, long } => cmd_ls(&fs, &path, filter.as_deref(), long)?,
        Commands::Cat { path } => cmd_cat(&fs, &path)?,
        Commands::Put { input, path } => cmd_put(&fs, &input, &path)?,
        Commands::Add { input, prefix } => cmd_add(&fs, &input, &prefix)?,
        Commands::Extract { output, filter } => cmd_extract(&fs, &output, filter.as_deref())?,
        Commands::Mkdir { path } => fs.create_directory(&path)?,
        Commands::Rm { path, force } => {
            if force {
                fs.delete_if_exists(&path)?;
            } else {
                fs.delete(&path)?;
            }
        }
        Commands::Cp {
            source,
            target,
            replace,
            preserve,
        } => fs.copy(
            &source,
            &target,
            CopyOptions {
                replace_existing: replace,
                copy_attributes: preserve,
            },
        )?,
        Commands::Mv {
            source,
            target,
            replace,
        } => fs.move_entry(
            &source,
            &target,
            CopyOptions {
                replace_existing: replace,
                ..CopyOptions::default()
            },
        )?,
        Commands::Touch { path } => {
            fs.set_times(&path, Some(std::time::SystemTime::now()), None, None)?
        }
        Commands::Info => {
            for attrs in fs.dump_attributes()? {
                print!("{attrs}");
            }
        }
    }

    fs.close().context("Failed to write the archive")?;
    Ok(())
}

fn cmd_ls(fs: &ZipFileSystem, path: &str, filter: Option<&str>, long: bool) -> Result<()> {
    let pattern = filter.map(Pattern::new).transpose()?;
    let accept = |name: &[u8]| {
        pattern.as_ref().map_or(true, |p| {
            glob_match(p, &String::from_utf8_lossy(name))
        })
    };
    let mut names = fs.list(path, Some(&accept as &dyn Fn(&[u8]) -> bool))?;
    names.sort();

    for name in &names {
        let name = String::from_utf8_lossy(name);
        if long {
            let attrs = fs.attributes(name.as_bytes())?;
            println!(
                "{} {:>12} {:>12} {} {}",
                if attrs.is_directory { "d" } else { "-" },
                attrs.size,
                attrs.compressed_size,
                format_time(&attrs),
                name
            );
        } else {
            println!("{name}");
        }
    }

    if long {
        println!("\nTotal: {} entries", names.len());
    }
    Ok(())
}

fn cmd_cat(fs: &ZipFileSystem, path: &str) -> Result<()> {
    let mut reader = fs.new_input_stream(path)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut reader, &mut out)?;
    out.flush()?;
    Ok(())
}

fn cmd_put(fs: &ZipFileSystem, input: &Path, path: &str) -> Result<()> {
    let mut data = Vec::new();
    if input == Path::new("-") {
        io::stdin().read_to_end(&mut data)?;
    } else {
        data = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    let mut writer = fs.new_output_stream(path, &options)?;
    writer.write_all(&data)?;
    writer.finish()?;

    println!("{} bytes -> {}", data.len(), path);
    Ok(())
}

fn cmd_add(fs: &ZipFileSystem, input: &Path, prefix: &str) -> Result<()> {
    let files: Vec<_> = WalkDir::new(input)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .collect();

    println!("Adding {} files from {}...", files.len(), input.display());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    for file in &files {
        let relative = file.path().strip_prefix(input)?;
        let name = format!(
            "{}/{}",
            prefix.trim_end_matches('/'),
            relative.to_string_lossy().replace('\\', "/")
        );
        let data = fs::read(file.path())
            .with_context(|| format!("Failed to read {}", file.path().display()))?;
        fs.write(&name, &data)?;
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    println!("Added in {:?}", start.elapsed());
    Ok(())
}

fn cmd_extract(fs: &ZipFileSystem, output: &Path, filter: Option<&str>) -> Result<()> {
    let pattern = filter.map(Pattern::new).transpose()?;
    let entries: Vec<EntryAttributes> = fs
        .dump_attributes()?
        .into_iter()
        .filter(|attrs| !attrs.is_directory)
        .filter(|attrs| pattern.as_ref().map_or(true, |p| glob_match(p, &attrs.name)))
        .collect();

    println!("Extracting {} entries...", entries.len());

    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    fs::create_dir_all(output)?;

    let start = Instant::now();
    for attrs in &entries {
        let relative = Path::new(&attrs.name);
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            bail!("Refusing to extract {:?} outside the output directory", attrs.name);
        }
        let output_path = output.join(relative);
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut reader = fs.new_input_stream(&attrs.name)?;
        let mut file = fs::File::create(&output_path)?;
        io::copy(&mut reader, &mut file)?;

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    println!("Extraction completed in {:?}", start.elapsed());
    Ok(())
}

fn format_time(attrs: &EntryAttributes) -> String {
    match zipvfs::zip::time::to_datetime(attrs.last_modified) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "out of range".to_string(),
    }
}

/// Case-insensitive glob match that lets `*` cross `/`.
fn glob_match(pattern: &Pattern, name: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    pattern.matches_with(name, options)
}

/// Minimal stderr backend for the library's `log` output.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logging(verbose: u8) {
    static LOGGER: StderrLogger = StderrLogger;
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
