//! Binary entry point for bookcase.
//!
//! A thin command-line wrapper over the storage layer, mostly useful for
//! inspecting a catalog and moving it between backends.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use bookcase::config::BookcaseConfig;
use bookcase::observability;
use bookcase::services::{self, BulkOptions};
use bookcase::storage::{BookStorage, read_header_page};
use bookcase::{BookId, Filter, open_storage};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

/// Bookcase - catalog storage for a book library.
#[derive(Parser)]
#[command(name = "bookcase")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Connection URL (overrides configuration).
    #[arg(short = 'd', long, global = true, env = "BOOKCASE_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List subjects with their book counts.
    Subjects {
        /// Maximum subjects to show.
        #[arg(short, long, default_value_t = 100)]
        limit: i64,

        /// Subjects to skip.
        #[arg(short, long, default_value_t = 0)]
        offset: i64,
    },

    /// List book headers, sorted by subject then title.
    List {
        /// Whitespace-separated search terms.
        #[arg(short, long, default_value = "")]
        query: String,

        /// Exact subject to restrict to.
        #[arg(short, long, default_value = "")]
        subject: String,

        /// Page size.
        #[arg(short, long, default_value_t = 20)]
        limit: i64,

        /// Headers to skip.
        #[arg(short, long, default_value_t = 0)]
        offset: i64,
    },

    /// Show one book.
    Show {
        /// Book id.
        id: String,
    },

    /// Export the catalog as CSV.
    Export {
        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import books from a CSV file.
    Import {
        /// CSV file with the standard header row.
        file: PathBuf,

        /// Parse and count without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Copy every book from another backend into this one.
    Seed {
        /// Connection URL of the source catalog.
        #[arg(long, default_value = "csv:")]
        from: String,

        /// Read and count without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete one book.
    Delete {
        /// Book id.
        id: String,
    },

    /// Replace the administrator password hash.
    SetPasswordHash {
        /// The already-hashed password.
        hash: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let logging = config.logging.clone().verbose(cli.verbose);
    if let Err(e) = observability::init_logging(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn load_config(cli: &Cli) -> Result<BookcaseConfig> {
    let mut config = BookcaseConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        config.database_url.clone_from(url);
    }
    Ok(config)
}

/// Runs the selected command.
fn run_command(command: Commands, config: &BookcaseConfig) -> Result<()> {
    let storage = open_storage(&config.database_url)
        .with_context(|| format!("opening {}", config.database_url))?;
    let storage = storage.as_ref();

    match command {
        Commands::Subjects { limit, offset } => cmd_subjects(storage, config, limit, offset),
        Commands::List {
            query,
            subject,
            limit,
            offset,
        } => cmd_list(storage, config, &query, subject, limit, offset),
        Commands::Show { id } => cmd_show(storage, config, &BookId::new(id)),
        Commands::Export { output } => cmd_export(storage, config, output),
        Commands::Import { file, dry_run } => {
            cmd_import(storage, &config.bulk_options().with_dry_run(dry_run), file)
        },
        Commands::Seed { from, dry_run } => {
            cmd_seed(storage, &config.bulk_options().with_dry_run(dry_run), &from)
        },
        Commands::Delete { id } => {
            storage.delete_book(config.deadline(), &BookId::new(id.clone()))?;
            println!("Deleted {id}");
            Ok(())
        },
        Commands::SetPasswordHash { hash } => {
            storage.update_admin_password(config.deadline(), hash.as_bytes())?;
            println!("Administrator password updated");
            Ok(())
        },
    }
}

fn cmd_subjects(
    storage: &dyn BookStorage,
    config: &BookcaseConfig,
    limit: i64,
    offset: i64,
) -> Result<()> {
    let subjects = storage.read_book_subjects(config.deadline(), limit, offset)?;
    for subject in subjects {
        println!("{:>6}  {}", subject.count, subject.name);
    }
    Ok(())
}

fn cmd_list(
    storage: &dyn BookStorage,
    config: &BookcaseConfig,
    query: &str,
    subject: String,
    limit: i64,
    offset: i64,
) -> Result<()> {
    let filter = Filter::new(query, subject)?;
    let page = read_header_page(storage, config.deadline(), &filter, limit, offset)?;

    for header in &page.headers {
        println!(
            "{}  {} | {} | {}",
            header.id, header.subject, header.title, header.author
        );
    }
    if page.has_more {
        println!("... more results (use --offset {})", offset.saturating_add(limit));
    }
    Ok(())
}

fn cmd_show(storage: &dyn BookStorage, config: &BookcaseConfig, id: &BookId) -> Result<()> {
    let book = storage.read_book(config.deadline(), id)?;
    let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();

    println!("id:           {}", book.header.id);
    println!("title:        {}", book.header.title);
    println!("author:       {}", book.header.author);
    println!("subject:      {}", book.header.subject);
    println!("description:  {}", book.description);
    println!("dewey class:  {}", book.dewey_dec_class);
    println!("pages:        {}", book.pages);
    println!("publisher:    {}", book.publisher);
    println!("published:    {}", date(book.publish_date));
    println!("added:        {}", date(book.added_date));
    println!("ean isbn13:   {}", book.ean_isbn13);
    println!("upc isbn10:   {}", book.upc_isbn10);
    println!("image:        {} bytes (base64)", book.image_base64.len());
    Ok(())
}

fn cmd_export(
    storage: &dyn BookStorage,
    config: &BookcaseConfig,
    output: Option<PathBuf>,
) -> Result<()> {
    let options = config.bulk_options();
    let report = match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            services::export_csv(storage, BufWriter::new(file), &options)?
        },
        None => services::export_csv(storage, io::stdout().lock(), &options)?,
    };
    eprintln!(
        "Exported {} books in {:.2?}",
        report.written, report.elapsed
    );
    Ok(())
}

fn cmd_import(storage: &dyn BookStorage, options: &BulkOptions, file: PathBuf) -> Result<()> {
    let reader =
        File::open(&file).with_context(|| format!("opening {}", file.display()))?;
    let report = services::import_csv(storage, BufReader::new(reader), options)?;
    println!(
        "Imported {} of {} books in {:.2?}",
        report.written, report.processed, report.elapsed
    );
    Ok(())
}

fn cmd_seed(storage: &dyn BookStorage, options: &BulkOptions, from: &str) -> Result<()> {
    let source = open_storage(from).with_context(|| format!("opening {from}"))?;
    let report = services::seed(source.as_ref(), storage, options)?;
    println!(
        "Seeded {} of {} books in {:.2?}",
        report.written, report.processed, report.elapsed
    );
    Ok(())
}
