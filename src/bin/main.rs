use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dcmstore::convert::{dataset_to_json, from_json, write_file};
use dcmstore::net::{run_server, ServerConfig};
use dcmstore::tag_group::{parse_dir, ParseOptions, TagGroup};
use env_logger::Builder;
use log::{Level, LevelFilter};
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;

/// Receive, convert and inspect DICOM files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Show more verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a store SCP that writes received instances to disk
    Server {
        /// Server configuration file (JSON)
        #[arg(short = 'f', long, value_name = "CONFIG_PATH")]
        config: PathBuf,
    },

    /// Extract a tag group from every DICOM file in a directory
    Parse {
        /// Input directory
        #[arg(short, long, value_name = "INPUT_DIR")]
        input: PathBuf,

        /// Tag group file (JSON)
        #[arg(short = 'f', long, value_name = "TAGS_PATH")]
        tags: PathBuf,

        /// Recursively look for files in input directory
        #[arg(short, long)]
        recursive: bool,

        /// Fail when a file found is not DICOM instead of skipping it
        #[arg(short, long)]
        strict: bool,
    },

    /// Print a DICOM file as a DICOM JSON document
    ToJson {
        /// Input DICOM file
        #[arg(short, long, value_name = "INPUT_PATH")]
        input: PathBuf,

        /// Include pixel data in the output
        #[arg(long)]
        include_pixels: bool,
    },

    /// Write a DICOM file from a DICOM JSON document
    FromJson {
        /// Input JSON file
        #[arg(short, long, value_name = "INPUT_PATH")]
        input: PathBuf,

        /// Output DICOM file
        #[arg(short, long, value_name = "OUTPUT_PATH")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let log_level = if verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Error
    };

    let mut builder = Builder::from_default_env();
    builder
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => "Error",
                Level::Warn => "Warning",
                Level::Info => "Info",
                Level::Debug => "Debug",
                Level::Trace => "Trace",
            };
            writeln!(buf, "{}: {}", level, record.args())
        })
        .filter(None, log_level);
    builder.init();
}

fn print_json(value: &Value) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn serve(config_path: &PathBuf) -> Result<()> {
    let config = ServerConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let _server = run_server(&config).context("failed to start store SCP")?;

    // the server runs until the process is terminated
    loop {
        thread::park();
    }
}

fn parse(input: &PathBuf, tags: &PathBuf, options: ParseOptions) -> Result<()> {
    let group = TagGroup::from_file(tags)
        .with_context(|| format!("failed to load {}", tags.display()))?;
    let parsed = parse_dir(input, &group, options)
        .with_context(|| format!("failed to parse {}", input.display()))?;

    let rows: Vec<Value> = parsed
        .into_iter()
        .map(|file| {
            let mut row = Map::new();
            row.insert("path".into(), file.path.display().to_string().into());
            row.extend(file.values);
            Value::Object(row)
        })
        .collect();
    print_json(&Value::Array(rows))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Server { config } => serve(&config),
        Command::Parse {
            input,
            tags,
            recursive,
            strict,
        } => {
            let options = ParseOptions { recursive, strict };
            parse(&input, &tags, options)
        }
        Command::ToJson {
            input,
            include_pixels,
        } => {
            if !input.is_file() {
                bail!("input should be an existing DICOM file");
            }
            let map = dataset_to_json(input.as_path(), include_pixels)
                .with_context(|| format!("failed to convert {}", input.display()))?;
            print_json(&Value::Object(map))
        }
        Command::FromJson { input, output } => {
            let json = fs::read_to_string(&input)
                .with_context(|| format!("failed to open {}", input.display()))?;
            let Value::Object(map) = serde_json::from_str::<Value>(&json)
                .with_context(|| format!("failed to parse {}", input.display()))?
            else {
                bail!("{} should hold a JSON object", input.display());
            };
            let obj = from_json(map)
                .with_context(|| format!("failed to convert {}", input.display()))?;
            if let Some(parent_dir) = output.parent() {
                fs::create_dir_all(parent_dir)?;
            }
            write_file(&output, &obj)
                .with_context(|| format!("failed to create {}", output.display()))?;
            Ok(())
        }
    }
}
