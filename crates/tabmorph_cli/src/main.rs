use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde_json::Value as JsonValue;
use tabmorph::{
    Conversion, Converter, EngineConfig, ErrorMode, RuleError, StreamOptions, default_registry,
    stream_ndjson_to_csv, validate_with_warnings,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabmorph")]
#[command(version, about = "Convert nested JSON records into flat tables")]
struct Cli {
    /// Log filter, e.g. `debug` or `tabmorph=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert records to CSV, JSON or NDJSON.
    Convert(ConvertArgs),
    /// Check a mapping without running it.
    Validate(ValidateArgs),
    /// Print the evaluation trace of each input record.
    Trace(TraceArgs),
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(short, long)]
    mapping: PathBuf,
    /// Input file, or `-` for stdin.
    #[arg(short, long)]
    input: PathBuf,
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    /// Read the input as one JSON record per line.
    #[arg(long, action = ArgAction::SetTrue, default_value_t = false)]
    ndjson: bool,
    #[arg(long, default_value_t = StreamOptions::default().batch_size)]
    batch_size: usize,
    #[arg(long, value_enum)]
    on_error: Option<ErrorModeArg>,
    #[arg(long, action = ArgAction::SetTrue, default_value_t = false)]
    strict_schema: bool,
    #[arg(long, action = ArgAction::SetTrue, default_value_t = false)]
    no_header: bool,
    /// Engine settings (YAML or JSON).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(short, long)]
    mapping: PathBuf,
    #[arg(long, action = ArgAction::SetTrue, default_value_t = false)]
    warnings: bool,
}

#[derive(Args)]
struct TraceArgs {
    #[arg(short, long)]
    mapping: PathBuf,
    #[arg(short, long)]
    input: PathBuf,
    #[arg(long, action = ArgAction::SetTrue, default_value_t = false)]
    ndjson: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
    Ndjson,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ErrorModeArg {
    Null,
    Default,
    Raise,
    Warn,
}

impl From<ErrorModeArg> for ErrorMode {
    fn from(value: ErrorModeArg) -> Self {
        match value {
            ErrorModeArg::Null => ErrorMode::Null,
            ErrorModeArg::Default => ErrorMode::Default,
            ErrorModeArg::Raise => ErrorMode::Raise,
            ErrorModeArg::Warn => ErrorMode::Warn,
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    match cli.command {
        Command::Convert(args) => run_convert(args),
        Command::Validate(args) => run_validate(args),
        Command::Trace(args) => run_trace(args),
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_mapping(path: &Path) -> anyhow::Result<JsonValue> {
    let text = read_text(path)?;
    serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_config(args: &ConvertArgs) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = read_text(path)?;
            serde_yaml::from_str::<EngineConfig>(&text)
                .with_context(|| format!("invalid engine config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(mode) = args.on_error {
        config.default_on_error = mode.into();
    }
    if args.strict_schema {
        config.strict_schema = true;
    }
    Ok(config)
}

fn is_ndjson(path: &Path, flag: bool) -> bool {
    flag || matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("ndjson" | "jsonl")
    )
}

/// A JSON object or array, or one record per non-blank line.
fn load_records(path: &Path, ndjson: bool) -> anyhow::Result<JsonValue> {
    let text = read_text(path)?;
    if !ndjson {
        return serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON input {}", path.display()));
    }
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line)
            .with_context(|| format!("{}: invalid JSON on line {}", path.display(), idx + 1))?;
        records.push(record);
    }
    Ok(JsonValue::Array(records))
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn run_convert(args: ConvertArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(&args)?;
    let mapping = load_mapping(&args.mapping)?;
    let converter = Converter::from_value(&mapping, config)
        .with_context(|| format!("invalid mapping {}", args.mapping.display()))?;
    let ndjson = is_ndjson(&args.input, args.ndjson);
    let mut out = open_output(args.output.as_deref())?;

    if ndjson && args.format == OutputFormat::Csv {
        let options = StreamOptions {
            batch_size: args.batch_size,
            include_header: !args.no_header,
        };
        let summary = stream_ndjson_to_csv(&converter, open_input(&args.input)?, &mut out, options)?;
        info!(
            records = summary.records,
            rows = summary.rows,
            chunks = summary.chunks,
            "stream finished"
        );
        out.flush()?;
        return Ok(ExitCode::SUCCESS);
    }

    let input = load_records(&args.input, ndjson)?;
    let conversion = converter.convert(&input)?;
    report_schema(&conversion);
    write_conversion(&conversion, args.format, !args.no_header, &mut out)?;
    out.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn report_schema(conversion: &Conversion) {
    if let Some(report) = conversion.schema_report.as_ref().filter(|r| !r.is_clean()) {
        let detail = serde_json::to_string(report).unwrap_or_default();
        warn!(report = %detail, "output schema check found issues");
    }
}

fn write_conversion(
    conversion: &Conversion,
    format: OutputFormat,
    header: bool,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Csv => conversion.table.write_csv(out, header)?,
        OutputFormat::Json => {
            let records: Vec<JsonValue> = conversion
                .table
                .to_records()
                .into_iter()
                .map(JsonValue::Object)
                .collect();
            serde_json::to_writer_pretty(&mut *out, &records)?;
            writeln!(out)?;
        }
        OutputFormat::Ndjson => {
            for record in conversion.table.to_records() {
                serde_json::to_writer(&mut *out, &record)?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

fn print_findings(label: &str, findings: &[RuleError]) {
    for finding in findings {
        println!(
            "{}: [{}] {}",
            label,
            finding.code.as_str(),
            finding
        );
    }
}

fn run_validate(args: ValidateArgs) -> anyhow::Result<ExitCode> {
    let mapping = load_mapping(&args.mapping)?;
    let report = validate_with_warnings(&mapping, default_registry());
    print_findings("error", &report.errors);
    if args.warnings {
        print_findings("warning", &report.warnings);
    }
    if !report.ok {
        return Ok(ExitCode::FAILURE);
    }
    println!("ok");
    Ok(ExitCode::SUCCESS)
}

fn run_trace(args: TraceArgs) -> anyhow::Result<ExitCode> {
    let mapping = load_mapping(&args.mapping)?;
    let converter = Converter::from_value(&mapping, EngineConfig::default())
        .with_context(|| format!("invalid mapping {}", args.mapping.display()))?;
    let input = load_records(&args.input, is_ndjson(&args.input, args.ndjson))?;

    let rendered = match &input {
        JsonValue::Object(_) => serde_json::to_value(converter.trace(&input)?)?,
        JsonValue::Array(records) => {
            let mut traces = Vec::with_capacity(records.len());
            for record in records {
                traces.push(serde_json::to_value(converter.trace(record)?)?);
            }
            JsonValue::Array(traces)
        }
        _ => bail!("trace input must be a JSON object or an array of objects"),
    };
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(ExitCode::SUCCESS)
}
