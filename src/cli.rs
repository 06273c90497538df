use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum, error::ErrorKind};
use tracing::info;

use crate::config::PipelineConfig;
use crate::constants::source::PARQUET_EXTENSION;
use crate::pipeline::Pipeline;
use crate::report::{format_count, render_summary, write_entities_json, write_grouped_jsonl};
use crate::source::{JsonlSource, RecordSource};

type DynSource = Box<dyn RecordSource + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    Auto,
    Jsonl,
    Parquet,
}

#[derive(Debug, Parser)]
#[command(
    name = "postscope",
    disable_help_subcommand = true,
    about = "Batch sentiment analytics over social-media post exports",
    long_about = "Aggregate post sentiment by time, platform, emotion, and theme, and profile sentiment toward tracked public figures."
)]
struct PostscopeCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run both analyses over an input file or directory of shards.
    Run(RunArgs),
    /// Validate a config file and print the effective configuration.
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Input file or directory of .jsonl/.ndjson/.parquet shards"
    )]
    input: PathBuf,
    #[arg(
        long,
        value_enum,
        default_value_t = InputFormat::Auto,
        help = "Input format; auto picks parquet when the path holds parquet shards"
    )]
    format: InputFormat,
    #[arg(long, value_name = "CONFIG", help = "Optional JSON pipeline config")]
    config: Option<PathBuf>,
    #[arg(
        long = "grouped-out",
        value_name = "PATH",
        default_value = "grouped_sentiment.jsonl",
        help = "Destination for grouped rows (JSON lines)"
    )]
    grouped_out: PathBuf,
    #[arg(
        long = "entities-out",
        value_name = "PATH",
        default_value = "entity_sentiment.json",
        help = "Destination for entity rows (JSON array)"
    )]
    entities_out: PathBuf,
    #[arg(
        long = "batch-size",
        value_parser = parse_positive_usize,
        help = "Override records per batch"
    )]
    batch_size: Option<usize>,
    #[arg(
        long = "parallel-batches",
        value_parser = parse_positive_usize,
        help = "Override batches processed per parallel round"
    )]
    parallel_batches: Option<usize>,
}

#[derive(Debug, clap::Args)]
struct CheckConfigArgs {
    #[arg(long, value_name = "CONFIG", help = "JSON pipeline config to validate")]
    config: Option<PathBuf>,
}

/// Parse `args_iter` (without the program name) and run the selected command.
pub fn run<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let Some(cli) =
        parse_cli::<PostscopeCli, _>(std::iter::once("postscope".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };
    match cli.command {
        Command::Run(args) => run_pipeline(args),
        Command::CheckConfig(args) => check_config(args),
    }
}

fn run_pipeline(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(parallel_batches) = args.parallel_batches {
        config.parallel_batches = parallel_batches;
    }

    let source = open_source(&args.input, args.format)?;
    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run(source.as_ref())?;

    write_grouped_jsonl(&args.grouped_out, &output.grouped)?;
    write_entities_json(&args.entities_out, &output.entities)?;
    info!(
        "[postscope:cli] wrote {} grouped rows to {} and {} entity rows to {}",
        format_count(output.grouped.len() as u64),
        args.grouped_out.display(),
        output.entities.len(),
        args.entities_out.display()
    );

    print!("{}", render_summary(&output.report, &output.entities));
    if !output.report.complete {
        return Err(format!(
            "run stopped early after {} failed batch(es); outputs reflect a partial dataset",
            output.report.batches_failed.len()
        )
        .into());
    }
    Ok(())
}

fn check_config(args: CheckConfigArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(args.config.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => {
            let config = PipelineConfig::default();
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn open_source(path: &Path, format: InputFormat) -> Result<DynSource, Box<dyn Error>> {
    let format = match format {
        InputFormat::Auto if holds_parquet(path) => InputFormat::Parquet,
        InputFormat::Auto => InputFormat::Jsonl,
        other => other,
    };
    match format {
        InputFormat::Parquet => open_parquet(path),
        _ => Ok(Box::new(JsonlSource::open(path)?)),
    }
}

#[cfg(feature = "parquet")]
fn open_parquet(path: &Path) -> Result<DynSource, Box<dyn Error>> {
    Ok(Box::new(crate::source::ParquetSource::open(path)?))
}

#[cfg(not(feature = "parquet"))]
fn open_parquet(path: &Path) -> Result<DynSource, Box<dyn Error>> {
    Err(format!(
        "{} holds parquet input but postscope was built without the `parquet` feature",
        path.display()
    )
    .into())
}

fn holds_parquet(path: &Path) -> bool {
    let is_parquet = |p: &Path| {
        p.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == PARQUET_EXTENSION)
    };
    if path.is_dir() {
        walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
            .any(|entry| entry.file_type().is_file() && is_parquet(entry.path()))
    } else {
        is_parquet(path)
    }
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{raw}' as a positive integer"))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args(raw: &[&str]) -> impl Iterator<Item = String> {
        raw.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn run_writes_both_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("posts.jsonl");
        fs::write(
            &input,
            concat!(
                r#"{"language":"en","primary_theme":"Politics","url":"https://x.com/a","date":"2024-12-02T10:00:00.000Z","sentiment":0.4,"main_emotion":"joy","english_keywords":"trump, tariffs","secondary_themes":[1]}"#,
                "\n",
                r#"{"language":"en","primary_theme":"Politics","url":"https://x.com/b","date":"2024-12-02T10:30:00.000Z","sentiment":-0.2,"main_emotion":"joy","english_keywords":"musk","secondary_themes":[1]}"#,
                "\n"
            ),
        )
        .expect("write input");
        let grouped = dir.path().join("grouped.jsonl");
        let entities = dir.path().join("entities.json");

        run(args(&[
            "run",
            "--input",
            input.to_str().expect("utf8"),
            "--grouped-out",
            grouped.to_str().expect("utf8"),
            "--entities-out",
            entities.to_str().expect("utf8"),
            "--batch-size",
            "1",
        ]))
        .expect("run");

        let grouped_raw = fs::read_to_string(&grouped).expect("grouped");
        assert_eq!(grouped_raw.lines().count(), 1);
        let rows: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&entities).expect("entities"))
                .expect("json");
        assert_eq!(rows.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn rejects_zero_batch_size_and_bad_config() {
        assert!(run(args(&["run", "--input", "x.jsonl", "--batch-size", "0"])).is_err());

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        std::io::Write::write_all(&mut file, br#"{"histogram_bins": 0}"#).expect("write");
        let path = file.path().to_str().expect("utf8").to_string();
        assert!(run(args(&["check-config", "--config", &path])).is_err());
    }

    #[test]
    fn auto_format_detects_parquet_paths() {
        assert!(holds_parquet(Path::new("data/chunk_0.parquet")));
        assert!(!holds_parquet(Path::new("data/chunk_0.jsonl")));
    }
}
