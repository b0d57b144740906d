use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ironagg_core::{init_from_env, set_log_level, FunctionRegistry, LogLevel, Pipeline, Value};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ironagg")]
#[command(about = "IronAgg CLI - run aggregation pipelines over JSON documents")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides IRONAGG_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline over a JSON array of documents
    Run {
        /// Pipeline file (JSON array of stages)
        pipeline: PathBuf,
        /// Documents file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },
    /// Compile a pipeline and list its stages
    Check {
        /// Pipeline file (JSON array of stages)
        pipeline: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_logging(cli.log_level.as_deref())?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::Run {
            pipeline,
            input,
            pretty,
        } => {
            let documents = match input {
                Some(path) => read_json(&path)?,
                None => {
                    let mut content = String::new();
                    io::stdin()
                        .read_to_string(&mut content)
                        .context("Failed to read documents from stdin")?;
                    serde_json::from_str(&content).context("Invalid JSON on stdin")?
                }
            };
            run_pipeline(&pipeline, documents, pretty, &mut out)
        }
        Commands::Check { pipeline } => check_pipeline(&pipeline, &mut out),
    }
}

fn configure_logging(flag: Option<&str>) -> Result<()> {
    init_from_env();
    if let Some(raw) = flag {
        let level = LogLevel::from_str(raw)
            .with_context(|| format!("Unknown log level: {}", raw))?;
        set_log_level(level);
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", path.display()))
}

fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let descriptor = Value::from(read_json(path)?);
    Pipeline::compile(&descriptor, &FunctionRegistry::new())
        .with_context(|| format!("Invalid pipeline: {}", path.display()))
}

/// Run a pipeline file over documents and write the JSON result
fn run_pipeline(
    pipeline_path: &Path,
    documents: serde_json::Value,
    pretty: bool,
    out: &mut impl Write,
) -> Result<()> {
    let pipeline = load_pipeline(pipeline_path)?;

    let docs = match Value::from(documents) {
        Value::Array(items) => items,
        other => bail!("Documents must be a JSON array, got {}", other.type_name()),
    };

    let output = pipeline
        .execute(docs)
        .with_context(|| format!("Pipeline failed: {}", pipeline_path.display()))?;

    let json = output.to_json();
    let rendered = if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    writeln!(out, "{}", rendered)?;
    Ok(())
}

/// Compile a pipeline file and print one stage tag per line
fn check_pipeline(pipeline_path: &Path, out: &mut impl Write) -> Result<()> {
    let pipeline = load_pipeline(pipeline_path)?;
    writeln!(
        out,
        "{}: {} stage(s)",
        pipeline_path.display(),
        pipeline.stages().len()
    )?;
    for (i, tag) in pipeline.tags().iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, tag)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &serde_json::Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content.to_string()).unwrap();
        path
    }

    fn output_string(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_run_pipeline_file() {
        let dir = TempDir::new().unwrap();
        let pipeline = write_file(
            &dir,
            "pipeline.json",
            &json!([
                { "$group": { "_id": "$g", "total": { "$sum": "$v" } } },
                { "$sort": { "total": -1 } }
            ]),
        );
        let docs_path = write_file(
            &dir,
            "docs.json",
            &json!([{ "g": "m", "v": 10 }, { "g": "f", "v": 20 }, { "g": "m", "v": 5 }]),
        );

        let mut buffer = Vec::new();
        run_pipeline(&pipeline, read_json(&docs_path).unwrap(), false, &mut buffer).unwrap();
        let result: serde_json::Value = serde_json::from_str(&output_string(buffer)).unwrap();
        assert_eq!(
            result,
            json!([{ "_id": "f", "total": 20 }, { "_id": "m", "total": 15 }])
        );
    }

    #[test]
    fn test_run_objectify_pretty() {
        let dir = TempDir::new().unwrap();
        let pipeline = write_file(&dir, "pipeline.json", &json!([{ "$objectify": {} }]));

        let mut buffer = Vec::new();
        run_pipeline(&pipeline, json!([{ "_id": "a" }]), true, &mut buffer).unwrap();
        let text = output_string(buffer);
        assert!(text.contains('\n'));
        let result: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(result, json!({ "a": { "_id": "a" } }));
    }

    #[test]
    fn test_run_rejects_non_array_documents() {
        let dir = TempDir::new().unwrap();
        let pipeline = write_file(&dir, "pipeline.json", &json!([]));

        let err = run_pipeline(&pipeline, json!({ "a": 1 }), false, &mut Vec::<u8>::new()).unwrap_err();
        assert!(err.to_string().contains("must be a JSON array"));
    }

    #[test]
    fn test_check_lists_stages() {
        let dir = TempDir::new().unwrap();
        let pipeline = write_file(
            &dir,
            "pipeline.json",
            &json!([{ "$filter": { "a": 1 } }, { "$orderBy": { "a": 1 } }, { "$limit": 3 }]),
        );

        let mut buffer = Vec::new();
        check_pipeline(&pipeline, &mut buffer).unwrap();
        let text = output_string(buffer);
        assert!(text.contains("3 stage(s)"));
        assert!(text.contains("1. $match"));
        assert!(text.contains("2. $sort"));
        assert!(text.contains("3. $limit"));
    }

    #[test]
    fn test_check_reports_invalid_pipeline() {
        let dir = TempDir::new().unwrap();
        let pipeline = write_file(&dir, "pipeline.json", &json!([{ "$unwind": "$tags" }]));

        let err = check_pipeline(&pipeline, &mut Vec::<u8>::new()).unwrap_err();
        assert!(err.to_string().contains("Invalid pipeline"));
        assert!(format!("{:#}", err).contains("Unknown pipeline stage: $unwind"));
    }

    #[test]
    fn test_missing_file_has_context() {
        let dir = TempDir::new().unwrap();
        let err = read_json(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read file"));
    }

    #[test]
    fn test_unknown_log_level() {
        assert!(configure_logging(Some("loud")).is_err());
    }
}
