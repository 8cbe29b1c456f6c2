//! Append analytical staves to a score
//!
//! Writes `<score>-analysis.pdf` next to the input unless `-o` is given.
//!
//! Usage:
//!   add_staves SCORE [-o PATH] [-f] [-g GAP] [-s N] [--dpi N]
//!              [--config FILE] [--report FILE] [-j N]
//!
//! Set `RUST_LOG=debug` for per-page geometry.

use add_staves::{ProcessConfig, ScoreDocument, ScoreProcessor};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const USAGE: &str = "\
Usage: add_staves SCORE [options]

Options:
  -o, --output PATH   Output file (default: <SCORE>-analysis.pdf)
  -f, --force         Overwrite an existing default output file
  -g, --gap GAP       Gap below the staff, in staff spaces (default: 3)
  -s, --staves N      Number of analytical staves per page (default: 1)
      --dpi N         Fixed sampling resolution (default: adaptive)
      --config FILE   JSON configuration; options above override it
      --report FILE   Write the per-page JSON report to FILE
  -j, --threads N     Worker threads (default: all cores)
  -h, --help          Show this help";

struct CliArgs {
    score: PathBuf,
    output: Option<PathBuf>,
    force: bool,
    gap: Option<f32>,
    staves: Option<u8>,
    dpi: Option<u32>,
    config: Option<PathBuf>,
    report: Option<PathBuf>,
    threads: Option<usize>,
}

impl CliArgs {
    fn from_args(args: &[String]) -> Result<Self, String> {
        let mut score = None;
        let mut output = None;
        let mut force = false;
        let mut gap = None;
        let mut staves = None;
        let mut dpi = None;
        let mut config = None;
        let mut report = None;
        let mut threads = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-o" | "--output" => output = Some(PathBuf::from(value(args, &mut i)?)),
                "-f" | "--force" => force = true,
                "-g" | "--gap" => gap = Some(parse(args, &mut i)?),
                "-s" | "--staves" => staves = Some(parse(args, &mut i)?),
                "--dpi" => dpi = Some(parse(args, &mut i)?),
                "--config" => config = Some(PathBuf::from(value(args, &mut i)?)),
                "--report" => report = Some(PathBuf::from(value(args, &mut i)?)),
                "-j" | "--threads" => threads = Some(parse(args, &mut i)?),
                "-h" | "--help" => return Err(String::new()),
                other if other.starts_with('-') => {
                    return Err(format!("unknown option {}", other));
                },
                other => {
                    if score.is_some() {
                        return Err(format!("unexpected argument {}", other));
                    }
                    score = Some(PathBuf::from(other));
                },
            }
            i += 1;
        }

        Ok(Self {
            score: score.ok_or_else(|| "missing SCORE".to_string())?,
            output,
            force,
            gap,
            staves,
            dpi,
            config,
            report,
            threads,
        })
    }

    fn process_config(&self) -> add_staves::Result<ProcessConfig> {
        let mut config = match &self.config {
            Some(path) => ProcessConfig::from_json_file(path)?,
            None => ProcessConfig::new(),
        };
        if let Some(gap) = self.gap {
            config = config.with_gap(gap);
        }
        if let Some(staves) = self.staves {
            config = config.with_staff_count(staves);
        }
        if let Some(dpi) = self.dpi {
            config = config.with_resolution(dpi);
        }
        if let Some(threads) = self.threads {
            config = config.with_threads(threads);
        }
        Ok(config)
    }
}

fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} needs a value", flag))
}

fn parse<T: std::str::FromStr>(args: &[String], i: &mut usize) -> Result<T, String> {
    let flag = args[*i].clone();
    let raw = value(args, i)?;
    raw.parse()
        .map_err(|_| format!("invalid value for {}: {}", flag, raw))
}

/// `<stem>-analysis.pdf` in the score's directory.
fn default_output(score: &Path) -> PathBuf {
    let stem = score
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "score".to_string());
    score.with_file_name(format!("{}-analysis.pdf", stem))
}

fn run(cli: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = match &cli.output {
        Some(path) => path.clone(),
        None => {
            let path = default_output(&cli.score);
            if path.exists() && !cli.force {
                return Err(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )
                .into());
            }
            path
        },
    };

    let config = cli.process_config()?;
    let input = ScoreDocument::load(&cli.score)?;
    log::info!(
        "Loaded {} ({} pages)",
        cli.score.display(),
        input.page_count()
    );

    let mut output = ScoreProcessor::new(config).process(&input)?;
    for result in &output.results {
        if let Some(error) = result.error() {
            eprintln!("page {}: {}", result.index + 1, error);
        }
    }

    output.document.save(&output_path)?;
    if let Some(report) = &cli.report {
        std::fs::write(report, output.report_json()?)?;
    }

    let summary = output.summary;
    println!(
        "{}: {} of {} pages augmented, {} failed",
        output_path.display(),
        summary.succeeded,
        summary.total,
        summary.failed
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let cli = match CliArgs::from_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            if message.is_empty() {
                println!("{}", USAGE);
                return ExitCode::SUCCESS;
            }
            eprintln!("Error: {}\n\n{}", message, USAGE);
            return ExitCode::from(2);
        },
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}
