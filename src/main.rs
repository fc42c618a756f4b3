use std::{env, path::PathBuf, process, sync::Arc};

use anyhow::{Context, bail};
use comms::MockCommunicator;
use log::{error, info};
use minibatch::{MinibatchSource, MinibatchSourceConfig, StreamConfiguration, text_format_config};
use warmstart::{FEATURES_STREAM, LABELS_STREAM, WarmStartParams, WarmStartReport, run_warm_start};

const USAGE: &str = "Usage: warmstart (<data-file> | --config <json>) [--minibatches N] \
[--minibatch-size N] [--warm-start N] [--workers N] [--rank N] [--randomize] [--json]";

const DEFAULT_WARM_START: usize = 8;

#[derive(Debug)]
struct Args {
    data_file: Option<PathBuf>,
    config: Option<PathBuf>,
    minibatches: usize,
    minibatch_size: usize,
    /// Overrides the threshold of a config file when given.
    warm_start: Option<usize>,
    workers: usize,
    rank: usize,
    randomize: bool,
    json: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            data_file: None,
            config: None,
            minibatches: 10,
            minibatch_size: 4,
            warm_start: None,
            workers: 2,
            rank: 0,
            randomize: false,
            json: false,
        }
    }
}

fn number(args: &mut impl Iterator<Item = String>, name: &str) -> anyhow::Result<usize> {
    let raw = args.next().with_context(|| format!("{name} needs a value"))?;
    raw.parse()
        .with_context(|| format!("{name} expects a number, got '{raw}'"))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--minibatches" => parsed.minibatches = number(&mut args, &arg)?,
            "--minibatch-size" => parsed.minibatch_size = number(&mut args, &arg)?,
            "--warm-start" => parsed.warm_start = Some(number(&mut args, &arg)?),
            "--workers" => parsed.workers = number(&mut args, &arg)?,
            "--rank" => parsed.rank = number(&mut args, &arg)?,
            "--randomize" => parsed.randomize = true,
            "--json" => parsed.json = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(path.into());
            }
            flag if flag.starts_with("--") => bail!("unknown flag: {flag}"),
            path => {
                if parsed.data_file.replace(path.into()).is_some() {
                    bail!("only one data file can be given");
                }
            }
        }
    }

    if parsed.data_file.is_some() == parsed.config.is_some() {
        bail!("give either a data file or --config");
    }
    Ok(parsed)
}

/// Builds the source described by `args` and runs the warm-start check on it.
///
/// A config file keeps its own threshold and randomization unless
/// `--warm-start` or `--randomize` is given.
fn check(args: &Args) -> anyhow::Result<WarmStartReport> {
    let mut config = match (&args.config, &args.data_file) {
        (Some(path), _) => MinibatchSourceConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(path)) => text_format_config(
            path,
            &[
                StreamConfiguration::new(FEATURES_STREAM, 2),
                StreamConfiguration::new(LABELS_STREAM, 2),
            ],
        )
        .with_randomize(false)
        .with_distributed_after(DEFAULT_WARM_START),
        (None, None) => bail!(USAGE),
    };

    if let Some(warm_start) = args.warm_start {
        config = config.with_distributed_after(warm_start);
    }
    if args.randomize {
        config = config.with_randomize(true);
    }
    let warm_start = config.distributed_after_sample_count;

    let mock = Arc::new(MockCommunicator::new(args.workers));
    mock.set_rank(args.rank)?;

    let mut source = MinibatchSource::builder(config)
        .communicator(mock)
        .build()
        .context("building minibatch source")?;
    info!("running as {:?}", source.communicator().current_worker());

    let params = WarmStartParams::new(args.minibatches, args.minibatch_size, warm_start)
        .with_workers(args.workers);
    Ok(run_warm_start(&mut source, &params)?)
}

fn run(args: Args) -> anyhow::Result<()> {
    let report = check(&args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for mb in &report.minibatches {
        println!(
            "minibatch {:>4}: samples before {:>6}, {:<11} delivered {}",
            mb.iteration,
            mb.samples_before,
            if mb.distributed { "distributed" } else { "local" },
            mb.delivered
        );
    }
    match report.distributed_from {
        Some(i) => println!("distributed from minibatch {i}"),
        None => println!("never distributed"),
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags() {
        let parsed = args(&["data.txt", "--warm-start", "16", "--workers", "4", "--json"]).unwrap();
        assert_eq!(parsed.data_file, Some(PathBuf::from("data.txt")));
        assert_eq!(parsed.warm_start, Some(16));
        assert_eq!(parsed.workers, 4);
        assert_eq!(parsed.minibatch_size, 4);
        assert!(parsed.json);
    }

    fn data_file() -> &'static str {
        concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/data/SimpleDataTrain_cntk_text.txt"
        )
    }

    fn config_file(distributed_after: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let cfg = text_format_config(
            data_file(),
            &[
                StreamConfiguration::new(FEATURES_STREAM, 2),
                StreamConfiguration::new(LABELS_STREAM, 2),
            ],
        )
        .with_randomize(false)
        .with_distributed_after(distributed_after);
        write!(file, "{}", serde_json::to_string(&cfg).unwrap()).unwrap();
        file
    }

    #[test]
    fn config_file_keeps_its_threshold() {
        let file = config_file(12);
        let path = file.path().to_str().unwrap();

        let report = check(&args(&["--config", path]).unwrap()).unwrap();
        assert_eq!(report.distributed_from, Some(3));

        let report = check(&args(&["--config", path, "--warm-start", "4"]).unwrap()).unwrap();
        assert_eq!(report.distributed_from, Some(1));

        run(args(&["--config", path, "--json"]).unwrap()).unwrap();
    }

    #[test]
    fn data_file_uses_default_threshold() {
        let report = check(&args(&[data_file()]).unwrap()).unwrap();
        assert_eq!(report.distributed_from, Some(DEFAULT_WARM_START / 4));
        assert_eq!(report.minibatches[0].delivered, 4);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(args(&[]).is_err());
        assert!(args(&["a.txt", "b.txt"]).is_err());
        assert!(args(&["a.txt", "--config", "c.json"]).is_err());
        assert!(args(&["a.txt", "--workers"]).is_err());
        assert!(args(&["a.txt", "--workers", "two"]).is_err());
        assert!(args(&["a.txt", "--fast"]).is_err());
    }
}
