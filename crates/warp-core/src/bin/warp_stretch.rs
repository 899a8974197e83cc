//! warp-stretch - time-stretch and pitch-shift a WAV file
//!
//! ```text
//! warp-stretch <in.wav> <out.wav> [--ratio R] [--semitones S] [--workers N]
//!              [--pan P] [--volume V] [--config PATH]
//! warp-stretch --serve [--config PATH]
//! ```
//!
//! `--serve` answers newline-delimited JSON worker requests on stdin/stdout.
//! Set RUST_LOG=debug for verbose output.

use std::cell::Cell;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use warp_core::audio_file::{read_wav, write_wav};
use warp_core::config::{default_config_path, WarpConfig};
use warp_core::envelope::EnvelopeSettings;
use warp_core::strategy::{ProcessingJob, ProcessingStrategySelector};
use warp_core::timestretch::StretchEngine;
use warp_core::worker::serve_lines;
use warp_core::StretchParameters;

const USAGE: &str = "usage: warp-stretch <in.wav> <out.wav> [--ratio R] [--semitones S] [--workers N] \
[--pan P] [--volume V] [--config PATH]\n       warp-stretch --serve [--config PATH]";

#[derive(Debug, Clone, PartialEq)]
struct StretchArgs {
    input: PathBuf,
    output: PathBuf,
    ratio: f64,
    semitones: f64,
    workers: Option<usize>,
    pan: f32,
    volume: f32,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Stretch(StretchArgs),
    Serve,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
struct CliArgs {
    command: Command,
    config: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut positional = Vec::new();
    let mut ratio = 1.0;
    let mut semitones = 0.0;
    let mut workers = None;
    let mut pan: f32 = 0.0;
    let mut volume = 1.0;
    let mut config = None;
    let mut serve = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .with_context(|| format!("{} needs a value", name))
                .map(String::as_str)
        };
        match arg.as_str() {
            "-h" | "--help" => {
                return Ok(CliArgs {
                    command: Command::Help,
                    config,
                })
            }
            "--serve" => serve = true,
            "--ratio" => ratio = value("--ratio")?.parse().context("--ratio")?,
            "--semitones" => semitones = value("--semitones")?.parse().context("--semitones")?,
            "--workers" => workers = Some(value("--workers")?.parse().context("--workers")?),
            "--pan" => pan = value("--pan")?.parse().context("--pan")?,
            "--volume" => volume = value("--volume")?.parse().context("--volume")?,
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            path => positional.push(PathBuf::from(path)),
        }
    }

    if serve {
        if !positional.is_empty() {
            bail!("--serve takes no file arguments");
        }
        return Ok(CliArgs {
            command: Command::Serve,
            config,
        });
    }

    let [input, output]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected an input and an output file"))?;
    Ok(CliArgs {
        command: Command::Stretch(StretchArgs {
            input,
            output,
            ratio,
            semitones,
            workers,
            pan: pan.clamp(-1.0, 1.0),
            volume,
        }),
        config,
    })
}

fn run_stretch(args: StretchArgs, mut config: WarpConfig) -> Result<()> {
    if let Some(workers) = args.workers {
        config.processing.max_workers = workers;
        config.validate();
    }

    let input = read_wav(&args.input).with_context(|| format!("reading {:?}", args.input))?;
    log::info!(
        "Loaded {:?}: {:.2}s, {} ch at {} Hz",
        args.input,
        input.duration_secs(),
        input.channel_count(),
        input.sample_rate()
    );

    let params = StretchParameters::from_semitones(args.ratio, args.semitones);
    params.validate()?;
    let envelope = EnvelopeSettings {
        volume_curves: Vec::new(),
        default_volume: args.volume,
        pan_value: args.pan,
    };

    let selector = ProcessingStrategySelector::from_config(StretchEngine::signalsmith(), &config)?;
    let job = ProcessingJob::new(input, params).with_envelope(envelope);

    let reported = Cell::new(0u32);
    let processed = selector.process(job, &|percent| {
        let step = (percent / 10.0) as u32;
        if step > reported.get() {
            reported.set(step);
            log::info!("{:.0}%", percent);
        }
    })?;

    write_wav(&args.output, &processed.segment).with_context(|| format!("writing {:?}", args.output))?;
    log::info!(
        "Wrote {:.2}s via {} to {:?}",
        processed.segment.duration_secs(),
        processed.strategy,
        args.output
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let config_path = cli
        .config
        .unwrap_or_else(|| default_config_path("config.yaml"));
    let config = WarpConfig::load(&config_path);

    match cli.command {
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        Command::Serve => {
            log::info!("Serving worker requests on stdin/stdout");
            let stdin = io::stdin();
            let stdout = io::stdout();
            serve_lines(&StretchEngine::signalsmith(), stdin.lock(), stdout.lock())?;
            Ok(())
        }
        Command::Stretch(args) => run_stretch(args, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_stretch() {
        let cli = parse_args(&args(&[
            "in.wav", "out.wav", "--ratio", "1.5", "--semitones", "-3", "--pan", "2", "--workers", "4",
        ]))
        .unwrap();

        match cli.command {
            Command::Stretch(a) => {
                assert_eq!(a.input, PathBuf::from("in.wav"));
                assert_eq!(a.output, PathBuf::from("out.wav"));
                assert_eq!(a.ratio, 1.5);
                assert_eq!(a.semitones, -3.0);
                assert_eq!(a.pan, 1.0);
                assert_eq!(a.workers, Some(4));
                assert_eq!(a.volume, 1.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_parse_serve() {
        let cli = parse_args(&args(&["--serve", "--config", "warp.yaml"])).unwrap();
        assert_eq!(cli.command, Command::Serve);
        assert_eq!(cli.config, Some(PathBuf::from("warp.yaml")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["only.wav"])).is_err());
        assert!(parse_args(&args(&["a.wav", "b.wav", "--ratio"])).is_err());
        assert!(parse_args(&args(&["a.wav", "b.wav", "--ratio", "fast"])).is_err());
        assert!(parse_args(&args(&["a.wav", "b.wav", "--bogus"])).is_err());
        assert!(parse_args(&args(&["--serve", "a.wav"])).is_err());
    }
}
