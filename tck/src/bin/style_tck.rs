// Style-TCK command line
//
// Usage:
//   style-tck verify tck/fixtures --input-dir tck/inputs --junit report.xml
//   style-tck generate tck/fixtures/bond-harmonic.yaml --input-dir tck/inputs

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use style_tck::config::HarnessConfig;
use style_tck::fixtures::{regenerate_file, Generated, MatrixRunner, ReferenceEngineFactory};

#[derive(Parser, Debug)]
#[command(name = "style-tck")]
#[command(about = "Differential regression harness for interaction styles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay fixtures and compare against their reference values
    Verify {
        /// Fixture files or directories of fixtures
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        dirs: Dirs,

        /// Print error statistics for every group, not only failing ones
        #[arg(long)]
        stats: bool,

        /// Skip the concurrent backend scenarios
        #[arg(long)]
        serial_only: bool,

        /// Worker count of the concurrent backend
        #[arg(long, env = "STYLE_TCK_THREADS", default_value_t = style_tck::config::DEFAULT_THREADS)]
        threads: usize,

        /// Write a JUnit XML report
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Write a JSON report
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Regenerate a fixture's reference values from the engine
    Generate {
        /// Fixture used as template
        fixture: PathBuf,

        /// Output path (defaults to rewriting the template in place)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        dirs: Dirs,
    },
}

#[derive(Args, Debug)]
struct Dirs {
    /// Directory holding the scenario scripts
    #[arg(long, env = "STYLE_TCK_INPUT_DIR", default_value = ".")]
    input_dir: PathBuf,

    /// Directory for restart, data and coefficient files
    #[arg(long, env = "STYLE_TCK_WORK_DIR")]
    work_dir: Option<PathBuf>,
}

impl Dirs {
    fn config(&self) -> Result<HarnessConfig> {
        let work_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        Ok(HarnessConfig::default()
            .with_input_dir(&self.input_dir)
            .with_work_dir(work_dir))
    }
}

fn run(cli: Cli) -> Result<bool> {
    let factory = ReferenceEngineFactory::new();

    match cli.command {
        Command::Verify {
            paths,
            dirs,
            stats,
            serial_only,
            threads,
            junit,
            json,
        } => {
            let mut config = dirs.config()?.with_stats(stats).with_threads(threads);
            if serial_only {
                config = config.serial_only();
            }

            let report = MatrixRunner::new(&factory, &config).run_paths(&paths)?;
            report.print_summary(config.print_stats);
            if let Some(path) = junit {
                report.write_junit(&path)?;
                info!("JUnit report written to {}", path.display());
            }
            if let Some(path) = json {
                report.write_json(&path)?;
                info!("JSON report written to {}", path.display());
            }
            Ok(report.all_passed())
        }
        Command::Generate {
            fixture,
            output,
            dirs,
        } => {
            let config = dirs.config()?;
            match regenerate_file(&fixture, output.as_deref(), &factory, &config)? {
                Generated::Written(path) => info!("Generated {}", path.display()),
                Generated::Skipped(missing) => {
                    let list: Vec<String> = missing.iter().map(|p| p.to_string()).collect();
                    info!("Skipped {}: missing {}", fixture.display(), list.join(", "));
                }
            }
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
