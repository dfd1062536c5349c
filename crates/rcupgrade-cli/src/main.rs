mod logging;
mod render;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use rcupgrade_installer::{classify_error, run_upgrade, SystemToolbox};
use tracing::debug;

use crate::logging::init_logging;
use crate::render::{format_report_lines, StepProgress, TerminalRenderer};
use crate::settings::{load_file_settings, resolve_request, CliOverrides};

#[derive(Parser, Debug)]
#[command(name = "rcupgrade")]
#[command(
    about = "Back up and upgrade a Roundcube webmail installation in place",
    long_about = None
)]
struct Cli {
    /// Installation directory; well-known locations are searched when omitted.
    #[arg(long, env = "RC_PATH", value_name = "PATH")]
    rc_path: Option<PathBuf>,
    /// Release to install.
    #[arg(long = "version", env = "RC_VERSION", value_name = "X.Y.Z")]
    target_version: Option<String>,
    #[arg(long, env = "RC_SRC_URL", value_name = "URL")]
    src_url: Option<String>,
    /// Expected SHA-256 of the release archive. Pass '' to skip verification.
    #[arg(long, env = "RC_SHA256", value_name = "HEX")]
    sha256: Option<String>,
    /// Root under which each run creates its timestamped working directory.
    #[arg(long, env = "RCUPGRADE_WORK_DIR", value_name = "PATH")]
    work_dir: Option<PathBuf>,
    /// Settings file [default: /etc/rcupgrade.toml, if present]
    #[arg(long, env = "RCUPGRADE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
    /// Service unit to restart or reload afterwards; repeatable.
    #[arg(long = "service", value_name = "UNIT")]
    services: Vec<String>,
    /// Detect, check versions and tools, then stop without changing anything.
    #[arg(long)]
    dry_run: bool,
    #[arg(long, env = "DEBUG")]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            rc_path: self.rc_path.clone(),
            version: self.target_version.clone(),
            src_url: self.src_url.clone(),
            sha256: self.sha256.clone(),
            work_dir: self.work_dir.clone(),
            services: self.services.clone(),
            dry_run: self.dry_run,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let renderer = TerminalRenderer::current();

    match run(&cli, renderer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = classify_error(&err);
            debug!(kind = kind.as_str(), "exiting with error");
            renderer.print_error(&format!("{err:#}"));
            ExitCode::from(kind.exit_code())
        }
    }
}

fn run(cli: &Cli, renderer: TerminalRenderer) -> Result<()> {
    let file = load_file_settings(cli.config.as_deref())?;
    let request = resolve_request(cli.overrides(), file)?;
    debug!(
        target_version = %request.target_version,
        source_url = %request.source_url,
        work_root = %request.work_root.display(),
        "resolved settings"
    );

    let toolbox = SystemToolbox::new()?;
    renderer.print_section(&format!("rcupgrade {}", request.target_version));

    let mut progress = StepProgress::new(renderer);
    let run = run_upgrade(&request, &toolbox, |event| progress.handle(event));
    progress.finish();

    renderer.print_lines(&format_report_lines(&run.report, renderer.style()));
    run.outcome.map(|_| ())
}

#[cfg(test)]
mod tests;
