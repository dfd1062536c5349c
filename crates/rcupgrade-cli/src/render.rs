use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use rcupgrade_installer::{RunStatus, Step, UpgradeEvent, UpgradeReport, UPGRADE_STEPS};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    output_style_for(
        std::env::var_os("NO_COLOR").is_some(),
        std::io::stdout().is_terminal(),
    )
}

pub(crate) fn output_style_for(no_color: bool, is_terminal: bool) -> OutputStyle {
    if no_color || !is_terminal {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn current() -> Self {
        Self {
            style: current_output_style(),
        }
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.style, title) {
            println!("{}", colorize(section_style(), &line));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn print_error(self, message: &str) {
        eprintln!("{}", render_status_line(self.style, "err", message));
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(format!("== {title} ==")),
    }
}

/// Prints step events as they arrive and spins while the download runs.
pub(crate) struct StepProgress {
    renderer: TerminalRenderer,
    spinner: Option<ProgressBar>,
}

impl StepProgress {
    pub(crate) fn new(renderer: TerminalRenderer) -> Self {
        Self {
            renderer,
            spinner: None,
        }
    }

    pub(crate) fn handle(&mut self, event: &UpgradeEvent) {
        if let UpgradeEvent::StepStarted {
            step: Step::DownloadRelease,
        } = event
        {
            self.start_spinner(Step::DownloadRelease.description());
            return;
        }

        let line = format_event_line(self.renderer.style(), event);
        match (&self.spinner, line) {
            (Some(spinner), Some(line)) => spinner.println(line),
            (None, Some(line)) => println!("{line}"),
            _ => {}
        }

        if matches!(
            event,
            UpgradeEvent::StepCompleted { .. } | UpgradeEvent::StepFailed { .. }
        ) {
            self.finish();
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn start_spinner(&mut self, label: &str) {
        if self.renderer.style() != OutputStyle::Rich {
            return;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed_precise}") {
            spinner.set_style(style.tick_chars("-=~* "));
        }
        spinner.set_message(label.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        self.spinner = Some(spinner);
    }
}

/// One status line per event; step starts and failures print nothing here.
pub(crate) fn format_event_line(style: OutputStyle, event: &UpgradeEvent) -> Option<String> {
    match event {
        UpgradeEvent::StepStarted { .. } | UpgradeEvent::StepFailed { .. } => None,
        UpgradeEvent::StepCompleted { step, path } => {
            let message = match path {
                Some(path) => format!("{}: {}", step.as_str(), path.display()),
                None => step.as_str().to_string(),
            };
            Some(render_status_line(style, "ok", &message))
        }
        UpgradeEvent::Warning { step, message } => Some(render_status_line(
            style,
            "warn",
            &format!("{}: {message}", step.as_str()),
        )),
        UpgradeEvent::Retrying {
            step,
            attempt,
            max_attempts,
            error,
        } => Some(render_status_line(
            style,
            "warn",
            &format!(
                "{}: attempt {attempt}/{max_attempts} failed, retrying: {error}",
                step.as_str()
            ),
        )),
    }
}

pub(crate) fn format_report_lines(report: &UpgradeReport, style: OutputStyle) -> Vec<String> {
    let root = report
        .install_root
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "installation".to_string());
    let current = report
        .current_version
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    let mut lines = Vec::new();
    let (status, summary) = match report.status {
        RunStatus::Upgraded => (
            "ok",
            format!(
                "upgraded {root} from {current} to {}",
                report
                    .installed_version
                    .as_ref()
                    .unwrap_or(&report.target_version)
            ),
        ),
        RunStatus::AlreadyCurrent => (
            "ok",
            format!(
                "{root} is already at {}; nothing to do",
                report.target_version
            ),
        ),
        RunStatus::DryRun => (
            "step",
            format!(
                "dry run: would upgrade {root} from {current} to {}",
                report.target_version
            ),
        ),
        RunStatus::Failed => (
            "err",
            format!(
                "upgrade to {} failed ({})",
                report.target_version,
                report.error_kind.unwrap_or("step")
            ),
        ),
    };
    lines.push(render_status_line(style, status, &summary));

    if report.status == RunStatus::DryRun {
        let remaining = UPGRADE_STEPS
            .iter()
            .skip_while(|step| **step != Step::Preflight)
            .skip(1);
        for step in remaining {
            lines.push(render_status_line(
                style,
                "step",
                &format!("would run {}: {}", step.as_str(), step.description()),
            ));
        }
    }

    if let Some(backup) = &report.backup {
        if let Some(path) = &backup.code_archive {
            lines.push(render_status_line(
                style,
                "step",
                &format!("code backup: {}", path.display()),
            ));
        }
        if let Some(path) = &backup.database_dump {
            lines.push(render_status_line(
                style,
                "step",
                &format!("database backup: {}", path.display()),
            ));
        }
    }
    if let Some(work_dir) = &report.work_dir {
        lines.push(render_status_line(
            style,
            "step",
            &format!("report: {}", work_dir.join("report.json").display()),
        ));
    }
    if !report.warnings.is_empty() {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("completed with {} warning(s)", report.warnings.len()),
        ));
    }
    lines
}
