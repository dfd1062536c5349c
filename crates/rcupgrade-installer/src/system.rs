use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rcupgrade_core::{ArchiveType, DatabaseDsn, DbDriver, INSTALLER_SCRIPT};
use tracing::debug;

use crate::fs_utils::{part_path_for, remove_file_if_exists};
use crate::toolbox::{FileOwner, ServiceAction, Toolbox};

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs the real external tools on the host.
pub struct SystemToolbox {
    http: reqwest::blocking::Client,
}

impl SystemToolbox {
    pub fn new() -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("rcupgrade/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl Toolbox for SystemToolbox {
    fn tool_available(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }

    fn create_archive(&self, source_dir: &Path, dest: &Path) -> Result<()> {
        let parent = source_dir
            .parent()
            .ok_or_else(|| anyhow!("cannot archive filesystem root {}", source_dir.display()))?;
        let name = source_dir
            .file_name()
            .ok_or_else(|| anyhow!("cannot derive directory name of {}", source_dir.display()))?;
        run_command(
            Command::new("tar")
                .arg("-czf")
                .arg(dest)
                .arg("-C")
                .arg(parent)
                .arg(name),
            "failed to archive installation code",
        )
    }

    fn extract_archive(
        &self,
        archive: &Path,
        archive_type: ArchiveType,
        dest_dir: &Path,
    ) -> Result<()> {
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        match archive_type {
            ArchiveType::Zip => run_command(
                Command::new("unzip")
                    .arg("-q")
                    .arg(archive)
                    .arg("-d")
                    .arg(dest_dir),
                "failed to extract zip archive",
            ),
            ArchiveType::TarGz | ArchiveType::TarBz2 | ArchiveType::TarXz => run_command(
                Command::new("tar")
                    .arg("-xf")
                    .arg(archive)
                    .arg("-C")
                    .arg(dest_dir),
                "failed to extract tar archive",
            ),
        }
    }

    fn dump_database(&self, dsn: &DatabaseDsn, dest: &Path) -> Result<()> {
        match dsn.driver {
            DbDriver::Mysql => run_command(
                &mut build_mysqldump_command(dsn, dest),
                "mysqldump failed",
            ),
            DbDriver::Postgres => {
                run_command(&mut build_pg_dump_command(dsn, dest), "pg_dump failed")
            }
            DbDriver::Sqlite => {
                fs::copy(&dsn.database, dest).with_context(|| {
                    format!(
                        "failed to copy sqlite database {} to {}",
                        dsn.database,
                        dest.display()
                    )
                })?;
                Ok(())
            }
        }
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let part_path = part_path_for(dest);
        let result = download_to(&self.http, url, &part_path);
        if let Err(err) = result {
            if let Err(cleanup_err) = remove_file_if_exists(&part_path) {
                debug!(
                    path = %part_path.display(),
                    error = %cleanup_err,
                    "failed to remove partial download"
                );
            }
            return Err(err);
        }

        remove_file_if_exists(dest)
            .with_context(|| format!("failed to replace {}", dest.display()))?;
        fs::rename(&part_path, dest).with_context(|| {
            format!(
                "failed to move downloaded release into place: {}",
                dest.display()
            )
        })
    }

    fn run_installer(&self, release_dir: &Path, install_root: &Path) -> Result<()> {
        let mut command = build_installer_command(release_dir, install_root);
        debug!(command = %describe_command(&command), "running vendor installer");

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("vendor installer failed to start")?;
        // older installers ask for confirmation instead of honouring -y
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(b"y\n") {
                debug!(error = %err, "vendor installer closed stdin before confirmation");
            }
        }
        let output = child
            .wait_with_output()
            .context("failed waiting for vendor installer")?;
        check_output(output, "vendor installer failed")
    }

    fn chown_tree(&self, path: &Path, owner: FileOwner) -> Result<()> {
        run_command(
            Command::new("chown")
                .arg("-R")
                .arg(format!("{}:{}", owner.uid, owner.gid))
                .arg(path),
            "failed to restore ownership",
        )
    }

    fn active_services(&self) -> Result<Vec<String>> {
        let mut command = Command::new("systemctl");
        command
            .arg("list-units")
            .arg("--type=service")
            .arg("--state=active")
            .arg("--no-legend")
            .arg("--plain")
            .arg("--no-pager");
        debug!(command = %describe_command(&command), "listing active services");
        let output = command
            .output()
            .context("failed to list services: systemctl failed to start")?;
        if !output.status.success() {
            return Err(anyhow!(
                "failed to list services: status={} stderr='{}'",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(parse_service_units(&String::from_utf8_lossy(&output.stdout)))
    }

    fn manage_service(&self, unit: &str, action: ServiceAction) -> Result<()> {
        let systemctl = run_command(
            Command::new("systemctl").arg(action.as_str()).arg(unit),
            &format!("systemctl {} {unit} failed", action.as_str()),
        );
        if systemctl.is_ok() {
            return Ok(());
        }

        run_command(
            Command::new("service").arg(unit).arg(action.as_str()),
            &format!("service {unit} {} failed", action.as_str()),
        )
        .map_err(|fallback_err| match systemctl {
            Err(systemctl_err) => anyhow!("{systemctl_err}; fallback: {fallback_err}"),
            Ok(()) => fallback_err,
        })
    }
}

fn download_to(http: &reqwest::blocking::Client, url: &str, out_path: &Path) -> Result<()> {
    debug!(url, path = %out_path.display(), "downloading release");
    let mut response = http
        .get(url)
        .send()
        .with_context(|| format!("request to {url} failed"))?
        .error_for_status()
        .with_context(|| format!("download of {url} was rejected"))?;

    let mut file = fs::File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    io::copy(&mut response, &mut file)
        .with_context(|| format!("failed to write download to {}", out_path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", out_path.display()))?;
    Ok(())
}

pub(crate) fn build_mysqldump_command(dsn: &DatabaseDsn, dest: &Path) -> Command {
    let mut command = Command::new("mysqldump");
    command
        .arg("--single-transaction")
        .arg("--routines")
        .arg("--no-tablespaces")
        .arg(format!("--result-file={}", dest.display()));
    if let Some(socket) = dsn.socket_path() {
        command.arg(format!("--socket={socket}"));
    } else if !dsn.host.is_empty() {
        command.arg(format!("--host={}", dsn.host));
    }
    if let Some(port) = dsn.port {
        command.arg(format!("--port={port}"));
    }
    if !dsn.user.is_empty() {
        command.arg(format!("--user={}", dsn.user));
    }
    if !dsn.password.is_empty() {
        command.env("MYSQL_PWD", &dsn.password);
    }
    command.arg(&dsn.database);
    command
}

pub(crate) fn build_pg_dump_command(dsn: &DatabaseDsn, dest: &Path) -> Command {
    let mut command = Command::new("pg_dump");
    command.arg("--no-password").arg("--file").arg(dest);
    if let Some(socket) = dsn.socket_path() {
        command.arg("--host").arg(pg_socket_dir(socket));
    } else if !dsn.host.is_empty() {
        command.arg("--host").arg(&dsn.host);
    }
    if let Some(port) = dsn.port {
        command.arg("--port").arg(port.to_string());
    }
    if !dsn.user.is_empty() {
        command.arg("--username").arg(&dsn.user);
    }
    if !dsn.password.is_empty() {
        command.env("PGPASSWORD", &dsn.password);
    }
    command.arg(&dsn.database);
    command
}

// pg_dump takes the socket directory; a full `.s.PGSQL.<port>` path is cut back to it
fn pg_socket_dir(socket: &str) -> &Path {
    let path = Path::new(socket);
    let is_socket_file = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(".s.PGSQL."));
    match path.parent() {
        Some(parent) if is_socket_file => parent,
        _ => path,
    }
}

pub(crate) fn build_installer_command(release_dir: &Path, install_root: &Path) -> Command {
    let mut command = Command::new("php");
    command
        .arg(INSTALLER_SCRIPT)
        .arg("-y")
        .arg(install_root)
        .current_dir(release_dir);
    command
}

pub(crate) fn parse_service_units(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|unit| unit.strip_suffix(".service"))
        .map(str::to_string)
        .collect()
}

/// Program and arguments for logs. Secrets go through the environment, never argv.
pub(crate) fn describe_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(
        command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    debug!(command = %describe_command(command), "running external command");
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    check_output(output, context_message)
}

fn check_output(output: Output, context_message: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}
