mod detect;
mod error;
mod fs_utils;
mod journal;
mod layout;
mod orchestrator;
mod services;
mod steps;
mod system;
mod toolbox;

pub use detect::{locate_install_root, missing_entry_files, read_database_dsn, read_installed_version};
pub use error::{classify_error, ErrorKind, UpgradeError};
pub use fs_utils::{clear_dir_contents, owner_of, remove_file_if_exists};
pub use journal::{append_journal_entry, current_unix_timestamp, read_journal, JournalEntry};
pub use layout::{default_work_root, RunLayout, DEFAULT_WORK_ROOT};
pub use orchestrator::{
    run_upgrade, BackupSet, RunOutcome, RunStatus, Step, StepRecord, UpgradeEvent, UpgradeReport,
    UpgradeRequest, UpgradeRun, DOWNLOAD_ATTEMPTS, UPGRADE_STEPS,
};
pub use services::{
    action_for_unit, is_php_runtime_unit, is_web_server_unit, plan_service_actions,
    PlannedServiceAction, ServiceSelection,
};
pub use system::SystemToolbox;
pub use toolbox::{FileOwner, ServiceAction, Toolbox};
