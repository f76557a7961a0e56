mod backup;
mod fs_utils;
mod install;
mod interpreter;
mod layout;
mod session;
mod state;
mod uninstall;
mod vars;

pub use backup::{archive_package_snapshot, synthesize_inverse, BackupManager};
pub use install::{install_package, probe_superuser, InstallStatus};
pub use interpreter::{execute_phase, PhaseContext};
pub use layout::{default_user_state_root, StateLayout};
pub use session::Session;
pub use state::{
    installed_names, is_installed, read_install_record, read_install_records,
    remove_install_record, write_install_record, ExecutedAction, InstalledRecord, StateLock,
};
pub use uninstall::{uninstall_package, UninstallStatus};
pub use vars::VarExpander;
