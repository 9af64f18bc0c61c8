// Identity of the person and machine doing checkouts.
// Machine ID format: "machine-<uuid>", used only when no host name is available.

use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use crate::storage::IdentityConfig;

const MACHINE_ID_FILE: &str = "machine_id.txt";
const MACHINE_ID_PREFIX: &str = "machine-";

/// Optional file in a local collection folder that overrides the identity,
/// one value per line: user, machine, first name, surname.
pub const IMPERSONATION_FILE: &str = "impersonate.txt";

/// Error type for identity operations
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid machine ID format: {0}")]
    InvalidFormat(String),
}

/// The user and machine a checkout is attributed to.
///
/// Passed explicitly to every engine; there is no ambient current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Email address. Empty when the user has not registered.
    pub user: String,
    pub machine: String,
    pub first_name: String,
    pub surname: String,
}

impl Identity {
    pub fn new(user: impl Into<String>, machine: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            machine: machine.into(),
            first_name: String::new(),
            surname: String::new(),
        }
    }

    pub fn with_names(mut self, first_name: impl Into<String>, surname: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.surname = surname.into();
        self
    }

    /// Build from configuration; the machine comes from the config override,
    /// then the host name, then a persisted id under `data_dir`.
    pub fn from_config(config: &IdentityConfig, data_dir: &Path) -> Result<Self, IdentityError> {
        let machine = match config.machine.as_deref().filter(|m| !m.trim().is_empty()) {
            Some(machine) => machine.trim().to_string(),
            None => match host_name() {
                Some(host) => host,
                None => get_or_create_machine_id_at(data_dir)?,
            },
        };
        Ok(Self::new(config.user.trim(), machine)
            .with_names(config.first_name.trim(), config.surname.trim()))
    }

    /// Apply `impersonate.txt` from a collection folder, if present.
    pub fn with_impersonation(self, collection_folder: &Path) -> Result<Self, IdentityError> {
        let path = collection_folder.join(IMPERSONATION_FILE);
        if !path.exists() {
            return Ok(self);
        }
        let content = fs::read_to_string(&path)?;
        let mut lines = content.lines().map(str::trim);
        let mut next_or = |current: String| match lines.next() {
            Some(line) if !line.is_empty() => line.to_string(),
            _ => current,
        };
        let user = next_or(self.user);
        let machine = next_or(self.machine);
        let first_name = next_or(self.first_name);
        let surname = next_or(self.surname);
        tracing::info!(%user, %machine, "impersonating from {}", path.display());
        Ok(Self {
            user,
            machine,
            first_name,
            surname,
        })
    }

    pub fn is_registered(&self) -> bool {
        !self.user.is_empty()
    }

    /// "First Surname", or the email when no name is known.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.surname);
        let name = name.trim();
        if name.is_empty() {
            self.user.clone()
        } else {
            name.to_string()
        }
    }
}

fn host_name() -> Option<String> {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

/// Get or create machine ID at the specified path.
/// Creates a new machine ID file if it doesn't exist.
///
/// # Arguments
/// * `path` - Directory path where machine_id.txt is stored
///
/// # Returns
/// Machine ID string in format "machine-<uuid>"
pub fn get_or_create_machine_id_at(path: &Path) -> Result<String, IdentityError> {
    let machine_id_path = path.join(MACHINE_ID_FILE);

    if machine_id_path.exists() {
        let content = fs::read_to_string(&machine_id_path)?;
        let machine_id = content.trim().to_string();

        if machine_id.starts_with(MACHINE_ID_PREFIX) {
            return Ok(machine_id);
        } else {
            return Err(IdentityError::InvalidFormat(machine_id));
        }
    }

    let machine_id = format!("{}{}", MACHINE_ID_PREFIX, Uuid::new_v4());

    if !path.exists() {
        fs::create_dir_all(path)?;
    }

    let mut file = fs::File::create(&machine_id_path)?;
    writeln!(file, "{}", machine_id)?;

    Ok(machine_id)
}
