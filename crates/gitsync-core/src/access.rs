//! Access-control seam
//!
//! Role enforcement belongs to whatever fronts the engine. The engine only
//! asks an [`AccessControl`] before each operation and turns a denial into
//! [`Error::Forbidden`].

use std::collections::HashMap;
use std::fmt;

use crate::{Error, Result};

/// Operations the engine asks permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadFile,
    WriteFile,
    DeleteFile,
    ListFiles,
    ListRefs,
    CreateJob,
    ReadJob,
    ManageRepository,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadFile => "read files",
            Self::WriteFile => "write files",
            Self::DeleteFile => "delete files",
            Self::ListFiles => "list files",
            Self::ListRefs => "list refs",
            Self::CreateJob => "create jobs",
            Self::ReadJob => "read jobs",
            Self::ManageRepository => "manage repositories",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self::new(name, Role::Admin)
    }
}

/// Allow/deny decision for one caller, operation and repository.
pub trait AccessControl: Send + Sync {
    fn allows(&self, caller: &Caller, operation: Operation, repository: &str) -> bool;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn allows(&self, _caller: &Caller, _operation: Operation, _repository: &str) -> bool {
        true
    }
}

/// Minimum role per operation.
///
/// Viewers read and list, editors also write files and start jobs, and
/// only admins manage repository bindings.
#[derive(Debug, Clone)]
pub struct RoleBasedAccess {
    minimum: HashMap<Operation, Role>,
}

impl Default for RoleBasedAccess {
    fn default() -> Self {
        let minimum = HashMap::from([
            (Operation::ReadFile, Role::Viewer),
            (Operation::ListFiles, Role::Viewer),
            (Operation::ListRefs, Role::Viewer),
            (Operation::ReadJob, Role::Viewer),
            (Operation::WriteFile, Role::Editor),
            (Operation::DeleteFile, Role::Editor),
            (Operation::CreateJob, Role::Editor),
            (Operation::ManageRepository, Role::Admin),
        ]);
        Self { minimum }
    }
}

impl RoleBasedAccess {
    pub fn with_minimum(mut self, operation: Operation, role: Role) -> Self {
        self.minimum.insert(operation, role);
        self
    }
}

impl AccessControl for RoleBasedAccess {
    fn allows(&self, caller: &Caller, operation: Operation, _repository: &str) -> bool {
        self.minimum
            .get(&operation)
            .is_some_and(|minimum| caller.role >= *minimum)
    }
}

/// Ask `access` and map a denial to [`Error::Forbidden`].
pub fn authorize(
    access: &dyn AccessControl,
    caller: &Caller,
    operation: Operation,
    repository: &str,
) -> Result<()> {
    if access.allows(caller, operation, repository) {
        return Ok(());
    }
    tracing::warn!(caller = %caller.name, repository = %repository, %operation, "access denied");
    Err(Error::Forbidden {
        message: format!("{} may not {operation} in repository {repository}", caller.name),
    })
}
