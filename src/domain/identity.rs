use std::path::PathBuf;

/// The real user an installation is performed for.
///
/// When the process runs elevated through sudo this is the invoking user,
/// not root, so user-level tooling and files resolve against their home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    /// Whether this process itself runs with uid 0.
    pub elevated: bool,
}

impl Identity {
    /// Whether user-level commands must drop privileges to reach `user`.
    pub fn needs_privilege_drop(&self) -> bool {
        self.elevated && self.uid != 0
    }
}
