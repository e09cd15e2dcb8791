use std::fs;
use std::os::unix::fs::{chown, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::template::render;
use crate::domain::{DomainError, Identity, TemplateVars};

/// Creates directories and rendered files owned by the invoking user.
///
/// When the installer runs elevated, everything it creates under the user's
/// home is handed back to the user so later unprivileged runs can manage it.
pub struct UserFiles {
    identity: Identity,
}

impl UserFiles {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    fn hand_over(&self, path: &Path) -> Result<(), DomainError> {
        if self.identity.needs_privilege_drop() {
            chown(path, Some(self.identity.uid), Some(self.identity.gid))?;
            debug!(path = ?path, user = %self.identity.user, "Ownership transferred");
        }
        Ok(())
    }

    /// Create `path` and any missing ancestors. Returns the directories that
    /// were created, outermost first.
    pub fn ensure_dir(&self, path: &Path) -> Result<Vec<PathBuf>, DomainError> {
        let missing: Vec<PathBuf> = path
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .map(Path::to_path_buf)
            .collect();

        fs::create_dir_all(path)?;

        let created: Vec<PathBuf> = missing.into_iter().rev().collect();
        for dir in &created {
            self.hand_over(dir)?;
        }
        if !created.is_empty() {
            info!(path = ?path, created = created.len(), "Directory created");
        }
        Ok(created)
    }

    /// Render `template` into `output` and set its permission bits.
    pub fn render_to_file(
        &self,
        template: &Path,
        output: &Path,
        vars: &TemplateVars,
        mode: u32,
    ) -> Result<(), DomainError> {
        let source = fs::read_to_string(template).map_err(|e| {
            DomainError::MissingDependency {
                what: format!("template {}", template.display()),
                hint: e.to_string(),
            }
        })?;
        let rendered = render(&source, vars)?;

        if let Some(parent) = output.parent() {
            self.ensure_dir(parent)?;
        }
        fs::write(output, rendered)?;
        fs::set_permissions(output, fs::Permissions::from_mode(mode))?;
        self.hand_over(output)?;

        info!(template = ?template, output = ?output, mode = %format!("{:o}", mode), "File generated");
        Ok(())
    }
}
