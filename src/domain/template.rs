//! Placeholder substitution for launcher and desktop-entry templates.
//!
//! The placeholder set is closed: `${USER_HOME}`, `${SCRIPT_DIR}` and
//! `${ENV_NAME}`. Substituted text is never re-scanned or evaluated. Any
//! other `${...}` token, an unterminated token or a placeholder without a
//! value is an error. Plain `$NAME` shell references pass through untouched.

use std::collections::BTreeMap;
use std::fmt;

use super::error::DomainError;

/// The documented placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Placeholder {
    UserHome,
    ScriptDir,
    EnvName,
}

impl Placeholder {
    pub const ALL: [Placeholder; 3] = [
        Placeholder::UserHome,
        Placeholder::ScriptDir,
        Placeholder::EnvName,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Placeholder::UserHome => "USER_HOME",
            Placeholder::ScriptDir => "SCRIPT_DIR",
            Placeholder::EnvName => "ENV_NAME",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.token() == token)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}}}", self.token())
    }
}

/// Values available to a render call.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<Placeholder, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, placeholder: Placeholder, value: impl Into<String>) -> Self {
        self.values.insert(placeholder, value.into());
        self
    }

    fn lookup(&self, placeholder: Placeholder) -> Result<&str, DomainError> {
        match self.values.get(&placeholder) {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(DomainError::Template(format!(
                "{} resolved to an empty value",
                placeholder
            ))),
            None => Err(DomainError::Template(format!(
                "{} has no value",
                placeholder
            ))),
        }
    }
}

/// Substitute every placeholder in `template`.
pub fn render(template: &str, vars: &TemplateVars) -> Result<String, DomainError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            DomainError::Template(format!(
                "unterminated placeholder near `{}`",
                after.chars().take(24).collect::<String>()
            ))
        })?;
        let token = &after[..end];
        let placeholder = Placeholder::from_token(token).ok_or_else(|| {
            DomainError::Template(format!("unknown placeholder ${{{}}}", token))
        })?;
        out.push_str(vars.lookup(placeholder)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_vars() -> TemplateVars {
        TemplateVars::new()
            .with(Placeholder::UserHome, "/home/ana")
            .with(Placeholder::ScriptDir, "/opt/dictate")
            .with(Placeholder::EnvName, "fasterwhisper")
    }

    #[test]
    fn test_render_all_placeholders() {
        let template = "#!/bin/bash\ncd \"${SCRIPT_DIR}\"\nconda activate ${ENV_NAME}\nexport LOGS=${USER_HOME}/Music\n";
        let out = render(template, &full_vars()).unwrap();

        assert!(!out.contains("${"));
        assert!(out.contains("cd \"/opt/dictate\""));
        assert!(out.contains("conda activate fasterwhisper"));
        assert!(out.contains("/home/ana/Music"));
    }

    #[test]
    fn test_missing_variable_is_error() {
        let vars = TemplateVars::new().with(Placeholder::ScriptDir, "/opt/dictate");
        let err = render("Exec=${SCRIPT_DIR}/run ${ENV_NAME}", &vars).unwrap_err();
        assert!(err.to_string().contains("${ENV_NAME}"));
    }

    #[test]
    fn test_empty_value_is_error() {
        let vars = full_vars().with(Placeholder::UserHome, "");
        assert!(render("Path=${USER_HOME}", &vars).is_err());
    }

    #[test]
    fn test_unknown_and_unterminated_tokens() {
        assert!(matches!(
            render("x=${PATH}", &full_vars()),
            Err(DomainError::Template(_))
        ));
        assert!(matches!(
            render("x=${SCRIPT_DIR", &full_vars()),
            Err(DomainError::Template(_))
        ));
    }

    #[test]
    fn test_substituted_text_not_rescanned() {
        let vars = full_vars().with(Placeholder::ScriptDir, "/tmp/${ENV_NAME}");
        let out = render("${SCRIPT_DIR}", &vars).unwrap();
        assert_eq!(out, "/tmp/${ENV_NAME}");
    }

    #[test]
    fn test_plain_shell_variables_pass_through() {
        let out = render("echo $HOME $1", &full_vars()).unwrap();
        assert_eq!(out, "echo $HOME $1");
    }
}
