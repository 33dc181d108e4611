//! Wires a vault's collaborators together from its configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vigil_agents::ProcessCommandProbe;
use vigil_core::{
    config_path_for_vault, load_config_or_default, ConfigError, RunStore, StoreError, Validate,
    ValidationIssue, ValidationLevel, VigilConfig,
};
use vigil_forge::{CodeHost, GhCodeHost};
use vigil_git::MergeStateClassifier;
use vigil_mux::{dashboard_session_name, normalize_vault_path, Multiplexer, TmuxCli};

use crate::actions::ActionContext;
use crate::reconcile::{LayoutSettings, Reconciler};
use crate::refresh::RowBuilder;
use crate::vault::VaultStore;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid config at {path}: {}", render_issues(.issues))]
    Invalid {
        path: PathBuf,
        issues: Vec<ValidationIssue>,
    },
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{} ({})", issue.message, issue.code))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceOptions {
    pub vault: PathBuf,
    pub config: Option<PathBuf>,
    /// tmux server socket name (`tmux -L`).
    pub socket: Option<String>,
}

/// One vault with its config and live collaborators.
#[derive(Clone)]
pub struct Workspace {
    pub vault: PathBuf,
    pub config: VigilConfig,
    pub store: Arc<VaultStore>,
    pub mux: Arc<dyn Multiplexer>,
    pub forge: Arc<dyn CodeHost>,
    pub dashboard: String,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("vault", &self.vault)
            .field("dashboard", &self.dashboard)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    pub fn open(options: &WorkspaceOptions) -> Result<Self, WorkspaceError> {
        let vault = normalize_vault_path(&options.vault);
        let config_path = options
            .config
            .clone()
            .unwrap_or_else(|| config_path_for_vault(&vault));
        let config = load_config_or_default(&config_path)?;
        check_config(&config_path, &config)?;

        let mut tmux = TmuxCli::default();
        if let Some(socket) = &options.socket {
            tmux = tmux.with_socket(socket.clone());
        }
        Ok(Self::with_collaborators(
            vault,
            config,
            Arc::new(tmux),
            Arc::new(GhCodeHost::default()),
        ))
    }

    pub fn with_collaborators(
        vault: PathBuf,
        config: VigilConfig,
        mux: Arc<dyn Multiplexer>,
        forge: Arc<dyn CodeHost>,
    ) -> Self {
        let dashboard = dashboard_session_name(&config.session.prefix, &vault);
        Self {
            store: Arc::new(VaultStore::new(vault.clone())),
            vault,
            config,
            mux,
            forge,
            dashboard,
        }
    }

    fn run_store(&self) -> Arc<dyn RunStore> {
        self.store.clone()
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.mux.clone(),
            self.run_store(),
            self.dashboard.clone(),
            LayoutSettings::from_config(self.vault.clone(), &self.config.session),
        )
    }

    pub fn row_builder(&self) -> RowBuilder {
        RowBuilder::new(
            self.run_store(),
            MergeStateClassifier::new(
                self.config.git.base_branch.clone(),
                self.config.git.merged_before_start,
            ),
        )
        .with_forge(self.forge.clone())
    }

    pub fn actions(&self) -> ActionContext {
        ActionContext::new(
            self.run_store(),
            self.mux.clone(),
            self.forge.clone(),
            Arc::new(ProcessCommandProbe),
            self.dashboard.clone(),
            self.config.clone(),
        )
    }
}

/// Warnings are logged; any error-level issue rejects the config.
pub fn check_config(path: &Path, config: &VigilConfig) -> Result<(), WorkspaceError> {
    let issues = config.validate();
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        tracing::warn!(code = issue.code, "{}", issue.message);
    }
    let errors: Vec<ValidationIssue> = issues
        .into_iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(WorkspaceError::Invalid {
            path: path.to_path_buf(),
            issues: errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use vigil_mux::FakeMux;

    use super::*;

    #[test]
    fn open_reads_vault_config_and_derives_dashboard_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join(".vigil");
        fs::create_dir_all(&config_dir).expect("config dir");
        fs::write(
            config_dir.join("config.toml"),
            "[session]\nprefix = \"ops\"\n[git]\nbase_branch = \"trunk\"\n",
        )
        .expect("write config");

        let workspace = Workspace::open(&WorkspaceOptions {
            vault: dir.path().to_path_buf(),
            ..WorkspaceOptions::default()
        })
        .expect("open");
        assert_eq!(workspace.config.git.base_branch, "trunk");
        assert!(workspace.dashboard.starts_with("ops-"));
        assert_eq!(workspace.dashboard.len(), "ops-".len() + 8);
    }

    #[test]
    fn invalid_config_is_rejected_with_codes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vigil.toml");
        fs::write(&path, "[session]\nchat_percent = 0\n").expect("write config");

        let err = Workspace::open(&WorkspaceOptions {
            vault: dir.path().to_path_buf(),
            config: Some(path),
            socket: None,
        })
        .expect_err("chat_percent out of range");
        assert!(err.to_string().contains("session.chat_percent.range"), "{err}");
    }

    #[test]
    fn same_vault_always_maps_to_same_dashboard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let build = || {
            Workspace::with_collaborators(
                normalize_vault_path(dir.path()),
                VigilConfig::default(),
                Arc::new(FakeMux::new()),
                Arc::new(GhCodeHost::default()),
            )
        };
        assert_eq!(build().dashboard, build().dashboard);
        assert_eq!(build().reconciler().dashboard(), build().dashboard);
    }
}
