//! File-backed [`RunStore`] over a vault directory:
//!
//! ```text
//! <vault>/issues/<issue-id>.md              frontmatter + body
//! <vault>/runs/<issue-id>/<run-id>/events.log
//! <vault>/runs/<issue-id>/<run-id>/run.toml  optional metadata
//! ```

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vigil_core::{
    parse_event_line, Event, Issue, IssueStatus, Run, RunQuery, RunRef, RunStore, StoreError,
};

pub const ISSUES_DIR: &str = "issues";
pub const RUNS_DIR: &str = "runs";
pub const EVENTS_FILE: &str = "events.log";
pub const RUN_META_FILE: &str = "run.toml";

const FRONTMATTER_FENCE: &str = "---";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Relative paths are resolved against the vault root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultStore {
    root: PathBuf,
}

impl VaultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn issues_dir(&self) -> PathBuf {
        self.root.join(ISSUES_DIR)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join(RUNS_DIR)
    }

    pub fn issue_path(&self, id: &str) -> PathBuf {
        self.issues_dir().join(format!("{id}.md"))
    }

    pub fn run_dir(&self, reference: &RunRef) -> PathBuf {
        self.runs_dir()
            .join(&reference.issue_id)
            .join(&reference.run_id)
    }

    pub fn events_path(&self, reference: &RunRef) -> PathBuf {
        self.run_dir(reference).join(EVENTS_FILE)
    }

    pub fn meta_path(&self, reference: &RunRef) -> PathBuf {
        self.run_dir(reference).join(RUN_META_FILE)
    }

    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        for dir in [self.issues_dir(), self.runs_dir()] {
            create_dir(&dir)?;
        }
        Ok(())
    }

    pub fn save_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        check_component(&issue.id, || StoreError::IssueNotFound {
            id: issue.id.clone(),
        })?;
        create_dir(&self.issues_dir())?;
        let path = self.issue_path(&issue.id);
        write_file(&path, &render_issue(issue))
    }

    pub fn save_run_meta(&self, reference: &RunRef, meta: &RunMeta) -> Result<(), StoreError> {
        let dir = self.run_dir(reference);
        create_dir(&dir)?;
        let path = dir.join(RUN_META_FILE);
        let contents = toml::to_string_pretty(meta).map_err(|err| StoreError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;
        write_file(&path, &contents)
    }

    fn load_run(&self, reference: RunRef) -> Result<Run, StoreError> {
        let events_path = self.events_path(&reference);
        if !events_path.is_file() {
            return Err(StoreError::RunNotFound { reference });
        }
        let contents = read_file(&events_path)?;
        let mut run = Run::new(reference);
        run.events = parse_event_log(&events_path, &contents);

        let meta_path = self.meta_path(&run.reference);
        if meta_path.is_file() {
            let raw = read_file(&meta_path)?;
            let meta: RunMeta = toml::from_str(&raw).map_err(|err| StoreError::Parse {
                path: meta_path.clone(),
                message: err.to_string(),
            })?;
            run.branch = meta.branch;
            run.worktree_path = meta.worktree.map(|path| {
                if path.is_absolute() {
                    path
                } else {
                    self.root.join(path)
                }
            });
            run.agent = meta.agent;
            run.session_name = meta.session;
            run.window_id = meta.window_id;
        }
        Ok(run)
    }

    fn load_issue_file(&self, path: &Path, id: &str) -> Result<Issue, StoreError> {
        let contents = read_file(path)?;
        Ok(parse_issue(id, &contents))
    }
}

impl RunStore for VaultStore {
    fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>, StoreError> {
        let issue_dirs = match &query.issue_id {
            Some(issue_id) => vec![self.runs_dir().join(issue_id)],
            None => sorted_dirs(&self.runs_dir())?,
        };

        let mut runs = Vec::new();
        for issue_dir in issue_dirs {
            let Some(issue_id) = file_name(&issue_dir) else {
                continue;
            };
            for run_dir in sorted_dirs(&issue_dir)? {
                let Some(run_id) = file_name(&run_dir) else {
                    continue;
                };
                match self.load_run(RunRef::new(issue_id.clone(), run_id)) {
                    Ok(run) => runs.push(run),
                    Err(StoreError::RunNotFound { .. }) => {}
                    Err(err) => {
                        tracing::warn!(path = %run_dir.display(), error = %err, "skipping unreadable run");
                    }
                }
            }
        }
        Ok(query.apply(runs))
    }

    fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        let dir = self.issues_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = read_dir(&dir)?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();

        let mut issues = Vec::new();
        for path in paths {
            let Some(id) = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()) else {
                continue;
            };
            match self.load_issue_file(&path, &id) {
                Ok(issue) => issues.push(issue),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable issue");
                }
            }
        }
        Ok(issues)
    }

    fn resolve_issue(&self, id: &str) -> Result<Issue, StoreError> {
        let not_found = || StoreError::IssueNotFound { id: id.to_string() };
        check_component(id, not_found)?;
        let path = self.issue_path(id);
        if !path.is_file() {
            return Err(not_found());
        }
        self.load_issue_file(&path, id)
    }

    fn get_run(&self, reference: &RunRef) -> Result<Run, StoreError> {
        let not_found = || StoreError::RunNotFound {
            reference: reference.clone(),
        };
        check_component(&reference.issue_id, not_found)?;
        check_component(&reference.run_id, not_found)?;
        self.load_run(reference.clone())
    }

    fn append_event(&self, reference: &RunRef, event: &Event) -> Result<(), StoreError> {
        let not_found = || StoreError::RunNotFound {
            reference: reference.clone(),
        };
        check_component(&reference.issue_id, not_found)?;
        check_component(&reference.run_id, not_found)?;

        let dir = self.run_dir(reference);
        create_dir(&dir)?;
        let path = dir.join(EVENTS_FILE);
        let io_error = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error)?;
        writeln!(file, "{}", event.to_line()).map_err(io_error)?;
        Ok(())
    }

    fn set_issue_status(&self, id: &str, status: IssueStatus) -> Result<(), StoreError> {
        let not_found = || StoreError::IssueNotFound { id: id.to_string() };
        check_component(id, not_found)?;
        let path = self.issue_path(id);
        if !path.is_file() {
            return Err(not_found());
        }
        let contents = read_file(&path)?;
        write_file(&path, &with_frontmatter_value(&contents, "status", status.as_str()))
    }

    fn vault_path(&self) -> &Path {
        &self.root
    }
}

/// Parses every line of an event log, skipping blank and malformed lines.
pub fn parse_event_log(path: &Path, contents: &str) -> Vec<Event> {
    let mut events = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_event_line(line) {
            Ok(event) => events.push(event),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %err,
                    "skipping malformed event line"
                );
            }
        }
    }
    events
}

fn split_frontmatter(contents: &str) -> Option<(Vec<&str>, &str)> {
    let mut lines = contents.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != FRONTMATTER_FENCE {
        return None;
    }
    let mut header = Vec::new();
    let mut consumed = first.len();
    for line in lines {
        consumed += line.len();
        if line.trim_end() == FRONTMATTER_FENCE {
            return Some((header, &contents[consumed..]));
        }
        header.push(line.trim_end_matches(['\n', '\r']));
    }
    None
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

pub fn parse_issue(id: &str, contents: &str) -> Issue {
    let mut issue = Issue::new(id, id);
    let Some((header, body)) = split_frontmatter(contents) else {
        if let Some(title) = first_heading(contents) {
            issue.title = title;
        }
        return issue;
    };

    let mut fields = BTreeMap::new();
    for line in header {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                fields.insert(key.to_string(), unquote(value));
            }
        }
    }

    match fields.remove("title").filter(|title| !title.is_empty()) {
        Some(title) => issue.title = title,
        None => {
            if let Some(title) = first_heading(body) {
                issue.title = title;
            }
        }
    }
    if let Some(raw) = fields.remove("status") {
        match raw.parse::<IssueStatus>() {
            Ok(status) => issue.status = status,
            Err(err) => tracing::warn!(issue = id, error = %err, "unknown issue status"),
        }
    }
    issue.topic = fields.remove("topic").filter(|topic| !topic.is_empty());
    issue.summary = fields.remove("summary").unwrap_or_default();
    issue.frontmatter = fields;
    issue
}

fn first_heading(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|heading| heading.trim().to_string())
        .filter(|heading| !heading.is_empty())
}

/// Sets `key` inside the frontmatter, adding a frontmatter block if needed.
/// Other lines, including the body, are kept as written.
pub fn with_frontmatter_value(contents: &str, key: &str, value: &str) -> String {
    let entry = format!("{key}: {value}");
    let Some((header, body)) = split_frontmatter(contents) else {
        return format!("{FRONTMATTER_FENCE}\n{entry}\n{FRONTMATTER_FENCE}\n{contents}");
    };

    let mut replaced = false;
    let mut lines: Vec<String> = header
        .into_iter()
        .map(|line| match line.split_once(':') {
            Some((existing, _)) if existing.trim() == key && !replaced => {
                replaced = true;
                entry.clone()
            }
            _ => line.to_string(),
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }
    format!(
        "{FRONTMATTER_FENCE}\n{}\n{FRONTMATTER_FENCE}\n{body}",
        lines.join("\n")
    )
}

fn render_issue(issue: &Issue) -> String {
    let mut header = vec![
        format!("title: {}", issue.title),
        format!("status: {}", issue.status),
    ];
    if let Some(topic) = &issue.topic {
        header.push(format!("topic: {topic}"));
    }
    if !issue.summary.is_empty() {
        header.push(format!("summary: {}", issue.summary));
    }
    for (key, value) in &issue.frontmatter {
        header.push(format!("{key}: {value}"));
    }
    format!(
        "{FRONTMATTER_FENCE}\n{}\n{FRONTMATTER_FENCE}\n\n# {}\n",
        header.join("\n"),
        issue.title
    )
}

fn check_component<F>(value: &str, error: F) -> Result<(), StoreError>
where
    F: Fn() -> StoreError,
{
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || value.contains('/')
        || value.contains('\\')
    {
        return Err(error());
    }
    Ok(())
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }
    Ok(paths)
}

/// Child directories in name order; a missing directory has none.
fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = read_dir(dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn create_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<String, StoreError> {
    fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), StoreError> {
    fs::write(path, contents).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
