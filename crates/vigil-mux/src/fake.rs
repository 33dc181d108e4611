//! In-memory multiplexer used by tests. Models the parts of tmux vigil relies
//! on: sessions holding windows by index, windows shared between sessions via
//! links, ordered panes with titles, and session-scoped options.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::MuxError;
use crate::types::{Multiplexer, PaneInfo, SplitSpec, WindowInfo};

const MUTATING_CALLS: &[&str] = &[
    "new-session",
    "kill-session",
    "new-window",
    "link-window",
    "unlink-window",
    "split-window",
    "kill-pane",
    "set-pane-title",
    "swap-pane",
    "set-option",
];

#[derive(Debug, Default)]
struct FakeSession {
    windows: BTreeMap<u32, String>,
    options: BTreeMap<String, String>,
    current: Option<u32>,
}

#[derive(Debug, Default)]
struct FakeWindow {
    name: String,
    panes: Vec<String>,
    active_pane: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct FakePane {
    title: String,
    cwd: Option<PathBuf>,
    command: Option<String>,
    output: String,
    keys: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    sessions: BTreeMap<String, FakeSession>,
    windows: HashMap<String, FakeWindow>,
    panes: HashMap<String, FakePane>,
    next_window: u32,
    next_pane: u32,
    calls: Vec<String>,
    unavailable: bool,
    rejected_sessions: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeMux {
    state: Mutex<FakeState>,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, call: &str) -> Result<MutexGuard<'_, FakeState>, MuxError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(MuxError::Io {
                command: format!("tmux {call}"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "tmux not installed"),
            });
        }
        state.calls.push(call.to_string());
        Ok(state)
    }

    /// Every call since creation (or the last [`FakeMux::clear_calls`]).
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Calls that changed topology, titles or options.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| MUTATING_CALLS.contains(&call.as_str()))
            .count()
    }

    /// Makes every subsequent call fail as if tmux were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Makes `new_session` fail for `session` as tmux does on a bad cwd.
    pub fn reject_new_session(&self, session: &str) {
        self.lock().rejected_sessions.insert(session.to_string());
    }

    pub fn set_pane_output(&self, pane: &str, output: &str) {
        if let Some(entry) = self.lock().panes.get_mut(pane) {
            entry.output = output.to_string();
        }
    }

    pub fn sent_keys(&self, pane: &str) -> Vec<String> {
        self.lock()
            .panes
            .get(pane)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default()
    }

    pub fn pane_command(&self, pane: &str) -> Option<String> {
        self.lock()
            .panes
            .get(pane)
            .and_then(|entry| entry.command.clone())
    }

    pub fn pane_cwd(&self, pane: &str) -> Option<PathBuf> {
        self.lock().panes.get(pane).and_then(|entry| entry.cwd.clone())
    }

    /// `(index, window id)` pairs linked into `session`.
    pub fn linked_windows(&self, session: &str) -> Vec<(u32, String)> {
        self.lock()
            .sessions
            .get(session)
            .map(|entry| {
                entry
                    .windows
                    .iter()
                    .map(|(index, id)| (*index, id.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn current_window(&self, session: &str) -> Option<u32> {
        self.lock().sessions.get(session).and_then(|entry| entry.current)
    }

    pub fn active_pane(&self, window: &str) -> Option<String> {
        let state = self.lock();
        let id = state.resolve_window(window).ok()?;
        state.windows.get(&id).and_then(|entry| entry.active_pane.clone())
    }

    pub fn session_names(&self) -> Vec<String> {
        self.lock().sessions.keys().cloned().collect()
    }

    /// Operator-style interference: kills a pane without recording a call.
    pub fn kill_pane_externally(&self, pane: &str) {
        let mut state = self.lock();
        state.remove_pane(pane);
    }

    /// Operator-style interference: retitles a pane without recording a call.
    pub fn retitle_externally(&self, pane: &str, title: &str) {
        if let Some(entry) = self.lock().panes.get_mut(pane) {
            entry.title = title.to_string();
        }
    }
}

fn not_found(target: &str) -> MuxError {
    MuxError::NotFound {
        target: target.to_string(),
    }
}

fn strip_exact(session: &str) -> &str {
    session.strip_prefix('=').unwrap_or(session)
}

impl FakeState {
    fn session(&self, session: &str) -> Result<&FakeSession, MuxError> {
        self.sessions
            .get(strip_exact(session))
            .ok_or_else(|| not_found(session))
    }

    fn session_mut(&mut self, session: &str) -> Result<&mut FakeSession, MuxError> {
        self.sessions
            .get_mut(strip_exact(session))
            .ok_or_else(|| not_found(session))
    }

    /// Accepts `@N`, `=session:index` or `=session` (current window).
    fn resolve_window(&self, target: &str) -> Result<String, MuxError> {
        if target.starts_with('@') {
            return if self.windows.contains_key(target) {
                Ok(target.to_string())
            } else {
                Err(not_found(target))
            };
        }
        if target.starts_with('%') {
            return self.window_of_pane(target).ok_or_else(|| not_found(target));
        }
        let (session, index) = match target.rsplit_once(':') {
            Some((session, index)) => (session, Some(index)),
            None => (target, None),
        };
        let entry = self.session(session)?;
        let index = match index {
            Some(raw) => raw.parse::<u32>().map_err(|_| not_found(target))?,
            None => entry
                .current
                .or_else(|| entry.windows.keys().next().copied())
                .ok_or_else(|| not_found(target))?,
        };
        entry
            .windows
            .get(&index)
            .cloned()
            .ok_or_else(|| not_found(target))
    }

    fn window_of_pane(&self, pane: &str) -> Option<String> {
        self.windows
            .iter()
            .find(|(_, window)| window.panes.iter().any(|id| id == pane))
            .map(|(id, _)| id.clone())
    }

    fn allocate_window(&mut self, name: &str) -> String {
        let id = format!("@{}", self.next_window);
        self.next_window += 1;
        self.windows.insert(
            id.clone(),
            FakeWindow {
                name: name.to_string(),
                ..FakeWindow::default()
            },
        );
        id
    }

    fn allocate_pane(&mut self, cwd: Option<PathBuf>, command: Option<String>) -> String {
        let id = format!("%{}", self.next_pane);
        self.next_pane += 1;
        self.panes.insert(
            id.clone(),
            FakePane {
                cwd,
                command,
                ..FakePane::default()
            },
        );
        id
    }

    fn window_info(&self, id: &str, index: u32) -> WindowInfo {
        WindowInfo {
            id: id.to_string(),
            index,
            name: self
                .windows
                .get(id)
                .map(|window| window.name.clone())
                .unwrap_or_default(),
        }
    }

    fn is_linked(&self, window: &str) -> bool {
        self.sessions
            .values()
            .any(|session| session.windows.values().any(|id| id == window))
    }

    fn destroy_window(&mut self, window: &str) {
        if let Some(entry) = self.windows.remove(window) {
            for pane in entry.panes {
                self.panes.remove(&pane);
            }
        }
        for session in self.sessions.values_mut() {
            session.windows.retain(|_, id| id != window);
            if session
                .current
                .is_some_and(|index| !session.windows.contains_key(&index))
            {
                session.current = session.windows.keys().next().copied();
            }
        }
        self.sessions.retain(|_, session| !session.windows.is_empty());
    }

    fn remove_pane(&mut self, pane: &str) {
        let Some(window) = self.window_of_pane(pane) else {
            return;
        };
        self.panes.remove(pane);
        let now_empty = match self.windows.get_mut(&window) {
            Some(entry) => {
                entry.panes.retain(|id| id != pane);
                if entry.active_pane.as_deref() == Some(pane) {
                    entry.active_pane = entry.panes.first().cloned();
                }
                entry.panes.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.destroy_window(&window);
        }
    }
}

impl Multiplexer for FakeMux {
    fn has_session(&self, session: &str) -> Result<bool, MuxError> {
        let state = self.enter("has-session")?;
        Ok(state.sessions.contains_key(strip_exact(session)))
    }

    fn new_session(
        &self,
        session: &str,
        cwd: &Path,
        window_name: &str,
        command: Option<&str>,
    ) -> Result<(), MuxError> {
        let mut state = self.enter("new-session")?;
        if state.rejected_sessions.contains(session) {
            return Err(MuxError::CommandFailed {
                command: format!("tmux new-session -s {session}"),
                status: Some(1),
                stdout: String::new(),
                stderr: format!("can't create session: {session}"),
            });
        }
        if state.sessions.contains_key(session) {
            return Err(MuxError::CommandFailed {
                command: format!("tmux new-session -s {session}"),
                status: Some(1),
                stdout: String::new(),
                stderr: format!("duplicate session: {session}"),
            });
        }
        let window = state.allocate_window(window_name);
        let pane = state.allocate_pane(Some(cwd.to_path_buf()), command.map(str::to_string));
        if let Some(entry) = state.windows.get_mut(&window) {
            entry.panes.push(pane.clone());
            entry.active_pane = Some(pane);
        }
        let mut entry = FakeSession::default();
        entry.windows.insert(0, window);
        entry.current = Some(0);
        state.sessions.insert(session.to_string(), entry);
        Ok(())
    }

    fn kill_session(&self, session: &str) -> Result<(), MuxError> {
        let mut state = self.enter("kill-session")?;
        let removed = state
            .sessions
            .remove(strip_exact(session))
            .ok_or_else(|| not_found(session))?;
        for window in removed.windows.into_values() {
            if !state.is_linked(&window) {
                state.destroy_window(&window);
            }
        }
        Ok(())
    }

    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>, MuxError> {
        let state = self.enter("list-windows")?;
        let entry = state.session(session)?;
        Ok(entry
            .windows
            .iter()
            .map(|(index, id)| state.window_info(id, *index))
            .collect())
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: &Path,
        command: Option<&str>,
    ) -> Result<WindowInfo, MuxError> {
        let mut state = self.enter("new-window")?;
        let index = {
            let entry = state.session(session)?;
            (0..).find(|index| !entry.windows.contains_key(index)).unwrap_or(0)
        };
        let window = state.allocate_window(name);
        let pane = state.allocate_pane(Some(cwd.to_path_buf()), command.map(str::to_string));
        if let Some(entry) = state.windows.get_mut(&window) {
            entry.panes.push(pane.clone());
            entry.active_pane = Some(pane);
        }
        state.session_mut(session)?.windows.insert(index, window.clone());
        Ok(state.window_info(&window, index))
    }

    fn link_window(&self, window_id: &str, session: &str, index: u32) -> Result<(), MuxError> {
        let mut state = self.enter("link-window")?;
        let window = state.resolve_window(window_id)?;
        let entry = state.session_mut(session)?;
        if entry.windows.contains_key(&index) {
            return Err(MuxError::CommandFailed {
                command: format!("tmux link-window -s {window_id} -t ={session}:{index}"),
                status: Some(1),
                stdout: String::new(),
                stderr: format!("index in use: {index}"),
            });
        }
        entry.windows.insert(index, window);
        Ok(())
    }

    fn unlink_window(&self, session: &str, index: u32) -> Result<(), MuxError> {
        let mut state = self.enter("unlink-window")?;
        let target = format!("={session}:{index}");
        let window = state
            .session_mut(session)?
            .windows
            .remove(&index)
            .ok_or_else(|| not_found(&target))?;
        if let Some(entry) = state.sessions.get_mut(strip_exact(session)) {
            if entry.current == Some(index) {
                entry.current = entry.windows.keys().next().copied();
            }
        }
        if !state.is_linked(&window) {
            state.destroy_window(&window);
        }
        Ok(())
    }

    fn select_window(&self, target: &str) -> Result<(), MuxError> {
        let mut state = self.enter("select-window")?;
        let window = state.resolve_window(target)?;
        if let Some((session, index)) = target.rsplit_once(':') {
            if let Ok(index) = index.parse::<u32>() {
                state.session_mut(session)?.current = Some(index);
                return Ok(());
            }
        }
        let hit = state.sessions.values_mut().find_map(|session| {
            let index = session
                .windows
                .iter()
                .find(|(_, id)| **id == window)
                .map(|(index, _)| *index)?;
            session.current = Some(index);
            Some(())
        });
        hit.ok_or_else(|| not_found(target))
    }

    fn list_panes(&self, window: &str) -> Result<Vec<PaneInfo>, MuxError> {
        let state = self.enter("list-panes")?;
        let id = state.resolve_window(window)?;
        let entry = state.windows.get(&id).ok_or_else(|| not_found(window))?;
        Ok(entry
            .panes
            .iter()
            .enumerate()
            .map(|(index, pane)| PaneInfo {
                id: pane.clone(),
                index: index as u32,
                title: state
                    .panes
                    .get(pane)
                    .map(|p| p.title.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    fn split_pane(&self, spec: &SplitSpec) -> Result<String, MuxError> {
        let mut state = self.enter("split-window")?;
        let window = state.resolve_window(&spec.target)?;
        let pane = state.allocate_pane(spec.cwd.clone(), spec.command.clone());
        let entry = state
            .windows
            .get_mut(&window)
            .ok_or_else(|| not_found(&spec.target))?;
        let anchor = entry.panes.iter().position(|id| *id == spec.target);
        let insert_at = match anchor {
            Some(position) if !spec.full => position + 1,
            _ => entry.panes.len(),
        };
        entry.panes.insert(insert_at, pane.clone());
        Ok(pane)
    }

    fn kill_pane(&self, pane: &str) -> Result<(), MuxError> {
        let mut state = self.enter("kill-pane")?;
        if !state.panes.contains_key(pane) {
            return Err(not_found(pane));
        }
        state.remove_pane(pane);
        Ok(())
    }

    fn set_pane_title(&self, pane: &str, title: &str) -> Result<(), MuxError> {
        let mut state = self.enter("set-pane-title")?;
        let entry = state.panes.get_mut(pane).ok_or_else(|| not_found(pane))?;
        entry.title = title.to_string();
        Ok(())
    }

    fn pane_title(&self, pane: &str) -> Result<String, MuxError> {
        let state = self.enter("pane-title")?;
        state
            .panes
            .get(pane)
            .map(|entry| entry.title.clone())
            .ok_or_else(|| not_found(pane))
    }

    fn swap_panes(&self, source: &str, target: &str) -> Result<(), MuxError> {
        let mut state = self.enter("swap-pane")?;
        let source_window = state.window_of_pane(source).ok_or_else(|| not_found(source))?;
        let target_window = state.window_of_pane(target).ok_or_else(|| not_found(target))?;
        for window in [&source_window, &target_window] {
            if let Some(entry) = state.windows.get_mut(window) {
                for slot in entry.panes.iter_mut() {
                    if *slot == source {
                        *slot = target.to_string();
                    } else if *slot == target {
                        *slot = source.to_string();
                    }
                }
                if source_window == target_window {
                    break;
                }
            }
        }
        Ok(())
    }

    fn select_pane(&self, pane: &str) -> Result<(), MuxError> {
        let mut state = self.enter("select-pane")?;
        let window = state.window_of_pane(pane).ok_or_else(|| not_found(pane))?;
        if let Some(entry) = state.windows.get_mut(&window) {
            entry.active_pane = Some(pane.to_string());
        }
        Ok(())
    }

    fn set_option(&self, session: &str, key: &str, value: &str) -> Result<(), MuxError> {
        let mut state = self.enter("set-option")?;
        state
            .session_mut(session)?
            .options
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn option(&self, session: &str, key: &str) -> Result<Option<String>, MuxError> {
        let state = self.enter("show-options")?;
        Ok(state.session(session)?.options.get(key).cloned())
    }

    fn send_keys(&self, pane: &str, text: &str, enter: bool) -> Result<(), MuxError> {
        let mut state = self.enter("send-keys")?;
        let entry = state.panes.get_mut(pane).ok_or_else(|| not_found(pane))?;
        let mut keys = text.to_string();
        if enter {
            keys.push('\n');
        }
        entry.keys.push(keys);
        Ok(())
    }

    fn capture_pane(&self, pane: &str) -> Result<String, MuxError> {
        let state = self.enter("capture-pane")?;
        state
            .panes
            .get(pane)
            .map(|entry| entry.output.clone())
            .ok_or_else(|| not_found(pane))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{window_target, SplitDirection};

    fn mux_with_session(name: &str) -> FakeMux {
        let mux = FakeMux::new();
        mux.new_session(name, Path::new("/vault"), "dashboard", None)
            .expect("new session");
        mux
    }

    #[test]
    fn new_session_has_one_window_with_one_pane() {
        let mux = mux_with_session("dash");
        let windows = mux.list_windows("dash").expect("windows");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].index, 0);
        assert_eq!(windows[0].name, "dashboard");
        assert_eq!(mux.list_panes(&windows[0].id).expect("panes").len(), 1);
        assert!(mux.has_session("=dash").expect("has"));
        assert!(!mux.has_session("dash2").expect("has"));
    }

    #[test]
    fn linked_windows_survive_until_last_link_is_gone() {
        let mux = mux_with_session("dash");
        mux.new_session("run", Path::new("/wt"), "run", None)
            .expect("run session");
        let run_window = mux.list_windows("run").expect("windows")[0].id.clone();

        mux.link_window(&run_window, "dash", 1).expect("link");
        let err = mux.link_window(&run_window, "dash", 1).expect_err("in use");
        assert!(err.to_string().contains("index in use"));

        mux.unlink_window("dash", 1).expect("unlink");
        assert_eq!(mux.linked_windows("run").len(), 1);

        mux.link_window(&run_window, "dash", 2).expect("relink");
        mux.kill_session("run").expect("kill");
        assert_eq!(mux.linked_windows("dash")[1], (2, run_window.clone()));
        mux.unlink_window("dash", 2).expect("unlink last link");
        assert!(mux.list_panes(&run_window).is_err());
    }

    #[test]
    fn splits_titles_and_swaps_track_pane_identity() {
        let mux = mux_with_session("dash");
        let window = window_target("dash", 0);
        let first = mux.list_panes(&window).expect("panes")[0].id.clone();
        let second = mux
            .split_pane(&SplitSpec::new(first.as_str(), SplitDirection::Horizontal).command("chat"))
            .expect("split");
        mux.set_pane_title(&second, "chat").expect("title");
        assert_eq!(mux.pane_command(&second).as_deref(), Some("chat"));

        mux.new_session("run", Path::new("/wt"), "run", None)
            .expect("run session");
        let run_pane = mux.list_panes("=run:0").expect("panes")[0].id.clone();
        mux.swap_panes(&run_pane, &second).expect("swap");

        let ids: Vec<String> = mux
            .list_panes(&window)
            .expect("panes")
            .into_iter()
            .map(|pane| pane.id)
            .collect();
        assert_eq!(ids, vec![first, run_pane.clone()]);
        assert_eq!(mux.list_panes("=run:0").expect("panes")[0].id, second);
        assert_eq!(mux.pane_title(&second).expect("title"), "chat");
    }

    #[test]
    fn killing_last_pane_closes_window_and_empty_session() {
        let mux = mux_with_session("solo");
        let pane = mux.list_panes("=solo:0").expect("panes")[0].id.clone();
        mux.kill_pane_externally(&pane);
        assert!(!mux.has_session("solo").expect("has"));
    }

    #[test]
    fn unavailable_mux_fails_every_call_without_logging() {
        let mux = mux_with_session("dash");
        mux.clear_calls();
        mux.set_unavailable(true);
        assert!(matches!(mux.has_session("dash"), Err(MuxError::Io { .. })));
        assert!(mux.calls().is_empty());
        assert_eq!(mux.mutation_count(), 0);
    }

    #[test]
    fn rejected_sessions_fail_creation_only_for_that_name() {
        let mux = FakeMux::new();
        mux.reject_new_session("broken");
        let err = mux
            .new_session("broken", Path::new("/wt"), "run", None)
            .expect_err("rejected");
        assert!(matches!(err, MuxError::CommandFailed { .. }));
        assert!(!mux.has_session("broken").expect("has"));
        mux.new_session("fine", Path::new("/wt"), "run", None)
            .expect("other sessions still work");
    }

    #[test]
    fn keys_and_capture_round_through_the_pane() {
        let mux = mux_with_session("dash");
        let pane = mux.list_panes("=dash:0").expect("panes")[0].id.clone();
        mux.set_pane_output(&pane, "ready >");
        mux.send_keys(&pane, "hello", true).expect("send");
        assert_eq!(mux.capture_pane(&pane).expect("capture"), "ready >");
        assert_eq!(mux.sent_keys(&pane), vec!["hello\n".to_string()]);
        mux.set_option("dash", "@vigil-role-runs", &pane).expect("set");
        assert_eq!(
            mux.option("dash", "@vigil-role-runs").expect("get"),
            Some(pane)
        );
    }
}
