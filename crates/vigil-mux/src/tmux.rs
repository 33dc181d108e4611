use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::MuxError;
use crate::types::{
    session_target, window_target, Multiplexer, PaneInfo, SplitDirection, SplitSpec, WindowInfo,
};

const WINDOW_FORMAT: &str = "#{window_id}\t#{window_index}\t#{window_name}";
const PANE_FORMAT: &str = "#{pane_id}\t#{pane_index}\t#{pane_title}";

/// `tmux` driven as a subprocess, one invocation per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxCli {
    pub binary: PathBuf,
    /// `-L` socket name; `None` talks to the default server.
    pub socket: Option<String>,
}

impl Default for TmuxCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tmux"),
            socket: None,
        }
    }
}

impl TmuxCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            socket: None,
        }
    }

    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    pub fn run<I, S>(&self, args: I) -> Result<String, MuxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut owned_args: Vec<OsString> = Vec::new();
        if let Some(socket) = &self.socket {
            owned_args.push(OsString::from("-L"));
            owned_args.push(OsString::from(socket));
        }
        owned_args.extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));

        let rendered = render_command(&self.binary, &owned_args);
        tracing::trace!(command = %rendered, "running tmux");
        let output = Command::new(&self.binary)
            .args(&owned_args)
            .output()
            .map_err(|source| MuxError::Io {
                command: rendered.clone(),
                source,
            })?;

        // Pane captures carry whatever bytes the agent printed.
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(MuxError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }
        Ok(stdout)
    }
}

impl Multiplexer for TmuxCli {
    fn has_session(&self, session: &str) -> Result<bool, MuxError> {
        match self.run(["has-session", "-t", &session_target(session)]) {
            Ok(_) => Ok(true),
            Err(MuxError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn new_session(
        &self,
        session: &str,
        cwd: &Path,
        window_name: &str,
        command: Option<&str>,
    ) -> Result<(), MuxError> {
        let mut args: Vec<OsString> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            session.into(),
            "-n".into(),
            window_name.into(),
            "-c".into(),
            cwd.as_os_str().to_os_string(),
        ];
        if let Some(command) = command {
            args.push(command.into());
        }
        self.run(args)?;
        Ok(())
    }

    fn kill_session(&self, session: &str) -> Result<(), MuxError> {
        self.run(["kill-session", "-t", &session_target(session)])?;
        Ok(())
    }

    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>, MuxError> {
        let stdout = self.run([
            "list-windows",
            "-t",
            &session_target(session),
            "-F",
            WINDOW_FORMAT,
        ])?;
        parse_windows(&stdout)
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: &Path,
        command: Option<&str>,
    ) -> Result<WindowInfo, MuxError> {
        let target = format!("{}:", session_target(session));
        let mut args: Vec<OsString> = vec![
            "new-window".into(),
            "-d".into(),
            "-P".into(),
            "-F".into(),
            WINDOW_FORMAT.into(),
            "-t".into(),
            target.into(),
            "-n".into(),
            name.into(),
            "-c".into(),
            cwd.as_os_str().to_os_string(),
        ];
        if let Some(command) = command {
            args.push(command.into());
        }
        let stdout = self.run(args)?;
        parse_windows(&stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| MuxError::Parse {
                context: "new-window printed no window".to_string(),
            })
    }

    fn link_window(&self, window_id: &str, session: &str, index: u32) -> Result<(), MuxError> {
        self.run([
            "link-window",
            "-d",
            "-s",
            window_id,
            "-t",
            &window_target(session, index),
        ])?;
        Ok(())
    }

    fn unlink_window(&self, session: &str, index: u32) -> Result<(), MuxError> {
        self.run(["unlink-window", "-k", "-t", &window_target(session, index)])?;
        Ok(())
    }

    fn select_window(&self, target: &str) -> Result<(), MuxError> {
        self.run(["select-window", "-t", target])?;
        Ok(())
    }

    fn list_panes(&self, window: &str) -> Result<Vec<PaneInfo>, MuxError> {
        let stdout = self.run(["list-panes", "-t", window, "-F", PANE_FORMAT])?;
        parse_panes(&stdout)
    }

    fn split_pane(&self, spec: &SplitSpec) -> Result<String, MuxError> {
        let stdout = self.run(split_args(spec))?;
        let pane = stdout.trim();
        if pane.is_empty() {
            return Err(MuxError::Parse {
                context: "split-window printed no pane id".to_string(),
            });
        }
        Ok(pane.to_string())
    }

    fn kill_pane(&self, pane: &str) -> Result<(), MuxError> {
        self.run(["kill-pane", "-t", pane])?;
        Ok(())
    }

    fn set_pane_title(&self, pane: &str, title: &str) -> Result<(), MuxError> {
        self.run(["select-pane", "-t", pane, "-T", title])?;
        Ok(())
    }

    fn pane_title(&self, pane: &str) -> Result<String, MuxError> {
        let stdout = self.run(["display-message", "-p", "-t", pane, "#{pane_title}"])?;
        Ok(stdout.trim_end_matches('\n').to_string())
    }

    fn swap_panes(&self, source: &str, target: &str) -> Result<(), MuxError> {
        self.run(["swap-pane", "-d", "-s", source, "-t", target])?;
        Ok(())
    }

    fn select_pane(&self, pane: &str) -> Result<(), MuxError> {
        self.run(["select-pane", "-t", pane])?;
        Ok(())
    }

    fn set_option(&self, session: &str, key: &str, value: &str) -> Result<(), MuxError> {
        self.run(["set-option", "-t", &session_target(session), key, value])?;
        Ok(())
    }

    fn option(&self, session: &str, key: &str) -> Result<Option<String>, MuxError> {
        let stdout = self.run(["show-options", "-v", "-q", "-t", &session_target(session), key])?;
        let value = stdout.trim_end_matches('\n');
        if value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(value.to_string()))
        }
    }

    fn send_keys(&self, pane: &str, text: &str, enter: bool) -> Result<(), MuxError> {
        if !text.is_empty() {
            self.run(["send-keys", "-t", pane, "-l", text])?;
        }
        if enter {
            self.run(["send-keys", "-t", pane, "Enter"])?;
        }
        Ok(())
    }

    fn capture_pane(&self, pane: &str) -> Result<String, MuxError> {
        self.run(["capture-pane", "-p", "-J", "-t", pane])
    }
}

fn split_args(spec: &SplitSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "split-window".into(),
        "-d".into(),
        "-P".into(),
        "-F".into(),
        "#{pane_id}".into(),
        "-t".into(),
        spec.target.as_str().into(),
        match spec.direction {
            SplitDirection::Horizontal => "-h".into(),
            SplitDirection::Vertical => "-v".into(),
        },
    ];
    if spec.full {
        args.push("-f".into());
    }
    if let Some(percent) = spec.size_percent {
        args.push("-l".into());
        args.push(format!("{percent}%").into());
    }
    if let Some(cwd) = &spec.cwd {
        args.push("-c".into());
        args.push(cwd.as_os_str().to_os_string());
    }
    if let Some(command) = &spec.command {
        args.push(command.as_str().into());
    }
    args
}

fn parse_windows(stdout: &str) -> Result<Vec<WindowInfo>, MuxError> {
    let mut windows = Vec::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let mut parts = line.splitn(3, '\t');
        let (Some(id), Some(index), name) = (parts.next(), parts.next(), parts.next()) else {
            return Err(MuxError::Parse {
                context: format!("window line '{line}'"),
            });
        };
        let index = index.parse::<u32>().map_err(|_| MuxError::Parse {
            context: format!("window index in '{line}'"),
        })?;
        windows.push(WindowInfo {
            id: id.to_string(),
            index,
            name: name.unwrap_or_default().to_string(),
        });
    }
    windows.sort_by_key(|window| window.index);
    Ok(windows)
}

fn parse_panes(stdout: &str) -> Result<Vec<PaneInfo>, MuxError> {
    let mut panes = Vec::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let mut parts = line.splitn(3, '\t');
        let (Some(id), Some(index), title) = (parts.next(), parts.next(), parts.next()) else {
            return Err(MuxError::Parse {
                context: format!("pane line '{line}'"),
            });
        };
        let index = index.parse::<u32>().map_err(|_| MuxError::Parse {
            context: format!("pane index in '{line}'"),
        })?;
        panes.push(PaneInfo {
            id: id.to_string(),
            index,
            title: title.unwrap_or_default().to_string(),
        });
    }
    panes.sort_by_key(|pane| pane.index);
    Ok(panes)
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn parses_window_listing_sorted_by_index() {
        let windows =
            parse_windows("@7\t2\trun ISS-1/r1\n@1\t0\tdashboard\n@4\t1\t\n").expect("parse");
        let ids: Vec<&str> = windows.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["@1", "@4", "@7"]);
        assert_eq!(windows[2].name, "run ISS-1/r1");
        assert_eq!(windows[1].name, "");
    }

    #[test]
    fn parses_pane_titles_with_tabs_intact() {
        let panes = parse_panes("%3\t1\tchat\n%1\t0\truns\n%5\t2\ta\tb\n").expect("parse");
        assert_eq!(panes[0].id, "%1");
        assert_eq!(panes[1].title, "chat");
        assert_eq!(panes[2].title, "a\tb");
    }

    #[test]
    fn rejects_malformed_listing_lines() {
        assert!(matches!(
            parse_windows("@1\tzero\tdashboard"),
            Err(MuxError::Parse { .. })
        ));
        assert!(matches!(parse_panes("%1"), Err(MuxError::Parse { .. })));
    }

    #[test]
    fn split_args_render_every_option() {
        let spec = SplitSpec::new("%1", SplitDirection::Horizontal)
            .size_percent(25)
            .full()
            .cwd("/vault")
            .command("claude");
        assert_eq!(
            rendered(split_args(&spec)),
            vec![
                "split-window",
                "-d",
                "-P",
                "-F",
                "#{pane_id}",
                "-t",
                "%1",
                "-h",
                "-f",
                "-l",
                "25%",
                "-c",
                "/vault",
                "claude"
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn invalid_utf8_output_is_decoded_lossily() {
        let shell = TmuxCli::new("/bin/sh");
        let stdout = shell
            .run(["-c", r"printf 'ready \377>\n'"])
            .expect("lossy stdout");
        assert_eq!(stdout, "ready \u{fffd}>\n");

        let err = shell
            .run(["-c", r"printf 'bad \376' >&2; exit 3"])
            .expect_err("non-zero exit");
        match err {
            MuxError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "bad \u{fffd}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_io_error_and_has_session_propagates_it() {
        let tmux = TmuxCli::new("/definitely/missing/tmux-binary").with_socket("vigil-test");
        let err = tmux.has_session("nope").expect_err("missing binary");
        match err {
            MuxError::Io { command, source } => {
                assert!(command.contains("-L vigil-test has-session -t =nope"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
