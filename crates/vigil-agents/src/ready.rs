use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use vigil_mux::Multiplexer;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyWait {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for ReadyWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll: Duration::from_millis(250),
        }
    }
}

/// Polls the pane's visible output until `pattern` matches or the deadline
/// passes. Returns how long it took. A missing pane fails immediately.
pub fn wait_until_ready(
    mux: &dyn Multiplexer,
    pane: &str,
    pattern: &Regex,
    wait: ReadyWait,
) -> Result<Duration, AgentError> {
    let started = Instant::now();
    let deadline = started + wait.timeout;
    let poll = wait.poll.max(Duration::from_millis(1));

    loop {
        let output = mux.capture_pane(pane)?;
        if pattern.is_match(&output) {
            let waited = started.elapsed();
            tracing::debug!(pane, waited_ms = waited.as_millis() as u64, "agent ready");
            return Ok(waited);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(AgentError::ReadyTimeout {
                pane: pane.to_string(),
                waited_ms: started.elapsed().as_millis(),
                last_output: output,
            });
        }
        thread::sleep(poll.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use vigil_mux::FakeMux;

    use super::*;

    fn mux_with_pane() -> (FakeMux, String) {
        let mux = FakeMux::new();
        mux.new_session("run", Path::new("/wt"), "run", Some("claude"))
            .expect("session");
        let pane = mux.list_panes("=run:0").expect("panes")[0].id.clone();
        (mux, pane)
    }

    fn quick() -> ReadyWait {
        ReadyWait {
            timeout: Duration::from_millis(30),
            poll: Duration::from_millis(5),
        }
    }

    #[test]
    fn returns_once_output_matches() {
        let (mux, pane) = mux_with_pane();
        mux.set_pane_output(&pane, "Welcome\n? for shortcuts\n");
        let pattern = Regex::new(r"\? for shortcuts").expect("regex");
        wait_until_ready(&mux, &pane, &pattern, quick()).expect("ready");
        assert_eq!(
            mux.calls().iter().filter(|c| *c == "capture-pane").count(),
            1
        );
    }

    #[test]
    fn times_out_with_last_output() {
        let (mux, pane) = mux_with_pane();
        mux.set_pane_output(&pane, "booting");
        let pattern = Regex::new("ready").expect("regex");
        let err = wait_until_ready(&mux, &pane, &pattern, quick()).expect_err("timeout");
        match err {
            AgentError::ReadyTimeout {
                pane: timed_out,
                waited_ms,
                last_output,
            } => {
                assert_eq!(timed_out, pane);
                assert!(waited_ms >= 30);
                assert_eq!(last_output, "booting");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn missing_pane_is_a_mux_error() {
        let (mux, _) = mux_with_pane();
        let pattern = Regex::new("ready").expect("regex");
        let err = wait_until_ready(&mux, "%99", &pattern, quick()).expect_err("no pane");
        assert!(matches!(err, AgentError::Mux(_)));
    }
}
