//! Remote runner — every [`ProcSpec`] is started on its own host over a remote
//! shell.
//!
//! The transport is a collaborator behind [`RemoteExec`]; [`SshExec`] is the
//! stock implementation. A transport reports "could not reach the host"
//! as [`RunError::TransportFailure`] and a genuine non-zero exit as an
//! ordinary exit code, so the two never get conflated.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use swarm_core::ProcSpec;

use crate::context::RunContext;
use crate::error::RunError;
use crate::process::{echo_line, supervise, ProcOutput, Stream, DEFAULT_GRACE_PERIOD};
use crate::report::{run_each, ProcResult, RunReport};
use crate::{BoxFuture, Runner};

/// ssh reserves this exit code for its own failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
}

/// Executes a shell command on a foreign host.
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `host` authenticated by `credential`.
    ///
    /// Must stop the remote command and return
    /// [`RunError::CancellationExceeded`] when `ctx` fires.
    fn exec<'a>(
        &'a self,
        ctx: &'a RunContext,
        host: &'a str,
        command: &'a str,
        credential: &'a str,
    ) -> BoxFuture<'a, Result<RemoteOutput, RunError>>;
}

/// [`RemoteExec`] over the system `ssh` client; the credential is the
/// remote user name.
#[derive(Debug, Clone)]
pub struct SshExec {
    options: Vec<String>,
    grace: Duration,
}

impl Default for SshExec {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SshExec {
    /// `options` are passed to ssh before the target, e.g. `-p 2222`.
    pub fn new(options: Vec<String>) -> Self {
        Self {
            options,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    fn command(&self, host: &str, command: &str, credential: &str) -> Command {
        let target = if credential.is_empty() {
            host.to_string()
        } else {
            format!("{credential}@{host}")
        };
        let mut cmd = Command::new("ssh");
        // -tt ties the remote command's lifetime to the ssh session.
        cmd.args(["-o", "BatchMode=yes", "-tt"])
            .args(&self.options)
            .arg(target)
            .arg(command);
        cmd
    }
}

impl RemoteExec for SshExec {
    fn exec<'a>(
        &'a self,
        ctx: &'a RunContext,
        host: &'a str,
        command: &'a str,
        credential: &'a str,
    ) -> BoxFuture<'a, Result<RemoteOutput, RunError>> {
        Box::pin(async move {
            let transport = |reason: String| RunError::TransportFailure {
                host: host.to_string(),
                reason,
            };

            let cmd = self.command(host, command, credential);
            let s = supervise(ctx, cmd, host, false, self.grace)
                .await
                .map_err(|e| transport(format!("failed to start ssh: {e}")))?;

            if s.cancelled.is_some() {
                return Err(RunError::CancellationExceeded);
            }

            match s.output.exit_code {
                Some(SSH_TRANSPORT_EXIT) => Err(transport(
                    s.output
                        .stderr
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "ssh exited with 255".to_string()),
                )),
                Some(code) => Ok(RemoteOutput {
                    stdout: s.output.stdout,
                    stderr: s.output.stderr,
                    exit_code: code,
                }),
                None => Err(transport("ssh terminated by signal".to_string())),
            }
        })
    }
}

/// Runs a plan by handing each process to a [`RemoteExec`].
#[derive(Clone)]
pub struct RemoteRunner {
    exec: Arc<dyn RemoteExec>,
    credential: String,
}

impl RemoteRunner {
    pub fn new(exec: Arc<dyn RemoteExec>, credential: impl Into<String>) -> Self {
        Self {
            exec,
            credential: credential.into(),
        }
    }

    /// Remote runner over `ssh` as `user`.
    pub fn ssh(user: impl Into<String>, options: Vec<String>) -> Self {
        Self::new(Arc::new(SshExec::new(options)), user)
    }

    async fn run(&self, ctx: &RunContext, procs: Vec<ProcSpec>, verbose: bool) -> RunReport {
        info!(count = procs.len(), "starting remote peers");
        let exec = Arc::clone(&self.exec);
        let credential = self.credential.clone();
        run_each(ctx, procs, move |ctx, spec| {
            run_one(Arc::clone(&exec), credential.clone(), ctx, spec, verbose)
        })
        .await
    }
}

impl Runner for RemoteRunner {
    fn run_all<'a>(
        &'a self,
        ctx: &'a RunContext,
        procs: Vec<ProcSpec>,
        verbose: bool,
    ) -> BoxFuture<'a, RunReport> {
        Box::pin(self.run(ctx, procs, verbose))
    }
}

async fn run_one(
    exec: Arc<dyn RemoteExec>,
    credential: String,
    ctx: RunContext,
    spec: ProcSpec,
    verbose: bool,
) -> ProcResult {
    let label = spec.name();
    let command = remote_command(&spec);
    debug!(peer = %label, host = %spec.launch_host, %command, "launching remote peer");

    let (output, error) = match exec.exec(&ctx, &spec.launch_host, &command, &credential).await {
        Ok(out) => {
            if verbose {
                for line in &out.stdout {
                    echo_line(Stream::Stdout, &label, line);
                }
                for line in &out.stderr {
                    echo_line(Stream::Stderr, &label, line);
                }
            }
            let error = (out.exit_code != 0).then(|| RunError::ProcessFailure {
                peer: label.clone(),
                exit_code: out.exit_code,
            });
            (
                ProcOutput {
                    stdout: out.stdout,
                    stderr: out.stderr,
                    exit_code: Some(out.exit_code),
                    signal: None,
                },
                error,
            )
        }
        Err(e) => (ProcOutput::default(), Some(e)),
    };

    ProcResult {
        host: spec.launch_host.clone(),
        peer: spec.peer,
        output,
        error,
    }
}

/// Render a process as a single remote shell command:
/// `env K=V ... program args...`.
pub fn remote_command(spec: &ProcSpec) -> String {
    let mut parts = vec!["env".to_string()];
    parts.extend(spec.env.iter().map(|(k, v)| format!("{k}={}", shell_quote(v))));
    parts.push(shell_quote(&spec.program));
    parts.extend(spec.args.iter().map(|a| shell_quote(a)));
    parts.join(" ")
}

fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use swarm_core::{JobConfig, PeerId, Strategy};

    /// Scripted transport: fails one host, returns a fixed exit code for
    /// the rest, and records every call.
    struct FakeExec {
        unreachable: &'static str,
        exit_code: i32,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RemoteExec for FakeExec {
        fn exec<'a>(
            &'a self,
            _ctx: &'a RunContext,
            host: &'a str,
            command: &'a str,
            credential: &'a str,
        ) -> BoxFuture<'a, Result<RemoteOutput, RunError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push((
                    host.to_string(),
                    command.to_string(),
                    credential.to_string(),
                ));
                if host == self.unreachable {
                    return Err(RunError::TransportFailure {
                        host: host.to_string(),
                        reason: "connection refused".to_string(),
                    });
                }
                Ok(RemoteOutput {
                    stdout: vec![format!("hello from {host}")],
                    stderr: Vec::new(),
                    exit_code: self.exit_code,
                })
            })
        }
    }

    fn plan(hosts: &str, n: usize) -> Vec<ProcSpec> {
        let jc = JobConfig::new(
            PeerId::new("10.0.0.1", 38080),
            hosts.parse().unwrap(),
            "python3",
            vec!["train.py".to_string(), "--name".to_string(), "it's".to_string()],
        );
        let peers = jc.hosts.gen_peer_list(n).unwrap();
        jc.create_procs(&peers, Strategy::Ring).unwrap()
    }

    #[test]
    fn remote_command_quotes_only_when_needed() {
        let cmd = remote_command(&plan("A:1", 1)[0]);
        assert!(cmd.starts_with("env SWARM_CLUSTER_SIZE=1 "));
        assert!(cmd.contains("SWARM_PEERS=A:10000 "));
        assert!(cmd.ends_with("python3 train.py --name 'it'\\''s'"));
    }

    #[test]
    fn shell_quote_cases() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
    }

    #[tokio::test]
    async fn runs_every_spec_on_its_launch_host() {
        let exec = Arc::new(FakeExec {
            unreachable: "",
            exit_code: 0,
            calls: Mutex::new(Vec::new()),
        });
        let runner = RemoteRunner::new(exec.clone(), "ubuntu");
        let report = runner
            .run_all(&RunContext::background(), plan("A:1:pub-a,B:1", 2), false)
            .await;
        assert!(report.is_success());
        assert_eq!(report.results[0].host, "pub-a");
        assert_eq!(report.results[1].output.stdout, vec!["hello from B"]);

        let mut hosts: Vec<String> = exec.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect();
        hosts.sort();
        assert_eq!(hosts, vec!["B", "pub-a"]);
        assert!(exec.calls.lock().unwrap().iter().all(|c| c.2 == "ubuntu"));
    }

    #[tokio::test]
    async fn transport_failure_is_distinct_from_exit_code() {
        let exec = Arc::new(FakeExec {
            unreachable: "B",
            exit_code: 0,
            calls: Mutex::new(Vec::new()),
        });
        let report = RemoteRunner::new(exec, "u")
            .run_all(&RunContext::background(), plan("A:1,B:1", 2), false)
            .await;
        assert!(matches!(report.error, Some(RunError::TransportFailure { ref host, .. }) if host == "B"));
        assert!(report.results[0].error.is_none());
    }

    #[tokio::test]
    async fn non_zero_exit_is_process_failure() {
        let exec = Arc::new(FakeExec {
            unreachable: "",
            exit_code: 4,
            calls: Mutex::new(Vec::new()),
        });
        let report = RemoteRunner::new(exec, "u")
            .run_all(&RunContext::background(), plan("A:1", 1), false)
            .await;
        assert_eq!(
            report.error,
            Some(RunError::ProcessFailure {
                peer: "0@A:10000".to_string(),
                exit_code: 4
            })
        );
    }

    #[tokio::test]
    async fn expired_context_starts_nothing() {
        let exec = Arc::new(FakeExec {
            unreachable: "",
            exit_code: 0,
            calls: Mutex::new(Vec::new()),
        });
        let (ctx, handle) = RunContext::new();
        handle.cancel();
        let report = RemoteRunner::new(exec.clone(), "u")
            .run_all(&ctx, plan("A:2", 2), false)
            .await;
        assert_eq!(report.error, Some(RunError::CancellationExceeded));
        assert!(exec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn ssh_command_line() {
        let exec = SshExec::new(vec!["-p".to_string(), "2222".to_string()]);
        let cmd = exec.command("10.0.0.2", "env X=1 true", "ubuntu");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["-o", "BatchMode=yes", "-tt", "-p", "2222", "ubuntu@10.0.0.2", "env X=1 true"]
        );
    }
}
