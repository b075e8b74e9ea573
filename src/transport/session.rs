//! Endpoint session - starts `iblocksync-remote` on a host
//!
//! Provides a channel over the child's stdin/stdout. Protocol handling is
//! done by the sync session.

use crate::config::EndpointSpec;
use crate::error::{IoResultExt, Peer, Result, SyncError};
use crate::transport::channel::Channel;
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Which endpoint program to start on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Source,
    Writer,
}

impl EndpointRole {
    pub fn as_arg(&self) -> &'static str {
        match self {
            EndpointRole::Source => "source",
            EndpointRole::Writer => "writer",
        }
    }

    pub fn peer(&self) -> Peer {
        match self {
            EndpointRole::Source => Peer::Source,
            EndpointRole::Writer => Peer::Writer,
        }
    }
}

/// Child channel type
pub type ProcessChannel = Channel<ChildStdout, ChildStdin>;

/// A running endpoint process
pub struct EndpointSession {
    role: EndpointRole,
    child: Child,
    channel: ProcessChannel,
}

/// Build the argv used to start an endpoint.
///
/// `ssh [-i key] [user@]host [sudo] <remote> <role> <path>`; a `localhost`
/// endpoint runs without ssh.
pub fn endpoint_command(spec: &EndpointSpec, role: EndpointRole, remote_command: &str) -> Vec<String> {
    let mut argv = Vec::new();
    if !spec.host.is_local() {
        argv.push("ssh".to_string());
        if let Some(key) = &spec.identity_file {
            argv.push("-i".to_string());
            argv.push(key.to_string_lossy().into_owned());
        }
        argv.push(spec.host.to_string());
    }
    if spec.sudo {
        argv.push("sudo".to_string());
    }
    argv.push(remote_command.to_string());
    argv.push(role.as_arg().to_string());
    argv.push(spec.path.to_string_lossy().into_owned());
    argv
}

impl EndpointSession {
    pub async fn spawn(
        spec: &EndpointSpec,
        role: EndpointRole,
        remote_command: &str,
    ) -> Result<Self> {
        let argv = endpoint_command(spec, role, remote_command);
        debug!(?argv, "starting {} endpoint", role.as_arg());

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .io_context(|| format!("failed to spawn `{}`", argv.join(" ")))?;

        let stdin = child.stdin.take().ok_or_else(|| SyncError::PeerDied {
            peer: role.peer(),
            context: "stdin not available".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SyncError::PeerDied {
            peer: role.peer(),
            context: "stdout not available".to_string(),
        })?;

        Ok(Self {
            role,
            child,
            channel: Channel::new(role.peer(), stdout, stdin),
        })
    }

    pub fn channel(&mut self) -> &mut ProcessChannel {
        &mut self.channel
    }

    /// Close our end and wait for the endpoint to exit cleanly.
    pub async fn finish(self) -> Result<()> {
        let Self {
            role,
            mut child,
            mut channel,
        } = self;
        channel.shutdown().await?;
        drop(channel);

        let status = child
            .wait()
            .await
            .io_context(|| format!("waiting for {} endpoint", role.as_arg()))?;

        if status.success() {
            Ok(())
        } else {
            Err(SyncError::PeerDied {
                peer: role.peer(),
                context: format!("exited with {}", status),
            })
        }
    }
}
