// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Models each tool-server subprocess as an actor owning its stdio pipes,
//! per spec.md §9 design note ("model each tool server as an actor with an
//! inbox of `{method, params, reply-channel}` messages; the actor owns the
//! stdio pipes and serialises requests so the wire protocol's
//! request/response correlation is trivial").

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::wire::{parse_line, ClientMessage, ServerMessage};
use crate::domain::errors::ErrorKind;

/// Raw output captured during the launcher's startup-classification window
/// (spec.md §4.1 step 4): interleaved stdout+stderr lines plus whether the
/// child has already exited.
#[derive(Debug, Clone, Default)]
pub struct StartupOutput {
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
}

pub fn spawn_child(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<Child, ErrorKind> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::ProcessStartFailed(format!("command not found: {command}")),
        std::io::ErrorKind::PermissionDenied => ErrorKind::ProcessPermissionDenied,
        other => ErrorKind::ProcessStartFailed(format!("{other:?}: {e}")),
    })
}

type Pending = DashMap<String, oneshot::Sender<ServerMessage>>;
type UntaggedSlot = Arc<Mutex<Option<oneshot::Sender<ServerMessage>>>>;

/// Handle to a running actor. Cloning is cheap; every clone shares the same
/// request-sender and pending-reply map so the wire protocol's
/// request/response correlation stays trivial even with multiple callers.
#[derive(Clone, Debug)]
pub struct McpActorHandle {
    session_id: String,
    outbox: mpsc::UnboundedSender<String>,
    pending: Arc<Pending>,
    /// `hello`/`list_tools_response` carry no correlation id in the wire
    /// protocol (spec.md §6); the actor serialises calls per connection so
    /// exactly one untagged request is ever in flight at a time.
    untagged: UntaggedSlot,
    /// Kept alive so `kill_on_drop` doesn't fire the moment `attach()`
    /// returns; the reader/writer tasks already own stdin/stdout directly.
    child: Arc<tokio::sync::Mutex<Child>>,
}

impl McpActorHandle {
    /// Spawns the reader/writer tasks that own the child's stdio. Returns
    /// the handle plus a receiver for lines the child wrote to stderr after
    /// startup (informational only, surfaced as warnings by the caller).
    pub fn attach(mut child: Child) -> Result<Self, ErrorKind> {
        let stdin = child.stdin.take().ok_or_else(|| ErrorKind::InternalError("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ErrorKind::InternalError("no stdout".into()))?;

        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let untagged: UntaggedSlot = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let mut stdin = stdin;
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_untagged = untagged.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => match parse_line(&line) {
                        Ok(msg) => route_reply(&reader_pending, &reader_untagged, msg),
                        Err(e) => debug!(error = %e, "ignoring unparseable wire line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "mcp subprocess stdout read error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            outbox: tx,
            pending,
            untagged,
            child: Arc::new(tokio::sync::Mutex::new(child)),
        })
    }

    /// Kills the underlying subprocess. Safe to call more than once.
    pub async fn kill(&self) {
        let _ = self.child.lock().await.start_kill();
    }

    pub fn pid(&self) -> Option<u32> {
        // `try_lock` avoids blocking callers that only want a best-effort pid;
        // the reader/writer tasks never hold this lock for long.
        self.child.try_lock().ok().and_then(|c| c.id())
    }

    pub async fn send(&self, message: ClientMessage) -> Result<(), ErrorKind> {
        let line = message
            .to_line()
            .map_err(|e| ErrorKind::InternalError(format!("failed to encode wire message: {e}")))?;
        self.outbox
            .send(line)
            .map_err(|_| ErrorKind::ConnectionLost)
    }

    /// Sends a request keyed by a fresh correlation id and awaits its reply
    /// with a timeout, used for `list_tools`/`tool_call`/`hello`.
    pub async fn request(
        &self,
        id: String,
        message: ClientMessage,
        timeout: std::time::Duration,
    ) -> Result<ServerMessage, ErrorKind> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        self.send(message).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(ErrorKind::ConnectionLost),
            Err(_) => {
                self.pending.remove(&id);
                Err(ErrorKind::ConnectionTimeout)
            }
        }
    }

    /// Awaits the next untagged reply (`hello`/`list_tools_response`).
    /// Callers must serialise their own untagged requests; the actor does
    /// not queue more than one in flight.
    pub async fn request_untagged(
        &self,
        message: ClientMessage,
        timeout: std::time::Duration,
    ) -> Result<ServerMessage, ErrorKind> {
        let (tx, rx) = oneshot::channel();
        *self.untagged.lock() = Some(tx);
        self.send(message).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(ErrorKind::ConnectionLost),
            Err(_) => {
                self.untagged.lock().take();
                Err(ErrorKind::ConnectionTimeout)
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

fn route_reply(pending: &Pending, untagged: &UntaggedSlot, msg: ServerMessage) {
    if let ServerMessage::ToolResponse { id, .. } = &msg {
        if let Some((_, tx)) = pending.remove(id) {
            let _ = tx.send(msg);
            return;
        }
        return;
    }
    if let Some(tx) = untagged.lock().take() {
        let _ = tx.send(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_missing_command_is_process_start_failed() {
        let result = spawn_child("definitely-not-a-real-binary-xyz", &[], &HashMap::new());
        assert!(matches!(result, Err(ErrorKind::ProcessStartFailed(_))));
    }
}
