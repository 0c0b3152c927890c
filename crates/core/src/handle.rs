use snafu::{OptionExt, ResultExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::attachment::AttachmentFile;
use super::composer::KeyPress;
use super::error::{JoinSnafu, SessionError, StoppedSnafu};
use super::ids::PeerId;
use super::scroll::ScrollMetrics;
use super::session::{SessionCommand, SessionController, SessionNotice, SessionSnapshot};

impl SessionController {
    /// Moves the controller onto its own task and returns the view-side handle.
    pub fn spawn(self) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(self.snapshot());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(command_rx, snapshot_tx, notice_tx));

        SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            notices: notice_rx,
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        snapshots: watch::Sender<SessionSnapshot>,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) {
        tracing::debug!(local_user_id = %self.local_user_id(), "session task started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.apply_command(command).await,
                },
                input = self.next_input() => {
                    self.apply_input(input).await;
                }
            }

            for notice in self.drain_notices() {
                let _ = notices.send(notice);
            }
            snapshots.send_replace(self.snapshot());
        }

        self.shutdown().await;
        snapshots.send_replace(self.snapshot());
        tracing::debug!("session task stopped");
    }
}

/// View-side end of a spawned session.
///
/// Dropping the handle stops the task, which detaches the live listener.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .ok()
            .context(StoppedSnafu {
                stage: "send-command",
            })
    }

    pub fn select_peer(&self, peer_id: Option<PeerId>) -> Result<(), SessionError> {
        self.send(SessionCommand::SelectPeer(peer_id))
    }

    pub fn retry_history(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RetryHistory)
    }

    pub fn scrolled(&self, metrics: ScrollMetrics) -> Result<(), SessionError> {
        self.send(SessionCommand::Scrolled(metrics))
    }

    pub fn jump_to_latest(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::JumpToLatest)
    }

    pub fn edit_draft(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::EditDraft(text.into()))
    }

    pub fn attach_file(&self, file: AttachmentFile) -> Result<(), SessionError> {
        self.send(SessionCommand::AttachFile(file))
    }

    pub fn remove_attachment(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RemoveAttachment)
    }

    pub fn key_pressed(&self, key: KeyPress) -> Result<(), SessionError> {
        self.send(SessionCommand::KeyPressed(key))
    }

    pub fn submit(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Submit)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub async fn next_notice(&mut self) -> Option<SessionNotice> {
        self.notices.recv().await
    }

    pub fn try_next_notice(&mut self) -> Option<SessionNotice> {
        self.notices.try_recv().ok()
    }

    /// Stops the task and waits until the listener is detached.
    pub async fn shutdown(mut self) -> Result<(), SessionError> {
        let _ = self.commands.send(SessionCommand::Shutdown);
        match self.task.take() {
            Some(task) => task.await.context(JoinSnafu {
                stage: "shutdown-session",
            }),
            None => Ok(()),
        }
    }
}
