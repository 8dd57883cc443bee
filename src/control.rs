//! Administrative triggers delivered as signals.
//!
//! SIGHUP asks for a rules reload and SIGUSR1 for a network refresh. Both
//! are forwarded to the engine loop as [`ControlCommand`]s; nothing here
//! touches engine state directly.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::ControlCommand;

/// Capacity of the control channel.
pub const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// Create the channel that feeds [`crate::engine::Engine::run`].
pub fn channel() -> (mpsc::Sender<ControlCommand>, mpsc::Receiver<ControlCommand>) {
    mpsc::channel(CONTROL_CHANNEL_CAPACITY)
}

/// Spawn a task that turns SIGHUP and SIGUSR1 into control commands.
///
/// The task ends when the receiving side is dropped.
#[cfg(unix)]
pub fn spawn_signal_listener(
    tx: mpsc::Sender<ControlCommand>,
) -> std::io::Result<Option<JoinHandle<()>>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;

    let handle = tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                Some(()) = hangup.recv() => ControlCommand::Reload,
                Some(()) = user1.recv() => ControlCommand::RefreshNetwork,
                else => break,
            };
            tracing::debug!(?command, "Signal received");
            if tx.send(command).await.is_err() {
                break;
            }
        }
    });

    Ok(Some(handle))
}

/// Signals are unix-only; elsewhere no listener is installed.
#[cfg(not(unix))]
pub fn spawn_signal_listener(
    _tx: mpsc::Sender<ControlCommand>,
) -> std::io::Result<Option<JoinHandle<()>>> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (tx, mut rx) = channel();
        tx.send(ControlCommand::Reload).await.unwrap();
        tx.send(ControlCommand::RefreshNetwork).await.unwrap();
        drop(tx);
        assert_eq!(rx.recv().await, Some(ControlCommand::Reload));
        assert_eq!(rx.recv().await, Some(ControlCommand::RefreshNetwork));
        assert_eq!(rx.recv().await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn listener_installs_on_unix() {
        let (tx, _rx) = channel();
        let handle = spawn_signal_listener(tx).unwrap();
        assert!(handle.is_some());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
