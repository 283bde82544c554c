use tokio::sync::mpsc;
use tracing::debug;

/// Host transitions after which pending pushes must be flushed.
///
/// Either may arrive first depending on the platform, and both flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// The host went to the background and may be killed without notice
  Hidden,
  /// The host is shutting down or navigating away
  Unload,
}

/// Produces lifecycle events from process signals, plus any the host sends
/// through [`LifecycleHandler::sender`].
pub struct LifecycleHandler {
  tx: mpsc::UnboundedSender<Lifecycle>,
  rx: mpsc::UnboundedReceiver<Lifecycle>,
}

impl LifecycleHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Ctrl-C
    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        debug!("Interrupt received");
        let _ = ctrl_c_tx.send(Lifecycle::Unload);
      }
    });

    // SIGTERM
    #[cfg(unix)]
    {
      use tokio::signal::unix::{signal, SignalKind};

      let term_tx = tx.clone();
      tokio::spawn(async move {
        if let Ok(mut term) = signal(SignalKind::terminate()) {
          if term.recv().await.is_some() {
            debug!("Terminate received");
            let _ = term_tx.send(Lifecycle::Unload);
          }
        }
      });
    }

    Self { tx, rx }
  }

  /// Sender for host-originated transitions (e.g. a window losing focus).
  pub fn sender(&self) -> mpsc::UnboundedSender<Lifecycle> {
    self.tx.clone()
  }

  /// Receive the next transition
  pub async fn next(&mut self) -> Option<Lifecycle> {
    self.rx.recv().await
  }
}

impl Default for LifecycleHandler {
  fn default() -> Self {
    Self::new()
  }
}
