use tokio_util::sync::CancellationToken;
use tracing::warn;

static CANCEL: tokio::sync::OnceCell<CancellationToken> = tokio::sync::OnceCell::const_new();

#[derive(Clone)]
pub struct Quit(CancellationToken);

impl Quit {
    /// Returns when the program has been asked to quit, by the OS or by one
    /// of its own tasks.
    pub async fn quit(&self) {
        self.0.cancelled().await
    }

    /// For blocking code that polls instead of awaiting.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }
}

#[cfg(unix)]
fn forward(cancel: &CancellationToken, kind: tokio::signal::unix::SignalKind, name: &'static str) {
    let cancel_tx = cancel.clone();
    match tokio::signal::unix::signal(kind) {
        Ok(mut sig) => {
            tokio::spawn(async move {
                sig.recv().await;
                cancel_tx.cancel();
            });
        }
        Err(e) => warn!("Couldn't install {name} handler: {e}"),
    }
}

pub async fn quit_watch() -> Quit {
    let cancel = CANCEL
        .get_or_init(|| async move {
            let cancel = CancellationToken::new();
            #[cfg(unix)]
            {
                use tokio::signal::unix::SignalKind;
                forward(&cancel, SignalKind::interrupt(), "SIGINT");
                forward(&cancel, SignalKind::hangup(), "SIGHUP");
                forward(&cancel, SignalKind::terminate(), "SIGTERM");
                forward(&cancel, SignalKind::pipe(), "SIGPIPE");
                forward(&cancel, SignalKind::quit(), "SIGQUIT");
            }
            #[cfg(not(unix))]
            {
                let cancel_tx = cancel.clone();
                tokio::spawn(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => cancel_tx.cancel(),
                        Err(e) => warn!("Couldn't listen for ctrl-c: {e}"),
                    }
                });
            }
            cancel
        })
        .await;

    Quit(cancel.clone())
}
