//! Change watcher adapter: observes filesystem events under the managed
//! directory and requests a debounced rebuild.
//!
//! Rebuilds are cheap full reconstructions, so the only job here is to
//! collapse event bursts: one rebuild request per burst, fired after the
//! quiet period has elapsed with no further events.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Keeps the underlying filesystem watcher alive. Dropping it stops the
/// event stream; the debounce task then drains and exits.
pub struct BankWatcher {
    _watcher: RecommendedWatcher,
}

/// Watches `dir` recursively for markdown events and sends one `()` on
/// `rebuild_tx` per debounced burst.
pub fn watch_bank(
    dir: &Path,
    debounce: Duration,
    rebuild_tx: mpsc::Sender<()>,
) -> Result<BankWatcher> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if event.paths.iter().any(|path| is_markdown(path)) {
                    let _ = event_tx.send(());
                }
            }
            Err(err) => warn!(?err, "bank watcher error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::Recursive)?;
    debug!(dir = %dir.display(), "bank watcher installed");

    tokio::spawn(debounce_events(event_rx, debounce, rebuild_tx));
    Ok(BankWatcher { _watcher: watcher })
}

fn is_markdown(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("md")
}

/// An event arriving mid-window replaces the pending timer; two timers never
/// coexist. The window is measured from the last event in a burst.
async fn debounce_events(
    mut events: mpsc::UnboundedReceiver<()>,
    window: Duration,
    rebuild_tx: mpsc::Sender<()>,
) {
    while events.recv().await.is_some() {
        loop {
            tokio::select! {
                more = events.recv() => {
                    if more.is_none() {
                        // Watcher dropped mid-burst: flush the pending rebuild.
                        let _ = rebuild_tx.send(()).await;
                        return;
                    }
                    // Burst continues; the window restarts.
                }
                _ = tokio::time::sleep(window) => break,
            }
        }
        if rebuild_tx.send(()).await.is_err() {
            return;
        }
    }
    debug!("bank watcher event stream closed");
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_rebuild() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (rebuild_tx, mut rebuild_rx) = mpsc::channel(16);
        tokio::spawn(debounce_events(event_rx, WINDOW, rebuild_tx));

        for _ in 0..5 {
            event_tx.send(()).unwrap();
            advance(50).await;
        }
        // Mid-burst: nothing fired yet.
        assert!(rebuild_rx.try_recv().is_err());

        advance(250).await;
        rebuild_rx.recv().await.unwrap();
        assert!(rebuild_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn event_mid_window_resets_the_window() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (rebuild_tx, mut rebuild_rx) = mpsc::channel(16);
        tokio::spawn(debounce_events(event_rx, WINDOW, rebuild_tx));

        event_tx.send(()).unwrap();
        advance(150).await;
        assert!(rebuild_rx.try_recv().is_err());

        // Restart the window just before it elapses.
        event_tx.send(()).unwrap();
        advance(150).await;
        assert!(rebuild_rx.try_recv().is_err());

        advance(100).await;
        rebuild_rx.recv().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_fire_separately() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (rebuild_tx, mut rebuild_rx) = mpsc::channel(16);
        tokio::spawn(debounce_events(event_rx, WINDOW, rebuild_tx));

        event_tx.send(()).unwrap();
        advance(250).await;
        rebuild_rx.recv().await.unwrap();

        event_tx.send(()).unwrap();
        advance(250).await;
        rebuild_rx.recv().await.unwrap();
        assert!(rebuild_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_rebuild_flushes_on_close() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (rebuild_tx, mut rebuild_rx) = mpsc::channel(16);
        tokio::spawn(debounce_events(event_rx, WINDOW, rebuild_tx));

        event_tx.send(()).unwrap();
        advance(50).await;
        drop(event_tx);

        rebuild_rx.recv().await.unwrap();
        assert!(rebuild_rx.recv().await.is_none());
    }

    #[test]
    fn markdown_filter() {
        assert!(is_markdown(Path::new("/bank/note.md")));
        assert!(!is_markdown(Path::new("/bank/note.txt")));
        assert!(!is_markdown(Path::new("/bank/subdir")));
    }
}
