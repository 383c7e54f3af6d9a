//! Keeps an externally owned verification prompt in front of other windows while a
//! hardware credential signs.

use std::{sync::Arc, time::Duration};

use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

/// The platform's user-verification prompt.
pub trait PromptWindow: Send + Sync {
    /// True while the prompt is on screen.
    fn is_present(&self) -> bool;

    fn bring_to_front(&self);
}

/// Prompt window for platforms where the prompt manages its own focus.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPromptWindow;

impl PromptWindow for NoPromptWindow {
    fn is_present(&self) -> bool {
        false
    }

    fn bring_to_front(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistConfig {
    pub poll_interval: Duration,
    /// Polls spent waiting for the prompt to appear before giving up.
    pub max_polls: u32,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_polls: 300,
        }
    }
}

/// How the assist task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistExit {
    /// The owning call finished and cancelled the helper.
    Cancelled,
    /// The prompt never appeared within the retry budget.
    GaveUp,
}

/// Background helper bound to one signing operation.
pub struct ForegroundAssist {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<AssistExit>,
}

impl ForegroundAssist {
    pub fn spawn(window: Arc<dyn PromptWindow>, config: AssistConfig) -> Self {
        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(run(window, config, cancelled));
        Self {
            cancel: Some(cancel),
            handle,
        }
    }

    /// Signal cancellation and wait for the helper to stop.
    pub async fn finish(mut self) -> AssistExit {
        if let Some(cancel) = self.cancel.take() {
            // The task may already have given up and dropped the receiver.
            let _ = cancel.send(());
        }
        match (&mut self.handle).await {
            Ok(exit) => exit,
            Err(err) => {
                warn!(error = %err, "foreground assist task failed");
                AssistExit::Cancelled
            }
        }
    }
}

async fn run(
    window: Arc<dyn PromptWindow>,
    config: AssistConfig,
    mut cancelled: oneshot::Receiver<()>,
) -> AssistExit {
    let mut polls = 0u32;
    loop {
        if window.is_present() {
            window.bring_to_front();
        } else {
            polls += 1;
            if polls > config.max_polls {
                debug!(polls, "verification prompt never appeared");
                return AssistExit::GaveUp;
            }
        }

        tokio::select! {
            _ = &mut cancelled => return AssistExit::Cancelled,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct FakePrompt {
        present: AtomicBool,
        raised: AtomicUsize,
    }

    impl PromptWindow for FakePrompt {
        fn is_present(&self) -> bool {
            self.present.load(Ordering::SeqCst)
        }

        fn bring_to_front(&self) {
            self.raised.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast() -> AssistConfig {
        AssistConfig {
            poll_interval: Duration::from_millis(1),
            max_polls: 5,
        }
    }

    #[tokio::test]
    async fn gives_up_when_prompt_never_appears() {
        let prompt = Arc::new(FakePrompt::default());
        let assist = ForegroundAssist::spawn(prompt.clone(), fast());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(assist.finish().await, AssistExit::GaveUp);
        assert_eq!(prompt.raised.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn raises_prompt_until_cancelled() {
        let prompt = Arc::new(FakePrompt::default());
        prompt.present.store(true, Ordering::SeqCst);
        let assist = ForegroundAssist::spawn(prompt.clone(), fast());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(assist.finish().await, AssistExit::Cancelled);
        assert!(prompt.raised.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn default_budget_is_thirty_seconds() {
        let config = AssistConfig::default();
        assert_eq!(config.poll_interval * config.max_polls, Duration::from_secs(30));
    }
}
