//! Audible feedback around dispatch
//!
//! Wraps another dispatcher: when the decision's scan kind has a success
//! melody, it is played after a successful dispatch and the failure melody
//! after a failed one. Kinds without a success melody pass straight through.

use crate::domain::{Decision, Melody, ScanKind};
use crate::io::buzzer::{play, Buzzer};
use crate::services::dispatcher::{DispatchError, Dispatcher};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct FeedbackDispatcher<D> {
    inner: D,
    buzzer: Arc<dyn Buzzer>,
    success: FxHashMap<ScanKind, Melody>,
    failure: Melody,
}

impl<D: Dispatcher> FeedbackDispatcher<D> {
    pub fn new(inner: D, buzzer: Arc<dyn Buzzer>, failure: Melody) -> Self {
        Self { inner, buzzer, success: FxHashMap::default(), failure }
    }

    pub fn with_success(mut self, kind: ScanKind, melody: Melody) -> Self {
        self.success.insert(kind, melody);
        self
    }

    async fn play(&self, melody: &Melody, decision: &Decision, outcome: &str) {
        debug!(
            barcode = %decision.barcode,
            outcome = %outcome,
            duration_ms = %melody.duration().as_millis(),
            "feedback_playing"
        );
        if let Err(e) = play(self.buzzer.as_ref(), melody).await {
            warn!(
                barcode = %decision.barcode,
                outcome = %outcome,
                error = %e,
                "feedback_playback_failed"
            );
        }
    }
}

#[async_trait]
impl<D: Dispatcher> Dispatcher for FeedbackDispatcher<D> {
    async fn dispatch(&self, decision: &Decision) -> Result<(), DispatchError> {
        let Some(success) = self.success.get(&decision.kind) else {
            return self.inner.dispatch(decision).await;
        };

        match self.inner.dispatch(decision).await {
            Ok(()) => {
                self.play(success, decision, "success").await;
                Ok(())
            }
            Err(e) => {
                self.play(&self.failure, decision, "failure").await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BuzzerKind, Tone};
    use parking_lot::Mutex;
    use std::io;

    #[derive(Default)]
    struct RecordingBuzzer {
        calls: Mutex<Vec<Option<Tone>>>,
        broken: bool,
    }

    #[async_trait]
    impl Buzzer for RecordingBuzzer {
        async fn set(&self, tone: Option<Tone>) -> io::Result<()> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such pin"));
            }
            self.calls.lock().push(tone);
            Ok(())
        }
    }

    struct FixedDispatcher {
        fail: bool,
    }

    #[async_trait]
    impl Dispatcher for FixedDispatcher {
        async fn dispatch(&self, decision: &Decision) -> Result<(), DispatchError> {
            if self.fail {
                Err(DispatchError::Unmapped(decision.kind))
            } else {
                Ok(())
            }
        }
    }

    fn tonal(source: &str) -> Melody {
        Melody::parse(source, BuzzerKind::Tonal).unwrap()
    }

    fn feedback(fail: bool, buzzer: Arc<RecordingBuzzer>) -> FeedbackDispatcher<FixedDispatcher> {
        FeedbackDispatcher::new(FixedDispatcher { fail }, buzzer, tonal("100.0/0.1/-"))
            .with_success(ScanKind::Double, tonal("1000.0/0.1/-"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_melody_after_dispatch() {
        let buzzer = Arc::new(RecordingBuzzer::default());
        let dispatcher = feedback(false, buzzer.clone());

        dispatcher.dispatch(&Decision::double("A")).await.unwrap();

        assert_eq!(*buzzer.calls.lock(), vec![Some(Tone::Hz(1000.0)), None, None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_melody_and_error_kept() {
        let buzzer = Arc::new(RecordingBuzzer::default());
        let dispatcher = feedback(true, buzzer.clone());

        let err = dispatcher.dispatch(&Decision::double("A")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Unmapped(ScanKind::Double)));
        assert_eq!(*buzzer.calls.lock(), vec![Some(Tone::Hz(100.0)), None, None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kind_without_melody_is_silent() {
        let buzzer = Arc::new(RecordingBuzzer::default());
        let dispatcher = feedback(true, buzzer.clone());

        assert!(dispatcher.dispatch(&Decision::single("A")).await.is_err());
        assert!(buzzer.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_error_does_not_fail_dispatch() {
        let buzzer = Arc::new(RecordingBuzzer { broken: true, ..Default::default() });
        let dispatcher = feedback(false, buzzer);

        assert!(dispatcher.dispatch(&Decision::double("A")).await.is_ok());
    }
}
