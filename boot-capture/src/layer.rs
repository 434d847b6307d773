//! Tracing layer feeding events into a [`Capture`] hub.

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use boot_types::Classification;

use crate::Capture;
use crate::format::ArgVisitor;

/// Target prefixes of the runtime's own diagnostics: the boot crates and
/// the protocol library underneath them.
const INTERNAL_PREFIXES: [&str; 2] = ["boot_", "rmcp"];

fn is_internal(target: &str) -> bool {
    INTERNAL_PREFIXES
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

/// Routes tracing events into the active capture session.
///
/// `ERROR` events are classified as error; every other level is info.
/// Events emitted by the boot crates and by rmcp are not captured, so the
/// runtime's own logging never lands in an invocation's output.
#[derive(Clone)]
pub struct CaptureLayer {
    capture: Capture,
}

impl CaptureLayer {
    pub(crate) fn new(capture: Capture) -> Self {
        Self { capture }
    }

    fn classify(level: &Level) -> Classification {
        if *level == Level::ERROR {
            Classification::Error
        } else {
            Classification::Info
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_internal(meta.target()) || !self.capture.is_active() {
            return;
        }
        let mut visitor = ArgVisitor::default();
        event.record(&mut visitor);
        self.capture
            .record(Self::classify(meta.level()), &visitor.into_line());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_level_is_error_everything_else_info() {
        assert_eq!(CaptureLayer::classify(&Level::ERROR), Classification::Error);
        for level in [Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            assert_eq!(CaptureLayer::classify(&level), Classification::Info);
        }
    }

    #[test]
    fn runtime_targets_are_internal() {
        assert!(is_internal("boot_runtime::orchestrator"));
        assert!(is_internal("rmcp::service"));
        assert!(!is_internal("weather_module"));
        assert!(!is_internal("boots"));
    }
}
