use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Number of events seen per level.
#[derive(Clone, Default)]
pub(crate) struct LevelCounts(Arc<Mutex<HashMap<Level, usize>>>);

impl LevelCounts {
    pub(crate) fn get(&self, level: Level) -> usize {
        self.0.lock().unwrap().get(&level).copied().unwrap_or(0)
    }
}

impl<S: Subscriber> Layer<S> for LevelCounts {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        *self
            .0
            .lock()
            .unwrap()
            .entry(*event.metadata().level())
            .or_default() += 1;
    }
}

/// Count events emitted on this thread until the guard is dropped.
pub(crate) fn capture_levels() -> (LevelCounts, DefaultGuard) {
    let counts = LevelCounts::default();
    let subscriber = tracing_subscriber::registry().with(counts.clone());
    (counts, tracing::subscriber::set_default(subscriber))
}
