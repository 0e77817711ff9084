use std::collections::HashMap;
use std::sync::RwLock;

use crate::api::HandlerFn;

/// Task-type-keyed handler table. Registration is rare and takes the write
/// lock; lookups happen once per pulled task and take the read lock — the
/// "single coarse lock around the handler registry" the concurrency model
/// calls for.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<&'static str, Vec<HandlerFn>>>,
}

impl HandlerRegistry {
    pub(crate) fn register(&self, type_name: &'static str, handler: HandlerFn) {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .entry(type_name)
            .or_default()
            .push(handler);
    }

    /// Handlers registered for `type_name`, in registration order. Empty if
    /// none are registered.
    pub(crate) fn handlers_for(&self, type_name: &str) -> Vec<HandlerFn> {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .get(type_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop_handler(counter: Arc<AtomicUsize>) -> HandlerFn {
        Arc::new(
            move |_envelope: tapecore_task::TaskEnvelope, _ctx: crate::DispatchContext| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as BoxFuture<'static, anyhow::Result<()>>
            },
        )
    }

    #[test]
    fn multiple_handlers_per_type_preserve_registration_order() {
        let registry = HandlerRegistry::default();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register("Echo", noop_handler(counter.clone()));
        registry.register("Echo", noop_handler(counter.clone()));
        assert_eq!(registry.handlers_for("Echo").len(), 2);
        assert!(registry.handlers_for("Other").is_empty());
    }
}
