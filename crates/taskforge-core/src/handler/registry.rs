//! Handler registry -- a named collection of available side-effect handlers,
//! keyed by [`TaskType`].
//!
//! The set of task types is closed per deployment; `CUSTOM` is the escape
//! hatch for handlers the embedding application registers itself (§4.4, §9).

use std::collections::HashMap;
use std::sync::Arc;

use taskforge_db::models::TaskType;

use super::trait_def::Handler;

/// A collection of registered [`Handler`] implementations, keyed by task type.
///
/// Handlers are stored behind `Arc` rather than `Box` so that [`Self::get`]
/// can hand the executor an owned, `'static` reference -- needed to spawn
/// the handler's `execute` call on its own task and catch a panic as a
/// `JoinError` (§4.3 step 9) without tying the spawned future's lifetime to
/// the registry's.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any existing handler for the same type
    /// and returns it.
    pub fn register(&mut self, handler: impl Handler + 'static) -> Option<Arc<dyn Handler>> {
        let task_type = handler.task_type();
        self.handlers.insert(task_type, Arc::new(handler))
    }

    /// Look up a handler by task type.
    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&task_type).cloned()
    }

    /// Return the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::result::{HandlerOutcome, ValidationError};
    use async_trait::async_trait;
    use taskforge_db::models::Task;

    struct FakeHandler {
        task_type: TaskType,
    }

    #[async_trait]
    impl Handler for FakeHandler {
        fn task_type(&self) -> TaskType {
            self.task_type
        }

        fn validate(&self, _task: &Task) -> Result<(), ValidationError> {
            Ok(())
        }

        async fn execute(&self, _task: &Task) -> HandlerOutcome {
            HandlerOutcome::success(serde_json::json!({}), Some(200))
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry.register(FakeHandler {
            task_type: TaskType::OrderCancel,
        });

        assert!(registry.get(TaskType::OrderCancel).is_some());
        assert!(registry.get(TaskType::PaymentRefund).is_none());
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = HandlerRegistry::new();
        let old = registry.register(FakeHandler {
            task_type: TaskType::OrderCancel,
        });
        assert!(old.is_none());

        let replaced = registry.register(FakeHandler {
            task_type: TaskType::OrderCancel,
        });
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);
    }
}
