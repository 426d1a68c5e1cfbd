//! Circular dependency detection infrastructure.

use std::cell::RefCell;

use crate::error::{DiError, DiResult};
use crate::key::Key;

const MAX_DEPTH: usize = 256;

// Keys currently being constructed on this thread, outermost first
thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<Key>> = const { RefCell::new(Vec::new()) };
}

/// Marks a key as "under construction" for as long as the guard lives.
///
/// Entering a key that is already on the current thread's stack yields
/// [`DiError::Circular`] with the full path, e.g. `A -> B -> A`.
pub(crate) struct ResolutionGuard {
    key: Key,
}

impl ResolutionGuard {
    pub(crate) fn enter(key: &Key) -> DiResult<Self> {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            if stack.iter().any(|k| k == key) {
                let mut path: Vec<String> = stack.iter().map(Key::to_string).collect();
                path.push(key.to_string());
                return Err(DiError::Circular(path));
            }

            if stack.len() >= MAX_DEPTH {
                return Err(DiError::DepthExceeded(stack.len()));
            }

            stack.push(key.clone());
            Ok(Self { key: key.clone() })
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(last) = stack.pop() {
                debug_assert_eq!(last, self.key);
            }
        });
    }
}
