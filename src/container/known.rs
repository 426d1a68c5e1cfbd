//! Enumeration of registered instances by type.

use std::any::TypeId;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::DiResult;
use crate::key::Key;

use super::{downcast, Container};

/// Iterator returned by [`Container::get_all_known_instances`].
///
/// Keys are snapshotted per container when the iterator first reaches it;
/// instances are resolved one at a time as the iterator advances.
pub struct KnownInstances<T: ?Sized> {
    current: Option<Container>,
    pending: VecDeque<Key>,
    loaded: bool,
    search_parents: bool,
    _type: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> KnownInstances<T> {
    pub(crate) fn new(container: Container, search_parents: bool) -> Self {
        Self {
            current: Some(container),
            pending: VecDeque::new(),
            loaded: false,
            search_parents,
            _type: PhantomData,
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Iterator for KnownInstances<T> {
    type Item = DiResult<(Arc<T>, Option<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let container = self.current.as_ref()?;
            if !self.loaded {
                self.pending = container.keys_of(TypeId::of::<T>()).into();
                self.loaded = true;
            }

            if let Some(key) = self.pending.pop_front() {
                let name = key.service_name().map(str::to_string);
                let item = container
                    .resolve_local(&key)
                    .and_then(downcast::<T>)
                    .map(|value| (value, name));
                return Some(item);
            }

            let next = if self.search_parents {
                container.parent().cloned()
            } else {
                None
            };
            self.current = next;
            self.loaded = false;
        }
    }
}
