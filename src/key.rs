//! Dependency key types for the container.

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// Key for dependency storage and lookup.
///
/// A key is the pair `(type, optional name)`. The type may be a concrete
/// type or a trait object such as `dyn Logger`; the name lets several
/// registrations of the same type live side by side.
///
/// # Examples
///
/// ```rust
/// use reinject::Key;
///
/// trait Logger: Send + Sync {}
///
/// let plain = Key::of::<u32>();
/// let named = Key::named::<u32>("port");
/// let iface = Key::of::<dyn Logger>();
///
/// assert_ne!(plain, named);
/// assert_eq!(named.service_name(), Some("port"));
/// assert!(iface.display_name().contains("Logger"));
/// ```
#[derive(Debug, Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<Cow<'static, str>>,
}

impl Key {
    /// Unnamed key for `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            name: None,
        }
    }

    /// Named key for `T`.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::of::<T>().with_name(Some(name.into()))
    }

    /// Returns the same type key with a different (or no) name.
    pub fn with_name(mut self, name: Option<Cow<'static, str>>) -> Self {
        self.name = name;
        self
    }

    /// Get the type or trait name for display
    pub fn display_name(&self) -> &'static str {
        self.type_name
    }

    /// Get the service name for named keys, or None for unnamed keys
    pub fn service_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `TypeId` of the keyed type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Checks whether this key is for type `T`, whatever the name.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

// Equality ignores the type name string, TypeId is authoritative
impl PartialEq for Key {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for Key {}

impl std::hash::Hash for Key {
    #[inline(always)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}#{}", self.type_name, name),
            None => f.write_str(self.type_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    trait Greeter: Send + Sync {}

    #[test]
    fn keys_compare_by_type_and_name() {
        assert_eq!(Key::of::<u32>(), Key::of::<u32>());
        assert_ne!(Key::of::<u32>(), Key::of::<u64>());
        assert_ne!(Key::of::<u32>(), Key::named::<u32>("a"));
        assert_eq!(Key::named::<u32>("a"), Key::named::<u32>(String::from("a")));
        assert_ne!(Key::of::<dyn Greeter>(), Key::of::<u32>());
    }

    #[test]
    fn keys_hash_consistently() {
        let mut set = HashSet::new();
        set.insert(Key::named::<String>("x"));
        assert!(set.contains(&Key::named::<String>("x".to_string())));
        assert!(!set.contains(&Key::of::<String>()));
    }

    #[test]
    fn display_includes_name() {
        assert_eq!(Key::named::<u8>("port").to_string(), "u8#port");
        assert_eq!(Key::of::<u8>().to_string(), "u8");
    }
}
