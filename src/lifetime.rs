//! Dependency lifetime definitions.

/// Lifetime strategies controlling instance reuse.
///
/// The set is closed; every registration picks exactly one.
///
/// | Lifetime        | Factory calls          | `clear()`            |
/// |-----------------|------------------------|----------------------|
/// | `Transient`     | every access           | nothing to forget    |
/// | `Cached`        | when the weak ref died | forgets the weak ref |
/// | `LazySingleton` | first access           | forgets the instance |
/// | `Singleton`     | never (value given)    | unaffected           |
///
/// # Examples
///
/// ```rust
/// use reinject::{Container, Lifetime};
/// use std::sync::Arc;
///
/// struct Database { url: String }
///
/// let container = Container::new("lifetime-doc");
/// container.add_singleton(Database { url: "postgres://localhost".into() }).unwrap();
/// container.add_transient_factory(|_| Ok(String::from("fresh"))).unwrap();
///
/// let a = container.get::<Database>().unwrap();
/// let b = container.get::<Database>().unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// let s1 = container.get::<String>().unwrap();
/// let s2 = container.get::<String>().unwrap();
/// assert!(!Arc::ptr_eq(&s1, &s2));
///
/// let dep = container.dependency(&reinject::Key::of::<Database>()).unwrap();
/// assert_eq!(dep.lifetime(), Lifetime::Singleton);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// New instance per resolution, never cached
    Transient,
    /// Instance held through a weak reference
    ///
    /// The factory runs again once every strong reference handed out has
    /// been dropped, or after the container cache was cleared.
    Cached,
    /// Created on first access and kept until the cache is cleared
    LazySingleton,
    /// Value supplied at registration time, never recreated
    ///
    /// Clearing the cache leaves it in place; only disposal removes it.
    Singleton,
}

impl Lifetime {
    /// Whether instances of this lifetime are retained by the container.
    ///
    /// Scopes never dispose these, the container does.
    pub fn is_singleton(self) -> bool {
        matches!(self, Lifetime::Singleton | Lifetime::LazySingleton)
    }
}
