//! Construction options for units and for the keyed entry point.

use std::sync::Arc;

/// Equality predicate used to suppress redundant update notifications.
pub type IsEqual<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

pub(crate) type UpdateFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Options for [`Unit::new`](crate::Unit::new) and [`Runtime::unit`](crate::Runtime::unit).
///
/// ```ignore
/// let config = UnitConfig::new()
///     .key("pagination")
///     .default_value(Page::loading())
///     .is_equal(|a: &Page, b: &Page| a.revision == b.revision);
/// ```
pub struct UnitConfig<T> {
    pub(crate) key: Option<String>,
    pub(crate) default_value: Option<T>,
    pub(crate) is_equal: Option<IsEqual<T>>,
}

impl<T> Default for UnitConfig<T> {
    fn default() -> Self {
        Self {
            key: None,
            default_value: None,
            is_equal: None,
        }
    }
}

impl<T> UnitConfig<T> {
    /// Defaults: generated key, no default value, `PartialEq` equality.
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit identity key. Generated from the runtime's prefix and a
    /// counter when absent.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Value restored by `reset_value()` and served to reads of a suspended or
    /// unmounted unit that has no value of its own.
    pub fn default_value(mut self, value: T) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Custom equality. Results equal to the current value do not notify.
    pub fn is_equal<F>(mut self, is_equal: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.is_equal = Some(Arc::new(is_equal));
        self
    }
}

impl<U: ?Sized + Send + Sync + 'static> UnitConfig<Arc<U>> {
    /// Compare results by pointer identity instead of by value.
    pub fn by_identity(self) -> Self {
        self.is_equal(|a: &Arc<U>, b: &Arc<U>| Arc::ptr_eq(a, b))
    }
}

/// Options for [`Runtime::keyed`](crate::Runtime::keyed).
///
/// A bare key converts into a config with every other option at its default:
///
/// ```ignore
/// let unit = runtime.keyed("list-pagination", paginate)?;
///
/// let unit = runtime.keyed(
///     KeyedConfig::new("list-pagination").on_update(|page: &Page| redraw(page)),
///     paginate,
/// )?;
/// ```
pub struct KeyedConfig<T> {
    pub(crate) key: String,
    pub(crate) on_update: Option<UpdateFn<T>>,
    pub(crate) unit: UnitConfig<T>,
}

impl<T> KeyedConfig<T> {
    /// Config for `key` with no listener and default unit options.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            on_update: None,
            unit: UnitConfig::default(),
        }
    }

    /// Subscribe `listener` to the unit when it is first created. Ignored on
    /// later calls that find the unit already registered.
    pub fn on_update<F>(mut self, listener: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(listener));
        self
    }

    /// See [`UnitConfig::default_value`].
    pub fn default_value(mut self, value: T) -> Self {
        self.unit = self.unit.default_value(value);
        self
    }

    /// See [`UnitConfig::is_equal`].
    pub fn is_equal<F>(mut self, is_equal: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.unit = self.unit.is_equal(is_equal);
        self
    }
}

impl<T> From<&str> for KeyedConfig<T> {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl<T> From<String> for KeyedConfig<T> {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}
