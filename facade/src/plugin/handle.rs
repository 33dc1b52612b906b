//! Module-bound Handles
//!
//! Objects created by a shared-library module carry vtables and drop glue
//! that live inside that library. A [`ModuleRef`] pairs such an object with a
//! [`ModuleGuard`], so the library stays mapped until the last handle to
//! anything it created is gone, even after its [`ModuleLoader`] has been torn
//! down.
//!
//! [`ModuleLoader`]: super::ModuleLoader

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use libloading::Library;
use tickflow_plugin_api::{Component, DataType};

/// Keeps a module's library mapped while held
///
/// Empty for static modules, which are never unloaded.
#[derive(Clone, Default)]
pub struct ModuleGuard {
    library: Option<Arc<Library>>,
}

impl ModuleGuard {
    pub(crate) fn new(library: Option<Arc<Library>>) -> Self {
        Self { library }
    }

    /// Check if this guard pins a shared library
    pub fn holds_library(&self) -> bool {
        self.library.is_some()
    }
}

impl fmt::Debug for ModuleGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleGuard")
            .field("holds_library", &self.holds_library())
            .finish()
    }
}

/// Shared handle to an object created by a module
pub struct ModuleRef<T: ?Sized> {
    value: Arc<T>,
    // Fields drop in declaration order: the object goes before the library.
    guard: ModuleGuard,
}

/// Component instance bound to its module
pub type ComponentRef = ModuleRef<dyn Component>;

/// Data type prototype bound to its module
pub type DataTypeRef = ModuleRef<dyn DataType>;

impl<T: ?Sized> ModuleRef<T> {
    pub fn new(value: Arc<T>, guard: ModuleGuard) -> Self {
        Self { value, guard }
    }

    /// Handle for an object that does not come from a shared library
    pub fn unguarded(value: Arc<T>) -> Self {
        Self::new(value, ModuleGuard::default())
    }

    pub fn guard(&self) -> &ModuleGuard {
        &self.guard
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.value, &other.value)
    }
}

impl ModuleRef<dyn Component> {
    /// Downcast to the concrete component type, keeping the module pinned.
    ///
    /// Returns the handle unchanged when the component is not a `U`.
    pub fn downcast<U: Any + Send + Sync>(self) -> Result<ModuleRef<U>, Self> {
        let ModuleRef { value, guard } = self;
        match value.clone().into_any_arc().downcast::<U>() {
            Ok(typed) => Ok(ModuleRef::new(typed, guard)),
            Err(_) => Err(ModuleRef::new(value, guard)),
        }
    }
}

impl<T: ?Sized> Deref for ModuleRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized> Clone for ModuleRef<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ModuleRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRef")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
