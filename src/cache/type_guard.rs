//! Type Guard Module
//!
//! Runtime enforcement of a store's declared key and value types at the
//! type-erased boundary.

use std::any::{self, Any, TypeId};
use std::fmt;

use crate::error::{Result, Role, StoreError};

// == Type Token ==
/// Declared-type marker carried in a store's configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    /// Token for the type `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Human readable type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if `input` is an instance of this type.
    pub fn admits(&self, input: &dyn Erased) -> bool {
        input.as_any().type_id() == self.id
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken({})", self.name)
    }
}

// == Erased ==
/// A value whose concrete type is only known at runtime.
///
/// Every `'static + Send + Sync` type is `Erased`; callers pass
/// `&"key"` or `&1u32` wherever an `&dyn Erased` is expected.
pub trait Erased: Any + Send + Sync {
    /// Name of the concrete type.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> Erased for T {
    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for dyn Erased {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Erased({})", self.type_name())
    }
}

// == Type Guard ==
/// Validates erased keys and values against the declared types.
///
/// Checks are pure: they never touch the slot table, so a rejected call
/// leaves the store exactly as it was.
#[derive(Debug, Clone, Copy)]
pub struct TypeGuard {
    key_type: TypeToken,
    value_type: TypeToken,
}

impl TypeGuard {
    pub fn new(key_type: TypeToken, value_type: TypeToken) -> Self {
        Self {
            key_type,
            value_type,
        }
    }

    pub fn key_type(&self) -> TypeToken {
        self.key_type
    }

    pub fn value_type(&self) -> TypeToken {
        self.value_type
    }

    // == Check Key ==
    /// Admits `key` as a `K`, or rejects it.
    ///
    /// A null key is `InvalidKey` whatever the declared type; a key of the
    /// wrong type is `TypeMismatch`.
    pub fn check_key<'a, K: Any>(&self, key: Option<&'a dyn Erased>) -> Result<&'a K> {
        let key = key.ok_or(StoreError::InvalidKey)?;
        admit(self.key_type, Role::Key, key)
    }

    // == Check Value ==
    /// Admits `value` as a `V`, or rejects it.
    pub fn check_value<'a, V: Any>(&self, value: Option<&'a dyn Erased>) -> Result<&'a V> {
        let value = value.ok_or(StoreError::InvalidValue)?;
        admit(self.value_type, Role::Value, value)
    }
}

fn admit<'a, T: Any>(declared: TypeToken, role: Role, input: &'a dyn Erased) -> Result<&'a T> {
    let mismatch = || StoreError::TypeMismatch {
        role,
        declared: declared.name(),
        actual: input.type_name(),
    };

    if !declared.admits(input) {
        return Err(mismatch());
    }
    input.as_any().downcast_ref::<T>().ok_or_else(mismatch)
}
