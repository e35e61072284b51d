// Opaque handles handed out by the render interface
//
// Each resource kind gets its own newtype so a texture handle can never be
// passed where a command list is expected. Handles are never reused.

use crate::backend::BackendError;
use std::collections::HashMap;
use std::marker::PhantomData;

/// A typed integer handle naming one backend object
pub trait OpaqueHandle: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    /// Used in error messages
    const KIND: &'static str;

    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl OpaqueHandle for $name {
            const KIND: &'static str = $kind;

            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// A command list (recording object + fence)
    CmdListHandle,
    "command list"
);
opaque_handle!(TextureHandle, "texture");
opaque_handle!(
    /// A uniform or storage buffer
    BufferHandle,
    "buffer"
);
opaque_handle!(VertexBufferHandle, "vertex buffer");
opaque_handle!(IndexBufferHandle, "index buffer");

/// Owning table from typed handles to backend objects.
///
/// Handles start at 1 so a zeroed handle is never valid.
pub struct HandleTable<H: OpaqueHandle, T> {
    entries: HashMap<u64, T>,
    next: u64,
    _kind: PhantomData<H>,
}

impl<H: OpaqueHandle, T> HandleTable<H, T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
            _kind: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> H {
        let raw = self.next;
        self.next += 1;
        self.entries.insert(raw, value);
        H::from_raw(raw)
    }

    pub fn get(&self, handle: H) -> Result<&T, BackendError> {
        self.entries
            .get(&handle.raw())
            .ok_or(BackendError::UnknownHandle(H::KIND))
    }

    pub fn get_mut(&mut self, handle: H) -> Result<&mut T, BackendError> {
        self.entries
            .get_mut(&handle.raw())
            .ok_or(BackendError::UnknownHandle(H::KIND))
    }

    pub fn remove(&mut self, handle: H) -> Result<T, BackendError> {
        self.entries
            .remove(&handle.raw())
            .ok_or(BackendError::UnknownHandle(H::KIND))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut()
    }

    /// Removes every entry, in no particular order
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: OpaqueHandle, T> Default for HandleTable<H, T> {
    fn default() -> Self {
        Self::new()
    }
}
