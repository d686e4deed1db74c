//! Ownership of engine-allocated buffers.

use crate::table::ReleaseBufferFn;
use libc::c_void;

/// An engine-allocated buffer adopted by the binding.
///
/// `detectAndExtract` hands back buffers the engine allocated, and each one
/// must go through `releaseBuffer` exactly once. Adopting the raw pointer
/// immediately after the call ties that release to `Drop`, which covers
/// every exit path, validation failures included.
pub(crate) struct EngineBuf<T> {
    ptr: *mut T,
    len: usize,
    release: ReleaseBufferFn,
}

impl<T> EngineBuf<T> {
    /// Take ownership of an engine-allocated buffer of `len` elements.
    /// Returns `None` for a null pointer, meaning the engine allocated
    /// nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or an engine-allocated buffer holding at least
    /// `len` initialized elements, not yet released and not owned elsewhere.
    pub(crate) unsafe fn adopt(ptr: *mut T, len: usize, release: ReleaseBufferFn) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self { ptr, len, release })
        }
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        // SAFETY: adopt's contract guarantees `len` initialized elements at
        // `ptr`, valid for as long as self owns the buffer.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl<T> Drop for EngineBuf<T> {
    fn drop(&mut self) {
        // SAFETY: the pointer was adopted exactly once and is handed back
        // exactly once, here. The table's release entry outlives any buffer
        // adopted from it.
        unsafe { (self.release)(self.ptr as *mut c_void) }
    }
}
