//! Owning wrapper for raw Vulkan handles.
//!
//! Vulkan destructors have heterogeneous signatures: some take only the
//! handle, most need the owning device, a few need a device plus the pool
//! the object was allocated from. `OwningHandle` binds a handle to a deleter
//! closure capturing exactly the parent context its destroy call needs, and
//! guarantees the deleter runs exactly once, never on a null handle.

use ash::vk;
use vk::Handle;

/// A raw Vulkan handle bound to its destructor.
///
/// Ownership is move-only; a moved-from wrapper is never dropped, so the
/// deleter runs at most once across any sequence of moves. `replace` is the
/// sole mutation path, so a partially-constructed handle can never leak.
pub struct OwningHandle<T: Handle + Copy + 'static> {
    raw: T,
    deleter: Option<Box<dyn Fn(T)>>,
}

impl<T: Handle + Copy + 'static> OwningHandle<T> {
    /// Wrap a handle with a deleter closure.
    ///
    /// # Safety
    /// `raw` must be a valid handle created from whatever parent objects the
    /// closure captures, and must no longer be in use by the device when the
    /// wrapper drops.
    pub unsafe fn new(raw: T, deleter: impl Fn(T) + 'static) -> Self {
        Self {
            raw,
            deleter: Some(Box::new(deleter)),
        }
    }

    /// Wrap a handle whose destructor takes only the handle.
    ///
    /// # Safety
    /// Same contract as [`OwningHandle::new`].
    pub unsafe fn bare(raw: T, destroy: fn(T)) -> Self {
        unsafe { Self::new(raw, move |h| destroy(h)) }
    }

    /// Wrap a handle whose destructor needs the owning device.
    ///
    /// This is the common shape: buffers, images, views, samplers, render
    /// passes, pipelines, layouts and pools are all destroyed this way.
    ///
    /// # Safety
    /// Same contract as [`OwningHandle::new`]; `raw` must have been created
    /// from `device`.
    pub unsafe fn device_scoped(
        raw: T,
        device: &ash::Device,
        destroy: fn(&ash::Device, T),
    ) -> Self {
        let device = device.clone();
        unsafe { Self::new(raw, move |h| destroy(&device, h)) }
    }

    /// Wrap a handle whose destructor needs the device and the pool the
    /// object was allocated from, freeing a single item.
    ///
    /// # Safety
    /// Same contract as [`OwningHandle::new`]; `raw` must have been allocated
    /// from `pool` on `device`.
    pub unsafe fn pool_scoped(
        raw: T,
        device: &ash::Device,
        pool: vk::CommandPool,
        free: fn(&ash::Device, vk::CommandPool, T),
    ) -> Self {
        let device = device.clone();
        unsafe { Self::new(raw, move |h| free(&device, pool, h)) }
    }

    /// A null wrapper holding no handle and no deleter.
    pub fn null() -> Self {
        Self {
            raw: T::from_raw(0),
            deleter: None,
        }
    }

    /// Get the raw handle.
    pub fn raw(&self) -> T {
        self.raw
    }

    /// Whether the wrapper currently holds no handle.
    pub fn is_null(&self) -> bool {
        self.raw.as_raw() == 0
    }

    /// Destroy the currently held handle (if any) and store a new one.
    ///
    /// # Safety
    /// The current handle must no longer be in use; `raw` must satisfy the
    /// contract of the deleter bound at construction.
    pub unsafe fn replace(&mut self, raw: T) {
        self.release();
        self.raw = raw;
    }

    /// Transfer the raw handle out, nulling the wrapper without destroying.
    pub fn take(&mut self) -> T {
        std::mem::replace(&mut self.raw, T::from_raw(0))
    }

    fn release(&mut self) {
        if self.raw.as_raw() == 0 {
            return;
        }
        let deleter = self
            .deleter
            .as_ref()
            .expect("non-null handle has no deleter bound");
        deleter(self.raw);
        self.raw = T::from_raw(0);
    }
}

impl<T: Handle + Copy + 'static> Drop for OwningHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(count: &Arc<AtomicUsize>) -> impl Fn(vk::Buffer) + 'static {
        let count = Arc::clone(count);
        move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn deleter_runs_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _handle =
                unsafe { OwningHandle::new(vk::Buffer::from_raw(1), counting(&count)) };
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn moves_do_not_double_release() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let a = unsafe { OwningHandle::new(vk::Buffer::from_raw(1), counting(&count)) };
            let b = a;
            let c = b;
            assert!(!c.is_null());
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn null_handle_never_invokes_deleter() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _handle =
                unsafe { OwningHandle::new(vk::Buffer::from_raw(0), counting(&count)) };
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(OwningHandle::<vk::Buffer>::null());
    }

    #[test]
    fn bare_deleter_takes_only_the_handle() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn destroy(_: vk::Buffer) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        drop(unsafe { OwningHandle::bare(vk::Buffer::from_raw(3), destroy) });
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn take_transfers_ownership_out() {
        let count = Arc::new(AtomicUsize::new(0));
        let raw;
        {
            let mut handle =
                unsafe { OwningHandle::new(vk::Buffer::from_raw(7), counting(&count)) };
            raw = handle.take();
            assert!(handle.is_null());
        }
        assert_eq!(raw.as_raw(), 7);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replace_releases_previous_handle() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut handle =
                unsafe { OwningHandle::new(vk::Buffer::from_raw(1), counting(&count)) };
            unsafe { handle.replace(vk::Buffer::from_raw(2)) };
            assert_eq!(count.load(Ordering::SeqCst), 1);
            assert_eq!(handle.raw().as_raw(), 2);
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
