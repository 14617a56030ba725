//! Shared element storage for images.
//!
//! Worker threads hold independent image handles over the same underlying
//! buffer and write to it concurrently. No element is locked: the scheduler
//! guarantees that concurrently processed chunks cover disjoint index ranges,
//! and the layout validation in [`ArrayImage`](crate::ArrayImage) guarantees
//! that distinct indices map to distinct offsets. Storage therefore only
//! needs to permit aliased raw access, which `UnsafeCell` provides.

use std::cell::UnsafeCell;

/// A fixed-length element buffer that may be read and written through shared
/// references.
///
/// # Safety
///
/// All accessors require that no two threads touch the same offset at the
/// same time. Callers uphold this via disjointness of the index ranges they
/// traverse, not via locking.
pub struct SharedStorage<T> {
    data: Box<[UnsafeCell<T>]>,
}

// Writing elements through `&SharedStorage` moves `T` values across threads,
// so `Sync` requires both `Send` and `Sync` of the element type.
unsafe impl<T: Send + Sync> Sync for SharedStorage<T> {}

impl<T> SharedStorage<T> {
    pub fn from_vec(data: Vec<T>) -> SharedStorage<T> {
        // `UnsafeCell<T>` has the same layout as `T`.
        let ptr = Box::into_raw(data.into_boxed_slice()) as *mut [UnsafeCell<T>];
        SharedStorage {
            data: unsafe { Box::from_raw(ptr) },
        }
    }

    /// Return the number of elements in the storage.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read the element at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be less than `len`, and no other thread may be writing
    /// the same offset.
    pub unsafe fn get(&self, offset: usize) -> T
    where
        T: Copy,
    {
        debug_assert!(offset < self.len());
        *self.data[offset].get()
    }

    /// Write the element at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be less than `len`, and no other thread may be reading
    /// or writing the same offset.
    pub unsafe fn set(&self, offset: usize, value: T) {
        debug_assert!(offset < self.len());
        *self.data[offset].get() = value;
    }

    /// Copy the entire buffer out in storage order.
    ///
    /// # Safety
    ///
    /// No other thread may be writing any element.
    pub unsafe fn to_vec(&self) -> Vec<T>
    where
        T: Copy,
    {
        self.data.iter().map(|cell| unsafe { *cell.get() }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::SharedStorage;

    #[test]
    fn test_get_set() {
        let storage = SharedStorage::from_vec(vec![0i32; 4]);
        assert_eq!(storage.len(), 4);

        // Safety: single-threaded, in-bounds.
        unsafe {
            storage.set(2, 7);
            assert_eq!(storage.get(2), 7);
            assert_eq!(storage.to_vec(), vec![0, 0, 7, 0]);
        }
    }
}
