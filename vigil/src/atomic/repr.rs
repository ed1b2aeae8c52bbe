//! Width dispatch for [`SharedAtomic`](super::SharedAtomic).
//!
//! Every cell operation funnels through the unsigned integer of the same
//! width as the stored value. The hardware does not care what the bits mean;
//! working on the unsigned image is exactly what the compiler's atomic
//! builtins do for non-fundamental types anyway, and it gives one code path
//! for integers, floats, pointers, and packed records alike.
//!
//! The backing cells come from `portable-atomic`, which mirrors the std API
//! across every width. The 128-bit image is only compiled in where 16-byte
//! atomics are statically lock-free: a locked fallback would be invisible to
//! other processes mapping the same bytes, which is the one failure mode this
//! crate exists to rule out.

use core::sync::atomic::Ordering;

mod sealed {
    pub trait Sealed {}
}

/// An unsigned integer the cell can operate on atomically.
///
/// Implemented for `u8`, `u16`, `u32`, `u64`, `usize`, and — on targets with
/// statically lock-free 16-byte atomics — `u128`. The methods act on a raw
/// pointer into the cell's storage so that no reference to the wrapped value
/// type is ever materialized.
///
/// Sealed: the set of images is fixed by what the hardware can do.
pub trait Repr: sealed::Sealed + Copy + Eq {
    #[doc(hidden)]
    unsafe fn atomic_load(ptr: *mut Self, order: Ordering) -> Self;
    #[doc(hidden)]
    unsafe fn atomic_store(ptr: *mut Self, value: Self, order: Ordering);
    #[doc(hidden)]
    unsafe fn atomic_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    #[doc(hidden)]
    unsafe fn atomic_compare_exchange(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    #[doc(hidden)]
    unsafe fn atomic_compare_exchange_weak(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    #[doc(hidden)]
    unsafe fn atomic_add(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    #[doc(hidden)]
    unsafe fn atomic_sub(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    #[doc(hidden)]
    unsafe fn atomic_and(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    #[doc(hidden)]
    unsafe fn atomic_or(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    #[doc(hidden)]
    unsafe fn atomic_xor(ptr: *mut Self, value: Self, order: Ordering) -> Self;
}

macro_rules! impl_repr {
    ($($(#[$attr:meta])* $int:ty => $atom:ty),* $(,)?) => {$(
        $(#[$attr])*
        impl sealed::Sealed for $int {}

        $(#[$attr])*
        impl Repr for $int {
            #[inline]
            unsafe fn atomic_load(ptr: *mut Self, order: Ordering) -> Self {
                // SAFETY: the caller hands us a valid, naturally aligned cell.
                unsafe { <$atom>::from_ptr(ptr).load(order) }
            }

            #[inline]
            unsafe fn atomic_store(ptr: *mut Self, value: Self, order: Ordering) {
                // SAFETY: as above.
                unsafe { <$atom>::from_ptr(ptr).store(value, order) }
            }

            #[inline]
            unsafe fn atomic_swap(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                unsafe { <$atom>::from_ptr(ptr).swap(value, order) }
            }

            #[inline]
            unsafe fn atomic_compare_exchange(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                // SAFETY: as above.
                unsafe {
                    <$atom>::from_ptr(ptr).compare_exchange(current, new, success, failure)
                }
            }

            #[inline]
            unsafe fn atomic_compare_exchange_weak(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                // SAFETY: as above.
                unsafe {
                    <$atom>::from_ptr(ptr).compare_exchange_weak(current, new, success, failure)
                }
            }

            #[inline]
            unsafe fn atomic_add(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                unsafe { <$atom>::from_ptr(ptr).fetch_add(value, order) }
            }

            #[inline]
            unsafe fn atomic_sub(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                unsafe { <$atom>::from_ptr(ptr).fetch_sub(value, order) }
            }

            #[inline]
            unsafe fn atomic_and(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                unsafe { <$atom>::from_ptr(ptr).fetch_and(value, order) }
            }

            #[inline]
            unsafe fn atomic_or(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                unsafe { <$atom>::from_ptr(ptr).fetch_or(value, order) }
            }

            #[inline]
            unsafe fn atomic_xor(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                unsafe { <$atom>::from_ptr(ptr).fetch_xor(value, order) }
            }
        }
    )*};
}

impl_repr! {
    u8 => portable_atomic::AtomicU8,
    u16 => portable_atomic::AtomicU16,
    u32 => portable_atomic::AtomicU32,
    u64 => portable_atomic::AtomicU64,
    usize => portable_atomic::AtomicUsize,
    #[cfg(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    ))]
    u128 => portable_atomic::AtomicU128,
}
