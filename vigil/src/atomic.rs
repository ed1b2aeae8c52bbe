//! A lock-free atomic cell that is safe to place in memory shared between
//! processes.
//!
//! Std's atomics are fine inside shared memory once they exist there, but
//! getting them to *exist* there is the awkward part: a region produced by
//! `mmap` or by another process never ran a Rust constructor, and nothing in
//! their contract says a pile of zero bytes is a valid atomic. [`SharedAtomic`]
//! is built around exactly that contract:
//!
//! - it has the size and alignment of the value it stores, with no hidden
//!   fields, so it can sit at a known offset in a mapped region;
//! - its default state is all-zero bytes, and a pre-zeroed region
//!   reinterpreted as a cell (via [`SharedAtomic::from_ptr`]) is
//!   indistinguishable from a default-constructed one;
//! - it has no destructor, so a process dying with the region mapped leaves
//!   nothing dangling.
//!
//! # Which types fit
//!
//! Storage is restricted to [`AtomicValue`] types: plain bitwise data whose
//! width the target can handle lock-free (1, 2, 4, 8, or — on targets with
//! statically lock-free 16-byte atomics — 16 bytes, naturally aligned). The
//! crate implements it for the fixed-width integers, `usize`/`isize`, `bool`,
//! `f32`/`f64`, thin raw pointers, and [`ProcId`](crate::proc_id::ProcId).
//! Arithmetic and bitwise operations are further gated by
//! [`AtomicArithmetic`] and [`AtomicBitwise`], so `fetch_or` on an `f64`
//! simply does not compile.
//!
//! # Basic usage
//!
//! ```
//! use std::sync::atomic::Ordering;
//! use vigil::SharedAtomic;
//!
//! let cell = SharedAtomic::new(41u32);
//! assert_eq!(cell.fetch_add(1, Ordering::SeqCst), 41);
//! assert_eq!(cell.load(Ordering::SeqCst), 42);
//! ```
//!
//! Placement over a region another process (or the kernel's zero-fill)
//! produced:
//!
//! ```
//! use std::mem::MaybeUninit;
//! use std::sync::atomic::Ordering;
//! use vigil::SharedAtomic;
//!
//! let mut region = MaybeUninit::<u64>::zeroed();
//! // SAFETY: the region is zero-filled, writable, and naturally aligned.
//! let cell = unsafe { SharedAtomic::<u64>::from_ptr(region.as_mut_ptr()) };
//! assert_eq!(cell.load(Ordering::SeqCst), 0);
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use core::mem::{self, MaybeUninit};
use core::sync::atomic::Ordering;

mod repr;

pub use repr::Repr;

/// Marker for types a [`SharedAtomic`] can hold.
///
/// # Safety
///
/// Implementers must guarantee all of the following:
///
/// - `Self` is plain data: `Copy`, no drop glue, no references or lifetimes,
///   no resources beyond its own bytes. Two values are equal exactly when
///   their bytes are.
/// - `Self` has the same size **and alignment** as [`Self::Repr`], with no
///   padding. Atomic hardware operates on naturally aligned words; the cell
///   const-asserts this, so a mismatch fails the build rather than the run.
/// - Every bit pattern the cell will ever hold is a valid `Self`. In
///   particular the all-zero pattern, which is the cell's default state and
///   the state of a freshly mapped shared region.
///
/// The last point is a contract with every process touching the cell, not
/// just this one: a cooperating process must only store patterns that are
/// valid for the type (relevant for `bool`, irrelevant for integers).
pub unsafe trait AtomicValue: Copy {
    /// The unsigned integer with the same size and alignment as `Self`.
    type Repr: Repr;
}

/// Values supporting atomic `fetch_add` / `fetch_sub`.
///
/// Implemented for the integers (wrapping arithmetic), the floats (by
/// compare-exchange loop, the same strategy compilers lower atomic float
/// addition to), and thin raw pointers (element-count deltas). `bool` is
/// deliberately excluded.
///
/// # Safety
///
/// The implementations must be genuine read-modify-write operations on the
/// cell; this trait exists to gate [`SharedAtomic`] methods and is not meant
/// to be implemented outside the crate.
pub unsafe trait AtomicArithmetic: AtomicValue {
    /// The delta type: the value itself for numbers, an element count for
    /// pointers.
    type Delta: Copy;

    #[doc(hidden)]
    fn fetch_add_impl(cell: &SharedAtomic<Self>, delta: Self::Delta, order: Ordering) -> Self;
    #[doc(hidden)]
    fn fetch_sub_impl(cell: &SharedAtomic<Self>, delta: Self::Delta, order: Ordering) -> Self;
}

/// Integers supporting atomic `fetch_and` / `fetch_or` / `fetch_xor`.
///
/// # Safety
///
/// Same contract as [`AtomicArithmetic`]; not meant to be implemented
/// outside the crate.
pub unsafe trait AtomicBitwise: AtomicValue {
    #[doc(hidden)]
    fn fetch_and_impl(cell: &SharedAtomic<Self>, mask: Self, order: Ordering) -> Self;
    #[doc(hidden)]
    fn fetch_or_impl(cell: &SharedAtomic<Self>, mask: Self, order: Ordering) -> Self;
    #[doc(hidden)]
    fn fetch_xor_impl(cell: &SharedAtomic<Self>, mask: Self, order: Ordering) -> Self;
}

/// An atomic cell with the representation of its value type.
///
/// See the [module documentation](self) for the shared-memory contract. The
/// operations mirror std's atomics: every method takes an explicit
/// [`Ordering`], compare-exchange returns `Result<T, T>` with the observed
/// value in the `Err` case, and orderings that are illegal for an operation
/// (an `Acquire` store, say) panic just as they do on `AtomicUsize`.
///
/// The cell is never `Clone`: cross-thread and cross-process publication
/// happens through atomic stores, not value copies.
#[repr(transparent)]
pub struct SharedAtomic<T: AtomicValue> {
    value: UnsafeCell<T>,
}

// SAFETY: all access to the inner value goes through atomic operations on
// its unsigned image, so shared references never produce data races.
unsafe impl<T: AtomicValue + Send> Sync for SharedAtomic<T> {}

impl<T: AtomicValue> SharedAtomic<T> {
    // Post-monomorphization check of the AtomicValue layout contract.
    const LAYOUT: () = {
        assert!(mem::size_of::<T>() == mem::size_of::<T::Repr>());
        assert!(mem::align_of::<T>() == mem::align_of::<T::Repr>());
    };

    /// Creates a cell holding `value`.
    #[inline]
    #[must_use]
    pub const fn new(value: T) -> Self {
        let () = Self::LAYOUT;
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Creates a cell in the all-zero state.
    ///
    /// Observationally identical to reinterpreting `size_of::<T>()` zero
    /// bytes as a cell.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        // SAFETY: AtomicValue requires the all-zero pattern to be a valid T.
        Self::new(unsafe { MaybeUninit::zeroed().assume_init() })
    }

    /// Reinterprets existing storage as a cell.
    ///
    /// This is the placement path for shared regions: the bytes at `ptr` may
    /// have been produced by the kernel's zero-fill or by another process,
    /// and no constructor needs to have run there.
    ///
    /// # Safety
    ///
    /// - `ptr` must be non-null, aligned for `T`, and valid for reads and
    ///   writes of `size_of::<T>()` bytes for the returned lifetime.
    /// - The bytes at `ptr` must be a valid `T` (all-zero always qualifies).
    /// - For the returned lifetime, the storage must only be accessed
    ///   through cells — never through a live `&T` or `&mut T`.
    #[inline]
    #[must_use]
    pub const unsafe fn from_ptr<'a>(ptr: *mut T) -> &'a Self {
        let () = Self::LAYOUT;
        // SAFETY: repr(transparent) over UnsafeCell<T>; the caller vouches
        // for validity, alignment, and exclusive-via-atomics access.
        unsafe { &*ptr.cast::<Self>() }
    }

    /// Returns a cell view of an exclusively borrowed value.
    #[inline]
    pub fn from_mut(value: &mut T) -> &mut Self {
        let () = Self::LAYOUT;
        // SAFETY: repr(transparent); the unique borrow is carried over.
        unsafe { &mut *core::ptr::from_mut(value).cast::<Self>() }
    }

    /// Non-atomic initialization of a cell that has never been touched.
    ///
    /// Writes the bytes directly, without an atomic store. Intended for
    /// setting up a region before it is published to other threads or
    /// processes.
    ///
    /// # Safety
    ///
    /// No other thread or process may access the cell concurrently, and the
    /// cell must not have been the target of any prior atomic operation.
    /// Calling this twice on the same cell, or after any atomic access, is a
    /// contract violation even when it happens not to misbehave.
    #[inline]
    pub unsafe fn init(&self, value: T) {
        // SAFETY: the caller guarantees exclusive access.
        unsafe { self.value.get().write(value) }
    }

    /// Mutable access to the value; no atomics needed through `&mut`.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consumes the cell and returns the value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    #[inline]
    fn image(&self) -> *mut T::Repr {
        self.value.get().cast()
    }

    /// Atomically loads the value.
    ///
    /// Panics on `Release` or `AcqRel`.
    #[inline]
    #[must_use]
    pub fn load(&self, order: Ordering) -> T {
        // SAFETY: the cell owns valid, aligned storage.
        from_image(unsafe { T::Repr::atomic_load(self.image(), order) })
    }

    /// Atomically stores `value`.
    ///
    /// Panics on `Acquire` or `AcqRel`.
    #[inline]
    pub fn store(&self, value: T, order: Ordering) {
        // SAFETY: as in `load`.
        unsafe { T::Repr::atomic_store(self.image(), to_image(value), order) }
    }

    /// Atomically replaces the value, returning the previous one.
    #[inline]
    pub fn swap(&self, value: T, order: Ordering) -> T {
        // SAFETY: as in `load`.
        from_image(unsafe { T::Repr::atomic_swap(self.image(), to_image(value), order) })
    }

    /// Stores `new` if the current value is bitwise equal to `current`.
    ///
    /// On success returns `Ok` with the previous value; on failure returns
    /// `Err` with the value actually observed, which the cell still holds.
    /// `failure` must not be stronger than `success` and must be a valid
    /// load ordering.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: T,
        new: T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T, T> {
        // SAFETY: as in `load`.
        unsafe {
            T::Repr::atomic_compare_exchange(
                self.image(),
                to_image(current),
                to_image(new),
                success,
                failure,
            )
        }
        .map(from_image)
        .map_err(from_image)
    }

    /// Like [`compare_exchange`](Self::compare_exchange), but may fail
    /// spuriously even when the comparison would succeed, in exchange for
    /// cheaper code inside retry loops.
    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: T,
        new: T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T, T> {
        // SAFETY: as in `load`.
        unsafe {
            T::Repr::atomic_compare_exchange_weak(
                self.image(),
                to_image(current),
                to_image(new),
                success,
                failure,
            )
        }
        .map(from_image)
        .map_err(from_image)
    }

    /// Retries `f` over compare-exchange until it sticks or `f` gives up.
    ///
    /// Returns `Ok` with the previous value if an update was stored, `Err`
    /// with the latest observation once `f` returns `None`.
    pub fn fetch_update<F>(&self, set_order: Ordering, fetch_order: Ordering, mut f: F) -> Result<T, T>
    where
        F: FnMut(T) -> Option<T>,
    {
        let mut prev = self.load(fetch_order);
        while let Some(next) = f(prev) {
            match self.compare_exchange_weak(prev, next, set_order, fetch_order) {
                Ok(prev) => return Ok(prev),
                Err(seen) => prev = seen,
            }
        }
        Err(prev)
    }
}

impl<T: AtomicArithmetic> SharedAtomic<T> {
    /// Atomically adds `delta`, returning the previous value.
    ///
    /// Integers wrap; floats follow IEEE addition; pointers step by whole
    /// elements, like [`pointer::wrapping_offset`].
    #[inline]
    pub fn fetch_add(&self, delta: T::Delta, order: Ordering) -> T {
        T::fetch_add_impl(self, delta, order)
    }

    /// Atomically subtracts `delta`, returning the previous value.
    #[inline]
    pub fn fetch_sub(&self, delta: T::Delta, order: Ordering) -> T {
        T::fetch_sub_impl(self, delta, order)
    }
}

impl<T: AtomicBitwise> SharedAtomic<T> {
    /// Atomically applies bitwise AND, returning the previous value.
    #[inline]
    pub fn fetch_and(&self, mask: T, order: Ordering) -> T {
        T::fetch_and_impl(self, mask, order)
    }

    /// Atomically applies bitwise OR, returning the previous value.
    #[inline]
    pub fn fetch_or(&self, mask: T, order: Ordering) -> T {
        T::fetch_or_impl(self, mask, order)
    }

    /// Atomically applies bitwise XOR, returning the previous value.
    #[inline]
    pub fn fetch_xor(&self, mask: T, order: Ordering) -> T {
        T::fetch_xor_impl(self, mask, order)
    }
}

impl<T: AtomicValue> Default for SharedAtomic<T> {
    /// The all-zero cell, same as [`SharedAtomic::zeroed`].
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<T: AtomicValue + fmt::Debug> fmt::Debug for SharedAtomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedAtomic")
            .field(&self.load(Ordering::SeqCst))
            .finish()
    }
}

#[inline]
fn to_image<T: AtomicValue>(value: T) -> T::Repr {
    // SAFETY: AtomicValue guarantees identical size; the image is the
    // value's bytes, nothing more.
    unsafe { mem::transmute_copy(&value) }
}

#[inline]
fn from_image<T: AtomicValue>(image: T::Repr) -> T {
    // SAFETY: images only ever come from `to_image` (or from a cooperating
    // process doing the same), so the pattern is valid for T per the
    // AtomicValue contract.
    unsafe { mem::transmute_copy(&image) }
}

/// The load-compatible ordering implied by an arbitrary read-modify-write
/// ordering, for the observation half of a compare-exchange loop.
fn load_order(order: Ordering) -> Ordering {
    match order {
        Ordering::Release | Ordering::Relaxed => Ordering::Relaxed,
        Ordering::AcqRel => Ordering::Acquire,
        other => other,
    }
}

fn rmw_loop<T, F>(cell: &SharedAtomic<T>, order: Ordering, mut f: F) -> T
where
    T: AtomicValue,
    F: FnMut(T) -> T,
{
    let mut prev = cell.load(load_order(order));
    loop {
        match cell.compare_exchange_weak(prev, f(prev), order, load_order(order)) {
            Ok(prev) => return prev,
            Err(seen) => prev = seen,
        }
    }
}

macro_rules! impl_atomic_value {
    ($($(#[$attr:meta])* $ty:ty => $repr:ty),* $(,)?) => {$(
        $(#[$attr])*
        // SAFETY: same width and alignment as the image; plain bitwise data.
        unsafe impl AtomicValue for $ty {
            type Repr = $repr;
        }
    )*};
}

impl_atomic_value! {
    u8 => u8,
    i8 => u8,
    u16 => u16,
    i16 => u16,
    u32 => u32,
    i32 => u32,
    u64 => u64,
    i64 => u64,
    usize => usize,
    isize => usize,
    f32 => u32,
    f64 => u64,
    // Zero is `false`; cooperating processes only ever store real booleans.
    bool => u8,
    #[cfg(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    ))]
    u128 => u128,
    #[cfg(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    ))]
    i128 => u128,
}

// SAFETY: thin pointers have the size and alignment of usize, and any
// address pattern is a valid pointer value. An address is only meaningful to
// the process that produced it; publishing one through shared memory is the
// caller's own affair.
unsafe impl<U> AtomicValue for *mut U {
    type Repr = usize;
}

// SAFETY: as for *mut U.
unsafe impl<U> AtomicValue for *const U {
    type Repr = usize;
}

macro_rules! impl_integer_ops {
    ($($(#[$attr:meta])* $ty:ty),* $(,)?) => {$(
        $(#[$attr])*
        // SAFETY: arithmetic on the unsigned image is two's-complement
        // wrapping arithmetic, bit-identical to the signed interpretation.
        unsafe impl AtomicArithmetic for $ty {
            type Delta = $ty;

            #[inline]
            fn fetch_add_impl(cell: &SharedAtomic<Self>, delta: Self, order: Ordering) -> Self {
                // SAFETY: the cell owns valid, aligned storage.
                from_image(unsafe {
                    <Self as AtomicValue>::Repr::atomic_add(cell.image(), to_image(delta), order)
                })
            }

            #[inline]
            fn fetch_sub_impl(cell: &SharedAtomic<Self>, delta: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                from_image(unsafe {
                    <Self as AtomicValue>::Repr::atomic_sub(cell.image(), to_image(delta), order)
                })
            }
        }

        $(#[$attr])*
        // SAFETY: bitwise operations are representation-level already.
        unsafe impl AtomicBitwise for $ty {
            #[inline]
            fn fetch_and_impl(cell: &SharedAtomic<Self>, mask: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                from_image(unsafe {
                    <Self as AtomicValue>::Repr::atomic_and(cell.image(), to_image(mask), order)
                })
            }

            #[inline]
            fn fetch_or_impl(cell: &SharedAtomic<Self>, mask: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                from_image(unsafe {
                    <Self as AtomicValue>::Repr::atomic_or(cell.image(), to_image(mask), order)
                })
            }

            #[inline]
            fn fetch_xor_impl(cell: &SharedAtomic<Self>, mask: Self, order: Ordering) -> Self {
                // SAFETY: as above.
                from_image(unsafe {
                    <Self as AtomicValue>::Repr::atomic_xor(cell.image(), to_image(mask), order)
                })
            }
        }
    )*};
}

impl_integer_ops! {
    u8, i8, u16, i16, u32, i32, u64, i64, usize, isize,
    #[cfg(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    ))]
    u128,
    #[cfg(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    ))]
    i128,
}

macro_rules! impl_float_ops {
    ($($ty:ty),* $(,)?) => {$(
        // SAFETY: no native float fetch_add exists; the compare-exchange
        // loop below is the standard lowering and is a true RMW.
        unsafe impl AtomicArithmetic for $ty {
            type Delta = $ty;

            #[inline]
            fn fetch_add_impl(cell: &SharedAtomic<Self>, delta: Self, order: Ordering) -> Self {
                rmw_loop(cell, order, |v| v + delta)
            }

            #[inline]
            fn fetch_sub_impl(cell: &SharedAtomic<Self>, delta: Self, order: Ordering) -> Self {
                rmw_loop(cell, order, |v| v - delta)
            }
        }
    )*};
}

impl_float_ops!(f32, f64);

// SAFETY: element-count deltas scaled to bytes on the usize image; the same
// wrapping address arithmetic as `wrapping_offset`.
unsafe impl<U> AtomicArithmetic for *mut U {
    type Delta = isize;

    #[inline]
    fn fetch_add_impl(cell: &SharedAtomic<Self>, delta: isize, order: Ordering) -> Self {
        let bytes = (delta as usize).wrapping_mul(mem::size_of::<U>());
        // SAFETY: the cell owns valid, aligned storage.
        from_image(unsafe { usize::atomic_add(cell.image(), bytes, order) })
    }

    #[inline]
    fn fetch_sub_impl(cell: &SharedAtomic<Self>, delta: isize, order: Ordering) -> Self {
        let bytes = (delta as usize).wrapping_mul(mem::size_of::<U>());
        // SAFETY: as above.
        from_image(unsafe { usize::atomic_sub(cell.image(), bytes, order) })
    }
}

// SAFETY: as for *mut U.
unsafe impl<U> AtomicArithmetic for *const U {
    type Delta = isize;

    #[inline]
    fn fetch_add_impl(cell: &SharedAtomic<Self>, delta: isize, order: Ordering) -> Self {
        let bytes = (delta as usize).wrapping_mul(mem::size_of::<U>());
        // SAFETY: the cell owns valid, aligned storage.
        from_image(unsafe { usize::atomic_add(cell.image(), bytes, order) })
    }

    #[inline]
    fn fetch_sub_impl(cell: &SharedAtomic<Self>, delta: isize, order: Ordering) -> Self {
        let bytes = (delta as usize).wrapping_mul(mem::size_of::<U>());
        // SAFETY: as above.
        from_image(unsafe { usize::atomic_sub(cell.image(), bytes, order) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering::{Relaxed, SeqCst};

    #[test]
    fn has_the_layout_of_its_value() {
        assert_eq!(mem::size_of::<SharedAtomic<u8>>(), 1);
        assert_eq!(mem::size_of::<SharedAtomic<u32>>(), 4);
        assert_eq!(mem::size_of::<SharedAtomic<u64>>(), 8);
        assert_eq!(mem::align_of::<SharedAtomic<u32>>(), mem::align_of::<u32>());
        assert_eq!(mem::align_of::<SharedAtomic<u64>>(), mem::align_of::<u64>());
        assert_eq!(
            mem::size_of::<SharedAtomic<*mut u8>>(),
            mem::size_of::<usize>()
        );
    }

    #[test]
    fn default_is_all_zero() {
        assert_eq!(SharedAtomic::<u64>::default().load(SeqCst), 0);
        assert_eq!(SharedAtomic::<i32>::default().load(SeqCst), 0);
        assert!(!SharedAtomic::<bool>::default().load(SeqCst));
        assert_eq!(SharedAtomic::<f64>::default().load(SeqCst), 0.0);
    }

    #[test]
    fn zeroed_region_is_a_valid_cell() {
        let mut region = MaybeUninit::<u32>::zeroed();
        // SAFETY: zero-filled, aligned, exclusively ours.
        let cell = unsafe { SharedAtomic::<u32>::from_ptr(region.as_mut_ptr()) };

        assert_eq!(cell.load(SeqCst), 0);
        assert_eq!(cell.fetch_add(7, SeqCst), 0);
        assert_eq!(cell.load(SeqCst), 7);
        assert_eq!(cell.fetch_add(3, SeqCst), 7);
        assert_eq!(cell.load(SeqCst), 10);
    }

    #[test]
    fn init_populates_an_untouched_cell() {
        let mut region = MaybeUninit::<u64>::zeroed();
        // SAFETY: zero-filled, aligned, exclusively ours.
        let cell = unsafe { SharedAtomic::<u64>::from_ptr(region.as_mut_ptr()) };
        // SAFETY: no concurrent access, no prior atomic operation.
        unsafe { cell.init(99) };
        assert_eq!(cell.load(SeqCst), 99);
    }

    #[test]
    fn store_then_load() {
        let cell = SharedAtomic::new(5u64);
        cell.store(17, SeqCst);
        assert_eq!(cell.load(SeqCst), 17);
    }

    #[test]
    fn swap_returns_previous() {
        let cell = SharedAtomic::new(1u32);
        assert_eq!(cell.swap(2, SeqCst), 1);
        assert_eq!(cell.load(SeqCst), 2);
    }

    #[test]
    fn compare_exchange_success_and_failure() {
        let cell = SharedAtomic::new(10i32);

        assert_eq!(cell.compare_exchange(10, 20, SeqCst, SeqCst), Ok(10));
        assert_eq!(cell.load(SeqCst), 20);

        // Mismatch: the Err carries the observed value, state unchanged.
        assert_eq!(cell.compare_exchange(10, 30, SeqCst, SeqCst), Err(20));
        assert_eq!(cell.load(SeqCst), 20);
    }

    #[test]
    fn weak_compare_exchange_loop_converges() {
        let cell = SharedAtomic::new(0u64);
        let mut cur = cell.load(Relaxed);
        loop {
            match cell.compare_exchange_weak(cur, cur + 1, SeqCst, Relaxed) {
                Ok(_) => break,
                Err(seen) => cur = seen,
            }
        }
        assert_eq!(cell.load(SeqCst), 1);
    }

    #[test]
    fn fetch_update_applies_or_gives_up() {
        let cell = SharedAtomic::new(4u32);
        assert_eq!(cell.fetch_update(SeqCst, Relaxed, |v| Some(v * 2)), Ok(4));
        assert_eq!(cell.load(SeqCst), 8);
        assert_eq!(cell.fetch_update(SeqCst, Relaxed, |_| None), Err(8));
        assert_eq!(cell.load(SeqCst), 8);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let cell = SharedAtomic::new(250u8);
        assert_eq!(cell.fetch_add(10, SeqCst), 250);
        assert_eq!(cell.load(SeqCst), 4);
        assert_eq!(cell.fetch_sub(10, SeqCst), 4);
        assert_eq!(cell.load(SeqCst), 250);
    }

    #[test]
    fn signed_arithmetic() {
        let cell = SharedAtomic::new(-5i64);
        assert_eq!(cell.fetch_add(3, SeqCst), -5);
        assert_eq!(cell.load(SeqCst), -2);
        assert_eq!(cell.fetch_sub(-2, SeqCst), -2);
        assert_eq!(cell.load(SeqCst), 0);
    }

    #[test]
    fn bitwise_laws() {
        let cell = SharedAtomic::new(0b1100u32);
        assert_eq!(cell.fetch_and(0b1010, SeqCst), 0b1100);
        assert_eq!(cell.load(SeqCst), 0b1000);
        assert_eq!(cell.fetch_or(0b0011, SeqCst), 0b1000);
        assert_eq!(cell.load(SeqCst), 0b1011);
        assert_eq!(cell.fetch_xor(0b1111, SeqCst), 0b1011);
        assert_eq!(cell.load(SeqCst), 0b0100);
    }

    #[test]
    fn float_arithmetic() {
        let cell = SharedAtomic::new(1.5f64);
        assert_eq!(cell.fetch_add(2.25, SeqCst), 1.5);
        assert_eq!(cell.load(SeqCst), 3.75);
        assert_eq!(cell.fetch_sub(0.75, SeqCst), 3.75);
        assert_eq!(cell.load(SeqCst), 3.0);
    }

    #[test]
    fn pointer_arithmetic_steps_by_elements() {
        let mut arr = [0u32; 8];
        let base = arr.as_mut_ptr();
        let cell = SharedAtomic::new(base);

        assert_eq!(cell.fetch_add(3, SeqCst), base);
        // SAFETY: still inside the array.
        assert_eq!(cell.load(SeqCst), unsafe { base.add(3) });

        // SAFETY: as above.
        assert_eq!(cell.fetch_sub(2, SeqCst), unsafe { base.add(3) });
        // SAFETY: as above.
        assert_eq!(cell.load(SeqCst), unsafe { base.add(1) });
    }

    #[test]
    fn bool_swap_and_cas() {
        let cell = SharedAtomic::new(false);
        assert!(!cell.swap(true, SeqCst));
        assert!(cell.load(SeqCst));
        assert_eq!(cell.compare_exchange(true, false, SeqCst, SeqCst), Ok(true));
        assert!(!cell.load(SeqCst));
    }

    #[test]
    fn exclusive_access_skips_atomics() {
        let mut cell = SharedAtomic::new(7u32);
        *cell.get_mut() = 9;
        assert_eq!(cell.into_inner(), 9);

        let mut value = 3u64;
        SharedAtomic::from_mut(&mut value).store(4, SeqCst);
        assert_eq!(value, 4);
    }

    #[test]
    fn concurrent_fetch_add_is_exact() {
        const THREADS: usize = 8;
        const ITERS: u64 = 10_000;

        let cell = SharedAtomic::new(0u64);
        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ITERS {
                        cell.fetch_add(1, SeqCst);
                    }
                });
            }
        });
        assert_eq!(cell.load(SeqCst), THREADS as u64 * ITERS);
    }

    #[test]
    fn debug_shows_the_value() {
        let cell = SharedAtomic::new(42u32);
        assert_eq!(format!("{cell:?}"), "SharedAtomic(42)");
    }
}
