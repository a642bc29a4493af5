//! Address represents a raw heap address as a thin newtype over `usize`. The
//! goal, following the teacher crate's own `util::address::Address`, is to do
//! address arithmetic in a way that is mostly safe while marking the actual
//! memory access (`load`/`store`) unsafe.

use std::fmt;
use std::ops::{Add, AddAssign, BitAnd, Sub, SubAssign};

/// size in bytes
pub type ByteSize = usize;

#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq)]
pub struct Address(usize);

impl Address {
    pub const ZERO: Address = Address(0);

    #[inline(always)]
    pub const fn from_usize(v: usize) -> Self {
        Address(v)
    }

    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    #[inline(always)]
    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    #[inline(always)]
    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    #[inline(always)]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Is this address aligned to `align` (a power of two)?
    #[inline(always)]
    pub fn is_aligned_to(self, align: usize) -> bool {
        debug_assert!(align.is_power_of_two());
        (self.0 & (align - 1)) == 0
    }

    #[inline(always)]
    pub fn align_down(self, align: usize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address(self.0 & !(align - 1))
    }

    /// Read a `T` from this address. The caller must ensure the address is
    /// valid, aligned, and within a live allocation for the lifetime of the
    /// borrow this produces.
    ///
    /// # Safety
    /// See above.
    #[inline(always)]
    pub unsafe fn load<T: Copy>(self) -> T {
        std::ptr::read(self.to_ptr::<T>())
    }

    /// # Safety
    /// See [`Address::load`].
    #[inline(always)]
    pub unsafe fn store<T>(self, value: T) {
        std::ptr::write(self.to_mut_ptr::<T>(), value)
    }
}

impl Add<ByteSize> for Address {
    type Output = Address;
    #[inline(always)]
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

impl AddAssign<ByteSize> for Address {
    #[inline(always)]
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

impl Sub<ByteSize> for Address {
    type Output = Address;
    #[inline(always)]
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

impl SubAssign<ByteSize> for Address {
    #[inline(always)]
    fn sub_assign(&mut self, offset: ByteSize) {
        self.0 -= offset;
    }
}

impl Sub<Address> for Address {
    type Output = ByteSize;
    #[inline(always)]
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(self.0 >= other.0);
        self.0 - other.0
    }
}

impl BitAnd<usize> for Address {
    type Output = usize;
    #[inline(always)]
    fn bitand(self, mask: usize) -> usize {
        self.0 & mask
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        let a = Address::from_usize(0x1_0000);
        assert!(a.is_aligned_to(0x1_0000));
        assert!(!a.is_aligned_to(0x2_0000));
        assert_eq!((a + 1usize).align_down(0x1_0000), a);
    }

    #[test]
    fn arithmetic() {
        let a = Address::from_usize(0x1000);
        let b = a + 0x10usize;
        assert_eq!(b - a, 0x10);
    }
}
