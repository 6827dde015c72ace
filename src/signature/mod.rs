//! # Signature
//!
//! Describes the function pointer types a thunk can produce.
//!
//! [`Signature`] is implemented for `extern "C" fn(A0, .., An) -> R` with up to 12 arguments (and
//! `extern "stdcall" fn` on 32-bit x86), where every argument implements [`Argument`] and the
//! return type implements [`ReturnValue`]. The implementation also supplies the family of
//! dispatch routines (see [`dispatch`]) that the generated trampolines call into.

use std::mem;
use std::ptr::NonNull;

use crate::thunk::Slot;

pub use self::dispatch::{DispatchVariant, Displacement};

pub mod dispatch;

/// Semantic class of an argument, which decides the register file it travels in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgClass {
    /// Integer values, including `bool`
    Integer,
    /// Addresses
    Pointer,
    /// `f32` and `f64`
    Float,
}

/// Class and size of a single argument
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArgType {
    /// Register class the argument belongs to
    pub class: ArgClass,
    /// Size of the argument in bytes
    pub size: usize,
}

impl ArgType {
    /// Describes an argument of type `T`
    pub const fn of<T>(class: ArgClass) -> Self {
        Self {
            class,
            size: mem::size_of::<T>(),
        }
    }

    /// Returns whether the argument is an integer or address no wider than `word` bytes
    pub const fn is_word_integer(&self, word: usize) -> bool {
        matches!(self.class, ArgClass::Integer | ArgClass::Pointer) && self.size <= word
    }

    /// Returns whether the argument is floating point
    pub const fn is_float(&self) -> bool {
        matches!(self.class, ArgClass::Float)
    }
}

/// Calling convention of the produced function pointer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Convention {
    /// The platform's C convention; the caller removes stack arguments
    C,
    /// 32-bit x86 `stdcall`; the callee removes stack arguments
    Stdcall,
}

/// Scalar types that can be passed to a thunk
///
/// # Safety
///
/// `TYPE` must describe how the platform's C ABI passes `Self`. Implementing this for aggregates
/// or anything wider than two machine words produces trampolines that scramble arguments.
pub unsafe trait Argument: Copy + 'static {
    /// Class and size of `Self`
    const TYPE: ArgType;
}

/// Types that can be returned from a thunk
///
/// Only register-returned values are allowed so no hidden struct-return pointer shifts the
/// argument registers.
pub trait ReturnValue: 'static {}

impl ReturnValue for () {}
impl<T: Argument> ReturnValue for T {}

/// Implements [`Argument`] for a list of types sharing a class
macro_rules! argument_impl {
    ($class:ident: $($ty:ty),*) => {
        $(
            unsafe impl Argument for $ty {
                const TYPE: ArgType = ArgType::of::<$ty>(ArgClass::$class);
            }
        )*
    };
}

argument_impl!(Integer: bool, i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);
argument_impl!(Float: f32, f64);

unsafe impl<T: 'static> Argument for *const T {
    const TYPE: ArgType = ArgType::of::<Self>(ArgClass::Pointer);
}
unsafe impl<T: 'static> Argument for *mut T {
    const TYPE: ArgType = ArgType::of::<Self>(ArgClass::Pointer);
}
unsafe impl<T: 'static> Argument for NonNull<T> {
    const TYPE: ArgType = ArgType::of::<Self>(ArgClass::Pointer);
}
unsafe impl<T: 'static> Argument for Option<NonNull<T>> {
    const TYPE: ArgType = ArgType::of::<Self>(ArgClass::Pointer);
}

/// Function pointer types a thunk can be built for
///
/// # Safety
///
/// `dispatch` must return routines whose parameter lists match the layouts documented on
/// [`DispatchVariant`], and `ARGUMENTS`/`CONVENTION` must describe `Self` exactly. The
/// implementations in this crate are the only ones that should exist.
pub unsafe trait Signature: Copy + 'static {
    /// Return type of the function pointer
    type Output: ReturnValue;
    /// Type-erased closure stored behind the self-pointer
    type Closure<'a>: ?Sized + 'a;

    /// Arguments in declaration order
    const ARGUMENTS: &'static [ArgType];
    /// Convention of the function pointer
    const CONVENTION: Convention;

    /// Address of the dispatch routine for `variant`
    fn dispatch(variant: DispatchVariant) -> usize;

    /// Reinterprets generated code as this function pointer type
    ///
    /// # Safety
    ///
    /// `code` must point to executable code that follows this signature's convention.
    unsafe fn from_code(code: *const u8) -> Self;
}

/// Closures that can be stored for a signature `S`
pub trait IntoClosure<'a, S: Signature> {
    /// Boxes the closure as the signature's type-erased closure
    fn into_closure(self) -> Box<S::Closure<'a>>;
}

/// Implements [`Signature`] and [`IntoClosure`] for one ABI and arity
macro_rules! signature_impl {
    ($abi:tt, $convention:expr; $($arg:ident),*) => {
        unsafe impl<R: ReturnValue, $($arg: Argument),*> Signature for extern $abi fn($($arg),*) -> R {
            type Output = R;
            type Closure<'a> = dyn Fn($($arg),*) -> R + 'a;

            const ARGUMENTS: &'static [ArgType] = &[$(<$arg as Argument>::TYPE),*];
            const CONVENTION: Convention = $convention;

            #[allow(non_snake_case)]
            fn dispatch(variant: DispatchVariant) -> usize {
                type This<R, $($arg),*> = *const Slot<'static, extern $abi fn($($arg),*) -> R>;

                unsafe extern "C" fn trailing<R: ReturnValue, $($arg: Argument),*>(
                    $($arg: $arg,)*
                    this: This<R, $($arg),*>,
                ) -> R {
                    ((*this).closure)($($arg),*)
                }

                unsafe extern "C" fn displaced_1<R: ReturnValue, $($arg: Argument),*>(
                    this: This<R, $($arg),*>,
                    _: usize,
                    $($arg: $arg,)*
                ) -> R {
                    ((*this).closure)($($arg),*)
                }

                unsafe extern "C" fn displaced_3<R: ReturnValue, $($arg: Argument),*>(
                    this: This<R, $($arg),*>,
                    _: usize,
                    _: usize,
                    _: usize,
                    $($arg: $arg,)*
                ) -> R {
                    ((*this).closure)($($arg),*)
                }

                unsafe extern "C" fn displaced_5<R: ReturnValue, $($arg: Argument),*>(
                    this: This<R, $($arg),*>,
                    _: usize,
                    _: usize,
                    _: usize,
                    _: usize,
                    _: usize,
                    $($arg: $arg,)*
                ) -> R {
                    ((*this).closure)($($arg),*)
                }

                unsafe extern "C" fn displaced_7<R: ReturnValue, $($arg: Argument),*>(
                    this: This<R, $($arg),*>,
                    _: usize,
                    _: usize,
                    _: usize,
                    _: usize,
                    _: usize,
                    _: usize,
                    _: usize,
                    $($arg: $arg,)*
                ) -> R {
                    ((*this).closure)($($arg),*)
                }

                match variant {
                    DispatchVariant::Trailing => trailing::<R, $($arg),*> as *const () as usize,
                    DispatchVariant::Displaced(Displacement::One) => displaced_1::<R, $($arg),*> as *const () as usize,
                    DispatchVariant::Displaced(Displacement::Three) => displaced_3::<R, $($arg),*> as *const () as usize,
                    DispatchVariant::Displaced(Displacement::Five) => displaced_5::<R, $($arg),*> as *const () as usize,
                    DispatchVariant::Displaced(Displacement::Seven) => displaced_7::<R, $($arg),*> as *const () as usize,
                }
            }

            unsafe fn from_code(code: *const u8) -> Self {
                mem::transmute_copy(&code)
            }
        }

        impl<'a, F, R: ReturnValue, $($arg: Argument),*> IntoClosure<'a, extern $abi fn($($arg),*) -> R> for F
        where
            F: Fn($($arg),*) -> R + 'a,
        {
            fn into_closure(self) -> Box<dyn Fn($($arg),*) -> R + 'a> {
                Box::new(self)
            }
        }
    };
}

/// Implements every supported arity for one ABI
macro_rules! signatures {
    ($abi:tt, $convention:expr) => {
        signature_impl!($abi, $convention;);
        signature_impl!($abi, $convention; A0);
        signature_impl!($abi, $convention; A0, A1);
        signature_impl!($abi, $convention; A0, A1, A2);
        signature_impl!($abi, $convention; A0, A1, A2, A3);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4, A5);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4, A5, A6);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4, A5, A6, A7);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4, A5, A6, A7, A8);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4, A5, A6, A7, A8, A9);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
        signature_impl!($abi, $convention; A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);
    };
}

signatures!("C", Convention::C);
#[cfg(target_arch = "x86")]
signatures!("stdcall", Convention::Stdcall);

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use super::{ArgClass, ArgType, Convention, DispatchVariant, Displacement, Signature};

    #[test]
    /// Argument descriptors follow declaration order and native sizes
    fn test_arguments() {
        type Callback = extern "C" fn(i32, *const c_void, f64, u8) -> i64;
        assert_eq!(
            <Callback as Signature>::ARGUMENTS,
            [
                ArgType::of::<i32>(ArgClass::Integer),
                ArgType::of::<*const c_void>(ArgClass::Pointer),
                ArgType::of::<f64>(ArgClass::Float),
                ArgType::of::<u8>(ArgClass::Integer),
            ]
        );
        assert_eq!(<Callback as Signature>::CONVENTION, Convention::C);
        assert!(<extern "C" fn() as Signature>::ARGUMENTS.is_empty());
    }

    #[test]
    /// Every variant resolves to a distinct routine
    fn test_dispatch_addresses() {
        type Callback = extern "C" fn(u32, u32) -> u32;
        let addresses = [
            <Callback as Signature>::dispatch(DispatchVariant::Trailing),
            <Callback as Signature>::dispatch(DispatchVariant::Displaced(Displacement::One)),
            <Callback as Signature>::dispatch(DispatchVariant::Displaced(Displacement::Three)),
            <Callback as Signature>::dispatch(DispatchVariant::Displaced(Displacement::Five)),
            <Callback as Signature>::dispatch(DispatchVariant::Displaced(Displacement::Seven)),
        ];
        for (i, a) in addresses.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &addresses[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    /// Word-sized integer detection respects the machine word
    fn test_word_integer() {
        let wide = ArgType::of::<u64>(ArgClass::Integer);
        assert!(wide.is_word_integer(8));
        assert!(!wide.is_word_integer(4));
        assert!(!ArgType::of::<f32>(ArgClass::Float).is_word_integer(8));
        assert!(ArgType::of::<f32>(ArgClass::Float).is_float());
    }
}
