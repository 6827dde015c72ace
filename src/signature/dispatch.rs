//! # Dispatch
//!
//! Dispatch variants are the statically typed `extern "C"` routines a trampoline lands in.
//! Every variant recovers the closure through the self-pointer and calls it with the original
//! arguments; they only differ in where the self-pointer is declared relative to the real
//! arguments:
//!
//! - [`DispatchVariant::Trailing`]: `(args..., this)`. Used when a register is still free after
//!   the real arguments, so the trampoline can load `this` into it and tail-jump.
//! - [`DispatchVariant::Displaced`]: `(this, _: usize × N, args...)`. Used when every register is
//!   taken. The trampoline moves the register arguments onto the stack and the `N` unused
//!   placeholders force the dispatch prologue to read them from exactly those slots.

/// Number of unused placeholder parameters between the self-pointer and the real arguments
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Displacement {
    /// `(this, _, args...)`
    One,
    /// `(this, _, _, _, args...)`
    Three,
    /// `(this, _ × 5, args...)`
    Five,
    /// `(this, _ × 7, args...)`
    Seven,
}

impl Displacement {
    /// Number of placeholder parameters
    pub const fn placeholders(self) -> usize {
        match self {
            Self::One => 1,
            Self::Three => 3,
            Self::Five => 5,
            Self::Seven => 7,
        }
    }
}

/// Selects which dispatch routine a trampoline calls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchVariant {
    /// Self-pointer after the real arguments
    Trailing,
    /// Self-pointer first, followed by placeholders and then the real arguments
    Displaced(Displacement),
}

#[cfg(test)]
mod tests {
    use super::Displacement;

    #[test]
    /// Placeholder counts are odd so a pushed return address keeps the stack aligned
    fn test_placeholders() {
        let counts: Vec<_> = [
            Displacement::One,
            Displacement::Three,
            Displacement::Five,
            Displacement::Seven,
        ]
        .iter()
        .map(|d| d.placeholders())
        .collect();
        assert_eq!(counts, [1, 3, 5, 7]);
    }
}
