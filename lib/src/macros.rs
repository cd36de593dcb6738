//! Tiny `bitflags`-style macro for the single-byte flag sets used by the
//! oiXX headers. Written by hand rather than pulling in the `bitflags`
//! crate for three small, fixed flag sets.

macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name($repr);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn bits(self) -> $repr {
                self.0
            }

            pub fn from_bits_truncate(bits: $repr) -> Self {
                let mut known: $repr = 0;
                $(known |= $value;)*
                $name(bits & known)
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::empty()
            }
        }
    };
}

pub(crate) use bitflags_like;
