//! Non-encapsulated discriminated unions
//!
//! A union is written as its selector followed by the arm that selector
//! picks. The selector width is fixed per union type (`u16` or `u32`). On
//! decode the arm is found by looking the selector up in the union's arm
//! table, so adding an arm is one table entry.
//!
//! What happens to a selector outside the table is declared per union:
//! a [`UnionPolicy::Strict`] union fails with `UnknownUnionVariant`; a
//! [`UnionPolicy::Extensible`] union decodes into its `Unknown` arm, which
//! keeps the selector and every remaining byte of the frame. An extensible
//! union must therefore be the last thing decoded from its frame.
//!
//! Use [`ndr_union!`](crate::ndr_union) to declare one:
//!
//! ```
//! ndr::ndr_union! {
//!     #[derive(Debug, Clone, PartialEq)]
//!     pub enum Revision: u32, extensible {
//!         1 => V1(u32),
//!         2 => V2([u32; 2]),
//!     }
//! }
//! ```

use crate::{NdrError, NdrReader, NdrWriter, Result};
use bytes::Bytes;

/// Wire width of a union selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorWidth {
    U16,
    U32,
}

impl SelectorWidth {
    pub fn align(self) -> usize {
        match self {
            SelectorWidth::U16 => 2,
            SelectorWidth::U32 => 4,
        }
    }
}

/// Maps the selector's Rust type to its wire width
pub trait Selector {
    const WIDTH: SelectorWidth;
}

impl Selector for u16 {
    const WIDTH: SelectorWidth = SelectorWidth::U16;
}

impl Selector for u32 {
    const WIDTH: SelectorWidth = SelectorWidth::U32;
}

/// How a union treats selectors missing from its arm table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionPolicy {
    Strict,
    Extensible,
}

/// One entry of a union's arm table
pub struct UnionArm<U> {
    pub selector: u32,
    pub decode: fn(&mut NdrReader) -> Result<U>,
}

/// A discriminated union with a closed arm table
pub trait NdrUnion: Sized + 'static {
    const NAME: &'static str;
    const SELECTOR: SelectorWidth;
    const POLICY: UnionPolicy;
    const ARMS: &'static [UnionArm<Self>];

    /// Selector value for the current arm
    fn selector(&self) -> u32;

    /// Largest alignment among the arms
    fn arm_align() -> usize;

    fn encode_arm(&self, w: &mut NdrWriter) -> Result<()>;

    fn encode_arm_deferred(&self, w: &mut NdrWriter) -> Result<()>;

    fn decode_arm_deferred(&mut self, r: &mut NdrReader) -> Result<()>;

    fn fixup_arm(&mut self, r: &mut NdrReader) -> Result<()>;

    /// Build the fallback arm. Only extensible unions have one.
    fn unknown(_selector: u32, _raw: Bytes) -> Option<Self> {
        None
    }
}

pub fn union_align<U: NdrUnion>() -> usize {
    U::SELECTOR.align().max(U::arm_align())
}

/// Write the selector, then the arm.
///
/// The union as a whole aligns to its widest arm; the chosen arm then
/// aligns to its own type.
pub fn encode_union<U: NdrUnion>(value: &U, w: &mut NdrWriter) -> Result<()> {
    let selector = value.selector();
    w.align(union_align::<U>());
    match U::SELECTOR {
        SelectorWidth::U16 => {
            let selector = u16::try_from(selector).map_err(|_| NdrError::ValueOutOfRange(U::NAME))?;
            w.write_u16(selector);
        }
        SelectorWidth::U32 => w.write_u32(selector),
    }
    value.encode_arm(w)
}

/// Read the selector and decode the arm it names.
pub fn decode_union<U: NdrUnion>(r: &mut NdrReader) -> Result<U> {
    r.align(union_align::<U>())?;
    let selector = match U::SELECTOR {
        SelectorWidth::U16 => u32::from(r.read_u16()?),
        SelectorWidth::U32 => r.read_u32()?,
    };

    if let Some(arm) = U::ARMS.iter().find(|arm| arm.selector == selector) {
        return (arm.decode)(r);
    }

    let unknown = NdrError::UnknownUnionVariant {
        union: U::NAME,
        selector,
    };
    match U::POLICY {
        UnionPolicy::Strict => Err(unknown),
        UnionPolicy::Extensible => {
            let raw = r.read_remaining();
            U::unknown(selector, raw).ok_or(unknown)
        }
    }
}

/// Declare a non-encapsulated union and implement the NDR traits for it.
///
/// `enum Name: u16, strict { ... }` fails on unknown selectors;
/// `enum Name: u32, extensible { ... }` adds an `Unknown { selector, raw }`
/// arm that absorbs them.
#[macro_export]
macro_rules! ndr_union {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $sel:ty, strict {
            $( $value:literal => $variant:ident($ty:ty) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $( $variant($ty), )+
        }

        $crate::ndr_union!(@impl $name, $sel, Strict, [$( $value => $variant($ty) ),+]);
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $sel:ty, extensible {
            $( $value:literal => $variant:ident($ty:ty) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $( $variant($ty), )+
            /// Selector outside the arm table, with the undecoded remainder of the frame
            Unknown { selector: u32, raw: $crate::Bytes },
        }

        $crate::ndr_union!(@impl $name, $sel, Extensible, [$( $value => $variant($ty) ),+], Unknown);
    };
    (@impl $name:ident, $sel:ty, $policy:ident, [$( $value:literal => $variant:ident($ty:ty) ),+] $(, $unknown:ident)?) => {
        impl $crate::NdrUnion for $name {
            const NAME: &'static str = stringify!($name);
            const SELECTOR: $crate::SelectorWidth = <$sel as $crate::Selector>::WIDTH;
            const POLICY: $crate::UnionPolicy = $crate::UnionPolicy::$policy;
            const ARMS: &'static [$crate::UnionArm<Self>] = &[
                $(
                    $crate::UnionArm {
                        selector: $value,
                        decode: |r| Ok(Self::$variant(<$ty as $crate::NdrDecode>::ndr_decode(r)?)),
                    },
                )+
            ];

            fn selector(&self) -> u32 {
                match self {
                    $( Self::$variant(_) => $value, )+
                    $( Self::$unknown { selector, .. } => *selector, )?
                }
            }

            fn arm_align() -> usize {
                let mut align = 1;
                $( align = align.max(<$ty as $crate::NdrDecode>::ndr_align()); )+
                align
            }

            fn encode_arm(&self, w: &mut $crate::NdrWriter) -> $crate::Result<()> {
                match self {
                    $( Self::$variant(v) => $crate::NdrEncode::ndr_encode(v, w), )+
                    $( Self::$unknown { raw, .. } => {
                        w.write_bytes(raw);
                        Ok(())
                    } )?
                }
            }

            fn encode_arm_deferred(&self, w: &mut $crate::NdrWriter) -> $crate::Result<()> {
                match self {
                    $( Self::$variant(v) => $crate::NdrEncode::ndr_encode_deferred(v, w), )+
                    $( Self::$unknown { .. } => Ok(()), )?
                }
            }

            fn decode_arm_deferred(&mut self, r: &mut $crate::NdrReader) -> $crate::Result<()> {
                match self {
                    $( Self::$variant(v) => $crate::NdrDecode::ndr_decode_deferred(v, r), )+
                    $( Self::$unknown { .. } => Ok(()), )?
                }
            }

            fn fixup_arm(&mut self, r: &mut $crate::NdrReader) -> $crate::Result<()> {
                match self {
                    $( Self::$variant(v) => $crate::NdrDecode::ndr_fixup(v, r), )+
                    $( Self::$unknown { .. } => Ok(()), )?
                }
            }

            $(
                fn unknown(selector: u32, raw: $crate::Bytes) -> Option<Self> {
                    Some(Self::$unknown { selector, raw })
                }
            )?
        }

        impl $crate::NdrEncode for $name {
            fn ndr_encode(&self, w: &mut $crate::NdrWriter) -> $crate::Result<()> {
                $crate::encode_union(self, w)
            }

            fn ndr_encode_deferred(&self, w: &mut $crate::NdrWriter) -> $crate::Result<()> {
                $crate::NdrUnion::encode_arm_deferred(self, w)
            }

            fn ndr_align() -> usize {
                $crate::union_align::<Self>()
            }
        }

        impl $crate::NdrDecode for $name {
            fn ndr_decode(r: &mut $crate::NdrReader) -> $crate::Result<Self> {
                $crate::decode_union(r)
            }

            fn ndr_decode_deferred(&mut self, r: &mut $crate::NdrReader) -> $crate::Result<()> {
                $crate::NdrUnion::decode_arm_deferred(self, r)
            }

            fn ndr_fixup(&mut self, r: &mut $crate::NdrReader) -> $crate::Result<()> {
                $crate::NdrUnion::fixup_arm(self, r)
            }

            fn ndr_align() -> usize {
                $crate::union_align::<Self>()
            }
        }
    };
}
