//! Structure composition
//!
//! Wire order is a protocol contract, so the traits are not derived from the
//! Rust declaration. Each macro takes the field list in wire order and
//! implements [`NdrEncode`](crate::NdrEncode)/[`NdrDecode`](crate::NdrDecode)
//! for an existing struct.
//!
//! - [`ndr_struct!`](crate::ndr_struct) is for IDL structures: the struct is
//!   aligned to its widest field, every field is written inline, then the
//!   fields' deferred pointees follow in field order.
//! - [`ndr_args!`](crate::ndr_args) is for an operation's argument list:
//!   each argument is written inline and immediately followed by its own
//!   deferred pointees before the next argument starts.

/// Implement the NDR traits for a struct, listing its fields in wire order.
///
/// ```
/// #[derive(Debug, Default, PartialEq)]
/// pub struct Entry {
///     pub name: ndr::UniquePtr<ndr::NdrWString>,
///     pub id: u32,
/// }
///
/// ndr::ndr_struct!(Entry { id: u32, name: ndr::UniquePtr<ndr::NdrWString> });
/// ```
#[macro_export]
macro_rules! ndr_struct {
    ($name:ident { $( $field:ident : $ty:ty ),+ $(,)? }) => {
        impl $crate::NdrEncode for $name {
            fn ndr_encode(&self, w: &mut $crate::NdrWriter) -> $crate::Result<()> {
                w.align(<Self as $crate::NdrEncode>::ndr_align());
                $( $crate::NdrEncode::ndr_encode(&self.$field, w)?; )+
                Ok(())
            }

            fn ndr_encode_deferred(&self, w: &mut $crate::NdrWriter) -> $crate::Result<()> {
                $( $crate::NdrEncode::ndr_encode_deferred(&self.$field, w)?; )+
                Ok(())
            }

            fn ndr_align() -> usize {
                let mut align = 1;
                $( align = align.max(<$ty as $crate::NdrEncode>::ndr_align()); )+
                align
            }
        }

        impl $crate::NdrDecode for $name {
            fn ndr_decode(r: &mut $crate::NdrReader) -> $crate::Result<Self> {
                r.align(<Self as $crate::NdrDecode>::ndr_align())?;
                Ok(Self {
                    $( $field: <$ty as $crate::NdrDecode>::ndr_decode(r)?, )+
                })
            }

            fn ndr_decode_deferred(&mut self, r: &mut $crate::NdrReader) -> $crate::Result<()> {
                $( $crate::NdrDecode::ndr_decode_deferred(&mut self.$field, r)?; )+
                Ok(())
            }

            fn ndr_fixup(&mut self, r: &mut $crate::NdrReader) -> $crate::Result<()> {
                $( $crate::NdrDecode::ndr_fixup(&mut self.$field, r)?; )+
                Ok(())
            }

            fn ndr_align() -> usize {
                let mut align = 1;
                $( align = align.max(<$ty as $crate::NdrDecode>::ndr_align()); )+
                align
            }
        }
    };
}

/// Implement the NDR traits for an operation's argument list.
///
/// Top-level arguments are not a structure: there is no leading alignment and
/// each argument's pointees are drained before the next argument.
#[macro_export]
macro_rules! ndr_args {
    ($name:ident { $( $field:ident : $ty:ty ),* $(,)? }) => {
        impl $crate::NdrEncode for $name {
            #[allow(unused_variables)]
            fn ndr_encode(&self, w: &mut $crate::NdrWriter) -> $crate::Result<()> {
                $( w.write_top(&self.$field)?; )*
                Ok(())
            }
        }

        impl $crate::NdrDecode for $name {
            #[allow(unused_variables)]
            fn ndr_decode(r: &mut $crate::NdrReader) -> $crate::Result<Self> {
                Ok(Self {
                    $( $field: {
                        let mut value = <$ty as $crate::NdrDecode>::ndr_decode(r)?;
                        $crate::NdrDecode::ndr_decode_deferred(&mut value, r)?;
                        value
                    }, )*
                })
            }

            #[allow(unused_variables)]
            fn ndr_fixup(&mut self, r: &mut $crate::NdrReader) -> $crate::Result<()> {
                $( $crate::NdrDecode::ndr_fixup(&mut self.$field, r)?; )*
                Ok(())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{
        ConformantArray, FullPtr, NdrError, NdrReader, NdrWString, NdrWriter, UniquePtr,
    };

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Entry {
        name: UniquePtr<NdrWString>,
        id: u32,
    }

    // id is first on the wire even though name is declared first
    crate::ndr_struct!(Entry { id: u32, name: UniquePtr<NdrWString> });

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Outer {
        flags: u8,
        entries: UniquePtr<ConformantArray<Entry>>,
        total: u64,
    }

    crate::ndr_struct!(Outer {
        flags: u8,
        entries: UniquePtr<ConformantArray<Entry>>,
        total: u64,
    });

    #[derive(Debug, Default, PartialEq)]
    struct Args {
        server: UniquePtr<NdrWString>,
        access: u32,
    }

    crate::ndr_args!(Args { server: UniquePtr<NdrWString>, access: u32 });

    #[derive(Debug, Default, PartialEq)]
    struct Node {
        value: u32,
        next: FullPtr<Node>,
    }

    crate::ndr_struct!(Node { value: u32, next: FullPtr<Node> });

    fn encode<T: crate::NdrEncode>(value: &T) -> bytes::Bytes {
        let mut w = NdrWriter::new();
        w.write_top(value).unwrap();
        w.into_bytes()
    }

    #[test]
    fn test_wire_order_follows_field_list() {
        let entry = Entry {
            name: UniquePtr::new(NdrWString::new("a")),
            id: 0x11,
        };
        let bytes = encode(&entry);
        assert_eq!(&bytes[0..4], &[0x11, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x02, 0x00]);

        let decoded: Entry = NdrReader::new(bytes).read_top().unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_struct_aligns_to_widest_field() {
        let mut w = NdrWriter::new();
        w.write_u8(1);
        w.write_top(&Outer::default()).unwrap();
        // u8, pad to 8, flags, pad, null pointer, pad, u64
        assert_eq!(w.position(), 24);
    }

    #[test]
    fn test_nested_pointees_follow_their_parent() {
        let outer = Outer {
            flags: 3,
            entries: UniquePtr::new(ConformantArray::new(vec![
                Entry {
                    name: UniquePtr::new(NdrWString::new("x")),
                    id: 1,
                },
                Entry {
                    name: UniquePtr::null(),
                    id: 2,
                },
            ])),
            total: 99,
        };
        let bytes = encode(&outer);

        // flags, pad, entries ptr, total
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x02, 0x00]);
        assert_eq!(&bytes[8..16], &[99, 0, 0, 0, 0, 0, 0, 0]);
        // deferred array: max_count then (id, name ptr) pairs
        assert_eq!(&bytes[16..20], &[2, 0, 0, 0]);
        assert_eq!(&bytes[20..24], &[1, 0, 0, 0]);
        assert_eq!(&bytes[24..28], &[0x04, 0x00, 0x02, 0x00]);
        assert_eq!(&bytes[28..32], &[2, 0, 0, 0]);
        assert_eq!(&bytes[32..36], &[0, 0, 0, 0]);
        // then the name string of the first entry
        assert_eq!(&bytes[36..40], &[2, 0, 0, 0]);

        let decoded: Outer = NdrReader::new(bytes).read_top().unwrap();
        assert_eq!(decoded, outer);
    }

    #[test]
    fn test_args_drain_pointees_per_argument() {
        let args = Args {
            server: UniquePtr::new(NdrWString::new("s")),
            access: 0x30,
        };
        let bytes = encode(&args);

        // ptr, string, then access
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x02, 0x00]);
        assert_eq!(&bytes[16..20], &[b's', 0, 0, 0]);
        assert_eq!(&bytes[20..24], &[0x30, 0, 0, 0]);

        let decoded: Args = NdrReader::new(bytes).read_top().unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_cyclic_full_pointers() {
        let head = FullPtr::new(Node::default());
        let tail = FullPtr::new(Node {
            value: 2,
            next: head.alias(),
        });
        {
            let shared = head.shared().unwrap();
            let mut node = shared.write();
            node.value = 1;
            node.next = tail.alias();
        }

        let bytes = encode(&head);
        let decoded: FullPtr<Node> = NdrReader::new(bytes).read_top().unwrap();

        let first = decoded.shared().unwrap().read().next.alias();
        let back = first.shared().unwrap().read().next.alias();
        assert_eq!(first.shared().unwrap().read().value, 2);
        assert!(back.ptr_eq(&decoded));

        // Break the cycle so the Arcs can drop
        head.shared().unwrap().write().next = FullPtr::null();
        decoded.shared().unwrap().write().next = FullPtr::null();
    }

    #[test]
    fn test_truncated_struct() {
        let bytes = encode(&Entry {
            name: UniquePtr::new(NdrWString::new("abc")),
            id: 5,
        });
        for k in 0..bytes.len() {
            let result = NdrReader::new(bytes.slice(..k)).read_top::<Entry>();
            assert!(
                matches!(result, Err(NdrError::TruncatedInput { .. })),
                "prefix {k}: {result:?}"
            );
        }
    }
}
