/// Declares a strongly-typed newtype around an integer primitive.
///
/// Index and id types in the namespace layer (target indices, node
/// ordinals, uid/gid) must not be mixed up at call sites, so each gets its
/// own type. The generated struct:
/// - derefs to the inner value and converts both ways with `From`
/// - is `Copy`, totally ordered and hashable
/// - serializes transparently as the inner value
/// - offers `const fn new` / `get` for use in constants
#[macro_export]
macro_rules! strong_type {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            #[inline]
            pub const fn new(val: $inner) -> Self {
                Self(val)
            }

            #[inline]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(val: $inner) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    strong_type!(
        /// Test-only index.
        SlotIndex,
        u32
    );

    const FIRST: SlotIndex = SlotIndex::new(1);

    #[test]
    fn test_const_constructor() {
        assert_eq!(FIRST.get(), 1);
        assert_eq!(*FIRST, 1u32);
    }

    #[test]
    fn test_conversions() {
        let idx: SlotIndex = 9u32.into();
        let raw: u32 = idx.into();
        assert_eq!(raw, 9);
    }

    #[test]
    fn test_display_debug() {
        let idx = SlotIndex(3);
        assert_eq!(idx.to_string(), "3");
        assert_eq!(format!("{:?}", idx), "SlotIndex(3)");
    }

    #[test]
    fn test_ordering_in_sets() {
        let set: BTreeSet<SlotIndex> = [SlotIndex(4), SlotIndex(1), SlotIndex(4)].into();
        let ordered: Vec<u32> = set.into_iter().map(SlotIndex::get).collect();
        assert_eq!(ordered, vec![1, 4]);
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&SlotIndex(42)).unwrap();
        assert_eq!(json, "42");
        let parsed: SlotIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SlotIndex(42));
    }
}
