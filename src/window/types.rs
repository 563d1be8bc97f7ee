//! Core ID types for the sliding-window store.

/// Unique identifier for an incoming frame (and its shell).
///
/// FrameIds are assigned sequentially at first sight of a frame and order
/// the permanent trajectory history. They serve as lightweight handles for
/// cross-referencing without Arc/Rc, which simplifies ownership and avoids
/// cyclic references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Unique identifier for a keyframe in the active window.
///
/// Assigned sequentially on promotion; a frame that is never promoted never
/// gets one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyframeId(pub u64);

impl std::fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// Unique identifier for an activated point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointId(pub u64);

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Unique identifier for a point-frame residual edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResidualId(pub u64);

impl std::fmt::Display for ResidualId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_by_value() {
        assert!(FrameId(3) < FrameId(10));
        assert!(KeyframeId(0) < KeyframeId(1));
    }

    #[test]
    fn test_id_as_hashmap_key() {
        use std::collections::HashMap;

        let mut map: HashMap<KeyframeId, &str> = HashMap::new();
        map.insert(KeyframeId(1), "first");
        map.insert(KeyframeId(2), "second");

        assert_eq!(map.get(&KeyframeId(1)), Some(&"first"));
        assert_eq!(map.get(&KeyframeId(3)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", PointId(123)), "P123");
        assert_eq!(format!("{}", KeyframeId(7)), "KF7");
    }
}
