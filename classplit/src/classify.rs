//! Rewriting of classification columns.
//!
//! The rewrite works on the classification column alone (one `u8` per point),
//! so it can run for several target classes in parallel over the same shared
//! slice without touching any point data.

/// A LAS classification code.
pub type ClassId = u8;

/// Fallback code for points whose class is not kept ("unclassified" in the
/// ASPRS tables).
pub const UNCLASSIFIED: ClassId = 1;

/// Membership set over the 256 possible classification codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassSet([u64; 4]);

impl ClassSet {
    pub const fn empty() -> Self {
        ClassSet([0; 4])
    }

    pub fn insert(&mut self, class_id: ClassId) {
        self.0[(class_id >> 6) as usize] |= 1 << (class_id & 0x3F);
    }

    pub fn contains(&self, class_id: ClassId) -> bool {
        self.0[(class_id >> 6) as usize] & (1 << (class_id & 0x3F)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0; 4]
    }

    /// All member class ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..=u8::MAX).filter(|&class_id| self.contains(class_id))
    }
}

impl FromIterator<ClassId> for ClassSet {
    fn from_iter<T: IntoIterator<Item = ClassId>>(iter: T) -> Self {
        let mut set = ClassSet::empty();
        for class_id in iter {
            set.insert(class_id);
        }
        set
    }
}

/// A rewritten classification column for one target class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSplit {
    pub class_id: ClassId,
    pub classification: Vec<ClassId>,
}

/// Rewrites a classification column for the output file of `target`.
///
/// Every element that is a member of `keep` is copied unchanged, every other
/// element becomes [UNCLASSIFIED]. Returns [None] if `target` is in `skip`,
/// so a skipped class can never produce an output file. (The orchestrator
/// filters skipped classes when enumerating targets, the guard here holds for
/// direct callers as well.)
pub fn split_classification(
    classification: &[ClassId],
    keep: &ClassSet,
    skip: &ClassSet,
    target: ClassId,
) -> Option<ClassSplit> {
    if skip.contains(target) {
        return None;
    }
    let rewritten = classification
        .iter()
        .map(|&class_id| {
            if keep.contains(class_id) {
                class_id
            } else {
                UNCLASSIFIED
            }
        })
        .collect();
    Some(ClassSplit {
        class_id: target,
        classification: rewritten,
    })
}

/// The distinct classification codes of a column, in ascending order.
pub fn distinct_classes(classification: &[ClassId]) -> Vec<ClassId> {
    let present: ClassSet = classification.iter().copied().collect();
    present.iter().collect()
}
