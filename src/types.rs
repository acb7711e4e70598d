//! Function signatures and resizable limits.

use smallvec::SmallVec;
use wasmet_core::ValueType;

/// Signature of a function.
///
/// A signature consists of zero or more parameter types and at most one
/// return type (MVP). Two signatures are equal iff their parameter and return
/// vectors are element-equal; the module deduplicates equal signatures by
/// recording for each the smallest equal type index previously declared,
/// which turns `call_indirect` signature checking into one integer compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    params: SmallVec<[ValueType; 8]>,
    return_type: Option<ValueType>,
    /// Index of the smallest equal type declared before (or of this type
    /// itself when it is the first of its kind).
    canonical_idx: u32,
}

impl FuncType {
    /// Creates a new signature with the given parameter types and optional
    /// return type. The canonical index starts out self-referential and is
    /// fixed up by the loader once the whole type table is known.
    pub fn new(params: impl IntoIterator<Item = ValueType>, return_type: Option<ValueType>) -> Self {
        FuncType {
            params: params.into_iter().collect(),
            return_type,
            canonical_idx: u32::MAX,
        }
    }

    /// Returns parameter types of this signature.
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Returns return type of this signature.
    pub fn return_type(&self) -> Option<ValueType> {
        self.return_type
    }

    /// Number of value-stack cells the parameters occupy.
    pub fn param_cells(&self) -> u32 {
        self.params.iter().map(|ty| ty.cell_count()).sum()
    }

    /// Number of value-stack cells the return value occupies.
    pub fn return_cells(&self) -> u32 {
        self.return_type.map_or(0, |ty| ty.cell_count())
    }

    /// The canonical type index used for `call_indirect` checks.
    pub fn canonical_idx(&self) -> u32 {
        self.canonical_idx
    }

    pub(crate) fn set_canonical_idx(&mut self, idx: u32) {
        self.canonical_idx = idx;
    }

    /// Structural equality, ignoring the canonical index.
    pub fn matches(&self, other: &FuncType) -> bool {
        self.params == other.params && self.return_type == other.return_type
    }
}

/// Resizable limits of a table or memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Limits {
    initial: u32,
    maximum: Option<u32>,
}

impl Limits {
    pub(crate) fn new(initial: u32, maximum: Option<u32>) -> Limits {
        Limits { initial, maximum }
    }

    /// Initial size (elements for tables, pages for memories).
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Optional maximum size.
    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_compare_structurally() {
        let a = FuncType::new([ValueType::I32, ValueType::I64], Some(ValueType::I32));
        let mut b = FuncType::new([ValueType::I32, ValueType::I64], Some(ValueType::I32));
        b.set_canonical_idx(7);
        assert!(a.matches(&b));
        let c = FuncType::new([ValueType::I32], Some(ValueType::I32));
        assert!(!a.matches(&c));
    }

    #[test]
    fn cell_accounting() {
        let ty = FuncType::new([ValueType::I64, ValueType::F32], Some(ValueType::F64));
        assert_eq!(ty.param_cells(), 3);
        assert_eq!(ty.return_cells(), 2);
    }
}
