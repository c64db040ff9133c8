//! Array payloads: static arrays with declared bounds, dynamic arrays growing
//! from zero.

use serde::{Deserialize, Serialize};

use crate::{typereg::TypeId, value::Value};

/// A static or dynamic array.
///
/// Static arrays carry their declared `[low, high]` bounds and have a fixed
/// length of `high - low + 1`. Dynamic arrays have `low = 0` and
/// `high = len - 1` (so an empty dynamic array reports `high = -1`).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ArrayObj {
    pub elem: TypeId,
    pub values: Vec<Value>,
    /// `Some((low, high))` for static arrays, `None` for dynamic ones.
    pub bounds: Option<(i64, i64)>,
}

impl ArrayObj {
    /// Creates a dynamic array from element values.
    pub fn dynamic(elem: TypeId, values: Vec<Value>) -> Self {
        Self {
            elem,
            values,
            bounds: None,
        }
    }

    /// Creates a static array; the caller supplies exactly
    /// `high - low + 1` zero values.
    pub fn fixed(elem: TypeId, low: i64, high: i64, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len() as i64, high - low + 1);
        Self {
            elem,
            values,
            bounds: Some((low, high)),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Declared lower bound (0 for dynamic arrays).
    pub fn low(&self) -> i64 {
        self.bounds.map_or(0, |(low, _)| low)
    }

    /// Declared upper bound (`len - 1` for dynamic arrays).
    pub fn high(&self) -> i64 {
        self.bounds.map_or(self.values.len() as i64 - 1, |(_, high)| high)
    }

    /// Maps a source-level index to a storage offset, or `None` when the index
    /// is outside the array's bounds.
    pub fn offset_of(&self, index: i64) -> Option<usize> {
        let low = self.low();
        if index < low || index > self.high() {
            return None;
        }
        Some(usize::try_from(index - low).expect("bounds checked"))
    }

    pub fn is_static(&self) -> bool {
        self.bounds.is_some()
    }
}
