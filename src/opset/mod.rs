//! ONNX operator schema versions
//!
//! Resolves which schema revision ("since version") a node runs under, given
//! the opset version its model imports for the node's domain.
//!
//! | Op | Since versions |
//! |----|----------------|
//! | ReduceMean | 1, 11, 13, 18 |
//! | Add / Sub / Mul / Div | 1, 6, 7, 13, 14 |
//! | Pow | 1, 7, 12, 13, 15 |
//! | Sqrt | 1, 6, 13 |
//! | LayerNormalization | 17 |
//!
//! # Example
//!
//! ```ignore
//! use lnfuse::opset::since_version;
//!
//! // A model importing opset 12 runs Sub under its opset-7 schema
//! assert_eq!(since_version("Sub", "", 12), Some(7));
//! ```

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::proto::extensions::is_onnx_domain;

/// Schema revisions of the default-domain operators this crate reasons about
static ONNX_SCHEMAS: Lazy<FxHashMap<&'static str, &'static [i64]>> = Lazy::new(|| {
    let entries: [(&'static str, &'static [i64]); 10] = [
        ("ReduceMean", &[1, 11, 13, 18]),
        ("Add", &[1, 6, 7, 13, 14]),
        ("Sub", &[1, 6, 7, 13, 14]),
        ("Mul", &[1, 6, 7, 13, 14]),
        ("Div", &[1, 6, 7, 13, 14]),
        ("Pow", &[1, 7, 12, 13, 15]),
        ("Sqrt", &[1, 6, 13]),
        ("LayerNormalization", &[17]),
        ("Constant", &[1, 9, 11, 12, 13, 19, 21]),
        ("If", &[1, 11, 13, 16, 19, 21]),
    ];
    entries.into_iter().collect()
});

/// Known schema revisions for an operator
pub fn schema_versions(op_type: &str, domain: &str) -> Option<&'static [i64]> {
    if !is_onnx_domain(domain) {
        return None;
    }
    ONNX_SCHEMAS.get(op_type).copied()
}

/// Schema revision a node of `op_type` runs under when `opset` is imported
///
/// Returns `None` for unknown operators, non-default domains, and opsets
/// older than the operator itself.
pub fn since_version(op_type: &str, domain: &str, opset: i64) -> Option<i64> {
    schema_versions(op_type, domain)?
        .iter()
        .copied()
        .take_while(|&v| v <= opset)
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_version_resolution() {
        assert_eq!(since_version("Sub", "", 6), Some(6));
        assert_eq!(since_version("Sub", "", 12), Some(7));
        assert_eq!(since_version("Sub", "", 13), Some(13));
        assert_eq!(since_version("Sub", "", 17), Some(14));
        assert_eq!(since_version("ReduceMean", "ai.onnx", 17), Some(13));
        assert_eq!(since_version("ReduceMean", "", 18), Some(18));
        assert_eq!(since_version("Sqrt", "", 12), Some(6));
    }

    #[test]
    fn test_since_version_before_introduction() {
        assert_eq!(since_version("LayerNormalization", "", 16), None);
        assert_eq!(since_version("LayerNormalization", "", 17), Some(17));
    }

    #[test]
    fn test_unknown_domain_or_op() {
        assert_eq!(since_version("Sub", "com.microsoft", 13), None);
        assert_eq!(since_version("Gelu", "", 20), None);
    }
}
