//! Eligibility tables for the LayerNorm matcher
//!
//! Which schema revisions and element types a node may carry to take part in
//! a fusion. The tables are built once and shared read-only by every pass
//! invocation.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::proto::tensor_proto::DataType;
use crate::tensor::i32_to_dtype;

/// Process-wide LayerNorm fusion policy
pub static POLICY: Lazy<FusionPolicy> = Lazy::new(FusionPolicy::layer_norm);

/// Accepted schema revisions and operand types
#[derive(Debug, Clone)]
pub struct FusionPolicy {
    versions: FxHashMap<&'static str, &'static [i64]>,
    elem_types: &'static [DataType],
}

impl FusionPolicy {
    /// Policy for the decomposed LayerNorm pattern
    ///
    /// ReduceMean 18 is left out: its axes move from an attribute to an input.
    pub fn layer_norm() -> Self {
        let versions: [(&'static str, &'static [i64]); 7] = [
            ("ReduceMean", &[1, 11, 13]),
            ("Sub", &[7, 13, 14]),
            ("Div", &[7, 13, 14]),
            ("Mul", &[7, 13, 14]),
            ("Add", &[7, 13, 14]),
            ("Sqrt", &[6, 13]),
            ("Pow", &[7, 12, 13, 15]),
        ];

        Self {
            versions: versions.into_iter().collect(),
            elem_types: &[DataType::Float16, DataType::Float, DataType::Double],
        }
    }

    /// Whether `op_type` at schema revision `since` is accepted
    pub fn supports_version(&self, op_type: &str, since: Option<i64>) -> bool {
        match (self.versions.get(op_type), since) {
            (Some(accepted), Some(v)) => accepted.contains(&v),
            _ => false,
        }
    }

    /// Whether a declared element type is accepted; undeclared never is
    pub fn supports_elem_type(&self, elem_type: Option<i32>) -> bool {
        elem_type
            .and_then(i32_to_dtype)
            .map(|dtype| self.elem_types.contains(&dtype))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_table() {
        assert!(POLICY.supports_version("Sub", Some(7)));
        assert!(POLICY.supports_version("Sub", Some(14)));
        assert!(!POLICY.supports_version("Sub", Some(6)));
        assert!(!POLICY.supports_version("ReduceMean", Some(18)));
        assert!(!POLICY.supports_version("Sub", None));
        assert!(!POLICY.supports_version("Relu", Some(14)));
    }

    #[test]
    fn test_float_family_only() {
        assert!(POLICY.supports_elem_type(Some(DataType::Float as i32)));
        assert!(POLICY.supports_elem_type(Some(DataType::Float16 as i32)));
        assert!(POLICY.supports_elem_type(Some(DataType::Double as i32)));
        assert!(!POLICY.supports_elem_type(Some(DataType::Bfloat16 as i32)));
        assert!(!POLICY.supports_elem_type(Some(DataType::Int64 as i32)));
        assert!(!POLICY.supports_elem_type(None));
    }
}
