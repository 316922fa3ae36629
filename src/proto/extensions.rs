//! Extension methods for ONNX protobuf types
//!
//! Provides convenient helper methods for working with ONNX protobuf types.

use half::f16;

use super::onnx::*;

/// Domain string of the default ONNX operator set
pub const ONNX_DOMAIN: &str = "ai.onnx";

/// Check whether a domain string names the default ONNX operator set
pub fn is_onnx_domain(domain: &str) -> bool {
    domain.is_empty() || domain == ONNX_DOMAIN
}

// ============================================================================
// ModelProto extensions
// ============================================================================

impl ModelProto {
    /// Get the opset version imported for a domain
    pub fn get_opset_version(&self, domain: &str) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|op| {
                op.domain == domain || (is_onnx_domain(&op.domain) && is_onnx_domain(domain))
            })
            .map(|op| op.version)
    }
}

// ============================================================================
// NodeProto extensions
// ============================================================================

impl NodeProto {
    /// Get attribute by name
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute.iter().find(|attr| attr.name == name)
    }

    /// Get repeated int attribute
    pub fn get_attribute_ints(&self, name: &str) -> Option<&[i64]> {
        self.get_attribute(name).map(|a| a.ints.as_slice())
    }

    /// Check if this node has a specific op type
    pub fn is_op_type(&self, op_type: &str) -> bool {
        self.op_type == op_type
    }

    /// Whether the node belongs to the default ONNX domain
    pub fn is_onnx_domain(&self) -> bool {
        is_onnx_domain(&self.domain)
    }

    /// Whether any attribute carries a nested graph
    pub fn has_subgraphs(&self) -> bool {
        self.attribute
            .iter()
            .any(|a| a.g.is_some() || !a.graphs.is_empty())
    }
}

// ============================================================================
// ValueInfoProto extensions
// ============================================================================

impl ValueInfoProto {
    /// Get the shape dimensions if available
    pub fn get_shape(&self) -> Option<Vec<i64>> {
        self.r#type.as_ref().and_then(|t| {
            t.value.as_ref().and_then(|v| match v {
                type_proto::Value::TensorType(tensor) => tensor.shape.as_ref().map(|s| {
                    s.dim
                        .iter()
                        .map(|d| match &d.value {
                            Some(tensor_shape_proto::dimension::Value::DimValue(v)) => *v,
                            Some(tensor_shape_proto::dimension::Value::DimParam(_)) => -1,
                            None => -1,
                        })
                        .collect()
                }),
            })
        })
    }

    /// Get the element type if this is a tensor type
    pub fn get_elem_type(&self) -> Option<i32> {
        self.r#type.as_ref().and_then(|t| {
            t.value.as_ref().map(|v| match v {
                type_proto::Value::TensorType(tensor) => tensor.elem_type,
            })
        })
    }
}

// ============================================================================
// TensorProto extensions
// ============================================================================

impl TensorProto {
    /// Get data type enum value
    pub fn data_type_enum(&self) -> tensor_proto::DataType {
        tensor_proto::DataType::try_from(self.data_type)
            .unwrap_or(tensor_proto::DataType::Undefined)
    }

    /// Read the first element of a floating point tensor as `f32`
    ///
    /// Looks at the typed repeated fields first and falls back to
    /// little-endian `raw_data`.
    pub fn first_float(&self) -> Option<f32> {
        use tensor_proto::DataType;

        match self.data_type_enum() {
            DataType::Float => {
                if let Some(v) = self.float_data.first() {
                    return Some(*v);
                }
                let bytes: [u8; 4] = self.raw_data.get(..4)?.try_into().ok()?;
                Some(f32::from_le_bytes(bytes))
            }
            DataType::Double => {
                if let Some(v) = self.double_data.first() {
                    return Some(*v as f32);
                }
                let bytes: [u8; 8] = self.raw_data.get(..8)?.try_into().ok()?;
                Some(f64::from_le_bytes(bytes) as f32)
            }
            DataType::Float16 => {
                // float16 values are stored as raw bits in int32_data
                if let Some(bits) = self.int32_data.first() {
                    return Some(f16::from_bits(*bits as u16).to_f32());
                }
                let bytes: [u8; 2] = self.raw_data.get(..2)?.try_into().ok()?;
                Some(f16::from_le_bytes(bytes).to_f32())
            }
            _ => None,
        }
    }
}

// ============================================================================
// AttributeProto extensions
// ============================================================================

impl AttributeProto {
    /// Create a new integer attribute
    pub fn new_int(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            i: value,
            r#type: attribute_proto::AttributeType::Int as i32,
            ..Default::default()
        }
    }

    /// Create a new float attribute
    pub fn new_float(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            f: value,
            r#type: attribute_proto::AttributeType::Float as i32,
            ..Default::default()
        }
    }

    /// Create a new ints attribute
    pub fn new_ints(name: &str, values: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            ints: values,
            r#type: attribute_proto::AttributeType::Ints as i32,
            ..Default::default()
        }
    }

    /// Create a new tensor attribute
    pub fn new_tensor(name: &str, tensor: TensorProto) -> Self {
        Self {
            name: name.to_string(),
            t: Some(tensor),
            r#type: attribute_proto::AttributeType::Tensor as i32,
            ..Default::default()
        }
    }

    /// Create a new graph attribute
    pub fn new_graph(name: &str, graph: GraphProto) -> Self {
        Self {
            name: name.to_string(),
            g: Some(graph),
            r#type: attribute_proto::AttributeType::Graph as i32,
            ..Default::default()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Create a new ValueInfoProto for a tensor
pub fn make_tensor_value_info(name: &str, elem_type: i32, shape: &[i64]) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type,
                shape: Some(TensorShapeProto {
                    dim: shape
                        .iter()
                        .map(|&d| tensor_shape_proto::Dimension {
                            value: Some(tensor_shape_proto::dimension::Value::DimValue(d)),
                            denotation: String::new(),
                        })
                        .collect(),
                }),
            })),
            denotation: String::new(),
        }),
        doc_string: String::new(),
    }
}

/// Create a new NodeProto
pub fn make_node(op_type: &str, inputs: &[&str], outputs: &[&str], name: &str) -> NodeProto {
    NodeProto {
        op_type: op_type.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create a scalar `f32` tensor
pub fn make_scalar_f32(name: &str, value: f32) -> TensorProto {
    TensorProto {
        name: name.to_string(),
        data_type: tensor_proto::DataType::Float as i32,
        float_data: vec![value],
        ..Default::default()
    }
}
