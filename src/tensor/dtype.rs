//! ONNX data type helpers
//!
//! Maps between raw `elem_type` / `data_type` integers and the
//! [`DataType`] enum.

use crate::proto::onnx::tensor_proto::DataType;

/// Convert i32 to DataType enum
pub fn i32_to_dtype(value: i32) -> Option<DataType> {
    DataType::try_from(value).ok()
}

/// Human-readable ONNX type string, as printed by ONNX tooling
pub fn type_string(dtype: DataType) -> &'static str {
    match dtype {
        DataType::Float => "tensor(float)",
        DataType::Float16 => "tensor(float16)",
        DataType::Double => "tensor(double)",
        DataType::Bfloat16 => "tensor(bfloat16)",
        DataType::Int32 => "tensor(int32)",
        DataType::Int64 => "tensor(int64)",
        DataType::Bool => "tensor(bool)",
        _ => "tensor(other)",
    }
}
