//! Typed column accessors over Arrow record batches.
//!
//! Inventory tables arrive with whatever physical types the storage layer
//! chose (identifiers as strings or integers, codes as Int16 or Float64). These
//! helpers cast once to the logical type the engine needs and report missing
//! columns with the table they were expected in.

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::algorithm::grouping::GroupValue;
use crate::error::{EstimationError, Result};

fn column<'a>(batch: &'a RecordBatch, table: &str, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| EstimationError::MissingColumn {
            table: table.to_string(),
            column: name.to_string(),
        })
}

fn type_error(name: &str, data_type: &DataType) -> EstimationError {
    EstimationError::ColumnType {
        column: name.to_string(),
        data_type: data_type.to_string(),
    }
}

const fn is_float(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Float16 | DataType::Float32 | DataType::Float64
    )
}

const fn is_integer(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn array_f64(array: &ArrayRef, name: &str) -> Result<Vec<Option<f64>>> {
    let converted = cast(array, &DataType::Float64)?;
    let values = converted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| type_error(name, array.data_type()))?;
    Ok(values.iter().collect())
}

fn array_i64(array: &ArrayRef, name: &str) -> Result<Vec<Option<i64>>> {
    let converted = cast(array, &DataType::Int64)?;
    let values = converted
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| type_error(name, array.data_type()))?;
    Ok(values.iter().collect())
}

fn array_text(array: &ArrayRef, name: &str) -> Result<Vec<Option<String>>> {
    let converted = cast(array, &DataType::Utf8)?;
    let values = converted
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| type_error(name, array.data_type()))?;
    Ok(values.iter().map(|v| v.map(str::to_string)).collect())
}

/// Format an integral float without its fractional part so keys match across types
fn float_key(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Read a column as `f64` values
pub fn f64_values(batch: &RecordBatch, table: &str, name: &str) -> Result<Vec<Option<f64>>> {
    array_f64(column(batch, table, name)?, name)
}

/// Read a column as `i64` values
pub fn i64_values(batch: &RecordBatch, table: &str, name: &str) -> Result<Vec<Option<i64>>> {
    array_i64(column(batch, table, name)?, name)
}

/// Read a column as text values
pub fn text_values(batch: &RecordBatch, table: &str, name: &str) -> Result<Vec<Option<String>>> {
    array_text(column(batch, table, name)?, name)
}

/// Read an optional column as `f64`; `None` when the table lacks it
pub fn optional_f64_values(batch: &RecordBatch, name: &str) -> Result<Option<Vec<Option<f64>>>> {
    batch
        .column_by_name(name)
        .map(|array| array_f64(array, name))
        .transpose()
}

/// Read an optional column as `i64`; `None` when the table lacks it
pub fn optional_i64_values(batch: &RecordBatch, name: &str) -> Result<Option<Vec<Option<i64>>>> {
    batch
        .column_by_name(name)
        .map(|array| array_i64(array, name))
        .transpose()
}

/// Normalized identifier strings for a key column
///
/// Integer and string identifiers map to their decimal text, integral floats
/// drop the `.0`, so `CN`/`PLT_CN` pairs join even when the two tables store
/// them with different physical types.
pub fn key_values(batch: &RecordBatch, table: &str, name: &str) -> Result<Vec<Option<String>>> {
    let array = column(batch, table, name)?;
    key_strings(array, name)
}

/// Normalized identifier strings for an array (see [`key_values`])
pub fn key_strings(array: &ArrayRef, name: &str) -> Result<Vec<Option<String>>> {
    if is_float(array.data_type()) {
        Ok(array_f64(array, name)?
            .into_iter()
            .map(|v| v.map(float_key))
            .collect())
    } else {
        array_text(array, name)
    }
}

/// Read a column as grouping values, keeping integer codes as integers
pub fn group_values(batch: &RecordBatch, table: &str, name: &str) -> Result<Vec<GroupValue>> {
    let array = column(batch, table, name)?;
    let data_type = array.data_type();

    if is_integer(data_type) {
        return Ok(array_i64(array, name)?
            .into_iter()
            .map(|v| v.map_or(GroupValue::Null, GroupValue::Int))
            .collect());
    }

    if is_float(data_type) {
        return Ok(array_f64(array, name)?
            .into_iter()
            .map(|v| match v {
                Some(x) if x.fract() == 0.0 && x.abs() < 9.0e15 => GroupValue::Int(x as i64),
                Some(x) => GroupValue::Text(x.to_string()),
                None => GroupValue::Null,
            })
            .collect());
    }

    if matches!(data_type, DataType::Boolean) {
        let values = array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| type_error(name, data_type))?;
        return Ok(values
            .iter()
            .map(|v| v.map_or(GroupValue::Null, GroupValue::Bool))
            .collect());
    }

    Ok(array_text(array, name)?
        .into_iter()
        .map(|v| v.map_or(GroupValue::Null, GroupValue::Text))
        .collect())
}
