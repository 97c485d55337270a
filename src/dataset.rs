//! Dataset descriptors shared between the host driver and the executor

use std::{fmt, str::FromStr};

/// Element type of a dataset grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DataType {
    /// Element storage size in bytes
    pub fn storage_size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    /// Symbolic tag published to the UDF through the runtime type table
    pub fn symbol(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int8" => Ok(DataType::Int8),
            "int16" => Ok(DataType::Int16),
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "uint8" => Ok(DataType::UInt8),
            "uint16" => Ok(DataType::UInt16),
            "uint32" => Ok(DataType::UInt32),
            "uint64" => Ok(DataType::UInt64),
            "float32" => Ok(DataType::Float32),
            "float64" => Ok(DataType::Float64),
            other => Err(format!("unknown datatype tag {:?}", other)),
        }
    }
}

/// Description of one input or output dataset: name, element type, grid
/// shape, and the memory region holding element values in row-major order.
///
/// The data pointer is owned by the host driver; descriptors only borrow
/// it. The executor clones the output descriptor and retargets the clone's
/// pointer at the shared region before the UDF runs.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub name: String,
    pub datatype: DataType,
    pub dimensions: Vec<u64>,
    data: *mut u8,
}

impl DatasetInfo {
    /// Describe a dataset with no attached buffer
    pub fn new(name: impl Into<String>, datatype: DataType, dimensions: Vec<u64>) -> Self {
        DatasetInfo {
            name: name.into(),
            datatype,
            dimensions,
            data: std::ptr::null_mut(),
        }
    }

    /// Attach the element buffer.
    ///
    /// # Safety
    ///
    /// `data` must point to at least [DatasetInfo::room] bytes, and stay
    /// valid for as long as this descriptor (or any clone of it) is in use.
    pub unsafe fn set_data(&mut self, data: *mut u8) {
        self.data = data;
    }

    /// The attached element buffer, null when none was set
    pub fn data(&self) -> *mut u8 {
        self.data
    }

    /// Number of elements in the grid
    pub fn grid_size(&self) -> usize {
        self.dimensions.iter().product::<u64>() as usize
    }

    /// Element storage size in bytes
    pub fn storage_size(&self) -> usize {
        self.datatype.storage_size()
    }

    /// Total byte length of the element buffer
    pub fn room(&self) -> usize {
        self.grid_size() * self.storage_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_sizes() {
        assert_eq!(DataType::Int8.storage_size(), 1);
        assert_eq!(DataType::UInt16.storage_size(), 2);
        assert_eq!(DataType::Int32.storage_size(), 4);
        assert_eq!(DataType::Float32.storage_size(), 4);
        assert_eq!(DataType::UInt64.storage_size(), 8);
        assert_eq!(DataType::Float64.storage_size(), 8);
    }

    #[test]
    fn symbol_round_trip() {
        for datatype in &[
            DataType::Int8,
            DataType::Int16,
            DataType::Int32,
            DataType::Int64,
            DataType::UInt8,
            DataType::UInt16,
            DataType::UInt32,
            DataType::UInt64,
            DataType::Float32,
            DataType::Float64,
        ] {
            assert_eq!(datatype.symbol().parse::<DataType>().unwrap(), *datatype);
        }
        assert!("complex128".parse::<DataType>().is_err());
    }

    #[test]
    fn grid_and_room() {
        let info = DatasetInfo::new("temperature", DataType::Float64, vec![3, 4, 5]);
        assert_eq!(info.grid_size(), 60);
        assert_eq!(info.room(), 480);
        assert!(info.data().is_null());
    }

    #[test]
    fn one_element_grid() {
        let info = DatasetInfo::new("scalar", DataType::Int32, vec![1]);
        assert_eq!(info.grid_size(), 1);
        assert_eq!(info.room(), info.storage_size());
    }
}
