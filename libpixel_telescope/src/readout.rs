//! Wire format of the readout stream.
//!
//! Every readout travels as two message parts: a JSON metadata mapping tagged by `name`,
//! followed (for `ReadoutData` only) by the raw payload bytes. The payload is a contiguous
//! little endian array described by the `dtype` and `shape` fields of the metadata.
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;
use std::str::FromStr;

use super::constants::{FILENAME_NAME, READOUT_DATA_NAME};
use super::error::DecodeError;

/// Element types which can appear in the `dtype` field of readout metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ElementType {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// The numpy name of the type, as written into metadata
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl FromStr for ElementType {
    type Err = DecodeError;

    /// Accepts numpy names (`uint32`) and little endian array protocol strings (`<u4`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "uint8" | "|u1" | "<u1" | "=u1" | "u1" => Self::Uint8,
            "uint16" | "<u2" | "=u2" | "u2" => Self::Uint16,
            "uint32" | "<u4" | "=u4" | "u4" => Self::Uint32,
            "uint64" | "<u8" | "=u8" | "u8" => Self::Uint64,
            "int8" | "|i1" | "<i1" | "=i1" | "i1" => Self::Int8,
            "int16" | "<i2" | "=i2" | "i2" => Self::Int16,
            "int32" | "<i4" | "=i4" | "i4" => Self::Int32,
            "int64" | "<i8" | "=i8" | "i8" => Self::Int64,
            "float32" | "<f4" | "=f4" | "f4" => Self::Float32,
            "float64" | "<f8" | "=f8" | "f8" => Self::Float64,
            _ => return Err(DecodeError::UnknownDtype(s.to_string())),
        };
        Ok(kind)
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Typed description of a payload: element type plus dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDescriptor {
    pub dtype: ElementType,
    pub shape: Vec<usize>,
}

impl ArrayDescriptor {
    pub fn new(dtype: ElementType, shape: Vec<usize>) -> Self {
        Self { dtype, shape }
    }

    /// Parse the loosely typed metadata fields
    pub fn from_metadata(dtype: &str, shape: &[usize]) -> Result<Self, DecodeError> {
        Ok(Self {
            dtype: ElementType::from_str(dtype)?,
            shape: shape.to_vec(),
        })
    }

    /// Number of elements the shape calls for. An empty shape is a scalar. `None` if the
    /// count does not fit a `usize`.
    pub fn n_elements(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
    }

    pub fn byte_len(&self) -> Option<usize> {
        self.n_elements()?.checked_mul(self.dtype.size())
    }

    /// Check that a payload of `payload_len` bytes matches this descriptor exactly
    pub fn validate(&self, payload_len: usize) -> Result<(), DecodeError> {
        let size = self.dtype.size();
        if payload_len % size != 0 {
            return Err(DecodeError::UnalignedPayload {
                len: payload_len,
                size,
            });
        }
        let elements = payload_len / size;
        match self.n_elements() {
            Some(expected) if expected == elements => Ok(()),
            expected => Err(DecodeError::ShapeMismatch {
                shape: self.shape.clone(),
                elements,
                expected: expected.unwrap_or(usize::MAX),
            }),
        }
    }

    /// Reinterpret the payload bytes as a typed array of this shape
    pub fn decode(&self, payload: &[u8]) -> Result<ReadoutArray, DecodeError> {
        self.validate(payload.len())?;
        let n = payload.len() / self.dtype.size();
        let array = match self.dtype {
            ElementType::Uint8 => ReadoutArray::Uint8(self.shaped(payload.to_vec())?),
            ElementType::Int8 => {
                ReadoutArray::Int8(self.shaped(payload.iter().map(|b| *b as i8).collect())?)
            }
            ElementType::Uint16 => {
                let mut data = vec![0u16; n];
                LittleEndian::read_u16_into(payload, &mut data);
                ReadoutArray::Uint16(self.shaped(data)?)
            }
            ElementType::Uint32 => {
                let mut data = vec![0u32; n];
                LittleEndian::read_u32_into(payload, &mut data);
                ReadoutArray::Uint32(self.shaped(data)?)
            }
            ElementType::Uint64 => {
                let mut data = vec![0u64; n];
                LittleEndian::read_u64_into(payload, &mut data);
                ReadoutArray::Uint64(self.shaped(data)?)
            }
            ElementType::Int16 => {
                let mut data = vec![0i16; n];
                LittleEndian::read_i16_into(payload, &mut data);
                ReadoutArray::Int16(self.shaped(data)?)
            }
            ElementType::Int32 => {
                let mut data = vec![0i32; n];
                LittleEndian::read_i32_into(payload, &mut data);
                ReadoutArray::Int32(self.shaped(data)?)
            }
            ElementType::Int64 => {
                let mut data = vec![0i64; n];
                LittleEndian::read_i64_into(payload, &mut data);
                ReadoutArray::Int64(self.shaped(data)?)
            }
            ElementType::Float32 => {
                let mut data = vec![0f32; n];
                LittleEndian::read_f32_into(payload, &mut data);
                ReadoutArray::Float32(self.shaped(data)?)
            }
            ElementType::Float64 => {
                let mut data = vec![0f64; n];
                LittleEndian::read_f64_into(payload, &mut data);
                ReadoutArray::Float64(self.shaped(data)?)
            }
        };
        Ok(array)
    }

    fn shaped<T>(&self, data: Vec<T>) -> Result<ArrayD<T>, DecodeError> {
        let elements = data.len();
        ArrayD::from_shape_vec(IxDyn(&self.shape), data).map_err(|_| DecodeError::ShapeMismatch {
            shape: self.shape.clone(),
            elements,
            expected: self.n_elements().unwrap_or(usize::MAX),
        })
    }
}

/// A reconstructed payload array
#[derive(Debug, Clone, PartialEq)]
pub enum ReadoutArray {
    Uint8(ArrayD<u8>),
    Uint16(ArrayD<u16>),
    Uint32(ArrayD<u32>),
    Uint64(ArrayD<u64>),
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

impl ReadoutArray {
    /// A flat buffer of raw front-end words, the usual payload of a readout
    pub fn from_words(words: &[u32]) -> Self {
        Self::Uint32(Array1::from_vec(words.to_vec()).into_dyn())
    }

    pub fn descriptor(&self) -> ArrayDescriptor {
        let (dtype, shape) = match self {
            Self::Uint8(a) => (ElementType::Uint8, a.shape()),
            Self::Uint16(a) => (ElementType::Uint16, a.shape()),
            Self::Uint32(a) => (ElementType::Uint32, a.shape()),
            Self::Uint64(a) => (ElementType::Uint64, a.shape()),
            Self::Int8(a) => (ElementType::Int8, a.shape()),
            Self::Int16(a) => (ElementType::Int16, a.shape()),
            Self::Int32(a) => (ElementType::Int32, a.shape()),
            Self::Int64(a) => (ElementType::Int64, a.shape()),
            Self::Float32(a) => (ElementType::Float32, a.shape()),
            Self::Float64(a) => (ElementType::Float64, a.shape()),
        };
        ArrayDescriptor::new(dtype, shape.to_vec())
    }

    /// Serialize to the little endian payload layout, in logical (row-major) order
    pub fn to_bytes(&self) -> Vec<u8> {
        // An array held in memory always has a representable byte length
        let mut bytes = vec![0u8; self.descriptor().byte_len().unwrap_or_default()];
        match self {
            Self::Uint8(a) => bytes.copy_from_slice(&a.iter().copied().collect::<Vec<_>>()),
            Self::Int8(a) => bytes.copy_from_slice(&a.iter().map(|v| *v as u8).collect::<Vec<_>>()),
            Self::Uint16(a) => LittleEndian::write_u16_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
            Self::Uint32(a) => LittleEndian::write_u32_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
            Self::Uint64(a) => LittleEndian::write_u64_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
            Self::Int16(a) => LittleEndian::write_i16_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
            Self::Int32(a) => LittleEndian::write_i32_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
            Self::Int64(a) => LittleEndian::write_i64_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
            Self::Float32(a) => LittleEndian::write_f32_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
            Self::Float64(a) => LittleEndian::write_f64_into(&a.iter().copied().collect::<Vec<_>>(), &mut bytes),
        }
        bytes
    }

    /// Flatten into raw words. Integer elements are truncated to their low 32 bits, which
    /// keeps both data record windows intact.
    pub fn to_words(&self) -> Result<Vec<u32>, DecodeError> {
        let words = match self {
            Self::Uint8(a) => a.iter().map(|v| *v as u32).collect(),
            Self::Uint16(a) => a.iter().map(|v| *v as u32).collect(),
            Self::Uint32(a) => a.iter().copied().collect(),
            Self::Uint64(a) => a.iter().map(|v| *v as u32).collect(),
            Self::Int8(a) => a.iter().map(|v| *v as u32).collect(),
            Self::Int16(a) => a.iter().map(|v| *v as u32).collect(),
            Self::Int32(a) => a.iter().map(|v| *v as u32).collect(),
            Self::Int64(a) => a.iter().map(|v| *v as u32).collect(),
            Self::Float32(_) | Self::Float64(_) => {
                return Err(DecodeError::NotRawWords(self.descriptor().dtype.to_string()))
            }
        };
        Ok(words)
    }
}

/// Metadata fields of a `ReadoutData` message (everything but the name tag)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadoutHeader {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub timestamp_start: f64,
    pub timestamp_stop: f64,
    pub readout_error: i64,
    #[serde(default)]
    pub scan_parameters: Map<String, Value>,
}

/// An out-of-band message carrying a free-form configuration mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub name: String,
    pub fields: Map<String, Value>,
}

impl ControlMessage {
    /// The run-start notice sent at the beginning of a run. `conf` is usually the name of
    /// the output file of the run.
    pub fn run_start(conf: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(String::from("conf"), conf);
        Self {
            name: String::from(FILENAME_NAME),
            fields,
        }
    }
}

/// A decoded metadata message. The set of tags is closed; anything unrecognized becomes
/// an ignored control message.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaMessage {
    ReadoutData(ReadoutHeader),
    RunStart(ControlMessage),
    Ignored(ControlMessage),
}

#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    name: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

impl MetaMessage {
    /// Parse the JSON metadata part of a message
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut map: Map<String, Value> = serde_json::from_slice(bytes)?;
        let name = match map.remove("name") {
            Some(Value::String(name)) => name,
            _ => return Err(DecodeError::MissingName),
        };
        match name.as_str() {
            READOUT_DATA_NAME => {
                let header: ReadoutHeader = serde_json::from_value(Value::Object(map))
                    .map_err(|e| DecodeError::BadReadoutHeader(e.to_string()))?;
                Ok(Self::ReadoutData(header))
            }
            FILENAME_NAME => Ok(Self::RunStart(ControlMessage { name, fields: map })),
            _ => Ok(Self::Ignored(ControlMessage { name, fields: map })),
        }
    }

    /// Serialize into the JSON metadata part of a message
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::ReadoutData(header) => serde_json::to_vec(&Tagged {
                name: READOUT_DATA_NAME,
                body: header,
            }),
            Self::RunStart(control) | Self::Ignored(control) => serde_json::to_vec(&Tagged {
                name: &control.name,
                body: &control.fields,
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::ReadoutData(_) => READOUT_DATA_NAME,
            Self::RunStart(control) | Self::Ignored(control) => &control.name,
        }
    }
}

/// One readout as it travels on the wire, attributed to a module.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutFrame {
    pub module_name: String,
    pub descriptor: ArrayDescriptor,
    pub raw_bytes: Vec<u8>,
    pub timestamp_start: f64,
    pub timestamp_stop: f64,
    pub error_flag: i64,
    pub scan_parameters: Map<String, Value>,
}

impl ReadoutFrame {
    /// Build a frame from a buffer of raw words
    pub fn from_words(
        module_name: &str,
        words: &[u32],
        timestamp_start: f64,
        timestamp_stop: f64,
        error_flag: i64,
    ) -> Self {
        let array = ReadoutArray::from_words(words);
        Self {
            module_name: module_name.to_string(),
            descriptor: array.descriptor(),
            raw_bytes: array.to_bytes(),
            timestamp_start,
            timestamp_stop,
            error_flag,
            scan_parameters: Map::new(),
        }
    }

    /// Combine a received header and payload, checking that they agree
    pub fn from_parts(
        module_name: &str,
        header: ReadoutHeader,
        payload: Vec<u8>,
    ) -> Result<Self, DecodeError> {
        let descriptor = ArrayDescriptor::from_metadata(&header.dtype, &header.shape)?;
        descriptor.validate(payload.len())?;
        Ok(Self {
            module_name: module_name.to_string(),
            descriptor,
            raw_bytes: payload,
            timestamp_start: header.timestamp_start,
            timestamp_stop: header.timestamp_stop,
            error_flag: header.readout_error,
            scan_parameters: header.scan_parameters,
        })
    }

    pub fn header(&self) -> ReadoutHeader {
        ReadoutHeader {
            dtype: self.descriptor.dtype.name().to_string(),
            shape: self.descriptor.shape.clone(),
            timestamp_start: self.timestamp_start,
            timestamp_stop: self.timestamp_stop,
            readout_error: self.error_flag,
            scan_parameters: self.scan_parameters.clone(),
        }
    }

    pub fn array(&self) -> Result<ReadoutArray, DecodeError> {
        self.descriptor.decode(&self.raw_bytes)
    }

    pub fn words(&self) -> Result<Vec<u32>, DecodeError> {
        self.array()?.to_words()
    }

    /// The metadata part of this frame on the wire
    pub fn metadata_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        MetaMessage::ReadoutData(self.header()).to_json()
    }
}
