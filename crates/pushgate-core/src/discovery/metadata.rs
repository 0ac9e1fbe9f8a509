//! Binary metadata: format sniffing and the embedded test registration block.
//!
//! Test frameworks emit a registration block into each test binary at build
//! time:
//!
//! ```text
//! @@PUSHGATE-TESTREG@@{"metadata":{...},"types":[{"name":"...","markers":["TestClass"]}]}@@END-PUSHGATE-TESTREG@@
//! ```
//!
//! A recognised binary without a block declares no types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Start delimiter of the registration block.
pub const REGISTRY_START: &[u8] = b"@@PUSHGATE-TESTREG@@";
/// End delimiter of the registration block.
pub const REGISTRY_END: &[u8] = b"@@END-PUSHGATE-TESTREG@@";
/// Metadata key that opts a binary out of the gate.
pub const OPT_OUT_KEY: &str = "RunTestsBeforePush";
/// Type marker identifying a test class.
pub const TEST_CLASS_MARKER: &str = "TestClass";

/// Binary container formats recognised by magic bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BinaryFormat {
    Elf,
    Pe,
    MachO,
    Wasm,
}

impl BinaryFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let magic = bytes.get(..4)?;
        match magic {
            [0x7f, b'E', b'L', b'F'] => Some(BinaryFormat::Elf),
            [0x00, b'a', b's', b'm'] => Some(BinaryFormat::Wasm),
            [0xfe, 0xed, 0xfa, 0xce | 0xcf]
            | [0xce | 0xcf, 0xfa, 0xed, 0xfe]
            | [0xca, 0xfe, 0xba, 0xbe] => Some(BinaryFormat::MachO),
            [b'M', b'Z', _, _] => Some(BinaryFormat::Pe),
            _ => None,
        }
    }
}

/// Why a binary's metadata could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("unreadable: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("not a recognised binary format")]
    UnknownFormat,

    #[error("malformed registration block: {0}")]
    MalformedRegistration(String),
}

/// A type declared in the registration block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeclaredType {
    pub name: String,
    #[serde(default)]
    pub markers: Vec<String>,
}

impl DeclaredType {
    pub fn is_test_class(&self) -> bool {
        self.markers.iter().any(|m| m == TEST_CLASS_MARKER)
    }
}

#[derive(Debug, Deserialize)]
struct RawRegistration {
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    types: serde_json::Value,
}

/// Loaded metadata of one binary.
#[derive(Debug, Clone)]
pub struct BinaryMetadata {
    pub format: BinaryFormat,
    pub attributes: BTreeMap<String, String>,
    types: serde_json::Value,
}

impl BinaryMetadata {
    /// Load metadata from the raw bytes of a binary.
    pub fn load(bytes: &[u8]) -> Result<Self, AnalysisError> {
        let format = BinaryFormat::sniff(bytes).ok_or(AnalysisError::UnknownFormat)?;

        let Some(block) = registration_block(bytes)? else {
            return Ok(Self {
                format,
                attributes: BTreeMap::new(),
                types: serde_json::Value::Null,
            });
        };

        let raw: RawRegistration = serde_json::from_slice(block)
            .map_err(|e| AnalysisError::MalformedRegistration(e.to_string()))?;

        Ok(Self {
            format,
            attributes: raw.metadata,
            types: raw.types,
        })
    }

    /// Whether the binary carries `RunTestsBeforePush = false`.
    pub fn is_opted_out(&self) -> bool {
        self.attributes
            .iter()
            .any(|(k, v)| k == OPT_OUT_KEY && v.eq_ignore_ascii_case("false"))
    }

    /// Declared types. Absent types are an empty list.
    pub fn declared_types(&self) -> Result<Vec<DeclaredType>, serde_json::Error> {
        if self.types.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(self.types.clone())
    }
}

/// Classification of one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerVerdict {
    /// Holds at least one test class.
    Container { test_types: Vec<String> },
    /// Excluded by the opt-out marker.
    OptedOut,
    /// No test classes declared.
    NoTests,
}

/// Decide whether a binary is a test container.
pub fn classify(meta: &BinaryMetadata) -> ContainerVerdict {
    if meta.is_opted_out() {
        return ContainerVerdict::OptedOut;
    }

    let types = match meta.declared_types() {
        Ok(types) => types,
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate declared types; assuming none");
            Vec::new()
        }
    };

    let test_types: Vec<String> = types
        .into_iter()
        .filter(DeclaredType::is_test_class)
        .map(|t| t.name)
        .collect();

    if test_types.is_empty() {
        ContainerVerdict::NoTests
    } else {
        ContainerVerdict::Container { test_types }
    }
}

fn registration_block(bytes: &[u8]) -> Result<Option<&[u8]>, AnalysisError> {
    let Some(start) = find(bytes, REGISTRY_START) else {
        return Ok(None);
    };
    let body = &bytes[start + REGISTRY_START.len()..];
    let end = find(body, REGISTRY_END).ok_or_else(|| {
        AnalysisError::MalformedRegistration("missing end delimiter".to_string())
    })?;
    Ok(Some(&body[..end]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Build the bytes of a fake binary carrying a registration block.
///
/// Used by tests and fixtures.
pub fn encode_registration(
    format: BinaryFormat,
    metadata: &[(&str, &str)],
    types: &[DeclaredType],
) -> Vec<u8> {
    let mut bytes = match format {
        BinaryFormat::Elf => vec![0x7f, b'E', b'L', b'F', 2, 1, 1, 0],
        BinaryFormat::Pe => b"MZ\x90\x00\x03\x00\x00\x00".to_vec(),
        BinaryFormat::MachO => vec![0xcf, 0xfa, 0xed, 0xfe, 7, 0, 0, 1],
        BinaryFormat::Wasm => vec![0x00, b'a', b's', b'm', 1, 0, 0, 0],
    };
    bytes.extend_from_slice(&[0u8; 24]);

    let metadata: BTreeMap<&str, &str> = metadata.iter().copied().collect();
    let block = serde_json::json!({ "metadata": metadata, "types": types });
    bytes.extend_from_slice(REGISTRY_START);
    bytes.extend_from_slice(block.to_string().as_bytes());
    bytes.extend_from_slice(REGISTRY_END);
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}
