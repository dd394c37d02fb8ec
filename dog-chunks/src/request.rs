use std::collections::HashMap;

use crate::{ChunkError, ChunkFile, ChunkResult, ValidationKeys};

/// One decoded field of an upload form
#[derive(Debug)]
pub enum FormField {
    Text(String),
    File(ChunkFile),
}

impl FormField {
    pub fn text<S: Into<String>>(value: S) -> Self {
        Self::Text(value.into())
    }
}

/// Everything needed to accept one chunk
#[derive(Debug)]
pub struct AddChunkRequest {
    pub index: i64,
    pub file: ChunkFile,
    pub chunk_size: u64,
    pub total_size: u64,
}

impl AddChunkRequest {
    pub fn new(index: i64, file: ChunkFile, chunk_size: u64, total_size: u64) -> Self {
        Self {
            index,
            file,
            chunk_size,
            total_size,
        }
    }

    /// Build a request from decoded form fields, reading each value under the
    /// field name configured in `keys`.
    ///
    /// The index must be a non-negative integer; chunk and total sizes must
    /// be at least 1.
    pub fn from_fields(
        keys: &ValidationKeys,
        mut fields: HashMap<String, FormField>,
    ) -> ChunkResult<Self> {
        keys.validate()?;

        let index = integer_field(&fields, &keys.index)?;
        if index < 0 {
            return Err(ChunkError::invalid(format!(
                "field '{}' must be a non-negative integer, got {}",
                keys.index, index
            )));
        }
        let chunk_size = size_field(&fields, &keys.chunk_size)?;
        let total_size = size_field(&fields, &keys.total_size)?;

        let file = match fields.remove(&keys.file) {
            Some(FormField::File(file)) => file,
            Some(FormField::Text(_)) => {
                return Err(ChunkError::invalid(format!("field '{}' must be a file", keys.file)))
            }
            None => {
                return Err(ChunkError::invalid(format!("field '{}' is required", keys.file)))
            }
        };

        Ok(Self::new(index, file, chunk_size, total_size))
    }
}

fn text_field<'a>(fields: &'a HashMap<String, FormField>, key: &str) -> ChunkResult<&'a str> {
    match fields.get(key) {
        Some(FormField::Text(value)) => Ok(value.trim()),
        Some(FormField::File(_)) => {
            Err(ChunkError::invalid(format!("field '{}' must be text", key)))
        }
        None => Err(ChunkError::invalid(format!("field '{}' is required", key))),
    }
}

fn integer_field(fields: &HashMap<String, FormField>, key: &str) -> ChunkResult<i64> {
    let value = text_field(fields, key)?;
    value.parse::<i64>().map_err(|_| {
        ChunkError::invalid(format!("field '{}' must be an integer, got '{}'", key, value))
    })
}

fn size_field(fields: &HashMap<String, FormField>, key: &str) -> ChunkResult<u64> {
    let value = integer_field(fields, key)?;
    if value < 1 {
        return Err(ChunkError::invalid(format!(
            "field '{}' must be at least 1, got {}",
            key, value
        )));
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bytes_stream;

    fn form(index: &str) -> HashMap<String, FormField> {
        let mut fields = HashMap::new();
        fields.insert("index".to_string(), FormField::text(index));
        fields.insert("chunkSize".to_string(), FormField::text("2000"));
        fields.insert("totalSize".to_string(), FormField::text("4001"));
        fields.insert(
            "file".to_string(),
            FormField::File(ChunkFile::new("clip.mp4", bytes_stream("abc"))),
        );
        fields
    }

    #[test]
    fn reads_fields_under_configured_names() {
        let request = AddChunkRequest::from_fields(&ValidationKeys::default(), form("2")).unwrap();
        assert_eq!(request.index, 2);
        assert_eq!(request.chunk_size, 2000);
        assert_eq!(request.total_size, 4001);
        assert_eq!(request.file.original_name, "clip.mp4");
    }

    #[test]
    fn rejects_negative_index_and_missing_file() {
        let err = AddChunkRequest::from_fields(&ValidationKeys::default(), form("-1")).unwrap_err();
        assert!(matches!(err, ChunkError::Invalid { .. }));

        let mut fields = form("0");
        fields.remove("file");
        let err = AddChunkRequest::from_fields(&ValidationKeys::default(), fields).unwrap_err();
        assert!(matches!(err, ChunkError::Invalid { .. }));
    }

    #[test]
    fn unbound_key_is_a_configuration_error() {
        let keys = ValidationKeys {
            chunk_size: String::new(),
            ..ValidationKeys::default()
        };
        let err = AddChunkRequest::from_fields(&keys, form("0")).unwrap_err();
        assert!(matches!(err, ChunkError::Configuration { .. }));
    }
}
