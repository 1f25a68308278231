//! Streamed transaction-bundle export.
//!
//! Records are appended to the `entry` array as they flow through, so the
//! whole bundle never has to be held in memory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{ClientError, Result};

pub struct BundleWriter<W: Write = BufWriter<File>> {
    out: W,
    base_url: String,
    entries: usize,
}

impl BundleWriter {
    /// Creates `path` and writes the bundle header.
    pub fn create(path: impl AsRef<Path>, bundle_id: &str, base_url: &str) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), bundle_id, base_url)
    }
}

impl<W: Write> BundleWriter<W> {
    pub fn new(mut out: W, bundle_id: &str, base_url: &str) -> Result<Self> {
        write!(
            out,
            "{{\n  \"resourceType\": \"Bundle\",\n  \"id\": {},\n  \"type\": \"transaction\",\n  \"entry\": [",
            serde_json::to_string(bundle_id)?
        )?;
        Ok(Self {
            out,
            base_url: base_url.trim_end_matches('/').to_string(),
            entries: 0,
        })
    }

    /// Appends `record` as a POST entry. Records without an id get a
    /// `urn:uuid:` full URL.
    pub fn write(&mut self, record: &Value) -> Result<()> {
        let resource_type = record
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or(ClientError::MissingField("resourceType"))?;
        let full_url = match record.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => format!("{}/{resource_type}/{id}", self.base_url),
            _ => format!("urn:uuid:{}", Uuid::new_v4()),
        };

        let entry = json!({
            "fullUrl": full_url,
            "resource": record,
            "request": {
                "method": "POST",
                "url": resource_type,
            }
        });

        if self.entries > 0 {
            self.out.write_all(b",")?;
        }
        write!(self.out, "\n    {}", serde_json::to_string(&entry)?)?;
        self.entries += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Closes the entry array and the bundle object, returning the sink.
    pub fn finish(mut self) -> Result<W> {
        self.out.write_all(b"\n  ]\n}\n")?;
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_is_valid_json() {
        let mut writer = BundleWriter::new(Vec::new(), "load-1", "http://h/fhir/").unwrap();
        writer
            .write(&json!({"resourceType": "Patient", "id": "p1"}))
            .unwrap();
        writer
            .write(&json!({"resourceType": "Observation", "id": "o1"}))
            .unwrap();
        assert_eq!(writer.len(), 2);

        let bytes = writer.finish().unwrap();
        let bundle: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(bundle["id"], "load-1");
        assert_eq!(bundle["type"], "transaction");
        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["fullUrl"], "http://h/fhir/Patient/p1");
        assert_eq!(entries[1]["request"]["url"], "Observation");
        assert_eq!(entries[1]["request"]["method"], "POST");
    }

    #[test]
    fn test_empty_bundle_is_valid_json() {
        let writer = BundleWriter::new(Vec::new(), "empty", "http://h").unwrap();
        assert!(writer.is_empty());
        let bundle: Value = serde_json::from_slice(&writer.finish().unwrap()).unwrap();
        assert_eq!(bundle["entry"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_record_without_id_gets_urn() {
        let mut writer = BundleWriter::new(Vec::new(), "b", "http://h/fhir").unwrap();
        writer.write(&json!({"resourceType": "Patient"})).unwrap();
        writer.write(&json!({"resourceType": "Patient"})).unwrap();
        let bundle: Value = serde_json::from_slice(&writer.finish().unwrap()).unwrap();

        let urls: Vec<&str> = bundle["entry"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["fullUrl"].as_str().unwrap())
            .collect();
        assert!(urls.iter().all(|u| u.starts_with("urn:uuid:") && u.len() == 45));
        assert_ne!(urls[0], urls[1]);
    }

    #[test]
    fn test_record_without_type_rejected() {
        let mut writer = BundleWriter::new(Vec::new(), "b", "http://h").unwrap();
        let err = writer.write(&json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, ClientError::MissingField("resourceType")));
    }
}
