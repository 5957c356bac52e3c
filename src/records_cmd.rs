//! CLI command handler for `records`.

use std::io::Write;

use crate::core::ProvisioningRecord;
use crate::store::LabStore;
use crate::{ProvisionError, ProvisionResult};

/// Print every provisioning record, as a table or as a JSON array.
///
/// Read-only; a database without an `instances` table lists nothing.
pub fn run(store: &dyn LabStore, json: bool) -> ProvisionResult<()> {
    let records = store.records()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_records(&mut out, &records, json)
}

pub fn write_records<W: Write>(out: &mut W, records: &[ProvisioningRecord], json: bool) -> ProvisionResult<()> {
    if json {
        let text = serde_json::to_string_pretty(records)
            .map_err(|e| ProvisionError::Config(format!("failed to serialize records: {e}")))?;
        writeln!(out, "{text}")?;
        return Ok(());
    }

    writeln!(out, "{:>6}  {:<36}  {:<20}  {}", "ID", "LAB", "INSTANCE", "STATUS")?;
    for r in records {
        writeln!(
            out,
            "{:>6}  {:<36}  {:<20}  {}",
            r.id,
            r.lab_id,
            r.instance_id.as_deref().unwrap_or("-"),
            r.status
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RecordStatus;
    use uuid::Uuid;

    fn record() -> ProvisioningRecord {
        ProvisioningRecord {
            id: 1,
            lab_id: Uuid::nil(),
            instance_id: Some("i-0abc123".into()),
            status: RecordStatus::Provisioned,
        }
    }

    #[test]
    fn test_table_output() {
        let mut buf = Vec::new();
        write_records(&mut buf, &[record()], false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("i-0abc123"));
        assert!(lines[1].ends_with("provisioned"));
    }

    #[test]
    fn test_run_does_not_create_schema() {
        let store = crate::store::MemoryLabStore::new();
        run(&store, true).unwrap();
        assert_eq!(store.schema_creations(), 0);
    }

    #[test]
    fn test_json_output() {
        let mut buf = Vec::new();
        write_records(&mut buf, &[record()], true).unwrap();
        let parsed: Vec<ProvisioningRecord> = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed, vec![record()]);
    }
}
