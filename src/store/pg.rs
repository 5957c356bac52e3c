//! Postgres (Diesel) implementation of `LabStore`.
//!
//! A fresh connection is established for every operation; nothing is pooled.
//! The claim in `claim_next` runs in one transaction: the candidate row is
//! locked with `FOR UPDATE SKIP LOCKED` and the `claimed` row is guarded by the
//! unique index on `instances.lab_id`, so two processes never claim the same lab.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{ConnectionError, DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use diesel::sql_types::{Bool, Integer, Nullable, Text, Uuid as SqlUuid};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::core::{LabRequest, ProvisioningRecord, RecordStatus};
use crate::{ProvisionError, ProvisionResult};

use super::traits::LabStore;

/// Lost claim races tolerated before giving up on this run.
const CLAIM_ATTEMPTS: usize = 3;

/// Issued one by one; every statement is idempotent.
const SCHEMA_STATEMENTS: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS instances (
        id SERIAL PRIMARY KEY,
        lab_id UUID NOT NULL,
        instance_id TEXT,
        status TEXT NOT NULL DEFAULT 'provisioned',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "ALTER TABLE instances ADD COLUMN IF NOT EXISTS status TEXT NOT NULL DEFAULT 'provisioned'",
    "ALTER TABLE instances ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ NOT NULL DEFAULT now()",
    "ALTER TABLE instances ALTER COLUMN instance_id DROP NOT NULL",
];

const CREATE_LAB_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS instances_lab_id_key ON instances (lab_id)";

/// Tables written by older releases may hold several rows per lab.
const SELECT_DUPLICATE_LABS: &str = "SELECT lab_id FROM instances
    GROUP BY lab_id HAVING count(*) > 1
    ORDER BY lab_id
    LIMIT 20";

const SELECT_PRESENT: &str = "SELECT to_regclass($1) IS NOT NULL AS present";

const LAB_COLUMNS: &str = "lab_id,
    CAST(instance AS TEXT) AS instance,
    CAST(storage AS INTEGER) AS storage,
    CAST(os AS TEXT) AS os,
    CAST(title AS TEXT) AS title";

const INSERT_CLAIM: &str = "INSERT INTO instances (lab_id, status) VALUES ($1, 'claimed')
    ON CONFLICT (lab_id) DO NOTHING";

const UPSERT_PROVISIONED: &str = "INSERT INTO instances (lab_id, instance_id, status)
    VALUES ($1, $2, 'provisioned')
    ON CONFLICT (lab_id) DO UPDATE
        SET instance_id = EXCLUDED.instance_id, status = 'provisioned', updated_at = now()
        WHERE instances.status = 'claimed'";

/// Turns a claim (or no row) into a terminal `orphaned`/`rejected` row.
const UPSERT_CLOSED: &str = "INSERT INTO instances (lab_id, instance_id, status)
    VALUES ($1, $2, $3)
    ON CONFLICT (lab_id) DO UPDATE
        SET instance_id = COALESCE(EXCLUDED.instance_id, instances.instance_id),
            status = EXCLUDED.status, updated_at = now()
        WHERE instances.status = 'claimed'";

const DELETE_CLAIM: &str = "DELETE FROM instances WHERE lab_id = $1 AND status = 'claimed'";

const SELECT_RECORDS: &str =
    "SELECT id, lab_id, instance_id, status FROM instances ORDER BY id";

const SELECT_RECORD: &str =
    "SELECT id, lab_id, instance_id, status FROM instances WHERE lab_id = $1";

#[derive(QueryableByName, Debug)]
struct LabRow {
    #[diesel(sql_type = SqlUuid)]
    lab_id: Uuid,
    #[diesel(sql_type = Nullable<Text>)]
    instance: Option<String>,
    #[diesel(sql_type = Nullable<Integer>)]
    storage: Option<i32>,
    #[diesel(sql_type = Nullable<Text>)]
    os: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    title: Option<String>,
}

impl TryFrom<LabRow> for LabRequest {
    type Error = ProvisionError;

    fn try_from(row: LabRow) -> Result<Self, Self::Error> {
        let missing =
            |field: &str| ProvisionError::Storage(format!("lab {} has no {field}", row.lab_id));
        let storage = row.storage.ok_or_else(|| missing("storage"))?;
        let storage_size = u32::try_from(storage)
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| {
                ProvisionError::Storage(format!("lab {} has invalid storage {storage}", row.lab_id))
            })?;
        Ok(LabRequest {
            lab_id: row.lab_id,
            instance_type: row.instance.ok_or_else(|| missing("instance"))?,
            storage_size,
            os: row.os.ok_or_else(|| missing("os"))?,
            title: row.title.ok_or_else(|| missing("title"))?,
        })
    }
}

#[derive(QueryableByName, Debug)]
struct RecordRow {
    #[diesel(sql_type = Integer)]
    id: i32,
    #[diesel(sql_type = SqlUuid)]
    lab_id: Uuid,
    #[diesel(sql_type = Nullable<Text>)]
    instance_id: Option<String>,
    #[diesel(sql_type = Text)]
    status: String,
}

impl TryFrom<RecordRow> for ProvisioningRecord {
    type Error = ProvisionError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RecordStatus>()
            .map_err(ProvisionError::Storage)?;
        Ok(ProvisioningRecord {
            id: row.id,
            lab_id: row.lab_id,
            instance_id: row.instance_id,
            status,
        })
    }
}

#[derive(QueryableByName, Debug)]
struct LabIdRow {
    #[diesel(sql_type = SqlUuid)]
    lab_id: Uuid,
}

#[derive(QueryableByName, Debug)]
struct PresentRow {
    #[diesel(sql_type = Bool)]
    present: bool,
}

/// Error for an `instances` table that cannot take the one-row-per-lab index.
fn duplicate_labs_error(lab_ids: &[Uuid]) -> ProvisionError {
    let ids: Vec<String> = lab_ids.iter().map(Uuid::to_string).collect();
    ProvisionError::Storage(format!(
        "instances has several rows for lab(s) {}; keep one row per lab_id before running \
         (one record per lab is enforced by a unique index)",
        ids.join(", ")
    ))
}

impl From<DieselError> for ProvisionError {
    fn from(err: DieselError) -> Self {
        let message = match err {
            DieselError::NotFound => return ProvisionError::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => {
                    format!("unique violation: {}", info.message())
                }
                DatabaseErrorKind::ForeignKeyViolation => {
                    format!("foreign key violation: {}", info.message())
                }
                DatabaseErrorKind::CheckViolation => {
                    format!("check violation: {}", info.message())
                }
                DatabaseErrorKind::NotNullViolation => {
                    format!("not null violation: {}", info.message())
                }
                DatabaseErrorKind::SerializationFailure => {
                    format!("serialization conflict: {}", info.message())
                }
                DatabaseErrorKind::ClosedConnection => {
                    format!("connection closed: {}", info.message())
                }
                other => format!("database error {other:?}: {}", info.message()),
            },
            DieselError::DeserializationError(e) => format!("failed to decode row: {e}"),
            DieselError::SerializationError(e) => format!("failed to encode parameter: {e}"),
            other => other.to_string(),
        };
        ProvisionError::Storage(message)
    }
}

impl From<ConnectionError> for ProvisionError {
    fn from(err: ConnectionError) -> Self {
        ProvisionError::Storage(format!("failed to connect: {err}"))
    }
}

enum Claim {
    Won(LabRequest),
    Lost(Uuid),
    Empty,
}

/// `LabStore` over a Postgres database.
pub struct PgLabStore {
    config: DatabaseConfig,
}

impl PgLabStore {
    pub fn new(config: DatabaseConfig) -> Self {
        PgLabStore { config }
    }

    fn connect(&self) -> ProvisionResult<PgConnection> {
        let mut conn = PgConnection::establish(&self.config.connection_string())?;
        if let Some(ms) = self.config.statement_timeout_ms.filter(|ms| *ms > 0) {
            sql_query(format!("SET statement_timeout = {ms}")).execute(&mut conn)?;
        }
        Ok(conn)
    }

    fn ensure_schema_on(conn: &mut PgConnection) -> ProvisionResult<()> {
        for statement in SCHEMA_STATEMENTS {
            sql_query(statement).execute(conn)?;
        }
        if Self::relation_exists(conn, "instances_lab_id_key")? {
            return Ok(());
        }
        let duplicates: Vec<LabIdRow> = sql_query(SELECT_DUPLICATE_LABS).load(conn)?;
        if !duplicates.is_empty() {
            let ids: Vec<Uuid> = duplicates.into_iter().map(|r| r.lab_id).collect();
            return Err(duplicate_labs_error(&ids));
        }
        sql_query(CREATE_LAB_INDEX).execute(conn)?;
        Ok(())
    }

    fn relation_exists(conn: &mut PgConnection, name: &str) -> ProvisionResult<bool> {
        let rows: Vec<PresentRow> = sql_query(SELECT_PRESENT)
            .bind::<Text, _>(name)
            .load(conn)?;
        Ok(rows.first().is_some_and(|r| r.present))
    }

    fn close_claim(
        &self,
        lab_id: Uuid,
        instance_id: Option<&str>,
        status: RecordStatus,
    ) -> ProvisionResult<()> {
        let mut conn = self.connect()?;
        Self::ensure_schema_on(&mut conn)?;
        let affected = sql_query(UPSERT_CLOSED)
            .bind::<SqlUuid, _>(lab_id)
            .bind::<Nullable<Text>, _>(instance_id.map(str::to_string))
            .bind::<Text, _>(status.as_str())
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(ProvisionError::Storage(format!(
                "lab {lab_id} already has a provisioning record"
            )));
        }
        Ok(())
    }

    fn try_claim(conn: &mut PgConnection) -> ProvisionResult<Claim> {
        let select = format!(
            "SELECT {LAB_COLUMNS} FROM createlab c
             WHERE NOT EXISTS (SELECT 1 FROM instances i WHERE i.lab_id = c.lab_id)
             ORDER BY c.created_at DESC
             LIMIT 1
             FOR UPDATE SKIP LOCKED"
        );
        conn.transaction::<_, ProvisionError, _>(|conn| {
            let rows: Vec<LabRow> = sql_query(&select).load(conn)?;
            let Some(row) = rows.into_iter().next() else {
                return Ok(Claim::Empty);
            };
            let lab = LabRequest::try_from(row)?;
            let inserted = sql_query(INSERT_CLAIM)
                .bind::<SqlUuid, _>(lab.lab_id)
                .execute(conn)?;
            if inserted == 0 {
                return Ok(Claim::Lost(lab.lab_id));
            }
            Ok(Claim::Won(lab))
        })
    }
}

impl LabStore for PgLabStore {
    fn ensure_schema(&self) -> ProvisionResult<()> {
        let mut conn = self.connect()?;
        Self::ensure_schema_on(&mut conn)
    }

    fn latest(&self) -> ProvisionResult<LabRequest> {
        let mut conn = self.connect()?;
        let rows: Vec<LabRow> = sql_query(format!(
            "SELECT {LAB_COLUMNS} FROM createlab ORDER BY created_at DESC LIMIT 1"
        ))
        .load(&mut conn)?;
        let row = rows.into_iter().next().ok_or(ProvisionError::NotFound)?;
        LabRequest::try_from(row)
    }

    fn claim_next(&self) -> ProvisionResult<Option<LabRequest>> {
        let mut conn = self.connect()?;
        for _ in 0..CLAIM_ATTEMPTS {
            match Self::try_claim(&mut conn)? {
                Claim::Won(lab) => {
                    debug!(lab_id = %lab.lab_id, "claimed lab");
                    return Ok(Some(lab));
                }
                Claim::Empty => return Ok(None),
                Claim::Lost(lab_id) => {
                    debug!(%lab_id, "lab claimed by another run, trying next");
                }
            }
        }
        warn!(attempts = CLAIM_ATTEMPTS, "gave up claiming after repeated conflicts");
        Ok(None)
    }

    fn record_instance(&self, lab_id: Uuid, instance_id: &str) -> ProvisionResult<()> {
        let mut conn = self.connect()?;
        Self::ensure_schema_on(&mut conn)?;
        let affected = sql_query(UPSERT_PROVISIONED)
            .bind::<SqlUuid, _>(lab_id)
            .bind::<Text, _>(instance_id)
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(ProvisionError::Storage(format!(
                "lab {lab_id} already has a provisioning record"
            )));
        }
        Ok(())
    }

    fn release_claim(&self, lab_id: Uuid) -> ProvisionResult<()> {
        let mut conn = self.connect()?;
        sql_query(DELETE_CLAIM)
            .bind::<SqlUuid, _>(lab_id)
            .execute(&mut conn)?;
        Ok(())
    }

    fn mark_orphaned(&self, lab_id: Uuid, instance_id: Option<&str>) -> ProvisionResult<()> {
        self.close_claim(lab_id, instance_id, RecordStatus::Orphaned)
    }

    fn mark_rejected(&self, lab_id: Uuid) -> ProvisionResult<()> {
        self.close_claim(lab_id, None, RecordStatus::Rejected)
    }

    fn find_record(&self, lab_id: Uuid) -> ProvisionResult<Option<ProvisioningRecord>> {
        let mut conn = self.connect()?;
        if !Self::relation_exists(&mut conn, "instances")? {
            return Ok(None);
        }
        let rows: Vec<RecordRow> = sql_query(SELECT_RECORD)
            .bind::<SqlUuid, _>(lab_id)
            .load(&mut conn)?;
        rows.into_iter().next().map(ProvisioningRecord::try_from).transpose()
    }

    fn records(&self) -> ProvisionResult<Vec<ProvisioningRecord>> {
        let mut conn = self.connect()?;
        if !Self::relation_exists(&mut conn, "instances")? {
            return Ok(Vec::new());
        }
        let rows: Vec<RecordRow> = sql_query(SELECT_RECORDS).load(&mut conn)?;
        rows.into_iter().map(ProvisioningRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_labs_error_names_every_lab() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let err = duplicate_labs_error(&[a, b]);
        assert!(matches!(err, ProvisionError::Storage(_)));
        let message = err.to_string();
        assert!(message.contains(&a.to_string()));
        assert!(message.contains(&b.to_string()));
    }
}
