//! Postgres-backed `Store`, built on the same `PgPoolOptions` connection
//! setup and raw `sqlx::query`/`query_as` usage used elsewhere in this
//! codebase — no query builder or ORM, just hand-written SQL against a
//! `Pool<Postgres>`.

use async_trait::async_trait;
use fame_core::{Analysis, AnalysisId, FameError, FameResult, File, FileId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::sqlx_err;
use crate::store::Store;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> FameResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(sqlx_err)?;
        crate::schema::init(&pool).await.map_err(sqlx_err)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_versioned(
        &self,
        table: &str,
        key_col: &str,
        key: &str,
    ) -> FameResult<Option<(i64, serde_json::Value)>> {
        let sql = format!("SELECT version, data FROM {table} WHERE {key_col} = $1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let version: i64 = row.try_get("version").map_err(sqlx_err)?;
                let data: serde_json::Value = row.try_get("data").map_err(sqlx_err)?;
                Ok(Some((version, data)))
            }
        }
    }

    /// Load-mutate-save retry loop backing every `with_*` method. `f` runs
    /// against the decoded document; the row is written back only if
    /// `version` has not moved since the read — the same compare-and-set
    /// spirit as a single-column `UPDATE ... WHERE id=$1` statement, just
    /// generalized to a whole-document update since these documents are
    /// JSONB rather than flat columns.
    async fn cas<T, F, R>(
        &self,
        table: &str,
        key_col: &str,
        key: &str,
        insert_if_missing: Option<&T>,
        mut f: F,
    ) -> FameResult<R>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send,
        F: FnMut(&mut T) -> R + Send,
    {
        loop {
            let existing = self.load_versioned(table, key_col, key).await?;
            let (version, mut doc): (i64, T) = match existing {
                Some((v, data)) => {
                    let doc = serde_json::from_value(data)
                        .map_err(|e| FameError::Store(e.to_string()))?;
                    (v, doc)
                }
                None => match insert_if_missing {
                    Some(seed) => (
                        -1,
                        serde_json::from_value(serde_json::to_value(seed).unwrap())
                            .map_err(|e| FameError::Store(e.to_string()))?,
                    ),
                    None => return Err(FameError::Store(format!("{table}/{key} not found"))),
                },
            };

            let result = f(&mut doc);
            let data = serde_json::to_value(&doc).map_err(|e| FameError::Store(e.to_string()))?;

            let affected = if version < 0 {
                let sql = format!(
                    "INSERT INTO {table} ({key_col}, version, data) VALUES ($1, 0, $2)
                     ON CONFLICT ({key_col}) DO NOTHING"
                );
                sqlx::query(&sql)
                    .bind(key)
                    .bind(&data)
                    .execute(&self.pool)
                    .await
                    .map_err(sqlx_err)?
                    .rows_affected()
            } else {
                let sql = format!(
                    "UPDATE {table} SET version = version + 1, data = $1
                     WHERE {key_col} = $2 AND version = $3"
                );
                sqlx::query(&sql)
                    .bind(&data)
                    .bind(key)
                    .bind(version)
                    .execute(&self.pool)
                    .await
                    .map_err(sqlx_err)?
                    .rows_affected()
            };

            if affected == 1 {
                return Ok(result);
            }
            // lost the race, retry against the fresh row
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_file(&self, id: FileId) -> FameResult<Option<File>> {
        let key = id.to_string();
        match self.load_versioned("files", "id::text", &key).await? {
            Some((_, data)) => {
                Ok(Some(serde_json::from_value(data).map_err(|e| FameError::Store(e.to_string()))?))
            }
            None => Ok(None),
        }
    }

    async fn find_file_by_sha256(&self, sha256: &str) -> FameResult<Option<File>> {
        let row = sqlx::query("SELECT data FROM files WHERE sha256 = $1")
            .bind(sha256)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let data: serde_json::Value = row.try_get("data").map_err(sqlx_err)?;
                Ok(Some(serde_json::from_value(data).map_err(|e| FameError::Store(e.to_string()))?))
            }
        }
    }

    async fn put_file(&self, file: &File) -> FameResult<()> {
        let data = serde_json::to_value(file).map_err(|e| FameError::Store(e.to_string()))?;
        sqlx::query(
            "INSERT INTO files (id, sha256, version, data) VALUES ($1, $2, 0, $3)
             ON CONFLICT (id) DO UPDATE SET sha256 = $2, version = files.version + 1, data = $3",
        )
        .bind(file.id.to_string())
        .bind(&file.sha256)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn with_file<F, T>(&self, id: FileId, mut f: F) -> FameResult<T>
    where
        F: FnMut(&mut File) -> T + Send,
        T: Send,
    {
        self.cas::<File, _, _>("files", "id::text", &id.to_string(), None, |file| f(file))
            .await
    }

    async fn get_analysis(&self, id: AnalysisId) -> FameResult<Option<Analysis>> {
        match self
            .load_versioned("analyses", "id::text", &id.to_string())
            .await?
        {
            Some((_, data)) => {
                Ok(Some(serde_json::from_value(data).map_err(|e| FameError::Store(e.to_string()))?))
            }
            None => Ok(None),
        }
    }

    async fn put_analysis(&self, analysis: &Analysis) -> FameResult<()> {
        let data = serde_json::to_value(analysis).map_err(|e| FameError::Store(e.to_string()))?;
        sqlx::query(
            "INSERT INTO analyses (id, version, data) VALUES ($1, 0, $2)
             ON CONFLICT (id) DO UPDATE SET version = analyses.version + 1, data = $2",
        )
        .bind(analysis.id.to_string())
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn with_analysis<F, T>(&self, id: AnalysisId, mut f: F) -> FameResult<T>
    where
        F: FnMut(&mut Analysis) -> T + Send,
        T: Send,
    {
        self.cas::<Analysis, _, _>("analyses", "id::text", &id.to_string(), None, |a| f(a))
            .await
    }

    async fn list_modules(&self) -> FameResult<Vec<fame_core::ModuleInfo>> {
        let rows = sqlx::query("SELECT data FROM modules")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data").map_err(sqlx_err)?;
                serde_json::from_value(data).map_err(|e| FameError::Store(e.to_string()))
            })
            .collect()
    }

    async fn put_module(&self, module: &fame_core::ModuleInfo) -> FameResult<()> {
        let data = serde_json::to_value(module).map_err(|e| FameError::Store(e.to_string()))?;
        sqlx::query(
            "INSERT INTO modules (name, version, data) VALUES ($1, 0, $2)
             ON CONFLICT (name) DO UPDATE SET version = modules.version + 1, data = $2",
        )
        .bind(&module.name)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_config(&self, name: &str) -> FameResult<Option<serde_json::Value>> {
        Ok(self
            .load_versioned("settings", "name", name)
            .await?
            .map(|(_, data)| data))
    }

    async fn put_config(&self, name: &str, value: serde_json::Value) -> FameResult<()> {
        sqlx::query(
            "INSERT INTO settings (name, version, data) VALUES ($1, 0, $2)
             ON CONFLICT (name) DO UPDATE SET version = settings.version + 1, data = $2",
        )
        .bind(name)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_internal(&self, name: &str) -> FameResult<Option<serde_json::Value>> {
        Ok(self
            .load_versioned("internals", "name", name)
            .await?
            .map(|(_, data)| data))
    }

    async fn with_internal<F, T>(&self, name: &str, mut f: F) -> FameResult<T>
    where
        F: FnMut(&mut serde_json::Value) -> T + Send,
        T: Send,
    {
        self.cas::<serde_json::Value, _, _>(
            "internals",
            "name",
            name,
            Some(&serde_json::Value::Object(Default::default())),
            |v| f(v),
        )
        .await
    }

    async fn touch_last_update(&self) -> FameResult<()> {
        self.with_internal("updates", |doc| {
            let now = chrono::Utc::now().to_rfc3339();
            if let serde_json::Value::Object(map) = doc {
                map.insert("last_update".to_string(), serde_json::Value::String(now));
            }
        })
        .await
    }
}
