//! Request and solution persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use distil_common::model::filter::{FilterParams, DEFAULT_FILTER_SIZE};
use distil_common::model::request::{
    Progress, Request, RequestFeature, Solution, SolutionResult, SolutionScore,
};
use distil_common::{Error, Result};

use crate::storage::SolutionStorage;

/// Creates the orchestration tables when absent.
pub async fn init_tables(pool: &PgPool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS requests (
            request_id TEXT PRIMARY KEY,
            dataset TEXT NOT NULL,
            target TEXT NOT NULL,
            task TEXT NOT NULL,
            sub_task TEXT NOT NULL DEFAULT '',
            metrics TEXT NOT NULL DEFAULT '[]',
            max_solutions INTEGER NOT NULL DEFAULT 0,
            max_time BIGINT NOT NULL DEFAULT 0,
            progress TEXT NOT NULL,
            created_time TIMESTAMPTZ NOT NULL,
            last_updated_time TIMESTAMPTZ NOT NULL
        );",
        "CREATE TABLE IF NOT EXISTS request_features (
            request_id TEXT NOT NULL,
            feature_name TEXT NOT NULL,
            feature_type TEXT NOT NULL
        );",
        "CREATE TABLE IF NOT EXISTS request_filters (
            request_id TEXT NOT NULL,
            filters TEXT NOT NULL
        );",
        "CREATE TABLE IF NOT EXISTS solutions (
            solution_id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            progress TEXT NOT NULL,
            created_time TIMESTAMPTZ NOT NULL,
            last_updated_time TIMESTAMPTZ NOT NULL
        );",
        "CREATE TABLE IF NOT EXISTS solution_scores (
            solution_id TEXT NOT NULL,
            metric TEXT NOT NULL,
            score DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (solution_id, metric)
        );",
        "CREATE TABLE IF NOT EXISTS solution_results (
            result_id TEXT PRIMARY KEY,
            solution_id TEXT NOT NULL,
            fitted_solution_id TEXT NOT NULL,
            result_uri TEXT NOT NULL,
            progress TEXT NOT NULL,
            created_time TIMESTAMPTZ NOT NULL,
            predicted_key TEXT NOT NULL,
            error_key TEXT NOT NULL
        );",
        "CREATE TABLE IF NOT EXISTS column_hints (
            storage_name TEXT NOT NULL,
            key TEXT NOT NULL,
            ty TEXT NOT NULL,
            PRIMARY KEY (storage_name, key)
        );",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Solution storage gateway over Postgres.
#[derive(Clone)]
pub struct PostgresSolutionStorage {
    pool: PgPool,
}

impl PostgresSolutionStorage {
    pub fn new(pool: PgPool) -> Self {
        PostgresSolutionStorage { pool }
    }

    fn parse_progress(raw: &str) -> Result<Progress> {
        Progress::parse(raw)
            .ok_or_else(|| Error::Storage(format!("unknown progress value `{raw}`")))
    }

    async fn load_scores(&self, solution_id: &str) -> Result<Vec<SolutionScore>> {
        let rows = sqlx::query(
            "SELECT solution_id, metric, score FROM solution_scores WHERE solution_id = $1;",
        )
        .bind(solution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SolutionScore {
                    solution_id: row.try_get("solution_id")?,
                    metric: row.try_get("metric")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    fn result_from_row(row: &sqlx::postgres::PgRow) -> Result<SolutionResult> {
        Ok(SolutionResult {
            result_id: row.try_get("result_id")?,
            solution_id: row.try_get("solution_id")?,
            fitted_solution_id: row.try_get("fitted_solution_id")?,
            result_uri: row.try_get("result_uri")?,
            progress: Self::parse_progress(row.try_get::<String, _>("progress")?.as_str())?,
            created_time: row.try_get("created_time")?,
            predicted_key: row.try_get("predicted_key")?,
            error_key: row.try_get("error_key")?,
        })
    }

    async fn load_solution(&self, row: &sqlx::postgres::PgRow) -> Result<Solution> {
        let solution_id: String = row.try_get("solution_id")?;
        let result_row = sqlx::query(
            "SELECT result_id, solution_id, fitted_solution_id, result_uri, progress, \
             created_time, predicted_key, error_key FROM solution_results \
             WHERE solution_id = $1 ORDER BY created_time DESC LIMIT 1;",
        )
        .bind(&solution_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Solution {
            solution_id: solution_id.clone(),
            request_id: row.try_get("request_id")?,
            progress: Self::parse_progress(row.try_get::<String, _>("progress")?.as_str())?,
            created_time: row.try_get("created_time")?,
            scores: self.load_scores(&solution_id).await?,
            result: result_row.as_ref().map(Self::result_from_row).transpose()?,
        })
    }
}

#[async_trait]
impl SolutionStorage for PostgresSolutionStorage {
    async fn persist_request(&self, request: &Request, created: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO requests \
             (request_id, dataset, target, task, sub_task, metrics, max_solutions, \
              max_time, progress, created_time, last_updated_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10);",
        )
        .bind(&request.request_id)
        .bind(&request.dataset)
        .bind(&request.target)
        .bind(&request.task)
        .bind(&request.sub_task)
        .bind(serde_json::to_string(&request.metrics)?)
        .bind(request.max_solutions)
        .bind(request.max_time)
        .bind(request.progress.as_str())
        .bind(created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_request(
        &self,
        request_id: &str,
        progress: Progress,
        updated: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE requests SET progress = $1, last_updated_time = $2 WHERE request_id = $3;",
        )
        .bind(progress.as_str())
        .bind(updated)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn persist_request_feature(
        &self,
        request_id: &str,
        feature_name: &str,
        feature_type: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO request_features (request_id, feature_name, feature_type) \
             VALUES ($1, $2, $3);",
        )
        .bind(request_id)
        .bind(feature_name)
        .bind(feature_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn persist_request_filters(
        &self,
        request_id: &str,
        filters: &FilterParams,
    ) -> Result<()> {
        sqlx::query("INSERT INTO request_filters (request_id, filters) VALUES ($1, $2);")
            .bind(request_id)
            .bind(serde_json::to_string(filters)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn persist_solution(
        &self,
        request_id: &str,
        solution_id: &str,
        progress: Progress,
        updated: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO solutions \
             (solution_id, request_id, progress, created_time, last_updated_time) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (solution_id) DO UPDATE \
             SET progress = excluded.progress, last_updated_time = excluded.last_updated_time;",
        )
        .bind(solution_id)
        .bind(request_id)
        .bind(progress.as_str())
        .bind(updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn persist_solution_score(
        &self,
        solution_id: &str,
        metric: &str,
        score: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO solution_scores (solution_id, metric, score) VALUES ($1, $2, $3) \
             ON CONFLICT (solution_id, metric) DO UPDATE SET score = excluded.score;",
        )
        .bind(solution_id)
        .bind(metric)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn persist_solution_result(&self, result: &SolutionResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO solution_results \
             (result_id, solution_id, fitted_solution_id, result_uri, progress, \
              created_time, predicted_key, error_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (result_id) DO UPDATE SET progress = excluded.progress;",
        )
        .bind(&result.result_id)
        .bind(&result.solution_id)
        .bind(&result.fitted_solution_id)
        .bind(&result.result_uri)
        .bind(result.progress.as_str())
        .bind(result.created_time)
        .bind(&result.predicted_key)
        .bind(&result.error_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_request(&self, request_id: &str) -> Result<Option<Request>> {
        let row = sqlx::query(
            "SELECT request_id, dataset, target, task, sub_task, metrics, max_solutions, \
             max_time, progress, created_time, last_updated_time \
             FROM requests WHERE request_id = $1;",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let feature_rows = sqlx::query(
            "SELECT request_id, feature_name, feature_type FROM request_features \
             WHERE request_id = $1;",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        let features = feature_rows
            .iter()
            .map(|r| {
                Ok(RequestFeature {
                    request_id: r.try_get("request_id")?,
                    feature_name: r.try_get("feature_name")?,
                    feature_type: r.try_get("feature_type")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let filter_row =
            sqlx::query("SELECT filters FROM request_filters WHERE request_id = $1 LIMIT 1;")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;
        let filters = match filter_row {
            Some(r) => serde_json::from_str(&r.try_get::<String, _>("filters")?)?,
            None => FilterParams::new(DEFAULT_FILTER_SIZE),
        };

        Ok(Some(Request {
            request_id: row.try_get("request_id")?,
            dataset: row.try_get("dataset")?,
            target: row.try_get("target")?,
            task: row.try_get("task")?,
            sub_task: row.try_get("sub_task")?,
            metrics: serde_json::from_str(&row.try_get::<String, _>("metrics")?)?,
            max_solutions: row.try_get("max_solutions")?,
            max_time: row.try_get("max_time")?,
            progress: Self::parse_progress(row.try_get::<String, _>("progress")?.as_str())?,
            created_time: row.try_get("created_time")?,
            last_updated_time: row.try_get("last_updated_time")?,
            features,
            filters,
        }))
    }

    async fn fetch_request_ids(&self, dataset: &str) -> Result<Vec<String>> {
        let rows = if dataset.is_empty() {
            sqlx::query("SELECT request_id FROM requests ORDER BY created_time;")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(
                "SELECT request_id FROM requests WHERE dataset = $1 ORDER BY created_time;",
            )
            .bind(dataset)
            .fetch_all(&self.pool)
            .await?
        };
        rows.iter()
            .map(|r| r.try_get::<String, _>("request_id").map_err(Error::from))
            .collect()
    }

    async fn fetch_solutions(&self, request_id: &str) -> Result<Vec<Solution>> {
        let rows = sqlx::query(
            "SELECT solution_id, request_id, progress, created_time FROM solutions \
             WHERE request_id = $1 ORDER BY created_time;",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        let mut solutions = Vec::with_capacity(rows.len());
        for row in &rows {
            solutions.push(self.load_solution(row).await?);
        }
        Ok(solutions)
    }

    async fn fetch_solution(&self, solution_id: &str) -> Result<Option<Solution>> {
        let row = sqlx::query(
            "SELECT solution_id, request_id, progress, created_time FROM solutions \
             WHERE solution_id = $1;",
        )
        .bind(solution_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.load_solution(&row).await?)),
            None => Ok(None),
        }
    }

    async fn fetch_solution_result(&self, solution_id: &str) -> Result<Option<SolutionResult>> {
        let row = sqlx::query(
            "SELECT result_id, solution_id, fitted_solution_id, result_uri, progress, \
             created_time, predicted_key, error_key FROM solution_results \
             WHERE solution_id = $1 ORDER BY created_time DESC LIMIT 1;",
        )
        .bind(solution_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::result_from_row).transpose()
    }

    async fn has_active_request(&self, dataset: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM requests WHERE dataset = $1 \
             AND progress IN ('PENDING', 'RUNNING')) AS active;",
        )
        .bind(dataset)
        .fetch_one(&self.pool)
        .await?;
        let active: bool = row.try_get("active")?;
        Ok(active)
    }
}
