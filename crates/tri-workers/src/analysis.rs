//! File, directory, and global analysis workers (§4.2). All three share
//! this one implementation and differ only in how they gather source
//! content for their scope and in the [`WorkerKind`] they report as.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tri_cache::Cache;
use tri_core::{
    CandidateRelationship, ErrorCode, Evidence, Job, JobType, OutboxRow, Poi, PoiKind,
    RelationshipType, TriError, TypeRegistry, WorkerKind,
};
use tri_llm::{LlmClient, correction_prompt, parse_response};
use tri_store::RelationalStore;

#[derive(Debug, Deserialize)]
struct RawPoi {
    kind: PoiKind,
    name: String,
    file_path: String,
    start_line: Option<u32>,
    end_line: Option<u32>,
}

impl RawPoi {
    fn into_poi(self) -> Poi {
        Poi::new(self.kind, self.name, self.file_path, self.start_line, self.end_line)
    }
}

fn default_confidence() -> f64 {
    0.8
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    source: RawPoi,
    target: RawPoi,
    #[serde(rename = "type")]
    rel_type: RelationshipType,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize, Default)]
struct RawAnalysisResponse {
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

/// Shared worker for the three analysis job types. Constructed once per
/// [`WorkerKind`]; a process typically runs several of each behind
/// independent task loops (§5 "N independent processes").
pub struct AnalysisWorker {
    worker_kind: WorkerKind,
    root_path: PathBuf,
    llm: Arc<dyn LlmClient>,
    cache: Arc<dyn Cache>,
    store: Arc<RelationalStore>,
    registry: TypeRegistry,
}

impl AnalysisWorker {
    /// Builds a worker of `worker_kind`, reading source under `root_path`.
    #[must_use]
    pub fn new(
        worker_kind: WorkerKind,
        root_path: impl Into<PathBuf>,
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn Cache>,
        store: Arc<RelationalStore>,
    ) -> Self {
        Self {
            worker_kind,
            root_path: root_path.into(),
            llm,
            cache,
            store,
            registry: TypeRegistry::default(),
        }
    }

    /// Runs §4.2's five-step algorithm for one job. `Ok` acknowledges
    /// the job; `Err` is handed to the queue's `nack`, which decides
    /// retry vs. dead-letter from [`TriError::is_retryable`].
    pub async fn process(&self, job: &Job) -> Result<(), TriError> {
        let run_id = job
            .payload
            .get("run_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("run_id"))?
            .to_string();

        let scope_label = self.scope_label(job)?;
        let source = self.read_scope_content(job)?;
        let prompt = self.build_prompt(&scope_label, &source);

        let response = self.query_with_correction(&prompt).await?;
        let parsed: RawAnalysisResponse = serde_json::from_value(response).unwrap_or_default();

        for candidate in parsed.relationships {
            self.ingest_candidate(&run_id, job, candidate).await?;
        }
        Ok(())
    }

    async fn query_with_correction(&self, prompt: &str) -> Result<serde_json::Value, TriError> {
        let first = self.llm.query(prompt).await.map_err(TriError::from)?;
        match parse_response(&first) {
            Ok(value) => Ok(value),
            Err(first_err) => {
                let retry_prompt = correction_prompt(prompt, &first_err.to_string());
                let second = self.llm.query(&retry_prompt).await.map_err(TriError::from)?;
                parse_response(&second).map_err(|second_err| TriError::InvalidPayload {
                    code: ErrorCode::MalformedLlmResponse,
                    message: format!("response still malformed after correction attempt: {second_err}"),
                })
            }
        }
    }

    async fn ingest_candidate(&self, run_id: &str, job: &Job, candidate: RawRelationship) -> Result<(), TriError> {
        let source = candidate.source.into_poi();
        let target = candidate.target.into_poi();
        let rel = CandidateRelationship::new(source.id.clone(), target.id.clone(), candidate.rel_type);
        let hash = rel.hash(&self.registry);

        self.persist_poi(&source)?;
        self.persist_poi(&target)?;

        if source.file_path != target.file_path {
            // Cross-file reference: resolving the owning job lets a
            // future pass prioritize re-running it first if needed. No
            // hard dependency is created here — the manifest entry is
            // informational, matching §4.2 step 3a.
            let _ = self.cache.job_for_file(run_id, &target.file_path).await.map_err(TriError::from)?;
        }

        let candidate_expectation = u32::from(self.worker_kind.authority_rank()) + 1;
        let seeded = self.cache.seed_expectation(run_id, &hash, candidate_expectation).await.map_err(TriError::from)?;
        if !seeded {
            self.cache.raise_expectation(run_id, &hash, candidate_expectation).await.map_err(TriError::from)?;
        }

        let detail = serde_json::json!({
            "source_poi_id": source.id,
            "target_poi_id": target.id,
            "rel_type": candidate.rel_type.as_str(),
        });
        let evidence = Evidence::new(run_id, &job.id, hash.clone(), self.worker_kind, candidate.confidence, detail, Utc::now());
        let outbox_payload = serde_json::json!({
            "run_id": run_id,
            "relationship_hash": hash,
            "evidence_id": evidence.id,
        });
        self.store
            .insert_evidence_with_outbox(&evidence, OutboxRow::ANALYSIS_FINDING, &outbox_payload)
            .map_err(TriError::from)?;
        Ok(())
    }

    /// Writes `poi`'s file row (if not already present) and upserts the
    /// POI row itself, so a relationship's endpoints are queryable by
    /// the graph builder and `tri status` regardless of whether the
    /// file was part of this scope's own walked tree (§4.6's "on create
    /// set all properties" needs somewhere to read them back from).
    fn persist_poi(&self, poi: &Poi) -> Result<(), TriError> {
        let file_id = Poi::compute_id(PoiKind::File, &poi.file_path, &poi.file_path, None);
        self.store.insert_file(&file_id, &poi.file_path, None, None).map_err(TriError::from)?;
        self.store
            .upsert_poi(&poi.id, &file_id, &poi.file_path, &poi.name, poi.kind.tag(), poi.start_line, poi.end_line)
            .map_err(TriError::from)?;
        Ok(())
    }

    fn scope_label(&self, job: &Job) -> Result<String, TriError> {
        match job.job_type {
            JobType::FileAnalysis => job
                .payload
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| missing_field("file_path")),
            JobType::DirectoryAnalysis => job
                .payload
                .get("dir_path")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| missing_field("dir_path")),
            JobType::GlobalAnalysis => Ok(".".to_string()),
            other => Err(TriError::Fatal {
                code: ErrorCode::ScoutContractViolation,
                message: format!("analysis worker received non-analysis job type {other:?}"),
            }),
        }
    }

    fn read_scope_content(&self, job: &Job) -> Result<String, TriError> {
        match job.job_type {
            JobType::FileAnalysis => {
                let file_path = job.payload.get("file_path").and_then(|v| v.as_str()).ok_or_else(|| missing_field("file_path"))?;
                read_file(&self.root_path, file_path)
            }
            JobType::DirectoryAnalysis => {
                let dir_path = job.payload.get("dir_path").and_then(|v| v.as_str()).ok_or_else(|| missing_field("dir_path"))?;
                read_dir_shallow(&self.root_path, dir_path)
            }
            JobType::GlobalAnalysis => Ok(String::new()),
            other => Err(TriError::Fatal {
                code: ErrorCode::ScoutContractViolation,
                message: format!("analysis worker received non-analysis job type {other:?}"),
            }),
        }
    }

    fn build_prompt(&self, scope_label: &str, source: &str) -> String {
        format!(
            "Identify code relationships ({}) within scope \"{scope_label}\".\n\
             Respond with a single JSON object: {{\"relationships\":[{{\"source\":{{...}},\"target\":{{...}},\"type\":\"CALLS\",\"confidence\":0.0}}]}}\n\
             Source:\n{source}",
            RelationshipType::ALL.iter().map(RelationshipType::as_str).collect::<Vec<_>>().join(", "),
        )
    }
}

fn missing_field(field: &str) -> TriError {
    TriError::InvalidPayload {
        code: ErrorCode::MissingRequiredField,
        message: format!("job payload missing required field \"{field}\""),
    }
}

fn read_file(root: &Path, relative: &str) -> Result<String, TriError> {
    std::fs::read_to_string(root.join(relative)).map_err(|_| TriError::NotFound {
        code: ErrorCode::FileNotFound,
        message: format!("source file disappeared: {relative}"),
    })
}

fn read_dir_shallow(root: &Path, relative_dir: &str) -> Result<String, TriError> {
    let dir = root.join(relative_dir);
    let entries = std::fs::read_dir(&dir).map_err(|_| TriError::NotFound {
        code: ErrorCode::FileNotFound,
        message: format!("directory disappeared: {relative_dir}"),
    })?;
    let mut combined = String::new();
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false)
            && let Ok(content) = std::fs::read_to_string(entry.path())
        {
            combined.push_str(&content);
            combined.push('\n');
        }
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tri_cache::MemoryCache;
    use tri_core::JobStatus;
    use tri_llm::ScriptedLlm;

    fn sample_job(run_id: &str, file_path: &str) -> Job {
        let mut job = Job::new(run_id, JobType::FileAnalysis, serde_json::json!({ "run_id": run_id, "file_path": file_path }));
        job.status = JobStatus::Active;
        job
    }

    #[tokio::test]
    async fn process_writes_evidence_and_seeds_expectation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "function foo() { bar(); }").unwrap();

        let response = serde_json::json!({
            "relationships": [{
                "source": {"kind": "function", "name": "foo", "file_path": "a.js", "start_line": 1, "end_line": 1},
                "target": {"kind": "function", "name": "bar", "file_path": "a.js", "start_line": 2, "end_line": 2},
                "type": "CALLS",
                "confidence": 0.9
            }]
        })
        .to_string();

        let llm = Arc::new(ScriptedLlm::always(response));
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(tri_store::RelationalStore::open_in_memory().unwrap());
        let worker = AnalysisWorker::new(WorkerKind::File, dir.path(), llm, cache.clone(), store.clone());

        let job = sample_job("run-1", "a.js");
        worker.process(&job).await.unwrap();

        let expectation = cache.expectation("run-1", &expected_hash()).await.unwrap();
        assert_eq!(expectation, Some(2), "file worker authority_rank 1 + 1 == 2");

        assert_eq!(store.list_files().unwrap().len(), 1);
        let foo = store.get_poi(&Poi::new(PoiKind::Function, "foo", "a.js", Some(1), Some(1)).id).unwrap().unwrap();
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.file_path, "a.js");

        fn expected_hash() -> String {
            let source = Poi::new(PoiKind::Function, "foo", "a.js", Some(1), Some(1));
            let target = Poi::new(PoiKind::Function, "bar", "a.js", Some(2), Some(2));
            CandidateRelationship::new(source.id, target.id, RelationshipType::Calls).hash(&TypeRegistry::default())
        }
    }

    #[tokio::test]
    async fn malformed_twice_is_invalid_payload_not_retryable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "").unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("not json".to_string()), Ok("still not json".to_string())]));
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(tri_store::RelationalStore::open_in_memory().unwrap());
        let worker = AnalysisWorker::new(WorkerKind::File, dir.path(), llm, cache, store);

        let job = sample_job("run-1", "a.js");
        let err = worker.process(&job).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, TriError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn correction_prompt_recovers_from_one_malformed_response() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "").unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("not json at all".to_string()), Ok("{\"relationships\":[]}".to_string())]));
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(tri_store::RelationalStore::open_in_memory().unwrap());
        let worker = AnalysisWorker::new(WorkerKind::File, dir.path(), llm, cache, store);

        let job = sample_job("run-1", "a.js");
        worker.process(&job).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::always("{\"relationships\":[]}".to_string()));
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(tri_store::RelationalStore::open_in_memory().unwrap());
        let worker = AnalysisWorker::new(WorkerKind::File, dir.path(), llm, cache, store);

        let job = sample_job("run-1", "missing.js");
        let err = worker.process(&job).await.unwrap_err();
        assert!(matches!(err, TriError::NotFound { .. }));
    }
}
