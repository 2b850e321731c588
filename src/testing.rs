//! In-memory fakes for the engine's external boundaries
//!
//! Deterministic stand-ins for the broker, the search index, the job
//! store and the dead-letter transport. Failures are scripted per fake so
//! tests can drive exact error sequences without a live dependency.

use crate::broker::{InboundDelivery, MessageSource};
use crate::dlq::{DlqEnvelope, DlqTransport};
use crate::error::SyncError;
use crate::index::{BulkOp, IndexHealth, SearchIndex};
use crate::job::{Job, JobStatus, JobStatusUpdate, JobStore};
use crate::recovery::AlertSink;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory [`JobStore`]
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    fail_ping: Mutex<Option<String>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script ping failures with the given message
    pub fn fail_ping(&self, message: &str) {
        *self.fail_ping.lock().unwrap() = Some(message.to_string());
    }

    /// Seed a job, standing in for the upstream producer that creates
    /// jobs before enqueueing messages
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Id of the single stored job; panics unless exactly one exists
    pub fn only_job_id(&self) -> String {
        let jobs = self.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1, "expected exactly one job, found {}", jobs.len());
        jobs[0].id.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_job_for_record(&self, record_id: &str) -> Result<Option<String>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .rev()
            .find(|j| j.record_id == record_id && !j.status.is_terminal())
            .map(|j| j.id.clone()))
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: JobStatusUpdate,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| anyhow!("no such job: {job_id}"))?;
        job.status = status;
        apply_update(job, update);
        Ok(())
    }

    async fn annotate(&self, job_id: &str, update: JobStatusUpdate) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| anyhow!("no such job: {job_id}"))?;
        apply_update(job, update);
        Ok(())
    }

    async fn status_counts(&self) -> Result<HashMap<JobStatus, u64>> {
        let jobs = self.jobs.lock().unwrap();
        let mut counts = HashMap::new();
        for job in jobs.iter() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn failed_jobs(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        let mut failed: Vec<Job> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(failed)
    }

    async fn ping(&self) -> Result<()> {
        match self.fail_ping.lock().unwrap().as_ref() {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

fn apply_update(job: &mut Job, update: JobStatusUpdate) {
    if let Some(message) = update.error_message {
        job.error_message = Some(message);
    }
    if let Some(kind) = update.error_type {
        job.error_type = Some(kind);
    }
    if let Some(count) = update.retry_count {
        job.retry_count = count;
    }
    if let Some(trace_id) = update.trace_id {
        job.trace_id = Some(trace_id);
    }
    if let Some(processed_at) = update.processed_at {
        job.processed_at = Some(processed_at);
    }
}

/// In-memory [`SearchIndex`] with scripted failures
#[derive(Default)]
pub struct MemoryIndex {
    documents: Mutex<HashMap<String, Value>>,
    index_calls: AtomicU64,
    remaining_failures: Mutex<Option<(u32, String)>>,
    health_failure: Mutex<Option<String>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with the given message
    pub fn fail_times(&self, count: u32, message: &str) {
        *self.remaining_failures.lock().unwrap() = Some((count, message.to_string()));
    }

    /// Fail health probes with the given message
    pub fn fail_health(&self, message: &str) {
        *self.health_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Total index/update/delete/bulk operations attempted
    pub fn index_calls(&self) -> u64 {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn document(&self, id: &str) -> Option<Value> {
        self.documents.lock().unwrap().get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    fn check_failure(&self) -> Result<()> {
        let mut scripted = self.remaining_failures.lock().unwrap();
        if let Some((remaining, message)) = scripted.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                let message = message.clone();
                if *remaining == 0 {
                    *scripted = None;
                }
                return Err(anyhow!("{message}"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn index_document(&self, id: &str, document: &Value) -> Result<()> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.documents
            .lock()
            .unwrap()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn update_document(&self, id: &str, document: &Value) -> Result<()> {
        self.index_document(id, document).await
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        // Deleting a missing document is a no-op
        self.documents.lock().unwrap().remove(id);
        Ok(())
    }

    async fn bulk(&self, ops: &[BulkOp]) -> Result<()> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let mut documents = self.documents.lock().unwrap();
        for op in ops {
            match op {
                BulkOp::Index { id, document } => {
                    documents.insert(id.clone(), document.clone());
                }
                BulkOp::Delete { id } => {
                    documents.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn health(&self) -> Result<IndexHealth> {
        if let Some(message) = self.health_failure.lock().unwrap().as_ref() {
            return Err(anyhow!("{message}"));
        }
        let documents = self.documents.lock().unwrap();
        Ok(IndexHealth {
            status: "green".to_string(),
            doc_count: documents.len() as u64,
            size_bytes: 0,
        })
    }
}

/// In-memory [`MessageSource`] backed by a queue of deliveries
pub struct MemoryBroker {
    queue_name: String,
    pending: Mutex<VecDeque<InboundDelivery>>,
    in_flight: Mutex<HashMap<u64, InboundDelivery>>,
    acked: Mutex<Vec<u64>>,
    rejected: Mutex<Vec<u64>>,
    requeues: AtomicU64,
    next_tag: AtomicU64,
    fail_ping: Mutex<Option<String>>,
}

impl MemoryBroker {
    pub fn new(queue_name: &str) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            acked: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            requeues: AtomicU64::new(0),
            next_tag: AtomicU64::new(1),
            fail_ping: Mutex::new(None),
        }
    }

    /// Enqueue a payload for delivery
    pub fn push(&self, payload: impl Into<Vec<u8>>) {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push_back(InboundDelivery {
            delivery_tag: tag,
            payload: payload.into(),
            queue: self.queue_name.clone(),
        });
    }

    pub fn fail_ping(&self, message: &str) {
        *self.fail_ping.lock().unwrap() = Some(message.to_string());
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn rejected(&self) -> Vec<u64> {
        self.rejected.lock().unwrap().clone()
    }

    pub fn requeue_count(&self) -> u64 {
        self.requeues.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn next(&self) -> Result<Option<InboundDelivery>> {
        let delivery = self.pending.lock().unwrap().pop_front();
        if let Some(delivery) = &delivery {
            self.in_flight
                .lock()
                .unwrap()
                .insert(delivery.delivery_tag, delivery.clone());
        }
        Ok(delivery)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.in_flight.lock().unwrap().remove(&delivery_tag);
        self.acked.lock().unwrap().push(delivery_tag);
        Ok(())
    }

    async fn nack_requeue(&self, delivery_tag: u64) -> Result<()> {
        let delivery = self
            .in_flight
            .lock()
            .unwrap()
            .remove(&delivery_tag)
            .ok_or_else(|| anyhow!("unknown delivery tag: {delivery_tag}"))?;
        self.requeues.fetch_add(1, Ordering::SeqCst);
        // Redelivery goes to the front, matching broker requeue semantics
        self.pending.lock().unwrap().push_front(delivery);
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        self.in_flight.lock().unwrap().remove(&delivery_tag);
        self.rejected.lock().unwrap().push(delivery_tag);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        match self.fail_ping.lock().unwrap().as_ref() {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    async fn queue_depth(&self) -> Result<u64> {
        Ok(self.pending.lock().unwrap().len() as u64)
    }
}

/// In-memory [`DlqTransport`]
#[derive(Default)]
pub struct MemoryDlqTransport {
    parked: Mutex<Vec<DlqEnvelope>>,
    requeued: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryDlqTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads republished by replay, with their target queues
    pub fn requeued(&self) -> Vec<(String, Vec<u8>)> {
        self.requeued.lock().unwrap().clone()
    }
}

#[async_trait]
impl DlqTransport for MemoryDlqTransport {
    async fn publish(&self, envelope: &DlqEnvelope) -> Result<()> {
        self.parked.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    async fn depth(&self) -> Result<u64> {
        Ok(self.parked.lock().unwrap().len() as u64)
    }

    async fn fetch(&self, message_id: &str) -> Result<Option<DlqEnvelope>> {
        let parked = self.parked.lock().unwrap();
        Ok(parked.iter().find(|e| e.message_id == message_id).cloned())
    }

    async fn remove(&self, message_id: &str) -> Result<()> {
        self.parked
            .lock()
            .unwrap()
            .retain(|e| e.message_id != message_id);
        Ok(())
    }

    async fn requeue(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.requeued
            .lock()
            .unwrap()
            .push((queue.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn purge(&self) -> Result<u64> {
        let mut parked = self.parked.lock().unwrap();
        let count = parked.len() as u64;
        parked.clear();
        Ok(count)
    }

    async fn snapshot(&self) -> Result<Vec<DlqEnvelope>> {
        Ok(self.parked.lock().unwrap().clone())
    }
}

/// [`AlertSink`] that records every alert it receives
#[derive(Default)]
pub struct CapturingAlerts {
    alerts: Mutex<Vec<(SyncError, u64)>>,
}

impl CapturingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<(SyncError, u64)> {
        self.alerts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AlertSink for CapturingAlerts {
    async fn alert(&self, error: &SyncError, occurrences: u64) {
        self.alerts.lock().unwrap().push((error.clone(), occurrences));
    }
}
