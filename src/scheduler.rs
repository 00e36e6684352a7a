//! The conversion pipeline: discover, extract, classify, convert, repack.
//!
//! Every archive moves through [`JobState`]s on its own task. Archives run
//! concurrently up to [`ConversionConfig::effective_archive_concurrency`],
//! while image conversions from *all* archives share one [`WorkerPool`]. Jobs
//! never hold a pool slot themselves, so an archive waiting for its members
//! can not starve the members of another one.
//!
//! Conversion results are written back at the member's original index, which
//! keeps the output order equal to the input order no matter which conversion
//! finishes first.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tempfile::TempDir;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinSet, spawn_blocking};
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveReader, ArchiveWriter, CbzWriter, SystemArchiveReader};
use crate::classifier::{ContentClassifier, MagicClassifier};
use crate::codec::{CjxlCodec, Codec};
use crate::config::ConversionConfig;
use crate::error::{ConversionFailure, Error, Result};
use crate::path_utils::{
    append_member_extension, is_junk_member, path_to_string_lossy, swap_member_extension,
};
use crate::pool::WorkerPool;
use crate::types::{
    ArchiveJob, JobOutcome, JobReport, JobState, MemberEntry, MemberFailure, MemberFailurePolicy,
    MemberKind, MemberOutcome, PackedMember, RunReport, statistics_string,
};
use crate::walker::TreeWalker;

/// Number of discovered archives buffered ahead of the workers.
const DISCOVERY_BUFFER: usize = 64;

/// Prefix of the per-archive workspace directories.
const WORKSPACE_PREFIX: &str = "comic-squash-";

/// Drives a run. Cheap to clone; clones share the pool and the cancellation token.
#[derive(Clone)]
pub struct Scheduler {
    config: Arc<ConversionConfig>,
    pool: WorkerPool,
    codec: Arc<dyn Codec>,
    reader: Arc<dyn ArchiveReader>,
    writer: Arc<dyn ArchiveWriter>,
    classifier: Arc<dyn ContentClassifier>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: Arc<ConversionConfig>,
        codec: Arc<dyn Codec>,
        reader: Arc<dyn ArchiveReader>,
        writer: Arc<dyn ArchiveWriter>,
        classifier: Arc<dyn ContentClassifier>,
    ) -> Self {
        let pool = WorkerPool::new(config.threads);
        Self {
            config,
            pool,
            codec,
            reader,
            writer,
            classifier,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds a scheduler backed by `cjxl`, `unrar` and the zip writer.
    ///
    /// Fails with [`Error::ToolNotFound`] when `cjxl` is not available.
    pub fn with_defaults(config: Arc<ConversionConfig>) -> Result<Self> {
        let codec = CjxlCodec::locate(&config)?;
        let reader = SystemArchiveReader::locate(&config);
        Ok(Self::new(
            config,
            Arc::new(codec),
            Arc::new(reader),
            Arc::new(CbzWriter::default()),
            Arc::new(MagicClassifier),
        ))
    }

    /// Uses `token` to stop the run. Cancelling it stops discovery, drops the
    /// jobs in flight and reports them as [`JobOutcome::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Discovers the archives below the input root and converts all of them.
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - One report per discovered archive, failures included
    /// * `Err(Error::Discovery)` - The input root cannot be scanned
    pub async fn run(&self) -> Result<RunReport> {
        let discovery =
            TreeWalker::new(self.config.input_root.clone(), self.config.output_root.clone())
                .skip_hidden(self.config.skip_hidden)
                .discover()?;
        log::info!(
            "Scanning {} with {} worker(s)",
            path_to_string_lossy(discovery.input_root()),
            self.pool.size()
        );

        let (sender, receiver) = mpsc::channel(DISCOVERY_BUFFER);
        let cancel = self.cancel.clone();
        let walker = spawn_blocking(move || {
            for job in discovery {
                if cancel.is_cancelled() || sender.blocking_send(job).is_err() {
                    break;
                }
            }
        });

        let report = self.dispatch(receiver).await;
        walker.await?;
        report
    }

    /// Converts the given jobs, in the same way [`run`](Scheduler::run) converts discovered ones.
    pub async fn run_jobs(&self, jobs: Vec<ArchiveJob>) -> Result<RunReport> {
        let (sender, receiver) = mpsc::channel(jobs.len().max(1));
        for job in jobs {
            // capacity covers every job, this never waits
            if sender.send(job).await.is_err() {
                break;
            }
        }
        drop(sender);
        self.dispatch(receiver).await
    }

    async fn dispatch(&self, mut receiver: mpsc::Receiver<ArchiveJob>) -> Result<RunReport> {
        let limit = Arc::new(Semaphore::new(self.config.effective_archive_concurrency()));
        let mut tasks = Vec::new();
        // discovered but never started, reported after the running ones
        let mut unstarted = Vec::new();
        let mut report = RunReport::default();

        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    unstarted.push(job);
                    break;
                }
                permit = Arc::clone(&limit).acquire_owned() => permit?,
            };

            let scheduler = self.clone();
            let reported = job.clone();
            let task = tokio::spawn(async move {
                let _permit = permit;
                scheduler.process_job(job).await
            });
            tasks.push((reported, task));
        }

        if self.cancel.is_cancelled() {
            log::warn!("Run cancelled, waiting for running archives to stop");
            self.pool.close();
            receiver.close();
            while let Ok(job) = receiver.try_recv() {
                unstarted.push(job);
            }
        }

        let (jobs, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (job, joined) in jobs.iter().zip(join_all(handles).await) {
            let job_report = joined.unwrap_or_else(|e| {
                log::error!("{}: task failed: {e}", job.relative_path.display());
                JobReport::new(job, JobOutcome::Failed(e.to_string()))
            });
            report.jobs.push(job_report);
        }
        report.jobs.extend(
            unstarted
                .iter()
                .map(|job| JobReport::new(job, JobOutcome::Cancelled)),
        );

        log::info!(
            "{} done, {} skipped, {} failed",
            report.done(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Runs one archive through the whole pipeline.
    ///
    /// Never fails: every problem ends up in the returned report, so sibling
    /// jobs are unaffected.
    pub async fn process_job(&self, mut job: ArchiveJob) -> JobReport {
        let label = job.relative_path.display().to_string();

        if job.collision {
            log::error!(
                "{label}: another archive already converts to {}",
                job.output_path.display()
            );
            job.transition(JobState::Failed);
            return JobReport::new(
                &job,
                JobOutcome::Failed(format!(
                    "output path {} is claimed by another archive",
                    job.output_path.display()
                )),
            );
        }
        if !self.config.overwrite && job.output_path.exists() {
            log::info!("{label}: output exists, skipping");
            return JobReport::new(&job, JobOutcome::Skipped("output already exists".to_string()));
        }
        if self.cancel.is_cancelled() {
            return JobReport::new(&job, JobOutcome::Cancelled);
        }

        let mut report = JobReport::new(&job, JobOutcome::Done);
        report.original_size = tokio::fs::metadata(&job.input_path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();

        let prepared = tokio::select! {
            _ = self.cancel.cancelled() => None,
            packed = self.prepare_archive(&mut job, &mut report) => Some(packed),
        };

        // once writing starts it runs to completion: the persisted archive and
        // the reported outcome always agree
        let result = match prepared {
            Some(Ok(_)) if self.cancel.is_cancelled() => None,
            Some(Ok(packed)) => {
                job.transition(JobState::Writing);
                Some(
                    self.writer
                        .write(&job.output_path, packed, self.config.overwrite)
                        .await
                        .map(|size| report.compressed_size = size),
                )
            }
            Some(Err(e)) => Some(Err(e)),
            None => None,
        };

        match result {
            Some(Ok(())) => {
                job.transition(JobState::Done);
                log::info!(
                    "{}",
                    statistics_string(report.compressed_size, report.original_size, &label)
                );
            }
            Some(Err(e)) => {
                job.transition(JobState::Failed);
                log::error!("{label}: {e}");
                report.outcome = JobOutcome::Failed(e.to_string());
            }
            None => {
                job.transition(JobState::Failed);
                log::warn!("{label}: cancelled");
                report.outcome = JobOutcome::Cancelled;
            }
        }
        report
    }

    /// Extracts, classifies and converts the members of one archive, returning
    /// them ready for the writer. The workspace is gone when this returns.
    async fn prepare_archive(
        &self,
        job: &mut ArchiveJob,
        report: &mut JobReport,
    ) -> Result<Vec<PackedMember>> {
        let label = job.relative_path.display().to_string();
        // dropped (and deleted) on every exit path, cancellation included
        let workspace = Arc::new(self.workspace()?);

        job.transition(JobState::Extracting);
        let mut members = self
            .reader
            .open(&job.input_path, job.kind, workspace.path())
            .await?;

        if self.config.strip_junk {
            members.retain(|member| {
                let junk = is_junk_member(&member.name);
                if junk {
                    log::debug!("{label}: dropping {}", member.name);
                }
                !junk
            });
        }

        for member in members.iter_mut() {
            member.kind = self.classifier.classify(&member.data);
            if !member.kind.is_image() {
                member.outcome = MemberOutcome::Original;
            }
        }

        job.transition(JobState::Converting);
        self.convert_members(&label, &mut members, &workspace).await?;
        self.pack_members(&label, members, report)
    }

    /// Submits every image member to the pool and waits for all of them.
    async fn convert_members(
        &self,
        label: &str,
        members: &mut [MemberEntry],
        workspace: &Arc<TempDir>,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();

        for (index, member) in members.iter_mut().enumerate() {
            let MemberKind::Image(kind) = member.kind else {
                continue;
            };
            // the bytes travel with the task and come back with its result
            let data = std::mem::take(&mut member.data);
            let codec = Arc::clone(&self.codec);
            let pool = self.pool.clone();
            let workspace = Arc::clone(workspace);

            tasks.spawn(async move {
                let result = pool
                    .run(codec.convert(&data, kind, workspace.path()))
                    .await
                    .unwrap_or_else(|e| Err(ConversionFailure::Task(e.to_string())));
                (index, data, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, data, result) = joined?;
            let member = &mut members[index];
            member.data = data;
            member.outcome = match result {
                Ok(converted) => MemberOutcome::Converted(converted),
                Err(failure) => {
                    log::warn!("{label}: {}: {failure}", member.name);
                    MemberOutcome::Failed(failure.to_string())
                }
            };
        }
        Ok(())
    }

    /// Builds the output member list in input order and applies the failure policy.
    fn pack_members(
        &self,
        label: &str,
        members: Vec<MemberEntry>,
        report: &mut JobReport,
    ) -> Result<Vec<PackedMember>> {
        let policy = self.config.failure_policy;
        let extension = self.codec.output_extension();

        // names written unchanged, converted names must not shadow them
        let mut taken: HashSet<String> = members
            .iter()
            .filter(|m| match &m.outcome {
                MemberOutcome::Converted(_) => false,
                MemberOutcome::Failed(_) => policy == MemberFailurePolicy::KeepOriginal,
                MemberOutcome::Original | MemberOutcome::Pending => true,
            })
            .map(|m| m.name.clone())
            .collect();

        let mut packed = Vec::with_capacity(members.len());
        for member in members {
            match member.outcome {
                MemberOutcome::Converted(data) => {
                    let mut name = swap_member_extension(&member.name, extension);
                    if taken.contains(&name) {
                        name = append_member_extension(&member.name, extension);
                    }
                    while taken.contains(&name) {
                        name = append_member_extension(&name, extension);
                    }
                    taken.insert(name.clone());
                    report.converted += 1;
                    packed.push(PackedMember { name, data });
                }
                MemberOutcome::Failed(reason) => {
                    report.member_failures.push(MemberFailure {
                        name: member.name.clone(),
                        reason: reason.clone(),
                    });
                    match policy {
                        MemberFailurePolicy::KeepOriginal => {
                            log::warn!("{label}: keeping original bytes of {}", member.name);
                            report.passed_through += 1;
                            packed.push(PackedMember {
                                name: member.name,
                                data: member.data,
                            });
                        }
                        MemberFailurePolicy::Exclude => {
                            log::warn!("{label}: leaving out {}", member.name);
                            report.excluded += 1;
                        }
                        MemberFailurePolicy::FailArchive => {
                            return Err(Error::Conversion {
                                member: member.name,
                                reason,
                            });
                        }
                    }
                }
                MemberOutcome::Original | MemberOutcome::Pending => {
                    report.passed_through += 1;
                    packed.push(PackedMember {
                        name: member.name,
                        data: member.data,
                    });
                }
            }
        }
        Ok(packed)
    }

    fn workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let workspace = match &self.config.temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        Ok(workspace)
    }
}
