//! The dispatch engine: try candidate descriptors against the registry.
//!
//! For each candidate descriptor, in order, converters are tried either
//! sequentially (strict priority order, first success wins) or raced within
//! each priority tier (opt-in; first *completion* wins and siblings receive
//! a cancellation signal). Every attempt gets its own fresh reader from the
//! disk buffer, so attempts never interfere.
//!
//! Per-attempt errors are recorded, never fatal. Only two things abort a
//! dispatch early besides success: request cancellation, and an integrity
//! violation in a committed result (a converter bug the caller must see).

use crate::buffer::DiskBuffer;
use crate::cancel::CancelToken;
use crate::config::ConversionConfig;
use crate::descriptor::StreamDescriptor;
use crate::error::{AttemptFailure, AttemptStage, ConvertError};
use crate::model::DocumentConverterResult;
use crate::progress::{ProgressEvent, ProgressStage, Reporter};
use crate::registry::ConverterRegistration;
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

/// What dispatch hands back on success.
#[derive(Debug)]
pub(crate) struct DispatchOutcome {
    pub result: DocumentConverterResult,
    /// Name of the committed converter.
    pub converter_name: String,
    /// The candidate descriptor the conversion was committed under.
    pub descriptor: StreamDescriptor,
    /// Failed attempts recorded before the commit.
    pub attempts_failed: usize,
}

/// Run dispatch over all candidates. First success short-circuits everything.
pub(crate) async fn dispatch(
    buffer: &DiskBuffer,
    candidates: &[StreamDescriptor],
    config: &ConversionConfig,
    reporter: &Reporter,
    cancel: &CancelToken,
) -> Result<DispatchOutcome, ConvertError> {
    let total_attempts = candidates.len() * config.converters.len();
    let mut failures: Vec<AttemptFailure> = Vec::new();

    for candidate in candidates {
        cancel.check()?;
        debug!(
            "trying candidate {}/{}",
            candidate.mime_or_fallback(),
            candidate.extension.as_deref().unwrap_or("-")
        );

        let committed = if config.parallel {
            dispatch_candidate_parallel(
                buffer,
                candidate,
                config,
                reporter,
                cancel,
                &mut failures,
                total_attempts,
            )
            .await?
        } else {
            dispatch_candidate_sequential(
                buffer,
                candidate,
                config,
                reporter,
                cancel,
                &mut failures,
                total_attempts,
            )
            .await?
        };

        if let Some((name, result)) = committed {
            // Integrity check: a structurally broken result is a converter
            // bug and must surface, not be silently returned.
            if let Err(detail) = result.validate_page_contiguity() {
                return Err(ConvertError::IntegrityViolation {
                    converter: name,
                    detail,
                });
            }
            info!(
                "committed converter '{name}' for {}",
                candidate.mime_or_fallback()
            );
            reporter.report(
                ProgressEvent::new(ProgressStage::ConverterSelected, failures.len(), total_attempts)
                    .with_details(name.clone()),
            );
            return Ok(DispatchOutcome {
                result,
                converter_name: name,
                descriptor: candidate.clone(),
                attempts_failed: failures.len(),
            });
        }
    }

    Err(ConvertError::UnsupportedFormat { attempts: failures })
}

/// Sequential mode: strict priority order, first accepting + succeeding
/// converter wins.
async fn dispatch_candidate_sequential(
    buffer: &DiskBuffer,
    candidate: &StreamDescriptor,
    config: &ConversionConfig,
    reporter: &Reporter,
    cancel: &CancelToken,
    failures: &mut Vec<AttemptFailure>,
    total_attempts: usize,
) -> Result<Option<(String, DocumentConverterResult)>, ConvertError> {
    for reg in config.converters.iter() {
        cancel.check()?;
        let name = reg.converter.name().to_string();
        reporter.report(
            ProgressEvent::new(ProgressStage::TryingConverter, failures.len(), total_attempts)
                .with_details(format!("{name} ({})", candidate.mime_or_fallback())),
        );

        match attempt(buffer, reg, candidate, cancel).await? {
            AttemptOutcome::Success(result) => return Ok(Some((name, result))),
            AttemptOutcome::Declined => {}
            AttemptOutcome::Failed(failure) => {
                warn!("converter attempt failed: {failure}");
                reporter.report(
                    ProgressEvent::new(
                        ProgressStage::ConverterFailed,
                        failures.len() + 1,
                        total_attempts,
                    )
                    .with_details(failure.to_string()),
                );
                failures.push(failure);
            }
        }
    }
    Ok(None)
}

/// Parallel mode: converters within one priority tier race; the first
/// wall-clock success is committed and siblings are cancelled (best-effort,
/// cooperative). Tiers still run in priority order.
async fn dispatch_candidate_parallel(
    buffer: &DiskBuffer,
    candidate: &StreamDescriptor,
    config: &ConversionConfig,
    reporter: &Reporter,
    cancel: &CancelToken,
    failures: &mut Vec<AttemptFailure>,
    total_attempts: usize,
) -> Result<Option<(String, DocumentConverterResult)>, ConvertError> {
    for tier in config.converters.tiers() {
        cancel.check()?;

        // One shared signal per tier; the winner (or the caller's own
        // cancellation) flips it for every sibling.
        let tier_cancel = CancelToken::new();
        let failed_so_far = failures.len();

        let mut attempts = futures::stream::iter(tier.iter().map(|reg| {
            let tier_cancel = tier_cancel.clone();
            let name = reg.converter.name().to_string();
            reporter.report(
                ProgressEvent::new(ProgressStage::TryingConverter, failed_so_far, total_attempts)
                    .with_details(format!("{name} ({})", candidate.mime_or_fallback())),
            );
            async move { (name, attempt(buffer, reg, candidate, &tier_cancel).await) }
        }))
        .buffer_unordered(config.max_parallel.max(1));

        let mut winner: Option<(String, DocumentConverterResult)> = None;
        loop {
            let next = tokio::select! {
                next = attempts.next() => next,
                _ = cancel.cancelled() => {
                    tier_cancel.cancel();
                    // Drain so sibling tasks are joined, not leaked.
                    while attempts.next().await.is_some() {}
                    return Err(ConvertError::Cancelled);
                }
            };
            let Some((name, outcome)) = next else { break };
            match outcome {
                Ok(AttemptOutcome::Success(result)) if winner.is_none() => {
                    tier_cancel.cancel();
                    winner = Some((name, result));
                    // Keep draining: siblings are joined before we commit.
                }
                Ok(AttemptOutcome::Success(_)) => {
                    // A sibling finished before observing the cancel signal;
                    // the earlier commit stands.
                    debug!("discarding late success from '{name}'");
                }
                Ok(AttemptOutcome::Declined) => {}
                Ok(AttemptOutcome::Failed(failure)) => {
                    if winner.is_none() {
                        warn!("converter attempt failed: {failure}");
                        reporter.report(
                            ProgressEvent::new(
                                ProgressStage::ConverterFailed,
                                failures.len() + 1,
                                total_attempts,
                            )
                            .with_details(failure.to_string()),
                        );
                        failures.push(failure);
                    }
                }
                Err(fatal) => {
                    tier_cancel.cancel();
                    while attempts.next().await.is_some() {}
                    return Err(fatal);
                }
            }
        }

        if winner.is_some() {
            return Ok(winner);
        }
    }
    Ok(None)
}

enum AttemptOutcome {
    /// `convert` succeeded.
    Success(DocumentConverterResult),
    /// `accepts` returned false; not recorded as a failure.
    Declined,
    /// The probe or conversion errored; recorded, dispatch continues.
    Failed(AttemptFailure),
}

/// One probe + convert attempt against fresh buffer readers.
///
/// Failing to *open* a reader is a resource failure (the buffer is broken
/// for every converter alike) and is fatal; errors from the converter itself
/// are per-attempt and recorded.
async fn attempt(
    buffer: &DiskBuffer,
    reg: &ConverterRegistration,
    candidate: &StreamDescriptor,
    cancel: &CancelToken,
) -> Result<AttemptOutcome, ConvertError> {
    let failure = |stage: AttemptStage, detail: String| AttemptFailure {
        converter: reg.converter.name().to_string(),
        mime_type: candidate.mime_type.clone(),
        extension: candidate.extension.clone(),
        stage,
        detail,
    };

    let mut probe = buffer.open_read().await.map_err(|e| ConvertError::BufferFailed {
        detail: format!("could not open probe stream: {e}"),
    })?;
    match reg.converter.accepts(&mut probe, candidate, cancel).await {
        Ok(false) => return Ok(AttemptOutcome::Declined),
        Ok(true) => {}
        Err(ConvertError::Cancelled) if cancel.is_cancelled() => {
            return Ok(AttemptOutcome::Declined)
        }
        Err(e) => return Ok(AttemptOutcome::Failed(failure(AttemptStage::Probe, e.to_string()))),
    }

    let stream = buffer.open_read().await.map_err(|e| ConvertError::BufferFailed {
        detail: format!("could not open conversion stream: {e}"),
    })?;
    match reg.converter.convert(stream, candidate, cancel).await {
        Ok(result) => Ok(AttemptOutcome::Success(result)),
        Err(ConvertError::Cancelled) if cancel.is_cancelled() => Ok(AttemptOutcome::Declined),
        Err(e) => Ok(AttemptOutcome::Failed(failure(
            AttemptStage::Convert,
            e.to_string(),
        ))),
    }
}
