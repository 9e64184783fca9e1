//! # Integrity Verification
//!
//! Audits the read-write manifest against the bytes actually on disk.
//!
//! Each recorded resource is read back (from its container or as a loose
//! file) and its length and load-kind checksum recomputed. Work is spread
//! over ticks: each [`IntegrityVerifier::tick`] hashes about
//! `bytes_per_tick` bytes before yielding.
//!
//! A resource that fails is deleted and dropped from the manifest, which is
//! rewritten once the pass ends. The next reconciliation then classifies it
//! as `Update`, so a bad file costs one re-fetch and is never trusted.

use crate::checksum;
use crate::context::StoreContext;
use crate::error::{Error, Result};
use crate::events::{Event, VerifyComplete};
use crate::identifier::{LoadKind, ResourceId};
use std::collections::VecDeque;
use std::fs;
use tracing::{debug, info, warn};

/// One read-write record awaiting verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRecord {
    pub id: ResourceId,
    pub container: Option<String>,
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
}

#[derive(Debug)]
struct VerifyPass {
    pending: VecDeque<VerifyRecord>,
    bytes_per_tick: u64,
    verified: usize,
    failed: usize,
}

/// Incremental checksum audit of the read-write area.
#[derive(Debug, Default)]
pub struct IntegrityVerifier {
    pass: Option<VerifyPass>,
}

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_verifying(&self) -> bool {
        self.pass.is_some()
    }

    /// Loads the read-write manifest and starts a verification pass.
    ///
    /// Without a manifest file there is nothing to check and the pass
    /// completes immediately.
    pub fn verify_resources(
        &mut self,
        ctx: &mut StoreContext<'_>,
        bytes_per_tick: u64,
    ) -> Result<()> {
        if self.pass.is_some() {
            return Err(Error::Busy("verification already running".to_string()));
        }

        let path = ctx.read_write.path().to_path_buf();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No read-write manifest at {}, nothing to verify", path.display());
                ctx.events.push(Event::VerifyComplete(VerifyComplete {
                    ok: true,
                    verified_count: 0,
                    failed_count: 0,
                }));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let manifest = ctx.codec.decode_local(&bytes)?;
        ctx.read_write.replace(&manifest)?;
        let pending: VecDeque<VerifyRecord> = ctx
            .read_write
            .iter()
            .map(|(id, record)| VerifyRecord {
                id: id.clone(),
                container: record.container.clone(),
                load_kind: record.load_kind,
                length: record.length,
                hash: record.hash,
            })
            .collect();

        let total_length = pending.iter().map(|r| u64::from(r.length)).sum();
        info!(
            "Verifying {} resources ({} bytes) in {}",
            pending.len(),
            total_length,
            path.display()
        );
        ctx.events.push(Event::VerifyStart {
            count: pending.len(),
            total_length,
        });

        self.pass = Some(VerifyPass {
            pending,
            bytes_per_tick: bytes_per_tick.max(1),
            verified: 0,
            failed: 0,
        });
        if self.pass.as_ref().is_some_and(|p| p.pending.is_empty()) {
            self.finish(ctx)?;
        }
        Ok(())
    }

    /// Verifies records until this tick's byte budget is spent.
    pub fn tick(&mut self, ctx: &mut StoreContext<'_>) -> Result<()> {
        let Some(pass) = self.pass.as_mut() else {
            return Ok(());
        };

        let mut spent = 0u64;
        while spent < pass.bytes_per_tick {
            let Some(record) = pass.pending.pop_front() else {
                break;
            };
            spent += u64::from(record.length);

            match check(ctx, &record) {
                Ok(()) => {
                    pass.verified += 1;
                    ctx.events.push(Event::VerifySuccess {
                        id: record.id,
                        length: record.length,
                    });
                }
                Err(e) => {
                    pass.failed += 1;
                    warn!("Verification of {} failed: {}", record.id, e);
                    if let Err(e) = ctx.delete_stored(&record.id, record.container.as_deref()) {
                        warn!("Failed to delete {}: {}", record.id, e);
                    }
                    ctx.read_write.remove(&record.id);
                    ctx.events.push(Event::VerifyFailure {
                        id: record.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if pass.pending.is_empty() {
            self.finish(ctx)?;
        }
        Ok(())
    }

    /// Rewrites the manifest if anything was dropped and reports the pass.
    fn finish(&mut self, ctx: &mut StoreContext<'_>) -> Result<()> {
        let Some(pass) = self.pass.take() else {
            return Ok(());
        };
        if pass.failed > 0 {
            ctx.persist_read_write()?;
        }
        info!(
            "Verification complete: {} ok, {} failed",
            pass.verified, pass.failed
        );
        ctx.events.push(Event::VerifyComplete(VerifyComplete {
            ok: pass.failed == 0,
            verified_count: pass.verified,
            failed_count: pass.failed,
        }));
        Ok(())
    }
}

/// Reads one resource back and checks it against its record.
fn check(ctx: &mut StoreContext<'_>, record: &VerifyRecord) -> Result<()> {
    let name = record.id.to_string();
    let bytes = ctx
        .read_stored(&record.id, record.container.as_deref())?
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is missing", name),
            ))
        })?;
    checksum::verify_resource(
        &name,
        &bytes,
        record.load_kind,
        u64::from(record.length),
        record.hash,
    )
}
