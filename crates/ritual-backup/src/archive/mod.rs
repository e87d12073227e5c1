//! Streaming archive pipeline.
//!
//! [`ArchivePipeline::push`] compresses directory trees into tar+gzip while
//! uploading them concurrently; [`ArchivePipeline::pull`] downloads and
//! extracts an archive with a [`ConflictStrategy`].

mod conflict;
mod pull;
mod push;

pub use conflict::{ConflictAction, ConflictStrategy};
pub use pull::{EntryFilter, PullRequest, PullResult};
pub use push::{LocalCopy, PushRequest, PushResult};

use ritual_core::config::ArchiveSettings;
use ritual_core::{EventSink, Transport};
use std::sync::Arc;

/// Sizing of the producer/consumer handoff buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Bytes per chunk handed from producer to consumer
    pub chunk_size: usize,
    /// Chunks the buffer holds before the producer blocks
    pub buffer_chunks: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&ArchiveSettings::default())
    }
}

impl From<&ArchiveSettings> for PipelineSettings {
    fn from(settings: &ArchiveSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size.max(1),
            buffer_chunks: settings.buffer_chunks.max(1),
        }
    }
}

/// Push/pull over a transport, reporting to an event sink.
#[derive(Clone)]
pub struct ArchivePipeline {
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    settings: PipelineSettings,
}

impl ArchivePipeline {
    pub fn new(transport: Arc<dyn Transport>, events: Arc<dyn EventSink>) -> Self {
        Self {
            transport,
            events,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }
}
