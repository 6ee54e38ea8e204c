use std::{
    path::PathBuf,
    sync::Arc,
};

use bevy::{
    prelude::*,
    tasks::{
        block_on,
        futures_lite::future,
        IoTaskPool,
        Task,
        TaskPool,
    },
};

use crate::{
    io::{
        error::IngestError,
        ply::{
            parse_scene,
            ParsedScene,
        },
        schema::{
            OffsetTable,
            SchemaMode,
        },
    },
    render::{
        frame::IngestDispatch,
        pool::CapacityError,
    },
};

pub mod staging;


#[derive(Clone, Debug)]
pub enum SceneSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
    /// checked against the session's schema mode and capacity before staging
    Parsed(Arc<ParsedScene>),
}

impl From<PathBuf> for SceneSource {
    fn from(path: PathBuf) -> Self {
        SceneSource::Path(path)
    }
}

impl From<Vec<u8>> for SceneSource {
    fn from(bytes: Vec<u8>) -> Self {
        SceneSource::Bytes(bytes.into())
    }
}


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
#[repr(u8)]
pub enum IngestStatus {
    #[default]
    Idle,
    Reading,
    HeaderParsed,
    Mapping,
    Staged,
    DeviceCopyPending,
    Ready,
    Failed,
}

impl IngestStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => IngestStatus::Reading,
            2 => IngestStatus::HeaderParsed,
            3 => IngestStatus::Mapping,
            4 => IngestStatus::Staged,
            5 => IngestStatus::DeviceCopyPending,
            6 => IngestStatus::Ready,
            7 => IngestStatus::Failed,
            _ => IngestStatus::Idle,
        }
    }
}


/// Host-visible upload path for staged scenes.
pub trait StagingTarget {
    type Ticket;

    /// Grows the staging and raw scene buffers to hold `bytes`.
    fn reserve(&mut self, bytes: u64) -> Result<(), CapacityError>;

    fn begin_map(&mut self) -> Self::Ticket;

    /// `None` while the map is in flight.
    fn poll_map(&mut self, ticket: &mut Self::Ticket) -> Option<Result<(), IngestError>>;

    fn write_and_unmap(&mut self, header_block: &[u8], payload_offset: u64, payload: &[u8]);

    fn unmap(&mut self);
}


enum Phase<T> {
    Idle,
    Reading(Task<Result<ParsedScene, IngestError>>),
    HeaderParsed(Arc<ParsedScene>),
    Mapping {
        scene: Arc<ParsedScene>,
        ticket: T,
    },
    Staged(IngestDispatch),
    DeviceCopyPending(IngestDispatch),
    Ready(IngestDispatch),
}


/// Drives one scene load at a time from request to device-resident records.
///
/// A newer request supersedes a load that has not reached the device yet; a
/// request arriving after that is queued until the controller is idle again.
#[derive(Resource)]
pub struct SceneIngest<T: Send + Sync + 'static> {
    phase: Phase<T>,
    queued: Option<SceneSource>,
    offsets: OffsetTable,
    point_count: u32,
    schema_mode: SchemaMode,
    max_splat_count: u32,
    header_block_bytes: u64,
    last_error: Option<IngestError>,
}

impl<T: Send + Sync + 'static> SceneIngest<T> {
    pub fn new(
        schema_mode: SchemaMode,
        max_splat_count: u32,
        header_block_bytes: u64,
    ) -> Self {
        Self {
            phase: Phase::Idle,
            queued: None,
            offsets: OffsetTable::default(),
            point_count: 0,
            schema_mode,
            max_splat_count,
            header_block_bytes,
            last_error: None,
        }
    }

    pub fn status(&self) -> IngestStatus {
        match &self.phase {
            Phase::Idle if self.queued.is_some() => IngestStatus::Reading,
            Phase::Idle if self.last_error.is_some() => IngestStatus::Failed,
            Phase::Idle => IngestStatus::Idle,
            Phase::Reading(_) => IngestStatus::Reading,
            Phase::HeaderParsed(_) => IngestStatus::HeaderParsed,
            Phase::Mapping { .. } => IngestStatus::Mapping,
            Phase::Staged(_) => IngestStatus::Staged,
            Phase::DeviceCopyPending(_) => IngestStatus::DeviceCopyPending,
            Phase::Ready(_) => IngestStatus::Ready,
        }
    }

    /// Points of the scene the frame loop renders.
    pub fn point_count(&self) -> u32 {
        self.point_count
    }

    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    pub fn last_error(&self) -> Option<&IngestError> {
        self.last_error.as_ref()
    }

    pub fn has_queued(&self) -> bool {
        self.queued.is_some()
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self.phase, Phase::Mapping { .. })
    }

    pub fn request(&mut self, source: impl Into<SceneSource>) {
        if matches!(self.phase, Phase::Reading(_) | Phase::HeaderParsed(_)) {
            info!("superseding pending scene load");
            self.phase = Phase::Idle;
        }

        if self.queued.replace(source.into()).is_some() {
            debug!("replaced queued scene request");
        }

        self.last_error = None;
    }

    /// Called once the ingest dispatch has been recorded into the frame.
    pub fn mark_dispatched(&mut self) {
        if let Phase::DeviceCopyPending(dispatch) = self.phase {
            self.phase = Phase::Ready(dispatch);
        }
    }

    /// Advances the state machine by as many transitions as complete this frame.
    ///
    /// Returns the copy-and-parse work the current frame must record, if any.
    pub fn advance<S>(&mut self, staging: &mut S) -> Option<IngestDispatch>
    where
        S: StagingTarget<Ticket = T>,
    {
        loop {
            let phase = std::mem::replace(&mut self.phase, Phase::Idle);

            self.phase = match phase {
                Phase::Idle => match self.queued.take() {
                    Some(SceneSource::Parsed(scene)) => {
                        match scene.check(self.schema_mode, self.max_splat_count) {
                            Ok(()) => Phase::HeaderParsed(scene),
                            Err(err) => self.fail(err),
                        }
                    }
                    Some(source) => Phase::Reading(self.spawn_read(source)),
                    None => return None,
                },
                Phase::Reading(mut task) => match block_on(future::poll_once(&mut task)) {
                    None => {
                        self.phase = Phase::Reading(task);
                        return None;
                    }
                    Some(Ok(scene)) => {
                        debug!(
                            "parsed scene header: {} points, {} byte records",
                            scene.point_count,
                            scene.record_size,
                        );
                        Phase::HeaderParsed(Arc::new(scene))
                    }
                    Some(Err(err)) => self.fail(err),
                },
                Phase::HeaderParsed(scene) => {
                    let required = self.header_block_bytes + scene.payload.len() as u64;
                    match staging.reserve(required) {
                        Ok(()) => Phase::Mapping {
                            ticket: staging.begin_map(),
                            scene,
                        },
                        Err(err) => self.fail(err.into()),
                    }
                }
                Phase::Mapping { scene, mut ticket } => match staging.poll_map(&mut ticket) {
                    None => {
                        self.phase = Phase::Mapping { scene, ticket };
                        return None;
                    }
                    Some(Err(err)) => self.fail(err),
                    Some(Ok(())) if self.queued.is_some() => {
                        info!("superseding staged scene load");
                        staging.unmap();
                        Phase::Idle
                    }
                    Some(Ok(())) => self.stage(staging, &scene),
                },
                Phase::Staged(dispatch) => Phase::DeviceCopyPending(dispatch),
                Phase::DeviceCopyPending(dispatch) => {
                    self.phase = Phase::DeviceCopyPending(dispatch);
                    return Some(dispatch);
                }
                Phase::Ready(dispatch) => {
                    self.point_count = dispatch.point_count;
                    info!("scene ready: {} points", dispatch.point_count);
                    Phase::Idle
                }
            };
        }
    }

    fn stage<S>(&mut self, staging: &mut S, scene: &ParsedScene) -> Phase<T>
    where
        S: StagingTarget<Ticket = T>,
    {
        let mut offsets = self.offsets;
        offsets.apply(&scene.assignments);

        let header_block = offsets.header_block(scene.point_count, scene.sh_rest_per_channel);
        staging.write_and_unmap(
            bytemuck::cast_slice(&header_block),
            self.header_block_bytes,
            &scene.payload,
        );

        // the table only changes once the load is staged
        self.offsets = offsets;

        Phase::Staged(IngestDispatch {
            copy_bytes: self.header_block_bytes + scene.payload.len() as u64,
            point_count: scene.point_count,
        })
    }

    fn fail(&mut self, err: IngestError) -> Phase<T> {
        warn!("scene load failed: {err}");
        self.last_error = Some(err);
        Phase::Idle
    }

    fn spawn_read(&self, source: SceneSource) -> Task<Result<ParsedScene, IngestError>> {
        let schema_mode = self.schema_mode;
        let max_splat_count = self.max_splat_count;

        IoTaskPool::get_or_init(TaskPool::new).spawn(async move {
            match source {
                SceneSource::Path(path) => {
                    let bytes = std::fs::read(&path)?;
                    parse_scene(&bytes, schema_mode, max_splat_count)
                }
                SceneSource::Bytes(bytes) => parse_scene(&bytes, schema_mode, max_splat_count),
                SceneSource::Parsed(scene) => {
                    scene.check(schema_mode, max_splat_count)?;
                    Ok(ParsedScene::clone(&scene))
                }
            }
        })
    }
}
