use bevy::{
    render::{
        render_resource::{
            Buffer,
            BufferAsyncError,
            MapMode,
        },
        renderer::RenderDevice,
    },
    tasks::{
        block_on,
        futures_lite::future,
    },
};
use futures_intrusive::channel::shared::{
    oneshot_channel,
    OneshotReceiver,
};

use crate::{
    ingest::StagingTarget,
    io::error::IngestError,
    render::pool::{
        staging_size,
        BufferKind,
        BufferPool,
        CapacityError,
    },
};


pub struct MapTicket {
    receiver: OneshotReceiver<Result<(), BufferAsyncError>>,
}


/// Staging through the pool's `Staging` buffer, copied into `RawScene` by the ingest node.
pub struct GpuStaging<'a> {
    pub render_device: &'a RenderDevice,
    pub pool: &'a mut BufferPool<Buffer>,
    pub floor_bytes: u64,
}

impl StagingTarget for GpuStaging<'_> {
    type Ticket = MapTicket;

    fn reserve(&mut self, bytes: u64) -> Result<(), CapacityError> {
        let size = staging_size(bytes, self.floor_bytes, self.pool.limits());

        self.pool.ensure_capacity(self.render_device, BufferKind::RawScene, size)?;
        self.pool.ensure_capacity(self.render_device, BufferKind::Staging, size)?;

        Ok(())
    }

    fn begin_map(&mut self) -> MapTicket {
        let (sender, receiver) = oneshot_channel();

        if let Some(staging) = self.pool.buffer(BufferKind::Staging) {
            staging.slice(..).map_async(MapMode::Write, move |result| {
                let _ = sender.send(result);
            });
        }

        MapTicket { receiver }
    }

    fn poll_map(&mut self, ticket: &mut MapTicket) -> Option<Result<(), IngestError>> {
        self.render_device.poll(wgpu::Maintain::Poll);

        match block_on(future::poll_once(ticket.receiver.receive()))? {
            Some(Ok(())) => Some(Ok(())),
            Some(Err(err)) => Some(Err(IngestError::AsyncIo(err.to_string()))),
            None => Some(Err(IngestError::AsyncIo("staging map was cancelled".to_string()))),
        }
    }

    fn write_and_unmap(&mut self, header_block: &[u8], payload_offset: u64, payload: &[u8]) {
        let Some(staging) = self.pool.buffer(BufferKind::Staging) else {
            return;
        };

        {
            let slice = staging.slice(..);
            let mut view = slice.get_mapped_range_mut();

            view[..header_block.len()].copy_from_slice(header_block);

            let start = payload_offset as usize;
            view[start..start + payload.len()].copy_from_slice(payload);
        }

        staging.unmap();
    }

    fn unmap(&mut self) {
        if let Some(staging) = self.pool.buffer(BufferKind::Staging) {
            staging.unmap();
        }
    }
}
