use std::sync::mpsc;

use crate::resources::{create_buffer, BufferDesc, BufferFlags};
use crate::wires;

/// Frames in flight. Matches the swap-chain depth; each slot owns the
/// resources one recorded frame touches.
pub const FRAME_COUNT: usize = 3;

/// Number of 32-bit counters copied back per frame: the visible-instance
/// counter plus the three lanes of the visible-cluster counter.
pub const READBACK_WORDS: usize = 4;

/// Counters read back from a frame that already ran on the GPU. Always
/// `FRAME_COUNT - 1` or more frames behind the frame being recorded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub visible_instances: u32,
    pub visible_clusters: u32,
    pub dispatch_y: u32,
    pub dispatch_z: u32,
    /// The frame that produced these counters.
    pub frame: u64,
}

struct FrameSlot {
    readback: wgpu::Buffer,
    wire_vertices: wgpu::Buffer,
    pending: Option<(u64, mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>)>,
}

impl FrameSlot {
    fn new(device: &wgpu::Device, index: usize) -> Self {
        let readback = create_buffer(
            device,
            BufferDesc {
                label: &format!("frame {index} readback"),
                count: READBACK_WORDS as u64,
                stride: 4,
                flags: BufferFlags::READBACK,
            },
        );

        let wire_vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("frame {index} wire vertices")),
            size: wires::WIRE_BUFFER_BYTES,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            readback,
            wire_vertices,
            pending: None,
        }
    }

    /// Blocks until the previous user of this slot has finished, then reads
    /// its counters. This wait is the renderer's only GPU synchronization.
    fn drain(&mut self, device: &wgpu::Device) -> Option<FrameStats> {
        let (frame, receiver) = self.pending.take()?;

        let result = loop {
            match receiver.try_recv() {
                Ok(result) => break result,
                Err(mpsc::TryRecvError::Empty) => {
                    device.poll(wgpu::Maintain::Wait);
                }
                Err(mpsc::TryRecvError::Disconnected) => {
                    log::warn!("readback of frame {frame} was dropped");
                    return None;
                }
            }
        };

        if let Err(err) = result {
            log::warn!("readback of frame {frame} failed: {err}");
            return None;
        }

        let stats = {
            let mapped = self.readback.slice(..).get_mapped_range();
            let words: &[u32] = bytemuck::cast_slice(&mapped);
            FrameStats {
                visible_instances: words[0],
                visible_clusters: words[1],
                dispatch_y: words[2],
                dispatch_z: words[3],
                frame,
            }
        };
        self.readback.unmap();

        Some(stats)
    }
}

/// Rotates the per-frame resources and the one-frame-delayed counter
/// readback.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    frame: u64,
}

impl FrameRing {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            slots: (0..FRAME_COUNT)
                .map(|index| FrameSlot::new(device, index))
                .collect(),
            frame: 0,
        }
    }

    pub fn slot_index(frame: u64) -> usize {
        (frame % FRAME_COUNT as u64) as usize
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Enters the next frame: waits out the slot's previous user and
    /// returns the slot index plus whatever counters that frame produced.
    pub fn begin_frame(&mut self, device: &wgpu::Device) -> (usize, Option<FrameStats>) {
        let index = Self::slot_index(self.frame);
        let stats = self.slots[index].drain(device);
        (index, stats)
    }

    pub fn readback_buffer(&self, slot: usize) -> &wgpu::Buffer {
        &self.slots[slot].readback
    }

    pub fn wire_buffer(&self, slot: usize) -> &wgpu::Buffer {
        &self.slots[slot].wire_vertices
    }

    /// Called after submit: starts mapping the slot's readback slice and
    /// advances the frame counter.
    pub fn finish_frame(&mut self, slot: usize) {
        let (sender, receiver) = mpsc::channel();
        self.slots[slot]
            .readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        self.slots[slot].pending = Some((self.frame, receiver));
        self.frame += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_rotate_modulo_frame_count() {
        assert_eq!(FrameRing::slot_index(0), 0);
        assert_eq!(FrameRing::slot_index(1), 1);
        assert_eq!(FrameRing::slot_index(2), 2);
        assert_eq!(FrameRing::slot_index(3), 0);
        assert_eq!(FrameRing::slot_index(7), 1);
    }

    #[test]
    fn a_slot_is_reused_after_frame_count_frames() {
        // The counters read at frame k come from frame k - FRAME_COUNT,
        // which is what the stats display labels.
        for frame in 0..32u64 {
            let reuse = frame + FRAME_COUNT as u64;
            assert_eq!(FrameRing::slot_index(frame), FrameRing::slot_index(reuse));
            for other in frame + 1..reuse {
                assert_ne!(FrameRing::slot_index(frame), FrameRing::slot_index(other));
            }
        }
    }
}
