use std::iter;

use eyre::Result;
use winit::dpi::PhysicalSize;

use crate::accel::AccelState;
use crate::camera::Camera;
use crate::context::Context;
use crate::display::BlitPhase;
use crate::frame::{FrameRing, FrameStats};
use crate::loader;
use crate::overlay::{GuiFrame, OverlayPhase};
use crate::passes::CullPhase;
use crate::raster::RasterPhase;
use crate::raytrace::RaytracePhase;
use crate::resolve::ResolvePhase;
use crate::resources::{
    ConstState, Constants, RenderState, SceneState, TransientState, VISIBILITY_SOURCE_RASTER,
    VISIBILITY_SOURCE_RAY,
};
use crate::scene::{DebugMode, SceneData};
use crate::wires::{self, WirePhase, WireRequest};

/// Frame-time switches, owned by the renderer and mutated by the host UI.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderSettings {
    pub debug_mode: DebugMode,
    pub lock_cull_camera: bool,
    pub show_instance_bounds: bool,
    pub show_cluster_bounds: bool,
    /// Ray-traced visibility, honored only with `DeviceCaps::ray_tracing`.
    pub ray_visibility: bool,
    /// Fused cull chain + draw records, honored only with
    /// `DeviceCaps::draw_records`.
    pub draw_records: bool,
}

pub struct Renderer {
    pub context: Context,
    const_state: ConstState,
    render_state: RenderState,
    scene_state: SceneState,
    transient: TransientState,
    frame_ring: FrameRing,
    cull_phase: CullPhase,
    raster_phase: RasterPhase,
    resolve_phase: ResolvePhase,
    wire_phase: WirePhase,
    blit_phase: BlitPhase,
    overlay_phase: OverlayPhase,
    raytrace_phase: Option<RaytracePhase>,
    accel: Option<AccelState>,
    scene: SceneData,
    pub settings: RenderSettings,
    locked_cull_camera: Option<Camera>,
    stats: Option<FrameStats>,
}

impl Renderer {
    pub fn new(mut context: Context, scene: SceneData, settings: RenderSettings) -> Result<Self> {
        let const_state = ConstState::new(&context);
        let render_state = RenderState::new(&context);
        let scene_state = SceneState::new(&context, &scene);

        loader::upload_scene(&context, &scene, &scene_state)?;

        let transient = TransientState::new(&context.device, scene_state.instance_count.max(1));

        let accel = if context.caps.ray_tracing {
            AccelState::build(&context, &scene, &scene_state)?
        } else {
            None
        };

        let cull_phase = CullPhase::new(&mut context, &scene_state, &transient);
        let raster_phase = RasterPhase::new(&mut context, &scene_state, &transient);
        let resolve_phase = ResolvePhase::new(
            &mut context,
            &scene_state,
            &render_state,
            &transient,
            accel.as_ref().map(|accel| &accel.cluster_table),
        );
        let wire_phase = WirePhase::new(&mut context);

        let raytrace_phase = accel.as_ref().map(|accel| {
            RaytracePhase::new(&mut context, &scene_state, &render_state, accel)
        });

        let surface_format = context.surface_format;
        let blit_phase = BlitPhase::new(&mut context, surface_format, &render_state.color.view);
        let overlay_phase = OverlayPhase::new(&context);

        let frame_ring = FrameRing::new(&context.device);

        Ok(Self {
            context,
            const_state,
            render_state,
            scene_state,
            transient,
            frame_ring,
            cull_phase,
            raster_phase,
            resolve_phase,
            wire_phase,
            blit_phase,
            overlay_phase,
            raytrace_phase,
            accel,
            scene,
            settings,
            locked_cull_camera: None,
            stats: None,
        })
    }

    /// Counters of the most recent frame whose readback has landed, and how
    /// many frames it trails the one being recorded.
    pub fn stats(&self) -> Option<(FrameStats, u64)> {
        self.stats
            .map(|stats| (stats, self.frame_ring.frame().saturating_sub(stats.frame)))
    }

    pub fn instance_count(&self) -> u32 {
        self.scene_state.instance_count
    }

    pub fn max_cluster_slots(&self) -> u32 {
        self.transient.max_cluster_slots
    }

    fn sync_cull_lock(&mut self, camera: &Camera) {
        if self.settings.lock_cull_camera && self.locked_cull_camera.is_none() {
            self.locked_cull_camera = Some(camera.clone());
        } else if !self.settings.lock_cull_camera {
            self.locked_cull_camera = None;
        }
    }

    pub fn draw(&mut self, camera: &Camera, gui: Option<GuiFrame>) -> Result<(), wgpu::SurfaceError> {
        self.sync_cull_lock(camera);

        let (slot, finished) = self.frame_ring.begin_frame(&self.context.device);
        if finished.is_some() {
            self.stats = finished;
        }

        let cull_camera = self.locked_cull_camera.as_ref().unwrap_or(camera);
        let ray_active = self.settings.ray_visibility && self.raytrace_phase.is_some();
        let records_active = self.settings.draw_records && self.context.caps.draw_records;

        let constants = Constants::new(
            cull_camera,
            camera,
            self.scene_state.instance_count,
            self.transient.max_cluster_slots,
            self.scene_state.cluster_stride,
            self.settings.debug_mode,
            if ray_active {
                VISIBILITY_SOURCE_RAY
            } else {
                VISIBILITY_SOURCE_RASTER
            },
        );
        self.const_state.write(&self.context.queue, slot, &constants);
        let const_offset = ConstState::offset(slot);

        let wire_vertices = wires::build_wires(
            &self.scene,
            &cull_camera.frustum(),
            WireRequest {
                instance_bounds: self.settings.show_instance_bounds,
                cluster_bounds: self.settings.show_cluster_bounds,
                locked_frustum: self
                    .locked_cull_camera
                    .as_ref()
                    .map(|locked| locked.view_proj().inverse()),
            },
        );
        if !wire_vertices.is_empty() {
            self.context.queue.write_buffer(
                self.frame_ring.wire_buffer(slot),
                0,
                bytemuck::cast_slice(&wire_vertices),
            );
        }

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("frame encoder"),
                });

        if ray_active {
            // Counter setup still runs so the readback reports zero.
            self.cull_phase.record_setup_only(
                &mut encoder,
                &self.const_state,
                const_offset,
                &self.scene_state,
            );
            self.raytrace_phase.as_ref().unwrap().record(
                &self.context,
                &mut encoder,
                &self.const_state,
                const_offset,
                &self.scene_state,
            );
        } else {
            if records_active {
                self.cull_phase.record_fused(
                    &mut encoder,
                    &self.const_state,
                    const_offset,
                    &self.scene_state,
                    &self.transient,
                );
            } else {
                self.cull_phase.record_discrete(
                    &mut encoder,
                    &self.const_state,
                    const_offset,
                    &self.scene_state,
                    &self.transient,
                );
            }

            self.raster_phase.record(
                &mut encoder,
                &self.const_state,
                const_offset,
                &self.scene_state,
                &self.render_state,
                &self.transient,
                records_active,
            );
        }

        self.resolve_phase.record(
            &self.context,
            &mut encoder,
            &self.const_state,
            const_offset,
            &self.scene_state,
        );

        self.wire_phase.record(
            &mut encoder,
            &self.const_state,
            const_offset,
            &self.render_state,
            self.frame_ring.wire_buffer(slot),
            wire_vertices.len() as u32,
        );

        // Counters into this slot's readback slice; read when the slot
        // comes around again.
        let readback = self.frame_ring.readback_buffer(slot);
        encoder.copy_buffer_to_buffer(&self.transient.visible_instance_counter, 0, readback, 0, 4);
        encoder.copy_buffer_to_buffer(&self.transient.visible_cluster_counter, 0, readback, 4, 12);

        let surface_texture = self.context.surface.get_current_texture()?;
        let frame_buffer = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor {
                label: Some("frame buffer"),
                ..Default::default()
            });

        let user_buffers = match &gui {
            Some(frame) => self.overlay_phase.prepare(&self.context, &mut encoder, frame),
            None => Vec::new(),
        };

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present"),
                depth_stencil_attachment: None,
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame_buffer,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.blit_phase.record(&mut pass);

            if let Some(frame) = &gui {
                let mut pass = pass.forget_lifetime();
                self.overlay_phase.paint(&self.context, &mut pass, frame);
            }
        }

        self.context
            .queue
            .submit(user_buffers.into_iter().chain(iter::once(encoder.finish())));

        if let Some(frame) = &gui {
            self.overlay_phase.cleanup(frame);
        }

        self.frame_ring.finish_frame(slot);
        surface_texture.present();

        Ok(())
    }

    pub fn resize_surface(&mut self, size: PhysicalSize<u32>) {
        self.context.resize_surface(size);
        self.render_state = RenderState::new(&self.context);

        self.resolve_phase.resize_surface(
            &self.context,
            &self.render_state,
            &self.transient,
            self.accel.as_ref().map(|accel| &accel.cluster_table),
        );
        if let (Some(raytrace), Some(accel)) = (&mut self.raytrace_phase, &self.accel) {
            raytrace.resize_surface(&self.context, &self.render_state, accel);
        }
        self.blit_phase
            .change_input(&self.context, &self.render_state.color.view);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Let in-flight frames drain before the device goes away.
        self.context.device.poll(wgpu::Maintain::Wait);
    }
}
