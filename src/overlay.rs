use crate::context::Context;

/// One frame of immediate-mode overlay output, produced by the window host
/// and painted onto the surface after the blit.
pub struct GuiFrame {
    pub primitives: Vec<egui::ClippedPrimitive>,
    pub textures_delta: egui::TexturesDelta,
    pub pixels_per_point: f32,
}

/// The egui painter. The overlay consumes the final color target; nothing
/// in the frame pipeline reads it back.
pub struct OverlayPhase {
    renderer: egui_wgpu::Renderer,
}

impl OverlayPhase {
    pub fn new(context: &Context) -> Self {
        Self {
            renderer: egui_wgpu::Renderer::new(&context.device, context.surface_format, None, 1, false),
        }
    }

    fn screen_descriptor(&self, context: &Context, frame: &GuiFrame) -> egui_wgpu::ScreenDescriptor {
        egui_wgpu::ScreenDescriptor {
            size_in_pixels: [context.surface_size.width, context.surface_size.height],
            pixels_per_point: frame.pixels_per_point,
        }
    }

    pub fn prepare(
        &mut self,
        context: &Context,
        encoder: &mut wgpu::CommandEncoder,
        frame: &GuiFrame,
    ) -> Vec<wgpu::CommandBuffer> {
        for (id, delta) in &frame.textures_delta.set {
            self.renderer
                .update_texture(&context.device, &context.queue, *id, delta);
        }

        let screen = self.screen_descriptor(context, frame);
        self.renderer.update_buffers(
            &context.device,
            &context.queue,
            encoder,
            &frame.primitives,
            &screen,
        )
    }

    pub fn paint(
        &mut self,
        context: &Context,
        pass: &mut wgpu::RenderPass<'static>,
        frame: &GuiFrame,
    ) {
        let screen = self.screen_descriptor(context, frame);
        self.renderer.render(pass, &frame.primitives, &screen);
    }

    pub fn cleanup(&mut self, frame: &GuiFrame) {
        for id in &frame.textures_delta.free {
            self.renderer.free_texture(id);
        }
    }
}
