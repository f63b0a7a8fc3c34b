use std::collections::HashMap;
use std::sync::Arc;

use eyre::{ensure, eyre, Result, WrapErr};
use winit::{dpi::PhysicalSize, window::Window};

/// Runtime-queried optional capabilities. Both alternative visibility paths
/// are always compiled in and gated on these at frame time.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCaps {
    /// Acceleration structures plus inline ray queries.
    pub ray_tracing: bool,
    /// GPU-produced draw records consumed by `multi_draw_indirect_count`.
    pub draw_records: bool,
}

pub struct Context {
    pub surface_size: wgpu::Extent3d,
    pub surface_format: wgpu::TextureFormat,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub caps: DeviceCaps,
    pub window: Arc<Window>,
    pub present_mode: wgpu::PresentMode,
    pub shader_composer: naga_oil::compose::Composer,
}

impl Context {
    pub fn new(window: Arc<Window>, force_fallback_adapter: bool) -> Result<Self> {
        let surface_size = physical_size_to_texture_size(window.inner_size());

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .wrap_err("failed creating surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter,
        }))
        .ok_or_else(|| eyre!("no compatible adapter"))?;

        let downlevel = adapter.get_downlevel_capabilities();
        let needed = wgpu::DownlevelFlags::COMPUTE_SHADERS
            | wgpu::DownlevelFlags::INDIRECT_EXECUTION
            | wgpu::DownlevelFlags::VERTEX_STORAGE;
        ensure!(
            downlevel.flags.contains(needed),
            "adapter {:?} lacks compute or indirect execution",
            adapter.get_info().name,
        );

        let adapter_features = adapter.features();

        let ray_tracing_features = wgpu::Features::EXPERIMENTAL_RAY_TRACING_ACCELERATION_STRUCTURE
            | wgpu::Features::EXPERIMENTAL_RAY_QUERY;
        let draw_record_features = wgpu::Features::MULTI_DRAW_INDIRECT
            | wgpu::Features::MULTI_DRAW_INDIRECT_COUNT
            | wgpu::Features::INDIRECT_FIRST_INSTANCE;

        let caps = DeviceCaps {
            ray_tracing: adapter_features.contains(ray_tracing_features),
            draw_records: adapter_features.contains(draw_record_features),
        };

        if !caps.ray_tracing {
            log::info!("ray-traced visibility unavailable on this adapter");
        }
        if !caps.draw_records {
            log::info!("draw-record execution unavailable on this adapter");
        }

        let mut features = wgpu::Features::empty();
        if caps.ray_tracing {
            features |= ray_tracing_features;
        }
        if caps.draw_records {
            features |= draw_record_features;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("device"),
                required_features: features,
                required_limits: wgpu::Limits {
                    max_storage_buffers_per_shader_stage: 16,
                    ..wgpu::Limits::default()
                },
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .wrap_err("failed request of device and queue")?;

        device.set_device_lost_callback(|reason, message| {
            log::error!("device lost ({reason:?}): {message}");
            std::process::abort();
        });

        let format = surface
            .get_capabilities(&adapter)
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .ok_or_else(|| eyre!("no supported surface formats"))?;

        let present_mode = wgpu::PresentMode::Fifo;

        surface.configure(
            &device,
            &surface_configuration(format, present_mode, surface_size),
        );

        let shader_composer = create_shader_composer();

        Ok(Self {
            surface_format: format,
            surface_size,
            present_mode,
            window,
            surface,
            device,
            queue,
            caps,
            shader_composer,
        })
    }

    pub fn create_shader_module(
        &mut self,
        source: &str,
        path: &str,
        shader_defs: &[(&str, naga_oil::compose::ShaderDefValue)],
    ) -> wgpu::naga::Module {
        let shader_defs: HashMap<_, _> = shader_defs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();

        self.shader_composer
            .make_naga_module(naga_oil::compose::NagaModuleDescriptor {
                source,
                file_path: path,
                shader_defs,
                ..Default::default()
            })
            .unwrap_or_else(|err| {
                let err = err.emit_to_string(&self.shader_composer);
                panic!("failed to create shader module {path}: {err}")
            })
    }

    pub fn resize_surface(&mut self, size: PhysicalSize<u32>) {
        let is_minimized = size.width == 0 || size.height == 0;

        let has_changed =
            size.width != self.surface_size.width || size.height != self.surface_size.height;
        self.surface_size = physical_size_to_texture_size(size);

        if !is_minimized && has_changed {
            self.surface.configure(
                &self.device,
                &surface_configuration(self.surface_format, self.present_mode, self.surface_size),
            );
        }
    }

    /// Reconfigure after a lost or outdated surface.
    pub fn reconfigure_surface(&self) {
        self.surface.configure(
            &self.device,
            &surface_configuration(self.surface_format, self.present_mode, self.surface_size),
        );
    }
}

fn surface_configuration(
    format: wgpu::TextureFormat,
    present_mode: wgpu::PresentMode,
    size: wgpu::Extent3d,
) -> wgpu::SurfaceConfiguration {
    wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        width: size.width,
        height: size.height,
        alpha_mode: wgpu::CompositeAlphaMode::Auto,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
        present_mode,
        format,
    }
}

fn create_shader_composer() -> naga_oil::compose::Composer {
    let mut composer = naga_oil::compose::Composer::default();
    // The device validates the composed modules; the composer's own
    // validator does not know about the ray-query capability.
    composer.validate = false;

    macro_rules! add_include {
        ($file_path:literal) => {
            composer
                .add_composable_module(naga_oil::compose::ComposableModuleDescriptor {
                    source: include_str!($file_path),
                    file_path: $file_path,
                    ..Default::default()
                })
                .unwrap_or_else(|err| panic!("failed to include shader {}: {err}", $file_path));
        };
    }

    add_include!("include_shaders/types.wgsl");

    composer
}

fn physical_size_to_texture_size(size: PhysicalSize<u32>) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width.max(1),
        height: size.height.max(1),
        depth_or_array_layers: 1,
    }
}
