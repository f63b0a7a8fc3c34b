mod accel;
mod camera;
mod context;
mod display;
mod frame;
mod generator;
mod loader;
mod overlay;
mod passes;
mod raster;
mod raytrace;
mod renderer;
mod resolve;
mod resources;
mod scene;
mod slots;
mod wires;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use eyre::{Result, WrapErr};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::camera::{Camera, CameraDelta};
use crate::context::Context;
use crate::overlay::GuiFrame;
use crate::renderer::{RenderSettings, Renderer};
use crate::scene::{DebugMode, SceneData};

#[derive(Parser, Debug)]
#[command(name = "visicluster", about = "GPU-driven clustered-mesh renderer")]
struct Args {
    /// Directory holding the nine scene pool files.
    #[arg(long, default_value = ".")]
    scene: PathBuf,

    /// Write the generated demo scene into this directory, then render it.
    #[arg(long)]
    generate: Option<PathBuf>,

    /// Face tessellation level of the generated clusters.
    #[arg(long, default_value_t = 0)]
    lod: u32,

    /// Use the software rasterizer adapter.
    #[arg(long)]
    warp: bool,

    /// Start with the fused producer/consumer path enabled.
    #[arg(long = "work-graph")]
    work_graph: bool,
}

fn parse_args() -> Args {
    Args::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        let code = match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
            _ => -1,
        };
        process::exit(code);
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args();

    if let Some(directory) = &args.generate {
        generator::write_demo_scene(directory, args.lod)?;
    }

    let scene_dir = args.generate.clone().unwrap_or_else(|| args.scene.clone());
    let scene = loader::load_scene(&scene_dir)
        .wrap_err_with(|| format!("failed loading scene from {scene_dir:?}"))?;

    let event_loop = EventLoop::new().wrap_err("failed creating event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        args,
        scene: Some(scene),
        state: None,
    };
    event_loop.run_app(&mut app).wrap_err("event loop failed")?;

    Ok(())
}

struct App {
    args: Args,
    scene: Option<SceneData>,
    state: Option<AppState>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let Some(scene) = self.scene.take() else {
            return;
        };

        let attributes = Window::default_attributes()
            .with_title("visicluster")
            .with_inner_size(LogicalSize::new(1280, 720));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .expect("failed creating window"),
        );

        let context =
            Context::new(window.clone(), self.args.warp).expect("failed creating gpu context");

        let settings = RenderSettings {
            draw_records: self.args.work_graph && context.caps.draw_records,
            ..Default::default()
        };
        if self.args.work_graph && !context.caps.draw_records {
            log::warn!("--work-graph requested but the adapter cannot run it");
        }

        let size = window.inner_size();
        let camera = Camera::new(size.width as f32 / size.height.max(1) as f32);

        let renderer = Renderer::new(context, scene, settings).expect("failed creating renderer");

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        self.state = Some(AppState {
            window,
            renderer,
            camera,
            input: InputState::default(),
            egui_ctx,
            egui_state,
            last_update: Instant::now(),
        });
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        let response = state.egui_state.on_window_event(&state.window, &event);

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    state.renderer.resize_surface(size);
                    state
                        .camera
                        .resize_proj(size.width as f32 / size.height as f32);
                }
            }
            WindowEvent::KeyboardInput { event, .. } if !response.consumed => {
                state.handle_key(event);
            }
            WindowEvent::MouseInput { button, state: element_state, .. } if !response.consumed => {
                if button == MouseButton::Right {
                    state.input.rotating = element_state == ElementState::Pressed;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                state.input.mouse_moved((position.x, position.y));
            }
            WindowEvent::RedrawRequested => state.draw(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

struct AppState {
    window: Arc<Window>,
    renderer: Renderer,
    camera: Camera,
    input: InputState,
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    last_update: Instant,
}

impl AppState {
    fn handle_key(&mut self, event: winit::event::KeyEvent) {
        let pressed = event.state == ElementState::Pressed;
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };

        match code {
            KeyCode::KeyW => self.input.forward = pressed,
            KeyCode::KeyS => self.input.backward = pressed,
            KeyCode::KeyA => self.input.left = pressed,
            KeyCode::KeyD => self.input.right = pressed,
            KeyCode::ShiftLeft => self.input.fast = pressed,
            _ if pressed && !event.repeat => {
                let settings = &mut self.renderer.settings;
                match code {
                    KeyCode::KeyC => settings.lock_cull_camera = !settings.lock_cull_camera,
                    KeyCode::KeyB => settings.show_instance_bounds = !settings.show_instance_bounds,
                    KeyCode::KeyN => settings.show_cluster_bounds = !settings.show_cluster_bounds,
                    KeyCode::KeyR => settings.ray_visibility = !settings.ray_visibility,
                    KeyCode::KeyG => settings.draw_records = !settings.draw_records,
                    KeyCode::KeyM => settings.debug_mode = settings.debug_mode.next(),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn draw(&mut self) {
        let dt = self.last_update.elapsed();
        self.last_update = Instant::now();

        let speed = if self.input.fast { 30.0 } else { 15.0 } * dt.as_secs_f32();
        let (yaw_delta, pitch_delta) = self.input.drag_delta();

        self.camera.move_by_delta(CameraDelta {
            forward: if self.input.forward { speed } else { 0.0 },
            backward: if self.input.backward { speed } else { 0.0 },
            left: if self.input.left { speed } else { 0.0 },
            right: if self.input.right { speed } else { 0.0 },
            yaw: yaw_delta as f32 * 0.2,
            pitch: pitch_delta as f32 * 0.2,
        });

        let raw_input = self.egui_state.take_egui_input(&self.window);
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            stats_window(ctx, &mut self.renderer);
        });
        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let primitives = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let gui = GuiFrame {
            primitives,
            textures_delta: full_output.textures_delta,
            pixels_per_point: full_output.pixels_per_point,
        };

        match self.renderer.draw(&self.camera, Some(gui)) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.renderer.context.reconfigure_surface();
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface frame timed out");
            }
            Err(error) => {
                panic!("failed rendering: {error}");
            }
        }
    }
}

fn stats_window(ctx: &egui::Context, renderer: &mut Renderer) {
    let caps = renderer.context.caps;
    let instance_count = renderer.instance_count();
    let cluster_slots = renderer.max_cluster_slots();
    let stats = renderer.stats();

    egui::Window::new("visicluster")
        .resizable(false)
        .show(ctx, |ui| {
            match stats {
                Some((stats, delay)) => {
                    ui.label(format!(
                        "visible instances: {} of {}",
                        stats.visible_instances, instance_count,
                    ));
                    ui.label(format!(
                        "visible clusters: {} of {}",
                        stats.visible_clusters, cluster_slots,
                    ));
                    ui.small(format!("counters trail by {delay} frames"));
                }
                None => {
                    ui.label("counters pending");
                }
            }

            ui.separator();

            let settings = &mut renderer.settings;
            egui::ComboBox::from_label("debug mode")
                .selected_text(settings.debug_mode.label())
                .show_ui(ui, |ui| {
                    for mode in DebugMode::ALL {
                        ui.selectable_value(&mut settings.debug_mode, mode, mode.label());
                    }
                });

            ui.checkbox(&mut settings.lock_cull_camera, "lock cull camera");
            ui.checkbox(&mut settings.show_instance_bounds, "instance bounds");
            ui.checkbox(&mut settings.show_cluster_bounds, "cluster bounds");

            ui.add_enabled(
                caps.ray_tracing,
                egui::Checkbox::new(&mut settings.ray_visibility, "ray-traced visibility"),
            );
            ui.add_enabled(
                caps.draw_records,
                egui::Checkbox::new(&mut settings.draw_records, "fused cull + draw records"),
            );
        });
}

/// Key and mouse state between frames; mouse deltas accumulate until the
/// next camera update consumes them.
#[derive(Default)]
struct InputState {
    forward: bool,
    backward: bool,
    left: bool,
    right: bool,
    fast: bool,
    rotating: bool,
    mouse_pos: Option<(f64, f64)>,
    mouse_delta: (f64, f64),
}

impl InputState {
    fn mouse_moved(&mut self, pos: (f64, f64)) {
        if let Some(last) = self.mouse_pos {
            if self.rotating {
                self.mouse_delta.0 += pos.0 - last.0;
                self.mouse_delta.1 += last.1 - pos.1;
            }
        }
        self.mouse_pos = Some(pos);
    }

    fn drag_delta(&mut self) -> (f64, f64) {
        std::mem::take(&mut self.mouse_delta)
    }
}
