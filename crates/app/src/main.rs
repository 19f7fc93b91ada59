//! umbra demo: a lit, shadowed scene driven by the frame engine.
//!
//! Controls: WASD/Space/Shift to move, right mouse button to look, Escape
//! to quit. `UMBRA_FRAMES_IN_FLIGHT` and `UMBRA_VALIDATION` override the
//! defaults; `RUST_LOG` sets the log filter.

use anyhow::Result;
use glam::Vec3;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use umbra_core::{EngineConfig, Timer};
use umbra_platform::{InputContext, KeyCode, MouseButton, Window};
use umbra_renderer::{Engine, FrameStatus, VulkanBackend};
use umbra_resources::{
    BaseMaterialDescription, DirectoryAssets, MaterialProperties, ObjectDescription,
    SceneDescription,
};
use umbra_rhi::vk;
use umbra_scene::{Light, LightKind, Transform};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn demo_scene() -> SceneDescription {
    SceneDescription {
        base_materials: vec![
            BaseMaterialDescription::new("lit", "shaders/lit.vert.spv", "shaders/lit.frag.spv")
                .with_textures(1, Some("builtin:white")),
            BaseMaterialDescription::new("sky", "shaders/skybox.vert.spv", "shaders/skybox.frag.spv")
                .with_textures(1, Some("builtin:sky"))
                .with_cubemap(),
        ],
        objects: vec![
            ObjectDescription::new("sky", "sky", "builtin:cube")
                .with_transform(Transform::new().with_uniform_scale(50.0))
                .with_shadow(false),
            ObjectDescription::new("floor", "lit", "builtin:plane")
                .with_textures(["builtin:checker"])
                .with_transform(Transform::new().with_uniform_scale(20.0))
                .with_shadow(false),
            ObjectDescription::new("crate", "lit", "builtin:cube")
                .with_properties(MaterialProperties::blinn_phong(
                    Vec3::new(0.8, 0.5, 0.3),
                    Vec3::splat(0.5),
                    16.0,
                ))
                .with_transform(Transform::new().with_position(Vec3::new(0.0, 0.5, 0.0))),
            ObjectDescription::new("pillar", "lit", "builtin:cube").with_transform(
                Transform::new()
                    .with_position(Vec3::new(3.0, 1.5, -2.0))
                    .with_scale(Vec3::new(0.5, 3.0, 0.5)),
            ),
        ],
        lights: vec![
            Light {
                kind: LightKind::Spot {
                    inner_cutoff: 0.91,
                    outer_cutoff: 0.82,
                },
                position: Vec3::new(-4.0, 8.0, 4.0),
                direction: Vec3::new(0.4, -0.8, -0.4).normalize(),
                ..Light::default()
            },
            Light {
                kind: LightKind::Point,
                position: Vec3::new(4.0, 3.0, 4.0),
                ambient: Vec3::splat(0.02),
                diffuse: Vec3::new(0.3, 0.3, 0.5),
                ..Light::default()
            },
        ],
    }
}

struct App {
    config: EngineConfig,
    // Dropped before the window its surface belongs to.
    engine: Option<Engine<VulkanBackend>>,
    window: Option<Window>,
    input: InputContext,
    timer: Timer,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            engine: None,
            window: None,
            input: InputContext::new(),
            timer: Timer::new(),
        }
    }

    fn create_engine(&self, window: &Window) -> Result<Engine<VulkanBackend>> {
        let backend = VulkanBackend::new(window, self.config.enable_validation)?;
        let mut engine = Engine::new(backend, self.config.clone())?;
        engine.load_scene(demo_scene(), &mut DirectoryAssets::new("assets"))?;
        let extent = engine.extent();
        engine.init_frame_resources(extent, self.config.frames_in_flight)?;
        engine.camera_mut().position = Vec3::new(0.0, 2.0, 8.0);
        Ok(engine)
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut engine) = self.engine.take()
            && let Err(e) = engine.shutdown()
        {
            error!("Engine shutdown failed: {}", e);
        }
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let dt = self.timer.delta_secs();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match engine.render_frame(dt, &self.input) {
            Ok(report) if report.status != FrameStatus::Presented => {
                warn!("Frame on slot {}: {:?}", report.frame_slot, report.status);
            }
            Ok(_) => {}
            Err(e) if e.is_recoverable() => warn!("Recoverable render error: {}", e),
            Err(e) => {
                error!("Render error: {}", e);
                self.shutdown(event_loop);
            }
        }
        self.input.end_frame();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match Window::new(event_loop, WIDTH, HEIGHT, "umbra") {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        match self.create_engine(&window) {
            Ok(engine) => {
                info!("Initialization complete, entering main loop");
                self.engine = Some(engine);
                self.window = Some(window);
            }
            Err(e) => {
                error!("Failed to create engine: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(engine) = self.engine.as_mut()
                    && let Err(e) = engine.resize(vk::Extent2D {
                        width: size.width,
                        height: size.height,
                    })
                {
                    error!("Resize failed: {}", e);
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
                if self.input.is_key_just_pressed(KeyCode::Escape) {
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = MouseButton::from_winit(button) {
                    match state {
                        ElementState::Pressed => self.input.on_mouse_pressed(button),
                        ElementState::Released => self.input.on_mouse_released(button),
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.input
                    .on_cursor_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::Focused(false) => self.input.clear(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    umbra_core::init_logging();
    let config = EngineConfig::from_env()?;
    info!(
        "Starting umbra ({} frames in flight, validation {})",
        config.frames_in_flight, config.enable_validation
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
