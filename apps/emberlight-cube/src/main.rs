//! Emberlight demo: a rotating textured cube.
//!
//! Exercises the whole GPU layer: device bootstrap, device-local vertex and
//! index buffers, a procedurally generated texture, descriptor sets, a
//! render pass with color and depth attachments, a compiled pipeline and the
//! swapchain's pre-recorded frame cycle. The rotation reaches the GPU
//! through a mapped uniform buffer, never by re-recording commands.
//!
//! ```bash
//! cargo run -p emberlight-cube
//! ```
//!
//! Set `RUST_LOG` to adjust log verbosity (e.g. info, debug, trace).

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::Context;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use emberlight_gpu::{
    Buffer, DescriptorPool, DescriptorSetLayoutBuilder, DescriptorSetUpdater, Device,
    DeviceBuilder, GpuError, Image, OwningHandle, Pipeline, PipelineConfig, RenderPass,
    RenderPassConfig, Swapchain, TextureData, TextureRegion,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const TEXTURE_SIZE: u32 = 64;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static CUBE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/cube_vert.spv"));
    pub static CUBE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/cube_frag.spv"));
}

/// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    assert!(
        bytes.len() % 4 == 0,
        "SPIR-V bytecode must be 4-byte aligned"
    );
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static CUBE_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static CUBE_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

fn vertex_shader() -> &'static [u32] {
    CUBE_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::CUBE_VERT))
}

fn fragment_shader() -> &'static [u32] {
    CUBE_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::CUBE_FRAG))
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

const fn v(position: [f32; 3], uv: [f32; 2]) -> Vertex {
    Vertex { position, uv }
}

/// Four vertices per face so each face gets the full texture.
const VERTICES: [Vertex; 24] = [
    // +X
    v([1.0, -1.0, -1.0], [0.0, 1.0]),
    v([1.0, 1.0, -1.0], [1.0, 1.0]),
    v([1.0, 1.0, 1.0], [1.0, 0.0]),
    v([1.0, -1.0, 1.0], [0.0, 0.0]),
    // -X
    v([-1.0, 1.0, -1.0], [0.0, 1.0]),
    v([-1.0, -1.0, -1.0], [1.0, 1.0]),
    v([-1.0, -1.0, 1.0], [1.0, 0.0]),
    v([-1.0, 1.0, 1.0], [0.0, 0.0]),
    // +Y
    v([-1.0, 1.0, -1.0], [0.0, 1.0]),
    v([-1.0, 1.0, 1.0], [0.0, 0.0]),
    v([1.0, 1.0, 1.0], [1.0, 0.0]),
    v([1.0, 1.0, -1.0], [1.0, 1.0]),
    // -Y
    v([-1.0, -1.0, 1.0], [0.0, 0.0]),
    v([-1.0, -1.0, -1.0], [0.0, 1.0]),
    v([1.0, -1.0, -1.0], [1.0, 1.0]),
    v([1.0, -1.0, 1.0], [1.0, 0.0]),
    // +Z
    v([-1.0, -1.0, 1.0], [0.0, 1.0]),
    v([1.0, -1.0, 1.0], [1.0, 1.0]),
    v([1.0, 1.0, 1.0], [1.0, 0.0]),
    v([-1.0, 1.0, 1.0], [0.0, 0.0]),
    // -Z
    v([1.0, -1.0, -1.0], [0.0, 1.0]),
    v([-1.0, -1.0, -1.0], [1.0, 1.0]),
    v([-1.0, 1.0, -1.0], [1.0, 0.0]),
    v([1.0, 1.0, -1.0], [0.0, 0.0]),
];

#[rustfmt::skip]
const INDICES: [u32; 36] = [
    0, 1, 2, 2, 3, 0,
    4, 5, 6, 6, 7, 4,
    8, 9, 10, 10, 11, 8,
    12, 13, 14, 14, 15, 12,
    16, 17, 18, 18, 19, 16,
    20, 21, 22, 22, 23, 20,
];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SceneUniforms {
    mvp: Mat4,
}

/// Generate an RGBA8 checkerboard so the demo needs no file decoder.
fn checkerboard_pixels() -> Vec<u8> {
    let mut pixels = Vec::with_capacity((TEXTURE_SIZE * TEXTURE_SIZE * 4) as usize);
    for y in 0..TEXTURE_SIZE {
        for x in 0..TEXTURE_SIZE {
            let light = ((x / 8) + (y / 8)) % 2 == 0;
            if light {
                pixels.extend_from_slice(&[235, 200, 120, 255]);
            } else {
                pixels.extend_from_slice(&[60, 45, 30, 255]);
            }
        }
    }
    pixels
}

/// Everything the demo owns, dropped in field order: GPU objects first, the
/// device second-to-last, the window last.
struct CubeApp {
    pipeline: Pipeline,
    descriptor_set: vk::DescriptorSet,
    descriptor_pool: DescriptorPool,
    set_layout: OwningHandle<vk::DescriptorSetLayout>,
    texture: Image,
    uniform_buffer: Buffer,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    swapchain: Swapchain,
    render_pass: RenderPass,
    device: Device,
    window: Arc<Window>,
    start: Instant,
}

impl CubeApp {
    fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let device = DeviceBuilder::new()
            .app_name("Emberlight Cube")
            .build(window.as_ref())
            .context("device bootstrap failed")?;

        let render_pass = RenderPassConfig::new()
            .with_color_attachment(device.color_format(), vk::ImageLayout::PRESENT_SRC_KHR)
            .with_clear_color([0.05, 0.05, 0.08, 1.0])
            .with_depth_attachment(device.depth_format())
            .build(&device)?;

        let swapchain =
            Swapchain::new(&device, &render_pass, size.width, size.height, true, None)?;
        info!(steps = swapchain.step_count(), "Swapchain ready");

        let vertex_buffer = Buffer::device_local(
            &device,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&VERTICES),
        )?;
        let index_buffer = Buffer::device_local(
            &device,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&INDICES),
        )?;
        let uniform_buffer = Buffer::staging(
            &device,
            std::mem::size_of::<SceneUniforms>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            None,
        )?;

        let pixels = checkerboard_pixels();
        let texture = Image::texture_2d(
            &device,
            &TextureData {
                pixels: &pixels,
                format: vk::Format::R8G8B8A8_UNORM,
                width: TEXTURE_SIZE,
                height: TEXTURE_SIZE,
                mip_levels: 1,
                faces: 1,
                regions: vec![TextureRegion {
                    mip_level: 0,
                    face: 0,
                    width: TEXTURE_SIZE,
                    height: TEXTURE_SIZE,
                    offset: 0,
                }],
            },
        )?;

        let set_layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image(1, vk::ShaderStageFlags::FRAGMENT)
            .build(&device)?;

        let descriptor_pool = DescriptorPool::new(
            &device,
            1,
            &[
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: 1,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: 1,
                },
            ],
        )?;

        let descriptor_set = descriptor_pool.allocate_set(&device, set_layout.raw())?;

        DescriptorSetUpdater::new()
            .for_uniform_buffer(descriptor_set, 0, &uniform_buffer)
            .for_texture(descriptor_set, 1, &texture)
            .update_sets(&device);

        let pipeline = PipelineConfig::new(vertex_shader(), fragment_shader())
            .with_vertex_binding(0, std::mem::size_of::<Vertex>() as u32)
            .with_vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
            .with_vertex_attribute(1, 0, vk::Format::R32G32_SFLOAT, 12)
            .with_descriptor_set_layout(set_layout.raw())
            .build(&device, &render_pass)?;

        let app = Self {
            pipeline,
            descriptor_set,
            descriptor_pool,
            set_layout,
            texture,
            uniform_buffer,
            index_buffer,
            vertex_buffer,
            swapchain,
            render_pass,
            device,
            window,
            start: Instant::now(),
        };

        app.record_frames()?;

        Ok(app)
    }

    /// Record every swapchain step's command buffer once; frames only replay
    /// them.
    fn record_frames(&self) -> Result<(), GpuError> {
        let ash_device = self.device.device();
        let extent = self.swapchain.extent();

        self.swapchain.record_command_buffers(&self.device, |cmd, step| {
            unsafe {
                self.render_pass.begin(
                    ash_device,
                    cmd,
                    self.swapchain.framebuffer(step),
                    extent,
                );

                let viewport = vk::Viewport::default()
                    .width(extent.width as f32)
                    .height(extent.height as f32)
                    .min_depth(0.0)
                    .max_depth(1.0);
                ash_device.cmd_set_viewport(cmd, 0, &[viewport]);

                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                };
                ash_device.cmd_set_scissor(cmd, 0, &[scissor]);

                ash_device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.handle(),
                );
                ash_device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout(),
                    0,
                    &[self.descriptor_set],
                    &[],
                );
                ash_device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
                ash_device.cmd_bind_index_buffer(
                    cmd,
                    self.index_buffer.handle(),
                    0,
                    vk::IndexType::UINT32,
                );
                ash_device.cmd_draw_indexed(cmd, INDICES.len() as u32, 1, 0, 0, 0);

                self.render_pass.end(ash_device, cmd);
            }
            Ok(())
        })
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        self.update_uniforms()?;

        let (step, _suboptimal) = match self.swapchain.acquire_next_step() {
            Ok(acquired) => acquired,
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                let size = self.window.inner_size();
                self.rebuild_swapchain(size.width, size.height)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let suboptimal = self.swapchain.present_next(&self.device, step, &[])?;
        if suboptimal {
            let size = self.window.inner_size();
            self.rebuild_swapchain(size.width, size.height)?;
        }

        Ok(())
    }

    /// Push this frame's rotation to the GPU through the mapped uniform
    /// buffer.
    fn update_uniforms(&self) -> anyhow::Result<()> {
        let t = self.start.elapsed().as_secs_f32();
        let extent = self.swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;

        let model = Mat4::from_rotation_y(t * 0.8) * Mat4::from_rotation_x(t * 0.5);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 1.5, 4.5), Vec3::ZERO, Vec3::Y);
        let mut proj = Mat4::perspective_rh(60_f32.to_radians(), aspect, 0.1, 100.0);
        // Vulkan's clip-space Y points down.
        proj.y_axis.y *= -1.0;

        let uniforms = SceneUniforms {
            mvp: proj * view * model,
        };
        self.uniform_buffer
            .update(&self.device, bytemuck::bytes_of(&uniforms))?;
        Ok(())
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        info!(width, height, "Rebuilding swapchain");

        self.device.wait_idle()?;
        let rebuilt = Swapchain::new(
            &self.device,
            &self.render_pass,
            width,
            height,
            true,
            Some(&self.swapchain),
        )?;
        self.swapchain = rebuilt;
        self.record_frames()?;
        Ok(())
    }
}

#[derive(Default)]
struct CubeRunner {
    app: Option<CubeApp>,
}

impl ApplicationHandler for CubeRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() {
            return;
        }

        let window_attrs = Window::default_attributes()
            .with_title("Emberlight Cube")
            .with_inner_size(PhysicalSize::new(WIDTH, HEIGHT));

        let result = event_loop
            .create_window(window_attrs)
            .map_err(anyhow::Error::from)
            .and_then(|window| CubeApp::new(Arc::new(window)));

        match result {
            Ok(app) => {
                info!("Demo ready");
                self.app = Some(app);
            }
            Err(e) => {
                error!("Failed to initialize: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.app = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(app) = &mut self.app {
                    if let Err(e) = app.rebuild_swapchain(size.width, size.height) {
                        error!("Resize failed: {e:#}");
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(app) = &mut self.app {
                    if let Err(e) = app.render_frame() {
                        error!("Render error: {e:#}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(app) = &self.app {
            app.window.request_redraw();
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Emberlight Cube starting...");

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = CubeRunner::default();
    event_loop.run_app(&mut runner)?;

    Ok(())
}
