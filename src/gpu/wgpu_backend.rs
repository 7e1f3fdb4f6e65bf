//! WGPU Backend
//!
//! Translates recorded frames into wgpu command encoders. Pipelines are
//! created with automatic bind-group layouts; at draw time the backend
//! materializes a bind group from the commands recorded since the last draw,
//! so pass closures must bind exactly the set their shader declares.
//!
//! Replay is two-phase per pass: resources (views, bind groups) are resolved
//! up front, then the render pass is begun and commands are replayed against
//! the pre-built objects. This keeps every borrow alive for the whole pass.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{Result, SigilError};

use super::command::{Command, PassTarget, RecordedFrame};
use super::device::{RenderDevice, SubmitFence, UploadTicket};
use super::{
    AttachmentView, BlendPreset, BufferDesc, BufferId, BufferUsage, ClearValue, CompareFn,
    CullMode, PipelineDesc, PipelineId, PipelineKind, SamplerKind, TextureDesc, TextureDimension,
    TextureFormat, TextureId, TextureUsage,
};

const VERTEX_ATTRS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x3,
    3 => Float32x3,
    4 => Float32x2,
];

const VERTEX_STRIDE: u64 = std::mem::size_of::<crate::assets::Vertex>() as u64;

enum PipelineObject {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    buffers: FxHashMap<BufferId, wgpu::Buffer>,
    textures: FxHashMap<TextureId, (wgpu::Texture, TextureDesc)>,
    /// Views imported from outside the texture table (the swapchain image).
    external_views: FxHashMap<TextureId, wgpu::TextureView>,
    pipelines: FxHashMap<PipelineId, PipelineObject>,
    shaders: FxHashMap<String, wgpu::ShaderModule>,
    acquired: Option<(TextureId, wgpu::SurfaceTexture)>,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Production [`RenderDevice`] on top of wgpu.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Mutex<Option<wgpu::SurfaceConfiguration>>,
    samplers: [wgpu::Sampler; 3],
    blit_pipeline: wgpu::ComputePipeline,
    inner: Mutex<Inner>,
}

impl WgpuDevice {
    /// Request an adapter and device. Pass `None` for `surface` to run
    /// offscreen (frames render into an internal target).
    pub async fn request(
        instance: &wgpu::Instance,
        surface: Option<wgpu::Surface<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SigilError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sigil device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let surface_config = surface.as_ref().map(|s| {
            let config = s
                .get_default_config(&adapter, width.max(1), height.max(1))
                .expect("surface incompatible with adapter");
            s.configure(&device, &config);
            config
        });

        let samplers = [
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("linear repeat"),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                address_mode_w: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Linear,
                ..Default::default()
            }),
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("linear clamp"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Linear,
                ..Default::default()
            }),
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("nearest clamp"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                mipmap_filter: wgpu::MipmapFilterMode::Nearest,
                ..Default::default()
            }),
        ];

        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit 3d"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::BLIT_3D.into()),
        });
        let blit_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("blit 3d"),
            layout: None,
            module: &blit_module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            surface,
            surface_config: Mutex::new(surface_config),
            samplers,
            blit_pipeline,
            inner: Mutex::new(Inner::default()),
        })
    }

    fn sampler(&self, kind: SamplerKind) -> &wgpu::Sampler {
        match kind {
            SamplerKind::LinearRepeat => &self.samplers[0],
            SamplerKind::LinearClamp => &self.samplers[1],
            SamplerKind::NearestClamp => &self.samplers[2],
        }
    }

    fn flush_ticket(&self) -> UploadTicket {
        let (tx, rx) = flume::bounded(1);
        self.queue.on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        // Flush pending queue writes so the callback is reachable even if no
        // frame is submitted soon.
        self.queue.submit(std::iter::empty());
        UploadTicket::new(rx)
    }
}

// ─── Enum Mapping ─────────────────────────────────────────────────────────────

fn map_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Depth16Unorm => wgpu::TextureFormat::Depth16Unorm,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn map_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::MAP_READ) {
        out |= wgpu::BufferUsages::MAP_READ;
    }
    out
}

fn map_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::STORAGE) {
        out |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    out
}

fn map_compare(compare: CompareFn) -> wgpu::CompareFunction {
    match compare {
        CompareFn::Never => wgpu::CompareFunction::Never,
        CompareFn::Less => wgpu::CompareFunction::Less,
        CompareFn::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFn::Always => wgpu::CompareFunction::Always,
    }
}

fn map_cull(cull: CullMode) -> Option<wgpu::Face> {
    match cull {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

fn clear_color(value: ClearValue) -> wgpu::Color {
    match value {
        ClearValue::Color(c) => wgpu::Color {
            r: f64::from(c[0]),
            g: f64::from(c[1]),
            b: f64::from(c[2]),
            a: f64::from(c[3]),
        },
        ClearValue::ColorU32(c) => wgpu::Color {
            r: f64::from(c[0]),
            g: f64::from(c[1]),
            b: f64::from(c[2]),
            a: f64::from(c[3]),
        },
        ClearValue::Depth(d) => wgpu::Color {
            r: f64::from(d),
            g: 0.0,
            b: 0.0,
            a: 0.0,
        },
    }
}

// ─── Replay Structures ────────────────────────────────────────────────────────

enum Replay {
    SetPipeline(usize),
    SetVertexBuffer { slot: u32, buffer: usize },
    SetIndexBuffer { buffer: usize },
    SetBindGroup(usize),
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    },
}

#[derive(Default)]
struct BindingSet {
    entries: Vec<(u32, Binding)>,
    dirty: bool,
}

#[derive(Clone, PartialEq)]
enum Binding {
    Buffer(BufferId),
    Texture(AttachmentView, SamplerKind),
    TextureRaw(AttachmentView),
    StorageTexture(AttachmentView),
}

impl BindingSet {
    fn set(&mut self, binding: u32, value: Binding) {
        if let Some(slot) = self.entries.iter_mut().find(|(b, _)| *b == binding) {
            if slot.1 != value {
                slot.1 = value;
                self.dirty = true;
            }
        } else {
            self.entries.push((binding, value));
            self.dirty = true;
        }
    }

    /// Pipelines come with their own reflected layout; bindings recorded for
    /// the previous pipeline must not leak into the next bind group.
    fn reset(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }
}

impl WgpuDevice {
    fn resolve_view(
        &self,
        inner: &Inner,
        cache: &mut FxHashMap<AttachmentView, wgpu::TextureView>,
        view: AttachmentView,
    ) -> wgpu::TextureView {
        if let Some(external) = inner.external_views.get(&view.texture) {
            return external.clone();
        }
        if let Some(cached) = cache.get(&view) {
            return cached.clone();
        }
        let (texture, _) = inner
            .textures
            .get(&view.texture)
            .unwrap_or_else(|| panic!("unknown texture {:?}", view.texture));
        let created = texture.create_view(&wgpu::TextureViewDescriptor {
            label: None,
            base_mip_level: view.base_mip,
            mip_level_count: view.mip_count,
            ..Default::default()
        });
        cache.insert(view, created.clone());
        created
    }

    fn build_bind_group(
        &self,
        inner: &Inner,
        view_cache: &mut FxHashMap<AttachmentView, wgpu::TextureView>,
        layout: &wgpu::BindGroupLayout,
        bindings: &BindingSet,
    ) -> wgpu::BindGroup {
        // Views must be owned for the duration of the create call.
        let mut views: Vec<(u32, wgpu::TextureView)> = Vec::new();
        for (binding, entry) in &bindings.entries {
            match entry {
                Binding::Texture(view, _) | Binding::TextureRaw(view) | Binding::StorageTexture(view) => {
                    views.push((*binding, self.resolve_view(inner, view_cache, *view)));
                }
                Binding::Buffer(_) => {}
            }
        }

        let mut entries: Vec<wgpu::BindGroupEntry> = Vec::new();
        for (binding, entry) in &bindings.entries {
            match entry {
                Binding::Buffer(id) => {
                    let buffer = inner
                        .buffers
                        .get(id)
                        .unwrap_or_else(|| panic!("unknown buffer {id:?}"));
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: buffer.as_entire_binding(),
                    });
                }
                Binding::Texture(_, sampler) => {
                    let view = &views.iter().find(|(b, _)| b == binding).unwrap().1;
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding + 16,
                        resource: wgpu::BindingResource::Sampler(self.sampler(*sampler)),
                    });
                }
                Binding::TextureRaw(_) | Binding::StorageTexture(_) => {
                    let view = &views.iter().find(|(b, _)| b == binding).unwrap().1;
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                }
            }
        }

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sigil pass bindings"),
            layout,
            entries: &entries,
        })
    }
}

// ─── RenderDevice Impl ────────────────────────────────────────────────────────

impl RenderDevice for WgpuDevice {
    fn register_shader(&self, name: &str, source: &str) {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.to_string().into()),
        });
        self.inner.lock().shaders.insert(name.to_string(), module);
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId> {
        let mut inner = self.inner.lock();
        let Some(module) = inner.shaders.get(&desc.shader) else {
            return Err(SigilError::ShaderNotFound(desc.shader.clone()));
        };

        let object = match &desc.kind {
            PipelineKind::Compute => {
                let pipeline =
                    self.device
                        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some(desc.label),
                            layout: None,
                            module,
                            entry_point: Some("main"),
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                            cache: None,
                        });
                PipelineObject::Compute(pipeline)
            }
            PipelineKind::Graphics(state) => {
                let vertex_layouts = [wgpu::VertexBufferLayout {
                    array_stride: VERTEX_STRIDE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRS,
                }];
                let buffers: &[wgpu::VertexBufferLayout] = if state.vertex_input {
                    &vertex_layouts
                } else {
                    &[]
                };

                let targets: Vec<Option<wgpu::ColorTargetState>> = state
                    .color_formats
                    .iter()
                    .map(|&format| {
                        // Integer targets never blend.
                        let blend = match (state.blend, format) {
                            (_, TextureFormat::R32Uint) | (BlendPreset::Off, _) => None,
                            (BlendPreset::Alpha, _) => Some(wgpu::BlendState::ALPHA_BLENDING),
                        };
                        Some(wgpu::ColorTargetState {
                            format: map_format(format),
                            blend,
                            write_mask: wgpu::ColorWrites::ALL,
                        })
                    })
                    .collect();

                let fragment = if targets.is_empty() {
                    None
                } else {
                    Some(wgpu::FragmentState {
                        module,
                        entry_point: Some("fs_main"),
                        targets: &targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    })
                };

                let pipeline = self
                    .device
                    .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(desc.label),
                        layout: None,
                        vertex: wgpu::VertexState {
                            module,
                            entry_point: Some("vs_main"),
                            buffers,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment,
                        primitive: wgpu::PrimitiveState {
                            topology: wgpu::PrimitiveTopology::TriangleList,
                            front_face: wgpu::FrontFace::Ccw,
                            cull_mode: map_cull(state.cull_mode),
                            ..Default::default()
                        },
                        depth_stencil: state.depth.map(|depth| wgpu::DepthStencilState {
                            format: map_format(depth.format),
                            depth_write_enabled: Some(depth.depth_write),
                            depth_compare: Some(map_compare(depth.compare)),
                            stencil: wgpu::StencilState::default(),
                            bias: wgpu::DepthBiasState::default(),
                        }),
                        multisample: wgpu::MultisampleState {
                            count: 1,
                            mask: !0,
                            alpha_to_coverage_enabled: false,
                        },
                        multiview_mask: None,
                        cache: None,
                    });
                PipelineObject::Render(pipeline)
            }
        };

        let id = PipelineId(inner.next());
        inner.pipelines.insert(id, object);
        Ok(id)
    }

    fn destroy_pipeline(&self, id: PipelineId) {
        self.inner.lock().pipelines.remove(&id);
    }

    fn create_buffer(&self, desc: &BufferDesc) -> BufferId {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size.max(4),
            usage: map_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        let mut inner = self.inner.lock();
        let id = BufferId(inner.next());
        inner.buffers.insert(id, buffer);
        id
    }

    fn create_buffer_with_data(&self, desc: &BufferDesc, data: &[u8]) -> (BufferId, UploadTicket) {
        use wgpu::util::DeviceExt;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents: data,
                usage: map_buffer_usage(desc.usage),
            });
        let mut inner = self.inner.lock();
        let id = BufferId(inner.next());
        inner.buffers.insert(id, buffer);
        // Mapped-at-creation uploads are visible as soon as the buffer is
        // unmapped; no queue round-trip to wait for.
        (id, UploadTicket::ready())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) {
        let inner = self.inner.lock();
        if let Some(buffer) = inner.buffers.get(&id) {
            self.queue.write_buffer(buffer, offset, data);
        } else {
            log::error!("write to unknown buffer {id:?}");
        }
    }

    fn destroy_buffer(&self, id: BufferId) {
        self.inner.lock().buffers.remove(&id);
    }

    fn create_texture(&self, desc: &TextureDesc) -> TextureId {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
            mip_level_count: desc.mip_level_count,
            sample_count: 1,
            dimension: match desc.dimension {
                TextureDimension::D2 => wgpu::TextureDimension::D2,
                TextureDimension::D3 => wgpu::TextureDimension::D3,
            },
            format: map_format(desc.format),
            usage: map_texture_usage(desc.usage),
            view_formats: &[],
        });
        let mut inner = self.inner.lock();
        let id = TextureId(inner.next());
        inner.textures.insert(id, (texture, desc.clone()));
        id
    }

    fn create_texture_with_data(&self, desc: &TextureDesc, data: &[u8]) -> (TextureId, UploadTicket) {
        let id = self.create_texture(desc);
        {
            let inner = self.inner.lock();
            let (texture, _) = &inner.textures[&id];
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                    rows_per_image: Some(desc.height),
                },
                wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: desc.depth,
                },
            );
        }
        (id, self.flush_ticket())
    }

    fn destroy_texture(&self, id: TextureId) {
        self.inner.lock().textures.remove(&id);
    }

    fn acquire_frame(&self) -> Result<TextureId> {
        let mut inner = self.inner.lock();
        if let Some((id, _)) = &inner.acquired {
            return Ok(*id);
        }
        let Some(surface) = &self.surface else {
            // Offscreen mode: render into a persistent internal target.
            drop(inner);
            let existing = {
                let inner = self.inner.lock();
                inner
                    .textures
                    .iter()
                    .find(|(_, (_, d))| d.label == "offscreen target")
                    .map(|(id, _)| *id)
            };
            if let Some(id) = existing {
                return Ok(id);
            }
            return Ok(self.create_texture(&TextureDesc::attachment(
                "offscreen target",
                1280,
                720,
                TextureFormat::Bgra8Unorm,
            )));
        };

        let surface_texture = match surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(t)
            | wgpu::CurrentSurfaceTexture::Suboptimal(t) => t,
            other => {
                return Err(SigilError::DeviceLost(format!("{other:?}")));
            }
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(inner.next());
        inner.external_views.insert(id, view);
        inner.acquired = Some((id, surface_texture));
        Ok(id)
    }

    fn submit(&self, frame: RecordedFrame) -> SubmitFence {
        let mut view_cache: FxHashMap<AttachmentView, wgpu::TextureView> = FxHashMap::default();
        let mut readbacks: Vec<(wgpu::Buffer, flume::Sender<u32>)> = Vec::new();

        let inner = self.inner.lock();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sigil frame"),
            });

        for pass in frame.passes {
            encoder.push_debug_group(&pass.name);
            match pass.target {
                PassTarget::Graphics { colors, depth } => {
                    // Phase 1: resolve attachments, bind groups, buffer refs.
                    let color_views: Vec<(wgpu::TextureView, Option<ClearValue>)> = colors
                        .iter()
                        .map(|a| (self.resolve_view(&inner, &mut view_cache, a.view), a.clear))
                        .collect();
                    let depth_view = depth
                        .as_ref()
                        .map(|a| (self.resolve_view(&inner, &mut view_cache, a.view), a.clear));

                    let mut bindings = BindingSet::default();
                    let mut bind_groups: Vec<wgpu::BindGroup> = Vec::new();
                    let mut replay: Vec<Replay> = Vec::new();
                    let mut pipelines: Vec<&wgpu::RenderPipeline> = Vec::new();
                    let mut buffers: Vec<&wgpu::Buffer> = Vec::new();
                    let mut current_layout: Option<wgpu::BindGroupLayout> = None;

                    for command in &pass.commands.commands {
                        match command {
                            Command::SetPipeline(id) => {
                                let Some(PipelineObject::Render(pipeline)) =
                                    inner.pipelines.get(id)
                                else {
                                    log::error!("pass {:?}: invalid render pipeline {id:?}", pass.name);
                                    continue;
                                };
                                current_layout = Some(pipeline.get_bind_group_layout(0));
                                bindings.reset();
                                pipelines.push(pipeline);
                                replay.push(Replay::SetPipeline(pipelines.len() - 1));
                            }
                            Command::SetVertexBuffer { slot, buffer } => {
                                if let Some(b) = inner.buffers.get(buffer) {
                                    buffers.push(b);
                                    replay.push(Replay::SetVertexBuffer {
                                        slot: *slot,
                                        buffer: buffers.len() - 1,
                                    });
                                }
                            }
                            Command::SetIndexBuffer { buffer } => {
                                if let Some(b) = inner.buffers.get(buffer) {
                                    buffers.push(b);
                                    replay.push(Replay::SetIndexBuffer {
                                        buffer: buffers.len() - 1,
                                    });
                                }
                            }
                            Command::BindUniform { binding, buffer }
                            | Command::BindStorage { binding, buffer } => {
                                bindings.set(*binding, Binding::Buffer(*buffer));
                            }
                            Command::BindTexture {
                                binding,
                                view,
                                sampler,
                            } => bindings.set(*binding, Binding::Texture(*view, *sampler)),
                            Command::BindTextureRaw { binding, view } => {
                                bindings.set(*binding, Binding::TextureRaw(*view));
                            }
                            Command::BindStorageTexture { binding, view } => {
                                bindings.set(*binding, Binding::StorageTexture(*view));
                            }
                            Command::Draw { .. } | Command::DrawIndexed { .. } => {
                                if bindings.dirty {
                                    if let Some(layout) = &current_layout {
                                        bind_groups.push(self.build_bind_group(
                                            &inner,
                                            &mut view_cache,
                                            layout,
                                            &bindings,
                                        ));
                                        replay.push(Replay::SetBindGroup(bind_groups.len() - 1));
                                        bindings.dirty = false;
                                    }
                                }
                                match *command {
                                    Command::Draw {
                                        vertex_count,
                                        instance_count,
                                    } => replay.push(Replay::Draw {
                                        vertex_count,
                                        instance_count,
                                    }),
                                    Command::DrawIndexed {
                                        index_count,
                                        instance_count,
                                        first_instance,
                                    } => replay.push(Replay::DrawIndexed {
                                        index_count,
                                        instance_count,
                                        first_instance,
                                    }),
                                    _ => unreachable!(),
                                }
                            }
                            _ => log::warn!(
                                "pass {:?}: command unsupported in graphics pass",
                                pass.name
                            ),
                        }
                    }

                    // Phase 2: replay against the pre-built objects.
                    let attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
                        .iter()
                        .map(|(view, clear)| {
                            Some(wgpu::RenderPassColorAttachment {
                                view,
                                resolve_target: None,
                                ops: wgpu::Operations {
                                    load: match clear {
                                        Some(value) => wgpu::LoadOp::Clear(clear_color(*value)),
                                        None => wgpu::LoadOp::Load,
                                    },
                                    store: wgpu::StoreOp::Store,
                                },
                                depth_slice: None,
                            })
                        })
                        .collect();

                    let depth_attachment =
                        depth_view
                            .as_ref()
                            .map(|(view, clear)| wgpu::RenderPassDepthStencilAttachment {
                                view,
                                depth_ops: Some(wgpu::Operations {
                                    load: match clear {
                                        Some(value) => wgpu::LoadOp::Clear(*value),
                                        None => wgpu::LoadOp::Load,
                                    },
                                    store: wgpu::StoreOp::Store,
                                }),
                                stencil_ops: None,
                            });

                    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(&pass.name),
                        color_attachments: &attachments,
                        depth_stencil_attachment: depth_attachment,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                        multiview_mask: None,
                    });

                    for step in &replay {
                        match step {
                            Replay::SetPipeline(index) => rpass.set_pipeline(pipelines[*index]),
                            Replay::SetVertexBuffer { slot, buffer } => {
                                rpass.set_vertex_buffer(*slot, buffers[*buffer].slice(..));
                            }
                            Replay::SetIndexBuffer { buffer } => rpass.set_index_buffer(
                                buffers[*buffer].slice(..),
                                wgpu::IndexFormat::Uint32,
                            ),
                            Replay::SetBindGroup(index) => {
                                rpass.set_bind_group(0, &bind_groups[*index], &[]);
                            }
                            Replay::Draw {
                                vertex_count,
                                instance_count,
                            } => rpass.draw(0..*vertex_count, 0..*instance_count),
                            Replay::DrawIndexed {
                                index_count,
                                instance_count,
                                first_instance,
                            } => rpass.draw_indexed(
                                0..*index_count,
                                0,
                                *first_instance..*first_instance + *instance_count,
                            ),
                        }
                    }
                }
                PassTarget::General => {
                    let mut bindings = BindingSet::default();
                    let mut current_compute: Option<&wgpu::ComputePipeline> = None;
                    for command in &pass.commands.commands {
                        match command {
                            Command::SetPipeline(id) => match inner.pipelines.get(id) {
                                Some(PipelineObject::Compute(pipeline)) => {
                                    current_compute = Some(pipeline);
                                    bindings.reset();
                                }
                                _ => log::error!(
                                    "pass {:?}: invalid compute pipeline {id:?}",
                                    pass.name
                                ),
                            },
                            Command::BindUniform { binding, buffer }
                            | Command::BindStorage { binding, buffer } => {
                                bindings.set(*binding, Binding::Buffer(*buffer));
                            }
                            Command::BindTexture {
                                binding,
                                view,
                                sampler,
                            } => bindings.set(*binding, Binding::Texture(*view, *sampler)),
                            Command::BindTextureRaw { binding, view } => {
                                bindings.set(*binding, Binding::TextureRaw(*view));
                            }
                            Command::BindStorageTexture { binding, view } => {
                                bindings.set(*binding, Binding::StorageTexture(*view));
                            }
                            Command::Dispatch { x, y, z } => {
                                let Some(pipeline) = current_compute else {
                                    log::error!("pass {:?}: dispatch without pipeline", pass.name);
                                    continue;
                                };
                                let layout = pipeline.get_bind_group_layout(0);
                                let bind_group = self.build_bind_group(
                                    &inner,
                                    &mut view_cache,
                                    &layout,
                                    &bindings,
                                );
                                let mut cpass =
                                    encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                                        label: Some(&pass.name),
                                        timestamp_writes: None,
                                    });
                                cpass.set_pipeline(pipeline);
                                cpass.set_bind_group(0, &bind_group, &[]);
                                cpass.dispatch_workgroups(*x, *y, *z);
                            }
                            Command::BlitMip { src, dst } => {
                                let Some((_, desc)) = inner.textures.get(&src.texture) else {
                                    continue;
                                };
                                let extent = |mip: u32| {
                                    (
                                        (desc.width >> mip).max(1),
                                        (desc.height >> mip).max(1),
                                        (desc.depth >> mip).max(1),
                                    )
                                };
                                let (w, h, d) = extent(dst.base_mip);
                                let layout = self.blit_pipeline.get_bind_group_layout(0);
                                let mut blit_bindings = BindingSet::default();
                                blit_bindings.set(0, Binding::TextureRaw(*src));
                                blit_bindings.set(1, Binding::StorageTexture(*dst));
                                let bind_group = self.build_bind_group(
                                    &inner,
                                    &mut view_cache,
                                    &layout,
                                    &blit_bindings,
                                );
                                let mut cpass =
                                    encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                                        label: Some("mip blit"),
                                        timestamp_writes: None,
                                    });
                                cpass.set_pipeline(&self.blit_pipeline);
                                cpass.set_bind_group(0, &bind_group, &[]);
                                cpass.dispatch_workgroups(w.div_ceil(4), h.div_ceil(4), d.div_ceil(4));
                            }
                            Command::CopyTexelToBuffer { src, origin, buffer } => {
                                let (Some((texture, _)), Some(target)) =
                                    (inner.textures.get(&src.texture), inner.buffers.get(buffer))
                                else {
                                    continue;
                                };
                                encoder.copy_texture_to_buffer(
                                    wgpu::TexelCopyTextureInfo {
                                        texture,
                                        mip_level: src.base_mip,
                                        origin: wgpu::Origin3d {
                                            x: origin[0],
                                            y: origin[1],
                                            z: 0,
                                        },
                                        aspect: wgpu::TextureAspect::All,
                                    },
                                    wgpu::TexelCopyBufferInfo {
                                        buffer: target,
                                        layout: wgpu::TexelCopyBufferLayout {
                                            offset: 0,
                                            bytes_per_row: None,
                                            rows_per_image: None,
                                        },
                                    },
                                    wgpu::Extent3d {
                                        width: 1,
                                        height: 1,
                                        depth_or_array_layers: 1,
                                    },
                                );
                            }
                            Command::ReadBufferU32 { buffer, reply } => {
                                if let Some(b) = inner.buffers.get(buffer) {
                                    readbacks.push((b.clone(), reply.clone()));
                                }
                            }
                            _ => log::warn!(
                                "pass {:?}: command unsupported outside graphics pass",
                                pass.name
                            ),
                        }
                    }
                }
            }
            encoder.pop_debug_group();
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        for (buffer, reply) in readbacks {
            let mapper = buffer.clone();
            buffer.slice(0..4).map_async(wgpu::MapMode::Read, move |result| {
                if result.is_ok() {
                    let value = {
                        let range = mapper.slice(0..4).get_mapped_range();
                        u32::from_le_bytes([range[0], range[1], range[2], range[3]])
                    };
                    mapper.unmap();
                    let _ = reply.send(value);
                }
            });
        }

        let (tx, rx) = flume::bounded(1);
        self.queue.on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        SubmitFence::new(rx)
    }

    fn present(&self, target: TextureId) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.acquired.take() {
            Some((id, surface_texture)) if id == target => {
                inner.external_views.remove(&id);
                drop(inner);
                surface_texture.present();
                Ok(())
            }
            Some((id, surface_texture)) => {
                // Wrong target; put the frame back rather than losing it.
                inner.acquired = Some((id, surface_texture));
                Err(SigilError::SurfaceUnavailable(format!(
                    "present target {target:?} does not match acquired frame {id:?}"
                )))
            }
            None => {
                // Offscreen mode: nothing to hand to a compositor.
                if self.surface.is_none() {
                    Ok(())
                } else {
                    Err(SigilError::SurfaceUnavailable(
                        "present without acquire".to_string(),
                    ))
                }
            }
        }
    }

    fn resize_surface(&self, width: u32, height: u32) -> Result<()> {
        let Some(surface) = &self.surface else {
            return Ok(());
        };
        let mut config_slot = self.surface_config.lock();
        let Some(config) = config_slot.as_mut() else {
            return Err(SigilError::SurfaceUnavailable(
                "surface was never configured".to_string(),
            ));
        };
        config.width = width.max(1);
        config.height = height.max(1);
        surface.configure(&self.device, config);
        Ok(())
    }

    fn tick(&self) {
        let _ = self.device.poll(wgpu::PollType::Poll);
    }

    fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
    }
}
