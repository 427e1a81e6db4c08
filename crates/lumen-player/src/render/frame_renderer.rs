use std::sync::Arc;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BufferBindingType, ColorTargetState,
    FragmentState, PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveState,
    RenderPipeline, SamplerBindingType, ShaderStages, SurfaceError, TextureSampleType,
    TextureViewDimension, VertexState,
};
use winit::window::Window;

use super::{FramePresenter, PresentError};
use crate::gpu::GpuContext;
use crate::gpu::fullscreen_quad::blit_shader_source;
use crate::media::Frame;

/// Scale and offset of the frame rectangle in viewport UV space.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct LetterboxUniforms {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

/// Fit `media` inside `viewport` keeping its aspect ratio, centred.
pub fn compute_letterbox(media: (u32, u32), viewport: (u32, u32)) -> LetterboxUniforms {
    let media_aspect = media.0 as f32 / media.1.max(1) as f32;
    let viewport_aspect = viewport.0 as f32 / viewport.1.max(1) as f32;

    let (scale_x, scale_y) = if media_aspect > viewport_aspect {
        // Wider: bars top and bottom
        (1.0, viewport_aspect / media_aspect)
    } else {
        // Taller: bars left and right
        (media_aspect / viewport_aspect, 1.0)
    };

    LetterboxUniforms {
        scale: [scale_x, scale_y],
        offset: [(1.0 - scale_x) * 0.5, (1.0 - scale_y) * 0.5],
    }
}

/// Texture that holds the current frame plus the bind group that samples it.
/// Re-created whenever the frame size changes.
struct FrameTexture {
    texture: wgpu::Texture,
    bind_group: BindGroup,
    width: u32,
    height: u32,
}

/// Blits RGBA frames to the window surface, letterboxed.
pub struct FrameRenderer {
    frame: Option<FrameTexture>,
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    /// Declared last so GPU resources drop before the device and surface.
    gpu: GpuContext,
}

impl FrameRenderer {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let gpu = GpuContext::new(window)?;
        let device = &gpu.device;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("letterbox-uniforms"),
            size: std::mem::size_of::<LetterboxUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // texture(0), sampler(1), letterbox(2)
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("frame-blit-bgl"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(
                            std::mem::size_of::<LetterboxUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("frame-blit"),
            source: wgpu::ShaderSource::Wgsl(blit_shader_source().into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("frame-blit-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("frame-blit-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader_module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &shader_module,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format: gpu.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            gpu,
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            frame: None,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
        self.write_letterbox();
    }

    /// Reconfigure at the current size after `Lost`/`Outdated`.
    pub fn recover(&mut self) {
        self.gpu.reconfigure();
    }

    fn write_letterbox(&self) {
        if let Some(frame) = &self.frame {
            let uniforms = compute_letterbox((frame.width, frame.height), self.gpu.size());
            self.gpu
                .queue
                .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        }
    }

    fn create_frame_texture(&self, width: u32, height: u32) -> FrameTexture {
        let device = &self.gpu.device;
        // sRGB so sampling linearises and the sRGB surface re-encodes
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("frame-blit-bg"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });
        log::debug!("Frame texture created: {width}x{height}");
        FrameTexture {
            texture,
            bind_group,
            width,
            height,
        }
    }
}

impl FramePresenter for FrameRenderer {
    fn upload(&mut self, frame: &Frame) -> Result<(), PresentError> {
        if !frame.is_rgba() {
            return Err(PresentError::Other(format!(
                "renderer needs packed RGBA, got {:?} with stride {}",
                frame.format, frame.stride
            )));
        }

        let resized = self
            .frame
            .as_ref()
            .is_none_or(|t| (t.width, t.height) != frame.dimensions());
        if resized {
            self.frame = Some(self.create_frame_texture(frame.width, frame.height));
            self.write_letterbox();
        }

        let Some(target) = &self.frame else {
            return Ok(());
        };
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn draw(&mut self) -> Result<(), PresentError> {
        let output = self.gpu.surface.get_current_texture().map_err(|e| match e {
            SurfaceError::Lost => PresentError::SurfaceLost,
            SurfaceError::Outdated => PresentError::Outdated,
            SurfaceError::OutOfMemory => PresentError::OutOfMemory,
            other => PresentError::Other(other.to_string()),
        })?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-blit"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame-blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            // Black until the first frame arrives
            if let Some(frame) = &self.frame {
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &frame.bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_aspect_fills_viewport() {
        let u = compute_letterbox((1920, 1080), (1280, 720));
        assert_eq!(u.scale, [1.0, 1.0]);
        assert_eq!(u.offset, [0.0, 0.0]);
    }

    #[test]
    fn wide_media_is_letterboxed() {
        // 2:1 into 1:1
        let u = compute_letterbox((200, 100), (100, 100));
        assert_eq!(u.scale, [1.0, 0.5]);
        assert_eq!(u.offset, [0.0, 0.25]);
    }

    #[test]
    fn tall_media_is_pillarboxed() {
        let u = compute_letterbox((100, 200), (400, 200));
        assert_eq!(u.scale, [0.25, 1.0]);
        assert_eq!(u.offset, [0.375, 0.0]);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let u = compute_letterbox((100, 0), (0, 0));
        assert!(u.scale.iter().all(|s| s.is_finite()));
    }
}
