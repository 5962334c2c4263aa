use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::gpu::{
    ClearColor, CommandDevice, FRAMES_IN_FLIGHT, GpuBackend, ImmediateDevice, ViewFormat,
};
use crate::host::{NativeResource, RendererInfo, RendererKind};

/// Result of one [`FrameClearPipeline::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    NothingPending,
    /// Cleared on the immediate context through a view of `format`.
    Immediate { format: ViewFormat },
    /// Recorded and submitted on the command context in `slot`.
    Submitted { slot: usize },
    /// The clear failed and was logged.
    Failed,
}

/// Per-device command-list state, created on first use and dropped on device reset.
struct CommandFrames<D: CommandDevice> {
    contexts: Vec<D::Context>,
    view: D::View,
    memory: D::Memory,
}

impl<D: CommandDevice> CommandFrames<D> {
    fn create(device: &D) -> Result<Self> {
        let contexts = (0..FRAMES_IN_FLIGHT)
            .map(|i| device.create_context(&format!("uiredirect frame {}", i)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            contexts,
            view: device.create_view()?,
            memory: device.create_memory()?,
        })
    }
}

pub struct FrameClearPipeline<G: GpuBackend> {
    backend: G,
    color: ClearColor,
    fence_timeout: Duration,
    frame_index: u64,
    frames: Option<CommandFrames<G::Commands>>,
}

impl<G: GpuBackend> FrameClearPipeline<G> {
    pub fn new(backend: G, color: ClearColor, fence_timeout: Duration) -> Self {
        Self {
            backend,
            color,
            fence_timeout,
            frame_index: 0,
            frames: None,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn has_command_frames(&self) -> bool {
        self.frames.is_some()
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    /// Advance one frame and blank `target` if given.
    pub fn present(
        &mut self,
        renderer: &RendererInfo,
        target: Option<NativeResource>,
    ) -> ClearOutcome {
        match renderer.kind {
            RendererKind::D3D11 => {
                self.frame_index += 1;
                let Some(resource) = target else {
                    return ClearOutcome::NothingPending;
                };
                match self.clear_immediate(renderer, resource) {
                    Ok(format) => ClearOutcome::Immediate { format },
                    Err(e) => {
                        error!("Failed to clear D3D11 render target: {}", e);
                        ClearOutcome::Failed
                    }
                }
            }
            RendererKind::D3D12 => self.present_commands(renderer, target),
        }
    }

    /// Drop all command-list state. It is recreated on the next present.
    pub fn reset(&mut self, kind: RendererKind) {
        if kind == RendererKind::D3D12 && self.frames.take().is_some() {
            debug!("Released D3D12 frame resources");
        }
    }

    fn clear_immediate(
        &self,
        renderer: &RendererInfo,
        resource: NativeResource,
    ) -> Result<ViewFormat> {
        let device = self.backend.immediate(renderer)?;

        let (view, format) = match device.create_render_target_view(resource, ViewFormat::Native)
        {
            Ok(view) => (view, ViewFormat::Native),
            Err(e) => {
                debug!("Native render target view failed ({}), retrying as BGRA", e);
                let view = device.create_render_target_view(resource, ViewFormat::Bgra8Unorm)?;
                (view, ViewFormat::Bgra8Unorm)
            }
        };

        device.clear_render_target_view(&view, &self.color)?;
        Ok(format)
    }

    fn present_commands(
        &mut self,
        renderer: &RendererInfo,
        target: Option<NativeResource>,
    ) -> ClearOutcome {
        let device = match self.backend.commands(renderer) {
            Ok(device) => device,
            Err(e) => {
                error!("Failed to open D3D12 device: {}", e);
                self.frame_index += 1;
                return if target.is_some() {
                    ClearOutcome::Failed
                } else {
                    ClearOutcome::NothingPending
                };
            }
        };

        if self.frames.is_none() {
            match CommandFrames::create(&device) {
                Ok(frames) => {
                    debug!("Created {} D3D12 command contexts", FRAMES_IN_FLIGHT);
                    self.frames = Some(frames);
                }
                Err(e) => error!("Failed to create D3D12 frame resources: {}", e),
            }
        }

        self.frame_index += 1;

        let outcome = match (target, self.frames.as_mut()) {
            (None, _) => ClearOutcome::NothingPending,
            (Some(_), None) => {
                warn!("Skipping D3D12 clear, frame resources are unavailable");
                ClearOutcome::Failed
            }
            (Some(resource), Some(frames)) => {
                let slot = (self.frame_index % FRAMES_IN_FLIGHT as u64) as usize;
                match record_and_submit(
                    &device,
                    frames,
                    slot,
                    resource,
                    &self.color,
                    self.fence_timeout,
                ) {
                    Ok(()) => ClearOutcome::Submitted { slot },
                    Err(e) => {
                        error!("Failed to clear D3D12 render target: {}", e);
                        ClearOutcome::Failed
                    }
                }
            }
        };

        if let Some(frames) = self.frames.as_mut() {
            if let Err(e) = device.commit(&mut frames.memory) {
                warn!("Failed to commit D3D12 frame memory: {}", e);
            }
        }

        outcome
    }
}

fn record_and_submit<D: CommandDevice>(
    device: &D,
    frames: &mut CommandFrames<D>,
    slot: usize,
    resource: NativeResource,
    color: &ClearColor,
    timeout: Duration,
) -> Result<()> {
    let CommandFrames {
        contexts,
        view,
        memory,
    } = frames;
    let context = &mut contexts[slot];

    if let Err(e) = device.wait(context, timeout) {
        error!("Command context {} fence wait failed: {}", slot, e);
    }

    device.bind_view(view, resource, ViewFormat::Bgra8Unorm, memory)?;
    device.record_clear(context, view, color)?;
    device.execute(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DEFAULT_CLEAR_COLOR, GpuCall, MockBackend};

    fn renderer(kind: RendererKind) -> RendererInfo {
        RendererInfo {
            kind,
            device: std::ptr::null_mut(),
            command_queue: std::ptr::null_mut(),
        }
    }

    fn resource(id: usize) -> NativeResource {
        NativeResource::new(std::ptr::without_provenance_mut(id * 0x1000)).unwrap()
    }

    fn pipeline(backend: &MockBackend) -> FrameClearPipeline<MockBackend> {
        FrameClearPipeline::new(backend.clone(), DEFAULT_CLEAR_COLOR, Duration::from_secs(2))
    }

    #[test]
    fn test_d3d11_clears_with_native_format() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend);

        let outcome = pipeline.present(&renderer(RendererKind::D3D11), Some(resource(1)));
        assert_eq!(
            outcome,
            ClearOutcome::Immediate {
                format: ViewFormat::Native
            }
        );
        assert_eq!(
            backend.calls(),
            vec![
                GpuCall::CreateView(resource(1), ViewFormat::Native),
                GpuCall::Clear([0.0, 0.0, 0.0, 1.0]),
            ]
        );
    }

    #[test]
    fn test_d3d11_falls_back_to_bgra() {
        let backend = MockBackend::new();
        backend.reject_native_views(true);
        let mut pipeline = pipeline(&backend);

        let outcome = pipeline.present(&renderer(RendererKind::D3D11), Some(resource(1)));
        assert_eq!(
            outcome,
            ClearOutcome::Immediate {
                format: ViewFormat::Bgra8Unorm
            }
        );
        assert_eq!(
            backend.calls(),
            vec![
                GpuCall::CreateView(resource(1), ViewFormat::Native),
                GpuCall::CreateView(resource(1), ViewFormat::Bgra8Unorm),
                GpuCall::Clear(DEFAULT_CLEAR_COLOR),
            ]
        );
    }

    #[test]
    fn test_d3d11_skips_when_both_views_fail() {
        let backend = MockBackend::new();
        backend.reject_native_views(true);
        backend.reject_bgra_views(true);
        let mut pipeline = pipeline(&backend);

        let outcome = pipeline.present(&renderer(RendererKind::D3D11), Some(resource(1)));
        assert_eq!(outcome, ClearOutcome::Failed);
        assert!(!backend.calls().contains(&GpuCall::Clear(DEFAULT_CLEAR_COLOR)));
    }

    #[test]
    fn test_frame_counter_advances_without_target() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend);

        for _ in 0..4 {
            assert_eq!(
                pipeline.present(&renderer(RendererKind::D3D11), None),
                ClearOutcome::NothingPending
            );
        }
        assert_eq!(pipeline.frame_index(), 4);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_d3d12_creates_lazily_and_commits_every_frame() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend);
        assert!(!pipeline.has_command_frames());

        pipeline.present(&renderer(RendererKind::D3D12), None);
        pipeline.present(&renderer(RendererKind::D3D12), None);

        assert!(pipeline.has_command_frames());
        assert_eq!(backend.count(|c| matches!(c, GpuCall::CreateContext(_))), 3);
        assert_eq!(backend.count(|c| *c == GpuCall::CreateMemory), 1);
        assert_eq!(backend.count(|c| *c == GpuCall::Commit), 2);
    }

    #[test]
    fn test_d3d12_ring_rotates_slots() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend);
        let d3d12 = renderer(RendererKind::D3D12);

        let slots: Vec<_> = (0..4)
            .map(|i| pipeline.present(&d3d12, Some(resource(i + 1))))
            .collect();

        // The counter is advanced before the slot is picked.
        assert_eq!(
            slots,
            vec![
                ClearOutcome::Submitted { slot: 1 },
                ClearOutcome::Submitted { slot: 2 },
                ClearOutcome::Submitted { slot: 0 },
                ClearOutcome::Submitted { slot: 1 },
            ]
        );

        let waits: Vec<_> = backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                GpuCall::Wait(context) => Some(context),
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![1, 2, 0, 1]);
    }

    #[test]
    fn test_d3d12_records_clear_in_order() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend);

        pipeline.present(&renderer(RendererKind::D3D12), Some(resource(7)));

        let calls = backend.calls();
        let tail = &calls[calls.len() - 5..];
        assert_eq!(
            tail,
            &[
                GpuCall::Wait(1),
                GpuCall::BindView(resource(7), ViewFormat::Bgra8Unorm),
                GpuCall::RecordClear(1, DEFAULT_CLEAR_COLOR),
                GpuCall::Execute(1),
                GpuCall::Commit,
            ]
        );
    }

    #[test]
    fn test_fence_timeout_still_submits() {
        let backend = MockBackend::new();
        backend.time_out_fences(true);
        let mut pipeline = pipeline(&backend);

        let outcome = pipeline.present(&renderer(RendererKind::D3D12), Some(resource(1)));
        assert_eq!(outcome, ClearOutcome::Submitted { slot: 1 });
        assert_eq!(backend.count(|c| matches!(c, GpuCall::Execute(_))), 1);
    }

    #[test]
    fn test_reset_recreates_on_next_present() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend);
        let d3d12 = renderer(RendererKind::D3D12);

        pipeline.present(&d3d12, None);
        pipeline.reset(RendererKind::D3D12);
        assert!(!pipeline.has_command_frames());

        pipeline.present(&d3d12, Some(resource(1)));
        assert!(pipeline.has_command_frames());
        assert_eq!(backend.count(|c| matches!(c, GpuCall::CreateContext(_))), 6);
        assert_eq!(backend.count(|c| *c == GpuCall::CreateMemory), 2);
    }

    #[test]
    fn test_reset_ignores_d3d11() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend);
        pipeline.present(&renderer(RendererKind::D3D12), None);
        pipeline.reset(RendererKind::D3D11);
        assert!(pipeline.has_command_frames());
    }

    #[test]
    fn test_creation_failure_is_retried() {
        let backend = MockBackend::new();
        backend.fail_creation(true);
        let mut pipeline = pipeline(&backend);
        let d3d12 = renderer(RendererKind::D3D12);

        assert_eq!(pipeline.present(&d3d12, Some(resource(1))), ClearOutcome::Failed);
        assert!(!pipeline.has_command_frames());
        assert_eq!(backend.count(|c| *c == GpuCall::Commit), 0);

        backend.fail_creation(false);
        assert_eq!(
            pipeline.present(&d3d12, Some(resource(1))),
            ClearOutcome::Submitted { slot: 2 }
        );
    }
}
