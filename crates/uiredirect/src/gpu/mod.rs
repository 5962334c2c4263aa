//! Blanking of reclaimed engine textures on the render thread.

use std::time::Duration;

use strum::Display;

use crate::error::Result;
use crate::host::{NativeResource, RendererInfo};

mod clear;
#[cfg(target_os = "windows")]
mod d3d11;
#[cfg(target_os = "windows")]
mod d3d12;
#[cfg(test)]
mod mock;

pub use clear::*;
#[cfg(target_os = "windows")]
pub use d3d11::D3d11Device;
#[cfg(target_os = "windows")]
pub use d3d12::{D3d12Commands, D3d12Context, D3d12Memory, D3d12View};
#[cfg(test)]
pub use mock::{GpuCall, MockBackend};

/// Command contexts kept in flight, one per frame slot.
pub const FRAMES_IN_FLIGHT: usize = 3;

pub type ClearColor = [f32; 4];

/// Opaque black; alpha stays at 1.0.
pub const DEFAULT_CLEAR_COLOR: ClearColor = [0.0, 0.0, 0.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ViewFormat {
    /// The resource's own format.
    #[strum(serialize = "native")]
    Native,
    #[strum(serialize = "B8G8R8A8_UNORM")]
    Bgra8Unorm,
}

/// A device with an immediate context (D3D11).
pub trait ImmediateDevice {
    type View;

    fn create_render_target_view(
        &self,
        resource: NativeResource,
        format: ViewFormat,
    ) -> Result<Self::View>;

    fn clear_render_target_view(&self, view: &Self::View, color: &ClearColor) -> Result<()>;
}

/// A device driven through recorded command lists (D3D12).
pub trait CommandDevice {
    type Context: Send;
    type View: Send;
    type Memory: Send;

    fn create_context(&self, name: &str) -> Result<Self::Context>;

    /// Block until the GPU finished the context's last submission, at most `timeout`.
    fn wait(&self, context: &mut Self::Context, timeout: Duration) -> Result<()>;

    fn create_view(&self) -> Result<Self::View>;

    fn create_memory(&self) -> Result<Self::Memory>;

    /// Point `view` at `resource`. The previously bound resource is retired into `memory`.
    fn bind_view(
        &self,
        view: &mut Self::View,
        resource: NativeResource,
        format: ViewFormat,
        memory: &mut Self::Memory,
    ) -> Result<()>;

    fn record_clear(
        &self,
        context: &mut Self::Context,
        view: &Self::View,
        color: &ClearColor,
    ) -> Result<()>;

    fn execute(&self, context: &mut Self::Context) -> Result<()>;

    /// Mark the end of a frame and release retired resources the GPU is done with.
    fn commit(&self, memory: &mut Self::Memory) -> Result<()>;
}

/// Builds device wrappers from the renderer the host reports.
pub trait GpuBackend: Send {
    type Immediate: ImmediateDevice;
    type Commands: CommandDevice;

    fn immediate(&self, renderer: &RendererInfo) -> Result<Self::Immediate>;

    fn commands(&self, renderer: &RendererInfo) -> Result<Self::Commands>;
}

/// Direct3D back-end over the device and queue the host hands out.
#[cfg(target_os = "windows")]
#[derive(Debug, Default, Clone, Copy)]
pub struct D3dBackend;

#[cfg(target_os = "windows")]
impl GpuBackend for D3dBackend {
    type Immediate = D3d11Device;
    type Commands = D3d12Commands;

    fn immediate(&self, renderer: &RendererInfo) -> Result<D3d11Device> {
        D3d11Device::from_renderer(renderer)
    }

    fn commands(&self, renderer: &RendererInfo) -> Result<D3d12Commands> {
        D3d12Commands::from_renderer(renderer)
    }
}
