//! Interface to the VR host framework that loads the plugin and calls its hooks.

use std::ffi::c_void;
use std::ptr::NonNull;

use strum::Display;

use crate::error::Result;
use crate::redirect::{PooledRenderTarget, TextureHandle};
use crate::scan::ModuleImage;

#[cfg(test)]
mod mock;

#[cfg(test)]
pub use mock::{MockCvar, MockHost};

pub const UI_FIXED_WIDTH_CVAR: &str = "r.InGameUI.FixedWidth";
pub const UI_FIXED_HEIGHT_CVAR: &str = "r.InGameUI.FixedHeight";
pub const UI_RENDER_TARGET_NAME: &str = "InGameUIRenderTarget";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RendererKind {
    #[strum(serialize = "D3D11")]
    D3D11,
    #[strum(serialize = "D3D12")]
    D3D12,
}

/// Renderer the host attached to. Pointers are borrowed from the host.
#[derive(Debug, Clone, Copy)]
pub struct RendererInfo {
    pub kind: RendererKind,
    pub device: *mut c_void,
    pub command_queue: *mut c_void,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HmdDimensions {
    pub hmd_width: u32,
    pub hmd_height: u32,
    pub ui_width: u32,
    pub ui_height: u32,
}

/// Native GPU resource (`ID3D11Texture2D*` / `ID3D12Resource*`) behind an engine texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct NativeResource(NonNull<c_void>);

// SAFETY: the pointer is only handed to the graphics API, which is free-threaded.
unsafe impl Send for NativeResource {}

impl NativeResource {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Opaque handle passed through a host callback. Never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostHandle(pub *mut c_void);

impl HostHandle {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }
}

pub trait ConsoleVariable: Send {
    fn get_int(&self) -> i32;
    fn set_int(&self, value: i32);
}

/// Queries the plugin makes against the host.
///
/// Names are given as Rust strings; a binding converts them to the wide strings
/// the engine expects.
pub trait Host: Send + Sync {
    type Cvar: ConsoleVariable;

    fn renderer(&self) -> RendererInfo;

    fn is_hmd_active(&self) -> bool;

    fn hmd_dimensions(&self) -> HmdDimensions;

    /// `None` while the console manager is not up yet or the variable is unknown.
    fn find_console_variable(&self, name: &str) -> Option<Self::Cvar>;

    fn activate_render_target_pool_hook(&self);

    /// The pooled render target registered under `name` this frame.
    ///
    /// The pointee stays valid and is not touched by the engine for the
    /// duration of the callback that asked for it.
    fn pooled_render_target(&self, name: &str) -> Option<NonNull<PooledRenderTarget>>;

    /// The VR UI surface the host composites, once it exists.
    fn ui_render_surface(&self) -> Option<TextureHandle>;

    fn native_resource(&self, texture: TextureHandle) -> Option<NativeResource>;

    fn executable_image(&self) -> Result<ModuleImage<'static>>;
}

/// Callbacks the host invokes on the plugin.
pub trait PluginHooks {
    fn on_initialize(&self);

    fn on_present(&self);

    fn on_pre_viewport_client_draw(
        &self,
        viewport_client: HostHandle,
        viewport: HostHandle,
        canvas: HostHandle,
    );

    fn on_pre_slate_draw_window(&self, renderer: HostHandle, viewport_info: HostHandle);

    fn on_device_reset(&self);
}
