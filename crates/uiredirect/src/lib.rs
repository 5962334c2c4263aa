//! # uiredirect
//!
//! In-process VR plugin that moves an engine's in-game UI onto the VR
//! runtime's UI layer.
//!
//! This crate provides:
//! - Pattern, string-reference and disassembly scanning of the game image
//! - Reversible code patches
//! - Redirection of the engine's pooled UI render target
//! - Clearing of reclaimed UI textures on D3D11 and D3D12
//! - Synchronization of the engine's UI and system resolution with the headset
//!
//! The host framework is reached only through [`Host`]; it drives the plugin
//! through [`PluginHooks`].

pub mod config;
pub mod error;
pub mod gpu;
pub mod host;
pub mod logging;
pub mod memory;
pub mod plugin;
pub mod redirect;
pub mod resolution;
pub mod scan;
pub mod sched;

pub use config::{CONFIG_FILE_NAME, PluginConfig, PluginConfigBuilder};
pub use error::{Error, Result};
pub use gpu::{ClearColor, ClearOutcome, FrameClearPipeline, GpuBackend, ViewFormat};
#[cfg(target_os = "windows")]
pub use gpu::D3dBackend;
pub use host::{
    ConsoleVariable, HmdDimensions, Host, HostHandle, NativeResource, PluginHooks, RendererInfo,
    RendererKind,
};
pub use logging::LoggingConfig;
pub use memory::{CodeWriter, Patch, ProcessMemory};
#[cfg(target_os = "windows")]
pub use plugin::NativePlugin;
pub use plugin::{Plugin, bootstrap};
pub use redirect::{Redirect, Redirector, TextureHandle};
pub use resolution::{ResolutionSync, SystemResolution};
pub use scan::{
    CodeSignature, FunctionTable, LightingPatchSignature, LightingPatchSite, ModuleImage, Pattern,
    SignatureTable, builtin_signatures, load_signatures, save_signatures,
};
pub use sched::InitWorker;
