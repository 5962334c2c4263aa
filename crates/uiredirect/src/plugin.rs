//! The plugin context: owns every component and implements the host hooks.
//!
//! One `Plugin` is created when the module loads and torn down with
//! [`Plugin::shutdown`] (or dropped). Signature scanning and patching run once on
//! a worker thread started by `on_initialize`; the per-frame hooks pick up its
//! results as soon as they are ready.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error, info, warn};

use crate::config::PluginConfig;
use crate::error::Result;
use crate::gpu::{ClearOutcome, FrameClearPipeline, GpuBackend};
use crate::host::{Host, HostHandle, PluginHooks, UI_RENDER_TARGET_NAME};
use crate::logging;
use crate::memory::{CodeWriter, Patch};
use crate::redirect::{Redirect, Redirector};
use crate::resolution::{ResolutionSync, SystemResolution};
use crate::scan::{ModuleImage, SignatureTable, builtin_signatures, load_signatures};
use crate::sched::InitWorker;

const INIT_THREAD_NAME: &str = "uiredirect-init";
const SYSTEM_RESOLUTION_ALIGN: u64 = std::mem::align_of::<i32>() as u64;

/// What the init worker found.
pub struct InitOutput<W: CodeWriter> {
    pub system_resolution: Option<u64>,
    pub lighting_patch: Option<Patch<W>>,
}

#[derive(Debug, Clone, Copy)]
struct InitOptions {
    resolution_sync: bool,
    lighting_patch: bool,
}

pub struct Plugin<H: Host, G: GpuBackend, W: CodeWriter + 'static> {
    host: H,
    config: PluginConfig,
    signatures: SignatureTable,
    gpu: ReentrantMutex<RefCell<FrameClearPipeline<G>>>,
    redirector: Mutex<Redirector>,
    resolution: Mutex<ResolutionSync<H::Cvar>>,
    writer: Mutex<Option<W>>,
    init: Mutex<Option<InitWorker<InitOutput<W>>>>,
    lighting_patch: Mutex<Option<Patch<W>>>,
}

impl<H: Host, G: GpuBackend, W: CodeWriter + 'static> Plugin<H, G, W> {
    pub fn new(host: H, backend: G, writer: W, config: PluginConfig) -> Self {
        let signatures = match &config.signature_table {
            Some(path) => load_signatures(path).unwrap_or_else(|e| {
                error!(
                    "Failed to load signature table {}: {}, using built-in table",
                    path.display(),
                    e
                );
                builtin_signatures()
            }),
            None => builtin_signatures(),
        };
        info!("Using signature table '{}'", signatures.version);

        let pipeline =
            FrameClearPipeline::new(backend, config.clear_color, config.fence_timeout());

        Self {
            host,
            signatures,
            gpu: ReentrantMutex::new(RefCell::new(pipeline)),
            redirector: Mutex::new(Redirector::new()),
            resolution: Mutex::new(ResolutionSync::new()),
            writer: Mutex::new(Some(writer)),
            init: Mutex::new(None),
            lighting_patch: Mutex::new(None),
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    pub fn system_resolution(&self) -> Option<SystemResolution> {
        self.resolution.lock().system_resolution()
    }

    pub fn is_lighting_patch_installed(&self) -> bool {
        self.lighting_patch
            .lock()
            .as_ref()
            .is_some_and(Patch::is_installed)
    }

    /// Start the one-time scan and patch on the init worker.
    pub fn initialize(&self) -> Result<()> {
        let mut slot = self.writer.lock();
        if slot.is_none() {
            warn!("Plugin is already initialized");
            return Ok(());
        }

        let image = self.host.executable_image()?;
        debug!("Scanning {:?}", image);
        let Some(writer) = slot.take() else {
            return Ok(());
        };

        let signatures = self.signatures.clone();
        let options = InitOptions {
            resolution_sync: self.config.resolution_sync,
            lighting_patch: self.config.lighting_patch,
        };
        let worker = InitWorker::spawn(INIT_THREAD_NAME, move || {
            run_initialization(&image, &signatures, writer, options)
        })?;

        *self.init.lock() = Some(worker);
        Ok(())
    }

    /// Block up to `timeout` for the init worker and apply its results.
    pub fn finish_initialization(&self, timeout: Duration) -> Result<()> {
        let Some(worker) = self.init.lock().take() else {
            return Ok(());
        };
        if let Some(output) = worker.join(timeout)? {
            self.apply(output);
        }
        Ok(())
    }

    /// Collect finished init results without blocking.
    fn poll_initialization(&self) {
        let mut init = self.init.lock();
        let Some(worker) = init.as_mut() else {
            return;
        };
        let Some(result) = worker.try_take() else {
            return;
        };
        init.take();
        drop(init);

        match result {
            Ok(output) => self.apply(output),
            Err(e) => error!("Initialization failed: {}", e),
        }
    }

    fn apply(&self, output: InitOutput<W>) {
        if let Some(address) = output.system_resolution {
            // SAFETY: the address was checked to lie inside the executable image,
            // which stays mapped for the lifetime of the process.
            let resolution = unsafe { SystemResolution::from_raw(address) };
            self.resolution.lock().set_system_resolution(resolution);
        }
        if let Some(patch) = output.lighting_patch {
            *self.lighting_patch.lock() = Some(patch);
        }
    }

    /// Wait for the init worker and revert the lighting patch.
    pub fn shutdown(&self) {
        if let Err(e) = self.finish_initialization(self.config.init_timeout()) {
            error!("Init worker did not shut down cleanly: {}", e);
        }

        if let Some(mut patch) = self.lighting_patch.lock().take() {
            match patch.revert() {
                Ok(()) => info!("Reverted lighting patch at {:#x}", patch.address()),
                Err(e) => error!("Failed to revert lighting patch: {}", e),
            }
        }
    }

    fn guard(&self, hook: &str, f: impl FnOnce()) {
        if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
            error!("Panic in {} hook", hook);
        }
    }

    fn present(&self) -> ClearOutcome {
        let gpu = self.gpu.lock();
        let Ok(mut pipeline) = gpu.try_borrow_mut() else {
            warn!("Present re-entered on the render thread, skipping");
            return ClearOutcome::NothingPending;
        };

        let renderer = self.host.renderer();
        let target = {
            let mut redirector = self.redirector.lock();
            let resource = redirector
                .pending_clear()
                .and_then(|texture| self.host.native_resource(texture));
            if resource.is_some() {
                redirector.take_pending_clear();
            }
            resource
        };

        pipeline.present(&renderer, target)
    }

    fn redirect_ui(&self) -> Option<Redirect> {
        if !self.resolution.lock().resolve_cvars(&self.host) {
            return None;
        }

        self.host.activate_render_target_pool_hook();

        let Some(target) = self.host.pooled_render_target(UI_RENDER_TARGET_NAME) else {
            self.redirector.lock().forget_engine_texture();
            return None;
        };

        let hmd_active = self.host.is_hmd_active();
        let surface = self.host.ui_render_surface();
        // SAFETY: the host keeps the pooled target alive and untouched for the
        // duration of this callback.
        let data = unsafe { &mut (*target.as_ptr()).data };
        let outcome = self.redirector.lock().update(data, hmd_active, surface);

        match outcome {
            Redirect::Substituted {
                reclaimed: Some(texture),
            } => info!("In-game UI redirected to the VR surface, reclaimed {:?}", texture),
            Redirect::Restored(texture) => info!("In-game UI restored to {:?}", texture),
            Redirect::Idle | Redirect::Substituted { reclaimed: None } => {}
        }
        Some(outcome)
    }

    fn sync_resolution(&self) {
        self.poll_initialization();

        let mut resolution = self.resolution.lock();
        if !resolution.resolve_cvars(&self.host) {
            return;
        }
        resolution.sync(self.host.is_hmd_active(), self.host.hmd_dimensions());
    }

    fn reset_device(&self) {
        let gpu = self.gpu.lock();
        match gpu.try_borrow_mut() {
            Ok(mut pipeline) => pipeline.reset(self.host.renderer().kind),
            Err(_) => warn!("Device reset during present, skipping"),
        };
    }
}

impl<H: Host, G: GpuBackend, W: CodeWriter + 'static> PluginHooks for Plugin<H, G, W> {
    fn on_initialize(&self) {
        self.guard("initialize", || {
            if let Err(e) = self.initialize() {
                error!("Failed to start initialization: {}", e);
            }
        });
    }

    fn on_present(&self) {
        self.guard("present", || {
            self.present();
        });
    }

    fn on_pre_viewport_client_draw(
        &self,
        _viewport_client: HostHandle,
        _viewport: HostHandle,
        _canvas: HostHandle,
    ) {
        self.guard("pre_viewport_client_draw", || self.sync_resolution());
    }

    fn on_pre_slate_draw_window(&self, _renderer: HostHandle, _viewport_info: HostHandle) {
        self.guard("pre_slate_draw_window", || {
            self.redirect_ui();
        });
    }

    fn on_device_reset(&self) {
        self.guard("device_reset", || self.reset_device());
    }
}

impl<H: Host, G: GpuBackend, W: CodeWriter + 'static> Drop for Plugin<H, G, W> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_initialization<W: CodeWriter>(
    image: &ModuleImage<'_>,
    signatures: &SignatureTable,
    writer: W,
    options: InitOptions,
) -> InitOutput<W> {
    let system_resolution = if options.resolution_sync {
        find_system_resolution(image, signatures)
    } else {
        debug!("Resolution sync disabled");
        None
    };

    let lighting_patch = if options.lighting_patch {
        install_lighting_patch(image, signatures, writer)
    } else {
        debug!("Lighting patch disabled");
        None
    };

    InitOutput {
        system_resolution,
        lighting_patch,
    }
}

fn find_system_resolution(image: &ModuleImage<'_>, signatures: &SignatureTable) -> Option<u64> {
    match signatures.system_resolution.resolve(image) {
        Ok(Some(address)) if address % SYSTEM_RESOLUTION_ALIGN != 0 => {
            error!("GSystemResolution candidate {:#x} is misaligned", address);
            None
        }
        Ok(Some(address)) if image.offset_of(address, 8).is_some() => {
            info!("Found GSystemResolution at {:#x}", address);
            Some(address)
        }
        Ok(Some(address)) => {
            error!("GSystemResolution candidate {:#x} is outside the image", address);
            None
        }
        Ok(None) => {
            error!("Failed to find GSystemResolution");
            None
        }
        Err(e) => {
            error!("Invalid GSystemResolution signature: {}", e);
            None
        }
    }
}

fn install_lighting_patch<W: CodeWriter>(
    image: &ModuleImage<'_>,
    signatures: &SignatureTable,
    writer: W,
) -> Option<Patch<W>> {
    let signature = &signatures.lighting_patch;
    let site = match signature.locate(image) {
        Ok(site) => site,
        Err(e) => {
            error!("Failed to locate lighting patch: {}", e);
            return None;
        }
    };

    match Patch::or_byte(writer, site.address, signature.or_mask) {
        Ok(patch) => {
            info!(
                "Installed lighting patch at {:#x} (function {:#x})",
                site.address, site.function
            );
            Some(patch)
        }
        Err(e) => {
            error!("Failed to install lighting patch at {:#x}: {}", site.address, e);
            None
        }
    }
}

/// Load the configuration at `path` and install the log subscriber it describes.
///
/// Problems with the file are logged once logging is up, and the defaults are used.
pub fn bootstrap(path: &Path) -> PluginConfig {
    let loaded = PluginConfig::load(path);
    let config = loaded.as_ref().cloned().unwrap_or_default();

    if let Err(e) = logging::init(&config.logging()) {
        eprintln!("uiredirect: {}", e);
    }
    if let Err(e) = loaded {
        warn!("Failed to load config {}: {}, using defaults", path.display(), e);
    }
    config
}

#[cfg(target_os = "windows")]
pub type NativePlugin<H> = Plugin<H, crate::gpu::D3dBackend, crate::memory::ProcessMemory>;

#[cfg(target_os = "windows")]
impl<H: Host> Plugin<H, crate::gpu::D3dBackend, crate::memory::ProcessMemory> {
    /// Build the plugin against the live process and the host's Direct3D device.
    ///
    /// # Safety
    ///
    /// Must be called inside the game process whose image `host` reports; the
    /// lighting patch is written straight into its code.
    pub unsafe fn native(host: H, config_path: &Path) -> Self {
        let config = bootstrap(config_path);
        // SAFETY: patch addresses come from scanning the live executable image.
        let writer = unsafe { crate::memory::ProcessMemory::new() };
        Self::new(host, crate::gpu::D3dBackend, writer, config)
    }
}
