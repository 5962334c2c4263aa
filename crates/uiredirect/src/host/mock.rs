//! Scriptable host used by the plugin tests.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::host::{
    ConsoleVariable, HmdDimensions, Host, NativeResource, RendererInfo, RendererKind,
    UI_FIXED_HEIGHT_CVAR, UI_FIXED_WIDTH_CVAR, UI_RENDER_TARGET_NAME,
};
use crate::redirect::{PooledRenderTarget, PooledRenderTargetData, TextureHandle};
use crate::scan::ModuleImage;

#[derive(Debug, Clone, Default)]
pub struct MockCvar {
    value: Arc<AtomicI32>,
    writes: Arc<AtomicUsize>,
}

impl MockCvar {
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ConsoleVariable for MockCvar {
    fn get_int(&self) -> i32 {
        self.value()
    }

    fn set_int(&self, value: i32) {
        self.value.store(value, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

struct TargetSlot(Box<PooledRenderTarget>);

// SAFETY: only accessed under the mock's mutex or through the pointer handed out
// for the duration of a single hook call.
unsafe impl Send for TargetSlot {}

pub struct MockHost {
    kind: RendererKind,
    hmd_active: AtomicBool,
    dimensions: Mutex<HmdDimensions>,
    console_ready: AtomicBool,
    cvars: HashMap<&'static str, MockCvar>,
    target: Mutex<Option<TargetSlot>>,
    pool_activations: AtomicUsize,
    ui_surface: Mutex<Option<TextureHandle>>,
    native: Mutex<HashMap<TextureHandle, NativeResource>>,
    image: Option<LeakedImage>,
}

/// A 16-byte aligned, leaked copy of an image buffer.
#[derive(Clone, Copy)]
struct LeakedImage {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer is leaked and never freed; writes only happen through the
// pointers the plugin derives from it, as they would in a game process.
unsafe impl Send for LeakedImage {}
// SAFETY: see above.
unsafe impl Sync for LeakedImage {}

impl MockHost {
    pub fn new(kind: RendererKind) -> Self {
        let cvars = [UI_FIXED_WIDTH_CVAR, UI_FIXED_HEIGHT_CVAR]
            .into_iter()
            .map(|name| (name, MockCvar::default()))
            .collect();

        Self {
            kind,
            hmd_active: AtomicBool::new(false),
            dimensions: Mutex::new(HmdDimensions::default()),
            console_ready: AtomicBool::new(true),
            cvars,
            target: Mutex::new(None),
            pool_activations: AtomicUsize::new(0),
            ui_surface: Mutex::new(None),
            native: Mutex::new(HashMap::new()),
            image: None,
        }
    }

    /// Serve `bytes` as the executable image, mapped at a 16-byte aligned address.
    /// The buffer is leaked for `'static`.
    pub fn with_image(mut self, bytes: &[u8]) -> Self {
        let buffer: &'static mut [u8] = Box::leak(vec![0u8; bytes.len() + 16].into_boxed_slice());
        let skew = buffer.as_ptr().align_offset(16);
        let image = &mut buffer[skew..skew + bytes.len()];
        image.copy_from_slice(bytes);
        self.image = Some(LeakedImage {
            base: NonNull::from(image).cast(),
            len: bytes.len(),
        });
        self
    }

    pub fn image_base(&self) -> u64 {
        self.image.map_or(0, |image| image.base.as_ptr() as u64)
    }

    /// Read back an `i32` the plugin may have written into the image.
    pub fn read_image_i32(&self, offset: u64) -> i32 {
        let image = self.image.expect("mock host has an image");
        assert!(offset as usize + 4 <= image.len);
        // SAFETY: bounds checked above; the buffer is leaked.
        unsafe {
            image
                .base
                .as_ptr()
                .add(offset as usize)
                .cast::<i32>()
                .read_unaligned()
        }
    }

    pub fn set_hmd_active(&self, active: bool) {
        self.hmd_active.store(active, Ordering::SeqCst);
    }

    pub fn set_dimensions(&self, dimensions: HmdDimensions) {
        *self.dimensions.lock() = dimensions;
    }

    pub fn set_console_ready(&self, ready: bool) {
        self.console_ready.store(ready, Ordering::SeqCst);
    }

    pub fn cvar(&self, name: &str) -> MockCvar {
        self.cvars[name].clone()
    }

    pub fn set_render_target(&self, texture: Option<TextureHandle>) {
        *self.target.lock() = Some(TargetSlot(Box::new(PooledRenderTarget {
            vtable: std::ptr::null(),
            data: PooledRenderTargetData::new(texture),
        })));
    }

    pub fn remove_render_target(&self) {
        *self.target.lock() = None;
    }

    pub fn render_target_texture(&self) -> Option<TextureHandle> {
        self.target.lock().as_ref().and_then(|slot| slot.0.data.texture)
    }

    pub fn pool_activations(&self) -> usize {
        self.pool_activations.load(Ordering::SeqCst)
    }

    pub fn set_ui_surface(&self, surface: Option<TextureHandle>) {
        *self.ui_surface.lock() = surface;
    }

    pub fn set_native_resource(&self, texture: TextureHandle, resource: Option<NativeResource>) {
        let mut native = self.native.lock();
        match resource {
            Some(resource) => native.insert(texture, resource),
            None => native.remove(&texture),
        };
    }
}

impl Host for MockHost {
    type Cvar = MockCvar;

    fn renderer(&self) -> RendererInfo {
        RendererInfo {
            kind: self.kind,
            device: std::ptr::null_mut(),
            command_queue: std::ptr::null_mut(),
        }
    }

    fn is_hmd_active(&self) -> bool {
        self.hmd_active.load(Ordering::SeqCst)
    }

    fn hmd_dimensions(&self) -> HmdDimensions {
        *self.dimensions.lock()
    }

    fn find_console_variable(&self, name: &str) -> Option<MockCvar> {
        if !self.console_ready.load(Ordering::SeqCst) {
            return None;
        }
        self.cvars.get(name).cloned()
    }

    fn activate_render_target_pool_hook(&self) {
        self.pool_activations.fetch_add(1, Ordering::SeqCst);
    }

    fn pooled_render_target(&self, name: &str) -> Option<NonNull<PooledRenderTarget>> {
        if name != UI_RENDER_TARGET_NAME {
            return None;
        }
        self.target
            .lock()
            .as_mut()
            .map(|slot| NonNull::from(&mut *slot.0))
    }

    fn ui_render_surface(&self) -> Option<TextureHandle> {
        *self.ui_surface.lock()
    }

    fn native_resource(&self, texture: TextureHandle) -> Option<NativeResource> {
        self.native.lock().get(&texture).copied()
    }

    fn executable_image(&self) -> Result<ModuleImage<'static>> {
        let image = self
            .image
            .ok_or(Error::Unsupported("mock host has no executable image"))?;
        // SAFETY: the buffer is leaked and stays mapped for the process lifetime.
        Ok(unsafe { ModuleImage::from_raw(image.base.as_ptr(), image.len) })
    }
}
