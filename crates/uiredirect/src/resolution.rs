//! Keeps the engine's UI size and system resolution in step with the headset.

use std::ptr::NonNull;

use tracing::{debug, info};

use crate::host::{ConsoleVariable, HmdDimensions, Host, UI_FIXED_HEIGHT_CVAR, UI_FIXED_WIDTH_CVAR};

/// The engine's `(width, height)` system resolution pair in static memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemResolution(NonNull<i32>);

// SAFETY: the pair lives in the game image for the process lifetime and is only
// written from the game thread.
unsafe impl Send for SystemResolution {}
// SAFETY: see above.
unsafe impl Sync for SystemResolution {}

impl SystemResolution {
    /// # Safety
    ///
    /// `address` must point at two writable `i32` that stay mapped for the
    /// lifetime of the returned value. Null and misaligned addresses give `None`.
    pub unsafe fn from_raw(address: u64) -> Option<Self> {
        if address % std::mem::align_of::<i32>() as u64 != 0 {
            return None;
        }
        NonNull::new(address as *mut i32).map(Self)
    }

    pub fn address(&self) -> u64 {
        self.0.as_ptr() as u64
    }

    pub fn write(&self, width: i32, height: i32) {
        // SAFETY: validity is guaranteed by the contract of `from_raw`.
        unsafe {
            self.0.as_ptr().write_volatile(width);
            self.0.as_ptr().add(1).write_volatile(height);
        }
    }

    pub fn read(&self) -> (i32, i32) {
        // SAFETY: validity is guaranteed by the contract of `from_raw`.
        unsafe {
            (
                self.0.as_ptr().read_volatile(),
                self.0.as_ptr().add(1).read_volatile(),
            )
        }
    }
}

struct UiCvars<V> {
    width: V,
    height: V,
}

pub struct ResolutionSync<V: ConsoleVariable> {
    cvars: Option<UiCvars<V>>,
    dirty: bool,
    system_resolution: Option<SystemResolution>,
}

impl<V: ConsoleVariable> Default for ResolutionSync<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: ConsoleVariable> ResolutionSync<V> {
    pub fn new() -> Self {
        Self {
            cvars: None,
            dirty: false,
            system_resolution: None,
        }
    }

    pub fn set_system_resolution(&mut self, resolution: Option<SystemResolution>) {
        self.system_resolution = resolution;
    }

    pub fn system_resolution(&self) -> Option<SystemResolution> {
        self.system_resolution
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Look up both UI-size variables once. Returns whether they are available.
    pub fn resolve_cvars<H: Host<Cvar = V>>(&mut self, host: &H) -> bool {
        if self.cvars.is_some() {
            return true;
        }

        let width = host.find_console_variable(UI_FIXED_WIDTH_CVAR);
        let height = host.find_console_variable(UI_FIXED_HEIGHT_CVAR);
        if let (Some(width), Some(height)) = (width, height) {
            info!("Resolved {} and {}", UI_FIXED_WIDTH_CVAR, UI_FIXED_HEIGHT_CVAR);
            self.cvars = Some(UiCvars { width, height });
        }

        self.cvars.is_some()
    }

    /// One viewport draw. Does nothing until the console variables are resolved.
    pub fn sync(&mut self, hmd_active: bool, dimensions: HmdDimensions) {
        let Some(cvars) = &self.cvars else {
            return;
        };

        if !hmd_active {
            if self.dirty {
                debug!("HMD inactive, resetting fixed UI size");
                cvars.width.set_int(0);
                cvars.height.set_int(0);
                self.dirty = false;
            }
            return;
        }

        if dimensions.ui_width == 0 || dimensions.ui_height == 0 {
            return;
        }

        let Some(((width, height), (system_width, system_height))) = engine_sizes(dimensions)
        else {
            debug!("Skipping out-of-range dimensions {:?}", dimensions);
            return;
        };
        if cvars.width.get_int() != width {
            cvars.width.set_int(width);
            self.dirty = true;
        }
        if cvars.height.get_int() != height {
            cvars.height.set_int(height);
            self.dirty = true;
        }

        if let Some(resolution) = self.system_resolution {
            resolution.write(system_width, system_height);
        }
    }
}

/// Fixed UI size `(ui_w - 1, ui_h - 1)` and system resolution `(hmd_w * 2, hmd_h)`.
/// `None` when a value does not fit an `i32`. UI dimensions must be non-zero.
fn engine_sizes(dimensions: HmdDimensions) -> Option<((i32, i32), (i32, i32))> {
    let ui_width = i32::try_from(dimensions.ui_width).ok()?.checked_sub(1)?;
    let ui_height = i32::try_from(dimensions.ui_height).ok()?.checked_sub(1)?;
    let system_width = i32::try_from(dimensions.hmd_width).ok()?.checked_mul(2)?;
    let system_height = i32::try_from(dimensions.hmd_height).ok()?;
    Some(((ui_width, ui_height), (system_width, system_height)))
}
