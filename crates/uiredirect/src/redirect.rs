//! Per-frame takeover of the engine's in-game UI render target.
//!
//! While the headset is active the engine's UI texture is swapped for the VR UI
//! surface; the displaced engine texture is remembered so it can be put back, and
//! handed to the present hook once to be blanked.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use tracing::debug;

/// Opaque, non-owning handle to an engine GPU texture. Only compared and copied.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TextureHandle(NonNull<c_void>);

// SAFETY: the handle is never dereferenced by this crate, only compared and
// passed back to the host.
unsafe impl Send for TextureHandle {}
// SAFETY: see above.
unsafe impl Sync for TextureHandle {}

impl TextureHandle {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextureHandle({:p})", self.0)
    }
}

/// Engine pooled render target: a vtable pointer followed by its render data.
#[derive(Debug)]
#[repr(C)]
pub struct PooledRenderTarget {
    pub vtable: *const c_void,
    pub data: PooledRenderTargetData,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PooledRenderTargetData {
    pub texture: Option<TextureHandle>,
    pub srt_texture: Option<TextureHandle>,
    pub uav: *mut c_void,
}

impl PooledRenderTargetData {
    pub fn new(texture: Option<TextureHandle>) -> Self {
        Self {
            texture,
            srt_texture: None,
            uav: std::ptr::null_mut(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RedirectorState {
    /// Engine texture displaced by the VR surface; set while a substitution is active.
    pub last_engine_ui_tex: Option<TextureHandle>,
    /// Companion view of the displaced texture. Tracked, not restored.
    pub last_engine_ui_srt: Option<TextureHandle>,
    /// Reclaimed engine texture waiting for the present hook to clear it.
    pub ui_tex_to_clear: Option<TextureHandle>,
    /// VR surface most recently written into the render target.
    pub last_ui_tex: Option<TextureHandle>,
}

/// What a call to [`Redirector::update`] did to the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// The render target was left alone.
    Idle,
    /// The saved engine texture was written back.
    Restored(TextureHandle),
    /// The VR surface is in place; `reclaimed` is set when a fresh engine texture was taken over.
    Substituted { reclaimed: Option<TextureHandle> },
}

#[derive(Debug, Default)]
pub struct Redirector {
    state: RedirectorState,
}

impl Redirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RedirectorState {
        &self.state
    }

    pub fn is_substituting(&self) -> bool {
        self.state.last_engine_ui_tex.is_some()
    }

    /// Run one frame of the redirection state machine against `target`.
    pub fn update(
        &mut self,
        target: &mut PooledRenderTargetData,
        hmd_active: bool,
        vr_surface: Option<TextureHandle>,
    ) -> Redirect {
        let state = &mut self.state;
        let mut result = Redirect::Idle;

        if let (Some(original), false) = (state.last_engine_ui_tex, hmd_active) {
            if target.texture.is_some()
                && (target.texture == vr_surface || target.texture == state.last_ui_tex)
            {
                debug!("HMD inactive, restoring engine UI texture {:?}", original);
                target.texture = Some(original);
                result = Redirect::Restored(original);
            }
            state.last_engine_ui_tex = None;
            state.last_engine_ui_srt = None;
            state.last_ui_tex = None;
        }

        let Some(current) = target.texture.filter(|_| hmd_active) else {
            state.last_engine_ui_tex = None;
            state.last_ui_tex = None;
            return result;
        };

        let Some(surface) = vr_surface else {
            if let (Some(original), true) =
                (state.last_engine_ui_tex, state.last_ui_tex == Some(current))
            {
                debug!("VR UI surface gone, restoring engine UI texture {:?}", original);
                target.texture = Some(original);
                result = Redirect::Restored(original);
            }
            state.last_ui_tex = None;
            state.last_engine_ui_tex = None;
            state.last_engine_ui_srt = None;
            return result;
        };

        let mut reclaimed = None;
        if current != surface {
            if state.last_ui_tex != Some(current) {
                debug!(
                    "Taking over engine UI texture {:?} for VR surface {:?}",
                    current, surface
                );
                state.ui_tex_to_clear = Some(current);
                state.last_engine_ui_tex = Some(current);
                state.last_engine_ui_srt = target.srt_texture;
                reclaimed = Some(current);
            }
            target.texture = Some(surface);
        }

        state.last_ui_tex = Some(surface);
        Redirect::Substituted { reclaimed }
    }

    /// Drop the saved engine texture after its pool slot disappeared.
    pub fn forget_engine_texture(&mut self) {
        self.state.last_engine_ui_tex = None;
        self.state.last_engine_ui_srt = None;
    }

    pub fn pending_clear(&self) -> Option<TextureHandle> {
        self.state.ui_tex_to_clear
    }

    pub fn take_pending_clear(&mut self) -> Option<TextureHandle> {
        self.state.ui_tex_to_clear.take()
    }
}
