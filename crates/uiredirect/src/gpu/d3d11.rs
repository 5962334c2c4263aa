use windows::Win32::Graphics::Direct3D11::{
    D3D11_RENDER_TARGET_VIEW_DESC, D3D11_RENDER_TARGET_VIEW_DESC_0, D3D11_RTV_DIMENSION_TEXTURE2D,
    D3D11_TEX2D_RTV, ID3D11Device, ID3D11DeviceContext, ID3D11RenderTargetView, ID3D11Resource,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_B8G8R8A8_UNORM;
use windows::core::Interface;

use crate::error::{Error, Result};
use crate::gpu::{ClearColor, ImmediateDevice, ViewFormat};
use crate::host::{NativeResource, RendererInfo};

/// The host's D3D11 device and its immediate context.
pub struct D3d11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl D3d11Device {
    pub fn from_renderer(renderer: &RendererInfo) -> Result<Self> {
        // SAFETY: the host reports a live ID3D11Device for a D3D11 renderer.
        let device = unsafe { ID3D11Device::from_raw_borrowed(&renderer.device) }
            .cloned()
            .ok_or_else(|| Error::Gpu("renderer has no D3D11 device".to_string()))?;
        // SAFETY: plain COM call on a live device.
        let context = unsafe { device.GetImmediateContext() }?;
        Ok(Self { device, context })
    }
}

impl ImmediateDevice for D3d11Device {
    type View = ID3D11RenderTargetView;

    fn create_render_target_view(
        &self,
        resource: NativeResource,
        format: ViewFormat,
    ) -> Result<ID3D11RenderTargetView> {
        let raw = resource.as_ptr();
        // SAFETY: the host resolved this pointer to the texture's ID3D11Texture2D.
        let texture = unsafe { ID3D11Resource::from_raw_borrowed(&raw) }
            .ok_or_else(|| Error::Gpu("null D3D11 resource".to_string()))?;

        let mut rtv = None;
        match format {
            // SAFETY: creating a view of a live texture.
            ViewFormat::Native => unsafe {
                self.device
                    .CreateRenderTargetView(texture, None, Some(&mut rtv))?
            },
            ViewFormat::Bgra8Unorm => {
                let desc = D3D11_RENDER_TARGET_VIEW_DESC {
                    Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                    ViewDimension: D3D11_RTV_DIMENSION_TEXTURE2D,
                    Anonymous: D3D11_RENDER_TARGET_VIEW_DESC_0 {
                        Texture2D: D3D11_TEX2D_RTV { MipSlice: 0 },
                    },
                };
                // SAFETY: as above, with an explicit 2D view description.
                unsafe {
                    self.device
                        .CreateRenderTargetView(texture, Some(&desc), Some(&mut rtv))?
                }
            }
        }

        rtv.ok_or_else(|| Error::Gpu("CreateRenderTargetView returned no view".to_string()))
    }

    fn clear_render_target_view(
        &self,
        view: &ID3D11RenderTargetView,
        color: &ClearColor,
    ) -> Result<()> {
        // SAFETY: the view was created on this device and is alive.
        unsafe { self.context.ClearRenderTargetView(view, color) };
        Ok(())
    }
}
