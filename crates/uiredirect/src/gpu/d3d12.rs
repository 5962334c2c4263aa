use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::{
    D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_CPU_DESCRIPTOR_HANDLE, D3D12_DESCRIPTOR_HEAP_DESC,
    D3D12_DESCRIPTOR_HEAP_FLAG_NONE, D3D12_DESCRIPTOR_HEAP_TYPE_RTV, D3D12_FENCE_FLAG_NONE,
    D3D12_RENDER_TARGET_VIEW_DESC, D3D12_RENDER_TARGET_VIEW_DESC_0, D3D12_RESOURCE_BARRIER,
    D3D12_RESOURCE_BARRIER_0, D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
    D3D12_RESOURCE_BARRIER_FLAG_NONE, D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
    D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE, D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
    D3D12_RESOURCE_STATE_RENDER_TARGET, D3D12_RESOURCE_STATES, D3D12_RESOURCE_TRANSITION_BARRIER,
    D3D12_RTV_DIMENSION_TEXTURE2D, D3D12_TEX2D_RTV, ID3D12CommandAllocator, ID3D12CommandList,
    ID3D12CommandQueue, ID3D12DescriptorHeap, ID3D12Device, ID3D12Fence,
    ID3D12GraphicsCommandList, ID3D12Resource,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_UNKNOWN};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows::core::{HSTRING, Interface, PCWSTR};

use crate::error::{Error, Result};
use crate::gpu::{ClearColor, CommandDevice, ViewFormat};
use crate::host::{NativeResource, RendererInfo};

/// The host's D3D12 device and the queue its frames are submitted on.
pub struct D3d12Commands {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
}

impl D3d12Commands {
    pub fn from_renderer(renderer: &RendererInfo) -> Result<Self> {
        // SAFETY: the host reports a live device and direct queue for a D3D12 renderer.
        let device = unsafe { ID3D12Device::from_raw_borrowed(&renderer.device) }
            .cloned()
            .ok_or_else(|| Error::Gpu("renderer has no D3D12 device".to_string()))?;
        // SAFETY: as above.
        let queue = unsafe { ID3D12CommandQueue::from_raw_borrowed(&renderer.command_queue) }
            .cloned()
            .ok_or_else(|| Error::Gpu("renderer has no D3D12 command queue".to_string()))?;
        Ok(Self { device, queue })
    }
}

/// One command allocator and list, fenced independently.
pub struct D3d12Context {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_value: u64,
    event: HANDLE,
}

/// A single-descriptor RTV heap re-pointed at whichever texture is being cleared.
pub struct D3d12View {
    _heap: ID3D12DescriptorHeap,
    handle: D3D12_CPU_DESCRIPTOR_HANDLE,
    resource: Option<ID3D12Resource>,
}

/// Keeps resources referenced by submitted work alive until the GPU passes them.
pub struct D3d12Memory {
    fence: ID3D12Fence,
    frame: u64,
    retired: VecDeque<(u64, ID3D12Resource)>,
}

// SAFETY: D3D12 interfaces are free-threaded; the event handle is owned.
unsafe impl Send for D3d12Context {}
// SAFETY: see above.
unsafe impl Send for D3d12View {}
// SAFETY: see above.
unsafe impl Send for D3d12Memory {}

impl Drop for D3d12Context {
    fn drop(&mut self) {
        // SAFETY: the event was created for this context and is closed once.
        let _ = unsafe { CloseHandle(self.event) };
    }
}

const SHADER_READABLE: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATES(
    D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE.0 | D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE.0,
);

fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // SAFETY: borrows the interface pointer without touching its refcount;
                // the barrier never outlives `resource`.
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

impl CommandDevice for D3d12Commands {
    type Context = D3d12Context;
    type View = D3d12View;
    type Memory = D3d12Memory;

    fn create_context(&self, name: &str) -> Result<D3d12Context> {
        // SAFETY: object creation on a live device.
        unsafe {
            let allocator: ID3D12CommandAllocator = self
                .device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)?;
            let list: ID3D12GraphicsCommandList = self.device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &allocator,
                None,
            )?;
            list.Close()?;
            list.SetName(&HSTRING::from(name))?;

            let fence: ID3D12Fence = self.device.CreateFence(0, D3D12_FENCE_FLAG_NONE)?;
            let event = CreateEventW(None, false, false, PCWSTR::null())?;

            Ok(D3d12Context {
                allocator,
                list,
                fence,
                fence_value: 0,
                event,
            })
        }
    }

    fn wait(&self, context: &mut D3d12Context, timeout: Duration) -> Result<()> {
        // SAFETY: fence and event belong to this context.
        unsafe {
            if context.fence.GetCompletedValue() >= context.fence_value {
                return Ok(());
            }
            context
                .fence
                .SetEventOnCompletion(context.fence_value, context.event)?;
            let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
            if WaitForSingleObject(context.event, millis) != WAIT_OBJECT_0 {
                return Err(Error::FenceTimeout(timeout));
            }
        }
        Ok(())
    }

    fn create_view(&self) -> Result<D3d12View> {
        // SAFETY: object creation on a live device.
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device
                .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                    NumDescriptors: 1,
                    Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                    NodeMask: 0,
                })?
        };
        // SAFETY: the heap was just created.
        let handle = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        Ok(D3d12View {
            _heap: heap,
            handle,
            resource: None,
        })
    }

    fn create_memory(&self) -> Result<D3d12Memory> {
        // SAFETY: object creation on a live device.
        let fence = unsafe { self.device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }?;
        Ok(D3d12Memory {
            fence,
            frame: 0,
            retired: VecDeque::new(),
        })
    }

    fn bind_view(
        &self,
        view: &mut D3d12View,
        resource: NativeResource,
        format: ViewFormat,
        memory: &mut D3d12Memory,
    ) -> Result<()> {
        let raw = resource.as_ptr();
        // SAFETY: the host resolved this pointer to the texture's ID3D12Resource.
        let resource = unsafe { ID3D12Resource::from_raw_borrowed(&raw) }
            .cloned()
            .ok_or_else(|| Error::Gpu("null D3D12 resource".to_string()))?;

        let desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: match format {
                ViewFormat::Native => DXGI_FORMAT_UNKNOWN,
                ViewFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
            },
            ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV {
                    MipSlice: 0,
                    PlaneSlice: 0,
                },
            },
        };
        // SAFETY: writes one descriptor into the view's own heap.
        unsafe {
            self.device
                .CreateRenderTargetView(&resource, Some(&desc), view.handle)
        };

        if let Some(previous) = view.resource.replace(resource) {
            memory.retired.push_back((memory.frame + 1, previous));
        }
        Ok(())
    }

    fn record_clear(
        &self,
        context: &mut D3d12Context,
        view: &D3d12View,
        color: &ClearColor,
    ) -> Result<()> {
        let resource = view
            .resource
            .as_ref()
            .ok_or_else(|| Error::Gpu("texture view is not bound".to_string()))?;

        // SAFETY: the allocator is only reset once the GPU has passed its last use.
        unsafe {
            if context.fence.GetCompletedValue() >= context.fence_value {
                context.allocator.Reset()?;
            }
            context.list.Reset(&context.allocator, None)?;

            context.list.ResourceBarrier(&[transition_barrier(
                resource,
                SHADER_READABLE,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            )]);
            context.list.ClearRenderTargetView(view.handle, color, None);
            context.list.ResourceBarrier(&[transition_barrier(
                resource,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                SHADER_READABLE,
            )]);
            context.list.Close()?;
        }
        Ok(())
    }

    fn execute(&self, context: &mut D3d12Context) -> Result<()> {
        let list: ID3D12CommandList = context.list.cast()?;
        context.fence_value += 1;
        // SAFETY: the list is closed and its resources are kept alive by the view and memory.
        unsafe {
            self.queue.ExecuteCommandLists(&[Some(list)]);
            self.queue.Signal(&context.fence, context.fence_value)?;
        }
        Ok(())
    }

    fn commit(&self, memory: &mut D3d12Memory) -> Result<()> {
        memory.frame += 1;
        // SAFETY: signalling a fence owned by `memory` on the host's queue.
        let completed = unsafe {
            self.queue.Signal(&memory.fence, memory.frame)?;
            memory.fence.GetCompletedValue()
        };

        let before = memory.retired.len();
        while memory
            .retired
            .front()
            .is_some_and(|(frame, _)| *frame <= completed)
        {
            memory.retired.pop_front();
        }
        if memory.retired.len() != before {
            debug!(
                "Released {} retired D3D12 resource(s)",
                before - memory.retired.len()
            );
        }
        Ok(())
    }
}
