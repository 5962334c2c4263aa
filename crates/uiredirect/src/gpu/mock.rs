//! Recording GPU back-end for pipeline and plugin tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::gpu::{ClearColor, CommandDevice, GpuBackend, ImmediateDevice, ViewFormat};
use crate::host::{NativeResource, RendererInfo};

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateView(NativeResource, ViewFormat),
    Clear(ClearColor),
    CreateContext(usize),
    Wait(usize),
    CreateTextureView,
    CreateMemory,
    BindView(NativeResource, ViewFormat),
    RecordClear(usize, ClearColor),
    Execute(usize),
    Commit,
}

#[derive(Default)]
struct Flags {
    reject_native: AtomicBool,
    reject_bgra: AtomicBool,
    time_out: AtomicBool,
    fail_creation: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    calls: Arc<Mutex<Vec<GpuCall>>>,
    flags: Arc<Flags>,
    contexts: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GpuCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    pub fn reject_native_views(&self, reject: bool) {
        self.flags.reject_native.store(reject, Ordering::SeqCst);
    }

    pub fn reject_bgra_views(&self, reject: bool) {
        self.flags.reject_bgra.store(reject, Ordering::SeqCst);
    }

    pub fn time_out_fences(&self, time_out: bool) {
        self.flags.time_out.store(time_out, Ordering::SeqCst);
    }

    pub fn fail_creation(&self, fail: bool) {
        self.flags.fail_creation.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: GpuCall) {
        self.calls.lock().push(call);
    }

    fn check_creation(&self) -> Result<()> {
        if self.flags.fail_creation.load(Ordering::SeqCst) {
            return Err(Error::Gpu("mock creation failure".to_string()));
        }
        Ok(())
    }
}

pub struct MockContext {
    id: usize,
}

impl ImmediateDevice for MockBackend {
    type View = NativeResource;

    fn create_render_target_view(
        &self,
        resource: NativeResource,
        format: ViewFormat,
    ) -> Result<NativeResource> {
        self.record(GpuCall::CreateView(resource, format));
        let rejected = match format {
            ViewFormat::Native => &self.flags.reject_native,
            ViewFormat::Bgra8Unorm => &self.flags.reject_bgra,
        };
        if rejected.load(Ordering::SeqCst) {
            return Err(Error::Gpu(format!("mock rejects {} views", format)));
        }
        Ok(resource)
    }

    fn clear_render_target_view(&self, _view: &NativeResource, color: &ClearColor) -> Result<()> {
        self.record(GpuCall::Clear(*color));
        Ok(())
    }
}

impl CommandDevice for MockBackend {
    type Context = MockContext;
    type View = Option<NativeResource>;
    type Memory = ();

    fn create_context(&self, _name: &str) -> Result<MockContext> {
        self.check_creation()?;
        let id = self.contexts.fetch_add(1, Ordering::SeqCst);
        self.record(GpuCall::CreateContext(id));
        Ok(MockContext { id })
    }

    fn wait(&self, context: &mut MockContext, timeout: Duration) -> Result<()> {
        self.record(GpuCall::Wait(context.id));
        if self.flags.time_out.load(Ordering::SeqCst) {
            return Err(Error::FenceTimeout(timeout));
        }
        Ok(())
    }

    fn create_view(&self) -> Result<Option<NativeResource>> {
        self.check_creation()?;
        self.record(GpuCall::CreateTextureView);
        Ok(None)
    }

    fn create_memory(&self) -> Result<()> {
        self.check_creation()?;
        self.record(GpuCall::CreateMemory);
        Ok(())
    }

    fn bind_view(
        &self,
        view: &mut Option<NativeResource>,
        resource: NativeResource,
        format: ViewFormat,
        _memory: &mut (),
    ) -> Result<()> {
        self.record(GpuCall::BindView(resource, format));
        *view = Some(resource);
        Ok(())
    }

    fn record_clear(
        &self,
        context: &mut MockContext,
        _view: &Option<NativeResource>,
        color: &ClearColor,
    ) -> Result<()> {
        self.record(GpuCall::RecordClear(context.id, *color));
        Ok(())
    }

    fn execute(&self, context: &mut MockContext) -> Result<()> {
        self.record(GpuCall::Execute(context.id));
        Ok(())
    }

    fn commit(&self, _memory: &mut ()) -> Result<()> {
        self.record(GpuCall::Commit);
        Ok(())
    }
}

impl GpuBackend for MockBackend {
    type Immediate = MockBackend;
    type Commands = MockBackend;

    fn immediate(&self, _renderer: &RendererInfo) -> Result<MockBackend> {
        Ok(self.clone())
    }

    fn commands(&self, _renderer: &RendererInfo) -> Result<MockBackend> {
        Ok(self.clone())
    }
}
