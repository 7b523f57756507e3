//! Deterministic in-memory backend.
//!
//! Every object shares one [`MockState`]: the scripted environment (adapters,
//! outputs, GPU timing, injected faults) and everything observed while the
//! pipeline drives it (live handles, release order, fence waits, command
//! trace, audit violations).

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use cadence_core::{
    BufferFormat, Color, ColorSpace, DeviceLossReason, FeatureLevel, Rect, ResourceState,
    ShaderModel, Viewport,
};
use cadence_gpu::{
    Adapter, AdapterInfo, Backend, CommandAllocator, CommandList, DepthBufferDesc, Device, Factory,
    Fence, FenceEvent, GpuError, OutputDesc, PresentMode, PresentOutcome, Queue, Result, SwapChain,
    SwapChainDesc, WindowBounds,
};
use tracing::debug;

type Shared = Rc<RefCell<MockState>>;

/// Identity of a mock GPU object. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

/// What a handle stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandleKind {
    Factory,
    Device,
    Queue,
    Fence,
    FenceEvent,
    CommandAllocator,
    CommandList,
    SwapChain,
    BackBuffer,
    RenderTargetView,
    DepthBuffer,
    DepthStencilView,
}

/// Identity of an image. Back-buffer handles fetched twice for the same
/// buffer share one image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId(u64);

/// How the simulated GPU makes progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuTiming {
    /// Work completes the moment its fence signal is queued.
    #[default]
    Immediate,
    /// Signals stay pending until retired by [`MockBackend::retire`] or by a
    /// blocking wait, which retires just enough of them.
    Manual,
}

/// A scripted adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterSpec {
    pub name: String,
    pub software: bool,
    pub feature_level: FeatureLevel,
}

impl AdapterSpec {
    pub fn hardware(name: impl Into<String>, feature_level: FeatureLevel) -> Self {
        Self {
            name: name.into(),
            software: false,
            feature_level,
        }
    }

    pub fn software(name: impl Into<String>, feature_level: FeatureLevel) -> Self {
        Self {
            name: name.into(),
            software: true,
            feature_level,
        }
    }
}

/// One-shot faults, consumed when they fire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    pub present_loss: Option<DeviceLossReason>,
    pub resize_loss: Option<DeviceLossReason>,
    pub present_out_of_date: bool,
    /// Number of upcoming device creations that fail.
    pub device_creation_failures: u32,
    pub fence_event_failure: bool,
    /// The next color space support query reports a lost device.
    pub color_space_loss: Option<DeviceLossReason>,
    /// Devices fail to report their feature level.
    pub feature_level_query_failure: bool,
}

/// A blocking fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitRecord {
    pub target: u64,
    /// Pending signals the GPU had to retire before the wait returned.
    pub retired: usize,
}

/// A command allocator reset while the GPU could still be reading it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorViolation {
    pub slot: usize,
    /// Fence value covering the allocator's last submission, `None` when it
    /// was never followed by a signal.
    pub required: Option<u64>,
    pub completed: u64,
}

/// A barrier or present whose assumed state differs from the tracked one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierViolation {
    pub image: String,
    pub expected: ResourceState,
    pub actual: ResourceState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    pub buffer: usize,
    pub mode: PresentMode,
}

#[derive(Debug, Default)]
struct FenceSim {
    completed: u64,
    pending: VecDeque<u64>,
}

/// Scripted environment plus observations.
#[derive(Debug)]
pub struct MockState {
    pub timing: GpuTiming,
    /// Adapters in enumeration order.
    pub adapters: Vec<AdapterSpec>,
    pub software_adapter: Option<AdapterSpec>,
    pub shader_model: ShaderModel,
    pub tearing_supported: bool,
    /// Whether the surface offers a tearing present mode.
    pub surface_tearing: bool,
    /// Fewest images the surface hands out per chain.
    pub min_image_count: u32,
    pub outputs: Vec<OutputDesc>,
    pub supported_color_spaces: Vec<ColorSpace>,
    /// `false` simulates a display topology change.
    pub factory_current: bool,
    /// Back-buffer index the swap chain reports after the next resize.
    pub next_index_after_resize: Option<usize>,
    pub faults: Faults,

    pub live: BTreeMap<HandleId, HandleKind>,
    /// Release order, oldest first.
    pub releases: Vec<(HandleKind, HandleId)>,
    pub waits: Vec<WaitRecord>,
    pub signals: Vec<u64>,
    pub trial_devices: Vec<String>,
    /// Adapter names devices were created on.
    pub devices_created: Vec<String>,
    pub factories_created: u32,
    pub factory_refreshes: u32,
    /// Descriptions of swap chain creations and resizes, in order.
    pub swap_chain_descs: Vec<SwapChainDesc>,
    pub resizes: u32,
    pub presents: Vec<PresentRecord>,
    pub applied_color_spaces: Vec<ColorSpace>,
    pub render_target_formats: Vec<BufferFormat>,
    pub depth_buffers: Vec<DepthBufferDesc>,
    pub allocator_violations: Vec<AllocatorViolation>,
    pub barrier_violations: Vec<BarrierViolation>,
    pub trace: Vec<String>,

    next_id: u64,
    fences: BTreeMap<HandleId, FenceSim>,
    /// Allocators whose lists were executed but not yet covered by a signal.
    in_flight: Vec<HandleId>,
    /// Fence and value covering each allocator's last submission.
    guards: BTreeMap<HandleId, (HandleId, u64)>,
    image_states: BTreeMap<ImageId, ResourceState>,
    image_labels: BTreeMap<ImageId, String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            timing: GpuTiming::Immediate,
            adapters: vec![AdapterSpec::hardware("Mock GPU", FeatureLevel::new(1, 3))],
            software_adapter: Some(AdapterSpec::software(
                "Mock Software Rasterizer",
                FeatureLevel::new(1, 3),
            )),
            shader_model: ShaderModel::new(6, 6),
            tearing_supported: true,
            surface_tearing: true,
            min_image_count: 2,
            outputs: vec![OutputDesc {
                desktop_rect: Rect::new(0, 0, 1920, 1080),
                native_color_space: ColorSpace::Srgb,
            }],
            supported_color_spaces: vec![ColorSpace::Srgb],
            factory_current: true,
            next_index_after_resize: None,
            faults: Faults::default(),
            live: BTreeMap::new(),
            releases: Vec::new(),
            waits: Vec::new(),
            signals: Vec::new(),
            trial_devices: Vec::new(),
            devices_created: Vec::new(),
            factories_created: 0,
            factory_refreshes: 0,
            swap_chain_descs: Vec::new(),
            resizes: 0,
            presents: Vec::new(),
            applied_color_spaces: Vec::new(),
            render_target_formats: Vec::new(),
            depth_buffers: Vec::new(),
            allocator_violations: Vec::new(),
            barrier_violations: Vec::new(),
            trace: Vec::new(),
            next_id: 1,
            fences: BTreeMap::new(),
            in_flight: Vec::new(),
            guards: BTreeMap::new(),
            image_states: BTreeMap::new(),
            image_labels: BTreeMap::new(),
        }
    }
}

impl MockState {
    /// Whether `id` has not been released yet.
    pub fn is_live(&self, id: HandleId) -> bool {
        self.live.contains_key(&id)
    }

    /// Number of live handles of `kind`.
    pub fn live_count(&self, kind: HandleKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    /// Release order as kinds only.
    pub fn release_kinds(&self) -> Vec<HandleKind> {
        self.releases.iter().map(|(kind, _)| *kind).collect()
    }

    /// Last value the GPU reached on `fence`.
    pub fn fence_completed(&self, fence: HandleId) -> Option<u64> {
        self.fences.get(&fence).map(|sim| sim.completed)
    }

    /// Tracked state of `image`.
    pub fn image_state(&self, image: ImageId) -> Option<ResourceState> {
        self.image_states.get(&image).copied()
    }

    fn register(&mut self, kind: HandleKind) -> HandleId {
        let id = HandleId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, kind);
        id
    }

    fn release(&mut self, id: HandleId, kind: HandleKind) {
        self.live.remove(&id);
        self.releases.push((kind, id));
    }

    fn new_image(&mut self, label: String, state: ResourceState) -> ImageId {
        let image = ImageId(self.next_id);
        self.next_id += 1;
        self.image_states.insert(image, state);
        self.image_labels.insert(image, label);
        image
    }

    fn image_label(&self, image: ImageId) -> String {
        self.image_labels
            .get(&image)
            .cloned()
            .unwrap_or_else(|| format!("{image:?}"))
    }

    /// Record that `image` is expected in `expected` and move it to `next`.
    fn expect_state(&mut self, image: ImageId, expected: ResourceState, next: ResourceState) {
        let actual = self.image_states.get(&image).copied().unwrap_or_default();
        if actual != expected {
            let image = self.image_label(image);
            self.barrier_violations.push(BarrierViolation {
                image,
                expected,
                actual,
            });
        }
        self.image_states.insert(image, next);
    }

    fn signal(&mut self, fence: HandleId, value: u64) -> Result<()> {
        for allocator in self.in_flight.drain(..) {
            self.guards.insert(allocator, (fence, value));
        }

        let timing = self.timing;
        let sim = self
            .fences
            .get_mut(&fence)
            .ok_or_else(|| GpuError::InvalidState("signal on a released fence".to_string()))?;
        match timing {
            GpuTiming::Immediate => sim.completed = value,
            GpuTiming::Manual => sim.pending.push_back(value),
        }

        self.signals.push(value);
        self.trace.push(format!("signal {value}"));
        Ok(())
    }

    /// Retire pending signals until `fence` reaches `target`.
    fn wait_for(&mut self, fence: HandleId, target: u64) -> Result<()> {
        let sim = self
            .fences
            .get_mut(&fence)
            .ok_or_else(|| GpuError::InvalidState("wait on a released fence".to_string()))?;

        let mut retired = 0;
        while sim.completed < target {
            let Some(value) = sim.pending.pop_front() else {
                return Err(GpuError::Other(format!(
                    "fence value {target} is never signalled, the wait would hang"
                )));
            };
            sim.completed = value;
            retired += 1;
        }

        self.waits.push(WaitRecord { target, retired });
        self.trace.push(format!("wait {target}"));
        Ok(())
    }

    /// Complete up to `count` pending signals on every fence.
    fn retire(&mut self, count: usize) {
        for sim in self.fences.values_mut() {
            for _ in 0..count {
                match sim.pending.pop_front() {
                    Some(value) => sim.completed = value,
                    None => break,
                }
            }
        }
    }

    fn reset_allocator(&mut self, allocator: HandleId, slot: usize) {
        if self.in_flight.contains(&allocator) {
            self.allocator_violations.push(AllocatorViolation {
                slot,
                required: None,
                completed: 0,
            });
            return;
        }

        if let Some((fence, value)) = self.guards.get(&allocator).copied() {
            let completed = self.fence_completed(fence).unwrap_or(0);
            if completed < value {
                self.allocator_violations.push(AllocatorViolation {
                    slot,
                    required: Some(value),
                    completed,
                });
            }
        }
    }
}

/// Registration of one mock object. Dropping it releases the object.
struct Handle {
    id: HandleId,
    kind: HandleKind,
    state: Shared,
}

impl Handle {
    fn new(state: &Shared, kind: HandleKind) -> Self {
        let id = state.borrow_mut().register(kind);
        Self {
            id,
            kind,
            state: Rc::clone(state),
        }
    }

    fn state(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self.kind, self.id.0)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.state.borrow_mut().release(self.id, self.kind);
    }
}

/// Backend whose GPU is simulated in memory.
///
/// Clones share state, so a test keeps one clone to script and inspect the
/// backend after handing another to the pipeline.
#[derive(Clone, Debug, Default)]
pub struct MockBackend {
    state: Shared,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timing(timing: GpuTiming) -> Self {
        let backend = Self::new();
        backend.state_mut().timing = timing;
        backend
    }

    pub fn state(&self) -> Ref<'_, MockState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    /// Drain the command trace.
    pub fn take_trace(&self) -> Vec<String> {
        std::mem::take(&mut self.state_mut().trace)
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.state().is_live(id)
    }

    /// Let the GPU finish `count` pending signals per fence.
    pub fn retire(&self, count: usize) {
        self.state_mut().retire(count);
    }

    /// The next present reports a lost device.
    pub fn inject_present_loss(&self, reason: DeviceLossReason) {
        self.state_mut().faults.present_loss = Some(reason);
    }

    /// The next swap chain resize reports a lost device.
    pub fn inject_resize_loss(&self, reason: DeviceLossReason) {
        self.state_mut().faults.resize_loss = Some(reason);
    }

    /// The next present reports an out-of-date swap chain.
    pub fn inject_out_of_date(&self) {
        self.state_mut().faults.present_out_of_date = true;
    }

    /// The next color space support query reports a lost device.
    pub fn inject_color_space_loss(&self, reason: DeviceLossReason) {
        self.state_mut().faults.color_space_loss = Some(reason);
    }

    /// Fail the next `count` device creations.
    pub fn fail_device_creations(&self, count: u32) {
        self.state_mut().faults.device_creation_failures = count;
    }
}

impl Backend for MockBackend {
    type Window = MockWindow;
    type Factory = MockFactory;
    type Adapter = MockAdapter;
    type Device = MockDevice;
    type Queue = MockQueue;
    type Fence = MockFence;
    type FenceEvent = MockFenceEvent;
    type CommandAllocator = MockCommandAllocator;
    type CommandList = MockCommandList;
    type SwapChain = MockSwapChain;
    type Texture = MockTexture;
    type RenderTargetView = MockRenderTargetView;
    type DepthStencilView = MockDepthStencilView;

    fn create_factory(&self, _debug: bool) -> Result<MockFactory> {
        self.state_mut().factories_created += 1;
        Ok(MockFactory {
            handle: Handle::new(&self.state, HandleKind::Factory),
        })
    }
}

/// A window at a fixed desktop position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MockWindow {
    pub rect: Option<Rect>,
}

impl MockWindow {
    pub const fn new(rect: Rect) -> Self {
        Self { rect: Some(rect) }
    }

    /// A window whose desktop position is unknown.
    pub const fn unplaced() -> Self {
        Self { rect: None }
    }
}

impl WindowBounds for MockWindow {
    fn desktop_rect(&self) -> Option<Rect> {
        self.rect
    }
}

#[derive(Debug)]
pub struct MockFactory {
    handle: Handle,
}

impl MockFactory {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }
}

impl Factory<MockBackend> for MockFactory {
    fn supports_tearing(&self) -> bool {
        self.handle.state().tearing_supported
    }

    fn enumerate_adapters(&self) -> Result<Vec<MockAdapter>> {
        Ok(self
            .handle
            .state()
            .adapters
            .iter()
            .cloned()
            .map(|spec| MockAdapter { spec })
            .collect())
    }

    fn software_adapter(&self) -> Result<Option<MockAdapter>> {
        Ok(self
            .handle
            .state()
            .software_adapter
            .clone()
            .map(|spec| MockAdapter { spec }))
    }

    fn try_create_device(&self, adapter: &MockAdapter, min_level: FeatureLevel) -> bool {
        self.handle.state().trial_devices.push(adapter.spec.name.clone());
        adapter.spec.feature_level >= min_level
    }

    fn create_device(&self, adapter: &MockAdapter, min_level: FeatureLevel) -> Result<MockDevice> {
        {
            let mut state = self.handle.state();
            if state.faults.device_creation_failures > 0 {
                state.faults.device_creation_failures -= 1;
                debug!("Failing device creation on {}", adapter.spec.name);
                return Err(GpuError::Other("injected device creation failure".to_string()));
            }
            if adapter.spec.feature_level < min_level {
                return Err(GpuError::NoSuitableAdapter);
            }
            state.devices_created.push(adapter.spec.name.clone());
        }

        Ok(MockDevice {
            handle: Handle::new(&self.handle.state, HandleKind::Device),
            feature_level: adapter.spec.feature_level,
        })
    }

    fn create_swap_chain(
        &self,
        _device: &MockDevice,
        _queue: &MockQueue,
        _window: &MockWindow,
        desc: &SwapChainDesc,
    ) -> Result<MockSwapChain> {
        if desc.format.is_srgb() {
            return Err(GpuError::SwapchainCreation(format!(
                "flip-model chains can't store {:?}",
                desc.format
            )));
        }

        let images = {
            let mut state = self.handle.state();
            state.swap_chain_descs.push(*desc);
            let count = desc.buffer_count.max(state.min_image_count);
            back_buffer_images(&mut state, count)
        };

        Ok(MockSwapChain {
            handle: Handle::new(&self.handle.state, HandleKind::SwapChain),
            images,
            current: 0,
            desc: *desc,
            color_space: ColorSpace::Srgb,
        })
    }

    fn is_current(&self, _window: &MockWindow) -> bool {
        self.handle.state().factory_current
    }

    fn refresh(&mut self, _window: &MockWindow) -> Result<()> {
        let mut state = self.handle.state();
        state.factory_current = true;
        state.factory_refreshes += 1;
        Ok(())
    }

    fn outputs(&self, _window: &MockWindow, _swap_chain: &MockSwapChain) -> Result<Vec<OutputDesc>> {
        Ok(self.handle.state().outputs.clone())
    }
}

fn back_buffer_images(state: &mut MockState, count: u32) -> Vec<ImageId> {
    (0..count)
        .map(|index| state.new_image(format!("back_buffer[{index}]"), ResourceState::Present))
        .collect()
}

#[derive(Clone, Debug)]
pub struct MockAdapter {
    spec: AdapterSpec,
}

impl Adapter for MockAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.spec.name.clone(),
            software: self.spec.software,
        }
    }
}

#[derive(Debug)]
pub struct MockDevice {
    handle: Handle,
    feature_level: FeatureLevel,
}

impl MockDevice {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }
}

impl Device<MockBackend> for MockDevice {
    fn max_feature_level(&self) -> Result<FeatureLevel> {
        if self.handle.state().faults.feature_level_query_failure {
            return Err(GpuError::Other("feature level query failed".to_string()));
        }
        Ok(self.feature_level)
    }

    fn highest_shader_model(&self) -> Result<ShaderModel> {
        Ok(self.handle.state().shader_model)
    }

    fn create_queue(&self) -> Result<MockQueue> {
        Ok(MockQueue {
            handle: Handle::new(&self.handle.state, HandleKind::Queue),
        })
    }

    fn create_command_allocator(&self, slot: usize) -> Result<MockCommandAllocator> {
        Ok(MockCommandAllocator {
            handle: Handle::new(&self.handle.state, HandleKind::CommandAllocator),
            slot,
        })
    }

    fn create_command_list(&self, _allocator: &MockCommandAllocator) -> Result<MockCommandList> {
        Ok(MockCommandList {
            handle: Handle::new(&self.handle.state, HandleKind::CommandList),
            recording: None,
            closed: None,
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<MockFence> {
        let handle = Handle::new(&self.handle.state, HandleKind::Fence);
        self.handle.state().fences.insert(
            handle.id,
            FenceSim {
                completed: initial_value,
                pending: VecDeque::new(),
            },
        );
        Ok(MockFence { handle })
    }

    fn create_fence_event(&self) -> Result<MockFenceEvent> {
        if std::mem::take(&mut self.handle.state().faults.fence_event_failure) {
            return Err(GpuError::WaitHandleCreation("injected failure".to_string()));
        }
        Ok(MockFenceEvent {
            handle: Handle::new(&self.handle.state, HandleKind::FenceEvent),
            armed: None,
        })
    }

    fn create_render_target_view(
        &self,
        texture: &MockTexture,
        format: BufferFormat,
    ) -> Result<MockRenderTargetView> {
        self.handle.state().render_target_formats.push(format);
        Ok(MockRenderTargetView {
            handle: Handle::new(&self.handle.state, HandleKind::RenderTargetView),
            image: texture.image,
            label: texture.label.clone(),
            format,
        })
    }

    fn create_depth_buffer(&self, desc: &DepthBufferDesc) -> Result<MockTexture> {
        let image = {
            let mut state = self.handle.state();
            state.depth_buffers.push(*desc);
            state.new_image("depth".to_string(), ResourceState::DepthWrite)
        };
        Ok(MockTexture {
            handle: Handle::new(&self.handle.state, HandleKind::DepthBuffer),
            image,
            label: "depth".to_string(),
        })
    }

    fn create_depth_stencil_view(
        &self,
        texture: &MockTexture,
        _format: BufferFormat,
    ) -> Result<MockDepthStencilView> {
        Ok(MockDepthStencilView {
            handle: Handle::new(&self.handle.state, HandleKind::DepthStencilView),
            label: texture.label.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockQueue {
    handle: Handle,
}

impl MockQueue {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }
}

impl Queue<MockBackend> for MockQueue {
    fn execute(&self, list: &MockCommandList) -> Result<()> {
        if list.is_open() {
            return Err(GpuError::InvalidState(
                "executing a command list that is still open".to_string(),
            ));
        }
        let (allocator, slot) = list.closed.ok_or_else(|| {
            GpuError::InvalidState("executing a command list with nothing recorded".to_string())
        })?;

        let mut state = self.handle.state();
        state.in_flight.push(allocator);
        state.trace.push(format!("execute slot={slot}"));
        Ok(())
    }

    fn signal(&self, fence: &MockFence, value: u64) -> Result<()> {
        self.handle.state().signal(fence.handle.id, value)
    }
}

#[derive(Debug)]
pub struct MockFence {
    handle: Handle,
}

impl MockFence {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }
}

impl Fence<MockBackend> for MockFence {
    fn completed_value(&self) -> Result<u64> {
        self.handle
            .state()
            .fence_completed(self.handle.id)
            .ok_or_else(|| GpuError::InvalidState("unknown fence".to_string()))
    }

    fn set_event_on_completion(&self, value: u64, event: &mut MockFenceEvent) -> Result<()> {
        event.armed = Some((self.handle.id, value));
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockFenceEvent {
    handle: Handle,
    armed: Option<(HandleId, u64)>,
}

impl FenceEvent for MockFenceEvent {
    fn wait(&mut self) -> Result<()> {
        match self.armed.take() {
            Some((fence, target)) => self.handle.state().wait_for(fence, target),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct MockCommandAllocator {
    handle: Handle,
    slot: usize,
}

impl MockCommandAllocator {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }

    pub const fn slot(&self) -> usize {
        self.slot
    }
}

impl CommandAllocator for MockCommandAllocator {
    fn reset(&mut self) -> Result<()> {
        self.handle.state().reset_allocator(self.handle.id, self.slot);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockCommandList {
    handle: Handle,
    /// Allocator and slot being recorded into while open.
    recording: Option<(HandleId, usize)>,
    /// Allocator and slot of the last closed recording.
    closed: Option<(HandleId, usize)>,
}

impl MockCommandList {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }

    pub const fn is_open(&self) -> bool {
        self.recording.is_some()
    }

    fn record(&self, line: String) {
        self.handle.state().trace.push(line);
    }
}

impl CommandList<MockBackend> for MockCommandList {
    fn reset(&mut self, allocator: &MockCommandAllocator) -> Result<()> {
        if self.recording.is_some() {
            return Err(GpuError::InvalidState(
                "resetting a command list that is still open".to_string(),
            ));
        }
        self.recording = Some((allocator.handle.id, allocator.slot));
        self.record(format!("reset slot={}", allocator.slot));
        Ok(())
    }

    fn transition(&mut self, texture: &MockTexture, before: ResourceState, after: ResourceState) {
        self.handle.state().expect_state(texture.image, before, after);
        self.record(format!("transition {} {before:?} -> {after:?}", texture.label));
    }

    fn set_render_targets(
        &mut self,
        render_target: &MockRenderTargetView,
        depth_stencil: Option<&MockDepthStencilView>,
    ) {
        let line = match depth_stencil {
            Some(view) => format!("bind {} + {}", render_target.label, view.label),
            None => format!("bind {}", render_target.label),
        };
        self.record(line);
    }

    fn clear_render_target(&mut self, render_target: &MockRenderTargetView, color: Color) {
        self.record(format!(
            "clear {} to ({}, {}, {}, {})",
            render_target.label, color.r, color.g, color.b, color.a
        ));
    }

    fn clear_depth(&mut self, depth_stencil: &MockDepthStencilView, depth: f32) {
        self.record(format!("clear {} to {depth}", depth_stencil.label));
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.record(format!(
            "viewport {}x{} depth {}..{}",
            viewport.width, viewport.height, viewport.min_depth, viewport.max_depth
        ));
    }

    fn set_scissor(&mut self, rect: &Rect) {
        self.record(format!("scissor {}x{}", rect.width(), rect.height()));
    }

    fn close(&mut self) -> Result<()> {
        let recording = self.recording.take().ok_or_else(|| {
            GpuError::InvalidState("closing a command list that isn't open".to_string())
        })?;
        self.closed = Some(recording);
        self.record("close".to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockSwapChain {
    handle: Handle,
    images: Vec<ImageId>,
    current: usize,
    desc: SwapChainDesc,
    color_space: ColorSpace,
}

impl MockSwapChain {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }

    pub const fn desc(&self) -> &SwapChainDesc {
        &self.desc
    }

    pub const fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn images(&self) -> &[ImageId] {
        &self.images
    }
}

impl SwapChain<MockBackend> for MockSwapChain {
    fn resize_buffers(&mut self, desc: &SwapChainDesc) -> Result<PresentOutcome> {
        let mut state = self.handle.state();
        if let Some(reason) = state.faults.resize_loss.take() {
            debug!("Injecting {reason} at resize");
            return Err(GpuError::DeviceLost(reason));
        }

        let outstanding = state.live_count(HandleKind::BackBuffer)
            + state.live_count(HandleKind::RenderTargetView);
        if outstanding > 0 {
            return Err(GpuError::InvalidState(format!(
                "{outstanding} back-buffer references are still held"
            )));
        }

        state.resizes += 1;
        state.swap_chain_descs.push(*desc);
        let count = desc.buffer_count.max(state.min_image_count);
        self.images = back_buffer_images(&mut state, count);
        self.current = state
            .next_index_after_resize
            .take()
            .map_or(0, |index| index % self.images.len().max(1));
        self.desc = *desc;
        Ok(PresentOutcome::Presented)
    }

    fn buffer(&self, index: usize) -> Result<MockTexture> {
        let image = *self.images.get(index).ok_or_else(|| {
            GpuError::InvalidState(format!("swap chain has no buffer {index}"))
        })?;
        Ok(MockTexture {
            handle: Handle::new(&self.handle.state, HandleKind::BackBuffer),
            image,
            label: format!("back_buffer[{index}]"),
        })
    }

    fn buffer_count(&self) -> usize {
        self.images.len()
    }

    fn supports_tearing(&self) -> bool {
        self.desc.allow_tearing && self.handle.state().surface_tearing
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current
    }

    fn present(&mut self, _queue: &MockQueue, mode: PresentMode) -> Result<PresentOutcome> {
        let mut state = self.handle.state();
        if let Some(reason) = state.faults.present_loss.take() {
            debug!("Injecting {reason} at present");
            return Err(GpuError::DeviceLost(reason));
        }

        let image = self.images[self.current];
        state.expect_state(image, ResourceState::Present, ResourceState::Present);
        state.presents.push(PresentRecord {
            buffer: self.current,
            mode,
        });
        state.trace.push(format!("present {mode:?}"));

        self.current = (self.current + 1) % self.images.len();

        if std::mem::take(&mut state.faults.present_out_of_date) {
            return Ok(PresentOutcome::OutOfDate);
        }
        Ok(PresentOutcome::Presented)
    }

    fn supports_color_space(&self, color_space: ColorSpace) -> Result<bool> {
        let mut state = self.handle.state();
        if let Some(reason) = state.faults.color_space_loss.take() {
            debug!("Injecting {reason} at color space query");
            return Err(GpuError::DeviceLost(reason));
        }
        Ok(state.supported_color_spaces.contains(&color_space))
    }

    fn set_color_space(&mut self, color_space: ColorSpace) -> Result<()> {
        let mut state = self.handle.state();
        if !state.supported_color_spaces.contains(&color_space) {
            return Err(GpuError::InvalidState(format!(
                "{color_space:?} is not supported"
            )));
        }
        state.applied_color_spaces.push(color_space);
        self.color_space = color_space;
        Ok(())
    }
}

/// A back buffer or the depth buffer.
#[derive(Debug)]
pub struct MockTexture {
    handle: Handle,
    image: ImageId,
    label: String,
}

impl MockTexture {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }

    pub const fn image(&self) -> ImageId {
        self.image
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug)]
pub struct MockRenderTargetView {
    handle: Handle,
    image: ImageId,
    label: String,
    format: BufferFormat,
}

impl MockRenderTargetView {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }

    pub const fn image(&self) -> ImageId {
        self.image
    }

    pub const fn format(&self) -> BufferFormat {
        self.format
    }
}

#[derive(Debug)]
pub struct MockDepthStencilView {
    handle: Handle,
    label: String,
}

impl MockDepthStencilView {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(backend: &MockBackend) -> (MockFactory, MockDevice) {
        let factory = backend.create_factory(false).unwrap();
        let adapter = factory.enumerate_adapters().unwrap().remove(0);
        let device = factory.create_device(&adapter, FeatureLevel::new(1, 0)).unwrap();
        (factory, device)
    }

    #[test]
    fn dropping_a_handle_logs_its_release() {
        let backend = MockBackend::new();
        let (factory, device) = device(&backend);
        let device_id = device.id();

        drop(device);
        drop(factory);

        let state = backend.state();
        assert!(!state.is_live(device_id));
        assert_eq!(
            state.release_kinds(),
            vec![HandleKind::Device, HandleKind::Factory]
        );
        assert!(state.live.is_empty());
    }

    #[test]
    fn manual_wait_retires_only_what_it_needs() {
        let backend = MockBackend::with_timing(GpuTiming::Manual);
        let (_factory, device) = device(&backend);
        let queue = device.create_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        let mut event = device.create_fence_event().unwrap();

        for value in 1..=3 {
            queue.signal(&fence, value).unwrap();
        }
        assert_eq!(fence.completed_value().unwrap(), 0);

        fence.set_event_on_completion(2, &mut event).unwrap();
        event.wait().unwrap();

        assert_eq!(fence.completed_value().unwrap(), 2);
        assert_eq!(
            backend.state().waits,
            vec![WaitRecord {
                target: 2,
                retired: 2
            }]
        );

        backend.retire(1);
        assert_eq!(fence.completed_value().unwrap(), 3);
    }

    #[test]
    fn wait_on_unsignalled_value_fails() {
        let backend = MockBackend::with_timing(GpuTiming::Manual);
        let (_factory, device) = device(&backend);
        let fence = device.create_fence(0).unwrap();
        let mut event = device.create_fence_event().unwrap();

        fence.set_event_on_completion(1, &mut event).unwrap();
        assert!(event.wait().is_err());
    }

    #[test]
    fn early_allocator_reset_is_flagged() {
        let backend = MockBackend::with_timing(GpuTiming::Manual);
        let (_factory, device) = device(&backend);
        let queue = device.create_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        let mut allocator = device.create_command_allocator(1).unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();

        list.reset(&allocator).unwrap();
        list.close().unwrap();
        queue.execute(&list).unwrap();

        // Not yet covered by any signal.
        allocator.reset().unwrap();
        queue.signal(&fence, 1).unwrap();
        // Signalled but not reached.
        allocator.reset().unwrap();
        backend.retire(1);
        allocator.reset().unwrap();

        assert_eq!(
            backend.state().allocator_violations,
            vec![
                AllocatorViolation {
                    slot: 1,
                    required: None,
                    completed: 0
                },
                AllocatorViolation {
                    slot: 1,
                    required: Some(1),
                    completed: 0
                },
            ]
        );
    }

    #[test]
    fn mismatched_barrier_is_flagged() {
        let backend = MockBackend::new();
        let (_factory, device) = device(&backend);
        let allocator = device.create_command_allocator(0).unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let depth = device
            .create_depth_buffer(&DepthBufferDesc {
                width: 4,
                height: 4,
                format: BufferFormat::D32Float,
                clear_depth: 1.0,
            })
            .unwrap();

        list.reset(&allocator).unwrap();
        list.transition(&depth, ResourceState::Present, ResourceState::ShaderResource);

        let state = backend.state();
        assert_eq!(
            state.barrier_violations,
            vec![BarrierViolation {
                image: "depth".to_string(),
                expected: ResourceState::Present,
                actual: ResourceState::DepthWrite,
            }]
        );
        assert_eq!(
            state.image_state(depth.image()),
            Some(ResourceState::ShaderResource)
        );
    }

    #[test]
    fn executing_an_open_list_is_rejected() {
        let backend = MockBackend::new();
        let (_factory, device) = device(&backend);
        let queue = device.create_queue().unwrap();
        let allocator = device.create_command_allocator(0).unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();

        list.reset(&allocator).unwrap();
        assert!(list.is_open());
        assert!(queue.execute(&list).is_err());
    }
}
