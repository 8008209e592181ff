use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::types::{AdapterProfile, GpuPowerPreference};

use super::pipeline::ShaderProgram;

/// Device, queue and the compiled quilt program, shared by every target.
pub struct GpuContext {
    _instance: wgpu::Instance,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) program: ShaderProgram,
    profile: AdapterProfile,
}

impl GpuContext {
    /// Context without any surface, for off-screen work only.
    pub fn headless(power: GpuPowerPreference) -> Result<Self> {
        let instance = create_instance();
        Self::build(instance, None, power)
    }

    /// Context whose adapter can present to `target`, plus that surface.
    ///
    /// # Safety contract
    ///
    /// The returned surface borrows the raw window handle; the caller must
    /// keep the window alive for as long as the surface exists.
    pub fn for_window<T>(target: &T, power: GpuPowerPreference) -> Result<(Self, wgpu::Surface<'static>)>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = create_instance();

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;

        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let context = Self::build(instance, Some(&surface), power)?;
        Ok((context, surface))
    }

    fn build(
        instance: wgpu::Instance,
        surface: Option<&wgpu::Surface<'static>>,
        power: GpuPowerPreference,
    ) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power.into(),
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let limits = adapter.limits();
        let profile = AdapterProfile::from_wgpu(&adapter.get_info(), &limits);
        tracing::debug!(
            name = %profile.name,
            backend = ?profile.backend,
            device_type = ?profile.device_type,
            is_software = profile.is_software(),
            max_texture = profile.max_texture_dimension,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("pixelquilt device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let program = ShaderProgram::new(&device).context("failed to build quilt shader")?;

        Ok(Self {
            _instance: instance,
            adapter,
            device,
            queue,
            program,
            profile,
        })
    }

    pub fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.profile.max_texture_dimension
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}
