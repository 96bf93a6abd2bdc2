//! Host-side kernel context
//!
//! A [`Context`] owns one compute device (and with it one in-order command
//! queue), the registry of buffers it created, and the configuration that
//! builders fall back on. Dropping the context releases every registered
//! buffer and every kernel it compiled.

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::config::ContextConfig;
use crate::error::{KernelError, Result};
use crate::kernel::{Kernel, KernelTemplate, Substitutions};
use crate::registry::{BufferMeta, BufferRegistry};
use crate::runtime::{
    BufferId, ComputeDevice, DeviceInfo, GpuError, KernelId, MemAccess, Platform, ProgramId,
    SimulatedPlatform,
};
use crate::types::{ElementType, HostArray};

pub struct Context {
    device: Box<dyn ComputeDevice>,
    config: ContextConfig,
    registry: BufferRegistry,
    /// Compiled kernels and the program each one was built from
    kernels: FxHashMap<KernelId, ProgramId>,
}

impl Context {
    /// Context on the default platform with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(ContextConfig::default())
    }

    /// Context on the default platform
    pub fn with_config(config: ContextConfig) -> Result<Self> {
        Self::with_platform(&SimulatedPlatform::new(), config)
    }

    /// Open the first device of the configured type on `platform`
    pub fn with_platform(platform: &dyn Platform, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let devices = platform.devices(config.device_type);
        let Some(info) = devices.first() else {
            return Err(KernelError::UnsupportedEnvironment(format!(
                "platform `{}` has no {} device",
                platform.name(),
                config.device_type
            )));
        };
        let device = platform
            .open(info)
            .map_err(|e| KernelError::UnsupportedEnvironment(e.to_string()))?;
        Self::with_device(device, config)
    }

    /// Wrap an already opened device
    pub fn with_device(device: Box<dyn ComputeDevice>, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        info!(
            device = %device.info().name,
            device_type = %device.info().device_type,
            local_size = config.local_size,
            "created kernel context"
        );
        Ok(Self {
            device,
            config,
            registry: BufferRegistry::new(),
            kernels: FxHashMap::default(),
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub(crate) fn device_mut(&mut self) -> &mut dyn ComputeDevice {
        self.device.as_mut()
    }

    // ==================== BUFFERS ====================

    fn create_registered(&mut self, element_type: ElementType, len: usize) -> Result<BufferId> {
        if len == 0 {
            return Err(KernelError::invalid_argument(
                "cannot create a device buffer for zero elements",
            ));
        }
        let access = MemAccess::ReadWrite;
        let handle = self
            .device
            .create_buffer(access, len * element_type.byte_width())?;
        self.registry.register(
            handle,
            BufferMeta {
                element_type,
                len,
                access,
            },
        );
        Ok(handle)
    }

    /// Copy `data` into a new read-write device buffer
    ///
    /// The write is enqueued without waiting. Every call creates a new
    /// buffer, even for the same host array.
    pub fn transfer_to_device(&mut self, data: &HostArray) -> Result<BufferId> {
        let handle = self.create_registered(data.element_type(), data.len())?;
        self.device.enqueue_write_buffer(handle, 0, &data.to_bytes())?;
        debug!(
            buffer = %handle,
            element_type = %data.element_type(),
            len = data.len(),
            "transferred to device"
        );
        Ok(handle)
    }

    /// Read a buffer back to the host, blocking until the data is complete
    ///
    /// Without a destination, one is allocated from the buffer's registered
    /// element type and length.
    pub fn transfer_from_device(
        &mut self,
        handle: BufferId,
        destination: Option<HostArray>,
    ) -> Result<HostArray> {
        let mut destination = match destination {
            Some(array) => array,
            None => {
                let meta = self.registry.require(handle)?;
                HostArray::zeros(meta.element_type, meta.len)
            }
        };

        let mut bytes = vec![0u8; destination.byte_len()];
        if !bytes.is_empty() {
            self.device.enqueue_read_buffer(handle, 0, &mut bytes)?;
        }
        self.device.finish()?;
        destination.copy_from_bytes(&bytes);
        debug!(buffer = %handle, len = destination.len(), "transferred from device");
        Ok(destination)
    }

    /// Create a zero-filled, registered device buffer
    pub fn allocate(&mut self, element_type: ElementType, len: usize) -> Result<BufferId> {
        let handle = self.create_registered(element_type, len)?;
        debug!(buffer = %handle, %element_type, len, "allocated device buffer");
        Ok(handle)
    }

    /// Free a device buffer and forget its registry entry
    pub fn release(&mut self, handle: BufferId) -> Result<()> {
        self.registry.remove(handle);
        self.device.release_buffer(handle)?;
        debug!(buffer = %handle, "released device buffer");
        Ok(())
    }

    pub fn buffer_meta(&self, handle: BufferId) -> Option<&BufferMeta> {
        self.registry.get(handle)
    }

    /// Number of buffers currently tracked by this context
    pub fn registered_buffers(&self) -> usize {
        self.registry.len()
    }

    /// Block until every enqueued command has completed
    pub fn finish(&mut self) -> Result<()> {
        self.device.finish()?;
        Ok(())
    }

    // ==================== COMPILATION ====================

    /// Build `source` and extract the kernel named `entry`
    ///
    /// A failed build reports the device's build status and full build log.
    pub fn compile(&mut self, source: &str, entry: &str) -> Result<Kernel> {
        if self.config.log_kernel_source {
            debug!(entry, source, "compiling kernel source");
        }

        let program = self.device.create_program(source)?;
        let kernel = match self.build_kernel(program, entry) {
            Ok(kernel) => kernel,
            Err(err) => {
                self.discard_program(program);
                return Err(err);
            }
        };
        self.kernels.insert(kernel, program);

        let param_count = self.device.kernel_param_count(kernel)?;
        debug!(entry, %program, params = param_count, "compiled kernel");
        Ok(Kernel::new(entry.to_string(), program, kernel, param_count))
    }

    fn build_kernel(&mut self, program: ProgramId, entry: &str) -> Result<KernelId> {
        match self.device.build_program(program, &self.config.build_options) {
            Ok(()) => {}
            Err(GpuError::BuildFailed) => {
                let build = self.device.build_info(program)?;
                warn!(entry, status = %build.status, "kernel build failed");
                return Err(KernelError::BuildFailure {
                    entry: entry.to_string(),
                    status: build.status,
                    log: build.log,
                });
            }
            Err(other) => return Err(other.into()),
        }
        Ok(self.device.create_kernel(program, entry)?)
    }

    fn discard_program(&mut self, program: ProgramId) {
        if let Err(err) = self.device.release_program(program) {
            warn!(%program, error = %err, "failed to release program");
        }
    }

    /// Free a kernel compiled by this context, along with its program
    ///
    /// Dispatches already enqueued still run.
    pub fn release_kernel(&mut self, kernel: &Kernel) -> Result<()> {
        let Some(program) = self.kernels.remove(&kernel.id()) else {
            return Err(KernelError::invalid_argument(format!(
                "kernel `{}` ({}) is not live in this context",
                kernel.entry(),
                kernel.id()
            )));
        };
        self.device.release_kernel(kernel.id())?;
        self.device.release_program(program)?;
        debug!(kernel = %kernel.entry(), "released kernel");
        Ok(())
    }

    /// Number of compiled kernels not yet released
    pub fn live_kernels(&self) -> usize {
        self.kernels.len()
    }

    /// Render `template` and compile the result
    pub fn compile_template(
        &mut self,
        template: &KernelTemplate,
        substitutions: &Substitutions,
        entry: &str,
    ) -> Result<Kernel> {
        let source = template.render(substitutions)?;
        self.compile(&source, entry)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for (kernel, program) in std::mem::take(&mut self.kernels) {
            if let Err(err) = self.device.release_kernel(kernel) {
                warn!(%kernel, error = %err, "failed to release kernel");
            }
            self.discard_program(program);
        }
        for handle in self.registry.drain() {
            if let Err(err) = self.device.release_buffer(handle) {
                warn!(buffer = %handle, error = %err, "failed to release buffer");
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device.info().name)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("kernels", &self.kernels.len())
            .finish()
    }
}
