//! Simulated compute device
//!
//! An in-process device that builds OpenCL C kernel source with the crate's
//! own front-end and executes dispatches with the kernel interpreter. It
//! keeps the host-API shape of a real driver:
//! - writes and dispatches are queued and only run at the next read or
//!   `finish`
//! - write data and kernel arguments are captured when a command is
//!   enqueued, so later host changes do not leak into it
//! - a failed build reports status `Error` and a compiler-style log

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::ast::{ParamKind, Program, ScalarType};
use crate::check::check_program;
use crate::diagnostics::{SourceError, render_build_log};
use crate::interp::{self, Binding, Memory, SharedBytes, Value};
use crate::lexer::lex;
use crate::parser::parse;
use crate::types::ScalarTag;

use super::{
    ArgValue, BufferId, BuildInfo, BuildStatus, ComputeDevice, DeviceInfo, DeviceType, GpuError,
    KernelId, MemAccess, Platform, ProgramId, WorkSize,
};

/// File name used for kernel source in build logs
const SOURCE_NAME: &str = "kernel.cl";

/// Platform exposing simulated devices
#[derive(Debug, Clone)]
pub struct SimulatedPlatform {
    devices: Vec<DeviceInfo>,
}

impl SimulatedPlatform {
    /// Platform with a single simulated CPU device
    pub fn new() -> Self {
        Self {
            devices: vec![SimulatedDevice::default_info()],
        }
    }

    /// Platform exposing exactly the given devices
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self { devices }
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimulatedPlatform {
    fn name(&self) -> &str {
        "Simulated OpenCL Platform"
    }

    fn devices(&self, device_type: DeviceType) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .filter(|d| device_type.matches(d.device_type))
            .cloned()
            .collect()
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn ComputeDevice>, GpuError> {
        if !self.devices.iter().any(|d| d.name == device.name) {
            return Err(GpuError::DeviceNotFound);
        }
        Ok(Box::new(SimulatedDevice::new(device.clone())))
    }
}

#[derive(Debug)]
struct DeviceBuffer {
    access: MemAccess,
    data: SharedBytes,
}

#[derive(Debug)]
struct ProgramState {
    source: String,
    status: BuildStatus,
    log: String,
    parsed: Option<Arc<Program>>,
}

#[derive(Debug)]
struct KernelState {
    program: Arc<Program>,
    /// Position of the kernel in `program.kernels`
    index: usize,
    args: Vec<Option<ArgValue>>,
}

/// A queued command with everything it needs captured
#[derive(Debug)]
enum Command {
    Write {
        buffer: BufferId,
        target: SharedBytes,
        offset: usize,
        data: Vec<u8>,
    },
    Dispatch {
        program: Arc<Program>,
        index: usize,
        bindings: Vec<Binding>,
        work: WorkSize,
    },
}

/// In-process device with an in-order, deferred command queue
#[derive(Debug)]
pub struct SimulatedDevice {
    info: DeviceInfo,
    next_handle: u64,
    buffers: FxHashMap<BufferId, DeviceBuffer>,
    programs: FxHashMap<ProgramId, ProgramState>,
    kernels: FxHashMap<KernelId, KernelState>,
    queue: Vec<Command>,
}

impl SimulatedDevice {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            next_handle: 1,
            buffers: FxHashMap::default(),
            programs: FxHashMap::default(),
            kernels: FxHashMap::default(),
            queue: Vec::new(),
        }
    }

    pub fn default_info() -> DeviceInfo {
        DeviceInfo {
            name: "Simulated OpenCL Device".to_string(),
            device_type: DeviceType::Cpu,
            compute_units: 1,
            max_work_group_size: 1024,
            max_work_item_dimensions: 3,
            local_mem_size: 32 * 1024,
            global_mem_size: 1 << 30,
        }
    }

    /// Number of commands waiting for the next synchronization point
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of programs not yet released
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Number of kernels not yet released
    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn buffer(&self, buffer: BufferId) -> Result<&DeviceBuffer, GpuError> {
        self.buffers
            .get(&buffer)
            .ok_or(GpuError::InvalidBuffer(buffer))
    }

    fn kernel(&self, kernel: KernelId) -> Result<&KernelState, GpuError> {
        self.kernels
            .get(&kernel)
            .ok_or(GpuError::InvalidKernel(kernel))
    }

    /// Run every queued command in order. After a failure the remaining
    /// commands are discarded.
    fn flush(&mut self) -> Result<(), GpuError> {
        let commands = std::mem::take(&mut self.queue);
        if !commands.is_empty() {
            trace!(commands = commands.len(), "flushing command queue");
        }
        for command in commands {
            match command {
                Command::Write {
                    buffer,
                    target,
                    offset,
                    data,
                } => {
                    let mut bytes = target.lock();
                    let end = offset + data.len();
                    if end > bytes.len() {
                        return Err(GpuError::InvalidBuffer(buffer));
                    }
                    bytes[offset..end].copy_from_slice(&data);
                }
                Command::Dispatch {
                    program,
                    index,
                    bindings,
                    work,
                } => {
                    let kernel = &program.kernels[index];
                    interp::run_ndrange(kernel, &bindings, &work)?;
                }
            }
        }
        Ok(())
    }

    fn check_range(&self, buffer: BufferId, offset: usize, len: usize) -> Result<SharedBytes, GpuError> {
        let data = Arc::clone(&self.buffer(buffer)?.data);
        let size = data.lock().len();
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(GpuError::BufferTooSmall { offset, len, size });
        }
        Ok(data)
    }

    fn build(&self, source: &str) -> Result<Program, Vec<SourceError>> {
        let tokens = lex(source).map_err(|e| vec![e])?;
        let program = parse(&tokens).map_err(|e| vec![e])?;
        let errors = check_program(&program);
        if errors.is_empty() {
            Ok(program)
        } else {
            Err(errors)
        }
    }
}

/// Device type a host scalar tag is packed as
fn tag_type(tag: ScalarTag) -> ScalarType {
    ScalarType::from_name(tag.device_type()).unwrap_or(ScalarType::Double)
}

impl ComputeDevice for SimulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_buffer(&mut self, access: MemAccess, size: usize) -> Result<BufferId, GpuError> {
        if size == 0 {
            return Err(GpuError::InvalidBufferSize);
        }
        let id = BufferId(self.next_handle());
        self.buffers.insert(
            id,
            DeviceBuffer {
                access,
                data: Arc::new(Mutex::new(vec![0u8; size])),
            },
        );
        trace!(%id, size, ?access, "created buffer");
        Ok(id)
    }

    fn release_buffer(&mut self, buffer: BufferId) -> Result<(), GpuError> {
        // Queued commands hold their own reference to the storage
        if self.buffers.remove(&buffer).is_none() {
            return Err(GpuError::InvalidBuffer(buffer));
        }
        trace!(%buffer, "released buffer");
        Ok(())
    }

    fn enqueue_write_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let target = self.check_range(buffer, offset, data.len())?;
        self.queue.push(Command::Write {
            buffer,
            target,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn enqueue_read_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<(), GpuError> {
        let source = self.check_range(buffer, offset, dst.len())?;
        self.flush()?;
        let bytes = source.lock();
        dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
        Ok(())
    }

    fn enqueue_nd_range(&mut self, kernel: KernelId, work: &WorkSize) -> Result<(), GpuError> {
        work.validate(&self.info)?;
        let state = self.kernel(kernel)?;
        let def = &state.program.kernels[state.index];

        let local_bytes: usize = def.local_arrays.iter().map(|a| a.len * a.ty.byte_width()).sum();
        if local_bytes > self.info.local_mem_size {
            return Err(GpuError::Execution(format!(
                "kernel `{}` needs {} bytes of local memory, device has {}",
                def.name, local_bytes, self.info.local_mem_size
            )));
        }

        let mut bindings = Vec::with_capacity(def.params.len());
        for (index, (param, arg)) in def.params.iter().zip(&state.args).enumerate() {
            let binding = match arg.ok_or(GpuError::ArgNotSet(index))? {
                ArgValue::Buffer(id) => {
                    let buffer = self.buffer(id)?;
                    let read_only = param.is_const || buffer.access == MemAccess::ReadOnly;
                    Binding::Global(Memory::new(
                        param.name.clone(),
                        param.ty,
                        Arc::clone(&buffer.data),
                        read_only,
                    ))
                }
                ArgValue::Scalar { value, tag } => {
                    let host = Value::double(value);
                    let packed = match tag {
                        Some(tag) => host.convert(tag_type(tag)),
                        None => host,
                    };
                    Binding::Scalar(packed.convert(param.ty))
                }
            };
            bindings.push(binding);
        }

        debug!(kernel = %def.name, global = ?work.global, local = ?work.local, "enqueued dispatch");
        let command = Command::Dispatch {
            program: Arc::clone(&state.program),
            index: state.index,
            bindings,
            work: work.clone(),
        };
        self.queue.push(command);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), GpuError> {
        self.flush()
    }

    fn create_program(&mut self, source: &str) -> Result<ProgramId, GpuError> {
        let id = ProgramId(self.next_handle());
        self.programs.insert(
            id,
            ProgramState {
                source: source.to_string(),
                status: BuildStatus::None,
                log: String::new(),
                parsed: None,
            },
        );
        Ok(id)
    }

    fn build_program(&mut self, program: ProgramId, options: &str) -> Result<(), GpuError> {
        let source = self
            .programs
            .get(&program)
            .map(|p| p.source.clone())
            .ok_or(GpuError::InvalidProgram(program))?;
        trace!(%program, options, "building program");

        let result = self.build(&source);
        let state = self
            .programs
            .get_mut(&program)
            .ok_or(GpuError::InvalidProgram(program))?;
        match result {
            Ok(parsed) => {
                state.status = BuildStatus::Success;
                state.log.clear();
                state.parsed = Some(Arc::new(parsed));
                Ok(())
            }
            Err(errors) => {
                state.status = BuildStatus::Error;
                state.log = render_build_log(SOURCE_NAME, &source, &errors);
                state.parsed = None;
                Err(GpuError::BuildFailed)
            }
        }
    }

    fn build_info(&self, program: ProgramId) -> Result<BuildInfo, GpuError> {
        let state = self
            .programs
            .get(&program)
            .ok_or(GpuError::InvalidProgram(program))?;
        Ok(BuildInfo {
            status: state.status,
            log: state.log.clone(),
        })
    }

    fn release_program(&mut self, program: ProgramId) -> Result<(), GpuError> {
        if self.programs.remove(&program).is_none() {
            return Err(GpuError::InvalidProgram(program));
        }
        trace!(%program, "released program");
        Ok(())
    }

    fn create_kernel(&mut self, program: ProgramId, entry: &str) -> Result<KernelId, GpuError> {
        let state = self
            .programs
            .get(&program)
            .ok_or(GpuError::InvalidProgram(program))?;
        let parsed = match (&state.parsed, state.status) {
            (Some(parsed), BuildStatus::Success) => Arc::clone(parsed),
            _ => return Err(GpuError::ProgramNotBuilt(program)),
        };
        let index = parsed
            .kernels
            .iter()
            .position(|k| k.name == entry)
            .ok_or_else(|| GpuError::KernelNotFound(entry.to_string()))?;
        let param_count = parsed.kernels[index].params.len();

        let id = KernelId(self.next_handle());
        self.kernels.insert(
            id,
            KernelState {
                program: parsed,
                index,
                args: vec![None; param_count],
            },
        );
        Ok(id)
    }

    fn release_kernel(&mut self, kernel: KernelId) -> Result<(), GpuError> {
        // Queued dispatches hold their own reference to the parsed program
        if self.kernels.remove(&kernel).is_none() {
            return Err(GpuError::InvalidKernel(kernel));
        }
        trace!(%kernel, "released kernel");
        Ok(())
    }

    fn kernel_param_count(&self, kernel: KernelId) -> Result<usize, GpuError> {
        Ok(self.kernel(kernel)?.args.len())
    }

    fn set_kernel_arg(
        &mut self,
        kernel: KernelId,
        index: usize,
        value: ArgValue,
    ) -> Result<(), GpuError> {
        if let ArgValue::Buffer(id) = value {
            self.buffer(id)?;
        }
        let state = self
            .kernels
            .get_mut(&kernel)
            .ok_or(GpuError::InvalidKernel(kernel))?;
        let count = state.args.len();
        let param = state.program.kernels[state.index]
            .params
            .get(index)
            .ok_or(GpuError::InvalidArgIndex { index, count })?;

        match (param.kind, value) {
            (ParamKind::Pointer(_), ArgValue::Buffer(_)) => {}
            (ParamKind::Pointer(_), ArgValue::Scalar { .. }) => {
                return Err(GpuError::InvalidArgValue {
                    index,
                    message: format!("parameter `{}` expects a buffer", param.name),
                });
            }
            (ParamKind::Value, ArgValue::Buffer(_)) => {
                return Err(GpuError::InvalidArgValue {
                    index,
                    message: format!("parameter `{}` expects a scalar", param.name),
                });
            }
            (ParamKind::Value, ArgValue::Scalar { tag, .. }) => {
                if let Some(tag) = tag
                    && tag.byte_width() != param.ty.byte_width()
                {
                    return Err(GpuError::InvalidArgSize {
                        index,
                        given: tag.byte_width(),
                        expected: param.ty.byte_width(),
                    });
                }
            }
        }

        state.args[index] = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: &str = "__kernel void scale(__global float* out, const uint n, const float k) {
        uint i = get_global_id(0);
        if (i < n) out[i] = out[i] * k;
    }";

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(SimulatedDevice::default_info())
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn float_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn built_kernel(dev: &mut SimulatedDevice, source: &str, entry: &str) -> KernelId {
        let program = dev.create_program(source).unwrap();
        dev.build_program(program, "").unwrap();
        dev.create_kernel(program, entry).unwrap()
    }

    #[test]
    fn test_commands_are_deferred_until_read() {
        let mut dev = device();
        let buf = dev.create_buffer(MemAccess::ReadWrite, 16).unwrap();
        let kernel = built_kernel(&mut dev, SCALE, "scale");

        dev.enqueue_write_buffer(buf, 0, &float_bytes(&[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        dev.set_kernel_arg(kernel, 0, ArgValue::Buffer(buf)).unwrap();
        dev.set_kernel_arg(kernel, 1, ArgValue::Scalar { value: 4.0, tag: Some(ScalarTag::Uint32) })
            .unwrap();
        dev.set_kernel_arg(kernel, 2, ArgValue::Scalar { value: 3.0, tag: None })
            .unwrap();
        dev.enqueue_nd_range(kernel, &WorkSize::new(4usize, 4usize)).unwrap();
        assert_eq!(dev.pending_commands(), 2);

        let mut out = vec![0u8; 16];
        dev.enqueue_read_buffer(buf, 0, &mut out).unwrap();
        assert_eq!(dev.pending_commands(), 0);
        assert_eq!(floats(&out), vec![3.0, 6.0, 9.0, 12.0]);
    }

    #[test]
    fn test_arguments_are_captured_at_enqueue() {
        let mut dev = device();
        let buf = dev.create_buffer(MemAccess::ReadWrite, 4).unwrap();
        let kernel = built_kernel(&mut dev, SCALE, "scale");
        dev.enqueue_write_buffer(buf, 0, &float_bytes(&[1.0])).unwrap();
        dev.set_kernel_arg(kernel, 0, ArgValue::Buffer(buf)).unwrap();
        dev.set_kernel_arg(kernel, 1, ArgValue::Scalar { value: 1.0, tag: None })
            .unwrap();
        dev.set_kernel_arg(kernel, 2, ArgValue::Scalar { value: 2.0, tag: None })
            .unwrap();
        dev.enqueue_nd_range(kernel, &WorkSize::new(1usize, 1usize)).unwrap();
        dev.set_kernel_arg(kernel, 2, ArgValue::Scalar { value: 100.0, tag: None })
            .unwrap();
        dev.enqueue_nd_range(kernel, &WorkSize::new(1usize, 1usize)).unwrap();

        let mut out = vec![0u8; 4];
        dev.enqueue_read_buffer(buf, 0, &mut out).unwrap();
        assert_eq!(floats(&out), vec![200.0]);
    }

    #[test]
    fn test_build_failure_reports_log() {
        let mut dev = device();
        let program = dev
            .create_program("__kernel void f(__global int* o) {\n  o[0] = ;\n}")
            .unwrap();
        assert_eq!(dev.build_program(program, ""), Err(GpuError::BuildFailed));
        let info = dev.build_info(program).unwrap();
        assert_eq!(info.status, BuildStatus::Error);
        assert!(info.log.contains("expected expression"));
        assert!(info.log.contains("kernel.cl:2:"));
        assert_eq!(
            dev.create_kernel(program, "f"),
            Err(GpuError::ProgramNotBuilt(program))
        );
    }

    #[test]
    fn test_argument_validation() {
        let mut dev = device();
        let kernel = built_kernel(&mut dev, SCALE, "scale");
        assert_eq!(
            dev.set_kernel_arg(kernel, 3, ArgValue::Scalar { value: 0.0, tag: None }),
            Err(GpuError::InvalidArgIndex { index: 3, count: 3 })
        );
        assert_eq!(
            dev.set_kernel_arg(kernel, 1, ArgValue::Scalar { value: 0.0, tag: Some(ScalarTag::Uint16) }),
            Err(GpuError::InvalidArgSize { index: 1, given: 2, expected: 4 })
        );
        assert!(matches!(
            dev.set_kernel_arg(kernel, 0, ArgValue::Scalar { value: 0.0, tag: None }),
            Err(GpuError::InvalidArgValue { index: 0, .. })
        ));
        assert_eq!(
            dev.enqueue_nd_range(kernel, &WorkSize::new(4usize, 4usize)),
            Err(GpuError::ArgNotSet(0))
        );
    }

    #[test]
    fn test_unknown_entry_point() {
        let mut dev = device();
        let program = dev.create_program(SCALE).unwrap();
        dev.build_program(program, "").unwrap();
        assert_eq!(
            dev.create_kernel(program, "missing"),
            Err(GpuError::KernelNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_out_of_bounds_surfaces_at_finish() {
        let mut dev = device();
        let buf = dev.create_buffer(MemAccess::ReadWrite, 8).unwrap();
        let kernel = built_kernel(
            &mut dev,
            "__kernel void k(__global float* o) { o[get_global_id(0)] = 1.0f; }",
            "k",
        );
        dev.set_kernel_arg(kernel, 0, ArgValue::Buffer(buf)).unwrap();
        dev.enqueue_nd_range(kernel, &WorkSize::new(4usize, 4usize)).unwrap();
        assert!(matches!(dev.finish(), Err(GpuError::OutOfBounds { index: 2, len: 2, .. })));
        assert_eq!(dev.pending_commands(), 0);
    }

    #[test]
    fn test_zero_sized_buffer_and_release() {
        let mut dev = device();
        assert_eq!(
            dev.create_buffer(MemAccess::ReadWrite, 0),
            Err(GpuError::InvalidBufferSize)
        );
        let buf = dev.create_buffer(MemAccess::ReadWrite, 4).unwrap();
        assert_eq!(dev.buffer_count(), 1);
        dev.release_buffer(buf).unwrap();
        assert_eq!(dev.release_buffer(buf), Err(GpuError::InvalidBuffer(buf)));
        assert_eq!(dev.buffer_count(), 0);
    }

    #[test]
    fn test_release_program_and_kernel() {
        let mut dev = device();
        let buf = dev.create_buffer(MemAccess::ReadWrite, 4).unwrap();
        let program = dev.create_program(SCALE).unwrap();
        dev.build_program(program, "").unwrap();
        let kernel = dev.create_kernel(program, "scale").unwrap();
        assert_eq!((dev.program_count(), dev.kernel_count()), (1, 1));

        // the kernel outlives its program
        dev.release_program(program).unwrap();
        assert_eq!(dev.release_program(program), Err(GpuError::InvalidProgram(program)));
        dev.enqueue_write_buffer(buf, 0, &float_bytes(&[2.0])).unwrap();
        dev.set_kernel_arg(kernel, 0, ArgValue::Buffer(buf)).unwrap();
        dev.set_kernel_arg(kernel, 1, ArgValue::Scalar { value: 1.0, tag: None })
            .unwrap();
        dev.set_kernel_arg(kernel, 2, ArgValue::Scalar { value: 5.0, tag: None })
            .unwrap();
        dev.enqueue_nd_range(kernel, &WorkSize::new(1usize, 1usize)).unwrap();

        // and a queued dispatch outlives its kernel
        dev.release_kernel(kernel).unwrap();
        assert_eq!(dev.release_kernel(kernel), Err(GpuError::InvalidKernel(kernel)));
        assert_eq!((dev.program_count(), dev.kernel_count()), (0, 0));

        let mut out = vec![0u8; 4];
        dev.enqueue_read_buffer(buf, 0, &mut out).unwrap();
        assert_eq!(floats(&out), vec![10.0]);
    }

    #[test]
    fn test_platform_filters_by_type() {
        let platform = SimulatedPlatform::new();
        assert_eq!(platform.devices(DeviceType::Default).len(), 1);
        assert_eq!(platform.devices(DeviceType::Cpu).len(), 1);
        assert!(platform.devices(DeviceType::Gpu).is_empty());
        let info = &platform.devices(DeviceType::Cpu)[0];
        assert!(platform.open(info).is_ok());
    }
}
