//! Kernel interpreter
//!
//! Executes a parsed kernel over an NDRange. Work-groups run one after
//! another. Inside a group that synchronizes with `barrier`, every work-item
//! runs on its own scoped thread so that each one can block at the barrier;
//! barrier-free kernels run their work-items sequentially.

pub mod barrier;
pub mod builtins;
mod eval;
pub mod memory;
pub mod value;

pub use barrier::GroupBarrier;
pub use memory::{Memory, SharedBytes};
pub use value::Value;

use crate::ast::KernelDef;
use crate::runtime::{GpuError, WorkSize};

use eval::{ControlFlow, WorkItem, WorkItemId};

/// Argument bound to one kernel parameter for a dispatch
#[derive(Debug, Clone)]
pub enum Binding {
    Scalar(Value),
    Global(Memory),
}

/// NDRange shape, padded to three dimensions with 1s
#[derive(Debug, Clone)]
pub struct Geometry {
    pub work_dim: usize,
    pub global_size: [usize; 3],
    pub local_size: [usize; 3],
    pub num_groups: [usize; 3],
}

impl Geometry {
    pub fn new(work: &WorkSize) -> Self {
        let mut geometry = Geometry {
            work_dim: work.dimensions(),
            global_size: [1; 3],
            local_size: [1; 3],
            num_groups: [1; 3],
        };
        for d in 0..work.dimensions().min(3) {
            geometry.global_size[d] = work.global[d];
            geometry.local_size[d] = work.local[d];
            geometry.num_groups[d] = work.global[d] / work.local[d].max(1);
        }
        geometry
    }

    pub fn group_count(&self) -> usize {
        self.num_groups.iter().product()
    }

    pub fn items_per_group(&self) -> usize {
        self.local_size.iter().product()
    }
}

/// Split a linear index into coordinates, first dimension fastest
fn unflatten(mut linear: usize, extent: &[usize; 3]) -> [usize; 3] {
    let mut coords = [0; 3];
    for d in 0..3 {
        coords[d] = linear % extent[d];
        linear /= extent[d];
    }
    coords
}

/// Run `kernel` over the NDRange described by `work`
///
/// `args` holds one binding per kernel parameter, in order. The work size
/// must already be validated against the device.
pub fn run_ndrange(kernel: &KernelDef, args: &[Binding], work: &WorkSize) -> Result<(), GpuError> {
    if args.len() != kernel.params.len() {
        return Err(GpuError::Execution(format!(
            "kernel `{}` takes {} arguments, {} bound",
            kernel.name,
            kernel.params.len(),
            args.len()
        )));
    }

    let geometry = Geometry::new(work);
    tracing::trace!(
        kernel = %kernel.name,
        groups = geometry.group_count(),
        items_per_group = geometry.items_per_group(),
        "running NDRange"
    );

    for linear in 0..geometry.group_count() {
        let group = unflatten(linear, &geometry.num_groups);
        let locals: Vec<Memory> = kernel
            .local_arrays
            .iter()
            .map(|array| Memory::zeroed(array.name.clone(), array.ty, array.len))
            .collect();
        run_group(kernel, args, &locals, &geometry, group)?;
    }
    Ok(())
}

fn work_item_id(geometry: &Geometry, group: [usize; 3], linear: usize) -> WorkItemId {
    let local = unflatten(linear, &geometry.local_size);
    let mut global = [0; 3];
    for d in 0..3 {
        global[d] = group[d] * geometry.local_size[d] + local[d];
    }
    WorkItemId {
        global,
        local,
        group,
    }
}

fn run_group(
    kernel: &KernelDef,
    args: &[Binding],
    locals: &[Memory],
    geometry: &Geometry,
    group: [usize; 3],
) -> Result<(), GpuError> {
    let items = geometry.items_per_group();

    if !kernel.uses_barrier {
        for linear in 0..items {
            let id = work_item_id(geometry, group, linear);
            let mut item = WorkItem::new(kernel, args, locals, geometry, id, None);
            item.run(&kernel.body).map_err(into_error)?;
        }
        return Ok(());
    }

    let barrier = GroupBarrier::new(items);
    let results: Vec<Result<(), ControlFlow>> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(items);
        for linear in 0..items {
            let id = work_item_id(geometry, group, linear);
            let barrier = &barrier;
            let spawned = std::thread::Builder::new().spawn_scoped(scope, move || {
                let mut item = WorkItem::new(kernel, args, locals, geometry, id, Some(barrier));
                let result = item.run(&kernel.body);
                match result {
                    Err(ControlFlow::Fault(_)) => barrier.abort(),
                    _ => barrier.leave(),
                }
                result
            });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    barrier.abort();
                    handles.clear();
                    return vec![Err(ControlFlow::Fault(GpuError::Execution(format!(
                        "failed to start work-item thread: {}",
                        err
                    ))))];
                }
            }
        }
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    barrier.abort();
                    Err(ControlFlow::Fault(GpuError::Execution(
                        "work-item panicked".to_string(),
                    )))
                })
            })
            .collect()
    });

    // Report the root cause, not the peers it aborted
    let mut aborted = false;
    for result in results {
        match result {
            Ok(()) => {}
            Err(ControlFlow::Aborted) => aborted = true,
            Err(other) => return Err(into_error(other)),
        }
    }
    if aborted {
        return Err(GpuError::Execution("work-group aborted".to_string()));
    }
    Ok(())
}

fn into_error(flow: ControlFlow) -> GpuError {
    match flow {
        ControlFlow::Fault(err) => err,
        ControlFlow::Aborted => GpuError::Execution("work-group aborted".to_string()),
        other => GpuError::Execution(format!("unexpected control flow {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ScalarType;
    use crate::parser::parse_source;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn float_buffer(name: &str, values: &[f32]) -> Memory {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Memory::new(name, ScalarType::Float, Arc::new(Mutex::new(bytes)), false)
    }

    fn read_floats(memory: &Memory) -> Vec<f64> {
        (0..memory.len() as i64)
            .map(|i| memory.load(i).unwrap().as_f64())
            .collect()
    }

    #[test]
    fn test_elementwise_kernel() {
        let program = parse_source(
            "__kernel void scale(__global float* out, const uint n, __global const float* x) {
                uint i = get_global_id(0);
                if (i < n) out[i] = x[i] * 2.0f;
            }",
        )
        .unwrap();
        let out = float_buffer("out", &[0.0; 4]);
        let x = float_buffer("x", &[1.0, 2.0, 3.0, 4.0]);
        let args = vec![
            Binding::Global(out.clone()),
            Binding::Scalar(Value::uint(3)),
            Binding::Global(x),
        ];
        run_ndrange(&program.kernels[0], &args, &WorkSize::new(4usize, 2usize)).unwrap();
        assert_eq!(read_floats(&out), vec![2.0, 4.0, 6.0, 0.0]);
    }

    #[test]
    fn test_barrier_orders_local_memory() {
        // Each item reads its neighbour's slot after the barrier
        let program = parse_source(
            "__kernel void rotate(__global float* out) {
                __local float tmp[4];
                uint l = get_local_id(0);
                tmp[l] = (float)l;
                barrier(CLK_LOCAL_MEM_FENCE);
                out[get_global_id(0)] = tmp[(l + 1) % 4];
            }",
        )
        .unwrap();
        let out = float_buffer("out", &[0.0; 8]);
        let args = vec![Binding::Global(out.clone())];
        run_ndrange(&program.kernels[0], &args, &WorkSize::new(8usize, 4usize)).unwrap();
        assert_eq!(read_floats(&out), vec![1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_fault_in_barrier_group_is_reported() {
        let program = parse_source(
            "__kernel void bad(__global float* out) {
                __local float tmp[2];
                tmp[get_local_id(0)] = 1.0f;
                barrier(CLK_LOCAL_MEM_FENCE);
            }",
        )
        .unwrap();
        let out = float_buffer("out", &[0.0; 4]);
        let err = run_ndrange(&program.kernels[0], &[Binding::Global(out)], &WorkSize::new(4usize, 4usize))
            .unwrap_err();
        assert!(matches!(err, GpuError::OutOfBounds { ref name, .. } if name == "tmp"));
    }

    #[test]
    fn test_two_dimensional_ids() {
        let program = parse_source(
            "__kernel void grid(__global int* out) {
                size_t x = get_global_id(0), y = get_global_id(1);
                out[y * get_global_size(0) + x] = (int)(y * 10 + x);
            }",
        )
        .unwrap();
        let data = Arc::new(Mutex::new(vec![0u8; 6 * 4]));
        let out = Memory::new("out", ScalarType::Int, data, false);
        run_ndrange(
            &program.kernels[0],
            &[Binding::Global(out.clone())],
            &WorkSize::new([3usize, 2], [1usize, 1]),
        )
        .unwrap();
        let values: Vec<i64> = (0..6).map(|i| out.load(i).unwrap().as_i64()).collect();
        assert_eq!(values, vec![0, 1, 2, 10, 11, 12]);
    }
}
