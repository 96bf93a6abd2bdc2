//! Tree reductions and the multi-pass driver
//!
//! One dispatch of the reduction kernel folds every work-group's slice of
//! the input into a single partial, so a pass over `count` elements leaves
//! `ceil(count / local_size)` partials. The driver repeats passes over the
//! partials until one value is left.
//!
//! Partials alternate between the result buffer and a scratch buffer, so no
//! pass reads the buffer it writes. The starting buffer is picked so that
//! the last pass always writes the result buffer.

use tracing::{debug, trace, warn};

use super::Kernel;
use super::template::{KernelTemplate, Placeholder, Substitutions};
use crate::context::Context;
use crate::error::{KernelError, Result};
use crate::runtime::{BufferId, WorkSize};
use crate::types::{ElementType, HostArray, NumericValue};

pub const REDUCE_ENTRY: &str = "reduce";

/// Identity used when no base is given
pub const DEFAULT_BASE: &str = "0";

pub const REDUCE_SOURCE: &str = r#"__kernel void reduce(__global const $TYPE* buffer, const uint length, __global $TYPE* result)
{
    __local $TYPE scratch[$N];
    uint global_index = get_global_id(0);
    uint local_index = get_local_id(0);

    if (global_index < length) {
        scratch[local_index] = buffer[global_index];
    } else {
        scratch[local_index] = $BASE;
    }
    barrier(CLK_LOCAL_MEM_FENCE);

    for (uint offset = 1; offset < $N; offset <<= 1) {
        uint mask = (offset << 1) - 1;
        if ((local_index & mask) == 0) {
            $TYPE a = scratch[local_index];
            $TYPE b = scratch[local_index + offset];
            scratch[local_index] = $OP;
        }
        barrier(CLK_LOCAL_MEM_FENCE);
    }

    if (local_index == 0) {
        result[get_group_id(0)] = scratch[0];
    }
}
"#;

/// Partials produced by each pass over `length` elements
pub fn pass_plan(length: usize, local_size: usize) -> Vec<usize> {
    let mut plan = Vec::new();
    if length == 0 || local_size < 2 {
        return plan;
    }
    let mut count = length;
    loop {
        let groups = count.div_ceil(local_size);
        plan.push(groups);
        if groups == 1 {
            return plan;
        }
        count = groups;
    }
}

/// Whether pass `pass` of `passes` writes the result buffer
fn writes_result(pass: usize, passes: usize) -> bool {
    (passes - 1 - pass) % 2 == 0
}

/// A compiled reduction over one element type and operator
#[derive(Debug, Clone)]
pub struct ReductionKernel {
    kernel: Kernel,
    element_type: ElementType,
    op: String,
    base: String,
    local_size: usize,
}

impl ReductionKernel {
    pub(crate) fn build(
        ctx: &mut Context,
        element_type: ElementType,
        op: &str,
        base: &str,
        local_size: usize,
    ) -> Result<Self> {
        if local_size < 2 || !local_size.is_power_of_two() {
            return Err(KernelError::InvalidWorkGroupSize(local_size));
        }

        let template = KernelTemplate::new(REDUCE_SOURCE)?;
        let substitutions = Substitutions::new()
            .with(Placeholder::Type, element_type.device_type())
            .with(Placeholder::Op, op)
            .with(Placeholder::N, local_size)
            .with(Placeholder::Base, base);
        let kernel = ctx.compile_template(&template, &substitutions, REDUCE_ENTRY)?;

        Ok(Self {
            kernel,
            element_type,
            op: op.to_string(),
            base: base.to_string(),
            local_size,
        })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Reduce the first `length` elements of `input` to one value
    ///
    /// A given `result` buffer must hold at least as many elements as the
    /// first pass produces; afterwards its element 0 holds the reduced
    /// value. Without one, a temporary is allocated and released again.
    pub fn run(
        &self,
        ctx: &mut Context,
        input: BufferId,
        length: usize,
        result: Option<BufferId>,
    ) -> Result<f64> {
        if length == 0 {
            return Err(KernelError::InvalidReductionLength);
        }
        if length > u32::MAX as usize {
            return Err(KernelError::invalid_argument(format!(
                "reduction length {} exceeds u32 range",
                length
            )));
        }
        if let Some(meta) = ctx.buffer_meta(input) {
            if meta.element_type != self.element_type {
                return Err(KernelError::invalid_argument(format!(
                    "input buffer {} holds {}, kernel reduces {}",
                    input, meta.element_type, self.element_type
                )));
            }
            if meta.len < length {
                return Err(KernelError::invalid_argument(format!(
                    "input buffer {} holds {} elements, {} requested",
                    input, meta.len, length
                )));
            }
        }
        if result == Some(input) {
            return Err(KernelError::invalid_argument(
                "reduction result buffer must differ from the input buffer",
            ));
        }

        let plan = pass_plan(length, self.local_size);
        let passes = plan.len();
        let capacity = |into_result: bool| {
            plan.iter()
                .enumerate()
                .filter(|&(pass, _)| writes_result(pass, passes) == into_result)
                .map(|(_, &groups)| groups)
                .max()
                .unwrap_or(0)
        };
        let (result_len, scratch_len) = (capacity(true), capacity(false));

        if let Some(handle) = result
            && let Some(meta) = ctx.buffer_meta(handle)
            && meta.len < result_len
        {
            return Err(KernelError::invalid_argument(format!(
                "result buffer {} holds {} elements, reduction needs {}",
                handle, meta.len, result_len
            )));
        }

        let mut owned = Vec::with_capacity(2);
        let outcome = self.run_passes(
            ctx,
            input,
            length,
            result,
            &plan,
            result_len,
            scratch_len,
            &mut owned,
        );
        for handle in owned {
            if let Err(err) = ctx.release(handle) {
                warn!(buffer = %handle, error = %err, "failed to release reduction buffer");
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn run_passes(
        &self,
        ctx: &mut Context,
        input: BufferId,
        length: usize,
        result: Option<BufferId>,
        plan: &[usize],
        result_len: usize,
        scratch_len: usize,
        owned: &mut Vec<BufferId>,
    ) -> Result<f64> {
        let result = match result {
            Some(handle) => handle,
            None => {
                let handle = ctx.allocate(self.element_type, result_len)?;
                owned.push(handle);
                handle
            }
        };
        let scratch = if scratch_len > 0 {
            let handle = ctx.allocate(self.element_type, scratch_len)?;
            owned.push(handle);
            Some(handle)
        } else {
            None
        };

        let passes = plan.len();
        let mut source = input;
        let mut count = length;
        for (pass, &groups) in plan.iter().enumerate() {
            let target = match scratch {
                Some(scratch) if !writes_result(pass, passes) => scratch,
                _ => result,
            };
            // count fits in u32: it never exceeds the checked length
            let length_arg = NumericValue::uint32(count as u32);
            self.kernel.invoke(
                ctx,
                WorkSize::covering(count, self.local_size),
                &[source.into(), length_arg.into(), target.into()],
            )?;
            trace!(pass, count, groups, source = %source, target = %target, "reduction pass");
            source = target;
            count = groups;
        }

        let value = ctx
            .transfer_from_device(result, Some(HostArray::zeros(self.element_type, 1)))?
            .get(0)
            .unwrap_or_default();
        debug!(length, passes, op = %self.op, value, "reduced");
        Ok(value)
    }
}

impl Context {
    /// Build a reduction kernel
    ///
    /// `op` combines two scratch values named `a` and `b`; `base` is its
    /// identity (default `"0"`). The work-group size defaults to the
    /// configured one and must be a power of two of at least 2.
    pub fn reduction_kernel(
        &mut self,
        element_type: ElementType,
        op: &str,
        base: Option<&str>,
        local_size: Option<usize>,
    ) -> Result<ReductionKernel> {
        let local_size = local_size.unwrap_or(self.config().local_size);
        ReductionKernel::build(self, element_type, op, base.unwrap_or(DEFAULT_BASE), local_size)
    }

    /// Reduce a host array to one value
    pub fn reduce(
        &mut self,
        data: &HostArray,
        op: &str,
        base: Option<&str>,
        local_size: Option<usize>,
    ) -> Result<f64> {
        if data.is_empty() {
            return Err(KernelError::InvalidReductionLength);
        }
        let kernel = self.reduction_kernel(data.element_type(), op, base, local_size)?;
        let outcome = match self.transfer_to_device(data) {
            Ok(input) => {
                let outcome = kernel.run(self, input, data.len(), None);
                if let Err(err) = self.release(input) {
                    warn!(buffer = %input, error = %err, "failed to release reduction input");
                }
                outcome
            }
            Err(err) => Err(err),
        };
        if let Err(err) = self.release_kernel(kernel.kernel()) {
            warn!(error = %err, "failed to release reduction kernel");
        }
        outcome
    }
}
