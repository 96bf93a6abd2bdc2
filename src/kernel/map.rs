//! Element-wise map kernels
//!
//! A map kernel evaluates one expression per index `i` over any number of
//! named input buffers and stores it in `result[i]`. Inside the expression
//! the inputs are visible as pointers under their given names, so
//! `x[i] * y[i]` multiplies two inputs element-wise.

use tracing::{debug, warn};

use super::template::{KernelTemplate, Placeholder, Substitutions};
use super::{Kernel, KernelArg};
use crate::context::Context;
use crate::error::{KernelError, Result};
use crate::lexer::{TokenKind, lex};
use crate::runtime::{BufferId, WorkSize};
use crate::types::{ElementType, HostArray, NumericValue};

pub const MAP_ENTRY: &str = "map";

pub const MAP_SOURCE: &str = r#"__kernel void map($ARGS)
{
    uint i = get_global_id(0);
    if (i < length) {
        result[i] = $OP;
    }
}
"#;

/// Names the generated kernel already declares
const RESERVED_NAMES: [&str; 3] = ["result", "length", "i"];

fn validate_names(names: &[&str]) -> Result<()> {
    for (index, name) in names.iter().enumerate() {
        let is_ident = matches!(
            lex(name).as_deref(),
            Ok([ident, eof]) if ident.kind == TokenKind::Ident && eof.kind == TokenKind::Eof
        );
        if !is_ident {
            return Err(KernelError::invalid_argument(format!(
                "map argument name `{}` is not an identifier",
                name
            )));
        }
        if RESERVED_NAMES.contains(name) {
            return Err(KernelError::invalid_argument(format!(
                "map argument name `{}` is reserved",
                name
            )));
        }
        if names[..index].contains(name) {
            return Err(KernelError::invalid_argument(format!(
                "duplicate map argument name `{}`",
                name
            )));
        }
    }
    Ok(())
}

/// Parameter list: the result buffer, the element count, then one read-only
/// buffer per input name
fn parameter_list(ty: ElementType, names: &[&str]) -> String {
    let device_type = ty.device_type();
    let mut params = vec![
        format!("__global {}* result", device_type),
        "const uint length".to_string(),
    ];
    params.extend(
        names
            .iter()
            .map(|name| format!("__global const {}* {}", device_type, name)),
    );
    params.join(", ")
}

/// A compiled element-wise kernel
#[derive(Debug, Clone)]
pub struct MapKernel {
    kernel: Kernel,
    element_type: ElementType,
    arg_names: Vec<String>,
    local_size: usize,
}

impl MapKernel {
    pub(crate) fn build(
        ctx: &mut Context,
        element_type: ElementType,
        names: &[&str],
        expr: &str,
        local_size: usize,
    ) -> Result<Self> {
        validate_names(names)?;
        if local_size == 0 {
            return Err(KernelError::invalid_argument("map work-group size must be > 0"));
        }

        let template = KernelTemplate::new(MAP_SOURCE)?;
        let substitutions = Substitutions::new()
            .with(Placeholder::Args, parameter_list(element_type, names))
            .with(Placeholder::Op, expr);
        let kernel = ctx.compile_template(&template, &substitutions, MAP_ENTRY)?;

        Ok(Self {
            kernel,
            element_type,
            arg_names: names.iter().map(|n| n.to_string()).collect(),
            local_size,
        })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Enqueue the map over `length` elements
    ///
    /// Without a `result` buffer one is allocated and registered with the
    /// kernel's element type and `length` elements. Returns the buffer that
    /// receives the output; the dispatch is not waited on.
    pub fn run(
        &self,
        ctx: &mut Context,
        result: Option<BufferId>,
        length: usize,
        inputs: &[BufferId],
    ) -> Result<BufferId> {
        if inputs.len() != self.arg_names.len() {
            return Err(KernelError::invalid_argument(format!(
                "map kernel takes {} input buffers, got {}",
                self.arg_names.len(),
                inputs.len()
            )));
        }
        if length == 0 {
            return Err(KernelError::invalid_argument("cannot map over zero elements"));
        }
        let count = u32::try_from(length).map_err(|_| {
            KernelError::invalid_argument(format!("map length {} exceeds u32 range", length))
        })?;

        let (target, owned) = match result {
            Some(handle) => (handle, false),
            None => (ctx.allocate(self.element_type, length)?, true),
        };

        let mut args: Vec<KernelArg> = Vec::with_capacity(inputs.len() + 2);
        args.push(target.into());
        args.push(NumericValue::uint32(count).into());
        args.extend(inputs.iter().map(|&input| KernelArg::from(input)));

        let work = WorkSize::covering(length, self.local_size);
        if let Err(err) = self.kernel.invoke(ctx, work, &args) {
            if owned && let Err(release_err) = ctx.release(target) {
                warn!(buffer = %target, error = %release_err, "failed to release map result");
            }
            return Err(err);
        }
        debug!(length, inputs = inputs.len(), result = %target, "enqueued map");
        Ok(target)
    }
}

impl Context {
    /// Build an element-wise kernel over inputs named `names`
    ///
    /// `expr` is pasted into the kernel body unchanged and may refer to the
    /// inputs, the index `i` and the element count `length`.
    pub fn map_kernel(
        &mut self,
        element_type: ElementType,
        names: &[&str],
        expr: &str,
        local_size: Option<usize>,
    ) -> Result<MapKernel> {
        let local_size = local_size.unwrap_or(self.config().local_size);
        MapKernel::build(self, element_type, names, expr, local_size)
    }

    /// Map `expr` over host arrays and read the result back
    ///
    /// Element type and length come from the first array; every array must
    /// match them. The kernel and device buffers created here are released
    /// before returning.
    pub fn map(&mut self, names: &[&str], expr: &str, arrays: &[HostArray]) -> Result<HostArray> {
        if names.len() != arrays.len() {
            return Err(KernelError::invalid_argument(format!(
                "{} argument names for {} arrays",
                names.len(),
                arrays.len()
            )));
        }
        let Some(first) = arrays.first() else {
            return Err(KernelError::invalid_argument("map needs at least one input array"));
        };
        let (element_type, length) = (first.element_type(), first.len());
        for (name, array) in names.iter().zip(arrays) {
            if array.element_type() != element_type || array.len() != length {
                return Err(KernelError::invalid_argument(format!(
                    "array `{}` is {} x {}, expected {} x {}",
                    name,
                    array.element_type(),
                    array.len(),
                    element_type,
                    length
                )));
            }
        }

        let kernel = self.map_kernel(element_type, names, expr, None)?;
        let outcome = if length == 0 {
            Ok(HostArray::zeros(element_type, 0))
        } else {
            let mut transients = Vec::with_capacity(arrays.len() + 1);
            let outcome = self.map_arrays(&kernel, arrays, &mut transients);
            for handle in transients {
                if let Err(err) = self.release(handle) {
                    warn!(buffer = %handle, error = %err, "failed to release map buffer");
                }
            }
            outcome
        };
        if let Err(err) = self.release_kernel(kernel.kernel()) {
            warn!(error = %err, "failed to release map kernel");
        }
        outcome
    }

    fn map_arrays(
        &mut self,
        kernel: &MapKernel,
        arrays: &[HostArray],
        transients: &mut Vec<BufferId>,
    ) -> Result<HostArray> {
        let mut inputs = Vec::with_capacity(arrays.len());
        for array in arrays {
            let handle = self.transfer_to_device(array)?;
            transients.push(handle);
            inputs.push(handle);
        }
        let length = arrays.first().map_or(0, HostArray::len);
        let result = kernel.run(self, None, length, &inputs)?;
        transients.push(result);
        self.transfer_from_device(result, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_list() {
        assert_eq!(
            parameter_list(ElementType::Int16, &["x", "y"]),
            "__global short* result, const uint length, __global const short* x, __global const short* y"
        );
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_names(&["x", "y_2"]).is_ok());
        assert!(validate_names(&["2x"]).is_err());
        assert!(validate_names(&["x y"]).is_err());
        assert!(validate_names(&["float"]).is_err());
        assert!(validate_names(&["length"]).is_err());
        assert!(validate_names(&["a", "a"]).is_err());
    }

    #[test]
    fn test_add_one() {
        let mut ctx = Context::new().unwrap();
        let out = ctx
            .map(&["x"], "x[i] + 1", &[HostArray::from(vec![5.0f32, 9.0, 2.0])])
            .unwrap();
        assert_eq!(out, HostArray::from(vec![6.0f32, 10.0, 3.0]));
        assert_eq!(ctx.registered_buffers(), 0);
    }
}
