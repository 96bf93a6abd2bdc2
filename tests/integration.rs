//! End-to-end tests: context, registry, compilation and invocation

use kernelctx::runtime::{BuildStatus, DeviceType, GpuError, MemAccess};
use kernelctx::{
    BufferId, Context, ContextConfig, ElementType, HostArray, KernelArg, KernelError,
    NumericValue, SimulatedDevice, SimulatedPlatform, WorkSize,
};
use pretty_assertions::assert_eq;

const SCALE: &str = r#"
__kernel void scale(__global float* data, const uint n, const float factor)
{
    uint i = get_global_id(0);
    if (i < n) {
        data[i] = data[i] * factor;
    }
}
"#;

const FILL_2D: &str = r#"
__kernel void fill(__global int* out, const uint width)
{
    uint x = get_global_id(0);
    uint y = get_global_id(1);
    out[y * width + x] = (int)(y * 10 + x);
}
"#;

const GROUP_SUM: &str = r#"
__kernel void group_sum(__global const int* in, __global int* out)
{
    __local int tile[4];
    uint lid = get_local_id(0);
    tile[lid] = in[get_global_id(0)];
    barrier(CLK_LOCAL_MEM_FENCE);
    if (lid == 0) {
        out[get_group_id(0)] = tile[0] + tile[1] + tile[2] + tile[3];
    }
}
"#;

#[test]
fn test_transfer_round_trip_for_every_element_type() {
    let mut ctx = Context::new().unwrap();
    let values = [0.0, 1.0, 2.0, 100.0, 7.0];
    for ty in ElementType::ALL {
        let data = HostArray::from_f64s(ty, &values);
        let handle = ctx.transfer_to_device(&data).unwrap();
        let meta = ctx.buffer_meta(handle).copied().unwrap();
        assert_eq!(meta.element_type, ty);
        assert_eq!(meta.len, 5);
        assert_eq!(meta.access, MemAccess::ReadWrite);
        assert_eq!(meta.byte_len(), 5 * ty.byte_width());
        assert_eq!(ctx.transfer_from_device(handle, None).unwrap(), data);
    }
    assert_eq!(ctx.registered_buffers(), ElementType::ALL.len());
}

#[test]
fn test_transfer_into_explicit_destination() {
    let mut ctx = Context::new().unwrap();
    let handle = ctx
        .transfer_to_device(&HostArray::from(vec![1u32, 2, 3, 4]))
        .unwrap();
    // a shorter destination reads a prefix
    let out = ctx
        .transfer_from_device(handle, Some(HostArray::zeros(ElementType::Uint32, 2)))
        .unwrap();
    assert_eq!(out, HostArray::from(vec![1u32, 2]));

    let empty = ctx
        .transfer_from_device(handle, Some(HostArray::zeros(ElementType::Uint32, 0)))
        .unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_unregistered_buffer_needs_destination() {
    let mut ctx = Context::new().unwrap();
    let err = ctx.transfer_from_device(BufferId(4242), None).unwrap_err();
    assert!(matches!(err, KernelError::UnknownBufferType(BufferId(4242))));
}

#[test]
fn test_released_buffer_is_forgotten() {
    let mut ctx = Context::new().unwrap();
    let handle = ctx
        .transfer_to_device(&HostArray::from(vec![1.0f32]))
        .unwrap();
    ctx.release(handle).unwrap();
    assert!(ctx.buffer_meta(handle).is_none());
    assert!(matches!(
        ctx.transfer_from_device(handle, None),
        Err(KernelError::UnknownBufferType(_))
    ));
    assert!(matches!(
        ctx.release(handle),
        Err(KernelError::Device(GpuError::InvalidBuffer(_)))
    ));
}

#[test]
fn test_allocate_is_zero_filled() {
    let mut ctx = Context::new().unwrap();
    let handle = ctx.allocate(ElementType::Int8, 3).unwrap();
    assert_eq!(
        ctx.transfer_from_device(handle, None).unwrap(),
        HostArray::from(vec![0i8, 0, 0])
    );
}

#[test]
fn test_invoke_with_typed_and_untyped_scalars() {
    let mut ctx = Context::new().unwrap();
    let kernel = ctx.compile(SCALE, "scale").unwrap();
    assert_eq!(kernel.param_count(), 3);

    let data = ctx
        .transfer_to_device(&HostArray::from(vec![1.0f32, 2.0, 3.0]))
        .unwrap();
    kernel
        .invoke(
            &mut ctx,
            (4usize, 2usize),
            &[
                data.into(),
                NumericValue::uint32(3).into(),
                NumericValue::float(2.0).into(),
            ],
        )
        .unwrap();
    kernel
        .invoke(
            &mut ctx,
            WorkSize::covering(3, 4),
            &[data.into(), NumericValue::labeled(3.0, "Uint32"), KernelArg::Untyped(0.5)],
        )
        .unwrap();
    assert_eq!(
        ctx.transfer_from_device(data, None).unwrap(),
        HostArray::from(vec![1.0f32, 2.0, 3.0])
    );
}

#[test]
fn test_invoke_rejects_wrong_scalar_width() {
    let mut ctx = Context::new().unwrap();
    let kernel = ctx.compile(SCALE, "scale").unwrap();
    let data = ctx.transfer_to_device(&HostArray::from(vec![1.0f32])).unwrap();
    let err = kernel
        .invoke(
            &mut ctx,
            WorkSize::covering(1, 1),
            &[data.into(), NumericValue::uint16(1).into(), 1.0f32.into()],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Device(GpuError::InvalidArgSize {
            index: 1,
            given: 2,
            expected: 4
        })
    ));
}

#[test]
fn test_invoke_rejects_bad_work_size() {
    let mut ctx = Context::new().unwrap();
    let kernel = ctx.compile(SCALE, "scale").unwrap();
    let data = ctx.transfer_to_device(&HostArray::from(vec![1.0f32])).unwrap();
    let args: [KernelArg; 3] = [data.into(), 1u32.into(), 1.0f32.into()];

    let err = kernel.invoke(&mut ctx, WorkSize::new(5usize, 2usize), &args).unwrap_err();
    assert!(matches!(err, KernelError::Device(GpuError::InvalidWorkSize(_))));

    let err = kernel
        .invoke(&mut ctx, WorkSize::new([4usize, 4], 2usize), &args)
        .unwrap_err();
    assert!(matches!(err, KernelError::Device(GpuError::InvalidWorkSize(_))));
}

#[test]
fn test_unset_argument_reported() {
    let mut ctx = Context::new().unwrap();
    let kernel = ctx.compile(SCALE, "scale").unwrap();
    let data = ctx.transfer_to_device(&HostArray::from(vec![1.0f32])).unwrap();
    let err = kernel.invoke(&mut ctx, WorkSize::covering(1, 1), &[data.into()]).unwrap_err();
    assert!(matches!(err, KernelError::Device(GpuError::ArgNotSet(1))));
}

#[test]
fn test_two_dimensional_dispatch() {
    let mut ctx = Context::new().unwrap();
    let kernel = ctx.compile(FILL_2D, "fill").unwrap();
    let out = ctx.allocate(ElementType::Int32, 6).unwrap();
    kernel
        .invoke(&mut ctx, ([3usize, 2], [1usize, 2]), &[out.into(), 3u32.into()])
        .unwrap();
    assert_eq!(
        ctx.transfer_from_device(out, None).unwrap(),
        HostArray::from(vec![0i32, 1, 2, 10, 11, 12])
    );
}

#[test]
fn test_barrier_kernel_sums_groups() {
    let mut ctx = Context::new().unwrap();
    let kernel = ctx.compile(GROUP_SUM, "group_sum").unwrap();
    let input = ctx
        .transfer_to_device(&HostArray::from((1..=8).collect::<Vec<i32>>()))
        .unwrap();
    let out = ctx.allocate(ElementType::Int32, 2).unwrap();
    kernel
        .invoke(&mut ctx, WorkSize::covering(8, 4), &[input.into(), out.into()])
        .unwrap();
    assert_eq!(
        ctx.transfer_from_device(out, None).unwrap(),
        HostArray::from(vec![10i32, 26])
    );
}

#[test]
fn test_build_failure_carries_status_and_log() {
    let mut ctx = Context::new().unwrap();
    let source = "__kernel void broken(__global int* out)\n{\n    out[0] = missing;\n}\n";
    let err = ctx.compile(source, "broken").unwrap_err();
    match err {
        KernelError::BuildFailure { entry, status, log } => {
            assert_eq!(entry, "broken");
            assert_eq!(status, BuildStatus::Error);
            assert!(log.contains("missing"), "{}", log);
            assert!(log.contains("kernel.cl:3:"), "{}", log);
        }
        other => panic!("expected build failure, got {:?}", other),
    }
}

#[test]
fn test_commented_source_builds() {
    let mut ctx = Context::new().unwrap();
    let source = "/* doubles the first element */\n\
                  __kernel void twice(__global int* out) /* one item */\n\
                  {\n    out[0] = out[0] * 2; // in place\n}\n";
    let kernel = ctx.compile(source, "twice").unwrap();
    let out = ctx.transfer_to_device(&HostArray::from(vec![21i32])).unwrap();
    kernel
        .invoke(&mut ctx, WorkSize::covering(1, 1), &[out.into()])
        .unwrap();
    assert_eq!(
        ctx.transfer_from_device(out, None).unwrap(),
        HostArray::from(vec![42i32])
    );
}

#[test]
fn test_unknown_entry_point() {
    let mut ctx = Context::new().unwrap();
    let err = ctx.compile(SCALE, "shift").unwrap_err();
    assert!(matches!(
        err,
        KernelError::Device(GpuError::KernelNotFound(ref name)) if name == "shift"
    ));
}

#[test]
fn test_missing_device_type() {
    let config = ContextConfig::builder()
        .device_type(DeviceType::Accelerator)
        .build()
        .unwrap();
    let err = Context::with_config(config).unwrap_err();
    assert!(matches!(err, KernelError::UnsupportedEnvironment(_)));
}

#[test]
fn test_context_on_custom_device() {
    let mut info = SimulatedDevice::default_info();
    info.name = "Small Device".to_string();
    info.device_type = DeviceType::Gpu;
    info.max_work_group_size = 8;

    let platform = SimulatedPlatform::with_devices(vec![info]);
    let config = ContextConfig::builder()
        .device_type(DeviceType::Gpu)
        .local_size(8)
        .build()
        .unwrap();
    let mut ctx = Context::with_platform(&platform, config).unwrap();
    assert_eq!(ctx.device_info().name, "Small Device");

    let sum = ctx
        .reduce(&HostArray::from(vec![1u32; 100]), "a + b", None, None)
        .unwrap();
    assert_eq!(sum, 100.0);

    // larger than the device allows
    let err = ctx
        .reduce(&HostArray::from(vec![1u32; 100]), "a + b", None, Some(16))
        .unwrap_err();
    assert!(matches!(err, KernelError::Device(GpuError::InvalidWorkSize(_))));
    assert_eq!(ctx.registered_buffers(), 0);
}

#[test]
fn test_with_device_wraps_open_device() {
    let device = Box::new(SimulatedDevice::new(SimulatedDevice::default_info()));
    let mut ctx = Context::with_device(device, ContextConfig::default()).unwrap();
    let out = ctx
        .map(&["x"], "-x[i]", &[HostArray::from(vec![1i8, -2])])
        .unwrap();
    assert_eq!(out, HostArray::from(vec![-1i8, 2]));
}

#[test]
fn test_config_from_toml_drives_defaults() {
    let config = ContextConfig::from_toml_str(
        r#"
local_size = 4
log_kernel_source = true
"#,
    )
    .unwrap();
    let mut ctx = Context::with_config(config).unwrap();
    let kernel = ctx
        .reduction_kernel(ElementType::Float32, "a + b", None, None)
        .unwrap();
    assert_eq!(kernel.local_size(), 4);
    assert_eq!(kernel.base(), "0");
}
