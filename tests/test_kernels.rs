// tests/test_kernels.rs — Program loading and dispatch validation.

mod common;

use tilestat::gpu::{ComputeProgram, DeviceBuffer, GpuError, Kernel, Program, Slot};
use tilestat::math::{Mat4, Vec4};

#[test]
fn shipped_programs_compile() {
    let Some(gpu) = common::gpu() else { return };
    for program in [Program::Statistics, Program::Reduction] {
        let compiled = ComputeProgram::load(&gpu, program).unwrap();
        assert_eq!(compiled.name(), program.name());
        for &k in program.kernels() {
            assert_eq!(compiled.find_kernel(k.name()).unwrap(), k);
        }
    }
}

#[test]
fn unknown_program_is_unavailable() {
    let Some(gpu) = common::gpu() else { return };
    match ComputeProgram::load_by_name(&gpu, "histogram") {
        Err(GpuError::ShaderUnavailable { program, .. }) => assert_eq!(program, "histogram"),
        Err(e) => panic!("expected ShaderUnavailable, got {e}"),
        Ok(_) => panic!("expected ShaderUnavailable"),
    }
}

#[test]
fn missing_entry_point_is_unavailable() {
    let Some(gpu) = common::gpu() else { return };
    // The statistics source has no accumulate_x4.
    let result = ComputeProgram::from_source(
        &gpu,
        "mislabelled",
        Program::Statistics.source(),
        &[Kernel::AccumulateX4],
    );
    match result {
        Err(GpuError::ShaderUnavailable { program, kernel, .. }) => {
            assert_eq!(program, "mislabelled");
            assert_eq!(kernel, "AccumulateX4");
        }
        Err(e) => panic!("expected ShaderUnavailable, got {e}"),
        Ok(_) => panic!("expected ShaderUnavailable"),
    }
}

#[test]
fn invalid_wgsl_is_unavailable() {
    let Some(gpu) = common::gpu() else { return };
    let result = ComputeProgram::from_source(&gpu, "broken", "fn sum( {", &[Kernel::Sum]);
    assert!(matches!(result, Err(GpuError::ShaderUnavailable { .. })));
}

#[test]
fn kernel_outside_program_is_unavailable() {
    let Some(gpu) = common::gpu() else { return };
    let reduction = ComputeProgram::load(&gpu, Program::Reduction).unwrap();
    assert!(matches!(
        reduction.find_kernel("Sum"),
        Err(GpuError::ShaderUnavailable { .. })
    ));
    assert!(matches!(
        reduction.find_kernel("Median"),
        Err(GpuError::ShaderUnavailable { .. })
    ));
    assert!(reduction.dispatch(Kernel::Covariance).is_err());
}

#[test]
fn unbound_slot_is_reported() {
    let Some(gpu) = common::gpu() else { return };
    let reduction = ComputeProgram::load(&gpu, Program::Reduction).unwrap();
    let input = DeviceBuffer::with_elements::<Vec4>(&gpu, 4, "input").unwrap();

    let result = reduction
        .dispatch(Kernel::AccumulateX4)
        .unwrap()
        .set_input_size(2, 2)
        .bind_buffer(Slot::Input4, &input)
        .unwrap()
        .submit(&gpu, [1, 1, 1]);
    assert!(matches!(
        result,
        Err(GpuError::UnboundSlot { kernel: "AccumulateX4", slot: "output4" })
    ));
}

#[test]
fn dispatch_over_group_limit_is_rejected() {
    let Some(gpu) = common::gpu() else { return };
    let statistics = ComputeProgram::load(&gpu, Program::Statistics).unwrap();
    let input = DeviceBuffer::with_elements::<Vec4>(&gpu, 4, "in").unwrap();
    let output = DeviceBuffer::with_elements::<Vec4>(&gpu, 4, "out").unwrap();
    let max = gpu.limits().max_compute_workgroups_per_dimension;

    let result = statistics
        .dispatch(Kernel::Multiply4)
        .unwrap()
        .bind_buffer(Slot::Input4, &input)
        .unwrap()
        .bind_buffer(Slot::Output4, &output)
        .unwrap()
        .submit(&gpu, [max + 1, 1, 1]);
    match result {
        Err(GpuError::DispatchTooLarge { kernel: "Multiply4", groups, max: m }) => {
            assert_eq!(groups, [max + 1, 1, 1]);
            assert_eq!(m, max);
        }
        other => panic!("expected DispatchTooLarge, got {other:?}"),
    }
}

#[test]
fn foreign_slot_and_stride_are_rejected() {
    let Some(gpu) = common::gpu() else { return };
    let reduction = ComputeProgram::load(&gpu, Program::Reduction).unwrap();
    let vectors = DeviceBuffer::with_elements::<Vec4>(&gpu, 4, "vectors").unwrap();
    let matrices = DeviceBuffer::with_elements::<Mat4>(&gpu, 4, "matrices").unwrap();

    let dispatch = reduction.dispatch(Kernel::AccumulateX4).unwrap();
    assert!(matches!(
        dispatch.bind_buffer(Slot::ParamBuffer4, &vectors),
        Err(GpuError::UnexpectedSlot { kernel: "AccumulateX4", slot: "param_buf4" })
    ));

    let dispatch = reduction.dispatch(Kernel::AccumulateX4).unwrap();
    assert!(matches!(
        dispatch.bind_buffer(Slot::Input4, &matrices),
        Err(GpuError::StrideMismatch { expected: 16, actual: 64 })
    ));
}
