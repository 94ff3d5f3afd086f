//! Integration tests exercising the host and device operation sets together

use rand::rngs::StdRng;
use rand::SeedableRng;
use tensorlib::tensor::{cpu, gpu};
use tensorlib::{Device, DeviceConfig, DeviceError, ErrorKind, Residency, Tensor, TensorError};

fn test_device() -> Device {
    Device::new(
        DeviceConfig::builtin()
            .with_memory_limit(64 << 20)
            .with_block_size(32)
            .with_workers(4),
    )
    .expect("device runtime")
}

fn seeded(rows: usize, cols: usize, seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    Tensor::uniform_with_rng(rows, cols, -2.0, 2.0, &mut rng)
}

fn on_device(t: &Tensor, device: &Device) -> Tensor {
    let mut d = t.copy().unwrap();
    d.to_device_on(device).unwrap();
    d
}

fn fetch(mut t: Tensor) -> Vec<f32> {
    t.to_host().unwrap();
    t.to_vec().unwrap()
}

fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol * (1.0 + e.abs()),
            "element {i}: {a} vs {e}"
        );
    }
}

// ============================================================================
// Residency
// ============================================================================

#[test]
fn test_round_trip_preserves_bits() {
    let device = test_device();
    let source = seeded(17, 33, 1);
    let mut t = source.copy().unwrap();

    t.to_device_on(&device).unwrap();
    assert_eq!(t.residency(), Residency::Device);
    t.to_host().unwrap();

    let before: Vec<u32> = source.as_slice().unwrap().iter().map(|x| x.to_bits()).collect();
    let after: Vec<u32> = t.as_slice().unwrap().iter().map(|x| x.to_bits()).collect();
    assert_eq!(before, after);
}

#[test]
fn test_global_device_transfer() {
    let mut t = Tensor::full(3, 3, 2.5);
    t.to_device().unwrap();
    assert!(t.is_device_resident());
    assert!(t.device().unwrap().same_device(&Device::global().unwrap()));

    let doubled = t.add(&t).unwrap();
    assert_eq!(fetch(doubled), vec![5.0; 9]);
}

#[test]
fn test_wrong_residency_is_rejected_both_ways() {
    let device = test_device();
    let host = Tensor::zeros(2, 2);
    let dev = on_device(&host, &device);

    assert_eq!(cpu::exp(&dev).unwrap_err().kind(), ErrorKind::Residency);
    assert_eq!(gpu::exp(&host).unwrap_err().kind(), ErrorKind::Residency);
    assert_eq!(dev.export_copy().unwrap_err().kind(), ErrorKind::Residency);
}

#[test]
fn test_device_validation_allocates_nothing() {
    let device = test_device();
    let a = on_device(&Tensor::zeros(2, 3), &device);
    let b = on_device(&Tensor::zeros(3, 3), &device);
    let before = device.allocated_bytes();

    assert_eq!(gpu::add(&a, &b).unwrap_err().kind(), ErrorKind::Shape);
    assert_eq!(gpu::sum(&a, 5).unwrap_err().kind(), ErrorKind::Axis);
    assert_eq!(gpu::broadcast(&a, 0, 4).unwrap_err().kind(), ErrorKind::Axis);
    assert_eq!(gpu::matmul(&b, &a).unwrap_err().kind(), ErrorKind::Shape);
    assert_eq!(device.allocated_bytes(), before);
}

#[test]
fn test_device_memory_is_returned() {
    let device = test_device();
    {
        let a = on_device(&seeded(8, 8, 2), &device);
        let b = a.matmul(&a).unwrap();
        let (v, i) = b.max(1).unwrap();
        let _ = b.axial_mask(&i, 1).unwrap();
        let _ = v.broadcast(1, 8).unwrap();
        assert!(device.allocated_bytes() > 0);
    }
    assert_eq!(device.allocated_bytes(), 0);
}

#[test]
fn test_out_of_memory_is_a_device_error() {
    let device = Device::new(DeviceConfig::builtin().with_memory_limit(1024)).unwrap();
    let mut big = Tensor::zeros(32, 32);
    let err = big.to_device_on(&device).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(matches!(
        err,
        TensorError::Device(DeviceError::OutOfMemory {
            requested: 4096,
            ..
        })
    ));
}

// ============================================================================
// Algebraic properties
// ============================================================================

#[test]
fn test_add_neg_is_zero_on_both_sets() {
    let device = test_device();
    let a = seeded(6, 7, 3);
    assert!(a.add(&a.neg().unwrap()).unwrap().to_vec().unwrap().iter().all(|&x| x == 0.0));

    let d = on_device(&a, &device);
    let zeros = fetch(d.add(&d.neg().unwrap()).unwrap());
    assert!(zeros.iter().all(|&x| x == 0.0));
}

#[test]
fn test_double_transpose_is_identity() {
    let device = test_device();
    let a = seeded(5, 9, 4);
    let back = a.transpose().unwrap().transpose().unwrap();
    assert_eq!(back.shape(), a.shape());
    assert_eq!(back.to_vec().unwrap(), a.to_vec().unwrap());

    let d = on_device(&a, &device);
    let back = d.transpose().unwrap().transpose().unwrap();
    assert_eq!(fetch(back), a.to_vec().unwrap());
}

#[test]
fn test_matmul_matches_definition() {
    let device = test_device();
    let (m, k, n) = (7, 5, 3);
    let a = seeded(m, k, 5);
    let b = seeded(k, n, 6);

    let (av, bv) = (a.to_vec().unwrap(), b.to_vec().unwrap());
    let mut expected = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            expected[i * n + j] = (0..k).map(|p| av[i * k + p] * bv[p * n + j]).sum();
        }
    }

    let host = a.matmul(&b).unwrap();
    assert_eq!(host.shape(), [m, n]);
    assert_close(&host.to_vec().unwrap(), &expected, 1e-5);

    let dev = on_device(&a, &device).matmul(&on_device(&b, &device)).unwrap();
    assert_close(&fetch(dev), &expected, 1e-5);
}

#[test]
fn test_reduction_routing() {
    let device = test_device();
    let a = seeded(6, 4, 7);

    for axis in [0, 1] {
        let other = 1 - axis;
        let extent = a.shape()[axis];
        let (values, indices) = a.max(axis).unwrap();

        let routed = a.axial_mask(&indices, axis).unwrap();
        // Exactly one survivor per slice
        let nonzero = routed.to_vec().unwrap().iter().filter(|&&x| x != 0.0).count();
        assert_eq!(nonzero, a.shape()[other]);

        let summed = routed.sum(axis).unwrap();
        assert_eq!(summed.to_vec().unwrap(), values.to_vec().unwrap());

        let spread = values.broadcast(axis, extent).unwrap();
        let from_values = spread.axial_mask(&indices, axis).unwrap();
        assert_eq!(from_values.to_vec().unwrap(), routed.to_vec().unwrap());

        // Same routing on the device
        let d = on_device(&a, &device);
        let (dv, di) = d.max(axis).unwrap();
        let droute = d.axial_mask(&di, axis).unwrap();
        let dspread = dv.broadcast(axis, extent).unwrap().axial_mask(&di, axis).unwrap();
        assert_eq!(fetch(dspread), routed.to_vec().unwrap());
        assert_eq!(fetch(droute), routed.to_vec().unwrap());
    }
}

// ============================================================================
// Host/device parity
// ============================================================================

#[test]
fn test_sets_agree_on_every_operation() {
    let device = test_device();
    let a = seeded(9, 13, 8);
    let b = seeded(9, 13, 9);
    let positive = Tensor::uniform_with_rng(9, 13, 0.1, 3.0, &mut StdRng::seed_from_u64(10));
    let (da, db, dp) = (
        on_device(&a, &device),
        on_device(&b, &device),
        on_device(&positive, &device),
    );

    let pairs: Vec<(&str, Tensor, Tensor)> = vec![
        ("add", a.add(&b).unwrap(), da.add(&db).unwrap()),
        ("sub", a.sub(&b).unwrap(), da.sub(&db).unwrap()),
        ("mul", a.mul(&b).unwrap(), da.mul(&db).unwrap()),
        ("div", a.div(&positive).unwrap(), da.div(&dp).unwrap()),
        ("neg", a.neg().unwrap(), da.neg().unwrap()),
        ("exp", a.exp().unwrap(), da.exp().unwrap()),
        ("log", positive.log().unwrap(), dp.log().unwrap()),
        ("pow", positive.pow(1.5).unwrap(), dp.pow(1.5).unwrap()),
        ("relu", a.relu().unwrap(), da.relu().unwrap()),
        ("relu_grad", a.relu_grad(&b).unwrap(), da.relu_grad(&db).unwrap()),
        ("transpose", a.transpose().unwrap(), da.transpose().unwrap()),
        (
            "matmul",
            a.matmul(&b.transpose().unwrap()).unwrap(),
            da.matmul(&db.transpose().unwrap()).unwrap(),
        ),
        ("sum0", a.sum(0).unwrap(), da.sum(0).unwrap()),
        ("sum1", a.sum(1).unwrap(), da.sum(1).unwrap()),
        ("copy", a.copy().unwrap(), da.copy().unwrap()),
    ];

    for (name, host, dev) in pairs {
        assert_eq!(host.shape(), dev.shape(), "{name}");
        assert!(dev.is_device_resident(), "{name}");
        assert_eq!(host.to_vec().unwrap(), fetch(dev), "{name}");
    }

    for axis in [0, 1] {
        let (hv, hi) = a.max(axis).unwrap();
        let (dv, di) = da.max(axis).unwrap();
        assert_eq!(hv.to_vec().unwrap(), fetch(dv));
        assert_eq!(hi.to_vec().unwrap(), fetch(di.copy().unwrap()));

        let hm = a.axial_mask(&hi, axis).unwrap();
        let dm = da.axial_mask(&di, axis).unwrap();
        assert_eq!(hm.to_vec().unwrap(), fetch(dm));
    }

    let mut hz = a.copy().unwrap();
    let mut dz = da.copy().unwrap();
    hz.set_zero().unwrap();
    dz.set_zero().unwrap();
    assert_eq!(hz.to_vec().unwrap(), fetch(dz));
}

// ============================================================================
// Forward expression
// ============================================================================

/// `(a+b)*(a*b) + c + d + c*d + e + c*d` with explicit broadcasts, reduced to 1x1
fn forward(a: &Tensor, b: &Tensor, c: &Tensor, d: &Tensor, e: &Tensor) -> Tensor {
    let [rows, cols] = a.shape();
    let c_full = c.broadcast(1, cols).unwrap();
    let d_col = d.broadcast(0, rows).unwrap();
    let d_full = d_col.broadcast(1, cols).unwrap();
    let cd_full = c.mul(&d_col).unwrap().broadcast(1, cols).unwrap();
    let e_full = e.broadcast(0, rows).unwrap();

    let z = a.add(b).unwrap().mul(&a.mul(b).unwrap()).unwrap();
    let z = z.add(&c_full).unwrap();
    let z = z.add(&d_full).unwrap();
    let z = z.add(&cd_full).unwrap();
    let z = z.add(&e_full).unwrap();
    let z = z.add(&cd_full).unwrap();
    z.sum(0).unwrap().sum(1).unwrap()
}

#[test]
fn test_forward_expression_on_both_sets() {
    let device = test_device();
    let mut rng = StdRng::seed_from_u64(42);
    let a = Tensor::uniform_with_rng(4, 5, 0.0, 1.0, &mut rng);
    let b = Tensor::uniform_with_rng(4, 5, 0.0, 1.0, &mut rng);
    let c = Tensor::uniform_with_rng(4, 1, 0.0, 1.0, &mut rng);
    let d = Tensor::uniform_with_rng(1, 1, 0.0, 1.0, &mut rng);
    let e = Tensor::uniform_with_rng(1, 5, 0.0, 1.0, &mut rng);

    // Reference computed directly from the inputs
    let (av, bv, cv, dv, ev) = (
        a.to_vec().unwrap(),
        b.to_vec().unwrap(),
        c.to_vec().unwrap(),
        d.to_vec().unwrap(),
        e.to_vec().unwrap(),
    );
    let mut expected = 0.0f64;
    for r in 0..4 {
        for col in 0..5 {
            let (x, y) = (av[r * 5 + col] as f64, bv[r * 5 + col] as f64);
            let (cc, dd, ee) = (cv[r] as f64, dv[0] as f64, ev[col] as f64);
            expected += (x + y) * (x * y) + cc + dd + cc * dd + ee + cc * dd;
        }
    }

    let host = forward(&a, &b, &c, &d, &e);
    assert_eq!(host.shape(), [1, 1]);
    let host_value = host.to_vec().unwrap()[0];
    assert!(((host_value as f64) - expected).abs() < 1e-3, "{host_value} vs {expected}");

    let dev = forward(
        &on_device(&a, &device),
        &on_device(&b, &device),
        &on_device(&c, &device),
        &on_device(&d, &device),
        &on_device(&e, &device),
    );
    assert!(dev.is_device_resident());
    assert_eq!(fetch(dev), vec![host_value]);
}

#[test]
fn test_export_copy_is_independent() {
    let a = seeded(3, 4, 11);
    let exported = a.export_copy().unwrap();
    assert_eq!(exported.shape, [3, 4]);
    assert_eq!(exported.strides, [16, 4]);

    let mut b = a.copy().unwrap();
    b.set_zero().unwrap();
    assert_eq!(exported.data, a.to_vec().unwrap());
}
