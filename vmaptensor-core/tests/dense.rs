use vmaptensor_core::{Error, MemoryFormat, Tensor};

#[test]
fn from_vec_checks_len() {
    let err = Tensor::<f32>::from_vec(vec![1.0; 5], &[2, 3]).unwrap_err();
    assert_eq!(
        err,
        Error::ShapeMismatch {
            shape: vec![2, 3],
            expected: 6,
            got: 5
        }
    );
}

#[test]
fn contiguous_metadata() {
    let x = Tensor::<f32>::zeros(&[2, 3, 4]);
    assert_eq!(x.strides().unwrap(), &[12, 4, 1]);
    assert_eq!(x.stride(-1), Ok(1));
    assert_eq!(x.storage_offset(), Ok(0));
    assert_eq!(x.has_storage(), Ok(true));
    assert_eq!(x.storage().unwrap().len(), 24);
    assert_eq!(x.is_contiguous(MemoryFormat::Contiguous), Ok(true));
    assert_eq!(x.is_contiguous(MemoryFormat::ChannelsLast), Ok(false));
}

#[test]
fn permute_shares_storage() {
    let x = Tensor::<i64>::from_vec((0..6).collect(), &[2, 3]).unwrap();
    let t = x.permute(&[1, 0]).unwrap();
    assert_eq!(t.sizes(), &[3, 2]);
    assert_eq!(t.strides().unwrap(), &[1, 3]);
    assert_eq!(t.is_contiguous(MemoryFormat::Contiguous), Ok(false));
    assert_eq!(t.get(&[2, 1]), Ok(5));
    assert_eq!(t.to_vec().unwrap(), vec![0, 3, 1, 4, 2, 5]);
    assert!(std::sync::Arc::ptr_eq(
        x.storage().unwrap(),
        t.storage().unwrap()
    ));
}

#[test]
fn channels_last_via_permute() {
    // An NHWC buffer viewed as NCHW.
    let nhwc = Tensor::<f32>::zeros(&[2, 4, 5, 3]);
    let nchw = nhwc.permute(&[0, 3, 1, 2]).unwrap();
    assert_eq!(nchw.sizes(), &[2, 3, 4, 5]);
    assert_eq!(nchw.is_contiguous(MemoryFormat::ChannelsLast), Ok(true));
    assert_eq!(nchw.is_contiguous(MemoryFormat::Contiguous), Ok(false));
    assert_eq!(nchw.is_contiguous(MemoryFormat::ChannelsLast3d), Ok(false));
}

#[test]
fn set_metadata() {
    let mut x = Tensor::<f32>::zeros(&[4, 4]);
    x.set_size(0, 2).unwrap();
    x.set_stride(-1, 2).unwrap();
    x.set_storage_offset(1).unwrap();
    assert_eq!(x.sizes(), &[2, 4]);
    assert_eq!(x.strides().unwrap(), &[4, 2]);
    assert_eq!(x.storage_offset(), Ok(1));
    assert_eq!(
        x.set_size(2, 1),
        Err(Error::DimOutOfRange { dim: 2, rank: 2 })
    );
}

#[test]
fn broadcast_axis_repeats_data() {
    let x = Tensor::<u32>::arange(2, 1, 1);
    let t = x.broadcast_axis(1, 3).unwrap();
    assert_eq!(t.sizes(), &[2, 3]);
    assert_eq!(t.to_vec().unwrap(), vec![1, 1, 1, 2, 2, 2]);
    assert!(x.broadcast_axis(2, 3).is_err());
}

#[test]
fn get_checks_bounds() {
    let x = Tensor::<f64>::ones(&[2, 2]);
    assert_eq!(x.get(&[1, 1]), Ok(1.0));
    assert!(matches!(
        x.get(&[2, 0]),
        Err(Error::IndexOutOfBounds { .. })
    ));
    assert!(x.get(&[0]).is_err());
}

#[test]
fn random_constructors() {
    let u = Tensor::<f32>::rand(&[3, 4]);
    assert_eq!(u.sizes(), &[3, 4]);
    assert!(u.to_vec().unwrap().iter().all(|v| (0.0..1.0).contains(v)));

    let n = Tensor::<f64>::randn(&[16]);
    assert_eq!(n.numel(), 16);
    assert!(n.to_vec().unwrap().iter().all(|v| v.is_finite()));
}

#[test]
fn scalar_tensor() {
    let s = Tensor::<i32>::full(&[], 7);
    assert_eq!(s.dim(), 0);
    assert_eq!(s.numel(), 1);
    assert_eq!(s.to_vec().unwrap(), vec![7]);
    assert!(s.size(0).is_err());
}

#[test]
fn metadata_must_stay_inside_storage() {
    let mut x = Tensor::<f32>::zeros(&[2, 3]);
    assert!(matches!(
        x.set_size(0, 100),
        Err(Error::StorageOutOfBounds { len: 6, .. })
    ));
    assert!(matches!(
        x.set_stride(1, 4),
        Err(Error::StorageOutOfBounds { .. })
    ));
    assert!(matches!(
        x.set_storage_offset(1),
        Err(Error::StorageOutOfBounds { .. })
    ));

    // Rejected updates leave the view readable.
    assert_eq!(x.sizes(), &[2, 3]);
    assert_eq!(x.strides().unwrap(), &[3, 1]);
    assert_eq!(x.get(&[1, 2]), Ok(0.0));
    assert_eq!(x.to_vec().unwrap().len(), 6);

    // Shrinking a view always fits.
    x.set_size(0, 1).unwrap();
    x.set_storage_offset(3).unwrap();
    assert_eq!(x.to_vec().unwrap().len(), 3);
}
