use vmaptensor_core::{add_batch_dim, maybe_get_batched, remove_batch_dim, Tensor};

fn main() {
    // Two nested vmaps over the leading dims of a [2, 3, 4] value.
    let x = Tensor::<f32>::from_vec((0..24).map(|i| i as f32).collect(), &[2, 3, 4]).unwrap();

    let outer = add_batch_dim(x, 1, 0).unwrap();
    let inner = add_batch_dim(outer, 2, 0).unwrap();
    assert_eq!(inner.sizes(), &[4]);

    let batched = maybe_get_batched(&inner).unwrap();
    for bdim in batched.bdims() {
        println!("hidden {bdim}");
    }
    println!(
        "public dim 0 is underlying dim {}",
        batched.actual_dim(0, true).unwrap()
    );

    // Leave the vmaps in reverse order, putting each batch dim back in front.
    let inner_done = remove_batch_dim(inner, 2, 3, 0).unwrap();
    let out = remove_batch_dim(inner_done, 1, 2, 0).unwrap();
    assert_eq!(out.sizes(), &[2, 3, 4]);
    println!("result sizes {:?}", out.sizes());
}
